// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Execution operator module exports.
//!
//! Responsibilities:
//! - Provides the source, passthrough and sink operators used to drive chunks end to end.
//!
//! Current limitations:
//! - No join, aggregation or exchange operators; chains are built directly by callers.

mod chunk_source;
mod limit_processor;
mod result_sink;
mod tablet_scan;

pub use chunk_source::ChunkSourceFactory;
pub use limit_processor::LimitProcessorFactory;
pub use result_sink::{ResultSinkFactory, ResultSinkHandle};
pub use tablet_scan::TabletScanFactory;
