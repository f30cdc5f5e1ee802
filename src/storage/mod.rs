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
//! Tablet storage: schema, rowsets, delete handling, the read merge engine and compaction.

pub mod aggregate_iterator;
pub mod chunk_iterator;
pub mod column_predicate;
pub mod compaction;
pub mod datum;
pub mod delete_predicates;
pub mod delta_writer;
pub mod merge_iterator;
pub mod read_stats;
pub mod row_source_mask;
pub mod rowset;
pub mod schema;
pub mod seek_range;
pub mod segment;
pub mod segment_iterator;
pub mod tablet;
pub mod tablet_manager;
pub mod tablet_reader;
pub mod tablet_reader_params;
pub mod update_manager;

pub use chunk_iterator::{ChunkIterator, ChunkIteratorPtr};
pub use compaction::{CompactionAlgorithm, CompactionTask};
pub use delta_writer::DeltaWriter;
pub use schema::{AggregationType, KeysType, LogicalType, Schema, TabletColumn, TabletSchema};
pub use tablet::{Tablet, TabletSharedPtr};
pub use tablet_manager::TabletManager;
pub use tablet_reader::TabletReader;
pub use tablet_reader_params::{ReaderType, TabletReaderParams};
