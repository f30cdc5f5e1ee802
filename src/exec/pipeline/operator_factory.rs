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
//! Operator factory abstraction.
//!
//! A pipeline holds one factory per chain position and asks each to build a fresh
//! operator for every driver it instantiates.

use super::operator::Operator;

pub trait OperatorFactory: Send + Sync {
    fn name(&self) -> &str;

    /// `driver_sequence` is the driver's index in `[0, dop)`.
    fn create(&self, dop: i32, driver_sequence: i32) -> Box<dyn Operator>;

    fn is_source(&self) -> bool {
        false
    }

    fn is_sink(&self) -> bool {
        false
    }
}
