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
use std::time::Duration;

use crate::novacore_config::config as novacore_app_config;

pub(crate) fn yield_max_time_spent() -> Duration {
    Duration::from_millis(
        novacore_app_config()
            .ok()
            .map(|c| c.pipeline.yield_max_time_spent_ms)
            .unwrap_or(100),
    )
}

pub(crate) fn yield_preempt_max_time_spent() -> Duration {
    Duration::from_millis(
        novacore_app_config()
            .ok()
            .map(|c| c.pipeline.yield_preempt_max_time_spent_ms)
            .unwrap_or(5),
    )
}

pub(crate) fn pipeline_exec_threads() -> usize {
    novacore_app_config()
        .ok()
        .map(|c| c.pipeline.exec_threads)
        .unwrap_or(4)
        .max(1)
}

pub(crate) fn pipeline_chunk_size() -> usize {
    novacore_app_config()
        .ok()
        .map(|c| c.pipeline.chunk_size)
        .unwrap_or(4096)
}

pub(crate) fn pre_aggregate_factor() -> u32 {
    novacore_app_config()
        .ok()
        .map(|c| c.storage.pre_aggregate_factor)
        .unwrap_or(80)
}

pub(crate) fn storage_chunk_size() -> usize {
    novacore_app_config()
        .ok()
        .map(|c| c.storage.chunk_size)
        .unwrap_or(4096)
}

pub(crate) fn vertical_compaction_max_columns_per_group() -> usize {
    novacore_app_config()
        .ok()
        .map(|c| c.storage.vertical_compaction_max_columns_per_group)
        .unwrap_or(5)
        .max(1)
}

pub(crate) fn tablet_max_versions() -> usize {
    novacore_app_config()
        .ok()
        .map(|c| c.storage.tablet_max_versions)
        .unwrap_or(1000)
        .max(1)
}
