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
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::config;
use crate::common::status::{Result, Status};
use crate::common::types::UniqueId;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::runtime_filter_hub::RuntimeFilterHub;

/// Per-query options that reach the execution core.
#[derive(Clone, Debug)]
pub struct QueryOptions {
    pub chunk_size: usize,
    /// How long a driver waits for global runtime filters before running without them.
    pub runtime_filter_wait_timeout: Duration,
    pub enable_query_cache: bool,
    /// Negative means unlimited.
    pub mem_limit: i64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            chunk_size: config::pipeline_chunk_size(),
            runtime_filter_wait_timeout: Duration::from_millis(1000),
            enable_query_cache: false,
            mem_limit: -1,
        }
    }
}

/// RuntimeState is a per-fragment-instance execution context, similar to StarRocks BE RuntimeState.
#[derive(Debug)]
pub struct RuntimeState {
    query_options: QueryOptions,
    fragment_instance_id: UniqueId,
    error_state: Arc<RuntimeErrorState>,
    mem_tracker: Arc<MemTracker>,
    runtime_filter_hub: Arc<RuntimeFilterHub>,
}

#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: Mutex<Option<Status>>,
}

impl RuntimeErrorState {
    /// Records the first error; later ones are dropped.
    pub fn set_error(&self, err: Status) {
        let mut guard = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<Status> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(UniqueId::default(), QueryOptions::default())
    }
}

impl RuntimeState {
    pub fn new(fragment_instance_id: UniqueId, query_options: QueryOptions) -> Self {
        let label = format!("fragment_instance_{fragment_instance_id}");
        let mem_tracker = if query_options.mem_limit >= 0 {
            MemTracker::new_root_with_limit(label, query_options.mem_limit)
        } else {
            MemTracker::new_root(label)
        };
        Self {
            query_options,
            fragment_instance_id,
            error_state: Arc::new(RuntimeErrorState::default()),
            mem_tracker,
            runtime_filter_hub: Arc::new(RuntimeFilterHub::new()),
        }
    }

    pub fn query_options(&self) -> &QueryOptions {
        &self.query_options
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    pub fn chunk_size(&self) -> usize {
        self.query_options.chunk_size.max(1)
    }

    pub fn mem_tracker(&self) -> Arc<MemTracker> {
        Arc::clone(&self.mem_tracker)
    }

    pub fn runtime_filter_hub(&self) -> &Arc<RuntimeFilterHub> {
        &self.runtime_filter_hub
    }

    pub fn error_state(&self) -> Arc<RuntimeErrorState> {
        Arc::clone(&self.error_state)
    }

    pub fn error(&self) -> Option<Status> {
        self.error_state.error()
    }

    /// Fails once the fragment tracker, or one of its ancestors, is over limit.
    pub fn check_mem_limit(&self, what: &str) -> Result<()> {
        match self.mem_tracker.find_limit_exceeded() {
            Some(tracker) => Err(Status::MemLimitExceeded(format!(
                "{what}: tracker {} consumed {} bytes over limit {}",
                tracker.label(),
                tracker.current(),
                tracker.limit()
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_limit_is_reported_with_tracker_label() {
        let state = RuntimeState::new(
            UniqueId::new(1, 2),
            QueryOptions {
                mem_limit: 10,
                ..QueryOptions::default()
            },
        );
        assert!(state.check_mem_limit("Pipeline").is_ok());
        state.mem_tracker().consume(11);
        let err = state.check_mem_limit("Pipeline").expect_err("over limit");
        assert!(matches!(err, Status::MemLimitExceeded(_)));
        assert!(err.to_string().contains("Pipeline"));
    }

    #[test]
    fn first_error_wins() {
        let state = RuntimeState::default();
        state.error_state().set_error(Status::internal("first"));
        state.error_state().set_error(Status::internal("second"));
        assert_eq!(state.error(), Some(Status::internal("first")));
    }
}
