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
//! Fragment-level pipeline runtime context.
//!
//! Responsibilities:
//! - Holds shared state required by all drivers in one fragment execution.
//! - Carries identifiers, runtime handles, cancellation and final status.
//! - Counts finished pipelines so the fragment knows when it is done.
//!
//! Key exported interfaces:
//! - Types: `FragmentContext`.
//!
//! Current limitations:
//! - Cancellation is cooperative: drivers poll `is_canceled()` at chunk boundaries.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use crate::common::status::Result;
use crate::common::types::UniqueId;
use crate::exec::pipeline::dependency::DependencyManager;
use crate::novacore_logging::{debug, info};
use crate::runtime::profile::{RuntimeProfile, attach_mem_tracker_tree};
use crate::runtime::runtime_state::RuntimeState;

/// Fragment-scoped runtime context shared across drivers and operator instances.
pub struct FragmentContext {
    next_driver_id: AtomicI32,
    profiler: Option<RuntimeProfile>,
    runtime_state: Arc<RuntimeState>,
    dependency_manager: DependencyManager,
    enable_cache: bool,
    /// `Some(Ok(()))` records a cancellation that still counts as success.
    final_status: Mutex<Option<Result<()>>>,
    cancelled: AtomicBool,
    num_pipelines: AtomicUsize,
    done: AtomicBool,
}

impl FragmentContext {
    pub fn new(runtime_state: Arc<RuntimeState>, profiler: Option<RuntimeProfile>) -> Self {
        let enable_cache = runtime_state.query_options().enable_query_cache;
        Self {
            next_driver_id: AtomicI32::new(0),
            profiler,
            runtime_state,
            dependency_manager: DependencyManager::new(),
            enable_cache,
            final_status: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            num_pipelines: AtomicUsize::new(0),
            done: AtomicBool::new(false),
        }
    }

    pub fn profiler(&self) -> Option<&RuntimeProfile> {
        self.profiler.as_ref()
    }

    pub fn runtime_state(&self) -> &Arc<RuntimeState> {
        &self.runtime_state
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.runtime_state.fragment_instance_id()
    }

    pub fn dependency_manager(&self) -> &DependencyManager {
        &self.dependency_manager
    }

    pub fn enable_cache(&self) -> bool {
        self.enable_cache
    }

    pub fn next_driver_id(&self) -> i32 {
        self.next_driver_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancels every driver of the fragment. The first status recorded becomes final.
    pub fn cancel(&self, status: Result<()>) {
        if let Err(err) = &status {
            self.runtime_state.error_state().set_error(err.clone());
        }
        let first = {
            let mut guard = self.final_status.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_none() {
                *guard = Some(status.clone());
                true
            } else {
                false
            }
        };
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            info!(
                "fragment {} cancelled, first_status={} status={:?}",
                self.fragment_instance_id(),
                first,
                status
            );
        }
    }

    /// OK unless a failure has been recorded.
    pub fn final_status(&self) -> Result<()> {
        self.final_status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or(Ok(()))
    }

    pub fn set_num_pipelines(&self, n: usize) {
        self.num_pipelines.store(n, Ordering::Release);
        self.done.store(n == 0, Ordering::Release);
    }

    /// Called by a pipeline whose last driver finalized. Returns true for the last pipeline.
    pub fn count_down_pipeline(&self) -> bool {
        let prev = self
            .num_pipelines
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if prev != 1 {
            return false;
        }
        if let Some(profiler) = self.profiler.as_ref() {
            attach_mem_tracker_tree(profiler, &self.runtime_state.mem_tracker());
        }
        self.done.store(true, Ordering::Release);
        debug!("fragment {} finished all pipelines", self.fragment_instance_id());
        true
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::status::Status;

    fn ctx() -> FragmentContext {
        FragmentContext::new(Arc::new(RuntimeState::default()), None)
    }

    #[test]
    fn first_cancel_status_is_final() {
        let ctx = ctx();
        assert!(ctx.final_status().is_ok());
        ctx.cancel(Err(Status::cancelled("user cancel")));
        ctx.cancel(Ok(()));
        assert!(ctx.is_canceled());
        assert_eq!(ctx.final_status(), Err(Status::cancelled("user cancel")));
        assert_eq!(
            ctx.runtime_state().error(),
            Some(Status::cancelled("user cancel"))
        );
    }

    #[test]
    fn ok_cancel_keeps_success() {
        let ctx = ctx();
        ctx.cancel(Ok(()));
        assert!(ctx.is_canceled());
        assert!(ctx.final_status().is_ok());
    }

    #[test]
    fn pipelines_count_down_to_done() {
        let ctx = ctx();
        ctx.set_num_pipelines(2);
        assert!(!ctx.count_down_pipeline());
        assert!(!ctx.is_done());
        assert!(ctx.count_down_pipeline());
        assert!(ctx.is_done());
        assert!(!ctx.count_down_pipeline());
    }
}
