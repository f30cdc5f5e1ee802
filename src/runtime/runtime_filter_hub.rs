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
//! Runtime-filter readiness registry.
//!
//! Responsibilities:
//! - Keeps the local filter holders published by build-side plan nodes of one fragment.
//! - Keeps descriptors of global (cross-fragment) filters with their readiness and wait policy.
//!
//! Key exported interfaces:
//! - Types: `RuntimeFilterHub`, `RuntimeFilterHolder`, `GlobalRuntimeFilter`, `RuntimeFilterWaits`.
//!
//! Current limitations:
//! - Only readiness is tracked here; filter payloads are owned by the operators that apply them.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::novacore_logging::debug;

/// Runtime filters a chain wants to see before its scan does meaningful work.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeFilterWaits {
    /// Build-side plan node ids whose local filters are awaited.
    pub local_node_ids: BTreeSet<i32>,
    /// Global filter ids awaited.
    pub global_filter_ids: BTreeSet<i32>,
}

impl RuntimeFilterWaits {
    pub fn is_empty(&self) -> bool {
        self.local_node_ids.is_empty() && self.global_filter_ids.is_empty()
    }

    pub fn merge(&mut self, other: RuntimeFilterWaits) {
        self.local_node_ids.extend(other.local_node_ids);
        self.global_filter_ids.extend(other.global_filter_ids);
    }
}

#[derive(Debug)]
pub struct RuntimeFilterHolder {
    build_node_id: i32,
    ready: AtomicBool,
}

impl RuntimeFilterHolder {
    pub fn build_node_id(&self) -> i32 {
        self.build_node_id
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct GlobalRuntimeFilter {
    filter_id: i32,
    ready: AtomicBool,
    skip_wait: bool,
}

impl GlobalRuntimeFilter {
    pub fn filter_id(&self) -> i32 {
        self.filter_id
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Filters marked skip-wait never hold a driver back.
    pub fn skip_wait(&self) -> bool {
        self.skip_wait
    }
}

#[derive(Debug, Default)]
pub struct RuntimeFilterHub {
    holders: Mutex<HashMap<i32, Arc<RuntimeFilterHolder>>>,
    globals: Mutex<HashMap<i32, Arc<GlobalRuntimeFilter>>>,
}

impl RuntimeFilterHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holder for the local filters built by `build_node_id`, created on first use.
    pub fn holder(&self, build_node_id: i32) -> Arc<RuntimeFilterHolder> {
        let mut guard = self.holders.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(guard.entry(build_node_id).or_insert_with(|| {
            Arc::new(RuntimeFilterHolder {
                build_node_id,
                ready: AtomicBool::new(false),
            })
        }))
    }

    pub fn gather_holders<'a>(
        &self,
        build_node_ids: impl IntoIterator<Item = &'a i32>,
    ) -> Vec<Arc<RuntimeFilterHolder>> {
        build_node_ids.into_iter().map(|id| self.holder(*id)).collect()
    }

    pub fn mark_local_filters_ready(&self, build_node_id: i32) {
        debug!("runtime filters of build node {} are ready", build_node_id);
        self.holder(build_node_id).set_ready();
    }

    pub fn register_global(&self, filter_id: i32, skip_wait: bool) -> Arc<GlobalRuntimeFilter> {
        let mut guard = self.globals.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(guard.entry(filter_id).or_insert_with(|| {
            Arc::new(GlobalRuntimeFilter {
                filter_id,
                ready: AtomicBool::new(false),
                skip_wait,
            })
        }))
    }

    /// Descriptor of a global filter; unregistered ids are created waiting.
    pub fn global(&self, filter_id: i32) -> Arc<GlobalRuntimeFilter> {
        self.register_global(filter_id, false)
    }

    pub fn receive_global(&self, filter_id: i32) {
        debug!("global runtime filter {} received", filter_id);
        self.global(filter_id).set_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeFilterHub;

    #[test]
    fn holders_are_shared_per_build_node() {
        let hub = RuntimeFilterHub::new();
        let holders = hub.gather_holders(&[3, 5]);
        assert!(holders.iter().all(|h| !h.is_ready()));
        hub.mark_local_filters_ready(5);
        assert!(!holders[0].is_ready());
        assert!(holders[1].is_ready());
        assert_eq!(holders[1].build_node_id(), 5);
    }

    #[test]
    fn first_registration_decides_skip_wait() {
        let hub = RuntimeFilterHub::new();
        let skip = hub.register_global(9, true);
        assert!(skip.skip_wait());
        assert!(hub.global(9).skip_wait());
        hub.receive_global(9);
        assert!(skip.is_ready());
    }
}
