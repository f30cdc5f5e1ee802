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
//! Pipeline dependency primitives.
//!
//! Responsibilities:
//! - Defines dependency handles and readiness flags used as driver preconditions.
//! - Keeps a per-fragment registry so producers and waiters share one handle per name.
//!
//! Key exported interfaces:
//! - Types: `DependencyHandle`, `Dependency`, `DependencyManager`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::novacore_logging::debug;

static NEXT_DEP_ID: AtomicUsize = AtomicUsize::new(1);

/// Reference-counted handle to one pipeline dependency object.
pub type DependencyHandle = Arc<Dependency>;

pub struct Dependency {
    id: usize,
    name: String,
    ready: AtomicBool,
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> DependencyHandle {
        Arc::new(Self {
            id: NEXT_DEP_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            ready: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self) {
        if !self.ready.swap(true, Ordering::AcqRel) {
            debug!("Dependency ready: dep_id={} name={}", self.id, self.name);
        }
    }

    pub fn set_blocked(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

/// Registry of dependencies for one fragment instance.
#[derive(Clone, Default)]
pub struct DependencyManager {
    deps: Arc<Mutex<HashMap<String, DependencyHandle>>>,
}

impl DependencyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str) -> DependencyHandle {
        let mut guard = self.deps.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            guard
                .entry(name.to_string())
                .or_insert_with(|| Dependency::new(name)),
        )
    }

    pub fn len(&self) -> usize {
        self.deps.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::DependencyManager;

    #[test]
    fn same_name_yields_same_handle() {
        let mgr = DependencyManager::new();
        let a = mgr.get_or_create("hash_join_build_1");
        let b = mgr.get_or_create("hash_join_build_1");
        assert_eq!(a.id(), b.id());
        assert_eq!(mgr.len(), 1);
        assert!(!b.is_ready());
        a.set_ready();
        assert!(b.is_ready());
        b.set_blocked();
        assert!(!a.is_ready());
    }
}
