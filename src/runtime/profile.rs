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
//! Runtime profile tree.
//!
//! A profile is a named node holding counters and info strings plus ordered
//! children. Drivers own one node each with a child per operator; operators split
//! their metrics into `CommonMetrics` and `UniqueMetrics`.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::runtime::mem_tracker::MemTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TUnit {
    Unit,
    Bytes,
    TimeNs,
    None,
}

#[derive(Clone, Debug)]
pub struct RuntimeProfile {
    inner: Arc<RuntimeProfileInner>,
}

#[derive(Debug)]
struct RuntimeProfileInner {
    name: RwLock<String>,
    counters: Mutex<Vec<CounterRef>>,
    counter_index: Mutex<HashMap<String, CounterRef>>,
    info_strings: Mutex<BTreeMap<String, String>>,
    children: Mutex<Vec<RuntimeProfile>>,
    child_map: Mutex<HashMap<String, RuntimeProfile>>,
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: RwLock::new(name.into()),
                counters: Mutex::new(Vec::new()),
                counter_index: Mutex::new(HashMap::new()),
                info_strings: Mutex::new(BTreeMap::new()),
                children: Mutex::new(Vec::new()),
                child_map: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner
            .name
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn get_child(&self, name: &str) -> Option<RuntimeProfile> {
        self.inner
            .child_map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn children(&self) -> Vec<RuntimeProfile> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn add_child(&self, child: RuntimeProfile) {
        let child_name = child.name();
        {
            let mut map = self
                .inner
                .child_map
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if map.contains_key(&child_name) {
                return;
            }
            map.insert(child_name, child.clone());
        }
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(child);
    }

    /// Returns the child with `name`, creating it on first use.
    pub fn child(&self, name: impl Into<String>) -> RuntimeProfile {
        let name = name.into();
        if let Some(existing) = self.get_child(&name) {
            return existing;
        }
        let child = RuntimeProfile::new(name);
        self.add_child(child.clone());
        child
    }

    pub fn add_info_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
    }

    pub fn get_info_string(&self, key: &str) -> Option<String> {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn add_counter(&self, name: impl Into<String>, unit: TUnit) -> CounterRef {
        let name = name.into();
        let mut index = self
            .inner
            .counter_index
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(counter) = index.get(&name) {
            return Arc::clone(counter);
        }
        let counter = Arc::new(Counter::new(name.clone(), unit));
        index.insert(name, Arc::clone(&counter));
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&counter));
        counter
    }

    pub fn get_counter(&self, name: &str) -> Option<CounterRef> {
        self.inner
            .counter_index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn counter_add(&self, name: &str, unit: TUnit, delta: i64) {
        self.add_counter(name, unit).add(delta);
    }

    pub fn counter_set(&self, name: &str, unit: TUnit, value: i64) {
        self.add_counter(name, unit).set(value);
    }

    pub fn add_timer(&self, name: impl Into<String>) -> CounterRef {
        self.add_counter(name, TUnit::TimeNs)
    }

    pub fn scoped_timer(&self, name: impl Into<String>) -> ScopedTimer {
        ScopedTimer::new(self.add_timer(name))
    }

    /// Human readable rendering, one node per line indented by depth.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        self.pretty_print_into(&mut out, 0);
        out
    }

    fn pretty_print_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{indent}{}:", self.name());
        for (k, v) in self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            let _ = writeln!(out, "{indent}   - {k}: {v}");
        }
        let counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for c in counters {
            let _ = writeln!(out, "{indent}   - {}: {}", c.name(), c.display_value());
        }
        for child in self.children() {
            child.pretty_print_into(out, depth + 1);
        }
    }
}

pub type CounterRef = Arc<Counter>;

#[derive(Debug)]
pub struct Counter {
    name: String,
    unit: TUnit,
    value: AtomicI64,
}

impl Counter {
    pub fn new(name: impl Into<String>, unit: TUnit) -> Self {
        Self {
            name: name.into(),
            unit,
            value: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> TUnit {
        self.unit
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    fn display_value(&self) -> String {
        match self.unit {
            TUnit::TimeNs => format!("{:?}", Duration::from_nanos(self.value().max(0) as u64)),
            TUnit::Bytes => format!("{} B", self.value()),
            TUnit::Unit | TUnit::None => self.value().to_string(),
        }
    }
}

pub struct ScopedTimer {
    counter: CounterRef,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(counter: CounterRef) -> Self {
        Self {
            counter,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.counter
            .add(clamp_u128_to_i64(self.start.elapsed().as_nanos()));
    }
}

#[derive(Clone, Debug)]
pub struct OperatorProfiles {
    pub operator: RuntimeProfile,
    pub common: RuntimeProfile,
    pub unique: RuntimeProfile,
}

impl OperatorProfiles {
    pub fn new(operator: RuntimeProfile) -> Self {
        let common = operator.child("CommonMetrics");
        let unique = operator.child("UniqueMetrics");
        Self {
            operator,
            common,
            unique,
        }
    }
}

pub fn attach_mem_tracker_tree(profile: &RuntimeProfile, root: &Arc<MemTracker>) {
    let mem_root = profile.child("MemTracker");
    fill_mem_tracker_profile(&mem_root, root);
}

fn fill_mem_tracker_profile(profile: &RuntimeProfile, tracker: &Arc<MemTracker>) {
    profile.add_info_string("Label", tracker.label());
    profile.counter_set("CurrentMemoryBytes", TUnit::Bytes, tracker.current());
    profile.counter_set("PeakMemoryBytes", TUnit::Bytes, tracker.peak());
    for child in tracker.children() {
        let child_profile = profile.child(child.label().to_string());
        fill_mem_tracker_profile(&child_profile, &child);
    }
}

pub fn clamp_u128_to_i64(value: u128) -> i64 {
    if value > i64::MAX as u128 {
        i64::MAX
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_and_counter_are_reused_by_name() {
        let root = RuntimeProfile::new("PipelineDriver");
        let a = root.child("Operator");
        a.counter_add("PullRowNum", TUnit::Unit, 3);
        let b = root.child("Operator");
        b.counter_add("PullRowNum", TUnit::Unit, 4);
        assert_eq!(root.children().len(), 1);
        assert_eq!(
            root.child("Operator")
                .get_counter("PullRowNum")
                .map(|c| c.value()),
            Some(7)
        );
    }

    #[test]
    fn scoped_timer_accumulates_on_drop() {
        let root = RuntimeProfile::new("p");
        {
            let _t = root.scoped_timer("Elapsed");
            std::thread::sleep(Duration::from_millis(1));
        }
        let elapsed = root.get_counter("Elapsed").map(|c| c.value()).unwrap_or(0);
        assert!(elapsed >= 1_000_000);
        assert!(root.pretty_print().contains("Elapsed"));
    }

    #[test]
    fn mem_tracker_tree_is_rendered_as_children() {
        let root = MemTracker::new_root("query");
        let child = MemTracker::new_child("scan", &root);
        child.consume(128);
        let profile = RuntimeProfile::new("fragment");
        attach_mem_tracker_tree(&profile, &root);
        let mem = profile.child("MemTracker");
        assert_eq!(
            mem.get_counter("PeakMemoryBytes").map(|c| c.value()),
            Some(128)
        );
        assert_eq!(
            mem.child("scan")
                .get_counter("CurrentMemoryBytes")
                .map(|c| c.value()),
            Some(128)
        );
    }
}
