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
//! Lane assignment for per-tablet query-cache pipelines.
//!
//! A chain running with the query cache computes partial results one tablet at a
//! time. Each tablet occupies a lane until its last chunk passes the cache
//! operator; the arbiter hands out lanes and can switch the chain to passthrough
//! once caching is no longer worthwhile.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::novacore_logging::debug;

#[derive(Debug)]
pub struct LaneArbiter {
    lanes: Mutex<Vec<Option<i64>>>,
    passthrough: AtomicBool,
}

impl LaneArbiter {
    pub fn new(num_lanes: usize) -> Self {
        Self {
            lanes: Mutex::new(vec![None; num_lanes.max(1)]),
            passthrough: AtomicBool::new(false),
        }
    }

    pub fn num_lanes(&self) -> usize {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Lane already held by `owner_id`, or a free one; `None` when all lanes are busy.
    pub fn acquire_lane(&self, owner_id: i64) -> Option<usize> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(idx) = lanes.iter().position(|l| *l == Some(owner_id)) {
            return Some(idx);
        }
        let idx = lanes.iter().position(Option::is_none)?;
        lanes[idx] = Some(owner_id);
        Some(idx)
    }

    pub fn release_lane(&self, owner_id: i64) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        for lane in lanes.iter_mut() {
            if *lane == Some(owner_id) {
                *lane = None;
            }
        }
    }

    pub fn enable_passthrough(&self) {
        if !self.passthrough.swap(true, Ordering::AcqRel) {
            debug!("lane arbiter switched to passthrough");
        }
    }

    pub fn in_passthrough_mode(&self) -> bool {
        self.passthrough.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::LaneArbiter;

    #[test]
    fn lanes_are_reused_per_owner_and_freed_on_release() {
        let arbiter = LaneArbiter::new(2);
        assert_eq!(arbiter.acquire_lane(10), Some(0));
        assert_eq!(arbiter.acquire_lane(11), Some(1));
        assert_eq!(arbiter.acquire_lane(10), Some(0));
        assert_eq!(arbiter.acquire_lane(12), None);
        arbiter.release_lane(10);
        assert_eq!(arbiter.acquire_lane(12), Some(0));
        assert!(!arbiter.in_passthrough_mode());
        arbiter.enable_passthrough();
        assert!(arbiter.in_passthrough_mode());
    }
}
