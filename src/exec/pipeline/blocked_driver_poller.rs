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
//! Blocked-driver poller.
//!
//! Responsibilities:
//! - Holds drivers that returned a blocked state and re-queues them once `check_is_ready` passes.
//! - Finalizes drivers whose pending-finish work has drained.
//!
//! Key exported interfaces:
//! - Types: `BlockedDriverPoller`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::driver::DriverState;
use super::global_driver_executor::{DriverTask, ExecutorShared};
use crate::common::status::{Result, Status};
use crate::novacore_logging::debug;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1;

struct BlockedTask {
    task: DriverTask,
    next_poll_at: Instant,
}

struct PollerState {
    shared: Arc<ExecutorShared>,
    poll_interval: Duration,
    blocked: Mutex<VecDeque<BlockedTask>>,
    cv: Condvar,
    cv_mutex: Mutex<()>,
    shutdown: AtomicBool,
    started: AtomicBool,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

#[derive(Clone)]
pub(crate) struct BlockedDriverPoller {
    state: Arc<PollerState>,
}

impl BlockedDriverPoller {
    pub(crate) fn new(shared: Arc<ExecutorShared>) -> Self {
        let state = PollerState {
            shared,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            blocked: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            cv_mutex: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub(crate) fn start(&self) -> Result<()> {
        if self.state.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let state = Arc::clone(&self.state);
        let handle = thread::Builder::new()
            .name("blocked_driver_poller".to_string())
            .spawn(move || run_poller(state))
            .map_err(|e| Status::internal(format!("spawn blocked driver poller failed: {}", e)))?;
        *self.state.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    pub(crate) fn shutdown(&self) {
        self.state.shutdown.store(true, Ordering::Release);
        self.state.cv.notify_all();
        let handle = self
            .state
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub(crate) fn add_blocked(&self, task: DriverTask) {
        debug!(
            "Driver blocked: driver_id={} state={}",
            task.driver_id(),
            task.state()
        );
        let next_poll_at = Instant::now() + self.state.poll_interval;
        let mut blocked = self.state.blocked.lock().unwrap_or_else(|e| e.into_inner());
        blocked.push_back(BlockedTask { task, next_poll_at });
        self.state.cv.notify_one();
    }
}

fn run_poller(state: Arc<PollerState>) {
    debug!(
        "BlockedDriverPoller started with poll_interval={:?}",
        state.poll_interval
    );
    loop {
        if state.shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut ready_tasks = Vec::new();
        let mut drained_tasks = Vec::new();
        drain_blocked(&state, &mut ready_tasks, &mut drained_tasks);

        for task in drained_tasks {
            task.finish_pending();
        }
        for task in ready_tasks {
            state.shared.enqueue(task);
        }

        let guard = state.cv_mutex.lock().unwrap_or_else(|e| e.into_inner());
        let _ = state
            .cv
            .wait_timeout(guard, state.poll_interval)
            .unwrap_or_else(|e| e.into_inner());
    }
}

fn drain_blocked(
    state: &PollerState,
    ready_tasks: &mut Vec<DriverTask>,
    drained_tasks: &mut Vec<DriverTask>,
) {
    let now = Instant::now();
    let mut blocked = state.blocked.lock().unwrap_or_else(|e| e.into_inner());
    let mut pending = VecDeque::new();
    while let Some(mut entry) = blocked.pop_front() {
        if entry.next_poll_at > now {
            pending.push_back(entry);
            continue;
        }
        if entry.task.check_is_ready() {
            if entry.task.state() == DriverState::PendingFinish {
                drained_tasks.push(entry.task);
            } else {
                ready_tasks.push(entry.task);
            }
        } else {
            entry.next_poll_at = now + state.poll_interval;
            pending.push_back(entry);
        }
    }
    *blocked = pending;
}
