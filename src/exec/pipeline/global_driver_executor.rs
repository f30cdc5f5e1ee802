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
//! Driver executor and worker pool.
//!
//! Responsibilities:
//! - Schedules driver tasks across worker threads and tracks fragment completion.
//! - Hands blocked drivers to the poller and finalizes drivers that reach a terminal state.
//!
//! Key exported interfaces:
//! - Types: `FragmentCompletion`, `DriverTask`, `DriverExecutor`.
//! - Functions: `global_driver_executor`.
//!
//! Current limitations:
//! - Queue order is FIFO; there is no workgroup-level fairness beyond the yield budget.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;

use super::blocked_driver_poller::BlockedDriverPoller;
use super::driver::{DriverState, PipelineDriver, ScheduleBudget};
use super::fragment_context::FragmentContext;
use crate::common::config;
use crate::common::status::{Result, Status};
use crate::novacore_logging::{debug, warn};

/// Completion latch of one fragment: released once every driver has been finalized.
pub struct FragmentCompletion {
    mu: Mutex<usize>,
    cv: Condvar,
    fragment_ctx: Arc<FragmentContext>,
}

impl FragmentCompletion {
    pub fn new(driver_count: usize, fragment_ctx: Arc<FragmentContext>) -> Arc<Self> {
        Arc::new(Self {
            mu: Mutex::new(driver_count),
            cv: Condvar::new(),
            fragment_ctx,
        })
    }

    pub fn fragment_ctx(&self) -> &Arc<FragmentContext> {
        &self.fragment_ctx
    }

    pub fn remaining(&self) -> usize {
        *self.mu.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn driver_finished(&self) {
        let mut remaining = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        if *remaining == 0 {
            return;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.cv.notify_all();
        }
    }

    /// Blocks until all drivers are finalized and returns the fragment's final status.
    pub fn wait(&self) -> Result<()> {
        let mut remaining = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        while *remaining > 0 {
            remaining = self.cv.wait(remaining).unwrap_or_else(|e| e.into_inner());
        }
        drop(remaining);
        self.fragment_ctx.final_status()
    }
}

/// Schedulable driver together with its completion latch and time budget.
pub struct DriverTask {
    driver: PipelineDriver,
    completion: Arc<FragmentCompletion>,
    budget: ScheduleBudget,
}

impl DriverTask {
    pub fn new(
        driver: PipelineDriver,
        completion: Arc<FragmentCompletion>,
        budget: ScheduleBudget,
    ) -> Self {
        Self {
            driver,
            completion,
            budget,
        }
    }

    pub(crate) fn driver_id(&self) -> i32 {
        self.driver.driver_id()
    }

    pub(crate) fn state(&self) -> DriverState {
        self.driver.state()
    }

    pub(crate) fn check_is_ready(&mut self) -> bool {
        self.driver.check_is_ready()
    }

    /// Finalizes the driver and releases its slot in the completion latch.
    pub(crate) fn finish(mut self, terminal: DriverState) {
        if let Err(err) = self.driver.finalize(terminal) {
            warn!(
                "finalize driver failed: driver_id={} error={}",
                self.driver.driver_id(),
                err
            );
        }
        self.completion.driver_finished();
    }

    /// Terminal state of a driver whose pending-finish work has drained.
    pub(crate) fn finish_pending(self) {
        let terminal = if self.completion.fragment_ctx().final_status().is_ok() {
            DriverState::Finish
        } else {
            DriverState::Canceled
        };
        self.finish(terminal);
    }

    fn fail(self, err: Status) {
        self.completion.fragment_ctx().cancel(Err(err));
        self.finish(DriverState::InternalError);
    }
}

/// Shared executor internals used by worker threads and the poller.
pub(crate) struct ExecutorShared {
    pub(crate) queue: Mutex<VecDeque<DriverTask>>,
    pub(crate) cv: Condvar,
    pub(crate) shutdown: AtomicBool,
}

impl ExecutorShared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn enqueue(&self, task: DriverTask) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_back(task);
        self.cv.notify_one();
    }
}

/// Worker pool that runs pipeline drivers until they reach a terminal state.
pub struct DriverExecutor {
    shared: Arc<ExecutorShared>,
    poller: BlockedDriverPoller,
    workers: Vec<thread::JoinHandle<()>>,
}

impl DriverExecutor {
    pub fn new(num_threads: usize) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let shared = Arc::new(ExecutorShared::new());
        let poller = BlockedDriverPoller::new(Arc::clone(&shared));
        poller.start()?;

        let mut workers = Vec::with_capacity(num_threads);
        for idx in 0..num_threads {
            let shared_cloned = Arc::clone(&shared);
            let poller_cloned = poller.clone();
            let handle = thread::Builder::new()
                .name(format!("pip_exec_{}", idx))
                .spawn(move || worker_loop(shared_cloned, poller_cloned))
                .map_err(|e| Status::internal(format!("spawn pipeline worker failed: {}", e)))?;
            workers.push(handle);
        }
        debug!("DriverExecutor started with {} worker threads", num_threads);

        Ok(Self {
            shared,
            poller,
            workers,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    pub fn submit(&self, tasks: Vec<DriverTask>) {
        if tasks.is_empty() {
            return;
        }
        let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks {
            debug!("submit driver: driver_id={}", task.driver_id());
            queue.push_back(task);
        }
        self.shared.cv.notify_all();
    }
}

impl Drop for DriverExecutor {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            self.shared.cv.notify_all();
        }
        self.poller.shutdown();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

static GLOBAL_DRIVER_EXECUTOR: OnceLock<DriverExecutor> = OnceLock::new();

/// Return the process-wide driver executor, sized from `pipeline.exec_threads`.
pub fn global_driver_executor() -> Result<&'static DriverExecutor> {
    if let Some(executor) = GLOBAL_DRIVER_EXECUTOR.get() {
        return Ok(executor);
    }
    let executor = DriverExecutor::new(config::pipeline_exec_threads())?;
    let _ = GLOBAL_DRIVER_EXECUTOR.set(executor);
    GLOBAL_DRIVER_EXECUTOR
        .get()
        .ok_or_else(|| Status::internal("global driver executor is not initialized"))
}

fn worker_loop(shared: Arc<ExecutorShared>, poller: BlockedDriverPoller) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            while queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
                queue = shared.cv.wait(queue).unwrap_or_else(|e| e.into_inner());
            }
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            queue.pop_front()
        };
        let Some(mut task) = task else {
            continue;
        };

        let result = if task.driver.check_fragment_is_canceled() {
            Ok(task.driver.state())
        } else {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                task.driver.process(&task.budget)
            }))
            .unwrap_or_else(|payload| {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                Err(Status::internal(format!("panic in driver execution: {msg}")))
            })
        };

        match result {
            Ok(state) => dispatch(&shared, &poller, task, state),
            Err(err) => task.fail(err),
        }
    }
}

fn dispatch(
    shared: &ExecutorShared,
    poller: &BlockedDriverPoller,
    task: DriverTask,
    state: DriverState,
) {
    match state {
        DriverState::Ready | DriverState::Running => shared.enqueue(task),
        DriverState::PreconditionBlock
        | DriverState::InputEmpty
        | DriverState::OutputFull
        | DriverState::PendingFinish => poller.add_blocked(task),
        DriverState::Finish | DriverState::Canceled | DriverState::InternalError => {
            task.finish(state)
        }
        DriverState::NotReady => {
            let driver_id = task.driver_id();
            task.fail(Status::internal(format!(
                "driver {} scheduled before prepare",
                driver_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::operators::{ChunkSourceFactory, ResultSinkFactory, ResultSinkHandle};
    use crate::exec::pipeline::operator_factory::OperatorFactory;
    use crate::runtime::runtime_state::RuntimeState;

    #[test]
    fn unprepared_driver_fails_fragment_on_dispatch() {
        let ctx = Arc::new(FragmentContext::new(Arc::new(RuntimeState::default()), None));
        let operators = vec![
            ChunkSourceFactory::new(Vec::new(), 0).create(1, 0),
            ResultSinkFactory::new(ResultSinkHandle::new()).create(1, 0),
        ];
        let driver = PipelineDriver::new(7, operators, Arc::clone(&ctx));
        let completion = FragmentCompletion::new(1, Arc::clone(&ctx));
        let task = DriverTask::new(driver, Arc::clone(&completion), ScheduleBudget::default());

        let shared = Arc::new(ExecutorShared::new());
        let poller = BlockedDriverPoller::new(Arc::clone(&shared));
        dispatch(&shared, &poller, task, DriverState::NotReady);

        assert_eq!(completion.remaining(), 0);
        assert!(ctx.is_canceled());
        let err = completion.wait().unwrap_err();
        assert!(err.to_string().contains("driver 7 scheduled before prepare"));
        assert!(shared.queue.lock().unwrap().is_empty());
    }
}
