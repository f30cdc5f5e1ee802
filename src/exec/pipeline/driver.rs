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
//! Pipeline driver execution loop.
//!
//! Responsibilities:
//! - Moves chunks through one operator chain with cooperative, time-boxed scheduling.
//! - Owns the per-operator stage map and sequences every lifecycle transition through it.
//! - Classifies why a round stopped so the executor knows when to reschedule the driver.
//!
//! Key exported interfaces:
//! - Types: `DriverState`, `OperatorStage`, `ScheduleBudget`, `DriverQueue`, `DriverMetrics`,
//!   `OperatorMetrics`, `PipelineDriver`.
//!
//! Current limitations:
//! - One worker thread at a time may call into a driver; the executor hands drivers over by value.
//! - Operators must never block inside `pull_chunk`/`push_chunk`; waiting is expressed through
//!   `has_output`/`need_input` and precondition dependencies.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::fragment_context::FragmentContext;
use super::operator::{Operator, OperatorKind, OperatorSlot};
use super::pipeline::Pipeline;
use crate::common::config;
use crate::common::status::{Result, Status};
use crate::exec::pipeline::dependency::DependencyHandle;
use crate::novacore_logging::{debug, error, warn};
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::{OperatorProfiles, RuntimeProfile, TUnit};
use crate::runtime::runtime_filter_hub::{
    GlobalRuntimeFilter, RuntimeFilterHolder, RuntimeFilterWaits,
};
use crate::runtime::runtime_state::RuntimeState;

/// Scheduling state of one driver.
///
/// ```text
///   NotReady --prepare--> Ready --process--> Running --+--> Ready (yield)
///                                                      +--> PreconditionBlock | InputEmpty | OutputFull
///                                                      +--> PendingFinish --> Finish | Canceled
///                                                      +--> Finish | Canceled
///   any --finalize--> Finish | Canceled | InternalError
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DriverState {
    NotReady,
    Ready,
    Running,
    PreconditionBlock,
    OutputFull,
    InputEmpty,
    PendingFinish,
    Finish,
    Canceled,
    InternalError,
}

impl DriverState {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverState::NotReady => "NOT_READY",
            DriverState::Ready => "READY",
            DriverState::Running => "RUNNING",
            DriverState::PreconditionBlock => "PRECONDITION_BLOCK",
            DriverState::OutputFull => "OUTPUT_FULL",
            DriverState::InputEmpty => "INPUT_EMPTY",
            DriverState::PendingFinish => "PENDING_FINISH",
            DriverState::Finish => "FINISH",
            DriverState::Canceled => "CANCELED",
            DriverState::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DriverState::Finish | DriverState::Canceled | DriverState::InternalError
        )
    }

    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            DriverState::PreconditionBlock
                | DriverState::OutputFull
                | DriverState::InputEmpty
                | DriverState::PendingFinish
        )
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle stage of one operator, only ever moving forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperatorStage {
    Init,
    Prepared,
    PreconditionNotReady,
    Processing,
    Finishing,
    Finished,
    Cancelled,
    Closed,
}

/// Scheduler-side view of the queue a driver runs from.
pub trait DriverQueue: Send + Sync {
    /// Whether `driver_id`, having run for `time_spent`, should give way to a waiting peer.
    fn should_yield(&self, driver_id: i32, time_spent: Duration) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum YieldReason {
    TimeLimit,
    Preempt,
}

/// Time budget of one `process()` call.
#[derive(Clone)]
pub struct ScheduleBudget {
    pub max_time_spent: Duration,
    pub preempt_time_spent: Duration,
    /// Workgroup queue; without one the driver never yields early.
    pub queue: Option<Arc<dyn DriverQueue>>,
}

impl ScheduleBudget {
    pub fn new(max_time_spent: Duration, preempt_time_spent: Duration) -> Self {
        Self {
            max_time_spent,
            preempt_time_spent,
            queue: None,
        }
    }

    pub fn from_config() -> Self {
        Self::new(
            config::yield_max_time_spent(),
            config::yield_preempt_max_time_spent(),
        )
    }

    pub fn with_queue(mut self, queue: Arc<dyn DriverQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// The hard limit is checked before the preemption limit.
    pub fn yield_reason(&self, driver_id: i32, time_spent: Duration) -> Option<YieldReason> {
        if time_spent >= self.max_time_spent {
            return Some(YieldReason::TimeLimit);
        }
        match self.queue.as_ref() {
            Some(queue)
                if time_spent >= self.preempt_time_spent
                    && queue.should_yield(driver_id, time_spent) =>
            {
                Some(YieldReason::Preempt)
            }
            _ => None,
        }
    }
}

impl Default for ScheduleBudget {
    fn default() -> Self {
        Self::from_config()
    }
}

impl fmt::Debug for ScheduleBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleBudget")
            .field("max_time_spent", &self.max_time_spent)
            .field("preempt_time_spent", &self.preempt_time_spent)
            .field("has_queue", &self.queue.is_some())
            .finish()
    }
}

/// Driver-level accounting, updated by every `process()` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverMetrics {
    pub schedule_count: u64,
    pub yield_by_time_limit: u64,
    pub yield_by_preempt: u64,
    pub block_by_precondition: u64,
    pub block_by_output_full: u64,
    pub block_by_input_empty: u64,
    pub last_chunks_moved: u64,
    pub last_time_spent_ns: u64,
    pub accumulated_chunks_moved: u64,
    pub accumulated_rows_moved: u64,
    pub active_time_ns: u64,
}

/// Per-operator timers and row counts maintained by the driver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperatorMetrics {
    pub prepare_time_ns: u64,
    pub pull_time_ns: u64,
    pub push_time_ns: u64,
    pub finishing_time_ns: u64,
    pub finished_time_ns: u64,
    pub close_time_ns: u64,
    pub total_time_ns: u64,
    pub pull_chunks: u64,
    pub pull_rows: u64,
    pub push_chunks: u64,
    pub push_rows: u64,
}

#[derive(Default)]
struct RoundStats {
    chunks_moved: u64,
    rows_moved: u64,
    time_spent: Duration,
}

enum PairStep {
    Skipped,
    Pulled { moved: bool },
    Finished { moved: bool },
    Cancelled,
}

fn elapsed_ns(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

pub struct PipelineDriver {
    driver_id: i32,
    operators: Vec<Box<dyn Operator>>,
    op_stages: Vec<OperatorStage>,
    op_metrics: Vec<OperatorMetrics>,
    op_mem_trackers: Vec<Arc<MemTracker>>,
    lane_end_aware: Vec<bool>,
    first_unfinished: usize,
    state: DriverState,
    fragment_ctx: Arc<FragmentContext>,
    pipeline: Option<Arc<Pipeline>>,
    profiler: Option<RuntimeProfile>,
    operator_profiles: Vec<Option<OperatorProfiles>>,
    metrics: DriverMetrics,

    dependencies: Vec<DependencyHandle>,
    all_dependencies_ready: bool,
    local_rf_holders: Vec<Arc<RuntimeFilterHolder>>,
    all_local_rf_ready: bool,
    global_rf_descriptors: Vec<Arc<GlobalRuntimeFilter>>,
    all_global_rf_ready_or_timeout: bool,
    global_rf_wait_timeout: Duration,

    created_at: Instant,
    prepared_at: Option<Instant>,
    operators_submitted: bool,
    finalized: bool,
}

impl PipelineDriver {
    pub fn new(
        driver_id: i32,
        mut operators: Vec<Box<dyn Operator>>,
        fragment_ctx: Arc<FragmentContext>,
    ) -> Self {
        let num_operators = operators.len();
        let root = fragment_ctx.runtime_state().mem_tracker();
        let op_mem_trackers = operators
            .iter_mut()
            .enumerate()
            .map(|(idx, op)| {
                let tracker =
                    MemTracker::new_child(format!("operator {}: {}", idx, op.name()), &root);
                op.set_mem_tracker(Arc::clone(&tracker));
                tracker
            })
            .collect();
        Self {
            driver_id,
            operators,
            op_stages: vec![OperatorStage::Init; num_operators],
            op_metrics: vec![OperatorMetrics::default(); num_operators],
            op_mem_trackers,
            lane_end_aware: vec![false; num_operators],
            first_unfinished: 0,
            state: DriverState::NotReady,
            fragment_ctx,
            pipeline: None,
            profiler: None,
            operator_profiles: vec![None; num_operators],
            metrics: DriverMetrics::default(),
            dependencies: Vec::new(),
            all_dependencies_ready: true,
            local_rf_holders: Vec::new(),
            all_local_rf_ready: true,
            global_rf_descriptors: Vec::new(),
            all_global_rf_ready_or_timeout: true,
            global_rf_wait_timeout: Duration::ZERO,
            created_at: Instant::now(),
            prepared_at: None,
            operators_submitted: false,
            finalized: false,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_profiles(
        mut self,
        profiler: RuntimeProfile,
        operator_profiles: Vec<Option<OperatorProfiles>>,
    ) -> Self {
        if operator_profiles.len() == self.operators.len() {
            self.operator_profiles = operator_profiles;
        }
        self.profiler = Some(profiler);
        self
    }

    pub fn driver_id(&self) -> i32 {
        self.driver_id
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn first_unfinished(&self) -> usize {
        self.first_unfinished
    }

    pub fn metrics(&self) -> &DriverMetrics {
        &self.metrics
    }

    pub fn num_operators(&self) -> usize {
        self.operators.len()
    }

    pub fn operator_stage(&self, idx: usize) -> Option<OperatorStage> {
        self.op_stages.get(idx).copied()
    }

    pub fn operator_metrics(&self, idx: usize) -> Option<&OperatorMetrics> {
        self.op_metrics.get(idx)
    }

    pub fn fragment_ctx(&self) -> &Arc<FragmentContext> {
        &self.fragment_ctx
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn source_operator(&self) -> &dyn Operator {
        self.operators[0].as_ref()
    }

    fn sink_operator(&self) -> &dyn Operator {
        self.operators[self.operators.len() - 1].as_ref()
    }

    fn runtime_state(&self) -> Arc<RuntimeState> {
        Arc::clone(self.fragment_ctx.runtime_state())
    }

    pub fn prepare(&mut self) -> Result<()> {
        if self.state != DriverState::NotReady {
            return Err(Status::internal(format!(
                "driver {} prepared twice",
                self.driver_id
            )));
        }
        if self.operators.len() < 2 {
            return Err(Status::invalid_argument(
                "driver needs at least a source and a sink operator",
            ));
        }
        let state = self.runtime_state();

        self.dependencies = self
            .operators
            .iter()
            .filter_map(|op| op.precondition_dependency())
            .collect();
        self.all_dependencies_ready = self.dependencies.is_empty();

        if self.fragment_ctx.enable_cache() {
            self.wire_query_cache()?;
        }

        let mut waits = RuntimeFilterWaits::default();
        for op in &self.operators {
            waits.merge(op.runtime_filter_waits());
        }
        let hub = state.runtime_filter_hub();
        self.local_rf_holders = hub.gather_holders(&waits.local_node_ids);
        self.global_rf_descriptors = waits
            .global_filter_ids
            .iter()
            .map(|id| hub.global(*id))
            .collect();
        self.all_local_rf_ready = self.local_rf_holders.is_empty();
        self.all_global_rf_ready_or_timeout = self.global_rf_descriptors.is_empty();
        self.global_rf_wait_timeout = state.query_options().runtime_filter_wait_timeout;

        for idx in 0..self.operators.len() {
            let start = Instant::now();
            self.operators[idx].prepare(&state)?;
            self.op_metrics[idx].prepare_time_ns += elapsed_ns(start);
            self.op_stages[idx] = OperatorStage::Prepared;
        }
        self.lane_end_aware = self
            .operators
            .iter()
            .map(|op| op.kind().observes_lane_end())
            .collect();

        self.metrics = DriverMetrics::default();
        self.prepared_at = Some(Instant::now());
        if self.is_precondition_block() {
            self.mark_precondition_not_ready();
        }
        self.state = DriverState::Ready;
        debug!(
            "Driver prepared: finst={} {}",
            self.fragment_ctx.fragment_instance_id(),
            self.to_readable_string()
        );
        Ok(())
    }

    /// Hands the first cache operator's lane arbiter to the lane-aware operators before it.
    fn wire_query_cache(&mut self) -> Result<()> {
        let Some(cache_idx) = self
            .operators
            .iter()
            .position(|op| op.kind() == OperatorKind::CacheAware)
        else {
            return Ok(());
        };
        let arbiter = self.operators[cache_idx].lane_arbiter().ok_or_else(|| {
            Status::internal(format!(
                "cache operator {} has no lane arbiter",
                self.operators[cache_idx].name()
            ))
        })?;
        let mut multilane = Vec::new();
        let mut scan = None;
        for idx in 0..cache_idx {
            match self.operators[idx].kind() {
                OperatorKind::MultiLane => {
                    self.operators[idx].set_lane_arbiter(Arc::clone(&arbiter));
                    multilane.push(OperatorSlot(idx));
                }
                OperatorKind::Scan => {
                    self.operators[idx].set_lane_arbiter(Arc::clone(&arbiter));
                    self.operators[idx].set_cache_operator(OperatorSlot(cache_idx));
                    scan = Some(OperatorSlot(idx));
                }
                OperatorKind::Plain | OperatorKind::CacheAware => {}
            }
        }
        let cache = &mut self.operators[cache_idx];
        cache.set_multilane_operators(multilane);
        if let Some(scan) = scan {
            cache.set_scan_operator(scan);
        }
        Ok(())
    }

    /// True while a dependency or an awaited runtime filter is not ready yet.
    pub fn is_precondition_block(&mut self) -> bool {
        if !self.all_dependencies_ready {
            if self.dependencies.iter().any(|dep| !dep.is_ready()) {
                return true;
            }
            self.all_dependencies_ready = true;
        }
        if !self.all_local_rf_ready {
            if self.local_rf_holders.iter().any(|h| !h.is_ready()) {
                return true;
            }
            self.all_local_rf_ready = true;
        }
        if !self.all_global_rf_ready_or_timeout {
            let timed_out = self
                .prepared_at
                .map(|t| t.elapsed() >= self.global_rf_wait_timeout)
                .unwrap_or(false);
            if !timed_out
                && self
                    .global_rf_descriptors
                    .iter()
                    .any(|rf| !rf.skip_wait() && !rf.is_ready())
            {
                return true;
            }
            self.all_global_rf_ready_or_timeout = true;
        }
        false
    }

    fn mark_precondition_not_ready(&mut self) {
        for stage in self.op_stages.iter_mut() {
            *stage = OperatorStage::PreconditionNotReady;
        }
    }

    fn mark_precondition_ready(&mut self, state: &RuntimeState) {
        for op in self.operators.iter_mut() {
            op.set_precondition_ready(state);
        }
        self.submit_operators();
    }

    fn submit_operators(&mut self) {
        for stage in self.op_stages.iter_mut() {
            *stage = (*stage).max(OperatorStage::Processing);
        }
        self.operators_submitted = true;
    }

    pub fn is_still_pending_finish(&self) -> bool {
        self.operators.iter().any(|op| op.pending_finish())
    }

    /// Executor-side check whether a blocked driver can be scheduled again.
    pub fn check_is_ready(&mut self) -> bool {
        if self.fragment_ctx.is_canceled() && self.state != DriverState::PendingFinish {
            return true;
        }
        match self.state {
            DriverState::NotReady => false,
            DriverState::PreconditionBlock => !self.is_precondition_block(),
            DriverState::InputEmpty => {
                let source = self.source_operator();
                source.has_output() || source.is_finished()
            }
            DriverState::OutputFull => {
                let sink = self.sink_operator();
                sink.need_input() || sink.is_finished()
            }
            DriverState::PendingFinish => !self.is_still_pending_finish(),
            DriverState::Ready
            | DriverState::Running
            | DriverState::Finish
            | DriverState::Canceled
            | DriverState::InternalError => true,
        }
    }

    /// Runs rounds over the chain until the sink finishes, no pair moves, or the budget runs out.
    pub fn process(&mut self, budget: &ScheduleBudget) -> Result<DriverState> {
        if self.state == DriverState::NotReady {
            return Err(Status::internal(format!(
                "driver {} processed before prepare",
                self.driver_id
            )));
        }
        if self.finalized {
            return Err(Status::internal(format!(
                "driver {} processed after finalize",
                self.driver_id
            )));
        }
        self.metrics.schedule_count += 1;
        let start = Instant::now();
        let mut round = RoundStats::default();
        let result = self.process_inner(budget, &mut round);

        self.metrics.last_chunks_moved = round.chunks_moved;
        self.metrics.last_time_spent_ns =
            u64::try_from(round.time_spent.as_nanos()).unwrap_or(u64::MAX);
        self.metrics.accumulated_chunks_moved += round.chunks_moved;
        self.metrics.accumulated_rows_moved += round.rows_moved;
        self.metrics.active_time_ns += elapsed_ns(start);
        if let Err(err) = &result {
            warn!(
                "Driver process failed: finst={} driver_id={} error={}",
                self.fragment_ctx.fragment_instance_id(),
                self.driver_id,
                err
            );
        }
        result
    }

    fn process_inner(
        &mut self,
        budget: &ScheduleBudget,
        round: &mut RoundStats,
    ) -> Result<DriverState> {
        let state = self.runtime_state();
        self.state = DriverState::Running;

        if !self.operators_submitted {
            if self.is_precondition_block() {
                self.metrics.block_by_precondition += 1;
                self.state = DriverState::PreconditionBlock;
                return Ok(self.state);
            }
            self.mark_precondition_ready(&state);
        }

        let num_operators = self.operators.len();
        loop {
            state.check_mem_limit("Pipeline")?;

            let mut num_chunks_moved = 0u64;
            let mut should_yield = false;
            let mut new_first_unfinished = self.first_unfinished;
            let mut i = self.first_unfinished;
            while i + 1 < num_operators {
                let pair_start = Instant::now();
                let step = self.drive_pair(&state, i, round);
                round.time_spent += pair_start.elapsed();
                match step? {
                    PairStep::Cancelled => return Ok(self.state),
                    PairStep::Skipped => {
                        i += 1;
                        continue;
                    }
                    PairStep::Finished { moved } => {
                        num_chunks_moved += u64::from(moved);
                        new_first_unfinished = i + 1;
                        i += 1;
                        continue;
                    }
                    PairStep::Pulled { moved } => {
                        num_chunks_moved += u64::from(moved);
                    }
                }
                if let Some(reason) = budget.yield_reason(self.driver_id, round.time_spent) {
                    match reason {
                        YieldReason::TimeLimit => self.metrics.yield_by_time_limit += 1,
                        YieldReason::Preempt => self.metrics.yield_by_preempt += 1,
                    }
                    should_yield = true;
                    break;
                }
                i += 1;
            }

            for idx in self.first_unfinished..new_first_unfinished {
                self.mark_operator_finished(idx)?;
            }
            debug_assert!(new_first_unfinished >= self.first_unfinished);
            self.first_unfinished = new_first_unfinished;

            if self.sink_operator().is_finished() {
                self.finish_operators()?;
                self.state = if self.is_still_pending_finish() {
                    DriverState::PendingFinish
                } else {
                    DriverState::Finish
                };
                return Ok(self.state);
            }

            if num_chunks_moved == 0 || should_yield {
                self.state = self.classify_block();
                return Ok(self.state);
            }
        }
    }

    /// One attempt to move a chunk from operator `i` to operator `i + 1`.
    fn drive_pair(
        &mut self,
        state: &RuntimeState,
        i: usize,
        round: &mut RoundStats,
    ) -> Result<PairStep> {
        let next = i + 1;
        if self.operators[i].is_finished() {
            self.finish_pair(i)?;
            return Ok(PairStep::Finished { moved: false });
        }
        if !self.operators[i].has_output() || !self.operators[next].need_input() {
            return Ok(PairStep::Skipped);
        }
        if self.check_fragment_is_canceled() {
            return Ok(PairStep::Cancelled);
        }

        let pull_start = Instant::now();
        let pulled = self.operators[i].pull_chunk(state);
        self.op_metrics[i].pull_time_ns += elapsed_ns(pull_start);
        let pulled = match pulled {
            Ok(chunk) => Some(chunk),
            Err(err) if err.is_end_of_file() => None,
            Err(err) => {
                warn!(
                    "pull_chunk returns not ok status: operator={} error={}",
                    self.operators[i].name(),
                    err
                );
                return Err(err);
            }
        };

        if self.check_fragment_is_canceled() {
            return Ok(PairStep::Cancelled);
        }

        let moved = pulled.is_some();
        if let Some(Some(mut chunk)) = pulled {
            let rows = chunk.len() as u64;
            if rows > 0 || (chunk.owner_info().is_last_chunk && self.lane_end_aware[next]) {
                round.rows_moved += rows;
                chunk.transfer_to(&self.op_mem_trackers[next]);
                let push_start = Instant::now();
                let pushed = self.operators[next].push_chunk(state, chunk);
                self.op_metrics[next].push_time_ns += elapsed_ns(push_start);
                if rows > 0 {
                    self.op_metrics[i].pull_rows += rows;
                    self.op_metrics[i].pull_chunks += 1;
                    self.op_metrics[next].push_rows += rows;
                    self.op_metrics[next].push_chunks += 1;
                }
                match pushed {
                    Err(err) if !err.is_end_of_file() => {
                        warn!(
                            "push_chunk returns not ok status: operator={} error={}",
                            self.operators[next].name(),
                            err
                        );
                        return Err(err);
                    }
                    _ => {}
                }
                if self.check_fragment_is_canceled() {
                    return Ok(PairStep::Cancelled);
                }
            }
        }
        if moved {
            round.chunks_moved += 1;
        }

        if self.operators[i].is_finished() {
            self.finish_pair(i)?;
            return Ok(PairStep::Finished { moved });
        }
        Ok(PairStep::Pulled { moved })
    }

    fn finish_pair(&mut self, i: usize) -> Result<()> {
        if i == 0 {
            self.mark_operator_finishing(0)?;
        }
        self.mark_operator_finishing(i + 1)
    }

    fn classify_block(&mut self) -> DriverState {
        if self.is_precondition_block() {
            self.metrics.block_by_precondition += 1;
            return DriverState::PreconditionBlock;
        }
        let sink = self.sink_operator();
        if !sink.is_finished() && !sink.need_input() {
            self.metrics.block_by_output_full += 1;
            return DriverState::OutputFull;
        }
        let source = self.source_operator();
        if !source.is_finished() && !source.has_output() {
            self.metrics.block_by_input_empty += 1;
            return DriverState::InputEmpty;
        }
        DriverState::Ready
    }

    /// Applies a fragment-wide cancellation to this driver. Returns false if nothing was cancelled.
    pub fn check_fragment_is_canceled(&mut self) -> bool {
        if !self.fragment_ctx.is_canceled() {
            return false;
        }
        self.cancel_operators();
        self.state = if self.is_still_pending_finish() {
            DriverState::PendingFinish
        } else if self.fragment_ctx.final_status().is_ok() {
            DriverState::Finish
        } else {
            DriverState::Canceled
        };
        true
    }

    /// Finishes everything up to the last operator that finished outside the pull/push loop.
    pub fn check_short_circuit(&mut self) -> Result<()> {
        let num_operators = self.operators.len();
        let last_finished = (self.first_unfinished..num_operators.saturating_sub(1))
            .rev()
            .find(|&i| self.operators[i].is_finished());
        let Some(last_finished) = last_finished else {
            return Ok(());
        };

        self.mark_operator_finishing(last_finished + 1)?;
        for idx in self.first_unfinished..=last_finished {
            self.mark_operator_finished(idx)?;
        }
        self.first_unfinished = last_finished + 1;

        if self.sink_operator().is_finished() {
            self.finish_operators()?;
            self.state = if self.is_still_pending_finish() {
                DriverState::PendingFinish
            } else {
                DriverState::Finish
            };
        }
        Ok(())
    }

    fn check_slot(&self, idx: usize) -> Result<()> {
        if idx >= self.operators.len() {
            return Err(Status::invalid_argument(format!(
                "operator index {} out of range for chain of {}",
                idx,
                self.operators.len()
            )));
        }
        Ok(())
    }

    pub fn mark_operator_finishing(&mut self, idx: usize) -> Result<()> {
        self.check_slot(idx)?;
        if self.op_stages[idx] >= OperatorStage::Finishing {
            return Ok(());
        }
        debug!(
            "[Driver] finishing operator [fragment_id={}] [driver={}] [operator={}]",
            self.fragment_ctx.fragment_instance_id(),
            self.driver_id,
            self.operators[idx].name()
        );
        let state = self.runtime_state();
        self.op_stages[idx] = OperatorStage::Finishing;
        let start = Instant::now();
        let res = self.operators[idx].set_finishing(&state);
        self.op_metrics[idx].finishing_time_ns += elapsed_ns(start);
        res
    }

    pub fn mark_operator_finished(&mut self, idx: usize) -> Result<()> {
        self.mark_operator_finishing(idx)?;
        if self.op_stages[idx] >= OperatorStage::Finished {
            return Ok(());
        }
        debug!(
            "[Driver] finished operator [fragment_id={}] [driver={}] [operator={}]",
            self.fragment_ctx.fragment_instance_id(),
            self.driver_id,
            self.operators[idx].name()
        );
        let state = self.runtime_state();
        self.op_stages[idx] = OperatorStage::Finished;
        let start = Instant::now();
        let res = self.operators[idx].set_finished(&state);
        self.op_metrics[idx].finished_time_ns += elapsed_ns(start);
        res
    }

    pub fn mark_operator_cancelled(&mut self, idx: usize) -> Result<()> {
        if let Err(err) = self.mark_operator_finished(idx) {
            warn!(
                "fragment_id {} driver {} cancels operator {} with finished error {}",
                self.fragment_ctx.fragment_instance_id(),
                self.driver_id,
                self.operators[idx].name(),
                err
            );
        }
        if self.op_stages[idx] >= OperatorStage::Cancelled {
            return Ok(());
        }
        debug!(
            "[Driver] cancelled operator [fragment_id={}] [driver={}] [operator={}]",
            self.fragment_ctx.fragment_instance_id(),
            self.driver_id,
            self.operators[idx].name()
        );
        let state = self.runtime_state();
        self.op_stages[idx] = OperatorStage::Cancelled;
        self.operators[idx].set_cancelled(&state)
    }

    pub fn mark_operator_closed(&mut self, idx: usize) -> Result<()> {
        if self.fragment_ctx.is_canceled() {
            self.mark_operator_cancelled(idx)?;
        } else {
            self.mark_operator_finished(idx)?;
        }
        if self.op_stages[idx] >= OperatorStage::Closed {
            return Ok(());
        }
        debug!(
            "[Driver] close operator [fragment_id={}] [driver={}] [operator={}]",
            self.fragment_ctx.fragment_instance_id(),
            self.driver_id,
            self.operators[idx].name()
        );
        let state = self.runtime_state();
        self.op_stages[idx] = OperatorStage::Closed;
        let start = Instant::now();
        self.operators[idx].close(&state);
        let m = &mut self.op_metrics[idx];
        m.close_time_ns += elapsed_ns(start);
        m.total_time_ns = m.pull_time_ns
            + m.push_time_ns
            + m.finishing_time_ns
            + m.finished_time_ns
            + m.close_time_ns;
        Ok(())
    }

    fn finish_operators(&mut self) -> Result<()> {
        for idx in 0..self.operators.len() {
            self.mark_operator_finished(idx)?;
        }
        Ok(())
    }

    /// Moves every operator through the cancel lifecycle; failures are logged.
    pub fn cancel_operators(&mut self) {
        for idx in 0..self.operators.len() {
            if let Err(err) = self.mark_operator_cancelled(idx) {
                warn!(
                    "cancel operator failed: driver_id={} operator={} error={}",
                    self.driver_id,
                    self.operators[idx].name(),
                    err
                );
            }
        }
    }

    fn close_operators(&mut self) {
        for idx in 0..self.operators.len() {
            if let Err(err) = self.mark_operator_closed(idx) {
                warn!(
                    "close operator failed: driver_id={} operator={} error={}",
                    self.driver_id,
                    self.operators[idx].name(),
                    err
                );
            }
        }
    }

    /// Closes the chain, records the terminal state and notifies the owning pipeline.
    pub fn finalize(&mut self, terminal: DriverState) -> Result<()> {
        if !terminal.is_terminal() {
            return Err(Status::invalid_argument(format!(
                "finalize with non-terminal state {}",
                terminal
            )));
        }
        if self.finalized {
            warn!(
                "Driver finalized twice: driver_id={} state={} requested={}",
                self.driver_id, self.state, terminal
            );
            return Ok(());
        }
        self.finalized = true;
        self.close_operators();
        self.state = terminal;

        match terminal {
            DriverState::InternalError => error!(
                "Driver failed: finst={} driver_id={} error={:?}",
                self.fragment_ctx.fragment_instance_id(),
                self.driver_id,
                self.fragment_ctx.runtime_state().error()
            ),
            _ => debug!(
                "Driver finalized: finst={} {}",
                self.fragment_ctx.fragment_instance_id(),
                self.to_readable_string()
            ),
        }
        self.export_profile();
        if let Some(pipeline) = self.pipeline.as_ref() {
            pipeline.count_down_driver(&self.fragment_ctx);
        }
        Ok(())
    }

    fn export_profile(&self) {
        let Some(profiler) = self.profiler.as_ref() else {
            return;
        };
        let m = &self.metrics;
        profiler.counter_set("ScheduleCount", TUnit::Unit, to_i64(m.schedule_count));
        profiler.counter_set(
            "YieldByTimeLimit",
            TUnit::Unit,
            to_i64(m.yield_by_time_limit),
        );
        profiler.counter_set("YieldByPreempt", TUnit::Unit, to_i64(m.yield_by_preempt));
        profiler.counter_set(
            "BlockByPrecondition",
            TUnit::Unit,
            to_i64(m.block_by_precondition),
        );
        profiler.counter_set(
            "BlockByOutputFull",
            TUnit::Unit,
            to_i64(m.block_by_output_full),
        );
        profiler.counter_set(
            "BlockByInputEmpty",
            TUnit::Unit,
            to_i64(m.block_by_input_empty),
        );
        profiler.counter_set("ActiveTime", TUnit::TimeNs, to_i64(m.active_time_ns));
        profiler.counter_set(
            "DriverTotalTime",
            TUnit::TimeNs,
            to_i64(elapsed_ns(self.created_at)),
        );
        let operator_total: u64 = self.op_metrics.iter().map(|o| o.total_time_ns).sum();
        profiler.counter_set(
            "OverheadTime",
            TUnit::TimeNs,
            to_i64(m.active_time_ns.saturating_sub(operator_total)),
        );

        for (idx, profiles) in self.operator_profiles.iter().enumerate() {
            let Some(p) = profiles.as_ref() else {
                continue;
            };
            let om = &self.op_metrics[idx];
            let common = &p.common;
            common.counter_set("OperatorTotalTime", TUnit::TimeNs, to_i64(om.total_time_ns));
            common.counter_set("PrepareTime", TUnit::TimeNs, to_i64(om.prepare_time_ns));
            common.counter_set("PullTotalTime", TUnit::TimeNs, to_i64(om.pull_time_ns));
            common.counter_set("PushTotalTime", TUnit::TimeNs, to_i64(om.push_time_ns));
            common.counter_set(
                "SetFinishingTime",
                TUnit::TimeNs,
                to_i64(om.finishing_time_ns),
            );
            common.counter_set("SetFinishedTime", TUnit::TimeNs, to_i64(om.finished_time_ns));
            common.counter_set("CloseTime", TUnit::TimeNs, to_i64(om.close_time_ns));
            common.counter_set("PullChunkNum", TUnit::Unit, to_i64(om.pull_chunks));
            common.counter_set("PullRowNum", TUnit::Unit, to_i64(om.pull_rows));
            common.counter_set("PushChunkNum", TUnit::Unit, to_i64(om.push_chunks));
            common.counter_set("PushRowNum", TUnit::Unit, to_i64(om.push_rows));
            common.counter_set(
                "OperatorPeakMemoryUsage",
                TUnit::Bytes,
                self.op_mem_trackers[idx].peak(),
            );
        }
    }

    pub fn to_readable_string(&self) -> String {
        format!(
            "driver={}, status={}, operator-chain: [{}]",
            self.driver_id,
            self.state,
            self.operators
                .iter()
                .map(|op| op.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        )
    }
}

impl Drop for PipelineDriver {
    fn drop(&mut self) {
        if !self.finalized && self.state != DriverState::NotReady {
            self.close_operators();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysYield;

    impl DriverQueue for AlwaysYield {
        fn should_yield(&self, _driver_id: i32, _time_spent: Duration) -> bool {
            true
        }
    }

    #[test]
    fn time_limit_is_checked_before_preemption() {
        let budget = ScheduleBudget::new(Duration::from_millis(100), Duration::from_millis(5))
            .with_queue(Arc::new(AlwaysYield));
        assert_eq!(budget.yield_reason(1, Duration::from_millis(1)), None);
        assert_eq!(
            budget.yield_reason(1, Duration::from_millis(10)),
            Some(YieldReason::Preempt)
        );
        assert_eq!(
            budget.yield_reason(1, Duration::from_millis(100)),
            Some(YieldReason::TimeLimit)
        );
    }

    #[test]
    fn no_preemption_without_queue() {
        let budget = ScheduleBudget::new(Duration::from_millis(100), Duration::from_millis(5));
        assert_eq!(budget.yield_reason(1, Duration::from_millis(50)), None);
    }

    #[test]
    fn driver_state_classification() {
        assert!(DriverState::Finish.is_terminal());
        assert!(DriverState::InternalError.is_terminal());
        assert!(!DriverState::PendingFinish.is_terminal());
        assert!(DriverState::PendingFinish.is_blocked());
        assert!(!DriverState::Ready.is_blocked());
        assert_eq!(DriverState::InputEmpty.to_string(), "INPUT_EMPTY");
        assert!(OperatorStage::Finishing < OperatorStage::Finished);
        assert!(OperatorStage::Cancelled < OperatorStage::Closed);
    }
}
