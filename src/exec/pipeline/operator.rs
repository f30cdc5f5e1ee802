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
//! Pipeline operator contract.
//!
//! Responsibilities:
//! - Defines the single `Operator` trait every chain member implements.
//! - Defines the capability tag the driver reads once while preparing a chain.
//!
//! Key exported interfaces:
//! - Types: `Operator`, `OperatorKind`, `OperatorSlot`.
//!
//! Current limitations:
//! - Readiness queries (`has_output`, `need_input`, `is_finished`) must be side-effect free;
//!   the driver may call them any number of times per round.

use std::sync::Arc;

use crate::common::status::Result;
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::dependency::DependencyHandle;
use crate::exec::pipeline::lane_arbiter::LaneArbiter;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::OperatorProfiles;
use crate::runtime::runtime_filter_hub::RuntimeFilterWaits;
use crate::runtime::runtime_state::RuntimeState;

/// Capability tag carried by every operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OperatorKind {
    #[default]
    Plain,
    /// Storage scan that can be driven lane by lane when the query cache is on.
    Scan,
    /// Runs one internal operator per lane and must see every lane's end marker.
    MultiLane,
    /// Query-cache operator; owns the lane arbiter of its chain.
    CacheAware,
}

impl OperatorKind {
    /// Whether empty chunks flagged as a lane's last chunk must still be delivered.
    pub fn observes_lane_end(self) -> bool {
        matches!(self, OperatorKind::MultiLane | OperatorKind::CacheAware)
    }
}

/// Position of an operator inside its driver's chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperatorSlot(pub usize);

/// One stage of a pipeline.
///
/// Sources never receive `push_chunk`, sinks never receive `pull_chunk`.
/// `pull_chunk` returning `Ok(None)` means nothing was produced this call, and
/// returning `Err(Status::EndOfFile)` means the operator is draining; neither is a failure.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> OperatorKind {
        OperatorKind::Plain
    }

    fn set_mem_tracker(&mut self, _tracker: Arc<MemTracker>) {}

    fn set_profiles(&mut self, _profiles: OperatorProfiles) {}

    fn prepare(&mut self, _state: &RuntimeState) -> Result<()> {
        Ok(())
    }

    fn need_input(&self) -> bool;

    fn has_output(&self) -> bool;

    fn is_finished(&self) -> bool;

    /// True while asynchronous work started by this operator is still outstanding.
    fn pending_finish(&self) -> bool {
        false
    }

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<()>;

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>>;

    /// No more input will arrive.
    fn set_finishing(&mut self, state: &RuntimeState) -> Result<()>;

    /// No more output will be requested.
    fn set_finished(&mut self, _state: &RuntimeState) -> Result<()> {
        Ok(())
    }

    fn set_cancelled(&mut self, _state: &RuntimeState) -> Result<()> {
        Ok(())
    }

    fn set_precondition_ready(&mut self, _state: &RuntimeState) {}

    fn close(&mut self, _state: &RuntimeState) {}

    /// External readiness signal that must fire before the chain is schedulable.
    fn precondition_dependency(&self) -> Option<DependencyHandle> {
        None
    }

    fn runtime_filter_waits(&self) -> RuntimeFilterWaits {
        RuntimeFilterWaits::default()
    }

    // Query-cache wiring, invoked once by the driver while preparing the chain.

    fn lane_arbiter(&self) -> Option<Arc<LaneArbiter>> {
        None
    }

    fn set_lane_arbiter(&mut self, _arbiter: Arc<LaneArbiter>) {}

    fn set_cache_operator(&mut self, _cache: OperatorSlot) {}

    fn set_multilane_operators(&mut self, _operators: Vec<OperatorSlot>) {}

    fn set_scan_operator(&mut self, _scan: OperatorSlot) {}
}
