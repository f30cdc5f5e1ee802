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
//! Pipeline structure metadata.
//!
//! Responsibilities:
//! - Represents one pipeline with ordered operator factories and its degree of parallelism.
//! - Instantiates one driver per parallel instance and counts their completion.
//!
//! Key exported interfaces:
//! - Types: `Pipeline`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::driver::PipelineDriver;
use super::fragment_context::FragmentContext;
use super::operator_factory::OperatorFactory;
use crate::common::status::{Result, Status};
use crate::novacore_logging::debug;
use crate::runtime::profile::OperatorProfiles;

/// One pipeline definition containing ordered operator factories.
pub struct Pipeline {
    id: i32,
    op_factories: Vec<Box<dyn OperatorFactory>>,
    dop: i32,
    remaining_drivers: AtomicUsize,
}

impl Pipeline {
    pub fn new(id: i32, op_factories: Vec<Box<dyn OperatorFactory>>, dop: i32) -> Arc<Self> {
        Arc::new(Self {
            id,
            op_factories,
            dop: dop.max(1),
            remaining_drivers: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn dop(&self) -> i32 {
        self.dop
    }

    pub fn remaining_drivers(&self) -> usize {
        self.remaining_drivers.load(Ordering::Acquire)
    }

    pub fn instantiate_drivers(
        self: &Arc<Self>,
        ctx: &Arc<FragmentContext>,
    ) -> Result<Vec<PipelineDriver>> {
        self.validate_factories()?;
        let pipeline_profiler = ctx
            .profiler()
            .map(|p| p.child(format!("Pipeline (id={})", self.id)));
        let mut drivers = Vec::with_capacity(self.dop as usize);
        for i in 0..self.dop {
            let driver_id = ctx.next_driver_id();
            let driver_profiler = pipeline_profiler
                .as_ref()
                .map(|p| p.child(format!("PipelineDriver (id={})", driver_id)));
            let mut operators = Vec::with_capacity(self.op_factories.len());
            let mut operator_profiles = Vec::with_capacity(self.op_factories.len());
            for factory in &self.op_factories {
                let mut op = factory.create(self.dop, i);
                let profiles = driver_profiler
                    .as_ref()
                    .map(|p| OperatorProfiles::new(p.child(op.name().to_string())));
                if let Some(profiles) = profiles.as_ref() {
                    op.set_profiles(profiles.clone());
                }
                operator_profiles.push(profiles);
                operators.push(op);
            }
            debug!(
                "Pipeline driver created: pipeline_id={} driver_id={} local_index={} dop={} operators={}",
                self.id,
                driver_id,
                i,
                self.dop,
                self.op_factories
                    .iter()
                    .map(|f| f.name())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            );
            let mut driver = PipelineDriver::new(driver_id, operators, Arc::clone(ctx))
                .with_pipeline(Arc::clone(self));
            if let Some(profiler) = driver_profiler {
                driver = driver.with_profiles(profiler, operator_profiles);
            }
            drivers.push(driver);
        }
        self.remaining_drivers
            .store(drivers.len(), Ordering::Release);
        Ok(drivers)
    }

    fn validate_factories(&self) -> Result<()> {
        let sources = self.op_factories.iter().filter(|f| f.is_source()).count();
        let sinks = self.op_factories.iter().filter(|f| f.is_sink()).count();
        if sources == 0 {
            return Err(Status::invalid_argument("pipeline missing source operator"));
        }
        if sinks == 0 {
            return Err(Status::invalid_argument("pipeline missing sink operator"));
        }
        if sources > 1 {
            return Err(Status::invalid_argument("pipeline has multiple source operators"));
        }
        if sinks > 1 {
            return Err(Status::invalid_argument("pipeline has multiple sink operators"));
        }
        if self.op_factories.len() < 2 {
            return Err(Status::invalid_argument(
                "pipeline needs distinct source and sink operators",
            ));
        }
        if !self.op_factories[0].is_source() {
            return Err(Status::invalid_argument("pipeline source must be the first operator"));
        }
        if !self.op_factories[self.op_factories.len() - 1].is_sink() {
            return Err(Status::invalid_argument("pipeline sink must be the last operator"));
        }
        Ok(())
    }

    /// Invoked by each driver's `finalize`; the last one notifies the fragment.
    pub fn count_down_driver(&self, ctx: &FragmentContext) {
        let prev = self
            .remaining_drivers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if prev == 1 {
            debug!("pipeline {} finished all drivers", self.id);
            ctx.count_down_pipeline();
        }
    }
}
