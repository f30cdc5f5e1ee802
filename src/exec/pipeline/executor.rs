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
//! Top-level pipeline executor entrypoint.
//!
//! Responsibilities:
//! - Instantiates and prepares the drivers of every pipeline of one fragment.
//! - Submits them to a driver executor and waits for the fragment's final status.
//!
//! Key exported interfaces:
//! - Functions: `execute_fragment`, `execute_fragment_on`.

use std::sync::Arc;

use super::driver::{PipelineDriver, ScheduleBudget};
use super::fragment_context::FragmentContext;
use super::global_driver_executor::{
    DriverExecutor, DriverTask, FragmentCompletion, global_driver_executor,
};
use super::pipeline::Pipeline;
use crate::common::status::Result;
use crate::novacore_logging::{info, warn};

/// Execute one fragment on the process-wide executor with the configured yield budget.
pub fn execute_fragment(
    fragment_ctx: Arc<FragmentContext>,
    pipelines: Vec<Arc<Pipeline>>,
) -> Result<()> {
    execute_fragment_on(
        global_driver_executor()?,
        fragment_ctx,
        pipelines,
        ScheduleBudget::from_config(),
    )
}

pub fn execute_fragment_on(
    executor: &DriverExecutor,
    fragment_ctx: Arc<FragmentContext>,
    pipelines: Vec<Arc<Pipeline>>,
    budget: ScheduleBudget,
) -> Result<()> {
    fragment_ctx.set_num_pipelines(pipelines.len());

    let mut drivers: Vec<PipelineDriver> = Vec::new();
    for pipeline in &pipelines {
        drivers.extend(pipeline.instantiate_drivers(&fragment_ctx)?);
    }
    for driver in drivers.iter_mut() {
        if let Err(err) = driver.prepare() {
            warn!(
                "prepare driver failed: finst={} driver_id={} error={}",
                fragment_ctx.fragment_instance_id(),
                driver.driver_id(),
                err
            );
            fragment_ctx.cancel(Err(err.clone()));
            return Err(err);
        }
    }
    info!(
        "execute fragment: finst={} pipelines={} drivers={}",
        fragment_ctx.fragment_instance_id(),
        pipelines.len(),
        drivers.len()
    );
    if drivers.is_empty() {
        return fragment_ctx.final_status();
    }

    let completion = FragmentCompletion::new(drivers.len(), Arc::clone(&fragment_ctx));
    let tasks = drivers
        .into_iter()
        .map(|driver| DriverTask::new(driver, Arc::clone(&completion), budget.clone()))
        .collect();
    executor.submit(tasks);
    let status = completion.wait();
    info!(
        "fragment finished: finst={} status={:?}",
        fragment_ctx.fragment_instance_id(),
        status
    );
    status
}
