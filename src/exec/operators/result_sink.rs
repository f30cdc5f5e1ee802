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
//! Result sink operator.
//!
//! Responsibilities:
//! - Collects every non-empty chunk reaching the end of a pipeline into a shared handle.
//! - Lets the caller drain collected chunks after the fragment completes.
//!
//! Key exported interfaces:
//! - Types: `ResultSinkHandle`, `ResultSinkFactory`.

use std::sync::{Arc, Mutex};

use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::runtime::runtime_state::RuntimeState;

/// Shared buffer of result chunks, cloned into every sink instance.
#[derive(Clone, Default)]
pub struct ResultSinkHandle {
    inner: Arc<Mutex<Vec<Chunk>>>,
}

impl ResultSinkHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_chunks(&self) -> Vec<Chunk> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.drain(..).collect()
    }

    pub fn num_rows(&self) -> usize {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().map(Chunk::len).sum()
    }
}

pub struct ResultSinkFactory {
    name: String,
    handle: ResultSinkHandle,
}

impl ResultSinkFactory {
    pub fn new(handle: ResultSinkHandle) -> Self {
        Self::new_with_plan_node_id(handle, None)
    }

    pub fn new_with_plan_node_id(handle: ResultSinkHandle, plan_node_id: Option<i32>) -> Self {
        let plan_node_id = match plan_node_id {
            Some(id) if id >= 0 => id,
            _ => -1,
        };
        let name = format!("RESULT_SINK (plan_node_id={plan_node_id})");
        Self { name, handle }
    }
}

impl OperatorFactory for ResultSinkFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, _driver_sequence: i32) -> Box<dyn Operator> {
        Box::new(ResultSinkOperator {
            name: self.name.clone(),
            handle: self.handle.clone(),
            finished: false,
        })
    }

    fn is_sink(&self) -> bool {
        true
    }
}

struct ResultSinkOperator {
    name: String,
    handle: ResultSinkHandle,
    finished: bool,
}

impl Operator for ResultSinkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn need_input(&self) -> bool {
        !self.finished
    }

    fn has_output(&self) -> bool {
        false
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<()> {
        if self.finished || chunk.is_empty() {
            return Ok(());
        }
        let mut guard = self.handle.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(chunk);
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
        Err(Status::internal("result sink does not produce output"))
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
