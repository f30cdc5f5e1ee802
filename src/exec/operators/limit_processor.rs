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
//! Row-limit processor for LIMIT/OFFSET semantics.
//!
//! Responsibilities:
//! - Tracks consumed and emitted row counts against configured limit and offset bounds.
//! - Truncates or drops chunks deterministically once the row budget is exhausted.
//! - Finishes itself as soon as the limit is reached so the driver can short-circuit upstream.
//!
//! Key exported interfaces:
//! - Types: `LimitProcessorFactory`.

use std::sync::{Arc, Mutex};

use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::runtime::runtime_state::RuntimeState;

/// Factory for limit processors. All drivers of the pipeline share one row budget.
pub struct LimitProcessorFactory {
    name: String,
    state: Arc<Mutex<LimitState>>,
}

#[derive(Debug)]
struct LimitState {
    remaining_offset: usize,
    remaining_limit: Option<usize>,
}

impl LimitState {
    fn exhausted(&self) -> bool {
        self.remaining_limit == Some(0)
    }
}

impl LimitProcessorFactory {
    pub fn new(node_id: i32, limit: Option<usize>, offset: usize) -> Self {
        let name = if node_id >= 0 {
            format!("LIMIT (id={node_id})")
        } else {
            "LIMIT".to_string()
        };
        Self {
            name,
            state: Arc::new(Mutex::new(LimitState {
                remaining_offset: offset,
                remaining_limit: limit,
            })),
        }
    }
}

impl OperatorFactory for LimitProcessorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, _driver_sequence: i32) -> Box<dyn Operator> {
        Box::new(LimitProcessorOperator {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
            pending_output: None,
            finishing: false,
        })
    }
}

struct LimitProcessorOperator {
    name: String,
    state: Arc<Mutex<LimitState>>,
    pending_output: Option<Chunk>,
    finishing: bool,
}

impl LimitProcessorOperator {
    fn limit_exhausted(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .exhausted()
    }
}

impl Operator for LimitProcessorOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn need_input(&self) -> bool {
        !self.finishing && self.pending_output.is_none() && !self.limit_exhausted()
    }

    fn has_output(&self) -> bool {
        self.pending_output.is_some()
    }

    fn is_finished(&self) -> bool {
        self.pending_output.is_none() && (self.finishing || self.limit_exhausted())
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<()> {
        if self.pending_output.is_some() {
            return Err(Status::internal(
                "limit received input while output buffer is full",
            ));
        }
        let chunk_rows = chunk.len();
        if chunk_rows == 0 {
            return Ok(());
        }

        let (skip_rows, take_rows) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.exhausted() {
                (0usize, 0usize)
            } else {
                let skip_rows = state.remaining_offset.min(chunk_rows);
                state.remaining_offset -= skip_rows;

                let available_rows = chunk_rows - skip_rows;
                let take_rows = match state.remaining_limit {
                    Some(remaining) => {
                        let take = remaining.min(available_rows);
                        state.remaining_limit = Some(remaining - take);
                        take
                    }
                    None => available_rows,
                };
                (skip_rows, take_rows)
            }
        };

        if take_rows > 0 {
            self.pending_output = Some(chunk.slice(skip_rows, take_rows));
        }
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
        Ok(self.pending_output.take())
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<()> {
        self.finishing = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn make_chunk(start: i32, rows: usize) -> Chunk {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int32, false),
            Field::new("v", DataType::Utf8, false),
        ]));
        let keys: Vec<i32> = (0..rows).map(|i| start + i as i32).collect();
        let vals: Vec<String> = keys.iter().map(|k| format!("v{k}")).collect();
        Chunk::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(keys)),
                Arc::new(StringArray::from(vals)),
            ],
        )
        .expect("build chunk")
    }

    fn chunk_values(chunk: &Chunk) -> Vec<i32> {
        let arr = chunk
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int32 column");
        (0..arr.len()).map(|i| arr.value(i)).collect()
    }

    #[test]
    fn limit_processor_applies_offset_then_limit() {
        let state = RuntimeState::default();
        let mut op = LimitProcessorFactory::new(1, Some(4), 3).create(1, 0);

        op.push_chunk(&state, make_chunk(0, 5)).expect("push chunk #1");
        let out1 = op
            .pull_chunk(&state)
            .expect("pull chunk #1")
            .expect("chunk #1 exists");
        assert_eq!(chunk_values(&out1), vec![3, 4]);

        op.push_chunk(&state, make_chunk(5, 5)).expect("push chunk #2");
        assert!(!op.is_finished(), "pending output must drain first");
        let out2 = op
            .pull_chunk(&state)
            .expect("pull chunk #2")
            .expect("chunk #2 exists");
        assert_eq!(chunk_values(&out2), vec![5, 6]);

        assert!(op.is_finished());
        assert!(!op.need_input());
    }

    #[test]
    fn limit_processor_supports_offset_only() {
        let state = RuntimeState::default();
        let mut op = LimitProcessorFactory::new(2, None, 2).create(1, 0);

        op.push_chunk(&state, make_chunk(0, 3)).expect("push chunk #1");
        let out1 = op
            .pull_chunk(&state)
            .expect("pull chunk #1")
            .expect("chunk #1 exists");
        assert_eq!(chunk_values(&out1), vec![2]);

        op.push_chunk(&state, make_chunk(3, 2)).expect("push chunk #2");
        let out2 = op
            .pull_chunk(&state)
            .expect("pull chunk #2")
            .expect("chunk #2 exists");
        assert_eq!(chunk_values(&out2), vec![3, 4]);
        assert!(!op.is_finished());

        op.set_finishing(&state).expect("finishing");
        assert!(op.is_finished());
    }
}
