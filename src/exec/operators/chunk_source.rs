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
//! In-memory chunk source.
//!
//! Responsibilities:
//! - Emits a fixed list of chunks, one per pull, spread round-robin across drivers.
//!
//! Key exported interfaces:
//! - Types: `ChunkSourceFactory`.

use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::runtime::runtime_state::RuntimeState;

/// Factory for sources that replay literal chunks.
pub struct ChunkSourceFactory {
    name: String,
    chunks: Vec<Chunk>,
}

impl ChunkSourceFactory {
    pub fn new(chunks: Vec<Chunk>, node_id: i32) -> Self {
        let name = if node_id >= 0 {
            format!("ChunkSource (id={node_id})")
        } else {
            "ChunkSource".to_string()
        };
        Self { name, chunks }
    }
}

impl OperatorFactory for ChunkSourceFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, dop: i32, driver_sequence: i32) -> Box<dyn Operator> {
        let dop = dop.max(1) as usize;
        let seq = driver_sequence.max(0) as usize;
        let mut chunks: Vec<Chunk> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(idx, _)| idx % dop == seq)
            .map(|(_, chunk)| chunk.clone())
            .collect();
        chunks.reverse();
        Box::new(ChunkSourceOperator {
            name: self.name.clone(),
            chunks,
            finished: false,
        })
    }

    fn is_source(&self) -> bool {
        true
    }
}

struct ChunkSourceOperator {
    name: String,
    /// Remaining chunks in reverse emission order.
    chunks: Vec<Chunk>,
    finished: bool,
}

impl Operator for ChunkSourceOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn need_input(&self) -> bool {
        false
    }

    fn has_output(&self) -> bool {
        !self.finished && !self.chunks.is_empty()
    }

    fn is_finished(&self) -> bool {
        self.finished || self.chunks.is_empty()
    }

    fn push_chunk(&mut self, _state: &RuntimeState, _chunk: Chunk) -> Result<()> {
        Err(Status::internal("chunk source operator does not accept input"))
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
        if self.finished {
            return Ok(None);
        }
        Ok(self.chunks.pop())
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<()> {
        self.finished = true;
        self.chunks.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn int_chunk(values: Vec<i32>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("k", DataType::Int32, false)]));
        Chunk::try_new(schema, vec![Arc::new(Int32Array::from(values))]).expect("chunk")
    }

    #[test]
    fn chunk_source_splits_chunks_across_drivers() {
        let state = RuntimeState::default();
        let factory = ChunkSourceFactory::new(
            vec![int_chunk(vec![1]), int_chunk(vec![2]), int_chunk(vec![3])],
            1,
        );
        let mut first = factory.create(2, 0);
        let mut second = factory.create(2, 1);

        let a = first.pull_chunk(&state).expect("pull").expect("chunk");
        let b = first.pull_chunk(&state).expect("pull").expect("chunk");
        assert_eq!(a.column(0).len(), 1);
        assert_eq!(b.column(0).len(), 1);
        assert!(first.is_finished());

        assert!(second.has_output());
        second.pull_chunk(&state).expect("pull").expect("chunk");
        assert!(second.is_finished());
    }

    #[test]
    fn chunk_source_finishing_drops_remaining_chunks() {
        let state = RuntimeState::default();
        let factory = ChunkSourceFactory::new(vec![int_chunk(vec![1, 2])], -1);
        let mut op = factory.create(1, 0);
        op.set_finishing(&state).expect("finishing");
        assert!(op.is_finished());
        assert!(!op.has_output());
        assert!(op.pull_chunk(&state).expect("pull").is_none());
    }
}
