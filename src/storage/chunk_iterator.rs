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
//! Pull-based chunk iterators composing a tablet read.
//!
//! Responsibilities:
//! - Defines the `ChunkIterator` contract shared by segment, merge and aggregate iterators.
//! - Provides the empty, union and timed compositions.
//!
//! Key exported interfaces:
//! - Types: `ChunkIterator`, `ChunkIteratorPtr`.
//! - Functions: `new_empty_iterator`, `new_union_iterator`, `timed_chunk_iterator`.

use std::time::Instant;

use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::runtime::profile::{CounterRef, clamp_u128_to_i64};
use crate::storage::row_source_mask::RowSourceMask;
use crate::storage::schema::Schema;

pub trait ChunkIterator: Send {
    fn schema(&self) -> &Schema;

    /// Returns `None` once the stream is exhausted.
    fn get_next(&mut self) -> Result<Option<Chunk>>;

    /// Like `get_next`, also appending one mask per returned (or consumed) row.
    fn get_next_with_masks(&mut self, _masks: &mut Vec<RowSourceMask>) -> Result<Option<Chunk>> {
        Err(Status::not_supported(
            "get_next with row source masks is not supported by this iterator",
        ))
    }

    fn close(&mut self) {}
}

pub type ChunkIteratorPtr = Box<dyn ChunkIterator>;

pub(crate) fn next_non_empty(iter: &mut dyn ChunkIterator) -> Result<Option<Chunk>> {
    loop {
        match iter.get_next()? {
            Some(chunk) if chunk.is_empty() => continue,
            other => return Ok(other),
        }
    }
}

struct EmptyIterator {
    schema: Schema,
}

impl ChunkIterator for EmptyIterator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn get_next(&mut self) -> Result<Option<Chunk>> {
        Ok(None)
    }

    fn get_next_with_masks(&mut self, _masks: &mut Vec<RowSourceMask>) -> Result<Option<Chunk>> {
        Ok(None)
    }
}

pub fn new_empty_iterator(schema: Schema) -> ChunkIteratorPtr {
    Box::new(EmptyIterator { schema })
}

/// Concatenates children in order; no ordering across children.
struct UnionIterator {
    schema: Schema,
    children: Vec<ChunkIteratorPtr>,
    current: usize,
}

impl ChunkIterator for UnionIterator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn get_next(&mut self) -> Result<Option<Chunk>> {
        while self.current < self.children.len() {
            match self.children[self.current].get_next()? {
                Some(chunk) => return Ok(Some(chunk)),
                None => {
                    self.children[self.current].close();
                    self.current += 1;
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        for child in self.children.iter_mut().skip(self.current) {
            child.close();
        }
        self.current = self.children.len();
    }
}

pub fn new_union_iterator(mut children: Vec<ChunkIteratorPtr>) -> Result<ChunkIteratorPtr> {
    if children.is_empty() {
        return Err(Status::invalid_argument("union iterator needs at least one child"));
    }
    if children.len() == 1 {
        return Ok(children.remove(0));
    }
    let schema = children[0].schema().clone();
    Ok(Box::new(UnionIterator {
        schema,
        children,
        current: 0,
    }))
}

struct TimedIterator {
    inner: ChunkIteratorPtr,
    counter: CounterRef,
}

impl TimedIterator {
    fn timed<T>(&mut self, f: impl FnOnce(&mut ChunkIteratorPtr) -> T) -> T {
        let start = Instant::now();
        let out = f(&mut self.inner);
        self.counter
            .add(clamp_u128_to_i64(start.elapsed().as_nanos()));
        out
    }
}

impl ChunkIterator for TimedIterator {
    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn get_next(&mut self) -> Result<Option<Chunk>> {
        self.timed(|inner| inner.get_next())
    }

    fn get_next_with_masks(&mut self, masks: &mut Vec<RowSourceMask>) -> Result<Option<Chunk>> {
        self.timed(|inner| inner.get_next_with_masks(masks))
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// Adds the time spent in `inner` to `counter`.
pub fn timed_chunk_iterator(inner: ChunkIteratorPtr, counter: CounterRef) -> ChunkIteratorPtr {
    Box::new(TimedIterator { inner, counter })
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::collections::VecDeque;

    use super::*;

    /// Replays fixed chunks.
    pub(crate) struct VecIterator {
        pub schema: Schema,
        pub chunks: VecDeque<Chunk>,
    }

    impl ChunkIterator for VecIterator {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn get_next(&mut self) -> Result<Option<Chunk>> {
            Ok(self.chunks.pop_front())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Array, Int32Array};

    use super::test_util::VecIterator;
    use super::*;
    use crate::runtime::profile::{Counter, TUnit};
    use crate::storage::schema::{KeysType, LogicalType, TabletColumn, TabletSchema};

    fn iter_of(schema: &Schema, values: &[&[i32]]) -> ChunkIteratorPtr {
        let chunks = values
            .iter()
            .map(|v| {
                Chunk::try_new(
                    schema.arrow_schema(),
                    vec![Arc::new(Int32Array::from(v.to_vec()))],
                )
                .unwrap()
            })
            .collect();
        Box::new(VecIterator {
            schema: schema.clone(),
            chunks,
        })
    }

    fn schema() -> Schema {
        let tablet = TabletSchema::new(
            KeysType::DupKeys,
            vec![TabletColumn::key("k", LogicalType::Int32)],
        )
        .unwrap();
        Schema::all(&tablet)
    }

    #[test]
    fn union_concatenates_in_child_order() {
        let s = schema();
        let it = new_union_iterator(vec![
            iter_of(&s, &[&[1, 2]]),
            iter_of(&s, &[]),
            iter_of(&s, &[&[3], &[4]]),
        ])
        .unwrap();
        let counter = Arc::new(Counter::new("t", TUnit::TimeNs));
        let mut it = timed_chunk_iterator(it, counter);
        let mut seen = Vec::new();
        while let Some(chunk) = it.get_next().unwrap() {
            let col = chunk.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
            seen.extend(col.values().iter().copied());
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert!(new_empty_iterator(s).get_next().unwrap().is_none());
    }
}
