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
//! Key-ordered merges over sorted children.
//!
//! Responsibilities:
//! - `HeapMergeIterator` merges children by key; equal keys come out in child order,
//!   so older rowsets precede newer ones.
//! - `MaskMergeIterator` replays a recorded row-source sequence instead of comparing keys,
//!   for the value passes of a vertical merge.
//!
//! Key exported interfaces:
//! - Functions: `new_heap_merge_iterator`, `new_mask_merge_iterator`.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::compute::interleave;

use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::storage::chunk_iterator::{ChunkIterator, ChunkIteratorPtr, next_non_empty};
use crate::storage::datum::{Datum, datum_at};
use crate::storage::row_source_mask::{RowSourceMask, SharedMaskBuffer};
use crate::storage::schema::Schema;

struct ChildCursor {
    iter: ChunkIteratorPtr,
    chunk: Option<Chunk>,
    pos: usize,
    // Index of `chunk` in the current output call's batch list.
    batch_idx: Option<usize>,
    exhausted: bool,
}

impl ChildCursor {
    fn new(iter: ChunkIteratorPtr) -> Self {
        Self {
            iter,
            chunk: None,
            pos: 0,
            batch_idx: None,
            exhausted: false,
        }
    }

    /// Ensures a row is available; returns false once the child is drained.
    fn fill(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if let Some(chunk) = &self.chunk {
            if self.pos < chunk.len() {
                return Ok(true);
            }
        }
        self.chunk = next_non_empty(self.iter.as_mut())?;
        self.pos = 0;
        self.batch_idx = None;
        if self.chunk.is_none() {
            self.exhausted = true;
            self.iter.close();
            return Ok(false);
        }
        Ok(true)
    }

    fn register(&mut self, batches: &mut Vec<RecordBatch>) -> Result<usize> {
        if let Some(idx) = self.batch_idx {
            return Ok(idx);
        }
        let chunk = self
            .chunk
            .as_ref()
            .ok_or_else(|| Status::internal("merge child has no current chunk"))?;
        batches.push(chunk.batch.clone());
        let idx = batches.len() - 1;
        self.batch_idx = Some(idx);
        Ok(idx)
    }

    fn key(&self, schema: &Schema) -> Result<Vec<Datum>> {
        let chunk = self
            .chunk
            .as_ref()
            .ok_or_else(|| Status::internal("merge child has no current chunk"))?;
        (0..schema.num_key_fields())
            .map(|i| datum_at(chunk.column(i).as_ref(), schema.field(i).logical_type, self.pos))
            .collect()
    }
}

fn build_output(
    schema: &Schema,
    batches: &[RecordBatch],
    picks: &[(usize, usize)],
) -> Result<Chunk> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.num_fields());
    for col in 0..schema.num_fields() {
        let arrays: Vec<&dyn Array> = batches.iter().map(|b| b.column(col).as_ref()).collect();
        let merged = interleave(&arrays, picks)
            .map_err(|e| Status::internal(format!("merge column {col}: {e}")))?;
        columns.push(merged);
    }
    Chunk::try_new(schema.arrow_schema(), columns)
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    key: Vec<Datum>,
    child: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.child.cmp(&other.child))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct HeapMergeIterator {
    schema: Schema,
    children: Vec<ChildCursor>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    chunk_size: usize,
    initialized: bool,
}

impl HeapMergeIterator {
    fn init(&mut self) -> Result<()> {
        for idx in 0..self.children.len() {
            if self.children[idx].fill()? {
                let key = self.children[idx].key(&self.schema)?;
                self.heap.push(Reverse(HeapEntry { key, child: idx }));
            }
        }
        self.initialized = true;
        Ok(())
    }

    fn next_chunk(&mut self, mut masks: Option<&mut Vec<RowSourceMask>>) -> Result<Option<Chunk>> {
        if !self.initialized {
            self.init()?;
        }
        let mut batches = Vec::new();
        for child in &mut self.children {
            child.batch_idx = None;
        }
        let mut picks = Vec::with_capacity(self.chunk_size);
        while picks.len() < self.chunk_size {
            let Some(Reverse(top)) = self.heap.pop() else {
                break;
            };
            let child = &mut self.children[top.child];
            let batch = child.register(&mut batches)?;
            picks.push((batch, child.pos));
            child.pos += 1;
            if let Some(masks) = masks.as_deref_mut() {
                masks.push(RowSourceMask::new(top.child as u16, false));
            }
            if child.fill()? {
                let key = child.key(&self.schema)?;
                self.heap.push(Reverse(HeapEntry {
                    key,
                    child: top.child,
                }));
            }
        }
        if picks.is_empty() {
            return Ok(None);
        }
        build_output(&self.schema, &batches, &picks).map(Some)
    }
}

impl ChunkIterator for HeapMergeIterator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn get_next(&mut self) -> Result<Option<Chunk>> {
        self.next_chunk(None)
    }

    fn get_next_with_masks(&mut self, masks: &mut Vec<RowSourceMask>) -> Result<Option<Chunk>> {
        self.next_chunk(Some(masks))
    }

    fn close(&mut self) {
        self.heap.clear();
        for child in &mut self.children {
            if !child.exhausted {
                child.iter.close();
                child.exhausted = true;
            }
        }
    }
}

/// Children must each be sorted by the schema's key fields.
pub fn new_heap_merge_iterator(
    children: Vec<ChunkIteratorPtr>,
    chunk_size: usize,
) -> Result<ChunkIteratorPtr> {
    let first = children
        .first()
        .ok_or_else(|| Status::invalid_argument("heap merge needs at least one child"))?;
    if children.len() > u16::MAX as usize {
        return Err(Status::not_supported(format!(
            "heap merge over {} children",
            children.len()
        )));
    }
    let schema = first.schema().clone();
    Ok(Box::new(HeapMergeIterator {
        schema,
        heap: BinaryHeap::with_capacity(children.len()),
        children: children.into_iter().map(ChildCursor::new).collect(),
        chunk_size: chunk_size.max(1),
        initialized: false,
    }))
}

struct MaskMergeIterator {
    schema: Schema,
    children: Vec<ChildCursor>,
    buffer: SharedMaskBuffer,
    chunk_size: usize,
}

impl MaskMergeIterator {
    fn next_chunk(&mut self, mut masks: Option<&mut Vec<RowSourceMask>>) -> Result<Option<Chunk>> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let mut batches = Vec::new();
        for child in &mut self.children {
            child.batch_idx = None;
        }
        let mut picks = Vec::with_capacity(self.chunk_size);
        while picks.len() < self.chunk_size {
            let Some(mask) = buffer.current() else {
                break;
            };
            let child = self.children.get_mut(mask.source as usize).ok_or_else(|| {
                Status::internal(format!("row source mask names unknown child {}", mask.source))
            })?;
            if !child.fill()? {
                return Err(Status::internal(format!(
                    "row source mask points to exhausted child {}",
                    mask.source
                )));
            }
            let batch = child.register(&mut batches)?;
            picks.push((batch, child.pos));
            child.pos += 1;
            if let Some(masks) = masks.as_deref_mut() {
                masks.push(mask);
            }
            buffer.advance();
        }
        if picks.is_empty() {
            return Ok(None);
        }
        build_output(&self.schema, &batches, &picks).map(Some)
    }
}

impl ChunkIterator for MaskMergeIterator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn get_next(&mut self) -> Result<Option<Chunk>> {
        self.next_chunk(None)
    }

    fn get_next_with_masks(&mut self, masks: &mut Vec<RowSourceMask>) -> Result<Option<Chunk>> {
        self.next_chunk(Some(masks))
    }

    fn close(&mut self) {
        for child in &mut self.children {
            if !child.exhausted {
                child.iter.close();
                child.exhausted = true;
            }
        }
    }
}

/// `buffer` must already be flipped to read mode; its masks name children by index.
pub fn new_mask_merge_iterator(
    children: Vec<ChunkIteratorPtr>,
    buffer: SharedMaskBuffer,
    chunk_size: usize,
) -> Result<ChunkIteratorPtr> {
    let first = children
        .first()
        .ok_or_else(|| Status::invalid_argument("mask merge needs at least one child"))?;
    let schema = first.schema().clone();
    Ok(Box::new(MaskMergeIterator {
        schema,
        children: children.into_iter().map(ChildCursor::new).collect(),
        buffer,
        chunk_size: chunk_size.max(1),
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use arrow::array::{Int32Array, Int64Array};

    use super::*;
    use crate::storage::chunk_iterator::test_util::VecIterator;
    use crate::storage::row_source_mask::RowSourceMaskBuffer;
    use crate::storage::schema::{AggregationType, KeysType, LogicalType, TabletColumn, TabletSchema};

    fn schema() -> Schema {
        let tablet = TabletSchema::new(
            KeysType::DupKeys,
            vec![
                TabletColumn::key("k", LogicalType::Int32),
                TabletColumn::value("v", LogicalType::Int64, AggregationType::None),
            ],
        )
        .unwrap();
        Schema::all(&tablet)
    }

    fn child(schema: &Schema, chunks: &[&[(i32, i64)]]) -> ChunkIteratorPtr {
        let chunks: VecDeque<Chunk> = chunks
            .iter()
            .map(|rows| {
                Chunk::try_new(
                    schema.arrow_schema(),
                    vec![
                        Arc::new(Int32Array::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
                        Arc::new(Int64Array::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
                    ],
                )
                .unwrap()
            })
            .collect();
        Box::new(VecIterator {
            schema: schema.clone(),
            chunks,
        })
    }

    fn drain(it: &mut ChunkIteratorPtr, masks: Option<&mut Vec<RowSourceMask>>) -> Vec<(i32, i64)> {
        let mut out = Vec::new();
        let mut masks = masks;
        loop {
            let next = match masks.as_deref_mut() {
                Some(m) => it.get_next_with_masks(m).unwrap(),
                None => it.get_next().unwrap(),
            };
            let Some(chunk) = next else { break };
            let k = chunk.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
            let v = chunk.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
            for i in 0..chunk.len() {
                out.push((k.value(i), v.value(i)));
            }
        }
        out
    }

    #[test]
    fn heap_merge_orders_and_breaks_ties_by_child() {
        let s = schema();
        let mut it = new_heap_merge_iterator(
            vec![
                child(&s, &[&[(1, 10), (3, 30)], &[(5, 50)]]),
                child(&s, &[&[(1, 11), (2, 21)]]),
            ],
            2,
        )
        .unwrap();
        let mut masks = Vec::new();
        let rows = drain(&mut it, Some(&mut masks));
        assert_eq!(rows, vec![(1, 10), (1, 11), (2, 21), (3, 30), (5, 50)]);
        let sources: Vec<u16> = masks.iter().map(|m| m.source).collect();
        assert_eq!(sources, vec![0, 1, 1, 0, 0]);
    }

    #[test]
    fn mask_merge_replays_sources() {
        let s = schema();
        let buffer = RowSourceMaskBuffer::shared();
        {
            let mut b = buffer.lock().unwrap();
            b.write(&[
                RowSourceMask::new(1, true),
                RowSourceMask::new(0, true),
                RowSourceMask::new(1, false),
            ])
            .unwrap();
            b.flip_to_read();
        }
        let mut it = new_mask_merge_iterator(
            vec![child(&s, &[&[(7, 70)]]), child(&s, &[&[(8, 80)], &[(9, 90)]])],
            Arc::clone(&buffer),
            16,
        )
        .unwrap();
        assert_eq!(drain(&mut it, None), vec![(8, 80), (7, 70), (9, 90)]);
    }

    #[test]
    fn mask_pointing_past_child_end_fails() {
        let s = schema();
        let buffer = RowSourceMaskBuffer::shared();
        {
            let mut b = buffer.lock().unwrap();
            b.write(&[RowSourceMask::new(0, true), RowSourceMask::new(0, true)])
                .unwrap();
            b.flip_to_read();
        }
        let mut it = new_mask_merge_iterator(vec![child(&s, &[&[(1, 1)]])], buffer, 16).unwrap();
        assert!(matches!(it.get_next(), Err(Status::InternalError(_))));
    }
}
