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
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::buffer::Buffer;
use arrow::datatypes::{Schema, SchemaRef};

use crate::common::status::{Result, Status};
use crate::runtime::mem_tracker::MemTracker;

/// Lane bookkeeping carried by chunks flowing through query-cache pipelines.
///
/// `owner_id` names the lane (usually a tablet id); `is_last_chunk` marks the end
/// of that lane's stream even when the chunk itself has no rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkOwnerInfo {
    pub owner_id: i64,
    pub is_last_chunk: bool,
}

/// A batch of rows stored column-wise, backed by an Arrow `RecordBatch`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
    owner_info: ChunkOwnerInfo,
    accounting: Option<Arc<ChunkAccounting>>,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            batch,
            owner_info: ChunkOwnerInfo::default(),
            accounting: None,
        }
    }

    pub fn empty(schema: SchemaRef) -> Self {
        Self::new(RecordBatch::new_empty(schema))
    }

    pub fn try_new(schema: SchemaRef, columns: Vec<ArrayRef>) -> Result<Self> {
        RecordBatch::try_new(schema, columns)
            .map(Self::new)
            .map_err(|e| Status::internal(format!("build chunk: {e}")))
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn column(&self, idx: usize) -> &ArrayRef {
        self.batch.column(idx)
    }

    pub fn owner_info(&self) -> ChunkOwnerInfo {
        self.owner_info
    }

    pub fn owner_info_mut(&mut self) -> &mut ChunkOwnerInfo {
        &mut self.owner_info
    }

    pub fn with_owner_info(mut self, owner_info: ChunkOwnerInfo) -> Self {
        self.owner_info = owner_info;
        self
    }

    pub fn slice(&self, offset: usize, length: usize) -> Self {
        let mut out = Self {
            batch: self.batch.slice(offset, length),
            owner_info: self.owner_info,
            accounting: None,
        };
        if let Some(accounting) = self.accounting.as_ref() {
            let tracker = accounting.tracker();
            out.transfer_to(&tracker);
        }
        out
    }

    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }

    /// Charges this chunk's bytes to `tracker`, moving them off the previous holder.
    pub fn transfer_to(&mut self, tracker: &Arc<MemTracker>) {
        if let Some(accounting) = self.accounting.as_ref() {
            accounting.transfer_to(tracker);
            return;
        }
        let bytes = i64::try_from(record_batch_bytes(&self.batch)).unwrap_or(i64::MAX);
        if bytes <= 0 {
            return;
        }
        self.accounting = Some(Arc::new(ChunkAccounting::new(bytes, tracker)));
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::empty(Arc::new(Schema::empty()))
    }
}

/// Estimate RecordBatch size by summing unique buffers inside the batch.
///
/// Buffers are de-duplicated only within one batch, so slices sharing buffers
/// across batches are counted twice.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}

#[derive(Debug)]
struct ChunkAccounting {
    bytes: i64,
    tracker: Mutex<Arc<MemTracker>>,
}

impl ChunkAccounting {
    fn new(bytes: i64, tracker: &Arc<MemTracker>) -> Self {
        tracker.consume(bytes);
        Self {
            bytes,
            tracker: Mutex::new(Arc::clone(tracker)),
        }
    }

    fn transfer_to(&self, tracker: &Arc<MemTracker>) {
        let mut guard = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::ptr_eq(&guard, tracker) {
            return;
        }
        guard.release(self.bytes);
        tracker.consume(self.bytes);
        *guard = Arc::clone(tracker);
    }

    fn tracker(&self) -> Arc<MemTracker> {
        let guard = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }
}

impl Drop for ChunkAccounting {
    fn drop(&mut self) {
        let guard = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        guard.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field};

    fn int_chunk(values: Vec<i32>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("c0", DataType::Int32, false)]));
        Chunk::try_new(schema, vec![Arc::new(Int32Array::from(values))]).expect("chunk")
    }

    #[test]
    fn accounting_moves_between_trackers_and_releases_on_drop() {
        let a = MemTracker::new_root("a");
        let b = MemTracker::new_root("b");
        let mut chunk = int_chunk(vec![1, 2, 3, 4]);
        chunk.transfer_to(&a);
        let bytes = a.current();
        assert!(bytes > 0);
        chunk.transfer_to(&b);
        assert_eq!(a.current(), 0);
        assert_eq!(b.current(), bytes);
        drop(chunk);
        assert_eq!(b.current(), 0);
    }

    #[test]
    fn empty_last_chunk_keeps_owner_info() {
        let chunk = int_chunk(vec![]).with_owner_info(ChunkOwnerInfo {
            owner_id: 7,
            is_last_chunk: true,
        });
        assert!(chunk.is_empty());
        assert!(chunk.slice(0, 0).owner_info().is_last_chunk);
        assert_eq!(chunk.owner_info().owner_id, 7);
    }
}
