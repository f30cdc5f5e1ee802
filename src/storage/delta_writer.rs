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
//! Delta writer: buffers one transaction's rows and stages them as a transaction log.
//!
//! Rows are sorted by key on `finish`. Duplicate-key tablets keep every row, unique and
//! primary-key tablets keep the last row written for a key, and aggregate-key tablets fold
//! rows sharing a key with each column's aggregation.

use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, UInt32Array};
use arrow::compute::{SortColumn, SortOptions, concat_batches, lexsort_to_indices, take};

use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::novacore_logging::debug;
use crate::storage::aggregate_iterator::merge_datum;
use crate::storage::datum::{Datum, build_array, datum_at};
use crate::storage::schema::KeysType;
use crate::storage::segment::Segment;
use crate::storage::tablet::{TabletSharedPtr, TxnLog, TxnLogOp};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterState {
    Created,
    Opened,
    Finished,
    Closed,
}

pub struct DeltaWriter {
    tablet: TabletSharedPtr,
    txn_id: i64,
    state: WriterState,
    batches: Vec<RecordBatch>,
    max_rows_per_segment: usize,
    rows_written: usize,
}

fn arrow_err(ctx: &str) -> impl Fn(arrow::error::ArrowError) -> Status + '_ {
    move |e| Status::internal(format!("{ctx}: {e}"))
}

impl DeltaWriter {
    pub fn new(tablet: TabletSharedPtr, txn_id: i64) -> Self {
        Self {
            tablet,
            txn_id,
            state: WriterState::Created,
            batches: Vec::new(),
            max_rows_per_segment: usize::MAX,
            rows_written: 0,
        }
    }

    /// Splits the sorted output into segments of at most `rows` rows.
    pub fn with_max_rows_per_segment(mut self, rows: usize) -> Self {
        self.max_rows_per_segment = rows.max(1);
        self
    }

    pub fn txn_id(&self) -> i64 {
        self.txn_id
    }

    pub fn open(&mut self) -> Result<()> {
        if self.state != WriterState::Created {
            return Err(Status::internal(format!(
                "delta writer of txn {} opened twice",
                self.txn_id
            )));
        }
        self.state = WriterState::Opened;
        Ok(())
    }

    /// Buffers the rows of `chunk` at `indexes`. The chunk is laid out in tablet column order.
    pub fn write(&mut self, chunk: &Chunk, indexes: &[u32]) -> Result<()> {
        if self.state != WriterState::Opened {
            return Err(Status::internal(format!(
                "delta writer of txn {} is not open",
                self.txn_id
            )));
        }
        let schema = self.tablet.schema();
        if chunk.num_columns() != schema.num_columns() {
            return Err(Status::invalid_argument(format!(
                "chunk has {} columns, tablet {} has {}",
                chunk.num_columns(),
                self.tablet.id(),
                schema.num_columns()
            )));
        }
        if indexes.is_empty() {
            return Ok(());
        }
        if let Some(bad) = indexes.iter().find(|&&i| i as usize >= chunk.len()) {
            return Err(Status::invalid_argument(format!(
                "row index {} out of range for chunk of {} rows",
                bad,
                chunk.len()
            )));
        }
        let indices = UInt32Array::from(indexes.to_vec());
        let columns = chunk
            .columns()
            .iter()
            .map(|c| take(c.as_ref(), &indices, None).map_err(arrow_err("take written rows")))
            .collect::<Result<Vec<ArrayRef>>>()?;
        let batch = RecordBatch::try_new(schema.arrow_schema(), columns)
            .map_err(arrow_err("build written batch"))?;
        self.rows_written += batch.num_rows();
        self.batches.push(batch);
        Ok(())
    }

    /// Sorts the buffered rows and stages the transaction log. Returns the rows staged.
    pub fn finish(&mut self) -> Result<usize> {
        if self.state != WriterState::Opened {
            return Err(Status::internal(format!(
                "delta writer of txn {} cannot finish in state {:?}",
                self.txn_id, self.state
            )));
        }
        self.state = WriterState::Finished;
        let schema = Arc::clone(self.tablet.schema());
        let segments = if self.batches.is_empty() {
            Vec::new()
        } else {
            let merged = concat_batches(&schema.arrow_schema(), &self.batches)
                .map_err(arrow_err("concat written batches"))?;
            self.batches.clear();
            let sorted = self.sort_and_merge(merged)?;
            self.split_segments(sorted)?
        };
        let rows: usize = segments.iter().map(Segment::num_rows).sum();
        debug!(
            "delta writer txn={} tablet={} written={} staged={} segments={}",
            self.txn_id,
            self.tablet.id(),
            self.rows_written,
            rows,
            segments.len()
        );
        self.tablet.put_txn_log(TxnLog {
            txn_id: self.txn_id,
            op: TxnLogOp::Write { segments },
        });
        Ok(rows)
    }

    pub fn close(&mut self) {
        self.batches.clear();
        self.state = WriterState::Closed;
    }

    fn sort_and_merge(&self, batch: RecordBatch) -> Result<RecordBatch> {
        let schema = self.tablet.schema();
        let options = Some(SortOptions {
            descending: false,
            nulls_first: true,
        });
        let mut sort_columns: Vec<SortColumn> = (0..schema.num_key_columns())
            .map(|i| SortColumn {
                values: Arc::clone(batch.column(i)),
                options,
            })
            .collect();
        sort_columns.push(SortColumn {
            values: Arc::new(UInt32Array::from_iter_values(0..batch.num_rows() as u32)),
            options,
        });
        let order = lexsort_to_indices(&sort_columns, None).map_err(arrow_err("sort written rows"))?;
        let sorted = take_batch(&batch, &order)?;
        match schema.keys_type() {
            KeysType::DupKeys => Ok(sorted),
            KeysType::UniqueKeys | KeysType::PrimaryKeys => {
                let mut keep = Vec::with_capacity(sorted.num_rows());
                let mut prev: Option<Vec<Datum>> = None;
                for row in 0..sorted.num_rows() {
                    let key = self.key_at(&sorted, row)?;
                    if prev.as_ref() == Some(&key) {
                        if let Some(last) = keep.last_mut() {
                            *last = row as u32;
                        }
                    } else {
                        keep.push(row as u32);
                    }
                    prev = Some(key);
                }
                take_batch(&sorted, &UInt32Array::from(keep))
            }
            KeysType::AggKeys => self.aggregate_sorted(&sorted),
        }
    }

    fn aggregate_sorted(&self, sorted: &RecordBatch) -> Result<RecordBatch> {
        let schema = self.tablet.schema();
        let nk = schema.num_key_columns();
        let mut groups: Vec<Vec<Datum>> = Vec::new();
        for row in 0..sorted.num_rows() {
            let datums = (0..schema.num_columns())
                .map(|c| datum_at(sorted.column(c).as_ref(), schema.column(c).logical_type, row))
                .collect::<Result<Vec<_>>>()?;
            match groups.last_mut() {
                Some(group) if group[..nk] == datums[..nk] => {
                    for (c, value) in datums.into_iter().enumerate().skip(nk) {
                        merge_datum(&mut group[c], value, schema.column(c).aggregation)?;
                    }
                }
                _ => groups.push(datums),
            }
        }
        let columns = (0..schema.num_columns())
            .map(|c| {
                let values: Vec<Datum> = groups.iter().map(|g| g[c].clone()).collect();
                build_array(schema.column(c).logical_type, &values)
            })
            .collect::<Result<Vec<_>>>()?;
        RecordBatch::try_new(schema.arrow_schema(), columns).map_err(arrow_err("build aggregated batch"))
    }

    fn key_at(&self, batch: &RecordBatch, row: usize) -> Result<Vec<Datum>> {
        let schema = self.tablet.schema();
        (0..schema.num_key_columns())
            .map(|c| datum_at(batch.column(c).as_ref(), schema.column(c).logical_type, row))
            .collect()
    }

    fn split_segments(&self, batch: RecordBatch) -> Result<Vec<Segment>> {
        let schema = self.tablet.schema();
        let mut segments = Vec::new();
        let mut offset = 0;
        while offset < batch.num_rows() {
            let len = self.max_rows_per_segment.min(batch.num_rows() - offset);
            segments.push(Segment::new(
                segments.len() as u32,
                schema,
                batch.slice(offset, len),
            )?);
            offset += len;
        }
        Ok(segments)
    }
}

fn take_batch(batch: &RecordBatch, indices: &UInt32Array) -> Result<RecordBatch> {
    let columns = batch
        .columns()
        .iter()
        .map(|c| take(c.as_ref(), indices, None).map_err(arrow_err("reorder rows")))
        .collect::<Result<Vec<ArrayRef>>>()?;
    RecordBatch::try_new(batch.schema(), columns).map_err(arrow_err("build reordered batch"))
}

impl Drop for DeltaWriter {
    fn drop(&mut self) {
        if self.state != WriterState::Closed {
            self.close();
        }
    }
}
