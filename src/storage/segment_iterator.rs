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
//! Iterator over the selected rows of one segment.
//!
//! Row selection happens once at construction: the row-id ranges, the primary-key delete
//! vector, the key ranges, the pushdown predicates and the delete conjunctions are applied
//! in that order, and each filter's drop count goes into the shared `ReadStatistics`.

use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::take;
use roaring::RoaringBitmap;

use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::runtime::profile::clamp_u128_to_i64;
use crate::storage::chunk_iterator::ChunkIterator;
use crate::storage::column_predicate::ConjunctivePredicates;
use crate::storage::delete_predicates::DeletePredicates;
use crate::storage::read_stats::ReadStatistics;
use crate::storage::schema::{Schema, TabletSchema};
use crate::storage::seek_range::SeekRange;
use crate::storage::segment::Segment;

pub struct SegmentReadFilter<'a> {
    pub ranges: &'a [SeekRange],
    pub predicates: &'a ConjunctivePredicates,
    pub delete_predicates: &'a DeletePredicates,
    pub rowset_version: i64,
    pub row_ranges: Option<&'a [Range<u32>]>,
    pub del_vec: Option<&'a RoaringBitmap>,
}

pub struct SegmentIterator {
    segment: Arc<Segment>,
    schema: Schema,
    column_ids: Vec<usize>,
    selected: Vec<u32>,
    pos: usize,
    chunk_size: usize,
}

impl SegmentIterator {
    pub fn new(
        segment: Arc<Segment>,
        tablet_schema: Arc<TabletSchema>,
        schema: Schema,
        filter: &SegmentReadFilter<'_>,
        chunk_size: usize,
        stats: &ReadStatistics,
    ) -> Result<Self> {
        let start = Instant::now();
        let selected = select_rows(&segment, &tablet_schema, filter, stats)?;
        stats.add_raw_rows_read(segment.num_rows() as i64);
        stats.add_iterator_init_ns(clamp_u128_to_i64(start.elapsed().as_nanos()));
        let column_ids = schema.column_ids();
        Ok(Self {
            segment,
            schema,
            column_ids,
            selected,
            pos: 0,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn num_selected_rows(&self) -> usize {
        self.selected.len()
    }
}

fn select_rows(
    segment: &Segment,
    tablet_schema: &TabletSchema,
    filter: &SegmentReadFilter<'_>,
    stats: &ReadStatistics,
) -> Result<Vec<u32>> {
    let need_rows = !filter.predicates.is_empty()
        || !filter
            .delete_predicates
            .get_predicates(filter.rowset_version)
            .is_empty();
    let mut selected = Vec::with_capacity(segment.num_rows());
    let (mut by_del_vec, mut by_range, mut by_pred, mut by_delete) = (0i64, 0i64, 0i64, 0i64);
    for row in 0..segment.num_rows() as u32 {
        if let Some(ranges) = filter.row_ranges {
            if !ranges.iter().any(|r| r.contains(&row)) {
                continue;
            }
        }
        if filter.del_vec.is_some_and(|d| d.contains(row)) {
            by_del_vec += 1;
            continue;
        }
        if !filter.ranges.is_empty() {
            let key = segment.key_at(tablet_schema, row as usize)?;
            if !filter.ranges.iter().any(|r| r.contains(&key)) {
                by_range += 1;
                continue;
            }
        }
        if need_rows {
            let datums = segment.row_at(tablet_schema, row as usize)?;
            if !filter.predicates.evaluate_row(&datums) {
                by_pred += 1;
                continue;
            }
            if filter
                .delete_predicates
                .is_deleted(&datums, filter.rowset_version)
            {
                by_delete += 1;
                continue;
            }
        }
        selected.push(row);
    }
    stats.add_del_vec_filtered(by_del_vec);
    stats.add_key_range_filtered(by_range);
    stats.add_pred_filtered(by_pred);
    stats.add_del_filtered(by_delete);
    Ok(selected)
}

impl ChunkIterator for SegmentIterator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn get_next(&mut self) -> Result<Option<Chunk>> {
        if self.pos >= self.selected.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk_size).min(self.selected.len());
        let indices = UInt32Array::from(self.selected[self.pos..end].to_vec());
        self.pos = end;
        let columns = self
            .column_ids
            .iter()
            .map(|&id| {
                take(self.segment.column(id).as_ref(), &indices, None)
                    .map_err(|e| Status::internal(format!("take segment column {id}: {e}")))
            })
            .collect::<Result<Vec<ArrayRef>>>()?;
        Ok(Some(Chunk::try_new(self.schema.arrow_schema(), columns)?))
    }

    fn close(&mut self) {
        self.pos = self.selected.len();
    }
}
