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
//! Collapses rows that share a key, combining value columns per their aggregation type.
//!
//! Responsibilities:
//! - Full aggregation over a key-ordered input; groups may span chunks.
//! - Adaptive pre-aggregation of adjacent rows inside each chunk, switched off once it
//!   stops paying for itself.
//! - Vertical key pass: aggregates keys and flags the first row of each group in the masks.
//! - Vertical value pass: groups rows by the flags recorded during the key pass.
//!
//! Key exported interfaces:
//! - Types: `AggregateMode`.
//! - Functions: `new_aggregate_iterator`, `new_vertical_aggregate_iterator`, `merge_datum`.

use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::storage::chunk_iterator::{ChunkIterator, ChunkIteratorPtr};
use crate::storage::datum::{Datum, build_array, datum_at};
use crate::storage::row_source_mask::RowSourceMask;
use crate::storage::schema::{AggregationType, Schema};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateMode {
    Full,
    /// Percentage of merged rows below which pre-aggregation is abandoned.
    PreAgg { factor: u32 },
    VerticalKey,
    VerticalValue,
}

/// Folds `incoming` into `acc` for one value column.
pub fn merge_datum(acc: &mut Datum, incoming: Datum, aggregation: AggregationType) -> Result<()> {
    match aggregation {
        AggregationType::Sum => merge_sum(acc, incoming),
        AggregationType::Min => {
            if !incoming.is_null() && (acc.is_null() || incoming < *acc) {
                *acc = incoming;
            }
            Ok(())
        }
        AggregationType::Max => {
            if !incoming.is_null() && (acc.is_null() || incoming > *acc) {
                *acc = incoming;
            }
            Ok(())
        }
        AggregationType::ReplaceIfNotNull => {
            if !incoming.is_null() {
                *acc = incoming;
            }
            Ok(())
        }
        AggregationType::Replace | AggregationType::None => {
            *acc = incoming;
            Ok(())
        }
    }
}

fn merge_sum(acc: &mut Datum, incoming: Datum) -> Result<()> {
    if incoming.is_null() {
        return Ok(());
    }
    if acc.is_null() {
        *acc = incoming;
        return Ok(());
    }
    let overflow = || Status::internal("SUM aggregation overflow");
    let merged = match (&*acc, &incoming) {
        (Datum::Int32(a), Datum::Int32(b)) => Datum::Int32(a.checked_add(*b).ok_or_else(overflow)?),
        (Datum::Int64(a), Datum::Int64(b)) => Datum::Int64(a.checked_add(*b).ok_or_else(overflow)?),
        (Datum::Float64(a), Datum::Float64(b)) => Datum::Float64(a + b),
        (a, b) => {
            return Err(Status::internal(format!(
                "SUM is not defined for {:?} and {:?}",
                a, b
            )));
        }
    };
    *acc = merged;
    Ok(())
}

struct AggregateIterator {
    child: ChunkIteratorPtr,
    schema: Schema,
    mode: AggregateMode,
    chunk_size: usize,
    pending: Option<Vec<Datum>>,
    output: Vec<Vec<Datum>>,
    child_eof: bool,
    source_rows: u64,
    merged_rows: u64,
    pre_agg_disabled: bool,
}

impl AggregateIterator {
    fn new(child: ChunkIteratorPtr, mode: AggregateMode, chunk_size: usize) -> Self {
        let schema = child.schema().clone();
        Self {
            child,
            schema,
            mode,
            chunk_size: chunk_size.max(1),
            pending: None,
            output: Vec::new(),
            child_eof: false,
            source_rows: 0,
            merged_rows: 0,
            pre_agg_disabled: false,
        }
    }

    fn row_at(&self, chunk: &Chunk, row: usize) -> Result<Vec<Datum>> {
        self.schema
            .fields()
            .iter()
            .enumerate()
            .map(|(i, f)| datum_at(chunk.column(i).as_ref(), f.logical_type, row))
            .collect()
    }

    fn same_key(&self, a: &[Datum], b: &[Datum]) -> bool {
        let n = self.schema.num_key_fields();
        a[..n] == b[..n]
    }

    fn merge_row(&self, group: &mut [Datum], row: Vec<Datum>) -> Result<()> {
        let n = self.schema.num_key_fields();
        for (i, value) in row.into_iter().enumerate().skip(n) {
            merge_datum(&mut group[i], value, self.schema.field(i).aggregation)?;
        }
        Ok(())
    }

    fn build_chunk(&self, rows: Vec<Vec<Datum>>) -> Result<Chunk> {
        let mut columns = Vec::with_capacity(self.schema.num_fields());
        for (i, field) in self.schema.fields().iter().enumerate() {
            let values: Vec<Datum> = rows.iter().map(|r| r[i].clone()).collect();
            columns.push(build_array(field.logical_type, &values)?);
        }
        Chunk::try_new(self.schema.arrow_schema(), columns)
    }

    fn take_output(&mut self) -> Result<Option<Chunk>> {
        if self.output.is_empty() {
            return Ok(None);
        }
        let rows = std::mem::take(&mut self.output);
        self.build_chunk(rows).map(Some)
    }

    /// Groups are cut where the key changes, or at the flags for the value pass. When the
    /// key pass is running, `masks` holds one entry per child row and gets its flags set.
    fn consume_chunk(&mut self, chunk: &Chunk, masks: Option<&mut [RowSourceMask]>) -> Result<()> {
        let mut masks = masks;
        for row in 0..chunk.len() {
            let datums = self.row_at(chunk, row)?;
            let starts_group = match (&self.pending, self.mode) {
                (None, _) => true,
                (Some(_), AggregateMode::VerticalValue) => masks
                    .as_deref()
                    .and_then(|m| m.get(row))
                    .map(|m| m.agg_flag)
                    .ok_or_else(|| Status::internal("missing row source mask for value pass"))?,
                (Some(group), _) => !self.same_key(group, &datums),
            };
            if self.mode == AggregateMode::VerticalKey {
                if let Some(mask) = masks.as_deref_mut().and_then(|m| m.get_mut(row)) {
                    mask.agg_flag = starts_group;
                }
            }
            if starts_group {
                if let Some(done) = self.pending.replace(datums) {
                    self.output.push(done);
                }
            } else if let Some(mut group) = self.pending.take() {
                self.merge_row(&mut group, datums)?;
                self.pending = Some(group);
            }
        }
        Ok(())
    }

    fn next_grouped(&mut self, mut masks: Option<&mut Vec<RowSourceMask>>) -> Result<Option<Chunk>> {
        while !self.child_eof && self.output.len() < self.chunk_size {
            let start = masks.as_deref().map_or(0, Vec::len);
            let next = match masks.as_deref_mut() {
                Some(m) => self.child.get_next_with_masks(m)?,
                None => self.child.get_next()?,
            };
            match next {
                Some(chunk) => {
                    let row_masks = masks.as_deref_mut().map(|m| &mut m[start..]);
                    if let Some(m) = &row_masks {
                        if m.len() != chunk.len() {
                            return Err(Status::internal(format!(
                                "got {} row source masks for {} rows",
                                m.len(),
                                chunk.len()
                            )));
                        }
                    }
                    self.consume_chunk(&chunk, row_masks)?;
                }
                None => {
                    self.child_eof = true;
                    if let Some(done) = self.pending.take() {
                        self.output.push(done);
                    }
                }
            }
        }
        self.take_output()
    }

    fn next_pre_aggregated(&mut self, factor: u32) -> Result<Option<Chunk>> {
        loop {
            let Some(chunk) = self.child.get_next()? else {
                return Ok(None);
            };
            if self.pre_agg_disabled || chunk.is_empty() {
                return Ok(Some(chunk));
            }
            self.consume_chunk(&chunk, None)?;
            if let Some(done) = self.pending.take() {
                self.output.push(done);
            }
            let produced = self.output.len() as u64;
            let source = chunk.len() as u64;
            self.source_rows += source;
            self.merged_rows += source - produced;
            if self.source_rows >= self.chunk_size as u64
                && self.merged_rows * 100 < u64::from(factor) * self.source_rows
            {
                self.pre_agg_disabled = true;
            }
            if let Some(out) = self.take_output()? {
                return Ok(Some(out));
            }
        }
    }
}

impl ChunkIterator for AggregateIterator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn get_next(&mut self) -> Result<Option<Chunk>> {
        match self.mode {
            AggregateMode::Full => self.next_grouped(None),
            AggregateMode::PreAgg { factor } => self.next_pre_aggregated(factor),
            AggregateMode::VerticalKey | AggregateMode::VerticalValue => {
                let mut masks = Vec::new();
                self.next_grouped(Some(&mut masks))
            }
        }
    }

    fn get_next_with_masks(&mut self, masks: &mut Vec<RowSourceMask>) -> Result<Option<Chunk>> {
        match self.mode {
            AggregateMode::VerticalKey | AggregateMode::VerticalValue => {
                self.next_grouped(Some(masks))
            }
            _ => Err(Status::not_supported(
                "row source masks require a vertical aggregate iterator",
            )),
        }
    }

    fn close(&mut self) {
        self.child.close();
        self.child_eof = true;
        self.pending = None;
        self.output.clear();
    }
}

/// `factor == 0` aggregates fully over a key-ordered input; any other factor
/// pre-aggregates adjacent rows within each chunk.
pub fn new_aggregate_iterator(
    child: ChunkIteratorPtr,
    factor: u32,
    chunk_size: usize,
) -> ChunkIteratorPtr {
    let mode = if factor == 0 {
        AggregateMode::Full
    } else {
        AggregateMode::PreAgg { factor }
    };
    Box::new(AggregateIterator::new(child, mode, chunk_size))
}

pub fn new_vertical_aggregate_iterator(
    child: ChunkIteratorPtr,
    is_key: bool,
    chunk_size: usize,
) -> ChunkIteratorPtr {
    let mode = if is_key {
        AggregateMode::VerticalKey
    } else {
        AggregateMode::VerticalValue
    };
    Box::new(AggregateIterator::new(child, mode, chunk_size))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use arrow::array::{Array, Int32Array, Int64Array};

    use super::*;
    use crate::storage::chunk_iterator::test_util::VecIterator;
    use crate::storage::schema::{KeysType, LogicalType, TabletColumn, TabletSchema};

    fn schema(agg: AggregationType) -> Schema {
        let tablet = TabletSchema::new(
            KeysType::AggKeys,
            vec![
                TabletColumn::key("k", LogicalType::Int32),
                TabletColumn::value("v", LogicalType::Int64, agg),
            ],
        )
        .unwrap();
        Schema::all(&tablet)
    }

    fn source(schema: &Schema, chunks: &[&[(i32, Option<i64>)]]) -> ChunkIteratorPtr {
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

    fn collect(it: &mut ChunkIteratorPtr) -> Vec<(i32, Option<i64>)> {
        let mut out = Vec::new();
        while let Some(chunk) = it.get_next().unwrap() {
            let k = chunk.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
            let v = chunk.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
            for i in 0..chunk.len() {
                out.push((k.value(i), (!v.is_null(i)).then(|| v.value(i))));
            }
        }
        out
    }

    #[test]
    fn full_aggregation_spans_chunks() {
        let s = schema(AggregationType::Sum);
        let mut it = new_aggregate_iterator(
            source(&s, &[&[(1, Some(1)), (2, Some(2))], &[(2, Some(3)), (2, None), (3, Some(4))]]),
            0,
            1024,
        );
        assert_eq!(collect(&mut it), vec![(1, Some(1)), (2, Some(5)), (3, Some(4))]);
    }

    #[test]
    fn replace_if_not_null_keeps_last_non_null() {
        let s = schema(AggregationType::ReplaceIfNotNull);
        let mut it = new_aggregate_iterator(
            source(&s, &[&[(1, Some(1)), (1, None)], &[(1, Some(7)), (1, None)]]),
            0,
            1024,
        );
        assert_eq!(collect(&mut it), vec![(1, Some(7))]);
    }

    #[test]
    fn sum_overflow_is_an_error() {
        let s = schema(AggregationType::Sum);
        let mut it = new_aggregate_iterator(
            source(&s, &[&[(1, Some(i64::MAX)), (1, Some(1))]]),
            0,
            1024,
        );
        assert!(it.get_next().is_err());
    }

    #[test]
    fn pre_aggregation_turns_off_when_nothing_merges() {
        let s = schema(AggregationType::Sum);
        let mut it = new_aggregate_iterator(
            source(
                &s,
                &[
                    &[(1, Some(1)), (2, Some(1))],
                    &[(3, Some(1)), (3, Some(1))],
                ],
            ),
            50,
            2,
        );
        // First chunk merges nothing and reaches the batch size, so the second passes through.
        assert_eq!(
            collect(&mut it),
            vec![(1, Some(1)), (2, Some(1)), (3, Some(1)), (3, Some(1))]
        );
    }

    #[test]
    fn vertical_key_pass_flags_group_starts() {
        let keys = Schema::keys(
            &TabletSchema::new(
                KeysType::AggKeys,
                vec![
                    TabletColumn::key("k", LogicalType::Int32),
                    TabletColumn::value("v", LogicalType::Int64, AggregationType::Sum),
                ],
            )
            .unwrap(),
        );
        let key_chunks: VecDeque<Chunk> = [vec![1, 1, 2]]
            .iter()
            .map(|v| {
                Chunk::try_new(keys.arrow_schema(), vec![Arc::new(Int32Array::from(v.clone()))])
                    .unwrap()
            })
            .collect();
        struct MaskedSource(VecIterator);
        impl ChunkIterator for MaskedSource {
            fn schema(&self) -> &Schema {
                self.0.schema()
            }
            fn get_next(&mut self) -> Result<Option<Chunk>> {
                self.0.get_next()
            }
            fn get_next_with_masks(
                &mut self,
                masks: &mut Vec<RowSourceMask>,
            ) -> Result<Option<Chunk>> {
                let next = self.0.get_next()?;
                if let Some(chunk) = &next {
                    masks.extend((0..chunk.len()).map(|_| RowSourceMask::new(0, false)));
                }
                Ok(next)
            }
        }
        let mut it = new_vertical_aggregate_iterator(
            Box::new(MaskedSource(VecIterator {
                schema: keys,
                chunks: key_chunks,
            })),
            true,
            1024,
        );
        let mut masks = Vec::new();
        let chunk = it.get_next_with_masks(&mut masks).unwrap().unwrap();
        assert_eq!(chunk.len(), 2);
        let flags: Vec<bool> = masks.iter().map(|m| m.agg_flag).collect();
        assert_eq!(flags, vec![true, false, true]);
    }
}
