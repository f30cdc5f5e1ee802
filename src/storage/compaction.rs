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
//! Compaction of every rowset visible at one version into a single rowset.
//!
//! Responsibilities:
//! - Horizontal compaction reads all columns through one merging tablet reader.
//! - Vertical compaction reads the key columns once, recording row-source masks, then
//!   reads value columns in groups that replay those masks.
//! - Stages the result as a compaction transaction log for `publish_version`.
//!
//! Key exported interfaces:
//! - Types: `CompactionTask`, `CompactionAlgorithm`, `CompactionStats`.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::compute::concat;

use crate::common::config;
use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::novacore_logging::info;
use crate::storage::chunk_iterator::ChunkIterator;
use crate::storage::row_source_mask::{RowSourceMaskBuffer, SharedMaskBuffer};
use crate::storage::rowset::RowsetSharedPtr;
use crate::storage::schema::{KeysType, Schema, TabletSchema};
use crate::storage::segment::Segment;
use crate::storage::tablet::{TabletSharedPtr, TxnLog, TxnLogOp};
use crate::storage::tablet_reader::TabletReader;
use crate::storage::tablet_reader_params::{ReaderType, TabletReaderParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionAlgorithm {
    Horizontal,
    Vertical,
}

impl CompactionAlgorithm {
    /// Primary-key tablets always compact horizontally.
    pub fn choose(schema: &TabletSchema, max_columns_per_group: usize) -> Self {
        let num_values = schema.num_columns() - schema.num_key_columns();
        if schema.keys_type() != KeysType::PrimaryKeys
            && num_values > 0
            && schema.num_columns() > max_columns_per_group
        {
            CompactionAlgorithm::Vertical
        } else {
            CompactionAlgorithm::Horizontal
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub input_rowsets: usize,
    pub input_rows: usize,
    pub output_rows: usize,
    pub column_groups: usize,
}

pub struct CompactionTask {
    tablet: TabletSharedPtr,
    version: i64,
    txn_id: i64,
    input_rowsets: Vec<RowsetSharedPtr>,
    algorithm: CompactionAlgorithm,
    max_columns_per_group: usize,
    chunk_size: usize,
}

fn concat_columns(chunks: &[Chunk], num_columns: usize) -> Result<Vec<ArrayRef>> {
    (0..num_columns)
        .map(|c| {
            let arrays: Vec<&dyn Array> = chunks.iter().map(|ch| ch.column(c).as_ref()).collect();
            concat(&arrays).map_err(|e| Status::internal(format!("concat compacted column: {e}")))
        })
        .collect()
}

impl CompactionTask {
    pub fn new(tablet: TabletSharedPtr, version: i64, txn_id: i64) -> Result<Self> {
        let input_rowsets = tablet.capture_consistent_rowsets(version)?;
        if input_rowsets.is_empty() {
            return Err(Status::invalid_argument(format!(
                "tablet {} has no rowset to compact at version {}",
                tablet.id(),
                version
            )));
        }
        let max_columns_per_group = config::vertical_compaction_max_columns_per_group();
        let algorithm = CompactionAlgorithm::choose(tablet.schema(), max_columns_per_group);
        Ok(Self {
            tablet,
            version,
            txn_id,
            input_rowsets,
            algorithm,
            max_columns_per_group,
            chunk_size: config::storage_chunk_size(),
        })
    }

    /// Vertical is ignored for primary-key tablets.
    pub fn with_algorithm(mut self, algorithm: CompactionAlgorithm) -> Self {
        if self.tablet.keys_type() != KeysType::PrimaryKeys {
            self.algorithm = algorithm;
        }
        self
    }

    pub fn with_max_columns_per_group(mut self, n: usize) -> Self {
        self.max_columns_per_group = n.max(1);
        self
    }

    pub fn algorithm(&self) -> CompactionAlgorithm {
        self.algorithm
    }

    pub fn input_rowsets(&self) -> &[RowsetSharedPtr] {
        &self.input_rowsets
    }

    fn reader_type(&self) -> ReaderType {
        if self.tablet.keys_type() == KeysType::PrimaryKeys {
            ReaderType::UpdateCompaction
        } else {
            ReaderType::BaseCompaction
        }
    }

    fn read_params(&self) -> TabletReaderParams {
        TabletReaderParams {
            reader_type: self.reader_type(),
            sorted_by_keys_per_tablet: self.tablet.keys_type() == KeysType::PrimaryKeys,
            chunk_size: self.chunk_size,
            use_page_cache: false,
            ..TabletReaderParams::default()
        }
    }

    pub fn execute(&mut self) -> Result<CompactionStats> {
        let schema = Arc::clone(self.tablet.schema());
        let input_rows = self.input_rowsets.iter().map(|r| r.num_rows()).sum();
        let (columns, column_groups) = match self.algorithm {
            CompactionAlgorithm::Horizontal => (self.horizontal()?, 1),
            CompactionAlgorithm::Vertical => self.vertical()?,
        };
        let batch = RecordBatch::try_new(schema.arrow_schema(), columns)
            .map_err(|e| Status::internal(format!("build compacted batch: {e}")))?;
        let output_rows = batch.num_rows();
        let segments = if output_rows == 0 {
            Vec::new()
        } else {
            vec![Segment::new(0, &schema, batch)?]
        };
        self.tablet.put_txn_log(TxnLog {
            txn_id: self.txn_id,
            op: TxnLogOp::Compaction {
                input_rowset_ids: self.input_rowsets.iter().map(|r| r.id()).collect(),
                segments,
                base_version: self.version,
            },
        });
        let stats = CompactionStats {
            input_rowsets: self.input_rowsets.len(),
            input_rows,
            output_rows,
            column_groups,
        };
        info!(
            "compaction tablet={} version={} txn={} algorithm={:?} inputs={} rows {} -> {}",
            self.tablet.id(),
            self.version,
            self.txn_id,
            self.algorithm,
            stats.input_rowsets,
            stats.input_rows,
            stats.output_rows
        );
        Ok(stats)
    }

    fn drain(reader: &mut TabletReader) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.get_next()? {
            if !chunk.is_empty() {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    fn empty_columns(schema: &Schema) -> Vec<ArrayRef> {
        schema
            .fields()
            .iter()
            .map(|f| arrow::array::new_empty_array(&f.logical_type.to_arrow()))
            .collect()
    }

    fn pass_columns(schema: &Schema, chunks: &[Chunk]) -> Result<Vec<ArrayRef>> {
        if chunks.is_empty() {
            return Ok(Self::empty_columns(schema));
        }
        concat_columns(chunks, schema.num_fields())
    }

    fn horizontal(&self) -> Result<Vec<ArrayRef>> {
        let schema = Schema::all(self.tablet.schema());
        let mut reader = TabletReader::with_rowsets(
            Arc::clone(&self.tablet),
            self.version,
            schema.clone(),
            Some(self.input_rowsets.clone()),
        );
        reader.prepare()?;
        reader.open(&self.read_params())?;
        let chunks = Self::drain(&mut reader)?;
        reader.close();
        Self::pass_columns(&schema, &chunks)
    }

    fn vertical(&self) -> Result<(Vec<ArrayRef>, usize)> {
        let tablet_schema = self.tablet.schema();
        let buffer: SharedMaskBuffer = RowSourceMaskBuffer::shared();
        let params = self.read_params();

        let key_schema = Schema::keys(tablet_schema);
        let mut reader = TabletReader::new_vertical(
            Arc::clone(&self.tablet),
            self.version,
            key_schema.clone(),
            Some(self.input_rowsets.clone()),
            true,
            Arc::clone(&buffer),
        );
        reader.prepare()?;
        reader.open(&params)?;
        let mut key_chunks = Vec::new();
        let mut masks = Vec::new();
        while let Some(chunk) = reader.get_next_with_masks(&mut masks)? {
            buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .write(&masks)?;
            masks.clear();
            if !chunk.is_empty() {
                key_chunks.push(chunk);
            }
        }
        if !masks.is_empty() {
            buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .write(&masks)?;
        }
        reader.close();
        buffer.lock().unwrap_or_else(|e| e.into_inner()).flip_to_read();

        let mut columns = Self::pass_columns(&key_schema, &key_chunks)?;
        let num_rows = columns.first().map_or(0, |c| c.len());
        let value_ids: Vec<usize> = (tablet_schema.num_key_columns()..tablet_schema.num_columns()).collect();
        let mut groups = 0;
        for group in value_ids.chunks(self.max_columns_per_group) {
            let value_schema = Schema::values(tablet_schema, group)?;
            let mut reader = TabletReader::new_vertical(
                Arc::clone(&self.tablet),
                self.version,
                value_schema.clone(),
                Some(self.input_rowsets.clone()),
                false,
                Arc::clone(&buffer),
            );
            reader.prepare()?;
            reader.open(&params)?;
            let chunks = Self::drain(&mut reader)?;
            reader.close();
            buffer.lock().unwrap_or_else(|e| e.into_inner()).flip_to_read();
            let group_columns = Self::pass_columns(&value_schema, &chunks)?;
            if let Some(c) = group_columns.first() {
                if c.len() != num_rows {
                    return Err(Status::internal(format!(
                        "vertical compaction value group {:?} produced {} rows, key pass {}",
                        group,
                        c.len(),
                        num_rows
                    )));
                }
            }
            columns.extend(group_columns);
            groups += 1;
        }
        Ok((columns, groups + 1))
    }
}
