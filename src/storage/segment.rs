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
//! In-memory segment: one immutable, key-sorted batch holding every tablet column.

use arrow::array::{ArrayRef, RecordBatch};

use crate::common::status::{Result, Status};
use crate::storage::datum::{Datum, datum_at};
use crate::storage::schema::TabletSchema;

#[derive(Debug)]
pub struct Segment {
    id: u32,
    batch: RecordBatch,
}

impl Segment {
    /// `batch` must be laid out in tablet column order and sorted by the key columns.
    pub fn new(id: u32, schema: &TabletSchema, batch: RecordBatch) -> Result<Self> {
        if batch.num_columns() != schema.num_columns() {
            return Err(Status::invalid_argument(format!(
                "segment has {} columns, tablet schema has {}",
                batch.num_columns(),
                schema.num_columns()
            )));
        }
        Ok(Self { id, batch })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn column(&self, idx: usize) -> &ArrayRef {
        self.batch.column(idx)
    }

    pub fn key_at(&self, schema: &TabletSchema, row: usize) -> Result<Vec<Datum>> {
        (0..schema.num_key_columns())
            .map(|c| datum_at(self.column(c).as_ref(), schema.column(c).logical_type, row))
            .collect()
    }

    pub fn row_at(&self, schema: &TabletSchema, row: usize) -> Result<Vec<Datum>> {
        (0..schema.num_columns())
            .map(|c| datum_at(self.column(c).as_ref(), schema.column(c).logical_type, row))
            .collect()
    }
}
