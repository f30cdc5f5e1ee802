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
//! Parameters of one tablet read.

use std::fmt;
use std::sync::Arc;

use crate::common::config;
use crate::runtime::profile::RuntimeProfile;
use crate::storage::column_predicate::ColumnPredicate;
use crate::storage::rowset::RowidRangeOption;
use crate::storage::seek_range::{OlapTuple, RangeEndOperation, RangeStartOperation};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReaderType {
    #[default]
    Query,
    Checksum,
    AlterTable,
    BaseCompaction,
    CumulativeCompaction,
    UpdateCompaction,
    Unsupported,
}

impl ReaderType {
    pub fn is_compaction(self) -> bool {
        matches!(
            self,
            ReaderType::BaseCompaction
                | ReaderType::CumulativeCompaction
                | ReaderType::UpdateCompaction
        )
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, ReaderType::Unsupported)
    }
}

impl fmt::Display for ReaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReaderType::Query => "READER_QUERY",
            ReaderType::Checksum => "READER_CHECKSUM",
            ReaderType::AlterTable => "READER_ALTER_TABLE",
            ReaderType::BaseCompaction => "READER_BASE_COMPACTION",
            ReaderType::CumulativeCompaction => "READER_CUMULATIVE_COMPACTION",
            ReaderType::UpdateCompaction => "READER_UPDATE_COMPACTION",
            ReaderType::Unsupported => "READER_UNSUPPORTED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub struct TabletReaderParams {
    pub reader_type: ReaderType,
    /// Column ids refer to the tablet schema.
    pub predicates: Vec<ColumnPredicate>,
    pub range: RangeStartOperation,
    pub end_range: RangeEndOperation,
    pub start_key: Vec<OlapTuple>,
    pub end_key: Vec<OlapTuple>,
    pub skip_aggregation: bool,
    pub sorted_by_keys_per_tablet: bool,
    pub chunk_size: usize,
    pub use_page_cache: bool,
    pub rowid_range_option: Option<Arc<RowidRangeOption>>,
    pub profile: Option<RuntimeProfile>,
}

impl Default for TabletReaderParams {
    fn default() -> Self {
        Self {
            reader_type: ReaderType::Query,
            predicates: Vec::new(),
            range: RangeStartOperation::default(),
            end_range: RangeEndOperation::default(),
            start_key: Vec::new(),
            end_key: Vec::new(),
            skip_aggregation: false,
            sorted_by_keys_per_tablet: false,
            chunk_size: config::storage_chunk_size(),
            use_page_cache: true,
            rowid_range_option: None,
            profile: None,
        }
    }
}

impl TabletReaderParams {
    pub fn with_reader_type(mut self, reader_type: ReaderType) -> Self {
        self.reader_type = reader_type;
        self
    }
}
