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
//! Tablet reader: composes the iterator tree of one versioned tablet read.
//!
//! Responsibilities:
//! - Captures and pins the rowsets visible at the read version.
//! - Builds segment iterators with pushdown predicates, delete conjunctions and key ranges.
//! - Chooses union, heap merge, mask merge and aggregation by keys type and reader purpose.
//!
//! Key exported interfaces:
//! - Types: `TabletReader`.
//!
//! Current limitations:
//! - Reads a single version; version ranges are not merged.

use std::sync::Arc;
use std::time::Instant;

use crate::common::config;
use crate::common::status::{Result, Status};
use crate::exec::chunk::Chunk;
use crate::novacore_logging::{debug, warn};
use crate::runtime::profile::{RuntimeProfile, clamp_u128_to_i64};
use crate::storage::aggregate_iterator::{new_aggregate_iterator, new_vertical_aggregate_iterator};
use crate::storage::chunk_iterator::{
    ChunkIterator, ChunkIteratorPtr, new_empty_iterator, new_union_iterator, timed_chunk_iterator,
};
use crate::storage::column_predicate::ConjunctivePredicates;
use crate::storage::delete_predicates::{DeletePredicates, init_delete_predicates};
use crate::storage::merge_iterator::{new_heap_merge_iterator, new_mask_merge_iterator};
use crate::storage::read_stats::{ReadStatistics, ReadStats};
use crate::storage::row_source_mask::{RowSourceMask, SharedMaskBuffer};
use crate::storage::rowset::{Rowset, RowsetReadOptions, RowsetSharedPtr};
use crate::storage::schema::{KeysType, Schema};
use crate::storage::seek_range::parse_seek_range;
use crate::storage::tablet::TabletSharedPtr;
use crate::storage::tablet_reader_params::TabletReaderParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReaderState {
    Created,
    Prepared,
    Opened,
    Closed,
}

pub struct TabletReader {
    tablet: TabletSharedPtr,
    version: i64,
    schema: Schema,
    rowsets: Vec<RowsetSharedPtr>,
    captured: bool,
    acquired: bool,
    is_vertical_merge: bool,
    is_key: bool,
    mask_buffer: Option<SharedMaskBuffer>,
    collect_iter: Option<ChunkIteratorPtr>,
    delete_predicates: Arc<DeletePredicates>,
    stats: Arc<ReadStatistics>,
    profile: Option<RuntimeProfile>,
    state: ReaderState,
}

impl TabletReader {
    pub fn new(tablet: TabletSharedPtr, version: i64, schema: Schema) -> Self {
        Self::with_rowsets(tablet, version, schema, None)
    }

    /// `Some(rowsets)` reads exactly those rowsets instead of capturing at `version`.
    pub fn with_rowsets(
        tablet: TabletSharedPtr,
        version: i64,
        schema: Schema,
        rowsets: Option<Vec<RowsetSharedPtr>>,
    ) -> Self {
        let captured = rowsets.is_some();
        Self {
            tablet,
            version,
            schema,
            rowsets: rowsets.unwrap_or_default(),
            captured,
            acquired: false,
            is_vertical_merge: false,
            is_key: false,
            mask_buffer: None,
            collect_iter: None,
            delete_predicates: Arc::new(DeletePredicates::new()),
            stats: Arc::new(ReadStatistics::new()),
            profile: None,
            state: ReaderState::Created,
        }
    }

    /// Reader for one pass of a vertical merge: the key pass records row-source masks,
    /// value passes replay them from `mask_buffer`.
    pub fn new_vertical(
        tablet: TabletSharedPtr,
        version: i64,
        schema: Schema,
        rowsets: Option<Vec<RowsetSharedPtr>>,
        is_key: bool,
        mask_buffer: SharedMaskBuffer,
    ) -> Self {
        let mut reader = Self::with_rowsets(tablet, version, schema, rowsets);
        reader.is_vertical_merge = true;
        reader.is_key = is_key;
        reader.mask_buffer = Some(mask_buffer);
        reader
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn rowsets(&self) -> &[RowsetSharedPtr] {
        &self.rowsets
    }

    pub fn stats(&self) -> ReadStats {
        self.stats.snapshot()
    }

    pub fn prepare(&mut self) -> Result<()> {
        if self.state != ReaderState::Created {
            return Err(Status::internal(format!(
                "tablet reader of tablet {} prepared in state {:?}",
                self.tablet.id(),
                self.state
            )));
        }
        let start = Instant::now();
        if !self.captured {
            match self.tablet.capture_consistent_rowsets(self.version) {
                Ok(rowsets) => self.rowsets = rowsets,
                Err(e) => {
                    self.rowsets.clear();
                    let msg = format!(
                        "fail to init reader. tablet={}, version={}, res={}",
                        self.tablet.id(),
                        self.version,
                        e
                    );
                    warn!("{}", msg);
                    return Err(Status::internal(msg));
                }
            }
        }
        self.stats.add_rowsets_read(self.rowsets.len() as i64);
        Rowset::acquire_readers(&self.rowsets);
        self.acquired = true;
        for rowset in &self.rowsets {
            rowset.load()?;
        }
        self.stats
            .add_get_rowsets_ns(clamp_u128_to_i64(start.elapsed().as_nanos()));
        self.state = ReaderState::Prepared;
        Ok(())
    }

    pub fn open(&mut self, params: &TabletReaderParams) -> Result<()> {
        if self.state != ReaderState::Prepared {
            return Err(Status::internal(format!(
                "tablet reader of tablet {} opened in state {:?}",
                self.tablet.id(),
                self.state
            )));
        }
        if !params.reader_type.is_supported() {
            return Err(Status::not_supported(format!(
                "reader type {} not supported now",
                params.reader_type
            )));
        }
        self.profile = params.profile.clone();
        self.init_collector(params)?;
        self.state = ReaderState::Opened;
        Ok(())
    }

    fn get_segment_iterators(&mut self, params: &TabletReaderParams) -> Result<Vec<ChunkIteratorPtr>> {
        let tablet_schema = self.tablet.schema();
        let keys_type = tablet_schema.keys_type();
        let mut predicates = ConjunctivePredicates::new();
        for pred in &params.predicates {
            if pred.column_id() >= tablet_schema.num_columns() {
                return Err(Status::invalid_argument(format!(
                    "predicate column {} out of range",
                    pred.column_id()
                )));
            }
            predicates.add(pred.clone());
        }
        self.delete_predicates = Arc::new(init_delete_predicates(
            tablet_schema,
            &self.tablet.delete_predicates(self.version),
            self.version,
        )?);
        let ranges = parse_seek_range(
            tablet_schema,
            params.range,
            params.end_range,
            &params.start_key,
            &params.end_key,
        )?;
        let is_primary_keys = keys_type == KeysType::PrimaryKeys;
        let opts = RowsetReadOptions {
            ranges,
            predicates,
            delete_predicates: Arc::clone(&self.delete_predicates),
            sorted: !matches!(keys_type, KeysType::DupKeys | KeysType::PrimaryKeys)
                && !params.skip_aggregation,
            chunk_size: params.chunk_size,
            reader_type: params.reader_type,
            is_primary_keys,
            version: self.version,
            update_mgr: is_primary_keys.then(|| Arc::clone(self.tablet.update_mgr())),
            rowid_range_option: params.rowid_range_option.clone(),
            use_page_cache: params.use_page_cache,
            stats: Arc::clone(&self.stats),
        };
        let mut iters = Vec::new();
        for rowset in &self.rowsets {
            if let Some(opt) = &params.rowid_range_option {
                if !opt.match_rowset(rowset.id()) {
                    continue;
                }
            }
            iters.extend(rowset.get_segment_iterators(&self.schema, &opts)?);
        }
        Ok(iters)
    }

    fn mask_buffer(&self) -> Result<SharedMaskBuffer> {
        self.mask_buffer
            .clone()
            .ok_or_else(|| Status::internal("vertical merge reader has no row source mask buffer"))
    }

    fn key_merge(&self, seg_iters: Vec<ChunkIteratorPtr>, chunk_size: usize) -> Result<ChunkIteratorPtr> {
        if self.is_vertical_merge && !self.is_key {
            new_mask_merge_iterator(seg_iters, self.mask_buffer()?, chunk_size)
        } else {
            new_heap_merge_iterator(seg_iters, chunk_size)
        }
    }

    fn timed(&self, iter: ChunkIteratorPtr, name: &str) -> ChunkIteratorPtr {
        match &self.profile {
            Some(profile) => timed_chunk_iterator(iter, profile.add_timer(name)),
            None => iter,
        }
    }

    fn init_collector(&mut self, params: &TabletReaderParams) -> Result<()> {
        let mut seg_iters = self.get_segment_iterators(params)?;
        if let Some(profile) = &self.profile {
            let scan_timer = profile.add_timer("TotalTime");
            seg_iters = seg_iters
                .into_iter()
                .map(|it| timed_chunk_iterator(it, Arc::clone(&scan_timer)))
                .collect();
        }

        let tablet_schema = self.tablet.schema();
        let keys_type = tablet_schema.keys_type();
        let skip_aggr = params.skip_aggregation;
        let select_all_keys = self.schema.num_key_fields() == tablet_schema.num_key_columns();
        let chunk_size = params.chunk_size;
        let num_iters = seg_iters.len();

        let (iter, plan) = if seg_iters.is_empty() {
            (new_empty_iterator(self.schema.clone()), "empty")
        } else if params.reader_type.is_compaction() && keys_type == KeysType::DupKeys {
            (self.key_merge(seg_iters, chunk_size)?, "merge")
        } else if params.sorted_by_keys_per_tablet
            && matches!(keys_type, KeysType::DupKeys | KeysType::PrimaryKeys)
            && seg_iters.len() > 1
        {
            let merged = new_heap_merge_iterator(seg_iters, chunk_size)?;
            (self.timed(merged, "Sort"), "heap_merge")
        } else if matches!(keys_type, KeysType::PrimaryKeys | KeysType::DupKeys)
            || (keys_type == KeysType::UniqueKeys && skip_aggr)
            || (select_all_keys && seg_iters.len() == 1 && !self.is_vertical_merge)
        {
            (new_union_iterator(seg_iters)?, "union")
        } else if matches!(keys_type, KeysType::AggKeys | KeysType::UniqueKeys) && !skip_aggr {
            let merged = self.key_merge(seg_iters, chunk_size)?;
            let merged = self.timed(merged, "Sort");
            let aggregated = if self.is_vertical_merge {
                new_vertical_aggregate_iterator(merged, self.is_key, chunk_size)
            } else {
                new_aggregate_iterator(merged, 0, chunk_size)
            };
            (self.timed(aggregated, "Aggr"), "merge_aggregate")
        } else if keys_type == KeysType::AggKeys {
            let unioned = self.timed(new_union_iterator(seg_iters)?, "Union");
            let aggregated =
                new_aggregate_iterator(unioned, config::pre_aggregate_factor(), chunk_size);
            (self.timed(aggregated, "Aggr"), "union_pre_aggregate")
        } else {
            return Err(Status::internal("Unknown keys type"));
        };
        debug!(
            "tablet reader tablet={} version={} keys_type={} reader_type={} segment_iters={} plan={}",
            self.tablet.id(),
            self.version,
            keys_type,
            params.reader_type,
            num_iters,
            plan
        );
        self.collect_iter = Some(iter);
        Ok(())
    }

    fn collect_iter(&mut self) -> Result<&mut ChunkIteratorPtr> {
        if self.state != ReaderState::Opened {
            return Err(Status::internal(format!(
                "tablet reader of tablet {} read in state {:?}",
                self.tablet.id(),
                self.state
            )));
        }
        self.collect_iter
            .as_mut()
            .ok_or_else(|| Status::internal("tablet reader has no iterator"))
    }

    /// Releases the pinned rowsets. Safe to call more than once and before `open`.
    pub fn close(&mut self) {
        if self.state == ReaderState::Closed {
            return;
        }
        if let Some(mut iter) = self.collect_iter.take() {
            iter.close();
        }
        self.delete_predicates = Arc::new(DeletePredicates::new());
        if self.acquired {
            Rowset::release_readers(&self.rowsets);
            self.acquired = false;
        }
        self.rowsets.clear();
        if let Some(profile) = &self.profile {
            self.stats.export_to(profile);
        }
        self.state = ReaderState::Closed;
    }
}

impl ChunkIterator for TabletReader {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn get_next(&mut self) -> Result<Option<Chunk>> {
        self.collect_iter()?.get_next()
    }

    fn get_next_with_masks(&mut self, masks: &mut Vec<RowSourceMask>) -> Result<Option<Chunk>> {
        if !self.is_vertical_merge {
            return Err(Status::internal(
                "row source masks are only produced by vertical merge readers",
            ));
        }
        self.collect_iter()?.get_next_with_masks(masks)
    }

    fn close(&mut self) {
        TabletReader::close(self);
    }
}

impl Drop for TabletReader {
    fn drop(&mut self) {
        self.close();
    }
}
