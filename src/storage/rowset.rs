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
//! Rowsets: immutable, versioned groups of segments.
//!
//! Responsibilities:
//! - Holds the segments written by one load or produced by one compaction.
//! - Counts active readers so a snapshot stays usable after the tablet drops the rowset.
//! - Builds the per-segment iterators of a read.
//!
//! Key exported interfaces:
//! - Types: `Rowset`, `RowsetSharedPtr`, `RowsetReadOptions`, `RowidRangeOption`.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::common::config;
use crate::common::status::Result;
use crate::storage::chunk_iterator::{ChunkIteratorPtr, new_union_iterator};
use crate::storage::column_predicate::ConjunctivePredicates;
use crate::storage::delete_predicates::DeletePredicates;
use crate::storage::read_stats::ReadStatistics;
use crate::storage::schema::{Schema, TabletSchema};
use crate::storage::seek_range::SeekRange;
use crate::storage::segment::Segment;
use crate::storage::segment_iterator::{SegmentIterator, SegmentReadFilter};
use crate::storage::tablet_reader_params::ReaderType;
use crate::storage::update_manager::UpdateManager;

/// Restricts a read to row-id ranges of some segments of one rowset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowidRangeOption {
    pub rowset_id: u32,
    segment_ranges: BTreeMap<u32, Vec<Range<u32>>>,
}

impl RowidRangeOption {
    pub fn new(rowset_id: u32) -> Self {
        Self {
            rowset_id,
            segment_ranges: BTreeMap::new(),
        }
    }

    pub fn add(mut self, segment_id: u32, range: Range<u32>) -> Self {
        self.segment_ranges.entry(segment_id).or_default().push(range);
        self
    }

    pub fn match_rowset(&self, rowset_id: u32) -> bool {
        self.rowset_id == rowset_id
    }

    pub fn ranges_for(&self, segment_id: u32) -> Option<&[Range<u32>]> {
        self.segment_ranges.get(&segment_id).map(Vec::as_slice)
    }
}

#[derive(Clone)]
pub struct RowsetReadOptions {
    pub ranges: Vec<SeekRange>,
    pub predicates: ConjunctivePredicates,
    pub delete_predicates: Arc<DeletePredicates>,
    /// One iterator per segment when set, otherwise one union over the segments.
    pub sorted: bool,
    pub chunk_size: usize,
    pub reader_type: ReaderType,
    pub is_primary_keys: bool,
    pub version: i64,
    pub update_mgr: Option<Arc<UpdateManager>>,
    pub rowid_range_option: Option<Arc<RowidRangeOption>>,
    pub use_page_cache: bool,
    pub stats: Arc<ReadStatistics>,
}

impl Default for RowsetReadOptions {
    fn default() -> Self {
        Self {
            ranges: Vec::new(),
            predicates: ConjunctivePredicates::new(),
            delete_predicates: Arc::new(DeletePredicates::new()),
            sorted: true,
            chunk_size: config::storage_chunk_size(),
            reader_type: ReaderType::Query,
            is_primary_keys: false,
            version: 0,
            update_mgr: None,
            rowid_range_option: None,
            use_page_cache: true,
            stats: Arc::new(ReadStatistics::new()),
        }
    }
}

#[derive(Debug)]
pub struct Rowset {
    id: u32,
    version: i64,
    schema: Arc<TabletSchema>,
    segments: Vec<Arc<Segment>>,
    readers: AtomicUsize,
    loaded: AtomicBool,
}

pub type RowsetSharedPtr = Arc<Rowset>;

impl Rowset {
    pub fn new(id: u32, version: i64, schema: Arc<TabletSchema>, segments: Vec<Segment>) -> Self {
        Self {
            id,
            version,
            schema,
            segments: segments.into_iter().map(Arc::new).collect(),
            readers: AtomicUsize::new(0),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn num_rows(&self) -> usize {
        self.segments.iter().map(|s| s.num_rows()).sum()
    }

    pub fn acquire(&self) {
        self.readers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(&self) {
        let _ = self
            .readers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn num_readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    pub fn acquire_readers(rowsets: &[RowsetSharedPtr]) {
        for rowset in rowsets {
            rowset.acquire();
        }
    }

    pub fn release_readers(rowsets: &[RowsetSharedPtr]) {
        for rowset in rowsets {
            rowset.release();
        }
    }

    /// Segments are already resident; this only records that the rowset was opened.
    pub fn load(&self) -> Result<()> {
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Segments whose filters leave no row produce no iterator.
    pub fn get_segment_iterators(
        &self,
        schema: &Schema,
        opts: &RowsetReadOptions,
    ) -> Result<Vec<ChunkIteratorPtr>> {
        let mut iters: Vec<ChunkIteratorPtr> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let row_ranges = match &opts.rowid_range_option {
                Some(opt) if opt.match_rowset(self.id) => match opt.ranges_for(segment.id()) {
                    Some(r) => Some(r.to_vec()),
                    None => continue,
                },
                _ => None,
            };
            let del_vec = match (&opts.update_mgr, opts.is_primary_keys) {
                (Some(mgr), true) => mgr.get_del_vec(self.id, segment.id(), opts.version),
                _ => None,
            };
            let filter = SegmentReadFilter {
                ranges: &opts.ranges,
                predicates: &opts.predicates,
                delete_predicates: &opts.delete_predicates,
                rowset_version: self.version,
                row_ranges: row_ranges.as_deref(),
                del_vec: del_vec.as_deref(),
            };
            let iter = SegmentIterator::new(
                Arc::clone(segment),
                Arc::clone(&self.schema),
                schema.clone(),
                &filter,
                opts.chunk_size,
                &opts.stats,
            )?;
            opts.stats.add_segments_read(1);
            if iter.num_selected_rows() > 0 {
                iters.push(Box::new(iter));
            }
        }
        if opts.sorted || iters.len() <= 1 {
            return Ok(iters);
        }
        Ok(vec![new_union_iterator(iters)?])
    }
}
