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
//! Read statistics shared by every iterator of one tablet read.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::runtime::profile::{RuntimeProfile, TUnit};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub raw_rows_read: i64,
    pub rowsets_read: i64,
    pub segments_read: i64,
    pub rows_del_vec_filtered: i64,
    pub rows_del_filtered: i64,
    pub rows_pred_filtered: i64,
    pub rows_key_range_filtered: i64,
    pub get_rowsets_ns: i64,
    pub iterator_init_ns: i64,
}

/// Atomic counters updated by segment iterators; `snapshot` copies them out.
#[derive(Debug, Default)]
pub struct ReadStatistics {
    raw_rows_read: AtomicI64,
    rowsets_read: AtomicI64,
    segments_read: AtomicI64,
    rows_del_vec_filtered: AtomicI64,
    rows_del_filtered: AtomicI64,
    rows_pred_filtered: AtomicI64,
    rows_key_range_filtered: AtomicI64,
    get_rowsets_ns: AtomicI64,
    iterator_init_ns: AtomicI64,
}

impl ReadStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_raw_rows_read(&self, n: i64) {
        self.raw_rows_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_rowsets_read(&self, n: i64) {
        self.rowsets_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_segments_read(&self, n: i64) {
        self.segments_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_del_vec_filtered(&self, n: i64) {
        self.rows_del_vec_filtered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_del_filtered(&self, n: i64) {
        self.rows_del_filtered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_pred_filtered(&self, n: i64) {
        self.rows_pred_filtered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_key_range_filtered(&self, n: i64) {
        self.rows_key_range_filtered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_get_rowsets_ns(&self, n: i64) {
        self.get_rowsets_ns.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_iterator_init_ns(&self, n: i64) {
        self.iterator_init_ns.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReadStats {
        ReadStats {
            raw_rows_read: self.raw_rows_read.load(Ordering::Relaxed),
            rowsets_read: self.rowsets_read.load(Ordering::Relaxed),
            segments_read: self.segments_read.load(Ordering::Relaxed),
            rows_del_vec_filtered: self.rows_del_vec_filtered.load(Ordering::Relaxed),
            rows_del_filtered: self.rows_del_filtered.load(Ordering::Relaxed),
            rows_pred_filtered: self.rows_pred_filtered.load(Ordering::Relaxed),
            rows_key_range_filtered: self.rows_key_range_filtered.load(Ordering::Relaxed),
            get_rowsets_ns: self.get_rowsets_ns.load(Ordering::Relaxed),
            iterator_init_ns: self.iterator_init_ns.load(Ordering::Relaxed),
        }
    }

    pub fn export_to(&self, profile: &RuntimeProfile) {
        let s = self.snapshot();
        profile.counter_set("RawRowsRead", TUnit::Unit, s.raw_rows_read);
        profile.counter_set("RowsetsReadCount", TUnit::Unit, s.rowsets_read);
        profile.counter_set("SegmentsReadCount", TUnit::Unit, s.segments_read);
        profile.counter_set("DelVecFilterRows", TUnit::Unit, s.rows_del_vec_filtered);
        profile.counter_set("DeleteFilterRows", TUnit::Unit, s.rows_del_filtered);
        profile.counter_set("PredFilterRows", TUnit::Unit, s.rows_pred_filtered);
        profile.counter_set("ShortKeyFilterRows", TUnit::Unit, s.rows_key_range_filtered);
        profile.counter_set("GetRowsets", TUnit::TimeNs, s.get_rowsets_ns);
        profile.counter_set("SegmentInit", TUnit::TimeNs, s.iterator_init_ns);
    }
}
