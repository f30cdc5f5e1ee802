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
//! Primary-key bookkeeping: the primary index and versioned delete vectors.
//!
//! Responsibilities:
//! - Maps every live primary key to the rowset, segment and row holding its latest value.
//! - Records, per published version, which rows of older rowsets were superseded.
//! - Rebinds keys from compaction inputs to the compacted rowset.
//!
//! Key exported interfaces:
//! - Types: `UpdateManager`, `RowLocation`.
//!
//! Current limitations:
//! - The index lives in memory and is rebuilt only through `apply_rowset`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use roaring::RoaringBitmap;

use crate::common::status::Result;
use crate::novacore_logging::debug;
use crate::storage::datum::encode_key;
use crate::storage::rowset::Rowset;
use crate::storage::schema::TabletSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RowLocation {
    pub rowset_id: u32,
    pub segment_id: u32,
    pub row_id: u32,
}

type DelVecKey = (u32, u32);

#[derive(Default)]
struct UpdateState {
    primary_index: HashMap<Vec<u8>, RowLocation>,
    // Entries are kept in ascending version order.
    del_vecs: HashMap<DelVecKey, Vec<(i64, Arc<RoaringBitmap>)>>,
}

impl UpdateState {
    fn latest(&self, key: DelVecKey) -> Option<&Arc<RoaringBitmap>> {
        self.del_vecs.get(&key).and_then(|v| v.last()).map(|(_, d)| d)
    }

    fn commit(&mut self, deletes: BTreeMap<DelVecKey, Vec<u32>>, version: i64) {
        for (key, rows) in deletes {
            let mut bitmap = self
                .latest(key)
                .map(|d| d.as_ref().clone())
                .unwrap_or_default();
            bitmap.extend(rows);
            let entries = self.del_vecs.entry(key).or_default();
            match entries.last_mut() {
                Some((v, d)) if *v == version => *d = Arc::new(bitmap),
                _ => entries.push((version, Arc::new(bitmap))),
            }
        }
    }
}

#[derive(Default)]
pub struct UpdateManager {
    state: Mutex<UpdateState>,
}

impl UpdateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts every row of `rowset`; the previous location of each key is deleted at
    /// `version`.
    pub fn apply_rowset(&self, schema: &TabletSchema, rowset: &Rowset, version: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut deletes: BTreeMap<DelVecKey, Vec<u32>> = BTreeMap::new();
        let mut upserts = 0usize;
        for segment in rowset.segments() {
            for row in 0..segment.num_rows() {
                let key = encode_key(&segment.key_at(schema, row)?);
                let loc = RowLocation {
                    rowset_id: rowset.id(),
                    segment_id: segment.id(),
                    row_id: row as u32,
                };
                if let Some(old) = state.primary_index.insert(key, loc) {
                    deletes
                        .entry((old.rowset_id, old.segment_id))
                        .or_default()
                        .push(old.row_id);
                }
                upserts += 1;
            }
        }
        let deleted: usize = deletes.values().map(Vec::len).sum();
        state.commit(deletes, version);
        debug!(
            "apply rowset {} at version {}: upserts={}, deletes={}",
            rowset.id(),
            version,
            upserts,
            deleted
        );
        Ok(())
    }

    /// Keys still pointing at `inputs` move to `output`; output rows whose key was
    /// superseded after the compaction snapshot are deleted at `version`.
    pub fn apply_compaction(
        &self,
        schema: &TabletSchema,
        inputs: &[u32],
        output: &Rowset,
        version: i64,
    ) -> Result<()> {
        let inputs: HashSet<u32> = inputs.iter().copied().collect();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut deletes: BTreeMap<DelVecKey, Vec<u32>> = BTreeMap::new();
        for segment in output.segments() {
            for row in 0..segment.num_rows() {
                let key = encode_key(&segment.key_at(schema, row)?);
                let loc = RowLocation {
                    rowset_id: output.id(),
                    segment_id: segment.id(),
                    row_id: row as u32,
                };
                match state.primary_index.get_mut(&key) {
                    Some(current) if inputs.contains(&current.rowset_id) => *current = loc,
                    _ => deletes
                        .entry((output.id(), segment.id()))
                        .or_default()
                        .push(row as u32),
                }
            }
        }
        state.commit(deletes, version);
        Ok(())
    }

    /// Delete vector of one segment as of `version`; `None` when nothing was deleted.
    pub fn get_del_vec(
        &self,
        rowset_id: u32,
        segment_id: u32,
        version: i64,
    ) -> Option<Arc<RoaringBitmap>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .del_vecs
            .get(&(rowset_id, segment_id))?
            .iter()
            .rev()
            .find(|(v, _)| *v <= version)
            .map(|(_, d)| Arc::clone(d))
    }

    pub fn lookup(&self, key: &[u8]) -> Option<RowLocation> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.primary_index.get(key).copied()
    }

    pub fn primary_index_size(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.primary_index.len()
    }

    /// Drops delete vectors of rowsets no longer referenced by any retained version.
    pub fn retain_rowsets(&self, live: &HashSet<u32>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.del_vecs.retain(|(rowset_id, _), _| live.contains(rowset_id));
    }

    pub fn cached_del_vec_size(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.del_vecs.values().map(Vec::len).sum()
    }
}
