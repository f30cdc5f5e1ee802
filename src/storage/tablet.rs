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
//! Tablets: versioned metadata over rowsets plus the delete and transaction log history.
//!
//! Responsibilities:
//! - Keeps one immutable `TabletMetadata` snapshot per published version.
//! - Captures the rowsets visible at a version under the header lock.
//! - Stages transaction logs and applies them when a version is published.
//!
//! Key exported interfaces:
//! - Types: `Tablet`, `TabletMetadata`, `TxnLog`, `TxnLogOp`.
//!
//! Current limitations:
//! - Metadata and segments are kept in memory only.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::common::status::{Result, Status};
use crate::novacore_logging::{debug, info};
use crate::storage::delete_predicates::{DeletePredicate, InPredicate};
use crate::storage::rowset::{Rowset, RowsetSharedPtr};
use crate::storage::schema::{KeysType, TabletSchema};
use crate::storage::segment::Segment;
use crate::storage::update_manager::UpdateManager;

#[derive(Debug)]
pub struct TabletMetadata {
    pub version: i64,
    /// Ordered oldest first.
    pub rowsets: Vec<RowsetSharedPtr>,
}

#[derive(Debug)]
pub enum TxnLogOp {
    Write {
        segments: Vec<Segment>,
    },
    Delete {
        sub_predicates: Vec<String>,
        in_predicates: Vec<InPredicate>,
    },
    Compaction {
        input_rowset_ids: Vec<u32>,
        segments: Vec<Segment>,
        base_version: i64,
    },
}

#[derive(Debug)]
pub struct TxnLog {
    pub txn_id: i64,
    pub op: TxnLogOp,
}

#[derive(Default)]
struct TabletHeader {
    metadata: BTreeMap<i64, Arc<TabletMetadata>>,
    delete_predicates: Vec<DeletePredicate>,
    txn_logs: HashMap<i64, TxnLog>,
    next_rowset_id: u32,
}

pub struct Tablet {
    id: i64,
    schema: Arc<TabletSchema>,
    header: RwLock<TabletHeader>,
    update_mgr: Arc<UpdateManager>,
}

pub type TabletSharedPtr = Arc<Tablet>;

impl Tablet {
    /// Starts at version 1 with no rowsets.
    pub fn new(id: i64, schema: TabletSchema) -> Self {
        let mut header = TabletHeader::default();
        header.metadata.insert(
            1,
            Arc::new(TabletMetadata {
                version: 1,
                rowsets: Vec::new(),
            }),
        );
        Self {
            id,
            schema: Arc::new(schema),
            header: RwLock::new(header),
            update_mgr: Arc::new(UpdateManager::new()),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn schema(&self) -> &Arc<TabletSchema> {
        &self.schema
    }

    pub fn keys_type(&self) -> KeysType {
        self.schema.keys_type()
    }

    pub fn update_mgr(&self) -> &Arc<UpdateManager> {
        &self.update_mgr
    }

    pub fn get_metadata(&self, version: i64) -> Option<Arc<TabletMetadata>> {
        let header = self.header.read().unwrap_or_else(|e| e.into_inner());
        header.metadata.get(&version).cloned()
    }

    pub fn latest_metadata(&self) -> Arc<TabletMetadata> {
        let header = self.header.read().unwrap_or_else(|e| e.into_inner());
        match header.metadata.last_key_value() {
            Some((_, m)) => Arc::clone(m),
            None => Arc::new(TabletMetadata {
                version: 0,
                rowsets: Vec::new(),
            }),
        }
    }

    pub fn max_version(&self) -> i64 {
        self.latest_metadata().version
    }

    /// Rowsets visible at exactly `version`.
    pub fn capture_consistent_rowsets(&self, version: i64) -> Result<Vec<RowsetSharedPtr>> {
        let header = self.header.read().unwrap_or_else(|e| e.into_inner());
        match header.metadata.get(&version) {
            Some(meta) => Ok(meta.rowsets.clone()),
            None => Err(Status::internal(format!(
                "tablet {} cannot capture consistent rowsets at version {}",
                self.id, version
            ))),
        }
    }

    /// Delete jobs published at or before `max_version`.
    pub fn delete_predicates(&self, max_version: i64) -> Vec<DeletePredicate> {
        let header = self.header.read().unwrap_or_else(|e| e.into_inner());
        header
            .delete_predicates
            .iter()
            .filter(|p| p.version <= max_version)
            .cloned()
            .collect()
    }

    pub fn put_txn_log(&self, log: TxnLog) {
        let mut header = self.header.write().unwrap_or_else(|e| e.into_inner());
        header.txn_logs.insert(log.txn_id, log);
    }

    pub fn has_txn_log(&self, txn_id: i64) -> bool {
        let header = self.header.read().unwrap_or_else(|e| e.into_inner());
        header.txn_logs.contains_key(&txn_id)
    }

    /// Applies the logs of `txn_ids` on top of `base_version` and publishes `new_version`.
    /// Publishing a version that already exists is a no-op.
    pub fn publish_version(&self, base_version: i64, new_version: i64, txn_ids: &[i64]) -> Result<()> {
        let mut header = self.header.write().unwrap_or_else(|e| e.into_inner());
        if header.metadata.contains_key(&new_version) {
            debug!(
                "tablet {} version {} already published",
                self.id, new_version
            );
            return Ok(());
        }
        if new_version <= base_version {
            return Err(Status::invalid_argument(format!(
                "new version {} must be greater than base version {}",
                new_version, base_version
            )));
        }
        let base = header.metadata.get(&base_version).cloned().ok_or_else(|| {
            Status::not_found(format!(
                "tablet {} base version {} not found",
                self.id, base_version
            ))
        })?;
        for txn_id in txn_ids {
            if !header.txn_logs.contains_key(txn_id) {
                return Err(Status::not_found(format!(
                    "txn log {} of tablet {} not found",
                    txn_id, self.id
                )));
            }
        }
        let mut rowsets = base.rowsets.clone();
        for txn_id in txn_ids {
            let Some(log) = header.txn_logs.remove(txn_id) else {
                continue;
            };
            match log.op {
                TxnLogOp::Write { segments } => {
                    if segments.is_empty() {
                        continue;
                    }
                    let id = header.next_rowset_id;
                    header.next_rowset_id += 1;
                    let rowset = Arc::new(Rowset::new(
                        id,
                        new_version,
                        Arc::clone(&self.schema),
                        segments,
                    ));
                    if self.keys_type() == KeysType::PrimaryKeys {
                        self.update_mgr
                            .apply_rowset(&self.schema, &rowset, new_version)?;
                    }
                    rowsets.push(rowset);
                }
                TxnLogOp::Delete {
                    sub_predicates,
                    in_predicates,
                } => {
                    header.delete_predicates.push(DeletePredicate {
                        version: new_version,
                        sub_predicates,
                        in_predicates,
                    });
                }
                TxnLogOp::Compaction {
                    input_rowset_ids,
                    segments,
                    base_version: compaction_version,
                } => {
                    let inputs: HashSet<u32> = input_rowset_ids.iter().copied().collect();
                    let first = rowsets
                        .iter()
                        .position(|r| inputs.contains(&r.id()))
                        .ok_or_else(|| {
                            Status::internal(format!(
                                "compaction inputs {:?} of tablet {} are gone",
                                input_rowset_ids, self.id
                            ))
                        })?;
                    let present = rowsets.iter().filter(|r| inputs.contains(&r.id())).count();
                    if present != inputs.len() {
                        return Err(Status::internal(format!(
                            "compaction inputs {:?} of tablet {} are partially gone",
                            input_rowset_ids, self.id
                        )));
                    }
                    let id = header.next_rowset_id;
                    header.next_rowset_id += 1;
                    let output = Arc::new(Rowset::new(
                        id,
                        compaction_version,
                        Arc::clone(&self.schema),
                        segments,
                    ));
                    if self.keys_type() == KeysType::PrimaryKeys {
                        self.update_mgr.apply_compaction(
                            &self.schema,
                            &input_rowset_ids,
                            &output,
                            new_version,
                        )?;
                    }
                    rowsets.retain(|r| !inputs.contains(&r.id()));
                    rowsets.insert(first, output);
                }
            }
        }
        header.metadata.insert(
            new_version,
            Arc::new(TabletMetadata {
                version: new_version,
                rowsets,
            }),
        );
        info!(
            "tablet {} published version {} from {} with {} txns",
            self.id,
            new_version,
            base_version,
            txn_ids.len()
        );
        Ok(())
    }

    /// Keeps the newest `keep` versions.
    pub fn gc_metadata(&self, keep: usize) -> usize {
        let mut header = self.header.write().unwrap_or_else(|e| e.into_inner());
        let keep = keep.max(1);
        let mut removed = 0;
        while header.metadata.len() > keep {
            header.metadata.pop_first();
            removed += 1;
        }
        if removed > 0 && self.keys_type() == KeysType::PrimaryKeys {
            let live: HashSet<u32> = header
                .metadata
                .values()
                .flat_map(|m| m.rowsets.iter().map(|r| r.id()))
                .collect();
            self.update_mgr.retain_rowsets(&live);
        }
        removed
    }

    pub fn num_versions(&self) -> usize {
        let header = self.header.read().unwrap_or_else(|e| e.into_inner());
        header.metadata.len()
    }
}
