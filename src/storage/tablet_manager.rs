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
//! Registry of tablets and the entry point for version publishing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::common::config;
use crate::common::status::{Result, Status};
use crate::novacore_logging::info;
use crate::storage::compaction::CompactionTask;
use crate::storage::delete_predicates::{InPredicate, parse_condition};
use crate::storage::schema::TabletSchema;
use crate::storage::tablet::{Tablet, TabletSharedPtr, TxnLog, TxnLogOp};

#[derive(Default)]
pub struct TabletManager {
    tablets: RwLock<HashMap<i64, TabletSharedPtr>>,
}

impl TabletManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_tablet(&self, tablet_id: i64, schema: TabletSchema) -> Result<TabletSharedPtr> {
        let mut tablets = self.tablets.write().unwrap_or_else(|e| e.into_inner());
        if tablets.contains_key(&tablet_id) {
            return Err(Status::invalid_argument(format!(
                "tablet {} already exists",
                tablet_id
            )));
        }
        let tablet = Arc::new(Tablet::new(tablet_id, schema));
        tablets.insert(tablet_id, Arc::clone(&tablet));
        info!(
            "created tablet {} keys_type={}",
            tablet_id,
            tablet.keys_type()
        );
        Ok(tablet)
    }

    pub fn get_tablet(&self, tablet_id: i64) -> Result<TabletSharedPtr> {
        let tablets = self.tablets.read().unwrap_or_else(|e| e.into_inner());
        tablets
            .get(&tablet_id)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("tablet {} not found", tablet_id)))
    }

    pub fn drop_tablet(&self, tablet_id: i64) -> Result<()> {
        let mut tablets = self.tablets.write().unwrap_or_else(|e| e.into_inner());
        tablets
            .remove(&tablet_id)
            .map(|_| ())
            .ok_or_else(|| Status::not_found(format!("tablet {} not found", tablet_id)))
    }

    /// Publishes `new_version` and trims retained versions to `tablet_max_versions`.
    pub fn publish_version(
        &self,
        tablet_id: i64,
        base_version: i64,
        new_version: i64,
        txn_ids: &[i64],
    ) -> Result<()> {
        let tablet = self.get_tablet(tablet_id)?;
        tablet.publish_version(base_version, new_version, txn_ids)?;
        tablet.gc_metadata(config::tablet_max_versions());
        Ok(())
    }

    /// Stages a delete job. Conditions are validated here so a bad job fails at submit time.
    pub fn delete_data(
        &self,
        tablet_id: i64,
        txn_id: i64,
        sub_predicates: Vec<String>,
        in_predicates: Vec<InPredicate>,
    ) -> Result<()> {
        let tablet = self.get_tablet(tablet_id)?;
        for text in &sub_predicates {
            let cond = parse_condition(text)?.ok_or_else(|| {
                Status::invalid_argument(format!("invalid delete condition: {}", text))
            })?;
            if tablet.schema().field_index(&cond.column_name).is_none() {
                return Err(Status::invalid_argument(format!(
                    "delete condition names unknown column {}",
                    cond.column_name
                )));
            }
        }
        if sub_predicates.is_empty() && in_predicates.is_empty() {
            return Err(Status::invalid_argument("delete job has no condition"));
        }
        tablet.put_txn_log(TxnLog {
            txn_id,
            op: TxnLogOp::Delete {
                sub_predicates,
                in_predicates,
            },
        });
        Ok(())
    }

    pub fn compact(&self, tablet_id: i64, version: i64, txn_id: i64) -> Result<CompactionTask> {
        let tablet = self.get_tablet(tablet_id)?;
        CompactionTask::new(tablet, version, txn_id)
    }
}
