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
//! Tablet scan source operator.
//!
//! Responsibilities:
//! - Reads one tablet version through a `TabletReader` and emits its chunks.
//! - Splits the tablet's rowsets across drivers when the read composes as a plain union.
//! - Tags chunks with the tablet as lane owner when a query-cache lane arbiter is wired in,
//!   ending the lane with an empty last chunk.
//!
//! Key exported interfaces:
//! - Types: `TabletScanFactory`.

use std::sync::Arc;

use crate::common::status::{Result, Status};
use crate::exec::chunk::{Chunk, ChunkOwnerInfo};
use crate::exec::pipeline::lane_arbiter::LaneArbiter;
use crate::exec::pipeline::operator::{Operator, OperatorKind, OperatorSlot};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::novacore_logging::debug;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::{OperatorProfiles, TUnit};
use crate::runtime::runtime_state::RuntimeState;
use crate::storage::chunk_iterator::ChunkIterator;
use crate::storage::rowset::RowsetSharedPtr;
use crate::storage::schema::{KeysType, Schema};
use crate::storage::tablet::TabletSharedPtr;
use crate::storage::tablet_reader::TabletReader;
use crate::storage::tablet_reader_params::TabletReaderParams;

pub struct TabletScanFactory {
    name: String,
    tablet: TabletSharedPtr,
    version: i64,
    schema: Schema,
    params: TabletReaderParams,
}

impl TabletScanFactory {
    pub fn new(
        tablet: TabletSharedPtr,
        version: i64,
        schema: Schema,
        params: TabletReaderParams,
        node_id: i32,
    ) -> Self {
        let name = if node_id >= 0 {
            format!("TABLET_SCAN (id={node_id})")
        } else {
            "TABLET_SCAN".to_string()
        };
        Self {
            name,
            tablet,
            version,
            schema,
            params,
        }
    }
}

impl OperatorFactory for TabletScanFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, dop: i32, driver_sequence: i32) -> Box<dyn Operator> {
        Box::new(TabletScanOperator {
            name: self.name.clone(),
            tablet: Arc::clone(&self.tablet),
            version: self.version,
            schema: self.schema.clone(),
            params: self.params.clone(),
            dop: dop.max(1) as usize,
            driver_sequence: driver_sequence.max(0) as usize,
            reader: None,
            eos: false,
            finished: false,
            lane_arbiter: None,
            cache_operator: None,
            lane_end_emitted: false,
            mem_tracker: None,
            profiles: None,
            rows_read: 0,
        })
    }

    fn is_source(&self) -> bool {
        true
    }
}

struct TabletScanOperator {
    name: String,
    tablet: TabletSharedPtr,
    version: i64,
    schema: Schema,
    params: TabletReaderParams,
    dop: usize,
    driver_sequence: usize,
    reader: Option<TabletReader>,
    eos: bool,
    finished: bool,
    lane_arbiter: Option<Arc<LaneArbiter>>,
    cache_operator: Option<OperatorSlot>,
    lane_end_emitted: bool,
    mem_tracker: Option<Arc<MemTracker>>,
    profiles: Option<OperatorProfiles>,
    rows_read: usize,
}

impl TabletScanOperator {
    /// Rowsets may only be divided when the reader would union them anyway.
    fn can_split_rowsets(&self) -> bool {
        if self.params.reader_type.is_compaction() || self.params.sorted_by_keys_per_tablet {
            return false;
        }
        match self.tablet.keys_type() {
            KeysType::DupKeys | KeysType::PrimaryKeys => true,
            KeysType::UniqueKeys => self.params.skip_aggregation,
            KeysType::AggKeys => false,
        }
    }

    fn assigned_rowsets(&self, rowsets: Vec<RowsetSharedPtr>) -> Vec<RowsetSharedPtr> {
        if self.dop == 1 {
            return rowsets;
        }
        if self.can_split_rowsets() {
            rowsets
                .into_iter()
                .enumerate()
                .filter(|(idx, _)| idx % self.dop == self.driver_sequence)
                .map(|(_, r)| r)
                .collect()
        } else if self.driver_sequence == 0 {
            rowsets
        } else {
            Vec::new()
        }
    }

    fn in_cache_mode(&self) -> bool {
        self.lane_arbiter.is_some()
    }

    fn close_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
    }

    fn lane_end_chunk(&mut self) -> Chunk {
        self.lane_end_emitted = true;
        if let Some(arbiter) = &self.lane_arbiter {
            debug!(
                "{} tablet {} reached lane end, passthrough={}",
                self.name,
                self.tablet.id(),
                arbiter.in_passthrough_mode()
            );
        }
        Chunk::empty(self.schema.arrow_schema()).with_owner_info(ChunkOwnerInfo {
            owner_id: self.tablet.id(),
            is_last_chunk: true,
        })
    }
}

impl Operator for TabletScanOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Scan
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.mem_tracker = Some(tracker);
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        self.params.profile = Some(profiles.unique.clone());
        self.profiles = Some(profiles);
    }

    fn prepare(&mut self, _state: &RuntimeState) -> Result<()> {
        let rowsets = self.tablet.capture_consistent_rowsets(self.version)?;
        let rowsets = self.assigned_rowsets(rowsets);
        debug!(
            "{} driver {}/{} reads {} rowsets of tablet {} at version {}",
            self.name,
            self.driver_sequence,
            self.dop,
            rowsets.len(),
            self.tablet.id(),
            self.version
        );
        let mut reader = TabletReader::with_rowsets(
            Arc::clone(&self.tablet),
            self.version,
            self.schema.clone(),
            Some(rowsets),
        );
        reader.prepare()?;
        reader.open(&self.params)?;
        self.reader = Some(reader);
        Ok(())
    }

    fn need_input(&self) -> bool {
        false
    }

    fn has_output(&self) -> bool {
        if self.finished {
            return false;
        }
        if self.eos {
            return self.in_cache_mode() && !self.lane_end_emitted;
        }
        self.reader.is_some()
    }

    fn is_finished(&self) -> bool {
        self.finished || (self.eos && (!self.in_cache_mode() || self.lane_end_emitted))
    }

    fn push_chunk(&mut self, _state: &RuntimeState, _chunk: Chunk) -> Result<()> {
        Err(Status::internal("tablet scan operator does not accept input"))
    }

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>> {
        if self.finished {
            return Ok(None);
        }
        if self.eos {
            if self.in_cache_mode() && !self.lane_end_emitted {
                return Ok(Some(self.lane_end_chunk()));
            }
            return Ok(None);
        }
        if let Some(arbiter) = &self.lane_arbiter {
            if arbiter.acquire_lane(self.tablet.id()).is_none() {
                return Ok(None);
            }
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(Status::internal("tablet scan pulled before prepare"));
        };
        match reader.get_next()? {
            Some(mut chunk) => {
                state.check_mem_limit(&self.name)?;
                if let Some(tracker) = &self.mem_tracker {
                    chunk.transfer_to(tracker);
                }
                self.rows_read += chunk.len();
                if self.in_cache_mode() {
                    chunk = chunk.with_owner_info(ChunkOwnerInfo {
                        owner_id: self.tablet.id(),
                        is_last_chunk: false,
                    });
                }
                Ok(Some(chunk))
            }
            None => {
                self.eos = true;
                self.close_reader();
                if self.in_cache_mode() {
                    return Ok(Some(self.lane_end_chunk()));
                }
                Ok(None)
            }
        }
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<()> {
        self.finished = true;
        self.close_reader();
        Ok(())
    }

    fn set_finished(&mut self, _state: &RuntimeState) -> Result<()> {
        self.finished = true;
        self.close_reader();
        Ok(())
    }

    fn close(&mut self, _state: &RuntimeState) {
        self.close_reader();
        if let Some(profiles) = &self.profiles {
            profiles
                .unique
                .counter_set("RowsRead", TUnit::Unit, self.rows_read as i64);
        }
    }

    fn set_lane_arbiter(&mut self, arbiter: Arc<LaneArbiter>) {
        self.lane_arbiter = Some(arbiter);
    }

    fn set_cache_operator(&mut self, cache: OperatorSlot) {
        self.cache_operator = Some(cache);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::delta_writer::DeltaWriter;
    use crate::storage::schema::{AggregationType, LogicalType, TabletColumn, TabletSchema};
    use crate::storage::tablet::Tablet;
    use arrow::array::{Int32Array, Int64Array};

    fn dup_tablet_with_rowsets(n: i64) -> TabletSharedPtr {
        let schema = TabletSchema::new(
            KeysType::DupKeys,
            vec![
                TabletColumn::key("k", LogicalType::Int32),
                TabletColumn::value("v", LogicalType::Int64, AggregationType::None),
            ],
        )
        .unwrap();
        let tablet = Arc::new(Tablet::new(7, schema));
        for i in 0..n {
            let chunk = Chunk::try_new(
                tablet.schema().arrow_schema(),
                vec![
                    Arc::new(Int32Array::from(vec![i as i32 * 10, i as i32 * 10 + 1])),
                    Arc::new(Int64Array::from(vec![1, 2])),
                ],
            )
            .unwrap();
            let mut writer = DeltaWriter::new(Arc::clone(&tablet), 100 + i);
            writer.open().unwrap();
            writer.write(&chunk, &[0, 1]).unwrap();
            writer.finish().unwrap();
            writer.close();
            tablet.publish_version(1 + i, 2 + i, &[100 + i]).unwrap();
        }
        tablet
    }

    fn drain(op: &mut Box<dyn Operator>, state: &RuntimeState) -> (usize, usize) {
        let (mut rows, mut chunks) = (0, 0);
        while !op.is_finished() {
            if let Some(chunk) = op.pull_chunk(state).unwrap() {
                rows += chunk.len();
                chunks += 1;
            }
        }
        (rows, chunks)
    }

    #[test]
    fn duplicate_key_rowsets_split_across_drivers() {
        let tablet = dup_tablet_with_rowsets(3);
        let state = RuntimeState::default();
        let factory = TabletScanFactory::new(
            Arc::clone(&tablet),
            4,
            Schema::all(tablet.schema()),
            TabletReaderParams::default(),
            0,
        );
        let mut total = 0;
        for seq in 0..2 {
            let mut op = factory.create(2, seq);
            op.prepare(&state).unwrap();
            total += drain(&mut op, &state).0;
            op.close(&state);
        }
        assert_eq!(total, 6);
    }

    #[test]
    fn cache_mode_ends_lane_with_empty_last_chunk() {
        let tablet = dup_tablet_with_rowsets(1);
        let state = RuntimeState::default();
        let factory = TabletScanFactory::new(
            Arc::clone(&tablet),
            2,
            Schema::all(tablet.schema()),
            TabletReaderParams::default(),
            0,
        );
        let mut op = factory.create(1, 0);
        op.set_lane_arbiter(Arc::new(LaneArbiter::new(1)));
        op.prepare(&state).unwrap();
        let first = op.pull_chunk(&state).unwrap().unwrap();
        assert_eq!(first.owner_info().owner_id, 7);
        assert!(!first.owner_info().is_last_chunk);
        let last = op.pull_chunk(&state).unwrap().unwrap();
        assert!(last.is_empty());
        assert!(last.owner_info().is_last_chunk);
        assert!(op.is_finished());
    }
}
