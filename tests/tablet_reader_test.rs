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
//! Tablet write, read, delete and compaction integration tests.

mod common;

use std::sync::Arc;

use novacore::common::status::{Result, Status};
use novacore::exec::chunk::Chunk;
use novacore::exec::operators::{ResultSinkFactory, ResultSinkHandle, TabletScanFactory};
use novacore::exec::pipeline::executor::execute_fragment_on;
use novacore::exec::pipeline::driver::ScheduleBudget;
use novacore::exec::pipeline::global_driver_executor::DriverExecutor;
use novacore::exec::pipeline::pipeline::Pipeline;
use novacore::runtime::profile::RuntimeProfile;
use novacore::storage::column_predicate::ColumnPredicate;
use novacore::storage::compaction::CompactionStats;
use novacore::storage::datum::{Datum, build_array, datum_at};
use novacore::storage::delete_predicates::InPredicate;
use novacore::storage::rowset::RowidRangeOption;
use novacore::storage::seek_range::{OlapTuple, RangeEndOperation, RangeStartOperation};
use novacore::storage::tablet::{TxnLog, TxnLogOp};
use novacore::storage::{
    AggregationType, ChunkIterator, CompactionAlgorithm, DeltaWriter, KeysType, LogicalType,
    ReaderType, Schema, TabletColumn, TabletManager, TabletReader, TabletReaderParams,
    TabletSchema, TabletSharedPtr,
};

fn kv_schema(keys_type: KeysType, aggregation: AggregationType) -> TabletSchema {
    TabletSchema::new(
        keys_type,
        vec![
            TabletColumn::key("k", LogicalType::Int32),
            TabletColumn::value("v", LogicalType::Int64, aggregation),
        ],
    )
    .unwrap()
}

fn kv(k: i32, v: i64) -> Vec<Datum> {
    vec![Datum::Int32(k), Datum::Int64(v)]
}

fn rows_chunk(schema: &TabletSchema, rows: &[Vec<Datum>]) -> Chunk {
    let columns = (0..schema.num_columns())
        .map(|c| {
            let values: Vec<Datum> = rows.iter().map(|r| r[c].clone()).collect();
            build_array(schema.column(c).logical_type, &values).unwrap()
        })
        .collect();
    Chunk::try_new(schema.arrow_schema(), columns).unwrap()
}

fn drain(iter: &mut dyn ChunkIterator) -> Result<Vec<Vec<Datum>>> {
    let schema = iter.schema().clone();
    let mut rows = Vec::new();
    while let Some(chunk) = iter.get_next()? {
        for row in 0..chunk.len() {
            let mut values = Vec::with_capacity(schema.num_fields());
            for (idx, field) in schema.fields().iter().enumerate() {
                values.push(datum_at(chunk.column(idx).as_ref(), field.logical_type, row)?);
            }
            rows.push(values);
        }
    }
    Ok(rows)
}

fn sorted(mut rows: Vec<Vec<Datum>>) -> Vec<Vec<Datum>> {
    rows.sort();
    rows
}

fn read_with(
    tablet: &TabletSharedPtr,
    version: i64,
    params: &TabletReaderParams,
) -> Result<Vec<Vec<Datum>>> {
    let mut reader = TabletReader::new(Arc::clone(tablet), version, Schema::all(tablet.schema()));
    reader.prepare()?;
    reader.open(params)?;
    let rows = drain(&mut reader)?;
    reader.close();
    Ok(rows)
}

/// One tablet plus the versions published into it.
struct TabletFixture {
    mgr: TabletManager,
    tablet: TabletSharedPtr,
    version: i64,
    next_txn: i64,
}

impl TabletFixture {
    fn new(schema: TabletSchema) -> Self {
        let mgr = TabletManager::new();
        let tablet = mgr.create_tablet(10001, schema).unwrap();
        Self {
            mgr,
            tablet,
            version: 1,
            next_txn: 1000,
        }
    }

    fn next_txn(&mut self) -> i64 {
        self.next_txn += 1;
        self.next_txn
    }

    fn publish(&mut self, txn_id: i64) {
        self.mgr
            .publish_version(self.tablet.id(), self.version, self.version + 1, &[txn_id])
            .unwrap();
        self.version += 1;
    }

    fn write(&mut self, rows: &[Vec<Datum>]) {
        let txn_id = self.next_txn();
        let chunk = rows_chunk(self.tablet.schema(), rows);
        let indexes: Vec<u32> = (0..chunk.len() as u32).collect();
        let mut writer = DeltaWriter::new(Arc::clone(&self.tablet), txn_id);
        writer.open().unwrap();
        writer.write(&chunk, &indexes).unwrap();
        writer.finish().unwrap();
        writer.close();
        self.publish(txn_id);
    }

    fn delete(&mut self, conditions: &[&str]) {
        let txn_id = self.next_txn();
        self.mgr
            .delete_data(
                self.tablet.id(),
                txn_id,
                conditions.iter().map(|c| c.to_string()).collect(),
                vec![],
            )
            .unwrap();
        self.publish(txn_id);
    }

    fn compact(&mut self, algorithm: CompactionAlgorithm, max_columns: usize) -> CompactionStats {
        let txn_id = self.next_txn();
        let mut task = self
            .mgr
            .compact(self.tablet.id(), self.version, txn_id)
            .unwrap()
            .with_max_columns_per_group(max_columns)
            .with_algorithm(algorithm);
        let stats = task.execute().unwrap();
        self.publish(txn_id);
        stats
    }

    fn read(&self) -> Vec<Vec<Datum>> {
        read_with(&self.tablet, self.version, &TabletReaderParams::default()).unwrap()
    }

    fn num_rowsets(&self) -> usize {
        self.tablet.latest_metadata().rowsets.len()
    }
}

fn key_block(start: i32, len: i32, value_offset: i64) -> Vec<Vec<Datum>> {
    (start..start + len)
        .map(|k| kv(k, k as i64 + value_offset))
        .collect()
}

#[test]
fn primary_key_disjoint_writes_keep_every_row() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::PrimaryKeys, AggregationType::None));
    for round in 0..3 {
        f.write(&key_block(round * 12, 12, 0));
    }
    let rows = sorted(f.read());
    assert_eq!(rows.len(), 36);
    assert_eq!(rows, key_block(0, 36, 0));
}

#[test]
fn primary_key_overwrites_keep_latest_value() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::PrimaryKeys, AggregationType::None));
    for round in 1..=3 {
        f.write(&key_block(0, 12, 100 * round));
    }
    assert_eq!(sorted(f.read()), key_block(0, 12, 300));

    let first = read_with(&f.tablet, 2, &TabletReaderParams::default()).unwrap();
    assert_eq!(sorted(first), key_block(0, 12, 100));
}

#[test]
fn primary_key_compaction_leaves_one_rowset() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::PrimaryKeys, AggregationType::None));
    for round in 1..=3 {
        f.write(&key_block(0, 12, 100 * round));
    }
    assert_eq!(f.num_rowsets(), 3);
    let stats = f.compact(CompactionAlgorithm::Horizontal, 5);
    assert_eq!(stats.input_rowsets, 3);
    assert_eq!(stats.output_rows, 12);
    assert_eq!(f.num_rowsets(), 1);
    assert_eq!(sorted(f.read()), key_block(0, 12, 300));

    f.write(&key_block(6, 12, 1000));
    let mut expected = key_block(0, 6, 300);
    expected.extend(key_block(6, 12, 1000));
    assert_eq!(sorted(f.read()), expected);
}

#[test]
fn duplicate_key_union_returns_all_rows() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    let mut expected = Vec::new();
    for round in 0..4 {
        let rows = key_block(round * 5, 5, round as i64);
        expected.extend(rows.clone());
        f.write(&rows);
    }
    f.write(&[kv(0, 7), kv(0, 7)]);
    expected.push(kv(0, 7));
    expected.push(kv(0, 7));

    let rows = f.read();
    assert_eq!(rows.len(), 22);
    assert_eq!(sorted(rows), sorted(expected));
}

#[test]
fn sorted_by_keys_merges_duplicate_key_rowsets_in_order() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&[kv(1, 0), kv(5, 0), kv(9, 0)]);
    f.write(&[kv(2, 0), kv(6, 0)]);
    f.write(&[kv(0, 0), kv(7, 0)]);
    let params = TabletReaderParams {
        sorted_by_keys_per_tablet: true,
        ..TabletReaderParams::default()
    };
    let keys: Vec<Datum> = read_with(&f.tablet, f.version, &params)
        .unwrap()
        .into_iter()
        .map(|r| r[0].clone())
        .collect();
    let expected: Vec<Datum> = [0, 1, 2, 5, 6, 7, 9].into_iter().map(Datum::Int32).collect();
    assert_eq!(keys, expected);
}

#[test]
fn aggregate_key_rows_fold_into_one() {
    let _cfg = common::setup();
    let schema = TabletSchema::new(
        KeysType::AggKeys,
        vec![
            TabletColumn::key("k", LogicalType::Int32),
            TabletColumn::value("total", LogicalType::Int64, AggregationType::Sum),
            TabletColumn::value("hi", LogicalType::Int64, AggregationType::Max),
            TabletColumn::value("lo", LogicalType::Int64, AggregationType::Min),
        ],
    )
    .unwrap();
    let mut f = TabletFixture::new(schema);
    let row = |k: i32, v: i64| vec![Datum::Int32(k), Datum::Int64(v), Datum::Int64(v), Datum::Int64(v)];
    f.write(&[row(1, 10), row(2, 5)]);
    f.write(&[row(1, 32), row(3, 1)]);

    let rows = f.read();
    assert_eq!(
        rows,
        vec![
            vec![Datum::Int32(1), Datum::Int64(42), Datum::Int64(32), Datum::Int64(10)],
            row(2, 5),
            row(3, 1),
        ]
    );
}

#[test]
fn aggregate_key_writer_folds_rows_of_one_load() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::AggKeys, AggregationType::Sum));
    f.write(&[kv(4, 1), kv(4, 2), kv(3, 9), kv(4, 3)]);
    assert_eq!(f.read(), vec![kv(3, 9), kv(4, 6)]);
}

#[test]
fn aggregate_key_skip_aggregation_pre_aggregates_each_rowset() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::AggKeys, AggregationType::Sum));
    f.write(&[kv(1, 1), kv(2, 2)]);
    f.write(&[kv(1, 10), kv(2, 20)]);
    let profile = RuntimeProfile::new("skip_aggregation");
    let params = TabletReaderParams {
        skip_aggregation: true,
        profile: Some(profile.clone()),
        ..TabletReaderParams::default()
    };
    let rows = read_with(&f.tablet, f.version, &params).unwrap();
    assert_eq!(rows, vec![kv(1, 1), kv(2, 2), kv(1, 10), kv(2, 20)]);
    assert!(profile.get_counter("Union").is_some());
    assert!(profile.get_counter("Aggr").is_some());
    assert!(profile.get_counter("Sort").is_none());

    let full = read_with(&f.tablet, f.version, &TabletReaderParams::default()).unwrap();
    assert_eq!(full, vec![kv(1, 11), kv(2, 22)]);
}

#[test]
fn unique_key_keeps_last_write_unless_aggregation_skipped() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::UniqueKeys, AggregationType::None));
    f.write(&key_block(0, 4, 0));
    f.write(&key_block(0, 4, 50));
    assert_eq!(f.read(), key_block(0, 4, 50));

    let params = TabletReaderParams {
        skip_aggregation: true,
        ..TabletReaderParams::default()
    };
    let rows = read_with(&f.tablet, f.version, &params).unwrap();
    assert_eq!(rows.len(), 8);
}

#[test]
fn delete_predicates_hide_only_older_rows() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 10, 0));
    f.delete(&["k<<3"]);
    assert_eq!(sorted(f.read()), key_block(3, 7, 0));

    f.write(&[kv(1, 100)]);
    let mut expected = vec![kv(1, 100)];
    expected.extend(key_block(3, 7, 0));
    assert_eq!(sorted(f.read()), expected);

    let before_delete = read_with(&f.tablet, 2, &TabletReaderParams::default()).unwrap();
    assert_eq!(before_delete.len(), 10);
}

#[test]
fn delete_conditions_form_a_conjunction() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 10, 0));
    f.delete(&["k>=2", "k<=4"]);
    let keys: Vec<Datum> = sorted(f.read()).into_iter().map(|r| r[0].clone()).collect();
    let expected: Vec<Datum> = [0, 1, 5, 6, 7, 8, 9].into_iter().map(Datum::Int32).collect();
    assert_eq!(keys, expected);
}

#[test]
fn in_and_null_delete_conditions() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&[kv(1, 1), kv(2, 2), kv(3, 3), vec![Datum::Int32(4), Datum::Null]]);
    f.delete(&["k*=1,3"]);
    assert_eq!(f.read().len(), 2);
    f.delete(&["v IS NULL"]);
    assert_eq!(f.read(), vec![kv(2, 2)]);

    let txn_id = f.next_txn();
    f.mgr
        .delete_data(
            f.tablet.id(),
            txn_id,
            vec![],
            vec![InPredicate {
                column_name: "k".to_string(),
                is_not_in: true,
                values: vec!["7".to_string()],
            }],
        )
        .unwrap();
    f.publish(txn_id);
    assert!(f.read().is_empty());
}

#[test]
fn malformed_delete_condition_is_skipped() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 10, 0));
    let txn_id = f.next_txn();
    f.tablet.put_txn_log(TxnLog {
        txn_id,
        op: TxnLogOp::Delete {
            sub_predicates: vec!["k ~~ 3".to_string(), "k>>7".to_string()],
            in_predicates: vec![],
        },
    });
    f.publish(txn_id);
    assert_eq!(sorted(f.read()), key_block(0, 8, 0));

    let txn_id = f.next_txn();
    f.tablet.put_txn_log(TxnLog {
        txn_id,
        op: TxnLogOp::Delete {
            sub_predicates: vec!["not a condition".to_string()],
            in_predicates: vec![],
        },
    });
    f.publish(txn_id);
    assert_eq!(f.read().len(), 8);
}

#[test]
fn delete_job_is_validated_on_submit() {
    let _cfg = common::setup();
    let f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    let err = assert_err!(f.mgr.delete_data(f.tablet.id(), 1, vec!["k ~~ 3".to_string()], vec![]));
    assert!(matches!(err, Status::InvalidArgument(_)));
    let err = assert_err!(f.mgr.delete_data(f.tablet.id(), 2, vec!["missing=3".to_string()], vec![]));
    assert!(matches!(err, Status::InvalidArgument(_)));
    let err = assert_err!(f.mgr.delete_data(f.tablet.id(), 3, vec![], vec![]));
    assert!(matches!(err, Status::InvalidArgument(_)));
}

#[test]
fn non_key_delete_condition_ignored_for_aggregate_tables() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::AggKeys, AggregationType::Sum));
    f.write(&key_block(0, 5, 0));
    f.delete(&["v>=0"]);
    assert_eq!(f.read().len(), 5);
    f.delete(&["k=4"]);
    assert_eq!(f.read().len(), 4);
}

#[test]
fn seek_ranges_restrict_keys() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 5, 0));
    f.write(&key_block(5, 5, 0));
    let params = TabletReaderParams {
        range: RangeStartOperation::Ge,
        end_range: RangeEndOperation::Lt,
        start_key: vec![OlapTuple::from_values(["3"])],
        end_key: vec![OlapTuple::from_values(["7"])],
        ..TabletReaderParams::default()
    };
    let rows = read_with(&f.tablet, f.version, &params).unwrap();
    assert_eq!(sorted(rows), key_block(3, 4, 0));

    let params = TabletReaderParams {
        range: RangeStartOperation::Gt,
        end_range: RangeEndOperation::Le,
        start_key: vec![OlapTuple::from_values(["3"]), OlapTuple::from_values(["8"])],
        end_key: vec![OlapTuple::from_values(["4"]), OlapTuple::from_values(["9"])],
        ..TabletReaderParams::default()
    };
    let rows = read_with(&f.tablet, f.version, &params).unwrap();
    assert_eq!(sorted(rows), vec![kv(4, 4), kv(9, 9)]);
}

#[test]
fn mismatched_seek_keys_are_rejected() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 5, 0));
    let params = TabletReaderParams {
        start_key: vec![OlapTuple::from_values(["1"])],
        end_key: vec![],
        ..TabletReaderParams::default()
    };
    let err = assert_err!(read_with(&f.tablet, f.version, &params));
    assert!(matches!(err, Status::InvalidArgument(_)));
}

#[test]
fn column_predicates_filter_rows_and_count_stats() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 10, 0));
    f.write(&key_block(10, 10, 0));
    let params = TabletReaderParams {
        predicates: vec![
            ColumnPredicate::ge(1, Datum::Int64(5)),
            ColumnPredicate::lt(0, Datum::Int32(12)),
        ],
        ..TabletReaderParams::default()
    };
    let mut reader = TabletReader::new(
        Arc::clone(&f.tablet),
        f.version,
        Schema::all(f.tablet.schema()),
    );
    assert_ok!(reader.prepare());
    assert_ok!(reader.open(&params));
    let rows = assert_ok!(drain(&mut reader));
    assert_eq!(sorted(rows), key_block(5, 7, 0));
    let stats = reader.stats();
    assert_eq!(stats.rowsets_read, 2);
    assert_eq!(stats.segments_read, 2);
    assert_eq!(stats.raw_rows_read, 20);
    assert_eq!(stats.rows_pred_filtered, 13);
    reader.close();
}

#[test]
fn rowid_ranges_select_rows_of_one_rowset() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 10, 0));
    f.write(&key_block(10, 10, 0));
    let rowset_id = f.tablet.latest_metadata().rowsets[1].id();
    let params = TabletReaderParams {
        rowid_range_option: Some(Arc::new(RowidRangeOption::new(rowset_id).add(0, 2..5))),
        ..TabletReaderParams::default()
    };
    let rows = read_with(&f.tablet, f.version, &params).unwrap();
    assert_eq!(sorted(rows), key_block(12, 3, 0));
}

#[test]
fn unsupported_reader_type_fails_open() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 3, 0));
    let params = TabletReaderParams::default().with_reader_type(ReaderType::Unsupported);
    let err = assert_err!(read_with(&f.tablet, f.version, &params));
    assert!(matches!(err, Status::NotSupported(_)));
    assert!(err.to_string().contains("not supported now"));
}

#[test]
fn missing_version_fails_prepare() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 3, 0));
    let mut reader = TabletReader::new(
        Arc::clone(&f.tablet),
        99,
        Schema::all(f.tablet.schema()),
    );
    let err = assert_err!(reader.prepare());
    assert!(matches!(err, Status::InternalError(_)));
    assert!(err.to_string().contains("fail to init reader"));
    assert!(reader.rowsets().is_empty());
}

#[test]
fn empty_tablet_reads_nothing() {
    let _cfg = common::setup();
    let f = TabletFixture::new(kv_schema(KeysType::AggKeys, AggregationType::Sum));
    assert!(f.read().is_empty());
}

#[test]
fn reader_pins_rowsets_until_close() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 3, 0));
    let rowset = Arc::clone(&f.tablet.latest_metadata().rowsets[0]);
    let profile = RuntimeProfile::new("reader");
    let params = TabletReaderParams {
        profile: Some(profile.clone()),
        ..TabletReaderParams::default()
    };
    let mut reader = TabletReader::new(
        Arc::clone(&f.tablet),
        f.version,
        Schema::all(f.tablet.schema()),
    );
    assert_ok!(reader.prepare());
    assert_eq!(rowset.num_readers(), 1);
    assert!(rowset.is_loaded());
    assert_ok!(reader.open(&params));
    assert_eq!(assert_ok!(drain(&mut reader)).len(), 3);
    reader.close();
    reader.close();
    assert_eq!(rowset.num_readers(), 0);
    assert_eq!(profile.get_counter("RowsetsReadCount").unwrap().value(), 1);
    assert!(profile.get_counter("TotalTime").is_some());
}

#[test]
fn vertical_and_horizontal_compaction_agree() {
    let _cfg = common::setup();
    let schema = TabletSchema::new(
        KeysType::AggKeys,
        vec![
            TabletColumn::key("k", LogicalType::Int32),
            TabletColumn::value("a", LogicalType::Int64, AggregationType::Sum),
            TabletColumn::value("b", LogicalType::Int64, AggregationType::Max),
            TabletColumn::value("c", LogicalType::Varchar, AggregationType::Replace),
        ],
    )
    .unwrap();
    assert_eq!(
        CompactionAlgorithm::choose(&schema, 2),
        CompactionAlgorithm::Vertical
    );
    let row = |k: i32, v: i64, s: &str| {
        vec![
            Datum::Int32(k),
            Datum::Int64(v),
            Datum::Int64(v * 2),
            Datum::String(s.to_string()),
        ]
    };
    let loads = [
        vec![row(1, 1, "a"), row(3, 3, "a"), row(5, 5, "a")],
        vec![row(1, 10, "b"), row(2, 2, "b")],
        vec![row(3, 30, "c"), row(5, 1, "c"), row(6, 6, "c")],
    ];

    let mut horizontal = TabletFixture::new(schema.clone());
    let mut vertical = TabletFixture::new(schema);
    for load in &loads {
        horizontal.write(load);
        vertical.write(load);
    }
    let before = horizontal.read();

    let h = horizontal.compact(CompactionAlgorithm::Horizontal, 2);
    let v = vertical.compact(CompactionAlgorithm::Vertical, 2);
    assert_eq!(h.column_groups, 1);
    assert_eq!(v.column_groups, 3);
    assert_eq!(h.output_rows, 5);
    assert_eq!(v.output_rows, 5);
    assert_eq!(horizontal.num_rowsets(), 1);
    assert_eq!(vertical.num_rowsets(), 1);

    let after_h = horizontal.read();
    let after_v = vertical.read();
    assert_eq!(after_h, before);
    assert_eq!(after_v, before);
    assert_eq!(after_v[0], vec![Datum::Int32(1), Datum::Int64(11), Datum::Int64(20), Datum::String("b".into())]);
}

#[test]
fn duplicate_key_vertical_compaction_keeps_rows() {
    let _cfg = common::setup();
    let schema = TabletSchema::new(
        KeysType::DupKeys,
        vec![
            TabletColumn::key("k", LogicalType::Int32),
            TabletColumn::value("a", LogicalType::Int64, AggregationType::None),
            TabletColumn::value("b", LogicalType::Varchar, AggregationType::None),
        ],
    )
    .unwrap();
    let mut f = TabletFixture::new(schema);
    let row = |k: i32, v: i64| vec![Datum::Int32(k), Datum::Int64(v), Datum::String(format!("r{v}"))];
    f.write(&[row(1, 1), row(4, 4)]);
    f.write(&[row(1, 2), row(3, 3)]);
    let before = sorted(f.read());
    let stats = f.compact(CompactionAlgorithm::Vertical, 1);
    assert_eq!(stats.output_rows, 4);
    assert_eq!(f.num_rowsets(), 1);
    assert_eq!(sorted(f.read()), before);
}

#[test]
fn compaction_keeps_later_deletes_effective() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    f.write(&key_block(0, 5, 0));
    f.write(&key_block(5, 5, 0));
    f.delete(&["k<<2"]);
    f.compact(CompactionAlgorithm::Horizontal, 5);
    assert_eq!(f.num_rowsets(), 1);
    assert_eq!(sorted(f.read()), key_block(2, 8, 0));
    f.delete(&["k>>8"]);
    assert_eq!(sorted(f.read()), key_block(2, 7, 0));
}

#[test]
fn tablet_scan_pipeline_reads_every_rowset() {
    let _cfg = common::setup();
    let mut f = TabletFixture::new(kv_schema(KeysType::DupKeys, AggregationType::None));
    for round in 0..3 {
        f.write(&key_block(round * 4, 4, 0));
    }
    let executor = assert_ok!(DriverExecutor::new(2));
    let ctx = common::fragment_ctx("tablet_scan_pipeline");
    let handle = ResultSinkHandle::new();
    let pipeline = Pipeline::new(
        0,
        vec![
            Box::new(TabletScanFactory::new(
                Arc::clone(&f.tablet),
                f.version,
                Schema::all(f.tablet.schema()),
                TabletReaderParams::default(),
                1,
            )),
            Box::new(ResultSinkFactory::new(handle.clone())),
        ],
        2,
    );
    assert_ok!(execute_fragment_on(
        &executor,
        ctx,
        vec![pipeline],
        ScheduleBudget::default(),
    ));
    let rows: usize = handle.take_chunks().iter().map(Chunk::len).sum();
    assert_eq!(rows, 12);
    for rowset in &f.tablet.latest_metadata().rowsets {
        assert_eq!(rowset.num_readers(), 0);
    }
}
