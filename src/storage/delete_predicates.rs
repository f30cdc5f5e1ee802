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
//! Versioned delete conditions.
//!
//! Responsibilities:
//! - Parses textual delete conditions (`k1>>3`, `k2*=a,b`, `v IS NULL`) into column predicates.
//! - Groups each delete job's conditions into one conjunction tagged with the job's version.
//!
//! Key exported interfaces:
//! - Types: `DeletePredicate`, `InPredicate`, `DeleteCondition`, `DeletePredicates`.
//! - Functions: `parse_condition`, `init_delete_predicates`.
//!
//! Current limitations:
//! - A condition that cannot be parsed is skipped with a warning; the rest of the job applies.

use std::sync::OnceLock;

use regex::Regex;

use crate::common::status::{Result, Status};
use crate::novacore_logging::warn;
use crate::storage::column_predicate::{ColumnPredicate, ConjunctivePredicates, PredicateOp};
use crate::storage::datum::Datum;
use crate::storage::schema::{KeysType, TabletSchema};

/// Structured `IN`/`NOT IN` condition recorded by a delete job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InPredicate {
    pub column_name: String,
    pub is_not_in: bool,
    pub values: Vec<String>,
}

/// One delete job as stored in the tablet header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletePredicate {
    pub version: i64,
    pub sub_predicates: Vec<String>,
    pub in_predicates: Vec<InPredicate>,
}

impl DeletePredicate {
    pub fn new(version: i64, sub_predicates: Vec<String>) -> Self {
        Self {
            version,
            sub_predicates,
            in_predicates: Vec::new(),
        }
    }

    pub fn with_in_predicate(mut self, predicate: InPredicate) -> Self {
        self.in_predicates.push(predicate);
        self
    }
}

/// A parsed condition before it is bound to a column type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteCondition {
    pub column_name: String,
    pub op: PredicateOp,
    pub values: Vec<String>,
}

fn condition_regex() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*`?([^\s`!*=<>]+)`?\s*(!\*=|\*=|!=|<=|>=|<<|>>|=)\s*(.*?)\s*$")
    })
    .as_ref()
    .map_err(|e| Status::internal(format!("invalid delete condition pattern: {e}")))
}

fn null_condition_regex() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*`?([^\s`]+)`?\s+IS\s+(NOT\s+)?NULL\s*$"))
        .as_ref()
        .map_err(|e| Status::internal(format!("invalid delete condition pattern: {e}")))
}

fn unquote(raw: &str) -> String {
    let v = raw.trim();
    let quoted = v.len() >= 2
        && ((v.starts_with('\'') && v.ends_with('\'')) || (v.starts_with('"') && v.ends_with('"')));
    if quoted {
        v[1..v.len() - 1].to_string()
    } else {
        v.to_string()
    }
}

/// Parses one textual condition. Returns `Ok(None)` for text that is not a condition.
pub fn parse_condition(condition: &str) -> Result<Option<DeleteCondition>> {
    if let Some(caps) = null_condition_regex()?.captures(condition) {
        let op = if caps.get(2).is_some() {
            PredicateOp::NotNull
        } else {
            PredicateOp::IsNull
        };
        return Ok(Some(DeleteCondition {
            column_name: caps[1].to_string(),
            op,
            values: Vec::new(),
        }));
    }
    let Some(caps) = condition_regex()?.captures(condition) else {
        return Ok(None);
    };
    let op = match &caps[2] {
        "=" => PredicateOp::Eq,
        "!=" => PredicateOp::Ne,
        "<<" => PredicateOp::Lt,
        ">>" => PredicateOp::Gt,
        "<=" => PredicateOp::Le,
        ">=" => PredicateOp::Ge,
        "*=" => PredicateOp::In,
        "!*=" => PredicateOp::NotIn,
        _ => return Ok(None),
    };
    let raw = &caps[3];
    if raw.is_empty() {
        return Ok(None);
    }
    let values = match op {
        PredicateOp::In | PredicateOp::NotIn => raw.split(',').map(unquote).collect(),
        _ => vec![unquote(raw)],
    };
    Ok(Some(DeleteCondition {
        column_name: caps[1].to_string(),
        op,
        values,
    }))
}

fn bind_condition(schema: &TabletSchema, cond: &DeleteCondition) -> Option<ColumnPredicate> {
    let Some(idx) = schema.field_index(&cond.column_name) else {
        warn!("ignore delete condition of unknown column: {}", cond.column_name);
        return None;
    };
    let logical_type = schema.column(idx).logical_type;
    let mut values = Vec::with_capacity(cond.values.len());
    for raw in &cond.values {
        match Datum::from_string(logical_type, raw) {
            Ok(v) => values.push(v),
            Err(e) => {
                warn!(
                    "failed to parse delete condition column={}, op={:?}, value={}: {}",
                    cond.column_name, cond.op, raw, e
                );
                return None;
            }
        }
    }
    Some(ColumnPredicate::new(idx, cond.op, values))
}

fn is_key_condition(schema: &TabletSchema, column_name: &str) -> bool {
    match schema.field_index(column_name) {
        Some(idx) => idx < schema.num_key_columns(),
        None => false,
    }
}

/// Delete conjunctions of a tablet, each tagged with the version of its delete job.
#[derive(Clone, Debug, Default)]
pub struct DeletePredicates {
    entries: Vec<(i64, ConjunctivePredicates)>,
}

impl DeletePredicates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, version: i64, conjunctions: ConjunctivePredicates) {
        self.entries.push((version, conjunctions));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Conjunctions newer than `rowset_version`; older deletes never touch later data.
    pub fn get_predicates(&self, rowset_version: i64) -> Vec<&ConjunctivePredicates> {
        self.entries
            .iter()
            .filter(|(version, _)| *version > rowset_version)
            .map(|(_, conj)| conj)
            .collect()
    }

    pub fn is_deleted(&self, row: &[Datum], rowset_version: i64) -> bool {
        self.entries
            .iter()
            .any(|(version, conj)| *version > rowset_version && conj.evaluate_row(row))
    }
}

/// Builds delete conjunctions for a read at `read_version`.
pub fn init_delete_predicates(
    schema: &TabletSchema,
    predicates: &[DeletePredicate],
    read_version: i64,
) -> Result<DeletePredicates> {
    let mut dels = DeletePredicates::new();
    for pred in predicates {
        if pred.version > read_version {
            continue;
        }
        let mut conjunctions = ConjunctivePredicates::new();
        for text in &pred.sub_predicates {
            let Some(cond) = parse_condition(text)? else {
                warn!("invalid delete condition: {}", text);
                continue;
            };
            if schema.keys_type() != KeysType::DupKeys
                && !is_key_condition(schema, &cond.column_name)
            {
                warn!("ignore delete condition of non-key column: {}", text);
                continue;
            }
            if let Some(p) = bind_condition(schema, &cond) {
                conjunctions.add(p);
            }
        }
        for in_pred in &pred.in_predicates {
            let cond = DeleteCondition {
                column_name: in_pred.column_name.clone(),
                op: if in_pred.is_not_in {
                    PredicateOp::NotIn
                } else {
                    PredicateOp::In
                },
                values: in_pred.values.clone(),
            };
            if schema.keys_type() != KeysType::DupKeys
                && !is_key_condition(schema, &cond.column_name)
            {
                warn!(
                    "ignore in-predicate delete condition of non-key column: {}",
                    cond.column_name
                );
                continue;
            }
            if let Some(p) = bind_condition(schema, &cond) {
                conjunctions.add(p);
            }
        }
        if conjunctions.is_empty() {
            warn!(
                "delete predicate at version {} has no usable condition, ignored",
                pred.version
            );
            continue;
        }
        dels.add(pred.version, conjunctions);
    }
    Ok(dels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{AggregationType, LogicalType, TabletColumn};

    fn agg_schema() -> TabletSchema {
        TabletSchema::new(
            KeysType::AggKeys,
            vec![
                TabletColumn::key("k1", LogicalType::Int32),
                TabletColumn::key("k2", LogicalType::Varchar),
                TabletColumn::value("v", LogicalType::Int64, AggregationType::Sum),
            ],
        )
        .unwrap()
    }

    #[test]
    fn parses_operators() {
        let c = parse_condition("k1>>3").unwrap().unwrap();
        assert_eq!(c.op, PredicateOp::Gt);
        assert_eq!(c.values, vec!["3".to_string()]);
        let c = parse_condition("k1 <= 10").unwrap().unwrap();
        assert_eq!(c.op, PredicateOp::Le);
        let c = parse_condition("k2!*='a', 'b'").unwrap().unwrap();
        assert_eq!(c.op, PredicateOp::NotIn);
        assert_eq!(c.values, vec!["a".to_string(), "b".to_string()]);
        let c = parse_condition("k2 is not null").unwrap().unwrap();
        assert_eq!(c.op, PredicateOp::NotNull);
        assert!(parse_condition("garbage").unwrap().is_none());
        assert!(parse_condition("k1=").unwrap().is_none());
    }

    #[test]
    fn skips_bad_and_value_conditions() {
        let schema = agg_schema();
        let preds = vec![
            DeletePredicate::new(2, vec!["k1>>3".into(), "garbage".into(), "v=1".into()]),
            DeletePredicate::new(3, vec!["v=1".into()]),
            DeletePredicate::new(9, vec!["k1=1".into()]),
        ];
        let dels = init_delete_predicates(&schema, &preds, 5).unwrap();
        assert_eq!(dels.len(), 1);
        let conj = dels.get_predicates(1);
        assert_eq!(conj.len(), 1);
        assert_eq!(conj[0].len(), 1);
        assert!(dels.get_predicates(2).is_empty());
    }

    #[test]
    fn unknown_column_is_dropped_from_duplicate_key_conjunction() {
        let schema = TabletSchema::new(
            KeysType::DupKeys,
            vec![
                TabletColumn::key("k1", LogicalType::Int32),
                TabletColumn::value("v", LogicalType::Int64, AggregationType::None),
            ],
        )
        .unwrap();
        let preds = vec![
            DeletePredicate::new(2, vec!["gone=1".into(), "v>>5".into()]),
            DeletePredicate::new(3, vec!["gone*=1,2".into()]),
        ];
        let dels = init_delete_predicates(&schema, &preds, 5).unwrap();
        assert_eq!(dels.len(), 1);
        let conj = dels.get_predicates(1);
        assert_eq!(conj[0].len(), 1);
        assert!(dels.is_deleted(&[Datum::Int32(1), Datum::Int64(6)], 1));
        assert!(!dels.is_deleted(&[Datum::Int32(1), Datum::Int64(5)], 1));
    }

    #[test]
    fn in_predicates_join_the_conjunction() {
        let schema = agg_schema();
        let preds = vec![DeletePredicate::new(4, vec!["k1>=2".into()]).with_in_predicate(
            InPredicate {
                column_name: "k2".into(),
                is_not_in: false,
                values: vec!["x".into()],
            },
        )];
        let dels = init_delete_predicates(&schema, &preds, 4).unwrap();
        let row = vec![Datum::Int32(2), Datum::String("x".into()), Datum::Int64(0)];
        assert!(dels.is_deleted(&row, 3));
        assert!(!dels.is_deleted(&row, 4));
        let other = vec![Datum::Int32(2), Datum::String("y".into()), Datum::Int64(0)];
        assert!(!dels.is_deleted(&other, 3));
    }
}
