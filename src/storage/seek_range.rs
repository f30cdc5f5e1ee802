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
//! Key ranges for seeking inside sorted segments.

use std::cmp::Ordering;

use crate::common::status::{Result, Status};
use crate::storage::datum::{Datum, compare_prefix};
use crate::storage::schema::{LogicalType, TabletSchema};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RangeStartOperation {
    Gt,
    #[default]
    Ge,
    Eq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RangeEndOperation {
    Lt,
    #[default]
    Le,
    Eq,
}

/// Untyped key tuple as received from the planner. `None` is a NULL component.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OlapTuple {
    values: Vec<Option<String>>,
}

impl OlapTuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(|v| Some(v.into())).collect(),
        }
    }

    pub fn push(&mut self, value: impl Into<String>) {
        self.values.push(Some(value.into()));
    }

    pub fn push_null(&mut self) {
        self.values.push(None);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_null(&self, idx: usize) -> bool {
        matches!(self.values.get(idx), Some(None))
    }

    pub fn get_value(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }
}

/// Key tuple typed by the leading key columns of the tablet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeekTuple {
    values: Vec<Datum>,
}

impl SeekTuple {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Converts an untyped tuple into datums. CHAR components are parsed as VARCHAR since
/// the execution layer compares CHAR values as variable-width strings.
pub fn to_seek_tuple(schema: &TabletSchema, input: &OlapTuple) -> Result<SeekTuple> {
    if input.len() > schema.num_key_columns() {
        return Err(Status::invalid_argument(format!(
            "seek tuple has {} components but the tablet has {} key columns",
            input.len(),
            schema.num_key_columns()
        )));
    }
    let mut values = Vec::with_capacity(input.len());
    for i in 0..input.len() {
        let Some(raw) = input.get_value(i) else {
            values.push(Datum::Null);
            continue;
        };
        let logical_type = match schema.column(i).logical_type {
            LogicalType::Char => LogicalType::Varchar,
            other => other,
        };
        values.push(Datum::from_string(logical_type, raw)?);
    }
    Ok(SeekTuple::new(values))
}

/// Key interval; an empty bound is unbounded on that side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeekRange {
    lower: SeekTuple,
    upper: SeekTuple,
    inclusive_lower: bool,
    inclusive_upper: bool,
}

impl SeekRange {
    pub fn new(lower: SeekTuple, upper: SeekTuple) -> Self {
        Self {
            lower,
            upper,
            inclusive_lower: true,
            inclusive_upper: false,
        }
    }

    pub fn with_inclusive(mut self, lower: bool, upper: bool) -> Self {
        self.inclusive_lower = lower;
        self.inclusive_upper = upper;
        self
    }

    pub fn lower(&self) -> &SeekTuple {
        &self.lower
    }

    pub fn upper(&self) -> &SeekTuple {
        &self.upper
    }

    pub fn inclusive_lower(&self) -> bool {
        self.inclusive_lower
    }

    pub fn inclusive_upper(&self) -> bool {
        self.inclusive_upper
    }

    /// Bounds compare against the matching prefix of `key`.
    pub fn contains(&self, key: &[Datum]) -> bool {
        if !self.lower.is_empty() {
            match compare_prefix(key, self.lower.values()) {
                Ordering::Less => return false,
                Ordering::Equal if !self.inclusive_lower => return false,
                _ => {}
            }
        }
        if !self.upper.is_empty() {
            match compare_prefix(key, self.upper.values()) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.inclusive_upper => return false,
                _ => {}
            }
        }
        true
    }
}

pub fn parse_seek_range(
    schema: &TabletSchema,
    start_op: RangeStartOperation,
    end_op: RangeEndOperation,
    start_keys: &[OlapTuple],
    end_keys: &[OlapTuple],
) -> Result<Vec<SeekRange>> {
    if start_keys.is_empty() {
        return Ok(Vec::new());
    }
    if start_keys.len() != end_keys.len() {
        return Err(Status::invalid_argument(format!(
            "start key count {} does not match end key count {}",
            start_keys.len(),
            end_keys.len()
        )));
    }
    let inclusive_lower = matches!(start_op, RangeStartOperation::Ge | RangeStartOperation::Eq);
    let inclusive_upper = matches!(end_op, RangeEndOperation::Le | RangeEndOperation::Eq);
    start_keys
        .iter()
        .zip(end_keys.iter())
        .map(|(start, end)| {
            let lower = to_seek_tuple(schema, start)?;
            let upper = to_seek_tuple(schema, end)?;
            Ok(SeekRange::new(lower, upper).with_inclusive(inclusive_lower, inclusive_upper))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{AggregationType, KeysType, TabletColumn};

    fn schema() -> TabletSchema {
        TabletSchema::new(
            KeysType::DupKeys,
            vec![
                TabletColumn::key("k1", LogicalType::Int32),
                TabletColumn::key("k2", LogicalType::Char),
                TabletColumn::value("v", LogicalType::Int64, AggregationType::None),
            ],
        )
        .unwrap()
    }

    #[test]
    fn inclusivity_follows_operators() {
        let s = schema();
        let ranges = parse_seek_range(
            &s,
            RangeStartOperation::Gt,
            RangeEndOperation::Le,
            &[OlapTuple::from_values(["3"])],
            &[OlapTuple::from_values(["5"])],
        )
        .unwrap();
        assert_eq!(ranges.len(), 1);
        let r = &ranges[0];
        assert!(!r.contains(&[Datum::Int32(3), Datum::String("a".into())]));
        assert!(r.contains(&[Datum::Int32(4), Datum::String("a".into())]));
        assert!(r.contains(&[Datum::Int32(5), Datum::String("z".into())]));
        assert!(!r.contains(&[Datum::Int32(6), Datum::String("a".into())]));
    }

    #[test]
    fn char_keys_parse_as_strings_and_nulls_stay_null() {
        let s = schema();
        let mut t = OlapTuple::new();
        t.push_null();
        t.push("ab");
        let tuple = to_seek_tuple(&s, &t).unwrap();
        assert_eq!(
            tuple.values(),
            &[Datum::Null, Datum::String("ab".into())]
        );
    }

    #[test]
    fn mismatched_or_empty_keys() {
        let s = schema();
        let err = parse_seek_range(
            &s,
            RangeStartOperation::Ge,
            RangeEndOperation::Le,
            &[OlapTuple::from_values(["1"])],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
        let none = parse_seek_range(
            &s,
            RangeStartOperation::Ge,
            RangeEndOperation::Le,
            &[],
            &[],
        )
        .unwrap();
        assert!(none.is_empty());
    }
}
