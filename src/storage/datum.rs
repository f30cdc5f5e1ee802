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
//! Row values.
//!
//! `Datum` is one cell of a row. It carries a total order (nulls first, floats by
//! `total_cmp`) so key tuples can be compared by merge iterators, seek ranges and
//! predicates without going back to arrow kernels.

use std::cmp::Ordering;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int32Array,
    Int32Builder, Int64Array, Int64Builder, StringArray, StringBuilder,
};

use crate::common::status::{Result, Status};
use crate::storage::schema::LogicalType;

#[derive(Clone, Debug)]
pub enum Datum {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int32(_) => 2,
            Datum::Int64(_) => 3,
            Datum::Float64(_) => 4,
            Datum::String(_) => 5,
        }
    }

    /// Parses a literal as a value of `logical_type`.
    pub fn from_string(logical_type: LogicalType, raw: &str) -> Result<Datum> {
        let invalid = || {
            Status::invalid_argument(format!(
                "invalid {:?} literal: {}",
                logical_type, raw
            ))
        };
        match logical_type {
            LogicalType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Datum::Bool(true)),
                "false" | "0" => Ok(Datum::Bool(false)),
                _ => Err(invalid()),
            },
            LogicalType::Int32 => raw
                .trim()
                .parse::<i32>()
                .map(Datum::Int32)
                .map_err(|_| invalid()),
            LogicalType::Int64 => raw
                .trim()
                .parse::<i64>()
                .map(Datum::Int64)
                .map_err(|_| invalid()),
            LogicalType::Float64 => raw
                .trim()
                .parse::<f64>()
                .map(Datum::Float64)
                .map_err(|_| invalid()),
            LogicalType::Char | LogicalType::Varchar => Ok(Datum::String(raw.to_string())),
        }
    }

    /// Appends a type-tagged encoding used as a hash key. Not order preserving.
    pub fn encode_to(&self, out: &mut Vec<u8>) {
        match self {
            Datum::Null => out.push(0),
            Datum::Bool(v) => {
                out.push(1);
                out.push(u8::from(*v));
            }
            Datum::Int32(v) => {
                out.push(2);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Datum::Int64(v) => {
                out.push(3);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Datum::Float64(v) => {
                out.push(4);
                out.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Datum::String(v) => {
                out.push(5);
                out.extend_from_slice(&(v.len() as u64).to_le_bytes());
                out.extend_from_slice(v.as_bytes());
            }
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Datum {}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Datum::Null, Datum::Null) => Ordering::Equal,
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Int32(a), Datum::Int32(b)) => a.cmp(b),
            (Datum::Int64(a), Datum::Int64(b)) => a.cmp(b),
            (Datum::Float64(a), Datum::Float64(b)) => a.total_cmp(b),
            (Datum::String(a), Datum::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Lexicographic comparison over the shorter of the two tuples.
pub fn compare_prefix(a: &[Datum], b: &[Datum]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

pub fn encode_key(values: &[Datum]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        value.encode_to(&mut out);
    }
    out
}

fn type_mismatch(logical_type: LogicalType) -> Status {
    Status::internal(format!("column type mismatch, expected {:?}", logical_type))
}

pub fn datum_at(array: &dyn Array, logical_type: LogicalType, row: usize) -> Result<Datum> {
    if array.is_null(row) {
        return Ok(Datum::Null);
    }
    let any = array.as_any();
    let datum = match logical_type {
        LogicalType::Boolean => Datum::Bool(
            any.downcast_ref::<BooleanArray>()
                .ok_or_else(|| type_mismatch(logical_type))?
                .value(row),
        ),
        LogicalType::Int32 => Datum::Int32(
            any.downcast_ref::<Int32Array>()
                .ok_or_else(|| type_mismatch(logical_type))?
                .value(row),
        ),
        LogicalType::Int64 => Datum::Int64(
            any.downcast_ref::<Int64Array>()
                .ok_or_else(|| type_mismatch(logical_type))?
                .value(row),
        ),
        LogicalType::Float64 => Datum::Float64(
            any.downcast_ref::<Float64Array>()
                .ok_or_else(|| type_mismatch(logical_type))?
                .value(row),
        ),
        LogicalType::Char | LogicalType::Varchar => Datum::String(
            any.downcast_ref::<StringArray>()
                .ok_or_else(|| type_mismatch(logical_type))?
                .value(row)
                .to_string(),
        ),
    };
    Ok(datum)
}

pub fn build_array(logical_type: LogicalType, values: &[Datum]) -> Result<ArrayRef> {
    let mismatch = |d: &Datum| {
        Status::internal(format!(
            "cannot build {:?} column from value {:?}",
            logical_type, d
        ))
    };
    match logical_type {
        LogicalType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(values.len());
            for value in values {
                match value {
                    Datum::Null => builder.append_null(),
                    Datum::Bool(v) => builder.append_value(*v),
                    other => return Err(mismatch(other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::Int32 => {
            let mut builder = Int32Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Datum::Null => builder.append_null(),
                    Datum::Int32(v) => builder.append_value(*v),
                    other => return Err(mismatch(other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::Int64 => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Datum::Null => builder.append_null(),
                    Datum::Int64(v) => builder.append_value(*v),
                    other => return Err(mismatch(other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::Float64 => {
            let mut builder = Float64Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Datum::Null => builder.append_null(),
                    Datum::Float64(v) => builder.append_value(*v),
                    other => return Err(mismatch(other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        LogicalType::Char | LogicalType::Varchar => {
            let mut builder = StringBuilder::with_capacity(values.len(), values.len() * 8);
            for value in values {
                match value {
                    Datum::Null => builder.append_null(),
                    Datum::String(v) => builder.append_value(v),
                    other => return Err(mismatch(other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_sort_first() {
        let mut values = vec![Datum::Int32(3), Datum::Null, Datum::Int32(-1)];
        values.sort();
        assert_eq!(values, vec![Datum::Null, Datum::Int32(-1), Datum::Int32(3)]);
    }

    #[test]
    fn prefix_comparison_ignores_extra_columns() {
        let key = vec![Datum::Int32(1), Datum::String("b".to_string())];
        let bound = vec![Datum::Int32(1)];
        assert_eq!(compare_prefix(&key, &bound), Ordering::Equal);
        assert_eq!(
            compare_prefix(&key, &[Datum::Int32(2)]),
            Ordering::Less
        );
    }

    #[test]
    fn from_string_rejects_bad_literals() {
        assert_eq!(
            Datum::from_string(LogicalType::Int64, " 42 ").expect("int"),
            Datum::Int64(42)
        );
        assert!(Datum::from_string(LogicalType::Int32, "x").is_err());
        assert_eq!(
            Datum::from_string(LogicalType::Char, "ab").expect("char"),
            Datum::String("ab".to_string())
        );
    }

    #[test]
    fn array_round_trip_keeps_nulls() {
        let values = vec![Datum::Int64(7), Datum::Null];
        let array = build_array(LogicalType::Int64, &values).expect("array");
        assert_eq!(datum_at(array.as_ref(), LogicalType::Int64, 0).expect("row 0"), Datum::Int64(7));
        assert!(datum_at(array.as_ref(), LogicalType::Int64, 1).expect("row 1").is_null());
    }
}
