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
//! Column predicates pushed down into segment scans.

use std::fmt;

use crate::storage::datum::Datum;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredicateOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    IsNull,
    NotNull,
}

/// A single-column filter. `column_id` indexes the tablet schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnPredicate {
    column_id: usize,
    op: PredicateOp,
    values: Vec<Datum>,
}

impl ColumnPredicate {
    pub fn new(column_id: usize, op: PredicateOp, values: Vec<Datum>) -> Self {
        Self {
            column_id,
            op,
            values,
        }
    }

    pub fn eq(column_id: usize, value: Datum) -> Self {
        Self::new(column_id, PredicateOp::Eq, vec![value])
    }

    pub fn ne(column_id: usize, value: Datum) -> Self {
        Self::new(column_id, PredicateOp::Ne, vec![value])
    }

    pub fn lt(column_id: usize, value: Datum) -> Self {
        Self::new(column_id, PredicateOp::Lt, vec![value])
    }

    pub fn le(column_id: usize, value: Datum) -> Self {
        Self::new(column_id, PredicateOp::Le, vec![value])
    }

    pub fn gt(column_id: usize, value: Datum) -> Self {
        Self::new(column_id, PredicateOp::Gt, vec![value])
    }

    pub fn ge(column_id: usize, value: Datum) -> Self {
        Self::new(column_id, PredicateOp::Ge, vec![value])
    }

    pub fn in_list(column_id: usize, values: Vec<Datum>) -> Self {
        Self::new(column_id, PredicateOp::In, values)
    }

    pub fn not_in(column_id: usize, values: Vec<Datum>) -> Self {
        Self::new(column_id, PredicateOp::NotIn, values)
    }

    pub fn is_null(column_id: usize) -> Self {
        Self::new(column_id, PredicateOp::IsNull, Vec::new())
    }

    pub fn not_null(column_id: usize) -> Self {
        Self::new(column_id, PredicateOp::NotNull, Vec::new())
    }

    pub fn column_id(&self) -> usize {
        self.column_id
    }

    pub fn op(&self) -> PredicateOp {
        self.op
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    /// Comparisons against NULL never match; only `IsNull` selects null cells.
    pub fn evaluate(&self, datum: &Datum) -> bool {
        match self.op {
            PredicateOp::IsNull => return datum.is_null(),
            PredicateOp::NotNull => return !datum.is_null(),
            _ => {}
        }
        if datum.is_null() {
            return false;
        }
        let Some(first) = self.values.first() else {
            return false;
        };
        match self.op {
            PredicateOp::Eq => datum == first,
            PredicateOp::Ne => datum != first,
            PredicateOp::Lt => datum < first,
            PredicateOp::Le => datum <= first,
            PredicateOp::Gt => datum > first,
            PredicateOp::Ge => datum >= first,
            PredicateOp::In => self.values.iter().any(|v| v == datum),
            PredicateOp::NotIn => self.values.iter().all(|v| v != datum),
            PredicateOp::IsNull | PredicateOp::NotNull => false,
        }
    }
}

impl fmt::Display for ColumnPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col#{} {:?} {:?}", self.column_id, self.op, self.values)
    }
}

/// A conjunction of column predicates; a row matches when every predicate matches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConjunctivePredicates {
    predicates: Vec<ColumnPredicate>,
}

impl ConjunctivePredicates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, predicate: ColumnPredicate) {
        self.predicates.push(predicate);
    }

    pub fn predicates(&self) -> &[ColumnPredicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// `row` is indexed by tablet column id.
    pub fn evaluate_row(&self, row: &[Datum]) -> bool {
        self.predicates.iter().all(|p| {
            row.get(p.column_id())
                .map(|d| p.evaluate(d))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_only_matches_null_checks() {
        assert!(!ColumnPredicate::eq(0, Datum::Int32(1)).evaluate(&Datum::Null));
        assert!(!ColumnPredicate::not_in(0, vec![Datum::Int32(1)]).evaluate(&Datum::Null));
        assert!(ColumnPredicate::is_null(0).evaluate(&Datum::Null));
        assert!(ColumnPredicate::not_null(0).evaluate(&Datum::Int32(1)));
    }

    #[test]
    fn conjunction_requires_every_predicate() {
        let mut conj = ConjunctivePredicates::new();
        conj.add(ColumnPredicate::ge(0, Datum::Int32(2)));
        conj.add(ColumnPredicate::in_list(
            1,
            vec![Datum::String("a".into()), Datum::String("b".into())],
        ));
        assert!(conj.evaluate_row(&[Datum::Int32(3), Datum::String("b".into())]));
        assert!(!conj.evaluate_row(&[Datum::Int32(1), Datum::String("b".into())]));
        assert!(!conj.evaluate_row(&[Datum::Int32(3), Datum::String("c".into())]));
    }
}
