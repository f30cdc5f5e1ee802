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
//! Tablet schema model.
//!
//! Responsibilities:
//! - Describes tablet columns, their logical types, key membership and aggregation functions.
//! - Builds projected read schemas whose key fields are a prefix of the tablet's sort key.
//!
//! Key exported interfaces:
//! - Types: `KeysType`, `LogicalType`, `AggregationType`, `TabletColumn`, `TabletSchema`,
//!   `Field`, `Schema`.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, SchemaRef};

use crate::common::status::{Result, Status};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeysType {
    DupKeys,
    UniqueKeys,
    AggKeys,
    PrimaryKeys,
}

impl KeysType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeysType::DupKeys => "DUP_KEYS",
            KeysType::UniqueKeys => "UNIQUE_KEYS",
            KeysType::AggKeys => "AGG_KEYS",
            KeysType::PrimaryKeys => "PRIMARY_KEYS",
        }
    }
}

impl fmt::Display for KeysType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Boolean,
    Int32,
    Int64,
    Float64,
    /// Fixed-width string; executed as `Varchar`.
    Char,
    Varchar,
}

impl LogicalType {
    pub fn to_arrow(self) -> DataType {
        match self {
            LogicalType::Boolean => DataType::Boolean,
            LogicalType::Int32 => DataType::Int32,
            LogicalType::Int64 => DataType::Int64,
            LogicalType::Float64 => DataType::Float64,
            LogicalType::Char | LogicalType::Varchar => DataType::Utf8,
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self, LogicalType::Char | LogicalType::Varchar)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum AggregationType {
    #[default]
    None,
    Sum,
    Min,
    Max,
    Replace,
    ReplaceIfNotNull,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabletColumn {
    pub name: String,
    pub logical_type: LogicalType,
    pub is_key: bool,
    pub nullable: bool,
    pub aggregation: AggregationType,
}

impl TabletColumn {
    pub fn key(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            is_key: true,
            nullable: false,
            aggregation: AggregationType::None,
        }
    }

    pub fn value(
        name: impl Into<String>,
        logical_type: LogicalType,
        aggregation: AggregationType,
    ) -> Self {
        Self {
            name: name.into(),
            logical_type,
            is_key: false,
            nullable: true,
            aggregation,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Physical schema of a tablet. Key columns come first and define the sort order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabletSchema {
    keys_type: KeysType,
    columns: Vec<TabletColumn>,
    num_key_columns: usize,
}

impl TabletSchema {
    /// Unique-key value columns always aggregate with `Replace`; duplicate and primary
    /// key tables carry no aggregation.
    pub fn new(keys_type: KeysType, mut columns: Vec<TabletColumn>) -> Result<Self> {
        let num_key_columns = columns.iter().take_while(|c| c.is_key).count();
        if num_key_columns == 0 {
            return Err(Status::invalid_argument("tablet schema needs at least one key column"));
        }
        if columns[num_key_columns..].iter().any(|c| c.is_key) {
            return Err(Status::invalid_argument(
                "key columns must precede value columns in tablet schema",
            ));
        }
        for column in columns.iter_mut() {
            if column.is_key {
                column.aggregation = AggregationType::None;
                continue;
            }
            match keys_type {
                KeysType::UniqueKeys => column.aggregation = AggregationType::Replace,
                KeysType::DupKeys | KeysType::PrimaryKeys => {
                    column.aggregation = AggregationType::None
                }
                KeysType::AggKeys => {
                    if column.aggregation == AggregationType::None {
                        return Err(Status::invalid_argument(format!(
                            "AGG_KEYS value column {} has no aggregation type",
                            column.name
                        )));
                    }
                }
            }
        }
        Ok(Self {
            keys_type,
            columns,
            num_key_columns,
        })
    }

    pub fn keys_type(&self) -> KeysType {
        self.keys_type
    }

    pub fn columns(&self) -> &[TabletColumn] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &TabletColumn {
        &self.columns[idx]
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(ArrowSchema::new(
            self.columns
                .iter()
                .map(|c| ArrowField::new(c.name.clone(), c.logical_type.to_arrow(), c.nullable))
                .collect::<Vec<_>>(),
        ))
    }
}

/// One column of a read schema; `id` is the column's index in the tablet schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub id: usize,
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
    pub is_key: bool,
    pub aggregation: AggregationType,
}

impl Field {
    fn from_column(id: usize, column: &TabletColumn) -> Self {
        Self {
            id,
            name: column.name.clone(),
            logical_type: column.logical_type,
            nullable: column.nullable,
            is_key: column.is_key,
            aggregation: column.aggregation,
        }
    }
}

/// Projected read schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
    num_key_fields: usize,
    arrow: SchemaRef,
}

impl Schema {
    /// Selected key columns must form a prefix of the tablet key so that merge order holds.
    pub fn project(tablet_schema: &TabletSchema, column_ids: &[usize]) -> Result<Self> {
        if column_ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Status::invalid_argument(format!(
                "read schema column ids must be strictly increasing: {:?}",
                column_ids
            )));
        }
        let mut fields = Vec::with_capacity(column_ids.len());
        for &id in column_ids {
            if id >= tablet_schema.num_columns() {
                return Err(Status::invalid_argument(format!(
                    "column id {} out of range for tablet schema of {} columns",
                    id,
                    tablet_schema.num_columns()
                )));
            }
            fields.push(Field::from_column(id, tablet_schema.column(id)));
        }
        let num_key_fields = fields.iter().filter(|f| f.is_key).count();
        if fields[..num_key_fields]
            .iter()
            .enumerate()
            .any(|(pos, f)| f.id != pos)
        {
            return Err(Status::invalid_argument(
                "selected key columns must be a prefix of the tablet key",
            ));
        }
        Ok(Self::from_fields(fields, num_key_fields))
    }

    pub fn all(tablet_schema: &TabletSchema) -> Self {
        let fields = tablet_schema
            .columns()
            .iter()
            .enumerate()
            .map(|(id, c)| Field::from_column(id, c))
            .collect();
        Self::from_fields(fields, tablet_schema.num_key_columns())
    }

    pub fn keys(tablet_schema: &TabletSchema) -> Self {
        let fields = tablet_schema.columns()[..tablet_schema.num_key_columns()]
            .iter()
            .enumerate()
            .map(|(id, c)| Field::from_column(id, c))
            .collect();
        Self::from_fields(fields, tablet_schema.num_key_columns())
    }

    /// Value-only schema used by vertical compaction value passes.
    pub fn values(tablet_schema: &TabletSchema, column_ids: &[usize]) -> Result<Self> {
        let mut fields = Vec::with_capacity(column_ids.len());
        for &id in column_ids {
            if id >= tablet_schema.num_columns() || tablet_schema.column(id).is_key {
                return Err(Status::invalid_argument(format!(
                    "column id {} is not a value column",
                    id
                )));
            }
            fields.push(Field::from_column(id, tablet_schema.column(id)));
        }
        Ok(Self::from_fields(fields, 0))
    }

    fn from_fields(fields: Vec<Field>, num_key_fields: usize) -> Self {
        let arrow = Arc::new(ArrowSchema::new(
            fields
                .iter()
                .map(|f| ArrowField::new(f.name.clone(), f.logical_type.to_arrow(), f.nullable))
                .collect::<Vec<_>>(),
        ));
        Self {
            fields,
            num_key_fields,
            arrow,
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> &Field {
        &self.fields[idx]
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn num_key_fields(&self) -> usize {
        self.num_key_fields
    }

    pub fn column_ids(&self) -> Vec<usize> {
        self.fields.iter().map(|f| f.id).collect()
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::clone(&self.arrow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg_schema() -> TabletSchema {
        TabletSchema::new(
            KeysType::AggKeys,
            vec![
                TabletColumn::key("k1", LogicalType::Int32),
                TabletColumn::key("k2", LogicalType::Varchar),
                TabletColumn::value("v", LogicalType::Int64, AggregationType::Sum),
            ],
        )
        .expect("schema")
    }

    #[test]
    fn unique_value_columns_use_replace() {
        let schema = TabletSchema::new(
            KeysType::UniqueKeys,
            vec![
                TabletColumn::key("k", LogicalType::Int32),
                TabletColumn::value("v", LogicalType::Int32, AggregationType::Sum),
            ],
        )
        .expect("schema");
        assert_eq!(schema.column(1).aggregation, AggregationType::Replace);
    }

    #[test]
    fn agg_value_column_requires_aggregation() {
        let err = TabletSchema::new(
            KeysType::AggKeys,
            vec![
                TabletColumn::key("k", LogicalType::Int32),
                TabletColumn::value("v", LogicalType::Int32, AggregationType::None),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
    }

    #[test]
    fn projection_requires_key_prefix() {
        let tablet = agg_schema();
        let schema = Schema::project(&tablet, &[0, 2]).expect("prefix projection");
        assert_eq!(schema.num_key_fields(), 1);
        assert_eq!(schema.arrow_schema().fields().len(), 2);

        assert!(Schema::project(&tablet, &[1, 2]).is_err());
        assert!(Schema::project(&tablet, &[2, 0]).is_err());
    }
}
