use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{Cells, Frame};

/// Label and identifier columns that never reach a model.
pub const EXCLUDED_COLUMNS: [&str; 8] = [
    "index",
    "fixture_id",
    "resultado",
    "goles_local",
    "goles_visitante",
    "goles_descanso_local",
    "goles_descanso_visitante",
    "fecha_timestamp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error(
        "input columns do not match the model schema: missing [{}], extra [{}]",
        .missing.join(", "),
        .extra.join(", ")
    )]
    ColumnMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },
    #[error("column {position} should be `{expected}` but is `{found}`")]
    OrderMismatch {
        position: usize,
        expected: String,
        found: String,
    },
    #[error("column `{column}` should be {expected:?} but is {found:?}")]
    KindMismatch {
        column: String,
        expected: ColumnKind,
        found: ColumnKind,
    },
    #[error("input has no rows")]
    Empty,
}

/// Ordered, typed model-input columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<SchemaColumn>,
}

impl Schema {
    pub fn new(columns: Vec<SchemaColumn>) -> Self {
        Self { columns }
    }

    /// Every feature-table column except labels and identifiers, in table order.
    pub fn from_table(table: &Frame) -> Self {
        let columns = table
            .columns()
            .iter()
            .filter(|column| !EXCLUDED_COLUMNS.contains(&column.name().as_str()))
            .map(|column| SchemaColumn {
                name: column.name().to_string(),
                kind: if column.kind().is_numeric() {
                    ColumnKind::Numeric
                } else {
                    ColumnKind::Text
                },
            })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Exact column set, then order, then kind.
    pub fn validate(&self, frame: &Frame) -> Result<(), SchemaError> {
        let missing: Vec<String> = self
            .names()
            .filter(|name| !frame.has_column(name))
            .map(str::to_string)
            .collect();
        let extra: Vec<String> = frame
            .column_names()
            .filter(|name| !self.columns.iter().any(|c| c.name == *name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            return Err(SchemaError::ColumnMismatch { missing, extra });
        }

        for (position, (expected, found)) in self.columns.iter().zip(frame.columns()).enumerate() {
            if expected.name != found.name().as_str() {
                return Err(SchemaError::OrderMismatch {
                    position,
                    expected: expected.name.clone(),
                    found: found.name().to_string(),
                });
            }
            let kind = if found.kind().is_numeric() {
                ColumnKind::Numeric
            } else {
                ColumnKind::Text
            };
            if kind != expected.kind {
                return Err(SchemaError::KindMismatch {
                    column: expected.name.clone(),
                    expected: expected.kind,
                    found: kind,
                });
            }
        }

        if frame.is_empty() {
            return Err(SchemaError::Empty);
        }
        Ok(())
    }
}
