//! Named-column tables backed by polars.
//!
//! Raw extracts and the feature table have column sets that are only known at
//! run time (one column per player ever seen), so everything in the pipeline
//! flows through `Frame` rather than fixed record types. `Frame` wraps a
//! polars `DataFrame`; the joins, sorts, null handling and CSV I/O are the
//! polars ones, and `Cells` adds the row-level reads the per-team windows and
//! the encoder walk through.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use polars::prelude::*;

pub use polars::prelude::{Column, JoinType};

const NULL_TOKENS: [&str; 9] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None", "#N/A"];
const ROW_ORDER: &str = "__row_order";

/// One cell, detached from its column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Binary(bool),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Binary(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Null | Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// A one-row column holding this value.
    pub fn into_column(self, name: &str) -> Column {
        let name = PlSmallStr::from(name);
        match self {
            Value::Null => Column::new(name, vec![None::<f64>]),
            Value::Int(v) => Column::new(name, vec![Some(v)]),
            Value::Float(v) => Column::new(name, vec![Some(v)]),
            Value::Binary(v) => Column::new(name, vec![Some(v)]),
            Value::Text(v) => Column::new(name, vec![Some(v)]),
        }
    }
}

impl From<AnyValue<'_>> for Value {
    fn from(value: AnyValue<'_>) -> Self {
        match value {
            AnyValue::Null => Value::Null,
            AnyValue::Boolean(v) => Value::Binary(v),
            AnyValue::Int64(v) => Value::Int(v),
            AnyValue::Int32(v) => Value::Int(i64::from(v)),
            AnyValue::UInt32(v) => Value::Int(i64::from(v)),
            AnyValue::UInt64(v) => i64::try_from(v).map_or(Value::Float(v as f64), Value::Int),
            AnyValue::Float64(v) => Value::Float(v),
            AnyValue::Float32(v) => Value::Float(f64::from(v)),
            AnyValue::String(v) => Value::Text(v.to_string()),
            AnyValue::StringOwned(v) => Value::Text(v.to_string()),
            other => other.extract::<f64>().map_or(Value::Null, Value::Float),
        }
    }
}

/// Coarse column type as the schema and the encoder see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Int,
    Float,
    Binary,
    Text,
}

impl DType {
    pub fn is_numeric(self) -> bool {
        !matches!(self, DType::Text)
    }

    fn of(dtype: &DataType) -> Self {
        match dtype {
            DataType::Boolean => DType::Binary,
            DataType::String => DType::Text,
            DataType::Null => DType::Float,
            dt if dt.is_integer() => DType::Int,
            dt if dt.is_float() => DType::Float,
            _ => DType::Text,
        }
    }
}

fn integral(x: f64) -> Option<i64> {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 9.0e15 {
        Some(x as i64)
    } else {
        None
    }
}

/// Lenient numeric parse used when coercing text cells.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if is_null_token(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|x| x.is_finite())
}

pub fn is_null_token(raw: &str) -> bool {
    NULL_TOKENS.contains(&raw)
}

/// Row-level reads on a polars column.
pub trait Cells {
    fn value_at(&self, row: usize) -> Value;

    fn kind(&self) -> DType;

    /// Every cell as a float; text goes through `parse_number`.
    fn to_f64_vec(&self) -> Vec<Option<f64>>;

    fn str_at(&self, row: usize) -> Option<&str>;

    fn f64_at(&self, row: usize) -> Option<f64> {
        match self.value_at(row) {
            Value::Text(raw) => parse_number(&raw),
            other => other.as_f64(),
        }
    }

    /// Integer view of a cell. Floats only qualify when they carry no fraction.
    fn i64_at(&self, row: usize) -> Option<i64> {
        match self.value_at(row) {
            Value::Int(v) => Some(v),
            Value::Binary(v) => Some(i64::from(v)),
            Value::Float(v) => integral(v),
            Value::Text(raw) => parse_number(&raw).and_then(integral),
            Value::Null => None,
        }
    }

    fn to_i64_vec(&self) -> Vec<Option<i64>> {
        self.to_f64_vec()
            .into_iter()
            .map(|v| v.and_then(integral))
            .collect()
    }
}

impl Cells for Column {
    fn value_at(&self, row: usize) -> Value {
        self.get(row).map_or(Value::Null, Value::from)
    }

    fn kind(&self) -> DType {
        DType::of(self.dtype())
    }

    fn to_f64_vec(&self) -> Vec<Option<f64>> {
        if let Ok(text) = self.str() {
            return text.into_iter().map(|v| v.and_then(parse_number)).collect();
        }
        let Ok(floats) = self.cast(&DataType::Float64) else {
            return vec![None; self.len()];
        };
        match floats.f64() {
            Ok(ca) => ca.into_iter().collect(),
            Err(_) => vec![None; self.len()],
        }
    }

    fn str_at(&self, row: usize) -> Option<&str> {
        self.str().ok()?.get(row)
    }
}

fn is_numeric_key(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int32
            | DataType::Int64
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Boolean
    )
}

/// Zero for numbers, `false` for indicators, `"0"` for text.
fn zero_filled(column: &Column) -> Result<Column> {
    let name = column.name().clone();
    let filled = match column.dtype() {
        DataType::Boolean => {
            let ca: BooleanChunked = column
                .bool()?
                .into_iter()
                .map(|v| Some(v.unwrap_or(false)))
                .collect();
            ca.with_name(name).into_column()
        }
        DataType::String => {
            let ca: StringChunked = column
                .str()?
                .into_iter()
                .map(|v| Some(v.unwrap_or("0")))
                .collect();
            ca.with_name(name).into_column()
        }
        DataType::Null => column
            .cast(&DataType::Float64)?
            .as_materialized_series()
            .fill_null(FillNullStrategy::Zero)?
            .into_column(),
        _ => column
            .as_materialized_series()
            .fill_null(FillNullStrategy::Zero)?
            .into_column(),
    };
    Ok(filled)
}

fn csv_options() -> CsvReadOptions {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .map_parse_options(|parse| {
            parse.with_null_values(Some(NullValues::AllColumns(
                NULL_TOKENS.iter().map(|token| (*token).into()).collect(),
            )))
        })
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    df: DataFrame,
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.df.get_column_names() == other.df.get_column_names()
            && self.df.equals_missing(&other.df)
    }
}

impl From<DataFrame> for Frame {
    fn from(df: DataFrame) -> Self {
        Self { df }
    }
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name().as_str()) {
                bail!("duplicate column `{}`", column.name());
            }
        }
        let df = DataFrame::new(columns).context("build frame")?;
        Ok(Self { df })
    }

    /// Builds a one-row frame, preserving the given column order.
    pub fn from_row(values: Vec<(String, Value)>) -> Result<Self> {
        let columns = values
            .into_iter()
            .map(|(name, value)| value.into_column(&name))
            .collect();
        Frame::from_columns(columns)
    }

    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_df(self) -> DataFrame {
        self.df
    }

    pub fn n_rows(&self) -> usize {
        self.df.height()
    }

    pub fn n_cols(&self) -> usize {
        self.df.width()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub fn columns(&self) -> &[Column] {
        self.df.get_columns()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.df.get_columns().iter().map(|column| column.name().as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.df.get_column_index(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.df.get_column_index(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.df.column(name).ok()
    }

    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| anyhow!("missing required column `{name}`"))
    }

    pub fn require_all<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let missing: Vec<&str> = names
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| !self.has_column(name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("missing required columns: {}", missing.join(", ")))
        }
    }

    pub fn value(&self, row: usize, name: &str) -> Value {
        self.column(name)
            .filter(|column| row < column.len())
            .map_or(Value::Null, |column| column.value_at(row))
    }

    pub fn f64_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        Ok(self.require(name)?.to_f64_vec())
    }

    pub fn i64_values(&self, name: &str) -> Result<Vec<Option<i64>>> {
        Ok(self.require(name)?.to_i64_vec())
    }

    pub fn push_column(&mut self, column: Column) -> Result<()> {
        let at = self.n_cols();
        self.insert_column(at, column)
    }

    pub fn insert_column(&mut self, at: usize, column: Column) -> Result<()> {
        if self.has_column(column.name()) {
            bail!("duplicate column `{}`", column.name());
        }
        if self.n_cols() > 0 && column.len() != self.n_rows() {
            bail!(
                "column `{}` has {} rows, frame has {}",
                column.name(),
                column.len(),
                self.n_rows()
            );
        }
        let mut columns = self.df.get_columns().to_vec();
        columns.insert(at.min(columns.len()), column);
        self.df = DataFrame::new(columns).context("insert column")?;
        Ok(())
    }

    /// Swaps in a column of the same name, keeping its position.
    pub fn replace_column(&mut self, column: Column) -> Result<()> {
        let name = column.name().clone();
        if !self.has_column(&name) {
            bail!("missing column `{name}`");
        }
        if column.len() != self.n_rows() {
            bail!(
                "replacement for `{name}` has {} rows, frame has {}",
                column.len(),
                self.n_rows()
            );
        }
        self.df
            .with_column(column)
            .with_context(|| format!("replace column `{name}`"))?;
        Ok(())
    }

    /// Renames `from` to `to`, replacing any existing `to`. Returns false
    /// when `from` is absent, which makes repeated renames no-ops.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<bool> {
        if from == to || !self.has_column(from) {
            return Ok(false);
        }
        if self.has_column(to) {
            self.df.drop_in_place(to)?;
        }
        self.df.rename(from, to.into())?;
        Ok(true)
    }

    pub fn drop_columns<S: AsRef<str>>(&mut self, names: &[S]) -> usize {
        names
            .iter()
            .filter(|name| self.df.drop_in_place(name.as_ref()).is_ok())
            .count()
    }

    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame> {
        self.require_all(names)?;
        let names: Vec<&str> = names.iter().map(|name| name.as_ref()).collect();
        let df = self.df.select(names)?;
        Ok(Self { df })
    }

    pub fn take_rows(&self, rows: &[usize]) -> Result<Frame> {
        let idx = IdxCa::from_vec(
            "row".into(),
            rows.iter().map(|&row| row as IdxSize).collect(),
        );
        Ok(Self {
            df: self.df.take(&idx)?,
        })
    }

    pub fn filter(&self, keep: &[bool]) -> Result<Frame> {
        let mask = BooleanChunked::from_slice("keep".into(), keep);
        Ok(Self {
            df: self.df.filter(&mask)?,
        })
    }

    pub fn row_has_null(&self, row: usize) -> bool {
        self.columns()
            .iter()
            .any(|column| column.value_at(row).is_null())
    }

    /// True when every named column is null at `row`. Absent columns count as null.
    pub fn all_null<S: AsRef<str>>(&self, row: usize, names: &[S]) -> bool {
        names.iter().all(|name| {
            self.column(name.as_ref())
                .is_none_or(|column| column.value_at(row).is_null())
        })
    }

    pub fn drop_null_rows(&self) -> Result<(Frame, usize)> {
        let df = self.df.drop_nulls::<String>(None)?;
        let dropped = self.n_rows() - df.height();
        Ok((Self { df }, dropped))
    }

    /// Zero-fills nulls in the named columns only. Returns the cells filled.
    pub fn fill_nulls_with_zero<S: AsRef<str>>(&mut self, names: &[S]) -> Result<usize> {
        let mut filled = 0usize;
        for name in names {
            let Some(column) = self.column(name.as_ref()) else {
                continue;
            };
            let nulls = column.null_count();
            if nulls == 0 {
                continue;
            }
            let column = zero_filled(column)?;
            self.df.with_column(column)?;
            filled += nulls;
        }
        Ok(filled)
    }

    /// Stable sort on the given keys, ascending, nulls last.
    pub fn sorted_by<S: AsRef<str>>(&self, keys: &[S]) -> Result<Frame> {
        self.require_all(keys).context("sort keys")?;
        let by: Vec<PlSmallStr> = keys.iter().map(|key| key.as_ref().into()).collect();
        let df = self.df.sort(
            by,
            SortMultipleOptions::default()
                .with_maintain_order(true)
                .with_nulls_last(true),
        )?;
        Ok(Self { df })
    }

    /// Hash join on polars. Left row order is kept; a repeated right key
    /// fans the left row out once per match and null keys never match.
    /// Key pairs of different numeric types are compared as floats, so
    /// `1` meets `1.0`. Right key columns are folded into the left ones.
    pub fn join(
        &self,
        right: &Frame,
        left_on: &[&str],
        right_on: &[&str],
        how: JoinType,
    ) -> Result<Frame> {
        if left_on.len() != right_on.len() || left_on.is_empty() {
            bail!("join needs matching, non-empty key lists");
        }
        self.require_all(left_on).context("left join key")?;
        right.require_all(right_on).context("right join key")?;
        for name in right.column_names() {
            if !right_on.contains(&name) && self.has_column(name) {
                bail!("join would duplicate column `{name}`");
            }
        }

        let mut left_df = self.df.clone();
        let mut right_df = right.df.clone();
        let mut restore = Vec::new();
        for (l, r) in left_on.iter().zip(right_on) {
            let left_type = left_df.column(l)?.dtype().clone();
            let right_type = right_df.column(r)?.dtype().clone();
            if left_type == right_type {
                continue;
            }
            let common = if is_numeric_key(&left_type) && is_numeric_key(&right_type) {
                DataType::Float64
            } else {
                DataType::String
            };
            let cast_left = left_df.column(l)?.cast(&common)?;
            left_df.with_column(cast_left)?;
            let cast_right = right_df.column(r)?.cast(&common)?;
            right_df.with_column(cast_right)?;
            restore.push((*l, left_type));
        }

        let left_keys: Vec<Expr> = left_on.iter().map(|name| col(*name)).collect();
        let right_keys: Vec<Expr> = right_on.iter().map(|name| col(*name)).collect();
        let joined = left_df
            .with_row_index(ROW_ORDER.into(), None)?
            .lazy()
            .join(
                right_df.lazy(),
                left_keys,
                right_keys,
                JoinArgs::new(how).with_coalesce(JoinCoalesce::CoalesceColumns),
            )
            .collect()?;
        let mut joined = joined.sort(
            [ROW_ORDER],
            SortMultipleOptions::default().with_maintain_order(true),
        )?;
        joined.drop_in_place(ROW_ORDER)?;
        for (name, dtype) in restore {
            let restored = joined.column(name)?.cast(&dtype)?;
            joined.with_column(restored)?;
        }
        Ok(Self { df: joined })
    }

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Frame> {
        let path = path.as_ref();
        let df = csv_options()
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .with_context(|| format!("open csv {}", path.display()))?
            .finish()
            .with_context(|| format!("parse csv {}", path.display()))?;
        Ok(Self { df })
    }

    pub fn from_csv_reader<R: Read>(mut reader: R) -> Result<Frame> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).context("read csv")?;
        let df = csv_options()
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()
            .context("parse csv")?;
        Ok(Self { df })
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let file = File::create(path).with_context(|| format!("create csv {}", path.display()))?;
        self.to_csv_writer(file)
            .with_context(|| format!("write csv {}", path.display()))
    }

    /// Indicator columns are written as 0/1.
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut df = self.df.clone();
        let flags: Vec<PlSmallStr> = df
            .get_columns()
            .iter()
            .filter(|column| column.dtype() == &DataType::Boolean)
            .map(|column| column.name().clone())
            .collect();
        for name in flags {
            let ints = df.column(&name)?.cast(&DataType::Int64)?;
            df.with_column(ints)?;
        }
        CsvWriter::new(writer)
            .include_header(true)
            .finish(&mut df)
            .context("write csv")?;
        Ok(())
    }
}
