use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::frame::{Cells, Column, Frame};

/// How a long (match, entity) table becomes wide indicator columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PivotSpec {
    pub key: &'static str,
    pub entity: &'static str,
    pub prefix: &'static str,
    /// Appended after the id. Lineup ids were floats upstream, so their
    /// columns read `titu-123.0` and every consumer must build names here.
    pub id_suffix: &'static str,
    pub drop_leading_placeholder: bool,
}

pub const INJURIES: PivotSpec = PivotSpec {
    key: "fixture_id",
    entity: "id_lesionado",
    prefix: "les-",
    id_suffix: "",
    drop_leading_placeholder: false,
};

pub const LINEUPS: PivotSpec = PivotSpec {
    key: "fixture_id",
    entity: "id_jugador_titular",
    prefix: "titu-",
    id_suffix: ".0",
    drop_leading_placeholder: true,
};

impl PivotSpec {
    pub fn column_name(&self, id: i64) -> String {
        format!("{}{}{}", self.prefix, id, self.id_suffix)
    }

    pub fn parse_column(&self, name: &str) -> Option<i64> {
        name.strip_prefix(self.prefix)?
            .strip_suffix(self.id_suffix)?
            .parse()
            .ok()
    }

    pub fn is_indicator(&self, name: &str) -> bool {
        self.parse_column(name).is_some()
    }

    pub fn indicator_columns<'a>(&self, frame: &'a Frame) -> Vec<&'a str> {
        frame
            .column_names()
            .filter(|name| self.is_indicator(name))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotReport {
    pub input_rows: usize,
    pub dropped_rows: usize,
    pub matches: usize,
    pub entities: usize,
    pub placeholder: Option<i64>,
}

/// One row per distinct match key (ascending), one 0/1 column per distinct
/// entity id (ascending). Rows without a usable key or id are skipped.
pub fn pivot(raw: &Frame, spec: &PivotSpec) -> Result<(Frame, PivotReport)> {
    let keys = raw
        .require(spec.key)
        .with_context(|| format!("pivot on {}", spec.entity))?;
    let ids = raw
        .require(spec.entity)
        .with_context(|| format!("pivot on {}", spec.entity))?;

    let mut report = PivotReport {
        input_rows: raw.n_rows(),
        ..PivotReport::default()
    };
    let mut pairs: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    let mut entities = BTreeSet::new();
    for row in 0..raw.n_rows() {
        match (keys.i64_at(row), ids.i64_at(row)) {
            (Some(key), Some(id)) => {
                pairs.entry(key).or_default().insert(id);
                entities.insert(id);
            }
            _ => report.dropped_rows += 1,
        }
    }

    if spec.drop_leading_placeholder {
        report.placeholder = entities.pop_first();
        if let Some(id) = report.placeholder {
            info!(entity = spec.entity, id, "dropped placeholder indicator column");
        }
    }
    if report.dropped_rows > 0 {
        warn!(
            entity = spec.entity,
            dropped = report.dropped_rows,
            "skipped rows without key or entity id"
        );
    }

    let row_of: HashMap<i64, usize> = pairs.keys().enumerate().map(|(i, k)| (*k, i)).collect();
    let col_of: HashMap<i64, usize> = entities.iter().enumerate().map(|(i, e)| (*e, i)).collect();
    let mut cells = vec![vec![Some(false); pairs.len()]; entities.len()];
    for (key, ids) in &pairs {
        let row = row_of[key];
        for id in ids {
            if let Some(&col) = col_of.get(id) {
                cells[col][row] = Some(true);
            }
        }
    }

    let mut columns = Vec::with_capacity(entities.len() + 1);
    let keys: Vec<Option<i64>> = pairs.keys().map(|k| Some(*k)).collect();
    columns.push(Column::new(spec.key.into(), keys));
    for (id, values) in entities.iter().zip(cells) {
        columns.push(Column::new(spec.column_name(*id).into(), values));
    }

    report.matches = pairs.len();
    report.entities = entities.len();
    info!(
        entity = spec.entity,
        matches = report.matches,
        entities = report.entities,
        "pivoted indicator table"
    );
    Ok((Frame::from_columns(columns)?, report))
}
