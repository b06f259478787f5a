use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assemble::FeatureTable;
use crate::frame::{Frame, Value};
use crate::normalize::STAT_COLUMNS;
use crate::odds::ODDS_COLUMNS;
use crate::pivot::{INJURIES, LINEUPS, PivotSpec};
use crate::schema::{Schema, SchemaError};
use crate::window::{self, Side};

/// A match that has not been played yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRequest {
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub odd_1: f64,
    pub odd_x: f64,
    pub odd_2: f64,
    pub referee: String,
    pub stadium: String,
    pub season: i64,
    #[serde(default)]
    pub injured: Vec<i64>,
    #[serde(default)]
    pub starters: Vec<i64>,
}

impl FixtureRequest {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read fixture request {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse fixture request {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureVector {
    /// One row, ordered like the model-input schema of the history.
    pub frame: Frame,
    pub unmatched_injured: Vec<i64>,
    pub unmatched_starters: Vec<i64>,
}

/// Encodes `request` against `history` so the row lines up column for
/// column with what a model trained on `history` expects.
pub fn build_fixture_vector(history: &FeatureTable, request: &FixtureRequest) -> Result<FixtureVector> {
    let frame = history.frame();
    let schema = Schema::from_table(frame);
    let mut values: HashMap<String, Value> = HashMap::new();

    values.insert(
        Side::Home.team_column().to_string(),
        Value::Int(request.home_team_id),
    );
    values.insert(
        Side::Away.team_column().to_string(),
        Value::Int(request.away_team_id),
    );
    values.insert("arbitro".to_string(), Value::Text(request.referee.clone()));
    values.insert("estadio".to_string(), Value::Text(request.stadium.clone()));
    values.insert("season".to_string(), Value::Int(request.season));

    for side in Side::BOTH {
        let team = team_for(request, side);
        let groups = window::team_sequences(frame, side)?;
        for stat in STAT_COLUMNS.iter().filter(|c| c.ends_with(side.stat_suffix())) {
            let series = frame.f64_values(stat)?;
            let form = window::trailing_form(&series, &groups, team);
            values.insert(stat.clone(), Value::Float(form));
        }

        let derived = window::derived_series(frame, side)?;
        values.insert(
            side.derived_column().to_string(),
            Value::Float(window::team_average(&derived, &groups, team)),
        );
    }

    let unmatched_injured = flag_players(history, &INJURIES, &request.injured, &mut values);
    let unmatched_starters = flag_players(history, &LINEUPS, &request.starters, &mut values);
    if !unmatched_injured.is_empty() || !unmatched_starters.is_empty() {
        warn!(
            injured = ?unmatched_injured,
            starters = ?unmatched_starters,
            "players without an indicator column in the history were ignored"
        );
    }

    let odds = [request.odd_1, request.odd_x, request.odd_2];
    for (name, price) in ODDS_COLUMNS.iter().zip(odds) {
        values.insert(name.to_string(), Value::Float(price));
    }

    let row = order_by_schema(&schema, values)?;
    let vector = Frame::from_row(row)?;
    schema.validate(&vector)?;

    info!(
        home = request.home_team_id,
        away = request.away_team_id,
        columns = vector.n_cols(),
        "built fixture vector"
    );
    Ok(FixtureVector {
        frame: vector,
        unmatched_injured,
        unmatched_starters,
    })
}

fn team_for(request: &FixtureRequest, side: Side) -> i64 {
    match side {
        Side::Home => request.home_team_id,
        Side::Away => request.away_team_id,
    }
}

/// Zeroes every indicator column of `spec` and sets the listed players to 1.
/// Returns the ids that have no column.
fn flag_players(
    history: &FeatureTable,
    spec: &PivotSpec,
    players: &[i64],
    values: &mut HashMap<String, Value>,
) -> Vec<i64> {
    for name in spec.indicator_columns(history.frame()) {
        values.insert(name.to_string(), Value::Binary(false));
    }
    let mut unmatched = Vec::new();
    for id in players.iter().copied().collect::<BTreeSet<_>>() {
        let name = spec.column_name(id);
        if history.frame().has_column(&name) {
            values.insert(name, Value::Binary(true));
        } else {
            unmatched.push(id);
        }
    }
    unmatched
}

fn order_by_schema(
    schema: &Schema,
    mut values: HashMap<String, Value>,
) -> Result<Vec<(String, Value)>, SchemaError> {
    let mut row = Vec::with_capacity(schema.len());
    let mut missing = Vec::new();
    for name in schema.names() {
        match values.remove(name) {
            Some(value) => row.push((name.to_string(), value)),
            None => missing.push(name.to_string()),
        }
    }
    let mut extra: Vec<String> = values.into_keys().collect();
    extra.sort();
    if !missing.is_empty() || !extra.is_empty() {
        return Err(SchemaError::ColumnMismatch { missing, extra });
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EXCLUDED_COLUMNS;

    fn history() -> FeatureTable {
        let mut header: Vec<String> = [
            "index",
            "fixture_id",
            "fecha_timestamp",
            "id_equipo_local",
            "id_equipo_visitante",
            "arbitro",
            "estadio",
            "season",
            "goles_local",
            "goles_visitante",
            "goles_descanso_local",
            "goles_descanso_visitante",
            "resultado",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(STAT_COLUMNS.iter().cloned());
        header.extend(["les-10", "les-11", "titu-20.0", "titu-21.0"].map(String::from));
        header.extend(
            ["tiros_para_marcar_local", "tiros_para_marcar_away", "odd_1", "odd_x", "odd_2"]
                .map(String::from),
        );

        let mut csv = header.join(",");
        csv.push('\n');
        for i in 0..10 {
            let home = if i % 2 == 0 { 716 } else { 732 };
            let away = if i % 2 == 0 { 732 } else { 716 };
            let mut cells = vec![
                i.to_string(),
                (100 + i).to_string(),
                (1000 + i * 10).to_string(),
                home.to_string(),
                away.to_string(),
                "Ref".to_string(),
                "Anxo Carro".to_string(),
                "2022".to_string(),
                (i % 3).to_string(),
                "1".to_string(),
                "0".to_string(),
                "0".to_string(),
                "1".to_string(),
            ];
            for _ in STAT_COLUMNS.iter() {
                cells.push((i + 1).to_string());
            }
            cells.extend(["1", "0", "1", "0"].map(String::from));
            cells.extend(["5.0", "6.0", "2.1", "3.2", "3.5"].map(String::from));
            csv.push_str(&cells.join(","));
            csv.push('\n');
        }
        FeatureTable::from_frame(Frame::from_csv_reader(csv.as_bytes()).unwrap()).unwrap()
    }

    fn request() -> FixtureRequest {
        FixtureRequest {
            home_team_id: 716,
            away_team_id: 732,
            odd_1: 3.6,
            odd_x: 3.0,
            odd_2: 2.25,
            referee: "Raul Martin Gonzalez Frances, Spain".to_string(),
            stadium: "Anxo Carro".to_string(),
            season: 2022,
            injured: vec![10, 999],
            starters: vec![21],
        }
    }

    #[test]
    fn vector_columns_equal_table_minus_excluded() {
        let history = history();
        let vector = build_fixture_vector(&history, &request()).unwrap();
        let expected: Vec<&str> = history
            .frame()
            .column_names()
            .filter(|c| !EXCLUDED_COLUMNS.contains(c))
            .collect();
        assert_eq!(vector.frame.column_names().collect::<Vec<_>>(), expected);
        assert_eq!(vector.frame.n_rows(), 1);
    }

    #[test]
    fn only_listed_players_are_flagged() {
        let vector = build_fixture_vector(&history(), &request()).unwrap();
        let f = &vector.frame;
        assert_eq!(f.value(0, "les-10"), Value::Binary(true));
        assert_eq!(f.value(0, "les-11"), Value::Binary(false));
        assert_eq!(f.value(0, "titu-20.0"), Value::Binary(false));
        assert_eq!(f.value(0, "titu-21.0"), Value::Binary(true));
        assert_eq!(vector.unmatched_injured, vec![999]);
        assert!(vector.unmatched_starters.is_empty());
    }

    #[test]
    fn statistics_use_long_run_trailing_sums() {
        let history = history();
        let vector = build_fixture_vector(&history, &request()).unwrap();
        // 716 at home: fouls 1, 3, 5, 7, 9 -> windows 9 and 15
        assert_eq!(vector.frame.value(0, "fouls_local"), Value::Float(12.0));
        // 732 away: same rows, same values
        assert_eq!(vector.frame.value(0, "fouls_away"), Value::Float(12.0));
        assert_eq!(vector.frame.value(0, "odd_2"), Value::Float(2.25));
        assert_eq!(
            vector.frame.value(0, "arbitro"),
            Value::Text("Raul Martin Gonzalez Frances, Spain".to_string())
        );

        let stranger = FixtureRequest {
            home_team_id: 1,
            ..request()
        };
        let vector = build_fixture_vector(&history, &stranger).unwrap();
        // every home window: 9, 15 (716) and 12, 18 (732)
        assert_eq!(vector.frame.value(0, "fouls_local"), Value::Float(13.5));
    }

    fn close(value: Value, expected: f64) -> bool {
        value.as_f64().is_some_and(|v| (v - expected).abs() < 1e-9)
    }

    fn side_mean(history: &FeatureTable, side: Side, team: i64) -> f64 {
        let groups = window::team_sequences(history.frame(), side).unwrap();
        let derived = window::derived_series(history.frame(), side).unwrap();
        let rows = &groups[&team];
        rows.iter().map(|&row| derived[row]).sum::<f64>() / rows.len() as f64
    }

    #[test]
    fn shots_to_score_is_the_team_mean_of_the_derived_series() {
        let history = history();
        let vector = build_fixture_vector(&history, &request()).unwrap();

        // 716 at home: 1.5, 5, 7 backfilled from the next match, then 9/3 and 15/3
        let home = side_mean(&history, Side::Home, 716);
        assert!((home - 4.3).abs() < 1e-9);
        assert!(close(vector.frame.value(0, "tiros_para_marcar_local"), home));

        // 732 away scores once per match: 3, 5, 7, 3, 5
        let away = side_mean(&history, Side::Away, 732);
        assert!((away - 4.6).abs() < 1e-9);
        assert!(close(vector.frame.value(0, "tiros_para_marcar_away"), away));
    }

    #[test]
    fn unseen_team_gets_the_column_mean_of_the_derived_series() {
        let history = history();
        let stranger = FixtureRequest {
            home_team_id: 1,
            ..request()
        };
        let vector = build_fixture_vector(&history, &stranger).unwrap();

        let derived = window::derived_series(history.frame(), Side::Home).unwrap();
        let column_mean = derived.iter().sum::<f64>() / derived.len() as f64;
        assert!((column_mean - 4.65).abs() < 1e-9);
        assert!(close(vector.frame.value(0, "tiros_para_marcar_local"), column_mean));
    }

    #[test]
    fn request_parses_from_json_with_default_lists() {
        let raw = r#"{"home_team_id":716,"away_team_id":732,"odd_1":3.6,"odd_x":3,"odd_2":2.25,
                      "referee":"R","stadium":"S","season":2022}"#;
        let parsed: FixtureRequest = serde_json::from_str(raw).unwrap();
        assert!(parsed.injured.is_empty() && parsed.starters.is_empty());
        assert_eq!(parsed.odd_x, 3.0);
    }
}
