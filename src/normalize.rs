use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use polars::prelude::DataType;
use tracing::{debug, info};

use crate::frame::{Cells, Column, Frame, Value};
use crate::model::Outcome;

pub const FIXTURE_KEY: &str = "fixture_id";
pub const LABEL_COLUMN: &str = "resultado";

pub const MATCH_COLUMNS: [&str; 11] = [
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
];

const HALFTIME_GOALS: [&str; 2] = ["goles_descanso_local", "goles_descanso_visitante"];
const FULLTIME_GOALS: [&str; 2] = ["goles_local", "goles_visitante"];

pub const STAT_BASES: [&str; 14] = [
    "shots_on_goal",
    "shots_off_goal",
    "total_shots",
    "blocked_shots",
    "shots_insidebox",
    "shots_outsidebox",
    "fouls",
    "corners",
    "offsides",
    "ball_possession",
    "yellow_cards",
    "red_cards",
    "goalkeeper_saves",
    "total_pass",
];

const POSSESSION_BASE: &str = "ball_possession";
const YELLOW_CARDS: [&str; 2] = ["yellow_cards_local", "yellow_cards_away"];

/// Source columns whose header does not describe their content.
const MISLABELED: [(&str, &str); 3] = [
    ("fixture_id_2", "fixture_id"),
    ("pass_precision_local", "total_pass_local"),
    ("pass_precision_away", "total_pass_away"),
];

/// The 28 per-side statistic columns, `_local` before `_away` for each base.
pub static STAT_COLUMNS: Lazy<Vec<String>> = Lazy::new(|| {
    STAT_BASES
        .iter()
        .flat_map(|base| [format!("{base}_local"), format!("{base}_away")])
        .collect()
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub input_rows: usize,
    pub all_null_dropped: usize,
    pub possession_dropped: usize,
    pub yellow_cards_dropped: usize,
    pub output_rows: usize,
}

/// Match facts: fixed column order, halftime goals null -> 0, goals as
/// integers and a `resultado` label coded 0 draw / 1 home / 2 away.
pub fn normalize_matches(raw: &Frame) -> Result<Frame> {
    raw.require_all(&MATCH_COLUMNS)
        .context("match facts table")?;
    let mut out = raw.select(&MATCH_COLUMNS)?;

    out.fill_nulls_with_zero(&HALFTIME_GOALS)?;
    for name in HALFTIME_GOALS.into_iter().chain(FULLTIME_GOALS) {
        let coerced = coerce_int(out.require(name)?);
        out.replace_column(coerced)?;
    }

    let labels: Vec<Option<i64>> = (0..out.n_rows())
        .map(|row| {
            let given = raw
                .column(LABEL_COLUMN)
                .and_then(|column| parse_label(&column.value_at(row)));
            given.or_else(|| {
                let home = out.value(row, "goles_local").as_f64()?;
                let away = out.value(row, "goles_visitante").as_f64()?;
                Some(Outcome::from_goals(home, away).code())
            })
        })
        .collect();
    out.push_column(Column::new(LABEL_COLUMN.into(), labels))?;

    info!(rows = out.n_rows(), "normalized match facts");
    Ok(out)
}

fn parse_label(value: &Value) -> Option<i64> {
    let outcome = match value {
        Value::Text(raw) => match raw.trim().to_ascii_uppercase().as_str() {
            "X" | "D" | "0" => Some(Outcome::Draw),
            "1" | "H" => Some(Outcome::Home),
            "2" | "A" => Some(Outcome::Away),
            _ => None,
        },
        other => other
            .as_f64()
            .filter(|v| v.fract() == 0.0)
            .and_then(|v| Outcome::from_code(v as i64)),
    };
    outcome.map(Outcome::code)
}

/// In-match statistics. Corrupt rows are dropped, never raised.
pub fn normalize_statistics(raw: &Frame) -> Result<(Frame, StatsReport)> {
    let mut df = raw.clone();
    let mut report = StatsReport {
        input_rows: df.n_rows(),
        ..StatsReport::default()
    };

    for (from, to) in MISLABELED {
        if df.rename(from, to)? {
            debug!(from, to, "renamed mislabeled statistics column");
        }
    }
    df.require(FIXTURE_KEY).context("statistics table")?;
    df.require_all(STAT_COLUMNS.as_slice())
        .context("statistics table")?;

    let keep: Vec<bool> = (0..df.n_rows())
        .map(|row| !df.all_null(row, STAT_COLUMNS.as_slice()))
        .collect();
    df = df.filter(&keep)?;
    report.all_null_dropped = report.input_rows - df.n_rows();

    let before = df.n_rows();
    df = scale_possession(df)?;
    report.possession_dropped = before - df.n_rows();

    let before = df.n_rows();
    df = coerce_yellow_cards(df)?;
    report.yellow_cards_dropped = before - df.n_rows();

    let mut projection = vec![FIXTURE_KEY.to_string()];
    projection.extend(STAT_COLUMNS.iter().cloned());
    let mut out = df.select(&projection)?;
    out.fill_nulls_with_zero(STAT_COLUMNS.as_slice())?;

    for name in STAT_COLUMNS.iter() {
        if name.starts_with(POSSESSION_BASE) {
            continue;
        }
        let coerced = coerce_int(out.require(name)?);
        out.replace_column(coerced)?;
    }

    report.output_rows = out.n_rows();
    info!(
        input = report.input_rows,
        all_null = report.all_null_dropped,
        possession = report.possession_dropped,
        yellow_cards = report.yellow_cards_dropped,
        output = report.output_rows,
        "normalized statistics"
    );
    Ok((out, report))
}

enum Possession {
    Missing,
    Rate(f64),
    Corrupt,
}

fn parse_possession(value: Value) -> Possession {
    let pct = match value {
        Value::Null => return Possession::Missing,
        Value::Text(raw) => raw.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        other => other.as_f64(),
    };
    match pct {
        Some(v) if (0.0..=100.0).contains(&v) => Possession::Rate(v / 100.0),
        _ => Possession::Corrupt,
    }
}

fn scale_possession(df: Frame) -> Result<Frame> {
    let names = [
        format!("{POSSESSION_BASE}_local"),
        format!("{POSSESSION_BASE}_away"),
    ];
    let mut keep = vec![true; df.n_rows()];
    let mut scaled = Vec::with_capacity(names.len());
    for name in &names {
        let column = df.require(name)?;
        let values: Vec<Option<f64>> = (0..df.n_rows())
            .map(|row| match parse_possession(column.value_at(row)) {
                Possession::Missing => None,
                Possession::Rate(v) => Some(v),
                Possession::Corrupt => {
                    keep[row] = false;
                    None
                }
            })
            .collect();
        scaled.push(Column::new(name.as_str().into(), values));
    }
    let mut df = df;
    for column in scaled {
        df.replace_column(column)?;
    }
    df.filter(&keep)
}

fn coerce_yellow_cards(mut df: Frame) -> Result<Frame> {
    let mut keep = vec![true; df.n_rows()];
    for name in YELLOW_CARDS {
        let values = df.f64_values(name)?;
        for (row, value) in values.iter().enumerate() {
            if value.is_none() {
                keep[row] = false;
            }
        }
        df.replace_column(Column::new(name.into(), values))?;
    }
    df.filter(&keep)
}

/// Numeric coercion that truncates like a float-to-int cast. Unparseable
/// cells become null.
pub(crate) fn coerce_int(column: &Column) -> Column {
    if column.dtype() == &DataType::Int64 {
        return column.clone();
    }
    let values: Vec<Option<i64>> = column
        .to_f64_vec()
        .into_iter()
        .map(|v| v.map(|v| v.trunc() as i64))
        .collect();
    Column::new(column.name().clone(), values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_csv(rows: &[&str]) -> Frame {
        let mut header: Vec<String> = STAT_COLUMNS
            .iter()
            .map(|c| c.replace("total_pass", "pass_precision"))
            .collect();
        header.push("fixture_id_2".to_string());
        let mut csv = header.join(",");
        csv.push('\n');
        for row in rows {
            csv.push_str(row);
            csv.push('\n');
        }
        Frame::from_csv_reader(csv.as_bytes()).unwrap()
    }

    fn stat_row(possession: (&str, &str), yellow: (&str, &str), fixture: i64) -> String {
        let mut cells = Vec::new();
        for base in STAT_BASES {
            match base {
                "ball_possession" => {
                    cells.push(possession.0.to_string());
                    cells.push(possession.1.to_string());
                }
                "yellow_cards" => {
                    cells.push(yellow.0.to_string());
                    cells.push(yellow.1.to_string());
                }
                "total_shots" => {
                    cells.push("12".to_string());
                    cells.push(String::new());
                }
                _ => {
                    cells.push("3".to_string());
                    cells.push("4".to_string());
                }
            }
        }
        cells.push(fixture.to_string());
        cells.join(",")
    }

    #[test]
    fn statistics_filters_corrupt_rows_and_scales_possession() {
        let all_null = format!("{}{}", ",".repeat(STAT_COLUMNS.len()), 4);
        let df = stats_csv(&[
            &stat_row(("55%", "45%"), ("2", "1"), 1),
            &stat_row(("garbled", "45%"), ("2", "1"), 2),
            &stat_row(("50%", "50%"), ("12%", "1"), 3),
            &all_null,
            &stat_row(("60%", "40%"), ("", "3"), 5),
        ]);
        let (out, report) = normalize_statistics(&df).unwrap();

        assert_eq!(report.all_null_dropped, 1);
        assert_eq!(report.possession_dropped, 1);
        assert_eq!(report.yellow_cards_dropped, 2);
        assert_eq!(out.n_rows(), 1);
        assert_eq!(out.value(0, "fixture_id"), Value::Int(1));
        assert_eq!(out.value(0, "ball_possession_local"), Value::Float(0.55));
        assert_eq!(out.value(0, "total_shots_away"), Value::Int(0));
        assert_eq!(out.value(0, "yellow_cards_local"), Value::Int(2));
    }

    #[test]
    fn mislabeled_columns_are_renamed_and_gone() {
        let df = stats_csv(&[&stat_row(("50%", "50%"), ("1", "1"), 10)]);
        let (out, _) = normalize_statistics(&df).unwrap();
        let names: Vec<&str> = out.column_names().collect();
        assert!(!names.iter().any(|n| n.starts_with("pass_precision")));
        assert!(!names.contains(&"fixture_id_2"));
        assert_eq!(names[0], "fixture_id");
        assert_eq!(names[1..].len(), STAT_COLUMNS.len());
        assert_eq!(out.value(0, "total_pass_local"), Value::Int(3));
    }

    #[test]
    fn possession_stays_in_unit_interval() {
        let df = stats_csv(&[
            &stat_row(("100%", "0%"), ("0", "0"), 1),
            &stat_row(("140%", "0%"), ("0", "0"), 2),
            &stat_row(("-5", "0%"), ("0", "0"), 3),
        ]);
        let (out, _) = normalize_statistics(&df).unwrap();
        assert_eq!(out.n_rows(), 1);
        for row in 0..out.n_rows() {
            for side in ["ball_possession_local", "ball_possession_away"] {
                let v = out.value(row, side).as_f64().unwrap();
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn matches_fill_halftime_goals_and_derive_labels() {
        let csv = "fixture_id,fecha_timestamp,id_equipo_local,id_equipo_visitante,arbitro,estadio,season,goles_local,goles_visitante,goles_descanso_local,goles_descanso_visitante,extra\n\
                   1,100,10,20,Ref,Camp,2020,2.0,1.0,,1.0,x\n\
                   2,200,20,10,Ref,Camp,2020,0,0,0,,y\n\
                   3,300,10,20,Ref,Camp,2020,0,3,,,z\n";
        let raw = Frame::from_csv_reader(csv.as_bytes()).unwrap();
        let out = normalize_matches(&raw).unwrap();

        let names: Vec<&str> = out.column_names().collect();
        assert_eq!(&names[..11], &MATCH_COLUMNS);
        assert_eq!(names[11], LABEL_COLUMN);
        assert_eq!(out.value(0, "goles_descanso_local"), Value::Int(0));
        assert_eq!(out.value(1, "goles_descanso_visitante"), Value::Int(0));
        assert_eq!(out.value(0, "goles_local"), Value::Int(2));
        assert_eq!(out.value(0, LABEL_COLUMN), Value::Int(1));
        assert_eq!(out.value(1, LABEL_COLUMN), Value::Int(0));
        assert_eq!(out.value(2, LABEL_COLUMN), Value::Int(2));
    }

    #[test]
    fn text_labels_are_mapped() {
        assert_eq!(parse_label(&Value::Text("x".into())), Some(0));
        assert_eq!(parse_label(&Value::Text("H".into())), Some(1));
        assert_eq!(parse_label(&Value::Int(2)), Some(2));
        assert_eq!(parse_label(&Value::Int(7)), None);
        assert_eq!(parse_label(&Value::Null), None);
    }
}
