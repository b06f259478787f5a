use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::frame::{Column, Frame, JoinType};
use crate::normalize::{FIXTURE_KEY, MATCH_COLUMNS, STAT_COLUMNS};
use crate::odds::{AWAY_KEY, HOME_KEY, ODDS_COLUMNS, SEASON};
use crate::pivot::{INJURIES, LINEUPS};
use crate::window::{self, Side, TIMESTAMP};

pub const INDEX_COLUMN: &str = "index";

/// The wide, null-free, one-row-per-match table shared by training and
/// fixture encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    frame: Frame,
}

impl FeatureTable {
    pub fn from_frame(frame: Frame) -> Result<Self> {
        frame
            .require_all(&MATCH_COLUMNS)
            .context("feature table")?;
        frame
            .require_all(STAT_COLUMNS.as_slice())
            .context("feature table")?;
        frame.require_all(&ODDS_COLUMNS).context("feature table")?;
        Ok(Self { frame })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let frame = Frame::read_csv(path)?;
        let table = Self::from_frame(frame)
            .with_context(|| format!("load feature table {}", path.display()))?;
        info!(
            path = %path.display(),
            rows = table.frame.n_rows(),
            columns = table.frame.n_cols(),
            "loaded feature table"
        );
        Ok(table)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let tmp = path.with_extension("csv.tmp");
        self.frame.write_csv(&tmp).context("write feature table")?;
        fs::rename(&tmp, path).context("swap feature table")?;
        Ok(())
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    pub fn n_rows(&self) -> usize {
        self.frame.n_rows()
    }

    pub fn injury_columns(&self) -> Vec<&str> {
        INJURIES.indicator_columns(&self.frame)
    }

    pub fn lineup_columns(&self) -> Vec<&str> {
        LINEUPS.indicator_columns(&self.frame)
    }
}

/// Normalized and pivoted inputs to the assembler.
#[derive(Debug, Clone, Copy)]
pub struct AssembleInputs<'a> {
    pub matches: &'a Frame,
    pub statistics: &'a Frame,
    pub injuries: &'a Frame,
    pub lineups: &'a Frame,
    pub odds: &'a Frame,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssembleReport {
    pub matches: usize,
    pub without_statistics: usize,
    pub before_odds: usize,
    pub after_odds: usize,
    pub null_rows_dropped: usize,
    pub rows: usize,
}

pub fn assemble(inputs: AssembleInputs<'_>) -> Result<(FeatureTable, AssembleReport)> {
    let mut report = AssembleReport {
        matches: inputs.matches.n_rows(),
        ..AssembleReport::default()
    };

    let df = inputs
        .matches
        .join(inputs.statistics, &[FIXTURE_KEY], &[FIXTURE_KEY], JoinType::Left)
        .context("join statistics")?;
    let keep: Vec<bool> = (0..df.n_rows())
        .map(|row| !df.all_null(row, STAT_COLUMNS.as_slice()))
        .collect();
    let df = df.filter(&keep)?;
    report.without_statistics = keep.iter().filter(|k| !**k).count();

    let df = join_indicators(&df, inputs.injuries).context("join injuries")?;
    let df = join_indicators(&df, inputs.lineups).context("join lineups")?;

    report.before_odds = df.n_rows();
    let mut df = df
        .join(
            inputs.odds,
            &[Side::Home.team_column(), Side::Away.team_column(), SEASON],
            &[HOME_KEY, AWAY_KEY, SEASON],
            JoinType::Inner,
        )
        .context("join odds")?;
    report.after_odds = df.n_rows();

    df.drop_columns(&[HOME_KEY, AWAY_KEY]);
    let (df, dropped) = df.drop_null_rows()?;
    report.null_rows_dropped = dropped;
    if dropped > 0 {
        warn!(rows = dropped, "dropped rows with missing values after joins");
    }

    let mut df = df;
    let odds_at = df.position(ODDS_COLUMNS[0]).unwrap_or(df.n_cols());
    for (offset, side) in Side::BOTH.into_iter().enumerate() {
        let series = window::derived_series(&df, side)?;
        df.insert_column(
            odds_at + offset,
            Column::new(side.derived_column().into(), series),
        )?;
    }

    let mut df = df.sorted_by(&[TIMESTAMP, FIXTURE_KEY])?;
    let index: Vec<i64> = (0..df.n_rows() as i64).collect();
    df.insert_column(0, Column::new(INDEX_COLUMN.into(), index))?;

    report.rows = df.n_rows();
    info!(
        matches = report.matches,
        without_statistics = report.without_statistics,
        without_odds = report.before_odds.saturating_sub(report.after_odds),
        incomplete = report.null_rows_dropped,
        rows = report.rows,
        columns = df.n_cols(),
        "assembled feature table"
    );
    Ok((FeatureTable { frame: df }, report))
}

/// Left join of a pivot table; a match without indicator rows gets zeros
/// in the columns the pivot brought in, and nowhere else.
fn join_indicators(df: &Frame, pivot: &Frame) -> Result<Frame> {
    let introduced: Vec<String> = pivot
        .column_names()
        .filter(|name| *name != FIXTURE_KEY)
        .map(str::to_string)
        .collect();
    let mut out = df.join(pivot, &[FIXTURE_KEY], &[FIXTURE_KEY], JoinType::Left)?;
    out.fill_nulls_with_zero(&introduced)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Value;

    fn frame(csv: &str) -> Frame {
        Frame::from_csv_reader(csv.as_bytes()).unwrap()
    }

    fn stats_frame(fixtures: &[i64]) -> Frame {
        let mut csv = String::from("fixture_id,");
        csv.push_str(&STAT_COLUMNS.join(","));
        csv.push('\n');
        for fixture in fixtures {
            csv.push_str(&fixture.to_string());
            for _ in 0..STAT_COLUMNS.len() {
                csv.push_str(",2");
            }
            csv.push('\n');
        }
        frame(&csv)
    }

    #[test]
    fn zero_fill_touches_only_indicator_columns() {
        let df = frame("fixture_id,arbitro\n1,\n2,Ref\n");
        let pivot = frame("fixture_id,les-5\n2,1\n");
        let out = join_indicators(&df, &pivot).unwrap();
        assert_eq!(out.value(0, "les-5").as_f64(), Some(0.0));
        assert_eq!(out.value(1, "les-5").as_f64(), Some(1.0));
        assert_eq!(out.value(0, "arbitro"), Value::Null);
    }

    #[test]
    fn assembled_table_orders_columns_and_rows() {
        let matches = frame(
            "fixture_id,fecha_timestamp,id_equipo_local,id_equipo_visitante,arbitro,estadio,season,goles_local,goles_visitante,goles_descanso_local,goles_descanso_visitante,resultado\n\
             2,200,1,2,R,S,2020,1,0,0,0,1\n\
             1,100,2,1,R,S,2020,0,0,0,0,0\n\
             999,150,1,2,R,S,2099,3,0,1,0,1\n",
        );
        let statistics = stats_frame(&[1, 2, 999]);
        let injuries = frame("fixture_id,les-7\n1,1\n");
        let lineups = frame("fixture_id,titu-8.0\n2,1\n");
        let odds = frame(
            "HomeTeam,AwayTeam,odd_1,odd_x,odd_2,season\n1,2,2.0,3.0,4.0,2020\n2,1,2.5,3.0,3.0,2020\n",
        );
        let (table, report) = assemble(AssembleInputs {
            matches: &matches,
            statistics: &statistics,
            injuries: &injuries,
            lineups: &lineups,
            odds: &odds,
        })
        .unwrap();

        let df = table.frame();
        assert_eq!(report.before_odds, 3);
        assert_eq!(report.after_odds, 2);
        assert_eq!(df.n_rows(), 2);
        assert_eq!(df.value(0, "fixture_id"), Value::Int(1));
        assert_eq!(df.value(1, "fixture_id"), Value::Int(2));
        assert_eq!(df.value(0, INDEX_COLUMN), Value::Int(0));

        let names: Vec<&str> = df.column_names().collect();
        assert_eq!(names[0], INDEX_COLUMN);
        assert!(!names.contains(&HOME_KEY) && !names.contains(&AWAY_KEY));
        let tail = &names[names.len() - 5..];
        assert_eq!(
            tail,
            &[
                "tiros_para_marcar_local",
                "tiros_para_marcar_away",
                "odd_1",
                "odd_x",
                "odd_2"
            ]
        );
        assert_eq!(table.injury_columns(), vec!["les-7"]);
        assert_eq!(table.lineup_columns(), vec!["titu-8.0"]);
        assert!((0..df.n_rows()).all(|row| !df.row_has_null(row)));
    }

    #[test]
    fn matches_without_any_statistics_are_dropped() {
        let matches = frame(
            "fixture_id,fecha_timestamp,id_equipo_local,id_equipo_visitante,arbitro,estadio,season,goles_local,goles_visitante,goles_descanso_local,goles_descanso_visitante,resultado\n\
             1,100,1,2,R,S,2020,1,0,0,0,1\n\
             2,200,2,1,R,S,2020,1,0,0,0,1\n",
        );
        let statistics = stats_frame(&[1]);
        let empty = Frame::from_columns(vec![Column::new("fixture_id".into(), Vec::<i64>::new())]).unwrap();
        let odds = frame("HomeTeam,AwayTeam,odd_1,odd_x,odd_2,season\n1,2,2.0,3.0,4.0,2020\n2,1,2.0,3.0,4.0,2020\n");
        let (table, report) = assemble(AssembleInputs {
            matches: &matches,
            statistics: &statistics,
            injuries: &empty,
            lineups: &empty,
            odds: &odds,
        })
        .unwrap();
        assert_eq!(report.without_statistics, 1);
        assert_eq!(table.n_rows(), 1);
    }
}
