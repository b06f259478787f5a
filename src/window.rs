//! Per-team trailing windows.
//!
//! Lags are taken inside each team's own sequence of matches on one side
//! (home rows grouped by home team, away rows by away team), never across
//! the global match order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::Result;

use crate::frame::Frame;

pub const WINDOW: usize = 3;
pub const TIMESTAMP: &str = "fecha_timestamp";
pub const FIXTURE_ID: &str = "fixture_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Home, Side::Away];

    pub fn team_column(self) -> &'static str {
        match self {
            Side::Home => "id_equipo_local",
            Side::Away => "id_equipo_visitante",
        }
    }

    pub fn goals_column(self) -> &'static str {
        match self {
            Side::Home => "goles_local",
            Side::Away => "goles_visitante",
        }
    }

    pub fn shots_column(self) -> &'static str {
        match self {
            Side::Home => "total_shots_local",
            Side::Away => "total_shots_away",
        }
    }

    /// Suffix of the statistic columns that belong to this side.
    pub fn stat_suffix(self) -> &'static str {
        match self {
            Side::Home => "_local",
            Side::Away => "_away",
        }
    }

    pub fn derived_column(self) -> &'static str {
        match self {
            Side::Home => "tiros_para_marcar_local",
            Side::Away => "tiros_para_marcar_away",
        }
    }
}

/// Row indices grouped by the side's team id, each group in
/// `(fecha_timestamp, fixture_id)` order. Rows with no team id are left out.
pub fn team_sequences(frame: &Frame, side: Side) -> Result<BTreeMap<i64, Vec<usize>>> {
    let teams = frame.i64_values(side.team_column())?;
    let stamps = frame.f64_values(TIMESTAMP)?;
    let fixtures = frame.f64_values(FIXTURE_ID)?;

    let mut order: Vec<usize> = (0..frame.n_rows()).collect();
    order.sort_by(|&a, &b| {
        cmp_nulls_last(stamps[a], stamps[b]).then_with(|| cmp_nulls_last(fixtures[a], fixtures[b]))
    });

    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for row in order {
        if let Some(team) = teams[row] {
            groups.entry(team).or_default().push(row);
        }
    }
    Ok(groups)
}

fn cmp_nulls_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// `v[i-1] + v[i-2] + v[i-3]` inside each sequence; null when the window is
/// incomplete or touches a null.
pub fn trailing_sums(values: &[Option<f64>], groups: &BTreeMap<i64, Vec<usize>>) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for rows in groups.values() {
        for (pos, &row) in rows.iter().enumerate().skip(WINDOW) {
            out[row] = rows[pos - WINDOW..pos]
                .iter()
                .map(|&prev| values[prev])
                .sum::<Option<f64>>();
        }
    }
    out
}

/// The next value in each row's sequence.
pub fn leads(values: &[Option<f64>], groups: &BTreeMap<i64, Vec<usize>>) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for rows in groups.values() {
        for pair in rows.windows(2) {
            out[pair[0]] = values[pair[1]];
        }
    }
    out
}

/// Trailing sums with incomplete windows backfilled from the next match.
/// Early rows therefore see one future value.
pub fn trailing_with_backfill(
    values: &[Option<f64>],
    groups: &BTreeMap<i64, Vec<usize>>,
) -> Vec<Option<f64>> {
    trailing_sums(values, groups)
        .into_iter()
        .zip(leads(values, groups))
        .map(|(sum, lead)| sum.or(lead))
        .collect()
}

/// Shots needed per goal. With no goals the shot count itself stands in.
pub fn shots_to_score(goals: Option<f64>, shots: Option<f64>) -> Option<f64> {
    match (goals, shots) {
        (Some(g), shots) if g == 0.0 => shots,
        (Some(g), Some(s)) => Some(s / g),
        _ => None,
    }
}

pub fn mean(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0_f64, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Fills nulls with the column mean, or 0.0 when nothing is known.
pub fn mean_impute(values: &[Option<f64>]) -> Vec<f64> {
    let fill = mean(values.iter().copied()).unwrap_or(0.0);
    values.iter().map(|v| v.unwrap_or(fill)).collect()
}

/// The per-row "shots needed to score" series for one side.
pub fn derived_series(frame: &Frame, side: Side) -> Result<Vec<f64>> {
    let groups = team_sequences(frame, side)?;
    let goals = frame.f64_values(side.goals_column())?;
    let shots = frame.f64_values(side.shots_column())?;

    let prior_goals = trailing_with_backfill(&goals, &groups);
    let prior_shots = trailing_with_backfill(&shots, &groups);
    let ratio: Vec<Option<f64>> = prior_goals
        .into_iter()
        .zip(prior_shots)
        .map(|(g, s)| shots_to_score(g, s))
        .collect();
    Ok(mean_impute(&ratio))
}

/// Long-run form of one team in one statistic: the mean of every complete
/// trailing sum the team has on that side. Falls back to the mean over all
/// teams, then to 0.0.
pub fn trailing_form(values: &[Option<f64>], groups: &BTreeMap<i64, Vec<usize>>, team: i64) -> f64 {
    let sums = trailing_sums(values, groups);
    let team_mean = groups
        .get(&team)
        .and_then(|rows| mean(rows.iter().map(|&row| sums[row])));
    team_mean.or_else(|| mean(sums.iter().copied())).unwrap_or(0.0)
}

/// Mean of a per-row series over one team's rows on a side, or over every
/// row when the team never played there.
pub fn team_average(
    series: &[f64],
    groups: &BTreeMap<i64, Vec<usize>>,
    team: i64,
) -> f64 {
    let team_mean = groups
        .get(&team)
        .and_then(|rows| mean(rows.iter().map(|&row| Some(series[row]))));
    team_mean
        .or_else(|| mean(series.iter().map(|v| Some(*v))))
        .unwrap_or(0.0)
}
