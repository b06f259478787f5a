//! Name search over the dictionaries and the feature table, for filling in
//! a fixture request by hand.

use std::collections::HashSet;

use anyhow::{Context, Result};
use strsim::jaro_winkler;

use crate::assemble::FeatureTable;
use crate::frame::{Cells, Frame};

const TEAM_NAME: &str = "equipo_jugador";
const TEAM_ID: &str = "id_equipo";
const TEAM_SEASON: &str = "temporada_equipo";
const FUZZY_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamMatch {
    pub name: String,
    pub id: i64,
}

/// Lowercase with Spanish/Latin-1 diacritics removed.
pub fn fold_accents(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Teams whose dictionary name contains `query`, one entry per id.
pub fn search_teams(dictionary: &Frame, query: &str) -> Result<Vec<TeamMatch>> {
    let names = dictionary.require(TEAM_NAME).context("team search")?;
    let ids = dictionary.i64_values(TEAM_ID).context("team search")?;
    let needle = fold_accents(query.trim());

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in 0..dictionary.n_rows() {
        let (Some(name), Some(id)) = (names.str_at(row), ids[row]) else {
            continue;
        };
        if fold_accents(name).contains(&needle) && seen.insert(id) {
            out.push(TeamMatch {
                name: name.to_string(),
                id,
            });
        }
    }
    Ok(out)
}

/// Dictionary rows for one team in one season.
pub fn players_for_team(dictionary: &Frame, team_id: i64, season: i64) -> Result<Frame> {
    let ids = dictionary.i64_values(TEAM_ID).context("player listing")?;
    let seasons = dictionary.i64_values(TEAM_SEASON).context("player listing")?;
    let keep: Vec<bool> = ids
        .iter()
        .zip(&seasons)
        .map(|(id, s)| *id == Some(team_id) && *s == Some(season))
        .collect();
    dictionary.filter(&keep)
}

/// Referee name exactly as spelled in the history.
pub fn canonical_referee(table: &FeatureTable, query: &str) -> Result<Option<String>> {
    canonical_value(table.frame(), "arbitro", query)
}

/// Stadium name exactly as spelled in the history.
pub fn canonical_stadium(table: &FeatureTable, query: &str) -> Result<Option<String>> {
    canonical_value(table.frame(), "estadio", query)
}

/// First value containing the query, else the closest value by
/// Jaro-Winkler when it is close enough.
fn canonical_value(frame: &Frame, column: &str, query: &str) -> Result<Option<String>> {
    let data = frame.require(column)?;
    let needle = fold_accents(query.trim());
    if needle.is_empty() {
        return Ok(None);
    }

    let mut distinct: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for row in 0..frame.n_rows() {
        if let Some(value) = data.str_at(row)
            && seen.insert(value)
        {
            distinct.push(value);
        }
    }

    if let Some(hit) = distinct.iter().find(|v| fold_accents(v).contains(&needle)) {
        return Ok(Some(hit.to_string()));
    }

    let best = distinct
        .iter()
        .map(|v| (jaro_winkler(&fold_accents(v), &needle), *v))
        .filter(|(score, _)| *score >= FUZZY_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0));
    Ok(best.map(|(_, v)| v.to_string()))
}
