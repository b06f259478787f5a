use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::frame::{Cells, Column, Frame};

pub const HOME_KEY: &str = "HomeTeam";
pub const AWAY_KEY: &str = "AwayTeam";
pub const SEASON: &str = "season";
pub const ODDS_COLUMNS: [&str; 3] = ["odd_1", "odd_x", "odd_2"];
const SOURCE_ODDS: [&str; 3] = ["B365H", "B365D", "B365A"];

const DIVISIONS: [&str; 2] = ["SP1", "SP2"];
const FIRST_SEASON: i32 = 2012;
const LAST_SEASON: i32 = 2022;

/// Bookmaker spelling -> canonical name as it appears in the team dictionary.
const NAME_EQUIVALENCES: [(&str, &str); 70] = [
    ("Celta", "Celta Vigo"),
    ("Mallorca", "Mallorca"),
    ("Sevilla", "Sevilla"),
    ("Ath Bilbao", "Athletic Club"),
    ("Barcelona", "Barcelona"),
    ("Levante", "Levante"),
    ("Real Madrid", "Real Madrid"),
    ("La Coruna", "Deportivo La Coruna"),
    ("Vallecano", "Rayo Vallecano"),
    ("Zaragoza", "Zaragoza"),
    ("Betis", "Real Betis"),
    ("Espanol", "Espanyol"),
    ("Malaga", "Malaga"),
    ("Sociedad", "Real Sociedad"),
    ("Getafe", "Getafe"),
    ("Granada", "Granada CF"),
    ("Osasuna", "Osasuna"),
    ("Valencia", "Valencia"),
    ("Ath Madrid", "Atletico Madrid"),
    ("Valladolid", "Valladolid"),
    ("Barcelona B", "Barcelona B"),
    ("Mirandes", "Mirandes"),
    ("Villarreal", "Villarreal"),
    ("Girona", "Girona"),
    ("Lugo", "Lugo"),
    ("Xerez", "Xerez"),
    ("Alcorcon", "Alcorcon"),
    ("Elche", "Elche"),
    ("Numancia", "Numancia"),
    ("Santander", "Racing Santander"),
    ("Murcia", "Real Murcia"),
    ("Almeria", "Almeria"),
    ("Guadalajara", "Guadalajara"),
    ("Huesca", "Huesca"),
    ("Las Palmas", "Las Palmas"),
    ("Ponferradina", "Ponferradina"),
    ("Real Madrid B", "Real Madrid II"),
    ("Recreativo", "Recreativo Huelva"),
    ("Sabadell", "Sabadell"),
    ("Sp Gijon", "Sporting Gijon"),
    ("Cordoba", "Cordoba"),
    ("Hercules", "Hércules"),
    ("Jaen", "Real Jaén"),
    ("Alaves", "Alaves"),
    ("Eibar", "Eibar"),
    ("Tenerife", "Tenerife"),
    ("Albacete", "Albacete"),
    ("Leganes", "Leganes"),
    ("Llagostera", "Llagostera"),
    ("Gimnastic", "Gimnastic"),
    ("Oviedo", "Oviedo"),
    ("Ath Bilbao B", "Athletic Club II"),
    ("Sevilla B", "Sevilla Atletico"),
    ("Reus Deportiu", "Reus"),
    ("Cadiz", "Cadiz"),
    ("UCAM Murcia", "Ucam Murcia"),
    ("Lorca", "Lorca"),
    ("Leonesa", "Cultural Leonesa"),
    ("Extremadura UD", "Extremadura"),
    ("Rayo Majadahonda", "Rayo Majadahonda"),
    ("Fuenlabrada", "Fuenlabrada"),
    ("Castellon", "Castellón"),
    ("Cartagena", "FC Cartagena"),
    ("Logrones", "UD Logroñés"),
    ("Sociedad B", "Real Sociedad II"),
    ("Ibiza", "Ibiza"),
    ("Amorebieta", "Amorebieta"),
    ("Burgos", "Burgos"),
    ("Villarreal B", "Villarreal II"),
    ("Andorra", "FC Andorra"),
];

static EQUIVALENCES: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| NAME_EQUIVALENCES.iter().copied().collect());

pub fn canonical_team_name(source_name: &str) -> Option<&'static str> {
    EQUIVALENCES.get(source_name.trim()).copied()
}

/// Canonical team name -> internal id, built from the team dictionary.
#[derive(Debug, Clone, Default)]
pub struct TeamDirectory {
    ids: HashMap<String, i64>,
}

impl TeamDirectory {
    pub const NAME_COLUMN: &'static str = "equipo_jugador";
    pub const ID_COLUMN: &'static str = "id_equipo";

    pub fn from_frame(dictionary: &Frame) -> Result<Self> {
        let names = dictionary
            .require(Self::NAME_COLUMN)
            .context("team dictionary")?;
        let ids = dictionary
            .require(Self::ID_COLUMN)
            .context("team dictionary")?;
        let mut directory = TeamDirectory::default();
        for row in 0..dictionary.n_rows() {
            if let (Some(name), Some(id)) = (names.str_at(row), ids.i64_at(row)) {
                directory.ids.insert(name.trim().to_string(), id);
            }
        }
        debug!(teams = directory.ids.len(), "loaded team directory");
        Ok(directory)
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        Self {
            ids: pairs
                .into_iter()
                .map(|(name, id)| (name.to_string(), id))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id_for_canonical(&self, canonical: &str) -> Option<i64> {
        self.ids.get(canonical).copied()
    }

    /// Source spelling -> canonical name -> id. Both stages must hit.
    pub fn resolve(&self, source_name: &str) -> Option<i64> {
        canonical_team_name(source_name).and_then(|canonical| self.id_for_canonical(canonical))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TeamNamePolicy {
    #[default]
    Drop,
    Fail,
}

#[derive(Debug, Clone)]
pub struct OddsFile {
    pub name: String,
    pub season: i64,
    pub frame: Frame,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OddsReport {
    pub files: usize,
    pub input_rows: usize,
    pub unresolved: BTreeMap<String, usize>,
    pub dropped_rows: usize,
    pub duplicate_keys: usize,
    pub output_rows: usize,
}

/// Season year from an odds file name: the first four characters after the
/// first `-`, e.g. `SP1-2015.csv` -> 2015.
pub fn season_from_file_name(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let (_, rest) = name.split_once('-')?;
    let year: String = rest.chars().take(4).collect();
    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    year.parse().ok()
}

/// The fixed list of odds sources, two divisions per season.
pub fn default_odds_sources(odds_dir: &Path) -> Vec<PathBuf> {
    (FIRST_SEASON..=LAST_SEASON)
        .flat_map(|season| {
            DIVISIONS
                .iter()
                .map(move |division| odds_dir.join(format!("{division}-{season}.csv")))
        })
        .collect()
}

/// Files are parsed in parallel; the result keeps the order of `paths`.
pub fn load_odds_files(paths: &[PathBuf]) -> Result<Vec<OddsFile>> {
    paths
        .par_iter()
        .map(|path| {
            let season = season_from_file_name(path)
                .with_context(|| format!("no season in odds file name {}", path.display()))?;
            let frame = Frame::read_csv(path)?;
            Ok(OddsFile {
                name: path.display().to_string(),
                season,
                frame,
            })
        })
        .collect()
}

/// Concatenates every odds file into `(HomeTeam, AwayTeam, odd_1, odd_x,
/// odd_2, season)` with integer team ids. Rows whose names do not resolve
/// never reach the output.
pub fn normalize_odds(
    files: &[OddsFile],
    directory: &TeamDirectory,
    policy: TeamNamePolicy,
) -> Result<(Frame, OddsReport)> {
    let mut report = OddsReport {
        files: files.len(),
        ..OddsReport::default()
    };
    let mut home = Vec::new();
    let mut away = Vec::new();
    let mut odds: [Vec<Option<f64>>; 3] = Default::default();
    let mut seasons = Vec::new();

    for file in files {
        let frame = &file.frame;
        let mut needed = vec![HOME_KEY, AWAY_KEY];
        needed.extend(SOURCE_ODDS);
        frame
            .require_all(&needed)
            .with_context(|| format!("odds file {}", file.name))?;
        report.input_rows += frame.n_rows();

        let home_names = frame.require(HOME_KEY)?;
        let away_names = frame.require(AWAY_KEY)?;
        let prices: Vec<Vec<Option<f64>>> = SOURCE_ODDS
            .iter()
            .map(|name| frame.f64_values(name))
            .collect::<Result<_>>()?;

        let mut kept = 0usize;
        for row in 0..frame.n_rows() {
            let mut resolve = |names: &Column| {
                let name = names.str_at(row)?;
                let id = directory.resolve(name);
                if id.is_none() {
                    *report.unresolved.entry(name.trim().to_string()).or_default() += 1;
                }
                id
            };
            let h = resolve(home_names);
            let a = resolve(away_names);
            let p: Vec<Option<f64>> = prices.iter().map(|values| values[row]).collect();
            let (Some(h), Some(a)) = (h, a) else {
                report.dropped_rows += 1;
                continue;
            };
            if p.iter().any(Option::is_none) {
                report.dropped_rows += 1;
                continue;
            }
            home.push(Some(h));
            away.push(Some(a));
            for (out, value) in odds.iter_mut().zip(p) {
                out.push(value);
            }
            seasons.push(Some(file.season));
            kept += 1;
        }
        debug!(file = %file.name, season = file.season, rows = kept, "normalized odds file");
    }

    if !report.unresolved.is_empty() {
        let names: Vec<String> = report
            .unresolved
            .iter()
            .map(|(name, count)| format!("{name} ({count})"))
            .collect();
        match policy {
            TeamNamePolicy::Fail => bail!("unresolved team names in odds files: {}", names.join(", ")),
            TeamNamePolicy::Drop => warn!(
                names = %names.join(", "),
                "dropped odds rows with unresolved team names"
            ),
        }
    }

    let mut seen = HashSet::new();
    for i in 0..home.len() {
        if !seen.insert((home[i], away[i], seasons[i])) {
            report.duplicate_keys += 1;
        }
    }
    if report.duplicate_keys > 0 {
        warn!(
            duplicates = report.duplicate_keys,
            "repeated (home, away, season) odds keys will fan out on join"
        );
    }

    let [odd_1, odd_x, odd_2] = odds;
    let frame = Frame::from_columns(vec![
        Column::new(HOME_KEY.into(), home),
        Column::new(AWAY_KEY.into(), away),
        Column::new(ODDS_COLUMNS[0].into(), odd_1),
        Column::new(ODDS_COLUMNS[1].into(), odd_x),
        Column::new(ODDS_COLUMNS[2].into(), odd_2),
        Column::new(SEASON.into(), seasons),
    ])?;
    report.output_rows = frame.n_rows();
    info!(
        files = report.files,
        input = report.input_rows,
        dropped = report.dropped_rows,
        output = report.output_rows,
        "normalized odds"
    );
    Ok((frame, report))
}

/// Bookmaker margin removed by proportional scaling of implied probabilities.
pub fn no_vig_from_decimal(home: f64, draw: f64, away: f64) -> Option<(f64, f64, f64)> {
    if home <= 1.0 || draw <= 1.0 || away <= 1.0 {
        return None;
    }
    let ih = 1.0 / home;
    let id = 1.0 / draw;
    let ia = 1.0 / away;
    let sum = ih + id + ia;
    if sum <= 0.0 {
        return None;
    }
    Some((ih / sum, id / sum, ia / sum))
}
