use anyhow::{Context, Result};
use tracing::info;

use crate::assemble::{AssembleInputs, AssembleReport, FeatureTable, assemble};
use crate::config::PipelineConfig;
use crate::frame::Frame;
use crate::normalize::{StatsReport, normalize_matches, normalize_statistics};
use crate::odds::{
    OddsFile, OddsReport, TeamDirectory, TeamNamePolicy, default_odds_sources, load_odds_files,
    normalize_odds,
};
use crate::pivot::{INJURIES, LINEUPS, PivotReport, pivot};

/// Raw extracts as read from disk, before any cleaning.
#[derive(Debug, Clone)]
pub struct RawTables {
    pub matches: Frame,
    pub statistics: Frame,
    pub lineups: Frame,
    pub injuries: Frame,
    pub teams: Frame,
    pub odds: Vec<OddsFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub statistics: StatsReport,
    pub injuries: PivotReport,
    pub lineups: PivotReport,
    pub odds: OddsReport,
    pub assemble: AssembleReport,
}

pub fn load_raw_tables(config: &PipelineConfig) -> Result<RawTables> {
    let read = |path: std::path::PathBuf, what: &str| {
        Frame::read_csv(&path).with_context(|| format!("load {what}"))
    };
    let raw = RawTables {
        matches: read(config.matches_path(), "match facts")?,
        statistics: read(config.statistics_path(), "statistics")?,
        lineups: read(config.lineups_path(), "lineups")?,
        injuries: read(config.injuries_path(), "injuries")?,
        teams: read(config.team_dictionary_path(), "team dictionary")?,
        odds: load_odds_files(&default_odds_sources(&config.odds_dir()))
            .context("load odds files")?,
    };
    info!(
        data_dir = %config.data_dir.display(),
        matches = raw.matches.n_rows(),
        statistics = raw.statistics.n_rows(),
        lineups = raw.lineups.n_rows(),
        injuries = raw.injuries.n_rows(),
        odds_files = raw.odds.len(),
        "loaded raw tables"
    );
    Ok(raw)
}

/// Normalize every source, pivot players, map odds and assemble.
pub fn build_feature_table(
    raw: &RawTables,
    policy: TeamNamePolicy,
) -> Result<(FeatureTable, PipelineReport)> {
    let matches = normalize_matches(&raw.matches)?;
    let (statistics, stats_report) = normalize_statistics(&raw.statistics)?;
    let (injuries, injuries_report) = pivot(&raw.injuries, &INJURIES)?;
    let (lineups, lineups_report) = pivot(&raw.lineups, &LINEUPS)?;
    let directory = TeamDirectory::from_frame(&raw.teams)?;
    let (odds, odds_report) = normalize_odds(&raw.odds, &directory, policy)?;

    let (table, assemble_report) = assemble(AssembleInputs {
        matches: &matches,
        statistics: &statistics,
        injuries: &injuries,
        lineups: &lineups,
        odds: &odds,
    })?;

    Ok((
        table,
        PipelineReport {
            statistics: stats_report,
            injuries: injuries_report,
            lineups: lineups_report,
            odds: odds_report,
            assemble: assemble_report,
        },
    ))
}
