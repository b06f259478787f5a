use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use liga_forecast::config::PipelineConfig;
use liga_forecast::fixture::{FixtureRequest, build_fixture_vector};
use liga_forecast::model::{ModelArtifact, OutcomeModel, TrainedModel};
use liga_forecast::odds::TeamNamePolicy;
use liga_forecast::pipeline::{build_feature_table, load_raw_tables};
use liga_forecast::train::train_softmax;

/// Rebuild the feature table from the raw extracts and refit the model.
#[derive(Debug, Parser)]
#[command(name = "retrain")]
struct Args {
    /// Root holding `raw_files/` and `processed_files/`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Where the assembled feature table is written.
    #[arg(long)]
    feature_table: Option<PathBuf>,
    /// Where the model artifact is written.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Fail on odds team names missing from the equivalence table.
    #[arg(long)]
    strict: bool,
    /// Skip training; only rebuild the feature table.
    #[arg(long)]
    table_only: bool,
    /// Score this fixture request once the model is saved.
    #[arg(long)]
    fixture: Option<PathBuf>,
}

fn main() -> Result<()> {
    liga_forecast::init_tracing();
    let args = Args::parse();

    let mut config = PipelineConfig::from_env();
    if let Some(dir) = args.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(path) = args.feature_table {
        config.feature_table = path;
    }
    if let Some(path) = args.model {
        config.model_path = path;
    }
    if args.strict {
        config.team_names = TeamNamePolicy::Fail;
    }

    let raw = load_raw_tables(&config)?;
    let (table, report) = build_feature_table(&raw, config.team_names)?;
    table
        .save(&config.feature_table)
        .context("unable to write feature table")?;

    println!("Feature table rebuilt");
    println!("Table: {}", config.feature_table.display());
    println!(
        "Rows: {} (matches {}, without statistics {}, joined odds {}, null rows dropped {})",
        report.assemble.rows,
        report.assemble.matches,
        report.assemble.without_statistics,
        report.assemble.after_odds,
        report.assemble.null_rows_dropped
    );
    println!("Columns: {}", table.frame().n_cols());
    println!(
        "Statistics: {}/{} rows kept (possession dropped {}, yellow cards dropped {})",
        report.statistics.output_rows,
        report.statistics.input_rows,
        report.statistics.possession_dropped,
        report.statistics.yellow_cards_dropped
    );
    println!(
        "Players: {} injured, {} starters",
        report.injuries.entities, report.lineups.entities
    );
    println!(
        "Odds: {} files, {}/{} rows mapped",
        report.odds.files, report.odds.output_rows, report.odds.input_rows
    );
    if !report.odds.unresolved.is_empty() {
        println!("  unresolved team names: {}", report.odds.unresolved.len());
        for (name, count) in report.odds.unresolved.iter().take(8) {
            println!("   - {name} ({count} rows)");
        }
    }

    if args.table_only {
        return Ok(());
    }

    let (model, train) = train_softmax(&table, &config.train)?;
    let artifact = ModelArtifact::new(TrainedModel::Softmax(model), train.train_rows, train.validation);
    artifact
        .save(&config.model_path)
        .context("unable to write model artifact")?;

    println!("Model trained");
    println!("Artifact: {}", config.model_path.display());
    println!(
        "Samples: train={} validation={} skipped={} features={} iterations={}",
        train.train_rows, train.validation_rows, train.skipped_rows, train.features, train.iterations
    );
    println!(
        "Train: logloss={:.4} brier={:.4} acc={:.3}",
        train.train.log_loss, train.train.brier, train.train.accuracy
    );
    if let Some(val) = train.validation {
        println!(
            "Validation: logloss={:.4} brier={:.4} acc={:.3}",
            val.log_loss, val.brier, val.accuracy
        );
    }
    if let Some(odds) = train.odds_baseline {
        println!(
            "Odds baseline: logloss={:.4} brier={:.4} acc={:.3}",
            odds.log_loss, odds.brier, odds.accuracy
        );
    }

    if let Some(path) = args.fixture {
        let request = FixtureRequest::from_json_file(&path)?;
        let vector = build_fixture_vector(&table, &request)?;
        for p in artifact.predict(&vector.frame)? {
            println!(
                "Fixture {} vs {}: home={:.3} draw={:.3} away={:.3} -> {:?}",
                request.home_team_id,
                request.away_team_id,
                p.probs.home,
                p.probs.draw,
                p.probs.away,
                p.outcome
            );
        }
    }

    Ok(())
}
