use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use liga_forecast::assemble::FeatureTable;
use liga_forecast::config::PipelineConfig;
use liga_forecast::fixture::{FixtureRequest, build_fixture_vector};
use liga_forecast::frame::{Cells, Frame};
use liga_forecast::lookup;
use liga_forecast::model::{ModelArtifact, OutcomeModel};

const DEFAULT_FIXTURE: &str = "demos/fixture_example.json";

/// Score an upcoming fixture against the saved model, or look up the ids
/// and spellings a fixture request needs.
#[derive(Debug, Parser)]
#[command(name = "predict")]
struct Args {
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    feature_table: Option<PathBuf>,
    #[arg(long)]
    model: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Score a fixture request (the default).
    Fixture { path: Option<PathBuf> },
    /// Team ids whose name contains the query.
    Team { query: String },
    /// Players registered for a team in a season.
    Players { team_id: i64, season: i64 },
    /// Referee spelling used in the history.
    Referee { query: String },
    /// Stadium spelling used in the history.
    Stadium { query: String },
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

    match args.command.unwrap_or(Command::Fixture { path: None }) {
        Command::Fixture { path } => {
            let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_FIXTURE));
            predict_fixture(&config, path)
        }
        Command::Team { query } => {
            let dictionary = Frame::read_csv(config.team_dictionary_path())?;
            let hits = lookup::search_teams(&dictionary, &query)?;
            if hits.is_empty() {
                println!("No team matches \"{query}\"");
            }
            for hit in hits {
                println!("{:>6}  {}", hit.id, hit.name);
            }
            Ok(())
        }
        Command::Players { team_id, season } => {
            let dictionary = Frame::read_csv(config.player_dictionary_path())?;
            let players = lookup::players_for_team(&dictionary, team_id, season)?;
            let ids = players.require("id_jugador")?;
            let names = players.require("nombre_jugador")?;
            println!("Players for team {team_id} in {season}: {}", players.n_rows());
            for row in 0..players.n_rows() {
                println!(
                    "{:>8}  {}",
                    ids.i64_at(row).map(|id| id.to_string()).unwrap_or_default(),
                    names.str_at(row).unwrap_or("n/a")
                );
            }
            Ok(())
        }
        Command::Referee { query } => {
            let table = FeatureTable::load(&config.feature_table)?;
            print_canonical("referee", &query, lookup::canonical_referee(&table, &query)?);
            Ok(())
        }
        Command::Stadium { query } => {
            let table = FeatureTable::load(&config.feature_table)?;
            print_canonical("stadium", &query, lookup::canonical_stadium(&table, &query)?);
            Ok(())
        }
    }
}

fn predict_fixture(config: &PipelineConfig, path: PathBuf) -> Result<()> {
    let table = FeatureTable::load(&config.feature_table)
        .context("unable to load feature table; run `retrain` first")?;
    let artifact = ModelArtifact::load(&config.model_path)
        .context("unable to load model artifact; run `retrain` first")?;
    let request = FixtureRequest::from_json_file(&path)?;

    if lookup::canonical_referee(&table, &request.referee)?.as_deref() != Some(request.referee.as_str()) {
        println!("note: referee \"{}\" is not spelled as in the history", request.referee);
    }
    if lookup::canonical_stadium(&table, &request.stadium)?.as_deref() != Some(request.stadium.as_str()) {
        println!("note: stadium \"{}\" is not spelled as in the history", request.stadium);
    }

    let vector = build_fixture_vector(&table, &request)?;
    let predictions = artifact.predict(&vector.frame)?;

    println!("Fixture: {} vs {}", request.home_team_id, request.away_team_id);
    println!("Model: trained {} on {} rows", artifact.generated_at, artifact.training_rows);
    if !vector.unmatched_injured.is_empty() {
        println!("Injured without history: {:?}", vector.unmatched_injured);
    }
    if !vector.unmatched_starters.is_empty() {
        println!("Starters without history: {:?}", vector.unmatched_starters);
    }
    for p in predictions {
        println!(
            "P(home)={:.3} P(draw)={:.3} P(away)={:.3}",
            p.probs.home, p.probs.draw, p.probs.away
        );
        println!("Predicted: {:?} (code {})", p.outcome, p.outcome.code());
    }
    Ok(())
}

fn print_canonical(kind: &str, query: &str, hit: Option<String>) {
    match hit {
        Some(name) => println!("{name}"),
        None => println!("No {kind} matches \"{query}\""),
    }
}
