use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::frame::Frame;
use crate::odds::{ODDS_COLUMNS, no_vig_from_decimal};
use crate::schema::Schema;
use crate::train::SoftmaxModel;

pub const ARTIFACT_VERSION: u32 = 1;

/// Match result. Codes follow the `resultado` label: 0 draw, 1 home, 2 away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Draw,
    Home,
    Away,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Draw, Outcome::Home, Outcome::Away];

    pub fn code(self) -> i64 {
        match self {
            Outcome::Draw => 0,
            Outcome::Home => 1,
            Outcome::Away => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Outcome::Draw),
            1 => Some(Outcome::Home),
            2 => Some(Outcome::Away),
            _ => None,
        }
    }

    pub fn from_goals(home_goals: f64, away_goals: f64) -> Self {
        if home_goals > away_goals {
            Outcome::Home
        } else if home_goals < away_goals {
            Outcome::Away
        } else {
            Outcome::Draw
        }
    }

    pub fn index(self) -> usize {
        self.code() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prob3 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Prob3 {
    pub fn uniform() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }

    /// From class-ordered values `[draw, home, away]`.
    pub fn from_classes(p: [f64; 3]) -> Self {
        Self {
            draw: p[0],
            home: p[1],
            away: p[2],
        }
    }

    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub outcome: Outcome,
    pub probs: Prob3,
}

pub fn evaluate_probs(predictions: &[Prob3], outcomes: &[Outcome]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        };
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let y = one_hot(*outcome);
        brier_sum +=
            (p.home - y.home).powi(2) + (p.draw - y.draw).powi(2) + (p.away - y.away).powi(2);
        log_loss_sum += -p.get(*outcome).clamp(1e-12, 1.0).ln();
        if argmax(*p) == *outcome {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

/// Most likely outcome; ties go draw, then home.
pub fn argmax(p: Prob3) -> Outcome {
    let mut best = Outcome::Draw;
    for outcome in Outcome::ALL {
        if p.get(outcome) > p.get(best) {
            best = outcome;
        }
    }
    best
}

fn one_hot(outcome: Outcome) -> Prob3 {
    match outcome {
        Outcome::Home => Prob3 {
            home: 1.0,
            draw: 0.0,
            away: 0.0,
        },
        Outcome::Draw => Prob3 {
            home: 0.0,
            draw: 1.0,
            away: 0.0,
        },
        Outcome::Away => Prob3 {
            home: 0.0,
            draw: 0.0,
            away: 1.0,
        },
    }
}

/// Anything that scores feature-table shaped rows.
pub trait OutcomeModel {
    fn schema(&self) -> &Schema;

    /// Scores rows already known to match `schema()`.
    fn score(&self, frame: &Frame) -> Result<Vec<Prob3>>;

    fn predict_proba(&self, frame: &Frame) -> Result<Vec<Prob3>> {
        self.schema().validate(frame)?;
        self.score(frame)
    }

    fn predict(&self, frame: &Frame) -> Result<Vec<Prediction>> {
        Ok(self
            .predict_proba(frame)?
            .into_iter()
            .map(|probs| Prediction {
                outcome: argmax(probs),
                probs,
            })
            .collect())
    }
}

/// Bookmaker baseline: margin-free probabilities from the three odds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpliedOddsModel {
    schema: Schema,
}

impl ImpliedOddsModel {
    pub fn new(schema: Schema) -> Result<Self> {
        for name in ODDS_COLUMNS {
            if !schema.names().any(|n| n == name) {
                bail!("implied-odds model needs `{name}` in its schema");
            }
        }
        Ok(Self { schema })
    }
}

impl OutcomeModel for ImpliedOddsModel {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn score(&self, frame: &Frame) -> Result<Vec<Prob3>> {
        let cols = ODDS_COLUMNS
            .iter()
            .map(|name| frame.f64_values(name))
            .collect::<Result<Vec<_>>>()?;
        Ok((0..frame.n_rows())
            .map(|row| {
                let price = |i: usize| cols[i][row].unwrap_or(0.0);
                no_vig_from_decimal(price(0), price(1), price(2))
                    .map(|(home, draw, away)| Prob3 { home, draw, away })
                    .unwrap_or_else(Prob3::uniform)
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedModel {
    Softmax(SoftmaxModel),
    ImpliedOdds(ImpliedOddsModel),
}

/// What `retrain` writes and `predict` reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub generated_at: String,
    pub training_rows: usize,
    pub validation: Option<Metrics>,
    pub model: TrainedModel,
}

impl ModelArtifact {
    pub fn new(model: TrainedModel, training_rows: usize, validation: Option<Metrics>) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            generated_at: Utc::now().to_rfc3339(),
            training_rows,
            validation,
            model,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serialize model artifact")?;
        fs::write(&tmp, json).context("write model artifact")?;
        fs::rename(&tmp, path).context("swap model artifact")?;
        info!(path = %path.display(), "saved model artifact");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read model artifact {}", path.display()))?;
        let artifact: ModelArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("parse model artifact {}", path.display()))?;
        if artifact.version != ARTIFACT_VERSION {
            bail!(
                "model artifact {} has version {}, expected {}",
                path.display(),
                artifact.version,
                ARTIFACT_VERSION
            );
        }
        Ok(artifact)
    }

    fn inner(&self) -> &dyn OutcomeModel {
        match &self.model {
            TrainedModel::Softmax(m) => m,
            TrainedModel::ImpliedOdds(m) => m,
        }
    }
}

impl OutcomeModel for ModelArtifact {
    fn schema(&self) -> &Schema {
        self.inner().schema()
    }

    fn score(&self, frame: &Frame) -> Result<Vec<Prob3>> {
        self.inner().score(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaError;

    fn frame(csv: &str) -> Frame {
        Frame::from_csv_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn outcome_codes_follow_label_encoding() {
        for outcome in Outcome::ALL {
            assert_eq!(Outcome::from_code(outcome.code()), Some(outcome));
        }
        assert_eq!(Outcome::from_goals(2.0, 1.0), Outcome::Home);
        assert_eq!(Outcome::from_goals(1.0, 1.0), Outcome::Draw);
        assert_eq!(Outcome::from_code(3), None);
    }

    #[test]
    fn metrics_reward_confident_correct_predictions() {
        let sharp = Prob3 {
            home: 0.8,
            draw: 0.1,
            away: 0.1,
        };
        let good = evaluate_probs(&[sharp], &[Outcome::Home]);
        let flat = evaluate_probs(&[Prob3::uniform()], &[Outcome::Home]);
        assert_eq!(good.accuracy, 1.0);
        assert!(good.brier < flat.brier);
        assert!(good.log_loss < flat.log_loss);
        assert_eq!(evaluate_probs(&[], &[]).samples, 0);
    }

    #[test]
    fn implied_odds_model_validates_before_scoring() {
        let table = frame("arbitro,odd_1,odd_x,odd_2\nR,3.6,3.0,2.25\n");
        let model = ImpliedOddsModel::new(Schema::from_table(&table)).unwrap();
        let pred = model.predict(&table).unwrap();
        assert_eq!(pred[0].outcome, Outcome::Away);

        let err = model
            .predict_proba(&frame("odd_1,odd_x,odd_2\n2,3,4\n"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SchemaError>(),
            Some(SchemaError::ColumnMismatch { .. })
        ));
    }

    #[test]
    fn artifact_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model").join("football_predictor.json");
        let table = frame("odd_1,odd_x,odd_2\n2.0,3.0,4.0\n");
        let model = ImpliedOddsModel::new(Schema::from_table(&table)).unwrap();
        let artifact = ModelArtifact::new(TrainedModel::ImpliedOdds(model), 10, None);
        artifact.save(&path).unwrap();

        let back = ModelArtifact::load(&path).unwrap();
        assert_eq!(back, artifact);
        assert_eq!(back.predict(&table).unwrap()[0].outcome, Outcome::Home);
    }
}
