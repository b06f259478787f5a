use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assemble::FeatureTable;
use crate::frame::{Cells, DType, Frame};
use crate::model::{ImpliedOddsModel, Metrics, Outcome, OutcomeModel, Prob3, evaluate_probs};
use crate::normalize::LABEL_COLUMN;
use crate::pivot::{INJURIES, LINEUPS};
use crate::schema::{ColumnKind, Schema};

pub const DEFAULT_L2: f64 = 0.01;
pub const DEFAULT_MAX_ITERS: usize = 800;
pub const DEFAULT_VALIDATION_SHARE: f64 = 0.15;
const MIN_TRAIN_SAMPLES: usize = 30;
const LR_START: f64 = 0.3;
const IMPROVEMENT_EPS: f64 = 1e-6;
const CHECK_EVERY: usize = 20;
const PATIENCE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOptions {
    pub l2: f64,
    pub max_iters: usize,
    pub validation_share: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            l2: DEFAULT_L2,
            max_iters: DEFAULT_MAX_ITERS,
            validation_share: DEFAULT_VALIDATION_SHARE,
        }
    }
}

/// How one schema column turns into model inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum FeatureColumn {
    Scaled { name: String, mean: f64, std: f64 },
    Indicator { name: String },
    OneHot { name: String, levels: Vec<String> },
}

impl FeatureColumn {
    pub fn name(&self) -> &str {
        match self {
            FeatureColumn::Scaled { name, .. }
            | FeatureColumn::Indicator { name }
            | FeatureColumn::OneHot { name, .. } => name,
        }
    }

    fn width(&self) -> usize {
        match self {
            FeatureColumn::OneHot { levels, .. } => levels.len(),
            _ => 1,
        }
    }
}

type SparseRow = Vec<(usize, f64)>;

/// Continuous columns standardized, indicators raw, text one-hot with
/// unseen categories ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    columns: Vec<FeatureColumn>,
}

impl FeatureEncoder {
    pub fn fit(frame: &Frame, schema: &Schema, rows: &[usize]) -> Result<Self> {
        let mut columns = Vec::with_capacity(schema.len());
        for spec in schema.columns() {
            let column = frame.require(&spec.name)?;
            let encoded = match spec.kind {
                ColumnKind::Text => {
                    let levels: BTreeSet<String> = rows
                        .iter()
                        .filter_map(|&row| column.str_at(row).map(str::to_string))
                        .collect();
                    FeatureColumn::OneHot {
                        name: spec.name.clone(),
                        levels: levels.into_iter().collect(),
                    }
                }
                ColumnKind::Numeric
                    if column.kind() == DType::Binary
                        || INJURIES.is_indicator(&spec.name)
                        || LINEUPS.is_indicator(&spec.name) =>
                {
                    FeatureColumn::Indicator {
                        name: spec.name.clone(),
                    }
                }
                ColumnKind::Numeric => {
                    let all = column.to_f64_vec();
                    let values: Vec<f64> = rows.iter().filter_map(|&row| all[row]).collect();
                    let (mean, std) = norm_stats(&values);
                    FeatureColumn::Scaled {
                        name: spec.name.clone(),
                        mean,
                        std,
                    }
                }
            };
            columns.push(encoded);
        }
        Ok(Self { columns })
    }

    pub fn width(&self) -> usize {
        self.columns.iter().map(FeatureColumn::width).sum()
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn encode(&self, frame: &Frame) -> Result<Vec<SparseRow>> {
        let mut rows: Vec<SparseRow> = vec![Vec::new(); frame.n_rows()];
        let mut offset = 0usize;
        for encoded in &self.columns {
            let column = frame.require(encoded.name()).context("encode model input")?;
            match encoded {
                FeatureColumn::Scaled { mean, std, .. } => {
                    for (out, value) in rows.iter_mut().zip(column.to_f64_vec()) {
                        let z = value.map_or(0.0, |v| (v - mean) / std);
                        if z != 0.0 {
                            out.push((offset, z));
                        }
                    }
                }
                FeatureColumn::Indicator { .. } => {
                    for (out, value) in rows.iter_mut().zip(column.to_f64_vec()) {
                        if let Some(v) = value.filter(|v| *v != 0.0) {
                            out.push((offset, v));
                        }
                    }
                }
                FeatureColumn::OneHot { levels, .. } => {
                    for (row, out) in rows.iter_mut().enumerate() {
                        let hit = column
                            .str_at(row)
                            .and_then(|v| levels.binary_search_by(|l| l.as_str().cmp(v)).ok());
                        if let Some(level) = hit {
                            out.push((offset + level, 1.0));
                        }
                    }
                }
            }
            offset += encoded.width();
        }
        Ok(rows)
    }
}

fn norm_stats(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    (mean, if std > 1e-9 { std } else { 1.0 })
}

/// Multinomial logistic regression over the encoded feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxModel {
    schema: Schema,
    encoder: FeatureEncoder,
    weights: Vec<[f64; 3]>,
    bias: [f64; 3],
}

impl SoftmaxModel {
    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    fn probs(&self, x: &SparseRow) -> [f64; 3] {
        softmax(logits(&self.weights, &self.bias, x))
    }
}

impl OutcomeModel for SoftmaxModel {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn score(&self, frame: &Frame) -> Result<Vec<Prob3>> {
        Ok(self
            .encoder
            .encode(frame)?
            .iter()
            .map(|x| Prob3::from_classes(self.probs(x)))
            .collect())
    }
}

fn logits(weights: &[[f64; 3]], bias: &[f64; 3], x: &SparseRow) -> [f64; 3] {
    let mut z = *bias;
    for &(j, v) in x {
        for k in 0..3 {
            z[k] += weights[j][k] * v;
        }
    }
    z
}

fn softmax(z: [f64; 3]) -> [f64; 3] {
    let mx = z[0].max(z[1].max(z[2]));
    let e = z.map(|v| (v - mx).exp());
    let den = (e[0] + e[1] + e[2]).max(1e-12);
    e.map(|v| (v / den).clamp(1e-9, 1.0))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub train_rows: usize,
    pub validation_rows: usize,
    pub skipped_rows: usize,
    pub iterations: usize,
    pub features: usize,
    pub train: Metrics,
    pub validation: Option<Metrics>,
    pub odds_baseline: Option<Metrics>,
}

/// Chronological split: the latest `validation_share` of labelled rows is
/// held out and drives early stopping.
pub fn train_softmax(table: &FeatureTable, options: &TrainOptions) -> Result<(SoftmaxModel, TrainReport)> {
    let frame = table.frame();
    let labels = frame.require(LABEL_COLUMN).context("training labels")?;
    let mut rows = Vec::with_capacity(frame.n_rows());
    let mut outcomes = Vec::with_capacity(frame.n_rows());
    for row in 0..frame.n_rows() {
        if let Some(outcome) = labels.i64_at(row).and_then(Outcome::from_code) {
            rows.push(row);
            outcomes.push(outcome);
        }
    }
    let skipped_rows = frame.n_rows() - rows.len();
    if skipped_rows > 0 {
        warn!(rows = skipped_rows, "skipped rows without a valid result label");
    }
    if rows.len() < MIN_TRAIN_SAMPLES {
        bail!(
            "need at least {MIN_TRAIN_SAMPLES} labelled rows to train, have {}",
            rows.len()
        );
    }

    let share = options.validation_share.clamp(0.0, 0.5);
    let mut split = ((rows.len() as f64) * (1.0 - share)).round() as usize;
    split = split.clamp(MIN_TRAIN_SAMPLES.min(rows.len()), rows.len());
    let (train_rows, val_rows) = rows.split_at(split);
    let (train_y, val_y) = outcomes.split_at(split);

    let schema = Schema::from_table(frame);
    let encoder = FeatureEncoder::fit(frame, &schema, train_rows)?;
    let encoded = encoder.encode(frame)?;
    let train_x: Vec<&SparseRow> = train_rows.iter().map(|&r| &encoded[r]).collect();
    let val_x: Vec<&SparseRow> = val_rows.iter().map(|&r| &encoded[r]).collect();
    let width = encoder.width();
    debug!(features = width, train = train_x.len(), validation = val_x.len(), "encoded training matrix");

    let fit = fit_weights(&train_x, train_y, &val_x, val_y, width, options);
    let model = SoftmaxModel {
        schema,
        encoder,
        weights: fit.weights,
        bias: fit.bias,
    };

    let train_probs: Vec<Prob3> = train_x.iter().map(|x| Prob3::from_classes(model.probs(x))).collect();
    let train = evaluate_probs(&train_probs, train_y);
    let (validation, odds_baseline) = if val_rows.is_empty() {
        (None, None)
    } else {
        let val_probs: Vec<Prob3> = val_x.iter().map(|x| Prob3::from_classes(model.probs(x))).collect();
        let baseline = frame
            .take_rows(val_rows)
            .and_then(|held_out| {
                ImpliedOddsModel::new(model.schema.clone()).and_then(|m| m.score(&held_out))
            })
            .ok()
            .map(|p| evaluate_probs(&p, val_y));
        (Some(evaluate_probs(&val_probs, val_y)), baseline)
    };

    let report = TrainReport {
        train_rows: train_rows.len(),
        validation_rows: val_rows.len(),
        skipped_rows,
        iterations: fit.iterations,
        features: width,
        train,
        validation,
        odds_baseline,
    };
    info!(
        train = report.train_rows,
        validation = report.validation_rows,
        iterations = report.iterations,
        features = report.features,
        train_log_loss = report.train.log_loss,
        val_log_loss = report.validation.map(|m| m.log_loss),
        "trained softmax model"
    );
    Ok((model, report))
}

struct Fit {
    weights: Vec<[f64; 3]>,
    bias: [f64; 3],
    iterations: usize,
}

fn fit_weights(
    train: &[&SparseRow],
    train_y: &[Outcome],
    val: &[&SparseRow],
    val_y: &[Outcome],
    width: usize,
    options: &TrainOptions,
) -> Fit {
    let mut weights = vec![[0.0; 3]; width];
    let mut bias = [0.0; 3];
    let (monitor, monitor_y) = if val.is_empty() { (train, train_y) } else { (val, val_y) };
    let mut best = (weights.clone(), bias);
    let mut best_loss = log_loss(&weights, &bias, monitor, monitor_y);
    let mut no_improve = 0usize;
    let mut iterations = 0usize;
    let n = train.len().max(1) as f64;

    for iter in 0..options.max_iters {
        iterations = iter + 1;
        let mut grad = vec![[0.0; 3]; width];
        let mut grad_b = [0.0; 3];
        for (x, y) in train.iter().zip(train_y) {
            let p = softmax(logits(&weights, &bias, x));
            for k in 0..3 {
                let target = if y.index() == k { 1.0 } else { 0.0 };
                let d = p[k] - target;
                grad_b[k] += d;
                for &(j, v) in x.iter() {
                    grad[j][k] += d * v;
                }
            }
        }

        let lr = LR_START / (1.0 + (iter as f64 * 0.003));
        for k in 0..3 {
            bias[k] -= lr * grad_b[k] / n;
        }
        for (w, g) in weights.iter_mut().zip(&grad) {
            for k in 0..3 {
                w[k] -= lr * (g[k] / n + options.l2 * w[k]);
            }
        }

        if iter % CHECK_EVERY == 0 || iter + 1 == options.max_iters {
            let loss = log_loss(&weights, &bias, monitor, monitor_y);
            if loss + IMPROVEMENT_EPS < best_loss {
                best_loss = loss;
                best = (weights.clone(), bias);
                no_improve = 0;
            } else {
                no_improve = no_improve.saturating_add(1);
                if no_improve >= PATIENCE {
                    break;
                }
            }
        }
    }

    Fit {
        weights: best.0,
        bias: best.1,
        iterations,
    }
}

fn log_loss(weights: &[[f64; 3]], bias: &[f64; 3], xs: &[&SparseRow], ys: &[Outcome]) -> f64 {
    if xs.is_empty() {
        return f64::INFINITY;
    }
    let sum: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| -softmax(logits(weights, bias, x))[y.index()].ln())
        .sum();
    sum / xs.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Column;

    fn synthetic_table(rows: usize) -> FeatureTable {
        let mut cols: Vec<Column> = Vec::new();
        let ids: Vec<Option<i64>> = (0..rows as i64).map(Some).collect();
        cols.push(Column::new("index".into(), ids.clone()));
        cols.push(Column::new("fixture_id".into(), ids.clone()));
        cols.push(Column::new("fecha_timestamp".into(), ids));
        cols.push(Column::new("id_equipo_local".into(), vec![Some(1i64); rows]));
        cols.push(Column::new("id_equipo_visitante".into(), vec![Some(2i64); rows]));
        let referees: Vec<Option<String>> = (0..rows).map(|i| Some(format!("ref{}", i % 3))).collect();
        cols.push(Column::new("arbitro".into(), referees));
        cols.push(Column::new("estadio".into(), vec![Some("S".to_string()); rows]));
        cols.push(Column::new("season".into(), vec![Some(2020i64); rows]));
        let label = |i: usize| (i % 3) as i64;
        for name in [
            "goles_local",
            "goles_visitante",
            "goles_descanso_local",
            "goles_descanso_visitante",
        ] {
            cols.push(Column::new(name.into(), vec![Some(0i64); rows]));
        }
        let labels: Vec<Option<i64>> = (0..rows).map(|i| Some(label(i))).collect();
        cols.push(Column::new(LABEL_COLUMN.into(), labels));
        for stat in crate::normalize::STAT_COLUMNS.iter() {
            cols.push(Column::new(stat.as_str().into(), vec![Some(1.0); rows]));
        }
        let injured: Vec<Option<bool>> = (0..rows).map(|i| Some(label(i) == 2)).collect();
        cols.push(Column::new("les-9".into(), injured));
        // favourite price tracks the label so the model has signal
        let price = |i: usize, outcome: i64| if label(i) == outcome { 1.5 } else { 4.5 };
        cols.push(Column::new("odd_1".into(), (0..rows).map(|i| price(i, 1)).collect::<Vec<f64>>()));
        cols.push(Column::new("odd_x".into(), (0..rows).map(|i| price(i, 0)).collect::<Vec<f64>>()));
        cols.push(Column::new("odd_2".into(), (0..rows).map(|i| price(i, 2)).collect::<Vec<f64>>()));
        FeatureTable::from_frame(Frame::from_columns(cols).unwrap()).unwrap()
    }

    #[test]
    fn encoder_standardizes_scales_and_one_hots() {
        let table = synthetic_table(60);
        let schema = Schema::from_table(table.frame());
        let rows: Vec<usize> = (0..60).collect();
        let encoder = FeatureEncoder::fit(table.frame(), &schema, &rows).unwrap();

        let arbitro = encoder.columns().iter().find(|c| c.name() == "arbitro").unwrap();
        assert!(matches!(arbitro, FeatureColumn::OneHot { levels, .. } if levels.len() == 3));
        let les = encoder.columns().iter().find(|c| c.name() == "les-9").unwrap();
        assert!(matches!(les, FeatureColumn::Indicator { .. }));
        let odd = encoder.columns().iter().find(|c| c.name() == "odd_1").unwrap();
        assert!(matches!(odd, FeatureColumn::Scaled { std, .. } if *std > 0.0));
        assert_eq!(encoder.width(), schema.len() + 2);
    }

    #[test]
    fn unseen_categories_are_ignored() {
        let table = synthetic_table(30);
        let schema = Schema::from_table(table.frame());
        let rows: Vec<usize> = (0..30).collect();
        let encoder = FeatureEncoder::fit(table.frame(), &schema, &rows).unwrap();

        let mut one = table.frame().take_rows(&[0]).unwrap();
        one.replace_column(Column::new("arbitro".into(), vec![Some("nobody".to_string())]))
            .unwrap();
        let encoded = encoder.encode(&one).unwrap();
        let known = encoder.encode(&table.frame().take_rows(&[0]).unwrap()).unwrap();
        assert_eq!(encoded[0].len() + 1, known[0].len());
    }

    #[test]
    fn softmax_learns_signal_and_beats_uniform() {
        let table = synthetic_table(120);
        let (model, report) = train_softmax(&table, &TrainOptions::default()).unwrap();
        assert_eq!(report.train_rows + report.validation_rows, 120);
        let val = report.validation.unwrap();
        assert!(val.log_loss < (3.0_f64).ln());
        assert!(val.accuracy > 0.9);

        let frame = table.frame();
        let input = frame
            .select(&model.schema().names().collect::<Vec<_>>())
            .unwrap();
        let preds = model.predict(&input.take_rows(&[1]).unwrap()).unwrap();
        assert_eq!(preds[0].outcome, Outcome::Home);
    }

    #[test]
    fn too_few_rows_is_an_error() {
        let table = synthetic_table(5);
        assert!(train_softmax(&table, &TrainOptions::default()).is_err());
    }
}
