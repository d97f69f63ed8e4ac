// 🎓 Training - Stacked ensemble fitting and cross-validation
//
// Stacking: every base model is trained k times on k-1 folds and predicts
// the held-out fold; the meta-learner is fitted on those out-of-fold
// predictions. The base models are then refitted on everything.

use super::models::{BaseModel, LogisticRegression, ModelKind};
use super::EnsembleClassifier;
use crate::config::RetrainConfig;
use crate::error::TrainingError;
use crate::features::{schema_fingerprint, FEATURE_COUNT, FEATURE_NAMES};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

// ============================================================================
// EXAMPLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// Produced by heuristic rules before any human review
    Bootstrap,
    /// A reviewer's decision
    Human,
}

impl LabelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelSource::Bootstrap => "bootstrap",
            LabelSource::Human => "human",
        }
    }

    pub fn parse(raw: &str) -> Option<LabelSource> {
        match raw {
            "bootstrap" => Some(LabelSource::Bootstrap),
            "human" => Some(LabelSource::Human),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub left_id: String,
    pub right_id: String,
    pub features: Vec<f64>,
    pub label: bool,
    pub source: LabelSource,
}

/// One label per pair: human beats bootstrap, later beats earlier.
/// Input is in recording order; output is sorted by pair.
pub fn resolve_labels(examples: Vec<TrainingExample>) -> Vec<TrainingExample> {
    let mut latest: BTreeMap<(String, String), TrainingExample> = BTreeMap::new();
    for example in examples {
        let key = (example.left_id.clone(), example.right_id.clone());
        let replace = latest
            .get(&key)
            .map_or(true, |current| example.source >= current.source);
        if replace {
            latest.insert(key, example);
        }
    }
    latest.into_values().collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    pub folds: usize,
    pub seed: u64,
    pub min_examples: usize,
    pub min_per_class: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        TrainingParams {
            folds: 5,
            seed: 42,
            min_examples: 10,
            min_per_class: 2,
        }
    }
}

impl TrainingParams {
    pub fn from_config(config: &RetrainConfig) -> Self {
        TrainingParams {
            folds: config.folds,
            seed: config.seed,
            ..Default::default()
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CvMetrics {
    pub examples: usize,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
    pub accuracy: f64,
    /// Mean squared error of the probabilities
    pub brier: f64,
}

impl CvMetrics {
    /// Metrics at the 0.5 cut from (probability, label) pairs
    pub fn from_predictions(predictions: &[(f64, bool)]) -> Self {
        if predictions.is_empty() {
            return CvMetrics::default();
        }

        let (mut tp, mut fp, mut tn, mut fn_) = (0.0, 0.0, 0.0, 0.0);
        let mut squared = 0.0;
        for &(p, label) in predictions {
            let predicted = p >= 0.5;
            match (predicted, label) {
                (true, true) => tp += 1.0,
                (true, false) => fp += 1.0,
                (false, false) => tn += 1.0,
                (false, true) => fn_ += 1.0,
            }
            let target = if label { 1.0 } else { 0.0 };
            squared += (p - target) * (p - target);
        }

        let n = predictions.len() as f64;
        let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        CvMetrics {
            examples: predictions.len(),
            f1,
            precision,
            recall,
            accuracy: (tp + tn) / n,
            brier: squared / n,
        }
    }
}

// ============================================================================
// FITTING
// ============================================================================

pub fn validate_examples(
    examples: &[TrainingExample],
    params: &TrainingParams,
) -> Result<(), TrainingError> {
    if let Some((index, example)) = examples
        .iter()
        .enumerate()
        .find(|(_, e)| e.features.len() != FEATURE_COUNT)
    {
        return Err(TrainingError::InconsistentFeatures {
            index,
            expected: FEATURE_COUNT,
            actual: example.features.len(),
        });
    }

    let positives = examples.iter().filter(|e| e.label).count();
    let negatives = examples.len() - positives;
    if examples.len() < params.min_examples
        || positives < params.min_per_class
        || negatives < params.min_per_class
    {
        return Err(TrainingError::InsufficientData {
            total: examples.len(),
            positives,
            negatives,
            min_total: params.min_examples,
            min_per_class: params.min_per_class,
        });
    }
    Ok(())
}

/// Fold per row; each class is dealt round-robin so every fold sees both
pub fn stratified_folds(labels: &[bool], k: usize) -> Vec<usize> {
    let k = k.max(1);
    let (mut pos, mut neg) = (0usize, 0usize);
    labels
        .iter()
        .map(|&label| {
            let counter = if label { &mut pos } else { &mut neg };
            let fold = *counter % k;
            *counter += 1;
            fold
        })
        .collect()
}

fn rows(x: &[Vec<f64>], y: &[f64], indices: &[usize]) -> (Vec<Vec<f64>>, Vec<f64>) {
    (
        indices.iter().map(|&i| x[i].clone()).collect(),
        indices.iter().map(|&i| y[i]).collect(),
    )
}

/// Base models on all rows + meta-learner on out-of-fold predictions
fn fit_stack(x: &[Vec<f64>], y: &[f64], k: usize, seed: u64) -> (Vec<BaseModel>, LogisticRegression) {
    let n = x.len();
    let labels: Vec<bool> = y.iter().map(|&v| v > 0.5).collect();
    let k = k.clamp(2, n.max(2));
    let folds = stratified_folds(&labels, k);
    let mut oof = vec![vec![0.5; ModelKind::ALL.len()]; n];

    for fold in 0..k {
        let held_out: Vec<usize> = (0..n).filter(|&i| folds[i] == fold).collect();
        let train: Vec<usize> = (0..n).filter(|&i| folds[i] != fold).collect();
        if held_out.is_empty() || train.is_empty() {
            continue;
        }
        let (tx, ty) = rows(x, y, &train);

        for (m, kind) in ModelKind::ALL.iter().enumerate() {
            let model = BaseModel::fit(*kind, &tx, &ty, seed.wrapping_add(fold as u64));
            for &i in &held_out {
                oof[i][m] = model.predict_proba(&x[i]);
            }
        }
    }

    let meta = LogisticRegression::fit(&oof, y);
    let base = ModelKind::ALL
        .iter()
        .map(|kind| BaseModel::fit(*kind, x, y, seed))
        .collect();
    (base, meta)
}

fn matrix(examples: &[TrainingExample]) -> (Vec<Vec<f64>>, Vec<f64>) {
    (
        examples.iter().map(|e| e.features.clone()).collect(),
        examples.iter().map(|e| if e.label { 1.0 } else { 0.0 }).collect(),
    )
}

/// Train a deployable ensemble on every example
pub fn train_ensemble(
    examples: &[TrainingExample],
    params: &TrainingParams,
) -> Result<EnsembleClassifier, TrainingError> {
    validate_examples(examples, params)?;
    let (x, y) = matrix(examples);
    let (base_models, meta) = fit_stack(&x, &y, params.folds, params.seed);

    let model = EnsembleClassifier {
        version: uuid::Uuid::new_v4().to_string(),
        feature_names: FEATURE_NAMES.iter().map(|n| n.to_string()).collect(),
        feature_schema: schema_fingerprint(),
        base_models,
        meta,
        trained_at: Utc::now(),
        training_examples: examples.len(),
        seed: params.seed,
        cv_metrics: None,
    };

    info!(
        version = %model.version,
        examples = examples.len(),
        meta_weights = ?model.meta.weights,
        "ensemble trained"
    );
    Ok(model)
}

/// k-fold estimate of how a model trained on these examples generalizes
pub fn cross_validate(
    examples: &[TrainingExample],
    params: &TrainingParams,
) -> Result<CvMetrics, TrainingError> {
    validate_examples(examples, params)?;
    let (x, y) = matrix(examples);
    let labels: Vec<bool> = examples.iter().map(|e| e.label).collect();
    let k = params.folds.clamp(2, examples.len());
    let folds = stratified_folds(&labels, k);

    let mut predictions = Vec::with_capacity(examples.len());
    for fold in 0..k {
        let held_out: Vec<usize> = (0..x.len()).filter(|&i| folds[i] == fold).collect();
        let train: Vec<usize> = (0..x.len()).filter(|&i| folds[i] != fold).collect();
        if held_out.is_empty() {
            continue;
        }

        let (tx, ty) = rows(&x, &y, &train);
        let (base, meta) = fit_stack(&tx, &ty, k, params.seed.wrapping_add(fold as u64));
        for &i in &held_out {
            let stacked: Vec<f64> = base.iter().map(|m| m.predict_proba(&x[i])).collect();
            predictions.push((meta.predict_proba(&stacked), labels[i]));
        }
    }

    let metrics = CvMetrics::from_predictions(&predictions);
    info!(
        folds = k,
        f1 = format!("{:.3}", metrics.f1),
        brier = format!("{:.3}", metrics.brier),
        "cross-validation complete"
    );
    Ok(metrics)
}

// ============================================================================
// TESTS
// ============================================================================
