// 🤖 Base Models - The four learners behind the ensemble
//
// All trained in-crate over dense feature rows with labels in {0, 1}.
// Each one exposes predict_proba → [0, 1].

use super::tree::{RegressionTree, TreeParams};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn dot(w: &[f64], x: &[f64]) -> f64 {
    w.iter().zip(x).map(|(a, b)| a * b).sum()
}

// ============================================================================
// LOGISTIC REGRESSION (also the meta-learner)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticRegression {
    const EPOCHS: usize = 800;
    const LEARNING_RATE: f64 = 0.5;
    const L2: f64 = 1e-3;

    /// Full-batch gradient descent with L2 penalty
    pub fn fit(x: &[Vec<f64>], y: &[f64]) -> Self {
        let d = x.first().map_or(0, |row| row.len());
        let n = x.len().max(1) as f64;
        let mut weights = vec![0.0; d];
        let mut bias = 0.0;

        for _ in 0..Self::EPOCHS {
            let mut grad_w = vec![0.0; d];
            let mut grad_b = 0.0;
            for (row, &label) in x.iter().zip(y) {
                let err = sigmoid(dot(&weights, row) + bias) - label;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= Self::LEARNING_RATE * (g / n + Self::L2 * *w);
            }
            bias -= Self::LEARNING_RATE * grad_b / n;
        }

        LogisticRegression { weights, bias }
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(dot(&self.weights, row) + self.bias)
    }
}

// ============================================================================
// GRADIENT-BOOSTED TREES (log-loss, Newton leaves)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    pub init: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    const ROUNDS: usize = 60;
    const LEARNING_RATE: f64 = 0.2;
    const MAX_LEAF: f64 = 4.0;

    pub fn fit(x: &[Vec<f64>], y: &[f64], seed: u64) -> Self {
        let n = x.len();
        let positives = y.iter().filter(|&&v| v > 0.5).count() as f64;
        let prior = ((positives + 0.5) / (n as f64 + 1.0)).clamp(0.01, 0.99);
        let init = (prior / (1.0 - prior)).ln();

        let params = TreeParams {
            max_depth: 3,
            min_samples_leaf: 2,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let indices: Vec<usize> = (0..n).collect();
        let mut raw = vec![init; n];
        let mut trees = Vec::with_capacity(Self::ROUNDS);

        for _ in 0..Self::ROUNDS {
            let probs: Vec<f64> = raw.iter().map(|&f| sigmoid(f)).collect();
            let residuals: Vec<f64> = y.iter().zip(&probs).map(|(t, p)| t - p).collect();

            let newton = |rows: &[usize]| {
                let num: f64 = rows.iter().map(|&i| residuals[i]).sum();
                let den: f64 = rows.iter().map(|&i| probs[i] * (1.0 - probs[i])).sum();
                (num / (den + 1e-6)).clamp(-Self::MAX_LEAF, Self::MAX_LEAF)
            };
            let tree = RegressionTree::fit(x, &residuals, &indices, params, &mut rng, &newton);

            for (i, row) in x.iter().enumerate() {
                raw[i] += Self::LEARNING_RATE * tree.predict(row);
            }
            trees.push(tree);
        }

        GradientBoostedTrees {
            init,
            learning_rate: Self::LEARNING_RATE,
            trees,
        }
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let raw = self.init
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>();
        sigmoid(raw)
    }
}

// ============================================================================
// RANDOM FOREST (bootstrap rows, random feature subsets)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub trees: Vec<RegressionTree>,
}

impl RandomForest {
    const TREES: usize = 60;

    pub fn fit(x: &[Vec<f64>], y: &[f64], seed: u64) -> Self {
        let n = x.len();
        let d = x.first().map_or(1, |row| row.len());
        let params = TreeParams {
            max_depth: 8,
            min_samples_leaf: 1,
            max_features: Some((d / 3).max(1)),
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let mean = |rows: &[usize]| {
            if rows.is_empty() {
                0.5
            } else {
                rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64
            }
        };

        let trees = (0..Self::TREES)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n.max(1))).collect();
                RegressionTree::fit(x, y, &sample, params, &mut rng, &mean)
            })
            .collect();

        RandomForest { trees }
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }
}

// ============================================================================
// LINEAR SVM + PLATT CALIBRATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratedSvm {
    pub weights: Vec<f64>,
    pub bias: f64,
    /// p = sigmoid(platt_a * margin + platt_b)
    pub platt_a: f64,
    pub platt_b: f64,
}

impl CalibratedSvm {
    const EPOCHS: usize = 400;
    const LEARNING_RATE: f64 = 0.05;
    const LAMBDA: f64 = 1e-3;
    const PLATT_EPOCHS: usize = 500;
    const PLATT_RATE: f64 = 0.1;

    pub fn fit(x: &[Vec<f64>], y: &[f64]) -> Self {
        let d = x.first().map_or(0, |row| row.len());
        let n = x.len().max(1) as f64;
        let signs: Vec<f64> = y.iter().map(|&v| if v > 0.5 { 1.0 } else { -1.0 }).collect();
        let mut weights = vec![0.0; d];
        let mut bias = 0.0;

        // Hinge-loss subgradient descent
        for _ in 0..Self::EPOCHS {
            let mut grad_w: Vec<f64> = weights.iter().map(|w| Self::LAMBDA * w).collect();
            let mut grad_b = 0.0;
            for (row, &s) in x.iter().zip(&signs) {
                if s * (dot(&weights, row) + bias) < 1.0 {
                    for (g, v) in grad_w.iter_mut().zip(row) {
                        *g -= s * v / n;
                    }
                    grad_b -= s / n;
                }
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= Self::LEARNING_RATE * g;
            }
            bias -= Self::LEARNING_RATE * grad_b;
        }

        // Platt scaling on the training margins, with smoothed targets
        let positives = y.iter().filter(|&&v| v > 0.5).count() as f64;
        let negatives = y.len() as f64 - positives;
        let hi = (positives + 1.0) / (positives + 2.0);
        let lo = 1.0 / (negatives + 2.0);
        let margins: Vec<f64> = x.iter().map(|row| dot(&weights, row) + bias).collect();

        let (mut a, mut b) = (1.0, 0.0);
        for _ in 0..Self::PLATT_EPOCHS {
            let (mut ga, mut gb) = (0.0, 0.0);
            for (m, &label) in margins.iter().zip(y) {
                let target = if label > 0.5 { hi } else { lo };
                let err = sigmoid(a * m + b) - target;
                ga += err * m;
                gb += err;
            }
            a -= Self::PLATT_RATE * ga / n;
            b -= Self::PLATT_RATE * gb / n;
        }

        CalibratedSvm {
            weights,
            bias,
            platt_a: a,
            platt_b: b,
        }
    }

    pub fn margin(&self, row: &[f64]) -> f64 {
        dot(&self.weights, row) + self.bias
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.platt_a * self.margin(row) + self.platt_b)
    }
}

// ============================================================================
// BASE MODEL (tagged union, serialized into model artifacts)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    LogisticRegression,
    GradientBoosting,
    RandomForest,
    CalibratedSvm,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::LogisticRegression,
        ModelKind::GradientBoosting,
        ModelKind::RandomForest,
        ModelKind::CalibratedSvm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "logistic_regression",
            ModelKind::GradientBoosting => "gradient_boosting",
            ModelKind::RandomForest => "random_forest",
            ModelKind::CalibratedSvm => "calibrated_svm",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaseModel {
    LogisticRegression(LogisticRegression),
    GradientBoosting(GradientBoostedTrees),
    RandomForest(RandomForest),
    CalibratedSvm(CalibratedSvm),
}

impl BaseModel {
    pub fn fit(kind: ModelKind, x: &[Vec<f64>], y: &[f64], seed: u64) -> Self {
        match kind {
            ModelKind::LogisticRegression => BaseModel::LogisticRegression(LogisticRegression::fit(x, y)),
            ModelKind::GradientBoosting => BaseModel::GradientBoosting(GradientBoostedTrees::fit(x, y, seed)),
            ModelKind::RandomForest => BaseModel::RandomForest(RandomForest::fit(x, y, seed)),
            ModelKind::CalibratedSvm => BaseModel::CalibratedSvm(CalibratedSvm::fit(x, y)),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            BaseModel::LogisticRegression(_) => ModelKind::LogisticRegression,
            BaseModel::GradientBoosting(_) => ModelKind::GradientBoosting,
            BaseModel::RandomForest(_) => ModelKind::RandomForest,
            BaseModel::CalibratedSvm(_) => ModelKind::CalibratedSvm,
        }
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        match self {
            BaseModel::LogisticRegression(m) => m.predict_proba(row),
            BaseModel::GradientBoosting(m) => m.predict_proba(row),
            BaseModel::RandomForest(m) => m.predict_proba(row),
            BaseModel::CalibratedSvm(m) => m.predict_proba(row),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Label = feature 0 above 0.5; feature 1 is noise
    fn separable() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![i as f64 / 40.0, ((i * 7) % 5) as f64 / 5.0])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| if r[0] > 0.5 { 1.0 } else { 0.0 }).collect();
        (x, y)
    }

    #[test]
    fn test_every_base_model_separates_clean_data() {
        let (x, y) = separable();
        for kind in ModelKind::ALL {
            let model = BaseModel::fit(kind, &x, &y, 7);
            let low = model.predict_proba(&[0.05, 0.2]);
            let high = model.predict_proba(&[0.95, 0.2]);
            assert!(high > low, "{} did not separate: {} vs {}", kind.as_str(), high, low);
            assert!((0.0..=1.0).contains(&low) && (0.0..=1.0).contains(&high));
        }
    }

    #[test]
    fn test_training_is_deterministic() {
        let (x, y) = separable();
        let a = BaseModel::fit(ModelKind::RandomForest, &x, &y, 11);
        let b = BaseModel::fit(ModelKind::RandomForest, &x, &y, 11);
        assert_eq!(a.predict_proba(&[0.4, 0.6]), b.predict_proba(&[0.4, 0.6]));
    }

    #[test]
    fn test_base_model_serde_tag() {
        let (x, y) = separable();
        let model = BaseModel::fit(ModelKind::LogisticRegression, &x, &y, 1);
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["kind"], "logistic_regression");

        let back: BaseModel = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), ModelKind::LogisticRegression);
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(1000.0) <= 1.0);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(-1000.0).is_finite());
    }
}
