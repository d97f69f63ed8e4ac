// 🎯 Ensemble Classifier - Match probability for a candidate pair
//
// Four base models vote; a logistic meta-learner trained on their
// out-of-fold predictions combines them. The combination weights are
// learned, never hand-set.

pub mod models;
pub mod store;
pub mod training;
pub mod tree;

use crate::config::DecisionConfig;
use crate::error::ClassifierError;
use crate::features::{schema_fingerprint, FEATURE_COUNT, FEATURE_NAMES};
use chrono::{DateTime, Utc};
use models::{BaseModel, LogisticRegression};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub use store::{ModelStore, RetrainDecision, RetrainReport, RetrainSchedule};
pub use training::{
    cross_validate, train_ensemble, CvMetrics, LabelSource, TrainingExample,
    TrainingParams,
};

// ============================================================================
// SCORE + DECISION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleScore {
    /// Calibrated match probability in [0, 1]
    pub probability: f64,
    /// Per-base-model probabilities (model name → p)
    pub sub_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AutoMatch,
    AutoNonMatch,
    Uncertain,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::AutoMatch => "auto_match",
            Decision::AutoNonMatch => "auto_non_match",
            Decision::Uncertain => "uncertain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    pub match_threshold: f64,
    pub non_match_threshold: f64,
}

impl DecisionPolicy {
    pub fn from_config(config: &DecisionConfig) -> Self {
        DecisionPolicy {
            match_threshold: config.match_threshold,
            non_match_threshold: config.non_match_threshold,
        }
    }

    /// p > match → AutoMatch, p < non_match → AutoNonMatch, otherwise Uncertain
    pub fn decide(&self, probability: f64) -> Decision {
        if probability > self.match_threshold {
            Decision::AutoMatch
        } else if probability < self.non_match_threshold {
            Decision::AutoNonMatch
        } else {
            Decision::Uncertain
        }
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        DecisionPolicy::from_config(&DecisionConfig::default())
    }
}

// ============================================================================
// ENSEMBLE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleClassifier {
    /// Artifact version (UUID)
    pub version: String,
    pub feature_names: Vec<String>,
    pub feature_schema: String,
    pub base_models: Vec<BaseModel>,
    pub meta: LogisticRegression,
    pub trained_at: DateTime<Utc>,
    pub training_examples: usize,
    pub seed: u64,
    /// Cross-validated metrics measured when this model was trained
    #[serde(default)]
    pub cv_metrics: Option<CvMetrics>,
}

impl EnsembleClassifier {
    /// Refuse a model built against a different feature layout
    pub fn check_schema(&self) -> Result<(), ClassifierError> {
        let names_match = self.feature_names.len() == FEATURE_COUNT
            && self
                .feature_names
                .iter()
                .zip(FEATURE_NAMES.iter())
                .all(|(a, b)| a == b);
        if !names_match || self.feature_schema != schema_fingerprint() {
            return Err(ClassifierError::SchemaMismatch);
        }
        Ok(())
    }

    pub fn base_predictions(&self, features: &[f64]) -> Vec<f64> {
        self.base_models
            .iter()
            .map(|m| m.predict_proba(features))
            .collect()
    }

    pub fn score(&self, features: &[f64]) -> Result<EnsembleScore, ClassifierError> {
        if features.len() != self.feature_names.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.feature_names.len(),
                actual: features.len(),
            });
        }

        let base = self.base_predictions(features);
        let raw = self.meta.predict_proba(&base);
        let probability = if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            warn!(version = %self.version, "non-finite ensemble output, using 0.5");
            0.5
        };

        let sub_scores = self
            .base_models
            .iter()
            .zip(base)
            .map(|(m, p)| (m.kind().as_str().to_string(), p))
            .collect();

        Ok(EnsembleScore {
            probability,
            sub_scores,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingTable;
    use crate::features::FeatureExtractor;
    use crate::fixtures::{calpers_pair, fixture_examples};
    use crate::record::RecordProfile;

    fn trained() -> EnsembleClassifier {
        train_ensemble(&fixture_examples(), &TrainingParams::default()).unwrap()
    }

    #[test]
    fn test_decision_policy_bands() {
        let policy = DecisionPolicy::default();
        assert_eq!(policy.decide(0.95), Decision::AutoMatch);
        assert_eq!(policy.decide(0.8), Decision::Uncertain);
        assert_eq!(policy.decide(0.5), Decision::Uncertain);
        assert_eq!(policy.decide(0.3), Decision::Uncertain);
        assert_eq!(policy.decide(0.1), Decision::AutoNonMatch);
    }

    #[test]
    fn test_calpers_scores_as_match() {
        let model = trained();
        let (long, short) = calpers_pair();
        let pl = RecordProfile::from_record(&long);
        let ps = RecordProfile::from_record(&short);
        let features =
            FeatureExtractor::new().extract((&long, &pl), (&short, &ps), &EmbeddingTable::disabled());

        let score = model.score(&features).unwrap();
        println!("✅ CalPERS match probability: {:.3} {:?}", score.probability, score.sub_scores);
        assert!(score.probability > 0.8);
        assert_eq!(score.sub_scores.len(), 4);
    }

    #[test]
    fn test_probabilities_stay_in_unit_interval() {
        let model = trained();
        for example in fixture_examples() {
            let p = model.score(&example.features).unwrap().probability;
            assert!((0.0..=1.0).contains(&p));
        }
        // Garbage in, still a probability out
        let extreme = vec![1e9; FEATURE_COUNT];
        let p = model.score(&extreme).unwrap().probability;
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let model = trained();
        assert_eq!(
            model.score(&[0.5, 0.5]),
            Err(ClassifierError::DimensionMismatch {
                expected: FEATURE_COUNT,
                actual: 2
            })
        );
    }

    #[test]
    fn test_schema_guard() {
        let mut model = trained();
        assert!(model.check_schema().is_ok());

        model.feature_names[0] = "name_soundex".to_string();
        assert_eq!(model.check_schema(), Err(ClassifierError::SchemaMismatch));
    }
}
