// 🗄️ Model Store - Atomically swapped classifier artifact + retrain gate

use super::training::{cross_validate, train_ensemble, CvMetrics, TrainingExample, TrainingParams};
use super::EnsembleClassifier;
use crate::config::RetrainConfig;
use crate::error::TrainingError;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Holds the deployed model. Readers take an `Arc` snapshot; a deploy
/// replaces the pointer and never touches a model someone is scoring with.
#[derive(Debug, Default)]
pub struct ModelStore {
    current: RwLock<Option<Arc<EnsembleClassifier>>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: EnsembleClassifier) -> Self {
        ModelStore {
            current: RwLock::new(Some(Arc::new(model))),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<EnsembleClassifier>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a new model, returning the one it replaced
    pub fn deploy(&self, model: Arc<EnsembleClassifier>) -> Option<Arc<EnsembleClassifier>> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        info!(version = %model.version, "model deployed");
        guard.replace(model)
    }

    /// Train a candidate and deploy it unless it regresses past `tolerance`
    pub fn retrain(
        &self,
        examples: &[TrainingExample],
        params: &TrainingParams,
        tolerance: f64,
    ) -> Result<RetrainReport, TrainingError> {
        let candidate_metrics = cross_validate(examples, params)?;
        let mut candidate = train_ensemble(examples, params)?;
        candidate.cv_metrics = Some(candidate_metrics.clone());
        let candidate = Arc::new(candidate);

        // Cross-validated against cross-validated: an in-sample score of the
        // deployed model would be inflated by the labels it was fitted on
        let deployed = self.snapshot();
        let deployed_metrics = deployed.as_ref().and_then(|model| model.cv_metrics.clone());

        let decision = match &deployed_metrics {
            Some(current) if candidate_metrics.f1 < current.f1 - tolerance => {
                RetrainDecision::Reject {
                    reason: format!(
                        "candidate F1 {:.4} trails deployed F1 {:.4} by more than {:.4}",
                        candidate_metrics.f1, current.f1, tolerance
                    ),
                }
            }
            _ => RetrainDecision::Deploy,
        };

        let report = RetrainReport {
            candidate: Arc::clone(&candidate),
            candidate_metrics,
            deployed_version: deployed.as_ref().map(|m| m.version.clone()),
            deployed_metrics,
            decision,
        };

        match &report.decision {
            RetrainDecision::Deploy => {
                self.deploy(candidate);
            }
            RetrainDecision::Reject { reason } => {
                warn!(candidate = %report.candidate.version, %reason, "retrain rejected, keeping deployed model");
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetrainDecision {
    Deploy,
    Reject { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrainReport {
    #[serde(skip)]
    pub candidate: Arc<EnsembleClassifier>,
    pub candidate_metrics: CvMetrics,
    pub deployed_version: Option<String>,
    pub deployed_metrics: Option<CvMetrics>,
    pub decision: RetrainDecision,
}

impl RetrainReport {
    pub fn deployed(&self) -> bool {
        self.decision == RetrainDecision::Deploy
    }

    /// Candidate F1 minus deployed F1 (None on first training)
    pub fn f1_delta(&self) -> Option<f64> {
        self.deployed_metrics
            .as_ref()
            .map(|current| self.candidate_metrics.f1 - current.f1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrainSchedule {
    pub interval_days: i64,
}

impl RetrainSchedule {
    pub fn from_config(config: &RetrainConfig) -> Self {
        RetrainSchedule {
            interval_days: config.interval_days,
        }
    }

    pub fn is_due(&self, last_trained: Option<DateTime<Utc>>, now: DateTime<Utc>, force: bool) -> bool {
        match last_trained {
            _ if force => true,
            None => true,
            Some(at) => now - at >= Duration::days(self.interval_days),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::fixture_examples;
    use chrono::TimeZone;

    #[test]
    fn test_schedule_is_monthly() {
        let schedule = RetrainSchedule { interval_days: 30 };
        let trained = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(schedule.is_due(None, trained, false));
        assert!(!schedule.is_due(Some(trained), trained + Duration::days(29), false));
        assert!(schedule.is_due(Some(trained), trained + Duration::days(30), false));
        assert!(schedule.is_due(Some(trained), trained + Duration::days(1), true));
    }

    #[test]
    fn test_first_retrain_deploys() {
        let store = ModelStore::new();
        assert!(store.snapshot().is_none());

        let report = store
            .retrain(&fixture_examples(), &TrainingParams::default(), 0.01)
            .unwrap();

        assert!(report.deployed());
        assert!(report.f1_delta().is_none());
        assert_eq!(
            store.snapshot().map(|m| m.version.clone()),
            Some(report.candidate.version.clone())
        );
    }

    #[test]
    fn test_regression_gate_keeps_deployed_model() {
        let examples = fixture_examples();
        let store = ModelStore::new();
        store.retrain(&examples, &TrainingParams::default(), 0.01).unwrap();
        let before = store.snapshot().unwrap().version.clone();

        // An impossible tolerance forces any candidate below the bar
        let report = store
            .retrain(&examples, &TrainingParams::default(), -1.0)
            .unwrap();

        assert!(matches!(report.decision, RetrainDecision::Reject { .. }));
        assert_eq!(store.snapshot().unwrap().version, before);
        assert!(report.f1_delta().is_some());
    }

    #[test]
    fn test_noisy_labels_do_not_block_retraining() {
        // Every 4th pair copied with its label flipped: no model fits this
        // perfectly out of fold, though the deployed one fits it in-sample
        let mut examples = fixture_examples();
        let flipped: Vec<TrainingExample> = examples
            .iter()
            .step_by(4)
            .map(|e| TrainingExample {
                label: !e.label,
                ..e.clone()
            })
            .collect();
        examples.extend(flipped);

        let store = ModelStore::new();
        let first = store.retrain(&examples, &TrainingParams::default(), 0.01).unwrap();
        assert!(first.deployed());
        assert!(first.candidate.cv_metrics.is_some());

        let second = store.retrain(&examples, &TrainingParams::default(), 0.01).unwrap();
        assert_eq!(second.decision, RetrainDecision::Deploy);
        assert_eq!(second.deployed_metrics, first.candidate.cv_metrics);
        assert_eq!(store.snapshot().unwrap().version, second.candidate.version);

        println!("✅ Retrain gate compares CV with CV: delta {:?}", second.f1_delta());
    }

    #[test]
    fn test_model_without_cv_metrics_is_replaced() {
        let legacy = train_ensemble(&fixture_examples(), &TrainingParams::default()).unwrap();
        assert!(legacy.cv_metrics.is_none());
        let store = ModelStore::with_model(legacy);

        let report = store
            .retrain(&fixture_examples(), &TrainingParams::default(), 0.01)
            .unwrap();
        assert!(report.deployed());
        assert!(report.f1_delta().is_none());
    }

    #[test]
    fn test_snapshot_survives_deploy() {
        let store = ModelStore::new();
        store.retrain(&fixture_examples(), &TrainingParams::default(), 0.01).unwrap();
        let held = store.snapshot().unwrap();

        let next = Arc::new(train_ensemble(&fixture_examples(), &TrainingParams::default()).unwrap());
        let replaced = store.deploy(Arc::clone(&next)).unwrap();

        assert_eq!(replaced.version, held.version);
        assert_ne!(store.snapshot().unwrap().version, held.version);
        // The old snapshot is still usable
        assert!(held.score(&fixture_examples()[0].features).is_ok());
    }
}
