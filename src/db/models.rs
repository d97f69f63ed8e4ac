// 🗄️ Model artifacts + run history

use super::{enum_col, insert_event, opt_json_col, time_col, ts, Event};
use crate::classifier::{CvMetrics, EnsembleClassifier, RetrainDecision, RetrainReport};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Deployed,
    Rejected,
    /// Was deployed, replaced by a newer model
    Retired,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Deployed => "deployed",
            ArtifactStatus::Rejected => "rejected",
            ArtifactStatus::Retired => "retired",
        }
    }

    pub fn parse(raw: &str) -> Option<ArtifactStatus> {
        match raw {
            "deployed" => Some(ArtifactStatus::Deployed),
            "rejected" => Some(ArtifactStatus::Rejected),
            "retired" => Some(ArtifactStatus::Retired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub version: String,
    pub status: ArtifactStatus,
    pub trained_at: DateTime<Utc>,
    pub training_examples: usize,
    pub candidate_metrics: Option<CvMetrics>,
    pub deployed_metrics: Option<CvMetrics>,
    pub decision_reason: Option<String>,
}

/// Store the outcome of a retrain. A deployed candidate retires the model
/// it replaced; a rejected one is kept for the record.
pub fn save_artifact(conn: &Connection, report: &RetrainReport, actor: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let model = &report.candidate;

    let (status, reason) = match &report.decision {
        RetrainDecision::Deploy => {
            tx.execute(
                "UPDATE model_artifacts SET status = 'retired' WHERE status = 'deployed'",
                [],
            )?;
            (ArtifactStatus::Deployed, None)
        }
        RetrainDecision::Reject { reason } => (ArtifactStatus::Rejected, Some(reason.clone())),
    };

    tx.execute(
        "INSERT INTO model_artifacts (
            version, status, trained_at, training_examples, candidate_metrics,
            deployed_metrics, decision_reason, artifact, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            model.version,
            status.as_str(),
            ts(&model.trained_at),
            model.training_examples as i64,
            serde_json::to_string(&report.candidate_metrics)?,
            report
                .deployed_metrics
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            reason,
            serde_json::to_string(&**model)?,
            ts(&Utc::now()),
        ],
    )?;

    let event = Event::new(
        if status == ArtifactStatus::Deployed { "model_deployed" } else { "model_rejected" },
        "model",
        &model.version,
        serde_json::json!({
            "f1": report.candidate_metrics.f1,
            "previous_version": report.deployed_version,
            "f1_delta": report.f1_delta(),
        }),
        actor,
    );
    insert_event(&tx, &event)?;

    tx.commit()?;
    Ok(())
}

pub fn load_deployed_model(conn: &Connection) -> Result<Option<EnsembleClassifier>> {
    let artifact: Option<String> = conn
        .query_row(
            "SELECT artifact FROM model_artifacts WHERE status = 'deployed'
             ORDER BY trained_at DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    artifact
        .map(|raw| serde_json::from_str(&raw).context("Failed to decode model artifact"))
        .transpose()
}

/// When the last retrain (deployed or not) happened
pub fn latest_artifact_time(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn.query_row(
        "SELECT MAX(trained_at) FROM model_artifacts",
        [],
        |row| row.get(0),
    )?;
    Ok(raw
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

pub fn list_artifacts(conn: &Connection) -> Result<Vec<ArtifactSummary>> {
    let mut stmt = conn.prepare(
        "SELECT version, status, trained_at, training_examples, candidate_metrics,
                deployed_metrics, decision_reason
         FROM model_artifacts ORDER BY trained_at DESC",
    )?;
    let artifacts = stmt
        .query_map([], |row| {
            let examples: i64 = row.get(3)?;
            Ok(ArtifactSummary {
                version: row.get(0)?,
                status: enum_col(row, 1, ArtifactStatus::parse)?,
                trained_at: time_col(row, 2)?,
                training_examples: examples.max(0) as usize,
                candidate_metrics: opt_json_col(row, 4)?,
                deployed_metrics: opt_json_col(row, 5)?,
                decision_reason: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(artifacts)
}

// ============================================================================
// RUNS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// "full" or "since:<timestamp>"
    pub scope: String,
    /// completed or failed
    pub status: String,
    pub report: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Runs are written once, when they finish
pub fn insert_run(conn: &Connection, run: &RunRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO runs (run_id, started_at, finished_at, scope, status, report, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run.run_id,
            ts(&run.started_at),
            ts(&run.finished_at),
            run.scope,
            run.status,
            run.report.as_ref().map(serde_json::to_string).transpose()?,
            run.error,
        ],
    )?;
    Ok(())
}

/// Most recent first
pub fn list_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, started_at, finished_at, scope, status, report, error
         FROM runs ORDER BY started_at DESC LIMIT ?1",
    )?;
    let runs = stmt
        .query_map(params![limit as i64], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                started_at: time_col(row, 1)?,
                finished_at: time_col(row, 2)?,
                scope: row.get(3)?,
                status: row.get(4)?,
                report: opt_json_col(row, 5)?,
                error: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(runs)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ModelStore, TrainingParams};
    use crate::db::setup_database;
    use crate::fixtures::fixture_examples;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_deploy_retires_previous_artifact() {
        let conn = setup();
        let store = ModelStore::new();
        assert!(load_deployed_model(&conn).unwrap().is_none());
        assert!(latest_artifact_time(&conn).unwrap().is_none());

        let first = store.retrain(&fixture_examples(), &TrainingParams::default(), 0.01).unwrap();
        save_artifact(&conn, &first, "test").unwrap();
        let second = store.retrain(&fixture_examples(), &TrainingParams::default(), 1.0).unwrap();
        save_artifact(&conn, &second, "test").unwrap();

        let deployed = load_deployed_model(&conn).unwrap().unwrap();
        assert_eq!(deployed.version, second.candidate.version);
        assert!(deployed.check_schema().is_ok());

        let artifacts = list_artifacts(&conn).unwrap();
        assert_eq!(artifacts.len(), 2);
        let statuses: Vec<ArtifactStatus> = artifacts.iter().map(|a| a.status).collect();
        assert!(statuses.contains(&ArtifactStatus::Retired));
        assert!(statuses.contains(&ArtifactStatus::Deployed));
        assert!(latest_artifact_time(&conn).unwrap().is_some());
    }

    #[test]
    fn test_rejected_artifact_keeps_deployed_model() {
        let conn = setup();
        let store = ModelStore::new();
        let first = store.retrain(&fixture_examples(), &TrainingParams::default(), 0.01).unwrap();
        save_artifact(&conn, &first, "test").unwrap();

        let rejected = store.retrain(&fixture_examples(), &TrainingParams::default(), -1.0).unwrap();
        save_artifact(&conn, &rejected, "test").unwrap();

        let deployed = load_deployed_model(&conn).unwrap().unwrap();
        assert_eq!(deployed.version, first.candidate.version);
        let artifacts = list_artifacts(&conn).unwrap();
        assert!(artifacts
            .iter()
            .any(|a| a.status == ArtifactStatus::Rejected && a.decision_reason.is_some()));
    }

    #[test]
    fn test_runs_round_trip() {
        let conn = setup();
        let now = Utc::now();
        insert_run(
            &conn,
            &RunRecord {
                run_id: "r1".to_string(),
                started_at: now,
                finished_at: now,
                scope: "full".to_string(),
                status: "completed".to_string(),
                report: Some(serde_json::json!({"pairs": 3})),
                error: None,
            },
        )
        .unwrap();

        let runs = list_runs(&conn, 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].report.as_ref().unwrap()["pairs"], 3);
    }
}
