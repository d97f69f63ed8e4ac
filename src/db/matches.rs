// 🔗 Matches - confirmed edges and per-pair decisions

use super::{enum_col, opt_json_col, time_col, ts};
use crate::cluster::{ConfirmedEdge, EdgeOrigin};
use crate::tiebreak::{TiebreakOutcome, Verdict};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Append an edge; the same (pair, origin) is stored once
pub fn insert_edge(conn: &Connection, edge: &ConfirmedEdge) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO match_edges (left_id, right_id, confidence, origin, run_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            edge.left_id,
            edge.right_id,
            edge.confidence,
            edge.origin.as_str(),
            edge.run_id,
            ts(&edge.created_at),
        ],
    )?;
    Ok(inserted > 0)
}

pub fn load_edges(conn: &Connection) -> Result<Vec<ConfirmedEdge>> {
    let mut stmt = conn.prepare(
        "SELECT left_id, right_id, confidence, origin, run_id, created_at
         FROM match_edges ORDER BY left_id, right_id, origin",
    )?;
    let edges = stmt
        .query_map([], |row| {
            Ok(ConfirmedEdge {
                left_id: row.get(0)?,
                right_id: row.get(1)?,
                confidence: row.get(2)?,
                origin: enum_col(row, 3, EdgeOrigin::parse)?,
                run_id: row.get(4)?,
                created_at: time_col(row, 5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(edges)
}

/// What happened to one candidate pair in one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairDecision {
    pub run_id: String,
    pub left_id: String,
    pub right_id: String,
    /// rule, auto_match, auto_non_match, tiebreak, review, error
    pub stage: String,
    pub probability: Option<f64>,
    pub rule_id: Option<String>,
    pub tiebreak: Option<TiebreakOutcome>,
    /// None = left for a human
    pub verdict: Option<Verdict>,
    pub confidence: Option<f64>,
    pub model_version: Option<String>,
    pub decided_at: DateTime<Utc>,
}

pub fn insert_pair_decision(conn: &Connection, decision: &PairDecision) -> Result<()> {
    let tiebreak = decision
        .tiebreak
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO pair_decisions (
            run_id, left_id, right_id, stage, probability, rule_id, tiebreak,
            verdict, confidence, model_version, decided_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            decision.run_id,
            decision.left_id,
            decision.right_id,
            decision.stage,
            decision.probability,
            decision.rule_id,
            tiebreak,
            decision.verdict.map(|v| v.as_str()),
            decision.confidence,
            decision.model_version,
            ts(&decision.decided_at),
        ],
    )?;
    Ok(())
}

pub fn pair_decisions_for_run(conn: &Connection, run_id: &str) -> Result<Vec<PairDecision>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, left_id, right_id, stage, probability, rule_id, tiebreak,
                verdict, confidence, model_version, decided_at
         FROM pair_decisions WHERE run_id = ?1 ORDER BY id",
    )?;
    let decisions = stmt
        .query_map(params![run_id], |row| {
            let verdict: Option<String> = row.get(7)?;
            Ok(PairDecision {
                run_id: row.get(0)?,
                left_id: row.get(1)?,
                right_id: row.get(2)?,
                stage: row.get(3)?,
                probability: row.get(4)?,
                rule_id: row.get(5)?,
                tiebreak: opt_json_col(row, 6)?,
                verdict: verdict.as_deref().and_then(Verdict::parse),
                confidence: row.get(8)?,
                model_version: row.get(9)?,
                decided_at: time_col(row, 10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(decisions)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::tiebreak::Vote;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_edges_are_stored_once() {
        let conn = setup();
        let edge = ConfirmedEdge::new("b", "a", 0.97, EdgeOrigin::AutoMatch);

        assert!(insert_edge(&conn, &edge).unwrap());
        assert!(!insert_edge(&conn, &edge).unwrap());

        let human = ConfirmedEdge::new("a", "b", 1.0, EdgeOrigin::HumanReview);
        assert!(insert_edge(&conn, &human).unwrap());

        let edges = load_edges(&conn).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].key(), ("a", "b"));
        assert_eq!(edges[0].origin, EdgeOrigin::AutoMatch);
    }

    #[test]
    fn test_tiebreak_confidence_is_persisted() {
        let conn = setup();
        let outcome = TiebreakOutcome::Decided {
            decision: Verdict::Match,
            confidence: 2.0 / 3.0,
            votes: vec![Vote::Match, Vote::Match, Vote::NonMatch],
            supporting_evidence: vec!["same city".to_string()],
            opposing_evidence: vec!["different name".to_string()],
        };

        insert_pair_decision(
            &conn,
            &PairDecision {
                run_id: "run-1".to_string(),
                left_id: "a".to_string(),
                right_id: "b".to_string(),
                stage: "tiebreak".to_string(),
                probability: Some(0.62),
                rule_id: None,
                tiebreak: Some(outcome.clone()),
                verdict: Some(Verdict::Match),
                confidence: Some(2.0 / 3.0),
                model_version: Some("m1".to_string()),
                decided_at: Utc::now(),
            },
        )
        .unwrap();

        let stored = pair_decisions_for_run(&conn, "run-1").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].verdict, Some(Verdict::Match));
        assert!((stored[0].confidence.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(stored[0].tiebreak, Some(outcome));

        println!("✅ Tiebreak confidence persisted");
    }
}
