// 👤 Review storage - pending items, human decisions, training labels

use super::matches::insert_edge;
use super::records::get_record;
use super::{enum_col, insert_event, json_col, opt_json_col, time_col, ts, Event};
use crate::classifier::{LabelSource, TrainingExample};
use crate::cluster::{ConfirmedEdge, EdgeOrigin};
use crate::embedding::EmbeddingTable;
use crate::features::FeatureExtractor;
use crate::record::{EntityTier, RecordProfile};
use crate::review::{HumanDecision, ReviewItem, ReviewQueue, ReviewReason};
use crate::tiebreak::Verdict;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

/// Queue a pair for review. A pair that already has a pending item is not
/// queued twice; returns whether a row was written.
pub fn enqueue_review_item(conn: &Connection, item: &ReviewItem) -> Result<bool> {
    let pending: i64 = conn.query_row(
        "SELECT COUNT(*) FROM review_items
         WHERE left_id = ?1 AND right_id = ?2 AND status = 'pending'",
        params![item.left_id, item.right_id],
        |row| row.get(0),
    )?;
    if pending > 0 {
        return Ok(false);
    }

    let tiebreak = item.tiebreak.as_ref().map(serde_json::to_string).transpose()?;
    let features = item.features.as_ref().map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO review_items (
            id, left_id, right_id, reason, probability, tiebreak, features,
            tier, cluster_size, recency, created_at, run_id, detail, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'pending')",
        params![
            item.id,
            item.left_id,
            item.right_id,
            item.reason.as_str(),
            item.probability,
            tiebreak,
            features,
            item.tier.rank(),
            item.cluster_size as i64,
            ts(&item.recency),
            ts(&item.created_at),
            item.run_id,
            item.detail,
        ],
    )?;
    Ok(true)
}

const ITEM_COLUMNS: &str = "id, left_id, right_id, reason, probability, tiebreak, features,
    tier, cluster_size, recency, created_at, run_id, detail";

fn item_from_row(row: &Row) -> rusqlite::Result<ReviewItem> {
    let tier: i64 = row.get(7)?;
    let cluster_size: i64 = row.get(8)?;
    Ok(ReviewItem {
        id: row.get(0)?,
        left_id: row.get(1)?,
        right_id: row.get(2)?,
        reason: enum_col(row, 3, ReviewReason::parse)?,
        probability: row.get(4)?,
        tiebreak: opt_json_col(row, 5)?,
        features: opt_json_col(row, 6)?,
        tier: EntityTier::from_rank(tier),
        cluster_size: cluster_size.max(0) as usize,
        recency: time_col(row, 9)?,
        created_at: time_col(row, 10)?,
        run_id: row.get(11)?,
        detail: row.get(12)?,
    })
}

/// Pending items in review order: tier, cluster size, recency.
/// The ordering lives on `ReviewItem`, so rows are ranked in memory.
pub fn pending_review_items(conn: &Connection, limit: usize) -> Result<Vec<ReviewItem>> {
    let sql = format!("SELECT {} FROM review_items WHERE status = 'pending'", ITEM_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let queue: ReviewQueue = stmt
        .query_map([], item_from_row)?
        .collect::<Result<ReviewQueue, _>>()?;
    Ok(queue.take(limit))
}

pub fn get_review_item(conn: &Connection, id: &str) -> Result<Option<ReviewItem>> {
    let sql = format!("SELECT {} FROM review_items WHERE id = ?1", ITEM_COLUMNS);
    let item = conn.query_row(&sql, params![id], item_from_row).optional()?;
    Ok(item)
}

/// Record a reviewer's verdict. The decision is appended (never replaces an
/// earlier one), the item leaves the pending list, and the verdict becomes
/// a human training label.
pub fn record_decision(
    conn: &Connection,
    item_id: &str,
    verdict: Verdict,
    reviewer: &str,
    notes: Option<&str>,
) -> Result<HumanDecision> {
    let item = get_review_item(conn, item_id)?
        .with_context(|| format!("Review item {} not found", item_id))?;

    let decision = HumanDecision {
        item_id: item.id.clone(),
        left_id: item.left_id.clone(),
        right_id: item.right_id.clone(),
        verdict,
        reviewer: reviewer.to_string(),
        notes: notes.map(str::to_string),
        decided_at: Utc::now(),
    };

    // Decision, status, edge, label and event land together or not at all
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO review_decisions (item_id, left_id, right_id, verdict, reviewer, notes, decided_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            decision.item_id,
            decision.left_id,
            decision.right_id,
            decision.verdict.as_str(),
            decision.reviewer,
            decision.notes,
            ts(&decision.decided_at),
        ],
    )?;

    tx.execute(
        "UPDATE review_items SET status = 'decided', decided_at = ?1 WHERE id = ?2",
        params![ts(&decision.decided_at), item.id],
    )?;

    if verdict.is_match() {
        let mut edge = ConfirmedEdge::new(&item.left_id, &item.right_id, 1.0, EdgeOrigin::HumanReview);
        edge.run_id = item.run_id.clone();
        insert_edge(&tx, &edge)?;
    }

    let features = match item.features {
        Some(features) => Some(features),
        None => pair_features(&tx, &item.left_id, &item.right_id)?,
    };
    if let Some(features) = features {
        insert_training_example(
            &tx,
            &TrainingExample {
                left_id: item.left_id.clone(),
                right_id: item.right_id.clone(),
                features,
                label: verdict.is_match(),
                source: LabelSource::Human,
            },
        )?;
    }

    let event = Event::new(
        "review_decided",
        "review_item",
        &item.id,
        serde_json::json!({
            "left_id": item.left_id,
            "right_id": item.right_id,
            "verdict": verdict.as_str(),
            "reason": item.reason.as_str(),
        }),
        reviewer,
    );
    insert_event(&tx, &event)?;
    tx.commit()?;

    info!(item = %item.id, verdict = verdict.as_str(), reviewer, "review decision recorded");
    Ok(decision)
}

/// Features for a pair from stored records, without embeddings
fn pair_features(conn: &Connection, left_id: &str, right_id: &str) -> Result<Option<Vec<f64>>> {
    let (Some(left), Some(right)) = (get_record(conn, left_id)?, get_record(conn, right_id)?) else {
        return Ok(None);
    };
    let (pl, pr) = (RecordProfile::from_record(&left), RecordProfile::from_record(&right));
    let features =
        FeatureExtractor::new().extract((&left, &pl), (&right, &pr), &EmbeddingTable::disabled());
    Ok(Some(features))
}

/// All human decisions, oldest first
pub fn load_decisions(conn: &Connection) -> Result<Vec<HumanDecision>> {
    let mut stmt = conn.prepare(
        "SELECT item_id, left_id, right_id, verdict, reviewer, notes, decided_at
         FROM review_decisions ORDER BY decided_at, id",
    )?;
    let decisions = stmt
        .query_map([], |row| {
            Ok(HumanDecision {
                item_id: row.get(0)?,
                left_id: row.get(1)?,
                right_id: row.get(2)?,
                verdict: enum_col(row, 3, Verdict::parse)?,
                reviewer: row.get(4)?,
                notes: row.get(5)?,
                decided_at: time_col(row, 6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(decisions)
}

pub fn insert_training_example(conn: &Connection, example: &TrainingExample) -> Result<()> {
    conn.execute(
        "INSERT INTO training_examples (left_id, right_id, features, label, label_source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            example.left_id,
            example.right_id,
            serde_json::to_string(&example.features)?,
            example.label,
            example.source.as_str(),
            ts(&Utc::now()),
        ],
    )?;
    Ok(())
}

/// Training labels with one entry per pair (human beats bootstrap, later
/// beats earlier)
pub fn load_training_examples(conn: &Connection) -> Result<Vec<TrainingExample>> {
    let mut stmt = conn.prepare(
        "SELECT left_id, right_id, features, label, label_source
         FROM training_examples ORDER BY id",
    )?;
    let examples = stmt
        .query_map([], |row| {
            Ok(TrainingExample {
                left_id: row.get(0)?,
                right_id: row.get(1)?,
                features: json_col(row, 2)?,
                label: row.get(3)?,
                source: enum_col(row, 4, LabelSource::parse)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(crate::classifier::training::resolve_labels(examples))
}

// ============================================================================
// TESTS
// ============================================================================
