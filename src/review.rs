// 👤 Review Queue - Pairs a human has to settle
//
// Ordered by entity tier, then the size of the cluster the pair would
// create, then recency. Human decisions are append-only; the latest one
// per pair wins and every decision becomes a training label.

use crate::record::EntityTier;
use crate::tiebreak::{EscalationReason, TiebreakOutcome, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

// ============================================================================
// REASONS + ROUTING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Classifier leaning and tiebreak decision point different ways
    Disagreement,
    LowConfidence,
    NoMajority,
    TiebreakTimeout,
    ServiceUnavailable,
    /// Uncertain pair and no reasoning service configured
    NoTiebreaker,
    ProcessingError,
    ClusterConflict,
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::Disagreement => "disagreement",
            ReviewReason::LowConfidence => "low_confidence",
            ReviewReason::NoMajority => "no_majority",
            ReviewReason::TiebreakTimeout => "tiebreak_timeout",
            ReviewReason::ServiceUnavailable => "service_unavailable",
            ReviewReason::NoTiebreaker => "no_tiebreaker",
            ReviewReason::ProcessingError => "processing_error",
            ReviewReason::ClusterConflict => "cluster_conflict",
        }
    }

    pub fn parse(raw: &str) -> Option<ReviewReason> {
        match raw {
            "disagreement" => Some(ReviewReason::Disagreement),
            "low_confidence" => Some(ReviewReason::LowConfidence),
            "no_majority" => Some(ReviewReason::NoMajority),
            "tiebreak_timeout" => Some(ReviewReason::TiebreakTimeout),
            "service_unavailable" => Some(ReviewReason::ServiceUnavailable),
            "no_tiebreaker" => Some(ReviewReason::NoTiebreaker),
            "processing_error" => Some(ReviewReason::ProcessingError),
            "cluster_conflict" => Some(ReviewReason::ClusterConflict),
            _ => None,
        }
    }
}

impl From<EscalationReason> for ReviewReason {
    fn from(reason: EscalationReason) -> Self {
        match reason {
            EscalationReason::NoMajority => ReviewReason::NoMajority,
            EscalationReason::TimedOut => ReviewReason::TiebreakTimeout,
            EscalationReason::ServiceUnavailable => ReviewReason::ServiceUnavailable,
        }
    }
}

/// Decide whether an uncertain pair still needs a human after the tiebreak.
/// `None` means the tiebreak decision stands.
pub fn route_uncertain(
    probability: f64,
    outcome: Option<&TiebreakOutcome>,
    confidence_floor: f64,
) -> Option<ReviewReason> {
    match outcome {
        None => Some(ReviewReason::NoTiebreaker),
        Some(TiebreakOutcome::Escalated { reason, .. }) => Some((*reason).into()),
        Some(TiebreakOutcome::Decided {
            decision,
            confidence,
            ..
        }) => {
            let leaning = if probability >= 0.5 {
                Verdict::Match
            } else {
                Verdict::NonMatch
            };
            if leaning != *decision {
                Some(ReviewReason::Disagreement)
            } else if *confidence < confidence_floor {
                Some(ReviewReason::LowConfidence)
            } else {
                None
            }
        }
    }
}

// ============================================================================
// QUEUE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: String,
    pub left_id: String,
    pub right_id: String,
    pub reason: ReviewReason,
    /// Ensemble probability when the pair was scored
    pub probability: Option<f64>,
    pub tiebreak: Option<TiebreakOutcome>,
    pub features: Option<Vec<f64>>,
    pub tier: EntityTier,
    /// Members of the cluster a match would produce
    pub cluster_size: usize,
    /// Newest `updated_at` of the two records
    pub recency: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub run_id: Option<String>,
    pub detail: Option<String>,
}

impl ReviewItem {
    pub fn new(left_id: &str, right_id: &str, reason: ReviewReason, recency: DateTime<Utc>) -> Self {
        ReviewItem {
            id: uuid::Uuid::new_v4().to_string(),
            left_id: left_id.to_string(),
            right_id: right_id.to_string(),
            reason,
            probability: None,
            tiebreak: None,
            features: None,
            tier: EntityTier::Tier3,
            cluster_size: 2,
            recency,
            created_at: Utc::now(),
            run_id: None,
            detail: None,
        }
    }
}

/// Greater = reviewed sooner
impl Ord for ReviewItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .tier
            .rank()
            .cmp(&self.tier.rank())
            .then(self.cluster_size.cmp(&other.cluster_size))
            .then(self.recency.cmp(&other.recency))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ReviewItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReviewItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReviewItem {}

/// Priority order for pending items; `pending_review_items` serves every
/// listing through it
#[derive(Debug, Default)]
pub struct ReviewQueue {
    heap: BinaryHeap<ReviewItem>,
}

impl ReviewQueue {
    pub fn pop(&mut self) -> Option<ReviewItem> {
        self.heap.pop()
    }

    /// Up to `limit` items, highest priority first
    pub fn take(mut self, limit: usize) -> Vec<ReviewItem> {
        let mut items = Vec::with_capacity(limit.min(self.heap.len()));
        while items.len() < limit {
            match self.pop() {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }
}

impl FromIterator<ReviewItem> for ReviewQueue {
    fn from_iter<I: IntoIterator<Item = ReviewItem>>(iter: I) -> Self {
        ReviewQueue {
            heap: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// HUMAN DECISIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub item_id: String,
    pub left_id: String,
    pub right_id: String,
    pub verdict: Verdict,
    pub reviewer: String,
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Latest decision per pair; later entries win ties on timestamp
pub fn latest_decisions(decisions: &[HumanDecision]) -> BTreeMap<(String, String), HumanDecision> {
    let mut latest: BTreeMap<(String, String), HumanDecision> = BTreeMap::new();
    for decision in decisions {
        let key = (decision.left_id.clone(), decision.right_id.clone());
        let newer = latest
            .get(&key)
            .map_or(true, |current| decision.decided_at >= current.decided_at);
        if newer {
            latest.insert(key, decision.clone());
        }
    }
    latest
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewerDisagreement {
    pub pairs_reviewed: usize,
    /// Pairs with two or more decisions
    pub pairs_rereviewed: usize,
    /// Pairs whose decisions do not all agree
    pub pairs_in_conflict: usize,
    pub rate: f64,
}

/// How often humans contradicted each other (or themselves) on a pair
pub fn reviewer_disagreement(decisions: &[HumanDecision]) -> ReviewerDisagreement {
    let mut by_pair: BTreeMap<(&str, &str), Vec<Verdict>> = BTreeMap::new();
    for d in decisions {
        by_pair
            .entry((d.left_id.as_str(), d.right_id.as_str()))
            .or_default()
            .push(d.verdict);
    }

    let pairs_reviewed = by_pair.len();
    let pairs_rereviewed = by_pair.values().filter(|v| v.len() >= 2).count();
    let pairs_in_conflict = by_pair
        .values()
        .filter(|v| v.iter().any(|x| *x != v[0]))
        .count();

    ReviewerDisagreement {
        pairs_reviewed,
        pairs_rereviewed,
        pairs_in_conflict,
        rate: if pairs_reviewed == 0 {
            0.0
        } else {
            pairs_in_conflict as f64 / pairs_reviewed as f64
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
    }

    fn item(id: &str, tier: EntityTier, cluster_size: usize, recency: DateTime<Utc>) -> ReviewItem {
        let mut item = ReviewItem::new("a", "b", ReviewReason::NoMajority, recency);
        item.id = id.to_string();
        item.tier = tier;
        item.cluster_size = cluster_size;
        item
    }

    fn decided(verdict: Verdict, confidence: f64) -> TiebreakOutcome {
        TiebreakOutcome::Decided {
            decision: verdict,
            confidence,
            votes: vec![],
            supporting_evidence: vec![],
            opposing_evidence: vec![],
        }
    }

    fn human(left: &str, verdict: Verdict, at: DateTime<Utc>, reviewer: &str) -> HumanDecision {
        HumanDecision {
            item_id: format!("item-{}", left),
            left_id: left.to_string(),
            right_id: "z".to_string(),
            verdict,
            reviewer: reviewer.to_string(),
            notes: None,
            decided_at: at,
        }
    }

    #[test]
    fn test_queue_order_tier_then_size_then_recency() {
        let queue: ReviewQueue = vec![
            item("t3-big", EntityTier::Tier3, 9, day(20)),
            item("t1-small-old", EntityTier::Tier1, 2, day(1)),
            item("t2", EntityTier::Tier2, 2, day(5)),
            item("t1-small-new", EntityTier::Tier1, 2, day(10)),
            item("t1-big", EntityTier::Tier1, 4, day(2)),
        ]
        .into_iter()
        .collect();

        let order: Vec<String> = queue.take(usize::MAX).into_iter().map(|i| i.id).collect();
        assert_eq!(
            order,
            vec!["t1-big", "t1-small-new", "t1-small-old", "t2", "t3-big"]
        );
    }

    #[test]
    fn test_take_stops_at_limit() {
        let queue: ReviewQueue = vec![
            item("low", EntityTier::Tier3, 2, day(1)),
            item("high", EntityTier::Tier1, 2, day(1)),
            item("mid", EntityTier::Tier2, 2, day(1)),
        ]
        .into_iter()
        .collect();

        let top: Vec<String> = queue.take(2).into_iter().map(|i| i.id).collect();
        assert_eq!(top, vec!["high", "mid"]);

        let mut empty: ReviewQueue = std::iter::empty().collect();
        assert!(empty.pop().is_none());
        assert!(empty.take(5).is_empty());
    }

    #[test]
    fn test_routing() {
        assert_eq!(route_uncertain(0.6, None, 0.6), Some(ReviewReason::NoTiebreaker));
        assert_eq!(route_uncertain(0.6, Some(&decided(Verdict::Match, 1.0)), 0.6), None);
        assert_eq!(
            route_uncertain(0.6, Some(&decided(Verdict::NonMatch, 1.0)), 0.6),
            Some(ReviewReason::Disagreement)
        );
        assert_eq!(
            route_uncertain(0.4, Some(&decided(Verdict::NonMatch, 2.0 / 3.0)), 0.7),
            Some(ReviewReason::LowConfidence)
        );
        let escalated = TiebreakOutcome::Escalated {
            reason: EscalationReason::TimedOut,
            votes: vec![],
        };
        assert_eq!(
            route_uncertain(0.5, Some(&escalated), 0.6),
            Some(ReviewReason::TiebreakTimeout)
        );
    }

    #[test]
    fn test_latest_decision_wins() {
        let decisions = vec![
            human("a", Verdict::Match, day(1), "ana"),
            human("a", Verdict::NonMatch, day(3), "ben"),
            human("b", Verdict::Match, day(2), "ana"),
        ];
        let latest = latest_decisions(&decisions);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[&("a".to_string(), "z".to_string())].verdict, Verdict::NonMatch);
        assert_eq!(latest[&("b".to_string(), "z".to_string())].reviewer, "ana");
    }

    #[test]
    fn test_reviewer_disagreement_metric() {
        let decisions = vec![
            human("a", Verdict::Match, day(1), "ana"),
            human("a", Verdict::NonMatch, day(1) + Duration::days(40), "ben"),
            human("b", Verdict::Match, day(2), "ana"),
            human("b", Verdict::Match, day(4), "ben"),
            human("c", Verdict::NonMatch, day(2), "ana"),
            human("d", Verdict::Match, day(2), "ana"),
        ];
        let metric = reviewer_disagreement(&decisions);
        assert_eq!(metric.pairs_reviewed, 4);
        assert_eq!(metric.pairs_rereviewed, 2);
        assert_eq!(metric.pairs_in_conflict, 1);
        assert_eq!(metric.rate, 0.25);
    }

    #[test]
    fn test_reason_names_round_trip() {
        for reason in [
            ReviewReason::Disagreement,
            ReviewReason::ClusterConflict,
            ReviewReason::TiebreakTimeout,
        ] {
            assert_eq!(ReviewReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(ReviewReason::parse("bored"), None);
    }
}
