// 🚀 Pipeline - One resolution run, stored records in, golden records out
//
// Steps: load → embed → block → features + scores → decide → tiebreak →
// persist → cluster → golden. Per-pair problems are counted and routed to
// review; only structural failures abort. Each run is written to `runs`
// once, when it finishes.

use crate::blocking::{Blocker, BlockingMode, BlockingStats, CandidatePair};
use crate::classifier::{
    Decision, DecisionPolicy, EnsembleClassifier, EnsembleScore, LabelSource, ModelStore,
    RetrainReport, RetrainSchedule, TrainingExample, TrainingParams,
};
use crate::cluster::{ConfirmedEdge, Clusterer, EdgeOrigin, UnionFind};
use crate::config::PipelineConfig;
use crate::db::{
    current_golden_records, enqueue_review_item, insert_edge, insert_pair_decision, insert_run,
    insert_training_example, latest_artifact_time, load_decisions, load_deployed_model, load_edges,
    load_records, load_training_examples, records_ingested_since, save_artifact,
    save_golden_plan, GoldenWriteSummary, PairDecision, RunRecord,
};
use crate::embedding::{embed_records, from_backend, EmbeddingTable, SharedEmbeddingService};
use crate::error::PipelineError;
use crate::features::FeatureVector;
use crate::golden::GoldenRecordBuilder;
use crate::record::{OrganizationRecord, RecordProfile};
use crate::review::{latest_decisions, route_uncertain, HumanDecision, ReviewItem, ReviewReason};
use crate::rules::{RuleEngine, RuleScope, RuleVerdict};
use crate::tiebreak::{
    EscalationReason, HttpReasoningService, SharedReasoningService, TiebreakOutcome,
    TiebreakPrompt, TiebreakStats, Tiebreaker, Verdict,
};
use crate::workers::{run_blocking_bounded, run_bounded};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

// ============================================================================
// SCOPE + REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunScope {
    /// Every active record
    Full,
    /// Only pairs touching a record ingested after the timestamp
    Since(DateTime<Utc>),
}

impl RunScope {
    pub fn label(&self) -> String {
        match self {
            RunScope::Full => "full".to_string(),
            RunScope::Since(since) => format!("since:{}", since.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub scope: String,
    pub records: usize,
    pub blocking_mode: Option<BlockingMode>,
    pub blocking: BlockingStats,
    /// Pairs in scope that went to the classifier
    pub candidate_pairs: usize,
    pub rejected_by_rules: usize,
    /// Pairs a reviewer has already settled
    pub already_decided: usize,
    pub scored: usize,
    pub processing_errors: usize,
    pub auto_matched: usize,
    pub auto_non_matched: usize,
    pub uncertain: usize,
    pub tiebreak_sent: usize,
    /// Share of scored pairs that needed the tiebreaker
    pub tiebreak_fraction: f64,
    pub tiebreak_decided: usize,
    pub tiebreak_escalated: usize,
    pub review_enqueued: usize,
    pub edges_written: usize,
    pub clusters: usize,
    pub flagged_clusters: usize,
    pub golden: GoldenWriteSummary,
    pub golden_held_back: usize,
    pub model_version: Option<String>,
    pub bootstrapped: bool,
    pub embedding_model: Option<String>,
    pub reasoning_model: Option<String>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{} records, {} pairs: {} matched, {} non-matched, {} uncertain ({:.1}% tiebreak), {} to review | {} clusters ({} flagged), golden {} new / {} updated",
            self.records,
            self.candidate_pairs,
            self.auto_matched,
            self.auto_non_matched,
            self.uncertain,
            self.tiebreak_fraction * 100.0,
            self.review_enqueued,
            self.clusters,
            self.flagged_clusters,
            self.golden.created,
            self.golden.updated
        )
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    rules: Arc<RuleEngine>,
    models: Arc<ModelStore>,
    embedder: Option<SharedEmbeddingService>,
    reasoner: Option<SharedReasoningService>,
}

impl Pipeline {
    /// Pipeline without external services (reduced recall, no tiebreaker)
    pub fn new(config: PipelineConfig, rules: RuleEngine) -> Self {
        Pipeline {
            config,
            rules: Arc::new(rules),
            models: Arc::new(ModelStore::new()),
            embedder: None,
            reasoner: None,
        }
    }

    /// Pipeline with the services the config names
    pub fn from_config(config: PipelineConfig, rules: RuleEngine) -> anyhow::Result<Self> {
        config.validate()?;
        let embedder = from_backend(&config.services.embedding)?;
        let reasoner: Option<SharedReasoningService> = match &config.services.reasoning {
            Some(reasoning) => Some(Arc::new(HttpReasoningService::new(
                reasoning,
                config.tiebreak.timeout_ms,
            )?)),
            None => None,
        };

        Ok(Pipeline::new(config, rules)
            .with_embedding_service(embedder)
            .with_reasoning_service(reasoner))
    }

    pub fn with_embedding_service(mut self, service: Option<SharedEmbeddingService>) -> Self {
        self.embedder = service;
        self
    }

    pub fn with_reasoning_service(mut self, service: Option<SharedReasoningService>) -> Self {
        self.reasoner = service;
        self
    }

    pub fn model_store(&self) -> &Arc<ModelStore> {
        &self.models
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run once and record the outcome in `runs`, failed runs included
    pub async fn run(&self, conn: &Connection, scope: RunScope) -> Result<RunReport, PipelineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(run_id = %run_id, scope = %scope.label(), "pipeline run started");

        let mut result = self.execute(conn, &run_id, scope).await;
        if let Ok(report) = &mut result {
            report.duration_ms = clock.elapsed().as_millis() as u64;
        }

        let run = RunRecord {
            run_id: run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            scope: scope.label(),
            status: if result.is_ok() { "completed" } else { "failed" }.to_string(),
            report: result
                .as_ref()
                .ok()
                .and_then(|report| serde_json::to_value(report).ok()),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        insert_run(conn, &run)?;

        match &result {
            Ok(report) => info!(run_id = %run_id, duration_ms = report.duration_ms, "{}", report.summary()),
            Err(e) => warn!(run_id = %run_id, error = %e, "pipeline run failed"),
        }
        result
    }

    async fn execute(&self, conn: &Connection, run_id: &str, scope: RunScope) -> Result<RunReport, PipelineError> {
        let mut report = RunReport {
            run_id: run_id.to_string(),
            scope: scope.label(),
            ..Default::default()
        };

        // 1. Records
        let records = load_records(conn)?;
        report.records = records.len();
        let touched: Option<HashSet<String>> = match scope {
            RunScope::Full => None,
            RunScope::Since(since) => Some(records_ingested_since(conn, since)?.into_iter().collect()),
        };
        let in_scope = |left: &str, right: &str| {
            touched
                .as_ref()
                .map_or(true, |ids| ids.contains(left) || ids.contains(right))
        };

        // 2. Embeddings (a failure only reduces recall)
        let concurrency = &self.config.concurrency;
        let embeddings = embed_records(
            self.embedder.clone(),
            &records,
            concurrency.embedding_batch_size,
            concurrency.embedding_concurrency,
        )
        .await;
        report.embedding_model = embeddings.model.clone();

        // 3. Blocking + prefilter
        let profiles: Vec<RecordProfile> = records.iter().map(RecordProfile::from_record).collect();
        let blocker = Blocker::new(self.config.blocking.clone(), Arc::clone(&self.rules));
        let blocked = blocker.block(&records, &profiles, &embeddings);
        if blocked.is_empty_for(records.len()) {
            return Err(PipelineError::NoCandidates {
                records: records.len(),
            });
        }
        report.blocking_mode = Some(blocked.mode.clone());
        report.blocking = blocked.stats.clone();

        let settled = latest_decisions(&load_decisions(conn)?);
        let mut decisions: Vec<PairDecision> = Vec::new();
        let mut edges: Vec<ConfirmedEdge> = Vec::new();
        let mut review: Vec<ReviewItem> = Vec::new();

        for rejected in blocked
            .rejected
            .iter()
            .filter(|p| in_scope(&p.left_id, &p.right_id))
        {
            report.rejected_by_rules += 1;
            decisions.push(PairDecision {
                stage: "rule".to_string(),
                rule_id: Some(rejected.rule_id.clone()),
                verdict: Some(Verdict::NonMatch),
                ..pair_decision(run_id, &rejected.left_id, &rejected.right_id)
            });
        }

        let mut pairs: Vec<CandidatePair> = Vec::new();
        for pair in blocked.pairs {
            if !in_scope(&pair.left_id, &pair.right_id) {
                continue;
            }
            if settled.contains_key(&pair.key()) {
                report.already_decided += 1;
                continue;
            }
            pairs.push(pair);
        }
        report.candidate_pairs = pairs.len();

        // 4. Features + scores on the worker pool
        let records = Arc::new(records);
        let profiles = Arc::new(profiles);
        let embeddings = Arc::new(embeddings);

        let extracted = self
            .extract_features(&pairs, &records, &profiles, &embeddings)
            .await;
        for (pair, result) in pairs.iter_mut().zip(extracted) {
            pair.set_features(result);
        }

        if !pairs.is_empty() {
            let (model, bootstrapped) = self.ensure_model(conn, &records, &profiles, &pairs)?;
            report.bootstrapped = bootstrapped;
            report.model_version = Some(model.version.clone());
            let scored = self.score_pairs(model, &pairs).await;
            for (pair, result) in pairs.iter_mut().zip(scored) {
                if let Some(result) = result {
                    pair.set_score(result);
                }
            }
        }

        // 5. Decision policy
        let policy = DecisionPolicy::from_config(&self.config.decision);
        let mut uncertain: Vec<(&CandidatePair, &EnsembleScore)> = Vec::new();

        for pair in &pairs {
            let base = PairDecision {
                model_version: report.model_version.clone(),
                ..pair_decision(run_id, &pair.left_id, &pair.right_id)
            };
            let score = match &pair.score {
                Some(score) => score,
                None => {
                    let message = pair.failure.clone().unwrap_or_else(|| "pair was not scored".to_string());
                    report.processing_errors += 1;
                    warn!(left = %pair.left_id, right = %pair.right_id, error = %message, "pair failed, routed to review");
                    let mut item = review_item(&records, pair, ReviewReason::ProcessingError, run_id);
                    item.features = pair.features.clone();
                    item.detail = Some(message);
                    review.push(item);
                    decisions.push(PairDecision {
                        stage: "error".to_string(),
                        ..base
                    });
                    continue;
                }
            };
            report.scored += 1;
            let p = score.probability;

            match policy.decide(p) {
                Decision::AutoMatch => {
                    report.auto_matched += 1;
                    let mut edge = ConfirmedEdge::new(&pair.left_id, &pair.right_id, p, EdgeOrigin::AutoMatch);
                    edge.run_id = Some(run_id.to_string());
                    edges.push(edge);
                    decisions.push(PairDecision {
                        stage: Decision::AutoMatch.as_str().to_string(),
                        probability: Some(p),
                        verdict: Some(Verdict::Match),
                        confidence: Some(p),
                        ..base
                    });
                }
                Decision::AutoNonMatch => {
                    report.auto_non_matched += 1;
                    decisions.push(PairDecision {
                        stage: Decision::AutoNonMatch.as_str().to_string(),
                        probability: Some(p),
                        verdict: Some(Verdict::NonMatch),
                        confidence: Some(1.0 - p),
                        ..base
                    });
                }
                Decision::Uncertain => uncertain.push((pair, score)),
            }
        }
        report.uncertain = uncertain.len();

        // Tiebreak the uncertain band
        let outcomes: Vec<Option<TiebreakOutcome>> = match &self.reasoner {
            None => vec![None; uncertain.len()],
            Some(service) => {
                let tiebreaker = Arc::new(Tiebreaker::new(Arc::clone(service), self.config.tiebreak.clone()));
                report.reasoning_model = Some(tiebreaker.model_name().to_string());

                let prompts: Vec<TiebreakPrompt> = uncertain
                    .iter()
                    .map(|(pair, score)| TiebreakPrompt::new(&records[pair.left_idx], &records[pair.right_idx], score))
                    .collect();
                report.tiebreak_sent = prompts.len();

                let results = run_bounded(prompts, concurrency.tiebreak_concurrency, |prompt| {
                    let tiebreaker = Arc::clone(&tiebreaker);
                    async move { tiebreaker.resolve(&prompt).await }
                })
                .await;

                check_outage(&embeddings, Some(&tiebreaker.stats()))?;

                results
                    .into_iter()
                    .map(|result| match result {
                        Ok(outcome) => Some(outcome),
                        Err(e) => {
                            warn!(error = %e, "tiebreak worker failed");
                            Some(TiebreakOutcome::Escalated {
                                reason: EscalationReason::ServiceUnavailable,
                                votes: Vec::new(),
                            })
                        }
                    })
                    .collect()
            }
        };
        if report.scored > 0 {
            report.tiebreak_fraction = report.tiebreak_sent as f64 / report.scored as f64;
        }

        let floor = self.config.review.confidence_floor;
        for (&(pair, score), outcome) in uncertain.iter().zip(outcomes) {
            let base = PairDecision {
                probability: Some(score.probability),
                model_version: report.model_version.clone(),
                tiebreak: outcome.clone(),
                ..pair_decision(run_id, &pair.left_id, &pair.right_id)
            };
            match &outcome {
                Some(TiebreakOutcome::Decided { .. }) => report.tiebreak_decided += 1,
                Some(TiebreakOutcome::Escalated { .. }) => report.tiebreak_escalated += 1,
                None => {}
            }

            match route_uncertain(score.probability, outcome.as_ref(), floor) {
                Some(reason) => {
                    let mut item = review_item(&records, pair, reason, run_id);
                    item.probability = Some(score.probability);
                    item.features = pair.features.clone();
                    item.tiebreak = outcome;
                    review.push(item);
                    decisions.push(PairDecision {
                        stage: "review".to_string(),
                        ..base
                    });
                }
                None => {
                    if let Some((verdict, confidence)) = outcome.as_ref().and_then(TiebreakOutcome::decision) {
                        if verdict.is_match() {
                            let mut edge = ConfirmedEdge::new(
                                &pair.left_id,
                                &pair.right_id,
                                confidence,
                                EdgeOrigin::Tiebreak,
                            );
                            edge.run_id = Some(run_id.to_string());
                            edges.push(edge);
                        }
                        decisions.push(PairDecision {
                            stage: "tiebreak".to_string(),
                            verdict: Some(verdict),
                            confidence: Some(confidence),
                            ..base
                        });
                    }
                }
            }
        }

        // 6. Persist edges, decisions, review items
        {
            let tx = conn.unchecked_transaction()?;
            for edge in &edges {
                if insert_edge(&tx, edge)? {
                    report.edges_written += 1;
                }
            }
            for decision in &decisions {
                insert_pair_decision(&tx, decision)?;
            }
            tx.commit()?;
        }

        let (active, cannot_links) = active_edges(conn, &settled)?;
        let mut sizer = ComponentSizer::new(&records, &active);
        for mut item in review {
            item.cluster_size = sizer.merged_size(&item.left_id, &item.right_id);
            if enqueue_review_item(conn, &item)? {
                report.review_enqueued += 1;
            }
        }

        // 7. Cluster every persisted edge, then queue the conflicts
        let clusters = Clusterer::new().cluster(&records, &active, &cannot_links);
        report.clusters = clusters.len();

        let by_id: HashMap<String, OrganizationRecord> =
            records.iter().map(|r| (r.id.clone(), r.clone())).collect();

        for cluster in clusters.iter().filter(|c| c.is_flagged()) {
            report.flagged_clusters += 1;
            let suspect = cluster
                .suspect_edge
                .as_ref()
                .map(|e| format!("{} - {} ({:.2})", e.left_id, e.right_id, e.confidence))
                .unwrap_or_default();
            for conflict in cluster.material_conflicts() {
                let (Some(left), Some(right)) = (by_id.get(&conflict.left_id), by_id.get(&conflict.right_id)) else {
                    continue;
                };
                let members: Vec<&OrganizationRecord> =
                    cluster.members.iter().filter_map(|id| by_id.get(id)).collect();
                let mut item = ReviewItem::new(
                    &conflict.left_id,
                    &conflict.right_id,
                    ReviewReason::ClusterConflict,
                    left.updated_at.max(right.updated_at),
                );
                item.tier = members.iter().map(|r| r.tier()).min().unwrap_or(left.tier());
                item.cluster_size = cluster.members.len();
                item.run_id = Some(run_id.to_string());
                item.detail = Some(format!(
                    "{:?} conflict in cluster {} ({} members); suspect edge {}",
                    conflict.kind,
                    cluster.id,
                    cluster.members.len(),
                    suspect
                ));
                if enqueue_review_item(conn, &item)? {
                    report.review_enqueued += 1;
                }
            }
        }

        // 8. Golden records for clean clusters
        let current = current_golden_records(conn)?;
        let builder = GoldenRecordBuilder::new(&self.config.source_priority);
        let plan = builder.build_all(&clusters, &by_id, &current);
        report.golden_held_back = plan.held_back.len();
        report.golden = save_golden_plan(conn, &plan, "pipeline")?;

        Ok(report)
    }

    async fn extract_features(
        &self,
        pairs: &[CandidatePair],
        records: &Arc<Vec<OrganizationRecord>>,
        profiles: &Arc<Vec<RecordProfile>>,
        embeddings: &Arc<EmbeddingTable>,
    ) -> Vec<Result<FeatureVector, String>> {
        let batch_size = self.config.concurrency.batch_size.max(1);
        let chunks: Vec<Vec<(usize, usize)>> = pairs
            .chunks(batch_size)
            .map(|chunk| chunk.iter().map(|p| (p.left_idx, p.right_idx)).collect())
            .collect();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();

        let (records, profiles, embeddings) = (Arc::clone(records), Arc::clone(profiles), Arc::clone(embeddings));
        let results = run_blocking_bounded(chunks, self.config.concurrency.worker_limit, move |chunk| {
            let extractor = crate::features::FeatureExtractor::new();
            chunk
                .into_iter()
                .map(|(l, r)| {
                    extractor.extract((&records[l], &profiles[l]), (&records[r], &profiles[r]), &embeddings)
                })
                .collect::<Vec<_>>()
        })
        .await;

        flatten_chunks(results, &sizes)
    }

    /// One entry per pair; `None` for pairs whose extraction already failed
    async fn score_pairs(
        &self,
        model: Arc<EnsembleClassifier>,
        pairs: &[CandidatePair],
    ) -> Vec<Option<Result<EnsembleScore, String>>> {
        let batch_size = self.config.concurrency.batch_size.max(1);
        let chunks: Vec<Vec<Option<FeatureVector>>> = pairs
            .chunks(batch_size)
            .map(|chunk| chunk.iter().map(|p| p.features.clone()).collect())
            .collect();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();

        let results = run_blocking_bounded(chunks, self.config.concurrency.worker_limit, move |chunk| {
            chunk
                .into_iter()
                .map(|f| f.map(|v| model.score(&v).map_err(|e| e.to_string())))
                .collect::<Vec<_>>()
        })
        .await;

        flatten_chunks(results, &sizes)
            .into_iter()
            .map(|r| r.and_then(|inner| inner.transpose()).transpose())
            .collect()
    }

    /// The deployed model; with none stored, bootstrap one from the rules
    fn ensure_model(
        &self,
        conn: &Connection,
        records: &[OrganizationRecord],
        profiles: &[RecordProfile],
        pairs: &[CandidatePair],
    ) -> Result<(Arc<EnsembleClassifier>, bool), PipelineError> {
        if let Some(model) = self.models.snapshot() {
            model.check_schema()?;
            return Ok((model, false));
        }

        if let Some(model) = load_deployed_model(conn)? {
            model.check_schema()?;
            let model = Arc::new(model);
            self.models.deploy(Arc::clone(&model));
            return Ok((model, false));
        }

        let labelled = bootstrap_examples(&self.rules, records, profiles, pairs);
        info!(labelled = labelled.len(), "no deployed model, bootstrapping from heuristic rules");
        for example in &labelled {
            insert_training_example(conn, example)?;
        }

        let examples = load_training_examples(conn)?;
        let params = TrainingParams::from_config(&self.config.retrain);
        let retrained = self
            .models
            .retrain(&examples, &params, self.config.retrain.tolerance)?;
        save_artifact(conn, &retrained, "bootstrap")?;

        Ok((Arc::clone(&retrained.candidate), true))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn pair_decision(run_id: &str, left_id: &str, right_id: &str) -> PairDecision {
    PairDecision {
        run_id: run_id.to_string(),
        left_id: left_id.to_string(),
        right_id: right_id.to_string(),
        stage: String::new(),
        probability: None,
        rule_id: None,
        tiebreak: None,
        verdict: None,
        confidence: None,
        model_version: None,
        decided_at: Utc::now(),
    }
}

fn review_item(records: &[OrganizationRecord], pair: &CandidatePair, reason: ReviewReason, run_id: &str) -> ReviewItem {
    let (left, right) = (&records[pair.left_idx], &records[pair.right_idx]);
    let mut item = ReviewItem::new(&pair.left_id, &pair.right_id, reason, left.updated_at.max(right.updated_at));
    item.tier = left.tier().min(right.tier());
    item.run_id = Some(run_id.to_string());
    item
}

/// One result per input item; a failed chunk fails each of its items
fn flatten_chunks<R>(
    results: Vec<Result<Vec<R>, crate::workers::WorkerError>>,
    sizes: &[usize],
) -> Vec<Result<R, String>> {
    let mut out = Vec::with_capacity(sizes.iter().sum());
    for (result, &size) in results.into_iter().zip(sizes) {
        match result {
            Ok(items) => out.extend(items.into_iter().map(Ok)),
            Err(e) => {
                warn!(error = %e, size, "worker chunk failed");
                out.extend((0..size).map(|_| Err(e.to_string())));
            }
        }
    }
    out
}

/// Label candidate pairs with the bootstrap-scope rules
pub fn bootstrap_examples(
    rules: &RuleEngine,
    records: &[OrganizationRecord],
    profiles: &[RecordProfile],
    pairs: &[CandidatePair],
) -> Vec<TrainingExample> {
    pairs
        .iter()
        .filter_map(|pair| {
            let features = pair.features.as_ref()?;
            let left = (&records[pair.left_idx], &profiles[pair.left_idx]);
            let right = (&records[pair.right_idx], &profiles[pair.right_idx]);
            let outcome = rules.evaluate(left, right, RuleScope::Bootstrap)?;
            Some(TrainingExample {
                left_id: pair.left_id.clone(),
                right_id: pair.right_id.clone(),
                features: features.clone(),
                label: outcome.verdict == RuleVerdict::Match,
                source: LabelSource::Bootstrap,
            })
        })
        .collect()
}

/// Both configured services failed every call they made
pub fn check_outage(embeddings: &EmbeddingTable, tiebreak: Option<&TiebreakStats>) -> Result<(), PipelineError> {
    match tiebreak {
        Some(stats) if embeddings.all_calls_failed() && stats.all_failed() => {
            Err(PipelineError::TotalServiceOutage {
                embedding: embeddings
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "every batch failed".to_string()),
                reasoning: format!(
                    "{} of {} samples failed",
                    stats.samples_failed, stats.samples_requested
                ),
            })
        }
        _ => Ok(()),
    }
}

/// Persisted edges minus pairs a reviewer rejected, plus those rejections
/// as cannot-link constraints
fn active_edges(
    conn: &Connection,
    settled: &BTreeMap<(String, String), HumanDecision>,
) -> Result<(Vec<ConfirmedEdge>, BTreeSet<(String, String)>), PipelineError> {
    let cannot_links: BTreeSet<(String, String)> = settled
        .iter()
        .filter(|(_, d)| d.verdict == Verdict::NonMatch)
        .map(|(key, _)| key.clone())
        .collect();

    let edges = load_edges(conn)?
        .into_iter()
        .filter(|edge| {
            let (l, r) = edge.key();
            !cannot_links.contains(&(l.to_string(), r.to_string()))
        })
        .collect();

    Ok((edges, cannot_links))
}

/// Component sizes over the edge graph, for review ordering
struct ComponentSizer {
    index: HashMap<String, usize>,
    uf: UnionFind,
}

impl ComponentSizer {
    fn new(records: &[OrganizationRecord], edges: &[ConfirmedEdge]) -> Self {
        let index: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        let mut uf = UnionFind::new(records.len());
        for edge in edges {
            if let (Some(&a), Some(&b)) = (index.get(&edge.left_id), index.get(&edge.right_id)) {
                uf.union(a, b);
            }
        }
        ComponentSizer { index, uf }
    }

    fn merged_size(&mut self, left: &str, right: &str) -> usize {
        match (self.index.get(left), self.index.get(right)) {
            (Some(&a), Some(&b)) => self.uf.merged_size(a, b),
            _ => 2,
        }
    }
}

// ============================================================================
// RETRAIN
// ============================================================================

/// Scheduled retrain: skipped unless due (or forced). The candidate only
/// replaces the deployed model when it does not regress.
pub fn retrain(conn: &Connection, config: &PipelineConfig, force: bool) -> Result<Option<RetrainReport>, PipelineError> {
    let schedule = RetrainSchedule::from_config(&config.retrain);
    let last_trained = latest_artifact_time(conn)?;
    if !schedule.is_due(last_trained, Utc::now(), force) {
        info!(?last_trained, interval_days = schedule.interval_days, "retrain not due");
        return Ok(None);
    }

    let store = ModelStore::new();
    if let Some(model) = load_deployed_model(conn)? {
        store.deploy(Arc::new(model));
    }

    let examples = load_training_examples(conn)?;
    let report = store.retrain(
        &examples,
        &TrainingParams::from_config(&config.retrain),
        config.retrain.tolerance,
    )?;
    save_artifact(conn, &report, "retrain")?;
    Ok(Some(report))
}

// ============================================================================
// TESTS
// ============================================================================
