// ⚖️ Tiebreaker - Self-consistency voting over a reasoning service
//
// Pairs in the uncertain band get `samples` independent judgements. A
// decision needs a strict majority of the samples asked for; anything else
// escalates to a human instead of guessing.

use crate::classifier::EnsembleScore;
use crate::config::{ReasoningConfig, TiebreakConfig};
use crate::embedding::classify_reqwest_error;
use crate::error::ServiceError;
use crate::record::OrganizationRecord;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// VERDICTS + VOTES
// ============================================================================

/// A settled answer for a pair, from the tiebreaker or a reviewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    NonMatch,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Match => "match",
            Verdict::NonMatch => "non_match",
        }
    }

    pub fn parse(raw: &str) -> Option<Verdict> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "match" | "same" | "yes" => Some(Verdict::Match),
            "non_match" | "nonmatch" | "no_match" | "different" | "no" => Some(Verdict::NonMatch),
            _ => None,
        }
    }

    pub fn is_match(&self) -> bool {
        *self == Verdict::Match
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    Match,
    NonMatch,
    Unsure,
}

impl Vote {
    fn verdict(&self) -> Option<Verdict> {
        match self {
            Vote::Match => Some(Verdict::Match),
            Vote::NonMatch => Some(Verdict::NonMatch),
            Vote::Unsure => None,
        }
    }
}

/// One sample's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub vote: Vote,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Samples answered but no side won a majority
    NoMajority,
    /// No majority and every failed sample timed out
    TimedOut,
    ServiceUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TiebreakOutcome {
    Decided {
        decision: Verdict,
        /// Share of requested samples that voted for `decision`
        confidence: f64,
        votes: Vec<Vote>,
        supporting_evidence: Vec<String>,
        opposing_evidence: Vec<String>,
    },
    Escalated {
        reason: EscalationReason,
        votes: Vec<Vote>,
    },
}

impl TiebreakOutcome {
    pub fn decision(&self) -> Option<(Verdict, f64)> {
        match self {
            TiebreakOutcome::Decided {
                decision,
                confidence,
                ..
            } => Some((*decision, *confidence)),
            TiebreakOutcome::Escalated { .. } => None,
        }
    }
}

/// Count votes against the number of samples requested. Failed samples
/// abstain, so they can cost a majority but never supply one.
pub fn tally(samples: usize, results: Vec<Result<Judgement, ServiceError>>) -> TiebreakOutcome {
    let samples = samples.max(1);
    let mut judgements = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(j) => judgements.push(j),
            Err(e) => failures.push(e),
        }
    }
    let votes: Vec<Vote> = judgements.iter().map(|j| j.vote).collect();

    for verdict in [Verdict::Match, Verdict::NonMatch] {
        let count = votes.iter().filter(|v| v.verdict() == Some(verdict)).count();
        if count * 2 > samples {
            let (supporting, opposing): (Vec<&Judgement>, Vec<&Judgement>) = judgements
                .iter()
                .partition(|j| j.vote.verdict() == Some(verdict));
            return TiebreakOutcome::Decided {
                decision: verdict,
                confidence: count as f64 / samples as f64,
                votes,
                supporting_evidence: supporting.iter().flat_map(|j| j.evidence.clone()).collect(),
                opposing_evidence: opposing.iter().flat_map(|j| j.evidence.clone()).collect(),
            };
        }
    }

    let reason = if failures.is_empty() {
        EscalationReason::NoMajority
    } else if failures.iter().all(|e| e.is_timeout()) {
        EscalationReason::TimedOut
    } else {
        EscalationReason::ServiceUnavailable
    };
    TiebreakOutcome::Escalated { reason, votes }
}

// ============================================================================
// PROMPT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TiebreakPrompt {
    pub left_id: String,
    pub right_id: String,
    pub left: String,
    pub right: String,
    pub probability: f64,
}

impl TiebreakPrompt {
    pub fn new(left: &OrganizationRecord, right: &OrganizationRecord, score: &EnsembleScore) -> Self {
        TiebreakPrompt {
            left_id: left.id.clone(),
            right_id: right.id.clone(),
            left: left.summary(),
            right: right.summary(),
            probability: score.probability,
        }
    }

    pub fn render(&self) -> String {
        format!(
            "Do these two records describe the same real-world organization?\n\n\
             Record A: {}\nRecord B: {}\n\n\
             A statistical matcher estimates a match probability of {:.2}.\n\
             Watch for sibling entities (e.g. two state pension plans with similar names) \
             and abbreviations of the same entity.\n\
             Answer with JSON: {{\"verdict\": \"MATCH\" | \"NON_MATCH\" | \"UNSURE\", \"evidence\": [\"...\"]}}",
            self.left, self.right, self.probability
        )
    }
}

// ============================================================================
// REASONING SERVICE
// ============================================================================

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// One independent judgement; `sample` distinguishes self-consistency draws
    async fn judge(&self, prompt: &TiebreakPrompt, sample: usize) -> Result<Judgement, ServiceError>;

    fn model_name(&self) -> &str;
}

pub type SharedReasoningService = Arc<dyn ReasoningService>;

/// OpenAI-compatible chat completions with a JSON verdict
pub struct HttpReasoningService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    timeout_ms: u64,
}

const SYSTEM_PROMPT: &str = "You resolve duplicate organization records for a private markets \
database of fund managers (GPs) and institutional investors (LPs). Be strict: different \
entities with similar names are common. Reply with a single JSON object.";

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct VerdictPayload {
    verdict: String,
    #[serde(default)]
    evidence: Vec<String>,
}

impl HttpReasoningService {
    pub fn new(config: &ReasoningConfig, timeout_ms: u64) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(HttpReasoningService {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_ms,
        })
    }
}

/// Parse the model's JSON verdict
pub fn parse_judgement(content: &str) -> Result<Judgement, ServiceError> {
    let bad = |message: String| ServiceError::BadResponse {
        service: "reasoning".to_string(),
        message,
    };

    // Some models wrap JSON in prose or code fences
    let object = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) => content.get(start..=end),
        _ => None,
    };
    let object = object.ok_or_else(|| bad("no JSON object in reply".to_string()))?;
    let payload: VerdictPayload = serde_json::from_str(object)
        .map_err(|e| bad(format!("invalid verdict JSON: {}", e)))?;

    let vote = match payload.verdict.trim().to_uppercase().replace('-', "_").as_str() {
        "MATCH" => Vote::Match,
        "NON_MATCH" | "NONMATCH" | "NO_MATCH" => Vote::NonMatch,
        "UNSURE" | "UNKNOWN" => Vote::Unsure,
        other => return Err(bad(format!("unknown verdict '{}'", other))),
    };
    Ok(Judgement {
        vote,
        evidence: payload.evidence,
    })
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn judge(&self, prompt: &TiebreakPrompt, sample: usize) -> Result<Judgement, ServiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": prompt.render()}
                ],
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
                "response_format": {"type": "json_object"},
                "user": format!("tiebreak-{}-{}-{}", prompt.left_id, prompt.right_id, sample)
            }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| classify_reqwest_error("reasoning", self.timeout_ms, e))?
            .json::<ChatResponse>()
            .await
            .map_err(|e| classify_reqwest_error("reasoning", self.timeout_ms, e))?;

        let content = response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ServiceError::BadResponse {
                service: "reasoning".to_string(),
                message: "no choices in reply".to_string(),
            })?;
        parse_judgement(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// TIEBREAKER
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TiebreakStats {
    pub samples_requested: usize,
    pub samples_failed: usize,
}

impl TiebreakStats {
    pub fn all_failed(&self) -> bool {
        self.samples_requested > 0 && self.samples_failed == self.samples_requested
    }
}

pub struct Tiebreaker {
    service: SharedReasoningService,
    config: TiebreakConfig,
    requested: AtomicUsize,
    failed: AtomicUsize,
}

impl Tiebreaker {
    pub fn new(service: SharedReasoningService, config: TiebreakConfig) -> Self {
        Tiebreaker {
            service,
            config,
            requested: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn model_name(&self) -> &str {
        self.service.model_name()
    }

    pub fn stats(&self) -> TiebreakStats {
        TiebreakStats {
            samples_requested: self.requested.load(Ordering::Relaxed),
            samples_failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub async fn resolve(&self, prompt: &TiebreakPrompt) -> TiebreakOutcome {
        let samples = self.config.samples.max(1);
        let results = join_all((0..samples).map(|i| self.sample(prompt, i))).await;

        self.requested.fetch_add(samples, Ordering::Relaxed);
        self.failed
            .fetch_add(results.iter().filter(|r| r.is_err()).count(), Ordering::Relaxed);

        let outcome = tally(samples, results);
        debug!(left = %prompt.left_id, right = %prompt.right_id, ?outcome, "tiebreak resolved");
        outcome
    }

    /// One sample with a per-call timeout and linear backoff between attempts
    async fn sample(&self, prompt: &TiebreakPrompt, sample: usize) -> Result<Judgement, ServiceError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, self.service.judge(prompt, sample)).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout {
                    service: "reasoning".to_string(),
                    timeout_ms: self.config.timeout_ms,
                }),
            };

            match result {
                Ok(judgement) => return Ok(judgement),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        left = %prompt.left_id,
                        right = %prompt.right_id,
                        sample,
                        attempt,
                        error = %e,
                        "tiebreak call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.backoff_ms * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
