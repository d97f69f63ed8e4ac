// 🧱 Blocker - Candidate pair generation
//
// Comparing every record with every other is n²; blocking only pairs records
// that share at least one key (phonetic code, name prefix, distinctive token,
// acronym, domain, registry id, or an embedding LSH bucket). Obvious
// non-matches are then dropped by the Tier-1 prefilter rules.

use crate::classifier::EnsembleScore;
use crate::config::BlockingConfig;
use crate::embedding::{cosine_similarity, EmbeddingTable};
use crate::features::FeatureVector;
use crate::normalize::{acronym_key, is_distinctive_token};
use crate::record::{OrganizationRecord, RecordProfile};
use crate::rules::RuleEngine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// BLOCKING KEYS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingKeyKind {
    Phonetic,
    NamePrefix,
    Token,
    Acronym,
    Domain,
    ExternalId,
    Embedding,
}

impl BlockingKeyKind {
    /// Fuzzy keys can produce huge blocks and are capped; exact ones never are
    pub fn is_fuzzy(&self) -> bool {
        !matches!(self, BlockingKeyKind::Domain | BlockingKeyKind::ExternalId)
    }
}

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// Two records worth comparing (left_id < right_id)
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub left_id: String,
    pub right_id: String,
    /// Positions in the run's record slice
    pub left_idx: usize,
    pub right_idx: usize,
    pub keys: BTreeSet<BlockingKeyKind>,
    /// Filled by feature extraction
    pub features: Option<FeatureVector>,
    /// Filled by the classifier
    pub score: Option<EnsembleScore>,
    /// Why extraction or scoring failed; the pair goes to review
    pub failure: Option<String>,
}

impl CandidatePair {
    pub fn new(records: &[OrganizationRecord], i: usize, j: usize) -> Self {
        let (left_idx, right_idx) = if records[i].id <= records[j].id {
            (i, j)
        } else {
            (j, i)
        };
        CandidatePair {
            left_id: records[left_idx].id.clone(),
            right_id: records[right_idx].id.clone(),
            left_idx,
            right_idx,
            keys: BTreeSet::new(),
            features: None,
            score: None,
            failure: None,
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.left_id.clone(), self.right_id.clone())
    }

    pub fn set_features(&mut self, result: Result<FeatureVector, String>) {
        match result {
            Ok(features) => self.features = Some(features),
            Err(message) => self.failure = Some(message),
        }
    }

    pub fn set_score(&mut self, result: Result<EnsembleScore, String>) {
        match result {
            Ok(score) => self.score = Some(score),
            Err(message) => self.failure = Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedPair {
    pub left_id: String,
    pub right_id: String,
    pub rule_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BlockingMode {
    Full,
    /// Embedding keys unavailable; lexical keys only
    ReducedRecall { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockingStats {
    pub records: usize,
    pub total_possible_pairs: u64,
    pub candidate_pairs: usize,
    pub rejected_pairs: usize,
    pub skipped_blocks: usize,
    /// 1 - compared / possible
    pub reduction_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct BlockingOutput {
    pub pairs: Vec<CandidatePair>,
    pub rejected: Vec<RejectedPair>,
    pub mode: BlockingMode,
    pub stats: BlockingStats,
}

impl BlockingOutput {
    /// Nothing to compare although there were records to compare
    pub fn is_empty_for(&self, records: usize) -> bool {
        records >= 2 && self.pairs.is_empty() && self.rejected.is_empty()
    }
}

// ============================================================================
// LSH (random hyperplanes, banded)
// ============================================================================

struct HyperplaneLsh {
    /// tables × bits hyperplanes, each `dimension` long
    planes: Vec<Vec<Vec<f32>>>,
}

impl HyperplaneLsh {
    fn new(dimension: usize, bits: usize, tables: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let planes = (0..tables)
            .map(|_| {
                (0..bits)
                    .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
                    .collect()
            })
            .collect();
        HyperplaneLsh { planes }
    }

    fn signatures(&self, vector: &[f32]) -> Vec<u64> {
        self.planes
            .iter()
            .map(|table| {
                table.iter().enumerate().fold(0u64, |sig, (bit, plane)| {
                    let dot: f32 = plane.iter().zip(vector).map(|(p, v)| p * v).sum();
                    if dot >= 0.0 {
                        sig | (1u64 << bit)
                    } else {
                        sig
                    }
                })
            })
            .collect()
    }
}

// ============================================================================
// BLOCKER
// ============================================================================

pub struct Blocker {
    config: BlockingConfig,
    rules: Arc<RuleEngine>,
}

impl Blocker {
    pub fn new(config: BlockingConfig, rules: Arc<RuleEngine>) -> Self {
        Blocker { config, rules }
    }

    /// Lexical keys for one record
    fn record_keys(&self, record: &OrganizationRecord, profile: &RecordProfile) -> Vec<(BlockingKeyKind, String)> {
        let mut keys = Vec::new();

        if let Some(code) = profile.phonetic.first() {
            keys.push((BlockingKeyKind::Phonetic, code.clone()));
        }

        if profile.squashed_name.chars().count() >= self.config.prefix_len {
            let prefix: String = profile.squashed_name.chars().take(self.config.prefix_len).collect();
            keys.push((BlockingKeyKind::NamePrefix, prefix));
        }

        for token in profile.token_set.iter().filter(|t| is_distinctive_token(t)) {
            keys.push((BlockingKeyKind::Token, token.clone()));
        }

        if let Some(acronym) = acronym_key(&profile.normalized_name) {
            keys.push((BlockingKeyKind::Acronym, acronym));
        }

        if let Some(domain) = &profile.domain {
            keys.push((BlockingKeyKind::Domain, domain.clone()));
        }

        if let Some(id) = &profile.external_id {
            keys.push((BlockingKeyKind::ExternalId, id.clone()));
        }

        debug!(record_id = %record.id, keys = keys.len(), "blocking keys");
        keys
    }

    /// Generate and prefilter candidate pairs
    pub fn block(
        &self,
        records: &[OrganizationRecord],
        profiles: &[RecordProfile],
        embeddings: &EmbeddingTable,
    ) -> BlockingOutput {
        let n = records.len();
        let mut blocks: BTreeMap<(BlockingKeyKind, String), Vec<usize>> = BTreeMap::new();

        for (idx, (record, profile)) in records.iter().zip(profiles).enumerate() {
            for key in self.record_keys(record, profile) {
                blocks.entry(key).or_default().push(idx);
            }
        }

        // Embedding buckets
        let mode = match embeddings.degraded_reason() {
            Some(reason) => {
                warn!(%reason, "blocking in reduced-recall mode");
                BlockingMode::ReducedRecall { reason }
            }
            None => BlockingMode::Full,
        };

        let dimension = records
            .iter()
            .find_map(|r| embeddings.name(&r.id).map(|v| v.len()))
            .unwrap_or(0);
        if dimension > 0 {
            let lsh = HyperplaneLsh::new(
                dimension,
                self.config.lsh_bits,
                self.config.lsh_tables,
                self.config.lsh_seed,
            );
            for (idx, record) in records.iter().enumerate() {
                if let Some(vector) = embeddings.name(&record.id) {
                    if vector.len() != dimension {
                        continue;
                    }
                    for (table, sig) in lsh.signatures(vector).into_iter().enumerate() {
                        blocks
                            .entry((BlockingKeyKind::Embedding, format!("{}:{:x}", table, sig)))
                            .or_default()
                            .push(idx);
                    }
                }
            }
        }

        // Pairs from blocks
        let mut pair_keys: BTreeMap<(usize, usize), BTreeSet<BlockingKeyKind>> = BTreeMap::new();
        let mut skipped_blocks = 0;

        for ((kind, value), members) in &blocks {
            if members.len() < 2 {
                continue;
            }
            if kind.is_fuzzy() && members.len() > self.config.max_block_size {
                warn!(
                    kind = ?kind,
                    key = %value,
                    size = members.len(),
                    max = self.config.max_block_size,
                    "skipping oversized block"
                );
                skipped_blocks += 1;
                continue;
            }

            for (pos, &i) in members.iter().enumerate() {
                for &j in &members[pos + 1..] {
                    if i == j {
                        continue;
                    }
                    if *kind == BlockingKeyKind::Embedding {
                        let similar = match (embeddings.name(&records[i].id), embeddings.name(&records[j].id)) {
                            (Some(a), Some(b)) => cosine_similarity(a, b)
                                .map_or(false, |c| c >= self.config.embedding_cosine_threshold),
                            _ => false,
                        };
                        if !similar {
                            continue;
                        }
                    }
                    pair_keys.entry((i.min(j), i.max(j))).or_default().insert(*kind);
                }
            }
        }

        // Tier-1 prefilter
        let mut pairs = Vec::new();
        let mut rejected = Vec::new();
        for ((i, j), keys) in pair_keys {
            let mut pair = CandidatePair::new(records, i, j);
            pair.keys = keys;

            let left = (&records[pair.left_idx], &profiles[pair.left_idx]);
            let right = (&records[pair.right_idx], &profiles[pair.right_idx]);
            match self.rules.reject(left, right) {
                Some(rule_id) => rejected.push(RejectedPair {
                    left_id: pair.left_id,
                    right_id: pair.right_id,
                    rule_id,
                }),
                None => pairs.push(pair),
            }
        }

        let total_possible_pairs = (n as u64) * (n as u64).saturating_sub(1) / 2;
        let compared = (pairs.len() + rejected.len()) as f64;
        let reduction_ratio = if total_possible_pairs == 0 {
            0.0
        } else {
            1.0 - compared / total_possible_pairs as f64
        };

        let stats = BlockingStats {
            records: n,
            total_possible_pairs,
            candidate_pairs: pairs.len(),
            rejected_pairs: rejected.len(),
            skipped_blocks,
            reduction_ratio,
        };

        info!(
            records = n,
            candidates = stats.candidate_pairs,
            rejected = stats.rejected_pairs,
            skipped_blocks,
            reduction_ratio = format!("{:.3}", reduction_ratio),
            "blocking complete"
        );

        BlockingOutput {
            pairs,
            rejected,
            mode,
            stats,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
