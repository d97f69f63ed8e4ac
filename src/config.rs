// ⚙️ Pipeline Configuration - Thresholds, limits and service endpoints
//
// Loaded from JSON; every section has defaults so a partial (or missing)
// file is fine. Secrets never live here: services name the environment
// variable that holds their key.

use crate::error::ConfigError;
use crate::record::DataSource;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// p > match_threshold → auto-match
    pub match_threshold: f64,
    /// p < non_match_threshold → auto-non-match
    pub non_match_threshold: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            match_threshold: 0.8,
            non_match_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingConfig {
    pub prefix_len: usize,
    /// Fuzzy blocks above this size are skipped
    pub max_block_size: usize,
    pub lsh_bits: usize,
    pub lsh_tables: usize,
    pub lsh_seed: u64,
    /// LSH bucket-mates must clear this cosine to become candidates
    pub embedding_cosine_threshold: f64,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        BlockingConfig {
            prefix_len: 3,
            max_block_size: 200,
            lsh_bits: 12,
            lsh_tables: 6,
            lsh_seed: 7,
            embedding_cosine_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Parallel feature/scoring chunks
    pub worker_limit: usize,
    pub embedding_concurrency: usize,
    /// In-flight tiebreak pairs (external rate limit)
    pub tiebreak_concurrency: usize,
    /// Pairs per scoring chunk
    pub batch_size: usize,
    /// Texts per embedding request
    pub embedding_batch_size: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        ConcurrencyConfig {
            worker_limit: 8,
            embedding_concurrency: 4,
            tiebreak_concurrency: 4,
            batch_size: 256,
            embedding_batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiebreakConfig {
    /// Independent samples per pair (self-consistency)
    pub samples: usize,
    pub timeout_ms: u64,
    pub max_attempts: usize,
    /// Linear backoff step between attempts
    pub backoff_ms: u64,
}

impl Default for TiebreakConfig {
    fn default() -> Self {
        TiebreakConfig {
            samples: 3,
            timeout_ms: 20_000,
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Tiebreak decisions below this confidence still go to a human
    pub confidence_floor: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        ReviewConfig {
            confidence_floor: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainConfig {
    pub interval_days: i64,
    /// Candidate F1 may trail the deployed F1 by at most this much
    pub tolerance: f64,
    pub folds: usize,
    pub seed: u64,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        RetrainConfig {
            interval_days: 30,
            tolerance: 0.01,
            folds: 5,
            seed: 42,
        }
    }
}

// ============================================================================
// EXTERNAL SERVICES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Local character n-gram hashing (no network)
    Hashing { dimension: usize },

    /// OpenAI-compatible /embeddings endpoint
    Http {
        base_url: String,
        model: String,
        api_key_env: String,
        #[serde(default = "default_service_timeout_ms")]
        timeout_ms: u64,
    },

    /// No embeddings: blocking runs in reduced-recall mode
    Disabled,
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        EmbeddingBackend::Hashing { dimension: 256 }
    }
}

fn default_service_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// OpenAI-compatible base URL (".../v1")
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    400
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub embedding: EmbeddingBackend,
    /// None = no tiebreaker; uncertain pairs go straight to review
    pub reasoning: Option<ReasoningConfig>,
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub decision: DecisionConfig,
    pub blocking: BlockingConfig,
    pub concurrency: ConcurrencyConfig,
    pub tiebreak: TiebreakConfig,
    pub review: ReviewConfig,
    pub retrain: RetrainConfig,
    /// Highest priority first
    pub source_priority: Vec<DataSource>,
    pub services: ServicesConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            decision: DecisionConfig::default(),
            blocking: BlockingConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            tiebreak: TiebreakConfig::default(),
            review: ReviewConfig::default(),
            retrain: RetrainConfig::default(),
            source_priority: DataSource::ALL.to_vec(),
            services: ServicesConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from JSON; a missing file means defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(PipelineConfig::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: PipelineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.decision;
        if !(0.0..=1.0).contains(&d.non_match_threshold)
            || !(0.0..=1.0).contains(&d.match_threshold)
            || d.non_match_threshold >= d.match_threshold
        {
            return Err(ConfigError::Thresholds {
                non_match: d.non_match_threshold,
                matched: d.match_threshold,
            });
        }

        let limits: [(&'static str, usize); 10] = [
            ("blocking.prefix_len", self.blocking.prefix_len),
            ("blocking.max_block_size", self.blocking.max_block_size),
            ("blocking.lsh_bits", self.blocking.lsh_bits),
            ("blocking.lsh_tables", self.blocking.lsh_tables),
            ("concurrency.worker_limit", self.concurrency.worker_limit),
            ("concurrency.embedding_concurrency", self.concurrency.embedding_concurrency),
            ("concurrency.tiebreak_concurrency", self.concurrency.tiebreak_concurrency),
            ("concurrency.batch_size", self.concurrency.batch_size),
            ("concurrency.embedding_batch_size", self.concurrency.embedding_batch_size),
            ("tiebreak.samples", self.tiebreak.samples),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.tiebreak.max_attempts == 0 {
            return Err(ConfigError::Zero { field: "tiebreak.max_attempts" });
        }
        if self.tiebreak.timeout_ms == 0 {
            return Err(ConfigError::Zero { field: "tiebreak.timeout_ms" });
        }
        if self.retrain.folds < 2 {
            return Err(ConfigError::Zero { field: "retrain.folds" });
        }
        if self.retrain.interval_days <= 0 {
            return Err(ConfigError::Zero { field: "retrain.interval_days" });
        }
        if self.blocking.lsh_bits > 64 {
            return Err(ConfigError::OutOfRange {
                field: "blocking.lsh_bits",
                value: self.blocking.lsh_bits as f64,
            });
        }

        let fractions: [(&'static str, f64); 3] = [
            ("blocking.embedding_cosine_threshold", self.blocking.embedding_cosine_threshold),
            ("review.confidence_floor", self.review.confidence_floor),
            ("retrain.tolerance", self.retrain.tolerance),
        ];
        for (field, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }

        let mut priority = self.source_priority.clone();
        priority.sort();
        priority.dedup();
        if priority.len() != self.source_priority.len()
            || priority.len() != DataSource::ALL.len()
        {
            return Err(ConfigError::SourcePriority);
        }

        if let EmbeddingBackend::Hashing { dimension } = self.services.embedding {
            if dimension == 0 {
                return Err(ConfigError::Zero { field: "services.embedding.dimension" });
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.decision.match_threshold, 0.8);
        assert_eq!(config.decision.non_match_threshold, 0.3);
        assert_eq!(config.tiebreak.samples, 3);
        assert_eq!(config.retrain.interval_days, 30);
        assert_eq!(config.source_priority[0], DataSource::ManualEntry);
        assert!(config.services.reasoning.is_none());
    }

    #[test]
    fn test_thresholds_must_be_ordered() {
        let mut config = PipelineConfig::default();
        config.decision.non_match_threshold = 0.9;
        assert!(matches!(config.validate(), Err(ConfigError::Thresholds { .. })));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = PipelineConfig::default();
        config.concurrency.worker_limit = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero { field: "concurrency.worker_limit" })
        );
    }

    #[test]
    fn test_priority_table_must_be_complete() {
        let mut config = PipelineConfig::default();
        config.source_priority = vec![DataSource::ManualEntry, DataSource::ManualEntry];
        assert_eq!(config.validate(), Err(ConfigError::SourcePriority));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "decision": {{ "match_threshold": 0.9 }},
                "services": {{
                    "embedding": {{ "kind": "disabled" }},
                    "reasoning": {{
                        "base_url": "http://localhost:8000/v1",
                        "model": "judge",
                        "api_key_env": "JUDGE_API_KEY"
                    }}
                }}
            }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.decision.match_threshold, 0.9);
        assert_eq!(config.decision.non_match_threshold, 0.3);
        assert_eq!(config.services.embedding, EmbeddingBackend::Disabled);
        let reasoning = config.services.reasoning.unwrap();
        assert_eq!(reasoning.temperature, 0.7);
        assert_eq!(config.concurrency.batch_size, 256);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = PipelineConfig::from_file("/nonexistent/resolver.json").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }
}
