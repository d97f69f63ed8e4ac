// LPxGP Resolver - Core Library
// Entity resolution for LP/GP organization records, shared by the CLI,
// review server, and tests

pub mod error;
pub mod normalize;
pub mod record;
pub mod config;
pub mod rules;          // Heuristic rules: prefilter + bootstrap labels
pub mod data_quality;   // Row validation before ingestion
pub mod workers;        // Bounded worker pool
pub mod embedding;      // Embedding services + name/mandate vectors
pub mod features;
pub mod blocking;
pub mod classifier;     // Stacked ensemble, training, model store
pub mod tiebreak;       // Self-consistency voting over a reasoning service
pub mod review;
pub mod cluster;
pub mod golden;
pub mod db;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{ClassifierError, ConfigError, IngestError, PipelineError, ServiceError, TrainingError};
pub use record::{DataSource, EntityTier, OrgType, OrganizationRecord, PartyRole, RecordProfile};
pub use rules::{RuleEngine, RuleScope, RuleVerdict};
pub use blocking::{Blocker, BlockingMode, CandidatePair};
pub use classifier::{Decision, DecisionPolicy, EnsembleClassifier, EnsembleScore, ModelStore};
pub use tiebreak::{TiebreakOutcome, Tiebreaker, Verdict};
pub use review::{HumanDecision, ReviewItem, ReviewQueue, ReviewReason};
pub use cluster::{Clusterer, ConfirmedEdge, EdgeOrigin, EntityCluster};
pub use golden::{GoldenRecord, GoldenRecordBuilder};
pub use db::{open, setup_database, Event};
pub use pipeline::{Pipeline, RunReport, RunScope};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
