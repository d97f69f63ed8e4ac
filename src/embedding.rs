// 🧭 Embeddings - Dense vectors for names and mandates
//
// Two backends: an OpenAI-compatible HTTP service and a local hashing
// embedder (character trigrams). The pipeline only sees the trait and the
// per-run EmbeddingTable; when the service is down the table says so and
// blocking drops to reduced recall.

use crate::config::EmbeddingBackend;
use crate::error::ServiceError;
use crate::normalize::normalize_name;
use crate::record::OrganizationRecord;
use crate::workers::run_bounded;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Trait for text embedding services
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a batch of texts, one vector per input, same order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, ServiceError>;

    /// Model identifier for logs and run reports
    fn model_name(&self) -> &str;
}

/// Shared embedder type for use across workers
pub type SharedEmbeddingService = Arc<dyn EmbeddingService>;

/// Build the configured backend; None when embeddings are disabled
pub fn from_backend(backend: &EmbeddingBackend) -> Result<Option<SharedEmbeddingService>> {
    match backend {
        EmbeddingBackend::Disabled => Ok(None),
        EmbeddingBackend::Hashing { dimension } => {
            Ok(Some(Arc::new(HashingEmbedder::new(*dimension))))
        }
        EmbeddingBackend::Http {
            base_url,
            model,
            api_key_env,
            timeout_ms,
        } => {
            let api_key = std::env::var(api_key_env)
                .map_err(|_| anyhow!("{} environment variable not set", api_key_env))?;
            Ok(Some(Arc::new(HttpEmbeddingService::new(
                base_url, model, api_key, *timeout_ms,
            )?)))
        }
    }
}

// ============================================================================
// HTTP BACKEND (OpenAI-compatible /embeddings)
// ============================================================================

pub struct HttpEmbeddingService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl HttpEmbeddingService {
    pub fn new(base_url: &str, model: &str, api_key: String, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(HttpEmbeddingService {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            timeout_ms,
        })
    }
}

/// Map a transport error onto the service taxonomy
pub(crate) fn classify_reqwest_error(
    service: &str,
    timeout_ms: u64,
    err: reqwest::Error,
) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout {
            service: service.to_string(),
            timeout_ms,
        }
    } else if let Some(status) = err.status() {
        ServiceError::Status {
            service: service.to_string(),
            status: status.as_u16(),
        }
    } else if err.is_decode() {
        ServiceError::BadResponse {
            service: service.to_string(),
            message: err.to_string(),
        }
    } else {
        ServiceError::Unavailable {
            service: service.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts
            }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| classify_reqwest_error("embedding", self.timeout_ms, e))?
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| classify_reqwest_error("embedding", self.timeout_ms, e))?;

        if response.data.len() != texts.len() {
            return Err(ServiceError::BadResponse {
                service: "embedding".to_string(),
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    response.data.len()
                ),
            });
        }

        // Sort by index to maintain order
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// LOCAL BACKEND (hashed character trigrams)
// ============================================================================

/// Deterministic bag-of-trigrams embedder; no network, no model files
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        HashingEmbedder {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        let normalized = normalize_name(text);

        for word in normalized.split_whitespace() {
            let padded: Vec<char> = format!(" {} ", word).chars().collect();
            for gram in padded.windows(3) {
                let mut hasher = DefaultHasher::new();
                gram.hash(&mut hasher);
                let h = hasher.finish();
                let slot = (h % self.dimension as u64) as usize;
                // Sign bit halves collision bias
                let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
                vector[slot] += sign;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingService for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, ServiceError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn model_name(&self) -> &str {
        "hashing-trigram"
    }
}

// ============================================================================
// SIMILARITY
// ============================================================================

/// Cosine similarity clipped to [0, 1]; None for empty/zero/mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    let cos = dot / (na * nb);
    if cos.is_finite() {
        Some(cos.clamp(0.0, 1.0))
    } else {
        None
    }
}

// ============================================================================
// EMBEDDING TABLE (per run)
// ============================================================================

/// Name and mandate vectors keyed by record id, plus how the calls went
#[derive(Debug, Clone, Default)]
pub struct EmbeddingTable {
    pub names: HashMap<String, Embedding>,
    pub mandates: HashMap<String, Embedding>,
    pub model: Option<String>,
    pub total_batches: usize,
    pub failed_batches: usize,
    pub last_error: Option<String>,
    configured: bool,
}

impl EmbeddingTable {
    /// No embedding service configured
    pub fn disabled() -> Self {
        EmbeddingTable::default()
    }

    pub fn name(&self, record_id: &str) -> Option<&Embedding> {
        self.names.get(record_id)
    }

    pub fn mandate(&self, record_id: &str) -> Option<&Embedding> {
        self.mandates.get(record_id)
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// A configured service that failed every call
    pub fn all_calls_failed(&self) -> bool {
        self.configured && self.total_batches > 0 && self.failed_batches == self.total_batches
    }

    /// Why name-embedding blocking is degraded (None = full recall)
    pub fn degraded_reason(&self) -> Option<String> {
        if !self.configured {
            return Some("embedding service not configured".to_string());
        }
        if self.failed_batches == 0 {
            return None;
        }
        Some(format!(
            "{} of {} embedding batches failed: {}",
            self.failed_batches,
            self.total_batches,
            self.last_error.as_deref().unwrap_or("unknown error")
        ))
    }
}

/// Embed every record name (and mandate, where present) in bounded batches
pub async fn embed_records(
    service: Option<SharedEmbeddingService>,
    records: &[OrganizationRecord],
    batch_size: usize,
    concurrency: usize,
) -> EmbeddingTable {
    let service = match service {
        Some(service) => service,
        None => {
            info!("no embedding service configured");
            return EmbeddingTable::disabled();
        }
    };

    let mut table = EmbeddingTable {
        model: Some(service.model_name().to_string()),
        configured: true,
        ..Default::default()
    };

    // (is_mandate, record_id, text)
    let mut jobs: Vec<(bool, String, String)> = records
        .iter()
        .map(|r| (false, r.id.clone(), r.name.clone()))
        .collect();
    jobs.extend(
        records
            .iter()
            .filter_map(|r| r.mandate.as_ref().map(|m| (true, r.id.clone(), m.clone()))),
    );

    let batches: Vec<Vec<(bool, String, String)>> = jobs
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();
    table.total_batches = batches.len();

    let results = run_bounded(batches, concurrency, |batch| {
        let service = service.clone();
        async move {
            let texts: Vec<String> = batch.iter().map(|(_, _, text)| text.clone()).collect();
            let outcome = service.embed_batch(&texts).await;
            (batch, outcome)
        }
    })
    .await;

    for result in results {
        match result {
            Ok((batch, Ok(vectors))) => {
                for ((is_mandate, id, _), vector) in batch.into_iter().zip(vectors) {
                    if is_mandate {
                        table.mandates.insert(id, vector);
                    } else {
                        table.names.insert(id, vector);
                    }
                }
            }
            Ok((batch, Err(err))) => {
                warn!(error = %err, batch_len = batch.len(), "embedding batch failed");
                table.failed_batches += 1;
                table.last_error = Some(err.to_string());
            }
            Err(err) => {
                warn!(error = %err, "embedding worker failed");
                table.failed_batches += 1;
                table.last_error = Some(err.to_string());
            }
        }
    }

    debug!(
        names = table.names.len(),
        mandates = table.mandates.len(),
        failed_batches = table.failed_batches,
        "embedding complete"
    );
    table
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DataSource;

    /// Service that always fails (outage simulation)
    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingService for DownEmbedder {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Embedding>, ServiceError> {
            Err(ServiceError::Unavailable {
                service: "embedding".to_string(),
                message: "connection refused".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "down"
        }
    }

    fn create_test_records() -> Vec<OrganizationRecord> {
        let mut a = OrganizationRecord::new("Blackstone Group", DataSource::BulkImport);
        a.mandate = Some("Large-cap buyouts in North America".to_string());
        let b = OrganizationRecord::new("Blackstone", DataSource::ManualEntry);
        let c = OrganizationRecord::new("Norges Bank Investment Management", DataSource::PartnerFeed);
        vec![a, b, c]
    }

    #[test]
    fn test_hashing_embedder_is_normalized_and_deterministic() {
        let embedder = HashingEmbedder::new(128);
        let v1 = embedder.embed_text("Blackstone Group");
        let v2 = embedder.embed_text("Blackstone Group");
        assert_eq!(v1, v2);

        let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_similar_names_are_closer() {
        let embedder = HashingEmbedder::new(256);
        let a = embedder.embed_text("Blackstone Group");
        let b = embedder.embed_text("Blackstone Grp");
        let c = embedder.embed_text("Norges Bank Investment Management");

        let close = cosine_similarity(&a, &b).unwrap();
        let far = cosine_similarity(&a, &c).unwrap();
        assert!(close > far);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), None);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
    }

    #[tokio::test]
    async fn test_embed_records_fills_table() {
        let records = create_test_records();
        let service: SharedEmbeddingService = Arc::new(HashingEmbedder::new(64));
        let table = embed_records(Some(service), &records, 2, 2).await;

        assert_eq!(table.names.len(), 3);
        assert_eq!(table.mandates.len(), 1);
        assert_eq!(table.total_batches, 2);
        assert!(table.degraded_reason().is_none());
        assert!(!table.all_calls_failed());
    }

    #[tokio::test]
    async fn test_outage_degrades_instead_of_failing() {
        let records = create_test_records();
        let service: SharedEmbeddingService = Arc::new(DownEmbedder);
        let table = embed_records(Some(service), &records, 10, 2).await;

        assert!(table.names.is_empty());
        assert!(table.all_calls_failed());
        assert!(table
            .degraded_reason()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_unconfigured_service() {
        let table = embed_records(None, &create_test_records(), 10, 2).await;
        assert!(!table.is_configured());
        assert!(!table.all_calls_failed());
        assert!(table.degraded_reason().is_some());
    }
}
