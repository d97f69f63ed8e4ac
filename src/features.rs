// 📐 Feature Extractor - Pairwise similarity signals
//
// Turns a candidate pair into a fixed-length vector. Missing data is its own
// value (MISSING), never 0.0: most LP/GP records carry little beyond a name,
// and "we don't know the country" is not "the countries differ".

use crate::embedding::{cosine_similarity, EmbeddingTable};
use crate::normalize::{containment, jaccard};
use crate::record::{OrganizationRecord, RecordProfile};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

pub type FeatureVector = Vec<f64>;

/// "No signal" marker
pub const MISSING: f64 = -1.0;

pub const FEATURE_COUNT: usize = 20;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "name_jaro_winkler",
    "name_levenshtein",
    "name_token_containment",
    "name_token_jaccard",
    "name_phonetic",
    "name_abbreviation",
    "name_exact",
    "name_length_ratio",
    "name_embedding_cosine",
    "mandate_embedding_cosine",
    "mandate_token_jaccard",
    "org_type_match",
    "role_match",
    "country_match",
    "city_similarity",
    "domain_match",
    "external_id_match",
    "aum_ratio",
    "strategy_jaccard",
    "geography_jaccard",
];

/// Index of a named feature
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

/// Fingerprint of the feature layout; models trained on another layout are refused
pub fn schema_fingerprint() -> String {
    let mut hasher = Sha256::new();
    hasher.update(FEATURE_NAMES.join(",").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Both sides known → compare, otherwise MISSING
fn compare<T, F>(a: Option<T>, b: Option<T>, f: F) -> f64
where
    F: FnOnce(T, T) -> f64,
{
    match (a, b) {
        (Some(x), Some(y)) => f(x, y),
        _ => MISSING,
    }
}

fn set_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return MISSING;
    }
    jaccard(a, b).unwrap_or(MISSING)
}

/// Replace NaN/inf with MISSING
pub fn sanitize(mut features: FeatureVector) -> FeatureVector {
    for value in features.iter_mut() {
        if !value.is_finite() {
            *value = MISSING;
        }
    }
    features
}

// ============================================================================
// EXTRACTOR
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        FeatureExtractor
    }

    /// Compute all FEATURE_COUNT features for one pair
    pub fn extract(
        &self,
        a: (&OrganizationRecord, &RecordProfile),
        b: (&OrganizationRecord, &RecordProfile),
        embeddings: &EmbeddingTable,
    ) -> FeatureVector {
        let (ra, pa) = a;
        let (rb, pb) = b;
        let mut f = vec![MISSING; FEATURE_COUNT];

        // Name
        f[0] = strsim::jaro_winkler(&pa.normalized_name, &pb.normalized_name);
        f[1] = strsim::normalized_levenshtein(&pa.normalized_name, &pb.normalized_name);
        f[2] = containment(&pa.token_set, &pb.token_set).unwrap_or(MISSING);
        f[3] = jaccard(&pa.token_set, &pb.token_set).unwrap_or(MISSING);
        f[4] = {
            let ca: BTreeSet<&String> = pa.phonetic.iter().collect();
            let cb: BTreeSet<&String> = pb.phonetic.iter().collect();
            if ca.is_empty() || cb.is_empty() {
                MISSING
            } else {
                ca.intersection(&cb).count() as f64 / ca.len().max(cb.len()) as f64
            }
        };
        f[5] = flag(pa.is_abbreviation_of(pb));
        f[6] = flag(!pa.squashed_name.is_empty() && pa.squashed_name == pb.squashed_name);
        f[7] = {
            let (la, lb) = (pa.squashed_name.len(), pb.squashed_name.len());
            if la == 0 || lb == 0 {
                MISSING
            } else {
                la.min(lb) as f64 / la.max(lb) as f64
            }
        };

        // Semantic
        f[8] = compare(embeddings.name(&ra.id), embeddings.name(&rb.id), |x, y| {
            cosine_similarity(x, y).unwrap_or(MISSING)
        });
        f[9] = compare(embeddings.mandate(&ra.id), embeddings.mandate(&rb.id), |x, y| {
            cosine_similarity(x, y).unwrap_or(MISSING)
        });
        f[10] = set_jaccard(&pa.mandate_tokens, &pb.mandate_tokens);

        // Structure
        f[11] = compare(
            Some(ra.org_type).filter(|t| t.is_known()),
            Some(rb.org_type).filter(|t| t.is_known()),
            |x, y| flag(x == y),
        );
        f[12] = compare(
            Some(ra.role).filter(|r| r.is_known()),
            Some(rb.role).filter(|r| r.is_known()),
            |x, y| flag(x == y),
        );
        f[13] = compare(pa.country.as_ref(), pb.country.as_ref(), |x, y| flag(x == y));
        f[14] = compare(pa.city.as_ref(), pb.city.as_ref(), |x, y| {
            strsim::jaro_winkler(x, y)
        });
        f[15] = compare(pa.domain.as_ref(), pb.domain.as_ref(), |x, y| flag(x == y));
        f[16] = compare(pa.external_id.as_ref(), pb.external_id.as_ref(), |x, y| {
            flag(x == y)
        });
        f[17] = compare(ra.aum_usd_m, rb.aum_usd_m, |x, y| {
            let (lo, hi) = (x.min(y), x.max(y));
            if hi <= 0.0 {
                1.0
            } else {
                lo / hi
            }
        });
        f[18] = set_jaccard(&pa.strategies, &pb.strategies);
        f[19] = set_jaccard(&pa.geographies, &pb.geographies);

        sanitize(f)
    }
}

// ============================================================================
// TESTS
// ============================================================================
