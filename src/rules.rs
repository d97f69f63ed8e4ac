// 🏷️ Heuristic Rules - Rules as Data
// Pairwise match/non-match heuristics: the Tier-1 prefilter that rejects
// obvious non-matches before scoring, and the bootstrap labeller that
// produces the first training set before any human review exists.

use crate::record::{OrganizationRecord, RecordProfile};
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleVerdict {
    Match,
    NonMatch,
}

/// Where a rule is consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Candidate filtering before classification
    Prefilter,
    /// Labelling training pairs when no model exists yet
    Bootstrap,
    Both,
}

impl RuleScope {
    fn covers(&self, requested: RuleScope) -> bool {
        *self == RuleScope::Both || *self == requested
    }
}

/// One pairwise test. "Differs" conditions only hold when both sides are known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    OrgTypeDiffers,
    CountryDiffers,
    RoleDiffers,
    CountryEqual,
    CityEqual,
    ExternalIdEqual,
    DomainEqual,
    NameExact,
    Abbreviation,
    /// Jaro-Winkler on normalized names below the threshold
    NameSimilarityBelow(f64),
    NameSimilarityAtLeast(f64),
}

/// A record plus its normalized keys
pub type RuleInput<'a> = (&'a OrganizationRecord, &'a RecordProfile);

fn both<'a, T: PartialEq>(a: &'a Option<T>, b: &'a Option<T>) -> Option<(&'a T, &'a T)> {
    match (a, b) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    }
}

pub fn name_similarity(a: &RecordProfile, b: &RecordProfile) -> f64 {
    strsim::jaro_winkler(&a.normalized_name, &b.normalized_name)
}

impl Condition {
    pub fn holds(&self, a: RuleInput, b: RuleInput) -> bool {
        let (ra, pa) = a;
        let (rb, pb) = b;

        match self {
            Condition::OrgTypeDiffers => {
                ra.org_type.is_known() && rb.org_type.is_known() && ra.org_type != rb.org_type
            }
            Condition::RoleDiffers => {
                ra.role.is_known() && rb.role.is_known() && ra.role != rb.role
            }
            Condition::CountryDiffers => both(&pa.country, &pb.country).map_or(false, |(x, y)| x != y),
            Condition::CountryEqual => both(&pa.country, &pb.country).map_or(false, |(x, y)| x == y),
            Condition::CityEqual => both(&pa.city, &pb.city).map_or(false, |(x, y)| x == y),
            Condition::ExternalIdEqual => {
                both(&pa.external_id, &pb.external_id).map_or(false, |(x, y)| x == y)
            }
            Condition::DomainEqual => both(&pa.domain, &pb.domain).map_or(false, |(x, y)| x == y),
            Condition::NameExact => {
                !pa.normalized_name.is_empty() && pa.normalized_name == pb.normalized_name
            }
            Condition::Abbreviation => pa.is_abbreviation_of(pb),
            Condition::NameSimilarityBelow(threshold) => name_similarity(pa, pb) < *threshold,
            Condition::NameSimilarityAtLeast(threshold) => name_similarity(pa, pb) >= *threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicRule {
    /// Rule ID for tracking (persisted with rejected pairs and bootstrap labels)
    pub id: String,

    pub description: String,

    pub verdict: RuleVerdict,

    /// ALL conditions must hold
    pub conditions: Vec<Condition>,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    /// Priority (higher = applied first)
    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default = "default_scope")]
    pub scope: RuleScope,
}

fn default_priority() -> i32 {
    0
}

fn default_scope() -> RuleScope {
    RuleScope::Both
}

impl HeuristicRule {
    pub fn fires(&self, a: RuleInput, b: RuleInput) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.holds(a, b))
    }
}

// ============================================================================
// RULE RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub verdict: RuleVerdict,
    pub confidence: f64,
}

// ============================================================================
// RULE ENGINE
// ============================================================================

pub struct RuleEngine {
    rules: Vec<HeuristicRule>,
}

impl RuleEngine {
    /// Create a new empty rule engine
    pub fn new() -> Self {
        RuleEngine { rules: Vec::new() }
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<HeuristicRule> =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        Ok(RuleEngine::from_rules(rules))
    }

    /// Create engine from a list of rules
    pub fn from_rules(mut rules: Vec<HeuristicRule>) -> Self {
        // Sort by priority (higher first); stable, so file order breaks ties
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleEngine { rules }
    }

    /// Built-in rule table
    pub fn with_defaults() -> Self {
        RuleEngine::from_rules(default_rules())
    }

    /// First firing rule (by priority) among the rules covering `scope`
    pub fn evaluate(&self, a: RuleInput, b: RuleInput, scope: RuleScope) -> Option<RuleOutcome> {
        self.rules
            .iter()
            .filter(|rule| rule.scope.covers(scope))
            .find(|rule| rule.fires(a, b))
            .map(|rule| RuleOutcome {
                rule_id: rule.id.clone(),
                verdict: rule.verdict,
                confidence: rule.confidence,
            })
    }

    /// Tier-1 prefilter: Some(rule_id) when the pair is an obvious non-match.
    /// A firing Match rule shields the pair from rejection.
    pub fn reject(&self, a: RuleInput, b: RuleInput) -> Option<String> {
        match self.evaluate(a, b, RuleScope::Prefilter) {
            Some(outcome) if outcome.verdict == RuleVerdict::NonMatch => Some(outcome.rule_id),
            _ => None,
        }
    }

    pub fn rules(&self) -> &[HeuristicRule] {
        &self.rules
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn rule(
    id: &str,
    description: &str,
    verdict: RuleVerdict,
    conditions: Vec<Condition>,
    confidence: f64,
    priority: i32,
    scope: RuleScope,
) -> HeuristicRule {
    HeuristicRule {
        id: id.to_string(),
        description: description.to_string(),
        verdict,
        conditions,
        confidence,
        priority,
        scope,
    }
}

pub fn default_rules() -> Vec<HeuristicRule> {
    use Condition::*;
    use RuleScope::*;
    use RuleVerdict::*;

    vec![
        rule(
            "shared_external_id",
            "Same registry identifier",
            Match,
            vec![ExternalIdEqual],
            0.99,
            200,
            Both,
        ),
        rule(
            "shared_domain_same_country",
            "Same website domain in the same country",
            Match,
            vec![DomainEqual, CountryEqual],
            0.95,
            180,
            Both,
        ),
        rule(
            "exact_name_same_country",
            "Identical normalized name in the same country",
            Match,
            vec![NameExact, CountryEqual],
            0.9,
            170,
            Bootstrap,
        ),
        rule(
            "abbreviation_same_city",
            "One name abbreviates the other, same city",
            Match,
            vec![Abbreviation, CityEqual],
            0.85,
            160,
            Bootstrap,
        ),
        rule(
            "tier1_type_country_mismatch",
            "Different organization types in different countries",
            NonMatch,
            vec![OrgTypeDiffers, CountryDiffers],
            0.97,
            100,
            Both,
        ),
        rule(
            "tier1_role_name_mismatch",
            "GP vs LP with clearly different names",
            NonMatch,
            vec![RoleDiffers, NameSimilarityBelow(0.85)],
            0.95,
            90,
            Both,
        ),
        rule(
            "dissimilar_names",
            "Names share too little to be the same organization",
            NonMatch,
            vec![NameSimilarityBelow(0.55)],
            0.8,
            10,
            Bootstrap,
        ),
    ]
}

// ============================================================================
// TESTS
// ============================================================================
