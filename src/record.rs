// 🏛️ Organization Records - One ingested claim about a GP or LP
//
// Identity: UUID (never changes). Values: name, type, geography, size...
// A stored record is never edited in place; a correction becomes the next
// version and the previous one gets valid_until.

use crate::error::IngestError;
use crate::normalize::{
    self, abbreviation_match, normalize_city, normalize_country, normalize_domain,
    normalize_identifier, normalize_name, phonetic_codes, significant_tokens, squash,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// DATA SOURCE (provenance tag, ordered by trust)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Typed in by an analyst
    ManualEntry,

    /// Licensed/verified third-party dataset
    VerifiedThirdParty,

    /// Partner or API feed
    PartnerFeed,

    /// Bulk CSV/Excel import
    BulkImport,

    /// Extracted or guessed by a model
    AiInferred,
}

impl DataSource {
    pub const ALL: [DataSource; 5] = [
        DataSource::ManualEntry,
        DataSource::VerifiedThirdParty,
        DataSource::PartnerFeed,
        DataSource::BulkImport,
        DataSource::AiInferred,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::ManualEntry => "manual_entry",
            DataSource::VerifiedThirdParty => "verified_third_party",
            DataSource::PartnerFeed => "partner_feed",
            DataSource::BulkImport => "bulk_import",
            DataSource::AiInferred => "ai_inferred",
        }
    }

    pub fn parse(raw: &str) -> Option<DataSource> {
        match raw.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "manual" | "manual_entry" => Some(DataSource::ManualEntry),
            "verified" | "verified_third_party" | "third_party" => {
                Some(DataSource::VerifiedThirdParty)
            }
            "partner" | "partner_feed" | "api" | "api_feed" => Some(DataSource::PartnerFeed),
            "bulk" | "bulk_import" | "csv" | "import" | "excel" => Some(DataSource::BulkImport),
            "ai" | "ai_inferred" | "inferred" => Some(DataSource::AiInferred),
            _ => None,
        }
    }

    /// How much a value from this source is trusted on its own
    pub fn base_weight(&self) -> f64 {
        match self {
            DataSource::ManualEntry => 1.0,
            DataSource::VerifiedThirdParty => 0.95,
            DataSource::PartnerFeed => 0.85,
            DataSource::BulkImport => 0.7,
            DataSource::AiInferred => 0.5,
        }
    }
}

// ============================================================================
// ORGANIZATION TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgType {
    Pension,
    Endowment,
    Foundation,
    FamilyOffice,
    SovereignWealth,
    Insurance,
    FundOfFunds,
    Bank,
    PrivateEquity,
    VentureCapital,
    PrivateCredit,
    RealEstate,
    Infrastructure,
    HedgeFund,
    Unknown,
}

impl OrgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgType::Pension => "pension",
            OrgType::Endowment => "endowment",
            OrgType::Foundation => "foundation",
            OrgType::FamilyOffice => "family_office",
            OrgType::SovereignWealth => "sovereign_wealth",
            OrgType::Insurance => "insurance",
            OrgType::FundOfFunds => "fund_of_funds",
            OrgType::Bank => "bank",
            OrgType::PrivateEquity => "private_equity",
            OrgType::VentureCapital => "venture_capital",
            OrgType::PrivateCredit => "private_credit",
            OrgType::RealEstate => "real_estate",
            OrgType::Infrastructure => "infrastructure",
            OrgType::HedgeFund => "hedge_fund",
            OrgType::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> OrgType {
        let key = raw.trim().to_lowercase().replace(['-', '_'], " ");
        match key.as_str() {
            "pension" | "pension fund" | "public pension" | "corporate pension" => {
                OrgType::Pension
            }
            "endowment" | "university endowment" => OrgType::Endowment,
            "foundation" => OrgType::Foundation,
            "family office" | "single family office" | "multi family office" => {
                OrgType::FamilyOffice
            }
            "sovereign wealth" | "sovereign wealth fund" | "swf" => OrgType::SovereignWealth,
            "insurance" | "insurer" | "insurance company" => OrgType::Insurance,
            "fund of funds" | "fof" => OrgType::FundOfFunds,
            "bank" => OrgType::Bank,
            "private equity" | "pe" | "buyout" => OrgType::PrivateEquity,
            "venture capital" | "vc" | "venture" => OrgType::VentureCapital,
            "private credit" | "credit" | "private debt" => OrgType::PrivateCredit,
            "real estate" => OrgType::RealEstate,
            "infrastructure" => OrgType::Infrastructure,
            "hedge fund" => OrgType::HedgeFund,
            _ => OrgType::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        *self != OrgType::Unknown
    }
}

// ============================================================================
// PARTY ROLE (which side of the market)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Gp,
    Lp,
    Unknown,
}

impl PartyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyRole::Gp => "gp",
            PartyRole::Lp => "lp",
            PartyRole::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> PartyRole {
        match raw.trim().to_lowercase().as_str() {
            "gp" | "general partner" | "manager" | "fund manager" => PartyRole::Gp,
            "lp" | "limited partner" | "investor" | "allocator" => PartyRole::Lp,
            _ => PartyRole::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        *self != PartyRole::Unknown
    }
}

// ============================================================================
// ENTITY TIER (review priority by entity value)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityTier {
    Tier1 = 1,
    Tier2 = 2,
    Tier3 = 3,
}

impl EntityTier {
    /// Tier 1: >= $10bn AUM, Tier 2: >= $1bn, Tier 3: smaller or unknown
    pub fn from_aum(aum_usd_m: Option<f64>) -> EntityTier {
        match aum_usd_m {
            Some(aum) if aum >= 10_000.0 => EntityTier::Tier1,
            Some(aum) if aum >= 1_000.0 => EntityTier::Tier2,
            _ => EntityTier::Tier3,
        }
    }

    pub fn rank(&self) -> i64 {
        *self as i64
    }

    pub fn from_rank(rank: i64) -> EntityTier {
        match rank {
            1 => EntityTier::Tier1,
            2 => EntityTier::Tier2,
            _ => EntityTier::Tier3,
        }
    }
}

// ============================================================================
// RAW CSV ROW (import wizard output)
// ============================================================================

/// One CSV row as the import file presents it; validated before it becomes
/// an OrganizationRecord
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawOrganizationRow {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Type", default)]
    pub org_type: String,

    #[serde(rename = "Role", default)]
    pub role: String,

    #[serde(rename = "City", default)]
    pub city: String,

    #[serde(rename = "Country", default)]
    pub country: String,

    #[serde(rename = "Website", default)]
    pub website: String,

    #[serde(rename = "External_ID", default)]
    pub external_id: String,

    #[serde(rename = "AUM_USD_M", default)]
    pub aum_usd_m: String,

    #[serde(rename = "Strategies", default)]
    pub strategies: String,

    #[serde(rename = "Geographies", default)]
    pub geographies: String,

    #[serde(rename = "Mandate", default)]
    pub mandate: String,

    #[serde(rename = "Data_Source", default)]
    pub data_source: String,

    #[serde(rename = "Updated_At", default)]
    pub updated_at: String,
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse an RFC 3339 timestamp or a bare date (YYYY-MM-DD, MM/DD/YYYY)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// Parse an AUM cell: "12,500", "$12500.5", "" (missing)
pub fn parse_aum(raw: &str) -> Result<Option<f64>, String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '$' && *c != '_')
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(Some(v)),
        _ => Err(raw.to_string()),
    }
}

// ============================================================================
// ORGANIZATION RECORD
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationRecord {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    /// Stable identity (UUID) - NEVER changes across versions
    pub id: String,

    // ========================================================================
    // VALUES
    // ========================================================================
    pub name: String,
    pub org_type: OrgType,
    pub role: PartyRole,
    pub city: Option<String>,
    /// ISO-3166 alpha-2 when recognized
    pub country: Option<String>,
    pub website: Option<String>,
    pub external_id: Option<String>,
    pub aum_usd_m: Option<f64>,
    pub strategies: Vec<String>,
    pub geographies: Vec<String>,
    pub mandate: Option<String>,

    // ========================================================================
    // PROVENANCE
    // ========================================================================
    pub data_source: DataSource,
    /// Where the record came from ("lp_list.csv:17", "analyst:jdoe")
    pub source_ref: String,
    /// When the source last asserted these values
    pub updated_at: DateTime<Utc>,

    // ========================================================================
    // VERSIONING
    // ========================================================================
    pub version: i64,
    /// When we learned about it (ingestion)
    pub system_time: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    /// None = current version
    pub valid_until: Option<DateTime<Utc>>,
    /// Identity of the version this one supersedes
    pub previous_version_id: Option<String>,

    // ========================================================================
    // EXTENSIBLE METADATA
    // ========================================================================
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OrganizationRecord {
    /// Minimal record (name + source); everything else unknown
    pub fn new(name: &str, data_source: DataSource) -> Self {
        let now = Utc::now();
        OrganizationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            org_type: OrgType::Unknown,
            role: PartyRole::Unknown,
            city: None,
            country: None,
            website: None,
            external_id: None,
            aum_usd_m: None,
            strategies: Vec::new(),
            geographies: Vec::new(),
            mandate: None,
            data_source,
            source_ref: String::new(),
            updated_at: now,
            version: 1,
            system_time: now,
            valid_from: now,
            valid_until: None,
            previous_version_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Convert a CSV row; `default_source` applies when the row has none
    pub fn from_row(
        row: &RawOrganizationRow,
        line: usize,
        default_source: DataSource,
        source_file: &str,
    ) -> Result<Self, IngestError> {
        let name = non_empty(&row.name).ok_or(IngestError::MissingName { line })?;

        let data_source = match non_empty(&row.data_source) {
            Some(raw) => DataSource::parse(&raw).ok_or(IngestError::UnknownSource {
                line,
                value: raw.clone(),
            })?,
            None => default_source,
        };

        let aum_usd_m = parse_aum(&row.aum_usd_m).map_err(|value| IngestError::InvalidNumber {
            line,
            field: "AUM_USD_M".to_string(),
            value,
        })?;

        let mut record = OrganizationRecord::new(&name, data_source);
        record.org_type = OrgType::parse(&row.org_type);
        record.role = PartyRole::parse(&row.role);
        record.city = non_empty(&row.city);
        record.country = normalize_country(&row.country);
        record.website = non_empty(&row.website);
        record.external_id = non_empty(&row.external_id);
        record.aum_usd_m = aum_usd_m;
        record.strategies = normalize::split_tags(&row.strategies);
        record.geographies = normalize::split_tags(&row.geographies);
        record.mandate = non_empty(&row.mandate);
        record.source_ref = format!("{}:{}", source_file, line);

        if let Some(updated_at) = parse_timestamp(&row.updated_at) {
            record.updated_at = updated_at;
        }

        Ok(record)
    }

    /// Idempotency hash over the asserted values
    /// NOTE: This is for DEDUPLICATING IMPORTS, not IDENTITY!
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}|{}|{:?}|{}|{}|{}|{}",
            normalize_name(&self.name),
            self.org_type.as_str(),
            self.role.as_str(),
            self.city.as_deref().unwrap_or(""),
            self.country.as_deref().unwrap_or(""),
            self.website.as_deref().unwrap_or(""),
            self.external_id.as_deref().unwrap_or(""),
            self.aum_usd_m,
            self.strategies.join(";"),
            self.geographies.join(";"),
            self.mandate.as_deref().unwrap_or(""),
            self.data_source.as_str(),
        ));
        format!("{:x}", hasher.finalize())
    }

    pub fn is_current(&self) -> bool {
        self.valid_until.is_none()
    }

    /// Create the next version (same identity, new values to be applied)
    pub fn next_version(&self, change_reason: Option<String>) -> OrganizationRecord {
        let now = Utc::now();
        let mut next = self.clone();
        next.version += 1;
        next.system_time = now;
        next.valid_from = now;
        next.valid_until = None;
        next.updated_at = now;
        next.previous_version_id = Some(self.id.clone());

        if let Some(reason) = change_reason {
            next.metadata
                .insert("change_reason".to_string(), serde_json::json!(reason));
        }

        next
    }

    pub fn tier(&self) -> EntityTier {
        EntityTier::from_aum(self.aum_usd_m)
    }

    /// Field values as merge candidates (null = the source did not assert it)
    pub fn field_values(&self) -> Vec<(&'static str, serde_json::Value)> {
        use serde_json::{json, Value};

        let opt = |v: &Option<String>| v.as_ref().map_or(Value::Null, |s| json!(s));
        let list = |v: &Vec<String>| if v.is_empty() { Value::Null } else { json!(v) };

        vec![
            ("name", json!(self.name)),
            (
                "org_type",
                if self.org_type.is_known() {
                    json!(self.org_type.as_str())
                } else {
                    Value::Null
                },
            ),
            (
                "role",
                if self.role.is_known() {
                    json!(self.role.as_str())
                } else {
                    Value::Null
                },
            ),
            ("city", opt(&self.city)),
            ("country", opt(&self.country)),
            ("website", opt(&self.website)),
            ("external_id", opt(&self.external_id)),
            ("aum_usd_m", self.aum_usd_m.map_or(Value::Null, |v| json!(v))),
            ("strategies", list(&self.strategies)),
            ("geographies", list(&self.geographies)),
            ("mandate", opt(&self.mandate)),
        ]
    }

    /// One-line description (logs, review UI, tiebreak prompts)
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("name=\"{}\"", self.name)];
        if self.org_type.is_known() {
            parts.push(format!("type={}", self.org_type.as_str()));
        }
        if self.role.is_known() {
            parts.push(format!("role={}", self.role.as_str()));
        }
        if let Some(city) = &self.city {
            parts.push(format!("city={}", city));
        }
        if let Some(country) = &self.country {
            parts.push(format!("country={}", country));
        }
        if let Some(website) = &self.website {
            parts.push(format!("website={}", website));
        }
        if let Some(id) = &self.external_id {
            parts.push(format!("external_id={}", id));
        }
        if let Some(aum) = self.aum_usd_m {
            parts.push(format!("aum_usd_m={:.0}", aum));
        }
        if !self.strategies.is_empty() {
            parts.push(format!("strategies={}", self.strategies.join(",")));
        }
        if !self.geographies.is_empty() {
            parts.push(format!("geographies={}", self.geographies.join(",")));
        }
        if let Some(mandate) = &self.mandate {
            parts.push(format!("mandate=\"{}\"", mandate));
        }
        parts.push(format!("source={}", self.data_source.as_str()));
        parts.join(" ")
    }
}

// ============================================================================
// RECORD PROFILE (normalized view, computed once per run)
// ============================================================================

/// Normalized comparison keys for one record
#[derive(Debug, Clone)]
pub struct RecordProfile {
    pub normalized_name: String,
    pub squashed_name: String,
    pub tokens: Vec<String>,
    pub token_set: BTreeSet<String>,
    pub phonetic: Vec<String>,
    pub domain: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub external_id: Option<String>,
    pub strategies: BTreeSet<String>,
    pub geographies: BTreeSet<String>,
    pub mandate_tokens: BTreeSet<String>,
}

impl RecordProfile {
    pub fn from_record(record: &OrganizationRecord) -> Self {
        let normalized_name = normalize_name(&record.name);
        let tokens = significant_tokens(&normalized_name);

        RecordProfile {
            squashed_name: squash(&normalized_name),
            token_set: tokens.iter().cloned().collect(),
            phonetic: phonetic_codes(&normalized_name),
            tokens,
            domain: record.website.as_deref().and_then(normalize_domain),
            city: record.city.as_deref().and_then(normalize_city),
            country: record.country.clone(),
            external_id: record.external_id.as_deref().and_then(normalize_identifier),
            strategies: record.strategies.iter().cloned().collect(),
            geographies: record.geographies.iter().cloned().collect(),
            mandate_tokens: record
                .mandate
                .as_deref()
                .map(normalize::token_set)
                .unwrap_or_default(),
            normalized_name,
        }
    }

    pub fn is_abbreviation_of(&self, other: &RecordProfile) -> bool {
        abbreviation_match(&self.normalized_name, &other.normalized_name)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> RawOrganizationRow {
        RawOrganizationRow {
            name: name.to_string(),
            org_type: "Public Pension".to_string(),
            role: "LP".to_string(),
            city: "Sacramento".to_string(),
            country: "United States".to_string(),
            website: "https://www.calpers.ca.gov".to_string(),
            aum_usd_m: "502,000".to_string(),
            strategies: "Buyout; Infrastructure".to_string(),
            data_source: "csv".to_string(),
            updated_at: "2024-06-30".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_row_normalizes_values() {
        let record = OrganizationRecord::from_row(
            &row("CalPERS"),
            2,
            DataSource::ManualEntry,
            "lps.csv",
        )
        .unwrap();

        assert_eq!(record.name, "CalPERS");
        assert_eq!(record.org_type, OrgType::Pension);
        assert_eq!(record.role, PartyRole::Lp);
        assert_eq!(record.country.as_deref(), Some("US"));
        assert_eq!(record.aum_usd_m, Some(502_000.0));
        assert_eq!(
            record.strategies,
            vec!["buyout".to_string(), "infrastructure".to_string()]
        );
        // Row source overrides the default
        assert_eq!(record.data_source, DataSource::BulkImport);
        assert_eq!(record.source_ref, "lps.csv:2");
        assert_eq!(record.updated_at.format("%Y-%m-%d").to_string(), "2024-06-30");
        assert_eq!(record.tier(), EntityTier::Tier1);
    }

    #[test]
    fn test_from_row_rejects_missing_name() {
        let err = OrganizationRecord::from_row(&row("   "), 5, DataSource::BulkImport, "x.csv")
            .unwrap_err();
        assert_eq!(err, IngestError::MissingName { line: 5 });
    }

    #[test]
    fn test_from_row_rejects_bad_aum_and_source() {
        let mut bad_aum = row("CalPERS");
        bad_aum.aum_usd_m = "lots".to_string();
        assert!(matches!(
            OrganizationRecord::from_row(&bad_aum, 3, DataSource::BulkImport, "x.csv"),
            Err(IngestError::InvalidNumber { .. })
        ));

        let mut bad_source = row("CalPERS");
        bad_source.data_source = "rumor".to_string();
        assert!(matches!(
            OrganizationRecord::from_row(&bad_source, 4, DataSource::BulkImport, "x.csv"),
            Err(IngestError::UnknownSource { .. })
        ));
    }

    #[test]
    fn test_idempotency_hash_ignores_identity() {
        let a = OrganizationRecord::from_row(&row("CalPERS"), 2, DataSource::BulkImport, "a.csv")
            .unwrap();
        let b = OrganizationRecord::from_row(&row("CalPERS"), 9, DataSource::BulkImport, "b.csv")
            .unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.compute_idempotency_hash(), b.compute_idempotency_hash());
        assert_eq!(a.compute_idempotency_hash().len(), 64);
    }

    #[test]
    fn test_next_version_keeps_identity() {
        let record = OrganizationRecord::new("Yale University Investments Office", DataSource::ManualEntry);
        let next = record.next_version(Some("typo fix".to_string()));

        assert_eq!(next.id, record.id);
        assert_eq!(next.version, 2);
        assert_eq!(next.previous_version_id.as_deref(), Some(record.id.as_str()));
        assert!(next.is_current());
        assert_eq!(
            next.metadata.get("change_reason"),
            Some(&serde_json::json!("typo fix"))
        );
    }

    #[test]
    fn test_data_source_parse_aliases() {
        assert_eq!(DataSource::parse("Manual"), Some(DataSource::ManualEntry));
        assert_eq!(DataSource::parse("third-party"), Some(DataSource::VerifiedThirdParty));
        assert_eq!(DataSource::parse("API"), Some(DataSource::PartnerFeed));
        assert_eq!(DataSource::parse("bulk import"), Some(DataSource::BulkImport));
        assert_eq!(DataSource::parse("AI"), Some(DataSource::AiInferred));
        assert_eq!(DataSource::parse("gossip"), None);
    }

    #[test]
    fn test_field_values_null_for_unknowns() {
        let record = OrganizationRecord::new("Sequoia Capital", DataSource::BulkImport);
        let values: HashMap<_, _> = record.field_values().into_iter().collect();

        assert_eq!(values["name"], serde_json::json!("Sequoia Capital"));
        assert!(values["org_type"].is_null());
        assert!(values["strategies"].is_null());
        assert_eq!(values.len(), 11);
    }

    #[test]
    fn test_profile_keys() {
        let mut record = OrganizationRecord::new("The Blackstone Group L.P.", DataSource::BulkImport);
        record.website = Some("https://www.blackstone.com/".to_string());
        let profile = RecordProfile::from_record(&record);

        assert_eq!(profile.normalized_name, "the blackstone group");
        assert_eq!(profile.tokens, vec!["blackstone".to_string(), "group".to_string()]);
        assert_eq!(profile.squashed_name, "theblackstonegroup");
        assert_eq!(profile.domain.as_deref(), Some("blackstone.com"));
    }
}
