// ✅ Data Quality Engine - Great Expectations style validation
// Validates every imported organization row before it becomes a record
//
// Critical issues quarantine the row; warnings and info ride along in the
// record's metadata so nothing about the source is lost.

use crate::normalize::{is_recognized_country, normalize_country, normalize_domain};
use crate::record::{parse_aum, parse_timestamp, DataSource, OrgType, PartyRole, RawOrganizationRow};
use serde::{Deserialize, Serialize};

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub rule_name: String,
    pub field: String,
    pub message: String,
    pub confidence: f64,
    pub severity: Severity,
}

impl ValidationResult {
    pub fn pass(rule_name: &str, field: &str, message: &str) -> Self {
        ValidationResult {
            passed: true,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            confidence: 1.0,
            severity: Severity::Info,
        }
    }

    pub fn fail(rule_name: &str, field: &str, message: &str, severity: Severity) -> Self {
        ValidationResult {
            passed: false,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            confidence: match severity {
                Severity::Critical => 0.0,
                Severity::Warning => 0.5,
                Severity::Info => 0.8,
            },
            severity,
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// Line in the source file
    pub line: usize,
    pub overall_quality: f64,
    pub overall_confidence: f64,
    pub validations: Vec<ValidationResult>,
    pub issues: Vec<QualityIssue>,
    pub passed_count: usize,
    pub failed_count: usize,
    pub needs_review: bool,
}

impl QualityReport {
    pub fn summary(&self) -> String {
        format!(
            "Quality: {:.1}%, Confidence: {:.1}%, Issues: {} ({} critical)",
            self.overall_quality * 100.0,
            self.overall_confidence * 100.0,
            self.issues.len(),
            self.critical_issues().count()
        )
    }

    pub fn is_high_quality(&self) -> bool {
        self.overall_quality >= 0.8 && self.overall_confidence >= 0.7 && !self.has_critical_issues()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.critical_issues().next().is_some()
    }

    pub fn critical_issues(&self) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Critical)
    }

    /// Non-critical issues, as stored in record metadata
    pub fn warnings(&self) -> Vec<&QualityIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity != Severity::Critical)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub field: String,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Row cannot become a record
    Warning,  // Value is questionable or was dropped
    Info,     // Valid but thin
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine {
    /// Org types that only ever invest (a GP of this type is suspicious)
    lp_only_types: Vec<OrgType>,

    /// Largest believable AUM in USD millions
    max_aum_usd_m: f64,

    /// Minimum confidence threshold for "needs_review"
    review_threshold: f64,
}

impl DataQualityEngine {
    pub fn new() -> Self {
        DataQualityEngine {
            lp_only_types: vec![
                OrgType::Pension,
                OrgType::Endowment,
                OrgType::Foundation,
                OrgType::SovereignWealth,
                OrgType::Insurance,
            ],
            // No asset owner holds more than ~$20tn
            max_aum_usd_m: 20_000_000.0,
            review_threshold: 0.7,
        }
    }

    /// Validate one CSV row and generate a quality report
    pub fn validate(&self, row: &RawOrganizationRow, line: usize) -> QualityReport {
        let checks: Vec<(ValidationResult, &str)> = vec![
            (self.validate_name(&row.name), "Every record needs an organization name"),
            (
                self.validate_source(&row.data_source),
                "Use manual_entry, verified_third_party, partner_feed, bulk_import or ai_inferred",
            ),
            (self.validate_aum(&row.aum_usd_m), "Give AUM in USD millions, e.g. 12500"),
            (self.validate_org_type(&row.org_type), "Use a known organization type (pension, endowment, ...)"),
            (self.validate_role(&row.role), "Use GP or LP"),
            (self.validate_role_type(&row.role, &row.org_type), "Check whether the role or the type is wrong"),
            (self.validate_country(&row.country), "Use an ISO-3166 code or a full country name"),
            (self.validate_website(&row.website), "Give a website such as example.com"),
            (self.validate_updated_at(&row.updated_at), "Use RFC 3339 or YYYY-MM-DD"),
            (self.validate_identifying_signal(row), "Add location, website or a registry id to improve matching"),
        ];

        let mut validations = Vec::new();
        let mut issues = Vec::new();
        for (result, recommendation) in checks {
            if !result.passed {
                issues.push(QualityIssue {
                    severity: result.severity.clone(),
                    field: result.field.clone(),
                    issue: result.message.clone(),
                    recommendation: recommendation.to_string(),
                });
            }
            validations.push(result);
        }

        // Calculate overall metrics
        let passed_count = validations.iter().filter(|v| v.passed).count();
        let failed_count = validations.len() - passed_count;
        let overall_quality = passed_count as f64 / validations.len() as f64;
        let overall_confidence: f64 =
            validations.iter().map(|v| v.confidence).sum::<f64>() / validations.len() as f64;

        QualityReport {
            line,
            overall_quality,
            overall_confidence,
            needs_review: overall_confidence < self.review_threshold,
            validations,
            issues,
            passed_count,
            failed_count,
        }
    }

    /// Batch validate rows (numbered from 1)
    pub fn validate_batch(&self, rows: &[RawOrganizationRow]) -> Vec<QualityReport> {
        rows.iter()
            .enumerate()
            .map(|(i, row)| self.validate(row, i + 1))
            .collect()
    }

    /// Generate summary statistics for batch validation
    pub fn batch_summary(&self, reports: &[QualityReport]) -> BatchSummary {
        let total = reports.len();
        let high_quality = reports.iter().filter(|r| r.is_high_quality()).count();
        let needs_review = reports.iter().filter(|r| r.needs_review).count();
        let has_critical = reports.iter().filter(|r| r.has_critical_issues()).count();

        let (avg_quality, avg_confidence) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                reports.iter().map(|r| r.overall_quality).sum::<f64>() / total as f64,
                reports.iter().map(|r| r.overall_confidence).sum::<f64>() / total as f64,
            )
        };

        BatchSummary {
            total_rows: total,
            high_quality_count: high_quality,
            needs_review_count: needs_review,
            critical_issues_count: has_critical,
            average_quality: avg_quality,
            average_confidence: avg_confidence,
        }
    }

    // ========================================================================
    // VALIDATION RULES
    // ========================================================================

    fn validate_name(&self, name: &str) -> ValidationResult {
        let name = name.trim();
        if name.is_empty() {
            return ValidationResult::fail("name_not_empty", "name", "Name is empty", Severity::Critical);
        }

        if !name.chars().any(|c| c.is_alphabetic()) {
            return ValidationResult::fail(
                "name_has_letters",
                "name",
                &format!("Name has no letters: {}", name),
                Severity::Critical,
            );
        }

        if name.chars().count() < 3 {
            return ValidationResult::fail(
                "name_too_short",
                "name",
                &format!("Name too short to match reliably: {}", name),
                Severity::Warning,
            );
        }

        ValidationResult::pass("name_present", "name", &format!("Name present: {}", name))
    }

    fn validate_source(&self, source: &str) -> ValidationResult {
        if source.trim().is_empty() {
            return ValidationResult::pass(
                "source_default",
                "data_source",
                "No source given, import default applies",
            );
        }

        match DataSource::parse(source) {
            Some(s) => ValidationResult::pass("source_known", "data_source", &format!("Source: {}", s.as_str())),
            None => ValidationResult::fail(
                "source_unknown",
                "data_source",
                &format!("Unknown data source: {}", source),
                Severity::Critical,
            ),
        }
    }

    fn validate_aum(&self, aum: &str) -> ValidationResult {
        match parse_aum(aum) {
            Err(raw) => ValidationResult::fail(
                "aum_invalid",
                "aum_usd_m",
                &format!("AUM is not a valid non-negative number: {}", raw),
                Severity::Critical,
            ),
            Ok(None) => ValidationResult::fail("aum_missing", "aum_usd_m", "AUM is missing", Severity::Info),
            Ok(Some(v)) if v == 0.0 => {
                ValidationResult::fail("aum_zero", "aum_usd_m", "AUM is zero", Severity::Warning)
            }
            Ok(Some(v)) if v > self.max_aum_usd_m => ValidationResult::fail(
                "aum_implausible",
                "aum_usd_m",
                &format!("AUM of {:.0}m is implausible (units?)", v),
                Severity::Warning,
            ),
            Ok(Some(v)) => ValidationResult::pass("aum_valid", "aum_usd_m", &format!("AUM: {:.0}m", v)),
        }
    }

    fn validate_org_type(&self, org_type: &str) -> ValidationResult {
        if org_type.trim().is_empty() {
            return ValidationResult::fail("type_missing", "org_type", "Organization type is missing", Severity::Info);
        }

        let parsed = OrgType::parse(org_type);
        if !parsed.is_known() {
            return ValidationResult::fail(
                "type_unknown",
                "org_type",
                &format!("Unknown organization type: {}", org_type),
                Severity::Warning,
            );
        }

        ValidationResult::pass("type_known", "org_type", &format!("Type: {}", parsed.as_str()))
    }

    fn validate_role(&self, role: &str) -> ValidationResult {
        if role.trim().is_empty() {
            return ValidationResult::fail("role_missing", "role", "GP/LP role is missing", Severity::Info);
        }

        if !PartyRole::parse(role).is_known() {
            return ValidationResult::fail(
                "role_unknown",
                "role",
                &format!("Unknown role: {}", role),
                Severity::Warning,
            );
        }

        ValidationResult::pass("role_known", "role", "Role is known")
    }

    fn validate_role_type(&self, role: &str, org_type: &str) -> ValidationResult {
        let parsed = OrgType::parse(org_type);
        if PartyRole::parse(role) == PartyRole::Gp && self.lp_only_types.contains(&parsed) {
            return ValidationResult::fail(
                "role_type_inconsistent",
                "role",
                &format!("A {} is recorded as a GP", parsed.as_str()),
                Severity::Warning,
            );
        }

        ValidationResult::pass("role_type_consistent", "role", "Role fits type")
    }

    fn validate_country(&self, country: &str) -> ValidationResult {
        match normalize_country(country) {
            None => ValidationResult::fail("country_missing", "country", "Country is missing", Severity::Info),
            Some(code) if !is_recognized_country(&code) => ValidationResult::fail(
                "country_unrecognized",
                "country",
                &format!("Unrecognized country: {}", country),
                Severity::Warning,
            ),
            Some(code) => ValidationResult::pass("country_known", "country", &format!("Country: {}", code)),
        }
    }

    fn validate_website(&self, website: &str) -> ValidationResult {
        if website.trim().is_empty() {
            return ValidationResult::pass("website_absent", "website", "No website given");
        }

        match normalize_domain(website) {
            Some(domain) => ValidationResult::pass("website_valid", "website", &format!("Domain: {}", domain)),
            None => ValidationResult::fail(
                "website_invalid",
                "website",
                &format!("Website is not a domain: {}", website),
                Severity::Warning,
            ),
        }
    }

    fn validate_updated_at(&self, updated_at: &str) -> ValidationResult {
        if updated_at.trim().is_empty() {
            return ValidationResult::fail(
                "updated_at_missing",
                "updated_at",
                "No assertion date, import time is used",
                Severity::Info,
            );
        }

        match parse_timestamp(updated_at) {
            Some(_) => ValidationResult::pass("updated_at_valid", "updated_at", "Assertion date valid"),
            None => ValidationResult::fail(
                "updated_at_invalid",
                "updated_at",
                &format!("Invalid date, import time is used: {}", updated_at),
                Severity::Warning,
            ),
        }
    }

    fn validate_identifying_signal(&self, row: &RawOrganizationRow) -> ValidationResult {
        let has_signal = [&row.city, &row.country, &row.website, &row.external_id]
            .iter()
            .any(|v| !v.trim().is_empty());

        if !has_signal {
            return ValidationResult::fail(
                "name_only",
                "record",
                "Only a name is available for matching",
                Severity::Info,
            );
        }

        ValidationResult::pass("identifying_signal", "record", "Has location, website or registry id")
    }
}

impl Default for DataQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_rows: usize,
    pub high_quality_count: usize,
    pub needs_review_count: usize,
    pub critical_issues_count: usize,
    pub average_quality: f64,
    pub average_confidence: f64,
}

impl BatchSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} rows: {:.1}% quality, {:.1}% confidence | {} high quality, {} need review, {} critical",
            self.total_rows,
            self.average_quality * 100.0,
            self.average_confidence * 100.0,
            self.high_quality_count,
            self.needs_review_count,
            self.critical_issues_count
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_row() -> RawOrganizationRow {
        RawOrganizationRow {
            name: "California Public Employees' Retirement System".to_string(),
            org_type: "Pension".to_string(),
            role: "LP".to_string(),
            city: "Sacramento".to_string(),
            country: "United States".to_string(),
            website: "https://www.calpers.ca.gov".to_string(),
            external_id: "".to_string(),
            aum_usd_m: "502,000".to_string(),
            strategies: "Buyout; Growth".to_string(),
            geographies: "North America".to_string(),
            mandate: "Global private equity".to_string(),
            data_source: "verified".to_string(),
            updated_at: "2024-05-01".to_string(),
        }
    }

    #[test]
    fn test_validate_complete_row() {
        let engine = DataQualityEngine::new();
        let report = engine.validate(&create_valid_row(), 1);

        println!("Report: {}", report.summary());

        assert!(report.is_high_quality());
        assert!(!report.needs_review);
        assert!(!report.has_critical_issues());
        assert_eq!(report.issues.len(), 0);
    }

    #[test]
    fn test_missing_name_is_critical() {
        let engine = DataQualityEngine::new();
        let mut row = create_valid_row();
        row.name = "   ".to_string();

        let report = engine.validate(&row, 7);

        assert!(report.has_critical_issues());
        assert_eq!(report.line, 7);
        assert!(report.critical_issues().any(|i| i.field == "name"));
    }

    #[test]
    fn test_bad_aum_is_critical_and_huge_aum_is_a_warning() {
        let engine = DataQualityEngine::new();
        let mut row = create_valid_row();
        row.aum_usd_m = "lots".to_string();
        assert!(engine.validate(&row, 1).critical_issues().any(|i| i.field == "aum_usd_m"));

        row.aum_usd_m = "502000000000".to_string();
        let report = engine.validate(&row, 1);
        assert!(!report.has_critical_issues());
        assert!(report
            .issues
            .iter()
            .any(|i| i.field == "aum_usd_m" && i.severity == Severity::Warning));
    }

    #[test]
    fn test_unknown_source_is_critical() {
        let engine = DataQualityEngine::new();
        let mut row = create_valid_row();
        row.data_source = "rumour".to_string();

        assert!(engine.validate(&row, 1).has_critical_issues());
    }

    #[test]
    fn test_pension_recorded_as_gp_is_flagged() {
        let engine = DataQualityEngine::new();
        let mut row = create_valid_row();
        row.role = "GP".to_string();

        let report = engine.validate(&row, 1);
        assert!(!report.has_critical_issues());
        assert!(report.warnings().iter().any(|i| i.issue.contains("recorded as a GP")));
    }

    #[test]
    fn test_name_only_row_is_thin_but_valid() {
        let engine = DataQualityEngine::new();
        let row = RawOrganizationRow {
            name: "Hamilton Lane".to_string(),
            ..Default::default()
        };

        let report = engine.validate(&row, 1);
        assert!(!report.has_critical_issues());
        assert!(report.issues.iter().any(|i| i.field == "record"));
        assert!(report.issues.iter().all(|i| i.severity == Severity::Info));
    }

    #[test]
    fn test_batch_validation() {
        let engine = DataQualityEngine::new();
        let mut broken = create_valid_row();
        broken.name = String::new();

        let reports = engine.validate_batch(&[create_valid_row(), create_valid_row(), broken]);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].line, 3);

        let summary = engine.batch_summary(&reports);

        println!("Batch summary: {}", summary.summary());

        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.high_quality_count, 2);
        assert_eq!(summary.critical_issues_count, 1);
    }

    #[test]
    fn test_empty_batch_summary() {
        let summary = DataQualityEngine::new().batch_summary(&[]);
        assert_eq!(summary.total_rows, 0);
        assert_eq!(summary.average_quality, 0.0);
    }
}
