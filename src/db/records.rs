// 📥 Records - CSV import, quarantine, versioned record storage

use super::{insert_event, json_col, opt_time_col, time_col, ts, enum_col, Event};
use crate::data_quality::{BatchSummary, DataQualityEngine, QualityReport};
use crate::record::{DataSource, OrgType, OrganizationRecord, PartyRole, RawOrganizationRow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    pub rows: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub quarantined: usize,
    pub quality: BatchSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedRow {
    pub id: i64,
    pub source_file: String,
    pub line: usize,
    pub reasons: Vec<String>,
    pub raw_row: serde_json::Value,
    pub quarantined_at: DateTime<Utc>,
}

/// Import one CSV file. Every row ends up either as a record, a duplicate
/// of an existing record, or in quarantine.
pub fn import_csv(conn: &Connection, path: &Path, default_source: DataSource) -> Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let engine = DataQualityEngine::new();
    let mut reports: Vec<QualityReport> = Vec::new();
    let mut summary = ImportSummary::default();

    for (i, result) in reader.deserialize::<RawOrganizationRow>().enumerate() {
        // Header is line 1
        let line = i + 2;
        summary.rows += 1;

        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!(line, error = %e, "unreadable CSV row");
                quarantine_row(
                    conn,
                    &source_file,
                    line,
                    &[format!("unreadable row: {}", e)],
                    &serde_json::Value::Null,
                )?;
                summary.quarantined += 1;
                continue;
            }
        };

        let report = engine.validate(&row, line);
        if report.has_critical_issues() {
            let reasons: Vec<String> = report
                .critical_issues()
                .map(|issue| format!("{}: {}", issue.field, issue.issue))
                .collect();
            debug!(line, ?reasons, "row quarantined");
            quarantine_row(conn, &source_file, line, &reasons, &serde_json::to_value(&row)?)?;
            summary.quarantined += 1;
            reports.push(report);
            continue;
        }

        let mut record = match OrganizationRecord::from_row(&row, line, default_source, &source_file) {
            Ok(record) => record,
            Err(e) => {
                quarantine_row(conn, &source_file, line, &[e.to_string()], &serde_json::to_value(&row)?)?;
                summary.quarantined += 1;
                reports.push(report);
                continue;
            }
        };

        let warnings = report.warnings();
        if !warnings.is_empty() {
            record
                .metadata
                .insert("quality_issues".to_string(), serde_json::to_value(&warnings)?);
        }
        reports.push(report);

        if insert_record(conn, &record, "import")? {
            summary.inserted += 1;
        } else {
            summary.duplicates += 1;
        }
    }

    summary.quality = engine.batch_summary(&reports);

    info!(
        file = %source_file,
        rows = summary.rows,
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        quarantined = summary.quarantined,
        "import finished"
    );

    Ok(summary)
}

/// Insert a record version. Returns false when the idempotency hash already
/// exists (the same claim was imported before).
pub fn insert_record(conn: &Connection, record: &OrganizationRecord, actor: &str) -> Result<bool> {
    let hash = record.compute_idempotency_hash();

    let result = conn.execute(
        "INSERT INTO records (
            id, version, idempotency_hash, name, org_type, role, city, country,
            website, external_id, aum_usd_m, strategies, geographies, mandate,
            data_source, source_ref, updated_at, system_time, valid_from,
            valid_until, previous_version_id, metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                  ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
        params![
            record.id,
            record.version,
            hash,
            record.name,
            record.org_type.as_str(),
            record.role.as_str(),
            record.city,
            record.country,
            record.website,
            record.external_id,
            record.aum_usd_m,
            serde_json::to_string(&record.strategies)?,
            serde_json::to_string(&record.geographies)?,
            record.mandate,
            record.data_source.as_str(),
            record.source_ref,
            ts(&record.updated_at),
            ts(&record.system_time),
            ts(&record.valid_from),
            record.valid_until.as_ref().map(ts),
            record.previous_version_id,
            serde_json::to_string(&record.metadata)?,
        ],
    );

    match result {
        Ok(_) => {
            let event = Event::new(
                if record.version == 1 { "record_created" } else { "record_versioned" },
                "record",
                &record.id,
                serde_json::json!({
                    "version": record.version,
                    "name": record.name,
                    "source": record.data_source.as_str(),
                    "source_ref": record.source_ref,
                }),
                actor,
            );
            insert_event(conn, &event)?;
            Ok(true)
        }
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            debug!(id = %record.id, "duplicate record skipped");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

const RECORD_COLUMNS: &str = "id, version, name, org_type, role, city, country, website,
    external_id, aum_usd_m, strategies, geographies, mandate, data_source, source_ref,
    updated_at, system_time, valid_from, valid_until, previous_version_id, metadata";

fn record_from_row(row: &Row) -> rusqlite::Result<OrganizationRecord> {
    let org_type: String = row.get(3)?;
    let role: String = row.get(4)?;
    let metadata: Option<String> = row.get(20)?;

    Ok(OrganizationRecord {
        id: row.get(0)?,
        version: row.get(1)?,
        name: row.get(2)?,
        org_type: OrgType::parse(&org_type),
        role: PartyRole::parse(&role),
        city: row.get(5)?,
        country: row.get(6)?,
        website: row.get(7)?,
        external_id: row.get(8)?,
        aum_usd_m: row.get(9)?,
        strategies: json_col(row, 10)?,
        geographies: json_col(row, 11)?,
        mandate: row.get(12)?,
        data_source: enum_col(row, 13, DataSource::parse)?,
        source_ref: row.get(14)?,
        updated_at: time_col(row, 15)?,
        system_time: time_col(row, 16)?,
        valid_from: time_col(row, 17)?,
        valid_until: opt_time_col(row, 18)?,
        previous_version_id: row.get(19)?,
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or_default(),
    })
}

/// Current version of every record, ordered by id
pub fn load_records(conn: &Connection) -> Result<Vec<OrganizationRecord>> {
    let sql = format!(
        "SELECT {} FROM records WHERE valid_until IS NULL ORDER BY id",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map([], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn get_record(conn: &Connection, id: &str) -> Result<Option<OrganizationRecord>> {
    let sql = format!(
        "SELECT {} FROM records WHERE id = ?1 AND valid_until IS NULL",
        RECORD_COLUMNS
    );
    let record = conn
        .query_row(&sql, params![id], record_from_row)
        .optional()?;
    Ok(record)
}

/// Every version of a record, oldest first
pub fn record_history(conn: &Connection, id: &str) -> Result<Vec<OrganizationRecord>> {
    let sql = format!("SELECT {} FROM records WHERE id = ?1 ORDER BY version", RECORD_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![id], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Ids of current records ingested (any version) after `since`
pub fn records_ingested_since(conn: &Connection, since: DateTime<Utc>) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT id FROM records
         WHERE system_time > ?1 AND valid_until IS NULL
         ORDER BY id",
    )?;
    let ids = stmt
        .query_map(params![ts(&since)], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Correct a record: the current version is closed and the edited copy
/// becomes the next version
pub fn correct_record(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
    edit: impl FnOnce(&mut OrganizationRecord),
) -> Result<OrganizationRecord> {
    let current = get_record(conn, id)?.with_context(|| format!("Record {} not found", id))?;

    let mut next = current.next_version(Some(reason.to_string()));
    edit(&mut next);

    conn.execute(
        "UPDATE records SET valid_until = ?1 WHERE id = ?2 AND version = ?3",
        params![ts(&next.valid_from), current.id, current.version],
    )?;

    if !insert_record(conn, &next, actor)? {
        anyhow::bail!("Correction of {} produced no change", id);
    }

    Ok(next)
}

pub fn quarantine_row(
    conn: &Connection,
    source_file: &str,
    line: usize,
    reasons: &[String],
    raw_row: &serde_json::Value,
) -> Result<()> {
    conn.execute(
        "INSERT INTO quarantine (source_file, line, reasons, raw_row, quarantined_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            source_file,
            line as i64,
            serde_json::to_string(reasons)?,
            serde_json::to_string(raw_row)?,
            ts(&Utc::now()),
        ],
    )?;
    Ok(())
}

pub fn list_quarantine(conn: &Connection) -> Result<Vec<QuarantinedRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, source_file, line, reasons, raw_row, quarantined_at
         FROM quarantine ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let line: i64 = row.get(2)?;
            Ok(QuarantinedRow {
                id: row.get(0)?,
                source_file: row.get(1)?,
                line: line as usize,
                reasons: json_col(row, 3)?,
                raw_row: json_col(row, 4)?,
                quarantined_at: time_col(row, 5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Verify record count
pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM records WHERE valid_until IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_events_for_entity, setup_database};
    use std::io::Write;

    const CSV: &str = "Name,Type,Role,City,Country,Website,External_ID,AUM_USD_M,Strategies,Geographies,Mandate,Data_Source,Updated_At
CalPERS,Pension,LP,Sacramento,USA,calpers.ca.gov,,502000,Buyout;Infrastructure,North America,,manual,2024-06-30
Sequoia Capital,Venture Capital,GP,Menlo Park,US,sequoiacap.com,,85000,Venture,Global,,bulk,2024-05-01
,Pension,LP,Boston,US,,,,,,,bulk,
Harvard Management Company,Endowment,LP,Boston,US,hmc.harvard.edu,,lots,,,,bulk,2024-01-01
";

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_import_quarantines_critical_rows() {
        let conn = setup();
        let file = write_csv(CSV);

        let summary = import_csv(&conn, file.path(), DataSource::BulkImport).unwrap();

        assert_eq!(summary.rows, 4);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.quarantined, 2);
        assert_eq!(summary.quality.total_rows, 4);
        assert_eq!(verify_count(&conn).unwrap(), 2);

        let quarantined = list_quarantine(&conn).unwrap();
        assert_eq!(quarantined.len(), 2);
        assert_eq!(quarantined[0].line, 4);
        assert!(!quarantined[0].reasons.is_empty());
        assert_eq!(quarantined[1].raw_row["Name"], "Harvard Management Company");

        println!("✅ Quarantine test PASSED");
    }

    #[test]
    fn test_idempotency_import_twice() {
        let conn = setup();
        let file = write_csv(CSV);

        let first = import_csv(&conn, file.path(), DataSource::BulkImport).unwrap();
        let second = import_csv(&conn, file.path(), DataSource::BulkImport).unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(verify_count(&conn).unwrap(), 2);

        println!("✅ Idempotency test PASSED: Import twice = same result");
    }

    #[test]
    fn test_load_round_trips_values() {
        let conn = setup();
        let file = write_csv(CSV);
        import_csv(&conn, file.path(), DataSource::BulkImport).unwrap();

        let records = load_records(&conn).unwrap();
        let calpers = records.iter().find(|r| r.name == "CalPERS").unwrap();

        assert_eq!(calpers.org_type, OrgType::Pension);
        assert_eq!(calpers.role, PartyRole::Lp);
        assert_eq!(calpers.country.as_deref(), Some("US"));
        assert_eq!(calpers.data_source, DataSource::ManualEntry);
        assert_eq!(calpers.aum_usd_m, Some(502_000.0));
        assert_eq!(calpers.strategies.len(), 2);
        assert_eq!(calpers.version, 1);
        assert!(calpers.is_current());
    }

    #[test]
    fn test_correction_creates_new_version() {
        let conn = setup();
        let record = OrganizationRecord::new("Blackstone", DataSource::BulkImport);
        insert_record(&conn, &record, "test").unwrap();

        let corrected = correct_record(&conn, &record.id, "add city", "analyst", |r| {
            r.city = Some("New York".to_string());
        })
        .unwrap();

        assert_eq!(corrected.id, record.id);
        assert_eq!(corrected.version, 2);

        let history = record_history(&conn, &record.id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].valid_until.is_some());
        assert!(history[1].is_current());

        let current = get_record(&conn, &record.id).unwrap().unwrap();
        assert_eq!(current.city.as_deref(), Some("New York"));
        assert_eq!(verify_count(&conn).unwrap(), 1);

        let events = get_events_for_entity(&conn, "record", &record.id).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_ingested_since() {
        let conn = setup();
        let before = Utc::now() - chrono::Duration::seconds(5);
        let record = OrganizationRecord::new("KKR", DataSource::BulkImport);
        insert_record(&conn, &record, "test").unwrap();

        assert_eq!(records_ingested_since(&conn, before).unwrap(), vec![record.id.clone()]);
        let after = Utc::now() + chrono::Duration::seconds(5);
        assert!(records_ingested_since(&conn, after).unwrap().is_empty());
    }
}
