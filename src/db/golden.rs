// 👑 Golden storage - versioned golden records and field provenance

use super::{enum_col, insert_event, json_col, opt_time_col, time_col, ts, Event};
use crate::golden::{BuildAction, FieldProvenance, GoldenPlan, GoldenRecord};
use crate::record::DataSource;
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldenWriteSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub retired: usize,
}

/// Apply a build plan. New versions close the previous one; provenance
/// rows are only ever appended.
pub fn save_golden_plan(conn: &Connection, plan: &GoldenPlan, actor: &str) -> Result<GoldenWriteSummary> {
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now();
    let mut summary = GoldenWriteSummary::default();

    for build in &plan.builds {
        let golden = &build.record;
        match build.action {
            BuildAction::Unchanged => {
                summary.unchanged += 1;
                continue;
            }
            BuildAction::Updated => {
                tx.execute(
                    "UPDATE golden_records SET valid_until = ?1
                     WHERE golden_id = ?2 AND valid_until IS NULL",
                    params![ts(&golden.valid_from), golden.golden_id],
                )?;
                summary.updated += 1;
            }
            BuildAction::Created => summary.created += 1,
        }

        insert_golden(&tx, golden)?;
        for row in golden.provenance(now) {
            insert_provenance(&tx, &row)?;
        }

        let event = Event::new(
            if build.action == BuildAction::Created { "golden_created" } else { "golden_versioned" },
            "golden_record",
            &golden.golden_id,
            serde_json::json!({
                "version": golden.version,
                "cluster_id": golden.cluster_id,
                "members": golden.members,
                "conflicts": golden.conflicts.len(),
            }),
            actor,
        );
        insert_event(&tx, &event)?;
    }

    for golden_id in &plan.retired {
        let closed = tx.execute(
            "UPDATE golden_records SET valid_until = ?1
             WHERE golden_id = ?2 AND valid_until IS NULL",
            params![ts(&now), golden_id],
        )?;
        if closed > 0 {
            summary.retired += 1;
            let event = Event::new(
                "golden_retired",
                "golden_record",
                golden_id,
                serde_json::json!({}),
                actor,
            );
            insert_event(&tx, &event)?;
        }
    }

    tx.commit()?;
    Ok(summary)
}

fn insert_golden(conn: &Connection, golden: &GoldenRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO golden_records (
            golden_id, version, cluster_id, members, fields, conflicts,
            content_hash, valid_from, valid_until
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            golden.golden_id,
            golden.version,
            golden.cluster_id,
            serde_json::to_string(&golden.members)?,
            serde_json::to_string(&golden.fields)?,
            serde_json::to_string(&golden.conflicts)?,
            golden.content_hash,
            ts(&golden.valid_from),
            golden.valid_until.as_ref().map(ts),
        ],
    )?;
    Ok(())
}

fn insert_provenance(conn: &Connection, row: &FieldProvenance) -> Result<()> {
    conn.execute(
        "INSERT INTO field_provenance (
            golden_id, version, field, value, source, record_id, updated_at, written_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.golden_id,
            row.version,
            row.field,
            serde_json::to_string(&row.value)?,
            row.source.as_str(),
            row.record_id,
            ts(&row.updated_at),
            ts(&row.written_at),
        ],
    )?;
    Ok(())
}

const GOLDEN_COLUMNS: &str = "golden_id, version, cluster_id, members, fields, conflicts,
    content_hash, valid_from, valid_until";

fn golden_from_row(row: &Row) -> rusqlite::Result<GoldenRecord> {
    Ok(GoldenRecord {
        golden_id: row.get(0)?,
        version: row.get(1)?,
        cluster_id: row.get(2)?,
        members: json_col(row, 3)?,
        fields: json_col(row, 4)?,
        conflicts: json_col(row, 5)?,
        content_hash: row.get(6)?,
        valid_from: time_col(row, 7)?,
        valid_until: opt_time_col(row, 8)?,
    })
}

pub fn current_golden_records(conn: &Connection) -> Result<Vec<GoldenRecord>> {
    let sql = format!(
        "SELECT {} FROM golden_records WHERE valid_until IS NULL ORDER BY golden_id",
        GOLDEN_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map([], golden_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Current version of one golden record
pub fn get_golden(conn: &Connection, golden_id: &str) -> Result<Option<GoldenRecord>> {
    let sql = format!(
        "SELECT {} FROM golden_records WHERE golden_id = ?1 AND valid_until IS NULL",
        GOLDEN_COLUMNS
    );
    let record = conn
        .query_row(&sql, params![golden_id], golden_from_row)
        .optional()?;
    Ok(record)
}

/// Every version, oldest first
pub fn golden_history(conn: &Connection, golden_id: &str) -> Result<Vec<GoldenRecord>> {
    let sql = format!(
        "SELECT {} FROM golden_records WHERE golden_id = ?1 ORDER BY version",
        GOLDEN_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![golden_id], golden_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn field_provenance(conn: &Connection, golden_id: &str) -> Result<Vec<FieldProvenance>> {
    let mut stmt = conn.prepare(
        "SELECT golden_id, version, field, value, source, record_id, updated_at, written_at
         FROM field_provenance WHERE golden_id = ?1
         ORDER BY version, field",
    )?;
    let rows = stmt
        .query_map(params![golden_id], |row| {
            Ok(FieldProvenance {
                golden_id: row.get(0)?,
                version: row.get(1)?,
                field: row.get(2)?,
                value: json_col(row, 3)?,
                source: enum_col(row, 4, DataSource::parse)?,
                record_id: row.get(5)?,
                updated_at: time_col(row, 6)?,
                written_at: time_col(row, 7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{cluster_id, ClusterStatus, EntityCluster};
    use crate::db::setup_database;
    use crate::fixtures::Org;
    use crate::golden::GoldenRecordBuilder;
    use crate::record::OrganizationRecord;
    use std::collections::HashMap;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn cluster(members: &[&str]) -> EntityCluster {
        let members: Vec<String> = members.iter().map(|s| s.to_string()).collect();
        EntityCluster {
            id: cluster_id(&members),
            members,
            edges: vec![],
            conflicts: vec![],
            status: ClusterStatus::Clean,
            suspect_edge: None,
        }
    }

    fn records(city: &str) -> HashMap<String, OrganizationRecord> {
        vec![
            Org::new("m1", "CalPERS").source(DataSource::ManualEntry).at(city, "US").build(),
            Org::new("m2", "California Public Employees' Retirement System")
                .source(DataSource::BulkImport)
                .build(),
        ]
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect()
    }

    #[test]
    fn test_versions_are_appended_and_closed() {
        let conn = setup();
        let builder = GoldenRecordBuilder::default();
        let clusters = vec![cluster(&["m1", "m2"])];

        let plan = builder.build_all(&clusters, &records("Sacramento"), &[]);
        let first = save_golden_plan(&conn, &plan, "test").unwrap();
        assert_eq!(first.created, 1);

        // Same inputs: nothing new is written
        let current = current_golden_records(&conn).unwrap();
        let plan = builder.build_all(&clusters, &records("Sacramento"), &current);
        let second = save_golden_plan(&conn, &plan, "test").unwrap();
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.created + second.updated, 0);

        // Changed city: version 2 supersedes version 1
        let plan = builder.build_all(&clusters, &records("Los Angeles"), &current);
        let third = save_golden_plan(&conn, &plan, "test").unwrap();
        assert_eq!(third.updated, 1);

        let golden_id = &current[0].golden_id;
        let history = golden_history(&conn, golden_id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].valid_until.is_some());
        assert_eq!(history[1].version, 2);

        let latest = get_golden(&conn, golden_id).unwrap().unwrap();
        assert_eq!(latest.fields["city"].value, serde_json::json!("Los Angeles"));
        assert_eq!(latest.name(), Some("CalPERS"));

        let provenance = field_provenance(&conn, golden_id).unwrap();
        assert!(provenance.iter().any(|p| p.version == 1 && p.field == "city"));
        assert!(provenance.iter().any(|p| p.version == 2 && p.field == "city"));

        println!("✅ Golden versioning test PASSED");
    }

    #[test]
    fn test_orphans_are_retired() {
        let conn = setup();
        let builder = GoldenRecordBuilder::default();

        let plan = builder.build_all(&[cluster(&["m1", "m2"])], &records("Sacramento"), &[]);
        save_golden_plan(&conn, &plan, "test").unwrap();
        let current = current_golden_records(&conn).unwrap();

        let plan = builder.build_all(&[], &records("Sacramento"), &current);
        let summary = save_golden_plan(&conn, &plan, "test").unwrap();

        assert_eq!(summary.retired, 1);
        assert!(current_golden_records(&conn).unwrap().is_empty());
        assert_eq!(golden_history(&conn, &current[0].golden_id).unwrap().len(), 1);
    }
}
