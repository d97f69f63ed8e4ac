// 👑 Golden Record Builder - One authoritative view per entity
//
// Per field: non-null beats null, then source priority, then the most
// recent assertion, then the lowest record id. Losing values that disagree
// are kept as conflicts. Golden ids stay stable across runs by member
// overlap; content changes write a new version and never touch the old one.

use crate::cluster::EntityCluster;
use crate::record::{DataSource, OrganizationRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenField {
    pub value: Value,
    pub source: DataSource,
    pub record_id: String,
    pub updated_at: DateTime<Utc>,
    /// Source weight x share of non-null candidates agreeing with the winner
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub winning_value: Value,
    pub winning_record: String,
    pub losing_value: Value,
    pub losing_record: String,
    pub losing_source: DataSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenRecord {
    pub golden_id: String,
    pub version: i64,
    pub cluster_id: String,
    pub members: Vec<String>,
    pub fields: BTreeMap<String, GoldenField>,
    pub conflicts: Vec<FieldConflict>,
    pub content_hash: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl GoldenRecord {
    pub fn is_current(&self) -> bool {
        self.valid_until.is_none()
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(|f| f.value.as_str())
    }

    /// One append-only provenance row per field of this version
    pub fn provenance(&self, written_at: DateTime<Utc>) -> Vec<FieldProvenance> {
        self.fields
            .iter()
            .map(|(field, f)| FieldProvenance {
                golden_id: self.golden_id.clone(),
                version: self.version,
                field: field.clone(),
                value: f.value.clone(),
                source: f.source,
                record_id: f.record_id.clone(),
                updated_at: f.updated_at,
                written_at,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub golden_id: String,
    pub version: i64,
    pub field: String,
    pub value: Value,
    pub source: DataSource,
    pub record_id: String,
    pub updated_at: DateTime<Utc>,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildAction {
    Created,
    /// New version; the previous one gets `valid_until`
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoldenBuild {
    pub record: GoldenRecord,
    pub action: BuildAction,
}

#[derive(Debug, Clone, Default)]
pub struct GoldenPlan {
    pub builds: Vec<GoldenBuild>,
    /// Current golden ids no cluster claims anymore
    pub retired: Vec<String>,
    /// Flagged clusters with no golden build this run
    pub held_back: Vec<String>,
}

impl GoldenPlan {
    pub fn count(&self, action: BuildAction) -> usize {
        self.builds.iter().filter(|b| b.action == action).count()
    }
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct GoldenRecordBuilder {
    /// Position in the priority table (0 = most trusted)
    rank: HashMap<DataSource, usize>,
}

struct Candidate<'a> {
    value: Value,
    record: &'a OrganizationRecord,
}

/// Values compare case- and whitespace-insensitively for agreement
fn comparable(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_lowercase()),
        Value::Array(items) => Value::Array(items.iter().map(comparable).collect()),
        other => other.clone(),
    }
}

impl GoldenRecordBuilder {
    /// `priority` lists sources from most to least trusted
    pub fn new(priority: &[DataSource]) -> Self {
        let rank = priority.iter().enumerate().map(|(i, s)| (*s, i)).collect();
        GoldenRecordBuilder { rank }
    }

    fn rank_of(&self, source: DataSource) -> usize {
        self.rank.get(&source).copied().unwrap_or(usize::MAX)
    }

    /// Field-level merge of a set of records
    pub fn merge(&self, members: &[&OrganizationRecord]) -> (BTreeMap<String, GoldenField>, Vec<FieldConflict>) {
        let mut per_field: BTreeMap<&'static str, Vec<Candidate>> = BTreeMap::new();
        for record in members {
            for (field, value) in record.field_values() {
                let entry = per_field.entry(field).or_default();
                if !value.is_null() {
                    entry.push(Candidate { value, record });
                }
            }
        }

        let mut fields = BTreeMap::new();
        let mut conflicts = Vec::new();

        for (field, mut candidates) in per_field {
            if candidates.is_empty() {
                continue;
            }
            candidates.sort_by(|a, b| {
                self.rank_of(a.record.data_source)
                    .cmp(&self.rank_of(b.record.data_source))
                    .then(b.record.updated_at.cmp(&a.record.updated_at))
                    .then(a.record.id.cmp(&b.record.id))
            });

            let winner = &candidates[0];
            let winning = comparable(&winner.value);
            let agreeing = candidates
                .iter()
                .filter(|c| comparable(&c.value) == winning)
                .count();

            for loser in candidates.iter().skip(1) {
                if comparable(&loser.value) != winning {
                    conflicts.push(FieldConflict {
                        field: field.to_string(),
                        winning_value: winner.value.clone(),
                        winning_record: winner.record.id.clone(),
                        losing_value: loser.value.clone(),
                        losing_record: loser.record.id.clone(),
                        losing_source: loser.record.data_source,
                    });
                }
            }

            fields.insert(
                field.to_string(),
                GoldenField {
                    value: winner.value.clone(),
                    source: winner.record.data_source,
                    record_id: winner.record.id.clone(),
                    updated_at: winner.record.updated_at,
                    confidence: winner.record.data_source.base_weight() * agreeing as f64
                        / candidates.len() as f64,
                },
            );
        }

        (fields, conflicts)
    }

    /// Build one cluster's golden record against its previous version
    pub fn build(
        &self,
        cluster: &EntityCluster,
        records: &HashMap<String, OrganizationRecord>,
        previous: Option<&GoldenRecord>,
    ) -> GoldenBuild {
        let members: Vec<&OrganizationRecord> = cluster
            .members
            .iter()
            .filter_map(|id| records.get(id))
            .collect();
        let (fields, conflicts) = self.merge(&members);
        let content_hash = content_hash(&cluster.members, &fields);

        match previous {
            Some(prev) if prev.content_hash == content_hash => GoldenBuild {
                record: prev.clone(),
                action: BuildAction::Unchanged,
            },
            Some(prev) => GoldenBuild {
                record: GoldenRecord {
                    golden_id: prev.golden_id.clone(),
                    version: prev.version + 1,
                    cluster_id: cluster.id.clone(),
                    members: cluster.members.clone(),
                    fields,
                    conflicts,
                    content_hash,
                    valid_from: Utc::now(),
                    valid_until: None,
                },
                action: BuildAction::Updated,
            },
            None => GoldenBuild {
                record: GoldenRecord {
                    golden_id: uuid::Uuid::new_v4().to_string(),
                    version: 1,
                    cluster_id: cluster.id.clone(),
                    members: cluster.members.clone(),
                    fields,
                    conflicts,
                    content_hash,
                    valid_from: Utc::now(),
                    valid_until: None,
                },
                action: BuildAction::Created,
            },
        }
    }

    /// Build every clean cluster, reusing golden ids by member overlap and
    /// retiring current golden records no cluster claims
    pub fn build_all(
        &self,
        clusters: &[EntityCluster],
        records: &HashMap<String, OrganizationRecord>,
        current: &[GoldenRecord],
    ) -> GoldenPlan {
        let assignment = assign_golden_ids(clusters, current);
        let by_id: HashMap<&str, &GoldenRecord> =
            current.iter().map(|g| (g.golden_id.as_str(), g)).collect();

        let mut plan = GoldenPlan::default();
        for cluster in clusters {
            if cluster.is_flagged() {
                plan.held_back.push(cluster.id.clone());
                continue;
            }
            let previous = assignment
                .get(cluster.id.as_str())
                .and_then(|gid| by_id.get(gid.as_str()).copied());
            plan.builds.push(self.build(cluster, records, previous));
        }

        let claimed: BTreeSet<&String> = assignment.values().collect();
        plan.retired = current
            .iter()
            .filter(|g| !claimed.contains(&g.golden_id))
            .map(|g| g.golden_id.clone())
            .collect();
        plan.retired.sort();

        info!(
            created = plan.count(BuildAction::Created),
            updated = plan.count(BuildAction::Updated),
            unchanged = plan.count(BuildAction::Unchanged),
            retired = plan.retired.len(),
            held_back = plan.held_back.len(),
            "golden records built"
        );
        plan
    }
}

impl Default for GoldenRecordBuilder {
    fn default() -> Self {
        GoldenRecordBuilder::new(&DataSource::ALL)
    }
}

pub fn content_hash(members: &[String], fields: &BTreeMap<String, GoldenField>) -> String {
    let content: BTreeMap<&str, (&Value, &str)> = fields
        .iter()
        .map(|(k, f)| (k.as_str(), (&f.value, f.record_id.as_str())))
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(members.join("\n").as_bytes());
    hasher.update(b"\n--\n");
    hasher.update(serde_json::to_string(&content).unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// cluster id -> golden id. Largest overlap claims first; ties go to the
/// lowest golden id, then the lowest cluster id. Flagged clusters claim too
/// so their golden record is kept while the conflict is open.
pub fn assign_golden_ids(clusters: &[EntityCluster], current: &[GoldenRecord]) -> HashMap<String, String> {
    let mut owner: HashMap<&str, &str> = HashMap::new();
    for golden in current.iter().filter(|g| g.is_current()) {
        for member in &golden.members {
            owner.insert(member.as_str(), golden.golden_id.as_str());
        }
    }

    let mut overlaps: Vec<(usize, &str, &str)> = Vec::new();
    for cluster in clusters {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for member in &cluster.members {
            if let Some(gid) = owner.get(member.as_str()) {
                *counts.entry(gid).or_default() += 1;
            }
        }
        for (gid, count) in counts {
            overlaps.push((count, gid, cluster.id.as_str()));
        }
    }
    overlaps.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(b.1)).then(a.2.cmp(b.2)));

    let mut assignment = HashMap::new();
    let mut taken: BTreeSet<&str> = BTreeSet::new();
    for (_, gid, cid) in overlaps {
        if taken.contains(gid) || assignment.contains_key(cid) {
            continue;
        }
        debug!(golden_id = gid, cluster_id = cid, "golden id reused");
        taken.insert(gid);
        assignment.insert(cid.to_string(), gid.to_string());
    }
    assignment
}

// ============================================================================
// TESTS
// ============================================================================
