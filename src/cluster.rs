// 🔗 Clusterer - Transitive closure over confirmed matches
//
// Union-find over every confirmed edge, processed in sorted order so the
// same edge set always yields the same clusters. Conflict detection runs on
// every multi-member cluster; a material conflict flags the cluster and
// holds back its golden record.

use crate::record::OrganizationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

// ============================================================================
// EDGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrigin {
    AutoMatch,
    Tiebreak,
    HumanReview,
}

impl EdgeOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeOrigin::AutoMatch => "auto_match",
            EdgeOrigin::Tiebreak => "tiebreak",
            EdgeOrigin::HumanReview => "human_review",
        }
    }

    pub fn parse(raw: &str) -> Option<EdgeOrigin> {
        match raw {
            "auto_match" => Some(EdgeOrigin::AutoMatch),
            "tiebreak" => Some(EdgeOrigin::Tiebreak),
            "human_review" => Some(EdgeOrigin::HumanReview),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedEdge {
    pub left_id: String,
    pub right_id: String,
    pub confidence: f64,
    pub origin: EdgeOrigin,
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConfirmedEdge {
    /// Ids are stored in canonical order (left < right)
    pub fn new(a: &str, b: &str, confidence: f64, origin: EdgeOrigin) -> Self {
        let (left, right) = canonical(a, b);
        ConfirmedEdge {
            left_id: left.to_string(),
            right_id: right.to_string(),
            confidence,
            origin,
            run_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.left_id, &self.right_id)
    }
}

pub fn canonical<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

// ============================================================================
// UNION-FIND
// ============================================================================

#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Union by size; equal sizes keep the lower index as root
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (root, child) = match self.size[ra].cmp(&self.size[rb]) {
            std::cmp::Ordering::Greater => (ra, rb),
            std::cmp::Ordering::Less => (rb, ra),
            std::cmp::Ordering::Equal => (ra.min(rb), ra.max(rb)),
        };
        self.parent[child] = root;
        self.size[root] += self.size[child];
        true
    }

    pub fn component_size(&mut self, x: usize) -> usize {
        let root = self.find(x);
        self.size[root]
    }

    /// Size of the component `a` and `b` would form if joined
    pub fn merged_size(&mut self, a: usize, b: usize) -> usize {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            self.size[ra]
        } else {
            self.size[ra] + self.size[rb]
        }
    }
}

// ============================================================================
// CLUSTERS + CONFLICTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    OrgType,
    Role,
    /// A reviewer said these two are different entities
    CannotLink,
    Country,
}

impl ConflictKind {
    pub fn is_material(&self) -> bool {
        !matches!(self, ConflictKind::Country)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConflict {
    pub kind: ConflictKind,
    pub left_id: String,
    pub right_id: String,
    pub left_value: Option<String>,
    pub right_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Clean,
    Flagged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCluster {
    /// SHA-256 of the sorted member ids
    pub id: String,
    pub members: Vec<String>,
    pub edges: Vec<ConfirmedEdge>,
    pub conflicts: Vec<ClusterConflict>,
    pub status: ClusterStatus,
    /// Lowest-confidence edge of a flagged cluster
    pub suspect_edge: Option<ConfirmedEdge>,
}

impl EntityCluster {
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    pub fn is_flagged(&self) -> bool {
        self.status == ClusterStatus::Flagged
    }

    pub fn material_conflicts(&self) -> impl Iterator<Item = &ClusterConflict> {
        self.conflicts.iter().filter(|c| c.kind.is_material())
    }
}

pub fn cluster_id(members: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(members.join("\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Type and role pairs a reviewer has already accepted by approving a pair
/// that carries them, keyed as (kind, lower value, higher value)
fn accepted_values(
    members: &[&OrganizationRecord],
    approved: &BTreeSet<(String, String)>,
) -> BTreeSet<(ConflictKind, String, String)> {
    let by_id: HashMap<&str, &OrganizationRecord> = members.iter().map(|r| (r.id.as_str(), *r)).collect();
    let mut accepted = BTreeSet::new();
    for (l, r) in approved {
        let (Some(a), Some(b)) = (by_id.get(l.as_str()), by_id.get(r.as_str())) else {
            continue;
        };
        if a.org_type.is_known() && b.org_type.is_known() && a.org_type != b.org_type {
            let (x, y) = canonical(a.org_type.as_str(), b.org_type.as_str());
            accepted.insert((ConflictKind::OrgType, x.to_string(), y.to_string()));
        }
        if a.role.is_known() && b.role.is_known() && a.role != b.role {
            let (x, y) = canonical(a.role.as_str(), b.role.as_str());
            accepted.insert((ConflictKind::Role, x.to_string(), y.to_string()));
        }
    }
    accepted
}

fn detect_conflicts(
    members: &[&OrganizationRecord],
    cannot_links: &BTreeSet<(String, String)>,
    approved: &BTreeSet<(String, String)>,
) -> Vec<ClusterConflict> {
    let accepted = accepted_values(members, approved);
    let is_accepted = |kind: ConflictKind, left: &str, right: &str| {
        let (x, y) = canonical(left, right);
        accepted.contains(&(kind, x.to_string(), y.to_string()))
    };
    let mut conflicts = Vec::new();

    for (i, a) in members.iter().enumerate() {
        for b in &members[i + 1..] {
            let conflict = |kind: ConflictKind, left_value: Option<&str>, right_value: Option<&str>| ClusterConflict {
                kind,
                left_id: a.id.clone(),
                right_id: b.id.clone(),
                left_value: left_value.map(str::to_string),
                right_value: right_value.map(str::to_string),
            };

            if a.org_type.is_known()
                && b.org_type.is_known()
                && a.org_type != b.org_type
                && !is_accepted(ConflictKind::OrgType, a.org_type.as_str(), b.org_type.as_str())
            {
                conflicts.push(conflict(
                    ConflictKind::OrgType,
                    Some(a.org_type.as_str()),
                    Some(b.org_type.as_str()),
                ));
            }
            if a.role.is_known()
                && b.role.is_known()
                && a.role != b.role
                && !is_accepted(ConflictKind::Role, a.role.as_str(), b.role.as_str())
            {
                conflicts.push(conflict(ConflictKind::Role, Some(a.role.as_str()), Some(b.role.as_str())));
            }
            if let (Some(ca), Some(cb)) = (&a.country, &b.country) {
                if ca != cb {
                    conflicts.push(conflict(ConflictKind::Country, Some(ca.as_str()), Some(cb.as_str())));
                }
            }
            let (l, r) = canonical(&a.id, &b.id);
            if cannot_links.contains(&(l.to_string(), r.to_string())) {
                conflicts.push(conflict(ConflictKind::CannotLink, None, None));
            }
        }
    }
    conflicts
}

#[derive(Debug, Clone, Default)]
pub struct Clusterer;

impl Clusterer {
    pub fn new() -> Self {
        Clusterer
    }

    /// Every record lands in exactly one cluster; singletons included.
    /// Edges naming records outside `records` are ignored. A type or role
    /// mismatch carried by a human-approved edge is accepted for the whole
    /// cluster; cannot-links always stay material.
    pub fn cluster(
        &self,
        records: &[OrganizationRecord],
        edges: &[ConfirmedEdge],
        cannot_links: &BTreeSet<(String, String)>,
    ) -> Vec<EntityCluster> {
        // Sorted ids make the union order independent of input order
        let mut ordered: Vec<&OrganizationRecord> = records.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));
        let index: HashMap<&str, usize> = ordered
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.as_str(), i))
            .collect();

        // Strongest confidence wins when the same pair arrives twice
        let mut unique: BTreeMap<(String, String), &ConfirmedEdge> = BTreeMap::new();
        for edge in edges {
            let (l, r) = canonical(&edge.left_id, &edge.right_id);
            if l == r {
                continue;
            }
            let key = (l.to_string(), r.to_string());
            match unique.get(&key) {
                Some(existing) if existing.confidence >= edge.confidence => {}
                _ => {
                    unique.insert(key, edge);
                }
            }
        }

        let approved: BTreeSet<(String, String)> = unique
            .iter()
            .filter(|(_, e)| e.origin == EdgeOrigin::HumanReview)
            .map(|(key, _)| key.clone())
            .collect();

        let mut uf = UnionFind::new(ordered.len());
        let mut skipped = 0usize;
        for (l, r) in unique.keys() {
            match (index.get(l.as_str()), index.get(r.as_str())) {
                (Some(&a), Some(&b)) => {
                    uf.union(a, b);
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(skipped, "edges reference records outside this run");
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..ordered.len() {
            groups.entry(uf.find(i)).or_default().push(i);
        }

        let mut clusters: Vec<EntityCluster> = groups
            .into_values()
            .map(|rows| {
                let members: Vec<String> = rows.iter().map(|&i| ordered[i].id.clone()).collect();
                let member_set: BTreeSet<&str> = members.iter().map(|s| s.as_str()).collect();
                let cluster_edges: Vec<ConfirmedEdge> = unique
                    .iter()
                    .filter(|((l, r), _)| member_set.contains(l.as_str()) && member_set.contains(r.as_str()))
                    .map(|(_, e)| {
                        let mut edge = (*e).clone();
                        let (l, r) = canonical(&e.left_id, &e.right_id);
                        edge.left_id = l.to_string();
                        edge.right_id = r.to_string();
                        edge
                    })
                    .collect();

                let records: Vec<&OrganizationRecord> = rows.iter().map(|&i| ordered[i]).collect();
                let conflicts = detect_conflicts(&records, cannot_links, &approved);
                let flagged = conflicts.iter().any(|c| c.kind.is_material());
                let suspect_edge = if flagged {
                    cluster_edges
                        .iter()
                        .min_by(|a, b| a.confidence.total_cmp(&b.confidence).then_with(|| a.key().cmp(&b.key())))
                        .cloned()
                } else {
                    None
                };

                EntityCluster {
                    id: cluster_id(&members),
                    members,
                    edges: cluster_edges,
                    conflicts,
                    status: if flagged {
                        ClusterStatus::Flagged
                    } else {
                        ClusterStatus::Clean
                    },
                    suspect_edge,
                }
            })
            .collect();

        clusters.sort_by(|a, b| a.members.cmp(&b.members));

        let flagged = clusters.iter().filter(|c| c.is_flagged()).count();
        if flagged > 0 {
            warn!(flagged, "clusters with material conflicts held back from golden build");
        }
        clusters
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Org;
    use crate::record::OrgType;

    fn records() -> Vec<OrganizationRecord> {
        vec![
            Org::new("a", "Alpha Pension").kind(OrgType::Pension).lp().at("Boston", "US").build(),
            Org::new("b", "Alpha Pension Fund").kind(OrgType::Pension).lp().at("Boston", "US").build(),
            Org::new("c", "Alpha Pension Plan").kind(OrgType::Pension).lp().build(),
            Org::new("d", "Beta Capital").kind(OrgType::PrivateEquity).gp().build(),
            Org::new("e", "Beta Capital Partners").build(),
        ]
    }

    fn edge(a: &str, b: &str, confidence: f64) -> ConfirmedEdge {
        ConfirmedEdge::new(a, b, confidence, EdgeOrigin::AutoMatch)
    }

    fn members(clusters: &[EntityCluster]) -> Vec<Vec<String>> {
        clusters.iter().map(|c| c.members.clone()).collect()
    }

    #[test]
    fn test_transitive_closure_with_singletons() {
        let clusters = Clusterer::new().cluster(
            &records(),
            &[edge("b", "a", 0.9), edge("c", "b", 0.85)],
            &BTreeSet::new(),
        );

        assert_eq!(
            members(&clusters),
            vec![
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                vec!["d".to_string()],
                vec!["e".to_string()],
            ]
        );
        assert_eq!(clusters[0].edges.len(), 2);
        assert_eq!(clusters[0].edges[0].left_id, "a");
        assert!(clusters.iter().all(|c| c.status == ClusterStatus::Clean));
        assert!(clusters[1].is_singleton());
    }

    #[test]
    fn test_same_edges_any_order_same_clusters() {
        let edges = vec![edge("a", "b", 0.9), edge("b", "c", 0.85), edge("d", "e", 0.95)];
        let mut reversed = edges.clone();
        reversed.reverse();

        let mut shuffled_records = records();
        shuffled_records.reverse();

        let first = Clusterer::new().cluster(&records(), &edges, &BTreeSet::new());
        let second = Clusterer::new().cluster(&shuffled_records, &reversed, &BTreeSet::new());
        assert_eq!(
            first.iter().map(|c| &c.id).collect::<Vec<_>>(),
            second.iter().map(|c| &c.id).collect::<Vec<_>>()
        );
        assert_eq!(members(&first), members(&second));
    }

    #[test]
    fn test_contradictory_types_flag_and_name_weakest_edge() {
        let clusters = Clusterer::new().cluster(
            &records(),
            &[edge("a", "b", 0.95), edge("b", "d", 0.81)],
            &BTreeSet::new(),
        );
        let merged = &clusters[0];

        assert!(merged.is_flagged());
        assert!(merged
            .material_conflicts()
            .any(|c| c.kind == ConflictKind::OrgType && c.left_id == "a" && c.right_id == "d"));
        assert!(merged.conflicts.iter().any(|c| c.kind == ConflictKind::Role));
        let suspect = merged.suspect_edge.as_ref().unwrap();
        assert_eq!(suspect.key(), ("b", "d"));
    }

    #[test]
    fn test_human_approved_conflict_is_accepted() {
        // Reviewer confirmed a and d despite pension/LP vs PE/GP
        let edges = vec![
            edge("a", "b", 0.95),
            edge("b", "d", 0.81),
            ConfirmedEdge::new("a", "d", 1.0, EdgeOrigin::HumanReview),
        ];
        let clusters = Clusterer::new().cluster(&records(), &edges, &BTreeSet::new());
        let merged = &clusters[0];

        assert_eq!(merged.members, vec!["a".to_string(), "b".to_string(), "d".to_string()]);
        assert_eq!(merged.status, ClusterStatus::Clean);
        assert_eq!(merged.material_conflicts().count(), 0);
        assert!(merged.suspect_edge.is_none());

        // Approval does not override a reviewer's cannot-link
        let cannot: BTreeSet<(String, String)> = [("b".to_string(), "d".to_string())].into_iter().collect();
        let clusters = Clusterer::new().cluster(&records(), &edges, &cannot);
        assert!(clusters[0].is_flagged());
        assert!(clusters[0].material_conflicts().all(|c| c.kind == ConflictKind::CannotLink));

        println!("✅ Human-approved conflict test PASSED");
    }

    #[test]
    fn test_cannot_link_is_material() {
        let cannot: BTreeSet<(String, String)> = [("a".to_string(), "c".to_string())].into_iter().collect();
        let clusters = Clusterer::new().cluster(
            &records(),
            &[edge("a", "b", 0.9), edge("b", "c", 0.9)],
            &cannot,
        );
        assert!(clusters[0].is_flagged());
        assert!(clusters[0].conflicts.iter().any(|c| c.kind == ConflictKind::CannotLink));
    }

    #[test]
    fn test_country_difference_is_informational() {
        let recs = vec![
            Org::new("x", "Gamma Fund").at("London", "GB").build(),
            Org::new("y", "Gamma Fund").at("New York", "US").build(),
        ];
        let clusters = Clusterer::new().cluster(&recs, &[edge("x", "y", 0.9)], &BTreeSet::new());

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].status, ClusterStatus::Clean);
        assert_eq!(clusters[0].conflicts[0].kind, ConflictKind::Country);
        assert!(clusters[0].suspect_edge.is_none());
    }

    #[test]
    fn test_unknown_edges_are_ignored() {
        let clusters = Clusterer::new().cluster(&records(), &[edge("a", "zz", 0.99)], &BTreeSet::new());
        assert_eq!(clusters.len(), 5);
    }

    #[test]
    fn test_merged_size_preview() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(1, 2);
        assert_eq!(uf.merged_size(0, 3), 4);
        assert_eq!(uf.merged_size(0, 2), 3);
        assert_eq!(uf.component_size(3), 1);
    }
}
