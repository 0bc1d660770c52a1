// src/model/store.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, EngineResult};

pub type StoreCode = String;
pub type ClusterId = u32;

/// One row of the cluster assignment table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub str_code: StoreCode,
    #[serde(alias = "Cluster")]
    pub cluster_id: ClusterId,
}

/// Stable store -> cluster mapping for one analysis period.
///
/// Membership is fixed for the lifetime of a run. Iteration is always in
/// store-code order so every consumer sees the same sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMap {
    assignments: BTreeMap<StoreCode, ClusterId>,
}

impl ClusterMap {
    /// Builds the map from raw assignment rows.
    ///
    /// A store listed twice keeps its first cluster; the conflicting row is
    /// reported and ignored.
    pub fn from_assignments<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = ClusterAssignment>,
    {
        let mut assignments = BTreeMap::new();
        for row in rows {
            match assignments.get(&row.str_code) {
                Some(&existing) if existing != row.cluster_id => {
                    warn!(
                        str_code = %row.str_code,
                        kept = existing,
                        ignored = row.cluster_id,
                        "store assigned to more than one cluster"
                    );
                }
                Some(_) => {}
                None => {
                    assignments.insert(row.str_code, row.cluster_id);
                }
            }
        }
        Self { assignments }
    }

    pub fn cluster_of(&self, str_code: &str) -> Option<ClusterId> {
        self.assignments.get(str_code).copied()
    }

    pub fn stores(&self) -> impl Iterator<Item = (&StoreCode, ClusterId)> {
        self.assignments.iter().map(|(code, &cluster)| (code, cluster))
    }

    /// Groups stores by cluster. Member lists are sorted by store code.
    pub fn members(&self) -> BTreeMap<ClusterId, Vec<StoreCode>> {
        let mut groups: BTreeMap<ClusterId, Vec<StoreCode>> = BTreeMap::new();
        for (code, cluster) in self.stores() {
            groups.entry(cluster).or_default().push(code.clone());
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Supplies the store -> cluster assignment every rule groups by.
///
/// The partitioning algorithm behind it is not part of this crate; anything
/// that can hand back a stable map qualifies.
pub trait ClusterAssignmentProvider {
    fn assign(&self) -> EngineResult<ClusterMap>;
}

/// Asks a provider for assignments. A missing source comes back as `None`
/// so rules can report it individually; other failures propagate.
pub fn resolve_clusters(provider: &dyn ClusterAssignmentProvider) -> EngineResult<Option<ClusterMap>> {
    match provider.assign() {
        Ok(map) => Ok(Some(map)),
        Err(EngineError::MissingInput { what, path }) => {
            warn!(what, path = %path.display(), "cluster assignments unavailable");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl ClusterAssignmentProvider for ClusterMap {
    fn assign(&self) -> EngineResult<ClusterMap> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(code: &str, cluster: ClusterId) -> ClusterAssignment {
        ClusterAssignment {
            str_code: code.into(),
            cluster_id: cluster,
        }
    }

    #[test]
    fn members_are_grouped_and_sorted() {
        let map = ClusterMap::from_assignments(vec![row("S3", 1), row("S1", 1), row("S2", 2)]);
        let members = map.members();
        assert_eq!(members[&1], vec!["S1".to_string(), "S3".to_string()]);
        assert_eq!(members[&2], vec!["S2".to_string()]);
    }

    #[test]
    fn first_assignment_wins_on_conflict() {
        let map = ClusterMap::from_assignments(vec![row("S1", 4), row("S1", 9)]);
        assert_eq!(map.cluster_of("S1"), Some(4));
        assert_eq!(map.len(), 1);
    }
}
