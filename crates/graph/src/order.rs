//! Topological ordering for create and destroy passes.
//!
//! Resources are grouped into levels: every dependency of a resource in level
//! N sits in levels 0..N-1, so a level can be created concurrently. Destroy
//! walks the levels in reverse.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::GraphError;
use crate::graph::ResourceId;

/// Ordered levels of resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOrder {
    groups: Vec<Vec<ResourceId>>,
}

impl CreateOrder {
    /// Compute levels with Kahn's algorithm.
    ///
    /// Dependencies on resources outside the given set are ignored, which lets
    /// the same routine order recorded state whose upstreams were already
    /// removed. Within a level, names are sorted for a stable order.
    ///
    /// # Errors
    /// Returns [`GraphError::Cycle`] with the resources that could not be placed.
    pub fn compute<'a, I>(edges: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (&'a ResourceId, &'a BTreeSet<ResourceId>)>,
    {
        let deps: BTreeMap<&ResourceId, &BTreeSet<ResourceId>> = edges.into_iter().collect();
        let all: BTreeSet<&ResourceId> = deps.keys().copied().collect();

        let mut placed: BTreeSet<&ResourceId> = BTreeSet::new();
        let mut groups = Vec::new();

        while placed.len() < all.len() {
            let group: Vec<&ResourceId> = all
                .iter()
                .copied()
                .filter(|id| !placed.contains(id))
                .filter(|id| {
                    deps[id]
                        .iter()
                        .filter(|d| all.contains(d))
                        .all(|d| placed.contains(d))
                })
                .collect();

            if group.is_empty() {
                let stuck = all
                    .iter()
                    .filter(|id| !placed.contains(*id))
                    .map(|id| (*id).clone())
                    .collect();
                return Err(GraphError::Cycle(stuck));
            }

            debug!(level = groups.len(), resources = group.len(), "Computed level");
            placed.extend(group.iter().copied());
            groups.push(group.into_iter().cloned().collect());
        }

        Ok(Self { groups })
    }

    /// Levels in creation order.
    #[must_use]
    pub fn groups(&self) -> &[Vec<ResourceId>] {
        &self.groups
    }

    /// All resources in creation order.
    #[must_use]
    pub fn creation(&self) -> Vec<ResourceId> {
        self.groups.iter().flatten().cloned().collect()
    }

    /// All resources in destruction order.
    #[must_use]
    pub fn destruction(&self) -> Vec<ResourceId> {
        self.groups.iter().rev().flatten().cloned().collect()
    }

    /// Level index of a resource.
    #[must_use]
    pub fn level(&self, id: &ResourceId) -> Option<usize> {
        self.groups.iter().position(|g| g.contains(id))
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Whether there are no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::new(s).unwrap()
    }

    fn edges(spec: &[(&str, &[&str])]) -> Vec<(ResourceId, BTreeSet<ResourceId>)> {
        spec.iter()
            .map(|(n, ds)| (id(n), ds.iter().map(|d| id(d)).collect()))
            .collect()
    }

    #[test]
    fn test_linear_chain() {
        let e = edges(&[("subnet", &["vpc"]), ("vpc", &[]), ("nat", &["subnet"])]);
        let order = CreateOrder::compute(e.iter().map(|(a, b)| (a, b))).unwrap();
        assert_eq!(order.groups().len(), 3);
        assert_eq!(order.creation(), vec![id("vpc"), id("subnet"), id("nat")]);
        assert_eq!(order.destruction(), vec![id("nat"), id("subnet"), id("vpc")]);
    }

    #[test]
    fn test_diamond_shares_level() {
        let e = edges(&[
            ("vpc", &[]),
            ("public", &["vpc"]),
            ("private", &["vpc"]),
            ("cluster", &["public", "private"]),
        ]);
        let order = CreateOrder::compute(e.iter().map(|(a, b)| (a, b))).unwrap();
        assert_eq!(order.groups()[1], vec![id("private"), id("public")]);
        assert_eq!(order.level(&id("cluster")), Some(2));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_cycle_detected() {
        let e = edges(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        let err = CreateOrder::compute(e.iter().map(|(a, b)| (a, b))).unwrap_err();
        match err {
            GraphError::Cycle(stuck) => assert_eq!(stuck, vec![id("a"), id("b")]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_external_dependencies_ignored() {
        let e = edges(&[("subnet", &["vpc-removed"])]);
        let order = CreateOrder::compute(e.iter().map(|(a, b)| (a, b))).unwrap();
        assert_eq!(order.creation(), vec![id("subnet")]);
    }
}
