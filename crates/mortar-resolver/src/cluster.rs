//! Postponed-configuration clusters.
//!
//! A cluster groups the dependents that share a dependency (directly or
//! transitively) whose configuration must be jointly negotiated before any
//! of them can be fully collected. Clusters are created when a dependent
//! with a `prefer`/`require` alternative is encountered, merged when their
//! dependency sets touch, and rolled back by snapshot restore when a
//! negotiation has to be replayed.

use mortar_core::PackageKey;
use mortar_core::VariableSet;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, trace};

/// A dependency position within a dependent's `depends` clauses:
/// `(clause index, alternative index)`, both zero-based.
pub type DependencyPosition = (usize, usize);

/// One recorded `prefer`/`require` position of a dependent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionInfo {
    /// The clause/alternative position.
    pub position: DependencyPosition,
    /// The dependencies of that alternative.
    pub dependencies: Vec<PackageKey>,
    /// Whether the clause has further untried alternatives.
    pub has_alternative: bool,
}

/// A dependent's participation in a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependentInfo {
    /// Whether this is an existing (configured, not being built)
    /// dependent.
    pub existing: bool,
    /// Recorded positions. Append-only: the list grows in step with the
    /// dependent's materialized `dependencies` array.
    pub positions: Vec<PositionInfo>,
}

impl DependentInfo {
    /// Whether the dependent already recorded this position.
    #[must_use]
    pub fn has_position(&self, position: DependencyPosition) -> bool {
        self.positions.iter().any(|p| p.position == position)
    }
}

/// Snapshot of a cluster's dependent positions, used to detect
/// merge-negotiate cycles.
pub type ShadowCluster = BTreeMap<PackageKey, BTreeSet<DependencyPosition>>;

/// A set of dependents negotiating shared dependency configurations.
#[derive(Debug, Clone, Default)]
pub struct PostponedConfiguration {
    /// Unique id, for diagnostics and the merge audit trail.
    pub id: usize,
    /// Negotiation-stack depth; zero when not on the stack.
    pub depth: usize,
    /// `None`: not reached; `Some(false)`: being negotiated;
    /// `Some(true)`: done.
    pub negotiated: Option<bool>,
    /// The participating dependents.
    pub dependents: BTreeMap<PackageKey, DependentInfo>,
    /// The dependencies being configured.
    pub dependencies: BTreeSet<PackageKey>,
    /// Snapshot for force-merge retries.
    pub shadow_cluster: Option<ShadowCluster>,
    /// Ids of clusters merged into this one.
    pub merged_ids: Vec<usize>,
    /// The negotiated configuration per dependency.
    pub dependency_configurations: BTreeMap<PackageKey, VariableSet>,
}

impl PostponedConfiguration {
    /// Record a dependent's position, growing its append-only list.
    pub fn add_dependent(
        &mut self,
        dependent: PackageKey,
        existing: bool,
        position: DependencyPosition,
        dependencies: Vec<PackageKey>,
        has_alternative: bool,
    ) -> bool {
        self.dependencies.extend(dependencies.iter().cloned());
        let info = self.dependents.entry(dependent).or_default();
        info.existing = info.existing || existing;
        if info.has_position(position) {
            return false;
        }
        info.positions.push(PositionInfo {
            position,
            dependencies,
            has_alternative,
        });
        true
    }

    /// Whether the cluster configures the given dependency.
    #[must_use]
    pub fn contains_dependency(&self, key: &PackageKey) -> bool {
        self.dependencies.contains(key)
    }

    /// Whether any of the given dependencies intersect this cluster.
    #[must_use]
    pub fn intersects(&self, dependencies: &[PackageKey]) -> bool {
        dependencies.iter().any(|d| self.dependencies.contains(d))
    }

    /// Union another cluster into this one. The resulting depth is the
    /// minimum non-zero depth of the two.
    pub fn merge(&mut self, other: Self) {
        debug!(into = self.id, from = other.id, "merging clusters");
        self.merged_ids.push(other.id);
        self.merged_ids.extend(other.merged_ids);
        self.dependencies.extend(other.dependencies);
        for (dependent, info) in other.dependents {
            let entry = self.dependents.entry(dependent).or_default();
            entry.existing = entry.existing || info.existing;
            for pos in info.positions {
                if !entry.has_position(pos.position) {
                    entry.positions.push(pos);
                }
            }
        }
        self.depth = match (self.depth, other.depth) {
            (0, d) | (d, 0) => d,
            (a, b) => a.min(b),
        };
        // A merged cluster's negotiation result no longer stands.
        if self.negotiated == Some(true) || other.negotiated == Some(true) {
            self.negotiated = Some(false);
        }
        for (dep, config) in other.dependency_configurations {
            self.dependency_configurations.entry(dep).or_insert(config);
        }
    }

    /// Record the shadow snapshot used by the merge-cycle detector.
    pub fn set_shadow_cluster(&mut self, shadow: ShadowCluster) {
        self.shadow_cluster = Some(shadow);
    }

    /// Whether the given snapshot is this cluster's shadow.
    #[must_use]
    pub fn is_shadow_cluster(&self, other: &ShadowCluster) -> bool {
        self.shadow_cluster.as_ref() == Some(other)
    }

    /// Whether the shadow contains the dependent at the position.
    #[must_use]
    pub fn contains_in_shadow_cluster(
        &self,
        dependent: &PackageKey,
        position: DependencyPosition,
    ) -> bool {
        self.shadow_cluster
            .as_ref()
            .and_then(|s| s.get(dependent))
            .is_some_and(|positions| positions.contains(&position))
    }

    /// The current dependent-position snapshot.
    #[must_use]
    pub fn shadow_snapshot(&self) -> ShadowCluster {
        self.dependents
            .iter()
            .map(|(dependent, info)| {
                (
                    dependent.clone(),
                    info.positions.iter().map(|p| p.position).collect(),
                )
            })
            .collect()
    }

    /// Forget the negotiation result, keeping dependents, dependencies,
    /// and the shadow. Used when replaying a negotiation after rollback.
    pub fn reset_negotiation(&mut self) {
        self.negotiated = None;
        self.depth = 0;
        self.dependency_configurations.clear();
    }
}

impl fmt::Display for PostponedConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster {{")?;
        for (i, d) in self.dependencies.iter().enumerate() {
            write!(f, "{}{d}", if i == 0 { "" } else { " " })?;
        }
        write!(f, "}}")
    }
}

/// Outcome of [`PostponedConfigurations::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddResult {
    /// Index of the cluster the entry landed in.
    pub index: usize,
    /// Whether anything changed (new cluster, new position, or merge).
    pub changed: bool,
    /// Whether a merge with a non-negotiated cluster happened (the caller
    /// must throw `MergeConfiguration` for the smallest depth involved).
    pub merged_non_negotiated: Option<usize>,
}

/// The set of clusters for one run.
#[derive(Debug, Clone, Default)]
pub struct PostponedConfigurations {
    next_id: usize,
    clusters: Vec<PostponedConfiguration>,
}

impl PostponedConfigurations {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dependent's `prefer`/`require` position, creating,
    /// joining, or merging clusters as the dependencies dictate:
    ///
    /// 1. No cluster touches the dependencies: a new cluster is created.
    /// 2. Exactly one does: the entry joins it (when several intersect but
    ///    merging is not possible yet, the smallest-depth one).
    /// 3. Several do: they are merged, preferring the one whose shadow
    ///    contains the new position.
    pub fn add(
        &mut self,
        dependent: PackageKey,
        existing: bool,
        position: DependencyPosition,
        dependencies: Vec<PackageKey>,
        has_alternative: bool,
    ) -> AddResult {
        let intersecting: Vec<usize> = self
            .clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.intersects(&dependencies))
            .map(|(i, _)| i)
            .collect();

        match intersecting.len() {
            0 => {
                let id = self.next_id;
                self.next_id += 1;
                let mut cluster = PostponedConfiguration {
                    id,
                    ..PostponedConfiguration::default()
                };
                cluster.add_dependent(
                    dependent,
                    existing,
                    position,
                    dependencies,
                    has_alternative,
                );
                trace!(cluster = id, "new configuration cluster");
                self.clusters.push(cluster);
                AddResult {
                    index: self.clusters.len() - 1,
                    changed: true,
                    merged_non_negotiated: None,
                }
            }
            1 => {
                let index = intersecting[0];
                let changed = self.clusters[index].add_dependent(
                    dependent,
                    existing,
                    position,
                    dependencies,
                    has_alternative,
                );
                AddResult {
                    index,
                    changed,
                    merged_non_negotiated: None,
                }
            }
            _ => {
                // Merge into the preferred target: a cluster whose shadow
                // already contains this position if there is one,
                // otherwise the earliest-created (stable order).
                let mut target = intersecting
                    .iter()
                    .copied()
                    .find(|&i| self.clusters[i].contains_in_shadow_cluster(&dependent, position))
                    .unwrap_or(intersecting[0]);

                let mut merged_non_negotiated: Option<usize> = None;
                // Remove the others back to front so indices stay valid.
                for &i in intersecting.iter().rev() {
                    if i == target {
                        continue;
                    }
                    let other = self.clusters.remove(i);
                    if other.negotiated == Some(false) && other.depth != 0 {
                        merged_non_negotiated = Some(
                            merged_non_negotiated.map_or(other.depth, |d| d.min(other.depth)),
                        );
                    }
                    if i < target {
                        target -= 1;
                    }
                    self.clusters[target].merge(other);
                }
                self.clusters[target].add_dependent(
                    dependent,
                    existing,
                    position,
                    dependencies,
                    has_alternative,
                );
                AddResult {
                    index: target,
                    changed: true,
                    merged_non_negotiated,
                }
            }
        }
    }

    /// The cluster configuring the given dependency.
    #[must_use]
    pub fn find_dependency(&self, key: &PackageKey) -> Option<&PostponedConfiguration> {
        self.clusters.iter().find(|c| c.contains_dependency(key))
    }

    /// Mutable variant of [`Self::find_dependency`].
    pub fn find_dependency_mut(&mut self, key: &PackageKey) -> Option<&mut PostponedConfiguration> {
        self.clusters.iter_mut().find(|c| c.contains_dependency(key))
    }

    /// Index of the first cluster not yet fully negotiated.
    #[must_use]
    pub fn next_unnegotiated(&self) -> Option<usize> {
        self.clusters
            .iter()
            .position(|c| c.negotiated != Some(true))
    }

    /// Access a cluster by index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PostponedConfiguration> {
        self.clusters.get(index)
    }

    /// Mutable access to a cluster by index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut PostponedConfiguration> {
        self.clusters.get_mut(index)
    }

    /// Iterate clusters in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &PostponedConfiguration> {
        self.clusters.iter()
    }

    /// Mutable iteration.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PostponedConfiguration> {
        self.clusters.iter_mut()
    }

    /// Number of clusters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether there are no clusters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// A stable checksum over every cluster's negotiated configurations,
    /// for the recurrence detector.
    #[must_use]
    pub fn checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for cluster in &self.clusters {
            for (dep, config) in &cluster.dependency_configurations {
                hasher.update(dep.to_string().as_bytes());
                hasher.update(config.checksum().as_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mortar_core::{ConfigurationId, PackageName};
    use pretty_assertions::assert_eq;

    fn key(name: &str) -> PackageKey {
        PackageKey::new(ConfigurationId::MAIN, PackageName::parse(name).unwrap())
    }

    #[test]
    fn test_disjoint_dependencies_make_new_clusters() {
        let mut cfgs = PostponedConfigurations::new();
        cfgs.add(key("xx"), false, (0, 0), vec![key("libz")], false);
        cfgs.add(key("yy"), false, (0, 0), vec![key("libw")], false);
        assert_eq!(cfgs.len(), 2);
    }

    #[test]
    fn test_shared_dependency_joins_cluster() {
        let mut cfgs = PostponedConfigurations::new();
        cfgs.add(key("xx"), false, (0, 0), vec![key("libz")], false);
        let r = cfgs.add(key("yy"), false, (0, 0), vec![key("libz")], false);
        assert_eq!(cfgs.len(), 1);
        assert!(r.changed);
        let cluster = cfgs.get(r.index).unwrap();
        assert_eq!(cluster.dependents.len(), 2);
        assert_eq!(cluster.dependencies.len(), 1);
    }

    #[test]
    fn test_bridging_dependent_merges_clusters() {
        let mut cfgs = PostponedConfigurations::new();
        cfgs.add(key("xx"), false, (0, 0), vec![key("libz")], false);
        cfgs.add(key("yy"), false, (0, 0), vec![key("libw")], false);
        // zz depends on both: the clusters merge.
        let r = cfgs.add(key("zz"), false, (0, 0), vec![key("libz"), key("libw")], false);
        assert_eq!(cfgs.len(), 1);
        let cluster = cfgs.get(r.index).unwrap();
        assert_eq!(cluster.dependencies.len(), 2);
        assert_eq!(cluster.dependents.len(), 3);
        assert_eq!(cluster.merged_ids.len(), 1);
    }

    #[test]
    fn test_positions_are_append_only() {
        let mut cfgs = PostponedConfigurations::new();
        let r1 = cfgs.add(key("xx"), false, (0, 0), vec![key("libz")], false);
        let r2 = cfgs.add(key("xx"), false, (0, 0), vec![key("libz")], false);
        assert!(r1.changed);
        assert!(!r2.changed);
        let r3 = cfgs.add(key("xx"), false, (1, 0), vec![key("libz")], false);
        assert!(r3.changed);
        let info = &cfgs.get(0).unwrap().dependents[&key("xx")];
        assert_eq!(info.positions.len(), 2);
    }

    #[test]
    fn test_merge_depth_is_min_nonzero() {
        let mut a = PostponedConfiguration {
            id: 0,
            depth: 2,
            ..PostponedConfiguration::default()
        };
        let b = PostponedConfiguration {
            id: 1,
            depth: 0,
            ..PostponedConfiguration::default()
        };
        a.merge(b);
        assert_eq!(a.depth, 2);

        let mut c = PostponedConfiguration {
            id: 2,
            depth: 3,
            ..PostponedConfiguration::default()
        };
        let d = PostponedConfiguration {
            id: 3,
            depth: 1,
            ..PostponedConfiguration::default()
        };
        c.merge(d);
        assert_eq!(c.depth, 1);
    }

    #[test]
    fn test_shadow_round_trip() {
        let mut cluster = PostponedConfiguration::default();
        cluster.add_dependent(key("xx"), false, (0, 1), vec![key("libz")], false);
        let shadow = cluster.shadow_snapshot();
        cluster.set_shadow_cluster(shadow.clone());
        assert!(cluster.is_shadow_cluster(&shadow));
        assert!(cluster.contains_in_shadow_cluster(&key("xx"), (0, 1)));
        assert!(!cluster.contains_in_shadow_cluster(&key("xx"), (1, 0)));
    }
}
