use rand::Rng;

/// Read access to the feature partition shared by every clustering state.
pub trait ClusterState: Clone {
    fn partition(&self) -> &Clustering;
}

/// What a reassignment did to the cluster labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterChange {
    /// Label of the cluster that emptied and was removed, in pre-move labels.
    pub removed: Option<usize>,
    pub created: bool,
}

/// A partition of features into dense cluster labels `0..K`.
///
/// Every feature belongs to exactly one cluster and no cluster is empty. When
/// a move empties a cluster it is removed and every higher label shifts down
/// by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clustering {
    assignments: Vec<usize>,
    members: Vec<Vec<usize>>,
}

impl ClusterState for Clustering {
    fn partition(&self) -> &Clustering {
        self
    }
}

impl Clustering {
    /// Builds a partition from arbitrary labels, compacting them to `0..K` in
    /// ascending label order.
    pub fn from_assignments(labels: &[usize]) -> Self {
        let max_label = labels.iter().copied().max().map_or(0, |m| m + 1);
        let mut dense = vec![usize::MAX; max_label];
        let mut used: Vec<usize> = labels.to_vec();
        used.sort_unstable();
        used.dedup();
        for (k, &label) in used.iter().enumerate() {
            dense[label] = k;
        }

        let assignments: Vec<usize> = labels.iter().map(|&l| dense[l]).collect();
        let mut members = vec![Vec::new(); used.len()];
        for (feature, &k) in assignments.iter().enumerate() {
            members[k].push(feature);
        }
        Self {
            assignments,
            members,
        }
    }

    /// Uniform random labels in `[0, initial_count)`, then compacted.
    pub fn random(num_features: usize, initial_count: usize, rng: &mut impl Rng) -> Self {
        let count = initial_count.max(1);
        let labels: Vec<usize> = (0..num_features).map(|_| rng.gen_range(0..count)).collect();
        Self::from_assignments(&labels)
    }

    pub fn num_features(&self) -> usize {
        self.assignments.len()
    }

    pub fn num_clusters(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn cluster_of(&self, feature: usize) -> usize {
        self.assignments[feature]
    }

    #[inline]
    pub fn cluster_size(&self, cluster: usize) -> usize {
        self.members[cluster].len()
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.members.iter().map(Vec::len).collect()
    }

    /// Members of a cluster in the order they joined it.
    pub fn members(&self, cluster: usize) -> &[usize] {
        &self.members[cluster]
    }

    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    pub fn snapshot(&self) -> Vec<usize> {
        self.assignments.clone()
    }

    /// Moves `feature` to `cluster`; `cluster == num_clusters()` opens a new one.
    pub fn set_cluster(&mut self, feature: usize, cluster: usize) -> ClusterChange {
        let old = self.assignments[feature];
        debug_assert!(cluster <= self.members.len(), "cluster label out of range");
        if old == cluster {
            return ClusterChange::default();
        }

        let created = cluster == self.members.len();
        if created {
            self.members.push(Vec::new());
        }
        self.members[cluster].push(feature);
        self.assignments[feature] = cluster;

        let old_members = &mut self.members[old];
        if let Some(at) = old_members.iter().position(|&f| f == feature) {
            old_members.remove(at);
        }

        let removed = if self.members[old].is_empty() {
            self.members.remove(old);
            for label in self.assignments.iter_mut() {
                if *label > old {
                    *label -= 1;
                }
            }
            Some(old)
        } else {
            None
        };

        debug_assert!(self.is_consistent());
        ClusterChange { removed, created }
    }

    /// Checks that assignments and member lists agree and no cluster is empty.
    pub fn is_consistent(&self) -> bool {
        if self.members.iter().any(Vec::is_empty) {
            return false;
        }
        let total: usize = self.members.iter().map(Vec::len).sum();
        if total != self.assignments.len() {
            return false;
        }
        self.members
            .iter()
            .enumerate()
            .all(|(k, members)| members.iter().all(|&f| self.assignments[f] == k))
    }
}

/// A partition whose clusters are each explained by a molecule, with every
/// feature mapped to a position of its cluster's theoretical spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct MoleculeClustering {
    partition: Clustering,
    cluster_molecule: Vec<usize>,
    positions: Vec<usize>,
    molecule_clusters: Vec<Vec<usize>>,
}

impl ClusterState for MoleculeClustering {
    fn partition(&self) -> &Clustering {
        &self.partition
    }
}

impl MoleculeClustering {
    /// `cluster_molecule` must have one entry per cluster of `partition` and
    /// `positions` one per feature.
    pub fn new(
        partition: Clustering,
        cluster_molecule: Vec<usize>,
        positions: Vec<usize>,
        num_molecules: usize,
    ) -> Self {
        debug_assert_eq!(partition.num_clusters(), cluster_molecule.len());
        debug_assert_eq!(partition.num_features(), positions.len());
        let mut molecule_clusters = vec![Vec::new(); num_molecules];
        for (k, &m) in cluster_molecule.iter().enumerate() {
            molecule_clusters[m].push(k);
        }
        Self {
            partition,
            cluster_molecule,
            positions,
            molecule_clusters,
        }
    }

    pub fn num_molecules(&self) -> usize {
        self.molecule_clusters.len()
    }

    pub fn molecule_of(&self, cluster: usize) -> usize {
        self.cluster_molecule[cluster]
    }

    pub fn molecules(&self) -> &[usize] {
        &self.cluster_molecule
    }

    /// Molecule of the cluster a feature belongs to.
    pub fn feature_molecule(&self, feature: usize) -> usize {
        self.cluster_molecule[self.partition.cluster_of(feature)]
    }

    pub fn position_of(&self, feature: usize) -> usize {
        self.positions[feature]
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Positions of a cluster's members, aligned with `partition().members(k)`.
    pub fn positions_of(&self, cluster: usize) -> Vec<usize> {
        self.partition
            .members(cluster)
            .iter()
            .map(|&f| self.positions[f])
            .collect()
    }

    /// Clusters currently explained by `molecule`, in ascending label order.
    pub fn clusters_for_molecule(&self, molecule: usize) -> &[usize] {
        &self.molecule_clusters[molecule]
    }

    pub fn set_position(&mut self, feature: usize, position: usize) {
        self.positions[feature] = position;
    }

    /// Reassigns a cluster's molecule together with its members' positions.
    pub fn set_molecule(&mut self, cluster: usize, molecule: usize, positions: &[usize]) {
        let members = self.partition.members(cluster);
        debug_assert_eq!(members.len(), positions.len());
        for (&f, &pos) in members.iter().zip(positions) {
            self.positions[f] = pos;
        }
        let old = self.cluster_molecule[cluster];
        if old == molecule {
            return;
        }
        unlink(&mut self.molecule_clusters[old], cluster);
        link(&mut self.molecule_clusters[molecule], cluster);
        self.cluster_molecule[cluster] = molecule;
    }

    /// Moves `feature` into an existing cluster.
    pub fn set_cluster(&mut self, feature: usize, cluster: usize) -> ClusterChange {
        debug_assert!(cluster < self.partition.num_clusters());
        let change = self.partition.set_cluster(feature, cluster);
        self.apply_removal(change);
        change
    }

    /// Moves `feature` into a fresh cluster explained by `molecule` and
    /// returns the new cluster's label.
    pub fn move_to_new_cluster(&mut self, feature: usize, molecule: usize) -> usize {
        let new_label = self.partition.num_clusters();
        let change = self.partition.set_cluster(feature, new_label);
        self.cluster_molecule.push(molecule);
        link(&mut self.molecule_clusters[molecule], new_label);
        self.apply_removal(change);
        self.partition.cluster_of(feature)
    }

    fn apply_removal(&mut self, change: ClusterChange) {
        let Some(removed) = change.removed else {
            return;
        };
        let molecule = self.cluster_molecule.remove(removed);
        unlink(&mut self.molecule_clusters[molecule], removed);
        for clusters in self.molecule_clusters.iter_mut() {
            for k in clusters.iter_mut() {
                if *k > removed {
                    *k -= 1;
                }
            }
        }
    }
}

fn link(clusters: &mut Vec<usize>, cluster: usize) {
    if let Err(at) = clusters.binary_search(&cluster) {
        clusters.insert(at, cluster);
    }
}

fn unlink(clusters: &mut Vec<usize>, cluster: usize) {
    if let Ok(at) = clusters.binary_search(&cluster) {
        clusters.remove(at);
    }
}
