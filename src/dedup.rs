use std::collections::{HashMap, HashSet};

use crate::dto::RecordResult;
use crate::error::DedupError;

///
/// Wraps two mappings to hold the final cluster assignment of every record:
/// the clusters found among scored pairs plus a singleton for each record
/// that matched nothing.
///
#[derive(Debug, Default)]
pub struct DeduplicationTable {
    /// Mapping of cluster id to row ids
    duplicate_groups: HashMap<usize, HashSet<usize>>,
    /// Reverse lookup to identify the cluster id of a row id
    row_lookup: HashMap<usize, usize>,
}

impl DeduplicationTable {
    ///
    /// Constructs a DeduplicationTable from `(row_id, cluster_id)` assignments.
    ///
    /// ## Arguments
    ///
    /// * `clustering` - Output of the hierarchical clustering step. A row id
    ///   listed twice keeps its last assignment.
    ///
    pub fn from_clustering(clustering: &[(usize, usize)]) -> Self {
        let mut table = Self::default();
        for &(row_id, cluster_id) in clustering {
            if let Some(prev) = table.check_cluster_id(row_id) {
                if let Some(group) = table.duplicate_groups.get_mut(&prev) {
                    group.remove(&row_id);
                }
            }
            table.add(cluster_id, row_id);
        }
        table.duplicate_groups.retain(|_, group| !group.is_empty());
        table
    }

    ///
    /// Gives every row in `0..n_rows` without a cluster its own fresh id,
    /// counting up from the largest id in use.
    ///
    pub fn add_singletons(&mut self, n_rows: usize) -> usize {
        let first_id = self.new_id();
        let missing: Vec<usize> = (0..n_rows)
            .filter(|&row_id| self.check_cluster_id(row_id).is_none())
            .collect();
        for (offset, &row_id) in missing.iter().enumerate() {
            self.add(first_id + offset, row_id);
        }
        missing.len()
    }

    pub fn n_clusters(&self) -> usize {
        self.duplicate_groups.len()
    }

    /// Size of the largest cluster, 0 for an empty table.
    pub fn largest_group(&self) -> usize {
        self.duplicate_groups.values().map(HashSet::len).max().unwrap_or(0)
    }

    ///
    /// Renumbers clusters to `0..k` in order of first appearance over
    /// `0..n_rows` and returns one id per row. Fails if a row has no cluster.
    ///
    pub fn dense_ids(&self, n_rows: usize) -> Result<Vec<RecordResult>, DedupError> {
        let mut renumbered: HashMap<usize, usize> = HashMap::new();
        (0..n_rows)
            .map(|row_id| {
                let cluster_id = self.check_cluster_id(row_id).ok_or_else(|| {
                    DedupError::internal(format!("row {row_id} was not assigned a cluster"))
                })?;
                let next = renumbered.len();
                let dense = *renumbered.entry(cluster_id).or_insert(next);
                Ok(RecordResult {
                    row_id,
                    cluster_id: dense,
                })
            })
            .collect()
    }

    fn add(&mut self, cluster_id: usize, row_id: usize) {
        self.duplicate_groups
            .entry(cluster_id)
            .or_insert_with(HashSet::new)
            .insert(row_id);
        self.row_lookup.insert(row_id, cluster_id);
    }

    fn check_cluster_id(&self, row_id: usize) -> Option<usize> {
        self.row_lookup.get(&row_id).copied()
    }

    fn new_id(&self) -> usize {
        self.duplicate_groups.keys().max().map_or(0, |&v| v + 1)
    }
}
