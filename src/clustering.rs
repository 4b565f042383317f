//! Turns scored pairs into a partition of records.
//!
//! Pair scores are not transitive, so records are first split into connected
//! components and every component with more than one record is refined by
//! centroid-linkage hierarchical clustering on `1 - score` distances.
//!
//! The distance matrix is dense per component, which is fine as long as
//! blocking keeps components small. Very large components (a blocking rule
//! that lumps half the dataset together) make this step quadratic in memory
//! and cubic in time.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::dto::Record;
use crate::error::DedupError;
use crate::features::RecordPair;

const LARGE_COMPONENT: usize = 1000;

/// A candidate pair with its match probability.
#[derive(Clone, Debug)]
pub struct ScoredPair<'a> {
    pub pair: RecordPair<'a>,
    pub similarities: Vec<f64>,
    pub score: f64,
}

/// One agglomeration step: clusters `a` and `b` merged at `distance`.
/// Leaves are `0..n`, the cluster created by step `k` is `n + k`.
#[derive(Clone, Debug, PartialEq)]
pub struct Merge {
    pub a: usize,
    pub b: usize,
    pub distance: f64,
    pub size: usize,
}

///
/// Centroid linkage over a full symmetric distance matrix.
///
/// Distances to a merged cluster follow the Lance-Williams update for
/// centroids; the closest active pair merges first, the lowest ids winning ties.
///
pub fn centroid_linkage(distances: &[Vec<f64>]) -> Vec<Merge> {
    let n = distances.len();
    if n < 2 {
        return Vec::new();
    }
    let total = 2 * n - 1;
    let mut d = vec![vec![0.0; total]; total];
    for i in 0..n {
        for j in 0..n {
            d[i][j] = distances[i][j];
        }
    }
    let mut size = vec![1usize; total];
    let mut active: Vec<usize> = (0..n).collect();
    let mut merges = Vec::with_capacity(n - 1);

    for step in 0..(n - 1) {
        let mut best: Option<(usize, usize, f64)> = None;
        for (pos, &x) in active.iter().enumerate() {
            for &y in &active[pos + 1..] {
                if best.map_or(true, |(_, _, dist)| d[x][y] < dist) {
                    best = Some((x, y, d[x][y]));
                }
            }
        }
        let (x, y, dist) = match best {
            Some(best) => best,
            None => break,
        };
        let new = n + step;
        let (sx, sy) = (size[x] as f64, size[y] as f64);
        for &k in active.iter().filter(|&&k| k != x && k != y) {
            let squared = (sx * d[x][k].powi(2) + sy * d[y][k].powi(2)) / (sx + sy)
                - sx * sy * dist.powi(2) / (sx + sy).powi(2);
            let updated = squared.max(0.0).sqrt();
            d[new][k] = updated;
            d[k][new] = updated;
        }
        size[new] = size[x] + size[y];
        active.retain(|&k| k != x && k != y);
        active.push(new);
        merges.push(Merge {
            a: x.min(y),
            b: x.max(y),
            distance: dist,
            size: size[new],
        });
    }
    merges
}

///
/// Flat clusters such that no cluster contains a merge above `threshold`.
/// Labels start at 1 and follow a depth-first walk from the root.
///
pub fn flat_clusters(n: usize, merges: &[Merge], threshold: f64) -> Vec<usize> {
    let mut labels = vec![0usize; n];
    if n == 0 {
        return labels;
    }
    // highest merge distance anywhere below each node, so an inversion cannot
    // split a subtree that a lower merge already joined
    let mut max_dist = vec![0.0f64; n + merges.len()];
    for (k, merge) in merges.iter().enumerate() {
        max_dist[n + k] = merge.distance.max(max_dist[merge.a]).max(max_dist[merge.b]);
    }
    let mut next_label = 0;
    let mut stack = vec![n + merges.len() - 1];
    while let Some(node) = stack.pop() {
        if node < n || max_dist[node] <= threshold {
            next_label += 1;
            let mut subtree = vec![node];
            while let Some(m) = subtree.pop() {
                if m < n {
                    labels[m] = next_label;
                } else {
                    subtree.push(merges[m - n].b);
                    subtree.push(merges[m - n].a);
                }
            }
        } else {
            stack.push(merges[node - n].b);
            stack.push(merges[node - n].a);
        }
    }
    labels
}

///
/// Clusters the records of `scored` and returns `(row_id, cluster_id)` for
/// every record that appears in a pair, ordered by cluster id.
///
/// Cluster ids are unique across components but not dense.
///
pub fn hierarchical_clustering(
    scored: &[ScoredPair<'_>],
    cluster_threshold: f64,
) -> Result<Vec<(usize, usize)>, DedupError> {
    if !(0.0..=1.0).contains(&cluster_threshold) {
        return Err(DedupError::invalid_input(format!(
            "cluster_threshold must lie in [0, 1], got {cluster_threshold}"
        )));
    }
    let mut graph: UnGraph<&Record, f64> = UnGraph::new_undirected();
    let mut nodes: BTreeMap<usize, NodeIndex> = BTreeMap::new();
    for scored_pair in scored {
        let ids: Vec<NodeIndex> = [scored_pair.pair.left, scored_pair.pair.right]
            .into_iter()
            .map(|record| *nodes.entry(record.row_id).or_insert_with(|| graph.add_node(record)))
            .collect();
        graph.update_edge(ids[0], ids[1], scored_pair.score);
    }

    let mut components = UnionFind::new(graph.node_count());
    for edge in graph.edge_indices() {
        if let Some((a, b)) = graph.edge_endpoints(edge) {
            components.union(a.index(), b.index());
        }
    }
    // nodes map is ordered by row id, so members and components come out sorted
    let mut grouped: BTreeMap<usize, Vec<NodeIndex>> = BTreeMap::new();
    let mut first_member: BTreeMap<usize, usize> = BTreeMap::new();
    for (&row_id, &node) in &nodes {
        let root = components.find(node.index());
        first_member.entry(root).or_insert(row_id);
        grouped.entry(root).or_default().push(node);
    }
    let mut ordered: Vec<(usize, Vec<NodeIndex>)> = grouped
        .into_iter()
        .map(|(root, members)| (first_member[&root], members))
        .collect();
    ordered.sort_by_key(|(first, _)| *first);

    let mut clustering = Vec::with_capacity(nodes.len());
    let mut cluster_counter = 0;
    for (_, members) in ordered {
        let labels = if members.len() > 1 {
            if members.len() > LARGE_COMPONENT {
                warn!(
                    "component of {} records; clustering it builds a dense distance matrix",
                    members.len()
                );
            }
            let distances: Vec<Vec<f64>> = members
                .iter()
                .map(|&a| {
                    members
                        .iter()
                        .map(|&b| {
                            if a == b {
                                0.0
                            } else {
                                graph
                                    .find_edge(a, b)
                                    .map_or(1.0, |e| 1.0 - graph[e])
                            }
                        })
                        .collect()
                })
                .collect();
            let merges = centroid_linkage(&distances);
            flat_clusters(members.len(), &merges, 1.0 - cluster_threshold)
        } else {
            vec![1]
        };
        debug!(
            size = members.len(),
            clusters = labels.iter().max().copied().unwrap_or(0),
            "component clustered"
        );
        for (node, label) in members.iter().zip(&labels) {
            clustering.push((graph[*node].row_id, label + cluster_counter));
        }
        cluster_counter += members.len();
    }
    clustering.sort_by_key(|&(row_id, cluster_id)| (cluster_id, row_id));
    Ok(clustering)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|row_id| Record {
                row_id,
                values: vec![format!("r{row_id}")],
            })
            .collect()
    }

    fn scored<'a>(records: &'a [Record], edges: &[(usize, usize, f64)]) -> Vec<ScoredPair<'a>> {
        edges
            .iter()
            .map(|&(a, b, score)| ScoredPair {
                pair: RecordPair::new(&records[a], &records[b]),
                similarities: vec![],
                score,
            })
            .collect()
    }

    fn cluster_of(clustering: &[(usize, usize)], row_id: usize) -> usize {
        clustering.iter().find(|(r, _)| *r == row_id).unwrap().1
    }

    #[test]
    fn weak_chain_is_split() {
        let records = records(3);
        let pairs = scored(&records, &[(0, 1, 0.9), (1, 2, 0.9)]);
        let clustering = hierarchical_clustering(&pairs, 0.5).unwrap();
        assert_eq!(clustering.len(), 3);
        assert_eq!(cluster_of(&clustering, 0), cluster_of(&clustering, 1));
        assert_ne!(cluster_of(&clustering, 0), cluster_of(&clustering, 2));
    }

    #[test]
    fn explicit_weak_edge_also_splits() {
        let records = records(3);
        let pairs = scored(&records, &[(0, 1, 0.9), (1, 2, 0.9), (0, 2, 0.05)]);
        let clustering = hierarchical_clustering(&pairs, 0.5).unwrap();
        assert_ne!(cluster_of(&clustering, 0), cluster_of(&clustering, 2));
    }

    #[test]
    fn lower_threshold_keeps_chain_together() {
        let records = records(3);
        let pairs = scored(&records, &[(0, 1, 0.9), (1, 2, 0.9)]);
        let clustering = hierarchical_clustering(&pairs, 0.2).unwrap();
        assert_eq!(cluster_of(&clustering, 0), cluster_of(&clustering, 2));
    }

    #[test]
    fn dense_triangle_merges() {
        let records = records(3);
        let pairs = scored(&records, &[(0, 1, 0.9), (1, 2, 0.9), (0, 2, 0.9)]);
        let clustering = hierarchical_clustering(&pairs, 0.5).unwrap();
        let ids: Vec<usize> = clustering.iter().map(|(_, c)| *c).collect();
        assert!(ids.iter().all(|&c| c == ids[0]));
    }

    #[test]
    fn components_get_distinct_ids() {
        let records = records(5);
        let pairs = scored(&records, &[(0, 1, 0.95), (3, 4, 0.8), (2, 4, 0.1)]);
        let clustering = hierarchical_clustering(&pairs, 0.5).unwrap();
        let rows: Vec<usize> = {
            let mut rows: Vec<usize> = clustering.iter().map(|(r, _)| *r).collect();
            rows.sort();
            rows
        };
        assert_eq!(rows, vec![0, 1, 2, 3, 4]);
        assert_eq!(cluster_of(&clustering, 0), cluster_of(&clustering, 1));
        assert_eq!(cluster_of(&clustering, 3), cluster_of(&clustering, 4));
        assert_ne!(cluster_of(&clustering, 2), cluster_of(&clustering, 4));
        assert_ne!(cluster_of(&clustering, 0), cluster_of(&clustering, 3));
    }

    #[test]
    fn empty_input_and_bad_threshold() {
        assert!(hierarchical_clustering(&[], 0.5).unwrap().is_empty());
        assert!(hierarchical_clustering(&[], 1.5).is_err());
    }

    #[test]
    fn linkage_uses_centroid_update() {
        let distances = vec![
            vec![0.0, 0.1, 1.0],
            vec![0.1, 0.0, 0.1],
            vec![1.0, 0.1, 0.0],
        ];
        let merges = centroid_linkage(&distances);
        assert_eq!(merges.len(), 2);
        assert_eq!((merges[0].a, merges[0].b), (0, 1));
        let expected = ((1.0 + 0.01) / 2.0 - 0.01 / 4.0f64).sqrt();
        assert!((merges[1].distance - expected).abs() < 1e-12);
        assert_eq!(merges[1].size, 3);
        // the root splits; its first child is the singleton leaf 2
        assert_eq!(flat_clusters(3, &merges, 0.5), vec![2, 2, 1]);
        assert_eq!(flat_clusters(3, &merges, 0.8), vec![1, 1, 1]);
    }
}
