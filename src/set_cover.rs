use std::collections::BTreeSet;
use tracing::{info, warn};

///
/// Greedy set cover that stops once `min_recall` of `universe` is covered.
///
/// Each round picks the subset adding the most uncovered universe elements,
/// the earliest subset winning ties. Returns the positions of the chosen
/// subsets in `subsets`, in pick order, so callers can map them back to
/// whatever produced them.
///
/// An unreachable `min_recall` is not an error: the best achievable cover is
/// returned.
///
pub fn greedy_set_cover(
    subsets: &[BTreeSet<usize>],
    universe: &BTreeSet<usize>,
    min_recall: f64,
) -> Vec<usize> {
    let mut chosen = Vec::new();
    if universe.is_empty() {
        return chosen;
    }
    let mut uncovered = universe.clone();
    let total = universe.len() as f64;
    loop {
        let best = subsets
            .iter()
            .enumerate()
            .filter(|(idx, _)| !chosen.contains(idx))
            .map(|(idx, set)| (idx, set.intersection(&uncovered).count()))
            .fold(None, |best: Option<(usize, usize)>, (idx, gain)| match best {
                Some((_, best_gain)) if best_gain >= gain => best,
                _ => Some((idx, gain)),
            });
        let (idx, gain) = match best {
            Some((idx, gain)) if gain > 0 => (idx, gain),
            _ => break,
        };
        for element in &subsets[idx] {
            uncovered.remove(element);
        }
        chosen.push(idx);
        let coverage = 1.0 - uncovered.len() as f64 / total;
        tracing::debug!(subset = idx, gain, coverage, "set cover step");
        if coverage >= min_recall {
            info!("recall threshold reached, recall = {coverage:.4}");
            return chosen;
        }
    }
    warn!(
        "recall threshold {min_recall} unreachable, best recall = {:.4}",
        1.0 - uncovered.len() as f64 / total
    );
    chosen
}
