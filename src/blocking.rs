use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::dto::Record;
use crate::error::DedupError;
use crate::features::RecordPair;
use crate::rules::PredicateRule;
use crate::set_cover::greedy_set_cover;

/// One blocking rule bound to one field.
#[derive(Clone, Debug)]
pub struct RuleSpec {
    pub field_index: usize,
    pub field_name: String,
    pub rule: Arc<dyn PredicateRule>,
    /// Training match pairs (by position) on which both sides yield the same token.
    pub rule_set: BTreeSet<usize>,
}

impl RuleSpec {
    pub fn new(field_index: usize, field_name: &str, rule: Arc<dyn PredicateRule>) -> Self {
        RuleSpec {
            field_index,
            field_name: field_name.to_string(),
            rule,
            rule_set: BTreeSet::new(),
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.field_name, self.rule.name())
    }

    fn apply(&self, record: &Record) -> Result<Option<String>, DedupError> {
        self.rule
            .apply(&record.values[self.field_index])
            .map_err(|err| {
                DedupError::function_failed(format!(
                    "blocking rule '{}' failed on row {}: {}",
                    self.label(),
                    record.row_id,
                    err.msg
                ))
            })
    }
}

/// A selected rule's token for one record, tagged with the rule's selection index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub row_id: usize,
    pub rule_index: usize,
    pub token: String,
}

impl Fingerprint {
    pub fn key(&self) -> String {
        format!("{}:{}", self.token, self.rule_index)
    }
}

///
/// Learns which blocking rules to use from labeled pairs and applies them to
/// produce candidate pairs.
///
#[derive(Clone, Debug)]
pub struct BlockingEngine {
    specs: Vec<RuleSpec>,
    recall: f64,
    /// Positions in `specs` of the selected rules, in spec order.
    selected: Option<Vec<usize>>,
}

impl BlockingEngine {
    ///
    /// ## Arguments
    ///
    /// * `specs` - Every rule/field combination to consider.
    /// * `recall` - Fraction of training matches the selected rules must block together.
    ///
    pub fn new(specs: Vec<RuleSpec>, recall: f64) -> Self {
        BlockingEngine {
            specs,
            recall,
            selected: None,
        }
    }

    pub fn specs(&self) -> &[RuleSpec] {
        &self.specs
    }

    pub fn recall(&self) -> f64 {
        self.recall
    }

    pub fn rules_selected(&self) -> Result<Vec<&RuleSpec>, DedupError> {
        let selected = self
            .selected
            .as_ref()
            .ok_or_else(|| DedupError::not_fitted("blocking rules have not been fitted"))?;
        Ok(selected.iter().map(|&i| &self.specs[i]).collect())
    }

    ///
    /// Computes every rule's coverage of the matching training pairs and
    /// keeps the greedy set cover of them.
    ///
    pub fn fit(&mut self, pairs: &[RecordPair<'_>], labels: &[bool]) -> Result<&mut Self, DedupError> {
        if pairs.len() != labels.len() {
            return Err(DedupError::invalid_input(format!(
                "{} pairs but {} labels",
                pairs.len(),
                labels.len()
            )));
        }
        let universe: BTreeSet<usize> = labels
            .iter()
            .enumerate()
            .filter(|&(_, &y)| y)
            .map(|(i, _)| i)
            .collect();
        for spec in self.specs.iter_mut() {
            let covered = pairs
                .par_iter()
                .enumerate()
                .filter(|(i, _)| universe.contains(i))
                .map(|(i, pair)| -> Result<Option<usize>, DedupError> {
                    let left = spec.apply(pair.left)?;
                    let right = spec.apply(pair.right)?;
                    Ok(match (left, right) {
                        (Some(l), Some(r)) if l == r => Some(i),
                        _ => None,
                    })
                })
                .collect::<Result<Vec<Option<usize>>, DedupError>>()?;
            spec.rule_set = covered.into_iter().flatten().collect();
        }
        let subsets: Vec<BTreeSet<usize>> = self.specs.iter().map(|s| s.rule_set.clone()).collect();
        let mut cover = greedy_set_cover(&subsets, &universe, self.recall);
        cover.sort_unstable();
        self.selected = Some(cover);
        info!(
            "blocking rules found: {:?}",
            self.rules_selected()?.iter().map(|s| s.label()).collect::<Vec<_>>()
        );
        Ok(self)
    }

    /// Applies the selected rules to every record, dropping non-applicable results.
    pub fn fingerprint(&self, records: &[Record]) -> Result<Vec<Fingerprint>, DedupError> {
        let rules = self.rules_selected()?;
        let per_record = records
            .par_iter()
            .map(|record| -> Result<Vec<Fingerprint>, DedupError> {
                let mut prints = Vec::new();
                for (rule_index, spec) in rules.iter().enumerate() {
                    if let Some(token) = spec.apply(record)? {
                        prints.push(Fingerprint {
                            row_id: record.row_id,
                            rule_index,
                            token,
                        });
                    }
                }
                Ok(prints)
            })
            .collect::<Result<Vec<Vec<Fingerprint>>, DedupError>>()?;
        Ok(per_record.into_iter().flatten().collect())
    }

    /// Pairs of row ids sharing a fingerprint, `row_id_1 < row_id_2`, each pair once, sorted.
    pub fn candidate_pairs(fingerprints: &[Fingerprint]) -> Vec<(usize, usize)> {
        let mut hash_table: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for print in fingerprints {
            hash_table.entry(print.key()).or_insert_with(Vec::new).push(print.row_id);
        }
        let pairs: BTreeSet<(usize, usize)> = hash_table
            .into_par_iter()
            .flat_map_iter(|(_, mut ids)| {
                ids.sort_unstable();
                ids.dedup();
                let mut pairs = Vec::new();
                for (i, &a) in ids.iter().enumerate() {
                    for &b in &ids[i + 1..] {
                        pairs.push((a, b));
                    }
                }
                pairs
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        pairs.into_iter().collect()
    }

    ///
    /// Blocks `records` into candidate pairs using the selected rules.
    ///
    pub fn transform<'a>(&self, records: &'a [Record]) -> Result<Vec<RecordPair<'a>>, DedupError> {
        let fingerprints = self.fingerprint(records)?;
        let lookup: HashMap<usize, &Record> = records.iter().map(|r| (r.row_id, r)).collect();
        Ok(Self::candidate_pairs(&fingerprints)
            .into_iter()
            .map(|(a, b)| RecordPair::new(lookup[&a], lookup[&b]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{all_rules, rule_by_name};
    use proptest::prelude::*;

    fn records(names: &[&str]) -> Vec<Record> {
        names
            .iter()
            .enumerate()
            .map(|(row_id, n)| Record {
                row_id,
                values: vec![n.to_string()],
            })
            .collect()
    }

    fn engine() -> BlockingEngine {
        let specs = all_rules()
            .into_iter()
            .map(|rule| RuleSpec::new(0, "name", rule))
            .collect();
        BlockingEngine::new(specs, 1.0)
    }

    fn fitted() -> BlockingEngine {
        let left = records(&["frits", "frank", "stan", "ahmet", "fred"]);
        let right = records(&["frits h", "frank h", "stijn", "ahmet", "frederik"]);
        let pairs: Vec<RecordPair> = left.iter().zip(&right).map(|(l, r)| RecordPair::new(l, r)).collect();
        let mut engine = engine();
        engine.fit(&pairs, &[true, true, false, true, true]).unwrap();
        engine
    }

    #[test]
    fn fit_selects_covering_rules() {
        let engine = fitted();
        let selected: Vec<String> = engine
            .rules_selected()
            .unwrap()
            .iter()
            .map(|s| s.rule.name().to_string())
            .collect();
        // earliest rule covering every match; first_word misses fred/frederik
        assert_eq!(selected, vec!["first_three_letters".to_string()]);
    }

    #[test]
    fn transform_blocks_on_shared_prefix() {
        let engine = fitted();
        let data = records(&[
            "frits", "frits h", "frank", "frank h", "stan", "stijn", "ahmet", "fred", "frederik",
        ]);
        let pairs: Vec<(usize, usize)> = engine
            .transform(&data)
            .unwrap()
            .iter()
            .map(|p| p.row_ids())
            .collect();
        assert_eq!(pairs, vec![(0, 1), (2, 3), (7, 8)]);
    }

    #[test]
    fn fingerprints_carry_selection_index() {
        let engine = fitted();
        let prints = engine.fingerprint(&records(&["frits", " "])).unwrap();
        assert_eq!(prints.len(), 1);
        assert_eq!(prints[0].key(), "fri:0");
    }

    #[test]
    fn transform_before_fit_fails() {
        let err = engine().transform(&records(&["a"])).unwrap_err();
        assert_eq!(err.status, crate::response::Status::NotFitted);
    }

    #[test]
    fn no_matches_selects_no_rules() {
        let data = records(&["a", "b"]);
        let pairs = vec![RecordPair::new(&data[0], &data[1])];
        let mut engine = engine();
        engine.fit(&pairs, &[false]).unwrap();
        assert!(engine.rules_selected().unwrap().is_empty());
        assert!(engine.transform(&data).unwrap().is_empty());
    }

    #[test]
    fn pairs_sharing_several_fingerprints_appear_once() {
        let specs = vec![
            RuleSpec::new(0, "name", rule_by_name("whole_field").unwrap()),
            RuleSpec::new(0, "name", rule_by_name("first_word").unwrap()),
        ];
        let data = records(&["acme", "acme", "acme"]);
        let pairs = vec![RecordPair::new(&data[0], &data[1])];
        let mut engine = BlockingEngine::new(specs, 1.0);
        engine.fit(&pairs, &[true]).unwrap();
        engine.selected = Some(vec![0, 1]);
        let blocked: Vec<(usize, usize)> =
            engine.transform(&data).unwrap().iter().map(|p| p.row_ids()).collect();
        assert_eq!(blocked, vec![(0, 1), (0, 2), (1, 2)]);
    }

    proptest! {
        #[test]
        fn candidate_pairs_are_ordered_unique_and_sound(
            prints in prop::collection::vec((0usize..20, 0usize..3, "[ab]{1,2}"), 0..40)
        ) {
            let prints: Vec<Fingerprint> = prints
                .into_iter()
                .map(|(row_id, rule_index, token)| Fingerprint { row_id, rule_index, token })
                .collect();
            let pairs = BlockingEngine::candidate_pairs(&prints);
            let unique: BTreeSet<_> = pairs.iter().collect();
            prop_assert_eq!(unique.len(), pairs.len());
            for &(a, b) in &pairs {
                prop_assert!(a < b);
                let keys = |id: usize| prints.iter().filter(move |p| p.row_id == id).map(|p| p.key()).collect::<BTreeSet<_>>();
                prop_assert!(!keys(a).is_disjoint(&keys(b)));
            }
        }
    }
}
