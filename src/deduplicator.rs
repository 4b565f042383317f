//! Fit and predict over whole tables.

use rand::prelude::*;
use rand::seq::index::sample;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::blocking::{BlockingEngine, RuleSpec};
use crate::clustering::{hierarchical_clustering, ScoredPair};
use crate::dedup::DeduplicationTable;
use crate::dto::{DedupConfig, RulesConfig, Table, DEDUPLICATION_ID_NAME};
use crate::error::DedupError;
use crate::features::{FieldSpec, PairFeaturizer, RecordPair};
use crate::learner::{ActiveMatchLearner, LearnerOptions, LearnerState};
use crate::metrics::{default_metrics, metric_by_name};
use crate::oracle::Oracle;
use crate::response::RunSummary;
use crate::rules::{all_rules, rule_by_name, PredicateRule};
use crate::util::{write_pairs_table, write_scored_pairs_table, PAIRS_TABLE_FILE, SCORED_PAIRS_TABLE_FILE};

pub const DEFAULT_N_SAMPLES: usize = 10_000;
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.1;
pub const DEFAULT_CLUSTER_THRESHOLD: f64 = 0.5;

///
/// Deduplicates the rows of a table on a set of fields.
///
/// `fit` runs an interactive labeling session on a sample of pairs and learns
/// blocking rules from it; `predict` then appends a `deduplication_id` column
/// where rows sharing an id are duplicates of each other.
///
pub struct Deduplicator {
    fields: Vec<String>,
    featurizer: PairFeaturizer,
    blocker: BlockingEngine,
    learner: ActiveMatchLearner,
    save_intermediate_steps: bool,
    intermediate_dir: PathBuf,
    seed: Option<u64>,
}

impl Deduplicator {
    ///
    /// Builds a deduplicator from configuration, resolving metric and rule names.
    ///
    pub fn new(config: &DedupConfig) -> Result<Self, DedupError> {
        let field_specs = match (&config.col_names, &config.field_info) {
            (Some(col_names), _) => {
                if col_names.is_empty() {
                    return Err(DedupError::invalid_config("`col_names` must not be empty"));
                }
                col_names
                    .iter()
                    .map(|name| FieldSpec::new(name, default_metrics()))
                    .collect::<Vec<_>>()
            }
            (None, Some(field_info)) => {
                if field_info.is_empty() {
                    return Err(DedupError::invalid_config("`field_info` must not be empty"));
                }
                field_info
                    .iter()
                    .map(|(name, metrics)| {
                        let metrics = metrics
                            .iter()
                            .map(|m| metric_by_name(m))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(FieldSpec::new(name, metrics))
                    })
                    .collect::<Result<Vec<_>, DedupError>>()?
            }
            (None, None) => {
                return Err(DedupError::invalid_config(
                    "either `col_names` or `field_info` must be given",
                ))
            }
        };
        let names: Vec<String> = field_specs.iter().map(|f| f.name.clone()).collect();
        let rule_specs = resolve_rules(&names, config.rules.as_ref())?;
        Self::with_components(field_specs, rule_specs, config)
    }

    ///
    /// Builds a deduplicator from ready made fields and rules, e.g. custom
    /// metric or rule implementations. Name based options of `config`
    /// (`col_names`, `field_info`, `rules`) are ignored.
    ///
    pub fn with_components(
        fields: Vec<FieldSpec>,
        rules: Vec<RuleSpec>,
        config: &DedupConfig,
    ) -> Result<Self, DedupError> {
        if fields.is_empty() {
            return Err(DedupError::invalid_config("at least one field is required"));
        }
        if let Some(field) = fields.iter().find(|f| f.metrics.is_empty()) {
            return Err(DedupError::invalid_config(format!(
                "field '{}' has no similarity metrics",
                field.name
            )));
        }
        let mut seen = BTreeSet::new();
        if let Some(field) = fields.iter().find(|f| !seen.insert(f.name.as_str())) {
            return Err(DedupError::invalid_config(format!(
                "field '{}' is configured twice",
                field.name
            )));
        }
        if let Some(rule) = rules.iter().find(|r| r.field_index >= fields.len()) {
            return Err(DedupError::invalid_config(format!(
                "rule '{}' refers to field {} of {}",
                rule.label(),
                rule.field_index,
                fields.len()
            )));
        }
        if !(config.recall > 0.0 && config.recall <= 1.0) {
            return Err(DedupError::invalid_config(format!(
                "`recall` must lie in (0, 1], got {}",
                config.recall
            )));
        }
        let names: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
        Ok(Deduplicator {
            learner: ActiveMatchLearner::new(names.clone(), LearnerOptions::from(config)),
            featurizer: PairFeaturizer::new(fields, config.interaction),
            blocker: BlockingEngine::new(rules, config.recall),
            fields: names,
            save_intermediate_steps: config.save_intermediate_steps,
            intermediate_dir: PathBuf::from(&config.intermediate_dir),
            seed: config.seed,
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn is_fitted(&self) -> bool {
        self.learner.state() == LearnerState::Converged && self.blocker.rules_selected().is_ok()
    }

    /// Labels of the selected blocking rules, `<field> <rule>`.
    pub fn rules_selected(&self) -> Result<Vec<String>, DedupError> {
        Ok(self.blocker.rules_selected()?.iter().map(|s| s.label()).collect())
    }

    ///
    /// Trains on `table`.
    ///
    /// ## Arguments
    ///
    /// * `table` - Data to sample training pairs from.
    /// * `n_samples` - Approximate number of training pairs; `ceil(sqrt(n_samples))`
    ///   rows are sampled and paired with each other, themselves included.
    /// * `oracle` - Answers the labeling questions.
    ///
    pub fn fit(&mut self, table: &Table, n_samples: usize, oracle: &mut dyn Oracle) -> Result<&mut Self, DedupError> {
        let start = Instant::now();
        let records = table.records(&self.fields)?;
        if records.is_empty() {
            return Err(DedupError::invalid_input("cannot fit on an empty table"));
        }
        let sample_size = ((n_samples as f64).sqrt().ceil() as usize).clamp(1, records.len());
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut picked = sample(&mut rng, records.len(), sample_size).into_vec();
        picked.sort_unstable();

        let mut pairs = Vec::with_capacity(sample_size * (sample_size + 1) / 2);
        for (i, &a) in picked.iter().enumerate() {
            for &b in &picked[i..] {
                pairs.push(RecordPair::new(&records[a], &records[b]));
            }
        }
        let featured = self.featurizer.featurize_all(pairs)?;
        info!(
            "{} training pairs from {} sampled rows featurized in {:.4} secs",
            featured.len(),
            sample_size,
            start.elapsed().as_secs_f64()
        );

        let start = Instant::now();
        self.learner.fit(&featured, oracle)?;
        info!(
            "active learning finished in {:.4} secs",
            start.elapsed().as_secs_f64()
        );

        // learner predictions stand in for labels on the unlabeled rest of the sample
        let start = Instant::now();
        let features: Vec<Vec<f64>> = featured.iter().map(|f| f.similarities.clone()).collect();
        let labels = self.learner.predict(&features)?;
        let pairs: Vec<RecordPair<'_>> = featured.iter().map(|f| f.pair).collect();
        self.blocker.fit(&pairs, &labels)?;
        info!(
            "blocking rules found in {:.4} secs: {:?}",
            start.elapsed().as_secs_f64(),
            self.rules_selected()?
        );
        Ok(self)
    }

    ///
    /// Returns `table` with a `deduplication_id` column appended.
    ///
    /// ## Arguments
    ///
    /// * `score_threshold` - Pairs scoring below it are dropped before clustering.
    /// * `cluster_threshold` - Minimum similarity, `1 - distance`, at which
    ///   hierarchical clustering still merges.
    ///
    pub fn predict(&self, table: &Table, score_threshold: f64, cluster_threshold: f64) -> Result<Table, DedupError> {
        self.predict_with_summary(table, score_threshold, cluster_threshold)
            .map(|(table, _)| table)
    }

    pub fn predict_with_summary(
        &self,
        table: &Table,
        score_threshold: f64,
        cluster_threshold: f64,
    ) -> Result<(Table, RunSummary), DedupError> {
        if table.column_index(DEDUPLICATION_ID_NAME).is_ok() {
            return Err(DedupError::invalid_input(format!(
                "table already has a '{DEDUPLICATION_ID_NAME}' column"
            )));
        }
        let (ids, summary) = self.assign_clusters(table, score_threshold, cluster_threshold)?;
        Ok((table.with_id_column(DEDUPLICATION_ID_NAME, &ids), summary))
    }

    ///
    /// One dense cluster id per row of `table`, numbered by first appearance.
    ///
    pub fn assign_clusters(
        &self,
        table: &Table,
        score_threshold: f64,
        cluster_threshold: f64,
    ) -> Result<(Vec<usize>, RunSummary), DedupError> {
        if !(0.0..=1.0).contains(&score_threshold) {
            return Err(DedupError::invalid_input(format!(
                "score_threshold must lie in [0, 1], got {score_threshold}"
            )));
        }
        if !self.is_fitted() {
            return Err(DedupError::not_fitted("call fit before predict"));
        }
        let records = table.records(&self.fields)?;

        let start = Instant::now();
        let pairs = self.blocker.transform(&records)?;
        info!(
            "blocking produced {} candidate pairs in {:.4} secs",
            pairs.len(),
            start.elapsed().as_secs_f64()
        );

        let start = Instant::now();
        let featured = self.featurizer.featurize_all(pairs)?;
        if self.save_intermediate_steps {
            write_pairs_table(&self.intermediate_dir.join(PAIRS_TABLE_FILE), &self.fields, &featured)?;
        }
        let n_candidate_pairs = featured.len();
        let features: Vec<Vec<f64>> = featured.iter().map(|f| f.similarities.clone()).collect();
        let probabilities = self.learner.predict_proba(&features)?;
        let scored: Vec<ScoredPair<'_>> = featured
            .into_iter()
            .zip(probabilities)
            .map(|(f, [_, p])| ScoredPair {
                score: if f.pair.is_exact_duplicate() { 1.0 } else { p },
                pair: f.pair,
                similarities: f.similarities,
            })
            .filter(|s| s.score >= score_threshold)
            .collect();
        info!(
            "{} of {} pairs scored at least {} in {:.4} secs",
            scored.len(),
            n_candidate_pairs,
            score_threshold,
            start.elapsed().as_secs_f64()
        );
        if self.save_intermediate_steps {
            write_scored_pairs_table(
                &self.intermediate_dir.join(SCORED_PAIRS_TABLE_FILE),
                &self.fields,
                &scored,
            )?;
        }

        let start = Instant::now();
        let clustering = hierarchical_clustering(&scored, cluster_threshold)?;
        let mut dedup_table = DeduplicationTable::from_clustering(&clustering);
        let n_singletons = dedup_table.add_singletons(records.len());
        debug!("{n_singletons} rows matched no pair");
        let ids: Vec<usize> = dedup_table
            .dense_ids(records.len())?
            .into_iter()
            .map(|r| r.cluster_id)
            .collect();
        info!(
            "{} clusters over {} rows in {:.4} secs",
            dedup_table.n_clusters(),
            records.len(),
            start.elapsed().as_secs_f64()
        );

        let summary = RunSummary {
            n_records: records.len(),
            n_labeled: self.learner.n_labeled(),
            n_candidate_pairs,
            n_scored_pairs: scored.len(),
            n_clusters: dedup_table.n_clusters(),
            largest_cluster: dedup_table.largest_group(),
            rules_selected: self.rules_selected()?,
        };
        Ok((ids, summary))
    }
}

/// One RuleSpec per (field, rule), fields in configuration order.
fn resolve_rules(fields: &[String], rules: Option<&RulesConfig>) -> Result<Vec<RuleSpec>, DedupError> {
    let per_field: Vec<Vec<Arc<dyn PredicateRule>>> = match rules {
        None => fields.iter().map(|_| all_rules()).collect(),
        Some(RulesConfig::All(names)) => {
            let resolved = names
                .iter()
                .map(|n| rule_by_name(n))
                .collect::<Result<Vec<_>, _>>()?;
            fields.iter().map(|_| resolved.clone()).collect()
        }
        Some(RulesConfig::PerField(map)) => {
            if let Some(unknown) = map.keys().find(|k| !fields.contains(k)) {
                return Err(DedupError::invalid_config(format!(
                    "`rules` names field '{unknown}' which is not configured"
                )));
            }
            fields
                .iter()
                .map(|f| {
                    map.get(f)
                        .map(|names| names.iter().map(|n| rule_by_name(n)).collect::<Result<Vec<_>, _>>())
                        .unwrap_or_else(|| Ok(Vec::new()))
                })
                .collect::<Result<Vec<_>, DedupError>>()?
        }
    };
    Ok(fields
        .iter()
        .zip(per_field)
        .enumerate()
        .flat_map(|(idx, (name, rules))| {
            rules
                .into_iter()
                .map(move |rule| RuleSpec::new(idx, name, rule))
        })
        .collect())
}

impl fmt::Display for Deduplicator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Deduplicator")?;
        writeln!(f, "  - fields = {:?}", self.featurizer.feature_names())?;
        let mut rules: Vec<String> = self.blocker.specs().iter().map(|s| s.label()).collect();
        if let Ok(selected) = self.rules_selected() {
            rules = selected;
            write!(f, "  - rules_selected = ")?;
        } else {
            write!(f, "  - rules = ")?;
        }
        writeln!(f, "{rules:?}")?;
        write!(f, "  - recall = {}", self.blocker.recall())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{Answer, Query};
    use crate::response::Status;

    #[test]
    fn config_needs_fields() {
        let err = Deduplicator::new(&DedupConfig::default()).err().unwrap();
        assert_eq!(err.status, Status::InvalidConfig);
        let err = Deduplicator::new(&DedupConfig::for_columns(&[])).err().unwrap();
        assert!(err.msg.contains("col_names"));
    }

    #[test]
    fn config_rejects_unknown_names() {
        let mut config = DedupConfig::for_columns(&["name"]);
        config.rules = Some(RulesConfig::All(vec!["nope".into()]));
        assert_eq!(Deduplicator::new(&config).err().unwrap().status, Status::InvalidConfig);

        let config: DedupConfig =
            serde_json::from_str(r#"{"field_info": {"name": ["no_such_metric"]}}"#).unwrap();
        assert_eq!(Deduplicator::new(&config).err().unwrap().status, Status::InvalidConfig);

        let config: DedupConfig =
            serde_json::from_str(r#"{"col_names": ["name"], "rules": {"city": ["first_word"]}}"#).unwrap();
        assert!(Deduplicator::new(&config).err().unwrap().msg.contains("city"));
    }

    #[test]
    fn config_checks_recall() {
        let mut config = DedupConfig::for_columns(&["name"]);
        config.recall = 0.0;
        assert!(Deduplicator::new(&config).is_err());
        config.recall = 0.9;
        assert!(Deduplicator::new(&config).is_ok());
    }

    #[test]
    fn rules_expand_per_field() {
        let config: DedupConfig = serde_json::from_str(
            r#"{"col_names": ["name", "city"], "rules": {"city": ["whole_field", "first_word"]}}"#,
        )
        .unwrap();
        let dedup = Deduplicator::new(&config).unwrap();
        let labels: Vec<String> = dedup.blocker.specs().iter().map(|s| s.label()).collect();
        assert_eq!(labels, vec!["city whole_field", "city first_word"]);

        let dedup = Deduplicator::new(&DedupConfig::for_columns(&["name", "city"])).unwrap();
        assert_eq!(dedup.fields(), ["name".to_string(), "city".to_string()]);
        assert_eq!(dedup.blocker.specs().len(), 2 * all_rules().len());

        let config: DedupConfig = serde_json::from_str(
            r#"{"field_info": {"zip": ["jaro_winkler"], "name": ["adjusted_ratio"]}}"#,
        )
        .unwrap();
        let dedup = Deduplicator::new(&config).unwrap();
        assert_eq!(dedup.fields(), ["zip".to_string(), "name".to_string()]);
        assert_eq!(dedup.featurizer.feature_names(), vec!["zip_jaro_winkler", "name_adjusted_ratio"]);
    }

    #[test]
    fn predict_before_fit_fails() {
        let dedup = Deduplicator::new(&DedupConfig::for_columns(&["name"])).unwrap();
        let table = Table::from_column("name", &["a", "b"]);
        let err = dedup.predict(&table, 0.1, 0.5).unwrap_err();
        assert_eq!(err.status, Status::NotFitted);
    }

    #[test]
    fn display_lists_features() {
        let dedup = Deduplicator::new(&DedupConfig::for_columns(&["name"])).unwrap();
        let shown = dedup.to_string();
        assert!(shown.starts_with("Deduplicator"));
        assert!(shown.contains("name_adjusted_ratio"));
        assert!(shown.contains("recall = 1"));
    }

    #[test]
    fn fit_samples_sqrt_of_n_samples_rows() {
        let names: Vec<String> = (0..30).map(|i| format!("company {i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let table = Table::from_column("name", &refs);
        let mut config = DedupConfig::for_columns(&["name"]);
        config.seed = Some(7);
        let mut dedup = Deduplicator::new(&config).unwrap();
        let mut asked = 0;
        let mut oracle = |q: &Query<'_>| {
            asked += 1;
            if q.left == q.right {
                Answer::Match
            } else {
                Answer::NoMatch
            }
        };
        // 5 rows give a pool of 15 pairs
        dedup.fit(&table, 25, &mut oracle).unwrap();
        assert!(asked >= 2 && asked <= 15);
        assert!(dedup.is_fitted());
    }
}
