use rayon::prelude::*;
use std::sync::Arc;

use crate::dto::Record;
use crate::error::DedupError;
use crate::metrics::SimilarityMetric;

/// Two records under comparison. Blocking output always has
/// `left.row_id < right.row_id`; training pairs may be reflexive.
#[derive(Clone, Copy, Debug)]
pub struct RecordPair<'a> {
    pub left: &'a Record,
    pub right: &'a Record,
}

impl<'a> RecordPair<'a> {
    pub fn new(left: &'a Record, right: &'a Record) -> Self {
        RecordPair { left, right }
    }

    pub fn row_ids(&self) -> (usize, usize) {
        (self.left.row_id, self.right.row_id)
    }

    /// True when every configured field holds the exact same value on both sides.
    pub fn is_exact_duplicate(&self) -> bool {
        self.left.values == self.right.values
    }
}

/// A pair together with its similarity vector.
#[derive(Clone, Debug)]
pub struct FeaturedPair<'a> {
    pub pair: RecordPair<'a>,
    pub similarities: Vec<f64>,
}

/// Metrics applied to one field.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub metrics: Vec<Arc<dyn SimilarityMetric>>,
}

impl FieldSpec {
    pub fn new(name: &str, metrics: Vec<Arc<dyn SimilarityMetric>>) -> Self {
        FieldSpec {
            name: name.to_string(),
            metrics,
        }
    }
}

/// Turns record pairs into fixed-order similarity vectors.
#[derive(Clone, Debug)]
pub struct PairFeaturizer {
    fields: Vec<FieldSpec>,
    interaction: bool,
}

impl PairFeaturizer {
    pub fn new(fields: Vec<FieldSpec>, interaction: bool) -> Self {
        PairFeaturizer {
            fields,
            interaction,
        }
    }

    /// Feature names in vector order, `<field>_<metric>` followed by
    /// `<a>*<b>` products when interaction features are on.
    pub fn feature_names(&self) -> Vec<String> {
        let base: Vec<String> = self
            .fields
            .iter()
            .flat_map(|f| f.metrics.iter().map(move |m| format!("{}_{}", f.name, m.name())))
            .collect();
        if !self.interaction {
            return base;
        }
        let mut names = base.clone();
        for i in 0..base.len() {
            for j in (i + 1)..base.len() {
                names.push(format!("{}*{}", base[i], base[j]));
            }
        }
        names
    }

    pub fn featurize(&self, pair: &RecordPair<'_>) -> Result<Vec<f64>, DedupError> {
        let mut scores = Vec::new();
        for (idx, field) in self.fields.iter().enumerate() {
            let (a, b) = (&pair.left.values[idx], &pair.right.values[idx]);
            for metric in &field.metrics {
                let score = metric.score(a, b).map_err(|err| {
                    DedupError::function_failed(format!(
                        "metric '{}' failed on field '{}': {}",
                        metric.name(),
                        field.name,
                        err.msg
                    ))
                })?;
                scores.push(score);
            }
        }
        if self.interaction {
            let n = scores.len();
            for i in 0..n {
                for j in (i + 1)..n {
                    scores.push(scores[i] * scores[j]);
                }
            }
        }
        Ok(scores)
    }

    pub fn featurize_all<'a>(
        &self,
        pairs: Vec<RecordPair<'a>>,
    ) -> Result<Vec<FeaturedPair<'a>>, DedupError> {
        pairs
            .into_par_iter()
            .map(|pair| {
                self.featurize(&pair)
                    .map(|similarities| FeaturedPair { pair, similarities })
            })
            .collect()
    }
}
