use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::classifier::{LogisticRegression, MatchClassifier};
use crate::dto::DedupConfig;
use crate::error::DedupError;
use crate::features::FeaturedPair;
use crate::oracle::{Answer, Oracle, Query};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LearnerState {
    Uninitialized,
    Learning,
    Converged,
}

#[derive(Clone, Debug)]
pub struct LearnerOptions {
    /// Upper bound on oracle questions, abstentions and corrections included.
    pub n_queries: usize,
    /// A retrain whose largest parameter change stays below this counts as stable.
    pub coef_diff_threshold: f64,
    /// Consecutive stable retrains before labeling stops on its own; 0 never stops.
    pub patience: usize,
    pub max_consecutive_abstentions: usize,
}

impl Default for LearnerOptions {
    fn default() -> Self {
        LearnerOptions::from(&DedupConfig::default())
    }
}

impl From<&DedupConfig> for LearnerOptions {
    fn from(config: &DedupConfig) -> Self {
        LearnerOptions {
            n_queries: config.n_queries,
            coef_diff_threshold: config.coef_diff_threshold,
            patience: config.patience,
            max_consecutive_abstentions: config.max_consecutive_abstentions,
        }
    }
}

///
/// Trains a match classifier on similarity vectors by asking an oracle about
/// the pairs it is least sure of.
///
/// Until both classes have been seen the most and least similar pairs are
/// asked, after that plain uncertainty sampling: the unlabeled pair whose
/// match probability is closest to 0.5.
///
pub struct ActiveMatchLearner<C: MatchClassifier = LogisticRegression> {
    classifier: C,
    options: LearnerOptions,
    fields: Vec<String>,
    state: LearnerState,
    training: Vec<(Vec<f64>, bool)>,
    parameters: Vec<Option<Vec<f64>>>,
    counter_total: usize,
}

impl ActiveMatchLearner<LogisticRegression> {
    pub fn new(fields: Vec<String>, options: LearnerOptions) -> Self {
        ActiveMatchLearner::with_classifier(LogisticRegression::default(), fields, options)
    }
}

impl<C: MatchClassifier> ActiveMatchLearner<C> {
    pub fn with_classifier(classifier: C, fields: Vec<String>, options: LearnerOptions) -> Self {
        ActiveMatchLearner {
            classifier,
            options,
            fields,
            state: LearnerState::Uninitialized,
            training: Vec::new(),
            parameters: Vec::new(),
            counter_total: 0,
        }
    }

    pub fn state(&self) -> LearnerState {
        self.state
    }

    pub fn n_labeled(&self) -> usize {
        self.training.len()
    }

    fn n_positive(&self) -> usize {
        self.training.iter().filter(|(_, y)| *y).count()
    }

    fn retrain(&mut self) {
        let (features, labels): (Vec<Vec<f64>>, Vec<bool>) = self.training.iter().cloned().unzip();
        self.classifier.fit(&features, &labels);
        self.parameters.push(self.classifier.parameters());
    }

    /// Largest absolute change between the last two two-class fits.
    fn largest_coef_diff(&self) -> Option<f64> {
        let fitted: Vec<&Vec<f64>> = self.parameters.iter().flatten().collect();
        match fitted.as_slice() {
            [.., prev, last] if prev.len() == last.len() => Some(
                prev.iter()
                    .zip(last.iter())
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max),
            ),
            _ => None,
        }
    }

    fn teach(&mut self, features: &[Vec<f64>], labels: &[bool]) {
        self.training
            .extend(features.iter().cloned().zip(labels.iter().copied()));
        if self.state == LearnerState::Uninitialized {
            self.state = LearnerState::Learning;
        }
        self.retrain();
    }

    /// Fits on labels known upfront, without an oracle.
    pub fn fit_labeled(&mut self, features: &[Vec<f64>], labels: &[bool]) -> Result<(), DedupError> {
        self.teach(features, labels);
        self.finish()
    }

    fn finish(&mut self) -> Result<(), DedupError> {
        if self.training.is_empty() || !self.classifier.is_fitted() {
            return Err(DedupError::not_fitted(
                "active learning ended without a single labeled pair",
            ));
        }
        self.state = LearnerState::Converged;
        Ok(())
    }

    fn pick(&self, pool: &[FeaturedPair<'_>], unlabeled: &[usize]) -> usize {
        let n_positive = self.n_positive();
        let n_negative = self.training.len() - n_positive;
        let total = |i: usize| pool[i].similarities.iter().sum::<f64>();
        let best = |key: &dyn Fn(usize) -> f64| {
            unlabeled
                .iter()
                .enumerate()
                .fold(None, |best: Option<(usize, f64)>, (pos, &i)| {
                    let k = key(i);
                    match best {
                        Some((_, b)) if b <= k => best,
                        _ => Some((pos, k)),
                    }
                })
                .map_or(0, |(pos, _)| pos)
        };
        if n_positive == 0 {
            best(&|i| -total(i))
        } else if n_negative == 0 {
            best(&|i| total(i))
        } else {
            best(&|i| (self.classifier.probability(&pool[i].similarities) - 0.5).abs())
        }
    }

    fn ask(
        &self,
        oracle: &mut dyn Oracle,
        item: &FeaturedPair<'_>,
        parameters: Option<&[f64]>,
    ) -> Result<Answer, DedupError> {
        let n_positive = self.n_positive();
        let query = Query {
            fields: &self.fields,
            left: &item.pair.left.values,
            right: &item.pair.right.values,
            similarities: &item.similarities,
            n_labeled: self.counter_total,
            n_positive,
            n_negative: self.training.len() - n_positive,
            parameters,
        };
        oracle.label(&query)
    }

    ///
    /// Runs the labeling loop over `pool` until the oracle finishes, the
    /// query budget runs out, the pool is exhausted, the oracle keeps
    /// abstaining, or the classifier stops moving. Labels from an earlier
    /// `fit` are discarded.
    ///
    pub fn fit(&mut self, pool: &[FeaturedPair<'_>], oracle: &mut dyn Oracle) -> Result<(), DedupError> {
        self.state = LearnerState::Learning;
        self.training.clear();
        self.parameters.clear();
        self.counter_total = 0;
        let mut unlabeled: Vec<usize> = (0..pool.len()).collect();
        // pool index and training position of the last answered pair
        let mut previous: Option<(usize, usize)> = None;
        let mut abstentions = 0;
        let mut stable = 0;

        for _ in 0..self.options.n_queries {
            if unlabeled.is_empty() {
                info!("all {} candidate pairs labeled or skipped", pool.len());
                break;
            }
            let pos = self.pick(pool, &unlabeled);
            let idx = unlabeled[pos];
            let parameters = self.classifier.parameters();
            let answer = self.ask(oracle, &pool[idx], parameters.as_deref())?;
            let label = match answer {
                Answer::Finish => break,
                Answer::Previous => {
                    if let Some((prev_idx, slot)) = previous {
                        match self.ask(oracle, &pool[prev_idx], parameters.as_deref())? {
                            Answer::Match => self.training[slot].1 = true,
                            Answer::NoMatch => self.training[slot].1 = false,
                            Answer::Finish => break,
                            Answer::Skip | Answer::Previous => continue,
                        }
                        self.retrain();
                    }
                    continue;
                }
                Answer::Skip => {
                    unlabeled.remove(pos);
                    abstentions += 1;
                    self.counter_total += 1;
                    if abstentions >= self.options.max_consecutive_abstentions {
                        warn!("oracle abstained {abstentions} times in a row, stopping");
                        break;
                    }
                    continue;
                }
                Answer::Match => true,
                Answer::NoMatch => false,
            };
            abstentions = 0;
            unlabeled.remove(pos);
            self.training.push((pool[idx].similarities.clone(), label));
            previous = Some((idx, self.training.len() - 1));
            self.counter_total += 1;
            self.retrain();

            if let Some(diff) = self.largest_coef_diff() {
                debug!("largest step in LR coefficients: {diff:.5}");
                stable = if diff < self.options.coef_diff_threshold {
                    stable + 1
                } else {
                    0
                };
                if self.options.patience > 0 && stable >= self.options.patience {
                    info!("classifier converged after {} labels", self.training.len());
                    break;
                }
            }
        }

        let n_positive = self.n_positive();
        info!(
            "active learning finished: {} labels ({}+/{}-)",
            self.training.len(),
            n_positive,
            self.training.len() - n_positive
        );
        self.finish()?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let remaining: Vec<f64> = unlabeled
                .iter()
                .map(|&i| self.classifier.probability(&pool[i].similarities))
                .collect();
            for (upper, count) in score_histogram(&remaining) {
                debug!("score <= {upper:.2}: {count}");
            }
        }
        Ok(())
    }

    fn ensure_fitted(&self) -> Result<(), DedupError> {
        if self.state == LearnerState::Converged {
            Ok(())
        } else {
            Err(DedupError::not_fitted(
                "the match learner must be fitted before predicting",
            ))
        }
    }

    /// `[p(no match), p(match)]` per similarity vector.
    pub fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, DedupError> {
        self.ensure_fitted()?;
        Ok(features
            .par_iter()
            .map(|x| {
                let p = self.classifier.probability(x);
                [1.0 - p, p]
            })
            .collect())
    }

    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<bool>, DedupError> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|[_, p]| p >= 0.5)
            .collect())
    }
}

/// Counts of scores per 0.05 wide bin, keyed by the bin's upper edge.
pub fn score_histogram(scores: &[f64]) -> Vec<(f64, usize)> {
    let mut counts = vec![0usize; 20];
    for &s in scores {
        let bin = ((s * 20.0).ceil() as usize).clamp(1, 20) - 1;
        counts[bin] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| ((i + 1) as f64 * 0.05, c))
        .collect()
}
