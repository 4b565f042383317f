//! String similarity metrics used as pair features.
//!
//! The fuzzy ratios live on a 0-100 scale and are length adjusted: when one
//! of the two strings is short the score is damped, since short strings match
//! each other by accident far more often.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::DedupError;

/// A pure similarity function of two field values.
pub trait SimilarityMetric: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, a: &str, b: &str) -> Result<f64, DedupError>;
}

impl fmt::Debug for dyn SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SimilarityMetric({})", self.name())
    }
}

#[derive(Clone, Copy)]
pub struct FnMetric {
    name: &'static str,
    func: fn(&str, &str) -> f64,
}

impl FnMetric {
    pub const fn new(name: &'static str, func: fn(&str, &str) -> f64) -> Self {
        FnMetric { name, func }
    }
}

impl SimilarityMetric for FnMetric {
    fn name(&self) -> &str {
        self.name
    }

    fn score(&self, a: &str, b: &str) -> Result<f64, DedupError> {
        Ok((self.func)(a, b))
    }
}

/// Factor in `[0, 1)` that approaches 1 as the shortest string grows.
pub fn length_adjustment(a: &str, b: &str) -> f64 {
    let shortest = a.chars().count().min(b.chars().count());
    1.0 - (-0.2 * shortest as f64).exp()
}

/// LCS length using two-row DP (space-optimised).
fn lcs_length(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn char_ratio(a: &[char], b: &[char]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matches = lcs_length(a, b);
    100.0 * 2.0 * matches as f64 / (a.len() + b.len()) as f64
}

/// Indel similarity `2 * LCS / (len_a + len_b)` on a 0-100 scale.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    char_ratio(&a, &b)
}

/// Best ratio of the shorter string against every equally long window of the longer.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0.0;
    }
    long.windows(short.len())
        .map(|window| char_ratio(&short, window))
        .fold(0.0, f64::max)
}

fn tokens(x: &str) -> Vec<String> {
    x.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect()
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let mut ta = tokens(a);
    let mut tb = tokens(b);
    ta.sort();
    tb.sort();
    ratio(&ta.join(" "), &tb.join(" "))
}

pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<String> = tokens(a).into_iter().collect();
    let tb: BTreeSet<String> = tokens(b).into_iter().collect();
    let join = |set: Vec<&String>| {
        set.into_iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    };
    let common = join(ta.intersection(&tb).collect());
    let with_rest = |rest: String| {
        if common.is_empty() {
            rest
        } else if rest.is_empty() {
            common.clone()
        } else {
            format!("{common} {rest}")
        }
    };
    let t1 = with_rest(join(ta.difference(&tb).collect()));
    let t2 = with_rest(join(tb.difference(&ta).collect()));
    ratio(&common, &t1)
        .max(ratio(&common, &t2))
        .max(ratio(&t1, &t2))
}

pub fn adjusted_ratio(a: &str, b: &str) -> f64 {
    length_adjustment(a, b) * ratio(a, b)
}

pub fn adjusted_token_sort_ratio(a: &str, b: &str) -> f64 {
    length_adjustment(a, b) * token_sort_ratio(a, b)
}

pub fn adjusted_token_set_ratio(a: &str, b: &str) -> f64 {
    length_adjustment(a, b) * token_set_ratio(a, b)
}

pub fn adjusted_partial_ratio(a: &str, b: &str) -> f64 {
    length_adjustment(a, b) * partial_ratio(a, b)
}

pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    100.0 * strsim::jaro_winkler(a, b)
}

pub fn normalized_levenshtein(a: &str, b: &str) -> f64 {
    100.0 * strsim::normalized_levenshtein(a, b)
}

const BUILTIN_METRICS: [FnMetric; 6] = [
    FnMetric::new("adjusted_ratio", adjusted_ratio),
    FnMetric::new("adjusted_token_sort_ratio", adjusted_token_sort_ratio),
    FnMetric::new("adjusted_token_set_ratio", adjusted_token_set_ratio),
    FnMetric::new("adjusted_partial_ratio", adjusted_partial_ratio),
    FnMetric::new("jaro_winkler", jaro_winkler),
    FnMetric::new("normalized_levenshtein", normalized_levenshtein),
];

pub fn metric_by_name(name: &str) -> Result<Arc<dyn SimilarityMetric>, DedupError> {
    BUILTIN_METRICS
        .iter()
        .find(|m| m.name == name)
        .map(|m| Arc::new(*m) as Arc<dyn SimilarityMetric>)
        .ok_or_else(|| DedupError::invalid_config(format!("unknown similarity metric '{name}'")))
}

/// Metrics used for every field configured through `col_names`.
pub fn default_metrics() -> Vec<Arc<dyn SimilarityMetric>> {
    BUILTIN_METRICS[..2]
        .iter()
        .map(|m| Arc::new(*m) as Arc<dyn SimilarityMetric>)
        .collect()
}
