//! Default pair classifier: standard scaling followed by L2-regularized
//! logistic regression with balanced class weights.

use serde::{Deserialize, Serialize};

/// Probabilistic binary classifier over similarity vectors.
pub trait MatchClassifier: Send + Sync {
    /// Refits from scratch on the labeled examples. Returns false when there
    /// is nothing to learn from.
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool]) -> bool;
    fn is_fitted(&self) -> bool;
    /// Match probability of one vector. Only meaningful once fitted.
    fn probability(&self, features: &[f64]) -> f64;
    /// Flattened model parameters, used to measure how much a retrain moved the model.
    fn parameters(&self) -> Option<Vec<f64>>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(features: &[Vec<f64>]) -> Self {
        let dim = features.first().map_or(0, Vec::len);
        let n = features.len().max(1) as f64;
        let means: Vec<f64> = (0..dim)
            .map(|j| features.iter().map(|x| x[j]).sum::<f64>() / n)
            .collect();
        let scales = (0..dim)
            .map(|j| {
                let var = features.iter().map(|x| (x[j] - means[j]).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std > 1e-12 {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        StandardScaler { means, scales }
    }

    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum ModelKind {
    /// Only one class seen so far: predicts its smoothed frequency.
    Prior,
    Logistic,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Inverse regularization strength.
    c: f64,
    scaler: StandardScaler,
    weights: Vec<f64>,
    bias: f64,
    kind: Option<ModelKind>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        LogisticRegression::new(1.0)
    }
}

const MAX_NEWTON_STEPS: usize = 100;
const GRADIENT_TOLERANCE: f64 = 1e-9;

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

impl LogisticRegression {
    pub fn new(c: f64) -> Self {
        LogisticRegression {
            c,
            scaler: StandardScaler::default(),
            weights: Vec::new(),
            bias: 0.0,
            kind: None,
        }
    }

    fn linear(&self, x: &[f64], weights: &[f64], bias: f64) -> f64 {
        x.iter().zip(weights).map(|(a, b)| a * b).sum::<f64>() + bias
    }

    fn objective(&self, xs: &[Vec<f64>], ys: &[f64], sw: &[f64], weights: &[f64], bias: f64) -> f64 {
        let loss: f64 = xs
            .iter()
            .zip(ys.iter().zip(sw))
            .map(|(x, (y, s))| {
                let z = self.linear(x, weights, bias);
                s * (softplus(z) - y * z)
            })
            .sum();
        loss + 0.5 / self.c * weights.iter().map(|w| w * w).sum::<f64>()
    }

    fn fit_logistic(&mut self, xs: &[Vec<f64>], ys: &[f64], sw: &[f64]) {
        let dim = xs[0].len();
        let mut weights = vec![0.0; dim];
        let mut bias = 0.0;
        for _ in 0..MAX_NEWTON_STEPS {
            // gradient and hessian over [weights..., bias]
            let mut grad = vec![0.0; dim + 1];
            let mut hess = vec![vec![0.0; dim + 1]; dim + 1];
            for (x, (y, s)) in xs.iter().zip(ys.iter().zip(sw)) {
                let p = sigmoid(self.linear(x, &weights, bias));
                let r = s * (p - y);
                let curvature = s * p * (1.0 - p);
                for i in 0..=dim {
                    let xi = if i < dim { x[i] } else { 1.0 };
                    grad[i] += r * xi;
                    for j in 0..=dim {
                        let xj = if j < dim { x[j] } else { 1.0 };
                        hess[i][j] += curvature * xi * xj;
                    }
                }
            }
            for i in 0..dim {
                grad[i] += weights[i] / self.c;
                hess[i][i] += 1.0 / self.c;
            }
            hess[dim][dim] += 1e-10;
            if grad.iter().all(|g| g.abs() < GRADIENT_TOLERANCE) {
                break;
            }
            let step = match solve(hess, grad.clone()) {
                Some(step) => step,
                None => break,
            };
            let current = self.objective(xs, ys, sw, &weights, bias);
            let slope: f64 = grad.iter().zip(&step).map(|(g, d)| g * d).sum();
            let mut t = 1.0;
            loop {
                let candidate: Vec<f64> = weights.iter().zip(&step).map(|(w, d)| w - t * d).collect();
                let candidate_bias = bias - t * step[dim];
                let value = self.objective(xs, ys, sw, &candidate, candidate_bias);
                if value <= current - 1e-4 * t * slope || t < 1e-10 {
                    weights = candidate;
                    bias = candidate_bias;
                    break;
                }
                t *= 0.5;
            }
            if t * step.iter().fold(0.0f64, |m, d| m.max(d.abs())) < 1e-12 {
                break;
            }
        }
        self.weights = weights;
        self.bias = bias;
    }
}

/// Solves `a x = b` with partial pivoting. `None` when `a` is singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

impl MatchClassifier for LogisticRegression {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool]) -> bool {
        if features.is_empty() {
            return false;
        }
        let n = labels.len() as f64;
        let n_pos = labels.iter().filter(|&&l| l).count() as f64;
        let n_neg = n - n_pos;
        self.scaler = StandardScaler::fit(features);
        let dim = features[0].len();
        if n_pos == 0.0 || n_neg == 0.0 {
            let prior = (n_pos + 0.5) / (n + 1.0);
            self.weights = vec![0.0; dim];
            self.bias = (prior / (1.0 - prior)).ln();
            self.kind = Some(ModelKind::Prior);
            return true;
        }
        let xs: Vec<Vec<f64>> = features.iter().map(|x| self.scaler.transform(x)).collect();
        let ys: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        let sw: Vec<f64> = labels
            .iter()
            .map(|&l| n / (2.0 * if l { n_pos } else { n_neg }))
            .collect();
        self.fit_logistic(&xs, &ys, &sw);
        self.kind = Some(ModelKind::Logistic);
        true
    }

    fn is_fitted(&self) -> bool {
        self.kind.is_some()
    }

    fn probability(&self, features: &[f64]) -> f64 {
        let x = self.scaler.transform(features);
        sigmoid(self.linear(&x, &self.weights, self.bias))
    }

    fn parameters(&self) -> Option<Vec<f64>> {
        match self.kind {
            Some(ModelKind::Logistic) => {
                let mut params = vec![self.bias];
                params.extend_from_slice(&self.weights);
                Some(params)
            }
            _ => None,
        }
    }
}
