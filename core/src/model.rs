//! The classifier capability and its two shipped implementations.
//!
//! The scorer is polymorphic over anything with {fit, predict_proba}; this
//! module provides a standardized logistic regression and a gradient-boosted
//! stump ensemble behind the same trait. Both are fully deterministic: the
//! logistic model uses zero-initialized full-batch gradient descent, and the
//! boosted model draws its per-round column subsample from a fixed-seed
//! Pcg64Mcg stream.
//!
//! RULE: nothing in this module may call a platform RNG.

use crate::error::{PipelineError, PipelineResult};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Pluggable churn classifier: fit(features, labels) → model,
/// predict_proba(features) → probabilities in [0, 1].
pub trait ChurnClassifier {
    fn name(&self) -> &'static str;

    /// Fit on labeled rows. `y` holds 0 (retained) / 1 (churned).
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> PipelineResult<()>;

    /// Probability of churn per row. Panics if called before a successful
    /// fit — the pipeline always fits first.
    fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64>;
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn check_training_input(x: &[Vec<f64>], y: &[u8]) -> PipelineResult<usize> {
    if x.is_empty() || x.len() != y.len() {
        return Err(PipelineError::DataSufficiency(format!(
            "classifier fit requires matching non-empty inputs (x={}, y={})",
            x.len(),
            y.len()
        )));
    }
    let dim = x[0].len();
    if dim == 0 || x.iter().any(|row| row.len() != dim) {
        return Err(PipelineError::DataSufficiency(
            "classifier fit requires a consistent non-empty feature dimension".into(),
        ));
    }
    Ok(dim)
}

// ── Logistic regression ──────────────────────────────────────────────────────

/// Standardized full-batch gradient-descent logistic regression.
pub struct LogisticRegressionModel {
    learning_rate: f64,
    max_iter:      usize,
    weights:       Vec<f64>,
    bias:          f64,
    means:         Vec<f64>,
    stds:          Vec<f64>,
    fitted:        bool,
}

impl Default for LogisticRegressionModel {
    fn default() -> Self {
        Self::new(0.1, 500)
    }
}

impl LogisticRegressionModel {
    pub fn new(learning_rate: f64, max_iter: usize) -> Self {
        Self {
            learning_rate,
            max_iter,
            weights: Vec::new(),
            bias: 0.0,
            means: Vec::new(),
            stds: Vec::new(),
            fitted: false,
        }
    }

    fn standardize(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

impl ChurnClassifier for LogisticRegressionModel {
    fn name(&self) -> &'static str {
        "LogReg"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> PipelineResult<()> {
        let dim = check_training_input(x, y)?;
        let n = x.len() as f64;

        self.means = vec![0.0; dim];
        for row in x {
            for (m, v) in self.means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        self.stds = vec![0.0; dim];
        for row in x {
            for ((s, v), m) in self.stds.iter_mut().zip(row).zip(&self.means) {
                *s += (v - m) * (v - m) / n;
            }
        }
        for s in &mut self.stds {
            *s = s.sqrt();
            if *s < 1e-12 {
                *s = 1.0; // constant column: leave it centered, not scaled
            }
        }

        let z: Vec<Vec<f64>> = x.iter().map(|row| self.standardize(row)).collect();

        self.weights = vec![0.0; dim];
        self.bias = 0.0;
        for _ in 0..self.max_iter {
            let mut grad_w = vec![0.0; dim];
            let mut grad_b = 0.0;
            for (row, &label) in z.iter().zip(y) {
                let pred = sigmoid(
                    row.iter().zip(&self.weights).map(|(v, w)| v * w).sum::<f64>() + self.bias,
                );
                let err = pred - label as f64;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v / n;
                }
                grad_b += err / n;
            }
            for (w, g) in self.weights.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * g;
            }
            self.bias -= self.learning_rate * grad_b;
        }

        self.fitted = true;
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        assert!(self.fitted, "predict_proba called before fit");
        x.iter()
            .map(|row| {
                let z = self.standardize(row);
                sigmoid(
                    z.iter().zip(&self.weights).map(|(v, w)| v * w).sum::<f64>() + self.bias,
                )
            })
            .collect()
    }
}

// ── Gradient-boosted stumps ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Stump {
    feature:     usize,
    threshold:   f64,
    gamma_left:  f64, // value <= threshold
    gamma_right: f64,
}

/// Additive logistic boosting over depth-1 trees with shrinkage and a
/// deterministic per-round column subsample.
pub struct GradientBoostedStumps {
    n_rounds:         usize,
    learning_rate:    f64,
    colsample:        f64,
    min_leaf_samples: usize,
    seed:             u64,
    base_score:       f64,
    stumps:           Vec<Stump>,
    fitted:           bool,
}

impl GradientBoostedStumps {
    pub fn new(seed: u64) -> Self {
        Self {
            n_rounds: 200,
            learning_rate: 0.05,
            colsample: 0.8,
            min_leaf_samples: 5,
            seed,
            base_score: 0.0,
            stumps: Vec::new(),
            fitted: false,
        }
    }

    fn raw_score(&self, row: &[f64]) -> f64 {
        let mut f = self.base_score;
        for stump in &self.stumps {
            let gamma = if row[stump.feature] <= stump.threshold {
                stump.gamma_left
            } else {
                stump.gamma_right
            };
            f += self.learning_rate * gamma;
        }
        f
    }

    /// Candidate thresholds: interior deciles of the feature's distinct
    /// sorted values.
    fn candidate_thresholds(values: &[f64]) -> Vec<f64> {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("feature values are finite"));
        sorted.dedup();
        if sorted.len() < 2 {
            return Vec::new();
        }
        let mut out = Vec::new();
        for i in 1..10 {
            let pos = (i * (sorted.len() - 1)) / 10;
            out.push(sorted[pos]);
        }
        out.dedup();
        out
    }
}

impl ChurnClassifier for GradientBoostedStumps {
    fn name(&self) -> &'static str {
        "BoostedStumps"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> PipelineResult<()> {
        let dim = check_training_input(x, y)?;
        let n = x.len();

        let pos = y.iter().filter(|&&v| v == 1).count() as f64;
        let prior = (pos / n as f64).clamp(1e-6, 1.0 - 1e-6);
        self.base_score = (prior / (1.0 - prior)).ln();
        self.stumps.clear();

        let mut rng = Pcg64Mcg::seed_from_u64(self.seed);
        let n_cols = ((dim as f64 * self.colsample).ceil() as usize).clamp(1, dim);

        let mut raw: Vec<f64> = vec![self.base_score; n];

        for _ in 0..self.n_rounds {
            let prob: Vec<f64> = raw.iter().map(|&f| sigmoid(f)).collect();
            let grad: Vec<f64> = prob
                .iter()
                .zip(y)
                .map(|(p, &label)| label as f64 - p)
                .collect();
            let hess: Vec<f64> = prob.iter().map(|p| (p * (1.0 - p)).max(1e-12)).collect();

            // Deterministic column subsample for this round.
            let mut cols: Vec<usize> = (0..dim).collect();
            for i in (1..cols.len()).rev() {
                let j = rng.gen_range(0..=i);
                cols.swap(i, j);
            }
            cols.truncate(n_cols);
            cols.sort_unstable();

            let mut best: Option<(f64, Stump)> = None;
            for &feature in &cols {
                let values: Vec<f64> = x.iter().map(|row| row[feature]).collect();
                for threshold in Self::candidate_thresholds(&values) {
                    let mut g_left = 0.0;
                    let mut h_left = 0.0;
                    let mut n_left = 0usize;
                    let mut g_right = 0.0;
                    let mut h_right = 0.0;
                    for i in 0..n {
                        if values[i] <= threshold {
                            g_left += grad[i];
                            h_left += hess[i];
                            n_left += 1;
                        } else {
                            g_right += grad[i];
                            h_right += hess[i];
                        }
                    }
                    let n_right = n - n_left;
                    if n_left < self.min_leaf_samples || n_right < self.min_leaf_samples {
                        continue;
                    }
                    let gain = g_left * g_left / h_left + g_right * g_right / h_right;
                    let better = match &best {
                        None => true,
                        Some((best_gain, _)) => gain > *best_gain,
                    };
                    if better {
                        best = Some((
                            gain,
                            Stump {
                                feature,
                                threshold,
                                gamma_left: g_left / h_left,
                                gamma_right: g_right / h_right,
                            },
                        ));
                    }
                }
            }

            let Some((_, stump)) = best else {
                break; // no admissible split left
            };

            for (i, f) in raw.iter_mut().enumerate() {
                let gamma = if x[i][stump.feature] <= stump.threshold {
                    stump.gamma_left
                } else {
                    stump.gamma_right
                };
                *f += self.learning_rate * gamma;
            }
            self.stumps.push(stump);
        }

        self.fitted = true;
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        assert!(self.fitted, "predict_proba called before fit");
        x.iter().map(|row| sigmoid(self.raw_score(row))).collect()
    }
}

// ── Evaluation metrics ───────────────────────────────────────────────────────

/// ROC-AUC via the rank statistic, with average ranks for tied scores.
/// None when the labels hold a single class.
pub fn roc_auc(y: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = y.iter().filter(|&&v| v == 1).count();
    let n_neg = y.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut idx: Vec<usize> = (0..scores.len()).collect();
    idx.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .expect("scores are finite")
            .then(a.cmp(&b))
    });

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < idx.len() {
        let mut j = i;
        while j + 1 < idx.len() && scores[idx[j + 1]] == scores[idx[i]] {
            j += 1;
        }
        let avg_rank = (i + j + 2) as f64 / 2.0; // 1-based average over the tie run
        for &k in &idx[i..=j] {
            ranks[k] = avg_rank;
        }
        i = j + 1;
    }

    let rank_sum_pos: f64 = y
        .iter()
        .zip(&ranks)
        .filter(|(&label, _)| label == 1)
        .map(|(_, r)| r)
        .sum();
    let u = rank_sum_pos - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos as f64 * n_neg as f64))
}

/// Average precision (step-wise PR-curve integral), descending-score order
/// with stable first-occurrence ties. None when no positives exist.
pub fn average_precision(y: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = y.iter().filter(|&&v| v == 1).count();
    if n_pos == 0 {
        return None;
    }

    let mut idx: Vec<usize> = (0..scores.len()).collect();
    idx.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .expect("scores are finite")
            .then(a.cmp(&b))
    });

    let mut hits = 0usize;
    let mut ap = 0.0;
    for (k, &i) in idx.iter().enumerate() {
        if y[i] == 1 {
            hits += 1;
            ap += hits as f64 / (k + 1) as f64;
        }
    }
    Some(ap / n_pos as f64)
}
