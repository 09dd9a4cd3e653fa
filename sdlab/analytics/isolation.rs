//! One-dimensional isolation forest.
//!
//! Trees are grown on random subsamples by splitting at a uniform threshold
//! between the node's minimum and maximum until a node is pure, holds a single
//! sample, or the height limit `ceil(log2(subsample))` is reached. A point's
//! anomaly score is `2^(-E[h(x)] / c(subsample))`; higher is more anomalous.

use rand::{rngs::SmallRng, seq::index::sample, Rng, SeedableRng};

/// Trees per forest.
pub const DEFAULT_TREES: usize = 100;
/// Largest subsample drawn per tree.
pub const MAX_SUBSAMPLE: usize = 256;
/// Seed used when none is given.
pub const DEFAULT_SEED: u64 = 42;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Fitted forest.
#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<Node>,
    subsample: usize,
}

impl IsolationForest {
    /// Fits `trees` trees on subsamples of `min(256, n)` values.
    #[must_use]
    pub fn fit(values: &[f64], trees: usize, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let subsample = values.len().min(MAX_SUBSAMPLE);
        let height_limit = height_limit(subsample);
        let trees = (0..trees)
            .map(|_| {
                let picked: Vec<f64> = sample(&mut rng, values.len(), subsample)
                    .into_iter()
                    .map(|idx| values[idx])
                    .collect();
                grow(&picked, 0, height_limit, &mut rng)
            })
            .collect();
        Self { trees, subsample }
    }

    /// Anomaly score in `(0, 1]` of one value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, value: f64) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let mean_path = self
            .trees
            .iter()
            .map(|tree| path_length(tree, value, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let norm = average_path(self.subsample);
        if norm == 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / norm)
    }

    /// Indices whose score exceeds the `(1 - contamination)` quantile of all
    /// scores; ties at the threshold are not flagged.
    #[must_use]
    pub fn outliers(&self, values: &[f64], contamination: f64) -> Vec<usize> {
        // Work on negated scores so "lower is more anomalous", flagging values
        // strictly below the contamination percentile.
        let negated: Vec<f64> = values.iter().map(|v| -self.score(*v)).collect();
        let threshold = percentile(&negated, contamination);
        negated
            .iter()
            .enumerate()
            .filter(|(_, score)| **score < threshold)
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn height_limit(subsample: usize) -> usize {
    (subsample.max(2) as f64).log2().ceil() as usize
}

fn grow(values: &[f64], depth: usize, limit: usize, rng: &mut SmallRng) -> Node {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if depth >= limit || values.len() <= 1 || max <= min {
        return Node::Leaf { size: values.len() };
    }
    let threshold = rng.gen_range(min..max);
    let (left, right): (Vec<f64>, Vec<f64>) = values.iter().partition(|v| **v < threshold);
    if left.is_empty() || right.is_empty() {
        return Node::Leaf { size: values.len() };
    }
    Node::Split {
        threshold,
        left: Box::new(grow(&left, depth + 1, limit, rng)),
        right: Box::new(grow(&right, depth + 1, limit, rng)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn path_length(node: &Node, value: f64, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path(*size),
        Node::Split {
            threshold,
            left,
            right,
        } => {
            let next = if value < *threshold { left } else { right };
            path_length(next, value, depth + 1)
        }
    }
}

/// Average unsuccessful search length in a binary search tree of `n` nodes.
#[allow(clippy::cast_precision_loss)]
fn average_path(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile, `q` in `[0, 1]`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let rank = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            (sorted[upper] - sorted[lower]).mul_add(weight, sorted[lower])
        }
    }
}
