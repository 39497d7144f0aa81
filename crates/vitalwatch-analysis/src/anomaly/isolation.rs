//! One-dimensional isolation forest
//!
//! Points that are isolated by few random splits are anomalous. The score is
//! `2^(-E[h(x)] / c(psi))`: about 0.5 for ordinary points, approaching 1 for
//! outliers.
//!
//! A value outside a node's sampled range is separated from that node's
//! points by a split drawn over the widened range with probability
//! `gap / span`; the path length mixes in that early isolation, so readings
//! far beyond anything seen score close to 1 instead of landing in the
//! extreme leaf.

use rand::prelude::*;
use rand::rngs::StdRng;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum Node {
    Split {
        at: f64,
        lo: f64,
        hi: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
        lo: f64,
        hi: f64,
    },
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    // sub-sample size each tree was grown on
    psi: usize,
}

impl IsolationForest {
    /// Grow `n_trees` trees on random sub-samples of `values`.
    /// Callers guarantee `values.len() >= 2`.
    pub fn fit(values: &[f64], n_trees: usize, sample_size: usize, rng: &mut StdRng) -> Self {
        let psi = sample_size.min(values.len()).max(2);
        let height_limit = (psi as f64).log2().ceil() as usize;

        let trees = (0..n_trees)
            .map(|_| {
                let sample = sample_without_replacement(values, psi, rng);
                grow(sample, 0, height_limit, rng)
            })
            .collect();

        Self { trees, psi }
    }

    /// Anomaly score in (0, 1]
    pub fn score(&self, value: f64) -> f64 {
        let total: f64 = self.trees.iter().map(|t| path_length(t, value, 0)).sum();
        let mean = total / self.trees.len() as f64;
        2f64.powf(-mean / average_path_length(self.psi))
    }

    pub fn sample_size(&self) -> usize {
        self.psi
    }
}

// partial Fisher-Yates over a copy, first k elements are the sample
fn sample_without_replacement(values: &[f64], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut pool = values.to_vec();
    for i in 0..k {
        let j = rng.random_range(i..pool.len());
        pool.swap(i, j);
    }
    pool.truncate(k);
    pool
}

fn grow(values: Vec<f64>, depth: usize, limit: usize, rng: &mut StdRng) -> Node {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));

    if depth >= limit || values.len() <= 1 || min >= max {
        return Node::Leaf {
            size: values.len(),
            lo: min,
            hi: max,
        };
    }

    let at = min + rng.random::<f64>() * (max - min);
    let (left, right): (Vec<f64>, Vec<f64>) = values.into_iter().partition(|v| *v < at);

    Node::Split {
        at,
        lo: min,
        hi: max,
        left: Box::new(grow(left, depth + 1, limit, rng)),
        right: Box::new(grow(right, depth + 1, limit, rng)),
    }
}

fn path_length(node: &Node, value: f64, depth: usize) -> f64 {
    let (inside, lo, hi) = match node {
        Node::Leaf { size, lo, hi } => {
            let path = depth as f64 + average_path_length(*size);
            if *size <= 1 {
                return path;
            }
            (path, *lo, *hi)
        }
        Node::Split {
            at,
            lo,
            hi,
            left,
            right,
        } => {
            let next = if value < *at { left } else { right };
            (path_length(next, value, depth + 1), *lo, *hi)
        }
    };

    let gap = (lo - value).max(value - hi);
    if gap <= 0.0 {
        return inside;
    }
    let p = gap / (hi.max(value) - lo.min(value));
    p * (depth as f64 + 1.0) + (1.0 - p) * inside
}

/// Average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forest(values: &[f64], seed: u64) -> IsolationForest {
        let mut rng = StdRng::seed_from_u64(seed);
        IsolationForest::fit(values, 100, 256, &mut rng)
    }

    #[test]
    fn test_outlier_scores_higher() {
        let values: Vec<f64> = (0..200).map(|i| 70.0 + ((i * 37) % 200) as f64 * 0.05).collect();
        let f = forest(&values, 7);
        assert!(f.score(140.0) > f.score(75.0));
        assert!(f.score(75.0) < 0.6);
        assert!(f.score(140.0) > 0.8);
        // just past the edge is barely more anomalous than the edge itself
        assert!((f.score(79.96) - f.score(79.95)).abs() < 0.1);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let values: Vec<f64> = (0..100).map(|i| (i as f64).sin() * 10.0).collect();
        let a = forest(&values, 42);
        let b = forest(&values, 42);
        for query in [-20.0, 0.0, 3.3, 50.0] {
            assert_eq!(a.score(query), b.score(query));
        }
    }

    #[test]
    fn test_constant_data_is_neutral() {
        let f = forest(&[5.0; 50], 1);
        assert!((f.score(5.0) - 0.5).abs() < 1e-12);
        assert_eq!(f.sample_size(), 50);
    }
}
