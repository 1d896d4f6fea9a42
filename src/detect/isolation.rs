//! Isolation forest.
//!
//! Each tree isolates points by recursive random axis-aligned splits over a
//! random sub-sample. Points that isolate in few splits score high. The
//! outlier cut-off is the `(1 - contamination)` quantile of the training
//! scores.

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::{DetectError, Label, OutlierModel};
use crate::config::ModelParams;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points.
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

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug)]
struct Tree {
    root: Node,
}

impl Tree {
    fn grow(data: &[Vec<f64>], seed: u64, shape: &TreeShape) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = data.len();

        let rows: Vec<usize> = if shape.bootstrap {
            (0..shape.sub_sample).map(|_| rng.gen_range(0..n)).collect()
        } else {
            index::sample(&mut rng, n, shape.sub_sample).into_vec()
        };
        let features = index::sample(&mut rng, shape.width, shape.features_per_tree).into_vec();

        let root = Self::split(data, rows, &features, 0, shape.height_limit, &mut rng);
        Self { root }
    }

    fn split(
        data: &[Vec<f64>],
        rows: Vec<usize>,
        features: &[usize],
        depth: usize,
        limit: usize,
        rng: &mut StdRng,
    ) -> Node {
        if depth >= limit || rows.len() <= 1 {
            return Node::Leaf { size: rows.len() };
        }

        let mut order = features.to_vec();
        order.shuffle(rng);
        for feature in order {
            let (min, max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                let v = data[r][feature];
                (lo.min(v), hi.max(v))
            });
            if max <= min {
                continue;
            }

            let threshold = rng.gen_range(min..max);
            let (left, right): (Vec<usize>, Vec<usize>) =
                rows.iter().partition(|&&r| data[r][feature] <= threshold);
            return Node::Split {
                feature,
                threshold,
                left: Box::new(Self::split(data, left, features, depth + 1, limit, rng)),
                right: Box::new(Self::split(data, right, features, depth + 1, limit, rng)),
            };
        }

        // Every candidate feature is constant over these rows.
        Node::Leaf { size: rows.len() }
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] <= *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TreeShape {
    sub_sample: usize,
    width: usize,
    features_per_tree: usize,
    height_limit: usize,
    bootstrap: bool,
}

/// Isolation forest parameterised by [`ModelParams`].
#[derive(Debug)]
pub struct IsolationForest {
    params: ModelParams,
    trees: Vec<Tree>,
    sub_sample: usize,
    width: usize,
}

impl IsolationForest {
    pub fn new(params: ModelParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            sub_sample: 0,
            width: 0,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Build the forest over `data`.
    pub fn fit(&mut self, data: &[Vec<f64>]) -> Result<(), DetectError> {
        self.params.validate()?;
        let n = data.len();
        if n == 0 {
            return Err(DetectError::EmptyInput);
        }
        let width = data[0].len();
        if width == 0 {
            return Err(DetectError::DimensionMismatch {
                row: 0,
                expected: 1,
                have: 0,
            });
        }
        if let Some((row, r)) = data.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(DetectError::DimensionMismatch {
                row,
                expected: width,
                have: r.len(),
            });
        }

        let sub_sample = ((self.params.sample_fraction * n as f64) as usize).clamp(1, n);
        let shape = TreeShape {
            sub_sample,
            width,
            features_per_tree: ((self.params.feature_fraction * width as f64) as usize)
                .clamp(1, width),
            height_limit: (sub_sample.max(2) as f64).log2().ceil() as usize,
            bootstrap: self.params.use_bootstrap_sampling,
        };

        // Seeds are fixed up front so thread count never changes the forest.
        let mut master = StdRng::seed_from_u64(self.params.random_seed);
        let seeds: Vec<u64> = (0..self.params.tree_count).map(|_| master.gen()).collect();

        let trees: Vec<Tree> = if self.params.parallelism_hint > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.params.parallelism_hint)
                .build()
                .map_err(|e| DetectError::ThreadPool(e.to_string()))?;
            pool.install(|| {
                seeds
                    .par_iter()
                    .map(|&seed| Tree::grow(data, seed, &shape))
                    .collect()
            })
        } else {
            seeds.iter().map(|&seed| Tree::grow(data, seed, &shape)).collect()
        };

        self.trees = trees;
        self.sub_sample = sub_sample;
        self.width = width;
        Ok(())
    }

    /// Anomaly score in (0, 1]; higher is more anomalous. An unfitted
    /// forest scores 0.
    pub fn score(&self, point: &[f64]) -> Result<f64, DetectError> {
        if self.trees.is_empty() {
            return Ok(0.0);
        }
        if point.len() != self.width {
            return Err(DetectError::DimensionMismatch {
                row: 0,
                expected: self.width,
                have: point.len(),
            });
        }
        let mean_path =
            self.trees.iter().map(|t| t.path_length(point)).sum::<f64>() / self.trees.len() as f64;
        let norm = average_path_length(self.sub_sample);
        if norm == 0.0 {
            // Single-row sub-samples cannot separate anything.
            return Ok(1.0);
        }
        Ok(2f64.powf(-mean_path / norm))
    }
}

/// Linear-interpolated quantile of `values` at `q` in [0, 1].
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

impl OutlierModel for IsolationForest {
    fn name(&self) -> &str {
        "isolation_forest"
    }

    fn fit_predict(&mut self, rows: &[Vec<f64>]) -> Result<Vec<Label>, DetectError> {
        self.fit(rows)?;
        let scores = rows
            .iter()
            .map(|r| self.score(r))
            .collect::<Result<Vec<f64>, _>>()?;
        let cutoff = quantile(&scores, 1.0 - self.params.contamination_fraction);
        Ok(scores
            .into_iter()
            .map(|s| if s > cutoff { Label::Outlier } else { Label::Inlier })
            .collect())
    }
}
