//! Bagged CART regression forest.
//!
//! Each tree is grown on a bootstrap sample, choosing splits that minimise the
//! summed squared error of the two children among a per-node subset of the
//! features. Tree seeds are drawn up front from the forest seed so the fitted
//! model does not depend on how rayon schedules the trees.

use std::str::FromStr;

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GradeError, Result};
use crate::models::N_FEATURES;
use crate::predictor::GradeModel;

/// Number of features considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxFeatures {
    All,
    Sqrt,
    Count(usize),
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let wanted = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().round() as usize,
            MaxFeatures::Count(count) => count,
        };
        wanted.clamp(1, n_features)
    }
}

impl FromStr for MaxFeatures {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(MaxFeatures::All),
            "sqrt" => Ok(MaxFeatures::Sqrt),
            other => match other.parse::<usize>() {
                Ok(0) => Err("max features must be at least 1".to_string()),
                Ok(count) => Ok(MaxFeatures::Count(count)),
                Err(_) => Err(format!(
                    "expected `all`, `sqrt` or a feature count, got `{value}`"
                )),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<()> {
        let problem = if self.n_trees == 0 {
            Some("tree count must be positive")
        } else if self.max_depth == 0 {
            Some("max depth must be positive")
        } else if self.min_samples_split < 2 {
            Some("min samples per split must be at least 2")
        } else if self.min_samples_leaf == 0 {
            Some("min samples per leaf must be positive")
        } else if self.max_features == MaxFeatures::Count(0) {
            Some("max features must be at least 1")
        } else {
            None
        };

        match problem {
            Some(message) => Err(GradeError::InvalidArgument(message.to_string())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single fitted tree. Node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict(&self, features: &[f64; N_FEATURES]) -> f64 {
        let mut current = 0;
        loop {
            match &self.nodes[current] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    current = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: usize) -> usize {
            match &nodes[at] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    /// Structural checks for a tree read from storage: every child index
    /// points forward into the node list and every split feature exists.
    fn check_structure(&self) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (at, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(format!("node {at} holds a non-finite value"));
                }
                Node::Leaf { .. } => {}
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= N_FEATURES {
                        return Err(format!("node {at} splits on unknown feature {feature}"));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {at} has a non-finite threshold"));
                    }
                    for child in [left, right] {
                        if *child <= at || *child >= self.nodes.len() {
                            return Err(format!("node {at} points at invalid child {child}"));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

struct TreeBuilder<'a> {
    x: &'a [[f64; N_FEATURES]],
    y: &'a [f64],
    config: &'a ForestConfig,
    n_candidates: usize,
    rng: ChaCha8Rng,
    nodes: Vec<Node>,
    importances: [f64; N_FEATURES],
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    children_error: f64,
}

impl<'a> TreeBuilder<'a> {
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let at = self.nodes.len();
        let (mean, node_error) = mean_and_error(self.y, &samples);
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= self.config.max_depth
            || samples.len() < self.config.min_samples_split
            || node_error <= f64::EPSILON
        {
            return at;
        }

        let Some(best) = self.best_split(&samples) else {
            return at;
        };
        if node_error - best.children_error <= f64::EPSILON * node_error.max(1.0) {
            return at;
        }

        self.importances[best.feature] += node_error - best.children_error;

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.x[i][best.feature] <= best.threshold);
        let left = self.grow(left_samples, depth + 1);
        let right = self.grow(right_samples, depth + 1);

        self.nodes[at] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        at
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        if self.n_candidates >= N_FEATURES {
            (0..N_FEATURES).collect()
        } else {
            index::sample(&mut self.rng, N_FEATURES, self.n_candidates).into_vec()
        }
    }

    fn best_split(&mut self, samples: &[usize]) -> Option<BestSplit> {
        let min_leaf = self.config.min_samples_leaf;
        let n = samples.len();
        let total_sum: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = samples.iter().map(|&i| self.y[i] * self.y[i]).sum();

        let mut best: Option<BestSplit> = None;
        let mut order = samples.to_vec();

        for feature in self.candidate_features() {
            let x = self.x;
            order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for position in 0..n - 1 {
                let value = self.y[order[position]];
                left_sum += value;
                left_sq += value * value;

                let left_n = position + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let here = x[order[position]][feature];
                let next = x[order[position + 1]][feature];
                if here >= next {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let children_error = (left_sq - left_sum * left_sum / left_n as f64)
                    + (right_sq - right_sum * right_sum / right_n as f64);

                if best
                    .as_ref()
                    .map_or(true, |current| children_error < current.children_error)
                {
                    let mut threshold = here + (next - here) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        children_error,
                    });
                }
            }
        }

        best
    }
}

/// Mean label and summed squared error around it.
fn mean_and_error(y: &[f64], samples: &[usize]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&i| y[i]).sum::<f64>() / n;
    let error = samples.iter().map(|&i| (y[i] - mean).powi(2)).sum();
    (mean, error)
}

fn fit_tree(
    x: &[[f64; N_FEATURES]],
    y: &[f64],
    config: &ForestConfig,
    seed: u64,
) -> (RegressionTree, [f64; N_FEATURES]) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let samples: Vec<usize> = if config.bootstrap {
        (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect()
    } else {
        (0..x.len()).collect()
    };

    let mut builder = TreeBuilder {
        x,
        y,
        config,
        n_candidates: config.max_features.resolve(N_FEATURES),
        rng,
        nodes: Vec::new(),
        importances: [0.0; N_FEATURES],
    };
    builder.grow(samples, 0);

    (
        RegressionTree {
            nodes: builder.nodes,
        },
        builder.importances,
    )
}

/// Scales non-negative weights to sum to 1; all-zero weights become uniform.
fn normalize(weights: &mut [f64]) {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter_mut().for_each(|w| *w /= total);
    } else {
        let uniform = 1.0 / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = uniform);
    }
}

/// The fitted ensemble: prediction is the mean over trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    trees: Vec<RegressionTree>,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(
        x: &[[f64; N_FEATURES]],
        y: &[f64],
        config: &ForestConfig,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        if x.is_empty() {
            return Err(GradeError::InvalidArgument(
                "cannot fit a forest on an empty table".to_string(),
            ));
        }
        if x.len() != y.len() {
            return Err(GradeError::InvalidArgument(format!(
                "{} feature rows but {} labels",
                x.len(),
                y.len()
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let tree_seeds: Vec<u64> = (0..config.n_trees).map(|_| rng.gen()).collect();

        let fitted: Vec<(RegressionTree, [f64; N_FEATURES])> = tree_seeds
            .par_iter()
            .map(|&tree_seed| fit_tree(x, y, config, tree_seed))
            .collect();

        let mut feature_importances = vec![0.0; N_FEATURES];
        let mut trees = Vec::with_capacity(fitted.len());
        for (tree, mut importances) in fitted {
            if importances.iter().sum::<f64>() > 0.0 {
                normalize(&mut importances);
                for (total, share) in feature_importances.iter_mut().zip(importances) {
                    *total += share;
                }
            }
            trees.push(tree);
        }
        normalize(&mut feature_importances);

        debug!(
            nodes = trees.iter().map(RegressionTree::node_count).sum::<usize>(),
            "forest grown"
        );
        info!(
            trees = trees.len(),
            max_depth = config.max_depth,
            samples = x.len(),
            seed,
            "fitted random forest"
        );

        Ok(Self {
            config: config.clone(),
            trees,
            feature_importances,
        })
    }

    /// Mean prediction over all trees.
    pub fn predict(&self, features: &[f64; N_FEATURES]) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        total / self.trees.len() as f64
    }

    /// Impurity-decrease importance per feature, in column order.
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Verifies a deserialized forest can be evaluated safely.
    pub(crate) fn check_structure(&self) -> std::result::Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        if self.feature_importances.len() != N_FEATURES {
            return Err(format!(
                "expected {N_FEATURES} feature importances, found {}",
                self.feature_importances.len()
            ));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.check_structure()
                .map_err(|reason| format!("tree {index}: {reason}"))?;
        }
        Ok(())
    }
}

impl GradeModel for RandomForest {
    fn estimate(&self, features: &[f64; N_FEATURES]) -> f64 {
        self.predict(features)
    }
}
