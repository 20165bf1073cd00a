//! CART regression trees with variance-reduction splits.
//!
//! Nodes live in a flat arena; every node stores the mean target of the rows
//! that reached it, which is what path contributions are measured against.

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::index::sample;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Growth limits shared by forest and boosting members.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split; `None` examines all of them.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Split {
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node {
    value: f64,
    samples: usize,
    split: Option<Split>,
}

/// Fitted regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_features: usize,
    /// Total squared-error reduction per feature.
    importances: Vec<f64>,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl RegressionTree {
    /// Grow a tree over `indices` (repeats allowed for bootstrap samples).
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        indices: &[usize],
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let n_features = x.ncols();
        let mut tree = Self {
            nodes: Vec::new(),
            n_features,
            importances: vec![0.0; n_features],
        };
        if !indices.is_empty() {
            tree.grow(x, y, indices.to_vec(), 0, params, rng);
        }
        tree
    }

    fn grow(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        indices: Vec<usize>,
        depth: usize,
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let (sum, sum_sq) = indices.iter().fold((0.0, 0.0), |(s, q), &i| (s + y[i], q + y[i] * y[i]));
        let count = indices.len() as f64;
        let value = sum / count;
        let sse = (sum_sq - sum * sum / count).max(0.0);

        let id = self.nodes.len();
        self.nodes.push(Node {
            value,
            samples: indices.len(),
            split: None,
        });

        let depth_reached = params.max_depth.map_or(false, |max| depth >= max);
        if depth_reached
            || indices.len() < params.min_samples_split.max(2)
            || sse <= f64::EPSILON * count
        {
            return id;
        }

        let Some(best) = self.best_split(x, y, &indices, sse, params, rng) else {
            return id;
        };
        self.importances[best.feature] += best.gain;
        let left = self.grow(x, y, best.left, depth + 1, params, rng);
        let right = self.grow(x, y, best.right, depth + 1, params, rng);
        self.nodes[id].split = Some(Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        });
        id
    }

    fn best_split(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        indices: &[usize],
        parent_sse: f64,
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Option<Candidate> {
        let features: Vec<usize> = match params.max_features {
            Some(k) if k < self.n_features => {
                let mut chosen = sample(rng, self.n_features, k.max(1)).into_vec();
                chosen.sort_unstable();
                chosen
            }
            _ => (0..self.n_features).collect(),
        };

        let min_leaf = params.min_samples_leaf.max(1);
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let n = indices.len();

        let mut best: Option<(usize, f64, f64)> = None;
        let mut order = indices.to_vec();
        for feature in features {
            order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 0..n - 1 {
                let i = order[pos];
                left_sum += y[i];
                left_sq += y[i] * y[i];
                let left_n = pos + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let here = x[[i, feature]];
                let next = x[[order[pos + 1], feature]];
                if here == next {
                    continue;
                }
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let left_sse = left_sq - left_sum * left_sum / left_n as f64;
                let right_sse = right_sq - right_sum * right_sum / right_n as f64;
                let gain = parent_sse - left_sse - right_sse;
                if best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, here + (next - here) / 2.0, gain));
                }
            }
        }

        let (feature, threshold, gain) = best?;
        if !(gain > 0.0) {
            return None;
        }
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| x[[i, feature]] <= threshold);
        if left.is_empty() || right.is_empty() {
            return None;
        }
        Some(Candidate {
            feature,
            threshold,
            gain,
            left,
            right,
        })
    }

    /// Number of features the tree was trained on.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Deepest root-to-leaf edge count.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match nodes[id].split {
                Some(split) => 1 + walk(nodes, split.left).max(walk(nodes, split.right)),
                None => 0,
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Mean target at the root.
    pub fn bias(&self) -> f64 {
        self.nodes.first().map_or(0.0, |node| node.value)
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.leaf_path(row)
            .last()
            .map_or(0.0, |&id| self.nodes[id].value)
    }

    /// Change in node value attributed to each split feature along the
    /// decision path. `bias() + sum(contributions) == predict_row(row)`.
    pub fn contributions(&self, row: ArrayView1<f64>) -> Vec<f64> {
        let mut contributions = vec![0.0; self.n_features];
        let path = self.leaf_path(row);
        for pair in path.windows(2) {
            let parent = &self.nodes[pair[0]];
            let child = &self.nodes[pair[1]];
            if let Some(split) = parent.split {
                contributions[split.feature] += child.value - parent.value;
            }
        }
        contributions
    }

    /// Squared-error reduction per feature, normalized to sum to one.
    pub fn importances(&self) -> Vec<f64> {
        normalize(&self.importances)
    }

    fn leaf_path(&self, row: ArrayView1<f64>) -> Vec<usize> {
        let mut path = Vec::new();
        if self.nodes.is_empty() {
            return path;
        }
        let mut id = 0;
        loop {
            path.push(id);
            match self.nodes[id].split {
                Some(split) => {
                    id = if row[split.feature] <= split.threshold {
                        split.left
                    } else {
                        split.right
                    };
                }
                None => return path,
            }
        }
    }
}

/// Scale non-negative weights to sum to one; all-zero input stays zero.
pub(crate) fn normalize(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter().map(|value| value / total).collect()
    } else {
        vec![0.0; values.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{aview1, Array1, Array2};
    use rand::SeedableRng;

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y = Array1::from_shape_fn(20, |i| if i < 10 { 1.0 } else { 5.0 });
        (x, y)
    }

    fn fit(params: TreeParams) -> (RegressionTree, Array2<f64>) {
        let (x, y) = step_data();
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        (RegressionTree::fit(x.view(), y.view(), &indices, &params, &mut rng), x)
    }

    #[test]
    fn learns_a_step() {
        let (tree, _) = fit(TreeParams::default());

        assert_eq!(tree.predict_row(aview1(&[3.0, 0.0])), 1.0);
        assert_eq!(tree.predict_row(aview1(&[15.0, 2.0])), 5.0);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.importances(), vec![1.0, 0.0]);
    }

    #[test]
    fn depth_limit_yields_constant() {
        let (tree, _) = fit(TreeParams {
            max_depth: Some(0),
            ..TreeParams::default()
        });

        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.predict_row(aview1(&[0.0, 0.0])), 3.0);
    }

    #[test]
    fn contributions_follow_the_path() {
        let (tree, x) = fit(TreeParams::default());
        for row in x.outer_iter() {
            let total: f64 = tree.contributions(row).iter().sum();
            assert!((tree.bias() + total - tree.predict_row(row)).abs() < 1e-12);
        }
        assert_eq!(tree.contributions(aview1(&[0.0, 0.0])), vec![-2.0, 0.0]);
    }

    #[test]
    fn min_samples_split_stops_growth() {
        let (tree, _) = fit(TreeParams {
            min_samples_split: 50,
            ..TreeParams::default()
        });
        assert_eq!(tree.depth(), 0);
    }
}
