//! Exact greedy tree growth on per-row gradient statistics.

use log::trace;

use super::{goes_left, Node, RegressionTree};
use crate::{booster_params::BoosterParams, dataset::DataMatrix};

/// splits must improve the loss by more than this to be considered at all
const MIN_SPLIT_GAIN: f64 = 1e-6;

/// first and second order gradient of the loss for one row
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct GradientPair {
    pub grad: f64,
    pub hess: f64,
}

impl GradientPair {
    pub fn new(grad: f64, hess: f64) -> Self {
        GradientPair { grad, hess }
    }

    fn add(&mut self, other: GradientPair) {
        self.grad += other.grad;
        self.hess += other.hess;
    }

    fn sub(self, other: GradientPair) -> GradientPair {
        GradientPair::new(self.grad - other.grad, self.hess - other.hess)
    }

    fn add_into(self, other: GradientPair) -> GradientPair {
        GradientPair::new(self.grad + other.grad, self.hess + other.hess)
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    default_left: bool,
    gain: f64,
}

/// Grows one tree per call from a fixed set of regularization parameters
pub(crate) struct TreeBuilder<'a> {
    params: &'a BoosterParams,
    matrix: &'a DataMatrix,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(params: &'a BoosterParams, matrix: &'a DataMatrix) -> Self {
        TreeBuilder { params, matrix }
    }

    /// Grow a tree over `rows`, considering only `features` as split candidates.
    ///
    /// `rows` must be non-empty. Splits with a gain below `gamma` whose children are both leaves are pruned as the tree unwinds.
    pub fn build(&self, gradients: &[GradientPair], rows: Vec<usize>, features: &[usize]) -> RegressionTree {
        let mut nodes = Vec::new();
        self.grow(gradients, rows, features, 0, &mut nodes);
        RegressionTree::from_nodes(nodes)
    }

    fn grow(
        &self,
        gradients: &[GradientPair],
        rows: Vec<usize>,
        features: &[usize],
        depth: usize,
        nodes: &mut Vec<Node>,
    ) -> usize {
        let mut total = GradientPair::default();
        for &row in rows.iter() {
            total.add(gradients[row]);
        }
        let weight = self.leaf_weight(total);
        let idx = nodes.len();
        nodes.push(Node::Leaf {
            value: weight,
            cover: total.hess,
        });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return idx;
        }
        let Some(split) = self.best_split(gradients, &rows, features, total) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.into_iter().partition(|&row| {
            goes_left(
                self.matrix.value(row, split.feature),
                split.threshold,
                split.default_left,
            )
        });
        trace!(
            "depth {} split on f{} < {} (gain {}), {} left / {} right",
            depth,
            split.feature,
            split.threshold,
            split.gain,
            left_rows.len(),
            right_rows.len()
        );
        let left = self.grow(gradients, left_rows, features, depth + 1, nodes);
        let right = self.grow(gradients, right_rows, features, depth + 1, nodes);

        // two leaf children are always the last two nodes pushed, so they can be popped off
        if split.gain < self.params.gamma && nodes[left].is_leaf() && nodes[right].is_leaf() {
            nodes.truncate(idx + 1);
            return idx;
        }
        nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            default_left: split.default_left,
            left,
            right,
            gain: split.gain,
            cover: total.hess,
            weight,
        };
        idx
    }

    fn best_split(
        &self,
        gradients: &[GradientPair],
        rows: &[usize],
        features: &[usize],
        total: GradientPair,
    ) -> Option<SplitCandidate> {
        let parent_score = self.score(total);
        let mut best: Option<SplitCandidate> = None;
        let mut present: Vec<(f64, GradientPair)> = Vec::with_capacity(rows.len());

        for &feature in features {
            present.clear();
            present.extend(rows.iter().filter_map(|&row| {
                let value = self.matrix.value(row, feature);
                (!value.is_nan()).then(|| (value, gradients[row]))
            }));
            if present.len() < 2 {
                continue;
            }
            present.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut present_total = GradientPair::default();
            for (_, pair) in present.iter() {
                present_total.add(*pair);
            }
            let missing = total.sub(present_total);
            let has_missing = present.len() < rows.len();

            let mut left = GradientPair::default();
            for i in 0..present.len() - 1 {
                left.add(present[i].1);
                let (value, next_value) = (present[i].0, present[i + 1].0);
                if value == next_value {
                    continue;
                }
                let right = present_total.sub(left);

                // missing values to the right first, then (if there are any) to the left
                let directions = [
                    (false, left, right.add_into(missing)),
                    (true, left.add_into(missing), right),
                ];
                let num_directions = if has_missing { 2 } else { 1 };
                for (default_left, left_stats, right_stats) in directions.into_iter().take(num_directions) {
                    if left_stats.hess < self.params.min_child_weight
                        || right_stats.hess < self.params.min_child_weight
                    {
                        continue;
                    }
                    let gain =
                        0.5 * (self.score(left_stats) + self.score(right_stats) - parent_score);
                    if gain > MIN_SPLIT_GAIN && best.map_or(true, |b| gain > b.gain) {
                        best = Some(SplitCandidate {
                            feature,
                            threshold: split_point(value, next_value),
                            default_left: default_left || !has_missing,
                            gain,
                        });
                    }
                }
            }
        }
        best
    }

    /// regularized structure score `T(G)^2 / (H + lambda)`
    fn score(&self, stats: GradientPair) -> f64 {
        let g = soft_threshold(stats.grad, self.params.alpha);
        g * g / (stats.hess + self.params.lambda)
    }

    /// optimal leaf weight `-T(G) / (H + lambda)`, scaled by the learning rate
    fn leaf_weight(&self, stats: GradientPair) -> f64 {
        let denominator = stats.hess + self.params.lambda;
        if denominator <= 0.0 {
            return 0.0;
        }
        -soft_threshold(stats.grad, self.params.alpha) / denominator * self.params.eta
    }
}

/// L1 shrinkage toward zero
#[inline]
fn soft_threshold(grad: f64, alpha: f64) -> f64 {
    if grad > alpha {
        grad - alpha
    } else if grad < -alpha {
        grad + alpha
    } else {
        0.0
    }
}

/// a threshold strictly above `value` and no greater than `next_value`
fn split_point(value: f64, next_value: f64) -> f64 {
    let mid = value + (next_value - value) * 0.5;
    if mid > value {
        mid
    } else {
        next_value
    }
}

#[cfg(test)]
mod tests {
    use statrs::assert_almost_eq;
    use test_log::test;

    use super::*;

    fn squared_error_pairs(labels: &[f64], margin: f64) -> Vec<GradientPair> {
        labels
            .iter()
            .map(|label| GradientPair::new(margin - label, 1.0))
            .collect()
    }

    fn params() -> BoosterParams {
        BoosterParams {
            eta: 1.0,
            lambda: 0.0,
            min_child_weight: 0.0,
            ..BoosterParams::default()
        }
    }

    #[test]
    fn test_step_function_is_learned_exactly() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let labels: Vec<f64> = (0..10).map(|i| if i < 5 { -1.0 } else { 1.0 }).collect();
        let matrix = DataMatrix::from_dense(&rows, labels.clone());
        let params = params();
        let tree = TreeBuilder::new(&params, &matrix).build(
            &squared_error_pairs(&labels, 0.0),
            (0..10).collect(),
            &[0],
        );
        assert_eq!(tree.num_leaves(), 2);
        match &tree.nodes()[0] {
            Node::Split { feature, threshold, .. } => {
                assert_eq!(*feature, 0);
                assert_eq!(*threshold, 4.5);
            }
            other => panic!("expected a split at the root, got {:?}", other),
        }
        for row in 0..10 {
            assert_almost_eq!(tree.predict(&matrix, row), labels[row], 1e-12);
        }
    }

    #[test]
    fn test_gamma_prunes_weak_splits() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let labels: Vec<f64> = (0..10).map(|i| if i < 5 { -1.0 } else { 1.0 }).collect();
        let matrix = DataMatrix::from_dense(&rows, labels.clone());
        // the root split reduces the loss by 0.5 * (5 + 5 - 0) = 5
        let params = BoosterParams { gamma: 6.0, ..params() };
        let tree = TreeBuilder::new(&params, &matrix).build(
            &squared_error_pairs(&labels, 0.0),
            (0..10).collect(),
            &[0],
        );
        assert_eq!(tree.nodes().len(), 1);
        assert!(tree.nodes()[0].is_leaf());
    }

    #[test]
    fn test_min_child_weight_blocks_small_children() {
        let rows: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64]).collect();
        let labels = vec![10.0, 0.0, 0.0, 0.0];
        let matrix = DataMatrix::from_dense(&rows, labels.clone());
        let params = BoosterParams {
            min_child_weight: 2.0,
            ..params()
        };
        let tree = TreeBuilder::new(&params, &matrix).build(
            &squared_error_pairs(&labels, 0.0),
            (0..4).collect(),
            &[0],
        );
        for node in tree.nodes() {
            assert!(node.cover() >= 2.0);
        }
    }

    #[test]
    fn test_max_depth_is_respected() {
        let rows: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let labels: Vec<f64> = (0..64).map(|i| (i * i) as f64).collect();
        let matrix = DataMatrix::from_dense(&rows, labels.clone());
        let params = BoosterParams { max_depth: 3, ..params() };
        let tree = TreeBuilder::new(&params, &matrix).build(
            &squared_error_pairs(&labels, 0.0),
            (0..64).collect(),
            &[0],
        );
        assert_eq!(tree.depth(), 3);
        assert!(tree.num_leaves() <= 8);
    }

    #[test]
    fn test_missing_values_learn_default_direction() {
        // rows missing the feature look like the high group
        let rows = vec![
            vec![0.0],
            vec![1.0],
            vec![2.0],
            vec![3.0],
            vec![f64::NAN],
            vec![f64::NAN],
        ];
        let labels = vec![-1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
        let matrix = DataMatrix::from_dense(&rows, labels.clone());
        let params = params();
        let tree = TreeBuilder::new(&params, &matrix).build(
            &squared_error_pairs(&labels, 0.0),
            (0..6).collect(),
            &[0],
        );
        match &tree.nodes()[0] {
            Node::Split { default_left, .. } => assert!(!default_left),
            other => panic!("expected a split at the root, got {:?}", other),
        }
        assert_almost_eq!(tree.predict(&matrix, 4), 1.0, 1e-12);
    }

    #[test]
    fn test_leaf_weight_regularization() {
        let matrix = DataMatrix::from_dense(&[vec![0.0]], vec![0.0]);
        let params = BoosterParams {
            eta: 0.5,
            lambda: 1.0,
            alpha: 1.0,
            ..BoosterParams::default()
        };
        let builder = TreeBuilder::new(&params, &matrix);
        // -(G - alpha) / (H + lambda) * eta = -(5 - 1) / (3 + 1) * 0.5
        assert_almost_eq!(builder.leaf_weight(GradientPair::new(5.0, 3.0)), -0.5, 1e-12);
        assert_eq!(builder.leaf_weight(GradientPair::new(0.5, 3.0)), 0.0);
    }

    #[test]
    fn test_split_point_between_adjacent_floats() {
        let value = 1.0f64;
        let next = f64::from_bits(value.to_bits() + 1);
        let threshold = split_point(value, next);
        assert!(value < threshold);
        assert!(!(next < threshold));
    }
}
