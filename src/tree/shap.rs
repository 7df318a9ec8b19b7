//! Path-dependent TreeSHAP (Lundberg et al., "Consistent Individualized Feature Attribution for Tree Ensembles").
//!
//! For one row and one tree, each feature gets a contribution such that the contributions plus the tree's
//! cover-weighted expected value equal the tree's prediction for that row.

use super::{goes_left, Node, RegressionTree};
use crate::dataset::DataMatrix;

#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// -1 for the root placeholder
    feature: i64,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// the prediction of `tree` averaged over its leaves, weighted by cover
pub(crate) fn expected_value(tree: &RegressionTree) -> f64 {
    let nodes = tree.nodes();
    let root_cover = nodes[0].cover();
    if root_cover <= 0.0 {
        return 0.0;
    }
    nodes
        .iter()
        .filter_map(|node| match node {
            Node::Leaf { value, cover } => Some(value * cover / root_cover),
            Node::Split { .. } => None,
        })
        .sum()
}

/// Add the contribution of every feature of `row` under `tree` into `phi`, which must be at least as long as the matrix is wide.
pub(crate) fn add_contributions(tree: &RegressionTree, matrix: &DataMatrix, row: usize, phi: &mut [f64]) {
    let walker = ShapWalker { tree, matrix, row };
    walker.recurse(phi, 0, &[], 0, 1.0, 1.0, -1);
}

struct ShapWalker<'a> {
    tree: &'a RegressionTree,
    matrix: &'a DataMatrix,
    row: usize,
}

impl ShapWalker<'_> {
    #[allow(clippy::too_many_arguments)]
    fn recurse(
        &self,
        phi: &mut [f64],
        node: usize,
        parent_path: &[PathElement],
        unique_depth: usize,
        parent_zero_fraction: f64,
        parent_one_fraction: f64,
        parent_feature: i64,
    ) {
        let mut path: Vec<PathElement> = parent_path[..unique_depth].to_vec();
        extend_path(&mut path, parent_zero_fraction, parent_one_fraction, parent_feature);
        let mut unique_depth = unique_depth;

        match &self.tree.nodes()[node] {
            Node::Leaf { value, .. } => {
                for i in 1..=unique_depth {
                    let weight = unwound_path_sum(&path, unique_depth, i);
                    let element = path[i];
                    phi[element.feature as usize] +=
                        weight * (element.one_fraction - element.zero_fraction) * value;
                }
            }
            Node::Split {
                feature,
                threshold,
                default_left,
                left,
                right,
                cover,
                ..
            } => {
                let (hot, cold) =
                    if goes_left(self.matrix.value(self.row, *feature), *threshold, *default_left) {
                        (*left, *right)
                    } else {
                        (*right, *left)
                    };
                let nodes = self.tree.nodes();
                let (hot_zero_fraction, cold_zero_fraction) = if *cover > 0.0 {
                    (nodes[hot].cover() / cover, nodes[cold].cover() / cover)
                } else {
                    (0.5, 0.5)
                };

                // a feature already on the path is undone before being re-added below
                let mut incoming_zero_fraction = 1.0;
                let mut incoming_one_fraction = 1.0;
                if let Some(path_index) =
                    (0..=unique_depth).find(|&i| path[i].feature == *feature as i64)
                {
                    incoming_zero_fraction = path[path_index].zero_fraction;
                    incoming_one_fraction = path[path_index].one_fraction;
                    unwind_path(&mut path, unique_depth, path_index);
                    unique_depth -= 1;
                }

                self.recurse(
                    phi,
                    hot,
                    &path,
                    unique_depth + 1,
                    hot_zero_fraction * incoming_zero_fraction,
                    incoming_one_fraction,
                    *feature as i64,
                );
                self.recurse(
                    phi,
                    cold,
                    &path,
                    unique_depth + 1,
                    cold_zero_fraction * incoming_zero_fraction,
                    0.0,
                    *feature as i64,
                );
            }
        }
    }
}

/// append an element to the path, updating the permutation weights of the elements already on it
fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: i64) {
    let unique_depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if unique_depth == 0 { 1.0 } else { 0.0 },
    });
    let depth = unique_depth as f64;
    for i in (0..unique_depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / (depth + 1.0);
        path[i].weight = zero_fraction * path[i].weight * (depth - i as f64) / (depth + 1.0);
    }
}

/// undo the extension that added `path[path_index]`
fn unwind_path(path: &mut Vec<PathElement>, unique_depth: usize, path_index: usize) {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let depth = unique_depth as f64;
    let mut next_one_portion = path[unique_depth].weight;

    for i in (0..unique_depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * (depth + 1.0) / ((i + 1) as f64 * one_fraction);
            next_one_portion =
                tmp - path[i].weight * zero_fraction * (depth - i as f64) / (depth + 1.0);
        } else {
            path[i].weight = path[i].weight * (depth + 1.0) / (zero_fraction * (depth - i as f64));
        }
    }
    for i in path_index..unique_depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.truncate(unique_depth);
}

/// total permutation weight of the path if `path[path_index]` were unwound
fn unwound_path_sum(path: &[PathElement], unique_depth: usize, path_index: usize) -> f64 {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let depth = unique_depth as f64;
    let mut next_one_portion = path[unique_depth].weight;
    let mut total = 0.0;

    for i in (0..unique_depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * (depth + 1.0) / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero_fraction * ((depth - i as f64) / (depth + 1.0));
        } else if zero_fraction != 0.0 {
            total += (path[i].weight / zero_fraction) / ((depth - i as f64) / (depth + 1.0));
        }
    }
    total
}
