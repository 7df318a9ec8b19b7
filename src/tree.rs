use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::dataset::DataMatrix;

pub(crate) mod builder;
pub(crate) mod shap;

/// A single node of a [`RegressionTree`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// an internal node. Rows with `value < threshold` go left, rows missing the feature go the default direction
    Split {
        /// the column tested by this node
        feature: usize,
        /// the split point
        threshold: f64,
        /// where rows missing `feature` are sent
        default_left: bool,
        /// index of the left child
        left: usize,
        /// index of the right child
        right: usize,
        /// loss reduction achieved by the split
        gain: f64,
        /// sum of hessians of the training rows that reached this node
        cover: f64,
        /// the leaf value this node would have if its children were pruned
        weight: f64,
    },
    /// a terminal node
    Leaf {
        /// the margin contribution of the leaf, already scaled by the learning rate
        value: f64,
        /// sum of hessians of the training rows that reached this node
        cover: f64,
    },
}

impl Node {
    /// sum of hessians of the training rows that reached this node
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }

    /// true for [`Node::Leaf`]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// A binary regression tree. Node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Build a tree from its nodes. Node 0 is the root, and every child index must point into `nodes`.
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        debug_assert!(!nodes.is_empty());
        RegressionTree { nodes }
    }

    /// all nodes of the tree, root first
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// the number of leaves in the tree
    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    /// the depth of the tree, where a single leaf has depth 0
    pub fn depth(&self) -> usize {
        fn depth_from(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => {
                    1 + depth_from(nodes, *left).max(depth_from(nodes, *right))
                }
            }
        }
        depth_from(&self.nodes, 0)
    }

    /// index of the leaf that `row` of `matrix` lands in
    pub fn leaf_index(&self, matrix: &DataMatrix, row: usize) -> usize {
        let mut idx = 0;
        while let Node::Split {
            feature,
            threshold,
            default_left,
            left,
            right,
            ..
        } = &self.nodes[idx]
        {
            idx = if goes_left(matrix.value(row, *feature), *threshold, *default_left) {
                *left
            } else {
                *right
            };
        }
        idx
    }

    /// the margin contribution of this tree for `row` of `matrix`
    #[inline]
    pub fn predict(&self, matrix: &DataMatrix, row: usize) -> f64 {
        match &self.nodes[self.leaf_index(matrix, row)] {
            Node::Leaf { value, .. } => *value,
            Node::Split { .. } => unreachable!("leaf_index always returns a leaf"),
        }
    }

    /// Text dump of the tree, one node per line, children indented one tab deeper than their parent:
    /// ```text
    /// 0:[f1<0.5] yes=1,no=2,missing=1,gain=3.2,cover=100
    ///     1:leaf=-0.4,cover=60
    ///     2:leaf=0.3,cover=40
    /// ```
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            for _ in 0..depth {
                out.push('\t');
            }
            // writing to a String can't fail
            let _ = match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    default_left,
                    left,
                    right,
                    gain,
                    cover,
                    ..
                } => {
                    stack.push((*right, depth + 1));
                    stack.push((*left, depth + 1));
                    let missing = if *default_left { left } else { right };
                    writeln!(
                        out,
                        "{}:[f{}<{}] yes={},no={},missing={},gain={},cover={}",
                        idx, feature, threshold, left, right, missing, gain, cover
                    )
                }
                Node::Leaf { value, cover } => {
                    writeln!(out, "{}:leaf={},cover={}", idx, value, cover)
                }
            };
        }
        out
    }
}

/// the routing rule shared by training, prediction, and explanation
#[inline]
pub(crate) fn goes_left(value: f64, threshold: f64, default_left: bool) -> bool {
    if value.is_nan() {
        default_left
    } else {
        value < threshold
    }
}
