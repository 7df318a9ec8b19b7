use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{
    booster_params::BoosterParams,
    dataset::DataMatrix,
    objective::Objective,
    tree::{shap, Node, RegressionTree},
};

/// How [`Booster::feature_importance`] scores a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ImportanceType {
    /// number of splits on the feature
    Weight,
    /// average gain of the splits on the feature
    Gain,
    /// average cover of the splits on the feature
    Cover,
    /// summed gain of the splits on the feature
    TotalGain,
    /// summed cover of the splits on the feature
    TotalCover,
}

/// A trained ensemble of regression trees.
///
/// The margin for a row is the base margin plus the sum of every tree's leaf value; predictions apply the objective's transform to the margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    params: BoosterParams,
    base_margin: f64,
    num_features: usize,
    trees: Vec<RegressionTree>,
}

/// The trees of a [`Booster`] flattened to one row per node, column by column.
///
/// Numeric placeholders stand in for values a node doesn't have: leaves have `feature`, `split`, `yes`, `no`, and `missing` of -1,
/// and store their leaf value in `gain`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreesTable {
    /// index of the tree in training order
    pub tree: Vec<f64>,
    /// index of the node within its tree
    pub node: Vec<f64>,
    /// the feature tested
    pub feature: Vec<f64>,
    /// the split threshold
    pub split: Vec<f64>,
    /// child for rows below the threshold
    pub yes: Vec<f64>,
    /// child for rows at or above the threshold
    pub no: Vec<f64>,
    /// child for rows missing the feature
    pub missing: Vec<f64>,
    /// split gain, or leaf value
    pub gain: Vec<f64>,
    /// sum of hessians reaching the node
    pub cover: Vec<f64>,
}

impl TreesTable {
    /// `(column name, column)` pairs in display order
    pub fn columns(&self) -> [(&'static str, &[f64]); 9] {
        [
            ("Tree", &self.tree),
            ("Node", &self.node),
            ("Feature", &self.feature),
            ("Split", &self.split),
            ("Yes", &self.yes),
            ("No", &self.no),
            ("Missing", &self.missing),
            ("Gain", &self.gain),
            ("Cover", &self.cover),
        ]
    }

    /// the number of rows in the table
    pub fn len(&self) -> usize {
        self.node.len()
    }

    /// true if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.node.is_empty()
    }
}

impl Booster {
    /// an empty ensemble that predicts `objective.transform(base_margin)` for every row
    pub fn new(params: BoosterParams, base_margin: f64, num_features: usize) -> Self {
        Booster {
            params,
            base_margin,
            num_features,
            trees: Vec::new(),
        }
    }

    pub(crate) fn push_tree(&mut self, tree: RegressionTree) {
        self.trees.push(tree);
    }

    /// the parameters the ensemble was trained with
    pub fn params(&self) -> &BoosterParams {
        &self.params
    }

    /// the objective the ensemble was trained on
    pub fn objective(&self) -> Objective {
        self.params.objective
    }

    /// the margin every row starts from
    pub fn base_margin(&self) -> f64 {
        self.base_margin
    }

    /// the width of the training matrix
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// the trees, in training order
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// the number of boosting rounds kept
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// drop every tree after the first `num_trees`
    pub fn truncate(&mut self, num_trees: usize) {
        self.trees.truncate(num_trees);
    }

    /// raw margins for every row of `matrix`
    pub fn predict_margin(&self, matrix: &DataMatrix) -> Vec<f64> {
        (0..matrix.num_rows())
            .map(|row| {
                self.base_margin
                    + self
                        .trees
                        .iter()
                        .map(|tree| tree.predict(matrix, row))
                        .sum::<f64>()
            })
            .collect()
    }

    /// predictions on the label's scale for every row of `matrix`
    pub fn predict(&self, matrix: &DataMatrix) -> Vec<f64> {
        let objective = self.objective();
        self.predict_margin(matrix)
            .into_iter()
            .map(|margin| objective.transform(margin))
            .collect()
    }

    /// Score every feature used by at least one split, keyed `f<index>` and ordered by index.
    ///
    /// Features never split on are absent from the result.
    pub fn feature_importance(&self, importance_type: ImportanceType) -> Vec<(String, f64)> {
        // feature -> (splits, total gain, total cover)
        let mut stats: FxHashMap<usize, (f64, f64, f64)> = FxHashMap::default();
        for tree in self.trees.iter() {
            for node in tree.nodes() {
                if let Node::Split {
                    feature, gain, cover, ..
                } = node
                {
                    let entry = stats.entry(*feature).or_default();
                    entry.0 += 1.0;
                    entry.1 += gain;
                    entry.2 += cover;
                }
            }
        }
        let mut features: Vec<usize> = stats.keys().copied().collect();
        features.sort_unstable();
        features
            .into_iter()
            .map(|feature| {
                let (weight, total_gain, total_cover) = stats[&feature];
                let score = match importance_type {
                    ImportanceType::Weight => weight,
                    ImportanceType::Gain => total_gain / weight,
                    ImportanceType::Cover => total_cover / weight,
                    ImportanceType::TotalGain => total_gain,
                    ImportanceType::TotalCover => total_cover,
                };
                (format!("f{}", feature), score)
            })
            .collect()
    }

    /// the margin the SHAP values of every row are measured from
    pub fn expected_margin(&self) -> f64 {
        self.base_margin + self.trees.iter().map(shap::expected_value).sum::<f64>()
    }

    /// Per-row SHAP contributions to the margin.
    ///
    /// Each row has `num_features() + 1` entries; the last is the bias, so every row sums to that row's margin.
    pub fn shap_values(&self, matrix: &DataMatrix) -> Vec<Vec<f64>> {
        let bias = self.expected_margin();
        (0..matrix.num_rows())
            .map(|row| {
                let mut phi = vec![0.0; self.num_features + 1];
                for tree in self.trees.iter() {
                    shap::add_contributions(tree, matrix, row, &mut phi[..self.num_features]);
                }
                phi[self.num_features] = bias;
                phi
            })
            .collect()
    }

    /// text dump of every tree, in training order
    pub fn dump(&self) -> Vec<String> {
        self.trees.iter().map(|tree| tree.dump()).collect()
    }

    /// every node of every tree as one flat table
    pub fn trees_table(&self) -> TreesTable {
        let mut table = TreesTable::default();
        for (tree_idx, tree) in self.trees.iter().enumerate() {
            for (node_idx, node) in tree.nodes().iter().enumerate() {
                table.tree.push(tree_idx as f64);
                table.node.push(node_idx as f64);
                table.cover.push(node.cover());
                match node {
                    Node::Split {
                        feature,
                        threshold,
                        default_left,
                        left,
                        right,
                        gain,
                        ..
                    } => {
                        table.feature.push(*feature as f64);
                        table.split.push(*threshold);
                        table.yes.push(*left as f64);
                        table.no.push(*right as f64);
                        let missing = if *default_left { *left } else { *right };
                        table.missing.push(missing as f64);
                        table.gain.push(*gain);
                    }
                    Node::Leaf { value, .. } => {
                        table.feature.push(-1.0);
                        table.split.push(-1.0);
                        table.yes.push(-1.0);
                        table.no.push(-1.0);
                        table.missing.push(-1.0);
                        table.gain.push(*value);
                    }
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use statrs::assert_almost_eq;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::tree::tests::two_level_tree;

    fn booster() -> Booster {
        let mut booster = Booster::new(BoosterParams::default(), 0.5, 2);
        booster.push_tree(two_level_tree());
        booster.push_tree(RegressionTree::from_nodes(vec![
            Node::Split {
                feature: 1,
                threshold: 3.0,
                default_left: true,
                left: 1,
                right: 2,
                gain: 2.0,
                cover: 10.0,
                weight: 0.0,
            },
            Node::Leaf { value: 0.5, cover: 5.0 },
            Node::Leaf { value: -0.5, cover: 5.0 },
        ]));
        booster
    }

    fn matrix() -> DataMatrix {
        DataMatrix::from_dense(
            &[vec![0.0, 1.0], vec![0.0, 5.0], vec![1.0, f64::NAN]],
            vec![0.0; 3],
        )
    }

    #[test]
    fn test_predict_sums_trees() {
        let predictions = booster().predict(&matrix());
        assert_eq!(predictions, vec![0.5 - 1.0 + 0.5, 0.5 + 1.0 - 0.5, 0.5 + 3.0 + 0.5]);
    }

    #[test]
    fn test_logistic_predictions_are_probabilities() {
        let params = BoosterParams {
            objective: Objective::BinaryLogistic,
            ..Default::default()
        };
        let mut booster = Booster::new(params, 0.0, 2);
        booster.push_tree(two_level_tree());
        for p in booster.predict(&matrix()) {
            assert!(p > 0.0 && p < 1.0);
        }
    }

    #[test]
    fn test_feature_importance() {
        let booster = booster();
        assert_eq!(
            booster.feature_importance(ImportanceType::Weight),
            vec![("f0".to_string(), 1.0), ("f1".to_string(), 2.0)]
        );
        assert_eq!(
            booster.feature_importance(ImportanceType::TotalGain),
            vec![("f0".to_string(), 10.0), ("f1".to_string(), 6.0)]
        );
        assert_eq!(
            booster.feature_importance(ImportanceType::Gain),
            vec![("f0".to_string(), 10.0), ("f1".to_string(), 3.0)]
        );
        assert_eq!(
            booster.feature_importance(ImportanceType::Cover),
            vec![("f0".to_string(), 10.0), ("f1".to_string(), 8.0)]
        );
    }

    #[test]
    fn test_importance_names() {
        let names: Vec<String> = ImportanceType::iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["weight", "gain", "cover", "total_gain", "total_cover"]);
    }

    #[test]
    fn test_shap_rows_sum_to_margin() {
        let booster = booster();
        let matrix = matrix();
        let margins = booster.predict_margin(&matrix);
        let shap = booster.shap_values(&matrix);
        assert_eq!(shap.len(), 3);
        for (row, margin) in shap.iter().zip(margins) {
            assert_eq!(row.len(), 3);
            assert_almost_eq!(row.iter().sum::<f64>(), margin, 1e-9);
        }
    }

    #[test]
    fn test_trees_table_marks_leaves() {
        let table = booster().trees_table();
        assert_eq!(table.len(), 8);
        assert_eq!(table.tree, vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        // node 2 of tree 0 is a leaf with value -1
        assert_eq!(table.feature[2], -1.0);
        assert_eq!(table.gain[2], -1.0);
        assert_eq!(table.missing[0], 4.0);
        for (_, column) in table.columns() {
            assert_eq!(column.len(), 8);
        }
    }

    #[test]
    fn test_truncate() {
        let mut booster = booster();
        booster.truncate(1);
        assert_eq!(booster.num_trees(), 1);
        assert_eq!(booster.dump().len(), 1);
    }

    #[test]
    fn test_serde_round_trip() {
        let booster = booster();
        let json = serde_json::to_string(&booster).unwrap();
        let restored: Booster = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, booster);
    }
}
