use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{metric::Metric, objective::Objective};

/// Used by the [`train`](crate::train) function to determine how the trees should be grown.
///
/// Names and meanings follow the boosting engine's parameters of the same name.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BoosterParams {
    /// maximum depth of each tree. A depth-1 tree is a single split
    pub max_depth: usize,
    /// step size shrinkage applied to every leaf weight, AKA the learning rate
    pub eta: f64,
    /// minimum loss reduction required to keep a split. Splits whose gain falls below this are pruned after the tree is grown
    pub gamma: f64,
    /// minimum sum of hessians required in each child of a split
    pub min_child_weight: f64,
    /// fraction of training rows sampled (without replacement, independently per row) for each tree
    pub subsample: f64,
    /// fraction of features sampled for each tree
    pub colsample_bytree: f64,
    /// L2 regularization on leaf weights
    pub lambda: f64,
    /// L1 regularization on leaf weights
    pub alpha: f64,
    /// the initial prediction for every row, on the label's scale
    pub base_score: f64,
    /// the learning objective
    pub objective: Objective,
    /// metrics evaluated on every eval set after each round. If empty, the objective's default metric is used
    pub eval_metric: Vec<Metric>,
    /// seed for row and column sampling
    pub seed: u64,
    /// if true, suppress per-round log output
    pub silent: bool,
}

impl BoosterParams {
    /// Check every parameter for a legal value
    ///
    /// # Errors
    /// Returns [`ParamsError`] if...
    /// * `max_depth` is 0
    /// * `eta` is not positive
    /// * `subsample` or `colsample_bytree` is not in (0, 1]
    /// * `gamma`, `min_child_weight`, `lambda`, or `alpha` is negative
    /// * `base_score` is not a legal prediction for the objective
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.max_depth == 0 {
            return Err(ParamsError::ZeroMaxDepth);
        }
        if !(self.eta > 0.0) {
            return Err(ParamsError::NonPositiveEta(self.eta));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ParamsError::FractionOutOfRange {
                name: "subsample",
                value: self.subsample,
            });
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return Err(ParamsError::FractionOutOfRange {
                name: "colsample_bytree",
                value: self.colsample_bytree,
            });
        }
        for (name, value) in [
            ("gamma", self.gamma),
            ("min_child_weight", self.min_child_weight),
            ("lambda", self.lambda),
            ("alpha", self.alpha),
        ] {
            if !(value >= 0.0) {
                return Err(ParamsError::Negative { name, value });
            }
        }
        if self.objective.base_margin(self.base_score).is_none() {
            return Err(ParamsError::InvalidBaseScore {
                objective: self.objective,
                base_score: self.base_score,
            });
        }
        Ok(())
    }

    /// the metrics to evaluate, falling back to the objective's default
    pub fn metrics(&self) -> Vec<Metric> {
        if self.eval_metric.is_empty() {
            vec![self.objective.default_metric()]
        } else {
            self.eval_metric.clone()
        }
    }

    /// numeric view of the parameters, as recorded in the `hyperparameters` collection
    pub fn hyperparameters(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("max_depth", self.max_depth as f64),
            ("eta", self.eta),
            ("gamma", self.gamma),
            ("min_child_weight", self.min_child_weight),
            ("subsample", self.subsample),
            ("colsample_bytree", self.colsample_bytree),
            ("lambda", self.lambda),
            ("alpha", self.alpha),
            ("base_score", self.base_score),
            ("seed", self.seed as f64),
            ("silent", if self.silent { 1.0 } else { 0.0 }),
        ]
    }
}

impl Default for BoosterParams {
    /// Returns a BoosterParams struct with the following default values:
    /// * `max_depth`: 6
    /// * `eta`: 0.3
    /// * `gamma`: 0.0
    /// * `min_child_weight`: 1.0
    /// * `subsample`: 1.0
    /// * `colsample_bytree`: 1.0
    /// * `lambda`: 1.0
    /// * `alpha`: 0.0
    /// * `base_score`: 0.5
    /// * `objective`: `reg:squarederror`
    /// * `eval_metric`: empty (objective default)
    /// * `seed`: 0
    /// * `silent`: false
    fn default() -> Self {
        BoosterParams {
            max_depth: 6,
            eta: 0.3,
            gamma: 0.0,
            min_child_weight: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            lambda: 1.0,
            alpha: 0.0,
            base_score: 0.5,
            objective: Objective::SquaredError,
            eval_metric: Vec::new(),
            seed: 0,
            silent: false,
        }
    }
}

/// Errors that can occur when validating a [`BoosterParams`] struct
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamsError {
    /// `max_depth` was 0, which would leave no room for a single split
    ZeroMaxDepth,
    /// `eta` was zero, negative, or NaN
    NonPositiveEta(f64),
    /// a sampling fraction was outside (0, 1]
    FractionOutOfRange {
        /// the name of the offending parameter
        name: &'static str,
        /// the value received
        value: f64,
    },
    /// a regularization or constraint parameter was negative
    Negative {
        /// the name of the offending parameter
        name: &'static str,
        /// the value received
        value: f64,
    },
    /// the base score is not a valid prediction for the objective (e.g. 1.0 for a logistic objective)
    InvalidBaseScore {
        /// the objective in use
        objective: Objective,
        /// the base score received
        base_score: f64,
    },
}

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamsError::ZeroMaxDepth => write!(f, "max_depth must be at least 1"),
            ParamsError::NonPositiveEta(eta) => write!(f, "eta must be positive, got {}", eta),
            ParamsError::FractionOutOfRange { name, value } => write!(f, "{} must be in (0, 1], got {}", name, value),
            ParamsError::Negative { name, value } => write!(f, "{} must be non-negative, got {}", name, value),
            ParamsError::InvalidBaseScore { objective, base_score } => write!(f, "base_score {} is not valid for objective {}", base_score, objective),
        }
    }
}

impl std::error::Error for ParamsError {}
