use serde::{Deserialize, Serialize};
use statrs::function::logistic::{logistic, logit};
use strum::{Display, EnumIter, EnumString};

use crate::metric::Metric;

/// hessians are floored at this value so leaf weights stay finite
const MIN_HESSIAN: f64 = 1e-16;
/// the engine's poisson default, used to keep early poisson steps from exploding
const POISSON_MAX_DELTA_STEP: f64 = 0.7;
const HUBER_SLOPE: f64 = 1.0;

/// The learning objective, named the way the boosting engine names it (e.g. `reg:squarederror`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Objective {
    /// squared error regression
    #[strum(serialize = "reg:squarederror")]
    #[serde(rename = "reg:squarederror")]
    SquaredError,
    /// pseudo-Huber regression with slope 1
    #[strum(serialize = "reg:pseudohubererror")]
    #[serde(rename = "reg:pseudohubererror")]
    PseudoHuberError,
    /// logistic regression on labels in [0, 1], predicting probabilities
    #[strum(serialize = "reg:logistic")]
    #[serde(rename = "reg:logistic")]
    Logistic,
    /// binary classification with labels in {0, 1}, predicting probabilities
    #[strum(serialize = "binary:logistic")]
    #[serde(rename = "binary:logistic")]
    BinaryLogistic,
    /// poisson regression for count data
    #[strum(serialize = "count:poisson")]
    #[serde(rename = "count:poisson")]
    Poisson,
}

impl Objective {
    /// first and second derivative of the loss with respect to the margin
    #[inline]
    pub fn gradient(&self, margin: f64, label: f64) -> (f64, f64) {
        match self {
            Objective::SquaredError => (margin - label, 1.0),
            Objective::PseudoHuberError => {
                let z = margin - label;
                let scale = 1.0 + (z / HUBER_SLOPE).powi(2);
                let scale_sqrt = scale.sqrt();
                let grad = z / scale_sqrt;
                let hess = HUBER_SLOPE.powi(2) / (scale * scale_sqrt);
                (grad, hess.max(MIN_HESSIAN))
            }
            Objective::Logistic | Objective::BinaryLogistic => {
                let p = logistic(margin);
                (p - label, (p * (1.0 - p)).max(MIN_HESSIAN))
            }
            Objective::Poisson => {
                let p = margin.exp();
                (p - label, (margin + POISSON_MAX_DELTA_STEP).exp())
            }
        }
    }

    /// convert a raw margin into a prediction on the label's scale
    #[inline]
    pub fn transform(&self, margin: f64) -> f64 {
        match self {
            Objective::SquaredError | Objective::PseudoHuberError => margin,
            Objective::Logistic | Objective::BinaryLogistic => logistic(margin),
            Objective::Poisson => margin.exp(),
        }
    }

    /// The starting margin for a base score given on the label's scale.
    ///
    /// Returns `None` if the base score is outside the objective's valid range.
    pub fn base_margin(&self, base_score: f64) -> Option<f64> {
        match self {
            Objective::SquaredError | Objective::PseudoHuberError => {
                base_score.is_finite().then_some(base_score)
            }
            Objective::Logistic | Objective::BinaryLogistic => {
                (base_score > 0.0 && base_score < 1.0).then(|| logit(base_score))
            }
            Objective::Poisson => (base_score > 0.0 && base_score.is_finite()).then(|| base_score.ln()),
        }
    }

    /// whether `label` is a legal target for this objective
    pub fn is_valid_label(&self, label: f64) -> bool {
        match self {
            Objective::SquaredError | Objective::PseudoHuberError => label.is_finite(),
            Objective::Logistic => (0.0..=1.0).contains(&label),
            Objective::BinaryLogistic => label == 0.0 || label == 1.0,
            Objective::Poisson => label.is_finite() && label >= 0.0,
        }
    }

    /// the metric reported when the caller does not ask for one
    pub fn default_metric(&self) -> Metric {
        match self {
            Objective::SquaredError => Metric::Rmse,
            Objective::PseudoHuberError => Metric::Mphe,
            Objective::Logistic => Metric::Rmse,
            Objective::BinaryLogistic => Metric::LogLoss,
            Objective::Poisson => Metric::PoissonNegLogLik,
        }
    }
}

impl Default for Objective {
    fn default() -> Self {
        Objective::SquaredError
    }
}
