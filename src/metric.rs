use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use strum::{Display, EnumIter, EnumString};

const LOG_EPS: f64 = 1e-16;

/// An evaluation metric, computed on transformed predictions
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// root mean squared error
    Rmse,
    /// mean absolute error
    Mae,
    /// mean pseudo-Huber error (slope 1)
    Mphe,
    /// negative log likelihood of a binary label
    #[strum(serialize = "logloss")]
    #[serde(rename = "logloss")]
    LogLoss,
    /// binary classification error rate at a 0.5 threshold
    Error,
    /// negative log likelihood of a poisson count
    #[strum(serialize = "poisson-nloglik")]
    #[serde(rename = "poisson-nloglik")]
    PoissonNegLogLik,
}

impl Metric {
    /// Evaluate the metric over `predictions` against `labels`.
    ///
    /// Returns NaN when there are no rows to evaluate.
    pub fn evaluate(&self, predictions: &[f64], labels: &[f64]) -> f64 {
        debug_assert_eq!(predictions.len(), labels.len());
        if predictions.is_empty() {
            return f64::NAN;
        }
        let pairs = predictions.iter().zip(labels.iter());
        let n = predictions.len() as f64;
        match self {
            Metric::Rmse => (pairs.map(|(p, y)| (p - y).powi(2)).sum::<f64>() / n).sqrt(),
            Metric::Mae => pairs.map(|(p, y)| (p - y).abs()).sum::<f64>() / n,
            Metric::Mphe => {
                pairs
                    .map(|(p, y)| (1.0 + (p - y).powi(2)).sqrt() - 1.0)
                    .sum::<f64>()
                    / n
            }
            Metric::LogLoss => {
                pairs
                    .map(|(&p, &y)| {
                        let p = p.clamp(LOG_EPS, 1.0 - LOG_EPS);
                        -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
                    })
                    .sum::<f64>()
                    / n
            }
            Metric::Error => {
                pairs
                    .filter(|&(p, y)| (*p > 0.5) != (*y > 0.5))
                    .count() as f64
                    / n
            }
            Metric::PoissonNegLogLik => {
                pairs
                    .map(|(&p, &y)| {
                        let p = p.max(LOG_EPS);
                        ln_gamma(y + 1.0) + p - p.ln() * y
                    })
                    .sum::<f64>()
                    / n
            }
        }
    }
}
