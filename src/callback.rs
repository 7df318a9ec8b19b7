use std::{error::Error, fmt};

use log::info;

use crate::{booster::Booster, metric::Metric};

/// Returned by [`TrainingCallback::after_iteration`] to tell [`crate::train`] whether to keep boosting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// keep training
    Continue,
    /// stop after the current round. The tree built this round is kept
    Stop,
}

/// Structs implementing this trait can be registered with [`crate::train`] to observe and steer training.
///
/// Every registered callback is called for every event, in registration order, even after one of them has asked to stop.
pub trait TrainingCallback {
    /// called once, after the base margin is set and before the first tree is grown
    fn before_training(&mut self, _booster: &Booster) -> Result<(), CallbackError> {
        Ok(())
    }

    /// called after the tree of round `iteration` (0-indexed) has been added and every eval set has been scored
    fn after_iteration(
        &mut self,
        booster: &Booster,
        iteration: usize,
        evals_log: &EvaluationLog,
    ) -> Result<CallbackAction, CallbackError>;

    /// called once, after the last round
    fn after_training(&mut self, _booster: &Booster) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Indicates that a [`TrainingCallback`] failed. Training stops when a callback returns an error.
#[derive(Debug)]
pub struct CallbackError {
    /// the name of the callback that failed
    pub callback: &'static str,
    /// the underlying failure
    pub source: Box<dyn Error + Send + Sync>,
}

impl CallbackError {
    /// wrap `source` as a failure of the callback named `callback`
    pub fn new(callback: &'static str, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        CallbackError {
            callback,
            source: source.into(),
        }
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "callback '{}' failed: {}", self.callback, self.source)
    }
}

impl Error for CallbackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// the history of one metric on one eval set
#[derive(Debug, Clone, PartialEq)]
pub struct MetricHistory {
    /// the eval set's name, e.g. `validation`
    pub dataset: String,
    /// the metric evaluated
    pub metric: Metric,
    /// one value per completed round
    pub values: Vec<f64>,
}

impl MetricHistory {
    /// the name under which the engine reports this metric, e.g. `validation-rmse`
    pub fn name(&self) -> String {
        format!("{}-{}", self.dataset, self.metric)
    }
}

/// Per-round metric values for every eval set, in the order the eval sets and metrics were registered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationLog {
    histories: Vec<MetricHistory>,
}

impl EvaluationLog {
    /// append this round's `value` of `metric` on `dataset`
    pub fn record(&mut self, dataset: &str, metric: Metric, value: f64) {
        match self
            .histories
            .iter_mut()
            .find(|h| h.dataset == dataset && h.metric == metric)
        {
            Some(history) => history.values.push(value),
            None => self.histories.push(MetricHistory {
                dataset: dataset.to_string(),
                metric,
                values: vec![value],
            }),
        }
    }

    /// every recorded history
    pub fn histories(&self) -> &[MetricHistory] {
        &self.histories
    }

    /// the values of `metric` on `dataset`, if it has been recorded
    pub fn history(&self, dataset: &str, metric: Metric) -> Option<&[f64]> {
        self.histories
            .iter()
            .find(|h| h.dataset == dataset && h.metric == metric)
            .map(|h| h.values.as_slice())
    }

    /// `(name, latest value)` for every history, e.g. `("train-rmse", 2.1)`
    pub fn latest(&self) -> Vec<(String, f64)> {
        self.histories
            .iter()
            .filter_map(|h| h.values.last().map(|v| (h.name(), *v)))
            .collect()
    }

    /// true if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

/// A callback that does nothing when called.
#[derive(Default)]
pub struct EmptyCallback {}

impl EmptyCallback {
    /// Create a new instance of the EmptyCallback
    pub fn new() -> Self {
        EmptyCallback {}
    }
}

impl TrainingCallback for EmptyCallback {
    fn after_iteration(
        &mut self,
        _booster: &Booster,
        _iteration: usize,
        _evals_log: &EvaluationLog,
    ) -> Result<CallbackAction, CallbackError> {
        Ok(CallbackAction::Continue)
    }
}

/// Stops training when the last metric of the last eval set has not improved for `patience` rounds.
///
/// All supported metrics are lower-is-better.
pub struct EarlyStopping {
    patience: usize,
    best_value: Option<f64>,
    best_iteration: usize,
}

impl EarlyStopping {
    /// stop after `patience` rounds without improvement
    pub fn new(patience: usize) -> Self {
        EarlyStopping {
            patience,
            best_value: None,
            best_iteration: 0,
        }
    }

    /// the best value of the monitored metric seen so far
    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    /// the round at which the best value was observed
    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }
}

impl TrainingCallback for EarlyStopping {
    fn before_training(&mut self, _booster: &Booster) -> Result<(), CallbackError> {
        self.best_value = None;
        self.best_iteration = 0;
        Ok(())
    }

    fn after_iteration(
        &mut self,
        _booster: &Booster,
        iteration: usize,
        evals_log: &EvaluationLog,
    ) -> Result<CallbackAction, CallbackError> {
        let Some(value) = evals_log
            .histories()
            .last()
            .and_then(|h| h.values.last().copied())
        else {
            return Ok(CallbackAction::Continue);
        };
        if self.best_value.map_or(true, |best| value < best) {
            self.best_value = Some(value);
            self.best_iteration = iteration;
        }
        if iteration.saturating_sub(self.best_iteration) >= self.patience {
            info!(
                "stopping early at round {}; best round was {} with {}",
                iteration,
                self.best_iteration,
                self.best_value.unwrap_or(f64::NAN)
            );
            return Ok(CallbackAction::Stop);
        }
        Ok(CallbackAction::Continue)
    }
}
