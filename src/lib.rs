#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! A library to train gradient-boosted regression trees while a debug hook captures what happens inside.
//!
//! The `boostscope` crate contains a small second-order gradient boosting engine with exact greedy split finding,
//! and a [`hook`] that records metrics, predictions, feature importance, SHAP values, and the trees themselves
//! after selected boosting rounds. The hook's output can be inspected after (or during) training to debug a model.
//!
//! The [dataset] module loads LIBSVM-formatted data into a [`DataMatrix`], and the [download] module fetches and splits
//! the public abalone dataset the demo binary trains on.
//!
//! ## How is a round of boosting run?
//! Each round computes the first and second derivative of the loss for every training row at the current margin,
//! samples rows and features, grows one [`RegressionTree`](tree::RegressionTree) that maximizes the regularized loss reduction,
//! and adds the tree's leaf values to every row's margin. Every eval set is then scored, and the round is handed to each registered
//! [`TrainingCallback`](callback::TrainingCallback), which may stop training early.
//!
//! # Examples
//! Train a regressor on a 1-dimensional step function, validating after every round, then save it:
//! ```
//! use boostscope::{train, BoosterParams, DataMatrix, EvalSet, EmptyCallback};
//! use tempfile::tempfile;
//!
//! let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
//! let labels: Vec<f64> = (0..40).map(|i| if i < 20 { 1.0 } else { 5.0 }).collect();
//! let dtrain = DataMatrix::from_dense(&rows, labels);
//! # let dval = dtrain.clone();
//!
//! let params = BoosterParams { max_depth: 2, eta: 0.5, ..Default::default() };
//! let booster = train(
//!     &params,
//!     &dtrain,
//!     &[EvalSet::new("train", &dtrain), EvalSet::new("validation", &dval)],
//!     20,
//!     &mut [&mut EmptyCallback::new()],
//! )?;
//! let predictions = booster.predict(&dval);
//! assert!((predictions[0] - 1.0).abs() < 0.1);
//!
//! // Booster implements the serde Serialize trait, so it can be saved with any serde-compatible format
//! let mut file = tempfile()?;
//! ciborium::into_writer(&booster, &mut file)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Contains the [`Booster`] struct, a trained ensemble of trees.
pub mod booster;
/// Training parameters for [`train`].
pub mod booster_params;
/// Provides a trait for observing and steering [`train`].
pub mod callback;
/// Loading LIBSVM data into a [`DataMatrix`].
pub mod dataset;
/// Fetching a LIBSVM dataset over HTTP and splitting it for training.
pub mod download;
pub mod hook;
/// Evaluation metrics reported after every round.
pub mod metric;
/// Learning objectives and their gradients.
pub mod objective;
/// Seeded train/validation splitting.
pub mod split;
/// Regression trees, their construction, and their explanation.
pub mod tree;

mod training_error;

use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub use booster::Booster;
pub use booster_params::BoosterParams;
use callback::{CallbackAction, EvaluationLog, TrainingCallback};
pub use callback::{EarlyStopping, EmptyCallback};
pub use dataset::DataMatrix;
use metric::Metric;
pub use training_error::{TrainingError, TrainingErrorKind};
use tree::builder::{GradientPair, TreeBuilder};

/// A named data set scored after every round, e.g. `train` or `validation`
#[derive(Clone, Copy, Debug)]
pub struct EvalSet<'a> {
    /// the name metrics are reported under, e.g. `validation` in `validation-rmse`
    pub name: &'a str,
    /// the rows to score
    pub data: &'a DataMatrix,
}

impl<'a> EvalSet<'a> {
    /// Create a new EvalSet
    pub fn new(name: &'a str, data: &'a DataMatrix) -> Self {
        EvalSet { name, data }
    }
}

/// Train a boosted ensemble of `num_boost_round` trees on `dtrain`.
///
/// After each round, every metric of `params` is evaluated on every set in `evals` (in order) and recorded in an [`EvaluationLog`],
/// then every callback's [`after_iteration`](TrainingCallback::after_iteration) is called. If any callback returns [`CallbackAction::Stop`],
/// training ends after that round.
///
/// Row subsampling draws each row independently with probability `subsample`; column sampling draws `colsample_bytree` of the features
/// (at least one) for each tree. Both are seeded by `params.seed`, so training is deterministic for a given seed.
///
/// Returns the trained booster if no errors are thrown.
///
/// # Errors
/// returns a [TrainingError] if...
/// * `params` fail [validation](BoosterParams::validate)
/// * `dtrain` has no rows
/// * a training label is not valid for the objective
/// * a callback fails
///
/// # Example
/// Stop training once the validation error stops improving:
/// ```
/// use boostscope::{train, BoosterParams, DataMatrix, EvalSet, EarlyStopping};
/// # use boostscope::TrainingError;
///
/// let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![(i % 3) as f64]).collect();
/// let labels: Vec<f64> = (0..30).map(|i| (i % 3) as f64 * 2.0).collect();
/// let dtrain = DataMatrix::from_dense(&rows, labels);
/// // the validation targets run the other way, so fitting dtrain only makes them worse
/// let flipped: Vec<f64> = (0..30).map(|i| 4.0 - (i % 3) as f64 * 2.0).collect();
/// let dval = DataMatrix::from_dense(&rows, flipped);
///
/// let mut early_stopping = EarlyStopping::new(3);
/// let booster = train(
///     &BoosterParams::default(),
///     &dtrain,
///     &[EvalSet::new("validation", &dval)],
///     500,
///     &mut [&mut early_stopping],
/// )?;
/// assert_eq!(early_stopping.best_iteration(), 0);
/// assert_eq!(booster.num_trees(), 4);
/// # Ok::<(), TrainingError>(())
/// ```
pub fn train(
    params: &BoosterParams,
    dtrain: &DataMatrix,
    evals: &[EvalSet],
    num_boost_round: usize,
    callbacks: &mut [&mut dyn TrainingCallback],
) -> Result<Booster, TrainingError> {
    params
        .validate()
        .map_err(|e| TrainingError::before_training(TrainingErrorKind::Params(e)))?;
    if dtrain.num_rows() == 0 {
        return Err(TrainingError::before_training(TrainingErrorKind::EmptyTrainingData));
    }
    let objective = params.objective;
    if let Some((row, &label)) = dtrain
        .labels()
        .iter()
        .enumerate()
        .find(|(_, label)| !objective.is_valid_label(**label))
    {
        return Err(TrainingError::before_training(TrainingErrorKind::InvalidLabel {
            row,
            label,
            objective,
        }));
    }
    // validated above
    let base_margin = objective.base_margin(params.base_score).unwrap_or(0.0);
    let metrics = params.metrics();
    let num_features = dtrain.num_features();
    debug!(
        "training {} rounds on {} rows x {} features, objective {}",
        num_boost_round,
        dtrain.num_rows(),
        num_features,
        objective
    );

    let mut booster = Booster::new(params.clone(), base_margin, num_features);
    let builder = TreeBuilder::new(params, dtrain);
    let mut randomness = StdRng::seed_from_u64(params.seed);
    let mut train_margins = vec![base_margin; dtrain.num_rows()];
    let mut eval_margins: Vec<Vec<f64>> = evals
        .iter()
        .map(|eval| vec![base_margin; eval.data.num_rows()])
        .collect();
    let mut evals_log = EvaluationLog::default();

    for callback in callbacks.iter_mut() {
        callback
            .before_training(&booster)
            .map_err(|e| TrainingError::before_training(TrainingErrorKind::Callback(e)))?;
    }

    for iteration in 0..num_boost_round {
        let gradients: Vec<GradientPair> = train_margins
            .iter()
            .zip(dtrain.labels())
            .map(|(&margin, &label)| {
                let (grad, hess) = objective.gradient(margin, label);
                GradientPair::new(grad, hess)
            })
            .collect();
        let rows = sample_rows(dtrain.num_rows(), params.subsample, &mut randomness);
        let features = sample_features(num_features, params.colsample_bytree, &mut randomness);
        let tree = builder.build(&gradients, rows, &features);

        for (row, margin) in train_margins.iter_mut().enumerate() {
            *margin += tree.predict(dtrain, row);
        }
        for (eval, margins) in evals.iter().zip(eval_margins.iter_mut()) {
            for (row, margin) in margins.iter_mut().enumerate() {
                *margin += tree.predict(eval.data, row);
            }
        }
        booster.push_tree(tree);

        let mut report = format!("[{}]", iteration);
        for (eval, margins) in evals.iter().zip(eval_margins.iter()) {
            let predictions: Vec<f64> = margins.iter().map(|&m| objective.transform(m)).collect();
            for &metric in metrics.iter() {
                let value = metric.evaluate(&predictions, eval.data.labels());
                evals_log.record(eval.name, metric, value);
                report.push_str(&format!("\t{}-{}:{:.5}", eval.name, metric, value));
            }
        }
        if !params.silent {
            info!("{}", report);
        }

        let mut stop = false;
        for callback in callbacks.iter_mut() {
            let action = callback
                .after_iteration(&booster, iteration, &evals_log)
                .map_err(|e| TrainingError::at(TrainingErrorKind::Callback(e), iteration))?;
            stop |= action == CallbackAction::Stop;
        }
        if stop {
            debug!("a callback stopped training after round {}", iteration);
            break;
        }
    }

    let last_round = booster.num_trees().saturating_sub(1);
    for callback in callbacks.iter_mut() {
        callback
            .after_training(&booster)
            .map_err(|e| TrainingError::at(TrainingErrorKind::Callback(e), last_round))?;
    }
    Ok(booster)
}

/// Score the booster on `data` with each of `metrics`, returning `(metric, value)` pairs in order.
pub fn evaluate(booster: &Booster, data: &DataMatrix, metrics: &[Metric]) -> Vec<(Metric, f64)> {
    let predictions = booster.predict(data);
    metrics
        .iter()
        .map(|&metric| (metric, metric.evaluate(&predictions, data.labels())))
        .collect()
}

/// Bernoulli row sampling. Always returns at least one row.
fn sample_rows<R: Rng>(num_rows: usize, subsample: f64, randomness: &mut R) -> Vec<usize> {
    if subsample >= 1.0 {
        return (0..num_rows).collect();
    }
    let rows: Vec<usize> = (0..num_rows)
        .filter(|_| randomness.gen_bool(subsample))
        .collect();
    if rows.is_empty() {
        return vec![randomness.gen_range(0..num_rows)];
    }
    rows
}

/// `max(1, floor(colsample * num_features))` features, in ascending order
fn sample_features<R: Rng>(num_features: usize, colsample: f64, randomness: &mut R) -> Vec<usize> {
    if colsample >= 1.0 || num_features == 0 {
        return (0..num_features).collect();
    }
    let amount = ((num_features as f64 * colsample).floor() as usize).clamp(1, num_features);
    let mut features = rand::seq::index::sample(randomness, num_features, amount).into_vec();
    features.sort_unstable();
    features
}

#[cfg(test)]
mod test {
    use statrs::assert_almost_eq;
    use test_log::test;

    use super::*;
    use crate::{callback::CallbackError, objective::Objective};

    fn step_data() -> DataMatrix {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let labels: Vec<f64> = (0..40).map(|i| if i < 20 { 1.0 } else { 5.0 }).collect();
        DataMatrix::from_dense(&rows, labels)
    }

    struct StopAt(usize);

    impl TrainingCallback for StopAt {
        fn after_iteration(
            &mut self,
            _booster: &Booster,
            iteration: usize,
            _evals_log: &EvaluationLog,
        ) -> Result<CallbackAction, CallbackError> {
            if iteration == self.0 {
                Ok(CallbackAction::Stop)
            } else {
                Ok(CallbackAction::Continue)
            }
        }
    }

    struct FailAt(usize);

    impl TrainingCallback for FailAt {
        fn after_iteration(
            &mut self,
            _booster: &Booster,
            iteration: usize,
            _evals_log: &EvaluationLog,
        ) -> Result<CallbackAction, CallbackError> {
            if iteration == self.0 {
                Err(CallbackError::new("fail", "disk full"))
            } else {
                Ok(CallbackAction::Continue)
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        started: bool,
        iterations: Vec<usize>,
        finished_with: Option<usize>,
        train_rmse: Vec<f64>,
    }

    impl TrainingCallback for Recorder {
        fn before_training(&mut self, booster: &Booster) -> Result<(), CallbackError> {
            assert_eq!(booster.num_trees(), 0);
            self.started = true;
            Ok(())
        }

        fn after_iteration(
            &mut self,
            booster: &Booster,
            iteration: usize,
            evals_log: &EvaluationLog,
        ) -> Result<CallbackAction, CallbackError> {
            assert_eq!(booster.num_trees(), iteration + 1);
            self.iterations.push(iteration);
            if let Some(value) = evals_log.history("train", Metric::Rmse).and_then(|h| h.last()) {
                self.train_rmse.push(*value);
            }
            Ok(CallbackAction::Continue)
        }

        fn after_training(&mut self, booster: &Booster) -> Result<(), CallbackError> {
            self.finished_with = Some(booster.num_trees());
            Ok(())
        }
    }

    #[test]
    fn test_training_reduces_error() {
        let dtrain = step_data();
        let mut recorder = Recorder::default();
        let booster = train(
            &BoosterParams::default(),
            &dtrain,
            &[EvalSet::new("train", &dtrain)],
            10,
            &mut [&mut recorder],
        )
        .unwrap();
        assert_eq!(booster.num_trees(), 10);
        assert!(recorder.started);
        assert_eq!(recorder.iterations, (0..10).collect::<Vec<_>>());
        assert_eq!(recorder.finished_with, Some(10));
        for pair in recorder.train_rmse.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "rmse rose: {:?}", pair);
        }
        assert!(*recorder.train_rmse.last().unwrap() < 0.2);
    }

    #[test]
    fn test_log_matches_final_predictions() {
        let dtrain = step_data();
        let mut recorder = Recorder::default();
        let booster = train(
            &BoosterParams { subsample: 0.7, seed: 3, ..Default::default() },
            &dtrain,
            &[EvalSet::new("train", &dtrain)],
            5,
            &mut [&mut recorder],
        )
        .unwrap();
        let scores = evaluate(&booster, &dtrain, &[Metric::Rmse]);
        assert_almost_eq!(scores[0].1, *recorder.train_rmse.last().unwrap(), 1e-9);
    }

    #[test]
    fn test_training_is_deterministic_per_seed() {
        let dtrain = step_data();
        let params = BoosterParams {
            subsample: 0.5,
            colsample_bytree: 0.5,
            seed: 11,
            ..Default::default()
        };
        let first = train(&params, &dtrain, &[], 5, &mut []).unwrap();
        let second = train(&params, &dtrain, &[], 5, &mut []).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_callback_can_stop_training() {
        let dtrain = step_data();
        let mut recorder = Recorder::default();
        let booster = train(
            &BoosterParams::default(),
            &dtrain,
            &[],
            50,
            &mut [&mut StopAt(3), &mut recorder],
        )
        .unwrap();
        assert_eq!(booster.num_trees(), 4);
        // callbacks after the stopping one still see the round
        assert_eq!(recorder.iterations, vec![0, 1, 2, 3]);
        assert_eq!(recorder.finished_with, Some(4));
    }

    #[test]
    fn test_callback_error_carries_round() {
        let dtrain = step_data();
        let err = train(&BoosterParams::default(), &dtrain, &[], 10, &mut [&mut FailAt(2)]).unwrap_err();
        assert_eq!(err.iteration, Some(2));
        assert!(matches!(err.kind, TrainingErrorKind::Callback(_)));
        assert!(err.to_string().contains("round 2"));
    }

    #[test]
    fn test_rejects_invalid_input() {
        let dtrain = step_data();
        let err = train(
            &BoosterParams { max_depth: 0, ..Default::default() },
            &dtrain,
            &[],
            1,
            &mut [],
        )
        .unwrap_err();
        assert!(matches!(err.kind, TrainingErrorKind::Params(_)));
        assert_eq!(err.iteration, None);

        let empty = DataMatrix::from_dense(&[], vec![]);
        let err = train(&BoosterParams::default(), &empty, &[], 1, &mut []).unwrap_err();
        assert!(matches!(err.kind, TrainingErrorKind::EmptyTrainingData));

        let params = BoosterParams {
            objective: Objective::BinaryLogistic,
            ..Default::default()
        };
        let err = train(&params, &dtrain, &[], 1, &mut []).unwrap_err();
        assert!(matches!(
            err.kind,
            TrainingErrorKind::InvalidLabel { row: 20, .. }
        ));
    }

    #[test]
    fn test_zero_rounds_predicts_base_score() {
        let dtrain = step_data();
        let booster = train(&BoosterParams::default(), &dtrain, &[], 0, &mut []).unwrap();
        assert_eq!(booster.num_trees(), 0);
        assert!(booster.predict(&dtrain).iter().all(|&p| p == 0.5));
    }

    #[test]
    fn test_binary_logistic() {
        let rows: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64]).collect();
        let labels: Vec<f64> = (0..50).map(|i| if i < 25 { 0.0 } else { 1.0 }).collect();
        let dtrain = DataMatrix::from_dense(&rows, labels);
        let params = BoosterParams {
            objective: Objective::BinaryLogistic,
            eval_metric: vec![Metric::Error, Metric::LogLoss],
            ..Default::default()
        };
        let booster = train(&params, &dtrain, &[], 20, &mut []).unwrap();
        let scores = evaluate(&booster, &dtrain, &params.metrics());
        assert_eq!(scores[0], (Metric::Error, 0.0));
        assert!(scores[1].1 < 0.2);
    }

    #[test]
    fn test_sample_rows_never_empty() {
        let mut randomness = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            assert!(!sample_rows(3, 0.01, &mut randomness).is_empty());
        }
        assert_eq!(sample_rows(4, 1.0, &mut randomness), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sample_features() {
        let mut randomness = StdRng::seed_from_u64(0);
        let features = sample_features(10, 0.35, &mut randomness);
        assert_eq!(features.len(), 3);
        assert!(features.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sample_features(5, 0.01, &mut randomness).len(), 1);
        assert!(sample_features(0, 0.5, &mut randomness).is_empty());
    }
}
