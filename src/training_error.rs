use crate::{booster_params::ParamsError, callback::CallbackError, objective::Objective};

/// Indicates that an error was encountered during training
///
/// If displayed, this error will show the boosting round at which the error was encountered (if training had started), as well as its cause.
#[derive(Debug)]
pub struct TrainingError {
    /// What went wrong
    pub kind: TrainingErrorKind,
    /// The 0-indexed round at which the error was encountered. `None` if training never started
    pub iteration: Option<usize>,
}

/// The cause of a [`TrainingError`]
#[derive(Debug)]
pub enum TrainingErrorKind {
    /// the parameters failed validation
    Params(ParamsError),
    /// the training matrix has no rows
    EmptyTrainingData,
    /// a training label is not a legal target for the objective
    InvalidLabel {
        /// row of the offending label
        row: usize,
        /// the label
        label: f64,
        /// the objective in use
        objective: Objective,
    },
    /// a callback failed
    Callback(CallbackError),
}

impl TrainingError {
    pub(crate) fn before_training(kind: TrainingErrorKind) -> Self {
        TrainingError { kind, iteration: None }
    }

    pub(crate) fn at(kind: TrainingErrorKind, iteration: usize) -> Self {
        TrainingError {
            kind,
            iteration: Some(iteration),
        }
    }
}

impl std::fmt::Display for TrainingError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(iteration) = self.iteration {
            write!(f, "round {} encountered error: ", iteration)?;
        }
        match &self.kind {
            TrainingErrorKind::Params(e) => write!(f, "invalid parameters: {}", e),
            TrainingErrorKind::EmptyTrainingData => write!(f, "the training data has no rows"),
            TrainingErrorKind::InvalidLabel {
                row,
                label,
                objective,
            } => write!(
                f,
                "label {} at row {} is not valid for objective {}",
                label, row, objective
            ),
            TrainingErrorKind::Callback(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            TrainingErrorKind::Params(e) => Some(e),
            TrainingErrorKind::Callback(e) => Some(e),
            _ => None,
        }
    }
}
