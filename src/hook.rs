//! A [`TrainingCallback`] that captures training tensors after selected boosting rounds and writes them to disk.
//!
//! Each round is one step. At every step due for saving, the hook gathers the tensors of each selected
//! [collection](CollectionName) whose schedule includes that step, then writes them as a single event (see [`writer`]).
//!
//! # Example
//! ```
//! use boostscope::{train, BoosterParams, DataMatrix, EvalSet};
//! use boostscope::hook::{Hook, SaveConfig, parse_collections};
//!
//! let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
//! let labels: Vec<f64> = (0..20).map(|i| (i % 5) as f64).collect();
//! let dtrain = DataMatrix::from_dense(&rows, labels);
//! let out_dir = tempfile::tempdir()?;
//!
//! let mut hook = Hook::builder(out_dir.path())
//!     .save_config(SaveConfig::every(2))
//!     .collections(parse_collections(&["metrics", "feature_importance"])?)
//!     .train_data(&dtrain)
//!     .build()?;
//! let _booster = train(
//!     &BoosterParams::default(),
//!     &dtrain,
//!     &[EvalSet::new("train", &dtrain)],
//!     4,
//!     &mut [&mut hook],
//! )?;
//! assert_eq!(hook.saved_steps(), &[0, 2]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::{Path, PathBuf};

use log::{debug, warn};
use rustc_hash::FxHashSet;
use strum::IntoEnumIterator;

use crate::{
    booster::{Booster, ImportanceType},
    callback::{CallbackAction, CallbackError, EvaluationLog, TrainingCallback},
    dataset::DataMatrix,
};

/// Named groups of tensors and how they're selected.
pub mod collection;
/// Loading hook settings from a JSON file.
pub mod hook_config;
pub mod hook_error;
/// Choosing the steps at which tensors are saved.
pub mod save_config;
pub mod writer;

pub use collection::{parse_collections, Collection, CollectionName, DEFAULT_COLLECTIONS};
pub use hook_config::{CollectionConfig, HookConfig};
pub use hook_error::HookError;
pub use save_config::SaveConfig;
pub use writer::{read_step_event, EventWriter, StepEvent, TensorFormat, TensorRecord};

const CALLBACK_NAME: &str = "debug hook";

/// Builds a [`Hook`]. Only the output directory is required.
pub struct HookBuilder<'a> {
    out_dir: PathBuf,
    save_config: SaveConfig,
    collections: Vec<Collection>,
    format: TensorFormat,
    train_data: Option<&'a DataMatrix>,
    validation_data: Option<&'a DataMatrix>,
}

impl<'a> HookBuilder<'a> {
    /// the default schedule of every collection. Defaults to every step
    pub fn save_config(mut self, save_config: SaveConfig) -> Self {
        self.save_config = save_config;
        self
    }

    /// the collections to save. Defaults to [`DEFAULT_COLLECTIONS`]
    pub fn collections(mut self, collections: Vec<Collection>) -> Self {
        self.collections = collections;
        self
    }

    /// encoding of event files. Defaults to JSON
    pub fn tensor_format(mut self, format: TensorFormat) -> Self {
        self.format = format;
        self
    }

    /// required by the `average_shap` and `full_shap` collections, and by `predictions`/`labels` when there is no validation data
    pub fn train_data(mut self, data: &'a DataMatrix) -> Self {
        self.train_data = Some(data);
        self
    }

    /// the rows `predictions` and `labels` are reported on
    pub fn validation_data(mut self, data: &'a DataMatrix) -> Self {
        self.validation_data = Some(data);
        self
    }

    /// Validate the schedule and prepare the output directory
    ///
    /// # Errors
    /// returns a [`HookError`] if the schedule is invalid or the output directory can't be used
    pub fn build(self) -> Result<Hook<'a>, HookError> {
        self.save_config.validate()?;
        for collection in self.collections.iter() {
            if let Some(save_config) = &collection.save_config {
                save_config.validate()?;
            }
        }
        let collections = if self.collections.is_empty() {
            DEFAULT_COLLECTIONS.iter().copied().map(Collection::new).collect()
        } else {
            self.collections
        };
        let writer = EventWriter::create(&self.out_dir, self.format)?;
        Ok(Hook {
            writer,
            save_config: self.save_config,
            collections,
            train_data: self.train_data,
            validation_data: self.validation_data,
            hyperparameters_saved: false,
            warned: FxHashSet::default(),
            saved_steps: Vec::new(),
        })
    }
}

/// Captures tensors during [`train`](crate::train). See the [module docs](self).
pub struct Hook<'a> {
    writer: EventWriter,
    save_config: SaveConfig,
    collections: Vec<Collection>,
    train_data: Option<&'a DataMatrix>,
    validation_data: Option<&'a DataMatrix>,
    hyperparameters_saved: bool,
    warned: FxHashSet<CollectionName>,
    saved_steps: Vec<usize>,
}

impl<'a> Hook<'a> {
    /// start building a hook that writes to `out_dir`, which must be absent or empty
    pub fn builder(out_dir: &Path) -> HookBuilder<'a> {
        HookBuilder {
            out_dir: out_dir.to_path_buf(),
            save_config: SaveConfig::default(),
            collections: Vec::new(),
            format: TensorFormat::default(),
            train_data: None,
            validation_data: None,
        }
    }

    /// the directory tensors are written to
    pub fn out_dir(&self) -> &Path {
        self.writer.out_dir()
    }

    /// the collections being saved
    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    /// every step an event was written for, in order
    pub fn saved_steps(&self) -> &[usize] {
        &self.saved_steps
    }

    /// Gather the tensors due at `step`. Collections lacking the data they need are skipped, with a warning the first time.
    pub fn collect_tensors(&mut self, booster: &Booster, step: usize, evals_log: &EvaluationLog) -> Vec<TensorRecord> {
        let due: Vec<CollectionName> = self
            .collections
            .iter()
            .filter(|c| c.save_config(&self.save_config).should_save(step))
            .map(|c| c.name)
            .collect();
        let mut tensors = Vec::new();
        for name in due {
            match self.tensors_for(name, booster, evals_log) {
                Some(mut collected) => tensors.append(&mut collected),
                None => {
                    if self.warned.insert(name) {
                        warn!("skipping collection '{}': no data to compute it from", name);
                    }
                }
            }
        }
        tensors
    }

    fn tensors_for(
        &mut self,
        name: CollectionName,
        booster: &Booster,
        evals_log: &EvaluationLog,
    ) -> Option<Vec<TensorRecord>> {
        match name {
            CollectionName::Hyperparameters => {
                if self.hyperparameters_saved {
                    return Some(Vec::new());
                }
                self.hyperparameters_saved = true;
                Some(
                    booster
                        .params()
                        .hyperparameters()
                        .into_iter()
                        .map(|(param, value)| TensorRecord::scalar(format!("hyperparameters/{}", param), name, value))
                        .collect(),
                )
            }
            CollectionName::Metrics => {
                if evals_log.is_empty() {
                    return None;
                }
                Some(
                    evals_log
                        .latest()
                        .into_iter()
                        .map(|(metric, value)| TensorRecord::scalar(metric, name, value))
                        .collect(),
                )
            }
            CollectionName::Predictions => {
                let data = self.validation_data.or(self.train_data)?;
                Some(vec![TensorRecord::vector("predictions", name, booster.predict(data))])
            }
            CollectionName::Labels => {
                let data = self.validation_data.or(self.train_data)?;
                Some(vec![TensorRecord::vector("labels", name, data.labels().to_vec())])
            }
            CollectionName::FeatureImportance => {
                let mut tensors = Vec::new();
                for importance_type in ImportanceType::iter() {
                    for (feature, value) in booster.feature_importance(importance_type) {
                        tensors.push(TensorRecord::scalar(
                            format!("feature_importance/{}/{}", importance_type, feature),
                            name,
                            value,
                        ));
                    }
                }
                Some(tensors)
            }
            CollectionName::AverageShap => {
                let data = self.train_data?;
                let shap = booster.shap_values(data);
                let num_rows = shap.len().max(1) as f64;
                Some(
                    shap_column_names(booster.num_features())
                        .into_iter()
                        .enumerate()
                        .map(|(col, column_name)| {
                            let mean_abs = shap.iter().map(|row| row[col].abs()).sum::<f64>() / num_rows;
                            TensorRecord::scalar(format!("average_shap/{}", column_name), name, mean_abs)
                        })
                        .collect(),
                )
            }
            CollectionName::FullShap => {
                let data = self.train_data?;
                let shap = booster.shap_values(data);
                Some(
                    shap_column_names(booster.num_features())
                        .into_iter()
                        .enumerate()
                        .map(|(col, column_name)| {
                            let values = shap.iter().map(|row| row[col]).collect();
                            TensorRecord::vector(format!("full_shap/{}", column_name), name, values)
                        })
                        .collect(),
                )
            }
            CollectionName::Trees => {
                let table = booster.trees_table();
                Some(
                    table
                        .columns()
                        .into_iter()
                        .map(|(column, values)| TensorRecord::vector(format!("trees/{}", column), name, values.to_vec()))
                        .collect(),
                )
            }
        }
    }
}

/// `f0..f{n-1}` followed by `bias`
fn shap_column_names(num_features: usize) -> Vec<String> {
    (0..num_features)
        .map(|f| format!("f{}", f))
        .chain(std::iter::once("bias".to_string()))
        .collect()
}

impl TrainingCallback for Hook<'_> {
    fn before_training(&mut self, _booster: &Booster) -> Result<(), CallbackError> {
        self.writer
            .write_collections(&self.save_config, &self.collections)
            .map_err(|e| CallbackError::new(CALLBACK_NAME, e))
    }

    fn after_iteration(
        &mut self,
        booster: &Booster,
        iteration: usize,
        evals_log: &EvaluationLog,
    ) -> Result<CallbackAction, CallbackError> {
        let tensors = self.collect_tensors(booster, iteration, evals_log);
        if tensors.is_empty() {
            return Ok(CallbackAction::Continue);
        }
        debug!("saving {} tensors at step {}", tensors.len(), iteration);
        self.writer
            .write_step(iteration, tensors)
            .map_err(|e| CallbackError::new(CALLBACK_NAME, e))?;
        self.saved_steps.push(iteration);
        Ok(CallbackAction::Continue)
    }

    fn after_training(&mut self, _booster: &Booster) -> Result<(), CallbackError> {
        self.writer
            .write_end_of_job()
            .map_err(|e| CallbackError::new(CALLBACK_NAME, e))
    }
}
