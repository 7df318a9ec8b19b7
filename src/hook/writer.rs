//! On-disk layout of a hook run:
//! ```text
//! <out_dir>/
//!     collections/000000000/worker_0_collections.json
//!     events/000000000003/000000000003_worker_0.json    (or .cbor)
//!     index/000000000/000000000003_worker_0.json
//!     training_job_end.ts
//! ```
//! One event file per saved step holds every tensor of that step. The index file of a step lists its tensors without their values.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{collection::CollectionName, Collection, HookError, SaveConfig};

/// the only worker a single-process run has
pub const WORKER_NAME: &str = "worker_0";
/// the mode every training step is recorded under
pub const TRAIN_MODE: &str = "TRAIN";
/// file written when training finishes
pub const END_OF_JOB_FILE: &str = "training_job_end.ts";
const STEPS_PER_INDEX_DIR: usize = 1000;

/// Encoding of event files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TensorFormat {
    /// human-readable JSON. Non-finite values are written as `null`
    #[default]
    Json,
    /// compact binary CBOR
    Cbor,
}

impl TensorFormat {
    /// the file extension of event files in this format
    pub fn extension(&self) -> &'static str {
        match self {
            TensorFormat::Json => "json",
            TensorFormat::Cbor => "cbor",
        }
    }
}

/// A single named tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    /// e.g. `validation-rmse` or `feature_importance/gain/f3`
    pub name: String,
    /// the collection that produced the tensor
    pub collection: CollectionName,
    /// dimensions of `values`, row-major. Empty for a scalar
    pub shape: Vec<usize>,
    /// the flattened values
    #[serde(with = "nullable_floats")]
    pub values: Vec<f64>,
}

impl TensorRecord {
    /// a tensor holding a single value
    pub fn scalar(name: impl Into<String>, collection: CollectionName, value: f64) -> Self {
        TensorRecord {
            name: name.into(),
            collection,
            shape: Vec::new(),
            values: vec![value],
        }
    }

    /// a 1-dimensional tensor
    pub fn vector(name: impl Into<String>, collection: CollectionName, values: Vec<f64>) -> Self {
        TensorRecord {
            name: name.into(),
            collection,
            shape: vec![values.len()],
            values,
        }
    }
}

/// Every tensor saved at one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    /// the 0-indexed boosting round
    pub step: usize,
    /// always [`TRAIN_MODE`]
    pub mode: String,
    /// always [`WORKER_NAME`]
    pub worker: String,
    /// seconds since the unix epoch when the event was written
    pub wall_time: f64,
    /// the tensors, in collection order
    pub tensors: Vec<TensorRecord>,
}

impl StepEvent {
    /// the tensor named `name`, if it was saved at this step
    pub fn tensor(&self, name: &str) -> Option<&TensorRecord> {
        self.tensors.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    name: String,
    collection: CollectionName,
    shape: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepIndex {
    step: usize,
    mode: String,
    event_file: String,
    tensors: Vec<IndexEntry>,
}

#[derive(Debug, Serialize)]
struct CollectionsManifest<'a> {
    save_config: &'a SaveConfig,
    collections: &'a [Collection],
}

/// Writes step events under an output directory
#[derive(Debug)]
pub struct EventWriter {
    out_dir: PathBuf,
    format: TensorFormat,
}

impl EventWriter {
    /// Prepare `out_dir` for a new run, creating it if needed.
    ///
    /// # Errors
    /// * [`HookError::RemoteOutput`] if `out_dir` is a URI such as `s3://bucket/prefix`
    /// * [`HookError::OutputNotEmpty`] if `out_dir` exists and holds anything
    /// * [`HookError::Io`] if the directory can't be read or created
    pub fn create(out_dir: &Path, format: TensorFormat) -> Result<Self, HookError> {
        let as_text = out_dir.to_string_lossy();
        if as_text.contains("://") {
            return Err(HookError::RemoteOutput(as_text.into_owned()));
        }
        if out_dir.exists() {
            let mut entries = fs::read_dir(out_dir).map_err(|e| HookError::io(out_dir, e))?;
            if entries.next().is_some() {
                return Err(HookError::OutputNotEmpty(out_dir.to_path_buf()));
            }
        }
        fs::create_dir_all(out_dir).map_err(|e| HookError::io(out_dir, e))?;
        debug!("writing {} tensors to {}", format, out_dir.display());
        Ok(EventWriter {
            out_dir: out_dir.to_path_buf(),
            format,
        })
    }

    /// the directory being written
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// the encoding of event files
    pub fn format(&self) -> TensorFormat {
        self.format
    }

    /// path of the event file for `step`, relative to the output directory
    pub fn event_file(&self, step: usize) -> PathBuf {
        Path::new("events")
            .join(format!("{:012}", step))
            .join(format!("{:012}_{}.{}", step, WORKER_NAME, self.format.extension()))
    }

    /// path of the index file for `step`, relative to the output directory
    pub fn index_file(step: usize) -> PathBuf {
        Path::new("index")
            .join(format!("{:09}", step / STEPS_PER_INDEX_DIR))
            .join(format!("{:012}_{}.json", step, WORKER_NAME))
    }

    /// path of the collections manifest, relative to the output directory
    pub fn collections_file() -> PathBuf {
        Path::new("collections")
            .join("000000000")
            .join(format!("{}_collections.json", WORKER_NAME))
    }

    /// record which collections are saved, and on what schedule
    pub fn write_collections(&self, save_config: &SaveConfig, collections: &[Collection]) -> Result<(), HookError> {
        let manifest = CollectionsManifest {
            save_config,
            collections,
        };
        let path = self.out_dir.join(Self::collections_file());
        let mut file = self.create_file(&path)?;
        serde_json::to_writer_pretty(&mut file, &manifest).map_err(|e| HookError::Encode(e.to_string()))?;
        file.flush().map_err(|e| HookError::io(&path, e))
    }

    /// write the event and index files of one step
    pub fn write_step(&self, step: usize, tensors: Vec<TensorRecord>) -> Result<(), HookError> {
        let event_file = self.event_file(step);
        let index = StepIndex {
            step,
            mode: TRAIN_MODE.to_string(),
            event_file: event_file.to_string_lossy().into_owned(),
            tensors: tensors
                .iter()
                .map(|t| IndexEntry {
                    name: t.name.clone(),
                    collection: t.collection,
                    shape: t.shape.clone(),
                })
                .collect(),
        };
        let event = StepEvent {
            step,
            mode: TRAIN_MODE.to_string(),
            worker: WORKER_NAME.to_string(),
            wall_time: chrono::Utc::now().timestamp_micros() as f64 / 1e6,
            tensors,
        };

        let path = self.out_dir.join(&event_file);
        let mut file = self.create_file(&path)?;
        match self.format {
            TensorFormat::Json => serde_json::to_writer(&mut file, &event).map_err(|e| HookError::Encode(e.to_string()))?,
            TensorFormat::Cbor => ciborium::into_writer(&event, &mut file).map_err(|e| HookError::Encode(e.to_string()))?,
        }
        file.flush().map_err(|e| HookError::io(&path, e))?;

        let index_path = self.out_dir.join(Self::index_file(step));
        let mut index_file = self.create_file(&index_path)?;
        serde_json::to_writer(&mut index_file, &index).map_err(|e| HookError::Encode(e.to_string()))?;
        index_file.flush().map_err(|e| HookError::io(&index_path, e))?;
        debug!("step {}: wrote {} tensors to {}", step, event.tensors.len(), path.display());
        Ok(())
    }

    /// mark the run as finished
    pub fn write_end_of_job(&self) -> Result<(), HookError> {
        let path = self.out_dir.join(END_OF_JOB_FILE);
        File::create(&path).map(|_| ()).map_err(|e| HookError::io(&path, e))
    }

    fn create_file(&self, path: &Path) -> Result<BufWriter<File>, HookError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HookError::io(parent, e))?;
        }
        File::create(path)
            .map(BufWriter::new)
            .map_err(|e| HookError::io(path, e))
    }
}

/// Read back an event file written by [`EventWriter::write_step`], choosing the decoder by extension
pub fn read_step_event(path: &Path) -> Result<StepEvent, HookError> {
    let file = File::open(path).map_err(|e| HookError::io(path, e))?;
    let reader = std::io::BufReader::new(file);
    match path.extension().and_then(|e| e.to_str()) {
        Some("cbor") => ciborium::from_reader(reader).map_err(|e| HookError::Encode(e.to_string())),
        _ => serde_json::from_reader(reader).map_err(|e| HookError::Encode(e.to_string())),
    }
}

/// JSON has no NaN, so non-finite values are written as `null` and read back as NaN
mod nullable_floats {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let nullable: Vec<Option<f64>> = values
            .iter()
            .map(|v| v.is_finite().then_some(*v))
            .collect();
        nullable.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let nullable = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(nullable.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}
