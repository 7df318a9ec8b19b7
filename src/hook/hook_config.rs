use std::{fs, path::Path, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use super::{Collection, HookError, SaveConfig, TensorFormat};

/// A named collection in a hook configuration file, optionally with its own schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// a [`CollectionName`](super::CollectionName), e.g. `feature_importance`
    pub name: String,
    /// overrides the hook-wide schedule
    #[serde(default)]
    pub save_config: Option<SaveConfig>,
}

/// Hook settings loaded from a JSON file:
/// ```json
/// {
///     "out_dir": "/tmp/tensors",
///     "save_config": { "save_interval": 5 },
///     "collections": [
///         { "name": "metrics" },
///         { "name": "trees", "save_config": { "save_steps": [49] } }
///     ],
///     "tensor_format": "cbor"
/// }
/// ```
/// Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookConfig {
    /// where tensors are written
    pub out_dir: Option<PathBuf>,
    /// the hook-wide schedule
    pub save_config: Option<SaveConfig>,
    /// the collections to save
    pub collections: Vec<CollectionConfig>,
    /// encoding of event files
    pub tensor_format: Option<TensorFormat>,
}

impl HookConfig {
    /// Read a configuration file
    ///
    /// # Errors
    /// returns [`HookError::Config`] if the file can't be read or isn't a valid configuration
    pub fn from_path(path: &Path) -> Result<Self, HookError> {
        let text = fs::read_to_string(path).map_err(|e| HookError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| HookError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Resolve the configured collections, keeping each one's schedule. Duplicate names keep their first entry.
    ///
    /// # Errors
    /// returns [`HookError::UnknownCollection`] for an unrecognized name, or an invalid per-collection schedule's error
    pub fn collections(&self) -> Result<Vec<Collection>, HookError> {
        let mut collections: Vec<Collection> = Vec::new();
        for config in self.collections.iter() {
            let mut collection = Collection::from_str(&config.name)?;
            if let Some(save_config) = &config.save_config {
                save_config.validate()?;
                collection.save_config = Some(save_config.clone());
            }
            if !collections.iter().any(|c| c.name == collection.name) {
                collections.push(collection);
            }
        }
        Ok(collections)
    }
}
