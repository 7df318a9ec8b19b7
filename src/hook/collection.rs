use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use super::{HookError, SaveConfig};

/// A named group of tensors the hook knows how to capture
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CollectionName {
    /// the numeric training parameters, saved once
    Hyperparameters,
    /// the latest value of every eval metric
    Metrics,
    /// predictions on the validation set (or the training set if there is none)
    Predictions,
    /// labels of the same rows as `predictions`
    Labels,
    /// per-feature importance of every importance type
    FeatureImportance,
    /// mean absolute SHAP value per feature over the training set
    AverageShap,
    /// per-row SHAP values per feature over the training set
    FullShap,
    /// the flattened node table of every tree
    Trees,
}

/// the collections saved when none are requested
pub const DEFAULT_COLLECTIONS: &[CollectionName] = &[CollectionName::Metrics];

/// A collection selected for saving, optionally with its own schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    /// which tensors
    pub name: CollectionName,
    /// overrides the hook's schedule for this collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_config: Option<SaveConfig>,
}

impl Collection {
    /// a collection on the hook's schedule
    pub fn new(name: CollectionName) -> Self {
        Collection {
            name,
            save_config: None,
        }
    }

    /// this collection's schedule, falling back to `default`
    pub fn save_config<'a>(&'a self, default: &'a SaveConfig) -> &'a SaveConfig {
        self.save_config.as_ref().unwrap_or(default)
    }
}

impl FromStr for Collection {
    type Err = HookError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        CollectionName::from_str(name.trim())
            .map(Collection::new)
            .map_err(|_| HookError::UnknownCollection {
                name: name.trim().to_string(),
                valid: CollectionName::iter().map(|c| c.to_string()).collect(),
            })
    }
}

/// Parse requested collection names, e.g. `["metrics", "feature_importance"]`.
///
/// Blank names are ignored and duplicates are kept once. An empty request selects [`DEFAULT_COLLECTIONS`].
///
/// # Errors
/// returns [`HookError::UnknownCollection`] for the first name that isn't a [`CollectionName`]
pub fn parse_collections<S: AsRef<str>>(names: &[S]) -> Result<Vec<Collection>, HookError> {
    let mut collections: Vec<Collection> = Vec::new();
    for name in names.iter().map(|n| n.as_ref()).filter(|n| !n.trim().is_empty()) {
        let collection = Collection::from_str(name)?;
        if !collections.iter().any(|c| c.name == collection.name) {
            collections.push(collection);
        }
    }
    if collections.is_empty() {
        collections = DEFAULT_COLLECTIONS.iter().copied().map(Collection::new).collect();
    }
    Ok(collections)
}
