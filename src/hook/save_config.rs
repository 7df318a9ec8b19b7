use serde::{Deserialize, Serialize};

use super::HookError;

/// Decides at which steps tensors are saved.
///
/// A step is saved if it is listed in `save_steps`, or if it falls within `[start_step, end_step)` and is a multiple of the interval
/// (counted from `start_step`). Without a `save_interval`, the interval is 1 unless `save_steps` is given, in which case only those
/// steps are saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// save every `save_interval`th step
    pub save_interval: Option<usize>,
    /// the first step eligible for interval saving
    pub start_step: usize,
    /// one past the last step eligible for interval saving. `None` for no limit
    pub end_step: Option<usize>,
    /// steps that are always saved
    pub save_steps: Vec<usize>,
}

impl SaveConfig {
    /// save every `save_interval`th step from step 0
    pub fn every(save_interval: usize) -> Self {
        SaveConfig {
            save_interval: Some(save_interval),
            ..Default::default()
        }
    }

    /// save only the listed steps
    pub fn at_steps(save_steps: Vec<usize>) -> Self {
        SaveConfig {
            save_steps,
            ..Default::default()
        }
    }

    /// the interval in effect, or `None` if only `save_steps` are saved
    pub fn interval(&self) -> Option<usize> {
        match self.save_interval {
            Some(interval) => Some(interval),
            None if self.save_steps.is_empty() => Some(1),
            None => None,
        }
    }

    /// Check that the configuration can select at least one step
    ///
    /// # Errors
    /// returns [`HookError::ZeroSaveInterval`] or [`HookError::EmptyStepRange`]
    pub fn validate(&self) -> Result<(), HookError> {
        if self.save_interval == Some(0) {
            return Err(HookError::ZeroSaveInterval);
        }
        if let Some(end_step) = self.end_step {
            if end_step <= self.start_step && self.save_steps.is_empty() {
                return Err(HookError::EmptyStepRange {
                    start_step: self.start_step,
                    end_step,
                });
            }
        }
        Ok(())
    }

    /// whether tensors should be saved at `step`
    pub fn should_save(&self, step: usize) -> bool {
        if self.save_steps.contains(&step) {
            return true;
        }
        if step < self.start_step || self.end_step.is_some_and(|end| step >= end) {
            return false;
        }
        match self.interval() {
            Some(interval) => interval > 0 && (step - self.start_step) % interval == 0,
            None => false,
        }
    }
}

impl Default for SaveConfig {
    /// every step from 0, without limit
    fn default() -> Self {
        SaveConfig {
            save_interval: None,
            start_step: 0,
            end_step: None,
            save_steps: Vec::new(),
        }
    }
}
