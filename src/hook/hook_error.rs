//! The error type of the [hook](crate::hook) module.

use std::{fmt, io, path::PathBuf};

/// Errors raised while configuring the debug hook or writing its output
#[derive(Debug)]
pub enum HookError {
    /// the output location is a remote URI (e.g. `s3://bucket/prefix`); only local directories are written
    RemoteOutput(String),
    /// the output directory already holds files from another run
    OutputNotEmpty(PathBuf),
    /// a save interval of 0 would never save
    ZeroSaveInterval,
    /// `start_step` is not before `end_step`
    EmptyStepRange {
        /// the first step to save
        start_step: usize,
        /// one past the last step to save
        end_step: usize,
    },
    /// a requested collection name is not one the hook knows
    UnknownCollection {
        /// the name as given
        name: String,
        /// every accepted name
        valid: Vec<String>,
    },
    /// the hook configuration file could not be read or parsed
    Config {
        /// the file
        path: PathBuf,
        /// what went wrong
        reason: String,
    },
    /// a tensor event could not be encoded
    Encode(String),
    /// a file under the output directory could not be written
    Io {
        /// the file or directory being written
        path: PathBuf,
        /// the underlying failure
        source: io::Error,
    },
}

impl HookError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        HookError::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HookError::RemoteOutput(uri) => write!(
                f,
                "cannot write tensors to '{}': only local output directories are supported",
                uri
            ),
            HookError::OutputNotEmpty(path) => write!(
                f,
                "output directory {} is not empty; tensors from a previous run would be mixed with this one",
                path.display()
            ),
            HookError::ZeroSaveInterval => write!(f, "save_interval must be at least 1"),
            HookError::EmptyStepRange {
                start_step,
                end_step,
            } => write!(
                f,
                "start_step {} must be less than end_step {}",
                start_step, end_step
            ),
            HookError::UnknownCollection { name, valid } => write!(
                f,
                "unknown collection '{}', expected one of: {}",
                name,
                valid.join(", ")
            ),
            HookError::Config { path, reason } => {
                write!(f, "invalid hook config {}: {}", path.display(), reason)
            }
            HookError::Encode(reason) => write!(f, "failed to encode tensors: {}", reason),
            HookError::Io { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HookError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
