use std::{fmt, io, path::PathBuf};

/// An error encountered while loading a [`DataMatrix`](crate::dataset::DataMatrix)
///
/// Displaying the error shows the file (if any) and line at which loading failed
#[derive(Debug)]
pub struct DatasetError {
    error_kind: DatasetErrorType,
    /// the file being read when the error occurred, if the data came from a file
    path: Option<PathBuf>,
}

#[derive(Debug)]
enum DatasetErrorType {
    Io(io::Error),
    Parse { line: usize, reason: String },
    Empty,
    TooWide { index: usize },
}

impl DatasetError {
    pub(crate) fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Self {
            error_kind: DatasetErrorType::Io(source),
            path: Some(path.into()),
        }
    }

    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        Self {
            error_kind: DatasetErrorType::Parse {
                line,
                reason: reason.into(),
            },
            path: None,
        }
    }

    pub(crate) fn too_wide(index: usize) -> Self {
        Self {
            error_kind: DatasetErrorType::TooWide { index },
            path: None,
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            error_kind: DatasetErrorType::Empty,
            path: None,
        }
    }

    /// attach the path of the file being read, unless a path is already recorded
    pub(crate) fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// the one-indexed line at which parsing failed, if this is a parse error
    pub fn line(&self) -> Option<usize> {
        match &self.error_kind {
            DatasetErrorType::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// true if the input contained no records
    pub fn is_empty_input(&self) -> bool {
        matches!(self.error_kind, DatasetErrorType::Empty)
    }
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: ", path.display())?;
        }
        match &self.error_kind {
            DatasetErrorType::Io(e) => write!(f, "unable to read data: {}", e),
            DatasetErrorType::Parse { line, reason } => {
                write!(f, "malformed record on line {}: {}", line, reason)
            }
            DatasetErrorType::Empty => write!(f, "no records found"),
            DatasetErrorType::TooWide { index } => write!(
                f,
                "feature index {} is above the maximum of {}",
                index,
                super::MAX_FEATURE_INDEX
            ),
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.error_kind {
            DatasetErrorType::Io(e) => Some(e),
            _ => None,
        }
    }
}
