use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Errors from loading data.
pub mod dataset_error;
pub use dataset_error::DatasetError;

/// A dense in-memory feature matrix with one label per row.
///
/// Absent features are stored as NaN and follow each split's default direction during training and prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMatrix {
    features: DMatrix<f64>,
    labels: Vec<f64>,
}

/// A single parsed LIBSVM record: a label and its `(column, value)` pairs
#[derive(Debug, Clone, PartialEq)]
pub struct SparseRecord {
    /// the target value of the record
    pub label: f64,
    /// `(column, value)` pairs, in the order they appeared
    pub entries: Vec<(usize, f64)>,
}

impl DataMatrix {
    /// Build a matrix from dense rows. Use `f64::NAN` to mark a missing value.
    ///
    /// # Panics
    /// panics if the rows differ in length or `labels.len() != rows.len()`
    pub fn from_dense(rows: &[Vec<f64>], labels: Vec<f64>) -> Self {
        assert_eq!(rows.len(), labels.len(), "one label is required per row");
        let num_features = rows.first().map_or(0, |row| row.len());
        assert!(
            rows.iter().all(|row| row.len() == num_features),
            "all rows must have the same number of features"
        );
        let features = DMatrix::from_fn(rows.len(), num_features, |r, c| rows[r][c]);
        DataMatrix { features, labels }
    }

    /// Build a matrix from sparse records. The matrix is as wide as the largest column index + 1.
    ///
    /// # Errors
    /// returns a [`DatasetError`] if a column index is above [`MAX_FEATURE_INDEX`]
    pub fn from_records(records: &[SparseRecord]) -> Result<Self, DatasetError> {
        let mut num_features = 0;
        for record in records.iter() {
            for &(col, _) in record.entries.iter() {
                let width = match col.checked_add(1) {
                    Some(width) if col <= MAX_FEATURE_INDEX => width,
                    _ => return Err(DatasetError::too_wide(col)),
                };
                num_features = num_features.max(width);
            }
        }
        let mut features = DMatrix::from_element(records.len(), num_features, f64::NAN);
        for (row, record) in records.iter().enumerate() {
            for &(col, value) in record.entries.iter() {
                features[(row, col)] = value;
            }
        }
        let labels = records.iter().map(|record| record.label).collect();
        Ok(DataMatrix { features, labels })
    }

    /// Parse LIBSVM-formatted text, one record per line.
    ///
    /// # Errors
    /// returns a [`DatasetError`] if a line is malformed or the text holds no records
    pub fn from_libsvm_str(text: &str) -> Result<Self, DatasetError> {
        let records = parse_libsvm_records(text)?;
        if records.is_empty() {
            return Err(DatasetError::empty());
        }
        DataMatrix::from_records(&records)
    }

    /// Load a LIBSVM file. If `path` is a directory, every regular file in it is loaded in name order and the records concatenated.
    ///
    /// # Errors
    /// returns a [`DatasetError`] naming the offending file if one can't be read or parsed, or if no file holds a record
    pub fn from_libsvm_path(path: &Path) -> Result<Self, DatasetError> {
        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|e| DatasetError::io(e, path))?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|file| file.is_file())
                .collect();
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };
        debug!("loading LIBSVM data from {:?}", files);

        let mut records = Vec::new();
        for file in files.iter() {
            let contents = fs::read_to_string(file).map_err(|e| DatasetError::io(e, file))?;
            let mut file_records = parse_libsvm_records(&contents).map_err(|e| e.with_path(file))?;
            records.append(&mut file_records);
        }
        if records.is_empty() {
            return Err(DatasetError::empty().with_path(path));
        }
        DataMatrix::from_records(&records).map_err(|e| e.with_path(path))
    }

    /// the number of rows (records) in the matrix
    pub fn num_rows(&self) -> usize {
        self.features.nrows()
    }

    /// the number of feature columns in the matrix
    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    /// the labels, one per row
    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    /// The value of `feature` in `row`. Columns beyond the matrix width read as missing.
    #[inline]
    pub fn value(&self, row: usize, feature: usize) -> f64 {
        if feature < self.features.ncols() {
            self.features[(row, feature)]
        } else {
            f64::NAN
        }
    }

    /// a copy of a single row
    pub fn row(&self, row: usize) -> Vec<f64> {
        (0..self.num_features())
            .map(|feature| self.features[(row, feature)])
            .collect()
    }

    /// Widen the matrix to `num_features` columns, filling new columns with missing values.
    /// Narrower targets leave the matrix unchanged.
    pub fn pad_features(&mut self, num_features: usize) {
        if num_features > self.num_features() {
            trace!("padding matrix from {} to {} features", self.num_features(), num_features);
            let features = std::mem::replace(&mut self.features, DMatrix::zeros(0, 0));
            self.features = features.resize_horizontally(num_features, f64::NAN);
        }
    }
}

/// the largest column index accepted, since rows are stored densely
pub const MAX_FEATURE_INDEX: usize = 65_535;

/// every record of `text`, with parse errors numbered by line
fn parse_libsvm_records(text: &str) -> Result<Vec<SparseRecord>, DatasetError> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if let Some(record) = parse_libsvm_line(line).map_err(|reason| DatasetError::parse(idx + 1, reason))? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Parse one LIBSVM line of the form `label idx:value idx:value ...`.
///
/// Returns `Ok(None)` for blank lines and `#` comments. Anything after a `#` is ignored, as are `qid:` tokens.
pub fn parse_libsvm_line(line: &str) -> Result<Option<SparseRecord>, String> {
    let content = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let mut tokens = content.split_whitespace();
    let Some(label_token) = tokens.next() else {
        return Ok(None);
    };
    let label: f64 = label_token
        .parse()
        .map_err(|_| format!("invalid label '{}'", label_token))?;

    let mut entries = Vec::new();
    for token in tokens {
        let (index, value) = token
            .split_once(':')
            .ok_or_else(|| format!("expected 'index:value', found '{}'", token))?;
        if index == "qid" {
            continue;
        }
        let index: usize = index
            .parse()
            .map_err(|_| format!("invalid feature index '{}'", index))?;
        if index > MAX_FEATURE_INDEX {
            return Err(format!(
                "feature index {} is above the maximum of {}",
                index, MAX_FEATURE_INDEX
            ));
        }
        let value: f64 = value
            .parse()
            .map_err(|_| format!("invalid feature value '{}'", value))?;
        entries.push((index, value));
    }
    Ok(Some(SparseRecord { label, entries }))
}
