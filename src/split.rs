use std::{
    fmt,
    io::{self, BufWriter, Write},
    path::Path,
};

use bitvec::vec::BitVec;
use log::debug;
use rand::{rngs::StdRng, SeedableRng};
use shuffle::{fy, shuffler::Shuffler};
use tempfile::NamedTempFile;

/// The seed used when the caller does not supply one
pub const DEFAULT_SEED: u64 = 42;
/// The fraction of records assigned to the training set when the caller does not supply one
pub const DEFAULT_TRAIN_SPLIT: f64 = 0.8;

/// Errors that can occur while splitting records into training and validation sets
#[derive(Debug)]
pub enum SplitError {
    /// the requested train fraction was not in (0, 1]
    InvalidFraction(f64),
    /// the index shuffle reported a failure
    Shuffle(String),
    /// writing a split file failed
    Io(io::Error),
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SplitError::InvalidFraction(value) => {
                write!(f, "'train_split' must be between 0 and 1, got {}", value)
            }
            SplitError::Shuffle(reason) => write!(f, "unable to shuffle records: {}", reason),
            SplitError::Io(e) => write!(f, "unable to write split file: {}", e),
        }
    }
}

impl std::error::Error for SplitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SplitError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SplitError {
    fn from(e: io::Error) -> Self {
        SplitError::Io(e)
    }
}

/// Check that `train_split` lies in (0, 1]
pub fn validate_train_split(train_split: f64) -> Result<(), SplitError> {
    // written so that NaN fails too
    if train_split > 0.0 && train_split <= 1.0 {
        Ok(())
    } else {
        Err(SplitError::InvalidFraction(train_split))
    }
}

/// Randomly partition `records` into `(train, validation)`.
///
/// The indices `0..N` are shuffled with a generator seeded by `seed`, and the first `floor(train_split * N)` shuffled indices go to the training set.
/// Both returned sets keep the records' original relative order. The same `seed` always produces the same assignment.
///
/// # Errors
/// returns [`SplitError::InvalidFraction`] if `train_split` is not in (0, 1]
pub fn train_validation_split<T>(
    records: Vec<T>,
    train_split: f64,
    seed: u64,
) -> Result<(Vec<T>, Vec<T>), SplitError> {
    validate_train_split(train_split)?;
    let train_mask = train_mask(records.len(), train_split, seed)?;

    let num_train = train_mask.count_ones();
    let mut train = Vec::with_capacity(num_train);
    let mut validation = Vec::with_capacity(records.len() - num_train);
    for (record, is_train) in records.into_iter().zip(train_mask.iter().by_vals()) {
        if is_train {
            train.push(record);
        } else {
            validation.push(record);
        }
    }
    debug!(
        "split {} records into {} train and {} validation",
        train.len() + validation.len(),
        train.len(),
        validation.len()
    );
    Ok((train, validation))
}

/// one bit per record, set if the record belongs to the training set
fn train_mask(num_records: usize, train_split: f64, seed: u64) -> Result<BitVec, SplitError> {
    let mut indices: Vec<usize> = (0..num_records).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    fy::FisherYates::default()
        .shuffle(&mut indices, &mut rng)
        .map_err(|e| SplitError::Shuffle(e.to_string()))?;

    let num_train = (num_records as f64 * train_split).floor() as usize;
    let mut mask = BitVec::repeat(false, num_records);
    for &idx in indices[..num_train].iter() {
        mask.set(idx, true);
    }
    Ok(mask)
}

/// A pair of temporary files holding the training and validation lines of a split.
///
/// Both files are deleted when this value is dropped.
#[derive(Debug)]
pub struct SplitFiles {
    train: NamedTempFile,
    validation: NamedTempFile,
    train_lines: usize,
    validation_lines: usize,
}

impl SplitFiles {
    /// Split `lines` with [`train_validation_split`] and write each side to its own temporary file, one `\n`-terminated line per record.
    pub fn write(lines: Vec<String>, train_split: f64, seed: u64) -> Result<Self, SplitError> {
        let (train_lines, validation_lines) = train_validation_split(lines, train_split, seed)?;
        let train = write_lines(&train_lines, "boostscope-train-")?;
        let validation = write_lines(&validation_lines, "boostscope-validation-")?;
        Ok(SplitFiles {
            train,
            validation,
            train_lines: train_lines.len(),
            validation_lines: validation_lines.len(),
        })
    }

    /// path of the training file
    pub fn train_path(&self) -> &Path {
        self.train.path()
    }

    /// path of the validation file
    pub fn validation_path(&self) -> &Path {
        self.validation.path()
    }

    /// `(train, validation)` line counts
    pub fn line_counts(&self) -> (usize, usize) {
        (self.train_lines, self.validation_lines)
    }
}

fn write_lines(lines: &[String], prefix: &str) -> Result<NamedTempFile, SplitError> {
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".libsvm")
        .tempfile()?;
    {
        let mut writer = BufWriter::new(file.as_file());
        for line in lines {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    Ok(file)
}
