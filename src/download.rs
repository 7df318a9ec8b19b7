//! Fetching the public abalone regression dataset.

use std::{fmt, io::Read, sync::OnceLock, time::Duration};

use log::info;

use crate::split::{validate_train_split, SplitError, SplitFiles};

/// Source of the LIBSVM-formatted abalone regression dataset
pub const ABALONE_URL: &str =
    "https://www.csie.ntu.edu.tw/~cjlin/libsvmtools/datasets/regression/abalone";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

/// Errors that can occur while downloading and splitting a dataset
#[derive(Debug)]
pub enum DownloadError {
    /// the server answered with a non-success status
    Status {
        /// the requested url
        url: String,
        /// the HTTP status code
        status: u16,
    },
    /// the request could not be completed
    Transport {
        /// the requested url
        url: String,
        /// description of the failure
        reason: String,
    },
    /// the response body could not be read or was not UTF-8
    Body {
        /// the requested url
        url: String,
        /// description of the failure
        reason: String,
    },
    /// splitting or writing the downloaded records failed
    Split(SplitError),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DownloadError::Status { url, status } => {
                write!(f, "failed to download {}: HTTP {}", url, status)
            }
            DownloadError::Transport { url, reason } => {
                write!(f, "failed to download {}: {}", url, reason)
            }
            DownloadError::Body { url, reason } => {
                write!(f, "unable to read response from {}: {}", url, reason)
            }
            DownloadError::Split(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DownloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DownloadError::Split(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SplitError> for DownloadError {
    fn from(e: SplitError) -> Self {
        DownloadError::Split(e)
    }
}

fn agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build()
    })
}

/// Download `url` and return its body as lines, with surrounding whitespace trimmed.
pub fn fetch_lines(url: &str) -> Result<Vec<String>, DownloadError> {
    info!("downloading dataset from {}", url);
    let response = match agent().get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(status, _)) => {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status,
            })
        }
        Err(e) => {
            return Err(DownloadError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })
        }
    };

    let mut body = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut body)
        .map_err(|e| DownloadError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    let text = String::from_utf8(body).map_err(|e| DownloadError::Body {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(split_body(&text))
}

fn split_body(text: &str) -> Vec<String> {
    text.trim().split('\n').map(str::to_string).collect()
}

/// Download a LIBSVM dataset from `url` and split it into temporary training and validation files.
///
/// `train_split` is validated before any network traffic happens.
pub fn load_libsvm_dataset(url: &str, train_split: f64, seed: u64) -> Result<SplitFiles, DownloadError> {
    validate_train_split(train_split)?;
    let lines = fetch_lines(url)?;
    let files = SplitFiles::write(lines, train_split, seed)?;
    let (train, validation) = files.line_counts();
    info!("dataset split into {} training and {} validation records", train, validation);
    Ok(files)
}

/// Download the abalone dataset and split it into temporary training and validation files
pub fn load_abalone(train_split: f64, seed: u64) -> Result<SplitFiles, DownloadError> {
    load_libsvm_dataset(ABALONE_URL, train_split, seed)
}
