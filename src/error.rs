use std::{
    error::Error,
    fmt::{Display, Formatter},
};

/// Result type used throughout the library.
pub type SatFlashResult<T> = Result<T, SatFlashError>;

/// Everything that can go wrong in the pipeline.
///
/// The two `*Unavailable` variants are transient and worth retrying by whoever scheduled the
/// run. The others are caller errors or unreadable input. Data-quality defects inside otherwise
/// readable files (orphaned groups and events, non-finite values) are never reported through this
/// type, they are counted by the stage that finds them.
#[derive(Debug, Clone, PartialEq)]
pub enum SatFlashError {
    /// A file needed for a time window could not be retrieved.
    SourceUnavailable { key: String, reason: String },
    /// The record store could not be reached or refused a write.
    StoreUnavailable(String),
    /// The requested number of clusters is not usable for this many points.
    InvalidK { k: usize, points: usize },
    /// Fewer than two distinct cluster counts were offered for evaluation.
    EmptyKRange(usize),
    /// A time window with `start >= end`, or a time that could not be parsed.
    InvalidWindow(String),
    /// The bytes of a source file could not be decoded.
    MalformedSource { file: String, reason: String },
}

impl SatFlashError {
    /// Is this a transient failure the caller may retry?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SatFlashError::SourceUnavailable { .. } | SatFlashError::StoreUnavailable(_)
        )
    }

    pub(crate) fn malformed<F: Into<String>, R: Display>(file: F, reason: R) -> Self {
        SatFlashError::MalformedSource {
            file: file.into(),
            reason: reason.to_string(),
        }
    }
}

impl Display for SatFlashError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        use SatFlashError::*;

        match self {
            SourceUnavailable { key, reason } => {
                write!(f, "source unavailable: {} ({})", key, reason)
            }
            StoreUnavailable(msg) => write!(f, "record store unavailable: {}", msg),
            InvalidK { k, points } => {
                write!(f, "invalid k = {} for {} points, need 2 <= k < points", k, points)
            }
            EmptyKRange(n) => write!(f, "need at least 2 candidate values of k, got {}", n),
            InvalidWindow(msg) => write!(f, "invalid time window: {}", msg),
            MalformedSource { file, reason } => write!(f, "malformed source {}: {}", file, reason),
        }
    }
}

impl Error for SatFlashError {}

impl From<rusqlite::Error> for SatFlashError {
    fn from(err: rusqlite::Error) -> Self {
        SatFlashError::StoreUnavailable(err.to_string())
    }
}
