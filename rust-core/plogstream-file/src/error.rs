// SPDX-License-Identifier: Apache-2.0
//
// plogstream file manager - Error types
//
// Defines all error conditions that can arise while sequencing PLOG segment
// files: configuration problems, naming convention violations, missing files
// during polling, producer liveness failures, and cooperative cancellation.
//
// The taxonomy is deliberate: `NotFound` is the only retryable condition and
// drives the manager's poll/backoff loop; `Cancelled` is a clean-stop signal
// rather than a failure; everything else is fatal for the operation that
// raised it.

use thiserror::Error;

/// Errors that can occur while discovering and sequencing PLOG files.
#[derive(Debug, Error)]
pub enum FileManagerError {
    /// The manager configuration is invalid: missing location, unparseable
    /// tunable, or a root directory that cannot be read.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A file name does not match the PLOG naming convention
    /// `<sequence>.plog.<10-digit timestamp>`. Logged and skipped during
    /// directory scans, never fatal.
    #[error("file name does not match PLOG naming convention: {name}")]
    NamingConvention {
        /// The offending file name.
        name: String,
    },

    /// No file exists yet for the requested sequence number. Expected during
    /// normal polling; callers treat this as "keep waiting".
    #[error("no file found for sequence {sequence}")]
    NotFound {
        /// The sequence number that was requested.
        sequence: u32,
    },

    /// The PLOG directory is missing or cannot be listed. Distinct from
    /// `NotFound` so callers never poll against a broken location.
    #[error("PLOG location is not readable: {path}")]
    DirectoryUnreadable {
        /// The directory that failed to list.
        path: String,
    },

    /// The retry budget was exhausted while waiting for the producer to
    /// write a segment. The mining process is presumed offline.
    #[error("PLOG producer appears offline after {retries} unsuccessful scans")]
    Offline {
        /// Number of unsuccessful scan attempts performed.
        retries: u32,
    },

    /// A cooperative cancellation signal was observed at a sleep boundary.
    /// This is a clean shutdown, not a failure.
    #[error("scan cancelled")]
    Cancelled,

    /// A PLOG identifier decomposed into an invalid sequence number
    /// (sequence numbers start at 1).
    #[error("invalid PLOG sequence {sequence} in identifier {uid}")]
    InvalidUid {
        /// The decoded sequence component.
        sequence: u32,
        /// The full 64-bit identifier.
        uid: u64,
    },

    /// An I/O error occurred while probing or opening a segment file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileManagerError {
    /// Returns `true` for the retryable "file not there yet" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FileManagerError::NotFound { .. })
    }
}

/// Convenience type alias for file manager results.
pub type FileResult<T> = Result<T, FileManagerError>;
