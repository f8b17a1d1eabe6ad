// SPDX-License-Identifier: Apache-2.0
//
// plogstream file manager - Segment descriptors
//
// A `SegmentDescriptor` is the immutable metadata parsed once from a PLOG
// file name: sequence number, creation timestamp, and the raw name itself.
// Descriptors carry the total order used to sort the multiple physical
// files a producer restart can leave behind for a single sequence number.
//
// File naming convention (authoritative):
//   <sequence>.plog.<timestamp><optional suffix>
// where <sequence> is one or more decimal digits and <timestamp> is exactly
// ten decimal digits of Unix seconds.

use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FileManagerError, FileResult};
use crate::uid::PlogUid;

/// The literal extension token between sequence and timestamp.
pub const PLOG_SUFFIX: &str = "plog";

/// Number of digits in the timestamp component of a PLOG file name.
const TIMESTAMP_DIGITS: usize = 10;

/// Immutable metadata for one PLOG segment file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// The raw file name as found in the directory listing.
    file_name: String,

    /// Logical position in the replicate stream, parsed from the name
    /// prefix. Always >= 1.
    sequence: u32,

    /// Creation timestamp (Unix seconds) parsed from the ten digits after
    /// the `plog.` token.
    timestamp: u32,
}

impl SegmentDescriptor {
    /// Parse a descriptor from a file name.
    ///
    /// Returns [`FileManagerError::NamingConvention`] when the name does not
    /// match `<sequence>.plog.<10-digit timestamp>` (the `plog` token is
    /// matched case-insensitively, as directory scans are).
    pub fn parse(file_name: &str) -> FileResult<Self> {
        let reject = || FileManagerError::NamingConvention {
            name: file_name.to_string(),
        };

        let mut parts = file_name.splitn(3, '.');

        let sequence_part = parts.next().ok_or_else(reject)?;
        let suffix_part = parts.next().ok_or_else(reject)?;
        let rest = parts.next().ok_or_else(reject)?;

        if sequence_part.is_empty()
            || !sequence_part.bytes().all(|b| b.is_ascii_digit())
            || !suffix_part.eq_ignore_ascii_case(PLOG_SUFFIX)
        {
            return Err(reject());
        }

        let sequence: u32 = sequence_part.parse().map_err(|_| reject())?;
        if sequence < 1 {
            return Err(reject());
        }

        // Exactly ten digits of timestamp; anything after is free-form
        // suffix (e.g. the producer's restart decoration).
        if rest.len() < TIMESTAMP_DIGITS {
            return Err(reject());
        }
        let (timestamp_part, _suffix) = rest.split_at(TIMESTAMP_DIGITS);
        if !timestamp_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(reject());
        }
        let timestamp: u32 = timestamp_part.parse().map_err(|_| reject())?;

        Ok(SegmentDescriptor {
            file_name: file_name.to_string(),
            sequence,
            timestamp,
        })
    }

    /// The raw file name on disk.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The sequence number within the replicate stream.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The creation timestamp (Unix seconds).
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// The unique identifier combining sequence and timestamp.
    pub fn uid(&self) -> PlogUid {
        PlogUid::new(self.sequence, self.timestamp)
    }

    /// The creation timestamp as a UTC datetime.
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(i64::from(self.timestamp), 0)
            .single()
            .unwrap_or_default()
    }
}

impl PartialOrd for SegmentDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentDescriptor {
    /// Strict total order by (sequence, timestamp) ascending. Only ever
    /// exercised across files sharing one sequence number, where the
    /// timestamp decides which restart part comes first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then(self.timestamp.cmp(&other.timestamp))
    }
}
