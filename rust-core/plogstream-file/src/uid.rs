// SPDX-License-Identifier: Apache-2.0
//
// plogstream file manager - PLOG unique identifiers
//
// A `PlogUid` packs the two components that identify a segment within a
// replicate stream into one opaque 64-bit value: the sequence number in the
// high 32 bits and the creation timestamp (Unix seconds, always 10 decimal
// digits in the file name) in the low 32 bits. The pipeline persists these
// identifiers as resume points.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque 64-bit identifier for a PLOG segment file.
///
/// Ordering follows (sequence, timestamp) ascending by construction, since
/// the sequence occupies the high bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlogUid(u64);

impl PlogUid {
    /// Combine a sequence number and creation timestamp into a single
    /// identifier.
    pub fn new(sequence: u32, timestamp: u32) -> Self {
        PlogUid((u64::from(sequence) << 32) | u64::from(timestamp))
    }

    /// Reconstruct an identifier from its raw 64-bit representation.
    pub fn from_raw(raw: u64) -> Self {
        PlogUid(raw)
    }

    /// The raw 64-bit representation, suitable for persistence.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// The sequence number component.
    pub fn sequence(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The creation timestamp component (Unix seconds).
    pub fn timestamp(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for PlogUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sequence(), self.timestamp())
    }
}
