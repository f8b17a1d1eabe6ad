// SPDX-License-Identifier: Apache-2.0
//
// plogstream file manager - Directory scanning
//
// Stateless queries against the PLOG output directory: find the globally
// oldest sequence number (cold start), and find every candidate file for a
// specific sequence number (normal advance). Subordinate LOAD segments are
// excluded from sequencing here; the downstream parser pulls those in on
// demand when it encounters the corresponding in-stream directive.
//
// Malformed file names are never fatal during a scan: they are logged at
// warn level and skipped, matching the error taxonomy in `error.rs`.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::descriptor::{SegmentDescriptor, PLOG_SUFFIX};
use crate::error::{FileManagerError, FileResult};

/// Find the oldest (lowest) PLOG sequence number present in `dir`.
///
/// Considers every file whose name contains the `.plog.` infix
/// (case-insensitively) and parses the numeric prefix before it. Returns
/// `Ok(None)` when no file name parses — the caller keeps polling until one
/// appears.
pub fn find_oldest_sequence(dir: &Path) -> FileResult<Option<u32>> {
    let infix = format!(".{PLOG_SUFFIX}.");
    let mut oldest: Option<u32> = None;

    for name in list_file_names(dir)? {
        let lowered = name.to_ascii_lowercase();
        let Some(infix_at) = lowered.find(&infix) else {
            continue;
        };

        match name[..infix_at].parse::<u32>() {
            Ok(sequence) => {
                oldest = Some(match oldest {
                    Some(current) => current.min(sequence),
                    None => sequence,
                });
            }
            Err(_) => {
                warn!(file = %name, "PLOG file prefix is not a sequence number, skipping");
            }
        }
    }

    debug!(
        dir = %dir.display(),
        oldest = ?oldest,
        "Scanned for oldest PLOG sequence"
    );

    Ok(oldest)
}

/// Find every candidate file for `sequence` in `dir`, excluding LOAD
/// segments.
///
/// Returns one descriptor per matching file, in directory order (callers
/// sort). Zero matches yield [`FileManagerError::NotFound`], which is the
/// retryable "not written yet" condition, distinct from an unreadable
/// directory.
pub fn find_candidates(dir: &Path, sequence: u32) -> FileResult<Vec<SegmentDescriptor>> {
    let prefix = format!("{sequence}.{PLOG_SUFFIX}");
    let mut candidates = Vec::new();

    for name in list_file_names(dir)? {
        let lowered = name.to_ascii_lowercase();
        if !lowered.starts_with(&prefix) || is_load_segment(&name) {
            continue;
        }

        match SegmentDescriptor::parse(&name) {
            Ok(descriptor) => {
                debug!(file = %name, sequence, "Found candidate PLOG");
                candidates.push(descriptor);
            }
            Err(error) => {
                warn!(file = %name, %error, "Skipping malformed PLOG candidate");
            }
        }
    }

    if candidates.is_empty() {
        return Err(FileManagerError::NotFound { sequence });
    }

    Ok(candidates)
}

/// Returns `true` if `name` carries the subordinate LOAD segment marker:
/// a `-LOAD_` token preceded by a dash and six digits
/// (`...-<6 digits>-LOAD_...`). LOAD segments are bulk-load side files and
/// never part of the main sequence.
pub fn is_load_segment(name: &str) -> bool {
    name.match_indices("-LOAD_").any(|(at, _)| {
        at >= 7 && {
            let marker = &name.as_bytes()[at - 7..at];
            marker[0] == b'-' && marker[1..].iter().all(|b| b.is_ascii_digit())
        }
    })
}

/// List the file names in `dir`, failing with `DirectoryUnreadable` when
/// the location is missing or cannot be listed.
fn list_file_names(dir: &Path) -> FileResult<Vec<String>> {
    if !dir.is_dir() {
        return Err(FileManagerError::DirectoryUnreadable {
            path: dir.display().to_string(),
        });
    }

    let entries = fs::read_dir(dir).map_err(|_| FileManagerError::DirectoryUnreadable {
        path: dir.display().to_string(),
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}
