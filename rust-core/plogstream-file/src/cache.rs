// SPDX-License-Identifier: Apache-2.0
//
// plogstream file manager - Sequence cache
//
// The `SequenceCache` remembers what one directory listing discovered for a
// sequence number so that multi-part sequences (several physical files for
// one number, produced when the miner restarts mid-sequence) can be served
// one file at a time without re-scanning the directory.
//
// Three pieces of state, all owned by the manager and torn down with it:
//   pending          sequence -> ordered queue of unconsumed descriptors
//   done             sequence -> all descriptors for it have been consumed
//   restart boundary file name -> part of a multi-file sequence; its
//                    predecessor may be improperly finalized
//
// Invariant: `done` is never true for a sequence with a non-empty pending
// queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use tracing::trace;

use crate::descriptor::SegmentDescriptor;
use crate::error::FileResult;
use crate::scanner;

/// Per-sequence cache of pending segment files and consumption state.
#[derive(Debug, Default)]
pub struct SequenceCache {
    /// Not-yet-consumed descriptors per sequence number. Non-empty only for
    /// multi-part (restart boundary) sequences.
    pending: HashMap<u32, VecDeque<SegmentDescriptor>>,

    /// Sequences whose descriptors have all been consumed.
    done: HashMap<u32, bool>,

    /// File names discovered as part of a multi-file sequence.
    restart_boundary: HashSet<String>,
}

impl SequenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next descriptor for `sequence`, consulting the pending
    /// queue first and falling back to a fresh directory scan.
    ///
    /// Returns `Ok(None)` when the sequence has already been fully consumed
    /// — the idempotent no-op that lets resume positioning re-run without
    /// re-emitting files. Returns `NotFound` when a fresh scan finds no
    /// candidate at all.
    pub fn next(
        &mut self,
        dir: &Path,
        sequence: u32,
    ) -> FileResult<Option<SegmentDescriptor>> {
        if self.done.get(&sequence) == Some(&true) {
            trace!(sequence, "Sequence already consumed, nothing new");
            return Ok(None);
        }

        if let Some(descriptor) = self
            .pending
            .get_mut(&sequence)
            .and_then(|queue| queue.pop_front())
        {
            trace!(
                file = %descriptor.file_name(),
                sequence,
                "Found PLOG in multi-sequence cache"
            );
            if self.pending.get(&sequence).is_some_and(VecDeque::is_empty) {
                trace!(sequence, "Done with multi-sequence");
                self.pending.remove(&sequence);
                self.done.insert(sequence, true);
            }
            return Ok(Some(descriptor));
        }

        self.done.insert(sequence, false);

        let mut candidates = scanner::find_candidates(dir, sequence)?;
        candidates.sort();

        // More than one physical file for a single sequence number can only
        // happen at a producer restart boundary; every file in the set must
        // tolerate an improperly finalized predecessor.
        if candidates.len() > 1 {
            for candidate in &candidates {
                self.restart_boundary
                    .insert(candidate.file_name().to_string());
            }
        }

        let first = candidates.remove(0);

        if candidates.is_empty() {
            self.done.insert(sequence, true);
        } else {
            self.pending.insert(sequence, candidates.into());
        }

        Ok(Some(first))
    }

    /// True iff `sequence` still has unconsumed multi-part entries, meaning
    /// the next scan must continue the same sequence number rather than
    /// advance.
    pub fn has_active_multi_sequence(&self, sequence: u32) -> bool {
        self.pending
            .get(&sequence)
            .is_some_and(|queue| !queue.is_empty())
    }

    /// True iff `file_name` was discovered as part of a multi-file sequence.
    pub fn is_restart_boundary(&self, file_name: &str) -> bool {
        self.restart_boundary.contains(file_name)
    }

    /// Number of unconsumed entries cached for `sequence`.
    pub fn pending_len(&self, sequence: u32) -> usize {
        self.pending.get(&sequence).map_or(0, VecDeque::len)
    }

    /// Drop all cached state for `sequence` so its next lookup re-scans the
    /// directory. Used when resume positioning must reprocess a partially
    /// consumed sequence cleanly.
    pub fn discard(&mut self, sequence: u32) {
        self.pending.remove(&sequence);
        self.done.remove(&sequence);
    }

    /// Skip past all pending entries for `sequence` whose timestamp is
    /// smaller than `timestamp`, so the next consumption yields the part at
    /// or after it. Empties the queue (and marks the sequence done) when
    /// every entry is older than the requested position.
    pub fn skip_parts_before(&mut self, sequence: u32, timestamp: u32) {
        let emptied = match self.pending.get_mut(&sequence) {
            Some(queue) => {
                while queue
                    .front()
                    .is_some_and(|descriptor| descriptor.timestamp() < timestamp)
                {
                    queue.pop_front();
                }
                queue.is_empty()
            }
            None => return,
        };
        if emptied {
            self.pending.remove(&sequence);
            self.done.insert(sequence, true);
        }
    }

    /// Clear all cached state. Used when forcibly restarting at an
    /// arbitrary point.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.done.clear();
        self.restart_boundary.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileManagerError;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) {
        File::create(dir.path().join(name)).unwrap();
    }

    #[test]
    fn test_single_file_sequence_consumed_once() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "4.plog.1500000004");

        let mut cache = SequenceCache::new();
        let descriptor = cache.next(dir.path(), 4).unwrap().unwrap();
        assert_eq!(descriptor.file_name(), "4.plog.1500000004");
        assert!(!cache.is_restart_boundary(descriptor.file_name()));
        assert!(!cache.has_active_multi_sequence(4));

        // Second lookup is the idempotent no-op, never a re-emit.
        assert!(cache.next(dir.path(), 4).unwrap().is_none());
    }

    #[test]
    fn test_multi_part_sequence_served_in_timestamp_order() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "7.plog.1500000300");
        touch(&dir, "7.plog.1500000100");
        touch(&dir, "7.plog.1500000200");

        let mut cache = SequenceCache::new();

        let first = cache.next(dir.path(), 7).unwrap().unwrap();
        assert_eq!(first.timestamp(), 1500000100);
        assert!(cache.has_active_multi_sequence(7));
        assert_eq!(cache.pending_len(7), 2);

        // Every file in the set is a restart boundary, not just the first.
        for name in [
            "7.plog.1500000100",
            "7.plog.1500000200",
            "7.plog.1500000300",
        ] {
            assert!(cache.is_restart_boundary(name), "{name} not flagged");
        }

        let second = cache.next(dir.path(), 7).unwrap().unwrap();
        assert_eq!(second.timestamp(), 1500000200);
        assert!(cache.has_active_multi_sequence(7));

        let third = cache.next(dir.path(), 7).unwrap().unwrap();
        assert_eq!(third.timestamp(), 1500000300);

        // Done only after the last part.
        assert!(!cache.has_active_multi_sequence(7));
        assert!(cache.next(dir.path(), 7).unwrap().is_none());
    }

    #[test]
    fn test_missing_sequence_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut cache = SequenceCache::new();
        let result = cache.next(dir.path(), 3);
        assert!(matches!(
            result,
            Err(FileManagerError::NotFound { sequence: 3 })
        ));
        // A failed scan leaves the sequence unconsumed.
        assert!(!cache.has_active_multi_sequence(3));
    }

    #[test]
    fn test_discard_forces_rescan() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "5.plog.1500000005");

        let mut cache = SequenceCache::new();
        assert!(cache.next(dir.path(), 5).unwrap().is_some());
        assert!(cache.next(dir.path(), 5).unwrap().is_none());

        cache.discard(5);
        let again = cache.next(dir.path(), 5).unwrap().unwrap();
        assert_eq!(again.sequence(), 5);
    }

    #[test]
    fn test_skip_parts_before_lands_on_requested_part() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "9.plog.1500000100");
        touch(&dir, "9.plog.1500000200");
        touch(&dir, "9.plog.1500000300");
        touch(&dir, "9.plog.1500000400");

        let mut cache = SequenceCache::new();
        // Consume the head; pending now holds t200, t300, t400.
        cache.next(dir.path(), 9).unwrap().unwrap();

        // Position for a resume at t400: everything older is skipped so the
        // next consumption yields the requested part directly.
        cache.skip_parts_before(9, 1500000400);
        assert_eq!(cache.pending_len(9), 1);

        let target = cache.next(dir.path(), 9).unwrap().unwrap();
        assert_eq!(target.timestamp(), 1500000400);
        assert!(cache.next(dir.path(), 9).unwrap().is_none());
    }

    #[test]
    fn test_skip_parts_before_past_everything_marks_done() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "9.plog.1500000100");
        touch(&dir, "9.plog.1500000200");

        let mut cache = SequenceCache::new();
        cache.next(dir.path(), 9).unwrap().unwrap();

        cache.skip_parts_before(9, 1500000900);
        assert!(!cache.has_active_multi_sequence(9));
        assert!(cache.next(dir.path(), 9).unwrap().is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "7.plog.1500000100");
        touch(&dir, "7.plog.1500000200");

        let mut cache = SequenceCache::new();
        cache.next(dir.path(), 7).unwrap().unwrap();
        assert!(cache.has_active_multi_sequence(7));
        assert!(cache.is_restart_boundary("7.plog.1500000100"));

        cache.reset();
        assert!(!cache.has_active_multi_sequence(7));
        assert!(!cache.is_restart_boundary("7.plog.1500000100"));

        // After a reset the whole sequence is rediscovered.
        let first = cache.next(dir.path(), 7).unwrap().unwrap();
        assert_eq!(first.timestamp(), 1500000100);
    }
}
