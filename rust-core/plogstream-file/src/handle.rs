// SPDX-License-Identifier: Apache-2.0
//
// plogstream file manager - Segment handles
//
// The file manager hands segment files to the downstream parser through the
// `SegmentHandle` trait: an openable/closable resource identified by
// sequence number and timestamp, able to adopt the decode cache of its
// predecessor so dictionary state survives segment rotation. Handles are
// built by a `HandleBuilder`, which is how the pipeline driver injects its
// own reader wiring.
//
// `PlogSegment` is the default implementation: a buffered reader over the
// raw file plus a JSON-valued cache map. Parsing the binary PLOG layout is
// the reader layer's job, not ours.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, trace};

use crate::descriptor::SegmentDescriptor;
use crate::error::{FileManagerError, FileResult};
use crate::uid::PlogUid;

/// Minimum size in bytes of a valid PLOG control header. The producer
/// writes the header first; a smaller file is still being created and must
/// not be opened for reading.
pub const MIN_CONTROL_HEADER_SIZE: u64 = 16;

/// An openable segment resource handed to the downstream parser.
///
/// Placeholder handles (empty file name) exist only to seed the manager's
/// advance arithmetic during resume and are never opened.
pub trait SegmentHandle {
    /// Open the underlying file for reading.
    fn open(&mut self) -> FileResult<()>;

    /// Close the underlying file. Must tolerate a handle that was never
    /// opened.
    fn close(&mut self);

    /// Adopt the transferable decode cache from the preceding segment.
    fn copy_cache_from(&mut self, other: &Self);

    /// The unique identifier of this segment.
    fn uid(&self) -> PlogUid;

    /// The sequence number of this segment.
    fn sequence(&self) -> u32;

    /// The file name on disk (empty for placeholders).
    fn file_name(&self) -> &str;

    /// The full path of the segment file.
    fn full_path(&self) -> PathBuf;

    /// Rewrite the sequence number; used when synthesizing a placeholder
    /// for a predecessor file that no longer exists on disk.
    fn set_sequence(&mut self, sequence: u32);

    /// Rewrite the file name; an empty name marks a placeholder.
    fn set_file_name(&mut self, file_name: String);

    /// Mark this segment so its stream is force-closed at end-of-life. Set
    /// for restart boundary files, whose predecessor may be improperly
    /// finalized.
    fn enable_force_close_at_end(&mut self);
}

/// Factory for segment handles, injected into the manager by the pipeline
/// driver.
pub trait HandleBuilder {
    /// The concrete handle type this builder produces.
    type Handle: SegmentHandle;

    /// Build a (not yet opened) handle for a discovered segment file.
    fn build(&self, descriptor: &SegmentDescriptor, location: &Path) -> Self::Handle;
}

// ---------------------------------------------------------------------------
// PlogSegment
// ---------------------------------------------------------------------------

/// Default segment handle: a buffered file reader plus a transferable
/// JSON-valued decode cache.
#[derive(Debug)]
pub struct PlogSegment {
    sequence: u32,
    timestamp: u32,
    location: PathBuf,
    file_name: String,
    reader: Option<BufReader<File>>,
    cache: HashMap<String, Value>,
    force_close_at_end: bool,
}

impl PlogSegment {
    pub fn new(sequence: u32, timestamp: u32, location: &Path, file_name: String) -> Self {
        PlogSegment {
            sequence,
            timestamp,
            location: location.to_path_buf(),
            file_name,
            reader: None,
            cache: HashMap::new(),
            force_close_at_end: false,
        }
    }

    /// Whether the underlying file is currently open.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Whether this segment was marked to force-close its stream at
    /// end-of-life.
    pub fn is_force_close_at_end(&self) -> bool {
        self.force_close_at_end
    }

    /// The creation timestamp component.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Mutable access to the open reader, if any.
    pub fn reader_mut(&mut self) -> Option<&mut BufReader<File>> {
        self.reader.as_mut()
    }

    /// Store a value in the transferable decode cache.
    pub fn cache_insert(&mut self, key: impl Into<String>, value: Value) {
        self.cache.insert(key.into(), value);
    }

    /// Look up a value in the transferable decode cache.
    pub fn cache_get(&self, key: &str) -> Option<&Value> {
        self.cache.get(key)
    }
}

impl SegmentHandle for PlogSegment {
    fn open(&mut self) -> FileResult<()> {
        if self.file_name.is_empty() {
            return Err(FileManagerError::Configuration(
                "cannot open a placeholder segment with no file name".to_string(),
            ));
        }
        let path = self.full_path();
        trace!(path = %path.display(), "Opening PLOG segment");
        self.reader = Some(BufReader::new(File::open(&path)?));
        Ok(())
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            if self.force_close_at_end {
                debug!(
                    file = %self.file_name,
                    "Force closing restart boundary segment stream"
                );
            } else {
                trace!(file = %self.file_name, "Closing PLOG segment");
            }
        }
    }

    fn copy_cache_from(&mut self, other: &Self) {
        self.cache = other.cache.clone();
    }

    fn uid(&self) -> PlogUid {
        PlogUid::new(self.sequence, self.timestamp)
    }

    fn sequence(&self) -> u32 {
        self.sequence
    }

    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn full_path(&self) -> PathBuf {
        self.location.join(&self.file_name)
    }

    fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    fn set_file_name(&mut self, file_name: String) {
        self.file_name = file_name;
    }

    fn enable_force_close_at_end(&mut self) {
        self.force_close_at_end = true;
    }
}

/// Builder producing [`PlogSegment`] handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlogSegmentBuilder;

impl HandleBuilder for PlogSegmentBuilder {
    type Handle = PlogSegment;

    fn build(&self, descriptor: &SegmentDescriptor, location: &Path) -> PlogSegment {
        PlogSegment::new(
            descriptor.sequence(),
            descriptor.timestamp(),
            location,
            descriptor.file_name().to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_segment(dir: &TempDir, name: &str, bytes: usize) {
        let mut file = File::create(dir.path().join(name)).unwrap();
        file.write_all(&vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn test_build_from_descriptor() {
        let dir = TempDir::new().unwrap();
        let descriptor = SegmentDescriptor::parse("7.plog.1500000007").unwrap();
        let handle = PlogSegmentBuilder.build(&descriptor, dir.path());

        assert_eq!(handle.sequence(), 7);
        assert_eq!(handle.timestamp(), 1500000007);
        assert_eq!(handle.uid(), PlogUid::new(7, 1500000007));
        assert_eq!(handle.full_path(), dir.path().join("7.plog.1500000007"));
        assert!(!handle.is_open());
    }

    #[test]
    fn test_open_and_close() {
        let dir = TempDir::new().unwrap();
        write_segment(&dir, "7.plog.1500000007", 32);

        let descriptor = SegmentDescriptor::parse("7.plog.1500000007").unwrap();
        let mut handle = PlogSegmentBuilder.build(&descriptor, dir.path());

        handle.open().unwrap();
        assert!(handle.is_open());
        handle.close();
        assert!(!handle.is_open());

        // Closing twice (or a never-opened handle) is fine.
        handle.close();
    }

    #[test]
    fn test_placeholder_cannot_be_opened() {
        let dir = TempDir::new().unwrap();
        let mut handle = PlogSegment::new(4, 0, dir.path(), String::new());
        assert!(handle.open().is_err());
        handle.close();
    }

    #[test]
    fn test_cache_transfer() {
        let dir = TempDir::new().unwrap();
        let mut older = PlogSegment::new(1, 1500000001, dir.path(), "1.plog.1500000001".into());
        older.cache_insert("dictionary.SCOTT.EMP", json!({"columns": 8}));

        let mut newer = PlogSegment::new(2, 1500000002, dir.path(), "2.plog.1500000002".into());
        newer.copy_cache_from(&older);

        assert_eq!(
            newer.cache_get("dictionary.SCOTT.EMP"),
            Some(&json!({"columns": 8}))
        );
    }

    #[test]
    fn test_placeholder_rewrite() {
        let dir = TempDir::new().unwrap();
        let descriptor = SegmentDescriptor::parse("6.plog.1500000006").unwrap();
        let mut handle = PlogSegmentBuilder.build(&descriptor, dir.path());

        handle.set_sequence(5);
        handle.set_file_name(String::new());
        assert_eq!(handle.sequence(), 5);
        assert!(handle.file_name().is_empty());
    }

    #[test]
    fn test_force_close_flag() {
        let dir = TempDir::new().unwrap();
        let mut handle = PlogSegment::new(3, 1500000003, dir.path(), "x".into());
        assert!(!handle.is_force_close_at_end());
        handle.enable_force_close_at_end();
        assert!(handle.is_force_close_at_end());
    }
}
