// SPDX-License-Identifier: Apache-2.0
//
// plogstream file manager - Scan loop orchestrator
//
// `FileManager` owns the sequencing of PLOG files: it discovers the oldest
// segment for a cold start, advances one sequence number at a time, serves
// the multiple physical files a producer restart leaves for one number, and
// decides when the absence of new files means the miner is dead rather than
// slow.
//
// The scan loop is a small state machine driven entirely by `scan()`:
//
//   Cold ──first_scan──> Active ──continue_scan (multi-part, no waiting)
//                               └─next_scan (poll previous.sequence + 1)
//
// One thread owns the manager at a time; `scan()` takes `&mut self`, so
// concurrent calls are ruled out by the borrow checker rather than a lock.
// All blocking is sleep-then-repoll, and every sleep boundary observes the
// cooperative cancel token.

use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, trace, warn};

use crate::cache::SequenceCache;
use crate::config::ManagerConfig;
use crate::error::{FileManagerError, FileResult};
use crate::handle::{
    HandleBuilder, PlogSegmentBuilder, SegmentHandle, MIN_CONTROL_HEADER_SIZE,
};
use crate::scanner;
use crate::uid::PlogUid;

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared between the scanning thread and the
/// pipeline driver.
///
/// Cancellation is checked between sleep intervals, never mid-sleep, so
/// shutdown latency is bounded by one poll interval.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of any in-flight or future blocking scan.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// FileManager
// ---------------------------------------------------------------------------

/// Finds PLOG files on disk and hands them to the downstream parser one at
/// a time, in strict logical order.
///
/// The manager holds at most two handles: `current` (being prepared or
/// exposed to the consumer) and `previous` (kept only long enough to
/// transfer its decode cache into the successor, then closed).
pub struct FileManager<B: HandleBuilder = PlogSegmentBuilder> {
    config: ManagerConfig,
    builder: B,
    cache: SequenceCache,
    current: Option<B::Handle>,
    previous: Option<B::Handle>,
    active: bool,
    resumed: bool,
    scan_count: u32,
    force_interrupt: bool,
    cancel: CancelToken,
}

impl FileManager<PlogSegmentBuilder> {
    /// Create a manager producing default [`PlogSegment`](crate::handle::PlogSegment)
    /// handles.
    pub fn open(config: ManagerConfig) -> FileResult<Self> {
        Self::with_builder(config, PlogSegmentBuilder)
    }

    /// Create a manager positioned to resume at `uid` (see [`Self::start_at`]).
    pub fn open_resuming(config: ManagerConfig, uid: PlogUid) -> FileResult<Self> {
        Self::with_builder_resuming(config, PlogSegmentBuilder, uid)
    }
}

impl<B: HandleBuilder> FileManager<B> {
    /// Create a manager with a custom handle builder. Fails with a
    /// configuration error when the PLOG location is not a readable
    /// directory.
    pub fn with_builder(config: ManagerConfig, builder: B) -> FileResult<Self> {
        config.validate()?;
        Ok(FileManager {
            config,
            builder,
            cache: SequenceCache::new(),
            current: None,
            previous: None,
            active: false,
            resumed: false,
            scan_count: 0,
            force_interrupt: false,
            cancel: CancelToken::new(),
        })
    }

    /// Create a manager with a custom handle builder, positioned to resume
    /// at `uid`.
    pub fn with_builder_resuming(
        config: ManagerConfig,
        builder: B,
        uid: PlogUid,
    ) -> FileResult<Self> {
        let mut manager = Self::with_builder(config, builder)?;
        manager.start_at(uid)?;
        Ok(manager)
    }

    // -- positioning --------------------------------------------------------

    /// Position the manager so the next successful [`Self::scan`] yields
    /// the segment identified by `uid`.
    ///
    /// The target's predecessor (real file, last part of a multi-part
    /// predecessor, or an empty placeholder when the predecessor has been
    /// cleaned off disk) is adopted as the synthetic current handle so the
    /// normal advance arithmetic lands on the target. Does not open any
    /// file.
    pub fn start_at(&mut self, uid: PlogUid) -> FileResult<()> {
        let sequence = uid.sequence();
        let timestamp = uid.timestamp();

        if sequence < 1 {
            return Err(FileManagerError::InvalidUid {
                sequence,
                uid: uid.raw(),
            });
        }

        // Resolve the target's own sequence first; we need its predecessor,
        // not the target itself.
        self.resolve_next(sequence)?;

        let resolved_uid = self.current.as_ref().map(|handle| handle.uid());

        if resolved_uid == Some(uid) {
            let prev_sequence = sequence - 1;
            trace!(sequence = prev_sequence, "Rewinding scan to previous PLOG sequence");

            let rewound = self.rewind_to(prev_sequence);

            // The target's own sequence must be rescanned cleanly by the
            // upcoming scan, whatever the rewind found.
            self.cache.discard(sequence);

            match rewound {
                Ok(()) => {
                    if let Some(current) = self.current.as_ref() {
                        trace!(
                            file = %current.file_name(),
                            "Reset next PLOG to previous in sequence"
                        );
                    }
                }
                Err(error) if error.is_not_found() => {
                    // Predecessor already cleaned up (or never existed):
                    // synthesize an empty placeholder carrying its sequence
                    // number so advancement arithmetic still works.
                    trace!(
                        sequence = prev_sequence,
                        "Previous PLOG no longer available, marking it as an empty placeholder"
                    );
                    if let Some(current) = self.current.as_mut() {
                        current.set_sequence(prev_sequence);
                        current.set_file_name(String::new());
                    }
                }
                Err(error) => return Err(error),
            }
        } else if self.cache.pending_len(sequence) > 0 {
            // The target resolved into a multi-part cache: drop every part
            // older than the requested timestamp so the next consumption
            // yields the target itself.
            trace!(sequence, "Resuming inside a multi-part PLOG sequence");
            self.cache.skip_parts_before(sequence, timestamp);
        }

        self.active = true;
        self.scan_count = 0;
        // The producer is running and we know where we are: this is a warm
        // resume, not a cold start.
        self.resumed = true;

        Ok(())
    }

    /// Position the manager so scanning begins strictly after the segment
    /// identified by `uid`.
    pub fn start_after(&mut self, uid: PlogUid) -> FileResult<()> {
        let sequence = uid.sequence();

        if sequence < 1 {
            return Err(FileManagerError::InvalidUid {
                sequence,
                uid: uid.raw(),
            });
        }

        self.start_at(uid)?;
        // Consume the target itself; it becomes the synthetic current and
        // scanning proceeds from the file after it.
        self.resolve_next(sequence)?;
        Ok(())
    }

    /// Restart at `uid`, clearing all cached scan state first when the
    /// manager was already active. Used to reposition after a consumer
    /// error.
    pub fn restart_at(&mut self, uid: PlogUid) -> FileResult<()> {
        if self.active {
            self.scan_count = 0;
            self.cache.reset();
        }
        self.start_at(uid)
    }

    // -- scan loop ----------------------------------------------------------

    /// Blocking scan for the next PLOG in the replicate sequence.
    ///
    /// On success a new current handle is open and available through
    /// [`Self::current_handle`]; the previous handle has been closed after
    /// donating its decode cache. Blocks until the next file arrives, the
    /// cancel token fires ([`FileManagerError::Cancelled`]), or the retry
    /// budget is exhausted ([`FileManagerError::Offline`]).
    pub fn scan(&mut self) -> FileResult<()> {
        trace!(dir = %self.config.location.display(), "Scanning for PLOGs");

        if !self.active {
            return self.first_scan();
        }

        // Demote the current handle; it stays around (closed) so the
        // multi-part continuation knows which sequence it is on.
        if let Some(current) = self.current.take() {
            self.previous = Some(current);
        }

        if !self.continue_scan()? {
            self.next_scan()?;
        }

        Ok(())
    }

    /// Cold start: poll for the globally oldest sequence until the producer
    /// writes its first segment, then resolve and open it.
    fn first_scan(&mut self) -> FileResult<()> {
        let health = self.config.health_check_interval_count;
        let budget = u64::from(health) * u64::from(self.config.scan_quit_interval_count);
        let mut retries: u64 = 0;

        let first_sequence = loop {
            if self.cancel.is_cancelled() {
                return Err(FileManagerError::Cancelled);
            }

            if let Some(sequence) = scanner::find_oldest_sequence(&self.config.location)? {
                trace!(sequence, "First PLOG found on disk");
                break sequence;
            }

            retries += 1;
            if retries % u64::from(health) == 0 {
                if retries > budget {
                    return Err(FileManagerError::Offline {
                        retries: retries.min(u64::from(u32::MAX)) as u32,
                    });
                }
                warn!(retries, "No PLOG found, checking on producer");
            }

            thread::sleep(self.config.scan_wait_time());
        };

        if !self.resolve_next(first_sequence)? {
            return Err(FileManagerError::NotFound {
                sequence: first_sequence,
            });
        }

        if let Some(current) = self.current.as_ref() {
            debug!(file = %current.file_name(), "Replicate stream starts here");
        }

        self.open_next()?;
        self.active = true;
        Ok(())
    }

    /// Fast path for multi-part sequences: when the previous sequence
    /// number still has pending parts, serve the next one immediately,
    /// bypassing the poll/backoff path entirely.
    fn continue_scan(&mut self) -> FileResult<bool> {
        let prev_sequence = self
            .previous
            .as_ref()
            .map(|previous| previous.sequence())
            .ok_or_else(|| {
                FileManagerError::Configuration(
                    "cannot scan for multi-part PLOGs without a previous PLOG".to_string(),
                )
            })?;

        if !self.cache.has_active_multi_sequence(prev_sequence) {
            return Ok(false);
        }

        debug!(
            sequence = prev_sequence,
            "Finding next PLOG part of multi-sequence"
        );

        match self.resolve_next(prev_sequence) {
            Ok(true) => {
                self.open_next()?;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Poll for the sequence number after the previous handle's, sleeping
    /// one poll interval between attempts. Exhausting the retry budget
    /// cancels the wait when force interruption is armed and fails with
    /// `Offline` otherwise.
    fn next_scan(&mut self) -> FileResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(FileManagerError::Cancelled);
            }

            let next_sequence = self
                .previous
                .as_ref()
                .map(|previous| previous.sequence() + 1)
                .ok_or_else(|| {
                    FileManagerError::Configuration(
                        "cannot scan for the next PLOG without a previous PLOG".to_string(),
                    )
                })?;

            trace!(sequence = next_sequence, "Scanning for next PLOG sequence");

            match self.resolve_next(next_sequence) {
                Ok(true) => {
                    self.open_next()?;
                    return Ok(());
                }
                Ok(false) => {}
                Err(error) if error.is_not_found() => {
                    trace!(%error, "Waiting for next PLOG file to appear");
                }
                Err(error) => return Err(error),
            }

            self.scan_count += 1;

            if self.can_quit() {
                if self.force_interrupt {
                    warn!("Forcing shutdown of PLOG scanning, reason: idle timeout");
                    self.cancel.cancel();
                    return Err(FileManagerError::Cancelled);
                }
                return Err(FileManagerError::Offline {
                    retries: self.scan_count,
                });
            }

            thread::sleep(self.config.scan_wait_time());
        }
    }

    /// Resolve the next descriptor for `sequence` into a fresh (unopened)
    /// current handle. Returns `false` when the sequence is already fully
    /// consumed.
    fn resolve_next(&mut self, sequence: u32) -> FileResult<bool> {
        match self.cache.next(&self.config.location, sequence)? {
            Some(descriptor) => {
                self.current = Some(self.builder.build(&descriptor, &self.config.location));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Walk the current handle back to the last part of `prev_sequence`,
    /// consuming any multi-part cache so the predecessor position is the
    /// final file of that sequence.
    fn rewind_to(&mut self, prev_sequence: u32) -> FileResult<()> {
        self.resolve_next(prev_sequence)?;

        let mut remaining = self.cache.pending_len(prev_sequence);
        if remaining > 0 {
            trace!(
                sequence = prev_sequence,
                parts = remaining,
                "Rewinding to end of previous multi-part sequence"
            );
            while remaining > 0 {
                self.resolve_next(prev_sequence)?;
                remaining -= 1;
            }
        }

        Ok(())
    }

    /// Prepare and open the freshly resolved current handle: flag restart
    /// boundary files for force-close, transfer the decode cache from (and
    /// close) the previous handle, wait for the producer to finish the
    /// control header, then open the stream.
    fn open_next(&mut self) -> FileResult<()> {
        let current = self.current.as_mut().ok_or_else(|| {
            FileManagerError::Configuration("no PLOG available to open".to_string())
        })?;

        if self.cache.is_restart_boundary(current.file_name()) {
            debug!(file = %current.file_name(), "Restart boundary PLOG found");
            // The predecessor may never have been finalized; the stream
            // must be closed forcefully at end-of-life.
            current.enable_force_close_at_end();
        }

        if let Some(previous) = self.previous.as_ref() {
            current.copy_cache_from(previous);
        }
        if let Some(previous) = self.previous.as_mut() {
            previous.close();
        }

        // Block until the producer has written at least the control header;
        // a shorter file is still being created.
        let path = current.full_path();
        let header_wait = self.config.scan_wait_time() * self.config.scan_interval_count;
        loop {
            let size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
            if size >= MIN_CONTROL_HEADER_SIZE {
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(FileManagerError::Cancelled);
            }
            info!(
                file = %current.file_name(),
                "Waiting for control header to be written to PLOG file"
            );
            thread::sleep(header_wait);
        }

        trace!(file = %current.file_name(), "Opening next PLOG to read");
        current.open()?;
        self.scan_count = 0;
        Ok(())
    }

    // -- lifecycle & introspection ------------------------------------------

    /// The current segment handle, if a scan has produced one.
    pub fn current_handle(&self) -> Option<&B::Handle> {
        self.current.as_ref()
    }

    /// Mutable access to the current segment handle for the consumer.
    pub fn current_handle_mut(&mut self) -> Option<&mut B::Handle> {
        self.current.as_mut()
    }

    /// Whether the manager is actively monitoring a replicate sequence.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the manager resumed from a known position rather than cold
    /// starting.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Number of consecutive unsuccessful polls since the last successful
    /// advance.
    pub fn scan_count(&self) -> u32 {
        self.scan_count
    }

    /// True once enough health check intervals have elapsed without a new
    /// file that the manager may give up.
    pub fn can_quit(&self) -> bool {
        (self.scan_count / self.config.health_check_interval_count)
            >= self.config.scan_quit_interval_count
    }

    /// Total duration after which the producer is considered offline.
    pub fn timeout_duration(&self) -> std::time::Duration {
        self.config.timeout_duration()
    }

    /// The PLOG output directory being monitored.
    pub fn location(&self) -> &std::path::Path {
        &self.config.location
    }

    /// Allow the retry-budget exhaustion in [`Self::scan`] to cancel the
    /// blocking wait instead of failing with `Offline`.
    pub fn arm_force_interrupt(&mut self) {
        self.force_interrupt = true;
    }

    /// A clone of the cooperative cancel token observed at every sleep
    /// boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Close the current and previous handles, if any. Called once on
    /// shutdown, after the scan loop has been told to stop.
    pub fn close(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.close();
        }
        if let Some(mut previous) = self.previous.take() {
            previous.close();
        }
    }
}

impl<B: HandleBuilder> fmt::Display for FileManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PLOG file manager location: {} previous: {} current: {} active: {} resumed: {}",
            self.config.location.display(),
            self.previous
                .as_ref()
                .map_or("n/a", |handle| handle.file_name()),
            self.current
                .as_ref()
                .map_or("n/a", |handle| handle.file_name()),
            self.active,
            self.resumed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn fast_config(dir: &TempDir) -> ManagerConfig {
        let mut config = ManagerConfig::new(dir.path());
        config.scan_interval_count = 1;
        config.scan_wait_time_ms = 1;
        config.health_check_interval_count = 2;
        config.scan_quit_interval_count = 2;
        config
    }

    fn write_segment(dir: &TempDir, name: &str) {
        let mut file = File::create(dir.path().join(name)).unwrap();
        file.write_all(&[0u8; 64]).unwrap();
    }

    #[test]
    fn test_construction_requires_readable_location() {
        let config = ManagerConfig::new("/nonexistent/plog/location");
        assert!(matches!(
            FileManager::open(config),
            Err(FileManagerError::Configuration(_))
        ));
    }

    #[test]
    fn test_cold_start_empty_directory_goes_offline() {
        let dir = TempDir::new().unwrap();
        let mut manager = FileManager::open(fast_config(&dir)).unwrap();

        // Budget is quit x health = 4 polls; the first health check past it
        // fails with the producer presumed offline.
        let result = manager.scan();
        assert!(matches!(result, Err(FileManagerError::Offline { retries }) if retries > 4));
        assert!(!manager.is_active());
    }

    #[test]
    fn test_cold_start_finds_oldest_segment() {
        let dir = TempDir::new().unwrap();
        write_segment(&dir, "6.plog.1500000006");
        write_segment(&dir, "5.plog.1500000005");

        let mut manager = FileManager::open(fast_config(&dir)).unwrap();
        manager.scan().unwrap();

        assert!(manager.is_active());
        assert!(!manager.is_resumed());
        let handle = manager.current_handle().unwrap();
        assert_eq!(handle.sequence(), 5);
        assert!(handle.is_open());
        assert_eq!(manager.scan_count(), 0);
    }

    #[test]
    fn test_pre_cancelled_token_aborts_first_scan() {
        let dir = TempDir::new().unwrap();
        let mut manager = FileManager::open(fast_config(&dir)).unwrap();

        manager.cancel_token().cancel();
        assert!(matches!(
            manager.scan(),
            Err(FileManagerError::Cancelled)
        ));
    }

    #[test]
    fn test_start_at_rejects_invalid_sequence() {
        let dir = TempDir::new().unwrap();
        let mut manager = FileManager::open(fast_config(&dir)).unwrap();

        let result = manager.start_at(PlogUid::new(0, 1500000000));
        assert!(matches!(
            result,
            Err(FileManagerError::InvalidUid { sequence: 0, .. })
        ));
    }

    #[test]
    fn test_can_quit_arithmetic() {
        let dir = TempDir::new().unwrap();
        let mut manager = FileManager::open(fast_config(&dir)).unwrap();

        assert!(!manager.can_quit());
        manager.scan_count = 3;
        assert!(!manager.can_quit()); // 3 / 2 = 1 < 2
        manager.scan_count = 4;
        assert!(manager.can_quit()); // 4 / 2 = 2 >= 2
    }

    #[test]
    fn test_timeout_duration() {
        let dir = TempDir::new().unwrap();
        let manager = FileManager::open(fast_config(&dir)).unwrap();
        // quit (2) x health (2) x wait (1ms)
        assert_eq!(
            manager.timeout_duration(),
            std::time::Duration::from_millis(4)
        );
    }

    #[test]
    fn test_next_scan_offline_when_unarmed() {
        let dir = TempDir::new().unwrap();
        write_segment(&dir, "5.plog.1500000005");

        let mut manager = FileManager::open(fast_config(&dir)).unwrap();
        manager.scan().unwrap();

        // No sequence 6 ever arrives; the budget runs out.
        let result = manager.scan();
        assert!(matches!(result, Err(FileManagerError::Offline { .. })));
    }

    #[test]
    fn test_next_scan_cancels_when_force_interrupt_armed() {
        let dir = TempDir::new().unwrap();
        write_segment(&dir, "5.plog.1500000005");

        let mut manager = FileManager::open(fast_config(&dir)).unwrap();
        manager.arm_force_interrupt();
        manager.scan().unwrap();

        let result = manager.scan();
        assert!(matches!(result, Err(FileManagerError::Cancelled)));
        assert!(manager.cancel_token().is_cancelled());
    }

    #[test]
    fn test_close_tolerates_absent_handles() {
        let dir = TempDir::new().unwrap();
        let mut manager = FileManager::open(fast_config(&dir)).unwrap();
        manager.close();

        write_segment(&dir, "5.plog.1500000005");
        let mut manager = FileManager::open(fast_config(&dir)).unwrap();
        manager.scan().unwrap();
        manager.close();
        assert!(manager.current_handle().is_none());
    }

    #[test]
    fn test_display_summary() {
        let dir = TempDir::new().unwrap();
        write_segment(&dir, "5.plog.1500000005");

        let mut manager = FileManager::open(fast_config(&dir)).unwrap();
        assert!(manager.to_string().contains("active: false"));

        manager.scan().unwrap();
        let summary = manager.to_string();
        assert!(summary.contains("5.plog.1500000005"));
        assert!(summary.contains("active: true"));
    }
}
