// SPDX-License-Identifier: Apache-2.0
//
// plogstream file manager crate
//
// Tracks and sequences the append-only PLOG segment files produced by the
// mining process and hands them one at a time, in strict logical order, to
// the downstream parser of the change-data-capture pipeline. The hard part
// is not reading bytes: it is deciding which file is logically next,
// tolerating the multi-part sequences a producer restart leaves behind,
// telling producer death apart from transient lag, and supporting both cold
// start and warm resume from an arbitrary position.
//
// # Architecture
//
// PLOG files follow the naming convention
// `<sequence>.plog.<10-digit timestamp><optional suffix>`; sequence numbers
// are monotonically increasing, but a producer restart can leave several
// physical files for one number (a "restart boundary"). Subordinate LOAD
// segments (`...-<6 digits>-LOAD_...`) are excluded from sequencing and
// pulled in by the parser on demand.
//
// - [`SegmentDescriptor`] parses a file name once into (sequence,
//   timestamp) and carries the total order used to sort restart parts.
// - [`scanner`] answers the two stateless directory questions: the oldest
//   sequence on disk, and all candidate files for a given sequence.
// - [`SequenceCache`] remembers one listing's discoveries so multi-part
//   sequences are served file by file without re-scanning.
// - [`FileManager`] drives the blocking scan loop, owns the current and
//   previous [`SegmentHandle`]s, and decides retry versus offline versus
//   cancellation.
//
// # Usage
//
// ```no_run
// use plogstream_file::{FileManager, ManagerConfig};
//
// let config = ManagerConfig::new("/var/lib/plogstream/mine");
// let mut manager = FileManager::open(config).unwrap();
//
// let cancel = manager.cancel_token();
// ctrlc_like_handler(move || cancel.cancel());
//
// loop {
//     match manager.scan() {
//         Ok(()) => {
//             let segment = manager.current_handle().unwrap();
//             parse_segment(segment);
//         }
//         Err(plogstream_file::FileManagerError::Cancelled) => break,
//         Err(error) => panic!("replicate stream failed: {error}"),
//     }
// }
// manager.close();
// # fn ctrlc_like_handler(_f: impl FnOnce() + Send + 'static) {}
// # fn parse_segment(_s: &plogstream_file::PlogSegment) {}
// ```

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod manager;
pub mod scanner;
pub mod uid;

// Re-export the primary public API for ergonomic imports.
pub use cache::SequenceCache;
pub use config::ManagerConfig;
pub use descriptor::SegmentDescriptor;
pub use error::{FileManagerError, FileResult};
pub use handle::{
    HandleBuilder, PlogSegment, PlogSegmentBuilder, SegmentHandle, MIN_CONTROL_HEADER_SIZE,
};
pub use manager::{CancelToken, FileManager};
pub use uid::PlogUid;
