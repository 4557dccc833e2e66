//! Sorted run files: fixed-size disk blocks of front-coded, bit-packed
//! n-gram records.
//!
//! ## Run-file layout
//!
//! A run file is a concatenation of disk blocks:
//!
//! ```text
//! +--------------------------------------+
//! | w (u8) | v (u8) | records (u64 LE)   |  block header
//! +--------------------------------------+
//! | bit-packed front-coded records       |  exactly BLOCK_BYTES,
//! | ... zero padding ...                 |  short only for the final block
//! +--------------------------------------+
//! | next block ...                       |
//! +--------------------------------------+
//! ```
//!
//! `w` is the bits per word id and `v` the bits per count, fixed per block
//! from that block's maxima. The first record of every block is explicit;
//! each subsequent record stores its longest common prefix length against
//! its predecessor (under the run's ordering schedule) followed by the
//! remaining word ids and the count. The model order and the schedule are
//! not in the header; they travel in the run manifest.

pub mod manifest;
pub mod reader;
pub mod writer;

pub use manifest::RunManifest;
pub use reader::{FrontCodedBlockReader, RecordCursor, RunReader};
pub use writer::{FrontCodedWriter, RunSummary};

/// Size of one disk block. Every block of a run is exactly this long except
/// possibly the last.
pub const BLOCK_BYTES: usize = 64 * 1024 * 1024;
