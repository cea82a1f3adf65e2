//! Durable Append Guard: a crash-consistent write-ahead staging buffer in
//! front of an append-only file.
//!
//! Writers stream bytes through [`Coordinator::write`]; after a crash the
//! guarded file is restorable to an exact prefix of the total byte stream
//! with no torn records. Durable flush cost is amortised via a fixed
//! non-volatile staging buffer (an mmapped side file standing in for a
//! PMEM region) and a background flusher.
//!
//! Out of scope (external collaborators): the libc-interposition shim that
//! attaches a guard to matching file descriptors, and the application-level
//! choice of staging file name (see [`staging_path_for`] for the
//! informational convention used by that shim).

mod coordinator;
mod error;
mod flusher;
mod meta;
mod nvstore;
mod ring;

pub use coordinator::{staging_path_for, Coordinator, DagStats, StagingConfig};
pub use error::{DagError, DagResult};
pub use nvstore::{load_u64, nv_memcpy, store_u64};

/// Staging granularity: both the ring's `start` and flush accounting
/// happen in whole multiples of this.
pub const BLOCK: u64 = 1 << 20;

/// `capacity / BLOCK` must fall in `[MIN_BLOCKS, MAX_BLOCKS]`.
pub const MIN_BLOCKS: u64 = 2;
pub const MAX_BLOCKS: u64 = 65536;
