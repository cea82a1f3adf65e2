//! Placement-Reconstructing Allocator: given a pre-existing set of
//! `(offset, size)` live allocations inside a backing region, drives a
//! third-party size-class allocator through a fill/free sequence that
//! reconstructs its internal free-list state so subsequent allocations
//! behave as if no restart had occurred.
//!
//! Out of scope (external collaborators): the backing size-class allocator
//! itself (callers provide one through [`BackingAllocator`]) and any CLI or
//! test-case generator that drives this crate end to end.

mod driver;
mod error;
mod extrapolator;
mod page_table;

pub use driver::Reconstructor;
pub use error::{PraError, PraResult};
pub use extrapolator::Extrapolator;

/// Callbacks the reconstructor needs from the backing size-class allocator,
/// expressed as a trait rather than five separate closures.
pub trait BackingAllocator {
    /// Base address of the backing region; offsets submitted to `add` are
    /// relative to this.
    fn base_addr(&self) -> u64;

    /// Rounds `size` up to the size class the allocator would have used.
    fn standardise_size(&self, size: u64) -> u64;

    /// Whether the allocator is willing to hand out memory from this page
    /// at all (some pages are reserved for bookkeeping).
    fn is_page_allocatable(&self, page_id: u64) -> bool;

    /// Allocates one slot of `std_size`, returning its offset. Must be
    /// deterministic for a given free-list state and must not employ any
    /// per-thread cache, or placement determinism is lost.
    fn alloc(&mut self, std_size: u64) -> u64;

    /// Returns the slot at `offset` (of class `std_size`) to the free list.
    fn free(&mut self, offset: u64, std_size: u64);
}

/// Typed parameters for [`Reconstructor`] construction, in place of a long
/// positional parameter list.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    pub total_bytes: u64,
    pub page_bytes: u64,
    pub max_small_size: u64,
}

impl AllocatorConfig {
    pub fn page_count(&self) -> u64 {
        self.total_bytes.div_ceil(self.page_bytes)
    }
}

/// Builds a fresh [`Reconstructor`] over a backing allocator, ready to
/// receive `add` calls before a single `finish`.
pub fn init<A: BackingAllocator>(config: AllocatorConfig, allocator: A) -> PraResult<Reconstructor<A>> {
    if config.page_bytes == 0 || config.total_bytes == 0 {
        return Err(PraError::SizeOutOfRange);
    }
    let extrapolator = Extrapolator::new(config.page_count(), config.page_bytes, config.max_small_size);
    Ok(Reconstructor::new(extrapolator, allocator))
}
