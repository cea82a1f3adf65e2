//! Metadata record: two 8-byte PMEM cells.
//!
//! Cell 0 (the "mixed cell") packs `durable_length` into its low 48 bits
//! and `start / BLOCK` into its high 16 bits so the pair advances with a
//! single atomic store, which is what crash consistency rests on. Cell 1
//! holds `buffer_end` alone.
use crate::nvstore;
use crate::BLOCK;

const DURABLE_LENGTH_MASK: u64 = (1u64 << 48) - 1;
const MAX_START_BLOCK: u64 = (1u64 << 16) - 1;

/// Typed access to the two metadata cells. Keeps every caller in the crate
/// from touching the raw mapping pointers directly.
pub struct MetaView {
    mixed: *mut u8,
    buffer_end: *mut u8,
}

unsafe impl Send for MetaView {}

impl MetaView {
    /// # Safety
    ///
    /// `base` must point to at least 16 writable, readable bytes, 8-byte
    /// aligned, for the lifetime of this `MetaView`.
    pub unsafe fn new(base: *mut u8) -> Self {
        Self {
            mixed: base,
            buffer_end: unsafe { base.add(8) },
        }
    }

    /// Returns `(durable_length, start)`.
    pub fn load_mixed(&self) -> (u64, u64) {
        let raw = nvstore::load_u64(self.mixed);
        let durable_length = raw & DURABLE_LENGTH_MASK;
        let start = (raw >> 48) * BLOCK;
        (durable_length, start)
    }

    /// Stores `(durable_length, start)` as a single 8-byte non-temporal
    /// store. Must be called precisely when the pair changes together:
    /// after a flush completes, or during `init`.
    pub fn store_mixed(&self, durable_length: u64, start: u64) {
        debug_assert_eq!(start % BLOCK, 0, "start must be BLOCK-aligned");
        debug_assert!(durable_length <= DURABLE_LENGTH_MASK, "durable_length overflows 48 bits");
        let start_block = start / BLOCK;
        debug_assert!(start_block <= MAX_START_BLOCK, "start overflows the 16-bit block index");
        let raw = (durable_length & DURABLE_LENGTH_MASK) | (start_block << 48);
        nvstore::store_u64(self.mixed, raw);
    }

    pub fn load_buffer_end(&self) -> u64 {
        nvstore::load_u64(self.buffer_end)
    }

    /// Stores `buffer_end`. Must only be called after the corresponding
    /// ring mirror writes have retired, so a reader never observes an end
    /// marker past bytes that haven't actually landed.
    pub fn store_buffer_end(&self, value: u64) {
        nvstore::store_u64(self.buffer_end, value);
    }
}
