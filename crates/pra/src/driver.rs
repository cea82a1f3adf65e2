//! Fill/free driver: `finish()` asks the backing allocator to hand out
//! every slot of every touched size class in address order, then frees
//! back whichever slots were never actually live.
use crate::error::{PraError, PraResult};
use crate::extrapolator::Extrapolator;
use crate::page_table::slot_count;
use crate::BackingAllocator;

/// Owns the page table plus the backing allocator it drives. `finish`
/// consumes it: the reconstructed allocator is the only thing a caller
/// should go on using afterward.
pub struct Reconstructor<A: BackingAllocator> {
    extrapolator: Extrapolator,
    allocator: A,
}

impl<A: BackingAllocator> Reconstructor<A> {
    pub fn new(extrapolator: Extrapolator, allocator: A) -> Self {
        Self {
            extrapolator,
            allocator,
        }
    }

    /// Records a known live `(offset, size)` allocation.
    pub fn add(&mut self, offset: u64, size: u64) -> PraResult<()> {
        self.extrapolator.add(&self.allocator, offset, size)
    }

    /// Two-pass reconstruction: fill every slot of every touched size
    /// class, then free the ones the caller never submitted. Returns the
    /// backing allocator, now holding the reconstructed free-list state, for
    /// the rest of the program to keep using.
    pub fn finish(mut self) -> PraResult<A> {
        let Some(highest) = self.extrapolator.pages().highest_touched_page() else {
            return Ok(self.allocator);
        };
        let page_size = self.extrapolator.page_size();

        for page_id in 0..=highest {
            if !self.allocator.is_page_allocatable(page_id) {
                debug_assert!(
                    self.extrapolator.pages().get(page_id).is_untouched(),
                    "non-allocatable page {page_id} was touched by add()"
                );
                self.extrapolator.pages_mut().get_mut(page_id).bias = page_size;
                continue;
            }

            if self.extrapolator.pages().get(page_id).bias >= page_size {
                continue;
            }

            if self.extrapolator.pages().get(page_id).is_untouched() {
                let count = slot_count(page_size, 0, page_size);
                self.extrapolator
                    .pages_mut()
                    .get_mut(page_id)
                    .touch(page_size, 0, count);
            }

            let page = self.extrapolator.pages().get(page_id);
            let std_size = page.std_size;
            let bias = page.bias;
            let count = slot_count(page_size, bias, std_size);
            for i in 0..count {
                let expected = page_id * page_size + bias + i * std_size;
                let got = self.allocator.alloc(std_size);
                if got != expected {
                    return Err(PraError::Mismatch { expected, got });
                }
            }
        }

        for page_id in 0..=highest {
            let page = self.extrapolator.pages().get(page_id);
            if page.bias >= page_size || page.is_untouched() {
                continue;
            }
            let std_size = page.std_size;
            let bias = page.bias;
            let count = slot_count(page_size, bias, std_size);
            for i in 0..count {
                if !page.is_set(i) {
                    let offset = page_id * page_size + bias + i * std_size;
                    self.allocator.free(offset, std_size);
                }
            }
        }

        Ok(self.allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AllocatorConfig;

    /// Hands out slots for a size class in strictly increasing address
    /// order, the way a real bump/free-list allocator behaves for a class
    /// with no prior allocations, enough to exercise `finish`'s offset
    /// assertions without depending on a real third-party allocator.
    struct SequentialAllocator {
        std_size: u64,
        next_bump: std::collections::HashMap<u64, u64>,
        free_lists: std::collections::HashMap<u64, std::collections::BTreeSet<u64>>,
        freed: Vec<u64>,
    }

    impl SequentialAllocator {
        fn new(std_size: u64) -> Self {
            Self {
                std_size,
                next_bump: std::collections::HashMap::new(),
                free_lists: std::collections::HashMap::new(),
                freed: Vec::new(),
            }
        }
    }

    impl BackingAllocator for SequentialAllocator {
        fn base_addr(&self) -> u64 {
            0
        }
        fn standardise_size(&self, size: u64) -> u64 {
            debug_assert!(size <= self.std_size);
            self.std_size
        }
        fn is_page_allocatable(&self, _page_id: u64) -> bool {
            true
        }
        fn alloc(&mut self, std_size: u64) -> u64 {
            if let Some(free_list) = self.free_lists.get_mut(&std_size) {
                if let Some(&lowest) = free_list.iter().next() {
                    free_list.remove(&lowest);
                    return lowest;
                }
            }
            let next = self.next_bump.entry(std_size).or_insert(0);
            let offset = *next;
            *next += std_size;
            offset
        }
        fn free(&mut self, offset: u64, std_size: u64) {
            self.freed.push(offset);
            self.free_lists.entry(std_size).or_default().insert(offset);
        }
    }

    fn reconstructor(
        page_count: u64,
        page_size: u64,
        max_small_size: u64,
        std_size: u64,
    ) -> Reconstructor<SequentialAllocator> {
        let config = AllocatorConfig {
            total_bytes: page_count * page_size,
            page_bytes: page_size,
            max_small_size,
        };
        let extrapolator =
            Extrapolator::new(config.page_count(), config.page_bytes, config.max_small_size);
        Reconstructor::new(extrapolator, SequentialAllocator::new(std_size))
    }

    /// After reconstructing offsets `256*{2,5,9}`, the next `alloc(256)`
    /// must return offset 0: every lower slot got filled and then freed
    /// back except the three submitted ones.
    #[test]
    fn single_size_round_trip_frees_unused_slots() {
        let mut r = reconstructor(4, 4096, 4096, 256);
        for k in [2u64, 5, 9] {
            r.add(256 * k, 256).unwrap();
        }
        let mut allocator = r.finish().unwrap();
        // Every slot below offset 2304 got filled in pass 1 and then freed
        // in pass 2, except the three submitted offsets, so the freed list
        // for class 256 yields 0 first (lowest address freed first).
        let next = allocator.alloc(256);
        assert_eq!(next, 0);
        assert!(!allocator.freed.contains(&(256 * 2)));
        assert!(!allocator.freed.contains(&(256 * 5)));
        assert!(!allocator.freed.contains(&(256 * 9)));
    }

    /// A single cross-page submission at offset 384 fills all slots on
    /// pages 0-2 and frees everything except slot index 1 of page 0 (the
    /// one submitted slot).
    #[test]
    fn cross_page_bin_fills_and_frees_correctly() {
        let mut r = reconstructor(4, 4096, 4096, 384);
        r.add(384, 384).unwrap();
        let allocator = r.finish().unwrap();
        assert!(!allocator.freed.contains(&384));
        assert!(allocator.freed.contains(&0));
    }

    #[test]
    fn mismatch_between_predicted_and_returned_offset_is_fatal() {
        struct BrokenAllocator;
        impl BackingAllocator for BrokenAllocator {
            fn base_addr(&self) -> u64 {
                0
            }
            fn standardise_size(&self, _size: u64) -> u64 {
                256
            }
            fn is_page_allocatable(&self, _page_id: u64) -> bool {
                true
            }
            fn alloc(&mut self, _std_size: u64) -> u64 {
                u64::MAX
            }
            fn free(&mut self, _offset: u64, _std_size: u64) {}
        }

        let config = AllocatorConfig {
            total_bytes: 4 * 4096,
            page_bytes: 4096,
            max_small_size: 4096,
        };
        let extrapolator =
            Extrapolator::new(config.page_count(), config.page_bytes, config.max_small_size);
        let mut r = Reconstructor::new(extrapolator, BrokenAllocator);
        r.add(512, 256).unwrap();
        let err = r.finish().unwrap_err();
        assert!(matches!(err, PraError::Mismatch { .. }));
    }

    #[test]
    fn empty_reconstructor_finishes_as_a_no_op() {
        let r = reconstructor(4, 4096, 4096, 256);
        r.finish().unwrap();
    }
}
