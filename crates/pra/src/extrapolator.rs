//! Bin extrapolator: infers which neighbouring pages share a size class
//! from one known allocation by walking the arithmetic of slot layout
//! forwards and backwards.
use crate::error::{PraError, PraResult};
use crate::page_table::{slot_count, PageTable};
use crate::BackingAllocator;

/// Owns the page table and the global geometry (`page_size`,
/// `max_small_size`) that both `add` and the fill/free driver need.
pub struct Extrapolator {
    pages: PageTable,
    page_size: u64,
    max_small_size: u64,
}

impl Extrapolator {
    pub fn new(page_count: u64, page_size: u64, max_small_size: u64) -> Self {
        Self {
            pages: PageTable::new(page_count),
            page_size,
            max_small_size,
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn pages(&self) -> &PageTable {
        &self.pages
    }

    pub fn pages_mut(&mut self) -> &mut PageTable {
        &mut self.pages
    }

    /// Records a known live `(offset, size)` allocation, extrapolating the
    /// size class to neighbouring pages the first time a page is touched.
    pub fn add(
        &mut self,
        allocator: &dyn BackingAllocator,
        offset: u64,
        size: u64,
    ) -> PraResult<()> {
        let std_size = allocator.standardise_size(size);
        if std_size < size || std_size > self.max_small_size {
            return Err(PraError::SizeOutOfRange);
        }

        let page_id = offset / self.page_size;
        if page_id >= self.pages.len() {
            return Err(PraError::PastLastPage);
        }
        let offset_in_page = offset % self.page_size;
        let item_index = offset_in_page / std_size;
        let bias = offset_in_page - item_index * std_size;

        if self.pages.get(page_id).is_untouched() {
            let count = slot_count(self.page_size, bias, std_size);
            self.pages.get_mut(page_id).touch(std_size, bias, count);
            self.pages.get_mut(page_id).set(item_index);

            self.walk_backwards(page_id, std_size, bias)?;
            self.walk_forwards(page_id, std_size, bias)?;
        } else {
            let page = self.pages.get(page_id);
            if page.std_size != std_size || page.bias != bias {
                return Err(PraError::BinMismatch { page_id });
            }
            if page.is_set(item_index) {
                return Err(PraError::AlreadyLive { offset });
            }
            self.pages.get_mut(page_id).set(item_index);
        }
        Ok(())
    }

    fn walk_backwards(&mut self, page_id: u64, std_size: u64, bias: u64) -> PraResult<()> {
        let mut current = page_id;
        let mut bias = bias;
        while bias != 0 {
            if current == 0 {
                return Err(PraError::PreFirstPage);
            }
            let prev_bias = (bias + self.page_size) % std_size;
            current -= 1;
            if !self.pages.get(current).is_untouched() {
                return Err(PraError::BinMismatch { page_id: current });
            }
            let count = slot_count(self.page_size, prev_bias, std_size);
            self.pages.get_mut(current).touch(std_size, prev_bias, count);
            bias = prev_bias;
        }
        Ok(())
    }

    fn walk_forwards(&mut self, page_id: u64, std_size: u64, bias: u64) -> PraResult<()> {
        let mut current = page_id;
        let mut bias = bias;
        loop {
            let rest = (self.page_size - bias) % std_size;
            if rest == 0 {
                break;
            }
            let next_rest = (rest + self.page_size) % std_size;
            let next_bias = if next_rest <= self.page_size {
                (self.page_size - next_rest) % std_size
            } else {
                std_size + self.page_size - next_rest
            };
            current += 1;
            if current >= self.pages.len() {
                return Err(PraError::PastLastPage);
            }
            if !self.pages.get(current).is_untouched() {
                return Err(PraError::BinMismatch { page_id: current });
            }
            let count = slot_count(self.page_size, next_bias, std_size);
            self.pages.get_mut(current).touch(std_size, next_bias, count);
            bias = next_bias;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSize(u64);

    impl BackingAllocator for FixedSize {
        fn base_addr(&self) -> u64 {
            0
        }
        fn standardise_size(&self, _size: u64) -> u64 {
            self.0
        }
        fn is_page_allocatable(&self, _page_id: u64) -> bool {
            true
        }
        fn alloc(&mut self, _std_size: u64) -> u64 {
            unimplemented!("not exercised by extrapolator-only tests")
        }
        fn free(&mut self, _offset: u64, _std_size: u64) {}
    }

    /// Every slot on a single page shares `std_size = 256`; no neighbour
    /// walk should be triggered since `bias` is always 0.
    #[test]
    fn single_size_stays_within_one_page() {
        let allocator = FixedSize(256);
        let mut ex = Extrapolator::new(4, 4096, 4096);
        for k in [2u64, 5, 9] {
            ex.add(&allocator, 256 * k, 256).unwrap();
        }
        let page = ex.pages().get(0);
        assert_eq!(page.std_size, 256);
        assert_eq!(page.bias, 0);
        assert!(page.is_set(2));
        assert!(page.is_set(5));
        assert!(page.is_set(9));
        assert!(!page.is_set(0));
    }

    /// `std_size = 384` does not divide `page_size = 4096`, so a single
    /// submission at offset 384 must extrapolate across pages 0, 1, 2 with
    /// a bias sequence derived from the forward-walk arithmetic.
    #[test]
    fn cross_page_bin_extrapolates_neighbours() {
        let allocator = FixedSize(384);
        let mut ex = Extrapolator::new(4, 4096, 4096);
        ex.add(&allocator, 384, 384).unwrap();

        assert_eq!(ex.pages().get(0).std_size, 384);
        assert_eq!(ex.pages().get(0).bias, 0);
        assert_eq!(ex.pages().get(1).std_size, 384);
        assert_eq!(ex.pages().get(1).bias, 384 - (4096 % 384));
        assert_eq!(ex.pages().get(2).std_size, 384);
        assert_eq!(ex.pages().highest_touched_page(), Some(2));
    }

    #[test]
    fn collision_on_already_live_slot_is_rejected() {
        let allocator = FixedSize(256);
        let mut ex = Extrapolator::new(2, 4096, 4096);
        ex.add(&allocator, 512, 256).unwrap();
        let err = ex.add(&allocator, 512, 256).unwrap_err();
        assert!(matches!(err, PraError::AlreadyLive { offset: 512 }));
    }

    #[test]
    fn size_above_max_small_size_is_rejected() {
        let allocator = FixedSize(8192);
        let mut ex = Extrapolator::new(2, 4096, 4096);
        let err = ex.add(&allocator, 0, 8192).unwrap_err();
        assert!(matches!(err, PraError::SizeOutOfRange));
    }
}
