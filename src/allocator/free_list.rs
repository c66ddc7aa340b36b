/// A contiguous range of the arena that is not reserved by any
/// allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// Offset of the block within the arena.
    pub offset: u64,
    /// Size of the block in bytes.
    pub size: u64,
}

impl FreeBlock {
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Offset-sorted list of free blocks. Two blocks in the list
/// are never adjacent: inserting a block next to another one
/// merges them on the spot.
#[derive(Debug, Clone)]
pub struct FreeList {
    blocks: Vec<FreeBlock>,
}

impl FreeList {
    /// A list holding a single block that covers `[0, size)`.
    pub fn new(size: u64) -> Self {
        Self {
            blocks: vec![FreeBlock { offset: 0, size }],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FreeBlock> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn largest(&self) -> u64 {
        self.blocks.iter().map(|block| block.size).max().unwrap_or(0)
    }

    #[cfg(test)]
    pub fn total(&self) -> u64 {
        self.blocks.iter().map(|block| block.size).sum()
    }

    /// Find the block to carve `size` bytes aligned to
    /// `alignment` from, returning its index and the aligned
    /// offset.
    pub fn best_fit(&self, size: u64, alignment: u64) -> Option<(usize, u64)> {
        let mut best: Option<(usize, u64)> = None;

        for (index, block) in self.blocks.iter().enumerate() {
            // The allocation starts at the first aligned address
            // of the block. A block is a candidate if the end of
            // the allocation does not go past the end of the
            // block; offsets so large that aligning them or
            // adding the size overflows cannot fit anyway.
            let Some(aligned) = align_up(block.offset, alignment) else {
                continue;
            };
            let fits = aligned
                .checked_add(size)
                .is_some_and(|end| end <= block.end());
            if !fits {
                continue;
            }

            // Keep the smallest candidate. Blocks are visited in
            // offset order and only a strictly smaller block
            // replaces the current one, so ties go to the lowest
            // offset.
            let better = match best {
                Some((current, _)) => block.size < self.blocks[current].size,
                None => true,
            };
            if better {
                best = Some((index, aligned));
            }
        }

        best
    }

    /// Reserve the front of the block at `index` up to `end`,
    /// returning the start of the reserved span. The block keeps
    /// whatever is left after `end`, or disappears if nothing is.
    pub fn take_front(&mut self, index: usize, end: u64) -> u64 {
        let block = &mut self.blocks[index];
        let start = block.offset;
        assert!(
            start <= end && end <= block.end(),
            "reserved span [{start}, {end}) is outside free block [{start}, {})",
            block.end(),
        );

        if end == block.end() {
            self.blocks.remove(index);
        } else {
            block.size = block.end() - end;
            block.offset = end;
        }

        start
    }

    /// Give `[offset, offset + size)` back to the list, merging it
    /// with the blocks right before and after it if they touch.
    pub fn insert(&mut self, offset: u64, size: u64) {
        let mut block = FreeBlock { offset, size };
        let index = self.blocks.partition_point(|b| b.offset < offset);

        // Merge with the following block first: if it starts
        // exactly where the new one ends, absorb it and drop it
        // from the list.
        if let Some(next) = self.blocks.get(index) {
            assert!(
                block.end() <= next.offset,
                "freed span [{}, {}) overlaps free block at {}",
                block.offset,
                block.end(),
                next.offset,
            );
            if block.end() == next.offset {
                block.size += next.size;
                self.blocks.remove(index);
            }
        }

        // Then, if the previous block ends where the new one
        // starts, grow it instead of inserting anything.
        if index > 0 {
            let prev = &mut self.blocks[index - 1];
            assert!(
                prev.end() <= block.offset,
                "freed span [{}, {}) overlaps free block ending at {}",
                block.offset,
                block.end(),
                prev.end(),
            );
            if prev.end() == block.offset {
                prev.size += block.size;
                return;
            }
        }

        self.blocks.insert(index, block);
    }
}

fn align_down(value: u64, alignment: u64) -> u64 {
    // With a power-of-two alignment A, A - 1 has every bit below
    // A set, so !(A - 1) masks them out. For V = 0x3F and A =
    // 0x20:
    //
    //    V = 0011 1111
    //  & M = 1110 0000
    //  ---------------
    //        0010 0000
    value & !(alignment - 1)
}

/// Round `value` up to the next multiple of `alignment`, which
/// must be a power of two. `None` if that multiple does not fit
/// in a `u64`.
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    // Aligning up is aligning down the value pushed forward by
    // one alignment step minus one.
    value
        .checked_add(alignment - 1)
        .map(|value| align_down(value, alignment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(list: &FreeList) -> Vec<(u64, u64)> {
        list.iter().map(|b| (b.offset, b.size)).collect()
    }

    #[test]
    fn align_up_rounds_to_the_next_multiple() {
        assert_eq!(align_up(0, 16), Some(0));
        assert_eq!(align_up(100, 32), Some(128));
        assert_eq!(align_up(128, 32), Some(128));
        assert_eq!(align_up(7, 1), Some(7));
        assert_eq!(align_up(u64::MAX, 2), None);
    }

    #[test]
    fn best_fit_prefers_the_smallest_block() {
        let mut list = FreeList::new(1000);
        list.take_front(0, 1000);
        list.insert(0, 300);
        list.insert(400, 100);
        list.insert(600, 200);

        assert_eq!(list.best_fit(80, 1), Some((1, 400)));
        assert_eq!(list.best_fit(150, 1), Some((2, 600)));
        assert_eq!(list.best_fit(250, 1), Some((0, 0)));
        assert_eq!(list.best_fit(301, 1), None);
    }

    #[test]
    fn best_fit_breaks_ties_by_offset() {
        let mut list = FreeList::new(1000);
        list.take_front(0, 1000);
        list.insert(500, 100);
        list.insert(100, 100);

        assert_eq!(list.best_fit(10, 1), Some((0, 100)));
    }

    #[test]
    fn best_fit_accounts_for_alignment_padding() {
        let mut list = FreeList::new(1000);
        list.take_front(0, 1000);
        // The smaller block cannot hold 64 bytes once its start
        // is rounded up to 64.
        list.insert(10, 100);
        list.insert(200, 300);

        assert_eq!(list.best_fit(64, 64), Some((1, 256)));
    }

    #[test]
    fn take_front_shrinks_or_drops_the_block() {
        let mut list = FreeList::new(100);

        assert_eq!(list.take_front(0, 40), 0);
        assert_eq!(blocks(&list), vec![(40, 60)]);

        assert_eq!(list.take_front(0, 100), 40);
        assert!(list.is_empty());
    }

    #[test]
    fn insert_merges_both_neighbours() {
        let mut list = FreeList::new(300);
        list.take_front(0, 300);

        list.insert(0, 100);
        list.insert(200, 100);
        assert_eq!(blocks(&list), vec![(0, 100), (200, 100)]);

        list.insert(100, 100);
        assert_eq!(blocks(&list), vec![(0, 300)]);
    }

    #[test]
    fn insert_keeps_distant_blocks_apart() {
        let mut list = FreeList::new(300);
        list.take_front(0, 300);

        list.insert(200, 50);
        list.insert(10, 20);
        assert_eq!(blocks(&list), vec![(10, 20), (200, 50)]);
        assert_eq!(list.total(), 70);
        assert_eq!(list.largest(), 50);
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn insert_panics_on_overlap() {
        let mut list = FreeList::new(100);
        list.insert(50, 10);
    }
}
