mod arena;
mod free_list;

pub use arena::Arena;
pub use free_list::{align_up, FreeBlock, FreeList};

use std::collections::HashMap;

use log::*;

use crate::error::{AllocError, FreeError, ResetError};

/// Bookkeeping for one live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedRecord {
    /// Aligned offset handed to the caller.
    pub returned_offset: u64,
    /// Start of the reserved span, which includes the alignment
    /// padding in front of `returned_offset`.
    pub reserved_start: u64,
    /// Size of the reserved span, padding included.
    pub reserved_size: u64,
    /// Size the caller asked for.
    pub requested_size: u64,
}

impl UsedRecord {
    #[inline]
    pub fn reserved_end(&self) -> u64 {
        self.reserved_start + self.reserved_size
    }

    #[inline]
    pub fn padding(&self) -> u64 {
        self.returned_offset - self.reserved_start
    }
}

/// Snapshot of how much of an arena is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: u64,
    /// Bytes held by live allocations, alignment padding included.
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub largest_free_block: u64,
    pub free_block_count: usize,
    pub live_regions: usize,
}

impl PoolStats {
    /// Fold the stats of another arena into these.
    pub fn merge(&mut self, other: &PoolStats) {
        self.capacity += other.capacity;
        self.used_bytes += other.used_bytes;
        self.free_bytes += other.free_bytes;
        self.largest_free_block = self.largest_free_block.max(other.largest_free_block);
        self.free_block_count += other.free_block_count;
        self.live_regions += other.live_regions;
    }
}

/// Best-fit free-list allocator over a fixed arena.
///
/// The allocator only deals in offsets: it never touches the
/// memory the arena stands for. It is not synchronized; callers
/// sharing one between threads must lock the whole instance
/// around every call.
#[derive(Debug, Clone)]
pub struct Allocator {
    arena: Arena,
    free: FreeList,
    /// Live allocations, keyed by the offset returned to the
    /// caller.
    used: HashMap<u64, UsedRecord>,
    used_bytes: u64,
}

impl Allocator {
    pub fn new(total_size: u64) -> Result<Self, ResetError> {
        let arena = Arena::new(total_size)?;

        Ok(Self {
            arena,
            free: FreeList::new(total_size),
            used: HashMap::new(),
            used_bytes: 0,
        })
    }

    /// Drop every allocation and start over with an empty arena
    /// of `total_size` bytes. Offsets handed out before the reset
    /// are meaningless afterwards.
    pub fn reset(&mut self, total_size: u64) -> Result<(), ResetError> {
        *self = Self::new(total_size)?;
        Ok(())
    }

    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<u64, AllocError> {
        if size == 0 {
            error!("Rejected a zero-sized allocation.");
            return Err(AllocError::InvalidSize);
        }
        if !alignment.is_power_of_two() {
            error!("Rejected allocation of {size} bytes: alignment {alignment} is not a power of two.");
            return Err(AllocError::InvalidAlignment(alignment));
        }

        // Look for the smallest free block that can hold the
        // aligned allocation. If there is none, the arena is
        // full (or too fragmented) for this request, which is a
        // normal condition the caller has to deal with.
        let Some((index, offset)) = self.free.best_fit(size, alignment) else {
            debug!(
                "Out of memory: {size} bytes aligned to {alignment} (largest free block: {} bytes).",
                self.free.largest(),
            );
            return Err(AllocError::OutOfMemory { size, alignment });
        };

        // Reserve everything from the start of the block to the
        // end of the allocation. The padding in front of the
        // aligned offset goes with the allocation, so it is
        // never handed out on its own.
        let end = offset + size;
        let reserved_start = self.free.take_front(index, end);
        let record = UsedRecord {
            returned_offset: offset,
            reserved_start,
            reserved_size: end - reserved_start,
            requested_size: size,
        };
        self.used.insert(offset, record);
        self.used_bytes += record.reserved_size;

        trace!("Allocated {size} bytes at offset {offset} (reserved [{reserved_start}, {end})).");
        self.debug_check();
        Ok(offset)
    }

    pub fn free(&mut self, offset: u64) -> Result<(), FreeError> {
        // An offset without a live record was either never
        // handed out or has already been freed; both mean the
        // caller lost track of its allocations.
        let Some(record) = self.used.remove(&offset) else {
            error!("Attempted to free unknown offset {offset} (double free?).");
            return Err(FreeError::UnknownOffset(offset));
        };

        // Give the whole reserved span back, padding included.
        // The free list merges it with its neighbours.
        self.used_bytes -= record.reserved_size;
        self.free.insert(record.reserved_start, record.reserved_size);

        trace!(
            "Freed offset {offset} (released [{}, {})).",
            record.reserved_start,
            record.reserved_end(),
        );
        self.debug_check();
        Ok(())
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.arena.total_size()
    }

    /// Bytes reserved by live allocations, alignment padding
    /// included.
    #[inline]
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    #[inline]
    pub fn free_bytes(&self) -> u64 {
        self.capacity() - self.used_bytes
    }

    pub fn largest_free_block(&self) -> u64 {
        self.free.largest()
    }

    pub fn live_allocations(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    pub fn free_blocks(&self) -> impl Iterator<Item = &FreeBlock> {
        self.free.iter()
    }

    /// Live allocations, in no particular order.
    pub fn allocations(&self) -> impl Iterator<Item = &UsedRecord> {
        self.used.values()
    }

    pub fn record(&self, offset: u64) -> Option<&UsedRecord> {
        self.used.get(&offset)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            used_bytes: self.used_bytes,
            free_bytes: self.free_bytes(),
            largest_free_block: self.free.largest(),
            free_block_count: self.free.len(),
            live_regions: self.used.len(),
        }
    }

    /// Panic if the free blocks and reserved spans do not tile the
    /// arena exactly, or if any record or block is malformed.
    pub fn check_invariants(&self) {
        let total = self.capacity();

        // Free blocks must be sorted, non-empty, and never touch
        // each other (touching blocks should have been merged).
        let mut prev_end: Option<u64> = None;
        for block in self.free.iter() {
            assert!(block.size > 0, "empty free block at {}", block.offset);
            assert!(
                self.arena.contains(block.offset, block.size),
                "free block [{}, {}) leaves the arena",
                block.offset,
                block.end(),
            );
            if let Some(end) = prev_end {
                assert!(
                    end < block.offset,
                    "free block at {} is adjacent to or overlaps the previous one",
                    block.offset,
                );
            }
            prev_end = Some(block.end());
        }

        // Each record must hold its requested size past the
        // returned offset, within its reserved span.
        let mut used_bytes = 0;
        for record in self.used.values() {
            assert!(
                record.reserved_start <= record.returned_offset
                    && record.returned_offset + record.requested_size <= record.reserved_end(),
                "malformed record {record:?}",
            );
            assert!(
                self.arena.contains(record.reserved_start, record.reserved_size),
                "record {record:?} leaves the arena",
            );
            used_bytes += record.reserved_size;
        }
        assert_eq!(used_bytes, self.used_bytes, "used byte counter drifted");

        // Laid end to end in address order, free blocks and
        // reserved spans must cover the arena with no gaps and
        // no overlaps.
        let mut spans: Vec<(u64, u64)> = self
            .free
            .iter()
            .map(|block| (block.offset, block.end()))
            .chain(self.used.values().map(|r| (r.reserved_start, r.reserved_end())))
            .collect();
        spans.sort_unstable();

        let mut cursor = 0;
        for (start, end) in spans {
            assert_eq!(start, cursor, "gap or overlap at offset {cursor}");
            cursor = end;
        }
        assert_eq!(cursor, total, "spans do not reach the end of the arena");
    }

    #[inline]
    fn debug_check(&self) {
        #[cfg(debug_assertions)]
        self.check_invariants();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_spans(allocator: &Allocator) -> Vec<(u64, u64)> {
        allocator
            .free_blocks()
            .map(|block| (block.offset, block.end()))
            .collect()
    }

    #[test]
    fn reset_leaves_a_single_free_block() {
        let mut allocator = Allocator::new(512).unwrap();
        allocator.allocate(100, 1).unwrap();

        allocator.reset(1024).unwrap();
        assert_eq!(free_spans(&allocator), vec![(0, 1024)]);
        assert_eq!(allocator.capacity(), 1024);
        assert!(allocator.is_empty());
    }

    #[test]
    fn reset_rejects_zero() {
        let mut allocator = Allocator::new(64).unwrap();
        assert_eq!(allocator.reset(0), Err(ResetError::InvalidArgument));
        assert_eq!(allocator.capacity(), 64);
    }

    #[test]
    fn padding_is_reserved_and_coalesced_back() {
        let mut allocator = Allocator::new(1024).unwrap();

        assert_eq!(allocator.allocate(100, 16), Ok(0));
        assert_eq!(allocator.allocate(200, 32), Ok(128));

        let record = allocator.record(128).unwrap();
        assert_eq!(record.reserved_start, 100);
        assert_eq!(record.reserved_end(), 328);
        assert_eq!(record.padding(), 28);
        assert_eq!(allocator.used_bytes(), 328);

        allocator.free(0).unwrap();
        assert_eq!(free_spans(&allocator), vec![(0, 100), (328, 1024)]);

        allocator.free(128).unwrap();
        assert_eq!(free_spans(&allocator), vec![(0, 1024)]);
        assert_eq!(allocator.used_bytes(), 0);
    }

    #[test]
    fn exhausting_the_arena() {
        let mut allocator = Allocator::new(256).unwrap();

        assert_eq!(allocator.allocate(256, 1), Ok(0));
        assert_eq!(
            allocator.allocate(1, 1),
            Err(AllocError::OutOfMemory { size: 1, alignment: 1 })
        );

        allocator.reset(256).unwrap();
        assert!(matches!(
            allocator.allocate(257, 1),
            Err(AllocError::OutOfMemory { .. })
        ));
        assert_eq!(free_spans(&allocator), vec![(0, 256)]);
    }

    #[test]
    fn invalid_requests_do_not_touch_state() {
        let mut allocator = Allocator::new(128).unwrap();
        allocator.allocate(10, 1).unwrap();
        let before = allocator.stats();

        assert_eq!(allocator.allocate(0, 1), Err(AllocError::InvalidSize));
        assert_eq!(allocator.allocate(8, 0), Err(AllocError::InvalidAlignment(0)));
        assert_eq!(allocator.allocate(8, 24), Err(AllocError::InvalidAlignment(24)));
        assert!(AllocError::InvalidSize.is_programmer_error());
        assert_eq!(allocator.stats(), before);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut allocator = Allocator::new(64).unwrap();
        let offset = allocator.allocate(10, 1).unwrap();

        assert_eq!(allocator.free(offset), Ok(()));
        assert_eq!(allocator.free(offset), Err(FreeError::UnknownOffset(offset)));
    }

    #[test]
    fn freeing_inside_an_allocation_is_rejected() {
        let mut allocator = Allocator::new(64).unwrap();
        allocator.allocate(10, 1).unwrap();

        assert_eq!(allocator.free(5), Err(FreeError::UnknownOffset(5)));
        assert_eq!(allocator.live_allocations(), 1);
    }

    #[test]
    fn best_fit_reuses_the_tightest_hole() {
        let mut allocator = Allocator::new(1000).unwrap();
        let a = allocator.allocate(300, 1).unwrap();
        let _b = allocator.allocate(10, 1).unwrap();
        let c = allocator.allocate(50, 1).unwrap();
        let _d = allocator.allocate(10, 1).unwrap();

        allocator.free(a).unwrap();
        allocator.free(c).unwrap();

        // Holes: [0, 300), [310, 360) and the tail [370, 1000).
        assert_eq!(allocator.allocate(40, 1), Ok(310));
        assert_eq!(allocator.allocate(200, 1), Ok(0));
        assert_eq!(allocator.allocate(400, 1), Ok(370));
    }

    #[test]
    fn identical_traces_give_identical_offsets() {
        let trace = |allocator: &mut Allocator| {
            let mut offsets = Vec::new();
            for (i, size) in [64u64, 17, 300, 5, 128, 33].into_iter().enumerate() {
                offsets.push(allocator.allocate(size, 1 << (i % 5)).unwrap());
            }
            allocator.free(offsets[1]).unwrap();
            allocator.free(offsets[3]).unwrap();
            offsets.push(allocator.allocate(12, 4).unwrap());
            offsets.push(allocator.allocate(20, 8).unwrap());
            offsets
        };

        let mut first = Allocator::new(4096).unwrap();
        let mut second = Allocator::new(4096).unwrap();
        assert_eq!(trace(&mut first), trace(&mut second));
    }

    #[test]
    fn stats_add_up() {
        let mut allocator = Allocator::new(1024).unwrap();
        allocator.allocate(100, 1).unwrap();
        allocator.allocate(10, 64).unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.used_bytes, 138);
        assert_eq!(stats.free_bytes + stats.used_bytes, stats.capacity);
        assert_eq!(stats.largest_free_block, 1024 - 138);
        assert_eq!(stats.free_block_count, 1);
        assert_eq!(stats.live_regions, 2);
    }

    #[test]
    fn huge_alignment_does_not_overflow() {
        let mut allocator = Allocator::new(u64::MAX).unwrap();
        allocator.allocate(1, 1).unwrap();

        assert!(matches!(
            allocator.allocate(1, 1 << 63),
            Ok(offset) if offset == 1 << 63
        ));
        assert!(matches!(
            allocator.allocate(u64::MAX, 1),
            Err(AllocError::OutOfMemory { .. })
        ));
    }
}
