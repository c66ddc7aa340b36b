use crate::error::ResetError;

/// The fixed address range `[0, total_size)` an allocator hands
/// out offsets from. It never grows; resetting an allocator
/// replaces its arena wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arena {
    total_size: u64,
}

impl Arena {
    pub fn new(total_size: u64) -> Result<Self, ResetError> {
        if total_size == 0 {
            return Err(ResetError::InvalidArgument);
        }

        Ok(Self { total_size })
    }

    #[inline]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Whether `[offset, offset + size)` lies inside the arena.
    pub fn contains(&self, offset: u64, size: u64) -> bool {
        offset
            .checked_add(size)
            .is_some_and(|end| end <= self.total_size)
    }
}
