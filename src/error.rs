use thiserror::Error;

/// Errors returned by [`Allocator::allocate`](crate::Allocator::allocate).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// A zero-sized region was requested.
    #[error("cannot allocate a zero-sized region")]
    InvalidSize,
    /// The requested alignment is not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(u64),
    /// No free block can hold the request with its alignment.
    #[error("out of memory: no free block fits {size} bytes aligned to {alignment}")]
    OutOfMemory { size: u64, alignment: u64 },
}

impl AllocError {
    /// Whether the error comes from a broken caller contract rather
    /// than from the arena being full.
    pub fn is_programmer_error(&self) -> bool {
        !matches!(self, AllocError::OutOfMemory { .. })
    }
}

/// Errors returned by [`Allocator::free`](crate::Allocator::free).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeError {
    /// No live allocation starts at this offset: it was never
    /// allocated, or it was already freed.
    #[error("no live allocation at offset {0}")]
    UnknownOffset(u64),
}

/// Errors returned by [`Allocator::reset`](crate::Allocator::reset).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetError {
    #[error("arena size must be greater than zero")]
    InvalidArgument,
}

/// Errors surfaced by pools and pool groups.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),
    /// The provider could not supply the backing resource. The
    /// provider's own error is kept as the source.
    #[error("failed to acquire a backing resource of {size} bytes")]
    BackingResourceFailed {
        size: u64,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Free(#[from] FreeError),
    #[error(transparent)]
    Reset(#[from] ResetError),
    /// A group handle names a pool the group does not own (anymore).
    #[error("no pool with id {0} in this group")]
    UnknownPool(u64),
}

impl PoolError {
    /// True for the conditions an operator may see in a healthy
    /// program: the arena is full, or the environment could not
    /// supply memory. Everything else is a bug in the caller.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            PoolError::BackingResourceFailed { .. }
                | PoolError::Alloc(AllocError::OutOfMemory { .. })
        )
    }
}
