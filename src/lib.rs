//! Sub-allocation of large backing resources (device memory blocks,
//! staging buffers) into aligned regions.
//!
//! An [`Allocator`] does the bookkeeping over a fixed arena, a
//! [`Pool`] ties one to a resource obtained from a
//! [`BackingProvider`], and a [`PoolGroup`] adds pools on demand.

pub mod allocator;
pub mod error;
pub mod pool;

pub use allocator::{Allocator, Arena, FreeBlock, PoolStats, UsedRecord};
pub use error::{AllocError, FreeError, PoolError, ResetError};
pub use pool::{
    BackingProvider, DeviceMemoryProvider, GroupRegion, HostBlock, HostProvider, MemoryUse, Pool,
    PoolConfig, PoolGroup, PoolGroupConfig, PoolId, Region, RegionLease, SharedPool,
};
