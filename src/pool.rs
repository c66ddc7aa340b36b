mod backing;
mod device_memory;
mod group;
mod shared;

pub use backing::{BackingProvider, BudgetExceeded, HostBlock, HostProvider};
pub use device_memory::{DeviceMemoryProvider, MemoryUse};
pub use group::{GroupRegion, PoolGroup, PoolGroupConfig, PoolId};
pub use shared::{RegionLease, SharedPool};

use log::*;

use crate::{
    allocator::{Allocator, PoolStats},
    error::PoolError,
};

/// Configuration of a single pool, validated once by
/// [`Pool::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Size of the backing resource, in bytes.
    pub size: u64,
    /// Alignment every region gets at the very least, on top of
    /// the one asked for (e.g. the device's `nonCoherentAtomSize`
    /// for host-visible memory). Must be a power of two.
    pub min_alignment: u64,
    /// Name used in log messages.
    pub label: String,
}

impl PoolConfig {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            min_alignment: 1,
            label: String::from("pool"),
        }
    }

    fn validate(&self) -> Result<(), PoolError> {
        if self.size == 0 {
            return Err(PoolError::InvalidConfig("pool size must be greater than zero"));
        }
        if !self.min_alignment.is_power_of_two() {
            return Err(PoolError::InvalidConfig("minimum alignment must be a power of two"));
        }
        Ok(())
    }
}

/// A live lease of `size` bytes at `offset` in a pool.
///
/// This is a plain value: the pool alone knows whether it is still
/// live. Once passed to [`Pool::release`] it must not be used again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    offset: u64,
    size: u64,
}

impl Region {
    pub(crate) fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// One backing resource sliced into regions by an [`Allocator`].
#[derive(Debug)]
pub struct Pool<R> {
    config: PoolConfig,
    allocator: Allocator,
    resource: R,
    /// Bumped by [`Pool::clear`]; regions issued under an older
    /// generation no longer belong to the pool.
    generation: u64,
}

impl<R> Pool<R> {
    /// Acquire a backing resource of `config.size` bytes from
    /// `provider` and set up an empty arena over it.
    pub fn create<B>(config: PoolConfig, provider: &mut B) -> Result<Self, PoolError>
    where
        B: BackingProvider<Resource = R>,
    {
        config.validate()?;
        let allocator = Allocator::new(config.size)?;

        // If the environment cannot supply the resource, there is
        // nothing to sub-allocate: the provider's error goes back
        // to the caller as the source, without retrying.
        let resource = provider
            .acquire(config.size)
            .map_err(|source| PoolError::BackingResourceFailed {
                size: config.size,
                source,
            })?;

        info!("Created pool '{}' of {} bytes.", config.label, config.size);
        Ok(Self {
            config,
            allocator,
            resource,
            generation: 0,
        })
    }

    pub fn new_region(&mut self, size: u64, alignment: u64) -> Result<Region, PoolError> {
        // Raise the alignment to the pool minimum. An invalid
        // alignment is passed through as is so the allocator
        // rejects it.
        let alignment = if alignment.is_power_of_two() {
            alignment.max(self.config.min_alignment)
        } else {
            alignment
        };

        let offset = self.allocator.allocate(size, alignment)?;
        Ok(Region::new(offset, size))
    }

    /// Return `region` to the pool. Releasing a region twice, or
    /// one from another pool, fails with an unknown offset.
    pub fn release(&mut self, region: Region) -> Result<(), PoolError> {
        self.allocator.free(region.offset)?;
        Ok(())
    }

    /// Whether `region` is currently live in this pool.
    pub fn contains(&self, region: Region) -> bool {
        self.allocator
            .record(region.offset)
            .is_some_and(|record| record.requested_size == region.size)
    }

    /// Drop every region at once. Only meant for recreating the
    /// pool's contents wholesale: outstanding regions become
    /// invalid.
    pub fn clear(&mut self) -> Result<(), PoolError> {
        let live = self.allocator.live_allocations();
        if live > 0 {
            warn!("Clearing pool '{}' with {live} live regions.", self.config.label);
        }

        self.allocator.reset(self.config.size)?;
        self.generation += 1;
        Ok(())
    }

    /// Number of times the pool has been cleared.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hand the backing resource back to `provider`.
    pub fn destroy<B>(self, provider: &mut B)
    where
        B: BackingProvider<Resource = R>,
    {
        let live = self.allocator.live_allocations();
        if live > 0 {
            warn!("Destroying pool '{}' with {live} live regions.", self.config.label);
        }

        provider.release(self.resource);
        info!("Destroyed pool '{}'.", self.config.label);
    }

    /// The backing resource regions are bound into.
    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn resource_mut(&mut self) -> &mut R {
        &mut self.resource
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn size(&self) -> u64 {
        self.config.size
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn stats(&self) -> PoolStats {
        self.allocator.stats()
    }
}
