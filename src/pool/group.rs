use log::*;

use super::{backing::BackingProvider, Pool, PoolConfig, Region};
use crate::{
    allocator::PoolStats,
    error::{AllocError, PoolError},
};

/// Identifier of a pool within a group. Ids are never reused, so a
/// handle to a trimmed pool cannot alias a newer one.
pub type PoolId = u64;

/// Configuration of a [`PoolGroup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolGroupConfig {
    /// Size of each pool the group creates. Requests larger than
    /// this get a pool of their own, sized to fit.
    pub block_size: u64,
    /// Minimum alignment applied to every region.
    pub min_alignment: u64,
    pub label: String,
}

impl PoolGroupConfig {
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size,
            min_alignment: 1,
            label: String::from("group"),
        }
    }
}

/// A region handed out by a [`PoolGroup`], tagged with the pool it
/// lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupRegion {
    pub pool: PoolId,
    pub region: Region,
}

struct GroupEntry<R> {
    id: PoolId,
    pool: Pool<R>,
}

/// A growable set of pools drawing their resources from one
/// provider: when no existing pool can serve a request, a new one
/// is created.
pub struct PoolGroup<B: BackingProvider> {
    config: PoolGroupConfig,
    provider: B,
    pools: Vec<GroupEntry<B::Resource>>,
    id_counter: PoolId,
}

impl<B: BackingProvider> PoolGroup<B> {
    pub fn new(config: PoolGroupConfig, provider: B) -> Result<Self, PoolError> {
        if config.block_size == 0 {
            return Err(PoolError::InvalidConfig("block size must be greater than zero"));
        }
        if !config.min_alignment.is_power_of_two() {
            return Err(PoolError::InvalidConfig("minimum alignment must be a power of two"));
        }

        Ok(Self {
            config,
            provider,
            pools: Vec::new(),
            id_counter: 0,
        })
    }

    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<GroupRegion, PoolError> {
        // Check the request up front: a request no pool could ever
        // accept must not make the group grow.
        if size == 0 {
            error!("Rejected a zero-sized allocation from group '{}'.", self.config.label);
            return Err(AllocError::InvalidSize.into());
        }
        if !alignment.is_power_of_two() {
            error!(
                "Rejected allocation from group '{}': alignment {alignment} is not a power of two.",
                self.config.label,
            );
            return Err(AllocError::InvalidAlignment(alignment).into());
        }

        // Try the existing pools, oldest first. Running out of
        // memory in one pool just means moving on to the next.
        for entry in &mut self.pools {
            match entry.pool.new_region(size, alignment) {
                Ok(region) => {
                    return Ok(GroupRegion {
                        pool: entry.id,
                        region,
                    })
                }
                Err(PoolError::Alloc(AllocError::OutOfMemory { .. })) => continue,
                Err(error) => return Err(error),
            }
        }

        // Every pool is full: create a new one. An empty pool
        // always starts at offset 0, which satisfies any
        // alignment, so `size` bytes are enough for an oversized
        // request.
        let pool_size = self.config.block_size.max(size);
        let id = self.id_counter;
        debug!(
            "Growing group '{}' with pool {id} of {pool_size} bytes.",
            self.config.label,
        );

        let config = PoolConfig {
            size: pool_size,
            min_alignment: self.config.min_alignment,
            label: format!("{}#{id}", self.config.label),
        };
        let mut pool = Pool::create(config, &mut self.provider)?;
        self.id_counter += 1;

        let region = pool.new_region(size, alignment)?;
        self.pools.push(GroupEntry { id, pool });

        Ok(GroupRegion { pool: id, region })
    }

    pub fn release(&mut self, region: GroupRegion) -> Result<(), PoolError> {
        let entry = self
            .pools
            .iter_mut()
            .find(|entry| entry.id == region.pool)
            .ok_or(PoolError::UnknownPool(region.pool))?;

        entry.pool.release(region.region)
    }

    /// Destroy the pools that hold no live region, returning their
    /// resources to the provider. Returns how many were destroyed.
    pub fn trim(&mut self) -> usize {
        let (empty, kept): (Vec<_>, Vec<_>) = self
            .pools
            .drain(..)
            .partition(|entry| entry.pool.allocator().is_empty());
        self.pools = kept;

        let count = empty.len();
        for entry in empty {
            entry.pool.destroy(&mut self.provider);
        }

        if count > 0 {
            debug!("Trimmed {count} empty pools from group '{}'.", self.config.label);
        }
        count
    }

    /// The pool a region was allocated from.
    pub fn pool(&self, id: PoolId) -> Option<&Pool<B::Resource>> {
        self.pools
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.pool)
    }

    pub fn pool_mut(&mut self, id: PoolId) -> Option<&mut Pool<B::Resource>> {
        self.pools
            .iter_mut()
            .find(|entry| entry.id == id)
            .map(|entry| &mut entry.pool)
    }

    /// The backing resource to bind `region` into.
    pub fn resource(&self, region: &GroupRegion) -> Option<&B::Resource> {
        self.pool(region.pool).map(Pool::resource)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn provider(&self) -> &B {
        &self.provider
    }

    pub fn stats(&self) -> PoolStats {
        self.pools
            .iter()
            .fold(PoolStats::default(), |mut stats, entry| {
                stats.merge(&entry.pool.stats());
                stats
            })
    }

    /// Destroy every pool and give back the provider.
    pub fn destroy(mut self) -> B {
        for entry in self.pools.drain(..) {
            entry.pool.destroy(&mut self.provider);
        }
        self.provider
    }
}
