use std::sync::Arc;

use log::error;
use parking_lot::{Mutex, MutexGuard};

use super::{Pool, Region};
use crate::error::PoolError;

/// A pool behind a single lock.
///
/// Every call takes the lock for its whole duration, so a region is
/// searched for and carved out in one step; locking only part of
/// an allocation would let two threads claim the same free block.
pub struct SharedPool<R> {
    inner: Arc<Mutex<Pool<R>>>,
}

impl<R> Clone for SharedPool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> SharedPool<R> {
    pub fn new(pool: Pool<R>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    /// Lock the pool for a sequence of calls.
    pub fn lock(&self) -> MutexGuard<'_, Pool<R>> {
        self.inner.lock()
    }

    /// Allocate a region that goes back to the pool when the
    /// returned lease is dropped.
    pub fn lease(&self, size: u64, alignment: u64) -> Result<RegionLease<R>, PoolError> {
        let mut pool = self.inner.lock();
        let region = pool.new_region(size, alignment)?;

        Ok(RegionLease {
            pool: Arc::clone(&self.inner),
            region,
            generation: pool.generation(),
            detached: false,
        })
    }

    /// Take the pool back once no other handle or lease refers to
    /// it, so it can be destroyed.
    pub fn try_unwrap(self) -> Result<Pool<R>, Self> {
        Arc::try_unwrap(self.inner)
            .map(|mutex| mutex.into_inner())
            .map_err(|inner| Self { inner })
    }
}

/// A region that releases itself when dropped.
pub struct RegionLease<R> {
    pool: Arc<Mutex<Pool<R>>>,
    region: Region,
    generation: u64,
    detached: bool,
}

impl<R> RegionLease<R> {
    pub fn region(&self) -> Region {
        self.region
    }

    /// Stop tracking the region: it stays allocated and the caller
    /// becomes responsible for releasing it.
    pub fn into_region(mut self) -> Region {
        self.detached = true;
        self.region
    }
}

impl<R> Drop for RegionLease<R> {
    fn drop(&mut self) {
        if self.detached {
            return;
        }

        let mut pool = self.pool.lock();

        // After a clear the offset may belong to a newer region, which
        // must not be released in this lease's place.
        if pool.generation() != self.generation {
            error!(
                "Leased region at offset {} outlived a clear of its pool, not releasing it.",
                self.region.offset()
            );
            return;
        }

        // Dropping cannot report errors, so a failed release (the
        // region was already released by hand) is logged.
        if let Err(e) = pool.release(self.region) {
            error!("Failed to release leased region at offset {}: {e}", self.region.offset());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::pool::{HostProvider, PoolConfig};

    fn shared(size: u64) -> SharedPool<crate::pool::HostBlock> {
        let pool = Pool::create(PoolConfig::new(size), &mut HostProvider::new()).unwrap();
        SharedPool::new(pool)
    }

    #[test]
    fn leases_release_on_drop() {
        let pool = shared(256);

        {
            let a = pool.lease(100, 1).unwrap();
            let b = pool.lease(100, 1).unwrap();
            assert_eq!(a.region().offset(), 0);
            assert_eq!(b.region().offset(), 100);
            assert_eq!(pool.lock().stats().live_regions, 2);
        }

        assert_eq!(pool.lock().stats().live_regions, 0);
        assert_eq!(pool.lock().stats().largest_free_block, 256);
    }

    #[test]
    fn leases_from_before_a_clear_leave_new_regions_alone() {
        let pool = shared(128);

        let stale = pool.lease(64, 1).unwrap();
        pool.lock().clear().unwrap();
        let fresh = pool.lock().new_region(64, 1).unwrap();
        assert_eq!(fresh.offset(), stale.region().offset());

        drop(stale);
        assert!(pool.lock().contains(fresh));
        assert_eq!(pool.lock().stats().live_regions, 1);

        // The bytes of the new region are not handed out again.
        assert_eq!(pool.lease(64, 1).unwrap().region().offset(), 64);
        pool.lock().release(fresh).unwrap();
        pool.lock().allocator().check_invariants();
    }

    #[test]
    fn detached_regions_stay_allocated() {
        let pool = shared(64);

        let region = pool.lease(32, 1).unwrap().into_region();
        assert!(pool.lock().contains(region));

        pool.lock().release(region).unwrap();
        assert!(pool.try_unwrap().is_ok());
    }

    #[test]
    fn try_unwrap_waits_for_leases() {
        let pool = shared(64);
        let lease = pool.lease(8, 1).unwrap();

        let pool = pool.try_unwrap().unwrap_err();
        drop(lease);
        let pool = pool.try_unwrap().ok().unwrap();
        assert!(pool.allocator().is_empty());
    }

    #[test]
    fn concurrent_leases_never_overlap() {
        let pool = shared(64 * 1024);

        let regions: Vec<Region> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let pool = pool.clone();
                    scope.spawn(move || {
                        (0..32)
                            .map(|_| pool.lease(48 + i, 16).unwrap().into_region())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        let mut spans: Vec<_> = regions.iter().map(|r| (r.offset(), r.end())).collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
        assert!(regions.iter().all(|r| r.offset() % 16 == 0));

        pool.lock().allocator().check_invariants();
    }
}
