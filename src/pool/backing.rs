use anyhow::{anyhow, Result};
use thiserror::Error;

use super::Region;

/// Source of the single large resource a pool sub-allocates.
///
/// The pool never looks inside the resource: it only asks for one
/// of a given size when it is created, and hands it back when it
/// is destroyed.
pub trait BackingProvider {
    type Resource;

    /// Acquire a resource of at least `size` bytes.
    fn acquire(&mut self, size: u64) -> Result<Self::Resource>;

    /// Give back a resource obtained from [`acquire`](Self::acquire).
    fn release(&mut self, resource: Self::Resource);
}

/// A [`HostProvider`] request that would take more bytes than its
/// budget has left.
#[derive(Error, Debug)]
#[error("host budget exceeded: requested {requested} bytes, {available} available")]
pub struct BudgetExceeded {
    pub requested: u64,
    pub available: u64,
}

/// Plain host memory used as a backing resource, e.g. for staging
/// data before it is copied to the device.
#[derive(Debug)]
pub struct HostBlock {
    bytes: Box<[u8]>,
}

impl HostBlock {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// The bytes covered by `region`, or `None` if the region does
    /// not fit in this block.
    pub fn slice(&self, region: Region) -> Option<&[u8]> {
        let (start, end) = host_range(region)?;
        self.bytes.get(start..end)
    }

    pub fn slice_mut(&mut self, region: Region) -> Option<&mut [u8]> {
        let (start, end) = host_range(region)?;
        self.bytes.get_mut(start..end)
    }
}

fn host_range(region: Region) -> Option<(usize, usize)> {
    let start = usize::try_from(region.offset()).ok()?;
    let end = usize::try_from(region.end()).ok()?;
    Some((start, end))
}

/// Provider of zero-initialized host blocks, optionally capped by
/// a total byte budget.
#[derive(Debug, Default)]
pub struct HostProvider {
    budget: Option<u64>,
    outstanding: u64,
}

impl HostProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: u64) -> Self {
        Self {
            budget: Some(budget),
            outstanding: 0,
        }
    }

    /// Bytes currently handed out and not released.
    pub fn outstanding(&self) -> u64 {
        self.outstanding
    }
}

impl BackingProvider for HostProvider {
    type Resource = HostBlock;

    fn acquire(&mut self, size: u64) -> Result<HostBlock> {
        // Refuse the request if it would go past the budget, so
        // callers see the same failure a device running out of
        // memory would produce.
        if let Some(budget) = self.budget {
            let available = budget - self.outstanding;
            if size > available {
                return Err(anyhow!(BudgetExceeded {
                    requested: size,
                    available,
                }));
            }
        }

        // Running out of host memory is reported like any other
        // acquisition failure instead of aborting the process.
        let len = usize::try_from(size)?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|e| anyhow!("cannot allocate {size} bytes of host memory: {e}"))?;
        bytes.resize(len, 0);

        self.outstanding += size;
        Ok(HostBlock {
            bytes: bytes.into_boxed_slice(),
        })
    }

    fn release(&mut self, resource: HostBlock) {
        self.outstanding -= resource.size();
    }
}
