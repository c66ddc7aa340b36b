use anyhow::Result;
use log::*;

use regionpool::{GroupRegion, HostBlock, HostProvider, PoolGroup, PoolGroupConfig};

/// Size of each staging pool.
const BLOCK_SIZE: u64 = 64 * 1024;

/// Total host memory the staging pools may take.
const HOST_BUDGET: u64 = 4 * BLOCK_SIZE;

/// Uploads of a typical frame: name, size and alignment (vertex
/// data on 16 bytes, uniform buffers on the usual 256-byte offset
/// alignment, textures on 512).
const UPLOADS: &[(&str, u64, u64)] = &[
    ("terrain vertices", 24_576, 16),
    ("terrain indices", 6_144, 4),
    ("camera uniforms", 192, 256),
    ("albedo texture", 49_152, 512),
    ("light uniforms", 320, 256),
    ("mesh vertices", 18_000, 16),
    ("normal texture", 49_152, 512),
    ("mesh indices", 4_500, 4),
    ("shadow map", 300_000, 512),
    ("particle vertices", 12_000, 16),
];

fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let config = PoolGroupConfig {
        block_size: BLOCK_SIZE,
        min_alignment: 4,
        label: String::from("staging"),
    };
    let mut group = PoolGroup::new(config, HostProvider::with_budget(HOST_BUDGET))?;

    // Stage every upload. Running out of memory is reported and
    // the upload skipped; anything else is a bug and ends the run.
    let mut staged = Vec::new();
    for (index, &(name, size, alignment)) in UPLOADS.iter().enumerate() {
        match group.allocate(size, alignment) {
            Ok(region) => {
                info!(
                    "Staged '{name}' in pool {} at [{}, {}).",
                    region.pool,
                    region.region.offset(),
                    region.region.end(),
                );
                fill(&mut group, region, index as u8);
                staged.push((name, region));
            }
            Err(e) if e.is_resource_exhausted() => warn!("Skipped '{name}': {e}"),
            Err(e) => return Err(e.into()),
        }
    }
    log_stats(&group);

    // Once the copies are submitted, the staging regions go back
    // to their pools. Release every other one, then the rest.
    for (name, region) in staged.iter().step_by(2) {
        group.release(*region)?;
        debug!("Released '{name}'.");
    }
    log_stats(&group);

    for (name, region) in staged.iter().skip(1).step_by(2) {
        group.release(*region)?;
        debug!("Released '{name}'.");
    }
    let trimmed = group.trim();
    info!("Trimmed {trimmed} empty pools.");

    let provider = group.destroy();
    info!("Host memory still outstanding: {} bytes.", provider.outstanding());
    Ok(())
}

fn fill(group: &mut PoolGroup<HostProvider>, region: GroupRegion, value: u8) {
    let bytes = group
        .pool_mut(region.pool)
        .map(|pool| pool.resource_mut())
        .and_then(|block: &mut HostBlock| block.slice_mut(region.region));

    if let Some(bytes) = bytes {
        bytes.fill(value);
    }
}

fn log_stats(group: &PoolGroup<HostProvider>) {
    let stats = group.stats();
    info!(
        "{} pools, {} live regions: {} of {} bytes used, largest free block {} bytes ({} free blocks).",
        group.pool_count(),
        stats.live_regions,
        stats.used_bytes,
        stats.capacity,
        stats.largest_free_block,
        stats.free_block_count,
    );
}
