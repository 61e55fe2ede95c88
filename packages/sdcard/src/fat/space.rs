use crate::{
    block::{BlockDevice, SECTOR_SIZE},
    error::StorageResult,
};

use super::{
    cluster_utils::{le_u32, read_sector},
    types::{Fat32Volume, FsInfo, FAT32_ENTRY_MASK},
};

const FSINFO_LEAD_SIGNATURE: u32 = 0x4161_5252;
const FSINFO_STRUCT_SIGNATURE: u32 = 0x6141_7272;
const FSINFO_TRAIL_SIGNATURE: u32 = 0xAA55_0000;
const FAT_ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 4) as u32;

pub(crate) fn read_fsinfo<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
) -> StorageResult<FsInfo> {
    let sector_no = volume.fsinfo_sector as u32;
    if sector_no == 0 || sector_no >= volume.reserved_sectors as u32 {
        return Ok(FsInfo::default());
    }

    let mut sector = [0u8; SECTOR_SIZE];
    read_sector(dev, volume, sector_no, &mut sector)?;
    Ok(FsInfo {
        valid: le_u32(&sector, 0) == FSINFO_LEAD_SIGNATURE
            && le_u32(&sector, 484) == FSINFO_STRUCT_SIGNATURE
            && le_u32(&sector, 508) == FSINFO_TRAIL_SIGNATURE,
        free_count: le_u32(&sector, 488),
        next_free: le_u32(&sector, 492),
    })
}

/// Counts zero entries of the first FAT over the data clusters only.
pub(crate) fn count_free_clusters<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
) -> StorageResult<u32> {
    let last = volume.last_cluster();
    let mut free = 0u32;
    let mut sector = [0u8; SECTOR_SIZE];

    for fat_sector in 0..volume.fat_size {
        let first_entry = fat_sector * FAT_ENTRIES_PER_SECTOR;
        if first_entry > last {
            break;
        }
        read_sector(
            dev,
            volume,
            volume.reserved_sectors as u32 + fat_sector,
            &mut sector,
        )?;
        free += sector
            .chunks_exact(4)
            .zip(first_entry..)
            .filter(|(raw, cluster)| {
                (2..=last).contains(cluster) && (le_u32(raw, 0) & FAT32_ENTRY_MASK) == 0
            })
            .count() as u32;
    }
    Ok(free)
}

pub(crate) fn free_bytes<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
) -> StorageResult<u64> {
    let fsinfo = read_fsinfo(dev, volume)?;
    let free_clusters = match fsinfo.trusted_free_clusters(volume.cluster_count) {
        Some(count) => count,
        None => {
            log::debug!(
                "fat: fsinfo_untrusted valid={} free={:#x}; scanning fat",
                fsinfo.valid,
                fsinfo.free_count
            );
            count_free_clusters(dev, volume)?
        }
    };
    Ok(free_clusters as u64 * volume.bytes_per_cluster as u64)
}
