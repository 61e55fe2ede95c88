use crate::{
    block::{BlockDevice, Sector, SECTOR_SIZE},
    error::{StorageError, StorageResult},
};

use super::types::{Fat32Volume, FAT32_ENTRY_MASK, FAT32_EOC};

pub(crate) fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Reads a volume-relative sector.
pub(crate) fn read_sector<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    sector: u32,
    out: &mut Sector,
) -> StorageResult<()> {
    dev.read_block(volume.absolute(sector), out)
}

fn fat_entry_location(volume: &Fat32Volume, cluster: u32) -> StorageResult<(u32, usize)> {
    let byte_offset = cluster as u64 * 4;
    let sector_offset = (byte_offset / SECTOR_SIZE as u64) as u32;
    if cluster < 2 || sector_offset >= volume.fat_size {
        return Err(StorageError::InvalidParameter);
    }
    Ok((
        volume.reserved_sectors as u32 + sector_offset,
        (byte_offset % SECTOR_SIZE as u64) as usize,
    ))
}

/// Next-link value of `cluster` with the reserved top bits masked off.
pub fn read_fat_entry<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    cluster: u32,
) -> StorageResult<u32> {
    let (sector_no, index) = fat_entry_location(volume, cluster)?;
    let mut sector = [0u8; SECTOR_SIZE];
    read_sector(dev, volume, sector_no, &mut sector)?;
    Ok(le_u32(&sector, index) & FAT32_ENTRY_MASK)
}

/// Updates the entry in every FAT copy, keeping the reserved top bits.
pub fn write_fat_entry<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    cluster: u32,
    value: u32,
) -> StorageResult<()> {
    let (sector_no, index) = fat_entry_location(volume, cluster)?;
    for fat_idx in 0..volume.fats as u32 {
        let lba = sector_no + fat_idx * volume.fat_size;
        let mut sector = [0u8; SECTOR_SIZE];
        read_sector(dev, volume, lba, &mut sector)?;
        let old = le_u32(&sector, index);
        let new = (old & !FAT32_ENTRY_MASK) | (value & FAT32_ENTRY_MASK);
        sector[index..index + 4].copy_from_slice(&new.to_le_bytes());
        dev.write_block(volume.absolute(lba), &sector)?;
    }
    Ok(())
}

/// `None` at end of chain. A link to a reserved or out-of-range cluster is corruption.
pub fn next_cluster<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    cluster: u32,
) -> StorageResult<Option<u32>> {
    let value = read_fat_entry(dev, volume, cluster)?;
    if value >= FAT32_EOC {
        return Ok(None);
    }
    if !volume.is_data_cluster(value) {
        log::warn!("fat: bad_link cluster={} value={:#x}", cluster, value);
        return Err(StorageError::ReadFailed);
    }
    Ok(Some(value))
}

/// Walks up to `index` links from `first`, stopping early at end of chain.
/// Returns the cluster reached and its chain index.
pub(crate) fn cluster_at_index<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    first: u32,
    index: u32,
) -> StorageResult<(u32, u32)> {
    let mut cluster = first;
    let mut reached = 0u32;
    while reached < index {
        match next_cluster(dev, volume, cluster)? {
            Some(next) => {
                cluster = next;
                reached += 1;
            }
            None => break,
        }
    }
    Ok((cluster, reached))
}
