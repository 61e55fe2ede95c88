use crate::{
    block::{BlockDevice, Sector, SECTOR_SIZE},
    error::{StorageError, StorageResult},
};

use super::{
    cluster_utils::{le_u16, le_u32},
    types::{Fat32Volume, FAT32_MIN_CLUSTERS},
};

const BOOT_SIGNATURE_OFFSET: usize = 510;
const MBR_TABLE_OFFSET: usize = 446;
const MBR_ENTRY_SIZE: usize = 16;
const BPB_LABEL_OFFSET: usize = 71;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BootLocation {
    /// Sector 0 is a partition table; the volume starts at this block.
    Partition(u32),
    /// Sector 0 is the FAT boot sector itself.
    Superfloppy,
}

pub(crate) fn mount<D: BlockDevice + ?Sized>(dev: &mut D) -> StorageResult<Fat32Volume> {
    let mut sector: Sector = [0u8; SECTOR_SIZE];
    dev.read_block(0, &mut sector)?;

    let partition_start = match locate_boot_sector(&sector) {
        Some(BootLocation::Partition(start)) => {
            dev.read_block(start, &mut sector)?;
            start
        }
        Some(BootLocation::Superfloppy) => 0,
        None => {
            log::warn!("fat: no_fat32_volume");
            return Err(StorageError::InvalidFormat);
        }
    };

    let volume = parse_boot_sector(partition_start, &sector)?;
    log::info!(
        "fat: mounted start={} spc={} fats={} clusters={} root={}",
        volume.partition_start,
        volume.sectors_per_cluster,
        volume.fats,
        volume.cluster_count,
        volume.root_cluster
    );
    Ok(volume)
}

pub(crate) fn locate_boot_sector(sector0: &Sector) -> Option<BootLocation> {
    if sector0[BOOT_SIGNATURE_OFFSET] != 0x55 || sector0[BOOT_SIGNATURE_OFFSET + 1] != 0xAA {
        return None;
    }

    if !is_jump_opcode(sector0[0]) {
        return (0..4).find_map(|idx| {
            let base = MBR_TABLE_OFFSET + idx * MBR_ENTRY_SIZE;
            let boot_indicator = sector0[base];
            let part_type = sector0[base + 4];
            let usable = matches!(boot_indicator, 0x00 | 0x80) && matches!(part_type, 0x0B | 0x0C);
            usable.then(|| BootLocation::Partition(le_u32(sector0, base + 8)))
        });
    }

    let bytes_per_sector = le_u16(sector0, 11);
    matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096).then_some(BootLocation::Superfloppy)
}

fn is_jump_opcode(byte: u8) -> bool {
    matches!(byte, 0xEB | 0xE9)
}

pub(crate) fn parse_boot_sector(partition_start: u32, boot: &Sector) -> StorageResult<Fat32Volume> {
    let bytes_per_sector = le_u16(boot, 11);
    let sectors_per_cluster = boot[13];
    let reserved_sectors = le_u16(boot, 14);
    let fats = boot[16];
    let fat_size_16 = le_u16(boot, 22);
    let total_sectors = le_u32(boot, 32);
    let fat_size = le_u32(boot, 36);
    let root_cluster = le_u32(boot, 44);
    let fsinfo_sector = le_u16(boot, 48);

    let reject = |reason: &str| {
        log::warn!("fat: bpb_rejected reason={}", reason);
        Err(StorageError::InvalidFormat)
    };

    if bytes_per_sector as usize != SECTOR_SIZE {
        return reject("bytes_per_sector");
    }
    if sectors_per_cluster == 0 || sectors_per_cluster > 128 || !sectors_per_cluster.is_power_of_two()
    {
        return reject("sectors_per_cluster");
    }
    if !(1..=2).contains(&fats) {
        return reject("fat_count");
    }
    if reserved_sectors == 0 {
        return reject("reserved_sectors");
    }
    if fat_size_16 != 0 || fat_size == 0 {
        return reject("fat_size");
    }
    if total_sectors == 0 {
        return reject("total_sectors");
    }
    if root_cluster < 2 {
        return reject("root_cluster");
    }

    let first_data_sector = fat_size
        .checked_mul(fats as u32)
        .and_then(|fat_sectors| fat_sectors.checked_add(reserved_sectors as u32))
        .filter(|&first| first < total_sectors);
    let Some(first_data_sector) = first_data_sector else {
        return reject("fat_region");
    };

    let data_sectors = total_sectors - first_data_sector;
    let cluster_count = data_sectors / sectors_per_cluster as u32;
    if cluster_count < FAT32_MIN_CLUSTERS {
        return reject("cluster_count");
    }
    if root_cluster > cluster_count.saturating_add(1) {
        return reject("root_cluster");
    }

    let mut bpb_label = [b' '; 11];
    bpb_label.copy_from_slice(&boot[BPB_LABEL_OFFSET..BPB_LABEL_OFFSET + 11]);

    Ok(Fat32Volume {
        partition_start,
        sectors_per_cluster,
        reserved_sectors,
        fats,
        fat_size,
        total_sectors,
        root_cluster,
        fsinfo_sector,
        first_data_sector,
        data_sectors,
        cluster_count,
        bytes_per_cluster: sectors_per_cluster as u32 * SECTOR_SIZE as u32,
        bpb_label,
    })
}
