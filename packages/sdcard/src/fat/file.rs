use core::cmp;

use crate::{
    block::{BlockDevice, SECTOR_SIZE},
    error::{StorageError, StorageResult},
};

use super::{
    cluster_utils::{cluster_at_index, next_cluster, read_sector},
    types::{Fat32Volume, FileHandle},
};

/// Copies up to `buf.len()` bytes from the current position. Stops early, without error,
/// when the chain ends before the recorded size.
pub(crate) fn read<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    file: &mut FileHandle,
    buf: &mut [u8],
) -> StorageResult<usize> {
    if file.position >= file.size {
        return Ok(0);
    }
    let wanted = cmp::min(buf.len(), (file.size - file.position) as usize);
    let bytes_per_cluster = volume.bytes_per_cluster;
    let mut sector = [0u8; SECTOR_SIZE];
    let mut total = 0usize;

    while total < wanted {
        let needed_index = file.position / bytes_per_cluster;
        while file.cluster_index < needed_index {
            match next_cluster(dev, volume, file.current_cluster)? {
                Some(next) => {
                    file.current_cluster = next;
                    file.cluster_index += 1;
                }
                None => {
                    log::debug!(
                        "fat: short_chain start={} position={}",
                        file.start_cluster,
                        file.position
                    );
                    return Ok(total);
                }
            }
        }
        if !volume.is_data_cluster(file.current_cluster) {
            log::warn!("fat: bad_file_cluster cluster={}", file.current_cluster);
            return Err(StorageError::ReadFailed);
        }

        let offset_in_cluster = file.position % bytes_per_cluster;
        let sector_no = volume.cluster_to_sector(file.current_cluster)
            + offset_in_cluster / SECTOR_SIZE as u32;
        let byte_in_sector = offset_in_cluster as usize % SECTOR_SIZE;
        read_sector(dev, volume, sector_no, &mut sector)?;

        let chunk = cmp::min(SECTOR_SIZE - byte_in_sector, wanted - total);
        buf[total..total + chunk].copy_from_slice(&sector[byte_in_sector..byte_in_sector + chunk]);
        total += chunk;
        file.position += chunk as u32;
    }
    Ok(total)
}

/// Moves to `position` clamped to the file size, re-walking the chain from its start.
pub(crate) fn seek<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    file: &mut FileHandle,
    position: u32,
) -> StorageResult<()> {
    let position = cmp::min(position, file.size);
    let (cluster, index) = if volume.is_data_cluster(file.start_cluster) {
        cluster_at_index(
            dev,
            volume,
            file.start_cluster,
            position / volume.bytes_per_cluster,
        )?
    } else {
        (file.start_cluster, 0)
    };
    file.current_cluster = cluster;
    file.cluster_index = index;
    file.position = position;
    Ok(())
}
