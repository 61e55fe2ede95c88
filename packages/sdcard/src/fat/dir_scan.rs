use crate::{
    block::{BlockDevice, SECTOR_SIZE},
    error::{StorageError, StorageResult},
};

use super::{
    cluster_utils::{le_u16, le_u32, next_cluster, read_sector},
    names_lfn::{short_name_to_text, LfnState},
    types::{
        Attributes, DirectoryCursor, EntryName, Fat32Volume, FatTimestamp, ResolvedEntry,
        DIR_ENTRY_E5_ESCAPE, DIR_ENTRY_END, DIR_ENTRY_FREE, DIR_ENTRY_SIZE, MAX_DIR_BYTES,
    },
};

/// Next short entry of the directory, volume labels and dot entries included.
/// `Ok(None)` once the end marker or the end of the chain is reached.
pub(crate) fn next_raw_entry<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    cursor: &mut DirectoryCursor,
) -> StorageResult<Option<ResolvedEntry>> {
    let mut lfn = LfnState::new();
    let mut sector = [0u8; SECTOR_SIZE];
    let mut loaded = None;

    while !cursor.end_reached {
        if cursor.position >= MAX_DIR_BYTES || !volume.is_data_cluster(cursor.current_cluster) {
            log::warn!(
                "fat: dir_walk_corrupt start={} cluster={} position={}",
                cursor.start_cluster,
                cursor.current_cluster,
                cursor.position
            );
            return Err(StorageError::ReadFailed);
        }

        let offset_in_cluster = cursor.position % volume.bytes_per_cluster;
        let sector_no = volume.cluster_to_sector(cursor.current_cluster)
            + offset_in_cluster / SECTOR_SIZE as u32;
        if loaded != Some(sector_no) {
            read_sector(dev, volume, sector_no, &mut sector)?;
            loaded = Some(sector_no);
        }

        let base = offset_in_cluster as usize % SECTOR_SIZE;
        let raw = &sector[base..base + DIR_ENTRY_SIZE];
        let found = match raw[0] {
            DIR_ENTRY_END => {
                cursor.end_reached = true;
                None
            }
            DIR_ENTRY_FREE => {
                lfn.clear();
                None
            }
            _ if Attributes::from_bits(raw[11]).is_long_name() => {
                lfn.consume(raw);
                None
            }
            _ => {
                let entry = parse_entry(raw, &lfn);
                lfn.clear();
                Some(entry)
            }
        };

        cursor.position += DIR_ENTRY_SIZE as u32;
        if !cursor.end_reached && cursor.position % volume.bytes_per_cluster == 0 {
            match next_cluster(dev, volume, cursor.current_cluster)? {
                Some(next) => cursor.current_cluster = next,
                None => cursor.end_reached = true,
            }
        }

        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

pub(crate) fn parse_entry(raw: &[u8], lfn: &LfnState) -> ResolvedEntry {
    let mut short_name = [0u8; 11];
    short_name.copy_from_slice(&raw[..11]);
    let long_name = lfn.long_name_for(&short_name);
    if short_name[0] == DIR_ENTRY_E5_ESCAPE {
        short_name[0] = DIR_ENTRY_FREE;
    }

    let name: EntryName = long_name.unwrap_or_else(|| short_name_to_text(&short_name, true));
    let cluster_hi = le_u16(raw, 20) as u32;
    let cluster_lo = le_u16(raw, 26) as u32;
    ResolvedEntry {
        name,
        short_name,
        attributes: Attributes::from_bits(raw[11]),
        size: le_u32(raw, 28),
        first_cluster: (cluster_hi << 16) | cluster_lo,
        modified: FatTimestamp {
            time: le_u16(raw, 22),
            date: le_u16(raw, 24),
        },
    }
}

/// Case-insensitive lookup by long name or 8.3 alias. Volume labels never match.
pub(crate) fn find_entry<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    dir_cluster: u32,
    name: &str,
) -> StorageResult<Option<ResolvedEntry>> {
    let mut cursor = DirectoryCursor::at(dir_cluster, 0);
    while let Some(entry) = next_raw_entry(dev, volume, &mut cursor)? {
        if entry.attributes.is_volume_label() {
            continue;
        }
        if entry.name.eq_ignore_ascii_case(name) {
            return Ok(Some(entry));
        }
        let alias: heapless::String<12> = short_name_to_text(&entry.short_name, false);
        if alias.eq_ignore_ascii_case(name) {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

/// Label from the root directory's volume-id entry.
pub(crate) fn find_volume_label<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
) -> StorageResult<Option<[u8; 11]>> {
    let mut cursor = DirectoryCursor::at(volume.root_cluster, 0);
    while let Some(entry) = next_raw_entry(dev, volume, &mut cursor)? {
        if entry.attributes.is_volume_label() {
            return Ok(Some(entry.short_name));
        }
    }
    Ok(None)
}
