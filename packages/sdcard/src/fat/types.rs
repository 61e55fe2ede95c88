use heapless::String;

use crate::{block::SECTOR_SIZE, SD_NAME_BYTES};

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const FAT32_EOC: u32 = 0x0FFF_FFF8;
pub(crate) const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;
pub(crate) const FAT32_MIN_CLUSTERS: u32 = 65_525;
pub(crate) const MAX_LFN_SLOTS: usize = 20;
pub(crate) const MAX_DIR_DEPTH: usize = 16;
/// FAT caps a directory at 65536 entries.
pub(crate) const MAX_DIR_BYTES: u32 = 65_536 * DIR_ENTRY_SIZE as u32;
pub(crate) const DIR_ENTRY_END: u8 = 0x00;
pub(crate) const DIR_ENTRY_FREE: u8 = 0xE5;
pub(crate) const DIR_ENTRY_E5_ESCAPE: u8 = 0x05;

pub type EntryName = String<SD_NAME_BYTES>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attributes(u8);

impl Attributes {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_ID: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;
    pub const LONG_NAME: u8 = 0x0F;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, mask: u8) -> bool {
        (self.0 & mask) == mask
    }

    pub const fn is_long_name(self) -> bool {
        (self.0 & 0x3F) == Self::LONG_NAME
    }

    pub const fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    pub const fn is_volume_label(self) -> bool {
        self.contains(Self::VOLUME_ID)
    }

    pub const fn is_hidden(self) -> bool {
        self.contains(Self::HIDDEN)
    }

    pub const fn is_system(self) -> bool {
        self.contains(Self::SYSTEM)
    }

    pub const fn is_read_only(self) -> bool {
        self.contains(Self::READ_ONLY)
    }

    pub const fn is_archive(self) -> bool {
        self.contains(Self::ARCHIVE)
    }
}

/// Packed DOS date and time of the last write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
}

impl FatTimestamp {
    pub const fn year(self) -> u16 {
        1980 + (self.date >> 9)
    }

    pub const fn month(self) -> u8 {
        ((self.date >> 5) & 0x0F) as u8
    }

    pub const fn day(self) -> u8 {
        (self.date & 0x1F) as u8
    }

    pub const fn hour(self) -> u8 {
        (self.time >> 11) as u8
    }

    pub const fn minute(self) -> u8 {
        ((self.time >> 5) & 0x3F) as u8
    }

    pub const fn second(self) -> u8 {
        ((self.time & 0x1F) * 2) as u8
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub name: EntryName,
    /// Raw 8.3 field with a leading 0x05 restored to 0xE5.
    pub short_name: [u8; 11],
    pub attributes: Attributes,
    pub size: u32,
    pub first_cluster: u32,
    pub modified: FatTimestamp,
}

impl ResolvedEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_file(&self) -> bool {
        !self.attributes.is_directory() && !self.attributes.is_volume_label()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fat32Volume {
    /// Absolute block of the boot sector; every other sector number is relative to it.
    pub partition_start: u32,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fats: u8,
    pub fat_size: u32,
    pub total_sectors: u32,
    pub root_cluster: u32,
    pub fsinfo_sector: u16,
    pub first_data_sector: u32,
    pub data_sectors: u32,
    pub cluster_count: u32,
    pub bytes_per_cluster: u32,
    pub bpb_label: [u8; 11],
}

impl Fat32Volume {
    /// First sector of `cluster`; callers pass data clusters only (>= 2).
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        cluster
            .saturating_sub(2)
            .saturating_mul(self.sectors_per_cluster as u32)
            .saturating_add(self.first_data_sector)
    }

    pub fn last_cluster(&self) -> u32 {
        self.cluster_count.saturating_add(1)
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        (2..=self.last_cluster()).contains(&cluster)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_sectors as u64 * SECTOR_SIZE as u64
    }

    pub(crate) fn absolute(&self, sector: u32) -> u32 {
        self.partition_start.saturating_add(sector)
    }

    /// Directory entries store 0 for "the root" in `..`.
    pub(crate) fn directory_cluster(&self, first_cluster: u32) -> u32 {
        if first_cluster == 0 {
            self.root_cluster
        } else {
            first_cluster
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectoryCursor {
    pub(crate) generation: u32,
    pub(crate) open: bool,
    pub(crate) start_cluster: u32,
    pub(crate) current_cluster: u32,
    pub(crate) position: u32,
    pub(crate) end_reached: bool,
}

impl DirectoryCursor {
    pub(crate) fn at(cluster: u32, generation: u32) -> Self {
        Self {
            generation,
            open: true,
            start_cluster: cluster,
            current_cluster: cluster,
            position: 0,
            end_reached: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }

    pub fn is_at_end(&self) -> bool {
        self.end_reached
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileHandle {
    pub(crate) generation: u32,
    pub(crate) open: bool,
    pub(crate) start_cluster: u32,
    pub(crate) current_cluster: u32,
    /// Chain index of `current_cluster`.
    pub(crate) cluster_index: u32,
    pub(crate) size: u32,
    pub(crate) position: u32,
    pub(crate) attributes: Attributes,
}

impl FileHandle {
    pub(crate) fn for_entry(entry: &ResolvedEntry, generation: u32) -> Self {
        Self {
            generation,
            open: true,
            start_cluster: entry.first_cluster,
            current_cluster: entry.first_cluster,
            cluster_index: 0,
            size: entry.size,
            position: 0,
            attributes: entry.attributes,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FsInfo {
    /// All three signatures matched.
    pub valid: bool,
    pub free_count: u32,
    pub next_free: u32,
}

impl FsInfo {
    pub const UNKNOWN: u32 = 0xFFFF_FFFF;

    /// Free cluster count, when the sector can be trusted for a volume of `cluster_count`.
    pub fn trusted_free_clusters(&self, cluster_count: u32) -> Option<u32> {
        (self.valid && self.free_count != Self::UNKNOWN && self.free_count <= cluster_count)
            .then_some(self.free_count)
    }
}
