//! Sparse in-memory FAT32 images for tests.

use alloc::{collections::BTreeMap, vec::Vec};

use crate::{
    block::{BlockDevice, CardKind, Sector, SECTOR_SIZE},
    error::StorageError,
    fat::short_name_checksum,
};

const FAT_EOC: u32 = 0x0FFF_FFFF;
const ENTRIES_PER_FAT_SECTOR: u32 = (SECTOR_SIZE / 4) as u32;
const LFN_UNIT_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

/// Block device backed by a map of written sectors; unwritten sectors read as zero.
#[derive(Clone, Debug, Default)]
pub struct RamDisk {
    sectors: BTreeMap<u32, Sector>,
    sector_count: u32,
    absent: bool,
    initialised: bool,
    fail_reads: bool,
    kind: Option<CardKind>,
    reads: usize,
    writes: usize,
}

impl RamDisk {
    pub fn new(sector_count: u32) -> Self {
        Self {
            sector_count,
            kind: Some(CardKind::Sdhc),
            ..Self::default()
        }
    }

    pub fn set_present(&mut self, present: bool) {
        self.absent = !present;
        if !present {
            self.initialised = false;
        }
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn set_kind(&mut self, kind: CardKind) {
        self.kind = Some(kind);
    }

    pub fn sector(&self, lba: u32) -> Sector {
        self.sectors.get(&lba).copied().unwrap_or([0u8; SECTOR_SIZE])
    }

    pub fn put_sector(&mut self, lba: u32, data: &Sector) {
        self.sectors.insert(lba, *data);
    }

    /// Overwrites `bytes` at `offset` inside block `lba`.
    pub fn patch(&mut self, lba: u32, offset: usize, bytes: &[u8]) {
        let mut sector = self.sector(lba);
        sector[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.put_sector(lba, &sector);
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    /// True when both disks hold the same bytes in every sector.
    pub fn same_contents(&self, other: &RamDisk) -> bool {
        let zero = [0u8; SECTOR_SIZE];
        let keys = self.sectors.keys().chain(other.sectors.keys());
        self.sector_count == other.sector_count
            && keys.into_iter().all(|lba| {
                self.sectors.get(lba).unwrap_or(&zero) == other.sectors.get(lba).unwrap_or(&zero)
            })
    }
}

impl BlockDevice for RamDisk {
    fn present(&mut self) -> bool {
        !self.absent
    }

    fn initialise(&mut self) -> Result<(), StorageError> {
        if self.absent {
            return Err(StorageError::NoCard);
        }
        self.initialised = true;
        Ok(())
    }

    fn kind(&self) -> Option<CardKind> {
        self.kind.filter(|_| self.initialised)
    }

    fn read_block(&mut self, lba: u32, out: &mut Sector) -> Result<(), StorageError> {
        if self.absent || self.fail_reads || !self.initialised || lba >= self.sector_count {
            return Err(StorageError::ReadFailed);
        }
        self.reads += 1;
        *out = self.sector(lba);
        Ok(())
    }

    fn write_block(&mut self, lba: u32, data: &Sector) -> Result<(), StorageError> {
        if self.absent || !self.initialised || lba >= self.sector_count {
            return Err(StorageError::WriteFailed);
        }
        self.writes += 1;
        self.put_sector(lba, data);
        Ok(())
    }
}

/// Geometry of a freshly formatted volume.
#[derive(Clone, Debug)]
pub struct ImageBuilder {
    total_sectors: u32,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    fats: u8,
    partition_start: Option<u32>,
    bpb_label: [u8; 11],
}

impl Default for ImageBuilder {
    /// 64 MiB, one sector per cluster, two FATs, no partition table.
    fn default() -> Self {
        Self {
            total_sectors: 131_072,
            sectors_per_cluster: 1,
            reserved_sectors: 32,
            fats: 2,
            partition_start: None,
            bpb_label: *b"NO NAME    ",
        }
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_sectors(mut self, sectors: u32) -> Self {
        self.total_sectors = sectors;
        self
    }

    pub fn sectors_per_cluster(mut self, spc: u8) -> Self {
        self.sectors_per_cluster = spc;
        self
    }

    pub fn fats(mut self, fats: u8) -> Self {
        self.fats = fats;
        self
    }

    /// Puts an MBR in block 0 with one FAT32 LBA partition at `start`.
    pub fn partition_at(mut self, start: u32) -> Self {
        self.partition_start = Some(start);
        self
    }

    pub fn bpb_label(mut self, label: &str) -> Self {
        self.bpb_label = padded_label(label);
        self
    }

    pub fn format(self) -> FatImage {
        let spc = self.sectors_per_cluster as u32;
        let reserved = self.reserved_sectors as u32;
        let fats = self.fats as u32;
        let rough_clusters = (self.total_sectors - reserved) / spc;
        let fat_size = ((rough_clusters + 2) * 4).div_ceil(SECTOR_SIZE as u32);
        let first_data = reserved + fats * fat_size;
        let cluster_count = (self.total_sectors - first_data) / spc;
        let start = self.partition_start.unwrap_or(0);

        let mut disk = RamDisk::new(start + self.total_sectors);
        if let Some(start) = self.partition_start {
            let mut mbr = [0u8; SECTOR_SIZE];
            mbr[446 + 4] = 0x0C;
            mbr[446 + 8..446 + 12].copy_from_slice(&start.to_le_bytes());
            mbr[446 + 12..446 + 16].copy_from_slice(&self.total_sectors.to_le_bytes());
            mbr[510] = 0x55;
            mbr[511] = 0xAA;
            disk.put_sector(0, &mbr);
        }

        let mut boot = [0u8; SECTOR_SIZE];
        boot[..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        boot[3..11].copy_from_slice(b"MSWIN4.1");
        boot[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        boot[13] = self.sectors_per_cluster;
        boot[14..16].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        boot[16] = self.fats;
        boot[21] = 0xF8;
        boot[28..32].copy_from_slice(&start.to_le_bytes());
        boot[32..36].copy_from_slice(&self.total_sectors.to_le_bytes());
        boot[36..40].copy_from_slice(&fat_size.to_le_bytes());
        boot[44..48].copy_from_slice(&2u32.to_le_bytes());
        boot[48..50].copy_from_slice(&1u16.to_le_bytes());
        boot[50..52].copy_from_slice(&6u16.to_le_bytes());
        boot[64] = 0x80;
        boot[66] = 0x29;
        boot[67..71].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        boot[71..82].copy_from_slice(&self.bpb_label);
        boot[82..90].copy_from_slice(b"FAT32   ");
        boot[510] = 0x55;
        boot[511] = 0xAA;
        disk.put_sector(start, &boot);

        let mut image = FatImage {
            disk,
            start,
            reserved,
            fats,
            fat_size,
            spc,
            first_data,
            cluster_count,
            next_free: 2,
            allocated: 0,
            fragmented: false,
            fsinfo_free: None,
            alias_counter: 0,
            directories: BTreeMap::new(),
        };
        image.set_fat(0, 0x0FFF_FFF8);
        image.set_fat(1, FAT_EOC);
        let root = image.alloc_cluster();
        image.directories.insert(root, DirState::new(root));
        image
    }
}

#[derive(Clone, Debug)]
struct DirState {
    clusters: Vec<u32>,
    next_slot: u32,
}

impl DirState {
    fn new(first: u32) -> Self {
        Self {
            clusters: Vec::from([first]),
            next_slot: 0,
        }
    }
}

/// A formatted volume being populated; `finish` writes FSInfo and returns the disk.
#[derive(Clone, Debug)]
pub struct FatImage {
    disk: RamDisk,
    start: u32,
    reserved: u32,
    fats: u32,
    fat_size: u32,
    spc: u32,
    first_data: u32,
    cluster_count: u32,
    next_free: u32,
    allocated: u32,
    fragmented: bool,
    fsinfo_free: Option<u32>,
    alias_counter: u32,
    directories: BTreeMap<u32, DirState>,
}

impl FatImage {
    pub fn root(&self) -> u32 {
        2
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn bytes_per_cluster(&self) -> usize {
        self.spc as usize * SECTOR_SIZE
    }

    /// Leaves a free cluster between consecutive allocations.
    pub fn set_fragmented(&mut self, fragmented: bool) {
        self.fragmented = fragmented;
    }

    /// Free count written to FSInfo instead of the true one.
    pub fn set_fsinfo_free(&mut self, free: u32) {
        self.fsinfo_free = Some(free);
    }

    pub fn disk_mut(&mut self) -> &mut RamDisk {
        &mut self.disk
    }

    /// Absolute block of `sector` within the volume.
    pub fn volume_lba(&self, sector: u32) -> u32 {
        self.start + sector
    }

    pub fn cluster_lba(&self, cluster: u32) -> u32 {
        self.start + self.first_data + (cluster - 2) * self.spc
    }

    pub fn fat_entry(&self, cluster: u32) -> u32 {
        let sector = self.disk.sector(self.fat_lba(0, cluster));
        let index = (cluster % ENTRIES_PER_FAT_SECTOR) as usize * 4;
        u32::from_le_bytes([
            sector[index],
            sector[index + 1],
            sector[index + 2],
            sector[index + 3],
        ])
    }

    /// Raw FAT write, all copies.
    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        for fat_idx in 0..self.fats {
            let lba = self.fat_lba(fat_idx, cluster);
            let index = (cluster % ENTRIES_PER_FAT_SECTOR) as usize;
            self.disk.patch(lba, index * 4, &value.to_le_bytes());
        }
    }

    fn fat_lba(&self, fat_idx: u32, cluster: u32) -> u32 {
        self.start + self.reserved + fat_idx * self.fat_size + cluster / ENTRIES_PER_FAT_SECTOR
    }

    fn alloc_cluster(&mut self) -> u32 {
        let cluster = self.next_free;
        self.next_free += if self.fragmented { 2 } else { 1 };
        self.allocated += 1;
        self.set_fat(cluster, FAT_EOC);
        let zero = [0u8; SECTOR_SIZE];
        for offset in 0..self.spc {
            let lba = self.cluster_lba(cluster) + offset;
            self.disk.put_sector(lba, &zero);
        }
        cluster
    }

    /// Allocates and links `count` clusters; returns the first, or 0 when `count` is 0.
    pub fn alloc_chain(&mut self, count: usize) -> u32 {
        let mut first = 0;
        let mut prev = 0;
        for _ in 0..count {
            let cluster = self.alloc_cluster();
            if prev == 0 {
                first = cluster;
            } else {
                self.set_fat(prev, cluster);
            }
            prev = cluster;
        }
        first
    }

    pub fn chain(&self, first: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cluster = first;
        while (2..FAT_EOC - 7).contains(&cluster) && out.len() <= self.cluster_count as usize {
            out.push(cluster);
            cluster = self.fat_entry(cluster) & FAT_EOC;
        }
        out
    }

    pub fn write_data(&mut self, first: u32, data: &[u8]) {
        let mut chunks = data.chunks(SECTOR_SIZE);
        for cluster in self.chain(first) {
            for offset in 0..self.spc {
                let Some(chunk) = chunks.next() else {
                    return;
                };
                let mut sector = [0u8; SECTOR_SIZE];
                sector[..chunk.len()].copy_from_slice(chunk);
                let lba = self.cluster_lba(cluster) + offset;
                self.disk.put_sector(lba, &sector);
            }
        }
    }

    pub fn add_file(&mut self, parent: u32, name: &str, data: &[u8]) -> u32 {
        let clusters = data.len().div_ceil(self.bytes_per_cluster());
        let first = self.alloc_chain(clusters);
        self.write_data(first, data);
        self.add_entry(parent, name, 0x20, first, data.len() as u32);
        first
    }

    pub fn add_dir(&mut self, parent: u32, name: &str) -> u32 {
        let cluster = self.alloc_cluster();
        self.directories.insert(cluster, DirState::new(cluster));
        let parent_link = if parent == self.root() { 0 } else { parent };
        self.add_raw_entry(cluster, short_entry(b".          ", 0x10, cluster, 0));
        self.add_raw_entry(cluster, short_entry(b"..         ", 0x10, parent_link, 0));
        self.add_entry(parent, name, 0x10, cluster, 0);
        cluster
    }

    pub fn add_volume_label(&mut self, label: &str) {
        let root = self.root();
        self.add_raw_entry(root, short_entry(&padded_label(label), 0x08, 0, 0));
    }

    /// Writes `name` as a plain 8.3 entry when it is lower-case 8.3, else as VFAT fragments
    /// followed by a `~N` alias.
    pub fn add_entry(&mut self, parent: u32, name: &str, attr: u8, cluster: u32, size: u32) {
        if let Some(short) = plain_short_name(name) {
            self.add_raw_entry(parent, short_entry(&short, attr, cluster, size));
            return;
        }
        self.alias_counter += 1;
        let short = alias_for(name, self.alias_counter);
        for lfn in lfn_entries(name, &short) {
            self.add_raw_entry(parent, lfn);
        }
        self.add_raw_entry(parent, short_entry(&short, attr, cluster, size));
    }

    pub fn add_raw_entry(&mut self, dir: u32, entry: [u8; 32]) {
        let per_cluster = (self.bytes_per_cluster() / 32) as u32;
        let Some(state) = self.directories.get(&dir) else {
            return;
        };
        let slot = state.next_slot;
        let mut clusters = state.clusters.clone();

        if slot / per_cluster >= clusters.len() as u32 {
            let tail = clusters[clusters.len() - 1];
            let grown = self.alloc_cluster();
            self.set_fat(tail, grown);
            clusters.push(grown);
        }

        let cluster = clusters[(slot / per_cluster) as usize];
        self.directories.insert(
            dir,
            DirState {
                clusters,
                next_slot: slot + 1,
            },
        );
        let byte = (slot % per_cluster) as usize * 32;
        let lba = self.cluster_lba(cluster) + (byte / SECTOR_SIZE) as u32;
        self.disk.patch(lba, byte % SECTOR_SIZE, &entry);
    }

    pub fn finish(mut self) -> RamDisk {
        let free = self
            .fsinfo_free
            .unwrap_or(self.cluster_count - self.allocated);
        let mut fsinfo = [0u8; SECTOR_SIZE];
        fsinfo[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
        fsinfo[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
        fsinfo[488..492].copy_from_slice(&free.to_le_bytes());
        fsinfo[492..496].copy_from_slice(&self.next_free.to_le_bytes());
        fsinfo[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());
        let lba = self.volume_lba(1);
        self.disk.put_sector(lba, &fsinfo);
        self.disk
    }
}

pub fn short_entry(short: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[..11].copy_from_slice(short);
    entry[11] = attr;
    entry[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    // 2024-03-15 12:34:56
    entry[22..24].copy_from_slice(&((12u16 << 11) | (34 << 5) | 28).to_le_bytes());
    entry[24..26].copy_from_slice(&((44u16 << 9) | (3 << 5) | 15).to_le_bytes());
    entry[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    entry
}

/// VFAT fragments in on-disk order (last fragment first).
pub fn lfn_entries(name: &str, short: &[u8; 11]) -> Vec<[u8; 32]> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let slots = units.len().div_ceil(13);
    let checksum = short_name_checksum(short);
    (1..=slots)
        .rev()
        .map(|seq| {
            let mut entry = [0u8; 32];
            entry[0] = seq as u8 | if seq == slots { 0x40 } else { 0 };
            entry[11] = 0x0F;
            entry[13] = checksum;
            for (idx, offset) in LFN_UNIT_OFFSETS.iter().enumerate() {
                let pos = (seq - 1) * 13 + idx;
                let unit = match pos.cmp(&units.len()) {
                    core::cmp::Ordering::Less => units[pos],
                    core::cmp::Ordering::Equal => 0x0000,
                    core::cmp::Ordering::Greater => 0xFFFF,
                };
                entry[*offset..*offset + 2].copy_from_slice(&unit.to_le_bytes());
            }
            entry
        })
        .collect()
}

fn plain_short_name(name: &str) -> Option<[u8; 11]> {
    let (base, ext) = name.split_once('.').unwrap_or((name, ""));
    let valid = |part: &str| {
        part.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 || !valid(base) || !valid(ext) {
        return None;
    }
    let mut short = [b' '; 11];
    short[..base.len()].copy_from_slice(base.as_bytes());
    short[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
    short.make_ascii_uppercase();
    Some(short)
}

fn alias_for(name: &str, counter: u32) -> [u8; 11] {
    let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let mut short = [b' '; 11];
    let keep = |b: &u8| b.is_ascii_alphanumeric();
    for (slot, byte) in short[..6].iter_mut().zip(base.bytes().filter(keep)) {
        *slot = byte.to_ascii_uppercase();
    }
    let used = short[..6].iter().position(|&b| b == b' ').unwrap_or(6).max(1);
    if short[0] == b' ' {
        short[0] = b'_';
    }
    short[used] = b'~';
    short[used + 1] = b'0' + (counter % 10) as u8;
    for (slot, byte) in short[8..].iter_mut().zip(ext.bytes().filter(keep)) {
        *slot = byte.to_ascii_uppercase();
    }
    short
}

fn padded_label(label: &str) -> [u8; 11] {
    let mut out = [b' '; 11];
    for (slot, byte) in out.iter_mut().zip(label.bytes()) {
        *slot = byte;
    }
    out
}
