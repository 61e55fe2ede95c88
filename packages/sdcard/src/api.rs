use heapless::String;

use crate::{
    block::{BlockDevice, CardKind},
    cache::SectorCache,
    error::{StorageError, StorageResult},
    fat::{
        self, Attributes, DirectoryCursor, EntryName, Fat32Volume, FileHandle, FsInfo,
        Resolution, ResolvedEntry,
    },
    SD_LABEL_MAX, SD_PATH_BYTES,
};


const NO_NAME_LABEL: &[u8; 11] = b"NO NAME    ";

/// Mounted-volume state over one block device. Single owner, no internal locking.
pub struct Storage<D: BlockDevice> {
    device: SectorCache<D>,
    volume: Option<Fat32Volume>,
    cwd: u32,
    generation: u32,
}

impl<D: BlockDevice> Storage<D> {
    pub fn new(device: D) -> Self {
        Self {
            device: SectorCache::new(device),
            volume: None,
            cwd: 0,
            generation: 0,
        }
    }

    pub fn device(&self) -> &D {
        self.device.inner()
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.device.inner_mut()
    }

    pub fn into_device(self) -> D {
        self.device.into_inner()
    }

    pub fn card_present(&mut self) -> bool {
        self.device.present()
    }

    /// Bumped on every mount and unmount; handles from another generation are stale.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn mount(&mut self) -> StorageResult<()> {
        if !self.device.present() {
            self.unmount();
            return Err(StorageError::NoCard);
        }
        if self.volume.is_some() {
            return Ok(());
        }

        self.device.initialise()?;
        let volume = fat::mount(&mut self.device)?;
        self.volume = Some(volume);
        self.cwd = volume.root_cluster;
        self.generation = self.generation.wrapping_add(1);
        log::info!(
            "storage: mounted kind={} total_bytes={}",
            self.device.kind().map_or("unknown", CardKind::label),
            volume.total_bytes()
        );
        Ok(())
    }

    pub fn unmount(&mut self) {
        if let Some(volume) = self.volume.take() {
            self.cwd = volume.root_cluster;
            log::info!("storage: unmounted");
        }
        self.generation = self.generation.wrapping_add(1);
        self.device.invalidate();
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    pub fn volume(&self) -> Option<&Fat32Volume> {
        self.volume.as_ref()
    }

    pub fn volume_kind(&self) -> Option<CardKind> {
        self.volume.and(self.device.kind())
    }

    fn ready(&mut self) -> StorageResult<Fat32Volume> {
        let volume = self.volume.ok_or(StorageError::NotMounted)?;
        if !self.device.present() {
            log::warn!("storage: card_missing_while_mounted");
            self.unmount();
            return Err(StorageError::NoCard);
        }
        Ok(volume)
    }

    pub fn free_space(&mut self) -> StorageResult<u64> {
        let volume = self.ready()?;
        fat::free_bytes(&mut self.device, &volume)
    }

    pub fn total_space(&mut self) -> StorageResult<u64> {
        let volume = self.ready()?;
        Ok(volume.total_bytes())
    }

    pub fn fsinfo(&mut self) -> StorageResult<FsInfo> {
        let volume = self.ready()?;
        fat::read_fsinfo(&mut self.device, &volume)
    }

    /// Full FAT scan, independent of FSInfo.
    pub fn scan_free_clusters(&mut self) -> StorageResult<u32> {
        let volume = self.ready()?;
        fat::count_free_clusters(&mut self.device, &volume)
    }

    /// Root volume-id entry, else the boot sector label. Empty when neither is set.
    pub fn volume_label(&mut self) -> StorageResult<String<SD_LABEL_MAX>> {
        let volume = self.ready()?;
        if let Some(raw) = fat::find_volume_label(&mut self.device, &volume)? {
            return Ok(fat::label_text(&raw));
        }
        if &volume.bpb_label == NO_NAME_LABEL {
            return Ok(String::new());
        }
        Ok(fat::label_text(&volume.bpb_label))
    }

    pub fn set_current_dir(&mut self, path: &str) -> StorageResult<()> {
        let volume = self.ready()?;
        let cluster = self.open_directory(&volume, path)?;
        self.cwd = cluster;
        log::debug!("storage: cwd cluster={}", cluster);
        Ok(())
    }

    pub fn current_dir(&mut self) -> StorageResult<String<SD_PATH_BYTES>> {
        let volume = self.ready()?;
        fat::directory_path(&mut self.device, &volume, self.cwd)
    }

    fn open_directory(&mut self, volume: &Fat32Volume, path: &str) -> StorageResult<u32> {
        match fat::resolve(&mut self.device, volume, self.cwd, path)? {
            Resolution::Directory { cluster, .. } => Ok(cluster),
            Resolution::Entry(_) => Err(StorageError::NotADirectory),
            Resolution::Missing => Err(StorageError::DirNotFound),
        }
    }

    pub fn dir_open(&mut self, path: &str) -> StorageResult<DirectoryCursor> {
        let volume = self.ready()?;
        let cluster = self.open_directory(&volume, path)?;
        Ok(DirectoryCursor::at(cluster, self.generation))
    }

    /// Next listable entry; hidden, system and volume-label entries are skipped.
    pub fn dir_read(&mut self, cursor: &mut DirectoryCursor) -> StorageResult<Option<ResolvedEntry>> {
        let volume = self.ready()?;
        if !cursor.open || cursor.generation != self.generation {
            return Err(StorageError::ReadFailed);
        }
        while let Some(entry) = fat::next_raw_entry(&mut self.device, &volume, cursor)? {
            let attributes = entry.attributes;
            if attributes.is_volume_label() || attributes.is_hidden() || attributes.is_system() {
                continue;
            }
            return Ok(Some(entry));
        }
        Ok(None)
    }

    pub fn dir_close(&mut self, cursor: &mut DirectoryCursor) {
        *cursor = DirectoryCursor::default();
    }

    /// Entry for any path; the root and dot components yield a synthesized directory entry.
    pub fn stat(&mut self, path: &str) -> StorageResult<ResolvedEntry> {
        let volume = self.ready()?;
        match fat::resolve(&mut self.device, &volume, self.cwd, path)? {
            Resolution::Directory {
                entry: Some(entry), ..
            }
            | Resolution::Entry(entry) => Ok(entry),
            Resolution::Directory { cluster, entry: None } => {
                let mut name = EntryName::new();
                let _ = name.push_str(if cluster == volume.root_cluster { "/" } else { "." });
                Ok(ResolvedEntry {
                    name,
                    short_name: [b' '; 11],
                    attributes: Attributes::from_bits(Attributes::DIRECTORY),
                    size: 0,
                    first_cluster: cluster,
                    modified: Default::default(),
                })
            }
            Resolution::Missing => Err(StorageError::FileNotFound),
        }
    }

    pub fn file_open(&mut self, path: &str) -> StorageResult<FileHandle> {
        let volume = self.ready()?;
        match fat::resolve(&mut self.device, &volume, self.cwd, path)? {
            Resolution::Entry(entry) if entry.is_file() => {
                Ok(FileHandle::for_entry(&entry, self.generation))
            }
            Resolution::Entry(_) | Resolution::Directory { .. } => Err(StorageError::NotAFile),
            Resolution::Missing => Err(StorageError::FileNotFound),
        }
    }

    fn check_handle(&self, file: &FileHandle) -> StorageResult<()> {
        if !file.open || file.generation != self.generation {
            return Err(StorageError::InvalidParameter);
        }
        Ok(())
    }

    pub fn file_read(&mut self, file: &mut FileHandle, buf: &mut [u8]) -> StorageResult<usize> {
        self.check_handle(file)?;
        let volume = self.ready()?;
        fat::read_file(&mut self.device, &volume, file, buf)
    }

    pub fn file_seek(&mut self, file: &mut FileHandle, position: u32) -> StorageResult<()> {
        self.check_handle(file)?;
        let volume = self.ready()?;
        fat::seek_file(&mut self.device, &volume, file, position)
    }

    pub fn file_tell(&self, file: &FileHandle) -> u32 {
        if self.check_handle(file).is_ok() {
            file.position
        } else {
            0
        }
    }

    pub fn file_size(&self, file: &FileHandle) -> u32 {
        if self.check_handle(file).is_ok() {
            file.size
        } else {
            0
        }
    }

    pub fn file_eof(&self, file: &FileHandle) -> bool {
        self.check_handle(file).is_err() || file.position >= file.size
    }

    pub fn file_close(&mut self, file: &mut FileHandle) {
        *file = FileHandle::default();
    }

    pub fn file_create(&mut self, path: &str) -> StorageResult<FileHandle> {
        self.unsupported("file_create", path)
    }

    pub fn file_write(&mut self, file: &mut FileHandle, data: &[u8]) -> StorageResult<usize> {
        self.ready()?;
        log::debug!(
            "storage: unsupported op=file_write cluster={} len={}",
            file.start_cluster,
            data.len()
        );
        Err(StorageError::InvalidParameter)
    }

    pub fn file_delete(&mut self, path: &str) -> StorageResult<()> {
        self.unsupported("file_delete", path)
    }

    pub fn dir_create(&mut self, path: &str) -> StorageResult<()> {
        self.unsupported("dir_create", path)
    }

    pub fn dir_delete(&mut self, path: &str) -> StorageResult<()> {
        self.unsupported("dir_delete", path)
    }

    /// The write path is not implemented; nothing reaches the device.
    fn unsupported<T>(&mut self, op: &str, path: &str) -> StorageResult<T> {
        self.ready()?;
        log::debug!("storage: unsupported op={} path={}", op, path);
        Err(StorageError::InvalidParameter)
    }
}
