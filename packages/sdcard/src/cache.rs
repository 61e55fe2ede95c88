use crate::{
    block::{BlockDevice, CardKind, Sector, SECTOR_SIZE},
    error::StorageError,
};

/// Remembers the last block read or written so FAT walks that stay inside
/// one sector do not hit the card again.
pub struct SectorCache<D> {
    inner: D,
    cached_lba: Option<u32>,
    cached: Sector,
}

impl<D: BlockDevice> SectorCache<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            cached_lba: None,
            cached: [0u8; SECTOR_SIZE],
        }
    }

    pub fn invalidate(&mut self) {
        self.cached_lba = None;
    }

    pub fn cached_lba(&self) -> Option<u32> {
        self.cached_lba
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: BlockDevice> BlockDevice for SectorCache<D> {
    fn present(&mut self) -> bool {
        self.inner.present()
    }

    fn initialise(&mut self) -> Result<(), StorageError> {
        self.invalidate();
        self.inner.initialise()
    }

    fn kind(&self) -> Option<CardKind> {
        self.inner.kind()
    }

    fn read_block(&mut self, lba: u32, out: &mut Sector) -> Result<(), StorageError> {
        if self.cached_lba == Some(lba) {
            out.copy_from_slice(&self.cached);
            return Ok(());
        }
        self.cached_lba = None;
        self.inner.read_block(lba, out)?;
        self.cached.copy_from_slice(out);
        self.cached_lba = Some(lba);
        Ok(())
    }

    fn write_block(&mut self, lba: u32, data: &Sector) -> Result<(), StorageError> {
        self.cached_lba = None;
        self.inner.write_block(lba, data)?;
        self.cached.copy_from_slice(data);
        self.cached_lba = Some(lba);
        Ok(())
    }
}
