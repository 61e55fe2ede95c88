use crate::error::StorageError;


pub const SECTOR_SIZE: usize = 512;

pub type Sector = [u8; SECTOR_SIZE];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardKind {
    /// Standard capacity, byte-addressed commands.
    Sdsc,
    /// High/extended capacity, block-addressed commands.
    Sdhc,
}

impl CardKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sdsc => "sdsc",
            Self::Sdhc => "sdhc",
        }
    }
}

pub trait BlockDevice {
    fn present(&mut self) -> bool;

    fn initialise(&mut self) -> Result<(), StorageError>;

    /// Addressing mode found by the last successful `initialise`.
    fn kind(&self) -> Option<CardKind>;

    fn read_block(&mut self, lba: u32, out: &mut Sector) -> Result<(), StorageError>;

    fn write_block(&mut self, lba: u32, data: &Sector) -> Result<(), StorageError>;

    fn read_blocks(&mut self, start_lba: u32, out: &mut [Sector]) -> Result<(), StorageError> {
        for (idx, block) in out.iter_mut().enumerate() {
            self.read_block(start_lba.wrapping_add(idx as u32), block)?;
        }
        Ok(())
    }

    fn write_blocks(&mut self, start_lba: u32, data: &[Sector]) -> Result<(), StorageError> {
        for (idx, block) in data.iter().enumerate() {
            self.write_block(start_lba.wrapping_add(idx as u32), block)?;
        }
        Ok(())
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn present(&mut self) -> bool {
        (**self).present()
    }

    fn initialise(&mut self) -> Result<(), StorageError> {
        (**self).initialise()
    }

    fn kind(&self) -> Option<CardKind> {
        (**self).kind()
    }

    fn read_block(&mut self, lba: u32, out: &mut Sector) -> Result<(), StorageError> {
        (**self).read_block(lba, out)
    }

    fn write_block(&mut self, lba: u32, data: &Sector) -> Result<(), StorageError> {
        (**self).write_block(lba, data)
    }
}
