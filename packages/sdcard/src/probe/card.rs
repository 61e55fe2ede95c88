use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::SpiBus,
};

use crate::{
    block::{BlockDevice, CardKind, Sector},
    error::StorageError,
};

pub(crate) const SD_CMD0: u8 = 0;
pub(crate) const SD_CMD8: u8 = 8;
pub(crate) const SD_CMD9: u8 = 9;
pub(crate) const SD_CMD16: u8 = 16;
pub(crate) const SD_CMD17: u8 = 17;
pub(crate) const SD_CMD24: u8 = 24;
pub(crate) const SD_CMD55: u8 = 55;
pub(crate) const SD_ACMD41: u8 = 41;
pub(crate) const SD_CMD58: u8 = 58;

pub(crate) const R1_IDLE_STATE: u8 = 0x01;
pub(crate) const SD_DATA_START_TOKEN: u8 = 0xFE;
pub(crate) const SD_CMD8_PATTERN: u32 = 0x0000_01AA;
pub(crate) const SD_ACMD41_HCS: u32 = 0x4000_0000;
pub(crate) const OCR_CCS: u8 = 0x40;

pub(crate) const SD_INIT_SPI_RATE_HZ: u32 = 400_000;
pub(crate) const SD_DATA_SPI_RATE_HZ: u32 = 25_000_000;
pub(crate) const SD_POWER_UP_WAIT_MS: u32 = 10;
pub(crate) const SD_DUMMY_CLOCK_BYTES: usize = 10;
pub(crate) const SD_CMD0_ATTEMPTS: u32 = 10;
pub(crate) const SD_CMD0_RETRY_DELAY_MS: u32 = 10;
pub(crate) const SD_ACMD41_ATTEMPTS: u32 = 1_000;
pub(crate) const SD_ACMD41_RETRY_DELAY_MS: u32 = 1;
pub(crate) const SD_R1_POLL_BYTES: usize = 64;
pub(crate) const SD_READY_POLL_BYTES: usize = 10_000;
pub(crate) const SD_DATA_TOKEN_POLL_BYTES: usize = 100_000;
pub(crate) const SD_WRITE_BUSY_POLL_BYTES: usize = 200_000;

/// SPI bus that can also retune its clock between bring-up and data transfer.
pub trait SdSpiBus: SpiBus<u8> {
    fn set_clock_hz(&mut self, hz: u32) -> Result<(), Self::Error>;
}

impl<T: SdSpiBus + ?Sized> SdSpiBus for &mut T {
    fn set_clock_hz(&mut self, hz: u32) -> Result<(), Self::Error> {
        (**self).set_clock_hz(hz)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCardVersion {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCardError {
    Spi,
    ChipSelect,
    Cmd0Failed(u8),
    Cmd8EchoMismatch([u8; 4]),
    Cmd55Unexpected(u8),
    Acmd41Timeout(u8),
    Cmd58Unexpected(u8),
    Cmd16Unexpected(u8),
    Cmd9Unexpected(u8),
    Cmd17Unexpected(u8),
    Cmd24Unexpected(u8),
    NotReady(u8),
    DataTokenTimeout(u8),
    DataTokenUnexpected(u8, u8),
    WriteDataRejected(u8),
    WriteBusyTimeout,
    NotInitialized,
    CapacityDecodeFailed,
}

pub struct SdCard<SPI, CS, DET, D> {
    pub(crate) spi: SPI,
    pub(crate) cs: CS,
    detect: DET,
    pub(crate) delay: D,
    pub(crate) kind: Option<CardKind>,
    pub(crate) version: Option<SdCardVersion>,
    pub(crate) clock_hz: u32,
}

impl<SPI, CS, DET, D> SdCard<SPI, CS, DET, D>
where
    SPI: SdSpiBus,
    CS: OutputPin,
    DET: InputPin,
    D: DelayNs,
{
    /// Touches no pin or bus; chip select is driven high by `initialise`.
    pub fn new(spi: SPI, cs: CS, detect: DET, delay: D) -> Self {
        Self {
            spi,
            cs,
            detect,
            delay,
            kind: None,
            version: None,
            clock_hz: 0,
        }
    }

    /// Card-detect switch, active low.
    pub fn card_present(&mut self) -> bool {
        self.detect.is_low().unwrap_or(false)
    }

    pub fn is_initialized(&self) -> bool {
        self.kind.is_some()
    }

    pub fn version(&self) -> Option<SdCardVersion> {
        self.version
    }

    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    pub fn invalidate(&mut self) {
        self.kind = None;
        self.version = None;
    }

    pub fn release(self) -> (SPI, CS, DET, D) {
        (self.spi, self.cs, self.detect, self.delay)
    }

    pub(crate) fn apply_clock(&mut self, hz: u32) -> Result<(), SdCardError> {
        self.spi.set_clock_hz(hz).map_err(|_| SdCardError::Spi)?;
        self.clock_hz = hz;
        Ok(())
    }
}

impl<SPI, CS, DET, D> BlockDevice for SdCard<SPI, CS, DET, D>
where
    SPI: SdSpiBus,
    CS: OutputPin,
    DET: InputPin,
    D: DelayNs,
{
    fn present(&mut self) -> bool {
        self.card_present()
    }

    fn initialise(&mut self) -> Result<(), StorageError> {
        if !self.card_present() {
            self.invalidate();
            return Err(StorageError::NoCard);
        }
        match self.bring_up() {
            Ok(kind) => {
                log::info!(
                    "sdcard: init_ok kind={} version={:?} clock_hz={}",
                    kind.label(),
                    self.version,
                    self.clock_hz
                );
                Ok(())
            }
            Err(err) => {
                log::warn!("sdcard: init_error err={:?}", err);
                self.invalidate();
                Err(StorageError::InitFailed)
            }
        }
    }

    fn kind(&self) -> Option<CardKind> {
        self.kind
    }

    fn read_block(&mut self, lba: u32, out: &mut Sector) -> Result<(), StorageError> {
        self.read_sector(lba, out).map_err(|err| {
            log::warn!("sdcard: read_error lba={} err={:?}", lba, err);
            StorageError::ReadFailed
        })
    }

    fn write_block(&mut self, lba: u32, data: &Sector) -> Result<(), StorageError> {
        self.write_sector(lba, data).map_err(|err| {
            log::warn!("sdcard: write_error lba={} err={:?}", lba, err);
            StorageError::WriteFailed
        })
    }
}
