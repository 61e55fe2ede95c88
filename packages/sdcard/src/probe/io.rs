use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::block::Sector;

use super::{
    card::*,
    helpers::{block_address, command_frame, decode_capacity_bytes},
};

impl<SPI, CS, DET, D> SdCard<SPI, CS, DET, D>
where
    SPI: SdSpiBus,
    CS: OutputPin,
    DET: InputPin,
    D: DelayNs,
{
    pub fn read_sector(&mut self, lba: u32, out: &mut Sector) -> Result<(), SdCardError> {
        let kind = self.kind.ok_or(SdCardError::NotInitialized)?;
        let arg = block_address(kind, lba);
        self.transaction(|card| {
            let cmd17_r1 = card.send_frame(SD_CMD17, arg)?;
            if cmd17_r1 != 0x00 {
                return Err(SdCardError::Cmd17Unexpected(cmd17_r1));
            }
            card.read_data(SD_CMD17, out)
        })
    }

    pub fn write_sector(&mut self, lba: u32, data: &Sector) -> Result<(), SdCardError> {
        let kind = self.kind.ok_or(SdCardError::NotInitialized)?;
        let arg = block_address(kind, lba);
        self.transaction(|card| {
            let cmd24_r1 = card.send_frame(SD_CMD24, arg)?;
            if cmd24_r1 != 0x00 {
                return Err(SdCardError::Cmd24Unexpected(cmd24_r1));
            }

            card.transfer_byte(0xFF)?;
            card.transfer_byte(SD_DATA_START_TOKEN)?;
            card.spi.write(data).map_err(|_| SdCardError::Spi)?;
            // CRC16 is not checked in SPI mode.
            card.transfer_byte(0xFF)?;
            card.transfer_byte(0xFF)?;

            let response = card.transfer_byte(0xFF)? & 0x1F;
            if response != 0x05 {
                return Err(SdCardError::WriteDataRejected(response));
            }
            for _ in 0..SD_WRITE_BUSY_POLL_BYTES {
                if card.transfer_byte(0xFF)? == 0xFF {
                    return Ok(());
                }
            }
            Err(SdCardError::WriteBusyTimeout)
        })
    }

    /// Card capacity from the CSD register.
    pub fn capacity_bytes(&mut self) -> Result<u64, SdCardError> {
        if self.kind.is_none() {
            return Err(SdCardError::NotInitialized);
        }
        let mut csd = [0u8; 16];
        self.transaction(|card| {
            let cmd9_r1 = card.send_frame(SD_CMD9, 0)?;
            if cmd9_r1 != 0x00 {
                return Err(SdCardError::Cmd9Unexpected(cmd9_r1));
            }
            card.read_data(SD_CMD9, &mut csd)
        })?;
        decode_capacity_bytes(&csd).ok_or(SdCardError::CapacityDecodeFailed)
    }

    /// Full command exchange: select, frame, R1 plus trailing bytes, release.
    /// Returns 0xFF when the card never answers.
    pub(crate) fn command(
        &mut self,
        cmd: u8,
        arg: u32,
        extra_response: &mut [u8],
    ) -> Result<u8, SdCardError> {
        self.transaction(|card| {
            let r1 = card.send_frame(cmd, arg)?;
            if (r1 & 0x80) == 0 {
                for slot in extra_response.iter_mut() {
                    *slot = card.transfer_byte(0xFF)?;
                }
            }
            Ok(r1)
        })
    }

    /// Runs `op` with the card selected; the card is released on every exit path.
    pub(crate) fn transaction<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, SdCardError>,
    ) -> Result<T, SdCardError> {
        self.cs.set_low().map_err(|_| SdCardError::ChipSelect)?;
        let result = op(self);
        self.end_transaction();
        result
    }

    fn end_transaction(&mut self) {
        let _ = self.cs.set_high();
        let _ = self.transfer_byte(0xFF);
    }

    fn send_frame(&mut self, cmd: u8, arg: u32) -> Result<u8, SdCardError> {
        if cmd != SD_CMD0 {
            self.wait_ready(cmd)?;
        }
        self.spi
            .write(&command_frame(cmd, arg))
            .map_err(|_| SdCardError::Spi)?;

        for _ in 0..SD_R1_POLL_BYTES {
            let r1 = self.transfer_byte(0xFF)?;
            if (r1 & 0x80) == 0 {
                return Ok(r1);
            }
        }
        Ok(0xFF)
    }

    fn wait_ready(&mut self, cmd: u8) -> Result<(), SdCardError> {
        for _ in 0..SD_READY_POLL_BYTES {
            if self.transfer_byte(0xFF)? == 0xFF {
                return Ok(());
            }
        }
        Err(SdCardError::NotReady(cmd))
    }

    fn read_data(&mut self, cmd: u8, out: &mut [u8]) -> Result<(), SdCardError> {
        let mut got_token = false;
        for _ in 0..SD_DATA_TOKEN_POLL_BYTES {
            let token = self.transfer_byte(0xFF)?;
            if token == SD_DATA_START_TOKEN {
                got_token = true;
                break;
            }
            if token != 0xFF {
                return Err(SdCardError::DataTokenUnexpected(cmd, token));
            }
        }
        if !got_token {
            return Err(SdCardError::DataTokenTimeout(cmd));
        }

        out.fill(0xFF);
        self.spi
            .transfer_in_place(out)
            .map_err(|_| SdCardError::Spi)?;
        // Read and discard CRC16.
        self.transfer_byte(0xFF)?;
        self.transfer_byte(0xFF)?;
        Ok(())
    }

    pub(crate) fn send_dummy_clocks(&mut self, bytes: usize) -> Result<(), SdCardError> {
        for _ in 0..bytes {
            self.transfer_byte(0xFF)?;
        }
        Ok(())
    }

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SdCardError> {
        let mut frame = [byte];
        self.spi
            .transfer_in_place(&mut frame)
            .map_err(|_| SdCardError::Spi)?;
        Ok(frame[0])
    }
}
