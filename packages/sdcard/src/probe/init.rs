use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::block::{CardKind, SECTOR_SIZE};

use super::card::*;

impl<SPI, CS, DET, D> SdCard<SPI, CS, DET, D>
where
    SPI: SdSpiBus,
    CS: OutputPin,
    DET: InputPin,
    D: DelayNs,
{
    pub(crate) fn bring_up(&mut self) -> Result<CardKind, SdCardError> {
        self.invalidate();
        self.apply_clock(SD_INIT_SPI_RATE_HZ)?;
        self.cs.set_high().map_err(|_| SdCardError::ChipSelect)?;
        self.delay.delay_ms(SD_POWER_UP_WAIT_MS);
        self.send_dummy_clocks(SD_DUMMY_CLOCK_BYTES)?;
        self.delay.delay_ms(SD_POWER_UP_WAIT_MS);

        let mut cmd0_r1 = 0xFFu8;
        for attempt in 0..SD_CMD0_ATTEMPTS {
            cmd0_r1 = self.command(SD_CMD0, 0, &mut [])?;
            if cmd0_r1 == R1_IDLE_STATE {
                break;
            }
            if attempt + 1 < SD_CMD0_ATTEMPTS {
                self.delay.delay_ms(SD_CMD0_RETRY_DELAY_MS);
            }
        }
        if cmd0_r1 != R1_IDLE_STATE {
            return Err(SdCardError::Cmd0Failed(cmd0_r1));
        }

        // Legacy cards reject CMD8; anything but an idle R1 means v1.
        let mut r7 = [0u8; 4];
        let cmd8_r1 = self.command(SD_CMD8, SD_CMD8_PATTERN, &mut r7)?;
        let version = if cmd8_r1 == R1_IDLE_STATE {
            if (r7[2] & 0x0F) != 0x01 || r7[3] != 0xAA {
                return Err(SdCardError::Cmd8EchoMismatch(r7));
            }
            SdCardVersion::V2
        } else {
            SdCardVersion::V1
        };

        let mut acmd41_r1 = 0xFFu8;
        let mut acmd41_ok = false;
        for _ in 0..SD_ACMD41_ATTEMPTS {
            let cmd55_r1 = self.command(SD_CMD55, 0, &mut [])?;
            if cmd55_r1 > R1_IDLE_STATE {
                return Err(SdCardError::Cmd55Unexpected(cmd55_r1));
            }
            acmd41_r1 = self.command(SD_ACMD41, SD_ACMD41_HCS, &mut [])?;
            if acmd41_r1 == 0x00 {
                acmd41_ok = true;
                break;
            }
            self.delay.delay_ms(SD_ACMD41_RETRY_DELAY_MS);
        }
        if !acmd41_ok {
            return Err(SdCardError::Acmd41Timeout(acmd41_r1));
        }

        let mut ocr = [0u8; 4];
        let cmd58_r1 = self.command(SD_CMD58, 0, &mut ocr)?;
        if cmd58_r1 != 0x00 {
            return Err(SdCardError::Cmd58Unexpected(cmd58_r1));
        }
        let kind = if (ocr[0] & OCR_CCS) != 0 {
            CardKind::Sdhc
        } else {
            CardKind::Sdsc
        };

        if kind == CardKind::Sdsc {
            let cmd16_r1 = self.command(SD_CMD16, SECTOR_SIZE as u32, &mut [])?;
            if cmd16_r1 != 0x00 {
                return Err(SdCardError::Cmd16Unexpected(cmd16_r1));
            }
        }

        self.apply_clock(SD_DATA_SPI_RATE_HZ)?;
        self.kind = Some(kind);
        self.version = Some(version);
        Ok(kind)
    }
}
