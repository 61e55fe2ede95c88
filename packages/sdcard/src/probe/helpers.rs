use crate::block::{CardKind, SECTOR_SIZE};

use super::card::{SD_CMD0, SD_CMD8};

/// CRC byte for a command frame. Only CMD0 and CMD8 are checked before CRC is disabled.
pub(crate) fn command_crc(cmd: u8) -> u8 {
    match cmd {
        SD_CMD0 => 0x95,
        SD_CMD8 => 0x87,
        _ => 0xFF,
    }
}

pub(crate) fn command_frame(cmd: u8, arg: u32) -> [u8; 6] {
    let arg = arg.to_be_bytes();
    [
        0x40 | cmd,
        arg[0],
        arg[1],
        arg[2],
        arg[3],
        command_crc(cmd),
    ]
}

/// SDSC cards take byte addresses, SDHC cards take block numbers.
pub(crate) fn block_address(kind: CardKind, lba: u32) -> u32 {
    match kind {
        CardKind::Sdhc => lba,
        CardKind::Sdsc => lba.saturating_mul(SECTOR_SIZE as u32),
    }
}

pub fn decode_capacity_bytes(csd: &[u8; 16]) -> Option<u64> {
    match csd_get_bits(csd, 127, 126) {
        0 => {
            let c_size = csd_get_bits(csd, 73, 62) as u64;
            let c_size_mult = csd_get_bits(csd, 49, 47);
            let read_bl_len = csd_get_bits(csd, 83, 80);

            let block_len = 1u64.checked_shl(read_bl_len)?;
            let mult = 1u64.checked_shl(c_size_mult + 2)?;
            (c_size + 1).checked_mul(mult)?.checked_mul(block_len)
        }
        1 => {
            let c_size = csd_get_bits(csd, 69, 48) as u64;
            (c_size + 1).checked_mul(512 * 1024)
        }
        _ => None,
    }
}

fn csd_get_bits(csd: &[u8; 16], msb: u8, lsb: u8) -> u32 {
    (lsb..=msb).rev().fold(0u32, |value, bit| {
        let byte = csd[((127 - bit) / 8) as usize];
        (value << 1) | ((byte >> (bit % 8)) & 1) as u32
    })
}
