use heapless::String;

use super::types::{EntryName, DIR_ENTRY_SIZE, MAX_LFN_SLOTS};

const LFN_UNITS_PER_SLOT: usize = 13;
const LFN_UNIT_OFFSETS: [usize; LFN_UNITS_PER_SLOT] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
const LFN_LAST_SLOT: u8 = 0x40;
const LFN_SEQUENCE_MASK: u8 = 0x1F;

pub fn short_name_checksum(short: &[u8; 11]) -> u8 {
    short.iter().fold(0u8, |sum, byte| {
        ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(*byte)
    })
}

/// Fragments of a VFAT name seen since the last short entry.
#[derive(Clone)]
pub(crate) struct LfnState {
    expected_slots: u8,
    checksum: u8,
    seen_mask: u32,
    units: [[u16; LFN_UNITS_PER_SLOT]; MAX_LFN_SLOTS],
}

impl LfnState {
    pub(crate) fn new() -> Self {
        Self {
            expected_slots: 0,
            checksum: 0,
            seen_mask: 0,
            units: [[0xFFFF; LFN_UNITS_PER_SLOT]; MAX_LFN_SLOTS],
        }
    }

    pub(crate) fn clear(&mut self) {
        self.expected_slots = 0;
        self.checksum = 0;
        self.seen_mask = 0;
    }

    pub(crate) fn consume(&mut self, entry: &[u8]) {
        if entry.len() < DIR_ENTRY_SIZE {
            self.clear();
            return;
        }
        let order = entry[0];
        let seq = order & LFN_SEQUENCE_MASK;
        if seq == 0 || seq as usize > MAX_LFN_SLOTS {
            self.clear();
            return;
        }

        let checksum = entry[13];
        if (order & LFN_LAST_SLOT) != 0 {
            self.clear();
            self.expected_slots = seq;
            self.checksum = checksum;
        }
        if self.expected_slots == 0 || seq > self.expected_slots || checksum != self.checksum {
            self.clear();
            return;
        }

        let slot = (seq - 1) as usize;
        for (unit, offset) in self.units[slot].iter_mut().zip(LFN_UNIT_OFFSETS) {
            *unit = u16::from_le_bytes([entry[offset], entry[offset + 1]]);
        }
        self.seen_mask |= 1 << slot;
    }

    /// The reconstructed name, if every fragment arrived and the checksum matches `short`.
    pub(crate) fn long_name_for(&self, short: &[u8; 11]) -> Option<EntryName> {
        let slots = self.expected_slots as usize;
        let complete = slots > 0 && self.seen_mask == (1u32 << slots) - 1;
        if !complete || self.checksum != short_name_checksum(short) {
            return None;
        }
        let units = self.units[..slots]
            .iter()
            .flatten()
            .copied()
            .take_while(|&unit| unit != 0x0000 && unit != 0xFFFF);
        let name = decode_utf16_name(units);
        (!name.is_empty()).then_some(name)
    }
}

/// Unpaired surrogates become '?'; the result stops at the last whole character that fits.
pub(crate) fn decode_utf16_name(units: impl IntoIterator<Item = u16>) -> EntryName {
    let mut name = EntryName::new();
    for ch in char::decode_utf16(units) {
        if name.push(ch.unwrap_or('?')).is_err() {
            break;
        }
    }
    name
}

/// 8.3 field as text: trailing blanks dropped, dot only before a non-blank extension.
pub fn short_name_to_text<const N: usize>(short: &[u8; 11], lowercase: bool) -> String<N> {
    let mut out = String::new();
    let mut push = |byte: u8| {
        let ch = if !byte.is_ascii() {
            '?'
        } else if lowercase {
            byte.to_ascii_lowercase() as char
        } else {
            byte as char
        };
        let _ = out.push(ch);
    };

    let base = trim_blanks(&short[..8]);
    let ext = trim_blanks(&short[8..]);
    base.iter().copied().for_each(&mut push);
    if !ext.is_empty() {
        push(b'.');
        ext.iter().copied().for_each(&mut push);
    }
    out
}

/// Volume label text from the 11-byte field, case preserved.
pub(crate) fn label_text<const N: usize>(raw: &[u8; 11]) -> String<N> {
    let mut out = String::new();
    for &byte in trim_blanks(raw) {
        let _ = out.push(if byte.is_ascii() { byte as char } else { '?' });
    }
    out
}

fn trim_blanks(field: &[u8]) -> &[u8] {
    let len = field
        .iter()
        .rposition(|&byte| byte != b' ')
        .map_or(0, |last| last + 1);
    &field[..len]
}
