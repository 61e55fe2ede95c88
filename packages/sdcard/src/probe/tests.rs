use std::{cell::RefCell, collections::{HashMap, VecDeque}, convert::Infallible, rc::Rc};

use embedded_hal::{delay::DelayNs, digital, spi};

use super::{decode_capacity_bytes, SdCard, SdSpiBus};
use crate::{
    block::{BlockDevice, CardKind, Sector, SECTOR_SIZE},
    error::StorageError,
};

#[derive(Default)]
enum Phase {
    #[default]
    Idle,
    AwaitWriteToken(u32),
    WriteData(u32, Vec<u8>),
}

#[derive(Default)]
struct Model {
    inserted: bool,
    cs_low: bool,
    deselected_bytes: usize,
    out: VecDeque<u8>,
    frame: Vec<u8>,
    phase: Phase,
    commands: Vec<(u8, u32)>,
    clocks: Vec<u32>,
    high_capacity: bool,
    legacy: bool,
    bad_echo: bool,
    mute_cmd0: bool,
    acmd41_busy_polls: u32,
    stall_data_token: bool,
    reject_writes: bool,
    blocks: HashMap<u32, Vec<u8>>,
    csd: [u8; 16],
}

impl Model {
    fn exchange(&mut self, input: u8) -> u8 {
        if !self.cs_low {
            self.deselected_bytes += 1;
            return 0xFF;
        }
        let output = self.out.pop_front().unwrap_or(0xFF);
        match core::mem::take(&mut self.phase) {
            Phase::Idle => {
                if !self.frame.is_empty() || (input & 0xC0) == 0x40 {
                    self.frame.push(input);
                    if self.frame.len() == 6 {
                        let frame = core::mem::take(&mut self.frame);
                        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
                        self.handle_command(frame[0] & 0x3F, arg);
                    }
                }
            }
            Phase::AwaitWriteToken(address) => {
                self.phase = if input == 0xFE {
                    Phase::WriteData(address, Vec::new())
                } else {
                    Phase::AwaitWriteToken(address)
                };
            }
            Phase::WriteData(address, mut data) => {
                data.push(input);
                if data.len() == SECTOR_SIZE + 2 {
                    data.truncate(SECTOR_SIZE);
                    if self.reject_writes {
                        self.out.push_back(0x0B);
                    } else {
                        self.blocks.insert(address, data);
                        self.out.extend([0x05, 0x00, 0x00, 0x00]);
                    }
                } else {
                    self.phase = Phase::WriteData(address, data);
                }
            }
        }
        output
    }

    fn handle_command(&mut self, cmd: u8, arg: u32) {
        self.commands.push((cmd, arg));
        self.out.push_back(0xFF);
        match cmd {
            0 => {
                if self.mute_cmd0 {
                    self.out.clear();
                } else {
                    self.out.push_back(0x01);
                }
            }
            8 => {
                if self.legacy {
                    self.out.push_back(0x05);
                } else {
                    let echo = if self.bad_echo { 0x55 } else { 0xAA };
                    self.out.extend([0x01, 0x00, 0x00, 0x01, echo]);
                }
            }
            55 => self.out.push_back(0x01),
            41 => {
                if self.acmd41_busy_polls > 0 {
                    self.acmd41_busy_polls -= 1;
                    self.out.push_back(0x01);
                } else {
                    self.out.push_back(0x00);
                }
            }
            58 => {
                let ocr0 = if self.high_capacity { 0xC0 } else { 0x80 };
                self.out.extend([0x00, ocr0, 0xFF, 0x80, 0x00]);
            }
            16 => self.out.push_back(0x00),
            9 => {
                self.out.extend([0x00, 0xFF, 0xFE]);
                self.out.extend(self.csd);
                self.out.extend([0x00, 0x00]);
            }
            17 => {
                self.out.push_back(0x00);
                if !self.stall_data_token {
                    let data = self
                        .blocks
                        .get(&arg)
                        .cloned()
                        .unwrap_or_else(|| std::vec![0u8; SECTOR_SIZE]);
                    self.out.extend([0xFF, 0xFF, 0xFE]);
                    self.out.extend(data);
                    self.out.extend([0xAB, 0xCD]);
                }
            }
            24 => {
                self.out.push_back(0x00);
                self.phase = Phase::AwaitWriteToken(arg);
            }
            _ => self.out.push_back(0x04),
        }
    }
}

type Shared = Rc<RefCell<Model>>;

struct FakeSpi(Shared);
struct FakeCs(Shared);
struct FakeDetect(Shared);
struct NoDelay;

impl spi::ErrorType for FakeSpi {
    type Error = Infallible;
}

impl spi::SpiBus<u8> for FakeSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut model = self.0.borrow_mut();
        for word in words {
            *word = model.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut model = self.0.borrow_mut();
        for &word in words {
            model.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let mut model = self.0.borrow_mut();
        for idx in 0..read.len().max(write.len()) {
            let byte = model.exchange(write.get(idx).copied().unwrap_or(0xFF));
            if let Some(slot) = read.get_mut(idx) {
                *slot = byte;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut model = self.0.borrow_mut();
        for word in words {
            *word = model.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl SdSpiBus for FakeSpi {
    fn set_clock_hz(&mut self, hz: u32) -> Result<(), Self::Error> {
        self.0.borrow_mut().clocks.push(hz);
        Ok(())
    }
}

impl digital::ErrorType for FakeCs {
    type Error = Infallible;
}

impl digital::OutputPin for FakeCs {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().cs_low = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut model = self.0.borrow_mut();
        model.cs_low = false;
        model.frame.clear();
        model.out.clear();
        Ok(())
    }
}

impl digital::ErrorType for FakeDetect {
    type Error = Infallible;
}

impl digital::InputPin for FakeDetect {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.borrow().inserted)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.borrow().inserted)
    }
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

fn fake_card(setup: impl FnOnce(&mut Model)) -> (SdCard<FakeSpi, FakeCs, FakeDetect, NoDelay>, Shared) {
    let model = Rc::new(RefCell::new(Model {
        inserted: true,
        high_capacity: true,
        ..Model::default()
    }));
    setup(&mut *model.borrow_mut());
    let card = SdCard::new(
        FakeSpi(model.clone()),
        FakeCs(model.clone()),
        FakeDetect(model.clone()),
        NoDelay,
    );
    (card, model)
}

fn count(model: &Shared, cmd: u8) -> usize {
    model
        .borrow()
        .commands
        .iter()
        .filter(|(seen, _)| *seen == cmd)
        .count()
}

#[test]
fn sdhc_bring_up_negotiates_block_addressing() {
    let (mut card, model) = fake_card(|m| m.acmd41_busy_polls = 3);

    assert_eq!(card.initialise(), Ok(()));
    assert_eq!(card.kind(), Some(CardKind::Sdhc));
    assert_eq!(card.version(), Some(super::SdCardVersion::V2));

    let model = model.borrow();
    let sequence: Vec<u8> = model.commands.iter().map(|(cmd, _)| *cmd).collect();
    assert_eq!(sequence, [0, 8, 55, 41, 55, 41, 55, 41, 55, 41, 58]);
    assert_eq!(model.commands[1].1, 0x1AA);
    assert_eq!(model.commands[3].1, 0x4000_0000);
    assert_eq!(model.clocks, [400_000, 25_000_000]);
    assert!(model.deselected_bytes >= 10);
    assert!(!model.cs_low);
}

#[test]
fn construction_leaves_bus_alone_until_initialise() {
    let (mut card, model) = fake_card(|m| m.cs_low = true);

    assert!(model.borrow().cs_low);
    assert_eq!(model.borrow().deselected_bytes, 0);
    assert!(model.borrow().clocks.is_empty());
    assert_eq!(card.clock_hz(), 0);

    assert_eq!(card.initialise(), Ok(()));
    assert!(!model.borrow().cs_low);
    assert_eq!(card.clock_hz(), 25_000_000);
}

#[test]
fn legacy_sdsc_card_sets_block_length() {
    let (mut card, model) = fake_card(|m| {
        m.legacy = true;
        m.high_capacity = false;
    });

    assert_eq!(card.initialise(), Ok(()));
    assert_eq!(card.kind(), Some(CardKind::Sdsc));
    assert_eq!(card.version(), Some(super::SdCardVersion::V1));
    assert!(model.borrow().commands.contains(&(16, 512)));
}

#[test]
fn sdhc_card_skips_block_length() {
    let (mut card, model) = fake_card(|_| {});
    assert_eq!(card.initialise(), Ok(()));
    assert_eq!(count(&model, 16), 0);
}

#[test]
fn silent_cmd0_is_init_failure_after_ten_tries() {
    let (mut card, model) = fake_card(|m| m.mute_cmd0 = true);

    assert_eq!(card.initialise(), Err(StorageError::InitFailed));
    assert!(!card.is_initialized());
    assert_eq!(count(&model, 0), 10);
    assert_eq!(model.borrow().clocks, [400_000]);
}

#[test]
fn acmd41_never_ready_is_init_failure() {
    let (mut card, model) = fake_card(|m| m.acmd41_busy_polls = u32::MAX);

    assert_eq!(card.initialise(), Err(StorageError::InitFailed));
    assert_eq!(count(&model, 41), 1_000);
    assert_eq!(count(&model, 58), 0);
}

#[test]
fn cmd8_echo_mismatch_is_init_failure() {
    let (mut card, model) = fake_card(|m| m.bad_echo = true);

    assert_eq!(card.initialise(), Err(StorageError::InitFailed));
    assert_eq!(count(&model, 55), 0);
}

#[test]
fn card_detect_is_active_low() {
    let (mut card, model) = fake_card(|m| m.inserted = false);

    assert!(!card.present());
    assert_eq!(card.initialise(), Err(StorageError::NoCard));
    assert!(model.borrow().commands.is_empty());

    model.borrow_mut().inserted = true;
    assert!(card.present());
}

#[test]
fn sdsc_reads_use_byte_addresses() {
    let (mut card, model) = fake_card(|m| {
        m.high_capacity = false;
        let mut block = std::vec![0u8; SECTOR_SIZE];
        block[0] = 0x42;
        block[511] = 0x24;
        m.blocks.insert(3 * 512, block);
    });
    card.initialise().unwrap();

    let mut out: Sector = [0u8; SECTOR_SIZE];
    assert_eq!(card.read_block(3, &mut out), Ok(()));
    assert_eq!((out[0], out[511]), (0x42, 0x24));
    assert_eq!(model.borrow().commands.last(), Some(&(17, 1536)));
}

#[test]
fn sdhc_reads_use_block_numbers() {
    let (mut card, model) = fake_card(|m| {
        m.blocks.insert(3, std::vec![0x5A; SECTOR_SIZE]);
    });
    card.initialise().unwrap();

    let mut out: Sector = [0u8; SECTOR_SIZE];
    card.read_block(3, &mut out).unwrap();
    assert!(out.iter().all(|&b| b == 0x5A));
    assert_eq!(model.borrow().commands.last(), Some(&(17, 3)));
}

#[test]
fn missing_data_token_fails_read_and_releases_card() {
    let (mut card, model) = fake_card(|m| m.stall_data_token = true);
    card.initialise().unwrap();

    let mut out: Sector = [0u8; SECTOR_SIZE];
    assert_eq!(card.read_block(0, &mut out), Err(StorageError::ReadFailed));
    assert!(!model.borrow().cs_low);
}

#[test]
fn read_before_init_fails() {
    let (mut card, _model) = fake_card(|_| {});
    let mut out: Sector = [0u8; SECTOR_SIZE];
    assert_eq!(card.read_block(0, &mut out), Err(StorageError::ReadFailed));
}

#[test]
fn write_block_waits_for_busy_release() {
    let (mut card, model) = fake_card(|_| {});
    card.initialise().unwrap();

    let data: Sector = [0xC3; SECTOR_SIZE];
    assert_eq!(card.write_block(5, &data), Ok(()));

    let model = model.borrow();
    assert_eq!(model.blocks.get(&5).map(Vec::as_slice), Some(&data[..]));
    assert!(!model.cs_low);
}

#[test]
fn rejected_write_maps_to_write_failed() {
    let (mut card, _model) = fake_card(|m| m.reject_writes = true);
    card.initialise().unwrap();

    let data: Sector = [0u8; SECTOR_SIZE];
    assert_eq!(card.write_block(1, &data), Err(StorageError::WriteFailed));
}

#[test]
fn capacity_comes_from_csd_v2() {
    let (mut card, _model) = fake_card(|m| {
        m.csd[0] = 0x40;
        m.csd[8] = 0x3B;
        m.csd[9] = 0x37;
    });
    card.initialise().unwrap();

    assert_eq!(card.capacity_bytes(), Ok(15_160 * 512 * 1024));
}

#[test]
fn csd_v1_capacity_decodes_multiplier() {
    // READ_BL_LEN = 9, C_SIZE = 4095, C_SIZE_MULT = 7: a 1 GiB SDSC card.
    let mut csd = [0u8; 16];
    csd[5] = 0x09;
    csd[6] = 0x03;
    csd[7] = 0xFF;
    csd[8] = 0xC0;
    csd[9] = 0x03;
    csd[10] = 0x80;
    assert_eq!(decode_capacity_bytes(&csd), Some(4096 * 512 * 512));
}

#[test]
fn unknown_csd_structure_is_rejected() {
    let mut csd = [0u8; 16];
    csd[0] = 0x80;
    assert_eq!(decode_capacity_bytes(&csd), None);
}
