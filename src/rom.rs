//! Cartridge parsing and the MBC1 bank-switch mapper. Bank-select
//! state lives in [`Mbc1State`], shared behind an `Rc<RefCell<_>>`
//! that the installed ROM/RAM devices' write handlers close over.

use std::cell::RefCell;
use std::rc::Rc;

use crate::consts::{CART_RAM_BANK_SIZE, ROM_BANK_SIZE};
use crate::error::Error;
use crate::event::DebugHooks;
use crate::memory::{shared_access, Access, ArrayDevice, MemoryBus, MemoryDevice, SharedAccess, WriteHandler};
use crate::util::{new_shared_mut, SharedMut};

/// Cartridge type byte at 0x147. Every code the header format defines
/// is recognized so a "not implemented" error names the mapper, but
/// only [`Mapper::RomOnly`] and [`Mapper::Mbc1`] are actually backed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RomType {
    RomOnly = 0x00,
    Mbc1 = 0x01,
    Mbc1Ram = 0x02,
    Mbc1RamBattery = 0x03,
    Mbc2 = 0x05,
    Mbc2Battery = 0x06,
    RomRam = 0x08,
    RomRamBattery = 0x09,
    Mmm01 = 0x0b,
    Mmm01Ram = 0x0c,
    Mmm01RamBattery = 0x0d,
    Mbc3TimerBattery = 0x0f,
    Mbc3TimerRamBattery = 0x10,
    Mbc3 = 0x11,
    Mbc3Ram = 0x12,
    Mbc3RamBattery = 0x13,
    Mbc5 = 0x19,
    Mbc5Ram = 0x1a,
    Mbc5RamBattery = 0x1b,
    Mbc5Rumble = 0x1c,
    Mbc5RumbleRam = 0x1d,
    Mbc5RumbleRamBattery = 0x1e,
    Mbc6 = 0x20,
    Mbc7SensorRumbleRamBattery = 0x22,
    PocketCamera = 0xfc,
    BandaiTama5 = 0xfd,
    HuC3 = 0xfe,
    HuC1RamBattery = 0xff,
}

impl RomType {
    fn from_header(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(RomType::RomOnly),
            0x01 => Some(RomType::Mbc1),
            0x02 => Some(RomType::Mbc1Ram),
            0x03 => Some(RomType::Mbc1RamBattery),
            0x05 => Some(RomType::Mbc2),
            0x06 => Some(RomType::Mbc2Battery),
            0x08 => Some(RomType::RomRam),
            0x09 => Some(RomType::RomRamBattery),
            0x0b => Some(RomType::Mmm01),
            0x0c => Some(RomType::Mmm01Ram),
            0x0d => Some(RomType::Mmm01RamBattery),
            0x0f => Some(RomType::Mbc3TimerBattery),
            0x10 => Some(RomType::Mbc3TimerRamBattery),
            0x11 => Some(RomType::Mbc3),
            0x12 => Some(RomType::Mbc3Ram),
            0x13 => Some(RomType::Mbc3RamBattery),
            0x19 => Some(RomType::Mbc5),
            0x1a => Some(RomType::Mbc5Ram),
            0x1b => Some(RomType::Mbc5RamBattery),
            0x1c => Some(RomType::Mbc5Rumble),
            0x1d => Some(RomType::Mbc5RumbleRam),
            0x1e => Some(RomType::Mbc5RumbleRamBattery),
            0x20 => Some(RomType::Mbc6),
            0x22 => Some(RomType::Mbc7SensorRumbleRamBattery),
            0xfc => Some(RomType::PocketCamera),
            0xfd => Some(RomType::BandaiTama5),
            0xfe => Some(RomType::HuC3),
            0xff => Some(RomType::HuC1RamBattery),
            _ => None,
        }
    }

    fn mapper(self) -> Option<Mapper> {
        match self {
            RomType::RomOnly => Some(Mapper::RomOnly),
            RomType::Mbc1 | RomType::Mbc1Ram | RomType::Mbc1RamBattery => Some(Mapper::Mbc1),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mapper {
    RomOnly,
    Mbc1,
}

/// Decoded from the compatibility flag at header byte 0x143.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compatibility {
    DmgOnly,
    CgbOnly,
    Universal,
}

impl Compatibility {
    fn from_header(value: u8) -> Self {
        match value & 0b1101_1111 {
            0b1000_0000 => Compatibility::Universal,
            0b1100_0000 => Compatibility::CgbOnly,
            _ => Compatibility::DmgOnly,
        }
    }
}

fn rom_bank_count(code: u8) -> Option<u32> {
    match code {
        0x00..=0x08 => Some(2u32 << code),
        _ => None,
    }
}

fn ram_bank_count(code: u8) -> Option<u32> {
    match code {
        0x00 => Some(0),
        0x02 => Some(1),
        0x03 => Some(4),
        0x04 => Some(16),
        0x05 => Some(8),
        _ => None,
    }
}

/// Shared bank-switch state behind the write handlers installed on
/// the ROM bank 0 and ROM bank 1 devices. Owns the full bank tables
/// (`rom_banks`, `ram_banks`) and clones of the `Rc<RefCell<Vec<u8>>>`
/// buffers the bus-facing devices read from directly, the way the
/// original's lambdas capture `this` and call `rom_bank_01_md_->Switch`.
struct Mbc1State {
    rom_banks: Vec<Vec<u8>>,
    ram_banks: Vec<Vec<u8>>,
    rom_bank_select: u8,
    ram_bank_select: u8,
    ram_enabled: bool,
    banking_mode: u8,
    rom_bank1_data: SharedMut<Vec<u8>>,
    ram_data: SharedMut<Vec<u8>>,
    ram_access: SharedAccess,
    hooks: SharedMut<DebugHooks>,
}

impl Mbc1State {
    fn handle_rom_bank0_write(&mut self, address: u16, previous: u8, value: u8) -> u8 {
        if address <= 0x1fff {
            self.ram_enabled = value & 0x0f == 0x0a;
            self.ram_access.set(if self.ram_enabled && !self.ram_banks.is_empty() {
                Access::Both
            } else {
                Access::None
            });
        } else {
            let masked = if self.rom_banks.len() > 0x20 {
                0x1f
            } else {
                ((self.rom_banks.len() as u8).wrapping_sub(1)) & 0x1f
            };
            let mut bank = (value & 0x1f) & masked;
            if bank == 0 {
                bank = 1;
            }
            if bank != self.rom_bank_select {
                self.rom_bank_select = bank;
                self.rom_bank1_data.borrow_mut().copy_from_slice(&self.rom_banks[bank as usize]);
                self.hooks.borrow_mut().bank_change(bank);
            }
        }
        previous
    }

    fn handle_rom_bank1_write(&mut self, address: u16, previous: u8, value: u8) -> u8 {
        if address <= 0x5fff {
            if self.ram_banks.is_empty() {
                return previous;
            }
            let bank = (value & 0x03) % self.ram_banks.len() as u8;
            if bank != self.ram_bank_select {
                self.ram_banks[self.ram_bank_select as usize] = self.ram_data.borrow().clone();
                self.ram_bank_select = bank;
                self.ram_data.borrow_mut().copy_from_slice(&self.ram_banks[self.ram_bank_select as usize]);
                self.hooks.borrow_mut().bank_change(self.ram_bank_select);
            }
        } else {
            self.banking_mode = value & 0x01;
        }
        previous
    }
}

pub struct Cartridge {
    pub rom_type: RomType,
    pub compatibility: Compatibility,
    pub rom_bank_count: u32,
    pub ram_bank_count: u32,
    mapper: Mapper,
    rom_banks: Vec<Vec<u8>>,
    ram_banks: Vec<Vec<u8>>,
    state: Option<Rc<RefCell<Mbc1State>>>,
}

impl Cartridge {
    /// Parses a ROM image's header and splits it into bank-sized
    /// buffers. Does not touch the bus; call [`Cartridge::install`]
    /// for that once the cartridge is known to be valid.
    pub fn new(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 0x150 {
            return Err(Error::RomSize);
        }
        let compatibility = Compatibility::from_header(data[0x143]);
        let rom_type = RomType::from_header(data[0x147]).ok_or(Error::UnsupportedMapper(data[0x147]))?;
        let mapper = rom_type.mapper().ok_or(Error::UnsupportedMapper(data[0x147]))?;
        let rom_bank_count = rom_bank_count(data[0x148]).ok_or(Error::InvalidHeader)?;
        let ram_bank_count = ram_bank_count(data[0x149]).ok_or(Error::InvalidHeader)?;

        let expected_len = rom_bank_count as usize * ROM_BANK_SIZE;
        if data.len() < expected_len {
            return Err(Error::RomSize);
        }

        let rom_banks = data[..expected_len].chunks_exact(ROM_BANK_SIZE).map(|chunk| chunk.to_vec()).collect();
        let ram_banks = vec![vec![0u8; CART_RAM_BANK_SIZE]; ram_bank_count as usize];

        Ok(Self {
            rom_type,
            compatibility,
            rom_bank_count,
            ram_bank_count,
            mapper,
            rom_banks,
            ram_banks,
            state: None,
        })
    }

    /// Installs the cartridge's devices onto `bus`: a fixed ROM bank 0
    /// over 0x0000-0x3FFF, a switching ROM bank 1..N-1 over
    /// 0x4000-0x7FFF, and (when the header declares RAM) a switching
    /// RAM bank over 0xA000-0xBFFF, initially disabled.
    pub fn install(&mut self, bus: &mut MemoryBus, hooks: SharedMut<DebugHooks>) {
        let bank0_data = new_shared_mut(self.rom_banks[0].clone());
        let bank1_index = if self.rom_banks.len() > 1 { 1 } else { 0 };
        let bank1_data = new_shared_mut(self.rom_banks[bank1_index].clone());
        let ram_data = new_shared_mut(vec![0u8; CART_RAM_BANK_SIZE]);
        let ram_access = shared_access(Access::None);

        match self.mapper {
            Mapper::RomOnly => {
                bus.push_device(0x0000..=0x3fff, MemoryDevice::Array(ArrayDevice::new(0x0000, bank0_data, Access::Read)), false);
                if self.rom_banks.len() > 1 {
                    bus.push_device(0x4000..=0x7fff, MemoryDevice::Array(ArrayDevice::new(0x4000, bank1_data, Access::Read)), false);
                }
                if !self.ram_banks.is_empty() {
                    ram_access.set(Access::Both);
                    bus.push_device(
                        0xa000..=0xbfff,
                        MemoryDevice::Array(ArrayDevice::with_shared_access(0xa000, ram_data, ram_access)),
                        false,
                    );
                }
            }
            Mapper::Mbc1 => {
                let state = Rc::new(RefCell::new(Mbc1State {
                    rom_banks: self.rom_banks.clone(),
                    ram_banks: self.ram_banks.clone(),
                    rom_bank_select: bank1_index as u8,
                    ram_bank_select: 0,
                    ram_enabled: false,
                    banking_mode: 0,
                    rom_bank1_data: bank1_data.clone(),
                    ram_data: ram_data.clone(),
                    ram_access: ram_access.clone(),
                    hooks,
                }));

                let bank0_state = state.clone();
                let bank0_handler: WriteHandler = Rc::new(RefCell::new(move |addr, previous, value, _failed| {
                    bank0_state.borrow_mut().handle_rom_bank0_write(addr, previous, value)
                }));
                bus.push_device(
                    0x0000..=0x3fff,
                    MemoryDevice::Array(ArrayDevice::new(0x0000, bank0_data, Access::Read).with_handler(bank0_handler)),
                    false,
                );

                let bank1_state = state.clone();
                let bank1_handler: WriteHandler = Rc::new(RefCell::new(move |addr, previous, value, _failed| {
                    bank1_state.borrow_mut().handle_rom_bank1_write(addr, previous, value)
                }));
                bus.push_device(
                    0x4000..=0x7fff,
                    MemoryDevice::Array(ArrayDevice::new(0x4000, bank1_data, Access::Read).with_handler(bank1_handler)),
                    false,
                );

                if !self.ram_banks.is_empty() {
                    bus.push_device(
                        0xa000..=0xbfff,
                        MemoryDevice::Array(ArrayDevice::with_shared_access(0xa000, ram_data, ram_access)),
                        false,
                    );
                }

                self.state = Some(state);
            }
        }
    }
}
