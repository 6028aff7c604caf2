//! The top-level harness: owns the bus-backed subsystems, drives the
//! fixed tick order (step, then DMA, then interrupts, then timers,
//! then PPU), and wires up the WRAM bank-select port, boot ROM
//! overlay/unmap, and cartridge loading.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Display, Formatter};
use std::ops::RangeInclusive;
use std::rc::Rc;

use crate::apu::Apu;
use crate::consts::{
    BOOT_ROM_ADDR, BOOT_ROM_CGB_ADDR, BOOT_ROM_CGB_END, BOOT_ROM_DMG_END, BOOT_UNMAP_ADDR, CPU_CLOCK_HZ, HRAM_ADDR, HRAM_END, HRAM_SIZE, WRAM_0_ADDR, WRAM_0_END, WRAM_1_ADDR, WRAM_1_END,
    WRAM_BANK_SELECT_ADDR, WRAM_BANK_SIZE,
};
use crate::cpu::{Cpu, INT_PAD_BIT, INT_SERIAL_BIT, INT_STAT_BIT, INT_TIMER_BIT, INT_VBLANK_BIT};
use crate::dma::Dma;
use crate::error::Error;
use crate::event::{CpuMode, DebugHooks, Event, EventBus, EventCallback, EventKind};
use crate::info::Info;
use crate::memory::{Access, ArrayDevice, MemoryBus, MemoryDevice, SingleDevice, WriteHandler};
use crate::pad::{Pad, PadKey};
use crate::ppu::Ppu;
use crate::rom::{Cartridge, Compatibility};
use crate::serial::{Serial, SerialDevice};
use crate::timer::Timer;
use crate::util::{new_shared_mut, SharedMut};

/// Which hardware variant the running cartridge targets, inferred from
/// its compatibility flag unless overridden directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameBoyMode {
    Dmg,
    Cgb,
}

impl GameBoyMode {
    pub fn description(&self) -> &'static str {
        match self {
            GameBoyMode::Dmg => "Game Boy (DMG)",
            GameBoyMode::Cgb => "Game Boy Color (CGB)",
        }
    }

    fn from_compatibility(compatibility: Compatibility) -> Self {
        match compatibility {
            Compatibility::DmgOnly => GameBoyMode::Dmg,
            Compatibility::CgbOnly | Compatibility::Universal => GameBoyMode::Cgb,
        }
    }
}

impl Display for GameBoyMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Per-subsystem enable toggles plus the mode, carried as a single
/// plain struct on [`Gameboy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameBoyConfig {
    mode: GameBoyMode,
    ppu_enabled: bool,
    apu_enabled: bool,
    dma_enabled: bool,
    timer_enabled: bool,
    serial_enabled: bool,
    clock_freq: u32,
}

impl GameBoyConfig {
    pub fn mode(&self) -> GameBoyMode {
        self.mode
    }

    pub fn ppu_enabled(&self) -> bool {
        self.ppu_enabled
    }

    pub fn apu_enabled(&self) -> bool {
        self.apu_enabled
    }

    pub fn dma_enabled(&self) -> bool {
        self.dma_enabled
    }

    pub fn timer_enabled(&self) -> bool {
        self.timer_enabled
    }

    pub fn serial_enabled(&self) -> bool {
        self.serial_enabled
    }

    pub fn clock_freq(&self) -> u32 {
        self.clock_freq
    }
}

impl Default for GameBoyConfig {
    fn default() -> Self {
        Self {
            mode: GameBoyMode::Dmg,
            ppu_enabled: true,
            apu_enabled: true,
            dma_enabled: true,
            timer_enabled: true,
            serial_enabled: true,
            clock_freq: CPU_CLOCK_HZ,
        }
    }
}

/// Shared bank-table state behind the WRAM bank-select port (0xFF70):
/// the device at 0xD000-0xDFFF keeps a live buffer the bus
/// reads/writes directly, and this state swaps its contents out on a
/// bank change rather than repointing the device at a different `Rc`.
struct WramState {
    banks: Vec<Vec<u8>>,
    bank1_data: SharedMut<Vec<u8>>,
    select: u8,
}

impl WramState {
    /// Bank 0 coerces to bank 1, matching the same rule MBC1 applies
    /// to its ROM bank register.
    fn handle_select_write(&mut self, value: u8) -> u8 {
        let mut bank = value & 0x07;
        if bank == 0 {
            bank = 1;
        }
        if bank != self.select {
            self.banks[self.select as usize] = self.bank1_data.borrow().clone();
            self.select = bank;
            self.bank1_data.borrow_mut().copy_from_slice(&self.banks[bank as usize]);
        }
        (value & 0x07) | 0xf8
    }
}

fn install_wram(bus: &mut MemoryBus) {
    let banks = vec![vec![0u8; WRAM_BANK_SIZE]; 8];

    let bank0_data = new_shared_mut(banks[0].clone());
    bus.push_device(WRAM_0_ADDR..=WRAM_0_END, MemoryDevice::Array(ArrayDevice::new(WRAM_0_ADDR, bank0_data, Access::Both)), false);

    let bank1_data = new_shared_mut(banks[1].clone());
    bus.push_device(WRAM_1_ADDR..=WRAM_1_END, MemoryDevice::Array(ArrayDevice::new(WRAM_1_ADDR, bank1_data.clone(), Access::Both)), false);

    let state = Rc::new(RefCell::new(WramState { banks, bank1_data, select: 1 }));
    let handler: WriteHandler = Rc::new(RefCell::new(move |_addr, _previous, value, _failed| state.borrow_mut().handle_select_write(value)));
    bus.push_device(
        WRAM_BANK_SELECT_ADDR..=WRAM_BANK_SELECT_ADDR,
        MemoryDevice::Single(SingleDevice::new(WRAM_BANK_SELECT_ADDR, Rc::new(Cell::new(0xf9)), Access::Both).with_handler(handler)),
        false,
    );
}

/// Top-level machine: the CPU plus every peripheral wired onto its
/// bus, and the tick order that ties them together every [`Gameboy::clock`].
pub struct Gameboy {
    config: GameBoyConfig,
    cpu: Cpu,
    ppu: SharedMut<Ppu>,
    dma: SharedMut<Dma>,
    timer: SharedMut<Timer>,
    pad: SharedMut<Pad>,
    serial: SharedMut<Serial>,
    cartridge: Option<Cartridge>,
    hooks: SharedMut<DebugHooks>,
    events: EventBus,
    unmap_requested: Rc<Cell<bool>>,
    boot_rom_ranges: Vec<RangeInclusive<u16>>,
}

impl Gameboy {
    pub fn new(mode: GameBoyMode) -> Self {
        let hooks = new_shared_mut(DebugHooks::new());
        let mut bus = MemoryBus::new();

        install_wram(&mut bus);

        let hram_data = new_shared_mut(vec![0u8; HRAM_SIZE]);
        bus.push_device(HRAM_ADDR..=HRAM_END, MemoryDevice::Array(ArrayDevice::new(HRAM_ADDR, hram_data, Access::Both)), false);

        let ppu = new_shared_mut(Ppu::new());
        Ppu::install(ppu.clone(), &mut bus);

        Apu::install(&mut bus);

        let dma = new_shared_mut(Dma::new());
        Dma::install(dma.clone(), &mut bus);

        let timer = new_shared_mut(Timer::new());
        Timer::install(timer.clone(), &mut bus);

        let pad = new_shared_mut(Pad::new());
        pad.borrow_mut().attach_hooks(hooks.clone());
        Pad::install(pad.clone(), &mut bus);

        let serial = new_shared_mut(Serial::new());
        Serial::install(serial.clone(), &mut bus);

        let unmap_requested = Rc::new(Cell::new(false));
        let unmap_flag = unmap_requested.clone();
        let unmap_handler: WriteHandler = Rc::new(RefCell::new(move |_addr, _previous, value, _failed| {
            if value != 0 {
                unmap_flag.set(true);
            }
            value
        }));
        bus.push_device(
            BOOT_UNMAP_ADDR..=BOOT_UNMAP_ADDR,
            MemoryDevice::Single(SingleDevice::new(BOOT_UNMAP_ADDR, Rc::new(Cell::new(0xff)), Access::Both).with_handler(unmap_handler)),
            false,
        );

        let cpu = Cpu::new(bus, hooks.clone());

        Self {
            config: GameBoyConfig { mode, ..GameBoyConfig::default() },
            cpu,
            ppu,
            dma,
            timer,
            pad,
            serial,
            cartridge: None,
            hooks,
            events: EventBus::new(),
            unmap_requested,
            boot_rom_ranges: Vec::new(),
        }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn config(&self) -> GameBoyConfig {
        self.config
    }

    pub fn mode(&self) -> GameBoyMode {
        self.config.mode
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cartridge.as_ref()
    }

    pub fn subscribe(&mut self, kind: EventKind, callback: EventCallback) {
        self.events.subscribe(kind, callback);
    }

    /// Parses and validates `data` before touching any live state, so
    /// a malformed image leaves the previously running machine intact;
    /// only once the cartridge is known-good does this reset the
    /// machine and install it.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut cartridge = Cartridge::new(data)?;
        let mode = GameBoyMode::from_compatibility(cartridge.compatibility);
        self.reset(mode);
        cartridge.install(self.cpu.bus_i(), self.hooks.clone());
        self.cartridge = Some(cartridge);
        Ok(())
    }

    /// Rebuilds the entire machine fresh. Every subsystem is
    /// `Rc`-owned internally with no outstanding external aliases, so
    /// replacing `self` wholesale is equivalent to (and simpler than)
    /// resetting each subsystem in place.
    pub fn reset(&mut self, mode: GameBoyMode) {
        *self = Self::new(mode);
    }

    /// Overlays a boot ROM image over the cartridge's low bank(s): the
    /// first 256 bytes at 0x0000-0x00FF always, and (for images large
    /// enough to carry one) the CGB second-stage range at
    /// 0x0200-0x08FF. Must run after [`Gameboy::load_rom`] so the boot
    /// device ends up on top of the cartridge's, not under it.
    pub fn load_boot(&mut self, data: &[u8]) {
        let dmg_len = (BOOT_ROM_DMG_END - BOOT_ROM_ADDR + 1) as usize;
        let mut dmg_bytes = data[..dmg_len.min(data.len())].to_vec();
        dmg_bytes.resize(dmg_len, 0);
        let range = BOOT_ROM_ADDR..=BOOT_ROM_DMG_END;
        self.cpu
            .bus_i()
            .push_device(range.clone(), MemoryDevice::Array(ArrayDevice::new(BOOT_ROM_ADDR, new_shared_mut(dmg_bytes), Access::Read)), false);
        self.boot_rom_ranges.push(range);

        if data.len() > dmg_len {
            let cgb_len = (BOOT_ROM_CGB_END - BOOT_ROM_CGB_ADDR + 1) as usize;
            let mut cgb_bytes = data[dmg_len..(dmg_len + cgb_len).min(data.len())].to_vec();
            cgb_bytes.resize(cgb_len, 0);
            let range = BOOT_ROM_CGB_ADDR..=BOOT_ROM_CGB_END;
            self.cpu.bus_i().push_device(
                range.clone(),
                MemoryDevice::Array(ArrayDevice::new(BOOT_ROM_CGB_ADDR, new_shared_mut(cgb_bytes), Access::Read)),
                false,
            );
            self.boot_rom_ranges.push(range);
        }

        self.unmap_requested.set(false);
    }

    fn unmap_boot_rom_if_requested(&mut self) {
        if !self.unmap_requested.get() {
            return;
        }
        self.unmap_requested.set(false);
        for range in self.boot_rom_ranges.drain(..) {
            self.cpu.bus_i().pop_front_device(range);
        }
        self.hooks.borrow_mut().rom_unmap();
    }

    /// Advances the machine by one CPU step, in the fixed order: the
    /// CPU steps, OAM DMA consumes those cycles, pending interrupt
    /// sources are collected into IF and the
    /// highest-priority one is serviced (waking a halted CPU even
    /// with IME off), and only then do the timer and PPU consume the
    /// combined cycle count — so interrupts this tick are always
    /// raised from what the peripherals observed on the *previous*
    /// tick's clocking, never the one about to run.
    pub fn clock(&mut self) -> u16 {
        let was_halted = self.cpu.halted();
        let cpu_cycles = self.cpu.step() as u16;

        if self.config.dma_enabled {
            self.dma.borrow_mut().clock(cpu_cycles, self.cpu.bus_i());
        }

        let mut bits = 0u8;
        {
            let mut ppu = self.ppu.borrow_mut();
            if ppu.int_vblank() {
                bits |= INT_VBLANK_BIT;
                ppu.ack_vblank();
            }
            if ppu.int_stat() {
                bits |= INT_STAT_BIT;
                ppu.ack_stat();
            }
        }
        if self.timer.borrow().int_tima() {
            bits |= INT_TIMER_BIT;
            self.timer.borrow_mut().ack_tima();
        }
        if self.serial.borrow().int_serial() {
            bits |= INT_SERIAL_BIT;
            self.serial.borrow_mut().ack_serial();
        }
        if self.pad.borrow().int_pad() {
            bits |= INT_PAD_BIT;
            self.pad.borrow_mut().ack_pad();
        }
        if bits != 0 {
            self.cpu.raise_interrupts(bits);
        }

        let service_cycles = self.cpu.service_interrupts() as u16;
        let total_cycles = cpu_cycles + service_cycles;

        if self.config.timer_enabled {
            self.timer.borrow_mut().clock(total_cycles);
        }
        if self.config.ppu_enabled {
            self.ppu.borrow_mut().clock(total_cycles);
        }

        self.unmap_boot_rom_if_requested();

        if self.cpu.halted() != was_halted {
            let mode = if self.cpu.halted() { CpuMode::Halted } else { CpuMode::Running };
            self.events.emit(Event::CpuModeChange { mode });
        }

        total_cycles
    }

    pub fn clocks(&mut self, count: usize) -> u64 {
        let mut total = 0u64;
        for _ in 0..count {
            total += self.clock() as u64;
        }
        total
    }

    /// Clocks until PC reaches `addr`, for tests that need to stop at
    /// a known post-boot or post-test-ROM address.
    pub fn step_to(&mut self, addr: u16) -> u64 {
        let mut total = 0u64;
        while self.cpu.pc() != addr {
            total += self.clock() as u64;
        }
        total
    }

    /// Clocks until the PPU has completed a frame, returning a copy of
    /// the framebuffer at that point.
    pub fn next_frame(&mut self) -> Vec<u8> {
        loop {
            self.clock();
            if self.ppu.borrow_mut().take_frame_ready() {
                return self.frame_buffer();
            }
        }
    }

    pub fn frame_buffer(&self) -> Vec<u8> {
        self.ppu.borrow().framebuffer().to_vec()
    }

    pub fn key_press(&mut self, key: PadKey) {
        self.pad.borrow_mut().key_press(key);
    }

    pub fn key_lift(&mut self, key: PadKey) {
        self.pad.borrow_mut().key_lift(key);
    }

    pub fn attach_serial(&mut self, device: Box<dyn SerialDevice>) {
        self.serial.borrow_mut().attach(device);
    }

    pub fn serial_state(&self) -> String {
        self.serial.borrow().device_state()
    }

    pub fn description_debug(&self) -> String {
        let cartridge = match &self.cartridge {
            Some(cart) => format!("{:?}, {} ROM bank(s), {} RAM bank(s)", cart.rom_type, cart.rom_bank_count, cart.ram_bank_count),
            None => String::from("none"),
        };
        format!(
            "{} {}\nMode:       {}\nRegisters:  {}\nCartridge:  {}",
            Info::name(),
            Info::version(),
            self.mode(),
            self.cpu.regs(),
            cartridge,
        )
    }
}

impl Default for Gameboy {
    fn default() -> Self {
        Self::new(GameBoyMode::Dmg)
    }
}

impl Display for Gameboy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description_debug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::DMA_ADDR;

    fn minimal_rom(rom_type: u8, rom_size_code: u8) -> Vec<u8> {
        let bank_count = 2u32 << rom_size_code;
        let mut data = vec![0u8; bank_count as usize * 0x4000];
        data[0x143] = 0x00;
        data[0x147] = rom_type;
        data[0x148] = rom_size_code;
        data[0x149] = 0x00;
        data
    }

    #[test]
    fn test_unmapped_rom_region_reads_as_0xff_before_any_cartridge_is_loaded() {
        let gb = Gameboy::new(GameBoyMode::Dmg);
        assert_eq!(gb.cpu().bus().read(0x0100), 0xff);
    }

    #[test]
    fn test_loading_a_rom_makes_its_bytes_readable_and_picks_dmg_mode() {
        let mut data = minimal_rom(0x00, 0x00);
        data[0x0150] = 0xc9; // a RET opcode sitting right after the header
        let mut gb = Gameboy::new(GameBoyMode::Dmg);
        gb.load_rom(&data).unwrap();
        assert_eq!(gb.cpu().bus().read(0x0150), 0xc9);
        assert_eq!(gb.mode(), GameBoyMode::Dmg);
    }

    #[test]
    fn test_invalid_rom_leaves_the_previously_running_machine_untouched() {
        let good = minimal_rom(0x00, 0x00);
        let mut gb = Gameboy::new(GameBoyMode::Dmg);
        gb.load_rom(&good).unwrap();
        let before = gb.cpu().pc();

        let result = gb.load_rom(&[0u8; 4]);
        assert!(result.is_err());
        assert_eq!(gb.cpu().pc(), before);
        assert!(gb.cartridge().is_some());
    }

    #[test]
    fn test_boot_rom_shadows_cartridge_until_unmap_write() {
        let mut data = minimal_rom(0x00, 0x00);
        data[0x0000] = 0xaa; // cartridge byte at 0x0000, should be hidden initially
        let mut gb = Gameboy::new(GameBoyMode::Dmg);
        gb.load_rom(&data).unwrap();
        gb.load_boot(&[0x11u8; 256]);

        assert_eq!(gb.cpu().bus().read(0x0000), 0x11);
        gb.cpu_mut().bus_i().write(BOOT_UNMAP_ADDR, 0x01);
        gb.clock();
        assert_eq!(gb.cpu().bus().read(0x0000), 0xaa);
    }

    #[test]
    fn test_timer_overflow_interrupt_is_delivered_through_clock() {
        let data = minimal_rom(0x00, 0x00);
        let mut gb = Gameboy::new(GameBoyMode::Dmg);
        gb.load_rom(&data).unwrap();
        gb.cpu_mut().set_ime(true);
        gb.cpu_mut().bus_i().write(0xffff, INT_TIMER_BIT);
        gb.cpu_mut().bus_i().write(crate::consts::TMA_ADDR, 0x00);
        gb.cpu_mut().bus_i().write(crate::consts::TAC_ADDR, 0x05); // enabled, fastest ratio
        gb.cpu_mut().bus_i().write(crate::consts::TIMA_ADDR, 0xff);

        let mut vectored = false;
        for _ in 0..64 {
            gb.clock();
            if gb.cpu().pc() == 0x50 {
                vectored = true;
                break;
            }
        }
        assert!(vectored);
    }

    #[test]
    fn test_oam_dma_write_starts_a_pending_transfer_visible_on_next_clock() {
        let data = minimal_rom(0x00, 0x00);
        let mut gb = Gameboy::new(GameBoyMode::Dmg);
        gb.load_rom(&data).unwrap();
        gb.cpu_mut().bus_i().write(DMA_ADDR, 0x00);
        assert!(gb.dma.borrow().active());
        gb.clocks(200);
        assert!(!gb.dma.borrow().active());
    }

    #[test]
    fn test_key_press_is_observable_through_the_joypad_register() {
        let data = minimal_rom(0x00, 0x00);
        let mut gb = Gameboy::new(GameBoyMode::Dmg);
        gb.load_rom(&data).unwrap();
        gb.key_press(PadKey::A);
        gb.cpu_mut().bus_i().write(crate::consts::PAD_ADDR, 0x20);
        assert_eq!(gb.cpu().bus().read(crate::consts::PAD_ADDR) & 0x01, 0x00);
    }
}
