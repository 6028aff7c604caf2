//! The Sharp LR35902 core: register file, interrupt dispatch, and the
//! `step`/`service_interrupts` pair the emulator harness drives every
//! tick. Register state lives in [`crate::register::Registers`] and
//! memory access goes through [`crate::memory::MemoryBus`]; the
//! `ime_pending` latch implements `EI`'s one-instruction delay before
//! interrupts actually become enabled.

use std::cell::Cell;
use std::rc::Rc;

use crate::consts::{IE_ADDR, IF_ADDR};
use crate::event::DebugHooks;
use crate::inst;
use crate::memory::{Access, MemoryBus, MemoryDevice, SingleDevice};
use crate::register::{Reg, Registers};
use crate::util::SharedMut;

/// The five interrupt sources, in priority order: VBlank, LCD STAT,
/// Timer, Serial, Joypad.
pub const INT_VBLANK_BIT: u8 = 0x01;
pub const INT_STAT_BIT: u8 = 0x02;
pub const INT_TIMER_BIT: u8 = 0x04;
pub const INT_SERIAL_BIT: u8 = 0x08;
pub const INT_PAD_BIT: u8 = 0x10;

const INT_VECTORS: [u16; 5] = [0x40, 0x48, 0x50, 0x58, 0x60];

/// T-cycles a serviced interrupt bills to the tick: 2 M-cycles idle, 2
/// M-cycles to push PC, 1 M-cycle to load the vector.
const INTERRUPT_DISPATCH_CYCLES: u8 = 20;

pub struct Cpu {
    pub regs: Registers,
    bus: MemoryBus,
    ime: bool,
    /// Set by `EI`, adopted into `ime` at the end of the *following*
    /// instruction.
    ime_pending: bool,
    halted: bool,
    ie: Rc<Cell<u8>>,
    if_: Rc<Cell<u8>>,
    hooks: SharedMut<DebugHooks>,
}

impl Cpu {
    /// Builds a fresh core over `bus`, installing the IE/IF registers
    /// as locked single-value devices — CPU-owned ports that must
    /// never be shadowed by another device.
    pub fn new(mut bus: MemoryBus, hooks: SharedMut<DebugHooks>) -> Self {
        let ie = Rc::new(Cell::new(0x00));
        let if_ = Rc::new(Cell::new(0xe1));
        bus.push_device(IE_ADDR..=IE_ADDR, MemoryDevice::Single(SingleDevice::new(IE_ADDR, ie.clone(), Access::Both)), true);
        bus.push_device(IF_ADDR..=IF_ADDR, MemoryDevice::Single(SingleDevice::new(IF_ADDR, if_.clone(), Access::Both)), true);
        Self {
            regs: Registers::new(),
            bus,
            ime: false,
            ime_pending: false,
            halted: false,
            ie,
            if_,
            hooks,
        }
    }

    pub fn regs(&self) -> &Registers {
        &self.regs
    }

    pub fn regs_i(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    pub fn bus_i(&mut self) -> &mut MemoryBus {
        &mut self.bus
    }

    pub fn hooks(&self) -> &SharedMut<DebugHooks> {
        &self.hooks
    }

    #[inline(always)]
    pub fn pc(&self) -> u16 {
        self.regs.pc
    }

    #[inline(always)]
    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn set_halted(&mut self, value: bool) {
        self.halted = value;
    }

    #[inline(always)]
    pub fn ime(&self) -> bool {
        self.ime
    }

    pub fn set_ime(&mut self, value: bool) {
        self.ime = value;
        self.ime_pending = false;
    }

    /// `EI`'s effect: schedules `ime` to become true at the end of the
    /// instruction that follows, never this one.
    pub fn request_ime_pending(&mut self) {
        self.ime_pending = true;
    }

    #[inline(always)]
    pub fn if_byte(&self) -> u8 {
        self.if_.get()
    }

    #[inline(always)]
    pub fn ie_byte(&self) -> u8 {
        self.ie.get()
    }

    /// ORs freshly observed interrupt requests from the peripheral
    /// subsystems into IF. Called by the harness once per tick, before
    /// [`Cpu::service_interrupts`].
    pub fn raise_interrupts(&mut self, bits: u8) {
        self.if_.set(self.if_.get() | bits);
    }

    pub fn read8(&self, addr: u16) -> u8 {
        let value = self.bus.read(addr);
        self.hooks.borrow_mut().mem_read(addr, value);
        value
    }

    pub fn write8(&mut self, addr: u16, value: u8) {
        let previous = self.bus.read(addr);
        self.bus.write(addr, value);
        self.hooks.borrow_mut().mem_write(addr, previous, value);
    }

    /// Decrements SP by 2, then stores `value` little-endian at the
    /// new SP.
    pub fn push_word(&mut self, value: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        let sp = self.regs.sp;
        self.write8(sp, (value & 0x00ff) as u8);
        self.write8(sp.wrapping_add(1), (value >> 8) as u8);
    }

    /// Reads the little-endian word at SP, then increments SP by 2.
    pub fn pop_word(&mut self) -> u16 {
        let sp = self.regs.sp;
        let lo = self.read8(sp) as u16;
        let hi = self.read8(sp.wrapping_add(1)) as u16;
        self.regs.sp = sp.wrapping_add(2);
        lo | (hi << 8)
    }

    /// Fetches and executes one instruction, or idles for 4 T-cycles
    /// while halted. Interrupt servicing is the harness's job (the
    /// fixed tick order is step → DMA → interrupts → timers → PPU),
    /// not this method's.
    pub fn step(&mut self) -> u8 {
        if self.halted {
            return 4;
        }

        let adopt_ime = self.ime_pending;
        let pc = self.regs.pc;
        self.hooks.borrow_mut().pre_exec(pc);

        let (op, len) = inst::fetch(pc, &self.bus);
        self.regs.pc = pc.wrapping_add(len);

        #[cfg(feature = "cpulog")]
        {
            let text = format!("{:?}", op);
            self.hooks.borrow_mut().emit_instruction(pc, len as u8, &text);
        }

        let cycles = op.execute(self);

        if adopt_ime {
            self.ime = true;
            self.ime_pending = false;
        }

        self.hooks.borrow_mut().post_exec(self.regs.pc);
        cycles
    }

    /// Services the highest-priority pending interrupt, if IME allows
    /// it. HALT always clears on a pending interrupt, even with IME
    /// off — in that case execution simply resumes without vectoring.
    pub fn service_interrupts(&mut self) -> u8 {
        let pending = self.if_.get() & self.ie.get() & 0x1f;
        if pending == 0 {
            return 0;
        }
        if self.halted {
            self.halted = false;
        }
        if !self.ime {
            return 0;
        }

        let bit = pending.trailing_zeros();
        self.ime = false;
        self.if_.set(self.if_.get() & !(1 << bit));

        let pc = self.regs.pc;
        let sp = self.regs.sp;
        self.push_word(pc);
        self.regs.pc = INT_VECTORS[bit as usize];
        self.hooks.borrow_mut().call(pc, sp, self.regs.pc);

        INTERRUPT_DISPATCH_CYCLES
    }

    #[inline(always)]
    pub fn read_reg(&self, target: Reg) -> u16 {
        self.regs.read(target)
    }

    #[inline(always)]
    pub fn write_reg(&mut self, target: Reg, value: u16) {
        self.regs.write(target, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DebugHooks;
    use crate::memory::ArrayDevice;
    use crate::util::new_shared_mut;

    fn cpu_with_program(program: &[u8]) -> Cpu {
        let mut bus = MemoryBus::new();
        let mut data = vec![0u8; 0x8000];
        data[..program.len()].copy_from_slice(program);
        bus.push_device(0x0000..=0x7fff, MemoryDevice::Array(ArrayDevice::new(0x0000, new_shared_mut(data), Access::Both)), false);
        bus.push_device(
            0xc000..=0xdfff,
            MemoryDevice::Array(ArrayDevice::new(0xc000, new_shared_mut(vec![0u8; 0x2000]), Access::Both)),
            false,
        );
        bus.push_device(
            0xff80..=0xfffe,
            MemoryDevice::Array(ArrayDevice::new(0xff80, new_shared_mut(vec![0u8; 0x7f]), Access::Both)),
            false,
        );
        let mut cpu = Cpu::new(bus, new_shared_mut(DebugHooks::new()));
        cpu.regs.sp = 0xfffe;
        cpu
    }

    #[test]
    fn test_three_nops_advance_pc_and_cycles() {
        let mut cpu = cpu_with_program(&[0x00, 0x00, 0x00]);
        let mut total = 0u32;
        for _ in 0..3 {
            total += cpu.step() as u32;
        }
        assert_eq!(cpu.pc(), 0x0003);
        assert_eq!(total, 12);
        assert_eq!(cpu.if_byte() & 0x1f, 0);
    }

    #[test]
    fn test_ld_bc_imm16_then_inc_bc() {
        let mut cpu = cpu_with_program(&[0x01, 0xef, 0xbe, 0x03]);
        let c1 = cpu.step();
        let c2 = cpu.step();
        assert_eq!(cpu.regs.b, 0xbe);
        assert_eq!(cpu.regs.c, 0xef);
        assert_eq!(cpu.pc(), 0x0004);
        assert_eq!(c1 + c2, 20);
    }

    #[test]
    fn test_ei_enables_ime_only_after_the_following_instruction() {
        let mut cpu = cpu_with_program(&[0xfb, 0x00, 0x00]);
        cpu.step(); // EI
        assert!(!cpu.ime());
        cpu.step(); // NOP after EI
        assert!(cpu.ime());
    }

    #[test]
    fn test_halt_with_ime_off_resumes_without_vectoring() {
        let mut cpu = cpu_with_program(&[0x76, 0x00]); // HALT, NOP
        cpu.set_ime(false);
        cpu.ie.set(0x01);
        cpu.step(); // HALT
        assert!(cpu.halted());
        cpu.raise_interrupts(0x01);
        cpu.service_interrupts();
        assert!(!cpu.halted());
        assert_eq!(cpu.pc(), 0x0001);
        cpu.step();
        assert_eq!(cpu.pc(), 0x0002);
    }

    #[test]
    fn test_pending_interrupt_pushes_pc_and_vectors() {
        let mut cpu = cpu_with_program(&[0x00]);
        cpu.set_ime(true);
        cpu.ie.set(0x01);
        cpu.regs.pc = 0x0100;
        cpu.raise_interrupts(0x01);
        let cycles = cpu.service_interrupts();
        assert_eq!(cycles, 20);
        assert_eq!(cpu.pc(), 0x0040);
        assert!(!cpu.ime());
        assert_eq!(cpu.if_byte() & 0x01, 0);
        assert_eq!(cpu.pop_word(), 0x0100);
    }
}
