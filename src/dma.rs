//! OAM DMA (address 0xFF46). CGB general/HBlank VRAM DMA through
//! HDMA1-5 (0xFF51-0xFF55) is not implemented; only the OAM transfer
//! is handled here.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use crate::consts::{DMA_ADDR, OAM_ADDR};
use crate::memory::{Access, MemoryBus, MemoryDevice, SingleDevice, WriteHandler};
use crate::util::SharedMut;

/// Bytes transferred: one byte moves per 4 T-cycles of CPU progress
/// until all 0xA0 bytes have been copied.
const OAM_BYTES: u16 = 0xa0;
const CYCLES_PER_BYTE: u16 = 4;

pub struct Dma {
    register: Rc<Cell<u8>>,
    source: u16,
    progress: u16,
    active: bool,
    /// Carries cycles that didn't amount to a whole byte yet, so
    /// `clock` can be called with any T-cycle count (not just
    /// multiples of 4) without losing time.
    sub_cycles: u16,
}

impl Dma {
    pub fn new() -> Self {
        Self {
            register: Rc::new(Cell::new(0xff)),
            source: 0,
            progress: 0,
            active: false,
            sub_cycles: 0,
        }
    }

    #[inline(always)]
    pub fn active(&self) -> bool {
        self.active
    }

    fn start(&mut self, value: u8) -> u8 {
        self.source = (value as u16) << 8;
        self.progress = 0;
        self.sub_cycles = 0;
        self.active = true;
        value
    }

    /// Advances the pending transfer by `cycles` T-cycles, copying
    /// through `bus` one byte at a time. External collaborators should
    /// treat OAM as inaccessible to the CPU while active; this core
    /// does not itself enforce that.
    pub fn clock(&mut self, cycles: u16, bus: &mut MemoryBus) {
        if !self.active {
            return;
        }
        self.sub_cycles += cycles;
        while self.sub_cycles >= CYCLES_PER_BYTE && self.active {
            self.sub_cycles -= CYCLES_PER_BYTE;
            let byte = bus.read(self.source + self.progress);
            bus.write(OAM_ADDR + self.progress, byte);
            self.progress += 1;
            if self.progress >= OAM_BYTES {
                self.active = false;
            }
        }
    }

    pub fn install(dma: SharedMut<Dma>, bus: &mut MemoryBus) {
        let cell = dma.borrow().register.clone();
        let handler_dma = dma;
        let handler: WriteHandler = Rc::new(RefCell::new(move |_addr, _previous, value, _failed| handler_dma.borrow_mut().start(value)));
        bus.push_device(DMA_ADDR..=DMA_ADDR, MemoryDevice::Single(SingleDevice::new(DMA_ADDR, cell, Access::Both).with_handler(handler)), false);
    }
}

impl Default for Dma {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ROM_BANK_SIZE;
    use crate::memory::{ArrayDevice, MemoryDevice};
    use crate::util::new_shared_mut;

    #[test]
    fn test_full_transfer_copies_oam_bytes() {
        let mut bus = MemoryBus::new();
        let mut source = vec![0u8; ROM_BANK_SIZE];
        for (i, byte) in source.iter_mut().enumerate().take(0xa0) {
            *byte = i as u8;
        }
        bus.push_device(0x0000..=0x3fff, MemoryDevice::Array(ArrayDevice::new(0x0000, new_shared_mut(source), Access::Both)), false);
        bus.push_device(OAM_ADDR..=OAM_ADDR + 0x9f, MemoryDevice::Array(ArrayDevice::new(OAM_ADDR, new_shared_mut(vec![0u8; 0xa0]), Access::Both)), false);

        let dma = new_shared_mut(Dma::new());
        Dma::install(dma.clone(), &mut bus);
        bus.write(DMA_ADDR, 0x00);
        assert!(dma.borrow().active());

        dma.borrow_mut().clock(0xa0 * 4, &mut bus);
        assert!(!dma.borrow().active());
        assert_eq!(bus.read(OAM_ADDR), 0x00);
        assert_eq!(bus.read(OAM_ADDR + 0x10), 0x10);
        assert_eq!(bus.read(OAM_ADDR + 0x9f), 0x9f);
    }

    #[test]
    fn test_partial_clock_leaves_transfer_active() {
        let mut bus = MemoryBus::new();
        bus.push_device(0x0000..=0x3fff, MemoryDevice::Array(ArrayDevice::new(0x0000, new_shared_mut(vec![0xabu8; ROM_BANK_SIZE]), Access::Both)), false);
        bus.push_device(OAM_ADDR..=OAM_ADDR + 0x9f, MemoryDevice::Array(ArrayDevice::new(OAM_ADDR, new_shared_mut(vec![0u8; 0xa0]), Access::Both)), false);

        let dma = new_shared_mut(Dma::new());
        Dma::install(dma.clone(), &mut bus);
        bus.write(DMA_ADDR, 0x00);
        dma.borrow_mut().clock(8, &mut bus);
        assert!(dma.borrow().active());
        assert_eq!(bus.read(OAM_ADDR), 0xab);
        assert_eq!(bus.read(OAM_ADDR + 2), 0x00);
    }
}
