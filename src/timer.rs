//! DIV/TIMA/TMA/TAC timer registers. Reads and writes go through the
//! same `Rc<Cell<u8>>` cells the bus's single-value devices expose, so
//! `clock()` always sees whatever the CPU or a debugger just wrote
//! without a second round-trip through the bus.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use crate::consts::{DIV_ADDR, TAC_ADDR, TIMA_ADDR, TMA_ADDR};
use crate::memory::{Access, MemoryBus, MemoryDevice, SingleDevice, WriteHandler};
use crate::util::SharedMut;

pub struct Timer {
    div: Rc<Cell<u8>>,
    tima: Rc<Cell<u8>>,
    tma: Rc<Cell<u8>>,
    tac: Rc<Cell<u8>>,
    div_clock: u16,
    tima_clock: u16,
    tima_enabled: bool,
    tima_ratio: u16,
    int_tima: bool,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div: Rc::new(Cell::new(0)),
            tima: Rc::new(Cell::new(0)),
            tma: Rc::new(Cell::new(0)),
            tac: Rc::new(Cell::new(0xf8)),
            div_clock: 0,
            tima_clock: 0,
            tima_enabled: false,
            tima_ratio: 1024,
            int_tima: false,
        }
    }

    /// Advances DIV/TIMA by `cycles` T-cycles. TIMA's period is one
    /// of `{1024, 16, 64, 256}` selected by TAC bits 0-1, active only
    /// while TAC bit 2 is set.
    pub fn clock(&mut self, cycles: u16) {
        self.div_clock += cycles;
        while self.div_clock >= 256 {
            self.div.set(self.div.get().wrapping_add(1));
            self.div_clock -= 256;
        }

        if self.tima_enabled {
            self.tima_clock += cycles;
            while self.tima_clock >= self.tima_ratio {
                if self.tima.get() == 0xff {
                    self.int_tima = true;
                    self.tima.set(self.tma.get());
                } else {
                    self.tima.set(self.tima.get().wrapping_add(1));
                }
                self.tima_clock -= self.tima_ratio;
            }
        }
    }

    #[inline(always)]
    pub fn int_tima(&self) -> bool {
        self.int_tima
    }

    #[inline(always)]
    pub fn ack_tima(&mut self) {
        self.int_tima = false;
    }

    fn set_tac(&mut self, value: u8) {
        self.tima_ratio = match value & 0x03 {
            0x00 => 1024,
            0x01 => 16,
            0x02 => 64,
            0x03 => 256,
            _ => unreachable!(),
        };
        self.tima_enabled = value & 0x04 != 0;
    }

    /// Installs DIV/TIMA/TMA/TAC as single-value devices on `bus`.
    /// DIV's handler zero-clears both the register and the internal
    /// sub-tick accumulator on any write, matching real hardware; TAC's
    /// handler decodes the selected ratio and forces the unused upper
    /// bits high so a plain read-back needs no further masking.
    pub fn install(timer: SharedMut<Timer>, bus: &mut MemoryBus) {
        let (div_cell, tima_cell, tma_cell, tac_cell) = {
            let t = timer.borrow();
            (t.div.clone(), t.tima.clone(), t.tma.clone(), t.tac.clone())
        };

        let div_timer = timer.clone();
        let div_handler: WriteHandler = Rc::new(RefCell::new(move |_addr, _previous, _value, _failed| {
            div_timer.borrow_mut().div_clock = 0;
            0
        }));
        bus.push_device(
            DIV_ADDR..=DIV_ADDR,
            MemoryDevice::Single(SingleDevice::new(DIV_ADDR, div_cell, Access::Both).with_handler(div_handler)),
            false,
        );

        bus.push_device(TIMA_ADDR..=TIMA_ADDR, MemoryDevice::Single(SingleDevice::new(TIMA_ADDR, tima_cell, Access::Both)), false);
        bus.push_device(TMA_ADDR..=TMA_ADDR, MemoryDevice::Single(SingleDevice::new(TMA_ADDR, tma_cell, Access::Both)), false);

        let tac_timer = timer;
        let tac_handler: WriteHandler = Rc::new(RefCell::new(move |_addr, _previous, value, _failed| {
            tac_timer.borrow_mut().set_tac(value);
            value | 0xf8
        }));
        bus.push_device(
            TAC_ADDR..=TAC_ADDR,
            MemoryDevice::Single(SingleDevice::new(TAC_ADDR, tac_cell, Access::Both).with_handler(tac_handler)),
            false,
        );
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::new_shared_mut;

    #[test]
    fn test_div_increments_every_256_t_cycles() {
        let mut bus = MemoryBus::new();
        let timer = new_shared_mut(Timer::new());
        Timer::install(timer.clone(), &mut bus);
        timer.borrow_mut().clock(256);
        assert_eq!(bus.read(DIV_ADDR), 1);
    }

    #[test]
    fn test_div_write_resets_to_zero() {
        let mut bus = MemoryBus::new();
        let timer = new_shared_mut(Timer::new());
        Timer::install(timer.clone(), &mut bus);
        timer.borrow_mut().clock(512);
        bus.write(DIV_ADDR, 0xff);
        assert_eq!(bus.read(DIV_ADDR), 0);
    }

    #[test]
    fn test_tima_overflow_reloads_from_tma_and_sets_interrupt() {
        let mut bus = MemoryBus::new();
        let timer = new_shared_mut(Timer::new());
        Timer::install(timer.clone(), &mut bus);
        bus.write(TMA_ADDR, 0x42);
        bus.write(TAC_ADDR, 0x05); // enabled, ratio 16
        bus.write(TIMA_ADDR, 0xff);
        timer.borrow_mut().clock(16);
        assert_eq!(bus.read(TIMA_ADDR), 0x42);
        assert!(timer.borrow().int_tima());
    }

    #[test]
    fn test_tima_disabled_does_not_tick() {
        let mut bus = MemoryBus::new();
        let timer = new_shared_mut(Timer::new());
        Timer::install(timer.clone(), &mut bus);
        bus.write(TAC_ADDR, 0x01); // ratio 16, disabled (bit 2 unset)
        timer.borrow_mut().clock(1000);
        assert_eq!(bus.read(TIMA_ADDR), 0);
    }
}
