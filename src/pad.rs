//! Joypad port (address 0xFF00): a memory-backed register whose
//! button bits an external input provider flips through
//! [`Pad::key_press`]/[`Pad::key_lift`].

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use crate::consts::PAD_ADDR;
use crate::event::DebugHooks;
use crate::memory::{Access, MemoryBus, MemoryDevice, SingleDevice, WriteHandler};
use crate::util::SharedMut;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PadKey {
    Up,
    Down,
    Left,
    Right,
    Start,
    Select,
    A,
    B,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PadSelection {
    Action,
    Direction,
    Both,
    Neither,
}

pub struct Pad {
    up: bool,
    down: bool,
    left: bool,
    right: bool,
    start: bool,
    select: bool,
    a: bool,
    b: bool,
    selection: PadSelection,
    register: Rc<Cell<u8>>,
    hooks: Option<SharedMut<DebugHooks>>,
    irq: bool,
}

impl Pad {
    pub fn new() -> Self {
        Self {
            up: false,
            down: false,
            left: false,
            right: false,
            start: false,
            select: false,
            a: false,
            b: false,
            selection: PadSelection::Neither,
            register: Rc::new(Cell::new(0xff)),
            hooks: None,
            irq: false,
        }
    }

    pub fn attach_hooks(&mut self, hooks: SharedMut<DebugHooks>) {
        self.hooks = Some(hooks);
    }

    /// Recomputes the readable register byte from button/selection
    /// state (active-low) and stores it in the cell the bus device
    /// reads from directly.
    fn sync(&mut self) {
        let mut low = match self.selection {
            PadSelection::Action => {
                (if self.a { 0 } else { 0x01 }) | (if self.b { 0 } else { 0x02 }) | (if self.select { 0 } else { 0x04 }) | (if self.start { 0 } else { 0x08 })
            }
            PadSelection::Direction => {
                (if self.right { 0 } else { 0x01 }) | (if self.left { 0 } else { 0x02 }) | (if self.up { 0 } else { 0x04 }) | (if self.down { 0 } else { 0x08 })
            }
            PadSelection::Both | PadSelection::Neither => 0x0f,
        };
        low |= match self.selection {
            PadSelection::Action => 0x10,
            PadSelection::Direction => 0x20,
            PadSelection::Both => 0x00,
            PadSelection::Neither => 0x30,
        };
        self.register.set(low | 0xc0);
    }

    pub fn key_press(&mut self, key: PadKey) {
        match key {
            PadKey::Up => self.up = true,
            PadKey::Down => self.down = true,
            PadKey::Left => self.left = true,
            PadKey::Right => self.right = true,
            PadKey::Start => self.start = true,
            PadKey::Select => self.select = true,
            PadKey::A => self.a = true,
            PadKey::B => self.b = true,
        }
        self.irq = true;
        self.sync();
    }

    pub fn key_lift(&mut self, key: PadKey) {
        match key {
            PadKey::Up => self.up = false,
            PadKey::Down => self.down = false,
            PadKey::Left => self.left = false,
            PadKey::Right => self.right = false,
            PadKey::Start => self.start = false,
            PadKey::Select => self.select = false,
            PadKey::A => self.a = false,
            PadKey::B => self.b = false,
        }
        self.sync();
    }

    /// Whether a button transition has happened since the last
    /// [`Pad::ack_pad`], the Joypad interrupt source.
    #[inline(always)]
    pub fn int_pad(&self) -> bool {
        self.irq
    }

    #[inline(always)]
    pub fn ack_pad(&mut self) {
        self.irq = false;
    }

    pub fn install(pad: SharedMut<Pad>, bus: &mut MemoryBus) {
        let (cell, selection_pad) = {
            let p = pad.borrow();
            (p.register.clone(), pad.clone())
        };
        let handler: WriteHandler = Rc::new(RefCell::new(move |_addr, _previous, value, _failed| {
            let mut p = selection_pad.borrow_mut();
            p.selection = match value & 0x30 {
                0x00 => PadSelection::Both,
                0x10 => PadSelection::Direction,
                0x20 => PadSelection::Action,
                _ => PadSelection::Neither,
            };
            p.sync();
            p.register.get()
        }));
        pad.borrow_mut().sync();
        bus.push_device(PAD_ADDR..=PAD_ADDR, MemoryDevice::Single(SingleDevice::new(PAD_ADDR, cell, Access::Both).with_handler(handler)), false);
    }
}

impl Default for Pad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::new_shared_mut;

    #[test]
    fn test_no_key_pressed_reads_all_ones_in_low_nibble() {
        let mut bus = MemoryBus::new();
        let pad = new_shared_mut(Pad::new());
        Pad::install(pad, &mut bus);
        bus.write(PAD_ADDR, 0x10);
        assert_eq!(bus.read(PAD_ADDR) & 0x0f, 0x0f);
    }

    #[test]
    fn test_pressing_a_clears_its_bit_in_action_selection() {
        let mut bus = MemoryBus::new();
        let pad = new_shared_mut(Pad::new());
        pad.borrow_mut().key_press(PadKey::A);
        Pad::install(pad.clone(), &mut bus);
        bus.write(PAD_ADDR, 0x20);
        assert_eq!(bus.read(PAD_ADDR) & 0x01, 0x00);
        assert!(pad.borrow().int_pad());
    }

    #[test]
    fn test_direction_selection_is_independent_of_action() {
        let mut bus = MemoryBus::new();
        let pad = new_shared_mut(Pad::new());
        pad.borrow_mut().key_press(PadKey::A);
        pad.borrow_mut().key_press(PadKey::Up);
        Pad::install(pad, &mut bus);
        bus.write(PAD_ADDR, 0x10);
        assert_eq!(bus.read(PAD_ADDR) & 0x04, 0x00);
        assert_eq!(bus.read(PAD_ADDR) & 0x01, 0x01);
    }
}
