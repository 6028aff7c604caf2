//! Memory device variants, expressed as a tagged enum: a `match` in
//! [`MemoryBus`](super::MemoryBus) replaces virtual dispatch, and
//! `Rc<RefCell<_>>` write handlers replace the sibling pointers a
//! bank-switch handler would otherwise need to capture.
//!
//! Both "fixed" and "switching" array devices are the same
//! [`ArrayDevice`] here: a fixed device is simply one nobody ever
//! calls [`ArrayDevice::switch`] on.

use crate::util::SharedMut;
use std::cell::Cell;
use std::rc::Rc;

/// Per-address access mask a device enforces against the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    None,
    Read,
    Write,
    Both,
}

impl Access {
    #[inline(always)]
    pub fn allows(self, write: bool) -> bool {
        match self {
            Access::Both => true,
            Access::Read => !write,
            Access::Write => write,
            Access::None => false,
        }
    }
}

/// `(address, previous, value, failed) -> stored`. Runs on every
/// write the device's [`Access`] mask would otherwise allow, and also
/// (with `failed = true`) on every write the mask rejects — this is
/// the path MBC1's ROM-bank-0 device uses to decode bank-control
/// writes without ever storing them.
pub type WriteHandler = Rc<std::cell::RefCell<dyn FnMut(u16, u8, u8, bool) -> u8>>;

/// Shared, externally-toggleable access mask. MBC1's RAM-enable gate
/// needs to flip a sibling device's mask from inside a write handler
/// that only sees its own device, so the mask itself lives behind a
/// handle the owning cartridge/subsystem can keep a clone of.
pub type SharedAccess = Rc<Cell<Access>>;

pub fn shared_access(access: Access) -> SharedAccess {
    Rc::new(Cell::new(access))
}

/// A contiguous byte buffer mapped starting at `base`. Covers both
/// fixed and bank-switched regions: a switching device just has
/// `switch` called on it by its owning cartridge/VRAM/WRAM
/// bank-select logic.
pub struct ArrayDevice {
    pub base: u16,
    pub len: u16,
    pub data: SharedMut<Vec<u8>>,
    pub access: SharedAccess,
    pub write_handler: Option<WriteHandler>,
}

impl ArrayDevice {
    pub fn new(base: u16, data: SharedMut<Vec<u8>>, access: Access) -> Self {
        Self::with_shared_access(base, data, shared_access(access))
    }

    pub fn with_shared_access(base: u16, data: SharedMut<Vec<u8>>, access: SharedAccess) -> Self {
        let len = data.borrow().len() as u16;
        Self {
            base,
            len,
            data,
            access,
            write_handler: None,
        }
    }

    pub fn with_handler(mut self, handler: WriteHandler) -> Self {
        self.write_handler = Some(handler);
        self
    }

    /// Atomically repoints this device at a differently-backed buffer
    /// of the same length, the way a cartridge bank switch does.
    /// Copies into the existing allocation rather than swapping the
    /// `Rc` itself, since every switchable device's `data` handle may
    /// also be held by other code (`rom.rs` keeps the bank table).
    pub fn switch(&self, bank: &[u8]) {
        let mut data = self.data.borrow_mut();
        debug_assert_eq!(data.len(), bank.len());
        data.copy_from_slice(bank);
    }

    fn offset(&self, addr: u16) -> usize {
        (addr - self.base) as usize
    }
}

/// A single hardware register: IE, IF, DIV, TIMA, TMA, TAC, LCDC,
/// STAT, LY, LYC, and the rest of the one-byte register devices.
pub struct SingleDevice {
    pub addr: u16,
    pub value: Rc<Cell<u8>>,
    pub access: SharedAccess,
    pub write_handler: Option<WriteHandler>,
}

impl SingleDevice {
    pub fn new(addr: u16, value: Rc<Cell<u8>>, access: Access) -> Self {
        Self::with_shared_access(addr, value, shared_access(access))
    }

    pub fn with_shared_access(addr: u16, value: Rc<Cell<u8>>, access: SharedAccess) -> Self {
        Self {
            addr,
            value,
            access,
            write_handler: None,
        }
    }

    pub fn with_handler(mut self, handler: WriteHandler) -> Self {
        self.write_handler = Some(handler);
        self
    }
}

pub enum MemoryDevice {
    Array(ArrayDevice),
    Single(SingleDevice),
}

impl MemoryDevice {
    pub fn check_access(&self, write: bool) -> bool {
        match self {
            MemoryDevice::Array(d) => d.access.get().allows(write),
            MemoryDevice::Single(d) => d.access.get().allows(write),
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match self {
            MemoryDevice::Array(d) => d.data.borrow()[d.offset(addr)],
            MemoryDevice::Single(d) => d.value.get(),
        }
    }

    fn raw_write(&mut self, addr: u16, value: u8) {
        match self {
            MemoryDevice::Array(d) => {
                let offset = d.offset(addr);
                d.data.borrow_mut()[offset] = value;
            }
            MemoryDevice::Single(d) => d.value.set(value),
        }
    }

    fn handler(&self) -> Option<WriteHandler> {
        match self {
            MemoryDevice::Array(d) => d.write_handler.clone(),
            MemoryDevice::Single(d) => d.write_handler.clone(),
        }
    }

    /// Bus-level write: checks the access mask, stores (subject to the
    /// handler's transform) on success, or invokes the handler with
    /// `failed = true` and drops the value otherwise.
    pub fn write(&mut self, addr: u16, value: u8) {
        let previous = self.read(addr);
        if self.check_access(true) {
            self.raw_write(addr, value);
            if let Some(handler) = self.handler() {
                let stored = (handler.borrow_mut())(addr, previous, value, false);
                self.raw_write(addr, stored);
            }
        } else if let Some(handler) = self.handler() {
            let _ = (handler.borrow_mut())(addr, previous, value, true);
        }
    }
}
