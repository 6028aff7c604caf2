//! Typed event bus and debug hooks. A single tagged [`Event`] enum
//! carries the payload for every event kind, dispatched through a
//! plain `match` rather than a vtable.

/// The kinds of events the bus can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    CpuModeChange,
    LcdControlChange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuMode {
    Running,
    Halted,
    Stopped,
}

#[derive(Clone, Copy, Debug)]
pub enum Event {
    CpuModeChange { mode: CpuMode },
    LcdControlChange { lcdc: u8, previous_lcdc: u8 },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::CpuModeChange { .. } => EventKind::CpuModeChange,
            Event::LcdControlChange { .. } => EventKind::LcdControlChange,
        }
    }
}

/// A subscriber returns `true` once it has "handled" the event;
/// `EventBus::emit` stops walking the callback list for that event as
/// soon as one does.
pub type EventCallback = Box<dyn FnMut(&Event) -> bool>;

/// Ordered multicast registry, one list of callbacks per [`EventKind`].
/// `subscribe` pushes to the front, so the most recently attached
/// collaborator (usually a debugger) observes an event before older
/// ones.
#[derive(Default)]
pub struct EventBus {
    cpu_mode_change: Vec<EventCallback>,
    lcd_control_change: Vec<EventCallback>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, callback: EventCallback) {
        let list = self.list_mut(kind);
        list.insert(0, callback);
    }

    pub fn emit(&mut self, event: Event) {
        let list = self.list_mut(event.kind());
        for callback in list.iter_mut() {
            if callback(&event) {
                break;
            }
        }
    }

    fn list_mut(&mut self, kind: EventKind) -> &mut Vec<EventCallback> {
        match kind {
            EventKind::CpuModeChange => &mut self.cpu_mode_change,
            EventKind::LcdControlChange => &mut self.lcd_control_change,
        }
    }
}

/// No-op-when-unset debug hooks. Every hook is an
/// `Option<Box<dyn FnMut>>`; the `call_*` helpers below are what
/// `cpu.rs`/`inst.rs`/`memory::bus` actually invoke, so a disabled
/// hook costs one `Option::is_none` check rather than a branch into
/// dispatcher machinery.
#[derive(Default)]
pub struct DebugHooks {
    pub on_pre_exec: Option<Box<dyn FnMut(u16)>>,
    pub on_post_exec: Option<Box<dyn FnMut(u16)>>,
    pub on_mem_read: Option<Box<dyn FnMut(u16, u8)>>,
    pub on_mem_write: Option<Box<dyn FnMut(u16, u8, u8)>>,
    pub on_call: Option<Box<dyn FnMut(u16, u16, u16)>>,
    pub on_ret: Option<Box<dyn FnMut(u16, u16, u16, bool)>>,
    pub on_jump: Option<Box<dyn FnMut(u16, u16, u16)>>,
    pub on_jump_relative: Option<Box<dyn FnMut(u16, u16, i8)>>,
    pub on_bank_change: Option<Box<dyn FnMut(u8)>>,
    pub on_rom_unmap: Option<Box<dyn FnMut()>>,
    pub on_emit_instruction: Option<Box<dyn FnMut(u16, u8, &str)>>,
}

impl DebugHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre_exec(&mut self, pc: u16) {
        if let Some(hook) = &mut self.on_pre_exec {
            hook(pc);
        }
    }

    pub fn post_exec(&mut self, pc: u16) {
        if let Some(hook) = &mut self.on_post_exec {
            hook(pc);
        }
    }

    pub fn mem_read(&mut self, addr: u16, value: u8) {
        if let Some(hook) = &mut self.on_mem_read {
            hook(addr, value);
        }
    }

    pub fn mem_write(&mut self, addr: u16, old: u8, new: u8) {
        if let Some(hook) = &mut self.on_mem_write {
            hook(addr, old, new);
        }
    }

    pub fn call(&mut self, pc: u16, sp: u16, target: u16) {
        if let Some(hook) = &mut self.on_call {
            hook(pc, sp, target);
        }
    }

    pub fn ret(&mut self, pc: u16, sp: u16, target: u16, from_interrupt: bool) {
        if let Some(hook) = &mut self.on_ret {
            hook(pc, sp, target, from_interrupt);
        }
    }

    pub fn jump(&mut self, pc: u16, sp: u16, target: u16) {
        if let Some(hook) = &mut self.on_jump {
            hook(pc, sp, target);
        }
    }

    pub fn jump_relative(&mut self, pc: u16, sp: u16, offset: i8) {
        if let Some(hook) = &mut self.on_jump_relative {
            hook(pc, sp, offset);
        }
    }

    pub fn bank_change(&mut self, bank: u8) {
        if let Some(hook) = &mut self.on_bank_change {
            hook(bank);
        }
    }

    pub fn rom_unmap(&mut self) {
        if let Some(hook) = &mut self.on_rom_unmap {
            hook();
        }
    }

    pub fn emit_instruction(&mut self, pc: u16, len: u8, text: &str) {
        if let Some(hook) = &mut self.on_emit_instruction {
            hook(pc, len, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_event_bus_stops_at_first_handled_callback() {
        let mut bus = EventBus::new();
        let calls = Rc::new(Cell::new(0));
        let first = calls.clone();
        let second = calls.clone();
        bus.subscribe(
            EventKind::LcdControlChange,
            Box::new(move |_event| {
                second.set(second.get() + 1);
                false
            }),
        );
        bus.subscribe(
            EventKind::LcdControlChange,
            Box::new(move |_event| {
                first.set(first.get() + 1);
                true
            }),
        );
        bus.emit(Event::LcdControlChange {
            lcdc: 0x91,
            previous_lcdc: 0x11,
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_disabled_hook_is_a_no_op() {
        let mut hooks = DebugHooks::new();
        hooks.pre_exec(0x100);
        hooks.bank_change(3);
    }

    #[test]
    fn test_hook_fires_when_set() {
        let mut hooks = DebugHooks::new();
        let seen = Rc::new(Cell::new(0u16));
        let seen_clone = seen.clone();
        hooks.on_pre_exec = Some(Box::new(move |pc| seen_clone.set(pc)));
        hooks.pre_exec(0x1234);
        assert_eq!(seen.get(), 0x1234);
    }
}
