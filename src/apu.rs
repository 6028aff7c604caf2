//! Audio ports: 0xFF10-0xFF26 audio control, 0xFF30-0xFF3F wave RAM.
//! No sound is synthesized — registers are present purely so software
//! that probes or writes them observes ordinary memory. This module
//! adds nothing beyond storage.

use crate::consts::{AUDIO_ADDR, AUDIO_END, WAVE_RAM_ADDR, WAVE_RAM_END};
use crate::memory::{Access, ArrayDevice, MemoryBus, MemoryDevice};
use crate::util::new_shared_mut;

pub struct Apu;

impl Apu {
    /// Installs the audio control range and wave RAM as plain
    /// read/write storage on `bus`. No [`Apu`] state is kept: the
    /// backing buffers live entirely behind the installed devices.
    pub fn install(bus: &mut MemoryBus) {
        let audio_len = (AUDIO_END - AUDIO_ADDR + 1) as usize;
        let audio_data = new_shared_mut(vec![0u8; audio_len]);
        bus.push_device(AUDIO_ADDR..=AUDIO_END, MemoryDevice::Array(ArrayDevice::new(AUDIO_ADDR, audio_data, Access::Both)), false);

        let wave_len = (WAVE_RAM_END - WAVE_RAM_ADDR + 1) as usize;
        let wave_data = new_shared_mut(vec![0u8; wave_len]);
        bus.push_device(WAVE_RAM_ADDR..=WAVE_RAM_END, MemoryDevice::Array(ArrayDevice::new(WAVE_RAM_ADDR, wave_data, Access::Both)), false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_registers_round_trip_as_plain_storage() {
        let mut bus = MemoryBus::new();
        Apu::install(&mut bus);
        bus.write(AUDIO_ADDR, 0x80);
        assert_eq!(bus.read(AUDIO_ADDR), 0x80);
        bus.write(WAVE_RAM_ADDR, 0xde);
        assert_eq!(bus.read(WAVE_RAM_ADDR), 0xde);
    }
}
