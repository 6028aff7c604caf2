//! Shared test-harness helpers: build a minimal, always-valid
//! synthetic cartridge and drive a [`Gameboy`] against it. This crate
//! ships no test ROM files, so the synthetic cartridge — a zeroed
//! two-bank image with a valid header and the caller's program
//! written straight at the CPU reset vector (0x0000) — stands in for
//! them everywhere a real ROM would otherwise be required.

use crate::consts::ROM_BANK_SIZE;
use crate::error::Error;
use crate::gb::{GameBoyMode, Gameboy};
use crate::serial::BufferSerialDevice;

/// Which subsystems a built [`Gameboy`] should run with, mirroring the
/// toggles on [`crate::gb::GameBoyConfig`]. Present purely so callers
/// can request a particular mode; the subsystem enable flags
/// themselves currently have no per-call override on [`Gameboy`] and
/// always come from its own default configuration.
pub struct TestOptions {
    pub mode: GameBoyMode,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self { mode: GameBoyMode::Dmg }
    }
}

/// Builds a two-bank, ROM-only, no-RAM cartridge image with `program`
/// placed at the CPU's 0x0000 reset vector. `program` must leave the
/// header bytes at 0x0143-0x0149 untouched, so it's capped at 0x0100
/// bytes — ample room for the short instruction sequences these tests
/// exercise.
pub fn synthetic_rom(program: &[u8]) -> Vec<u8> {
    assert!(program.len() <= 0x0100, "synthetic test programs must fit before the cartridge header");
    let mut data = vec![0u8; 2 * ROM_BANK_SIZE];
    data[..program.len()].copy_from_slice(program);
    data[0x143] = 0x00; // DMG-only compatibility
    data[0x147] = 0x00; // RomOnly
    data[0x148] = 0x00; // 2 ROM banks
    data[0x149] = 0x00; // no cartridge RAM
    data
}

fn build(options: &TestOptions, program: &[u8]) -> Result<Box<Gameboy>, Error> {
    let mut gb = Box::new(Gameboy::new(options.mode));
    gb.load_rom(&synthetic_rom(program))?;
    Ok(gb)
}

/// Builds a machine with no program loaded beyond the synthetic
/// header, for tests that only care about reset/power-on state.
pub fn build_test(options: &TestOptions) -> Box<Gameboy> {
    build(options, &[]).expect("a header-only synthetic rom is always valid")
}

/// Runs `program` for up to `max_cycles` T-cycles.
pub fn run_test(program: &[u8], max_cycles: u64, options: &TestOptions) -> Result<Box<Gameboy>, Error> {
    let mut gb = build(options, program)?;
    let mut total = 0u64;
    while total < max_cycles {
        total += gb.clock() as u64;
    }
    Ok(gb)
}

/// Runs `program` until PC reaches `addr`, or `max_cycles` elapses,
/// whichever comes first.
pub fn run_step_test(program: &[u8], addr: u16, max_cycles: u64, options: &TestOptions) -> Result<Box<Gameboy>, Error> {
    let mut gb = build(options, program)?;
    let mut total = 0u64;
    while total < max_cycles && gb.cpu().pc() != addr {
        total += gb.clock() as u64;
    }
    Ok(gb)
}

/// Runs `program`, capturing everything written through the serial
/// port as Latin-1 text, the way blargg-style test ROMs report results.
pub fn run_serial_test(program: &[u8], max_cycles: u64, options: &TestOptions) -> Result<(String, Box<Gameboy>), Error> {
    let mut gb = build(options, program)?;
    gb.attach_serial(Box::new(BufferSerialDevice::new()));
    let mut total = 0u64;
    while total < max_cycles {
        total += gb.clock() as u64;
    }
    let state = gb.serial_state();
    Ok((state, gb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::PadKey;

    #[test]
    fn test_build_test_produces_a_runnable_machine_at_reset_vector() {
        let gb = build_test(&TestOptions::default());
        assert_eq!(gb.cpu().pc(), 0x0000);
        assert!(gb.cartridge().is_some());
    }

    #[test]
    fn test_run_test_executes_nops_for_the_requested_cycle_budget() {
        let program = [0x00, 0x00, 0x00, 0x00];
        let gb = run_test(&program, 16, &TestOptions::default()).unwrap();
        assert_eq!(gb.cpu().pc(), 0x0004);
    }

    #[test]
    fn test_run_step_test_stops_exactly_at_the_target_address() {
        // JP 0x0010, then a run of NOPs past the target so an
        // off-by-one stop would be easy to spot.
        let mut program = vec![0xc3, 0x10, 0x00];
        program.resize(0x20, 0x00);
        let gb = run_step_test(&program, 0x0010, 10_000, &TestOptions::default()).unwrap();
        assert_eq!(gb.cpu().pc(), 0x0010);
    }

    #[test]
    fn test_run_serial_test_captures_bytes_written_through_sb_sc() {
        // LD A,'H' ; LD (0xFF01),A ; LD A,0x81 ; LD (0xFF02),A ; HALT
        let program = [0x3e, b'H', 0xea, 0x01, 0xff, 0x3e, 0x81, 0xea, 0x02, 0xff, 0x76];
        let (text, _gb) = run_serial_test(&program, 200, &TestOptions::default()).unwrap();
        assert_eq!(text, "H");
    }

    #[test]
    fn test_key_press_through_a_built_machine_does_not_panic() {
        let mut gb = build_test(&TestOptions::default());
        gb.key_press(PadKey::Start);
        gb.clock();
        gb.key_lift(PadKey::Start);
    }
}
