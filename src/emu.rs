//! Top-level emulator orchestrator (C9).
//!
//! Coordinates the CPU and bus, carries cycle overshoot between `run_for`
//! calls so callers can step by arbitrary host-frame-sized slices without
//! drifting from the true GBA clock, and exposes save-state serialization.

use serde::{Deserialize, Serialize};

use crate::bus::{AccessKind, Bus, TraceEntry};
use crate::cpu::Cpu;
use crate::error::GbaError;
use crate::peripherals::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::GbaConfig;

#[derive(Serialize, Deserialize)]
struct SaveState {
    cpu: Cpu,
    bus: Bus,
}

pub struct Gba {
    cpu: Cpu,
    bus: Bus,
    /// Cycles executed past the caller's requested budget in the previous
    /// `run_for`, subtracted from the next call's budget.
    overshoot: u32,
    rom_loaded: bool,
}

impl Gba {
    pub fn new(config: GbaConfig) -> Self {
        let mut bus = Bus::new(config);
        let mut cpu = Cpu::new();
        cpu.reset(&mut bus, config.skip_bios);
        Self { cpu, bus, overshoot: 0, rom_loaded: false }
    }

    pub fn load_bios(&mut self, data: &[u8]) -> Result<(), GbaError> {
        self.bus.load_bios(data);
        Ok(())
    }

    pub fn load_rom(&mut self, data: &[u8], skip_bios: bool) -> Result<(), GbaError> {
        if data.len() > crate::memory::addr::ROM_MAX_SIZE {
            return Err(GbaError::RomTooLarge);
        }
        if !data.len().is_power_of_two() {
            return Err(GbaError::RomNotPowerOfTwo);
        }
        self.bus.load_rom(data);
        self.rom_loaded = true;
        self.reset(skip_bios);
        Ok(())
    }

    pub fn load_sram(&mut self, data: &[u8]) {
        self.bus.load_sram(data);
    }

    pub fn sram(&self) -> &[u8] {
        self.bus.sram_data()
    }

    pub fn reset(&mut self, skip_bios: bool) {
        self.bus.reset();
        self.cpu.reset(&mut self.bus, skip_bios);
        self.overshoot = 0;
    }

    /// Runs the emulator for approximately `cycles`, returning the number of
    /// cycles actually executed. HALT/STOP fast-forwards to the scheduler's
    /// next deadline instead of stepping one cycle at a time.
    pub fn run_for(&mut self, cycles: u32) -> u32 {
        if !self.rom_loaded {
            return 0;
        }
        let budget = cycles.saturating_sub(self.overshoot);
        let start = self.bus.cycles();
        let target = start + budget as u64;

        while self.bus.cycles() < target {
            if self.bus.is_halted() {
                let remaining = target - self.bus.cycles();
                let slice = self
                    .bus
                    .scheduler_deadline()
                    .map(|d| d.max(1) as u32)
                    .unwrap_or(remaining as u32)
                    .min(remaining as u32)
                    .max(1);
                self.bus.tick(slice);
                continue;
            }
            self.cpu.step(&mut self.bus);
        }

        let executed = (self.bus.cycles() - start) as u32;
        self.overshoot = self.bus.cycles().saturating_sub(target) as u32;
        executed
    }

    /// `mask` is the active-low KEYINPUT bit layout (a clear bit means the
    /// button is held), stored directly into KEYINPUT.
    pub fn set_key_state(&mut self, mask: u16) {
        self.bus.set_key_state(mask);
    }

    pub fn framebuffer(&self) -> &[u32] {
        self.bus.framebuffer()
    }

    pub fn framebuffer_size(&self) -> (usize, usize) {
        (SCREEN_WIDTH, SCREEN_HEIGHT)
    }

    pub fn audio_latches(&self) -> (i8, i8) {
        self.bus.audio_latches()
    }

    pub fn cpu_registers(&self) -> &[u32; 16] {
        &self.cpu.r
    }

    /// Reads a byte without charging bus cycles or perturbing FIFO/latch
    /// state, for host-side inspection (debuggers, disassembly views).
    pub fn peek_byte(&mut self, addr: u32) -> u8 {
        self.bus.read8(addr, AccessKind::Debug)
    }

    pub fn total_cycles(&self) -> u64 {
        self.bus.cycles()
    }

    /// Read-only view of the last (up to 256) executed instructions, for
    /// host-side debuggers. Populated unconditionally on every `step`.
    pub fn trace(&self) -> impl Iterator<Item = &TraceEntry> {
        self.bus.trace().iter()
    }

    pub fn save_state(&self) -> Result<Vec<u8>, GbaError> {
        let state = SaveState { cpu: self.cpu.clone(), bus: clone_bus(&self.bus) };
        bincode::serialize(&state).map_err(|_| GbaError::InvalidSaveState)
    }

    pub fn load_state(&mut self, data: &[u8]) -> Result<(), GbaError> {
        let state: SaveState = bincode::deserialize(data).map_err(|_| GbaError::InvalidSaveState)?;
        self.cpu = state.cpu;
        self.bus = state.bus;
        Ok(())
    }
}

/// `Bus` doesn't derive `Clone` (its ROM/SRAM backing stores can be large);
/// save-state capture instead round-trips through bincode.
fn clone_bus(bus: &Bus) -> Bus {
    let bytes = bincode::serialize(bus).expect("bus state is always serializable");
    bincode::deserialize(&bytes).expect("freshly serialized bus state always deserializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom(bytes: &[u8]) -> Vec<u8> {
        let mut data = bytes.to_vec();
        let size = data.len().next_power_of_two().max(0x200);
        data.resize(size, 0);
        data
    }

    #[test]
    fn new_gba_has_empty_framebuffer_of_correct_size() {
        let gba = Gba::new(GbaConfig::default());
        assert_eq!(gba.framebuffer().len(), SCREEN_WIDTH * SCREEN_HEIGHT);
    }

    #[test]
    fn run_for_without_rom_executes_nothing() {
        let mut gba = Gba::new(GbaConfig::default());
        assert_eq!(gba.run_for(1000), 0);
    }

    #[test]
    fn load_rom_rejects_non_power_of_two() {
        let mut gba = Gba::new(GbaConfig::default());
        let data = vec![0u8; 100];
        assert_eq!(gba.load_rom(&data, true), Err(GbaError::RomNotPowerOfTwo));
    }

    #[test]
    fn run_for_executes_instructions_after_rom_load() {
        let mut gba = Gba::new(GbaConfig { skip_bios: true, ..GbaConfig::default() });
        gba.load_rom(&rom(&[0x00, 0x00, 0xA0, 0xE1]), true).unwrap();
        let executed = gba.run_for(100);
        assert!(executed > 0);
    }

    #[test]
    fn trace_ring_fills_as_instructions_execute() {
        let mut gba = Gba::new(GbaConfig { skip_bios: true, ..GbaConfig::default() });
        gba.load_rom(&rom(&[0x00, 0x00, 0xA0, 0xE1]), true).unwrap();
        gba.run_for(100);
        assert!(gba.trace().count() > 0);
    }

    #[test]
    fn save_and_load_state_round_trips_registers() {
        let mut gba = Gba::new(GbaConfig { skip_bios: true, ..GbaConfig::default() });
        gba.load_rom(&rom(&[0x01, 0x10, 0xA0, 0xE3]), true).unwrap();
        gba.run_for(10);
        let saved = gba.save_state().unwrap();
        let pc_before = gba.cpu_registers()[15];
        gba.reset(true);
        gba.load_state(&saved).unwrap();
        assert_eq!(gba.cpu_registers()[15], pc_before);
    }
}
