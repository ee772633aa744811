//! Game Boy Advance emulator core.
//!
//! This crate provides a platform-agnostic ARM7TDMI + bus + DMA + timers +
//! PPU emulator core with a stable C ABI. No OS APIs are used — all I/O is
//! done through byte buffers the host supplies.
//!
//! # Architecture
//!
//! - `memory`: region constants and the RAM/BIOS/ROM/SRAM backing stores
//! - `scheduler`: fixed-capacity timed-event queue
//! - `bus`: address decoding, waitstates, and MMIO dispatch
//! - `cpu`: ARM7TDMI interpreter (ARM + THUMB decode/execute)
//! - `peripherals`: PPU, DMA, timers, IRQ controller, keypad, APU FIFO path
//! - `emu`: top-level orchestrator (`Gba`)
//!
//! # Memory map
//!
//! | Address Range           | Region                         |
//! |--------------------------|--------------------------------|
//! | 0x0000_0000-0x0000_3FFF | BIOS (16 KiB)                  |
//! | 0x0200_0000-0x0203_FFFF | On-board work RAM (256 KiB)    |
//! | 0x0300_0000-0x0300_7FFF | On-chip work RAM (32 KiB)      |
//! | 0x0400_0000-0x0400_03FF | I/O registers                  |
//! | 0x0500_0000-0x0500_03FF | Palette RAM                    |
//! | 0x0600_0000-0x0601_7FFF | Video RAM                      |
//! | 0x0700_0000-0x0700_03FF | OAM                            |
//! | 0x0800_0000-0x0DFF_FFFF | Cartridge ROM (waitstates 0-2) |
//! | 0x0E00_0000-0x0FFF_FFFF | Cartridge save RAM             |

pub mod bus;
pub mod cpu;
mod emu;
pub mod error;
pub mod memory;
pub mod peripherals;
pub mod scheduler;

use std::ptr;
use std::slice;

use serde::{Deserialize, Serialize};

pub use emu::Gba;
pub use error::GbaError;

/// Host-tunable behavior that doesn't belong to any single module.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GbaConfig {
    /// Start execution at the post-BIOS register state instead of the
    /// hardware reset vector, skipping the boot animation/logo check.
    pub skip_bios: bool,
    /// When true and no BIOS image is loaded, SWI calls are served by the
    /// high-level emulation handlers in `cpu::swi` instead of trapping.
    pub enable_hle_swi: bool,
}

impl Default for GbaConfig {
    fn default() -> Self {
        Self { skip_bios: true, enable_hle_swi: true }
    }
}

/// Create a new emulator instance with the default configuration.
/// Returns null on allocation failure (never happens in practice, but the
/// signature matches the rest of the C ABI's "null means failure" idiom).
#[no_mangle]
pub extern "C" fn gba_create() -> *mut Gba {
    let gba = Box::new(Gba::new(GbaConfig::default()));
    Box::into_raw(gba)
}

/// Destroy an emulator instance. Safe to call with a null pointer.
#[no_mangle]
pub extern "C" fn gba_destroy(gba: *mut Gba) {
    if !gba.is_null() {
        unsafe {
            drop(Box::from_raw(gba));
        }
    }
}

/// Load BIOS data. Returns 0 on success, negative on failure.
#[no_mangle]
pub extern "C" fn gba_load_bios(gba: *mut Gba, data: *const u8, len: usize) -> i32 {
    if gba.is_null() || data.is_null() {
        return -1;
    }
    let gba = unsafe { &mut *gba };
    let bytes = unsafe { slice::from_raw_parts(data, len) };
    match gba.load_bios(bytes) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

/// Load ROM data and reset to the start of execution.
/// Returns 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn gba_load_rom(gba: *mut Gba, data: *const u8, len: usize, skip_bios: i32) -> i32 {
    if gba.is_null() || data.is_null() {
        return -1;
    }
    let gba = unsafe { &mut *gba };
    let bytes = unsafe { slice::from_raw_parts(data, len) };
    match gba.load_rom(bytes, skip_bios != 0) {
        Ok(()) => 0,
        Err(GbaError::RomTooLarge) => -2,
        Err(GbaError::RomNotPowerOfTwo) => -3,
        Err(_) => -4,
    }
}

/// Reset the emulator, optionally skipping the BIOS boot sequence.
#[no_mangle]
pub extern "C" fn gba_reset(gba: *mut Gba, skip_bios: i32) {
    if gba.is_null() {
        return;
    }
    unsafe { &mut *gba }.reset(skip_bios != 0);
}

/// Run the emulator for approximately `cycles` cycles, honoring carried
/// overshoot from any prior call. Returns the number of cycles executed.
#[no_mangle]
pub extern "C" fn gba_run_cycles(gba: *mut Gba, cycles: u32) -> u32 {
    if gba.is_null() {
        return 0;
    }
    unsafe { &mut *gba }.run_for(cycles)
}

/// Pointer to the RGB888-packed (0x00RRGGBB) 240x160 framebuffer, owned by
/// the emulator. Writes width/height to the provided pointers if non-null.
#[no_mangle]
pub extern "C" fn gba_framebuffer(gba: *const Gba, w: *mut i32, h: *mut i32) -> *const u32 {
    if gba.is_null() {
        return ptr::null();
    }
    let gba = unsafe { &*gba };
    let (width, height) = gba.framebuffer_size();
    if !w.is_null() {
        unsafe { *w = width as i32 };
    }
    if !h.is_null() {
        unsafe { *h = height as i32 };
    }
    gba.framebuffer().as_ptr()
}

/// Set the 10-bit active-low KEYINPUT bitmask (bit order: A,B,SELECT,START,
/// RIGHT,LEFT,UP,DOWN,R,L); a clear bit means the button is held.
#[no_mangle]
pub extern "C" fn gba_set_keys(gba: *mut Gba, mask: u16) {
    if gba.is_null() {
        return;
    }
    unsafe { &mut *gba }.set_key_state(mask);
}

/// Save state into a host-owned buffer. Returns bytes written, or a
/// negative value if `cap` was too small / serialization failed.
#[no_mangle]
pub extern "C" fn gba_save_state(gba: *const Gba, out: *mut u8, cap: usize) -> i32 {
    if gba.is_null() || out.is_null() {
        return -1;
    }
    let gba = unsafe { &*gba };
    match gba.save_state() {
        Ok(bytes) if bytes.len() <= cap => {
            let dst = unsafe { slice::from_raw_parts_mut(out, bytes.len()) };
            dst.copy_from_slice(&bytes);
            bytes.len() as i32
        }
        Ok(_) => -2,
        Err(_) => -3,
    }
}

/// Load state from a host-owned buffer. Returns 0 on success.
#[no_mangle]
pub extern "C" fn gba_load_state(gba: *mut Gba, data: *const u8, len: usize) -> i32 {
    if gba.is_null() || data.is_null() {
        return -1;
    }
    let gba = unsafe { &mut *gba };
    let bytes = unsafe { slice::from_raw_parts(data, len) };
    match gba.load_state(bytes) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_destroy_round_trip() {
        let gba = gba_create();
        assert!(!gba.is_null());
        gba_destroy(gba);
    }

    #[test]
    fn framebuffer_reports_gba_dimensions() {
        let gba = gba_create();
        let mut w = 0;
        let mut h = 0;
        let fb = gba_framebuffer(gba, &mut w, &mut h);
        assert!(!fb.is_null());
        assert_eq!(w, 240);
        assert_eq!(h, 160);
        gba_destroy(gba);
    }

    #[test]
    fn run_cycles_without_rom_executes_nothing() {
        let gba = gba_create();
        assert_eq!(gba_run_cycles(gba, 1000), 0);
        gba_destroy(gba);
    }

    #[test]
    fn null_pointers_are_handled_safely() {
        assert_eq!(gba_load_rom(ptr::null_mut(), ptr::null(), 0, 0), -1);
        assert_eq!(gba_run_cycles(ptr::null_mut(), 100), 0);
        gba_destroy(ptr::null_mut());
    }
}
