//! Crate-wide error type.
//!
//! Only the host-facing setup/persistence entry points (`load_rom`,
//! `load_state`) return `Result` — the cycle-stepping hot path never does,
//! per the core's error handling design.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GbaError {
    #[error("ROM image is larger than the 32 MiB cartridge address space")]
    RomTooLarge,
    #[error("ROM image size is not a power of two")]
    RomNotPowerOfTwo,
    #[error("save state buffer is corrupt or from an incompatible version")]
    InvalidSaveState,
    #[error("unsupported SWI number 0x{0:02X}")]
    UnsupportedSwi(u32),
}
