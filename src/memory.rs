//! Memory subsystem for the Game Boy Advance
//!
//! This module implements the GBA's 32-bit address space region constants
//! and the lazily-allocated backing stores for each RAM-like region.
//!
//! Reference: GBATEK memory map, NanoBoyAdvance `core/memory.hpp`.

use serde::{Deserialize, Serialize};

/// Memory region address constants
pub mod addr {
    /// BIOS start address
    pub const BIOS_START: u32 = 0x0000_0000;
    /// BIOS size (16 KiB)
    pub const BIOS_SIZE: usize = 0x4000;
    /// BIOS end address (exclusive)
    pub const BIOS_END: u32 = 0x0200_0000;

    /// On-board work RAM start
    pub const WRAM_START: u32 = 0x0200_0000;
    /// On-board work RAM size (256 KiB), mirrored every 256 KiB
    pub const WRAM_SIZE: usize = 0x4_0000;
    pub const WRAM_END: u32 = 0x0300_0000;

    /// On-chip (fast) work RAM start
    pub const IRAM_START: u32 = 0x0300_0000;
    /// On-chip work RAM size (32 KiB), mirrored every 32 KiB
    pub const IRAM_SIZE: usize = 0x8000;
    pub const IRAM_END: u32 = 0x0400_0000;

    /// Memory-mapped I/O start
    pub const MMIO_START: u32 = 0x0400_0000;
    /// Memory-mapped I/O size (1 KiB visible register window)
    pub const MMIO_SIZE: usize = 0x400;
    pub const MMIO_END: u32 = 0x0500_0000;

    /// Palette RAM start
    pub const PRAM_START: u32 = 0x0500_0000;
    /// Palette RAM size (1 KiB)
    pub const PRAM_SIZE: usize = 0x400;
    pub const PRAM_END: u32 = 0x0600_0000;

    /// Video RAM start
    pub const VRAM_START: u32 = 0x0600_0000;
    /// Video RAM size (96 KiB)
    pub const VRAM_SIZE: usize = 0x1_8000;
    pub const VRAM_END: u32 = 0x0700_0000;
    /// VRAM region visible through the 0x06000000-0x06017FFF window before wrap
    pub const VRAM_LOWER: u32 = 0x1_0000;

    /// Object attribute memory start
    pub const OAM_START: u32 = 0x0700_0000;
    /// OAM size (1 KiB)
    pub const OAM_SIZE: usize = 0x400;
    pub const OAM_END: u32 = 0x0800_0000;

    /// Cartridge ROM start (waitstate region 0)
    pub const ROM_START: u32 = 0x0800_0000;
    /// Maximum cartridge ROM size (32 MiB)
    pub const ROM_MAX_SIZE: usize = 0x200_0000;
    pub const ROM_END: u32 = 0x0E00_0000;

    /// Cartridge save RAM start
    pub const SRAM_START: u32 = 0x0E00_0000;
    /// Cartridge save RAM size (64 KiB)
    pub const SRAM_SIZE: usize = 0x1_0000;
    pub const SRAM_END: u32 = 0x1000_0000;
}

/// On-board or on-chip work RAM (lazily allocated, zero-filled on first write).
#[derive(Serialize, Deserialize)]
pub struct Ram {
    data: Vec<u8>,
    size: usize,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        Self { data: Vec::new(), size }
    }

    #[inline]
    pub fn read(&self, offset: u32) -> u8 {
        if self.data.is_empty() {
            return 0x00;
        }
        self.data[(offset as usize) % self.size]
    }

    #[inline]
    pub fn write(&mut self, offset: u32, value: u8) {
        if self.data.is_empty() {
            self.data = vec![0u8; self.size];
        }
        let idx = (offset as usize) % self.size;
        self.data[idx] = value;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn load_data(&mut self, data: &[u8]) {
        self.data = vec![0u8; self.size];
        let len = data.len().min(self.size);
        self.data[..len].copy_from_slice(&data[..len]);
    }

    pub fn reset(&mut self) {
        if !self.data.is_empty() {
            self.data.fill(0);
        }
    }
}

/// Read-only BIOS image. Reads outside the loaded range are open-bus and
/// return the last word fetched from within the BIOS by the CPU (§7).
#[derive(Serialize, Deserialize)]
pub struct Bios {
    data: Vec<u8>,
    /// Last opcode word successfully fetched from inside the BIOS image.
    last_fetched: u32,
}

impl Bios {
    pub fn new() -> Self {
        Self { data: Vec::new(), last_fetched: 0 }
    }

    pub fn load(&mut self, data: &[u8]) {
        let mut buf = data.to_vec();
        buf.resize(addr::BIOS_SIZE, 0);
        self.data = buf;
    }

    pub fn is_loaded(&self) -> bool {
        !self.data.is_empty()
    }

    #[inline]
    pub fn read(&self, offset: u32) -> u8 {
        if self.data.is_empty() || offset as usize >= addr::BIOS_SIZE {
            return 0;
        }
        self.data[offset as usize]
    }

    pub fn note_fetch(&mut self, word: u32) {
        self.last_fetched = word;
    }

    pub fn open_bus_word(&self) -> u32 {
        self.last_fetched
    }
}

impl Default for Bios {
    fn default() -> Self {
        Self::new()
    }
}

/// Cartridge ROM, lazily sized to the loaded image (power-of-two, <= 32 MiB).
#[derive(Serialize, Deserialize)]
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn load(&mut self, data: &[u8]) {
        self.data = data.to_vec();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn read(&self, offset: u32) -> u8 {
        if self.data.is_empty() {
            return 0;
        }
        let idx = offset as usize % self.data.len();
        self.data[idx]
    }
}

impl Default for Rom {
    fn default() -> Self {
        Self::new()
    }
}

/// Cartridge save RAM. The core exposes it as a flat byte array; the actual
/// backend (EEPROM/SRAM/Flash) is an external collaborator per §6.
#[derive(Serialize, Deserialize)]
pub struct Sram {
    data: Vec<u8>,
}

impl Sram {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    #[inline]
    pub fn read(&self, offset: u32) -> u8 {
        if self.data.is_empty() {
            return 0xFF;
        }
        self.data[(offset as usize) % addr::SRAM_SIZE]
    }

    #[inline]
    pub fn write(&mut self, offset: u32, value: u8) {
        if self.data.is_empty() {
            self.data = vec![0xFFu8; addr::SRAM_SIZE];
        }
        let idx = (offset as usize) % addr::SRAM_SIZE;
        self.data[idx] = value;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn load_data(&mut self, data: &[u8]) {
        self.data = vec![0xFFu8; addr::SRAM_SIZE];
        let len = data.len().min(addr::SRAM_SIZE);
        self.data[..len].copy_from_slice(&data[..len]);
    }

    pub fn reset(&mut self) {
        if !self.data.is_empty() {
            self.data.fill(0xFF);
        }
    }
}

impl Default for Sram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod ram_tests {
        use super::*;

        #[test]
        fn new_ram_is_zeroed() {
            let ram = Ram::new(addr::WRAM_SIZE);
            assert_eq!(ram.read(0), 0x00);
            assert_eq!(ram.read(0x1234), 0x00);
        }

        #[test]
        fn read_write_byte() {
            let mut ram = Ram::new(addr::IRAM_SIZE);
            ram.write(0x100, 0xAB);
            assert_eq!(ram.read(0x100), 0xAB);
        }

        #[test]
        fn mirrors_at_region_size() {
            let mut ram = Ram::new(addr::IRAM_SIZE);
            ram.write(0x10, 0x55);
            assert_eq!(ram.read(addr::IRAM_SIZE as u32 + 0x10), 0x55);
        }

        #[test]
        fn reset_clears_to_zero() {
            let mut ram = Ram::new(addr::WRAM_SIZE);
            ram.write(4, 0xFF);
            ram.reset();
            assert_eq!(ram.read(4), 0);
        }
    }

    mod bios_tests {
        use super::*;

        #[test]
        fn unloaded_bios_reads_zero() {
            let bios = Bios::new();
            assert_eq!(bios.read(0), 0);
        }

        #[test]
        fn load_and_read() {
            let mut bios = Bios::new();
            bios.load(&[0xAA, 0xBB, 0xCC, 0xDD]);
            assert_eq!(bios.read(0), 0xAA);
            assert_eq!(bios.read(3), 0xDD);
        }

        #[test]
        fn open_bus_tracks_last_fetch() {
            let mut bios = Bios::new();
            bios.note_fetch(0xDEAD_BEEF);
            assert_eq!(bios.open_bus_word(), 0xDEAD_BEEF);
        }
    }

    mod rom_tests {
        use super::*;

        #[test]
        fn empty_rom_reads_zero() {
            let rom = Rom::new();
            assert_eq!(rom.read(0), 0);
        }

        #[test]
        fn load_and_read_mirrors() {
            let mut rom = Rom::new();
            rom.load(&[1, 2, 3, 4]);
            assert_eq!(rom.read(0), 1);
            assert_eq!(rom.read(4), 1);
        }
    }

    mod sram_tests {
        use super::*;

        #[test]
        fn unwritten_sram_reads_ff() {
            let sram = Sram::new();
            assert_eq!(sram.read(0), 0xFF);
        }

        #[test]
        fn write_then_read() {
            let mut sram = Sram::new();
            sram.write(10, 0x42);
            assert_eq!(sram.read(10), 0x42);
        }
    }
}
