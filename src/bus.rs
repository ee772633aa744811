//! System bus for the Game Boy Advance (C1).
//!
//! Owns every memory region and every MMIO-mapped peripheral, decodes
//! addresses by their top nibble, and charges waitstate cycles on every
//! access before the value is returned to the CPU. The bus also drives the
//! PPU phase event (via the scheduler), the four timers, the four DMA
//! channels, the IRQ controller, the keypad and the APU FIFO path, since on
//! real hardware all of these sit behind the same memory-mapped register
//! window and advance together with bus time.
//!
//! Reference: GBATEK memory map and waitstate tables.

use serde::{Deserialize, Serialize};

use crate::memory::{addr, Bios, Ram, Rom, Sram};
use crate::peripherals::apu::Apu;
use crate::peripherals::dma::{DmaChannel, DmaTrigger};
use crate::peripherals::interrupt::{irq, IrqController};
use crate::peripherals::keypad::Keypad;
use crate::peripherals::ppu::Ppu;
use crate::peripherals::timer::Timer;
use crate::scheduler::{EventKind, Scheduler};
use crate::GbaConfig;

/// Bus access kind. `Debug` never charges cycles and never triggers side
/// effects (FIFO pops, write-duplication diagnostics) so a host inspector or
/// the HLE SWI helpers can peek/poke memory without perturbing determinism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Sequential,
    NonSequential,
    Debug,
}

/// Recent execution trace entry for the diagnostics ring (§2.1 ambient stack).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraceEntry {
    pub pc: u32,
    pub opcode: u32,
    pub thumb: bool,
}

const TRACE_CAPACITY: usize = 256;

#[derive(Serialize, Deserialize)]
pub struct Bus {
    bios: Bios,
    wram: Ram,
    iram: Ram,
    pram: Ram,
    vram: Ram,
    oam: Ram,
    rom: Rom,
    sram: Sram,

    pub ppu: Ppu,
    pub dma: [DmaChannel; 4],
    pub timers: [Timer; 4],
    pub irq: IrqController,
    pub keypad: Keypad,
    pub apu: Apu,

    scheduler: Scheduler,

    waitcnt: u16,
    /// `[access_kind][top_nibble]` cycle cost, recomputed whenever WAITCNT changes.
    #[serde(skip, default = "default_wait_table")]
    wait_table: [[u32; 16]; 2],

    total_cycles: u64,
    haltcnt: HaltState,

    config: GbaConfig,

    #[serde(skip)]
    trace: std::collections::VecDeque<TraceEntry>,
    #[serde(skip)]
    last_swi: u32,
    #[serde(skip)]
    last_undefined_pc: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltState {
    Run,
    Halt,
    Stop,
}

fn default_wait_table() -> [[u32; 16]; 2] {
    [[1; 16]; 2]
}

impl Bus {
    pub fn new(config: GbaConfig) -> Self {
        let mut bus = Self {
            bios: Bios::new(),
            wram: Ram::new(addr::WRAM_SIZE),
            iram: Ram::new(addr::IRAM_SIZE),
            pram: Ram::new(addr::PRAM_SIZE),
            vram: Ram::new(addr::VRAM_SIZE),
            oam: Ram::new(addr::OAM_SIZE),
            rom: Rom::new(),
            sram: Sram::new(),
            ppu: Ppu::new(),
            dma: [
                DmaChannel::new(0),
                DmaChannel::new(1),
                DmaChannel::new(2),
                DmaChannel::new(3),
            ],
            timers: [Timer::new(), Timer::new(), Timer::new(), Timer::new()],
            irq: IrqController::new(),
            keypad: Keypad::new(),
            apu: Apu::new(),
            scheduler: Scheduler::new(),
            waitcnt: 0,
            wait_table: default_wait_table(),
            total_cycles: 0,
            haltcnt: HaltState::Run,
            config,
            trace: std::collections::VecDeque::with_capacity(TRACE_CAPACITY),
            last_swi: 0,
            last_undefined_pc: 0,
        };
        bus.recompute_wait_table();
        bus.scheduler.register(EventKind::PpuPhase, bus.ppu.phase_length() as i64);
        bus
    }

    pub fn reset(&mut self) {
        self.wram.reset();
        self.iram.reset();
        self.pram.reset();
        self.vram.reset();
        self.oam.reset();
        self.sram.reset();
        self.ppu = Ppu::new();
        self.dma = [
            DmaChannel::new(0),
            DmaChannel::new(1),
            DmaChannel::new(2),
            DmaChannel::new(3),
        ];
        self.timers = [Timer::new(), Timer::new(), Timer::new(), Timer::new()];
        self.irq = IrqController::new();
        self.keypad = Keypad::new();
        self.apu = Apu::new();
        self.scheduler.reset();
        self.waitcnt = 0;
        self.recompute_wait_table();
        self.total_cycles = 0;
        self.haltcnt = HaltState::Run;
        self.trace.clear();
        self.scheduler.register(EventKind::PpuPhase, self.ppu.phase_length() as i64);
    }

    pub fn load_bios(&mut self, data: &[u8]) {
        self.bios.load(data);
    }

    pub fn bios_loaded(&self) -> bool {
        self.bios.is_loaded()
    }

    pub fn load_rom(&mut self, data: &[u8]) {
        self.rom.load(data);
    }

    pub fn load_sram(&mut self, data: &[u8]) {
        self.sram.load_data(data);
    }

    pub fn sram_data(&self) -> &[u8] {
        self.sram.data()
    }

    pub fn hle_swi_enabled(&self) -> bool {
        self.config.enable_hle_swi && !self.bios_loaded()
    }

    pub fn note_swi(&mut self, comment: u32) {
        self.last_swi = comment;
    }

    pub fn note_undefined(&mut self, pc: u32) {
        self.last_undefined_pc = pc;
        log::warn!("undefined ARM instruction at 0x{pc:08X}");
    }

    pub fn push_trace(&mut self, entry: TraceEntry) {
        if self.trace.len() == TRACE_CAPACITY {
            self.trace.pop_front();
        }
        self.trace.push_back(entry);
    }

    pub fn trace(&self) -> &std::collections::VecDeque<TraceEntry> {
        &self.trace
    }

    pub fn cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn is_halted(&self) -> bool {
        self.haltcnt != HaltState::Run
    }

    pub fn halt_state(&self) -> HaltState {
        self.haltcnt
    }

    /// Releases HALT/STOP the instant a pending, enabled interrupt exists (§4.8).
    fn update_halt_release(&mut self) {
        if self.haltcnt != HaltState::Run && self.irq.line_pending() {
            self.haltcnt = HaltState::Run;
        }
    }

    pub fn irq_pending(&self) -> bool {
        self.irq.cpu_irq_line()
    }

    /// Peeks the scheduler's nearest deadline, used to bound a HALT slice.
    pub fn scheduler_deadline(&self) -> Option<i64> {
        self.scheduler.min_deadline()
    }

    /// Advances every cycle-driven sub-component by `cycles` and charges the
    /// elapsed time against `total_cycles`. Called after every bus access and
    /// by the HALT idle loop.
    pub fn tick(&mut self, cycles: u32) {
        if cycles == 0 {
            return;
        }
        self.total_cycles += cycles as u64;

        let mut fired = Vec::new();
        self.scheduler.advance(cycles as i64, &mut fired);
        for event in fired {
            match event {
                EventKind::PpuPhase => self.on_ppu_phase_event(),
                EventKind::TimerOverflow(_) => {}
            }
        }

        for i in 0..4 {
            if self.timers[i].cascade() || !self.timers[i].enabled() {
                continue;
            }
            let overflows = self.timers[i].tick(cycles);
            if overflows > 0 {
                self.on_timer_overflow(i, overflows);
            }
        }

        self.update_halt_release();

        if self.dma_runnable() {
            self.run_dma();
        }
    }

    fn on_ppu_phase_event(&mut self) {
        let transition = self.ppu.advance_phase(&self.vram, &self.oam, &self.pram);
        if transition.hblank_irq {
            self.irq.request(irq::HBLANK);
        }
        if transition.vblank_irq {
            self.irq.request(irq::VBLANK);
        }
        if transition.vcount_irq {
            self.irq.request(irq::VCOUNT);
        }
        if transition.hblank_dma {
            for ch in self.dma.iter_mut() {
                ch.notify(DmaTrigger::HBlank);
            }
        }
        if transition.vblank_dma {
            for ch in self.dma.iter_mut() {
                ch.notify(DmaTrigger::VBlank);
            }
        }
        self.update_halt_release();
        self.scheduler.register(EventKind::PpuPhase, transition.next_phase_length as i64);
    }

    fn on_timer_overflow(&mut self, index: usize, mut overflows: u32) {
        let mut next = index + 1;
        while overflows > 0 {
            if self.timers[index].irq_enabled() {
                self.irq.request(irq::TIMER[index]);
            }
            if index < 2 && self.apu.master_enabled() {
                for fifo in 0..2 {
                    if self.apu.timer_select(fifo) as usize == index {
                        self.apu.latch(fifo);
                        if self.apu.fifo_needs_refill(fifo) {
                            for ch in self.dma.iter_mut() {
                                ch.notify(if fifo == 0 { DmaTrigger::FifoA } else { DmaTrigger::FifoB });
                            }
                        }
                    }
                }
            }
            if next < 4 && self.timers[next].cascade() {
                let carried = self.timers[next].cascade_tick();
                if carried == 0 {
                    break;
                }
                overflows = carried;
                next += 1;
                continue;
            }
            break;
        }
    }

    pub fn dma_runnable(&self) -> bool {
        self.dma.iter().any(|ch| ch.is_runnable())
    }

    /// Executes DMA transfers until no channel is runnable, honoring
    /// channel-0-highest priority (§4.5).
    pub fn run_dma(&mut self) {
        loop {
            let active = match (0..4).find(|&i| self.dma[i].is_runnable()) {
                Some(i) => i,
                None => break,
            };
            let step = self.dma[active].step();
            let mut moved = false;
            if let Some(xfer) = step.transfer {
                moved = true;
                if xfer.word {
                    let value = self.raw_read32(xfer.src);
                    self.raw_write32(xfer.dst, value);
                    let cost = self.access_cost(xfer.dst, 4, AccessKind::Sequential);
                    self.total_cycles += cost as u64;
                } else {
                    let value = self.raw_read16(xfer.src);
                    self.raw_write16(xfer.dst, value);
                    let cost = self.access_cost(xfer.dst, 2, AccessKind::Sequential);
                    self.total_cycles += cost as u64;
                }
            }
            if step.finished && step.irq {
                self.irq.request(irq::DMA[active]);
            }
            if !moved {
                break;
            }
        }
    }

    fn access_cost(&self, addr: u32, width: u32, kind: AccessKind) -> u32 {
        if kind == AccessKind::Debug {
            return 0;
        }
        let nibble = ((addr >> 24) & 0xF) as usize;
        let kind_idx = if kind == AccessKind::Sequential { 0 } else { 1 };
        let base = self.wait_table[kind_idx][nibble];
        if width == 4 && (0x8..=0xD).contains(&nibble) && kind == AccessKind::NonSequential {
            // 32-bit ROM non-sequential access = N-cycle + S-cycle (§4.1).
            return base + self.wait_table[0][nibble];
        }
        if width == 4 && (nibble == 0x2 || nibble == 0x5 || nibble == 0x6) {
            return base * 2;
        }
        base
    }

    fn recompute_wait_table(&mut self) {
        let sram_codes = [4u32, 3, 2, 8];
        let sram_cycles = sram_codes[(self.waitcnt & 0x3) as usize];

        let ws0_n = sram_codes[((self.waitcnt >> 2) & 0x3) as usize];
        let ws0_s = if self.waitcnt & (1 << 4) != 0 { 1 } else { 2 };
        let ws1_n = sram_codes[((self.waitcnt >> 5) & 0x3) as usize];
        let ws1_s = if self.waitcnt & (1 << 7) != 0 { 1 } else { 4 };
        let ws2_n = sram_codes[((self.waitcnt >> 8) & 0x3) as usize];
        let ws2_s = if self.waitcnt & (1 << 10) != 0 { 1 } else { 8 };

        let mut seq = [1u32; 16];
        let mut nonseq = [1u32; 16];

        seq[0x2] = 3;
        nonseq[0x2] = 3;
        seq[0x5] = 1;
        nonseq[0x5] = 1;
        seq[0x6] = 1;
        nonseq[0x6] = 1;

        nonseq[0x8] = ws0_n + 1;
        seq[0x8] = ws0_s + 1;
        nonseq[0x9] = ws0_n + 1;
        seq[0x9] = ws0_s + 1;
        nonseq[0xA] = ws1_n + 1;
        seq[0xA] = ws1_s + 1;
        nonseq[0xB] = ws1_n + 1;
        seq[0xB] = ws1_s + 1;
        nonseq[0xC] = ws2_n + 1;
        seq[0xC] = ws2_s + 1;
        nonseq[0xD] = ws2_n + 1;
        seq[0xD] = ws2_s + 1;

        nonseq[0xE] = sram_cycles + 1;
        seq[0xE] = sram_cycles + 1;

        self.wait_table = [seq, nonseq];
    }

    // ---- public read/write API -------------------------------------------------

    pub fn read8(&mut self, addr: u32, kind: AccessKind) -> u8 {
        let value = self.raw_read8(addr);
        let cost = self.access_cost(addr, 1, kind);
        self.tick(cost);
        value
    }

    pub fn read16(&mut self, addr: u32, kind: AccessKind) -> u16 {
        let value = self.raw_read16(addr & !1);
        let cost = self.access_cost(addr, 2, kind);
        self.tick(cost);
        value
    }

    pub fn read32(&mut self, addr: u32, kind: AccessKind) -> u32 {
        let value = self.raw_read32(addr & !3);
        let cost = self.access_cost(addr, 4, kind);
        self.tick(cost);
        value
    }

    pub fn write8(&mut self, addr: u32, value: u8, kind: AccessKind) {
        self.raw_write8(addr, value);
        let cost = self.access_cost(addr, 1, kind);
        self.tick(cost);
    }

    pub fn write16(&mut self, addr: u32, value: u16, kind: AccessKind) {
        self.raw_write16(addr & !1, value);
        let cost = self.access_cost(addr, 2, kind);
        self.tick(cost);
    }

    pub fn write32(&mut self, addr: u32, value: u32, kind: AccessKind) {
        self.raw_write32(addr & !3, value);
        let cost = self.access_cost(addr, 4, kind);
        self.tick(cost);
    }

    // ---- raw (no-cycle-charge) accessors, shared by the typed API and DMA ------

    fn raw_read8(&mut self, addr: u32) -> u8 {
        match region_of(addr) {
            Region::Bios => self.read_bios8(addr),
            Region::Wram => self.wram.read(addr - addr::WRAM_START),
            Region::Iram => self.iram.read(addr - addr::IRAM_START),
            Region::Mmio => self.mmio_read8(addr),
            Region::Pram => self.pram.read((addr - addr::PRAM_START) % addr::PRAM_SIZE as u32),
            Region::Vram => self.vram_offset(addr).map(|o| self.vram.read(o)).unwrap_or(0),
            Region::Oam => self.oam.read((addr - addr::OAM_START) % addr::OAM_SIZE as u32),
            Region::Rom => self.rom.read(addr - addr::ROM_START),
            Region::Sram => self.sram.read(addr - addr::SRAM_START),
            Region::Unmapped => 0,
        }
    }

    fn raw_read16(&mut self, addr: u32) -> u16 {
        let lo = self.raw_read8(addr) as u16;
        let hi = self.raw_read8(addr.wrapping_add(1)) as u16;
        lo | (hi << 8)
    }

    fn raw_read32(&mut self, addr: u32) -> u32 {
        let lo = self.raw_read16(addr) as u32;
        let hi = self.raw_read16(addr.wrapping_add(2)) as u32;
        lo | (hi << 16)
    }

    fn raw_write8(&mut self, addr: u32, value: u8) {
        match region_of(addr) {
            Region::Bios => {}
            Region::Wram => self.wram.write(addr - addr::WRAM_START, value),
            Region::Iram => self.iram.write(addr - addr::IRAM_START, value),
            Region::Mmio => self.mmio_write8(addr, value),
            Region::Pram => {
                let off = (addr - addr::PRAM_START) % addr::PRAM_SIZE as u32 & !1;
                self.pram.write(off, value);
                self.pram.write(off + 1, value);
            }
            Region::Vram => {
                if let Some(off) = self.vram_offset(addr) {
                    // 8-bit writes to the OBJ tile region (>= 0x10000) are
                    // dropped; the BG region duplicates the byte into a halfword.
                    if off < 0x1_0000 {
                        let off = off & !1;
                        self.vram.write(off, value);
                        self.vram.write(off + 1, value);
                    }
                }
            }
            Region::Oam => {}
            Region::Rom => {}
            Region::Sram => self.sram.write(addr - addr::SRAM_START, value),
            Region::Unmapped => {}
        }
    }

    fn raw_write16(&mut self, addr: u32, value: u16) {
        self.raw_write8(addr, value as u8);
        self.raw_write8(addr.wrapping_add(1), (value >> 8) as u8);
    }

    fn raw_write32(&mut self, addr: u32, value: u32) {
        self.raw_write16(addr, value as u16);
        self.raw_write16(addr.wrapping_add(2), (value >> 16) as u16);
    }

    fn read_bios8(&mut self, addr: u32) -> u8 {
        if (addr as usize) < addr::BIOS_SIZE {
            self.bios.read(addr)
        } else {
            let word = self.bios.open_bus_word();
            (word >> ((addr & 3) * 8)) as u8
        }
    }

    /// Records the word fetched at `addr` as the BIOS open-bus latch when
    /// `addr` actually lies inside the BIOS region, so later reads past the
    /// BIOS image return the last opcode fetched rather than zero (§7).
    pub fn note_bios_fetch(&mut self, addr: u32, value: u32) {
        if region_of(addr) == Region::Bios && (addr as usize) < addr::BIOS_SIZE {
            self.bios.note_fetch(value);
        }
    }

    /// Maps a VRAM address into its backing-store offset, applying the
    /// mirror that folds 0x18000..0x1FFFF onto 0x10000..0x17FFF (§3).
    fn vram_offset(&self, addr: u32) -> Option<u32> {
        let off = (addr - addr::VRAM_START) % 0x2_0000;
        if off < addr::VRAM_SIZE as u32 {
            Some(off)
        } else {
            Some(off - addr::VRAM_LOWER)
        }
    }

    // ---- MMIO dispatch -----------------------------------------------------

    fn mmio_read8(&self, addr: u32) -> u8 {
        let offset = mmio_offset(addr);
        match offset {
            0x000..=0x056 => self.ppu.read8(offset),
            0x060..=0x0A7 => self.apu.read8(offset),
            0x0B0..=0x0DF => self.dma_read8(offset),
            0x100..=0x10F => self.timer_read8(offset),
            0x130 => self.keypad.keyinput() as u8,
            0x131 => (self.keypad.keyinput() >> 8) as u8,
            0x132 => self.keypad.keycnt() as u8,
            0x133 => (self.keypad.keycnt() >> 8) as u8,
            0x200 => self.irq.ie() as u8,
            0x201 => (self.irq.ie() >> 8) as u8,
            0x202 => self.irq.if_() as u8,
            0x203 => (self.irq.if_() >> 8) as u8,
            0x204 => self.waitcnt as u8,
            0x205 => (self.waitcnt >> 8) as u8,
            0x208 => self.irq.ime() as u8,
            _ => 0,
        }
    }

    fn mmio_write8(&mut self, addr: u32, value: u8) {
        let offset = mmio_offset(addr);
        match offset {
            0x000..=0x056 => self.ppu.write8(offset, value),
            0x060..=0x0A7 => self.apu.write8(offset, value),
            0x0B0..=0x0DF => self.dma_write8(offset, value),
            0x100..=0x10F => self.timer_write8(offset, value),
            0x132 => self.keypad.set_keycnt_lo(value),
            0x133 => self.keypad.set_keycnt_hi(value),
            0x200 => self.irq.set_ie_lo(value),
            0x201 => self.irq.set_ie_hi(value),
            0x202 => self.irq.set_if_lo(value),
            0x203 => self.irq.set_if_hi(value),
            0x204 => {
                self.waitcnt = (self.waitcnt & 0xFF00) | value as u16;
                self.recompute_wait_table();
            }
            0x205 => {
                self.waitcnt = (self.waitcnt & 0x00FF) | ((value as u16) << 8);
                self.recompute_wait_table();
            }
            0x208 => self.irq.set_ime(value),
            0x301 => {
                self.haltcnt = if value & 0x80 != 0 { HaltState::Stop } else { HaltState::Halt };
            }
            _ => {}
        }
    }

    fn dma_read8(&self, offset: usize) -> u8 {
        let ch = (offset - 0xB0) / 0xC;
        let reg = (offset - 0xB0) % 0xC;
        if ch >= 4 {
            return 0;
        }
        self.dma[ch].read8(reg)
    }

    fn dma_write8(&mut self, offset: usize, value: u8) {
        let ch = (offset - 0xB0) / 0xC;
        let reg = (offset - 0xB0) % 0xC;
        if ch < 4 {
            self.dma[ch].write8(reg, value);
        }
    }

    fn timer_read8(&self, offset: usize) -> u8 {
        let ch = (offset - 0x100) / 4;
        let reg = (offset - 0x100) % 4;
        if ch >= 4 {
            return 0;
        }
        self.timers[ch].read8(reg)
    }

    fn timer_write8(&mut self, offset: usize, value: u8) {
        let ch = (offset - 0x100) / 4;
        let reg = (offset - 0x100) % 4;
        if ch < 4 {
            self.timers[ch].write8(reg, value);
        }
    }

    /// `mask` is the active-low KEYINPUT bit layout (set bit = released);
    /// inverted here since `Keypad` tracks pressed state active-high internally.
    pub fn set_key_state(&mut self, mask: u16) {
        self.keypad.set_state(!mask & crate::peripherals::keypad::button::ALL);
    }

    pub fn framebuffer(&self) -> &[u32] {
        self.ppu.framebuffer()
    }

    pub fn audio_latches(&self) -> (i8, i8) {
        self.apu.latched_samples()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Bios,
    Wram,
    Iram,
    Mmio,
    Pram,
    Vram,
    Oam,
    Rom,
    Sram,
    Unmapped,
}

fn region_of(addr: u32) -> Region {
    match (addr >> 24) & 0xFF {
        0x00 => Region::Bios,
        0x01 => Region::Unmapped,
        0x02 => Region::Wram,
        0x03 => Region::Iram,
        0x04 => Region::Mmio,
        0x05 => Region::Pram,
        0x06 => Region::Vram,
        0x07 => Region::Oam,
        0x08..=0x0D => Region::Rom,
        0x0E | 0x0F => Region::Sram,
        _ => Region::Unmapped,
    }
}

fn mmio_offset(addr: u32) -> usize {
    // 0x04xx0800 mirrors 0x04000800 (§3); everything else is a flat 1 KiB window.
    let off = (addr - addr::MMIO_START) as usize;
    if off & 0xFFFF == 0x0800 {
        0x0800
    } else {
        off & 0x3FF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> Bus {
        Bus::new(GbaConfig::default())
    }

    #[test]
    fn wram_mirrors_every_256kib() {
        let mut b = bus();
        b.write8(addr::WRAM_START, 0x42, AccessKind::NonSequential);
        assert_eq!(b.read8(addr::WRAM_START + addr::WRAM_SIZE as u32, AccessKind::NonSequential), 0x42);
    }

    #[test]
    fn region_01_reads_zero() {
        let mut b = bus();
        assert_eq!(b.read8(0x0100_0000, AccessKind::NonSequential), 0);
    }

    #[test]
    fn rom_writes_are_ignored() {
        let mut b = bus();
        b.load_rom(&[0xAA; 0x100]);
        b.write8(addr::ROM_START, 0xFF, AccessKind::NonSequential);
        assert_eq!(b.read8(addr::ROM_START, AccessKind::NonSequential), 0xAA);
    }

    #[test]
    fn oam_byte_writes_are_dropped() {
        let mut b = bus();
        b.write8(addr::OAM_START, 0xFF, AccessKind::NonSequential);
        assert_eq!(b.read8(addr::OAM_START, AccessKind::NonSequential), 0x00);
    }

    #[test]
    fn pram_byte_write_duplicates_into_halfword() {
        let mut b = bus();
        b.write8(addr::PRAM_START, 0x7F, AccessKind::NonSequential);
        assert_eq!(b.read16(addr::PRAM_START, AccessKind::NonSequential), 0x7F7F);
    }

    #[test]
    fn vram_mirror_pattern_wraps_upper_half() {
        let mut b = bus();
        b.write8(addr::VRAM_START + 0x1_0000, 0x11, AccessKind::NonSequential);
        assert_eq!(b.read8(addr::VRAM_START + 0x1_8000, AccessKind::NonSequential), 0x11);
    }

    #[test]
    fn sram_byte_broadcasts_on_word_read() {
        let mut b = bus();
        b.write8(addr::SRAM_START, 0x42, AccessKind::NonSequential);
        assert_eq!(b.read32(addr::SRAM_START, AccessKind::NonSequential), 0x4242_4242);
    }

    #[test]
    fn debug_access_never_charges_cycles() {
        let mut b = bus();
        let before = b.cycles();
        b.read32(addr::IRAM_START, AccessKind::Debug);
        assert_eq!(b.cycles(), before);
    }

    #[test]
    fn waitcnt_write_updates_register() {
        let mut b = bus();
        b.write8(addr::MMIO_START + 0x204, 0x03, AccessKind::NonSequential);
        assert_eq!(b.waitcnt & 0x3, 0x3);
    }

    #[test]
    fn ime_write_sets_interrupt_master_enable() {
        let mut b = bus();
        b.write8(addr::MMIO_START + 0x208, 0x01, AccessKind::NonSequential);
        assert_eq!(b.irq.ime(), 1);
    }

    #[test]
    fn mmio_mirror_at_0800_offset() {
        // 0x04xx0800 (any xx) collapses to the same offset as 0x04000800,
        // regardless of the page selected by the high address byte.
        assert_eq!(mmio_offset(addr::MMIO_START + 0x0000_0800), 0x0800);
        assert_eq!(mmio_offset(addr::MMIO_START + 0x0001_0800), 0x0800);
        assert_eq!(mmio_offset(addr::MMIO_START + 0x00FE_0800), 0x0800);
        // but a nearby, non-mirrored offset still folds into the flat 1 KiB window.
        assert_eq!(mmio_offset(addr::MMIO_START + 0x0001_0208), 0x208);
    }
}
