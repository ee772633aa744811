//! HLE implementations of the handful of BIOS SWI calls a cartridge needs
//! when no BIOS image is loaded (§6). Only reachable when the host enabled
//! `enable_hle_swi` and no BIOS is present; otherwise SWI always traps for
//! real through the normal exception-entry path.

use crate::bus::{AccessKind, Bus};

use super::Cpu;

/// Dispatches a single HLE SWI by its comment-field number. Unsupported
/// numbers log a diagnostic and retire as a no-op, per §7.
pub fn dispatch(cpu: &mut Cpu, bus: &mut Bus, number: u32) {
    match number {
        0x06 => div(cpu),
        0x0B => cpu_set(cpu, bus),
        0x0C => cpu_fast_set(cpu, bus),
        0x11 => lz77_uncomp(cpu, bus),
        0x12 => lz77_uncomp(cpu, bus),
        other => log::warn!("unsupported HLE SWI 0x{other:02X}; retiring as NOP"),
    }
}

/// SWI 0x06 Div: R0 / R1 -> R0, R0 % R1 -> R1 (signed, truncating).
fn div(cpu: &mut Cpu) {
    let numerator = cpu.reg(0) as i32;
    let denominator = cpu.reg(1) as i32;
    if denominator == 0 {
        log::warn!("HLE Div by zero");
        return;
    }
    let quotient = numerator.wrapping_div(denominator);
    let remainder = numerator.wrapping_rem(denominator);
    cpu.set_reg(0, quotient as u32);
    cpu.set_reg(1, remainder as u32);
    cpu.set_reg(3, quotient.unsigned_abs());
}

/// SWI 0x0B CpuSet: R0 src, R1 dst, R2 = count(20:0) | fixed-src(24) | word-mode(26).
fn cpu_set(cpu: &mut Cpu, bus: &mut Bus) {
    let mut src = cpu.reg(0);
    let mut dst = cpu.reg(1);
    let control = cpu.reg(2);
    let count = control & 0x1F_FFFF;
    let fixed_src = control & (1 << 24) != 0;
    let word_mode = control & (1 << 26) != 0;

    for _ in 0..count {
        if word_mode {
            let value = bus.read32(src, AccessKind::Debug);
            bus.write32(dst, value, AccessKind::Debug);
            dst = dst.wrapping_add(4);
        } else {
            let value = bus.read16(src, AccessKind::Debug);
            bus.write16(dst, value, AccessKind::Debug);
            dst = dst.wrapping_add(2);
        }
        if !fixed_src {
            src = src.wrapping_add(if word_mode { 4 } else { 2 });
        }
    }
}

/// SWI 0x0C CpuFastSet: word-only variant, transfers in blocks of 8 words
/// (the tail is padded to a multiple of 8 on real hardware; HLE just loops).
fn cpu_fast_set(cpu: &mut Cpu, bus: &mut Bus) {
    let mut src = cpu.reg(0);
    let mut dst = cpu.reg(1);
    let control = cpu.reg(2);
    let count = ((control & 0x1F_FFFF) + 7) / 8 * 8;
    let fixed_src = control & (1 << 24) != 0;

    for _ in 0..count {
        let value = bus.read32(src, AccessKind::Debug);
        bus.write32(dst, value, AccessKind::Debug);
        dst = dst.wrapping_add(4);
        if !fixed_src {
            src = src.wrapping_add(4);
        }
    }
}

/// SWI 0x11/0x12 LZ77UncompVRAM/WRAM. Header word at `src`: low byte is a
/// type tag (ignored), high 24 bits are the decompressed size. Each 8-block
/// flag byte selects literal bytes (bit clear) or back-references (bit set,
/// 3..18 bytes at displacement+1).
fn lz77_uncomp(cpu: &mut Cpu, bus: &mut Bus) {
    let mut src = cpu.reg(0);
    let dst_start = cpu.reg(1);

    let header = bus.read32(src, AccessKind::Debug);
    src = src.wrapping_add(4);
    let decompressed_size = (header >> 8) as usize;

    let mut out: Vec<u8> = Vec::with_capacity(decompressed_size);
    while out.len() < decompressed_size {
        let flags = bus.read8(src, AccessKind::Debug);
        src = src.wrapping_add(1);
        for bit in (0..8).rev() {
            if out.len() >= decompressed_size {
                break;
            }
            if flags & (1 << bit) == 0 {
                out.push(bus.read8(src, AccessKind::Debug));
                src = src.wrapping_add(1);
            } else {
                let b0 = bus.read8(src, AccessKind::Debug) as usize;
                let b1 = bus.read8(src.wrapping_add(1), AccessKind::Debug) as usize;
                src = src.wrapping_add(2);
                let length = (b0 >> 4) + 3;
                let displacement = ((b0 & 0xF) << 8 | b1) + 1;
                for _ in 0..length {
                    if out.len() >= decompressed_size {
                        break;
                    }
                    let back_idx = out.len() - displacement;
                    let byte = out[back_idx];
                    out.push(byte);
                }
            }
        }
    }

    for (i, byte) in out.into_iter().enumerate() {
        bus.write8(dst_start.wrapping_add(i as u32), byte, AccessKind::Debug);
    }
}
