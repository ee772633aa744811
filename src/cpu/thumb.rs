//! THUMB-state instruction decode and execute.
//!
//! THUMB opcodes are classified by their top bits into the 19 standard
//! formats. Most formats translate directly into the same arithmetic and
//! memory helpers ARM state already needs, so the heavy lifting (shifter
//! semantics, add/sub-with-flags) lives in `arm` and is reused here.

use crate::bus::{AccessKind, Bus};

use super::flags::*;
use super::Cpu;

pub fn execute(cpu: &mut Cpu, bus: &mut Bus, opcode: u16, pc: u32) {
    let op = opcode;
    match op >> 13 {
        0b000 => {
            if (op >> 11) & 0x3 == 0b011 {
                add_subtract(cpu, op);
            } else {
                move_shifted_register(cpu, op);
            }
        }
        0b001 => move_compare_add_sub_immediate(cpu, op),
        0b010 => {
            if op & (1 << 12) == 0 {
                if op & (1 << 11) == 0 {
                    if op & (1 << 10) == 0 {
                        alu_operations(cpu, op)
                    } else {
                        hi_register_bx(cpu, op, pc)
                    }
                } else {
                    pc_relative_load(cpu, bus, op, pc)
                }
            } else if op & (1 << 9) == 0 {
                load_store_register_offset(cpu, bus, op)
            } else {
                load_store_halfword_signed(cpu, bus, op)
            }
        }
        0b011 => load_store_immediate_offset(cpu, bus, op),
        0b100 => {
            if op & (1 << 12) != 0 {
                sp_relative_load_store(cpu, bus, op)
            } else {
                load_store_halfword(cpu, bus, op)
            }
        }
        0b101 => {
            if op & (1 << 12) != 0 {
                if op & (1 << 10) != 0 {
                    push_pop(cpu, bus, op)
                } else {
                    add_offset_to_sp(cpu, op)
                }
            } else {
                load_address(cpu, op, pc)
            }
        }
        0b110 => {
            if op & (1 << 12) != 0 {
                if (op >> 8) & 0xF == 0xF {
                    software_interrupt(cpu, bus, op)
                } else {
                    conditional_branch(cpu, op, pc)
                }
            } else {
                load_store_multiple(cpu, bus, op)
            }
        }
        0b111 => {
            if op & (1 << 12) != 0 {
                long_branch_link(cpu, op, pc)
            } else {
                unconditional_branch(cpu, op, pc)
            }
        }
        _ => unreachable!(),
    }
}

/// Format 1: move shifted register (LSL/LSR/ASR #imm5).
fn move_shifted_register(cpu: &mut Cpu, op: u16) {
    let opc = (op >> 11) & 0x3;
    let offset = ((op >> 6) & 0x1F) as u32;
    let rs = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let value = cpu.reg(rs);
    let carry_in = cpu.flag(MASK_C);

    let (result, carry_out) = match opc {
        0 => {
            if offset == 0 {
                (value, carry_in)
            } else {
                (value << offset, (value >> (32 - offset)) & 1 != 0)
            }
        }
        1 => {
            let amount = if offset == 0 { 32 } else { offset };
            if amount == 32 {
                (0, value & 0x8000_0000 != 0)
            } else {
                (value >> amount, (value >> (amount - 1)) & 1 != 0)
            }
        }
        2 => {
            let amount = if offset == 0 { 32 } else { offset };
            if amount >= 32 {
                let filled = if value & 0x8000_0000 != 0 { 0xFFFF_FFFF } else { 0 };
                (filled, value & 0x8000_0000 != 0)
            } else {
                (((value as i32) >> amount) as u32, (value >> (amount - 1)) & 1 != 0)
            }
        }
        _ => unreachable!(),
    };

    cpu.set_reg(rd, result);
    set_nz(cpu, result);
    cpu.set_flag(MASK_C, carry_out);
}

/// Format 2: add/subtract (register or 3-bit immediate).
fn add_subtract(cpu: &mut Cpu, op: u16) {
    let immediate = op & (1 << 10) != 0;
    let subtract = op & (1 << 9) != 0;
    let rs = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let rn_field = ((op >> 6) & 0x7) as u32;

    let operand1 = cpu.reg(rs);
    let operand2 = if immediate { rn_field } else { cpu.reg(rn_field as usize) };

    let (result, carry, overflow) = if subtract {
        sub_with_flags(operand1, operand2)
    } else {
        add_with_flags(operand1, operand2, false)
    };
    cpu.set_reg(rd, result);
    set_nz(cpu, result);
    cpu.set_flag(MASK_C, carry);
    cpu.set_flag(MASK_V, overflow);
}

/// Format 3: move/compare/add/subtract immediate (8-bit).
fn move_compare_add_sub_immediate(cpu: &mut Cpu, op: u16) {
    let opc = (op >> 11) & 0x3;
    let rd = ((op >> 8) & 0x7) as usize;
    let imm = (op & 0xFF) as u32;
    let operand1 = cpu.reg(rd);

    match opc {
        0 => {
            cpu.set_reg(rd, imm);
            set_nz(cpu, imm);
        }
        1 => {
            let (result, carry, overflow) = sub_with_flags(operand1, imm);
            set_nz(cpu, result);
            cpu.set_flag(MASK_C, carry);
            cpu.set_flag(MASK_V, overflow);
        }
        2 => {
            let (result, carry, overflow) = add_with_flags(operand1, imm, false);
            cpu.set_reg(rd, result);
            set_nz(cpu, result);
            cpu.set_flag(MASK_C, carry);
            cpu.set_flag(MASK_V, overflow);
        }
        3 => {
            let (result, carry, overflow) = sub_with_flags(operand1, imm);
            cpu.set_reg(rd, result);
            set_nz(cpu, result);
            cpu.set_flag(MASK_C, carry);
            cpu.set_flag(MASK_V, overflow);
        }
        _ => unreachable!(),
    }
}

/// Format 4: ALU operations (Rd, Rd op Rs).
fn alu_operations(cpu: &mut Cpu, op: u16) {
    let opc = (op >> 6) & 0xF;
    let rs = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let operand1 = cpu.reg(rd);
    let operand2 = cpu.reg(rs);
    let carry_in = cpu.flag(MASK_C);

    let mut writes_rd = true;
    let (result, carry_out, overflow) = match opc {
        0x0 => (operand1 & operand2, carry_in, cpu.flag(MASK_V)),
        0x1 => (operand1 ^ operand2, carry_in, cpu.flag(MASK_V)),
        0x2 => shift_by_register(operand1, operand2, 0, carry_in),
        0x3 => shift_by_register(operand1, operand2, 1, carry_in),
        0x4 => shift_by_register(operand1, operand2, 2, carry_in),
        0x5 => add_with_flags(operand1, operand2, carry_in),
        0x6 => sub_with_carry(operand1, operand2, carry_in),
        0x7 => shift_by_register(operand1, operand2, 3, carry_in),
        0x8 => {
            writes_rd = false;
            (operand1 & operand2, carry_in, cpu.flag(MASK_V))
        }
        0x9 => sub_with_flags(0, operand2),
        0xA => {
            writes_rd = false;
            sub_with_flags(operand1, operand2)
        }
        0xB => {
            writes_rd = false;
            add_with_flags(operand1, operand2, false)
        }
        0xC => (operand1 | operand2, carry_in, cpu.flag(MASK_V)),
        0xD => (operand1.wrapping_mul(operand2), carry_in, cpu.flag(MASK_V)),
        0xE => (operand1 & !operand2, carry_in, cpu.flag(MASK_V)),
        0xF => (!operand2, carry_in, cpu.flag(MASK_V)),
        _ => unreachable!(),
    };

    if writes_rd {
        cpu.set_reg(rd, result);
    }
    set_nz(cpu, result);
    if matches!(opc, 0x2 | 0x3 | 0x4 | 0x7) {
        cpu.set_flag(MASK_C, carry_out);
    } else if matches!(opc, 0x5 | 0x6 | 0x9 | 0xA | 0xB) {
        cpu.set_flag(MASK_C, carry_out);
        cpu.set_flag(MASK_V, overflow);
    }
}

/// Shifts by the low byte of a register (used by THUMB's LSL/LSR/ASR/ROR ALU ops).
fn shift_by_register(value: u32, rs: u32, shift_type: u32, carry_in: bool) -> (u32, bool, bool) {
    let amount = rs & 0xFF;
    if amount == 0 {
        return (value, carry_in, false);
    }
    let (result, carry) = match shift_type {
        0 => {
            if amount < 32 {
                (value << amount, (value >> (32 - amount)) & 1 != 0)
            } else if amount == 32 {
                (0, value & 1 != 0)
            } else {
                (0, false)
            }
        }
        1 => {
            if amount < 32 {
                (value >> amount, (value >> (amount - 1)) & 1 != 0)
            } else if amount == 32 {
                (0, value & 0x8000_0000 != 0)
            } else {
                (0, false)
            }
        }
        2 => {
            if amount < 32 {
                (((value as i32) >> amount) as u32, (value >> (amount - 1)) & 1 != 0)
            } else {
                let filled = if value & 0x8000_0000 != 0 { 0xFFFF_FFFF } else { 0 };
                (filled, value & 0x8000_0000 != 0)
            }
        }
        3 => {
            let amount = amount % 32;
            if amount == 0 {
                (value, value & 0x8000_0000 != 0)
            } else {
                (value.rotate_right(amount), (value >> (amount - 1)) & 1 != 0)
            }
        }
        _ => unreachable!(),
    };
    (result, carry, false)
}

/// Format 5: Hi-register operations / BX.
fn hi_register_bx(cpu: &mut Cpu, op: u16, pc: u32) {
    let opc = (op >> 8) & 0x3;
    let h1 = op & (1 << 7) != 0;
    let h2 = op & (1 << 6) != 0;
    let rs = (((op >> 3) & 0x7) | if h2 { 0x8 } else { 0 }) as usize;
    let rd = ((op & 0x7) | if h1 { 0x8 } else { 0 }) as usize;

    let operand2 = if rs == 15 { pc.wrapping_add(4) } else { cpu.reg(rs) };

    match opc {
        0 => {
            let result = cpu.reg(rd).wrapping_add(operand2);
            cpu.set_reg(rd, result);
        }
        1 => {
            let operand1 = cpu.reg(rd);
            let (result, carry, overflow) = sub_with_flags(operand1, operand2);
            set_nz(cpu, result);
            cpu.set_flag(MASK_C, carry);
            cpu.set_flag(MASK_V, overflow);
        }
        2 => {
            cpu.set_reg(rd, operand2);
        }
        3 => {
            cpu.branch_exchange(operand2);
        }
        _ => unreachable!(),
    }
}

/// Format 6: PC-relative load (LDR Rd, [PC, #imm]).
fn pc_relative_load(cpu: &mut Cpu, bus: &mut Bus, op: u16, pc: u32) {
    let rd = ((op >> 8) & 0x7) as usize;
    let imm = (op & 0xFF) as u32 * 4;
    let base = (pc.wrapping_add(4)) & !0x3;
    let value = bus.read32(base.wrapping_add(imm), AccessKind::NonSequential);
    cpu.set_reg(rd, value);
}

/// Format 7: load/store with register offset.
fn load_store_register_offset(cpu: &mut Cpu, bus: &mut Bus, op: u16) {
    let load = op & (1 << 11) != 0;
    let byte = op & (1 << 10) != 0;
    let ro = ((op >> 6) & 0x7) as usize;
    let rb = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let addr = cpu.reg(rb).wrapping_add(cpu.reg(ro));

    if load {
        let value = if byte {
            bus.read8(addr, AccessKind::NonSequential) as u32
        } else {
            bus.read32(addr, AccessKind::NonSequential).rotate_right((addr & 3) * 8)
        };
        cpu.set_reg(rd, value);
    } else if byte {
        bus.write8(addr, cpu.reg(rd) as u8, AccessKind::NonSequential);
    } else {
        bus.write32(addr, cpu.reg(rd), AccessKind::NonSequential);
    }
}

/// Format 8: load/store sign-extended byte/halfword.
fn load_store_halfword_signed(cpu: &mut Cpu, bus: &mut Bus, op: u16) {
    let h_bit = op & (1 << 11) != 0;
    let sign_extend = op & (1 << 10) != 0;
    let ro = ((op >> 6) & 0x7) as usize;
    let rb = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let addr = cpu.reg(rb).wrapping_add(cpu.reg(ro));

    match (sign_extend, h_bit) {
        (false, false) => {
            bus.write16(addr, cpu.reg(rd) as u16, AccessKind::NonSequential);
        }
        (false, true) => {
            let value = bus.read16(addr, AccessKind::NonSequential);
            let value = if addr & 1 != 0 { (value as u32).rotate_right(8) } else { value as u32 };
            cpu.set_reg(rd, value);
        }
        (true, false) => {
            let value = bus.read8(addr, AccessKind::NonSequential) as i8 as i32 as u32;
            cpu.set_reg(rd, value);
        }
        (true, true) => {
            let value = if addr & 1 != 0 {
                bus.read8(addr, AccessKind::NonSequential) as i8 as i32 as u32
            } else {
                bus.read16(addr, AccessKind::NonSequential) as i16 as i32 as u32
            };
            cpu.set_reg(rd, value);
        }
    }
}

/// Format 9: load/store with 5-bit immediate offset.
fn load_store_immediate_offset(cpu: &mut Cpu, bus: &mut Bus, op: u16) {
    let byte = op & (1 << 12) != 0;
    let load = op & (1 << 11) != 0;
    let imm = ((op >> 6) & 0x1F) as u32;
    let rb = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let offset = if byte { imm } else { imm * 4 };
    let addr = cpu.reg(rb).wrapping_add(offset);

    if load {
        let value = if byte {
            bus.read8(addr, AccessKind::NonSequential) as u32
        } else {
            bus.read32(addr, AccessKind::NonSequential).rotate_right((addr & 3) * 8)
        };
        cpu.set_reg(rd, value);
    } else if byte {
        bus.write8(addr, cpu.reg(rd) as u8, AccessKind::NonSequential);
    } else {
        bus.write32(addr, cpu.reg(rd), AccessKind::NonSequential);
    }
}

/// Format 10: load/store halfword with 5-bit immediate offset.
fn load_store_halfword(cpu: &mut Cpu, bus: &mut Bus, op: u16) {
    let load = op & (1 << 11) != 0;
    let imm = (((op >> 6) & 0x1F) as u32) * 2;
    let rb = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let addr = cpu.reg(rb).wrapping_add(imm);

    if load {
        let value = bus.read16(addr, AccessKind::NonSequential);
        let value = if addr & 1 != 0 { (value as u32).rotate_right(8) } else { value as u32 };
        cpu.set_reg(rd, value);
    } else {
        bus.write16(addr, cpu.reg(rd) as u16, AccessKind::NonSequential);
    }
}

/// Format 11: SP-relative load/store.
fn sp_relative_load_store(cpu: &mut Cpu, bus: &mut Bus, op: u16) {
    let load = op & (1 << 11) != 0;
    let rd = ((op >> 8) & 0x7) as usize;
    let imm = (op & 0xFF) as u32 * 4;
    let addr = cpu.reg(13).wrapping_add(imm);

    if load {
        let value = bus.read32(addr, AccessKind::NonSequential).rotate_right((addr & 3) * 8);
        cpu.set_reg(rd, value);
    } else {
        bus.write32(addr, cpu.reg(rd), AccessKind::NonSequential);
    }
}

/// Format 12: load address (ADD Rd, PC/SP, #imm).
fn load_address(cpu: &mut Cpu, op: u16, pc: u32) {
    let sp_source = op & (1 << 11) != 0;
    let rd = ((op >> 8) & 0x7) as usize;
    let imm = (op & 0xFF) as u32 * 4;
    let base = if sp_source { cpu.reg(13) } else { (pc.wrapping_add(4)) & !0x3 };
    cpu.set_reg(rd, base.wrapping_add(imm));
}

/// Format 13: add offset to stack pointer.
fn add_offset_to_sp(cpu: &mut Cpu, op: u16) {
    let negative = op & (1 << 7) != 0;
    let imm = ((op & 0x7F) as u32) * 4;
    let sp = cpu.reg(13);
    cpu.set_reg(13, if negative { sp.wrapping_sub(imm) } else { sp.wrapping_add(imm) });
}

/// Format 14: push/pop registers.
fn push_pop(cpu: &mut Cpu, bus: &mut Bus, op: u16) {
    let load = op & (1 << 11) != 0;
    let store_lr_or_load_pc = op & (1 << 8) != 0;
    let list = op & 0xFF;

    if load {
        let mut sp = cpu.reg(13);
        for reg in 0..8 {
            if list & (1 << reg) != 0 {
                let value = bus.read32(sp, AccessKind::Sequential);
                cpu.set_reg(reg, value);
                sp = sp.wrapping_add(4);
            }
        }
        if store_lr_or_load_pc {
            let value = bus.read32(sp, AccessKind::Sequential);
            cpu.branch_to(value & !1);
            sp = sp.wrapping_add(4);
        }
        cpu.set_reg(13, sp);
    } else {
        let mut sp = cpu.reg(13);
        let count = list.count_ones() + store_lr_or_load_pc as u32;
        sp = sp.wrapping_sub(count * 4);
        cpu.set_reg(13, sp);
        let mut addr = sp;
        for reg in 0..8 {
            if list & (1 << reg) != 0 {
                bus.write32(addr, cpu.reg(reg), AccessKind::Sequential);
                addr = addr.wrapping_add(4);
            }
        }
        if store_lr_or_load_pc {
            bus.write32(addr, cpu.reg(14), AccessKind::Sequential);
        }
    }
}

/// Format 15: multiple load/store (LDMIA/STMIA Rb!, {list}).
fn load_store_multiple(cpu: &mut Cpu, bus: &mut Bus, op: u16) {
    let load = op & (1 << 11) != 0;
    let rb = ((op >> 8) & 0x7) as usize;
    let list = op & 0xFF;
    let mut addr = cpu.reg(rb);

    for reg in 0..8 {
        if list & (1 << reg) != 0 {
            if load {
                let value = bus.read32(addr, AccessKind::Sequential);
                cpu.set_reg(reg, value);
            } else {
                bus.write32(addr, cpu.reg(reg), AccessKind::Sequential);
            }
            addr = addr.wrapping_add(4);
        }
    }
    if !load || list & (1 << rb) == 0 {
        cpu.set_reg(rb, addr);
    }
}

/// Format 16: conditional branch.
fn conditional_branch(cpu: &mut Cpu, op: u16, pc: u32) {
    let cond = ((op >> 8) & 0xF) as u32;
    if !condition_passes(cpu, cond) {
        return;
    }
    let offset = ((op & 0xFF) as i8 as i32) * 2;
    let target = (pc as i64 + 4 + offset as i64) as u32;
    cpu.branch_to(target);
}

/// Format 17: software interrupt.
fn software_interrupt(cpu: &mut Cpu, bus: &mut Bus, op: u16) {
    let comment = (op & 0xFF) as u32;
    bus.note_swi(comment);

    if bus.hle_swi_enabled() {
        super::swi::dispatch(cpu, bus, comment);
        return;
    }

    let return_addr = cpu.reg(15).wrapping_sub(2);
    cpu.enter_exception(bus, Mode::Svc, 0x0000_0008, return_addr);
}

/// Format 18: unconditional branch.
fn unconditional_branch(cpu: &mut Cpu, op: u16, pc: u32) {
    let offset = (((op & 0x7FF) as i32) << 21 >> 20) as i64;
    let target = (pc as i64 + 4 + offset) as u32;
    cpu.branch_to(target);
}

/// Format 19: long branch with link (two-instruction BL pair).
fn long_branch_link(cpu: &mut Cpu, op: u16, pc: u32) {
    let low = op & (1 << 11) != 0;
    let offset11 = (op & 0x7FF) as u32;

    if !low {
        let signed = ((offset11 << 21) as i32) >> 9;
        let target = (pc as i64 + 4 + signed as i64) as u32;
        cpu.set_reg(14, target);
    } else {
        let next_pc = cpu.reg(15);
        let target = cpu.reg(14).wrapping_add(offset11 << 1);
        cpu.set_reg(14, next_pc.wrapping_sub(2) | 1);
        cpu.branch_to(target);
    }
}

fn condition_passes(cpu: &Cpu, cond: u32) -> bool {
    let n = cpu.flag(MASK_N);
    let z = cpu.flag(MASK_Z);
    let c = cpu.flag(MASK_C);
    let v = cpu.flag(MASK_V);
    match cond {
        0x0 => z,
        0x1 => !z,
        0x2 => c,
        0x3 => !c,
        0x4 => n,
        0x5 => !n,
        0x6 => v,
        0x7 => !v,
        0x8 => c && !z,
        0x9 => !c || z,
        0xA => n == v,
        0xB => n != v,
        0xC => !z && n == v,
        0xD => z || n != v,
        _ => true,
    }
}

fn set_nz(cpu: &mut Cpu, result: u32) {
    cpu.set_flag(MASK_Z, result == 0);
    cpu.set_flag(MASK_N, result & 0x8000_0000 != 0);
}

fn add_with_flags(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    let (r1, c1) = a.overflowing_add(b);
    let (r2, c2) = r1.overflowing_add(carry_in as u32);
    let carry = c1 || c2;
    let overflow =
        (a as i32).checked_add(b as i32).and_then(|v| v.checked_add(carry_in as i32)).is_none();
    (r2, carry, overflow)
}

fn sub_with_flags(a: u32, b: u32) -> (u32, bool, bool) {
    let result = a.wrapping_sub(b);
    let carry = a >= b;
    let overflow = ((a ^ b) & (a ^ result)) & 0x8000_0000 != 0;
    (result, carry, overflow)
}

fn sub_with_carry(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    let borrow = if carry_in { 0 } else { 1 };
    let (r1, b1) = a.overflowing_sub(b);
    let (r2, b2) = r1.overflowing_sub(borrow);
    let carry = !(b1 || b2);
    let overflow = ((a ^ b) & (a ^ r2)) & 0x8000_0000 != 0;
    (r2, carry, overflow)
}
