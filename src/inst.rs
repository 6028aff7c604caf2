//! Instruction decode and execution for the Sharp LR35902. Every
//! main-table byte factors as `x = op>>6, y = (op>>3)&7, z = op&7, p =
//! y>>1, q = y&1`, the standard bit-field decomposition of the opcode
//! map. [`Operation`] holds the ~40 parametrized instruction forms;
//! [`fetch`] decodes one opcode (plus any immediate operand bytes)
//! into one, and [`Operation::execute`] runs it against a
//! [`crate::cpu::Cpu`], returning the T-cycles spent.

use crate::alu;
use crate::cpu::Cpu;
use crate::memory::MemoryBus;
use crate::register::Reg;

/// An 8-bit operand a register-or-memory instruction form reads and
/// (for every form but `CP`) writes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target8 {
    Reg(Reg),
    MemHl,
}

impl Target8 {
    fn read(self, cpu: &mut Cpu) -> u8 {
        match self {
            Target8::Reg(r) => cpu.read_reg(r) as u8,
            Target8::MemHl => {
                let addr = cpu.read_reg(Reg::HL);
                cpu.read8(addr)
            }
        }
    }

    fn write(self, cpu: &mut Cpu, value: u8) {
        match self {
            Target8::Reg(r) => cpu.write_reg(r, value as u16),
            Target8::MemHl => {
                let addr = cpu.read_reg(Reg::HL);
                cpu.write8(addr, value);
            }
        }
    }

    fn cycles(self, reg_cost: u8, mem_cost: u8) -> u8 {
        match self {
            Target8::Reg(_) => reg_cost,
            Target8::MemHl => mem_cost,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Nz,
    Z,
    Nc,
    C,
}

impl Condition {
    fn holds(self, cpu: &Cpu) -> bool {
        let flags = cpu.regs().flags;
        match self {
            Condition::Nz => !flags.zero,
            Condition::Z => flags.zero,
            Condition::Nc => !flags.carry,
            Condition::C => flags.carry,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

impl AluOp {
    fn apply(self, a: u8, operand: u8, carry_in: bool) -> (u8, crate::register::Flags) {
        use crate::register::Flags;
        match self {
            AluOp::Add => alu::add8(a, operand, 0),
            AluOp::Adc => alu::add8(a, operand, carry_in as u8),
            AluOp::Sub => alu::sub8(a, operand, 0),
            AluOp::Sbc => alu::sub8(a, operand, carry_in as u8),
            AluOp::Cp => alu::sub8(a, operand, 0),
            AluOp::And => {
                let result = a & operand;
                (
                    result,
                    Flags {
                        zero: result == 0,
                        subtract: false,
                        half_carry: true,
                        carry: false,
                    },
                )
            }
            AluOp::Xor => {
                let result = a ^ operand;
                (
                    result,
                    Flags {
                        zero: result == 0,
                        subtract: false,
                        half_carry: false,
                        carry: false,
                    },
                )
            }
            AluOp::Or => {
                let result = a | operand;
                (
                    result,
                    Flags {
                        zero: result == 0,
                        subtract: false,
                        half_carry: false,
                        carry: false,
                    },
                )
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotOp {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
}

#[derive(Clone, Copy, Debug)]
pub enum Operation {
    Nop,
    Stop,
    Halt,
    Di,
    Ei,
    /// One of the 11 undefined main-table bytes:
    /// `0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD`.
    Invalid(u8),

    LdRR { dst: Target8, src: Target8 },
    LdRImm8 { dst: Target8, value: u8 },
    LdRp16Imm16 { dst: Reg, value: u16 },
    LdMemRpFromA { rp: Reg },
    LdAFromMemRp { rp: Reg },
    LdMemHlIncFromA,
    LdMemHlDecFromA,
    LdAFromMemHlInc,
    LdAFromMemHlDec,
    LdAddr16FromSp { addr: u16 },

    IncRp { rp: Reg },
    DecRp { rp: Reg },
    IncR { target: Target8 },
    DecR { target: Target8 },
    AddHlRp { rp: Reg },

    Rlca,
    Rrca,
    Rla,
    Rra,
    Daa,
    Cpl,
    Scf,
    Ccf,

    Alu { op: AluOp, operand: Target8 },
    AluImm { op: AluOp, value: u8 },

    JrUnconditional { offset: i8 },
    JrCond { cond: Condition, offset: i8 },
    JpUnconditional { addr: u16 },
    JpCond { cond: Condition, addr: u16 },
    JpHl,

    CallUnconditional { addr: u16 },
    CallCond { cond: Condition, addr: u16 },
    RetUnconditional,
    RetCond { cond: Condition },
    Reti,
    Rst { addr: u16 },

    PushRp { rp: Reg },
    PopRp { rp: Reg },

    LdHighAddr8FromA { offset: u8 },
    LdAFromHighAddr8 { offset: u8 },
    LdHighCFromA,
    LdAFromHighC,
    LdAddr16FromA { addr: u16 },
    LdAFromAddr16 { addr: u16 },
    LdSpHl,
    AddSpE8 { e8: i8 },
    LdHlSpPlusE8 { e8: i8 },

    Rot { op: RotOp, target: Target8 },
    Bit { bit: u8, target: Target8 },
    Res { bit: u8, target: Target8 },
    Set { bit: u8, target: Target8 },
}

fn r_target(z: u8) -> Target8 {
    match z {
        0 => Target8::Reg(Reg::B),
        1 => Target8::Reg(Reg::C),
        2 => Target8::Reg(Reg::D),
        3 => Target8::Reg(Reg::E),
        4 => Target8::Reg(Reg::H),
        5 => Target8::Reg(Reg::L),
        6 => Target8::MemHl,
        7 => Target8::Reg(Reg::A),
        _ => unreachable!("z is a 3-bit field"),
    }
}

fn rp_table(p: u8) -> Reg {
    match p {
        0 => Reg::BC,
        1 => Reg::DE,
        2 => Reg::HL,
        3 => Reg::SP,
        _ => unreachable!("p is a 2-bit field"),
    }
}

fn rp2_table(p: u8) -> Reg {
    match p {
        0 => Reg::BC,
        1 => Reg::DE,
        2 => Reg::HL,
        3 => Reg::AF,
        _ => unreachable!("p is a 2-bit field"),
    }
}

fn cc_table(y: u8) -> Condition {
    match y {
        0 => Condition::Nz,
        1 => Condition::Z,
        2 => Condition::Nc,
        3 => Condition::C,
        _ => unreachable!("cc_table is only called with y in 0..=3"),
    }
}

fn alu_table(y: u8) -> AluOp {
    match y {
        0 => AluOp::Add,
        1 => AluOp::Adc,
        2 => AluOp::Sub,
        3 => AluOp::Sbc,
        4 => AluOp::And,
        5 => AluOp::Xor,
        6 => AluOp::Or,
        7 => AluOp::Cp,
        _ => unreachable!("y is a 3-bit field"),
    }
}

fn rot_table(y: u8) -> RotOp {
    match y {
        0 => RotOp::Rlc,
        1 => RotOp::Rrc,
        2 => RotOp::Rl,
        3 => RotOp::Rr,
        4 => RotOp::Sla,
        5 => RotOp::Sra,
        6 => RotOp::Swap,
        7 => RotOp::Srl,
        _ => unreachable!("y is a 3-bit field"),
    }
}

/// Decodes the instruction at `pc`. Returns the operation and the
/// number of bytes (including the opcode itself, and the `0xCB`
/// prefix byte where relevant) it occupies.
pub fn fetch(pc: u16, bus: &MemoryBus) -> (Operation, u16) {
    let opcode = bus.read(pc);
    if opcode == 0xcb {
        let opcode2 = bus.read(pc.wrapping_add(1));
        return (decode_cb(opcode2), 2);
    }

    let x = opcode >> 6;
    let y = (opcode >> 3) & 0x07;
    let z = opcode & 0x07;
    let p = y >> 1;
    let q = y & 0x01;

    match (x, z) {
        (0, 0) => match y {
            0 => (Operation::Nop, 1),
            1 => (Operation::LdAddr16FromSp { addr: bus.read_word(pc.wrapping_add(1)) }, 3),
            2 => (Operation::Stop, 2),
            3 => (Operation::JrUnconditional { offset: bus.read(pc.wrapping_add(1)) as i8 }, 2),
            4..=7 => (Operation::JrCond { cond: cc_table(y - 4), offset: bus.read(pc.wrapping_add(1)) as i8 }, 2),
            _ => unreachable!(),
        },
        (0, 1) => {
            let rp = rp_table(p);
            if q == 0 {
                (Operation::LdRp16Imm16 { dst: rp, value: bus.read_word(pc.wrapping_add(1)) }, 3)
            } else {
                (Operation::AddHlRp { rp }, 1)
            }
        }
        (0, 2) => {
            let op = match (p, q) {
                (0, 0) => Operation::LdMemRpFromA { rp: Reg::BC },
                (1, 0) => Operation::LdMemRpFromA { rp: Reg::DE },
                (2, 0) => Operation::LdMemHlIncFromA,
                (3, 0) => Operation::LdMemHlDecFromA,
                (0, 1) => Operation::LdAFromMemRp { rp: Reg::BC },
                (1, 1) => Operation::LdAFromMemRp { rp: Reg::DE },
                (2, 1) => Operation::LdAFromMemHlInc,
                (3, 1) => Operation::LdAFromMemHlDec,
                _ => unreachable!(),
            };
            (op, 1)
        }
        (0, 3) => {
            let rp = rp_table(p);
            if q == 0 { (Operation::IncRp { rp }, 1) } else { (Operation::DecRp { rp }, 1) }
        }
        (0, 4) => (Operation::IncR { target: r_target(y) }, 1),
        (0, 5) => (Operation::DecR { target: r_target(y) }, 1),
        (0, 6) => (Operation::LdRImm8 { dst: r_target(y), value: bus.read(pc.wrapping_add(1)) }, 2),
        (0, 7) => {
            let op = match y {
                0 => Operation::Rlca,
                1 => Operation::Rrca,
                2 => Operation::Rla,
                3 => Operation::Rra,
                4 => Operation::Daa,
                5 => Operation::Cpl,
                6 => Operation::Scf,
                7 => Operation::Ccf,
                _ => unreachable!(),
            };
            (op, 1)
        }
        (1, _) => {
            if z == 6 && y == 6 {
                (Operation::Halt, 1)
            } else {
                (Operation::LdRR { dst: r_target(y), src: r_target(z) }, 1)
            }
        }
        (2, _) => (Operation::Alu { op: alu_table(y), operand: r_target(z) }, 1),
        (3, 0) => match y {
            0..=3 => (Operation::RetCond { cond: cc_table(y) }, 1),
            4 => (Operation::LdHighAddr8FromA { offset: bus.read(pc.wrapping_add(1)) }, 2),
            5 => (Operation::AddSpE8 { e8: bus.read(pc.wrapping_add(1)) as i8 }, 2),
            6 => (Operation::LdAFromHighAddr8 { offset: bus.read(pc.wrapping_add(1)) }, 2),
            7 => (Operation::LdHlSpPlusE8 { e8: bus.read(pc.wrapping_add(1)) as i8 }, 2),
            _ => unreachable!(),
        },
        (3, 1) => {
            if q == 0 {
                (Operation::PopRp { rp: rp2_table(p) }, 1)
            } else {
                let op = match p {
                    0 => Operation::RetUnconditional,
                    1 => Operation::Reti,
                    2 => Operation::JpHl,
                    3 => Operation::LdSpHl,
                    _ => unreachable!(),
                };
                (op, 1)
            }
        }
        (3, 2) => match y {
            0..=3 => (Operation::JpCond { cond: cc_table(y), addr: bus.read_word(pc.wrapping_add(1)) }, 3),
            4 => (Operation::LdHighCFromA, 1),
            5 => (Operation::LdAddr16FromA { addr: bus.read_word(pc.wrapping_add(1)) }, 3),
            6 => (Operation::LdAFromHighC, 1),
            7 => (Operation::LdAFromAddr16 { addr: bus.read_word(pc.wrapping_add(1)) }, 3),
            _ => unreachable!(),
        },
        (3, 3) => match y {
            0 => (Operation::JpUnconditional { addr: bus.read_word(pc.wrapping_add(1)) }, 3),
            2 | 3 | 4 | 5 => (Operation::Invalid(opcode), 1),
            6 => (Operation::Di, 1),
            7 => (Operation::Ei, 1),
            _ => unreachable!(),
        },
        (3, 4) => match y {
            0..=3 => (Operation::CallCond { cond: cc_table(y), addr: bus.read_word(pc.wrapping_add(1)) }, 3),
            4..=7 => (Operation::Invalid(opcode), 1),
            _ => unreachable!(),
        },
        (3, 5) => {
            if q == 0 {
                (Operation::PushRp { rp: rp2_table(p) }, 1)
            } else if p == 0 {
                (Operation::CallUnconditional { addr: bus.read_word(pc.wrapping_add(1)) }, 3)
            } else {
                (Operation::Invalid(opcode), 1)
            }
        }
        (3, 6) => (Operation::AluImm { op: alu_table(y), value: bus.read(pc.wrapping_add(1)) }, 2),
        (3, 7) => (Operation::Rst { addr: (y as u16) * 8 }, 1),
        _ => unreachable!("x is a 2-bit field"),
    }
}

fn decode_cb(opcode2: u8) -> Operation {
    let x = opcode2 >> 6;
    let y = (opcode2 >> 3) & 0x07;
    let z = opcode2 & 0x07;
    let target = r_target(z);
    match x {
        0 => Operation::Rot { op: rot_table(y), target },
        1 => Operation::Bit { bit: y, target },
        2 => Operation::Res { bit: y, target },
        3 => Operation::Set { bit: y, target },
        _ => unreachable!("x is a 2-bit field"),
    }
}

impl Operation {
    /// Runs the operation against `cpu` and returns the T-cycles it
    /// spent, resolving any condition against the flags currently set.
    pub fn execute(&self, cpu: &mut Cpu) -> u8 {
        match *self {
            Operation::Nop => 4,

            Operation::Stop => {
                // Treated as HALT: CGB double-speed switching is out of
                // scope, and DMG STOP behaves as an idle halt in practice.
                cpu.set_halted(true);
                4
            }

            Operation::Halt => {
                cpu.set_halted(true);
                4
            }

            Operation::Di => {
                cpu.set_ime(false);
                4
            }

            Operation::Ei => {
                cpu.request_ime_pending();
                4
            }

            Operation::Invalid(byte) => {
                panic_gb!("invalid opcode {:#04x} at pc {:#06x}", byte, cpu.pc());
            }

            Operation::LdRR { dst, src } => {
                let value = src.read(cpu);
                dst.write(cpu, value);
                if dst == Target8::MemHl || src == Target8::MemHl { 8 } else { 4 }
            }

            Operation::LdRImm8 { dst, value } => {
                dst.write(cpu, value);
                dst.cycles(8, 12)
            }

            Operation::LdRp16Imm16 { dst, value } => {
                cpu.write_reg(dst, value);
                12
            }

            Operation::LdMemRpFromA { rp } => {
                let addr = cpu.read_reg(rp);
                let a = cpu.read_reg(Reg::A) as u8;
                cpu.write8(addr, a);
                8
            }

            Operation::LdAFromMemRp { rp } => {
                let addr = cpu.read_reg(rp);
                let value = cpu.read8(addr);
                cpu.write_reg(Reg::A, value as u16);
                8
            }

            Operation::LdMemHlIncFromA => {
                let addr = cpu.read_reg(Reg::HL);
                let a = cpu.read_reg(Reg::A) as u8;
                cpu.write8(addr, a);
                cpu.write_reg(Reg::HL, addr.wrapping_add(1));
                8
            }

            Operation::LdMemHlDecFromA => {
                let addr = cpu.read_reg(Reg::HL);
                let a = cpu.read_reg(Reg::A) as u8;
                cpu.write8(addr, a);
                cpu.write_reg(Reg::HL, addr.wrapping_sub(1));
                8
            }

            Operation::LdAFromMemHlInc => {
                let addr = cpu.read_reg(Reg::HL);
                let value = cpu.read8(addr);
                cpu.write_reg(Reg::A, value as u16);
                cpu.write_reg(Reg::HL, addr.wrapping_add(1));
                8
            }

            Operation::LdAFromMemHlDec => {
                let addr = cpu.read_reg(Reg::HL);
                let value = cpu.read8(addr);
                cpu.write_reg(Reg::A, value as u16);
                cpu.write_reg(Reg::HL, addr.wrapping_sub(1));
                8
            }

            Operation::LdAddr16FromSp { addr } => {
                let sp = cpu.read_reg(Reg::SP);
                cpu.write8(addr, (sp & 0xff) as u8);
                cpu.write8(addr.wrapping_add(1), (sp >> 8) as u8);
                20
            }

            Operation::IncRp { rp } => {
                let value = cpu.read_reg(rp).wrapping_add(1);
                cpu.write_reg(rp, value);
                8
            }

            Operation::DecRp { rp } => {
                let value = cpu.read_reg(rp).wrapping_sub(1);
                cpu.write_reg(rp, value);
                8
            }

            Operation::IncR { target } => {
                let value = target.read(cpu);
                let (result, zero, half_carry) = alu::inc8(value);
                target.write(cpu, result);
                let mut flags = cpu.regs().flags;
                flags.zero = zero;
                flags.subtract = false;
                flags.half_carry = half_carry;
                cpu.regs_i().flags = flags;
                target.cycles(4, 12)
            }

            Operation::DecR { target } => {
                let value = target.read(cpu);
                let (result, zero, half_carry) = alu::dec8(value);
                target.write(cpu, result);
                let mut flags = cpu.regs().flags;
                flags.zero = zero;
                flags.subtract = true;
                flags.half_carry = half_carry;
                cpu.regs_i().flags = flags;
                target.cycles(4, 12)
            }

            Operation::AddHlRp { rp } => {
                let hl = cpu.read_reg(Reg::HL);
                let operand = cpu.read_reg(rp);
                let (result, half_carry, carry) = alu::add16(hl, operand);
                cpu.write_reg(Reg::HL, result);
                let mut flags = cpu.regs().flags;
                flags.subtract = false;
                flags.half_carry = half_carry;
                flags.carry = carry;
                cpu.regs_i().flags = flags;
                8
            }

            Operation::Rlca => {
                let a = cpu.read_reg(Reg::A) as u8;
                let (result, carry) = alu::rlc(a);
                cpu.write_reg(Reg::A, result as u16);
                cpu.regs_i().flags = crate::register::Flags { zero: false, subtract: false, half_carry: false, carry };
                4
            }

            Operation::Rrca => {
                let a = cpu.read_reg(Reg::A) as u8;
                let (result, carry) = alu::rrc(a);
                cpu.write_reg(Reg::A, result as u16);
                cpu.regs_i().flags = crate::register::Flags { zero: false, subtract: false, half_carry: false, carry };
                4
            }

            Operation::Rla => {
                let a = cpu.read_reg(Reg::A) as u8;
                let carry_in = cpu.regs().flags.carry;
                let (result, carry) = alu::rl(a, carry_in);
                cpu.write_reg(Reg::A, result as u16);
                cpu.regs_i().flags = crate::register::Flags { zero: false, subtract: false, half_carry: false, carry };
                4
            }

            Operation::Rra => {
                let a = cpu.read_reg(Reg::A) as u8;
                let carry_in = cpu.regs().flags.carry;
                let (result, carry) = alu::rr(a, carry_in);
                cpu.write_reg(Reg::A, result as u16);
                cpu.regs_i().flags = crate::register::Flags { zero: false, subtract: false, half_carry: false, carry };
                4
            }

            Operation::Daa => {
                let a = cpu.read_reg(Reg::A) as u8;
                let flags = cpu.regs().flags;
                let (result, new_flags) = alu::daa(a, flags);
                cpu.write_reg(Reg::A, result as u16);
                cpu.regs_i().flags = new_flags;
                4
            }

            Operation::Cpl => {
                let a = cpu.read_reg(Reg::A) as u8;
                cpu.write_reg(Reg::A, !a as u16);
                let mut flags = cpu.regs().flags;
                flags.subtract = true;
                flags.half_carry = true;
                cpu.regs_i().flags = flags;
                4
            }

            Operation::Scf => {
                let mut flags = cpu.regs().flags;
                flags.subtract = false;
                flags.half_carry = false;
                flags.carry = true;
                cpu.regs_i().flags = flags;
                4
            }

            Operation::Ccf => {
                let mut flags = cpu.regs().flags;
                flags.subtract = false;
                flags.half_carry = false;
                flags.carry = !flags.carry;
                cpu.regs_i().flags = flags;
                4
            }

            Operation::Alu { op, operand } => {
                let a = cpu.read_reg(Reg::A) as u8;
                let value = operand.read(cpu);
                let carry_in = cpu.regs().flags.carry;
                let (result, flags) = op.apply(a, value, carry_in);
                cpu.regs_i().flags = flags;
                if op != AluOp::Cp {
                    cpu.write_reg(Reg::A, result as u16);
                }
                operand.cycles(4, 8)
            }

            Operation::AluImm { op, value } => {
                let a = cpu.read_reg(Reg::A) as u8;
                let carry_in = cpu.regs().flags.carry;
                let (result, flags) = op.apply(a, value, carry_in);
                cpu.regs_i().flags = flags;
                if op != AluOp::Cp {
                    cpu.write_reg(Reg::A, result as u16);
                }
                8
            }

            Operation::JrUnconditional { offset } => {
                let pc = cpu.pc();
                let sp = cpu.read_reg(Reg::SP);
                let target = pc.wrapping_add(offset as i16 as u16);
                cpu.write_reg(Reg::PC, target);
                cpu.hooks().borrow_mut().jump_relative(pc, sp, offset);
                12
            }

            Operation::JrCond { cond, offset } => {
                if cond.holds(cpu) {
                    let pc = cpu.pc();
                    let sp = cpu.read_reg(Reg::SP);
                    let target = pc.wrapping_add(offset as i16 as u16);
                    cpu.write_reg(Reg::PC, target);
                    cpu.hooks().borrow_mut().jump_relative(pc, sp, offset);
                    12
                } else {
                    8
                }
            }

            Operation::JpUnconditional { addr } => {
                let pc = cpu.pc();
                let sp = cpu.read_reg(Reg::SP);
                cpu.write_reg(Reg::PC, addr);
                cpu.hooks().borrow_mut().jump(pc, sp, addr);
                16
            }

            Operation::JpCond { cond, addr } => {
                if cond.holds(cpu) {
                    let pc = cpu.pc();
                    let sp = cpu.read_reg(Reg::SP);
                    cpu.write_reg(Reg::PC, addr);
                    cpu.hooks().borrow_mut().jump(pc, sp, addr);
                    16
                } else {
                    12
                }
            }

            Operation::JpHl => {
                let addr = cpu.read_reg(Reg::HL);
                cpu.write_reg(Reg::PC, addr);
                4
            }

            Operation::CallUnconditional { addr } => {
                let pc = cpu.pc();
                let sp = cpu.read_reg(Reg::SP);
                cpu.push_word(pc);
                cpu.write_reg(Reg::PC, addr);
                cpu.hooks().borrow_mut().call(pc, sp, addr);
                24
            }

            Operation::CallCond { cond, addr } => {
                if cond.holds(cpu) {
                    let pc = cpu.pc();
                    let sp = cpu.read_reg(Reg::SP);
                    cpu.push_word(pc);
                    cpu.write_reg(Reg::PC, addr);
                    cpu.hooks().borrow_mut().call(pc, sp, addr);
                    24
                } else {
                    12
                }
            }

            Operation::RetUnconditional => {
                let pc = cpu.pc();
                let sp = cpu.read_reg(Reg::SP);
                let target = cpu.pop_word();
                cpu.write_reg(Reg::PC, target);
                cpu.hooks().borrow_mut().ret(pc, sp, target, false);
                16
            }

            Operation::RetCond { cond } => {
                if cond.holds(cpu) {
                    let pc = cpu.pc();
                    let sp = cpu.read_reg(Reg::SP);
                    let target = cpu.pop_word();
                    cpu.write_reg(Reg::PC, target);
                    cpu.hooks().borrow_mut().ret(pc, sp, target, false);
                    20
                } else {
                    8
                }
            }

            Operation::Reti => {
                let pc = cpu.pc();
                let sp = cpu.read_reg(Reg::SP);
                let target = cpu.pop_word();
                cpu.write_reg(Reg::PC, target);
                cpu.set_ime(true);
                cpu.hooks().borrow_mut().ret(pc, sp, target, false);
                16
            }

            Operation::Rst { addr } => {
                let pc = cpu.pc();
                let sp = cpu.read_reg(Reg::SP);
                cpu.push_word(pc);
                cpu.write_reg(Reg::PC, addr);
                cpu.hooks().borrow_mut().call(pc, sp, addr);
                16
            }

            Operation::PushRp { rp } => {
                let value = cpu.read_reg(rp);
                cpu.push_word(value);
                16
            }

            Operation::PopRp { rp } => {
                let value = cpu.pop_word();
                cpu.write_reg(rp, value);
                12
            }

            Operation::LdHighAddr8FromA { offset } => {
                let addr = 0xff00 | offset as u16;
                let a = cpu.read_reg(Reg::A) as u8;
                cpu.write8(addr, a);
                12
            }

            Operation::LdAFromHighAddr8 { offset } => {
                let addr = 0xff00 | offset as u16;
                let value = cpu.read8(addr);
                cpu.write_reg(Reg::A, value as u16);
                12
            }

            Operation::LdHighCFromA => {
                let addr = 0xff00 | cpu.read_reg(Reg::C);
                let a = cpu.read_reg(Reg::A) as u8;
                cpu.write8(addr, a);
                8
            }

            Operation::LdAFromHighC => {
                let addr = 0xff00 | cpu.read_reg(Reg::C);
                let value = cpu.read8(addr);
                cpu.write_reg(Reg::A, value as u16);
                8
            }

            Operation::LdAddr16FromA { addr } => {
                let a = cpu.read_reg(Reg::A) as u8;
                cpu.write8(addr, a);
                16
            }

            Operation::LdAFromAddr16 { addr } => {
                let value = cpu.read8(addr);
                cpu.write_reg(Reg::A, value as u16);
                16
            }

            Operation::LdSpHl => {
                let hl = cpu.read_reg(Reg::HL);
                cpu.write_reg(Reg::SP, hl);
                8
            }

            Operation::AddSpE8 { e8 } => {
                let sp = cpu.read_reg(Reg::SP);
                let (result, half_carry, carry) = alu::add_sp_e8(sp, e8);
                cpu.write_reg(Reg::SP, result);
                cpu.regs_i().flags = crate::register::Flags { zero: false, subtract: false, half_carry, carry };
                16
            }

            Operation::LdHlSpPlusE8 { e8 } => {
                let sp = cpu.read_reg(Reg::SP);
                let (result, half_carry, carry) = alu::add_sp_e8(sp, e8);
                cpu.write_reg(Reg::HL, result);
                cpu.regs_i().flags = crate::register::Flags { zero: false, subtract: false, half_carry, carry };
                12
            }

            Operation::Rot { op, target } => {
                let value = target.read(cpu);
                let (result, carry) = match op {
                    RotOp::Rlc => alu::rlc(value),
                    RotOp::Rrc => alu::rrc(value),
                    RotOp::Rl => alu::rl(value, cpu.regs().flags.carry),
                    RotOp::Rr => alu::rr(value, cpu.regs().flags.carry),
                    RotOp::Sla => alu::sla(value),
                    RotOp::Sra => alu::sra(value),
                    RotOp::Srl => alu::srl(value),
                    RotOp::Swap => (alu::swap(value), false),
                };
                target.write(cpu, result);
                cpu.regs_i().flags = crate::register::Flags {
                    zero: result == 0,
                    subtract: false,
                    half_carry: false,
                    carry,
                };
                target.cycles(8, 16)
            }

            Operation::Bit { bit, target } => {
                let value = target.read(cpu);
                let set = value & (1 << bit) != 0;
                let mut flags = cpu.regs().flags;
                flags.zero = !set;
                flags.subtract = false;
                flags.half_carry = true;
                cpu.regs_i().flags = flags;
                target.cycles(8, 12)
            }

            Operation::Res { bit, target } => {
                let value = target.read(cpu);
                target.write(cpu, value & !(1 << bit));
                target.cycles(8, 16)
            }

            Operation::Set { bit, target } => {
                let value = target.read(cpu);
                target.write(cpu, value | (1 << bit));
                target.cycles(8, 16)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Access, ArrayDevice, MemoryDevice};
    use crate::util::new_shared_mut;

    fn bus_with(program: &[u8]) -> MemoryBus {
        let mut bus = MemoryBus::new();
        let mut data = vec![0u8; 0x8000];
        data[..program.len()].copy_from_slice(program);
        bus.push_device(0x0000..=0x7fff, MemoryDevice::Array(ArrayDevice::new(0x0000, new_shared_mut(data), Access::Both)), false);
        bus
    }

    #[test]
    fn test_decode_bitfield_table_round_trips_every_register_alu_form() {
        // ADD A,B = 0x80 -> x=2,y=0(Add),z=0(B)
        let bus = bus_with(&[0x80]);
        let (op, len) = fetch(0x0000, &bus);
        assert_eq!(len, 1);
        match op {
            Operation::Alu { op: AluOp::Add, operand: Target8::Reg(Reg::B) } => {}
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_cb_bit_instruction() {
        // BIT 7,H = CB 0x7C -> x=1,y=7,z=4(H)
        let bus = bus_with(&[0xcb, 0x7c]);
        let (op, len) = fetch(0x0000, &bus);
        assert_eq!(len, 2);
        match op {
            Operation::Bit { bit: 7, target: Target8::Reg(Reg::H) } => {}
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_every_documented_invalid_opcode() {
        let invalid = [0xd3u8, 0xdb, 0xdd, 0xe3, 0xe4, 0xeb, 0xec, 0xed, 0xf4, 0xfc, 0xfd];
        for byte in invalid {
            let bus = bus_with(&[byte]);
            let (op, _) = fetch(0x0000, &bus);
            assert!(matches!(op, Operation::Invalid(b) if b == byte), "0x{:02x} should decode as invalid", byte);
        }
    }

    #[test]
    fn test_jr_offset_is_relative_to_the_byte_after_the_instruction() {
        // JR -2 from 0x0010 lands back on itself.
        let mut bus = MemoryBus::new();
        let mut data = vec![0u8; 0x8000];
        data[0x10] = 0x18;
        data[0x11] = 0xfe; // -2
        bus.push_device(0x0000..=0x7fff, MemoryDevice::Array(ArrayDevice::new(0x0000, new_shared_mut(data), Access::Both)), false);
        let (op, len) = fetch(0x0010, &bus);
        assert_eq!(len, 2);
        match op {
            Operation::JrUnconditional { offset } => assert_eq!(offset, -2),
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_sub_a_a_produces_zero_with_half_and_full_carry_clear() {
        use crate::event::DebugHooks;
        let bus = bus_with(&[0x90]); // SUB A,B
        let mut cpu = Cpu::new(bus, new_shared_mut(DebugHooks::new()));
        cpu.write_reg(Reg::A, 0x10);
        cpu.write_reg(Reg::B, 0x10);
        let cycles = cpu.step();
        assert_eq!(cycles, 4);
        assert_eq!(cpu.read_reg(Reg::A), 0);
        assert!(cpu.regs().flags.zero);
        assert!(!cpu.regs().flags.half_carry);
        assert!(!cpu.regs().flags.carry);
    }

    #[test]
    fn test_bit_instruction_on_memhl_costs_twelve_cycles_and_preserves_value() {
        use crate::event::DebugHooks;
        let mut bus = MemoryBus::new();
        let mut data = vec![0u8; 0x8000];
        data[0] = 0xcb;
        data[1] = 0x46; // BIT 0,[HL]
        bus.push_device(0x0000..=0x7fff, MemoryDevice::Array(ArrayDevice::new(0x0000, new_shared_mut(data), Access::Both)), false);
        bus.push_device(0xc000..=0xdfff, MemoryDevice::Array(ArrayDevice::new(0xc000, new_shared_mut(vec![0x01u8; 0x2000]), Access::Both)), false);
        let mut cpu = Cpu::new(bus, new_shared_mut(DebugHooks::new()));
        cpu.write_reg(Reg::HL, 0xc000);
        let cycles = cpu.step();
        assert_eq!(cycles, 12);
        assert!(!cpu.regs().flags.zero);
        assert_eq!(cpu.read8(0xc000), 0x01);
    }
}
