use serde::{Deserialize, Serialize};

use super::opcodes::{Mode, OPCODES, Op, Opcode};

pub const FLAG_CARRY: u8 = 0x01;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_INTERRUPT: u8 = 0x04;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_UNUSED: u8 = 0x20;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_NEGATIVE: u8 = 0x80;

pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// The CPU's view of the address space. Every call is one bus cycle.
pub trait CpuBus {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interrupt {
    Nmi,
    Irq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuRegisters {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    pub pc: u16,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
    Rmw,
}

/// Effective address plus what the indexing stage saw.
struct Operand {
    addr: u16,
    base: u16,
    page_crossed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    pub(crate) a: u8,
    pub(crate) x: u8,
    pub(crate) y: u8,
    pub(crate) p: u8,
    pub(crate) sp: u8,
    pub(crate) pc: u16,

    nmi_pending: bool,
    irq_line: bool,
    jammed: bool,
    serviced: Option<Interrupt>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            p: FLAG_INTERRUPT | FLAG_UNUSED,
            sp: 0xFD,
            pc: 0,
            nmi_pending: false,
            irq_line: false,
            jammed: false,
            serviced: None,
        }
    }

    pub fn registers(&self) -> CpuRegisters {
        CpuRegisters {
            a: self.a,
            x: self.x,
            y: self.y,
            p: self.p,
            sp: self.sp,
            pc: self.pc,
        }
    }

    pub fn jammed(&self) -> bool {
        self.jammed
    }

    /// Latches an NMI edge; serviced at the next instruction boundary.
    pub fn request_nmi(&mut self) {
        if !self.jammed {
            self.nmi_pending = true;
        }
    }

    pub fn nmi_pending(&self) -> bool {
        self.nmi_pending
    }

    pub fn set_irq_line(&mut self, level: bool) {
        self.irq_line = level;
    }

    /// Interrupt entered by the most recent `step`, if any.
    pub fn last_serviced(&self) -> Option<Interrupt> {
        self.serviced
    }

    /// Reset sequence: SP=$FD, P=$24, PC from the reset vector. A, X and Y
    /// keep their values. Costs 7 cycles.
    pub fn reset(&mut self, bus: &mut impl CpuBus) -> u32 {
        self.sp = 0xFD;
        self.p = FLAG_INTERRUPT | FLAG_UNUSED;
        self.nmi_pending = false;
        self.irq_line = false;
        self.jammed = false;
        self.serviced = None;
        self.pc = self.read_u16(bus, RESET_VECTOR);
        7
    }

    /// Runs one instruction or interrupt entry and returns the cycles it took.
    pub fn step(&mut self, bus: &mut impl CpuBus) -> u32 {
        self.serviced = None;

        if self.jammed {
            return 1;
        }

        if self.nmi_pending {
            self.nmi_pending = false;
            self.interrupt(bus, NMI_VECTOR);
            self.serviced = Some(Interrupt::Nmi);
            return 7;
        }

        if self.irq_line && !self.get_flag(FLAG_INTERRUPT) {
            self.interrupt(bus, IRQ_VECTOR);
            self.serviced = Some(Interrupt::Irq);
            return 7;
        }

        let opcode_pc = self.pc;
        let code = self.fetch_byte(bus);
        let entry = OPCODES[code as usize];
        self.execute(bus, entry, opcode_pc)
    }

    fn interrupt(&mut self, bus: &mut impl CpuBus, vector: u16) {
        let _ = bus.read(self.pc);
        let _ = bus.read(self.pc);
        self.push_u16(bus, self.pc);
        self.push(bus, (self.p & !FLAG_BREAK) | FLAG_UNUSED);
        self.set_flag(FLAG_INTERRUPT, true);
        self.pc = self.read_u16(bus, vector);
    }

    fn execute(&mut self, bus: &mut impl CpuBus, entry: Opcode, opcode_pc: u16) -> u32 {
        let mut cycles = entry.cycles as u32;

        match entry.op {
            Op::Bpl => return self.branch(bus, !self.get_flag(FLAG_NEGATIVE)),
            Op::Bmi => return self.branch(bus, self.get_flag(FLAG_NEGATIVE)),
            Op::Bvc => return self.branch(bus, !self.get_flag(FLAG_OVERFLOW)),
            Op::Bvs => return self.branch(bus, self.get_flag(FLAG_OVERFLOW)),
            Op::Bcc => return self.branch(bus, !self.get_flag(FLAG_CARRY)),
            Op::Bcs => return self.branch(bus, self.get_flag(FLAG_CARRY)),
            Op::Bne => return self.branch(bus, !self.get_flag(FLAG_ZERO)),
            Op::Beq => return self.branch(bus, self.get_flag(FLAG_ZERO)),
            Op::Brk => {
                let _ = self.fetch_byte(bus);
                self.push_u16(bus, self.pc);
                self.push(bus, self.p | FLAG_BREAK | FLAG_UNUSED);
                self.set_flag(FLAG_INTERRUPT, true);
                self.pc = self.read_u16(bus, IRQ_VECTOR);
                return cycles;
            }
            Op::Jsr => {
                let lo = self.fetch_byte(bus) as u16;
                let _ = bus.read(0x0100 | self.sp as u16);
                self.push_u16(bus, self.pc);
                let hi = bus.read(self.pc) as u16;
                self.pc = (hi << 8) | lo;
                return cycles;
            }
            Op::Rts => {
                let _ = bus.read(self.pc);
                let _ = bus.read(0x0100 | self.sp as u16);
                let ret = self.pop_u16(bus);
                let _ = bus.read(ret);
                self.pc = ret.wrapping_add(1);
                return cycles;
            }
            Op::Rti => {
                let _ = bus.read(self.pc);
                let _ = bus.read(0x0100 | self.sp as u16);
                self.p = (self.pop(bus) & !FLAG_BREAK) | FLAG_UNUSED;
                self.pc = self.pop_u16(bus);
                return cycles;
            }
            Op::Pha => {
                let _ = bus.read(self.pc);
                self.push(bus, self.a);
                return cycles;
            }
            Op::Php => {
                let _ = bus.read(self.pc);
                self.push(bus, self.p | FLAG_BREAK | FLAG_UNUSED);
                return cycles;
            }
            Op::Pla => {
                let _ = bus.read(self.pc);
                let _ = bus.read(0x0100 | self.sp as u16);
                self.a = self.pop(bus);
                self.update_zn(self.a);
                return cycles;
            }
            Op::Plp => {
                let _ = bus.read(self.pc);
                let _ = bus.read(0x0100 | self.sp as u16);
                self.p = (self.pop(bus) & !FLAG_BREAK) | FLAG_UNUSED;
                return cycles;
            }
            Op::Jmp => {
                let target = self.fetch_word(bus);
                self.pc = if entry.mode == Mode::Indirect {
                    self.read_u16_bug(bus, target)
                } else {
                    target
                };
                return cycles;
            }
            Op::Jam => {
                let _ = bus.read(self.pc);
                self.pc = opcode_pc;
                self.jammed = true;
                return cycles;
            }
            _ => {}
        }

        if matches!(entry.mode, Mode::Implied | Mode::Accumulator) {
            let _ = bus.read(self.pc);
            self.execute_implied(entry.op);
            return cycles;
        }

        let access = if entry.op.is_rmw() {
            Access::Rmw
        } else if entry.op.is_store() {
            Access::Write
        } else {
            Access::Read
        };
        let operand = self.resolve_operand(bus, entry.mode, access);

        match access {
            Access::Read => {
                if operand.page_crossed {
                    cycles += 1;
                }
                let value = bus.read(operand.addr);
                self.execute_read(entry.op, value);
            }
            Access::Write => self.execute_store(bus, entry.op, &operand),
            Access::Rmw => {
                let value = bus.read(operand.addr);
                bus.write(operand.addr, value);
                let out = self.execute_rmw(entry.op, value);
                bus.write(operand.addr, out);
            }
        }

        cycles
    }

    /// Fetches operand bytes and performs the indexing dummy read: always for
    /// writes and read-modify-writes, only on a page cross for reads.
    fn resolve_operand(&mut self, bus: &mut impl CpuBus, mode: Mode, access: Access) -> Operand {
        let (addr, base, indexed) = match mode {
            Mode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                (addr, addr, false)
            }
            Mode::ZeroPage => {
                let addr = self.fetch_byte(bus) as u16;
                (addr, addr, false)
            }
            Mode::ZeroPageX | Mode::ZeroPageY => {
                let base = self.fetch_byte(bus);
                let _ = bus.read(base as u16);
                let index = if mode == Mode::ZeroPageX {
                    self.x
                } else {
                    self.y
                };
                (base.wrapping_add(index) as u16, base as u16, false)
            }
            Mode::Absolute => {
                let addr = self.fetch_word(bus);
                (addr, addr, false)
            }
            Mode::AbsoluteX | Mode::AbsoluteY => {
                let base = self.fetch_word(bus);
                let index = if mode == Mode::AbsoluteX {
                    self.x
                } else {
                    self.y
                };
                (base.wrapping_add(index as u16), base, true)
            }
            Mode::IndirectX => {
                let zp = self.fetch_byte(bus);
                let _ = bus.read(zp as u16);
                let addr = self.read_zp_u16(bus, zp.wrapping_add(self.x));
                (addr, addr, false)
            }
            Mode::IndirectY => {
                let zp = self.fetch_byte(bus);
                let base = self.read_zp_u16(bus, zp);
                (base.wrapping_add(self.y as u16), base, true)
            }
            Mode::Implied | Mode::Accumulator | Mode::Relative | Mode::Indirect => {
                (self.pc, self.pc, false)
            }
        };

        let page_crossed = indexed && (base & 0xFF00) != (addr & 0xFF00);
        if indexed && (page_crossed || access != Access::Read) {
            let dummy_addr = (base & 0xFF00) | (addr & 0x00FF);
            let _ = bus.read(dummy_addr);
        }

        Operand {
            addr,
            base,
            page_crossed,
        }
    }

    fn execute_implied(&mut self, op: Op) {
        match op {
            Op::Asl => self.a = self.asl(self.a),
            Op::Lsr => self.a = self.lsr(self.a),
            Op::Rol => self.a = self.rol(self.a),
            Op::Ror => self.a = self.ror(self.a),
            Op::Clc => self.set_flag(FLAG_CARRY, false),
            Op::Cld => self.set_flag(FLAG_DECIMAL, false),
            Op::Cli => self.set_flag(FLAG_INTERRUPT, false),
            Op::Clv => self.set_flag(FLAG_OVERFLOW, false),
            Op::Sec => self.set_flag(FLAG_CARRY, true),
            Op::Sed => self.set_flag(FLAG_DECIMAL, true),
            Op::Sei => self.set_flag(FLAG_INTERRUPT, true),
            Op::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.update_zn(self.x);
            }
            Op::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.update_zn(self.y);
            }
            Op::Inx => {
                self.x = self.x.wrapping_add(1);
                self.update_zn(self.x);
            }
            Op::Iny => {
                self.y = self.y.wrapping_add(1);
                self.update_zn(self.y);
            }
            Op::Tax => {
                self.x = self.a;
                self.update_zn(self.x);
            }
            Op::Tay => {
                self.y = self.a;
                self.update_zn(self.y);
            }
            Op::Tsx => {
                self.x = self.sp;
                self.update_zn(self.x);
            }
            Op::Txa => {
                self.a = self.x;
                self.update_zn(self.a);
            }
            Op::Txs => self.sp = self.x,
            Op::Tya => {
                self.a = self.y;
                self.update_zn(self.a);
            }
            _ => {}
        }
    }

    fn execute_read(&mut self, op: Op, value: u8) {
        match op {
            Op::Adc => self.adc(value),
            Op::Sbc => self.sbc(value),
            Op::And => {
                self.a &= value;
                self.update_zn(self.a);
            }
            Op::Ora => {
                self.a |= value;
                self.update_zn(self.a);
            }
            Op::Eor => {
                self.a ^= value;
                self.update_zn(self.a);
            }
            Op::Bit => {
                self.set_flag(FLAG_ZERO, (self.a & value) == 0);
                self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
                self.set_flag(FLAG_OVERFLOW, (value & 0x40) != 0);
            }
            Op::Cmp => self.compare(self.a, value),
            Op::Cpx => self.compare(self.x, value),
            Op::Cpy => self.compare(self.y, value),
            Op::Lda => {
                self.a = value;
                self.update_zn(self.a);
            }
            Op::Ldx => {
                self.x = value;
                self.update_zn(self.x);
            }
            Op::Ldy => {
                self.y = value;
                self.update_zn(self.y);
            }
            Op::Lax => {
                self.a = value;
                self.x = value;
                self.update_zn(value);
            }
            Op::Las => {
                let value = value & self.sp;
                self.a = value;
                self.x = value;
                self.sp = value;
                self.update_zn(value);
            }
            Op::Anc => {
                self.a &= value;
                self.update_zn(self.a);
                self.set_flag(FLAG_CARRY, (self.a & 0x80) != 0);
            }
            Op::Alr => {
                self.a &= value;
                self.a = self.lsr(self.a);
            }
            Op::Arr => {
                self.a &= value;
                let carry_in = if self.get_flag(FLAG_CARRY) { 0x80 } else { 0 };
                self.a = (self.a >> 1) | carry_in;
                self.update_zn(self.a);
                self.set_flag(FLAG_CARRY, (self.a & 0x40) != 0);
                self.set_flag(
                    FLAG_OVERFLOW,
                    (((self.a >> 6) & 0x01) ^ ((self.a >> 5) & 0x01)) != 0,
                );
            }
            // ANE and LXA are unstable on hardware; $EE is the usual 2A03 magic.
            Op::Ane => {
                self.a = (self.a | 0xEE) & self.x & value;
                self.update_zn(self.a);
            }
            Op::Lxa => {
                self.a = (self.a | 0xEE) & value;
                self.x = self.a;
                self.update_zn(self.a);
            }
            Op::Axs => {
                let in_ax = self.a & self.x;
                self.set_flag(FLAG_CARRY, in_ax >= value);
                self.x = in_ax.wrapping_sub(value);
                self.update_zn(self.x);
            }
            _ => {}
        }
    }

    fn execute_store(&mut self, bus: &mut impl CpuBus, op: Op, operand: &Operand) {
        let high_plus_one = ((operand.base >> 8) as u8).wrapping_add(1);
        let value = match op {
            Op::Sta => self.a,
            Op::Stx => self.x,
            Op::Sty => self.y,
            Op::Sax => self.a & self.x,
            Op::Sha => self.a & self.x & high_plus_one,
            Op::Shx => self.x & high_plus_one,
            Op::Shy => self.y & high_plus_one,
            Op::Tas => {
                self.sp = self.a & self.x;
                self.sp & high_plus_one
            }
            _ => return,
        };

        // On a page cross the SH* family writes its value into the high byte.
        let unstable = matches!(op, Op::Sha | Op::Shx | Op::Shy | Op::Tas);
        let addr = if unstable && operand.page_crossed {
            ((value as u16) << 8) | (operand.addr & 0x00FF)
        } else {
            operand.addr
        };
        bus.write(addr, value);
    }

    fn execute_rmw(&mut self, op: Op, value: u8) -> u8 {
        match op {
            Op::Asl => self.asl(value),
            Op::Lsr => self.lsr(value),
            Op::Rol => self.rol(value),
            Op::Ror => self.ror(value),
            Op::Inc => {
                let out = value.wrapping_add(1);
                self.update_zn(out);
                out
            }
            Op::Dec => {
                let out = value.wrapping_sub(1);
                self.update_zn(out);
                out
            }
            Op::Slo => {
                let shifted = self.asl(value);
                self.a |= shifted;
                self.update_zn(self.a);
                shifted
            }
            Op::Rla => {
                let shifted = self.rol(value);
                self.a &= shifted;
                self.update_zn(self.a);
                shifted
            }
            Op::Sre => {
                let shifted = self.lsr(value);
                self.a ^= shifted;
                self.update_zn(self.a);
                shifted
            }
            Op::Rra => {
                let shifted = self.ror(value);
                self.adc(shifted);
                shifted
            }
            Op::Dcp => {
                let decremented = value.wrapping_sub(1);
                self.compare(self.a, decremented);
                decremented
            }
            Op::Isc => {
                let incremented = value.wrapping_add(1);
                self.sbc(incremented);
                incremented
            }
            _ => value,
        }
    }

    fn branch(&mut self, bus: &mut impl CpuBus, condition: bool) -> u32 {
        let offset = self.fetch_byte(bus) as i8;
        if !condition {
            return 2;
        }

        let old_pc = self.pc;
        let _ = bus.read(old_pc);
        let new_pc = old_pc.wrapping_add(offset as u16);
        self.pc = new_pc;
        if (old_pc & 0xFF00) != (new_pc & 0xFF00) {
            let dummy_addr = (old_pc & 0xFF00) | (new_pc & 0x00FF);
            let _ = bus.read(dummy_addr);
            4
        } else {
            3
        }
    }

    fn fetch_byte(&mut self, bus: &mut impl CpuBus) -> u8 {
        let byte = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        byte
    }

    fn fetch_word(&mut self, bus: &mut impl CpuBus) -> u16 {
        let lo = self.fetch_byte(bus) as u16;
        let hi = self.fetch_byte(bus) as u16;
        (hi << 8) | lo
    }

    fn read_u16(&mut self, bus: &mut impl CpuBus, addr: u16) -> u16 {
        let lo = bus.read(addr) as u16;
        let hi = bus.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// JMP ($xxFF) fetches the high byte from $xx00.
    fn read_u16_bug(&mut self, bus: &mut impl CpuBus, addr: u16) -> u16 {
        let lo = bus.read(addr) as u16;
        let hi_addr = (addr & 0xFF00) | (addr.wrapping_add(1) & 0x00FF);
        let hi = bus.read(hi_addr) as u16;
        (hi << 8) | lo
    }

    fn read_zp_u16(&mut self, bus: &mut impl CpuBus, addr: u8) -> u16 {
        let lo = bus.read(addr as u16) as u16;
        let hi = bus.read(addr.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    fn push(&mut self, bus: &mut impl CpuBus, value: u8) {
        bus.write(0x0100 | self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pop(&mut self, bus: &mut impl CpuBus) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read(0x0100 | self.sp as u16)
    }

    fn push_u16(&mut self, bus: &mut impl CpuBus, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    fn pop_u16(&mut self, bus: &mut impl CpuBus) -> u16 {
        let lo = self.pop(bus) as u16;
        let hi = self.pop(bus) as u16;
        (hi << 8) | lo
    }

    pub(crate) fn get_flag(&self, flag: u8) -> bool {
        (self.p & flag) != 0
    }

    fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
        self.p |= FLAG_UNUSED;
    }

    fn update_zn(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, value == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(FLAG_CARRY, register >= value);
        self.update_zn(result);
    }

    /// Binary only: the 2A03 has no decimal adder.
    fn adc(&mut self, value: u8) {
        let carry_in = self.get_flag(FLAG_CARRY) as u16;
        let result = self.a as u16 + value as u16 + carry_in;
        let out = result as u8;

        self.set_flag(FLAG_CARRY, result > 0xFF);
        self.set_flag(FLAG_OVERFLOW, ((self.a ^ out) & (value ^ out) & 0x80) != 0);

        self.a = out;
        self.update_zn(self.a);
    }

    fn sbc(&mut self, value: u8) {
        self.adc(value ^ 0xFF);
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = value << 1;
        self.update_zn(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = value >> 1;
        self.update_zn(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = self.get_flag(FLAG_CARRY) as u8;
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = (value << 1) | carry_in;
        self.update_zn(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = if self.get_flag(FLAG_CARRY) { 0x80 } else { 0 };
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = (value >> 1) | carry_in;
        self.update_zn(result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatBus {
        mem: Vec<u8>,
        accesses: u32,
        writes: Vec<(u16, u8)>,
    }

    impl FlatBus {
        fn new() -> Self {
            Self {
                mem: vec![0; 0x10000],
                accesses: 0,
                writes: Vec::new(),
            }
        }

        fn load(&mut self, addr: u16, bytes: &[u8]) {
            let start = addr as usize;
            self.mem[start..start + bytes.len()].copy_from_slice(bytes);
        }
    }

    impl CpuBus for FlatBus {
        fn read(&mut self, addr: u16) -> u8 {
            self.accesses += 1;
            self.mem[addr as usize]
        }

        fn write(&mut self, addr: u16, value: u8) {
            self.accesses += 1;
            self.writes.push((addr, value));
            self.mem[addr as usize] = value;
        }
    }

    fn cpu_at(pc: u16) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.pc = pc;
        cpu
    }

    #[test]
    fn adc_immediate_golden() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x69, 0x20]);
        let mut cpu = cpu_at(0x0200);
        cpu.a = 0x10;

        let cycles = cpu.step(&mut bus);

        assert_eq!(cycles, 2);
        assert_eq!(cpu.a, 0x30);
        assert_eq!(
            cpu.p & (FLAG_CARRY | FLAG_ZERO | FLAG_OVERFLOW | FLAG_NEGATIVE),
            0
        );
        assert_eq!(cpu.pc, 0x0202);
    }

    #[test]
    fn golden_instruction_table() {
        struct Case {
            program: &'static [u8],
            a: u8,
            x: u8,
            y: u8,
            expect_a: u8,
            expect_p: u8,
            cycles: u32,
        }

        #[rustfmt::skip]
        let cases = [
            // ADC overflow into negative
            Case { program: &[0x69, 0x50], a: 0x50, x: 0, y: 0, expect_a: 0xA0, expect_p: 0xE4, cycles: 2 },
            // SBC with borrow (carry clear)
            Case { program: &[0xE9, 0x01], a: 0x00, x: 0, y: 0, expect_a: 0xFE, expect_p: 0xA4, cycles: 2 },
            // LDA abs,X crossing a page
            Case { program: &[0xBD, 0xFF, 0x02], a: 0, x: 0x01, y: 0, expect_a: 0x00, expect_p: 0x26, cycles: 5 },
            // LDA abs,X same page
            Case { program: &[0xBD, 0x00, 0x02], a: 0, x: 0x00, y: 0, expect_a: 0xBD, expect_p: 0xA4, cycles: 4 },
            // LDA (zp),Y crossing a page
            Case { program: &[0xB1, 0x80], a: 0, x: 0, y: 0xFF, expect_a: 0x00, expect_p: 0x26, cycles: 6 },
            // CMP equal sets Z and C
            Case { program: &[0xC9, 0x42], a: 0x42, x: 0, y: 0, expect_a: 0x42, expect_p: 0x27, cycles: 2 },
            // ASL A shifts into carry
            Case { program: &[0x0A], a: 0x81, x: 0, y: 0, expect_a: 0x02, expect_p: 0x25, cycles: 2 },
            // LAX zp
            Case { program: &[0xA7, 0x80], a: 0, x: 0, y: 0, expect_a: 0x10, expect_p: 0x24, cycles: 3 },
        ];

        for (i, case) in cases.iter().enumerate() {
            let mut bus = FlatBus::new();
            bus.load(0x0200, case.program);
            bus.mem[0x0080] = 0x10;
            bus.mem[0x0081] = 0x03;
            let mut cpu = cpu_at(0x0200);
            cpu.a = case.a;
            cpu.x = case.x;
            cpu.y = case.y;

            let cycles = cpu.step(&mut bus);

            assert_eq!(cpu.a, case.expect_a, "case {i}: A");
            assert_eq!(cpu.p, case.expect_p, "case {i}: P");
            assert_eq!(cycles, case.cycles, "case {i}: cycles");
        }
    }

    #[test]
    fn undocumented_golden_table() {
        struct Case {
            program: &'static [u8],
            mem: &'static [(u16, u8)],
            a: u8,
            x: u8,
            y: u8,
            p: u8,
            expect_a: u8,
            expect_x: u8,
            expect_p: u8,
            expect_mem: &'static [(u16, u8)],
            cycles: u32,
        }

        #[rustfmt::skip]
        let cases = [
            // ARR: C from bit 6, V from bit 6 xor bit 5
            Case { program: &[0x6B, 0xFF], mem: &[], a: 0xC0, x: 0, y: 0, p: 0x24, expect_a: 0x60, expect_x: 0, expect_p: 0x25, expect_mem: &[], cycles: 2 },
            // ARR rotates carry into bit 7
            Case { program: &[0x6B, 0xFF], mem: &[], a: 0x40, x: 0, y: 0, p: 0x25, expect_a: 0xA0, expect_x: 0, expect_p: 0xE4, expect_mem: &[], cycles: 2 },
            // ANC copies N into C
            Case { program: &[0x0B, 0x80], mem: &[], a: 0xFF, x: 0, y: 0, p: 0x24, expect_a: 0x80, expect_x: 0, expect_p: 0xA5, expect_mem: &[], cycles: 2 },
            // ALR: AND then LSR
            Case { program: &[0x4B, 0x03], mem: &[], a: 0xFF, x: 0, y: 0, p: 0x24, expect_a: 0x01, expect_x: 0, expect_p: 0x25, expect_mem: &[], cycles: 2 },
            // AXS without borrow
            Case { program: &[0xCB, 0x02], mem: &[], a: 0x0F, x: 0xF3, y: 0, p: 0x24, expect_a: 0x0F, expect_x: 0x01, expect_p: 0x25, expect_mem: &[], cycles: 2 },
            // AXS with borrow ignores the incoming carry
            Case { program: &[0xCB, 0x05], mem: &[], a: 0x0F, x: 0x03, y: 0, p: 0x25, expect_a: 0x0F, expect_x: 0xFE, expect_p: 0xA4, expect_mem: &[], cycles: 2 },
            // SBC $EB behaves like $E9
            Case { program: &[0xEB, 0x03], mem: &[], a: 0x05, x: 0, y: 0, p: 0x25, expect_a: 0x02, expect_x: 0, expect_p: 0x25, expect_mem: &[], cycles: 2 },
            // SLO zp
            Case { program: &[0x07, 0x80], mem: &[(0x0080, 0x81)], a: 0x02, x: 0, y: 0, p: 0x24, expect_a: 0x02, expect_x: 0, expect_p: 0x25, expect_mem: &[(0x0080, 0x02)], cycles: 5 },
            // RLA zp
            Case { program: &[0x27, 0x80], mem: &[(0x0080, 0x80)], a: 0xFF, x: 0, y: 0, p: 0x25, expect_a: 0x01, expect_x: 0, expect_p: 0x25, expect_mem: &[(0x0080, 0x01)], cycles: 5 },
            // SRE zp
            Case { program: &[0x47, 0x80], mem: &[(0x0080, 0x03)], a: 0x01, x: 0, y: 0, p: 0x24, expect_a: 0x00, expect_x: 0, expect_p: 0x27, expect_mem: &[(0x0080, 0x01)], cycles: 5 },
            // RRA zp: the rotated-out bit is the ADC carry in
            Case { program: &[0x67, 0x80], mem: &[(0x0080, 0x03)], a: 0x7F, x: 0, y: 0, p: 0x24, expect_a: 0x81, expect_x: 0, expect_p: 0xE4, expect_mem: &[(0x0080, 0x01)], cycles: 5 },
            // ISC zp
            Case { program: &[0xE7, 0x80], mem: &[(0x0080, 0x00)], a: 0x05, x: 0, y: 0, p: 0x25, expect_a: 0x04, expect_x: 0, expect_p: 0x25, expect_mem: &[(0x0080, 0x01)], cycles: 5 },
            // LAX abs,Y crossing a page
            Case { program: &[0xBF, 0xFF, 0x02], mem: &[(0x0300, 0x5A)], a: 0, x: 0, y: 0x01, p: 0x24, expect_a: 0x5A, expect_x: 0x5A, expect_p: 0x24, expect_mem: &[], cycles: 5 },
            // LAX (zp),Y crossing a page
            Case { program: &[0xB3, 0x80], mem: &[(0x0080, 0x10), (0x0081, 0x03), (0x040F, 0x99)], a: 0, x: 0, y: 0xFF, p: 0x24, expect_a: 0x99, expect_x: 0x99, expect_p: 0xA4, expect_mem: &[], cycles: 6 },
            // LAS abs,Y crossing a page, ANDed with SP=$FD
            Case { program: &[0xBB, 0xFF, 0x02], mem: &[(0x0300, 0xF3)], a: 0, x: 0, y: 0x01, p: 0x24, expect_a: 0xF1, expect_x: 0xF1, expect_p: 0xA4, expect_mem: &[], cycles: 5 },
        ];

        for (i, case) in cases.iter().enumerate() {
            let mut bus = FlatBus::new();
            bus.load(0x0200, case.program);
            for &(addr, value) in case.mem {
                bus.mem[addr as usize] = value;
            }
            let mut cpu = cpu_at(0x0200);
            cpu.a = case.a;
            cpu.x = case.x;
            cpu.y = case.y;
            cpu.p = case.p;

            let cycles = cpu.step(&mut bus);

            assert_eq!(cpu.a, case.expect_a, "case {i}: A");
            assert_eq!(cpu.x, case.expect_x, "case {i}: X");
            assert_eq!(cpu.p, case.expect_p, "case {i}: P");
            assert_eq!(cycles, case.cycles, "case {i}: cycles");
            assert_eq!(bus.accesses, cycles, "case {i}: bus accesses");
            for &(addr, value) in case.expect_mem {
                assert_eq!(bus.mem[addr as usize], value, "case {i}: ${addr:04X}");
            }
        }
    }

    #[test]
    fn bus_traffic_matches_cycle_count_for_every_opcode() {
        for code in 0..=255u8 {
            let mut bus = FlatBus::new();
            bus.mem[0x0200] = code;
            let mut cpu = cpu_at(0x0200);

            let cycles = cpu.step(&mut bus);
            assert_eq!(bus.accesses, cycles, "opcode ${code:02X}");
        }
    }

    #[test]
    fn bus_traffic_matches_cycle_count_with_page_crossing_operands() {
        for code in 0..=255u8 {
            let mut bus = FlatBus::new();
            // abs $1280, zp $80 pointing at $1280, branch offset -128
            bus.load(0x0200, &[code, 0x80, 0x12]);
            bus.mem[0x0080] = 0x80;
            bus.mem[0x0081] = 0x12;
            let mut cpu = cpu_at(0x0200);
            cpu.x = 0xFF;
            cpu.y = 0xFF;

            let cycles = cpu.step(&mut bus);
            assert_eq!(bus.accesses, cycles, "opcode ${code:02X}");
        }
    }

    #[test]
    fn page_cross_penalty_applies_to_reads_only() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x9D, 0xFF, 0x02]);
        let mut cpu = cpu_at(0x0200);
        cpu.x = 1;
        assert_eq!(cpu.step(&mut bus), 5);

        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x9D, 0x00, 0x02]);
        let mut cpu = cpu_at(0x0200);
        cpu.x = 1;
        assert_eq!(cpu.step(&mut bus), 5);
    }

    #[test]
    fn branch_timing() {
        // not taken
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0xF0, 0x10]);
        let mut cpu = cpu_at(0x0200);
        assert_eq!(cpu.step(&mut bus), 2);
        assert_eq!(cpu.pc, 0x0202);

        // taken, same page
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0xD0, 0x10]);
        let mut cpu = cpu_at(0x0200);
        assert_eq!(cpu.step(&mut bus), 3);
        assert_eq!(cpu.pc, 0x0212);

        // taken backwards across a page
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0xD0, 0xFC]);
        let mut cpu = cpu_at(0x0200);
        assert_eq!(cpu.step(&mut bus), 4);
        assert_eq!(cpu.pc, 0x01FE);
    }

    #[test]
    fn jmp_indirect_wraps_within_page() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x6C, 0xFF, 0x10]);
        bus.mem[0x10FF] = 0x34;
        bus.mem[0x1000] = 0x12;
        bus.mem[0x1100] = 0x99;
        let mut cpu = cpu_at(0x0200);

        assert_eq!(cpu.step(&mut bus), 5);
        assert_eq!(cpu.pc, 0x1234);
    }

    #[test]
    fn zero_page_indexing_wraps() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0xB5, 0xF0]);
        bus.mem[0x0010] = 0x77;
        bus.mem[0x0110] = 0x11;
        let mut cpu = cpu_at(0x0200);
        cpu.x = 0x20;

        cpu.step(&mut bus);
        assert_eq!(cpu.a, 0x77);
    }

    #[test]
    fn indexed_indirect_pointer_wraps_in_zero_page() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0xA1, 0xFE]);
        bus.mem[0x00FF] = 0x00;
        bus.mem[0x0000] = 0x04;
        bus.mem[0x0400] = 0x5A;
        let mut cpu = cpu_at(0x0200);
        cpu.x = 0x01;

        cpu.step(&mut bus);
        assert_eq!(cpu.a, 0x5A);
    }

    #[test]
    fn stack_wraps_within_page_one() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x48, 0x68]);
        let mut cpu = cpu_at(0x0200);
        cpu.sp = 0x00;
        cpu.a = 0xC3;

        cpu.step(&mut bus);
        assert_eq!(bus.mem[0x0100], 0xC3);
        assert_eq!(cpu.sp, 0xFF);

        cpu.a = 0;
        cpu.step(&mut bus);
        assert_eq!(cpu.a, 0xC3);
        assert_eq!(cpu.sp, 0x00);
    }

    #[test]
    fn jsr_and_rts_round_trip() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x20, 0x00, 0x03]);
        bus.load(0x0300, &[0x60]);
        let mut cpu = cpu_at(0x0200);

        assert_eq!(cpu.step(&mut bus), 6);
        assert_eq!(cpu.pc, 0x0300);
        assert_eq!(bus.mem[0x01FD], 0x02);
        assert_eq!(bus.mem[0x01FC], 0x02);

        assert_eq!(cpu.step(&mut bus), 6);
        assert_eq!(cpu.pc, 0x0203);
    }

    #[test]
    fn rmw_writes_old_value_then_new() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0xEE, 0x00, 0x04]);
        bus.mem[0x0400] = 0x41;
        let mut cpu = cpu_at(0x0200);

        assert_eq!(cpu.step(&mut bus), 6);
        assert_eq!(bus.writes, vec![(0x0400, 0x41), (0x0400, 0x42)]);
    }

    #[test]
    fn decimal_flag_does_not_change_adc() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0xF8, 0x69, 0x01]);
        let mut cpu = cpu_at(0x0200);
        cpu.a = 0x09;

        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert!(cpu.get_flag(FLAG_DECIMAL));
        assert_eq!(cpu.a, 0x0A);
    }

    #[test]
    fn nmi_pushes_state_without_break_flag() {
        let mut bus = FlatBus::new();
        bus.mem[0xFFFA] = 0x00;
        bus.mem[0xFFFB] = 0x90;
        let mut cpu = cpu_at(0x0234);
        cpu.p = FLAG_UNUSED | FLAG_CARRY;
        cpu.request_nmi();

        assert_eq!(cpu.step(&mut bus), 7);
        assert_eq!(cpu.pc, 0x9000);
        assert_eq!(cpu.last_serviced(), Some(Interrupt::Nmi));
        assert_eq!(bus.mem[0x01FD], 0x02);
        assert_eq!(bus.mem[0x01FC], 0x34);
        assert_eq!(bus.mem[0x01FB], FLAG_UNUSED | FLAG_CARRY);
        assert!(cpu.get_flag(FLAG_INTERRUPT));
        assert!(!cpu.nmi_pending());
    }

    #[test]
    fn irq_waits_for_interrupt_flag() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0xEA, 0x58, 0xEA]);
        bus.mem[0xFFFE] = 0x00;
        bus.mem[0xFFFF] = 0xA0;
        let mut cpu = cpu_at(0x0200);
        cpu.set_irq_line(true);

        assert_eq!(cpu.step(&mut bus), 2);
        assert_eq!(cpu.last_serviced(), None);
        cpu.step(&mut bus);
        assert_eq!(cpu.step(&mut bus), 7);
        assert_eq!(cpu.last_serviced(), Some(Interrupt::Irq));
        assert_eq!(cpu.pc, 0xA000);
    }

    #[test]
    fn brk_pushes_break_flag_and_skips_padding() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x00, 0xFF]);
        bus.mem[0xFFFE] = 0x00;
        bus.mem[0xFFFF] = 0xB0;
        let mut cpu = cpu_at(0x0200);
        cpu.p = FLAG_UNUSED;

        assert_eq!(cpu.step(&mut bus), 7);
        assert_eq!(cpu.pc, 0xB000);
        assert_eq!(bus.mem[0x01FC], 0x02);
        assert_eq!(bus.mem[0x01FB], FLAG_UNUSED | FLAG_BREAK);
    }

    #[test]
    fn plp_ignores_break_and_sets_unused() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x28]);
        bus.mem[0x01FE] = 0xFF & !FLAG_UNUSED;
        let mut cpu = cpu_at(0x0200);

        cpu.step(&mut bus);
        assert_eq!(cpu.p, 0xFF & !FLAG_BREAK);
    }

    #[test]
    fn jam_locks_until_reset() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x02]);
        bus.mem[0xFFFC] = 0x00;
        bus.mem[0xFFFD] = 0x80;
        let mut cpu = cpu_at(0x0200);

        cpu.step(&mut bus);
        assert!(cpu.jammed());
        assert_eq!(cpu.pc, 0x0200);

        let before = bus.accesses;
        cpu.request_nmi();
        assert_eq!(cpu.step(&mut bus), 1);
        assert_eq!(cpu.step(&mut bus), 1);
        assert_eq!(bus.accesses, before);
        assert_eq!(cpu.pc, 0x0200);

        assert_eq!(cpu.reset(&mut bus), 7);
        assert!(!cpu.jammed());
        assert_eq!(cpu.pc, 0x8000);
        assert_eq!(cpu.sp, 0xFD);
        assert_eq!(cpu.p, 0x24);
    }

    #[test]
    fn sh_family_masks_with_high_byte_plus_one() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0x9E, 0x00, 0x04]);
        let mut cpu = cpu_at(0x0200);
        cpu.x = 0xFF;
        cpu.y = 0x01;

        cpu.step(&mut bus);
        assert_eq!(bus.mem[0x0401], 0x05);
    }

    #[test]
    fn dcp_and_isc_combine_rmw_with_alu() {
        let mut bus = FlatBus::new();
        bus.load(0x0200, &[0xC7, 0x10, 0xE7, 0x11]);
        bus.mem[0x0010] = 0x43;
        bus.mem[0x0011] = 0x00;
        let mut cpu = cpu_at(0x0200);
        cpu.a = 0x42;

        assert_eq!(cpu.step(&mut bus), 5);
        assert_eq!(bus.mem[0x0010], 0x42);
        assert!(cpu.get_flag(FLAG_ZERO));
        assert!(cpu.get_flag(FLAG_CARRY));

        cpu.step(&mut bus);
        assert_eq!(bus.mem[0x0011], 0x01);
        assert_eq!(cpu.a, 0x41);
    }
}
