/// Operation half of an opcode descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    // Undocumented.
    Alr,
    Anc,
    Ane,
    Arr,
    Axs,
    Dcp,
    Isc,
    Jam,
    Las,
    Lax,
    Lxa,
    Rla,
    Rra,
    Sax,
    Sha,
    Shx,
    Shy,
    Slo,
    Sre,
    Tas,
}

impl Op {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Adc => "ADC",
            Op::And => "AND",
            Op::Asl => "ASL",
            Op::Bcc => "BCC",
            Op::Bcs => "BCS",
            Op::Beq => "BEQ",
            Op::Bit => "BIT",
            Op::Bmi => "BMI",
            Op::Bne => "BNE",
            Op::Bpl => "BPL",
            Op::Brk => "BRK",
            Op::Bvc => "BVC",
            Op::Bvs => "BVS",
            Op::Clc => "CLC",
            Op::Cld => "CLD",
            Op::Cli => "CLI",
            Op::Clv => "CLV",
            Op::Cmp => "CMP",
            Op::Cpx => "CPX",
            Op::Cpy => "CPY",
            Op::Dec => "DEC",
            Op::Dex => "DEX",
            Op::Dey => "DEY",
            Op::Eor => "EOR",
            Op::Inc => "INC",
            Op::Inx => "INX",
            Op::Iny => "INY",
            Op::Jmp => "JMP",
            Op::Jsr => "JSR",
            Op::Lda => "LDA",
            Op::Ldx => "LDX",
            Op::Ldy => "LDY",
            Op::Lsr => "LSR",
            Op::Nop => "NOP",
            Op::Ora => "ORA",
            Op::Pha => "PHA",
            Op::Php => "PHP",
            Op::Pla => "PLA",
            Op::Plp => "PLP",
            Op::Rol => "ROL",
            Op::Ror => "ROR",
            Op::Rti => "RTI",
            Op::Rts => "RTS",
            Op::Sbc => "SBC",
            Op::Sec => "SEC",
            Op::Sed => "SED",
            Op::Sei => "SEI",
            Op::Sta => "STA",
            Op::Stx => "STX",
            Op::Sty => "STY",
            Op::Tax => "TAX",
            Op::Tay => "TAY",
            Op::Tsx => "TSX",
            Op::Txa => "TXA",
            Op::Txs => "TXS",
            Op::Tya => "TYA",
            Op::Alr => "ALR",
            Op::Anc => "ANC",
            Op::Ane => "ANE",
            Op::Arr => "ARR",
            Op::Axs => "AXS",
            Op::Dcp => "DCP",
            Op::Isc => "ISB",
            Op::Jam => "JAM",
            Op::Las => "LAS",
            Op::Lax => "LAX",
            Op::Lxa => "LXA",
            Op::Rla => "RLA",
            Op::Rra => "RRA",
            Op::Sax => "SAX",
            Op::Sha => "SHA",
            Op::Shx => "SHX",
            Op::Shy => "SHY",
            Op::Slo => "SLO",
            Op::Sre => "SRE",
            Op::Tas => "TAS",
        }
    }

    /// Read-modify-write operations write memory twice.
    pub fn is_rmw(self) -> bool {
        matches!(
            self,
            Op::Asl
                | Op::Lsr
                | Op::Rol
                | Op::Ror
                | Op::Inc
                | Op::Dec
                | Op::Slo
                | Op::Rla
                | Op::Sre
                | Op::Rra
                | Op::Dcp
                | Op::Isc
        )
    }

    /// Operations that only write their effective address.
    pub fn is_store(self) -> bool {
        matches!(
            self,
            Op::Sta | Op::Stx | Op::Sty | Op::Sax | Op::Sha | Op::Shx | Op::Shy | Op::Tas
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
}

impl Mode {
    /// Operand bytes following the opcode.
    pub fn operand_len(self) -> u16 {
        match self {
            Mode::Implied | Mode::Accumulator => 0,
            Mode::Immediate
            | Mode::ZeroPage
            | Mode::ZeroPageX
            | Mode::ZeroPageY
            | Mode::IndirectX
            | Mode::IndirectY
            | Mode::Relative => 1,
            Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY | Mode::Indirect => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub op: Op,
    pub mode: Mode,
    /// Base cycle count before page-cross and branch penalties.
    pub cycles: u8,
    pub official: bool,
}

const fn o(op: Op, mode: Mode, cycles: u8) -> Opcode {
    Opcode {
        op,
        mode,
        cycles,
        official: true,
    }
}

const fn u(op: Op, mode: Mode, cycles: u8) -> Opcode {
    Opcode {
        op,
        mode,
        cycles,
        official: false,
    }
}

use Mode::{
    Absolute as ABS, AbsoluteX as ABX, AbsoluteY as ABY, Accumulator as ACC, Immediate as IMM,
    Implied as IMP, Indirect as IND, IndirectX as IZX, IndirectY as IZY, Relative as REL,
    ZeroPage as ZP, ZeroPageX as ZPX, ZeroPageY as ZPY,
};
use Op::*;

#[rustfmt::skip]
pub static OPCODES: [Opcode; 256] = [
    // 0x00
    o(Brk, IMP, 7), o(Ora, IZX, 6), u(Jam, IMP, 2), u(Slo, IZX, 8),
    u(Nop, ZP, 3),  o(Ora, ZP, 3),  o(Asl, ZP, 5),  u(Slo, ZP, 5),
    o(Php, IMP, 3), o(Ora, IMM, 2), o(Asl, ACC, 2), u(Anc, IMM, 2),
    u(Nop, ABS, 4), o(Ora, ABS, 4), o(Asl, ABS, 6), u(Slo, ABS, 6),
    // 0x10
    o(Bpl, REL, 2), o(Ora, IZY, 5), u(Jam, IMP, 2), u(Slo, IZY, 8),
    u(Nop, ZPX, 4), o(Ora, ZPX, 4), o(Asl, ZPX, 6), u(Slo, ZPX, 6),
    o(Clc, IMP, 2), o(Ora, ABY, 4), u(Nop, IMP, 2), u(Slo, ABY, 7),
    u(Nop, ABX, 4), o(Ora, ABX, 4), o(Asl, ABX, 7), u(Slo, ABX, 7),
    // 0x20
    o(Jsr, ABS, 6), o(And, IZX, 6), u(Jam, IMP, 2), u(Rla, IZX, 8),
    o(Bit, ZP, 3),  o(And, ZP, 3),  o(Rol, ZP, 5),  u(Rla, ZP, 5),
    o(Plp, IMP, 4), o(And, IMM, 2), o(Rol, ACC, 2), u(Anc, IMM, 2),
    o(Bit, ABS, 4), o(And, ABS, 4), o(Rol, ABS, 6), u(Rla, ABS, 6),
    // 0x30
    o(Bmi, REL, 2), o(And, IZY, 5), u(Jam, IMP, 2), u(Rla, IZY, 8),
    u(Nop, ZPX, 4), o(And, ZPX, 4), o(Rol, ZPX, 6), u(Rla, ZPX, 6),
    o(Sec, IMP, 2), o(And, ABY, 4), u(Nop, IMP, 2), u(Rla, ABY, 7),
    u(Nop, ABX, 4), o(And, ABX, 4), o(Rol, ABX, 7), u(Rla, ABX, 7),
    // 0x40
    o(Rti, IMP, 6), o(Eor, IZX, 6), u(Jam, IMP, 2), u(Sre, IZX, 8),
    u(Nop, ZP, 3),  o(Eor, ZP, 3),  o(Lsr, ZP, 5),  u(Sre, ZP, 5),
    o(Pha, IMP, 3), o(Eor, IMM, 2), o(Lsr, ACC, 2), u(Alr, IMM, 2),
    o(Jmp, ABS, 3), o(Eor, ABS, 4), o(Lsr, ABS, 6), u(Sre, ABS, 6),
    // 0x50
    o(Bvc, REL, 2), o(Eor, IZY, 5), u(Jam, IMP, 2), u(Sre, IZY, 8),
    u(Nop, ZPX, 4), o(Eor, ZPX, 4), o(Lsr, ZPX, 6), u(Sre, ZPX, 6),
    o(Cli, IMP, 2), o(Eor, ABY, 4), u(Nop, IMP, 2), u(Sre, ABY, 7),
    u(Nop, ABX, 4), o(Eor, ABX, 4), o(Lsr, ABX, 7), u(Sre, ABX, 7),
    // 0x60
    o(Rts, IMP, 6), o(Adc, IZX, 6), u(Jam, IMP, 2), u(Rra, IZX, 8),
    u(Nop, ZP, 3),  o(Adc, ZP, 3),  o(Ror, ZP, 5),  u(Rra, ZP, 5),
    o(Pla, IMP, 4), o(Adc, IMM, 2), o(Ror, ACC, 2), u(Arr, IMM, 2),
    o(Jmp, IND, 5), o(Adc, ABS, 4), o(Ror, ABS, 6), u(Rra, ABS, 6),
    // 0x70
    o(Bvs, REL, 2), o(Adc, IZY, 5), u(Jam, IMP, 2), u(Rra, IZY, 8),
    u(Nop, ZPX, 4), o(Adc, ZPX, 4), o(Ror, ZPX, 6), u(Rra, ZPX, 6),
    o(Sei, IMP, 2), o(Adc, ABY, 4), u(Nop, IMP, 2), u(Rra, ABY, 7),
    u(Nop, ABX, 4), o(Adc, ABX, 4), o(Ror, ABX, 7), u(Rra, ABX, 7),
    // 0x80
    u(Nop, IMM, 2), o(Sta, IZX, 6), u(Nop, IMM, 2), u(Sax, IZX, 6),
    o(Sty, ZP, 3),  o(Sta, ZP, 3),  o(Stx, ZP, 3),  u(Sax, ZP, 3),
    o(Dey, IMP, 2), u(Nop, IMM, 2), o(Txa, IMP, 2), u(Ane, IMM, 2),
    o(Sty, ABS, 4), o(Sta, ABS, 4), o(Stx, ABS, 4), u(Sax, ABS, 4),
    // 0x90
    o(Bcc, REL, 2), o(Sta, IZY, 6), u(Jam, IMP, 2), u(Sha, IZY, 6),
    o(Sty, ZPX, 4), o(Sta, ZPX, 4), o(Stx, ZPY, 4), u(Sax, ZPY, 4),
    o(Tya, IMP, 2), o(Sta, ABY, 5), o(Txs, IMP, 2), u(Tas, ABY, 5),
    u(Shy, ABX, 5), o(Sta, ABX, 5), u(Shx, ABY, 5), u(Sha, ABY, 5),
    // 0xA0
    o(Ldy, IMM, 2), o(Lda, IZX, 6), o(Ldx, IMM, 2), u(Lax, IZX, 6),
    o(Ldy, ZP, 3),  o(Lda, ZP, 3),  o(Ldx, ZP, 3),  u(Lax, ZP, 3),
    o(Tay, IMP, 2), o(Lda, IMM, 2), o(Tax, IMP, 2), u(Lxa, IMM, 2),
    o(Ldy, ABS, 4), o(Lda, ABS, 4), o(Ldx, ABS, 4), u(Lax, ABS, 4),
    // 0xB0
    o(Bcs, REL, 2), o(Lda, IZY, 5), u(Jam, IMP, 2), u(Lax, IZY, 5),
    o(Ldy, ZPX, 4), o(Lda, ZPX, 4), o(Ldx, ZPY, 4), u(Lax, ZPY, 4),
    o(Clv, IMP, 2), o(Lda, ABY, 4), o(Tsx, IMP, 2), u(Las, ABY, 4),
    o(Ldy, ABX, 4), o(Lda, ABX, 4), o(Ldx, ABY, 4), u(Lax, ABY, 4),
    // 0xC0
    o(Cpy, IMM, 2), o(Cmp, IZX, 6), u(Nop, IMM, 2), u(Dcp, IZX, 8),
    o(Cpy, ZP, 3),  o(Cmp, ZP, 3),  o(Dec, ZP, 5),  u(Dcp, ZP, 5),
    o(Iny, IMP, 2), o(Cmp, IMM, 2), o(Dex, IMP, 2), u(Axs, IMM, 2),
    o(Cpy, ABS, 4), o(Cmp, ABS, 4), o(Dec, ABS, 6), u(Dcp, ABS, 6),
    // 0xD0
    o(Bne, REL, 2), o(Cmp, IZY, 5), u(Jam, IMP, 2), u(Dcp, IZY, 8),
    u(Nop, ZPX, 4), o(Cmp, ZPX, 4), o(Dec, ZPX, 6), u(Dcp, ZPX, 6),
    o(Cld, IMP, 2), o(Cmp, ABY, 4), u(Nop, IMP, 2), u(Dcp, ABY, 7),
    u(Nop, ABX, 4), o(Cmp, ABX, 4), o(Dec, ABX, 7), u(Dcp, ABX, 7),
    // 0xE0
    o(Cpx, IMM, 2), o(Sbc, IZX, 6), u(Nop, IMM, 2), u(Isc, IZX, 8),
    o(Cpx, ZP, 3),  o(Sbc, ZP, 3),  o(Inc, ZP, 5),  u(Isc, ZP, 5),
    o(Inx, IMP, 2), o(Sbc, IMM, 2), o(Nop, IMP, 2), u(Sbc, IMM, 2),
    o(Cpx, ABS, 4), o(Sbc, ABS, 4), o(Inc, ABS, 6), u(Isc, ABS, 6),
    // 0xF0
    o(Beq, REL, 2), o(Sbc, IZY, 5), u(Jam, IMP, 2), u(Isc, IZY, 8),
    u(Nop, ZPX, 4), o(Sbc, ZPX, 4), o(Inc, ZPX, 6), u(Isc, ZPX, 6),
    o(Sed, IMP, 2), o(Sbc, ABY, 4), u(Nop, IMP, 2), u(Isc, ABY, 7),
    u(Nop, ABX, 4), o(Sbc, ABX, 4), o(Inc, ABX, 7), u(Isc, ABX, 7),
];
