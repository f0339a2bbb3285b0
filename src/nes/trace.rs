use super::bus::Bus;
use super::cpu::Cpu;
use super::opcodes::{Mode, OPCODES, Op};

/// One nestest-format line for the instruction at the CPU's PC, built from
/// side-effect-free peeks.
pub fn trace_line(cpu: &Cpu, bus: &Bus) -> String {
    let regs = cpu.registers();
    let pc = regs.pc;
    let code = bus.peek(pc);
    let entry = OPCODES[code as usize];
    let len = entry.mode.operand_len();

    let op1 = bus.peek(pc.wrapping_add(1));
    let op2 = bus.peek(pc.wrapping_add(2));
    let bytes = match len {
        0 => format!("{code:02X}"),
        1 => format!("{code:02X} {op1:02X}"),
        _ => format!("{code:02X} {op1:02X} {op2:02X}"),
    };

    let marker = if entry.official { ' ' } else { '*' };
    let disasm = format!(
        "{} {}",
        entry.op.mnemonic(),
        operand_text(cpu, bus, entry.op, entry.mode, op1, op2)
    );

    format!(
        "{pc:04X}  {bytes:<9}{marker}{:<32}A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} PPU:{:>3},{:>3} CYC:{}",
        disasm.trim_end(),
        regs.a,
        regs.x,
        regs.y,
        regs.p,
        regs.sp,
        bus.ppu.scanline(),
        bus.ppu.dot(),
        bus.cpu_cycles()
    )
}

fn operand_text(cpu: &Cpu, bus: &Bus, op: Op, mode: Mode, op1: u8, op2: u8) -> String {
    let regs = cpu.registers();
    let word = ((op2 as u16) << 8) | op1 as u16;
    let peek_zp_u16 = |zp: u8| {
        let lo = bus.peek(zp as u16) as u16;
        let hi = bus.peek(zp.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    };

    match mode {
        Mode::Implied => String::new(),
        Mode::Accumulator => "A".to_string(),
        Mode::Immediate => format!("#${op1:02X}"),
        Mode::ZeroPage => format!("${op1:02X} = {:02X}", bus.peek(op1 as u16)),
        Mode::ZeroPageX | Mode::ZeroPageY => {
            let (name, index) = if mode == Mode::ZeroPageX {
                ('X', regs.x)
            } else {
                ('Y', regs.y)
            };
            let addr = op1.wrapping_add(index) as u16;
            format!("${op1:02X},{name} @ {addr:02X} = {:02X}", bus.peek(addr))
        }
        Mode::Absolute => {
            if matches!(op, Op::Jmp | Op::Jsr) {
                format!("${word:04X}")
            } else {
                format!("${word:04X} = {:02X}", bus.peek(word))
            }
        }
        Mode::AbsoluteX | Mode::AbsoluteY => {
            let (name, index) = if mode == Mode::AbsoluteX {
                ('X', regs.x)
            } else {
                ('Y', regs.y)
            };
            let addr = word.wrapping_add(index as u16);
            format!("${word:04X},{name} @ {addr:04X} = {:02X}", bus.peek(addr))
        }
        Mode::Indirect => {
            let lo = bus.peek(word) as u16;
            let hi = bus.peek((word & 0xFF00) | (word.wrapping_add(1) & 0x00FF)) as u16;
            format!("(${word:04X}) = {:04X}", (hi << 8) | lo)
        }
        Mode::IndirectX => {
            let ptr = op1.wrapping_add(regs.x);
            let addr = peek_zp_u16(ptr);
            format!(
                "(${op1:02X},X) @ {ptr:02X} = {addr:04X} = {:02X}",
                bus.peek(addr)
            )
        }
        Mode::IndirectY => {
            let base = peek_zp_u16(op1);
            let addr = base.wrapping_add(regs.y as u16);
            format!(
                "(${op1:02X}),Y = {base:04X} @ {addr:04X} = {:02X}",
                bus.peek(addr)
            )
        }
        Mode::Relative => {
            let target = regs
                .pc
                .wrapping_add(2)
                .wrapping_add(op1 as i8 as u16);
            format!("${target:04X}")
        }
    }
}
