use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::cartridge::{Cartridge, Mirroring};
use super::error::CartridgeError;

const PRG_RAM_SIZE: usize = 8 * 1024;

pub fn mapper_name(mapper_id: u16) -> &'static str {
    match mapper_id {
        0 => "NROM",
        1 => "MMC1",
        2 => "UxROM",
        3 => "CNROM",
        4 => "MMC3",
        7 => "AxROM",
        66 => "GxROM",
        _ => "Unsupported",
    }
}

/// Cartridge-side memories shared by every board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CartMemory {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    prg_ram: Vec<u8>,
    mirroring: Mirroring,
}

impl CartMemory {
    fn prg_bank_count(&self, bank_size: usize) -> usize {
        (self.prg_rom.len() / bank_size).max(1)
    }

    fn chr_bank_count(&self, bank_size: usize) -> usize {
        (self.chr.len() / bank_size).max(1)
    }

    fn prg_index(&self, bank: usize, bank_size: usize, offset: usize) -> usize {
        let bank = bank % self.prg_bank_count(bank_size);
        (bank * bank_size + (offset % bank_size)) % self.prg_rom.len()
    }

    fn chr_index(&self, bank: usize, bank_size: usize, offset: usize) -> usize {
        let bank = bank % self.chr_bank_count(bank_size);
        (bank * bank_size + (offset % bank_size)) % self.chr.len()
    }

    fn read_prg(&self, bank: usize, bank_size: usize, offset: usize) -> u8 {
        self.prg_rom[self.prg_index(bank, bank_size, offset)]
    }

    fn read_chr(&self, bank: usize, bank_size: usize, offset: usize) -> u8 {
        self.chr[self.chr_index(bank, bank_size, offset)]
    }

    fn write_chr(&mut self, bank: usize, bank_size: usize, offset: usize, value: u8) {
        if self.chr_is_ram {
            let idx = self.chr_index(bank, bank_size, offset);
            self.chr[idx] = value;
        }
    }

    fn read_prg_ram(&self, addr: u16) -> u8 {
        self.prg_ram[(addr as usize - 0x6000) % self.prg_ram.len()]
    }

    fn write_prg_ram(&mut self, addr: u16, value: u8) {
        let idx = (addr as usize - 0x6000) % self.prg_ram.len();
        self.prg_ram[idx] = value;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Mmc1 {
    shift_register: u8,
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
    cpu_cycle: u64,
    last_write_cycle: Option<u64>,
}

impl Mmc1 {
    fn new() -> Self {
        Self {
            shift_register: 0x10,
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
            cpu_cycle: 0,
            last_write_cycle: None,
        }
    }

    fn write_shift_register(&mut self, addr: u16, value: u8) {
        // The serial port drops a write on the cycle right after another one,
        // so the second write of a read-modify-write never reaches it.
        let back_to_back = self.last_write_cycle == Some(self.cpu_cycle.wrapping_sub(1));
        self.last_write_cycle = Some(self.cpu_cycle);
        if back_to_back {
            return;
        }

        if (value & 0x80) != 0 {
            self.shift_register = 0x10;
            self.control |= 0x0C;
            return;
        }

        let commit = (self.shift_register & 0x01) != 0;
        self.shift_register >>= 1;
        self.shift_register |= (value & 0x01) << 4;

        if commit {
            let data = self.shift_register;
            match addr {
                0x8000..=0x9FFF => self.control = data,
                0xA000..=0xBFFF => self.chr_bank0 = data,
                0xC000..=0xDFFF => self.chr_bank1 = data,
                _ => self.prg_bank = data,
            }
            self.shift_register = 0x10;
        }
    }

    fn prg_ram_enabled(&self) -> bool {
        (self.prg_bank & 0x10) == 0
    }

    fn prg_read(&self, mem: &CartMemory, addr: u16) -> u8 {
        let bank = (self.prg_bank & 0x0F) as usize;
        let offset = addr as usize & 0x3FFF;
        match (self.control >> 2) & 0x03 {
            0 | 1 => mem.read_prg(bank >> 1, 0x8000, addr as usize - 0x8000),
            2 => {
                if addr < 0xC000 {
                    mem.read_prg(0, 0x4000, offset)
                } else {
                    mem.read_prg(bank, 0x4000, offset)
                }
            }
            _ => {
                if addr < 0xC000 {
                    mem.read_prg(bank, 0x4000, offset)
                } else {
                    let last = mem.prg_bank_count(0x4000) - 1;
                    mem.read_prg(last, 0x4000, offset)
                }
            }
        }
    }

    fn chr_bank(&self, addr: u16) -> (usize, usize) {
        if (self.control & 0x10) == 0 {
            ((self.chr_bank0 as usize) >> 1, 0x2000)
        } else if addr < 0x1000 {
            (self.chr_bank0 as usize, 0x1000)
        } else {
            (self.chr_bank1 as usize, 0x1000)
        }
    }

    fn mirroring(&self) -> Mirroring {
        match self.control & 0x03 {
            0 => Mirroring::OneScreenLower,
            1 => Mirroring::OneScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Mmc3 {
    bank_select: u8,
    registers: [u8; 8],
    horizontal: bool,
    prg_ram_enabled: bool,
    prg_ram_write_protect: bool,
    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_pending: bool,
}

impl Mmc3 {
    fn new(mirroring: Mirroring) -> Self {
        Self {
            bank_select: 0,
            registers: [0, 2, 4, 5, 6, 7, 0, 1],
            horizontal: mirroring == Mirroring::Horizontal,
            prg_ram_enabled: true,
            prg_ram_write_protect: false,
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_pending: false,
        }
    }

    fn write_register(&mut self, addr: u16, value: u8) {
        let even = (addr & 0x01) == 0;
        match (addr & 0xE000, even) {
            (0x8000, true) => self.bank_select = value,
            (0x8000, false) => self.registers[(self.bank_select & 0x07) as usize] = value,
            (0xA000, true) => self.horizontal = (value & 0x01) != 0,
            (0xA000, false) => {
                self.prg_ram_enabled = (value & 0x80) != 0;
                self.prg_ram_write_protect = (value & 0x40) != 0;
            }
            (0xC000, true) => self.irq_latch = value,
            (0xC000, false) => {
                self.irq_counter = 0;
                self.irq_reload = true;
            }
            (0xE000, true) => {
                self.irq_enabled = false;
                self.irq_pending = false;
            }
            _ => self.irq_enabled = true,
        }
    }

    fn prg_read(&self, mem: &CartMemory, addr: u16) -> u8 {
        let second_last = mem.prg_bank_count(0x2000).saturating_sub(2);
        let last = mem.prg_bank_count(0x2000) - 1;
        let swap = (self.bank_select & 0x40) != 0;
        let r6 = (self.registers[6] & 0x3F) as usize;
        let r7 = (self.registers[7] & 0x3F) as usize;
        let bank = match (addr - 0x8000) / 0x2000 {
            0 => {
                if swap {
                    second_last
                } else {
                    r6
                }
            }
            1 => r7,
            2 => {
                if swap {
                    r6
                } else {
                    second_last
                }
            }
            _ => last,
        };
        mem.read_prg(bank, 0x2000, addr as usize & 0x1FFF)
    }

    fn chr_bank_1k(&self, addr: u16) -> usize {
        let addr = if (self.bank_select & 0x80) != 0 {
            addr ^ 0x1000
        } else {
            addr
        };
        let slot = (addr as usize & 0x1FFF) / 0x0400;
        match slot {
            0 => (self.registers[0] & 0xFE) as usize,
            1 => (self.registers[0] | 0x01) as usize,
            2 => (self.registers[1] & 0xFE) as usize,
            3 => (self.registers[1] | 0x01) as usize,
            n => self.registers[n - 2] as usize,
        }
    }

    fn clock_scanline(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }
        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_pending = true;
        }
    }
}

/// Bank-register state per supported board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Board {
    Nrom,
    Mmc1(Mmc1),
    Uxrom { prg_bank: u8 },
    Cnrom { chr_bank: u8 },
    Mmc3(Mmc3),
    Axrom { prg_bank: u8, upper_screen: bool },
    Gxrom { prg_bank: u8, chr_bank: u8 },
}

/// A cartridge board: the images plus whatever bank switching it performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapper {
    mapper_id: u16,
    mem: CartMemory,
    board: Board,
}

impl Mapper {
    pub fn new(cart: Cartridge) -> Result<Self> {
        let mapper_id = cart.header.mapper_id;
        let board = match mapper_id {
            0 => Board::Nrom,
            1 => Board::Mmc1(Mmc1::new()),
            2 => Board::Uxrom { prg_bank: 0 },
            3 => Board::Cnrom { chr_bank: 0 },
            4 => Board::Mmc3(Mmc3::new(cart.header.mirroring)),
            7 => Board::Axrom {
                prg_bank: 0,
                upper_screen: false,
            },
            66 => Board::Gxrom {
                prg_bank: 0,
                chr_bank: 0,
            },
            id => return Err(CartridgeError::UnsupportedMapper(id).into()),
        };

        let chr_is_ram = cart.chr_is_ram();
        let chr = if chr_is_ram {
            vec![0; 8 * 1024]
        } else {
            cart.chr_rom
        };

        Ok(Self {
            mapper_id,
            mem: CartMemory {
                prg_rom: cart.prg_rom,
                chr,
                chr_is_ram,
                prg_ram: vec![0; PRG_RAM_SIZE],
                mirroring: cart.header.mirroring,
            },
            board,
        })
    }

    pub fn mapper_id(&self) -> u16 {
        self.mapper_id
    }

    pub fn name(&self) -> &'static str {
        mapper_name(self.mapper_id)
    }

    /// CPU read in cartridge space ($4020-$FFFF). `None` means nothing on the
    /// board drives the data bus.
    pub fn prg_read(&self, addr: u16) -> Option<u8> {
        match addr {
            0x6000..=0x7FFF => match &self.board {
                Board::Mmc1(mmc1) if !mmc1.prg_ram_enabled() => None,
                Board::Mmc3(mmc3) if !mmc3.prg_ram_enabled => None,
                _ => Some(self.mem.read_prg_ram(addr)),
            },
            0x8000..=0xFFFF => {
                let offset = addr as usize - 0x8000;
                let value = match &self.board {
                    Board::Nrom => self.mem.read_prg(0, 0x8000, offset),
                    Board::Mmc1(mmc1) => mmc1.prg_read(&self.mem, addr),
                    Board::Uxrom { prg_bank } => {
                        if addr < 0xC000 {
                            self.mem.read_prg(*prg_bank as usize, 0x4000, offset)
                        } else {
                            let last = self.mem.prg_bank_count(0x4000) - 1;
                            self.mem.read_prg(last, 0x4000, offset)
                        }
                    }
                    Board::Mmc3(mmc3) => mmc3.prg_read(&self.mem, addr),
                    Board::Axrom { prg_bank, .. } | Board::Gxrom { prg_bank, .. } => {
                        self.mem.read_prg(*prg_bank as usize, 0x8000, offset)
                    }
                    Board::Cnrom { .. } => self.mem.read_prg(0, 0x8000, offset),
                };
                Some(value)
            }
            _ => None,
        }
    }

    /// CPU write in cartridge space. Writes into the ROM window are bank
    /// register writes and never touch the images.
    pub fn prg_write(&mut self, addr: u16, value: u8) {
        if (0x6000..=0x7FFF).contains(&addr) {
            let writable = match &self.board {
                Board::Mmc1(mmc1) => mmc1.prg_ram_enabled(),
                Board::Mmc3(mmc3) => mmc3.prg_ram_enabled && !mmc3.prg_ram_write_protect,
                _ => true,
            };
            if writable {
                self.mem.write_prg_ram(addr, value);
            }
            return;
        }
        if addr < 0x8000 {
            return;
        }

        match &mut self.board {
            Board::Nrom => {}
            Board::Mmc1(mmc1) => mmc1.write_shift_register(addr, value),
            Board::Uxrom { prg_bank } => *prg_bank = value,
            Board::Cnrom { chr_bank } => *chr_bank = value & 0x03,
            Board::Mmc3(mmc3) => mmc3.write_register(addr, value),
            Board::Axrom {
                prg_bank,
                upper_screen,
            } => {
                *prg_bank = value & 0x07;
                *upper_screen = (value & 0x10) != 0;
            }
            Board::Gxrom { prg_bank, chr_bank } => {
                *prg_bank = (value >> 4) & 0x03;
                *chr_bank = value & 0x03;
            }
        }
    }

    fn chr_bank(&self, addr: u16) -> (usize, usize) {
        match &self.board {
            Board::Nrom | Board::Uxrom { .. } | Board::Axrom { .. } => (0, 0x2000),
            Board::Mmc1(mmc1) => mmc1.chr_bank(addr),
            Board::Cnrom { chr_bank } | Board::Gxrom { chr_bank, .. } => {
                (*chr_bank as usize, 0x2000)
            }
            Board::Mmc3(mmc3) => (mmc3.chr_bank_1k(addr), 0x0400),
        }
    }

    /// PPU read in pattern space ($0000-$1FFF).
    pub fn chr_read(&self, addr: u16) -> u8 {
        let (bank, size) = self.chr_bank(addr);
        self.mem.read_chr(bank, size, addr as usize)
    }

    /// PPU write in pattern space; ignored unless the board has CHR-RAM.
    pub fn chr_write(&mut self, addr: u16, value: u8) {
        let (bank, size) = self.chr_bank(addr);
        self.mem.write_chr(bank, size, addr as usize, value);
    }

    pub fn mirroring(&self) -> Mirroring {
        if self.mem.mirroring == Mirroring::FourScreen {
            return Mirroring::FourScreen;
        }
        match &self.board {
            Board::Mmc1(mmc1) => mmc1.mirroring(),
            Board::Mmc3(mmc3) => {
                if mmc3.horizontal {
                    Mirroring::Horizontal
                } else {
                    Mirroring::Vertical
                }
            }
            Board::Axrom { upper_screen, .. } => {
                if *upper_screen {
                    Mirroring::OneScreenUpper
                } else {
                    Mirroring::OneScreenLower
                }
            }
            _ => self.mem.mirroring,
        }
    }

    /// Called once per CPU cycle, before that cycle's bus access.
    pub fn tick_cpu_cycle(&mut self) {
        if let Board::Mmc1(mmc1) = &mut self.board {
            mmc1.cpu_cycle = mmc1.cpu_cycle.wrapping_add(1);
        }
    }

    /// One PPU A12 rise per rendered scanline, as seen by scanline counters.
    pub fn clock_scanline(&mut self) {
        if let Board::Mmc3(mmc3) = &mut self.board {
            mmc3.clock_scanline();
        }
    }

    pub fn irq_pending(&self) -> bool {
        matches!(&self.board, Board::Mmc3(mmc3) if mmc3.irq_pending)
    }

    pub fn debug_state(&self) -> String {
        match &self.board {
            Board::Nrom => self.name().to_string(),
            Board::Mmc1(m) => format!(
                "MMC1 control=${:02X} chr0=${:02X} chr1=${:02X} prg=${:02X}",
                m.control, m.chr_bank0, m.chr_bank1, m.prg_bank
            ),
            Board::Uxrom { prg_bank } => format!("UxROM prg=${prg_bank:02X}"),
            Board::Cnrom { chr_bank } => format!("CNROM chr=${chr_bank:02X}"),
            Board::Mmc3(m) => format!(
                "MMC3 select=${:02X} regs={:02X?} irq latch={} counter={} enabled={} pending={}",
                m.bank_select, m.registers, m.irq_latch, m.irq_counter, m.irq_enabled, m.irq_pending
            ),
            Board::Axrom {
                prg_bank,
                upper_screen,
            } => format!("AxROM prg=${prg_bank:02X} upper={upper_screen}"),
            Board::Gxrom { prg_bank, chr_bank } => {
                format!("GxROM prg=${prg_bank:02X} chr=${chr_bank:02X}")
            }
        }
    }
}
