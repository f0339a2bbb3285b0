use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::error::CartridgeError;

pub const PRG_BANK_SIZE: usize = 16 * 1024;
pub const CHR_BANK_SIZE: usize = 8 * 1024;
const INES_HEADER_SIZE: usize = 16;
const TRAINER_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    OneScreenLower,
    OneScreenUpper,
    FourScreen,
}

/// Parsed cartridge header as handed over by whatever read the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartridgeHeader {
    pub mapper_id: u16,
    pub prg_rom_size: usize,
    pub chr_rom_size: usize,
    pub mirroring: Mirroring,
    pub has_battery: bool,
}

#[derive(Debug, Clone)]
pub struct Cartridge {
    pub header: CartridgeHeader,
    pub prg_rom: Vec<u8>,
    pub chr_rom: Vec<u8>,
}

impl Cartridge {
    /// Validates the images against the header. A CHR size of zero means the
    /// board carries CHR-RAM instead of ROM.
    pub fn new(header: CartridgeHeader, prg_rom: Vec<u8>, chr_rom: Vec<u8>) -> Result<Self> {
        if prg_rom.is_empty() {
            return Err(CartridgeError::InvalidImage("empty PRG ROM".to_string()).into());
        }
        if prg_rom.len() != header.prg_rom_size {
            return Err(CartridgeError::InvalidImage(format!(
                "header declares {} PRG bytes but image has {}",
                header.prg_rom_size,
                prg_rom.len()
            ))
            .into());
        }
        if prg_rom.len() % 0x2000 != 0 {
            return Err(CartridgeError::InvalidImage(format!(
                "PRG size {} is not a multiple of 8 KiB",
                prg_rom.len()
            ))
            .into());
        }
        if chr_rom.len() != header.chr_rom_size {
            return Err(CartridgeError::InvalidImage(format!(
                "header declares {} CHR bytes but image has {}",
                header.chr_rom_size,
                chr_rom.len()
            ))
            .into());
        }
        if chr_rom.len() % 0x0400 != 0 {
            return Err(CartridgeError::InvalidImage(format!(
                "CHR size {} is not a multiple of 1 KiB",
                chr_rom.len()
            ))
            .into());
        }

        Ok(Self {
            header,
            prg_rom,
            chr_rom,
        })
    }

    pub fn chr_is_ram(&self) -> bool {
        self.chr_rom.is_empty()
    }

    /// Reads an iNES 1.0 container. NES 2.0 extensions past the mapper high
    /// nibble are ignored.
    pub fn from_ines(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INES_HEADER_SIZE {
            return Err(
                CartridgeError::BadHeader("file shorter than the iNES header".to_string()).into(),
            );
        }
        if &bytes[0..4] != b"NES\x1A" {
            return Err(CartridgeError::BadHeader("missing NES<EOF> magic".to_string()).into());
        }

        let prg_units = bytes[4] as usize;
        let chr_units = bytes[5] as usize;
        let flags6 = bytes[6];
        let flags7 = bytes[7];

        if prg_units == 0 {
            return Err(CartridgeError::InvalidImage("no PRG ROM banks".to_string()).into());
        }

        let mapper_id = ((flags6 as u16) >> 4) | ((flags7 as u16) & 0xF0);
        let mirroring = if (flags6 & 0x08) != 0 {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let has_battery = (flags6 & 0x02) != 0;

        let mut cursor = INES_HEADER_SIZE;
        if (flags6 & 0x04) != 0 {
            cursor += TRAINER_SIZE;
        }

        let prg_rom_size = prg_units * PRG_BANK_SIZE;
        let chr_rom_size = chr_units * CHR_BANK_SIZE;
        if bytes.len() < cursor + prg_rom_size + chr_rom_size {
            return Err(CartridgeError::InvalidImage(format!(
                "file truncated: need {} bytes of PRG/CHR, found {}",
                prg_rom_size + chr_rom_size,
                bytes.len().saturating_sub(cursor)
            ))
            .into());
        }

        let prg_rom = bytes[cursor..cursor + prg_rom_size].to_vec();
        cursor += prg_rom_size;
        let chr_rom = bytes[cursor..cursor + chr_rom_size].to_vec();

        let header = CartridgeHeader {
            mapper_id,
            prg_rom_size,
            chr_rom_size,
            mirroring,
            has_battery,
        };
        Self::new(header, prg_rom, chr_rom)
    }
}
