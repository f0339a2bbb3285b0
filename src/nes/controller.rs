use serde::{Deserialize, Serialize};

pub const BUTTON_A: u8 = 0x01;
pub const BUTTON_B: u8 = 0x02;
pub const BUTTON_SELECT: u8 = 0x04;
pub const BUTTON_START: u8 = 0x08;
pub const BUTTON_UP: u8 = 0x10;
pub const BUTTON_DOWN: u8 = 0x20;
pub const BUTTON_LEFT: u8 = 0x40;
pub const BUTTON_RIGHT: u8 = 0x80;

/// Standard joypad: an 8-bit parallel-in serial-out register read A first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    buttons: u8,
    shift: u8,
    strobe: bool,
}

impl Controller {
    pub fn buttons(&self) -> u8 {
        self.buttons
    }

    pub fn set_buttons(&mut self, buttons: u8) {
        self.buttons = buttons;
        if self.strobe {
            self.shift = self.buttons;
        }
    }

    pub fn write_strobe(&mut self, value: u8) {
        self.strobe = (value & 0x01) != 0;
        if self.strobe {
            self.shift = self.buttons;
        }
    }

    /// Next serial bit. While strobe is high this keeps returning A; once all
    /// eight buttons are out the register reads back 1s.
    pub fn read(&mut self) -> u8 {
        if self.strobe {
            return self.buttons & BUTTON_A;
        }

        let bit = self.shift & 0x01;
        self.shift = (self.shift >> 1) | 0x80;
        bit
    }

    pub fn peek(&self) -> u8 {
        if self.strobe {
            self.buttons & BUTTON_A
        } else {
            self.shift & 0x01
        }
    }
}
