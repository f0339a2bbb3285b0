use serde::{Deserialize, Serialize};

use super::cartridge::Mirroring;
use super::mapper::Mapper;

pub const FRAME_WIDTH: usize = 256;
pub const FRAME_HEIGHT: usize = 240;
pub const DOTS_PER_SCANLINE: u16 = 341;
pub const SCANLINES_PER_FRAME: u16 = 262;

const VBLANK_SCANLINE: u16 = 241;
const PRE_RENDER_SCANLINE: u16 = 261;

const CTRL_NMI_ENABLE: u8 = 0x80;
const CTRL_VRAM_INC_32: u8 = 0x04;
const CTRL_SPRITE_TABLE: u8 = 0x08;
const CTRL_BG_TABLE: u8 = 0x10;
const CTRL_SPRITE_SIZE_16: u8 = 0x20;

const MASK_GRAYSCALE: u8 = 0x01;
const MASK_SHOW_BG_LEFT: u8 = 0x02;
const MASK_SHOW_SPRITE_LEFT: u8 = 0x04;
const MASK_SHOW_BG: u8 = 0x08;
const MASK_SHOW_SPRITES: u8 = 0x10;

const STATUS_SPRITE_OVERFLOW: u8 = 0x20;
const STATUS_SPRITE_ZERO_HIT: u8 = 0x40;
const STATUS_VBLANK: u8 = 0x80;

/// 256x240 grid of palette indices (0..=63), row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameBuffer {
    pixels: Vec<u8>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self {
            pixels: vec![0; FRAME_WIDTH * FRAME_HEIGHT],
        }
    }
}

impl FrameBuffer {
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * FRAME_WIDTH + x]
    }

    fn set(&mut self, x: usize, y: usize, color: u8) {
        self.pixels[y * FRAME_WIDTH + x] = color;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpuDebugCounters {
    pub ticks: u64,
    pub vblank_entries: u64,
    pub vblank_suppressions: u64,
    pub nmi_edges: u64,
    pub sprite_overflow_events: u64,
    pub sprite0_hit_events: u64,
    pub status_reads: u64,
    pub pattern_reads: u64,
    pub nametable_reads: u64,
    pub palette_reads: u64,
    pub pattern_writes: u64,
    pub nametable_writes: u64,
    pub palette_writes: u64,
    pub last_read_addr: u16,
    pub last_write_addr: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ppu {
    ctrl: u8,
    mask: u8,
    status: u8,

    oam_addr: u8,
    oam: Vec<u8>,

    vram: Vec<u8>,
    palette_ram: [u8; 32],

    write_toggle: bool,
    v: u16,
    t: u16,
    fine_x: u8,
    read_buffer: u8,
    open_bus: u8,

    scanline: u16,
    dot: u16,
    odd_frame: bool,
    frame_dots: u32,
    last_frame_dots: u32,
    frame_count: u64,
    frame_ready: bool,

    nmi_line: bool,
    nmi_edge: bool,
    suppress_vblank: bool,

    next_tile_id: u8,
    next_tile_attr: u8,
    next_tile_lsb: u8,
    next_tile_msb: u8,
    bg_shift_pattern_lo: u16,
    bg_shift_pattern_hi: u16,
    bg_shift_attr_lo: u16,
    bg_shift_attr_hi: u16,

    sprite_count: usize,
    sprite_patterns_lo: [u8; 8],
    sprite_patterns_hi: [u8; 8],
    sprite_x: [u8; 8],
    sprite_attributes: [u8; 8],
    sprite_zero_on_line: bool,

    frame: FrameBuffer,
    completed: FrameBuffer,
    debug: PpuDebugCounters,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            ctrl: 0,
            mask: 0,
            status: 0,
            oam_addr: 0,
            oam: vec![0; 256],
            vram: vec![0; 4096],
            palette_ram: [0x0F; 32],
            write_toggle: false,
            v: 0,
            t: 0,
            fine_x: 0,
            read_buffer: 0,
            open_bus: 0,
            scanline: 0,
            dot: 0,
            odd_frame: false,
            frame_dots: 0,
            last_frame_dots: 0,
            frame_count: 0,
            frame_ready: false,
            nmi_line: false,
            nmi_edge: false,
            suppress_vblank: false,
            next_tile_id: 0,
            next_tile_attr: 0,
            next_tile_lsb: 0,
            next_tile_msb: 0,
            bg_shift_pattern_lo: 0,
            bg_shift_pattern_hi: 0,
            bg_shift_attr_lo: 0,
            bg_shift_attr_hi: 0,
            sprite_count: 0,
            sprite_patterns_lo: [0; 8],
            sprite_patterns_hi: [0; 8],
            sprite_x: [0; 8],
            sprite_attributes: [0; 8],
            sprite_zero_on_line: false,
            frame: FrameBuffer::default(),
            completed: FrameBuffer::default(),
            debug: PpuDebugCounters::default(),
        }
    }

    /// Reset line behaviour: control, mask, the write toggle and the read
    /// buffer clear. Memories and the scan position are left alone.
    pub fn reset(&mut self) {
        self.ctrl = 0;
        self.mask = 0;
        self.write_toggle = false;
        self.t = 0;
        self.fine_x = 0;
        self.read_buffer = 0;
        self.odd_frame = false;
        self.nmi_edge = false;
        self.suppress_vblank = false;
        self.update_nmi_line();
    }

    /// Last fully rendered frame.
    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.completed
    }

    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    pub fn last_frame_dots(&self) -> u32 {
        self.last_frame_dots
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn dot(&self) -> u16 {
        self.dot
    }

    /// Level of the NMI output (`ctrl.7 && status.7`).
    pub fn nmi_line(&self) -> bool {
        self.nmi_line
    }

    pub fn take_nmi(&mut self) -> bool {
        std::mem::take(&mut self.nmi_edge)
    }

    pub fn ctrl(&self) -> u8 {
        self.ctrl
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn vram_addr(&self) -> u16 {
        self.v
    }

    pub fn debug_counters(&self) -> PpuDebugCounters {
        self.debug
    }

    pub fn peek_vram(&self, index: usize) -> u8 {
        self.vram[index % self.vram.len()]
    }

    pub fn peek_palette(&self, index: usize) -> u8 {
        self.palette_ram[index % self.palette_ram.len()]
    }

    pub fn peek_oam(&self, index: usize) -> u8 {
        self.oam[index % self.oam.len()]
    }

    /// Register value as a read would return it, without the read's side effects.
    pub fn peek_register(&self, addr: u16) -> u8 {
        match addr & 0x0007 {
            2 => (self.status & 0xE0) | (self.open_bus & 0x1F),
            4 => self.oam[self.oam_addr as usize],
            _ => self.open_bus,
        }
    }

    pub fn cpu_read_register(&mut self, addr: u16, mapper: &Mapper) -> u8 {
        let value = match addr & 0x0007 {
            2 => {
                self.debug.status_reads = self.debug.status_reads.wrapping_add(1);

                // One dot ahead of the flag: the flag and its NMI never happen.
                if self.scanline == VBLANK_SCANLINE && self.dot == 1 {
                    self.suppress_vblank = true;
                }

                let value = (self.status & 0xE0) | (self.open_bus & 0x1F);
                self.status &= !STATUS_VBLANK;
                self.write_toggle = false;
                self.update_nmi_line();
                value
            }
            4 => {
                let value = self.oam[self.oam_addr as usize];
                if (self.oam_addr & 0x03) == 0x02 {
                    value & 0xE3
                } else {
                    value
                }
            }
            7 => {
                let ppu_addr = self.v & 0x3FFF;
                let value = self.ppu_read(ppu_addr, mapper);
                let result = if ppu_addr >= 0x3F00 {
                    self.read_buffer = self.ppu_read(ppu_addr - 0x1000, mapper);
                    (self.open_bus & 0xC0) | (value & 0x3F)
                } else {
                    std::mem::replace(&mut self.read_buffer, value)
                };

                self.increment_vram_addr_cpu_access();
                result
            }
            _ => self.open_bus,
        };
        self.open_bus = value;
        value
    }

    pub fn cpu_write_register(&mut self, addr: u16, value: u8, mapper: &mut Mapper) {
        self.open_bus = value;
        match addr & 0x0007 {
            0 => {
                self.ctrl = value;
                self.t = (self.t & !0x0C00) | (((value as u16) & 0x03) << 10);
                self.update_nmi_line();
            }
            1 => self.mask = value,
            3 => self.oam_addr = value,
            4 => {
                self.oam[self.oam_addr as usize] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            5 => {
                if !self.write_toggle {
                    self.fine_x = value & 0x07;
                    self.t = (self.t & !0x001F) | ((value as u16) >> 3);
                } else {
                    self.t = (self.t & !0x03E0) | (((value as u16) >> 3) << 5);
                    self.t = (self.t & !0x7000) | (((value as u16) & 0x07) << 12);
                }
                self.write_toggle = !self.write_toggle;
            }
            6 => {
                if !self.write_toggle {
                    self.t = (self.t & 0x00FF) | (((value as u16) & 0x3F) << 8);
                } else {
                    self.t = (self.t & 0x7F00) | (value as u16);
                    self.v = self.t;
                }
                self.write_toggle = !self.write_toggle;
            }
            7 => {
                let ppu_addr = self.v & 0x3FFF;
                self.ppu_write(ppu_addr, value, mapper);
                self.increment_vram_addr_cpu_access();
            }
            _ => {}
        }
    }

    pub fn write_oam_dma(&mut self, bytes: &[u8; 256]) {
        for byte in bytes {
            self.oam[self.oam_addr as usize] = *byte;
            self.oam_addr = self.oam_addr.wrapping_add(1);
        }
    }

    /// Runs the dot at the current position and advances by one.
    pub fn tick(&mut self, mapper: &mut Mapper) {
        debug_assert!(self.scanline < SCANLINES_PER_FRAME && self.dot < DOTS_PER_SCANLINE);
        self.debug.ticks = self.debug.ticks.wrapping_add(1);
        self.frame_dots += 1;

        let visible_line = self.scanline < FRAME_HEIGHT as u16;
        let pre_render = self.scanline == PRE_RENDER_SCANLINE;
        let rendering_enabled = self.rendering_enabled();

        if self.scanline == VBLANK_SCANLINE && self.dot == 1 {
            if self.suppress_vblank {
                self.debug.vblank_suppressions = self.debug.vblank_suppressions.wrapping_add(1);
            } else {
                self.status |= STATUS_VBLANK;
                self.debug.vblank_entries = self.debug.vblank_entries.wrapping_add(1);
            }
            self.suppress_vblank = false;
            self.update_nmi_line();
        }

        if pre_render && self.dot == 1 {
            self.status &= !(STATUS_VBLANK | STATUS_SPRITE_ZERO_HIT | STATUS_SPRITE_OVERFLOW);
            self.update_nmi_line();
        }

        if (visible_line || pre_render) && rendering_enabled {
            self.run_background_pipeline(mapper, pre_render);
            if self.dot == 260 {
                mapper.clock_scanline();
            }
        }

        if (visible_line || pre_render) && self.dot == 257 {
            if visible_line && rendering_enabled {
                self.evaluate_sprites(mapper);
            } else {
                self.clear_sprites();
            }
        }

        if visible_line && (1..=256).contains(&self.dot) {
            self.render_pixel();
            if rendering_enabled {
                self.shift_sprite_registers();
            }
        }

        self.advance(pre_render && rendering_enabled);
    }

    fn advance(&mut self, skip_eligible: bool) {
        if skip_eligible && self.odd_frame && self.dot == 339 {
            self.dot = 0;
            self.scanline = 0;
            self.finish_frame();
            return;
        }

        self.dot += 1;
        if self.dot == DOTS_PER_SCANLINE {
            self.dot = 0;
            self.scanline += 1;
            if self.scanline == SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.finish_frame();
            }
        }
    }

    fn finish_frame(&mut self) {
        self.last_frame_dots = std::mem::take(&mut self.frame_dots);
        std::mem::swap(&mut self.frame, &mut self.completed);
        self.frame_ready = true;
        self.frame_count = self.frame_count.wrapping_add(1);
        self.odd_frame = !self.odd_frame;
    }

    fn rendering_enabled(&self) -> bool {
        (self.mask & (MASK_SHOW_BG | MASK_SHOW_SPRITES)) != 0
    }

    fn update_nmi_line(&mut self) {
        let line = (self.ctrl & CTRL_NMI_ENABLE) != 0 && (self.status & STATUS_VBLANK) != 0;
        if line && !self.nmi_line {
            self.nmi_edge = true;
            self.debug.nmi_edges = self.debug.nmi_edges.wrapping_add(1);
        }
        self.nmi_line = line;
    }

    fn run_background_pipeline(&mut self, mapper: &Mapper, pre_render: bool) {
        let dot = self.dot;
        if (2..=257).contains(&dot) || (321..=337).contains(&dot) {
            self.shift_background_registers();

            match (dot - 1) & 0x07 {
                0 => {
                    self.load_background_shifters();
                    self.next_tile_id = self.ppu_read(0x2000 | (self.v & 0x0FFF), mapper);
                }
                2 => {
                    let addr = 0x23C0
                        | (self.v & 0x0C00)
                        | ((self.v >> 4) & 0x0038)
                        | ((self.v >> 2) & 0x0007);
                    let attr = self.ppu_read(addr, mapper);
                    let shift = ((self.v >> 4) & 0x04) | (self.v & 0x02);
                    self.next_tile_attr = (attr >> shift) & 0x03;
                }
                4 => {
                    let addr = self.background_pattern_addr();
                    self.next_tile_lsb = self.ppu_read(addr, mapper);
                }
                6 => {
                    let addr = self.background_pattern_addr() + 8;
                    self.next_tile_msb = self.ppu_read(addr, mapper);
                }
                7 => self.increment_coarse_x(),
                _ => {}
            }
        }

        if dot == 256 {
            self.increment_y();
        }
        if dot == 257 {
            self.copy_horizontal_bits();
        }
        if pre_render && (280..=304).contains(&dot) {
            self.copy_vertical_bits();
        }
    }

    fn background_pattern_addr(&self) -> u16 {
        let fine_y = (self.v >> 12) & 0x07;
        let table = if (self.ctrl & CTRL_BG_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        };
        table + (self.next_tile_id as u16) * 16 + fine_y
    }

    fn render_pixel(&mut self) {
        let x = (self.dot - 1) as usize;
        let y = self.scanline as usize;

        let (bg_pixel, bg_palette) = self.background_sample(x);
        let (spr_pixel, spr_palette, behind_bg, sprite_zero) = self.sprite_sample(x);

        if sprite_zero && bg_pixel != 0 && x != 255 {
            if (self.status & STATUS_SPRITE_ZERO_HIT) == 0 {
                self.debug.sprite0_hit_events = self.debug.sprite0_hit_events.wrapping_add(1);
            }
            self.status |= STATUS_SPRITE_ZERO_HIT;
        }

        let sprite_index = 0x10 | (spr_palette << 2) | spr_pixel;
        let bg_index = (bg_palette << 2) | bg_pixel;
        let palette_index = match (bg_pixel, spr_pixel) {
            (0, 0) => 0,
            (0, _) => sprite_index,
            (_, 0) => bg_index,
            _ if behind_bg => bg_index,
            _ => sprite_index,
        };

        let mut color = self.palette_ram[Self::palette_index(palette_index as u16)] & 0x3F;
        if (self.mask & MASK_GRAYSCALE) != 0 {
            color &= 0x30;
        }
        self.frame.set(x, y, color);
    }

    fn background_sample(&self, x: usize) -> (u8, u8) {
        if (self.mask & MASK_SHOW_BG) == 0 {
            return (0, 0);
        }
        if x < 8 && (self.mask & MASK_SHOW_BG_LEFT) == 0 {
            return (0, 0);
        }

        let bit = 0x8000u16 >> self.fine_x;

        let p0 = ((self.bg_shift_pattern_lo & bit) != 0) as u8;
        let p1 = ((self.bg_shift_pattern_hi & bit) != 0) as u8;
        let a0 = ((self.bg_shift_attr_lo & bit) != 0) as u8;
        let a1 = ((self.bg_shift_attr_hi & bit) != 0) as u8;

        ((p1 << 1) | p0, (a1 << 1) | a0)
    }

    /// First opaque sprite at this column: (pixel, palette, behind_bg, is_sprite_zero).
    fn sprite_sample(&self, x: usize) -> (u8, u8, bool, bool) {
        if (self.mask & MASK_SHOW_SPRITES) == 0 {
            return (0, 0, false, false);
        }
        if x < 8 && (self.mask & MASK_SHOW_SPRITE_LEFT) == 0 {
            return (0, 0, false, false);
        }

        for i in 0..self.sprite_count {
            if self.sprite_x[i] != 0 {
                continue;
            }

            let p0 = (self.sprite_patterns_lo[i] & 0x80) >> 7;
            let p1 = (self.sprite_patterns_hi[i] & 0x80) >> 6;
            let pixel = p0 | p1;
            if pixel == 0 {
                continue;
            }

            let attributes = self.sprite_attributes[i];
            return (
                pixel,
                attributes & 0x03,
                (attributes & 0x20) != 0,
                i == 0 && self.sprite_zero_on_line,
            );
        }

        (0, 0, false, false)
    }

    fn shift_background_registers(&mut self) {
        self.bg_shift_pattern_lo <<= 1;
        self.bg_shift_pattern_hi <<= 1;
        self.bg_shift_attr_lo <<= 1;
        self.bg_shift_attr_hi <<= 1;
    }

    fn shift_sprite_registers(&mut self) {
        for i in 0..self.sprite_count {
            if self.sprite_x[i] > 0 {
                self.sprite_x[i] -= 1;
            } else {
                self.sprite_patterns_lo[i] <<= 1;
                self.sprite_patterns_hi[i] <<= 1;
            }
        }
    }

    fn load_background_shifters(&mut self) {
        self.bg_shift_pattern_lo = (self.bg_shift_pattern_lo & 0xFF00) | self.next_tile_lsb as u16;
        self.bg_shift_pattern_hi = (self.bg_shift_pattern_hi & 0xFF00) | self.next_tile_msb as u16;

        let attr_lo = if (self.next_tile_attr & 0x01) != 0 {
            0xFF
        } else {
            0x00
        };
        let attr_hi = if (self.next_tile_attr & 0x02) != 0 {
            0xFF
        } else {
            0x00
        };

        self.bg_shift_attr_lo = (self.bg_shift_attr_lo & 0xFF00) | attr_lo;
        self.bg_shift_attr_hi = (self.bg_shift_attr_hi & 0xFF00) | attr_hi;
    }

    fn increment_coarse_x(&mut self) {
        if (self.v & 0x001F) == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400;
        } else {
            self.v = self.v.wrapping_add(1);
        }
    }

    fn increment_y(&mut self) {
        if (self.v & 0x7000) != 0x7000 {
            self.v = self.v.wrapping_add(0x1000);
            return;
        }

        self.v &= !0x7000;
        let mut y = (self.v & 0x03E0) >> 5;
        if y == 29 {
            y = 0;
            self.v ^= 0x0800;
        } else if y == 31 {
            y = 0;
        } else {
            y += 1;
        }

        self.v = (self.v & !0x03E0) | (y << 5);
    }

    fn copy_horizontal_bits(&mut self) {
        self.v = (self.v & !0x041F) | (self.t & 0x041F);
    }

    fn copy_vertical_bits(&mut self) {
        self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
    }

    fn sprite_height(&self) -> i16 {
        if (self.ctrl & CTRL_SPRITE_SIZE_16) != 0 {
            16
        } else {
            8
        }
    }

    fn clear_sprites(&mut self) {
        self.sprite_count = 0;
        self.sprite_zero_on_line = false;
    }

    /// Fills the eight sprite slots for the next scanline from OAM.
    fn evaluate_sprites(&mut self, mapper: &Mapper) {
        self.clear_sprites();

        let height = self.sprite_height();
        let scanline = self.scanline as i16;
        let in_range = |y: u8| {
            let row = scanline - y as i16;
            (0..height).contains(&row)
        };

        let mut n = 0usize;
        while n < 64 && self.sprite_count < 8 {
            let y = self.oam[n * 4];
            if in_range(y) {
                self.load_sprite(n, (scanline - y as i16) as u16, mapper);
            }
            n += 1;
        }

        // Past eight hits the scan walks OAM diagonally: n and the byte
        // offset advance together, so tile/attribute/X bytes get tested as Y.
        let mut m = 0usize;
        while n < 64 {
            if in_range(self.oam[n * 4 + m]) {
                if (self.status & STATUS_SPRITE_OVERFLOW) == 0 {
                    self.debug.sprite_overflow_events =
                        self.debug.sprite_overflow_events.wrapping_add(1);
                }
                self.status |= STATUS_SPRITE_OVERFLOW;
                break;
            }
            n += 1;
            m = (m + 1) & 0x03;
        }
    }

    fn load_sprite(&mut self, index: usize, row: u16, mapper: &Mapper) {
        let base = index * 4;
        let tile_index = self.oam[base + 1];
        let attributes = self.oam[base + 2];
        let x = self.oam[base + 3];
        let height = self.sprite_height() as u16;

        let sprite_row = if (attributes & 0x80) != 0 {
            (height - 1) - row
        } else {
            row
        };

        let (table, tile) = if height == 16 {
            (
                ((tile_index & 0x01) as u16) * 0x1000,
                ((tile_index & 0xFE) as u16) + (sprite_row / 8),
            )
        } else {
            let table = if (self.ctrl & CTRL_SPRITE_TABLE) != 0 {
                0x1000
            } else {
                0x0000
            };
            (table, tile_index as u16)
        };

        let addr = table + tile * 16 + (sprite_row & 0x07);
        let mut low = self.ppu_read(addr, mapper);
        let mut high = self.ppu_read(addr + 8, mapper);
        if (attributes & 0x40) != 0 {
            low = low.reverse_bits();
            high = high.reverse_bits();
        }

        let slot = self.sprite_count;
        self.sprite_patterns_lo[slot] = low;
        self.sprite_patterns_hi[slot] = high;
        self.sprite_x[slot] = x;
        self.sprite_attributes[slot] = attributes;
        if index == 0 {
            self.sprite_zero_on_line = true;
        }
        self.sprite_count += 1;
    }

    fn increment_vram_addr_cpu_access(&mut self) {
        // $2007 accesses while rendering bump coarse X and Y instead.
        let render_line = self.scanline < FRAME_HEIGHT as u16 || self.scanline == PRE_RENDER_SCANLINE;
        if self.rendering_enabled() && render_line {
            self.increment_coarse_x();
            self.increment_y();
        } else if (self.ctrl & CTRL_VRAM_INC_32) != 0 {
            self.v = self.v.wrapping_add(32) & 0x7FFF;
        } else {
            self.v = self.v.wrapping_add(1) & 0x7FFF;
        }
    }

    fn ppu_read(&mut self, addr: u16, mapper: &Mapper) -> u8 {
        let addr = addr & 0x3FFF;
        self.debug.last_read_addr = addr;
        match addr {
            0x0000..=0x1FFF => {
                self.debug.pattern_reads = self.debug.pattern_reads.wrapping_add(1);
                mapper.chr_read(addr)
            }
            0x2000..=0x3EFF => {
                self.debug.nametable_reads = self.debug.nametable_reads.wrapping_add(1);
                self.vram[Self::mirrored_vram_index(addr, mapper.mirroring())]
            }
            _ => {
                self.debug.palette_reads = self.debug.palette_reads.wrapping_add(1);
                self.palette_ram[Self::palette_index(addr)]
            }
        }
    }

    fn ppu_write(&mut self, addr: u16, value: u8, mapper: &mut Mapper) {
        let addr = addr & 0x3FFF;
        self.debug.last_write_addr = addr;
        match addr {
            0x0000..=0x1FFF => {
                self.debug.pattern_writes = self.debug.pattern_writes.wrapping_add(1);
                mapper.chr_write(addr, value);
            }
            0x2000..=0x3EFF => {
                self.debug.nametable_writes = self.debug.nametable_writes.wrapping_add(1);
                let index = Self::mirrored_vram_index(addr, mapper.mirroring());
                self.vram[index] = value;
            }
            _ => {
                self.debug.palette_writes = self.debug.palette_writes.wrapping_add(1);
                self.palette_ram[Self::palette_index(addr)] = value;
            }
        }
    }

    /// $3F10/$3F14/$3F18/$3F1C alias the backdrop entries below them.
    fn palette_index(addr: u16) -> usize {
        let mut index = (addr & 0x1F) as usize;
        if index >= 16 && (index & 0x03) == 0 {
            index -= 16;
        }
        index
    }

    fn mirrored_vram_index(addr: u16, mirroring: Mirroring) -> usize {
        let index = ((addr - 0x2000) & 0x0FFF) as usize;
        let table = index / 0x400;
        let offset = index % 0x400;

        let mapped_table = match mirroring {
            Mirroring::Horizontal => table >> 1,
            Mirroring::Vertical => table & 1,
            Mirroring::OneScreenLower => 0,
            Mirroring::OneScreenUpper => 1,
            Mirroring::FourScreen => table,
        };

        mapped_table * 0x400 + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nes::cartridge::{Cartridge, CartridgeHeader};

    fn chr_ram_mapper(mirroring: Mirroring) -> Mapper {
        let header = CartridgeHeader {
            mapper_id: 0,
            prg_rom_size: 0x4000,
            chr_rom_size: 0,
            mirroring,
            has_battery: false,
        };
        Mapper::new(Cartridge::new(header, vec![0; 0x4000], Vec::new()).unwrap()).unwrap()
    }

    fn run_until(ppu: &mut Ppu, mapper: &mut Mapper, scanline: u16, dot: u16) {
        while !(ppu.scanline() == scanline && ppu.dot() == dot) {
            ppu.tick(mapper);
        }
    }

    fn run_until_frame_ready(ppu: &mut Ppu, mapper: &mut Mapper) {
        while !ppu.take_frame_ready() {
            ppu.tick(mapper);
        }
    }

    fn set_vram_addr(ppu: &mut Ppu, mapper: &mut Mapper, addr: u16) {
        ppu.cpu_write_register(0x2006, (addr >> 8) as u8, mapper);
        ppu.cpu_write_register(0x2006, addr as u8, mapper);
    }

    /// Nametable 0 filled with tile 1, whose low plane is solid; backdrop
    /// $0F and colour 1 of palette 0 set to $21. Scroll is left at zero.
    fn solid_background(ppu: &mut Ppu, mapper: &mut Mapper) {
        set_vram_addr(ppu, mapper, 0x3F00);
        ppu.cpu_write_register(0x2007, 0x0F, mapper);
        ppu.cpu_write_register(0x2007, 0x21, mapper);
        set_vram_addr(ppu, mapper, 0x0010);
        for byte in [0xFF; 8].into_iter().chain([0x00; 8]) {
            ppu.cpu_write_register(0x2007, byte, mapper);
        }
        set_vram_addr(ppu, mapper, 0x2000);
        for _ in 0..960 {
            ppu.cpu_write_register(0x2007, 0x01, mapper);
        }
        ppu.cpu_write_register(0x2000, 0x00, mapper);
        ppu.cpu_write_register(0x2005, 0x00, mapper);
        ppu.cpu_write_register(0x2005, 0x00, mapper);
    }

    #[test]
    fn data_port_increments_by_one_or_thirty_two() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();

        set_vram_addr(&mut ppu, &mut mapper, 0x2000);
        ppu.cpu_write_register(0x2007, 0x11, &mut mapper);
        assert_eq!(ppu.vram_addr(), 0x2001);

        ppu.cpu_write_register(0x2000, CTRL_VRAM_INC_32, &mut mapper);
        ppu.cpu_write_register(0x2007, 0x22, &mut mapper);
        assert_eq!(ppu.vram_addr(), 0x2021);
    }

    #[test]
    fn data_reads_are_buffered_except_palette() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();

        set_vram_addr(&mut ppu, &mut mapper, 0x2105);
        ppu.cpu_write_register(0x2007, 0xAB, &mut mapper);

        set_vram_addr(&mut ppu, &mut mapper, 0x2105);
        let stale = ppu.cpu_read_register(0x2007, &mapper);
        let fresh = ppu.cpu_read_register(0x2007, &mapper);
        assert_eq!(stale, 0x00);
        assert_eq!(fresh, 0xAB);

        set_vram_addr(&mut ppu, &mut mapper, 0x3F01);
        ppu.cpu_write_register(0x2007, 0x2A, &mut mapper);
        set_vram_addr(&mut ppu, &mut mapper, 0x3F01);
        assert_eq!(ppu.cpu_read_register(0x2007, &mapper) & 0x3F, 0x2A);
    }

    #[test]
    fn palette_backdrop_mirrors() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();

        set_vram_addr(&mut ppu, &mut mapper, 0x3F10);
        ppu.cpu_write_register(0x2007, 0x30, &mut mapper);
        assert_eq!(ppu.peek_palette(0x00), 0x30);
    }

    #[test]
    fn nametable_mirroring_follows_board() {
        let mut mapper = chr_ram_mapper(Mirroring::Vertical);
        let mut ppu = Ppu::new();

        set_vram_addr(&mut ppu, &mut mapper, 0x2800);
        ppu.cpu_write_register(0x2007, 0x5C, &mut mapper);
        assert_eq!(ppu.peek_vram(0x000), 0x5C);

        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        set_vram_addr(&mut ppu, &mut mapper, 0x2400);
        ppu.cpu_write_register(0x2007, 0x5C, &mut mapper);
        assert_eq!(ppu.peek_vram(0x000), 0x5C);
    }

    #[test]
    fn scroll_writes_compose_t_and_fine_x() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();

        ppu.cpu_write_register(0x2005, 0x7D, &mut mapper);
        ppu.cpu_write_register(0x2005, 0x5E, &mut mapper);
        assert_eq!(ppu.fine_x, 0x05);
        assert_eq!(ppu.t, 0x616F);

        let _ = ppu.cpu_read_register(0x2002, &mapper);
        assert!(!ppu.write_toggle);
    }

    #[test]
    fn frame_is_89342_dots_with_rendering_disabled() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();

        for _ in 0..3 {
            run_until_frame_ready(&mut ppu, &mut mapper);
            assert_eq!(ppu.last_frame_dots(), 89_342);
        }
    }

    #[test]
    fn odd_frames_skip_a_dot_when_rendering() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        ppu.cpu_write_register(0x2001, MASK_SHOW_BG, &mut mapper);

        run_until_frame_ready(&mut ppu, &mut mapper);
        assert_eq!(ppu.last_frame_dots(), 89_342);
        run_until_frame_ready(&mut ppu, &mut mapper);
        assert_eq!(ppu.last_frame_dots(), 89_341);
        run_until_frame_ready(&mut ppu, &mut mapper);
        assert_eq!(ppu.last_frame_dots(), 89_342);
        assert_eq!((ppu.scanline(), ppu.dot()), (0, 0));
    }

    #[test]
    fn vblank_sets_at_241_1_and_status_read_clears() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        ppu.cpu_write_register(0x2000, CTRL_NMI_ENABLE, &mut mapper);

        run_until(&mut ppu, &mut mapper, 241, 1);
        assert_eq!(ppu.status() & STATUS_VBLANK, 0);
        assert!(!ppu.take_nmi());

        ppu.tick(&mut mapper);
        assert!(ppu.nmi_line());
        assert!(ppu.take_nmi());
        assert!(!ppu.take_nmi());

        let status = ppu.cpu_read_register(0x2002, &mapper);
        assert_ne!(status & STATUS_VBLANK, 0);
        assert!(!ppu.nmi_line());
        assert_eq!(ppu.status() & STATUS_VBLANK, 0);

        run_until(&mut ppu, &mut mapper, 261, 2);
        assert_eq!(ppu.status() & STATUS_VBLANK, 0);
    }

    #[test]
    fn status_read_just_before_vblank_suppresses_flag_and_nmi() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        ppu.cpu_write_register(0x2000, CTRL_NMI_ENABLE, &mut mapper);

        run_until(&mut ppu, &mut mapper, 241, 1);
        let status = ppu.cpu_read_register(0x2002, &mapper);
        assert_eq!(status & STATUS_VBLANK, 0);

        run_until(&mut ppu, &mut mapper, 241, 10);
        assert_eq!(ppu.status() & STATUS_VBLANK, 0);
        assert!(!ppu.take_nmi());
        assert_eq!(ppu.debug_counters().vblank_suppressions, 1);
    }

    #[test]
    fn enabling_nmi_during_vblank_raises_edge() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();

        run_until(&mut ppu, &mut mapper, 245, 0);
        assert!(!ppu.take_nmi());
        ppu.cpu_write_register(0x2000, CTRL_NMI_ENABLE, &mut mapper);
        assert!(ppu.take_nmi());
    }

    fn place_sprites(ppu: &mut Ppu, sprites: &[[u8; 4]]) {
        let mut oam = [0xFFu8; 256];
        for (i, sprite) in sprites.iter().enumerate() {
            oam[i * 4..i * 4 + 4].copy_from_slice(sprite);
        }
        ppu.write_oam_dma(&oam);
    }

    #[test]
    fn nine_sprites_on_a_line_set_overflow() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        place_sprites(&mut ppu, &[[10, 0, 0, 0]; 9]);
        ppu.cpu_write_register(0x2001, MASK_SHOW_SPRITES, &mut mapper);

        run_until(&mut ppu, &mut mapper, 10, 257);
        assert_eq!(ppu.status() & STATUS_SPRITE_OVERFLOW, 0);
        ppu.tick(&mut mapper);
        assert_ne!(ppu.status() & STATUS_SPRITE_OVERFLOW, 0);
        assert_eq!(ppu.sprite_count, 8);

        run_until(&mut ppu, &mut mapper, 261, 2);
        assert_eq!(ppu.status() & STATUS_SPRITE_OVERFLOW, 0);
    }

    #[test]
    fn eight_sprites_on_a_line_do_not_overflow() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        let mut sprites = vec![[10, 0, 0, 0]; 8];
        sprites.push([0xFF; 4]);
        place_sprites(&mut ppu, &sprites);
        ppu.cpu_write_register(0x2001, MASK_SHOW_SPRITES, &mut mapper);

        run_until(&mut ppu, &mut mapper, 20, 0);
        assert_eq!(ppu.status() & STATUS_SPRITE_OVERFLOW, 0);
    }

    #[test]
    fn overflow_scan_reads_tile_byte_as_y() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        let mut sprites = vec![[10, 0, 0, 0]; 8];
        sprites.push([0xFF, 0xFF, 0xFF, 0xFF]);
        sprites.push([0xFF, 10, 0xFF, 0xFF]);
        place_sprites(&mut ppu, &sprites);
        ppu.cpu_write_register(0x2001, MASK_SHOW_SPRITES, &mut mapper);

        run_until(&mut ppu, &mut mapper, 11, 0);
        assert_ne!(ppu.status() & STATUS_SPRITE_OVERFLOW, 0);
    }

    /// Sprite palette 0 colour 1 = $16, sprite palette 1 colour 1 = $2A.
    fn sprite_palettes(ppu: &mut Ppu, mapper: &mut Mapper) {
        set_vram_addr(ppu, mapper, 0x3F11);
        ppu.cpu_write_register(0x2007, 0x16, mapper);
        set_vram_addr(ppu, mapper, 0x3F15);
        ppu.cpu_write_register(0x2007, 0x2A, mapper);
    }

    #[test]
    fn only_the_first_eight_sprites_in_oam_order_are_drawn() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        sprite_palettes(&mut ppu, &mut mapper);
        solid_background(&mut ppu, &mut mapper);
        let mut sprites: Vec<[u8; 4]> = (1..=8u8).map(|i| [20, 1, 0, i * 16]).collect();
        sprites.push([20, 1, 0, 0]);
        place_sprites(&mut ppu, &sprites);
        ppu.cpu_write_register(0x2001, 0x1E, &mut mapper);

        run_until_frame_ready(&mut ppu, &mut mapper);
        run_until_frame_ready(&mut ppu, &mut mapper);

        let frame = ppu.frame_buffer();
        assert_eq!(frame.pixel(3, 24), 0x21);
        for i in 1..=8usize {
            assert_eq!(frame.pixel(i * 16 + 3, 24), 0x16, "sprite at x={}", i * 16);
        }
    }

    #[test]
    fn lower_oam_index_wins_where_sprites_overlap() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        sprite_palettes(&mut ppu, &mut mapper);
        solid_background(&mut ppu, &mut mapper);
        place_sprites(
            &mut ppu,
            &[
                [20, 1, 0x01, 64],
                [20, 1, 0x00, 60],
                // A behind-background sprite still masks a later front one.
                [40, 1, 0x20, 100],
                [40, 1, 0x01, 100],
            ],
        );
        ppu.cpu_write_register(0x2001, 0x1E, &mut mapper);

        run_until_frame_ready(&mut ppu, &mut mapper);
        run_until_frame_ready(&mut ppu, &mut mapper);

        let frame = ppu.frame_buffer();
        assert_eq!(frame.pixel(62, 24), 0x16);
        assert_eq!(frame.pixel(66, 24), 0x2A);
        assert_eq!(frame.pixel(70, 24), 0x2A);
        assert_eq!(frame.pixel(102, 44), 0x21);
    }

    #[test]
    fn behind_background_sprites_show_only_through_transparent_pixels() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        sprite_palettes(&mut ppu, &mut mapper);
        solid_background(&mut ppu, &mut mapper);
        // Tile row 3, column 20 (x 160..167, lines 24..31) is transparent.
        set_vram_addr(&mut ppu, &mut mapper, 0x2074);
        ppu.cpu_write_register(0x2007, 0x00, &mut mapper);
        ppu.cpu_write_register(0x2000, 0x00, &mut mapper);
        ppu.cpu_write_register(0x2005, 0x00, &mut mapper);
        ppu.cpu_write_register(0x2005, 0x00, &mut mapper);
        place_sprites(
            &mut ppu,
            &[[23, 1, 0x20, 100], [23, 1, 0x20, 160], [23, 1, 0x00, 120]],
        );
        ppu.cpu_write_register(0x2001, 0x1E, &mut mapper);

        run_until_frame_ready(&mut ppu, &mut mapper);
        run_until_frame_ready(&mut ppu, &mut mapper);

        let frame = ppu.frame_buffer();
        assert_eq!(frame.pixel(103, 27), 0x21);
        assert_eq!(frame.pixel(163, 27), 0x16);
        assert_eq!(frame.pixel(123, 27), 0x16);
        assert_eq!(frame.pixel(171, 27), 0x21);
    }

    #[test]
    fn background_pixels_use_palette_and_grayscale() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        solid_background(&mut ppu, &mut mapper);
        ppu.cpu_write_register(0x2001, MASK_SHOW_BG | MASK_SHOW_BG_LEFT, &mut mapper);

        run_until_frame_ready(&mut ppu, &mut mapper);
        run_until_frame_ready(&mut ppu, &mut mapper);
        assert_eq!(ppu.frame_buffer().pixel(0, 0), 0x21);
        assert_eq!(ppu.frame_buffer().pixel(200, 150), 0x21);

        ppu.cpu_write_register(
            0x2001,
            MASK_SHOW_BG | MASK_SHOW_BG_LEFT | MASK_GRAYSCALE,
            &mut mapper,
        );
        run_until_frame_ready(&mut ppu, &mut mapper);
        assert_eq!(ppu.frame_buffer().pixel(100, 100), 0x20);
    }

    #[test]
    fn hidden_left_column_shows_backdrop() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        solid_background(&mut ppu, &mut mapper);
        ppu.cpu_write_register(0x2001, MASK_SHOW_BG, &mut mapper);

        run_until_frame_ready(&mut ppu, &mut mapper);
        run_until_frame_ready(&mut ppu, &mut mapper);
        assert_eq!(ppu.frame_buffer().pixel(3, 40), 0x0F);
        assert_eq!(ppu.frame_buffer().pixel(8, 40), 0x21);
    }

    #[test]
    fn sprite_zero_hit_sets_when_opaque_pixels_overlap() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        solid_background(&mut ppu, &mut mapper);
        place_sprites(&mut ppu, &[[20, 1, 0, 50]]);
        ppu.cpu_write_register(0x2001, 0x1E, &mut mapper);

        run_until_frame_ready(&mut ppu, &mut mapper);
        run_until(&mut ppu, &mut mapper, 20, 0);
        assert_eq!(ppu.status() & STATUS_SPRITE_ZERO_HIT, 0);
        run_until(&mut ppu, &mut mapper, 22, 0);
        assert_ne!(ppu.status() & STATUS_SPRITE_ZERO_HIT, 0);
    }

    #[test]
    fn sprite_zero_hit_needs_background() {
        let mut mapper = chr_ram_mapper(Mirroring::Horizontal);
        let mut ppu = Ppu::new();
        solid_background(&mut ppu, &mut mapper);
        place_sprites(&mut ppu, &[[20, 1, 0, 50]]);
        ppu.cpu_write_register(0x2001, MASK_SHOW_SPRITES | MASK_SHOW_SPRITE_LEFT, &mut mapper);

        run_until_frame_ready(&mut ppu, &mut mapper);
        run_until(&mut ppu, &mut mapper, 40, 0);
        assert_eq!(ppu.status() & STATUS_SPRITE_ZERO_HIT, 0);
    }
}
