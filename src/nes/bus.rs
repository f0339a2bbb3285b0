use serde::{Deserialize, Serialize};

use super::NesDebugCounters;
use super::controller::Controller;
use super::cpu::CpuBus;
use super::mapper::Mapper;
use super::ppu::Ppu;

const RAM_SIZE: usize = 0x0800;
const IO_LATCH_SIZE: usize = 0x18;
const OAM_DMA_CYCLES: u32 = 513;

/// CPU address bus. Owns everything the CPU can reach and clocks the PPU
/// ahead of each access made during a CPU step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bus {
    ram: Vec<u8>,
    pub(crate) ppu: Ppu,
    pub(crate) mapper: Mapper,
    controllers: [Controller; 2],
    io_latch: [u8; IO_LATCH_SIZE],
    open_bus: u8,

    dma_stall: u32,
    dma_started: Option<(u8, u32)>,
    cpu_cycles: u64,
    nmi_pending: bool,

    step_in_progress: bool,
    step_ticked: u32,

    pub(crate) debug: NesDebugCounters,
}

impl Bus {
    pub fn new(mapper: Mapper, ram_fill: u8) -> Self {
        Self {
            ram: vec![ram_fill; RAM_SIZE],
            ppu: Ppu::new(),
            mapper,
            controllers: [Controller::default(); 2],
            io_latch: [0; IO_LATCH_SIZE],
            open_bus: 0,
            dma_stall: 0,
            dma_started: None,
            cpu_cycles: 0,
            nmi_pending: false,
            step_in_progress: false,
            step_ticked: 0,
            debug: NesDebugCounters::default(),
        }
    }

    /// Console reset line: PPU and pending transfers reset, memories survive.
    pub fn reset(&mut self) {
        self.ppu.reset();
        self.dma_stall = 0;
        self.dma_started = None;
        self.nmi_pending = false;
        self.step_in_progress = false;
        self.step_ticked = 0;
    }

    pub fn cpu_cycles(&self) -> u64 {
        self.cpu_cycles
    }

    pub fn io_latch(&self, addr: u16) -> u8 {
        match addr {
            0x4000..=0x4017 => self.io_latch[(addr - 0x4000) as usize],
            _ => 0,
        }
    }

    pub fn set_controller(&mut self, port: usize, buttons: u8) {
        if let Some(pad) = self.controllers.get_mut(port) {
            pad.set_buttons(buttons);
        }
    }

    pub fn dma_stall(&self) -> u32 {
        self.dma_stall
    }

    /// Burns one stalled CPU cycle. Returns false when no DMA is pending.
    pub fn consume_dma_stall(&mut self) -> bool {
        if self.dma_stall == 0 {
            return false;
        }
        self.dma_stall -= 1;
        self.tick_cpu_cycle();
        true
    }

    pub fn take_dma_started(&mut self) -> Option<(u8, u32)> {
        self.dma_started.take()
    }

    pub fn take_nmi(&mut self) -> bool {
        std::mem::take(&mut self.nmi_pending)
    }

    pub fn irq_line(&self) -> bool {
        self.mapper.irq_pending()
    }

    /// Marks the start of a CPU step: accesses from here on clock the PPU.
    pub fn begin_step(&mut self) {
        self.step_in_progress = true;
        self.step_ticked = 0;
    }

    /// Clocks the cycles of a finished step that no bus access covered.
    pub fn end_step(&mut self, cycles: u32) {
        self.step_in_progress = false;
        let remaining = cycles.saturating_sub(self.step_ticked);
        for _ in 0..remaining {
            self.tick_cpu_cycle();
        }
        self.step_ticked = 0;
    }

    pub fn tick_cpu_cycle(&mut self) {
        self.mapper.tick_cpu_cycle();
        for _ in 0..3 {
            self.debug.ppu_cycles = self.debug.ppu_cycles.wrapping_add(1);
            self.ppu.tick(&mut self.mapper);
            if self.ppu.take_nmi() {
                self.nmi_pending = true;
            }
        }
        self.cpu_cycles = self.cpu_cycles.wrapping_add(1);
    }

    fn maybe_tick_cpu_bus_cycle(&mut self) {
        if self.step_in_progress {
            self.step_ticked = self.step_ticked.saturating_add(1);
            self.tick_cpu_cycle();
        }
    }

    /// Side-effect-free view of the CPU address space.
    pub fn peek(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[(addr as usize) & (RAM_SIZE - 1)],
            0x2000..=0x3FFF => self.ppu.peek_register(addr),
            0x4016 => (self.open_bus & 0xE0) | self.controllers[0].peek(),
            0x4017 => (self.open_bus & 0xE0) | self.controllers[1].peek(),
            0x4000..=0x401F => self.open_bus,
            _ => self.mapper.prg_read(addr).unwrap_or(self.open_bus),
        }
    }

    fn oam_dma(&mut self, page: u8) {
        self.debug.dma_transfers = self.debug.dma_transfers.wrapping_add(1);
        let prev_step = self.step_in_progress;
        self.step_in_progress = false;
        let base = (page as u16) << 8;
        let mut bytes = [0u8; 256];
        for (idx, slot) in bytes.iter_mut().enumerate() {
            *slot = self.read(base.wrapping_add(idx as u16));
        }
        self.step_in_progress = prev_step;
        self.ppu.write_oam_dma(&bytes);

        // One extra alignment cycle when the halt lands on an odd CPU cycle.
        let stall = OAM_DMA_CYCLES + (self.cpu_cycles & 0x01) as u32;
        self.dma_stall = self.dma_stall.saturating_add(stall);
        self.dma_started = Some((page, stall));
    }
}

impl CpuBus for Bus {
    fn read(&mut self, addr: u16) -> u8 {
        self.debug.cpu_reads = self.debug.cpu_reads.wrapping_add(1);
        self.debug.last_cpu_read_addr = addr;
        self.maybe_tick_cpu_bus_cycle();
        let value = match addr {
            0x0000..=0x1FFF => {
                self.debug.cpu_reads_ram = self.debug.cpu_reads_ram.wrapping_add(1);
                self.ram[(addr as usize) & (RAM_SIZE - 1)]
            }
            0x2000..=0x3FFF => {
                self.debug.cpu_reads_ppu_regs = self.debug.cpu_reads_ppu_regs.wrapping_add(1);
                self.ppu.cpu_read_register(addr, &self.mapper)
            }
            0x4016 => {
                self.debug.cpu_reads_io = self.debug.cpu_reads_io.wrapping_add(1);
                (self.open_bus & 0xE0) | self.controllers[0].read()
            }
            0x4017 => {
                self.debug.cpu_reads_io = self.debug.cpu_reads_io.wrapping_add(1);
                (self.open_bus & 0xE0) | self.controllers[1].read()
            }
            0x4000..=0x401F => {
                self.debug.cpu_reads_io = self.debug.cpu_reads_io.wrapping_add(1);
                self.open_bus
            }
            _ => {
                self.debug.cpu_reads_cart = self.debug.cpu_reads_cart.wrapping_add(1);
                self.mapper.prg_read(addr).unwrap_or(self.open_bus)
            }
        };
        self.open_bus = value;
        value
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.debug.cpu_writes = self.debug.cpu_writes.wrapping_add(1);
        self.debug.last_cpu_write_addr = addr;
        self.debug.last_cpu_write_value = value;
        self.maybe_tick_cpu_bus_cycle();
        self.open_bus = value;
        match addr {
            0x0000..=0x1FFF => {
                self.debug.cpu_writes_ram = self.debug.cpu_writes_ram.wrapping_add(1);
                self.ram[(addr as usize) & (RAM_SIZE - 1)] = value;
            }
            0x2000..=0x3FFF => {
                self.debug.cpu_writes_ppu_regs = self.debug.cpu_writes_ppu_regs.wrapping_add(1);
                self.ppu.cpu_write_register(addr, value, &mut self.mapper);
            }
            0x4000..=0x4017 => {
                self.debug.cpu_writes_io = self.debug.cpu_writes_io.wrapping_add(1);
                self.io_latch[(addr - 0x4000) as usize] = value;
                match addr {
                    0x4014 => self.oam_dma(value),
                    0x4016 => {
                        for pad in &mut self.controllers {
                            pad.write_strobe(value);
                        }
                    }
                    _ => {}
                }
            }
            0x4018..=0x401F => {
                self.debug.cpu_writes_io = self.debug.cpu_writes_io.wrapping_add(1);
            }
            _ => {
                self.debug.cpu_writes_cart = self.debug.cpu_writes_cart.wrapping_add(1);
                self.mapper.prg_write(addr, value);
            }
        }
    }
}
