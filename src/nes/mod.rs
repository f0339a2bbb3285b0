pub mod bus;
pub mod cartridge;
pub mod config;
pub mod controller;
pub mod cpu;
pub mod error;
pub mod mapper;
pub mod opcodes;
pub mod ppu;
pub mod trace;

use anyhow::Result;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use bus::Bus;
use cpu::{Cpu, CpuRegisters, Interrupt};
use mapper::Mapper;
use ppu::PpuDebugCounters;

pub use cartridge::{Cartridge, CartridgeHeader, Mirroring};
pub use config::NesConfig;
pub use controller::{
    BUTTON_A, BUTTON_B, BUTTON_DOWN, BUTTON_LEFT, BUTTON_RIGHT, BUTTON_SELECT, BUTTON_START,
    BUTTON_UP,
};
pub use cpu::{
    FLAG_BREAK, FLAG_CARRY, FLAG_DECIMAL, FLAG_INTERRUPT, FLAG_NEGATIVE, FLAG_OVERFLOW,
    FLAG_UNUSED, FLAG_ZERO,
};
pub use error::CartridgeError;
pub use ppu::{FRAME_HEIGHT, FRAME_WIDTH, FrameBuffer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NesDebugCounters {
    pub frame_count: u64,
    pub cpu_steps: u64,
    pub cpu_reads: u64,
    pub cpu_writes: u64,
    pub cpu_reads_ram: u64,
    pub cpu_reads_ppu_regs: u64,
    pub cpu_reads_io: u64,
    pub cpu_reads_cart: u64,
    pub cpu_writes_ram: u64,
    pub cpu_writes_ppu_regs: u64,
    pub cpu_writes_io: u64,
    pub cpu_writes_cart: u64,
    pub ppu_cycles: u64,
    pub dma_transfers: u64,
    pub dma_stall_cycles: u64,
    pub nmi_serviced_count: u64,
    pub irq_serviced_count: u64,
    pub last_cpu_read_addr: u16,
    pub last_cpu_write_addr: u16,
    pub last_cpu_write_value: u8,
}

/// Complete machine state. Restoring it and running on produces the same
/// frames as never having stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    cpu: Cpu,
    bus: Bus,
}

pub struct Nes {
    cpu: Cpu,
    bus: Bus,
    config: NesConfig,
    debug_events: VecDeque<String>,
}

impl Nes {
    pub fn new(cart: Cartridge) -> Result<Self> {
        Self::with_config(cart, NesConfig::default())
    }

    pub fn with_config(cart: Cartridge, config: NesConfig) -> Result<Self> {
        let mapper = Mapper::new(cart)?;
        let loaded = format!("ROM loaded: mapper {} ({})", mapper.mapper_id(), mapper.name());

        let mut nes = Self {
            cpu: Cpu::new(),
            bus: Bus::new(mapper, config.ram_fill),
            debug_events: VecDeque::with_capacity(config.debug_event_capacity.min(4096)),
            config,
        };
        nes.push_debug_event(loaded);
        nes.run_reset();
        Ok(nes)
    }

    pub fn mapper_name(&self) -> &'static str {
        self.bus.mapper.name()
    }

    pub fn mapper_id(&self) -> u16 {
        self.bus.mapper.mapper_id()
    }

    pub fn config(&self) -> &NesConfig {
        &self.config
    }

    /// Reset button: CPU reset sequence, PPU control registers cleared.
    /// Memories, cartridge state and CPU A/X/Y survive.
    pub fn reset(&mut self) {
        self.bus.reset();
        self.run_reset();
    }

    fn run_reset(&mut self) {
        self.bus.begin_step();
        let cycles = self.cpu.reset(&mut self.bus);
        self.bus.end_step(cycles);
        self.push_debug_event(format!("CPU reset, PC=${:04X}", self.cpu.registers().pc));
    }

    /// One CPU instruction, interrupt entry, or stalled DMA cycle.
    pub fn step(&mut self) -> u32 {
        if self.bus.consume_dma_stall() {
            self.bus.debug.dma_stall_cycles = self.bus.debug.dma_stall_cycles.wrapping_add(1);
            return 1;
        }

        if self.bus.take_nmi() {
            self.cpu.request_nmi();
        }
        self.cpu.set_irq_line(self.bus.irq_line());

        let was_jammed = self.cpu.jammed();
        self.bus.debug.cpu_steps = self.bus.debug.cpu_steps.wrapping_add(1);
        self.bus.begin_step();
        let cycles = self.cpu.step(&mut self.bus);
        self.bus.end_step(cycles);

        match self.cpu.last_serviced() {
            Some(Interrupt::Nmi) => {
                self.bus.debug.nmi_serviced_count =
                    self.bus.debug.nmi_serviced_count.wrapping_add(1);
                trace!(
                    "NMI serviced at scanline/dot {:?}",
                    self.debug_ppu_scanline_dot()
                );
            }
            Some(Interrupt::Irq) => {
                self.bus.debug.irq_serviced_count =
                    self.bus.debug.irq_serviced_count.wrapping_add(1);
                trace!("IRQ serviced at CPU cycle {}", self.bus.cpu_cycles());
            }
            None => {}
        }

        if let Some((page, stall)) = self.bus.take_dma_started() {
            self.push_debug_event(format!("OAM DMA page=${page:02X} stall_cycles={stall}"));
        }

        if !was_jammed && self.cpu.jammed() {
            let pc = self.cpu.registers().pc;
            self.push_debug_event(format!(
                "CPU jammed on ${:02X} at ${pc:04X}",
                self.bus.peek(pc)
            ));
        }

        cycles
    }

    /// Steps until the PPU publishes a frame and returns it. A frame that was
    /// published by earlier `step` calls is returned without stepping.
    pub fn run_frame(&mut self) -> &FrameBuffer {
        let mut steps: usize = 0;
        loop {
            if self.bus.ppu.take_frame_ready() {
                self.bus.debug.frame_count = self.bus.debug.frame_count.wrapping_add(1);
                break;
            }
            if steps >= self.config.frame_step_guard {
                self.push_debug_event(format!("Frame guard tripped at {steps} CPU steps"));
                break;
            }
            self.step();
            steps += 1;
        }

        self.bus.ppu.frame_buffer()
    }

    pub fn frame_buffer(&self) -> &FrameBuffer {
        self.bus.ppu.frame_buffer()
    }

    /// Dot count of the most recently completed frame.
    pub fn last_frame_dots(&self) -> u32 {
        self.bus.ppu.last_frame_dots()
    }

    pub fn frame_count(&self) -> u64 {
        self.bus.ppu.frame_count()
    }

    pub fn total_cycles(&self) -> u64 {
        self.bus.cpu_cycles()
    }

    /// Port 0 is $4016, port 1 is $4017. Other ports are ignored.
    pub fn set_controller_state(&mut self, port: usize, buttons: u8) {
        self.bus.set_controller(port, buttons);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            cpu: self.cpu.clone(),
            bus: self.bus.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: &Snapshot) {
        self.cpu = snapshot.cpu.clone();
        self.bus = snapshot.bus.clone();
        self.push_debug_event(format!(
            "Snapshot restored at CPU cycle {}",
            self.bus.cpu_cycles()
        ));
    }

    /// Trace line for the instruction about to execute.
    pub fn trace(&self) -> String {
        trace::trace_line(&self.cpu, &self.bus)
    }

    pub fn cpu_registers(&self) -> CpuRegisters {
        self.cpu.registers()
    }

    pub fn jammed(&self) -> bool {
        self.cpu.jammed()
    }

    /// CPU address space without read side effects.
    pub fn peek(&self, addr: u16) -> u8 {
        self.bus.peek(addr)
    }

    pub fn debug_ppu_regs(&self) -> (u8, u8, u8) {
        (self.bus.ppu.ctrl(), self.bus.ppu.mask(), self.bus.ppu.status())
    }

    pub fn debug_ppu_scanline_dot(&self) -> (u16, u16) {
        (self.bus.ppu.scanline(), self.bus.ppu.dot())
    }

    pub fn debug_peek_vram(&self, index: usize) -> u8 {
        self.bus.ppu.peek_vram(index)
    }

    pub fn debug_peek_palette(&self, index: usize) -> u8 {
        self.bus.ppu.peek_palette(index)
    }

    pub fn debug_peek_oam(&self, index: usize) -> u8 {
        self.bus.ppu.peek_oam(index)
    }

    pub fn debug_counters(&self) -> NesDebugCounters {
        self.bus.debug
    }

    pub fn debug_ppu_counters(&self) -> PpuDebugCounters {
        self.bus.ppu.debug_counters()
    }

    pub fn debug_mapper_state(&self) -> String {
        self.bus.mapper.debug_state()
    }

    pub fn debug_recent_events(&self, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }

        self.debug_events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Every machine event goes to the `debug` log and to the event ring.
    fn push_debug_event<S: Into<String>>(&mut self, event: S) {
        let event = event.into();
        debug!("{event}");
        if self.config.debug_event_capacity == 0 {
            return;
        }
        if self.debug_events.len() >= self.config.debug_event_capacity {
            self.debug_events.pop_front();
        }
        self.debug_events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, Once};
    use std::thread::{self, ThreadId};

    use super::*;

    static CAPTURED: Mutex<Vec<(ThreadId, String)>> = Mutex::new(Vec::new());

    struct CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            CAPTURED
                .lock()
                .unwrap()
                .push((thread::current().id(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    /// Log lines emitted so far by the calling test's thread.
    fn captured_logs() -> Vec<String> {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| {
            log::set_logger(&CaptureLogger).unwrap();
            log::set_max_level(log::LevelFilter::Trace);
        });

        let id = thread::current().id();
        CAPTURED
            .lock()
            .unwrap()
            .iter()
            .filter(|(thread, _)| *thread == id)
            .map(|(_, line)| line.clone())
            .collect()
    }

    fn nop_cart() -> Cartridge {
        let mut prg = vec![0xEA; 0x4000];
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;
        let header = CartridgeHeader {
            mapper_id: 0,
            prg_rom_size: prg.len(),
            chr_rom_size: 0x2000,
            mirroring: Mirroring::Horizontal,
            has_battery: false,
        };
        Cartridge::new(header, prg, vec![0; 0x2000]).unwrap()
    }

    #[test]
    fn power_on_trace_matches_nestest_layout() {
        let nes = Nes::new(nop_cart()).unwrap();
        assert_eq!(
            nes.trace(),
            "8000  EA        NOP                             A:00 X:00 Y:00 P:24 SP:FD PPU:  0, 21 CYC:7"
        );
    }

    #[test]
    fn debug_event_ring_respects_capacity() {
        let config = NesConfig {
            debug_event_capacity: 2,
            ..NesConfig::default()
        };
        let mut nes = Nes::with_config(nop_cart(), config).unwrap();
        nes.reset();
        nes.reset();

        let events = nes.debug_recent_events(10);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.starts_with("CPU reset")));
        assert!(nes.debug_recent_events(0).is_empty());
    }

    #[test]
    fn each_reset_is_logged_once() {
        let before = captured_logs().len();
        let mut nes = Nes::new(nop_cart()).unwrap();
        nes.reset();

        let lines = captured_logs().split_off(before);
        let resets = lines
            .iter()
            .filter(|line| line.starts_with("CPU reset"))
            .count();
        assert_eq!(resets, 2, "{lines:?}");
        assert_eq!(
            lines
                .iter()
                .filter(|line| line.starts_with("ROM loaded"))
                .count(),
            1
        );
    }

    #[test]
    fn unsupported_mapper_is_a_typed_error() {
        let header = CartridgeHeader {
            mapper_id: 5,
            prg_rom_size: 0x4000,
            chr_rom_size: 0,
            mirroring: Mirroring::Vertical,
            has_battery: false,
        };
        let cart = Cartridge::new(header, vec![0; 0x4000], Vec::new()).unwrap();
        let err = Nes::new(cart).err().unwrap();
        assert_eq!(
            err.downcast_ref::<CartridgeError>(),
            Some(&CartridgeError::UnsupportedMapper(5))
        );
    }
}
