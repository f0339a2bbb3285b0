use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use famicore::nes::{Cartridge, Nes, NesConfig};
use sha1::{Digest, Sha1};

#[derive(Debug, Clone)]
struct Config {
    rom: Option<PathBuf>,
    config: Option<PathBuf>,
    frames: u32,
    trace_lines: usize,
    dump_state: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rom: None,
            config: None,
            frames: 60,
            trace_lines: 0,
            dump_state: None,
        }
    }
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rom" => {
                let value = args
                    .next()
                    .context("--rom requires a path, e.g. --rom roms/nestest.nes")?;
                cfg.rom = Some(PathBuf::from(value));
            }
            "--config" => {
                let value = args
                    .next()
                    .context("--config requires a path to a JSON file")?;
                cfg.config = Some(PathBuf::from(value));
            }
            "--frames" => {
                let value = args
                    .next()
                    .context("--frames requires an integer, e.g. --frames 120")?;
                cfg.frames = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid --frames value: {value}"))?;
            }
            "--trace" => {
                let value = args
                    .next()
                    .context("--trace requires an instruction count, e.g. --trace 8991")?;
                cfg.trace_lines = value
                    .parse::<usize>()
                    .with_context(|| format!("invalid --trace value: {value}"))?;
            }
            "--dump-state" => {
                let value = args
                    .next()
                    .context("--dump-state requires an output path")?;
                cfg.dump_state = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unknown argument: {other}\nUse --help to view supported options.");
            }
        }
    }

    Ok(cfg)
}

fn print_help() {
    println!(
        "Headless runner for famicore\n\n\
Usage:\n\
  cargo run --bin famicore_trace -- --rom <path> [options]\n\n\
Options:\n\
  --rom <path>          iNES file to load\n\
  --config <path>       JSON NesConfig (missing fields use defaults)\n\
  --frames <n>          Frames to run after tracing (default: 60)\n\
  --trace <n>           Print a nestest-style line for the first n instructions\n\
  --dump-state <path>   Write the final snapshot as JSON\n\
  --help, -h            Show this help\n\n\
Set RUST_LOG=debug to log machine events as they happen, trace for interrupts."
    );
}

fn hash_frame(pixels: &[u8]) -> String {
    let digest = Sha1::digest(pixels);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn load_config(path: Option<&PathBuf>) -> Result<NesConfig> {
    let Some(path) = path else {
        return Ok(NesConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cfg = parse_args()?;
    let rom_path = cfg
        .rom
        .clone()
        .context("--rom is required\nUse --help to view supported options.")?;

    let bytes =
        fs::read(&rom_path).with_context(|| format!("failed to read {}", rom_path.display()))?;
    let cart = Cartridge::from_ines(&bytes)
        .with_context(|| format!("failed to parse {}", rom_path.display()))?;
    let nes_config = load_config(cfg.config.as_ref())?;
    let mut nes = Nes::with_config(cart, nes_config)?;

    println!(
        "Loaded {} (mapper {} {})",
        rom_path.display(),
        nes.mapper_id(),
        nes.mapper_name()
    );

    for _ in 0..cfg.trace_lines {
        println!("{}", nes.trace());
        nes.step();
        if nes.jammed() {
            println!("CPU jammed at ${:04X}", nes.cpu_registers().pc);
            break;
        }
    }

    for frame in 0..cfg.frames {
        let hash = hash_frame(nes.run_frame().pixels());
        println!(
            "frame {:>5} dots={} cycles={} sha1={hash}",
            frame + 1,
            nes.last_frame_dots(),
            nes.total_cycles()
        );
    }

    for event in nes.debug_recent_events(8).iter().rev() {
        println!("event: {event}");
    }

    if let Some(path) = cfg.dump_state.as_ref() {
        let json = serde_json::to_string(&nes.snapshot()).context("failed to encode snapshot")?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        println!("Snapshot written to {}", path.display());
    }

    Ok(())
}
