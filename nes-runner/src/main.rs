//! Desktop frontend for the NES emulator.
//!
//! Arrows drive the d-pad, Z/X are A/B, Shift is Select, Enter is
//! Start, the mouse aims and fires the Zapper, F5 resets, Escape quits.

use emu_core::Machine;
use machine_nes::{Nes, NesConfig};
use runner_lib::{run, RunnerConfig};
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let mut scale = 3u32;
    let mut rom_path: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--scale" => match args.next().and_then(|v| v.parse().ok()) {
                Some(n) if (1..=8).contains(&n) => scale = n,
                _ => {
                    eprintln!("--scale wants a factor from 1 to 8");
                    return ExitCode::FAILURE;
                }
            },
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            _ => rom_path = Some(arg),
        }
    }

    let rom_path = match rom_path {
        Some(path) => path,
        None => {
            print_help();
            return ExitCode::FAILURE;
        }
    };

    let data = match std::fs::read(&rom_path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("cannot read {rom_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut console = Nes::new(NesConfig {
        on_status_update: Some(Box::new(|msg| log::info!("{msg}"))),
        ..NesConfig::default()
    });
    if let Err(e) = console.load_file(&rom_path, &data) {
        eprintln!("{rom_path}: {e}");
        return ExitCode::FAILURE;
    }

    let game = Path::new(&rom_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("NES");

    run(
        console,
        RunnerConfig {
            title: format!("{game} - NES"),
            scale,
        },
    );
    ExitCode::SUCCESS
}

fn print_help() {
    eprintln!("usage: nes-runner [--scale N] <rom.nes>");
    eprintln!();
    eprintln!("  --scale N   window scale factor (default 3)");
}
