//! Regression tests against real ROM images.
//!
//! These are ignored by default: place the ROMs under `roms/` (relative
//! to the crate) and run with `cargo test -- --ignored`.

use machine_nes::{Nes, NesConfig};
use std::path::PathBuf;

fn rom_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn load(rel: &str) -> Nes {
    let path = rom_path(rel);
    let data = std::fs::read(&path)
        .unwrap_or_else(|e| panic!("missing test ROM {}: {e}", path.display()));
    let mut nes = Nes::new(NesConfig {
        emulate_sound: false,
        ..NesConfig::default()
    });
    nes.load_rom(&data).expect("ROM load failed");
    nes
}

/// Index of the first pure-white pixel in the framebuffer, or -1.
fn first_white_pixel(nes: &Nes) -> i64 {
    nes.framebuffer()
        .iter()
        .position(|&px| px == 0xFFFFFF)
        .map_or(-1, |i| i as i64)
}

#[test]
#[ignore] // Requires roms/croom/croom.nes
fn croom_renders_expected_white_pixels() {
    let mut nes = load("roms/croom/croom.nes");

    let mut observed = Vec::new();
    for _ in 0..6 {
        nes.frame().expect("frame failed");
        observed.push(first_white_pixel(&nes));
    }

    assert_eq!(observed, vec![-1, -1, -1, 2056, 4104, 4104]);
}

#[test]
#[ignore] // Requires roms/nestest/nestest.nes
fn nestest_automation_mode() {
    let mut nes = load("roms/nestest/nestest.nes");

    // Automation entry point: force PC to $C000 and step through the
    // whole official + unofficial opcode suite
    nes.cpu_mut().set_pc(0xC000);
    for _ in 0..26_500 {
        nes.step_instruction().expect("CPU fault during nestest");
    }

    // $0002/$0003 hold the last failed test numbers; zero means clean
    assert_eq!(nes.peek(0x0002), 0x00, "official opcode tests failed");
    assert_eq!(nes.peek(0x0003), 0x00, "unofficial opcode tests failed");
}
