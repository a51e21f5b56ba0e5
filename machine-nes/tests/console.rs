//! Console-level integration tests built on synthetic in-memory ROMs.

use std::cell::RefCell;
use std::rc::Rc;

use emu_core::Bus;
use machine_nes::{Button, Nes, NesConfig, NesError};

/// Build a 16 KiB NROM image with the given program at $C000 and the
/// reset vector pointing at it.
fn make_rom(program: &[u8]) -> Vec<u8> {
    make_rom_with_fill(program, 0xEA) // NOP filler
}

fn make_rom_with_fill(program: &[u8], fill: u8) -> Vec<u8> {
    let mut data = vec![0u8; 16 + 16384 + 8192];
    data[0..4].copy_from_slice(b"NES\x1a");
    data[4] = 1; // One 16 KiB PRG bank
    data[5] = 1; // One 8 KiB CHR bank
    for byte in &mut data[16..16 + 16384] {
        *byte = fill;
    }
    // $C000 maps to PRG offset 0 on a 16 KiB board
    data[16..16 + program.len()].copy_from_slice(program);
    // Reset vector at $FFFC/$FFFD -> PRG offset $3FFC
    data[16 + 0x3FFC] = 0x00;
    data[16 + 0x3FFD] = 0xC0;
    data
}

fn quiet_nes() -> Nes {
    Nes::new(NesConfig {
        emulate_sound: false,
        ..NesConfig::default()
    })
}

#[test]
fn frame_without_cartridge_fails() {
    let mut nes = quiet_nes();
    assert!(matches!(nes.frame(), Err(NesError::NoCartridge)));
}

#[test]
fn frame_runs_to_completion() {
    let mut nes = quiet_nes();
    // Infinite loop: JMP $C000
    nes.load_rom(&make_rom(&[0x4C, 0x00, 0xC0])).unwrap();
    nes.frame().expect("frame failed");
    nes.frame().expect("second frame failed");
}

#[test]
fn invalid_opcode_crashes_until_reset() {
    let mut nes = quiet_nes();
    // Every byte is $02 (JAM); reset vector still points at $C000
    nes.load_rom(&make_rom_with_fill(&[], 0x02)).unwrap();

    // First frame: invalid opcode surfaces and latches the crash
    let err = nes.frame().unwrap_err();
    assert!(err.to_string().contains("invalid opcode"));
    assert!(nes.crashed());

    // Subsequent frames fail fast with the crash error
    let err = nes.frame().unwrap_err();
    assert!(err.to_string().contains("crashed"));

    // Reset clears the latch
    nes.reset();
    assert!(!nes.crashed());
}

#[test]
fn sram_write_hits_battery_callback_once() {
    let writes = Rc::new(RefCell::new(Vec::new()));
    let writes_cb = Rc::clone(&writes);

    let mut nes = Nes::new(NesConfig {
        emulate_sound: false,
        on_battery_ram_write: Some(Box::new(move |addr, value| {
            writes_cb.borrow_mut().push((addr, value));
        })),
        ..NesConfig::default()
    });

    // LDA #$42 / STA $6000 / LDA #$99 / STA $8000 / JMP self
    let program = [
        0xA9, 0x42, // LDA #$42
        0x8D, 0x00, 0x60, // STA $6000
        0xA9, 0x99, // LDA #$99
        0x8D, 0x00, 0x80, // STA $8000
        0x4C, 0x0A, 0xC0, // JMP $C00A
    ];
    nes.load_rom(&make_rom(&program)).unwrap();
    let rom_byte_before = nes.peek(0x8000);

    nes.frame().expect("frame failed");

    assert_eq!(nes.peek(0x6000), 0x42);
    assert_eq!(*writes.borrow(), vec![(0x6000, 0x42)]);
    // ROM is not writable on mapper 0
    assert_eq!(nes.peek(0x8000), rom_byte_before);
}

#[test]
fn genie_code_substitutes_and_restores() {
    let mut nes = quiet_nes();
    let mut rom = make_rom(&[0x4C, 0x00, 0xC0]);
    // PRG offset $11D9 (CPU $91D9 after 16 KiB mirroring) holds $12
    rom[16 + 0x11D9] = 0x12;
    nes.load_rom(&rom).unwrap();

    nes.add_genie_code("SXIOPO").unwrap();
    assert_eq!(nes.peek(0x91D9), 0xAD);

    nes.set_genie_enabled(false);
    assert_eq!(nes.peek(0x91D9), 0x12);
}

#[test]
fn frame_irq_blocked_after_inhibit_write() {
    let mut nes = quiet_nes();
    // LDA #$40 / STA $4017 / JMP self
    let program = [
        0xA9, 0x40, // LDA #$40
        0x8D, 0x17, 0x40, // STA $4017
        0x4C, 0x05, 0xC0, // JMP $C005
    ];
    nes.load_rom(&make_rom(&program)).unwrap();

    // More than one full 4-step sequence period (29830 CPU cycles)
    nes.frame().unwrap();
    nes.frame().unwrap();

    let status = nes.bus_mut().read(0x4015);
    assert_eq!(status & 0x40, 0);
}

#[test]
fn frame_irq_fires_without_inhibit() {
    let mut nes = quiet_nes();
    // SEI so the CPU ignores the IRQ line, then enable the sequencer
    let program = [
        0x78, // SEI
        0xA9, 0x00, // LDA #$00
        0x8D, 0x17, 0x40, // STA $4017
        0x4C, 0x06, 0xC0, // JMP $C006
    ];
    nes.load_rom(&make_rom(&program)).unwrap();

    nes.frame().unwrap();
    nes.frame().unwrap();

    let status = nes.bus_mut().read(0x4015);
    assert!(status & 0x40 != 0);
}

#[test]
fn controller_shift_register_through_the_bus() {
    let mut nes = quiet_nes();
    nes.load_rom(&make_rom(&[0x4C, 0x00, 0xC0])).unwrap();

    nes.button_down(1, Button::A);
    nes.button_down(1, Button::Start);

    let bus = nes.bus_mut();
    bus.write(0x4016, 1);
    bus.write(0x4016, 0);

    let bits: Vec<u8> = (0..10).map(|_| bus.read(0x4016) & 1).collect();
    //                 A  B  Sel St Up Dn  L  R  then always 1
    assert_eq!(bits, vec![1, 0, 0, 1, 0, 0, 0, 0, 1, 1]);
}

#[test]
fn save_state_round_trips_through_json() {
    let mut nes = quiet_nes();
    let program = [
        0xA9, 0x37, // LDA #$37
        0x85, 0x10, // STA $10
        0x4C, 0x04, 0xC0, // JMP $C004
    ];
    nes.load_rom(&make_rom(&program)).unwrap();
    nes.button_down(1, Button::Left);
    nes.frame().unwrap();

    let json = nes.to_json().unwrap();

    // Perturb the console, then restore
    nes.frame().unwrap();
    nes.bus_mut().write(0x0010, 0x00);
    nes.from_json(&json).unwrap();

    // Capturing again yields the identical state
    assert_eq!(nes.to_json().unwrap(), json);
    assert_eq!(nes.peek(0x0010), 0x37);
}

#[test]
fn invalid_save_state_leaves_console_unchanged() {
    let mut nes = quiet_nes();
    nes.load_rom(&make_rom(&[0x4C, 0x00, 0xC0])).unwrap();
    nes.frame().unwrap();

    let before = nes.to_json().unwrap();
    assert!(nes.from_json("{\"cpu\": 12}").is_err());
    assert!(nes.from_json("not json at all").is_err());
    assert_eq!(nes.to_json().unwrap(), before);
}

#[test]
fn oam_dma_transfers_a_page_mid_program() {
    let mut nes = quiet_nes();
    // LDA #$5A / STA $0200 / LDA #$02 / STA $4014 / JMP self
    let program = [
        0xA9, 0x5A, // LDA #$5A
        0x8D, 0x00, 0x02, // STA $0200
        0xA9, 0x02, // LDA #$02
        0x8D, 0x14, 0x40, // STA $4014
        0x4C, 0x09, 0xC0, // JMP $C009
    ];
    nes.load_rom(&make_rom(&program)).unwrap();
    nes.frame().unwrap();
    assert_eq!(nes.bus().ppu.oam_read(0), 0x5A);
}

#[test]
fn zapper_reads_light_and_trigger() {
    let mut nes = quiet_nes();
    nes.load_rom(&make_rom(&[0x4C, 0x00, 0xC0])).unwrap();

    nes.zapper_move(10, 10);
    nes.zapper_fire_down();
    let value = nes.bus_mut().read(0x4017);
    assert!(value & 0x10 != 0); // Trigger held
    assert!(value & 0x08 != 0); // No light on a dark frame

    nes.zapper_fire_up();
    let value = nes.bus_mut().read(0x4017);
    assert_eq!(value & 0x10, 0);
}
