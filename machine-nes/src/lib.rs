//! Nintendo Entertainment System emulation.
//!
//! This crate provides cycle-aware NES/Famicom emulation:
//! - 2A03 CPU (via the `cpu-2a03` crate), with mid-instruction PPU/APU
//!   catch-up driven from the bus
//! - PPU 2C02: scanline rendering, sprite-0 hit, VBlank/NMI timing
//! - APU: five channels, frame counter, DMC DMA with bus stalls
//! - Mapper support: 0, 1, 2, 3, 4, 5 (partial), 7, 11, 34, 38, 66, 94,
//!   140, 180, 240, 241
//! - Two controllers, Zapper, Game Genie codes, JSON save states
//!
//! Load iNES format (.nes) ROM images.

mod apu;
mod cartridge;
mod controller;
mod genie;
mod mapper;
mod memory;
mod nes;
mod palette;
mod ppu;
mod snapshot;
mod tile;

pub use apu::{Apu, DmcChannel, NoiseChannel, SquareChannel, TriangleChannel};
pub use cartridge::{Cartridge, CartridgeError, Mirroring};
pub use controller::{Button, Controller, Zapper};
pub use genie::{
    decode as decode_genie_code, encode as encode_genie_code, GameGenie, GenieCode, GenieError,
};
pub use mapper::Mapper;
pub use memory::NesBus;
pub use nes::{Nes, NesConfig, NesError};
pub use ppu::{Ppu, FB_HEIGHT, FB_WIDTH};
pub use snapshot::{SaveState, SnapshotError};
pub use tile::Tile;
