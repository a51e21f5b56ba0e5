//! Save states.
//!
//! A snapshot is a nested record of `{cpu, ppu, apu, mmap}` built from
//! primitive numbers, booleans and byte arrays, serialised to JSON with
//! serde. Byte storage round-trips as plain integer sequences. Restore
//! validates the whole structure before touching the console, so a
//! malformed state leaves it unchanged. Rendering caches (decoded tiles,
//! nametable caches, mix tables) are rebuilt from VRAM/OAM rather than
//! stored.
//!
//! Snapshots are only consistent between frames; they do not capture
//! mid-instruction catch-up state.

use serde::{Deserialize, Serialize};
use std::fmt;

use emu_core::IrqKind;

use crate::apu::{DmcChannel, NoiseChannel, SquareChannel, TriangleChannel};
use crate::cartridge::Mirroring;
use crate::controller::{Controller, Zapper};
use crate::genie::GameGenie;
use crate::mapper::Mapper;
use crate::nes::{Nes, NesError};

/// Error raised on restore.
#[derive(Debug)]
pub enum SnapshotError {
    /// Not valid JSON / wrong shape.
    Parse(String),
    /// Parsed, but a field has the wrong size or value.
    Mismatch(&'static str),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "invalid save state: {e}"),
            Self::Mismatch(what) => write!(f, "save state mismatch: {what}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

#[derive(Clone, Serialize, Deserialize)]
pub struct CpuState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub pc: u16,
    pub p: u8,
    pub irq_requested: bool,
    /// 0 = IRQ, 1 = NMI, 2 = reset.
    pub irq_kind: u8,
    pub cycles_to_halt: u32,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PpuState {
    pub vram: Vec<u8>,
    pub oam: Vec<u8>,
    pub ctrl: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub v: u16,
    pub t: u16,
    pub fine_x: u8,
    pub write_toggle: bool,
    pub read_buffer: u8,
    pub open_bus: u8,
    pub open_bus_decay: u8,
    pub scanline: u16,
    pub cur_x: u16,
    pub nmi_counter: u8,
    pub spr0_hit_x: i32,
    pub spr0_hit_y: i32,
    pub mirroring: Mirroring,
    pub chr_writable: bool,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ApuState {
    pub square1: SquareChannel,
    pub square2: SquareChannel,
    pub triangle: TriangleChannel,
    pub noise: NoiseChannel,
    pub dmc: DmcChannel,
    pub five_step: bool,
    pub frame_irq_inhibit: bool,
    pub frame_irq_active: bool,
    pub frame_cycle: i64,
    pub frame_step: usize,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MmapState {
    pub ram: Vec<u8>,
    pub sram: Vec<u8>,
    pub prg: Vec<u8>,
    pub mapper: Mapper,
    pub data_bus: u8,
    pub genie: GameGenie,
    pub joy1: Controller,
    pub joy2: Controller,
    pub zapper: Zapper,
}

/// Complete console snapshot.
#[derive(Clone, Serialize, Deserialize)]
pub struct SaveState {
    pub cpu: CpuState,
    pub ppu: PpuState,
    pub apu: ApuState,
    pub mmap: MmapState,
}

fn irq_kind_to_u8(kind: IrqKind) -> u8 {
    match kind {
        IrqKind::Normal => 0,
        IrqKind::Nmi => 1,
        IrqKind::Reset => 2,
    }
}

fn irq_kind_from_u8(value: u8) -> Result<IrqKind, SnapshotError> {
    match value {
        0 => Ok(IrqKind::Normal),
        1 => Ok(IrqKind::Nmi),
        2 => Ok(IrqKind::Reset),
        _ => Err(SnapshotError::Mismatch("irq kind")),
    }
}

impl SaveState {
    /// Capture the console state.
    pub fn capture(nes: &Nes) -> Self {
        let cpu = &nes.cpu;
        let bus = &nes.bus;
        let (irq_requested, irq_kind) = cpu.irq_state();

        Self {
            cpu: CpuState {
                a: cpu.a(),
                x: cpu.x(),
                y: cpu.y(),
                s: cpu.s(),
                pc: cpu.pc(),
                p: cpu.status(),
                irq_requested,
                irq_kind: irq_kind_to_u8(irq_kind),
                cycles_to_halt: cpu.pending_halt(),
            },
            ppu: PpuState {
                vram: bus.ppu.vram.clone(),
                oam: bus.ppu.oam.to_vec(),
                ctrl: bus.ppu.ctrl,
                mask: bus.ppu.mask,
                status: bus.ppu.status,
                oam_addr: bus.ppu.oam_addr,
                v: bus.ppu.v,
                t: bus.ppu.t,
                fine_x: bus.ppu.fine_x,
                write_toggle: bus.ppu.write_toggle,
                read_buffer: bus.ppu.read_buffer,
                open_bus: bus.ppu.open_bus,
                open_bus_decay: bus.ppu.open_bus_decay,
                scanline: bus.ppu.scanline,
                cur_x: bus.ppu.cur_x,
                nmi_counter: bus.ppu.nmi_counter,
                spr0_hit_x: bus.ppu.spr0_hit_x,
                spr0_hit_y: bus.ppu.spr0_hit_y,
                mirroring: bus.ppu.mirroring,
                chr_writable: bus.ppu.chr_writable,
            },
            apu: ApuState {
                square1: bus.apu.square1.clone(),
                square2: bus.apu.square2.clone(),
                triangle: bus.apu.triangle.clone(),
                noise: bus.apu.noise.clone(),
                dmc: bus.apu.dmc.clone(),
                five_step: bus.apu.five_step,
                frame_irq_inhibit: bus.apu.frame_irq_inhibit,
                frame_irq_active: bus.apu.frame_irq_active,
                frame_cycle: bus.apu.frame_cycle,
                frame_step: bus.apu.frame_step,
            },
            mmap: MmapState {
                ram: bus.ram.to_vec(),
                sram: bus.sram.to_vec(),
                prg: bus.prg.to_vec(),
                mapper: bus.mapper.clone(),
                data_bus: bus.data_bus(),
                genie: bus.genie.clone(),
                joy1: bus.joy1.clone(),
                joy2: bus.joy2.clone(),
                zapper: bus.zapper.clone(),
            },
        }
    }

    /// Validate structure sizes before any mutation.
    fn validate(&self) -> Result<(), SnapshotError> {
        if self.ppu.vram.len() != 0x8000 {
            return Err(SnapshotError::Mismatch("vram size"));
        }
        if self.ppu.oam.len() != 256 {
            return Err(SnapshotError::Mismatch("oam size"));
        }
        if self.mmap.ram.len() != 0x800 {
            return Err(SnapshotError::Mismatch("ram size"));
        }
        if self.mmap.sram.len() != 0x2000 {
            return Err(SnapshotError::Mismatch("sram size"));
        }
        if self.mmap.prg.len() != 0x8000 {
            return Err(SnapshotError::Mismatch("prg window size"));
        }
        irq_kind_from_u8(self.cpu.irq_kind)?;
        Ok(())
    }

    /// Apply the snapshot to a console. The console must already have a
    /// cartridge loaded (ROM data is not part of the state).
    pub fn restore(&self, nes: &mut Nes) -> Result<(), SnapshotError> {
        self.validate()?;
        if nes.bus.cart.is_none() {
            return Err(SnapshotError::Mismatch("no cartridge loaded"));
        }

        // CPU
        let cpu = &mut nes.cpu;
        cpu.set_a(self.cpu.a);
        cpu.set_x(self.cpu.x);
        cpu.set_y(self.cpu.y);
        cpu.set_s(self.cpu.s);
        cpu.set_pc(self.cpu.pc);
        cpu.set_status(self.cpu.p);
        cpu.set_irq_state(
            self.cpu.irq_requested,
            irq_kind_from_u8(self.cpu.irq_kind)?,
        );
        cpu.set_pending_halt(self.cpu.cycles_to_halt);

        // PPU (caches rebuilt from VRAM below)
        let ppu = &mut nes.bus.ppu;
        ppu.vram.copy_from_slice(&self.ppu.vram);
        ppu.oam.copy_from_slice(&self.ppu.oam);
        ppu.ctrl = self.ppu.ctrl;
        ppu.mask = self.ppu.mask;
        ppu.status = self.ppu.status;
        ppu.oam_addr = self.ppu.oam_addr;
        ppu.v = self.ppu.v;
        ppu.t = self.ppu.t;
        ppu.fine_x = self.ppu.fine_x;
        ppu.write_toggle = self.ppu.write_toggle;
        ppu.read_buffer = self.ppu.read_buffer;
        ppu.open_bus = self.ppu.open_bus;
        ppu.open_bus_decay = self.ppu.open_bus_decay;
        ppu.scanline = self.ppu.scanline;
        ppu.cur_x = self.ppu.cur_x;
        ppu.nmi_counter = self.ppu.nmi_counter;
        ppu.spr0_hit_x = self.ppu.spr0_hit_x;
        ppu.spr0_hit_y = self.ppu.spr0_hit_y;
        ppu.chr_writable = self.ppu.chr_writable;
        ppu.set_mirroring(self.ppu.mirroring);
        ppu.rebuild_caches();
        ppu.refresh_emphasis();

        // APU (mix tables are static; IIR state is transient)
        let apu = &mut nes.bus.apu;
        apu.square1 = self.apu.square1.clone();
        apu.square2 = self.apu.square2.clone();
        apu.triangle = self.apu.triangle.clone();
        apu.noise = self.apu.noise.clone();
        apu.dmc = self.apu.dmc.clone();
        apu.five_step = self.apu.five_step;
        apu.frame_irq_inhibit = self.apu.frame_irq_inhibit;
        apu.frame_irq_active = self.apu.frame_irq_active;
        apu.frame_cycle = self.apu.frame_cycle;
        apu.frame_step = self.apu.frame_step;

        // Memory map
        nes.bus.ram.copy_from_slice(&self.mmap.ram);
        nes.bus.sram.copy_from_slice(&self.mmap.sram);
        nes.bus.prg.copy_from_slice(&self.mmap.prg);
        nes.bus.mapper = self.mmap.mapper.clone();
        nes.bus.set_data_bus(self.mmap.data_bus);
        nes.bus.genie = self.mmap.genie.clone();
        nes.bus.joy1 = self.mmap.joy1.clone();
        nes.bus.joy2 = self.mmap.joy2.clone();
        nes.bus.zapper = self.mmap.zapper.clone();

        nes.crashed = false;
        Ok(())
    }
}

impl Nes {
    /// Capture a save state. Consistent only between frames.
    pub fn save_state(&self) -> SaveState {
        SaveState::capture(self)
    }

    /// Restore a save state. On error the console is unchanged.
    pub fn restore_state(&mut self, state: &SaveState) -> Result<(), NesError> {
        state.restore(self).map_err(NesError::Snapshot)
    }

    /// Serialise the console state to JSON.
    pub fn to_json(&self) -> Result<String, NesError> {
        serde_json::to_string(&self.save_state())
            .map_err(|e| NesError::Snapshot(SnapshotError::Parse(e.to_string())))
    }

    /// Restore console state from JSON. On error the console is
    /// unchanged.
    pub fn from_json(&mut self, json: &str) -> Result<(), NesError> {
        let state: SaveState = serde_json::from_str(json)
            .map_err(|e| NesError::Snapshot(SnapshotError::Parse(e.to_string())))?;
        self.restore_state(&state)
    }
}
