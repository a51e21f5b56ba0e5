//! Console orchestrator.
//!
//! `Nes` owns the CPU and the bus and drives whole video frames. The
//! frame loop executes one instruction at a time, feeds the APU the
//! cycles not already consumed by mid-instruction catch-up, then walks
//! the PPU forward dot by dot - checking the sprite-0 hit position, the
//! NMI delay and scanline wrap at every dot. DMA stalls surface as halt
//! cycles consumed in small slices at the top of the loop.
//!
//! A CPU fault (JAM opcode) latches the `crashed` flag; further frames
//! fail until `reset()` or a new ROM load.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use cpu_2a03::{CpuError, Rp2a03};
use emu_core::{AudioConfig, Cpu, IrqKind, KeyCode, Machine, VideoConfig};

use crate::apu::Apu;
use crate::cartridge::{Cartridge, CartridgeError};
use crate::controller::Button;
use crate::mapper::Mapper;
use crate::memory::NesBus;
use crate::ppu::{FB_HEIGHT, FB_WIDTH};
use crate::snapshot::SnapshotError;

/// NTSC refresh rate.
const NTSC_FPS: f32 = 60.0988;

/// Console-level errors.
#[derive(Debug)]
pub enum NesError {
    /// ROM rejected at load time.
    Cartridge(CartridgeError),
    /// The CPU hit an unexecutable opcode; the console is now crashed.
    Cpu(CpuError),
    /// A previous frame crashed the console; reset or load a new ROM.
    Crashed,
    /// `frame()` called with no cartridge installed.
    NoCartridge,
    /// Internal VRAM mirror-table fault (emulator bug, not a game bug).
    InvalidVramAddress(u16),
    /// Save-state restore failed; the console is unchanged.
    Snapshot(SnapshotError),
}

impl fmt::Display for NesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cartridge(e) => write!(f, "{e}"),
            Self::Cpu(e) => write!(f, "{e}"),
            Self::Crashed => write!(f, "crashed: reset or load a new ROM"),
            Self::NoCartridge => write!(f, "no cartridge loaded"),
            Self::InvalidVramAddress(addr) => {
                write!(f, "invalid VRAM address ${addr:04X} (internal error)")
            }
            Self::Snapshot(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for NesError {}

impl From<CartridgeError> for NesError {
    fn from(e: CartridgeError) -> Self {
        Self::Cartridge(e)
    }
}

pub type FrameCallback = Box<dyn FnMut(&[u32])>;
pub type AudioCallback = Box<dyn FnMut(f32, f32)>;
pub type StatusCallback = Box<dyn FnMut(&str)>;
pub type BatteryCallback = Box<dyn FnMut(u16, u8)>;

/// Console configuration and host callbacks.
pub struct NesConfig {
    /// APU output rate in Hz.
    pub sample_rate: u32,
    /// Host frame rate the audio pacing assumes (typically 60).
    pub preferred_frame_rate: u32,
    /// Disable to skip sample generation entirely.
    pub emulate_sound: bool,
    /// Called once per frame with the 256x240 RGB framebuffer.
    pub on_frame: Option<FrameCallback>,
    /// Called per output sample with L/R in [-1, 1). When unset,
    /// samples accumulate in a buffer drained by `take_audio_buffer`.
    pub on_audio_sample: Option<AudioCallback>,
    /// Human-readable status strings (ROM loaded, reset, crash).
    pub on_status_update: Option<StatusCallback>,
    /// Called for every CPU write into $6000-$7FFF.
    pub on_battery_ram_write: Option<BatteryCallback>,
}

impl Default for NesConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            preferred_frame_rate: 60,
            emulate_sound: true,
            on_frame: None,
            on_audio_sample: None,
            on_status_update: None,
            on_battery_ram_write: None,
        }
    }
}

/// The console.
pub struct Nes {
    pub(crate) cpu: Rp2a03,
    pub(crate) bus: NesBus,
    pub(crate) crashed: bool,
    sample_rate: u32,
    preferred_frame_rate: u32,
    on_frame: Option<FrameCallback>,
    on_audio_sample: Option<AudioCallback>,
    on_status_update: Option<StatusCallback>,
    on_battery_ram_write: Option<BatteryCallback>,
    /// Interleaved stereo samples kept when no audio callback is set.
    audio_buffer: Vec<f32>,
    /// Completion times of recent frames, for `fps()`.
    frame_times: VecDeque<Instant>,
}

impl Nes {
    pub fn new(config: NesConfig) -> Self {
        let apu = Apu::new(config.sample_rate, config.emulate_sound);
        Self {
            cpu: Rp2a03::new(),
            bus: NesBus::new(apu),
            crashed: false,
            sample_rate: config.sample_rate,
            preferred_frame_rate: config.preferred_frame_rate.max(1),
            on_frame: config.on_frame,
            on_audio_sample: config.on_audio_sample,
            on_status_update: config.on_status_update,
            on_battery_ram_write: config.on_battery_ram_write,
            audio_buffer: Vec::new(),
            frame_times: VecDeque::new(),
        }
    }

    fn status(&mut self, message: &str) {
        if let Some(cb) = &mut self.on_status_update {
            cb(message);
        }
    }

    /// Parse and install an iNES image, then reset.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), NesError> {
        let cart = Cartridge::parse(data)?;
        let mapper = cart.mapper_number();
        let prg_banks = cart.prg_bank_count();
        self.bus.install_cartridge(cart)?;
        log::info!("loaded ROM: mapper {mapper}, {prg_banks} PRG banks");
        self.reset();
        self.status(&format!("ROM loaded (mapper {mapper})"));
        Ok(())
    }

    /// Reset the console. Clears the crash latch; SRAM survives.
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu = Rp2a03::new();
        self.cpu.reset(&mut self.bus);
        self.crashed = false;
        self.audio_buffer.clear();
        self.status("Reset");
    }

    /// Run one video frame.
    pub fn frame(&mut self) -> Result<(), NesError> {
        if self.crashed {
            return Err(NesError::Crashed);
        }
        if self.bus.cart.is_none() {
            return Err(NesError::NoCartridge);
        }

        self.bus.ppu.start_frame();
        if let Mapper::Mmc5(state) = &mut self.bus.mapper {
            state.start_frame();
        }

        'frame: loop {
            // Dead cycles owed to DMA: consume in small slices, keeping
            // the APU and PPU advancing underneath
            if self.cpu.pending_halt() > 0 {
                let cycles = self.cpu.take_halt_cycles(8);
                self.bus.clock_apu_frame(cycles);
                self.bus.clock_apu_channels(cycles);
                for _ in 0..cycles * 3 {
                    self.bus.step_ppu_dot();
                    if self.bus.frame_done() {
                        break 'frame;
                    }
                }
                continue;
            }

            // IRQ lines are level-sensitive: holders re-assert each
            // instruction until acknowledged
            if self.bus.apu.irq_asserted() || self.bus.mapper.irq_pending() {
                <Rp2a03 as Cpu<NesBus>>::request_irq(&mut self.cpu, IrqKind::Normal);
            }

            self.bus.begin_instruction();
            let cycles = match self.cpu.emulate(&mut self.bus) {
                Ok(cycles) => cycles,
                Err(e) => {
                    self.crashed = true;
                    self.status(&format!("CPU crash: {e}"));
                    return Err(NesError::Cpu(e));
                }
            };
            if let Some(addr) = self.bus.ppu.take_fault() {
                self.crashed = true;
                return Err(NesError::InvalidVramAddress(addr));
            }

            // The frame counter gets the cycles not already applied by
            // $4015 catch-up; channel timers always get the full count
            let frame_cycles = cycles.saturating_sub(self.bus.apu_catchup_cycles());
            self.bus.clock_apu_frame(frame_cycles);
            self.bus.clock_apu_channels(cycles);

            if self.bus.take_nmi() {
                // VBlank NMI arrived during catch-up inside the
                // instruction: deliver it and end the frame
                <Rp2a03 as Cpu<NesBus>>::request_irq(&mut self.cpu, IrqKind::Nmi);
            }
            if self.bus.frame_done() {
                break;
            }

            // Walk the PPU through the dots this instruction owes
            let dots = (3 * cycles).saturating_sub(self.bus.ppu_catchup_dots());
            for _ in 0..dots {
                self.bus.step_ppu_dot();
                if self.bus.take_nmi() {
                    <Rp2a03 as Cpu<NesBus>>::request_irq(&mut self.cpu, IrqKind::Nmi);
                }
                if self.bus.frame_done() {
                    break 'frame;
                }
            }

            <Rp2a03 as Cpu<NesBus>>::halt_cycles(&mut self.cpu, self.bus.take_dma_stall());
            self.dispatch_battery_writes();
        }

        self.bus.take_frame_done();
        <Rp2a03 as Cpu<NesBus>>::halt_cycles(&mut self.cpu, self.bus.take_dma_stall());
        self.dispatch_battery_writes();
        self.dispatch_audio();
        if let Some(cb) = &mut self.on_frame {
            cb(self.bus.ppu.framebuffer());
        }

        self.frame_times.push_back(Instant::now());
        while self.frame_times.len() > 60 {
            self.frame_times.pop_front();
        }
        Ok(())
    }

    fn dispatch_battery_writes(&mut self) {
        let writes = self.bus.take_battery_writes();
        if let Some(cb) = &mut self.on_battery_ram_write {
            for (addr, value) in writes {
                cb(addr, value);
            }
        }
    }

    fn dispatch_audio(&mut self) {
        let samples = self.bus.apu.take_samples();
        if samples.is_empty() {
            return;
        }
        match &mut self.on_audio_sample {
            Some(cb) => {
                for (l, r) in samples {
                    cb(l, r);
                }
            }
            None => {
                for (l, r) in samples {
                    self.audio_buffer.push(l);
                    self.audio_buffer.push(r);
                }
            }
        }
    }

    /// Measured frame rate over the last second of `frame()` calls.
    pub fn fps(&self) -> f32 {
        match (self.frame_times.front(), self.frame_times.back()) {
            (Some(first), Some(last)) if self.frame_times.len() > 1 => {
                let elapsed = last.duration_since(*first).as_secs_f32();
                if elapsed > 0.0 {
                    (self.frame_times.len() - 1) as f32 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub fn button_down(&mut self, controller: u8, button: Button) {
        match controller {
            2 => self.bus.joy2.set_button(button, true),
            _ => self.bus.joy1.set_button(button, true),
        }
    }

    pub fn button_up(&mut self, controller: u8, button: Button) {
        match controller {
            2 => self.bus.joy2.set_button(button, false),
            _ => self.bus.joy1.set_button(button, false),
        }
    }

    pub fn zapper_move(&mut self, x: u16, y: u16) {
        self.bus.zapper.x = x;
        self.bus.zapper.y = y;
    }

    pub fn zapper_fire_down(&mut self) {
        self.bus.zapper.trigger = true;
    }

    pub fn zapper_fire_up(&mut self) {
        self.bus.zapper.trigger = false;
    }

    pub fn crashed(&self) -> bool {
        self.crashed
    }

    /// Add a Game Genie code (6 or 8 letters) and enable substitution.
    pub fn add_genie_code(&mut self, code: &str) -> Result<(), crate::genie::GenieError> {
        let decoded = crate::genie::decode(code)?;
        self.bus.genie.add(decoded);
        Ok(())
    }

    /// Remove all Game Genie codes and disable substitution.
    pub fn clear_genie_codes(&mut self) {
        self.bus.genie.clear();
    }

    /// Enable or disable Game Genie substitution without dropping codes.
    pub fn set_genie_enabled(&mut self, enabled: bool) {
        self.bus.genie.set_enabled(enabled);
    }

    /// The 256x240 RGB framebuffer of the last completed frame.
    pub fn framebuffer(&self) -> &[u32] {
        self.bus.ppu.framebuffer()
    }

    /// Interleaved stereo samples accumulated since the last drain
    /// (only when no audio callback is configured).
    pub fn take_audio_buffer(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.audio_buffer)
    }

    /// Side-effect-free CPU memory read (RAM, SRAM, PRG).
    pub fn peek(&self, addr: u16) -> u8 {
        self.bus.peek(addr)
    }

    /// Side-effect-free PPU memory read (test runner support).
    pub fn ppu_peek(&self, addr: u16) -> u8 {
        self.bus.ppu.peek_vram(addr)
    }

    /// Direct access to the CPU, for tooling (nestest automation forces
    /// the program counter).
    pub fn cpu_mut(&mut self) -> &mut Rp2a03 {
        &mut self.cpu
    }

    pub fn cpu(&self) -> &Rp2a03 {
        &self.cpu
    }

    /// Direct access to the bus, for tooling and tests.
    pub fn bus_mut(&mut self) -> &mut NesBus {
        &mut self.bus
    }

    pub fn bus(&self) -> &NesBus {
        &self.bus
    }

    /// Execute a single instruction outside the frame loop (tooling).
    pub fn step_instruction(&mut self) -> Result<u32, NesError> {
        if self.crashed {
            return Err(NesError::Crashed);
        }
        self.bus.begin_instruction();
        match self.cpu.emulate(&mut self.bus) {
            Ok(cycles) => {
                let frame_cycles = cycles.saturating_sub(self.bus.apu_catchup_cycles());
                self.bus.clock_apu_frame(frame_cycles);
                self.bus.clock_apu_channels(cycles);
                let dots = (3 * cycles).saturating_sub(self.bus.ppu_catchup_dots());
                for _ in 0..dots {
                    self.bus.step_ppu_dot();
                }
                if self.bus.take_nmi() {
                    <Rp2a03 as Cpu<NesBus>>::request_irq(&mut self.cpu, IrqKind::Nmi);
                }
                <Rp2a03 as Cpu<NesBus>>::halt_cycles(&mut self.cpu, self.bus.take_dma_stall());
                Ok(cycles)
            }
            Err(e) => {
                self.crashed = true;
                Err(NesError::Cpu(e))
            }
        }
    }
}

impl Machine for Nes {
    fn video_config(&self) -> VideoConfig {
        VideoConfig {
            width: FB_WIDTH as u32,
            height: FB_HEIGHT as u32,
            fps: NTSC_FPS,
        }
    }

    fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.sample_rate,
            samples_per_frame: (self.sample_rate / self.preferred_frame_rate) as usize,
        }
    }

    fn run_frame(&mut self) -> Result<(), String> {
        self.frame().map_err(|e| e.to_string())
    }

    fn render(&mut self, buffer: &mut [u8]) {
        for (dst, &rgb) in buffer.chunks_exact_mut(4).zip(self.bus.ppu.framebuffer()) {
            dst[0] = (rgb >> 16) as u8;
            dst[1] = (rgb >> 8) as u8;
            dst[2] = rgb as u8;
            dst[3] = 0xFF;
        }
    }

    fn drain_audio(&mut self, out: &mut Vec<f32>) {
        out.append(&mut self.audio_buffer);
    }

    fn key_down(&mut self, key: KeyCode) {
        if let Some((controller, button)) = map_key(key) {
            self.button_down(controller, button);
        }
    }

    fn key_up(&mut self, key: KeyCode) {
        if let Some((controller, button)) = map_key(key) {
            self.button_up(controller, button);
        }
    }

    fn pointer_move(&mut self, x: u32, y: u32) {
        self.zapper_move(x as u16, y as u16);
    }

    fn pointer_button(&mut self, pressed: bool) {
        if pressed {
            self.zapper_fire_down();
        } else {
            self.zapper_fire_up();
        }
    }

    fn reset(&mut self) {
        Nes::reset(self);
    }

    fn load_file(&mut self, path: &str, data: &[u8]) -> Result<(), String> {
        if !path.to_lowercase().ends_with(".nes") {
            return Err(format!("unsupported file type: {path}"));
        }
        self.load_rom(data).map_err(|e| e.to_string())
    }
}

/// Default keyboard layout for controller 1.
fn map_key(key: KeyCode) -> Option<(u8, Button)> {
    let button = match key {
        KeyCode::KeyZ => Button::A,
        KeyCode::KeyX => Button::B,
        KeyCode::ShiftLeft | KeyCode::ShiftRight => Button::Select,
        KeyCode::Enter => Button::Start,
        KeyCode::ArrowUp => Button::Up,
        KeyCode::ArrowDown => Button::Down,
        KeyCode::ArrowLeft => Button::Left,
        KeyCode::ArrowRight => Button::Right,
        _ => return None,
    };
    Some((1, button))
}
