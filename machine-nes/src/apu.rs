//! Audio Processing Unit.
//!
//! Five channels (two squares, triangle, noise, DMC), the 4/5-step frame
//! counter, and a non-linear mixer with stereo panning and DC removal.
//!
//! Clocking is batched: the console feeds whole-instruction CPU cycle
//! counts to the channel timers, and the frame counter additionally
//! accepts mid-instruction catch-up ahead of `$4015` reads. DMC sample
//! fetches are surfaced to the bus as DMA requests so the fetched byte
//! lands on the CPU data bus and the CPU is stalled for the steal cycles.

use serde::{Deserialize, Serialize};

/// NTSC CPU clock in Hz.
pub const CPU_CLOCK: u32 = 1_789_773;

/// CPU cycles stolen per DMC sample fetch.
pub const DMC_FETCH_STALL: u32 = 4;

/// Length counter load values, indexed by register bits 7-3.
const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

/// Square duty sequences.
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

/// Triangle 32-step sequence.
const TRIANGLE_SEQUENCE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11,
    12, 13, 14, 15,
];

/// Noise timer periods (NTSC), in CPU cycles.
const NOISE_PERIOD_TABLE: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

/// DMC timer periods (NTSC): CPU cycles per output bit.
const DMC_PERIOD_TABLE: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

/// Frame counter step boundaries in CPU cycles from the sequence start.
const FRAME_STEPS_4: [u32; 4] = [7457, 14913, 22371, 29829];
const FRAME_PERIOD_4: u32 = 29830;
const FRAME_STEPS_5: [u32; 4] = [7457, 14913, 22371, 37281];
const FRAME_PERIOD_5: u32 = 37282;

/// Divider preload applied on $4017 writes. Compensates for the write's
/// own cycles under the batch-per-instruction scheduler; revisit if the
/// clocking granularity ever changes.
const FRAME_RESET_PRELOAD: i64 = -6;

/// Square wave channel with envelope, sweep and length counter.
#[derive(Clone, Serialize, Deserialize)]
pub struct SquareChannel {
    pub enabled: bool,
    duty: u8,
    halt: bool,
    constant_volume: bool,
    volume: u8,
    envelope_start: bool,
    envelope_divider: u8,
    envelope_decay: u8,
    sweep_enabled: bool,
    sweep_period: u8,
    sweep_negate: bool,
    sweep_shift: u8,
    sweep_divider: u8,
    sweep_reload: bool,
    timer_period: u16,
    timer: u32,
    sequencer_pos: u8,
    pub length_counter: u8,
    /// Square 1 negates with ones' complement, square 2 with two's.
    ones_complement: bool,
}

impl SquareChannel {
    fn new(ones_complement: bool) -> Self {
        Self {
            enabled: false,
            duty: 0,
            halt: false,
            constant_volume: false,
            volume: 0,
            envelope_start: false,
            envelope_divider: 0,
            envelope_decay: 0,
            sweep_enabled: false,
            sweep_period: 0,
            sweep_negate: false,
            sweep_shift: 0,
            sweep_divider: 0,
            sweep_reload: false,
            timer_period: 0,
            timer: 2,
            sequencer_pos: 0,
            length_counter: 0,
            ones_complement,
        }
    }

    fn write_control(&mut self, value: u8) {
        self.duty = (value >> 6) & 0x03;
        self.halt = value & 0x20 != 0;
        self.constant_volume = value & 0x10 != 0;
        self.volume = value & 0x0F;
    }

    fn write_sweep(&mut self, value: u8) {
        self.sweep_enabled = value & 0x80 != 0;
        self.sweep_period = (value >> 4) & 0x07;
        self.sweep_negate = value & 0x08 != 0;
        self.sweep_shift = value & 0x07;
        self.sweep_reload = true;
    }

    fn write_timer_lo(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x0700) | u16::from(value);
    }

    fn write_timer_hi(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | (u16::from(value & 0x07) << 8);
        if self.enabled {
            self.length_counter = LENGTH_TABLE[usize::from(value >> 3)];
        }
        self.sequencer_pos = 0;
        self.envelope_start = true;
    }

    fn clock_timer(&mut self, cycles: u32) {
        let period = (u32::from(self.timer_period) + 1) * 2;
        let mut remaining = cycles;
        while remaining > 0 {
            if self.timer > remaining {
                self.timer -= remaining;
                break;
            }
            remaining -= self.timer;
            self.timer = period;
            self.sequencer_pos = (self.sequencer_pos + 1) & 0x07;
        }
    }

    fn clock_envelope(&mut self) {
        if self.envelope_start {
            self.envelope_start = false;
            self.envelope_decay = 15;
            self.envelope_divider = self.volume;
        } else if self.envelope_divider == 0 {
            self.envelope_divider = self.volume;
            if self.envelope_decay > 0 {
                self.envelope_decay -= 1;
            } else if self.halt {
                self.envelope_decay = 15;
            }
        } else {
            self.envelope_divider -= 1;
        }
    }

    /// Sweep target period. Square 1 subtracts one extra in negate mode.
    fn sweep_target(&self) -> i32 {
        let period = i32::from(self.timer_period);
        let change = period >> self.sweep_shift;
        if self.sweep_negate {
            if self.ones_complement {
                period - change - 1
            } else {
                period - change
            }
        } else {
            period + change
        }
    }

    fn clock_sweep(&mut self) {
        let target = self.sweep_target();
        let in_range = (0..=0x7FF).contains(&target);
        if self.sweep_divider == 0
            && self.sweep_enabled
            && self.sweep_shift != 0
            && self.timer_period >= 8
            && in_range
        {
            self.timer_period = target as u16;
        }
        if self.sweep_divider == 0 || self.sweep_reload {
            self.sweep_divider = self.sweep_period;
            self.sweep_reload = false;
        } else {
            self.sweep_divider -= 1;
        }
    }

    fn clock_length(&mut self) {
        if !self.halt && self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled
            || self.length_counter == 0
            || self.timer_period < 8
            || self.sweep_target() > 0x7FF
            || DUTY_TABLE[usize::from(self.duty)][usize::from(self.sequencer_pos)] == 0
        {
            return 0;
        }
        if self.constant_volume {
            self.volume
        } else {
            self.envelope_decay
        }
    }
}

/// Triangle channel with linear counter.
#[derive(Clone, Serialize, Deserialize)]
pub struct TriangleChannel {
    pub enabled: bool,
    control: bool,
    linear_reload_value: u8,
    linear_counter: u8,
    linear_reload_flag: bool,
    timer_period: u16,
    timer: u32,
    sequencer_pos: u8,
    pub length_counter: u8,
}

impl TriangleChannel {
    fn new() -> Self {
        Self {
            enabled: false,
            control: false,
            linear_reload_value: 0,
            linear_counter: 0,
            linear_reload_flag: false,
            timer_period: 0,
            timer: 1,
            sequencer_pos: 0,
            length_counter: 0,
        }
    }

    fn write_linear(&mut self, value: u8) {
        self.control = value & 0x80 != 0;
        self.linear_reload_value = value & 0x7F;
    }

    fn write_timer_lo(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x0700) | u16::from(value);
    }

    fn write_timer_hi(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | (u16::from(value & 0x07) << 8);
        if self.enabled {
            self.length_counter = LENGTH_TABLE[usize::from(value >> 3)];
        }
        self.linear_reload_flag = true;
    }

    fn clock_timer(&mut self, cycles: u32) {
        let period = u32::from(self.timer_period) + 1;
        let mut remaining = cycles;
        while remaining > 0 {
            if self.timer > remaining {
                self.timer -= remaining;
                break;
            }
            remaining -= self.timer;
            self.timer = period;
            if self.length_counter > 0 && self.linear_counter > 0 {
                self.sequencer_pos = (self.sequencer_pos + 1) & 0x1F;
            }
        }
    }

    fn clock_linear(&mut self) {
        if self.linear_reload_flag {
            self.linear_counter = self.linear_reload_value;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }
        if !self.control {
            self.linear_reload_flag = false;
        }
    }

    fn clock_length(&mut self) {
        if !self.control && self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn output(&self) -> u8 {
        // Periods below 8 produce ultrasonic output; silence them.
        if !self.enabled
            || self.length_counter == 0
            || self.linear_counter == 0
            || self.timer_period < 8
        {
            return 0;
        }
        TRIANGLE_SEQUENCE[usize::from(self.sequencer_pos)]
    }
}

/// Noise channel: 15-bit LFSR.
#[derive(Clone, Serialize, Deserialize)]
pub struct NoiseChannel {
    pub enabled: bool,
    halt: bool,
    constant_volume: bool,
    volume: u8,
    envelope_start: bool,
    envelope_divider: u8,
    envelope_decay: u8,
    /// Short mode: feedback from bit 6 instead of bit 1.
    mode: bool,
    timer_period: u16,
    timer: u32,
    shift_register: u16,
    pub length_counter: u8,
}

impl NoiseChannel {
    fn new() -> Self {
        Self {
            enabled: false,
            halt: false,
            constant_volume: false,
            volume: 0,
            envelope_start: false,
            envelope_divider: 0,
            envelope_decay: 0,
            mode: false,
            timer_period: NOISE_PERIOD_TABLE[0],
            timer: u32::from(NOISE_PERIOD_TABLE[0]),
            shift_register: 1,
            length_counter: 0,
        }
    }

    fn write_control(&mut self, value: u8) {
        self.halt = value & 0x20 != 0;
        self.constant_volume = value & 0x10 != 0;
        self.volume = value & 0x0F;
    }

    fn write_period(&mut self, value: u8) {
        self.mode = value & 0x80 != 0;
        self.timer_period = NOISE_PERIOD_TABLE[usize::from(value & 0x0F)];
    }

    fn write_length(&mut self, value: u8) {
        if self.enabled {
            self.length_counter = LENGTH_TABLE[usize::from(value >> 3)];
        }
        self.envelope_start = true;
    }

    fn clock_timer(&mut self, cycles: u32) {
        let period = u32::from(self.timer_period);
        let mut remaining = cycles;
        while remaining > 0 {
            if self.timer > remaining {
                self.timer -= remaining;
                break;
            }
            remaining -= self.timer;
            self.timer = period;
            // Feedback: bit 0 xor bit 1 (long mode) or bit 6 (short mode)
            let tap = if self.mode { 6 } else { 1 };
            let feedback = (self.shift_register ^ (self.shift_register >> tap)) & 1;
            self.shift_register = (self.shift_register >> 1) | (feedback << 14);
        }
    }

    fn clock_envelope(&mut self) {
        if self.envelope_start {
            self.envelope_start = false;
            self.envelope_decay = 15;
            self.envelope_divider = self.volume;
        } else if self.envelope_divider == 0 {
            self.envelope_divider = self.volume;
            if self.envelope_decay > 0 {
                self.envelope_decay -= 1;
            } else if self.halt {
                self.envelope_decay = 15;
            }
        } else {
            self.envelope_divider -= 1;
        }
    }

    fn clock_length(&mut self) {
        if !self.halt && self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length_counter == 0 || self.shift_register & 1 != 0 {
            return 0;
        }
        if self.constant_volume {
            self.volume
        } else {
            self.envelope_decay
        }
    }
}

/// DMC channel: 1-bit delta PCM streamed from CPU memory.
#[derive(Clone, Serialize, Deserialize)]
pub struct DmcChannel {
    pub enabled: bool,
    pub irq_enabled: bool,
    pub irq_pending: bool,
    loop_flag: bool,
    timer_period: u16,
    timer: u32,
    output_level: u8,
    /// $4012 register value; start address is $C000 + value * 64.
    sample_address: u8,
    /// $4013 register value; length is value * 16 + 1.
    sample_length: u8,
    pub current_address: u16,
    pub bytes_remaining: u16,
    shift_register: u8,
    bits_remaining: u8,
    sample_buffer: Option<u8>,
    silence: bool,
}

impl DmcChannel {
    fn new() -> Self {
        Self {
            enabled: false,
            irq_enabled: false,
            irq_pending: false,
            loop_flag: false,
            timer_period: DMC_PERIOD_TABLE[0],
            timer: u32::from(DMC_PERIOD_TABLE[0]),
            output_level: 0,
            sample_address: 0,
            sample_length: 0,
            current_address: 0xC000,
            bytes_remaining: 0,
            shift_register: 0,
            bits_remaining: 8,
            sample_buffer: None,
            silence: true,
        }
    }

    fn write_control(&mut self, value: u8) {
        self.irq_enabled = value & 0x80 != 0;
        if !self.irq_enabled {
            self.irq_pending = false;
        }
        self.loop_flag = value & 0x40 != 0;
        self.timer_period = DMC_PERIOD_TABLE[usize::from(value & 0x0F)];
    }

    fn write_direct_load(&mut self, value: u8) {
        self.output_level = value & 0x7F;
    }

    fn write_sample_address(&mut self, value: u8) {
        self.sample_address = value;
    }

    fn write_sample_length(&mut self, value: u8) {
        self.sample_length = value;
    }

    fn restart(&mut self) {
        self.current_address = 0xC000 + u16::from(self.sample_address) * 64;
        self.bytes_remaining = u16::from(self.sample_length) * 16 + 1;
    }

    /// Whether the memory reader needs a byte right now.
    pub fn wants_fetch(&self) -> bool {
        self.enabled && self.sample_buffer.is_none() && self.bytes_remaining > 0
    }

    /// Deliver a byte fetched by DMA.
    pub fn receive_byte(&mut self, value: u8) {
        self.sample_buffer = Some(value);
        // Address wraps from $FFFF to $8000
        self.current_address = if self.current_address == 0xFFFF {
            0x8000
        } else {
            self.current_address + 1
        };
        self.bytes_remaining -= 1;
        if self.bytes_remaining == 0 {
            if self.loop_flag {
                self.restart();
            } else if self.irq_enabled {
                self.irq_pending = true;
            }
        }
    }

    /// Approximate CPU cycles until the next sample fetch lands on the
    /// bus. Snapshotted at instruction start for the SHx DMA-collision
    /// check; not sub-cycle exact.
    pub fn cycles_to_next_fetch(&self) -> Option<u32> {
        if !self.enabled || self.bytes_remaining == 0 {
            return None;
        }
        if self.sample_buffer.is_none() {
            return Some(0);
        }
        let bits = u32::from(self.bits_remaining.max(1)) - 1;
        Some(self.timer + bits * u32::from(self.timer_period))
    }

    fn clock_timer(&mut self, cycles: u32) {
        let period = u32::from(self.timer_period);
        let mut remaining = cycles;
        while remaining > 0 {
            if self.timer > remaining {
                self.timer -= remaining;
                break;
            }
            remaining -= self.timer;
            self.timer = period;
            self.clock_output();
        }
    }

    fn clock_output(&mut self) {
        if !self.silence {
            if self.shift_register & 1 != 0 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
        }
        self.shift_register >>= 1;
        self.bits_remaining -= 1;

        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            match self.sample_buffer.take() {
                Some(byte) => {
                    self.silence = false;
                    self.shift_register = byte;
                }
                None => self.silence = true,
            }
        }
    }

    fn output(&self) -> u8 {
        self.output_level
    }
}

/// Stereo pan weights per channel, 0-256 (left weight; right is 256-n).
const PAN_SQUARE1: u32 = 176;
const PAN_SQUARE2: u32 = 86;
const PAN_TRIANGLE: u32 = 156;
const PAN_NOISE: u32 = 106;
const PAN_DMC: u32 = 128;

/// The APU.
pub struct Apu {
    pub square1: SquareChannel,
    pub square2: SquareChannel,
    pub triangle: TriangleChannel,
    pub noise: NoiseChannel,
    pub dmc: DmcChannel,

    /// Frame counter sequence mode: false = 4-step, true = 5-step.
    pub five_step: bool,
    pub frame_irq_inhibit: bool,
    pub frame_irq_active: bool,
    /// Cycles into the current sequence; negative right after a $4017
    /// write because of the divider preload.
    pub(crate) frame_cycle: i64,
    pub(crate) frame_step: usize,

    // Mixer
    square_table: Vec<f32>,
    tnd_table: Vec<f32>,
    mix_midpoint: f32,
    sample_rate: u32,
    sample_acc: u64,
    prev_l: f32,
    accum_l: f32,
    prev_r: f32,
    accum_r: f32,
    emulate_sound: bool,
    /// Samples produced since the bus last drained them.
    pending_samples: Vec<(f32, f32)>,
}

impl Apu {
    pub fn new(sample_rate: u32, emulate_sound: bool) -> Self {
        let (square_table, tnd_table, mix_midpoint) = build_mix_tables();
        Self {
            square1: SquareChannel::new(true),
            square2: SquareChannel::new(false),
            triangle: TriangleChannel::new(),
            noise: NoiseChannel::new(),
            dmc: DmcChannel::new(),
            five_step: false,
            frame_irq_inhibit: false,
            frame_irq_active: false,
            frame_cycle: 0,
            frame_step: 0,
            square_table,
            tnd_table,
            mix_midpoint,
            sample_rate: sample_rate.max(1),
            sample_acc: 0,
            prev_l: 0.0,
            accum_l: 0.0,
            prev_r: 0.0,
            accum_r: 0.0,
            emulate_sound,
            pending_samples: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        let sample_rate = self.sample_rate;
        let emulate_sound = self.emulate_sound;
        *self = Self::new(sample_rate, emulate_sound);
    }

    /// Write an APU register ($4000-$4013, $4015, $4017).
    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            0x4000 => self.square1.write_control(value),
            0x4001 => self.square1.write_sweep(value),
            0x4002 => self.square1.write_timer_lo(value),
            0x4003 => self.square1.write_timer_hi(value),

            0x4004 => self.square2.write_control(value),
            0x4005 => self.square2.write_sweep(value),
            0x4006 => self.square2.write_timer_lo(value),
            0x4007 => self.square2.write_timer_hi(value),

            0x4008 => self.triangle.write_linear(value),
            0x400A => self.triangle.write_timer_lo(value),
            0x400B => self.triangle.write_timer_hi(value),

            0x400C => self.noise.write_control(value),
            0x400E => self.noise.write_period(value),
            0x400F => self.noise.write_length(value),

            0x4010 => self.dmc.write_control(value),
            0x4011 => self.dmc.write_direct_load(value),
            0x4012 => self.dmc.write_sample_address(value),
            0x4013 => self.dmc.write_sample_length(value),

            0x4015 => self.write_status(value),
            0x4017 => self.write_frame_counter(value),
            _ => {}
        }
    }

    fn write_status(&mut self, value: u8) {
        self.square1.enabled = value & 0x01 != 0;
        self.square2.enabled = value & 0x02 != 0;
        self.triangle.enabled = value & 0x04 != 0;
        self.noise.enabled = value & 0x08 != 0;

        if !self.square1.enabled {
            self.square1.length_counter = 0;
        }
        if !self.square2.enabled {
            self.square2.length_counter = 0;
        }
        if !self.triangle.enabled {
            self.triangle.length_counter = 0;
        }
        if !self.noise.enabled {
            self.noise.length_counter = 0;
        }

        let dmc_enable = value & 0x10 != 0;
        self.dmc.enabled = dmc_enable;
        if dmc_enable {
            if self.dmc.bytes_remaining == 0 {
                self.dmc.restart();
            }
        } else {
            self.dmc.bytes_remaining = 0;
        }
        self.dmc.irq_pending = false;
    }

    fn write_frame_counter(&mut self, value: u8) {
        self.five_step = value & 0x80 != 0;
        self.frame_irq_inhibit = value & 0x40 != 0;
        if self.frame_irq_inhibit {
            self.frame_irq_active = false;
        }
        self.frame_cycle = FRAME_RESET_PRELOAD;
        self.frame_step = 0;
        if self.five_step {
            // 5-step mode clocks a quarter and half frame immediately
            self.clock_quarter_frame();
            self.clock_half_frame();
        }
    }

    /// Read $4015. Bits 0-4: length/bytes-remaining flags; bit 6: frame
    /// IRQ (cleared by the read); bit 7: DMC IRQ (not cleared). Bit 5 is
    /// open bus, composed by the caller.
    pub fn read_status(&mut self) -> u8 {
        let mut status = 0;
        if self.square1.length_counter > 0 {
            status |= 0x01;
        }
        if self.square2.length_counter > 0 {
            status |= 0x02;
        }
        if self.triangle.length_counter > 0 {
            status |= 0x04;
        }
        if self.noise.length_counter > 0 {
            status |= 0x08;
        }
        if self.dmc.bytes_remaining > 0 {
            status |= 0x10;
        }
        if self.frame_irq_active {
            status |= 0x40;
        }
        if self.dmc.irq_pending {
            status |= 0x80;
        }
        self.frame_irq_active = false;
        status
    }

    /// Advance the frame counter by CPU cycles, firing quarter/half
    /// frame events and the frame IRQ at the step boundaries.
    pub fn clock_frame_counter(&mut self, cycles: u32) {
        if cycles == 0 {
            return;
        }
        self.frame_cycle += i64::from(cycles);
        loop {
            let (steps, period) = if self.five_step {
                (&FRAME_STEPS_5, FRAME_PERIOD_5)
            } else {
                (&FRAME_STEPS_4, FRAME_PERIOD_4)
            };

            if self.frame_step < 4 {
                if self.frame_cycle < i64::from(steps[self.frame_step]) {
                    break;
                }
                self.clock_quarter_frame();
                if self.frame_step == 1 || self.frame_step == 3 {
                    self.clock_half_frame();
                }
                if self.frame_step == 3 && !self.five_step && !self.frame_irq_inhibit {
                    self.frame_irq_active = true;
                }
                self.frame_step += 1;
            } else {
                if self.frame_cycle < i64::from(period) {
                    break;
                }
                self.frame_cycle -= i64::from(period);
                self.frame_step = 0;
            }
        }
    }

    fn clock_quarter_frame(&mut self) {
        self.square1.clock_envelope();
        self.square2.clock_envelope();
        self.noise.clock_envelope();
        self.triangle.clock_linear();
    }

    fn clock_half_frame(&mut self) {
        self.square1.clock_length();
        self.square1.clock_sweep();
        self.square2.clock_length();
        self.square2.clock_sweep();
        self.triangle.clock_length();
        self.noise.clock_length();
    }

    /// Advance all channel timers by CPU cycles and generate output
    /// samples at the configured rate.
    pub fn clock_channels(&mut self, cycles: u32) {
        if cycles == 0 {
            return;
        }
        self.square1.clock_timer(cycles);
        self.square2.clock_timer(cycles);
        self.triangle.clock_timer(cycles);
        self.noise.clock_timer(cycles);
        self.dmc.clock_timer(cycles);

        if !self.emulate_sound {
            return;
        }
        self.sample_acc += u64::from(cycles) * u64::from(self.sample_rate);
        while self.sample_acc >= u64::from(CPU_CLOCK) {
            self.sample_acc -= u64::from(CPU_CLOCK);
            self.emit_sample();
        }
    }

    fn emit_sample(&mut self) {
        let sq1 = u32::from(self.square1.output());
        let sq2 = u32::from(self.square2.output());
        let tri = u32::from(self.triangle.output());
        let noise = u32::from(self.noise.output());
        let dmc = u32::from(self.dmc.output());

        let mix = |sq_weighted: u32, tnd_weighted: u32| -> f32 {
            let sq = self.square_table[(sq_weighted * 16 >> 8) as usize];
            let tnd = self.tnd_table[(tnd_weighted * 16 >> 8) as usize];
            sq + tnd - self.mix_midpoint
        };

        let left = mix(
            sq1 * PAN_SQUARE1 + sq2 * PAN_SQUARE2,
            3 * tri * PAN_TRIANGLE + 2 * noise * PAN_NOISE + dmc * PAN_DMC,
        );
        let right = mix(
            sq1 * (256 - PAN_SQUARE1) + sq2 * (256 - PAN_SQUARE2),
            3 * tri * (256 - PAN_TRIANGLE) + 2 * noise * (256 - PAN_NOISE) + dmc * (256 - PAN_DMC),
        );

        // One-pole high-pass with a 2^10-sample time constant (DC removal)
        let diff_l = left - self.prev_l;
        self.prev_l = left;
        self.accum_l += diff_l - self.accum_l / 1024.0;
        let diff_r = right - self.prev_r;
        self.prev_r = right;
        self.accum_r += diff_r - self.accum_r / 1024.0;

        let l = (self.accum_l * 2.0).clamp(-1.0, 0.999_99);
        let r = (self.accum_r * 2.0).clamp(-1.0, 0.999_99);
        self.pending_samples.push((l, r));
    }

    /// Take the samples generated since the last call.
    pub fn take_samples(&mut self) -> Vec<(f32, f32)> {
        std::mem::take(&mut self.pending_samples)
    }

    /// True while any IRQ line (frame or DMC) is asserted.
    pub fn irq_asserted(&self) -> bool {
        self.frame_irq_active || self.dmc.irq_pending
    }
}

/// Build the two non-linear mix tables. Indices carry a 4-bit fraction
/// (x16) so pan-weighted channel sums interpolate smoothly.
fn build_mix_tables() -> (Vec<f32>, Vec<f32>, f32) {
    let mut square_table = vec![0.0f32; 32 * 16];
    for (i, entry) in square_table.iter_mut().enumerate().skip(1) {
        let n = i as f64 / 16.0;
        *entry = (95.52 / (8128.0 / n + 100.0)) as f32;
    }
    let mut tnd_table = vec![0.0f32; 204 * 16];
    for (i, entry) in tnd_table.iter_mut().enumerate().skip(1) {
        let n = i as f64 / 16.0;
        *entry = (163.67 / (24329.0 / n + 100.0)) as f32;
    }
    let midpoint = (square_table[square_table.len() - 1] + tnd_table[tnd_table.len() - 1]) / 2.0;
    (square_table, tnd_table, midpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apu() -> Apu {
        Apu::new(48_000, true)
    }

    #[test]
    fn length_counter_loads_when_enabled() {
        let mut apu = apu();
        apu.write(0x4015, 0x01);
        apu.write(0x4003, 0x08); // Length index 1 = 254
        assert_eq!(apu.square1.length_counter, 254);
        assert!(apu.read_status() & 0x01 != 0);
    }

    #[test]
    fn length_counter_ignored_when_disabled() {
        let mut apu = apu();
        apu.write(0x4003, 0x08);
        assert_eq!(apu.square1.length_counter, 0);
    }

    #[test]
    fn disabling_channel_clears_length() {
        let mut apu = apu();
        apu.write(0x4015, 0x01);
        apu.write(0x4003, 0x08);
        apu.write(0x4015, 0x00);
        assert_eq!(apu.square1.length_counter, 0);
    }

    #[test]
    fn four_step_sequence_fires_frame_irq() {
        let mut apu = apu();
        apu.write(0x4017, 0x00); // 4-step, IRQ enabled
        // One period plus the divider preload from the $4017 write
        apu.clock_frame_counter(29830 + 6);
        assert!(apu.frame_irq_active);
    }

    #[test]
    fn irq_inhibit_clears_and_blocks_frame_irq() {
        let mut apu = apu();
        apu.write(0x4017, 0x00);
        apu.clock_frame_counter(29830 + 6);
        assert!(apu.frame_irq_active);

        // Bit 6 clears the active flag and blocks future IRQs
        apu.write(0x4017, 0x40);
        assert!(!apu.frame_irq_active);
        apu.clock_frame_counter(2 * 29830 + 100);
        assert!(!apu.frame_irq_active);
        assert_eq!(apu.read_status() & 0x40, 0);
    }

    #[test]
    fn five_step_mode_never_fires_irq() {
        let mut apu = apu();
        apu.write(0x4017, 0x80);
        apu.clock_frame_counter(37282 * 3);
        assert!(!apu.frame_irq_active);
    }

    #[test]
    fn five_step_write_clocks_immediately() {
        let mut apu = apu();
        apu.write(0x4015, 0x01);
        apu.write(0x4003, 0x08); // Length = 254
        apu.write(0x4017, 0x80); // Immediate quarter+half clock
        assert_eq!(apu.square1.length_counter, 253);
    }

    #[test]
    fn read_status_clears_frame_irq_only() {
        let mut apu = apu();
        apu.write(0x4017, 0x00);
        apu.clock_frame_counter(29830 + 6);
        apu.dmc.irq_pending = true;

        let status = apu.read_status();
        assert!(status & 0x40 != 0);
        assert!(status & 0x80 != 0);

        let status2 = apu.read_status();
        assert_eq!(status2 & 0x40, 0); // Frame IRQ consumed
        assert!(status2 & 0x80 != 0); // DMC IRQ persists
    }

    #[test]
    fn envelope_decays_each_quarter_frame() {
        let mut apu = apu();
        apu.write(0x4015, 0x01);
        apu.write(0x4000, 0x00); // Envelope mode, period 0
        apu.write(0x4003, 0x08); // Restart envelope

        apu.clock_frame_counter(7457); // First quarter frame
        assert_eq!(apu.square1.envelope_decay, 15);
        apu.clock_frame_counter(7456); // Second
        assert_eq!(apu.square1.envelope_decay, 14);
    }

    #[test]
    fn sweep_negate_complements_differ() {
        let mut apu = apu();
        apu.square1.timer_period = 0x100;
        apu.square1.sweep_negate = true;
        apu.square1.sweep_shift = 2;
        apu.square2.timer_period = 0x100;
        apu.square2.sweep_negate = true;
        apu.square2.sweep_shift = 2;

        // change = 0x40; square 1 ones' complement subtracts one extra
        assert_eq!(apu.square1.sweep_target(), 0x100 - 0x40 - 1);
        assert_eq!(apu.square2.sweep_target(), 0x100 - 0x40);
    }

    #[test]
    fn noise_lfsr_mode_taps() {
        let mut noise = NoiseChannel::new();
        noise.enabled = true;
        noise.timer_period = 4;
        noise.shift_register = 1;

        noise.clock_timer(4);
        // Feedback = bit0 ^ bit1 = 1 ^ 0 = 1 -> into bit 14
        assert_eq!(noise.shift_register, 0x4000);
    }

    #[test]
    fn dmc_sample_geometry() {
        let mut apu = apu();
        apu.write(0x4012, 0x04); // $C000 + 4*64 = $C100
        apu.write(0x4013, 0x02); // 2*16 + 1 = 33 bytes
        apu.write(0x4015, 0x10);

        assert_eq!(apu.dmc.current_address, 0xC100);
        assert_eq!(apu.dmc.bytes_remaining, 33);
        assert!(apu.dmc.wants_fetch());
    }

    #[test]
    fn dmc_address_wraps_to_8000() {
        let mut dmc = DmcChannel::new();
        dmc.enabled = true;
        dmc.current_address = 0xFFFF;
        dmc.bytes_remaining = 2;
        dmc.receive_byte(0xAA);
        assert_eq!(dmc.current_address, 0x8000);
    }

    #[test]
    fn dmc_irq_on_last_byte() {
        let mut dmc = DmcChannel::new();
        dmc.enabled = true;
        dmc.irq_enabled = true;
        dmc.bytes_remaining = 1;
        dmc.receive_byte(0x00);
        assert!(dmc.irq_pending);
        assert_eq!(dmc.bytes_remaining, 0);
    }

    #[test]
    fn dmc_loop_restarts_sample() {
        let mut dmc = DmcChannel::new();
        dmc.enabled = true;
        dmc.loop_flag = true;
        dmc.sample_address = 1;
        dmc.sample_length = 0;
        dmc.bytes_remaining = 1;
        dmc.current_address = 0xC040;
        dmc.receive_byte(0x00);
        assert_eq!(dmc.current_address, 0xC040);
        assert_eq!(dmc.bytes_remaining, 1);
    }

    #[test]
    fn dmc_delta_steps_output() {
        let mut dmc = DmcChannel::new();
        dmc.enabled = true;
        dmc.output_level = 64;
        dmc.silence = false;
        dmc.shift_register = 0b0000_0001; // One up step, then downs
        dmc.bits_remaining = 8;
        dmc.timer_period = 54;
        dmc.timer = 54;

        dmc.clock_timer(54);
        assert_eq!(dmc.output_level, 66);
        dmc.clock_timer(54);
        assert_eq!(dmc.output_level, 64);
    }

    #[test]
    fn samples_emitted_at_configured_rate() {
        let mut apu = apu();
        // One frame of CPU cycles at 48 kHz -> about 800 samples
        apu.clock_channels(CPU_CLOCK / 60);
        let samples = apu.take_samples();
        let expected = 48_000 / 60;
        assert!((samples.len() as i64 - i64::from(expected)).abs() <= 1);
        assert!(samples.iter().all(|&(l, r)| (-1.0..1.0).contains(&l) && (-1.0..1.0).contains(&r)));
    }

    #[test]
    fn emulate_sound_off_produces_no_samples() {
        let mut apu = Apu::new(48_000, false);
        apu.clock_channels(CPU_CLOCK / 60);
        assert!(apu.take_samples().is_empty());
    }
}
