//! CPU memory map and bus arbitration.
//!
//! `NesBus` owns everything on the far side of the CPU pins: internal
//! RAM, the PPU, the APU, cartridge SRAM, the live PRG window, the
//! mapper, controllers and the Game Genie hook. It implements
//! `emu_core::Bus`, so every CPU bus cycle lands here - which is where
//! the timing-sensitive behaviour lives:
//!
//! - the data-bus latch ("open bus") tracks the last byte driven;
//! - every access in $2000-$3FFF triggers PPU catch-up first, advancing
//!   the PPU to the current mid-instruction dot;
//! - reads of $4015 advance the APU frame counter the same way;
//! - DMC sample fetches steal the bus: the fetched byte replaces the
//!   open-bus value and the CPU is billed stall cycles.

use emu_core::Bus;

use crate::apu::{Apu, DMC_FETCH_STALL};
use crate::cartridge::{Cartridge, CartridgeError};
use crate::controller::{Controller, Zapper};
use crate::genie::GameGenie;
use crate::mapper::{BankCtx, Mapper};
use crate::ppu::Ppu;

/// CPU cycles a $4014 OAM DMA stalls the CPU (alignment + 256 pairs).
pub const OAM_DMA_STALL: u32 = 513;

/// Power-on RAM pattern: $FF everywhere except a few known holes.
fn init_ram(ram: &mut [u8; 0x800]) {
    ram.fill(0xFF);
    ram[0x008] = 0xF7;
    ram[0x009] = 0xEF;
    ram[0x00A] = 0xDF;
    ram[0x00F] = 0xBF;
}

/// The NES bus.
pub struct NesBus {
    /// 2 KiB internal RAM, mirrored across $0000-$1FFF.
    pub ram: [u8; 0x800],
    /// 8 KiB cartridge SRAM at $6000-$7FFF.
    pub sram: [u8; 0x2000],
    /// Live PRG window for $8000-$FFFF (banks copied in by the mapper).
    pub prg: Box<[u8; 0x8000]>,
    pub ppu: Ppu,
    pub apu: Apu,
    pub cart: Option<Cartridge>,
    pub mapper: Mapper,
    pub joy1: Controller,
    pub joy2: Controller,
    pub zapper: Zapper,
    pub genie: GameGenie,

    /// Last byte driven on the CPU data bus.
    data_bus: u8,
    /// Bus cycles consumed by the instruction in progress.
    instr_bus_cycles: u32,
    /// PPU dots already advanced for this instruction via catch-up.
    ppu_catchup_dots: u32,
    /// CPU cycles already fed to the APU frame counter via catch-up.
    apu_catchup_cycles: u32,
    /// Cycles until the next DMC fetch, snapshotted at instruction start.
    dmc_fetch_snapshot: Option<u32>,

    /// VBlank NMI fired (possibly mid-instruction during catch-up).
    nmi_fired: bool,
    /// VBlank began: the frame is complete.
    frame_done: bool,
    /// DMA stall cycles owed to the CPU.
    dma_stall: u32,
    /// SRAM writes since last drained (for the battery callback).
    battery_writes: Vec<(u16, u8)>,
}

impl NesBus {
    pub fn new(apu: Apu) -> Self {
        let mut ram = [0u8; 0x800];
        init_ram(&mut ram);
        Self {
            ram,
            sram: [0; 0x2000],
            prg: Box::new([0; 0x8000]),
            ppu: Ppu::new(),
            apu,
            cart: None,
            mapper: Mapper::Nrom,
            joy1: Controller::new(),
            joy2: Controller::new(),
            zapper: Zapper::new(),
            genie: GameGenie::new(),
            data_bus: 0,
            instr_bus_cycles: 0,
            ppu_catchup_dots: 0,
            apu_catchup_cycles: 0,
            dmc_fetch_snapshot: None,
            nmi_fired: false,
            frame_done: false,
            dma_stall: 0,
            battery_writes: Vec::new(),
        }
    }

    /// Install a parsed cartridge: create its mapper and load the
    /// initial banks.
    pub fn install_cartridge(&mut self, cart: Cartridge) -> Result<(), CartridgeError> {
        let mut mapper = Mapper::create(&cart)?;
        self.ppu.chr_writable = cart.chr_is_ram();
        {
            let mut ctx = BankCtx {
                cart: &cart,
                prg: &mut self.prg,
                ppu: &mut self.ppu,
            };
            mapper.load_rom(&mut ctx);
        }
        self.mapper = mapper;
        self.cart = Some(cart);
        Ok(())
    }

    /// Reset bus-side state. SRAM survives (it may be battery-backed),
    /// and the mapper re-runs its power-on bank setup.
    pub fn reset(&mut self) {
        init_ram(&mut self.ram);
        self.ppu.reset();
        self.apu.reset();
        if let Some(cart) = &self.cart {
            self.ppu.chr_writable = cart.chr_is_ram();
            let mut ctx = BankCtx {
                cart,
                prg: &mut self.prg,
                ppu: &mut self.ppu,
            };
            self.mapper.load_rom(&mut ctx);
        }
        self.data_bus = 0;
        self.instr_bus_cycles = 0;
        self.ppu_catchup_dots = 0;
        self.apu_catchup_cycles = 0;
        self.dmc_fetch_snapshot = None;
        self.nmi_fired = false;
        self.frame_done = false;
        self.dma_stall = 0;
        self.battery_writes.clear();
    }

    // =========================================================================
    // Instruction-boundary bookkeeping
    // =========================================================================

    /// Reset the per-instruction counters and snapshot the DMC fetch
    /// distance (for the SHx collision check).
    pub fn begin_instruction(&mut self) {
        self.instr_bus_cycles = 0;
        self.ppu_catchup_dots = 0;
        self.apu_catchup_cycles = 0;
        self.dmc_fetch_snapshot = self.apu.dmc.cycles_to_next_fetch();
    }

    pub fn instr_bus_cycles(&self) -> u32 {
        self.instr_bus_cycles
    }

    pub fn ppu_catchup_dots(&self) -> u32 {
        self.ppu_catchup_dots
    }

    pub fn apu_catchup_cycles(&self) -> u32 {
        self.apu_catchup_cycles
    }

    pub fn take_nmi(&mut self) -> bool {
        std::mem::take(&mut self.nmi_fired)
    }

    pub fn frame_done(&self) -> bool {
        self.frame_done
    }

    pub fn take_frame_done(&mut self) -> bool {
        std::mem::take(&mut self.frame_done)
    }

    pub fn take_dma_stall(&mut self) -> u32 {
        std::mem::take(&mut self.dma_stall)
    }

    pub fn take_battery_writes(&mut self) -> Vec<(u16, u8)> {
        std::mem::take(&mut self.battery_writes)
    }

    pub fn data_bus(&self) -> u8 {
        self.data_bus
    }

    pub fn set_data_bus(&mut self, value: u8) {
        self.data_bus = value;
    }

    // =========================================================================
    // Catch-up drivers
    // =========================================================================

    /// Advance the PPU to the dot corresponding to the bus cycles this
    /// instruction has consumed so far. Re-entrant from `read`/`write`.
    fn ppu_catch_up(&mut self) {
        let target = 3 * self.instr_bus_cycles;
        while self.ppu_catchup_dots < target {
            self.ppu_catchup_dots += 1;
            self.step_ppu_dot();
        }
    }

    /// Advance one PPU dot and route its side effects: NMI latch,
    /// mapper IRQ clocking, frame completion.
    pub fn step_ppu_dot(&mut self) {
        let sig = self.ppu.advance_dot();
        if sig.nmi {
            self.nmi_fired = true;
        }
        if sig.clock_mapper_irq {
            self.mapper.clock_irq_counter();
        }
        if sig.frame_done {
            self.frame_done = true;
        }
    }

    /// Advance the APU frame counter (only) to the current
    /// mid-instruction cycle. Used ahead of $4015 reads.
    fn apu_catch_up(&mut self) {
        let cycles = self.instr_bus_cycles.saturating_sub(self.apu_catchup_cycles);
        self.apu.clock_frame_counter(cycles);
        self.apu_catchup_cycles += cycles;
    }

    /// Advance APU channel timers and service DMC sample fetches. The
    /// fetched byte is driven onto the data bus and the CPU is billed
    /// the steal cycles.
    pub fn clock_apu_channels(&mut self, cycles: u32) {
        self.apu.clock_channels(cycles);
        while self.apu.dmc.wants_fetch() {
            let addr = self.apu.dmc.current_address;
            let value = self.peek(addr);
            self.data_bus = value;
            self.apu.dmc.receive_byte(value);
            self.dma_stall += DMC_FETCH_STALL;
        }
    }

    /// Advance the APU frame counter by whole-instruction cycles.
    pub fn clock_apu_frame(&mut self, cycles: u32) {
        self.apu.clock_frame_counter(cycles);
    }

    // =========================================================================
    // Decode helpers
    // =========================================================================

    /// Side-effect-free read: RAM, SRAM and PRG only. Used by OAM DMA,
    /// DMC fetches and the test runners.
    pub fn peek(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[usize::from(addr & 0x07FF)],
            0x6000..=0x7FFF => self.sram[usize::from(addr & 0x1FFF)],
            0x8000..=0xFFFF => {
                let raw = self.prg[usize::from(addr - 0x8000)];
                self.genie.substitute(addr & 0x7FFF, raw)
            }
            _ => self.data_bus,
        }
    }

    /// Open-bus read, accounting for DMC bus hijacking: if a DMC fetch
    /// lands within this instruction, its byte appears instead.
    fn open_bus_read(&self) -> u8 {
        if self.dma_read_overlap() {
            self.peek(self.apu.dmc.current_address)
        } else {
            self.data_bus
        }
    }

    /// $4014 OAM DMA: copy a 256-byte CPU page into OAM at the current
    /// OAM address (wrapping), and stall the CPU.
    fn oam_dma(&mut self, page: u8) {
        let base = u16::from(page) << 8;
        for i in 0..256u16 {
            let value = self.peek(base | i);
            self.ppu.write_oam_dma(value);
        }
        self.dma_stall += OAM_DMA_STALL;
    }

    fn mapper_write(&mut self, addr: u16, value: u8) {
        if let Some(cart) = &self.cart {
            let mut ctx = BankCtx {
                cart,
                prg: &mut self.prg,
                ppu: &mut self.ppu,
            };
            self.mapper.write(&mut ctx, addr, value);
        }
    }
}

impl Bus for NesBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.instr_bus_cycles += 1;

        let value = match addr {
            0x0000..=0x1FFF => self.ram[usize::from(addr & 0x07FF)],
            0x2000..=0x3FFF => {
                self.ppu_catch_up();
                self.ppu.read_register(addr & 0x0007)
            }
            0x4015 => {
                self.apu_catch_up();
                // Bit 5 is open bus
                self.apu.read_status() | (self.data_bus & 0x20)
            }
            0x4016 => self.joy1.read() | (self.data_bus & 0xE0),
            0x4017 => {
                let light = self.ppu.is_pixel_white(self.zapper.x, self.zapper.y);
                let zapper_bits = self.zapper.read(light);
                (self.joy2.read() & 0x07) | zapper_bits | (self.data_bus & 0xE0)
            }
            0x4000..=0x4014 | 0x4018..=0x401F => self.open_bus_read(),
            0x4020..=0x5FFF => match self.mapper.load(addr) {
                Some(value) => value,
                None => self.open_bus_read(),
            },
            0x6000..=0x7FFF => self.sram[usize::from(addr & 0x1FFF)],
            0x8000..=0xFFFF => {
                self.mapper.latch_access(addr);
                let raw = self.prg[usize::from(addr - 0x8000)];
                self.genie.substitute(addr & 0x7FFF, raw)
            }
        };

        self.data_bus = value;
        value
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.instr_bus_cycles += 1;
        self.data_bus = value;

        match addr {
            0x0000..=0x1FFF => self.ram[usize::from(addr & 0x07FF)] = value,
            0x2000..=0x3FFF => {
                self.ppu_catch_up();
                self.ppu.write_register(addr & 0x0007, value);
            }
            0x4014 => self.oam_dma(value),
            0x4016 => {
                self.joy1.write(value);
                self.joy2.write(value);
            }
            0x4000..=0x4013 | 0x4015 | 0x4017 => self.apu.write(addr, value),
            0x4018..=0x401F => {}
            0x4020..=0x5FFF => self.mapper_write(addr, value),
            0x6000..=0x7FFF => {
                self.sram[usize::from(addr & 0x1FFF)] = value;
                self.battery_writes.push((addr, value));
                // Some boards (38, 140) put registers in this range
                self.mapper_write(addr, value);
            }
            0x8000..=0xFFFF => self.mapper_write(addr, value),
        }
    }

    fn tick(&mut self, cycles: u32) {
        // Internal CPU cycles still advance time for catch-up purposes
        self.instr_bus_cycles += cycles;
    }

    fn dma_read_overlap(&self) -> bool {
        matches!(self.dmc_fetch_snapshot, Some(c) if c < self.instr_bus_cycles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bus() -> NesBus {
        let mut bus = NesBus::new(Apu::new(48_000, true));
        let cart = test_cart();
        bus.install_cartridge(cart).unwrap();
        bus
    }

    fn test_cart() -> Cartridge {
        let mut data = vec![0u8; 16 + 16384 + 8192];
        data[0..4].copy_from_slice(b"NES\x1a");
        data[4] = 1;
        data[5] = 1;
        for i in 0..16384 {
            data[16 + i] = (i & 0xFF) as u8;
        }
        Cartridge::parse(&data).unwrap()
    }

    #[test]
    fn ram_mirrors_every_800() {
        let mut bus = make_bus();
        bus.write(0x0000, 0x42);
        assert_eq!(bus.read(0x0000), 0x42);
        assert_eq!(bus.read(0x0800), 0x42);
        assert_eq!(bus.read(0x1000), 0x42);
        assert_eq!(bus.read(0x1800), 0x42);
    }

    #[test]
    fn power_on_ram_pattern() {
        let bus = make_bus();
        assert_eq!(bus.peek(0x0000), 0xFF);
        assert_eq!(bus.peek(0x0008), 0xF7);
        assert_eq!(bus.peek(0x0009), 0xEF);
        assert_eq!(bus.peek(0x000A), 0xDF);
        assert_eq!(bus.peek(0x000F), 0xBF);
    }

    #[test]
    fn data_bus_tracks_last_byte() {
        let mut bus = make_bus();
        bus.write(0x0010, 0xAB);
        assert_eq!(bus.data_bus(), 0xAB);
        bus.ram[0x20] = 0xCD;
        bus.read(0x0020);
        assert_eq!(bus.data_bus(), 0xCD);
    }

    #[test]
    fn unmapped_reads_return_open_bus() {
        let mut bus = make_bus();
        bus.write(0x0010, 0x5A); // Drive the bus
        assert_eq!(bus.read(0x4002), 0x5A); // Write-only APU register
        assert_eq!(bus.read(0x5000), 0x5A); // Unmapped expansion area
    }

    #[test]
    fn controller_bits_use_open_bus_for_high_bits() {
        let mut bus = make_bus();
        bus.write(0x4016, 1);
        bus.write(0x4016, 0);
        bus.write(0x0010, 0xE0); // Drive the bus high bits
        let value = bus.read(0x4016);
        assert_eq!(value & 0xE0, 0xE0);
    }

    #[test]
    fn controller_reads_shift_out_buttons() {
        let mut bus = make_bus();
        bus.joy1.set_button(crate::controller::Button::A, true);
        bus.write(0x4016, 1);
        bus.write(0x4016, 0);
        assert_eq!(bus.read(0x4016) & 1, 1); // A
        for _ in 0..7 {
            bus.read(0x4016);
        }
        // More than 8 reads: always 1
        assert_eq!(bus.read(0x4016) & 1, 1);
        assert_eq!(bus.read(0x4016) & 1, 1);
    }

    #[test]
    fn sram_reads_and_writes() {
        let mut bus = make_bus();
        bus.write(0x6000, 0x42);
        assert_eq!(bus.read(0x6000), 0x42);
        assert_eq!(bus.take_battery_writes(), vec![(0x6000, 0x42)]);
        assert!(bus.take_battery_writes().is_empty());
    }

    #[test]
    fn prg_rom_ignores_writes() {
        let mut bus = make_bus();
        let before = bus.read(0x8000);
        bus.write(0x8000, before.wrapping_add(1));
        assert_eq!(bus.read(0x8000), before);
    }

    #[test]
    fn oam_dma_copies_page_and_stalls() {
        let mut bus = make_bus();
        for i in 0..256u16 {
            bus.ram[0x200 + i as usize] = i as u8;
        }
        bus.write(0x4014, 0x02);
        assert_eq!(bus.take_dma_stall(), OAM_DMA_STALL);
        assert_eq!(bus.ppu.oam_read(0), 0);
        assert_eq!(bus.ppu.oam_read(255), 255);
    }

    #[test]
    fn oam_dma_respects_oam_addr_wrap() {
        let mut bus = make_bus();
        bus.write(0x2003, 0x80); // OAM address = $80
        for i in 0..256u16 {
            bus.ram[0x200 + i as usize] = i as u8;
        }
        bus.write(0x4014, 0x02);
        assert_eq!(bus.ppu.oam_read(0x80), 0);
        assert_eq!(bus.ppu.oam_read(0x7F), 0xFF); // Wrapped
    }

    #[test]
    fn ppu_register_access_catches_up_dots() {
        let mut bus = make_bus();
        bus.begin_instruction();
        bus.read(0x0000); // 1 bus cycle
        bus.read(0x2002); // Triggers catch-up before the register read
        assert_eq!(bus.ppu_catchup_dots(), 6); // 2 cycles * 3 dots
    }

    #[test]
    fn game_genie_substitutes_prg_reads() {
        let mut bus = make_bus();
        bus.genie.add(crate::genie::decode("SXIOPO").unwrap());
        // $91D9 -> offset $11D9; raw PRG value would be $D9 & $FF pattern
        let patched = bus.read(0x91D9);
        assert_eq!(patched, 0xAD);

        bus.genie.set_enabled(false);
        let original = bus.read(0x91D9);
        assert_eq!(original, bus.prg[0x11D9]);
    }

    #[test]
    fn dmc_overlap_reports_within_window() {
        let mut bus = make_bus();
        // Pretend a fetch is due immediately
        bus.apu.write(0x4012, 0x00);
        bus.apu.write(0x4013, 0x01);
        bus.apu.write(0x4015, 0x10);
        bus.begin_instruction();
        assert!(!bus.dma_read_overlap()); // No cycles consumed yet
        bus.read(0x0000);
        assert!(bus.dma_read_overlap()); // Fetch (0 away) < 1 cycle in
    }
}
