//! Cartridge mappers.
//!
//! Each mapper is a variant of the [`Mapper`] enum holding its own
//! register state, dispatched through a small interface: `load` for
//! mapper-register reads, `write` for bank switching, `clock_irq_counter`
//! for scanline-clocked IRQs, and `latch_access` for address-observing
//! boards. Shared memory decode (RAM mirroring, PPU registers, controller
//! reads, open bus) lives in the bus, not here.
//!
//! Banking is copy-based: helpers copy PRG banks into the live CPU
//! window and CHR banks (bytes plus their decoded tiles) into the PPU,
//! so the hot read paths stay plain array indexing.

use crate::cartridge::{Cartridge, CartridgeError, Mirroring, CHR_BANK_SIZE, PRG_BANK_SIZE};
use crate::ppu::Ppu;
use serde::{Deserialize, Serialize};

/// Banking context handed to mapper operations: the cartridge data, the
/// live PRG window, and the PPU (pattern memory and mirroring).
pub struct BankCtx<'a> {
    pub cart: &'a Cartridge,
    pub prg: &'a mut [u8; 0x8000],
    pub ppu: &'a mut Ppu,
}

impl BankCtx<'_> {
    /// Copy a 16 KiB PRG bank to $8000 or $C000.
    pub fn load_rom_bank(&mut self, bank: usize, cpu_addr: u16) {
        let count = self.cart.prg_bank_count();
        if count == 0 {
            return;
        }
        let bank = bank % count;
        let src = &self.cart.prg()[bank * PRG_BANK_SIZE..(bank + 1) * PRG_BANK_SIZE];
        let dst = (cpu_addr as usize - 0x8000) & 0x4000;
        self.prg[dst..dst + PRG_BANK_SIZE].copy_from_slice(src);
    }

    /// Copy a 32 KiB PRG bank across the whole window.
    pub fn load_rom_32k(&mut self, bank: usize) {
        self.load_rom_bank(bank * 2, 0x8000);
        self.load_rom_bank(bank * 2 + 1, 0xC000);
    }

    /// Copy an 8 KiB PRG bank to one quarter of the window.
    pub fn load_rom_8k(&mut self, bank: usize, cpu_addr: u16) {
        let count = self.cart.prg().len() / 8192;
        if count == 0 {
            return;
        }
        let bank = bank % count;
        let src = &self.cart.prg()[bank * 8192..(bank + 1) * 8192];
        let dst = (cpu_addr as usize - 0x8000) & 0x6000;
        self.prg[dst..dst + 8192].copy_from_slice(src);
    }

    /// Copy a 4 KiB CHR bank (bytes and tiles) to PPU $0000 or $1000.
    pub fn load_vrom_bank(&mut self, bank: usize, ppu_addr: u16) {
        let count = self.cart.chr_bank_count();
        if count == 0 {
            return;
        }
        let bank = bank % count;
        let start = bank * CHR_BANK_SIZE;
        self.ppu.load_pattern(
            ppu_addr & 0x1000,
            &self.cart.chr()[start..start + CHR_BANK_SIZE],
            &self.cart.chr_tiles()[start / 16..(start + CHR_BANK_SIZE) / 16],
        );
    }

    /// Copy an 8 KiB CHR bank (two 4 KiB banks).
    pub fn load_vrom_8k(&mut self, bank: usize) {
        self.load_vrom_bank(bank * 2, 0x0000);
        self.load_vrom_bank(bank * 2 + 1, 0x1000);
    }

    /// Copy a 2 KiB CHR slice.
    pub fn load_vrom_2k(&mut self, bank: usize, ppu_addr: u16) {
        self.load_chr_slice(bank, ppu_addr, 2048);
    }

    /// Copy a 1 KiB CHR slice.
    pub fn load_vrom_1k(&mut self, bank: usize, ppu_addr: u16) {
        self.load_chr_slice(bank, ppu_addr, 1024);
    }

    fn load_chr_slice(&mut self, bank: usize, ppu_addr: u16, size: usize) {
        let chr = self.cart.chr();
        if chr.is_empty() {
            return;
        }
        let count = chr.len() / size;
        let bank = bank % count.max(1);
        let start = bank * size;
        self.ppu.load_pattern(
            ppu_addr & 0x1FFF,
            &chr[start..start + size],
            &self.cart.chr_tiles()[start / 16..(start + size) / 16],
        );
    }

    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        self.ppu.set_mirroring(mirroring);
    }
}

/// MMC1 (Mapper 1): 5-bit serial shift register feeding four registers.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Mmc1 {
    shift_register: u8,
    write_count: u8,
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
}

/// MMC3 (Mapper 4): 8-register bank select plus a scanline IRQ counter.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Mmc3 {
    bank_select: u8,
    banks: [u8; 8],
    prg_mode: bool,
    chr_inversion: bool,
    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_pending: bool,
}

/// MMC5 (Mapper 5), partial: the register file and IRQ counter are
/// modelled; ExRAM, split screen and the extended nametable modes update
/// state without changing the rendered output.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Mmc5 {
    prg_mode: u8,
    chr_mode: u8,
    exram_mode: u8,
    nametable_map: u8,
    fill_tile: u8,
    fill_attr: u8,
    prg_banks: [u8; 4],
    chr_sprite_banks: [u8; 8],
    chr_bg_banks: [u8; 4],
    irq_target: u8,
    irq_enabled: bool,
    irq_pending: bool,
    scanline: u8,
    multiplicand: u8,
    multiplier: u8,
}

/// Cartridge mapper state, one variant per supported board.
#[derive(Clone, Serialize, Deserialize)]
pub enum Mapper {
    /// Mapper 0: no banking.
    Nrom,
    /// Mapper 1.
    Mmc1(Mmc1),
    /// Mapper 2: 16 KiB PRG swap at $8000.
    Unrom { prg_bank: u8 },
    /// Mapper 3: 8 KiB CHR swap.
    Cnrom { chr_bank: u8 },
    /// Mapper 4.
    Mmc3(Mmc3),
    /// Mapper 5 (partial).
    Mmc5(Mmc5),
    /// Mapper 7: 32 KiB PRG swap plus single-screen select.
    Axrom { prg_bank: u8 },
    /// Mapper 11: PRG and CHR from one write.
    ColorDreams { reg: u8 },
    /// Mapper 34: 32 KiB PRG swap.
    Bnrom { prg_bank: u8 },
    /// Mapper 38: PRG/CHR select at $7000-$7FFF.
    Mapper38 { reg: u8 },
    /// Mapper 66: PRG/CHR select in one register.
    Gxrom { reg: u8 },
    /// Mapper 94: 16 KiB PRG swap from bits 4-2.
    Un1rom { prg_bank: u8 },
    /// Mapper 140: register at $6000-$7FFF.
    Mapper140 { reg: u8 },
    /// Mapper 180 (Crazy Climber): swaps the $C000 bank, $8000 fixed.
    CrazyClimber { prg_bank: u8 },
    /// Mapper 240: register at $4020-$5FFF.
    Mapper240 { reg: u8 },
    /// Mapper 241: 32 KiB PRG at $8000+.
    Mapper241 { prg_bank: u8 },
}

impl Mapper {
    /// Create the mapper for a parsed cartridge.
    pub fn create(cart: &Cartridge) -> Result<Self, CartridgeError> {
        match cart.mapper_number() {
            0 => Ok(Self::Nrom),
            1 => Ok(Self::Mmc1(Mmc1 {
                control: 0x0C,
                ..Mmc1::default()
            })),
            2 => Ok(Self::Unrom { prg_bank: 0 }),
            3 => Ok(Self::Cnrom { chr_bank: 0 }),
            4 => Ok(Self::Mmc3(Mmc3::default())),
            5 => Ok(Self::Mmc5(Mmc5 {
                prg_mode: 3,
                ..Mmc5::default()
            })),
            7 => Ok(Self::Axrom { prg_bank: 0 }),
            11 => Ok(Self::ColorDreams { reg: 0 }),
            34 => Ok(Self::Bnrom { prg_bank: 0 }),
            38 => Ok(Self::Mapper38 { reg: 0 }),
            66 => Ok(Self::Gxrom { reg: 0 }),
            94 => Ok(Self::Un1rom { prg_bank: 0 }),
            140 => Ok(Self::Mapper140 { reg: 0 }),
            180 => Ok(Self::CrazyClimber { prg_bank: 0 }),
            240 => Ok(Self::Mapper240 { reg: 0 }),
            241 => Ok(Self::Mapper241 { prg_bank: 0 }),
            n => Err(CartridgeError::UnsupportedMapper(n)),
        }
    }

    /// Set up the initial bank mapping after a cartridge is installed.
    pub fn load_rom(&mut self, ctx: &mut BankCtx) {
        ctx.set_mirroring(ctx.cart.mirroring());
        match self {
            Self::Nrom
            | Self::Cnrom { .. }
            | Self::ColorDreams { .. }
            | Self::Bnrom { .. }
            | Self::Mapper38 { .. }
            | Self::Gxrom { .. }
            | Self::Mapper140 { .. }
            | Self::Mapper240 { .. }
            | Self::Mapper241 { .. } => {
                // 32 KiB at $8000 (16 KiB boards mirror)
                if ctx.cart.prg_bank_count() >= 2 {
                    ctx.load_rom_32k(0);
                } else {
                    ctx.load_rom_bank(0, 0x8000);
                    ctx.load_rom_bank(0, 0xC000);
                }
                ctx.load_vrom_8k(0);
            }
            Self::Mmc1(state) => {
                state.apply(ctx);
            }
            Self::Unrom { .. } | Self::Un1rom { .. } => {
                // First bank at $8000, last fixed at $C000
                ctx.load_rom_bank(0, 0x8000);
                ctx.load_rom_bank(ctx.cart.prg_bank_count() - 1, 0xC000);
                ctx.load_vrom_8k(0);
            }
            Self::Mmc3(state) => {
                state.apply(ctx);
                ctx.load_vrom_8k(0);
            }
            Self::Mmc5(state) => {
                state.apply_prg(ctx);
                ctx.load_vrom_8k(0);
            }
            Self::Axrom { .. } => {
                ctx.load_rom_32k(0);
                ctx.set_mirroring(Mirroring::SingleLower);
                ctx.load_vrom_8k(0);
            }
            Self::CrazyClimber { .. } => {
                // $8000 fixed to the first bank, $C000 switchable
                ctx.load_rom_bank(0, 0x8000);
                ctx.load_rom_bank(0, 0xC000);
                ctx.load_vrom_8k(0);
            }
        }
    }

    /// Mapper-register read for $4020-$7FFF. `None` falls through to the
    /// bus's default decode (SRAM or open bus).
    pub fn load(&mut self, addr: u16) -> Option<u8> {
        match self {
            Self::Mmc5(state) => state.load(addr),
            _ => None,
        }
    }

    /// Bank-switching write dispatch for $4020-$FFFF.
    pub fn write(&mut self, ctx: &mut BankCtx, addr: u16, value: u8) {
        match self {
            Self::Nrom => {}
            Self::Mmc1(state) => {
                if addr >= 0x8000 {
                    state.write(ctx, addr, value);
                }
            }
            Self::Unrom { prg_bank } => {
                if addr >= 0x8000 {
                    *prg_bank = value & 0x0F;
                    ctx.load_rom_bank(usize::from(*prg_bank), 0x8000);
                }
            }
            Self::Cnrom { chr_bank } => {
                if addr >= 0x8000 {
                    *chr_bank = value & 0x03;
                    ctx.load_vrom_8k(usize::from(*chr_bank));
                }
            }
            Self::Mmc3(state) => {
                if addr >= 0x8000 {
                    state.write(ctx, addr, value);
                }
            }
            Self::Mmc5(state) => state.write(ctx, addr, value),
            Self::Axrom { prg_bank } => {
                if addr >= 0x8000 {
                    *prg_bank = value & 0x07;
                    ctx.load_rom_32k(usize::from(*prg_bank));
                    ctx.set_mirroring(if value & 0x10 != 0 {
                        Mirroring::SingleUpper
                    } else {
                        Mirroring::SingleLower
                    });
                }
            }
            Self::ColorDreams { reg } => {
                if addr >= 0x8000 {
                    *reg = value;
                    ctx.load_rom_32k(usize::from(value & 0x03));
                    ctx.load_vrom_8k(usize::from((value >> 4) & 0x0F));
                }
            }
            Self::Bnrom { prg_bank } => {
                if addr >= 0x8000 {
                    *prg_bank = value & 0x03;
                    ctx.load_rom_32k(usize::from(*prg_bank));
                }
            }
            Self::Mapper38 { reg } => {
                if (0x7000..=0x7FFF).contains(&addr) {
                    *reg = value;
                    ctx.load_rom_32k(usize::from(value & 0x03));
                    ctx.load_vrom_8k(usize::from((value >> 2) & 0x03));
                }
            }
            Self::Gxrom { reg } => {
                if addr >= 0x8000 {
                    *reg = value;
                    ctx.load_rom_32k(usize::from((value >> 4) & 0x03));
                    ctx.load_vrom_8k(usize::from(value & 0x03));
                }
            }
            Self::Un1rom { prg_bank } => {
                if addr >= 0x8000 {
                    *prg_bank = (value >> 2) & 0x07;
                    ctx.load_rom_bank(usize::from(*prg_bank), 0x8000);
                }
            }
            Self::Mapper140 { reg } => {
                if (0x6000..=0x7FFF).contains(&addr) {
                    *reg = value;
                    ctx.load_rom_32k(usize::from((value >> 4) & 0x03));
                    ctx.load_vrom_8k(usize::from(value & 0x0F));
                }
            }
            Self::CrazyClimber { prg_bank } => {
                if addr >= 0x8000 {
                    *prg_bank = value & 0x07;
                    ctx.load_rom_bank(usize::from(*prg_bank), 0xC000);
                }
            }
            Self::Mapper240 { reg } => {
                if (0x4020..=0x5FFF).contains(&addr) {
                    *reg = value;
                    ctx.load_rom_32k(usize::from((value >> 4) & 0x03));
                    ctx.load_vrom_8k(usize::from(value & 0x0F));
                }
            }
            Self::Mapper241 { prg_bank } => {
                if addr >= 0x8000 {
                    *prg_bank = value;
                    ctx.load_rom_32k(usize::from(*prg_bank));
                }
            }
        }
    }

    /// Scanline IRQ clock, driven by the PPU at the rendering boundary.
    pub fn clock_irq_counter(&mut self) {
        match self {
            Self::Mmc3(state) => state.clock_irq(),
            Self::Mmc5(state) => state.clock_irq(),
            _ => {}
        }
    }

    /// Whether the mapper is asserting its IRQ line.
    pub fn irq_pending(&self) -> bool {
        match self {
            Self::Mmc3(state) => state.irq_pending,
            Self::Mmc5(state) => state.irq_pending,
            _ => false,
        }
    }

    /// Address-observation hook for boards that latch PPU fetches.
    /// None of the supported boards react; MMC5 consumes it as a
    /// fetch-counter input only.
    pub fn latch_access(&mut self, _addr: u16) {}
}

impl Mmc1 {
    fn write(&mut self, ctx: &mut BankCtx, addr: u16, value: u8) {
        if value & 0x80 != 0 {
            // Reset: clear the shift register, force PRG mode 3
            self.shift_register = 0;
            self.write_count = 0;
            self.control |= 0x0C;
            self.apply(ctx);
            return;
        }

        self.shift_register |= (value & 0x01) << self.write_count;
        self.write_count += 1;

        if self.write_count == 5 {
            let data = self.shift_register;
            match addr {
                0x8000..=0x9FFF => self.control = data,
                0xA000..=0xBFFF => self.chr_bank0 = data,
                0xC000..=0xDFFF => self.chr_bank1 = data,
                _ => self.prg_bank = data,
            }
            self.shift_register = 0;
            self.write_count = 0;
            self.apply(ctx);
        }
    }

    fn apply(&self, ctx: &mut BankCtx) {
        ctx.set_mirroring(match self.control & 0x03 {
            0 => Mirroring::SingleLower,
            1 => Mirroring::SingleUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        });

        let prg_bank = usize::from(self.prg_bank & 0x0F);
        let last = ctx.cart.prg_bank_count().saturating_sub(1);
        match (self.control >> 2) & 0x03 {
            0 | 1 => {
                // 32 KiB mode, low bit ignored
                ctx.load_rom_32k(prg_bank >> 1);
            }
            2 => {
                // Fixed first bank, switchable $C000
                ctx.load_rom_bank(0, 0x8000);
                ctx.load_rom_bank(prg_bank, 0xC000);
            }
            _ => {
                // Switchable $8000, fixed last bank
                ctx.load_rom_bank(prg_bank, 0x8000);
                ctx.load_rom_bank(last, 0xC000);
            }
        }

        if self.control & 0x10 == 0 {
            // 8 KiB CHR mode, low bit ignored
            let bank = usize::from(self.chr_bank0 & 0x1E);
            ctx.load_vrom_bank(bank, 0x0000);
            ctx.load_vrom_bank(bank + 1, 0x1000);
        } else {
            ctx.load_vrom_bank(usize::from(self.chr_bank0), 0x0000);
            ctx.load_vrom_bank(usize::from(self.chr_bank1), 0x1000);
        }
    }
}

impl Mmc3 {
    fn write(&mut self, ctx: &mut BankCtx, addr: u16, value: u8) {
        match (addr & 0xE000, addr & 1) {
            (0x8000, 0) => {
                self.bank_select = value & 0x07;
                self.prg_mode = value & 0x40 != 0;
                self.chr_inversion = value & 0x80 != 0;
                self.apply(ctx);
            }
            (0x8000, _) => {
                self.banks[usize::from(self.bank_select)] = value;
                self.apply(ctx);
            }
            (0xA000, 0) => {
                // Ignored on four-screen boards
                if ctx.cart.mirroring() != Mirroring::FourScreen {
                    ctx.set_mirroring(if value & 1 == 0 {
                        Mirroring::Vertical
                    } else {
                        Mirroring::Horizontal
                    });
                }
            }
            (0xA000, _) => {
                // PRG RAM protect: no observable effect here
            }
            (0xC000, 0) => self.irq_latch = value,
            (0xC000, _) => self.irq_reload = true,
            (0xE000, 0) => {
                self.irq_enabled = false;
                self.irq_pending = false;
            }
            _ => self.irq_enabled = true,
        }
    }

    fn apply(&self, ctx: &mut BankCtx) {
        let bank_count_8k = ctx.cart.prg().len() / 8192;
        let last = bank_count_8k.saturating_sub(1);
        let second_last = bank_count_8k.saturating_sub(2);
        let r6 = usize::from(self.banks[6]);
        let r7 = usize::from(self.banks[7]);

        if self.prg_mode {
            ctx.load_rom_8k(second_last, 0x8000);
            ctx.load_rom_8k(r7, 0xA000);
            ctx.load_rom_8k(r6, 0xC000);
        } else {
            ctx.load_rom_8k(r6, 0x8000);
            ctx.load_rom_8k(r7, 0xA000);
            ctx.load_rom_8k(second_last, 0xC000);
        }
        ctx.load_rom_8k(last, 0xE000);

        // R0/R1 are 2 KiB banks (low bit ignored), R2-R5 are 1 KiB.
        // chr_inversion swaps which pattern table gets which group.
        let (two_k_base, one_k_base) = if self.chr_inversion {
            (0x1000, 0x0000)
        } else {
            (0x0000, 0x1000)
        };
        ctx.load_vrom_2k(usize::from(self.banks[0] >> 1), two_k_base);
        ctx.load_vrom_2k(usize::from(self.banks[1] >> 1), two_k_base + 0x0800);
        ctx.load_vrom_1k(usize::from(self.banks[2]), one_k_base);
        ctx.load_vrom_1k(usize::from(self.banks[3]), one_k_base + 0x0400);
        ctx.load_vrom_1k(usize::from(self.banks[4]), one_k_base + 0x0800);
        ctx.load_vrom_1k(usize::from(self.banks[5]), one_k_base + 0x0C00);
    }

    fn clock_irq(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }

        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_pending = true;
        }
    }
}

impl Mmc5 {
    fn load(&mut self, addr: u16) -> Option<u8> {
        match addr {
            0x5204 => {
                let status = if self.irq_pending { 0x80 } else { 0 };
                self.irq_pending = false;
                Some(status)
            }
            0x5205 => {
                Some((u16::from(self.multiplicand) * u16::from(self.multiplier)) as u8)
            }
            0x5206 => {
                Some(((u16::from(self.multiplicand) * u16::from(self.multiplier)) >> 8) as u8)
            }
            _ => None,
        }
    }

    fn write(&mut self, ctx: &mut BankCtx, addr: u16, value: u8) {
        match addr {
            0x5100 => {
                self.prg_mode = value & 0x03;
                self.apply_prg(ctx);
            }
            0x5101 => self.chr_mode = value & 0x03,
            0x5104 => self.exram_mode = value & 0x03,
            0x5105 => self.nametable_map = value,
            0x5106 => self.fill_tile = value,
            0x5107 => self.fill_attr = value & 0x03,
            0x5114..=0x5117 => {
                self.prg_banks[usize::from(addr - 0x5114)] = value;
                self.apply_prg(ctx);
            }
            0x5120..=0x5127 => {
                self.chr_sprite_banks[usize::from(addr - 0x5120)] = value;
                self.apply_chr(ctx);
            }
            0x5128..=0x512B => {
                self.chr_bg_banks[usize::from(addr - 0x5128)] = value;
                self.apply_chr(ctx);
            }
            0x5203 => self.irq_target = value,
            0x5204 => self.irq_enabled = value & 0x80 != 0,
            0x5205 => self.multiplicand = value,
            0x5206 => self.multiplier = value,
            _ => {
                if addr >= 0x5000 && addr < 0x5C00 {
                    log::debug!("mmc5: unhandled register write ${addr:04X} = ${value:02X}");
                }
            }
        }
    }

    fn apply_prg(&self, ctx: &mut BankCtx) {
        let last_8k = (ctx.cart.prg().len() / 8192).saturating_sub(1);
        match self.prg_mode {
            0 => {
                ctx.load_rom_32k(usize::from(self.prg_banks[3] & 0x7F) >> 2);
            }
            1 => {
                ctx.load_rom_8k(usize::from(self.prg_banks[1] & 0x7E), 0x8000);
                ctx.load_rom_8k(usize::from(self.prg_banks[1] & 0x7E) + 1, 0xA000);
                ctx.load_rom_8k(usize::from(self.prg_banks[3] & 0x7E), 0xC000);
                ctx.load_rom_8k(usize::from(self.prg_banks[3] & 0x7E) + 1, 0xE000);
            }
            2 => {
                ctx.load_rom_8k(usize::from(self.prg_banks[1] & 0x7E), 0x8000);
                ctx.load_rom_8k(usize::from(self.prg_banks[1] & 0x7E) + 1, 0xA000);
                ctx.load_rom_8k(usize::from(self.prg_banks[2] & 0x7F), 0xC000);
                ctx.load_rom_8k(last_8k, 0xE000);
            }
            _ => {
                ctx.load_rom_8k(usize::from(self.prg_banks[0] & 0x7F), 0x8000);
                ctx.load_rom_8k(usize::from(self.prg_banks[1] & 0x7F), 0xA000);
                ctx.load_rom_8k(usize::from(self.prg_banks[2] & 0x7F), 0xC000);
                ctx.load_rom_8k(last_8k, 0xE000);
            }
        }
    }

    fn apply_chr(&self, ctx: &mut BankCtx) {
        match self.chr_mode {
            0 => ctx.load_vrom_8k(usize::from(self.chr_sprite_banks[7])),
            1 => {
                ctx.load_vrom_bank(usize::from(self.chr_sprite_banks[3]), 0x0000);
                ctx.load_vrom_bank(usize::from(self.chr_sprite_banks[7]), 0x1000);
            }
            2 => {
                ctx.load_vrom_2k(usize::from(self.chr_sprite_banks[1]), 0x0000);
                ctx.load_vrom_2k(usize::from(self.chr_sprite_banks[3]), 0x0800);
                ctx.load_vrom_2k(usize::from(self.chr_sprite_banks[5]), 0x1000);
                ctx.load_vrom_2k(usize::from(self.chr_sprite_banks[7]), 0x1800);
            }
            _ => {
                for (i, &bank) in self.chr_sprite_banks.iter().enumerate() {
                    ctx.load_vrom_1k(usize::from(bank), (i as u16) * 0x0400);
                }
            }
        }
    }

    fn clock_irq(&mut self) {
        self.scanline = self.scanline.wrapping_add(1);
        if self.scanline == self.irq_target && self.irq_enabled && self.irq_target != 0 {
            self.irq_pending = true;
        }
    }

    /// Called at the start of each frame.
    pub fn start_frame(&mut self) {
        self.scanline = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;

    fn make_cart(mapper: u8, prg_banks: u8, chr_banks: u8) -> Cartridge {
        let prg_size = usize::from(prg_banks) * 16384;
        let chr_size = usize::from(chr_banks) * 8192;
        let mut data = vec![0u8; 16 + prg_size + chr_size];
        data[0..4].copy_from_slice(b"NES\x1a");
        data[4] = prg_banks;
        data[5] = chr_banks;
        data[6] = (mapper & 0x0F) << 4;
        data[7] = mapper & 0xF0;
        // Stamp each 16K PRG bank with its index
        for bank in 0..usize::from(prg_banks) {
            data[16 + bank * 16384] = bank as u8;
        }
        // Stamp each 4K CHR bank with its index in the first plane byte
        for bank in 0..(chr_size / 4096) {
            data[16 + prg_size + bank * 4096] = bank as u8;
        }
        Cartridge::parse(&data).unwrap()
    }

    struct Rig {
        cart: Cartridge,
        prg: Box<[u8; 0x8000]>,
        ppu: Ppu,
    }

    impl Rig {
        fn new(mapper: u8, prg_banks: u8, chr_banks: u8) -> (Self, Mapper) {
            let cart = make_cart(mapper, prg_banks, chr_banks);
            let mapper = Mapper::create(&cart).unwrap();
            (
                Self {
                    cart,
                    prg: Box::new([0; 0x8000]),
                    ppu: Ppu::new(),
                },
                mapper,
            )
        }

        fn ctx(&mut self) -> BankCtx<'_> {
            BankCtx {
                cart: &self.cart,
                prg: &mut self.prg,
                ppu: &mut self.ppu,
            }
        }
    }

    #[test]
    fn unsupported_mapper_rejected() {
        let cart = make_cart(99, 1, 1);
        assert!(matches!(
            Mapper::create(&cart),
            Err(CartridgeError::UnsupportedMapper(99))
        ));
    }

    #[test]
    fn nrom_16k_mirrors() {
        let (mut rig, mut mapper) = Rig::new(0, 1, 1);
        mapper.load_rom(&mut rig.ctx());
        assert_eq!(rig.prg[0x0000], 0); // Bank 0 at $8000
        assert_eq!(rig.prg[0x4000], 0); // Bank 0 mirrored at $C000
    }

    #[test]
    fn unrom_swaps_low_bank_only() {
        let (mut rig, mut mapper) = Rig::new(2, 4, 0);
        mapper.load_rom(&mut rig.ctx());
        assert_eq!(rig.prg[0x4000], 3); // Last bank fixed at $C000

        mapper.write(&mut rig.ctx(), 0x8000, 2);
        assert_eq!(rig.prg[0x0000], 2);
        assert_eq!(rig.prg[0x4000], 3); // Still fixed
    }

    #[test]
    fn cnrom_swaps_chr() {
        let (mut rig, mut mapper) = Rig::new(3, 1, 4);
        mapper.load_rom(&mut rig.ctx());
        mapper.write(&mut rig.ctx(), 0x8000, 1);
        // CHR 8K bank 1 = 4K banks 2 and 3; bank index stamped in byte 0
        assert_eq!(rig.ppu.pattern_byte(0x0000), 2);
        assert_eq!(rig.ppu.pattern_byte(0x1000), 3);
    }

    #[test]
    fn mmc1_shift_register_loads_after_five_writes() {
        let (mut rig, mut mapper) = Rig::new(1, 4, 1);
        mapper.load_rom(&mut rig.ctx());

        // Serially write $02 into the PRG bank register ($E000 range)
        for i in 0..5 {
            let bit = (0x02 >> i) & 1;
            mapper.write(&mut rig.ctx(), 0xE000, bit);
        }
        // Default control = mode 3: switchable $8000, fixed last at $C000
        assert_eq!(rig.prg[0x0000], 2);
        assert_eq!(rig.prg[0x4000], 3);
    }

    #[test]
    fn mmc1_reset_bit_restores_prg_mode() {
        let (mut rig, mut mapper) = Rig::new(1, 4, 1);
        mapper.load_rom(&mut rig.ctx());
        mapper.write(&mut rig.ctx(), 0x8000, 0x80);
        if let Mapper::Mmc1(state) = &mapper {
            assert_eq!(state.control & 0x0C, 0x0C);
            assert_eq!(state.write_count, 0);
        } else {
            panic!("not mmc1");
        }
    }

    #[test]
    fn axrom_selects_bank_and_mirroring() {
        let (mut rig, mut mapper) = Rig::new(7, 8, 0);
        mapper.load_rom(&mut rig.ctx());

        mapper.write(&mut rig.ctx(), 0x8000, 0x13); // Bank 3, upper screen
        assert_eq!(rig.prg[0x0000], 6); // 32K bank 3 = 16K bank 6
        assert_eq!(rig.ppu.mirroring(), Mirroring::SingleUpper);
    }

    #[test]
    fn mmc3_prg_modes() {
        let (mut rig, mut mapper) = Rig::new(4, 8, 1); // 8 x 16K = 16 x 8K
        mapper.load_rom(&mut rig.ctx());

        // Select R6 = 4 (8K bank 4 lives in 16K bank 2, first half)
        mapper.write(&mut rig.ctx(), 0x8000, 6);
        mapper.write(&mut rig.ctx(), 0x8001, 4);
        assert_eq!(rig.prg[0x0000], 2); // 8K bank 4 starts at 16K bank 2

        // Flip PRG mode: $8000 becomes second-last, $C000 gets R6
        mapper.write(&mut rig.ctx(), 0x8000, 0x46);
        assert_eq!(rig.prg[0x4000], 2);
    }

    #[test]
    fn mmc3_irq_counts_scanlines() {
        let (mut rig, mut mapper) = Rig::new(4, 2, 1);
        mapper.load_rom(&mut rig.ctx());

        mapper.write(&mut rig.ctx(), 0xC000, 3); // Latch = 3
        mapper.write(&mut rig.ctx(), 0xC001, 0); // Reload
        mapper.write(&mut rig.ctx(), 0xE001, 0); // Enable

        for _ in 0..3 {
            mapper.clock_irq_counter();
            assert!(!mapper.irq_pending());
        }
        mapper.clock_irq_counter(); // Counter hits zero
        assert!(mapper.irq_pending());

        // Disabling acknowledges
        mapper.write(&mut rig.ctx(), 0xE000, 0);
        assert!(!mapper.irq_pending());
    }

    #[test]
    fn gxrom_single_write_selects_both() {
        let (mut rig, mut mapper) = Rig::new(66, 4, 2);
        mapper.load_rom(&mut rig.ctx());
        mapper.write(&mut rig.ctx(), 0x8000, 0x11); // PRG 1, CHR 1
        assert_eq!(rig.prg[0x0000], 2);
        assert_eq!(rig.ppu.pattern_byte(0x0000), 2);
    }

    #[test]
    fn crazy_climber_swaps_high_bank() {
        let (mut rig, mut mapper) = Rig::new(180, 4, 0);
        mapper.load_rom(&mut rig.ctx());
        mapper.write(&mut rig.ctx(), 0x8000, 2);
        assert_eq!(rig.prg[0x0000], 0); // Fixed first bank
        assert_eq!(rig.prg[0x4000], 2); // Switched
    }

    #[test]
    fn mapper240_register_below_prg_space() {
        let (mut rig, mut mapper) = Rig::new(240, 4, 2);
        mapper.load_rom(&mut rig.ctx());
        mapper.write(&mut rig.ctx(), 0x5000, 0x10); // PRG 1
        assert_eq!(rig.prg[0x0000], 2);
        // Writes at $8000+ are ignored by this board
        mapper.write(&mut rig.ctx(), 0x8000, 0x00);
        assert_eq!(rig.prg[0x0000], 2);
    }

    #[test]
    fn mmc5_multiplier_reads_back_product() {
        let (mut rig, mut mapper) = Rig::new(5, 8, 2);
        mapper.load_rom(&mut rig.ctx());
        mapper.write(&mut rig.ctx(), 0x5205, 12);
        mapper.write(&mut rig.ctx(), 0x5206, 34);
        assert_eq!(mapper.load(0x5205), Some((12u16 * 34) as u8));
        assert_eq!(mapper.load(0x5206), Some(((12u16 * 34) >> 8) as u8));
    }
}
