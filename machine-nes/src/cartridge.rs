//! iNES cartridge parsing.
//!
//! Parses the iNES file format (16-byte header, optional 512-byte
//! trainer, PRG ROM, CHR ROM) into bank arrays. CHR data is also decoded
//! into a parallel `Tile` view, one tile per 16 bytes, which the
//! bank-load helpers copy into the PPU alongside the raw bytes.

use crate::tile::Tile;
use std::fmt;

/// PRG bank size used by the bank-load helpers (16 KiB).
pub const PRG_BANK_SIZE: usize = 16 * 1024;
/// CHR bank size used by the bank-load helpers (4 KiB).
pub const CHR_BANK_SIZE: usize = 4 * 1024;

/// Nametable mirroring mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Mirroring {
    /// Horizontal mirroring (vertical scrolling games).
    Horizontal,
    /// Vertical mirroring (horizontal scrolling games).
    Vertical,
    /// Single-screen, lower bank.
    SingleLower,
    /// Single-screen, upper bank.
    SingleUpper,
    /// Four-screen (cartridge provides extra VRAM).
    FourScreen,
}

/// Error raised while parsing a ROM image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CartridgeError {
    /// Shorter than the 16-byte header.
    TooShort,
    /// Header magic is not "NES\x1A".
    BadMagic,
    /// Header promises more PRG/CHR data than the file contains.
    Truncated { expected: usize, actual: usize },
    /// Mapper number outside the supported set.
    UnsupportedMapper(u8),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "iNES file too short (< 16 bytes)"),
            Self::BadMagic => write!(f, "invalid iNES magic (expected NES\\x1A)"),
            Self::Truncated { expected, actual } => {
                write!(
                    f,
                    "iNES file truncated: expected {expected} bytes, got {actual}"
                )
            }
            Self::UnsupportedMapper(n) => write!(f, "unsupported mapper: {n}"),
        }
    }
}

impl std::error::Error for CartridgeError {}

/// A parsed cartridge: raw bank data plus the decoded tile view.
#[derive(Debug)]
pub struct Cartridge {
    /// Raw PRG ROM.
    prg: Vec<u8>,
    /// Raw CHR data. For CHR-RAM boards this starts zeroed.
    chr: Vec<u8>,
    /// Decoded tiles, parallel to `chr` (one per 16 bytes).
    chr_tiles: Vec<Tile>,
    /// True when the board has CHR RAM instead of ROM.
    chr_is_ram: bool,
    /// Number of 16 KiB PRG banks.
    prg_bank_count: usize,
    /// Number of 4 KiB CHR banks.
    chr_bank_count: usize,
    /// Mapper number from the header.
    mapper_number: u8,
    /// Header mirroring.
    mirroring: Mirroring,
    /// Battery-backed SRAM flag.
    battery: bool,
}

impl Cartridge {
    /// Parse an iNES image.
    pub fn parse(data: &[u8]) -> Result<Self, CartridgeError> {
        if data.len() < 16 {
            return Err(CartridgeError::TooShort);
        }
        if &data[0..4] != b"NES\x1a" {
            return Err(CartridgeError::BadMagic);
        }

        let prg_banks_16k = usize::from(data[4]);
        let chr_banks_8k = usize::from(data[5]);
        let flags6 = data[6];
        let flags7 = data[7];

        let mapper_number = (flags7 & 0xF0) | ((flags6 >> 4) & 0x0F);
        let mirroring = if flags6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let battery = flags6 & 0x02 != 0;
        let has_trainer = flags6 & 0x04 != 0;

        let prg_size = prg_banks_16k * PRG_BANK_SIZE;
        let chr_size = chr_banks_8k * 8192;
        let prg_start = if has_trainer { 16 + 512 } else { 16 };
        let expected = prg_start + prg_size + chr_size;

        if data.len() < expected {
            return Err(CartridgeError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        let prg = data[prg_start..prg_start + prg_size].to_vec();
        let chr_is_ram = chr_size == 0;
        let chr = if chr_is_ram {
            vec![0u8; 8192] // 8 KiB CHR RAM
        } else {
            data[prg_start + prg_size..prg_start + prg_size + chr_size].to_vec()
        };

        let chr_tiles = decode_tiles(&chr);
        let chr_bank_count = chr.len() / CHR_BANK_SIZE;

        Ok(Self {
            prg,
            chr,
            chr_tiles,
            chr_is_ram,
            prg_bank_count: prg_banks_16k,
            chr_bank_count,
            mapper_number,
            mirroring,
            battery,
        })
    }

    pub fn prg(&self) -> &[u8] {
        &self.prg
    }

    pub fn chr(&self) -> &[u8] {
        &self.chr
    }

    pub fn chr_tiles(&self) -> &[Tile] {
        &self.chr_tiles
    }

    pub fn chr_is_ram(&self) -> bool {
        self.chr_is_ram
    }

    /// Number of 16 KiB PRG banks.
    pub fn prg_bank_count(&self) -> usize {
        self.prg_bank_count
    }

    /// Number of 4 KiB CHR banks.
    pub fn chr_bank_count(&self) -> usize {
        self.chr_bank_count
    }

    pub fn mapper_number(&self) -> u8 {
        self.mapper_number
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn has_battery(&self) -> bool {
        self.battery
    }
}

/// Decode raw CHR bytes into tiles (16 bytes each).
pub fn decode_tiles(chr: &[u8]) -> Vec<Tile> {
    let mut tiles = Vec::with_capacity(chr.len() / 16);
    for bytes in chr.chunks_exact(16) {
        let mut tile = Tile::new();
        tile.decode(bytes);
        tiles.push(tile);
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ines(prg_banks: u8, chr_banks: u8, flags6: u8) -> Vec<u8> {
        let prg_size = usize::from(prg_banks) * 16384;
        let chr_size = usize::from(chr_banks) * 8192;
        let mut data = vec![0u8; 16 + prg_size + chr_size];
        data[0..4].copy_from_slice(b"NES\x1a");
        data[4] = prg_banks;
        data[5] = chr_banks;
        data[6] = flags6;
        for i in 0..prg_size {
            data[16 + i] = (i & 0xFF) as u8;
        }
        for i in 0..chr_size {
            data[16 + prg_size + i] = ((i + 0x80) & 0xFF) as u8;
        }
        data
    }

    #[test]
    fn parse_valid_nrom() {
        let data = make_ines(1, 1, 0x00);
        let cart = Cartridge::parse(&data).expect("parse failed");
        assert_eq!(cart.mapper_number(), 0);
        assert_eq!(cart.mirroring(), Mirroring::Horizontal);
        assert_eq!(cart.prg_bank_count(), 1);
        assert_eq!(cart.chr_bank_count(), 2); // 8 KiB = two 4 KiB banks
        assert!(!cart.chr_is_ram());
    }

    #[test]
    fn parse_vertical_mirroring_and_battery() {
        let data = make_ines(2, 1, 0x03);
        let cart = Cartridge::parse(&data).expect("parse failed");
        assert_eq!(cart.mirroring(), Mirroring::Vertical);
        assert!(cart.has_battery());
    }

    #[test]
    fn chr_ram_board_gets_zeroed_ram() {
        let data = make_ines(1, 0, 0x00);
        let cart = Cartridge::parse(&data).expect("parse failed");
        assert!(cart.chr_is_ram());
        assert_eq!(cart.chr().len(), 8192);
        assert!(cart.chr().iter().all(|&b| b == 0));
    }

    #[test]
    fn trainer_is_skipped() {
        let mut data = make_ines(1, 0, 0x04);
        // Insert 512 trainer bytes after the header
        let trainer = vec![0xEE; 512];
        data.splice(16..16, trainer);
        let cart = Cartridge::parse(&data).expect("parse failed");
        assert_eq!(cart.prg()[0], 0x00); // PRG pattern starts after trainer
    }

    #[test]
    fn bad_magic_rejected() {
        let data = vec![0u8; 32];
        match Cartridge::parse(&data) {
            Err(CartridgeError::BadMagic) => {}
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn truncated_rejected() {
        let mut data = make_ines(1, 1, 0x00);
        data.truncate(1024);
        assert!(matches!(
            Cartridge::parse(&data),
            Err(CartridgeError::Truncated { .. })
        ));
    }

    #[test]
    fn mapper_number_combines_nibbles() {
        let mut data = make_ines(1, 1, 0x40); // Low nibble 4
        data[7] = 0x00;
        let cart = Cartridge::parse(&data).unwrap();
        assert_eq!(cart.mapper_number(), 4);
    }

    #[test]
    fn tiles_decoded_alongside_chr() {
        let data = make_ines(1, 1, 0x00);
        let cart = Cartridge::parse(&data).unwrap();
        assert_eq!(cart.chr_tiles().len(), 512); // 8 KiB / 16
    }
}
