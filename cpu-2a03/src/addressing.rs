//! 2A03 addressing modes.
//!
//! Every helper performs its dummy reads as real bus traffic, because on
//! the NES those cycles are observable: they hit mapper registers, update
//! the open-bus latch, and can collide with DMC DMA fetches.
//!
//! Dummy read rules:
//! - Zero Page,X / Zero Page,Y: always read the unindexed address
//! - ($nn,X): always read the unindexed pointer address
//! - Absolute,X / Absolute,Y / ($nn),Y reads: on page crossing, read
//!   `(base & $FF00) | (base+idx & $FF)` (the partially-added address)
//! - Stores and RMW in indexed modes: the partial-address read happens
//!   whether or not the page is crossed

use crate::Rp2a03;
use emu_core::Bus;

impl Rp2a03 {
    /// Fetch the next byte at PC and increment PC.
    pub(crate) fn fetch(&mut self, bus: &mut impl Bus) -> u8 {
        let value = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    /// Fetch a 16-bit word (little-endian) at PC.
    pub(crate) fn fetch_word(&mut self, bus: &mut impl Bus) -> u16 {
        let low = self.fetch(bus);
        let high = self.fetch(bus);
        u16::from_le_bytes([low, high])
    }

    /// Read a 16-bit word from memory (little-endian).
    pub(crate) fn read_word(&mut self, bus: &mut impl Bus, addr: u16) -> u16 {
        let low = bus.read(addr);
        let high = bus.read(addr.wrapping_add(1));
        u16::from_le_bytes([low, high])
    }

    /// Push a byte onto the stack.
    pub(crate) fn push(&mut self, bus: &mut impl Bus, value: u8) {
        bus.write(0x0100 | u16::from(self.s), value);
        self.s = self.s.wrapping_sub(1);
    }

    /// Pull a byte from the stack.
    pub(crate) fn pull(&mut self, bus: &mut impl Bus) -> u8 {
        self.s = self.s.wrapping_add(1);
        bus.read(0x0100 | u16::from(self.s))
    }

    /// Push a 16-bit word onto the stack (high byte first).
    pub(crate) fn push_word(&mut self, bus: &mut impl Bus, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    /// Pull a 16-bit word from the stack (low byte first).
    pub(crate) fn pull_word(&mut self, bus: &mut impl Bus) -> u16 {
        let low = self.pull(bus);
        let high = self.pull(bus);
        u16::from_le_bytes([low, high])
    }

    // =========================================================================
    // Addressing mode helpers
    // =========================================================================

    /// Zero Page: $nn
    pub(crate) fn addr_zero_page(&mut self, bus: &mut impl Bus) -> u16 {
        u16::from(self.fetch(bus))
    }

    /// Zero Page,X: $nn,X (wraps within zero page)
    pub(crate) fn addr_zero_page_x(&mut self, bus: &mut impl Bus) -> u16 {
        let base = self.fetch(bus);
        // Dummy read at the unindexed address while the add happens
        bus.read(u16::from(base));
        u16::from(base.wrapping_add(self.x))
    }

    /// Zero Page,Y: $nn,Y (wraps within zero page)
    pub(crate) fn addr_zero_page_y(&mut self, bus: &mut impl Bus) -> u16 {
        let base = self.fetch(bus);
        // Dummy read at the unindexed address while the add happens
        bus.read(u16::from(base));
        u16::from(base.wrapping_add(self.y))
    }

    /// Absolute: $nnnn
    pub(crate) fn addr_absolute(&mut self, bus: &mut impl Bus) -> u16 {
        self.fetch_word(bus)
    }

    /// Absolute,X for reads: on page crossing, a dummy read happens at the
    /// partially-added address. Returns (address, page_crossed).
    pub(crate) fn addr_absolute_x(&mut self, bus: &mut impl Bus) -> (u16, bool) {
        let base = self.fetch_word(bus);
        let addr = base.wrapping_add(u16::from(self.x));
        let page_crossed = (base ^ addr) & 0xFF00 != 0;
        if page_crossed {
            bus.read((base & 0xFF00) | (addr & 0x00FF));
        }
        (addr, page_crossed)
    }

    /// Absolute,X for stores/RMW: the partial-address read always happens.
    pub(crate) fn addr_absolute_x_rmw(&mut self, bus: &mut impl Bus) -> u16 {
        let base = self.fetch_word(bus);
        let addr = base.wrapping_add(u16::from(self.x));
        bus.read((base & 0xFF00) | (addr & 0x00FF));
        addr
    }

    /// Absolute,Y for reads: dummy read at the partial address on crossing.
    pub(crate) fn addr_absolute_y(&mut self, bus: &mut impl Bus) -> (u16, bool) {
        let base = self.fetch_word(bus);
        let addr = base.wrapping_add(u16::from(self.y));
        let page_crossed = (base ^ addr) & 0xFF00 != 0;
        if page_crossed {
            bus.read((base & 0xFF00) | (addr & 0x00FF));
        }
        (addr, page_crossed)
    }

    /// Absolute,Y for stores/RMW: the partial-address read always happens.
    pub(crate) fn addr_absolute_y_rmw(&mut self, bus: &mut impl Bus) -> u16 {
        let base = self.fetch_word(bus);
        let addr = base.wrapping_add(u16::from(self.y));
        bus.read((base & 0xFF00) | (addr & 0x00FF));
        addr
    }

    /// Indexed Indirect: ($nn,X)
    /// The pointer is at zero page address (operand + X), wrapping within ZP.
    pub(crate) fn addr_indexed_indirect(&mut self, bus: &mut impl Bus) -> u16 {
        let base = self.fetch(bus);
        // Dummy read at the unindexed pointer address
        bus.read(u16::from(base));
        let ptr = base.wrapping_add(self.x);
        let low = bus.read(u16::from(ptr));
        let high = bus.read(u16::from(ptr.wrapping_add(1)));
        u16::from_le_bytes([low, high])
    }

    /// Indirect Indexed: ($nn),Y for reads. Returns (address, page_crossed).
    pub(crate) fn addr_indirect_indexed(&mut self, bus: &mut impl Bus) -> (u16, bool) {
        let ptr = self.fetch(bus);
        let low = bus.read(u16::from(ptr));
        let high = bus.read(u16::from(ptr.wrapping_add(1)));
        let base = u16::from_le_bytes([low, high]);
        let addr = base.wrapping_add(u16::from(self.y));
        let page_crossed = (base ^ addr) & 0xFF00 != 0;
        if page_crossed {
            bus.read((base & 0xFF00) | (addr & 0x00FF));
        }
        (addr, page_crossed)
    }

    /// Indirect Indexed: ($nn),Y for stores/RMW: forced partial read.
    pub(crate) fn addr_indirect_indexed_rmw(&mut self, bus: &mut impl Bus) -> u16 {
        let ptr = self.fetch(bus);
        let low = bus.read(u16::from(ptr));
        let high = bus.read(u16::from(ptr.wrapping_add(1)));
        let base = u16::from_le_bytes([low, high]);
        let addr = base.wrapping_add(u16::from(self.y));
        bus.read((base & 0xFF00) | (addr & 0x00FF));
        addr
    }

    /// Execute a branch if condition is true.
    /// Returns extra cycles (1 if branch taken, +1 more if page crossed).
    pub(crate) fn branch_if(&mut self, bus: &mut impl Bus, condition: bool) -> u32 {
        let offset = self.fetch(bus) as i8;
        let target = self.pc.wrapping_add(offset as u16);
        if condition {
            // Branch taken - 1 extra cycle
            bus.tick(1);
            let page_crossed = (self.pc ^ target) & 0xFF00 != 0;
            self.pc = target;
            if page_crossed {
                // Page crossing - 1 more cycle
                bus.tick(1);
                2
            } else {
                1
            }
        } else {
            0
        }
    }

    /// Read-modify-write pattern: read, write the original back (dummy
    /// write), then write the modified value. Both writes are real bus
    /// cycles. `f` computes the new value and updates flags.
    pub(crate) fn rmw(
        &mut self,
        bus: &mut impl Bus,
        addr: u16,
        f: impl FnOnce(&mut Self, u8) -> u8,
    ) -> u8 {
        let value = bus.read(addr);
        bus.write(addr, value);
        let result = f(self, value);
        bus.write(addr, result);
        result
    }
}
