/// A bus that supports memory read/write operations.
///
/// All CPU-visible traffic goes through this trait: ordinary reads and
/// writes, but also dummy reads, dummy writes, stack pushes/pulls and
/// interrupt vector fetches. The implementation is expected to latch the
/// last byte driven on the bus ("open bus") and to account every call as
/// one bus cycle of the instruction in progress.
pub trait Bus {
    /// Read a byte from the given address.
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to the given address.
    fn write(&mut self, addr: u16, value: u8);

    /// Advance the bus clock for internal CPU cycles that carry no
    /// memory operation (branch penalties, stack adjustment cycles).
    fn tick(&mut self, cycles: u32);

    /// Whether a pending DMA fetch would land on the bus within the bus
    /// cycles the current instruction has consumed so far.
    ///
    /// Used by the unofficial SHA/SHX/SHY/SHS stores, whose `& (H+1)`
    /// factor is lost when the fetch steals the bus mid-instruction.
    /// Buses without DMA keep the default.
    fn dma_read_overlap(&self) -> bool {
        false
    }
}
