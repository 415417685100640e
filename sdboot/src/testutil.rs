//! Test support: a NOR-accurate in-memory flash and canned block sources.
//!
//! Kept in the library (it is `no_std` like everything else) so both the
//! unit tests and the integration suite share one model of the hardware.

use heapless::Vec;

use crate::flash::{Flash, FlashError, PAGE_SIZE, SECTOR_SIZE, XIP_BASE, sector_round_up};
use crate::loader::{BlockSource, StatusSink};
use crate::proginfo::Hole;
use crate::uf2::BLOCK_SIZE;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Op {
    Erase { addr: u32, len: u32 },
    Program { addr: u32 },
}

/// In-memory flash. `mem[0]` maps to [`XIP_BASE`]; erase and program are
/// bounded by `flash_end` the way the real drivers refuse to touch the
/// loader's own region. Programming ANDs bits in, so an attempt to set a 0
/// back to 1 without an erase shows up as a verify mismatch, exactly like
/// the real part.
pub struct MockFlash<'m> {
    mem: &'m mut [u8],
    flash_end: u32,
    /// Every mutation, in order, for property assertions.
    pub ops: Vec<Op, 128>,
    /// Fail with a device error on the n-th mutation (0-based).
    pub fail_on: Option<usize>,
    /// When set, any mutation issued while the hole holds a live magic is
    /// recorded as a violation of the "no valid record during an update"
    /// invariant. The very first mutation is exempt: it is the erase that
    /// destroys the previous application's record.
    pub watch_hole: Option<Hole>,
    pub hole_violations: usize,
}

impl<'m> MockFlash<'m> {
    pub fn new(mem: &'m mut [u8], flash_end: u32) -> Self {
        assert!(flash_end > XIP_BASE);
        assert!((flash_end - XIP_BASE) as usize <= mem.len());
        Self {
            mem,
            flash_end,
            ops: Vec::new(),
            fail_on: None,
            watch_hole: None,
            hole_violations: 0,
        }
    }

    pub fn bytes(&self, addr: u32, len: usize) -> &[u8] {
        let at = (addr - XIP_BASE) as usize;
        &self.mem[at..at + len]
    }

    fn before_mutation(&mut self) -> Result<(), FlashError> {
        if let Some(hole) = self.watch_hole
            && !self.ops.is_empty()
        {
            let magic = crate::proginfo::MAGIC.to_le_bytes();
            if self.bytes(hole.addr, 4) == magic.as_slice() {
                self.hole_violations += 1;
            }
        }
        if self.fail_on == Some(self.ops.len()) {
            return Err(FlashError::Device);
        }
        Ok(())
    }

    fn check_range(&self, addr: u32, len: u32) -> Result<usize, FlashError> {
        let end = addr as u64 + len as u64;
        if addr < XIP_BASE || end > self.flash_end as u64 {
            return Err(FlashError::OutOfBounds { addr, len });
        }
        Ok((addr - XIP_BASE) as usize)
    }
}

impl Flash for MockFlash<'_> {
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), FlashError> {
        if addr % SECTOR_SIZE as u32 != 0 {
            return Err(FlashError::Misaligned { addr, required: SECTOR_SIZE as u32 });
        }
        let len = sector_round_up(len);
        let at = self.check_range(addr, len)?;
        self.before_mutation()?;
        self.mem[at..at + len as usize].fill(0xFF);
        let _ = self.ops.push(Op::Erase { addr, len });
        Ok(())
    }

    fn program(&mut self, addr: u32, page: &[u8; PAGE_SIZE]) -> Result<(), FlashError> {
        if addr % PAGE_SIZE as u32 != 0 {
            return Err(FlashError::Misaligned { addr, required: PAGE_SIZE as u32 });
        }
        let at = self.check_range(addr, PAGE_SIZE as u32)?;
        self.before_mutation()?;
        for (dst, src) in self.mem[at..at + PAGE_SIZE].iter_mut().zip(page) {
            *dst &= *src;
        }
        let _ = self.ops.push(Op::Program { addr });
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        // Reads are memory-mapped on the real part; anything in the window
        // goes, including the loader region above `flash_end`.
        let end = addr as u64 + buf.len() as u64;
        if addr < XIP_BASE || end > XIP_BASE as u64 + self.mem.len() as u64 {
            return Err(FlashError::OutOfBounds { addr, len: buf.len() as u32 });
        }
        let at = (addr - XIP_BASE) as usize;
        buf.copy_from_slice(&self.mem[at..at + buf.len()]);
        Ok(())
    }
}

/// A `BlockSource` over an in-memory UF2 image, optionally cut short to model
/// SD removal or power loss at the adapter.
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Deliver only the first `blocks` whole blocks, then report EOF.
    pub fn truncated(data: &'a [u8], blocks: usize) -> Self {
        Self {
            data: &data[..(blocks * BLOCK_SIZE).min(data.len())],
            pos: 0,
        }
    }
}

impl BlockSource for SliceSource<'_> {
    type Error = core::convert::Infallible;

    fn read_block(&mut self, buf: &mut [u8; BLOCK_SIZE]) -> Result<usize, Self::Error> {
        let n = (self.data.len() - self.pos).min(BLOCK_SIZE);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// A source whose reads fail outright, for the I/O-error path.
pub struct FailingSource;

impl BlockSource for FailingSource {
    type Error = &'static str;

    fn read_block(&mut self, _buf: &mut [u8; BLOCK_SIZE]) -> Result<usize, Self::Error> {
        Err("sd read error")
    }
}

/// Collects status strings the way the directory UI would render them.
#[derive(Default)]
pub struct RecordingStatus {
    pub messages: Vec<heapless::String<48>, 16>,
}

impl StatusSink for RecordingStatus {
    fn set_status(&mut self, msg: &str) {
        let mut s = heapless::String::new();
        let _ = s.push_str(msg);
        let _ = self.messages.push(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const END: u32 = XIP_BASE + 0x2_0000;

    #[test]
    fn erase_restores_ones_and_rounds_up() {
        let mut mem = vec![0x55u8; 0x2_0000];
        let mut flash = MockFlash::new(&mut mem, END);
        flash.erase(XIP_BASE + 0x1000, 1).unwrap();
        assert!(flash.bytes(XIP_BASE + 0x1000, SECTOR_SIZE).iter().all(|&b| b == 0xFF));
        assert_eq!(flash.bytes(XIP_BASE + 0xFFF, 1), &[0x55]);
        assert_eq!(flash.bytes(XIP_BASE + 0x2000, 1), &[0x55]);
    }

    #[test]
    fn program_can_only_clear_bits() {
        let mut mem = vec![0xFFu8; 0x2_0000];
        let mut flash = MockFlash::new(&mut mem, END);
        let page = [0x0Fu8; PAGE_SIZE];
        flash.program(XIP_BASE, &page).unwrap();
        assert!(flash.verify(XIP_BASE, &page).unwrap());
        // Second program cannot set bits back.
        let conflicting = [0xF0u8; PAGE_SIZE];
        flash.program(XIP_BASE, &conflicting).unwrap();
        assert!(!flash.verify(XIP_BASE, &conflicting).unwrap());
        assert_eq!(flash.bytes(XIP_BASE, 1), &[0x00]);
    }

    #[test]
    fn alignment_and_bounds_are_enforced() {
        let mut mem = vec![0xFFu8; 0x2_0000];
        let mut flash = MockFlash::new(&mut mem, END);
        assert!(matches!(
            flash.erase(XIP_BASE + 0x100, SECTOR_SIZE as u32),
            Err(FlashError::Misaligned { .. })
        ));
        assert!(matches!(
            flash.program(XIP_BASE + 1, &[0; PAGE_SIZE]),
            Err(FlashError::Misaligned { .. })
        ));
        assert!(matches!(
            flash.erase(END, SECTOR_SIZE as u32),
            Err(FlashError::OutOfBounds { .. })
        ));
        // Reads beyond flash_end stay legal: that's the loader's own region.
        let mut b = [0u8; 4];
        flash.read(END - 4, &mut b).unwrap();
    }

    #[test]
    fn slice_source_truncation() {
        let data = [0u8; 3 * BLOCK_SIZE];
        let mut src = SliceSource::truncated(&data, 2);
        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(src.read_block(&mut buf), Ok(BLOCK_SIZE));
        assert_eq!(src.read_block(&mut buf), Ok(BLOCK_SIZE));
        assert_eq!(src.read_block(&mut buf), Ok(0));
    }
}
