//! Per-block validation and the carried cross-block state.
//!
//! The checker is a pure function over one block plus a small amount of
//! state; flash is never touched from here. Each block gets one of three
//! verdicts: `Accept` (program it), `Skip` (known-benign, keep streaming) or
//! `Reject` (the file is malformed, abort the whole load).

use log::debug;
use thiserror::Error;

use crate::flash::{PAGE_SIZE, XIP_BASE};
use crate::target::Target;
use crate::uf2::Uf2Block;

/// Benign reasons to pass over a block without aborting the stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Skip {
    /// Bit 0 set: the payload is not destined for main flash.
    NotMainFlash,
    /// Family ID present but for some other chip; multi-family UF2s are
    /// allowed to interleave blocks we cannot use.
    WrongFamily,
    /// The RP2350-E10 workaround block tools prepend to flash UF2s.
    ErratumBlock,
}

/// Malformations that abort the load.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum Reject {
    #[error("bad UF2 magic")]
    BadMagic,
    #[error("target address not page-aligned")]
    Misaligned,
    #[error("payload is not one flash page")]
    BadPayloadSize,
    #[error("block count invalid")]
    BadBlockCount,
    #[error("target address outside the program area")]
    OutOfRange,
    #[error("image does not fit below flash end")]
    TooLarge,
    #[error("first block of the image is missing")]
    FirstBlockMissing,
    #[error("block out of sequence")]
    OutOfSequence,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Skip(Skip),
    Reject(Reject),
}

/// Cross-block state, carried from one block to the next.
///
/// Some tools count the E10 workaround block in `num_blocks` and number the
/// real blocks from 1. Rather than adjusting on the fly, the stream records
/// the strip once, up front, and every later block is judged against the
/// effective (stripped) numbering.
#[derive(Debug, Default)]
pub struct Stream {
    first_addr: u32,
    num_blocks: u32,
    written: u32,
    stripped: u32,
    started: bool,
}

impl Stream {
    pub const fn new() -> Self {
        Self {
            first_addr: 0,
            num_blocks: 0,
            written: 0,
            stripped: 0,
            started: false,
        }
    }

    /// Address of the first accepted block. Meaningless before `started`.
    pub fn first_addr(&self) -> u32 {
        self.first_addr
    }

    /// Effective total block count, set by the first accepted block.
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn blocks_written(&self) -> u32 {
        self.written
    }

    /// True once a block has been accepted (and therefore flash touched).
    pub fn started(&self) -> bool {
        self.started
    }

    /// EOF contract: every expected block was accepted and programmed.
    pub fn complete(&self) -> bool {
        self.started && self.written == self.num_blocks
    }

    /// Record that the most recently accepted block has been programmed.
    pub fn advance(&mut self) {
        self.written += 1;
    }

    /// Judge one block against the per-block rules and this stream's state.
    pub fn check<T: Target>(&mut self, b: &Uf2Block, target: &T, flash_end: u32) -> Verdict {
        if !b.magics_ok() {
            debug!("invalid UF2 magic");
            return Verdict::Reject(Reject::BadMagic);
        }
        if b.flags.not_main_flash() {
            debug!("block not for main flash");
            return Verdict::Skip(Skip::NotMainFlash);
        }
        if b.target_addr % PAGE_SIZE as u32 != 0 {
            debug!("bad alignment: {:#010x}", b.target_addr);
            return Verdict::Reject(Reject::Misaligned);
        }
        if b.payload_size != PAGE_SIZE as u32 {
            debug!("incorrect payload size: {}", b.payload_size);
            return Verdict::Reject(Reject::BadPayloadSize);
        }
        if b.num_blocks == 0 || b.block_no >= b.num_blocks {
            debug!("block count invalid: {}/{}", b.block_no, b.num_blocks);
            return Verdict::Reject(Reject::BadBlockCount);
        }

        if let Some(family) = b.family_id() {
            if b.is_erratum_block() {
                // A well-formed workaround block is its own two-block file.
                // Anything else counted it into the real image: strip it from
                // the numbering.
                if !self.started && b.num_blocks != 2 {
                    self.stripped = 1;
                }
                debug!("skipping RP2350-E10 workaround block");
                return Verdict::Skip(Skip::ErratumBlock);
            }
            if !target.family_matches(family) {
                debug!("family {family:#010x} is not for this device");
                return Verdict::Skip(Skip::WrongFamily);
            }
        }

        if b.target_addr < XIP_BASE || b.target_addr >= flash_end {
            debug!(
                "out of bounds: {:#010x} not in [{XIP_BASE:#010x}, {flash_end:#010x})",
                b.target_addr
            );
            return Verdict::Reject(Reject::OutOfRange);
        }

        let Some(eff_no) = b.block_no.checked_sub(self.stripped) else {
            return Verdict::Reject(Reject::OutOfSequence);
        };
        let eff_total = b.num_blocks - self.stripped;

        if !self.started {
            if eff_no != 0 {
                debug!("first block of the image is missing");
                return Verdict::Reject(Reject::FirstBlockMissing);
            }
            if eff_total == 0 {
                return Verdict::Reject(Reject::BadBlockCount);
            }
            let image_end = b.target_addr as u64 + PAGE_SIZE as u64 * eff_total as u64;
            if image_end > flash_end as u64 {
                debug!("requested range exceeds flash area");
                return Verdict::Reject(Reject::TooLarge);
            }
            self.started = true;
            self.first_addr = b.target_addr;
            self.num_blocks = eff_total;
            Verdict::Accept
        } else {
            if eff_total != self.num_blocks
                || eff_no != self.written
                || b.target_addr as u64
                    != self.first_addr as u64 + PAGE_SIZE as u64 * self.written as u64
            {
                debug!(
                    "sequence mismatch: block {}/{} at {:#010x}, expected {}/{} at {:#010x}",
                    eff_no,
                    eff_total,
                    b.target_addr,
                    self.written,
                    self.num_blocks,
                    self.first_addr + PAGE_SIZE as u32 * self.written
                );
                return Verdict::Reject(Reject::OutOfSequence);
            }
            Verdict::Accept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Rp2040Target;
    use crate::uf2::{ERRATUM_BLOCK_ADDR, family};

    const FLASH_END: u32 = 0x101C_0000;

    fn target() -> Rp2040Target {
        Rp2040Target::new(Some(FLASH_END))
    }

    fn block(no: u32, total: u32, addr: u32) -> Uf2Block {
        Uf2Block::new(addr, no, total, Some(family::RP2040), &[0x5A; PAGE_SIZE])
    }

    #[test]
    fn accepts_an_ordinary_sequence() {
        let t = target();
        let mut s = Stream::new();
        for i in 0..4 {
            let b = block(i, 4, 0x1004_0000 + i * PAGE_SIZE as u32);
            assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Accept);
            s.advance();
        }
        assert!(s.complete());
        assert_eq!(s.first_addr(), 0x1004_0000);
        assert_eq!(s.num_blocks(), 4);
    }

    #[test]
    fn rejects_bad_magic() {
        let t = target();
        let mut s = Stream::new();
        let mut b = block(0, 1, 0x1004_0000);
        b.magic_end = 0xDEAD_BEEF;
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::BadMagic));
    }

    #[test]
    fn skips_not_main_flash() {
        let t = target();
        let mut s = Stream::new();
        let mut b = block(0, 1, 0x1004_0000);
        b.flags.set_not_main_flash(true);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Skip(Skip::NotMainFlash));
    }

    #[test]
    fn rejects_unaligned_target() {
        let t = target();
        let mut s = Stream::new();
        let b = block(0, 1, 0x1004_0010);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::Misaligned));
    }

    #[test]
    fn rejects_short_payload() {
        let t = target();
        let mut s = Stream::new();
        let b = Uf2Block::new(0x1004_0000, 0, 1, Some(family::RP2040), &[0; 128]);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::BadPayloadSize));
    }

    #[test]
    fn rejects_block_count_violations() {
        let t = target();
        let mut s = Stream::new();
        let b = block(0, 0, 0x1004_0000);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::BadBlockCount));
        let b = block(2, 2, 0x1004_0000);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::BadBlockCount));
    }

    #[test]
    fn skips_foreign_family() {
        let t = target();
        let mut s = Stream::new();
        let b = Uf2Block::new(0x1004_0000, 0, 1, Some(family::RP2350_ARM_S), &[0; PAGE_SIZE]);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Skip(Skip::WrongFamily));
        let b = Uf2Block::new(0x1004_0000, 0, 1, Some(0x0000_0001), &[0; PAGE_SIZE]);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Skip(Skip::WrongFamily));
    }

    #[test]
    fn accepts_blocks_with_no_family_id() {
        let t = target();
        let mut s = Stream::new();
        let b = Uf2Block::new(0x1004_0000, 0, 1, None, &[0; PAGE_SIZE]);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Accept);
    }

    #[test]
    fn rejects_out_of_range_target() {
        let t = target();
        let mut s = Stream::new();
        let b = block(0, 1, FLASH_END);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::OutOfRange));
        let b = block(0, 1, XIP_BASE - PAGE_SIZE as u32);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::OutOfRange));
    }

    #[test]
    fn rejects_image_overrunning_flash_end() {
        let t = target();
        let mut s = Stream::new();
        let b = block(0, 2, FLASH_END - PAGE_SIZE as u32);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::TooLarge));
    }

    #[test]
    fn rejects_missing_first_block() {
        let t = target();
        let mut s = Stream::new();
        let b = block(1, 4, 0x1004_0100);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::FirstBlockMissing));
    }

    #[test]
    fn rejects_sequence_mismatches() {
        let t = target();
        let mut s = Stream::new();
        assert_eq!(s.check(&block(0, 3, 0x1004_0000), &t, FLASH_END), Verdict::Accept);
        s.advance();

        // Wrong block number.
        let b = block(2, 3, 0x1004_0100);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::OutOfSequence));
        // Wrong total.
        let b = block(1, 4, 0x1004_0100);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::OutOfSequence));
        // Wrong address.
        let b = block(1, 3, 0x1004_0200);
        assert_eq!(s.check(&b, &t, FLASH_END), Verdict::Reject(Reject::OutOfSequence));
    }

    #[test]
    fn well_formed_erratum_block_is_skipped_without_strip() {
        let t = target();
        let mut s = Stream::new();
        let e10 = Uf2Block::new(ERRATUM_BLOCK_ADDR, 0, 2, Some(family::ABSOLUTE), &[0xE5; PAGE_SIZE]);
        assert_eq!(s.check(&e10, &t, FLASH_END), Verdict::Skip(Skip::ErratumBlock));
        // Real image numbered from zero as usual.
        assert_eq!(s.check(&block(0, 2, 0x1004_0000), &t, FLASH_END), Verdict::Accept);
        s.advance();
        assert_eq!(s.check(&block(1, 2, 0x1004_0100), &t, FLASH_END), Verdict::Accept);
        s.advance();
        assert!(s.complete());
    }

    #[test]
    fn counted_erratum_block_shifts_the_numbering() {
        let t = target();
        let mut s = Stream::new();
        // This tool counted the workaround block: 3 blocks total, real ones
        // numbered 1 and 2.
        let e10 = Uf2Block::new(ERRATUM_BLOCK_ADDR, 0, 3, Some(family::ABSOLUTE), &[0xE5; PAGE_SIZE]);
        assert_eq!(s.check(&e10, &t, FLASH_END), Verdict::Skip(Skip::ErratumBlock));
        assert_eq!(s.check(&block(1, 3, 0x1004_0000), &t, FLASH_END), Verdict::Accept);
        s.advance();
        assert_eq!(s.check(&block(2, 3, 0x1004_0100), &t, FLASH_END), Verdict::Accept);
        s.advance();
        assert!(s.complete());
        assert_eq!(s.num_blocks(), 2);
    }
}
