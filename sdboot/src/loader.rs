//! The flash orchestrator: from "file opened" to "record committed or
//! aborted".
//!
//! Blocks are consumed in file order and programmed in the order they are
//! accepted; the erase of the target range completes before any program in
//! it begins. On every exit path short of success, the program-info slot
//! reads as "no app" (the payload masking below guarantees it), so a reset
//! at any point lands in the loader UI rather than in a partial image.

use core::fmt::Write as _;

use log::{debug, warn};

use crate::check::{Stream, Verdict};
use crate::flash::{BOOT2_SIZE, Flash, FlashError, PAGE_SIZE, SECTOR_SIZE, XIP_BASE, sector_floor};
use crate::target::Target;
use crate::uf2::{BLOCK_SIZE, BlockBuf, Uf2Block};

/// Result of one load attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every block written, EOF reached, record committed.
    Loaded,
    /// A well-formed UF2 with nothing in it for this chip; flash untouched.
    WrongPlatform,
    /// The block stream violated an invariant. Pages may have been written,
    /// but no valid record exists, so the device still boots the loader.
    Bad,
    /// I/O or flash driver failure. Same post-condition as `Bad`.
    Unknown,
}

/// Streamed supplier of raw UF2 sectors, usually a file on the SD card.
/// A short count means EOF on this call.
pub trait BlockSource {
    type Error: core::fmt::Debug;

    fn read_block(&mut self, buf: &mut [u8; BLOCK_SIZE]) -> Result<usize, Self::Error>;
}

/// Advisory progress strings; the UI renders them.
pub trait StatusSink {
    fn set_status(&mut self, msg: &str);
}

/// Discards all status messages.
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn set_status(&mut self, _msg: &str) {}
}

/// How often (in programmed blocks) a progress string is emitted.
const PROGRESS_INTERVAL: u32 = 100;

/// Pull UF2 blocks out of `source` and flash them into the application
/// region. `filename` is the name the file was opened under; on platforms
/// with a filename slot its final path component ends up in the program-info
/// record.
pub fn load<F, T, S, U>(
    flash: &mut F,
    target: &T,
    source: &mut S,
    status: &mut U,
    filename: &str,
) -> Outcome
where
    F: Flash,
    T: Target,
    S: BlockSource,
    U: StatusSink,
{
    let Some(flash_end) = target.flash_end() else {
        // Without a bound on the application region any write could land in
        // the loader itself.
        warn!("flash end unknown; refusing to flash");
        status.set_status("Invalid loader!");
        return Outcome::Unknown;
    };

    let mut stream = Stream::new();
    let mut buf = BlockBuf::new();
    let mut blocks_read: u32 = 0;

    loop {
        let n = match source.read_block(&mut buf.0) {
            Ok(n) => n,
            Err(e) => {
                warn!("block read failed: {e:?}");
                status.set_status("SD read failed");
                return Outcome::Unknown;
            }
        };
        if n < BLOCK_SIZE {
            break;
        }
        blocks_read += 1;

        let block = Uf2Block::read(&buf.0);
        let first = !stream.started();
        match stream.check(&block, target, flash_end) {
            Verdict::Skip(reason) => {
                debug!("block {blocks_read}: skipped ({reason:?})");
                continue;
            }
            Verdict::Reject(reason) => {
                warn!("block {blocks_read}: {reason}");
                status.set_status("Bad UF2 file");
                return Outcome::Bad;
            }
            Verdict::Accept => {}
        }

        // The slot must read as erased from the first program until commit,
        // whatever the payload carried there.
        let mut page = [0u8; PAGE_SIZE];
        page.copy_from_slice(block.payload());
        target.hole().clear_in_buf(&mut page, block.target_addr);

        let step = if first {
            prepare_region(flash, target, stream.first_addr(), stream.num_blocks())
                .and_then(|()| program_page(flash, block.target_addr, &page))
        } else {
            program_page(flash, block.target_addr, &page)
        };
        if let Err(e) = step {
            warn!("flash driver error: {e}");
            status.set_status("Flash write failed");
            return Outcome::Unknown;
        }

        stream.advance();
        if stream.blocks_written() % PROGRESS_INTERVAL == 0 {
            let mut msg: heapless::String<48> = heapless::String::new();
            let _ = write!(msg, "Loading {}/{}...", stream.blocks_written(), stream.num_blocks());
            status.set_status(&msg);
        }
    }

    debug!("blocks parsed: {blocks_read}");
    debug!("blocks expected: {}", stream.num_blocks());
    debug!("blocks flashed: {}", stream.blocks_written());

    if !stream.started() {
        // Empty file, or a multi-family UF2 with nothing for us.
        status.set_status("Not for this device");
        return Outcome::WrongPlatform;
    }
    if !stream.complete() {
        warn!("not all blocks were flashed");
        status.set_status("Bad UF2 file");
        return Outcome::Bad;
    }

    let basename = filename.rsplit('/').next().unwrap_or(filename);
    if let Err(e) = target.commit(flash, flash_end, basename) {
        warn!("commit failed: {e}");
        status.set_status("Flash write failed");
        return Outcome::Unknown;
    }

    status.set_status("Load complete");
    Outcome::Loaded
}

/// Erase the sectors the image will occupy, keeping the second-stage boot
/// stub alive across a sector-0 erase.
///
/// The erase starts at the sector containing the first block and the driver
/// rounds the length up, so the whole range `[first_addr, first_addr +
/// num_blocks * page)` comes out erased. When that range includes sector 0
/// on a stub-preserving platform, the resident stub is carried through RAM
/// and reprogrammed before any payload goes in; a UF2 whose first block
/// lands at `XIP_BASE` brings its own stub instead.
fn prepare_region<F: Flash, T: Target>(
    flash: &mut F,
    target: &T,
    first_addr: u32,
    num_blocks: u32,
) -> Result<(), FlashError> {
    let start = sector_floor(first_addr);
    let end = first_addr as u64 + num_blocks as u64 * PAGE_SIZE as u64;
    let len = (end - start as u64) as u32;

    let keep_stub =
        target.preserve_boot2() && start < XIP_BASE + SECTOR_SIZE as u32 && first_addr != XIP_BASE;

    let mut stub = [0u8; BOOT2_SIZE];
    if keep_stub {
        debug!("erase covers sector 0; preserving boot stub");
        flash.read(XIP_BASE, &mut stub)?;
    }

    flash.erase(start, len)?;

    if keep_stub {
        program_page(flash, XIP_BASE, &stub)?;
    }
    Ok(())
}

fn program_page<F: Flash>(
    flash: &mut F,
    addr: u32,
    page: &[u8; PAGE_SIZE],
) -> Result<(), FlashError> {
    flash.program(addr, page)?;
    if !flash.verify(addr, page)? {
        warn!("verify failed at {addr:#010x}");
        return Err(FlashError::Device);
    }
    Ok(())
}
