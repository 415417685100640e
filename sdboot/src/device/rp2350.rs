//! RP2350 glue: ROM function lookup, the address-translation window that
//! maps `XIP_BASE` onto the live application partition, the partition-table
//! probe that bounds the application region, and the watchdog command slot.

use thiserror::Error;

use crate::bootcmd::CmdSlot;
use crate::device::romflash::{RomFlash, RomFns};
use crate::flash::{SECTOR_SIZE, XIP_BASE};

/// WATCHDOG scratch registers 0..3 (base 0x400D8000, SCRATCH0 at +0x0C).
const WATCHDOG_SCRATCH: *mut u32 = 0x400D_800C as *mut u32;

// RP2350 publishes a single lookup routine as a 16-bit pointer; entries are
// selected by a two-character tag plus a context mask.
const ROM_TABLE_LOOKUP_PTR: *const u16 = 0x0000_0016 as *const u16;
const RT_FLAG_FUNC_ARM_SEC: u32 = 0x0004;

/// # Safety
/// Only meaningful on an RP2350 running in the secure Arm context.
unsafe fn rom_func_lookup(tag: [u8; 2]) -> usize {
    unsafe {
        let lookup: unsafe extern "C" fn(u32, u32) -> usize =
            core::mem::transmute(ROM_TABLE_LOOKUP_PTR.read() as usize);
        lookup(u16::from_le_bytes(tag) as u32, RT_FLAG_FUNC_ARM_SEC)
    }
}

/// Resolve the ROM flash routines and build the driver; the RP2350 retains
/// the RP2040-compatible entry points.
///
/// # Safety
/// RP2350 only; `flash_end` must bound the application partition.
pub unsafe fn rom_flash(flash_end: u32) -> RomFlash {
    let fns = unsafe {
        RomFns {
            connect_internal_flash: rom_func_lookup(*b"IF"),
            flash_exit_xip: rom_func_lookup(*b"EX"),
            flash_range_erase: rom_func_lookup(*b"RE"),
            flash_range_program: rom_func_lookup(*b"RP"),
            flash_flush_cache: rom_func_lookup(*b"FC"),
            flash_enter_cmd_xip: rom_func_lookup(*b"CX"),
        }
    };
    RomFlash::new(fns, flash_end)
}

pub struct WatchdogSlot;

impl CmdSlot for WatchdogSlot {
    fn read_word(&self, index: usize) -> u32 {
        debug_assert!(index < 3);
        unsafe { WATCHDOG_SCRATCH.add(index).read_volatile() }
    }

    fn write_word(&mut self, index: usize, value: u32) {
        debug_assert!(index < 3);
        unsafe { WATCHDOG_SCRATCH.add(index).write_volatile(value) }
    }
}

// Address-translation window. Window 4's virtual base is fixed at XIP_BASE;
// pointing its physical offset at the application partition makes every
// virtual address the orchestrator uses land in the right place. Configured
// once at start of day and never touched during a flash operation.
const ATU_BASE: u32 = 0x4008_F000;
const ATU_WINDOW4_CTL: *mut u32 = (ATU_BASE + 0x40) as *mut u32;
const ATU_WINDOW_ENABLE: u32 = 1 << 0;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
#[error("translation window offset must be 4 KiB aligned")]
pub struct WindowAlign;

/// Map `XIP_BASE` onto the partition starting `phys_offset` bytes into the
/// chip.
pub fn map_app_window(phys_offset: u32) -> Result<(), WindowAlign> {
    if phys_offset % SECTOR_SIZE as u32 != 0 {
        return Err(WindowAlign);
    }
    unsafe {
        ATU_WINDOW4_CTL
            .write_volatile(((phys_offset >> 12) & 0xF_FFFF) | XIP_BASE | ATU_WINDOW_ENABLE);
    }
    Ok(())
}

// The boot-info block the factory image leaves in the last sector of flash:
// a magic, a checksum, then partition entries of
// { type u8, flags u8, reserved u16, offset u32, size u32 }.
const BOOT_INFO_MAGIC: u32 = 0x544F_4F42; // "BOOT"

/// Bound of the application region, from the first partition entry. `None`
/// when no partition table is present, in which case the loader refuses to
/// flash rather than guess.
pub fn partition_flash_end(flash_size: u32) -> Option<u32> {
    let info = XIP_BASE + flash_size - SECTOR_SIZE as u32;
    unsafe {
        let magic = (info as usize as *const u32).read_volatile();
        if magic != BOOT_INFO_MAGIC {
            return None;
        }
        let first_partition = (info + 8) as usize as *const u32;
        let size = first_partition.add(2).read_volatile();
        if size == 0 || size > flash_size {
            return None;
        }
        Some(XIP_BASE + size)
    }
}

/// Chain into an image through the boot ROM, which revalidates and launches
/// it the same way a cold boot would. `workarea` gives the ROM scratch space
/// for signature and partition bookkeeping.
///
/// # Safety
/// RP2350 only. Does not return on success; a negative return means the ROM
/// rejected the image.
pub unsafe fn chain_image(workarea: &mut [u8], base: u32, size: u32) -> i32 {
    type RomFnChainImage = unsafe extern "C" fn(*mut u8, u32, u32, u32) -> i32;
    unsafe {
        let chain: RomFnChainImage = core::mem::transmute(rom_func_lookup(*b"CI"));
        chain(workarea.as_mut_ptr(), workarea.len() as u32, base, size)
    }
}
