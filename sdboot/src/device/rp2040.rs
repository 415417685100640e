//! RP2040 glue: ROM function lookup, the watchdog-scratch command slot, the
//! SRAM boot-info mirror, and the application jump.

use crate::bootcmd::CmdSlot;
use crate::device::romflash::{RomFlash, RomFns};
use crate::proginfo::{self, Record};

const SRAM_BASE: u32 = 0x2000_0000;

/// WATCHDOG scratch registers 0..3 (base 0x40058000, SCRATCH0 at +0x0C).
const WATCHDOG_SCRATCH: *mut u32 = 0x4005_800C as *mut u32;

// RP2040 ROM table pointers (datasheet §2.8.3): the function table and the
// lookup routine are published as 16-bit pointers at fixed addresses.
const ROM_FUNC_TABLE_PTR: *const u16 = 0x0000_0014 as *const u16;
const ROM_TABLE_LOOKUP_PTR: *const u16 = 0x0000_0018 as *const u16;

/// Look up a ROM routine by its two-character tag.
///
/// # Safety
/// Only meaningful on an RP2040 with the boot ROM mapped at address zero.
unsafe fn rom_func_lookup(tag: [u8; 2]) -> usize {
    unsafe {
        let fn_table = ROM_FUNC_TABLE_PTR.read() as *const u16;
        let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
            core::mem::transmute(ROM_TABLE_LOOKUP_PTR.read() as usize);
        lookup(fn_table, u16::from_le_bytes(tag) as u32)
    }
}

/// Resolve the ROM flash routines and build the driver. Call once, at start
/// of day, while nothing else is touching flash.
///
/// # Safety
/// RP2040 only; `flash_end` must be the loader's lower bound so the driver
/// can refuse writes into the loader region.
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

/// The boot command, backed by the reset-surviving watchdog scratch words.
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

// The boot-info mirror shares the vector-hole layout, relocated into SRAM:
// the loader publishes `flash_end` here at start of day and the UI (loaded
// later, from SD) reads it back before it is allowed to flash anything.
const BLINFO_MAGIC: *mut u32 = (SRAM_BASE + 0x110) as *mut u32;
const BLINFO_FLASH_END: *mut u32 = (SRAM_BASE + 0x114) as *mut u32;

/// Publish the application-region bound for the UI. The value comes from the
/// linker: the loader knows where its own image begins.
pub fn publish_flash_end(flash_end: u32) {
    unsafe {
        BLINFO_FLASH_END.write_volatile(flash_end);
        BLINFO_MAGIC.write_volatile(proginfo::MAGIC);
    }
}

/// The mirrored bound, if a loader published one this boot.
pub fn mirrored_flash_end() -> Option<u32> {
    unsafe {
        (BLINFO_MAGIC.read_volatile() == proginfo::MAGIC)
            .then(|| BLINFO_FLASH_END.read_volatile())
    }
}

unsafe extern "C" {
    /// First byte of the loader's own flash image; provided by the linker
    /// script. Everything below it belongs to the application.
    static __loader_base__: [u32; 0];
}

/// The application-region bound derived from the loader's link address.
pub fn linker_flash_end() -> u32 {
    (&raw const __loader_base__).addr() as u32
}

/// Read the installed application's record straight out of the memory-mapped
/// vector hole.
pub fn app_record() -> Option<Record> {
    let hole = &proginfo::RP2040_HOLE;
    let mut bytes = [0u8; 0x1C];
    unsafe {
        core::ptr::copy_nonoverlapping(
            hole.addr as usize as *const u8,
            bytes.as_mut_ptr(),
            bytes.len(),
        );
    }
    hole.record_from(&bytes)
}

/// Hand control to a vector table: point VTOR at it, load the initial stack
/// pointer, and branch to the reset vector.
///
/// # Safety
/// `vectors` must be a valid Cortex-M vector table; nothing of the caller
/// survives.
#[cfg(target_arch = "arm")]
unsafe fn launch_from(vectors: u32) -> ! {
    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    unsafe {
        SCB_VTOR.write_volatile(vectors);
        let sp = (vectors as *const u32).read_volatile();
        let reset = (vectors as *const u32).add(1).read_volatile();
        core::arch::asm!(
            "dsb",
            "isb",
            "msr msp, {sp}",
            "bx {reset}",
            sp = in(reg) sp,
            reset = in(reg) reset,
            options(noreturn),
        )
    }
}

/// Jump into the flashed application. The vector table sits just past the
/// boot stub.
///
/// # Safety
/// Call only after the application record has been verified.
#[cfg(target_arch = "arm")]
pub unsafe fn launch_application() -> ! {
    unsafe { launch_from(crate::flash::XIP_BASE + 0x100) }
}

/// Jump to an image previously copied into SRAM (the loader UI).
///
/// # Safety
/// A complete image with its vector table must already sit at the base of
/// SRAM.
#[cfg(target_arch = "arm")]
pub unsafe fn launch_from_ram() -> ! {
    unsafe { launch_from(SRAM_BASE + 0x100) }
}
