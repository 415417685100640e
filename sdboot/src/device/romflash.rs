//! Flash driver built on the boot ROM's flash routines.
//!
//! Both chips ship ROM entry points for the XIP teardown/program/restore
//! dance; only the table lookup differs, so the platform modules resolve the
//! pointers and hand them over here. The full sequence per operation is
//!
//!   1. connect_internal_flash()
//!   2. flash_exit_xip()
//!   3. flash_range_erase() or flash_range_program()
//!   4. flash_flush_cache()
//!   5. flash_enter_cmd_xip()
//!
//! and everything executing during it must run from RAM, not flash, which is
//! why the thunks below carry `link_section = ".data"`. Interrupts are held
//! off for the duration; handlers live in flash too.

use crate::flash::{Flash, FlashError, PAGE_SIZE, SECTOR_SIZE, XIP_BASE};

type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

/// Sector-erase command understood by the fitted QSPI parts.
const SECTOR_ERASE_CMD: u8 = 0x20;

/// ROM entry points, resolved once at start of day (the lookup itself needs
/// XIP alive).
#[derive(Copy, Clone)]
pub(crate) struct RomFns {
    pub connect_internal_flash: usize,
    pub flash_exit_xip: usize,
    pub flash_range_erase: usize,
    pub flash_range_program: usize,
    pub flash_flush_cache: usize,
    pub flash_enter_cmd_xip: usize,
}

/// The one flash driver both platforms share. Erase and program refuse to
/// touch anything at or above `flash_end`: the loader must not be able to
/// unmap itself.
pub struct RomFlash {
    fns: RomFns,
    flash_end: u32,
}

impl RomFlash {
    pub(crate) fn new(fns: RomFns, flash_end: u32) -> Self {
        Self { fns, flash_end }
    }

    fn check_range(&self, addr: u32, len: u32) -> Result<u32, FlashError> {
        let end = addr as u64 + len as u64;
        if addr < XIP_BASE || end > self.flash_end as u64 {
            return Err(FlashError::OutOfBounds { addr, len });
        }
        Ok(addr - XIP_BASE)
    }

    /// # Safety
    /// Must run from RAM with interrupts disabled; `offset + len` must stay
    /// inside the chip.
    #[unsafe(link_section = ".data")]
    #[inline(never)]
    unsafe fn rom_erase(&self, offset: u32, len: u32) {
        unsafe {
            let connect: RomFnVoid = core::mem::transmute(self.fns.connect_internal_flash);
            let exit_xip: RomFnVoid = core::mem::transmute(self.fns.flash_exit_xip);
            let erase: RomFnErase = core::mem::transmute(self.fns.flash_range_erase);
            let flush: RomFnVoid = core::mem::transmute(self.fns.flash_flush_cache);
            let enter_xip: RomFnVoid = core::mem::transmute(self.fns.flash_enter_cmd_xip);

            connect();
            exit_xip();
            erase(offset, len as usize, SECTOR_SIZE as u32, SECTOR_ERASE_CMD);
            flush();
            enter_xip();
        }
    }

    /// # Safety
    /// Same requirements as [`Self::rom_erase`]; `data` must not live in the
    /// region being programmed.
    #[unsafe(link_section = ".data")]
    #[inline(never)]
    unsafe fn rom_program(&self, offset: u32, data: *const u8, len: usize) {
        unsafe {
            let connect: RomFnVoid = core::mem::transmute(self.fns.connect_internal_flash);
            let exit_xip: RomFnVoid = core::mem::transmute(self.fns.flash_exit_xip);
            let program: RomFnProgram = core::mem::transmute(self.fns.flash_range_program);
            let flush: RomFnVoid = core::mem::transmute(self.fns.flash_flush_cache);
            let enter_xip: RomFnVoid = core::mem::transmute(self.fns.flash_enter_cmd_xip);

            connect();
            exit_xip();
            program(offset, data, len);
            flush();
            enter_xip();
        }
    }
}

impl Flash for RomFlash {
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), FlashError> {
        if addr % SECTOR_SIZE as u32 != 0 {
            return Err(FlashError::Misaligned { addr, required: SECTOR_SIZE as u32 });
        }
        let len = crate::flash::sector_round_up(len);
        let offset = self.check_range(addr, len)?;
        critical_section::with(|_| unsafe { self.rom_erase(offset, len) });
        Ok(())
    }

    fn program(&mut self, addr: u32, page: &[u8; PAGE_SIZE]) -> Result<(), FlashError> {
        if addr % PAGE_SIZE as u32 != 0 {
            return Err(FlashError::Misaligned { addr, required: PAGE_SIZE as u32 });
        }
        let offset = self.check_range(addr, PAGE_SIZE as u32)?;
        critical_section::with(|_| unsafe {
            self.rom_program(offset, page.as_ptr(), PAGE_SIZE)
        });
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        // The whole chip is memory-mapped; reads don't need the ROM.
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { ((addr as usize + i) as *const u8).read_volatile() };
        }
        Ok(())
    }
}
