//! Platform strategies behind a common capability.
//!
//! The orchestrator depends only on this trait: where flash ends, which UF2
//! families belong to this chip, where the program-info hole sits, whether
//! the second-stage boot stub needs preserving, and how a finished image is
//! committed. The two concrete strategies differ in exactly those points.

use log::warn;

use crate::flash::{Flash, FlashError, PAGE_SIZE};
use crate::proginfo::{self, Hole};
use crate::uf2::family;

pub trait Target {
    /// Exclusive upper bound of the application region, resolved once at
    /// loader start of day. `None` means the loader cannot bound the region
    /// and must refuse to touch flash.
    fn flash_end(&self) -> Option<u32>;

    /// Whether a UF2 family ID targets this chip.
    fn family_matches(&self, family: u32) -> bool;

    /// Where the program-info record lives on this platform.
    fn hole(&self) -> &'static Hole;

    /// Whether the first page of flash is a boot stub that updates must not
    /// lose.
    fn preserve_boot2(&self) -> bool;

    /// Make the freshly written image the live application.
    fn commit<F: Flash>(
        &self,
        flash: &mut F,
        flash_end: u32,
        filename: &str,
    ) -> Result<(), FlashError>;
}

/// RP2040: no address translation, stub preservation on sector-0 erases, and
/// an explicit commit that installs the program-info record.
pub struct Rp2040Target {
    flash_end: Option<u32>,
}

impl Rp2040Target {
    pub const fn new(flash_end: Option<u32>) -> Self {
        Self { flash_end }
    }
}

impl Target for Rp2040Target {
    fn flash_end(&self) -> Option<u32> {
        self.flash_end
    }

    fn family_matches(&self, family: u32) -> bool {
        family == family::RP2040
    }

    fn hole(&self) -> &'static Hole {
        &proginfo::RP2040_HOLE
    }

    fn preserve_boot2(&self) -> bool {
        true
    }

    /// Reprogram the page containing the program-info slot with the record
    /// overlaid. The slot bytes read as erased here (the loader masked them
    /// in every payload), so the program only clears bits and no erase is
    /// needed. Power loss during this one page program leaves the record
    /// invalid and the loader in charge on the next boot; that window is the
    /// price of the single-operation commit.
    fn commit<F: Flash>(
        &self,
        flash: &mut F,
        flash_end: u32,
        filename: &str,
    ) -> Result<(), FlashError> {
        let hole = self.hole();
        let page_addr = hole.page();
        let mut page = [0u8; PAGE_SIZE];
        flash.read(page_addr, &mut page)?;
        hole.set_in_buf(&mut page, page_addr, flash_end, filename);
        flash.program(page_addr, &page)?;
        if !flash.verify(page_addr, &page)? {
            warn!("program-info commit verify failed");
            return Err(FlashError::Device);
        }
        Ok(())
    }
}

/// RP2350: the boot ROM's partition table is the source of truth for what is
/// installed, the stub belongs to the partition layout rather than to us, and
/// commit is therefore implicit.
pub struct Rp2350Target {
    flash_end: Option<u32>,
}

impl Rp2350Target {
    pub const fn new(flash_end: Option<u32>) -> Self {
        Self { flash_end }
    }
}

impl Target for Rp2350Target {
    fn flash_end(&self) -> Option<u32> {
        self.flash_end
    }

    fn family_matches(&self, family: u32) -> bool {
        matches!(
            family,
            family::RP2350_ARM_S | family::RP2350_ARM_NS | family::RP2350_RISCV
        )
    }

    fn hole(&self) -> &'static Hole {
        &proginfo::RP2350_HOLE
    }

    fn preserve_boot2(&self) -> bool {
        false
    }

    fn commit<F: Flash>(&self, _flash: &mut F, _flash_end: u32, _filename: &str) -> Result<(), FlashError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::XIP_BASE;
    use crate::testutil::MockFlash;

    #[test]
    fn family_selection() {
        let a = Rp2040Target::new(Some(0x1020_0000));
        assert!(a.family_matches(family::RP2040));
        assert!(!a.family_matches(family::RP2350_ARM_S));
        assert!(!a.family_matches(family::ABSOLUTE));

        let b = Rp2350Target::new(Some(0x1020_0000));
        assert!(b.family_matches(family::RP2350_ARM_S));
        assert!(b.family_matches(family::RP2350_ARM_NS));
        assert!(b.family_matches(family::RP2350_RISCV));
        assert!(!b.family_matches(family::RP2040));
        assert!(!b.family_matches(family::DATA));
    }

    #[test]
    fn rp2040_commit_installs_a_record() {
        let mut mem = vec![0xFFu8; 64 * 1024];
        let mut flash = MockFlash::new(&mut mem, XIP_BASE + 0x1_0000);
        let t = Rp2040Target::new(Some(XIP_BASE + 0x1_0000));
        t.commit(&mut flash, XIP_BASE + 0x1_0000, "APP.UF2").unwrap();
        let rec = proginfo::read(&mut flash, t.hole()).unwrap().expect("record");
        assert_eq!(rec.flash_end, XIP_BASE + 0x1_0000);
        assert_eq!(rec.filename(), Some("APP.UF2"));
    }

    #[test]
    fn rp2350_commit_touches_nothing() {
        let mut mem = vec![0xFFu8; 64 * 1024];
        let mut flash = MockFlash::new(&mut mem, XIP_BASE + 0x1_0000);
        let t = Rp2350Target::new(Some(XIP_BASE + 0x1_0000));
        t.commit(&mut flash, XIP_BASE + 0x1_0000, "APP.UF2").unwrap();
        assert!(flash.ops.is_empty());
        assert!(proginfo::read(&mut flash, t.hole()).unwrap().is_none());
    }
}
