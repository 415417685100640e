//! The volatile boot command.
//!
//! Three 32-bit words in a register region that survives warm reset carry an
//! instruction from the loader UI to the stage-3 dispatcher: a validity tag,
//! a mode, and a mode-specific argument. Stage-3 consumes the command exactly
//! once; taking it erases the tag so the command never repeats on the next
//! reboot.

use log::debug;

/// Validity tag; shares its value with the program-info record magic.
pub const MAGIC: u32 = crate::proginfo::MAGIC;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Mode {
    /// Boot the flashed application if one is installed.
    #[default]
    Default = 0,
    /// Bring up the loader UI from SD.
    Sd = 1,
    /// Enter USB firmware-recovery mode.
    Update = 2,
    /// Run an image already placed in RAM; the argument names it.
    Ram = 3,
}

impl Mode {
    fn from_word(w: u32) -> Self {
        match w {
            1 => Mode::Sd,
            2 => Mode::Update,
            3 => Mode::Ram,
            _ => Mode::Default,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootCmd {
    pub mode: Mode,
    pub arg: u32,
}

/// The three reset-surviving scratch words backing the command.
///
/// Word 0 is the validity tag, word 1 the mode, word 2 the argument. The
/// device implementations map this onto the watchdog scratch registers; the
/// tests use a plain array.
pub trait CmdSlot {
    fn read_word(&self, index: usize) -> u32;
    fn write_word(&mut self, index: usize, value: u32);
}

/// Post a command for the next boot. The tag is written last, so a reset in
/// the middle of `set` leaves no half-valid command behind.
pub fn set<S: CmdSlot>(slot: &mut S, mode: Mode, arg: u32) {
    slot.write_word(1, mode as u32);
    slot.write_word(2, arg);
    slot.write_word(0, MAGIC);
}

/// Read and consume the pending command, if any. The tag is erased before
/// returning; no other writer exists at the moment of take.
pub fn take<S: CmdSlot>(slot: &mut S) -> Option<BootCmd> {
    if slot.read_word(0) != MAGIC {
        return None;
    }
    slot.write_word(0, 0);
    let cmd = BootCmd {
        mode: Mode::from_word(slot.read_word(1)),
        arg: slot.read_word(2),
    };
    debug!("boot command: {:?} arg {:#010x}", cmd.mode, cmd.arg);
    Some(cmd)
}

impl CmdSlot for [u32; 3] {
    fn read_word(&self, index: usize) -> u32 {
        self[index]
    }

    fn write_word(&mut self, index: usize, value: u32) {
        self[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_take() {
        let mut slot = [0u32; 3];
        set(&mut slot, Mode::Sd, 7);
        assert_eq!(take(&mut slot), Some(BootCmd { mode: Mode::Sd, arg: 7 }));
    }

    #[test]
    fn take_consumes_the_command() {
        let mut slot = [0u32; 3];
        set(&mut slot, Mode::Update, 0);
        assert!(take(&mut slot).is_some());
        assert!(take(&mut slot).is_none());
        // Mode and argument words are left alone; only the tag is erased.
        assert_eq!(slot[1], Mode::Update as u32);
    }

    #[test]
    fn stale_scratch_contents_are_not_a_command() {
        let mut slot = [0xDEAD_BEEF, 1, 2];
        assert!(take(&mut slot).is_none());
    }

    #[test]
    fn unknown_mode_degrades_to_default() {
        let mut slot = [MAGIC, 99, 0];
        assert_eq!(take(&mut slot).unwrap().mode, Mode::Default);
    }
}
