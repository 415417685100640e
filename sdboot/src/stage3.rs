//! The stage-3 dispatch decision.
//!
//! On every reset the stage-3 shim consumes the boot command and has to pick
//! between the flashed application, the loader UI, USB recovery, and a
//! RAM-resident image. The decision itself is plain data flow, kept here so
//! it can be tested on the host; the platform shims only act on the result.

use crate::bootcmd::{BootCmd, Mode};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BootDecision {
    /// Jump into the flashed application.
    LaunchApp,
    /// Load the loader UI from SD.
    LoaderUi,
    /// Reboot into the ROM's USB firmware-recovery mode.
    UsbRecovery,
    /// Execute an image already copied to RAM; the argument came with the
    /// boot command (for instance a pointer to a file name).
    RunFromRam(u32),
}

/// Map the (already consumed) boot command and the application-record state
/// to an action. With no command, or an explicit `Default`, the flashed app
/// runs iff its program-info record is valid; otherwise the UI comes up.
pub fn dispatch(cmd: Option<BootCmd>, app_valid: bool) -> BootDecision {
    match cmd {
        Some(BootCmd { mode: Mode::Sd, .. }) => BootDecision::LoaderUi,
        Some(BootCmd { mode: Mode::Update, .. }) => BootDecision::UsbRecovery,
        Some(BootCmd { mode: Mode::Ram, arg }) => BootDecision::RunFromRam(arg),
        Some(BootCmd { mode: Mode::Default, .. }) | None => {
            if app_valid {
                BootDecision::LaunchApp
            } else {
                BootDecision::LoaderUi
            }
        }
    }
}
