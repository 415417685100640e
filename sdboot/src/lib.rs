//! Core of an SD-card resident firmware loader for RP2040/RP2350 boards.
//!
//! The loader lives in a protected high region of the on-package NOR flash and
//! rewrites the application region in place from a streamed UF2 file. The hard
//! parts live here: the UF2 validator ([`check`]), the flash orchestrator
//! ([`loader`]), the persistent application descriptor and the volatile boot
//! command ([`proginfo`], [`bootcmd`]), and the stage-3 dispatch decision
//! ([`stage3`]). Everything hardware-facing sits behind the [`flash::Flash`]
//! and [`target::Target`] capabilities, so the whole core runs under `cargo
//! test` on the host; the real drivers are gated behind the `rp2040` and
//! `rp2350` features in [`device`].

#![cfg_attr(not(test), no_std)]

pub mod bootcmd;
pub mod check;
pub mod device;
pub mod flash;
pub mod loader;
pub mod proginfo;
pub mod stage3;
pub mod target;
pub mod testutil;
pub mod uf2;
