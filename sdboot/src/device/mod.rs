//! Platform glue. Everything in here talks to real hardware and is gated by
//! the platform features; the rest of the crate stays host-buildable.

#[cfg(any(feature = "rp2040", feature = "rp2350"))]
mod romflash;

#[cfg(feature = "rp2040")]
pub mod rp2040;

#[cfg(feature = "rp2350")]
pub mod rp2350;
