#![no_std]

//! Hardware implementations of the psxcard traits: the PIO serial
//! front-end, the SD-card file store and the status LED. Everything in
//! here is board-specific; the simulator core never sees more than the
//! trait objects.

#[cfg(feature = "pico")]
pub mod pico;
