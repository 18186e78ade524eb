//! Peripheral drivers: IR break-beam and task watchdog.

pub mod ir_beam;
pub mod watchdog;
