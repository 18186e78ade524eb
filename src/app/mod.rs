//! Application core: pure domain logic, zero I/O.
//!
//! This module holds the rules of the node: the MQTT session lifecycle,
//! inbound command decoding, outbound telemetry payloads and the firmware
//! update pipeline.  All interaction with the network and flash happens
//! through **port traits** defined in [`ports`], keeping this layer fully
//! testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ota;
pub mod ports;
pub mod session;
pub mod topics;
