//! Průlety sensor-node firmware library.
//!
//! Exposes every module to the binary and to the host test suites.
//! ESP-IDF code is guarded by `#[cfg(target_os = "espidf")]` inside each
//! module; the other branch is a simulation backend.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod detection;
pub mod error;

pub mod pins;

pub mod adapters;
pub mod drivers;
