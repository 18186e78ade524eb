//! Boot-time errors for the firmware.
//!
//! Once the control loop runs, subsystem failures are logged and retried
//! where they happen.  Only bring-up failures reach `main` and abort boot;
//! each converts into [`Error`] so they propagate with `?`.  All variants
//! are `Copy`.

use core::fmt;

use crate::adapters::wifi::ConnectivityError;
use crate::app::ports::ConfigError;
use crate::drivers::ir_beam::CarrierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The settings store could not be opened.
    Config(ConfigError),
    /// The WiFi driver could not be brought up.
    Wifi(ConnectivityError),
    /// The beam emitter carrier could not be started.
    Carrier(CarrierError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Wifi(e) => write!(f, "wifi: {e}"),
            Self::Carrier(e) => write!(f, "carrier: {e}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ConnectivityError> for Error {
    fn from(e: ConnectivityError) -> Self {
        Self::Wifi(e)
    }
}

impl From<CarrierError> for Error {
    fn from(e: CarrierError) -> Self {
        Self::Carrier(e)
    }
}
