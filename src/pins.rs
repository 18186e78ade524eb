//! GPIO / peripheral pin assignments for the sensor node board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// IR break-beam
// ---------------------------------------------------------------------------

/// IR emitter LED, driven with the modulated carrier (A0 on the S3 devkit).
pub const IR_LED_GPIO: i32 = 1;
/// Demodulating IR receiver output (A1).  LOW = carrier seen = beam broken.
pub const IR_SENSOR_GPIO: i32 = 2;

// ---------------------------------------------------------------------------
// PWM configuration
// ---------------------------------------------------------------------------

/// Receiver passband centre.
pub const IR_CARRIER_FREQ_HZ: u32 = 38_000;
/// LEDC timer resolution (bits).  8-bit gives 0-255 duty levels.
pub const PWM_RESOLUTION_BITS: u32 = 8;
/// 50 % duty at [`PWM_RESOLUTION_BITS`].
pub const IR_CARRIER_DUTY: u32 = 1 << (PWM_RESOLUTION_BITS - 1);
