//! IR break-beam sensor.
//!
//! The emitter is a plain IR LED blinking at the receiver's 38 kHz carrier
//! frequency; the receiver output is active-low.  [`IrBeam`] turns the
//! receiver line into the `triggered` sample that
//! [`ClusterDetector::poll`](crate::detection::ClusterDetector::poll)
//! consumes.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: `start_carrier` drives LEDC timer 0 / channel 0 on the
//! emitter pin.  On host/test: the carrier is a no-op and any
//! `embedded_hal` input pin can stand in for the receiver.

use embedded_hal::digital::InputPin;
use log::warn;

#[cfg(target_os = "espidf")]
use esp_idf_sys::*;

#[cfg(target_os = "espidf")]
use crate::pins;

/// LEDC bring-up failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarrierError(pub i32);

impl core::fmt::Display for CarrierError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IR carrier LEDC config failed (rc={})", self.0)
    }
}

/// Start the 38 kHz carrier on the emitter.  Runs for the life of the
/// process.
#[cfg(target_os = "espidf")]
pub fn start_carrier() -> Result<(), CarrierError> {
    let timer = ledc_timer_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        timer_num: ledc_timer_t_LEDC_TIMER_0,
        duty_resolution: pins::PWM_RESOLUTION_BITS as ledc_timer_bit_t,
        freq_hz: pins::IR_CARRIER_FREQ_HZ,
        clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
        ..Default::default()
    };
    // SAFETY: called once from main() before the control loop starts.
    let ret = unsafe { ledc_timer_config(&timer) };
    if ret != ESP_OK {
        return Err(CarrierError(ret));
    }

    let channel = ledc_channel_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        channel: ledc_channel_t_LEDC_CHANNEL_0,
        timer_sel: ledc_timer_t_LEDC_TIMER_0,
        gpio_num: pins::IR_LED_GPIO,
        duty: pins::IR_CARRIER_DUTY,
        hpoint: 0,
        ..Default::default()
    };
    let ret = unsafe { ledc_channel_config(&channel) };
    if ret != ESP_OK {
        return Err(CarrierError(ret));
    }

    log::info!("Beam: {} Hz carrier on GPIO{}", pins::IR_CARRIER_FREQ_HZ, pins::IR_LED_GPIO);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn start_carrier() -> Result<(), CarrierError> {
    log::info!("Beam(sim): carrier skipped");
    Ok(())
}

/// Receiver side of the beam.
pub struct IrBeam<P> {
    pin: P,
    read_errors: u32,
}

impl<P: InputPin> IrBeam<P> {
    pub fn new(pin: P) -> Self {
        Self { pin, read_errors: 0 }
    }

    /// `true` while the receiver pulls its output LOW.
    ///
    /// A failed read counts as not triggered.
    pub fn triggered(&mut self) -> bool {
        match self.pin.is_low() {
            Ok(low) => low,
            Err(_) => {
                self.read_errors = self.read_errors.saturating_add(1);
                if self.read_errors == 1 || self.read_errors % 1000 == 0 {
                    warn!("Beam: receiver read failed ({} total)", self.read_errors);
                }
                false
            }
        }
    }

    pub fn read_errors(&self) -> u32 {
        self.read_errors
    }
}
