//! Task Watchdog Timer (TWDT) driver.
//!
//! Wraps the ESP-IDF TWDT API to reset the device if the main loop
//! stalls for more than 10 seconds.
//!
//! The main loop must call `feed()` on every iteration.  While a firmware
//! update holds the loop, [`FeedingDelay`] keeps the watchdog fed from the
//! pipeline's per-chunk pause.

use embedded_hal::delay::DelayNs;

#[cfg(target_os = "espidf")]
use esp_idf_sys::*;

#[cfg(target_os = "espidf")]
use log::info;

/// TWDT timeout.  Every blocking network call must be preceded by a feed
/// and finish within this window on its own.
pub const WATCHDOG_TIMEOUT_MS: u32 = 10_000;

/// Cloning does not re-subscribe; every clone feeds the same task entry.
#[derive(Clone)]
pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    #[cfg(not(target_os = "espidf"))]
    feeds: std::rc::Rc<core::cell::Cell<u32>>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    /// Initialise and subscribe the current task to the TWDT.
    pub fn new() -> Self {
        #[cfg(target_os = "espidf")]
        {
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms: WATCHDOG_TIMEOUT_MS,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    log::warn!(
                        "TWDT reconfigure returned {} (may already be configured)",
                        ret
                    );
                }

                let ret = esp_task_wdt_add(core::ptr::null_mut());
                let subscribed = ret == ESP_OK;
                if subscribed {
                    info!("Watchdog: subscribed (10s timeout, panic on trigger)");
                } else {
                    log::warn!("Watchdog: failed to subscribe ({})", ret);
                }

                Self { subscribed }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            log::info!("Watchdog(sim): counting feeds");
            Self {
                feeds: std::rc::Rc::default(),
            }
        }
    }

    /// Feed the watchdog. Must be called at least every 10 seconds.
    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        {
            if self.subscribed {
                unsafe {
                    esp_task_wdt_reset();
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        self.feeds.set(self.feeds.get() + 1);
    }

    /// Feeds seen by this watchdog and all its clones.
    #[cfg(not(target_os = "espidf"))]
    pub fn feed_count(&self) -> u32 {
        self.feeds.get()
    }
}

/// A [`DelayNs`] that feeds the watchdog before every pause.
pub struct FeedingDelay<D> {
    inner: D,
    watchdog: Watchdog,
}

impl<D: DelayNs> FeedingDelay<D> {
    pub fn new(inner: D, watchdog: Watchdog) -> Self {
        Self { inner, watchdog }
    }
}

impl<D: DelayNs> DelayNs for FeedingDelay<D> {
    fn delay_ns(&mut self, ns: u32) {
        self.watchdog.feed();
        self.inner.delay_ns(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.watchdog.feed();
        self.inner.delay_us(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.watchdog.feed();
        self.inner.delay_ms(ms);
    }
}

/// Poll `ready` every `poll_ms` until it holds or `timeout_ms` has been
/// spent waiting.  Returns the final value of `ready`.
///
/// Pass a [`FeedingDelay`] to keep the watchdog fed for the whole wait.
pub fn wait_until(
    delay: &mut impl DelayNs,
    timeout_ms: u32,
    poll_ms: u32,
    mut ready: impl FnMut() -> bool,
) -> bool {
    let poll_ms = poll_ms.max(1);
    let mut waited = 0;
    while !ready() {
        if waited >= timeout_ms {
            return false;
        }
        delay.delay_ms(poll_ms);
        waited += poll_ms;
    }
    true
}
