//! OTA partition writer and system restart.
//!
//! Implements [`FirmwareWriter`] and [`RestartPort`].
//!
//! - **`target_os = "espidf"`**: `esp-ota` drives the inactive app
//!   partition; `finalize` validates the image and marks it bootable.
//! - **all other targets**: the image is collected in memory and
//!   `restart` only records that it was requested.

use log::{info, warn};

use crate::app::ports::{FirmwareWriter, FlashError, RestartPort};

/// Writes a downloaded image into the next OTA slot.
pub struct OtaWriter {
    #[cfg(target_os = "espidf")]
    update: Option<esp_ota::OtaUpdate>,

    #[cfg(not(target_os = "espidf"))]
    capacity: u64,
    #[cfg(not(target_os = "espidf"))]
    image: Option<Vec<u8>>,
    #[cfg(not(target_os = "espidf"))]
    committed: Option<Vec<u8>>,
}

impl OtaWriter {
    #[cfg(target_os = "espidf")]
    pub fn new() -> Self {
        Self { update: None }
    }

    /// Simulation: a 1.5 MiB slot, the size of a default OTA partition.
    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self::with_capacity(0x18_0000)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            image: None,
            committed: None,
        }
    }

    /// Last image that passed `finalize`.
    #[cfg(not(target_os = "espidf"))]
    pub fn committed(&self) -> Option<&[u8]> {
        self.committed.as_deref()
    }

    /// Size of the partition the next update would land in.
    #[cfg(target_os = "espidf")]
    fn slot_capacity() -> Option<u64> {
        // SAFETY: read-only query of the partition table.
        let part = unsafe { esp_idf_svc::sys::esp_ota_get_next_update_partition(core::ptr::null()) };
        if part.is_null() {
            return None;
        }
        Some(u64::from(unsafe { (*part).size }))
    }
}

impl Default for OtaWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "espidf")]
impl FirmwareWriter for OtaWriter {
    fn open(&mut self, size: u64) -> Result<(), FlashError> {
        match Self::slot_capacity() {
            Some(cap) if size <= cap => {}
            Some(cap) => {
                warn!("OTA: image of {} bytes exceeds slot of {} bytes", size, cap);
                return Err(FlashError::InsufficientSpace);
            }
            None => {
                warn!("OTA: no update partition");
                return Err(FlashError::InsufficientSpace);
            }
        }
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("esp-ota begin failed: {:?}", e);
            FlashError::InsufficientSpace
        })?;
        self.update = Some(update);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), FlashError> {
        let update = self.update.as_mut().ok_or(FlashError::NotOpen)?;
        update.write(data).map_err(|e| {
            warn!("esp-ota write failed: {:?}", e);
            FlashError::WriteFailed
        })
    }

    fn finalize(&mut self) -> Result<(), FlashError> {
        let update = self.update.take().ok_or(FlashError::NotOpen)?;
        let mut completed = update.finalize().map_err(|e| {
            warn!("esp-ota finalize failed: {:?}", e);
            FlashError::VerifyFailed
        })?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("esp-ota set_as_boot_partition failed: {:?}", e);
            FlashError::VerifyFailed
        })?;
        info!("OTA: image verified, boot partition switched");
        Ok(())
    }

    fn abort(&mut self) {
        // esp-ota aborts automatically when OtaUpdate is dropped
        if self.update.take().is_some() {
            warn!("OTA: partition write aborted");
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl FirmwareWriter for OtaWriter {
    fn open(&mut self, size: u64) -> Result<(), FlashError> {
        if size > self.capacity {
            warn!("OTA(sim): image of {} bytes exceeds slot of {} bytes", size, self.capacity);
            return Err(FlashError::InsufficientSpace);
        }
        self.image = Some(Vec::with_capacity(size as usize));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), FlashError> {
        let image = self.image.as_mut().ok_or(FlashError::NotOpen)?;
        if image.len() as u64 + data.len() as u64 > self.capacity {
            return Err(FlashError::WriteFailed);
        }
        image.extend_from_slice(data);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), FlashError> {
        let image = self.image.take().ok_or(FlashError::NotOpen)?;
        if image.is_empty() {
            return Err(FlashError::VerifyFailed);
        }
        info!("OTA(sim): committed {} bytes", image.len());
        self.committed = Some(image);
        Ok(())
    }

    fn abort(&mut self) {
        if self.image.take().is_some() {
            warn!("OTA(sim): partition write aborted");
        }
    }
}

// ── Restart ───────────────────────────────────────────────────

/// Soft-reset into whatever partition is marked bootable.
#[derive(Default)]
pub struct SystemRestart {
    #[cfg(not(target_os = "espidf"))]
    requested: u32,
}

impl SystemRestart {
    /// Simulation: how many times a restart was asked for.
    #[cfg(not(target_os = "espidf"))]
    pub fn requested(&self) -> u32 {
        self.requested
    }
}

impl RestartPort for SystemRestart {
    #[cfg(target_os = "espidf")]
    fn restart(&mut self) {
        info!("OTA: rebooting into new firmware");
        esp_ota::restart();
    }

    #[cfg(not(target_os = "espidf"))]
    fn restart(&mut self) {
        info!("OTA(sim): restart requested");
        self.requested += 1;
    }
}

// ── Boot validation ───────────────────────────────────────────

/// Mark the running image valid so the bootloader keeps it.
///
/// Without this, the rollback watchdog reverts to the previous firmware
/// after three consecutive failed boots.
#[cfg(target_os = "espidf")]
pub fn mark_running_valid() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn mark_running_valid() {
    info!("OTA rollback check (simulation): skipped");
}
