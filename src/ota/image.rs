//! Sequential writer for the inactive OTA partition, backed by `esp-ota`.
//!
//! Flow: `begin(size)` → N × `write(chunk)` → `finalize()` → restart
//!
//! On ESP-IDF targets the bytes go to the next OTA slot through
//! `esp_ota::OtaUpdate`. On host targets they are kept in memory so the
//! flasher adapter and its tests can inspect the image.

use core::fmt;
use log::{info, warn};

use crate::error::UpdateError;

/// Largest image the partition layout accepts.
pub const MAX_IMAGE_SIZE: usize = 4 * 1024 * 1024;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    AlreadyInProgress,
    InvalidSize,
    BeginFailed,
    WriteFailed,
    VerifyFailed,
    BootSetFailed,
    IncompleteTransfer,
    NotReceiving,
    Overflow,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInProgress => write!(f, "image write already in progress"),
            Self::InvalidSize => write!(f, "image size out of range (max 4 MB)"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
            Self::WriteFailed => write!(f, "OTA write failed"),
            Self::VerifyFailed => write!(f, "OTA verification failed"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
            Self::IncompleteTransfer => write!(f, "finalize called before all bytes written"),
            Self::NotReceiving => write!(f, "no image write in progress"),
            Self::Overflow => write!(f, "chunk would exceed declared image size"),
        }
    }
}

impl From<ImageError> for UpdateError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::InvalidSize | ImageError::Overflow => Self::InvalidSize,
            ImageError::IncompleteTransfer => Self::Incomplete,
            _ => Self::FlashFailed,
        }
    }
}

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Idle,
    Receiving { expected: usize, written: usize },
    ReadyToBoot,
    Failed,
}

pub struct ImageWriter {
    state: ImageState,
    #[cfg(target_os = "espidf")]
    ota_update: Option<esp_ota::OtaUpdate>,
    #[cfg(not(target_os = "espidf"))]
    image: Vec<u8>,
}

impl ImageWriter {
    pub fn new() -> Self {
        Self {
            state: ImageState::Idle,
            #[cfg(target_os = "espidf")]
            ota_update: None,
            #[cfg(not(target_os = "espidf"))]
            image: Vec::new(),
        }
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    /// Open the inactive partition for an image of `size` bytes.
    pub fn begin(&mut self, size: usize) -> Result<(), ImageError> {
        if matches!(self.state, ImageState::Receiving { .. }) {
            return Err(ImageError::AlreadyInProgress);
        }
        if size == 0 || size > MAX_IMAGE_SIZE {
            return Err(ImageError::InvalidSize);
        }

        #[cfg(target_os = "espidf")]
        {
            let update = esp_ota::OtaUpdate::begin().map_err(|e| {
                warn!("esp-ota begin failed: {:?}", e);
                ImageError::BeginFailed
            })?;
            self.ota_update = Some(update);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.image.clear();
            self.image.reserve(size);
        }

        self.state = ImageState::Receiving {
            expected: size,
            written: 0,
        };
        info!("OTA image: begin ({} bytes)", size);
        Ok(())
    }

    /// Append the next chunk. Returns total bytes written so far.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ImageError> {
        let ImageState::Receiving { expected, written } = self.state else {
            return Err(ImageError::NotReceiving);
        };
        if written + data.len() > expected {
            return Err(ImageError::Overflow);
        }

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.ota_update.as_mut() else {
                return Err(ImageError::NotReceiving);
            };
            if let Err(e) = update.write(data) {
                warn!("esp-ota write failed: {:?}", e);
                self.abort();
                return Err(ImageError::WriteFailed);
            }
        }

        #[cfg(not(target_os = "espidf"))]
        self.image.extend_from_slice(data);

        let written = written + data.len();
        self.state = ImageState::Receiving { expected, written };
        Ok(written)
    }

    /// Verify the image and make it the next boot partition.
    pub fn finalize(&mut self) -> Result<(), ImageError> {
        match self.state {
            ImageState::Receiving { expected, written } if written == expected => {}
            ImageState::Receiving { .. } => return Err(ImageError::IncompleteTransfer),
            _ => return Err(ImageError::NotReceiving),
        }

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.ota_update.take() else {
                self.state = ImageState::Failed;
                return Err(ImageError::NotReceiving);
            };
            let mut completed = update.finalize().map_err(|e| {
                warn!("esp-ota finalize failed: {:?}", e);
                self.state = ImageState::Failed;
                ImageError::VerifyFailed
            })?;
            completed.set_as_boot_partition().map_err(|e| {
                warn!("esp-ota set_as_boot_partition failed: {:?}", e);
                self.state = ImageState::Failed;
                ImageError::BootSetFailed
            })?;
        }

        self.state = ImageState::ReadyToBoot;
        info!("OTA image: finalized, ready to boot");
        Ok(())
    }

    /// Drop the partial image and return to `Idle`.
    pub fn abort(&mut self) {
        #[cfg(target_os = "espidf")]
        {
            // Dropping the handle aborts the esp-ota session.
            self.ota_update.take();
        }
        #[cfg(not(target_os = "espidf"))]
        self.image.clear();

        self.state = ImageState::Idle;
        warn!("OTA image: aborted");
    }

    /// Bytes written in the current or last session (host builds only).
    #[cfg(not(target_os = "espidf"))]
    pub fn image(&self) -> &[u8] {
        &self.image
    }
}

impl Default for ImageWriter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Boot validation ───────────────────────────────────────────

/// Mark the running firmware valid so the bootloader keeps it.
///
/// Without this, rollback reverts to the previous image after repeated
/// failed boots.
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
