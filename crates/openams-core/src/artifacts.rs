//! Firmware artifact references
//!
//! Artifacts are opaque binary images produced by an external build (or
//! shipped prebuilt), keyed by board kind and mode. This module only carries
//! the references; sourcing them is the caller's business.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The pair of images one flash job consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareArtifacts {
    /// Katapult bootloader image, written via DFU
    pub bootloader: PathBuf,
    /// Application image, written via the bootloader protocol
    pub application: PathBuf,
}

impl FirmwareArtifacts {
    pub fn new(bootloader: impl Into<PathBuf>, application: impl Into<PathBuf>) -> Self {
        Self {
            bootloader: bootloader.into(),
            application: application.into(),
        }
    }

    /// Check both images exist before any device is touched
    pub fn validate(&self) -> Result<()> {
        for (label, path) in [
            ("bootloader", &self.bootloader),
            ("application", &self.application),
        ] {
            if !path.is_file() {
                return Err(Error::State(format!(
                    "{} image not found: {}",
                    label,
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Load an image for upload
    pub fn read_image(path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }
}
