//! Command implementations

pub mod canbus_setup;
pub mod daemon;
pub mod deploy;
pub mod install;
pub mod klipper_config;
pub mod query;
pub mod setup;

use std::path::PathBuf;

use openams_core::{ConfigSink, HostConfig, Result};

/// Config sink that re-reads printer.cfg on every write
///
/// Other tools edit the same file between cycles; loading fresh keeps their
/// changes instead of clobbering them with a stale in-memory copy.
pub(crate) struct PrinterConfigSink {
    pub path: PathBuf,
}

impl ConfigSink for PrinterConfigSink {
    fn write_uuids(&mut self, fps_uuid: &str, mainboard_uuid: &str) -> Result<()> {
        let mut config = HostConfig::load_or_empty(&self.path)?;
        config.write_uuids(fps_uuid, mainboard_uuid)
    }
}
