//! systemd service control

use std::process::Command;

use openams_core::{Error, Result, ServiceControl};

/// Handle on one systemd unit
pub struct SystemdUnit {
    name: String,
}

impl SystemdUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The Klipper host service that consumes the written configuration
    pub fn klipper() -> Self {
        Self::new("klipper")
    }

    fn systemctl(&self, action: &str) -> Result<()> {
        log::info!("systemctl {} {}", action, self.name);
        let status = Command::new("sudo")
            .args(["systemctl", action, &self.name])
            .status()
            .map_err(|e| Error::Service(format!("failed to run systemctl: {}", e)))?;
        if !status.success() {
            return Err(Error::Service(format!(
                "systemctl {} {} exited with {}",
                action, self.name, status
            )));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        Command::new("systemctl")
            .args(["is-active", "--quiet", &self.name])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn stop(&self) -> Result<()> {
        self.systemctl("stop")
    }

    pub fn enable(&self) -> Result<()> {
        self.systemctl("enable")
    }

    pub fn start(&self) -> Result<()> {
        self.systemctl("start")
    }
}

impl ServiceControl for SystemdUnit {
    fn restart(&mut self) -> Result<()> {
        self.systemctl("restart")
    }
}
