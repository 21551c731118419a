//! Making USB devices visible before flashing
//!
//! Under WSL a device plugged into the Windows host is invisible until it
//! is shared and attached with `usbipd`. The hook runs before each USB
//! enumeration so a freshly re-enumerated board (new vid/pid after a
//! reset) gets re-attached automatically. On native Linux the hook is a
//! no-op.

use std::process::Command;

use crate::error::{DfuError, Result};

/// Pre-enumeration hook for making a vid/pid pair reachable
pub trait AttachHook {
    /// Ensure a device with the given ids is visible to this system
    fn attach(&mut self, vendor: u16, product: u16) -> Result<()>;
}

/// Hook for systems where devices are directly visible
pub struct NullAttach;

impl AttachHook for NullAttach {
    fn attach(&mut self, _vendor: u16, _product: u16) -> Result<()> {
        Ok(())
    }
}

/// WSL hook that binds and attaches devices through `usbipd.exe`
pub struct UsbipdAttach;

impl UsbipdAttach {
    /// Whether this system is a WSL guest
    pub fn is_wsl() -> bool {
        std::env::var_os("WSL_DISTRO_NAME").is_some()
            || std::fs::read_to_string("/proc/version")
                .map(|v| v.to_ascii_lowercase().contains("microsoft"))
                .unwrap_or(false)
    }

    fn usbipd(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("usbipd.exe")
            .args(args)
            .output()
            .map_err(|e| DfuError::Attach(format!("failed to run usbipd.exe: {}", e)))?;
        if !output.status.success() {
            return Err(DfuError::Attach(format!(
                "usbipd.exe {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl AttachHook for UsbipdAttach {
    fn attach(&mut self, vendor: u16, product: u16) -> Result<()> {
        let listing = self.usbipd(&["list"])?;
        let Some(busid) = find_busid(&listing, vendor, product) else {
            // Not plugged in on the host side; the locator reports absence
            return Ok(());
        };

        if listing
            .lines()
            .any(|l| l.contains(&busid) && l.contains("Attached"))
        {
            log::debug!("{:04x}:{:04x} already attached at busid {}", vendor, product, busid);
            return Ok(());
        }

        log::info!(
            "Attaching {:04x}:{:04x} (busid {}) via usbipd",
            vendor,
            product,
            busid
        );
        self.usbipd(&["bind", "--busid", &busid])?;
        self.usbipd(&["attach", "--wsl", "--busid", &busid])?;
        Ok(())
    }
}

/// Pick the busid for a vid/pid out of `usbipd list` output
fn find_busid(listing: &str, vendor: u16, product: u16) -> Option<String> {
    let needle = format!("{:04x}:{:04x}", vendor, product);
    for line in listing.lines() {
        if !line.to_ascii_lowercase().contains(&needle) {
            continue;
        }
        let busid = line.split_whitespace().next()?;
        // Busids look like "2-3"; skip section headers and prose
        if busid.contains('-') && busid.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Some(busid.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Connected:
BUSID  VID:PID    DEVICE                           STATE
2-3    0483:df11  STM32 BOOTLOADER                 Not shared
2-7    1d50:606f  USB Serial Device (COM5)         Attached
4-1    046d:c52b  USB Input Device                 Not shared
";

    #[test]
    fn finds_busid_for_dfu_device() {
        assert_eq!(find_busid(LISTING, 0x0483, 0xDF11).as_deref(), Some("2-3"));
        assert_eq!(find_busid(LISTING, 0x1D50, 0x606F).as_deref(), Some("2-7"));
    }

    #[test]
    fn absent_device_yields_none() {
        assert_eq!(find_busid(LISTING, 0x1D50, 0x6177), None);
    }

    #[test]
    fn header_lines_are_not_busids() {
        assert_eq!(find_busid("BUSID  VID:PID\n", 0x0483, 0xDF11), None);
    }
}
