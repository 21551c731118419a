//! `setup-canbus` - make sure the CAN interface exists and is up

use std::process::Command;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use openams_core::{Error, Result};

const BITRATE: u32 = 1_000_000;

/// How long the interactive wait gives a freshly flashed bridge to register
/// its interface before giving up
const WAIT_TIMEOUT: Duration = Duration::from_secs(120);

pub fn run(interface: &str, non_interactive: bool) -> Result<()> {
    if !interface_exists(interface)? {
        if non_interactive {
            return Err(Error::Bus(format!(
                "CAN interface {} does not exist",
                interface
            )));
        }
        wait_for_interface(interface)?;
    }

    if interface_is_up(interface)? {
        println!("CAN interface {} is up.", interface);
        return Ok(());
    }

    log::info!("Bringing up {} at {} bit/s", interface, BITRATE);
    let status = Command::new("sudo")
        .args([
            "ip",
            "link",
            "set",
            interface,
            "up",
            "type",
            "can",
            "bitrate",
            &BITRATE.to_string(),
        ])
        .status()
        .map_err(|e| Error::Bus(format!("failed to run ip: {}", e)))?;
    if !status.success() {
        return Err(Error::Bus(format!(
            "ip link set {} up exited with {}",
            interface, status
        )));
    }
    println!("CAN interface {} configured and up.", interface);
    Ok(())
}

fn ip_link_show(interface: &str) -> Result<Option<String>> {
    let output = Command::new("ip")
        .args(["link", "show", interface])
        .output()
        .map_err(|e| Error::Bus(format!("failed to run ip: {}", e)))?;
    if output.status.success() {
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    } else {
        Ok(None)
    }
}

fn interface_exists(interface: &str) -> Result<bool> {
    Ok(ip_link_show(interface)?.is_some())
}

fn interface_is_up(interface: &str) -> Result<bool> {
    // SocketCAN interfaces report UNKNOWN rather than UP once active
    Ok(ip_link_show(interface)?
        .map(|out| out.contains("state UP") || out.contains("state UNKNOWN"))
        .unwrap_or(false))
}

/// A bridge-mode FPS creates the interface when its firmware comes up, so
/// waiting is the common path right after a flash
fn wait_for_interface(interface: &str) -> Result<()> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(format!("Waiting for CAN interface {}...", interface));
    pb.enable_steady_tick(Duration::from_millis(100));

    let found = poll_until(WAIT_TIMEOUT, Duration::from_secs(1), || {
        interface_exists(interface)
    });
    pb.finish_and_clear();
    if found? {
        log::info!("CAN interface {} detected", interface);
        Ok(())
    } else {
        Err(Error::Timeout(format!(
            "CAN interface {} within {}s",
            interface,
            WAIT_TIMEOUT.as_secs()
        )))
    }
}

/// Re-run a probe until it reports true or the window closes
fn poll_until(
    timeout: Duration,
    interval: Duration,
    mut probe: impl FnMut() -> Result<bool>,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if probe()? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(interval.min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_gives_up_after_the_deadline() {
        let mut calls = 0;
        let found = poll_until(Duration::ZERO, Duration::ZERO, || {
            calls += 1;
            Ok(false)
        })
        .unwrap();
        assert!(!found);
        assert_eq!(calls, 1);
    }

    #[test]
    fn wait_returns_as_soon_as_the_probe_succeeds() {
        let mut calls = 0;
        let found = poll_until(Duration::from_secs(60), Duration::ZERO, || {
            calls += 1;
            Ok(calls == 3)
        })
        .unwrap();
        assert!(found);
        assert_eq!(calls, 3);
    }

    #[test]
    fn probe_errors_cut_the_wait_short() {
        let err = poll_until(Duration::from_secs(60), Duration::ZERO, || {
            Err(Error::Bus("link query failed".into()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Bus(_)));
    }
}
