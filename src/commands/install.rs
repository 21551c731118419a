//! `install-assistant` - install and enable the daemon systemd unit

use std::io::Write;
use std::process::{Command, Stdio};

use openams_core::{Error, Result};

const UNIT_PATH: &str = "/etc/systemd/system/openams-daemon.service";
const STATE_DIR: &str = "/var/lib/openams";

pub fn run() -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::Service(format!("cannot determine executable path: {}", e)))?;

    let unit = format!(
        "[Unit]\n\
         Description=OpenAMS provisioning daemon\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={} daemon\n\
         Restart=on-failure\n\
         User=root\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        exe.display()
    );

    sudo(&["mkdir", "-p", STATE_DIR])?;
    write_unit(&unit)?;
    sudo(&["chmod", "644", UNIT_PATH])?;
    sudo(&["systemctl", "daemon-reload"])?;
    sudo(&["systemctl", "enable", "--now", "openams-daemon.service"])?;

    println!("openams-daemon service installed and started.");
    Ok(())
}

fn write_unit(contents: &str) -> Result<()> {
    // tee under sudo so this works without running the whole tool as root
    let mut child = Command::new("sudo")
        .args(["tee", UNIT_PATH])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|e| Error::Service(format!("failed to run tee: {}", e)))?;
    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(contents.as_bytes())
            .map_err(|e| Error::Service(format!("failed to write unit file: {}", e)))?;
    }
    let status = child
        .wait()
        .map_err(|e| Error::Service(format!("tee did not finish: {}", e)))?;
    if !status.success() {
        return Err(Error::Service(format!(
            "writing {} exited with {}",
            UNIT_PATH, status
        )));
    }
    Ok(())
}

fn sudo(args: &[&str]) -> Result<()> {
    log::debug!("Running: sudo {}", args.join(" "));
    let status = Command::new("sudo")
        .args(args)
        .status()
        .map_err(|e| Error::Service(format!("failed to run sudo: {}", e)))?;
    if !status.success() {
        return Err(Error::Service(format!(
            "sudo {} exited with {}",
            args.join(" "),
            status
        )));
    }
    Ok(())
}
