//! `setup` - guided first-time provisioning of both boards

use std::path::Path;
use std::time::Duration;

use openams_canbus::{CanScanner, SocketCanTransport};
use openams_core::{mode, BoardKind, HostConfig, Mode, Prompter, Result};

use crate::commands::{canbus_setup, deploy, install, klipper_config};
use crate::prompt::ConsolePrompter;
use crate::service::SystemdUnit;

pub fn run(interface: &str, printer_cfg: &Path) -> Result<()> {
    let mut prompter = ConsolePrompter;
    let klipper = SystemdUnit::klipper();

    println!("== OpenAMS setup ==");

    // Klipper holds the serial/CAN devices while running
    if klipper.is_active() {
        log::info!("Stopping Klipper for the duration of the setup");
        klipper.stop()?;
    }

    let config = HostConfig::load(printer_cfg).ok();
    let fps_mode = mode::resolve(BoardKind::Fps, None, config.as_ref(), &mut prompter)?;

    prompter.pause(
        "Connect the FPS board over USB. For a factory-fresh board, hold BOOT while plugging in.",
    );
    deploy::run(
        &deploy::DeployArgs {
            board: BoardKind::Fps,
            mode: Some(fps_mode),
            bootloader: None,
            application: None,
            non_interactive: true,
        },
        printer_cfg,
    )?;

    if fps_mode == Mode::Bridge {
        // The freshly flashed bridge creates the CAN interface itself
        canbus_setup::run(interface, false)?;
    }

    prompter.pause("Connect the OpenAMS mainboard over USB.");
    deploy::run(
        &deploy::DeployArgs {
            board: BoardKind::Mainboard,
            mode: Some(Mode::Canbus),
            bootloader: None,
            application: None,
            non_interactive: true,
        },
        printer_cfg,
    )?;

    klipper_config::run(interface, printer_cfg)?;

    if prompter
        .confirm("Install the reconciliation daemon service?")
        .unwrap_or(false)
    {
        install::run()?;
    }

    klipper.enable()?;
    klipper.start()?;

    print_summary(interface)?;
    Ok(())
}

fn print_summary(interface: &str) -> Result<()> {
    let transport = SocketCanTransport::open(interface)?;
    let mut scanner = CanScanner::new(transport);
    let nodes = scanner.scan_nodes(Duration::from_secs(2))?;

    println!();
    println!("OpenAMS setup summary");
    println!("=====================");
    for kind in [BoardKind::Fps, BoardKind::Mainboard] {
        let uuid = nodes
            .iter()
            .find(|n| n.kind == Some(kind))
            .map(|n| n.uuid.as_str())
            .unwrap_or("not detected");
        println!("{:12} {}", format!("{}:", kind), uuid);
    }
    Ok(())
}
