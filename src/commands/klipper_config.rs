//! `setup-klipper-config` - reconcile discovered identifiers into printer.cfg

use std::path::Path;

use openams_core::{
    Engine, EngineOptions, Error, Phase, ProvisioningState, SwapPolicy,
};
use openams_canbus::{CanScanner, SocketCanTransport};

use crate::commands::PrinterConfigSink;
use crate::prompt::ConsolePrompter;
use crate::service::SystemdUnit;

/// Scan attempts before the one-shot run gives up
const MAX_ATTEMPTS: u32 = 10;

pub fn run(interface: &str, printer_cfg: &Path) -> openams_core::Result<()> {
    let transport = SocketCanTransport::open(interface)?;
    let mut scanner = CanScanner::new(transport);
    let mut sink = PrinterConfigSink {
        path: printer_cfg.to_path_buf(),
    };
    let mut service = SystemdUnit::klipper();
    let mut prompter = ConsolePrompter;

    let options = EngineOptions {
        swap_policy: SwapPolicy::Confirm,
        ..EngineOptions::default()
    };
    let mut engine = Engine::new(
        &mut scanner,
        &mut sink,
        &mut service,
        &mut prompter,
        options,
        ProvisioningState::default(),
    );

    let phase = engine.run_to_completion(MAX_ATTEMPTS);
    let blocked = engine.config_blocked();
    let state = engine.into_state();

    println!("Reconciliation finished in phase: {}", phase);
    for (label, uuid) in [
        ("FPS", state.fps_uuid.as_deref()),
        ("Mainboard", state.mainboard_uuid.as_deref()),
    ] {
        println!("{:12} {}", format!("{}:", label), uuid.unwrap_or("not detected"));
    }

    if blocked {
        // Fatal: rescanning cannot fix the file, report the real reason
        let msg = state
            .last_error
            .clone()
            .unwrap_or_else(|| "configuration write failed".into());
        println!("Configuration was not written: {}", msg);
        let reason = msg
            .strip_prefix("host configuration unwritable: ")
            .unwrap_or(&msg)
            .to_string();
        return Err(Error::ConfigUnwritable(reason));
    }
    if phase != Phase::ConfigWritten {
        return Err(Error::Timeout(format!(
            "both boards on {} within {} scans",
            interface, MAX_ATTEMPTS
        )));
    }
    println!("Wrote canbus_uuid entries to {}.", printer_cfg.display());
    Ok(())
}
