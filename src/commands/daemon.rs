//! `daemon` - long-running reconciliation loop

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use openams_canbus::{CanScanner, SocketCanTransport};
use openams_core::{
    Engine, EngineOptions, Error, NonInteractive, ProvisioningState, Result, SwapPolicy,
};

use crate::commands::PrinterConfigSink;
use crate::service::SystemdUnit;

pub struct DaemonArgs {
    pub interval: Duration,
    pub state_file: PathBuf,
    pub swap_policy: SwapPolicy,
    pub interface: String,
}

pub fn run(args: &DaemonArgs, printer_cfg: &Path) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            running.store(false, Ordering::SeqCst);
        })
        .map_err(|e| Error::Service(format!("failed to install signal handler: {}", e)))?;
    }

    let transport = SocketCanTransport::open(&args.interface)?;
    let mut scanner = CanScanner::new(transport);
    let mut sink = PrinterConfigSink {
        path: printer_cfg.to_path_buf(),
    };
    let mut service = SystemdUnit::klipper();
    let mut prompter = NonInteractive;

    let state = ProvisioningState::load(&args.state_file);
    log::info!(
        "daemon starting in phase {} (interval {}s, swap policy {:?})",
        state.phase(),
        args.interval.as_secs(),
        args.swap_policy
    );

    let options = EngineOptions {
        poll_interval: args.interval,
        swap_policy: args.swap_policy,
        ..EngineOptions::default()
    };
    let mut engine = Engine::new(
        &mut scanner,
        &mut sink,
        &mut service,
        &mut prompter,
        options,
        state,
    );

    while running.load(Ordering::SeqCst) {
        let phase = engine.poll_once();
        log::debug!("cycle complete: {}", phase);
        if let Err(e) = engine.state().save(&args.state_file) {
            log::warn!("could not persist state: {}", e);
        }
        sleep_interruptible(args.interval, &running);
    }

    let state = engine.into_state();
    state.save(&args.state_file)?;
    log::info!("daemon stopped in phase {}", state.phase());
    Ok(())
}

/// Sleep in short slices so a shutdown request takes effect promptly
fn sleep_interruptible(total: Duration, running: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(200);
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::SeqCst) {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
}
