//! `deploy` - flash one board through the two-stage pipeline

use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use openams_core::{
    mode, BoardKind, FirmwareArtifacts, HostConfig, Mode, NonInteractive, Prompter, Result,
};
use openams_flash::{
    platform_hook, FlashEngine, FlashJob, FlashOutcome, SerialAppStage, UsbDfuStage,
    UsbStageProbe,
};

use crate::firmware::FirmwareBuilder;
use crate::prompt::ConsolePrompter;

pub struct DeployArgs {
    pub board: BoardKind,
    pub mode: Option<Mode>,
    pub bootloader: Option<PathBuf>,
    pub application: Option<PathBuf>,
    pub non_interactive: bool,
}

pub fn run(args: &DeployArgs, printer_cfg: &Path) -> Result<FlashOutcome> {
    let config = match HostConfig::load(printer_cfg) {
        Ok(config) => Some(config),
        Err(e) => {
            log::debug!("no usable host configuration for mode detection: {}", e);
            None
        }
    };

    let mut console = ConsolePrompter;
    let mut silent = NonInteractive;
    let prompter: &mut dyn Prompter = if args.non_interactive {
        &mut silent
    } else {
        &mut console
    };

    let mode = mode::resolve(args.board, args.mode, config.as_ref(), &mut *prompter)?;
    log::info!("Deploying {} firmware to the {} board", mode, args.board);

    let artifacts = resolve_artifacts(args, mode)?;

    if !args.non_interactive && args.board == BoardKind::Fps {
        prompter.pause("Connect the board over USB (hold BOOT for a factory-fresh board).");
    }

    let mut probe = UsbStageProbe::new(platform_hook());
    let mut dfu = UsbDfuStage::new(platform_hook());
    let mut app = SerialAppStage::new(platform_hook());

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(format!("Flashing {} board...", args.board));
    pb.enable_steady_tick(Duration::from_millis(100));

    let job = FlashJob {
        board: args.board,
        mode,
        artifacts,
    };
    let outcome = FlashEngine::new(&mut probe, &mut dfu, &mut app).run(&job);
    pb.finish_and_clear();

    match &outcome {
        Ok(FlashOutcome::Flashed) => {
            println!("{} board flashed ({} mode).", args.board, mode)
        }
        Ok(FlashOutcome::AlreadyCurrent) => {
            println!("{} board already runs the target firmware.", args.board)
        }
        Err(_) => {}
    }
    outcome
}

/// Use prebuilt images when both are given, build otherwise
fn resolve_artifacts(args: &DeployArgs, mode: Mode) -> Result<FirmwareArtifacts> {
    match (&args.bootloader, &args.application) {
        (Some(boot), Some(app)) => {
            let artifacts = FirmwareArtifacts::new(boot, app);
            artifacts.validate()?;
            Ok(artifacts)
        }
        _ => {
            let builder = FirmwareBuilder::new()?;
            let built = builder.build(mode)?;
            // A single prebuilt image overrides its built counterpart
            let artifacts = FirmwareArtifacts::new(
                args.bootloader.clone().unwrap_or(built.bootloader),
                args.application.clone().unwrap_or(built.application),
            );
            artifacts.validate()?;
            Ok(artifacts)
        }
    }
}
