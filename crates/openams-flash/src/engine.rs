//! Two-stage flash pipeline
//!
//! Runs one [`FlashJob`] to completion: probe the board's current firmware
//! stage, install the bootloader over DFU if it is missing, then upload the
//! application through the bootloader protocol. Each stage commits fully or
//! not at all; a stage-2 failure leaves the board at `Bootloader`, never in
//! between.

use openams_core::artifacts::FirmwareArtifacts;
use openams_core::board::{BoardKind, FirmwareStage, Mode};
use openams_core::error::{Error, FlashStage, Result};

/// One flash request, consumed by [`FlashEngine::run`]
#[derive(Debug, Clone)]
pub struct FlashJob {
    pub board: BoardKind,
    pub mode: Mode,
    pub artifacts: FirmwareArtifacts,
}

/// What the pipeline did for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOutcome {
    /// Both stages are in place; at least one image was written
    Flashed,
    /// The board already runs the target firmware; nothing was written
    AlreadyCurrent,
}

/// What a probe observed on a board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedFirmware {
    pub stage: FirmwareStage,
    /// Variant the running application advertises, when it can be told apart
    pub mode: Option<Mode>,
}

/// Determines which firmware a board currently presents
pub trait StageProbe {
    fn probe(&mut self, board: BoardKind) -> Result<DetectedFirmware>;
}

/// Stage 1: bootloader install over the boot ROM's DFU interface
pub trait DfuStage {
    fn install_bootloader(&mut self, board: BoardKind, image: &[u8]) -> Result<()>;
}

/// Stage 2: application upload through the installed bootloader
pub trait AppStage {
    fn flash_application(&mut self, board: BoardKind, mode: Mode, image: &[u8]) -> Result<()>;
}

/// Orchestrates one job across the stage seams
pub struct FlashEngine<'a> {
    probe: &'a mut dyn StageProbe,
    dfu: &'a mut dyn DfuStage,
    app: &'a mut dyn AppStage,
}

impl<'a> FlashEngine<'a> {
    pub fn new(
        probe: &'a mut dyn StageProbe,
        dfu: &'a mut dyn DfuStage,
        app: &'a mut dyn AppStage,
    ) -> Self {
        Self { probe, dfu, app }
    }

    /// Run the job to its terminal outcome
    pub fn run(&mut self, job: &FlashJob) -> Result<FlashOutcome> {
        let detected = self.probe.probe(job.board)?;
        log::info!("{} board is at {} firmware stage", job.board, detected.stage);

        if detected.stage == FirmwareStage::Application {
            // Current only when the running variant provably matches the
            // target; an unidentifiable variant is re-flashed
            if detected.mode == Some(job.mode) {
                log::info!("{} board already runs the target firmware", job.board);
                return Ok(FlashOutcome::AlreadyCurrent);
            }
            match detected.mode {
                Some(running) => log::warn!(
                    "{} board runs {} mode firmware, target is {} mode",
                    job.board,
                    running,
                    job.mode
                ),
                None => log::warn!(
                    "{} board runs an application of unknown variant",
                    job.board
                ),
            }
        }

        // Fail on missing images before any device is touched
        job.artifacts.validate()?;

        if detected.stage == FirmwareStage::None {
            self.install_bootloader(job)?;
        } else {
            log::info!("Bootloader already present, skipping install");
        }

        self.flash_application(job)?;
        Ok(FlashOutcome::Flashed)
    }

    fn install_bootloader(&mut self, job: &FlashJob) -> Result<()> {
        let image = FirmwareArtifacts::read_image(&job.artifacts.bootloader)?;
        self.dfu
            .install_bootloader(job.board, &image)
            .map_err(|e| stage_error(job.board, FlashStage::Bootloader, e))?;

        // The install only counts once the bootloader enumerates
        let now = self
            .probe
            .probe(job.board)
            .map_err(|e| stage_error(job.board, FlashStage::Bootloader, e))?;
        if now.stage < FirmwareStage::Bootloader {
            return Err(Error::FlashFailed {
                board: job.board,
                stage: FlashStage::Bootloader,
                reason: "bootloader did not enumerate after install".into(),
            });
        }
        Ok(())
    }

    fn flash_application(&mut self, job: &FlashJob) -> Result<()> {
        let image = FirmwareArtifacts::read_image(&job.artifacts.application)?;
        self.app
            .flash_application(job.board, job.mode, &image)
            .map_err(|e| stage_error(job.board, FlashStage::Application, e))
    }
}

/// Wrap a stage failure, preserving an already-classified one
fn stage_error(board: BoardKind, stage: FlashStage, err: Error) -> Error {
    match err {
        Error::FlashFailed { .. } => err,
        other => Error::FlashFailed {
            board,
            stage,
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct ScriptedProbe {
        reports: Vec<DetectedFirmware>,
        calls: usize,
    }

    impl ScriptedProbe {
        fn new(reports: Vec<DetectedFirmware>) -> Self {
            Self { reports, calls: 0 }
        }
    }

    impl StageProbe for ScriptedProbe {
        fn probe(&mut self, _board: BoardKind) -> Result<DetectedFirmware> {
            let report = self.reports[self.calls.min(self.reports.len() - 1)];
            self.calls += 1;
            Ok(report)
        }
    }

    fn at(stage: FirmwareStage) -> DetectedFirmware {
        DetectedFirmware { stage, mode: None }
    }

    fn running(mode: Mode) -> DetectedFirmware {
        DetectedFirmware {
            stage: FirmwareStage::Application,
            mode: Some(mode),
        }
    }

    #[derive(Default)]
    struct RecordingDfu {
        installs: Vec<usize>,
        fail: bool,
    }

    impl DfuStage for RecordingDfu {
        fn install_bootloader(&mut self, board: BoardKind, image: &[u8]) -> Result<()> {
            if self.fail {
                return Err(Error::Timeout(format!("{} dfu device", board)));
            }
            self.installs.push(image.len());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingApp {
        uploads: Vec<(Mode, usize)>,
        fail: bool,
    }

    impl AppStage for RecordingApp {
        fn flash_application(&mut self, _board: BoardKind, mode: Mode, image: &[u8]) -> Result<()> {
            if self.fail {
                return Err(Error::Bus("nack on block 3".into()));
            }
            self.uploads.push((mode, image.len()));
            Ok(())
        }
    }

    fn artifacts(tag: &str) -> FirmwareArtifacts {
        let dir = std::env::temp_dir().join(format!(
            "openams-flashjob-{}-{}",
            tag,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let boot = dir.join("katapult.bin");
        let app = dir.join("klipper.bin");
        std::fs::File::create(&boot)
            .unwrap()
            .write_all(&[0xAA; 64])
            .unwrap();
        std::fs::File::create(&app)
            .unwrap()
            .write_all(&[0xBB; 128])
            .unwrap();
        FirmwareArtifacts::new(boot, app)
    }

    fn job(artifacts: FirmwareArtifacts) -> FlashJob {
        FlashJob {
            board: BoardKind::Fps,
            mode: Mode::Canbus,
            artifacts,
        }
    }

    #[test]
    fn blank_board_runs_both_stages() {
        let artifacts = artifacts("both");
        let mut probe =
            ScriptedProbe::new(vec![at(FirmwareStage::None), at(FirmwareStage::Bootloader)]);
        let mut dfu = RecordingDfu::default();
        let mut app = RecordingApp::default();

        let outcome = FlashEngine::new(&mut probe, &mut dfu, &mut app)
            .run(&job(artifacts))
            .unwrap();

        assert_eq!(outcome, FlashOutcome::Flashed);
        assert_eq!(dfu.installs, vec![64]);
        assert_eq!(app.uploads, vec![(Mode::Canbus, 128)]);
    }

    #[test]
    fn bootloader_present_skips_stage_one() {
        let artifacts = artifacts("skip1");
        let mut probe = ScriptedProbe::new(vec![at(FirmwareStage::Bootloader)]);
        let mut dfu = RecordingDfu::default();
        let mut app = RecordingApp::default();

        let outcome = FlashEngine::new(&mut probe, &mut dfu, &mut app)
            .run(&job(artifacts))
            .unwrap();

        assert_eq!(outcome, FlashOutcome::Flashed);
        assert!(dfu.installs.is_empty());
        assert_eq!(app.uploads.len(), 1);
    }

    #[test]
    fn current_firmware_writes_nothing() {
        let artifacts = artifacts("current");
        let mut probe = ScriptedProbe::new(vec![running(Mode::Canbus)]);
        let mut dfu = RecordingDfu::default();
        let mut app = RecordingApp::default();

        let outcome = FlashEngine::new(&mut probe, &mut dfu, &mut app)
            .run(&job(artifacts))
            .unwrap();

        assert_eq!(outcome, FlashOutcome::AlreadyCurrent);
        assert!(dfu.installs.is_empty());
        assert!(app.uploads.is_empty());
    }

    #[test]
    fn wrong_mode_application_is_not_current() {
        let artifacts = artifacts("wrongmode");
        // Board runs the bridge build while the job asks for the CAN build
        let mut probe = ScriptedProbe::new(vec![running(Mode::Bridge)]);
        let mut dfu = RecordingDfu::default();
        let mut app = RecordingApp::default();

        let outcome = FlashEngine::new(&mut probe, &mut dfu, &mut app)
            .run(&job(artifacts))
            .unwrap();

        assert_eq!(outcome, FlashOutcome::Flashed);
        // Bootloader is already underneath the application; only stage 2 runs
        assert!(dfu.installs.is_empty());
        assert_eq!(app.uploads, vec![(Mode::Canbus, 128)]);
    }

    #[test]
    fn unidentifiable_application_mode_reflashes() {
        let artifacts = artifacts("unknownmode");
        let mut probe = ScriptedProbe::new(vec![at(FirmwareStage::Application)]);
        let mut dfu = RecordingDfu::default();
        let mut app = RecordingApp::default();

        let outcome = FlashEngine::new(&mut probe, &mut dfu, &mut app)
            .run(&job(artifacts))
            .unwrap();

        assert_eq!(outcome, FlashOutcome::Flashed);
        assert!(dfu.installs.is_empty());
        assert_eq!(app.uploads.len(), 1);
    }

    #[test]
    fn stage_two_failure_reports_application_stage() {
        let artifacts = artifacts("stage2fail");
        let mut probe = ScriptedProbe::new(vec![at(FirmwareStage::Bootloader)]);
        let mut dfu = RecordingDfu::default();
        let mut app = RecordingApp {
            fail: true,
            ..Default::default()
        };

        let err = FlashEngine::new(&mut probe, &mut dfu, &mut app)
            .run(&job(artifacts))
            .unwrap_err();

        match err {
            Error::FlashFailed { stage, .. } => assert_eq!(stage, FlashStage::Application),
            other => panic!("unexpected error: {other}"),
        }
        // Stage 1 was never re-run; the board stays at its bootloader
        assert!(dfu.installs.is_empty());
    }

    #[test]
    fn stage_one_failure_never_reaches_stage_two() {
        let artifacts = artifacts("stage1fail");
        let mut probe = ScriptedProbe::new(vec![at(FirmwareStage::None)]);
        let mut dfu = RecordingDfu {
            fail: true,
            ..Default::default()
        };
        let mut app = RecordingApp::default();

        let err = FlashEngine::new(&mut probe, &mut dfu, &mut app)
            .run(&job(artifacts))
            .unwrap_err();

        match err {
            Error::FlashFailed { stage, .. } => assert_eq!(stage, FlashStage::Bootloader),
            other => panic!("unexpected error: {other}"),
        }
        assert!(app.uploads.is_empty());
    }

    #[test]
    fn install_that_does_not_enumerate_is_a_bootloader_failure() {
        let artifacts = artifacts("noenum");
        // Re-probe after the install still reports a blank board
        let mut probe = ScriptedProbe::new(vec![at(FirmwareStage::None), at(FirmwareStage::None)]);
        let mut dfu = RecordingDfu::default();
        let mut app = RecordingApp::default();

        let err = FlashEngine::new(&mut probe, &mut dfu, &mut app)
            .run(&job(artifacts))
            .unwrap_err();

        match err {
            Error::FlashFailed { stage, .. } => assert_eq!(stage, FlashStage::Bootloader),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(dfu.installs.len(), 1);
        assert!(app.uploads.is_empty());
    }

    #[test]
    fn missing_artifacts_fail_before_any_stage() {
        let mut probe = ScriptedProbe::new(vec![at(FirmwareStage::None)]);
        let mut dfu = RecordingDfu::default();
        let mut app = RecordingApp::default();

        let job = job(FirmwareArtifacts::new(
            "/nonexistent/katapult.bin",
            "/nonexistent/klipper.bin",
        ));
        let err = FlashEngine::new(&mut probe, &mut dfu, &mut app)
            .run(&job)
            .unwrap_err();

        assert!(matches!(err, Error::State(_)));
        assert!(dfu.installs.is_empty());
        assert!(app.uploads.is_empty());
    }
}
