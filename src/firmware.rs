//! Firmware artifact sourcing
//!
//! Clones or updates the Katapult and Klipper trees, selects the
//! `.config-<component>-<mode>` build configuration matching the target
//! mode, runs `make`, and hands the resulting binaries to the flash
//! pipeline. The builds themselves are black boxes; only their inputs and
//! the expected `out/*.bin` outputs matter here.

use std::path::{Path, PathBuf};
use std::process::Command;

use openams_core::{Error, FirmwareArtifacts, Mode, Result};

const KATAPULT_REPO: &str = "https://github.com/Arksine/katapult";
const KLIPPER_REPO: &str = "https://github.com/Klipper3d/klipper";

/// Builds the bootloader/application image pair for one mode
pub struct FirmwareBuilder {
    katapult_dir: PathBuf,
    klipper_dir: PathBuf,
}

impl FirmwareBuilder {
    /// Checkouts under the invoking user's home directory, matching where
    /// Klipper installs normally live
    pub fn new() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| Error::State("HOME is not set".into()))?;
        Ok(Self {
            katapult_dir: home.join("katapult"),
            klipper_dir: home.join("klipper"),
        })
    }

    pub fn with_dirs(katapult_dir: impl Into<PathBuf>, klipper_dir: impl Into<PathBuf>) -> Self {
        Self {
            katapult_dir: katapult_dir.into(),
            klipper_dir: klipper_dir.into(),
        }
    }

    /// Build both images for the given mode
    pub fn build(&self, mode: Mode) -> Result<FirmwareArtifacts> {
        let bootloader = self.build_component(&self.katapult_dir, KATAPULT_REPO, "katapult", mode)?;
        let application = self.build_component(&self.klipper_dir, KLIPPER_REPO, "klipper", mode)?;
        let artifacts = FirmwareArtifacts::new(bootloader, application);
        artifacts.validate()?;
        Ok(artifacts)
    }

    fn build_component(
        &self,
        dir: &Path,
        repo: &str,
        component: &str,
        mode: Mode,
    ) -> Result<PathBuf> {
        if dir.exists() {
            log::info!("Updating {} checkout at {}", component, dir.display());
            run("git", &["-C", &dir.to_string_lossy(), "pull", "--ff-only"])?;
        } else {
            log::info!("Cloning {} into {}", repo, dir.display());
            run("git", &["clone", repo, &dir.to_string_lossy()])?;
        }

        let config = format!(".config-{}-{}", component, mode.config_suffix());
        if !dir.join(&config).is_file() {
            return Err(Error::State(format!(
                "build configuration {} not found in {}",
                config,
                dir.display()
            )));
        }
        log::info!("Using {} build configuration {}", component, config);
        std::fs::copy(dir.join(&config), dir.join(".config"))?;

        run("make", &["-C", &dir.to_string_lossy()])?;

        let binary = dir.join("out").join(format!("{}.bin", component));
        if !binary.is_file() {
            return Err(Error::State(format!(
                "{} build produced no {}",
                component,
                binary.display()
            )));
        }
        Ok(binary)
    }
}

fn run(program: &str, args: &[&str]) -> Result<()> {
    log::debug!("Running: {} {}", program, args.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| Error::State(format!("failed to run {}: {}", program, e)))?;
    if !status.success() {
        return Err(Error::State(format!(
            "{} {} exited with {}",
            program,
            args.join(" "),
            status
        )));
    }
    Ok(())
}
