//! STM32 option-byte programming
//!
//! Factory-fresh STM32G0 parts ship with nBOOT_SEL=1, which makes the boot
//! ROM ignore the BOOT0 pin. The option byte must be cleared through
//! STM32CubeProgrammer while the part sits in DFU mode, before the first
//! image is written; otherwise the board cannot be forced back into the
//! boot ROM later. A missing programmer installation is fatal rather than
//! skipped.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::attach::UsbipdAttach;
use crate::error::{DfuError, Result};

/// Option-byte arguments for a part connected over USB DFU
const OPTION_ARGS: [&str; 4] = ["-c", "port=USB1", "-ob", "nBOOT_SEL=0"];

/// Windows-side install location, as seen from a WSL guest
const WSL_PROGRAMMER: &str = "/mnt/c/Program Files/STMicroelectronics/STM32Cube/STM32CubeProgrammer/bin/STM32_Programmer_CLI.exe";

/// Puts a board's boot options into the state the two-stage flash expects
pub trait BootOptionProgrammer {
    fn apply(&mut self) -> Result<()>;
}

/// `STM32_Programmer_CLI` wrapper, invoked natively or through the Windows
/// host when running under WSL
pub struct Stm32CubeProgrammer;

impl BootOptionProgrammer for Stm32CubeProgrammer {
    fn apply(&mut self) -> Result<()> {
        let mut command = locate()?;
        log::info!("Setting STM32 option bytes (nBOOT_SEL=0)");
        let output = command
            .output()
            .map_err(|e| DfuError::OptionBytes(format!("failed to run programmer: {}", e)))?;
        if !output.status.success() {
            return Err(DfuError::OptionBytes(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        log::info!("Option bytes set");
        Ok(())
    }
}

/// Build the programmer invocation for this platform
fn locate() -> Result<Command> {
    if UsbipdAttach::is_wsl() {
        if Path::new(WSL_PROGRAMMER).exists() {
            // The Windows binary only understands Windows paths
            let mut cmd = Command::new("powershell.exe");
            cmd.arg("-Command").arg(format!(
                "& '{}' {}",
                windows_path(WSL_PROGRAMMER),
                OPTION_ARGS.join(" ")
            ));
            return Ok(cmd);
        }
        return Err(DfuError::OptionBytes(
            "STM32_Programmer_CLI.exe not found; install STM32CubeProgrammer on the Windows host"
                .into(),
        ));
    }
    match std::env::var_os("PATH").and_then(|p| find_in_path(&p, "STM32_Programmer_CLI")) {
        Some(path) => {
            let mut cmd = Command::new(path);
            cmd.args(OPTION_ARGS);
            Ok(cmd)
        }
        None => Err(DfuError::OptionBytes(
            "STM32_Programmer_CLI not found in PATH; install STM32CubeProgrammer".into(),
        )),
    }
}

/// Translate a /mnt/c mount path into the Windows spelling
fn windows_path(path: &str) -> String {
    path.replacen("/mnt/c/", "C:/", 1).replace('/', "\\")
}

fn find_in_path(path: &OsStr, name: &str) -> Option<PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnt_c_paths_translate_to_windows_spelling() {
        assert_eq!(
            windows_path("/mnt/c/Program Files/STM/bin/STM32_Programmer_CLI.exe"),
            "C:\\Program Files\\STM\\bin\\STM32_Programmer_CLI.exe"
        );
    }

    #[test]
    fn path_search_finds_only_existing_files() {
        let dir = std::env::temp_dir().join(format!("openams-optbytes-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let tool = dir.join("STM32_Programmer_CLI");
        std::fs::write(&tool, b"").unwrap();

        let path = std::env::join_paths([dir.clone()]).unwrap();
        assert_eq!(
            find_in_path(&path, "STM32_Programmer_CLI").as_deref(),
            Some(tool.as_path())
        );
        assert_eq!(find_in_path(&path, "definitely_absent"), None);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
