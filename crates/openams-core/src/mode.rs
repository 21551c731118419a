//! Firmware mode resolution
//!
//! Precedence: an explicit caller request wins, then a mode already implied
//! by the host configuration, then an interactive prompt. When none of those
//! yields a decision the resolution fails rather than guessing; the daemon
//! must never pick a mode on its own.

use crate::board::{BoardKind, Mode};
use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::prompt::Prompter;

/// Decide which firmware variant a board should receive
pub fn resolve(
    kind: BoardKind,
    explicit: Option<Mode>,
    config: Option<&HostConfig>,
    prompter: &mut dyn Prompter,
) -> Result<Mode> {
    // The mainboard is always a CAN bus member
    if kind == BoardKind::Mainboard {
        if let Some(mode) = explicit {
            if mode != Mode::Canbus {
                log::warn!("mainboard only supports canbus mode, ignoring {}", mode);
            }
        }
        return Ok(Mode::Canbus);
    }

    if let Some(mode) = explicit {
        log::debug!("FPS mode {} requested explicitly", mode);
        return Ok(mode);
    }

    if let Some(mode) = config.and_then(HostConfig::detect_mode) {
        log::info!("Detected {} mode from existing host configuration", mode);
        return Ok(mode);
    }

    match prompter.choose_mode(kind) {
        Some(mode) => Ok(mode),
        None => Err(Error::AmbiguousMode(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::NonInteractive;
    use std::path::Path;

    struct FixedPrompter(Mode);

    impl Prompter for FixedPrompter {
        fn confirm(&mut self, _q: &str) -> Option<bool> {
            Some(true)
        }
        fn choose_mode(&mut self, _kind: BoardKind) -> Option<Mode> {
            Some(self.0)
        }
        fn pause(&mut self, _m: &str) {}
    }

    fn canbus_config() -> HostConfig {
        let dir = std::env::temp_dir().join(format!("openams-mode-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("printer.cfg");
        std::fs::write(&path, "[mcu]\ncanbus_uuid: deadbeef0001\n").unwrap();
        HostConfig::load(&path).unwrap()
    }

    #[test]
    fn explicit_mode_wins() {
        let cfg = canbus_config();
        let mode =
            resolve(BoardKind::Fps, Some(Mode::Bridge), Some(&cfg), &mut NonInteractive).unwrap();
        assert_eq!(mode, Mode::Bridge);
    }

    #[test]
    fn configured_mode_beats_prompt() {
        // A configured canbus mode wins even when a prompt would say bridge
        let cfg = canbus_config();
        let mode =
            resolve(BoardKind::Fps, None, Some(&cfg), &mut FixedPrompter(Mode::Bridge)).unwrap();
        assert_eq!(mode, Mode::Canbus);
    }

    #[test]
    fn prompt_is_the_last_resort() {
        let mode = resolve(BoardKind::Fps, None, None, &mut FixedPrompter(Mode::Bridge)).unwrap();
        assert_eq!(mode, Mode::Bridge);
    }

    #[test]
    fn non_interactive_without_sources_is_ambiguous() {
        let err = resolve(BoardKind::Fps, None, None, &mut NonInteractive).unwrap_err();
        assert!(matches!(err, Error::AmbiguousMode(BoardKind::Fps)));
    }

    #[test]
    fn mainboard_is_always_canbus() {
        let mode =
            resolve(BoardKind::Mainboard, Some(Mode::Bridge), None, &mut NonInteractive).unwrap();
        assert_eq!(mode, Mode::Canbus);
    }

    #[test]
    fn empty_config_does_not_decide() {
        let cfg = HostConfig::empty(Path::new("printer.cfg"));
        let err = resolve(BoardKind::Fps, None, Some(&cfg), &mut NonInteractive).unwrap_err();
        assert!(matches!(err, Error::AmbiguousMode(_)));
    }
}
