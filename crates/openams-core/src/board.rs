//! Board identities and firmware variants

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two boards this tool provisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardKind {
    /// Filament pressure sensor board
    Fps,
    /// OpenAMS mainboard
    Mainboard,
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fps => write!(f, "FPS"),
            Self::Mainboard => write!(f, "mainboard"),
        }
    }
}

impl FromStr for BoardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fps" => Ok(Self::Fps),
            "openams" | "mainboard" | "oams" => Ok(Self::Mainboard),
            other => Err(format!("unknown board: {}", other)),
        }
    }
}

/// Which firmware is currently on a board
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FirmwareStage {
    /// Blank or unknown flash contents
    None,
    /// Katapult bootloader installed
    Bootloader,
    /// Application firmware installed and running
    Application,
}

impl fmt::Display for FirmwareStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Bootloader => write!(f, "bootloader"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// Application firmware variant
///
/// Only the FPS board has a real choice here; the mainboard is always a
/// CAN bus member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Direct USB-to-CAN bridge
    Bridge,
    /// Plain CAN bus node
    Canbus,
}

impl Mode {
    /// Configuration suffix used by the firmware build trees
    /// (`.config-katapult-bridge` etc.)
    pub fn config_suffix(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::Canbus => "canbus",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridge => write!(f, "bridge"),
            Self::Canbus => write!(f, "canbus"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bridge" => Ok(Self::Bridge),
            "canbus" => Ok(Self::Canbus),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// A node that answered a bus scan
///
/// Rebuilt from scratch on every scan; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanNode {
    /// Opaque bus identifier, lowercase hex
    pub uuid: String,
    /// Board kind inferred from the node's advertised role, if any
    pub kind: Option<BoardKind>,
}

impl CanNode {
    pub fn new(uuid: impl Into<String>, kind: Option<BoardKind>) -> Self {
        Self {
            uuid: uuid.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_kind_parses_aliases() {
        assert_eq!("fps".parse::<BoardKind>().unwrap(), BoardKind::Fps);
        assert_eq!("openams".parse::<BoardKind>().unwrap(), BoardKind::Mainboard);
        assert_eq!("oams".parse::<BoardKind>().unwrap(), BoardKind::Mainboard);
        assert!("toolhead".parse::<BoardKind>().is_err());
    }

    #[test]
    fn firmware_stage_ordering() {
        assert!(FirmwareStage::None < FirmwareStage::Bootloader);
        assert!(FirmwareStage::Bootloader < FirmwareStage::Application);
    }
}
