//! Provisioning state tracked across retries and daemon iterations

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::board::{BoardKind, CanNode};
use crate::error::{Error, Result};

/// Where the reconciliation pipeline currently stands
///
/// Ordered: the pipeline is monotonic non-decreasing except for an explicit
/// node-disappeared regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    AwaitingFps,
    AwaitingMainboard,
    BothPresent,
    ConfigWritten,
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AwaitingFps => write!(f, "awaiting FPS node"),
            Self::AwaitingMainboard => write!(f, "awaiting mainboard node"),
            Self::BothPresent => write!(f, "both nodes present"),
            Self::ConfigWritten => write!(f, "configuration written"),
        }
    }
}

/// State threaded through the reconciliation loop and persisted between
/// daemon iterations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningState {
    pub fps_uuid: Option<String>,
    pub mainboard_uuid: Option<String>,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    #[serde(default)]
    pub config_written: bool,
}

impl ProvisioningState {
    /// Derive the pipeline phase from the recorded identifiers
    pub fn phase(&self) -> Phase {
        match (&self.fps_uuid, &self.mainboard_uuid) {
            (Some(_), Some(_)) if self.config_written => Phase::ConfigWritten,
            (Some(_), Some(_)) => Phase::BothPresent,
            (Some(_), None) => Phase::AwaitingMainboard,
            _ => Phase::AwaitingFps,
        }
    }

    /// Recorded identifier for a board role
    pub fn uuid_for(&self, kind: BoardKind) -> Option<&str> {
        match kind {
            BoardKind::Fps => self.fps_uuid.as_deref(),
            BoardKind::Mainboard => self.mainboard_uuid.as_deref(),
        }
    }

    /// Record a scanned node's identifier if its role slot is still open
    ///
    /// Returns the board kind that was newly recorded, if any. A node whose
    /// identifier is already recorded, or whose kind is unknown, changes
    /// nothing.
    pub fn record_node(&mut self, node: &CanNode) -> Option<BoardKind> {
        let kind = node.kind?;
        let slot = match kind {
            BoardKind::Fps => &mut self.fps_uuid,
            BoardKind::Mainboard => &mut self.mainboard_uuid,
        };
        if slot.is_some() {
            return None;
        }
        *slot = Some(node.uuid.clone());
        Some(kind)
    }

    /// Forget a board's identifier (node disappeared); regresses the phase
    /// and re-arms the config write.
    pub fn forget(&mut self, kind: BoardKind) {
        match kind {
            BoardKind::Fps => self.fps_uuid = None,
            BoardKind::Mainboard => self.mainboard_uuid = None,
        }
        self.config_written = false;
    }

    /// Clear everything, as when assistant setup is re-run
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Load persisted state, tolerating a missing or unreadable file
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Self::default(),
            Ok(text) => match ron::from_str(&text) {
                Ok(state) => state,
                Err(e) => {
                    log::warn!(
                        "Could not parse state file {} ({}), starting fresh",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist state for the next daemon iteration
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::State(format!("{}: {}", parent.display(), e)))?;
        }
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::State(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text).map_err(|e| Error::State(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, path)
            .map_err(|e| Error::State(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}
