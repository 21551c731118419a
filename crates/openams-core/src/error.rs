//! Error taxonomy shared across the provisioning pipeline

use crate::board::BoardKind;
use core::fmt;

/// Which half of the two-stage flash an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStage {
    /// DFU-mode bootloader install
    Bootloader,
    /// Katapult-protocol application upload
    Application,
}

impl fmt::Display for FlashStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootloader => write!(f, "bootloader"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// Errors surfaced by the provisioning pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The expected device was not attached at the time of the check
    #[error("{kind} board not present in {what} state")]
    DeviceNotPresent { kind: BoardKind, what: String },

    /// A bounded wait elapsed without the expected device or reply
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// No mode decision could be made without interactive input
    #[error("cannot decide firmware mode for {0} board without input")]
    AmbiguousMode(BoardKind),

    /// A flash stage failed; the board is left at its pre-stage firmware
    #[error("flashing {board} failed during {stage} stage: {reason}")]
    FlashFailed {
        board: BoardKind,
        stage: FlashStage,
        reason: String,
    },

    /// The host configuration cannot be read or rewritten
    #[error("host configuration unwritable: {0}")]
    ConfigUnwritable(String),

    /// Bus transport failure (not a quiet bus, which is an empty scan)
    #[error("CAN bus error: {0}")]
    Bus(String),

    /// Persisted provisioning state could not be saved
    #[error("state file error: {0}")]
    State(String),

    /// Downstream service control failure
    #[error("service control failed: {0}")]
    Service(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the reconciliation loop may absorb this error and retry
    ///
    /// Transient conditions never escape the daemon as failures; fatal ones
    /// are logged with context and, in one-shot mode, end the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotPresent { .. } | Error::Timeout(_) | Error::Bus(_)
        )
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout("dfu device".into()).is_transient());
        assert!(Error::DeviceNotPresent {
            kind: BoardKind::Fps,
            what: "dfu".into()
        }
        .is_transient());
        assert!(!Error::AmbiguousMode(BoardKind::Fps).is_transient());
        assert!(!Error::ConfigUnwritable("read-only".into()).is_transient());
        assert!(!Error::FlashFailed {
            board: BoardKind::Mainboard,
            stage: FlashStage::Application,
            reason: "nack".into()
        }
        .is_transient());
    }
}
