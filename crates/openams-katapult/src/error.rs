//! Error types for the Katapult protocol client

/// Result type for Katapult operations
pub type Result<T> = std::result::Result<T, KatapultError>;

/// Errors that can occur while talking to a Katapult bootloader
#[derive(Debug, thiserror::Error)]
pub enum KatapultError {
    #[error("failed to open bootloader port: {0}")]
    OpenFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting for bootloader response")]
    Timeout,

    #[error("malformed frame: {0}")]
    BadFrame(String),

    #[error("bootloader rejected command 0x{0:02X}")]
    Nack(u8),

    #[error("response for command 0x{expected:02X} answered 0x{got:02X}")]
    CommandMismatch { expected: u8, got: u8 },

    #[error("frame CRC mismatch: expected 0x{expected:04X}, got 0x{got:04X}")]
    CrcMismatch { expected: u16, got: u16 },

    #[error("block {block} integrity check failed: sent CRC 0x{sent:04X}, device saw 0x{acked:04X}")]
    BlockCrcMismatch { block: u32, sent: u16, acked: u16 },

    #[error("bootloader committed {committed} blocks, expected {sent}")]
    BlockCountMismatch { sent: u32, committed: u32 },

    #[error("unsupported bootloader protocol version {0}")]
    UnsupportedVersion(u32),

    #[error("invalid response payload: {0}")]
    InvalidResponse(String),
}

impl From<serialport::Error> for KatapultError {
    fn from(e: serialport::Error) -> Self {
        KatapultError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for KatapultError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            KatapultError::Timeout
        } else {
            KatapultError::Transport(e.to_string())
        }
    }
}
