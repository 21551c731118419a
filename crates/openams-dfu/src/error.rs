//! Error types for DFU operations

/// Result type for DFU operations
pub type Result<T> = std::result::Result<T, DfuError>;

/// Errors that can occur while driving a device in DFU mode
#[derive(Debug, thiserror::Error)]
pub enum DfuError {
    #[error("failed to open DFU device: {0}")]
    OpenFailed(String),

    #[error("failed to claim DFU interface: {0}")]
    ClaimFailed(String),

    #[error("USB transfer failed: {0}")]
    TransferFailed(String),

    #[error("invalid response from device: {0}")]
    InvalidResponse(String),

    #[error("device reported DFU error status 0x{status:02X} in state 0x{state:02X}")]
    ErrorStatus { status: u8, state: u8 },

    #[error("timed out waiting for DFU operation to finish")]
    Timeout,

    #[error("USB attach hook failed: {0}")]
    Attach(String),

    #[error("option byte programming failed: {0}")]
    OptionBytes(String),
}
