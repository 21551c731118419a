//! DFU protocol constants
//!
//! Covers the subset of DFU 1.1 plus the STM32 "DfuSe" extensions needed to
//! install a bootloader: status polling, block download with the DfuSe
//! command phase (set address pointer, erase), and manifestation.

use std::time::Duration;

// DFU class requests
pub const DFU_DETACH: u8 = 0;
pub const DFU_DNLOAD: u8 = 1;
pub const DFU_UPLOAD: u8 = 2;
pub const DFU_GETSTATUS: u8 = 3;
pub const DFU_CLRSTATUS: u8 = 4;
pub const DFU_GETSTATE: u8 = 5;
pub const DFU_ABORT: u8 = 6;

// DFU device states (GETSTATUS bState)
pub const STATE_APP_IDLE: u8 = 0;
pub const STATE_DFU_IDLE: u8 = 2;
pub const STATE_DFU_DNLOAD_SYNC: u8 = 3;
pub const STATE_DFU_DNBUSY: u8 = 4;
pub const STATE_DFU_DNLOAD_IDLE: u8 = 5;
pub const STATE_DFU_MANIFEST_SYNC: u8 = 6;
pub const STATE_DFU_MANIFEST: u8 = 7;
pub const STATE_DFU_ERROR: u8 = 10;

/// bStatus value meaning "no error"
pub const STATUS_OK: u8 = 0;

// DfuSe command-phase opcodes (sent as block 0 of a DNLOAD)
pub const DFUSE_CMD_SET_ADDRESS: u8 = 0x21;
pub const DFUSE_CMD_ERASE: u8 = 0x41;

/// First block number of the data phase; blocks 0 and 1 are reserved for
/// the command phase
pub const DFUSE_DATA_BLOCK_BASE: u16 = 2;

/// Transfer size the STM32 boot ROM accepts
pub const TRANSFER_SIZE: usize = 2048;

/// Base of on-chip flash
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Default per-request timeout
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed GETSTATUS response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuStatus {
    /// bStatus error code
    pub status: u8,
    /// Minimum time to wait before the next request
    pub poll_timeout: Duration,
    /// bState the device is in
    pub state: u8,
}

impl DfuStatus {
    /// Parse the 6-byte GETSTATUS payload
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 6 {
            return None;
        }
        let poll_ms = u32::from_le_bytes([data[1], data[2], data[3], 0]);
        Some(Self {
            status: data[0],
            poll_timeout: Duration::from_millis(poll_ms as u64),
            state: data[4],
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Whether the device has settled after a download request
    pub fn is_idle(&self) -> bool {
        matches!(self.state, STATE_DFU_IDLE | STATE_DFU_DNLOAD_IDLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse() {
        // OK, 25ms poll timeout, dnload-busy
        let status = DfuStatus::parse(&[0, 25, 0, 0, STATE_DFU_DNBUSY, 0]).unwrap();
        assert!(status.is_ok());
        assert!(!status.is_idle());
        assert_eq!(status.poll_timeout, Duration::from_millis(25));
        assert_eq!(status.state, STATE_DFU_DNBUSY);

        assert!(DfuStatus::parse(&[0, 0, 0]).is_none());
    }

    #[test]
    fn three_byte_poll_timeout() {
        let status = DfuStatus::parse(&[0, 0x10, 0x27, 0x00, STATE_DFU_IDLE, 0]).unwrap();
        assert_eq!(status.poll_timeout, Duration::from_millis(10000));
        assert!(status.is_idle());
    }
}
