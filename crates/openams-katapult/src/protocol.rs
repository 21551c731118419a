//! Katapult bootloader protocol constants and framing
//!
//! Requests and responses travel in small framed packets:
//!
//! ```text
//! <0x01> <len> <cmd> <payload ...> <crc16 hi> <crc16 lo> <0x03>
//! ```
//!
//! `len` counts the command byte plus payload. The CRC (CCITT, poly 0x1021,
//! init 0xFFFF) covers the command byte and payload. Responses echo the
//! command and prepend an acknowledgement byte.

/// Frame start byte
pub const FRAME_START: u8 = 0x01;
/// Frame trailer byte
pub const FRAME_TRAILER: u8 = 0x03;

/// Positive acknowledgement
pub const ACK: u8 = 0xA0;
/// Negative acknowledgement
pub const NACK: u8 = 0xF1;

// Command opcodes
/// Open a session; response carries protocol version, application start
/// address, block size and the bootloader version string
pub const CMD_CONNECT: u8 = 0x11;
/// Upload one flash block (staged by the bootloader, acknowledged with a
/// CRC of the received data)
pub const CMD_SEND_BLOCK: u8 = 0x12;
/// End of image; response carries the total number of blocks committed
pub const CMD_SEND_EOF: u8 = 0x13;
/// Read back one flash block for verification
pub const CMD_REQUEST_BLOCK: u8 = 0x14;
/// Finish the session and jump to the application
pub const CMD_COMPLETE: u8 = 0x15;
/// Query the board's CAN bus identifier
pub const CMD_GET_CANBUS_UUID: u8 = 0x16;

/// Protocol version this client speaks
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest payload a frame can carry (len is a single byte)
pub const MAX_PAYLOAD: usize = 0xFF - 1;

/// Session parameters learned from the CONNECT response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Protocol version spoken by the bootloader
    pub proto_version: u32,
    /// Flash address the application image starts at
    pub start_addr: u32,
    /// Flash block size the bootloader stages writes in
    pub block_size: u32,
    /// Bootloader version string, e.g. `katapult-v0.0.5-bridge`
    pub version: String,
}

impl ConnectInfo {
    /// Parse the CONNECT response payload
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 12 {
            return None;
        }
        let proto_version = u32::from_le_bytes(payload[0..4].try_into().ok()?);
        let start_addr = u32::from_le_bytes(payload[4..8].try_into().ok()?);
        let block_size = u32::from_le_bytes(payload[8..12].try_into().ok()?);
        let version_bytes = &payload[12..];
        let end = version_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(version_bytes.len());
        let version = String::from_utf8_lossy(&version_bytes[..end]).into_owned();
        Some(Self {
            proto_version,
            start_addr,
            block_size,
            version,
        })
    }
}

/// CRC16-CCITT (poly 0x1021, init 0xFFFF, MSB first)
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Encode a request frame
pub fn encode_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD);
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(FRAME_START);
    frame.push((payload.len() + 1) as u8);
    frame.push(cmd);
    frame.extend_from_slice(payload);
    let crc = crc16_ccitt(&frame[2..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.push(FRAME_TRAILER);
    frame
}
