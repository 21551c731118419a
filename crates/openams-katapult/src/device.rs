//! Katapult bootloader session
//!
//! Implements the request/response exchange used to upload an application
//! image through an already-installed Katapult bootloader: connect, staged
//! block writes with CRC acknowledgement, end-of-file commit, and the final
//! jump to the application.

use crate::error::{KatapultError, Result};
use crate::protocol::*;
use crate::transport::Transport;

/// Number of CONNECT attempts before giving up
const CONNECT_RETRIES: usize = 5;

/// An open session with a Katapult bootloader
#[derive(Debug)]
pub struct KatapultDevice<T: Transport> {
    transport: T,
    info: ConnectInfo,
}

impl<T: Transport> KatapultDevice<T> {
    /// Connect to the bootloader on the given transport
    ///
    /// Retries the CONNECT exchange a few times; the bootloader may still be
    /// settling right after USB re-enumeration.
    pub fn connect(mut transport: T) -> Result<Self> {
        transport.flush()?;
        let mut last_err = KatapultError::Timeout;
        for attempt in 0..CONNECT_RETRIES {
            match exchange(&mut transport, CMD_CONNECT, &[]) {
                Ok(payload) => {
                    let info = ConnectInfo::parse(&payload).ok_or_else(|| {
                        KatapultError::InvalidResponse("short CONNECT payload".into())
                    })?;
                    if info.proto_version != PROTOCOL_VERSION {
                        return Err(KatapultError::UnsupportedVersion(info.proto_version));
                    }
                    log::info!(
                        "Connected to {} (block size {}, application at 0x{:08X})",
                        info.version,
                        info.block_size,
                        info.start_addr
                    );
                    return Ok(Self { transport, info });
                }
                Err(e) => {
                    log::debug!("CONNECT attempt {} failed: {}", attempt + 1, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Session parameters from the CONNECT handshake
    pub fn info(&self) -> &ConnectInfo {
        &self.info
    }

    /// Bootloader version string, used for the already-current check
    pub fn version(&self) -> &str {
        &self.info.version
    }

    /// Query the board's CAN bus identifier
    pub fn canbus_uuid(&mut self) -> Result<String> {
        let payload = self.command(CMD_GET_CANBUS_UUID, &[])?;
        if payload.len() < 6 {
            return Err(KatapultError::InvalidResponse(format!(
                "uuid payload is {} bytes",
                payload.len()
            )));
        }
        Ok(payload[..6].iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Upload an application image and commit it
    ///
    /// Every block is staged by the bootloader and acknowledged with a CRC
    /// of the data it received; a mismatch aborts before anything is
    /// committed. SEND_EOF commits the staged image and reports the block
    /// count, which must match what was sent.
    pub fn flash_application(&mut self, image: &[u8]) -> Result<u32> {
        let block_size = self.info.block_size as usize;
        let start_addr = self.info.start_addr;
        let mut sent = 0u32;

        for chunk in image.chunks(block_size) {
            let addr = start_addr + sent * self.info.block_size;
            let mut block = chunk.to_vec();
            // Flash erases to 0xFF; pad the trailing partial block with it
            block.resize(block_size, 0xFF);
            self.send_block(sent, addr, &block)?;
            sent += 1;
        }

        let eof = self.command(CMD_SEND_EOF, &[])?;
        if eof.len() < 4 {
            return Err(KatapultError::InvalidResponse("short EOF payload".into()));
        }
        let committed = u32::from_le_bytes(eof[..4].try_into().unwrap());
        if committed != sent {
            return Err(KatapultError::BlockCountMismatch { sent, committed });
        }
        log::info!("Uploaded {} blocks ({} bytes)", sent, image.len());
        Ok(committed)
    }

    /// Read back one flash block, for spot verification
    pub fn request_block(&mut self, addr: u32) -> Result<Vec<u8>> {
        let payload = self.command(CMD_REQUEST_BLOCK, &addr.to_le_bytes())?;
        if payload.len() < 4 {
            return Err(KatapultError::InvalidResponse("short block payload".into()));
        }
        Ok(payload[4..].to_vec())
    }

    /// End the session and jump to the application
    pub fn complete(mut self) -> Result<()> {
        self.command(CMD_COMPLETE, &[])?;
        log::info!("Bootloader jumping to application");
        Ok(())
    }

    fn send_block(&mut self, index: u32, addr: u32, block: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(4 + block.len());
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(block);
        let resp = self.command(CMD_SEND_BLOCK, &payload)?;
        if resp.len() < 6 {
            return Err(KatapultError::InvalidResponse("short block ack".into()));
        }
        let acked = u16::from_be_bytes(resp[4..6].try_into().unwrap());
        let expected = crc16_ccitt(block);
        if acked != expected {
            return Err(KatapultError::BlockCrcMismatch {
                block: index,
                sent: expected,
                acked,
            });
        }
        Ok(())
    }

    fn command(&mut self, cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
        exchange(&mut self.transport, cmd, payload)
    }
}

/// One request/response round trip
fn exchange<T: Transport>(transport: &mut T, cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
    transport.write(&encode_frame(cmd, payload))?;

    let mut head = [0u8; 2];
    transport.read_exact(&mut head)?;
    if head[0] != FRAME_START {
        return Err(KatapultError::BadFrame(format!(
            "bad start byte 0x{:02X}",
            head[0]
        )));
    }
    let len = head[1] as usize;
    if len < 2 {
        return Err(KatapultError::BadFrame(format!("response length {}", len)));
    }

    let mut body = vec![0u8; len];
    transport.read_exact(&mut body)?;
    let mut tail = [0u8; 3];
    transport.read_exact(&mut tail)?;
    if tail[2] != FRAME_TRAILER {
        return Err(KatapultError::BadFrame(format!(
            "bad trailer byte 0x{:02X}",
            tail[2]
        )));
    }

    let got = u16::from_be_bytes([tail[0], tail[1]]);
    let expected = crc16_ccitt(&body);
    if got != expected {
        return Err(KatapultError::CrcMismatch { expected, got });
    }

    let (ack, echoed) = (body[0], body[1]);
    if ack == NACK {
        return Err(KatapultError::Nack(cmd));
    }
    if ack != ACK {
        return Err(KatapultError::BadFrame(format!("ack byte 0x{:02X}", ack)));
    }
    if echoed != cmd {
        return Err(KatapultError::CommandMismatch {
            expected: cmd,
            got: echoed,
        });
    }
    Ok(body[2..].to_vec())
}
