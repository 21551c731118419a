//! Transport abstraction for the bootloader link
//!
//! Katapult answers on a USB CDC-ACM serial port; tests drive the protocol
//! against an in-memory transport instead.

use crate::error::{KatapultError, Result};

/// Byte transport the framed protocol runs over
pub trait Transport {
    /// Write all bytes
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `buf.len()` bytes, failing on timeout
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Discard anything pending in both directions
    fn flush(&mut self) -> Result<()>;
}

pub mod serial {
    //! Serial port transport

    use super::*;
    use serialport::SerialPort;
    use std::io::{Read, Write};
    use std::time::Duration;

    /// CDC-ACM transport to a Katapult bootloader
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open the bootloader's serial port
        ///
        /// The baud rate is nominal; CDC-ACM ignores it.
        pub fn open(device: &str, timeout: Duration) -> Result<Self> {
            let port = serialport::new(device, 250_000)
                .timeout(timeout)
                .open()
                .map_err(|e| KatapultError::OpenFailed(format!("{}: {}", device, e)))?;
            log::debug!("Opened bootloader port {}", device);
            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            Ok(())
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
            self.port.read_exact(buf)?;
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.port.flush()?;
            let _ = self.port.clear(serialport::ClearBuffer::All);
            Ok(())
        }
    }
}

#[cfg(test)]
pub mod mock {
    //! Scripted in-memory transport for protocol tests

    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    pub struct MockTransport {
        /// Bytes the "device" will answer with, in order
        pub rx: VecDeque<u8>,
        /// Everything the client wrote
        pub tx: Vec<u8>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a device response
        pub fn push_response(&mut self, bytes: &[u8]) {
            self.rx.extend(bytes.iter().copied());
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.tx.extend_from_slice(data);
            Ok(())
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
            for slot in buf.iter_mut() {
                *slot = self.rx.pop_front().ok_or(KatapultError::Timeout)?;
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }
}
