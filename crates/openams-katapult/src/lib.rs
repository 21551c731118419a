//! Katapult bootloader protocol support for openams
//!
//! Once the Katapult bootloader is on a board (installed via DFU, see
//! `openams-dfu`), the application firmware is uploaded through the
//! bootloader's own framed request/response protocol over its CDC-ACM
//! serial port. This crate implements that client side.

pub mod device;
pub mod error;
pub mod protocol;
pub mod transport;

pub use device::KatapultDevice;
pub use error::{KatapultError, Result};
pub use protocol::ConnectInfo;
pub use transport::serial::SerialTransport;
pub use transport::Transport;
