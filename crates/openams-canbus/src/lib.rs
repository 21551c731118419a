//! CAN bus node discovery for openams
//!
//! Implements the admin-message query used to enumerate Klipper/Katapult
//! nodes on the bus, over a transport seam with a SocketCAN implementation
//! for real hardware.

pub mod scanner;

pub use scanner::socket::SocketCanTransport;
pub use scanner::{CanScanner, CanTransport};
