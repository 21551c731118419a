//! USB device location and DFU bootloader install for openams
//!
//! Finds target boards by the vid/pid they present in each firmware state
//! and installs the bootloader over the STM32 boot ROM's DFU interface,
//! with an attach hook for hosts (WSL) where devices need forwarding first.

pub mod attach;
pub mod device;
pub mod error;
pub mod locator;
pub mod option_bytes;
pub mod protocol;

pub use attach::{AttachHook, NullAttach, UsbipdAttach};
pub use device::{DfuDevice, EraseMode};
pub use error::{DfuError, Result};
pub use option_bytes::{BootOptionProgrammer, Stm32CubeProgrammer};
pub use locator::{DeviceState, UsbId};
pub use protocol::{DfuStatus, FLASH_BASE, TRANSFER_SIZE};
