//! Locating target boards on the USB bus
//!
//! Boards are matched by the vendor/product id pairs they present in each
//! bootloader/runtime state. USB re-enumeration after a reset takes a
//! moment, so besides the one-shot check there is a bounded polling wait;
//! the two failure modes are distinct so callers can tell "not plugged in"
//! from "never showed up in time".

use std::time::{Duration, Instant};

use nusb::MaybeFuture;
use openams_core::board::{BoardKind, Mode};
use openams_core::error::{Error, Result};

/// Poll interval for [`wait_for`]
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// USB state a board can be found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// STM32 boot ROM in DFU mode (BOOT jumper set)
    Dfu,
    /// Katapult bootloader running
    Bootloader,
    /// Application firmware running
    Application,
}

impl core::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Dfu => write!(f, "DFU"),
            Self::Bootloader => write!(f, "bootloader"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// A vendor/product id pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vendor: u16,
    pub product: u16,
}

/// STM32 boot ROM in DFU mode
pub const STM32_DFU: UsbId = UsbId {
    vendor: 0x0483,
    product: 0xDF11,
};
/// Katapult bootloader
pub const KATAPULT: UsbId = UsbId {
    vendor: 0x1D50,
    product: 0x6177,
};
/// Klipper application firmware
pub const KLIPPER: UsbId = UsbId {
    vendor: 0x1D50,
    product: 0x614E,
};
/// Klipper USB-to-CAN bridge (FPS in bridge mode)
pub const KLIPPER_BRIDGE: UsbId = UsbId {
    vendor: 0x1D50,
    product: 0x606F,
};

/// Ids a board presents in a given state
pub fn expected_ids(kind: BoardKind, state: DeviceState) -> &'static [UsbId] {
    match (kind, state) {
        (_, DeviceState::Dfu) => &[STM32_DFU],
        (_, DeviceState::Bootloader) => &[KATAPULT],
        (BoardKind::Fps, DeviceState::Application) => &[KLIPPER, KLIPPER_BRIDGE],
        (BoardKind::Mainboard, DeviceState::Application) => &[KLIPPER],
    }
}

/// Whether a concrete vid/pid matches a board in a state
pub fn matches(vendor: u16, product: u16, kind: BoardKind, state: DeviceState) -> bool {
    expected_ids(kind, state)
        .iter()
        .any(|id| id.vendor == vendor && id.product == product)
}

/// Firmware variant an application-state vid/pid advertises
///
/// The bridge build registers a distinct USB-to-CAN gadget id, so the two
/// variants can be told apart without talking to the board.
pub fn application_mode(vendor: u16, product: u16) -> Option<Mode> {
    if vendor == KLIPPER_BRIDGE.vendor && product == KLIPPER_BRIDGE.product {
        Some(Mode::Bridge)
    } else if vendor == KLIPPER.vendor && product == KLIPPER.product {
        Some(Mode::Canbus)
    } else {
        None
    }
}

/// One-shot check: find the board right now or report absence
pub fn find(kind: BoardKind, state: DeviceState) -> Result<nusb::DeviceInfo> {
    let devices = nusb::list_devices()
        .wait()
        .map_err(|e| Error::Bus(format!("USB enumeration failed: {}", e)))?;
    for info in devices {
        if matches(info.vendor_id(), info.product_id(), kind, state) {
            log::debug!(
                "{} board found in {} state at bus {} addr {}",
                kind,
                state,
                info.busnum(),
                info.device_address()
            );
            return Ok(info);
        }
    }
    Err(Error::DeviceNotPresent {
        kind,
        what: state.to_string(),
    })
}

/// Poll for the board until it enumerates or the window closes
///
/// USB re-enumeration after a reset is asynchronous; an empty first scan is
/// normal. Distinguishes a window that elapsed ([`Error::Timeout`]) from a
/// simple not-present-now ([`Error::DeviceNotPresent`]).
pub fn wait_for(
    kind: BoardKind,
    state: DeviceState,
    timeout: Duration,
) -> Result<nusb::DeviceInfo> {
    let deadline = Instant::now() + timeout;
    loop {
        match find(kind, state) {
            Ok(info) => return Ok(info),
            Err(Error::DeviceNotPresent { .. }) => {}
            Err(e) => return Err(e),
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "{} board in {} state",
                kind, state
            )));
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dfu_ids_are_shared_between_boards() {
        assert!(matches(0x0483, 0xDF11, BoardKind::Fps, DeviceState::Dfu));
        assert!(matches(0x0483, 0xDF11, BoardKind::Mainboard, DeviceState::Dfu));
        assert!(!matches(0x0483, 0xDF11, BoardKind::Fps, DeviceState::Application));
    }

    #[test]
    fn bridge_gadget_counts_as_fps_application() {
        assert!(matches(0x1D50, 0x606F, BoardKind::Fps, DeviceState::Application));
        assert!(!matches(
            0x1D50,
            0x606F,
            BoardKind::Mainboard,
            DeviceState::Application
        ));
    }

    #[test]
    fn application_ids_reveal_the_firmware_variant() {
        assert_eq!(application_mode(0x1D50, 0x606F), Some(Mode::Bridge));
        assert_eq!(application_mode(0x1D50, 0x614E), Some(Mode::Canbus));
        assert_eq!(application_mode(0x0483, 0xDF11), None);
    }

    #[test]
    fn unknown_ids_never_match() {
        for state in [DeviceState::Dfu, DeviceState::Bootloader, DeviceState::Application] {
            assert!(!matches(0xFFFF, 0x0001, BoardKind::Fps, state));
        }
    }
}
