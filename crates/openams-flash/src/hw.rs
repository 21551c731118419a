//! Hardware-backed stage implementations
//!
//! Wires the pipeline seams to real transports: USB enumeration for the
//! probe, the STM32 DFU interface for stage 1, and the Katapult CDC-ACM
//! serial port for stage 2. The attach hook runs before every enumeration
//! so boards forwarded through usbipd reappear after each re-enumeration.

use std::time::Duration;

use openams_core::board::{BoardKind, FirmwareStage, Mode};
use openams_core::error::{Error, Result};
use openams_dfu::locator::{self, DeviceState};
use openams_dfu::{
    AttachHook, BootOptionProgrammer, DfuDevice, EraseMode, NullAttach, Stm32CubeProgrammer,
    UsbipdAttach, FLASH_BASE,
};
use openams_katapult::{KatapultDevice, SerialTransport};

use crate::engine::{AppStage, DetectedFirmware, DfuStage, StageProbe};

/// How long to wait for a board to re-enumerate after a reset
const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request serial timeout for the bootloader link
const SERIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Pick the attach hook matching the host platform
pub fn platform_hook() -> Box<dyn AttachHook> {
    if UsbipdAttach::is_wsl() {
        log::debug!("WSL detected, using usbipd attach hook");
        Box::new(UsbipdAttach)
    } else {
        Box::new(NullAttach)
    }
}

/// Run the attach hook for every id a board may present in a state
fn attach_ids(hook: &mut dyn AttachHook, board: BoardKind, state: DeviceState) -> Result<()> {
    for id in locator::expected_ids(board, state) {
        hook.attach(id.vendor, id.product)
            .map_err(|e| Error::Bus(e.to_string()))?;
    }
    Ok(())
}

/// Probe backed by USB enumeration
///
/// Checks the states from most to least advanced so a board that presents
/// both (it cannot) or transitions mid-probe resolves to the higher stage.
pub struct UsbStageProbe {
    attach: Box<dyn AttachHook>,
}

impl UsbStageProbe {
    pub fn new(attach: Box<dyn AttachHook>) -> Self {
        Self { attach }
    }
}

impl StageProbe for UsbStageProbe {
    fn probe(&mut self, board: BoardKind) -> Result<DetectedFirmware> {
        for (state, stage) in [
            (DeviceState::Application, FirmwareStage::Application),
            (DeviceState::Bootloader, FirmwareStage::Bootloader),
            (DeviceState::Dfu, FirmwareStage::None),
        ] {
            attach_ids(self.attach.as_mut(), board, state)?;
            match locator::find(board, state) {
                Ok(info) => {
                    // The application's USB id reveals which variant runs
                    let mode = if stage == FirmwareStage::Application {
                        locator::application_mode(info.vendor_id(), info.product_id())
                    } else {
                        None
                    };
                    return Ok(DetectedFirmware { stage, mode });
                }
                Err(Error::DeviceNotPresent { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::DeviceNotPresent {
            kind: board,
            what: "any".into(),
        })
    }
}

/// Stage 1 over the STM32 boot ROM
pub struct UsbDfuStage {
    attach: Box<dyn AttachHook>,
    programmer: Box<dyn BootOptionProgrammer>,
}

impl UsbDfuStage {
    pub fn new(attach: Box<dyn AttachHook>) -> Self {
        Self::with_programmer(attach, Box::new(Stm32CubeProgrammer))
    }

    pub fn with_programmer(
        attach: Box<dyn AttachHook>,
        programmer: Box<dyn BootOptionProgrammer>,
    ) -> Self {
        Self { attach, programmer }
    }
}

impl DfuStage for UsbDfuStage {
    fn install_bootloader(&mut self, board: BoardKind, image: &[u8]) -> Result<()> {
        attach_ids(self.attach.as_mut(), board, DeviceState::Dfu)?;
        locator::wait_for(board, DeviceState::Dfu, ENUMERATION_TIMEOUT)?;

        // Boot options are set while the part sits in DFU mode; the
        // programmer disconnects it, so wait for it to come back
        self.programmer
            .apply()
            .map_err(|e| Error::Bus(e.to_string()))?;
        attach_ids(self.attach.as_mut(), board, DeviceState::Dfu)?;
        let info = locator::wait_for(board, DeviceState::Dfu, ENUMERATION_TIMEOUT)?;

        let mut device =
            DfuDevice::open(&info).map_err(|e| Error::Bus(e.to_string()))?;
        device
            .download(FLASH_BASE, image, EraseMode::Mass, |done, total| {
                log::debug!("bootloader install: {}/{} bytes", done, total);
            })
            .map_err(|e| Error::Bus(e.to_string()))?;

        // The install counts once the bootloader is back on the bus
        attach_ids(self.attach.as_mut(), board, DeviceState::Bootloader)?;
        locator::wait_for(board, DeviceState::Bootloader, ENUMERATION_TIMEOUT)?;
        Ok(())
    }
}

/// Stage 2 over the Katapult serial port
pub struct SerialAppStage {
    attach: Box<dyn AttachHook>,
}

impl SerialAppStage {
    pub fn new(attach: Box<dyn AttachHook>) -> Self {
        Self { attach }
    }

    /// Find the CDC-ACM port the bootloader registered
    fn bootloader_port(&mut self, board: BoardKind) -> Result<String> {
        attach_ids(self.attach.as_mut(), board, DeviceState::Bootloader)?;
        locator::wait_for(board, DeviceState::Bootloader, ENUMERATION_TIMEOUT)?;

        let ports = serialport::available_ports()
            .map_err(|e| Error::Bus(format!("serial enumeration failed: {}", e)))?;
        for port in ports {
            if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                if locator::matches(usb.vid, usb.pid, board, DeviceState::Bootloader) {
                    log::debug!("Bootloader port for {} board: {}", board, port.port_name);
                    return Ok(port.port_name);
                }
            }
        }
        Err(Error::DeviceNotPresent {
            kind: board,
            what: "bootloader serial port".into(),
        })
    }
}

impl AppStage for SerialAppStage {
    fn flash_application(&mut self, board: BoardKind, mode: Mode, image: &[u8]) -> Result<()> {
        log::info!(
            "Uploading {} mode application to {} board ({} bytes)",
            mode,
            board,
            image.len()
        );
        let path = self.bootloader_port(board)?;

        let transport = SerialTransport::open(&path, SERIAL_TIMEOUT)
            .map_err(|e| Error::Bus(e.to_string()))?;
        let mut device =
            KatapultDevice::connect(transport).map_err(|e| Error::Bus(e.to_string()))?;
        device
            .flash_application(image)
            .map_err(|e| Error::Bus(e.to_string()))?;
        device.complete().map_err(|e| Error::Bus(e.to_string()))?;

        // Only bridge-mode firmware comes back on USB; a CAN-mode build is
        // verified later by the bus scan instead
        if mode == Mode::Bridge {
            attach_ids(self.attach.as_mut(), board, DeviceState::Application)?;
            locator::wait_for(board, DeviceState::Application, ENUMERATION_TIMEOUT)?;
        }
        Ok(())
    }
}
