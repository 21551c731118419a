//! DFU device implementation
//!
//! Drives an STM32 boot ROM over its DFU interface: status polling, the
//! DfuSe command phase (address pointer, erase) and the block download
//! data phase, followed by manifestation to start the new firmware.

use std::time::{Duration, Instant};

use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient};
use nusb::{DeviceInfo, Interface, MaybeFuture};

use crate::error::{DfuError, Result};
use crate::protocol::*;

/// Upper bound on one erase-or-program step. Mass erase of a full part can
/// take tens of seconds on the slower STM32 lines.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// How flash is prepared before a download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseMode {
    /// Erase the whole part with a single DfuSe mass-erase command
    Mass,
    /// Erase only the pages the image will occupy
    Pages { page_size: u32 },
}

/// A connection to a device in DFU mode
pub struct DfuDevice {
    interface: Interface,
}

impl DfuDevice {
    /// Open the DFU interface of an enumerated device
    pub fn open(info: &DeviceInfo) -> Result<Self> {
        log::info!(
            "Opening DFU device at bus {} address {}",
            info.busnum(),
            info.device_address()
        );

        let device = info
            .open()
            .wait()
            .map_err(|e| DfuError::OpenFailed(e.to_string()))?;

        let interface = device
            .claim_interface(0)
            .wait()
            .map_err(|e| DfuError::ClaimFailed(e.to_string()))?;

        let mut dfu = Self { interface };
        dfu.recover_idle()?;
        Ok(dfu)
    }

    /// Write an image to flash starting at `address`
    ///
    /// Erases per `erase`, downloads in [`TRANSFER_SIZE`] blocks, then
    /// manifests so the device resets into the new firmware. `progress` is
    /// called with (bytes written, total bytes) after every block.
    pub fn download(
        &mut self,
        address: u32,
        image: &[u8],
        erase: EraseMode,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<()> {
        match erase {
            EraseMode::Mass => self.mass_erase()?,
            EraseMode::Pages { page_size } => {
                let mut addr = address;
                let end = address + image.len() as u32;
                while addr < end {
                    self.erase_page(addr)?;
                    addr += page_size;
                }
            }
        }

        self.set_address(address)?;

        log::info!(
            "Downloading {} bytes to 0x{:08X}",
            image.len(),
            address
        );
        for (i, chunk) in image.chunks(TRANSFER_SIZE).enumerate() {
            let block = DFUSE_DATA_BLOCK_BASE + i as u16;
            self.dnload(block, chunk)?;
            self.wait_idle()?;
            progress(((i * TRANSFER_SIZE) + chunk.len()).min(image.len()), image.len());
        }

        self.manifest(address)
    }

    /// Poll GETSTATUS once
    pub fn status(&mut self) -> Result<DfuStatus> {
        let data = self.control_in(DFU_GETSTATUS, 0, 6)?;
        DfuStatus::parse(&data)
            .ok_or_else(|| DfuError::InvalidResponse(format!("short GETSTATUS ({} bytes)", data.len())))
    }

    /// Clear an error status and return the device to dfuIDLE
    pub fn clear_status(&mut self) -> Result<()> {
        self.control_out(DFU_CLRSTATUS, 0, &[])
    }

    /// Abort an in-progress transfer and return the device to dfuIDLE
    pub fn abort(&mut self) -> Result<()> {
        self.control_out(DFU_ABORT, 0, &[])
    }

    /// DfuSe mass erase. Slow; waits for the device to go idle again.
    pub fn mass_erase(&mut self) -> Result<()> {
        log::info!("Mass-erasing flash");
        self.dnload(0, &[DFUSE_CMD_ERASE])?;
        self.wait_idle()
    }

    /// DfuSe page erase at `address`
    pub fn erase_page(&mut self, address: u32) -> Result<()> {
        log::debug!("Erasing page at 0x{:08X}", address);
        let mut cmd = [0u8; 5];
        cmd[0] = DFUSE_CMD_ERASE;
        cmd[1..5].copy_from_slice(&address.to_le_bytes());
        self.dnload(0, &cmd)?;
        self.wait_idle()
    }

    /// DfuSe set address pointer
    pub fn set_address(&mut self, address: u32) -> Result<()> {
        log::debug!("Setting address pointer to 0x{:08X}", address);
        let mut cmd = [0u8; 5];
        cmd[0] = DFUSE_CMD_SET_ADDRESS;
        cmd[1..5].copy_from_slice(&address.to_le_bytes());
        self.dnload(0, &cmd)?;
        self.wait_idle()
    }

    /// Leave DFU mode and start the firmware at `address`
    ///
    /// The zero-length download triggers manifestation; the boot ROM drops
    /// off the bus without completing the final status poll, so transfer
    /// errors past that point are expected and swallowed.
    fn manifest(&mut self, address: u32) -> Result<()> {
        self.set_address(address)?;
        self.dnload(DFUSE_DATA_BLOCK_BASE, &[])?;

        match self.status() {
            Ok(status) if status.is_ok() => {
                log::info!("Manifestation acknowledged, device resetting");
                Ok(())
            }
            Ok(status) => Err(DfuError::ErrorStatus {
                status: status.status,
                state: status.state,
            }),
            Err(_) => {
                log::debug!("Device detached during manifestation");
                Ok(())
            }
        }
    }

    /// Bring the device to dfuIDLE from whatever state it was left in
    fn recover_idle(&mut self) -> Result<()> {
        let status = self.status()?;
        if status.state == STATE_DFU_ERROR || !status.is_ok() {
            log::debug!(
                "Clearing stale DFU error (status 0x{:02X}, state 0x{:02X})",
                status.status,
                status.state
            );
            self.clear_status()?;
        } else if status.state != STATE_DFU_IDLE && status.state != STATE_APP_IDLE {
            self.abort()?;
        }
        Ok(())
    }

    /// Poll until the device settles after a download request
    fn wait_idle(&mut self) -> Result<()> {
        let deadline = Instant::now() + OPERATION_TIMEOUT;
        loop {
            let status = self.status()?;
            if !status.is_ok() {
                // Leave the device usable for a retry
                let _ = self.clear_status();
                return Err(DfuError::ErrorStatus {
                    status: status.status,
                    state: status.state,
                });
            }
            if status.is_idle() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DfuError::Timeout);
            }
            // The device tells us how long the current operation needs
            std::thread::sleep(status.poll_timeout.max(Duration::from_millis(1)));
        }
    }

    /// DFU_DNLOAD with an explicit block number
    fn dnload(&mut self, block: u16, data: &[u8]) -> Result<()> {
        self.control_out(DFU_DNLOAD, block, data)
    }

    fn control_in(&mut self, request: u8, value: u16, length: u16) -> Result<Vec<u8>> {
        let data = self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index: 0,
                    length,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| DfuError::TransferFailed(e.to_string()))?;
        Ok(data.to_vec())
    }

    fn control_out(&mut self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index: 0,
                    data,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| DfuError::TransferFailed(e.to_string()))?;
        Ok(())
    }
}
