//! Two-stage flash orchestration for openams boards
//!
//! The callers of this crate (the CLI and the setup wizard) interact with
//! [`FlashEngine`] and its job/outcome types only; the DFU and bootloader
//! transports stay behind the stage seams so the pipeline is testable
//! without hardware.

mod engine;
mod hw;

pub use engine::{
    AppStage, DetectedFirmware, DfuStage, FlashEngine, FlashJob, FlashOutcome, StageProbe,
};
pub use hw::{platform_hook, SerialAppStage, UsbDfuStage, UsbStageProbe};
