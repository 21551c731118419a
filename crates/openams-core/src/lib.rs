//! Core types and state machine for OpenAMS board provisioning
//!
//! This crate carries everything the pipeline shares: board identities and
//! firmware variants, the error taxonomy, the Klipper host-configuration
//! writer, mode resolution, and the reconciliation engine that sequences
//! scanning, config writing and service restarts. Device I/O lives in the
//! sibling crates (`openams-dfu`, `openams-katapult`, `openams-canbus`) and
//! plugs in through the trait seams defined here.

pub mod artifacts;
pub mod board;
pub mod config;
pub mod engine;
pub mod error;
pub mod mode;
pub mod prompt;
pub mod state;

pub use artifacts::FirmwareArtifacts;
pub use board::{BoardKind, CanNode, FirmwareStage, Mode};
pub use config::HostConfig;
pub use engine::{BusScan, ConfigSink, Engine, EngineOptions, ServiceControl, SwapPolicy};
pub use error::{Error, FlashStage, Result};
pub use prompt::{NonInteractive, Prompter};
pub use state::{Phase, ProvisioningState};
