//! CLI argument parsing

use clap::{Parser, Subcommand};
use openams_core::{BoardKind, Mode, SwapPolicy};
use std::path::PathBuf;

fn parse_board(s: &str) -> Result<BoardKind, String> {
    s.parse()
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    s.parse()
}

fn parse_swap_policy(s: &str) -> Result<SwapPolicy, String> {
    match s.to_ascii_lowercase().as_str() {
        "overwrite" => Ok(SwapPolicy::Overwrite),
        "confirm" => Ok(SwapPolicy::Confirm),
        "ignore" => Ok(SwapPolicy::Ignore),
        other => Err(format!("unknown swap policy: {}", other)),
    }
}

#[derive(Parser)]
#[command(name = "openams")]
#[command(author, version, about = "OpenAMS board provisioning", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the Klipper printer.cfg
    /// Defaults to ~/printer_data/config/printer.cfg
    #[arg(long, global = true)]
    pub printer_cfg: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Guided first-time provisioning of both boards
    Setup {
        /// CAN interface the boards appear on
        #[arg(long, default_value = "can0")]
        interface: String,
    },

    /// Bring up the CAN network interface
    SetupCanbus {
        /// Fail instead of waiting for the operator
        #[arg(long)]
        non_interactive: bool,

        /// CAN interface to configure
        #[arg(long, default_value = "can0")]
        interface: String,
    },

    /// Flash one board through the two-stage pipeline
    Deploy {
        /// Board to flash (fps, openams)
        #[arg(short, long, value_parser = parse_board)]
        board: BoardKind,

        /// Firmware mode (bridge, canbus); detected from printer.cfg if omitted
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<Mode>,

        /// Prebuilt bootloader image (skips the Katapult build)
        #[arg(long)]
        bootloader: Option<PathBuf>,

        /// Prebuilt application image (skips the Klipper build)
        #[arg(long)]
        application: Option<PathBuf>,

        /// Never prompt; fail when the mode cannot be determined
        #[arg(long)]
        non_interactive: bool,
    },

    /// Scan the CAN bus and print discovered node identifiers
    Query {
        /// CAN interface to scan
        #[arg(long, default_value = "can0")]
        interface: String,

        /// Scan window in seconds
        #[arg(long, default_value_t = 2)]
        timeout: u64,
    },

    /// Write discovered node identifiers into the Klipper configuration
    SetupKlipperConfig {
        /// CAN interface to scan
        #[arg(long, default_value = "can0")]
        interface: String,
    },

    /// Install and enable the reconciliation daemon service
    InstallAssistant,

    /// Run the reconciliation loop until interrupted
    Daemon {
        /// Seconds between reconciliation cycles
        #[arg(long, default_value_t = 5)]
        interval: u64,

        /// Where provisioning state is persisted between cycles
        #[arg(long, default_value = "/var/lib/openams/state.ron")]
        state_file: PathBuf,

        /// What to do when a recorded board is replaced (overwrite, confirm, ignore)
        #[arg(long, default_value = "ignore", value_parser = parse_swap_policy)]
        swap_policy: SwapPolicy,

        /// CAN interface the boards appear on
        #[arg(long, default_value = "can0")]
        interface: String,
    },
}

/// Default printer.cfg location used when `--printer-cfg` is not given
pub fn default_printer_cfg() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("printer_data/config/printer.cfg"),
        None => PathBuf::from("/root/printer_data/config/printer.cfg"),
    }
}
