//! openams - OpenAMS board provisioning
//!
//! Provisions the two OpenAMS boards (filament pressure sensor and
//! mainboard): flashes the Katapult bootloader over DFU and the Klipper
//! application through the bootloader protocol, discovers the boards'
//! CAN bus identifiers, and reconciles them into the Klipper host
//! configuration either one-shot or as a daemon.

mod cli;
mod commands;
mod firmware;
mod prompt;
mod service;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let printer_cfg = cli
        .printer_cfg
        .clone()
        .unwrap_or_else(cli::default_printer_cfg);

    let result = match cli.command {
        Commands::Setup { interface } => commands::setup::run(&interface, &printer_cfg),
        Commands::SetupCanbus {
            non_interactive,
            interface,
        } => commands::canbus_setup::run(&interface, non_interactive),
        Commands::Deploy {
            board,
            mode,
            bootloader,
            application,
            non_interactive,
        } => commands::deploy::run(
            &commands::deploy::DeployArgs {
                board,
                mode,
                bootloader,
                application,
                non_interactive,
            },
            &printer_cfg,
        )
        .map(|_| ()),
        Commands::Query { interface, timeout } => {
            commands::query::run(&interface, Duration::from_secs(timeout))
        }
        Commands::SetupKlipperConfig { interface } => {
            commands::klipper_config::run(&interface, &printer_cfg)
        }
        Commands::InstallAssistant => commands::install::run(),
        Commands::Daemon {
            interval,
            state_file,
            swap_policy,
            interface,
        } => commands::daemon::run(
            &commands::daemon::DaemonArgs {
                interval: Duration::from_secs(interval),
                state_file,
                swap_policy,
                interface,
            },
            &printer_cfg,
        ),
    };

    if let Err(e) = &result {
        log::error!("{}", e);
    }
    result.map_err(Into::into)
}
