//! `query` - one bus scan, print discovered identifiers

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use openams_canbus::{CanScanner, SocketCanTransport};
use openams_core::Result;

pub fn run(interface: &str, timeout: Duration) -> Result<()> {
    let transport = SocketCanTransport::open(interface)?;
    let mut scanner = CanScanner::new(transport);

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(format!("Scanning {} for nodes...", interface));
    pb.enable_steady_tick(Duration::from_millis(100));

    let nodes = scanner.scan_nodes(timeout)?;
    pb.finish_and_clear();

    if nodes.is_empty() {
        println!("No nodes answered on {}", interface);
        return Ok(());
    }
    for node in &nodes {
        match node.kind {
            Some(kind) => println!("canbus_uuid={} ({})", node.uuid, kind),
            None => println!("canbus_uuid={}", node.uuid),
        }
    }
    Ok(())
}
