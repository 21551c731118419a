//! Bus scanning: discover node identifiers via the admin query
//!
//! Klipper-protocol nodes (and Katapult bootloaders) answer a broadcast
//! query on the admin message id with their 6-byte bus identifier and a
//! role byte. A quiet bus is a normal, expected state while boards are
//! still being flashed: a scan that hears nothing returns an empty set,
//! never an error.

use std::time::{Duration, Instant};

use openams_core::board::{BoardKind, CanNode};
use openams_core::engine::BusScan;
use openams_core::error::{Error, Result};

/// Admin message id queries are broadcast on
pub const ADMIN_ID: u32 = 0x3F0;
/// Admin message id nodes respond on
pub const ADMIN_RESP_ID: u32 = 0x3F1;

/// Query command: ask unassigned nodes to announce themselves
pub const CMD_QUERY_NODES: u8 = 0x00;
/// Response marker carried in the first data byte
pub const RESP_ANNOUNCE: u8 = 0x20;

// Role byte values advertised after the identifier
const ROLE_FPS: u8 = 0x01;
const ROLE_MAINBOARD: u8 = 0x02;

/// Raw CAN frame transport
///
/// `recv` returns `Ok(None)` on timeout; errors are reserved for transport
/// failures (interface down, socket errors).
pub trait CanTransport {
    fn send(&mut self, id: u32, data: &[u8]) -> Result<()>;
    fn recv(&mut self, timeout: Duration) -> Result<Option<(u32, Vec<u8>)>>;
}

impl<T: CanTransport + ?Sized> CanTransport for &mut T {
    fn send(&mut self, id: u32, data: &[u8]) -> Result<()> {
        (**self).send(id, data)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<(u32, Vec<u8>)>> {
        (**self).recv(timeout)
    }
}

/// Bus scanner over any [`CanTransport`]
pub struct CanScanner<T: CanTransport> {
    transport: T,
}

impl<T: CanTransport> CanScanner<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Broadcast the query and collect announcements until the window closes
    pub fn scan_nodes(&mut self, timeout: Duration) -> Result<Vec<CanNode>> {
        self.transport.send(ADMIN_ID, &[CMD_QUERY_NODES])?;

        let deadline = Instant::now() + timeout;
        let mut nodes: Vec<CanNode> = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.transport.recv(remaining)? {
                Some((id, data)) => {
                    if let Some(node) = parse_announcement(id, &data) {
                        if nodes.iter().all(|n| n.uuid != node.uuid) {
                            log::debug!(
                                "node announcement: canbus_uuid={} kind={:?}",
                                node.uuid,
                                node.kind
                            );
                            nodes.push(node);
                        }
                    }
                }
                None => break,
            }
        }
        Ok(nodes)
    }
}

impl<T: CanTransport> BusScan for CanScanner<T> {
    fn scan(&mut self, timeout: Duration) -> Result<Vec<CanNode>> {
        self.scan_nodes(timeout)
    }
}

/// Decode one announcement frame, ignoring unrelated traffic
fn parse_announcement(id: u32, data: &[u8]) -> Option<CanNode> {
    if id != ADMIN_RESP_ID || data.len() < 7 || data[0] != RESP_ANNOUNCE {
        return None;
    }
    let uuid: String = data[1..7].iter().map(|b| format!("{:02x}", b)).collect();
    let kind = data.get(7).and_then(|&role| classify(role));
    Some(CanNode::new(uuid, kind))
}

/// Map an advertised role byte to a board kind
fn classify(role: u8) -> Option<BoardKind> {
    match role {
        ROLE_FPS => Some(BoardKind::Fps),
        ROLE_MAINBOARD => Some(BoardKind::Mainboard),
        _ => None,
    }
}

pub mod socket {
    //! SocketCAN transport

    use super::*;
    use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};

    /// Transport over a Linux SocketCAN interface (e.g. `can0`)
    pub struct SocketCanTransport {
        socket: CanSocket,
        interface: String,
    }

    impl SocketCanTransport {
        pub fn open(interface: &str) -> Result<Self> {
            let socket = CanSocket::open(interface)
                .map_err(|e| Error::Bus(format!("{}: {}", interface, e)))?;
            log::debug!("Opened CAN interface {}", interface);
            Ok(Self {
                socket,
                interface: interface.to_string(),
            })
        }
    }

    impl CanTransport for SocketCanTransport {
        fn send(&mut self, id: u32, data: &[u8]) -> Result<()> {
            let id = StandardId::new(id as u16)
                .ok_or_else(|| Error::Bus(format!("invalid CAN id 0x{:X}", id)))?;
            let frame = CanFrame::new(id, data)
                .ok_or_else(|| Error::Bus("oversized CAN payload".into()))?;
            self.socket
                .write_frame(&frame)
                .map_err(|e| Error::Bus(format!("{}: {}", self.interface, e)))?;
            Ok(())
        }

        fn recv(&mut self, timeout: Duration) -> Result<Option<(u32, Vec<u8>)>> {
            self.socket
                .set_read_timeout(timeout)
                .map_err(|e| Error::Bus(e.to_string()))?;
            match self.socket.read_frame() {
                Ok(frame) => Ok(Some((frame.raw_id(), frame.data().to_vec()))),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    Ok(None)
                }
                Err(e) => Err(Error::Bus(format!("{}: {}", self.interface, e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport that replays queued frames and records queries
    #[derive(Default)]
    struct MockCan {
        frames: Vec<(u32, Vec<u8>)>,
        sent: Vec<(u32, Vec<u8>)>,
    }

    impl CanTransport for MockCan {
        fn send(&mut self, id: u32, data: &[u8]) -> Result<()> {
            self.sent.push((id, data.to_vec()));
            Ok(())
        }

        fn recv(&mut self, _timeout: Duration) -> Result<Option<(u32, Vec<u8>)>> {
            if self.frames.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.frames.remove(0)))
            }
        }
    }

    fn announcement(uuid: [u8; 6], role: u8) -> Vec<u8> {
        let mut data = vec![RESP_ANNOUNCE];
        data.extend_from_slice(&uuid);
        data.push(role);
        data
    }

    #[test]
    fn quiet_bus_yields_empty_set() {
        let mut scanner = CanScanner::new(MockCan::default());
        let nodes = scanner.scan_nodes(Duration::from_millis(50)).unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn query_is_broadcast_on_admin_id() {
        let mut mock = MockCan::default();
        let mut scanner = CanScanner::new(&mut mock);
        scanner.scan_nodes(Duration::from_millis(10)).unwrap();
        drop(scanner);
        assert_eq!(mock.sent, vec![(ADMIN_ID, vec![CMD_QUERY_NODES])]);
    }

    #[test]
    fn announcements_are_classified_by_role() {
        let mut mock = MockCan::default();
        mock.frames.push((
            ADMIN_RESP_ID,
            announcement([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01], 0x01),
        ));
        mock.frames.push((
            ADMIN_RESP_ID,
            announcement([0x11, 0x22, 0x33, 0x44, 0x55, 0x66], 0x02),
        ));
        mock.frames.push((
            ADMIN_RESP_ID,
            announcement([0x77, 0x77, 0x77, 0x77, 0x77, 0x77], 0x7F),
        ));

        let mut scanner = CanScanner::new(mock);
        let nodes = scanner.scan_nodes(Duration::from_secs(1)).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].uuid, "deadbeef0001");
        assert_eq!(nodes[0].kind, Some(BoardKind::Fps));
        assert_eq!(nodes[1].uuid, "112233445566");
        assert_eq!(nodes[1].kind, Some(BoardKind::Mainboard));
        assert_eq!(nodes[2].kind, None);
    }

    #[test]
    fn duplicate_announcements_are_collapsed() {
        let mut mock = MockCan::default();
        let frame = (
            ADMIN_RESP_ID,
            announcement([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01], 0x01),
        );
        mock.frames.push(frame.clone());
        mock.frames.push(frame);

        let mut scanner = CanScanner::new(mock);
        let nodes = scanner.scan_nodes(Duration::from_secs(1)).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn unrelated_traffic_is_ignored() {
        let mut mock = MockCan::default();
        // wrong id
        mock.frames
            .push((0x101, announcement([1, 2, 3, 4, 5, 6], 0x01)));
        // wrong marker byte
        mock.frames.push((ADMIN_RESP_ID, vec![0x99, 1, 2, 3, 4, 5, 6]));
        // truncated
        mock.frames.push((ADMIN_RESP_ID, vec![RESP_ANNOUNCE, 1, 2]));

        let mut scanner = CanScanner::new(mock);
        let nodes = scanner.scan_nodes(Duration::from_secs(1)).unwrap();
        assert!(nodes.is_empty());
    }
}
