//! Packet transports: direct UDP and externally-negotiated ICE pipes
//!
//! Every session owns one transport carrying its RTP and RTCP flows. The
//! direct [`UdpTransport`] follows the fixed port convention: for a base
//! port P, RTP travels on P, the local RTCP listener binds P+1, P+2 is
//! reserved, and outbound RTCP targets the remote's P+3. The
//! [`IceTransport`] wraps byte pipes that an external ICE agent has already
//! connected (components 1..=3); connectivity checking itself lives outside
//! this crate.
//!
//! Sending is synchronous from the caller's view: packets enter an unbounded
//! channel drained by a writer task per socket.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{Direction, TransportCredentials};

/// Incoming traffic and lifecycle notifications from a transport
#[derive(Debug)]
pub enum TransportEvent {
    /// One RTP datagram
    Rtp(Bytes),
    /// One RTCP datagram
    Rtcp(Bytes),
    /// The transport's peer went away
    Disconnected,
}

/// A connected packet transport for one session
pub trait Transport: Send {
    /// Queue one RTP packet for sending
    fn send_rtp(&self, packet: Bytes) -> Result<()>;

    /// Queue one RTCP packet for sending
    fn send_rtcp(&self, packet: Bytes) -> Result<()>;

    /// Take the incoming-event receiver. Yields once; `None` thereafter.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

/// Port layout for one session under the direct UDP convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBlock {
    /// Base port P
    pub base: u16,
}

impl PortBlock {
    /// RTP port (P)
    pub fn rtp(&self) -> u16 {
        self.base
    }

    /// Local RTCP receive port. The sending side of a stream listens on
    /// P+1; the receiving side on P+3.
    pub fn rtcp_recv(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Send => self.base + 1,
            Direction::Recv => self.base + 3,
        }
    }

    /// Reserved port (P+2), never bound
    pub fn reserved(&self) -> u16 {
        self.base + 2
    }

    /// Remote port RTCP is sent to: the mirror of `rtcp_recv`, so a
    /// sender's control traffic targets the remote receiver's P+3 and
    /// vice versa.
    pub fn rtcp_send(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Send => self.base + 3,
            Direction::Recv => self.base + 1,
        }
    }

    /// Port block for session `n` starting from a call-level base
    pub fn for_session(call_base: u16, session_index: u16) -> Self {
        Self { base: call_base + session_index * 4 }
    }
}

/// Generate random ICE-style credentials for the signaling exchange
pub fn generate_credentials() -> TransportCredentials {
    let mut rng = rand::thread_rng();
    let ufrag: String = (&mut rng).sample_iter(Alphanumeric).take(8).map(char::from).collect();
    let password: String = (&mut rng).sample_iter(Alphanumeric).take(24).map(char::from).collect();
    TransportCredentials { ufrag, password }
}

/// Direct UDP transport following the P / P+1 / P+3 convention
pub struct UdpTransport {
    rtp_out: mpsc::UnboundedSender<Bytes>,
    rtcp_out: mpsc::UnboundedSender<Bytes>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ports: PortBlock,
}

impl UdpTransport {
    /// Bind the local port block and point both flows at the remote peer.
    /// `direction` is the session's direction from the local point of view
    /// and picks which side of the RTCP port pair this end binds.
    pub async fn bind(
        local: PortBlock,
        remote_ip: IpAddr,
        remote: PortBlock,
        direction: Direction,
    ) -> Result<Self> {
        let rtcp_local = local.rtcp_recv(direction);
        let rtp_socket = Arc::new(
            UdpSocket::bind(("0.0.0.0", local.rtp()))
                .await
                .map_err(|e| Error::Transport(format!("bind RTP port {}: {}", local.rtp(), e)))?,
        );
        let rtcp_socket = Arc::new(
            UdpSocket::bind(("0.0.0.0", rtcp_local))
                .await
                .map_err(|e| Error::Transport(format!("bind RTCP port {}: {}", rtcp_local, e)))?,
        );

        let rtp_target = SocketAddr::new(remote_ip, remote.rtp());
        let rtcp_target = SocketAddr::new(remote_ip, remote.rtcp_send(direction));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (rtp_out, rtp_out_rx) = mpsc::unbounded_channel();
        let (rtcp_out, rtcp_out_rx) = mpsc::unbounded_channel();

        spawn_writer(Arc::clone(&rtp_socket), rtp_target, rtp_out_rx);
        spawn_writer(Arc::clone(&rtcp_socket), rtcp_target, rtcp_out_rx);
        spawn_reader(rtp_socket, events_tx.clone(), TransportEvent::Rtp);
        spawn_reader(rtcp_socket, events_tx, TransportEvent::Rtcp);

        debug!(
            "udp transport up: rtp {} -> {}, rtcp {} -> {}",
            local.rtp(),
            rtp_target,
            rtcp_local,
            rtcp_target
        );

        Ok(Self { rtp_out, rtcp_out, events: Some(events_rx), ports: local })
    }

    /// Local port layout of this transport
    pub fn ports(&self) -> PortBlock {
        self.ports
    }
}

fn spawn_writer(
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            if let Err(e) = socket.send_to(&packet, target).await {
                warn!("udp send to {} failed: {}", target, e);
            }
        }
    });
}

fn spawn_reader(
    socket: Arc<UdpSocket>,
    events: mpsc::UnboundedSender<TransportEvent>,
    wrap: fn(Bytes) -> TransportEvent,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, _from)) => {
                    let packet = Bytes::copy_from_slice(&buf[..len]);
                    if events.send(wrap(packet)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("udp receive failed: {}", e);
                    let _ = events.send(TransportEvent::Disconnected);
                    break;
                }
            }
        }
    });
}

impl Transport for UdpTransport {
    fn send_rtp(&self, packet: Bytes) -> Result<()> {
        self.rtp_out
            .send(packet)
            .map_err(|_| Error::TransientPush("rtp writer gone".into()))
    }

    fn send_rtcp(&self, packet: Bytes) -> Result<()> {
        self.rtcp_out
            .send(packet)
            .map_err(|_| Error::TransientPush("rtcp writer gone".into()))
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

/// Byte pipes handed over by an external ICE agent, one per component
pub struct IcePipes {
    /// Component 1: bidirectional RTP
    pub rtp_tx: mpsc::UnboundedSender<Bytes>,
    /// Component 1 inbound
    pub rtp_rx: mpsc::UnboundedReceiver<Bytes>,
    /// Component 2 inbound: RTCP from the remote
    pub rtcp_rx: mpsc::UnboundedReceiver<Bytes>,
    /// Component 3 outbound: RTCP to the remote
    pub rtcp_tx: mpsc::UnboundedSender<Bytes>,
}

/// Transport over externally-connected ICE components
///
/// Component assignment mirrors the UDP convention: 1 carries RTP, 2 is the
/// local RTCP receive leg, 3 the remote-bound RTCP leg. A closed inbound
/// component is treated as a disconnect.
pub struct IceTransport {
    rtp_out: mpsc::UnboundedSender<Bytes>,
    rtcp_out: mpsc::UnboundedSender<Bytes>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl IceTransport {
    /// Wrap already-connected component pipes
    pub fn new(pipes: IcePipes) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut rtp_rx = pipes.rtp_rx;
        let tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(packet) = rtp_rx.recv().await {
                if tx.send(TransportEvent::Rtp(packet)).is_err() {
                    return;
                }
            }
            let _ = tx.send(TransportEvent::Disconnected);
        });

        let mut rtcp_rx = pipes.rtcp_rx;
        tokio::spawn(async move {
            while let Some(packet) = rtcp_rx.recv().await {
                if events_tx.send(TransportEvent::Rtcp(packet)).is_err() {
                    return;
                }
            }
            let _ = events_tx.send(TransportEvent::Disconnected);
        });

        Self { rtp_out: pipes.rtp_tx, rtcp_out: pipes.rtcp_tx, events: Some(events_rx) }
    }
}

impl Transport for IceTransport {
    fn send_rtp(&self, packet: Bytes) -> Result<()> {
        self.rtp_out
            .send(packet)
            .map_err(|_| Error::TransientPush("ice rtp component gone".into()))
    }

    fn send_rtcp(&self, packet: Bytes) -> Result<()> {
        self.rtcp_out
            .send(packet)
            .map_err(|_| Error::TransientPush("ice rtcp component gone".into()))
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_block_layout() {
        let block = PortBlock { base: 5000 };
        assert_eq!(block.rtp(), 5000);
        assert_eq!(block.rtcp_recv(Direction::Send), 5001);
        assert_eq!(block.reserved(), 5002);
        assert_eq!(block.rtcp_send(Direction::Send), 5003);
        // The receive side mirrors the pair
        assert_eq!(block.rtcp_recv(Direction::Recv), 5003);
        assert_eq!(block.rtcp_send(Direction::Recv), 5001);
    }

    #[test]
    fn test_port_blocks_do_not_overlap_across_sessions() {
        let a = PortBlock::for_session(5000, 0);
        let b = PortBlock::for_session(5000, 1);
        assert_eq!(a.base, 5000);
        assert_eq!(b.base, 5004);
        assert!(a.rtcp_send(Direction::Send) < b.rtp());
    }

    #[test]
    fn test_credentials_are_random() {
        let a = generate_credentials();
        let b = generate_credentials();
        assert_eq!(a.ufrag.len(), 8);
        assert_eq!(a.password.len(), 24);
        assert_ne!(a.password, b.password);
    }

    #[tokio::test]
    async fn test_ice_transport_forwards_both_flows() {
        let (rtp_in_tx, rtp_in_rx) = mpsc::unbounded_channel();
        let (rtcp_in_tx, rtcp_in_rx) = mpsc::unbounded_channel();
        let (rtp_out_tx, mut rtp_out_rx) = mpsc::unbounded_channel();
        let (rtcp_out_tx, mut rtcp_out_rx) = mpsc::unbounded_channel();

        let mut transport = IceTransport::new(IcePipes {
            rtp_tx: rtp_out_tx,
            rtp_rx: rtp_in_rx,
            rtcp_rx: rtcp_in_rx,
            rtcp_tx: rtcp_out_tx,
        });
        let mut events = transport.take_events().unwrap();
        assert!(transport.take_events().is_none());

        rtp_in_tx.send(Bytes::from_static(b"rtp")).unwrap();
        rtcp_in_tx.send(Bytes::from_static(b"rtcp")).unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, TransportEvent::Rtp(_) | TransportEvent::Rtcp(_)));

        transport.send_rtp(Bytes::from_static(b"out")).unwrap();
        transport.send_rtcp(Bytes::from_static(b"ctrl")).unwrap();
        assert_eq!(&rtp_out_rx.recv().await.unwrap()[..], b"out");
        assert_eq!(&rtcp_out_rx.recv().await.unwrap()[..], b"ctrl");
    }

    #[tokio::test]
    async fn test_ice_disconnect_on_closed_component() {
        let (rtp_in_tx, rtp_in_rx) = mpsc::unbounded_channel();
        let (_rtcp_in_tx, rtcp_in_rx) = mpsc::unbounded_channel();
        let (rtp_out_tx, _rtp_out_rx) = mpsc::unbounded_channel();
        let (rtcp_out_tx, _rtcp_out_rx) = mpsc::unbounded_channel();

        let mut transport = IceTransport::new(IcePipes {
            rtp_tx: rtp_out_tx,
            rtp_rx: rtp_in_rx,
            rtcp_rx: rtcp_in_rx,
            rtcp_tx: rtcp_out_tx,
        });
        let mut events = transport.take_events().unwrap();

        drop(rtp_in_tx);
        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, TransportEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_udp_transport_loopback() {
        let a_ports = PortBlock { base: 47_000 };
        let b_ports = PortBlock { base: 47_004 };
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        let a = UdpTransport::bind(a_ports, ip, b_ports, Direction::Send).await.unwrap();
        let mut b = UdpTransport::bind(b_ports, ip, a_ports, Direction::Recv).await.unwrap();
        let mut b_events = b.take_events().unwrap();

        a.send_rtp(Bytes::from_static(b"hello")).unwrap();
        match b_events.recv().await.unwrap() {
            TransportEvent::Rtp(data) => assert_eq!(&data[..], b"hello"),
            other => panic!("unexpected event {:?}", other),
        }

        // Control traffic crosses on the mirrored P+1 / P+3 pair
        a.send_rtcp(Bytes::from_static(b"sr")).unwrap();
        match b_events.recv().await.unwrap() {
            TransportEvent::Rtcp(data) => assert_eq!(&data[..], b"sr"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
