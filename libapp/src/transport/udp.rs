//! UDP datagram transport.
//!
//! Each datagram carries exactly one frame. A server learns its peers from
//! the source addresses of incoming datagrams; since there is no connection
//! to lose, a peer only goes away through [`Transport::expire_peers`].

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use super::{
    peer_name, resolve, ClientId, Family, Transport, TransportEvent, TransportMode,
    TransportStatus,
};
use crate::error::*;
use crate::message::{Message, MessageType};
use crate::reactor::{Reactor, Readiness, Token};
use crate::sansio::protocol::parse_message;
use crate::sansio::{parse_frame, serialize_message, ConnectionState, ParseResult, Transmit};

const SOCKET: Token = 0;
const MAX_DATAGRAM: usize = 65536;
/// Largest UDP payload an IPv4 datagram can carry.
const MAX_PAYLOAD: usize = 65507;

pub(crate) fn open_any(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
) -> Result<Box<dyn Transport>> {
    open(mode, address, reactor, Family::Any, "udp")
}

pub(crate) fn open_v4(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
) -> Result<Box<dyn Transport>> {
    open(mode, address, reactor, Family::V4, "udp4")
}

pub(crate) fn open_v6(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
) -> Result<Box<dyn Transport>> {
    open(mode, address, reactor, Family::V6, "udp6")
}

fn open(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
    family: Family,
    kind: &'static str,
) -> Result<Box<dyn Transport>> {
    Ok(Box::new(bind(mode, address, reactor, family, kind)?))
}

fn bind(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
    family: Family,
    kind: &'static str,
) -> Result<UdpTransport> {
    let addr = resolve(address, mode, family)?;

    let bind_addr = match mode {
        TransportMode::Server => addr,
        TransportMode::Client if addr.is_ipv4() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        }
        TransportMode::Client => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(bind_addr).map_err(|e| {
        Error::with_source(ErrorKind::ConnectionError(format!("bind {}", bind_addr)), e)
    })?;
    socket.set_nonblocking(true)?;

    let remote = match mode {
        TransportMode::Server => None,
        TransportMode::Client => {
            socket.connect(addr).map_err(|e| {
                Error::with_source(ErrorKind::ConnectionError(format!("connect {}", addr)), e)
            })?;
            Some(addr)
        }
    };

    let local_addr = socket.local_addr()?;
    reactor.register_read(socket.as_raw_fd(), SOCKET)?;

    let mut events = VecDeque::new();
    let message = match remote {
        Some(r) => format!("sending to {}", r),
        None => format!("listening on {}", local_addr),
    };
    log::info!("{} {}", kind, message);
    events.push_back(TransportEvent::Status {
        status: TransportStatus::Connected,
        message,
    });

    Ok(UdpTransport {
        kind,
        socket: Some(socket),
        local_addr,
        remote,
        peers: HashMap::new(),
        clients: HashMap::new(),
        outgoing: VecDeque::new(),
        events,
    })
}

#[derive(Debug)]
struct UdpPeer {
    client: ClientId,
    name: String,
    last_seen: Instant,
}

/// One UDP socket, in either role.
#[derive(Debug)]
pub struct UdpTransport {
    kind: &'static str,
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    /// The server address in client role
    remote: Option<SocketAddr>,
    peers: HashMap<SocketAddr, UdpPeer>,
    clients: HashMap<ClientId, SocketAddr>,
    outgoing: VecDeque<Transmit>,
    events: VecDeque<TransportEvent>,
}

impl UdpTransport {
    fn receive(&mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let socket = match self.socket.as_ref() {
                Some(s) => s,
                None => return,
            };
            let (n, from) = match socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // ICMP errors from earlier sends surface here
                    self.events.push_back(TransportEvent::Status {
                        status: TransportStatus::Warning,
                        message: format!("receive failed: {}", e),
                    });
                    return;
                }
            };

            let message = match parse_frame(&buf[..n]) {
                ParseResult::Complete { message, consumed } if consumed == n => {
                    parse_message(&message)
                }
                ParseResult::Complete { .. } | ParseResult::Incomplete { .. } => {
                    Err(ErrorKind::MalformedEncoding(format!(
                        "datagram of {} bytes does not hold one frame",
                        n
                    ))
                    .into())
                }
                ParseResult::Invalid { error } => Err(ErrorKind::MalformedEncoding(error).into()),
            };

            // only a well-formed datagram makes its sender a peer
            match message {
                Ok(message) => {
                    let client = match self.remote {
                        Some(_) => None,
                        None => Some(self.touch(from)),
                    };
                    self.events
                        .push_back(TransportEvent::Message { client, message })
                }
                Err(e) => self.events.push_back(TransportEvent::Status {
                    status: TransportStatus::Warning,
                    message: format!("dropped datagram from {}: {}", from, e),
                }),
            }
        }
    }

    /// Look up or create the peer for `from`.
    fn touch(&mut self, from: SocketAddr) -> ClientId {
        if let Some(peer) = self.peers.get_mut(&from) {
            peer.last_seen = Instant::now();
            return peer.client;
        }
        let client = ClientId::next();
        let name = peer_name(&from);
        log::debug!("client {} seen from {} ({})", client, from, name);
        self.events.push_back(TransportEvent::ClientConnected {
            client,
            name: name.clone(),
        });
        self.peers.insert(
            from,
            UdpPeer {
                client,
                name,
                last_seen: Instant::now(),
            },
        );
        self.clients.insert(client, from);
        client
    }

    fn flush(&mut self, reactor: &mut dyn Reactor) -> Result<()> {
        let socket = match self.socket.as_ref() {
            Some(s) => s,
            None => return Err(ErrorKind::ConnectionClosed.into()),
        };
        let fd = socket.as_raw_fd();

        while let Some(transmit) = self.outgoing.front() {
            let sent = match transmit.dst {
                Some(dst) => socket.send_to(&transmit.payload, dst),
                None => socket.send(&transmit.payload),
            };
            match sent {
                Ok(_) => {
                    self.outgoing.pop_front();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return reactor.register_write(fd, SOCKET);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let dropped = self.outgoing.pop_front();
                    self.events.push_back(TransportEvent::Status {
                        status: TransportStatus::Warning,
                        message: format!("dropped outgoing datagram: {}", e),
                    });
                    if let Some(Transmit {
                        dst,
                        request: Some(id),
                        ..
                    }) = dropped
                    {
                        let client = dst.and_then(|d| self.peers.get(&d)).map(|p| p.client);
                        self.events.push_back(TransportEvent::SendFailed {
                            client,
                            id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
        reactor.unregister_write(fd);
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn mode(&self) -> TransportMode {
        match self.remote {
            Some(_) => TransportMode::Client,
            None => TransportMode::Server,
        }
    }

    fn address(&self) -> String {
        self.remote.unwrap_or(self.local_addr).to_string()
    }

    fn state(&self) -> ConnectionState {
        match self.socket {
            Some(_) => ConnectionState::Connected,
            None => ConnectionState::Closed,
        }
    }

    fn send(
        &mut self,
        reactor: &mut dyn Reactor,
        client: Option<ClientId>,
        message: &Message,
    ) -> Result<()> {
        if self.socket.is_none() {
            return Err(ErrorKind::ConnectionClosed.into());
        }
        let payload = serialize_message(message)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(ErrorKind::MalformedEncoding(format!(
                "message of {} bytes does not fit a datagram",
                payload.len()
            ))
            .into());
        }

        let transmit = match self.remote {
            Some(_) => Transmit::new(payload),
            None => {
                let dst = client
                    .and_then(|c| self.clients.get(&c))
                    .ok_or_else(|| Error::from(ErrorKind::ConnectionClosed))?;
                Transmit::new_with_dst(*dst, payload)
            }
        };
        let transmit = match (message.message_type(), message.id()) {
            (MessageType::Acknowledgement, _) | (_, 0) => transmit,
            (_, id) => transmit.with_request(id),
        };
        self.outgoing.push_back(transmit);
        self.flush(reactor)
    }

    fn handle(
        &mut self,
        reactor: &mut dyn Reactor,
        _token: Token,
        readiness: Readiness,
    ) -> Result<()> {
        if readiness.readable {
            self.receive();
        }
        if readiness.writable {
            self.flush(reactor)?;
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    fn client_name(&self, client: ClientId) -> Option<&str> {
        self.clients
            .get(&client)
            .and_then(|a| self.peers.get(a))
            .map(|p| p.name.as_str())
    }

    fn has_pending_output(&self) -> bool {
        !self.outgoing.is_empty()
    }

    fn expire_peers(&mut self, max_idle: Duration) {
        let now = Instant::now();
        let expired: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_seen) > max_idle)
            .map(|(a, _)| *a)
            .collect();

        for addr in expired {
            if let Some(peer) = self.peers.remove(&addr) {
                log::debug!("client {} ({}) idle, forgetting it", peer.client, addr);
                self.clients.remove(&peer.client);
                self.outgoing.retain(|t| t.dst != Some(addr));
                self.events.push_back(TransportEvent::ClientDisconnected {
                    client: peer.client,
                });
            }
        }
    }

    fn close(&mut self, reactor: &mut dyn Reactor) {
        if let Some(socket) = self.socket.take() {
            reactor.cancel(socket.as_raw_fd());
            log::debug!("closed {}:{}", self.kind, self.local_addr);
        }
        self.outgoing.clear();
        self.peers.clear();
        self.clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CallArgument, MessageId};
    use crate::reactor::Poller;
    use crate::Variant;

    fn pump(poller: &mut Poller, transport: &mut dyn Transport) -> Vec<TransportEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.is_empty() {
            assert!(Instant::now() < deadline, "timed out");
            for (t, r) in poller.wait(Some(Duration::from_millis(50))).unwrap() {
                transport.handle(poller, t, r).unwrap();
            }
            while let Some(e) = transport.poll_event() {
                if !matches!(e, TransportEvent::Status { .. }) {
                    events.push(e);
                }
            }
        }
        events
    }

    #[test]
    fn test_datagram_roundtrip_and_expiry() {
        let mut server_poller = Poller::new();
        let mut client_poller = Poller::new();
        let mut server = open_v4(TransportMode::Server, "127.0.0.1:0", &mut server_poller).unwrap();
        let mut client =
            open_v4(TransportMode::Client, &server.address(), &mut client_poller).unwrap();
        assert_eq!(client.mode(), TransportMode::Client);
        assert_eq!(client.address(), server.address());

        let call = Message::call(9, "ping", vec![]);
        client.send(&mut client_poller, None, &call).unwrap();

        let events = pump(&mut server_poller, server.as_mut());
        let (connected, received) = match &events[..] {
            [TransportEvent::ClientConnected { client, .. }, TransportEvent::Message {
                client: Some(from),
                message,
            }] => (*client, (*from, message.clone())),
            e => panic!("unexpected events {:?}", e),
        };
        assert_eq!(connected, received.0);
        assert_eq!(received.1, call);
        assert!(server.client_name(connected).is_some());

        let ack = Message::acknowledgement(9, None);
        server
            .send(&mut server_poller, Some(connected), &ack)
            .unwrap();
        match &pump(&mut client_poller, client.as_mut())[..] {
            [TransportEvent::Message {
                client: None,
                message,
            }] => assert_eq!(*message, ack),
            e => panic!("unexpected events {:?}", e),
        }

        server.expire_peers(Duration::from_secs(60));
        assert!(server.poll_event().is_none());
        std::thread::sleep(Duration::from_millis(20));
        server.expire_peers(Duration::from_millis(10));
        assert!(matches!(
            server.poll_event(),
            Some(TransportEvent::ClientDisconnected { client }) if client == connected
        ));
        assert!(server
            .send(&mut server_poller, Some(connected), &ack)
            .is_err());

        client.close(&mut client_poller);
        server.close(&mut server_poller);
        assert!(server_poller.is_empty());
    }

    #[test]
    fn test_garbage_datagram() {
        let mut poller = Poller::new();
        let mut server = open_v4(TransportMode::Server, "127.0.0.1:0", &mut poller).unwrap();
        assert!(matches!(
            server.poll_event(),
            Some(TransportEvent::Status {
                status: TransportStatus::Connected,
                ..
            })
        ));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&[0, 0, 0, 9, 1, 2], server.address())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(Instant::now() < deadline, "timed out");
            for (t, r) in poller.wait(Some(Duration::from_millis(50))).unwrap() {
                server.handle(&mut poller, t, r).unwrap();
            }
            match server.poll_event() {
                Some(TransportEvent::Status { status, .. }) => {
                    assert_eq!(status, TransportStatus::Warning);
                    break;
                }
                Some(e) => panic!("unexpected event {:?}", e),
                None => {}
            }
        }
        assert!(server.poll_event().is_none());

        // the sender becomes a peer with its first well-formed datagram
        let frame = serialize_message(&Message::call(0, "ping", vec![])).unwrap();
        sender.send_to(&frame, server.address()).unwrap();
        match &pump(&mut poller, server.as_mut())[..] {
            [TransportEvent::ClientConnected { client, .. }, TransportEvent::Message {
                client: Some(from),
                ..
            }] => assert_eq!(client, from),
            e => panic!("unexpected events {:?}", e),
        }
    }

    #[test]
    fn test_oversize_datagram() {
        let mut poller = Poller::new();
        let mut client = open_v4(TransportMode::Client, "127.0.0.1:9", &mut poller).unwrap();
        let call = Message::call(
            1,
            "store",
            vec![CallArgument::input(Variant::Buffer(vec![0; MAX_PAYLOAD]))],
        );
        assert!(matches!(
            client.send(&mut poller, None, &call).unwrap_err().kind(),
            ErrorKind::MalformedEncoding(_)
        ));
        assert!(!client.has_pending_output());
    }

    #[test]
    fn test_failed_send_reports_request() {
        let mut poller = Poller::new();
        let mut server = bind(
            TransportMode::Server,
            "127.0.0.1:0",
            &mut poller,
            Family::V4,
            "udp4",
        )
        .unwrap();
        while server.poll_event().is_some() {}

        // an IPv4 socket cannot reach an IPv6 destination
        let unreachable: SocketAddr = "[::1]:9".parse().unwrap();
        server
            .outgoing
            .push_back(Transmit::new_with_dst(unreachable, vec![0; 8]).with_request(7));
        server
            .outgoing
            .push_back(Transmit::new_with_dst(unreachable, vec![0; 8]));
        server.flush(&mut poller).unwrap();
        assert!(!server.has_pending_output());

        let failed: Vec<MessageId> = std::iter::from_fn(|| server.poll_event())
            .filter_map(|e| match e {
                TransportEvent::SendFailed { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(failed, [7]);
    }
}
