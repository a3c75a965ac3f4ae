//! TCP stream transport.
//!
//! Addresses are `host:port`. IPv6 literals use `.` as port separator
//! (`::1.4242`) or brackets (`[::1]:4242`).

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};

use super::stream::{drain_events, Peers, StreamPeer};
use super::{
    peer_name, resolve, ClientId, Family, Transport, TransportEvent, TransportMode,
    TransportStatus,
};
use crate::error::*;
use crate::message::Message;
use crate::reactor::{Reactor, Readiness, Token};
use crate::sansio::{Connection, ConnectionState};

const LISTENER: Token = 0;
const BACKLOG: i32 = 128;

pub(crate) fn open_any(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
) -> Result<Box<dyn Transport>> {
    open(mode, address, reactor, Family::Any, "tcp")
}

pub(crate) fn open_v4(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
) -> Result<Box<dyn Transport>> {
    open(mode, address, reactor, Family::V4, "tcp4")
}

pub(crate) fn open_v6(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
) -> Result<Box<dyn Transport>> {
    open(mode, address, reactor, Family::V6, "tcp6")
}

fn open(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
    family: Family,
    kind: &'static str,
) -> Result<Box<dyn Transport>> {
    let addr = resolve(address, mode, family)?;
    Ok(match mode {
        TransportMode::Server => Box::new(TcpServer::bind(kind, addr, family, reactor)?),
        TransportMode::Client => Box::new(TcpClient::connect(kind, addr, reactor)?),
    })
}

fn new_socket(addr: &SocketAddr) -> Result<Socket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Listening socket plus accepted peers.
#[derive(Debug)]
pub struct TcpServer {
    kind: &'static str,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    peers: Peers<TcpStream>,
    events: VecDeque<TransportEvent>,
}

impl TcpServer {
    fn bind(
        kind: &'static str,
        addr: SocketAddr,
        family: Family,
        reactor: &mut dyn Reactor,
    ) -> Result<Self> {
        let socket = new_socket(&addr)?;
        socket.set_reuse_address(true)?;
        if family == Family::V6 {
            socket.set_only_v6(true)?;
        }
        socket
            .bind(&addr.into())
            .map_err(|e| Error::with_source(ErrorKind::ConnectionError(format!("bind {}", addr)), e))?;
        socket.listen(BACKLOG)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;
        reactor.register_read(listener.as_raw_fd(), LISTENER)?;
        log::info!("listening on {}:{}", kind, local_addr);

        let mut events = VecDeque::new();
        events.push_back(TransportEvent::Status {
            status: TransportStatus::Connected,
            message: format!("listening on {}", local_addr),
        });

        Ok(TcpServer {
            kind,
            listener: Some(listener),
            local_addr,
            peers: Peers::new(LISTENER + 1),
            events,
        })
    }

    fn accept(&mut self, reactor: &mut dyn Reactor) -> Result<()> {
        loop {
            let listener = match self.listener.as_ref() {
                Some(l) => l,
                None => return Ok(()),
            };
            match listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    let name = peer_name(&addr);
                    self.peers.add(reactor, stream, name, &mut self.events)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // a peer that reset before we accepted is not fatal
                    self.events.push_back(TransportEvent::Status {
                        status: TransportStatus::Warning,
                        message: format!("accept failed: {}", e),
                    });
                    return Ok(());
                }
            }
        }
    }
}

impl Transport for TcpServer {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Server
    }

    fn address(&self) -> String {
        self.local_addr.to_string()
    }

    fn state(&self) -> ConnectionState {
        match self.listener {
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
        let client = client.ok_or_else(|| {
            Error::from(ErrorKind::ConnectionError("server send needs a client".into()))
        })?;
        self.peers.send(reactor, client, message)
    }

    fn handle(
        &mut self,
        reactor: &mut dyn Reactor,
        token: Token,
        readiness: Readiness,
    ) -> Result<()> {
        if token == LISTENER {
            if readiness.readable {
                self.accept(reactor)?;
            }
            return Ok(());
        }
        self.peers.handle(reactor, token, readiness, &mut self.events);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    fn client_name(&self, client: ClientId) -> Option<&str> {
        self.peers.name(client)
    }

    fn has_pending_output(&self) -> bool {
        self.peers.has_pending_output()
    }

    fn close(&mut self, reactor: &mut dyn Reactor) {
        if let Some(listener) = self.listener.take() {
            reactor.cancel(listener.as_raw_fd());
            log::debug!("closed {}:{}", self.kind, self.local_addr);
        }
        self.peers.close_all(reactor);
    }
}

/// Outgoing connection to a server.
#[derive(Debug)]
pub struct TcpClient {
    kind: &'static str,
    remote: SocketAddr,
    peer: StreamPeer<TcpStream>,
    events: VecDeque<TransportEvent>,
}

impl TcpClient {
    fn connect(kind: &'static str, remote: SocketAddr, reactor: &mut dyn Reactor) -> Result<Self> {
        let socket = new_socket(&remote)?;
        let mut conn = Connection::new();

        let pending = match socket.connect(&remote.into()) {
            Ok(()) => false,
            Err(ref e)
                if e.raw_os_error() == Some(libc::EINPROGRESS)
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                true
            }
            Err(e) => {
                return Err(Error::with_source(
                    ErrorKind::ConnectionError(format!("connect to {}", remote)),
                    e,
                ))
            }
        };

        let stream: TcpStream = socket.into();
        stream.set_nodelay(true)?;
        let fd = stream.as_raw_fd();
        let mut events = VecDeque::new();

        if pending {
            conn.set_connecting();
            reactor.register_write(fd, 0)?;
            log::debug!("connecting to {}:{}", kind, remote);
        } else {
            conn.set_connected();
            reactor.register_read(fd, 0)?;
            events.push_back(TransportEvent::Status {
                status: TransportStatus::Connected,
                message: format!("connected to {}", remote),
            });
        }

        Ok(TcpClient {
            kind,
            remote,
            peer: StreamPeer::new(stream, 0, conn),
            events,
        })
    }

    /// Completion of a non-blocking connect.
    fn finish_connect(&mut self, reactor: &mut dyn Reactor) -> Result<()> {
        let outcome = match self.peer.socket() {
            Some(s) => s.take_error()?,
            None => return Ok(()),
        };
        match outcome {
            None => {
                self.peer.conn.set_connected();
                let fd = self.peer.fd();
                reactor.register_read(fd, 0)?;
                if !self.peer.conn.has_pending_output() {
                    reactor.unregister_write(fd);
                }
                log::debug!("connected to {}:{}", self.kind, self.remote);
                self.events.push_back(TransportEvent::Status {
                    status: TransportStatus::Connected,
                    message: format!("connected to {}", self.remote),
                });
            }
            Some(e) => {
                self.peer.teardown(reactor, Some(e.to_string()));
                self.events.push_back(TransportEvent::Status {
                    status: TransportStatus::Error,
                    message: format!("connect to {} failed: {}", self.remote, e),
                });
            }
        }
        Ok(())
    }

    fn lost(&mut self, e: Error) {
        let message = match e.kind() {
            ErrorKind::ConnectionClosed => format!("{} closed the connection", self.remote),
            _ => format!("connection to {} failed: {}", self.remote, e),
        };
        self.events.push_back(TransportEvent::Status {
            status: TransportStatus::Error,
            message,
        });
    }
}

impl Transport for TcpClient {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Client
    }

    fn address(&self) -> String {
        self.remote.to_string()
    }

    fn state(&self) -> ConnectionState {
        self.peer.conn.state().clone()
    }

    fn send(
        &mut self,
        reactor: &mut dyn Reactor,
        _client: Option<ClientId>,
        message: &Message,
    ) -> Result<()> {
        self.peer.queue(reactor, message)
    }

    fn handle(
        &mut self,
        reactor: &mut dyn Reactor,
        _token: Token,
        readiness: Readiness,
    ) -> Result<()> {
        if *self.peer.conn.state() == ConnectionState::Connecting {
            self.finish_connect(reactor)?;
            if !self.peer.is_open() {
                return Ok(());
            }
        }

        if readiness.readable {
            let result = self.peer.on_readable(reactor);
            drain_events(&mut self.peer.conn, None, &mut self.events);
            if let Err(e) = result {
                self.lost(e);
                return Ok(());
            }
        }
        if readiness.writable {
            if let Err(e) = self.peer.on_writable(reactor) {
                self.lost(e);
            }
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    fn client_name(&self, _client: ClientId) -> Option<&str> {
        None
    }

    fn has_pending_output(&self) -> bool {
        self.peer.conn.has_pending_output()
    }

    fn close(&mut self, reactor: &mut dyn Reactor) {
        if self.peer.is_open() {
            self.peer.teardown(reactor, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Poller;
    use std::time::{Duration, Instant};

    #[test]
    fn test_server_address() {
        let mut poller = Poller::new();
        let mut server = open_v4(TransportMode::Server, "127.0.0.1:0", &mut poller).unwrap();
        assert_eq!(server.kind(), "tcp4");
        assert!(server.address().starts_with("127.0.0.1:"));
        assert_ne!(server.address(), "127.0.0.1:0");
        assert!(matches!(
            server.poll_event(),
            Some(TransportEvent::Status {
                status: TransportStatus::Connected,
                ..
            })
        ));
        server.close(&mut poller);
        server.close(&mut poller);
        assert_eq!(server.state(), ConnectionState::Closed);
        assert!(poller.is_empty());
    }

    #[test]
    fn test_call_roundtrip() {
        let mut server_poller = Poller::new();
        let mut client_poller = Poller::new();
        let mut server = open_any(TransportMode::Server, "127.0.0.1:0", &mut server_poller).unwrap();
        let mut client =
            open_any(TransportMode::Client, &server.address(), &mut client_poller).unwrap();

        let call = Message::call(1, "ping", vec![]);
        client.send(&mut client_poller, None, &call).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = None;
        let mut connected = None;
        while received.is_none() {
            assert!(Instant::now() < deadline, "timed out");
            for (t, r) in client_poller.wait(Some(Duration::from_millis(10))).unwrap() {
                client.handle(&mut client_poller, t, r).unwrap();
            }
            for (t, r) in server_poller.wait(Some(Duration::from_millis(10))).unwrap() {
                server.handle(&mut server_poller, t, r).unwrap();
            }
            while let Some(event) = server.poll_event() {
                match event {
                    TransportEvent::ClientConnected { client, name } => {
                        assert!(!name.is_empty());
                        connected = Some(client);
                    }
                    TransportEvent::Message { client, message } => {
                        received = Some((client, message))
                    }
                    _ => {}
                }
            }
        }
        let (from, message) = received.unwrap();
        assert_eq!(from, connected);
        assert_eq!(message, call);
        assert!(server.client_name(from.unwrap()).is_some());
        assert_eq!(client.state(), ConnectionState::Connected);

        server
            .send(&mut server_poller, from, &Message::acknowledgement(1, None))
            .unwrap();
        let mut ack = None;
        while ack.is_none() {
            assert!(Instant::now() < deadline, "timed out");
            for (t, r) in server_poller.wait(Some(Duration::from_millis(10))).unwrap() {
                server.handle(&mut server_poller, t, r).unwrap();
            }
            for (t, r) in client_poller.wait(Some(Duration::from_millis(10))).unwrap() {
                client.handle(&mut client_poller, t, r).unwrap();
            }
            while let Some(event) = client.poll_event() {
                if let TransportEvent::Message { client: None, message } = event {
                    ack = Some(message);
                }
            }
        }
        assert_eq!(ack, Some(Message::acknowledgement(1, None)));

        client.close(&mut client_poller);
        let mut gone = false;
        while !gone {
            assert!(Instant::now() < deadline, "timed out");
            for (t, r) in server_poller.wait(Some(Duration::from_millis(10))).unwrap() {
                server.handle(&mut server_poller, t, r).unwrap();
            }
            while let Some(event) = server.poll_event() {
                if let TransportEvent::ClientDisconnected { client } = event {
                    assert_eq!(Some(client), from);
                    gone = true;
                }
            }
        }
        server.close(&mut server_poller);
    }

    #[test]
    fn test_connect_refused() {
        // grab a free port, then close it again
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut poller = Poller::new();
        let mut client = match open_any(
            TransportMode::Client,
            &format!("127.0.0.1:{}", port),
            &mut poller,
        ) {
            Ok(c) => c,
            Err(e) => {
                assert!(matches!(e.kind(), ErrorKind::ConnectionError(_)));
                return;
            }
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !client.state().is_finished() {
            assert!(Instant::now() < deadline, "timed out");
            for (t, r) in poller.wait(Some(Duration::from_millis(50))).unwrap() {
                client.handle(&mut poller, t, r).unwrap();
            }
        }
        assert!(matches!(
            client.poll_event(),
            Some(TransportEvent::Status {
                status: TransportStatus::Error,
                ..
            })
        ));
        assert!(client
            .send(&mut poller, None, &Message::call(1, "ping", vec![]))
            .is_err());
    }
}
