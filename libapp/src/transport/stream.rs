//! Socket plumbing shared by the stream transports (`tcp` and `self`).

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use super::{ClientId, TransportEvent, TransportStatus};
use crate::error::*;
use crate::message::Message;
use crate::reactor::{Reactor, Readiness, Token};
use crate::sansio::{Connection, ConnectionEvent, ConnectionState};

const READ_SIZE: usize = 4096;

pub(crate) trait Socket: Read + Write + AsRawFd {}

impl<T: Read + Write + AsRawFd> Socket for T {}

/// A non-blocking stream socket and its buffers.
///
/// The socket is either open and registered with the reactor, or gone;
/// every failure path goes through `teardown`.
#[derive(Debug)]
pub(crate) struct StreamPeer<S> {
    socket: Option<S>,
    token: Token,
    pub(crate) conn: Connection,
}

impl<S: Socket> StreamPeer<S> {
    pub(crate) fn new(socket: S, token: Token, conn: Connection) -> Self {
        StreamPeer {
            socket: Some(socket),
            token,
            conn,
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.socket.as_ref().map(|s| s.as_raw_fd()).unwrap_or(-1)
    }

    pub(crate) fn socket(&self) -> Option<&S> {
        self.socket.as_ref()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Read everything the socket has. Decoded messages stay queued in
    /// `conn`, also when an error is returned.
    ///
    /// Returns `ConnectionClosed` after an orderly shutdown by the peer.
    pub(crate) fn on_readable(&mut self, reactor: &mut dyn Reactor) -> Result<()> {
        let mut buf = [0u8; READ_SIZE];
        loop {
            let socket = match self.socket.as_mut() {
                Some(s) => s,
                None => return Err(ErrorKind::ConnectionClosed.into()),
            };
            match socket.read(&mut buf) {
                Ok(0) => {
                    self.teardown(reactor, None);
                    return Err(ErrorKind::ConnectionClosed.into());
                }
                Ok(n) => {
                    if let Err(e) = self.conn.handle_input(&buf[..n]) {
                        self.teardown(reactor, Some(e.to_string()));
                        return Err(e);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.teardown(reactor, Some(e.to_string()));
                    return Err(e.into());
                }
            }
        }
    }

    /// Write as much queued output as the socket accepts. Stops watching
    /// write-readiness once the queue is empty.
    pub(crate) fn on_writable(&mut self, reactor: &mut dyn Reactor) -> Result<()> {
        loop {
            let fd = self.fd();
            if !self.conn.has_pending_output() {
                reactor.unregister_write(fd);
                return Ok(());
            }
            let socket = match self.socket.as_mut() {
                Some(s) => s,
                None => return Err(ErrorKind::ConnectionClosed.into()),
            };
            match socket.write(self.conn.pending_output()) {
                Ok(0) => {
                    self.teardown(reactor, Some("zero-byte write".into()));
                    return Err(ErrorKind::ConnectionClosed.into());
                }
                Ok(n) => {
                    self.conn.consume_output(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.teardown(reactor, Some(e.to_string()));
                    return Err(e.into());
                }
            }
        }
    }

    /// Queue a message; write-readiness is requested when the queue was
    /// empty and the connection is up.
    pub(crate) fn queue(&mut self, reactor: &mut dyn Reactor, message: &Message) -> Result<()> {
        let was_empty = self.conn.queue(message)?;
        if was_empty && *self.conn.state() == ConnectionState::Connected {
            reactor.register_write(self.fd(), self.token)?;
        }
        Ok(())
    }

    /// Unregister, close the socket and purge the buffers.
    pub(crate) fn teardown(&mut self, reactor: &mut dyn Reactor, error: Option<String>) {
        if let Some(socket) = self.socket.take() {
            reactor.cancel(socket.as_raw_fd());
        }
        match error {
            Some(reason) => self.conn.fail(reason),
            None => self.conn.close(),
        }
    }
}

/// Move decoded messages from `conn` to the transport's event queue.
pub(crate) fn drain_events(
    conn: &mut Connection,
    client: Option<ClientId>,
    events: &mut VecDeque<TransportEvent>,
) {
    while let Some(event) = conn.poll_event() {
        match event {
            ConnectionEvent::Message(message) => {
                events.push_back(TransportEvent::Message { client, message })
            }
            ConnectionEvent::Malformed(e) => events.push_back(TransportEvent::Status {
                status: TransportStatus::Warning,
                message: format!("dropped malformed message: {}", e),
            }),
        }
    }
}

#[derive(Debug)]
struct Peer<S> {
    stream: StreamPeer<S>,
    client: ClientId,
    name: String,
}

/// The connected peers of a stream server.
#[derive(Debug)]
pub(crate) struct Peers<S> {
    peers: HashMap<Token, Peer<S>>,
    tokens: HashMap<ClientId, Token>,
    next_token: Token,
}

impl<S: Socket> Peers<S> {
    /// Tokens below `first_token` belong to the owner.
    pub(crate) fn new(first_token: Token) -> Self {
        Peers {
            peers: HashMap::new(),
            tokens: HashMap::new(),
            next_token: first_token,
        }
    }

    pub(crate) fn add(
        &mut self,
        reactor: &mut dyn Reactor,
        socket: S,
        name: String,
        events: &mut VecDeque<TransportEvent>,
    ) -> Result<ClientId> {
        let token = self.next_token;
        reactor.register_read(socket.as_raw_fd(), token)?;
        self.next_token += 1;

        let client = ClientId::next();
        log::debug!("client {} connected from {}", client, name);
        events.push_back(TransportEvent::ClientConnected {
            client,
            name: name.clone(),
        });
        self.peers.insert(
            token,
            Peer {
                stream: StreamPeer::new(socket, token, Connection::connected()),
                client,
                name,
            },
        );
        self.tokens.insert(client, token);
        Ok(client)
    }

    pub(crate) fn owns(&self, token: Token) -> bool {
        self.peers.contains_key(&token)
    }

    pub(crate) fn handle(
        &mut self,
        reactor: &mut dyn Reactor,
        token: Token,
        readiness: Readiness,
        events: &mut VecDeque<TransportEvent>,
    ) {
        let peer = match self.peers.get_mut(&token) {
            Some(p) => p,
            None => return,
        };

        let mut result = Ok(());
        if readiness.readable {
            result = peer.stream.on_readable(reactor);
            drain_events(&mut peer.stream.conn, Some(peer.client), events);
        }
        if result.is_ok() && readiness.writable {
            result = peer.stream.on_writable(reactor);
        }

        if let Err(e) = result {
            let client = peer.client;
            match e.kind() {
                ErrorKind::ConnectionClosed => {
                    log::debug!("client {} ({}) closed the connection", client, peer.name)
                }
                _ => events.push_back(TransportEvent::Status {
                    status: TransportStatus::Error,
                    message: format!("client {} ({}): {}", client, peer.name, e),
                }),
            }
            self.remove(reactor, client, events);
        }
    }

    fn remove(
        &mut self,
        reactor: &mut dyn Reactor,
        client: ClientId,
        events: &mut VecDeque<TransportEvent>,
    ) {
        if let Some(token) = self.tokens.remove(&client) {
            if let Some(mut peer) = self.peers.remove(&token) {
                peer.stream.teardown(reactor, None);
            }
            events.push_back(TransportEvent::ClientDisconnected { client });
        }
    }

    pub(crate) fn send(
        &mut self,
        reactor: &mut dyn Reactor,
        client: ClientId,
        message: &Message,
    ) -> Result<()> {
        let peer = self
            .tokens
            .get(&client)
            .and_then(|t| self.peers.get_mut(t))
            .ok_or_else(|| Error::from(ErrorKind::ConnectionClosed))?;
        peer.stream.queue(reactor, message)
    }

    pub(crate) fn name(&self, client: ClientId) -> Option<&str> {
        self.tokens
            .get(&client)
            .and_then(|t| self.peers.get(t))
            .map(|p| p.name.as_str())
    }

    pub(crate) fn has_pending_output(&self) -> bool {
        self.peers
            .values()
            .any(|p| p.stream.conn.has_pending_output())
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }

    pub(crate) fn close_all(&mut self, reactor: &mut dyn Reactor) {
        for (_, mut peer) in self.peers.drain() {
            peer.stream.teardown(reactor, None);
        }
        self.tokens.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Poller;
    use crate::sansio::serialize_message;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_peer_read_and_close() {
        let (mut remote, local) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();

        let mut poller = Poller::new();
        let mut events = VecDeque::new();
        let mut peers = Peers::new(1);
        let client = peers
            .add(&mut poller, local, "self".into(), &mut events)
            .unwrap();
        assert_eq!(peers.name(client), Some("self"));
        assert!(peers.owns(1));

        let bytes = serialize_message(&Message::call(5, "ping", vec![])).unwrap();
        remote.write_all(&bytes[..3]).unwrap();
        let readable = Readiness {
            readable: true,
            writable: false,
        };
        peers.handle(&mut poller, 1, readable, &mut events);
        remote.write_all(&bytes[3..]).unwrap();
        peers.handle(&mut poller, 1, readable, &mut events);

        assert!(matches!(
            events.pop_front(),
            Some(TransportEvent::ClientConnected { .. })
        ));
        match events.pop_front() {
            Some(TransportEvent::Message {
                client: Some(c),
                message,
            }) => {
                assert_eq!(c, client);
                assert_eq!(message, Message::call(5, "ping", vec![]));
            }
            e => panic!("unexpected event {:?}", e),
        }

        drop(remote);
        peers.handle(&mut poller, 1, readable, &mut events);
        assert!(matches!(
            events.pop_front(),
            Some(TransportEvent::ClientDisconnected { client: c }) if c == client
        ));
        assert_eq!(peers.len(), 0);
        assert!(poller.is_empty());
        assert!(peers
            .send(&mut poller, client, &Message::acknowledgement(5, None))
            .is_err());
    }

    #[test]
    fn test_peer_write() {
        let (mut remote, local) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();

        let mut poller = Poller::new();
        let mut events = VecDeque::new();
        let mut peers = Peers::new(1);
        let client = peers
            .add(&mut poller, local, "self".into(), &mut events)
            .unwrap();

        let ack = Message::acknowledgement(5, None);
        peers.send(&mut poller, client, &ack).unwrap();
        assert!(peers.has_pending_output());

        let ready = poller.wait(Some(std::time::Duration::from_secs(1))).unwrap();
        for (token, readiness) in ready {
            peers.handle(&mut poller, token, readiness, &mut events);
        }
        assert!(!peers.has_pending_output());

        let mut buf = [0u8; 9];
        remote.read_exact(&mut buf).unwrap();
        assert_eq!(buf.to_vec(), serialize_message(&ack).unwrap());
    }
}
