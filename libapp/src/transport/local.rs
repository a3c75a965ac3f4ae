//! In-process loopback transport, registered as `self`.
//!
//! A server publishes its address in a process-wide table. A client in the
//! same process looks the address up, creates a connected socket pair and
//! hands one end to the server, which adopts it like an accepted connection.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Mutex, OnceLock};

use super::stream::{drain_events, Peers, StreamPeer};
use super::{ClientId, Transport, TransportEvent, TransportMode, TransportStatus};
use crate::error::*;
use crate::message::Message;
use crate::reactor::{Reactor, Readiness, Token};
use crate::sansio::{Connection, ConnectionState};

const WAKE: Token = 0;
const PEER_NAME: &str = "self";

struct Endpoint {
    streams: Sender<UnixStream>,
    wake: UnixStream,
}

fn endpoints() -> &'static Mutex<HashMap<String, Endpoint>> {
    static ENDPOINTS: OnceLock<Mutex<HashMap<String, Endpoint>>> = OnceLock::new();
    ENDPOINTS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock() -> Result<std::sync::MutexGuard<'static, HashMap<String, Endpoint>>> {
    endpoints()
        .lock()
        .map_err(|_| ErrorKind::ConnectionError("endpoint table poisoned".into()).into())
}

pub(crate) fn open(
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
) -> Result<Box<dyn Transport>> {
    if address.is_empty() {
        return Err(ErrorKind::InvalidAddress(address.into()).into());
    }
    Ok(match mode {
        TransportMode::Server => Box::new(LocalServer::bind(address, reactor)?),
        TransportMode::Client => Box::new(LocalClient::connect(address, reactor)?),
    })
}

/// Server end of the loopback transport.
pub struct LocalServer {
    address: String,
    wake: Option<UnixStream>,
    incoming: Receiver<UnixStream>,
    peers: Peers<UnixStream>,
    events: VecDeque<TransportEvent>,
}

impl LocalServer {
    fn bind(address: &str, reactor: &mut dyn Reactor) -> Result<Self> {
        let (wake_tx, wake_rx) = UnixStream::pair()?;
        wake_tx.set_nonblocking(true)?;
        wake_rx.set_nonblocking(true)?;
        let (tx, rx) = mpsc::channel();

        {
            let mut table = lock()?;
            if table.contains_key(address) {
                return Err(ErrorKind::ConnectionError(format!(
                    "self:{} is already bound",
                    address
                ))
                .into());
            }
            table.insert(
                address.to_string(),
                Endpoint {
                    streams: tx,
                    wake: wake_tx,
                },
            );
        }

        reactor.register_read(wake_rx.as_raw_fd(), WAKE)?;
        log::info!("listening on self:{}", address);

        let mut events = VecDeque::new();
        events.push_back(TransportEvent::Status {
            status: TransportStatus::Connected,
            message: format!("listening on self:{}", address),
        });

        Ok(LocalServer {
            address: address.to_string(),
            wake: Some(wake_rx),
            incoming: rx,
            peers: Peers::new(WAKE + 1),
            events,
        })
    }

    fn accept(&mut self, reactor: &mut dyn Reactor) -> Result<()> {
        if let Some(wake) = self.wake.as_mut() {
            let mut buf = [0u8; 64];
            loop {
                match wake.read(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        }

        loop {
            match self.incoming.try_recv() {
                Ok(stream) => {
                    stream.set_nonblocking(true)?;
                    self.peers
                        .add(reactor, stream, PEER_NAME.to_string(), &mut self.events)?;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn unpublish(&self) {
        if let Ok(mut table) = endpoints().lock() {
            table.remove(&self.address);
        }
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        if self.wake.is_some() {
            self.unpublish();
        }
    }
}

impl Transport for LocalServer {
    fn kind(&self) -> &'static str {
        "self"
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Server
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    fn state(&self) -> ConnectionState {
        match self.wake {
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
        if token == WAKE {
            return self.accept(reactor);
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
        if let Some(wake) = self.wake.take() {
            reactor.cancel(wake.as_raw_fd());
            self.unpublish();
            log::debug!("closed self:{}", self.address);
        }
        self.peers.close_all(reactor);
    }
}

/// Client end of the loopback transport.
pub struct LocalClient {
    address: String,
    peer: StreamPeer<UnixStream>,
    events: VecDeque<TransportEvent>,
}

impl LocalClient {
    fn connect(address: &str, reactor: &mut dyn Reactor) -> Result<Self> {
        let (ours, theirs) = UnixStream::pair()?;
        ours.set_nonblocking(true)?;

        {
            let table = lock()?;
            let endpoint = table.get(address).ok_or_else(|| {
                Error::from(ErrorKind::ConnectionError(format!(
                    "nothing listening on self:{}",
                    address
                )))
            })?;
            endpoint
                .streams
                .send(theirs)
                .map_err(|_| ErrorKind::ConnectionError(format!("self:{} is gone", address)))?;
            match (&endpoint.wake).write(&[1]) {
                Ok(_) => {}
                // a full wake pipe already guarantees a wake-up
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        reactor.register_read(ours.as_raw_fd(), 0)?;
        log::debug!("connected to self:{}", address);

        let mut events = VecDeque::new();
        events.push_back(TransportEvent::Status {
            status: TransportStatus::Connected,
            message: format!("connected to self:{}", address),
        });

        Ok(LocalClient {
            address: address.to_string(),
            peer: StreamPeer::new(ours, 0, Connection::connected()),
            events,
        })
    }

    fn lost(&mut self, e: Error) {
        let message = match e.kind() {
            ErrorKind::ConnectionClosed => format!("self:{} closed the connection", self.address),
            _ => format!("connection to self:{} failed: {}", self.address, e),
        };
        self.events.push_back(TransportEvent::Status {
            status: TransportStatus::Error,
            message,
        });
    }
}

impl Transport for LocalClient {
    fn kind(&self) -> &'static str {
        "self"
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Client
    }

    fn address(&self) -> String {
        self.address.clone()
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
    fn test_unknown_endpoint() {
        let mut poller = Poller::new();
        match open(TransportMode::Client, "local-test-nobody", &mut poller) {
            Err(e) => assert!(matches!(e.kind(), ErrorKind::ConnectionError(_))),
            Ok(_) => panic!("connected to nothing"),
        }
        assert!(open(TransportMode::Client, "", &mut poller).is_err());
    }

    #[test]
    fn test_duplicate_and_release() {
        let mut poller = Poller::new();
        let mut server = open(TransportMode::Server, "local-test-dup", &mut poller).unwrap();
        assert!(open(TransportMode::Server, "local-test-dup", &mut poller).is_err());
        server.close(&mut poller);
        let server = open(TransportMode::Server, "local-test-dup", &mut poller).unwrap();
        drop(server);
        assert!(open(TransportMode::Server, "local-test-dup", &mut poller).is_ok());
    }

    #[test]
    fn test_roundtrip() {
        let mut server_poller = Poller::new();
        let mut client_poller = Poller::new();
        let mut server = open(TransportMode::Server, "local-test-rt", &mut server_poller).unwrap();
        let mut client = open(TransportMode::Client, "local-test-rt", &mut client_poller).unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);

        let call = Message::call(3, "ping", vec![]);
        client.send(&mut client_poller, None, &call).unwrap();
        for (t, r) in client_poller.wait(Some(Duration::from_secs(1))).unwrap() {
            client.handle(&mut client_poller, t, r).unwrap();
        }
        assert!(!client.has_pending_output());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut from = None;
        let mut received = None;
        while received.is_none() {
            assert!(Instant::now() < deadline, "timed out");
            for (t, r) in server_poller.wait(Some(Duration::from_millis(50))).unwrap() {
                server.handle(&mut server_poller, t, r).unwrap();
            }
            while let Some(event) = server.poll_event() {
                match event {
                    TransportEvent::ClientConnected { client, name } => {
                        assert_eq!(name, "self");
                        from = Some(client);
                    }
                    TransportEvent::Message { client, message } => {
                        assert_eq!(client, from);
                        received = Some(message);
                    }
                    _ => {}
                }
            }
        }
        assert_eq!(received, Some(call));
        assert_eq!(server.client_name(from.unwrap()), Some("self"));
        server.close(&mut server_poller);
    }
}
