//! Transports move framed messages between a client and a server.
//!
//! The set of transports is closed and known at compile time. A transport is
//! picked by name from [`transports()`]:
//!
//! ```rust
//! let names: Vec<_> = libapp::transport::transports().iter().map(|t| t.name).collect();
//! assert!(names.contains(&"tcp"));
//! assert!(names.contains(&"self"));
//! ```

use std::ffi::CStr;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::*;
use crate::message::{Message, MessageId};
use crate::reactor::{Reactor, Readiness, Token};
use crate::sansio::ConnectionState;

pub mod local;
mod stream;
pub mod tcp;
pub mod udp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Server,
    Client,
}

/// Opaque identity of a peer connected to a server transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn next() -> ClientId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ClientId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Connected,
    Info,
    Warning,
    Error,
}

#[derive(Debug)]
pub enum TransportEvent {
    /// A condition the owner should know about, reported once
    Status {
        status: TransportStatus,
        message: String,
    },
    ClientConnected {
        client: ClientId,
        name: String,
    },
    ClientDisconnected {
        client: ClientId,
    },
    /// A message arrived; `client` is `None` on client transports
    Message {
        client: Option<ClientId>,
        message: Message,
    },
    /// A queued request could not be sent and was dropped
    SendFailed {
        client: Option<ClientId>,
        id: MessageId,
        error: String,
    },
}

/// One endpoint of a connection, in client or server role.
///
/// All methods return immediately. Sockets are registered with the
/// [`Reactor`] passed in, and readiness is handed back through
/// [`Transport::handle`]. Whatever happened is then available from
/// [`Transport::poll_event`].
pub trait Transport {
    /// Registry name of the transport.
    fn kind(&self) -> &'static str;
    fn mode(&self) -> TransportMode;
    /// The bound or connected address, in a form [`open`] accepts.
    fn address(&self) -> String;
    /// Client transports report their connection state; listening server
    /// transports report `Connected` until closed.
    fn state(&self) -> ConnectionState;
    /// Queue `message` for `client` (server role) or for the server
    /// (client role, `client` is ignored).
    fn send(
        &mut self,
        reactor: &mut dyn Reactor,
        client: Option<ClientId>,
        message: &Message,
    ) -> Result<()>;
    /// Process readiness reported by the reactor for one of our tokens.
    fn handle(&mut self, reactor: &mut dyn Reactor, token: Token, readiness: Readiness)
        -> Result<()>;
    fn poll_event(&mut self) -> Option<TransportEvent>;
    /// Display name of a connected peer.
    fn client_name(&self, client: ClientId) -> Option<&str>;
    /// Whether bytes are still waiting for the socket.
    fn has_pending_output(&self) -> bool;
    /// Drop peers that have been silent longer than `max_idle`. Only
    /// connectionless transports track idleness.
    fn expire_peers(&mut self, _max_idle: Duration) {}
    /// Tear everything down and unregister from `reactor`. Idempotent.
    fn close(&mut self, reactor: &mut dyn Reactor);
}

type OpenFn = fn(TransportMode, &str, &mut dyn Reactor) -> Result<Box<dyn Transport>>;

pub struct TransportDefinition {
    pub name: &'static str,
    pub description: &'static str,
    open: OpenFn,
}

impl TransportDefinition {
    pub fn open(
        &self,
        mode: TransportMode,
        address: &str,
        reactor: &mut dyn Reactor,
    ) -> Result<Box<dyn Transport>> {
        (self.open)(mode, address, reactor)
    }
}

impl fmt::Debug for TransportDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransportDefinition")
            .field("name", &self.name)
            .finish()
    }
}

static TRANSPORTS: [TransportDefinition; 7] = [
    TransportDefinition {
        name: "tcp",
        description: "TCP/IP stream, IPv4 or IPv6",
        open: tcp::open_any,
    },
    TransportDefinition {
        name: "tcp4",
        description: "TCP/IP stream, IPv4 only",
        open: tcp::open_v4,
    },
    TransportDefinition {
        name: "tcp6",
        description: "TCP/IP stream, IPv6 only",
        open: tcp::open_v6,
    },
    TransportDefinition {
        name: "udp",
        description: "UDP/IP datagrams, IPv4 or IPv6",
        open: udp::open_any,
    },
    TransportDefinition {
        name: "udp4",
        description: "UDP/IP datagrams, IPv4 only",
        open: udp::open_v4,
    },
    TransportDefinition {
        name: "udp6",
        description: "UDP/IP datagrams, IPv6 only",
        open: udp::open_v6,
    },
    TransportDefinition {
        name: "self",
        description: "In-process loopback",
        open: local::open,
    },
];

pub fn transports() -> &'static [TransportDefinition] {
    &TRANSPORTS
}

pub fn find(name: &str) -> Option<&'static TransportDefinition> {
    TRANSPORTS.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

/// Open the transport registered as `kind`.
pub fn open(
    kind: &str,
    mode: TransportMode,
    address: &str,
    reactor: &mut dyn Reactor,
) -> Result<Box<dyn Transport>> {
    let definition =
        find(kind).ok_or_else(|| ErrorKind::InvalidAddress(format!("unknown transport '{}'", kind)))?;
    log::debug!("opening {} transport {:?} for '{}'", definition.name, mode, address);
    definition.open(mode, address, reactor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    Any,
    V4,
    V6,
}

impl Family {
    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }
}

/// Split `host:port`. When the host part is an IPv6 literal (two or more
/// `:`), the port separator is `.` instead; `[host]:port` is accepted too.
pub(crate) fn split_host_port(address: &str) -> Result<(&str, u16)> {
    let invalid = || Error::from(ErrorKind::InvalidAddress(address.to_string()));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
        (host, port)
    } else if address.matches(':').count() >= 2 {
        address.rsplit_once('.').ok_or_else(invalid)?
    } else {
        address.rsplit_once(':').ok_or_else(invalid)?
    };

    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host, port))
}

/// Resolve a transport address to one socket address of the wanted family.
///
/// An empty host means the wildcard address for servers and loopback for
/// clients.
pub(crate) fn resolve(address: &str, mode: TransportMode, family: Family) -> Result<SocketAddr> {
    let (host, port) = split_host_port(address)?;

    if host.is_empty() {
        let ip = match (mode, family) {
            (TransportMode::Server, Family::V6) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            (TransportMode::Server, _) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            (TransportMode::Client, Family::V6) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            (TransportMode::Client, _) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };
        return Ok(SocketAddr::new(ip, port));
    }

    let candidates = (host, port).to_socket_addrs().map_err(|e| {
        Error::with_source(ErrorKind::AddressResolutionError(address.to_string()), e)
    })?;

    let mut candidates = candidates.filter(|a| family.accepts(a));
    candidates.next().ok_or_else(|| {
        ErrorKind::AddressResolutionError(format!("no {:?} address for '{}'", family, address))
            .into()
    })
}

/// Best-effort reverse lookup of a peer address; falls back to the numeric
/// form.
pub fn peer_name(addr: &SocketAddr) -> String {
    let sa = socket2::SockAddr::from(*addr);
    let mut host = [0 as libc::c_char; 1025];

    let ret = unsafe {
        libc::getnameinfo(
            sa.as_ptr() as *const libc::sockaddr,
            sa.len(),
            host.as_mut_ptr(),
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            0,
        )
    };

    if ret == 0 {
        let name = unsafe { CStr::from_ptr(host.as_ptr()) };
        if let Ok(name) = name.to_str() {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    addr.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("localhost:4242").unwrap(), ("localhost", 4242));
        assert_eq!(split_host_port(":4242").unwrap(), ("", 4242));
        assert_eq!(split_host_port("::1.4242").unwrap(), ("::1", 4242));
        assert_eq!(split_host_port("[::1]:4242").unwrap(), ("::1", 4242));
        assert_eq!(
            split_host_port("fe80::1:2.80").unwrap(),
            ("fe80::1:2", 80)
        );

        for bad in ["localhost", "localhost:", "localhost:http", "host:70000", "[::1]"] {
            match split_host_port(bad) {
                Err(e) => assert!(matches!(e.kind(), ErrorKind::InvalidAddress(_))),
                Ok(r) => panic!("'{}' split into {:?}", bad, r),
            }
        }
    }

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve("127.0.0.1:80", TransportMode::Client, Family::Any).unwrap(),
            "127.0.0.1:80".parse().unwrap()
        );
        assert_eq!(
            resolve(":80", TransportMode::Server, Family::Any).unwrap(),
            "0.0.0.0:80".parse().unwrap()
        );
        assert_eq!(
            resolve(":80", TransportMode::Client, Family::V6).unwrap(),
            "[::1]:80".parse().unwrap()
        );
        let e = resolve("127.0.0.1:80", TransportMode::Client, Family::V6).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::AddressResolutionError(_)));
    }

    #[test]
    fn test_registry() {
        assert_eq!(find("TCP").map(|t| t.name), Some("tcp"));
        assert_eq!(find("self").map(|t| t.name), Some("self"));
        assert!(find("sctp").is_none());

        let mut poller = crate::reactor::Poller::new();
        match open("sctp", TransportMode::Client, "x:1", &mut poller) {
            Err(e) => assert!(matches!(e.kind(), ErrorKind::InvalidAddress(_))),
            Ok(_) => panic!("opened unknown transport"),
        }
    }

    #[test]
    fn test_peer_name_falls_back() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let name = peer_name(&addr);
        assert!(name == "localhost" || name.starts_with("localhost") || name == "127.0.0.1");
    }
}
