//! Target and schema resolution, and the options of the facades.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use libapp_parser::Config;

use crate::broker;
use crate::error::*;
use crate::interface::Symbols;
use crate::transport::{self, TransportMode};

/// `APPSERVER_<app>` overrides the listen or connect target of an app.
pub const SERVER_ENV_PREFIX: &str = "APPSERVER_";
/// `APPINTERFACE_<app>` overrides the interface file of an app.
pub const INTERFACE_ENV_PREFIX: &str = "APPINTERFACE_";
pub const DEFAULT_TRANSPORT: &str = "tcp";

/// Directory holding `AppInterface/<app>.interface`.
pub fn sysconfdir() -> &'static str {
    option_env!("SYSCONFDIR").unwrap_or("/usr/local/etc")
}

/// Where the interface file of `app` is read from.
pub fn interface_path(app: &str) -> PathBuf {
    match env::var_os(format!("{}{}", INTERFACE_ENV_PREFIX, app)) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(sysconfdir())
            .join("AppInterface")
            .join(format!("{}.interface", app)),
    }
}

fn server_env(app: &str) -> Option<String> {
    env::var(format!("{}{}", SERVER_ENV_PREFIX, app))
        .ok()
        .filter(|s| !s.is_empty())
}

/// A transport kind and a transport specific address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub transport: String,
    pub address: String,
}

impl Target {
    pub fn new<T: Into<String>, A: Into<String>>(transport: T, address: A) -> Self {
        Target {
            transport: transport.into(),
            address: address.into(),
        }
    }

    /// Split `kind:address`. Without a known transport kind in front the
    /// whole string is a `tcp` address, so `localhost:4242` keeps its port.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ErrorKind::InvalidAddress(s.to_string()).into());
        }
        if let Some((kind, address)) = s.split_once(':') {
            if let Some(definition) = transport::find(kind) {
                return Ok(Target::new(definition.name, address));
            }
        }
        Ok(Target::new(DEFAULT_TRANSPORT, s))
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Target::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.address)
    }
}

/// Work out where `app` listens or is reached.
///
/// In order: the explicit target, `APPSERVER_<app>`, and for clients a
/// `lookup` at the session broker reached through `broker`.
pub fn resolve_target(
    app: &str,
    explicit: Option<&str>,
    mode: TransportMode,
    broker_target: Option<&str>,
) -> Result<Target> {
    if let Some(target) = explicit {
        return Target::parse(target);
    }
    if let Some(target) = server_env(app) {
        log::debug!("{}: target from {}{}", app, SERVER_ENV_PREFIX, app);
        return Target::parse(&target);
    }
    match mode {
        TransportMode::Client => {
            let target = broker::lookup(app, broker_target)?;
            log::debug!("{}: target '{}' from the session broker", app, target);
            Target::parse(&target)
        }
        TransportMode::Server => Err(ErrorKind::AddressResolutionError(format!(
            "no listen address for {}, set {}{}",
            app, SERVER_ENV_PREFIX, app
        ))
        .into()),
    }
}

/// Where an interface schema comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InterfaceSource {
    /// `APPINTERFACE_<app>`, or the file under [`sysconfdir()`]
    #[default]
    Default,
    Path(PathBuf),
    Text(String),
}

impl InterfaceSource {
    pub fn load(&self, app: &str) -> Result<Config> {
        let loaded = match self {
            InterfaceSource::Default => Config::load(interface_path(app)),
            InterfaceSource::Path(path) => Config::load(path),
            InterfaceSource::Text(text) => Config::from_string(text),
        };
        Ok(loaded?)
    }
}

/// Options of [`AppClient`](crate::AppClient).
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Explicit target; resolved from the environment or the broker if
    /// unset
    pub name: Option<String>,
    pub interface: InterfaceSource,
    /// Native functions for the callbacks
    pub symbols: Symbols,
    /// Target of the session broker
    pub broker: Option<String>,
    /// Upper bound for each wait on an acknowledgement
    pub timeout: Option<Duration>,
}

/// Options of [`AppServer`](crate::AppServer).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Explicit listen target; `APPSERVER_<app>` if unset
    pub name: Option<String>,
    /// Register the listen address with the session broker
    pub register: bool,
    pub interface: InterfaceSource,
    /// Native functions for the calls
    pub symbols: Symbols,
    /// Target of the session broker
    pub broker: Option<String>,
    /// Makes `run_event_loop` return once set
    pub stop: Option<Arc<AtomicBool>>,
    /// Forget datagram peers silent for longer than this
    pub peer_timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse() {
        assert_eq!(
            Target::parse("tcp:localhost:4242").unwrap(),
            Target::new("tcp", "localhost:4242")
        );
        assert_eq!(
            Target::parse("localhost:4242").unwrap(),
            Target::new("tcp", "localhost:4242")
        );
        assert_eq!(
            Target::parse("UDP6:::1.4242").unwrap(),
            Target::new("udp6", "::1.4242")
        );
        assert_eq!(Target::parse("self:calc").unwrap(), Target::new("self", "calc"));
        assert_eq!(Target::parse("self:calc").unwrap().to_string(), "self:calc");
        assert!(Target::parse("  ").is_err());
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(
            resolve_target("ConfigTestA", Some("tcp4::4242"), TransportMode::Server, None)
                .unwrap(),
            Target::new("tcp4", ":4242")
        );

        env::set_var("APPSERVER_ConfigTestB", "self:config-test-b");
        assert_eq!(
            resolve_target("ConfigTestB", None, TransportMode::Client, None).unwrap(),
            Target::new("self", "config-test-b")
        );

        let e = resolve_target("ConfigTestC", None, TransportMode::Server, None).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::AddressResolutionError(_)));
    }

    #[test]
    fn test_interface_path() {
        assert_eq!(
            interface_path("ConfigTestD"),
            PathBuf::from(sysconfdir()).join("AppInterface/ConfigTestD.interface")
        );
        env::set_var("APPINTERFACE_ConfigTestE", "/tmp/e.interface");
        assert_eq!(
            interface_path("ConfigTestE"),
            PathBuf::from("/tmp/e.interface")
        );
    }

    #[test]
    fn test_interface_source() {
        let config = InterfaceSource::Text("[call::x]\n".into())
            .load("ConfigTestF")
            .unwrap();
        assert!(config.section("call::x").is_some());

        let e = InterfaceSource::Path("/nonexistent/x.interface".into())
            .load("ConfigTestF")
            .unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::SchemaLoadError(_)));
    }

    #[test]
    fn test_interface_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ConfigTestG.interface");
        std::fs::write(&path, "service=ConfigTestG\n[call::y]\nret=INT32\n").unwrap();

        let config = InterfaceSource::Path(path.clone()).load("ConfigTestG").unwrap();
        assert_eq!(config.get("call::y", "ret"), Some("INT32"));

        std::env::set_var("APPINTERFACE_ConfigTestG", &path);
        let config = InterfaceSource::Default.load("ConfigTestG").unwrap();
        assert_eq!(config.get("", "service"), Some("ConfigTestG"));
        std::env::remove_var("APPINTERFACE_ConfigTestG");
    }
}
