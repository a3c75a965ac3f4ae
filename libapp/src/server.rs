//! The server facade.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broker;
use crate::config::{resolve_target, ServerConfig, Target};
use crate::error::*;
use crate::interface::{CallContext, Interface};
use crate::message::{CallArgument, Message, MessageId, Reply};
use crate::reactor::{Poller, Reactor};
use crate::status::AppStatus;
use crate::transport::{self, ClientId, Transport, TransportEvent, TransportMode, TransportStatus};
use crate::variant::Variant;

/// Length of one wait of [`AppServer::run_event_loop`].
const LOOP_SLICE: Duration = Duration::from_millis(100);

/// Serves the calls of one application.
///
/// ```rust,no_run
/// # fn main() -> libapp::Result<()> {
/// use libapp::{AppServer, InterfaceSource, ServerConfig, Symbols, Variant};
///
/// let symbols = Symbols::new().with("Calculator_add", |_, args| {
///     Ok(Variant::Int32(i32::try_from(&args[0])? + i32::try_from(&args[1])?))
/// });
/// let mut server = AppServer::new(
///     "Calculator",
///     ServerConfig {
///         name: Some("tcp::4242".into()),
///         interface: InterfaceSource::Text(
///             "[call::add]\nret=INT32\narg1=INT32\narg2=INT32\n".into(),
///         ),
///         symbols,
///         ..Default::default()
///     },
/// )?;
/// server.run_event_loop()?;
/// # Ok(())
/// # }
/// ```
pub struct AppServer {
    interface: Interface,
    poller: Poller,
    transport: Option<Box<dyn Transport>>,
    target: Target,
    clients: BTreeMap<ClientId, String>,
    stop: Arc<AtomicBool>,
    peer_timeout: Option<Duration>,
    acknowledgements: u64,
    registration: Option<Error>,
}

impl AppServer {
    /// Load the interface, start listening and, if asked to, register with
    /// the session broker.
    ///
    /// A failed registration is logged and kept in
    /// [`registration_error`](AppServer::registration_error); the server is
    /// usable regardless.
    pub fn new(app: &str, config: ServerConfig) -> Result<Self> {
        let schema = config.interface.load(app)?;
        let interface = Interface::new(TransportMode::Server, app, &schema, &config.symbols)?;

        let target = resolve_target(app, config.name.as_deref(), TransportMode::Server, None)?;
        let mut poller = Poller::new();
        let transport = transport::open(
            &target.transport,
            TransportMode::Server,
            &target.address,
            &mut poller,
        )?;
        let target = Target::new(transport.kind(), transport.address());
        log::info!("{}: serving on {}", app, target);

        let mut server = AppServer {
            interface,
            poller,
            transport: Some(transport),
            target,
            clients: BTreeMap::new(),
            stop: config.stop.unwrap_or_default(),
            peer_timeout: config.peer_timeout,
            acknowledgements: 0,
            registration: None,
        };

        if config.register {
            let address = server.target.to_string();
            match broker::register(app, &address, config.broker.as_deref()) {
                Ok(0) => log::debug!("{}: registered {}", app, address),
                Ok(status) => {
                    log::warn!("{}: registration returned {}", app, status);
                    server.registration = Some(
                        ErrorKind::Remote(format!("registration returned {}", status)).into(),
                    );
                }
                Err(e) => {
                    log::warn!("{}: registration failed: {}", app, e);
                    server.registration = Some(e);
                }
            }
        }

        Ok(server)
    }

    pub fn app(&self) -> &str {
        self.interface.app()
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn status(&self) -> &AppStatus {
        self.interface.status()
    }

    pub fn status_mut(&mut self) -> &mut AppStatus {
        self.interface.status_mut()
    }

    /// The bound address as a full target, e.g. `tcp:127.0.0.1:4242`.
    pub fn address(&self) -> String {
        self.target.to_string()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Number of acknowledgements sent.
    pub fn acknowledgements(&self) -> u64 {
        self.acknowledgements
    }

    pub fn registration_error(&self) -> Option<&Error> {
        self.registration.as_ref()
    }

    /// Connected clients and their display names.
    pub fn clients(&self) -> impl Iterator<Item = (ClientId, &str)> {
        self.clients.iter().map(|(c, n)| (*c, n.as_str()))
    }

    /// Setting the returned flag makes [`run_event_loop`] return.
    ///
    /// [`run_event_loop`]: AppServer::run_event_loop
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Serve until the stop flag is set or the transport fails.
    pub fn run_event_loop(&mut self) -> Result<()> {
        while !self.stop.load(Ordering::SeqCst) {
            self.run_once(Some(LOOP_SLICE))?;
        }
        log::debug!("{}: event loop stopped", self.app());
        Ok(())
    }

    /// Wait up to `timeout` for activity and process it.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::from(ErrorKind::ConnectionClosed))?;

        for (token, readiness) in self.poller.wait(timeout)? {
            transport.handle(&mut self.poller, token, readiness)?;
        }
        if let Some(max_idle) = self.peer_timeout {
            transport.expire_peers(max_idle);
        }

        let mut events = Vec::new();
        while let Some(event) = transport.poll_event() {
            events.push(event);
        }
        for event in events {
            self.on_event(event);
        }
        Ok(())
    }

    /// Ask `client` to execute a callback. Nothing is acknowledged.
    pub fn callback(&mut self, client: ClientId, method: &str, args: &[Variant]) -> Result<()> {
        let wire = self.interface.marshal_call(method, args)?;
        self.send(client, &Message::call(0, method, wire))
    }

    fn send(&mut self, client: ClientId, message: &Message) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::from(ErrorKind::ConnectionClosed))?;
        transport.send(&mut self.poller, Some(client), message)
    }

    fn on_event(&mut self, event: TransportEvent) {
        let app = self.interface.app();
        match event {
            TransportEvent::Status { status, message } => match status {
                TransportStatus::Error => log::error!("{}: {}", app, message),
                TransportStatus::Warning => log::warn!("{}: {}", app, message),
                TransportStatus::Connected | TransportStatus::Info => {
                    log::debug!("{}: {}", app, message)
                }
            },
            TransportEvent::ClientConnected { client, name } => {
                log::info!("{}: client {} connected from {}", app, client, name);
                self.clients.insert(client, name);
            }
            TransportEvent::ClientDisconnected { client } => {
                log::info!("{}: client {} disconnected", app, client);
                self.clients.remove(&client);
            }
            TransportEvent::Message {
                client: Some(client),
                message,
            } => self.on_message(client, message),
            TransportEvent::Message { client: None, .. } => {}
            TransportEvent::SendFailed { client, id, error } => {
                log::warn!("{}: request {} to {:?} dropped: {}", app, id, client, error)
            }
        }
    }

    fn on_message(&mut self, client: ClientId, message: Message) {
        match message {
            Message::Call { id, method, args } => {
                let reply = self.on_call(client, &method, args);
                if let Reply::Error { ref message, .. } = reply {
                    log::warn!("{}: {} from {} failed: {}", self.app(), method, client, message);
                }
                if id != 0 {
                    self.acknowledge(client, id, reply);
                }
            }
            Message::StatusGet { id, name } => {
                let reply = match self.interface.status().get(&name) {
                    Ok(v) => Reply::value(v.clone()),
                    Err(e) => Reply::error(e.kind()),
                };
                self.acknowledge(client, id, reply);
            }
            Message::StatusSet { id, name, value } => {
                let reply = match self.interface.status_mut().set(&name, value) {
                    Ok(v) => Reply::value(v.clone()),
                    Err(e) => Reply::error(e.kind()),
                };
                self.acknowledge(client, id, reply);
            }
            Message::Acknowledgement { id, .. } => {
                log::debug!("{}: acknowledgement {} from {}", self.app(), id, client);
            }
        }
    }

    fn on_call(&self, client: ClientId, method: &str, args: Vec<CallArgument>) -> Reply {
        let peer = self.clients.get(&client).map(String::as_str).unwrap_or("");
        let result = match self.interface.can_call(method, peer) {
            Ok(true) => {
                let ctx = CallContext {
                    app: self.interface.app(),
                    mode: TransportMode::Server,
                    client: Some(client),
                    peer: Some(peer),
                };
                self.interface.execute(&ctx, method, args)
            }
            Ok(false) => {
                log::warn!("{}: {} denied to '{}'", self.app(), method, peer);
                Err(ErrorKind::PermissionDenied(method.to_string()).into())
            }
            Err(e) => Err(e),
        };
        match result {
            Ok((value, outputs)) => Reply::Return { value, outputs },
            Err(e) => Reply::error(e.kind()),
        }
    }

    fn acknowledge(&mut self, client: ClientId, id: MessageId, reply: Reply) {
        match self.send(client, &Message::acknowledgement(id, Some(reply))) {
            Ok(()) => self.acknowledgements += 1,
            Err(e) => log::warn!("{}: could not acknowledge {} to {}: {}", self.app(), id, client, e),
        }
    }

    /// Stop listening and drop every client. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close(&mut self.poller);
            log::debug!("{}: closed {}", self.interface.app(), self.target);
        }
        self.clients.clear();
    }
}

impl Drop for AppServer {
    fn drop(&mut self) {
        self.close();
    }
}
