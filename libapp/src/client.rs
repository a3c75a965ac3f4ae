//! The client facade.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::{resolve_target, ClientConfig, Target};
use crate::error::*;
use crate::interface::{CallContext, Interface};
use crate::message::{Message, MessageId, Reply};
use crate::reactor::{Poller, Reactor};
use crate::sansio::{self, ClientEvent};
use crate::transport::{self, Transport, TransportEvent, TransportMode, TransportStatus};
use crate::variant::{Variant, VariantType};

/// A connection to the server of one application.
///
/// ```rust,no_run
/// # fn main() -> libapp::Result<()> {
/// use libapp::{AppClient, Variant};
///
/// let mut client = AppClient::new("Calculator", Some("tcp:localhost:4242"))?;
/// let sum = client.call("add", &mut [Variant::Int32(2), Variant::Int32(3)])?;
/// assert_eq!(sum, Variant::Int32(5));
/// # Ok(())
/// # }
/// ```
pub struct AppClient {
    interface: Interface,
    poller: Poller,
    transport: Option<Box<dyn Transport>>,
    target: Target,
    calls: sansio::Client,
    /// Settled calls nobody has waited for yet
    outcomes: HashMap<MessageId, Outcome>,
    timeout: Option<Duration>,
}

#[derive(Debug)]
enum Outcome {
    Acknowledged(Option<Reply>),
    Abandoned,
    Failed(Error),
}

impl AppClient {
    /// Connect to `app`, at `name` if given, otherwise where
    /// `APPSERVER_<app>` or the session broker says.
    pub fn new(app: &str, name: Option<&str>) -> Result<Self> {
        Self::with_config(
            app,
            ClientConfig {
                name: name.map(String::from),
                ..Default::default()
            },
        )
    }

    pub fn with_config(app: &str, config: ClientConfig) -> Result<Self> {
        let schema = config.interface.load(app)?;
        let interface = Interface::new(TransportMode::Client, app, &schema, &config.symbols)?;

        let target = resolve_target(
            app,
            config.name.as_deref(),
            TransportMode::Client,
            config.broker.as_deref(),
        )?;
        let mut poller = Poller::new();
        let transport = transport::open(
            &target.transport,
            TransportMode::Client,
            &target.address,
            &mut poller,
        )?;
        log::debug!("{}: client for {}", app, target);

        Ok(AppClient {
            interface,
            poller,
            transport: Some(transport),
            target,
            calls: sansio::Client::new(),
            outcomes: HashMap::new(),
            timeout: config.timeout,
        })
    }

    pub fn app(&self) -> &str {
        self.interface.app()
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Number of acknowledgements received.
    pub fn acknowledgements(&self) -> u64 {
        self.calls.acknowledged()
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Call `method` and wait for its result.
    ///
    /// `args` holds one value per declared parameter. OUT and IN_OUT values
    /// returned by the server are written back into `args`.
    pub fn call(&mut self, method: &str, args: &mut [Variant]) -> Result<Variant> {
        let id = self.send_call(method, args)?;
        let (value, outputs) = self.wait(id)?;
        self.interface.store_outputs(method, args, outputs)?;
        match self.interface.remote_method(method)?.ret {
            VariantType::Void => Ok(Variant::Void),
            t => value.get_as(t),
        }
    }

    /// Send a call without waiting for it. Returns the id to [`wait`] on.
    ///
    /// The outcome of the call is kept until it is collected with [`wait`]
    /// or discarded with [`forget`]; every id returned must be passed to one
    /// of them.
    ///
    /// [`wait`]: AppClient::wait
    /// [`forget`]: AppClient::forget
    pub fn send_call(&mut self, method: &str, args: &[Variant]) -> Result<MessageId> {
        let wire = self.interface.marshal_call(method, args)?;
        let message = self.calls.call(method, wire, true);
        let id = message.id();
        if let Err(e) = self.send(&message) {
            self.calls.cancel(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Discard call `id` without waiting for it. A late acknowledgement is
    /// ignored. Returns whether the call was still known.
    pub fn forget(&mut self, id: MessageId) -> bool {
        let pending = self.calls.cancel(id);
        let settled = self.outcomes.remove(&id).is_some();
        pending || settled
    }

    /// Calls sent and not yet collected with [`wait`](AppClient::wait) or
    /// [`forget`](AppClient::forget).
    pub fn outstanding(&self) -> usize {
        self.calls.pending_count() + self.outcomes.len()
    }

    /// Send a call nobody acknowledges. Returns once the message is handed
    /// to the operating system.
    pub fn notify(&mut self, method: &str, args: &[Variant]) -> Result<()> {
        let wire = self.interface.marshal_call(method, args)?;
        let message = self.calls.call(method, wire, false);
        self.send(&message)?;
        self.flush()
    }

    pub fn status_get(&mut self, name: &str) -> Result<Variant> {
        let message = self.calls.status_get(name);
        self.request(message)
    }

    pub fn status_set(&mut self, name: &str, value: Variant) -> Result<Variant> {
        let message = self.calls.status_set(name, value);
        self.request(message)
    }

    fn request(&mut self, message: Message) -> Result<Variant> {
        let id = message.id();
        if let Err(e) = self.send(&message) {
            self.calls.cancel(id);
            return Err(e);
        }
        Ok(self.wait(id)?.0)
    }

    /// Drive the connection until the acknowledgement of `id` arrives.
    ///
    /// Returns the return value and the OUT/IN_OUT values. Callbacks from
    /// the server are executed meanwhile.
    pub fn wait(&mut self, id: MessageId) -> Result<(Variant, Vec<Variant>)> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            match self.outcomes.remove(&id) {
                Some(Outcome::Acknowledged(Some(reply))) => return reply.into_result(),
                Some(Outcome::Acknowledged(None)) => return Ok((Variant::Void, Vec::new())),
                Some(Outcome::Abandoned) => return Err(ErrorKind::ConnectionClosed.into()),
                Some(Outcome::Failed(e)) => return Err(e),
                None => {}
            }
            if !self.calls.is_pending(id) {
                return Err(ErrorKind::ConnectionError(format!(
                    "no outstanding call with id {}",
                    id
                ))
                .into());
            }

            let timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ErrorKind::Timeout.into());
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            self.turn(timeout)?;
        }
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::from(ErrorKind::ConnectionClosed))?;
        transport.send(&mut self.poller, None, message)
    }

    fn flush(&mut self) -> Result<()> {
        loop {
            match self.transport {
                Some(ref t) if t.state().is_finished() => {
                    return Err(ErrorKind::ConnectionClosed.into())
                }
                Some(ref t) if !t.has_pending_output() => return Ok(()),
                Some(_) => {}
                None => return Err(ErrorKind::ConnectionClosed.into()),
            }
            self.turn(self.timeout)?;
        }
    }

    /// One pass of the event loop.
    fn turn(&mut self, timeout: Option<Duration>) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::from(ErrorKind::ConnectionClosed))?;

        if !transport.state().is_finished() {
            for (token, readiness) in self.poller.wait(timeout)? {
                transport.handle(&mut self.poller, token, readiness)?;
            }
        }

        let mut messages = Vec::new();
        let mut dropped = Vec::new();
        while let Some(event) = transport.poll_event() {
            match event {
                TransportEvent::Status { status, message } => match status {
                    TransportStatus::Error => log::error!("{}: {}", self.target, message),
                    TransportStatus::Warning => log::warn!("{}: {}", self.target, message),
                    TransportStatus::Connected | TransportStatus::Info => {
                        log::debug!("{}: {}", self.target, message)
                    }
                },
                TransportEvent::Message { message, .. } => messages.push(message),
                TransportEvent::SendFailed { id, error, .. } => dropped.push((id, error)),
                TransportEvent::ClientConnected { .. } | TransportEvent::ClientDisconnected { .. } => {}
            }
        }
        let finished = transport.state().is_finished();

        for (id, error) in dropped {
            if self.calls.cancel(id) {
                log::warn!("{}: request {} was not sent: {}", self.target, id, error);
                let e = ErrorKind::ConnectionError(format!("request {} not sent: {}", id, error));
                self.outcomes.insert(id, Outcome::Failed(e.into()));
            }
        }
        for message in messages {
            self.on_message(message);
        }
        if finished {
            self.calls.abandon();
        }

        while let Some(event) = self.calls.poll_event() {
            match event {
                ClientEvent::Acknowledged { id, method, reply } => {
                    log::debug!("{}: {} acknowledged ({})", self.target, method, id);
                    self.outcomes.insert(id, Outcome::Acknowledged(reply));
                }
                ClientEvent::Abandoned { id, method } => {
                    log::debug!("{}: {} abandoned ({})", self.target, method, id);
                    self.outcomes.insert(id, Outcome::Abandoned);
                }
            }
        }
        Ok(())
    }

    fn on_message(&mut self, message: Message) {
        match message {
            Message::Acknowledgement { id, reply } => {
                if !self.calls.handle_acknowledgement(id, reply) {
                    log::warn!("{}: unexpected acknowledgement {}", self.target, id);
                }
            }
            Message::Call { id, method, args } => {
                let peer = self.target.to_string();
                let ctx = CallContext {
                    app: self.interface.app(),
                    mode: TransportMode::Client,
                    client: None,
                    peer: Some(&peer),
                };
                let result = match self.interface.can_call(&method, &peer) {
                    Ok(true) => self.interface.execute(&ctx, &method, args),
                    Ok(false) => Err(ErrorKind::PermissionDenied(method.clone()).into()),
                    Err(e) => Err(e),
                };
                let reply = match result {
                    Ok((value, outputs)) => Reply::Return { value, outputs },
                    Err(e) => {
                        log::warn!("{}: callback {} failed: {}", self.target, method, e);
                        Reply::error(e.kind())
                    }
                };
                if id != 0 {
                    self.acknowledge(id, reply);
                }
            }
            Message::StatusGet { id, name } | Message::StatusSet { id, name, .. } => {
                log::warn!("{}: status request for '{}' ignored", self.target, name);
                if id != 0 {
                    self.acknowledge(id, Reply::error(&ErrorKind::UnknownStatus(name)));
                }
            }
        }
    }

    fn acknowledge(&mut self, id: MessageId, reply: Reply) {
        if let Err(e) = self.send(&Message::acknowledgement(id, Some(reply))) {
            log::warn!("{}: could not acknowledge {}: {}", self.target, id, e);
        }
    }

    /// Close the connection. Outstanding calls fail with
    /// `ConnectionClosed`. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close(&mut self.poller);
            log::debug!("{}: closed", self.target);
        }
        self.calls.abandon();
        while let Some(event) = self.calls.poll_event() {
            if let ClientEvent::Abandoned { id, .. } = event {
                self.outcomes.insert(id, Outcome::Abandoned);
            }
        }
    }
}

impl Drop for AppClient {
    fn drop(&mut self) {
        self.close();
    }
}
