//! The session broker.
//!
//! The broker is an ordinary application called `Session`, reached through
//! this very library. Servers `register` the address they listen on, and
//! clients `lookup` the address of the application they want.
//!
//! [`SessionService`] is an in-memory implementation of the broker calls:
//!
//! ```rust,no_run
//! # fn main() -> libapp::Result<()> {
//! use libapp::broker::{SessionService, SESSION, SESSION_INTERFACE};
//! use libapp::{AppServer, InterfaceSource, ServerConfig};
//!
//! let service = SessionService::new();
//! let mut broker = AppServer::new(
//!     SESSION,
//!     ServerConfig {
//!         name: Some("tcp::4242".into()),
//!         interface: InterfaceSource::Text(SESSION_INTERFACE.into()),
//!         symbols: service.symbols(),
//!         ..Default::default()
//!     },
//! )?;
//! broker.run_event_loop()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::AppClient;
use crate::config::{ClientConfig, InterfaceSource};
use crate::error::*;
use crate::interface::Symbols;
use crate::variant::Variant;

/// Application name of the broker.
pub const SESSION: &str = "Session";

/// Interface of the broker.
pub const SESSION_INTERFACE: &str = "\
service=Session

[call::lookup]
ret=STRING
arg1=STRING,app

[call::register]
ret=INT32
arg1=STRING,app
arg2=STRING,name
";

/// How long a broker call may take.
const BROKER_TIMEOUT: Duration = Duration::from_secs(10);

fn connect(broker: Option<&str>) -> Result<AppClient> {
    AppClient::with_config(
        SESSION,
        ClientConfig {
            name: broker.map(String::from),
            interface: InterfaceSource::Text(SESSION_INTERFACE.into()),
            timeout: Some(BROKER_TIMEOUT),
            ..Default::default()
        },
    )
}

/// Ask the broker where `app` listens.
///
/// Looking up the broker itself fails at once; its address must come from
/// an explicit target or `APPSERVER_Session`.
pub fn lookup(app: &str, broker: Option<&str>) -> Result<String> {
    if app == SESSION {
        return Err(ErrorKind::AddressResolutionError(format!(
            "{} can not be looked up through itself",
            SESSION
        ))
        .into());
    }

    let resolve = |e: Error| {
        Error::with_source(
            ErrorKind::AddressResolutionError(format!("lookup of {} failed: {}", app, e)),
            e,
        )
    };
    let mut session = connect(broker).map_err(resolve)?;
    let target = session
        .call("lookup", &mut [Variant::from(app)])
        .map_err(resolve)?;
    String::try_from(&target)
}

/// Tell the broker that `app` listens at `target`. Returns the broker's
/// status code, `0` on success.
pub fn register(app: &str, target: &str, broker: Option<&str>) -> Result<i32> {
    let mut session = connect(broker)?;
    let status = session.call("register", &mut [Variant::from(app), Variant::from(target)])?;
    i32::try_from(&status)
}

/// In-memory table of registered applications.
#[derive(Debug, Clone, Default)]
pub struct SessionService {
    table: Arc<Mutex<HashMap<String, String>>>,
}

impl SessionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, app: &str, target: &str) -> Result<()> {
        let mut table = self.table.lock().map_err(|_| poisoned())?;
        log::info!("{} registered at {}", app, target);
        table.insert(app.to_string(), target.to_string());
        Ok(())
    }

    pub fn lookup(&self, app: &str) -> Result<String> {
        let table = self.table.lock().map_err(|_| poisoned())?;
        table
            .get(app)
            .cloned()
            .ok_or_else(|| ErrorKind::AddressResolutionError(format!("{} is not registered", app)).into())
    }

    /// Native functions serving [`SESSION_INTERFACE`].
    pub fn symbols(&self) -> Symbols {
        let lookup = self.clone();
        let register = self.clone();
        Symbols::new()
            .with(format!("{}_lookup", SESSION), move |_, args| {
                let app = String::try_from(&args[0])?;
                Ok(Variant::String(lookup.lookup(&app)?))
            })
            .with(format!("{}_register", SESSION), move |ctx, args| {
                let app = String::try_from(&args[0])?;
                let target = String::try_from(&args[1])?;
                log::debug!(
                    "registration of {} from {}",
                    app,
                    ctx.peer.unwrap_or("unknown peer")
                );
                register.register(&app, &target)?;
                Ok(Variant::Int32(0))
            })
    }
}

fn poisoned() -> Error {
    ErrorKind::Remote("session table poisoned".into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{CallContext, Interface};
    use crate::transport::TransportMode;
    use libapp_parser::Config;

    #[test]
    fn test_session_lookup_fails_fast() {
        let e = lookup(SESSION, None).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::AddressResolutionError(_)));
        let e = lookup(SESSION, Some("tcp:127.0.0.1:1")).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::AddressResolutionError(_)));
    }

    #[test]
    fn test_service_dispatch() {
        let service = SessionService::new();
        let config = Config::from_string(SESSION_INTERFACE).unwrap();
        let interface =
            Interface::new(TransportMode::Server, SESSION, &config, &service.symbols()).unwrap();
        let ctx = CallContext {
            app: SESSION,
            mode: TransportMode::Server,
            client: None,
            peer: Some("localhost"),
        };

        let mut args = [Variant::from("Calc"), Variant::from("tcp:localhost:4242")];
        assert_eq!(
            interface.dispatch(&ctx, "register", &mut args).unwrap(),
            Variant::Int32(0)
        );
        assert_eq!(service.lookup("Calc").unwrap(), "tcp:localhost:4242");
        assert_eq!(
            interface
                .dispatch(&ctx, "lookup", &mut [Variant::from("Calc")])
                .unwrap(),
            Variant::from("tcp:localhost:4242")
        );
        let e = interface
            .dispatch(&ctx, "lookup", &mut [Variant::from("Other")])
            .unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::AddressResolutionError(_)));
    }
}
