//!Typed inter-process calls over pluggable transports.
//!
//!An application describes the calls its server executes, and the callbacks
//!its clients execute, in an interface file. E.g.
//!`/usr/local/etc/AppInterface/Calculator.interface`:
//!
//!```ini
//!service=Calculator
//!
//![call::add]
//!ret=INT32
//!arg1=INT32,a
//!arg2=INT32,b
//!```
//!
//!The server provides a native function `<app>_<method>` for every call,
//!either by hand or through the code `appbroker` generates:
//!
//!```rust,no_run
//!# fn main() -> libapp::Result<()> {
//!use libapp::{AppServer, ServerConfig, Symbols, Variant};
//!
//!let symbols = Symbols::new().with("Calculator_add", |_ctx, args| {
//!    let a = i32::try_from(&args[0])?;
//!    let b = i32::try_from(&args[1])?;
//!    Ok(Variant::Int32(a + b))
//!});
//!
//!let mut server = AppServer::new(
//!    "Calculator",
//!    ServerConfig {
//!        name: Some("tcp:localhost:4242".into()),
//!        symbols,
//!        ..Default::default()
//!    },
//!)?;
//!server.run_event_loop()?;
//!# Ok(())
//!# }
//!```
//!
//!and a client calls it:
//!
//!```rust,no_run
//!# fn main() -> libapp::Result<()> {
//!use libapp::{AppClient, Variant};
//!
//!let mut client = AppClient::new("Calculator", Some("tcp:localhost:4242"))?;
//!let sum = client.call("add", &mut [Variant::Int32(2), Variant::Int32(3)])?;
//!assert_eq!(sum, Variant::Int32(5));
//!# Ok(())
//!# }
//!```
//!
//!Without an explicit target, `APPSERVER_<app>` is consulted, and clients
//!finally ask the session broker (see [`broker`]).
//!
//!Messages travel as a big-endian `u32` length followed by one serialized
//![`Message`]. The available transports are listed by
//![`transport::transports()`]: `tcp`, `tcp4`, `tcp6`, `udp`, `udp4`, `udp6`
//!and the in-process `self`.

pub mod broker;
mod client;
pub mod config;
mod error;
pub mod interface;
pub mod message;
pub mod reactor;
pub mod sansio;
mod server;
pub mod status;
pub mod transport;
mod variant;

pub use crate::client::AppClient;
pub use crate::config::{ClientConfig, InterfaceSource, ServerConfig, Target};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::interface::{CallContext, Interface, NativeFn, SymbolResolver, Symbols};
pub use crate::message::{CallArgument, Direction, Message, MessageId, MessageType, Reply};
pub use crate::server::AppServer;
pub use crate::status::AppStatus;
pub use crate::transport::{ClientId, TransportMode};
pub use crate::variant::{Variant, VariantType};
