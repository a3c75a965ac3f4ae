//! Sans-IO implementation of the libapp wire protocol.
//!
//! This module holds the pure state machines the transports drive. They do
//! no I/O themselves, which keeps framing and correlation testable without
//! sockets.
//!
//! # Architecture
//!
//! - [`Connection`] buffers one stream connection: `handle_input()` feeds
//!   bytes read from a socket, `queue()` appends framed messages,
//!   `pending_output()`/`consume_output()` drain what the socket accepted and
//!   `poll_event()` yields decoded messages.
//! - [`Client`] correlates calls with their acknowledgements.
//! - [`protocol`] holds the framing functions both use.
//!
//! # Example
//!
//! ```no_run
//! use libapp::sansio::{Connection, ConnectionEvent};
//! use libapp::Message;
//! use std::io::{Read, Write};
//!
//! let mut conn = Connection::connected();
//! conn.queue(&Message::call(1, "ping", vec![]))?;
//!
//! // In your event loop (pseudo-code):
//! # let mut socket = std::io::Cursor::new(Vec::new());
//! # let mut buf = [0u8; 8192];
//! // 1. Send data
//! let n = socket.write(conn.pending_output())?;
//! conn.consume_output(n);
//!
//! // 2. Receive data
//! let n = socket.read(&mut buf)?;
//! conn.handle_input(&buf[..n])?;
//!
//! // 3. Process events
//! while let Some(event) = conn.poll_event() {
//!     // Handle event
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod connection;
pub mod protocol;
pub mod types;

pub use self::client::Client;
pub use self::connection::Connection;
pub use self::protocol::{parse_frame, serialize_message};
pub use self::types::{ClientEvent, ConnectionEvent, ConnectionState, ParseResult, Transmit};
