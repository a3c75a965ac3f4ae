//! Core types for the sans-io connection state machines.

use std::net::SocketAddr;

use crate::error::Error;
use crate::message::{Message, MessageId, Reply};

/// Represents data to be transmitted over the network.
///
/// The stream transports take their bytes straight from a
/// [`Connection`](super::Connection)'s output buffer; datagram transports
/// queue one `Transmit` per framed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmit {
    /// Destination address (None for a connected socket)
    pub dst: Option<SocketAddr>,
    /// One framed message
    pub payload: Vec<u8>,
    /// Correlation id of the request carried, if it expects an answer
    pub request: Option<MessageId>,
}

impl Transmit {
    /// Create a new transmit for a connected socket
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            dst: None,
            payload,
            request: None,
        }
    }

    /// Create a new transmit with destination and payload for a datagram protocol
    pub fn new_with_dst(dst: SocketAddr, payload: Vec<u8>) -> Self {
        Self {
            dst: Some(dst),
            payload,
            request: None,
        }
    }

    /// Mark the transmit as carrying request `id`.
    pub fn with_request(mut self, id: MessageId) -> Self {
        self.request = Some(id);
        self
    }
}

/// Result of extracting one frame from a byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    /// A complete frame was found
    Complete {
        /// The frame body (without the length prefix)
        message: Vec<u8>,
        /// Number of bytes consumed from input (including the length prefix)
        consumed: usize,
    },
    /// More data is needed to complete the frame
    Incomplete {
        /// Minimum number of additional bytes needed
        needed: usize,
    },
    /// The buffer can not start a valid frame
    Invalid {
        /// Description of the parse error
        error: String,
    },
}

/// Lifecycle of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    /// A non-blocking connect was issued and write-readiness is awaited
    Connecting,
    Connected,
    Error(String),
    Closed,
}

impl ConnectionState {
    /// Whether the connection has been torn down.
    pub fn is_finished(&self) -> bool {
        matches!(self, ConnectionState::Error(_) | ConnectionState::Closed)
    }
}

/// Events emitted by a [`Connection`](super::Connection).
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A complete message was received
    Message(Message),
    /// A complete frame was received but could not be decoded; the frame was
    /// dropped and the connection is still usable
    Malformed(Error),
}

/// Events emitted by the client correlation state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A call was acknowledged
    Acknowledged {
        id: MessageId,
        /// The method that was called
        method: String,
        reply: Option<Reply>,
    },
    /// The connection went away before the acknowledgement arrived
    Abandoned {
        id: MessageId,
        /// The method that was called
        method: String,
    },
}
