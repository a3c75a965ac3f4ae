//! Per-connection buffering for stream transports.

use std::collections::VecDeque;

use super::protocol::{parse_frame, parse_message, serialize_message};
use super::types::{ConnectionEvent, ConnectionState, ParseResult};
use crate::error::*;
use crate::message::Message;

/// Sans-IO state of one stream connection.
///
/// Incoming bytes accumulate until a complete frame can be cut from the
/// front; outgoing frames accumulate until the socket accepts them.
///
/// - `handle_input()`: Feed bytes read from the socket
/// - `queue()`: Append a framed message to the output buffer
/// - `pending_output()` / `consume_output()`: Drain the output buffer
/// - `poll_event()`: Get decoded messages
///
/// # Example
///
/// ```
/// use libapp::sansio::{Connection, ConnectionEvent};
/// use libapp::Message;
///
/// let mut sender = Connection::connected();
/// let mut receiver = Connection::connected();
///
/// assert!(sender.queue(&Message::acknowledgement(7, None))?);
/// let bytes = sender.pending_output().to_vec();
/// assert!(sender.consume_output(bytes.len()));
///
/// receiver.handle_input(&bytes[..3])?;
/// assert!(receiver.poll_event().is_none());
/// receiver.handle_input(&bytes[3..])?;
/// match receiver.poll_event() {
///     Some(ConnectionEvent::Message(m)) => assert_eq!(m.id(), 7),
///     e => panic!("unexpected event {:?}", e),
/// }
/// # Ok::<(), libapp::Error>(())
/// ```
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    /// Incoming bytes not yet forming a complete frame
    recv_buf: Vec<u8>,
    /// Outgoing bytes not yet accepted by the socket
    send_buf: Vec<u8>,
    pending_events: VecDeque<ConnectionEvent>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Connection {
            state: ConnectionState::Init,
            recv_buf: Vec::new(),
            send_buf: Vec::new(),
            pending_events: VecDeque::new(),
        }
    }

    /// A connection whose socket is already established (accepted peers).
    pub fn connected() -> Self {
        Connection {
            state: ConnectionState::Connected,
            ..Self::new()
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn set_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn set_connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    /// Tear down after a socket error. Buffers are purged.
    pub fn fail<S: Into<String>>(&mut self, reason: S) {
        self.purge();
        self.state = ConnectionState::Error(reason.into());
    }

    /// Tear down after an orderly close. Buffers are purged.
    pub fn close(&mut self) {
        self.purge();
        self.state = ConnectionState::Closed;
    }

    fn purge(&mut self) {
        self.recv_buf = Vec::new();
        self.send_buf = Vec::new();
    }

    /// Process bytes read from the socket.
    ///
    /// Every complete frame is decoded into a `ConnectionEvent`. A frame
    /// that does not decode is reported as `ConnectionEvent::Malformed` and
    /// skipped. An error is returned only when the stream can not be
    /// resynchronized, after which the connection must be torn down.
    pub fn handle_input(&mut self, data: &[u8]) -> Result<()> {
        if self.state.is_finished() {
            return Err(ErrorKind::ConnectionClosed.into());
        }

        self.recv_buf.extend_from_slice(data);

        let mut start = 0;
        loop {
            match parse_frame(&self.recv_buf[start..]) {
                ParseResult::Complete { message, consumed } => {
                    start += consumed;
                    let event = match parse_message(&message) {
                        Ok(m) => ConnectionEvent::Message(m),
                        Err(e) => ConnectionEvent::Malformed(e),
                    };
                    self.pending_events.push_back(event);
                }
                ParseResult::Incomplete { .. } => break,
                ParseResult::Invalid { error } => {
                    self.recv_buf.drain(..start);
                    return Err(ErrorKind::MalformedEncoding(error).into());
                }
            }
        }

        // keep the unconsumed tail at the front of the buffer
        self.recv_buf.drain(..start);
        Ok(())
    }

    /// Append a framed message to the output buffer.
    ///
    /// Returns `true` when the buffer was empty before, i.e. when the caller
    /// has to start waiting for write-readiness.
    pub fn queue(&mut self, message: &Message) -> Result<bool> {
        if self.state.is_finished() {
            return Err(ErrorKind::ConnectionClosed.into());
        }
        let bytes = serialize_message(message)?;
        let was_empty = self.send_buf.is_empty();
        self.send_buf.extend_from_slice(&bytes);
        Ok(was_empty)
    }

    pub fn pending_output(&self) -> &[u8] {
        &self.send_buf
    }

    pub fn has_pending_output(&self) -> bool {
        !self.send_buf.is_empty()
    }

    /// Drop `n` bytes the socket accepted, sliding the rest to the front.
    ///
    /// Returns `true` once the output buffer is empty.
    pub fn consume_output(&mut self, n: usize) -> bool {
        let n = n.min(self.send_buf.len());
        self.send_buf.drain(..n);
        self.send_buf.is_empty()
    }

    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.pending_events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CallArgument, Direction};
    use crate::variant::Variant;

    fn add_call() -> (Message, Vec<u8>) {
        let m = Message::call(
            42,
            "add",
            vec![
                CallArgument::new(Direction::In, Variant::Int32(2)),
                CallArgument::new(Direction::InOut, Variant::String("xyz".into())),
            ],
        );
        let bytes = serialize_message(&m).unwrap();
        (m, bytes)
    }

    fn messages(conn: &mut Connection) -> Vec<Message> {
        let mut v = Vec::new();
        while let Some(event) = conn.poll_event() {
            match event {
                ConnectionEvent::Message(m) => v.push(m),
                ConnectionEvent::Malformed(e) => panic!("malformed: {:?}", e),
            }
        }
        v
    }

    #[test]
    fn test_split_reassembly() {
        let (m, bytes) = add_call();
        // inside the length prefix, inside the method name, inside an argument
        let name_at = 4 + 1 + 4 + 4 + 1;
        let arg_at = bytes.len() - 2;
        for split in [2, name_at, arg_at] {
            let mut conn = Connection::connected();
            conn.handle_input(&bytes[..split]).unwrap();
            assert!(messages(&mut conn).is_empty(), "split {}", split);
            conn.handle_input(&bytes[split..]).unwrap();
            assert_eq!(messages(&mut conn), vec![m.clone()], "split {}", split);
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let (m, bytes) = add_call();
        let mut conn = Connection::connected();
        for b in &bytes {
            conn.handle_input(std::slice::from_ref(b)).unwrap();
        }
        assert_eq!(messages(&mut conn), vec![m]);
    }

    #[test]
    fn test_several_frames_in_one_read() {
        let (m, bytes) = add_call();
        let ack = Message::acknowledgement(42, None);
        let mut buf = bytes.clone();
        buf.extend_from_slice(&serialize_message(&ack).unwrap());
        buf.extend_from_slice(&bytes[..5]);

        let mut conn = Connection::connected();
        conn.handle_input(&buf).unwrap();
        assert_eq!(messages(&mut conn), vec![m.clone(), ack]);

        conn.handle_input(&bytes[5..]).unwrap();
        assert_eq!(messages(&mut conn), vec![m]);
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let (m, bytes) = add_call();
        let mut buf = vec![0, 0, 0, 2, 77, 0];
        buf.extend_from_slice(&bytes);

        let mut conn = Connection::connected();
        conn.handle_input(&buf).unwrap();
        match conn.poll_event() {
            Some(ConnectionEvent::Malformed(e)) => {
                assert_eq!(*e.kind(), ErrorKind::UnknownMessageType(77))
            }
            e => panic!("unexpected event {:?}", e),
        }
        assert_eq!(messages(&mut conn), vec![m]);
        assert_eq!(*conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_oversized_frame_is_fatal() {
        let mut conn = Connection::connected();
        let e = conn.handle_input(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::MalformedEncoding(_)));
    }

    #[test]
    fn test_partial_write() {
        let mut conn = Connection::connected();
        assert!(conn.queue(&Message::acknowledgement(1, None)).unwrap());
        assert!(!conn.queue(&Message::acknowledgement(2, None)).unwrap());
        assert_eq!(conn.pending_output().len(), 18);

        assert!(!conn.consume_output(7));
        assert_eq!(conn.pending_output(), &[0, 1, 0, 0, 0, 5, 3, 0, 0, 0, 2]);
        assert!(conn.consume_output(11));
        assert!(!conn.has_pending_output());
    }

    #[test]
    fn test_close_purges() {
        let mut conn = Connection::connected();
        conn.queue(&Message::acknowledgement(1, None)).unwrap();
        conn.close();
        assert!(!conn.has_pending_output());
        assert_eq!(*conn.state(), ConnectionState::Closed);
        assert!(conn.queue(&Message::acknowledgement(2, None)).is_err());
        assert!(conn.handle_input(&[0]).is_err());
    }
}
