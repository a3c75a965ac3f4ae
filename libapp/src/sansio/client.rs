//! Call correlation for the client side.
//!
//! This module tracks outstanding calls without performing any I/O.

use std::collections::{HashMap, VecDeque};

use super::types::ClientEvent;
use crate::message::{CallArgument, Message, MessageId, Reply};
use crate::variant::Variant;

/// Sans-IO bookkeeping of calls awaiting an acknowledgement.
///
/// Any number of calls may be outstanding at once; acknowledgements are
/// matched by correlation id, in whatever order they arrive.
///
/// - `call()`: Build a call message, assigning a correlation id
/// - `handle_acknowledgement()`: Match an incoming acknowledgement
/// - `abandon()`: Give up on everything outstanding (connection lost)
/// - `poll_event()`: Get completed or abandoned calls
///
/// # Example
///
/// ```
/// use libapp::sansio::{Client, ClientEvent};
/// use libapp::{Message, Reply, Variant};
///
/// let mut client = Client::new();
/// let call = client.call("ping", vec![], true);
/// let id = call.id();
/// assert!(client.is_pending(id));
///
/// assert!(client.handle_acknowledgement(id, Some(Reply::value(Variant::Int32(1)))));
/// match client.poll_event() {
///     Some(ClientEvent::Acknowledged { method, .. }) => assert_eq!(method, "ping"),
///     e => panic!("unexpected event {:?}", e),
/// }
/// ```
#[derive(Debug)]
pub struct Client {
    next_id: MessageId,
    /// Method name per outstanding correlation id
    pending: HashMap<MessageId, String>,
    pending_events: VecDeque<ClientEvent>,
    acknowledged: u64,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            pending_events: VecDeque::new(),
            acknowledged: 0,
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id != 0 && !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Build a call message.
    ///
    /// When `acknowledge` is set the call gets a fresh correlation id and is
    /// tracked until its acknowledgement arrives; otherwise the id is `0`.
    pub fn call<S: Into<String>>(
        &mut self,
        method: S,
        args: Vec<CallArgument>,
        acknowledge: bool,
    ) -> Message {
        let method = method.into();
        let id = if acknowledge {
            let id = self.allocate_id();
            self.pending.insert(id, method.clone());
            id
        } else {
            0
        };
        Message::call(id, method, args)
    }

    /// Build a status query; it is tracked like a call to `name`.
    pub fn status_get<S: Into<String>>(&mut self, name: S) -> Message {
        let name = name.into();
        let id = self.allocate_id();
        self.pending.insert(id, name.clone());
        Message::StatusGet { id, name }
    }

    /// Build a status update; it is tracked like a call to `name`.
    pub fn status_set<S: Into<String>>(&mut self, name: S, value: Variant) -> Message {
        let name = name.into();
        let id = self.allocate_id();
        self.pending.insert(id, name.clone());
        Message::StatusSet { id, name, value }
    }

    /// Match an acknowledgement against the outstanding calls.
    ///
    /// Returns `false` for an id nobody is waiting for.
    pub fn handle_acknowledgement(&mut self, id: MessageId, reply: Option<Reply>) -> bool {
        match self.pending.remove(&id) {
            Some(method) => {
                self.acknowledged += 1;
                self.pending_events
                    .push_back(ClientEvent::Acknowledged { id, method, reply });
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Stop tracking `id` without an event, e.g. when it could not be sent.
    pub fn cancel(&mut self, id: MessageId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Abandon every outstanding call.
    pub fn abandon(&mut self) {
        let mut abandoned: Vec<_> = self.pending.drain().collect();
        abandoned.sort_by_key(|(id, _)| *id);
        for (id, method) in abandoned {
            self.pending_events
                .push_back(ClientEvent::Abandoned { id, method });
        }
    }

    /// Number of acknowledgements matched so far.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }

    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.pending_events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_new() {
        let mut client = Client::new();
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.acknowledged(), 0);
        assert!(client.poll_event().is_none());
    }

    #[test]
    fn test_no_acknowledgement_requested() {
        let mut client = Client::new();
        let m = client.call("notify", vec![], false);
        assert_eq!(m.id(), 0);
        assert_eq!(client.pending_count(), 0);
        assert!(!client.handle_acknowledgement(0, None));
    }

    #[test]
    fn test_out_of_order_acknowledgements() {
        let mut client = Client::new();
        let a = client.call("a", vec![], true).id();
        let b = client.call("b", vec![], true).id();
        assert_ne!(a, b);
        assert_eq!(client.pending_count(), 2);

        assert!(client.handle_acknowledgement(b, None));
        assert!(client.handle_acknowledgement(a, None));
        // duplicate acknowledgement
        assert!(!client.handle_acknowledgement(a, None));

        let methods: Vec<String> = std::iter::from_fn(|| client.poll_event())
            .map(|e| match e {
                ClientEvent::Acknowledged { method, .. } => method,
                e => panic!("unexpected event {:?}", e),
            })
            .collect();
        assert_eq!(methods, vec!["b", "a"]);
        assert_eq!(client.acknowledged(), 2);
    }

    #[test]
    fn test_id_wraps_around_zero() {
        let mut client = Client::new();
        client.next_id = MessageId::MAX;
        assert_eq!(client.call("x", vec![], true).id(), MessageId::MAX);
        assert_eq!(client.call("y", vec![], true).id(), 1);
    }

    #[test]
    fn test_abandon() {
        let mut client = Client::new();
        let a = client.call("a", vec![], true).id();
        let s = client.status_get("volume").id();
        client.abandon();
        assert_eq!(
            client.poll_event(),
            Some(ClientEvent::Abandoned {
                id: a,
                method: "a".into()
            })
        );
        assert_eq!(
            client.poll_event(),
            Some(ClientEvent::Abandoned {
                id: s,
                method: "volume".into()
            })
        );
        assert_eq!(client.pending_count(), 0);
    }
}
