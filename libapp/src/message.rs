//! Message codec.
//!
//! Every message starts with a one byte type tag followed by a big-endian
//! `u32` correlation id. A correlation id of `0` on a call means no
//! acknowledgement is wanted.
//!
//! | type              | body                                                        |
//! |-------------------|-------------------------------------------------------------|
//! | `STATUS_GET`      | id, name                                                    |
//! | `STATUS_SET`      | id, name, tag, value                                        |
//! | `CALL`            | id, method, { direction, tag, value } until the end         |
//! | `ACKNOWLEDGEMENT` | id, optional reply                                          |
//!
//! Strings are length-prefixed like [`Variant::String`].

use std::convert::TryFrom;

use crate::error::*;
use crate::variant::{Variant, VariantType};

pub type MessageId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    StatusGet = 0,
    StatusSet = 1,
    Call = 2,
    Acknowledgement = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(MessageType::StatusGet),
            1 => Ok(MessageType::StatusSet),
            2 => Ok(MessageType::Call),
            3 => Ok(MessageType::Acknowledgement),
            t => Err(ErrorKind::UnknownMessageType(t).into()),
        }
    }
}

/// Which message(s) carry a parameter's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    fn tag(self) -> u8 {
        match self {
            Direction::In => 0,
            Direction::InOut => 1,
            Direction::Out => 2,
        }
    }

    /// Whether the value travels with the request.
    pub fn is_input(self) -> bool {
        self != Direction::Out
    }

    /// Whether the value travels back with the reply.
    pub fn is_output(self) -> bool {
        self != Direction::In
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallArgument {
    pub direction: Direction,
    pub value: Variant,
}

impl CallArgument {
    pub fn new(direction: Direction, value: Variant) -> Self {
        CallArgument { direction, value }
    }

    pub fn input(value: Variant) -> Self {
        CallArgument::new(Direction::In, value)
    }
}

/// The outcome of a call, returned inside an acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The return value and the OUT/IN_OUT values in declared order.
    Return { value: Variant, outputs: Vec<Variant> },
    Error { code: u8, message: String },
}

impl Reply {
    pub fn value(value: Variant) -> Self {
        Reply::Return {
            value,
            outputs: Vec::new(),
        }
    }

    pub fn error(kind: &ErrorKind) -> Self {
        let (code, message) = kind.to_reply();
        Reply::Error { code, message }
    }

    /// Turn a reply into the caller's result.
    pub fn into_result(self) -> Result<(Variant, Vec<Variant>)> {
        match self {
            Reply::Return { value, outputs } => Ok((value, outputs)),
            Reply::Error { code, message } => Err(ErrorKind::from_reply(code, message).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    StatusGet {
        id: MessageId,
        name: String,
    },
    StatusSet {
        id: MessageId,
        name: String,
        value: Variant,
    },
    Call {
        id: MessageId,
        method: String,
        args: Vec<CallArgument>,
    },
    Acknowledgement {
        id: MessageId,
        reply: Option<Reply>,
    },
}

impl Message {
    pub fn call<S: Into<String>>(id: MessageId, method: S, args: Vec<CallArgument>) -> Self {
        Message::Call {
            id,
            method: method.into(),
            args,
        }
    }

    pub fn acknowledgement(id: MessageId, reply: Option<Reply>) -> Self {
        Message::Acknowledgement { id, reply }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::StatusGet { .. } => MessageType::StatusGet,
            Message::StatusSet { .. } => MessageType::StatusSet,
            Message::Call { .. } => MessageType::Call,
            Message::Acknowledgement { .. } => MessageType::Acknowledgement,
        }
    }

    pub fn id(&self) -> MessageId {
        match *self {
            Message::StatusGet { id, .. }
            | Message::StatusSet { id, .. }
            | Message::Call { id, .. }
            | Message::Acknowledgement { id, .. } => id,
        }
    }
}

fn put_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    Variant::String(s.to_string()).encode(buf)
}

fn put_value(buf: &mut Vec<u8>, v: &Variant) -> Result<()> {
    buf.push(v.variant_type().tag());
    v.encode(buf)
}

/// Serialize a message without framing.
pub fn serialize(message: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(32);
    buf.push(message.message_type() as u8);
    buf.extend_from_slice(&message.id().to_be_bytes());

    match message {
        Message::StatusGet { name, .. } => put_string(&mut buf, name)?,
        Message::StatusSet { name, value, .. } => {
            put_string(&mut buf, name)?;
            put_value(&mut buf, value)?;
        }
        Message::Call { method, args, .. } => {
            put_string(&mut buf, method)?;
            for arg in args.iter().filter(|a| a.direction.is_input()) {
                buf.push(arg.direction.tag());
                put_value(&mut buf, &arg.value)?;
            }
        }
        Message::Acknowledgement { reply: None, .. } => {}
        Message::Acknowledgement {
            reply: Some(Reply::Return { value, outputs }),
            ..
        } => {
            buf.push(0);
            put_value(&mut buf, value)?;
            let n = u8::try_from(outputs.len()).map_err(|_| {
                ErrorKind::MalformedEncoding(format!("too many output values: {}", outputs.len()))
            })?;
            buf.push(n);
            for v in outputs {
                put_value(&mut buf, v)?;
            }
        }
        Message::Acknowledgement {
            reply: Some(Reply::Error { code, message }),
            ..
        } => {
            buf.push(1);
            buf.push(*code);
            put_string(&mut buf, message)?;
        }
    }
    Ok(buf)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn eof(&self) -> Error {
        ErrorKind::MalformedEncoding(format!("unexpected end of message at byte {}", self.pos))
            .into()
    }

    fn u8(&mut self) -> Result<u8> {
        let b = *self.remaining().first().ok_or_else(|| self.eof())?;
        self.pos += 1;
        Ok(b)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.remaining().get(..4).ok_or_else(|| self.eof())?;
        self.pos += 4;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn value(&mut self, t: VariantType) -> Result<Variant> {
        let (v, n) = Variant::decode(self.remaining(), t)?;
        self.pos += n;
        Ok(v)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let data = self.remaining().get(..len).ok_or_else(|| self.eof())?;
        let s = std::str::from_utf8(data).map_err(|e| {
            Error::with_source(ErrorKind::MalformedEncoding("invalid UTF-8".into()), e)
        })?;
        self.pos += len;
        Ok(s.to_string())
    }

    fn tagged_value(&mut self) -> Result<Variant> {
        let tag = self.u8()?;
        let t = VariantType::from_tag(tag).ok_or_else(|| {
            Error::from(ErrorKind::MalformedEncoding(format!(
                "unknown value type {}",
                tag
            )))
        })?;
        self.value(t)
    }

    fn direction(&mut self) -> Result<Direction> {
        match self.u8()? {
            0 => Ok(Direction::In),
            1 => Ok(Direction::InOut),
            d => Err(ErrorKind::MalformedEncoding(format!("invalid argument direction {}", d)).into()),
        }
    }

    fn finish<T>(&self, v: T) -> Result<T> {
        if self.is_empty() {
            Ok(v)
        } else {
            Err(ErrorKind::MalformedEncoding(format!(
                "{} trailing bytes",
                self.buf.len() - self.pos
            ))
            .into())
        }
    }
}

/// Deserialize one unframed message.
///
/// Any error in the argument stream rejects the whole message.
pub fn deserialize(bytes: &[u8]) -> Result<Message> {
    let mut r = Reader::new(bytes);
    let message_type = MessageType::try_from(r.u8()?)?;
    let id = r.u32()?;

    match message_type {
        MessageType::StatusGet => {
            let name = r.string()?;
            r.finish(Message::StatusGet { id, name })
        }
        MessageType::StatusSet => {
            let name = r.string()?;
            let value = r.tagged_value()?;
            r.finish(Message::StatusSet { id, name, value })
        }
        MessageType::Call => {
            let method = r.string()?;
            let mut args = Vec::new();
            while !r.is_empty() {
                let direction = r.direction()?;
                let value = r.tagged_value()?;
                args.push(CallArgument { direction, value });
            }
            Ok(Message::Call { id, method, args })
        }
        MessageType::Acknowledgement => {
            if r.is_empty() {
                return Ok(Message::Acknowledgement { id, reply: None });
            }
            let reply = match r.u8()? {
                0 => {
                    let value = r.tagged_value()?;
                    let n = r.u8()?;
                    let mut outputs = Vec::with_capacity(n as usize);
                    for _ in 0..n {
                        outputs.push(r.tagged_value()?);
                    }
                    Reply::Return { value, outputs }
                }
                1 => {
                    let code = r.u8()?;
                    let message = r.string()?;
                    Reply::Error { code, message }
                }
                s => {
                    return Err(
                        ErrorKind::MalformedEncoding(format!("invalid reply status {}", s)).into(),
                    )
                }
            };
            r.finish(Message::Acknowledgement {
                id,
                reply: Some(reply),
            })
        }
    }
}
