//! Typed values carried across the wire.
//!
//! A [`Variant`] holds exactly one primitive value. Fixed-width values are
//! encoded big-endian in their natural width; strings and buffers are
//! prefixed with their length as a big-endian `u32`.

use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

use crate::error::*;

/// The tag of a [`Variant`], as written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VariantType {
    Void = 0,
    Bool = 1,
    Int8 = 2,
    UInt8 = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    String = 10,
    Buffer = 11,
    Float = 12,
    Double = 13,
    Pointer = 14,
}

const TYPE_NAMES: [(VariantType, &str); 15] = [
    (VariantType::Void, "VOID"),
    (VariantType::Bool, "BOOL"),
    (VariantType::Int8, "INT8"),
    (VariantType::UInt8, "UINT8"),
    (VariantType::Int16, "INT16"),
    (VariantType::UInt16, "UINT16"),
    (VariantType::Int32, "INT32"),
    (VariantType::UInt32, "UINT32"),
    (VariantType::Int64, "INT64"),
    (VariantType::UInt64, "UINT64"),
    (VariantType::String, "STRING"),
    (VariantType::Buffer, "BUFFER"),
    (VariantType::Float, "FLOAT"),
    (VariantType::Double, "DOUBLE"),
    (VariantType::Pointer, "POINTER"),
];

impl VariantType {
    /// Decode a wire tag. `Pointer` is never accepted from the wire.
    pub fn from_tag(tag: u8) -> Option<Self> {
        TYPE_NAMES
            .iter()
            .map(|(t, _)| *t)
            .find(|t| *t as u8 == tag && *t != VariantType::Pointer)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        TYPE_NAMES[self as usize].1
    }

    /// Size of the encoded value, or `None` for length-prefixed types.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            VariantType::Void => Some(0),
            VariantType::Bool | VariantType::Int8 | VariantType::UInt8 => Some(1),
            VariantType::Int16 | VariantType::UInt16 => Some(2),
            VariantType::Int32 | VariantType::UInt32 | VariantType::Float => Some(4),
            VariantType::Int64 | VariantType::UInt64 | VariantType::Double => Some(8),
            VariantType::Pointer => Some(std::mem::size_of::<usize>()),
            VariantType::String | VariantType::Buffer => None,
        }
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            VariantType::Int8 | VariantType::Int16 | VariantType::Int32 | VariantType::Int64
        )
    }

    fn is_unsigned(self) -> bool {
        matches!(
            self,
            VariantType::UInt8 | VariantType::UInt16 | VariantType::UInt32 | VariantType::UInt64
        )
    }

    /// Whether every value of `self` is exactly representable as `target`.
    pub fn widens_to(self, target: VariantType) -> bool {
        use VariantType::*;

        if self == target {
            return true;
        }
        let (from, to) = match (self.fixed_size(), target.fixed_size()) {
            (Some(from), Some(to)) => (from, to),
            _ => return false,
        };
        match target {
            Int16 | Int32 | Int64 if self.is_signed() => from < to,
            Int16 | Int32 | Int64 if self.is_unsigned() => from < to,
            UInt16 | UInt32 | UInt64 if self.is_unsigned() => from < to,
            Float => matches!(self, Int8 | UInt8 | Int16 | UInt16),
            Double => matches!(self, Int8 | UInt8 | Int16 | UInt16 | Int32 | UInt32 | Float),
            _ => false,
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VariantType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TYPE_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(t, _)| *t)
            .ok_or_else(|| ErrorKind::SchemaLoadError(format!("Invalid type '{}'", s)).into())
    }
}

/// A tagged value of exactly one primitive kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    Void,
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    String(String),
    Buffer(Vec<u8>),
    Float(f32),
    Double(f64),
    /// An opaque native handle. It never leaves the process.
    Pointer(usize),
}

impl Default for Variant {
    fn default() -> Self {
        Variant::Void
    }
}

fn truncated(tag: VariantType, needed: usize, available: usize) -> Error {
    ErrorKind::MalformedEncoding(format!(
        "{} needs {} bytes, {} available",
        tag, needed, available
    ))
    .into()
}

fn take<const N: usize>(bytes: &[u8], tag: VariantType) -> Result<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|b| <[u8; N]>::try_from(b).ok())
        .ok_or_else(|| truncated(tag, N, bytes.len()))
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Void => VariantType::Void,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int8(_) => VariantType::Int8,
            Variant::UInt8(_) => VariantType::UInt8,
            Variant::Int16(_) => VariantType::Int16,
            Variant::UInt16(_) => VariantType::UInt16,
            Variant::Int32(_) => VariantType::Int32,
            Variant::UInt32(_) => VariantType::UInt32,
            Variant::Int64(_) => VariantType::Int64,
            Variant::UInt64(_) => VariantType::UInt64,
            Variant::String(_) => VariantType::String,
            Variant::Buffer(_) => VariantType::Buffer,
            Variant::Float(_) => VariantType::Float,
            Variant::Double(_) => VariantType::Double,
            Variant::Pointer(_) => VariantType::Pointer,
        }
    }

    /// The zero value of a type, used for OUT parameters before the callee
    /// fills them in.
    pub fn default_for(t: VariantType) -> Variant {
        match t {
            VariantType::Void => Variant::Void,
            VariantType::Bool => Variant::Bool(false),
            VariantType::Int8 => Variant::Int8(0),
            VariantType::UInt8 => Variant::UInt8(0),
            VariantType::Int16 => Variant::Int16(0),
            VariantType::UInt16 => Variant::UInt16(0),
            VariantType::Int32 => Variant::Int32(0),
            VariantType::UInt32 => Variant::UInt32(0),
            VariantType::Int64 => Variant::Int64(0),
            VariantType::UInt64 => Variant::UInt64(0),
            VariantType::String => Variant::String(String::new()),
            VariantType::Buffer => Variant::Buffer(Vec::new()),
            VariantType::Float => Variant::Float(0.0),
            VariantType::Double => Variant::Double(0.0),
            VariantType::Pointer => Variant::Pointer(0),
        }
    }

    /// Append the encoded value (without its tag) to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Variant::Void => {}
            Variant::Bool(v) => buf.push(u8::from(*v)),
            Variant::Int8(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Variant::UInt8(v) => buf.push(*v),
            Variant::Int16(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Variant::UInt16(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Variant::Int32(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Variant::UInt32(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Variant::Int64(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Variant::UInt64(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Variant::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Variant::Double(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Variant::String(v) => encode_bytes(buf, v.as_bytes())?,
            Variant::Buffer(v) => encode_bytes(buf, v)?,
            Variant::Pointer(_) => {
                return Err(ErrorKind::MalformedEncoding(
                    "pointers cannot be serialized".into(),
                )
                .into())
            }
        }
        Ok(())
    }

    /// Decode a value of type `tag` from the front of `bytes`, returning it
    /// together with the number of bytes consumed.
    pub fn decode(bytes: &[u8], tag: VariantType) -> Result<(Variant, usize)> {
        let v = match tag {
            VariantType::Void => return Ok((Variant::Void, 0)),
            VariantType::Bool => match take::<1>(bytes, tag)?[0] {
                0 => Variant::Bool(false),
                1 => Variant::Bool(true),
                b => {
                    return Err(
                        ErrorKind::MalformedEncoding(format!("invalid BOOL value {}", b)).into(),
                    )
                }
            },
            VariantType::Int8 => Variant::Int8(i8::from_be_bytes(take(bytes, tag)?)),
            VariantType::UInt8 => Variant::UInt8(u8::from_be_bytes(take(bytes, tag)?)),
            VariantType::Int16 => Variant::Int16(i16::from_be_bytes(take(bytes, tag)?)),
            VariantType::UInt16 => Variant::UInt16(u16::from_be_bytes(take(bytes, tag)?)),
            VariantType::Int32 => Variant::Int32(i32::from_be_bytes(take(bytes, tag)?)),
            VariantType::UInt32 => Variant::UInt32(u32::from_be_bytes(take(bytes, tag)?)),
            VariantType::Int64 => Variant::Int64(i64::from_be_bytes(take(bytes, tag)?)),
            VariantType::UInt64 => Variant::UInt64(u64::from_be_bytes(take(bytes, tag)?)),
            VariantType::Float => Variant::Float(f32::from_be_bytes(take(bytes, tag)?)),
            VariantType::Double => Variant::Double(f64::from_be_bytes(take(bytes, tag)?)),
            VariantType::String => {
                let (data, consumed) = decode_bytes(bytes, tag)?;
                let s = String::from_utf8(data.to_vec()).map_err(|e| {
                    Error::with_source(ErrorKind::MalformedEncoding("invalid UTF-8".into()), e)
                })?;
                return Ok((Variant::String(s), consumed));
            }
            VariantType::Buffer => {
                let (data, consumed) = decode_bytes(bytes, tag)?;
                return Ok((Variant::Buffer(data.to_vec()), consumed));
            }
            VariantType::Pointer => {
                return Err(
                    ErrorKind::MalformedEncoding("pointers cannot be deserialized".into()).into(),
                )
            }
        };
        Ok((v, tag.fixed_size().unwrap_or(0)))
    }

    /// Convert to `target`, widening numeric values where no information is
    /// lost.
    ///
    /// ```rust
    /// # use libapp::{Variant, VariantType};
    /// let v = Variant::Int8(-3).get_as(VariantType::Int64).unwrap();
    /// assert_eq!(v, Variant::Int64(-3));
    /// assert!(Variant::String("3".into()).get_as(VariantType::Int32).is_err());
    /// ```
    pub fn get_as(&self, target: VariantType) -> Result<Variant> {
        let from = self.variant_type();
        if from == target {
            return Ok(self.clone());
        }
        if !from.widens_to(target) {
            return Err(ErrorKind::IncompatibleType { from, to: target }.into());
        }

        let v = match *self {
            Variant::Int8(v) => Widened::Signed(i64::from(v)),
            Variant::Int16(v) => Widened::Signed(i64::from(v)),
            Variant::Int32(v) => Widened::Signed(i64::from(v)),
            Variant::Int64(v) => Widened::Signed(v),
            Variant::UInt8(v) => Widened::Unsigned(u64::from(v)),
            Variant::UInt16(v) => Widened::Unsigned(u64::from(v)),
            Variant::UInt32(v) => Widened::Unsigned(u64::from(v)),
            Variant::UInt64(v) => Widened::Unsigned(v),
            Variant::Float(v) => Widened::Real(f64::from(v)),
            _ => return Err(ErrorKind::IncompatibleType { from, to: target }.into()),
        };

        v.narrow(target)
            .ok_or_else(|| ErrorKind::IncompatibleType { from, to: target }.into())
    }

    /// Parse the textual form of a value of type `t`.
    pub fn parse(t: VariantType, s: &str) -> Result<Variant> {
        fn bad<E: std::error::Error + Send + Sync + 'static>(
            t: VariantType,
        ) -> impl FnOnce(E) -> Error {
            move |e| {
                Error::with_source(
                    ErrorKind::IncompatibleType {
                        from: VariantType::String,
                        to: t,
                    },
                    e,
                )
            }
        }

        Ok(match t {
            VariantType::Void => Variant::Void,
            VariantType::Bool => Variant::Bool(s.parse().map_err(bad(t))?),
            VariantType::Int8 => Variant::Int8(s.parse().map_err(bad(t))?),
            VariantType::UInt8 => Variant::UInt8(s.parse().map_err(bad(t))?),
            VariantType::Int16 => Variant::Int16(s.parse().map_err(bad(t))?),
            VariantType::UInt16 => Variant::UInt16(s.parse().map_err(bad(t))?),
            VariantType::Int32 => Variant::Int32(s.parse().map_err(bad(t))?),
            VariantType::UInt32 => Variant::UInt32(s.parse().map_err(bad(t))?),
            VariantType::Int64 => Variant::Int64(s.parse().map_err(bad(t))?),
            VariantType::UInt64 => Variant::UInt64(s.parse().map_err(bad(t))?),
            VariantType::Float => Variant::Float(s.parse().map_err(bad(t))?),
            VariantType::Double => Variant::Double(s.parse().map_err(bad(t))?),
            VariantType::String => Variant::String(s.to_string()),
            VariantType::Buffer => Variant::Buffer(s.as_bytes().to_vec()),
            VariantType::Pointer => {
                return Err(ErrorKind::IncompatibleType {
                    from: VariantType::String,
                    to: t,
                }
                .into())
            }
        })
    }
}

enum Widened {
    Signed(i64),
    Unsigned(u64),
    Real(f64),
}

impl Widened {
    fn narrow(self, target: VariantType) -> Option<Variant> {
        Some(match (self, target) {
            (Widened::Signed(v), VariantType::Int16) => Variant::Int16(i16::try_from(v).ok()?),
            (Widened::Signed(v), VariantType::Int32) => Variant::Int32(i32::try_from(v).ok()?),
            (Widened::Signed(v), VariantType::Int64) => Variant::Int64(v),
            (Widened::Signed(v), VariantType::Float) => Variant::Float(v as f32),
            (Widened::Signed(v), VariantType::Double) => Variant::Double(v as f64),
            (Widened::Unsigned(v), VariantType::Int16) => Variant::Int16(i16::try_from(v).ok()?),
            (Widened::Unsigned(v), VariantType::Int32) => Variant::Int32(i32::try_from(v).ok()?),
            (Widened::Unsigned(v), VariantType::Int64) => Variant::Int64(i64::try_from(v).ok()?),
            (Widened::Unsigned(v), VariantType::UInt16) => {
                Variant::UInt16(u16::try_from(v).ok()?)
            }
            (Widened::Unsigned(v), VariantType::UInt32) => {
                Variant::UInt32(u32::try_from(v).ok()?)
            }
            (Widened::Unsigned(v), VariantType::UInt64) => Variant::UInt64(v),
            (Widened::Unsigned(v), VariantType::Float) => Variant::Float(v as f32),
            (Widened::Unsigned(v), VariantType::Double) => Variant::Double(v as f64),
            (Widened::Real(v), VariantType::Double) => Variant::Double(v),
            _ => return None,
        })
    }
}

fn encode_bytes(buf: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| {
        ErrorKind::MalformedEncoding(format!("{} bytes do not fit a length prefix", data.len()))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

fn decode_bytes(bytes: &[u8], tag: VariantType) -> Result<(&[u8], usize)> {
    let len = u32::from_be_bytes(take(bytes, tag)?) as usize;
    let end = 4 + len;
    match bytes.get(4..end) {
        Some(data) => Ok((data, end)),
        None => Err(truncated(tag, end, bytes.len())),
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Variant::Void => f.write_str("void"),
            Variant::Bool(v) => write!(f, "{}", v),
            Variant::Int8(v) => write!(f, "{}", v),
            Variant::UInt8(v) => write!(f, "{}", v),
            Variant::Int16(v) => write!(f, "{}", v),
            Variant::UInt16(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{:?}", v),
            Variant::Buffer(v) => write!(f, "<{} bytes>", v.len()),
            Variant::Pointer(v) => write!(f, "{:#x}", v),
        }
    }
}

macro_rules! variant_conversions {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Variant {
                fn from(v: $t) -> Self {
                    Variant::$variant(v)
                }
            }

            impl TryFrom<&Variant> for $t {
                type Error = Error;

                fn try_from(v: &Variant) -> Result<Self> {
                    match v.get_as(VariantType::$variant)? {
                        Variant::$variant(v) => Ok(v),
                        other => Err(ErrorKind::IncompatibleType {
                            from: other.variant_type(),
                            to: VariantType::$variant,
                        }
                        .into()),
                    }
                }
            }
        )*
    };
}

variant_conversions! {
    bool => Bool,
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Buffer,
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<()> for Variant {
    fn from(_: ()) -> Self {
        Variant::Void
    }
}

impl TryFrom<&Variant> for () {
    type Error = Error;

    fn try_from(v: &Variant) -> Result<Self> {
        match v {
            Variant::Void => Ok(()),
            other => Err(ErrorKind::IncompatibleType {
                from: other.variant_type(),
                to: VariantType::Void,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Variant> {
        vec![
            Variant::Void,
            Variant::Bool(true),
            Variant::Int8(-128),
            Variant::UInt8(255),
            Variant::Int16(-2),
            Variant::UInt16(0xbeef),
            Variant::Int32(i32::MIN),
            Variant::UInt32(7),
            Variant::Int64(-1),
            Variant::UInt64(u64::MAX),
            Variant::Float(1.5),
            Variant::Double(-0.25),
            Variant::String("héllo".into()),
            Variant::Buffer(vec![0, 1, 2, 255]),
        ]
    }

    #[test]
    fn test_round_trip() {
        for v in samples() {
            let mut buf = Vec::new();
            v.encode(&mut buf).unwrap();
            let (decoded, consumed) = Variant::decode(&buf, v.variant_type()).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn test_big_endian() {
        let mut buf = Vec::new();
        Variant::UInt32(0x0102_0304).encode(&mut buf).unwrap();
        Variant::String("ab".into()).encode(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_decode_truncated() {
        let e = Variant::decode(&[0, 0, 1], VariantType::Int32).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::MalformedEncoding(_)));

        // length prefix claims more bytes than present
        let e = Variant::decode(&[0, 0, 0, 5, b'a'], VariantType::String).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::MalformedEncoding(_)));

        let e = Variant::decode(&[2], VariantType::Bool).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::MalformedEncoding(_)));

        let e = Variant::decode(&[0, 0, 0, 2, 0xff, 0xfe], VariantType::String).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::MalformedEncoding(_)));
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let (v, consumed) = Variant::decode(&[0, 7, 9, 9], VariantType::Int16).unwrap();
        assert_eq!(v, Variant::Int16(7));
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_pointer_not_serialized() {
        let mut buf = Vec::new();
        assert!(Variant::Pointer(0xdead).encode(&mut buf).is_err());
        assert!(buf.is_empty());
        assert_eq!(VariantType::from_tag(VariantType::Pointer.tag()), None);
    }

    #[test]
    fn test_get_as() {
        assert_eq!(
            Variant::Int8(-5).get_as(VariantType::Int64).unwrap(),
            Variant::Int64(-5)
        );
        assert_eq!(
            Variant::UInt16(60000).get_as(VariantType::Int32).unwrap(),
            Variant::Int32(60000)
        );
        assert_eq!(
            Variant::UInt8(3).get_as(VariantType::UInt64).unwrap(),
            Variant::UInt64(3)
        );
        assert_eq!(
            Variant::Int32(3).get_as(VariantType::Double).unwrap(),
            Variant::Double(3.0)
        );
        assert_eq!(
            Variant::Float(0.5).get_as(VariantType::Double).unwrap(),
            Variant::Double(0.5)
        );

        for (v, t) in [
            (Variant::Int64(1), VariantType::Int32),
            (Variant::Int8(-1), VariantType::UInt64),
            (Variant::UInt32(1), VariantType::Int32),
            (Variant::String("1".into()), VariantType::Int32),
            (Variant::Buffer(vec![1]), VariantType::String),
            (Variant::Int32(1), VariantType::String),
            (Variant::Bool(true), VariantType::Int8),
            (Variant::Double(1.0), VariantType::Float),
        ] {
            match v.get_as(t) {
                Err(e) => match e.kind() {
                    ErrorKind::IncompatibleType { from, to } => {
                        assert_eq!(*from, v.variant_type());
                        assert_eq!(*to, t);
                    }
                    kind => panic!("Unknown error {:?}", kind),
                },
                Ok(r) => panic!("{:?} converted to {:?}", v, r),
            }
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!("INT32".parse::<VariantType>().unwrap(), VariantType::Int32);
        assert_eq!("buffer".parse::<VariantType>().unwrap(), VariantType::Buffer);
        assert!("INT128".parse::<VariantType>().is_err());
        for t in TYPE_NAMES.iter().map(|(t, _)| *t) {
            assert_eq!(t.name().parse::<VariantType>().unwrap(), t);
        }
    }

    #[test]
    fn test_native_conversions() {
        assert_eq!(i64::try_from(&Variant::Int16(12)).unwrap(), 12);
        assert_eq!(
            String::try_from(&Variant::from("abc")).unwrap(),
            "abc".to_string()
        );
        assert!(i8::try_from(&Variant::Int32(1)).is_err());
        assert_eq!(Variant::from(2.5f64), Variant::Double(2.5));
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            Variant::parse(VariantType::Int32, "-42").unwrap(),
            Variant::Int32(-42)
        );
        assert_eq!(
            Variant::parse(VariantType::Bool, "true").unwrap(),
            Variant::Bool(true)
        );
        assert!(Variant::parse(VariantType::UInt8, "256").is_err());
    }

    #[test]
    fn test_serde() {
        let v = serde_json::to_value(Variant::Int32(5)).unwrap();
        assert_eq!(v, serde_json::json!({"Int32": 5}));
        assert_eq!(
            serde_json::from_str::<Variant>(r#"{"String":"x"}"#).unwrap(),
            Variant::from("x")
        );
        assert_eq!(
            serde_json::to_string(&VariantType::UInt64).unwrap(),
            r#""UInt64""#
        );
    }
}
