//! Provides the types representing a decoded RESP value, in both a
//! zero-copy borrowed form and an owned form suitable for crossing task
//! boundaries.

use bytes::Bytes;
use core::fmt;
use std::str::Utf8Error;

/// A decoded RESP value borrowing its payloads from the receive buffer.
///
/// This is what the decoder produces. Bulk payloads are slices into the
/// input; the borrow is only valid until the buffer region is reclaimed, so
/// anything that outlives the current decode step must be converted with
/// [`FrameRef::to_owned`] first. Taking the owning copy is an explicit cost.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameRef<'a> {
    /// `+OK\r\n`
    Simple(&'a [u8]),
    /// `-ERR message\r\n`
    Error(&'a [u8]),
    /// `:42\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n`
    Bulk(&'a [u8]),
    /// `*2\r\n...`
    Array(Vec<FrameRef<'a>>),
    /// `$-1\r\n`, `*-1\r\n` or the RESP3 `_\r\n` — all collapse here
    Null,
    /// `#t\r\n` / `#f\r\n`
    Boolean(bool),
    /// `,3.14\r\n`
    Double(f64),
    /// `(3492890328409238509324850943850943825024385\r\n`
    BigNumber(&'a [u8]),
    /// `=15\r\ntxt:Some string\r\n` — payload keeps the `fmt:` prefix
    Verbatim(&'a [u8]),
    /// `%1\r\n...` — flattened key/value pairs
    Map(Vec<(FrameRef<'a>, FrameRef<'a>)>),
    /// `~2\r\n...`
    Set(Vec<FrameRef<'a>>),
    /// `>2\r\n...` — out-of-band server push
    Push(Vec<FrameRef<'a>>),
}

impl FrameRef<'_> {
    /// Deep-copy every payload out of the receive buffer, producing a frame
    /// that can be retained and sent across task boundaries.
    pub fn to_owned(&self) -> Frame {
        match self {
            FrameRef::Simple(s) => Frame::Simple(Bytes::copy_from_slice(s)),
            FrameRef::Error(s) => Frame::Error(Bytes::copy_from_slice(s)),
            FrameRef::Integer(n) => Frame::Integer(*n),
            FrameRef::Bulk(s) => Frame::Bulk(Bytes::copy_from_slice(s)),
            FrameRef::Array(items) => Frame::Array(items.iter().map(Self::to_owned).collect()),
            FrameRef::Null => Frame::Null,
            FrameRef::Boolean(b) => Frame::Boolean(*b),
            FrameRef::Double(d) => Frame::Double(*d),
            FrameRef::BigNumber(s) => Frame::BigNumber(Bytes::copy_from_slice(s)),
            FrameRef::Verbatim(s) => Frame::Verbatim(Bytes::copy_from_slice(s)),
            FrameRef::Map(pairs) => Frame::Map(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect(),
            ),
            FrameRef::Set(items) => Frame::Set(items.iter().map(Self::to_owned).collect()),
            FrameRef::Push(items) => Frame::Push(items.iter().map(Self::to_owned).collect()),
        }
    }

    /// Whether this is an out-of-band push frame.
    pub fn is_push(&self) -> bool {
        matches!(self, FrameRef::Push(_))
    }
}

/// A decoded RESP value owning its payloads.
///
/// Reply futures always resolve with this form; the reader task performs the
/// copy out of its receive buffer before the buffer is advanced.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(Bytes),
    Error(Bytes),
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<Frame>),
    Null,
    Boolean(bool),
    Double(f64),
    BigNumber(Bytes),
    Verbatim(Bytes),
    Map(Vec<(Frame, Frame)>),
    Set(Vec<Frame>),
    Push(Vec<Frame>),
}

impl Frame {
    /// The raw payload bytes for the string-ish variants.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Simple(s) | Frame::Error(s) | Frame::Bulk(s) | Frame::BigNumber(s) => Some(s),
            Frame::Verbatim(s) => Some(verbatim_text(s)),
            _ => None,
        }
    }

    /// View the payload as text. UTF-8 validation happens here, not during
    /// parsing.
    pub fn as_str(&self) -> Option<Result<&str, Utf8Error>> {
        self.as_bytes().map(std::str::from_utf8)
    }

    /// The integer value, if this frame carries one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// The double value, if this frame carries one.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Frame::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// The boolean value, if this frame carries one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Frame::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this frame is the null reply (any wire form).
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// For an Error frame, the category token: the leading word of the
    /// message up to the first space (`WRONGTYPE`, `NOAUTH`, ...).
    pub fn error_category(&self) -> Option<&[u8]> {
        match self {
            Frame::Error(msg) => Some(leading_token(msg)),
            _ => None,
        }
    }

    /// For a Verbatim frame, the three-character format tag (`txt`, `mkd`).
    pub fn verbatim_format(&self) -> Option<&[u8]> {
        match self {
            Frame::Verbatim(s) if s.len() >= 4 => Some(&s[..3]),
            _ => None,
        }
    }
}

/// The category token of a server error message.
pub(crate) fn leading_token(msg: &[u8]) -> &[u8] {
    match msg.iter().position(|&b| b == b' ') {
        Some(end) => &msg[..end],
        None => msg,
    }
}

/// Strip the `fmt:` prefix off a verbatim-string payload.
fn verbatim_text(payload: &[u8]) -> &[u8] {
    if payload.len() >= 4 && payload[3] == b':' {
        &payload[4..]
    } else {
        payload
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(fmt, "{}", String::from_utf8_lossy(s)),
            Frame::Error(s) => write!(fmt, "(error) {}", String::from_utf8_lossy(s)),
            Frame::Integer(n) => write!(fmt, "(integer) {n}"),
            Frame::Bulk(s) => write!(fmt, "{:?}", String::from_utf8_lossy(s)),
            Frame::Array(items) | Frame::Set(items) | Frame::Push(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(fmt, " ")?;
                    }
                    write!(fmt, "{item}")?;
                }
                Ok(())
            }
            Frame::Null => write!(fmt, "(nil)"),
            Frame::Boolean(b) => write!(fmt, "(boolean) {b}"),
            Frame::Double(d) => write!(fmt, "(double) {d}"),
            Frame::BigNumber(s) => write!(fmt, "(big number) {}", String::from_utf8_lossy(s)),
            Frame::Verbatim(s) => write!(fmt, "{}", String::from_utf8_lossy(verbatim_text(s))),
            Frame::Map(pairs) => {
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(fmt, " ")?;
                    }
                    write!(fmt, "{k}={v}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_owned_copies_payloads_out() {
        let payload = b"hello".to_vec();
        let borrowed = FrameRef::Array(vec![
            FrameRef::Bulk(&payload),
            FrameRef::Integer(7),
            FrameRef::Null,
        ]);

        let owned = borrowed.to_owned();
        drop(payload);

        match owned {
            Frame::Array(items) => {
                assert_eq!(items[0], Frame::Bulk(Bytes::from_static(b"hello")));
                assert_eq!(items[1], Frame::Integer(7));
                assert_eq!(items[2], Frame::Null);
            }
            other => panic!("unexpected frame variant: {other:?}"),
        }
    }

    #[test]
    fn utf8_validation_is_deferred_to_accessor() {
        // Parsing-side types never validate text; invalid UTF-8 is only an
        // error once as_str is asked for.
        let frame = Frame::Bulk(Bytes::from_static(b"\xff\xfe"));
        assert!(frame.as_bytes().is_some());
        assert!(frame.as_str().unwrap().is_err());

        let frame = Frame::Bulk(Bytes::from_static("héllo".as_bytes()));
        assert_eq!(frame.as_str().unwrap().unwrap(), "héllo");
    }

    #[test]
    fn error_category_is_leading_token() {
        let frame = Frame::Error(Bytes::from_static(
            b"WRONGTYPE Operation against a key holding the wrong kind of value",
        ));
        assert_eq!(frame.error_category().unwrap(), b"WRONGTYPE");

        let frame = Frame::Error(Bytes::from_static(b"NOAUTH"));
        assert_eq!(frame.error_category().unwrap(), b"NOAUTH");
    }

    #[test]
    fn verbatim_accessors_split_prefix() {
        let frame = Frame::Verbatim(Bytes::from_static(b"txt:Some string"));
        assert_eq!(frame.verbatim_format().unwrap(), b"txt");
        assert_eq!(frame.as_bytes().unwrap(), b"Some string");
        assert_eq!(frame.to_string(), "Some string");
    }

    #[test]
    fn scalar_accessors() {
        assert_eq!(Frame::Integer(-3).as_int(), Some(-3));
        assert_eq!(Frame::Boolean(true).as_bool(), Some(true));
        assert_eq!(Frame::Double(1.5).as_double(), Some(1.5));
        assert!(Frame::Null.is_null());
        assert!(!Frame::Integer(0).is_null());
        assert_eq!(Frame::Null.as_int(), None);
    }
}
