// RESP2/RESP3 codec - wire-format parsing and encoding, nothing else
//
// This module separates the wire format from everything that schedules or
// transports bytes. The decoder is incremental: it either yields a complete
// frame plus the number of bytes it consumed, reports that more input is
// needed, or rejects the input as malformed. Reparsing the same buffer with
// more bytes appended always yields the same result, which is what lets the
// endpoint reader call it in a loop straight off the socket.

use crate::frame::{Frame, FrameRef};
use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;
use std::io::Cursor;
use thiserror::Error;

/// Maximum nesting depth for aggregate frames. Anything deeper is treated
/// as malformed to guard against pathological input.
pub const MAX_DEPTH: usize = 128;

/// Maximum accepted bulk-string length (matches the server-side limit of
/// Redis-family servers).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// RESP frame type markers: the single leading byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum TypeMarker {
    Simple = b'+',
    Error = b'-',
    Integer = b':',
    Bulk = b'$',
    Array = b'*',
    Null = b'_',
    Boolean = b'#',
    Double = b',',
    BigNumber = b'(',
    Verbatim = b'=',
    Map = b'%',
    Set = b'~',
    Push = b'>',
}

/// Codec errors with enough context for fault logs.
///
/// Every variant is fatal to the endpoint that produced it: once the byte
/// stream cannot be framed, nothing downstream of the bad bytes can be
/// trusted. The error is `Clone` because a single malformed frame fans out
/// to every reply slot still in flight on that endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown frame type marker: {0:#04x}")]
    UnknownType(u8),

    #[error("invalid length field: {0}")]
    BadLength(String),

    #[error("aggregate nesting exceeds {MAX_DEPTH} levels")]
    DepthExceeded,

    #[error("invalid numeric field: {0}")]
    InvalidNumeric(String),

    #[error("line terminator must be CRLF")]
    UnexpectedTerminator,
}

/// Attempt to decode one frame from the front of `src`.
///
/// Returns the decoded frame together with the number of bytes consumed, or
/// `Ok(None)` when `src` holds only a partial frame. `Ok(None)` has no side
/// effects: feeding the same bytes plus more later reparses identically.
///
/// Bulk payloads in the returned [`FrameRef`] borrow from `src`; callers
/// that retain the frame past the life of the buffer must
/// [`FrameRef::to_owned`] it first.
pub fn try_read(src: &[u8]) -> Result<Option<(FrameRef<'_>, usize)>, CodecError> {
    let mut cur = Cursor::new(src);
    match parse_value(&mut cur, 1)? {
        Some(frame) => Ok(Some((frame, cur.position() as usize))),
        None => Ok(None),
    }
}

fn parse_value<'a>(
    src: &mut Cursor<&'a [u8]>,
    depth: usize,
) -> Result<Option<FrameRef<'a>>, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::DepthExceeded);
    }

    let buf: &'a [u8] = src.get_ref();
    let pos = src.position() as usize;
    if pos >= buf.len() {
        return Ok(None);
    }

    let marker =
        TypeMarker::try_from(buf[pos]).map_err(|_| CodecError::UnknownType(buf[pos]))?;
    src.set_position((pos + 1) as u64);

    match marker {
        TypeMarker::Simple => Ok(read_line(src)?.map(FrameRef::Simple)),
        TypeMarker::Error => Ok(read_line(src)?.map(FrameRef::Error)),
        TypeMarker::Integer => match read_line(src)? {
            Some(line) => Ok(Some(FrameRef::Integer(parse_i64(line)?))),
            None => Ok(None),
        },
        TypeMarker::Double => match read_line(src)? {
            Some(line) => Ok(Some(FrameRef::Double(parse_double(line)?))),
            None => Ok(None),
        },
        TypeMarker::Boolean => match read_line(src)? {
            Some(b"t") => Ok(Some(FrameRef::Boolean(true))),
            Some(b"f") => Ok(Some(FrameRef::Boolean(false))),
            Some(other) => Err(CodecError::InvalidNumeric(lossy(other))),
            None => Ok(None),
        },
        TypeMarker::Null => match read_line(src)? {
            Some(b"") => Ok(Some(FrameRef::Null)),
            Some(other) => Err(CodecError::BadLength(lossy(other))),
            None => Ok(None),
        },
        TypeMarker::BigNumber => match read_line(src)? {
            Some(line) => {
                validate_big_number(line)?;
                Ok(Some(FrameRef::BigNumber(line)))
            }
            None => Ok(None),
        },
        TypeMarker::Bulk => read_blob(src, /* allow_null */ true).map(|b| {
            b.map(|payload| match payload {
                Some(bytes) => FrameRef::Bulk(bytes),
                None => FrameRef::Null,
            })
        }),
        TypeMarker::Verbatim => match read_blob(src, /* allow_null */ false)? {
            Some(Some(payload)) => {
                // The payload leads with a three-character format and a colon.
                if payload.len() < 4 || payload[3] != b':' {
                    return Err(CodecError::BadLength(lossy(payload)));
                }
                Ok(Some(FrameRef::Verbatim(payload)))
            }
            Some(None) => unreachable!("null rejected for verbatim strings"),
            None => Ok(None),
        },
        TypeMarker::Array => match read_aggregate_len(src, /* allow_null */ true)? {
            Some(None) => Ok(Some(FrameRef::Null)),
            Some(Some(len)) => match parse_items(src, len, depth)? {
                Some(items) => Ok(Some(FrameRef::Array(items))),
                None => Ok(None),
            },
            None => Ok(None),
        },
        TypeMarker::Set => match read_aggregate_len(src, false)? {
            Some(Some(len)) => match parse_items(src, len, depth)? {
                Some(items) => Ok(Some(FrameRef::Set(items))),
                None => Ok(None),
            },
            Some(None) => unreachable!("null rejected for sets"),
            None => Ok(None),
        },
        TypeMarker::Push => match read_aggregate_len(src, false)? {
            Some(Some(len)) => match parse_items(src, len, depth)? {
                Some(items) => Ok(Some(FrameRef::Push(items))),
                None => Ok(None),
            },
            Some(None) => unreachable!("null rejected for pushes"),
            None => Ok(None),
        },
        TypeMarker::Map => match read_aggregate_len(src, false)? {
            Some(Some(len)) => {
                let mut pairs = Vec::with_capacity(len.min(64));
                for _ in 0..len {
                    let Some(key) = parse_value(src, depth + 1)? else {
                        return Ok(None);
                    };
                    let Some(value) = parse_value(src, depth + 1)? else {
                        return Ok(None);
                    };
                    pairs.push((key, value));
                }
                Ok(Some(FrameRef::Map(pairs)))
            }
            Some(None) => unreachable!("null rejected for maps"),
            None => Ok(None),
        },
    }
}

fn parse_items<'a>(
    src: &mut Cursor<&'a [u8]>,
    len: usize,
    depth: usize,
) -> Result<Option<Vec<FrameRef<'a>>>, CodecError> {
    let mut items = Vec::with_capacity(len.min(64));
    for _ in 0..len {
        match parse_value(src, depth + 1)? {
            Some(item) => items.push(item),
            None => return Ok(None),
        }
    }
    Ok(Some(items))
}

/// Read one CRLF-terminated line, returning the bytes before the terminator.
///
/// `Ok(None)` means the terminator has not arrived yet. A bare `\n`, or a
/// `\r` followed by anything but `\n`, is malformed.
fn read_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<Option<&'a [u8]>, CodecError> {
    let buf: &'a [u8] = src.get_ref();
    let start = src.position() as usize;
    let mut i = start;
    while i < buf.len() {
        match buf[i] {
            b'\r' => {
                if i + 1 >= buf.len() {
                    return Ok(None);
                }
                if buf[i + 1] != b'\n' {
                    return Err(CodecError::UnexpectedTerminator);
                }
                src.set_position((i + 2) as u64);
                return Ok(Some(&buf[start..i]));
            }
            b'\n' => return Err(CodecError::UnexpectedTerminator),
            _ => i += 1,
        }
    }
    Ok(None)
}

/// Read a length-prefixed blob (`$` and `=` frames): a decimal length line,
/// exactly that many payload bytes, then CRLF.
///
/// Outer `None` = need more bytes; inner `None` = the RESP2 `-1` null form.
#[allow(clippy::type_complexity)]
fn read_blob<'a>(
    src: &mut Cursor<&'a [u8]>,
    allow_null: bool,
) -> Result<Option<Option<&'a [u8]>>, CodecError> {
    let Some(line) = read_line(src)? else {
        return Ok(None);
    };
    let len = parse_len(line)?;
    if len == -1 {
        if allow_null {
            return Ok(Some(None));
        }
        return Err(CodecError::BadLength(lossy(line)));
    }
    if len < 0 || len > MAX_BULK_LEN {
        return Err(CodecError::BadLength(lossy(line)));
    }
    let len = len as usize;

    let buf: &'a [u8] = src.get_ref();
    let start = src.position() as usize;
    if buf.len() < start + len + 2 {
        return Ok(None);
    }
    if &buf[start + len..start + len + 2] != b"\r\n" {
        return Err(CodecError::UnexpectedTerminator);
    }
    src.set_position((start + len + 2) as u64);
    Ok(Some(Some(&buf[start..start + len])))
}

/// Read an aggregate element count (`*`, `~`, `>`, `%` frames).
///
/// Outer `None` = need more bytes; inner `None` = the RESP2 `*-1` null form.
#[allow(clippy::type_complexity)]
fn read_aggregate_len(
    src: &mut Cursor<&[u8]>,
    allow_null: bool,
) -> Result<Option<Option<usize>>, CodecError> {
    let Some(line) = read_line(src)? else {
        return Ok(None);
    };
    let len = parse_len(line)?;
    if len == -1 && allow_null {
        return Ok(Some(None));
    }
    if len < 0 {
        return Err(CodecError::BadLength(lossy(line)));
    }
    Ok(Some(Some(len as usize)))
}

fn parse_len(line: &[u8]) -> Result<i64, CodecError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| CodecError::BadLength(lossy(line)))
}

fn parse_i64(line: &[u8]) -> Result<i64, CodecError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| CodecError::InvalidNumeric(lossy(line)))
}

fn parse_double(line: &[u8]) -> Result<f64, CodecError> {
    let text =
        std::str::from_utf8(line).map_err(|_| CodecError::InvalidNumeric(lossy(line)))?;
    match text {
        "inf" | "+inf" => return Ok(f64::INFINITY),
        "-inf" => return Ok(f64::NEG_INFINITY),
        "nan" | "-nan" => return Ok(f64::NAN),
        _ => {}
    }
    // Only the standard decimal / exponent forms beyond the specials above.
    let plausible = !text.is_empty()
        && text
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !plausible {
        return Err(CodecError::InvalidNumeric(lossy(line)));
    }
    text.parse::<f64>()
        .map_err(|_| CodecError::InvalidNumeric(lossy(line)))
}

fn validate_big_number(line: &[u8]) -> Result<(), CodecError> {
    let digits = match line.first() {
        Some(b'+') | Some(b'-') => &line[1..],
        _ => line,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(CodecError::InvalidNumeric(lossy(line)));
    }
    Ok(())
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Exact encoded size of the command produced by [`encode_command`].
///
/// Callers use this to reserve output capacity once, up front.
pub fn command_len(args: &[&[u8]]) -> usize {
    let mut n = 1 + decimal_len(args.len() as i64) + 2;
    for arg in args {
        n += 1 + decimal_len(arg.len() as i64) + 2 + arg.len() + 2;
    }
    n
}

/// Encode a command as a RESP array of bulk strings: `*<n>\r\n` then
/// `$<len>\r\n<bytes>\r\n` per argument.
///
/// This is the only outbound form the client ever emits. Decimal fields go
/// through a stack formatter, so nothing here allocates per element.
pub fn encode_command(dst: &mut BytesMut, args: &[&[u8]]) {
    dst.reserve(command_len(args));
    dst.put_u8(TypeMarker::Array as u8);
    put_decimal(dst, args.len() as i64);
    for arg in args {
        dst.put_u8(TypeMarker::Bulk as u8);
        put_decimal(dst, arg.len() as i64);
        dst.put_slice(arg);
        dst.put_slice(b"\r\n");
    }
}

/// Encode an arbitrary frame onto `dst`.
///
/// The client's own traffic never needs this (commands are always bulk
/// arrays), but reply-side tooling does: the round-trip tests and the mock
/// server in the test suite both speak through it. Null always encodes as
/// the RESP3 `_\r\n` form.
pub fn encode_frame(dst: &mut BytesMut, frame: &Frame) {
    match frame {
        Frame::Simple(s) => {
            dst.put_u8(TypeMarker::Simple as u8);
            dst.put_slice(s);
            dst.put_slice(b"\r\n");
        }
        Frame::Error(s) => {
            dst.put_u8(TypeMarker::Error as u8);
            dst.put_slice(s);
            dst.put_slice(b"\r\n");
        }
        Frame::Integer(n) => {
            dst.put_u8(TypeMarker::Integer as u8);
            put_decimal(dst, *n);
        }
        Frame::Bulk(s) => {
            dst.put_u8(TypeMarker::Bulk as u8);
            put_decimal(dst, s.len() as i64);
            dst.put_slice(s);
            dst.put_slice(b"\r\n");
        }
        Frame::Null => dst.put_slice(b"_\r\n"),
        Frame::Boolean(true) => dst.put_slice(b"#t\r\n"),
        Frame::Boolean(false) => dst.put_slice(b"#f\r\n"),
        Frame::Double(d) => {
            dst.put_u8(TypeMarker::Double as u8);
            if d.is_nan() {
                dst.put_slice(b"nan");
            } else if *d == f64::INFINITY {
                dst.put_slice(b"inf");
            } else if *d == f64::NEG_INFINITY {
                dst.put_slice(b"-inf");
            } else {
                dst.put_slice(d.to_string().as_bytes());
            }
            dst.put_slice(b"\r\n");
        }
        Frame::BigNumber(s) => {
            dst.put_u8(TypeMarker::BigNumber as u8);
            dst.put_slice(s);
            dst.put_slice(b"\r\n");
        }
        Frame::Verbatim(s) => {
            dst.put_u8(TypeMarker::Verbatim as u8);
            put_decimal(dst, s.len() as i64);
            dst.put_slice(s);
            dst.put_slice(b"\r\n");
        }
        Frame::Array(items) => {
            dst.put_u8(TypeMarker::Array as u8);
            put_decimal(dst, items.len() as i64);
            for item in items {
                encode_frame(dst, item);
            }
        }
        Frame::Set(items) => {
            dst.put_u8(TypeMarker::Set as u8);
            put_decimal(dst, items.len() as i64);
            for item in items {
                encode_frame(dst, item);
            }
        }
        Frame::Push(items) => {
            dst.put_u8(TypeMarker::Push as u8);
            put_decimal(dst, items.len() as i64);
            for item in items {
                encode_frame(dst, item);
            }
        }
        Frame::Map(pairs) => {
            dst.put_u8(TypeMarker::Map as u8);
            put_decimal(dst, pairs.len() as i64);
            for (key, value) in pairs {
                encode_frame(dst, key);
                encode_frame(dst, value);
            }
        }
    }
}

/// Write a decimal and its CRLF through a stack buffer, no allocation and no
/// locale involvement.
fn put_decimal(dst: &mut BytesMut, value: i64) {
    use std::io::Write;

    let mut scratch = [0u8; 24];
    let mut cur = Cursor::new(&mut scratch[..]);
    write!(cur, "{value}\r\n").expect("24 bytes always fit an i64 plus CRLF");
    let len = cur.position() as usize;
    dst.put_slice(&cur.get_ref()[..len]);
}

fn decimal_len(value: i64) -> usize {
    let mut digits = 1;
    let mut v = if value < 0 {
        digits += 1;
        (value as i128).unsigned_abs() as u64
    } else {
        value as u64
    };
    while v >= 10 {
        digits += 1;
        v /= 10;
    }
    digits
}
