// ABOUTME: Immutable pre-encoded RESP commands and constructors for the common command set
// ABOUTME: Commands are frozen byte payloads; nothing downstream ever re-encodes or mutates them

use crate::buffer::BufferPool;
use crate::codec;
use bytes::Bytes;

/// An immutable, pre-encoded RESP command.
///
/// The wire form (a RESP array of bulk strings) is produced exactly once, at
/// construction; the queue, batcher and endpoint writer only ever copy the
/// frozen bytes. A command may be fully precomputed (see [`Command::ping`])
/// or built per call from keys and values.
#[derive(Debug, Clone)]
pub struct Command {
    name: &'static str,
    bytes: Bytes,
}

impl Command {
    /// Encode a command from a name and raw argument slices.
    ///
    /// `name` is carried alongside the bytes for logging and interceptor
    /// context; it is also the first array element on the wire.
    pub fn new(name: &'static str, args: &[&[u8]]) -> Command {
        let mut buf = BufferPool::global().rent();
        codec::encode_command(&mut buf, args);
        Command {
            name,
            bytes: buf.split().freeze(),
        }
    }

    /// Wrap bytes that are already a complete RESP command.
    ///
    /// The caller is responsible for the bytes being one well-formed command
    /// array; the client submits them verbatim.
    pub fn from_bytes(name: &'static str, bytes: Bytes) -> Command {
        Command { name, bytes }
    }

    /// The command keyword, e.g. `"GET"`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The encoded wire bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the encoded form is empty (never true for a real command).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// The standard command set. Each constructor is a mechanical mapping onto
// the encoder; reply interpretation lives with the client wrappers.
impl Command {
    /// `PING` — fully precomputed, no per-call encoding at all.
    pub fn ping() -> Command {
        Command {
            name: "PING",
            bytes: Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"),
        }
    }

    pub fn echo(message: impl AsRef<[u8]>) -> Command {
        Command::new("ECHO", &[b"ECHO", message.as_ref()])
    }

    pub fn get(key: impl AsRef<[u8]>) -> Command {
        Command::new("GET", &[b"GET", key.as_ref()])
    }

    pub fn set(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Command {
        Command::new("SET", &[b"SET", key.as_ref(), value.as_ref()])
    }

    pub fn del(key: impl AsRef<[u8]>) -> Command {
        Command::new("DEL", &[b"DEL", key.as_ref()])
    }

    pub fn exists(key: impl AsRef<[u8]>) -> Command {
        Command::new("EXISTS", &[b"EXISTS", key.as_ref()])
    }

    pub fn expire(key: impl AsRef<[u8]>, seconds: i64) -> Command {
        let seconds = seconds.to_string();
        Command::new("EXPIRE", &[b"EXPIRE", key.as_ref(), seconds.as_bytes()])
    }

    pub fn ttl(key: impl AsRef<[u8]>) -> Command {
        Command::new("TTL", &[b"TTL", key.as_ref()])
    }

    pub fn incr(key: impl AsRef<[u8]>) -> Command {
        Command::new("INCR", &[b"INCR", key.as_ref()])
    }

    pub fn decr(key: impl AsRef<[u8]>) -> Command {
        Command::new("DECR", &[b"DECR", key.as_ref()])
    }

    pub fn append(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Command {
        Command::new("APPEND", &[b"APPEND", key.as_ref(), value.as_ref()])
    }

    pub fn hset(
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Command {
        Command::new(
            "HSET",
            &[b"HSET", key.as_ref(), field.as_ref(), value.as_ref()],
        )
    }

    pub fn hget(key: impl AsRef<[u8]>, field: impl AsRef<[u8]>) -> Command {
        Command::new("HGET", &[b"HGET", key.as_ref(), field.as_ref()])
    }

    pub fn lpush(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Command {
        Command::new("LPUSH", &[b"LPUSH", key.as_ref(), value.as_ref()])
    }

    pub fn rpush(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Command {
        Command::new("RPUSH", &[b"RPUSH", key.as_ref(), value.as_ref()])
    }

    pub fn lpop(key: impl AsRef<[u8]>) -> Command {
        Command::new("LPOP", &[b"LPOP", key.as_ref()])
    }

    pub fn rpop(key: impl AsRef<[u8]>) -> Command {
        Command::new("RPOP", &[b"RPOP", key.as_ref()])
    }

    pub fn llen(key: impl AsRef<[u8]>) -> Command {
        Command::new("LLEN", &[b"LLEN", key.as_ref()])
    }

    pub fn sadd(key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Command {
        Command::new("SADD", &[b"SADD", key.as_ref(), member.as_ref()])
    }

    pub fn srem(key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Command {
        Command::new("SREM", &[b"SREM", key.as_ref(), member.as_ref()])
    }

    pub fn smembers(key: impl AsRef<[u8]>) -> Command {
        Command::new("SMEMBERS", &[b"SMEMBERS", key.as_ref()])
    }

    pub fn zadd(key: impl AsRef<[u8]>, score: f64, member: impl AsRef<[u8]>) -> Command {
        let score = score.to_string();
        Command::new(
            "ZADD",
            &[b"ZADD", key.as_ref(), score.as_bytes(), member.as_ref()],
        )
    }

    pub fn zrange(key: impl AsRef<[u8]>, start: i64, stop: i64) -> Command {
        let start = start.to_string();
        let stop = stop.to_string();
        Command::new(
            "ZRANGE",
            &[b"ZRANGE", key.as_ref(), start.as_bytes(), stop.as_bytes()],
        )
    }

    pub fn keys(pattern: impl AsRef<[u8]>) -> Command {
        Command::new("KEYS", &[b"KEYS", pattern.as_ref()])
    }

    pub fn type_of(key: impl AsRef<[u8]>) -> Command {
        Command::new("TYPE", &[b"TYPE", key.as_ref()])
    }

    pub fn dbsize() -> Command {
        Command::new("DBSIZE", &[b"DBSIZE"])
    }

    pub fn flushdb() -> Command {
        Command::new("FLUSHDB", &[b"FLUSHDB"])
    }

    pub fn flushall() -> Command {
        Command::new("FLUSHALL", &[b"FLUSHALL"])
    }

    pub fn info() -> Command {
        Command::new("INFO", &[b"INFO"])
    }

    pub fn auth(password: impl AsRef<[u8]>) -> Command {
        Command::new("AUTH", &[b"AUTH", password.as_ref()])
    }

    pub fn auth_user(username: impl AsRef<[u8]>, password: impl AsRef<[u8]>) -> Command {
        Command::new("AUTH", &[b"AUTH", username.as_ref(), password.as_ref()])
    }

    pub fn select(db: u32) -> Command {
        let db = db.to_string();
        Command::new("SELECT", &[b"SELECT", db.as_bytes()])
    }

    pub fn hello(version: u32) -> Command {
        let version = version.to_string();
        Command::new("HELLO", &[b"HELLO", version.as_bytes()])
    }

    pub fn hello_auth(
        version: u32,
        username: impl AsRef<[u8]>,
        password: impl AsRef<[u8]>,
    ) -> Command {
        let version = version.to_string();
        Command::new(
            "HELLO",
            &[
                b"HELLO",
                version.as_bytes(),
                b"AUTH",
                username.as_ref(),
                password.as_ref(),
            ],
        )
    }
}
