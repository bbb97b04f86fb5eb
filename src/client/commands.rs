// ABOUTME: Typed convenience wrappers over submit: GET, SET, INCR and friends
// ABOUTME: Each maps mechanically to an encoded command plus a reply-shape check

use crate::client::error::{RespError, RespResult};
use crate::client::handle::Client;
use crate::command::Command;
use crate::frame::Frame;
use bytes::Bytes;

/// The standard per-command wrappers.
///
/// Each wrapper encodes its command, submits it through the interceptor
/// chain, and maps the reply to a typed value. Shape mismatches surface as
/// [`RespError::UnexpectedReply`]; server errors surface as
/// [`RespError::Server`] like everywhere else.
impl Client {
    pub async fn ping(&self) -> RespResult<()> {
        let reply = self.submit(Command::ping()).await?;
        expect_ok(reply, "PING")
    }

    pub async fn echo(&self, message: impl AsRef<[u8]>) -> RespResult<Bytes> {
        let reply = self.submit(Command::echo(message)).await?;
        match expect_bulk(reply, "ECHO")? {
            Some(bytes) => Ok(bytes),
            None => Ok(Bytes::new()),
        }
    }

    pub async fn get(&self, key: impl AsRef<[u8]>) -> RespResult<Option<Bytes>> {
        let reply = self.submit(Command::get(key)).await?;
        expect_bulk(reply, "GET")
    }

    pub async fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> RespResult<()> {
        let reply = self.submit(Command::set(key, value)).await?;
        expect_ok(reply, "SET")
    }

    pub async fn del(&self, key: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::del(key)).await?;
        expect_int(reply, "DEL")
    }

    pub async fn exists(&self, key: impl AsRef<[u8]>) -> RespResult<bool> {
        let reply = self.submit(Command::exists(key)).await?;
        Ok(expect_int(reply, "EXISTS")? != 0)
    }

    pub async fn expire(&self, key: impl AsRef<[u8]>, seconds: i64) -> RespResult<bool> {
        let reply = self.submit(Command::expire(key, seconds)).await?;
        Ok(expect_int(reply, "EXPIRE")? != 0)
    }

    pub async fn ttl(&self, key: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::ttl(key)).await?;
        expect_int(reply, "TTL")
    }

    pub async fn incr(&self, key: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::incr(key)).await?;
        expect_int(reply, "INCR")
    }

    pub async fn decr(&self, key: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::decr(key)).await?;
        expect_int(reply, "DECR")
    }

    pub async fn append(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::append(key, value)).await?;
        expect_int(reply, "APPEND")
    }

    pub async fn hset(
        &self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> RespResult<i64> {
        let reply = self.submit(Command::hset(key, field, value)).await?;
        expect_int(reply, "HSET")
    }

    pub async fn hget(
        &self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
    ) -> RespResult<Option<Bytes>> {
        let reply = self.submit(Command::hget(key, field)).await?;
        expect_bulk(reply, "HGET")
    }

    pub async fn lpush(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::lpush(key, value)).await?;
        expect_int(reply, "LPUSH")
    }

    pub async fn rpush(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::rpush(key, value)).await?;
        expect_int(reply, "RPUSH")
    }

    pub async fn lpop(&self, key: impl AsRef<[u8]>) -> RespResult<Option<Bytes>> {
        let reply = self.submit(Command::lpop(key)).await?;
        expect_bulk(reply, "LPOP")
    }

    pub async fn rpop(&self, key: impl AsRef<[u8]>) -> RespResult<Option<Bytes>> {
        let reply = self.submit(Command::rpop(key)).await?;
        expect_bulk(reply, "RPOP")
    }

    pub async fn llen(&self, key: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::llen(key)).await?;
        expect_int(reply, "LLEN")
    }

    pub async fn sadd(&self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::sadd(key, member)).await?;
        expect_int(reply, "SADD")
    }

    pub async fn srem(&self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> RespResult<i64> {
        let reply = self.submit(Command::srem(key, member)).await?;
        expect_int(reply, "SREM")
    }

    pub async fn smembers(&self, key: impl AsRef<[u8]>) -> RespResult<Vec<Bytes>> {
        let reply = self.submit(Command::smembers(key)).await?;
        expect_bulk_items(reply, "SMEMBERS")
    }

    pub async fn zadd(
        &self,
        key: impl AsRef<[u8]>,
        score: f64,
        member: impl AsRef<[u8]>,
    ) -> RespResult<i64> {
        let reply = self.submit(Command::zadd(key, score, member)).await?;
        expect_int(reply, "ZADD")
    }

    pub async fn zrange(
        &self,
        key: impl AsRef<[u8]>,
        start: i64,
        stop: i64,
    ) -> RespResult<Vec<Bytes>> {
        let reply = self.submit(Command::zrange(key, start, stop)).await?;
        expect_bulk_items(reply, "ZRANGE")
    }

    pub async fn keys(&self, pattern: impl AsRef<[u8]>) -> RespResult<Vec<Bytes>> {
        let reply = self.submit(Command::keys(pattern)).await?;
        expect_bulk_items(reply, "KEYS")
    }

    pub async fn type_of(&self, key: impl AsRef<[u8]>) -> RespResult<String> {
        let reply = self.submit(Command::type_of(key)).await?;
        match reply {
            Frame::Simple(name) => Ok(String::from_utf8_lossy(&name).into_owned()),
            other => Err(unexpected("TYPE", &other)),
        }
    }

    pub async fn dbsize(&self) -> RespResult<i64> {
        let reply = self.submit(Command::dbsize()).await?;
        expect_int(reply, "DBSIZE")
    }

    pub async fn flushdb(&self) -> RespResult<()> {
        let reply = self.submit(Command::flushdb()).await?;
        expect_ok(reply, "FLUSHDB")
    }

    pub async fn flushall(&self) -> RespResult<()> {
        let reply = self.submit(Command::flushall()).await?;
        expect_ok(reply, "FLUSHALL")
    }

    pub async fn info(&self) -> RespResult<String> {
        let reply = self.submit(Command::info()).await?;
        match reply {
            Frame::Bulk(text) | Frame::Verbatim(text) => {
                Ok(String::from_utf8_lossy(&text).into_owned())
            }
            other => Err(unexpected("INFO", &other)),
        }
    }

    pub async fn auth(&self, password: impl AsRef<[u8]>) -> RespResult<()> {
        let reply = self.submit(Command::auth(password)).await?;
        expect_ok(reply, "AUTH")
    }

    pub async fn auth_user(
        &self,
        username: impl AsRef<[u8]>,
        password: impl AsRef<[u8]>,
    ) -> RespResult<()> {
        let reply = self.submit(Command::auth_user(username, password)).await?;
        expect_ok(reply, "AUTH")
    }

    pub async fn select(&self, db: u32) -> RespResult<()> {
        let reply = self.submit(Command::select(db)).await?;
        expect_ok(reply, "SELECT")
    }
}

fn unexpected(command: &'static str, got: &Frame) -> RespError {
    RespError::UnexpectedReply {
        command,
        got: format!("{got:?}"),
    }
}

/// `+OK` / `+PONG` style acknowledgements.
fn expect_ok(reply: Frame, command: &'static str) -> RespResult<()> {
    match reply {
        Frame::Simple(_) => Ok(()),
        other => Err(unexpected(command, &other)),
    }
}

fn expect_int(reply: Frame, command: &'static str) -> RespResult<i64> {
    match reply {
        Frame::Integer(value) => Ok(value),
        other => Err(unexpected(command, &other)),
    }
}

/// A bulk payload or the null reply.
fn expect_bulk(reply: Frame, command: &'static str) -> RespResult<Option<Bytes>> {
    match reply {
        Frame::Bulk(bytes) => Ok(Some(bytes)),
        Frame::Null => Ok(None),
        other => Err(unexpected(command, &other)),
    }
}

/// An array (or RESP3 set) of bulk payloads.
fn expect_bulk_items(reply: Frame, command: &'static str) -> RespResult<Vec<Bytes>> {
    let items = match reply {
        Frame::Array(items) | Frame::Set(items) => items,
        Frame::Null => return Ok(Vec::new()),
        other => return Err(unexpected(command, &other)),
    };
    items
        .into_iter()
        .map(|item| match item {
            Frame::Bulk(bytes) => Ok(bytes),
            Frame::Simple(bytes) => Ok(bytes),
            other => Err(unexpected(command, &other)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_shape_helpers() {
        assert!(expect_ok(Frame::Simple(Bytes::from_static(b"OK")), "SET").is_ok());
        assert!(matches!(
            expect_ok(Frame::Integer(1), "SET"),
            Err(RespError::UnexpectedReply { command: "SET", .. })
        ));

        assert_eq!(expect_int(Frame::Integer(7), "INCR"), Ok(7));
        assert_eq!(
            expect_bulk(Frame::Bulk(Bytes::from_static(b"v")), "GET"),
            Ok(Some(Bytes::from_static(b"v")))
        );
        assert_eq!(expect_bulk(Frame::Null, "GET"), Ok(None));

        let items = expect_bulk_items(
            Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(b"a")),
                Frame::Bulk(Bytes::from_static(b"b")),
            ]),
            "KEYS",
        )
        .unwrap();
        assert_eq!(items.len(), 2);

        assert!(matches!(
            expect_bulk_items(Frame::Integer(0), "KEYS"),
            Err(RespError::UnexpectedReply { .. })
        ));
    }
}
