//! End-to-end scenarios against an in-process mock server that speaks RESP
//! through this crate's own codec.

use crate::client::{Client, ClientBuilder, ClientConfig, RespError};
use crate::codec;
use crate::command::Command;
use crate::frame::{Frame, FrameRef};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Mock server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    List(Vec<Vec<u8>>),
}

type Store = Arc<Mutex<HashMap<Vec<u8>, Value>>>;

enum Action {
    Reply(Frame),
    SleepThen(Duration, Frame),
}

/// A scripted Redis-alike good enough for the client's command set:
/// strings, lists, AUTH/SELECT/HELLO handshakes and `DEBUG SLEEP`.
struct MockServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

impl MockServer {
    async fn start() -> MockServer {
        Self::start_with(None, None).await
    }

    async fn start_at(addr: SocketAddr) -> MockServer {
        Self::start_with(Some(addr), None).await
    }

    async fn start_auth(password: &[u8]) -> MockServer {
        Self::start_with(None, Some(password.to_vec())).await
    }

    async fn start_with(addr: Option<SocketAddr>, auth: Option<Vec<u8>>) -> MockServer {
        let listener = match addr {
            Some(addr) => {
                // Right after a stop the port can take a moment to free up.
                let deadline = Instant::now() + Duration::from_secs(2);
                loop {
                    match TcpListener::bind(addr).await {
                        Ok(listener) => break listener,
                        Err(err) if Instant::now() < deadline => {
                            let _ = err;
                            sleep(Duration::from_millis(20)).await;
                        }
                        Err(err) => panic!("rebind {addr}: {err}"),
                    }
                }
            }
            None => TcpListener::bind("127.0.0.1:0").await.expect("bind"),
        };
        let addr = listener.local_addr().expect("local addr");
        let stop = CancellationToken::new();
        let store: Store = Arc::new(Mutex::new(HashMap::new()));

        let accept_stop = stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = accept_stop.cancelled() => return,
                    accepted = listener.accept() => accepted,
                };
                let Ok((stream, _)) = accepted else { return };
                tokio::spawn(serve_connection(
                    stream,
                    store.clone(),
                    auth.clone(),
                    accept_stop.clone(),
                ));
            }
        });

        MockServer { addr, handle, stop }
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Kill the server: the listener and every open connection drop.
    async fn stop(self) -> SocketAddr {
        self.stop.cancel();
        let _ = self.handle.await;
        self.addr
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    store: Store,
    auth: Option<Vec<u8>>,
    stop: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(4 * 1024);
    let mut replies = BytesMut::new();
    loop {
        loop {
            let parsed = match codec::try_read(&buf[..]) {
                Ok(Some((frame, used))) => Some((command_args(&frame), used)),
                Ok(None) => None,
                Err(_) => return,
            };
            let Some((args, used)) = parsed else { break };
            buf.advance(used);
            let Some(args) = args else { return };

            match dispatch(&args, &store, &auth) {
                Action::Reply(frame) => write_reply(&mut replies, &frame),
                Action::SleepThen(delay, frame) => {
                    if !replies.is_empty() {
                        if stream.write_all(&replies).await.is_err() {
                            return;
                        }
                        replies.clear();
                    }
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                    write_reply(&mut replies, &frame);
                }
            }
        }

        if !replies.is_empty() {
            if stream.write_all(&replies).await.is_err() {
                return;
            }
            replies.clear();
        }

        let read = tokio::select! {
            _ = stop.cancelled() => return,
            read = stream.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn command_args(frame: &FrameRef<'_>) -> Option<Vec<Vec<u8>>> {
    match frame {
        FrameRef::Array(items) => items
            .iter()
            .map(|item| match item {
                FrameRef::Bulk(payload) => Some(payload.to_vec()),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn dispatch(args: &[Vec<u8>], store: &Store, auth: &Option<Vec<u8>>) -> Action {
    let Some(keyword) = args.first() else {
        return Action::Reply(err_frame("ERR empty command"));
    };
    let keyword = keyword.to_ascii_uppercase();
    let mut data = store.lock().unwrap();

    let reply = match keyword.as_slice() {
        b"PING" => Frame::Simple(Bytes::from_static(b"PONG")),
        b"ECHO" => match args.get(1) {
            Some(message) => Frame::Bulk(Bytes::copy_from_slice(message)),
            None => err_frame("ERR wrong number of arguments for 'echo' command"),
        },
        b"GET" => match args.get(1).and_then(|key| data.get(key.as_slice())) {
            Some(Value::Str(value)) => Frame::Bulk(Bytes::copy_from_slice(value)),
            Some(Value::List(_)) => wrongtype(),
            None => Frame::Null,
        },
        b"SET" => match (args.get(1), args.get(2)) {
            (Some(key), Some(value)) => {
                data.insert(key.clone(), Value::Str(value.clone()));
                Frame::Simple(Bytes::from_static(b"OK"))
            }
            _ => err_frame("ERR wrong number of arguments for 'set' command"),
        },
        b"DEL" => match args.get(1) {
            Some(key) => Frame::Integer(i64::from(data.remove(key.as_slice()).is_some())),
            None => err_frame("ERR wrong number of arguments for 'del' command"),
        },
        b"INCR" => match args.get(1) {
            Some(key) => match data.get(key.as_slice()).cloned() {
                None => {
                    data.insert(key.clone(), Value::Str(b"1".to_vec()));
                    Frame::Integer(1)
                }
                Some(Value::Str(value)) => {
                    match std::str::from_utf8(&value).ok().and_then(|s| s.parse::<i64>().ok()) {
                        Some(n) => {
                            data.insert(key.clone(), Value::Str((n + 1).to_string().into_bytes()));
                            Frame::Integer(n + 1)
                        }
                        None => err_frame("ERR value is not an integer or out of range"),
                    }
                }
                Some(Value::List(_)) => wrongtype(),
            },
            None => err_frame("ERR wrong number of arguments for 'incr' command"),
        },
        b"LPUSH" => match (args.get(1), args.get(2)) {
            (Some(key), Some(value)) => match data.get(key.as_slice()).cloned() {
                None => {
                    data.insert(key.clone(), Value::List(vec![value.clone()]));
                    Frame::Integer(1)
                }
                Some(Value::List(mut items)) => {
                    items.insert(0, value.clone());
                    let len = items.len() as i64;
                    data.insert(key.clone(), Value::List(items));
                    Frame::Integer(len)
                }
                Some(Value::Str(_)) => wrongtype(),
            },
            _ => err_frame("ERR wrong number of arguments for 'lpush' command"),
        },
        b"AUTH" => match auth {
            Some(required) if args.last().map(Vec::as_slice) == Some(required.as_slice()) => {
                Frame::Simple(Bytes::from_static(b"OK"))
            }
            Some(_) => err_frame("WRONGPASS invalid username-password pair"),
            None => Frame::Simple(Bytes::from_static(b"OK")),
        },
        b"SELECT" => Frame::Simple(Bytes::from_static(b"OK")),
        b"HELLO" => Frame::Map(vec![
            (
                Frame::Bulk(Bytes::from_static(b"server")),
                Frame::Bulk(Bytes::from_static(b"mock")),
            ),
            (Frame::Bulk(Bytes::from_static(b"proto")), Frame::Integer(3)),
        ]),
        b"FLUSHALL" => {
            data.clear();
            Frame::Simple(Bytes::from_static(b"OK"))
        }
        b"DEBUG" => {
            let seconds = args
                .get(2)
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            return Action::SleepThen(
                Duration::from_secs_f64(seconds),
                Frame::Simple(Bytes::from_static(b"OK")),
            );
        }
        _ => err_frame("ERR unknown command"),
    };
    Action::Reply(reply)
}

fn err_frame(message: &str) -> Frame {
    Frame::Error(Bytes::copy_from_slice(message.as_bytes()))
}

fn wrongtype() -> Frame {
    err_frame("WRONGTYPE Operation against a key holding the wrong kind of value")
}

/// Encode like a RESP2 server would: the null reply goes out as a null
/// bulk, exercising the `$-1` wire form end to end.
fn write_reply(out: &mut BytesMut, frame: &Frame) {
    match frame {
        Frame::Null => out.extend_from_slice(b"$-1\r\n"),
        other => codec::encode_frame(out, other),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

fn fast_config() -> ClientConfig {
    ClientConfig::default()
        .with_connection_count(1)
        .with_connect_timeout(Duration::from_secs(2))
        .with_reconnect_backoff(Duration::from_millis(50), Duration::from_millis(500))
}

async fn connect(server: &MockServer, config: ClientConfig) -> Client {
    Client::connect(&server.addr().ip().to_string(), server.addr().port(), config)
        .await
        .expect("client connects")
}

#[tokio::test]
async fn s1_ping_resolves_to_pong() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;

    let reply = client.submit(Command::ping()).await.expect("reply");
    assert_eq!(reply, Frame::Simple(Bytes::from_static(b"PONG")));
    client.ping().await.expect("typed wrapper");

    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn s2_get_missing_resolves_to_null() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;

    let reply = client.submit(Command::get("missin")).await.expect("reply");
    assert_eq!(reply, Frame::Null);
    assert_eq!(client.get("missin").await.expect("typed"), None);

    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn s3_set_get_round_trip() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;

    client.set("k", "hello").await.expect("set");
    let value = client.get("k").await.expect("get");
    assert_eq!(value, Some(Bytes::from_static(b"hello")));

    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn s4_pipeline_of_three_resolves_in_order() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;

    let mut pipe = client.pipeline();
    pipe.then(Command::set("a", "1"))
        .then(Command::set("b", "2"))
        .then(Command::incr("a"));
    assert_eq!(pipe.len(), 3);

    let replies = pipe.execute().await.expect("pipeline");
    assert_eq!(
        replies,
        vec![
            Ok(Frame::Simple(Bytes::from_static(b"OK"))),
            Ok(Frame::Simple(Bytes::from_static(b"OK"))),
            Ok(Frame::Integer(2)),
        ]
    );

    // After execution the pipeline is empty and reusable; executing it
    // empty is a no-op.
    assert!(pipe.is_empty());
    assert!(pipe.execute().await.expect("empty pipeline").is_empty());

    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn s5_wrongtype_surfaces_category() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;

    client.lpush("x", "1").await.expect("lpush");
    let err = client.incr("x").await.expect_err("must fail");
    assert_eq!(err.category(), Some("WRONGTYPE"));

    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn s6_in_flight_fails_on_kill_and_reconnect_recovers() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;
    client.ping().await.expect("warm");

    // Leave a slow command in flight, then kill the server under it.
    let slow = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .submit(Command::new("DEBUG", &[b"DEBUG", b"SLEEP", b"1"]))
                .await
        }
    });
    sleep(Duration::from_millis(200)).await;
    let addr = server.stop().await;

    let result = slow.await.expect("task");
    assert!(
        matches!(result, Err(RespError::Transport { .. })),
        "in-flight command must fail with a transport error, got {result:?}"
    );

    // Bring the server back on the same address; the supervisor reconnects
    // within the backoff budget and a fresh submission succeeds.
    let server = MockServer::start_at(addr).await;
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match client.ping().await {
            Ok(()) => break,
            Err(_) if Instant::now() < deadline => sleep(Duration::from_millis(100)).await,
            Err(err) => panic!("never recovered: {err}"),
        }
    }

    client.dispose().await.expect("dispose");
    server.stop().await;
}

// ---------------------------------------------------------------------------
// Quantified properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replies_resolve_in_submission_order() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;

    let futures: Vec<_> = (0..100)
        .map(|_| client.submit(Command::incr("ctr")))
        .collect();
    let replies = futures::future::join_all(futures).await;

    for (index, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply.expect("reply"), Frame::Integer(index as i64 + 1));
    }

    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn timeout_is_non_fatal_and_late_reply_is_discarded() {
    let server = MockServer::start().await;
    let config = fast_config().with_command_timeout(Duration::from_millis(200));
    let client = connect(&server, config).await;

    let err = client
        .submit(Command::new("DEBUG", &[b"DEBUG", b"SLEEP", b"1"]))
        .await
        .expect_err("must time out");
    assert_eq!(err, RespError::Timeout);

    // Wait out the slow reply, then prove the endpoint survived and the
    // late reply was absorbed by its slot rather than desyncing the FIFO.
    sleep(Duration::from_millis(1100)).await;
    client.ping().await.expect("endpoint still healthy");

    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn cancellation_after_write_discards_the_reply() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;

    let cancel = CancellationToken::new();
    let pending = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            client
                .submit_with_cancel(Command::new("DEBUG", &[b"DEBUG", b"SLEEP", b"1"]), cancel)
                .await
        })
    };

    sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    let result = pending.await.expect("task");
    assert_eq!(result, Err(RespError::Cancelled));

    // The slot stayed behind to absorb the server's eventual reply.
    sleep(Duration::from_millis(1100)).await;
    client.ping().await.expect("endpoint still healthy");

    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn fire_and_forget_still_executes() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;

    client
        .submit_nowait(Command::set("silent", "v"))
        .await
        .expect("enqueue");

    // The discarded OK must not desync the pipeline for what follows.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match client.get("silent").await.expect("get") {
            Some(value) => {
                assert_eq!(value, Bytes::from_static(b"v"));
                break;
            }
            None if Instant::now() < deadline => sleep(Duration::from_millis(20)).await,
            None => panic!("fire-and-forget command never executed"),
        }
    }

    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn dispose_is_terminal_and_idempotent() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config()).await;

    client.set("k", "v").await.expect("set");
    client.dispose().await.expect("dispose");
    client.dispose().await.expect("dispose twice");

    let err = client.submit(Command::ping()).await.expect_err("disposed");
    assert_eq!(err, RespError::Disposed);
    let err = client.pipeline().then(Command::ping()).execute().await;
    assert!(matches!(err, Err(RespError::Disposed)));
}

#[tokio::test]
async fn pipelines_share_one_endpoint_with_concurrent_traffic() {
    let server = MockServer::start().await;
    // Several endpoints, so a broken pipeline split would be visible as
    // interleaved counters.
    let client = connect(&server, fast_config().with_connection_count(3)).await;

    for round in 0..10 {
        let mut pipe = client.pipeline();
        let key = format!("pipe{round}");
        pipe.then(Command::incr(&key))
            .then(Command::incr(&key))
            .then(Command::incr(&key));
        let replies = pipe.execute().await.expect("pipeline");
        let values: Vec<i64> = replies
            .into_iter()
            .map(|reply| reply.expect("reply").as_int().expect("integer"))
            .collect();
        assert_eq!(values, vec![1, 2, 3], "round {round} interleaved");
    }

    client.dispose().await.expect("dispose");
}

// ---------------------------------------------------------------------------
// Handshake and middleware
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auth_handshake_runs_before_ready() {
    let server = MockServer::start_auth(b"sesame").await;

    let good = fast_config().with_auth(None, "sesame");
    let client = connect(&server, good).await;
    client.ping().await.expect("authed");
    client.dispose().await.expect("dispose");

    let bad = fast_config()
        .with_auth(None, "wrong")
        .with_auto_reconnect(false)
        .with_connect_timeout(Duration::from_millis(500));
    let err = Client::connect(
        &server.addr().ip().to_string(),
        server.addr().port(),
        bad,
    )
    .await
    .expect_err("bad credentials rejected");
    assert_eq!(err.category(), Some("WRONGPASS"));
}

#[tokio::test]
async fn resp3_hello_negotiation() {
    let server = MockServer::start().await;
    let client = connect(&server, fast_config().with_resp3(true)).await;
    client.ping().await.expect("hello negotiated");
    client.dispose().await.expect("dispose");
}

#[tokio::test]
async fn interceptors_wrap_live_submissions() {
    use crate::client::{CommandContext, Interceptor, Next};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(Arc<AtomicU32>);
    impl Interceptor for Counter {
        fn intercept<'a>(
            &'a self,
            ctx: &'a mut CommandContext,
            next: Next<'a>,
        ) -> BoxFuture<'a, crate::client::RespResult<Frame>> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                next.run(ctx).await
            })
        }
    }

    let server = MockServer::start().await;
    let count = Arc::new(AtomicU32::new(0));
    let client = ClientBuilder::new(server.addr().ip().to_string(), server.addr().port())
        .with_config(fast_config())
        .with_interceptor(crate::client::LoggingInterceptor)
        .with_interceptor(Counter(count.clone()))
        .connect()
        .await
        .expect("client");

    client.ping().await.expect("ping");
    client.set("k", "v").await.expect("set");
    assert_eq!(client.get("k").await.expect("get"), Some(Bytes::from_static(b"v")));
    assert_eq!(count.load(Ordering::SeqCst), 3);

    client.dispose().await.expect("dispose");
}
