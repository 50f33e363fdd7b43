//! End-to-end reactor behaviour over loopback TCP.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use nioloop_core::buffer::BufferProvider;
use nioloop_core::config::ReactorConfig;
use nioloop_core::error::NioError;
use nioloop_core::protocol::ProtocolEncoder;
use nioloop_core::worker::WorkerPool;
use nioloop_executor::{
    Acceptor, BoxError, Event, FramedFactory, Handler, ReactorGroup, Request, Response, Session,
    SessionListener,
};
use nioloop_module::{FixedPool, LengthFieldCodec, SizeClassPool};
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(5);

/// `RUST_LOG=nioloop_executor=debug cargo test` shows the loops' logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Server {
    group: Arc<ReactorGroup>,
    acceptor: Acceptor,
    pool: Arc<SizeClassPool>,
    _workers: Arc<FixedPool>,
}

impl Server {
    fn addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.acceptor.unbind();
        self.group.stop();
    }
}

fn base_config() -> ReactorConfig {
    ReactorConfig::new()
        .core_count(2)
        .read_buffer_size(4096)
        .worker_threads(1)
}

fn serve(config: ReactorConfig, handler: Arc<dyn Handler>) -> Server {
    serve_with(config, handler, None)
}

fn serve_with(
    config: ReactorConfig,
    handler: Arc<dyn Handler>,
    listener: Option<Arc<dyn SessionListener>>,
) -> Server {
    init_tracing();
    let pool = Arc::new(SizeClassPool::default());
    let workers = Arc::new(FixedPool::new(config.worker_threads, config.worker_queue_depth).unwrap());
    let mut builder = ReactorGroup::builder("test")
        .config(config.clone())
        .buffers(pool.clone());
    if let Some(l) = listener {
        builder = builder.listener(l);
    }
    let group = builder.start().unwrap();
    let factory = Arc::new(FramedFactory::new(
        LengthFieldCodec::new(config.max_frame_len),
        pool.clone(),
        workers.clone(),
        handler,
    ));
    let acceptor = group.bind("127.0.0.1:0", factory).unwrap();
    Server {
        group,
        acceptor,
        pool,
        _workers: workers,
    }
}

fn frame(stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    LengthFieldCodec::new(usize::MAX).encode(stream_id, payload, &mut out);
    out.to_vec()
}

fn connect(addr: SocketAddr) -> TcpStream {
    let s = TcpStream::connect(addr).unwrap();
    s.set_read_timeout(Some(WAIT)).unwrap();
    s
}

fn read_frame(s: &mut TcpStream) -> (u32, Vec<u8>) {
    let mut header = [0u8; 8];
    s.read_exact(&mut header).unwrap();
    let id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut body = vec![0u8; len];
    s.read_exact(&mut body).unwrap();
    (id, body)
}

/// `true` once the server has closed the connection.
fn closed_by_server(s: &mut TcpStream, within: Duration) -> bool {
    s.set_read_timeout(Some(within)).unwrap();
    let mut buf = [0u8; 64];
    loop {
        match s.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => return true,
            Err(_) => return false,
        }
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn ping_pong() -> Arc<dyn Handler> {
    Arc::new(|req: Request, resp: &mut Response| -> Result<(), BoxError> {
        if req.payload() == b"ping" {
            resp.write(b"pong");
        } else {
            resp.write(req.payload());
        }
        Ok(())
    })
}

#[test]
fn test_ping_pong() {
    let server = serve(base_config(), ping_pong());
    let mut client = connect(server.addr());
    client.write_all(&frame(1, b"ping")).unwrap();

    let mut reply = [0u8; 12];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, &[0, 0, 0, 1, 0, 0, 0, 4, b'p', b'o', b'n', b'g']);
}

#[test]
fn test_back_to_back_frames_in_one_write() {
    let server = serve(base_config(), ping_pong());
    let mut client = connect(server.addr());
    let mut both = frame(1, b"alpha");
    both.extend(frame(2, b"bravo-longer"));
    client.write_all(&both).unwrap();

    assert_eq!(read_frame(&mut client), (1, b"alpha".to_vec()));
    assert_eq!(read_frame(&mut client), (2, b"bravo-longer".to_vec()));
}

#[test]
fn test_per_session_order_and_byte_split() {
    let server = serve(base_config(), ping_pong());
    let mut client = connect(server.addr());

    let mut wire = Vec::new();
    for i in 0..500u32 {
        wire.extend(frame(i, format!("msg-{i}").as_bytes()));
    }
    // dribble the stream in odd-sized pieces
    for chunk in wire.chunks(7) {
        client.write_all(chunk).unwrap();
    }
    for i in 0..500u32 {
        let (id, body) = read_frame(&mut client);
        assert_eq!(id, i);
        assert_eq!(body, format!("msg-{i}").into_bytes());
    }
}

#[test]
fn test_heartbeats_keep_session_alive_and_skip_workers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let handler: Arc<dyn Handler> = Arc::new(move |_req: Request, _resp: &mut Response| -> Result<(), BoxError> {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let config = base_config()
        .liveness_timeout(Duration::from_millis(300))
        .maintenance_interval(Duration::from_millis(50));
    let server = serve(config, handler);
    let mut client = connect(server.addr());

    for _ in 0..12 {
        client.write_all(&frame(9, b"")).unwrap();
        thread::sleep(Duration::from_millis(50));
    }
    assert!(!closed_by_server(&mut client, Duration::from_millis(50)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_idle_session_evicted_by_sweep_not_before() {
    let config = base_config()
        .liveness_timeout(Duration::from_millis(400))
        .maintenance_interval(Duration::from_millis(50));
    let server = serve(config, ping_pong());
    let mut client = connect(server.addr());
    assert!(wait_until(|| server.group.session_count() == 1));

    assert!(!closed_by_server(&mut client, Duration::from_millis(200)));
    assert!(closed_by_server(&mut client, WAIT));
    assert!(wait_until(|| server.group.session_count() == 0));
    let evictions: u64 = server
        .group
        .cores()
        .iter()
        .map(|h| h.stats().evictions.load(Ordering::SeqCst))
        .sum();
    assert_eq!(evictions, 1);
}

#[test]
fn test_failing_handler_closes_only_its_session() {
    let handler: Arc<dyn Handler> = Arc::new(|req: Request, resp: &mut Response| -> Result<(), BoxError> {
        match req.payload() {
            b"fail" => Err("refused".into()),
            b"panic" => panic!("handler bug"),
            other => {
                resp.write(other);
                Ok(())
            }
        }
    });
    let server = serve(base_config().core_count(1), handler);
    let baseline = server.pool.in_use();

    let mut healthy = connect(server.addr());
    let mut failing = connect(server.addr());
    let mut panicking = connect(server.addr());

    failing.write_all(&frame(1, b"fail")).unwrap();
    panicking.write_all(&frame(1, b"panic")).unwrap();
    assert!(closed_by_server(&mut failing, WAIT));
    assert!(closed_by_server(&mut panicking, WAIT));

    healthy.write_all(&frame(3, b"still here")).unwrap();
    assert_eq!(read_frame(&mut healthy), (3, b"still here".to_vec()));

    drop(healthy);
    assert!(wait_until(|| server.group.session_count() == 0));
    assert!(wait_until(|| server.pool.in_use() == baseline));
}

#[test]
fn test_oversize_frame_closes_connection() {
    let server = serve(base_config().max_frame_len(16), ping_pong());
    let mut client = connect(server.addr());
    client.write_all(&frame(1, &[0u8; 17])).unwrap();
    assert!(closed_by_server(&mut client, WAIT));
}

#[derive(Default)]
struct Counting {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl SessionListener for Counting {
    fn on_opened(&self, _session: &Arc<Session>) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }
    fn on_closed(&self, _session: &Arc<Session>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_listeners_see_open_and_close() {
    let counting = Arc::new(Counting::default());
    let server = serve_with(base_config(), ping_pong(), Some(counting.clone()));
    let clients: Vec<_> = (0..4).map(|_| connect(server.addr())).collect();
    assert!(wait_until(|| counting.opened.load(Ordering::SeqCst) == 4));
    drop(clients);
    assert!(wait_until(|| counting.closed.load(Ordering::SeqCst) == 4));
}

#[test]
fn test_server_close_after_pending_writes() {
    // The handler replies and then asks for a close: the reply must still
    // reach the client before the connection goes away.
    let handler: Arc<dyn Handler> = Arc::new(|req: Request, resp: &mut Response| -> Result<(), BoxError> {
        resp.write(req.payload());
        resp.flush()?;
        req.session().close()?;
        Ok(())
    });
    let server = serve(base_config(), handler);
    let mut client = connect(server.addr());
    client.write_all(&frame(4, b"bye")).unwrap();
    assert_eq!(read_frame(&mut client), (4, b"bye".to_vec()));
    assert!(closed_by_server(&mut client, WAIT));
}

#[test]
fn test_stop_is_idempotent_and_closes_late_events() {
    let server = serve(base_config(), ping_pong());
    let core = server.group.next().clone();
    server.group.stop();
    server.group.stop();
    assert!(!core.is_running());

    let fired = Arc::new(AtomicUsize::new(0));
    let f = fired.clone();
    let err = core
        .submit(Event::task(move |_cx| {
            f.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap_err();
    assert!(matches!(err, NioError::LoopStopped));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn test_connect_outbound() {
    // the first write lands before the handshake can have finished
    let server = serve(base_config(), ping_pong());
    let client_group = ReactorGroup::builder("client")
        .config(ReactorConfig::new().core_count(1))
        .start()
        .unwrap();

    let replies = Arc::new(AtomicUsize::new(0));
    let r = replies.clone();
    let workers: Arc<dyn WorkerPool> = Arc::new(FixedPool::new(1, 64).unwrap());
    let factory = FramedFactory::new(
        LengthFieldCodec::new(1024),
        client_group.buffers().clone(),
        workers,
        Arc::new(move |req: Request, _resp: &mut Response| -> Result<(), BoxError> {
            assert_eq!(req.payload(), b"pong");
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    let session = client_group.connect(server.addr(), &factory).unwrap();
    let mut out = BytesMut::new();
    LengthFieldCodec::new(1024).encode(1, b"ping", &mut out);
    session.write(out.freeze()).unwrap();

    assert!(wait_until(|| replies.load(Ordering::SeqCst) == 1));
    client_group.stop();
}

#[test]
fn test_refused_connect_closes_session() {
    init_tracing();
    let dead = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap()
    };
    let group = ReactorGroup::builder("client")
        .config(ReactorConfig::new().core_count(1))
        .start()
        .unwrap();
    let workers: Arc<dyn WorkerPool> = Arc::new(FixedPool::new(1, 64).unwrap());
    let factory = FramedFactory::new(
        LengthFieldCodec::new(1024),
        group.buffers().clone(),
        workers,
        ping_pong(),
    );

    let started = Instant::now();
    match group.connect(dead, &factory) {
        Ok(session) => {
            // held until the handshake ends, then dropped with the session;
            // the session may already be gone
            let _ = session.write(bytes::Bytes::from_static(b"lost"));
            assert!(wait_until(|| !session.is_open()));
            assert!(wait_until(|| group.session_count() == 0));
        }
        Err(e) => assert!(matches!(e, NioError::Io(_))),
    }
    assert!(started.elapsed() < WAIT);
    group.stop();
}
