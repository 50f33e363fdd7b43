//! nioloop-echo: length-framed echo server.
//!
//! Every data frame is answered with a frame carrying the same stream id
//! and payload. Heartbeats keep the connection alive and are not echoed.
//!
//! ```text
//! nioloop-echo [port] [cores]
//! RUST_LOG=debug NIO_WORKER_THREADS=8 nioloop-echo 9000
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nioloop_core::config::ReactorConfig;
use nioloop_core::worker::WorkerPool;
use nioloop_executor::{BoxError, FramedFactory, ReactorGroup, Request, Response};
use nioloop_module::{FixedPool, LengthFieldCodec, SizeClassPool};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

fn echo(request: Request, response: &mut Response) -> Result<(), BoxError> {
    response.write(request.payload());
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9000);
    let mut config = ReactorConfig::from_env();
    if let Some(cores) = args.get(2).and_then(|s| s.parse().ok()) {
        config = config.core_count(cores);
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_signal as usize);
        libc::signal(libc::SIGTERM, handle_signal as usize);
    }

    if let Err(e) = run(port, config) {
        tracing::error!(error = %e, "nioloop-echo failed");
        std::process::exit(1);
    }
}

fn run(port: u16, config: ReactorConfig) -> nioloop_core::Result<()> {
    let buffers = Arc::new(SizeClassPool::default());
    let workers = Arc::new(FixedPool::new(config.worker_threads, config.worker_queue_depth)?);

    let group = ReactorGroup::builder("echo")
        .config(config.clone())
        .buffers(buffers.clone())
        .start()?;
    let factory = Arc::new(FramedFactory::new(
        LengthFieldCodec::new(config.max_frame_len),
        buffers,
        workers.clone(),
        Arc::new(echo),
    ));
    let acceptor = group.bind(("0.0.0.0", port), factory)?;
    tracing::info!(
        addr = %acceptor.local_addr(),
        cores = config.core_count,
        workers = config.worker_threads,
        "nioloop-echo ready"
    );

    while RUNNING.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::info!(sessions = group.session_count(), "shutting down");
    acceptor.unbind();
    group.stop();
    workers.shutdown();
    workers.join();
    tracing::info!(panics = workers.panics(), "nioloop-echo done");
    Ok(())
}
