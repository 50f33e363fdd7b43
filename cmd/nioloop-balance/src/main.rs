//! nioloop-balance: front facade.
//!
//! Accepts public TCP connections and forwards each one, byte for byte, to
//! a backend chosen round robin.
//!
//! ```text
//! nioloop-balance <bind> <backend>[,<backend>...]
//! NIO_FACADE_BIND=0.0.0.0:9000 NIO_FACADE_BACKENDS=10.0.0.1:9000 nioloop-balance
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nioloop_balance::config::parse_backends;
use nioloop_balance::{FacadeConfig, FrontFacade};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = FacadeConfig::from_env();
    if let Some(bind) = args.get(1) {
        match bind.parse() {
            Ok(addr) => config.public_addr = addr,
            Err(_) => {
                eprintln!("usage: nioloop-balance <bind> <backend>[,<backend>...]");
                std::process::exit(2);
            }
        }
    }
    if let Some(list) = args.get(2) {
        config.backends = parse_backends(list);
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_signal as usize);
        libc::signal(libc::SIGTERM, handle_signal as usize);
    }

    let facade = FrontFacade::new(config);
    if let Err(e) = facade.start() {
        tracing::error!(error = %e, "facade failed to start");
        std::process::exit(1);
    }

    while RUNNING.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::info!("shutting down");
    facade.stop();
}
