//! `FrontFacade`: public acceptor bridged to a backend reactor group.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use nioloop_core::error::Result;
use nioloop_executor::{Acceptor, ReactorGroup};

use crate::config::FacadeConfig;
use crate::forward::ForwardInbound;

struct Running {
    public: Arc<ReactorGroup>,
    backend: Arc<ReactorGroup>,
    acceptor: Acceptor,
    started: Instant,
}

pub struct FrontFacade {
    config: FacadeConfig,
    started: AtomicBool,
    accepting: Arc<AtomicBool>,
    running: Mutex<Option<Running>>,
}

impl FrontFacade {
    pub fn new(config: FacadeConfig) -> Self {
        Self {
            config,
            started: AtomicBool::new(false),
            accepting: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    /// Start the backend group, then the public group and its acceptor.
    /// A second call is a no-op. On failure nothing is left running and
    /// `start` may be retried.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.launch() {
            Ok(running) => {
                tracing::info!(
                    addr = %running.acceptor.local_addr(),
                    backends = self.config.backends.len(),
                    "facade started"
                );
                *self.running.lock() = Some(running);
                Ok(())
            }
            Err(e) => {
                self.accepting.store(false, Ordering::Release);
                self.started.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<Running> {
        self.config.validate()?;
        let backend = ReactorGroup::builder("backend")
            .config(self.config.backend_reactor.clone())
            .start()?;
        let public = match ReactorGroup::builder("public")
            .config(self.config.reactor.clone())
            .start()
        {
            Ok(g) => g,
            Err(e) => {
                backend.stop();
                return Err(e);
            }
        };

        self.accepting.store(true, Ordering::Release);
        let accepting = self.accepting.clone();
        let backends = self.config.backends.clone();
        let next = AtomicUsize::new(0);
        let (p, b) = (public.clone(), backend.clone());
        let bound = Acceptor::bind(self.config.public_addr, "public", move |stream, peer| {
            if !accepting.load(Ordering::Acquire) {
                tracing::debug!(%peer, "dropping accept during shutdown");
                return;
            }
            let target = backends[next.fetch_add(1, Ordering::Relaxed) % backends.len()];
            if let Err(e) = bridge(&p, &b, stream, target) {
                tracing::warn!(%peer, backend = %target, error = %e, "bridge failed");
            }
        });
        match bound {
            Ok(acceptor) => Ok(Running {
                public,
                backend,
                acceptor,
                started: Instant::now(),
            }),
            Err(e) => {
                public.stop();
                backend.stop();
                Err(e)
            }
        }
    }

    /// Address the public acceptor is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.acceptor.local_addr())
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Backend side first, then the public acceptor and group.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::Release);
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.backend.stop();
        running.acceptor.unbind();
        running.public.stop();
        self.started.store(false, Ordering::Release);
        tracing::info!(uptime = ?running.started.elapsed(), "facade stopped");
    }
}

impl Drop for FrontFacade {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start a backend connection for `stream` and cross-wire the two
/// sessions. Never waits on the backend: the handshake finishes on the
/// backend core, which holds client bytes until then.
///
/// The backend side is attached first so client bytes always find it.
fn bridge(
    public: &ReactorGroup,
    backend: &ReactorGroup,
    stream: TcpStream,
    target: SocketAddr,
) -> Result<()> {
    let front = public.prepare(stream)?;
    let back = backend.prepare_connect(target)?;
    let back_session = back.attach(Box::new(ForwardInbound::new(front.session().clone())))?;
    let front_session = match front.attach(Box::new(ForwardInbound::new(back_session.clone()))) {
        Ok(s) => s,
        Err(e) => {
            let _ = back_session.close();
            return Err(e);
        }
    };
    // The backend may have failed before the front side was registered.
    if !back_session.is_open() {
        let _ = front_session.close();
    }
    Ok(())
}
