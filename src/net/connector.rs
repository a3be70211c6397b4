//! Outbound dialer: resolve + connect racing a deadline.

use crate::config::Endpoint;
use crate::error::Error;
use crate::net::socket::Socket;
use crate::runtime::{Deadline, RaceSpeed, Strand};
use crate::settings::Settings;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

type Outcome = Result<Arc<Socket>, Error>;

/// Each connect races the TCP dial (with DNS resolution) against the
/// configured deadline via a `RaceSpeed<2>`; the loser is canceled.
pub struct Connector {
    settings: Arc<Settings>,
    strand: Strand,
    suspended: Arc<AtomicBool>,
    stopped: AtomicBool,
    stop: watch::Sender<bool>,
}

impl Connector {
    pub fn new(settings: Arc<Settings>, strand: Strand, suspended: Arc<AtomicBool>) -> Arc<Self> {
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            settings,
            strand,
            suspended,
            stopped: AtomicBool::new(false),
            stop,
        })
    }

    /// Resolve and connect; candidates from a DNS name are tried in order
    /// until one succeeds or the deadline fires. The handler receives a
    /// started socket or one of `ResolveFailed`, `ConnectFailed`,
    /// `ConnectTimeout`, `ServiceSuspended`, `OperationCanceled`.
    pub fn connect<F>(self: &Arc<Self>, endpoint: &Endpoint, handler: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            handler(Err(Error::ServiceStopped));
            return;
        }
        if self.suspended.load(Ordering::SeqCst) {
            handler(Err(Error::ServiceSuspended));
            return;
        }

        let racer = Arc::new(RaceSpeed::<2, Outcome>::new());
        racer.start(handler);

        // The deadline covers resolution and every candidate dial; expiry
        // both wins the race and aborts the dial so the loser reports
        // promptly.
        let timer = Deadline::new(self.strand.clone(), self.settings.connect_timeout());
        let (abort_tx, abort_rx) = tokio::sync::oneshot::channel::<()>();
        let timed = racer.clone();
        timer.start(move |code| {
            let loss = match code {
                Ok(()) => Error::ConnectTimeout,
                Err(_) => Error::OperationCanceled,
            };
            let _ = timed.finish(Err(loss));
            if code.is_ok() {
                let _ = abort_tx.send(());
            }
        });

        let connector = self.clone();
        let endpoint = endpoint.clone();
        let mut stop = self.stop.subscribe();
        tokio::spawn(async move {
            let mut abort = abort_rx;
            let outcome = tokio::select! {
                outcome = connector.dial(&endpoint) => outcome,
                _ = stop.wait_for(|stopped| *stopped) => Err(Error::OperationCanceled),
                _ = &mut abort => Err(Error::OperationCanceled),
            };
            timer.stop();
            match outcome {
                Ok(socket) => {
                    if !racer.finish(Ok(socket.clone())) {
                        // The deadline beat us; release the late socket.
                        socket.stop();
                    }
                }
                Err(error) => {
                    let _ = racer.finish(Err(error));
                }
            }
        });
    }

    async fn dial(&self, endpoint: &Endpoint) -> Outcome {
        let candidates: Vec<SocketAddr> = match tokio::net::lookup_host(endpoint.to_lookup()).await
        {
            Ok(resolved) => resolved
                .filter(|address| self.settings.enable_ipv6 || address.is_ipv4())
                .collect(),
            Err(error) => {
                debug!("resolve {} failed: {}", endpoint, error);
                return Err(Error::ResolveFailed);
            }
        };
        if candidates.is_empty() {
            return Err(Error::ResolveFailed);
        }

        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => return Ok(Socket::new(stream)),
                Err(error) => debug!("connect {} failed: {}", candidate, error),
            }
        }
        Err(Error::ConnectFailed)
    }

    /// Idempotent; cancels in-flight connects.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.send_replace(true);
    }
}
