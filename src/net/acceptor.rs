//! Inbound listener: bind, listen, one-shot accepts.

use crate::config::Authority;
use crate::error::{Code, Error};
use crate::net::socket::Socket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::debug;

/// Accepts are one-shot: the session posts another accept from the
/// handler. `stop` cancels a pending accept with `OperationCanceled`.
pub struct Acceptor {
    /// Shared with the owning session; set while the service is paused.
    suspended: Arc<AtomicBool>,
    listener: Mutex<Option<Arc<TcpListener>>>,
    stopped: AtomicBool,
    stop: watch::Sender<bool>,
}

impl Acceptor {
    pub fn new(suspended: Arc<AtomicBool>) -> Arc<Self> {
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            suspended,
            listener: Mutex::new(None),
            stopped: AtomicBool::new(false),
            stop,
        })
    }

    /// Bind and listen; a bind failure is returned synchronously.
    pub async fn start(&self, local: &Authority) -> Code {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::ServiceStopped);
        }
        let listener = TcpListener::bind(local.to_socket_addr())
            .await
            .map_err(|error| {
                debug!("bind {} failed: {}", local, error);
                Error::ListenFailed
            })?;
        *self.listener.lock().unwrap() = Some(Arc::new(listener));
        Ok(())
    }

    /// The bound authority (reflects an ephemeral port after bind).
    pub fn local(&self) -> Option<Authority> {
        self.listener
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .map(Authority::from)
    }

    /// One-shot: the handler receives a started socket or an error, after
    /// which another accept may be issued.
    pub fn accept<F>(&self, handler: F)
    where
        F: FnOnce(Result<Arc<Socket>, Error>) + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            handler(Err(Error::ServiceStopped));
            return;
        }
        if self.suspended.load(Ordering::SeqCst) {
            handler(Err(Error::ServiceSuspended));
            return;
        }
        let Some(listener) = self.listener.lock().unwrap().clone() else {
            handler(Err(Error::ListenFailed));
            return;
        };

        let mut stop = self.stop.subscribe();
        tokio::spawn(async move {
            let result = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => Ok(Socket::new(stream)),
                    Err(error) => {
                        debug!("accept failed: {}", error);
                        Err(Error::AcceptFailed)
                    }
                },
                _ = stop.wait_for(|stopped| *stopped) => Err(Error::OperationCanceled),
            };
            handler(result);
        });
    }

    /// Idempotent; cancels a pending accept and closes the listener.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.send_replace(true);
        self.listener.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn acceptor() -> Arc<Acceptor> {
        Acceptor::new(Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn test_accepts_a_connection() {
        let acceptor = acceptor();
        acceptor.start(&Authority::unspecified(0)).await.unwrap();
        let local = acceptor.local().unwrap();

        let (tx, rx) = oneshot::channel();
        acceptor.accept(move |result| {
            tx.send(result.map(|socket| socket.authority().clone())).unwrap();
        });

        let client = TcpStream::connect(("127.0.0.1", local.port())).await.unwrap();
        let accepted = rx.await.unwrap().unwrap();
        assert_eq!(accepted.port(), client.local_addr().unwrap().port());
    }

    #[tokio::test]
    async fn test_suspended_accept_fails_immediately() {
        let suspended = Arc::new(AtomicBool::new(true));
        let acceptor = Acceptor::new(suspended);
        acceptor.start(&Authority::unspecified(0)).await.unwrap();

        let (tx, rx) = oneshot::channel();
        acceptor.accept(move |result| {
            tx.send(result.err()).unwrap();
        });
        assert_eq!(rx.await.unwrap(), Some(Error::ServiceSuspended));
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_accept() {
        let acceptor = acceptor();
        acceptor.start(&Authority::unspecified(0)).await.unwrap();

        let (tx, rx) = oneshot::channel();
        acceptor.accept(move |result| {
            tx.send(result.err()).unwrap();
        });
        acceptor.stop();
        assert_eq!(rx.await.unwrap(), Some(Error::OperationCanceled));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_listen_failed() {
        let first = acceptor();
        first.start(&Authority::unspecified(0)).await.unwrap();
        let taken = first.local().unwrap();

        let second = acceptor();
        let local = Authority::new("127.0.0.1".parse().unwrap(), taken.port());
        assert_eq!(second.start(&local).await, Err(Error::ListenFailed));
    }
}
