//! Inbound session: one acceptor per configured bind, accept loop,
//! black/whitelist and capacity enforcement before handshake.

use crate::config::Authority;
use crate::error::{Code, Error};
use crate::net::{Acceptor, Socket};
use crate::p2p::Context;
use crate::protocols;
use crate::runtime::Strand;
use crate::sessions::{SessionBase, launch_channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Delay before retrying an accept while the service is suspended.
const SUSPENDED_RETRY: Duration = Duration::from_secs(1);

pub(crate) struct SessionInbound {
    base: Arc<SessionBase>,
    acceptors: Mutex<Vec<Arc<Acceptor>>>,
}

impl SessionInbound {
    pub fn new(context: Arc<Context>, strand: Strand) -> Arc<Self> {
        Arc::new(Self {
            base: Arc::new(SessionBase::new(context, strand)),
            acceptors: Mutex::new(Vec::new()),
        })
    }

    /// Bind and listen on every configured authority; a bind failure is a
    /// fatal start error. With inbound disabled this is a bypass.
    pub async fn start(self: &Arc<Self>) -> Code {
        let settings = &self.base.context.settings;
        if settings.inbound_connections == 0 || settings.binds.is_empty() {
            debug!("inbound session bypassed");
            return Ok(());
        }

        for bind in settings.binds.clone() {
            let acceptor = Acceptor::new(self.base.context.suspended.clone());
            acceptor.start(&bind).await?;
            debug!("listening on {}", acceptor.local().unwrap_or(bind));
            self.acceptors.lock().unwrap().push(acceptor.clone());
            self.accept_next(acceptor);
        }
        Ok(())
    }

    /// The first bound authority, once listening.
    pub fn local(&self) -> Option<Authority> {
        self.acceptors.lock().unwrap().first().and_then(|acceptor| acceptor.local())
    }

    fn accept_next(self: &Arc<Self>, acceptor: Arc<Acceptor>) {
        if self.base.stopped() {
            return;
        }
        let session = self.clone();
        let again = acceptor.clone();
        acceptor.accept(move |result| session.handle_accept(result, again));
    }

    fn handle_accept(self: Arc<Self>, result: Result<Arc<Socket>, Error>, acceptor: Arc<Acceptor>) {
        if self.base.stopped() {
            if let Ok(socket) = result {
                socket.stop();
            }
            return;
        }

        match result {
            Ok(socket) => {
                self.launch(socket);
                self.accept_next(acceptor);
            }
            Err(Error::ServiceSuspended) => {
                let session = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(SUSPENDED_RETRY).await;
                    session.accept_next(acceptor);
                });
            }
            Err(Error::OperationCanceled) | Err(Error::ServiceStopped) => {}
            Err(error) => {
                warn!("accept failed: {}", error);
                self.accept_next(acceptor);
            }
        }
    }

    fn launch(self: &Arc<Self>, socket: Arc<Socket>) {
        let settings = self.base.context.settings.clone();
        let authority = socket.authority().clone();

        if self.base.context.inbound_count() >= usize::from(settings.inbound_connections) {
            debug!("dropping {}: {}", authority, Error::PeerUnsupported);
            socket.stop();
            return;
        }
        if settings.blacklisted(&authority) {
            debug!("dropping {}: {}", authority, Error::PeerBlacklisted);
            socket.stop();
            return;
        }
        if settings.not_whitelisted(&authority) {
            debug!("dropping {}: {}", authority, Error::NotAllowed);
            socket.stop();
            return;
        }

        let channel = match self.base.context.create_channel(socket.clone(), true) {
            Ok(channel) => channel,
            Err(_) => {
                socket.stop();
                return;
            }
        };

        debug!("inbound channel {} from {}", channel.id(), authority);
        let context = self.base.context.clone();
        launch_channel(
            &self.base,
            channel,
            settings.services_minimum,
            move |channel| protocols::attach_standard(&context, channel),
            |_code| {},
            move |code| debug!("inbound channel from {} stopped: {}", authority, code),
        );
    }

    /// Stop acceptors, then supervised channels in id order.
    pub fn stop(&self) {
        if !self.base.set_stopped() {
            return;
        }
        for acceptor in self.acceptors.lock().unwrap().drain(..) {
            acceptor.stop();
        }
        self.base.stop_channels();
    }
}
