//! Outbound session: one slot per configured connection, each racing a
//! batch of pooled addresses through `RaceQuality` and keeping the first
//! socket that connects.

use crate::config::Endpoint;
use crate::error::Error;
use crate::messages::AddressItem;
use crate::net::{Connector, Socket};
use crate::p2p::Context;
use crate::protocols;
use crate::runtime::{RaceQuality, Strand};
use crate::sessions::{SessionBase, launch_channel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Poll delay while the pool has no usable addresses.
const STARVED_RETRY: Duration = Duration::from_secs(1);

type Outcome = (Result<Arc<Socket>, Error>, AddressItem);

pub(crate) struct SessionOutbound {
    base: Arc<SessionBase>,
    connector: Arc<Connector>,
}

impl SessionOutbound {
    pub fn new(context: Arc<Context>, strand: Strand) -> Arc<Self> {
        let connector = Connector::new(
            context.settings.clone(),
            strand.clone(),
            context.suspended.clone(),
        );
        Arc::new(Self {
            base: Arc::new(SessionBase::new(context, strand)),
            connector,
        })
    }

    pub fn start(self: &Arc<Self>) {
        let settings = &self.base.context.settings;
        if settings.outbound_connections == 0 || !settings.host_pool_enabled() {
            debug!("outbound session bypassed");
            return;
        }
        for slot in 0..settings.outbound_connections {
            let session = self.clone();
            tokio::spawn(async move { session.run_slot(slot).await });
        }
    }

    async fn run_slot(self: Arc<Self>, slot: u16) {
        loop {
            if self.base.stopped() {
                return;
            }

            let candidates = self.draw_batch();
            if candidates.is_empty() {
                tokio::time::sleep(STARVED_RETRY).await;
                continue;
            }

            // First successful connect wins; losers release their socket
            // and return their address to the pool.
            let racer = Arc::new(RaceQuality::<Outcome>::new(candidates.len()));
            let (winner_tx, winner_rx) = oneshot::channel();
            racer.start(move |outcome| {
                let _ = winner_tx.send(outcome);
            });

            for address in candidates {
                let endpoint = Endpoint::from(address.to_authority());
                let racer = racer.clone();
                let hosts = self.base.context.hosts.clone();
                self.connector.connect(&endpoint, move |result| {
                    let socket = result.as_ref().ok().cloned();
                    let won = racer.finish(result.is_ok(), (result, address.clone()));
                    if !won {
                        if let Some(socket) = socket {
                            socket.stop();
                        }
                        hosts.restore(address);
                    }
                });
            }

            let Ok((result, address)) = winner_rx.await else {
                return;
            };
            match result {
                Ok(socket) => self.run_channel(slot, socket, address).await,
                Err(error) => {
                    debug!("slot {} connect round failed: {}", slot, error);
                    tokio::time::sleep(STARVED_RETRY).await;
                }
            }
        }
    }

    /// Fetch up to a batch of distinct addresses, taking each out of the
    /// pool for the duration of the attempt.
    fn draw_batch(&self) -> Vec<AddressItem> {
        let settings = &self.base.context.settings;
        let hosts = &self.base.context.hosts;
        let batch = usize::from(settings.connect_batch_size.max(1));

        let mut out = Vec::with_capacity(batch);
        for _ in 0..batch {
            match hosts.fetch() {
                Ok(address) => {
                    hosts.take(&address);
                    out.push(address);
                }
                Err(_) => break,
            }
        }
        out
    }

    async fn run_channel(&self, slot: u16, socket: Arc<Socket>, address: AddressItem) {
        let hosts = self.base.context.hosts.clone();
        let channel = match self.base.context.create_channel(socket.clone(), false) {
            Ok(channel) => channel,
            Err(_) => {
                socket.stop();
                hosts.restore(address);
                return;
            }
        };
        debug!("slot {} outbound channel {} to {}", slot, channel.id(), address);

        let context = self.base.context.clone();
        let settings = &self.base.context.settings;
        let (stopped_tx, stopped_rx) = oneshot::channel();
        launch_channel(
            &self.base,
            channel,
            settings.services_minimum,
            move |channel| protocols::attach_standard(&context, channel),
            |_code| {},
            move |code| {
                let _ = stopped_tx.send(code);
            },
        );

        // The slot restarts on channel stop; the address goes back to the
        // pool unless the stop reason is terminal.
        if let Ok(code) = stopped_rx.await {
            debug!("slot {} channel to {} stopped: {}", slot, address, code);
            if !code.is_terminal() {
                hosts.restore(address);
            }
        }
    }

    pub fn stop(&self) {
        if !self.base.set_stopped() {
            return;
        }
        self.connector.stop();
        self.base.stop_channels();
    }
}
