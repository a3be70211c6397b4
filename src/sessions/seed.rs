//! Seed session: contact every configured seed in parallel, harvest
//! addresses into the pool, and report sufficiency through `RaceVolume`.

use crate::error::{Code, Error};
use crate::net::Connector;
use crate::p2p::Context;
use crate::protocols::seed::ProtocolSeed;
use crate::runtime::{RaceVolume, Strand};
use crate::sessions::{SessionBase, launch_channel};
use std::sync::Arc;
use tracing::debug;

pub(crate) struct SessionSeed {
    base: Arc<SessionBase>,
    connector: Arc<Connector>,
}

impl SessionSeed {
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

    /// Run one seeding round. `sufficient` fires with success as soon as
    /// the pool reaches the configured minimum, or with
    /// `SeedingUnsuccessful` once every seed has finished short of it.
    pub fn start<F>(self: &Arc<Self>, sufficient: F)
    where
        F: FnOnce(Code) + Send + 'static,
    {
        let settings = self.base.context.settings.clone();
        let seeds = settings.seeds.clone();
        if seeds.is_empty() || !settings.host_pool_enabled() {
            sufficient(Err(Error::SeedingUnsuccessful));
            return;
        }
        debug!("seeding from {} seeds", seeds.len());

        let racer = Arc::new(RaceVolume::new(
            seeds.len(),
            settings.minimum_address_count(),
            Error::SeedingUnsuccessful,
        ));
        let session = self.clone();
        racer.start(sufficient, move |_code| {
            debug!("seeding complete: {} addresses", session.base.context.hosts.count());
            session.stop();
        });

        for seed in seeds {
            let session = self.clone();
            let racer = racer.clone();
            let target = seed.clone();
            self.connector.connect(&seed, move |result| {
                let seed = target;
                let context = &session.base.context;
                let socket = match result {
                    Ok(socket) => socket,
                    Err(error) => {
                        debug!("seed {} unreachable: {}", seed, error);
                        racer.finish(context.hosts.count());
                        return;
                    }
                };
                let channel = match context.create_channel(socket.clone(), false) {
                    Ok(channel) => channel,
                    Err(_) => {
                        socket.stop();
                        racer.finish(context.hosts.count());
                        return;
                    }
                };
                debug!("seed channel {} to {}", channel.id(), seed);

                // Seeds need not offer full services to be worth asking
                // for addresses.
                let attach_context = context.clone();
                let finish_context = context.clone();
                launch_channel(
                    &session.base,
                    channel,
                    0,
                    move |channel| ProtocolSeed::attach(attach_context, channel),
                    |_code| {},
                    move |_code| {
                        racer.finish(finish_context.hosts.count());
                    },
                );
            });
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
