//! The network controller: owns the hosts pool, the channel/nonce
//! registries and the four sessions, and sequences startup and shutdown.

use crate::config::Endpoint;
use crate::error::{Code, Error};
use crate::net::{Channel, Hosts};
use crate::runtime::{Desubscriber, Strand};
use crate::sessions::inbound::SessionInbound;
use crate::sessions::manual::{ManualObserver, SessionManual};
use crate::sessions::outbound::SessionOutbound;
use crate::sessions::seed::SessionSeed;
use crate::settings::Settings;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct Registry {
    stopped: bool,
    nonces: HashSet<u64>,
    channels: BTreeMap<u64, Arc<Channel>>,
    inbound_count: usize,
    connects: Desubscriber<u64, Arc<Channel>>,
    closes: Desubscriber<u64, Arc<Channel>>,
}

/// State shared by the controller, its sessions and the handshake
/// protocol (for the cross-channel loopback guard).
pub(crate) struct Context {
    pub settings: Arc<Settings>,
    pub hosts: Arc<Hosts>,
    pub suspended: Arc<AtomicBool>,
    channel_ids: AtomicU64,
    keys: AtomicU64,
    registry: Mutex<Registry>,
}

impl Context {
    fn new(settings: Arc<Settings>) -> Arc<Self> {
        let hosts = Hosts::new(settings.clone());
        Arc::new(Self {
            settings,
            hosts,
            suspended: Arc::new(AtomicBool::new(false)),
            channel_ids: AtomicU64::new(0),
            keys: AtomicU64::new(0),
            registry: Mutex::new(Registry {
                stopped: false,
                nonces: HashSet::new(),
                channels: BTreeMap::new(),
                inbound_count: 0,
                connects: Desubscriber::new(),
                closes: Desubscriber::new(),
            }),
        })
    }

    pub fn next_key(&self) -> u64 {
        self.keys.fetch_add(1, Ordering::SeqCst)
    }

    /// Issue a channel with a fresh monotonic id and a unique non-zero
    /// nonce, and register it.
    pub fn create_channel(
        &self,
        socket: Arc<crate::net::Socket>,
        inbound: bool,
    ) -> Result<Arc<Channel>, Error> {
        let mut registry = self.registry.lock().unwrap();
        if registry.stopped {
            return Err(Error::ServiceStopped);
        }

        let id = self.channel_ids.fetch_add(1, Ordering::SeqCst);
        let nonce = loop {
            let nonce: u64 = rand::random();
            if nonce != 0 && registry.nonces.insert(nonce) {
                break nonce;
            }
        };

        let channel = Channel::new(self.settings.clone(), socket, id, nonce, inbound);
        registry.channels.insert(id, channel.clone());
        if inbound {
            registry.inbound_count += 1;
        }
        Ok(channel)
    }

    /// Unregister on stop; frees the nonce and notifies close
    /// subscribers.
    pub fn release_channel(&self, channel: &Arc<Channel>) {
        let mut registry = self.registry.lock().unwrap();
        if registry.channels.remove(&channel.id()).is_none() {
            return;
        }
        registry.nonces.remove(&channel.nonce());
        if channel.inbound() {
            registry.inbound_count = registry.inbound_count.saturating_sub(1);
        }
        registry.closes.notify(channel);
    }

    /// A peer echoing one of our active nonces is ourselves.
    pub fn is_own_nonce(&self, nonce: u64) -> bool {
        self.registry.lock().unwrap().nonces.contains(&nonce)
    }

    pub fn inbound_count(&self) -> usize {
        self.registry.lock().unwrap().inbound_count
    }

    pub fn channel_count(&self) -> usize {
        self.registry.lock().unwrap().channels.len()
    }

    /// Announce a channel whose handshake completed.
    pub fn notify_connect(&self, channel: &Arc<Channel>) {
        self.registry.lock().unwrap().connects.notify(channel);
    }

    fn stop(&self) {
        let mut registry = self.registry.lock().unwrap();
        registry.stopped = true;
        registry.connects.stop(Error::ServiceStopped);
        registry.closes.stop(Error::ServiceStopped);
    }
}

/// The process-facing network object.
pub struct P2p {
    context: Arc<Context>,
    strand: Strand,
    stopped: AtomicBool,
    flush_stop: watch::Sender<bool>,
    manual: Arc<SessionManual>,
    inbound: Arc<SessionInbound>,
    outbound: Arc<SessionOutbound>,
    seed: Arc<SessionSeed>,
}

impl P2p {
    /// Requires a running tokio runtime (strands spawn their executors).
    pub fn new(settings: Settings) -> Arc<Self> {
        let settings = Arc::new(settings);
        let context = Context::new(settings);
        let strand = Strand::new();
        let (flush_stop, _) = watch::channel(false);
        Arc::new(Self {
            manual: SessionManual::new(context.clone(), strand.clone()),
            inbound: SessionInbound::new(context.clone(), strand.clone()),
            outbound: SessionOutbound::new(context.clone(), strand.clone()),
            seed: SessionSeed::new(context.clone(), strand.clone()),
            context,
            strand,
            stopped: AtomicBool::new(false),
            flush_stop,
        })
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.context.settings
    }

    /// Count of pooled peer addresses.
    pub fn address_count(&self) -> usize {
        self.context.hosts.count()
    }

    /// Count of live channels (any direction, handshake included).
    pub fn channel_count(&self) -> usize {
        self.context.channel_count()
    }

    /// The bound inbound authority, once listening (reflects an ephemeral
    /// port).
    pub fn listen_authority(&self) -> Option<crate::config::Authority> {
        self.inbound.local()
    }

    /// Start the network: load the host cache, start the manual and
    /// inbound sessions, seed the pool if it is below the configured
    /// threshold, then start the outbound session. The handler is invoked
    /// exactly once: `Ok` when the network is up, or the first fatal
    /// configuration error.
    pub fn start<F>(self: &Arc<Self>, handler: F)
    where
        F: FnOnce(Code) + Send + 'static,
    {
        let this = self.clone();
        self.strand.post(async move {
            handler(this.do_start().await);
        });
    }

    async fn do_start(self: &Arc<Self>) -> Code {
        let context = &self.context;
        info!("network {} starting", context.settings.identifier);

        context.hosts.start()?;

        for peer in context.settings.peers.clone() {
            self.connect(&peer);
        }

        self.inbound.start().await?;

        if self.seed_required() {
            let (sufficient_tx, sufficient_rx) = tokio::sync::oneshot::channel();
            self.seed.start(move |code| {
                let _ = sufficient_tx.send(code);
            });
            // Startup cannot proceed without a usable address pool.
            match sufficient_rx.await {
                Ok(Ok(())) => debug!("seeding sufficient: {} addresses", self.address_count()),
                Ok(Err(error)) => {
                    warn!("seeding unsuccessful: {}", error);
                    return Err(error);
                }
                Err(_) => return Err(Error::OperationFailed),
            }
        }

        self.outbound.start();
        self.start_flush_timer();
        Ok(())
    }

    fn seed_required(&self) -> bool {
        let settings = &self.context.settings;
        settings.host_pool_enabled()
            && !settings.seeds.is_empty()
            && settings.outbound_connections != 0
            && self.address_count() < settings.minimum_address_count()
    }

    /// Pin a persistent connection (manual session).
    pub fn connect(&self, peer: &Endpoint) {
        self.manual.connect(peer, None);
    }

    /// Pin a persistent connection, observing every attempt and the final
    /// stop.
    pub fn connect_with(&self, peer: &Endpoint, observer: ManualObserver) {
        self.manual.connect(peer, Some(observer));
    }

    /// Register for completed-handshake channels. Handlers return `false`
    /// to desubscribe, run under the controller's registry and must not
    /// reenter it.
    pub fn subscribe_connect<F>(&self, handler: F)
    where
        F: FnMut(Result<&Arc<Channel>, Error>) -> bool + Send + 'static,
    {
        let key = self.context.next_key();
        let mut registry = self.context.registry.lock().unwrap();
        let _ = registry.connects.subscribe(key, handler);
    }

    /// Register for channel close events. Same contract as
    /// [`P2p::subscribe_connect`].
    pub fn subscribe_close<F>(&self, handler: F)
    where
        F: FnMut(Result<&Arc<Channel>, Error>) -> bool + Send + 'static,
    {
        let key = self.context.next_key();
        let mut registry = self.context.registry.lock().unwrap();
        let _ = registry.closes.subscribe(key, handler);
    }

    /// Stop sessions (each stops its channels in id order), flush and
    /// close the host cache, and refuse further work. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("network {} stopping", self.context.settings.identifier);

        self.context.suspended.store(true, Ordering::SeqCst);
        self.flush_stop.send_replace(true);

        self.seed.stop();
        self.manual.stop();
        self.inbound.stop();
        self.outbound.stop();

        if let Err(error) = self.context.hosts.stop() {
            warn!("host cache flush failed on stop: {}", error);
        }
        self.context.stop();
    }

    fn start_flush_timer(&self) {
        let hosts = self.context.hosts.clone();
        let period = self.context.settings.host_pool_flush();
        if period.is_zero() || !self.context.settings.host_pool_enabled() {
            return;
        }
        let mut stop = self.flush_stop.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick carries no news
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if hosts.flush().is_err() {
                            break;
                        }
                    }
                    _ = stop.wait_for(|stopped| *stopped) => break,
                }
            }
        });
    }
}

impl Drop for P2p {
    fn drop(&mut self) {
        self.stop();
    }
}
