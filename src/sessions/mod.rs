//! Sessions: control loops that produce and supervise channels.

pub mod inbound;
pub mod manual;
pub mod outbound;
pub mod seed;

use crate::error::{Code, Error};
use crate::net::Channel;
use crate::p2p::Context;
use crate::protocols::version::ProtocolVersion;
use crate::runtime::Strand;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// State common to every session kind: the shared network context, the
/// network strand, and the set of channels this session supervises.
pub(crate) struct SessionBase {
    pub context: Arc<Context>,
    pub strand: Strand,
    stopped: AtomicBool,
    channels: Mutex<BTreeMap<u64, Arc<Channel>>>,
}

impl SessionBase {
    pub fn new(context: Arc<Context>, strand: Strand) -> Self {
        Self {
            context,
            strand,
            stopped: AtomicBool::new(false),
            channels: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Mark stopped; true on the first call.
    pub fn set_stopped(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn register(&self, channel: &Arc<Channel>) {
        self.channels.lock().unwrap().insert(channel.id(), channel.clone());
    }

    pub fn unregister(&self, channel: &Channel) {
        self.channels.lock().unwrap().remove(&channel.id());
    }

    /// Stop every supervised channel, in channel-id order.
    pub fn stop_channels(&self) {
        let channels: Vec<Arc<Channel>> =
            self.channels.lock().unwrap().values().cloned().collect();
        for channel in channels {
            channel.stop(Error::ServiceStopped);
        }
    }
}

/// Wire a freshly created channel into a session: register it, subscribe
/// its stop (releasing registries and invoking the session's continuation),
/// start its pump and run the handshake. On handshake success the
/// session's protocol suite is attached, the channel resumed, and connect
/// subscribers notified; on failure the channel is stopped with the
/// handshake code. `on_handshake` observes the outcome either way.
pub(crate) fn launch_channel<P, H, S>(
    base: &Arc<SessionBase>,
    channel: Arc<Channel>,
    minimum_services: u64,
    attach_protocols: P,
    on_handshake: H,
    on_stop: S,
) where
    P: FnOnce(&Arc<Channel>) + Send + 'static,
    H: FnOnce(Code) + Send + 'static,
    S: FnOnce(Error) + Send + 'static,
{
    base.register(&channel);

    let stop_base = base.clone();
    let stopping = Arc::downgrade(&channel);
    let mut on_stop = Some(on_stop);
    channel.subscribe_stop(move |event| {
        if let Err(code) = event {
            if let Some(channel) = stopping.upgrade() {
                stop_base.unregister(&channel);
                stop_base.context.release_channel(&channel);
            }
            if let Some(continuation) = on_stop.take() {
                continuation(code);
            }
        }
    });

    let context = base.context.clone();
    let shaken = channel.clone();
    ProtocolVersion::attach(
        base.context.clone(),
        &channel,
        minimum_services,
        move |code| {
            match code {
                Ok(()) => {
                    attach_protocols(&shaken);
                    shaken.resume();
                    context.notify_connect(&shaken);
                }
                Err(error) => shaken.stop(error),
            }
            on_handshake(code);
        },
    );

    // The pump starts only after the handshake subscriptions are queued
    // on the strand, so an eager peer's version frame cannot outrun them.
    channel.start();
}
