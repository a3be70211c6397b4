//! The version handshake state machine.
//!
//! Both sides send their version immediately, validate the peer's version
//! against configured minimums, acknowledge, and complete once a version
//! has been sent and a version and verack received, so either ordering of
//! the two directions works. At 70016 the capability announcements
//! (`sendaddrv2`, `wtxidrelay`) are sent between verack-out and observed
//! until channel stop; receiving one after verack is a protocol violation.

use crate::error::{Code, Error};
use crate::messages::address::AddressItem;
use crate::messages::{Identifier, Message, Reject, RejectCode, SendAddressV2, Verack, Version, WitnessTxIdRelay, level};
use crate::net::Channel;
use crate::p2p::Context;
use crate::runtime::Deadline;
use crate::runtime::time::unix_seconds;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

type ShakeHandler = Box<dyn FnOnce(Code) + Send + 'static>;

struct Shake {
    sent_version: bool,
    received_version: bool,
    received_verack: bool,
    completed: bool,
    handler: Option<ShakeHandler>,
}

pub(crate) struct ProtocolVersion {
    context: Arc<Context>,
    channel: Weak<Channel>,
    minimum_services: u64,
    timer: Deadline,
    state: Mutex<Shake>,
}

impl ProtocolVersion {
    /// Attach to a channel in its handshake phase. The handler is invoked
    /// exactly once: `Ok` at completion (before protocols attach), or the
    /// failure that stopped the handshake.
    pub(crate) fn attach<F>(
        context: Arc<Context>,
        channel: &Arc<Channel>,
        minimum_services: u64,
        handler: F,
    ) where
        F: FnOnce(Code) + Send + 'static,
    {
        let settings = channel.settings().clone();
        let timer = Deadline::new(channel.strand().clone(), settings.channel_handshake());
        let protocol = Arc::new(Self {
            context,
            channel: Arc::downgrade(channel),
            minimum_services,
            timer,
            state: Mutex::new(Shake {
                sent_version: false,
                received_version: false,
                received_verack: false,
                completed: false,
                handler: Some(Box::new(handler)),
            }),
        });

        // One deadline covers the whole handshake.
        let expired = Arc::downgrade(channel);
        protocol.timer.start(move |code| {
            if code.is_ok()
                && let Some(channel) = expired.upgrade()
            {
                channel.stop(Error::ChannelTimeout);
            }
        });

        let stopping = protocol.clone();
        channel.subscribe_stop(move |event| {
            if let Err(code) = event {
                stopping.timer.stop();
                if let Some(handler) = stopping.state.lock().unwrap().handler.take() {
                    handler(Err(code));
                }
            }
        });

        let on_version = protocol.clone();
        channel.subscribe_message(Identifier::Version, move |event| {
            if let Ok(message) = event
                && let Message::Version(version) = message.as_ref()
            {
                on_version.handle_version(version);
            }
            true
        });

        let on_verack = protocol.clone();
        channel.subscribe_message(Identifier::Verack, move |event| {
            if event.is_ok() {
                on_verack.handle_verack();
            }
            true
        });

        let on_addr_v2 = protocol.clone();
        channel.subscribe_message(Identifier::SendAddressV2, move |event| {
            if event.is_ok() {
                on_addr_v2.handle_capability(|channel| channel.set_addr_v2());
            }
            true
        });

        let on_wtxid = protocol.clone();
        channel.subscribe_message(Identifier::WitnessTxIdRelay, move |event| {
            if event.is_ok() {
                on_wtxid.handle_capability(|channel| channel.set_wtxid_relay());
            }
            true
        });

        protocol.send_version(channel);
    }

    fn send_version(self: &Arc<Self>, channel: &Arc<Channel>) {
        let settings = channel.settings();
        let own = match settings.announced_self() {
            Some(own) => AddressItem::new(own, 0, settings.services_maximum),
            None => AddressItem {
                timestamp: 0,
                services: settings.services_maximum,
                ip: [0u8; 16],
                port: 0,
            },
        };
        let message = Version {
            version: settings.maximum_protocol,
            services: settings.services_maximum,
            timestamp: unix_seconds() as i64,
            address_receiver: AddressItem::new(&channel.authority(), 0, 0),
            address_sender: own,
            nonce: channel.nonce(),
            user_agent: settings.user_agent.clone(),
            start_height: 0,
            relay: settings.enable_relay,
        };

        let protocol = self.clone();
        let sent = channel.clone();
        channel.send(&Message::Version(message), move |code| match code {
            Ok(()) => {
                protocol.state.lock().unwrap().sent_version = true;
                protocol.try_complete();
            }
            Err(error) => sent.stop(error),
        });
    }

    fn handle_version(self: &Arc<Self>, version: &Version) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        let settings = channel.settings().clone();

        if self.state.lock().unwrap().received_version {
            channel.stop(Error::ProtocolViolation);
            return;
        }

        if version.services & self.minimum_services != self.minimum_services
            || version.services & settings.invalid_services != 0
        {
            debug!(
                "channel {} services {:x} unacceptable",
                channel.id(),
                version.services
            );
            self.fail(&channel, version, Error::PeerInsufficient, RejectCode::Undefined, "services");
            return;
        }

        if version.version < settings.minimum_protocol {
            debug!("channel {} version {} below minimum", channel.id(), version.version);
            self.fail(&channel, version, Error::PeerInsufficient, RejectCode::Obsolete, "version");
            return;
        }

        if !settings.enable_loopback && self.context.is_own_nonce(version.nonce) {
            // Own traffic reflected back; never worth a rejection.
            channel.stop(Error::PeerLoopback);
            return;
        }

        let skew = (unix_seconds() as i64).saturating_sub(version.timestamp).unsigned_abs();
        if skew > settings.maximum_skew().as_secs() {
            debug!("channel {} clock skew {}s", channel.id(), skew);
            self.fail(&channel, version, Error::PeerTimestamp, RejectCode::Invalid, "timestamp");
            return;
        }

        let negotiated = version.version.min(settings.maximum_protocol);
        channel.set_peer_version(version.clone());
        channel.set_negotiated_version(negotiated);
        debug!(
            "channel {} peer {} negotiated {}",
            channel.id(),
            version.user_agent,
            negotiated
        );

        // Capability announcements go out after version, before verack.
        if negotiated >= level::CAPABILITIES {
            if settings.enable_address_v2 {
                channel.send(&Message::SendAddressV2(SendAddressV2), |_| {});
            }
            if settings.enable_witness_tx {
                channel.send(&Message::WitnessTxIdRelay(WitnessTxIdRelay), |_| {});
            }
        }

        let acknowledged = channel.clone();
        channel.send(&Message::Verack(Verack), move |code| {
            if let Err(error) = code {
                acknowledged.stop(error);
            }
        });

        self.state.lock().unwrap().received_version = true;
        self.try_complete();
    }

    fn handle_verack(self: &Arc<Self>) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        {
            let mut state = self.state.lock().unwrap();
            if state.received_verack {
                drop(state);
                channel.stop(Error::ProtocolViolation);
                return;
            }
            state.received_verack = true;
        }
        self.try_complete();
    }

    fn handle_capability(self: &Arc<Self>, set: impl FnOnce(&Channel)) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        if self.state.lock().unwrap().received_verack {
            channel.stop(Error::ProtocolViolation);
            return;
        }
        set(channel.as_ref());
    }

    fn try_complete(self: &Arc<Self>) {
        let handler = {
            let mut state = self.state.lock().unwrap();
            if state.completed
                || !state.sent_version
                || !state.received_version
                || !state.received_verack
            {
                return;
            }
            state.completed = true;
            state.handler.take()
        };
        self.timer.stop();
        if let Some(handler) = handler {
            handler(Ok(()));
        }
    }

    /// Stop the channel over a handshake fault, preceded by a reject frame
    /// when the peer speaks 70002+ and rejection is configured.
    fn fail(
        self: &Arc<Self>,
        channel: &Arc<Channel>,
        version: &Version,
        error: Error,
        code: RejectCode,
        reason: &str,
    ) {
        let settings = channel.settings();
        if settings.enable_reject && version.version >= level::REJECT {
            let reject = Reject {
                message: Version::COMMAND.into(),
                code,
                reason: reason.into(),
                hash: None,
            };
            let stopped = channel.clone();
            channel.send(&Message::Reject(reject), move |_| {
                stopped.stop(error);
            });
        } else {
            channel.stop(error);
        }
    }
}
