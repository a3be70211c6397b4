//! Address-exchange protocol (31402+).
//!
//! The inbound half sinks learned addresses into the pool; addresses are
//! solicited only on channels we dialed, and a peer that connected to us
//! may only advertise a single self-announce. The outbound half serves
//! one pool snapshot (plus our own configured addresses) per channel;
//! duplicate solicitations are logged and ignored.

use crate::error::Error;
use crate::messages::address::{AddressItem, MAX_ADDRESSES};
use crate::messages::{Address, GetAddress, Identifier, Message};
use crate::net::Channel;
use crate::p2p::Context;
use crate::runtime::time::unix_seconds;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

pub(crate) struct ProtocolAddress {
    context: Arc<Context>,
    channel: Weak<Channel>,
    /// An address message has been accepted (singleton limit, inbound).
    received: AtomicBool,
    /// A snapshot has been served; at most one per channel.
    answered: AtomicBool,
}

impl ProtocolAddress {
    pub(crate) fn attach(context: Arc<Context>, channel: &Arc<Channel>) {
        let settings = channel.settings().clone();
        let protocol = Arc::new(Self {
            context,
            channel: Arc::downgrade(channel),
            received: AtomicBool::new(false),
            answered: AtomicBool::new(false),
        });

        // Advertise our own address when configured with a real port.
        if let Some(own) = settings.announced_self() {
            let item = AddressItem::new(own, unix_seconds() as u32, settings.services_maximum);
            channel.send(&Message::Address(Address { addresses: vec![item] }), |_| {});
        }

        let outbound = !channel.inbound();

        let on_address = protocol.clone();
        channel.subscribe_message(Identifier::Address, move |event| {
            if let Ok(message) = event
                && let Message::Address(address) = message.as_ref()
            {
                on_address.handle_address(address, outbound);
            }
            true
        });

        let on_get = protocol.clone();
        channel.subscribe_message(Identifier::GetAddress, move |event| {
            if event.is_ok() {
                on_get.handle_get_address();
            }
            true
        });

        // Do not solicit from peers that dialed us, and do not solicit at
        // all when nothing can be stored.
        if outbound && settings.host_pool_enabled() {
            channel.send(&Message::GetAddress(GetAddress), |_| {});
        }
    }

    fn handle_address(self: &Arc<Self>, address: &Address, outbound: bool) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        let repeated = self.received.swap(true, Ordering::SeqCst);

        // A peer that connected to us gets one singleton self-announce.
        if !outbound && (repeated || address.addresses.len() != 1) {
            warn!(
                "channel {} unsolicited addresses ({}) from inbound peer",
                channel.id(),
                address.addresses.len()
            );
            channel.stop(Error::ProtocolViolation);
            return;
        }

        let accepted = self.context.hosts.save(&address.addresses);
        debug!(
            "channel {} accepted {} of {} addresses",
            channel.id(),
            accepted,
            address.addresses.len()
        );
    }

    fn handle_get_address(self: &Arc<Self>) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        if self.answered.swap(true, Ordering::SeqCst) {
            debug!("channel {} ignoring duplicate address request", channel.id());
            return;
        }

        let settings = channel.settings();
        let mut addresses = self
            .context
            .hosts
            .snapshot(MAX_ADDRESSES.saturating_sub(settings.selfs.len()));
        let now = unix_seconds() as u32;
        addresses.extend(
            settings
                .selfs
                .iter()
                .filter(|own| own.is_specified())
                .map(|own| AddressItem::new(own, now, settings.services_maximum)),
        );

        debug!("channel {} answering with {} addresses", channel.id(), addresses.len());
        channel.send(&Message::Address(Address { addresses }), |_| {});
    }
}
