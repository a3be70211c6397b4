//! Seed harvest protocol: solicit the seed's address set, sink it into
//! the pool, drop the channel. Attached by the seed session in place of
//! the standard suite.

use crate::error::Error;
use crate::messages::{GetAddress, Identifier, Message};
use crate::net::Channel;
use crate::p2p::Context;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ProtocolSeed;

impl ProtocolSeed {
    pub(crate) fn attach(context: Arc<Context>, channel: &Arc<Channel>) {
        let seeded = channel.clone();
        channel.subscribe_message(Identifier::Address, move |event| {
            if let Ok(message) = event
                && let Message::Address(address) = message.as_ref()
            {
                let accepted = context.hosts.save(&address.addresses);
                debug!(
                    "channel {} seeded {} of {} addresses",
                    seeded.id(),
                    accepted,
                    address.addresses.len()
                );
                // A singleton is just the seed's self-announce; the batch
                // answer ends the channel, it has served its purpose.
                if address.addresses.len() > 1 {
                    seeded.stop(Error::ChannelDropped);
                    return false;
                }
            }
            true
        });

        channel.send(&Message::GetAddress(GetAddress), |_| {});
    }
}
