//! Log-only alert handler (31402+). Alert signatures are obsolete in the
//! ecosystem and never validated.

use crate::messages::{Identifier, Message};
use crate::net::Channel;
use std::sync::Arc;
use tracing::warn;

pub(crate) struct ProtocolAlert;

impl ProtocolAlert {
    pub(crate) fn attach(channel: &Arc<Channel>) {
        let id = channel.id();
        channel.subscribe_message(Identifier::Alert, move |event| {
            if let Ok(message) = event
                && let Message::Alert(alert) = message.as_ref()
            {
                warn!(
                    "channel {} peer alert: {} payload bytes (unverified)",
                    id,
                    alert.payload.len()
                );
            }
            true
        });
    }
}
