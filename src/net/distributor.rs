//! Demultiplexes decoded messages into per-type subscribers.

use crate::error::{Code, Error};
use crate::messages::{Identifier, Message};
use crate::runtime::Unsubscriber;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One subscriber bucket per message type, created on first subscription.
/// Commands without a bucket (the unknown bucket included) are dropped.
/// Strand-owned via the channel; not thread safe.
pub struct Distributor {
    stopped: bool,
    buckets: BTreeMap<Identifier, Unsubscriber<Arc<Message>>>,
}

impl Distributor {
    pub fn new() -> Self {
        Self { stopped: false, buckets: BTreeMap::new() }
    }

    /// Register for one message type. Handlers return `false` to
    /// desubscribe in place.
    pub fn subscribe<F>(&mut self, identifier: Identifier, handler: F) -> Result<(), Error>
    where
        F: FnMut(Result<&Arc<Message>, Error>) -> bool + Send + 'static,
    {
        if self.stopped {
            let mut handler = handler;
            let _ = handler(Err(Error::SubscriberStopped));
            return Err(Error::SubscriberStopped);
        }
        self.buckets.entry(identifier).or_default().subscribe(handler)
    }

    /// Decode and fan out one framed payload. Returns `InvalidMessage`
    /// when a known command fails to decode; the channel stops on it.
    pub fn notify(&mut self, command: &str, payload: &[u8], version: u32) -> Code {
        let message = Message::deserialize(command, payload, version)?;
        if let Some(bucket) = self.buckets.get_mut(&message.identifier()) {
            bucket.notify(&Arc::new(message));
        }
        Ok(())
    }

    /// Cascade the stop code to every bucket, then drop them.
    pub fn stop(&mut self, error: Error) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for (_, mut bucket) in std::mem::take(&mut self.buckets) {
            bucket.stop(error);
        }
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Ping;
    use std::sync::Mutex;

    #[test]
    fn test_routes_to_matching_bucket() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut distributor = Distributor::new();

        let pings = seen.clone();
        distributor
            .subscribe(Identifier::Ping, move |event| {
                if let Ok(message) = event {
                    pings.lock().unwrap().push(message.as_ref().clone());
                }
                true
            })
            .unwrap();

        let mut payload = Vec::new();
        Ping { nonce: 42 }.serialize(&mut payload);
        distributor.notify("ping", &payload, 70016).unwrap();
        // No pong bucket; dropped silently.
        distributor.notify("pong", &payload, 70016).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Message::Ping(Ping { nonce: 42 })]);
    }

    #[test]
    fn test_decode_failure_is_invalid_message() {
        let mut distributor = Distributor::new();
        assert_eq!(
            distributor.notify("pong", &[1, 2], 70016),
            Err(Error::InvalidMessage)
        );
    }

    #[test]
    fn test_unknown_commands_drop_without_bucket() {
        let mut distributor = Distributor::new();
        assert_eq!(distributor.notify("headers", &[1, 2, 3], 70016), Ok(()));
    }

    #[test]
    fn test_stop_cascades() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut distributor = Distributor::new();

        for identifier in [Identifier::Ping, Identifier::Address] {
            let stops = seen.clone();
            distributor
                .subscribe(identifier, move |event| {
                    if let Err(error) = event {
                        stops.lock().unwrap().push(error);
                    }
                    true
                })
                .unwrap();
        }

        distributor.stop(Error::ChannelStopped);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Error::ChannelStopped, Error::ChannelStopped]
        );
        assert!(distributor.subscribe(Identifier::Ping, |_| true).is_err());
    }
}
