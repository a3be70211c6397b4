//! Keyed subscribers with in-place desubscription.

use crate::error::Error;
use std::collections::BTreeMap;

type Handler<A> = Box<dyn FnMut(Result<&A, Error>) -> bool + Send + 'static>;

/// Keyed set of handlers; each returns a bool, `false` desubscribing it in
/// place. Subscribing an existing key is rejected with `SubscriberExists`.
/// Not thread safe; strand-owned like the ordered subscribers.
pub struct Resubscriber<K: Ord, A> {
    stopped: bool,
    map: BTreeMap<K, Handler<A>>,
}

impl<K: Ord, A> Resubscriber<K, A> {
    pub fn new() -> Self {
        Self { stopped: false, map: BTreeMap::new() }
    }

    pub fn subscribe<F>(&mut self, key: K, mut handler: F) -> Result<(), Error>
    where
        F: FnMut(Result<&A, Error>) -> bool + Send + 'static,
    {
        if self.stopped {
            let _ = handler(Err(Error::SubscriberStopped));
            return Err(Error::SubscriberStopped);
        }
        if self.map.contains_key(&key) {
            let _ = handler(Err(Error::SubscriberExists));
            return Err(Error::SubscriberExists);
        }
        self.map.insert(key, Box::new(handler));
        Ok(())
    }

    /// Invoke every handler; those returning `false` are dropped.
    pub fn notify(&mut self, args: &A) {
        if self.stopped {
            return;
        }
        self.map.retain(|_, handler| handler(Ok(args)));
    }

    /// Invoke each handler once with the stop code, then drop all.
    pub fn stop(&mut self, error: Error) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for (_, mut handler) in std::mem::take(&mut self.map) {
            let _ = handler(Err(error));
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }
}

impl<K: Ord, A> Default for Resubscriber<K, A> {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Resubscriber`] plus targeted delivery to a single key.
pub struct Desubscriber<K: Ord, A> {
    inner: Resubscriber<K, A>,
}

impl<K: Ord, A> Desubscriber<K, A> {
    pub fn new() -> Self {
        Self { inner: Resubscriber::new() }
    }

    pub fn subscribe<F>(&mut self, key: K, handler: F) -> Result<(), Error>
    where
        F: FnMut(Result<&A, Error>) -> bool + Send + 'static,
    {
        self.inner.subscribe(key, handler)
    }

    pub fn notify(&mut self, args: &A) {
        self.inner.notify(args);
    }

    /// Deliver to exactly one handler. True if the key was subscribed; the
    /// handler's own return still controls its desubscription.
    pub fn notify_one(&mut self, key: &K, args: &A) -> bool {
        if self.inner.stopped {
            return false;
        }
        let Some(handler) = self.inner.map.get_mut(key) else {
            return false;
        };
        if !handler(Ok(args)) {
            self.inner.map.remove(key);
        }
        true
    }

    pub fn stop(&mut self, error: Error) {
        self.inner.stop(error);
    }

    pub fn stopped(&self) -> bool {
        self.inner.stopped()
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }
}

impl<K: Ord, A> Default for Desubscriber<K, A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_duplicate_key_rejected() {
        let mut subscriber = Resubscriber::<u64, u32>::new();
        subscriber.subscribe(1, |_| true).unwrap();
        assert_eq!(subscriber.subscribe(1, |_| true), Err(Error::SubscriberExists));
        assert_eq!(subscriber.size(), 1);
    }

    #[test]
    fn test_notify_retains_by_return() {
        let hits = Arc::new(Mutex::new(0u32));
        let mut subscriber = Resubscriber::<u64, u32>::new();

        let keep = hits.clone();
        subscriber
            .subscribe(1, move |event| {
                if event.is_ok() {
                    *keep.lock().unwrap() += 1;
                }
                true
            })
            .unwrap();
        let drop_after_one = hits.clone();
        subscriber
            .subscribe(2, move |event| {
                if event.is_ok() {
                    *drop_after_one.lock().unwrap() += 1;
                }
                false
            })
            .unwrap();

        subscriber.notify(&0);
        subscriber.notify(&0);
        assert_eq!(*hits.lock().unwrap(), 3);
        assert_eq!(subscriber.size(), 1);
    }

    #[test]
    fn test_notify_one_targets_single_key() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subscriber = Desubscriber::<u64, u32>::new();

        for key in [1u64, 2] {
            let seen = seen.clone();
            subscriber
                .subscribe(key, move |event| {
                    if let Ok(value) = event {
                        seen.lock().unwrap().push((key, *value));
                    }
                    true
                })
                .unwrap();
        }

        assert!(subscriber.notify_one(&2, &9));
        assert!(!subscriber.notify_one(&3, &9));
        assert_eq!(*seen.lock().unwrap(), vec![(2, 9)]);
    }

    #[test]
    fn test_stop_drops_all_keys() {
        let mut subscriber = Desubscriber::<u64, u32>::new();
        subscriber.subscribe(1, |_| true).unwrap();
        subscriber.subscribe(2, |_| true).unwrap();

        subscriber.stop(Error::ServiceStopped);
        assert_eq!(subscriber.size(), 0);
        assert_eq!(subscriber.subscribe(3, |_| true), Err(Error::SubscriberStopped));
    }
}
