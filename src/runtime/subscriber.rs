//! Ordered broadcast subscribers.
//!
//! Handlers receive `Ok(&args)` on notify and `Err(code)` exactly once at
//! stop, after which the queue is dropped and the subscriber is terminal.
//! Not thread safe: a subscriber lives inside its owner's strand-guarded
//! state and every method must be called from that strand.

use crate::error::Error;

type Handler<A> = Box<dyn FnMut(Result<&A, Error>) + Send + 'static>;
type RetainHandler<A> = Box<dyn FnMut(Result<&A, Error>) -> bool + Send + 'static>;

/// FIFO broadcast: handlers fire in subscription order on every notify
/// until stop.
pub struct Subscriber<A> {
    stopped: bool,
    queue: Vec<Handler<A>>,
}

impl<A> Subscriber<A> {
    pub fn new() -> Self {
        Self { stopped: false, queue: Vec::new() }
    }

    /// Retain the handler, or invoke it synchronously with
    /// `SubscriberStopped` if the subscriber is terminal.
    pub fn subscribe<F>(&mut self, mut handler: F) -> Result<(), Error>
    where
        F: FnMut(Result<&A, Error>) + Send + 'static,
    {
        if self.stopped {
            handler(Err(Error::SubscriberStopped));
            return Err(Error::SubscriberStopped);
        }
        self.queue.push(Box::new(handler));
        Ok(())
    }

    /// Invoke each handler once, in subscription order.
    pub fn notify(&mut self, args: &A) {
        if self.stopped {
            return;
        }
        for handler in &mut self.queue {
            handler(Ok(args));
        }
    }

    /// Invoke each handler once with the stop code, then drop all.
    /// Terminal; a second stop is a no-op.
    pub fn stop(&mut self, error: Error) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for mut handler in self.queue.drain(..) {
            handler(Err(error));
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }
}

impl<A> Default for Subscriber<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Like [`Subscriber`], but each handler returns a bool: `false`
/// desubscribes that handler in place.
pub struct Unsubscriber<A> {
    stopped: bool,
    queue: Vec<RetainHandler<A>>,
}

impl<A> Unsubscriber<A> {
    pub fn new() -> Self {
        Self { stopped: false, queue: Vec::new() }
    }

    pub fn subscribe<F>(&mut self, mut handler: F) -> Result<(), Error>
    where
        F: FnMut(Result<&A, Error>) -> bool + Send + 'static,
    {
        if self.stopped {
            handler(Err(Error::SubscriberStopped));
            return Err(Error::SubscriberStopped);
        }
        self.queue.push(Box::new(handler));
        Ok(())
    }

    /// Invoke each handler in order; those returning `false` are dropped.
    pub fn notify(&mut self, args: &A) {
        if self.stopped {
            return;
        }
        self.queue.retain_mut(|handler| handler(Ok(args)));
    }

    /// Invoke each handler once with the stop code, then drop all.
    pub fn stop(&mut self, error: Error) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for mut handler in self.queue.drain(..) {
            let _ = handler(Err(error));
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }
}

impl<A> Default for Unsubscriber<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_notify_in_subscription_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut subscriber = Subscriber::<u32>::new();

        for tag in 0..4u32 {
            let order = order.clone();
            subscriber
                .subscribe(move |event| {
                    if event.is_ok() {
                        order.lock().unwrap().push(tag);
                    }
                })
                .unwrap();
        }

        subscriber.notify(&7);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_stop_is_terminal_and_delivered_once() {
        let stops = Arc::new(Mutex::new(Vec::new()));
        let mut subscriber = Subscriber::<u32>::new();

        let seen = stops.clone();
        subscriber
            .subscribe(move |event| {
                seen.lock().unwrap().push(event.err());
            })
            .unwrap();

        subscriber.stop(Error::ChannelStopped);
        subscriber.stop(Error::ChannelExpired);
        subscriber.notify(&1);

        assert_eq!(*stops.lock().unwrap(), vec![Some(Error::ChannelStopped)]);
        assert_eq!(subscriber.size(), 0);
    }

    #[test]
    fn test_subscribe_after_stop() {
        let mut subscriber = Subscriber::<u32>::new();
        subscriber.stop(Error::ServiceStopped);

        let seen = Arc::new(Mutex::new(None));
        let inner = seen.clone();
        let result = subscriber.subscribe(move |event| {
            *inner.lock().unwrap() = event.err();
        });

        assert_eq!(result, Err(Error::SubscriberStopped));
        assert_eq!(*seen.lock().unwrap(), Some(Error::SubscriberStopped));
    }

    #[test]
    fn test_unsubscriber_self_desubscribe() {
        let count = Arc::new(Mutex::new(0u32));
        let mut subscriber = Unsubscriber::<u32>::new();

        let once = count.clone();
        subscriber
            .subscribe(move |event| {
                if event.is_ok() {
                    *once.lock().unwrap() += 1;
                }
                false
            })
            .unwrap();

        subscriber.notify(&1);
        subscriber.notify(&2);
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(subscriber.size(), 0);
    }
}
