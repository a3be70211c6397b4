//! Restartable one-shot timer.

use crate::error::{Code, Error};
use crate::runtime::Strand;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = Box<dyn FnOnce(Code) + Send + 'static>;

struct State {
    /// Bumped on every start/stop so a stale expiry cannot fire.
    generation: u64,
    pending: Option<Handler>,
}

/// A deadline fires its handler at most once per `start`: with `Ok(())` on
/// expiry, or with `OperationCanceled` on `stop` or on a restart that
/// preempts it. Handlers run on the owning strand.
pub struct Deadline {
    strand: Strand,
    duration: Duration,
    state: Arc<Mutex<State>>,
}

impl Deadline {
    /// A default duration used when `start` is not given one.
    pub fn new(strand: Strand, duration: Duration) -> Self {
        Self {
            strand,
            duration,
            state: Arc::new(Mutex::new(State { generation: 0, pending: None })),
        }
    }

    /// Start or restart with the default duration.
    pub fn start<F>(&self, handler: F)
    where
        F: FnOnce(Code) + Send + 'static,
    {
        self.start_after(self.duration, handler);
    }

    /// Start or restart. A pending handler is preempted with
    /// `OperationCanceled` and never sees expiry.
    pub fn start_after<F>(&self, duration: Duration, handler: F)
    where
        F: FnOnce(Code) + Send + 'static,
    {
        let generation = {
            let mut state = self.state.lock().unwrap();
            if let Some(preempted) = state.pending.take() {
                self.strand.post_fn(move || preempted(Err(Error::OperationCanceled)));
            }
            state.generation += 1;
            state.pending = Some(Box::new(handler));
            state.generation
        };

        let state = self.state.clone();
        let strand = self.strand.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut state = state.lock().unwrap();
            if state.generation == generation
                && let Some(expired) = state.pending.take()
            {
                strand.post_fn(move || expired(Ok(())));
            }
        });
    }

    /// Cancel; a pending handler fires with `OperationCanceled`.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.generation += 1;
        if let Some(canceled) = state.pending.take() {
            self.strand.post_fn(move || canceled(Err(Error::OperationCanceled)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_expiry_delivers_success() {
        let strand = Strand::new();
        let timer = Deadline::new(strand, Duration::from_millis(10));
        let (tx, mut rx) = mpsc::unbounded_channel();

        timer.start(move |code| {
            tx.send(code).unwrap();
        });

        assert_eq!(rx.recv().await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_stop_delivers_canceled() {
        let strand = Strand::new();
        let timer = Deadline::new(strand, Duration::from_secs(60));
        let (tx, mut rx) = mpsc::unbounded_channel();

        timer.start(move |code| {
            tx.send(code).unwrap();
        });
        timer.stop();

        assert_eq!(rx.recv().await.unwrap(), Err(Error::OperationCanceled));
    }

    #[tokio::test]
    async fn test_restart_preempts_without_expiry() {
        let strand = Strand::new();
        let timer = Deadline::new(strand, Duration::from_millis(20));
        let fired = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first_fired = fired.clone();
        timer.start(move |code| {
            assert_eq!(code, Err(Error::OperationCanceled));
            first_fired.fetch_add(1, Ordering::SeqCst);
        });
        timer.start(move |code| {
            tx.send(code).unwrap();
        });

        assert_eq!(rx.recv().await.unwrap(), Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fires_at_most_once_per_start() {
        let strand = Strand::new();
        let timer = Deadline::new(strand, Duration::from_millis(5));
        let fired = Arc::new(AtomicU32::new(0));

        let count = fired.clone();
        timer.start(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        timer.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
