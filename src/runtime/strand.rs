//! Per-owner serial executor.

use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A serial executor: jobs posted to a strand run one at a time, in post
/// order, never concurrently with any other job on the same strand. Strands
/// from different owners run concurrently across the tokio worker pool.
///
/// Cloning yields a handle to the same queue. The drain task exits once all
/// handles are dropped and the queue is empty, so a strand outlives its
/// owner only long enough to drain posted handlers.
#[derive(Clone)]
pub struct Strand {
    sender: mpsc::UnboundedSender<Job>,
}

impl Strand {
    /// Spawn the drain task on the current runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job.await;
            }
        });
        Self { sender }
    }

    /// Queue an asynchronous job. Never blocks.
    pub fn post<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Send fails only after the drain task is gone (runtime shutdown);
        // posted work is then silently dropped, matching stop semantics.
        let _ = self.sender.send(Box::pin(job));
    }

    /// Queue a synchronous handler.
    pub fn post_fn<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(async move { handler() });
    }
}

impl Default for Strand {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Strand")
    }
}
