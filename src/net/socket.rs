//! A socket owns one TCP endpoint: reads for the channel's pump, ordered
//! chunked writes with backlog accounting, and an idempotent stop.

use crate::config::Authority;
use crate::error::{Code, Error};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};

type WriteHandler = Box<dyn FnOnce(Code) + Send + 'static>;

struct WriteJob {
    data: Vec<u8>,
    handler: WriteHandler,
}

/// Single-reader (the channel pump), single-writer (the queue task).
/// `stop` cancels outstanding I/O with `OperationCanceled` and closes the
/// TCP endpoint; it is idempotent.
pub struct Socket {
    authority: Authority,
    reader: Mutex<OwnedReadHalf>,
    queue: mpsc::UnboundedSender<WriteJob>,
    stopped: AtomicBool,
    stop: watch::Sender<bool>,
    backlog: Arc<AtomicUsize>,
    total: Arc<AtomicU64>,
}

impl Socket {
    pub fn new(stream: TcpStream) -> Arc<Self> {
        let authority = stream
            .peer_addr()
            .map(Authority::from)
            .unwrap_or_else(|_| Authority::unspecified(0));
        let (reader, writer) = stream.into_split();
        let (queue, jobs) = mpsc::unbounded_channel();
        let (stop, stop_signal) = watch::channel(false);
        let backlog = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicU64::new(0));

        tokio::spawn(write_loop(writer, jobs, stop_signal, backlog.clone(), total.clone()));

        Arc::new(Self {
            authority,
            reader: Mutex::new(reader),
            queue,
            stopped: AtomicBool::new(false),
            stop,
            backlog,
            total,
        })
    }

    /// The remote endpoint.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Bytes queued but not yet written.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    /// Total bytes written over the socket's lifetime.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Read exactly `buffer.len()` bytes.
    pub async fn read_exact(&self, buffer: &mut [u8]) -> Code {
        if self.stopped() {
            return Err(Error::OperationCanceled);
        }
        let mut stop = self.stop.subscribe();
        let mut reader = self.reader.lock().await;
        tokio::select! {
            result = reader.read_exact(buffer) => match result {
                Ok(_) => Ok(()),
                Err(error) => Err(Error::from(error)),
            },
            _ = stop.wait_for(|stopped| *stopped) => Err(Error::OperationCanceled),
        }
    }

    /// Best-effort read of at most `buffer.len()` bytes. Zero bytes means
    /// the peer closed the stream.
    pub async fn read_some(&self, buffer: &mut [u8]) -> Result<usize, Error> {
        if self.stopped() {
            return Err(Error::OperationCanceled);
        }
        let mut stop = self.stop.subscribe();
        let mut reader = self.reader.lock().await;
        tokio::select! {
            result = reader.read(buffer) => match result {
                Ok(0) => Err(Error::PeerDisconnect),
                Ok(size) => Ok(size),
                Err(error) => Err(Error::from(error)),
            },
            _ = stop.wait_for(|stopped| *stopped) => Err(Error::OperationCanceled),
        }
    }

    /// Enqueue a chunk; the handler fires once it is fully written, in
    /// queue order, one write in flight at a time.
    pub fn write<F>(&self, data: Vec<u8>, handler: F)
    where
        F: FnOnce(Code) + Send + 'static,
    {
        if self.stopped() {
            handler(Err(Error::OperationCanceled));
            return;
        }
        self.backlog.fetch_add(data.len(), Ordering::SeqCst);
        let job = WriteJob { data, handler: Box::new(handler) };
        if let Err(refused) = self.queue.send(job) {
            let job = refused.0;
            self.backlog.fetch_sub(job.data.len(), Ordering::SeqCst);
            (job.handler)(Err(Error::OperationCanceled));
        }
    }

    /// Idempotent; cancels outstanding reads and queued writes.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.send_replace(true);
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    mut stop: watch::Receiver<bool>,
    backlog: Arc<AtomicUsize>,
    total: Arc<AtomicU64>,
) {
    loop {
        let job = tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
            _ = stop.wait_for(|stopped| *stopped) => break,
        };

        if *stop.borrow() {
            backlog.fetch_sub(job.data.len(), Ordering::SeqCst);
            (job.handler)(Err(Error::OperationCanceled));
            continue;
        }

        let result = tokio::select! {
            result = writer.write_all(&job.data) => result.map_err(Error::from),
            _ = stop.wait_for(|stopped| *stopped) => Err(Error::OperationCanceled),
        };

        backlog.fetch_sub(job.data.len(), Ordering::SeqCst);
        if result.is_ok() {
            total.fetch_add(job.data.len() as u64, Ordering::SeqCst);
        }
        (job.handler)(result);
    }

    // Cancel anything still queued, then close the endpoint.
    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        backlog.fetch_sub(job.data.len(), Ordering::SeqCst);
        (job.handler)(Err(Error::OperationCanceled));
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    async fn pair() -> (Arc<Socket>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(address), listener.accept());
        (Socket::new(client.unwrap()), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_write_then_read_remote() {
        let (socket, mut remote) = pair().await;
        let (tx, rx) = oneshot::channel();

        socket.write(vec![1, 2, 3, 4], move |code| {
            tx.send(code).unwrap();
        });
        assert_eq!(rx.await.unwrap(), Ok(()));
        assert_eq!(socket.total(), 4);
        assert_eq!(socket.backlog(), 0);

        let mut buffer = [0u8; 4];
        remote.read_exact(&mut buffer).await.unwrap();
        assert_eq!(buffer, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_writes_preserve_order() {
        let (socket, mut remote) = pair().await;
        for chunk in 0..16u8 {
            socket.write(vec![chunk; 8], |_| {});
        }
        let mut buffer = [0u8; 128];
        remote.read_exact(&mut buffer).await.unwrap();
        for chunk in 0..16u8 {
            assert_eq!(&buffer[usize::from(chunk) * 8..][..8], &[chunk; 8]);
        }
    }

    #[tokio::test]
    async fn test_read_exact() {
        let (socket, mut remote) = pair().await;
        remote.write_all(&[9u8; 24]).await.unwrap();

        let mut buffer = [0u8; 24];
        assert_eq!(socket.read_exact(&mut buffer).await, Ok(()));
        assert_eq!(buffer, [9u8; 24]);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_read() {
        let (socket, _remote) = pair().await;
        let reader = socket.clone();
        let pending = tokio::spawn(async move {
            let mut buffer = [0u8; 8];
            reader.read_exact(&mut buffer).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.stop();
        assert_eq!(pending.await.unwrap(), Err(Error::OperationCanceled));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_fails_writes() {
        let (socket, _remote) = pair().await;
        socket.stop();
        socket.stop();

        let (tx, rx) = oneshot::channel();
        socket.write(vec![1], move |code| {
            tx.send(code).unwrap();
        });
        assert_eq!(rx.await.unwrap(), Err(Error::OperationCanceled));
    }

    #[tokio::test]
    async fn test_peer_close_is_disconnect() {
        let (socket, remote) = pair().await;
        drop(remote);
        let mut buffer = [0u8; 1];
        assert_eq!(socket.read_exact(&mut buffer).await, Err(Error::PeerDisconnect));
    }
}
