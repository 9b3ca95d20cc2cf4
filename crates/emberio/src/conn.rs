use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::frame::split_coalesced;
use crate::pool::{BufferPool, PooledBuf};

// Lifecycle: running until someone asks for teardown, draining while the
// tasks unwind, disposed once the socket and lease are gone.
const LIFE_RUNNING: u8 = 0;
const LIFE_DRAINING: u8 = 1;
const LIFE_DISPOSED: u8 = 2;

const WRITE_QUEUE_DEPTH: usize = 128;

/// Per-role packet behavior. One implementation per peer kind; the driver
/// in [`Connection::run`] is shared.
#[async_trait::async_trait]
pub trait Inbound: Send {
    /// Called once per decoded frame, in wire order. Frames from one read
    /// are all delivered before the next read is armed, and never
    /// concurrently for the same connection. An error tears the
    /// connection down.
    async fn on_frame(&mut self, frame: Bytes) -> anyhow::Result<()>;

    /// Called exactly once after the receive loop stops, however it
    /// stopped.
    async fn on_close(&mut self) {}
}

struct Shared {
    peer: SocketAddr,
    connected_unix: u64,
    life: AtomicU8,
    write_tx: mpsc::Sender<Bytes>,
    disconnect_tx: watch::Sender<bool>,
}

/// Cloneable handle to a live connection: the send/teardown surface handed
/// to packet handlers, the session directory, and anything else that may
/// outlive the receive loop.
#[derive(Clone)]
pub struct ConnHandle {
    shared: Arc<Shared>,
}

impl ConnHandle {
    pub fn peer(&self) -> SocketAddr {
        self.shared.peer
    }

    pub fn connected_unix(&self) -> u64 {
        self.shared.connected_unix
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.life.load(Ordering::SeqCst) != LIFE_RUNNING
    }

    /// Two handles to the same underlying connection?
    pub fn same_conn(&self, other: &ConnHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Queue one compiled wire image. Packets reach the socket in the
    /// order they were queued. A disposed connection swallows the send.
    pub async fn send(&self, wire: Bytes) {
        if self.is_disposed() {
            return;
        }
        if self.shared.write_tx.send(wire).await.is_err() {
            trace!(peer = %self.shared.peer, "send after writer exit");
        }
    }

    /// Ask for teardown. Safe from inside a packet handler, from the
    /// session directory evicting a stale login, or from anywhere else;
    /// the second and later calls are no-ops.
    pub fn dispose(&self) {
        if self
            .shared
            .life
            .compare_exchange(LIFE_RUNNING, LIFE_DRAINING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let _ = self.shared.disconnect_tx.send(true);
    }

    fn mark_disposed(&self) {
        self.shared.life.store(LIFE_DISPOSED, Ordering::SeqCst);
    }
}

/// One live socket plus its leased receive buffer and writer task.
pub struct Connection<R> {
    rd: R,
    buf: PooledBuf,
    handle: ConnHandle,
    writer: tokio::task::JoinHandle<()>,
    disconnect_rx: watch::Receiver<bool>,
}

impl<R: AsyncRead + Unpin> Connection<R> {
    /// Wire up a freshly accepted socket: lease a receive buffer, start
    /// the writer task, and hand back the driver plus the shareable
    /// handle.
    ///
    /// `pacing`, when set, delays the writer between outbound packets:
    /// the legacy inter-send throttle as an explicit policy rather than a
    /// sleep hidden in the send path.
    pub fn open<W>(
        rd: R,
        wr: W,
        peer: SocketAddr,
        pool: &BufferPool,
        pacing: Option<Duration>,
    ) -> (Self, ConnHandle)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (write_tx, mut write_rx) = mpsc::channel::<Bytes>(WRITE_QUEUE_DEPTH);
        let (disconnect_tx, disconnect_rx) = watch::channel(false);

        let writer = tokio::spawn(async move {
            let mut wr = wr;
            while let Some(wire) = write_rx.recv().await {
                if let Some(delay) = pacing {
                    tokio::time::sleep(delay).await;
                }
                if wr.write_all(&wire).await.is_err() {
                    break;
                }
            }
            let _ = wr.shutdown().await;
        });

        let handle = ConnHandle {
            shared: Arc::new(Shared {
                peer,
                connected_unix: now_unix(),
                life: AtomicU8::new(LIFE_RUNNING),
                write_tx,
                disconnect_tx,
            }),
        };

        let conn = Self {
            rd,
            buf: pool.acquire(),
            handle: handle.clone(),
            writer,
            disconnect_rx,
        };
        (conn, handle)
    }

    /// Drive the receive loop until the peer goes away, a handler fails,
    /// or someone calls [`ConnHandle::dispose`]. One read is outstanding
    /// at a time; every frame of a read is handled before the next read
    /// is armed. A zero-byte read or socket error is a disconnect, not a
    /// retry.
    pub async fn run<H: Inbound>(mut self, mut role: H) {
        loop {
            let n = tokio::select! {
                res = self.rd.read(&mut self.buf[..]) => match res {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        debug!(peer = %self.handle.peer(), err = %e, "socket read failed");
                        break;
                    }
                },
                _ = self.disconnect_rx.changed() => break,
            };

            let mut stop = false;
            for frame in split_coalesced(&self.buf[..n]) {
                if let Err(e) = role.on_frame(frame).await {
                    warn!(
                        peer = %self.handle.peer(),
                        err = %e,
                        "packet handler failed; dropping connection"
                    );
                    stop = true;
                    break;
                }
                if self.handle.is_disposed() {
                    // A handler kicked us; drop the rest of this read.
                    stop = true;
                    break;
                }
            }
            if stop {
                break;
            }
        }

        let handle = self.handle.clone();
        handle.dispose();
        self.teardown();
        handle.mark_disposed();
        role.on_close().await;
    }

    fn teardown(self) {
        // Aborting the writer drops whatever was still queued; the writer
        // owns the write half and shuts the socket down on exit. The read
        // half and the buffer lease drop here; the lease goes back to the
        // pool exactly once.
        self.writer.abort();
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    use super::{ConnHandle, Connection, Inbound};
    use crate::pool::BufferPool;

    struct Sink {
        frames: Arc<Mutex<Vec<Bytes>>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Inbound for Sink {
        async fn on_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
            self.frames.lock().expect("sink lock").push(frame);
            Ok(())
        }

        async fn on_close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingSink;

    #[async_trait::async_trait]
    impl Inbound for FailingSink {
        async fn on_frame(&mut self, _frame: Bytes) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn test_peer() -> SocketAddr {
        "127.0.0.1:9999".parse().expect("test addr")
    }

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u16).to_le_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    fn spawn_conn(
        near: tokio::io::DuplexStream,
    ) -> (
        ConnHandle,
        Arc<Mutex<Vec<Bytes>>>,
        Arc<AtomicUsize>,
        tokio::task::JoinHandle<()>,
    ) {
        let pool = BufferPool::new(512, 4);
        let (rd, wr) = tokio::io::split(near);
        let (conn, handle) = Connection::open(rd, wr, test_peer(), &pool, None);
        let frames = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));
        let sink = Sink {
            frames: frames.clone(),
            closed: closed.clone(),
        };
        let task = tokio::spawn(conn.run(sink));
        (handle, frames, closed, task)
    }

    #[tokio::test]
    async fn coalesced_read_dispatches_in_order() {
        let (near, mut far) = tokio::io::duplex(1024);
        let (_handle, frames, _closed, task) = spawn_conn(near);

        let mut wire = framed(b"one");
        wire.extend(framed(b"two"));
        wire.extend(framed(b"three"));
        far.write_all(&wire).await.expect("write");
        drop(far);

        task.await.expect("join");
        let got = frames.lock().expect("lock").clone();
        assert_eq!(got.len(), 3);
        assert_eq!(&got[0][..], b"one");
        assert_eq!(&got[2][..], b"three");
    }

    #[tokio::test]
    async fn peer_close_fires_on_close_once() {
        let (near, far) = tokio::io::duplex(1024);
        let (handle, _frames, closed, task) = spawn_conn(near);

        drop(far);
        task.await.expect("join");

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(handle.is_disposed());
    }

    #[tokio::test]
    async fn dispose_twice_is_a_noop() {
        let (near, _far) = tokio::io::duplex(1024);
        let (handle, _frames, closed, task) = spawn_conn(near);

        handle.dispose();
        handle.dispose();
        task.await.expect("join");

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(handle.is_disposed());
    }

    #[tokio::test]
    async fn sends_preserve_queue_order() {
        let (near, mut far) = tokio::io::duplex(1024);
        let (handle, _frames, _closed, task) = spawn_conn(near);

        handle.send(Bytes::from_static(b"alpha")).await;
        handle.send(Bytes::from_static(b"beta")).await;

        let mut got = vec![0u8; 9];
        tokio::io::AsyncReadExt::read_exact(&mut far, &mut got)
            .await
            .expect("read");
        assert_eq!(&got, b"alphabeta");

        handle.dispose();
        task.await.expect("join");
    }

    #[tokio::test]
    async fn handler_error_tears_down_only_this_connection() {
        let pool = BufferPool::new(512, 4);
        let (near, mut far) = tokio::io::duplex(1024);
        let (rd, wr) = tokio::io::split(near);
        let (conn, handle) = Connection::open(rd, wr, test_peer(), &pool, None);
        let task = tokio::spawn(conn.run(FailingSink));

        far.write_all(&framed(b"any")).await.expect("write");
        task.await.expect("join");
        assert!(handle.is_disposed());
    }

    #[tokio::test]
    async fn handler_dispose_stops_rest_of_read() {
        struct KickOnFirst {
            handle: Option<ConnHandle>,
            seen: Arc<AtomicUsize>,
        }

        #[async_trait::async_trait]
        impl Inbound for KickOnFirst {
            async fn on_frame(&mut self, _frame: Bytes) -> anyhow::Result<()> {
                self.seen.fetch_add(1, Ordering::SeqCst);
                if let Some(h) = self.handle.take() {
                    h.dispose();
                }
                Ok(())
            }
        }

        let pool = BufferPool::new(512, 4);
        let (near, mut far) = tokio::io::duplex(1024);
        let (rd, wr) = tokio::io::split(near);
        let (conn, handle) = Connection::open(rd, wr, test_peer(), &pool, None);
        let seen = Arc::new(AtomicUsize::new(0));
        let role = KickOnFirst {
            handle: Some(handle.clone()),
            seen: seen.clone(),
        };
        let task = tokio::spawn(conn.run(role));

        let mut wire = framed(b"first");
        wire.extend(framed(b"second"));
        far.write_all(&wire).await.expect("write");

        task.await.expect("join");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(handle.is_disposed());
    }
}
