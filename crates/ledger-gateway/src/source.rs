//! Message sources for the asynchronous ingestion path.
//!
//! A `MessageSource` hands the consumer one message at a time.  The bundled
//! source is a bounded channel: producers (line feeders reading TCP
//! connections, or anything else holding a `MessageSender`) wait whenever
//! the channel is full, so a slow append engine pauses consumption instead
//! of growing a buffer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One serialized record from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Position in the stream, assigned when the message was accepted.
    pub offset: u64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessageSource: Send {
    /// The next message, or `None` once the stream is closed.
    async fn recv(&mut self) -> Option<Message>;
}

/// Producer half of a bounded channel source.  Cloning shares the offset
/// counter.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Message>,
    next_offset: Arc<AtomicU64>,
}

impl MessageSender {
    /// Enqueue a payload, waiting while the channel is full.
    ///
    /// Returns `false` once the consumer side has gone away.
    pub async fn send(&self, payload: Vec<u8>) -> bool {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        self.tx.send(Message { offset, payload }).await.is_ok()
    }
}

/// Consumer half of a bounded channel source.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Message>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// A bounded channel source holding at most `capacity` undelivered messages.
pub fn channel(capacity: usize) -> (MessageSender, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MessageSender {
            tx,
            next_offset: Arc::new(AtomicU64::new(0)),
        },
        ChannelSource { rx },
    )
}

/// Forward every non-blank line of `reader` as one message.
///
/// Returns the number of lines forwarded.  Stops early, without error, when
/// the consumer side has gone away.
pub async fn feed_lines<R>(reader: R, sender: MessageSender) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if !sender.send(line.into_bytes()).await {
            debug!(forwarded, "consumer closed, line feed stopped");
            break;
        }
        forwarded += 1;
    }
    Ok(forwarded)
}

/// Accept producer connections on `listener` and feed each one's NDJSON
/// lines into `sender` until `cancel` fires.
pub async fn serve_lines(listener: TcpListener, sender: MessageSender, cancel: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "stream listener accepting producers");
    }
    loop {
        let (socket, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "stream accept failed");
                    continue;
                }
            },
        };
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = feed_lines(BufReader::new(socket), sender) => log_feed(peer, result),
            }
        });
    }
    info!("stream listener stopped");
}

fn log_feed(peer: SocketAddr, result: std::io::Result<u64>) {
    match result {
        Ok(lines) => debug!(%peer, lines, "producer disconnected"),
        Err(e) => warn!(%peer, error = %e, "producer connection failed"),
    }
}
