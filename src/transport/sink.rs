//! Outbound frame delivery.
//!
//! Sends are fire-and-forget: a frame is queued and the caller moves on.
//! There is no acknowledgement and no backpressure. Everything that writes
//! to a socket goes through [`FrameSink`].

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{BytesCodec, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::Metrics;

/// Destination for encoded frames. Implementations must not block.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: Bytes) -> Result<()>;
}

/// Queues frames for a connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.tx.send(frame).map_err(|_| {
            debug!("{}", constants::ERR_WRITER_GONE);
            ProtocolError::ConnectionClosed
        })
    }
}

/// Collects frames in memory. Handy for driving listeners without a socket.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Mutex<Vec<Bytes>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Frames sent so far, oldest first
    pub fn frames(&self) -> Vec<Bytes> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain and return the frames sent so far
    pub fn take(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.frames.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl FrameSink for MemorySink {
    fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.frames
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?
            .push(frame);
        Ok(())
    }
}

/// Drain queued frames into `writer`, one write per frame, until the queue
/// closes or `cancel` fires. On cancellation the queue is closed to new
/// frames and whatever was already queued is written before the write half
/// is shut down.
pub(crate) async fn write_frames<W>(
    writer: W,
    rx: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
) where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, BytesCodec::new());
    let mut frames = UnboundedReceiverStream::new(rx);
    let mut healthy = true;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            next = frames.next() => match next {
                Some(frame) => frame,
                None => break,
            },
        };
        if !write_one(&mut sink, frame, &metrics).await {
            healthy = false;
            break;
        }
    }

    if healthy {
        let mut rx = frames.into_inner();
        rx.close();
        while let Some(frame) = rx.recv().await {
            if !write_one(&mut sink, frame, &metrics).await {
                break;
            }
        }
    }

    if let Err(e) = SinkExt::<Bytes>::close(&mut sink).await {
        trace!(error = %e, "Shutdown of write half failed");
    }
}

async fn write_one<W>(
    sink: &mut FramedWrite<W, BytesCodec>,
    frame: Bytes,
    metrics: &Metrics,
) -> bool
where
    W: AsyncWrite + Unpin,
{
    let len = frame.len();
    if let Err(e) = SinkExt::<Bytes>::send(sink, frame).await {
        debug!(error = %e, "Write failed, stopping writer");
        return false;
    }
    trace!(bytes = len, "Frame written");
    metrics.packet_sent(len as u64);
    true
}
