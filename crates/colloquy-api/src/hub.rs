//! In-process registry of live and recently finished turn streams.
//!
//! Each stream keeps every frame it has published, so a reader can attach at
//! any offset: buffered frames are replayed, then live frames follow. The
//! generation task publishes regardless of who is reading; a client going
//! away only drops its own subscription.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::Stream;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

const LIVE_CAPACITY: usize = 256;

pub type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

/// One published SSE payload and its position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub offset: u64,
    pub data: Arc<str>,
}

#[derive(Debug, Clone)]
enum Signal {
    Frame(Frame),
    Closed,
}

struct Buffer {
    frames: Vec<Frame>,
    finished_at: Option<Instant>,
}

struct StreamEntry {
    buffer: Mutex<Buffer>,
    live_tx: broadcast::Sender<Signal>,
}

impl StreamEntry {
    fn lock(&self) -> MutexGuard<'_, Buffer> {
        // A poisoned buffer still holds valid frames.
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Frames at or after `from`, whether the stream is finished, and a
    /// receiver positioned right after the returned frames.
    fn snapshot(&self, from: u64) -> (Vec<Frame>, bool, broadcast::Receiver<Signal>) {
        let buffer = self.lock();
        let frames = buffer.frames.iter().skip(from as usize).cloned().collect();
        (frames, buffer.finished_at.is_some(), self.live_tx.subscribe())
    }
}

/// Registry of turn streams keyed by stream id.
#[derive(Clone, Default)]
pub struct StreamHub {
    streams: Arc<RwLock<HashMap<String, Arc<StreamEntry>>>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream and return its single writer.
    pub async fn open(&self, stream_id: &str) -> StreamPublisher {
        let (live_tx, _) = broadcast::channel(LIVE_CAPACITY);
        let entry = Arc::new(StreamEntry {
            buffer: Mutex::new(Buffer {
                frames: Vec::new(),
                finished_at: None,
            }),
            live_tx,
        });
        let previous = self
            .streams
            .write()
            .await
            .insert(stream_id.to_string(), entry.clone());
        if previous.is_some() {
            warn!(stream_id, "stream id reused, replacing earlier buffer");
        }
        StreamPublisher {
            stream_id: stream_id.to_string(),
            entry,
            closed: false,
        }
    }

    pub async fn contains(&self, stream_id: &str) -> bool {
        self.streams.read().await.contains_key(stream_id)
    }

    /// Attach to a stream starting at frame `from`. `None` if the stream is
    /// unknown or already pruned.
    pub async fn subscribe(&self, stream_id: &str, from: u64) -> Option<FrameStream> {
        let entry = self.streams.read().await.get(stream_id).cloned()?;
        debug!(stream_id, from, "stream subscriber attached");

        Some(Box::pin(async_stream::stream! {
            let (replay, finished, mut live_rx) = entry.snapshot(from);
            let mut next = from;
            for frame in replay {
                next = frame.offset + 1;
                yield frame;
            }
            if finished {
                return;
            }

            loop {
                match live_rx.recv().await {
                    Ok(Signal::Frame(frame)) => {
                        // Already replayed.
                        if frame.offset < next {
                            continue;
                        }
                        next = frame.offset + 1;
                        yield frame;
                    }
                    Ok(Signal::Closed) | Err(broadcast::error::RecvError::Closed) => return,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "stream subscriber lagged, replaying from buffer");
                        let (missed, finished, rx) = entry.snapshot(next);
                        live_rx = rx;
                        for frame in missed {
                            next = frame.offset + 1;
                            yield frame;
                        }
                        if finished {
                            return;
                        }
                    }
                }
            }
        }))
    }

    /// Drop streams that finished more than `retention` ago. Returns how many went.
    pub async fn prune_finished(&self, retention: Duration) -> usize {
        let mut streams = self.streams.write().await;
        let before = streams.len();
        streams.retain(|_, entry| match entry.lock().finished_at {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        before - streams.len()
    }
}

/// Write side of one stream. Dropping it closes the stream.
pub struct StreamPublisher {
    stream_id: String,
    entry: Arc<StreamEntry>,
    closed: bool,
}

impl StreamPublisher {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Append a frame and wake live readers. Returns its offset.
    pub fn publish(&self, data: impl Into<Arc<str>>) -> u64 {
        let mut buffer = self.entry.lock();
        let frame = Frame {
            offset: buffer.frames.len() as u64,
            data: data.into(),
        };
        buffer.frames.push(frame.clone());
        let offset = frame.offset;
        // Sent under the lock so live order matches buffer order.
        let _ = self.entry.live_tx.send(Signal::Frame(frame));
        offset
    }

    pub fn close(mut self) {
        self.mark_closed();
    }

    fn mark_closed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut buffer = self.entry.lock();
        buffer.finished_at = Some(Instant::now());
        let _ = self.entry.live_tx.send(Signal::Closed);
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        self.mark_closed();
    }
}
