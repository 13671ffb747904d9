//! Transport seam: an origin-scoped fan-out bus.
//!
//! Every subscriber receives every frame sent by any subscriber, including
//! its own. Sends never block and are best-effort: no receipts, nothing kept
//! for late subscribers, order preserved only per sender. Frames above
//! `max_message_bytes` are rejected.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

/// Inbound frame stream for one subscriber.
pub type Inbound = mpsc::Receiver<Bytes>;

pub trait Transport: Send + Sync {
    /// Hand a frame to the bus.
    fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Largest frame the bus accepts.
    fn max_message_bytes(&self) -> usize;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("frame of {size} bytes exceeds the {limit} byte ceiling")]
    Oversized { size: usize, limit: usize },
    #[error("transport closed")]
    Closed,
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Safe per-message ceiling for the in-process bus (2 MiB).
pub const LOCAL_BUS_MAX_MESSAGE: usize = 2 * 1024 * 1024;

/// Frames queued per subscriber before the bus starts dropping for it.
const SUBSCRIBER_QUEUE: usize = 1024;

/// In-process fan-out bus. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct LocalBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<Bytes>>>>,
    max_message_bytes: usize,
    queue_depth: usize,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_limits(LOCAL_BUS_MAX_MESSAGE, SUBSCRIBER_QUEUE)
    }

    pub fn with_limits(max_message_bytes: usize, queue_depth: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            max_message_bytes,
            queue_depth: queue_depth.max(1),
        }
    }

    /// Join the bus. Frames sent from now on are delivered to the returned stream.
    pub fn subscribe(&self) -> Inbound {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.lock().push(tx);
        rx
    }

    /// Live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<Bytes>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Transport for LocalBus {
    fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > self.max_message_bytes {
            return Err(TransportError::Oversized {
                size: frame.len(),
                limit: self.max_message_bytes,
            });
        }

        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame.clone()) {
                tracing::debug!(len = frame.len(), "subscriber queue full, frame dropped");
            }
        }
        Ok(())
    }

    fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }
}
