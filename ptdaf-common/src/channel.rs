//! Named-queue message channel
//!
//! The dispatcher and the workers only ever talk through [`MessageChannel`].
//! [`LocalBroker`] is the in-process implementation: one unbounded FIFO per
//! registered queue name, carrying encoded envelopes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec;
use crate::messages::Envelope;
use crate::{Error, Result};

/// Queue the dispatcher listens on
pub const MASTER_QUEUE: &str = "TaskMasterQueue";

/// Queue the terminal results consumer listens on
pub const RESULTS_QUEUE: &str = "ResultsWriterQueue";

/// Name of a message queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn master() -> Self {
        Self::new(MASTER_QUEUE)
    }

    pub fn results_writer() -> Self {
        Self::new(RESULTS_QUEUE)
    }

    /// Work queue by zero-based index (`WorkQueue1` is index 0)
    pub fn work_queue(index: usize) -> Self {
        Self(format!("WorkQueue{}", index + 1))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reliable, FIFO-per-queue point-to-point send
pub trait MessageChannel: Send + Sync {
    fn send(&self, queue: &QueueName, envelope: Envelope) -> Result<()>;
}

/// Receiving end of one named queue
pub struct Inbox {
    name: QueueName,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Inbox {
    pub fn name(&self) -> &QueueName {
        &self.name
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the queue has been closed and drained. A payload
    /// that fails to decode is returned as an error so the caller can log and
    /// discard it.
    pub async fn recv(&mut self) -> Option<Result<Envelope>> {
        let bytes = self.rx.recv().await?;
        Some(codec::decode(&bytes))
    }
}

/// In-process broker holding one queue per registered name
#[derive(Default)]
pub struct LocalBroker {
    queues: Mutex<HashMap<QueueName, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue and hand out its only receiving end
    pub fn register(&self, name: QueueName) -> Result<Inbox> {
        let mut queues = self.lock()?;
        if queues.contains_key(&name) {
            return Err(Error::Channel(format!("Queue {} already registered", name)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(name.clone(), tx);
        debug!("Registered queue {}", name);

        Ok(Inbox { name, rx })
    }

    /// Close every queue; inboxes drain what is already queued, then end
    pub fn close_all(&self) -> Result<()> {
        let mut queues = self.lock()?;
        debug!("Closing {} queues", queues.len());
        queues.clear();
        Ok(())
    }

    /// Registered queue names, sorted
    pub fn queue_names(&self) -> Result<Vec<QueueName>> {
        let mut names: Vec<QueueName> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<QueueName, mpsc::UnboundedSender<Vec<u8>>>>> {
        self.queues
            .lock()
            .map_err(|_| Error::Channel("Broker queue table poisoned".to_string()))
    }
}

impl MessageChannel for LocalBroker {
    fn send(&self, queue: &QueueName, envelope: Envelope) -> Result<()> {
        let bytes = codec::encode(&envelope)?;
        let queues = self.lock()?;

        let Some(tx) = queues.get(queue) else {
            warn!("Send of {} to unknown queue {}", envelope.body.name(), queue);
            return Err(Error::Channel(format!("Unknown queue {}", queue)));
        };

        tx.send(bytes)
            .map_err(|_| Error::Channel(format!("Queue {} is closed", queue)))
    }
}
