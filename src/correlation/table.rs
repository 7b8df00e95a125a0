//! Pending-request table.
//!
//! A caller opens a `PendingReplies` handle, puts its request id into the
//! reply address of the commands it sends, and awaits replies with a deadline.
//! Dropping the handle unregisters the id: anything that arrives later is a
//! straggler and is discarded.

use super::types::{Reply, ReplyAddress, ReplyEnvelope, RequestId};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Delivers a reply to whichever node is waiting for it.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, to: ReplyAddress, reply: Reply);
}

#[derive(Default)]
pub struct Correlations {
    pending: DashMap<RequestId, mpsc::UnboundedSender<Reply>>,
}

impl Correlations {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(self: &Arc<Self>) -> PendingReplies {
        let request_id = RequestId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.insert(request_id.clone(), tx);

        tracing::trace!("Opened request {}", request_id);

        PendingReplies {
            request_id,
            rx,
            table: self.clone(),
        }
    }

    /// Hands a reply to its waiter. Returns false for unknown or finished
    /// requests; the reply is dropped in that case.
    pub fn deliver(&self, envelope: ReplyEnvelope) -> bool {
        let sender = self
            .pending
            .get(&envelope.request_id)
            .map(|entry| entry.value().clone());

        match sender {
            Some(tx) => {
                if tx.send(envelope.reply).is_ok() {
                    true
                } else {
                    tracing::debug!("Request {} closed, discarding reply", envelope.request_id);
                    false
                }
            }
            None => {
                tracing::debug!(
                    "Discarding late reply for finished request {}",
                    envelope.request_id
                );
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn close(&self, request_id: &RequestId) {
        self.pending.remove(request_id);
    }
}

pub struct PendingReplies {
    request_id: RequestId,
    rx: mpsc::UnboundedReceiver<Reply>,
    table: Arc<Correlations>,
}

impl PendingReplies {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Waits for the next reply. `None` once the deadline has passed; the
    /// remote work is not cancelled, only the wait.
    pub async fn next_before(&mut self, deadline: Instant) -> Option<Reply> {
        match tokio::time::timeout_at(deadline, self.rx.recv()).await {
            Ok(reply) => reply,
            Err(_) => None,
        }
    }
}

impl Drop for PendingReplies {
    fn drop(&mut self) {
        self.table.close(&self.request_id);
    }
}
