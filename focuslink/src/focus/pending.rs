//! FIFO queue of callers waiting for a response.
//!
//! There are no request ids on the wire. The oldest queued request is the
//! one the next frame answers, so queue order must equal send order.

use std::collections::VecDeque;
use std::sync::mpsc::Sender;

use log::trace;

use crate::error::{Error, LinkFailure, Result};

/// What a caller eventually receives.
pub(crate) type Reply = Result<Option<String>>;

#[derive(Debug)]
struct PendingRequest {
    id: u64,
    reply: Sender<Reply>,
}

impl PendingRequest {
    fn settle(self, reply: Reply) {
        // The caller may have given up already; nothing to do then.
        let _ = self.reply.send(reply);
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    queue: VecDeque<PendingRequest>,
}

impl PendingQueue {
    pub(crate) fn push(&mut self, id: u64, reply: Sender<Reply>) {
        self.queue
            .push_back(PendingRequest { id, reply });
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn head_id(&self) -> Option<u64> {
        self.queue
            .front()
            .map(|p| p.id)
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.queue
            .iter()
            .any(|p| p.id == id)
    }

    /// Resolve the oldest request. Returns its id, or `None` if nobody was waiting.
    pub(crate) fn resolve_head(&mut self, reply: Option<String>) -> Option<u64> {
        let head = self.queue.pop_front()?;
        let id = head.id;
        trace!("Request #{id} resolved");
        head.settle(Ok(reply));
        Some(id)
    }

    /// Take a single request out of the queue without settling it.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.queue.len();
        self.queue.retain(|p| p.id != id);
        self.queue.len() != before
    }

    /// Reject every queued request with the same failure.
    pub(crate) fn drain(&mut self, failure: LinkFailure) -> usize {
        let count = self.queue.len();
        for pending in self.queue.drain(..) {
            trace!("Request #{} rejected: {failure:?}", pending.id);
            pending.settle(Err(Error::from(failure)));
        }
        count
    }
}
