//! Deferred-operation queue.
//!
//! Every caller-issued operation routes through here. Before the session is
//! ready the queue buffers operations in submission order; once the session
//! drains it, the queue switches to pass-through and stays there until the
//! next connect cycle. The two states are explicit; readiness is never
//! encoded by swapping container behavior at runtime.

use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;

/// A deferred operation: runs the transport call and delivers the result
/// to the submitter's channel. Consumed exactly once.
pub(crate) type QueuedAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Wrap an async closure as a [`QueuedAction`].
pub(crate) fn action<F, Fut>(f: F) -> QueuedAction
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || -> BoxFuture<'static, ()> { Box::pin(f()) })
}

/// Two-state operation queue.
pub(crate) enum CommandQueue {
    /// Not ready: operations accumulate in FIFO order.
    Buffering(VecDeque<QueuedAction>),
    /// Ready: operations execute immediately at the submission site.
    PassThrough,
}

impl CommandQueue {
    /// A new queue starts buffering.
    pub fn new() -> Self {
        CommandQueue::Buffering(VecDeque::new())
    }

    /// Submit an operation. Returns the action back when the queue is in
    /// pass-through; the caller runs it immediately. Buffered submissions
    /// return `None`.
    pub fn submit(&mut self, action: QueuedAction) -> Option<QueuedAction> {
        match self {
            CommandQueue::Buffering(pending) => {
                pending.push_back(action);
                None
            }
            CommandQueue::PassThrough => Some(action),
        }
    }

    /// Begin the drain: switch to pass-through and hand the buffered
    /// operations to the caller for in-order execution.
    ///
    /// The state flips *before* any action runs, so reentrant submissions
    /// from inside a draining action execute immediately instead of landing
    /// back in the queue being drained.
    pub fn take_buffered(&mut self) -> VecDeque<QueuedAction> {
        match std::mem::replace(self, CommandQueue::PassThrough) {
            CommandQueue::Buffering(pending) => pending,
            CommandQueue::PassThrough => VecDeque::new(),
        }
    }

    /// Return to buffering for the next connect cycle.
    pub fn reset(&mut self) {
        *self = CommandQueue::new();
    }

    /// Whether submissions are currently being buffered.
    #[cfg(test)]
    pub fn is_buffering(&self) -> bool {
        matches!(self, CommandQueue::Buffering(_))
    }

    /// Number of buffered operations.
    #[cfg(test)]
    pub fn buffered_len(&self) -> usize {
        match self {
            CommandQueue::Buffering(pending) => pending.len(),
            CommandQueue::PassThrough => 0,
        }
    }
}
