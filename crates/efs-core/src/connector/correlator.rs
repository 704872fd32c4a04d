//! Matching replies to the commands waiting for them.
//!
//! Pending calls form a FIFO queue. With sequence numbers a reply completes
//! the call carrying the same number; without them the reply completes the
//! oldest call. Calls that gave up waiting leave a "stale" marker in
//! positional mode so their late reply is dropped instead of being handed
//! to the next caller.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::ConnectorError;
use super::reply::Reply;

pub(crate) type ReplySender = oneshot::Sender<Result<Reply, ConnectorError>>;
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Reply, ConnectorError>>;

struct Pending {
    seq: Option<u32>,
    continuations: Vec<String>,
    tx: ReplySender,
}

#[derive(Default)]
struct State {
    open: bool,
    pending: VecDeque<Pending>,
    stale: usize,
}

/// What happened to a line handed to [`Correlator::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// A pending call was completed.
    Completed,
    /// A continuation line was attached to a pending call.
    Continued,
    /// The line belonged to a call that already gave up.
    Stale,
    /// No pending call matches the line.
    Unmatched,
}

#[derive(Default)]
pub(crate) struct Correlator {
    state: Mutex<State>,
}

impl Correlator {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept registrations; called once a connection is established.
    pub(crate) fn open(&self) {
        let mut state = self.state();
        state.open = true;
        state.stale = 0;
    }

    /// Refuse new registrations and fail every pending call.
    pub(crate) fn close(&self) {
        let mut state = self.state();
        state.open = false;
        state.stale = 0;
        for pending in state.pending.drain(..) {
            let _ = pending.tx.send(Err(ConnectorError::ConnectionLost));
        }
    }

    /// Register a call about to be written to the socket.
    pub(crate) fn register(&self, seq: Option<u32>) -> Result<ReplyReceiver, ConnectorError> {
        let mut state = self.state();
        if !state.open {
            return Err(ConnectorError::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        state.pending.push_back(Pending {
            seq,
            continuations: Vec::new(),
            tx,
        });
        Ok(rx)
    }

    /// Forget a call that stopped waiting (timeout or write failure).
    pub(crate) fn cancel(&self, seq: Option<u32>) {
        let mut state = self.state();
        let position = match seq {
            Some(seq) => state.pending.iter().position(|p| p.seq == Some(seq)),
            None if state.pending.is_empty() => None,
            None => Some(0),
        };
        if let Some(position) = position {
            state.pending.remove(position);
            if seq.is_none() {
                state.stale += 1;
            }
        }
    }

    /// Route a solicited reply line to its caller.
    pub(crate) fn dispatch(&self, reply: Reply) -> Dispatch {
        let mut state = self.state();

        if reply.seq.is_none() && state.stale > 0 {
            if reply.is_final() {
                state.stale -= 1;
            }
            debug!(code = reply.code, "dropping reply of abandoned command");
            return Dispatch::Stale;
        }

        let position = match reply.seq {
            Some(seq) => state.pending.iter().position(|p| p.seq == Some(seq)),
            None if state.pending.is_empty() => None,
            None => Some(0),
        };
        let Some(position) = position else {
            warn!(code = reply.code, seq = ?reply.seq, "reply matches no pending command");
            return Dispatch::Unmatched;
        };

        if !reply.is_final() {
            if let Some(pending) = state.pending.get_mut(position) {
                pending.continuations.push(reply.message);
            }
            return Dispatch::Continued;
        }

        let Some(pending) = state.pending.remove(position) else {
            return Dispatch::Unmatched;
        };
        let mut reply = reply;
        reply.continuations = pending.continuations;
        if pending.tx.send(Ok(reply)).is_err() {
            debug!("caller dropped before its reply arrived");
        }
        Dispatch::Completed
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.state().pending.len()
    }
}
