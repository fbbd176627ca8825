use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Mutex, MutexGuard},
    task::{Context, Poll},
};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::McpSseError;

type CallOutcome = Result<Value, McpSseError>;

#[derive(Debug, Default)]
struct PendingCallState {
    calls: HashMap<u64, oneshot::Sender<CallOutcome>>,
    closed: Option<McpSseError>,
}

/// Requests awaiting a correlated response, keyed by JSON-RPC id.
///
/// Every registered call completes exactly once: the entry is removed under
/// the lock before its outcome is delivered. Once [`reject_all`] has run the
/// table stays closed and later registrations complete immediately with the
/// same error.
///
/// [`reject_all`]: PendingCallTable::reject_all
#[derive(Debug, Default)]
pub struct PendingCallTable {
    state: Mutex<PendingCallState>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` before the request carrying it is transmitted.
    pub fn register(&self, id: u64) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        let mut state = lock_or_recover(&self.state);
        if let Some(error) = state.closed.clone() {
            let _ = tx.send(Err(error));
        } else if state.calls.insert(id, tx).is_some() {
            tracing::warn!(id, "pending call id registered twice, previous waiter dropped");
        }
        PendingCall { id, rx }
    }

    /// Completes `id` with `value`. Unknown ids are ignored and return `false`.
    pub fn resolve(&self, id: u64, value: Value) -> bool {
        self.complete(id, Ok(value))
    }

    /// Fails `id` with `error`. Unknown ids are ignored and return `false`.
    pub fn reject(&self, id: u64, error: McpSseError) -> bool {
        self.complete(id, Err(error))
    }

    /// Fails every outstanding call and closes the table. Returns how many
    /// calls were drained; a second invocation drains nothing.
    pub fn reject_all(&self, error: McpSseError) -> usize {
        let drained: Vec<_> = {
            let mut state = lock_or_recover(&self.state);
            if state.closed.is_none() {
                state.closed = Some(error.clone());
            }
            state.calls.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.state).calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        lock_or_recover(&self.state).closed.is_some()
    }

    fn complete(&self, id: u64, outcome: CallOutcome) -> bool {
        let sender = lock_or_recover(&self.state).calls.remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Future side of a registered call.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<CallOutcome>,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingCall {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(McpSseError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
