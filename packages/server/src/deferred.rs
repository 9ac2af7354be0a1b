//! Deferred execution bridge.
//!
//! Network tasks may not touch host-owned state directly. Instead they submit
//! a closure through a [`DeferredBridge`]; the closure is queued for the single
//! host thread, which drains the queue through its [`HostLoop`]. The submitter
//! waits for the result with a deadline.
//!
//! ## Guarantees
//!
//! - Work runs at most once, on the host thread, in submission order.
//! - The result is delivered through a oneshot channel, so it reaches the
//!   original waiter at most once.
//! - When the waiter has already timed out, the host thread skips the work.
//! - A panic inside the work is caught on the host thread and surfaced to the
//!   waiter as [`DeferredError::Panicked`].

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeferredError {
    #[error("Timeout waiting for host thread after {0:?}")]
    Timeout(Duration),

    #[error("Deferred work panicked: {0}")]
    Panicked(String),

    #[error("Host loop is no longer running")]
    HostGone,
}

/// Create a connected bridge / host loop pair owning `state`
pub fn channel<S>(state: S) -> (DeferredBridge<S>, HostLoop<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeferredBridge { tx }, HostLoop { rx, state })
}

/// Submitting side, cheap to clone and shared by every tool module
pub struct DeferredBridge<S> {
    tx: mpsc::UnboundedSender<Task<S>>,
}

impl<S> Clone for DeferredBridge<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: 'static> DeferredBridge<S> {
    /// Schedule `work` on the host thread and wait up to `timeout` for its result
    pub async fn submit<T, F>(&self, timeout: Duration, work: F) -> Result<T, DeferredError>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();

        let task: Task<S> = Box::new(move |state: &mut S| {
            if result_tx.is_closed() {
                tracing::debug!("Skipping deferred call abandoned by its caller");
                return;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(state)))
                .map_err(|payload| DeferredError::Panicked(panic_message(payload.as_ref())));
            // The waiter may have timed out between the check above and now
            let _ = result_tx.send(outcome);
        });

        self.tx.send(task).map_err(|_| DeferredError::HostGone)?;

        match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DeferredError::HostGone),
            Err(_) => {
                tracing::warn!("Deferred call timed out after {:?}", timeout);
                Err(DeferredError::Timeout(timeout))
            }
        }
    }
}

/// Host-thread side: owns the state and drains queued work
pub struct HostLoop<S> {
    rx: mpsc::UnboundedReceiver<Task<S>>,
    state: S,
}

impl<S> HostLoop<S> {
    /// Drain work until every bridge is dropped, then hand the state back.
    ///
    /// Blocks the calling thread; must not be called from inside an async
    /// runtime.
    pub fn run(mut self) -> S {
        tracing::debug!("Host loop started");
        while let Some(task) = self.rx.blocking_recv() {
            task(&mut self.state);
        }
        tracing::debug!("Host loop finished, all bridges dropped");
        self.state
    }

    /// Execute everything queued so far without blocking.
    ///
    /// For hosts that drive their own event loop and poll once per tick.
    /// Returns the number of tasks taken off the queue.
    pub fn run_pending(&mut self) -> usize {
        let mut executed = 0;
        while let Ok(task) = self.rx.try_recv() {
            task(&mut self.state);
            executed += 1;
        }
        executed
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
