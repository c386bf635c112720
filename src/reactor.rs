//! Cooperative single-threaded scheduler (C3).
//!
//! The node core never talks to Tokio directly — it only ever asks a
//! [`Reactor`] for the time and for one-shot timeouts, the same seam a
//! single-threaded `SelectServer`-style event loop sits behind. That keeps
//! `NodeCore`'s merge/RDM state machines pure and lets tests drive time
//! deterministically instead of racing real sleeps.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Identifies a pending timeout so it can be cancelled before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(u64);

/// What the node core needs from an event loop: wall-clock time and one-shot
/// deferred callbacks. Registering readable sockets is handled outside this
/// trait — the node owns its one [`crate::transport::Transport`] directly and
/// drives its own `recv_from` loop.
pub trait Reactor {
    fn now(&self) -> Instant;

    /// Schedule `callback` to run once, after `delay`. Must be safe to call
    /// reentrantly from within another callback.
    fn register_single_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimeoutId;

    /// Cancel a pending timeout. A no-op if it already fired or was never
    /// registered (e.g. it fired in the same tick this was called from).
    fn remove_timeout(&self, id: TimeoutId);
}

/// [`Reactor`] backed by a single-threaded Tokio `LocalSet`. Timeout callbacks
/// run as `spawn_local` tasks so they may safely hold an `Rc<RefCell<_>>` back
/// into the node core, which this reactor is always constructed alongside.
#[derive(Default)]
pub struct TokioReactor {
    next_id: RefCell<u64>,
    handles: Rc<RefCell<HashMap<TimeoutId, JoinHandle<()>>>>,
}

impl TokioReactor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reactor for TokioReactor {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn register_single_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimeoutId {
        let mut next_id = self.next_id.borrow_mut();
        let id = TimeoutId(*next_id);
        *next_id += 1;

        let handles = Rc::clone(&self.handles);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            callback();
            handles.borrow_mut().remove(&id);
        });
        self.handles.borrow_mut().insert(id, handle);
        id
    }

    fn remove_timeout(&self, id: TimeoutId) {
        if let Some(handle) = self.handles.borrow_mut().remove(&id) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn timeout_fires_callback_once() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let reactor = TokioReactor::new();
                let fired = Rc::new(Cell::new(false));
                let fired_clone = Rc::clone(&fired);
                reactor.register_single_timeout(
                    Duration::from_millis(5),
                    Box::new(move || fired_clone.set(true)),
                );
                tokio::time::sleep(Duration::from_millis(30)).await;
                assert!(fired.get());
            })
            .await;
    }

    #[tokio::test]
    async fn cancelled_timeout_never_fires() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let reactor = TokioReactor::new();
                let fired = Rc::new(Cell::new(false));
                let fired_clone = Rc::clone(&fired);
                let id = reactor.register_single_timeout(
                    Duration::from_millis(20),
                    Box::new(move || fired_clone.set(true)),
                );
                reactor.remove_timeout(id);
                tokio::time::sleep(Duration::from_millis(40)).await;
                assert!(!fired.get());
            })
            .await;
    }
}
