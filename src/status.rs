//! Token operation status broadcaster.
//!
//! One [`TokenOperationObserver`] holds the current [`TokenOperationStatus`]
//! for every form sharing a client. The tokenization client is the only
//! writer; forms read the status and subscribe to changes.

use crate::types::TokenOperationStatus;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Callback invoked with the new status after every change.
pub type StatusCallback = Arc<dyn Fn(TokenOperationStatus) + Send + Sync>;

/// Handle returned by [`TokenOperationObserverType::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Read side of the status broadcaster.
pub trait TokenOperationObserverType: Send + Sync {
    /// Current status.
    fn status(&self) -> TokenOperationStatus;

    /// Registers a callback. It is called synchronously on every change.
    fn subscribe(&self, observer: StatusCallback) -> SubscriptionId;

    /// Removes a callback. Unknown handles are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Async view of the status.
    fn watch(&self) -> watch::Receiver<TokenOperationStatus>;

    /// Clears a throttled status; the external reset signal after a cool-down.
    ///
    /// Returns whether the status changed.
    fn reset_throttle(&self) -> bool;
}

struct ObserverState {
    status: TokenOperationStatus,
    in_flight: usize,
    throttled: bool,
    throttle_generation: u64,
    next_id: u64,
    observers: Vec<(SubscriptionId, StatusCallback)>,
}

impl ObserverState {
    fn derived_status(&self) -> TokenOperationStatus {
        if self.throttled {
            TokenOperationStatus::Throttled
        } else if self.in_flight > 0 {
            TokenOperationStatus::Running
        } else {
            TokenOperationStatus::Acceptable
        }
    }
}

/// Process-wide status holder.
///
/// Mutations happen under a mutex; callbacks are invoked after the lock is
/// released, over a snapshot of the registered observers, so a callback may
/// subscribe or unsubscribe without deadlocking or skipping anyone.
pub struct TokenOperationObserver {
    state: Mutex<ObserverState>,
    sender: watch::Sender<TokenOperationStatus>,
}

static SHARED: Lazy<Arc<TokenOperationObserver>> =
    Lazy::new(|| Arc::new(TokenOperationObserver::new()));

impl TokenOperationObserver {
    /// Creates an isolated broadcaster in the `Acceptable` state.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(TokenOperationStatus::Acceptable);
        Self {
            state: Mutex::new(ObserverState {
                status: TokenOperationStatus::Acceptable,
                in_flight: 0,
                throttled: false,
                throttle_generation: 0,
                next_id: 0,
                observers: Vec::new(),
            }),
            sender,
        }
    }

    /// The process-wide instance used when no broadcaster is injected.
    pub fn shared() -> Arc<TokenOperationObserver> {
        Arc::clone(&SHARED)
    }

    /// Forces a status. Idempotent: no notification when unchanged.
    ///
    /// Returns whether observers were notified.
    pub fn set_status(&self, status: TokenOperationStatus) -> bool {
        self.transition(|state| {
            state.throttled = status == TokenOperationStatus::Throttled;
            status
        })
    }

    /// Marks a request as dispatched.
    pub(crate) fn begin_request(&self) {
        self.transition(|state| {
            state.in_flight += 1;
            state.derived_status()
        });
    }

    /// Marks a request as fully processed; `throttle` makes the status sticky `Throttled`.
    ///
    /// Returns the throttle generation after this request.
    pub(crate) fn end_request(&self, throttle: bool) -> u64 {
        let mut generation = 0;
        self.transition(|state| {
            state.in_flight = state.in_flight.saturating_sub(1);
            if throttle {
                state.throttled = true;
                state.throttle_generation += 1;
            }
            generation = state.throttle_generation;
            state.derived_status()
        });
        generation
    }

    /// Counter bumped by every request that ends throttled.
    pub fn throttle_generation(&self) -> u64 {
        self.state.lock().throttle_generation
    }

    /// Clears the throttle only if no request was throttled since `generation`.
    ///
    /// A cool-down timer uses this so it cannot end a later throttle early.
    pub fn reset_throttle_if_current(&self, generation: u64) -> bool {
        self.transition(|state| {
            if state.throttle_generation == generation {
                state.throttled = false;
            }
            state.derived_status()
        })
    }

    fn transition<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut ObserverState) -> TokenOperationStatus,
    {
        let (status, snapshot) = {
            let mut state = self.state.lock();
            let next = update(&mut state);
            if next == state.status {
                return false;
            }
            tracing::debug!(from = ?state.status, to = ?next, "token operation status changed");
            state.status = next;
            self.sender.send_replace(next);
            let snapshot: Vec<StatusCallback> =
                state.observers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            (next, snapshot)
        };

        for callback in snapshot {
            callback(status);
        }
        true
    }

    /// Number of registered callbacks.
    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }
}

impl Default for TokenOperationObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenOperationObserverType for TokenOperationObserver {
    fn status(&self) -> TokenOperationStatus {
        self.state.lock().status
    }

    fn subscribe(&self, observer: StatusCallback) -> SubscriptionId {
        let mut state = self.state.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.observers.push((id, observer));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().observers.retain(|(sid, _)| *sid != id);
    }

    fn watch(&self) -> watch::Receiver<TokenOperationStatus> {
        self.sender.subscribe()
    }

    fn reset_throttle(&self) -> bool {
        self.transition(|state| {
            state.throttled = false;
            state.derived_status()
        })
    }
}

/// Brackets one request: `Running` on creation, restored on drop.
///
/// Dropping the guard on any exit path, including early returns and panics,
/// ends the request. Call [`StatusGuard::throttle`] before dropping to leave
/// the status `Throttled`.
pub struct StatusGuard {
    observer: Arc<TokenOperationObserver>,
    throttle: bool,
    finished: bool,
}

impl StatusGuard {
    /// Marks a request as running.
    pub fn begin(observer: Arc<TokenOperationObserver>) -> Self {
        observer.begin_request();
        Self {
            observer,
            throttle: false,
            finished: false,
        }
    }

    /// Leaves the status `Throttled` once the guard is dropped.
    pub fn throttle(&mut self) {
        self.throttle = true;
    }

    /// Ends the request now and returns the throttle generation it left behind.
    pub fn finish(mut self) -> u64 {
        self.finished = true;
        self.observer.end_request(self.throttle)
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.observer.end_request(self.throttle);
        }
    }
}
