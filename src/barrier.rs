// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Synchronization state machine and refresh barrier.
//!
//! [`SyncCtx`] tracks the instance through the initial bulk load:
//! `Init` while the refresh snapshot streams in, `DataInit` once the
//! server announced the end of the refresh and drain barriers are in
//! flight, `RefreshDone` the moment the last registered task drained,
//! and `Finished` once every waiter has been released. Transitions are
//! monotone; `Finished` is reached exactly once per refresh.
//!
//! The context also carries the event concurrency limiter the watcher
//! uses for back-pressure during the bulk load.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, Semaphore};
use tracing::debug;

/// Phase of the initial LDAP synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncState {
    /// Refresh snapshot streaming in; tasks may register
    Init,
    /// Refresh complete on the wire; drain barriers posted to tasks
    DataInit,
    /// Every registered task drained its queued refresh events
    RefreshDone,
    /// Barrier complete; journaling and serial write-backs enabled
    Finished,
}

/// Synchronization context shared by the watcher and all zone tasks.
///
/// Generic over the task event type so the barrier event can be posted
/// through the same queues as ordinary work.
#[derive(Debug)]
pub struct SyncCtx<E: Clone + Send + 'static> {
    state_tx: watch::Sender<SyncState>,
    tasks: Mutex<Vec<mpsc::UnboundedSender<E>>>,
    outstanding: AtomicUsize,
    concurr: Arc<Semaphore>,
    barrier_event: E,
}

impl<E: Clone + Send + 'static> SyncCtx<E> {
    /// New context in `Init` state with the given concurrency limit.
    #[must_use]
    pub fn new(barrier_event: E, concurrency_limit: usize) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Init);
        crate::metrics::set_sync_state(SyncState::Init);
        Self {
            state_tx,
            tasks: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
            concurr: Arc::new(Semaphore::new(concurrency_limit)),
            barrier_event,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state_tx.borrow()
    }

    /// Watch the state machine.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    fn advance(&self, state: SyncState) {
        self.state_tx.send_replace(state);
        crate::metrics::set_sync_state(state);
    }

    /// Register a task for the drain barrier.
    ///
    /// Legal only while the refresh is streaming (`Init`); idempotent
    /// per task queue. Returns whether the task is now registered.
    pub fn register_task(&self, sender: &mpsc::UnboundedSender<E>) -> bool {
        if self.state() != SyncState::Init {
            return false;
        }
        let mut tasks = self.tasks.lock().expect("sync task lock");
        if tasks.iter().any(|known| known.same_channel(sender)) {
            return true;
        }
        tasks.push(sender.clone());
        true
    }

    /// Number of tasks currently registered.
    #[must_use]
    pub fn registered_tasks(&self) -> usize {
        self.tasks.lock().expect("sync task lock").len()
    }

    /// Block until the in-flight event count drops below the limit.
    ///
    /// The acquired slot is released by [`SyncCtx::concurr_signal`]
    /// after the event has been processed.
    pub async fn concurr_wait(&self) {
        let permit = Arc::clone(&self.concurr)
            .acquire_owned()
            .await
            .expect("concurrency semaphore closed");
        permit.forget();
    }

    /// Release one event slot.
    pub fn concurr_signal(&self) {
        self.concurr.add_permits(1);
    }

    /// Handle the end of the wire refresh.
    ///
    /// The first call posts a drain-barrier event to every registered
    /// task and waits until the last of them has processed it; further
    /// calls (and calls after `Finished`) just wait or return
    /// immediately.
    pub async fn barrier_wait(&self) {
        if self.state() == SyncState::Finished {
            return;
        }
        if self.state() == SyncState::Init {
            self.advance(SyncState::DataInit);
            let tasks = {
                let mut tasks = self.tasks.lock().expect("sync task lock");
                std::mem::take(&mut *tasks)
            };
            debug!(tasks = tasks.len(), "posting drain barrier to tasks");
            self.outstanding.store(tasks.len(), Ordering::SeqCst);
            if tasks.is_empty() {
                self.finish();
            } else {
                for task in tasks {
                    if task.send(self.barrier_event.clone()).is_err() {
                        // A dead task has nothing left to drain.
                        self.task_drained();
                    }
                }
            }
        }

        let mut rx = self.state_tx.subscribe();
        while *rx.borrow_and_update() != SyncState::Finished {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Called by a task when it processed its drain-barrier event,
    /// i.e. nothing received before the barrier remains in its queue.
    pub fn task_drained(&self) {
        let previous = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        // A barrier event from before a reset counts for nothing.
        if previous == Ok(1) {
            self.finish();
        }
    }

    fn finish(&self) {
        self.advance(SyncState::RefreshDone);
        self.advance(SyncState::Finished);
        debug!("initial LDAP synchronization finished");
    }

    /// Reset to `Init` for a new refresh after the sync session was
    /// re-established. Journaling and write-backs are disabled again
    /// until the new refresh completes.
    pub fn reset(&self) {
        self.tasks.lock().expect("sync task lock").clear();
        self.outstanding.store(0, Ordering::SeqCst);
        self.advance(SyncState::Init);
    }
}

#[cfg(test)]
#[path = "barrier_tests.rs"]
mod barrier_tests;
