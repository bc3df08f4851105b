//! Process-wide, observable store of outstanding failures and connectivity.
//!
//! All mutation funnels through [`ErrorStoreState::reduce`], applied atomically inside a
//! `watch` channel so a reader never sees a half-applied update. Subscribers get the whole
//! state on every change.

use super::kind::ErrorKind;
use super::record::{ErrorId, ErrorRecord, ErrorUpdate, NewError};
use super::status::{NetworkStatus, NetworkStatusUpdate};
use crate::events::{ClientEvent, EventBus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Snapshot of everything the store tracks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStoreState {
    /// Insertion order, oldest first.
    pub errors: Vec<ErrorRecord>,
    pub network_status: NetworkStatus,
    pub total_count: usize,
    /// Set while a bulk retry-all is running.
    pub is_retrying: bool,
}

/// State transitions understood by [`ErrorStoreState::reduce`].
#[derive(Debug, Clone)]
pub enum StoreAction {
    Add(ErrorRecord),
    Remove(ErrorId),
    Clear,
    Update(ErrorId, ErrorUpdate),
    SetNetworkStatus {
        update: NetworkStatusUpdate,
        checked_at: DateTime<Utc>,
    },
    SetRetrying(bool),
}

impl ErrorStoreState {
    /// Apply one transition. Returns whether anything observable changed.
    pub fn reduce(&mut self, action: StoreAction) -> bool {
        match action {
            StoreAction::Add(record) => {
                self.errors.push(record);
                self.total_count += 1;
                true
            }
            StoreAction::Remove(id) => match self.errors.iter().position(|r| r.id == id) {
                Some(index) => {
                    self.errors.remove(index);
                    self.total_count = self.total_count.saturating_sub(1);
                    true
                }
                None => false,
            },
            StoreAction::Clear => {
                let changed = !self.errors.is_empty() || self.total_count != 0;
                self.errors.clear();
                self.total_count = 0;
                changed
            }
            StoreAction::Update(id, update) => self
                .errors
                .iter_mut()
                .find(|r| r.id == id)
                .is_some_and(|record| update.apply_to(record)),
            StoreAction::SetNetworkStatus { update, checked_at } => {
                self.network_status.merge(update, checked_at)
            }
            StoreAction::SetRetrying(is_retrying) => {
                let changed = self.is_retrying != is_retrying;
                self.is_retrying = is_retrying;
                changed
            }
        }
    }

    pub fn get(&self, id: ErrorId) -> Option<&ErrorRecord> {
        self.errors.iter().find(|r| r.id == id)
    }

    pub fn by_kind(&self, kind: ErrorKind) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter().filter(move |r| r.kind == kind)
    }

    pub fn by_endpoint<'a>(&'a self, endpoint: &'a str) -> impl Iterator<Item = &'a ErrorRecord> {
        self.errors.iter().filter(move |r| r.endpoint == endpoint)
    }

    /// Records that still have automatic retries left.
    pub fn retryable(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter().filter(|r| r.is_retryable())
    }
}

/// Handle to the shared store. Cheap to clone; all clones see the same state.
#[derive(Clone, Debug)]
pub struct ErrorStore {
    state: Arc<watch::Sender<ErrorStoreState>>,
    events: EventBus,
    lifecycle: CancellationToken,
    monitors: Arc<AtomicUsize>,
}

/// Keeps a connectivity monitor registered with an [`ErrorStore`] until dropped.
#[derive(Debug)]
pub struct MonitorGuard {
    monitors: Arc<AtomicUsize>,
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.monitors.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ErrorStore {
    pub fn new(events: EventBus) -> Self {
        let (state, _) = watch::channel(ErrorStoreState::default());
        Self {
            state: Arc::new(state),
            events,
            lifecycle: CancellationToken::new(),
            monitors: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn dispatch(&self, action: StoreAction) -> bool {
        self.state.send_if_modified(|state| state.reduce(action))
    }

    /// Classify and insert a new failure. Never fails.
    pub fn add_error(&self, error: NewError) -> ErrorId {
        let record = error.into_record();
        let event = ClientEvent::ErrorAdded {
            id: record.id,
            kind: record.kind,
            endpoint: record.endpoint.clone(),
            message: record.message.clone(),
        };
        let id = record.id;
        self.dispatch(StoreAction::Add(record));
        self.events.emit(event);
        id
    }

    /// Remove a record; absent ids are ignored.
    pub fn remove_error(&self, id: ErrorId) {
        if self.dispatch(StoreAction::Remove(id)) {
            self.events.emit(ClientEvent::ErrorRemoved { id });
        }
    }

    /// Remove every record. Network status is left alone.
    pub fn clear_all(&self) {
        let mut count = 0;
        let changed = self.state.send_if_modified(|state| {
            count = state.errors.len();
            state.reduce(StoreAction::Clear)
        });
        if changed {
            self.events.emit(ClientEvent::ErrorsCleared { count });
        }
    }

    /// Merge `update` into a record; a record removed in the meantime is ignored.
    pub fn update_error(&self, id: ErrorId, update: ErrorUpdate) {
        if self.dispatch(StoreAction::Update(id, update)) {
            self.events.emit(ClientEvent::ErrorUpdated { id });
        }
    }

    /// Merge into the network status and stamp `last_checked`.
    pub fn set_network_status(&self, update: NetworkStatusUpdate) {
        let mut transition = None;
        self.state.send_if_modified(|state| {
            let was_online = state.network_status.is_online;
            let changed = state.reduce(StoreAction::SetNetworkStatus {
                update,
                checked_at: Utc::now(),
            });
            if state.network_status.is_online != was_online {
                transition = Some(state.network_status.is_online);
            }
            changed
        });
        if let Some(is_online) = transition {
            self.events
                .emit(ClientEvent::NetworkStatusChanged { is_online });
        }
    }

    pub fn set_retrying(&self, is_retrying: bool) {
        self.dispatch(StoreAction::SetRetrying(is_retrying));
    }

    pub fn snapshot(&self) -> ErrorStoreState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ErrorStoreState> {
        self.state.subscribe()
    }

    pub fn get(&self, id: ErrorId) -> Option<ErrorRecord> {
        self.state.borrow().get(id).cloned()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.state.borrow().errors.clone()
    }

    pub fn by_kind(&self, kind: ErrorKind) -> Vec<ErrorRecord> {
        self.state.borrow().by_kind(kind).cloned().collect()
    }

    pub fn by_endpoint(&self, endpoint: &str) -> Vec<ErrorRecord> {
        self.state.borrow().by_endpoint(endpoint).cloned().collect()
    }

    pub fn retryable(&self) -> Vec<ErrorRecord> {
        self.state.borrow().retryable().cloned().collect()
    }

    pub fn total_count(&self) -> usize {
        self.state.borrow().total_count
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.state.borrow().network_status.clone()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().network_status.is_online
    }

    /// Wait up to `limit` for connectivity. Returns whether the network is online.
    pub async fn wait_until_online(&self, limit: Duration) -> bool {
        let mut receiver = self.subscribe();
        let online = tokio::time::timeout(limit, async {
            receiver
                .wait_for(|state| state.network_status.is_online)
                .await
                .is_ok()
        })
        .await
        .unwrap_or(false);
        online || self.is_online()
    }

    /// Register something that reports connectivity back to this store.
    ///
    /// Offline state is only worth waiting on while a monitor can flip it back.
    pub fn attach_monitor(&self) -> MonitorGuard {
        self.monitors.fetch_add(1, Ordering::SeqCst);
        MonitorGuard {
            monitors: self.monitors.clone(),
        }
    }

    pub fn is_monitored(&self) -> bool {
        self.monitors.load(Ordering::SeqCst) > 0
    }

    /// Token for timers and background tasks tied to this store's lifetime.
    pub fn lifecycle(&self) -> CancellationToken {
        self.lifecycle.child_token()
    }

    /// Tear down: cancel every timer derived from [`ErrorStore::lifecycle`] and drop all records.
    pub fn dispose(&self) {
        self.lifecycle.cancel();
        self.clear_all();
        self.set_retrying(false);
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_cancelled()
    }
}

impl Default for ErrorStore {
    fn default() -> Self {
        Self::new(EventBus::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(endpoint: &str, status: Option<u16>) -> NewError {
        NewError::new(endpoint, "boom")
            .with_status(status)
            .with_max_attempts(3)
    }

    #[test]
    fn add_assigns_fresh_state_and_counts() {
        let store = ErrorStore::default();
        let id = store.add_error(failure("reports", Some(503)));

        let record = store.get(id).unwrap();
        assert_eq!(record.kind, ErrorKind::Api);
        assert_eq!(record.attempt, 0);
        assert!(!record.is_retrying);
        assert_eq!(store.total_count(), 1);
    }

    #[test]
    fn remove_twice_is_a_noop() {
        let store = ErrorStore::default();
        let id = store.add_error(failure("reports", None));

        store.remove_error(id);
        store.remove_error(id);

        assert!(store.get(id).is_none());
        assert_eq!(store.total_count(), 0);
    }

    #[test]
    fn update_on_missing_record_is_ignored() {
        let store = ErrorStore::default();
        let id = store.add_error(failure("reports", None));
        store.clear_all();

        store.update_error(id, ErrorUpdate::default().attempt(1).retrying(true));
        assert!(store.errors().is_empty());
    }

    #[test]
    fn clear_all_keeps_network_status() {
        let store = ErrorStore::default();
        store.set_network_status(NetworkStatusUpdate::offline());
        store.add_error(failure("a", None));
        store.add_error(failure("b", Some(500)));

        store.clear_all();

        assert_eq!(store.total_count(), 0);
        assert!(!store.network_status().is_online);
    }

    #[test]
    fn queries_filter_records() {
        let store = ErrorStore::default();
        store.add_error(failure("reports", Some(503)));
        store.add_error(failure("reports", Some(422)).with_max_attempts(0));
        store.add_error(failure("sources", None));

        assert_eq!(store.by_kind(ErrorKind::Validation).len(), 1);
        assert_eq!(store.by_endpoint("reports").len(), 2);
        assert_eq!(store.retryable().len(), 2);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let store = ErrorStore::default();
        let first = store.add_error(failure("a", None));
        let second = store.add_error(failure("b", None));
        let ids: Vec<_> = store.errors().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn attempt_never_exceeds_ceiling() {
        let store = ErrorStore::default();
        let id = store.add_error(failure("reports", Some(503)));

        for attempt in 1..=10 {
            store.update_error(id, ErrorUpdate::default().attempt(attempt));
            let record = store.get(id).unwrap();
            assert!(record.attempt <= record.max_attempts);
        }
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let store = ErrorStore::default();
        let mut receiver = store.subscribe();

        let id = store.add_error(failure("reports", None));
        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow_and_update().total_count, 1);

        store.remove_error(id);
        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow_and_update().total_count, 0);
    }

    #[tokio::test]
    async fn network_transitions_emit_events() {
        let store = ErrorStore::default();
        let mut events = store.events().subscribe();

        store.set_network_status(NetworkStatusUpdate::offline());
        store.set_network_status(NetworkStatusUpdate::offline());
        store.set_network_status(NetworkStatusUpdate::online());

        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::NetworkStatusChanged { is_online: false }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::NetworkStatusChanged { is_online: true }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_online_times_out_while_offline() {
        let store = ErrorStore::default();
        store.set_network_status(NetworkStatusUpdate::offline());
        assert!(!store.wait_until_online(Duration::from_secs(5)).await);

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_until_online(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        store.set_network_status(NetworkStatusUpdate::online());
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn monitor_registration_ends_with_the_guard() {
        let store = ErrorStore::default();
        assert!(!store.is_monitored());

        let first = store.attach_monitor();
        let second = store.clone().attach_monitor();
        assert!(store.is_monitored());

        drop(first);
        assert!(store.is_monitored());
        drop(second);
        assert!(!store.is_monitored());
    }

    #[test]
    fn dispose_cancels_lifecycle_tokens() {
        let store = ErrorStore::default();
        let token = store.lifecycle();
        store.add_error(failure("a", None));

        store.dispose();

        assert!(token.is_cancelled());
        assert!(store.is_disposed());
        assert_eq!(store.total_count(), 0);
    }
}
