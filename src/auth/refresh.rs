//! Single-flight credential refresh.
//!
//! However many requests see a 401 at the same time, at most one refresh is in flight.
//! Every caller that arrives while it runs waits for and shares its outcome.

use super::{AuthError, Credential, CredentialProvider};
use crate::events::{ClientEvent, EventBus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

type RefreshResult = Result<Credential, AuthError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshResult>>,
    },
}

struct Inner {
    provider: Arc<dyn CredentialProvider>,
    events: EventBus,
    state: Mutex<RefreshState>,
    refresh_count: AtomicU64,
}

impl Inner {
    fn take_waiters(&self) -> Vec<oneshot::Sender<RefreshResult>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }
}

/// Returns the refresher to `Idle` if the refresh task ends without settling.
/// Pending waiters see their sender dropped and report [`AuthError::RefreshAbandoned`].
struct ResetOnDrop(Option<Arc<Inner>>);

impl ResetOnDrop {
    /// Hand over the waiters for settlement; the guard no longer touches the state.
    fn settle(mut self) -> Vec<oneshot::Sender<RefreshResult>> {
        self.0.take().map(|inner| inner.take_waiters()).unwrap_or_default()
    }
}

impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        if let Some(inner) = self.0.take() {
            drop(inner.take_waiters());
        }
    }
}

#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<Inner>,
}

impl TokenRefresher {
    pub fn new(provider: Arc<dyn CredentialProvider>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                events,
                state: Mutex::new(RefreshState::Idle),
                refresh_count: AtomicU64::new(0),
            }),
        }
    }

    /// Refresh the credential, joining a refresh already in flight.
    ///
    /// On failure the provider's credential is cleared and
    /// [`ClientEvent::CredentialInvalidated`] is published once for the whole group.
    pub async fn refresh(&self) -> RefreshResult {
        let (sender, receiver) = oneshot::channel();
        let start = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    waiters.push(sender);
                    false
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        waiters: vec![sender],
                    };
                    true
                }
            }
        };

        if start {
            // Spawned so a cancelled first caller does not cancel the refresh for the others.
            tokio::spawn(run_refresh(self.inner.clone()));
        } else {
            log::debug!("Joining credential refresh already in flight");
        }

        receiver.await.unwrap_or(Err(AuthError::RefreshAbandoned))
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(
            *self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            RefreshState::Refreshing { .. }
        )
    }

    /// Number of refreshes actually performed against the provider.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_count.load(Ordering::Relaxed)
    }
}

async fn run_refresh(inner: Arc<Inner>) {
    let reset = ResetOnDrop(Some(inner.clone()));
    inner.refresh_count.fetch_add(1, Ordering::Relaxed);
    log::info!("Refreshing credential");

    let result = inner.provider.refresh_credential().await;
    match &result {
        Ok(_) => inner.events.emit(ClientEvent::CredentialRefreshed),
        Err(e) => {
            inner.provider.clear_credential().await;
            inner.events.emit(ClientEvent::CredentialInvalidated {
                reason: e.to_string(),
            });
        }
    }

    for waiter in reset.settle() {
        // A waiter whose request was cancelled has gone away.
        let _ = waiter.send(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockCredentialProvider;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Provider whose refresh takes a while, so callers can pile up behind it.
    struct SlowProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl CredentialProvider for SlowProvider {
        async fn get_credential(&self) -> Option<Credential> {
            None
        }

        async fn refresh_credential(&self) -> RefreshResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(100)).await;
            if self.fail {
                Err(AuthError::RefreshRejected("expired".to_string()))
            } else {
                Ok(Credential::new(format!("token-{call}")))
            }
        }

        async fn clear_credential(&self) {}
    }

    fn slow(fail: bool) -> Arc<SlowProvider> {
        Arc::new(SlowProvider {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_refresh() {
        let provider = slow(false);
        let refresher = TokenRefresher::new(provider.clone(), EventBus::new());

        let results = futures::future::join_all((0..5).map(|_| refresher.refresh())).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.refresh_count(), 1);
        for result in results {
            assert_eq!(result, Ok(Credential::new("token-1")));
        }
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_after_settlement_starts_a_new_one() {
        let provider = slow(false);
        let refresher = TokenRefresher::new(provider.clone(), EventBus::new());

        assert_eq!(refresher.refresh().await, Ok(Credential::new("token-1")));
        assert_eq!(refresher.refresh().await, Ok(Credential::new("token-2")));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_shared_by_all_waiters() {
        let provider = slow(true);
        let refresher = TokenRefresher::new(provider.clone(), EventBus::new());

        let results = futures::future::join_all((0..3).map(|_| refresher.refresh())).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(
                result,
                Err(AuthError::RefreshRejected("expired".to_string()))
            );
        }
    }

    #[tokio::test]
    async fn failure_clears_credential_and_invalidates() {
        let mut provider = MockCredentialProvider::new();
        provider
            .expect_refresh_credential()
            .times(1)
            .returning(|| Err(AuthError::RefreshRejected("revoked".to_string())));
        provider.expect_clear_credential().times(1).returning(|| ());

        let events = EventBus::new();
        let mut receiver = events.subscribe();
        let refresher = TokenRefresher::new(Arc::new(provider), events);

        assert!(refresher.refresh().await.is_err());
        assert_eq!(
            receiver.recv().await.unwrap(),
            ClientEvent::CredentialInvalidated {
                reason: "Credential refresh rejected: revoked".to_string()
            }
        );
    }

    #[tokio::test]
    async fn success_publishes_refreshed_event() {
        let mut provider = MockCredentialProvider::new();
        provider
            .expect_refresh_credential()
            .times(1)
            .returning(|| Ok(Credential::new("fresh")));
        provider.expect_clear_credential().never();

        let events = EventBus::new();
        let mut receiver = events.subscribe();
        let refresher = TokenRefresher::new(Arc::new(provider), events);

        assert_eq!(refresher.refresh().await, Ok(Credential::new("fresh")));
        assert_eq!(
            receiver.recv().await.unwrap(),
            ClientEvent::CredentialRefreshed
        );
    }
}
