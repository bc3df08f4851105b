//! Single-flight request deduplication.
//!
//! Callers that ask for the same logical key while a call is in flight share that call's
//! outcome instead of issuing their own. The registration lives exactly as long as the call:
//! a request made after settlement always starts fresh, and failures are never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

type Waiters<T, E> = Vec<oneshot::Sender<Result<T, E>>>;
type InFlight<T, E> = Arc<Mutex<HashMap<String, Waiters<T, E>>>>;

/// Removes the registration if the call task ends without settling, dropping the waiters so
/// they observe an abandoned call.
struct Registration<T, E> {
    in_flight: Option<InFlight<T, E>>,
    key: String,
}

impl<T, E> Registration<T, E> {
    fn settle(mut self) -> Waiters<T, E> {
        self.in_flight
            .take()
            .and_then(|map| {
                map.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&self.key)
            })
            .unwrap_or_default()
    }
}

impl<T, E> Drop for Registration<T, E> {
    fn drop(&mut self) {
        if let Some(map) = self.in_flight.take() {
            map.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.key);
        }
    }
}

pub struct Deduplicator<T, E> {
    in_flight: InFlight<T, E>,
}

impl<T, E> Deduplicator<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<oneshot::error::RecvError> + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the call registered under `key`, or start `factory()` and register it.
    ///
    /// The call runs on its own task, so dropping any caller (the first included) does not
    /// cancel it for the others.
    pub async fn dedupe<F, Fut>(&self, key: impl Into<String>, factory: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let (sender, receiver) = oneshot::channel();
        let start = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match in_flight.get_mut(&key) {
                Some(waiters) => {
                    waiters.push(sender);
                    false
                }
                None => {
                    in_flight.insert(key.clone(), vec![sender]);
                    true
                }
            }
        };

        if start {
            let call = factory();
            let registration = Registration {
                in_flight: Some(self.in_flight.clone()),
                key,
            };
            tokio::spawn(async move {
                let result = call.await;
                for waiter in registration.settle() {
                    let _ = waiter.send(result.clone());
                }
            });
        } else {
            log::debug!("Joined in-flight request {}", key);
        }

        receiver.await?
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T, E> Default for Deduplicator<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<oneshot::error::RecvError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
