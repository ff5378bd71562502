//! Per-key registry of in-flight calls.
//!
//! The first caller for a key spawns the call and publishes a shared handle;
//! later callers for the same key await that handle. The entry is removed once
//! the call settles, so the next caller after that starts a fresh call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;

use super::cancellable;
use crate::error::ProviderError;

type SharedCall<V> = Shared<BoxFuture<'static, Result<V, ProviderError>>>;
type Registry<V> = Arc<Mutex<HashMap<String, SharedCall<V>>>>;

pub struct Coalescer<V> {
    inflight: Registry<V>,
}

impl<V> Default for Coalescer<V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock<V>(registry: &Registry<V>) -> MutexGuard<'_, HashMap<String, SharedCall<V>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<V> Coalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `make()` unless a call for `key` is already in flight, in which
    /// case its result is shared. `cancel` only aborts this caller's wait.
    pub async fn run<F>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        make: F,
    ) -> Result<V, ProviderError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V, ProviderError>>,
    {
        let call = {
            let mut inflight = lock(&self.inflight);
            match inflight.get(key) {
                Some(call) => {
                    tracing::debug!(key, "joining in-flight call");
                    call.clone()
                }
                None => {
                    let fut = make();
                    let registry = Arc::clone(&self.inflight);
                    let owned_key = key.to_string();
                    let task = tokio::spawn(async move {
                        let res = fut.await;
                        lock(&registry).remove(&owned_key);
                        res
                    });
                    let call = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(ProviderError::Transport(format!("refresh task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key.to_string(), call.clone());
                    call
                }
            }
        };
        cancellable(cancel, call).await
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }
}
