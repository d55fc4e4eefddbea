use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::PassthroughError;

/// `Bytes` payload and a string-rendered error so the result can travel
/// through a `broadcast` channel, which requires `Clone`.
type Outcome = Result<Bytes, String>;

/// Coalesces concurrent fetches for the same key into one underlying
/// call. Generalizes the in-flight-set idiom (`HashSet<u64>` guarding
/// duplicate segment fetches) into a reusable map keyed by anything
/// hashable, broadcasting the one real fetch's result to every caller
/// that arrived while it was in flight.
pub struct SingleFlight<K: Eq + Hash + Clone> {
    inflight: Mutex<HashMap<K, broadcast::Sender<Outcome>>>,
}

impl<K: Eq + Hash + Clone> SingleFlight<K> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: K, fetch: F) -> Result<Bytes, PassthroughError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, PassthroughError>>,
    {
        let mut follower_rx = None;
        {
            let mut inflight = self.inflight.lock();
            if let Some(tx) = inflight.get(&key) {
                follower_rx = Some(tx.subscribe());
            } else {
                let (tx, _rx) = broadcast::channel(1);
                inflight.insert(key.clone(), tx);
            }
        }

        if let Some(mut rx) = follower_rx {
            return match rx.recv().await {
                Ok(Ok(bytes)) => Ok(bytes),
                Ok(Err(message)) => Err(PassthroughError::Upstream(message)),
                Err(_) => Err(PassthroughError::Upstream(
                    "single-flight leader dropped without a result".to_string(),
                )),
            };
        }

        let result = fetch().await;
        let outcome: Outcome = match &result {
            Ok(bytes) => Ok(bytes.clone()),
            Err(err) => Err(err.to_string()),
        };
        if let Some(tx) = self.inflight.lock().remove(&key) {
            let _ = tx.send(outcome);
        }
        result
    }
}

impl<K: Eq + Hash + Clone> Default for SingleFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_calls_share_one_fetch_scenario_three() {
        let sf = Arc::new(SingleFlight::<String>::new());
        let fetch_count = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let sf = sf.clone();
            let fetch_count = fetch_count.clone();
            handles.push(tokio::spawn(async move {
                sf.run("playlist".to_string(), || async move {
                    fetch_count.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok(Bytes::from_static(b"#EXTM3U"))
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Bytes::from_static(b"#EXTM3U"));
        }
        assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_each_refetch() {
        let sf = SingleFlight::<String>::new();
        let fetch_count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fetch_count = fetch_count.clone();
            sf.run("k".to_string(), || async move {
                fetch_count.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"x"))
            })
            .await
            .unwrap();
        }
        assert_eq!(fetch_count.load(Ordering::SeqCst), 3);
    }
}
