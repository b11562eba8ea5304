use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Memoizes one expensive remote value (a signing key set, a registrar key)
/// for `ttl`.
///
/// At most one fetch runs at a time: concurrent callers wait on the in-flight
/// fetch and then share its result. A failed fetch caches nothing, so the next
/// caller fetches again. Instances are created by the caller and passed where
/// they are needed; there is no global.
pub struct SingleFlightCache<T> {
    ttl: Duration,
    slot: Mutex<Option<Cached<T>>>,
}

struct Cached<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

impl<T> SingleFlightCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // Held across the fetch: this is what makes it single-flight.
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
        }
        *slot = None;

        let value = Arc::new(fetch().await?);
        *slot = Some(Cached {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = Arc::new(SingleFlightCache::<String>::new(Duration::from_secs(60)));
        let fetches = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let fetches = fetches.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(|| async {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, std::io::Error>("jwks".to_string())
                    })
                    .await
            }));
        }
        for handle in handles {
            let value = handle.await.expect("task").expect("fetch");
            assert_eq!(value.as_str(), "jwks");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let cache = SingleFlightCache::<u32>::new(Duration::from_secs(60));
        let failed = cache
            .get_or_fetch(|| async { Err::<u32, _>(std::io::Error::other("down")) })
            .await;
        assert!(failed.is_err());

        let value = cache
            .get_or_fetch(|| async { Ok::<_, std::io::Error>(7) })
            .await
            .expect("second fetch");
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let cache = SingleFlightCache::<u32>::new(Duration::from_millis(10));
        let first = cache
            .get_or_fetch(|| async { Ok::<_, std::io::Error>(1) })
            .await
            .expect("first");
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = cache
            .get_or_fetch(|| async { Ok::<_, std::io::Error>(2) })
            .await
            .expect("second");
        assert_eq!((*first, *second), (1, 2));

        cache.invalidate().await;
        let third = cache
            .get_or_fetch(|| async { Ok::<_, std::io::Error>(3) })
            .await
            .expect("third");
        assert_eq!(*third, 3);
    }
}
