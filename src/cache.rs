use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Description content by resource name, populated on first request
///
/// Each name gets its own single-flight cell: concurrent requests for the
/// same name share one fetch, while requests for other names proceed
/// independently. A failed fetch is cached as `None` and answered with
/// 404 until [`ContentCache::reset`].
#[derive(Default)]
pub(crate) struct ContentCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<Option<Vec<u8>>>>>>,
}

impl ContentCache {
    /// Look up `name`, running `fetch` at most once per name
    pub(crate) async fn get<F, Fut>(&self, name: &str, fetch: F) -> Option<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Vec<u8>>>,
    {
        let cell = {
            let mut entries = self.entries.lock().unwrap();
            entries.entry(name.to_string()).or_default().clone()
        };
        cell.get_or_init(fetch).await.clone()
    }

    /// Forget everything; the next request re-fetches
    pub(crate) fn reset(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fetches_once_per_name() {
        let cache = ContentCache::default();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let body = cache
                .get("description.xml", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Some(b"<xml/>".to_vec()) }
                })
                .await;
            assert_eq!(body.as_deref(), Some(&b"<xml/>"[..]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_cached_as_missing() {
        let cache = ContentCache::default();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let body = cache
                .get("missing.xml", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { None }
                })
                .await;
            assert!(body.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn names_are_independent() {
        let cache = ContentCache::default();
        let a = cache.get("a", || async { Some(b"a".to_vec()) }).await;
        let b = cache.get("b", || async { Some(b"b".to_vec()) }).await;
        assert_eq!(a.unwrap(), b"a");
        assert_eq!(b.unwrap(), b"b");
    }

    #[tokio::test]
    async fn reset_forgets() {
        let cache = ContentCache::default();
        let calls = AtomicUsize::new(0);

        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Some(b"x".to_vec()) }
        };
        cache.get("a", fetch).await;
        cache.reset();
        cache.get("a", fetch).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
