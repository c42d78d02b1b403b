// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Client-side request cache keyed by query name.
//!
//! Each key holds at most one cached value and at most one in-flight fetch.
//! Readers of a fresh value never hit the network, concurrent readers of the
//! same key share a single fetch, and invalidation detaches whatever fetch is
//! running so that its result can no longer land in the cache. Marking a key
//! stale only forces the next read to refetch.

use std::{
    any::Any,
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt as _,
};
use log::{debug, trace};
use tokio::{sync::Mutex, time::Instant};

use crate::error::{self, Result};

pub(crate) mod keys {
    pub(crate) const SESSION: &str = "session";
    pub(crate) const ORG_ID: &str = "orgId";
    pub(crate) const REPOSITORIES: &str = "repositories";
    pub(crate) const GITHUB_AVAILABLE: &str = "github-available-repositories";
    pub(crate) const GITLAB_AVAILABLE: &str = "gitlab-available-repositories";
    pub(crate) const BITBUCKET_AVAILABLE: &str = "bitbucket-available-repositories";
}

type Value = Arc<dyn Any + Send + Sync>;
type Flight = Shared<BoxFuture<'static, Result<Value, Arc<error::Error>>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueryOptions {
    /// How long a stored value is served without asking the backend again.
    pub(crate) stale_time: Duration,
    /// How long an unused value is retained before eviction.
    pub(crate) gc_time: Duration,
}

impl QueryOptions {
    pub(crate) const fn new(stale_time: Duration, gc_time: Duration) -> Self {
        Self {
            stale_time,
            gc_time,
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::new(Duration::ZERO, Duration::from_secs(5 * 60))
    }
}

struct Entry {
    value: Value,
    updated_at: Instant,
    last_used: Instant,
    gc_time: Duration,
    /// Set when the value must be refetched regardless of its age.
    stale: bool,
}

#[derive(Default)]
struct Slot {
    entry: Option<Entry>,
    in_flight: Option<(u64, Flight)>,
}

impl Slot {
    fn is_collectable(&self, now: Instant) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.entry
            .as_ref()
            .map_or(true, |entry| now.duration_since(entry.last_used) >= entry.gc_time)
    }
}

#[derive(Clone, Default)]
pub(crate) struct QueryCache {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    tickets: Arc<AtomicU64>,
}

fn downcast<V: Send + Sync + 'static>(key: &str, value: Value) -> Result<Arc<V>> {
    value
        .downcast::<V>()
        .map_err(|_| error::Internal::CacheTypeMismatch(key.to_owned()).into())
}

impl QueryCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn collect_garbage(slots: &mut HashMap<String, Slot>, now: Instant) {
        slots.retain(|key, slot| {
            let keep = !slot.is_collectable(now);
            if !keep {
                trace!("Evicting unused query {}", key);
            }
            keep
        });
    }

    /// Returns the value for `key`, calling `fetcher` only when nothing fresh
    /// is cached and no other caller is already fetching it.
    pub(crate) async fn fetch<V, F, Fut>(
        &self,
        key: &str,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<Arc<V>>
    where
        V: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let flight = {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            Self::collect_garbage(&mut slots, now);

            let slot = slots.entry(key.to_owned()).or_default();
            if let Some(entry) = slot.entry.as_mut() {
                entry.last_used = now;
                entry.gc_time = options.gc_time;
                if !entry.stale && now.duration_since(entry.updated_at) < options.stale_time {
                    trace!("Query {} served from cache", key);
                    return downcast(key, Arc::clone(&entry.value));
                }
            }

            match &slot.in_flight {
                Some((_, flight)) => {
                    trace!("Query {} joined an in-flight fetch", key);
                    flight.clone()
                }
                None => {
                    debug!("Query {} is fetching", key);
                    let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
                    let flight = Self::start(
                        Arc::clone(&self.slots),
                        key.to_owned(),
                        ticket,
                        options,
                        fetcher(),
                    );
                    slot.in_flight = Some((ticket, flight.clone()));
                    flight
                }
            }
        };

        downcast(key, flight.await?)
    }

    fn start<V, Fut>(
        slots: Arc<Mutex<HashMap<String, Slot>>>,
        key: String,
        ticket: u64,
        options: QueryOptions,
        fut: Fut,
    ) -> Flight
    where
        V: Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        async move {
            let result = match fut.await {
                Ok(value) => {
                    let value: Value = Arc::new(value);
                    Ok(value)
                }
                Err(e) => Err(Arc::new(e)),
            };

            let mut slots = slots.lock().await;
            match slots.get_mut(&key) {
                Some(slot) if matches!(slot.in_flight, Some((t, _)) if t == ticket) => {
                    slot.in_flight = None;
                    if let Ok(value) = &result {
                        let now = Instant::now();
                        slot.entry = Some(Entry {
                            value: Arc::clone(value),
                            updated_at: now,
                            last_used: now,
                            gc_time: options.gc_time,
                            stale: false,
                        });
                    }
                }
                _ => debug!("Discarding superseded result for query {}", key),
            }

            result
        }
        .boxed()
        .shared()
    }

    /// Returns whatever is retained for `key`, fresh or not, without
    /// fetching.
    pub(crate) async fn peek<V: Send + Sync + 'static>(&self, key: &str) -> Result<Option<Arc<V>>> {
        let mut slots = self.slots.lock().await;
        Self::collect_garbage(&mut slots, Instant::now());
        match slots.get(key).and_then(|slot| slot.entry.as_ref()) {
            Some(entry) => downcast(key, Arc::clone(&entry.value)).map(Some),
            None => Ok(None),
        }
    }

    /// Stores a value directly. Any fetch already running for the key is
    /// detached so it cannot overwrite this newer value.
    pub(crate) async fn set<V: Send + Sync + 'static>(
        &self,
        key: &str,
        value: V,
        options: QueryOptions,
    ) {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        let slot = slots.entry(key.to_owned()).or_default();
        slot.in_flight = None;
        slot.entry = Some(Entry {
            value: Arc::new(value),
            updated_at: now,
            last_used: now,
            gc_time: options.gc_time,
            stale: false,
        });
    }

    /// Makes the next read of `key` go to the backend while keeping the
    /// stored value readable. A fetch that is already running is kept and
    /// joined, so no second request is sent for the key.
    pub(crate) async fn mark_stale(&self, key: &str) {
        if let Some(entry) = self
            .slots
            .lock()
            .await
            .get_mut(key)
            .and_then(|slot| slot.entry.as_mut())
        {
            entry.stale = true;
            trace!("Marked query {} stale", key);
        }
    }

    /// Drops the cached value and detaches any in-flight fetch, so the next
    /// read always goes to the backend.
    pub(crate) async fn invalidate(&self, key: &str) {
        let mut slots = self.slots.lock().await;
        if slots.remove(key).is_some() {
            debug!("Invalidated query {}", key);
        }
    }

    pub(crate) async fn clear(&self) {
        self.slots.lock().await.clear();
    }

    #[cfg(test)]
    pub(crate) async fn is_fetching(&self, key: &str) -> bool {
        self.slots
            .lock()
            .await
            .get(key)
            .map_or(false, |slot| slot.in_flight.is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::oneshot;

    use super::*;
    use crate::error::Error;

    const FRESH: QueryOptions = QueryOptions::new(Duration::from_secs(120), Duration::from_secs(300));

    fn counting(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32>> {
        let calls = Arc::clone(calls);
        move || {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_values_skip_the_fetcher() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(*cache.fetch("k", FRESH, counting(&calls, 1)).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(*cache.fetch("k", FRESH, counting(&calls, 2)).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(*cache.fetch("k", FRESH, counting(&calls, 3)).await.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unused_values_are_evicted_after_gc_time() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let _ = cache.fetch("k", FRESH, counting(&calls, 1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.peek::<u32>("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_fetch() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let first = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .fetch("k", FRESH, move || {
                        let _ = calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            let _ = gate.await;
                            Ok(7_u32)
                        }
                    })
                    .await
            })
        };
        while !cache.is_fetching("k").await {
            tokio::task::yield_now().await;
        }

        let second = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { cache.fetch("k", FRESH, counting(&calls, 99)).await })
        };
        tokio::task::yield_now().await;
        release.send(()).unwrap();

        assert_eq!(*first.await.unwrap().unwrap(), 7);
        assert_eq!(*second.await.unwrap().unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidation_detaches_in_flight_fetches() {
        let cache = QueryCache::new();
        let (release, gate) = oneshot::channel::<()>();

        let stale = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .fetch("k", FRESH, move || async move {
                        let _ = gate.await;
                        Ok(String::from("old"))
                    })
                    .await
            })
        };
        while !cache.is_fetching("k").await {
            tokio::task::yield_now().await;
        }

        cache.invalidate("k").await;
        let fresh = cache
            .fetch("k", FRESH, || async { Ok(String::from("new")) })
            .await
            .unwrap();
        assert_eq!(fresh.as_str(), "new");

        release.send(()).unwrap();
        assert_eq!(stale.await.unwrap().unwrap().as_str(), "old");
        assert_eq!(
            cache.peek::<String>("k").await.unwrap().as_deref().map(String::as_str),
            Some("new")
        );
    }

    #[tokio::test]
    async fn stale_marks_force_a_refetch_but_keep_the_value() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let _ = cache.fetch("k", FRESH, counting(&calls, 1)).await.unwrap();

        cache.mark_stale("k").await;
        assert_eq!(*cache.peek::<u32>("k").await.unwrap().unwrap(), 1);
        assert_eq!(*cache.fetch("k", FRESH, counting(&calls, 2)).await.unwrap(), 2);
        assert_eq!(*cache.fetch("k", FRESH, counting(&calls, 3)).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_marks_join_the_running_fetch() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let _ = cache.fetch("k", FRESH, counting(&calls, 1)).await.unwrap();
        cache.mark_stale("k").await;
        let (release, gate) = oneshot::channel::<()>();

        let running = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .fetch("k", FRESH, move || {
                        let _ = calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            let _ = gate.await;
                            Ok(2_u32)
                        }
                    })
                    .await
            })
        };
        while !cache.is_fetching("k").await {
            tokio::task::yield_now().await;
        }

        cache.mark_stale("k").await;
        let joined = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { cache.fetch("k", FRESH, counting(&calls, 99)).await })
        };
        tokio::task::yield_now().await;
        release.send(()).unwrap();

        assert_eq!(*running.await.unwrap().unwrap(), 2);
        assert_eq!(*joined.await.unwrap().unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = QueryCache::new();
        let err = cache
            .fetch::<u32, _, _>("k", FRESH, || async { Err(Error::MissingCredential) })
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::MissingCredential));
        assert!(cache.peek::<u32>("k").await.unwrap().is_none());

        let calls = Arc::new(AtomicUsize::new(0));
        assert_eq!(*cache.fetch("k", FRESH, counting(&calls, 4)).await.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn type_mismatches_are_reported() {
        let cache = QueryCache::new();
        cache.set("k", 1_u32, FRESH).await;
        let err = cache.peek::<String>("k").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Internal(error::Internal::CacheTypeMismatch(ref key)) if key == "k"
        ));
    }
}
