//! A rendered-output cache for callers of the parser.
//!
//! Parsing is a pure function of the topic identity, its content, and the
//! render-affecting configuration, so a rendered page can be shared by every
//! request with the same [`Fingerprint`]. The cache is bounded by the total
//! size of the cached output, and computes each fingerprint at most once at
//! a time: concurrent callers wait for the first one to publish its value.

use crate::config::Config;
use core::hash::{Hash, Hasher};
use schnellru::LruMap;
use std::{
    collections::{HashSet, hash_map::DefaultHasher},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

/// The identity of one rendered output.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Creates the fingerprint of `content` rendered as `topic` in
    /// `virtual_wiki` with `config`.
    pub fn new(config: &Config, virtual_wiki: &str, topic: &str, content: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        virtual_wiki.hash(&mut hasher);
        topic.hash(&mut hasher);
        content.hash(&mut hasher);
        config.hash_render_settings(&mut hasher);
        Self(hasher.finish())
    }
}

/// A limiter which bounds the cache by the total byte length of its values.
#[derive(Clone, Copy, Debug)]
struct ByMemoryUsage {
    /// Current memory usage.
    heap_size: usize,
    /// Maximum allowed usage.
    max_bytes: usize,
}

impl ByMemoryUsage {
    /// Creates a new memory usage limiter with a given limit in bytes.
    const fn new(max_bytes: usize) -> Self {
        Self {
            heap_size: 0,
            max_bytes,
        }
    }

    /// The number of bytes `value` accounts for.
    #[inline]
    fn size_of(value: &Arc<String>) -> usize {
        value.len() + size_of::<Fingerprint>()
    }
}

impl schnellru::Limiter<Fingerprint, Arc<String>> for ByMemoryUsage {
    type KeyToInsert<'a> = Fingerprint;
    type LinkType = u32;

    #[inline]
    fn is_over_the_limit(&self, _: usize) -> bool {
        self.heap_size > self.max_bytes
    }

    #[inline]
    fn on_insert(
        &mut self,
        _: usize,
        key: Self::KeyToInsert<'_>,
        value: Arc<String>,
    ) -> Option<(Fingerprint, Arc<String>)> {
        let new_size = Self::size_of(&value);
        (new_size <= self.max_bytes).then(|| {
            self.heap_size += new_size;
            (key, value)
        })
    }

    #[inline]
    fn on_replace(
        &mut self,
        _: usize,
        _: &mut Fingerprint,
        _: Fingerprint,
        old_value: &mut Arc<String>,
        new_value: &mut Arc<String>,
    ) -> bool {
        let new_size = Self::size_of(new_value);
        if new_size <= self.max_bytes {
            self.heap_size = self.heap_size - Self::size_of(old_value) + new_size;
            true
        } else {
            false
        }
    }

    #[inline]
    fn on_removed(&mut self, _: &mut Fingerprint, value: &mut Arc<String>) {
        self.heap_size -= Self::size_of(value);
    }

    #[inline]
    fn on_cleared(&mut self) {
        self.heap_size = 0;
    }

    // The limit covers the cached values only.
    #[inline]
    fn on_grow(&mut self, _: usize) -> bool {
        true
    }
}

/// A memory-bounded cache of rendered output.
pub struct RenderCache {
    /// The cached values.
    entries: Mutex<LruMap<Fingerprint, Arc<String>, ByMemoryUsage>>,
    /// Fingerprints which are being rendered right now.
    in_flight: Mutex<HashSet<Fingerprint>>,
    /// Signalled whenever a render finishes.
    published: Condvar,
}

impl core::fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RenderCache").finish_non_exhaustive()
    }
}

impl RenderCache {
    /// Creates a cache which holds at most `max_bytes` of rendered output.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(LruMap::new(ByMemoryUsage::new(max_bytes))),
            in_flight: <_>::default(),
            published: Condvar::new(),
        }
    }

    /// Returns the cached output for `fingerprint`.
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Arc<String>> {
        lock(&self.entries).get(&fingerprint).cloned()
    }

    /// Caches `html` as the output for `fingerprint`. Output which is larger
    /// than the whole cache is returned but not kept.
    pub fn insert(&self, fingerprint: Fingerprint, html: String) -> Arc<String> {
        let html = Arc::new(html);
        if !lock(&self.entries).insert(fingerprint, Arc::clone(&html)) {
            log::debug!("render cache: {fingerprint:?} is too large to cache");
        }
        html
    }

    /// Returns the number of cached outputs.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached output for `fingerprint`, calling `render` to
    /// produce it if it is missing.
    ///
    /// At most one `render` runs per fingerprint at a time. Other callers
    /// asking for the same fingerprint block until it finishes, then use its
    /// value. If it fails, the next waiter renders instead.
    pub fn get_or_render<E, F>(&self, fingerprint: Fingerprint, render: F) -> Result<Arc<String>, E>
    where
        F: FnOnce() -> Result<String, E>,
    {
        {
            let mut in_flight = lock(&self.in_flight);
            loop {
                if let Some(html) = self.get(fingerprint) {
                    return Ok(html);
                }
                if in_flight.insert(fingerprint) {
                    break;
                }
                log::trace!("render cache: waiting for {fingerprint:?}");
                in_flight = self
                    .published
                    .wait(in_flight)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        let _guard = InFlight {
            cache: self,
            fingerprint,
        };
        let html = render()?;
        Ok(self.insert(fingerprint, html))
    }
}

/// Clears the in-flight mark of a fingerprint and wakes every waiter, even
/// if the render failed or panicked.
struct InFlight<'a> {
    /// The cache.
    cache: &'a RenderCache,
    /// The fingerprint being rendered.
    fingerprint: Fingerprint,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(&self.cache.in_flight).remove(&self.fingerprint);
        self.cache.published.notify_all();
    }
}

/// Locks `mutex`, ignoring poisoning. Every critical section leaves the data
/// consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fingerprint_inputs() {
        let config = Config::default();
        let base = Fingerprint::new(&config, "en", "Topic", "text");
        assert_eq!(base, Fingerprint::new(&config, "en", "Topic", "text"));
        assert_ne!(base, Fingerprint::new(&config, "en", "Topic", "other"));
        assert_ne!(base, Fingerprint::new(&config, "fr", "Topic", "text"));

        let config = Config {
            allow_html: false,
            ..Config::default()
        };
        assert_ne!(
            base,
            Fingerprint::new(&config, "en", "Topic", "text"),
            "render settings should change the fingerprint"
        );
    }

    #[test]
    fn signature_patterns_change_fingerprint() {
        let base = Fingerprint::new(&Config::default(), "en", "Topic", "~~~~");
        let user = Config {
            signature_user_pattern: "[[{0}]]".into(),
            ..Config::default()
        };
        assert_ne!(
            base,
            Fingerprint::new(&user, "en", "Topic", "~~~~"),
            "the signature user pattern should change the fingerprint"
        );
        let date = Config {
            signature_date_pattern: "[year]".into(),
            ..Config::default()
        };
        assert_ne!(
            base,
            Fingerprint::new(&date, "en", "Topic", "~~~~"),
            "the signature date pattern should change the fingerprint"
        );
    }

    #[test]
    fn bounded_by_size() {
        let cache = RenderCache::new(64);
        let a = Fingerprint(1);
        let b = Fingerprint(2);
        cache.insert(a, "x".repeat(30));
        cache.insert(b, "y".repeat(30));
        assert_eq!(cache.len(), 1, "oldest entry should be evicted");
        assert!(cache.get(a).is_none());
        assert_eq!(cache.get(b).as_deref().map(String::len), Some(30));

        cache.insert(Fingerprint(3), "z".repeat(100));
        assert!(cache.get(Fingerprint(3)).is_none(), "oversized values are not kept");
    }

    #[test]
    fn single_flight() {
        let cache = Arc::new(RenderCache::new(1 << 20));
        let renders = Arc::new(AtomicUsize::new(0));
        let fingerprint = Fingerprint(7);

        let threads = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let renders = Arc::clone(&renders);
                std::thread::spawn(move || {
                    cache
                        .get_or_render(fingerprint, || {
                            renders.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok::<_, ()>(String::from("<p>hi</p>"))
                        })
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();

        for thread in threads {
            assert_eq!(*thread.join().unwrap(), "<p>hi</p>");
        }
        assert_eq!(renders.load(Ordering::SeqCst), 1, "only one render should run");
    }

    #[test]
    fn failed_render_is_retried() {
        let cache = RenderCache::new(1 << 10);
        let fingerprint = Fingerprint(9);
        assert_eq!(cache.get_or_render(fingerprint, || Err("boom")), Err("boom"));
        let html = cache
            .get_or_render(fingerprint, || Ok::<_, &str>(String::from("ok")))
            .unwrap();
        assert_eq!(*html, "ok");
    }
}
