use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{ExtractionBackend, PlaylistLookup, RateLimiter, TrackMetadata};
use crate::{cache::TtlCache, config::Config, error::PlaybackError};

/// Tuning knobs for [`ExtractionPool`]
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub rate_limit_delay: Duration,
    pub max_concurrent: usize,
    pub extraction_timeout: Duration,
    pub playlist_timeout: Duration,
    pub max_playlist_size: usize,
    pub cache_size: usize,
    pub cache_ttl: Duration,
}

impl From<&Config> for PoolSettings {
    fn from(config: &Config) -> Self {
        Self {
            rate_limit_delay: config.rate_limit_delay(),
            max_concurrent: config.max_concurrent_extractions,
            extraction_timeout: config.extraction_timeout(),
            playlist_timeout: config.playlist_timeout(),
            max_playlist_size: config.max_playlist_size,
            cache_size: config.cache_size,
            cache_ttl: config.cache_ttl(),
        }
    }
}

/// Bounded-concurrency executor in front of the extraction backend.
///
/// Every backend call goes through the same path: per-guild load
/// accounting, the global rate limiter, one semaphore slot and a
/// deadline. Single-track results are memoized in a TTL cache; a cache
/// hit skips all of it.
pub struct ExtractionPool {
    backend: Arc<dyn ExtractionBackend>,
    limiter: RateLimiter,
    slots: Semaphore,
    max_concurrent: usize,
    cache: TtlCache<TrackMetadata>,
    load: LoadCounters,
    extraction_timeout: Duration,
    playlist_timeout: Duration,
    max_playlist_size: usize,
}

impl ExtractionPool {
    pub fn new(backend: Arc<dyn ExtractionBackend>, settings: PoolSettings) -> Self {
        Self {
            backend,
            limiter: RateLimiter::new(settings.rate_limit_delay),
            slots: Semaphore::new(settings.max_concurrent),
            max_concurrent: settings.max_concurrent,
            cache: TtlCache::new(settings.cache_size, settings.cache_ttl),
            load: LoadCounters::default(),
            extraction_timeout: settings.extraction_timeout,
            playlist_timeout: settings.playlist_timeout,
            max_playlist_size: settings.max_playlist_size,
        }
    }

    /// Resolves a URL or search text into playable metadata.
    pub async fn extract(
        &self,
        query: &str,
        guild: GuildId,
    ) -> Result<TrackMetadata, PlaybackError> {
        if let Some(hit) = self.cache.lookup(query) {
            debug!("🎯 Cache hit: {}", query);
            return Ok(hit);
        }

        let _load = self.load.track(guild);
        self.limiter.acquire().await;

        let result = {
            let _permit = self.slots.acquire().await.map_err(|_| {
                PlaybackError::extraction(anyhow::anyhow!("extraction pool is closed"))
            })?;
            tokio::time::timeout(self.extraction_timeout, self.backend.extract(query)).await
        };

        match result {
            Err(_) => {
                warn!("⏱️ Extraction timed out for {}: {}", guild, query);
                Err(PlaybackError::Timeout(self.extraction_timeout))
            }
            Ok(Err(e)) => {
                warn!("⚠️ Extraction failed for {}: {:?}", guild, e);
                Err(PlaybackError::extraction(e))
            }
            Ok(Ok(Some(track))) if track.audio_url.is_some() => {
                self.cache.store(query, track.clone());
                Ok(track)
            }
            Ok(Ok(_)) => Err(PlaybackError::NotFound(query.to_string())),
        }
    }

    /// Flat playlist listing, capped at the configured playlist size.
    ///
    /// A locator naming a single item comes back as
    /// [`PlaylistLookup::SingleItem`] so the caller can resolve it with
    /// [`extract`](Self::extract).
    pub async fn extract_playlist(
        &self,
        locator: &str,
        guild: GuildId,
    ) -> Result<PlaylistLookup, PlaybackError> {
        let _load = self.load.track(guild);
        self.limiter.acquire().await;

        let result = {
            let _permit = self.slots.acquire().await.map_err(|_| {
                PlaybackError::extraction(anyhow::anyhow!("extraction pool is closed"))
            })?;
            tokio::time::timeout(
                self.playlist_timeout,
                self.backend.extract_playlist(locator, self.max_playlist_size),
            )
            .await
        };

        match result {
            Err(_) => {
                warn!("⏱️ Playlist extraction timed out for {}: {}", guild, locator);
                Err(PlaybackError::Timeout(self.playlist_timeout))
            }
            Ok(Err(e)) => Err(PlaybackError::extraction(e)),
            Ok(Ok(Some(PlaylistLookup::Playlist(mut playlist))))
                if !playlist.entries.is_empty() =>
            {
                playlist.entries.truncate(self.max_playlist_size);
                Ok(PlaylistLookup::Playlist(playlist))
            }
            Ok(Ok(Some(PlaylistLookup::SingleItem))) => {
                debug!("Not a playlist, treating as a single track: {}", locator);
                Ok(PlaylistLookup::SingleItem)
            }
            Ok(Ok(_)) => Err(PlaybackError::NotFound(locator.to_string())),
        }
    }

    /// In-flight extractions for one guild
    pub fn load(&self, guild: GuildId) -> usize {
        self.load.get(guild)
    }

    pub fn load_counters(&self) -> &LoadCounters {
        &self.load
    }

    /// Semaphore slots currently held
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    pub fn cache(&self) -> &TtlCache<TrackMetadata> {
        &self.cache
    }
}

/// Per-guild count of in-flight extractions.
#[derive(Debug, Default, Clone)]
pub struct LoadCounters {
    inner: Arc<DashMap<GuildId, usize>>,
}

impl LoadCounters {
    /// Increments the guild's counter until the guard is dropped.
    pub fn track(&self, guild: GuildId) -> LoadGuard {
        *self.inner.entry(guild).or_insert(0) += 1;
        LoadGuard {
            counters: self.clone(),
            guild,
        }
    }

    pub fn get(&self, guild: GuildId) -> usize {
        self.inner.get(&guild).map(|c| *c).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.inner.iter().map(|c| *c.value()).sum()
    }
}

/// Decrements its guild's load counter on drop, whatever the exit path.
#[derive(Debug)]
pub struct LoadGuard {
    counters: LoadCounters,
    guild: GuildId,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.counters.inner.get_mut(&self.guild) {
            *count = count.saturating_sub(1);
        }
        self.counters.inner.remove_if(&self.guild, |_, count| *count == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{AudioQuality, MockExtractionBackend, PlaylistMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> PoolSettings {
        PoolSettings {
            rate_limit_delay: Duration::ZERO,
            max_concurrent: 5,
            extraction_timeout: Duration::from_secs(20),
            playlist_timeout: Duration::from_secs(60),
            max_playlist_size: 3,
            cache_size: 200,
            cache_ttl: Duration::from_secs(300),
        }
    }

    fn track(title: &str) -> TrackMetadata {
        TrackMetadata {
            title: title.to_string(),
            audio_url: Some(format!("https://cdn/{}", title)),
            webpage_url: Some(format!("https://yt/{}", title)),
            duration: Some(Duration::from_secs(180)),
            quality: AudioQuality::default(),
        }
    }

    const GUILD: GuildId = GuildId::new(1);

    /// Sleeps inside the call and records the highest concurrency seen.
    #[derive(Default)]
    struct SlowBackend {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ExtractionBackend for SlowBackend {
        async fn extract(&self, query: &str) -> anyhow::Result<Option<TrackMetadata>> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Some(track(query)))
        }

        async fn extract_playlist(
            &self,
            _locator: &str,
            _limit: usize,
        ) -> anyhow::Result<Option<PlaylistLookup>> {
            Ok(None)
        }
    }

    struct StallingBackend;

    #[async_trait]
    impl ExtractionBackend for StallingBackend {
        async fn extract(&self, _query: &str) -> anyhow::Result<Option<TrackMetadata>> {
            std::future::pending().await
        }

        async fn extract_playlist(
            &self,
            _locator: &str,
            _limit: usize,
        ) -> anyhow::Result<Option<PlaylistLookup>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_backend() {
        let mut backend = MockExtractionBackend::new();
        backend
            .expect_extract()
            .times(1)
            .returning(|_| Ok(Some(track("a"))));

        let pool = ExtractionPool::new(Arc::new(backend), settings());
        let first = pool.extract("song a", GUILD).await.unwrap();
        let second = pool.extract("  SONG   a ", GUILD).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(pool.cache().metrics().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry_calls_backend_again() {
        let mut backend = MockExtractionBackend::new();
        backend
            .expect_extract()
            .times(2)
            .returning(|_| Ok(Some(track("a"))));

        let pool = ExtractionPool::new(Arc::new(backend), settings());
        pool.extract("song a", GUILD).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        pool.extract("song a", GUILD).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_result_is_not_found() {
        let mut backend = MockExtractionBackend::new();
        backend.expect_extract().returning(|_| Ok(None));

        let pool = ExtractionPool::new(Arc::new(backend), settings());
        let err = pool.extract("nothing", GUILD).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NotFound(q) if q == "nothing"));
        assert_eq!(pool.load(GUILD), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_stream_is_not_found_and_not_cached() {
        let mut backend = MockExtractionBackend::new();
        backend.expect_extract().times(2).returning(|_| {
            Ok(Some(TrackMetadata {
                audio_url: None,
                ..track("x")
            }))
        });

        let pool = ExtractionPool::new(Arc::new(backend), settings());
        assert!(matches!(
            pool.extract("x", GUILD).await,
            Err(PlaybackError::NotFound(_))
        ));
        assert!(matches!(
            pool.extract("x", GUILD).await,
            Err(PlaybackError::NotFound(_))
        ));
        assert!(pool.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_releases_counter() {
        let mut backend = MockExtractionBackend::new();
        backend
            .expect_extract()
            .returning(|_| Err(anyhow::anyhow!("HTTP Error 403")));

        let pool = ExtractionPool::new(Arc::new(backend), settings());
        let err = pool.extract("q", GUILD).await.unwrap_err();

        assert!(matches!(err, PlaybackError::Extraction(_)));
        assert_eq!(pool.load(GUILD), 0);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_slot_and_counter() {
        let pool = ExtractionPool::new(Arc::new(StallingBackend), settings());
        let err = pool.extract("stuck", GUILD).await.unwrap_err();

        assert!(matches!(err, PlaybackError::Timeout(d) if d == Duration::from_secs(20)));
        assert_eq!(pool.load(GUILD), 0);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playlist_uses_longer_timeout() {
        let pool = ExtractionPool::new(Arc::new(StallingBackend), settings());
        let start = tokio::time::Instant::now();
        let err = pool
            .extract_playlist("https://yt/playlist?list=x", GUILD)
            .await
            .unwrap_err();

        assert!(matches!(err, PlaybackError::Timeout(d) if d == Duration::from_secs(60)));
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(pool.load(GUILD), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playlist_is_capped() {
        let mut backend = MockExtractionBackend::new();
        backend.expect_extract_playlist().returning(|_, _| {
            Ok(Some(PlaylistLookup::Playlist(PlaylistMetadata {
                title: "Big".into(),
                entries: (0..10).map(|i| track(&i.to_string())).collect(),
            })))
        });

        let pool = ExtractionPool::new(Arc::new(backend), settings());
        match pool.extract_playlist("https://yt/list", GUILD).await.unwrap() {
            PlaylistLookup::Playlist(playlist) => assert_eq!(playlist.entries.len(), 3),
            other => panic!("expected a playlist, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_item_passes_through() {
        let mut backend = MockExtractionBackend::new();
        backend
            .expect_extract_playlist()
            .returning(|_, _| Ok(Some(PlaylistLookup::SingleItem)));

        let pool = ExtractionPool::new(Arc::new(backend), settings());
        let lookup = pool
            .extract_playlist("https://yt/watch?v=x&list=RDx", GUILD)
            .await
            .unwrap();

        assert_eq!(lookup, PlaylistLookup::SingleItem);
        assert_eq!(pool.load(GUILD), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_playlist_is_not_found() {
        let mut backend = MockExtractionBackend::new();
        backend.expect_extract_playlist().returning(|_, _| {
            Ok(Some(PlaylistLookup::Playlist(PlaylistMetadata {
                title: "Empty".into(),
                entries: Vec::new(),
            })))
        });

        let pool = ExtractionPool::new(Arc::new(backend), settings());
        assert!(matches!(
            pool.extract_playlist("https://yt/list", GUILD).await,
            Err(PlaybackError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_never_exceeds_semaphore() {
        let backend = Arc::new(SlowBackend::default());
        let pool = Arc::new(ExtractionPool::new(backend.clone(), settings()));

        let mut handles = Vec::new();
        for i in 0..20u64 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.extract(&format!("burst {}", i), GuildId::new(1 + i % 3))
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert!(backend.peak.load(Ordering::SeqCst) <= 5);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.load_counters().total(), 0);
    }

    #[test]
    fn test_load_guard_decrements_on_drop() {
        let counters = LoadCounters::default();
        let a = counters.track(GUILD);
        let b = counters.track(GUILD);
        assert_eq!(counters.get(GUILD), 2);

        drop(a);
        assert_eq!(counters.get(GUILD), 1);
        drop(b);
        assert_eq!(counters.get(GUILD), 0);
        assert_eq!(counters.total(), 0);
    }
}
