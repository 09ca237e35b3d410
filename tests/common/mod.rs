#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use meo_music::{
    audio::{player::TrackEndNotifier, PlayerEvent, PlayerRegistry, VoiceTransport},
    error::PlaybackError,
    sources::{
        pool::PoolSettings, AudioQuality, ExtractionBackend, ExtractionPool, PlaylistLookup,
        PlaylistMetadata, TrackMetadata,
    },
};
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

pub const GUILD: GuildId = GuildId::new(42);
pub const VOICE_CHANNEL: ChannelId = ChannelId::new(7);

/// In-memory voice transport. Tracks never end on their own: tests call
/// [`FakeTransport::finish`] to simulate a natural end.
#[derive(Default)]
pub struct FakeTransport {
    connected: Mutex<HashSet<GuildId>>,
    playing: Mutex<HashMap<GuildId, (String, TrackEndNotifier)>>,
    played: Mutex<Vec<String>>,
    rejected: Mutex<HashSet<String>>,
    humans: Mutex<HashMap<GuildId, usize>>,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ends the guild's current track as if it played to completion.
    pub fn finish(&self, guild: GuildId) -> bool {
        match self.playing.lock().remove(&guild) {
            Some((_, notifier)) => {
                notifier.notify();
                true
            }
            None => false,
        }
    }

    /// Ends the guild's current track with a stream error.
    pub fn fail(&self, guild: GuildId, error: &str) -> bool {
        match self.playing.lock().remove(&guild) {
            Some((_, notifier)) => {
                notifier.notify_error(error);
                true
            }
            None => false,
        }
    }

    /// Stream URLs handed to `play`, in order.
    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn now_playing(&self, guild: GuildId) -> Option<String> {
        self.playing.lock().get(&guild).map(|(url, _)| url.clone())
    }

    pub fn reject(&self, audio_url: &str) {
        self.rejected.lock().insert(audio_url.to_string());
    }

    pub fn set_humans(&self, guild: GuildId, humans: usize) {
        self.humans.lock().insert(guild, humans);
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self, guild: GuildId) -> bool {
        self.connected.lock().contains(&guild)
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(&self, guild: GuildId, _channel: ChannelId) -> Result<(), PlaybackError> {
        self.connected.lock().insert(guild);
        Ok(())
    }

    async fn play(
        &self,
        guild: GuildId,
        audio_url: &str,
        on_end: TrackEndNotifier,
    ) -> Result<(), PlaybackError> {
        if !self.is_connected(guild) {
            return Err(PlaybackError::NotConnected);
        }
        if self.rejected.lock().contains(audio_url) {
            return Err(PlaybackError::Transport(format!("cannot open {}", audio_url)));
        }

        self.played.lock().push(audio_url.to_string());
        self.playing
            .lock()
            .insert(guild, (audio_url.to_string(), on_end));
        Ok(())
    }

    async fn pause(&self, guild: GuildId) -> Result<(), PlaybackError> {
        if self.playing.lock().contains_key(&guild) {
            Ok(())
        } else {
            Err(PlaybackError::NothingPlaying)
        }
    }

    async fn resume(&self, guild: GuildId) -> Result<(), PlaybackError> {
        self.pause(guild).await
    }

    async fn stop(&self, guild: GuildId) -> Result<(), PlaybackError> {
        if self.finish(guild) {
            Ok(())
        } else {
            Err(PlaybackError::NothingPlaying)
        }
    }

    async fn disconnect(&self, guild: GuildId) -> Result<(), PlaybackError> {
        self.connected.lock().remove(&guild);
        // Songbird fires the end event of a track torn down with the call
        self.finish(guild);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn current_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.is_connected(guild).then_some(VOICE_CHANNEL)
    }

    async fn human_listeners(&self, guild: GuildId) -> usize {
        self.humans.lock().get(&guild).copied().unwrap_or(0)
    }
}

/// Backend answering from a fixed table. Queries containing "broken"
/// fail, unknown queries resolve to nothing.
#[derive(Default)]
pub struct FakeBackend {
    tracks: HashMap<String, TrackMetadata>,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn with_tracks(names: &[&str]) -> Arc<Self> {
        let tracks = names
            .iter()
            .map(|name| (name.to_string(), track(name)))
            .collect();
        Arc::new(Self {
            tracks,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionBackend for FakeBackend {
    async fn extract(&self, query: &str) -> Result<Option<TrackMetadata>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query.contains("broken") {
            return Err(anyhow!("extractor exited with status 1"));
        }
        Ok(self.tracks.get(query).cloned())
    }

    async fn extract_playlist(&self, locator: &str, limit: usize) -> Result<Option<PlaylistLookup>> {
        // Watch links carrying `list=` are single videos
        if !locator.contains("/playlist") {
            return Ok(Some(PlaylistLookup::SingleItem));
        }
        let mut entries: Vec<_> = self.tracks.values().cloned().collect();
        entries.truncate(limit);
        Ok(Some(PlaylistLookup::Playlist(PlaylistMetadata {
            title: "Mix".to_string(),
            entries,
        })))
    }
}

/// Metadata for `name` with a stream at `https://cdn.test/<name>`.
pub fn track(name: &str) -> TrackMetadata {
    TrackMetadata {
        title: name.to_uppercase(),
        audio_url: Some(stream_url(name)),
        webpage_url: Some(format!("https://www.youtube.com/watch?v={}", name)),
        duration: Some(Duration::from_secs(180)),
        quality: AudioQuality {
            bitrate_kbps: Some(160.0),
            codec: Some("opus".to_string()),
            ext: Some("webm".to_string()),
        },
    }
}

pub fn stream_url(name: &str) -> String {
    format!("https://cdn.test/{}", name)
}

pub fn settings() -> PoolSettings {
    PoolSettings {
        rate_limit_delay: Duration::ZERO,
        max_concurrent: 5,
        extraction_timeout: Duration::from_secs(20),
        playlist_timeout: Duration::from_secs(60),
        max_playlist_size: 50,
        cache_size: 200,
        cache_ttl: Duration::from_secs(300),
    }
}

pub struct Harness {
    pub registry: Arc<PlayerRegistry>,
    pub transport: Arc<FakeTransport>,
    pub backend: Arc<FakeBackend>,
    pub events: mpsc::UnboundedReceiver<PlayerEvent>,
}

impl Harness {
    pub fn new(tracks: &[&str]) -> Self {
        let backend = FakeBackend::with_tracks(tracks);
        let transport = FakeTransport::new();
        let pool = Arc::new(ExtractionPool::new(backend.clone(), settings()));
        let (registry, events) = PlayerRegistry::new(pool, transport.clone(), 100);

        Self {
            registry,
            transport,
            backend,
            events,
        }
    }

    pub async fn connect(&self) {
        self.transport
            .connect(GUILD, VOICE_CHANNEL)
            .await
            .expect("fake connect never fails");
    }

    /// Events emitted so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
