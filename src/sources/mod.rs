pub mod pool;
pub mod rate_limiter;
pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use pool::{ExtractionPool, LoadCounters};
pub use rate_limiter::RateLimiter;
pub use ytdlp::YtDlpClient;

/// Upstream metadata extractor.
///
/// Implementations resolve a URL or free-text search into track metadata,
/// including a direct audio stream URL when one is available. `Ok(None)`
/// means the backend ran fine but found nothing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract(&self, query: &str) -> Result<Option<TrackMetadata>>;

    /// Flat listing of a playlist, at most `limit` entries. Entries usually
    /// lack `audio_url` and are resolved again at play time. A locator that
    /// turns out to name a single item yields [`PlaylistLookup::SingleItem`].
    async fn extract_playlist(&self, locator: &str, limit: usize)
        -> Result<Option<PlaylistLookup>>;
}

/// Audio format details reported by the extractor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioQuality {
    pub bitrate_kbps: Option<f64>,
    pub codec: Option<String>,
    pub ext: Option<String>,
}

impl AudioQuality {
    pub fn is_empty(&self) -> bool {
        self.bitrate_kbps.is_none() && self.codec.is_none() && self.ext.is_none()
    }
}

/// Result of resolving one track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    /// Direct stream URL handed to the voice transport
    pub audio_url: Option<String>,
    pub webpage_url: Option<String>,
    pub duration: Option<Duration>,
    pub quality: AudioQuality,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistMetadata {
    pub title: String,
    pub entries: Vec<TrackMetadata>,
}

/// What a playlist-looking locator resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistLookup {
    Playlist(PlaylistMetadata),
    /// e.g. a watch URL that merely carries a `list=` parameter
    SingleItem,
}

pub fn is_url(query: &str) -> bool {
    let query = query.trim();
    url::Url::parse(query)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Whether a query should be expanded as a playlist instead of a single
/// track.
pub fn is_playlist_locator(query: &str) -> bool {
    is_url(query) && (query.contains("list=") || query.contains("playlist"))
}
