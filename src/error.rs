use std::time::Duration;
use thiserror::Error;

/// Errors produced by the playback core.
///
/// Extraction and transport failures for a single track never abort a
/// guild's queue: the playback supervisor reports them and moves on to
/// the next entry. The remaining variants are answers to commands that
/// cannot be applied in the guild's current state.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The extraction backend returned no data for the query.
    #[error("no results for `{0}`")]
    NotFound(String),

    /// The extraction call exceeded its deadline.
    #[error("extraction timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The extraction backend itself failed.
    #[error("extraction failed: {0}")]
    Extraction(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The voice transport refused to start or continue playback.
    #[error("voice transport error: {0}")]
    Transport(String),

    /// There is no voice connection for the guild.
    #[error("not connected to a voice channel")]
    NotConnected,

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("playback is not paused")]
    NotPaused,

    #[error("queue is full (max {0} tracks)")]
    QueueFull(usize),

    /// The guild's player task is gone (guild forgotten mid-request).
    #[error("player for this guild is no longer running")]
    PlayerGone,
}

impl PlaybackError {
    pub fn extraction(err: anyhow::Error) -> Self {
        Self::Extraction(err.into())
    }

    /// Whether the error only concerns one track, so the queue can
    /// continue with the next entry.
    pub fn is_per_track(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Timeout(_) | Self::Extraction(_) | Self::Transport(_)
        )
    }
}
