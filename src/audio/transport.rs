use async_trait::async_trait;
use dashmap::DashMap;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    error::JoinError,
    input::HttpRequest,
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use super::player::TrackEndNotifier;
use crate::error::PlaybackError;

/// Voice side of playback.
///
/// `play` replaces whatever the guild was playing and arranges for
/// `on_end` to fire once the new track finishes, errors out or is
/// stopped.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<(), PlaybackError>;

    async fn play(
        &self,
        guild: GuildId,
        audio_url: &str,
        on_end: TrackEndNotifier,
    ) -> Result<(), PlaybackError>;

    async fn pause(&self, guild: GuildId) -> Result<(), PlaybackError>;

    async fn resume(&self, guild: GuildId) -> Result<(), PlaybackError>;

    /// Stops the current track. Its end notifier still fires.
    async fn stop(&self, guild: GuildId) -> Result<(), PlaybackError>;

    async fn disconnect(&self, guild: GuildId) -> Result<(), PlaybackError>;

    async fn current_channel(&self, guild: GuildId) -> Option<ChannelId>;

    /// Non-bot members in the bot's voice channel
    async fn human_listeners(&self, guild: GuildId) -> usize;
}

/// [`VoiceTransport`] backed by songbird, streaming resolved URLs over
/// HTTP. Membership comes from the serenity cache, attached once the
/// client is built.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    volume: f32,
    tracks: DashMap<GuildId, TrackHandle>,
    cache: OnceLock<Arc<Cache>>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, volume: f32) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
            volume,
            tracks: DashMap::new(),
            cache: OnceLock::new(),
        }
    }

    pub fn attach_cache(&self, cache: Arc<Cache>) {
        if self.cache.set(cache).is_err() {
            warn!("Serenity cache was already attached to the voice transport");
        }
    }

    fn track(&self, guild: GuildId) -> Result<TrackHandle, PlaybackError> {
        self.tracks
            .get(&guild)
            .map(|t| t.value().clone())
            .ok_or(PlaybackError::NothingPlaying)
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<(), PlaybackError> {
        self.manager
            .join(guild, channel)
            .await
            .map_err(|e| PlaybackError::Transport(format!("failed to join voice: {}", e)))?;

        info!("🔊 Joined voice channel {} in guild {}", channel, guild);
        Ok(())
    }

    async fn play(
        &self,
        guild: GuildId,
        audio_url: &str,
        on_end: TrackEndNotifier,
    ) -> Result<(), PlaybackError> {
        let call = self.manager.get(guild).ok_or(PlaybackError::NotConnected)?;
        let mut handler = call.lock().await;

        if handler.current_channel().is_none() {
            return Err(PlaybackError::NotConnected);
        }

        let input = HttpRequest::new(self.http.clone(), audio_url.to_string());
        let handle = handler.play_only_input(input.into());

        if let Err(e) = handle.set_volume(self.volume) {
            debug!("Could not set volume: {}", e);
        }

        let end_handler = TrackEndHandler {
            guild,
            notifier: on_end,
        };
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(Event::Track(event), end_handler.clone())
                .map_err(|e| PlaybackError::Transport(format!("track event: {}", e)))?;
        }

        self.tracks.insert(guild, handle);
        Ok(())
    }

    async fn pause(&self, guild: GuildId) -> Result<(), PlaybackError> {
        self.track(guild)?
            .pause()
            .map_err(|e| PlaybackError::Transport(e.to_string()))
    }

    async fn resume(&self, guild: GuildId) -> Result<(), PlaybackError> {
        self.track(guild)?
            .play()
            .map_err(|e| PlaybackError::Transport(e.to_string()))
    }

    async fn stop(&self, guild: GuildId) -> Result<(), PlaybackError> {
        let (_, handle) = self
            .tracks
            .remove(&guild)
            .ok_or(PlaybackError::NothingPlaying)?;
        handle
            .stop()
            .map_err(|e| PlaybackError::Transport(e.to_string()))
    }

    async fn disconnect(&self, guild: GuildId) -> Result<(), PlaybackError> {
        if let Some((_, handle)) = self.tracks.remove(&guild) {
            let _ = handle.stop();
        }

        match self.manager.remove(guild).await {
            Ok(()) => {
                info!("👋 Left voice in guild {}", guild);
                Ok(())
            }
            Err(JoinError::NoCall) => Ok(()),
            Err(e) => Err(PlaybackError::Transport(format!("failed to leave voice: {}", e))),
        }
    }

    async fn current_channel(&self, guild: GuildId) -> Option<ChannelId> {
        let call = self.manager.get(guild)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::new(channel.0.get()))
    }

    async fn human_listeners(&self, guild: GuildId) -> usize {
        let Some(channel) = self.current_channel(guild).await else {
            return 0;
        };
        let Some(cache) = self.cache.get() else {
            return 0;
        };

        let bot_id = cache.current_user().id;
        let Some(guild) = cache.guild(guild) else {
            return 0;
        };

        guild
            .voice_states
            .values()
            .filter(|vs| vs.channel_id == Some(channel) && vs.user_id != bot_id)
            .filter(|vs| {
                let is_bot = match &vs.member {
                    Some(member) => member.user.bot,
                    None => cache.user(vs.user_id).map(|u| u.bot).unwrap_or(false),
                };
                !is_bot
            })
            .count()
    }
}

/// Forwards songbird's end/error events to the guild's player
#[derive(Clone)]
struct TrackEndHandler {
    guild: GuildId,
    notifier: TrackEndNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let failure = match ctx {
            EventContext::Track(tracks) => {
                tracks.iter().find_map(|(state, _)| match &state.playing {
                    PlayMode::Errored(e) => Some(e.to_string()),
                    _ => None,
                })
            }
            _ => None,
        };

        match failure {
            Some(error) => {
                warn!("❌ Track errored in guild {}: {}", self.guild, error);
                self.notifier.notify_error(error);
            }
            None => {
                debug!("Track ended in guild {}", self.guild);
                self.notifier.notify();
            }
        }
        None
    }
}
