use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{fmt, sync::Arc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{
    queue::{GuildQueue, LoopMode, QueueSnapshot, TrackRequest},
    transport::VoiceTransport,
};
use crate::{error::PlaybackError, sources::ExtractionPool};

/// Tracks shown as "up next" in now-playing events
const UPCOMING_PREVIEW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
    /// Between tracks, inside advance
    Draining,
}

impl PlaybackState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

/// Why a playback session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    QueueEmpty,
    Stopped,
    IdleTimeout,
    /// The bot was removed from the voice channel
    Disconnected,
}

/// Notifications from guild players to the command layer
#[derive(Debug)]
pub enum PlayerEvent {
    NowPlaying {
        guild_id: GuildId,
        track: TrackRequest,
        upcoming: Vec<TrackRequest>,
    },
    TrackFailed {
        guild_id: GuildId,
        track: TrackRequest,
        error: PlaybackError,
    },
    SessionEnded {
        guild_id: GuildId,
        reason: EndReason,
    },
}

impl PlayerEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::NowPlaying { guild_id, .. }
            | Self::TrackFailed { guild_id, .. }
            | Self::SessionEnded { guild_id, .. } => *guild_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub added: usize,
    /// 1-based queue position of the first added track
    pub position: usize,
    /// Playback started because the player was idle
    pub started: bool,
}

type Reply<T> = oneshot::Sender<Result<T, PlaybackError>>;

pub(crate) enum PlayerCommand {
    Enqueue {
        tracks: Vec<TrackRequest>,
        reply: Reply<EnqueueOutcome>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Skip {
        reply: Reply<TrackRequest>,
    },
    Clear {
        reply: Reply<usize>,
    },
    Stop {
        reason: EndReason,
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<QueueSnapshot>,
    },
    SetLoop {
        /// `None` cycles to the next mode
        mode: Option<LoopMode>,
        reply: Reply<LoopMode>,
    },
    Shuffle {
        reply: Reply<bool>,
    },
    Remove {
        position: usize,
        reply: Reply<Option<TrackRequest>>,
    },
    TrackEnded {
        generation: u64,
        /// Set when the transport gave up on the stream
        error: Option<String>,
    },
    Shutdown,
}

/// Posts a track's completion back onto its guild's mailbox.
///
/// Tagged with the play generation it was issued for, so completions
/// that arrive after a stop or a second end event are ignored.
#[derive(Clone)]
pub struct TrackEndNotifier {
    generation: u64,
    mailbox: mpsc::UnboundedSender<PlayerCommand>,
}

impl TrackEndNotifier {
    /// The track finished or was stopped.
    pub fn notify(&self) {
        self.post(None);
    }

    /// The stream failed mid-playback.
    pub fn notify_error(&self, error: impl Into<String>) {
        self.post(Some(error.into()));
    }

    fn post(&self, error: Option<String>) {
        if self
            .mailbox
            .send(PlayerCommand::TrackEnded {
                generation: self.generation,
                error,
            })
            .is_err()
        {
            debug!("Track ended after its player shut down");
        }
    }
}

impl fmt::Debug for TrackEndNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackEndNotifier")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Cheap handle to one guild's player task
#[derive(Clone)]
pub struct PlayerHandle {
    guild_id: GuildId,
    mailbox: mpsc::UnboundedSender<PlayerCommand>,
}

impl PlayerHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> PlayerCommand,
    ) -> Result<T, PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(make(tx))
            .map_err(|_| PlaybackError::PlayerGone)?;
        rx.await.map_err(|_| PlaybackError::PlayerGone)?
    }

    /// Appends tracks and starts playback if the player is idle.
    pub async fn enqueue(&self, tracks: Vec<TrackRequest>) -> Result<EnqueueOutcome, PlaybackError> {
        self.request(|reply| PlayerCommand::Enqueue { tracks, reply })
            .await
    }

    pub async fn pause(&self) -> Result<(), PlaybackError> {
        self.request(|reply| PlayerCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), PlaybackError> {
        self.request(|reply| PlayerCommand::Resume { reply }).await
    }

    /// Stops the current track and returns it. The next track starts
    /// when the transport reports the stop.
    pub async fn skip(&self) -> Result<TrackRequest, PlaybackError> {
        self.request(|reply| PlayerCommand::Skip { reply }).await
    }

    pub async fn clear(&self) -> Result<usize, PlaybackError> {
        self.request(|reply| PlayerCommand::Clear { reply }).await
    }

    pub async fn stop(&self, reason: EndReason) -> Result<(), PlaybackError> {
        self.request(|reply| PlayerCommand::Stop { reason, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, PlaybackError> {
        self.request(|reply| PlayerCommand::Snapshot { reply }).await
    }

    pub async fn set_loop_mode(&self, mode: Option<LoopMode>) -> Result<LoopMode, PlaybackError> {
        self.request(|reply| PlayerCommand::SetLoop { mode, reply })
            .await
    }

    pub async fn shuffle(&self) -> Result<bool, PlaybackError> {
        self.request(|reply| PlayerCommand::Shuffle { reply }).await
    }

    pub async fn remove(&self, position: usize) -> Result<Option<TrackRequest>, PlaybackError> {
        self.request(|reply| PlayerCommand::Remove { position, reply })
            .await
    }

    fn shutdown(&self) {
        let _ = self.mailbox.send(PlayerCommand::Shutdown);
    }
}

/// Guild id to player task, created on first access.
pub struct PlayerRegistry {
    players: DashMap<GuildId, PlayerHandle>,
    pool: Arc<ExtractionPool>,
    transport: Arc<dyn VoiceTransport>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    max_queue_size: usize,
}

impl PlayerRegistry {
    pub fn new(
        pool: Arc<ExtractionPool>,
        transport: Arc<dyn VoiceTransport>,
        max_queue_size: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            players: DashMap::new(),
            pool,
            transport,
            events,
            max_queue_size,
        });
        (registry, rx)
    }

    /// Handle for the guild's player, spawning the task if needed.
    pub fn handle(&self, guild_id: GuildId) -> PlayerHandle {
        self.players
            .entry(guild_id)
            .or_insert_with(|| self.spawn_player(guild_id))
            .value()
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<PlayerHandle> {
        self.players.get(&guild_id).map(|h| h.value().clone())
    }

    pub fn active_guilds(&self) -> usize {
        self.players.len()
    }

    pub fn transport(&self) -> &Arc<dyn VoiceTransport> {
        &self.transport
    }

    pub fn pool(&self) -> &Arc<ExtractionPool> {
        &self.pool
    }

    /// Ends the guild's session. Without a player this only drops the
    /// voice connection.
    pub async fn stop(&self, guild_id: GuildId, reason: EndReason) -> Result<(), PlaybackError> {
        match self.get(guild_id) {
            Some(player) => player.stop(reason).await,
            None => self.transport.disconnect(guild_id).await,
        }
    }

    /// Drops the guild's player entirely, e.g. after the bot left it.
    pub fn forget(&self, guild_id: GuildId) {
        if let Some((_, player)) = self.players.remove(&guild_id) {
            player.shutdown();
            info!("🧹 Forgot player for guild {}", guild_id);
        }
    }

    fn spawn_player(&self, guild_id: GuildId) -> PlayerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = GuildPlayer {
            guild_id,
            queue: GuildQueue::new(self.max_queue_size),
            state: PlaybackState::Idle,
            generation: 0,
            skip_pending: false,
            pool: self.pool.clone(),
            transport: self.transport.clone(),
            events: self.events.clone(),
            mailbox: tx.downgrade(),
        };

        tokio::spawn(player.run(rx));
        debug!("Spawned player for guild {}", guild_id);

        PlayerHandle {
            guild_id,
            mailbox: tx,
        }
    }
}

/// Owns one guild's queue and playback state. Every mutation goes
/// through its mailbox, one command at a time.
struct GuildPlayer {
    guild_id: GuildId,
    queue: GuildQueue,
    state: PlaybackState,
    generation: u64,
    skip_pending: bool,
    pool: Arc<ExtractionPool>,
    transport: Arc<dyn VoiceTransport>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    mailbox: mpsc::WeakUnboundedSender<PlayerCommand>,
}

impl GuildPlayer {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PlayerCommand>) {
        while let Some(command) = rx.recv().await {
            if let PlayerCommand::Shutdown = command {
                break;
            }
            self.handle(command).await;
        }
        debug!("Player task for guild {} finished", self.guild_id);
    }

    async fn handle(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::Enqueue { tracks, reply } => {
                let _ = reply.send(self.enqueue(tracks).await);
            }
            PlayerCommand::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            PlayerCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            PlayerCommand::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            PlayerCommand::Clear { reply } => {
                let _ = reply.send(Ok(self.queue.clear()));
            }
            PlayerCommand::Stop { reason, reply } => {
                self.stop(reason).await;
                let _ = reply.send(Ok(()));
            }
            PlayerCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.queue.snapshot(self.state)));
            }
            PlayerCommand::SetLoop { mode, reply } => {
                let mode = mode.unwrap_or_else(|| self.queue.loop_mode().cycle());
                self.queue.set_loop_mode(mode);
                info!("🔁 Loop mode for guild {}: {:?}", self.guild_id, mode);
                let _ = reply.send(Ok(mode));
            }
            PlayerCommand::Shuffle { reply } => {
                let _ = reply.send(Ok(self.queue.shuffle()));
            }
            PlayerCommand::Remove { position, reply } => {
                let _ = reply.send(Ok(self.queue.remove(position)));
            }
            PlayerCommand::TrackEnded { generation, error } => {
                self.track_ended(generation, error).await
            }
            PlayerCommand::Shutdown => {}
        }
    }

    async fn enqueue(&mut self, tracks: Vec<TrackRequest>) -> Result<EnqueueOutcome, PlaybackError> {
        let (added, position) = self.queue.extend(tracks)?;

        let started = if self.state == PlaybackState::Idle {
            self.advance(false).await?
        } else {
            false
        };

        Ok(EnqueueOutcome {
            added,
            position,
            started,
        })
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        if self.state != PlaybackState::Playing {
            return Err(PlaybackError::NothingPlaying);
        }
        self.transport.pause(self.guild_id).await?;
        self.state = PlaybackState::Paused;
        info!("⏸️ Paused in guild {}", self.guild_id);
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), PlaybackError> {
        if self.state != PlaybackState::Paused {
            return Err(PlaybackError::NotPaused);
        }
        self.transport.resume(self.guild_id).await?;
        self.state = PlaybackState::Playing;
        info!("▶️ Resumed in guild {}", self.guild_id);
        Ok(())
    }

    async fn skip(&mut self) -> Result<TrackRequest, PlaybackError> {
        let current = match self.queue.current() {
            Some(track) if self.state.is_active() => track.clone(),
            _ => return Err(PlaybackError::NothingPlaying),
        };

        // The stop's completion callback does the advancing
        self.skip_pending = true;
        if let Err(e) = self.transport.stop(self.guild_id).await {
            self.skip_pending = false;
            return Err(e);
        }

        info!("⏭️ Skipped in guild {}: {}", self.guild_id, current.title);
        Ok(current)
    }

    async fn stop(&mut self, reason: EndReason) {
        self.queue.clear();
        self.queue.clear_current();
        self.skip_pending = false;
        // Invalidate the completion of whatever was playing
        self.generation += 1;
        self.state = PlaybackState::Idle;

        if let Err(e) = self.transport.stop(self.guild_id).await {
            debug!("Nothing to stop in guild {}: {}", self.guild_id, e);
        }
        if let Err(e) = self.transport.disconnect(self.guild_id).await {
            error!("Failed to disconnect guild {}: {}", self.guild_id, e);
        }

        info!("⏹️ Session ended in guild {}: {:?}", self.guild_id, reason);
        self.emit(PlayerEvent::SessionEnded {
            guild_id: self.guild_id,
            reason,
        });
    }

    async fn track_ended(&mut self, generation: u64, error: Option<String>) {
        if generation != self.generation || !self.state.is_active() {
            debug!(
                "Ignoring stale completion in guild {} (generation {}, current {})",
                self.guild_id, generation, self.generation
            );
            return;
        }

        let mut skipped = std::mem::take(&mut self.skip_pending);

        // A broken stream never goes back into the rotation
        if let Some(error) = error {
            if let Some(track) = self.queue.clear_current() {
                self.track_failed(track, PlaybackError::Transport(error));
            }
            skipped = true;
        }

        if let Err(e) = self.advance(skipped).await {
            warn!("⚠️ Could not continue playback in guild {}: {}", self.guild_id, e);
        }
    }

    /// Starts the next playable track, skipping entries that fail.
    ///
    /// Returns whether a track started. A transport error that is not
    /// about the track itself (e.g. no voice connection) puts the track
    /// back at the head and returns the error.
    async fn advance(&mut self, skipped: bool) -> Result<bool, PlaybackError> {
        self.state = PlaybackState::Draining;
        let mut retire_skipped = skipped;

        loop {
            let Some(mut track) = self.queue.take_next(std::mem::take(&mut retire_skipped)) else {
                self.state = PlaybackState::Idle;
                info!("📭 Queue finished in guild {}", self.guild_id);
                self.emit(PlayerEvent::SessionEnded {
                    guild_id: self.guild_id,
                    reason: EndReason::QueueEmpty,
                });
                return Ok(false);
            };

            let audio_url = match track.resolved.clone() {
                Some(url) => url,
                None => match self.pool.extract(&track.locator, self.guild_id).await {
                    Ok(meta) => {
                        track.apply_metadata(meta);
                        match track.resolved.clone() {
                            Some(url) => url,
                            None => {
                                let error = PlaybackError::NotFound(track.locator.clone());
                                self.track_failed(track, error);
                                continue;
                            }
                        }
                    }
                    Err(error) => {
                        self.track_failed(track, error);
                        continue;
                    }
                },
            };

            let Some(mailbox) = self.mailbox.upgrade() else {
                self.queue.requeue_front(track);
                self.state = PlaybackState::Idle;
                return Err(PlaybackError::PlayerGone);
            };

            self.generation += 1;
            let notifier = TrackEndNotifier {
                generation: self.generation,
                mailbox,
            };

            match self.transport.play(self.guild_id, &audio_url, notifier).await {
                Ok(()) => {
                    info!("🎵 Now playing in guild {}: {}", self.guild_id, track.title);
                    self.queue.set_current(track.clone());
                    self.state = PlaybackState::Playing;
                    self.emit(PlayerEvent::NowPlaying {
                        guild_id: self.guild_id,
                        track,
                        upcoming: self.queue.upcoming(UPCOMING_PREVIEW),
                    });
                    return Ok(true);
                }
                Err(error) if error.is_per_track() => self.track_failed(track, error),
                Err(error) => {
                    warn!("🔇 Cannot play in guild {}: {}", self.guild_id, error);
                    self.queue.requeue_front(track);
                    self.state = PlaybackState::Idle;
                    return Err(error);
                }
            }
        }
    }

    fn track_failed(&self, track: TrackRequest, error: PlaybackError) {
        warn!(
            "❌ Skipping track in guild {}: {} ({})",
            self.guild_id, track.title, error
        );
        self.emit(PlayerEvent::TrackFailed {
            guild_id: self.guild_id,
            track,
            error,
        });
    }

    fn emit(&self, event: PlayerEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for player events");
        }
    }
}
