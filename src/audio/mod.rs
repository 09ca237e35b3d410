//! # Audio Module
//!
//! Per-guild playback core.
//!
//! ## Architecture
//!
//! ### [`queue`] - Guild Queue
//! - Strict FIFO of pending tracks plus one now-playing slot
//! - Loop modes, shuffle and removal by position
//!
//! ### [`player`] - Playback Supervisor
//! - One task per guild owning its queue; every command and every
//!   "track finished" callback is a message on that task's mailbox
//! - Resolves tracks through the extraction pool and skips the ones that
//!   fail
//!
//! ### [`transport`] - Voice Transport
//! - Songbird-backed voice connection and track control
//!
//! ### [`idle`] - Idle-Leave Supervisor
//! - Disconnects after a grace period with no human listeners
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meo_music::audio::{player::PlayerRegistry, queue::TrackRequest};
//! use serenity::all::{GuildId, UserId};
//!
//! # async fn example(registry: std::sync::Arc<PlayerRegistry>) -> anyhow::Result<()> {
//! let player = registry.handle(GuildId::new(123456789));
//!
//! player
//!     .enqueue(vec![TrackRequest::new("lofi hip hop", UserId::new(1))])
//!     .await?;
//! player.pause().await?;
//! player.resume().await?;
//! player.skip().await?;
//! # Ok(())
//! # }
//! ```

pub mod idle;
pub mod player;
pub mod queue;
pub mod transport;

pub use idle::IdleLeaveSupervisor;
pub use player::{EndReason, PlaybackState, PlayerEvent, PlayerHandle, PlayerRegistry};
pub use queue::{GuildQueue, LoopMode, QueueSnapshot, TrackRequest};
pub use transport::{SongbirdTransport, VoiceTransport};
