//! # Meo Music
//!
//! Discord music bot built around a per-guild playback core:
//!
//! - [`audio`]: guild queues, the playback supervisor, the voice
//!   transport and idle auto-leave
//! - [`sources`]: rate-limited, bounded, cached track extraction through
//!   yt-dlp
//! - [`cache`]: the TTL cache behind extraction
//! - [`bot`] and [`ui`]: slash commands and embeds

pub mod audio;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;
