use dashmap::DashMap;
use serenity::{
    builder::{CreateEmbed, CreateMessage},
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error};

use crate::{
    audio::{EndReason, PlayerEvent},
    ui::{buttons, embeds},
};

/// Posts player events to the last text channel used in each guild.
pub fn spawn_event_relay(
    http: Arc<Http>,
    announce: Arc<DashMap<GuildId, ChannelId>>,
    mut events: mpsc::UnboundedReceiver<PlayerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let guild_id = event.guild_id();

            let Some(embed) = render_event(&event) else {
                continue;
            };
            let Some(channel) = announce.get(&guild_id).map(|c| *c.value()) else {
                debug!("No announce channel for guild {}", guild_id);
                continue;
            };

            let mut message = CreateMessage::new().embed(embed);
            if matches!(event, PlayerEvent::NowPlaying { .. }) {
                message = message.components(buttons::create_player_controls(false));
            }

            if let Err(e) = channel.send_message(&http, message).await
            {
                error!("Failed to post player event in guild {}: {:?}", guild_id, e);
            }
        }
    })
}

/// Embed for an event, or `None` when it should stay silent.
///
/// Only a queue that ran dry gets a "finished" message; stops, idle
/// leaves and forced disconnects end quietly.
pub fn render_event(event: &PlayerEvent) -> Option<CreateEmbed> {
    match event {
        PlayerEvent::NowPlaying {
            track, upcoming, ..
        } => Some(embeds::create_now_playing_embed(track, upcoming)),
        PlayerEvent::TrackFailed { track, error, .. } => {
            Some(embeds::create_track_failed_embed(track, &error.to_string()))
        }
        PlayerEvent::SessionEnded {
            reason: EndReason::QueueEmpty,
            ..
        } => Some(embeds::create_queue_finished_embed()),
        PlayerEvent::SessionEnded { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ended(reason: EndReason) -> PlayerEvent {
        PlayerEvent::SessionEnded {
            guild_id: GuildId::new(1),
            reason,
        }
    }

    #[test]
    fn test_only_empty_queue_is_announced() {
        assert!(render_event(&ended(EndReason::QueueEmpty)).is_some());
        assert!(render_event(&ended(EndReason::IdleTimeout)).is_none());
        assert!(render_event(&ended(EndReason::Stopped)).is_none());
        assert!(render_event(&ended(EndReason::Disconnected)).is_none());
    }
}
