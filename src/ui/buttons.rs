use anyhow::Result;
use serenity::{
    all::{ButtonStyle, ComponentInteraction, Context},
    builder::{
        CreateActionRow, CreateButton, CreateInteractionResponse, CreateInteractionResponseMessage,
    },
    model::id::GuildId,
};
use tracing::{info, warn};

use crate::{
    audio::{EndReason, IdleLeaveSupervisor, PlaybackState, PlayerRegistry, QueueSnapshot},
    bot::{handlers::describe_error, MusicBot},
    error::PlaybackError,
    ui::embeds,
};

/// Custom ids of the player control buttons
pub mod button_ids {
    pub const PAUSE_RESUME: &str = "music_pause_resume";
    pub const SKIP: &str = "music_skip";
    pub const QUEUE: &str = "music_queue";
    pub const CLEAR: &str = "music_clear";
    pub const LEAVE: &str = "music_leave";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    PauseResume,
    Skip,
    Queue,
    Clear,
    Leave,
}

impl ControlAction {
    pub fn from_custom_id(id: &str) -> Option<Self> {
        match id {
            button_ids::PAUSE_RESUME => Some(Self::PauseResume),
            button_ids::SKIP => Some(Self::Skip),
            button_ids::QUEUE => Some(Self::Queue),
            button_ids::CLEAR => Some(Self::Clear),
            button_ids::LEAVE => Some(Self::Leave),
            _ => None,
        }
    }
}

/// Answer to a pressed button
#[derive(Debug)]
pub enum ControlReply {
    Text(String),
    Queue(QueueSnapshot),
}

/// Control row shown under now-playing and queue embeds.
pub fn create_player_controls(paused: bool) -> Vec<CreateActionRow> {
    let pause_resume = if paused {
        CreateButton::new(button_ids::PAUSE_RESUME)
            .label("▶️ Resume")
            .style(ButtonStyle::Success)
    } else {
        CreateButton::new(button_ids::PAUSE_RESUME)
            .label("⏸️ Pause")
            .style(ButtonStyle::Secondary)
    };

    vec![CreateActionRow::Buttons(vec![
        pause_resume,
        CreateButton::new(button_ids::SKIP)
            .label("⏭️ Skip")
            .style(ButtonStyle::Primary),
        CreateButton::new(button_ids::QUEUE)
            .label("📋 Queue")
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::CLEAR)
            .label("🗑️ Clear")
            .style(ButtonStyle::Danger),
        CreateButton::new(button_ids::LEAVE)
            .label("👋 Leave")
            .style(ButtonStyle::Danger),
    ])]
}

/// Runs a control against the guild's player.
pub async fn apply_control(
    action: ControlAction,
    registry: &PlayerRegistry,
    idle: &IdleLeaveSupervisor,
    guild_id: GuildId,
) -> Result<ControlReply, PlaybackError> {
    let text = match action {
        ControlAction::PauseResume => {
            let player = registry.handle(guild_id);
            if player.snapshot().await?.state == PlaybackState::Paused {
                player.resume().await?;
                "▶️ Resumed".to_string()
            } else {
                player.pause().await?;
                "⏸️ Paused".to_string()
            }
        }
        ControlAction::Skip => {
            let skipped = registry.handle(guild_id).skip().await?;
            format!("⏭️ Skipped **{}**", skipped.title)
        }
        ControlAction::Queue => {
            let snapshot = registry.handle(guild_id).snapshot().await?;
            return Ok(ControlReply::Queue(snapshot));
        }
        ControlAction::Clear => {
            let removed = registry.handle(guild_id).clear().await?;
            format!("🗑️ Cleared {} track(s) from the queue", removed)
        }
        ControlAction::Leave => {
            idle.forget(guild_id);
            registry.stop(guild_id, EndReason::Stopped).await?;
            "👋 Left the voice channel".to_string()
        }
    };

    Ok(ControlReply::Text(text))
}

/// Handles a press on one of the player control buttons.
pub async fn handle_music_component(
    ctx: &Context,
    interaction: &ComponentInteraction,
    bot: &MusicBot,
) -> Result<()> {
    let guild_id = interaction
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Button used outside a guild"))?;

    let Some(action) = ControlAction::from_custom_id(&interaction.data.custom_id) else {
        warn!("Unknown component id: {}", interaction.data.custom_id);
        return Ok(());
    };

    info!(
        "🎛️ {:?} pressed by {} in guild {}",
        action, interaction.user.name, guild_id
    );
    bot.announce.insert(guild_id, interaction.channel_id);

    let message = match apply_control(action, &bot.player, &bot.idle, guild_id).await {
        Ok(ControlReply::Text(text)) => CreateInteractionResponseMessage::new().content(text),
        Ok(ControlReply::Queue(snapshot)) => {
            CreateInteractionResponseMessage::new().embed(embeds::create_queue_embed(&snapshot, 1))
        }
        Err(e) => {
            warn!("{:?} failed in guild {}: {}", action, guild_id, e);
            CreateInteractionResponseMessage::new().content(describe_error(&e))
        }
    };

    interaction
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(message.ephemeral(true)),
        )
        .await?;
    Ok(())
}
