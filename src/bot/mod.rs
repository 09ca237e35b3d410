//! # Bot Module
//!
//! Discord-facing layer of Meo Music.
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`]. It stays thin:
//! slash commands are parsed in [`handlers`] and forwarded to the guild's
//! player, as are presses on the control buttons. Voice state updates
//! feed the idle-leave supervisor, and player events are relayed back to
//! text channels by [`events`].

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{
        ChannelId, Context, EventHandler, Guild, GuildId, Interaction, Ready, UnavailableGuild,
        VoiceState,
    },
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{
    audio::{EndReason, IdleLeaveSupervisor, PlayerRegistry},
    config::Config,
    ui::buttons,
};

/// How often expired cache entries are swept
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);

pub struct MusicBot {
    config: Arc<Config>,
    pub player: Arc<PlayerRegistry>,
    pub idle: Arc<IdleLeaveSupervisor>,
    /// Last text channel a command came from, per guild
    pub announce: Arc<DashMap<GuildId, ChannelId>>,
    maintenance_started: AtomicBool,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        player: Arc<PlayerRegistry>,
        idle: Arc<IdleLeaveSupervisor>,
        announce: Arc<DashMap<GuildId, ChannelId>>,
    ) -> Self {
        Self {
            config,
            player,
            idle,
            announce,
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// Registers slash commands globally, or in the development guild
    /// when `GUILD_ID` is set.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Guild commands registered for: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }

    async fn recount_listeners(&self, guild_id: GuildId) {
        let humans = self.player.transport().human_listeners(guild_id).await;
        debug!("👥 {} listener(s) in guild {}", humans, guild_id);
        self.idle.on_membership_changed(guild_id, humans);
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Failed to register commands: {:?}", e);
        }

        // Ready fires again on reconnects
        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            tokio::spawn(maintenance_tasks(self.player.clone()));
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                    error!("Error handling command: {:?}", e);
                }
            }
            Interaction::Component(component) => {
                if let Err(e) = buttons::handle_music_component(&ctx, &component, self).await {
                    error!("Error handling button: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Feeds membership changes in the bot's channel to the idle-leave
    /// supervisor and ends the session when the bot itself is removed.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let bot_id = ctx.cache.current_user().id;

        if new.user_id == bot_id {
            if new.channel_id.is_none() {
                info!("🔌 Bot disconnected from voice in guild {}", guild_id);
                self.idle.forget(guild_id);
                if let Err(e) = self.player.stop(guild_id, EndReason::Disconnected).await {
                    warn!("Failed to clean up guild {}: {}", guild_id, e);
                }
            } else {
                // Joined or moved: the new channel may already be empty
                self.recount_listeners(guild_id).await;
            }
            return;
        }

        let Some(bot_channel) = self.player.transport().current_channel(guild_id).await else {
            return;
        };

        let before = old.as_ref().and_then(|o| o.channel_id);
        if new.channel_id == Some(bot_channel) || before == Some(bot_channel) {
            self.recount_listeners(guild_id).await;
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // Outages also arrive as guild deletes
        if incomplete.unavailable {
            return;
        }

        info!("🚪 Removed from guild {}", incomplete.id);
        self.idle.forget(incomplete.id);
        self.player.forget(incomplete.id);
        self.announce.remove(&incomplete.id);
    }
}

/// Periodic housekeeping: sweeps expired cache entries and logs load.
async fn maintenance_tasks(player: Arc<PlayerRegistry>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        interval.tick().await;

        let pool = player.pool();
        let removed = pool.cache().cleanup_expired();
        let metrics = pool.cache().metrics();

        info!(
            "🧹 Maintenance: {} expired entries removed, cache {}/{} ({:.0}% hits), {} players, {} extractions in flight",
            removed,
            pool.cache().len(),
            pool.cache().capacity(),
            metrics.hit_rate() * 100.0,
            player.active_guilds(),
            pool.in_flight(),
        );
    }
}
