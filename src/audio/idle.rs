use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::player::{EndReason, PlayerRegistry};

#[derive(Debug)]
struct IdleTimer {
    id: u64,
    token: CancellationToken,
}

/// Leaves voice channels that stay without human listeners.
///
/// Per guild the supervisor is either armed (no timer) or counting down.
/// An empty channel starts one cancellable countdown; anyone coming back
/// cancels it. At expiry the channel is checked again and the session is
/// ended with [`EndReason::IdleTimeout`] only if it is still empty.
pub struct IdleLeaveSupervisor {
    registry: Arc<PlayerRegistry>,
    grace: Duration,
    timers: DashMap<GuildId, IdleTimer>,
    persistent: DashSet<GuildId>,
    next_id: AtomicU64,
}

impl IdleLeaveSupervisor {
    pub fn new(registry: Arc<PlayerRegistry>, grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry,
            grace,
            timers: DashMap::new(),
            persistent: DashSet::new(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Reacts to a membership change in the bot's voice channel.
    pub fn on_membership_changed(self: &Arc<Self>, guild_id: GuildId, humans: usize) {
        if humans > 0 {
            if let Some((_, timer)) = self.timers.remove(&guild_id) {
                timer.token.cancel();
                info!("👥 Listener back in guild {}, auto-leave cancelled", guild_id);
            }
            return;
        }

        if self.persistent.contains(&guild_id) {
            debug!("Guild {} is persistent, not scheduling auto-leave", guild_id);
            return;
        }

        match self.timers.entry(guild_id) {
            Entry::Occupied(_) => {
                debug!("Auto-leave already counting down in guild {}", guild_id);
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let token = CancellationToken::new();
                slot.insert(IdleTimer {
                    id,
                    token: token.clone(),
                });

                info!(
                    "⏳ No listeners in guild {}, leaving in {}s",
                    guild_id,
                    self.grace.as_secs()
                );
                tokio::spawn(self.clone().countdown(guild_id, id, token));
            }
        }
    }

    /// Persistent sessions (joined explicitly) never auto-leave.
    pub fn set_persistent(&self, guild_id: GuildId, persistent: bool) {
        if persistent {
            self.persistent.insert(guild_id);
            self.cancel(guild_id);
        } else {
            self.persistent.remove(&guild_id);
        }
    }

    pub fn is_persistent(&self, guild_id: GuildId) -> bool {
        self.persistent.contains(&guild_id)
    }

    /// Drops all idle state for the guild.
    pub fn forget(&self, guild_id: GuildId) {
        self.cancel(guild_id);
        self.persistent.remove(&guild_id);
    }

    pub fn is_counting_down(&self, guild_id: GuildId) -> bool {
        self.timers.contains_key(&guild_id)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    fn cancel(&self, guild_id: GuildId) {
        if let Some((_, timer)) = self.timers.remove(&guild_id) {
            timer.token.cancel();
        }
    }

    async fn countdown(self: Arc<Self>, guild_id: GuildId, id: u64, token: CancellationToken) {
        let expired = tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.grace) => true,
        };

        if expired && !token.is_cancelled() {
            let humans = self.registry.transport().human_listeners(guild_id).await;

            if humans == 0 && !token.is_cancelled() {
                info!("🚪 Auto-leaving guild {}: no listeners", guild_id);
                if let Err(e) = self.registry.stop(guild_id, EndReason::IdleTimeout).await {
                    warn!("Auto-leave failed in guild {}: {}", guild_id, e);
                }
            } else {
                debug!("Auto-leave in guild {} called off at re-check", guild_id);
            }
        }

        // A newer timer may have replaced this one
        self.timers.remove_if(&guild_id, |_, timer| timer.id == id);
    }
}
