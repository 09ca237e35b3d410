use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{debug, info, warn};

use crate::{
    audio::{queue::TrackRequest, EndReason, PlaybackState},
    bot::MusicBot,
    error::PlaybackError,
    sources::{is_playlist_locator, ExtractionPool, PlaylistLookup},
    ui::{buttons, embeds},
};

/// Dispatches a slash command.
///
/// Playback errors become an ephemeral reply; anything else propagates.
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside a guild"))?;

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    bot.announce.insert(guild_id, command.channel_id);

    let result = match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "pause" => handle_pause(ctx, &command, bot, guild_id).await,
        "resume" => handle_resume(ctx, &command, bot, guild_id).await,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await,
        "clear" => handle_clear(ctx, &command, bot, guild_id).await,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await,
        "join" => handle_join(ctx, &command, bot, guild_id).await,
        "loop" => handle_loop(ctx, &command, bot, guild_id).await,
        "shuffle" => handle_shuffle(ctx, &command, bot, guild_id).await,
        "remove" => handle_remove(ctx, &command, bot, guild_id).await,
        _ => respond_ephemeral(ctx, &command, "❌ Unknown command").await,
    };

    match result {
        Err(e) => match e.downcast_ref::<PlaybackError>() {
            Some(playback) => {
                warn!("/{} failed in guild {}: {}", command.data.name, guild_id, playback);
                report_error(ctx, &command, &describe_error(playback)).await
            }
            None => {
                if let Err(reply) = report_error(ctx, &command, "Something went wrong").await {
                    warn!("Could not report failure of /{}: {:?}", command.data.name, reply);
                }
                Err(e)
            }
        },
        ok => ok,
    }
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = string_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Missing query"))?
        .trim()
        .to_string();

    // Extraction can take a while
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let Some(voice_channel) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return edit_embed(
            ctx,
            command,
            embeds::create_error_embed("Not in voice", "🎤 Join a voice channel first"),
        )
        .await;
    };

    let transport = bot.player.transport();
    if transport.current_channel(guild_id).await.is_none() {
        transport.connect(guild_id, voice_channel).await?;
    }

    let player = bot.player.handle(guild_id);

    let track = match resolve_query(bot.player.pool(), &query, guild_id, command.user.id).await? {
        ResolvedQuery::Playlist { title, tracks } => {
            let total = tracks.len();
            let outcome = player.enqueue(tracks).await?;
            info!(
                "📋 Playlist {} queued in guild {}: {}/{} tracks",
                title, guild_id, outcome.added, total
            );

            return edit_embed(
                ctx,
                command,
                embeds::create_playlist_added_embed(&title, outcome.added, total - outcome.added),
            )
            .await;
        }
        ResolvedQuery::Track(track) => track,
    };

    let outcome = player.enqueue(vec![track.clone()]).await?;

    if outcome.started {
        command
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new().content(format!("▶️ Starting **{}**", track.title)),
            )
            .await?;
        Ok(())
    } else {
        edit_embed(ctx, command, embeds::create_track_added_embed(&track, outcome.position)).await
    }
}

/// What a `/play` query turned into
#[derive(Debug)]
pub enum ResolvedQuery {
    Playlist {
        title: String,
        tracks: Vec<TrackRequest>,
    },
    Track(TrackRequest),
}

/// Resolves a `/play` query. Playlist-looking links that name a single
/// video fall back to a normal track lookup.
pub async fn resolve_query(
    pool: &ExtractionPool,
    query: &str,
    guild_id: GuildId,
    requester: UserId,
) -> Result<ResolvedQuery, PlaybackError> {
    if is_playlist_locator(query) {
        match pool.extract_playlist(query, guild_id).await? {
            PlaylistLookup::Playlist(playlist) => {
                let tracks = playlist
                    .entries
                    .into_iter()
                    .map(|meta| TrackRequest::from_metadata(meta, requester))
                    .collect();
                return Ok(ResolvedQuery::Playlist {
                    title: playlist.title,
                    tracks,
                });
            }
            PlaylistLookup::SingleItem => {
                debug!("Playlist link {} is a single video", query);
            }
        }
    }

    let meta = pool.extract(query, guild_id).await?;
    Ok(ResolvedQuery::Track(TrackRequest::from_metadata(meta, requester)))
}

async fn handle_pause(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.player.handle(guild_id).pause().await?;
    respond(ctx, command, "⏸️ Paused").await
}

async fn handle_resume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.player.handle(guild_id).resume().await?;
    respond(ctx, command, "▶️ Resumed").await
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let skipped = bot.player.handle(guild_id).skip().await?;
    respond(ctx, command, &format!("⏭️ Skipped **{}**", skipped.title)).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let page = int_option(command, "page").unwrap_or(1).max(1) as usize;
    let snapshot = bot.player.handle(guild_id).snapshot().await?;
    let paused = snapshot.state == PlaybackState::Paused;
    respond_with_controls(ctx, command, embeds::create_queue_embed(&snapshot, page), paused).await
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let snapshot = bot.player.handle(guild_id).snapshot().await?;

    match &snapshot.current {
        Some(current) => {
            let upcoming: Vec<_> = snapshot.items.iter().take(3).cloned().collect();
            let paused = snapshot.state == PlaybackState::Paused;
            let embed = embeds::create_now_playing_embed(current, &upcoming);
            respond_with_controls(ctx, command, embed, paused).await
        }
        None => respond_ephemeral(ctx, command, "❌ Nothing is playing right now").await,
    }
}

async fn handle_clear(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let removed = bot.player.handle(guild_id).clear().await?;
    respond(ctx, command, &format!("🗑️ Cleared {} track(s) from the queue", removed)).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.idle.forget(guild_id);
    bot.player.stop(guild_id, EndReason::Stopped).await?;
    respond(ctx, command, "⏹️ Stopped, cleared the queue and left").await
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(voice_channel) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond_ephemeral(ctx, command, "🎤 Join a voice channel first").await;
    };

    bot.player.transport().connect(guild_id, voice_channel).await?;
    bot.idle.set_persistent(guild_id, true);

    respond_embed(
        ctx,
        command,
        embeds::create_success_embed(
            "Joined",
            &format!("🔊 <#{}>, staying until `/stop`", voice_channel),
        ),
    )
    .await
}

async fn handle_loop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let mode = bot.player.handle(guild_id).set_loop_mode(None).await?;
    respond(
        ctx,
        command,
        &format!("{} {}", embeds::loop_icon(mode), embeds::loop_label(mode)),
    )
    .await
}

async fn handle_shuffle(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    if bot.player.handle(guild_id).shuffle().await? {
        respond(ctx, command, "🔀 Queue shuffled").await
    } else {
        respond_ephemeral(ctx, command, "❌ Need at least two queued tracks to shuffle").await
    }
}

async fn handle_remove(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let position = int_option(command, "position").unwrap_or(0).max(0) as usize;

    match bot.player.handle(guild_id).remove(position).await? {
        Some(track) => respond(ctx, command, &format!("❌ Removed **{}**", track.title)).await,
        None => respond_ephemeral(ctx, command, &format!("❌ No track at position {}", position)).await,
    }
}

/// User-facing text for a playback error
pub fn describe_error(error: &PlaybackError) -> String {
    match error {
        PlaybackError::NotFound(query) => format!("🔍 No results for **{}**", query),
        PlaybackError::Timeout(_) => "⏱️ The search took too long, please try again".to_string(),
        PlaybackError::Extraction(_) => "❌ Couldn't load that track".to_string(),
        PlaybackError::Transport(_) => "🔇 Voice connection problem, please try again".to_string(),
        PlaybackError::NotConnected => "🔇 I'm not in a voice channel".to_string(),
        PlaybackError::NothingPlaying => "❌ Nothing is playing right now".to_string(),
        PlaybackError::NotPaused => "❌ Playback isn't paused".to_string(),
        PlaybackError::QueueFull(max) => format!("📦 The queue is full ({} tracks max)", max),
        PlaybackError::PlayerGone => "❌ The player restarted, please try again".to_string(),
    }
}

// Helpers

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;
    Ok(())
}

async fn respond_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn respond_embed(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

async fn respond_with_controls(
    ctx: &Context,
    command: &CommandInteraction,
    embed: CreateEmbed,
    paused: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .components(buttons::create_player_controls(paused)),
            ),
        )
        .await?;
    Ok(())
}

async fn edit_embed(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

/// Replies with an error, editing the deferred response if there is one.
async fn report_error(ctx: &Context, command: &CommandInteraction, message: &str) -> Result<()> {
    if respond_ephemeral(ctx, command, message).await.is_err() {
        command
            .edit_response(&ctx.http, EditInteractionResponse::new().content(message))
            .await?;
    }
    Ok(())
}
