use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::Command, application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registers every command globally (can take up to an hour to appear).
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    Command::set_global_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

/// Registers every command in one guild (development, instant).
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        pause_command(),
        resume_command(),
        skip_command(),
        queue_command(),
        nowplaying_command(),
        clear_command(),
        stop_command(),
        join_command(),
        loop_command(),
        shuffle_command(),
        remove_command(),
    ]
}

// Playback

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a song or playlist from a URL or search")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL, playlist URL or search text",
            )
            .required(true),
        )
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause the current track")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Resume the paused track")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip to the next track")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback, clear the queue and leave")
}

// Queue

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Show the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Page number")
                .min_int_value(1),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Show the current track")
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Remove every pending track")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop").description("Cycle loop mode: off, track, queue")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Shuffle the pending tracks")
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Remove a track from the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "position", "Queue position")
                .required(true)
                .min_int_value(1),
        )
}

// Connection

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Join your voice channel and stay until stopped")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_set() {
        let commands = all_commands();
        assert_eq!(commands.len(), 12);

        let json = serde_json::to_value(&commands).unwrap();
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|c| c["name"].as_str())
            .collect();
        for expected in ["play", "queue", "loop", "remove", "join"] {
            assert!(names.contains(&expected), "missing /{}", expected);
        }
    }
}
