use anyhow::Result;
use dashmap::DashMap;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use meo_music::{
    audio::{IdleLeaveSupervisor, PlayerRegistry, SongbirdTransport},
    bot::{events::spawn_event_relay, MusicBot},
    config::Config,
    sources::{pool::PoolSettings, ExtractionPool, YtDlpClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("meo_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Meo Music v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());
    let config = Arc::new(config);

    // Extraction
    let ytdlp = Arc::new(YtDlpClient::new(config.ytdlp_path.clone()));
    if let Err(e) = ytdlp.verify().await {
        error!("❌ yt-dlp is not usable, tracks will fail to load: {:?}", e);
    }
    let pool = Arc::new(ExtractionPool::new(ytdlp, PoolSettings::from(&*config)));

    // Voice + playback
    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone(), config.default_volume));
    let (registry, player_events) =
        PlayerRegistry::new(pool, transport.clone(), config.max_queue_size);
    let idle = IdleLeaveSupervisor::new(registry.clone(), config.idle_leave_grace());

    let announce = Arc::new(DashMap::new());
    let handler = MusicBot::new(config.clone(), registry, idle, announce.clone());

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    transport.attach_cache(client.cache.clone());
    spawn_event_relay(client.http.clone(), announce, player_events);

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    YtDlpClient::new(config.ytdlp_path.clone()).verify().await?;
    println!("OK");
    Ok(())
}
