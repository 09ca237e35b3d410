use anyhow::{Context, Result};
use std::{str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Register commands per guild while developing

    // Extraction
    pub ytdlp_path: String,
    pub rate_limit_delay_ms: u64,
    pub max_concurrent_extractions: usize,
    pub extraction_timeout_secs: u64,
    pub playlist_timeout_secs: u64,
    pub max_playlist_size: usize,

    // Cache
    pub cache_size: usize,
    pub cache_ttl_secs: u64,

    // Playback
    pub max_queue_size: usize,
    pub default_volume: f32,
    pub idle_leave_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            rate_limit_delay_ms: env_or("RATE_LIMIT_DELAY_MS", defaults.rate_limit_delay_ms)?,
            max_concurrent_extractions: env_or(
                "MAX_CONCURRENT_EXTRACTIONS",
                defaults.max_concurrent_extractions,
            )?,
            extraction_timeout_secs: env_or(
                "EXTRACTION_TIMEOUT_SECS",
                defaults.extraction_timeout_secs,
            )?,
            playlist_timeout_secs: env_or("PLAYLIST_TIMEOUT_SECS", defaults.playlist_timeout_secs)?,
            max_playlist_size: env_or("MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,

            cache_size: env_or("CACHE_SIZE", defaults.cache_size)?,
            cache_ttl_secs: env_or("CACHE_TTL_SECS", defaults.cache_ttl_secs)?,

            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            idle_leave_secs: env_or("IDLE_LEAVE_SECS", defaults.idle_leave_secs)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Catches the values that would make the playback core misbehave
    /// silently: a zero-sized semaphore never admits an extraction, a
    /// zero-capacity cache evicts everything it stores.
    pub fn validate(&self) -> Result<()> {
        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_concurrent_extractions == 0 {
            anyhow::bail!("Max concurrent extractions must be greater than 0");
        }

        if self.cache_size == 0 {
            anyhow::bail!("Cache size must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.extraction_timeout_secs == 0 || self.playlist_timeout_secs == 0 {
            anyhow::bail!("Extraction timeouts must be greater than 0");
        }

        Ok(())
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn playlist_timeout(&self) -> Duration {
        Duration::from_secs(self.playlist_timeout_secs)
    }

    pub fn idle_leave_grace(&self) -> Duration {
        Duration::from_secs(self.idle_leave_secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: guild {}\n  \
            Extraction: {} concurrent, {}ms gate, {}s/{}s timeouts, {} playlist cap\n  \
            Cache: {} entries, {}s TTL\n  \
            Playback: {} queue, {}% vol, {}s idle leave",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.max_concurrent_extractions,
            self.rate_limit_delay_ms,
            self.extraction_timeout_secs,
            self.playlist_timeout_secs,
            self.max_playlist_size,
            self.cache_size,
            self.cache_ttl_secs,
            self.max_queue_size,
            (self.default_volume * 100.0) as u32,
            self.idle_leave_secs,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            ytdlp_path: "yt-dlp".to_string(),
            rate_limit_delay_ms: 300,
            max_concurrent_extractions: 5,
            extraction_timeout_secs: 20,
            playlist_timeout_secs: 60,
            max_playlist_size: 1000,

            cache_size: 200,
            cache_ttl_secs: 300,

            max_queue_size: 1000,
            default_volume: 0.5,
            idle_leave_secs: 5,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, val)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit_delay(), Duration::from_millis(300));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.max_concurrent_extractions, 5);
        assert_eq!(config.idle_leave_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_semaphore() {
        let config = Config {
            max_concurrent_extractions: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_volume() {
        let config = Config {
            default_volume: 3.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_hides_token() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            ..Config::default()
        };
        assert!(!config.summary().contains("super-secret"));
    }

    #[test]
    fn test_env_or_parses_and_falls_back() {
        std::env::set_var("MEO_TEST_ENV_OR", " 42 ");
        assert_eq!(env_or::<u64>("MEO_TEST_ENV_OR", 7).unwrap(), 42);
        std::env::remove_var("MEO_TEST_ENV_OR");
        assert_eq!(env_or::<u64>("MEO_TEST_ENV_OR", 7).unwrap(), 7);

        std::env::set_var("MEO_TEST_ENV_OR_BAD", "nope");
        assert!(env_or::<u64>("MEO_TEST_ENV_OR_BAD", 7).is_err());
        std::env::remove_var("MEO_TEST_ENV_OR_BAD");
    }
}
