use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // APIs externas (opcionales: sin clave se usa el fallback local)
    pub youtube_api_key: String,
    pub groq_api_key: String,
    pub groq_model: String,

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub stream_url_ttl: Duration,
    pub preload_timeout: Duration,
    pub playlist_batch_size: usize,

    // Extracción
    pub extract_retries: u32,
    pub extract_base_delay: Duration,

    // Autoplay
    pub autoplay_enabled: bool,
    pub autoplay_queue_size: usize,
    pub autoplay_history_size: usize,

    // Crossfade
    pub crossfade_enabled: bool,
    pub crossfade_duration: Duration,
    pub crossfade_steps: u32,

    // Caché
    pub video_cache_size: usize,

    // Quota
    pub youtube_daily_limit: u64,
    pub youtube_minute_limit: u64,
    pub groq_daily_limit: u64,
    pub groq_minute_limit: u64,

    // Mantenimiento
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,

    // Paths
    pub data_dir: PathBuf,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().parse()?),
        _ => Ok(default),
    }
}

fn env_flag(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_lowercase().parse()?),
        _ => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(env_or(key, default)?))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // APIs
            youtube_api_key: std::env::var("YOUTUBE_API_KEY").unwrap_or_default(),
            groq_api_key: std::env::var("GROQ_API_KEY").unwrap_or_default(),
            groq_model: std::env::var("GROQ_MODEL").unwrap_or(defaults.groq_model),

            // Audio
            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            stream_url_ttl: env_secs("STREAM_URL_TTL", defaults.stream_url_ttl.as_secs())?,
            preload_timeout: env_secs("PRELOAD_TIMEOUT", defaults.preload_timeout.as_secs())?,
            playlist_batch_size: env_or("PLAYLIST_BATCH_SIZE", defaults.playlist_batch_size)?,

            extract_retries: env_or("EXTRACT_RETRIES", defaults.extract_retries)?,
            extract_base_delay: env_secs("EXTRACT_BASE_DELAY", defaults.extract_base_delay.as_secs())?,

            // Autoplay
            autoplay_enabled: env_flag("AUTOPLAY_ENABLED", defaults.autoplay_enabled)?,
            autoplay_queue_size: env_or("AUTOPLAY_QUEUE_SIZE", defaults.autoplay_queue_size)?,
            autoplay_history_size: env_or("AUTOPLAY_HISTORY_SIZE", defaults.autoplay_history_size)?,

            // Crossfade
            crossfade_enabled: env_flag("CROSSFADE_ENABLED", defaults.crossfade_enabled)?,
            crossfade_duration: env_secs("CROSSFADE_DURATION", defaults.crossfade_duration.as_secs())?,
            crossfade_steps: env_or("CROSSFADE_STEPS", defaults.crossfade_steps)?,

            video_cache_size: env_or("VIDEO_CACHE_SIZE", defaults.video_cache_size)?,

            youtube_daily_limit: env_or("YOUTUBE_DAILY_LIMIT", defaults.youtube_daily_limit)?,
            youtube_minute_limit: env_or("YOUTUBE_MINUTE_LIMIT", defaults.youtube_minute_limit)?,
            groq_daily_limit: env_or("GROQ_DAILY_LIMIT", defaults.groq_daily_limit)?,
            groq_minute_limit: env_or("GROQ_MINUTE_LIMIT", defaults.groq_minute_limit)?,

            idle_timeout: env_secs("IDLE_TIMEOUT", defaults.idle_timeout.as_secs())?,
            sweep_interval: env_secs("SWEEP_INTERVAL", defaults.sweep_interval.as_secs())?,

            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "data".to_string())
                .into(),
        };

        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 1.0
    /// - Queue, cache and history sizes must be greater than 0
    /// - Crossfade needs at least one step
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 1.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.video_cache_size == 0 {
            anyhow::bail!("Video cache size must be greater than 0");
        }

        if self.autoplay_history_size == 0 {
            anyhow::bail!("Autoplay history size must be greater than 0");
        }

        if self.autoplay_queue_size == 0 {
            anyhow::bail!("Autoplay queue size must be greater than 0");
        }

        if self.crossfade_steps == 0 {
            anyhow::bail!("Crossfade needs at least one step");
        }

        if self.playlist_batch_size == 0 {
            anyhow::bail!("Playlist batch size must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and API keys are reported only as present/absent.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            APIs: YouTube={}, Groq={} ({})\n  \
            Audio: {}% vol, {} queue, stream TTL {}\n  \
            Autoplay: {} ({} per fetch, {} history)\n  \
            Crossfade: {} ({}, {} steps)\n  \
            Cache: {} videos, idle sweep {} every {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            !self.youtube_api_key.is_empty(),
            !self.groq_api_key.is_empty(),
            self.groq_model,
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            humantime::format_duration(self.stream_url_ttl),
            self.autoplay_enabled,
            self.autoplay_queue_size,
            self.autoplay_history_size,
            self.crossfade_enabled,
            humantime::format_duration(self.crossfade_duration),
            self.crossfade_steps,
            self.video_cache_size,
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.sweep_interval),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            youtube_api_key: String::new(),
            groq_api_key: String::new(),
            groq_model: "llama-3.1-8b-instant".to_string(),

            default_volume: 0.5,
            max_queue_size: 100,
            stream_url_ttl: Duration::from_secs(5 * 3600), // YouTube expira en ~6h
            preload_timeout: Duration::from_secs(10),
            playlist_batch_size: 5,

            extract_retries: 3,
            extract_base_delay: Duration::from_secs(1),

            autoplay_enabled: false,
            autoplay_queue_size: 2,
            autoplay_history_size: 100,

            crossfade_enabled: true,
            crossfade_duration: Duration::from_secs(10),
            crossfade_steps: 50,

            video_cache_size: 100,

            // YouTube Data API v3 (free tier) y Groq (free tier)
            youtube_daily_limit: 10_000,
            youtube_minute_limit: 1_800_000,
            groq_daily_limit: 14_400,
            groq_minute_limit: 30,

            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(3600),

            data_dir: "data".into(),
        }
    }
}
