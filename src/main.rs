use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info, warn};

mod ai;
mod audio;
mod autoplay;
mod bot;
mod cache;
mod config;
mod error;
mod quota;
mod sources;
mod ui;

use crate::ai::{AiClient, ChatBackend, GroqBackend};
use crate::audio::engine::PlaybackEngine;
use crate::audio::registry::PlayerRegistry;
use crate::audio::resolver::TrackResolver;
use crate::autoplay::AutoplayPipeline;
use crate::bot::MelodiaBot;
use crate::cache::VideoInfoCache;
use crate::config::Config;
use crate::quota::{QuotaGovernor, QuotaLimits};
use crate::sources::youtube_api::YouTubeApiClient;
use crate::sources::ytdlp::YtDlpExtractor;
use crate::sources::VideoSearch;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("melodia=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Melodia v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Config::load()?;
    config.validate()?;
    info!("{}", config.summary());
    let config = Arc::new(config);

    let quota = Arc::new(QuotaGovernor::open(&config.data_dir, QuotaLimits::from_config(&config)));
    let cache = Arc::new(VideoInfoCache::new(config.video_cache_size, config.stream_url_ttl));

    let extractor = YtDlpExtractor::default();
    match extractor.version().await {
        Ok(version) => info!("✅ yt-dlp {}", version),
        Err(e) => warn!("⚠️ yt-dlp no disponible: {:#}", e),
    }

    let search: Option<Arc<dyn VideoSearch>> = if config.youtube_api_key.is_empty() {
        None
    } else {
        Some(Arc::new(YouTubeApiClient::new(config.youtube_api_key.clone())?))
    };

    let backend: Option<Arc<dyn ChatBackend>> = if config.groq_api_key.is_empty() {
        info!("🤖 GROQ_API_KEY no configurada, autoplay usará búsquedas locales");
        None
    } else {
        Some(Arc::new(GroqBackend::new(
            config.groq_api_key.clone(),
            config.groq_model.clone(),
        )?))
    };
    let ai = Arc::new(AiClient::new(backend, quota.clone()));

    let resolver = Arc::new(TrackResolver::new(Arc::new(extractor), cache.clone(), &config));
    let pipeline = Arc::new(AutoplayPipeline::new(
        ai,
        search,
        quota.clone(),
        resolver.clone(),
        config.autoplay_queue_size,
    ));

    let registry = Arc::new(PlayerRegistry::new(config.clone()));
    let engine = Arc::new(PlaybackEngine::new(registry.clone(), resolver, pipeline, &config));

    tokio::spawn(engine.clone().run_completion_loop());
    registry.spawn_sweeper(config.sweep_interval, config.idle_timeout);

    // Guardar la quota antes de salir
    {
        let quota = quota.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Error al registrar Ctrl+C: {:?}", e);
                return;
            }
            info!("⚠️ Señal de shutdown recibida, guardando quota...");
            quota.force_save();
            std::process::exit(0);
        });
    }

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let http = reqwest::Client::builder()
        .user_agent(concat!("melodia/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let handler = MelodiaBot::new(config.clone(), engine, quota.clone(), cache, http);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    quota.force_save();
    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
