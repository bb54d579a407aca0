//! # Bot Module
//!
//! Discord adapter: registers the slash commands, joins voice channels and
//! forwards every command to the [`PlaybackEngine`].
//!
//! The bot holds no playback state of its own. When it is disconnected from
//! voice by someone else, the guild's player is torn down.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::audio::engine::PlaybackEngine;
use crate::audio::sink::SongbirdSink;
use crate::cache::VideoInfoCache;
use crate::config::Config;
use crate::quota::QuotaGovernor;

/// Serenity event handler of the bot.
pub struct MelodiaBot {
    config: Arc<Config>,
    pub engine: Arc<PlaybackEngine>,
    pub quota: Arc<QuotaGovernor>,
    pub cache: Arc<VideoInfoCache>,
    http: reqwest::Client,
    maintenance_started: AtomicBool,
}

impl MelodiaBot {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<PlaybackEngine>,
        quota: Arc<QuotaGovernor>,
        cache: Arc<VideoInfoCache>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            engine,
            quota,
            cache,
            http,
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// Registers slash commands, per guild when `GUILD_ID` is set (instant
    /// propagation) or globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos de guild. Verifica el permiso 'applications.commands'."
                    )
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Joins `channel_id` unless the guild already has a live voice sink.
    pub async fn join_voice_channel(&self, ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        let connected = manager.get(guild_id).is_some() && self.engine.player(guild_id).lock().await.has_sink();
        if connected {
            return Ok(());
        }

        let call = manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error al conectar al canal de voz: {:?}", e);
            anyhow::anyhow!("Error al conectar al canal de voz")
        })?;

        {
            let mut handler = call.lock().await;
            events::register_voice_events(&mut handler, guild_id);
        }

        let sink = SongbirdSink::new(guild_id, call, manager, self.http.clone());
        self.engine.connect(guild_id, Arc::new(sink)).await;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for MelodiaBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // ready fires again after every gateway resume
        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let cache = self.cache.clone();
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            maintenance_tasks(cache, interval).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        warn!("🔌 Bot desconectado de voz en guild {}", guild_id);
        self.engine.remove_player(guild_id, true).await;
    }
}

/// Tareas periódicas de mantenimiento
async fn maintenance_tasks(cache: Arc<VideoInfoCache>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        cache.cleanup_old_entries();
        info!("🧹 Tareas de mantenimiento completadas");
    }
}
