use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::player::{MusicPlayer, PlayerHandle};
use crate::config::Config;

/// One player per guild, created on first use.
pub struct PlayerRegistry {
    players: DashMap<GuildId, PlayerHandle>,
    config: Arc<Config>,
}

impl PlayerRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            players: DashMap::new(),
            config,
        }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> PlayerHandle {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🎛️ Nuevo player para guild {}", guild_id);
                Arc::new(tokio::sync::Mutex::new(MusicPlayer::new(guild_id, &self.config)))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<PlayerHandle> {
        self.players.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<PlayerHandle> {
        self.players.remove(&guild_id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Drops players that have been idle for `idle_for`, disconnecting
    /// their voice sink. Returns how many were removed.
    pub async fn sweep_idle(&self, idle_for: Duration) -> usize {
        let handles: Vec<(GuildId, PlayerHandle)> = self
            .players
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut removed = 0;
        for (guild_id, handle) in handles {
            let sink = {
                let mut player = handle.lock().await;
                if !player.is_idle_for(idle_for) {
                    continue;
                }
                player.cancel_background_tasks();
                player.track = None;
                player.sink.take()
            };

            self.players.remove_if(&guild_id, |_, current| Arc::ptr_eq(current, &handle));

            if let Some(sink) = sink {
                if let Err(e) = sink.disconnect().await {
                    debug!("Error al desconectar voice client: {}", e);
                }
            }
            info!("🧹 Player removido por inactividad: guild_id={}", guild_id);
            removed += 1;
        }

        if removed > 0 {
            info!("🧹 Limpieza completada: {} player(s) removido(s)", removed);
        }
        removed
    }

    /// Periodic idle sweep. The first sweep runs one `interval` after start.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, idle_for: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep_idle(idle_for).await;
                debug!("🧹 Players activos tras la limpieza: {}", self.len());
            }
        })
    }
}
