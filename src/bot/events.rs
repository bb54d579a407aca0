use serenity::{async_trait, model::id::GuildId};
use songbird::{
    events::CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
};
use tracing::{info, warn};

/// Logs when the voice driver loses its connection.
pub struct DriverDisconnectHandler {
    pub guild_id: GuildId,
}

#[async_trait]
impl VoiceEventHandler for DriverDisconnectHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::DriverDisconnect(data) = ctx {
            warn!(
                "🔌 Driver de voz desconectado en guild {}: {:?} ({:?})",
                self.guild_id, data.kind, data.reason
            );
        }
        None
    }
}

/// Handler para reconexiones automáticas
pub struct ReconnectHandler {
    pub guild_id: GuildId,
}

#[async_trait]
impl VoiceEventHandler for ReconnectHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        info!("🔄 Reconectado al canal de voz en guild {}", self.guild_id);
        None
    }
}

/// Registers the connection handlers of a freshly joined call. Track events
/// are attached per track by the voice sink.
pub fn register_voice_events(call: &mut songbird::Call, guild_id: GuildId) {
    call.add_global_event(
        VoiceEvent::Core(CoreEvent::DriverDisconnect),
        DriverDisconnectHandler { guild_id },
    );
    call.add_global_event(
        VoiceEvent::Core(CoreEvent::DriverReconnect),
        ReconnectHandler { guild_id },
    );
}
