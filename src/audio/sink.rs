//! Voice output seam.
//!
//! The engine only talks to [`VoiceSink`] and [`TrackControl`]; the songbird
//! implementations live here together with the event handler that reports
//! the end of a track. Songbird runs that handler on its own driver tasks, so
//! the handler does nothing but push a [`TrackCompletion`] into a channel that
//! the engine drains on the tokio scheduler.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::GuildId;
use songbird::{
    input::HttpRequest,
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Sent once per finished (or failed) track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackCompletion {
    pub guild_id: GuildId,
    /// Generation of the track when it was started
    pub generation: u64,
    pub error: Option<String>,
}

/// Handed to the sink when a track starts.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    guild_id: GuildId,
    generation: u64,
    sender: flume::Sender<TrackCompletion>,
}

impl CompletionNotifier {
    pub fn new(guild_id: GuildId, generation: u64, sender: flume::Sender<TrackCompletion>) -> Self {
        Self {
            guild_id,
            generation,
            sender,
        }
    }

    pub fn notify(&self, error: Option<String>) {
        let completion = TrackCompletion {
            guild_id: self.guild_id,
            generation: self.generation,
            error,
        };
        if self.sender.send(completion).is_err() {
            warn!("⚠️ Canal de finalización cerrado para guild {}", self.guild_id);
        }
    }
}

/// Live controls of the track currently playing.
#[cfg_attr(test, mockall::automock)]
pub trait TrackControl: Send + Sync {
    fn set_volume(&self, volume: f32) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

/// A connected voice channel able to play one stream at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceSink: Send + Sync {
    /// Starts `stream_url` at `volume`. `notifier` fires when it ends.
    async fn play(
        &self,
        stream_url: &str,
        volume: f32,
        notifier: CompletionNotifier,
    ) -> Result<Arc<dyn TrackControl>>;

    async fn disconnect(&self) -> Result<()>;
}

struct SongbirdTrack(TrackHandle);

impl TrackControl for SongbirdTrack {
    fn set_volume(&self, volume: f32) -> Result<()> {
        Ok(self.0.set_volume(volume)?)
    }

    fn pause(&self) -> Result<()> {
        Ok(self.0.pause()?)
    }

    fn resume(&self) -> Result<()> {
        Ok(self.0.play()?)
    }

    fn stop(&self) -> Result<()> {
        Ok(self.0.stop()?)
    }
}

/// Songbird call of one guild.
pub struct SongbirdSink {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdSink {
    pub fn new(guild_id: GuildId, call: Arc<Mutex<Call>>, manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self {
            guild_id,
            call,
            manager,
            http,
        }
    }
}

#[async_trait]
impl VoiceSink for SongbirdSink {
    async fn play(
        &self,
        stream_url: &str,
        volume: f32,
        notifier: CompletionNotifier,
    ) -> Result<Arc<dyn TrackControl>> {
        let input = HttpRequest::new(self.http.clone(), stream_url.to_string());

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input.into())
        };
        handle.set_volume(volume)?;

        handle.add_event(
            Event::Track(TrackEvent::End),
            TrackEndNotifier {
                notifier: notifier.clone(),
            },
        )?;
        handle.add_event(Event::Track(TrackEvent::Error), TrackEndNotifier { notifier })?;

        Ok(Arc::new(SongbirdTrack(handle)))
    }

    async fn disconnect(&self) -> Result<()> {
        self.manager.remove(self.guild_id).await?;
        debug!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

/// Reports end and error events of a track to the engine.
struct TrackEndNotifier {
    notifier: CompletionNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{e:?}")),
                _ => None,
            }),
            _ => None,
        };

        self.notifier.notify(error);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn notifier_carries_its_generation() {
        let (tx, rx) = flume::unbounded();
        let notifier = CompletionNotifier::new(GuildId::new(7), 3, tx);
        notifier.notify(Some("boom".to_string()));

        assert_eq!(
            rx.try_recv().unwrap(),
            TrackCompletion {
                guild_id: GuildId::new(7),
                generation: 3,
                error: Some("boom".to_string()),
            }
        );
    }

    #[test]
    fn notifier_survives_a_closed_channel() {
        let (tx, rx) = flume::unbounded();
        drop(rx);
        CompletionNotifier::new(GuildId::new(7), 1, tx).notify(None);
    }
}
