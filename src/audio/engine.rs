use serenity::model::id::GuildId;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::fade::{FadeHandle, FadePlan};
use super::player::{MusicPlayer, PlayerHandle, TrackReference};
use super::queue::{LoopMode, QueueSnapshot};
use super::registry::PlayerRegistry;
use super::resolver::{PlaylistResolution, TrackResolver};
use super::sink::{CompletionNotifier, TrackCompletion, TrackControl, VoiceSink};
use super::song::{Requester, Song};
use crate::autoplay::{AutoplayOutcome, AutoplayPipeline, FetchMode};
use crate::config::Config;
use crate::error::PlayerError;

/// Result of adding a single song.
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// Nothing was playing, the song started right away
    Playing(Song),
    Queued { song: Song, position: usize },
}

/// A track reserved under the player lock. The player already reports it
/// as current, so nothing can claim the idle player before it starts.
struct PlayStart {
    song: Song,
    generation: u64,
    guild_id: GuildId,
    sink: Arc<dyn VoiceSink>,
    previous: Option<Arc<dyn TrackControl>>,
}

enum NextStep {
    Play(PlayStart),
    Autoplay,
    Idle,
}

/// Drives playback for every guild.
///
/// Track completions arrive on a flume channel fed by the voice sink and are
/// matched against the player's generation, so a completion that belongs to
/// a replaced or stopped track is dropped.
pub struct PlaybackEngine {
    registry: Arc<PlayerRegistry>,
    resolver: Arc<TrackResolver>,
    autoplay: Arc<AutoplayPipeline>,
    completions: flume::Sender<TrackCompletion>,
    completion_rx: flume::Receiver<TrackCompletion>,
    preload_timeout: Duration,
}

impl PlaybackEngine {
    pub fn new(
        registry: Arc<PlayerRegistry>,
        resolver: Arc<TrackResolver>,
        autoplay: Arc<AutoplayPipeline>,
        config: &Config,
    ) -> Self {
        let (completions, completion_rx) = flume::unbounded();
        Self {
            registry,
            resolver,
            autoplay,
            completions,
            completion_rx,
            preload_timeout: config.preload_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<PlayerRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<TrackResolver> {
        &self.resolver
    }

    pub fn player(&self, guild_id: GuildId) -> PlayerHandle {
        self.registry.get_or_create(guild_id)
    }

    /// Receives completions until every sender is gone.
    pub async fn run_completion_loop(self: Arc<Self>) {
        let rx = self.completion_rx.clone();
        info!("🔁 Bucle de finalización de pistas iniciado");
        while let Ok(completion) = rx.recv_async().await {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.handle_track_end(completion).await;
            });
        }
    }

    /// Attaches the voice connection of a guild.
    pub async fn connect(&self, guild_id: GuildId, sink: Arc<dyn VoiceSink>) -> PlayerHandle {
        let handle = self.player(guild_id);
        {
            let mut player = handle.lock().await;
            player.set_sink(sink);
            player.touch();
        }
        info!("🔊 Conectado a voz en guild {}", guild_id);
        handle
    }

    /// Makes `song` current and reserves a new generation for it, replacing
    /// whatever was playing. Callers pop or check the queue under the same
    /// lock, then hand the reservation to [`Self::launch`].
    fn begin_play(player: &mut MusicPlayer, song: Song) -> Result<PlayStart, PlayerError> {
        let Some(sink) = player.sink() else {
            return Err(PlayerError::NotConnected);
        };
        if let Some(fade) = player.fade.take() {
            fade.cancel();
        }
        player.current = Some(song.clone());
        player.is_playing = true;
        player.is_paused = false;
        player.stopped_manually = false;
        player.skipping = false;
        player.generation += 1;
        player.touch();
        Ok(PlayStart {
            song,
            generation: player.generation,
            guild_id: player.guild_id,
            sink,
            previous: player.track.take(),
        })
    }

    /// Starts a reserved track. Gives up quietly if the reservation was
    /// replaced (stop, another play) while the lock was released.
    async fn launch(&self, handle: &PlayerHandle, start: PlayStart) -> Result<(), PlayerError> {
        let PlayStart {
            song,
            generation,
            guild_id,
            sink,
            previous,
        } = start;

        if let Some(previous) = previous {
            if let Err(e) = previous.stop() {
                debug!("Error al detener la pista anterior: {:#}", e);
            }
        }

        let song = if song.is_expired() {
            match self.resolver.renew(&song).await {
                Ok(renewed) => renewed,
                Err(e) => {
                    error!("❌ No se pudo renovar el stream de '{}': {}", song.title, e);
                    Self::abandon(handle, generation).await;
                    return Err(e.into());
                }
            }
        } else {
            song
        };

        let (volume, fade_plan) = {
            let player = handle.lock().await;
            if player.generation != generation {
                debug!("Reproducción de '{}' reemplazada antes de iniciar", song.title);
                return Ok(());
            }
            let plan = player.crossfade_enabled.then(|| {
                FadePlan::new(
                    player.volume,
                    player.crossfade_duration,
                    player.crossfade_steps,
                    song.duration,
                )
            });
            (player.volume, plan)
        };

        let start_volume = if fade_plan.is_some() { 0.0 } else { volume };
        let notifier = CompletionNotifier::new(guild_id, generation, self.completions.clone());
        let track = match sink.play(&song.stream_url, start_volume, notifier).await {
            Ok(track) => track,
            Err(e) => {
                error!("❌ Error al iniciar '{}': {:#}", song.title, e);
                Self::abandon(handle, generation).await;
                return Err(PlayerError::Sink(e));
            }
        };

        let proactive = {
            let mut player = handle.lock().await;
            if player.generation != generation {
                debug!("Pista '{}' reemplazada mientras iniciaba", song.title);
                if let Err(e) = track.stop() {
                    debug!("Error al detener pista reemplazada: {:#}", e);
                }
                return Ok(());
            }

            player.current = Some(song.clone());
            player.track = Some(track.clone());
            if let Some(plan) = fade_plan {
                player.fade = Some(FadeHandle::spawn(track, plan));
            }
            info!(
                "🎵 Reproduciendo: {} ({}) en guild {}",
                song.title,
                song.duration_display(),
                guild_id
            );

            if !player.queue.is_empty() {
                self.start_preload(handle, &mut player);
                None
            } else if player.autoplay.enabled && !player.autoplay.is_fetching() {
                TrackReference::from_song(&song)
            } else {
                None
            }
        };

        if let Some(reference) = proactive {
            info!(
                "🎵 Autoplay proactivo: cola vacía, buscando canciones basadas en '{}'",
                reference.title
            );
            let pipeline = self.autoplay.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                pipeline.fetch(&handle, FetchMode::Proactive(reference)).await;
            });
        }

        Ok(())
    }

    async fn abandon(handle: &PlayerHandle, generation: u64) {
        let mut player = handle.lock().await;
        if player.generation == generation {
            player.current = None;
            player.is_playing = false;
            player.track = None;
        }
    }

    /// Resolves the head of the queue in the background so the next track
    /// starts without waiting on extraction.
    fn start_preload(&self, handle: &PlayerHandle, player: &mut MusicPlayer) {
        if player.is_preloading() {
            return;
        }
        let Some(next) = player.queue.front().cloned() else {
            return;
        };
        if player.preloaded.as_ref().is_some_and(|s| s.url == next.url) {
            debug!("Siguiente canción ya precargada: {}", next.title);
            return;
        }

        info!("🚀 Precargando siguiente canción: {}", next.title);
        let resolver = self.resolver.clone();
        let handle = handle.clone();
        let timeout = self.preload_timeout;
        player.preload_task = Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, resolver.refresh(&next)).await {
                Ok(Ok(song)) => {
                    let mut player = handle.lock().await;
                    if player.queue.front().is_some_and(|head| head.url == song.url) {
                        info!("✅ Canción precargada: {}", song.title);
                        player.preloaded = Some(song);
                    }
                }
                Ok(Err(e)) => warn!("⚠️ Error al precargar '{}': {}", next.title, e),
                Err(_) => warn!(
                    "⏱️ Timeout al precargar '{}' (se cargará al reproducir)",
                    next.title
                ),
            }
        }));
    }

    /// Pops the queue head, preferring its preloaded copy.
    fn pop_next(player: &mut MusicPlayer) -> Option<Song> {
        let song = player.queue.pop_front()?;
        match player.preloaded.take() {
            Some(preloaded) if preloaded.url == song.url && !preloaded.is_expired() => {
                info!("⚡ Usando canción precargada: {}", preloaded.title);
                Some(preloaded)
            }
            _ => Some(song),
        }
    }

    /// Completion hand-off: records history, applies the loop mode and moves
    /// on to the next song or to autoplay.
    pub async fn handle_track_end(&self, completion: TrackCompletion) {
        let Some(handle) = self.registry.get(completion.guild_id) else {
            return;
        };

        let next = {
            let mut player = handle.lock().await;
            if player.generation != completion.generation || !player.is_playing {
                debug!(
                    "Finalización obsoleta ignorada en guild {} (gen {})",
                    completion.guild_id, completion.generation
                );
                return;
            }
            if let Some(err) = &completion.error {
                error!("❌ Error en la reproducción en guild {}: {}", completion.guild_id, err);
            }

            if let Some(fade) = player.fade.take() {
                fade.cancel();
            }
            player.is_playing = false;
            player.is_paused = false;
            player.track = None;
            player.touch();
            let finished = player.current.take();
            let skipping = std::mem::take(&mut player.skipping);

            if player.stopped_manually {
                player.stopped_manually = false;
                info!("⏹️ Reproducción detenida manualmente en guild {}", completion.guild_id);
                return;
            }

            let mut replay = None;
            if let Some(song) = finished {
                player.record_finished(&song);
                match player.loop_mode {
                    LoopMode::Single if !skipping => replay = Some(song),
                    LoopMode::Queue => {
                        if let Err(e) = player.queue.push(song) {
                            warn!("⚠️ No se pudo re-encolar la canción: {}", e);
                        }
                    }
                    _ => {}
                }
            }

            match replay.or_else(|| Self::pop_next(&mut player)) {
                Some(song) => match Self::begin_play(&mut player, song) {
                    Ok(start) => NextStep::Play(start),
                    Err(e) => {
                        error!("❌ No se pudo continuar en guild {}: {}", completion.guild_id, e);
                        NextStep::Idle
                    }
                },
                None if player.autoplay.enabled
                    && player.autoplay.last_played.is_some()
                    && !player.autoplay.is_fetching() =>
                {
                    NextStep::Autoplay
                }
                None => {
                    info!("📭 Cola vacía en guild {}", completion.guild_id);
                    NextStep::Idle
                }
            }
        };

        match next {
            NextStep::Play(start) => {
                if let Err(e) = self.launch(&handle, start).await {
                    error!(
                        "❌ Error al reproducir la siguiente canción en guild {}: {}",
                        completion.guild_id, e
                    );
                }
            }
            NextStep::Autoplay => self.reactive_autoplay(&handle).await,
            NextStep::Idle => {}
        }
    }

    async fn reactive_autoplay(&self, handle: &PlayerHandle) {
        info!("🎵 Autoplay: cola vacía, buscando canciones relacionadas...");
        match self.autoplay.fetch(handle, FetchMode::Reactive).await {
            AutoplayOutcome::Added(n) if n > 0 => {
                let start = {
                    let mut player = handle.lock().await;
                    if player.is_playing || player.current.is_some() || player.stopped_manually {
                        None
                    } else {
                        Self::pop_next(&mut player).map(|song| Self::begin_play(&mut player, song))
                    }
                };
                match start {
                    Some(Ok(start)) => {
                        info!("▶️ Autoplay: iniciando '{}'", start.song.title);
                        if let Err(e) = self.launch(handle, start).await {
                            error!("❌ Error al iniciar canción de autoplay: {}", e);
                        }
                    }
                    Some(Err(e)) => error!("❌ Error al iniciar canción de autoplay: {}", e),
                    None => {}
                }
            }
            outcome => debug!("Autoplay reactivo sin canciones: {:?}", outcome),
        }
    }

    /// Plays the song if the player is idle, otherwise queues it.
    pub async fn add(&self, guild_id: GuildId, song: Song) -> Result<AddOutcome, PlayerError> {
        let handle = self.player(guild_id);
        self.add_to(&handle, song).await
    }

    async fn add_to(&self, handle: &PlayerHandle, song: Song) -> Result<AddOutcome, PlayerError> {
        let start = {
            let mut player = handle.lock().await;
            if !player.has_sink() {
                return Err(PlayerError::NotConnected);
            }
            if player.is_playing || player.current.is_some() {
                let position = player.enqueue(song.clone())?;
                info!("➕ '{}' agregada a la cola (posición {})", song.title, position);
                if position == 1 {
                    self.start_preload(handle, &mut player);
                }
                return Ok(AddOutcome::Queued { song, position });
            }
            Self::begin_play(&mut player, song.clone())?
        };

        self.launch(handle, start).await?;
        Ok(AddOutcome::Playing(song))
    }

    /// Resolves a playlist and adds each song as soon as it is extracted.
    /// A full queue cancels the rest of the playlist.
    pub async fn add_playlist(
        self: &Arc<Self>,
        guild_id: GuildId,
        url: &str,
        requester: Option<Requester>,
    ) -> Result<PlaylistResolution, PlayerError> {
        let handle = self.player(guild_id);
        let cancel = {
            let player = handle.lock().await;
            if !player.has_sink() {
                return Err(PlayerError::NotConnected);
            }
            player.playlist_cancel.store(false, Ordering::SeqCst);
            player.playlist_cancel.clone()
        };

        let (tx, rx) = flume::unbounded::<Song>();
        let consumer = {
            let engine = self.clone();
            let handle = handle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut added = 0usize;
                while let Ok(song) = rx.recv_async().await {
                    match engine.add_to(&handle, song).await {
                        Ok(_) => added += 1,
                        Err(PlayerError::QueueFull { max }) => {
                            warn!("⚠️ Cola llena ({} canciones), deteniendo la playlist", max);
                            cancel.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(e) => warn!("⚠️ Canción de la playlist descartada: {}", e),
                    }
                }
                added
            })
        };

        let result = self
            .resolver
            .resolve_playlist(url, requester, cancel, |song| {
                if tx.send(song).is_err() {
                    debug!("Consumidor de playlist cerrado");
                }
            })
            .await;
        drop(tx);

        match consumer.await {
            Ok(added) => debug!("📋 {} canciones de la playlist entregadas al player", added),
            Err(e) => error!("❌ Error en el consumidor de la playlist: {}", e),
        }

        Ok(result?)
    }

    /// Skips the current song. The fade is wound down before the track stops
    /// and an unfinished preload is dropped; the next track preloads again.
    pub async fn skip(&self, guild_id: GuildId) -> Result<Song, PlayerError> {
        let handle = self.registry.get(guild_id).ok_or(PlayerError::NothingPlaying)?;
        let (fade, track, current) = {
            let mut player = handle.lock().await;
            let Some(current) = player.current.clone().filter(|_| player.is_playing) else {
                return Err(PlayerError::NothingPlaying);
            };
            player.skipping = true;
            if let Some(task) = player.preload_task.take() {
                task.abort();
            }
            if player.preloaded.as_ref().is_some_and(|s| s.url == current.url) {
                player.preloaded = None;
            }
            player.touch();
            (player.fade.take(), player.track.clone(), current)
        };

        if let Some(fade) = fade {
            fade.cancel_and_wait().await;
        }
        if let Some(track) = track {
            track.stop().map_err(PlayerError::Sink)?;
        }
        info!("⏭️ Canción saltada: {}", current.title);
        Ok(current)
    }

    /// Stops playback and empties the queue. Calling it twice is harmless.
    pub async fn stop(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let Some(handle) = self.registry.get(guild_id) else {
            return Ok(());
        };
        let track = {
            let mut player = handle.lock().await;
            player.stopped_manually = true;
            player.queue.clear();
            player.cancel_background_tasks();
            player.generation += 1;
            player.current = None;
            player.is_playing = false;
            player.is_paused = false;
            player.skipping = false;
            player.touch();
            player.track.take()
        };

        if let Some(track) = track {
            track.stop().map_err(PlayerError::Sink)?;
        }
        info!("⏹️ Reproducción detenida en guild {}", guild_id);
        Ok(())
    }

    /// Empties the queue and cancels background work; the current song keeps
    /// playing but the player will not advance when it ends.
    pub async fn clear_queue(&self, guild_id: GuildId) -> usize {
        let Some(handle) = self.registry.get(guild_id) else {
            return 0;
        };
        let (removed, fade, track, volume) = {
            let mut player = handle.lock().await;
            let removed = player.queue.clear();
            player.stopped_manually = true;
            let fade = player.fade.take();
            player.cancel_background_tasks();
            player.touch();
            (removed, fade, player.track.clone(), player.volume)
        };

        // a cancelled fade leaves the track silent
        if let Some(fade) = fade {
            fade.cancel_and_wait().await;
            if let Some(track) = track {
                if let Err(e) = track.set_volume(volume) {
                    debug!("Error al restaurar volumen: {:#}", e);
                }
            }
        }

        info!("🗑️ Cola limpiada en guild {}: {} canciones removidas", guild_id, removed);
        removed
    }

    /// Returns `true` when the player is now paused.
    pub async fn toggle_pause(&self, guild_id: GuildId) -> Result<bool, PlayerError> {
        let handle = self.registry.get(guild_id).ok_or(PlayerError::NothingPlaying)?;
        let mut player = handle.lock().await;
        let track = player.track.clone().ok_or(PlayerError::NothingPlaying)?;
        if player.is_paused {
            track.resume().map_err(PlayerError::Sink)?;
            player.is_paused = false;
            info!("▶️ Reproducción reanudada en guild {}", guild_id);
        } else {
            track.pause().map_err(PlayerError::Sink)?;
            player.is_paused = true;
            info!("⏸️ Reproducción pausada en guild {}", guild_id);
        }
        player.touch();
        Ok(player.is_paused)
    }

    /// Sets the volume (clamped to `0.0..=1.0`) and applies it live.
    pub async fn set_volume(&self, guild_id: GuildId, volume: f32) -> Result<f32, PlayerError> {
        let handle = self.player(guild_id);
        let mut player = handle.lock().await;
        let volume = volume.clamp(0.0, 1.0);
        player.volume = volume;
        if let Some(track) = player.track.clone() {
            track.set_volume(volume).map_err(PlayerError::Sink)?;
        }
        player.touch();
        info!("🔊 Volumen ajustado a {:.0}% en guild {}", volume * 100.0, guild_id);
        Ok(volume)
    }

    /// Shuffles the queue, returning how many songs it holds.
    pub async fn shuffle(&self, guild_id: GuildId) -> usize {
        let handle = self.player(guild_id);
        let mut player = handle.lock().await;
        player.queue.shuffle();
        player.preloaded = None;
        if let Some(task) = player.preload_task.take() {
            task.abort();
        }
        if player.is_playing {
            self.start_preload(&handle, &mut player);
        }
        info!("🔀 Cola mezclada en guild {}", guild_id);
        player.queue.len()
    }

    pub async fn set_loop_mode(&self, guild_id: GuildId, mode: LoopMode) {
        let handle = self.player(guild_id);
        handle.lock().await.set_loop_mode(mode);
    }

    /// Flips autoplay. Enabling it while a song plays over an empty queue
    /// starts a proactive fetch.
    pub async fn toggle_autoplay(&self, guild_id: GuildId) -> bool {
        let handle = self.player(guild_id);
        let (enabled, reference) = {
            let mut player = handle.lock().await;
            player.autoplay.enabled = !player.autoplay.enabled;
            let reference = if player.autoplay.enabled && player.is_playing && player.queue.is_empty() {
                player.current.as_ref().and_then(TrackReference::from_song)
            } else {
                None
            };
            (player.autoplay.enabled, reference)
        };
        info!(
            "🎵 Autoplay {} en guild {}",
            if enabled { "activado" } else { "desactivado" },
            guild_id
        );

        if let Some(reference) = reference {
            let pipeline = self.autoplay.clone();
            tokio::spawn(async move {
                pipeline.fetch(&handle, FetchMode::Proactive(reference)).await;
            });
        }
        enabled
    }

    /// Updates crossfade; `duration` of `None` keeps the current one.
    pub async fn set_crossfade(&self, guild_id: GuildId, enabled: bool, duration: Option<Duration>) -> Duration {
        let handle = self.player(guild_id);
        let mut player = handle.lock().await;
        player.crossfade_enabled = enabled;
        if let Some(duration) = duration {
            player.crossfade_duration = duration;
        }
        info!(
            "🎚️ Crossfade {} ({}) en guild {}",
            if enabled { "activado" } else { "desactivado" },
            humantime::format_duration(player.crossfade_duration),
            guild_id
        );
        player.crossfade_duration
    }

    /// Requests cancellation of a running playlist load.
    pub async fn cancel_playlist(&self, guild_id: GuildId) {
        let handle = self.player(guild_id);
        handle.lock().await.playlist_cancel.store(true, Ordering::SeqCst);
        info!("🚫 Cancelación de playlist solicitada en guild {}", guild_id);
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<Song> {
        let handle = self.registry.get(guild_id)?;
        let player = handle.lock().await;
        player.current.clone()
    }

    pub async fn queue_snapshot(&self, guild_id: GuildId) -> QueueSnapshot {
        let handle = self.player(guild_id);
        let player = handle.lock().await;
        player.snapshot()
    }

    /// Tears the player down. With `disconnect` the voice connection is left
    /// too; otherwise it is assumed to be gone already.
    pub async fn remove_player(&self, guild_id: GuildId, disconnect: bool) {
        let Some(handle) = self.registry.remove(guild_id) else {
            return;
        };
        let (track, sink) = {
            let mut player = handle.lock().await;
            player.cancel_background_tasks();
            player.queue.clear();
            player.generation += 1;
            player.current = None;
            player.is_playing = false;
            (player.track.take(), player.sink.take())
        };

        if let Some(track) = track {
            if let Err(e) = track.stop() {
                debug!("Error al detener la pista: {:#}", e);
            }
        }
        if disconnect {
            if let Some(sink) = sink {
                if let Err(e) = sink.disconnect().await {
                    warn!("⚠️ Error al desconectar de voz: {:#}", e);
                }
            }
        }
        info!("👋 Player de guild {} eliminado", guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::{MockTrackControl, MockVoiceSink, TrackControl};
    use crate::audio::song::tests::song;
    use crate::autoplay::tests::{fixture, result, Fixture};
    use crate::quota::QuotaLimits;
    use crate::sources::MockVideoSearch;
    use chrono::Utc;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn guild() -> GuildId {
        GuildId::new(7)
    }

    #[derive(Default)]
    struct Recorded {
        urls: Vec<String>,
        volumes: Vec<f32>,
        /// Volume changes applied to live tracks
        live: Vec<f32>,
    }

    fn quiet_track(recorded: Arc<Mutex<Recorded>>) -> Arc<dyn TrackControl> {
        let mut track = MockTrackControl::new();
        track.expect_set_volume().returning(move |volume| {
            recorded.lock().live.push(volume);
            Ok(())
        });
        track.expect_pause().returning(|| Ok(()));
        track.expect_resume().returning(|| Ok(()));
        track.expect_stop().returning(|| Ok(()));
        Arc::new(track)
    }

    fn recording_sink(recorded: Arc<Mutex<Recorded>>) -> Arc<dyn VoiceSink> {
        let mut sink = MockVoiceSink::new();
        sink.expect_play().returning(move |url, volume, _| {
            {
                let mut recorded = recorded.lock();
                recorded.urls.push(url.to_string());
                recorded.volumes.push(volume);
            }
            Ok(quiet_track(recorded.clone()))
        });
        sink.expect_disconnect().returning(|| Ok(()));
        Arc::new(sink)
    }

    async fn engine_with(fx: &Fixture) -> (Arc<PlaybackEngine>, Arc<Mutex<Recorded>>) {
        let registry = Arc::new(PlayerRegistry::new(fx.config.clone()));
        let engine = Arc::new(PlaybackEngine::new(
            registry,
            fx.resolver.clone(),
            fx.pipeline.clone(),
            &fx.config,
        ));
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let handle = engine.connect(guild(), recording_sink(recorded.clone())).await;
        handle.lock().await.autoplay.enabled = false;
        (engine, recorded)
    }

    async fn finish_current(engine: &PlaybackEngine) {
        let generation = engine.player(guild()).lock().await.generation;
        engine
            .handle_track_end(TrackCompletion {
                guild_id: guild(),
                generation,
                error: None,
            })
            .await;
    }

    fn stream(id: &str) -> String {
        format!("https://stream.example/{id}")
    }

    /// Waits for a running preload so tests can set the slot themselves.
    async fn settle_preload(engine: &PlaybackEngine) {
        let task = engine.player(guild()).lock().await.preload_task.take();
        if let Some(task) = task {
            task.await.unwrap();
        }
    }

    fn preloaded_copy(id: &str, title: &str, stream_url: &str) -> Song {
        let mut copy = song(id, title);
        copy.stream_url = stream_url.to_string();
        copy
    }

    #[tokio::test]
    async fn first_song_plays_and_the_rest_queue() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;

        let first = engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        assert!(matches!(first, AddOutcome::Playing(_)));
        let second = engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();
        assert!(matches!(second, AddOutcome::Queued { position: 1, .. }));

        assert_eq!(recorded.lock().urls, vec![stream("aaaaaaaaaaa")]);
        let handle = engine.player(guild());
        let player = handle.lock().await;
        assert!(player.is_playing);
        assert_eq!(player.current.as_ref().map(|s| s.title.as_str()), Some("A"));
    }

    #[tokio::test]
    async fn track_end_advances_in_order() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        for (id, title) in [("aaaaaaaaaaa", "A"), ("bbbbbbbbbbb", "B"), ("ccccccccccc", "C")] {
            engine.add(guild(), song(id, title)).await.unwrap();
        }

        finish_current(&engine).await;
        finish_current(&engine).await;

        assert_eq!(
            recorded.lock().urls,
            vec![stream("aaaaaaaaaaa"), stream("bbbbbbbbbbb"), stream("ccccccccccc")]
        );
        let handle = engine.player(guild());
        let player = handle.lock().await;
        assert_eq!(player.autoplay.history_len(), 2);
        assert!(player.queue.is_empty());
    }

    #[tokio::test]
    async fn stale_completion_is_ignored() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();

        let generation = engine.player(guild()).lock().await.generation;
        engine
            .handle_track_end(TrackCompletion {
                guild_id: guild(),
                generation: generation - 1,
                error: None,
            })
            .await;

        assert_eq!(recorded.lock().urls.len(), 1);
        assert_eq!(engine.player(guild()).lock().await.queue.len(), 1);
    }

    #[tokio::test]
    async fn single_loop_replays_until_skipped() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.set_loop_mode(guild(), LoopMode::Single).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();

        finish_current(&engine).await;
        engine.skip(guild()).await.unwrap();
        finish_current(&engine).await;

        assert_eq!(
            recorded.lock().urls,
            vec![stream("aaaaaaaaaaa"), stream("aaaaaaaaaaa"), stream("bbbbbbbbbbb")]
        );
    }

    #[tokio::test]
    async fn queue_loop_appends_finished_song() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, _) = engine_with(&fx).await;
        engine.set_loop_mode(guild(), LoopMode::Queue).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();

        finish_current(&engine).await;

        let handle = engine.player(guild());
        let player = handle.lock().await;
        assert_eq!(player.current.as_ref().map(|s| s.title.as_str()), Some("B"));
        let queued: Vec<&str> = player.queue.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(queued, vec!["A"]);
    }

    #[tokio::test]
    async fn clear_queue_is_idempotent() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();

        assert_eq!(engine.clear_queue(guild()).await, 1);
        assert_eq!(engine.clear_queue(guild()).await, 0);
        {
            let handle = engine.player(guild());
            let player = handle.lock().await;
            assert!(player.queue.is_empty());
            assert!(player.preloaded.is_none());
            assert!(player.stopped_manually);
            assert!(player.playlist_cancel.load(Ordering::SeqCst));
        }

        // the current song ends without advancing
        finish_current(&engine).await;
        assert_eq!(recorded.lock().urls.len(), 1);
        let handle = engine.player(guild());
        let player = handle.lock().await;
        assert!(!player.stopped_manually);
        assert!(player.current.is_none());
        assert_eq!(player.autoplay.history_len(), 0);
    }

    #[tokio::test]
    async fn stop_discards_pending_completion() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();
        let generation = engine.player(guild()).lock().await.generation;

        engine.stop(guild()).await.unwrap();
        engine
            .handle_track_end(TrackCompletion {
                guild_id: guild(),
                generation,
                error: None,
            })
            .await;

        assert_eq!(recorded.lock().urls.len(), 1);
        let handle = engine.player(guild());
        let player = handle.lock().await;
        assert!(!player.is_playing);
        assert!(player.queue.is_empty());
    }

    #[tokio::test]
    async fn full_queue_rejects_songs() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, _) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "current")).await.unwrap();
        let max = fx.config.max_queue_size;
        for i in 0..max {
            engine.add(guild(), song(&format!("{i:011}"), "queued")).await.unwrap();
        }

        let err = engine.add(guild(), song("zzzzzzzzzzz", "over")).await.unwrap_err();
        assert!(matches!(err, PlayerError::QueueFull { max: m } if m == max));
    }

    #[tokio::test]
    async fn adding_without_voice_fails() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let registry = Arc::new(PlayerRegistry::new(fx.config.clone()));
        let engine = PlaybackEngine::new(registry, fx.resolver.clone(), fx.pipeline.clone(), &fx.config);

        let err = engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap_err();
        assert!(matches!(err, PlayerError::NotConnected));
    }

    #[tokio::test]
    async fn expired_stream_is_renewed_before_playing() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        let mut stale = song("aaaaaaaaaaa", "A");
        stale.stream_url = "https://old.example/a".to_string();
        stale.stream_expires_at = Utc::now() - chrono::Duration::minutes(1);

        engine.add(guild(), stale).await.unwrap();

        assert_eq!(recorded.lock().urls, vec![stream("aaaaaaaaaaa")]);
        let current = engine.now_playing(guild()).await.unwrap();
        assert!(!current.is_expired());
    }

    #[tokio::test]
    async fn crossfade_starts_silent() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.set_crossfade(guild(), true, Some(Duration::from_millis(50))).await;

        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();

        assert_eq!(recorded.lock().volumes, vec![0.0]);
        assert!(engine.player(guild()).lock().await.fade.is_some());
        engine.stop(guild()).await.unwrap();
    }

    #[tokio::test]
    async fn add_racing_a_track_end_queues_behind_the_next_song() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();
        let handle = engine.player(guild());
        let generation = handle.lock().await.generation;

        // both tasks wait on the player lock, track end first
        let guard = handle.lock().await;
        let ending = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .handle_track_end(TrackCompletion {
                        guild_id: guild(),
                        generation,
                        error: None,
                    })
                    .await
            }
        });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        let adding = tokio::spawn({
            let engine = engine.clone();
            async move { engine.add(guild(), song("ccccccccccc", "C")).await }
        });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        drop(guard);

        ending.await.unwrap();
        let outcome = adding.await.unwrap().unwrap();

        assert!(matches!(outcome, AddOutcome::Queued { position: 1, .. }));
        assert_eq!(
            recorded.lock().urls,
            vec![stream("aaaaaaaaaaa"), stream("bbbbbbbbbbb")]
        );
        let player = handle.lock().await;
        assert_eq!(player.current.as_ref().map(|s| s.title.as_str()), Some("B"));
        let queued: Vec<&str> = player.queue.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(queued, vec!["C"]);
    }

    #[tokio::test]
    async fn queued_song_is_preloaded_while_the_current_one_plays() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, _) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();

        settle_preload(&engine).await;

        let handle = engine.player(guild());
        let player = handle.lock().await;
        let preloaded = player.preloaded.as_ref().unwrap();
        assert_eq!(preloaded.url, song("bbbbbbbbbbb", "B").url);
        assert_eq!(preloaded.stream_url, stream("bbbbbbbbbbb"));
        assert!(!preloaded.is_expired());
    }

    #[tokio::test]
    async fn advancing_uses_the_preloaded_stream() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();
        settle_preload(&engine).await;
        engine.player(guild()).lock().await.preloaded =
            Some(preloaded_copy("bbbbbbbbbbb", "B", "https://preloaded.example/b"));

        finish_current(&engine).await;

        assert_eq!(recorded.lock().urls[1], "https://preloaded.example/b");
        assert!(engine.player(guild()).lock().await.preloaded.is_none());
    }

    #[tokio::test]
    async fn expired_or_foreign_preload_falls_back_to_the_queued_song() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        for (id, title) in [("aaaaaaaaaaa", "A"), ("bbbbbbbbbbb", "B"), ("ccccccccccc", "C")] {
            engine.add(guild(), song(id, title)).await.unwrap();
        }

        settle_preload(&engine).await;
        let mut expired = preloaded_copy("bbbbbbbbbbb", "B", "https://preloaded.example/b");
        expired.stream_expires_at = Utc::now() - chrono::Duration::minutes(1);
        engine.player(guild()).lock().await.preloaded = Some(expired);
        finish_current(&engine).await;

        settle_preload(&engine).await;
        engine.player(guild()).lock().await.preloaded =
            Some(preloaded_copy("aaaaaaaaaaa", "A", "https://preloaded.example/a"));
        finish_current(&engine).await;

        assert_eq!(
            recorded.lock().urls,
            vec![stream("aaaaaaaaaaa"), stream("bbbbbbbbbbb"), stream("ccccccccccc")]
        );
    }

    #[tokio::test]
    async fn shuffle_discards_the_preload() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, _) = engine_with(&fx).await;
        for (id, title) in [("aaaaaaaaaaa", "A"), ("bbbbbbbbbbb", "B"), ("ccccccccccc", "C")] {
            engine.add(guild(), song(id, title)).await.unwrap();
        }
        settle_preload(&engine).await;
        engine.player(guild()).lock().await.preloaded =
            Some(preloaded_copy("bbbbbbbbbbb", "B", "https://preloaded.example/b"));

        assert_eq!(engine.shuffle(guild()).await, 2);

        let handle = engine.player(guild());
        let player = handle.lock().await;
        let stream_url = player.preloaded.as_ref().map(|s| s.stream_url.as_str());
        assert_ne!(stream_url, Some("https://preloaded.example/b"));
    }

    #[tokio::test]
    async fn skip_drops_the_in_flight_preload() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();
        assert!(engine.player(guild()).lock().await.preload_task.is_some());

        let skipped = engine.skip(guild()).await.unwrap();

        assert_eq!(skipped.title, "A");
        assert!(engine.player(guild()).lock().await.preload_task.is_none());
        finish_current(&engine).await;
        assert_eq!(
            recorded.lock().urls,
            vec![stream("aaaaaaaaaaa"), stream("bbbbbbbbbbb")]
        );
    }

    #[tokio::test]
    async fn skip_keeps_a_finished_preload_of_the_next_song() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();
        engine.add(guild(), song("bbbbbbbbbbb", "B")).await.unwrap();
        settle_preload(&engine).await;
        engine.player(guild()).lock().await.preloaded =
            Some(preloaded_copy("bbbbbbbbbbb", "B", "https://preloaded.example/b"));

        engine.skip(guild()).await.unwrap();
        finish_current(&engine).await;

        assert_eq!(recorded.lock().urls[1], "https://preloaded.example/b");
    }

    #[tokio::test]
    async fn volume_is_clamped_and_applied_live() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;
        engine.add(guild(), song("aaaaaaaaaaa", "A")).await.unwrap();

        assert_eq!(engine.set_volume(guild(), 1.7).await.unwrap(), 1.0);
        assert_eq!(engine.player(guild()).lock().await.volume, 1.0);
        assert_eq!(engine.set_volume(guild(), -0.2).await.unwrap(), 0.0);
        assert_eq!(engine.player(guild()).lock().await.volume, 0.0);
        assert_eq!(engine.set_volume(guild(), 0.4).await.unwrap(), 0.4);

        assert_eq!(recorded.lock().live, vec![1.0, 0.0, 0.4]);
    }

    #[tokio::test]
    async fn reactive_autoplay_refills_and_starts() {
        let mut search = MockVideoSearch::new();
        search.expect_search().times(1).returning(|_, _| {
            Ok(vec![
                result("goodgoodgo1", "Teto - Dia Azul"),
                result("goodgoodgo2", "Wiu - Coração de Gelo"),
            ])
        });
        search.expect_durations().times(1).returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| (id.clone(), "PT3M".to_string()))
                .collect::<HashMap<_, _>>())
        });
        let fx = fixture(search, QuotaLimits::default());
        let (engine, recorded) = engine_with(&fx).await;

        engine.add(guild(), song("refrefrefre", "Matuê - Anos Luz")).await.unwrap();
        engine.player(guild()).lock().await.autoplay.enabled = true;

        finish_current(&engine).await;

        assert_eq!(
            recorded.lock().urls,
            vec![stream("refrefrefre"), stream("goodgoodgo1")]
        );
        let handle = engine.player(guild());
        let player = handle.lock().await;
        assert!(player.is_playing);
        let queued: Vec<String> = player.queue.iter().filter_map(|s| s.video_id()).collect();
        assert_eq!(queued, vec!["goodgoodgo2".to_string()]);
        assert!(player.current.as_ref().is_some_and(|s| s.requester.is_some()));
    }
}
