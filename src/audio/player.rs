use serenity::model::id::GuildId;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::fade::FadeHandle;
use super::queue::{LoopMode, MusicQueue, QueueSnapshot};
use super::sink::{TrackControl, VoiceSink};
use super::song::{Requester, Song};
use crate::autoplay::strategy::StrategyState;
use crate::config::Config;
use crate::error::PlayerError;

/// Shared, per-guild player.
pub type PlayerHandle = Arc<tokio::sync::Mutex<MusicPlayer>>;

/// A played track autoplay can search around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReference {
    pub video_id: String,
    pub title: String,
    pub channel: String,
}

impl TrackReference {
    pub fn from_song(song: &Song) -> Option<Self> {
        Some(Self {
            video_id: song.video_id()?,
            title: song.title.clone(),
            channel: song.uploader.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HistoryEntry {
    video_id: String,
    title: String,
}

/// Autoplay bookkeeping of one player.
#[derive(Debug)]
pub struct AutoplayState {
    pub enabled: bool,
    history: VecDeque<HistoryEntry>,
    history_size: usize,
    pub last_played: Option<TrackReference>,
    pub last_requester: Option<Requester>,
    pub strategy: StrategyState,
    guard: Arc<tokio::sync::Mutex<()>>,
}

impl AutoplayState {
    pub fn new(enabled: bool, history_size: usize) -> Self {
        Self {
            enabled,
            history: VecDeque::with_capacity(history_size),
            history_size: history_size.max(1),
            last_played: None,
            last_requester: None,
            strategy: StrategyState::default(),
            guard: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Oldest entries fall off once the history is full.
    pub fn record(&mut self, video_id: String, title: String) {
        if self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry { video_id, title });
    }

    pub fn history_ids(&self) -> HashSet<String> {
        self.history.iter().map(|h| h.video_id.clone()).collect()
    }

    pub fn history_titles(&self) -> Vec<String> {
        self.history.iter().map(|h| h.title.clone()).collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Fraction of the history window in use.
    pub fn occupancy(&self) -> f64 {
        self.history.len() as f64 / self.history_size as f64
    }

    /// Fetch guard, taken with `try_lock_owned`.
    pub fn guard(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.guard.clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.guard.try_lock().is_err()
    }
}

/// Playback state of one guild.
pub struct MusicPlayer {
    pub guild_id: GuildId,
    pub queue: MusicQueue,
    pub current: Option<Song>,
    pub volume: f32,
    pub is_playing: bool,
    pub is_paused: bool,
    pub loop_mode: LoopMode,
    pub autoplay: AutoplayState,
    pub crossfade_enabled: bool,
    pub crossfade_duration: Duration,
    pub crossfade_steps: u32,
    pub stopped_manually: bool,
    /// Set by `skip` so a single-song loop moves on
    pub skipping: bool,
    pub playlist_cancel: Arc<AtomicBool>,
    pub last_activity: Instant,
    pub(crate) fade: Option<FadeHandle>,
    pub(crate) preloaded: Option<Song>,
    pub(crate) preload_task: Option<JoinHandle<()>>,
    pub(crate) sink: Option<Arc<dyn VoiceSink>>,
    pub(crate) track: Option<Arc<dyn TrackControl>>,
    /// Bumped on every play; completions of older tracks are ignored
    pub(crate) generation: u64,
}

impl MusicPlayer {
    pub fn new(guild_id: GuildId, config: &Config) -> Self {
        Self {
            guild_id,
            queue: MusicQueue::new(config.max_queue_size),
            current: None,
            volume: config.default_volume.clamp(0.0, 1.0),
            is_playing: false,
            is_paused: false,
            loop_mode: LoopMode::Off,
            autoplay: AutoplayState::new(config.autoplay_enabled, config.autoplay_history_size),
            crossfade_enabled: config.crossfade_enabled,
            crossfade_duration: config.crossfade_duration,
            crossfade_steps: config.crossfade_steps,
            stopped_manually: false,
            skipping: false,
            playlist_cancel: Arc::new(AtomicBool::new(false)),
            last_activity: Instant::now(),
            fade: None,
            preloaded: None,
            preload_task: None,
            sink: None,
            track: None,
            generation: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn enqueue(&mut self, song: Song) -> Result<usize, PlayerError> {
        self.queue.push(song)?;
        self.touch();
        Ok(self.queue.len())
    }

    pub fn set_sink(&mut self, sink: Arc<dyn VoiceSink>) {
        self.sink = Some(sink);
    }

    pub fn sink(&self) -> Option<Arc<dyn VoiceSink>> {
        self.sink.clone()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn is_idle_for(&self, idle: Duration) -> bool {
        !self.is_playing && self.queue.is_empty() && self.last_activity.elapsed() >= idle
    }

    /// Remembers a song that played to its end, for autoplay.
    pub fn record_finished(&mut self, song: &Song) {
        if let Some(reference) = TrackReference::from_song(song) {
            self.autoplay.record(reference.video_id.clone(), reference.title.clone());
            debug!(
                "📝 Canción agregada al historial: {} | Historial: {} videos",
                song.title,
                self.autoplay.history_len()
            );
            self.autoplay.last_played = Some(reference);
        }
        if let Some(requester) = &song.requester {
            self.autoplay.last_requester = Some(requester.clone());
        }
    }

    /// Last requester, then the queue head's, then the current song's.
    pub fn requester_fallback(&self) -> Option<Requester> {
        self.autoplay
            .last_requester
            .clone()
            .or_else(|| self.queue.front().and_then(|s| s.requester.clone()))
            .or_else(|| self.current.as_ref().and_then(|s| s.requester.clone()))
    }

    /// Tears down every per-track background task.
    pub fn cancel_background_tasks(&mut self) {
        if let Some(fade) = self.fade.take() {
            fade.cancel();
        }
        if let Some(task) = self.preload_task.take() {
            task.abort();
            debug!("🚫 Precarga cancelada");
        }
        self.preloaded = None;
        self.playlist_cancel.store(true, Ordering::SeqCst);
    }

    /// Whether a preload is still running.
    pub fn is_preloading(&self) -> bool {
        self.preload_task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            items: self.queue.snapshot(),
            loop_mode: self.loop_mode,
            autoplay: self.autoplay.enabled,
            total_duration: self.queue.total_duration(),
        }
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        info!("{} Modo de repetición en guild {}", mode.label(), self.guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::song::tests::song;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn player() -> MusicPlayer {
        let config = Config {
            autoplay_history_size: 3,
            ..Config::default()
        };
        MusicPlayer::new(GuildId::new(1), &config)
    }

    #[test]
    fn history_evicts_oldest() {
        let mut p = player();
        for id in ["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc", "ddddddddddd"] {
            p.record_finished(&song(id, id));
        }

        let ids = p.autoplay.history_ids();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains("aaaaaaaaaaa"));
        assert!((p.autoplay.occupancy() - 1.0).abs() < f64::EPSILON);
        assert_eq!(
            p.autoplay.last_played.as_ref().map(|r| r.video_id.as_str()),
            Some("ddddddddddd")
        );
    }

    #[test]
    fn requester_fallback_order() {
        let mut p = player();
        assert_eq!(p.requester_fallback(), None);

        let mut current = song("aaaaaaaaaaa", "A");
        current.requester = Some(Requester::new(UserId::new(3), "current"));
        p.current = Some(current);
        assert_eq!(p.requester_fallback().map(|r| r.name), Some("current".to_string()));

        let mut head = song("bbbbbbbbbbb", "B");
        head.requester = Some(Requester::new(UserId::new(2), "head"));
        p.enqueue(head).unwrap();
        assert_eq!(p.requester_fallback().map(|r| r.name), Some("head".to_string()));

        p.autoplay.last_requester = Some(Requester::new(UserId::new(1), "last"));
        assert_eq!(p.requester_fallback().map(|r| r.name), Some("last".to_string()));
    }

    #[tokio::test]
    async fn guard_reports_fetch_in_flight() {
        let p = player();
        assert!(!p.autoplay.is_fetching());
        let held = p.autoplay.guard().try_lock_owned().unwrap();
        assert!(p.autoplay.is_fetching());
        drop(held);
        assert!(!p.autoplay.is_fetching());
    }

    #[test]
    fn background_teardown_flags_playlist() {
        let mut p = player();
        p.preloaded = Some(song("aaaaaaaaaaa", "A"));
        p.cancel_background_tasks();
        assert!(p.preloaded.is_none());
        assert!(p.playlist_cancel.load(Ordering::SeqCst));
    }
}
