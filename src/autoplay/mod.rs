//! # Autoplay
//!
//! Keeps a guild's queue going once the listeners stop adding songs.
//!
//! One fetch runs per player at a time, guarded by the player's autoplay
//! mutex. A fetch asks the AI client for a search query around a reference
//! track, runs one music-category search, drops candidates with cheap title
//! heuristics and a batched duration lookup, lets the AI veto non-music
//! results and finally extracts the survivors into the queue.
//!
//! Two consecutive empty fetches widen the [`strategy::SearchStrategy`] and
//! retry once. The pipeline never starts playback by itself; the engine does
//! that after a reactive fetch.

pub mod filters;
pub mod strategy;

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::ai::{AiClient, ValidationCandidate};
use crate::audio::player::{PlayerHandle, TrackReference};
use crate::audio::resolver::TrackResolver;
use crate::audio::song::{Requester, Song};
use crate::error::{PlayerError, ResolutionKind};
use crate::quota::{QuotaGovernor, QuotaOperation};
use crate::sources::{SearchResult, VideoSearch, VIDEOS_PAGE_SIZE};
use filters::{parse_duration_minutes, within_duration_window, CandidateFilter, Rejection};

/// Results requested per wanted song
const SEARCH_OVERFETCH: usize = 3;
/// Upper bound of `search.list`
const MAX_SEARCH_RESULTS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMode {
    /// The queue ran dry; search around the last played track.
    Reactive,
    /// A track just started with nothing queued behind it.
    Proactive(TrackReference),
}

impl FetchMode {
    fn label(&self) -> &'static str {
        match self {
            FetchMode::Reactive => "reactivo",
            FetchMode::Proactive(_) => "proactivo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoplayOutcome {
    /// Another fetch holds the guard
    AlreadyRunning,
    NoReference,
    Added(usize),
    /// Nothing survived, even after escalating
    Empty,
}

enum Attempt {
    NoReference,
    Added(usize),
    Empty,
}

pub struct AutoplayPipeline {
    ai: Arc<AiClient>,
    search: Option<Arc<dyn VideoSearch>>,
    quota: Arc<QuotaGovernor>,
    resolver: Arc<TrackResolver>,
    desired: usize,
}

impl AutoplayPipeline {
    pub fn new(
        ai: Arc<AiClient>,
        search: Option<Arc<dyn VideoSearch>>,
        quota: Arc<QuotaGovernor>,
        resolver: Arc<TrackResolver>,
        desired: usize,
    ) -> Self {
        if search.is_none() {
            warn!("⚠️ YOUTUBE_API_KEY no configurada, autoplay deshabilitado");
        }
        Self {
            ai,
            search,
            quota,
            resolver,
            desired: desired.max(1),
        }
    }

    /// Runs one fetch for the player, retrying once after an escalation.
    pub async fn fetch(&self, handle: &PlayerHandle, mode: FetchMode) -> AutoplayOutcome {
        let (guard, guild_id) = {
            let player = handle.lock().await;
            (player.autoplay.guard(), player.guild_id)
        };
        let mut retried = false;

        loop {
            let Ok(_permit) = guard.clone().try_lock_owned() else {
                debug!("🔒 Autoplay ya en curso en guild {}, ignorando llamada", guild_id);
                return AutoplayOutcome::AlreadyRunning;
            };

            let span = info_span!(
                "autoplay_session",
                guild = %guild_id,
                mode = mode.label(),
                strategy = tracing::field::Empty
            );

            match self.attempt(handle, &mode).instrument(span).await {
                Attempt::NoReference => return AutoplayOutcome::NoReference,
                Attempt::Added(n) => return AutoplayOutcome::Added(n),
                Attempt::Empty => {
                    let (escalated, failures) = {
                        let mut player = handle.lock().await;
                        let escalated = player.autoplay.strategy.on_failure();
                        (escalated, player.autoplay.strategy.failures)
                    };
                    if escalated && !retried {
                        retried = true;
                        continue;
                    }
                    warn!("⚠️ Autoplay: ningún video encontrado (fallas consecutivas: {})", failures);
                    return AutoplayOutcome::Empty;
                }
            }
        }
    }

    async fn attempt(&self, handle: &PlayerHandle, mode: &FetchMode) -> Attempt {
        let started = Instant::now();

        let (reference, exclude, history_titles, strategy) = {
            let mut player = handle.lock().await;
            let reference = match mode {
                FetchMode::Proactive(reference) => Some(reference.clone()),
                FetchMode::Reactive => player.autoplay.last_played.clone(),
            };
            let Some(reference) = reference else {
                warn!("⚠️ Autoplay abortado: {}", PlayerError::NoReference);
                return Attempt::NoReference;
            };
            let occupancy = player.autoplay.occupancy();
            player.autoplay.strategy.before_search(occupancy);
            (
                reference,
                player.autoplay.history_ids(),
                player.autoplay.history_titles(),
                player.autoplay.strategy.strategy,
            )
        };
        Span::current().record("strategy", strategy.index());

        info!(
            "🎯 Autoplay usando como base: '{}' de {} (estrategia {})",
            reference.title,
            reference.channel,
            strategy.index()
        );

        let analysis = self
            .ai
            .generate_query(&reference.title, &reference.channel, &history_titles, strategy)
            .await;

        let results = self.search(&analysis.query).await;
        let found = results.len();

        let candidates = self.apply_heuristics(results, &exclude, &reference);
        let after_heuristics = candidates.len();

        let candidates = self.filter_durations(candidates).await;
        let after_durations = candidates.len();

        let candidates = self.validate(candidates, &reference).await;
        info!(
            found,
            after_heuristics,
            after_durations,
            approved = candidates.len(),
            "📊 Candidatos por etapa"
        );

        if candidates.is_empty() {
            info!(success = false, added = 0, elapsed = %humantime::format_duration(started.elapsed()), "🏁 Sesión de autoplay terminada");
            return Attempt::Empty;
        }

        let requester = handle.lock().await.requester_fallback();
        let songs = self.materialize(&candidates, requester).await;
        if songs.is_empty() {
            info!(success = false, added = 0, elapsed = %humantime::format_duration(started.elapsed()), "🏁 Sesión de autoplay terminada");
            return Attempt::Empty;
        }

        let added = {
            let mut player = handle.lock().await;
            let added = player.queue.extend(songs);
            let occupancy = player.autoplay.occupancy();
            player.autoplay.strategy.on_success(occupancy);
            player.touch();
            if added == 0 {
                warn!("⚠️ Cola llena, autoplay no agregó canciones");
            }
            added
        };

        info!(
            success = true,
            added,
            elapsed = %humantime::format_duration(started.elapsed()),
            "✅ Autoplay ({}, estrategia {}): {} canciones agregadas",
            mode.label(),
            strategy.index(),
            added
        );
        Attempt::Added(added)
    }

    async fn search(&self, query: &str) -> Vec<SearchResult> {
        let Some(search) = &self.search else {
            return Vec::new();
        };
        if !self.quota.can_make_request(QuotaOperation::Search) {
            warn!("⚠️ Quota de YouTube agotada, búsqueda de autoplay omitida");
            return Vec::new();
        }
        self.quota
            .track_operation(QuotaOperation::Search, format!("autoplay: {query}"));

        let max_results = (self.desired * SEARCH_OVERFETCH).min(MAX_SEARCH_RESULTS);
        match search.search(query, max_results).await {
            Ok(results) => {
                debug!("🔍 '{}' devolvió {} resultados", query, results.len());
                results
            }
            Err(e) => {
                error!("❌ Error en la búsqueda de autoplay: {:#}", e);
                Vec::new()
            }
        }
    }

    fn apply_heuristics(
        &self,
        results: Vec<SearchResult>,
        exclude: &HashSet<String>,
        reference: &TrackReference,
    ) -> Vec<SearchResult> {
        let filter = CandidateFilter::new(exclude, &reference.video_id, &reference.title);
        let mut seen = HashSet::new();
        let mut rejected: HashMap<Rejection, usize> = HashMap::new();

        let kept: Vec<SearchResult> = results
            .into_iter()
            .filter(|candidate| seen.insert(candidate.video_id.clone()))
            .filter(|candidate| match filter.check(candidate) {
                Ok(()) => true,
                Err(reason) => {
                    debug!("🚫 {:?}: {}", reason, candidate.title);
                    *rejected.entry(reason).or_default() += 1;
                    false
                }
            })
            .collect();

        if !rejected.is_empty() {
            debug!("🧹 Rechazados por heurística: {:?}", rejected);
        }
        kept
    }

    /// Keeps candidates inside the duration window, stopping at `desired`.
    /// A chunk whose lookup is denied or fails keeps its candidates.
    async fn filter_durations(&self, candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        let Some(search) = &self.search else {
            return candidates;
        };
        let mut kept = Vec::with_capacity(self.desired);

        for chunk in candidates.chunks(VIDEOS_PAGE_SIZE) {
            if kept.len() >= self.desired {
                break;
            }

            let durations = if self.quota.can_make_request(QuotaOperation::VideosList) {
                self.quota.track_operation(
                    QuotaOperation::VideosList,
                    format!("duraciones de {} videos", chunk.len()),
                );
                let ids: Vec<String> = chunk.iter().map(|c| c.video_id.clone()).collect();
                match search.durations(&ids).await {
                    Ok(durations) => Some(durations),
                    Err(e) => {
                        warn!("⚠️ Error al obtener duraciones: {:#}", e);
                        None
                    }
                }
            } else {
                warn!("⚠️ Quota agotada para videos.list, duraciones sin verificar");
                None
            };

            for candidate in chunk {
                if kept.len() >= self.desired {
                    break;
                }
                let minutes = durations
                    .as_ref()
                    .and_then(|d| d.get(&candidate.video_id))
                    .and_then(|iso| parse_duration_minutes(iso));
                match minutes {
                    Some(m) if !within_duration_window(m) => {
                        debug!("⏱️ Excluido por duración ({} min): {}", m, candidate.title);
                    }
                    _ => kept.push(candidate.clone()),
                }
            }
        }

        kept
    }

    async fn validate(&self, candidates: Vec<SearchResult>, reference: &TrackReference) -> Vec<SearchResult> {
        if candidates.is_empty() {
            return candidates;
        }
        let batch: Vec<ValidationCandidate> = candidates
            .iter()
            .map(|c| ValidationCandidate {
                title: c.title.clone(),
                channel: c.channel_title.clone(),
            })
            .collect();

        let verdicts = self.ai.validate(&batch, &reference.title, &reference.channel).await;

        candidates
            .into_iter()
            .zip(verdicts)
            .filter_map(|(candidate, verdict)| {
                if verdict.approved {
                    Some(candidate)
                } else {
                    info!("🤖 IA rechazó '{}': {}", candidate.title, verdict.reason);
                    None
                }
            })
            .collect()
    }

    /// Extracts every candidate in parallel; failures are dropped.
    async fn materialize(&self, candidates: &[SearchResult], requester: Option<Requester>) -> Vec<Song> {
        let ttl = self.resolver.stream_ttl();
        let extractions = candidates.iter().map(|candidate| {
            let requester = requester.clone();
            async move {
                match self.resolver.video_info(&candidate.url()).await {
                    Ok(info) => Some(Song::from_video(info, requester, ttl)),
                    Err(e) if e.kind == ResolutionKind::AgeRestricted => {
                        debug!("🔞 Video con restricción de edad ignorado: {}", candidate.title);
                        None
                    }
                    Err(e) => {
                        warn!("⚠️ Error al procesar video {}: {}", candidate.title, e);
                        None
                    }
                }
            }
        });

        join_all(extractions).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::fallback::fallback_query;
    use crate::audio::player::MusicPlayer;
    use crate::cache::VideoInfoCache;
    use crate::config::Config;
    use crate::quota::QuotaLimits;
    use crate::sources::{extract_video_id, watch_url, MockExtractor, MockVideoSearch, VideoInfo};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serenity::model::id::{GuildId, UserId};
    use strategy::SearchStrategy;
    use tempfile::TempDir;

    pub(crate) fn result(id: &str, title: &str) -> SearchResult {
        SearchResult {
            video_id: id.to_string(),
            title: title.to_string(),
            channel_title: "Canal".to_string(),
            thumbnail_url: None,
        }
    }

    pub(crate) fn extractor() -> MockExtractor {
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(|url| {
            let id = extract_video_id(url).unwrap_or_default();
            Ok(VideoInfo {
                id: id.clone(),
                webpage_url: watch_url(&id),
                title: format!("Extracted {id}"),
                duration: 200,
                thumbnail: None,
                uploader: "Canal".to_string(),
                stream_url: format!("https://stream.example/{id}"),
            })
        });
        extractor
    }

    pub(crate) struct Fixture {
        pub pipeline: Arc<AutoplayPipeline>,
        pub resolver: Arc<TrackResolver>,
        pub config: Arc<Config>,
        pub quota: Arc<QuotaGovernor>,
        _dir: TempDir,
    }

    pub(crate) fn fixture(search: MockVideoSearch, limits: QuotaLimits) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            autoplay_enabled: true,
            autoplay_queue_size: 2,
            autoplay_history_size: 10,
            crossfade_enabled: false,
            ..Config::default()
        });
        let quota = Arc::new(QuotaGovernor::open(dir.path(), limits));
        let cache = Arc::new(VideoInfoCache::new(50, config.stream_url_ttl));
        let resolver = Arc::new(TrackResolver::new(Arc::new(extractor()), cache, &config));
        let ai = Arc::new(AiClient::new(None, quota.clone()));
        let pipeline = Arc::new(AutoplayPipeline::new(
            ai,
            Some(Arc::new(search)),
            quota.clone(),
            resolver.clone(),
            config.autoplay_queue_size,
        ));
        Fixture {
            pipeline,
            resolver,
            config,
            quota,
            _dir: dir,
        }
    }

    fn player(config: &Config) -> PlayerHandle {
        Arc::new(tokio::sync::Mutex::new(MusicPlayer::new(GuildId::new(1), config)))
    }

    fn reference() -> TrackReference {
        TrackReference {
            video_id: "refrefrefre".to_string(),
            title: "Matuê - Anos Luz".to_string(),
            channel: "Matuê".to_string(),
        }
    }

    fn all_durations(minutes: &'static [(&'static str, &'static str)]) -> impl Fn(&[String]) -> anyhow::Result<HashMap<String, String>> {
        move |ids: &[String]| {
            Ok(ids
                .iter()
                .map(|id| {
                    let iso = minutes
                        .iter()
                        .find(|(vid, _)| *vid == id.as_str())
                        .map(|(_, iso)| iso.to_string())
                        .unwrap_or_else(|| "PT3M10S".to_string());
                    (id.clone(), iso)
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn proactive_fetch_filters_and_enqueues() {
        let mut search = MockVideoSearch::new();
        search.expect_search().times(1).withf(|_, max| *max == 6).returning(|_, _| {
            Ok(vec![
                result("refrefrefre", "Matuê - Anos Luz"),
                result("covercover1", "Anos Luz (Cover)"),
                result("longlonglon", "Set completo"),
                result("goodgoodgo1", "Teto - Dia Azul"),
                result("goodgoodgo2", "Wiu - Coração de Gelo"),
                result("goodgoodgo3", "Veigh - Novo Balanço"),
            ])
        });
        search
            .expect_durations()
            .times(1)
            .returning(all_durations(&[("longlonglon", "PT45M")]));

        let fx = fixture(search, QuotaLimits::default());
        let handle = player(&fx.config);
        handle.lock().await.autoplay.last_requester = Some(Requester::new(UserId::new(9), "ana"));

        let outcome = fx.pipeline.fetch(&handle, FetchMode::Proactive(reference())).await;
        assert_eq!(outcome, AutoplayOutcome::Added(2));

        let player = handle.lock().await;
        let queued: Vec<String> = player.queue.iter().filter_map(|s| s.video_id()).collect();
        assert_eq!(queued, vec!["goodgoodgo1".to_string(), "goodgoodgo2".to_string()]);
        assert!(player
            .queue
            .iter()
            .all(|s| s.requester.as_ref().map(|r| r.name.as_str()) == Some("ana")));
        assert!(!player.is_playing);
        assert_eq!(fx.quota.stats().youtube.daily_usage, 101);
    }

    #[tokio::test]
    async fn second_fetch_while_running_is_rejected() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let handle = player(&fx.config);
        let _held = handle.lock().await.autoplay.guard().try_lock_owned().unwrap();

        let outcome = fx.pipeline.fetch(&handle, FetchMode::Proactive(reference())).await;
        assert_eq!(outcome, AutoplayOutcome::AlreadyRunning);
    }

    #[tokio::test]
    async fn reactive_fetch_without_history_has_no_reference() {
        let fx = fixture(MockVideoSearch::new(), QuotaLimits::default());
        let handle = player(&fx.config);
        assert_eq!(
            fx.pipeline.fetch(&handle, FetchMode::Reactive).await,
            AutoplayOutcome::NoReference
        );
    }

    #[tokio::test]
    async fn denied_search_spends_nothing() {
        let mut search = MockVideoSearch::new();
        search.expect_search().never();
        let limits = QuotaLimits {
            youtube_daily: 50,
            ..QuotaLimits::default()
        };
        let fx = fixture(search, limits);
        let handle = player(&fx.config);

        let outcome = fx.pipeline.fetch(&handle, FetchMode::Proactive(reference())).await;
        assert_eq!(outcome, AutoplayOutcome::Empty);
        assert_eq!(handle.lock().await.autoplay.strategy.failures, 1);
    }

    #[tokio::test]
    async fn two_failures_escalate_and_retry_once() {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let seen = queries.clone();
        let mut search = MockVideoSearch::new();
        search.expect_search().times(3).returning(move |query, _| {
            let mut seen = seen.lock();
            seen.push(query.to_string());
            if seen.len() < 3 {
                Ok(Vec::new())
            } else {
                Ok(vec![result("goodgoodgo1", "Teto - Dia Azul")])
            }
        });
        search.expect_durations().returning(all_durations(&[]));

        let fx = fixture(search, QuotaLimits::default());
        let handle = player(&fx.config);
        let r = reference();

        assert_eq!(
            fx.pipeline.fetch(&handle, FetchMode::Proactive(r.clone())).await,
            AutoplayOutcome::Empty
        );
        assert_eq!(handle.lock().await.autoplay.strategy.failures, 1);

        assert_eq!(
            fx.pipeline.fetch(&handle, FetchMode::Proactive(r.clone())).await,
            AutoplayOutcome::Added(1)
        );

        let queries = queries.lock().clone();
        let first = fallback_query(&r.title, &r.channel, SearchStrategy::VerySimilar).query;
        let widened = fallback_query(&r.title, &r.channel, SearchStrategy::ExpandGenre).query;
        assert_eq!(queries, vec![first.clone(), first, widened]);

        let player = handle.lock().await;
        assert_eq!(player.autoplay.strategy.failures, 0);
        assert_eq!(player.autoplay.strategy.strategy, SearchStrategy::VerySimilar);
    }
}
