//! Turns user input into playable [`Song`]s.
//!
//! Every extraction goes through the shared [`VideoInfoCache`] when the
//! input carries a video id, and through a bounded exponential backoff when
//! the failure looks transient. Playlists are listed flat first and then
//! resolved in small parallel batches so the first songs can start playing
//! while the rest are still being extracted.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::song::{Requester, Song};
use crate::cache::VideoInfoCache;
use crate::config::Config;
use crate::error::{ResolutionError, ResolutionKind};
use crate::sources::{extract_video_id, is_url, Extractor, VideoInfo};

/// Errors kept in a playlist report
pub const MAX_REPORTED_ERRORS: usize = 10;
/// Extra entries listed beyond the queue bound, to absorb unavailable ones
pub const PLAYLIST_HEADROOM: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct PlaylistResolution {
    pub title: String,
    pub songs: Vec<Song>,
    /// Size declared by the platform
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl PlaylistResolution {
    fn single(song: Song) -> Self {
        Self {
            title: song.title.clone(),
            total: 1,
            processed: 1,
            songs: vec![song],
            ..Self::default()
        }
    }

    fn record_error(&mut self, error: &ResolutionError) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(error.to_string());
        }
    }
}

pub struct TrackResolver {
    extractor: Arc<dyn Extractor>,
    cache: Arc<VideoInfoCache>,
    attempts: u32,
    base_delay: Duration,
    stream_ttl: Duration,
    batch_size: usize,
    playlist_limit: usize,
}

impl TrackResolver {
    pub fn new(extractor: Arc<dyn Extractor>, cache: Arc<VideoInfoCache>, config: &Config) -> Self {
        Self {
            extractor,
            cache,
            attempts: config.extract_retries.max(1),
            base_delay: config.extract_base_delay,
            stream_ttl: config.stream_url_ttl,
            batch_size: config.playlist_batch_size.max(1),
            playlist_limit: config.max_queue_size + PLAYLIST_HEADROOM,
        }
    }

    pub fn stream_ttl(&self) -> Duration {
        self.stream_ttl
    }

    async fn extract_with_retry(&self, query: &str) -> Result<VideoInfo, ResolutionError> {
        let mut delay = self.base_delay;
        let mut attempt = 1;

        loop {
            match self.extractor.extract(query).await {
                Ok(info) => return Ok(info),
                Err(e) => {
                    let error = ResolutionError::from_upstream(&e);
                    if !error.kind.is_transient() || attempt >= self.attempts {
                        warn!("❌ Extracción fallida para '{}': {}", query, error);
                        return Err(error);
                    }
                    warn!(
                        "⚠️ Intento {}/{} falló ({:?}), reintentando en {}",
                        attempt,
                        self.attempts,
                        error.kind,
                        humantime::format_duration(delay)
                    );
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Cache-aware extraction of a single video URL.
    pub async fn video_info(&self, url: &str) -> Result<VideoInfo, ResolutionError> {
        if let Some(info) = extract_video_id(url).and_then(|id| self.cache.get(&id)) {
            return Ok(info);
        }

        let info = self.extract_with_retry(url).await?;
        self.cache.insert(info.clone());
        Ok(info)
    }

    /// Resolves a URL or free-text search to one song.
    pub async fn resolve(&self, query: &str, requester: Option<Requester>) -> Result<Song, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::new(ResolutionKind::Unknown, "empty query"));
        }

        let info = if is_url(query) {
            self.video_info(query).await?
        } else {
            debug!("🔍 Buscando: {}", query);
            let info = self.extract_with_retry(query).await?;
            self.cache.insert(info.clone());
            info
        };

        Ok(Song::from_video(info, requester, self.stream_ttl))
    }

    /// Fresh stream for a queued song, served from the cache when possible.
    pub async fn refresh(&self, song: &Song) -> Result<Song, ResolutionError> {
        let info = self.video_info(&song.url).await?;
        Ok(song.renewed(info.stream_url, self.stream_ttl))
    }

    /// Re-extracts an expired stream, skipping the cache.
    pub async fn renew(&self, song: &Song) -> Result<Song, ResolutionError> {
        info!("🔄 Stream URL expirada, re-extrayendo: {}", song.title);
        let info = self.extract_with_retry(&song.url).await?;
        self.cache.insert(info.clone());
        Ok(song.renewed(info.stream_url, self.stream_ttl))
    }

    /// Resolves a playlist, handing every song to `on_progress` as soon as it
    /// is ready. Setting `cancel` stops before the next batch; songs already
    /// delivered are kept.
    pub async fn resolve_playlist<F>(
        &self,
        url: &str,
        requester: Option<Requester>,
        cancel: Arc<AtomicBool>,
        on_progress: F,
    ) -> Result<PlaylistResolution, ResolutionError>
    where
        F: Fn(Song) + Send + Sync,
    {
        let listing = self
            .extractor
            .list_playlist(url, self.playlist_limit)
            .await
            .map_err(|e| ResolutionError::from_upstream(&e))?;

        let Some(listing) = listing else {
            let song = self.resolve(url, requester).await?;
            on_progress(song.clone());
            return Ok(PlaylistResolution::single(song));
        };

        info!(
            "📋 Playlist '{}': {} entradas listadas ({} declaradas)",
            listing.title,
            listing.entries.len(),
            listing.total
        );

        let mut result = PlaylistResolution {
            title: listing.title,
            total: listing.total,
            ..PlaylistResolution::default()
        };
        let urls: Vec<Option<String>> = listing
            .entries
            .into_iter()
            .map(|entry| entry.and_then(|e| e.video_url()))
            .collect();

        for (index, batch) in urls.chunks(self.batch_size).enumerate() {
            if cancel.load(Ordering::SeqCst) {
                info!("🛑 Procesamiento de playlist cancelado en el lote {}", index + 1);
                result.cancelled = true;
                break;
            }

            let mut pending: FuturesUnordered<_> = batch
                .iter()
                .map(|url| {
                    let requester = requester.clone();
                    async move {
                        let url = url.as_deref().ok_or_else(|| {
                            ResolutionError::new(ResolutionKind::Unavailable, "playlist entry unavailable")
                        })?;
                        let info = self.video_info(url).await?;
                        Ok::<_, ResolutionError>(Song::from_video(info, requester, self.stream_ttl))
                    }
                })
                .collect();

            while let Some(outcome) = pending.next().await {
                result.processed += 1;
                match outcome {
                    Ok(song) => {
                        on_progress(song.clone());
                        result.songs.push(song);
                    }
                    Err(e) => {
                        debug!("⚠️ Entrada de playlist omitida: {}", e);
                        result.record_error(&e);
                    }
                }
            }
        }

        cancel.store(false, Ordering::SeqCst);
        info!(
            "✅ Playlist '{}': {} canciones, {} fallidas{}",
            result.title,
            result.songs.len(),
            result.failed,
            if result.cancelled { " (cancelada)" } else { "" }
        );
        Ok(result)
    }
}
