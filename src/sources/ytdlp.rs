use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{is_url, Extractor, PlaylistEntry, PlaylistListing, VideoInfo};

/// Extractor basado en el binario `yt-dlp`
pub struct YtDlpExtractor {
    binary: String,
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    formats: Option<Vec<Format>>,
    entries: Option<Vec<Option<YtDlpInfo>>>,
    playlist_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    abr: Option<f64>,
}

impl YtDlpExtractor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            // Limitar procesos concurrentes para evitar rate limiting
            rate_limiter: Semaphore::new(max_concurrent.max(1)),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let _permit = self.rate_limiter.acquire().await?;

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Verifica que yt-dlp esté instalado
    pub async fn version(&self) -> Result<String> {
        let version = self.run(&["--version"]).await?;
        Ok(version.trim().to_string())
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, query: &str) -> Result<VideoInfo> {
        let target = if is_url(query) {
            query.trim().to_string()
        } else {
            format!("ytsearch1:{}", query.trim())
        };

        debug!("📊 Obteniendo info de: {}", target);

        let stdout = self
            .run(&[
                "--dump-single-json",
                "--no-warnings",
                "--no-playlist",
                "--playlist-items",
                "1",
                "-f",
                "bestaudio/best",
                &target,
            ])
            .await?;

        parse_video(&stdout)
    }

    async fn list_playlist(&self, url: &str, limit: usize) -> Result<Option<PlaylistListing>> {
        info!("📋 Obteniendo playlist (máx {} items): {}", limit, url);

        let limit = limit.to_string();
        let stdout = self
            .run(&[
                "--flat-playlist",
                "--dump-single-json",
                "--no-warnings",
                "--playlist-end",
                &limit,
                url,
            ])
            .await?;

        parse_listing(&stdout)
    }
}

fn parse_video(json: &str) -> Result<VideoInfo> {
    let info: YtDlpInfo =
        serde_json::from_str(json).context("Error al parsear respuesta de yt-dlp")?;

    let info = match info.entries {
        Some(entries) => entries
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| anyhow::anyhow!("Video unavailable: playlist vacía o sin videos disponibles"))?,
        None => info,
    };

    info_to_video(info)
}

fn info_to_video(info: YtDlpInfo) -> Result<VideoInfo> {
    let title = info
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Video unavailable: título no disponible"))?;

    let stream_url = info
        .url
        .clone()
        .or_else(|| best_audio_url(info.formats.as_deref().unwrap_or_default()))
        .ok_or_else(|| anyhow::anyhow!("Video unavailable: sin stream de audio"))?;

    let id = info.id.unwrap_or_default();
    let webpage_url = info
        .webpage_url
        .unwrap_or_else(|| super::watch_url(&id));

    Ok(VideoInfo {
        id,
        webpage_url,
        title,
        duration: info.duration.map(|d| d.max(0.0) as u64).unwrap_or(0),
        thumbnail: info.thumbnail,
        uploader: info
            .uploader
            .or(info.channel)
            .unwrap_or_else(|| "Unknown".to_string()),
        stream_url,
    })
}

/// Prefiere formatos solo-audio con mayor bitrate
fn best_audio_url(formats: &[Format]) -> Option<String> {
    let with_audio = formats
        .iter()
        .filter(|f| f.url.is_some() && f.acodec.as_deref().is_some_and(|c| c != "none"));

    let audio_only = with_audio
        .clone()
        .filter(|f| f.vcodec.as_deref() == Some("none"))
        .max_by(|a, b| a.abr.unwrap_or(0.0).total_cmp(&b.abr.unwrap_or(0.0)));

    audio_only
        .or_else(|| with_audio.clone().next())
        .and_then(|f| f.url.clone())
}

fn parse_listing(json: &str) -> Result<Option<PlaylistListing>> {
    let info: YtDlpInfo =
        serde_json::from_str(json).context("Error al parsear playlist de yt-dlp")?;

    let Some(entries) = info.entries else {
        return Ok(None);
    };

    let entries: Vec<Option<PlaylistEntry>> = entries
        .into_iter()
        .map(|entry| {
            entry.map(|e| PlaylistEntry {
                id: e.id,
                url: e.url.or(e.webpage_url),
                title: e.title,
            })
        })
        .collect();

    let unavailable = entries.iter().filter(|e| e.is_none()).count();
    if unavailable > 0 {
        warn!("⚠️ {} entradas no disponibles en la playlist", unavailable);
    }

    Ok(Some(PlaylistListing {
        title: info.title.unwrap_or_else(|| "Playlist".to_string()),
        total: info.playlist_count.unwrap_or(entries.len()).max(entries.len()),
        entries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_single_video_with_selected_format() {
        let json = r#"{
            "id": "abc123",
            "title": "Matuê - 777-666",
            "duration": 187.4,
            "uploader": "Matuê",
            "thumbnail": "https://i.ytimg.com/vi/abc123/hq.jpg",
            "webpage_url": "https://www.youtube.com/watch?v=abc123",
            "url": "https://rr1.googlevideo.com/audio"
        }"#;

        let video = parse_video(json).unwrap();
        assert_eq!(video.id, "abc123");
        assert_eq!(video.duration, 187);
        assert_eq!(video.stream_url, "https://rr1.googlevideo.com/audio");
    }

    #[test]
    fn search_wrapper_resolves_to_first_entry() {
        let json = r#"{
            "title": "lofi",
            "entries": [
                {"id": "first", "title": "First", "channel": "Chan", "formats": [
                    {"url": "https://v/video", "acodec": "mp4a", "vcodec": "avc1", "abr": 128},
                    {"url": "https://v/low", "acodec": "opus", "vcodec": "none", "abr": 64},
                    {"url": "https://v/high", "acodec": "opus", "vcodec": "none", "abr": 160}
                ]}
            ]
        }"#;

        let video = parse_video(json).unwrap();
        assert_eq!(video.id, "first");
        assert_eq!(video.uploader, "Chan");
        assert_eq!(video.stream_url, "https://v/high");
        assert_eq!(video.webpage_url, "https://www.youtube.com/watch?v=first");
    }

    #[test]
    fn empty_wrapper_is_unavailable() {
        let err = parse_video(r#"{"entries": []}"#).unwrap_err();
        assert!(format!("{err:#}").contains("unavailable"));
    }

    #[test]
    fn flat_listing_keeps_unavailable_slots() {
        let json = r#"{
            "title": "Mix",
            "playlist_count": 40,
            "entries": [
                {"id": "a", "url": "https://www.youtube.com/watch?v=a", "title": "A"},
                null,
                {"id": "c", "title": "C"}
            ]
        }"#;

        let listing = parse_listing(json).unwrap().unwrap();
        assert_eq!(listing.title, "Mix");
        assert_eq!(listing.total, 40);
        assert_eq!(listing.entries.len(), 3);
        assert!(listing.entries[1].is_none());
        assert_eq!(
            listing.entries[2].as_ref().and_then(|e| e.video_url()).as_deref(),
            Some("https://www.youtube.com/watch?v=c")
        );
    }

    #[test]
    fn plain_video_is_not_a_listing() {
        let json = r#"{"id": "a", "title": "A", "url": "https://v/a"}"#;
        assert!(parse_listing(json).unwrap().is_none());
    }
}
