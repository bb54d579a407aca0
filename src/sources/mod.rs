pub mod youtube_api;
pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

pub use youtube_api::YouTubeApiClient;
pub use ytdlp::YtDlpExtractor;

/// Máximo de ids por llamada a `videos.list`
pub const VIDEOS_PAGE_SIZE: usize = 50;

/// Metadata de un video tal como la devuelve el extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub webpage_url: String,
    pub title: String,
    /// Segundos; 0 = desconocida
    pub duration: u64,
    pub thumbnail: Option<String>,
    pub uploader: String,
    pub stream_url: String,
}

/// Entrada de un listado plano de playlist
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
}

impl PlaylistEntry {
    /// URL a resolver: la del listado o una construida desde el id.
    pub fn video_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| self.id.as_deref().map(watch_url))
    }
}

/// Resultado de la fase 1 de una playlist
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistListing {
    pub title: String,
    /// Tamaño declarado por la plataforma (puede superar `entries.len()`)
    pub total: usize,
    /// `None` para entradas que la plataforma marca como no disponibles
    pub entries: Vec<Option<PlaylistEntry>>,
}

/// Candidato devuelto por la búsqueda de la plataforma
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub video_id: String,
    pub title: String,
    pub channel_title: String,
    pub thumbnail_url: Option<String>,
}

impl SearchResult {
    pub fn url(&self) -> String {
        watch_url(&self.video_id)
    }
}

/// Servicio de extracción (yt-dlp).
///
/// Los errores se devuelven como texto libre; el llamador los clasifica con
/// [`crate::error::ResolutionKind::classify`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extrae un video. Texto libre se resuelve al primer resultado de
    /// búsqueda y una playlist a su primera entrada.
    async fn extract(&self, query: &str) -> Result<VideoInfo>;

    /// Listado plano de una playlist, limitado a `limit` entradas.
    /// Devuelve `None` si la URL no es una playlist.
    async fn list_playlist(&self, url: &str, limit: usize) -> Result<Option<PlaylistListing>>;
}

/// Búsqueda y metadata por lotes (YouTube Data API v3).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoSearch: Send + Sync {
    /// Busca videos en la categoría música.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;

    /// Duraciones ISO-8601 por id. Admite hasta [`VIDEOS_PAGE_SIZE`] ids.
    async fn durations(&self, ids: &[String]) -> Result<HashMap<String, String>>;
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Verifica si el texto es una URL http(s) y no una búsqueda
pub fn is_url(input: &str) -> bool {
    Url::parse(input.trim())
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Extrae el id de video de las formas habituales de URL de YouTube
/// (`watch?v=`, `youtu.be/`, `embed/`, `shorts/`, `music.youtube.com`).
pub fn extract_video_id(input: &str) -> Option<String> {
    let url = Url::parse(input.trim()).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    let id = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                Some("embed") | Some("shorts") | Some("v") | Some("live") => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        }
        _ => None,
    }?;

    (!id.is_empty()).then_some(id)
}

/// Verifica si la URL apunta a una playlist
pub fn is_playlist_url(input: &str) -> bool {
    Url::parse(input.trim())
        .map(|url| {
            url.path() == "/playlist" || url.query_pairs().any(|(key, _)| key == "list")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_ids_from_common_urls() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Some("dQw4w9WgXcQ")),
            ("https://www.youtube.com/watch?list=PL1&v=abc123", Some("abc123")),
            ("https://youtu.be/dQw4w9WgXcQ?t=42", Some("dQw4w9WgXcQ")),
            ("https://music.youtube.com/watch?v=test", Some("test")),
            ("https://www.youtube.com/embed/xyz", Some("xyz")),
            ("https://youtube.com/shorts/short1", Some("short1")),
            ("https://example.com/watch?v=nope", None),
            ("lofi hip hop", None),
        ];

        for (input, expected) in cases {
            assert_eq!(extract_video_id(input).as_deref(), expected, "{input}");
        }
    }

    #[test]
    fn distinguishes_urls_from_search_terms() {
        assert!(is_url("https://youtu.be/abc"));
        assert!(!is_url("matuê 777-666"));
        assert!(!is_url("ftp://files.example.com/song.mp3"));
    }

    #[test]
    fn detects_playlists() {
        assert!(is_playlist_url("https://www.youtube.com/playlist?list=PL123"));
        assert!(is_playlist_url("https://www.youtube.com/watch?v=a&list=PL123"));
        assert!(!is_playlist_url("https://www.youtube.com/watch?v=a"));
    }

    #[test]
    fn playlist_entry_falls_back_to_id() {
        let entry = PlaylistEntry {
            id: Some("abc".into()),
            url: None,
            title: None,
        };
        assert_eq!(entry.video_url().as_deref(), Some("https://www.youtube.com/watch?v=abc"));
    }
}
