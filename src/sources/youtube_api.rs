use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{SearchResult, VideoSearch, VIDEOS_PAGE_SIZE};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
/// Categoría "Music" de YouTube
const MUSIC_CATEGORY_ID: &str = "10";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    channel_title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize, Clone)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

/// Cliente de YouTube Data API v3 (search.list y videos.list)
pub struct YouTubeApiClient {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl YouTubeApiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            api_key,
            client,
            base_url: API_BASE.to_string(),
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            // la URL lleva la API key
            .map_err(reqwest::Error::without_url)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("❌ YouTube API error: {} - {}", status, error_text);
            anyhow::bail!("YouTube API error: {} - {}", status, error_text);
        }

        Ok(response.json().await.map_err(reqwest::Error::without_url)?)
    }
}

#[async_trait]
impl VideoSearch for YouTubeApiClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        debug!("🔍 Búsqueda YouTube API v3: {}", query);

        let max_results = max_results.clamp(1, VIDEOS_PAGE_SIZE).to_string();
        let response: SearchResponse = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("q", query),
                    ("type", "video"),
                    ("videoCategoryId", MUSIC_CATEGORY_ID),
                    ("maxResults", max_results.as_str()),
                ],
            )
            .await?;

        let results: Vec<SearchResult> = response
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                let thumbnails = item.snippet.thumbnails;
                let thumbnail_url = thumbnails
                    .medium
                    .or(thumbnails.high)
                    .or(thumbnails.default)
                    .map(|t| t.url);

                Some(SearchResult {
                    video_id,
                    title: item.snippet.title,
                    channel_title: item.snippet.channel_title,
                    thumbnail_url,
                })
            })
            .collect();

        info!("✅ YouTube API v3: {} resultados para '{}'", results.len(), query);
        Ok(results)
    }

    async fn durations(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        if ids.len() > VIDEOS_PAGE_SIZE {
            anyhow::bail!("videos.list admite hasta {} ids, recibió {}", VIDEOS_PAGE_SIZE, ids.len());
        }

        let joined = ids.join(",");
        let response: VideosResponse = self
            .get("videos", &[("part", "contentDetails"), ("id", joined.as_str())])
            .await?;

        Ok(response
            .items
            .into_iter()
            .map(|item| (item.id, item.content_details.duration))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn search_payload_skips_non_video_items() {
        let json = r#"{
            "items": [
                {"id": {"kind": "youtube#video", "videoId": "v1"},
                 "snippet": {"title": "Song", "channelTitle": "Artist",
                             "thumbnails": {"medium": {"url": "https://i/m.jpg"}}}},
                {"id": {"kind": "youtube#channel", "channelId": "c1"},
                 "snippet": {"title": "Channel", "channelTitle": "Artist"}}
            ]
        }"#;

        let response: SearchResponse = serde_json::from_str(json).unwrap();
        let ids: Vec<_> = response.items.iter().filter_map(|i| i.id.video_id.clone()).collect();
        assert_eq!(ids, vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn transport_errors_hide_the_api_key() {
        let mut client = YouTubeApiClient::new("secret-key-123".to_string()).unwrap();
        client.base_url = "http://127.0.0.1:9".to_string();

        let err = client.search("trap", 5).await.unwrap_err();
        let rendered = format!("{err:#} {err:?}");
        assert!(!rendered.contains("secret-key-123"), "{rendered}");
    }

    #[test]
    fn videos_payload_maps_durations() {
        let json = r#"{"items": [{"id": "v1", "contentDetails": {"duration": "PT3M12S"}}]}"#;
        let response: VideosResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.items[0].content_details.duration, "PT3M12S");
    }
}
