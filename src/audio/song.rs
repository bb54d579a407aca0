use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::time::Duration;

use crate::sources::{extract_video_id, VideoInfo};

/// Who asked for a song. Autoplay songs inherit one when available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

impl Requester {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// Canonical webpage URL
    pub url: String,
    pub title: String,
    /// Seconds, 0 when unknown
    pub duration: u64,
    pub thumbnail: Option<String>,
    pub uploader: String,
    pub stream_url: String,
    /// `None` for songs the bot picked on its own
    pub requester: Option<Requester>,
    pub created_at: DateTime<Utc>,
    pub stream_expires_at: DateTime<Utc>,
}

fn expiry(from: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    from + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(5))
}

impl Song {
    pub fn from_video(info: VideoInfo, requester: Option<Requester>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            url: info.webpage_url,
            title: info.title,
            duration: info.duration,
            thumbnail: info.thumbnail,
            uploader: info.uploader,
            stream_url: info.stream_url,
            requester,
            created_at: now,
            stream_expires_at: expiry(now, ttl),
        }
    }

    pub fn video_id(&self) -> Option<String> {
        extract_video_id(&self.url)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.stream_url.is_empty() || now >= self.stream_expires_at
    }

    /// Copy of this song pointing at a freshly extracted stream.
    pub fn renewed(&self, stream_url: String, ttl: Duration) -> Self {
        Self {
            stream_url,
            stream_expires_at: expiry(Utc::now(), ttl),
            ..self.clone()
        }
    }

    pub fn is_autoplay(&self) -> bool {
        self.requester.is_none()
    }

    /// `m:ss`, or `h:mm:ss` for long tracks
    pub fn duration_display(&self) -> String {
        if self.duration == 0 {
            return "🔴 LIVE".to_string();
        }
        let (h, m, s) = (self.duration / 3600, (self.duration % 3600) / 60, self.duration % 60);
        if h > 0 {
            format!("{h}:{m:02}:{s:02}")
        } else {
            format!("{m}:{s:02}")
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn song(id: &str, title: &str) -> Song {
        Song::from_video(
            VideoInfo {
                id: id.to_string(),
                webpage_url: crate::sources::watch_url(id),
                title: title.to_string(),
                duration: 200,
                thumbnail: None,
                uploader: "Channel".to_string(),
                stream_url: format!("https://stream.example/{id}"),
            },
            Some(Requester::new(UserId::new(1), "ana")),
            Duration::from_secs(5 * 3600),
        )
    }

    #[test]
    fn stream_expires_after_ttl() {
        let s = song("dQw4w9WgXcQ", "Song");
        assert!(!s.is_expired());
        assert!(s.is_expired_at(s.created_at + chrono::Duration::hours(5)));
        assert_eq!(s.video_id().as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn renewal_returns_a_new_copy() {
        let mut s = song("dQw4w9WgXcQ", "Song");
        s.stream_expires_at = s.created_at;
        let renewed = s.renewed("https://stream.example/new".to_string(), Duration::from_secs(60));

        assert!(s.is_expired());
        assert!(!renewed.is_expired());
        assert_eq!(renewed.stream_url, "https://stream.example/new");
        assert_eq!(renewed.title, s.title);
    }

    #[test]
    fn formats_duration() {
        let mut s = song("a", "b");
        assert_eq!(s.duration_display(), "3:20");
        s.duration = 3725;
        assert_eq!(s.duration_display(), "1:02:05");
    }
}
