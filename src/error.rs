//! Domain errors surfaced by the playback engine and the autoplay pipeline.
//!
//! Upstream extraction failures arrive as free text (yt-dlp writes them to
//! stderr), so [`ResolutionKind::classify`] maps them onto user-facing
//! categories by substring. The mapping is best-effort: a message that matches
//! nothing is reported as [`ResolutionKind::Unknown`].

use thiserror::Error;

/// Category of a failed track resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    Copyright,
    AgeRestricted,
    Private,
    Unavailable,
    Network,
    PremiumRequired,
    Unknown,
}

/// Substring table consulted in order; first match wins. Patterns are lowercase.
/// Premium must precede `unavailable` because YouTube phrases members-only
/// videos as "not available".
const CLASSIFICATION_TABLE: &[(&str, ResolutionKind)] = &[
    ("copyright", ResolutionKind::Copyright),
    ("blocked it in your country", ResolutionKind::Copyright),
    ("blocked", ResolutionKind::Copyright),
    ("confirm your age", ResolutionKind::AgeRestricted),
    ("age-restricted", ResolutionKind::AgeRestricted),
    ("age restricted", ResolutionKind::AgeRestricted),
    ("inappropriate for some users", ResolutionKind::AgeRestricted),
    ("private video", ResolutionKind::Private),
    ("is private", ResolutionKind::Private),
    ("music premium", ResolutionKind::PremiumRequired),
    ("premium members", ResolutionKind::PremiumRequired),
    ("members-only", ResolutionKind::PremiumRequired),
    ("join this channel", ResolutionKind::PremiumRequired),
    ("video unavailable", ResolutionKind::Unavailable),
    ("unavailable", ResolutionKind::Unavailable),
    ("not available", ResolutionKind::Unavailable),
    ("has been removed", ResolutionKind::Unavailable),
    ("does not exist", ResolutionKind::Unavailable),
    ("timed out", ResolutionKind::Network),
    ("timeout", ResolutionKind::Network),
    ("connection", ResolutionKind::Network),
    ("network", ResolutionKind::Network),
    ("unable to download", ResolutionKind::Network),
    ("temporary failure", ResolutionKind::Network),
    ("http error 429", ResolutionKind::Network),
    ("http error 5", ResolutionKind::Network),
];

impl ResolutionKind {
    /// Maps an upstream failure message onto a category.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        CLASSIFICATION_TABLE
            .iter()
            .find(|(pattern, _)| lower.contains(pattern))
            .map(|(_, kind)| *kind)
            .unwrap_or(ResolutionKind::Unknown)
    }

    /// Network and unknown failures may succeed on a later attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, ResolutionKind::Network | ResolutionKind::Unknown)
    }

    pub fn user_message(self) -> &'static str {
        match self {
            ResolutionKind::Copyright => "🚫 This video is blocked for copyright reasons.",
            ResolutionKind::AgeRestricted => "🔞 This video is age-restricted and cannot be played.",
            ResolutionKind::Private => "🔒 This video is private.",
            ResolutionKind::Unavailable => "❌ This video is unavailable or was removed.",
            ResolutionKind::Network => "🌐 Network problem while fetching the track, try again in a moment.",
            ResolutionKind::PremiumRequired => "💎 This video requires a Premium subscription.",
            ResolutionKind::Unknown => "❓ Could not load this track.",
        }
    }
}

/// Extraction failed for a query or URL.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ResolutionError {
    pub kind: ResolutionKind,
    pub message: String,
}

impl ResolutionError {
    pub fn new(kind: ResolutionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Builds a classified error from any upstream failure.
    pub fn from_upstream(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        Self {
            kind: ResolutionKind::classify(&message),
            message,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

/// Local, recoverable player errors reported to the caller.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("queue is full (max {max} songs)")]
    QueueFull { max: usize },

    #[error("no reference track available for autoplay")]
    NoReference,

    #[error("not connected to a voice channel")]
    NotConnected,

    #[error("nothing is playing")]
    NothingPlaying,

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("voice sink error: {0}")]
    Sink(#[source] anyhow::Error),
}

impl PlayerError {
    /// Text shown to the user who ran the command.
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::QueueFull { max } => format!("📋 The queue is full (max {max} songs)."),
            PlayerError::NoReference => "🎵 Play something first so autoplay has a reference.".to_string(),
            PlayerError::NotConnected => "🔇 I'm not connected to a voice channel.".to_string(),
            PlayerError::NothingPlaying => "❌ Nothing is playing right now.".to_string(),
            PlayerError::Resolution(e) => e.user_message().to_string(),
            PlayerError::Sink(_) => "🔊 Audio error, try again in a moment.".to_string(),
        }
    }
}
