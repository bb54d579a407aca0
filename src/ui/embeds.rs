use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::audio::queue::{LoopMode, QueueSnapshot};
use crate::audio::resolver::PlaylistResolution;
use crate::audio::song::Song;
use crate::cache::CacheStats;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Melodia";

const QUEUE_PAGE_SIZE: usize = 10;

fn requester_label(song: &Song) -> String {
    match &song.requester {
        Some(requester) => format!("<@{}>", requester.id),
        None => "🤖 Autoplay".to_string(),
    }
}

fn song_embed(song: &Song) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .description(format!("**{}**", song.title))
        .field("🎤 Channel", &song.uploader, true)
        .field("⏱️ Duration", song.duration_display(), true)
        .field("👤 Requested by", requester_label(song), true)
        .url(&song.url)
        .timestamp(Timestamp::now());

    if let Some(thumbnail) = &song.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    embed
}

pub fn now_playing_embed(song: &Song) -> CreateEmbed {
    song_embed(song)
        .title("🎵 Now playing")
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// `position` is `None` when the song started right away.
pub fn track_added_embed(song: &Song, position: Option<usize>) -> CreateEmbed {
    match position {
        None => now_playing_embed(song),
        Some(position) => song_embed(song)
            .title("✅ Added to the queue")
            .field("📋 Position", position.to_string(), true)
            .color(colors::SUCCESS_GREEN)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER)),
    }
}

pub fn playlist_embed(result: &PlaylistResolution) -> CreateEmbed {
    let added = result.processed.saturating_sub(result.failed);
    let (title, color) = if result.cancelled {
        ("🚫 Playlist cancelled", colors::WARNING_ORANGE)
    } else if added == 0 {
        ("❌ Playlist could not be loaded", colors::ERROR_RED)
    } else {
        ("📋 Playlist loaded", colors::SUCCESS_GREEN)
    };

    let mut embed = CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", result.title))
        .field("✅ Added", added.to_string(), true)
        .field("❌ Failed", result.failed.to_string(), true)
        .field("📊 Listed", result.total.to_string(), true)
        .color(color)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    if !result.errors.is_empty() {
        let errors: Vec<String> = result.errors.iter().take(3).map(|e| format!("• {e}")).collect();
        embed = embed.field("⚠️ Errors", errors.join("\n"), false);
    }
    embed
}

/// Crea un embed para mostrar la cola de reproducción
pub fn queue_embed(snapshot: &QueueSnapshot, page: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if snapshot.items.is_empty() && snapshot.current.is_none() {
        return embed
            .description("😴 **The queue is empty**\n\n💡 Use `/play <song>` to add music")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &snapshot.current {
        let status = match snapshot.loop_mode {
            LoopMode::Single => "🔂",
            LoopMode::Queue => "🔁",
            LoopMode::Off => "▶️",
        };
        embed = embed.field(
            format!("{status} Playing"),
            format!("**{}** `[{}]`", current.title, current.duration_display()),
            false,
        );
    }

    let queue_page = snapshot.page(page, QUEUE_PAGE_SIZE);
    if !queue_page.items.is_empty() {
        let lines: Vec<String> = queue_page
            .items
            .iter()
            .enumerate()
            .map(|(i, song)| {
                let marker = if song.is_autoplay() { " 🤖" } else { "" };
                format!(
                    "**{}**. {} `[{}]`{}",
                    queue_page.offset + i + 1,
                    song.title,
                    song.duration_display(),
                    marker
                )
            })
            .collect();
        embed = embed.field("Up next", lines.join("\n"), false);
    }

    let mut info = format!("**Total:** {} songs", snapshot.items.len());
    if snapshot.total_duration > 0 {
        info.push_str(&format!(" • **Length:** {}", format_duration(snapshot.total_duration)));
    }
    info.push_str(&format!(" • **Loop:** {}", snapshot.loop_mode.label()));
    if snapshot.autoplay {
        info.push_str(" • 🤖 **Autoplay**");
    }
    embed = embed.field("Info", info, false);

    let footer = if queue_page.total_pages > 1 {
        format!(
            "Page {} of {} • Melodia",
            queue_page.current_page, queue_page.total_pages
        )
    } else {
        STANDARD_FOOTER.to_string()
    };
    embed.footer(CreateEmbedFooter::new(footer)).timestamp(Timestamp::now())
}

pub fn stats_embed(quota_report: String, cache: &CacheStats, active_players: usize) -> CreateEmbed {
    CreateEmbed::default()
        .title("📊 Melodia stats")
        .description(quota_report)
        .field(
            "💾 Video cache",
            format!(
                "{} / {} entries\n{:.1}% hit rate ({} requests)",
                cache.size, cache.max_size, cache.hit_rate, cache.total_requests
            ),
            true,
        )
        .field("🎛️ Active players", active_players.to_string(), true)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de error
pub fn error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Formatea una duración en segundos
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
