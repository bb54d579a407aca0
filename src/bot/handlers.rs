use anyhow::Result;
use serenity::{
    builder::{CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Duration;
use tracing::{info, warn};

use crate::audio::engine::AddOutcome;
use crate::audio::queue::LoopMode;
use crate::audio::song::Requester;
use crate::bot::MelodiaBot;
use crate::error::PlayerError;
use crate::sources::is_playlist_url;
use crate::ui::embeds;

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MelodiaBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "playlist" => handle_playlist(ctx, &command, bot, guild_id).await,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await,
        "pause" => handle_pause(ctx, &command, bot, guild_id).await,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await,
        "volume" => handle_volume(ctx, &command, bot, guild_id).await,
        "shuffle" => handle_shuffle(ctx, &command, bot, guild_id).await,
        "loop" => handle_loop(ctx, &command, bot, guild_id).await,
        "clear" => handle_clear(ctx, &command, bot, guild_id).await,
        "autoplay" => handle_autoplay(ctx, &command, bot, guild_id).await,
        "crossfade" => handle_crossfade(ctx, &command, bot, guild_id).await,
        "cancel" => handle_cancel(ctx, &command, bot, guild_id).await,
        "stats" => handle_stats(ctx, &command, bot).await,
        "leave" => handle_leave(ctx, &command, bot, guild_id).await,
        _ => reply_ephemeral(ctx, &command, "❌ Unknown command").await,
    }
}

// Respuestas

async fn reply(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().content(content)),
        )
        .await?;
    Ok(())
}

async fn reply_ephemeral(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content).ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn reply_embed(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn edit_embed(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

// Opciones

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn bool_option(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_bool())
}

fn requester(command: &CommandInteraction) -> Requester {
    let name = command
        .user
        .global_name
        .clone()
        .unwrap_or_else(|| command.user.name.clone());
    Requester::new(command.user.id, name)
}

fn parse_loop_mode(value: &str) -> LoopMode {
    match value {
        "single" => LoopMode::Single,
        "queue" => LoopMode::Queue,
        _ => LoopMode::Off,
    }
}

// Reproducción

/// Defers, makes sure the bot is in the caller's voice channel and reports
/// a failure on the deferred response. Returns `false` when it failed.
async fn prepare_voice(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<bool> {
    defer(ctx, command).await?;

    let channel_id = match get_user_voice_channel(ctx, guild_id, command.user.id) {
        Ok(channel_id) => channel_id,
        Err(e) => {
            edit_embed(ctx, command, embeds::error_embed(&e.to_string())).await?;
            return Ok(false);
        }
    };

    if let Err(e) = bot.join_voice_channel(ctx, guild_id, channel_id).await {
        warn!("⚠️ No se pudo entrar al canal de voz: {:?}", e);
        edit_embed(ctx, command, embeds::error_embed("🔇 Could not join your voice channel.")).await?;
        return Ok(false);
    }
    Ok(true)
}

async fn handle_play(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    let query = string_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    if !prepare_voice(ctx, command, bot, guild_id).await? {
        return Ok(());
    }

    if is_playlist_url(&query) {
        return load_playlist(ctx, command, bot, guild_id, &query).await;
    }

    let song = match bot.engine.resolver().resolve(&query, Some(requester(command))).await {
        Ok(song) => song,
        Err(e) => {
            warn!("⚠️ No se pudo resolver '{}': {}", query, e);
            return edit_embed(ctx, command, embeds::error_embed(e.user_message())).await;
        }
    };

    let embed = match bot.engine.add(guild_id, song).await {
        Ok(AddOutcome::Playing(song)) => embeds::track_added_embed(&song, None),
        Ok(AddOutcome::Queued { song, position }) => embeds::track_added_embed(&song, Some(position)),
        Err(e) => embeds::error_embed(&e.user_message()),
    };
    edit_embed(ctx, command, embed).await
}

async fn handle_playlist(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    let url = string_option(command, "url")
        .ok_or_else(|| anyhow::anyhow!("URL no proporcionada"))?
        .to_string();

    if !prepare_voice(ctx, command, bot, guild_id).await? {
        return Ok(());
    }
    load_playlist(ctx, command, bot, guild_id, &url).await
}

async fn load_playlist(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MelodiaBot,
    guild_id: GuildId,
    url: &str,
) -> Result<()> {
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().content("📋 Loading playlist... use `/cancel` to stop"),
        )
        .await?;

    let embed = match bot.engine.add_playlist(guild_id, url, Some(requester(command))).await {
        Ok(result) => embeds::playlist_embed(&result),
        Err(e) => embeds::error_embed(&e.user_message()),
    };
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content("").embed(embed))
        .await?;
    Ok(())
}

async fn handle_skip(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    match bot.engine.skip(guild_id).await {
        Ok(song) => reply(ctx, command, format!("⏭️ Skipped **{}**", song.title)).await,
        Err(e) => reply_ephemeral(ctx, command, e.user_message()).await,
    }
}

async fn handle_pause(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    match bot.engine.toggle_pause(guild_id).await {
        Ok(true) => reply(ctx, command, "⏸️ Paused").await,
        Ok(false) => reply(ctx, command, "▶️ Resumed").await,
        Err(e) => reply_ephemeral(ctx, command, e.user_message()).await,
    }
}

async fn handle_stop(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    match bot.engine.stop(guild_id).await {
        Ok(()) => reply(ctx, command, "⏹️ Playback stopped and queue cleared").await,
        Err(e) => reply_ephemeral(ctx, command, e.user_message()).await,
    }
}

// Cola

async fn handle_queue(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    let page = int_option(command, "page").unwrap_or(1).max(1) as usize;
    let snapshot = bot.engine.queue_snapshot(guild_id).await;
    reply_embed(ctx, command, embeds::queue_embed(&snapshot, page)).await
}

async fn handle_nowplaying(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    match bot.engine.now_playing(guild_id).await {
        Some(song) => reply_embed(ctx, command, embeds::now_playing_embed(&song)).await,
        None => reply_ephemeral(ctx, command, PlayerError::NothingPlaying.user_message()).await,
    }
}

async fn handle_shuffle(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    let count = bot.engine.shuffle(guild_id).await;
    reply(ctx, command, format!("🔀 Shuffled {count} songs")).await
}

async fn handle_loop(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    let mode = parse_loop_mode(string_option(command, "mode").unwrap_or("off"));
    bot.engine.set_loop_mode(guild_id, mode).await;
    reply(ctx, command, format!("Loop mode: {}", mode.label())).await
}

async fn handle_clear(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    let removed = bot.engine.clear_queue(guild_id).await;
    reply(ctx, command, format!("🗑️ Removed {removed} songs from the queue")).await
}

async fn handle_cancel(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    bot.engine.cancel_playlist(guild_id).await;
    reply(ctx, command, "🚫 Playlist loading will stop after the current batch").await
}

// Audio

async fn handle_volume(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    let level = int_option(command, "level").unwrap_or(50).clamp(0, 100);
    match bot.engine.set_volume(guild_id, level as f32 / 100.0).await {
        Ok(volume) => reply(ctx, command, format!("🔊 Volume set to {:.0}%", volume * 100.0)).await,
        Err(e) => reply_ephemeral(ctx, command, e.user_message()).await,
    }
}

async fn handle_autoplay(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    let enabled = bot.engine.toggle_autoplay(guild_id).await;
    let message = if enabled {
        "🤖 Autoplay enabled, I'll keep the music going when the queue runs out"
    } else {
        "⏹️ Autoplay disabled"
    };
    reply(ctx, command, message).await
}

async fn handle_crossfade(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    let enabled = bool_option(command, "enabled").unwrap_or(true);
    let duration = int_option(command, "seconds").map(|s| Duration::from_secs(s.clamp(1, 30) as u64));
    let duration = bot.engine.set_crossfade(guild_id, enabled, duration).await;

    let message = if enabled {
        format!("🎚️ Crossfade enabled ({}s)", duration.as_secs())
    } else {
        "🎚️ Crossfade disabled".to_string()
    };
    reply(ctx, command, message).await
}

// Otros

async fn handle_stats(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot) -> Result<()> {
    let embed = embeds::stats_embed(bot.quota.format_stats(), &bot.cache.stats(), bot.engine.registry().len());
    reply_embed(ctx, command, embed).await
}

async fn handle_leave(ctx: &Context, command: &CommandInteraction, bot: &MelodiaBot, guild_id: GuildId) -> Result<()> {
    bot.engine.remove_player(guild_id, true).await;
    reply(ctx, command, "👋 Left the voice channel").await
}

// Funciones auxiliares

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("🎧 Join a voice channel first."))?;

    Ok(channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn loop_choices_map_to_modes() {
        assert_eq!(parse_loop_mode("single"), LoopMode::Single);
        assert_eq!(parse_loop_mode("queue"), LoopMode::Queue);
        assert_eq!(parse_loop_mode("off"), LoopMode::Off);
        assert_eq!(parse_loop_mode("anything"), LoopMode::Off);
    }
}
