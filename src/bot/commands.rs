use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Every slash command the bot answers.
pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        playlist_command(),
        skip_command(),
        pause_command(),
        stop_command(),
        queue_command(),
        nowplaying_command(),
        volume_command(),
        shuffle_command(),
        loop_command(),
        clear_command(),
        autoplay_command(),
        crossfade_command(),
        cancel_command(),
        stats_command(),
        leave_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

// Reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a song from a YouTube URL or a search")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL or search terms")
                .required(true),
        )
}

fn playlist_command() -> CreateCommand {
    CreateCommand::new("playlist")
        .description("Load a whole YouTube playlist")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "url", "Playlist URL")
                .required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current song")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause or resume playback")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback and empty the queue")
}

// Cola

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Show the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Page number")
                .min_int_value(1),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Show the current song")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Shuffle the queue")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop")
        .description("Set the repeat mode")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "mode", "Repeat mode")
                .add_string_choice("Off", "off")
                .add_string_choice("Song", "single")
                .add_string_choice("Queue", "queue")
                .required(true),
        )
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Empty the queue, the current song keeps playing")
}

fn cancel_command() -> CreateCommand {
    CreateCommand::new("cancel").description("Stop loading the current playlist")
}

// Audio

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Set the playback volume")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Volume (0-100)")
                .min_int_value(0)
                .max_int_value(100)
                .required(true),
        )
}

fn crossfade_command() -> CreateCommand {
    CreateCommand::new("crossfade")
        .description("Configure fades between songs")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Boolean, "enabled", "Enable crossfade")
                .required(true),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "seconds", "Fade length in seconds")
                .min_int_value(1)
                .max_int_value(30),
        )
}

fn autoplay_command() -> CreateCommand {
    CreateCommand::new("autoplay").description("Toggle AI autoplay when the queue runs out")
}

// Otros

fn stats_command() -> CreateCommand {
    CreateCommand::new("stats").description("Show API quota and cache usage")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Leave the voice channel")
}
