//! Discord embeds rendered by the command handlers.

pub mod embeds;
