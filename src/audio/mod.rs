//! # Audio
//!
//! Per-guild playback: the [`queue`] and [`player`] state, the voice
//! [`sink`] abstraction over songbird, volume [`fade`]s and the
//! [`engine`] that hands one track over to the next.
//!
//! Tracks are resolved to streamable URLs by the [`resolver`] before they
//! reach the sink. Completions flow back to the engine over a channel and
//! carry the generation of the track they belong to.

pub mod engine;
pub mod fade;
pub mod player;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod sink;
pub mod song;
