//! Lyrebird core - shared library for the per-guild audio playback engine.
//!
//! This crate owns the playback-side internals of a multi-tenant chat
//! platform music bot: resolving queries into tracks, driving one
//! independent play-loop actor per guild, transcoding and packetizing
//! audio, and caching downloaded containers across plays. It does not
//! implement the command transport, the voice socket, or either external
//! helper binary (extractor, transcoder) — those are collaborators reached
//! through traits defined here.
//!
//! # Architecture
//!
//! - [`cache`]: content-addressed on-disk store with LRU eviction and
//!   single-flight producer registration
//! - [`track`]: the immutable track descriptor
//! - [`queue`]: per-guild ordered track list with cursor/loop/shuffle
//! - [`extractor`]: the external media-metadata/download subprocess contract
//! - [`resolver`]: turns a query into playable tracks
//! - [`encoder`]: the streaming transcoder → compressed-frame pipeline
//! - [`voice`]: the external voice transport seam
//! - [`player`]: per-guild scheduler, frame pump, and command façade
//! - [`manager`]: process-wide registry of per-guild players
//! - [`config`]: process-wide tunables
//! - [`error`]: centralized error taxonomy
//! - [`runtime`]: task-spawning abstraction for async runtime independence
//! - [`ids`]: opaque guild/user identifier newtypes

#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod encoder;
pub mod error;
pub mod extractor;
pub mod ids;
pub mod manager;
pub mod player;
pub mod queue;
pub mod resolver;
pub mod runtime;
pub mod track;
pub mod voice;

pub use cache::{Cache, CacheStats};
pub use config::EngineConfig;
pub use encoder::{Encoder, EncoderParams, SourceLocator};
pub use error::{EngineError, EngineResult, Severity};
pub use extractor::{Extractor, ExtractedInfo, Format, PlaylistEntry, ProcessExtractor};
pub use ids::{GuildId, UserId};
pub use manager::EngineManager;
pub use player::{Player, PlayerPhase, Volume};
pub use queue::Queue;
pub use resolver::{CrossCatalogClient, CrossCatalogItem, CrossCatalogKind, CrossCatalogRef, Resolver, ResolverTimeouts};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use track::{Track, TrackSource};
pub use voice::{RecordingVoiceTransport, VoiceError, VoiceTransport};
