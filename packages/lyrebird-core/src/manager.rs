//! Process-wide registry of per-guild [`Player`]s.
//!
//! A concurrent map keyed by tenant id, with lazy creation on first
//! reference and an explicit removal path for teardown. Cache, Resolver,
//! and Extractor are shared process-wide (one instance each); every other
//! piece of state is per-guild.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::extractor::Extractor;
use crate::ids::GuildId;
use crate::player::Player;
use crate::resolver::Resolver;
use crate::runtime::TaskSpawner;
use crate::voice::VoiceTransport;

/// Owns every guild's [`Player`] plus the process-wide collaborators they
/// share ("The Manager (process-wide) lazily creates Players").
pub struct EngineManager {
    players: DashMap<GuildId, Arc<Player>>,
    resolver: Arc<Resolver>,
    extractor: Arc<dyn Extractor>,
    cache: Arc<Cache>,
    config: EngineConfig,
    spawner: Arc<dyn TaskSpawner>,
}

impl EngineManager {
    #[must_use]
    pub fn new(
        resolver: Arc<Resolver>,
        extractor: Arc<dyn Extractor>,
        cache: Arc<Cache>,
        config: EngineConfig,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Self {
            players: DashMap::new(),
            resolver,
            extractor,
            cache,
            config,
            spawner,
        }
    }

    /// Returns the guild's player, constructing one on first reference.
    /// `voice` is only consulted for a fresh construction; an already-live
    /// player keeps whichever voice handle it was created with.
    pub fn player_for(&self, guild_id: GuildId, voice: Arc<dyn VoiceTransport>) -> Arc<Player> {
        if let Some(existing) = self.players.get(&guild_id) {
            return Arc::clone(existing.value());
        }
        let player = Arc::new(Player::new(
            guild_id,
            voice,
            Arc::clone(&self.resolver),
            Arc::clone(&self.extractor),
            Arc::clone(&self.cache),
            self.config.clone(),
            Arc::clone(&self.spawner),
        ));
        Arc::clone(
            self.players
                .entry(guild_id)
                .or_insert(player)
                .value(),
        )
    }

    #[must_use]
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.get(&guild_id).map(|p| Arc::clone(p.value()))
    }

    /// Stops and discards the guild's player, if one exists.
    pub fn remove(&self, guild_id: GuildId) {
        if let Some((_, player)) = self.players.remove(&guild_id) {
            let _ = player.disconnect();
        }
    }

    #[must_use]
    pub fn guild_count(&self) -> usize {
        self.players.len()
    }

    /// Stops every player, for process-wide shutdown.
    pub async fn shutdown_all(&self) {
        let guild_ids: Vec<GuildId> = self.players.iter().map(|entry| *entry.key()).collect();
        info!(target: "lyrebird_core::manager", count = guild_ids.len(), "shutting down all players");
        for guild_id in guild_ids {
            self.remove(guild_id);
        }
    }
}
