//! Opaque identifier newtypes.
//!
//! Using typed wrappers instead of bare `u64`/`String` keys prevents guild
//! ids and user ids from being accidentally swapped at call sites.

use std::fmt;

/// Identifies a guild (tenant/server) — the unit of isolation for queues,
/// schedulers, and voice connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuildId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GuildId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifies the user who requested a track, carried for attribution only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guild_id_displays_as_number() {
        assert_eq!(GuildId(42).to_string(), "42");
    }

    #[test]
    fn user_id_from_str() {
        let id: UserId = "alice".into();
        assert_eq!(id.0, "alice");
    }

    #[test]
    fn distinct_ids_are_not_interchangeable() {
        let guild = GuildId(1);
        let user: UserId = "1".into();
        assert_ne!(guild.to_string(), format!("{:?}", user));
    }
}
