use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier minted by the entity store for accounts, apps, deployments,
/// and access keys.
///
/// Identifiers are rendered as `id_{n}` where `n` comes from a monotonically
/// increasing counter owned by one store instance. Records built by callers
/// carry an unassigned (empty) id until the store mints one.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Render the id for counter value `n`.
    pub fn from_sequence(n: u64) -> Self {
        Self(format!("id_{n}"))
    }

    /// Placeholder carried by records that have not been added yet.
    pub fn unassigned() -> Self {
        Self(String::new())
    }

    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }

    /// Counter value encoded in the id, if it uses the `id_{n}` format.
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix("id_")?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_format() {
        let id = EntityId::from_sequence(42);
        assert_eq!(id.as_str(), "id_42");
        assert_eq!(id.sequence(), Some(42));
        assert_eq!(id.to_string(), "id_42");
    }

    #[test]
    fn unassigned_is_empty() {
        let id = EntityId::unassigned();
        assert!(id.is_unassigned());
        assert_eq!(id.sequence(), None);
        assert!(!EntityId::from_sequence(0).is_unassigned());
    }

    #[test]
    fn foreign_format_has_no_sequence() {
        assert_eq!(EntityId::from("acct-7").sequence(), None);
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&EntityId::from_sequence(3)).unwrap();
        assert_eq!(json, "\"id_3\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EntityId::from_sequence(3));
    }
}
