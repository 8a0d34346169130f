use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The well-known id of the singleton root node.
pub const ROOT_ID: &str = "n:Root:root";

/// Whether an entity is a node or an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Node,
    Edge,
}

impl EntityKind {
    pub fn prefix(self) -> &'static str {
        match self {
            EntityKind::Node => "n",
            EntityKind::Edge => "e",
        }
    }
}

/// Error produced when parsing a malformed entity id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdError {
    pub raw: String,
}

impl std::fmt::Display for IdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Malformed entity id: {}", self.raw)
    }
}

impl std::error::Error for IdError {}

/// Stable string id of a persisted entity: `<kind>:<Kind>:<uuid>`.
///
/// `<kind>` is `n` for nodes and `e` for edges. The root node is the
/// well-known `n:Root:root`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Mint a fresh id for an entity of the given kind name.
    pub fn generate(kind: EntityKind, kind_name: &str) -> Self {
        Self(format!("{}:{}:{}", kind.prefix(), kind_name, Uuid::new_v4()))
    }

    /// The singleton root node id.
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// Parse and validate a raw id string.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let mut parts = raw.splitn(3, ':');
        let prefix = parts.next().unwrap_or_default();
        let kind_name = parts.next().unwrap_or_default();
        let tail = parts.next().unwrap_or_default();
        let prefix_ok = matches!(prefix, "n" | "e");
        if !prefix_ok || kind_name.is_empty() || tail.is_empty() {
            return Err(IdError {
                raw: raw.to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn kind(&self) -> EntityKind {
        if self.0.starts_with("e:") {
            EntityKind::Edge
        } else {
            EntityKind::Node
        }
    }

    /// The entity-kind name embedded in the id (e.g. `City` in `n:City:...`).
    pub fn kind_name(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_embeds_kind_and_name() {
        let id = EntityId::generate(EntityKind::Node, "City");
        assert!(id.as_str().starts_with("n:City:"));
        assert_eq!(id.kind(), EntityKind::Node);
        assert_eq!(id.kind_name(), "City");

        let id = EntityId::generate(EntityKind::Edge, "Highway");
        assert!(id.as_str().starts_with("e:Highway:"));
        assert_eq!(id.kind(), EntityKind::Edge);
    }

    #[test]
    fn root_id_is_well_known() {
        let root = EntityId::root();
        assert_eq!(root.as_str(), "n:Root:root");
        assert!(root.is_root());
        assert_eq!(root.kind_name(), "Root");
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(EntityId::parse("n:City:abc").is_ok());
        assert!(EntityId::parse("x:City:abc").is_err());
        assert!(EntityId::parse("n:City").is_err());
        assert!(EntityId::parse("n::abc").is_err());
        assert!(EntityId::parse("").is_err());
    }

    #[test]
    fn serde_round_trip_is_a_plain_string() {
        let id = EntityId::root();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"n:Root:root\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
