use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity written to `locks.locked_by` by this process.
///
/// Two processes on the same host must never share an id, otherwise one could
/// release or renew the other's lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// `{hostname}-{8 hex chars}`; the suffix keeps sibling processes apart.
    pub fn generate() -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "node".to_string());
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", host.trim(), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().len() > 9);
    }

    #[test]
    fn display_matches_inner() {
        let id = NodeId::from("node-a");
        assert_eq!(id.to_string(), "node-a");
        assert_eq!(id.as_str(), "node-a");
    }
}
