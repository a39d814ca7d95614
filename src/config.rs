//! Repository configuration.

use std::str::FromStr;

/// How strictly in-repository references are enforced on writes and
/// deletes. Recognized as `store.ldp_rs.referential_integrity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefIntegrity {
    /// References are never checked.
    None,
    /// Dangling references are pruned from payloads and logged.
    Lenient,
    /// Dangling references reject the write; deletes always remove inbound
    /// edges.
    Strict,
}

impl FromStr for RefIntegrity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown referential integrity mode: {other}")),
        }
    }
}

/// Repository-level settings consumed by the resource layer.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub referential_integrity: RefIntegrity,
    /// Whether committed change events are dispatched to the sink.
    pub messaging: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            referential_integrity: RefIntegrity::Lenient,
            messaging: true,
        }
    }
}
