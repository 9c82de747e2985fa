//! Channel identifiers: `scope:type[:id]` strings, parsed into a tagged value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed channel identifier. Serialized form is `scope:type` or
/// `scope:type:id` (system channels carry no id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Channel {
    Agent { kind: AgentChannelKind, agent_id: String },
    Workspace { kind: WorkspaceChannelKind, workspace_id: String },
    User { kind: UserChannelKind, user_id: String },
    System { kind: SystemChannelKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentChannelKind {
    Output,
    State,
    Tools,
    Checkpoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceChannelKind {
    Agents,
    Git,
    Reservations,
    Conflicts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserChannelKind {
    Mail,
    Notifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemChannelKind {
    Health,
    Maintenance,
}

/// Scope of a channel, used for capacity tables and authorization dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelScope {
    Agent,
    Workspace,
    User,
    System,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelParseError {
    #[error("channel string is empty")]
    Empty,
    #[error("unknown scope: {0}")]
    UnknownScope(String),
    #[error("unknown type {0:?} for scope {1:?}")]
    UnknownType(String, String),
    #[error("missing id for scope {0:?}")]
    MissingId(String),
    #[error("system channels do not take an id")]
    UnexpectedId,
    #[error("malformed channel string: {0:?}")]
    Malformed(String),
}

impl Channel {
    /// Total parse: every input returns `Ok` or a typed `ChannelParseError`.
    pub fn parse(s: &str) -> Result<Self, ChannelParseError> {
        if s.is_empty() {
            return Err(ChannelParseError::Empty);
        }
        let mut parts = s.split(':');
        let scope = parts.next().ok_or_else(|| ChannelParseError::Malformed(s.to_string()))?;
        let kind = parts.next().ok_or_else(|| ChannelParseError::Malformed(s.to_string()))?;
        let id = parts.next();
        if parts.next().is_some() {
            return Err(ChannelParseError::Malformed(s.to_string()));
        }

        match scope {
            "agent" => {
                let kind = match kind {
                    "output" => AgentChannelKind::Output,
                    "state" => AgentChannelKind::State,
                    "tools" => AgentChannelKind::Tools,
                    "checkpoints" => AgentChannelKind::Checkpoints,
                    other => return Err(ChannelParseError::UnknownType(other.to_string(), scope.to_string())),
                };
                let agent_id = id.ok_or(ChannelParseError::MissingId("agent".to_string()))?;
                Ok(Channel::Agent { kind, agent_id: agent_id.to_string() })
            }
            "workspace" => {
                let kind = match kind {
                    "agents" => WorkspaceChannelKind::Agents,
                    "git" => WorkspaceChannelKind::Git,
                    "reservations" => WorkspaceChannelKind::Reservations,
                    "conflicts" => WorkspaceChannelKind::Conflicts,
                    other => return Err(ChannelParseError::UnknownType(other.to_string(), scope.to_string())),
                };
                let workspace_id = id.ok_or(ChannelParseError::MissingId("workspace".to_string()))?;
                Ok(Channel::Workspace { kind, workspace_id: workspace_id.to_string() })
            }
            "user" => {
                let kind = match kind {
                    "mail" => UserChannelKind::Mail,
                    "notifications" => UserChannelKind::Notifications,
                    other => return Err(ChannelParseError::UnknownType(other.to_string(), scope.to_string())),
                };
                let user_id = id.ok_or(ChannelParseError::MissingId("user".to_string()))?;
                Ok(Channel::User { kind, user_id: user_id.to_string() })
            }
            "system" => {
                let kind = match kind {
                    "health" => SystemChannelKind::Health,
                    "maintenance" => SystemChannelKind::Maintenance,
                    other => return Err(ChannelParseError::UnknownType(other.to_string(), scope.to_string())),
                };
                if id.is_some() {
                    return Err(ChannelParseError::UnexpectedId);
                }
                Ok(Channel::System { kind })
            }
            other => Err(ChannelParseError::UnknownScope(other.to_string())),
        }
    }

    pub fn scope(&self) -> ChannelScope {
        match self {
            Channel::Agent { .. } => ChannelScope::Agent,
            Channel::Workspace { .. } => ChannelScope::Workspace,
            Channel::User { .. } => ChannelScope::User,
            Channel::System { .. } => ChannelScope::System,
        }
    }

    /// Constructs the `system:maintenance` or `system:health` channel
    /// directly, for internal callers (the maintenance coordinator) that
    /// never need to round-trip through string parsing.
    pub fn system(kind: &str) -> Self {
        Channel::parse(&format!("system:{kind}")).expect("system channel kind is valid")
    }

    /// The scope:type prefix used for ring buffer capacity lookup, e.g. `agent:output`.
    pub fn capacity_prefix(&self) -> String {
        match self {
            Channel::Agent { kind, .. } => format!("agent:{}", kind.as_str()),
            Channel::Workspace { kind, .. } => format!("workspace:{}", kind.as_str()),
            Channel::User { kind, .. } => format!("user:{}", kind.as_str()),
            Channel::System { kind } => format!("system:{}", kind.as_str()),
        }
    }
}

impl AgentChannelKind {
    fn as_str(&self) -> &'static str {
        match self {
            AgentChannelKind::Output => "output",
            AgentChannelKind::State => "state",
            AgentChannelKind::Tools => "tools",
            AgentChannelKind::Checkpoints => "checkpoints",
        }
    }
}

impl WorkspaceChannelKind {
    fn as_str(&self) -> &'static str {
        match self {
            WorkspaceChannelKind::Agents => "agents",
            WorkspaceChannelKind::Git => "git",
            WorkspaceChannelKind::Reservations => "reservations",
            WorkspaceChannelKind::Conflicts => "conflicts",
        }
    }
}

impl UserChannelKind {
    fn as_str(&self) -> &'static str {
        match self {
            UserChannelKind::Mail => "mail",
            UserChannelKind::Notifications => "notifications",
        }
    }
}

impl SystemChannelKind {
    fn as_str(&self) -> &'static str {
        match self {
            SystemChannelKind::Health => "health",
            SystemChannelKind::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Agent { kind, agent_id } => write!(f, "agent:{}:{}", kind.as_str(), agent_id),
            Channel::Workspace { kind, workspace_id } => {
                write!(f, "workspace:{}:{}", kind.as_str(), workspace_id)
            }
            Channel::User { kind, user_id } => write!(f, "user:{}:{}", kind.as_str(), user_id),
            Channel::System { kind } => write!(f, "system:{}", kind.as_str()),
        }
    }
}

impl TryFrom<String> for Channel {
    type Error = ChannelParseError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Channel::parse(&value)
    }
}

impl From<Channel> for String {
    fn from(c: Channel) -> Self {
        c.to_string()
    }
}

impl std::str::FromStr for Channel {
    type Err = ChannelParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_scopes() {
        for s in [
            "agent:output:a1",
            "agent:state:a1",
            "agent:tools:a1",
            "agent:checkpoints:a1",
            "workspace:agents:w1",
            "workspace:git:w1",
            "workspace:reservations:w1",
            "workspace:conflicts:w1",
            "user:mail:u1",
            "user:notifications:u1",
            "system:health",
            "system:maintenance",
        ] {
            let parsed = Channel::parse(s).expect("parses");
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn rejects_unknown_scope() {
        assert!(matches!(Channel::parse("bogus:output:a1"), Err(ChannelParseError::UnknownScope(_))));
    }

    #[test]
    fn rejects_missing_id() {
        assert!(matches!(Channel::parse("agent:output"), Err(ChannelParseError::MissingId(_))));
    }

    #[test]
    fn rejects_system_with_id() {
        assert!(matches!(Channel::parse("system:health:x"), Err(ChannelParseError::UnexpectedId)));
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(Channel::parse(""), Err(ChannelParseError::Empty)));
    }

    #[test]
    fn parse_is_total_never_panics() {
        for s in ["", ":", "a:b:c:d", "agent::", "::"] {
            let _ = Channel::parse(s);
        }
    }
}
