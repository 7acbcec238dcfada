/**
 * MODELS - Types partagés du kernel fleet
 *
 * RÔLE : Identités (node, connexion, commande), état des nodes et cycle de vie des commandes.
 * Les nodes et commandes appartiennent aux stores ; le coeur ne manipule que leurs identités.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identité opaque d'un node (ex: MAC sans colons, a1b2c3d4e5f6)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifiant de session transport, valide tant que le canal est ouvert
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Maintenance,
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Maintenance => "maintenance",
            NodeStatus::Error => "error",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node géré, tel que vu par le store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    pub status: NodeStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    pub os: Option<String>,                 // linux, windows, android, macos
    pub architecture: Option<String>,       // x86_64, aarch64...
    pub version: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, hostname: impl Into<String>, last_seen_at: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            status: NodeStatus::Online,
            last_seen_at,
            os: None,
            architecture: None,
            version: None,
            registered_at: last_seen_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Shutdown,
    Reboot,
    Hibernate,
    KillProcess,
    RunCommand,
    GetMetrics,
    Ping,
}

impl CommandKind {
    /// Seules les commandes sans effet système peuvent être annulées avant envoi
    pub fn is_cancellable(&self) -> bool {
        matches!(self, CommandKind::RunCommand | CommandKind::Ping)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Queued,
    Sent,
    InProgress,
    Success,
    Failed,
    Cancelled,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Queued => "queued",
            CommandStatus::Sent => "sent",
            CommandStatus::InProgress => "in_progress",
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
            CommandStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Success | CommandStatus::Failed | CommandStatus::Cancelled
        )
    }

    /// Transitions acceptées depuis un rapport d'agent
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        use CommandStatus::*;
        match (self, next) {
            (Queued, Sent) | (Queued, Failed) | (Queued, Cancelled) => true,
            (Sent, InProgress) | (Sent, Success) | (Sent, Failed) => true,
            (InProgress, Success) | (InProgress, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub node_id: NodeId,
    pub kind: CommandKind,
    pub payload: Option<serde_json::Value>,
    pub status: CommandStatus,
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub sent_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Command {
    pub fn new(node_id: impl Into<NodeId>, kind: CommandKind, payload: Option<serde_json::Value>) -> Self {
        Self {
            id: CommandId::new_v4(),
            node_id: node_id.into(),
            kind,
            payload,
            status: CommandStatus::Queued,
            attempts: 0,
            created_at: OffsetDateTime::now_utc(),
            sent_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_transitions() {
        assert!(CommandStatus::Queued.can_transition_to(CommandStatus::Sent));
        assert!(CommandStatus::Sent.can_transition_to(CommandStatus::Success));
        assert!(!CommandStatus::Success.can_transition_to(CommandStatus::Sent));
        assert!(!CommandStatus::Sent.can_transition_to(CommandStatus::Queued));
        assert!(!CommandStatus::Cancelled.can_transition_to(CommandStatus::Queued));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&CommandStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let status: NodeStatus = serde_json::from_str("\"maintenance\"").unwrap();
        assert_eq!(status, NodeStatus::Maintenance);
    }

    #[test]
    fn test_node_id_is_transparent() {
        let id = NodeId::from("a1b2c3d4e5f6");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a1b2c3d4e5f6\"");
        assert_eq!(id.to_string(), "a1b2c3d4e5f6");
    }
}
