//! Core types for the lobby runtime
//!
//! Identifiers, lifecycle enums, game descriptors, the JSON wire format and the
//! error taxonomy shared by the runtime, the game modules and the service binary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Core Identifiers
// ============================================================================

/// Identity of one live transport connection.
///
/// Stable for the lifetime of the connection and sent to the client right after
/// the handshake so page scripts can refer to themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Characters used for join codes. Ambiguous glyphs (0/O, 1/I) are left out.
pub const DEFAULT_CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated join code.
pub const DEFAULT_CODE_LENGTH: usize = 4;

/// Short, human-typeable join code of a lobby.
///
/// Codes are stored uppercase; [`LobbyCode::new`] normalizes its input so that
/// lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyCode(String);

impl LobbyCode {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LobbyCode {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Handle of a timer scheduled by a game module, unique within its lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

// ============================================================================
// Roles and Lifecycle
// ============================================================================

/// The part a connection plays inside its lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// The shared display (TV) that created the lobby.
    Host,
    /// A controller belonging to one participant.
    Player,
}

/// Lifecycle status of a lobby. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LobbyStatus {
    /// `on_init` has run, nobody has joined yet.
    Created,
    /// At least one player joined; actions are being processed.
    Running,
    /// Terminal. `on_end` ran and every resource has been released.
    Ended,
}

impl fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LobbyStatus::Created => "created",
            LobbyStatus::Running => "running",
            LobbyStatus::Ended => "ended",
        };
        f.write_str(label)
    }
}

/// The module hooks a lobby's dispatch unit can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hook {
    Init,
    PlayerJoin,
    PlayerLeave,
    Action,
    Timer,
    End,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Init => "onInit",
            Hook::PlayerJoin => "onPlayerJoin",
            Hook::PlayerLeave => "onPlayerLeave",
            Hook::Action => "onAction",
            Hook::Timer => "onTimer",
            Hook::End => "onEnd",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Game Descriptors
// ============================================================================

/// What happens to a lobby when its host connection leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostLeavePolicy {
    /// The lobby ends and every remaining player is told so.
    #[default]
    EndLobby,
    /// Players keep playing without a host display.
    KeepRunning,
}

/// Static description every game module exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDescriptor {
    pub id: String,
    pub name: String,
    pub min_players: usize,
    /// `None` means the module places no upper bound on the roster.
    pub max_players: Option<usize>,
    pub description: String,
    #[serde(default)]
    pub host_leave: HostLeavePolicy,
}

impl GameDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            min_players: 1,
            max_players: None,
            description: String::new(),
            host_leave: HostLeavePolicy::default(),
        }
    }

    pub fn players(mut self, min: usize, max: impl Into<Option<usize>>) -> Self {
        self.min_players = min;
        self.max_players = max.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn host_leave(mut self, policy: HostLeavePolicy) -> Self {
        self.host_leave = policy;
        self
    }
}

// ============================================================================
// Roster and Inspection
// ============================================================================

/// Runtime roster entry for one joined player.
///
/// Refers to its connection by id only; the registry owns the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: ConnectionId,
    pub name: String,
    pub joined_at: u64,
}

/// Read-only view of a lobby, produced by its dispatch unit on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    pub code: LobbyCode,
    pub game_id: String,
    pub status: LobbyStatus,
    pub host: Option<ConnectionId>,
    pub players: Vec<PlayerRecord>,
    /// Whatever the module chose to expose through `snapshot()`.
    pub state: Value,
}

// ============================================================================
// Wire Messages
// ============================================================================

/// Raw client frame: `{ "event": ..., "payload": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLobbyPayload {
    game_id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JoinLobbyPayload {
    code: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ActionPayload {
    code: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct CodePayload {
    code: String,
}

/// A parsed, validated client request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    CreateLobby { game_id: String, name: Option<String> },
    JoinLobby { code: LobbyCode, name: String },
    Action { code: LobbyCode, data: Value },
    LeaveLobby,
    EndLobby { code: LobbyCode },
    ListGames,
    Ping,
}

impl ClientRequest {
    /// Parses a text frame into a request.
    pub fn parse(text: &str) -> Result<Self, LobbyError> {
        let message: ClientMessage = serde_json::from_str(text)
            .map_err(|e| LobbyError::InvalidMessage(format!("Invalid JSON: {e}")))?;
        Self::try_from(message)
    }
}

fn payload<T: serde::de::DeserializeOwned>(event: &str, payload: Value) -> Result<T, LobbyError> {
    serde_json::from_value(payload)
        .map_err(|e| LobbyError::InvalidMessage(format!("Bad payload for '{event}': {e}")))
}

impl TryFrom<ClientMessage> for ClientRequest {
    type Error = LobbyError;

    fn try_from(message: ClientMessage) -> Result<Self, Self::Error> {
        let ClientMessage { event, payload: body } = message;
        match event.as_str() {
            "createLobby" => {
                let p: CreateLobbyPayload = payload(&event, body)?;
                Ok(Self::CreateLobby { game_id: p.game_id, name: p.name })
            }
            "joinLobby" => {
                let p: JoinLobbyPayload = payload(&event, body)?;
                let name = p.name.trim().to_string();
                if name.is_empty() {
                    return Err(LobbyError::InvalidMessage("Display name cannot be empty".to_string()));
                }
                Ok(Self::JoinLobby { code: LobbyCode::new(p.code), name })
            }
            "action" => {
                let p: ActionPayload = payload(&event, body)?;
                Ok(Self::Action { code: LobbyCode::new(p.code), data: p.data })
            }
            "leaveLobby" => Ok(Self::LeaveLobby),
            "endLobby" => {
                let p: CodePayload = payload(&event, body)?;
                Ok(Self::EndLobby { code: LobbyCode::new(p.code) })
            }
            "listGames" => Ok(Self::ListGames),
            "ping" => Ok(Self::Ping),
            other => Err(LobbyError::InvalidMessage(format!("Unknown event '{other}'"))),
        }
    }
}

/// Server push: `{ "eventName": ..., "payload": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub event_name: String,
    pub payload: Value,
}

impl ServerMessage {
    pub fn new(event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
        }
    }

    /// The structured `error` event sent back to an offending connection.
    pub fn error(error: &LobbyError) -> Self {
        Self::new(
            "error",
            serde_json::json!({
                "kind": error.kind(),
                "message": error.to_string(),
            }),
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the lobby runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    #[error("Lobby not found: {0}")]
    LobbyNotFound(LobbyCode),
    #[error("Unknown game id: {0}")]
    UnknownGameId(String),
    #[error("Lobby {code} is full ({max} players)")]
    RosterFull { code: LobbyCode, max: usize },
    #[error("Connection {connection} is not a member of lobby {code}")]
    NotAMember { code: LobbyCode, connection: ConnectionId },
    #[error("Could not deliver to connection {0}")]
    Delivery(ConnectionId),
    #[error("Game module fault in {hook}: {message}")]
    ModuleFault { hook: Hook, message: String },
    #[error("Connection is already in lobby {0}")]
    AlreadyInLobby(LobbyCode),
    #[error("Only the host of lobby {0} may do that")]
    NotHost(LobbyCode),
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Server is at its limit of {0} lobbies")]
    ServerBusy(usize),
    #[error("Server is shutting down")]
    ServerShutdown,
}

impl LobbyError {
    /// Stable tag used in the client-facing `error` event.
    pub fn kind(&self) -> &'static str {
        match self {
            LobbyError::LobbyNotFound(_) => "lobbyNotFound",
            LobbyError::UnknownGameId(_) => "unknownGameId",
            LobbyError::RosterFull { .. } => "rosterFull",
            LobbyError::NotAMember { .. } => "notAMember",
            LobbyError::Delivery(_) => "deliveryError",
            LobbyError::ModuleFault { .. } => "moduleFault",
            LobbyError::AlreadyInLobby(_) => "alreadyInLobby",
            LobbyError::NotHost(_) => "notHost",
            LobbyError::UnknownConnection(_) => "unknownConnection",
            LobbyError::InvalidMessage(_) => "invalidMessage",
            LobbyError::ServerBusy(_) => "serverBusy",
            LobbyError::ServerShutdown => "serverShutdown",
        }
    }

    /// Whether this error is reported back to the requesting connection as an
    /// `error` event. Delivery failures and module faults never are.
    pub fn is_client_facing(&self) -> bool {
        !matches!(self, LobbyError::Delivery(_) | LobbyError::ModuleFault { .. })
    }
}

/// Failure reported by a game module from inside one of its hooks.
///
/// Rule violations by players (an illegal move) are not errors; a module handles
/// those itself. A `ModuleError` means the module could not continue.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid module state: {0}")]
    InvalidState(String),
    #[error("{0}")]
    Other(String),
}

/// Milliseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lobby_code_is_case_insensitive() {
        assert_eq!(LobbyCode::new(" abcd "), LobbyCode::new("ABCD"));
        assert_eq!(LobbyCode::new("xk7p").as_str(), "XK7P");
    }

    #[test]
    fn test_parse_join_request() {
        let request = ClientRequest::parse(r#"{"event":"joinLobby","payload":{"code":"ab2c","name":" Ana "}}"#)
            .expect("join request should parse");
        assert_eq!(
            request,
            ClientRequest::JoinLobby {
                code: LobbyCode::new("AB2C"),
                name: "Ana".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_action_keeps_payload_opaque() {
        let request = ClientRequest::parse(r#"{"event":"action","payload":{"code":"ABCD","data":{"index":0}}}"#)
            .expect("action should parse");
        match request {
            ClientRequest::Action { code, data } => {
                assert_eq!(code.as_str(), "ABCD");
                assert_eq!(data, json!({"index": 0}));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_parse_requests_without_payload() {
        assert_eq!(ClientRequest::parse(r#"{"event":"leaveLobby"}"#), Ok(ClientRequest::LeaveLobby));
        assert_eq!(ClientRequest::parse(r#"{"event":"ping","payload":{}}"#), Ok(ClientRequest::Ping));
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        let unknown = ClientRequest::parse(r#"{"event":"teleport","payload":{}}"#).unwrap_err();
        assert_eq!(unknown.kind(), "invalidMessage");

        let missing = ClientRequest::parse(r#"{"event":"createLobby","payload":{}}"#).unwrap_err();
        assert_eq!(missing.kind(), "invalidMessage");

        let empty_name = ClientRequest::parse(r#"{"event":"joinLobby","payload":{"code":"ABCD","name":"  "}}"#).unwrap_err();
        assert_eq!(empty_name.kind(), "invalidMessage");

        assert!(ClientRequest::parse("not json").is_err());
    }

    #[test]
    fn test_error_event_shape() {
        let error = LobbyError::RosterFull {
            code: LobbyCode::new("ABCD"),
            max: 2,
        };
        let message = ServerMessage::error(&error);
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["eventName"], "error");
        assert_eq!(encoded["payload"]["kind"], "rosterFull");
        assert_eq!(encoded["payload"]["message"], "Lobby ABCD is full (2 players)");
    }

    #[test]
    fn test_descriptor_builder() {
        let descriptor = GameDescriptor::new("tictactoe", "Tic-Tac-Toe")
            .players(2, 2)
            .description("Three in a row")
            .host_leave(HostLeavePolicy::KeepRunning);
        assert_eq!(descriptor.max_players, Some(2));
        assert_eq!(descriptor.host_leave, HostLeavePolicy::KeepRunning);

        let encoded = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(encoded["minPlayers"], 2);
        assert_eq!(encoded["hostLeave"], "keepRunning");
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::PlayerJoin.to_string(), "onPlayerJoin");
        assert_eq!(Hook::End.to_string(), "onEnd");
    }
}
