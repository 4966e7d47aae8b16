//! Lobby API facade
//!
//! The capability objects handed to a game module on every hook call:
//!
//! * [`LobbyView`] - read-only view of the lobby (code, roster, host, status)
//! * [`LobbyApi`] - the only way a module can affect the outside world
//!
//! Both are scoped to a single lobby and borrowed from its dispatch unit for
//! the duration of one hook. A module never sees a raw connection handle, so
//! it cannot reach connections outside its own lobby.
//!
//! Sends are fire-and-forget: they queue into the receiver's outbound buffer
//! and return immediately. Events to one receiver keep the order in which the
//! module issued them.

use crate::registry::ConnectionRegistry;
use crate::timers::TimerSet;
use lobby_types::{ConnectionId, GameDescriptor, LobbyCode, LobbyStatus, PlayerRecord, TimerId};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

/// Players currently joined to a lobby, in join order.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    players: Vec<PlayerRecord>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.iter()
    }

    pub fn as_slice(&self) -> &[PlayerRecord] {
        &self.players
    }

    pub(crate) fn insert(&mut self, player: PlayerRecord) {
        self.players.push(player);
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<PlayerRecord> {
        let index = self.players.iter().position(|p| p.id == id)?;
        Some(self.players.remove(index))
    }
}

/// Who submitted an action.
#[derive(Debug, Clone, Copy)]
pub enum Origin<'a> {
    /// The lobby's host display.
    Host(ConnectionId),
    /// A joined player.
    Player(&'a PlayerRecord),
}

impl Origin<'_> {
    pub fn id(&self) -> ConnectionId {
        match self {
            Origin::Host(id) => *id,
            Origin::Player(player) => player.id,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Origin::Host(_))
    }

    pub fn player(&self) -> Option<&PlayerRecord> {
        match self {
            Origin::Host(_) => None,
            Origin::Player(player) => Some(player),
        }
    }
}

/// Read-only view of the lobby a hook is running against.
pub struct LobbyView<'a> {
    pub(crate) code: &'a LobbyCode,
    pub(crate) descriptor: &'a GameDescriptor,
    pub(crate) status: LobbyStatus,
    pub(crate) host: Option<ConnectionId>,
    pub(crate) roster: &'a Roster,
}

impl<'a> LobbyView<'a> {
    pub fn code(&self) -> &LobbyCode {
        self.code
    }

    pub fn descriptor(&self) -> &GameDescriptor {
        self.descriptor
    }

    pub fn status(&self) -> LobbyStatus {
        self.status
    }

    pub fn host(&self) -> Option<ConnectionId> {
        self.host
    }

    pub fn players(&self) -> &'a [PlayerRecord] {
        self.roster.as_slice()
    }

    pub fn player(&self, id: ConnectionId) -> Option<&'a PlayerRecord> {
        self.roster.get(id)
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    pub fn has_min_players(&self) -> bool {
        self.roster.len() >= self.descriptor.min_players
    }
}

/// Capability object through which a module talks to its lobby's members.
pub struct LobbyApi<'a> {
    pub(crate) code: &'a LobbyCode,
    pub(crate) roster: &'a Roster,
    pub(crate) host: Option<ConnectionId>,
    pub(crate) registry: &'a ConnectionRegistry,
    pub(crate) timers: &'a mut TimerSet,
    pub(crate) end_request: &'a mut Option<String>,
}

impl LobbyApi<'_> {
    pub fn code(&self) -> &LobbyCode {
        self.code
    }

    /// Sends to one player. Silently does nothing if `id` is not (or no longer)
    /// a member of this lobby.
    pub fn send_to_player(&self, id: ConnectionId, event: &str, payload: Value) {
        if !self.roster.contains(id) {
            debug!(lobby = %self.code, connection = %id, event, "Dropping send to non-member");
            return;
        }
        self.deliver(id, event, payload);
    }

    /// Sends to every joined player.
    pub fn send_to_all(&self, event: &str, payload: Value) {
        for player in self.roster.iter() {
            self.deliver(player.id, event, payload.clone());
        }
    }

    /// Alias of [`LobbyApi::send_to_all`].
    pub fn broadcast(&self, event: &str, payload: Value) {
        self.send_to_all(event, payload);
    }

    /// Sends to the host display, if one is attached.
    pub fn send_to_host(&self, event: &str, payload: Value) {
        if let Some(host) = self.host {
            self.deliver(host, event, payload);
        }
    }

    /// Sends to every player and to the host.
    pub fn send_to_everyone(&self, event: &str, payload: Value) {
        self.send_to_all(event, payload.clone());
        self.send_to_host(event, payload);
    }

    /// Schedules a one-shot timer. The module's `on_timer` hook receives `tag`.
    pub fn schedule(&mut self, delay: Duration, tag: impl Into<String>) -> TimerId {
        let id = self.timers.schedule(delay, tag.into());
        trace!(lobby = %self.code, timer = %id, ?delay, "Timer scheduled");
        id
    }

    /// Schedules a timer that fires every `period` until cancelled or the lobby ends.
    pub fn schedule_repeating(&mut self, period: Duration, tag: impl Into<String>) -> TimerId {
        let id = self.timers.schedule_repeating(period, tag.into());
        trace!(lobby = %self.code, timer = %id, ?period, "Repeating timer scheduled");
        id
    }

    /// Cancels a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    /// Asks the runtime to end this lobby once the current hook returns.
    pub fn end_lobby(&mut self, reason: impl Into<String>) {
        if self.end_request.is_none() {
            *self.end_request = Some(reason.into());
        }
    }

    fn deliver(&self, id: ConnectionId, event: &str, payload: Value) {
        // Receivers vanishing mid-send is expected during join/leave races.
        if let Err(e) = self.registry.send(id, event, payload) {
            debug!(lobby = %self.code, connection = %id, event, "Delivery skipped: {}", e);
        }
    }
}
