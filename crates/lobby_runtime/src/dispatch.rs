//! Per-lobby dispatch unit
//!
//! Each lobby runs as one tokio task that owns the lobby's roster, timers and
//! game module instance. Everything that touches the lobby (joins, leaves,
//! actions, timer firings, end requests, inspections) arrives as a
//! [`LobbyCommand`] on a single queue and is handled to completion before the
//! next one is taken. Module hooks therefore never run concurrently against the
//! same state, while different lobbies proceed in parallel on the runtime.
//!
//! # Fault isolation
//!
//! Hooks run inside `catch_unwind`. A hook that returns an error or panics is
//! a module fault: it is logged with the lobby code and hook name, the lobby is
//! forced to `ended` (a best-effort `on_end` is attempted and its own failures
//! are swallowed) and every member receives `gameEnded` with reason
//! `"internal error"`. Nothing outside the faulting lobby is affected.
//!
//! # Teardown
//!
//! Ending is guarded by the lifecycle status, so `on_end` runs at most once.
//! On end the dispatch unit cancels its timers and clears every member's
//! registry membership. Only then does it remove itself from the lobby table,
//! which releases the code for reuse, and send `gameEnded`. A connection that
//! still pointed at an ended lobby could otherwise act on a new lobby that drew
//! the same code.
//!
//! Memberships are released by ticket, never by code: a leave that is still
//! queued when the same connection rejoins must not clear the new claim. Commands still queued behind the end are
//! dropped, which their senders observe as `LobbyNotFound`.

use crate::api::{LobbyApi, LobbyView, Origin, Roster};
use crate::module::GameModule;
use crate::registry::ConnectionRegistry;
use crate::timers::TimerSet;
use dashmap::DashMap;
use lobby_types::{
    ConnectionId, GameDescriptor, Hook, HostLeavePolicy, LobbyCode, LobbyError, LobbySnapshot,
    LobbyStatus, ModuleError, PlayerRecord, TimerId,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Reason attached to `gameEnded` when a module faults.
pub const INTERNAL_ERROR_REASON: &str = "internal error";

/// Reason attached to `gameEnded` when the host leaves a lobby that ends with it.
pub const HOST_LEFT_REASON: &str = "host left";

/// Reason attached to `gameEnded` when a lobby sat idle too long.
pub const IDLE_REASON: &str = "idle";

/// Work item for a lobby's dispatch unit.
pub(crate) enum LobbyCommand {
    Join {
        player: PlayerRecord,
        ticket: Uuid,
        reply: oneshot::Sender<Result<(), LobbyError>>,
    },
    Leave {
        connection: ConnectionId,
    },
    HostLeft {
        connection: ConnectionId,
    },
    Action {
        connection: ConnectionId,
        data: Value,
        reply: oneshot::Sender<Result<(), LobbyError>>,
    },
    Timer {
        id: TimerId,
    },
    End {
        reason: String,
        reply: Option<oneshot::Sender<bool>>,
    },
    Inspect {
        reply: oneshot::Sender<LobbySnapshot>,
    },
}

/// Entry in the manager's lobby table.
#[derive(Clone)]
pub(crate) struct LobbyHandle {
    /// Distinguishes successive lobbies that reuse the same code.
    pub(crate) session: Uuid,
    pub(crate) game_id: String,
    pub(crate) commands: mpsc::UnboundedSender<LobbyCommand>,
}

pub(crate) type LobbyTable = DashMap<LobbyCode, LobbyHandle>;

pub(crate) struct LobbyActor {
    session: Uuid,
    code: LobbyCode,
    descriptor: GameDescriptor,
    status: LobbyStatus,
    host: Option<ConnectionId>,
    host_ticket: Uuid,
    roster: Roster,
    tickets: HashMap<ConnectionId, Uuid>,
    module: Box<dyn GameModule>,
    timers: TimerSet,
    end_request: Option<String>,
    registry: Arc<ConnectionRegistry>,
    lobbies: Arc<LobbyTable>,
    idle_timeout: Option<Duration>,
}

impl LobbyActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: Uuid,
        code: LobbyCode,
        descriptor: GameDescriptor,
        host: ConnectionId,
        host_ticket: Uuid,
        module: Box<dyn GameModule>,
        registry: Arc<ConnectionRegistry>,
        lobbies: Arc<LobbyTable>,
        commands: mpsc::UnboundedSender<LobbyCommand>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            session,
            code,
            descriptor,
            status: LobbyStatus::Created,
            host: Some(host),
            host_ticket,
            roster: Roster::new(),
            tickets: HashMap::new(),
            module,
            timers: TimerSet::new(commands),
            end_request: None,
            registry,
            lobbies,
            idle_timeout,
        }
    }

    /// Runs `on_init`, reports its outcome through `ready`, then serves commands
    /// until the lobby ends.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<LobbyCommand>,
        ready: oneshot::Sender<Result<(), LobbyError>>,
    ) {
        info!(lobby = %self.code, game = %self.descriptor.id, "🎮 Lobby created");

        if let Some(host) = self.host {
            let created = json!({ "code": self.code, "game": self.descriptor });
            if let Err(e) = self.registry.send(host, "lobbyCreated", created) {
                debug!(lobby = %self.code, "Host did not receive lobbyCreated: {}", e);
            }
        }

        let init = self.invoke(Hook::Init, |module, lobby, api| module.on_init(lobby, api));
        let _ = ready.send(init);

        while self.status != LobbyStatus::Ended {
            let next = match self.idle_timeout {
                Some(limit) => match timeout(limit, commands.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        info!(lobby = %self.code, "Lobby idle for {:?}, ending", limit);
                        self.finish(IDLE_REASON);
                        break;
                    }
                },
                None => commands.recv().await,
            };

            // The timer set holds a sender, so the queue never closes while we run.
            let Some(command) = next else { break };
            self.handle(command);
        }

        debug!(lobby = %self.code, "Dispatch unit stopped");
    }

    fn handle(&mut self, command: LobbyCommand) {
        match command {
            LobbyCommand::Join { player, ticket, reply } => {
                let result = self.join(player, ticket);
                let _ = reply.send(result);
            }
            LobbyCommand::Leave { connection } => self.leave(connection),
            LobbyCommand::HostLeft { connection } => self.host_left(connection),
            LobbyCommand::Action { connection, data, reply } => {
                let result = self.action(connection, &data);
                let _ = reply.send(result);
            }
            LobbyCommand::Timer { id } => self.timer(id),
            LobbyCommand::End { reason, reply } => {
                let ended = self.finish(&reason);
                if let Some(reply) = reply {
                    let _ = reply.send(ended);
                }
            }
            LobbyCommand::Inspect { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn join(&mut self, player: PlayerRecord, ticket: Uuid) -> Result<(), LobbyError> {
        if self.status == LobbyStatus::Ended {
            return Err(LobbyError::LobbyNotFound(self.code.clone()));
        }
        if let Some(max) = self.descriptor.max_players {
            if self.roster.len() >= max {
                debug!(lobby = %self.code, connection = %player.id, "Roster full ({})", max);
                return Err(LobbyError::RosterFull { code: self.code.clone(), max });
            }
        }

        self.roster.insert(player.clone());
        self.tickets.insert(player.id, ticket);
        if self.status == LobbyStatus::Created {
            self.status = LobbyStatus::Running;
        }
        info!(lobby = %self.code, connection = %player.id, "👋 {} joined", player.name);

        let joined = json!({
            "code": self.code,
            "game": self.descriptor,
            "players": self.roster.as_slice(),
        });
        let _ = self.registry.send(player.id, "lobbyJoined", joined);
        if let Some(host) = self.host {
            let _ = self.registry.send(host, "playerJoined", json!({ "id": player.id, "name": player.name }));
        }

        self.invoke(Hook::PlayerJoin, |module, lobby, api| module.on_player_join(lobby, api, &player))
    }

    fn leave(&mut self, connection: ConnectionId) {
        let Some(player) = self.roster.remove(connection) else {
            debug!(lobby = %self.code, connection = %connection, "Leave for non-member ignored");
            return;
        };
        if let Some(ticket) = self.tickets.remove(&connection) {
            self.registry.release_membership(connection, ticket);
        }
        info!(lobby = %self.code, connection = %connection, "👋 {} left", player.name);

        let _ = self.registry.send(connection, "lobbyLeft", json!({ "code": self.code }));
        if let Some(host) = self.host {
            let _ = self.registry.send(host, "playerLeft", json!({ "id": player.id, "name": player.name }));
        }

        let _ = self.invoke(Hook::PlayerLeave, |module, lobby, api| module.on_player_leave(lobby, api, &player));
    }

    fn host_left(&mut self, connection: ConnectionId) {
        if self.host != Some(connection) {
            return;
        }
        self.host = None;
        self.registry.release_membership(connection, self.host_ticket);

        match self.descriptor.host_leave {
            HostLeavePolicy::EndLobby => {
                info!(lobby = %self.code, "Host left, ending lobby");
                self.finish(HOST_LEFT_REASON);
            }
            HostLeavePolicy::KeepRunning => {
                info!(lobby = %self.code, "Host left, lobby keeps running");
            }
        }
    }

    fn action(&mut self, connection: ConnectionId, data: &Value) -> Result<(), LobbyError> {
        let sender = if self.host == Some(connection) {
            None
        } else {
            let player = self.roster.get(connection).cloned().ok_or_else(|| LobbyError::NotAMember {
                code: self.code.clone(),
                connection,
            })?;
            Some(player)
        };

        trace!(lobby = %self.code, connection = %connection, "Dispatching action");
        self.invoke(Hook::Action, |module, lobby, api| {
            let origin = match &sender {
                Some(player) => Origin::Player(player),
                None => Origin::Host(connection),
            };
            module.on_action(lobby, api, origin, data)
        })
    }

    fn timer(&mut self, id: TimerId) {
        let Some(fired) = self.timers.fired(id) else {
            trace!(lobby = %self.code, timer = %id, "Discarding stale timer firing");
            return;
        };
        let _ = self.invoke(Hook::Timer, |module, lobby, api| module.on_timer(lobby, api, &fired));
    }

    fn snapshot(&self) -> LobbySnapshot {
        let state = panic::catch_unwind(AssertUnwindSafe(|| self.module.snapshot())).unwrap_or(Value::Null);
        LobbySnapshot {
            code: self.code.clone(),
            game_id: self.descriptor.id.clone(),
            status: self.status,
            host: self.host,
            players: self.roster.as_slice().to_vec(),
            state,
        }
    }

    /// Runs a hook. Faults end the lobby; a module-requested end is applied afterwards.
    fn invoke<F>(&mut self, hook: Hook, call: F) -> Result<(), LobbyError>
    where
        F: FnOnce(&mut dyn GameModule, &LobbyView<'_>, &mut LobbyApi<'_>) -> Result<(), ModuleError>,
    {
        match self.call_module(hook, call) {
            Ok(()) => {
                if let Some(reason) = self.end_request.take() {
                    self.finish(&reason);
                }
                Ok(())
            }
            Err(fault) => {
                error!(lobby = %self.code, hook = %hook, "💥 {}", fault);
                self.finish(INTERNAL_ERROR_REASON);
                Err(fault)
            }
        }
    }

    fn call_module<F>(&mut self, hook: Hook, call: F) -> Result<(), LobbyError>
    where
        F: FnOnce(&mut dyn GameModule, &LobbyView<'_>, &mut LobbyApi<'_>) -> Result<(), ModuleError>,
    {
        let LobbyActor {
            code,
            descriptor,
            status,
            host,
            roster,
            module,
            timers,
            end_request,
            registry,
            ..
        } = self;

        let view = LobbyView {
            code: &*code,
            descriptor: &*descriptor,
            status: *status,
            host: *host,
            roster: &*roster,
        };
        let mut api = LobbyApi {
            code: &*code,
            roster: &*roster,
            host: *host,
            registry: &**registry,
            timers,
            end_request,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| call(&mut **module, &view, &mut api))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LobbyError::ModuleFault { hook, message: e.to_string() }),
            Err(panic_info) => Err(LobbyError::ModuleFault { hook, message: panic_message(panic_info) }),
        }
    }

    /// Transitions to `ended`. Returns `false` if the lobby had already ended.
    fn finish(&mut self, reason: &str) -> bool {
        if self.status == LobbyStatus::Ended {
            return false;
        }
        self.status = LobbyStatus::Ended;
        self.timers.cancel_all();

        if let Err(e) = self.call_module(Hook::End, |module, lobby, api| module.on_end(lobby, api, reason)) {
            warn!(lobby = %self.code, hook = %Hook::End, "Ignoring fault during teardown: {}", e);
        }
        self.end_request = None;
        self.timers.cancel_all();

        for (&player, &ticket) in &self.tickets {
            self.registry.release_membership(player, ticket);
        }
        if let Some(host) = self.host {
            self.registry.release_membership(host, self.host_ticket);
        }

        let session = self.session;
        self.lobbies.remove_if(&self.code, |_, handle| handle.session == session);

        let notice = json!({ "code": self.code, "reason": reason });
        for member in self.roster.iter().map(|p| p.id).chain(self.host) {
            let _ = self.registry.send(member, "gameEnded", notice.clone());
        }
        info!(lobby = %self.code, "🏁 Lobby ended: {}", reason);
        true
    }
}

fn panic_message(panic_info: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        format!("module panicked: {}", s)
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        format!("module panicked: {}", s)
    } else {
        "module panicked with unknown payload".to_string()
    }
}
