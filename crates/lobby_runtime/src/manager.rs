//! Lobby manager
//!
//! Owns the table of live lobbies and routes every request to the right
//! dispatch unit. The manager itself holds no per-lobby state beyond a
//! command sender, so concurrent requests for different lobbies never contend
//! on anything but the shared maps.
//!
//! Requests that need an answer (create, join, action, end, inspect) wait on
//! a oneshot reply from the dispatch unit. Leaves and disconnects are queued
//! and return immediately; they are applied in order behind whatever the
//! lobby is already doing.

use crate::code::CodeGenerator;
use crate::config::ServerConfig;
use crate::dispatch::{LobbyActor, LobbyCommand, LobbyHandle, LobbyTable};
use crate::module::GameRegistry;
use crate::registry::{ConnectionRegistry, Membership, Outbound};
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use lobby_types::{
    current_timestamp, ClientRequest, ConnectionId, GameDescriptor, Hook, LobbyCode, LobbyError, LobbySnapshot,
    PlayerRecord, Role, ServerMessage,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reason attached to `gameEnded` when a lobby is closed by server shutdown.
pub const SHUTDOWN_REASON: &str = "server shutdown";

/// Reason attached to `gameEnded` when the host ends its own lobby.
pub const HOST_ENDED_REASON: &str = "ended by host";

const MAX_CODE_ATTEMPTS: usize = 1000;

/// Point-in-time counters for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub lobbies: usize,
    pub connections: usize,
    pub games: usize,
}

/// Creates lobbies, routes requests to them and tears them down.
pub struct LobbyManager {
    registry: Arc<ConnectionRegistry>,
    games: GameRegistry,
    lobbies: Arc<LobbyTable>,
    codes: CodeGenerator,
    max_lobbies: usize,
    idle_timeout: Option<Duration>,
    closing: AtomicBool,
}

impl LobbyManager {
    pub fn new(config: &ServerConfig, games: GameRegistry) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            games,
            lobbies: Arc::new(LobbyTable::new()),
            codes: CodeGenerator::new(&config.code_alphabet, config.code_length),
            max_lobbies: config.max_lobbies,
            idle_timeout: config.idle_timeout,
            closing: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn games(&self) -> &GameRegistry {
        &self.games
    }

    /// Registers a transport connection and greets it with its identity.
    pub fn connect(&self, outbound: Outbound) -> ConnectionId {
        let id = self.registry.register(outbound);
        if let Err(e) = self.registry.send(id, "connected", json!({ "id": id })) {
            debug!(connection = %id, "Greeting not delivered: {}", e);
        }
        id
    }

    /// Forgets a connection. Its membership, if any, is handed to the lobby as
    /// a leave (or host departure) and processed after the lobby's current work.
    pub fn disconnect(&self, connection: ConnectionId) {
        let Some(entry) = self.registry.unregister(connection) else {
            return;
        };
        if let Some(membership) = entry.membership {
            self.notify_departure(connection, membership);
        }
        info!(connection = %connection, "🔌 Connection closed");
    }

    /// Creates a lobby hosted by `host` and returns its join code once the
    /// module's `on_init` has run.
    pub async fn create_lobby(&self, host: ConnectionId, game_id: &str) -> Result<LobbyCode, LobbyError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(LobbyError::ServerShutdown);
        }
        let connection = self.registry.lookup(host).ok_or(LobbyError::UnknownConnection(host))?;
        if let Some(existing) = connection.membership {
            return Err(LobbyError::AlreadyInLobby(existing.code));
        }
        let live = self.lobbies.len();
        if live >= self.max_lobbies || live as u64 >= self.codes.space() {
            warn!("Refusing new lobby: {} live lobbies", live);
            return Err(LobbyError::ServerBusy(self.max_lobbies));
        }
        let (descriptor, module) = self.games.create(game_id)?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let session = Uuid::new_v4();
        let handle = LobbyHandle {
            session,
            game_id: descriptor.id.clone(),
            commands: commands.clone(),
        };
        let code = self.allocate_code(handle)?;

        let membership = Membership::new(code.clone(), Role::Host, session);
        let host_ticket = membership.ticket;
        if let Err(e) = self.registry.claim_membership(host, membership) {
            self.lobbies.remove_if(&code, |_, h| h.session == session);
            return Err(e);
        }

        let actor = LobbyActor::new(
            session,
            code.clone(),
            descriptor,
            host,
            host_ticket,
            module,
            self.registry.clone(),
            self.lobbies.clone(),
            commands,
            self.idle_timeout,
        );
        let (ready, initialized) = oneshot::channel();
        tokio::spawn(actor.run(receiver, ready));

        match initialized.await {
            Ok(Ok(())) => Ok(code),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LobbyError::ModuleFault {
                hook: Hook::Init,
                message: "dispatch unit stopped before initialization".to_string(),
            }),
        }
    }

    /// Reserves a fresh code for `handle`. The limit is checked again after the
    /// insert, since concurrent creates all pass the check in `create_lobby`.
    fn allocate_code(&self, handle: LobbyHandle) -> Result<LobbyCode, LobbyError> {
        let session = handle.session;
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = self.codes.generate(&mut rng);
            let Entry::Vacant(slot) = self.lobbies.entry(code.clone()) else {
                continue;
            };
            slot.insert(handle);

            if self.lobbies.len() > self.max_lobbies {
                self.lobbies.remove_if(&code, |_, h| h.session == session);
                warn!("Refusing new lobby: limit of {} reached", self.max_lobbies);
                return Err(LobbyError::ServerBusy(self.max_lobbies));
            }
            return Ok(code);
        }
        warn!("Join code space exhausted after {} attempts", MAX_CODE_ATTEMPTS);
        Err(LobbyError::ServerBusy(self.max_lobbies))
    }

    fn handle(&self, code: &LobbyCode) -> Result<LobbyHandle, LobbyError> {
        self.lobbies
            .get(code)
            .map(|handle| handle.clone())
            .ok_or_else(|| LobbyError::LobbyNotFound(code.clone()))
    }

    fn commands(&self, code: &LobbyCode) -> Result<mpsc::UnboundedSender<LobbyCommand>, LobbyError> {
        self.handle(code).map(|handle| handle.commands)
    }

    /// Adds `connection` to the lobby as a player named `name`.
    pub async fn join(&self, connection: ConnectionId, code: LobbyCode, name: String) -> Result<(), LobbyError> {
        let LobbyHandle { session, commands, .. } = self.handle(&code)?;
        let membership = Membership::new(code.clone(), Role::Player, session);
        let ticket = membership.ticket;
        self.registry.claim_membership(connection, membership)?;
        if let Err(e) = self.registry.set_display_name(connection, name.clone()) {
            self.registry.release_membership(connection, ticket);
            return Err(e);
        }

        let player = PlayerRecord {
            id: connection,
            name,
            joined_at: current_timestamp(),
        };
        let (reply, response) = oneshot::channel();
        let outcome = match commands.send(LobbyCommand::Join { player, ticket, reply }) {
            Ok(()) => response.await.unwrap_or_else(|_| Err(LobbyError::LobbyNotFound(code.clone()))),
            Err(_) => Err(LobbyError::LobbyNotFound(code.clone())),
        };

        if outcome.is_err() {
            self.registry.release_membership(connection, ticket);
        }
        outcome
    }

    /// Removes `connection` from whatever lobby it is in. A connection without a
    /// membership is left alone.
    pub fn leave(&self, connection: ConnectionId) -> Result<(), LobbyError> {
        let entry = self
            .registry
            .lookup(connection)
            .ok_or(LobbyError::UnknownConnection(connection))?;
        let Some(membership) = entry.membership else {
            debug!(connection = %connection, "Leave without membership ignored");
            return Ok(());
        };
        self.registry.release_membership(connection, membership.ticket);
        self.notify_departure(connection, membership);
        Ok(())
    }

    fn notify_departure(&self, connection: ConnectionId, membership: Membership) {
        let command = match membership.role {
            Role::Host => LobbyCommand::HostLeft { connection },
            Role::Player => LobbyCommand::Leave { connection },
        };
        if let Ok(commands) = self.commands(&membership.code) {
            let _ = commands.send(command);
        }
    }

    /// Forwards an action to the lobby's module.
    pub async fn action(&self, connection: ConnectionId, code: LobbyCode, data: Value) -> Result<(), LobbyError> {
        let commands = self.commands(&code)?;
        let (reply, response) = oneshot::channel();
        commands
            .send(LobbyCommand::Action { connection, data, reply })
            .map_err(|_| LobbyError::LobbyNotFound(code.clone()))?;
        response.await.unwrap_or(Err(LobbyError::LobbyNotFound(code)))
    }

    /// Ends a lobby. Returns `false` if it does not exist or had already ended.
    pub async fn end_lobby(&self, code: &LobbyCode, reason: &str) -> bool {
        match self.commands(code) {
            Ok(commands) => Self::end_via(&commands, reason).await,
            Err(_) => false,
        }
    }

    async fn end_via(commands: &mpsc::UnboundedSender<LobbyCommand>, reason: &str) -> bool {
        let (reply, response) = oneshot::channel();
        let command = LobbyCommand::End {
            reason: reason.to_string(),
            reply: Some(reply),
        };
        if commands.send(command).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Ends a lobby on behalf of its host. The host's membership must belong to
    /// the lobby instance currently holding `code`, not an earlier one.
    pub async fn end_as_host(&self, connection: ConnectionId, code: LobbyCode) -> Result<(), LobbyError> {
        let handle = self.handle(&code)?;
        let is_host = self
            .registry
            .lookup(connection)
            .and_then(|c| c.membership)
            .is_some_and(|m| m.session == handle.session && m.role == Role::Host);
        if !is_host {
            return Err(LobbyError::NotHost(code));
        }
        if Self::end_via(&handle.commands, HOST_ENDED_REASON).await {
            Ok(())
        } else {
            Err(LobbyError::LobbyNotFound(code))
        }
    }

    /// Current state of a lobby, read through its dispatch unit.
    pub async fn inspect(&self, code: &LobbyCode) -> Option<LobbySnapshot> {
        let commands = self.commands(code).ok()?;
        let (reply, response) = oneshot::channel();
        commands.send(LobbyCommand::Inspect { reply }).ok()?;
        response.await.ok()
    }

    pub fn contains(&self, code: &LobbyCode) -> bool {
        self.lobbies.contains_key(code)
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    /// Live lobby codes with the game each one runs.
    pub fn lobbies(&self) -> Vec<(LobbyCode, String)> {
        self.lobbies
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().game_id.clone()))
            .collect()
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            lobbies: self.lobbies.len(),
            connections: self.registry.len(),
            games: self.games.len(),
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Stops accepting new lobbies and ends every live one.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let senders: Vec<_> = self.lobbies.iter().map(|entry| entry.value().commands.clone()).collect();
        info!("🛑 Ending {} lobbies for shutdown", senders.len());

        let pending = senders.into_iter().filter_map(|commands| {
            let (reply, response) = oneshot::channel();
            let command = LobbyCommand::End {
                reason: SHUTDOWN_REASON.to_string(),
                reply: Some(reply),
            };
            commands.send(command).ok().map(|_| response)
        });
        join_all(pending).await;
    }

    /// Parses and handles one inbound text frame.
    pub async fn handle_text(&self, connection: ConnectionId, text: &str) {
        match ClientRequest::parse(text) {
            Ok(request) => self.handle_request(connection, request).await,
            Err(e) => self.report(connection, &e),
        }
    }

    /// Handles one request. Failures are answered with an `error` event where
    /// the client can act on them.
    pub async fn handle_request(&self, connection: ConnectionId, request: ClientRequest) {
        let result = match request {
            ClientRequest::CreateLobby { game_id, name } => {
                if let Some(name) = name {
                    let _ = self.registry.set_display_name(connection, name);
                }
                self.create_lobby(connection, &game_id).await.map(|_| ())
            }
            ClientRequest::JoinLobby { code, name } => self.join(connection, code, name).await,
            ClientRequest::Action { code, data } => self.action(connection, code, data).await,
            ClientRequest::LeaveLobby => self.leave(connection),
            ClientRequest::EndLobby { code } => self.end_as_host(connection, code).await,
            ClientRequest::ListGames => {
                let games: Vec<GameDescriptor> = self.games.descriptors();
                self.registry.send(connection, "games", json!({ "games": games }))
            }
            ClientRequest::Ping => self
                .registry
                .send(connection, "pong", json!({ "timestamp": current_timestamp() })),
        };

        if let Err(e) = result {
            self.report(connection, &e);
        }
    }

    fn report(&self, connection: ConnectionId, error: &LobbyError) {
        if error.is_client_facing() {
            debug!(connection = %connection, kind = error.kind(), "Request rejected: {}", error);
            let _ = self.registry.send_message(connection, ServerMessage::error(error));
        } else {
            debug!(connection = %connection, "Request failed: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{LobbyApi, LobbyView, Origin};
    use crate::module::GameModule;
    use lobby_types::{LobbyStatus, ModuleError};

    struct Quiet;

    impl GameModule for Quiet {
        fn on_player_join(&mut self, _: &LobbyView<'_>, _: &mut LobbyApi<'_>, _: &PlayerRecord) -> Result<(), ModuleError> {
            Ok(())
        }

        fn on_action(&mut self, _: &LobbyView<'_>, _: &mut LobbyApi<'_>, _: Origin<'_>, _: &Value) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn manager(config: ServerConfig) -> LobbyManager {
        let mut games = GameRegistry::new();
        games
            .register_fn(GameDescriptor::new("quiet", "Quiet").players(1, 2), || Box::new(Quiet))
            .unwrap();
        LobbyManager::new(&config, games)
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_game_and_busy_host() {
        let manager = manager(ServerConfig::default());
        let (host, _rx) = manager.registry().register_channel(16);

        assert_eq!(
            manager.create_lobby(host, "chess").await,
            Err(LobbyError::UnknownGameId("chess".to_string()))
        );
        let code = manager.create_lobby(host, "quiet").await.unwrap();
        assert_eq!(manager.create_lobby(host, "quiet").await, Err(LobbyError::AlreadyInLobby(code)));
        assert_eq!(manager.lobby_count(), 1);
    }

    #[tokio::test]
    async fn test_max_lobbies_is_enforced() {
        let manager = manager(ServerConfig { max_lobbies: 1, ..ServerConfig::default() });
        let (first, _a) = manager.registry().register_channel(16);
        let (second, _b) = manager.registry().register_channel(16);

        manager.create_lobby(first, "quiet").await.unwrap();
        assert_eq!(manager.create_lobby(second, "quiet").await, Err(LobbyError::ServerBusy(1)));
    }

    #[tokio::test]
    async fn test_codes_are_unique_while_live() {
        // Tiny code space: four possible codes.
        let manager = manager(ServerConfig {
            code_alphabet: "AB".to_string(),
            code_length: 2,
            ..ServerConfig::default()
        });
        let mut codes = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (host, rx) = manager.registry().register_channel(16);
            receivers.push(rx);
            codes.push(manager.create_lobby(host, "quiet").await.unwrap());
        }
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 4);

        let (extra, _rx) = manager.registry().register_channel(16);
        assert!(matches!(manager.create_lobby(extra, "quiet").await, Err(LobbyError::ServerBusy(_))));

        // Ending a lobby frees its code.
        assert!(manager.end_lobby(&codes[0], "done").await);
        assert!(manager.create_lobby(extra, "quiet").await.is_ok());
    }

    #[tokio::test]
    async fn test_end_as_host_requires_host_role() {
        let manager = manager(ServerConfig::default());
        let (host, _h) = manager.registry().register_channel(16);
        let (player, _p) = manager.registry().register_channel(16);
        let code = manager.create_lobby(host, "quiet").await.unwrap();
        manager.join(player, code.clone(), "Ana".to_string()).await.unwrap();

        assert_eq!(manager.end_as_host(player, code.clone()).await, Err(LobbyError::NotHost(code.clone())));
        assert!(manager.end_as_host(host, code.clone()).await.is_ok());
        assert!(manager.inspect(&code).await.is_none());
        assert_eq!(manager.end_as_host(host, code.clone()).await, Err(LobbyError::LobbyNotFound(code)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_respect_max_lobbies() {
        let manager = Arc::new(manager(ServerConfig { max_lobbies: 3, ..ServerConfig::default() }));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                let (host, rx) = manager.registry().register_channel(16);
                let result = manager.create_lobby(host, "quiet").await;
                (result, rx)
            }));
        }

        let mut created = 0;
        let mut receivers = Vec::new();
        for task in tasks {
            let (result, rx) = task.await.unwrap();
            receivers.push(rx);
            match result {
                Ok(_) => created += 1,
                Err(e) => assert_eq!(e, LobbyError::ServerBusy(3)),
            }
        }
        // Racing creates may all back off, but never overshoot.
        assert!(created <= 3);
        assert_eq!(manager.lobby_count(), created);
    }

    #[tokio::test]
    async fn test_stats_and_lobby_listing() {
        let manager = manager(ServerConfig::default());
        let (host, _h) = manager.registry().register_channel(16);
        let (_idle, _i) = manager.registry().register_channel(16);
        assert_eq!(manager.stats(), ManagerStats { lobbies: 0, connections: 2, games: 1 });

        let code = manager.create_lobby(host, "quiet").await.unwrap();
        assert_eq!(manager.lobbies(), vec![(code.clone(), "quiet".to_string())]);
        assert_eq!(manager.stats().lobbies, 1);
        assert_eq!(serde_json::to_value(manager.stats()).unwrap(), json!({ "lobbies": 1, "connections": 2, "games": 1 }));

        assert!(manager.end_lobby(&code, "done").await);
        assert!(manager.lobbies().is_empty());
        manager.disconnect(host);
        assert_eq!(manager.stats(), ManagerStats { lobbies: 0, connections: 1, games: 1 });
    }

    #[tokio::test]
    async fn test_end_as_host_ignores_membership_of_an_earlier_lobby() {
        let manager = manager(ServerConfig::default());
        let (host, _h) = manager.registry().register_channel(16);
        let (stale, _s) = manager.registry().register_channel(16);
        let code = manager.create_lobby(host, "quiet").await.unwrap();

        // Host of a previous lobby that held the same code.
        manager
            .registry()
            .claim_membership(stale, Membership::new(code.clone(), Role::Host, Uuid::new_v4()))
            .unwrap();

        assert_eq!(manager.end_as_host(stale, code.clone()).await, Err(LobbyError::NotHost(code.clone())));
        assert!(manager.contains(&code));
        assert!(manager.end_as_host(host, code.clone()).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_memberships_clear_before_code_is_released() {
        let manager = Arc::new(manager(ServerConfig::default()));
        for _ in 0..20 {
            let (host, _h) = manager.registry().register_channel(16);
            let (player, _p) = manager.registry().register_channel(16);
            let code = manager.create_lobby(host, "quiet").await.unwrap();
            manager.join(player, code.clone(), "Ana".to_string()).await.unwrap();

            let watcher = {
                let manager = manager.clone();
                let code = code.clone();
                tokio::spawn(async move {
                    while manager.contains(&code) {
                        tokio::task::yield_now().await;
                    }
                    let registry = manager.registry();
                    (registry.lookup(host).unwrap().membership, registry.lookup(player).unwrap().membership)
                })
            };
            assert!(manager.end_lobby(&code, "done").await);
            assert_eq!(watcher.await.unwrap(), (None, None));
        }
    }

    #[tokio::test]
    async fn test_shutdown_ends_lobbies_and_refuses_new_ones() {
        let manager = manager(ServerConfig::default());
        let (host, _h) = manager.registry().register_channel(16);
        let code = manager.create_lobby(host, "quiet").await.unwrap();
        assert_eq!(manager.inspect(&code).await.map(|s| s.status), Some(LobbyStatus::Created));

        manager.shutdown().await;
        assert_eq!(manager.lobby_count(), 0);
        assert!(manager.is_closing());
        assert_eq!(manager.create_lobby(host, "quiet").await, Err(LobbyError::ServerShutdown));
    }
}
