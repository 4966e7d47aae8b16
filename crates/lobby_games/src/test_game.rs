//! Diagnostic game used to exercise the runtime end to end.
//!
//! Echoes whatever it receives, counts actions per player, and can be told to
//! fault, end itself or schedule a timer. The host may leave without ending
//! the lobby, which keeps the `KeepRunning` policy covered.

use lobby_runtime::{GameModule, LobbyApi, LobbyView, Origin, TimerFired};
use lobby_types::{current_timestamp, ConnectionId, GameDescriptor, HostLeavePolicy, ModuleError, PlayerRecord};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const GAME_ID: &str = "test_game";

pub fn descriptor() -> GameDescriptor {
    GameDescriptor::new(GAME_ID, "Test Game")
        .players(1, 16)
        .description("Echo and diagnostics module for exercising the lobby runtime.")
        .host_leave(HostLeavePolicy::KeepRunning)
}

#[derive(Debug, Default)]
pub struct TestGame {
    total: u64,
    per_player: HashMap<ConnectionId, u64>,
    joins: u64,
    leaves: u64,
}

impl TestGame {
    pub fn new() -> Self {
        Self::default()
    }

    fn reply(api: &mut LobbyApi<'_>, from: &Origin<'_>, event: &str, payload: Value) {
        match from {
            Origin::Host(_) => api.send_to_host(event, payload),
            Origin::Player(player) => api.send_to_player(player.id, event, payload),
        }
    }
}

impl GameModule for TestGame {
    fn on_init(&mut self, lobby: &LobbyView<'_>, api: &mut LobbyApi<'_>) -> Result<(), ModuleError> {
        api.send_to_host("testReady", json!({ "code": lobby.code() }));
        Ok(())
    }

    fn on_player_join(
        &mut self,
        lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        player: &PlayerRecord,
    ) -> Result<(), ModuleError> {
        self.joins += 1;
        api.send_to_everyone("rosterChanged", json!({ "joined": player.name, "players": lobby.player_count() }));
        Ok(())
    }

    fn on_player_leave(
        &mut self,
        lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        player: &PlayerRecord,
    ) -> Result<(), ModuleError> {
        self.leaves += 1;
        self.per_player.remove(&player.id);
        api.send_to_everyone("rosterChanged", json!({ "left": player.name, "players": lobby.player_count() }));
        Ok(())
    }

    fn on_action(
        &mut self,
        lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        from: Origin<'_>,
        payload: &Value,
    ) -> Result<(), ModuleError> {
        self.total += 1;
        *self.per_player.entry(from.id()).or_default() += 1;

        match payload.get("action").and_then(Value::as_str) {
            Some("ping") => Self::reply(api, &from, "pong", json!({ "timestamp": current_timestamp() })),
            Some("broadcast") => {
                api.send_to_everyone("message", json!({ "from": from.id(), "data": payload.get("data") }));
            }
            Some("count") => Self::reply(api, &from, "count", json!({ "total": self.total })),
            Some("timer") => {
                let ms = payload.get("ms").and_then(Value::as_u64).unwrap_or(100);
                api.schedule(Duration::from_millis(ms), "test");
            }
            Some("end") => api.end_lobby("ended by test"),
            Some("error") => return Err(ModuleError::InvalidState("error requested".to_string())),
            Some("fault") => {
                warn!(lobby = %lobby.code(), "test_game: fault requested");
                panic!("test_game fault requested");
            }
            _ => {
                debug!(lobby = %lobby.code(), "test_game: echoing {}", payload);
                Self::reply(api, &from, "echo", payload.clone());
            }
        }
        Ok(())
    }

    fn on_timer(&mut self, _lobby: &LobbyView<'_>, api: &mut LobbyApi<'_>, timer: &TimerFired) -> Result<(), ModuleError> {
        api.send_to_everyone("timerFired", json!({ "tag": timer.tag }));
        Ok(())
    }

    fn snapshot(&self) -> Value {
        let per_player: HashMap<String, u64> = self.per_player.iter().map(|(id, n)| (id.to_string(), *n)).collect();
        json!({
            "actions": self.total,
            "perPlayer": per_player,
            "joins": self.joins,
            "leaves": self.leaves,
        })
    }
}
