//! Starting point for a new game.
//!
//! Copy this module, change the id and descriptor, keep your state in the
//! struct and answer actions through the [`LobbyApi`]. Register it in
//! [`crate::builtin_registry`].

use lobby_runtime::{GameModule, LobbyApi, LobbyView, Origin};
use lobby_types::{GameDescriptor, ModuleError, PlayerRecord};
use serde_json::{json, Value};
use tracing::debug;

pub const GAME_ID: &str = "template";

pub fn descriptor() -> GameDescriptor {
    GameDescriptor::new(GAME_ID, "Template").description("Minimal skeleton for new games.")
}

#[derive(Debug, Default)]
pub struct Template {
    ready: usize,
}

impl GameModule for Template {
    fn on_player_join(
        &mut self,
        lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        player: &PlayerRecord,
    ) -> Result<(), ModuleError> {
        api.send_to_player(player.id, "hello", json!({ "game": lobby.descriptor().name }));
        Ok(())
    }

    fn on_action(
        &mut self,
        lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        from: Origin<'_>,
        payload: &Value,
    ) -> Result<(), ModuleError> {
        match payload.get("action").and_then(Value::as_str) {
            Some("ready") => {
                self.ready += 1;
                api.send_to_host("playerReady", json!({ "id": from.id(), "ready": self.ready }));
            }
            other => debug!(lobby = %lobby.code(), "template: unhandled action {:?}", other),
        }
        Ok(())
    }

    fn snapshot(&self) -> Value {
        json!({ "ready": self.ready })
    }
}
