//! Game module contract and registry
//!
//! Every pluggable game implements [`GameModule`]. The runtime owns exactly one
//! instance per lobby and calls its hooks from that lobby's dispatch unit, one
//! at a time, handing it a [`LobbyView`] and a [`LobbyApi`]. The instance is
//! the lobby's state: a module keeps whatever it needs in `self` and never
//! needs its own locking.
//!
//! # Lifecycle
//!
//! 1. `on_init` - once, right after the lobby is created
//! 2. `on_player_join` / `on_player_leave` - as the roster changes
//! 3. `on_action` - for every action a member submits
//! 4. `on_timer` - for every firing of a timer the module scheduled
//! 5. `on_end` - once, when the lobby ends for any reason
//!
//! Returning an error (or panicking) from a hook is a module fault: the lobby
//! is ended with reason "internal error". Player mistakes such as illegal
//! moves are not faults; modules answer those themselves.
//!
//! # Registration
//!
//! Modules are discovered by id through a [`GameRegistry`] of factories:
//!
//! ```rust,ignore
//! let mut games = GameRegistry::new();
//! games.register_fn(
//!     GameDescriptor::new("counter", "Counter").players(1, 4),
//!     || Box::new(Counter::default()),
//! )?;
//! ```

use crate::api::{LobbyApi, LobbyView, Origin};
use crate::error::ServerError;
use crate::timers::TimerFired;
use lobby_types::{GameDescriptor, LobbyError, ModuleError, PlayerRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// The five-hook lifecycle contract every game implements, plus timer firings.
pub trait GameModule: Send + 'static {
    fn on_init(&mut self, _lobby: &LobbyView<'_>, _api: &mut LobbyApi<'_>) -> Result<(), ModuleError> {
        Ok(())
    }

    fn on_player_join(
        &mut self,
        lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        player: &PlayerRecord,
    ) -> Result<(), ModuleError>;

    /// Called after `player` has been removed from the roster.
    fn on_player_leave(
        &mut self,
        _lobby: &LobbyView<'_>,
        _api: &mut LobbyApi<'_>,
        _player: &PlayerRecord,
    ) -> Result<(), ModuleError> {
        Ok(())
    }

    /// `payload` is opaque to the runtime; interpreting its tag is up to the module.
    fn on_action(
        &mut self,
        lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        from: Origin<'_>,
        payload: &Value,
    ) -> Result<(), ModuleError>;

    fn on_timer(
        &mut self,
        _lobby: &LobbyView<'_>,
        _api: &mut LobbyApi<'_>,
        _timer: &TimerFired,
    ) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Timers are already cancelled when this runs; scheduling new ones has no effect.
    fn on_end(&mut self, _lobby: &LobbyView<'_>, _api: &mut LobbyApi<'_>, _reason: &str) -> Result<(), ModuleError> {
        Ok(())
    }

    /// State exposed for inspection. Defaults to `null`.
    fn snapshot(&self) -> Value {
        Value::Null
    }
}

/// Creates module instances for one game id.
pub trait GameFactory: Send + Sync {
    fn descriptor(&self) -> &GameDescriptor;

    fn create(&self) -> Box<dyn GameModule>;
}

/// Factory wrapping a constructor closure.
pub struct SimpleGameFactory<F>
where
    F: Fn() -> Box<dyn GameModule> + Send + Sync,
{
    descriptor: GameDescriptor,
    constructor: F,
}

impl<F> SimpleGameFactory<F>
where
    F: Fn() -> Box<dyn GameModule> + Send + Sync,
{
    pub fn new(descriptor: GameDescriptor, constructor: F) -> Self {
        Self { descriptor, constructor }
    }
}

impl<F> GameFactory for SimpleGameFactory<F>
where
    F: Fn() -> Box<dyn GameModule> + Send + Sync,
{
    fn descriptor(&self) -> &GameDescriptor {
        &self.descriptor
    }

    fn create(&self) -> Box<dyn GameModule> {
        (self.constructor)()
    }
}

/// Game modules available to the server, keyed by id.
#[derive(Default, Clone)]
pub struct GameRegistry {
    factories: HashMap<String, Arc<dyn GameFactory>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: impl GameFactory + 'static) -> Result<(), ServerError> {
        let id = factory.descriptor().id.clone();
        if self.factories.contains_key(&id) {
            return Err(ServerError::DuplicateGame(id));
        }
        info!("🎲 Registered game module '{}' ({})", id, factory.descriptor().name);
        self.factories.insert(id, Arc::new(factory));
        Ok(())
    }

    pub fn register_fn<F>(&mut self, descriptor: GameDescriptor, constructor: F) -> Result<(), ServerError>
    where
        F: Fn() -> Box<dyn GameModule> + Send + Sync + 'static,
    {
        self.register(SimpleGameFactory::new(descriptor, constructor))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn descriptor(&self, id: &str) -> Option<&GameDescriptor> {
        self.factories.get(id).map(|f| f.descriptor())
    }

    /// All registered descriptors, sorted by id.
    pub fn descriptors(&self) -> Vec<GameDescriptor> {
        let mut descriptors: Vec<_> = self.factories.values().map(|f| f.descriptor().clone()).collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    /// Instantiates the module registered under `id`.
    pub fn create(&self, id: &str) -> Result<(GameDescriptor, Box<dyn GameModule>), LobbyError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| LobbyError::UnknownGameId(id.to_string()))?;
        Ok((factory.descriptor().clone(), factory.create()))
    }
}
