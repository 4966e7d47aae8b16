//! # Lobby Runtime
//!
//! Server-side runtime for short-lived multiplayer game sessions ("lobbies").
//! A host display creates a lobby for a registered game and gets back a short
//! join code; players join with the code and a display name; the game's rules
//! live in a pluggable [`GameModule`] that the runtime drives through a small
//! set of lifecycle hooks.
//!
//! The runtime contains **no game logic**. It provides:
//!
//! * **Connection registry** - identities, display names, lobby membership and
//!   non-blocking outbound queues ([`ConnectionRegistry`])
//! * **Lobby manager** - code allocation, routing and teardown ([`LobbyManager`])
//! * **Dispatch units** - one task per lobby that serializes every hook call,
//!   timer firing and end for that lobby
//! * **Lobby API** - the capability objects a module uses to message members
//!   and schedule timers ([`LobbyApi`], [`LobbyView`])
//! * **WebSocket transport** - JSON text frames over `tokio-tungstenite`
//!   ([`LobbyServer`])
//!
//! ## Message Flow
//!
//! 1. Client sends `{ "event": ..., "payload": ... }`
//! 2. The frame is parsed into a [`lobby_types::ClientRequest`]
//! 3. The manager routes it to the target lobby's dispatch unit
//! 4. The dispatch unit runs the module hook with exclusive access to lobby state
//! 5. Whatever the module sends is queued to recipients as
//!    `{ "eventName": ..., "payload": ... }`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let mut games = GameRegistry::new();
//! games.register_fn(GameDescriptor::new("counter", "Counter"), || Box::new(Counter::default()))?;
//!
//! let server = LobbyServer::new(ServerConfig::default(), games);
//! server.start().await?;
//! ```

pub use api::{LobbyApi, LobbyView, Origin, Roster};
pub use code::CodeGenerator;
pub use config::ServerConfig;
pub use dispatch::{HOST_LEFT_REASON, IDLE_REASON, INTERNAL_ERROR_REASON};
pub use error::ServerError;
pub use manager::{LobbyManager, ManagerStats, HOST_ENDED_REASON, SHUTDOWN_REASON};
pub use module::{GameFactory, GameModule, GameRegistry, SimpleGameFactory};
pub use registry::{Connection, ConnectionRegistry, Membership, Outbound};
pub use server::LobbyServer;
pub use timers::TimerFired;

pub mod api;
pub mod code;
pub mod config;
pub mod error;
pub mod manager;
pub mod module;
pub mod registry;
pub mod server;
pub mod transport;

mod dispatch;
mod timers;
