//! # Lobby Games
//!
//! Game modules for the lobby runtime. Each module exposes a `descriptor()`
//! and a type implementing [`lobby_runtime::GameModule`];
//! [`builtin_registry`] registers all of them.
//!
//! * [`tictactoe`] - two-player three-in-a-row
//! * [`trivia`] - timed multiple-choice rounds for up to eight players
//! * [`test_game`] - echo/diagnostics module for exercising the runtime
//! * [`template`] - skeleton for new games

pub mod template;
pub mod test_game;
pub mod tictactoe;
pub mod trivia;

use lobby_runtime::{GameRegistry, ServerError};

/// Registry with every game in this crate.
pub fn builtin_registry() -> Result<GameRegistry, ServerError> {
    let mut games = GameRegistry::new();
    games.register_fn(tictactoe::descriptor(), || Box::new(tictactoe::TicTacToe::new()))?;
    games.register_fn(trivia::descriptor(), || Box::new(trivia::Trivia::default()))?;
    games.register_fn(test_game::descriptor(), || Box::new(test_game::TestGame::new()))?;
    games.register_fn(template::descriptor(), || Box::new(template::Template::default()))?;
    Ok(games)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_lists_all_games() {
        let games = builtin_registry().unwrap();
        let ids: Vec<_> = games.descriptors().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["template", "test_game", "tictactoe", "trivia"]);
        assert_eq!(games.descriptor("tictactoe").and_then(|d| d.max_players), Some(2));
    }
}
