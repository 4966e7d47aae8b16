//! Tic-tac-toe
//!
//! Two seats, `X` and `O`. The first player to join takes `X`, the second `O`,
//! and `X` moves first. The game starts as soon as both seats are filled and
//! drops back to `waiting` if either player leaves.
//!
//! Actions:
//!
//! * `{ "index": 4 }` or `{ "action": "move", "index": 4 }` - place a mark
//! * `{ "action": "restart" }` - clear the board and play again
//!
//! Illegal moves are answered with `invalidMove` to the mover only and leave
//! the game untouched.

use lobby_runtime::{GameModule, LobbyApi, LobbyView, Origin};
use lobby_types::{ConnectionId, GameDescriptor, ModuleError, PlayerRecord};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

pub const GAME_ID: &str = "tictactoe";

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

pub fn descriptor() -> GameDescriptor {
    GameDescriptor::new(GAME_ID, "Tic-Tac-Toe")
        .players(2, 2)
        .description("Classic three-in-a-row for two players.")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mark {
    X,
    O,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Seat {
    id: ConnectionId,
    mark: Mark,
}

enum Command {
    Move(i64),
    Restart,
}

impl Command {
    fn parse(payload: &Value) -> Option<Self> {
        match payload.get("action").and_then(Value::as_str) {
            None | Some("move") => payload.get("index").and_then(Value::as_i64).map(Command::Move),
            Some("restart") => Some(Command::Restart),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct TicTacToe {
    board: [Option<Mark>; 9],
    seats: Vec<Seat>,
    current_turn: Option<ConnectionId>,
    phase: Phase,
    winner: Option<ConnectionId>,
}

impl TicTacToe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn mark_of(&self, id: ConnectionId) -> Option<Mark> {
        self.seats.iter().find(|s| s.id == id).map(|s| s.mark)
    }

    fn holder_of(&self, mark: Mark) -> Option<ConnectionId> {
        self.seats.iter().find(|s| s.mark == mark).map(|s| s.id)
    }

    fn state(&self) -> Value {
        json!({
            "phase": self.phase,
            "board": self.board,
            "players": self.seats,
            "currentTurn": self.current_turn,
            "winner": self.winner,
        })
    }

    fn start(&mut self, api: &mut LobbyApi<'_>) {
        self.board = [None; 9];
        self.winner = None;
        self.current_turn = self.holder_of(Mark::X);
        self.phase = Phase::Playing;
        api.send_to_everyone("gameStart", self.state());
    }

    fn reject(api: &mut LobbyApi<'_>, from: &Origin<'_>, reason: &str) {
        let payload = json!({ "reason": reason });
        match from {
            Origin::Host(_) => api.send_to_host("invalidMove", payload),
            Origin::Player(player) => api.send_to_player(player.id, "invalidMove", payload),
        }
    }

    fn play(&mut self, api: &mut LobbyApi<'_>, from: &Origin<'_>, index: i64) {
        if self.phase != Phase::Playing {
            return Self::reject(api, from, "game is not in progress");
        }
        let mover = from.id();
        if self.current_turn != Some(mover) {
            return Self::reject(api, from, "not your turn");
        }
        let Some(mark) = self.mark_of(mover) else {
            return Self::reject(api, from, "not seated");
        };
        let Some(cell) = usize::try_from(index).ok().filter(|i| *i < self.board.len()) else {
            return Self::reject(api, from, "index out of range");
        };
        if self.board[cell].is_some() {
            return Self::reject(api, from, "cell taken");
        }

        self.board[cell] = Some(mark);

        if let Some(line) = self.winning_line() {
            self.phase = Phase::Finished;
            self.current_turn = None;
            self.winner = Some(mover);
            api.send_to_everyone(
                "gameOver",
                json!({ "winner": mover, "mark": mark, "line": line, "board": self.board }),
            );
        } else if self.board.iter().all(Option::is_some) {
            self.phase = Phase::Finished;
            self.current_turn = None;
            api.send_to_everyone("gameOver", json!({ "winner": null, "draw": true, "board": self.board }));
        } else {
            let next = match mark {
                Mark::X => Mark::O,
                Mark::O => Mark::X,
            };
            self.current_turn = self.holder_of(next);
            api.send_to_everyone("boardUpdate", json!({ "index": cell, "mark": mark, "state": self.state() }));
        }
    }

    fn winning_line(&self) -> Option<[usize; 3]> {
        LINES.into_iter().find(|[a, b, c]| {
            self.board[*a].is_some() && self.board[*a] == self.board[*b] && self.board[*b] == self.board[*c]
        })
    }
}

impl GameModule for TicTacToe {
    fn on_player_join(
        &mut self,
        _lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        player: &PlayerRecord,
    ) -> Result<(), ModuleError> {
        let mark = if self.holder_of(Mark::X).is_none() { Mark::X } else { Mark::O };
        self.seats.push(Seat { id: player.id, mark });
        api.send_to_player(player.id, "seat", json!({ "mark": mark }));

        if self.seats.len() == 2 {
            self.start(api);
        } else {
            api.send_to_everyone("waiting", self.state());
        }
        Ok(())
    }

    fn on_player_leave(
        &mut self,
        _lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        player: &PlayerRecord,
    ) -> Result<(), ModuleError> {
        self.seats.retain(|s| s.id != player.id);
        self.board = [None; 9];
        self.current_turn = None;
        self.winner = None;
        self.phase = Phase::Waiting;
        api.send_to_everyone("waiting", json!({ "reason": "opponent left", "state": self.state() }));
        Ok(())
    }

    fn on_action(
        &mut self,
        _lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        from: Origin<'_>,
        payload: &Value,
    ) -> Result<(), ModuleError> {
        match Command::parse(payload) {
            Some(Command::Move(index)) => self.play(api, &from, index),
            Some(Command::Restart) => {
                if self.seats.len() == 2 {
                    self.start(api);
                } else {
                    Self::reject(api, &from, "waiting for players");
                }
            }
            None => debug!(lobby = %api.code(), "tictactoe: ignoring unknown action {}", payload),
        }
        Ok(())
    }

    fn snapshot(&self) -> Value {
        self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert!(matches!(Command::parse(&json!({ "index": 3 })), Some(Command::Move(3))));
        assert!(matches!(Command::parse(&json!({ "action": "move", "index": 8 })), Some(Command::Move(8))));
        assert!(matches!(Command::parse(&json!({ "action": "restart" })), Some(Command::Restart)));
        assert!(Command::parse(&json!({ "action": "dance" })).is_none());
        assert!(Command::parse(&json!({})).is_none());
    }

    #[test]
    fn test_winning_line_detection() {
        let mut game = TicTacToe::new();
        game.board[2] = Some(Mark::O);
        game.board[4] = Some(Mark::O);
        assert_eq!(game.winning_line(), None);
        game.board[6] = Some(Mark::O);
        assert_eq!(game.winning_line(), Some([2, 4, 6]));
    }
}
