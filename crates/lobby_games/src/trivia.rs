//! Trivia
//!
//! A host display shows each question while players answer from their own
//! devices. Every round is driven by two timers: a one-shot round timer that
//! triggers the reveal, and a repeating one-second countdown that keeps
//! screens in sync. A round also ends early once every player has answered.
//!
//! Actions:
//!
//! * `{ "action": "start" }` - host or player; needs the minimum player count
//! * `{ "action": "answer", "choice": 2 }` - player; first answer per round counts
//!
//! After the last reveal everyone receives `finalScores` and the lobby ends.

use lobby_runtime::{GameModule, LobbyApi, LobbyView, Origin, TimerFired};
use lobby_types::{ConnectionId, GameDescriptor, ModuleError, PlayerRecord, TimerId};
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

pub const GAME_ID: &str = "trivia";

const ROUND_END: &str = "roundEnd";
const COUNTDOWN: &str = "countdown";
const NEXT_QUESTION: &str = "nextQuestion";

pub fn descriptor() -> GameDescriptor {
    GameDescriptor::new(GAME_ID, "Trivia")
        .players(1, 8)
        .description("Timed multiple-choice questions. Fastest fingers on the couch win.")
}

#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub prompt: String,
    pub choices: Vec<String>,
    #[serde(skip)]
    pub answer: usize,
}

impl Question {
    pub fn new(prompt: &str, choices: &[&str], answer: usize) -> Self {
        Self {
            prompt: prompt.to_string(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
            answer,
        }
    }
}

fn builtin_questions() -> Vec<Question> {
    vec![
        Question::new("Which planet is known as the Red Planet?", &["Venus", "Mars", "Jupiter", "Mercury"], 1),
        Question::new("How many sides does a hexagon have?", &["5", "6", "7", "8"], 1),
        Question::new("What is the chemical symbol for gold?", &["Ag", "Gd", "Au", "Go"], 2),
        Question::new("Which ocean is the largest?", &["Atlantic", "Indian", "Arctic", "Pacific"], 3),
        Question::new("Who painted the Mona Lisa?", &["Leonardo da Vinci", "Michelangelo", "Raphael", "Donatello"], 0),
        Question::new("What is the boiling point of water at sea level in Celsius?", &["90", "100", "110", "120"], 1),
        Question::new("Which language has the most native speakers?", &["English", "Spanish", "Mandarin", "Hindi"], 2),
        Question::new("How many continents are there?", &["5", "6", "7", "8"], 2),
    ]
}

/// Round timing.
#[derive(Debug, Clone, Copy)]
pub struct TriviaTiming {
    pub round: Duration,
    pub reveal_pause: Duration,
    pub tick: Duration,
}

impl Default for TriviaTiming {
    fn default() -> Self {
        Self {
            round: Duration::from_secs(20),
            reveal_pause: Duration::from_secs(5),
            tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Lobby,
    Question,
    Reveal,
    Finished,
}

#[derive(Debug, Clone, Serialize)]
struct Score {
    id: ConnectionId,
    name: String,
    score: u32,
}

pub struct Trivia {
    questions: Vec<Question>,
    timing: TriviaTiming,
    phase: Phase,
    current: usize,
    scores: HashMap<ConnectionId, Score>,
    answers: HashMap<ConnectionId, usize>,
    round_timer: Option<TimerId>,
    countdown: Option<TimerId>,
    remaining: u64,
}

impl Default for Trivia {
    fn default() -> Self {
        let mut questions = builtin_questions();
        questions.shuffle(&mut rand::thread_rng());
        questions.truncate(5);
        Self::new(questions, TriviaTiming::default())
    }
}

impl Trivia {
    pub fn new(questions: Vec<Question>, timing: TriviaTiming) -> Self {
        Self {
            questions,
            timing,
            phase: Phase::Lobby,
            current: 0,
            scores: HashMap::new(),
            answers: HashMap::new(),
            round_timer: None,
            countdown: None,
            remaining: 0,
        }
    }

    fn ranking(&self) -> Vec<Score> {
        let mut ranking: Vec<Score> = self.scores.values().cloned().collect();
        ranking.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        ranking
    }

    fn notify(api: &mut LobbyApi<'_>, from: &Origin<'_>, event: &str, payload: Value) {
        match from {
            Origin::Host(_) => api.send_to_host(event, payload),
            Origin::Player(player) => api.send_to_player(player.id, event, payload),
        }
    }

    fn start(&mut self, lobby: &LobbyView<'_>, api: &mut LobbyApi<'_>, from: &Origin<'_>) {
        if self.phase != Phase::Lobby {
            return Self::notify(api, from, "invalidAction", json!({ "reason": "game already started" }));
        }
        if !lobby.has_min_players() {
            let needed = lobby.descriptor().min_players;
            return Self::notify(api, from, "invalidAction", json!({ "reason": "not enough players", "needed": needed }));
        }
        if self.questions.is_empty() {
            return Self::notify(api, from, "invalidAction", json!({ "reason": "no questions loaded" }));
        }

        for player in lobby.players() {
            self.scores.entry(player.id).or_insert_with(|| Score {
                id: player.id,
                name: player.name.clone(),
                score: 0,
            });
        }
        info!(lobby = %lobby.code(), "🧠 Trivia starting with {} players", lobby.player_count());
        self.ask(api, 0);
    }

    fn ask(&mut self, api: &mut LobbyApi<'_>, index: usize) {
        self.phase = Phase::Question;
        self.current = index;
        self.answers.clear();
        self.remaining = self.timing.round.as_secs();

        let question = &self.questions[index];
        api.send_to_everyone(
            "question",
            json!({
                "index": index,
                "total": self.questions.len(),
                "prompt": question.prompt,
                "choices": question.choices,
                "seconds": self.remaining,
            }),
        );
        self.round_timer = Some(api.schedule(self.timing.round, ROUND_END));
        self.countdown = Some(api.schedule_repeating(self.timing.tick, COUNTDOWN));
    }

    fn answer(&mut self, lobby: &LobbyView<'_>, api: &mut LobbyApi<'_>, from: &Origin<'_>, payload: &Value) {
        let Some(player) = from.player() else {
            return Self::notify(api, from, "invalidAction", json!({ "reason": "the host cannot answer" }));
        };
        if self.phase != Phase::Question {
            return api.send_to_player(player.id, "invalidAction", json!({ "reason": "no open question" }));
        }
        let choices = self.questions[self.current].choices.len();
        let Some(choice) = payload.get("choice").and_then(Value::as_u64).map(|c| c as usize).filter(|c| *c < choices) else {
            return api.send_to_player(player.id, "invalidAction", json!({ "reason": "choice out of range" }));
        };
        if self.answers.contains_key(&player.id) {
            return api.send_to_player(player.id, "invalidAction", json!({ "reason": "already answered" }));
        }

        self.answers.insert(player.id, choice);
        api.send_to_player(player.id, "answerAccepted", json!({ "choice": choice }));
        api.send_to_host("playerAnswered", json!({ "id": player.id, "answered": self.answers.len() }));

        if self.everyone_answered(lobby) {
            self.reveal(api);
        }
    }

    fn everyone_answered(&self, lobby: &LobbyView<'_>) -> bool {
        lobby.player_count() > 0 && lobby.players().iter().all(|p| self.answers.contains_key(&p.id))
    }

    fn stop_round_timers(&mut self, api: &mut LobbyApi<'_>) {
        if let Some(id) = self.round_timer.take() {
            api.cancel_timer(id);
        }
        if let Some(id) = self.countdown.take() {
            api.cancel_timer(id);
        }
    }

    fn reveal(&mut self, api: &mut LobbyApi<'_>) {
        self.stop_round_timers(api);
        self.phase = Phase::Reveal;

        let correct = self.questions[self.current].answer;
        let mut winners = Vec::new();
        for (id, choice) in &self.answers {
            if *choice == correct {
                if let Some(score) = self.scores.get_mut(id) {
                    score.score += 1;
                }
                winners.push(*id);
            }
        }

        api.send_to_everyone(
            "reveal",
            json!({ "index": self.current, "answer": correct, "correct": winners, "scores": self.ranking() }),
        );

        if self.current + 1 < self.questions.len() {
            api.schedule(self.timing.reveal_pause, NEXT_QUESTION);
        } else {
            self.phase = Phase::Finished;
            api.send_to_everyone("finalScores", json!({ "scores": self.ranking() }));
            api.end_lobby("game over");
        }
    }
}

impl GameModule for Trivia {
    fn on_init(&mut self, lobby: &LobbyView<'_>, _api: &mut LobbyApi<'_>) -> Result<(), ModuleError> {
        debug!(lobby = %lobby.code(), "Trivia loaded {} questions", self.questions.len());
        Ok(())
    }

    fn on_player_join(
        &mut self,
        _lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        player: &PlayerRecord,
    ) -> Result<(), ModuleError> {
        if self.phase != Phase::Lobby {
            self.scores.entry(player.id).or_insert_with(|| Score {
                id: player.id,
                name: player.name.clone(),
                score: 0,
            });
        }
        api.send_to_player(player.id, "triviaState", self.snapshot());
        Ok(())
    }

    fn on_player_leave(
        &mut self,
        lobby: &LobbyView<'_>,
        api: &mut LobbyApi<'_>,
        player: &PlayerRecord,
    ) -> Result<(), ModuleError> {
        self.answers.remove(&player.id);
        if lobby.player_count() == 0 && self.phase != Phase::Lobby {
            api.end_lobby("no players left");
        } else if self.phase == Phase::Question && self.everyone_answered(lobby) {
            self.reveal(api);
        }
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
            Some("start") => self.start(lobby, api, &from),
            Some("answer") => self.answer(lobby, api, &from, payload),
            other => debug!(lobby = %lobby.code(), "trivia: ignoring action {:?}", other),
        }
        Ok(())
    }

    fn on_timer(&mut self, _lobby: &LobbyView<'_>, api: &mut LobbyApi<'_>, timer: &TimerFired) -> Result<(), ModuleError> {
        match timer.tag.as_str() {
            COUNTDOWN if self.phase == Phase::Question => {
                self.remaining = self.remaining.saturating_sub(self.timing.tick.as_secs().max(1));
                api.send_to_everyone("countdown", json!({ "remaining": self.remaining }));
            }
            ROUND_END if self.phase == Phase::Question => {
                self.round_timer = None;
                self.reveal(api);
            }
            NEXT_QUESTION if self.phase == Phase::Reveal => self.ask(api, self.current + 1),
            _ => {}
        }
        Ok(())
    }

    fn snapshot(&self) -> Value {
        json!({
            "phase": self.phase,
            "question": self.current,
            "total": self.questions.len(),
            "scores": self.ranking(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answers_are_not_serialized() {
        let question = Question::new("2 + 2?", &["3", "4"], 1);
        let value = serde_json::to_value(&question).unwrap();
        assert!(value.get("answer").is_none());
        assert_eq!(value["choices"], json!(["3", "4"]));
    }

    #[test]
    fn test_default_game_draws_builtin_questions() {
        let trivia = Trivia::default();
        assert_eq!(trivia.questions.len(), 5);
        assert!(trivia.questions.iter().all(|q| q.answer < q.choices.len()));
        assert_eq!(trivia.phase, Phase::Lobby);
    }
}
