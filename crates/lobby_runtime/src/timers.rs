//! Cancellable timers owned by a lobby.
//!
//! A timer is a small tokio task that, when due, posts a
//! [`LobbyCommand::Timer`] into its lobby's command queue. The firing is then
//! handled by the dispatch unit like any other command, so `on_timer` never
//! runs concurrently with another hook. A firing that arrives after its timer
//! was cancelled is discarded.

use crate::dispatch::LobbyCommand;
use lobby_types::TimerId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Delivered to a module's `on_timer` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub id: TimerId,
    /// Label chosen by the module when scheduling.
    pub tag: String,
    pub repeating: bool,
}

struct ActiveTimer {
    tag: String,
    repeating: bool,
    handle: JoinHandle<()>,
}

pub(crate) struct TimerSet {
    next_id: u64,
    active: HashMap<TimerId, ActiveTimer>,
    commands: mpsc::UnboundedSender<LobbyCommand>,
}

impl TimerSet {
    pub(crate) fn new(commands: mpsc::UnboundedSender<LobbyCommand>) -> Self {
        Self {
            next_id: 0,
            active: HashMap::new(),
            commands,
        }
    }

    fn allocate(&mut self) -> TimerId {
        self.next_id += 1;
        TimerId(self.next_id)
    }

    pub(crate) fn schedule(&mut self, delay: Duration, tag: String) -> TimerId {
        let id = self.allocate();
        let commands = self.commands.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = commands.send(LobbyCommand::Timer { id });
        });
        self.active.insert(id, ActiveTimer { tag, repeating: false, handle });
        id
    }

    pub(crate) fn schedule_repeating(&mut self, period: Duration, tag: String) -> TimerId {
        let id = self.allocate();
        let commands = self.commands.clone();
        // A zero period would make `interval_at` panic.
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if commands.send(LobbyCommand::Timer { id }).is_err() {
                    break;
                }
            }
        });
        self.active.insert(id, ActiveTimer { tag, repeating: true, handle });
        id
    }

    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        match self.active.remove(&id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Resolves a firing. One-shot timers are retired; stale ids yield `None`.
    pub(crate) fn fired(&mut self, id: TimerId) -> Option<TimerFired> {
        let repeating = self.active.get(&id)?.repeating;
        if repeating {
            let timer = self.active.get(&id)?;
            Some(TimerFired { id, tag: timer.tag.clone(), repeating: true })
        } else {
            let timer = self.active.remove(&id)?;
            Some(TimerFired { id, tag: timer.tag, repeating: false })
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, timer) in self.active.drain() {
            timer.handle.abort();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn timer_id(command: LobbyCommand) -> TimerId {
        match command {
            LobbyCommand::Timer { id } => id,
            _ => panic!("expected a timer command"),
        }
    }

    #[tokio::test]
    async fn test_one_shot_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);
        let id = timers.schedule(Duration::from_millis(10), "round".to_string());

        let fired = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(timer_id(fired), id);

        let event = timers.fired(id).expect("live timer resolves");
        assert_eq!(event.tag, "round");
        assert!(!event.repeating);
        assert!(timers.fired(id).is_none(), "one-shot timers retire after firing");
        assert_eq!(timers.len(), 0);
    }

    #[tokio::test]
    async fn test_repeating_keeps_firing_until_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);
        let id = timers.schedule_repeating(Duration::from_millis(5), "tick".to_string());

        for _ in 0..3 {
            let fired = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            assert_eq!(timer_id(fired), id);
            assert!(timers.fired(id).is_some());
        }

        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        // Anything already queued is now stale.
        assert!(timers.fired(id).is_none());
    }

    #[tokio::test]
    async fn test_cancel_all_stops_pending_timers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);
        timers.schedule(Duration::from_millis(20), "a".to_string());
        timers.schedule_repeating(Duration::from_millis(20), "b".to_string());
        timers.cancel_all();
        assert_eq!(timers.len(), 0);

        let nothing = timeout(Duration::from_millis(80), rx.recv()).await;
        assert!(nothing.is_err(), "no timer should fire after cancel_all");
    }
}
