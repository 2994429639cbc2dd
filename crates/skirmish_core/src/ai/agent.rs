//! The agent side of the AI protocol.
//!
//! [`run_agent`] is the loop every agent runs, on a thread or in a
//! subprocess: it announces preferences, keeps an [`AgentView`] of the
//! battlefield up to date from incoming messages, and calls the agent's
//! decision step on the agent's own cadence. It exits on `quit`, on a
//! disconnected inbox, or when the time-to-live runs out.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use super::protocol::{ActorSnapshot, AiOrder, AiPrefs, FromAi, SnapshotOrder, ToAi};
use crate::actors::{ActorId, TeamId};
use crate::data::ActorType;

/// Default time between decision steps.
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_millis(100);

/// What an agent knows about the battle.
#[derive(Debug, Clone, Default)]
pub struct AgentView {
    /// Team the agent controls, once `init` has arrived.
    pub team: Option<TeamId>,
    /// Settings from `init`.
    pub settings: Map<String, Value>,
    /// The agent's own actors from the latest snapshot.
    pub own_actors: BTreeMap<ActorId, ActorSnapshot>,
    /// Everyone else's actors from the latest snapshot.
    pub enemy_actors: BTreeMap<ActorId, ActorSnapshot>,
    /// Actor templates.
    pub actor_types: BTreeMap<String, ActorType>,
    /// Build lists.
    pub build_lists: BTreeMap<String, Vec<String>>,
    /// Set when a snapshot arrives; agents clear it once they have reacted.
    pub actors_updated: bool,
}

impl AgentView {
    /// Fold one message into the view.
    pub fn apply(&mut self, message: ToAi) {
        match message {
            ToAi::Init { team, settings } => {
                self.team = Some(team);
                self.settings = settings;
            }
            ToAi::Actors { actor_list } => {
                self.own_actors.clear();
                self.enemy_actors.clear();
                for actor in actor_list.into_snapshots() {
                    if Some(actor.team) == self.team {
                        self.own_actors.insert(actor.oid, actor);
                    } else {
                        self.enemy_actors.insert(actor.oid, actor);
                    }
                }
                self.actors_updated = true;
            }
            ToAi::ActorTypes { actor_types } => self.actor_types = actor_types,
            ToAi::BuildLists { build_lists } => self.build_lists = build_lists,
            ToAi::Quit => {}
        }
    }
}

/// Decision logic for one team.
pub trait AiAgent: Send {
    /// Preferences announced when the agent starts.
    fn prefs(&self) -> AiPrefs {
        AiPrefs::default()
    }

    /// Time between decision steps.
    fn cycle_interval(&self) -> Duration {
        DEFAULT_CYCLE_INTERVAL
    }

    /// Decide on orders given the current view.
    fn cycle(&mut self, view: &mut AgentView) -> Vec<AiOrder>;
}

/// Why an agent loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// A `quit` message arrived.
    Quit,
    /// The simulation dropped its end of a channel.
    Disconnected,
    /// The time-to-live ran out.
    TimeToLive,
}

/// Run `agent` until it is told to quit, loses its simulation or times out.
///
/// `post` delivers a message to the simulation and returns `false` once the
/// simulation is gone.
pub fn run_agent(
    mut agent: Box<dyn AiAgent>,
    inbox: &Receiver<Value>,
    post: &mut dyn FnMut(Value) -> bool,
    ttl: Duration,
) -> AgentExit {
    let started = Instant::now();
    let mut view = AgentView::default();

    if !post_message(post, &FromAi::Prefs { prefs: agent.prefs() }) {
        return AgentExit::Disconnected;
    }

    let interval = agent.cycle_interval();
    let mut next_cycle = Instant::now();

    loop {
        let elapsed = started.elapsed();
        if elapsed >= ttl {
            tracing::warn!(team = ?view.team, ttl_secs = ttl.as_secs(), "AI time-to-live reached, exiting");
            return AgentExit::TimeToLive;
        }

        let wait = next_cycle
            .saturating_duration_since(Instant::now())
            .min(ttl - elapsed);
        let mut pending = match inbox.recv_timeout(wait) {
            Ok(value) => vec![value],
            Err(RecvTimeoutError::Timeout) => Vec::new(),
            Err(RecvTimeoutError::Disconnected) => return AgentExit::Disconnected,
        };
        pending.extend(inbox.try_iter());

        for value in pending {
            match ToAi::from_value(value) {
                Ok(ToAi::Quit) => {
                    tracing::debug!(team = ?view.team, "AI received quit");
                    return AgentExit::Quit;
                }
                Ok(message) => view.apply(message),
                Err(e) => tracing::warn!(error = %e, "AI ignoring unrecognized message"),
            }
        }

        if Instant::now() >= next_cycle {
            for order in agent.cycle(&mut view) {
                if !post_message(post, &FromAi::Orders(order)) {
                    return AgentExit::Disconnected;
                }
            }
            next_cycle = Instant::now() + interval;
        }
    }
}

/// Run `agent` over a line stream: one JSON message per line in each
/// direction.
///
/// This is the subprocess side of the AI protocol. Lines that are not JSON
/// are handed to the agent loop as strings, which logs and skips them.
pub fn run_line_agent<R, W>(
    agent: Box<dyn AiAgent>,
    input: R,
    output: &mut W,
    ttl: Duration,
) -> AgentExit
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let (tx, inbox) = mpsc::channel();
    let reader = thread::Builder::new()
        .name("ai-input".to_string())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let value = serde_json::from_str(&line).unwrap_or(Value::String(line));
                if tx.send(value).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = reader {
        tracing::error!(error = %e, "Failed to start AI input reader");
        return AgentExit::Disconnected;
    }

    let mut post = |value: Value| {
        serde_json::to_writer(&mut *output, &value).is_ok()
            && output.write_all(b"\n").is_ok()
            && output.flush().is_ok()
    };
    run_agent(agent, &inbox, &mut post, ttl)
}

fn post_message(post: &mut dyn FnMut(Value) -> bool, message: &FromAi) -> bool {
    match message.to_value() {
        Ok(value) => post(value),
        Err(e) => {
            tracing::warn!(error = %e, "AI failed to encode message");
            true
        }
    }
}

/// Built-in agent: send idle armed actors at the nearest enemy.
#[derive(Debug, Clone, Default)]
pub struct BasicAgent {
    prefs: AiPrefs,
}

impl BasicAgent {
    /// Agent announcing `prefs`.
    #[must_use]
    pub const fn with_prefs(prefs: AiPrefs) -> Self {
        Self { prefs }
    }
}

impl AiAgent for BasicAgent {
    fn prefs(&self) -> AiPrefs {
        self.prefs
    }

    fn cycle(&mut self, view: &mut AgentView) -> Vec<AiOrder> {
        if !view.actors_updated {
            return Vec::new();
        }
        view.actors_updated = false;

        let mut orders = Vec::new();
        for actor in view.own_actors.values_mut() {
            if actor.current_order.is_some() || actor.abilities.is_empty() || actor.completion < 100.0 {
                continue;
            }
            let nearest = view
                .enemy_actors
                .values()
                .map(|enemy| (distance_sq(&actor.pos, &enemy.pos), enemy.oid))
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            if let Some((_, target)) = nearest {
                let order = AiOrder::attack(actor.oid, target);
                // Remember the order so the next cycle does not repeat it.
                actor.current_order = Some(SnapshotOrder {
                    cmd: order.cmd.clone(),
                    pos: None,
                    target: order.target.clone(),
                });
                orders.push(order);
            }
        }
        orders
    }
}

fn distance_sq(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::protocol::ActorList;
    use serde_json::json;
    use std::sync::mpsc;

    fn snapshot(oid: ActorId, team: TeamId, x: f64) -> ActorSnapshot {
        ActorSnapshot {
            oid,
            actor_type: "Tank".to_string(),
            team,
            pos: vec![x, 0.0, 0.0],
            velocity: vec![0.0; 3],
            facing: [0.0; 2],
            hp: 10.0,
            max_hp: 10.0,
            completion: 100.0,
            abilities: vec!["Gun".to_string()],
            build_queue: Vec::new(),
            current_order: None,
        }
    }

    #[test]
    fn test_view_splits_own_and_enemy() {
        let mut view = AgentView::default();
        view.apply(ToAi::Init {
            team: 1,
            settings: Map::new(),
        });
        view.apply(ToAi::Actors {
            actor_list: ActorList::List(vec![snapshot(0, 1, 0.0), snapshot(1, 2, 5.0)]),
        });
        assert_eq!(view.own_actors.len(), 1);
        assert_eq!(view.enemy_actors.len(), 1);
        assert!(view.actors_updated);
    }

    #[test]
    fn test_basic_agent_attacks_nearest_once() {
        let mut view = AgentView::default();
        view.apply(ToAi::Init {
            team: 1,
            settings: Map::new(),
        });
        view.apply(ToAi::Actors {
            actor_list: ActorList::List(vec![
                snapshot(0, 1, 0.0),
                snapshot(1, 2, 50.0),
                snapshot(2, 2, -20.0),
            ]),
        });

        let mut agent = BasicAgent::default();
        assert_eq!(agent.cycle(&mut view), vec![AiOrder::attack(0, 2)]);
        assert!(agent.cycle(&mut view).is_empty());
    }

    #[test]
    fn test_run_agent_sends_prefs_then_quits() {
        let (to_agent, inbox) = mpsc::channel();
        let (outbox, from_agent) = mpsc::channel();
        to_agent.send(json!({"cmd": "quit"})).unwrap();

        let exit = run_agent(
            Box::new(BasicAgent::default()),
            &inbox,
            &mut |v| outbox.send(v).is_ok(),
            Duration::from_secs(5),
        );
        assert_eq!(exit, AgentExit::Quit);
        assert_eq!(
            from_agent.try_recv().unwrap(),
            json!({"data_type": "prefs", "prefs": {"actor_format": "list"}})
        );
    }

    #[test]
    fn test_run_agent_exits_at_time_to_live() {
        let (_to_agent, inbox) = mpsc::channel();
        let started = Instant::now();
        let exit = run_agent(
            Box::new(BasicAgent::default()),
            &inbox,
            &mut |_| true,
            Duration::from_millis(150),
        );
        assert_eq!(exit, AgentExit::TimeToLive);
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_line_agent_round_trip() {
        let input = concat!(
            r#"{"cmd": "init", "team": 1, "settings": {}}"#,
            "\n",
            "not json at all\n",
            r#"{"cmd": "quit"}"#,
            "\n"
        );
        let mut output = Vec::new();
        let exit = run_line_agent(
            Box::new(BasicAgent::default()),
            std::io::Cursor::new(input.as_bytes().to_vec()),
            &mut output,
            Duration::from_secs(5),
        );
        assert_eq!(exit, AgentExit::Quit);

        let text = String::from_utf8(output).unwrap();
        let first: Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["data_type"], "prefs");
    }

    #[test]
    fn test_run_agent_ignores_unknown_messages() {
        let (to_agent, inbox) = mpsc::channel();
        to_agent.send(json!({"cmd": "dance"})).unwrap();
        to_agent.send(json!({"cmd": "quit"})).unwrap();
        let exit = run_agent(
            Box::new(BasicAgent::default()),
            &inbox,
            &mut |_| true,
            Duration::from_secs(5),
        );
        assert_eq!(exit, AgentExit::Quit);
    }
}
