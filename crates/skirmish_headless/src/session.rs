//! Interactive session: a controller drives one battle over JSON lines.

use std::io::{BufRead, Write};

use skirmish_core::data::ActorPlacement;
use skirmish_core::math::Vec3Fixed;
use skirmish_core::orders::{Command as CoreCommand, ScheduledOrder};
use skirmish_core::simulation::{BattleSim, SimState};

use crate::error::Result;
use crate::protocol::{ActorState, Command, Response};

/// One battle under external control.
#[derive(Debug)]
pub struct Session {
    sim: BattleSim,
    auto_state: bool,
}

impl Session {
    /// Wrap a loaded battle. With `auto_state`, every `tick` command is
    /// followed by a full state report.
    #[must_use]
    pub const fn new(sim: BattleSim, auto_state: bool) -> Self {
        Self { sim, auto_state }
    }

    /// The battle being driven.
    #[must_use]
    pub const fn sim(&self) -> &BattleSim {
        &self.sim
    }

    /// Read commands until `quit`, end of input, or the battle stops.
    ///
    /// Returns the battle so callers can inspect or record it.
    ///
    /// # Errors
    /// Returns an error if reading input or writing output fails. Bad
    /// commands are answered with an error response instead.
    pub fn run<R: BufRead, W: Write>(mut self, input: R, output: &mut W) -> Result<BattleSim> {
        write_response(output, &Response::ready(self.sim.tick()))?;

        for line in input.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let responses = match Command::from_json(line) {
                Ok(command) => self.handle(command),
                Err(e) => vec![Response::error(format!("Invalid command: {e}"), None)],
            };
            for response in &responses {
                write_response(output, response)?;
            }

            if self.sim.state() == SimState::Stopped {
                return Ok(self.sim);
            }
        }

        tracing::info!(tick = self.sim.tick(), "Input closed, ending session");
        self.sim.shutdown();
        Ok(self.sim)
    }

    /// Execute one command.
    pub fn handle(&mut self, command: Command) -> Vec<Response> {
        let name = command.name();
        match command {
            Command::Tick { count } => self.tick(count),
            Command::Query => vec![self.state()],
            Command::Hash => vec![Response::StateHash {
                tick: self.sim.tick(),
                hash: self.sim.state_hash(),
            }],
            Command::Quit => {
                self.sim.shutdown();
                vec![Response::Bye {
                    tick: self.sim.tick(),
                }]
            }
            Command::Place {
                actor_type,
                team,
                x,
                y,
                completion,
                builders,
            } => {
                let placement = ActorPlacement::new(actor_type, team, [x, y])
                    .with_completion(completion.unwrap_or(100.0));
                match self.sim.place_actor(&placement, &builders) {
                    Ok(handle) => vec![Response::Placed {
                        actor: handle.id(),
                    }],
                    Err(e) => vec![Response::error(e.to_string(), Some(name))],
                }
            }
            Command::Move { actor, x, y, queue } => match position(x, y) {
                Some(pos) => vec![self.order(actor, CoreCommand::Move, Some(pos), None, queue, name)],
                None => vec![Response::error("position out of range", Some(name))],
            },
            Command::Attack {
                actor,
                target,
                queue,
            } => vec![self.order(actor, CoreCommand::Attack, None, Some(target), queue, name)],
            Command::Stop { actor } => vec![self.order(actor, CoreCommand::Stop, None, None, false, name)],
            Command::Build {
                actor,
                type_name,
                x,
                y,
                queue,
            } => {
                let pos = match (x, y) {
                    (Some(x), Some(y)) => match position(x, y) {
                        Some(pos) => Some(pos),
                        None => return vec![Response::error("position out of range", Some(name))],
                    },
                    _ => None,
                };
                vec![self.order(actor, CoreCommand::Build(type_name), pos, None, queue, name)]
            }
        }
    }

    fn order(
        &mut self,
        actor: u64,
        command: CoreCommand,
        pos: Option<Vec3Fixed>,
        target: Option<u64>,
        queue: bool,
        name: &str,
    ) -> Response {
        if self.sim.state() != SimState::Running {
            return Response::error("battle is not running", Some(name));
        }
        let target = target.map(Into::into);
        let scheduled: ScheduledOrder = if queue {
            self.sim.queue_order(actor, command, pos, target)
        } else {
            self.sim.add_order(actor, command, pos, target)
        };
        Response::Ack {
            cmd: name.to_string(),
            applies_at: scheduled.tick,
        }
    }

    fn tick(&mut self, count: u32) -> Vec<Response> {
        let mut spawned = Vec::new();
        let mut deaths = Vec::new();
        let mut hits = Vec::new();
        let mut failure = None;

        for _ in 0..count {
            if self.sim.state() != SimState::Running {
                break;
            }
            match self.sim.step() {
                Ok(events) => {
                    spawned.extend(events.spawned);
                    deaths.extend(events.deaths);
                    hits.extend(events.hits);
                }
                Err(e) => {
                    tracing::error!(tick = self.sim.tick(), error = %e, "Battle step failed");
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut responses = vec![Response::Ticked {
            tick: self.sim.tick(),
            spawned,
            deaths,
            hits,
        }];
        if let Some(e) = failure {
            responses.push(Response::error(e.to_string(), Some("tick")));
            self.sim.shutdown();
        }
        if self.auto_state {
            responses.push(self.state());
        }
        if self.sim.state() == SimState::Stopped {
            responses.push(Response::Bye {
                tick: self.sim.tick(),
            });
        }
        responses
    }

    fn state(&self) -> Response {
        Response::State {
            tick: self.sim.tick(),
            actors: self.sim.actors().iter().map(ActorState::of).collect(),
            bullets: self.sim.bullets().len(),
            hash: self.sim.state_hash(),
        }
    }
}

fn position(x: f64, y: f64) -> Option<Vec3Fixed> {
    Vec3Fixed::from_wire(&[x, y])
}

fn write_response<W: Write>(output: &mut W, response: &Response) -> Result<()> {
    output.write_all(response.to_json_line().as_bytes())?;
    output.flush()?;
    Ok(())
}
