//! Links to AI agents and the per-team channel built on top of them.
//!
//! An [`AiLink`] moves JSON values to and from one agent without ever blocking
//! the caller. Two links exist: [`ThreadLink`] runs the agent on a thread in
//! this process, [`ProcessLink`] runs it as a child process speaking JSON
//! lines over stdin/stdout. [`AiChannel`] wraps a link with the protocol:
//! preference tracking, violation counting and status.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::protocol::{AiOrder, AiPrefs, FromAi, ToAi};
use crate::actors::TeamId;
use crate::error::{GameError, Result};

/// Violations tolerated before a channel stops accepting output.
pub const MAX_PROTOCOL_VIOLATIONS: u32 = 16;

/// How often the subprocess watchdog checks on its child.
const WATCHDOG_POLL: Duration = Duration::from_millis(50);

/// Non-blocking transport of JSON values to and from one agent.
pub trait AiLink: Send {
    /// Queue a message for the agent.
    fn send(&mut self, message: Value) -> Result<()>;

    /// Take one message from the agent if one is waiting.
    fn try_recv(&mut self) -> std::result::Result<Value, TryRecvError>;

    /// Whether the agent is still running.
    fn is_alive(&mut self) -> bool;

    /// Stop the agent without waiting for it to acknowledge.
    fn terminate(&mut self);
}

/// Agent running on a thread in this process.
pub struct ThreadLink {
    to_agent: Option<Sender<Value>>,
    from_agent: Receiver<Value>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadLink {
    /// Wrap the simulation ends of an agent thread's two channels.
    #[must_use]
    pub fn new(to_agent: Sender<Value>, from_agent: Receiver<Value>, handle: JoinHandle<()>) -> Self {
        Self {
            to_agent: Some(to_agent),
            from_agent,
            handle: Some(handle),
        }
    }

    /// Wait for the agent thread to finish.
    pub fn join(&mut self) {
        self.to_agent = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("AI agent thread panicked");
            }
        }
    }
}

impl AiLink for ThreadLink {
    fn send(&mut self, message: Value) -> Result<()> {
        let sender = self
            .to_agent
            .as_ref()
            .ok_or_else(|| GameError::InvalidState("AI link already terminated".to_string()))?;
        sender
            .send(message)
            .map_err(|_| GameError::InvalidState("AI agent inbox closed".to_string()))
    }

    fn try_recv(&mut self) -> std::result::Result<Value, TryRecvError> {
        self.from_agent.try_recv()
    }

    fn is_alive(&mut self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn terminate(&mut self) {
        // Dropping the sender wakes the agent with a disconnect.
        self.to_agent = None;
    }
}

/// Agent running as a child process.
///
/// A writer thread feeds stdin from a queue so that sends never block, a
/// reader thread turns stdout lines into values, and a watchdog kills the
/// child once its time-to-live has passed.
pub struct ProcessLink {
    child: Arc<Mutex<Child>>,
    to_writer: Option<Sender<Value>>,
    from_reader: Receiver<Value>,
}

impl ProcessLink {
    /// Spawn `program` with `args` and attach to its stdio.
    pub fn spawn(
        program: &std::path::Path,
        args: &[String],
        team: TeamId,
        ttl: Duration,
    ) -> Result<Self> {
        let spawn_error = |message: String| GameError::AiSpawn { team, message };

        let mut child = std::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| spawn_error(format!("{}: {e}", program.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("child stdout unavailable".to_string()))?;

        let child = Arc::new(Mutex::new(child));
        let (to_writer, writer_inbox) = mpsc::channel();
        let (reader_outbox, from_reader) = mpsc::channel();

        let threads = [
            thread::Builder::new()
                .name(format!("ai-{team}-stdin"))
                .spawn(move || write_lines(stdin, &writer_inbox)),
            thread::Builder::new()
                .name(format!("ai-{team}-stdout"))
                .spawn(move || read_lines(stdout, &reader_outbox, team)),
            {
                let child = Arc::clone(&child);
                thread::Builder::new()
                    .name(format!("ai-{team}-watchdog"))
                    .spawn(move || watchdog(&child, team, ttl))
            },
        ];

        let mut link = Self {
            child,
            to_writer: Some(to_writer),
            from_reader,
        };
        for spawned in threads {
            if let Err(e) = spawned {
                link.terminate();
                return Err(spawn_error(e.to_string()));
            }
        }

        tracing::info!(team, program = %program.display(), "Spawned AI subprocess");
        Ok(link)
    }
}

fn write_lines(mut stdin: ChildStdin, inbox: &Receiver<Value>) {
    for message in inbox {
        let written = serde_json::to_writer(&mut stdin, &message)
            .map_err(std::io::Error::from)
            .and_then(|()| stdin.write_all(b"\n"))
            .and_then(|()| stdin.flush());
        if let Err(e) = written {
            tracing::debug!(error = %e, "AI stdin closed");
            break;
        }
    }
}

fn read_lines(stdout: ChildStdout, outbox: &Sender<Value>, team: TeamId) {
    for line in BufReader::new(stdout).lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        // Unparseable lines are forwarded as strings and rejected by the channel.
        let value = match serde_json::from_str::<Value>(&line) {
            Ok(value) => value,
            Err(_) => Value::String(line),
        };
        if outbox.send(value).is_err() {
            break;
        }
    }
    tracing::debug!(team, "AI stdout closed");
}

fn watchdog(child: &Mutex<Child>, team: TeamId, ttl: Duration) {
    let started = Instant::now();
    loop {
        {
            let Ok(mut child) = child.lock() else {
                return;
            };
            if !matches!(child.try_wait(), Ok(None)) {
                return;
            }
            if started.elapsed() >= ttl {
                tracing::warn!(team, ttl_secs = ttl.as_secs(), "AI exceeded time-to-live, killing");
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
        }
        thread::sleep(WATCHDOG_POLL);
    }
}

impl AiLink for ProcessLink {
    fn send(&mut self, message: Value) -> Result<()> {
        let sender = self
            .to_writer
            .as_ref()
            .ok_or_else(|| GameError::InvalidState("AI link already terminated".to_string()))?;
        sender
            .send(message)
            .map_err(|_| GameError::InvalidState("AI subprocess stdin closed".to_string()))
    }

    fn try_recv(&mut self) -> std::result::Result<Value, TryRecvError> {
        self.from_reader.try_recv()
    }

    fn is_alive(&mut self) -> bool {
        self.child
            .lock()
            .is_ok_and(|mut child| matches!(child.try_wait(), Ok(None)))
    }

    fn terminate(&mut self) {
        self.to_writer = None;
        if let Ok(mut child) = self.child.lock() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

impl Drop for ProcessLink {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Health of an AI channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Messages flow normally.
    Active,
    /// Too many protocol violations; output is discarded.
    Degraded,
    /// The agent is gone.
    Closed,
}

/// The simulation's end of one team's AI.
pub struct AiChannel {
    team: TeamId,
    link: Box<dyn AiLink>,
    prefs: Option<AiPrefs>,
    status: ChannelStatus,
    violations: u32,
}

impl std::fmt::Debug for AiChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiChannel")
            .field("team", &self.team)
            .field("prefs", &self.prefs)
            .field("status", &self.status)
            .field("violations", &self.violations)
            .finish_non_exhaustive()
    }
}

impl AiChannel {
    /// Wrap a link to the agent controlling `team`.
    #[must_use]
    pub fn new(team: TeamId, link: Box<dyn AiLink>) -> Self {
        Self {
            team,
            link,
            prefs: None,
            status: ChannelStatus::Active,
            violations: 0,
        }
    }

    /// Team the agent controls.
    #[must_use]
    pub const fn team(&self) -> TeamId {
        self.team
    }

    /// Preferences the agent declared, if any yet.
    #[must_use]
    pub const fn prefs(&self) -> Option<AiPrefs> {
        self.prefs
    }

    /// Current health.
    #[must_use]
    pub const fn status(&self) -> ChannelStatus {
        self.status
    }

    /// Number of protocol violations so far.
    #[must_use]
    pub const fn violations(&self) -> u32 {
        self.violations
    }

    /// Send a message; failures close the channel instead of propagating.
    pub fn send(&mut self, message: &ToAi) {
        if self.status == ChannelStatus::Closed {
            return;
        }
        let sent = message.to_value().and_then(|value| self.link.send(value));
        if let Err(e) = sent {
            tracing::warn!(team = self.team, error = %e, "AI channel closed on send");
            self.status = ChannelStatus::Closed;
        }
    }

    /// Take every waiting order without blocking.
    ///
    /// Preferences are recorded, anything unrecognized is logged and counted
    /// as a violation. A degraded channel drains and discards.
    pub fn drain(&mut self) -> Vec<AiOrder> {
        let mut orders = Vec::new();
        loop {
            let value = match self.link.try_recv() {
                Ok(value) => value,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.status != ChannelStatus::Closed {
                        tracing::info!(team = self.team, "AI disconnected");
                        self.status = ChannelStatus::Closed;
                    }
                    break;
                }
            };
            if self.status == ChannelStatus::Degraded {
                continue;
            }

            match FromAi::from_value(value, &format!("AI team {}", self.team)) {
                Ok(FromAi::Orders(order)) => orders.push(order),
                Ok(FromAi::Prefs { prefs }) => {
                    tracing::debug!(team = self.team, ?prefs, "AI declared preferences");
                    self.prefs = Some(prefs);
                }
                Err(e) => self.record_violation(&e.to_string()),
            }
        }
        orders
    }

    /// Count a discarded message; degrade the channel past the limit.
    pub fn record_violation(&mut self, reason: &str) {
        self.violations += 1;
        tracing::warn!(
            team = self.team,
            violations = self.violations,
            reason,
            "Discarded AI message"
        );
        if self.violations >= MAX_PROTOCOL_VIOLATIONS && self.status == ChannelStatus::Active {
            tracing::warn!(team = self.team, "AI channel degraded, ignoring further output");
            self.status = ChannelStatus::Degraded;
        }
    }

    /// Ask the agent to stop.
    pub fn quit(&mut self) {
        self.send(&ToAi::Quit);
    }

    /// Stop the agent without asking.
    pub fn terminate(&mut self) {
        self.link.terminate();
        self.status = ChannelStatus::Closed;
    }

    /// Whether the agent is still running.
    pub fn is_alive(&mut self) -> bool {
        self.link.is_alive()
    }
}
