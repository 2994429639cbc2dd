//! Named AI classes and how to start them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::agent::{run_agent, AiAgent, BasicAgent};
use super::channel::{AiChannel, ProcessLink, ThreadLink};
use crate::actors::TeamId;
use crate::error::{GameError, Result};

/// Builds a fresh agent for each team that uses an in-process class.
pub type AgentFactory = Arc<dyn Fn() -> Box<dyn AiAgent> + Send + Sync>;

/// How an AI class is started.
#[derive(Clone)]
enum AiClass {
    InProcess(AgentFactory),
    Process { program: PathBuf, args: Vec<String> },
}

/// AI classes available to a battle, by name.
#[derive(Clone, Default)]
pub struct AiRegistry {
    classes: BTreeMap<String, AiClass>,
}

impl std::fmt::Debug for AiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AiRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `basic` agent.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.classes.insert(
            "basic".to_string(),
            AiClass::InProcess(Arc::new(|| Box::new(BasicAgent::default()) as Box<dyn AiAgent>)),
        );
        registry
    }

    /// Register a class that runs on a thread.
    pub fn register_in_process<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn AiAgent> + Send + Sync + 'static,
    {
        self.register(name, AiClass::InProcess(Arc::new(factory)))
    }

    /// Register a class that runs as `program args...`, speaking JSON lines.
    pub fn register_process(
        &mut self,
        name: &str,
        program: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Result<()> {
        self.register(
            name,
            AiClass::Process {
                program: program.into(),
                args,
            },
        )
    }

    fn register(&mut self, name: &str, class: AiClass) -> Result<()> {
        if self.classes.contains_key(name) {
            return Err(GameError::DuplicateAi(name.to_string()));
        }
        self.classes.insert(name.to_string(), class);
        Ok(())
    }

    /// Whether a class with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// A fresh agent of the in-process class `name`.
    ///
    /// Used by agent subprocesses to build the agent they host.
    pub fn make_agent(&self, name: &str) -> Result<Box<dyn AiAgent>> {
        match self.classes.get(name) {
            Some(AiClass::InProcess(factory)) => Ok(factory()),
            Some(AiClass::Process { .. }) => Err(GameError::InvalidState(format!(
                "AI class '{name}' runs as a subprocess"
            ))),
            None => Err(GameError::UnknownAi(name.to_string())),
        }
    }

    /// Registered class names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Start an agent of class `name` for `team`.
    ///
    /// The agent stops by itself after `ttl` even if it never sees `quit`.
    pub fn spawn(&self, name: &str, team: TeamId, ttl: Duration) -> Result<AiChannel> {
        let class = self
            .classes
            .get(name)
            .ok_or_else(|| GameError::UnknownAi(name.to_string()))?;

        let channel = match class {
            AiClass::InProcess(factory) => {
                let agent = factory();
                let (to_agent, inbox) = mpsc::channel();
                let (outbox, from_agent) = mpsc::channel();
                let handle = thread::Builder::new()
                    .name(format!("ai-team-{team}"))
                    .spawn(move || {
                        let exit = run_agent(agent, &inbox, &mut |v| outbox.send(v).is_ok(), ttl);
                        tracing::debug!(team, ?exit, "AI thread finished");
                    })
                    .map_err(|e| GameError::AiSpawn {
                        team,
                        message: e.to_string(),
                    })?;
                AiChannel::new(team, Box::new(ThreadLink::new(to_agent, from_agent, handle)))
            }
            AiClass::Process { program, args } => {
                AiChannel::new(team, Box::new(ProcessLink::spawn(program, args, team, ttl)?))
            }
        };

        tracing::info!(team, class = name, "Spawned AI");
        Ok(channel)
    }
}
