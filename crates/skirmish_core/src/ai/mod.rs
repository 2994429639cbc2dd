//! Isolated AI agents and the channels the simulation talks to them over.
//!
//! Each AI-controlled team hosted by this peer gets one agent, running either
//! on its own thread or as a child process. The simulation never blocks on an
//! agent: sends are queued and receives are `try_recv`. Agents are bounded by
//! a hard time-to-live independent of the `quit` message.

pub mod agent;
pub mod channel;
pub mod protocol;
pub mod registry;

pub use agent::{run_agent, run_line_agent, AgentExit, AgentView, AiAgent, BasicAgent};
pub use channel::{AiChannel, AiLink, ChannelStatus, ProcessLink, ThreadLink, MAX_PROTOCOL_VIOLATIONS};
pub use protocol::{ActorFormat, ActorList, ActorSnapshot, AiOrder, AiPrefs, FromAi, ToAi};
pub use registry::{AgentFactory, AiRegistry};
