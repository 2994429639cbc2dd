//! Headless battle runner for lockstep peers, AI hosting and CI.
//!
//! This crate runs battles without graphics. It can:
//!
//! - **Play a match**: locally, or as one peer of a relay hub
//! - **Drive a session**: JSON commands on stdin, responses on stdout
//! - **Host an AI**: serve the built-in agent over stdin/stdout for process AIs
//! - **Verify**: replay a recording, or rerun a battle and compare hashes
//!
//! # Protocol
//!
//! Sessions use JSON lines (one JSON object per line):
//!
//! - **stdin**: Commands from controller (tick, place, move, etc.)
//! - **stdout**: Responses and state (JSON)
//! - **stderr**: Debug logs (human-readable)
//!
//! See the [`protocol`] module for every command and response.

pub mod error;
pub mod protocol;
pub mod runner;
pub mod session;

pub use error::{HeadlessError, Result};
pub use protocol::{Command, Response};
pub use runner::{run_match, MatchInputs, MatchOptions, MatchReport};
pub use session::Session;
