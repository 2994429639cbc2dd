//! The peer side of a hub connection.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use skirmish_core::error::{GameError, Result as GameResult};
use skirmish_core::relay::{NetworkRelay, RelayMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{Result, ServerError};
use crate::hub::write_lines;

/// A [`NetworkRelay`] over a TCP connection to a [`crate::RelayHub`].
///
/// The connection is driven by a small runtime the relay owns, so the
/// simulation can use it from plain synchronous code. Never drop one from
/// inside another tokio runtime.
#[derive(Debug)]
pub struct TcpRelay {
    _runtime: Runtime,
    outgoing: UnboundedSender<String>,
    incoming: UnboundedReceiver<String>,
    pending: VecDeque<RelayMessage>,
    player_number: u32,
}

impl TcpRelay {
    /// Connect and wait for the hub to assign a player number.
    ///
    /// The player number message is kept and handed out again by the first
    /// [`NetworkRelay::try_recv`], so the simulation sees it too.
    ///
    /// # Errors
    /// Returns an error if the hub cannot be reached within `timeout`, turns
    /// the connection away, or opens with anything but a player number.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("relay-client")
            .enable_all()
            .build()?;

        let stream = runtime
            .block_on(async { tokio::time::timeout(timeout, TcpStream::connect(addr)).await })
            .map_err(|_| ServerError::Timeout)??;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        runtime.spawn(read_lines(read, in_tx));
        runtime.spawn(write_lines(write, out_rx));

        let first = runtime
            .block_on(async { tokio::time::timeout(timeout, in_rx.recv()).await })
            .map_err(|_| ServerError::Timeout)?
            .ok_or_else(|| ServerError::Handshake("connection closed".to_string()))?;
        let player_number = match RelayMessage::decode(&first)? {
            RelayMessage::PlayerNumber { number } => number,
            RelayMessage::Error { error, .. } => return Err(ServerError::Rejected(error)),
            _ => return Err(ServerError::Handshake(first)),
        };
        tracing::info!(%addr, player_number, "Connected to relay hub");

        Ok(Self {
            _runtime: runtime,
            outgoing: out_tx,
            incoming: in_rx,
            pending: VecDeque::from([RelayMessage::PlayerNumber {
                number: player_number,
            }]),
            player_number,
        })
    }

    /// The number the hub assigned this peer.
    #[must_use]
    pub const fn player_number(&self) -> u32 {
        self.player_number
    }
}

impl NetworkRelay for TcpRelay {
    fn send(&mut self, message: &RelayMessage) -> GameResult<()> {
        let line = message.encode()?;
        self.outgoing
            .send(line)
            .map_err(|_| GameError::Relay("relay hub connection closed".to_string()))
    }

    fn try_recv(&mut self) -> Option<GameResult<RelayMessage>> {
        if let Some(message) = self.pending.pop_front() {
            return Some(Ok(message));
        }
        match self.incoming.try_recv() {
            Ok(line) => Some(RelayMessage::decode(&line)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(GameError::Relay(
                "relay hub closed the connection".to_string(),
            ))),
        }
    }

    fn player_number(&self) -> Option<u32> {
        Some(self.player_number)
    }
}

async fn read_lines(read: OwnedReadHalf, tx: UnboundedSender<String>) {
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tx.send(line).is_err() {
            return;
        }
    }
}
