//! The relay hub: numbers peers and fans their orders out to each other.
//!
//! One task owns the peer table. Each connection gets a reader task feeding
//! lines into that task and a writer task draining an unbounded queue, so a
//! slow peer never stalls the others.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use skirmish_core::relay::RelayMessage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::ServerConfig;

/// `source` field of errors the hub reports.
pub const HUB_SOURCE: &str = "relay hub";

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// What happened during a match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubSummary {
    /// Peers that were given a player number.
    pub players_joined: u32,
    /// Connections turned away because the match was full.
    pub players_rejected: u32,
    /// Messages forwarded, counted once per sender.
    pub messages_forwarded: u64,
    /// Messages answered with an error.
    pub errors_reported: u64,
}

#[derive(Debug)]
enum HubEvent {
    Line { player: u32, text: String },
    Left { player: u32 },
}

struct Peer {
    tx: UnboundedSender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Peer {
    fn send(&self, line: String) {
        // A closed queue means the writer already hit a socket error.
        let _ = self.tx.send(line);
    }

    fn send_message(&self, message: &RelayMessage) {
        match message.encode() {
            Ok(line) => self.send(line),
            Err(e) => tracing::error!(error = %e, "Failed to encode hub message"),
        }
    }
}

/// A bound, not yet running relay hub.
#[derive(Debug)]
pub struct RelayHub {
    listener: TcpListener,
    config: ServerConfig,
}

impl RelayHub {
    /// Bind the configured address.
    ///
    /// # Errors
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()?).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            max_players = config.max_players,
            "Relay hub listening"
        );
        Ok(Self { listener, config })
    }

    /// The address actually bound, useful when the port was 0.
    ///
    /// # Errors
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve one match.
    ///
    /// Returns once a peer quits or disconnects. Messages already queued for
    /// the remaining peers are flushed before the connections close.
    ///
    /// # Errors
    /// Currently infallible once bound; accept failures are logged and
    /// retried.
    pub async fn run(self) -> Result<HubSummary> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut peers: BTreeMap<u32, Peer> = BTreeMap::new();
        let mut summary = HubSummary::default();
        let mut next_number = 0u32;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    if peers.len() >= self.config.max_players as usize {
                        reject(stream, addr).await;
                        summary.players_rejected += 1;
                        continue;
                    }

                    let number = next_number;
                    next_number += 1;
                    let peer = open_peer(stream, number, events_tx.clone());
                    peer.send_message(&RelayMessage::PlayerNumber { number });
                    peers.insert(number, peer);
                    summary.players_joined += 1;
                    tracing::info!(player = number, %addr, "Player connected");
                }
                Some(event) = events_rx.recv() => {
                    let match_over = match event {
                        HubEvent::Line { player, text } => {
                            route(&peers, player, &text, &mut summary)
                        }
                        HubEvent::Left { player } => {
                            tracing::info!(player, "Player disconnected");
                            if let Some(peer) = peers.remove(&player) {
                                peer.reader.abort();
                            }
                            broadcast(&peers, player, &RelayMessage::Quit);
                            true
                        }
                    };
                    if match_over {
                        break;
                    }
                }
            }
        }

        close(peers).await;
        tracing::info!(
            players = summary.players_joined,
            forwarded = summary.messages_forwarded,
            "Match ended"
        );
        Ok(summary)
    }
}

/// Handle one line from `from`. Returns whether the match is over.
fn route(peers: &BTreeMap<u32, Peer>, from: u32, text: &str, summary: &mut HubSummary) -> bool {
    let reply_error = |error: String, source: &str| {
        if let Some(peer) = peers.get(&from) {
            peer.send_message(&RelayMessage::Error {
                error,
                source: source.to_string(),
            });
        }
    };

    let message = match RelayMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(player = from, error = %e, "Undecodable message");
            reply_error(e.to_string(), HUB_SOURCE);
            summary.errors_reported += 1;
            return false;
        }
    };

    match message {
        RelayMessage::IssueOrder(_) | RelayMessage::QueueOrder(_) => {
            forward(peers, from, text);
            summary.messages_forwarded += 1;
            false
        }
        RelayMessage::Quit => {
            tracing::info!(player = from, "Player quit");
            forward(peers, from, text);
            summary.messages_forwarded += 1;
            true
        }
        RelayMessage::PlayerNumber { .. } | RelayMessage::Error { .. } => {
            let action = if matches!(message, RelayMessage::Error { .. }) {
                "error"
            } else {
                "player_number"
            };
            tracing::warn!(player = from, action, "Peer sent a hub-only message");
            reply_error("peers may not send this action".to_string(), action);
            summary.errors_reported += 1;
            false
        }
    }
}

fn forward(peers: &BTreeMap<u32, Peer>, from: u32, text: &str) {
    for (_, peer) in peers.iter().filter(|(number, _)| **number != from) {
        peer.send(text.to_string());
    }
}

fn broadcast(peers: &BTreeMap<u32, Peer>, from: u32, message: &RelayMessage) {
    for (_, peer) in peers.iter().filter(|(number, _)| **number != from) {
        peer.send_message(message);
    }
}

fn open_peer(stream: TcpStream, player: u32, events: UnboundedSender<HubEvent>) -> Peer {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(player, error = %e, "Failed to set TCP_NODELAY");
    }
    let (read, write) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    Peer {
        tx,
        reader: tokio::spawn(read_events(read, player, events)),
        writer: tokio::spawn(write_lines(write, rx)),
    }
}

async fn read_events(read: OwnedReadHalf, player: u32, events: UnboundedSender<HubEvent>) {
    let mut lines = BufReader::new(read).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(text)) if text.trim().is_empty() => {}
            Ok(Some(text)) => {
                if events.send(HubEvent::Line { player, text }).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(player, error = %e, "Read failed");
                break;
            }
        }
    }
    let _ = events.send(HubEvent::Left { player });
}

/// Write each queued line followed by a newline until the queue closes, then
/// shut the write side down.
pub(crate) async fn write_lines(mut write: OwnedWriteHalf, mut rx: UnboundedReceiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = write.write_all(line.as_bytes()).await {
            tracing::debug!(error = %e, "Write failed");
            return;
        }
    }
    let _ = write.shutdown().await;
}

async fn reject(mut stream: TcpStream, addr: SocketAddr) {
    tracing::warn!(%addr, "Match is full, rejecting connection");
    let message = RelayMessage::Error {
        error: "match is full".to_string(),
        source: HUB_SOURCE.to_string(),
    };
    if let Ok(mut line) = message.encode() {
        line.push('\n');
        let _ = stream.write_all(line.as_bytes()).await;
    }
    let _ = stream.shutdown().await;
}

async fn close(peers: BTreeMap<u32, Peer>) {
    for (player, peer) in peers {
        let Peer { tx, reader, writer } = peer;
        drop(tx);
        if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
            tracing::warn!(player, "Timed out flushing messages");
        }
        reader.abort();
    }
}
