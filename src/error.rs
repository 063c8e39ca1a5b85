use std::path::PathBuf;

use crate::session::Phase;
use crate::types::{GameMode, Lifeline};

/// Malformed Engine.IO / Socket.IO frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownEnginePacket(char),
    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketPacket(char),
    #[error("namespace {0:?} is not supported")]
    Namespace(String),
    #[error("acknowledgements and binary packets are not supported")]
    Unsupported,
    #[error("event packet is not a [name, data] array")]
    MalformedEvent,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid payload for event {event}: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported url scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("server refused the connection: {0}")]
    Refused(String),
    #[error("connection task is gone")]
    Closed,
}

/// Why the session refused a local action. Rendered to the player as is.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Not connected to the server")]
    NotConnected,
    #[error("Can't {action} while {phase}")]
    InvalidPhase { action: &'static str, phase: Phase },
    #[error("Pick a name first (`name <your name>`)")]
    NameRequired,
    #[error("Name must be between 1 and {max} characters")]
    InvalidName { max: usize },
    #[error("Room codes are {len} letters or digits")]
    InvalidRoomCode { len: usize },
    #[error("You are not in a room")]
    NotInRoom,
    #[error("Only the host can {0}")]
    NotHost(&'static str),
    #[error("Need {need} players to start, have {have}")]
    NotEnoughPlayers { have: usize, need: usize },
    #[error("You already answered this question")]
    AlreadyAnswered,
    #[error("Time is up for this question")]
    TimeUp,
    #[error("There is no option {0}")]
    NoSuchOption(usize),
    #[error("That option was eliminated")]
    OptionEliminated,
    #[error("{0} was already used this game")]
    LifelineUsed(Lifeline),
    #[error("Lifelines are not available in {0}")]
    LifelinesUnavailable(GameMode),
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Message is {len} characters, the limit is {max}")]
    MessageTooLong { len: usize, max: usize },
    #[error("Still waiting for the server to answer the last request")]
    RequestPending,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("unknown command `{0}`, type `help`")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Category(#[from] crate::types::UnknownCategory),
}
