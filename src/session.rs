//! Client-side session state machine.
//!
//! The server is authoritative: it sequences questions, scores answers and
//! runs rooms. [`Session`] only mirrors what the server pushed, guards what
//! the player may ask for next, and keeps a local countdown anchored to the
//! server's timer updates.
//!
//! ```text
//! Setup ──► Queued ──► Lobby ──► QuestionActive ⇄ AnswerReveal ──► GameOver
//!   ▲                    │             │  ▲                          │
//!   └────── leave ───────┘           Paused (single player)          │
//!   └────────────────────────── menu / leave ◄───────────────────────┘
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::connection::DisconnectReason;
use crate::error::SessionError;
use crate::types::*;

pub const MAX_NAME_LEN: usize = 20;
pub const MAX_CHAT_LEN: usize = 200;
pub const ROOM_CODE_LEN: usize = 6;
const MIN_ROOM_PLAYERS: usize = 2;
const HEAD_TO_HEAD_PLAYERS: usize = 2;
const DEFAULT_LEADERBOARD_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Setup,
    Queued,
    Lobby,
    QuestionActive,
    AnswerReveal,
    Paused,
    GameOver,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "in the menu"),
            Self::Queued => write!(f, "queued for a match"),
            Self::Lobby => write!(f, "in the lobby"),
            Self::QuestionActive => write!(f, "a question is open"),
            Self::AnswerReveal => write!(f, "answers are being revealed"),
            Self::Paused => write!(f, "the game is paused"),
            Self::GameOver => write!(f, "the game is over"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "online"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Disconnected => write!(f, "offline"),
        }
    }
}

/// What the player wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetName { name: String },
    Dismiss,
    BackToMenu,

    StartSolo { category: Category },
    PauseSolo,
    ResumeSolo,
    QuitSolo,

    CreateRoom { category: Category },
    JoinRoom { code: String },
    LeaveRoom,
    ChangeCategory { category: Category },
    StartGame,
    NextQuestion,

    /// 1-based option index as displayed.
    Answer { choice: usize },
    UseLifeline(Lifeline),
    Chat { text: String },

    Queue,
    CancelQueue,
    CreatePrivateMatch,
    JoinPrivateMatch { code: String },
    Rematch,

    Leaderboard { limit: Option<u32> },
    Stats,
}

/// Result of applying a server event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Ignored(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    StartSolo,
    CreateRoom,
    JoinRoom,
    StartGame,
    Leave,
    Queue,
    CreatePrivateMatch,
    JoinPrivateMatch,
    Rematch,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::StartSolo => "start the game",
            Self::CreateRoom => "create the room",
            Self::JoinRoom => "join the room",
            Self::StartGame => "start the game",
            Self::Leave => "leave the room",
            Self::Queue => "queue for a match",
            Self::CreatePrivateMatch => "create the private match",
            Self::JoinPrivateMatch => "join the private match",
            Self::Rematch => "start a rematch",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Pending {
    kind: RequestKind,
    since: Instant,
    room_code: Option<String>,
    revert: (Phase, Option<GameMode>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: String,
    pub host_id: Option<String>,
    pub category: Option<String>,
    pub max_players: Option<u32>,
    pub players: Vec<PlayerInfo>,
    pub state: RoomState,
    /// Head to head: both seats are taken.
    pub ready: bool,
}

impl Room {
    fn new(id: String, players: Vec<PlayerInfo>) -> Self {
        Self {
            id,
            host_id: None,
            category: None,
            max_players: None,
            players,
            state: RoomState::Waiting,
            ready: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub correct: bool,
    pub points: i64,
    pub first: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct ActiveQuestion {
    number: u32,
    total: u32,
    text: String,
    options: Vec<String>,
    category: Option<String>,
    deadline: Instant,
    paused_remaining: Option<u32>,
    choice: Option<usize>,
    eliminated: Vec<usize>,
    locked: bool,
    feedback: Option<Feedback>,
}

impl ActiveQuestion {
    fn remaining(&self, now: Instant) -> u32 {
        if let Some(secs) = self.paused_remaining {
            return secs;
        }
        let left = self.deadline.saturating_duration_since(now);
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        u32::try_from(secs).unwrap_or(u32::MAX)
    }

    fn chosen_text(&self) -> Option<String> {
        self.choice.and_then(|i| self.options.get(i).cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reveal {
    pub question: Option<String>,
    pub correct_answer: String,
    pub my_answer: Option<String>,
    pub correct: bool,
    pub points: Option<i64>,
    pub results: Vec<PlayerResult>,
    pub leader: Option<String>,
    pub score_difference: Option<i64>,
    pub questions_remaining: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeadToHeadStatus {
    pub opponent: Option<String>,
    pub streak: u32,
    pub leader: Option<String>,
    pub score_difference: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadToHeadSummary {
    pub winner: Option<String>,
    pub is_tie: bool,
    pub margin: i64,
    pub stats: Vec<HeadToHeadPlayerStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Solo {
        final_score: i64,
        questions_answered: u32,
        correct_answers: u32,
        accuracy: f64,
        game_duration: f64,
        position: Option<i64>,
    },
    Room {
        standings: Vec<ScoreLine>,
        winners: Vec<ScoreLine>,
        head_to_head: Option<HeadToHeadSummary>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub sender: String,
    pub message: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub text: String,
    pub is_error: bool,
}

impl Notice {
    fn info(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_error: false }
    }

    fn error(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_error: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionView {
    /// 1-based, as typed by the player.
    pub index: usize,
    pub text: String,
    pub eliminated: bool,
    pub chosen: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionView {
    pub number: u32,
    pub total: u32,
    pub text: String,
    pub category: Option<String>,
    pub options: Vec<OptionView>,
    pub time_remaining: u32,
    pub locked: bool,
    pub answered: bool,
    pub feedback: Option<Feedback>,
}

/// Immutable snapshot of a [`Session`] for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub connection: ConnectionStatus,
    pub player_name: Option<String>,
    pub mode: Option<GameMode>,
    pub phase: Phase,
    pub room: Option<Room>,
    pub is_host: bool,
    pub question: Option<QuestionView>,
    pub reveal: Option<Reveal>,
    pub score: i64,
    pub total_questions: Option<u32>,
    pub scores: Vec<ScoreLine>,
    pub head_to_head: Option<HeadToHeadStatus>,
    pub outcome: Option<Outcome>,
    pub lifelines_left: Vec<Lifeline>,
    pub chat: Vec<ChatLine>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub stats: Option<PlayerStats>,
    pub notice: Option<Notice>,
    pub queue_position: Option<u32>,
    pub pending: Option<RequestKind>,
}

#[derive(Debug, Clone)]
pub struct Session {
    connection: ConnectionStatus,
    sid: Option<String>,
    player_name: Option<String>,
    mode: Option<GameMode>,
    phase: Phase,
    room: Option<Room>,
    question: Option<ActiveQuestion>,
    reveal: Option<Reveal>,
    score: i64,
    total_questions: Option<u32>,
    /// The server announced the current game as started.
    started: bool,
    scores: Vec<ScoreLine>,
    head_to_head: Option<HeadToHeadStatus>,
    outcome: Option<Outcome>,
    lifelines_used: Vec<Lifeline>,
    chat: VecDeque<ChatLine>,
    chat_limit: usize,
    leaderboard: Vec<LeaderboardEntry>,
    stats: Option<PlayerStats>,
    notice: Option<Notice>,
    queue_position: Option<u32>,
    pending: Option<Pending>,
}

impl Session {
    pub fn new(player_name: Option<String>, chat_limit: usize) -> Self {
        Self {
            connection: ConnectionStatus::Connecting,
            sid: None,
            player_name: player_name.and_then(|n| validate_name(&n).ok()),
            mode: None,
            phase: Phase::Setup,
            room: None,
            question: None,
            reveal: None,
            score: 0,
            total_questions: None,
            started: false,
            scores: Vec::new(),
            head_to_head: None,
            outcome: None,
            lifelines_used: Vec::new(),
            chat: VecDeque::new(),
            chat_limit: chat_limit.max(1),
            leaderboard: Vec::new(),
            stats: None,
            notice: None,
            queue_position: None,
            pending: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> Option<GameMode> {
        self.mode
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn session_id(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn is_host(&self) -> bool {
        match (&self.room, &self.sid) {
            (Some(room), Some(sid)) => room.host_id.as_deref() == Some(sid.as_str()),
            _ => false,
        }
    }

    pub fn pending(&self) -> Option<RequestKind> {
        self.pending.as_ref().map(|p| p.kind)
    }

    // ─── Connection ───────────────────────────────────────────────

    pub fn on_connected(&mut self, sid: Option<String>) {
        self.connection = ConnectionStatus::Connected;
        let Some(sid) = sid else { return };

        let previous = self.sid.replace(sid.clone());
        let in_game = self.room.is_some() || (self.mode.is_some() && self.phase != Phase::GameOver);
        if in_game && previous.is_some_and(|old| old != sid) {
            self.reset_to_setup();
            self.notice = Some(Notice::error(
                "Reconnected, but the server ended the previous game",
            ));
        }
    }

    pub fn on_reconnecting(&mut self, attempt: u32) {
        self.connection = ConnectionStatus::Reconnecting { attempt };
    }

    pub fn on_disconnected(&mut self, reason: &DisconnectReason) {
        self.connection = ConnectionStatus::Disconnected;
        if *reason == DisconnectReason::ServerDisconnect {
            self.notice = Some(Notice::error("The server closed the connection"));
        }
    }

    pub fn on_reconnect_failed(&mut self) {
        self.connection = ConnectionStatus::Disconnected;
        self.notice = Some(Notice::error("Could not reconnect to the server"));
    }

    pub fn on_connect_error(&mut self, message: &str) {
        self.notice = Some(Notice::error(format!("Connection refused: {message}")));
    }

    // ─── Clock ────────────────────────────────────────────────────

    /// Lock the open question once its countdown reaches zero. Returns
    /// whether anything changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.phase != Phase::QuestionActive {
            return false;
        }
        match self.question.as_mut() {
            Some(q) if !q.locked && q.remaining(now) == 0 => {
                q.locked = true;
                true
            }
            _ => false,
        }
    }

    /// Give up on a request the server never answered.
    pub fn expire_pending(&mut self, now: Instant, timeout: Duration) -> bool {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.since) >= timeout);
        if !expired {
            return false;
        }
        if let Some(pending) = self.pending.take() {
            self.revert(&pending);
            self.notice = Some(Notice::error(format!(
                "The server did not respond, could not {}",
                pending.kind
            )));
        }
        true
    }

    /// Undo the request recorded by the last accepted action when it could
    /// not be sent. Returns whether anything was pending.
    pub fn abandon_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                self.revert(&pending);
                true
            }
            None => false,
        }
    }

    // ─── Local actions ────────────────────────────────────────────

    /// Validate an action and produce the request to send, if any.
    pub fn act(&mut self, action: Action, now: Instant) -> Result<Option<ClientEvent>, SessionError> {
        match action {
            Action::SetName { name } => {
                self.player_name = Some(validate_name(&name)?);
                Ok(None)
            }
            Action::Dismiss => {
                self.notice = None;
                Ok(None)
            }
            Action::BackToMenu => self.back_to_menu(now),
            other => {
                if self.connection != ConnectionStatus::Connected {
                    return Err(SessionError::NotConnected);
                }
                self.request(other, now)
            }
        }
    }

    fn request(&mut self, action: Action, now: Instant) -> Result<Option<ClientEvent>, SessionError> {
        match action {
            Action::StartSolo { category } => {
                let player_name = self.ready_for_new_game("start a game")?;
                self.begin_game(GameMode::SinglePlayer, RequestKind::StartSolo, None, now);
                Ok(Some(ClientEvent::StartSinglePlayer { player_name, category }))
            }
            Action::PauseSolo => {
                self.require_solo("pause")?;
                self.require_phase("pause", &[Phase::QuestionActive])?;
                Ok(Some(ClientEvent::PauseSinglePlayer))
            }
            Action::ResumeSolo => {
                self.require_solo("resume")?;
                self.require_phase("resume", &[Phase::Paused])?;
                Ok(Some(ClientEvent::ResumeSinglePlayer))
            }
            Action::QuitSolo => {
                self.require_solo("quit")?;
                self.reset_to_setup();
                Ok(Some(ClientEvent::QuitSinglePlayer))
            }

            Action::CreateRoom { category } => {
                let player_name = self.ready_for_new_game("create a room")?;
                self.begin_game(GameMode::Multiplayer, RequestKind::CreateRoom, None, now);
                Ok(Some(ClientEvent::CreateRoom { player_name, category }))
            }
            Action::JoinRoom { code } => {
                let code = validate_room_code(&code)?;
                let player_name = self.ready_for_new_game("join a room")?;
                self.begin_game(GameMode::Multiplayer, RequestKind::JoinRoom, Some(code.clone()), now);
                Ok(Some(ClientEvent::JoinRoom { room_id: code, player_name }))
            }
            Action::LeaveRoom => {
                self.no_pending()?;
                let room_id = self.room.as_ref().ok_or(SessionError::NotInRoom)?.id.clone();
                // Head-to-head rooms have no leave handler on the server.
                if self.mode == Some(GameMode::HeadToHead) {
                    self.reset_to_setup();
                    return Ok(None);
                }
                self.pending = Some(Pending {
                    kind: RequestKind::Leave,
                    since: now,
                    room_code: None,
                    revert: (self.phase, self.mode),
                });
                Ok(Some(ClientEvent::LeaveRoom { room_id }))
            }
            Action::ChangeCategory { category } => {
                let room_id = self.require_host("change the category")?;
                self.require_phase("change the category", &[Phase::Lobby])?;
                Ok(Some(ClientEvent::ChangeCategory { room_id, category }))
            }
            Action::StartGame => {
                self.no_pending()?;
                let room_id = self.require_host("start the game")?;
                self.require_phase("start the game", &[Phase::Lobby])?;
                let have = self.room.as_ref().map_or(0, |r| r.players.len());
                let (enough, need) = match self.mode {
                    Some(GameMode::HeadToHead) => (have == HEAD_TO_HEAD_PLAYERS, HEAD_TO_HEAD_PLAYERS),
                    _ => (have >= MIN_ROOM_PLAYERS, MIN_ROOM_PLAYERS),
                };
                if !enough {
                    return Err(SessionError::NotEnoughPlayers { have, need });
                }
                self.pending = Some(Pending {
                    kind: RequestKind::StartGame,
                    since: now,
                    room_code: None,
                    revert: (Phase::Lobby, self.mode),
                });
                Ok(Some(ClientEvent::StartGame { room_id }))
            }
            Action::NextQuestion => {
                let room_id = self.require_host("skip ahead")?;
                self.require_phase("skip ahead", &[Phase::QuestionActive, Phase::AnswerReveal])?;
                Ok(Some(ClientEvent::RequestNextQuestion { room_id }))
            }

            Action::Answer { choice } => self.answer(choice, now),
            Action::UseLifeline(lifeline) => {
                let mode = self.mode.ok_or(SessionError::InvalidPhase {
                    action: "use a lifeline",
                    phase: self.phase,
                })?;
                if !mode.has_lifelines() {
                    return Err(SessionError::LifelinesUnavailable(mode));
                }
                self.require_phase("use a lifeline", &[Phase::QuestionActive])?;
                if self.question.as_ref().is_some_and(|q| q.choice.is_some()) {
                    return Err(SessionError::AlreadyAnswered);
                }
                if self.lifelines_used.contains(&lifeline) {
                    return Err(SessionError::LifelineUsed(lifeline));
                }
                self.lifelines_used.push(lifeline);
                Ok(Some(ClientEvent::UseLifeline { lifeline_type: lifeline }))
            }
            Action::Chat { text } => {
                if self.room.is_none() {
                    return Err(SessionError::NotInRoom);
                }
                let message = text.trim();
                if message.is_empty() {
                    return Err(SessionError::EmptyMessage);
                }
                let len = message.chars().count();
                if len > MAX_CHAT_LEN {
                    return Err(SessionError::MessageTooLong { len, max: MAX_CHAT_LEN });
                }
                Ok(Some(ClientEvent::ChatMessage { message: message.to_string() }))
            }

            Action::Queue => {
                let player_name = self.ready_for_new_game("queue for a match")?;
                self.begin_game(GameMode::HeadToHead, RequestKind::Queue, None, now);
                Ok(Some(ClientEvent::QueueHeadToHead { player_name }))
            }
            Action::CancelQueue => {
                let queued = self.phase == Phase::Queued
                    || self.pending() == Some(RequestKind::Queue);
                if !queued {
                    return Err(SessionError::InvalidPhase {
                        action: "cancel the queue",
                        phase: self.phase,
                    });
                }
                Ok(Some(ClientEvent::CancelQueue))
            }
            Action::CreatePrivateMatch => {
                let player_name = self.ready_for_new_game("create a private match")?;
                self.begin_game(GameMode::HeadToHead, RequestKind::CreatePrivateMatch, None, now);
                Ok(Some(ClientEvent::CreatePrivateHeadToHead { player_name }))
            }
            Action::JoinPrivateMatch { code } => {
                let code = validate_room_code(&code)?.to_uppercase();
                let player_name = self.ready_for_new_game("join a private match")?;
                self.begin_game(
                    GameMode::HeadToHead,
                    RequestKind::JoinPrivateMatch,
                    Some(code.clone()),
                    now,
                );
                Ok(Some(ClientEvent::JoinPrivateHeadToHead { room_code: code, player_name }))
            }
            Action::Rematch => {
                self.no_pending()?;
                if self.mode != Some(GameMode::HeadToHead) {
                    return Err(SessionError::InvalidPhase { action: "ask for a rematch", phase: self.phase });
                }
                self.require_phase("ask for a rematch", &[Phase::GameOver])?;
                let room_id = self.room.as_ref().ok_or(SessionError::NotInRoom)?.id.clone();
                self.pending = Some(Pending {
                    kind: RequestKind::Rematch,
                    since: now,
                    room_code: None,
                    revert: (Phase::GameOver, self.mode),
                });
                Ok(Some(ClientEvent::HeadToHeadRematch { room_id }))
            }

            Action::Leaderboard { limit } => Ok(Some(ClientEvent::RequestLeaderboard {
                limit: limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT),
                category: "overall".to_string(),
            })),
            Action::Stats => {
                let player_name = self.player_name.clone().ok_or(SessionError::NameRequired)?;
                Ok(Some(ClientEvent::GetSinglePlayerStats { player_name }))
            }

            Action::SetName { .. } | Action::Dismiss | Action::BackToMenu => Ok(None),
        }
    }

    fn answer(&mut self, choice: usize, now: Instant) -> Result<Option<ClientEvent>, SessionError> {
        self.require_phase("answer", &[Phase::QuestionActive])?;
        let solo = self.mode == Some(GameMode::SinglePlayer);
        let phase = self.phase;
        let question = self
            .question
            .as_mut()
            .ok_or(SessionError::InvalidPhase { action: "answer", phase })?;

        if question.choice.is_some() {
            return Err(SessionError::AlreadyAnswered);
        }
        if question.locked || question.remaining(now) == 0 {
            question.locked = true;
            return Err(SessionError::TimeUp);
        }
        let index = choice
            .checked_sub(1)
            .filter(|i| *i < question.options.len())
            .ok_or(SessionError::NoSuchOption(choice))?;
        if question.eliminated.contains(&index) {
            return Err(SessionError::OptionEliminated);
        }

        question.choice = Some(index);
        let answer = Some(question.options[index].clone());
        Ok(Some(if solo {
            ClientEvent::SubmitSinglePlayerAnswer { answer }
        } else {
            ClientEvent::SubmitAnswer { answer }
        }))
    }

    fn back_to_menu(&mut self, now: Instant) -> Result<Option<ClientEvent>, SessionError> {
        if self.room.is_some() {
            if self.connection != ConnectionStatus::Connected || self.mode == Some(GameMode::HeadToHead) {
                // Nothing to tell a server that already dropped us, or
                // that tracks head-to-head rooms without a leave request.
                self.reset_to_setup();
                return Ok(None);
            }
            return self.request(Action::LeaveRoom, now);
        }
        match self.phase {
            Phase::Setup | Phase::GameOver => {
                self.reset_to_setup();
                Ok(None)
            }
            phase => Err(SessionError::InvalidPhase { action: "go back to the menu", phase }),
        }
    }

    fn ready_for_new_game(&self, action: &'static str) -> Result<String, SessionError> {
        self.no_pending()?;
        if self.room.is_some() || !matches!(self.phase, Phase::Setup | Phase::GameOver) {
            return Err(SessionError::InvalidPhase { action, phase: self.phase });
        }
        self.player_name.clone().ok_or(SessionError::NameRequired)
    }

    fn no_pending(&self) -> Result<(), SessionError> {
        match self.pending {
            Some(_) => Err(SessionError::RequestPending),
            None => Ok(()),
        }
    }

    fn require_phase(&self, action: &'static str, allowed: &[Phase]) -> Result<(), SessionError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SessionError::InvalidPhase { action, phase: self.phase })
        }
    }

    fn require_solo(&self, action: &'static str) -> Result<(), SessionError> {
        if self.mode == Some(GameMode::SinglePlayer) {
            Ok(())
        } else {
            Err(SessionError::InvalidPhase { action, phase: self.phase })
        }
    }

    fn require_host(&self, action: &'static str) -> Result<String, SessionError> {
        let room = self.room.as_ref().ok_or(SessionError::NotInRoom)?;
        if !self.is_host() {
            return Err(SessionError::NotHost(action));
        }
        Ok(room.id.clone())
    }

    /// Clear everything tied to the previous game and mark a request in flight.
    fn begin_game(&mut self, mode: GameMode, kind: RequestKind, room_code: Option<String>, now: Instant) {
        let revert = (self.phase, self.mode);
        self.clear_game();
        self.mode = Some(mode);
        self.phase = Phase::Setup;
        self.pending = Some(Pending { kind, since: now, room_code, revert });
    }

    fn clear_game(&mut self) {
        self.question = None;
        self.reveal = None;
        self.score = 0;
        self.total_questions = None;
        self.started = false;
        self.scores.clear();
        self.head_to_head = None;
        self.outcome = None;
        self.lifelines_used.clear();
        self.queue_position = None;
    }

    fn reset_to_setup(&mut self) {
        self.clear_game();
        self.room = None;
        self.mode = None;
        self.pending = None;
        self.chat.clear();
        self.phase = Phase::Setup;
    }

    fn revert(&mut self, pending: &Pending) {
        let (phase, mode) = pending.revert;
        match pending.kind {
            // These requests only mark a game as requested; undo that.
            RequestKind::StartSolo
            | RequestKind::CreateRoom
            | RequestKind::JoinRoom
            | RequestKind::Queue
            | RequestKind::CreatePrivateMatch
            | RequestKind::JoinPrivateMatch => {
                self.clear_game();
                self.phase = if phase == Phase::GameOver { Phase::Setup } else { phase };
                self.mode = if self.phase == Phase::Setup { None } else { mode };
            }
            // The server would not let us go; stop showing a room we can't use.
            RequestKind::Leave => self.reset_to_setup(),
            RequestKind::StartGame | RequestKind::Rematch => {}
        }
    }

    fn settle(&mut self, kinds: &[RequestKind]) -> Option<Pending> {
        if self.pending.as_ref().is_some_and(|p| kinds.contains(&p.kind)) {
            self.pending.take()
        } else {
            None
        }
    }

    fn awaiting(&self, kinds: &[RequestKind]) -> bool {
        self.pending.as_ref().is_some_and(|p| kinds.contains(&p.kind))
    }

    fn my_name_is(&self, name: &str) -> bool {
        self.player_name.as_deref() == Some(name)
    }

    // ─── Server events ────────────────────────────────────────────

    /// Apply a server push. Re-applying the same event is a no-op, and events
    /// that don't fit the current phase are ignored.
    pub fn apply(&mut self, event: ServerEvent, now: Instant) -> Applied {
        use Applied::{Changed, Ignored};

        match event {
            ServerEvent::Connected { session_id } => {
                if self.sid.as_deref() == Some(session_id.as_str()) {
                    return Ignored("same session");
                }
                self.on_connected(Some(session_id));
                Changed
            }
            ServerEvent::Error { message, .. } => self.server_error(message),
            ServerEvent::SinglePlayerError { message } => self.server_error(message),

            // Single player
            ServerEvent::SinglePlayerStarted { total_questions, .. } => {
                if self.mode != Some(GameMode::SinglePlayer) {
                    return Ignored("no single player game requested");
                }
                if self.started {
                    return Ignored("game already started");
                }
                self.settle(&[RequestKind::StartSolo]);
                self.started = true;
                self.total_questions = Some(total_questions);
                Changed
            }
            ServerEvent::SinglePlayerQuestion(payload) => {
                let live = matches!(
                    self.phase,
                    Phase::Setup | Phase::QuestionActive | Phase::AnswerReveal | Phase::Paused
                );
                if self.mode != Some(GameMode::SinglePlayer) || !live {
                    return Ignored("no single player game running");
                }
                self.show_question(payload, now)
            }
            ServerEvent::TimerUpdate { time_remaining, question_number } => {
                if self.phase != Phase::QuestionActive {
                    return Ignored("no open question");
                }
                let Some(q) = self.question.as_mut() else {
                    return Ignored("no open question");
                };
                if question_number.is_some_and(|n| n != q.number) {
                    return Ignored("timer for another question");
                }
                q.deadline = now + Duration::from_secs(u64::from(time_remaining));
                if time_remaining == 0 {
                    q.locked = true;
                }
                Changed
            }
            ServerEvent::AnswerResult {
                is_correct,
                correct_answer,
                points_earned,
                total_score,
                ..
            } => {
                if self.mode != Some(GameMode::SinglePlayer) {
                    return Ignored("not in a single player game");
                }
                if self.phase != Phase::QuestionActive {
                    return Ignored("question already revealed");
                }
                let Some(q) = self.question.as_mut() else {
                    return Ignored("no open question");
                };
                q.locked = true;
                let my_answer = q.chosen_text();
                self.reveal = Some(Reveal {
                    question: Some(q.text.clone()),
                    correct_answer: correct_answer.unwrap_or_default(),
                    my_answer,
                    correct: is_correct,
                    points: Some(points_earned),
                    results: Vec::new(),
                    leader: None,
                    score_difference: None,
                    questions_remaining: Some(q.total.saturating_sub(q.number)),
                });
                self.score = total_score;
                self.phase = Phase::AnswerReveal;
                Changed
            }
            ServerEvent::SinglePlayerGameOver {
                final_score,
                questions_answered,
                correct_answers,
                accuracy,
                game_duration,
                leaderboard_position,
                top_10_leaderboard,
            } => {
                if self.mode != Some(GameMode::SinglePlayer) {
                    return Ignored("not in a single player game");
                }
                if self.phase == Phase::GameOver {
                    return Ignored("game already over");
                }
                self.outcome = Some(Outcome::Solo {
                    final_score,
                    questions_answered,
                    correct_answers,
                    accuracy,
                    game_duration,
                    position: leaderboard_position,
                });
                if !top_10_leaderboard.is_empty() {
                    self.leaderboard = top_10_leaderboard;
                }
                self.finish(final_score);
                Changed
            }
            ServerEvent::GamePaused { time_remaining } => {
                if self.mode != Some(GameMode::SinglePlayer) || self.phase != Phase::QuestionActive {
                    return Ignored("nothing to pause");
                }
                if let Some(q) = self.question.as_mut() {
                    q.paused_remaining = Some(time_remaining);
                }
                self.phase = Phase::Paused;
                Changed
            }
            ServerEvent::GameResumed { time_remaining } => {
                if self.phase != Phase::Paused {
                    return Ignored("not paused");
                }
                if let Some(q) = self.question.as_mut() {
                    q.paused_remaining = None;
                    q.deadline = now + Duration::from_secs(u64::from(time_remaining));
                }
                self.phase = Phase::QuestionActive;
                Changed
            }
            ServerEvent::LeaderboardUpdate { leaderboard, .. } => {
                if self.leaderboard == leaderboard {
                    return Ignored("leaderboard unchanged");
                }
                self.leaderboard = leaderboard;
                Changed
            }
            ServerEvent::SinglePlayerStatsUpdate(stats) => {
                if self.stats.as_ref() == Some(&stats) {
                    return Ignored("stats unchanged");
                }
                self.stats = Some(stats);
                Changed
            }

            // Rooms
            ServerEvent::RoomCreated { room_id, player, category, max_players, .. } => {
                if self.room.as_ref().is_some_and(|r| r.id == room_id) {
                    return Ignored("room already known");
                }
                if self.settle(&[RequestKind::CreateRoom]).is_none() {
                    return Ignored("no room requested");
                }
                self.sid.get_or_insert_with(|| player.session_id.clone());
                let mut room = Room::new(room_id, vec![player.clone()]);
                room.host_id = Some(player.session_id);
                room.category = category;
                room.max_players = max_players;
                self.room = Some(room);
                self.phase = Phase::Lobby;
                Changed
            }
            ServerEvent::RoomUpdate { room_id, players, host_id, game_state } => {
                let Some(room) = self.room.as_mut().filter(|r| r.id == room_id) else {
                    return Ignored("update for another room");
                };
                if room.players == players && room.host_id == host_id && room.state == game_state {
                    return Ignored("room unchanged");
                }
                room.players = players;
                room.host_id = host_id;
                room.state = game_state;
                Changed
            }
            ServerEvent::JoinedRoom {
                room_id,
                player,
                players,
                host_id,
                category,
                game_state,
                ..
            } => {
                if self.room.as_ref().is_some_and(|r| r.id == room_id) {
                    return Ignored("room already joined");
                }
                if self.settle(&[RequestKind::JoinRoom]).is_none() {
                    return Ignored("no join requested");
                }
                self.sid.get_or_insert(player.session_id);
                let mut room = Room::new(room_id, players);
                room.host_id = host_id;
                room.category = category;
                room.state = game_state;
                self.room = Some(room);
                self.phase = Phase::Lobby;
                Changed
            }
            ServerEvent::PlayerJoined { player, players } => {
                if let Some(room) = self.room.as_mut() {
                    if room.players == players {
                        return Ignored("roster unchanged");
                    }
                    room.players = players;
                    if self.mode == Some(GameMode::HeadToHead) {
                        room.ready = room.players.len() >= HEAD_TO_HEAD_PLAYERS;
                    }
                    return Changed;
                }
                // Joining a private match is only confirmed by this broadcast.
                let Some(pending) = self.settle(&[RequestKind::JoinPrivateMatch]) else {
                    return Ignored("not in a room");
                };
                self.sid.get_or_insert(player.session_id);
                let code = pending.room_code.unwrap_or_default();
                let mut room = Room::new(code, players);
                room.host_id = room
                    .players
                    .iter()
                    .find(|p| Some(p.session_id.as_str()) != self.sid.as_deref())
                    .map(|p| p.session_id.clone());
                self.room = Some(room);
                self.refresh_opponent();
                self.phase = Phase::Lobby;
                Changed
            }
            ServerEvent::PlayerLeft { player_id, players, new_host_id } => {
                let Some(room) = self.room.as_mut() else {
                    return Ignored("not in a room");
                };
                let before = (room.players.clone(), room.host_id.clone());
                if players.is_empty() {
                    room.players.retain(|p| p.session_id != player_id);
                } else {
                    room.players = players;
                }
                if new_host_id.is_some() {
                    room.host_id = new_host_id;
                }
                room.ready = false;
                if (room.players.clone(), room.host_id.clone()) == before {
                    return Ignored("roster unchanged");
                }
                Changed
            }
            ServerEvent::LeftRoom { room_id } => {
                if !self.room.as_ref().is_some_and(|r| r.id == room_id) {
                    return Ignored("not in that room");
                }
                self.reset_to_setup();
                self.notice = Some(Notice::info(format!("Left room {room_id}")));
                Changed
            }
            ServerEvent::NewHost { host_id } => {
                let Some(room) = self.room.as_mut() else {
                    return Ignored("not in a room");
                };
                if room.host_id.as_deref() == Some(host_id.as_str()) {
                    return Ignored("same host");
                }
                room.host_id = Some(host_id);
                if self.is_host() {
                    self.notice = Some(Notice::info("You are now the host"));
                }
                Changed
            }
            ServerEvent::PlayerDisconnected { player_id, .. } => {
                let Some(room) = self.room.as_mut() else {
                    return Ignored("not in a room");
                };
                let before = room.players.len();
                room.players.retain(|p| p.session_id != player_id);
                if room.players.len() == before {
                    return Ignored("unknown player");
                }
                room.ready = false;
                Changed
            }
            ServerEvent::GameStarted { total_questions, .. } => {
                let Some(room) = self.room.as_mut() else {
                    return Ignored("not in a room");
                };
                if self.started {
                    return Ignored("game already started");
                }
                room.state = RoomState::Playing;
                self.started = true;
                self.total_questions = Some(total_questions);
                self.settle(&[RequestKind::StartGame]);
                Changed
            }
            ServerEvent::NewQuestion(payload) => {
                if self.room.is_none() {
                    return Ignored("not in a room");
                }
                if !matches!(self.phase, Phase::Lobby | Phase::QuestionActive | Phase::AnswerReveal) {
                    return Ignored("no game running");
                }
                if let Some(room) = self.room.as_mut() {
                    room.state = RoomState::Playing;
                }
                self.show_question(payload, now)
            }
            ServerEvent::AnswerSubmitted(ack) => {
                if self.room.is_none() {
                    return Ignored("not in a room");
                }
                let Some(q) = self.question.as_mut() else {
                    return Ignored("no open question");
                };
                if !ack.is_success() {
                    let message = ack.message.unwrap_or_else(|| "Answer rejected".to_string());
                    self.notice = Some(Notice::error(message));
                    return Changed;
                }
                if q.feedback.is_some() {
                    return Ignored("answer already acknowledged");
                }
                q.feedback = Some(Feedback {
                    correct: ack.is_correct,
                    points: ack.points_earned,
                    first: ack.first_to_answer,
                });
                self.score = ack.current_score.unwrap_or(self.score + ack.points_earned);
                if let Some(streak) = ack.current_streak {
                    self.head_to_head.get_or_insert_with(Default::default).streak = streak;
                }
                Changed
            }
            ServerEvent::QuestionResults { correct_answer, player_results } => {
                self.reveal_room(correct_answer, None, player_results, None, None, None)
            }
            ServerEvent::ScoresUpdate { scores, total_questions, .. } => {
                if self.room.is_none() {
                    return Ignored("not in a room");
                }
                if self.scores == scores {
                    return Ignored("scores unchanged");
                }
                if let Some(mine) = scores
                    .iter()
                    .find(|s| s.session_id.is_some() && s.session_id.as_deref() == self.sid.as_deref())
                {
                    self.score = mine.score;
                }
                if total_questions.is_some() {
                    self.total_questions = total_questions;
                }
                self.scores = scores;
                Changed
            }
            ServerEvent::GameEnded { players, winners } => {
                if self.room.is_none() {
                    return Ignored("not in a room");
                }
                if matches!(self.outcome, Some(Outcome::Room { .. })) {
                    return Ignored("game already over");
                }
                let score = players
                    .iter()
                    .find(|s| s.session_id.is_some() && s.session_id.as_deref() == self.sid.as_deref())
                    .map_or(self.score, |s| s.score);
                self.scores = players.clone();
                self.outcome = Some(Outcome::Room {
                    standings: players,
                    winners,
                    head_to_head: None,
                });
                self.finish(score);
                Changed
            }
            ServerEvent::ChatMessage { sender, message, timestamp } => {
                if self.room.is_none() {
                    return Ignored("not in a room");
                }
                self.chat.push_back(ChatLine { sender, message, timestamp });
                while self.chat.len() > self.chat_limit {
                    self.chat.pop_front();
                }
                Changed
            }
            ServerEvent::CategoryUpdated { category } => {
                let Some(room) = self.room.as_mut() else {
                    return Ignored("not in a room");
                };
                if room.category.as_deref() == Some(category.as_str()) {
                    return Ignored("same category");
                }
                room.category = Some(category);
                Changed
            }
            ServerEvent::FiftyFiftyResult { disabled_answers } => {
                if self.phase != Phase::QuestionActive {
                    return Ignored("no open question");
                }
                let Some(q) = self.question.as_mut() else {
                    return Ignored("no open question");
                };
                let before = q.eliminated.len();
                for (i, option) in q.options.iter().enumerate() {
                    if disabled_answers.contains(option) && !q.eliminated.contains(&i) {
                        q.eliminated.push(i);
                    }
                }
                if q.eliminated.len() == before {
                    return Ignored("nothing new eliminated");
                }
                q.eliminated.sort_unstable();
                Changed
            }

            // Head to head
            ServerEvent::QueueStatus { status, position } => {
                let queued = self.phase == Phase::Queued || self.awaiting(&[RequestKind::Queue]);
                if !queued || self.mode != Some(GameMode::HeadToHead) {
                    return Ignored("not queued");
                }
                self.settle(&[RequestKind::Queue]);
                if self.phase == Phase::Queued && (position.is_none() || self.queue_position == position) {
                    return Ignored("queue position unchanged");
                }
                if status == "queued" || position.is_some() {
                    self.queue_position = position;
                }
                self.phase = Phase::Queued;
                Changed
            }
            ServerEvent::QueueCancelled {} => {
                if self.phase != Phase::Queued && !self.awaiting(&[RequestKind::Queue]) {
                    return Ignored("not queued");
                }
                self.reset_to_setup();
                self.notice = Some(Notice::info("Left the queue"));
                Changed
            }
            ServerEvent::MatchFound { room_id, players } => {
                if self.room.as_ref().is_some_and(|r| r.id == room_id) {
                    return Ignored("match already known");
                }
                let queued = self.phase == Phase::Queued || self.awaiting(&[RequestKind::Queue]);
                if !queued {
                    return Ignored("not queued");
                }
                self.settle(&[RequestKind::Queue]);
                let roster: Vec<PlayerInfo> = players
                    .into_iter()
                    .map(|p| PlayerInfo {
                        session_id: p.session_id,
                        name: p.name,
                        score: 0,
                        answered: false,
                        connected: true,
                    })
                    .collect();
                let mut room = Room::new(room_id, roster);
                // The player whose queue entry completed the match hosts it.
                room.host_id = room.players.first().map(|p| p.session_id.clone());
                room.ready = room.players.len() >= HEAD_TO_HEAD_PLAYERS;
                self.room = Some(room);
                self.queue_position = None;
                self.refresh_opponent();
                self.phase = Phase::Lobby;
                Changed
            }
            ServerEvent::PrivateRoomCreated { room_code, .. } => {
                if self.room.as_ref().is_some_and(|r| r.id == room_code) {
                    return Ignored("room already known");
                }
                if self.settle(&[RequestKind::CreatePrivateMatch]).is_none() {
                    return Ignored("no private match requested");
                }
                let me = self.me_as_player();
                let mut room = Room::new(room_code.clone(), me.into_iter().collect());
                room.host_id = self.sid.clone();
                room.max_players = Some(HEAD_TO_HEAD_PLAYERS as u32);
                self.room = Some(room);
                self.phase = Phase::Lobby;
                self.notice = Some(Notice::info(format!("Share code {room_code} with your opponent")));
                Changed
            }
            ServerEvent::ReadyToStart {} => {
                let Some(room) = self.room.as_mut() else {
                    return Ignored("not in a room");
                };
                if room.ready {
                    return Ignored("already ready");
                }
                room.ready = true;
                Changed
            }
            ServerEvent::HeadToHeadStarted { total_questions, players } => {
                let Some(room) = self.room.as_mut() else {
                    return Ignored("not in a room");
                };
                if self.started {
                    return Ignored("game already started");
                }
                room.state = RoomState::Playing;
                if !players.is_empty() {
                    room.players = players;
                }
                self.started = true;
                self.total_questions = Some(total_questions);
                self.settle(&[RequestKind::StartGame]);
                self.refresh_opponent();
                Changed
            }
            ServerEvent::HeadToHeadQuestionResults {
                correct_answer,
                question,
                players_comparison,
                score_difference,
                leader,
                questions_remaining,
            } => self.reveal_room(
                correct_answer,
                question,
                players_comparison,
                leader,
                score_difference,
                questions_remaining,
            ),
            ServerEvent::HeadToHeadScores {
                player1,
                player2,
                score_difference,
                leader,
                total_questions,
                ..
            } => {
                if self.room.is_none() {
                    return Ignored("not in a room");
                }
                let lines: Vec<HeadToHeadLine> = player1.into_iter().chain(player2).collect();
                if lines.is_empty() {
                    return Ignored("no scores");
                }
                let scores: Vec<ScoreLine> = lines
                    .iter()
                    .map(|l| ScoreLine {
                        name: l.name.clone(),
                        score: l.score,
                        session_id: None,
                        answered: l.answered,
                    })
                    .collect();
                let mine = lines.iter().find(|l| self.my_name_is(&l.name)).cloned();
                let status = self.head_to_head.get_or_insert_with(Default::default);
                let before = status.clone();
                status.leader = leader;
                status.score_difference = score_difference;
                if let Some(mine) = &mine {
                    status.streak = mine.streak;
                }
                if self.scores == scores && *status == before {
                    return Ignored("scores unchanged");
                }
                if let Some(mine) = mine {
                    self.score = mine.score;
                }
                if total_questions.is_some() {
                    self.total_questions = total_questions;
                }
                self.scores = scores;
                Changed
            }
            ServerEvent::HeadToHeadEnded { winner, is_tie, score_margin, players_stats } => {
                if self.room.is_none() {
                    return Ignored("not in a room");
                }
                let summary = HeadToHeadSummary {
                    winner: winner.map(|w| w.name),
                    is_tie,
                    margin: score_margin,
                    stats: players_stats,
                };
                if let Some(Outcome::Room { head_to_head, .. }) = self.outcome.as_mut() {
                    if head_to_head.is_some() {
                        return Ignored("game already over");
                    }
                    *head_to_head = Some(summary);
                    return Changed;
                }
                let standings: Vec<ScoreLine> = summary
                    .stats
                    .iter()
                    .map(|s| ScoreLine {
                        name: s.player.name.clone(),
                        score: s.player.score,
                        session_id: Some(s.player.session_id.clone()),
                        answered: s.player.answered,
                    })
                    .collect();
                let score = standings
                    .iter()
                    .find(|s| s.session_id.as_deref() == self.sid.as_deref())
                    .map_or(self.score, |s| s.score);
                self.outcome = Some(Outcome::Room {
                    standings,
                    winners: Vec::new(),
                    head_to_head: Some(summary),
                });
                self.finish(score);
                Changed
            }
            ServerEvent::RematchStarted { new_room_id, players } => {
                if self.mode != Some(GameMode::HeadToHead) || self.room.is_none() {
                    return Ignored("no match to replay");
                }
                if self.room.as_ref().is_some_and(|r| r.id == new_room_id) {
                    return Ignored("rematch already started");
                }
                let requested = self.settle(&[RequestKind::Rematch]).is_some();
                let chat = std::mem::take(&mut self.chat);
                self.clear_game();
                let mut room = Room::new(new_room_id, players);
                room.host_id = if requested { self.sid.clone() } else { None };
                room.ready = room.players.len() >= HEAD_TO_HEAD_PLAYERS;
                self.room = Some(room);
                self.chat = chat;
                self.refresh_opponent();
                self.phase = Phase::Lobby;
                Changed
            }
        }
    }

    fn server_error(&mut self, message: String) -> Applied {
        if let Some(pending) = self.pending.take() {
            self.revert(&pending);
        }
        self.notice = Some(Notice::error(message));
        Applied::Changed
    }

    fn show_question(&mut self, payload: QuestionPayload, now: Instant) -> Applied {
        if let Some(current) = &self.question {
            if payload.question_number < current.number {
                return Applied::Ignored("stale question");
            }
            if payload.question_number == current.number {
                return Applied::Ignored("question already shown");
            }
        }
        self.settle(&[RequestKind::StartSolo, RequestKind::StartGame]);
        if let Some(score) = payload.current_score {
            self.score = score;
        }
        self.total_questions = Some(payload.total_questions);
        self.question = Some(ActiveQuestion {
            number: payload.question_number,
            total: payload.total_questions,
            text: payload.question,
            options: payload.options,
            category: payload.category,
            deadline: now + Duration::from_secs(u64::from(payload.time_limit)),
            paused_remaining: None,
            choice: None,
            eliminated: Vec::new(),
            locked: payload.time_limit == 0,
            feedback: None,
        });
        self.reveal = None;
        self.phase = Phase::QuestionActive;
        Applied::Changed
    }

    fn reveal_room(
        &mut self,
        correct_answer: String,
        question_text: Option<String>,
        results: Vec<PlayerResult>,
        leader: Option<String>,
        score_difference: Option<i64>,
        questions_remaining: Option<u32>,
    ) -> Applied {
        if self.room.is_none() {
            return Applied::Ignored("not in a room");
        }
        match self.phase {
            Phase::QuestionActive => {}
            Phase::AnswerReveal => return Applied::Ignored("question already revealed"),
            _ => return Applied::Ignored("no open question"),
        }
        let Some(q) = self.question.as_mut() else {
            return Applied::Ignored("no open question");
        };
        q.locked = true;
        let my_answer = q.chosen_text();
        let correct = my_answer.as_deref() == Some(correct_answer.as_str());
        let points = q.feedback.as_ref().map(|f| f.points);
        let remaining = questions_remaining.or(Some(q.total.saturating_sub(q.number)));
        let question = question_text.or_else(|| Some(q.text.clone()));

        if let Some(mine) = results.iter().find(|r| self.player_name.as_deref() == Some(r.name.as_str())) {
            self.score = mine.score;
        }
        if self.mode == Some(GameMode::HeadToHead) {
            let status = self.head_to_head.get_or_insert_with(Default::default);
            status.leader = leader.clone();
            if let Some(diff) = score_difference {
                status.score_difference = diff;
            }
        }
        self.reveal = Some(Reveal {
            question,
            correct_answer,
            my_answer,
            correct,
            points,
            results,
            leader,
            score_difference,
            questions_remaining: remaining,
        });
        self.phase = Phase::AnswerReveal;
        Applied::Changed
    }

    fn finish(&mut self, score: i64) {
        self.score = score;
        self.question = None;
        self.pending = None;
        if let Some(room) = self.room.as_mut() {
            room.state = RoomState::Finished;
        }
        self.phase = Phase::GameOver;
    }

    fn me_as_player(&self) -> Option<PlayerInfo> {
        Some(PlayerInfo {
            session_id: self.sid.clone()?,
            name: self.player_name.clone()?,
            score: 0,
            answered: false,
            connected: true,
        })
    }

    fn refresh_opponent(&mut self) {
        if self.mode != Some(GameMode::HeadToHead) {
            return;
        }
        let opponent = self.room.as_ref().and_then(|room| {
            room.players
                .iter()
                .find(|p| Some(p.session_id.as_str()) != self.sid.as_deref())
                .map(|p| p.name.clone())
        });
        self.head_to_head.get_or_insert_with(Default::default).opponent = opponent;
    }

    // ─── Rendering ────────────────────────────────────────────────

    pub fn view(&self, now: Instant) -> SessionView {
        let question = self.question.as_ref().map(|q| QuestionView {
            number: q.number,
            total: q.total,
            text: q.text.clone(),
            category: q.category.clone(),
            options: q
                .options
                .iter()
                .enumerate()
                .map(|(i, text)| OptionView {
                    index: i + 1,
                    text: text.clone(),
                    eliminated: q.eliminated.contains(&i),
                    chosen: q.choice == Some(i),
                })
                .collect(),
            time_remaining: q.remaining(now),
            locked: q.locked || q.remaining(now) == 0,
            answered: q.choice.is_some(),
            feedback: q.feedback.clone(),
        });

        let lifelines_left = match self.mode {
            Some(mode) if mode.has_lifelines() => Lifeline::ALL
                .into_iter()
                .filter(|l| !self.lifelines_used.contains(l))
                .collect(),
            _ => Vec::new(),
        };

        SessionView {
            connection: self.connection,
            player_name: self.player_name.clone(),
            mode: self.mode,
            phase: self.phase,
            room: self.room.clone(),
            is_host: self.is_host(),
            question,
            reveal: self.reveal.clone(),
            score: self.score,
            total_questions: self.total_questions,
            scores: self.scores.clone(),
            head_to_head: self.head_to_head.clone(),
            outcome: self.outcome.clone(),
            lifelines_left,
            chat: self.chat.iter().cloned().collect(),
            leaderboard: self.leaderboard.clone(),
            stats: self.stats.clone(),
            notice: self.notice.clone(),
            queue_position: self.queue_position,
            pending: self.pending(),
        }
    }
}

fn validate_name(name: &str) -> Result<String, SessionError> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(SessionError::InvalidName { max: MAX_NAME_LEN });
    }
    Ok(name.to_string())
}

fn validate_room_code(code: &str) -> Result<String, SessionError> {
    let code = code.trim();
    if code.len() != ROOM_CODE_LEN || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SessionError::InvalidRoomCode { len: ROOM_CODE_LEN });
    }
    Ok(code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, name: &str) -> PlayerInfo {
        PlayerInfo {
            session_id: id.into(),
            name: name.into(),
            score: 0,
            answered: false,
            connected: true,
        }
    }

    fn question(number: u32, total: u32, time_limit: u32) -> QuestionPayload {
        QuestionPayload {
            question_number: number,
            total_questions: total,
            question: format!("Question {number}?"),
            options: vec!["Red".into(), "Blue".into(), "Green".into(), "Gold".into()],
            time_limit,
            current_score: None,
            category: Some("NBA".into()),
        }
    }

    fn online(name: &str, sid: &str) -> Session {
        let mut session = Session::new(Some(name.into()), 3);
        session.on_connected(Some(sid.into()));
        session
    }

    /// Host "ada" in a lobby with one other player.
    fn lobby(now: Instant) -> Session {
        let mut s = online("ada", "s1");
        s.act(Action::CreateRoom { category: Category::Nba }, now).unwrap();
        s.apply(
            ServerEvent::RoomCreated {
                room_id: "123456".into(),
                player: player("s1", "ada"),
                is_host: true,
                category: Some("nba".into()),
                max_players: Some(4),
            },
            now,
        );
        s.apply(
            ServerEvent::PlayerJoined {
                player: player("s2", "bob"),
                players: vec![player("s1", "ada"), player("s2", "bob")],
            },
            now,
        );
        s
    }

    #[test]
    fn single_player_round_trip() {
        let now = Instant::now();
        let mut s = online("ada", "s1");

        let sent = s.act(Action::StartSolo { category: Category::All }, now).unwrap();
        assert_eq!(
            sent,
            Some(ClientEvent::StartSinglePlayer { player_name: "ada".into(), category: Category::All })
        );
        assert_eq!(s.pending(), Some(RequestKind::StartSolo));

        assert_eq!(
            s.apply(ServerEvent::SinglePlayerStarted { total_questions: 2, message: None }, now),
            Applied::Changed
        );
        assert_eq!(s.apply(ServerEvent::SinglePlayerQuestion(question(1, 2, 10)), now), Applied::Changed);
        assert_eq!(s.phase(), Phase::QuestionActive);
        assert_eq!(s.pending(), None);

        let sent = s.act(Action::Answer { choice: 2 }, now).unwrap();
        assert_eq!(sent, Some(ClientEvent::SubmitSinglePlayerAnswer { answer: Some("Blue".into()) }));

        s.apply(
            ServerEvent::AnswerResult {
                is_correct: true,
                correct_answer: Some("Blue".into()),
                points_earned: 800,
                total_score: 800,
                time_taken: 2.0,
            },
            now,
        );
        assert_eq!(s.phase(), Phase::AnswerReveal);
        let view = s.view(now);
        assert_eq!(view.score, 800);
        assert!(view.reveal.as_ref().is_some_and(|r| r.correct && r.my_answer.as_deref() == Some("Blue")));

        s.apply(ServerEvent::SinglePlayerQuestion(question(2, 2, 10)), now);
        assert_eq!(s.phase(), Phase::QuestionActive);

        s.apply(
            ServerEvent::SinglePlayerGameOver {
                final_score: 800,
                questions_answered: 2,
                correct_answers: 1,
                accuracy: 50.0,
                game_duration: 21.5,
                leaderboard_position: Some(3),
                top_10_leaderboard: vec![LeaderboardEntry {
                    player_name: "zoe".into(),
                    score: 1900,
                    date: None,
                }],
            },
            now,
        );
        assert_eq!(s.phase(), Phase::GameOver);
        let view = s.view(now);
        assert!(view.question.is_none());
        assert!(matches!(view.outcome, Some(Outcome::Solo { position: Some(3), .. })));
        assert_eq!(view.leaderboard.len(), 1);
    }

    #[test]
    fn question_events_are_idempotent() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        s.act(Action::StartSolo { category: Category::All }, now).unwrap();

        assert_eq!(s.apply(ServerEvent::SinglePlayerQuestion(question(3, 5, 10)), now), Applied::Changed);
        s.act(Action::Answer { choice: 1 }, now).unwrap();

        let again = s.apply(ServerEvent::SinglePlayerQuestion(question(3, 5, 10)), now);
        assert_eq!(again, Applied::Ignored("question already shown"));
        let stale = s.apply(ServerEvent::SinglePlayerQuestion(question(2, 5, 10)), now);
        assert_eq!(stale, Applied::Ignored("stale question"));
        assert!(s.view(now).question.is_some_and(|q| q.answered));
    }

    #[test]
    fn stale_events_outside_a_game_are_ignored() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        assert_eq!(
            s.apply(ServerEvent::NewQuestion(question(1, 10, 15)), now),
            Applied::Ignored("not in a room")
        );
        assert_eq!(
            s.apply(ServerEvent::TimerUpdate { time_remaining: 4, question_number: None }, now),
            Applied::Ignored("no open question")
        );
        assert_eq!(
            s.apply(
                ServerEvent::QuestionResults { correct_answer: "Red".into(), player_results: vec![] },
                now
            ),
            Applied::Ignored("not in a room")
        );
        assert_eq!(s.phase(), Phase::Setup);
    }

    #[test]
    fn first_question_may_arrive_before_game_started() {
        let now = Instant::now();
        let mut s = lobby(now);
        assert!(s.is_host());

        s.act(Action::StartGame, now).unwrap();
        assert_eq!(s.apply(ServerEvent::NewQuestion(question(1, 15, 15)), now), Applied::Changed);
        assert_eq!(s.phase(), Phase::QuestionActive);

        assert_eq!(
            s.apply(ServerEvent::GameStarted { total_questions: 15, message: None }, now),
            Applied::Changed
        );
        assert_eq!(s.phase(), Phase::QuestionActive);
        assert_eq!(
            s.apply(ServerEvent::GameStarted { total_questions: 15, message: None }, now),
            Applied::Ignored("game already started")
        );
    }

    #[test]
    fn room_round_reveals_and_ends() {
        let now = Instant::now();
        let mut s = lobby(now);
        s.apply(ServerEvent::NewQuestion(question(1, 1, 15)), now);
        s.act(Action::Answer { choice: 3 }, now).unwrap();
        s.apply(
            ServerEvent::AnswerSubmitted(AnswerAck {
                status: "success".into(),
                is_correct: true,
                points_earned: 970,
                current_score: Some(970),
                ..Default::default()
            }),
            now,
        );
        assert_eq!(s.view(now).score, 970);

        let results = ServerEvent::QuestionResults {
            correct_answer: "Green".into(),
            player_results: vec![PlayerResult {
                name: "ada".into(),
                answer: Some("Green".into()),
                is_correct: true,
                score: 970,
                answered_first: false,
            }],
        };
        assert_eq!(s.apply(results.clone(), now), Applied::Changed);
        assert_eq!(s.apply(results, now), Applied::Ignored("question already revealed"));
        assert!(s.view(now).reveal.is_some_and(|r| r.correct && r.points == Some(970)));

        let ended = ServerEvent::GameEnded {
            players: vec![ScoreLine {
                name: "ada".into(),
                score: 970,
                session_id: Some("s1".into()),
                answered: true,
            }],
            winners: vec![],
        };
        assert_eq!(s.apply(ended.clone(), now), Applied::Changed);
        assert_eq!(s.apply(ended, now), Applied::Ignored("game already over"));
        assert_eq!(s.phase(), Phase::GameOver);
    }

    #[test]
    fn answering_is_guarded() {
        let now = Instant::now();
        let mut s = lobby(now);
        assert!(matches!(
            s.act(Action::Answer { choice: 1 }, now),
            Err(SessionError::InvalidPhase { action: "answer", phase: Phase::Lobby })
        ));

        s.apply(ServerEvent::NewQuestion(question(1, 3, 15)), now);
        assert_eq!(s.act(Action::Answer { choice: 5 }, now), Err(SessionError::NoSuchOption(5)));
        assert_eq!(s.act(Action::Answer { choice: 0 }, now), Err(SessionError::NoSuchOption(0)));
        s.act(Action::Answer { choice: 1 }, now).unwrap();
        assert_eq!(s.act(Action::Answer { choice: 2 }, now), Err(SessionError::AlreadyAnswered));
    }

    #[test]
    fn countdown_locks_the_question() {
        let now = Instant::now();
        let mut s = lobby(now);
        s.apply(ServerEvent::NewQuestion(question(1, 3, 15)), now);
        assert_eq!(s.view(now).question.map(|q| q.time_remaining), Some(15));

        s.apply(ServerEvent::TimerUpdate { time_remaining: 2, question_number: None }, now);
        assert_eq!(s.view(now).question.map(|q| q.time_remaining), Some(2));
        assert_eq!(
            s.apply(ServerEvent::TimerUpdate { time_remaining: 9, question_number: Some(7) }, now),
            Applied::Ignored("timer for another question")
        );

        let later = now + Duration::from_secs(3);
        assert!(s.tick(later));
        assert!(!s.tick(later));
        assert_eq!(s.act(Action::Answer { choice: 1 }, later), Err(SessionError::TimeUp));
    }

    #[test]
    fn fifty_fifty_once_per_game() {
        let now = Instant::now();
        let mut s = lobby(now);
        s.apply(ServerEvent::NewQuestion(question(1, 3, 15)), now);

        let sent = s.act(Action::UseLifeline(Lifeline::FiftyFifty), now).unwrap();
        assert_eq!(sent, Some(ClientEvent::UseLifeline { lifeline_type: Lifeline::FiftyFifty }));
        assert_eq!(
            s.act(Action::UseLifeline(Lifeline::FiftyFifty), now),
            Err(SessionError::LifelineUsed(Lifeline::FiftyFifty))
        );

        let result = ServerEvent::FiftyFiftyResult { disabled_answers: vec!["Red".into(), "Gold".into()] };
        assert_eq!(s.apply(result.clone(), now), Applied::Changed);
        assert_eq!(s.apply(result, now), Applied::Ignored("nothing new eliminated"));
        assert_eq!(s.act(Action::Answer { choice: 4 }, now), Err(SessionError::OptionEliminated));

        let left = s.view(now).lifelines_left;
        assert_eq!(left, vec![Lifeline::NinetiethMinute, Lifeline::FeelinGood]);
    }

    #[test]
    fn lifelines_are_not_for_solo_play() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        s.act(Action::StartSolo { category: Category::All }, now).unwrap();
        s.apply(ServerEvent::SinglePlayerQuestion(question(1, 30, 10)), now);
        assert_eq!(
            s.act(Action::UseLifeline(Lifeline::FiftyFifty), now),
            Err(SessionError::LifelinesUnavailable(GameMode::SinglePlayer))
        );
        assert!(s.view(now).lifelines_left.is_empty());
    }

    #[test]
    fn only_the_host_starts_with_enough_players() {
        let now = Instant::now();
        let mut s = online("bob", "s2");
        s.act(Action::JoinRoom { code: "123456".into() }, now).unwrap();
        s.apply(
            ServerEvent::JoinedRoom {
                room_id: "123456".into(),
                player: player("s2", "bob"),
                is_host: false,
                players: vec![player("s1", "ada"), player("s2", "bob")],
                host_id: Some("s1".into()),
                category: Some("all".into()),
                game_state: RoomState::Waiting,
            },
            now,
        );
        assert_eq!(s.phase(), Phase::Lobby);
        assert_eq!(s.act(Action::StartGame, now), Err(SessionError::NotHost("start the game")));

        s.apply(ServerEvent::NewHost { host_id: "s2".into() }, now);
        s.apply(ServerEvent::PlayerLeft { player_id: "s1".into(), players: vec![], new_host_id: None }, now);
        assert!(s.is_host());
        assert_eq!(
            s.act(Action::StartGame, now),
            Err(SessionError::NotEnoughPlayers { have: 1, need: 2 })
        );
    }

    #[test]
    fn room_codes_and_names_are_validated() {
        let now = Instant::now();
        let mut s = Session::new(None, 10);
        s.on_connected(Some("s1".into()));
        assert_eq!(
            s.act(Action::CreateRoom { category: Category::All }, now),
            Err(SessionError::NameRequired)
        );
        assert_eq!(
            s.act(Action::SetName { name: "x".repeat(21) }, now),
            Err(SessionError::InvalidName { max: MAX_NAME_LEN })
        );
        s.act(Action::SetName { name: " ada ".into() }, now).unwrap();
        assert_eq!(
            s.act(Action::JoinRoom { code: "12 45".into() }, now),
            Err(SessionError::InvalidRoomCode { len: ROOM_CODE_LEN })
        );
        let sent = s.act(Action::JoinPrivateMatch { code: "ab12cd".into() }, now).unwrap();
        assert_eq!(
            sent,
            Some(ClientEvent::JoinPrivateHeadToHead { room_code: "AB12CD".into(), player_name: "ada".into() })
        );
    }

    #[test]
    fn server_error_reverts_a_pending_join() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        s.act(Action::JoinRoom { code: "654321".into() }, now).unwrap();
        assert_eq!(s.mode(), Some(GameMode::Multiplayer));
        assert_eq!(
            s.act(Action::CreateRoom { category: Category::All }, now),
            Err(SessionError::RequestPending)
        );

        s.apply(ServerEvent::Error { message: "Room not found".into(), details: None }, now);
        let view = s.view(now);
        assert_eq!(view.phase, Phase::Setup);
        assert_eq!(view.mode, None);
        assert_eq!(view.pending, None);
        assert_eq!(view.notice.map(|n| n.text), Some("Room not found".into()));
    }

    #[test]
    fn unanswered_requests_time_out() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        s.act(Action::Queue, now).unwrap();
        let timeout = Duration::from_secs(10);

        assert!(!s.expire_pending(now + Duration::from_secs(9), timeout));
        assert!(s.expire_pending(now + Duration::from_secs(10), timeout));
        assert_eq!(s.pending(), None);
        assert_eq!(s.mode(), None);
        assert!(s.view(now).notice.is_some_and(|n| n.is_error));
    }

    #[test]
    fn reconnect_with_a_new_session_drops_the_room() {
        let now = Instant::now();
        let mut s = lobby(now);
        s.on_disconnected(&DisconnectReason::TransportClose);
        assert_eq!(s.act(Action::StartGame, now), Err(SessionError::NotConnected));

        s.on_connected(Some("s9".into()));
        let view = s.view(now);
        assert_eq!(view.phase, Phase::Setup);
        assert!(view.room.is_none());
        assert!(view.notice.is_some_and(|n| n.is_error));
    }

    #[test]
    fn reconnect_in_the_menu_keeps_state() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        s.apply(
            ServerEvent::LeaderboardUpdate {
                leaderboard: vec![LeaderboardEntry { player_name: "zoe".into(), score: 5, date: None }],
                category: None,
            },
            now,
        );
        s.on_disconnected(&DisconnectReason::TransportClose);
        s.on_connected(Some("s2".into()));
        let view = s.view(now);
        assert!(view.notice.is_none());
        assert_eq!(view.leaderboard.len(), 1);
        assert_eq!(view.connection, ConnectionStatus::Connected);
    }

    #[test]
    fn chat_is_validated_and_bounded() {
        let now = Instant::now();
        let mut s = lobby(now);
        assert_eq!(s.act(Action::Chat { text: "   ".into() }, now), Err(SessionError::EmptyMessage));
        assert_eq!(
            s.act(Action::Chat { text: "a".repeat(201) }, now),
            Err(SessionError::MessageTooLong { len: 201, max: MAX_CHAT_LEN })
        );
        assert_eq!(
            s.act(Action::Chat { text: " gg ".into() }, now),
            Ok(Some(ClientEvent::ChatMessage { message: "gg".into() }))
        );

        for i in 0..5 {
            s.apply(
                ServerEvent::ChatMessage { sender: "bob".into(), message: format!("m{i}"), timestamp: None },
                now,
            );
        }
        let chat = s.view(now).chat;
        assert_eq!(chat.len(), 3);
        assert_eq!(chat[0].message, "m2");
    }

    #[test]
    fn head_to_head_queue_to_result() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        s.act(Action::Queue, now).unwrap();
        s.apply(ServerEvent::QueueStatus { status: "queued".into(), position: Some(1) }, now);
        assert_eq!(s.phase(), Phase::Queued);
        assert_eq!(
            s.apply(ServerEvent::QueueStatus { status: "queued".into(), position: Some(1) }, now),
            Applied::Ignored("queue position unchanged")
        );

        s.apply(
            ServerEvent::MatchFound {
                room_id: "777777".into(),
                players: vec![
                    QueuedPlayer { session_id: "s1".into(), name: "ada".into() },
                    QueuedPlayer { session_id: "s2".into(), name: "bob".into() },
                ],
            },
            now,
        );
        assert_eq!(s.phase(), Phase::Lobby);
        assert!(s.is_host());
        assert_eq!(
            s.view(now).head_to_head.and_then(|h| h.opponent),
            Some("bob".to_string())
        );

        s.act(Action::StartGame, now).unwrap();
        s.apply(ServerEvent::NewQuestion(question(1, 10, 10)), now);
        s.apply(
            ServerEvent::HeadToHeadStarted {
                total_questions: 10,
                players: vec![player("s1", "ada"), player("s2", "bob")],
            },
            now,
        );
        s.act(Action::Answer { choice: 2 }, now).unwrap();
        s.apply(
            ServerEvent::HeadToHeadQuestionResults {
                correct_answer: "Blue".into(),
                question: Some("Question 1?".into()),
                players_comparison: vec![],
                score_difference: Some(900),
                leader: Some("ada".into()),
                questions_remaining: Some(9),
            },
            now,
        );
        let view = s.view(now);
        assert_eq!(view.phase, Phase::AnswerReveal);
        assert_eq!(view.head_to_head.and_then(|h| h.leader), Some("ada".to_string()));

        s.apply(
            ServerEvent::GameEnded {
                players: vec![ScoreLine { name: "ada".into(), score: 900, session_id: Some("s1".into()), answered: true }],
                winners: vec![],
            },
            now,
        );
        let ended = ServerEvent::HeadToHeadEnded {
            winner: Some(player("s1", "ada")),
            is_tie: false,
            score_margin: 900,
            players_stats: vec![],
        };
        assert_eq!(s.apply(ended.clone(), now), Applied::Changed);
        assert_eq!(s.apply(ended, now), Applied::Ignored("game already over"));
        assert!(matches!(
            s.view(now).outcome,
            Some(Outcome::Room { head_to_head: Some(HeadToHeadSummary { margin: 900, .. }), .. })
        ));

        s.act(Action::Rematch, now).unwrap();
        s.apply(
            ServerEvent::RematchStarted {
                new_room_id: "888888".into(),
                players: vec![player("s1", "ada"), player("s2", "bob")],
            },
            now,
        );
        let view = s.view(now);
        assert_eq!(view.phase, Phase::Lobby);
        assert!(view.is_host);
        assert!(view.outcome.is_none());
        assert_eq!(view.lifelines_left.len(), 3);
    }

    #[test]
    fn joining_a_private_match_is_confirmed_by_roster() {
        let now = Instant::now();
        let mut s = online("bob", "s2");
        s.act(Action::JoinPrivateMatch { code: "QWE123".into() }, now).unwrap();
        s.apply(
            ServerEvent::PlayerJoined {
                player: player("s2", "bob"),
                players: vec![player("s1", "ada"), player("s2", "bob")],
            },
            now,
        );
        let view = s.view(now);
        assert_eq!(view.phase, Phase::Lobby);
        let room = view.room.unwrap();
        assert_eq!(room.id, "QWE123");
        assert_eq!(room.host_id.as_deref(), Some("s1"));
        assert!(!view.is_host);

        assert_eq!(s.apply(ServerEvent::ReadyToStart {}, now), Applied::Changed);
        assert_eq!(s.apply(ServerEvent::ReadyToStart {}, now), Applied::Ignored("already ready"));
    }

    #[test]
    fn pause_freezes_the_countdown() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        s.act(Action::StartSolo { category: Category::Nba }, now).unwrap();
        s.apply(ServerEvent::SinglePlayerQuestion(question(1, 30, 10)), now);
        assert_eq!(s.act(Action::PauseSolo, now), Ok(Some(ClientEvent::PauseSinglePlayer)));

        s.apply(ServerEvent::GamePaused { time_remaining: 6 }, now);
        assert_eq!(s.phase(), Phase::Paused);
        let later = now + Duration::from_secs(30);
        assert_eq!(s.view(later).question.map(|q| q.time_remaining), Some(6));
        assert!(!s.tick(later));

        s.apply(ServerEvent::GameResumed { time_remaining: 6 }, later);
        assert_eq!(s.phase(), Phase::QuestionActive);
        assert_eq!(s.view(later).question.map(|q| q.time_remaining), Some(6));
    }

    #[test]
    fn leaving_returns_to_the_menu() {
        let now = Instant::now();
        let mut s = lobby(now);
        assert_eq!(
            s.act(Action::LeaveRoom, now),
            Ok(Some(ClientEvent::LeaveRoom { room_id: "123456".into() }))
        );
        assert_eq!(s.apply(ServerEvent::LeftRoom { room_id: "999999".into() }, now), Applied::Ignored("not in that room"));
        s.apply(ServerEvent::LeftRoom { room_id: "123456".into() }, now);
        let view = s.view(now);
        assert_eq!(view.phase, Phase::Setup);
        assert!(view.room.is_none());
        assert!(view.chat.is_empty());
    }

    fn matched(now: Instant) -> Session {
        let mut s = online("ada", "s1");
        s.act(Action::Queue, now).unwrap();
        s.apply(
            ServerEvent::MatchFound {
                room_id: "777777".into(),
                players: vec![
                    QueuedPlayer { session_id: "s1".into(), name: "ada".into() },
                    QueuedPlayer { session_id: "s2".into(), name: "bob".into() },
                ],
            },
            now,
        );
        s
    }

    #[test]
    fn head_to_head_menu_is_local() {
        let now = Instant::now();
        let mut s = matched(now);
        s.apply(
            ServerEvent::GameEnded {
                players: vec![ScoreLine { name: "ada".into(), score: 300, session_id: Some("s1".into()), answered: true }],
                winners: vec![],
            },
            now,
        );
        assert_eq!(s.phase(), Phase::GameOver);

        assert_eq!(s.act(Action::BackToMenu, now), Ok(None));
        let view = s.view(now);
        assert_eq!(view.phase, Phase::Setup);
        assert!(view.room.is_none());
        assert_eq!(view.mode, None);
        assert_eq!(
            s.act(Action::Queue, now),
            Ok(Some(ClientEvent::QueueHeadToHead { player_name: "ada".into() }))
        );

        let mut s = matched(now);
        assert_eq!(s.act(Action::LeaveRoom, now), Ok(None));
        assert!(s.view(now).room.is_none());
    }

    #[test]
    fn refused_leave_drops_the_room() {
        let now = Instant::now();
        let mut s = lobby(now);
        s.act(Action::LeaveRoom, now).unwrap();
        s.apply(ServerEvent::Error { message: "Not in a room".into(), details: None }, now);
        let view = s.view(now);
        assert_eq!(view.phase, Phase::Setup);
        assert!(view.room.is_none());
        assert_eq!(view.pending, None);
        assert_eq!(view.notice.map(|n| n.text), Some("Not in a room".into()));
    }

    #[test]
    fn unanswered_leave_drops_the_room() {
        let now = Instant::now();
        let mut s = lobby(now);
        s.act(Action::LeaveRoom, now).unwrap();
        assert_eq!(s.pending(), Some(RequestKind::Leave));

        assert!(s.expire_pending(now + Duration::from_secs(10), Duration::from_secs(10)));
        let view = s.view(now);
        assert_eq!(view.phase, Phase::Setup);
        assert!(view.room.is_none());
        assert!(view.notice.is_some_and(|n| n.is_error));
    }

    #[test]
    fn private_match_requests_time_out() {
        let now = Instant::now();
        let timeout = Duration::from_secs(10);
        let mut s = online("ada", "s1");

        s.act(Action::CreatePrivateMatch, now).unwrap();
        assert_eq!(s.mode(), Some(GameMode::HeadToHead));
        assert!(s.expire_pending(now + timeout, timeout));
        assert_eq!((s.phase(), s.mode(), s.pending()), (Phase::Setup, None, None));

        assert_eq!(
            s.act(Action::JoinPrivateMatch { code: "qwe123".into() }, now),
            Ok(Some(ClientEvent::JoinPrivateHeadToHead { room_code: "QWE123".into(), player_name: "ada".into() }))
        );
        assert!(s.expire_pending(now + timeout, timeout));
        assert_eq!((s.phase(), s.mode(), s.pending()), (Phase::Setup, None, None));
        assert!(s.view(now).room.is_none());
    }

    #[test]
    fn unsent_requests_are_abandoned() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        s.act(Action::CreateRoom { category: Category::Nba }, now).unwrap();
        assert_eq!(s.pending(), Some(RequestKind::CreateRoom));

        assert!(s.abandon_pending());
        assert_eq!((s.phase(), s.mode(), s.pending()), (Phase::Setup, None, None));
        assert!(!s.abandon_pending());
        assert!(s.act(Action::Queue, now).is_ok());
    }

    #[test]
    fn head_to_head_start_needs_both_players() {
        let now = Instant::now();
        let mut s = online("ada", "s1");
        s.act(Action::CreatePrivateMatch, now).unwrap();
        s.apply(ServerEvent::PrivateRoomCreated { room_code: "QWE123".into(), status: None }, now);
        assert_eq!(s.phase(), Phase::Lobby);
        assert_eq!(
            s.act(Action::StartGame, now),
            Err(SessionError::NotEnoughPlayers { have: 1, need: HEAD_TO_HEAD_PLAYERS })
        );
    }

    #[test]
    fn answer_without_a_question_reports_the_phase() {
        let now = Instant::now();
        let mut s = lobby(now);
        s.phase = Phase::QuestionActive;
        assert_eq!(
            s.act(Action::Answer { choice: 1 }, now),
            Err(SessionError::InvalidPhase { action: "answer", phase: Phase::QuestionActive })
        );
    }
}
