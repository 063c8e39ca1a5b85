use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The three ways to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    SinglePlayer,
    HeadToHead,
    Multiplayer,
}

impl GameMode {
    /// Lifelines only exist when playing against someone.
    pub fn has_lifelines(self) -> bool {
        !matches!(self, Self::SinglePlayer)
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SinglePlayer => write!(f, "Single player"),
            Self::HeadToHead => write!(f, "Head to head"),
            Self::Multiplayer => write!(f, "Multiplayer"),
        }
    }
}

/// Question categories offered by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Category {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "premier league")]
    PremierLeague,
    #[serde(rename = "nba")]
    Nba,
    #[serde(rename = "international football")]
    InternationalFootball,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Self::All,
        Self::PremierLeague,
        Self::Nba,
        Self::InternationalFootball,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::PremierLeague => "premier league",
            Self::Nba => "nba",
            Self::InternationalFootball => "international football",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::All => "All Categories",
            Self::PremierLeague => "Premier League",
            Self::Nba => "NBA",
            Self::InternationalFootball => "International Football",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "all" | "" => Ok(Self::All),
            "premier league" | "pl" => Ok(Self::PremierLeague),
            "nba" => Ok(Self::Nba),
            "international football" | "international" => Ok(Self::InternationalFootball),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

/// Room lifecycle as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    #[default]
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifeline {
    FiftyFifty,
    NinetiethMinute,
    FeelinGood,
}

impl Lifeline {
    pub const ALL: [Lifeline; 3] = [Self::FiftyFifty, Self::NinetiethMinute, Self::FeelinGood];
}

impl fmt::Display for Lifeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FiftyFifty => write!(f, "50:50"),
            Self::NinetiethMinute => write!(f, "90th Minute"),
            Self::FeelinGood => write!(f, "Feelin' Good"),
        }
    }
}

/// A player as serialized by the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub session_id: String,
    pub name: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub answered: bool,
    #[serde(default = "default_true")]
    pub connected: bool,
}

fn default_true() -> bool {
    true
}

/// Matchmaking queue entry echoed back in `match_found`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedPlayer {
    pub session_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question_number: u32,
    pub total_questions: u32,
    pub question: String,
    pub options: Vec<String>,
    pub time_limit: u32,
    #[serde(default)]
    pub current_score: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Acknowledgement of a room answer. On rejection only `status` and
/// `message` are present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnswerAck {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub points_earned: i64,
    #[serde(default)]
    pub current_score: Option<i64>,
    #[serde(default)]
    pub all_answered: bool,
    #[serde(default)]
    pub time_taken: Option<f64>,
    #[serde(default)]
    pub first_to_answer: bool,
    #[serde(default)]
    pub current_streak: Option<u32>,
    #[serde(default)]
    pub opponent_status: Vec<OpponentStatus>,
}

impl AnswerAck {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpponentStatus {
    pub player_id: String,
    pub name: String,
    #[serde(default)]
    pub answered: bool,
    #[serde(default)]
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub name: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub answered_first: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub name: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub answered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadToHeadLine {
    pub name: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub answered: bool,
    #[serde(default)]
    pub streak: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadToHeadPlayerStats {
    pub player: PlayerInfo,
    #[serde(default)]
    pub first_answers: u32,
    #[serde(default)]
    pub max_streak: u32,
    #[serde(default)]
    pub avg_response_time: f64,
    #[serde(default)]
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player_name: String,
    pub score: i64,
    #[serde(default)]
    pub date: Option<String>,
}

/// Personal single-player statistics. The server replies with only
/// `message` when it has nothing on file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub total_games_played: Option<u32>,
    #[serde(default)]
    pub total_score: Option<i64>,
    #[serde(default)]
    pub total_questions_answered: Option<u32>,
    #[serde(default)]
    pub total_correct_answers: Option<u32>,
    #[serde(default)]
    pub average_accuracy: Option<f64>,
    #[serde(default)]
    pub fastest_game_duration: Option<f64>,
    #[serde(default)]
    pub highest_score: Option<i64>,
    #[serde(default)]
    pub last_played: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Events sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    // Single player
    StartSinglePlayer { player_name: String, category: Category },
    SubmitSinglePlayerAnswer { answer: Option<String> },
    PauseSinglePlayer,
    ResumeSinglePlayer,
    QuitSinglePlayer,
    RequestLeaderboard { limit: u32, category: String },
    GetSinglePlayerStats { player_name: String },

    // Rooms
    CreateRoom { player_name: String, category: Category },
    JoinRoom { room_id: String, player_name: String },
    LeaveRoom { room_id: String },
    ChangeCategory { room_id: String, category: Category },
    StartGame { room_id: String },
    SubmitAnswer { answer: Option<String> },
    RequestNextQuestion { room_id: String },
    ChatMessage { message: String },
    UseLifeline { lifeline_type: Lifeline },

    // Head to head
    QueueHeadToHead { player_name: String },
    CancelQueue,
    CreatePrivateHeadToHead { player_name: String },
    JoinPrivateHeadToHead { room_code: String, player_name: String },
    HeadToHeadRematch { room_id: String },
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        session_id: String,
    },
    Error {
        message: String,
        #[serde(default)]
        details: Option<String>,
    },

    // Single player
    SinglePlayerStarted {
        total_questions: u32,
        #[serde(default)]
        message: Option<String>,
    },
    SinglePlayerQuestion(QuestionPayload),
    TimerUpdate {
        time_remaining: u32,
        #[serde(default)]
        question_number: Option<u32>,
    },
    AnswerResult {
        is_correct: bool,
        #[serde(default)]
        correct_answer: Option<String>,
        #[serde(default)]
        points_earned: i64,
        #[serde(default)]
        total_score: i64,
        #[serde(default)]
        time_taken: f64,
    },
    SinglePlayerGameOver {
        final_score: i64,
        #[serde(default)]
        questions_answered: u32,
        #[serde(default)]
        correct_answers: u32,
        #[serde(default)]
        accuracy: f64,
        #[serde(default)]
        game_duration: f64,
        #[serde(default)]
        leaderboard_position: Option<i64>,
        #[serde(default)]
        top_10_leaderboard: Vec<LeaderboardEntry>,
    },
    SinglePlayerError {
        message: String,
    },
    GamePaused {
        #[serde(default)]
        time_remaining: u32,
    },
    GameResumed {
        #[serde(default)]
        time_remaining: u32,
    },
    LeaderboardUpdate {
        leaderboard: Vec<LeaderboardEntry>,
        #[serde(default)]
        category: Option<String>,
    },
    SinglePlayerStatsUpdate(PlayerStats),

    // Rooms
    RoomCreated {
        room_id: String,
        player: PlayerInfo,
        #[serde(default)]
        is_host: bool,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        max_players: Option<u32>,
    },
    RoomUpdate {
        room_id: String,
        players: Vec<PlayerInfo>,
        #[serde(default)]
        host_id: Option<String>,
        #[serde(default)]
        game_state: RoomState,
    },
    JoinedRoom {
        room_id: String,
        player: PlayerInfo,
        #[serde(default)]
        is_host: bool,
        players: Vec<PlayerInfo>,
        #[serde(default)]
        host_id: Option<String>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        game_state: RoomState,
    },
    PlayerJoined {
        player: PlayerInfo,
        players: Vec<PlayerInfo>,
    },
    PlayerLeft {
        player_id: String,
        #[serde(default)]
        players: Vec<PlayerInfo>,
        #[serde(default)]
        new_host_id: Option<String>,
    },
    LeftRoom {
        room_id: String,
    },
    NewHost {
        host_id: String,
    },
    PlayerDisconnected {
        player_id: String,
        #[serde(default)]
        message: Option<String>,
    },
    GameStarted {
        total_questions: u32,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(alias = "head_to_head_question")]
    NewQuestion(QuestionPayload),
    AnswerSubmitted(AnswerAck),
    QuestionResults {
        correct_answer: String,
        #[serde(default)]
        player_results: Vec<PlayerResult>,
    },
    ScoresUpdate {
        scores: Vec<ScoreLine>,
        #[serde(default)]
        current_question: Option<u32>,
        #[serde(default)]
        total_questions: Option<u32>,
    },
    GameEnded {
        players: Vec<ScoreLine>,
        #[serde(default)]
        winners: Vec<ScoreLine>,
    },
    ChatMessage {
        sender: String,
        message: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
    CategoryUpdated {
        category: String,
    },
    FiftyFiftyResult {
        disabled_answers: Vec<String>,
    },

    // Head to head
    QueueStatus {
        status: String,
        #[serde(default)]
        position: Option<u32>,
    },
    QueueCancelled {},
    MatchFound {
        room_id: String,
        players: Vec<QueuedPlayer>,
    },
    PrivateRoomCreated {
        room_code: String,
        #[serde(default)]
        status: Option<String>,
    },
    ReadyToStart {},
    HeadToHeadStarted {
        total_questions: u32,
        #[serde(default)]
        players: Vec<PlayerInfo>,
    },
    HeadToHeadQuestionResults {
        correct_answer: String,
        #[serde(default)]
        question: Option<String>,
        #[serde(default)]
        players_comparison: Vec<PlayerResult>,
        #[serde(default)]
        score_difference: Option<i64>,
        #[serde(default)]
        leader: Option<String>,
        #[serde(default)]
        questions_remaining: Option<u32>,
    },
    HeadToHeadScores {
        #[serde(default)]
        player1: Option<HeadToHeadLine>,
        #[serde(default)]
        player2: Option<HeadToHeadLine>,
        #[serde(default)]
        score_difference: i64,
        #[serde(default)]
        leader: Option<String>,
        #[serde(default)]
        current_question: Option<u32>,
        #[serde(default)]
        total_questions: Option<u32>,
    },
    HeadToHeadEnded {
        #[serde(default)]
        winner: Option<PlayerInfo>,
        #[serde(default)]
        is_tie: bool,
        #[serde(default)]
        score_margin: i64,
        #[serde(default)]
        players_stats: Vec<HeadToHeadPlayerStats>,
    },
    RematchStarted {
        new_room_id: String,
        players: Vec<PlayerInfo>,
    },
}

impl ServerEvent {
    /// Every event name this client understands, aliases included.
    pub const NAMES: &'static [&'static str] = &[
        "connected",
        "error",
        "single_player_started",
        "single_player_question",
        "timer_update",
        "answer_result",
        "single_player_game_over",
        "single_player_error",
        "game_paused",
        "game_resumed",
        "leaderboard_update",
        "single_player_stats_update",
        "room_created",
        "room_update",
        "joined_room",
        "player_joined",
        "player_left",
        "left_room",
        "new_host",
        "player_disconnected",
        "game_started",
        "new_question",
        "head_to_head_question",
        "answer_submitted",
        "question_results",
        "scores_update",
        "game_ended",
        "chat_message",
        "category_updated",
        "fifty_fifty_result",
        "queue_status",
        "queue_cancelled",
        "match_found",
        "private_room_created",
        "ready_to_start",
        "head_to_head_started",
        "head_to_head_question_results",
        "head_to_head_scores",
        "head_to_head_ended",
        "rematch_started",
    ];

    pub fn is_known(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }
}
