use askama::Template;

use crate::session::{Outcome, Phase, SessionView};
use crate::types::{Category, GameMode, LeaderboardEntry, PlayerStats};

/// Parts shared by every screen: header line, notice and chat.
struct Frame {
    connection: String,
    player: String,
    mode: String,
    show_score: bool,
    score: i64,
    notice: String,
    notice_is_error: bool,
    pending: String,
    chat: Vec<String>,
}

impl Frame {
    fn new(v: &SessionView) -> Self {
        let (notice, notice_is_error) = match &v.notice {
            Some(n) => (n.text.clone(), n.is_error),
            None => (String::new(), false),
        };
        let in_game = matches!(
            v.phase,
            Phase::QuestionActive | Phase::AnswerReveal | Phase::Paused | Phase::GameOver
        );
        Self {
            connection: v.connection.to_string(),
            player: v.player_name.clone().unwrap_or_else(|| "(no name)".to_string()),
            mode: v.mode.map(|m| m.to_string()).unwrap_or_default(),
            show_score: in_game,
            score: v.score,
            notice,
            notice_is_error,
            pending: v
                .pending
                .map(|kind| format!("Waiting for the server to {kind}..."))
                .unwrap_or_default(),
            chat: v
                .chat
                .iter()
                .map(|line| format!("<{}> {}", line.sender, line.message))
                .collect(),
        }
    }
}

#[derive(Template)]
#[template(path = "setup.txt")]
struct SetupScreen {
    frame: Frame,
    has_name: bool,
    categories: String,
    leaderboard: Vec<String>,
    stats: Vec<String>,
}

#[derive(Template)]
#[template(path = "queued.txt")]
struct QueuedScreen {
    frame: Frame,
    position: String,
}

#[derive(Template)]
#[template(path = "lobby.txt")]
struct LobbyScreen {
    frame: Frame,
    room_id: String,
    category: String,
    capacity: String,
    players: Vec<String>,
    is_host: bool,
    head_to_head: bool,
    opponent: String,
    ready: bool,
}

#[derive(Template)]
#[template(path = "question.txt")]
struct QuestionScreen {
    frame: Frame,
    number: u32,
    total: u32,
    category: String,
    text: String,
    options: Vec<String>,
    time_left: u32,
    locked: bool,
    answered: bool,
    feedback: String,
    lifelines: String,
    solo: bool,
    is_host: bool,
}

#[derive(Template)]
#[template(path = "reveal.txt")]
struct RevealScreen {
    frame: Frame,
    question: String,
    correct_answer: String,
    verdict: String,
    results: Vec<String>,
    scores: Vec<String>,
    standing: String,
    remaining: String,
    is_host: bool,
}

#[derive(Template)]
#[template(path = "paused.txt")]
struct PausedScreen {
    frame: Frame,
    number: u32,
    total: u32,
    time_left: u32,
}

#[derive(Template)]
#[template(path = "game_over.txt")]
struct GameOverScreen {
    frame: Frame,
    headline: String,
    summary: Vec<String>,
    standings: Vec<String>,
    leaderboard: Vec<String>,
    can_rematch: bool,
    in_room: bool,
}

#[derive(Template)]
#[template(path = "help.txt")]
struct HelpScreen;

/// Render the screen for the current phase.
pub fn render(v: &SessionView) -> Result<String, askama::Error> {
    let frame = Frame::new(v);
    match v.phase {
        Phase::Setup => SetupScreen {
            frame,
            has_name: v.player_name.is_some(),
            categories: Category::ALL
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            leaderboard: leaderboard_rows(&v.leaderboard),
            stats: v.stats.as_ref().map(stats_rows).unwrap_or_default(),
        }
        .render(),
        Phase::Queued => QueuedScreen {
            frame,
            position: v
                .queue_position
                .map(|p| format!("Position in queue: {p}"))
                .unwrap_or_default(),
        }
        .render(),
        Phase::Lobby => lobby(frame, v).render(),
        Phase::QuestionActive => question(frame, v).render(),
        Phase::AnswerReveal => reveal(frame, v).render(),
        Phase::Paused => {
            let (number, total, time_left) = v
                .question
                .as_ref()
                .map_or((0, 0, 0), |q| (q.number, q.total, q.time_remaining));
            PausedScreen { frame, number, total, time_left }.render()
        }
        Phase::GameOver => game_over(frame, v).render(),
    }
}

pub fn render_help() -> Result<String, askama::Error> {
    HelpScreen.render()
}

fn lobby(frame: Frame, v: &SessionView) -> LobbyScreen {
    let room = v.room.as_ref();
    let host = room.and_then(|r| r.host_id.as_deref());
    let players = room
        .map(|r| {
            r.players
                .iter()
                .map(|p| {
                    let mut row = p.name.clone();
                    if Some(p.session_id.as_str()) == host {
                        row.push_str(" (host)");
                    }
                    if !p.connected {
                        row.push_str(" (away)");
                    }
                    row
                })
                .collect()
        })
        .unwrap_or_default();

    LobbyScreen {
        frame,
        room_id: room.map(|r| r.id.clone()).unwrap_or_default(),
        category: room
            .and_then(|r| r.category.as_deref())
            .map(category_label)
            .unwrap_or_else(|| Category::All.label().to_string()),
        capacity: match (room, room.and_then(|r| r.max_players)) {
            (Some(r), Some(max)) => format!("{}/{}", r.players.len(), max),
            (Some(r), None) => r.players.len().to_string(),
            _ => String::new(),
        },
        players,
        is_host: v.is_host,
        head_to_head: v.mode == Some(GameMode::HeadToHead),
        opponent: v
            .head_to_head
            .as_ref()
            .and_then(|h| h.opponent.clone())
            .unwrap_or_default(),
        ready: room.is_some_and(|r| r.ready),
    }
}

fn question(frame: Frame, v: &SessionView) -> QuestionScreen {
    let Some(q) = v.question.as_ref() else {
        return QuestionScreen {
            frame,
            number: 0,
            total: 0,
            category: String::new(),
            text: String::new(),
            options: Vec::new(),
            time_left: 0,
            locked: true,
            answered: false,
            feedback: String::new(),
            lifelines: String::new(),
            solo: false,
            is_host: false,
        };
    };

    let options = q
        .options
        .iter()
        .map(|o| {
            let marker = if o.chosen { ">" } else { " " };
            if o.eliminated {
                format!("{marker} [{}] ----", o.index)
            } else {
                format!("{marker} [{}] {}", o.index, o.text)
            }
        })
        .collect();

    let feedback = match &q.feedback {
        Some(f) if f.correct && f.first => format!("Correct and first! +{}", f.points),
        Some(f) if f.correct => format!("Correct! +{}", f.points),
        Some(_) => "Wrong answer.".to_string(),
        None if q.answered => "Answer sent, waiting for the others...".to_string(),
        None => String::new(),
    };

    QuestionScreen {
        frame,
        number: q.number,
        total: q.total,
        category: q.category.clone().unwrap_or_default(),
        text: q.text.clone(),
        options,
        time_left: q.time_remaining,
        locked: q.locked,
        answered: q.answered,
        feedback,
        lifelines: v
            .lifelines_left
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        solo: v.mode == Some(GameMode::SinglePlayer),
        is_host: v.is_host,
    }
}

fn reveal(frame: Frame, v: &SessionView) -> RevealScreen {
    let Some(r) = v.reveal.as_ref() else {
        return RevealScreen {
            frame,
            question: String::new(),
            correct_answer: String::new(),
            verdict: String::new(),
            results: Vec::new(),
            scores: Vec::new(),
            standing: String::new(),
            remaining: String::new(),
            is_host: v.is_host,
        };
    };

    let verdict = match (&r.my_answer, r.correct, r.points) {
        (None, _, _) => "You did not answer.".to_string(),
        (Some(_), true, Some(points)) => format!("You got it! +{points}"),
        (Some(_), true, None) => "You got it!".to_string(),
        (Some(answer), false, _) => format!("You answered {answer}."),
    };

    let results = r
        .results
        .iter()
        .map(|p| {
            let mark = if p.is_correct { "+" } else { "-" };
            let answer = p.answer.as_deref().unwrap_or("no answer");
            let first = if p.answered_first { " (first)" } else { "" };
            format!("{mark} {:<20} {:<24} {:>6}{first}", p.name, answer, p.score)
        })
        .collect();

    let standing = match (&v.head_to_head, &r.leader) {
        (Some(h), Some(leader)) => {
            let diff = r.score_difference.unwrap_or(h.score_difference);
            let streak = if h.streak > 1 { format!(", your streak {}", h.streak) } else { String::new() };
            format!("{leader} leads by {diff}{streak}")
        }
        (Some(_), None) => "Scores are level".to_string(),
        _ => String::new(),
    };

    RevealScreen {
        frame,
        question: r.question.clone().unwrap_or_default(),
        correct_answer: r.correct_answer.clone(),
        verdict,
        results,
        scores: v
            .scores
            .iter()
            .map(|s| format!("{:<20} {:>6}", s.name, s.score))
            .collect(),
        standing,
        remaining: match r.questions_remaining {
            Some(0) => "That was the last question.".to_string(),
            Some(1) => "1 question to go.".to_string(),
            Some(n) => format!("{n} questions to go."),
            None => String::new(),
        },
        is_host: v.is_host,
    }
}

fn game_over(frame: Frame, v: &SessionView) -> GameOverScreen {
    let mut screen = GameOverScreen {
        frame,
        headline: "Game over".to_string(),
        summary: Vec::new(),
        standings: Vec::new(),
        leaderboard: leaderboard_rows(&v.leaderboard),
        can_rematch: v.mode == Some(GameMode::HeadToHead) && v.room.is_some(),
        in_room: v.room.is_some(),
    };

    match &v.outcome {
        Some(Outcome::Solo {
            final_score,
            questions_answered,
            correct_answers,
            accuracy,
            game_duration,
            position,
        }) => {
            screen.headline = format!("Final score: {final_score}");
            screen.summary.push(format!(
                "{correct_answers}/{questions_answered} correct ({accuracy:.1}%) in {game_duration:.1}s"
            ));
            if let Some(position) = position {
                screen.summary.push(format!("Leaderboard position: #{position}"));
            }
        }
        Some(Outcome::Room { standings, winners, head_to_head }) => {
            if let Some(h2h) = head_to_head {
                screen.headline = match (&h2h.winner, h2h.is_tie) {
                    (_, true) => "It's a tie!".to_string(),
                    (Some(winner), false) if v.player_name.as_deref() == Some(winner.as_str()) => {
                        format!("You win by {}!", h2h.margin)
                    }
                    (Some(winner), false) => format!("{winner} wins by {}", h2h.margin),
                    (None, false) => "Match over".to_string(),
                };
                for s in &h2h.stats {
                    screen.summary.push(format!(
                        "{:<20} first {:>2}  best streak {:>2}  avg {:.1}s  accuracy {:.0}%",
                        s.player.name, s.first_answers, s.max_streak, s.avg_response_time, s.accuracy
                    ));
                }
            } else if !winners.is_empty() {
                let names: Vec<&str> = winners.iter().map(|w| w.name.as_str()).collect();
                screen.headline = format!("Winner: {}", names.join(", "));
            }
            screen.standings = standings
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{:>2}. {:<20} {:>6}", i + 1, s.name, s.score))
                .collect();
        }
        None => {}
    }
    screen
}

fn leaderboard_rows(entries: &[LeaderboardEntry]) -> Vec<String> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{:>2}. {:<20} {:>6}", i + 1, e.player_name, e.score))
        .collect()
}

fn stats_rows(stats: &PlayerStats) -> Vec<String> {
    if let Some(message) = &stats.message {
        return vec![message.clone()];
    }
    let mut rows = Vec::new();
    if let Some(n) = stats.total_games_played {
        rows.push(format!("Games played: {n}"));
    }
    if let Some(n) = stats.highest_score {
        rows.push(format!("Best score: {n}"));
    }
    if let Some(n) = stats.total_score {
        rows.push(format!("Total score: {n}"));
    }
    if let (Some(correct), Some(answered)) = (stats.total_correct_answers, stats.total_questions_answered) {
        rows.push(format!("Correct answers: {correct}/{answered}"));
    }
    if let Some(acc) = stats.average_accuracy {
        rows.push(format!("Average accuracy: {acc:.1}%"));
    }
    rows
}

fn category_label(raw: &str) -> String {
    raw.parse::<Category>()
        .map(|c| c.label().to_string())
        .unwrap_or_else(|_| raw.to_string())
}
