use crate::error::InputError;
use crate::session::Action;
use crate::types::{Category, Lifeline};

/// A parsed terminal line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Action(Action),
    Help,
    Exit,
    Empty,
}

/// Parse one line typed by the player. A bare number answers the open
/// question; `solo` and `create` without a category use `default_category`.
pub fn parse(line: &str, default_category: Category) -> Result<Input, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let action = match command.to_lowercase().as_str() {
        "help" | "?" => return Ok(Input::Help),
        "exit" | "bye" => return Ok(Input::Exit),

        "name" => Action::SetName {
            name: required(rest, "name <your name>")?.to_string(),
        },
        "dismiss" | "ok" => Action::Dismiss,
        "menu" | "back" => Action::BackToMenu,

        "solo" | "single" => Action::StartSolo { category: category(rest, default_category)? },
        "pause" => Action::PauseSolo,
        "resume" => Action::ResumeSolo,
        "quit" => Action::QuitSolo,

        "create" | "host" => Action::CreateRoom { category: category(rest, default_category)? },
        "join" => Action::JoinRoom {
            code: required(rest, "join <room code>")?.to_string(),
        },
        "leave" => Action::LeaveRoom,
        "category" | "cat" => Action::ChangeCategory {
            category: required(rest, "category <name>")?.parse()?,
        },
        "start" => Action::StartGame,
        "next" | "skip" => Action::NextQuestion,

        "answer" | "a" => {
            let choice = required(rest, "answer <option number>")?
                .parse()
                .map_err(|_| InputError::Usage("answer <option number>"))?;
            Action::Answer { choice }
        }
        "5050" | "50:50" | "50/50" => Action::UseLifeline(Lifeline::FiftyFifty),
        "lifeline" | "ll" => Action::UseLifeline(lifeline(rest)?),
        "say" | "chat" => Action::Chat {
            text: required(rest, "say <message>")?.to_string(),
        },

        "queue" | "match" => Action::Queue,
        "cancel" => Action::CancelQueue,
        "private" => Action::CreatePrivateMatch,
        "h2h" => Action::JoinPrivateMatch {
            code: required(rest, "h2h <match code>")?.to_string(),
        },
        "rematch" => Action::Rematch,

        "top" | "leaderboard" => {
            let limit = if rest.is_empty() {
                None
            } else {
                Some(rest.parse().map_err(|_| InputError::Usage("top [count]"))?)
            };
            Action::Leaderboard { limit }
        }
        "stats" => Action::Stats,

        other => match other.parse::<usize>() {
            Ok(choice) => Action::Answer { choice },
            Err(_) => return Err(InputError::UnknownCommand(command.to_string())),
        },
    };
    Ok(Input::Action(action))
}

fn required<'a>(rest: &'a str, usage: &'static str) -> Result<&'a str, InputError> {
    if rest.is_empty() {
        Err(InputError::Usage(usage))
    } else {
        Ok(rest)
    }
}

fn category(rest: &str, default: Category) -> Result<Category, InputError> {
    if rest.is_empty() {
        Ok(default)
    } else {
        Ok(rest.parse()?)
    }
}

fn lifeline(rest: &str) -> Result<Lifeline, InputError> {
    let name = rest.to_lowercase().replace(['\'', '-', '_', ' '], "");
    match name.as_str() {
        "5050" | "50:50" | "50/50" | "fiftyfifty" => Ok(Lifeline::FiftyFifty),
        "90th" | "90thminute" | "ninetiethminute" => Ok(Lifeline::NinetiethMinute),
        "feelin" | "feelingood" => Ok(Lifeline::FeelinGood),
        _ => Err(InputError::Usage("lifeline <5050|90th|feelin>")),
    }
}
