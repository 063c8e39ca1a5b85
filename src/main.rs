use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use trivia_client::config::{self, ClientConfig};
use trivia_client::game::{self, GameUpdate};
use trivia_client::input::{self, Input};
use trivia_client::screen;
use trivia_client::session::SessionView;
use trivia_client::types::Category;

const CLEAR: &str = "\x1b[2J\x1b[H";

#[derive(Debug, Parser)]
#[command(name = "trivia", version, about = "Play football & NBA trivia from the terminal")]
struct Args {
    /// Server base URL, e.g. http://localhost:5000
    #[arg(short, long)]
    server: Option<String>,

    /// Player name (1-20 characters)
    #[arg(short, long)]
    name: Option<String>,

    /// Default category for new games
    #[arg(short, long)]
    category: Option<Category>,

    /// Directory holding client.json
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Don't clear the terminal between screens
    #[arg(long)]
    no_clear: bool,
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let dir = args.config.clone().unwrap_or_else(config::config_dir);
    config::init_in(&dir).context("failed to initialize config directory")?;
    let mut cfg = config::load_client_config(&dir)?;

    if let Some(server) = &args.server {
        cfg.server_url = server.clone();
    }
    if let Some(name) = &args.name {
        cfg.player_name = Some(name.clone());
    }
    if let Some(category) = args.category {
        cfg.category = category;
    }
    Ok(cfg)
}

fn draw(view: &SessionView, clear: bool) {
    match screen::render(view) {
        Ok(text) => {
            let mut out = std::io::stdout().lock();
            if clear {
                let _ = write!(out, "{CLEAR}");
            }
            let _ = writeln!(out, "{text}");
            let _ = write!(out, "> ");
            let _ = out.flush();
        }
        Err(err) => tracing::error!("Failed to render screen: {}", err),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = load_config(&args)?;
    let (handle, mut updates) =
        game::spawn(&cfg).with_context(|| format!("cannot connect to {}", cfg.server_url))?;
    tracing::info!("Connecting to {}", cfg.server_url);

    let clear = !args.no_clear;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_view = None;

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(GameUpdate::Changed(view)) => {
                    draw(&view, clear);
                    last_view = Some(view);
                }
                Ok(GameUpdate::Rejected { reason }) => {
                    print!("! {reason}\n> ");
                    let _ = std::io::stdout().flush();
                }
                Ok(GameUpdate::Connection(status)) => tracing::debug!("Connection {}", status),
                Ok(GameUpdate::Closed) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} screen updates", skipped);
                }
            },
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line.context("failed to read stdin")? else {
                    stdin_open = false;
                    handle.shutdown().await;
                    continue;
                };
                match input::parse(&line, cfg.category) {
                    Ok(Input::Action(action)) => {
                        if !handle.act(action).await {
                            break;
                        }
                    }
                    Ok(Input::Help) => {
                        print!("{}\n> ", screen::render_help()?);
                        let _ = std::io::stdout().flush();
                    }
                    Ok(Input::Exit) => handle.shutdown().await,
                    Ok(Input::Empty) => {
                        if let Some(view) = &last_view {
                            draw(view, clear);
                        }
                    }
                    Err(err) => {
                        print!("! {err}\n> ");
                        let _ = std::io::stdout().flush();
                    }
                }
            }
        }
    }

    println!();
    Ok(())
}
