use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionConfig, ConnectionEvent, ConnectionHandle};
use crate::error::ConnectionError;
use crate::session::{Action, Applied, ConnectionStatus, Phase, Session, SessionView};
use crate::wire::Inbound;

const UPDATE_CAPACITY: usize = 64;
const COMMAND_CAPACITY: usize = 32;
const CONNECTION_EVENTS_CAPACITY: usize = 256;

/// Commands the terminal sends to the game task.
#[derive(Debug, Clone)]
pub enum GameCommand {
    Act(Action),
    Shutdown,
}

/// Updates broadcast from the game task to whoever renders it.
#[derive(Debug, Clone)]
pub enum GameUpdate {
    /// The session changed; render this snapshot.
    Changed(Arc<SessionView>),
    /// A local action was refused and nothing was sent.
    Rejected { reason: String },
    Connection(ConnectionStatus),
    /// The task stopped.
    Closed,
}

#[derive(Debug, Clone)]
pub struct GameHandle {
    pub cmd_tx: mpsc::Sender<GameCommand>,
    pub update_tx: broadcast::Sender<GameUpdate>,
}

impl GameHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<GameUpdate> {
        self.update_tx.subscribe()
    }

    /// `false` once the game task is gone.
    pub async fn act(&self, action: Action) -> bool {
        self.cmd_tx.send(GameCommand::Act(action)).await.is_ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(GameCommand::Shutdown).await;
    }
}

/// Connect to the configured server and start the game task. The returned
/// receiver is subscribed before the first update is sent.
pub fn spawn(config: &ClientConfig) -> Result<(GameHandle, broadcast::Receiver<GameUpdate>), ConnectionError> {
    let connection_config = ConnectionConfig::from_client(config)?;
    let (events_tx, events_rx) = mpsc::channel(CONNECTION_EVENTS_CAPACITY);
    let connection = Connection::spawn(connection_config, events_tx);
    let session = Session::new(config.player_name.clone(), config.chat_history);

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (update_tx, update_rx) = broadcast::channel(UPDATE_CAPACITY);
    let handle = GameHandle {
        cmd_tx,
        update_tx: update_tx.clone(),
    };

    let task = GameTask {
        session,
        connection,
        request_timeout: config.request_timeout(),
        update_tx,
    };
    tokio::spawn(task.run(cmd_rx, events_rx));

    tracing::info!("Game task started for {}", config.server_url);
    Ok((handle, update_rx))
}

struct GameTask {
    session: Session,
    connection: ConnectionHandle,
    request_timeout: Duration,
    update_tx: broadcast::Sender<GameUpdate>,
}

impl GameTask {
    fn publish(&self) {
        let view = self.session.view(Instant::now());
        let _ = self.update_tx.send(GameUpdate::Changed(Arc::new(view)));
    }

    fn publish_connection(&self) {
        let _ = self
            .update_tx
            .send(GameUpdate::Connection(self.session.connection()));
        self.publish();
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<GameCommand>,
        mut events_rx: mpsc::Receiver<ConnectionEvent>,
    ) {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connection_open = true;

        self.publish();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(GameCommand::Act(action)) => self.handle_action(action).await,
                    Some(GameCommand::Shutdown) | None => {
                        let _ = self.connection.disconnect().await;
                        break;
                    }
                },
                event = events_rx.recv(), if connection_open => match event {
                    Some(event) => self.handle_connection_event(event),
                    None => {
                        tracing::warn!("Connection task ended");
                        connection_open = false;
                    }
                },
                _ = ticker.tick() => self.handle_tick(),
            }
        }

        let _ = self.update_tx.send(GameUpdate::Closed);
        tracing::info!("Game task ended");
    }

    async fn handle_action(&mut self, action: Action) {
        match self.session.act(action, Instant::now()) {
            Ok(Some(event)) => {
                if let Err(err) = self.connection.emit(event).await {
                    tracing::error!("Failed to emit: {}", err);
                    self.session.abandon_pending();
                    let reason = match err {
                        ConnectionError::Closed => "The connection is closed".to_string(),
                        other => format!("Could not send the request: {other}"),
                    };
                    let _ = self.update_tx.send(GameUpdate::Rejected { reason });
                }
                self.publish();
            }
            Ok(None) => self.publish(),
            Err(err) => {
                tracing::debug!("Rejected action: {}", err);
                let _ = self.update_tx.send(GameUpdate::Rejected {
                    reason: err.to_string(),
                });
            }
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { sid } => {
                self.session.on_connected(sid);
                self.publish_connection();
            }
            ConnectionEvent::Event(Inbound::Event(event)) => {
                match self.session.apply(event, Instant::now()) {
                    Applied::Changed => self.publish(),
                    Applied::Ignored(reason) => tracing::debug!("Ignored server event: {}", reason),
                }
            }
            ConnectionEvent::Event(Inbound::Unknown { name, .. }) => {
                tracing::debug!("Unhandled server event {}", name);
            }
            ConnectionEvent::Disconnected { reason } => {
                self.session.on_disconnected(&reason);
                self.publish_connection();
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                tracing::info!("Reconnecting, attempt {} in {:?}", attempt, delay);
                self.session.on_reconnecting(attempt);
                self.publish_connection();
            }
            ConnectionEvent::ReconnectFailed { attempts } => {
                tracing::warn!("Gave up reconnecting after {} attempts", attempts);
                self.session.on_reconnect_failed();
                self.publish_connection();
            }
            ConnectionEvent::ConnectError { message } => {
                self.session.on_connect_error(&message);
                self.publish();
            }
        }
    }

    fn handle_tick(&mut self) {
        let now = Instant::now();
        let locked = self.session.tick(now);
        let expired = self.session.expire_pending(now, self.request_timeout);
        // The countdown is shown in whole seconds, so an open question
        // re-renders on every tick.
        if locked || expired || self.session.phase() == Phase::QuestionActive {
            self.publish();
        }
    }
}
