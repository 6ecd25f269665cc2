//! Connection state machine.
//!
//! [`ConnectionStateMachine`] is the only writer of the connection state and
//! of the persisted credential. It consumes lifecycle events in the order the
//! capability emitted them, runs each transition's side effects, and only
//! then publishes the new state. Everyone else reads through a
//! [`StateHandle`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pairlink_capability::EventReceiver;
use pairlink_core::config::PairingConfig;
use pairlink_core::{ConnectionState, Error, LifecycleEvent, PairingToken, SessionCredential};

use crate::pairing::{render_artifact, Artifact, ArtifactFormat, PairingBroker};
use crate::store::{write_atomic, SessionStore};

/// Apply the transition table.
///
/// Returns the state reached from `from` on `event`, or `None` when the
/// event is ignored in that state.
pub fn transition(from: ConnectionState, event: &LifecycleEvent) -> Option<ConnectionState> {
    use ConnectionState::*;

    match event {
        LifecycleEvent::PairingTokenIssued(_) => match from {
            Initializing | AwaitingPairing | Disconnected | AuthFailed => Some(AwaitingPairing),
            AuthenticatedNotReady | Connected => None,
        },
        LifecycleEvent::Authenticated(_) => Some(AuthenticatedNotReady),
        LifecycleEvent::Ready(_) => Some(Connected),
        LifecycleEvent::Disconnected { .. } => match from {
            AuthFailed => None,
            _ => Some(Disconnected),
        },
        LifecycleEvent::AuthFailed { .. } => Some(AuthFailed),
    }
}

/// Where newly issued pairing codes are shown besides `/pairing-image`.
#[derive(Debug, Clone, Default)]
pub struct PairingOutput {
    /// Draw the code in the log
    pub terminal: bool,
    /// Write the code as a PNG file
    pub image_path: Option<PathBuf>,
}

impl PairingOutput {
    pub fn from_config(config: &PairingConfig) -> Self {
        Self {
            terminal: config.terminal,
            image_path: config.write_image.then(|| config.image_path.clone()),
        }
    }
}

enum Command {
    Logout { ack: oneshot::Sender<ConnectionState> },
    Sync { ack: oneshot::Sender<ConnectionState> },
}

/// Read access to the connection state, plus the inputs the machine
/// accepts besides lifecycle events.
#[derive(Debug, Clone)]
pub struct StateHandle {
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::UnboundedSender<Command>,
}

impl StateHandle {
    /// The state as last published.
    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the published state equals `target`.
    pub async fn wait_for(&self, target: ConnectionState) -> Result<ConnectionState, Error> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| *state == target)
            .await
            .map_err(|_| Error::Internal("state machine stopped".to_string()))?;
        Ok(*state)
    }

    /// Tell the machine the account was logged out and wait until it has
    /// acted on it. Returns the resulting state.
    pub async fn request_logout(&self) -> Result<ConnectionState, Error> {
        self.round_trip(|ack| Command::Logout { ack }).await
    }

    /// Wait until every event queued so far has been applied. Returns the
    /// resulting state.
    pub async fn settle(&self) -> Result<ConnectionState, Error> {
        self.round_trip(|ack| Command::Sync { ack }).await
    }

    async fn round_trip(
        &self,
        command: impl FnOnce(oneshot::Sender<ConnectionState>) -> Command,
    ) -> Result<ConnectionState, Error> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(command(ack))
            .map_err(|_| Error::Internal("state machine stopped".to_string()))?;
        done.await
            .map_err(|_| Error::Internal("state machine dropped the request".to_string()))
    }
}

/// Sole owner of the connection state and the held credential.
pub struct ConnectionStateMachine {
    state: watch::Sender<ConnectionState>,
    held: Option<SessionCredential>,
    store: Arc<dyn SessionStore>,
    broker: Arc<PairingBroker>,
    output: PairingOutput,
    events: EventReceiver,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ConnectionStateMachine {
    /// Create a machine in `initializing`, fed by `events`.
    pub fn new(
        store: Arc<dyn SessionStore>,
        broker: Arc<PairingBroker>,
        output: PairingOutput,
        events: EventReceiver,
    ) -> (Self, StateHandle) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Initializing);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let machine = Self {
            state: state_tx,
            held: None,
            store,
            broker,
            output,
            events,
            commands: command_rx,
        };
        let handle = StateHandle {
            state: state_rx,
            commands: command_tx,
        };
        (machine, handle)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Credential received from the capability and not yet forgotten.
    pub fn held_credential(&self) -> Option<&SessionCredential> {
        self.held.as_ref()
    }

    /// Apply one lifecycle event and return the resulting state.
    pub async fn apply(&mut self, event: LifecycleEvent) -> ConnectionState {
        let from = self.state();
        let Some(to) = transition(from, &event) else {
            info!(state = %from, event = event.name(), "Ignoring lifecycle event");
            return from;
        };

        match event {
            LifecycleEvent::PairingTokenIssued(token) => {
                self.broker.set(token.clone());
                self.show_pairing_code(&token);
            }
            LifecycleEvent::Authenticated(credential) | LifecycleEvent::Ready(credential) => {
                self.held = Some(credential);
                self.persist_held().await;
            }
            LifecycleEvent::Disconnected { reason } => {
                info!(reason = %reason, "Messaging capability disconnected");
                self.persist_held().await;
            }
            LifecycleEvent::AuthFailed { reason } => {
                warn!(reason = %reason, "Authentication failed, forgetting session");
                self.held = None;
                self.forget_persisted().await;
                self.broker.clear();
            }
        }

        self.publish(from, to);
        to
    }

    /// React to an explicit logout.
    ///
    /// The held credential is dropped so later events cannot re-save it.
    /// The persisted record is kept; the capability reports `auth_failed`
    /// for it on the next start, which removes it.
    /// The state only moves to `disconnected` if the account still looked
    /// logged in; lifecycle events from the same logout may already have
    /// moved it on.
    pub async fn logged_out(&mut self) -> ConnectionState {
        self.held = None;

        let from = self.state();
        match from {
            ConnectionState::Connected | ConnectionState::AuthenticatedNotReady => {
                self.broker.clear();
                self.publish(from, ConnectionState::Disconnected);
                ConnectionState::Disconnected
            }
            _ => from,
        }
    }

    /// Process events and commands until both inputs are closed.
    ///
    /// Queued events are always drained before a command is handled.
    pub async fn run(mut self) {
        let mut events_open = true;
        let mut commands_open = true;

        while events_open || commands_open {
            tokio::select! {
                biased;

                event = self.events.recv(), if events_open => match event {
                    Some(event) => {
                        debug!(event = event.name(), "Lifecycle event received");
                        self.apply(event).await;
                    }
                    None => {
                        debug!("Lifecycle event channel closed");
                        events_open = false;
                    }
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(Command::Logout { ack }) => {
                        let state = self.logged_out().await;
                        let _ = ack.send(state);
                    }
                    Some(Command::Sync { ack }) => {
                        let _ = ack.send(self.state());
                    }
                    None => commands_open = false,
                },
            }
        }

        debug!(state = %self.state(), "Connection state machine stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn publish(&self, from: ConnectionState, to: ConnectionState) {
        if from != to {
            info!(from = %from, to = %to, "Connection state changed");
        }
        self.state.send_replace(to);
    }

    async fn persist_held(&self) {
        let Some(credential) = &self.held else {
            return;
        };
        if let Err(e) = self.store.save(credential).await {
            warn!(error = %e, "Failed to persist session credential");
        }
    }

    async fn forget_persisted(&self) {
        if let Err(e) = self.store.delete().await {
            error!(error = %e, "Failed to delete persisted session credential");
        }
    }

    fn show_pairing_code(&self, token: &PairingToken) {
        let size = self.broker.image_size();

        if self.output.terminal {
            match render_artifact(token, ArtifactFormat::Terminal, size) {
                Ok(Artifact::Terminal(text)) => {
                    info!("New pairing code issued, scan it to pair");
                    eprintln!("{}", text);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to draw pairing code"),
            }
        }

        if let Some(path) = &self.output.image_path {
            match render_artifact(token, ArtifactFormat::Png, size) {
                Ok(Artifact::Png(bytes)) => match write_atomic(path, &bytes) {
                    Ok(()) => info!(path = %path.display(), "Pairing code written"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to write pairing code"),
                },
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to render pairing code"),
            }
        }
    }
}

/// Load the credential to hand to the capability on startup.
///
/// Anything other than a readable record means "start unpaired".
pub async fn load_restore_hint(store: &dyn SessionStore) -> Option<SessionCredential> {
    match store.load().await {
        Ok(Some(credential)) => {
            info!(bytes = credential.len(), "Restoring persisted session");
            Some(credential)
        }
        Ok(None) => {
            info!("No persisted session, pairing required");
            None
        }
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable persisted session");
            None
        }
    }
}
