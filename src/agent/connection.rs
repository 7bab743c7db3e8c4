use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use super::dispatcher::{Dispatch, Dispatcher};
use super::messages::{AgentMessage, Response};
use super::transport::{Session, Transport};
use super::types::{AgentSettings, ConnectionState};
use crate::config::Identity;
use crate::runner::CommandRunner;
use crate::telemetry::Telemetry;

const CLOSE_WAIT: Duration = Duration::from_secs(2);

/// Everything that can wake the connection loop
///
/// Transport events carry the epoch of the connect attempt that produced
/// them; anything from an older attempt is ignored.
#[derive(Debug)]
pub enum Event {
    Opened { epoch: u64, session: Session },
    Message { epoch: u64, text: String },
    Closed { epoch: u64 },
    Error { epoch: u64, reason: String },
    HeartbeatTick { epoch: u64 },
    ReconnectDue,
    CommandFinished(Response),
    Shutdown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("cliente_id is not configured")]
    MissingClientId,
}

/// Cloneable handle for talking to a running [`AgentConnection`]
#[derive(Debug, Clone)]
pub struct AgentHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl AgentHandle {
    pub fn shutdown(&self) {
        let _ = self.events.send(Event::Shutdown);
    }
}

/// Owns the connection lifecycle: state, session, heartbeat and reconnect timers
///
/// All mutation happens inside [`AgentConnection::handle_event`], driven one
/// event at a time by [`AgentConnection::run`]. Timers, the transport and
/// in-flight commands are separate tasks that only post events back.
pub struct AgentConnection {
    identity: Identity,
    settings: AgentSettings,
    state: ConnectionState,
    epoch: u64,
    session: Option<Session>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    transport: Arc<dyn Transport>,
    telemetry: Arc<dyn Telemetry>,
    dispatcher: Dispatcher,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl AgentConnection {
    pub fn new(
        identity: Identity,
        settings: AgentSettings,
        transport: Arc<dyn Transport>,
        telemetry: Arc<dyn Telemetry>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, AgentError> {
        if !identity.is_configured() {
            return Err(AgentError::MissingClientId);
        }

        let dispatcher = Dispatcher::new(
            identity.client_id.clone(),
            Arc::clone(&telemetry),
            runner,
            settings.exec_timeout,
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            identity,
            settings,
            state: ConnectionState::Disconnected,
            epoch: 0,
            session: None,
            heartbeat: None,
            reconnect: None,
            transport,
            telemetry,
            dispatcher,
            events_tx,
            events_rx,
        })
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            events: self.events_tx.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat.is_some()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    /// Connect and process events until shutdown
    pub async fn run(mut self) -> Result<()> {
        log::info!(
            "[Agent] Starting agent '{}' (server: {})",
            self.identity.client_id,
            self.identity.server_url
        );
        self.start();

        while let Some(event) = self.next_event().await {
            if let Event::Shutdown = event {
                self.shutdown().await;
                break;
            }
            self.handle_event(event);
        }

        Ok(())
    }

    /// First connect attempt
    pub fn start(&mut self) {
        self.connect();
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        self.events_rx.recv().await
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Opened { epoch, session } => self.on_opened(epoch, session),
            Event::Message { epoch, text } => self.on_message(epoch, &text),
            Event::Closed { epoch } => {
                if self.is_current(epoch) {
                    log::warn!("[Agent] Disconnected from server");
                }
                self.on_disconnect(epoch);
            }
            Event::Error { epoch, reason } => {
                if self.is_current(epoch) {
                    log::error!("[Agent] Connection error: {}", reason);
                }
                self.on_disconnect(epoch);
            }
            Event::HeartbeatTick { epoch } => self.on_heartbeat(epoch),
            Event::ReconnectDue => {
                self.reconnect = None;
                self.connect();
            }
            Event::CommandFinished(response) => {
                if !self.send_response(&response) {
                    log::debug!("[Agent] Not connected, dropping command result");
                }
            }
            Event::Shutdown => {
                self.cancel_heartbeat();
                self.cancel_reconnect();
                self.session = None;
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            log::info!("[Agent] State: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn connect(&mut self) {
        self.cancel_heartbeat();
        self.session = None;
        self.epoch += 1;
        self.set_state(ConnectionState::Connecting);

        log::info!("[Agent] Connecting to server: {}", self.identity.server_url);

        if let Err(e) = self
            .transport
            .open(&self.identity.server_url, self.epoch, self.events_tx.clone())
        {
            log::error!("[Agent] Failed to connect: {:#}", e);
            let epoch = self.epoch;
            self.on_disconnect(epoch);
        }
    }

    fn on_opened(&mut self, epoch: u64, session: Session) {
        if !self.is_current(epoch) || self.state != ConnectionState::Connecting {
            log::debug!("[Agent] Ignoring stale session from attempt {}", epoch);
            return;
        }

        self.session = Some(session);
        self.set_state(ConnectionState::Connected);
        log::info!("[Agent] Connected to server");

        let auth = AgentMessage::Auth {
            cliente_id: self.identity.client_id.clone(),
            info: self.telemetry.snapshot(),
        };
        if self.send_message(&auth) {
            log::info!("[Agent] Authentication sent");
        }

        self.start_heartbeat();
    }

    fn on_message(&mut self, epoch: u64, text: &str) {
        if !self.is_current(epoch) {
            return;
        }

        match self.dispatcher.dispatch(text) {
            Dispatch::Ignore => {}
            Dispatch::Reply(response) => {
                if !self.send_response(&response) {
                    log::debug!("[Agent] Not connected, dropping response");
                }
            }
            Dispatch::Deferred(pending) => {
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let response = pending.await;
                    let _ = events.send(Event::CommandFinished(response));
                });
            }
        }
    }

    fn on_disconnect(&mut self, epoch: u64) {
        if !self.is_current(epoch) {
            log::debug!("[Agent] Ignoring event from stale attempt {}", epoch);
            return;
        }

        self.cancel_heartbeat();
        self.session = None;
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            return;
        }

        let delay = self.settings.reconnect_delay;
        log::info!("[Agent] Reconnecting in {} seconds...", delay.as_secs());

        let events = self.events_tx.clone();
        self.reconnect = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(Event::ReconnectDue);
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            pending.abort();
        }
    }

    fn start_heartbeat(&mut self) {
        self.cancel_heartbeat();

        let period = self.settings.heartbeat_interval;
        let epoch = self.epoch;
        let events = self.events_tx.clone();

        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(Event::HeartbeatTick { epoch }).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    fn on_heartbeat(&mut self, epoch: u64) {
        if !self.is_current(epoch) || self.state != ConnectionState::Connected {
            return;
        }

        let status = AgentMessage::StatusUpdate {
            cliente_id: self.identity.client_id.clone(),
            info: self.telemetry.snapshot(),
        };
        if self.send_message(&status) {
            log::debug!("[Agent] Status update sent");
        }
    }

    fn open_session(&self) -> Option<&Session> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        self.session.as_ref().filter(|session| session.is_open())
    }

    fn send_json<T: serde::Serialize>(&self, value: &T) -> bool {
        let Some(session) = self.open_session() else {
            return false;
        };

        match serde_json::to_string(value) {
            Ok(json) => session.send_text(json),
            Err(e) => {
                log::error!("[Agent] Failed to serialize message: {}", e);
                false
            }
        }
    }

    fn send_message(&self, message: &AgentMessage) -> bool {
        self.send_json(message)
    }

    fn send_response(&self, response: &Response) -> bool {
        let sent = self.send_json(response);
        if sent {
            log::debug!("[Agent] Response sent (request_id: {:?})", response.request_id);
        }
        sent
    }

    async fn shutdown(&mut self) {
        log::info!("[Agent] Shutting down...");
        self.cancel_heartbeat();
        self.cancel_reconnect();

        if let Some(session) = self.session.take() {
            session.close(CLOSE_WAIT).await;
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for AgentConnection {
    fn drop(&mut self) {
        self.cancel_heartbeat();
        self.cancel_reconnect();
    }
}
