//! Connection attempts and their lifecycle.
//!
//! Each call to [`ConnectionManager::connect`] opens one transport, sends
//! CONNECT and spawns a driver task that owns the attempt's timers and event
//! stream. Everything that can end an attempt (API close, watchdog, transport
//! close or error, failed write, rejected CONNACK) goes through
//! [`force_close`], which runs its teardown at most once per attempt.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::events::Notice;
use crate::keep_alive::{KeepAlive, Tick};
use crate::packet::{
    reason_code, reason_name, ConnAck, Connect, PubAck, QoS, Subscribe, PROTOCOL_VERSION,
};
use crate::pending::{Ack, RequestKey};
use crate::session::{Inner, SessionState};
use crate::transport::{Connection, ConnectionEvent, EventStream};

/// Connection state as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never opened.
    #[default]
    Idle,
    /// Transport opened, CONNECT sent, waiting for CONNACK.
    Connecting,
    /// CONNACK accepted.
    Connected,
    /// Last attempt ended.
    Closed,
}

/// Why an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Application called `close`.
    Logout,
    /// Application opened a new attempt over a live one.
    Replaced,
    /// CONNACK carried a non-zero reason code.
    LoginRejected(u8),
    /// Watchdog expired.
    Timeout,
    /// Peer closed the transport.
    ServerClosed,
    /// Transport error or failed write.
    Transport(String),
}

impl CloseReason {
    /// Whether the login supervisor should try to bring the session back.
    pub fn restarts(&self) -> bool {
        !matches!(self, CloseReason::Logout | CloseReason::Replaced)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Logout => write!(f, "logout"),
            CloseReason::Replaced => write!(f, "replaced"),
            CloseReason::LoginRejected(code) => write!(f, "login rejected: {}", reason_name(*code)),
            CloseReason::Timeout => write!(f, "connection timeout"),
            CloseReason::ServerClosed => write!(f, "server closed"),
            CloseReason::Transport(e) => write!(f, "{}", e),
        }
    }
}

/// The live transport of the current attempt.
pub(crate) struct Link {
    pub(crate) attempt: u64,
    pub(crate) connection: Box<dyn Connection>,
    driver: Option<JoinHandle<()>>,
}

/// What the driver does after handling an event or timer.
enum Flow {
    Continue,
    Close(CloseReason),
    /// Attempt already torn down elsewhere.
    Exit,
}

enum Step {
    Event(ConnectionEvent),
    Tick(Tick),
}

/// Driver of one connection attempt.
pub(crate) struct ConnectionManager {
    inner: Arc<Inner>,
    attempt: u64,
    events: EventStream,
    keep_alive: KeepAlive,
}

impl ConnectionManager {
    /// Start a new attempt with `credential`, replacing any live one.
    pub(crate) fn connect(inner: &Arc<Inner>, credential: String) {
        force_close(inner, None, CloseReason::Replaced);

        let opened = inner.connector.open(&inner.endpoint);

        let mut guard = inner.state.lock();
        let state = &mut *guard;
        state.next_attempt += 1;
        let attempt = state.next_attempt;

        let (mut connection, events) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                log::warn!("Unable to open {}: {}", inner.endpoint, e);
                state.status = ConnectionState::Closed;
                inner.schedule_restart(state);
                inner.notify(guard, vec![Notice::Connect(false)]);
                return;
            }
        };

        log::info!("Connecting to {} as {}", inner.endpoint, inner.client_id);
        let sent = connection.connect(Connect {
            protocol_version: PROTOCOL_VERSION,
            client_id: inner.client_id.clone(),
            clean_start: false,
            keep_alive: inner.config.keep_alive_secs,
            username: Some(inner.config.username.clone()),
            password: Some(Bytes::from(credential)),
        });

        state.status = ConnectionState::Connecting;
        state.link = Some(Link {
            attempt,
            connection,
            driver: None,
        });

        if let Err(e) = sent {
            drop(guard);
            force_close(inner, Some(attempt), CloseReason::Transport(e.to_string()));
            return;
        }

        // Spawned under the lock so the handle is stored before the driver runs.
        let manager = ConnectionManager {
            inner: inner.clone(),
            attempt,
            events,
            keep_alive: KeepAlive::new(inner.config.connect_timeout()),
        };
        let driver = tokio::spawn(manager.run());
        if let Some(link) = state.link.as_mut() {
            link.driver = Some(driver);
        }
    }

    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                event = self.events.recv() => Step::Event(event.unwrap_or(ConnectionEvent::Closed)),
                tick = self.keep_alive.expired() => Step::Tick(tick),
            };

            let flow = match step {
                Step::Event(event) => self.handle_event(event),
                Step::Tick(tick) => self.handle_tick(tick),
            };

            match flow {
                Flow::Continue => {}
                Flow::Close(reason) => {
                    self.keep_alive.stop();
                    force_close(&self.inner, Some(self.attempt), reason);
                    return;
                }
                Flow::Exit => {
                    self.keep_alive.stop();
                    return;
                }
            }
        }
    }

    fn handle_event(&mut self, event: ConnectionEvent) -> Flow {
        let inner = self.inner.clone();
        let mut guard = inner.state.lock();
        let state = &mut *guard;
        if !state.link.as_ref().is_some_and(|l| l.attempt == self.attempt) {
            return Flow::Exit;
        }

        if state.status == ConnectionState::Connected {
            self.keep_alive.rearm(inner.config.idle_timeout());
        }

        let mut notices = Vec::new();
        let flow = match event {
            ConnectionEvent::ConnAck(connack) => self.on_connack(state, connack, &mut notices),
            ConnectionEvent::Publish(publish) => {
                let mut flow = Flow::Continue;
                if let (QoS::AtLeastOnce | QoS::ExactlyOnce, Some(packet_id)) =
                    (publish.qos, publish.packet_id)
                {
                    flow = write_flow(with_link(state, |c| c.puback(PubAck::success(packet_id))));
                }
                notices.push(Notice::Publish(publish));
                flow
            }
            ConnectionEvent::PubAck(puback) => {
                let key = RequestKey::puback(puback.packet_id);
                state.pending.resolve(key, Ack::PubAck(puback));
                Flow::Continue
            }
            ConnectionEvent::SubAck(suback) => {
                let granted = state
                    .subscriptions
                    .mark_acknowledged(suback.packet_id, &suback.reason_codes);
                let key = RequestKey::suback(suback.packet_id);
                state.pending.resolve(
                    key,
                    Ack::SubAck {
                        packet: suback,
                        granted,
                    },
                );
                Flow::Continue
            }
            ConnectionEvent::UnsubAck(unsuback) => {
                let key = RequestKey::unsuback(unsuback.packet_id);
                state.pending.resolve(key, Ack::UnsubAck(unsuback));
                Flow::Continue
            }
            ConnectionEvent::PingResp => {
                self.keep_alive.pong(inner.config.ping_interval());
                Flow::Continue
            }
            ConnectionEvent::Closed => Flow::Close(CloseReason::ServerClosed),
            ConnectionEvent::Error(e) => {
                log::warn!("MQTT connection error: {}", e);
                Flow::Close(CloseReason::Transport(e))
            }
        };

        inner.notify(guard, notices);
        flow
    }

    fn on_connack(
        &mut self,
        state: &mut SessionState,
        connack: ConnAck,
        notices: &mut Vec<Notice>,
    ) -> Flow {
        if connack.reason_code != reason_code::SUCCESS {
            return Flow::Close(CloseReason::LoginRejected(connack.reason_code));
        }

        state.status = ConnectionState::Connected;
        self.keep_alive.rearm(self.inner.config.idle_timeout());
        self.keep_alive.schedule_ping(self.inner.config.first_ping_delay());

        if connack.session_present {
            log::debug!("Session resumed, keeping {} subscriptions", state.subscriptions.len());
        } else if let Some((packet_id, topics)) = state.subscriptions.replay_all(&mut state.ids) {
            log::debug!("Resubscribing {} topics", topics.len());
            let packet = Subscribe {
                packet_id,
                topics: topics.into_iter().map(|t| (t, QoS::AtLeastOnce)).collect(),
            };
            if let Err(e) = with_link(state, |c| c.subscribe(packet)) {
                return Flow::Close(CloseReason::Transport(e.to_string()));
            }
        }

        log::info!("MQTT connected (session present: {})", connack.session_present);
        notices.push(Notice::Connect(true));
        Flow::Continue
    }

    fn handle_tick(&mut self, tick: Tick) -> Flow {
        match tick {
            Tick::Watchdog => Flow::Close(CloseReason::Timeout),
            Tick::Ping => {
                let mut guard = self.inner.state.lock();
                if !guard.link.as_ref().is_some_and(|l| l.attempt == self.attempt) {
                    return Flow::Exit;
                }
                log::debug!("Sending PINGREQ");
                self.keep_alive.ping_sent();
                write_flow(with_link(&mut guard, |c| c.pingreq()))
            }
        }
    }
}

/// Run a write against the live connection.
fn with_link<F>(state: &mut SessionState, write: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Connection) -> io::Result<()>,
{
    match state.link.as_mut() {
        Some(link) => write(link.connection.as_mut()),
        None => Err(io::Error::new(io::ErrorKind::NotConnected, "no transport")),
    }
}

fn write_flow(result: io::Result<()>) -> Flow {
    match result {
        Ok(()) => Flow::Continue,
        Err(e) => Flow::Close(CloseReason::Transport(e.to_string())),
    }
}

/// Tear down the live attempt (or only `attempt`, when given).
///
/// Cancels timers, destroys the transport, resolves every pending request as
/// closed and reports `connect(false)`. A second call for the same attempt
/// finds no link and does nothing.
pub(crate) fn force_close(inner: &Arc<Inner>, attempt: Option<u64>, reason: CloseReason) {
    let mut guard = inner.state.lock();
    let state = &mut *guard;

    let live = match (&state.link, attempt) {
        (Some(link), Some(attempt)) => link.attempt == attempt,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if !live {
        return;
    }
    let Some(mut link) = state.link.take() else {
        return;
    };

    if let Some(driver) = link.driver.take() {
        driver.abort();
    }
    link.connection.destroy();
    let cancelled = state.pending.cancel_all();
    state.status = ConnectionState::Closed;
    log::info!("MQTT closed: {} ({} pending requests cancelled)", reason, cancelled);

    if reason.restarts() {
        inner.schedule_restart(state);
    }
    inner.notify(guard, vec![Notice::Connect(false)]);
}
