//! Public session API.
//!
//! A [`Session`] is a cheap, cloneable handle over shared state. Requests
//! (publish, subscribe, unsubscribe) register a waiter under the state lock,
//! write their packet, release the lock, and only then await the broker's
//! acknowledgement or the close of the connection.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::connection::{force_close, CloseReason, ConnectionManager, ConnectionState, Link};
use crate::error::Result;
use crate::events::{Listener, Listeners, Notice};
use crate::login::{LoginError, LoginProvider, RetryBackoff};
use crate::packet::{reason_code, PubAck, Publish, QoS, SubAck, Subscribe, UnsubAck, Unsubscribe};
use crate::packet_id::MessageIdAllocator;
use crate::pending::{Ack, PendingRequests, RequestKey, Resolution};
use crate::subscriptions::{Subscription, SubscriptionRegistry};
use crate::transport::Connector;

const NO_NETWORK: &str = "No network";
const CONNECTION_CLOSED: &str = "Connection closed";

/// Outcome of [`Session::publish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishResult {
    /// A PUBACK arrived. Check `reason_code` for rejections.
    pub sent: bool,
    pub reason_code: Option<u8>,
    pub reason: Option<String>,
    /// User properties carried by the PUBACK.
    pub data: Option<Vec<(String, String)>>,
    /// Value of the PUBACK's `error` user property, or a local failure.
    pub error: Option<String>,
}

impl PublishResult {
    fn no_network() -> Self {
        Self {
            sent: false,
            reason_code: Some(reason_code::SERVER_UNAVAILABLE),
            reason: Some(NO_NETWORK.to_string()),
            data: None,
            error: Some(NO_NETWORK.to_string()),
        }
    }

    fn closed() -> Self {
        Self {
            sent: false,
            reason: Some(CONNECTION_CLOSED.to_string()),
            error: Some(CONNECTION_CLOSED.to_string()),
            ..Default::default()
        }
    }

    fn from_puback(puback: PubAck) -> Self {
        let error = puback.user_property("error").map(str::to_string);
        let data = (!puback.user_properties.is_empty()).then_some(puback.user_properties);
        Self {
            sent: true,
            reason_code: Some(puback.reason_code),
            reason: puback.reason_string,
            data,
            error,
        }
    }
}

/// Why a subscribe or unsubscribe resolved the way it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckReason {
    /// No live connection.
    NoNetwork,
    /// Empty topic list; nothing was sent.
    NoTopics,
    /// The connection closed before the acknowledgement.
    Closed,
    SubAck(SubAck),
    UnsubAck(UnsubAck),
}

impl fmt::Display for AckReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckReason::NoNetwork => write!(f, "{}", NO_NETWORK),
            AckReason::NoTopics => write!(f, "No topics"),
            AckReason::Closed => write!(f, "{}", CONNECTION_CLOSED),
            AckReason::SubAck(ack) => write!(f, "SUBACK {:?}", ack.reason_codes),
            AckReason::UnsubAck(ack) => write!(f, "UNSUBACK {:?}", ack.reason_codes),
        }
    }
}

/// Outcome of [`Session::subscribe`] and [`Session::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckResult {
    /// Every filter was granted (subscribe) or accepted (unsubscribe).
    pub subscribed: bool,
    pub reason: AckReason,
}

impl SubAckResult {
    fn failed(reason: AckReason) -> Self {
        Self {
            subscribed: false,
            reason,
        }
    }
}

/// One topic filter or a list of them.
pub trait IntoTopics {
    fn into_topics(self) -> Vec<String>;
}

impl IntoTopics for &str {
    fn into_topics(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoTopics for String {
    fn into_topics(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoTopics for Vec<String> {
    fn into_topics(self) -> Vec<String> {
        self
    }
}

impl IntoTopics for Vec<&str> {
    fn into_topics(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl IntoTopics for &[&str] {
    fn into_topics(self) -> Vec<String> {
        self.iter().map(|t| t.to_string()).collect()
    }
}

impl IntoTopics for &[String] {
    fn into_topics(self) -> Vec<String> {
        self.to_vec()
    }
}

impl<const N: usize> IntoTopics for [&str; N] {
    fn into_topics(self) -> Vec<String> {
        self.iter().map(|t| t.to_string()).collect()
    }
}

/// Mutable session state, guarded by one lock.
pub(crate) struct SessionState {
    pub(crate) status: ConnectionState,
    pub(crate) ids: MessageIdAllocator,
    pub(crate) pending: PendingRequests,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) listeners: Listeners,
    pub(crate) link: Option<Link>,
    pub(crate) next_attempt: u64,
    /// Scheduled login check.
    retry: Option<JoinHandle<()>>,
    /// Bumped whenever a scheduled check is cancelled or replaced.
    retry_generation: u64,
    backoff: RetryBackoff,
}

fn cancel_retry(state: &mut SessionState) {
    state.retry_generation += 1;
    if let Some(retry) = state.retry.take() {
        retry.abort();
    }
}

pub(crate) struct Inner {
    pub(crate) config: SessionConfig,
    pub(crate) client_id: String,
    pub(crate) endpoint: Url,
    pub(crate) connector: Arc<dyn Connector>,
    login: Option<Arc<dyn LoginProvider>>,
    pub(crate) state: Mutex<SessionState>,
}

impl Inner {
    /// Route `notices` under the lock, release it, then run the listeners.
    ///
    /// Listeners may call back into the session.
    pub(crate) fn notify(&self, mut guard: MutexGuard<'_, SessionState>, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let deliveries = guard.listeners.route(notices);
        drop(guard);

        for delivery in deliveries {
            if panic::catch_unwind(AssertUnwindSafe(move || delivery.run())).is_err() {
                log::error!("Session listener panicked");
            }
        }
    }

    /// After an unexpected drop, ask the login provider again once the retry
    /// delay has passed. No-op without a provider.
    pub(crate) fn schedule_restart(self: &Arc<Self>, state: &mut SessionState) {
        if self.login.is_none() {
            return;
        }
        state.backoff.reset();
        let delay = self.config.retry_delay();
        log::info!("Checking login again in {:?}", delay);
        self.schedule_check(state, delay);
    }

    fn schedule_check(self: &Arc<Self>, state: &mut SessionState, delay: Duration) {
        cancel_retry(state);
        let generation = state.retry_generation;
        let inner = self.clone();
        state.retry = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.check_login(generation).await;
        }));
    }

    async fn check_login(self: Arc<Self>, generation: u64) {
        let Some(provider) = self.login.clone() else {
            return;
        };
        let status = provider.status().await;

        let mut guard = self.state.lock();
        // Abort only lands at an await; a check that got past it can still
        // race a close or open on another worker.
        if guard.retry_generation != generation {
            log::debug!("Login check cancelled");
            return;
        }
        guard.retry = None;

        match status {
            Ok(status) => {
                log::info!(
                    "Login ok for {}",
                    status.user_id.as_deref().unwrap_or("unknown user")
                );
                guard.backoff.reset();
                let jwt = status.jwt.clone();
                self.notify(guard, vec![Notice::Login(status)]);
                ConnectionManager::connect(&self, jwt);
            }
            Err(LoginError::Unauthorized) => {
                log::info!("Logged out, not reconnecting");
                self.notify(guard, vec![Notice::LoggedOut]);
            }
            Err(LoginError::Unavailable(e)) => {
                let delay = guard.backoff.next_delay();
                log::warn!("Login check failed: {}, retrying in {:?}", e, delay);
                self.schedule_check(&mut guard, delay);
            }
        }
    }
}

/// Handle to an MQTT session carried over WebSocket.
///
/// Clones share the same connection, subscriptions and listeners. Opening a
/// connection spawns tasks, so [`open`](Session::open) and
/// [`login`](Session::login) must be called within a Tokio runtime. The
/// connection is closed by [`close`](Session::close) or when the last clone
/// is dropped.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use mqlite_session::{Listener, Session, SessionConfig};
///
/// let session = Session::new(SessionConfig::new("app.example.com"), connector)?;
/// session.on(Listener::connect(|up| println!("connected: {}", up)));
/// session.open(jwt);
///
/// let result = session.subscribe(["devices/+/state"]).await;
/// let result = session.publish("devices/1/cmd", "on").await;
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
    _teardown: Arc<Teardown>,
}

/// Shared by every clone of a [`Session`]. The driver and retry tasks hold
/// `Inner` but never this, so the last clone going away ends them.
struct Teardown {
    inner: Arc<Inner>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        cancel_retry(&mut self.inner.state.lock());
        force_close(&self.inner, None, CloseReason::Logout);
    }
}

impl Session {
    /// Create a session. The client id is taken from the config or generated
    /// as `WEB-<uuid>`.
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Self::build(config, connector, None)
    }

    /// Create a session that asks `login` for credentials and reconnects
    /// after unexpected drops.
    pub fn with_login(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        login: Arc<dyn LoginProvider>,
    ) -> Result<Self> {
        Self::build(config, connector, Some(login))
    }

    fn build(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        login: Option<Arc<dyn LoginProvider>>,
    ) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("WEB-{}", Uuid::new_v4()));

        let state = SessionState {
            status: ConnectionState::Idle,
            ids: MessageIdAllocator::new(),
            pending: PendingRequests::new(),
            subscriptions: SubscriptionRegistry::new(),
            listeners: Listeners::default(),
            link: None,
            next_attempt: 0,
            retry: None,
            retry_generation: 0,
            backoff: RetryBackoff::new(config.retry_delay(), config.retry_max_delay()),
        };

        let inner = Arc::new(Inner {
            config,
            client_id,
            endpoint,
            connector,
            login,
            state: Mutex::new(state),
        });
        Ok(Self {
            _teardown: Arc::new(Teardown {
                inner: inner.clone(),
            }),
            inner,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().status
    }

    /// Open a connection with `credential` as the CONNECT password.
    ///
    /// A live connection is closed first. Cancels any scheduled login check.
    pub fn open(&self, credential: impl Into<String>) {
        cancel_retry(&mut self.inner.state.lock());
        ConnectionManager::connect(&self.inner, credential.into());
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Pending requests resolve as closed. Listeners hear `connect(false)`
    /// once, however many times this is called.
    pub fn close(&self) {
        let mut guard = self.inner.state.lock();
        cancel_retry(&mut guard);

        if guard.link.is_some() {
            drop(guard);
            force_close(&self.inner, None, CloseReason::Logout);
        } else if guard.listeners.last_connect() != Some(false) {
            self.inner.notify(guard, vec![Notice::Connect(false)]);
        }
    }

    /// Ask the login provider for a status now and open on success.
    pub fn login(&self) {
        if self.inner.login.is_none() {
            log::warn!("No login provider configured");
            return;
        }
        let mut guard = self.inner.state.lock();
        guard.backoff.reset();
        self.inner.schedule_check(&mut guard, Duration::ZERO);
    }

    /// Register a listener, replacing the previous one of the same kind.
    pub fn on(&self, listener: Listener) {
        self.inner.state.lock().listeners.set(listener);
    }

    /// Publish at QoS 1 and wait for the PUBACK.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> PublishResult {
        let payload = payload.into();
        let (waiter, attempt, sent) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let Some(link) = state.link.as_mut() else {
                log::debug!("Publish to {} dropped: no network", topic);
                return PublishResult::no_network();
            };

            let message_id = state.ids.next();
            let waiter = state.pending.register(RequestKey::puback(message_id));
            let sent = link.connection.publish(Publish {
                dup: false,
                qos: QoS::AtLeastOnce,
                retain: false,
                topic: topic.to_string(),
                packet_id: Some(message_id),
                payload,
                user_properties: Vec::new(),
            });
            (waiter, link.attempt, sent)
        };
        self.check_write(attempt, sent);

        match waiter.outcome().await {
            Resolution::Acked(Ack::PubAck(puback)) => PublishResult::from_puback(puback),
            _ => PublishResult::closed(),
        }
    }

    /// Subscribe at QoS 1 and wait for the SUBACK.
    ///
    /// Topics are recorded before the SUBACK arrives and replayed after a
    /// reconnect that did not resume the broker session.
    pub async fn subscribe(&self, topics: impl IntoTopics) -> SubAckResult {
        let topics = topics.into_topics();
        if topics.is_empty() {
            return SubAckResult::failed(AckReason::NoTopics);
        }

        let (waiter, attempt, sent) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let Some(link) = state.link.as_mut() else {
                log::debug!("Subscribe to {:?} dropped: no network", topics);
                return SubAckResult::failed(AckReason::NoNetwork);
            };

            let message_id = state.subscriptions.add(&topics, &mut state.ids);
            let waiter = state.pending.register(RequestKey::suback(message_id));
            let sent = link.connection.subscribe(Subscribe {
                packet_id: message_id,
                topics: topics.into_iter().map(|t| (t, QoS::AtLeastOnce)).collect(),
            });
            (waiter, link.attempt, sent)
        };
        self.check_write(attempt, sent);

        match waiter.outcome().await {
            Resolution::Acked(Ack::SubAck { packet, granted }) => SubAckResult {
                subscribed: granted,
                reason: AckReason::SubAck(packet),
            },
            _ => SubAckResult::failed(AckReason::Closed),
        }
    }

    /// Unsubscribe and wait for the UNSUBACK.
    ///
    /// Topics leave the registry immediately, even without a connection.
    pub async fn unsubscribe(&self, topics: impl IntoTopics) -> SubAckResult {
        let topics = topics.into_topics();
        if topics.is_empty() {
            return SubAckResult::failed(AckReason::NoTopics);
        }

        let (waiter, attempt, sent) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.subscriptions.remove(&topics);
            let Some(link) = state.link.as_mut() else {
                log::debug!("Unsubscribe from {:?} not sent: no network", topics);
                return SubAckResult::failed(AckReason::NoNetwork);
            };

            let message_id = state.ids.next();
            let waiter = state.pending.register(RequestKey::unsuback(message_id));
            let sent = link.connection.unsubscribe(Unsubscribe {
                packet_id: message_id,
                topics,
            });
            (waiter, link.attempt, sent)
        };
        self.check_write(attempt, sent);

        match waiter.outcome().await {
            Resolution::Acked(Ack::UnsubAck(packet)) => SubAckResult {
                subscribed: packet.accepted(),
                reason: AckReason::UnsubAck(packet),
            },
            _ => SubAckResult::failed(AckReason::Closed),
        }
    }

    /// Whether `topic` is in the registry, acknowledged or not.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.state.lock().subscriptions.contains(topic)
    }

    /// Snapshot of the subscription registry.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.state.lock().subscriptions.iter().cloned().collect()
    }

    fn check_write(&self, attempt: u64, sent: io::Result<()>) {
        if let Err(e) = sent {
            log::warn!("MQTT write failed: {}", e);
            force_close(&self.inner, Some(attempt), CloseReason::Transport(e.to_string()));
        }
    }
}
