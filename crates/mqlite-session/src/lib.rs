//! mqlite-session - MQTT v5 session manager for WebSocket-carried connections.
//!
//! This crate keeps one browser-style MQTT session alive: it opens the
//! connection with a JWT credential, tracks subscriptions across reconnects,
//! correlates PUBACK/SUBACK/UNSUBACK with the requests that caused them, and
//! watches the link with pings and an idle watchdog. The WebSocket transport
//! and the MQTT codec plug in through [`Connector`] and [`Connection`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mqlite_session::{Listener, Session, SessionConfig};
//!
//! let config = SessionConfig::load("mqlite-session.toml")?;
//! let session = Session::with_login(config, Arc::new(connector), Arc::new(login))?;
//!
//! session.on(Listener::publish(|msg| println!("{}: {:?}", msg.topic, msg.payload)));
//! session.login();
//!
//! let result = session.subscribe(["devices/+/state"]).await;
//! if !result.subscribed {
//!     eprintln!("subscribe failed: {}", result.reason);
//! }
//! ```

mod config;
mod connection;
mod error;
mod events;
mod keep_alive;
mod login;
pub mod packet;
mod packet_id;
mod pending;
mod session;
mod subscriptions;
mod transport;

#[cfg(test)]
mod mock;

pub use config::SessionConfig;
pub use connection::{CloseReason, ConnectionState};
pub use error::{Result, SessionError};
pub use events::Listener;
pub use keep_alive::{KeepAlive, Tick};
pub use login::{LoginError, LoginProvider, LoginStatus, RetryBackoff};
pub use packet::{Publish, QoS};
pub use packet_id::MessageIdAllocator;
pub use pending::{Ack, AckKind, PendingRequests, RequestKey, Resolution, Waiter};
pub use session::{AckReason, IntoTopics, PublishResult, Session, SubAckResult};
pub use subscriptions::{Subscription, SubscriptionRegistry};
pub use transport::{endpoint_url, Connection, ConnectionEvent, Connector, EventStream};
