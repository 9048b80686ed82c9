//! Application-facing event registration.
//!
//! One slot per event kind: registering again replaces the previous callback.

use std::fmt;
use std::sync::Arc;

use crate::login::LoginStatus;
use crate::packet::Publish;

type PublishFn = Arc<dyn Fn(&Publish) + Send + Sync>;
type ConnectFn = Arc<dyn Fn(bool) + Send + Sync>;
type LoginFn = Arc<dyn Fn(&LoginStatus) + Send + Sync>;
type LoggedOutFn = Arc<dyn Fn() + Send + Sync>;

/// A callback for one event kind.
#[derive(Clone)]
pub enum Listener {
    /// Inbound application message.
    Publish(PublishFn),
    /// Connected (`true`) or disconnected (`false`).
    Connect(ConnectFn),
    /// The login provider returned a usable status.
    Login(LoginFn),
    /// The login provider reported the user as logged out.
    LoggedOut(LoggedOutFn),
}

impl Listener {
    pub fn publish<F: Fn(&Publish) + Send + Sync + 'static>(f: F) -> Self {
        Listener::Publish(Arc::new(f))
    }

    pub fn connect<F: Fn(bool) + Send + Sync + 'static>(f: F) -> Self {
        Listener::Connect(Arc::new(f))
    }

    pub fn login<F: Fn(&LoginStatus) + Send + Sync + 'static>(f: F) -> Self {
        Listener::Login(Arc::new(f))
    }

    pub fn logged_out<F: Fn() + Send + Sync + 'static>(f: F) -> Self {
        Listener::LoggedOut(Arc::new(f))
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Listener::Publish(_) => "Publish",
            Listener::Connect(_) => "Connect",
            Listener::Login(_) => "Login",
            Listener::LoggedOut(_) => "LoggedOut",
        };
        f.debug_tuple("Listener").field(&kind).finish()
    }
}

/// Something listeners must hear about, produced while the session state is
/// locked and delivered after the lock is released.
#[derive(Debug, Clone)]
pub(crate) enum Notice {
    Connect(bool),
    Publish(Publish),
    Login(LoginStatus),
    LoggedOut,
}

/// Registered callbacks.
#[derive(Default)]
pub(crate) struct Listeners {
    publish: Option<PublishFn>,
    connect: Option<ConnectFn>,
    login: Option<LoginFn>,
    logged_out: Option<LoggedOutFn>,
    /// Last connection state reported through `connect`.
    last_connect: Option<bool>,
}

impl Listeners {
    pub(crate) fn set(&mut self, listener: Listener) {
        match listener {
            Listener::Publish(f) => self.publish = Some(f),
            Listener::Connect(f) => self.connect = Some(f),
            Listener::Login(f) => self.login = Some(f),
            Listener::LoggedOut(f) => self.logged_out = Some(f),
        }
    }

    pub(crate) fn last_connect(&self) -> Option<bool> {
        self.last_connect
    }

    /// Pair each notice with the callback that should receive it.
    ///
    /// Also tracks the last reported connection state, so this must run under
    /// the same lock that produced the notices.
    pub(crate) fn route(&mut self, notices: Vec<Notice>) -> Vec<Delivery> {
        let mut out = Vec::with_capacity(notices.len());
        for notice in notices {
            if let Notice::Connect(connected) = notice {
                self.last_connect = Some(connected);
            }
            let delivery = match notice {
                Notice::Connect(connected) => {
                    self.connect.clone().map(|f| Delivery::Connect(f, connected))
                }
                Notice::Publish(packet) => self.publish.clone().map(|f| Delivery::Publish(f, packet)),
                Notice::Login(status) => self.login.clone().map(|f| Delivery::Login(f, status)),
                Notice::LoggedOut => self.logged_out.clone().map(Delivery::LoggedOut),
            };
            out.extend(delivery);
        }
        out
    }
}

/// A notice bound to its callback, ready to run outside the lock.
pub(crate) enum Delivery {
    Connect(ConnectFn, bool),
    Publish(PublishFn, Publish),
    Login(LoginFn, LoginStatus),
    LoggedOut(LoggedOutFn),
}

impl Delivery {
    pub(crate) fn run(self) {
        match self {
            Delivery::Connect(f, connected) => f(connected),
            Delivery::Publish(f, packet) => f(&packet),
            Delivery::Login(f, status) => f(&status),
            Delivery::LoggedOut(f) => f(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_registration_replaces_slot() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::default();

        let counter = first.clone();
        listeners.set(Listener::connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = second.clone();
        listeners.set(Listener::connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for delivery in listeners.route(vec![Notice::Connect(true)]) {
            delivery.run();
        }
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_route_tracks_last_connect_without_listener() {
        let mut listeners = Listeners::default();
        assert_eq!(listeners.last_connect(), None);

        let deliveries = listeners.route(vec![Notice::Connect(true), Notice::Connect(false)]);
        assert!(deliveries.is_empty());
        assert_eq!(listeners.last_connect(), Some(false));
    }
}
