//! In-memory transport and login provider for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::login::{LoginError, LoginProvider, LoginStatus};
use crate::packet::{Connect, PubAck, Publish, Subscribe, Unsubscribe};
use crate::transport::{Connection, ConnectionEvent, Connector, EventStream};

/// A packet written by the session.
#[derive(Debug, Clone)]
pub(crate) enum Sent {
    Connect(Connect),
    Publish(Publish),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    PubAck(PubAck),
    PingReq,
}

/// Test-side handle of one opened connection.
#[derive(Clone)]
pub(crate) struct MockLink {
    sent: Arc<Mutex<Vec<Sent>>>,
    destroyed: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl MockLink {
    /// Deliver an event as if the broker sent it. Ignored once torn down.
    pub(crate) fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub(crate) fn connect_packet(&self) -> Option<Connect> {
        self.sent().into_iter().find_map(|p| match p {
            Sent::Connect(c) => Some(c),
            _ => None,
        })
    }

    pub(crate) fn publishes(&self) -> Vec<Publish> {
        self.sent()
            .into_iter()
            .filter_map(|p| match p {
                Sent::Publish(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn subscribes(&self) -> Vec<Subscribe> {
        self.sent()
            .into_iter()
            .filter_map(|p| match p {
                Sent::Subscribe(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn unsubscribes(&self) -> Vec<Unsubscribe> {
        self.sent()
            .into_iter()
            .filter_map(|p| match p {
                Sent::Unsubscribe(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn pubacks(&self) -> Vec<PubAck> {
        self.sent()
            .into_iter()
            .filter_map(|p| match p {
                Sent::PubAck(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn pings(&self) -> usize {
        self.sent()
            .iter()
            .filter(|p| matches!(p, Sent::PingReq))
            .count()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

struct MockConnection {
    sent: Arc<Mutex<Vec<Sent>>>,
    destroyed: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MockConnection {
    fn record(&mut self, packet: Sent) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        self.sent.lock().push(packet);
        Ok(())
    }
}

impl Connection for MockConnection {
    fn connect(&mut self, packet: Connect) -> io::Result<()> {
        self.record(Sent::Connect(packet))
    }

    fn publish(&mut self, packet: Publish) -> io::Result<()> {
        self.record(Sent::Publish(packet))
    }

    fn subscribe(&mut self, packet: Subscribe) -> io::Result<()> {
        self.record(Sent::Subscribe(packet))
    }

    fn unsubscribe(&mut self, packet: Unsubscribe) -> io::Result<()> {
        self.record(Sent::Unsubscribe(packet))
    }

    fn puback(&mut self, packet: PubAck) -> io::Result<()> {
        self.record(Sent::PubAck(packet))
    }

    fn pingreq(&mut self) -> io::Result<()> {
        self.record(Sent::PingReq)
    }

    fn destroy(&mut self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// Connector that records every attempt.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    links: Arc<Mutex<Vec<MockLink>>>,
    refuse: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MockConnector {
    pub(crate) fn attempts(&self) -> usize {
        self.links.lock().len()
    }

    pub(crate) fn link(&self, index: usize) -> MockLink {
        self.links.lock()[index].clone()
    }

    pub(crate) fn last_link(&self) -> MockLink {
        let links = self.links.lock();
        links[links.len() - 1].clone()
    }

    /// Make `open` fail.
    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make every write on every connection fail.
    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn open(&self, _endpoint: &Url) -> io::Result<(Box<dyn Connection>, EventStream)> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let link = MockLink {
            sent: Arc::new(Mutex::new(Vec::new())),
            destroyed: Arc::new(AtomicBool::new(false)),
            events: tx,
        };
        let connection = MockConnection {
            sent: link.sent.clone(),
            destroyed: link.destroyed.clone(),
            fail_writes: self.fail_writes.clone(),
        };
        self.links.lock().push(link);
        Ok((Box::new(connection), rx))
    }
}

/// Login provider answering from a fixed script, then `Unauthorized`.
pub(crate) struct ScriptedLogin {
    replies: Mutex<VecDeque<Result<LoginStatus, LoginError>>>,
    calls: AtomicUsize,
}

impl ScriptedLogin {
    pub(crate) fn new(replies: Vec<Result<LoginStatus, LoginError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginProvider for ScriptedLogin {
    async fn status(&self) -> Result<LoginStatus, LoginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or(Err(LoginError::Unauthorized))
    }
}

pub(crate) fn login_ok(jwt: &str) -> Result<LoginStatus, LoginError> {
    Ok(LoginStatus {
        jwt: jwt.to_string(),
        user_id: Some("user-1".to_string()),
    })
}
