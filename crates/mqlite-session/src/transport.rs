//! Seam to the WebSocket transport and MQTT codec.
//!
//! The session never touches bytes. A [`Connector`] opens one [`Connection`]
//! per attempt and hands back the stream of decoded [`ConnectionEvent`]s.
//! Writes are non-blocking: the codec queues the encoded packet and reports
//! later failures as `Error`/`Closed` events.

use std::io;

use tokio::sync::mpsc;
use url::Url;

use crate::error::{Result, SessionError};
use crate::packet::{ConnAck, Connect, PubAck, Publish, SubAck, Subscribe, UnsubAck, Unsubscribe};

/// Events emitted by a connection, in delivery order.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    SubAck(SubAck),
    UnsubAck(UnsubAck),
    PingResp,
    /// Transport closed by the peer.
    Closed,
    /// Transport or codec failure.
    Error(String),
}

/// Receiving end of a connection's events.
pub type EventStream = mpsc::UnboundedReceiver<ConnectionEvent>;

/// One transport + codec instance.
pub trait Connection: Send {
    fn connect(&mut self, packet: Connect) -> io::Result<()>;

    fn publish(&mut self, packet: Publish) -> io::Result<()>;

    fn subscribe(&mut self, packet: Subscribe) -> io::Result<()>;

    fn unsubscribe(&mut self, packet: Unsubscribe) -> io::Result<()>;

    fn puback(&mut self, packet: PubAck) -> io::Result<()>;

    fn pingreq(&mut self) -> io::Result<()>;

    /// Tear down the socket. Called exactly once per connection.
    fn destroy(&mut self);
}

/// Factory for connection attempts.
pub trait Connector: Send + Sync {
    fn open(&self, endpoint: &Url) -> io::Result<(Box<dyn Connection>, EventStream)>;
}

/// Build the WebSocket endpoint, mirroring the page scheme (`http` -> `ws`,
/// `https` -> `wss`).
pub fn endpoint_url(page_scheme: &str, host: &str, path: &str) -> Result<Url> {
    let scheme = match page_scheme.trim_end_matches(':') {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(SessionError::Validation(format!(
                "Unsupported page scheme: {}",
                other
            )))
        }
    };
    let url = Url::parse(&format!("{}://{}{}", scheme, host, path))?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_mirrored() {
        let url = endpoint_url("https", "app.example.com", "/api/wss/mqtt").unwrap();
        assert_eq!(url.as_str(), "wss://app.example.com/api/wss/mqtt");

        let url = endpoint_url("http:", "localhost:8080", "/api/wss/mqtt").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/api/wss/mqtt");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            endpoint_url("ftp", "host", "/mqtt"),
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            endpoint_url("https", "bad host", "/mqtt"),
            Err(SessionError::InvalidEndpoint(_))
        ));
    }
}
