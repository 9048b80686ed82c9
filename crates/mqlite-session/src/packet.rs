//! MQTT v5 packet model exchanged with the codec.
//!
//! These are plain data carriers. Encoding and decoding belong to the codec
//! behind [`Connection`](crate::transport::Connection); the session only
//! builds outbound packets and inspects inbound ones.

use std::borrow::Cow;

use bytes::Bytes;

/// Protocol version requested in CONNECT.
pub const PROTOCOL_VERSION: u8 = 5;

/// Highest QoS this client ever requests. Any SUBACK grant above it is a failure.
pub const MAX_QOS: u8 = 1;

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)] // MQTT spec names
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// MQTT v5 reason codes the session acts on.
pub mod reason_code {
    pub const SUCCESS: u8 = 0x00;
    pub const GRANTED_QOS_1: u8 = 0x01;
    pub const UNSPECIFIED_ERROR: u8 = 0x80;
    pub const NOT_AUTHORIZED: u8 = 0x87;
    /// Reused locally to flag "no transport" on publish results.
    pub const SERVER_UNAVAILABLE: u8 = 0x88;
}

/// Decode a reason code into the name logged for failed acknowledgements.
pub fn reason_name(code: u8) -> Cow<'static, str> {
    let name = match code {
        0 => "GRANTED QOS 0",
        1 => "GRANTED QOS 1",
        2 => "GRANTED QOS 2",
        17 => "NO_SUBSCRIPTION",
        128 => "UNSPECIFIED_ERROR",
        131 => "IMP_SPEC_ERROR",
        134 => "BAD_USER_PASS",
        135 => "NOT_AUTHORIZED",
        136 => "SERVER_UNAVAILABLE",
        143 => "TOPIC_INVALID",
        144 => "WILL_TOPIC_INVALID",
        145 => "PACKET_ID_IN_USE",
        149 => "PACKET_TOO_LARGE",
        151 => "QUOTA_EXCEEDED",
        153 => "PAYLOAD_INVALID",
        155 => "QOS_NOT_SUPPORTED",
        158 => "SHARED_SUBSCRIPTIONS_NOT_SUPPORTED",
        161 => "SUBSCRIPTION_IDS_NOT_SUPPORTED",
        162 => "WILDCARDS_NOT_SUPPORTED",
        other => return Cow::Owned(format!("UNKNOWN ({})", other)),
    };
    Cow::Borrowed(name)
}

/// CONNECT packet data.
#[derive(Debug, Clone)]
pub struct Connect {
    pub protocol_version: u8,
    pub client_id: String,
    /// MQTT v5 clean start. The session always asks the broker to keep state.
    pub clean_start: bool,
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

/// CONNACK packet data.
#[derive(Debug, Clone, Default)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: u8,
    pub reason_string: Option<String>,
}

/// PUBLISH packet data, both directions.
#[derive(Debug, Clone)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub user_properties: Vec<(String, String)>,
}

/// PUBACK packet data.
#[derive(Debug, Clone, Default)]
pub struct PubAck {
    pub packet_id: u16,
    pub reason_code: u8,
    pub reason_string: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

impl PubAck {
    /// Plain success acknowledgement for an inbound QoS 1 publish.
    pub fn success(packet_id: u16) -> Self {
        Self {
            packet_id,
            ..Default::default()
        }
    }

    /// Value of the first user property named `key`.
    pub fn user_property(&self, key: &str) -> Option<&str> {
        self.user_properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// SUBSCRIBE packet data.
#[derive(Debug, Clone)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topics: Vec<(String, QoS)>,
}

/// SUBACK packet data. One reason code per requested filter, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub reason_codes: Vec<u8>,
    pub reason_string: Option<String>,
}

/// UNSUBSCRIBE packet data.
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

/// UNSUBACK packet data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsubAck {
    pub packet_id: u16,
    pub reason_codes: Vec<u8>,
    pub reason_string: Option<String>,
}

impl UnsubAck {
    /// True when no filter was refused.
    pub fn accepted(&self) -> bool {
        self.reason_codes
            .iter()
            .all(|&code| code < reason_code::UNSPECIFIED_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_names() {
        assert_eq!(reason_name(0), "GRANTED QOS 0");
        assert_eq!(reason_name(reason_code::NOT_AUTHORIZED), "NOT_AUTHORIZED");
        assert_eq!(reason_name(155), "QOS_NOT_SUPPORTED");
        assert_eq!(reason_name(42), "UNKNOWN (42)");
    }

    #[test]
    fn test_puback_user_property() {
        let ack = PubAck {
            packet_id: 7,
            user_properties: vec![
                ("trace".to_string(), "abc".to_string()),
                ("error".to_string(), "quota".to_string()),
            ],
            ..Default::default()
        };
        assert_eq!(ack.user_property("error"), Some("quota"));
        assert_eq!(ack.user_property("missing"), None);
    }

    #[test]
    fn test_unsuback_accepted() {
        let ok = UnsubAck {
            packet_id: 1,
            reason_codes: vec![0x00, 0x11],
            reason_string: None,
        };
        assert!(ok.accepted());

        let refused = UnsubAck {
            packet_id: 1,
            reason_codes: vec![0x00, 0x87],
            reason_string: None,
        };
        assert!(!refused.accepted());
    }
}
