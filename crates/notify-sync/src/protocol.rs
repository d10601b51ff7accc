//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Only the WebSocket transport and text frames are supported. Binary
//! attachments are rejected as protocol errors.
//!
//! ```text
//! engine.io:  <type>[<data>]            0=open 1=close 2=ping 3=pong 4=message 5=upgrade 6=noop
//! socket.io:  <type>[<nsp>,][<ack>][json] 0=connect 1=disconnect 2=event 3=ack 4=connect_error
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::model::Notification;

/// Default Socket.IO namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Engine.IO handshake payload carried by the open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// One Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| SyncError::protocol("empty engine.io frame"))?;
        let body = chars.as_str();
        let data = (!body.is_empty()).then(|| body.to_string());

        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(body)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(data)),
            '3' => Ok(Self::Pong(data)),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(SyncError::protocol(format!(
                "unknown engine.io packet type '{other}'"
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(info) => format!(
                "0{{\"sid\":\"{}\",\"upgrades\":[],\"pingInterval\":{},\"pingTimeout\":{}}}",
                info.sid, info.ping_interval, info.ping_timeout
            ),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{}", data.as_deref().unwrap_or_default()),
            Self::Pong(data) => format!("3{}", data.as_deref().unwrap_or_default()),
            Self::Message(body) => format!("4{body}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

/// One Socket.IO packet, carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// A CONNECT to the default namespace carrying the auth payload.
    pub fn connect(auth: Option<Value>) -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: auth,
        }
    }

    /// An EVENT to the default namespace.
    pub fn event(name: &str, payload: Option<Value>) -> Self {
        let mut args = vec![Value::String(name.to_string())];
        args.extend(payload);
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            args,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn decode(body: &str) -> Result<Self> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .ok_or_else(|| SyncError::protocol("empty socket.io packet"))?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(SyncError::protocol("binary socket.io packets are not supported"));
        }

        let namespace = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let ns = &rest[..end];
            rest = rest.get(end + 1..).unwrap_or_default();
            ns.to_string()
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| SyncError::protocol(format!("invalid ack id: {e}")))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => Ok(Self::Event {
                namespace,
                ack_id,
                args: into_args(data)?,
            }),
            '3' => Ok(Self::Ack {
                namespace,
                ack_id: ack_id.ok_or_else(|| SyncError::protocol("ack packet without id"))?,
                args: into_args(data)?,
            }),
            '4' => Ok(Self::ConnectError { namespace, data }),
            other => Err(SyncError::protocol(format!(
                "unknown socket.io packet type '{other}'"
            ))),
        }
    }

    pub fn encode(&self) -> String {
        let (kind, namespace, ack_id, data) = match self {
            Self::Connect { namespace, data } => ('0', namespace, None, data.clone()),
            Self::Disconnect { namespace } => ('1', namespace, None, None),
            Self::Event {
                namespace,
                ack_id,
                args,
            } => ('2', namespace, *ack_id, Some(Value::Array(args.clone()))),
            Self::Ack {
                namespace,
                ack_id,
                args,
            } => ('3', namespace, Some(*ack_id), Some(Value::Array(args.clone()))),
            Self::ConnectError { namespace, data } => ('4', namespace, None, data.clone()),
        };

        let mut out = String::new();
        out.push(kind);
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Wrap into the Engine.IO frame that goes on the wire.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

fn into_args(data: Option<Value>) -> Result<Vec<Value>> {
    match data {
        Some(Value::Array(args)) if !args.is_empty() => Ok(args),
        _ => Err(SyncError::protocol("event packet without a name")),
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    NewNotification(Box<Notification>),
    NotificationCount(u64),
    AllNotificationsRead,
    NotificationDeleted(String),
}

impl ServerEvent {
    pub const NEW_NOTIFICATION: &'static str = "new_notification";
    pub const NOTIFICATION_COUNT: &'static str = "notification_count";
    pub const ALL_NOTIFICATIONS_READ: &'static str = "all_notifications_read";
    pub const NOTIFICATION_DELETED: &'static str = "notification_deleted";

    pub fn name(&self) -> &'static str {
        match self {
            Self::NewNotification(_) => Self::NEW_NOTIFICATION,
            Self::NotificationCount(_) => Self::NOTIFICATION_COUNT,
            Self::AllNotificationsRead => Self::ALL_NOTIFICATIONS_READ,
            Self::NotificationDeleted(_) => Self::NOTIFICATION_DELETED,
        }
    }

    /// Decode the arguments of an EVENT packet.
    ///
    /// Returns `Ok(None)` for event names this client does not handle and an
    /// error for known events with a malformed payload.
    pub fn from_args(args: &[Value]) -> Result<Option<Self>> {
        let Some(name) = args.first().and_then(Value::as_str) else {
            return Err(SyncError::protocol("event name is not a string"));
        };
        let payload = args.get(1);

        let event = match name {
            Self::NEW_NOTIFICATION => {
                let value = payload
                    .cloned()
                    .ok_or_else(|| SyncError::protocol("new_notification without payload"))?;
                let mut notification: Notification = serde_json::from_value(value)?;
                notification.normalize();
                Self::NewNotification(Box::new(notification))
            }
            Self::NOTIFICATION_COUNT => {
                let count = payload.and_then(Value::as_u64).ok_or_else(|| {
                    SyncError::protocol(format!("invalid notification_count payload: {payload:?}"))
                })?;
                Self::NotificationCount(count)
            }
            Self::ALL_NOTIFICATIONS_READ => Self::AllNotificationsRead,
            Self::NOTIFICATION_DELETED => {
                let id = match payload {
                    Some(Value::String(id)) if !id.is_empty() => id.clone(),
                    Some(Value::Number(id)) => id.to_string(),
                    other => {
                        return Err(SyncError::protocol(format!(
                            "invalid notification_deleted payload: {other:?}"
                        )));
                    }
                };
                Self::NotificationDeleted(id)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Commands the client may push to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    RequestNotificationCount,
    MarkNotificationRead(String),
    MarkAllRead,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestNotificationCount => "request_notification_count",
            Self::MarkNotificationRead(_) => "mark_notification_read",
            Self::MarkAllRead => "mark_all_read",
        }
    }

    pub fn to_packet(&self) -> SocketPacket {
        let payload = match self {
            Self::MarkNotificationRead(id) => Some(Value::String(id.clone())),
            Self::RequestNotificationCount | Self::MarkAllRead => None,
        };
        SocketPacket::event(self.name(), payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let EnginePacket::Open(info) = EnginePacket::decode(frame).unwrap() else {
            panic!("expected open packet");
        };
        assert_eq!(info.sid, "abc");
        assert_eq!(info.ping_interval, 25000);
        assert_eq!(info.ping_timeout, 20000);
        assert_eq!(info.max_payload, Some(1_000_000));
    }

    #[test]
    fn test_ping_pong() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(None));
        assert_eq!(
            EnginePacket::decode("2probe").unwrap(),
            EnginePacket::Ping(Some("probe".into()))
        );
        assert_eq!(EnginePacket::Pong(None).encode(), "3");
    }

    #[test]
    fn test_unknown_engine_packet() {
        assert!(EnginePacket::decode("9").is_err());
        assert!(EnginePacket::decode("").is_err());
    }

    #[test]
    fn test_connect_with_auth() {
        let packet = SocketPacket::connect(Some(json!({ "token": "t0k" })));
        assert_eq!(packet.to_frame(), r#"40{"token":"t0k"}"#);
    }

    #[test]
    fn test_decode_connect_ack_and_error() {
        assert_eq!(
            SocketPacket::decode(r#"0{"sid":"s1"}"#).unwrap(),
            SocketPacket::Connect {
                namespace: "/".into(),
                data: Some(json!({ "sid": "s1" })),
            }
        );
        assert_eq!(
            SocketPacket::decode(r#"4{"message":"Authentication failed"}"#).unwrap(),
            SocketPacket::ConnectError {
                namespace: "/".into(),
                data: Some(json!({ "message": "Authentication failed" })),
            }
        );
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack() {
        let packet = SocketPacket::decode(r#"2/admin,13["notification_count",4]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/admin".into(),
                ack_id: Some(13),
                args: vec![json!("notification_count"), json!(4)],
            }
        );
        assert_eq!(packet.encode(), r#"2/admin,13["notification_count",4]"#);
    }

    #[test]
    fn test_binary_packets_rejected() {
        assert!(SocketPacket::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#).is_err());
    }

    #[test]
    fn test_event_without_name_rejected() {
        assert!(SocketPacket::decode("2[]").is_err());
        assert!(SocketPacket::decode("2").is_err());
    }

    #[test]
    fn test_server_events() {
        let event = ServerEvent::from_args(&[
            json!("new_notification"),
            json!({ "id": "n1", "title": "t", "message": "m", "is_read": false }),
        ])
        .unwrap()
        .unwrap();
        let ServerEvent::NewNotification(n) = event else {
            panic!("expected new_notification");
        };
        assert_eq!(n.id, "n1");

        assert_eq!(
            ServerEvent::from_args(&[json!("notification_count"), json!(3)]).unwrap(),
            Some(ServerEvent::NotificationCount(3))
        );
        assert_eq!(
            ServerEvent::from_args(&[json!("all_notifications_read")]).unwrap(),
            Some(ServerEvent::AllNotificationsRead)
        );
        assert_eq!(
            ServerEvent::from_args(&[json!("notification_deleted"), json!("n9")]).unwrap(),
            Some(ServerEvent::NotificationDeleted("n9".into()))
        );
        assert_eq!(ServerEvent::from_args(&[json!("user_joined")]).unwrap(), None);
    }

    #[test]
    fn test_malformed_server_events() {
        assert!(ServerEvent::from_args(&[json!("notification_count"), json!(-1)]).is_err());
        assert!(ServerEvent::from_args(&[json!("notification_count"), json!("3")]).is_err());
        assert!(ServerEvent::from_args(&[json!("notification_deleted")]).is_err());
        assert!(ServerEvent::from_args(&[json!("new_notification"), json!({ "title": "no id" })]).is_err());
        assert!(ServerEvent::from_args(&[json!(42)]).is_err());
    }

    #[test]
    fn test_client_commands() {
        assert_eq!(
            ClientCommand::RequestNotificationCount.to_packet().to_frame(),
            r#"42["request_notification_count"]"#
        );
        assert_eq!(
            ClientCommand::MarkNotificationRead("n1".into()).to_packet().to_frame(),
            r#"42["mark_notification_read","n1"]"#
        );
    }
}
