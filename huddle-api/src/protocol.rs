//! Signaling wire protocol
//!
//! Named events carried as JSON text frames:
//!
//! - client → server: `{"event": "produce", "data": {...}, "ack": 7}`
//! - reply to a request with an `ack` id:
//!   `{"ack": 7, "ok": true, "data": ...}` or
//!   `{"ack": 7, "ok": false, "error": {"code": "...", "message": "..."}}`
//! - server push: `{"event": "new-producer", "data": {...}}`

use crate::error::{ApiError, ApiResult};
use huddle_sfu::rtp::{DtlsParameters, RtpCapabilities, RtpParameters};
use huddle_sfu::{
    ConsumerId, MediaKind, Notification, ProducerId, RoomId, TransportDirection, TransportId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckFrame {
    pub ack: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl AckFrame {
    #[must_use]
    pub const fn ok(ack: u64, data: Value) -> Self {
        Self {
            ack,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub const fn error(ack: u64, error: ApiError) -> Self {
        Self {
            ack,
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    pub event: String,
    pub data: Value,
}

impl PushFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

impl TryFrom<&Notification> for PushFrame {
    type Error = serde_json::Error;

    fn try_from(notification: &Notification) -> Result<Self, Self::Error> {
        Ok(Self::new(notification.event_name(), notification.payload()?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Ack(AckFrame),
    Push(PushFrame),
}

/// `join-room` takes the bare room key; `{"room": ...}` is accepted too
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RoomKey {
    Key(RoomId),
    Object { room: RoomId },
}

impl From<RoomKey> for RoomId {
    fn from(key: RoomKey) -> Self {
        match key {
            RoomKey::Key(room) | RoomKey::Object { room } => room,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomRequest {
    pub room: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateTransportRequest {
    pub room: RoomId,
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub room: RoomId,
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub room: RoomId,
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub room: RoomId,
    pub producer_id: ProducerId,
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumerRequest {
    pub room: RoomId,
    pub consumer_id: ConsumerId,
}

/// A decoded client request
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinRoom(RoomId),
    LeaveRoom,
    GetRtpCapabilities(RoomRequest),
    CreateTransport(CreateTransportRequest),
    ConnectSendTransport(ConnectTransportRequest),
    ConnectRecvTransport(ConnectTransportRequest),
    Produce(ProduceRequest),
    Consume(ConsumeRequest),
    ResumeConsumer(ResumeConsumerRequest),
    NewUser(String),
    DeleteUser(String),
    Message(Value),
}

fn payload<T: DeserializeOwned>(data: Value) -> ApiResult<T> {
    Ok(serde_json::from_value(data)?)
}

impl ClientEvent {
    /// Decode the payload of the named event
    pub fn parse(event: &str, data: Value) -> ApiResult<Self> {
        let event = match event {
            "join-room" => Self::JoinRoom(payload::<RoomKey>(data)?.into()),
            "leave-room" => Self::LeaveRoom,
            "get-rtp-capabilities" => Self::GetRtpCapabilities(payload(data)?),
            "create-transport" => Self::CreateTransport(payload(data)?),
            "connect-sendTransport" => Self::ConnectSendTransport(payload(data)?),
            "connect-recvTransport" => Self::ConnectRecvTransport(payload(data)?),
            "produce" => Self::Produce(payload(data)?),
            "consume" => Self::Consume(payload(data)?),
            "resume-consumer" => Self::ResumeConsumer(payload(data)?),
            "new-user" => Self::NewUser(payload(data)?),
            "delete-user" => Self::DeleteUser(payload(data)?),
            "message" => Self::Message(data),
            other => return Err(ApiError::invalid_request(format!("Unknown event: {other}"))),
        };
        Ok(event)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "join-room",
            Self::LeaveRoom => "leave-room",
            Self::GetRtpCapabilities(_) => "get-rtp-capabilities",
            Self::CreateTransport(_) => "create-transport",
            Self::ConnectSendTransport(_) => "connect-sendTransport",
            Self::ConnectRecvTransport(_) => "connect-recvTransport",
            Self::Produce(_) => "produce",
            Self::Consume(_) => "consume",
            Self::ResumeConsumer(_) => "resume-consumer",
            Self::NewUser(_) => "new-user",
            Self::DeleteUser(_) => "delete-user",
            Self::Message(_) => "message",
        }
    }
}
