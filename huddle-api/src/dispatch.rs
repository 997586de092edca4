//! Event dispatcher: one [`Session`] per signaling connection

use crate::error::{ApiError, ApiResult};
use crate::presence::PresenceHub;
use crate::protocol::ClientEvent;
use huddle_sfu::{NotificationSender, PeerId, SfuManager, TransportDirection};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct Session {
    peer_id: PeerId,
    sfu: Arc<SfuManager>,
    presence: PresenceHub,
    notifier: NotificationSender,
}

fn to_value<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        error!(error = %e, "Failed to encode response");
        ApiError::internal("Failed to encode response")
    })
}

impl Session {
    /// The connection id doubles as the peer id
    pub fn new(
        peer_id: PeerId,
        sfu: Arc<SfuManager>,
        presence: PresenceHub,
        notifier: NotificationSender,
    ) -> Self {
        Self {
            peer_id,
            sfu,
            presence,
            notifier,
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Decode and run one named event
    pub async fn dispatch(&self, event: &str, data: Value) -> ApiResult<Value> {
        let event = ClientEvent::parse(event, data)?;
        self.handle(event).await
    }

    pub async fn handle(&self, event: ClientEvent) -> ApiResult<Value> {
        let peer_id = &self.peer_id;
        debug!(peer_id = %peer_id, event = event.name(), "Handling event");

        match event {
            ClientEvent::JoinRoom(room) => {
                self.sfu.join(&room, peer_id, self.notifier.clone()).await?;
                info!(peer_id = %peer_id, room_id = %room, "Client joined room");
                Ok(Value::Bool(true))
            }
            ClientEvent::LeaveRoom => Ok(Value::Bool(self.sfu.leave(peer_id))),
            ClientEvent::GetRtpCapabilities(req) => {
                to_value(&self.sfu.rtp_capabilities(&req.room)?)
            }
            ClientEvent::CreateTransport(req) => {
                let info = self
                    .sfu
                    .create_transport(&req.room, peer_id, req.direction)
                    .await?;
                to_value(&info)
            }
            ClientEvent::ConnectSendTransport(req) => {
                self.sfu
                    .connect_transport(
                        &req.room,
                        peer_id,
                        TransportDirection::Send,
                        &req.transport_id,
                        req.dtls_parameters,
                    )
                    .await?;
                Ok(Value::Bool(true))
            }
            ClientEvent::ConnectRecvTransport(req) => {
                self.sfu
                    .connect_transport(
                        &req.room,
                        peer_id,
                        TransportDirection::Recv,
                        &req.transport_id,
                        req.dtls_parameters,
                    )
                    .await?;
                Ok(Value::Bool(true))
            }
            ClientEvent::Produce(req) => {
                let info = self
                    .sfu
                    .produce(&req.room, peer_id, &req.transport_id, req.kind, req.rtp_parameters)
                    .await?;
                to_value(&info)
            }
            ClientEvent::Consume(req) => {
                let info = self
                    .sfu
                    .consume(&req.room, peer_id, &req.producer_id, req.rtp_capabilities)
                    .await?;
                to_value(&info)
            }
            ClientEvent::ResumeConsumer(req) => {
                self.sfu
                    .resume_consumer(&req.room, peer_id, &req.consumer_id)
                    .await?;
                Ok(Value::Bool(true))
            }
            ClientEvent::NewUser(identity) => {
                self.presence.announce(peer_id.as_str(), "user-set", &identity);
                Ok(Value::Bool(true))
            }
            ClientEvent::DeleteUser(identity) => {
                self.presence.announce(peer_id.as_str(), "user-delete", &identity);
                Ok(Value::Bool(true))
            }
            ClientEvent::Message(data) => {
                info!(peer_id = %peer_id, %data, "Client sent message");
                Ok(Value::String("Hello world!".to_string()))
            }
        }
    }
}
