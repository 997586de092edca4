use crate::protocol::PushFrame;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handle for a client connection subscription
pub type ConnectionId = String;

/// Frame sender for a client connection
pub type PresenceSender = mpsc::UnboundedSender<PushFrame>;

/// Roster broadcast group every connection belongs to.
///
/// Independent of room and media state: it only relays the identity strings
/// clients announce with `new-user` / `delete-user`.
#[derive(Clone)]
pub struct PresenceHub {
    group: Arc<str>,
    members: Arc<DashMap<ConnectionId, PresenceSender>>,
}

impl PresenceHub {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: Arc::from(group.into()),
            members: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Add a connection to the group. Returns its receiver for roster frames.
    pub fn subscribe(&self, connection_id: &str) -> mpsc::UnboundedReceiver<PushFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.members.insert(connection_id.to_string(), tx);

        debug!(
            group = %self.group,
            connection_id = %connection_id,
            members = self.members.len(),
            "Connection joined presence group"
        );
        rx
    }

    pub fn unsubscribe(&self, connection_id: &str) {
        if self.members.remove(connection_id).is_none() {
            warn!(
                connection_id = %connection_id,
                "Attempted to unsubscribe unknown connection"
            );
        }
    }

    /// Send `event{identity}` to every other member and echo it back to
    /// `from`. Returns the number of other members reached.
    pub fn announce(&self, from: &str, event: &str, identity: &str) -> usize {
        let frame = PushFrame::new(event, Value::String(identity.to_string()));
        let mut sent_count = 0;
        let mut failed_connections = Vec::new();

        for member in self.members.iter() {
            if member.key() == from {
                continue;
            }
            if member.value().send(frame.clone()).is_ok() {
                sent_count += 1;
            } else {
                failed_connections.push(member.key().clone());
            }
        }

        // Disconnected receivers are dropped from the group
        for connection_id in failed_connections {
            self.members.remove(&connection_id);
        }

        if let Some(sender) = self.members.get(from) {
            if sender.send(frame).is_err() {
                debug!(connection_id = %from, "Presence echo dropped, connection gone");
            }
        }

        info!(group = %self.group, event, identity, sent_count, "Presence broadcast");
        sent_count
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_announce_reaches_others_and_echoes() {
        let hub = PresenceHub::new("MAIN");
        let mut a = hub.subscribe("a");
        let mut b = hub.subscribe("b");
        let mut c = hub.subscribe("c");

        assert_eq!(hub.announce("a", "user-set", "alice"), 2);

        for rx in [&mut a, &mut b, &mut c] {
            let frame = rx.try_recv().unwrap();
            assert_eq!(frame.event, "user-set");
            assert_eq!(frame.data, json!("alice"));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_unsubscribed_members_are_skipped() {
        let hub = PresenceHub::new("MAIN");
        let _a = hub.subscribe("a");
        let b = hub.subscribe("b");
        hub.subscribe("c");
        drop(b);
        hub.unsubscribe("c");

        assert_eq!(hub.announce("a", "user-delete", "alice"), 0);
        assert_eq!(hub.member_count(), 1);
    }
}
