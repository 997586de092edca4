//! SFU Configuration

use crate::engine::WebRtcTransportOptions;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SfuConfig {
    /// Upper bound for every media engine request (milliseconds)
    pub request_timeout_ms: u64,
    /// Address the transports listen on
    pub listen_ip: IpAddr,
    /// Public address announced in ICE candidates
    pub announced_ip: Option<String>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub enable_sctp: bool,
    pub prefer_udp: bool,
    /// Maximum number of concurrent rooms (0 = unlimited)
    pub max_rooms: usize,
    /// Maximum peers per room (0 = unlimited)
    pub max_peers_per_room: usize,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announced_ip: None,
            enable_udp: true,
            enable_tcp: true,
            enable_sctp: true,
            prefer_udp: true,
            max_rooms: 0,
            max_peers_per_room: 0,
        }
    }
}

impl SfuConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Options every WebRTC transport is created with
    #[must_use]
    pub fn transport_options(&self) -> WebRtcTransportOptions {
        WebRtcTransportOptions {
            listen_ip: self.listen_ip,
            announced_address: self.announced_ip.clone().filter(|ip| !ip.is_empty()),
            enable_udp: self.enable_udp,
            enable_tcp: self.enable_tcp,
            prefer_udp: self.prefer_udp,
            enable_sctp: self.enable_sctp,
        }
    }
}
