//! Negotiation parameter types exchanged between clients and the media engine
//!
//! Field names follow the camelCase wire format that WebRTC client libraries
//! send. Parts the signaling plane never inspects (header extensions,
//! encodings, RTCP) are carried as opaque JSON.

use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// RTCP feedback mechanism supported by a codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

impl RtcpFeedback {
    fn new(kind: &str, parameter: &str) -> Self {
        Self {
            kind: kind.to_string(),
            parameter: parameter.to_string(),
        }
    }
}

/// A codec a router or an endpoint is able to handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// Whether this capability describes the same codec as `codec`.
    ///
    /// Mime types compare case-insensitively; channels only matter when both
    /// sides state them.
    #[must_use]
    pub fn matches(&self, codec: &RtpCodecParameters) -> bool {
        self.mime_type.eq_ignore_ascii_case(&codec.mime_type)
            && self.clock_rate == codec.clock_rate
            && match (self.channels, codec.channels) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

/// Capability set of a router or a receiving endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<Value>,
}

/// A codec as actually used on a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    /// Retransmission and FEC entries ride along with a media codec but are
    /// not media codecs themselves.
    #[must_use]
    pub fn is_media_codec(&self) -> bool {
        let subtype = self
            .mime_type
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        !matches!(subtype.as_str(), "rtx" | "red" | "ulpfec" | "flexfec")
    }
}

/// Parameters describing a sent or received RTP stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<Value>,
    #[serde(default)]
    pub encodings: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp: Option<Value>,
}

impl RtpParameters {
    /// First media codec of the stream
    #[must_use]
    pub fn media_codec(&self) -> Option<&RtpCodecParameters> {
        self.codecs.iter().find(|codec| codec.is_media_codec())
    }
}

/// Fixed codec set every router is created with:
/// Opus 48 kHz stereo and VP8 with a 90 kHz clock.
#[must_use]
pub fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            preferred_payload_type: None,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            preferred_payload_type: None,
            clock_rate: 90_000,
            channels: None,
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        },
    ]
}

/// Default RTCP feedback the router advertises for a media kind
#[must_use]
pub fn default_rtcp_feedback(kind: MediaKind) -> Vec<RtcpFeedback> {
    match kind {
        MediaKind::Audio => vec![RtcpFeedback::new("transport-cc", "")],
        MediaKind::Video => vec![
            RtcpFeedback::new("nack", ""),
            RtcpFeedback::new("nack", "pli"),
            RtcpFeedback::new("ccm", "fir"),
            RtcpFeedback::new("goog-remb", ""),
            RtcpFeedback::new("transport-cc", ""),
        ],
    }
}

/// ICE credentials of a server-side transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    pub ice_lite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCandidateType {
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCandidateTcpType {
    Passive,
}

/// ICE candidate gathered by the engine for a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub address: String,
    pub protocol: Protocol,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: IceCandidateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<IceCandidateTcpType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    #[default]
    Auto,
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS handshake material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    #[serde(default)]
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// SCTP association parameters (data channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpParameters {
    pub port: u16,
    #[serde(rename = "OS")]
    pub os: u16,
    #[serde(rename = "MIS")]
    pub mis: u16,
    pub max_message_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opus(payload_type: u8) -> RtpCodecParameters {
        RtpCodecParameters {
            mime_type: "audio/OPUS".to_string(),
            payload_type,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        }
    }

    #[test]
    fn test_fixed_codec_set() {
        let codecs = media_codecs();
        assert_eq!(codecs.len(), 2);
        assert_eq!(codecs[0].kind, MediaKind::Audio);
        assert_eq!(codecs[0].clock_rate, 48_000);
        assert_eq!(codecs[0].channels, Some(2));
        assert_eq!(codecs[1].kind, MediaKind::Video);
        assert_eq!(codecs[1].mime_type, "video/VP8");
        assert_eq!(codecs[1].clock_rate, 90_000);
    }

    #[test]
    fn test_capability_matching() {
        let audio = &media_codecs()[0];
        assert!(audio.matches(&opus(111)));

        let mut mono = opus(111);
        mono.channels = Some(1);
        assert!(!audio.matches(&mono));

        let mut wrong_clock = opus(111);
        wrong_clock.clock_rate = 16_000;
        assert!(!audio.matches(&wrong_clock));
    }

    #[test]
    fn test_media_codec_skips_rtx() {
        let params = RtpParameters {
            codecs: vec![
                RtpCodecParameters {
                    mime_type: "video/rtx".to_string(),
                    payload_type: 97,
                    clock_rate: 90_000,
                    channels: None,
                    parameters: Map::new(),
                    rtcp_feedback: Vec::new(),
                },
                RtpCodecParameters {
                    mime_type: "video/VP8".to_string(),
                    payload_type: 96,
                    clock_rate: 90_000,
                    channels: None,
                    parameters: Map::new(),
                    rtcp_feedback: Vec::new(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(params.media_codec().map(|c| c.payload_type), Some(96));
    }

    #[test]
    fn test_client_payloads_deserialize() {
        let caps: RtpCapabilities = serde_json::from_value(json!({
            "codecs": [{
                "kind": "audio",
                "mimeType": "audio/opus",
                "preferredPayloadType": 100,
                "clockRate": 48000,
                "channels": 2,
                "rtcpFeedback": [{ "type": "transport-cc" }]
            }],
            "headerExtensions": []
        }))
        .unwrap();
        assert_eq!(caps.codecs[0].preferred_payload_type, Some(100));

        let dtls: DtlsParameters = serde_json::from_value(json!({
            "role": "client",
            "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD" }]
        }))
        .unwrap();
        assert_eq!(dtls.role, DtlsRole::Client);
    }
}
