//! SDP answer generation
//!
//! The endpoint always answers with the same single audio stream: PCMU, PCMA
//! and telephone-event on a fixed port. Output is a pure function of the media
//! address and port, byte for byte.

use std::net::IpAddr;

use crate::config::DEFAULT_MEDIA_PORT;

/// Content-Type of an SDP body
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// A codec offered in the media line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    pub payload_type: u8,
    pub encoding: &'static str,
    pub clock_rate: u32,
}

/// Offered codecs, in media-line order
pub const SUPPORTED_CODECS: [Codec; 3] = [
    Codec {
        payload_type: 0,
        encoding: "PCMU",
        clock_rate: 8000,
    },
    Codec {
        payload_type: 8,
        encoding: "PCMA",
        clock_rate: 8000,
    },
    Codec {
        payload_type: 101,
        encoding: "telephone-event",
        clock_rate: 8000,
    },
];

/// Builds the local session description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdpNegotiator {
    media_port: u16,
}

impl Default for SdpNegotiator {
    fn default() -> Self {
        Self::new(DEFAULT_MEDIA_PORT)
    }
}

impl SdpNegotiator {
    pub fn new(media_port: u16) -> Self {
        Self { media_port }
    }

    pub fn media_port(&self) -> u16 {
        self.media_port
    }

    /// Session description advertising `media_ip`, lines terminated by CRLF.
    pub fn negotiate(&self, media_ip: IpAddr) -> String {
        let addr_type = match media_ip {
            IpAddr::V4(_) => "IP4",
            IpAddr::V6(_) => "IP6",
        };
        let payload_types = SUPPORTED_CODECS
            .iter()
            .map(|codec| codec.payload_type.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        let mut lines = vec![
            "v=0".to_string(),
            format!("o=- 0 0 IN {} {}", addr_type, media_ip),
            "s=SIP Call".to_string(),
            format!("c=IN {} {}", addr_type, media_ip),
            "t=0 0".to_string(),
            format!("m=audio {} RTP/AVP {}", self.media_port, payload_types),
        ];
        lines.extend(SUPPORTED_CODECS.iter().map(|codec| {
            format!("a=rtpmap:{} {}/{}", codec.payload_type, codec.encoding, codec.clock_rate)
        }));
        lines.extend(["a=fmtp:101 0-16", "a=ptime:20", "a=sendrecv"].map(String::from));

        let mut sdp = lines.join("\r\n");
        sdp.push_str("\r\n");
        sdp
    }
}

/// SDP answer on the default media port.
pub fn negotiate(media_ip: IpAddr) -> String {
    SdpNegotiator::default().negotiate(media_ip)
}
