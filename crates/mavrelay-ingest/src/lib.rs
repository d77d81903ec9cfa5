pub mod demo;
pub mod manager;
pub mod mav;
pub mod state;
pub mod udp;
pub mod upstream;

use std::net::{IpAddr, Ipv4Addr};

use serde::Deserialize;
use thiserror::Error;

pub use manager::IngestManager;
pub use state::{PortConfig, PortStatus};
pub use upstream::{RawRecord, RecordStream, Upstream};

/// MAVProxy's default UDP output port.
pub const DEFAULT_MAVLINK_PORT: u16 = 14550;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// UDP port the upstream (MAVProxy, SITL, a radio bridge) sends to.
    pub mavlink_port: u16,

    /// Synthesize telemetry instead of listening on the network.
    pub demo: bool,

    /// Listen address. Default 0.0.0.0
    pub bind: Option<IpAddr>,

    /// Demo generator tick. Default 50ms
    pub demo_tick_ms: Option<u64>,

    /// Envelopes buffered between ingest and the broadcast hub before
    /// new ones are dropped.
    pub queue_depth: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mavlink_port: DEFAULT_MAVLINK_PORT,
            demo: false,
            bind: None,
            demo_tick_ms: None,
            queue_depth: None,
        }
    }
}

impl IngestConfig {
    pub fn bind_addr(&self) -> IpAddr {
        self.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(64).max(1)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid port {0}")]
    InvalidPort(u16),
    #[error("unable to listen on udp port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("superseded by a newer connection attempt")]
    Superseded,
}
