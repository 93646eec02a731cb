//! Per-second weight telemetry over UDP.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use serde_json::{Map, Value, json};
use tracing::warn;

use metamac_core::ProtocolSuite;

/// Telemetry datagrams go to this port on the collector.
pub const TELEMETRY_PORT: u16 = 4321;

pub struct Telemetry {
    socket: UdpSocket,
    target: SocketAddr,
}

impl Telemetry {
    pub fn new(collector: Ipv4Addr) -> io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?,
            target: SocketAddr::from((collector, TELEMETRY_PORT)),
        })
    }

    /// Send one weights snapshot. Telemetry is best-effort: failures are
    /// logged and swallowed.
    pub fn send(&self, suite: &ProtocolSuite) {
        let payload = render(suite);
        if let Err(err) = self.socket.send_to(payload.as_bytes(), self.target) {
            warn!(%err, target = %self.target, "telemetry send failed");
        }
    }
}

fn render(suite: &ProtocolSuite) -> String {
    let mut object = Map::new();
    let active = match suite.active_protocol() {
        Some(index) => index.to_string(),
        None => "-1".into(),
    };
    object.insert("active".into(), Value::String(active));

    for (index, (weight, protocol)) in suite
        .weights()
        .iter()
        .zip(suite.protocols())
        .enumerate()
    {
        object.insert(
            index.to_string(),
            json!([format!("{weight:5.3}"), protocol.name.clone()]),
        );
    }

    Value::Object(object).to_string()
}
