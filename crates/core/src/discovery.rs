//! Discovery (C2): UDP `SRCH` probing and newline-delimited header-block
//! response parsing.

use remoteplay_protocol::{DiscoveryConfig, HostInfo, HostState, HostType};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("response missing required header: {0}")]
    MissingHeader(&'static str),
    #[error("response has no request line")]
    MissingRequestLine,
    #[error("malformed port in host-request-port: {0}")]
    BadPort(String),
    #[error("unknown host type: {0}")]
    BadHostType(String),
    #[error("host-state absent: host is offline")]
    Offline,
    #[error("unrecognized host-state value: {0}")]
    BadHostState(String),
}

/// Parse one discovery response datagram into a `HostInfo`. A response with
/// no `host-state` header is treated as "offline" (§4.2) and rejected with
/// `DiscoveryError::Offline` rather than synthesizing a state.
pub fn parse_discovery_response(bytes: &[u8]) -> Result<HostInfo, DiscoveryError> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

    let request_line = lines.next().ok_or(DiscoveryError::MissingRequestLine)?;
    if !request_line.starts_with("HTTP/1.1 200") {
        return Err(DiscoveryError::MissingRequestLine);
    }

    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let host_id = headers
        .get("host-id")
        .ok_or(DiscoveryError::MissingHeader("host-id"))?
        .clone();
    let host_type_raw = headers
        .get("host-type")
        .ok_or(DiscoveryError::MissingHeader("host-type"))?;
    let host_type: HostType = host_type_raw
        .parse()
        .map_err(|_| DiscoveryError::BadHostType(host_type_raw.clone()))?;
    let host_name = headers
        .get("host-name")
        .ok_or(DiscoveryError::MissingHeader("host-name"))?
        .clone();
    let host_request_port: u16 = headers
        .get("host-request-port")
        .ok_or(DiscoveryError::MissingHeader("host-request-port"))?
        .parse()
        .map_err(|_| DiscoveryError::BadPort(headers["host-request-port"].clone()))?;
    let system_version = headers
        .get("system-version")
        .ok_or(DiscoveryError::MissingHeader("system-version"))?
        .clone();
    let host_state_raw = headers.get("host-state").ok_or(DiscoveryError::Offline)?;
    let host_state: HostState = host_state_raw
        .parse()
        .map_err(|_| DiscoveryError::BadHostState(host_state_raw.clone()))?;

    Ok(HostInfo {
        host_id,
        host_type,
        host_name,
        host_request_port,
        system_version,
        host_state,
    })
}

/// Re-serialize a `HostInfo` into the same header-block shape discovery
/// receives, for the round-trip test in §8. Header order need not match the
/// original (headers are parsed order-independently).
pub fn serialize_host_info(info: &HostInfo) -> String {
    format!(
        "HTTP/1.1 200 Ok\nhost-id:{}\nhost-type:{}\nhost-name:{}\nhost-request-port:{}\nsystem-version:{}\nhost-state:{}\n\n",
        info.host_id,
        info.host_type,
        info.host_name,
        info.host_request_port,
        info.system_version,
        info.host_state.as_str(),
    )
}

fn build_search_request(protocol_version: &str) -> Vec<u8> {
    format!("SRCH * HTTP/1.1\ndevice-discovery-protocol-version:{protocol_version}\n\n").into_bytes()
}

/// Send `SRCH` and collect responses for `config.timeout_ms`. `host` targets
/// a single IP with unicast; `None` broadcasts on the local subnet.
/// Duplicate responses (same `host-id`) are merged, preferring the latest.
pub async fn discover(
    config: &DiscoveryConfig,
    host: Option<IpAddr>,
) -> Result<Vec<HostInfo>, DiscoveryError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.listen_port)).await?;
    let request = build_search_request(&config.protocol_version);

    let target: SocketAddr = match host {
        Some(ip) => (ip, config.target_port).into(),
        None => {
            socket.set_broadcast(true)?;
            (Ipv4Addr::BROADCAST, config.target_port).into()
        }
    };
    socket.send_to(&request, target).await?;
    debug!(?target, "sent SRCH discovery probe");

    let mut merged: HashMap<String, HostInfo> = HashMap::new();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(config.timeout_ms);
    let mut buf = [0u8; 2048];

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => match parse_discovery_response(&buf[..len]) {
                Ok(info) => {
                    trace!(?from, host_id = %info.host_id, "discovery response parsed");
                    merged.insert(info.host_id.clone(), info);
                }
                Err(DiscoveryError::Offline) => {
                    debug!(?from, "discovery response has no host-state, treating as offline");
                }
                Err(e) => {
                    warn!(?from, error = %e, "discarding malformed discovery response");
                }
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => break,
        }
    }

    Ok(merged.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = "HTTP/1.1 200 Ok\nhost-id:1122334455AA\nhost-type:PS5\nhost-name:PS5-LivingRoom\nhost-request-port:9295\nsystem-version:07020001\nhost-state:Ready\n\n";

    #[test]
    fn parses_canonical_ready_response() {
        let info = parse_discovery_response(CANONICAL.as_bytes()).unwrap();
        assert_eq!(info.host_id, "1122334455AA");
        assert_eq!(info.host_type, HostType::PS5);
        assert_eq!(info.host_name, "PS5-LivingRoom");
        assert_eq!(info.host_request_port, 9295);
        assert_eq!(info.system_version, "07020001");
        assert_eq!(info.host_state, HostState::Ready);
    }

    #[test]
    fn missing_host_state_is_offline() {
        let text = CANONICAL.replace("host-state:Ready\n", "");
        assert!(matches!(
            parse_discovery_response(text.as_bytes()),
            Err(DiscoveryError::Offline)
        ));
    }

    #[test]
    fn non_200_status_is_rejected() {
        let text = CANONICAL.replace("HTTP/1.1 200 Ok", "HTTP/1.1 500 Error");
        assert!(parse_discovery_response(text.as_bytes()).is_err());
    }

    #[test]
    fn reserialize_then_reparse_is_idempotent() {
        let info = parse_discovery_response(CANONICAL.as_bytes()).unwrap();
        let reserialized = serialize_host_info(&info);
        let reparsed = parse_discovery_response(reserialized.as_bytes()).unwrap();
        assert_eq!(info, reparsed);
    }

    #[tokio::test]
    async fn discover_against_mock_udp_server() {
        let mock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mock_addr = mock.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, from) = mock.recv_from(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..len]).starts_with("SRCH * HTTP/1.1"));
            mock.send_to(CANONICAL.as_bytes(), from).await.unwrap();
        });

        let mut config = DiscoveryConfig::default();
        config.listen_port = 0; // ephemeral client port for the test
        config.target_port = mock_addr.port();
        config.timeout_ms = 500;

        let hosts = discover(&config, Some(mock_addr.ip())).await.unwrap();
        responder.await.unwrap();

        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host_id, "1122334455AA");
        assert_eq!(hosts[0].host_state, HostState::Ready);
    }

    #[tokio::test]
    async fn duplicate_host_id_keeps_latest() {
        let mut merged: HashMap<String, HostInfo> = HashMap::new();
        let first = parse_discovery_response(CANONICAL.as_bytes()).unwrap();
        let mut second = first.clone();
        second.host_name = "Renamed".to_string();
        merged.insert(first.host_id.clone(), first);
        merged.insert(second.host_id.clone(), second.clone());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[&second.host_id].host_name, "Renamed");
    }
}
