//! Wake (C3): fire-and-forget `WAKEUP` datagram plus a poll-until-ready
//! helper built on top of C2 discovery.

use crate::discovery::{DiscoveryError, discover};
use remoteplay_protocol::{DiscoveryConfig, HostState, HostType, WakeConfig};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum WakeError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("host did not reach Ready state within the wake timeout")]
    Timeout,
    #[error("discovery error while polling for wake: {0}")]
    Discovery(#[from] DiscoveryError),
}

fn build_wakeup_request(credential: &str) -> Vec<u8> {
    format!(
        "WAKEUP * HTTP/1.1\nclient-type:Windows\nauth-type:C\nmodel:w\napp-type:r\nuser-credential:{credential}\n\n"
    )
    .into_bytes()
}

/// Send the `WAKEUP` datagram. No acknowledgement is expected; the caller
/// polls discovery separately (`wake_and_wait`) to learn when the console
/// comes up.
pub async fn wake(host_ip: IpAddr, credential: &str, config: &WakeConfig) -> Result<(), WakeError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    let target: SocketAddr = (host_ip, config.target_port).into();
    let request = build_wakeup_request(credential);
    socket.send_to(&request, target).await?;
    info!(%host_ip, "sent WAKEUP");
    Ok(())
}

/// Send `WAKEUP` then poll discovery every `poll_interval_ms` until the host
/// reports `Ready` or `config.timeout_ms` elapses (`WakeError::Timeout`).
pub async fn wake_and_wait(
    host_ip: IpAddr,
    host_id: &str,
    credential: &str,
    wake_config: &WakeConfig,
    discovery_config: &DiscoveryConfig,
) -> Result<(), WakeError> {
    wake(host_ip, credential, wake_config).await?;

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(wake_config.timeout_ms);
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(WakeError::Timeout);
        }
        let hosts = discover(discovery_config, Some(host_ip)).await?;
        if let Some(found) = hosts.iter().find(|h| h.host_id == host_id)
            && found.host_state == HostState::Ready
        {
            debug!(%host_ip, host_id, "host reached Ready state");
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(wake_config.poll_interval_ms)).await;
    }
}

/// §7: `WakeTimeout` is retried exactly once automatically before surfacing
/// to the caller.
pub async fn wake_and_wait_with_retry(
    host_ip: IpAddr,
    host_id: &str,
    credential: &str,
    host_type: HostType,
    wake_config: &WakeConfig,
    discovery_config: &DiscoveryConfig,
) -> Result<(), WakeError> {
    let _ = host_type; // credential scheme does not vary by generation today
    match wake_and_wait(host_ip, host_id, credential, wake_config, discovery_config).await {
        Err(WakeError::Timeout) => {
            info!(%host_ip, "wake timed out once, retrying");
            wake_and_wait(host_ip, host_id, credential, wake_config, discovery_config).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakeup_request_contains_credential_and_headers() {
        let bytes = build_wakeup_request("deadbeef");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("WAKEUP * HTTP/1.1\n"));
        assert!(text.contains("user-credential:deadbeef"));
        assert!(text.contains("client-type:Windows"));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn wake_sends_datagram_to_mock_server() {
        let mock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mock_addr = mock.local_addr().unwrap();

        let config = WakeConfig {
            target_port: mock_addr.port(),
            ..Default::default()
        };

        wake(mock_addr.ip(), "cred123", &config).await.unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = mock.recv_from(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..len]);
        assert!(text.contains("user-credential:cred123"));
    }

    #[tokio::test]
    async fn wake_and_wait_times_out_when_host_never_appears() {
        let config = WakeConfig {
            timeout_ms: 50,
            poll_interval_ms: 10,
            target_port: 1, // nobody listens here
            ..Default::default()
        };
        let discovery_config = DiscoveryConfig {
            listen_port: 0,
            timeout_ms: 10,
            ..Default::default()
        };
        let result = wake_and_wait(
            "127.0.0.1".parse().unwrap(),
            "deadbeef",
            "cred",
            &config,
            &discovery_config,
        )
        .await;
        assert!(matches!(result, Err(WakeError::Timeout)));
    }
}
