//! Session handshake (C5): open the long-lived TCP control socket, exchange
//! `RP-DidBuf`/`RP-Nonce`, and derive per-session keys for all four
//! channels (auth/video/audio/feedback) via C1.

use crate::crypto::{KeyPurpose, SessionKeys, derive_session_keys};
use crate::http_lite::{HttpLiteError, read_response, send_request};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use remoteplay_protocol::{HandshakeConfig, HostType};
use std::net::IpAddr;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("network error during session handshake: {0}")]
    Network(#[from] HttpLiteError),
    #[error("console rejected the session request (HTTP {0})")]
    Rejected(u16),
    #[error("response missing required header: {0}")]
    MissingHeader(&'static str),
    #[error("RP-Nonce is not valid base64 or not 16 bytes")]
    BadNonce,
    #[error("rp_key must decode to 32 bytes, got {0}")]
    BadRpKey(usize),
    #[error("connection timed out after {0}ms")]
    Timeout(u64),
}

/// A live, post-handshake session: the retained control socket plus the
/// four derived key sets.
pub struct HandshakeOutput {
    pub control_socket: TcpStream,
    pub client_nonce: [u8; 32],
    pub server_nonce: [u8; 16],
    pub server_type: Option<String>,
    /// UDP port the takion transport should target. PS5 multiplexes
    /// control/video/audio over one port; PS4 advertises separate
    /// `RP-*-Port` headers the spec leaves unenumerated here, so this
    /// crate looks for a single `RP-Takion-Port` header and falls back to
    /// the session TCP port when absent (documented simplification).
    pub takion_port: u16,
    pub auth_keys: SessionKeys,
    pub video_keys: SessionKeys,
    pub audio_keys: SessionKeys,
    pub feedback_keys: SessionKeys,
}

fn rp_key_to_16_byte_nonce_input(rp_key_hex: &str) -> Result<[u8; 32], HandshakeError> {
    let bytes = hex::decode(rp_key_hex).map_err(|_| HandshakeError::BadRpKey(0))?;
    if bytes.len() != 32 {
        return Err(HandshakeError::BadRpKey(bytes.len()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Derive all four per-session key sets from the registered `rp_key`, the
/// client's `RP-DidBuf`, and the console's `RP-Nonce`. `derive_session_keys`
/// needs a 16-byte nonce, so the 32-byte `RP-DidBuf` is folded down by
/// XOR-ing its two halves (documented here as the scheme is not literal
/// from the spec's text, which only says the three values feed C1).
fn fold_didbuf(didbuf: &[u8; 32]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = didbuf[i] ^ didbuf[i + 16];
    }
    out
}

pub async fn handshake(
    host_ip: IpAddr,
    host_type: HostType,
    rp_key_hex: &str,
    regist_key_hex: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeOutput, HandshakeError> {
    let rp_key = rp_key_to_16_byte_nonce_input(rp_key_hex)?;

    let mut did_buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut did_buf);
    let did_buf_b64 = BASE64.encode(did_buf);

    let rp_version = match host_type {
        HostType::PS4 => "8.0",
        HostType::PS5 => "10.0",
    };
    let port = host_type.session_port();

    let connect = tokio::time::timeout(
        std::time::Duration::from_millis(config.tcp_timeout_ms),
        TcpStream::connect((host_ip, port)),
    )
    .await
    .map_err(|_| HandshakeError::Timeout(config.tcp_timeout_ms))?;
    let mut stream = connect.map_err(HttpLiteError::Io)?;

    send_request(
        &mut stream,
        "GET /sce/rp/session HTTP/1.1",
        &[
            ("RP-RegistKey", regist_key_hex.to_string()),
            ("RP-Version", rp_version.to_string()),
            ("RP-DidBuf", did_buf_b64),
            ("RP-OSType", config.os_type.clone()),
            ("RP-ConPath", config.con_path.clone()),
        ],
        b"",
    )
    .await?;

    let response = read_response(&mut stream).await?;
    if response.status != 200 {
        return Err(HandshakeError::Rejected(response.status));
    }

    let nonce_b64 = response
        .header("RP-Nonce")
        .ok_or(HandshakeError::MissingHeader("RP-Nonce"))?;
    let nonce_bytes = BASE64.decode(nonce_b64).map_err(|_| HandshakeError::BadNonce)?;
    if nonce_bytes.len() != 16 {
        return Err(HandshakeError::BadNonce);
    }
    let mut server_nonce = [0u8; 16];
    server_nonce.copy_from_slice(&nonce_bytes);

    let server_type = response.header("RP-ServerType").map(|s| s.to_string());
    let takion_port = response
        .header("RP-Takion-Port")
        .and_then(|v| v.parse().ok())
        .unwrap_or(port);

    let client_nonce = fold_didbuf(&did_buf);

    let derive = |purpose: KeyPurpose| {
        derive_session_keys(&rp_key, &client_nonce, &server_nonce, purpose)
            .expect("rp_key length already validated as 32 bytes")
    };

    info!(%host_ip, ?server_type, "session handshake complete");

    Ok(HandshakeOutput {
        control_socket: stream,
        client_nonce: did_buf,
        server_nonce,
        server_type,
        takion_port,
        auth_keys: derive(KeyPurpose::Auth),
        video_keys: derive(KeyPurpose::Video),
        audio_keys: derive(KeyPurpose::Audio),
        feedback_keys: derive(KeyPurpose::Feedback),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn fold_didbuf_is_deterministic_and_uses_both_halves() {
        let mut didbuf = [0u8; 32];
        for (i, b) in didbuf.iter_mut().enumerate() {
            *b = i as u8;
        }
        let folded = fold_didbuf(&didbuf);
        assert_eq!(folded, fold_didbuf(&didbuf));
        assert_ne!(folded, [0u8; 16]);
    }

    #[test]
    fn rejects_non_32_byte_rp_key() {
        let short = hex::encode([0u8; 16]);
        assert!(matches!(
            rp_key_to_16_byte_nonce_input(&short),
            Err(HandshakeError::BadRpKey(16))
        ));
    }

    #[tokio::test]
    async fn end_to_end_against_mock_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = crate::http_lite::read_request_for_test(&mut sock).await;
            assert!(request.request_line.starts_with("GET /sce/rp/session HTTP/1.1"));
            assert!(request.headers.contains_key("rp-didbuf"));

            let nonce = BASE64.encode([7u8; 16]);
            let header = format!(
                "HTTP/1.1 200 Ok\r\nRP-Nonce: {nonce}\r\nRP-ServerType: 2\r\nContent-Length: 0\r\n\r\n"
            );
            sock.write_all(header.as_bytes()).await.unwrap();
        });

        let rp_key_hex = hex::encode([0x42u8; 32]);
        let regist_key_hex = hex::encode([0x11u8; 16]);
        let config = HandshakeConfig::default();

        let output = handshake(addr.ip(), HostType::PS5, &rp_key_hex, &regist_key_hex, &config)
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(output.server_nonce, [7u8; 16]);
        assert_eq!(output.server_type.as_deref(), Some("2"));
        assert_ne!(output.video_keys.aes_key, output.audio_keys.aes_key);
    }

    #[tokio::test]
    async fn non_200_status_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = crate::http_lite::read_request_for_test(&mut sock).await;
            sock.write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });
        let rp_key_hex = hex::encode([0x42u8; 32]);
        let regist_key_hex = hex::encode([0x11u8; 16]);
        let config = HandshakeConfig::default();
        let result = handshake(addr.ip(), HostType::PS5, &rp_key_hex, &regist_key_hex, &config).await;
        server.await.unwrap();
        assert!(matches!(result, Err(HandshakeError::Rejected(403))));
    }
}
