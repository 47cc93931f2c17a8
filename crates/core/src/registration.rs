//! Registration (C4): the one-shot encrypted HTTP exchange that turns a PIN
//! and a PSN account id into a durable `(rp_key, rp_key_type, regist_key,
//! host_nonce)` credential tuple.

use crate::crypto::CtrKeystream;
use crate::http_lite::{HttpLiteError, read_response, send_request};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use remoteplay_protocol::{DeviceRecord, HostType, RegistrationConfig};
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("network error talking to console: {0}")]
    Network(#[from] HttpLiteError),
    #[error("console rejected registration (HTTP {0}), check PIN")]
    Rejected(u16),
    #[error("response failed to decrypt/parse as a valid header block")]
    Corrupt,
    #[error("response missing required field: {0}")]
    Malformed(&'static str),
    #[error("PIN must be exactly 8 ASCII digits, got {0:?}")]
    InvalidPin(String),
    #[error("account id is not valid base64: {0}")]
    InvalidAccountId(String),
}

/// Result of a successful registration exchange (§4.4 output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationOutput {
    pub rp_key: String,
    pub rp_key_type: u8,
    pub regist_key: String,
    pub host_nonce: [u8; 8],
}

/// Validate the PIN is exactly 8 ASCII digit characters. Critically this
/// never round-trips through an integer type -- `"00001234"` must stay
/// eight distinct characters, not collapse to `1234` (§4.4, §8 boundary).
fn validate_pin(pin: &str) -> Result<(), RegistrationError> {
    if pin.len() == 8 && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(RegistrationError::InvalidPin(pin.to_string()))
    }
}

/// Fixed per-`HostType` AES-ECB key used as step two of the PIN-derived
/// cipher key schedule (§4.4 step 1: "a documented XOR/ECB schedule").
fn host_type_schedule_key(host_type: HostType) -> [u8; 16] {
    match host_type {
        HostType::PS4 => *b"RP-REGIST-PS4-K\0",
        HostType::PS5 => *b"RP-REGIST-PS5-K\0",
    }
}

/// XOR constant applied to the zero-padded PIN bytes before the ECB step.
const PIN_XOR_CONST: [u8; 16] = [
    0x5C, 0xA1, 0x3E, 0x7D, 0x90, 0x21, 0x4F, 0x88, 0x1B, 0xD6, 0x62, 0xF3, 0xA8, 0x09, 0x77, 0xEE,
];

fn xor16(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Derive the 16-byte AES-CTR key used for both the request and response
/// bodies, per §4.4 step 1.
pub fn regist_cipher_key(pin: &str, host_type: HostType) -> [u8; 16] {
    let mut pin_block = [0u8; 16];
    pin_block[0..8].copy_from_slice(pin.as_bytes());
    let xored = xor16(&pin_block, &PIN_XOR_CONST);

    use aes::Aes128;
    use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
    let cipher = Aes128::new(GenericArray::from_slice(&host_type_schedule_key(host_type)));
    let mut block = GenericArray::clone_from_slice(&xored);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// Build the plaintext body: a length-prefixed `(client_type, np_account_id,
/// counter)` record, documented here since the spec leaves the exact byte
/// layout of the "HTTP-style body" unspecified beyond its three fields.
fn build_plaintext_body(np_account_id: &[u8], counter: [u8; 8]) -> Vec<u8> {
    const CLIENT_TYPE: &[u8] = b"Windows";
    let mut body = Vec::with_capacity(2 + CLIENT_TYPE.len() + np_account_id.len() + 8);
    body.push(CLIENT_TYPE.len() as u8);
    body.extend_from_slice(CLIENT_TYPE);
    body.push(np_account_id.len() as u8);
    body.extend_from_slice(np_account_id);
    body.extend_from_slice(&counter);
    body
}

const REGIST_HEADER_LEN: usize = 16;

fn build_request_header(rp_version_ignored_counter_placeholder: u16, nonce: [u8; 8]) -> [u8; REGIST_HEADER_LEN] {
    let mut header = [0u8; REGIST_HEADER_LEN];
    header[0..2].copy_from_slice(&rp_version_ignored_counter_placeholder.to_be_bytes());
    header[2..10].copy_from_slice(&nonce);
    header
}

fn ctr_blocks_for_len(len: usize) -> u64 {
    ((len + 15) / 16) as u64
}

/// Parse a decrypted registration response body as `key:value` lines,
/// mirroring the header-block shape used by discovery (§4.4 step 5).
fn parse_response_fields(plain: &[u8]) -> Result<HashMap<String, String>, RegistrationError> {
    let text = std::str::from_utf8(plain).map_err(|_| RegistrationError::Corrupt)?;
    let mut fields = HashMap::new();
    for line in text.split(['\n', '\0']) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or(RegistrationError::Corrupt)?;
        fields.insert(key.trim().to_string(), value.trim().to_string());
    }
    if fields.is_empty() {
        return Err(RegistrationError::Corrupt);
    }
    Ok(fields)
}

/// Run the full registration exchange against a live console.
pub async fn register(
    host_ip: IpAddr,
    host_type: HostType,
    psn_account_id_base64: &str,
    pin: &str,
    config: &RegistrationConfig,
) -> Result<RegistrationOutput, RegistrationError> {
    validate_pin(pin)?;
    let np_account_id = BASE64
        .decode(psn_account_id_base64)
        .map_err(|e| RegistrationError::InvalidAccountId(e.to_string()))?;

    let key = regist_cipher_key(pin, host_type);
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut counter_field = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut counter_field);

    let mut plaintext = build_plaintext_body(&np_account_id, counter_field);
    let mut cipher = CtrKeystream::new(&key, nonce, 0);
    cipher.apply_keystream(&mut plaintext);
    let ciphertext = plaintext;

    let header = build_request_header(0, nonce);
    let mut body = Vec::with_capacity(REGIST_HEADER_LEN + ciphertext.len());
    body.extend_from_slice(&header);
    body.extend_from_slice(&ciphertext);

    let port = match host_type {
        HostType::PS4 => config.ps4_port,
        HostType::PS5 => config.ps5_port,
    };
    let rp_version = match host_type {
        HostType::PS4 => &config.rp_version_ps4,
        HostType::PS5 => &config.rp_version_ps5,
    };

    let connect_result = tokio::time::timeout(
        std::time::Duration::from_millis(config.http_timeout_ms),
        TcpStream::connect((host_ip, port)),
    )
    .await;
    let mut stream = match connect_result {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(HttpLiteError::Io(e).into()),
        Err(_) => return Err(HttpLiteError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "registration connect timed out")).into()),
    };

    send_request(
        &mut stream,
        "POST /sce/rp/regist HTTP/1.1",
        &[("RP-Version", rp_version.clone())],
        &body,
    )
    .await?;

    let response = read_response(&mut stream).await?;
    if response.status != 200 {
        warn!(status = response.status, "registration rejected by console");
        return Err(RegistrationError::Rejected(response.status));
    }

    let request_blocks = ctr_blocks_for_len(ciphertext.len());
    let mut response_plain = response.body;
    let mut response_cipher = CtrKeystream::new(&key, nonce, request_blocks);
    response_cipher.apply_keystream(&mut response_plain);

    let fields = parse_response_fields(&response_plain)?;
    let rp_key = fields
        .get("RP-Key")
        .ok_or(RegistrationError::Malformed("RP-Key"))?
        .clone();
    let rp_key_type: u8 = fields
        .get("RP-KeyType")
        .ok_or(RegistrationError::Malformed("RP-KeyType"))?
        .parse()
        .map_err(|_| RegistrationError::Malformed("RP-KeyType"))?;
    let regist_key = fields
        .get("RP-RegistKey")
        .ok_or(RegistrationError::Malformed("RP-RegistKey"))?
        .clone();

    debug!(server_type = ?fields.get("RP-Server-Type"), "registration succeeded");

    Ok(RegistrationOutput {
        rp_key,
        rp_key_type,
        regist_key,
        host_nonce: nonce,
    })
}

/// Fold a successful `RegistrationOutput` into a `DeviceRecord` ready for the
/// external device store (§4.4 step 6).
pub fn apply_registration_output(record: &mut DeviceRecord, output: &RegistrationOutput) {
    record.rp_key = Some(output.rp_key.clone());
    record.rp_key_type = Some(output.rp_key_type);
    record.regist_key = Some(output.regist_key.clone());
}
