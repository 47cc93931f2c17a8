//! Crypto primitives (C1): AES-ECB key derivation, an incremental AES-CTR
//! keystream, HMAC-SHA256, and the 4-byte GMAC-like tag used on every
//! takion/media packet. No internal failure mode -- callers validate MACs
//! and treat a mismatch as a counted, not propagated, event (§7).

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const AES_KEY_LEN: usize = 16;
pub const HMAC_KEY_LEN: usize = 32;
pub const GMAC_TAG_LEN: usize = 4;

/// Domain-separation purpose for key derivation. Each purpose XORs a fixed
/// 16-byte constant into the RP-key halves before the AES-ECB step, so the
/// same `(rp_key, nonce, server_nonce)` produces independent key material
/// per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    Auth,
    Video,
    Audio,
    Feedback,
}

impl KeyPurpose {
    fn constant(self) -> [u8; 16] {
        match self {
            KeyPurpose::Auth => *b"RP-AUTH-PURPOSE\0",
            KeyPurpose::Video => *b"RP-VIDEO-PURPOS\0",
            KeyPurpose::Audio => *b"RP-AUDIO-PURPOS\0",
            KeyPurpose::Feedback => *b"RP-FEEDBACK-PUR\0",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub aes_key: [u8; AES_KEY_LEN],
    pub hmac_key: [u8; HMAC_KEY_LEN],
    pub gmac_key: [u8; HMAC_KEY_LEN],
}

fn xor16(a: &[u8], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

fn aes_ecb_encrypt_block(key: &[u8; 16], block: [u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut ga = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut ga);
    ga.into()
}

/// Derive the per-channel `(aes_key, hmac_key, gmac_key)` triple for one
/// purpose. `rp_key` must be 32 bytes (the registered console secret);
/// `nonce` is the client `RP-DidBuf`-derived value, `server_nonce` is the
/// console's `RP-Nonce`. Deterministic: repeated calls with identical
/// inputs yield byte-identical output (§8 round-trip property).
pub fn derive_session_keys(
    rp_key: &[u8],
    nonce: &[u8; 16],
    server_nonce: &[u8; 16],
    purpose: KeyPurpose,
) -> Option<SessionKeys> {
    if rp_key.len() != 32 {
        return None;
    }
    let constant = purpose.constant();
    let k0 = xor16(&rp_key[0..16], &constant);
    let k1 = xor16(&rp_key[16..32], &constant);

    let aes_key = aes_ecb_encrypt_block(nonce, k0);
    let hmac_seed = aes_ecb_encrypt_block(nonce, k1);

    let mut mac = HmacSha256::new_from_slice(&hmac_seed).expect("HMAC accepts any key length");
    mac.update(server_nonce);
    let hmac_key: [u8; HMAC_KEY_LEN] = mac.finalize().into_bytes().into();

    let mut gmac_mac = HmacSha256::new_from_slice(&hmac_key).expect("HMAC accepts any key length");
    gmac_mac.update(b"gmac");
    gmac_mac.update(server_nonce);
    let gmac_key: [u8; HMAC_KEY_LEN] = gmac_mac.finalize().into_bytes().into();

    Some(SessionKeys {
        aes_key,
        hmac_key,
        gmac_key,
    })
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; HMAC_KEY_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Compute the 4-byte GMAC-like tag covering `data` (typically a takion
/// packet's header+payload, or a media packet's header+ciphertext) plus the
/// channel sequence number.
pub fn gmac_tag(gmac_key: &[u8], data: &[u8], sequence: u32) -> [u8; GMAC_TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(gmac_key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.update(&sequence.to_be_bytes());
    let full = mac.finalize().into_bytes();
    let mut tag = [0u8; GMAC_TAG_LEN];
    tag.copy_from_slice(&full[0..GMAC_TAG_LEN]);
    tag
}

/// Constant-time equality for MAC/tag/key comparisons (mandatory per §4.1 --
/// a timing leak here defeats the crypto layer's own guarantees).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Incremental AES-CTR keystream. The counter is a 64-bit little-endian
/// value occupying the low 8 bytes of each 16-byte block; the high 8 bytes
/// are a fixed per-channel IV (§4.1: "initialized per channel from the
/// session nonce").
pub struct CtrKeystream {
    cipher: Aes128,
    iv_high: [u8; 8],
    counter: u64,
}

impl CtrKeystream {
    pub fn new(key: &[u8; AES_KEY_LEN], iv_high: [u8; 8], counter_start: u64) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(key)),
            iv_high,
            counter: counter_start,
        }
    }

    fn next_block(&mut self) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[0..8].copy_from_slice(&self.iv_high);
        block[8..16].copy_from_slice(&self.counter.to_le_bytes());
        self.counter = self.counter.wrapping_add(1);
        let mut ga = GenericArray::clone_from_slice(&block);
        self.cipher.encrypt_block(&mut ga);
        ga.into()
    }

    /// XOR `data` in place with the keystream, advancing the internal
    /// counter by `ceil(data.len() / 16)` blocks.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        let mut offset = 0;
        while offset < data.len() {
            let block = self.next_block();
            let end = (offset + 16).min(data.len());
            for (b, k) in data[offset..end].iter_mut().zip(block.iter()) {
                *b ^= k;
            }
            offset = end;
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// One-shot helper for callers that don't need to keep a live keystream
/// across multiple buffers (e.g. the registration body cipher in C4).
pub fn aes_ctr_apply(key: &[u8; AES_KEY_LEN], iv_high: [u8; 8], counter_start: u64, data: &mut [u8]) {
    CtrKeystream::new(key, iv_high, counter_start).apply_keystream(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_derivation_is_deterministic() {
        let rp_key = [0x42u8; 32];
        let nonce = [0x11u8; 16];
        let server_nonce = [0x22u8; 16];
        let a = derive_session_keys(&rp_key, &nonce, &server_nonce, KeyPurpose::Video).unwrap();
        let b = derive_session_keys(&rp_key, &nonce, &server_nonce, KeyPurpose::Video).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_purposes_yield_different_keys() {
        let rp_key = [0x42u8; 32];
        let nonce = [0x11u8; 16];
        let server_nonce = [0x22u8; 16];
        let auth = derive_session_keys(&rp_key, &nonce, &server_nonce, KeyPurpose::Auth).unwrap();
        let video = derive_session_keys(&rp_key, &nonce, &server_nonce, KeyPurpose::Video).unwrap();
        assert_ne!(auth.aes_key, video.aes_key);
        assert_ne!(auth.hmac_key, video.hmac_key);
    }

    #[test]
    fn wrong_length_rp_key_is_rejected() {
        let rp_key = [0u8; 16];
        let nonce = [0u8; 16];
        let server_nonce = [0u8; 16];
        assert!(derive_session_keys(&rp_key, &nonce, &server_nonce, KeyPurpose::Auth).is_none());
    }

    #[test]
    fn ctr_keystream_roundtrips() {
        let key = [0x77u8; 16];
        let iv_high = [0x01u8; 8];
        let mut data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let original = data.clone();

        let mut enc = CtrKeystream::new(&key, iv_high, 0);
        enc.apply_keystream(&mut data);
        assert_ne!(data, original);

        let mut dec = CtrKeystream::new(&key, iv_high, 0);
        dec.apply_keystream(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn ctr_keystream_counter_advances_per_block() {
        let key = [0x01u8; 16];
        let mut ks = CtrKeystream::new(&key, [0; 8], 5);
        let mut buf = vec![0u8; 33]; // 3 blocks
        ks.apply_keystream(&mut buf);
        assert_eq!(ks.counter(), 8);
    }

    #[test]
    fn gmac_tag_changes_with_sequence() {
        let key = [0x9u8; 32];
        let data = b"payload";
        let t1 = gmac_tag(&key, data, 1);
        let t2 = gmac_tag(&key, data, 2);
        assert_ne!(t1, t2);
    }

    #[test]
    fn constant_time_eq_matches_slice_eq() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn hmac_sha256_is_32_bytes_and_deterministic() {
        let a = hmac_sha256(b"key", b"message");
        let b = hmac_sha256(b"key", b"message");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
