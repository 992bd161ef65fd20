//! Web Push payload encryption, `aesgcm` content encoding.
//!
//! The sender generates an ephemeral P-256 key pair and a random 16-byte salt
//! per message. The ECDH secret with the subscriber's `p256dh` key is mixed
//! with the subscriber's auth secret through HKDF-SHA256 to derive a 128-bit
//! content key and a 96-bit nonce. The payload is sent as one AES-128-GCM
//! record prefixed with a 2-byte big-endian padding length.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::error::PushError;

pub const AUTH_SECRET_LEN: usize = 16;
pub const SALT_LEN: usize = 16;

/// Largest payload (plus padding) that fits one 4096-byte record.
pub const MAX_PAYLOAD_LEN: usize = 4096 - 16 - 2;

const AUTH_INFO: &[u8] = b"Content-Encoding: auth\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aesgcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// Ciphertext plus the values the receiver needs to decrypt it.
#[derive(Debug, Clone)]
pub struct Encrypted {
    pub ciphertext: Vec<u8>,
    pub salt: [u8; SALT_LEN],
    /// Ephemeral sender public key, uncompressed SEC1 (65 bytes).
    pub public_key: Vec<u8>,
}

impl Encrypted {
    /// Value of the `Encryption` header.
    pub fn encryption_header(&self) -> String {
        format!("salt={}", URL_SAFE.encode(self.salt))
    }

    /// Value of the `Crypto-Key` header.
    pub fn crypto_key_header(&self) -> String {
        format!("dh={}", URL_SAFE.encode(&self.public_key))
    }
}

struct ContentKeys {
    cek: [u8; 16],
    nonce: [u8; 12],
}

/// Encrypt `payload` for a subscription identified by its `p256dh` key and auth secret.
pub fn encrypt(
    p256dh: &str,
    auth: &str,
    payload: &[u8],
    padding: usize,
) -> Result<Encrypted, PushError> {
    let receiver = parse_public_key("p256dh key", &decode_base64url("p256dh key", p256dh)?)?;
    let auth_secret = decode_base64url("auth secret", auth)?;
    if auth_secret.len() != AUTH_SECRET_LEN {
        return Err(PushError::Encryption(format!(
            "auth secret must be {} bytes, got {}",
            AUTH_SECRET_LEN,
            auth_secret.len()
        )));
    }
    if payload.len() + padding > MAX_PAYLOAD_LEN {
        return Err(PushError::Encryption(format!(
            "payload of {} bytes (+{} padding) exceeds {} bytes",
            payload.len(),
            padding,
            MAX_PAYLOAD_LEN
        )));
    }

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let sender_public = ephemeral.public_key().to_encoded_point(false);
    let receiver_public = receiver.to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(&receiver);

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let keys = derive_keys(
        shared.raw_secret_bytes().as_slice(),
        &auth_secret,
        &salt,
        receiver_public.as_bytes(),
        sender_public.as_bytes(),
    )?;

    let mut record = Vec::with_capacity(2 + padding + payload.len());
    record.extend_from_slice(&(padding as u16).to_be_bytes());
    record.resize(2 + padding, 0);
    record.extend_from_slice(payload);

    let cipher = Aes128Gcm::new_from_slice(&keys.cek)
        .map_err(|e| PushError::Encryption(format!("invalid content key: {}", e)))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&keys.nonce), record.as_slice())
        .map_err(|_| PushError::Encryption("AES-GCM encryption failed".to_string()))?;

    Ok(Encrypted {
        ciphertext,
        salt,
        public_key: sender_public.as_bytes().to_vec(),
    })
}

/// Decrypt an `aesgcm` record on the receiving side.
pub fn decrypt(
    receiver: &SecretKey,
    auth_secret: &[u8],
    salt: &[u8],
    sender_public: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, PushError> {
    let sender = parse_public_key("sender key", sender_public)?;
    let shared = p256::ecdh::diffie_hellman(receiver.to_nonzero_scalar(), sender.as_affine());
    let receiver_public = receiver.public_key().to_encoded_point(false);
    let sender_public = sender.to_encoded_point(false);

    let keys = derive_keys(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        salt,
        receiver_public.as_bytes(),
        sender_public.as_bytes(),
    )?;

    let cipher = Aes128Gcm::new_from_slice(&keys.cek)
        .map_err(|e| PushError::Encryption(format!("invalid content key: {}", e)))?;
    let record = cipher
        .decrypt(Nonce::from_slice(&keys.nonce), ciphertext)
        .map_err(|_| PushError::Encryption("AES-GCM authentication failed".to_string()))?;

    if record.len() < 2 {
        return Err(PushError::Encryption("record shorter than padding header".to_string()));
    }
    let padding = u16::from_be_bytes([record[0], record[1]]) as usize;
    let body = record
        .get(2 + padding..)
        .ok_or_else(|| PushError::Encryption("padding length exceeds record".to_string()))?;
    if record[2..2 + padding].iter().any(|b| *b != 0) {
        return Err(PushError::Encryption("non-zero padding".to_string()));
    }

    Ok(body.to_vec())
}

/// Decode base64url with or without padding; the standard alphabet is tolerated.
pub fn decode_base64url(field: &str, value: &str) -> Result<Vec<u8>, PushError> {
    let normalized: String = value
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();

    URL_SAFE_NO_PAD
        .decode(normalized)
        .map_err(|e| PushError::Encryption(format!("{} is not valid base64: {}", field, e)))
}

fn parse_public_key(field: &str, bytes: &[u8]) -> Result<PublicKey, PushError> {
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| PushError::Encryption(format!("{} is not a valid P-256 public key", field)))
}

fn derive_keys(
    shared_secret: &[u8],
    auth_secret: &[u8],
    salt: &[u8],
    receiver_public: &[u8],
    sender_public: &[u8],
) -> Result<ContentKeys, PushError> {
    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret), shared_secret)
        .expand(AUTH_INFO, &mut ikm)
        .map_err(|e| PushError::Encryption(format!("HKDF auth expansion failed: {}", e)))?;

    let context = key_context(receiver_public, sender_public);
    let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);

    let mut cek = [0u8; 16];
    hk.expand_multi_info(&[CEK_INFO, context.as_slice()], &mut cek)
        .map_err(|e| PushError::Encryption(format!("HKDF key expansion failed: {}", e)))?;

    let mut nonce = [0u8; 12];
    hk.expand_multi_info(&[NONCE_INFO, context.as_slice()], &mut nonce)
        .map_err(|e| PushError::Encryption(format!("HKDF nonce expansion failed: {}", e)))?;

    Ok(ContentKeys { cek, nonce })
}

/// `"P-256\0" || len(receiver) || receiver || len(sender) || sender`, lengths as u16 BE.
fn key_context(receiver_public: &[u8], sender_public: &[u8]) -> Vec<u8> {
    let mut context = Vec::with_capacity(6 + 4 + receiver_public.len() + sender_public.len());
    context.extend_from_slice(b"P-256\0");
    context.extend_from_slice(&(receiver_public.len() as u16).to_be_bytes());
    context.extend_from_slice(receiver_public);
    context.extend_from_slice(&(sender_public.len() as u16).to_be_bytes());
    context.extend_from_slice(sender_public);
    context
}

/// Subscriber-side key material, as a browser would generate it.
pub struct ReceiverKeys {
    secret: SecretKey,
    auth: [u8; AUTH_SECRET_LEN],
}

impl ReceiverKeys {
    pub fn generate() -> Self {
        let mut auth = [0u8; AUTH_SECRET_LEN];
        OsRng.fill_bytes(&mut auth);
        Self {
            secret: SecretKey::random(&mut OsRng),
            auth,
        }
    }

    /// base64url `p256dh` value to register with the sender.
    pub fn p256dh(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.secret.public_key().to_encoded_point(false).as_bytes())
    }

    /// base64url auth secret to register with the sender.
    pub fn auth(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.auth)
    }

    pub fn decrypt(
        &self,
        salt: &[u8],
        sender_public: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PushError> {
        decrypt(&self.secret, &self.auth, salt, sender_public, ciphertext)
    }

    /// Decrypt from the wire form: `Encryption` and `Crypto-Key` header values plus the body.
    pub fn decrypt_from_headers(
        &self,
        encryption: &str,
        crypto_key: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, PushError> {
        let salt = header_param(encryption, "salt")
            .ok_or_else(|| PushError::Encryption("missing salt parameter".to_string()))?;
        let dh = header_param(crypto_key, "dh")
            .ok_or_else(|| PushError::Encryption("missing dh parameter".to_string()))?;
        self.decrypt(
            &decode_base64url("salt", salt)?,
            &decode_base64url("dh", dh)?,
            body,
        )
    }
}

fn header_param<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split([';', ','])
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let keys = ReceiverKeys::generate();
        let payload = br#"{"title":"hello","body":"world"}"#;

        let encrypted = encrypt(&keys.p256dh(), &keys.auth(), payload, 0).unwrap();
        assert_eq!(encrypted.public_key.len(), 65);
        // 2-byte padding header + payload + 16-byte tag
        assert_eq!(encrypted.ciphertext.len(), 2 + payload.len() + 16);

        let plaintext = keys
            .decrypt(&encrypted.salt, &encrypted.public_key, &encrypted.ciphertext)
            .unwrap();
        assert_eq!(plaintext, payload);
    }

    #[test]
    fn test_round_trip_with_padding() {
        let keys = ReceiverKeys::generate();
        let encrypted = encrypt(&keys.p256dh(), &keys.auth(), b"padded", 32).unwrap();
        assert_eq!(encrypted.ciphertext.len(), 2 + 32 + 6 + 16);
        let plaintext = keys
            .decrypt(&encrypted.salt, &encrypted.public_key, &encrypted.ciphertext)
            .unwrap();
        assert_eq!(plaintext, b"padded");
    }

    #[test]
    fn test_round_trip_through_headers() {
        let keys = ReceiverKeys::generate();
        let encrypted = encrypt(&keys.p256dh(), &keys.auth(), b"via headers", 0).unwrap();
        let plaintext = keys
            .decrypt_from_headers(
                &encrypted.encryption_header(),
                &encrypted.crypto_key_header(),
                &encrypted.ciphertext,
            )
            .unwrap();
        assert_eq!(plaintext, b"via headers");
    }

    #[test]
    fn test_headers_use_padded_urlsafe_base64() {
        let keys = ReceiverKeys::generate();
        let encrypted = encrypt(&keys.p256dh(), &keys.auth(), b"x", 0).unwrap();

        let salt = encrypted.encryption_header();
        assert!(salt.starts_with("salt="));
        // 16 bytes -> 24 chars with "==" padding
        assert_eq!(salt.len(), "salt=".len() + 24);
        assert!(salt.ends_with("=="));

        let dh = encrypted.crypto_key_header();
        assert!(dh.starts_with("dh="));
        assert_eq!(dh.len(), "dh=".len() + 88);
        assert!(!dh.contains('+') && !dh.contains('/'));
    }

    #[test]
    fn test_fresh_salt_and_key_per_message() {
        let keys = ReceiverKeys::generate();
        let a = encrypt(&keys.p256dh(), &keys.auth(), b"same", 0).unwrap();
        let b = encrypt(&keys.p256dh(), &keys.auth(), b"same", 0).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.public_key, b.public_key);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_auth_fails_to_decrypt() {
        let keys = ReceiverKeys::generate();
        let other = ReceiverKeys::generate();
        let encrypted = encrypt(&keys.p256dh(), &other.auth(), b"secret", 0).unwrap();
        let result = keys.decrypt(&encrypted.salt, &encrypted.public_key, &encrypted.ciphertext);
        assert!(matches!(result, Err(PushError::Encryption(_))));
    }

    #[test]
    fn test_malformed_auth_secret() {
        let keys = ReceiverKeys::generate();
        let short = URL_SAFE_NO_PAD.encode([1u8; 8]);
        assert!(matches!(
            encrypt(&keys.p256dh(), &short, b"x", 0),
            Err(PushError::Encryption(_))
        ));
        assert!(matches!(
            encrypt(&keys.p256dh(), "not base64 !!", b"x", 0),
            Err(PushError::Encryption(_))
        ));
    }

    #[test]
    fn test_malformed_public_key() {
        let keys = ReceiverKeys::generate();
        let garbage = URL_SAFE_NO_PAD.encode([4u8; 65]);
        assert!(matches!(
            encrypt(&garbage, &keys.auth(), b"x", 0),
            Err(PushError::Encryption(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let keys = ReceiverKeys::generate();
        let payload = vec![b'a'; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encrypt(&keys.p256dh(), &keys.auth(), &payload, 0),
            Err(PushError::Encryption(_))
        ));
        let payload = vec![b'a'; MAX_PAYLOAD_LEN];
        assert!(encrypt(&keys.p256dh(), &keys.auth(), &payload, 0).is_ok());
    }

    #[test]
    fn test_decode_accepts_padded_and_standard_alphabet() {
        let bytes = [0xfbu8, 0xff, 0xfe, 0x01];
        let padded = URL_SAFE.encode(bytes);
        let standard = base64::engine::general_purpose::STANDARD.encode(bytes);
        assert_eq!(decode_base64url("t", &padded).unwrap(), bytes);
        assert_eq!(decode_base64url("t", &standard).unwrap(), bytes);
    }
}
