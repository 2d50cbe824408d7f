use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Result, ShareError};
use crate::payload::SharePayload;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// PBKDF2-HMAC-SHA256 rounds used for new links
pub const DEFAULT_ITERATIONS: u32 = 100_000;
pub const MIN_ITERATIONS: u32 = 10_000;
/// Upper bound accepted from an incoming link
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Password-encrypted payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub iterations: u32,
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; TAG_LEN],
}

fn derive_key(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, key.as_mut_slice());
    key
}

fn cipher_for(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> Aes256Gcm {
    let key = derive_key(password, salt, iterations);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()))
}

/// Encrypt with the default KDF cost.
pub fn encrypt(payload: &SharePayload, password: &str) -> Result<Envelope> {
    encrypt_with_iterations(payload, password, DEFAULT_ITERATIONS)
}

/// Serialize and encrypt `payload` with AES-256-GCM under a PBKDF2 key.
///
/// Salt and nonce are drawn fresh on every call. `iterations` is clamped
/// into the range `decode` accepts. Whitespace-only passwords count as blank.
pub fn encrypt_with_iterations(
    payload: &SharePayload,
    password: &str,
    iterations: u32,
) -> Result<Envelope> {
    if password.trim().is_empty() {
        return Err(ShareError::EmptyPassword);
    }
    let iterations = iterations.clamp(MIN_ITERATIONS, MAX_ITERATIONS);
    let plaintext = Zeroizing::new(payload.to_bytes()?);

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = cipher_for(password, &salt, iterations);
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|e| ShareError::SerializationError(format!("encryption failed: {e}")))?;

    // aes-gcm appends the tag to the ciphertext
    let tag = sealed.split_off(sealed.len() - TAG_LEN);
    let auth_tag: [u8; TAG_LEN] = tag
        .try_into()
        .map_err(|_| ShareError::SerializationError("unexpected tag length".into()))?;

    Ok(Envelope {
        salt,
        nonce,
        iterations,
        ciphertext: sealed,
        auth_tag,
    })
}

/// Re-derive the key and open the envelope.
///
/// Any authentication failure is reported as `WrongPasswordOrCorrupted`;
/// no plaintext is returned unless the tag verifies.
pub fn decrypt(envelope: &Envelope, password: &str) -> Result<SharePayload> {
    if password.trim().is_empty() {
        return Err(ShareError::EmptyPassword);
    }
    let cipher = cipher_for(password, &envelope.salt, envelope.iterations);

    let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&envelope.ciphertext);
    sealed.extend_from_slice(&envelope.auth_tag);

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), sealed.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| {
            debug!("envelope authentication failed");
            ShareError::WrongPasswordOrCorrupted
        })?;

    SharePayload::from_bytes(&plaintext)
}

/// `encrypt_with_iterations` on the blocking pool.
///
/// Dropping the returned future discards the result; the task itself runs
/// to completion.
pub async fn encrypt_async(
    payload: SharePayload,
    password: String,
    iterations: u32,
) -> Result<Envelope> {
    let password = Zeroizing::new(password);
    tokio::task::spawn_blocking(move || encrypt_with_iterations(&payload, &password, iterations))
        .await
        .map_err(|e| ShareError::SerializationError(format!("crypto task failed: {e}")))?
}

/// `decrypt` on the blocking pool.
pub async fn decrypt_async(envelope: Envelope, password: String) -> Result<SharePayload> {
    let password = Zeroizing::new(password);
    tokio::task::spawn_blocking(move || decrypt(&envelope, &password))
        .await
        .map_err(|e| ShareError::SerializationError(format!("crypto task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ChatMessage;

    fn seal(payload: &SharePayload, password: &str) -> Envelope {
        encrypt_with_iterations(payload, password, MIN_ITERATIONS).unwrap()
    }

    fn api_key_payload() -> SharePayload {
        SharePayload {
            api_key: Some("sk-ABCD1234EFGH".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_api_key_roundtrip() {
        let payload = api_key_payload();
        let envelope = seal(&payload, "correct horse battery staple");
        let opened = decrypt(&envelope, "correct horse battery staple").unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_messages_roundtrip_keeps_roles_and_order() {
        let payload = SharePayload {
            messages: Some(vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello there"),
            ]),
            ..Default::default()
        };
        let envelope = seal(&payload, "pw");
        assert_eq!(decrypt(&envelope, "pw").unwrap(), payload);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let envelope = seal(&api_key_payload(), "pw1");
        assert_eq!(
            decrypt(&envelope, "pw2").unwrap_err(),
            ShareError::WrongPasswordOrCorrupted
        );
    }

    #[test]
    fn test_empty_password_produces_no_envelope() {
        assert_eq!(
            encrypt(&api_key_payload(), "").unwrap_err(),
            ShareError::EmptyPassword
        );
        assert_eq!(
            encrypt_with_iterations(&api_key_payload(), "  \n", MIN_ITERATIONS).unwrap_err(),
            ShareError::EmptyPassword
        );
        let envelope = seal(&api_key_payload(), "pw");
        assert_eq!(decrypt(&envelope, " ").unwrap_err(), ShareError::EmptyPassword);
    }

    #[test]
    fn test_each_encryption_is_fresh() {
        let payload = api_key_payload();
        let a = seal(&payload, "pw");
        let b = seal(&payload, "pw");
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(decrypt(&a, "pw").unwrap(), payload);
        assert_eq!(decrypt(&b, "pw").unwrap(), payload);
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut envelope = seal(&api_key_payload(), "pw");
        envelope.ciphertext[0] ^= 0x01;
        assert_eq!(
            decrypt(&envelope, "pw").unwrap_err(),
            ShareError::WrongPasswordOrCorrupted
        );

        let mut envelope = seal(&api_key_payload(), "pw");
        envelope.auth_tag[TAG_LEN - 1] ^= 0x80;
        assert_eq!(
            decrypt(&envelope, "pw").unwrap_err(),
            ShareError::WrongPasswordOrCorrupted
        );

        let mut envelope = seal(&api_key_payload(), "pw");
        envelope.iterations += 1;
        assert_eq!(
            decrypt(&envelope, "pw").unwrap_err(),
            ShareError::WrongPasswordOrCorrupted
        );
    }

    #[test]
    fn test_iterations_are_clamped() {
        let envelope = encrypt_with_iterations(&api_key_payload(), "pw", 1).unwrap();
        assert_eq!(envelope.iterations, MIN_ITERATIONS);
    }

    #[test]
    fn test_default_cost() {
        let envelope = encrypt(&api_key_payload(), "pw").unwrap();
        assert_eq!(envelope.iterations, DEFAULT_ITERATIONS);
        assert_eq!(decrypt(&envelope, "pw").unwrap(), api_key_payload());
    }

    #[tokio::test]
    async fn test_async_roundtrip() {
        let payload = api_key_payload();
        let envelope = encrypt_async(payload.clone(), "pw".into(), MIN_ITERATIONS)
            .await
            .unwrap();
        let opened = decrypt_async(envelope.clone(), "pw".into()).await.unwrap();
        assert_eq!(opened, payload);
        assert_eq!(
            decrypt_async(envelope, "nope".into()).await.unwrap_err(),
            ShareError::WrongPasswordOrCorrupted
        );
    }
}
