//! Authenticated encryption for secrets kept at rest.
//!
//! Output layout is `base64(salt || nonce || ciphertext || tag)` using AES-256-GCM.
//! The salt is mixed with the caller key into a per-blob subkey, so two blobs
//! never share a (key, nonce) pair even if nonces were to repeat.

use crate::constants::buffers::{
    CRYPTO_KEY_SIZE, CRYPTO_NONCE_SIZE, CRYPTO_SALT_SIZE, CRYPTO_TAG_SIZE,
};
use crate::constants::crypto::KEY_DERIVATION_CONTEXT;
use crate::errors::KenshoError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const HEADER_SIZE: usize = CRYPTO_SALT_SIZE + CRYPTO_NONCE_SIZE;

fn ensure_key(key: &[u8]) -> Result<(), KenshoError> {
    if key.len() != CRYPTO_KEY_SIZE {
        return Err(KenshoError::crypto(format!(
            "Encryption key must be {} bytes, got {}",
            CRYPTO_KEY_SIZE,
            key.len()
        )));
    }
    Ok(())
}

fn derive_cipher(key: &[u8], salt: &[u8]) -> Result<Aes256Gcm, KenshoError> {
    let subkey = Sha256::new()
        .chain_update(KEY_DERIVATION_CONTEXT)
        .chain_update(salt)
        .chain_update(key)
        .finalize();
    Aes256Gcm::new_from_slice(&subkey)
        .map_err(|_| KenshoError::crypto("Failed to initialise cipher"))
}

pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<String, KenshoError> {
    ensure_key(key)?;
    let mut header = [0u8; HEADER_SIZE];
    OsRng.fill_bytes(&mut header);
    let (salt, nonce) = header.split_at(CRYPTO_SALT_SIZE);

    let cipher = derive_cipher(key, salt)?;
    let sealed = cipher
        .encrypt(aes_gcm::Nonce::from_slice(nonce), plaintext)
        .map_err(|_| KenshoError::crypto("Failed to encrypt secret payload"))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + sealed.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&sealed);
    Ok(base64::engine::general_purpose::STANDARD.encode(out))
}

pub fn decrypt(blob: &str, key: &[u8]) -> Result<Vec<u8>, KenshoError> {
    ensure_key(key)?;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(blob.trim().as_bytes())
        .map_err(|_| KenshoError::crypto("Encrypted payload is not valid base64"))?;
    if raw.len() < HEADER_SIZE + CRYPTO_TAG_SIZE {
        return Err(KenshoError::crypto(format!(
            "Encrypted payload too short ({} bytes)",
            raw.len()
        )));
    }
    let (salt, rest) = raw.split_at(CRYPTO_SALT_SIZE);
    let (nonce, sealed) = rest.split_at(CRYPTO_NONCE_SIZE);

    let cipher = derive_cipher(key, salt)?;
    cipher
        .decrypt(aes_gcm::Nonce::from_slice(nonce), sealed)
        .map_err(|_| {
            KenshoError::crypto("Failed to authenticate encrypted payload").with_hint(
                "The payload was tampered with or was encrypted under a different key.",
            )
        })
}

pub fn encrypt_text(plaintext: &str, key: &[u8]) -> Result<String, KenshoError> {
    encrypt(plaintext.as_bytes(), key)
}

pub fn decrypt_text(blob: &str, key: &[u8]) -> Result<String, KenshoError> {
    let bytes = decrypt(blob, key)?;
    String::from_utf8(bytes).map_err(|_| KenshoError::crypto("Decrypted payload is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn key(byte: u8) -> Vec<u8> {
        vec![byte; CRYPTO_KEY_SIZE]
    }

    #[test]
    fn round_trips_text() {
        let blob = encrypt_text("s3cr3t", &key(7)).unwrap();
        assert_eq!(decrypt_text(&blob, &key(7)).unwrap(), "s3cr3t");
    }

    #[test]
    fn round_trips_empty_payload() {
        let blob = encrypt(b"", &key(1)).unwrap();
        assert_eq!(decrypt(&blob, &key(1)).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn same_plaintext_yields_different_blobs() {
        let a = encrypt_text("x", &key(3)).unwrap();
        let b = encrypt_text("x", &key(3)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn every_flipped_byte_is_rejected() {
        let blob = encrypt_text("validator password", &key(9)).unwrap();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(blob.as_bytes())
            .unwrap();
        for idx in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[idx] ^= 0x01;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&tampered);
            let err = decrypt(&encoded, &key(9)).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Crypto, "byte {} accepted", idx);
        }
    }

    #[test]
    fn wrong_key_fails_closed() {
        let blob = encrypt_text("x", &key(1)).unwrap();
        let err = decrypt_text(&blob, &key(2)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Crypto);
    }

    #[test]
    fn short_key_is_rejected() {
        let err = encrypt_text("x", &[0u8; 16]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Crypto);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; HEADER_SIZE]);
        assert_eq!(decrypt(&short, &key(1)).unwrap_err().kind, ErrorKind::Crypto);
        assert_eq!(decrypt("not base64!", &key(1)).unwrap_err().kind, ErrorKind::Crypto);
    }
}
