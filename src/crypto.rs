use crate::error::{Result, SealError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// Payload cipher name recorded in item metadata.
pub const ALGORITHM: &str = "aes-256-gcm";

/// Data encryption key length in bytes.
pub const DEK_SIZE: usize = 32;

/// GCM nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// Generate a fresh data encryption key from the OS RNG.
///
/// Each key is used for exactly one item, so nonce reuse across encryptions
/// cannot arise. The buffer zeroes itself on drop.
pub fn generate_dek() -> Zeroizing<Vec<u8>> {
    let mut dek = Zeroizing::new(vec![0u8; DEK_SIZE]);
    OsRng.fill_bytes(&mut dek);
    dek
}

/// Generate a fresh GCM nonce from the OS RNG.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt a payload under AES-256-GCM, producing `ciphertext || tag`.
pub fn encrypt_payload(dek: &[u8], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| SealError::Encryption(format!("payload encryption failed: {}", e)))
}

/// Decrypt `ciphertext || tag` produced by [`encrypt_payload`].
///
/// Fails when the tag does not authenticate, i.e. the ciphertext or nonce
/// was altered after sealing.
pub fn decrypt_payload(
    dek: &[u8],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| SealError::Decryption(format!("payload authentication failed: {}", e)))
}
