//! RSA-2048 key transport and AES-256-CFB session encryption.
//!
//! The public key is exchanged as a DER-encoded `SubjectPublicKeyInfo`
//! (PKCS8) document, not PKCS1. The RSA step wraps a freshly generated
//! 16-byte IV and 32-byte AES key (`iv ‖ key`, 48 bytes) with OAEP/SHA256
//! padding and no label. The AES session cipher runs in CFB mode and reuses
//! one IV for the lifetime of a connection's key material — a known
//! weakness that this crate preserves rather than silently fixing, since a
//! stronger scheme is a protocol change, not a bug fix.

use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use cfb_mode::cipher::generic_array::GenericArray;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

pub const RSA_KEY_BITS: usize = 2048;
const SYMMETRIC_KEY_LEN: usize = 32;
const SYMMETRIC_IV_LEN: usize = 16;
const SESSION_SECRET_LEN: usize = SYMMETRIC_IV_LEN + SYMMETRIC_KEY_LEN;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("failed to generate RSA keypair: {0}")]
    KeyGen(String),
    #[error("RSA encryption failed: {0}")]
    Encrypt(String),
    #[error("RSA decryption failed: {0}")]
    Decrypt(String),
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
    #[error("expected a {expected}-byte session secret, got {actual}")]
    BadSessionSecretLength { expected: usize, actual: usize },
}

/// Generate a fresh RSA-2048 keypair (public exponent 65537, the `rsa`
/// crate's default).
pub fn generate_rsa_keypair() -> Result<(RsaPrivateKey, RsaPublicKey), CryptoError> {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok((private_key, public_key))
}

/// Serialize a public key as DER `SubjectPublicKeyInfo`.
pub fn public_key_to_der(key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))
}

/// Parse a DER `SubjectPublicKeyInfo` document into a public key.
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(der)
        .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))
}

/// Encrypt `data` for `public_key` with OAEP/SHA256 padding.
pub fn rsa_encrypt(public_key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut rng = OsRng;
    public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), data)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))
}

/// Decrypt an OAEP/SHA256-padded ciphertext with `private_key`.
pub fn rsa_decrypt(private_key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), data)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))
}

/// Generate a fresh 32-byte AES-256 key.
pub fn generate_symmetric_key() -> [u8; SYMMETRIC_KEY_LEN] {
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a fresh 16-byte CFB IV.
pub fn generate_iv() -> [u8; SYMMETRIC_IV_LEN] {
    let mut iv = [0u8; SYMMETRIC_IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Pack `iv ‖ key` into the 48-byte plaintext carried over RSA during the
/// key-exchange step.
pub fn encode_session_secret(iv: &[u8; SYMMETRIC_IV_LEN], key: &[u8; SYMMETRIC_KEY_LEN]) -> [u8; SESSION_SECRET_LEN] {
    let mut buf = [0u8; SESSION_SECRET_LEN];
    buf[..SYMMETRIC_IV_LEN].copy_from_slice(iv);
    buf[SYMMETRIC_IV_LEN..].copy_from_slice(key);
    buf
}

/// Unpack an `iv ‖ key` plaintext recovered from RSA decryption.
pub fn decode_session_secret(
    data: &[u8],
) -> Result<([u8; SYMMETRIC_IV_LEN], [u8; SYMMETRIC_KEY_LEN]), CryptoError> {
    if data.len() != SESSION_SECRET_LEN {
        return Err(CryptoError::BadSessionSecretLength {
            expected: SESSION_SECRET_LEN,
            actual: data.len(),
        });
    }
    let mut iv = [0u8; SYMMETRIC_IV_LEN];
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    iv.copy_from_slice(&data[..SYMMETRIC_IV_LEN]);
    key.copy_from_slice(&data[SYMMETRIC_IV_LEN..]);
    Ok((iv, key))
}

/// Encrypt `data` with AES-256-CFB under `key`/`iv`. Ciphertext length
/// equals plaintext length; there is no padding.
pub fn aes_cfb_encrypt(key: &[u8; SYMMETRIC_KEY_LEN], iv: &[u8; SYMMETRIC_IV_LEN], data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    let key = GenericArray::from_slice(key);
    let iv = GenericArray::from_slice(iv);
    cfb_mode::Encryptor::<Aes256>::new(key, iv).encrypt(&mut buf);
    buf
}

/// Decrypt an AES-256-CFB ciphertext under `key`/`iv`.
pub fn aes_cfb_decrypt(key: &[u8; SYMMETRIC_KEY_LEN], iv: &[u8; SYMMETRIC_IV_LEN], data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    let key = GenericArray::from_slice(key);
    let iv = GenericArray::from_slice(iv);
    cfb_mode::Decryptor::<Aes256>::new(key, iv).decrypt(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_cfb_roundtrips() {
        let key = generate_symmetric_key();
        let iv = generate_iv();
        let plaintext = b"the quick brown fox jumps over the lazy dog";

        let ciphertext = aes_cfb_encrypt(&key, &iv, plaintext);
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_ne!(ciphertext, plaintext);

        let decrypted = aes_cfb_decrypt(&key, &iv, &ciphertext);
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn aes_cfb_handles_non_block_aligned_lengths() {
        let key = generate_symmetric_key();
        let iv = generate_iv();
        for len in [0usize, 1, 15, 16, 17, 33] {
            let plaintext = vec![0x42u8; len];
            let ciphertext = aes_cfb_encrypt(&key, &iv, &plaintext);
            assert_eq!(ciphertext.len(), len);
            assert_eq!(aes_cfb_decrypt(&key, &iv, &ciphertext), plaintext);
        }
    }

    #[test]
    fn rsa_encrypt_decrypt_roundtrips_session_secret() {
        let (private_key, public_key) = generate_rsa_keypair().unwrap();
        let iv = generate_iv();
        let key = generate_symmetric_key();
        let secret = encode_session_secret(&iv, &key);

        let ciphertext = rsa_encrypt(&public_key, &secret).unwrap();
        let plaintext = rsa_decrypt(&private_key, &ciphertext).unwrap();

        let (decoded_iv, decoded_key) = decode_session_secret(&plaintext).unwrap();
        assert_eq!(decoded_iv, iv);
        assert_eq!(decoded_key, key);
    }

    #[test]
    fn public_key_der_roundtrips() {
        let (_, public_key) = generate_rsa_keypair().unwrap();
        let der = public_key_to_der(&public_key).unwrap();
        let parsed = public_key_from_der(&der).unwrap();
        assert_eq!(parsed, public_key);
    }

    #[test]
    fn session_secret_of_wrong_length_is_rejected() {
        let err = decode_session_secret(&[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::BadSessionSecretLength { expected: 48, actual: 10 }
        ));
    }
}
