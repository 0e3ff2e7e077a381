//! Request signing and envelope ciphers.
//!
//! These primitives are wire-compatible with deployed client SDKs:
//! signatures are an unsalted MD5 hex digest over `secret || parts...`, and
//! the AES modes run CBC with an all-zero IV.
//! Freshness comes from the timestamp window enforced by the protocol layer,
//! never from the digest itself. Do not change either without a versioned
//! protocol upgrade on the client side.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use subtle::ConstantTimeEq;
use thiserror::Error;

const ZERO_IV: [u8; 16] = [0u8; 16];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key must not be empty")]
    EmptyKey,
    #[error("payload is not valid base64")]
    InvalidBase64,
    #[error("ciphertext could not be decrypted")]
    BadCiphertext,
}

/// Per-tenant envelope algorithm.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum EncryptionAlg {
    #[default]
    #[serde(rename = "NONE")]
    #[strum(serialize = "NONE")]
    None,
    #[serde(rename = "RC4")]
    #[strum(serialize = "RC4")]
    Rc4,
    #[serde(rename = "AES-128-CBC")]
    #[strum(serialize = "AES-128-CBC")]
    Aes128Cbc,
    #[serde(rename = "AES-256-CBC")]
    #[strum(serialize = "AES-256-CBC")]
    Aes256Cbc,
}

impl EncryptionAlg {
    /// Algorithm actually used when a secure tenant has no cipher configured.
    /// Existing clients fall back to RC4 in that case.
    pub fn for_envelope(self) -> Self {
        match self {
            Self::None => Self::Rc4,
            other => other,
        }
    }
}

/// Keyed digest over `secret` followed by each part, as lowercase hex.
pub fn sign(secret: &str, parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    hasher.update(secret.as_bytes());
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Compare an expected digest with a client-supplied one, ignoring hex case.
pub fn signatures_match(expected: &str, provided: &str) -> bool {
    let expected = expected.to_ascii_lowercase();
    let provided = provided.trim().to_ascii_lowercase();
    expected.len() == provided.len() && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

pub fn encrypt(alg: EncryptionAlg, plain: &[u8], key: &str) -> Result<Vec<u8>, CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::EmptyKey);
    }
    match alg {
        EncryptionAlg::None => Ok(plain.to_vec()),
        EncryptionAlg::Rc4 => Ok(rc4(plain, key.as_bytes())),
        EncryptionAlg::Aes128Cbc | EncryptionAlg::Aes256Cbc => {
            Ok(aes_cbc_encrypt(plain, &normalize_aes_key(key)))
        }
    }
}

pub fn decrypt(alg: EncryptionAlg, data: &[u8], key: &str) -> Result<Vec<u8>, CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::EmptyKey);
    }
    match alg {
        EncryptionAlg::None => Ok(data.to_vec()),
        EncryptionAlg::Rc4 => Ok(rc4(data, key.as_bytes())),
        EncryptionAlg::Aes128Cbc | EncryptionAlg::Aes256Cbc => {
            aes_cbc_decrypt(data, &normalize_aes_key(key))
        }
    }
}

/// Encrypt a UTF-8 string and encode the ciphertext as standard base64.
pub fn encrypt_to_base64(alg: EncryptionAlg, plain: &str, key: &str) -> Result<String, CryptoError> {
    encrypt(alg, plain.as_bytes(), key).map(|c| BASE64.encode(c))
}

/// Decode standard base64 and decrypt, returning the raw plaintext bytes.
pub fn decrypt_base64(alg: EncryptionAlg, encoded: &str, key: &str) -> Result<Vec<u8>, CryptoError> {
    let data = BASE64
        .decode(encoded.trim())
        .map_err(|_| CryptoError::InvalidBase64)?;
    decrypt(alg, &data, key)
}

/// RC4 over arbitrary-length key bytes. Symmetric: applying twice restores
/// the input.
fn rc4(data: &[u8], key: &[u8]) -> Vec<u8> {
    let mut s: [u8; 256] = std::array::from_fn(|i| i as u8);
    let mut j: u8 = 0;
    for i in 0..256 {
        j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }

    let (mut i, mut j) = (0u8, 0u8);
    data.iter()
        .map(|byte| {
            i = i.wrapping_add(1);
            j = j.wrapping_add(s[i as usize]);
            s.swap(i as usize, j as usize);
            let t = s[i as usize].wrapping_add(s[j as usize]);
            byte ^ s[t as usize]
        })
        .collect()
}

/// UTF-8 key bytes are used as-is when already 16, 24 or 32 bytes long;
/// anything else is truncated or zero-padded to 16 bytes.
fn normalize_aes_key(key: &str) -> Vec<u8> {
    let bytes = key.as_bytes();
    match bytes.len() {
        16 | 24 | 32 => bytes.to_vec(),
        _ => {
            let mut out = vec![0u8; 16];
            let n = bytes.len().min(16);
            out[..n].copy_from_slice(&bytes[..n]);
            out
        }
    }
}

fn aes_cbc_encrypt(plain: &[u8], key: &[u8]) -> Vec<u8> {
    match key.len() {
        32 => cbc::Encryptor::<aes::Aes256>::new(key.into(), &ZERO_IV.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plain),
        24 => cbc::Encryptor::<aes::Aes192>::new(key.into(), &ZERO_IV.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plain),
        _ => cbc::Encryptor::<aes::Aes128>::new(key.into(), &ZERO_IV.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plain),
    }
}

fn aes_cbc_decrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let result = match key.len() {
        32 => cbc::Decryptor::<aes::Aes256>::new(key.into(), &ZERO_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        24 => cbc::Decryptor::<aes::Aes192>::new(key.into(), &ZERO_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        _ => cbc::Decryptor::<aes::Aes128>::new(key.into(), &ZERO_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(data),
    };
    result.map_err(|_| CryptoError::BadCiphertext)
}
