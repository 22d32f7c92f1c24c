//! AES-256-GCM and AES-256-CBC encryption of byte payloads.
//!
//! **GCM** is the default: a fresh random 128-bit IV per call and a detached
//! 128-bit authentication tag. An IV must never repeat under the same key.
//!
//! **CBC** exists for compatibility only. It provides no authentication of its
//! own; the envelope's plaintext checksum is the sole integrity check, which
//! does not stop an attacker from flipping bits that happen to pass padding.

use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, AeadInPlace, KeyInit},
    aes::Aes256,
    AesGcm,
};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::{random_array, CipherError};

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of the IV used by both modes (16 bytes = 128 bits).
pub const IV_LEN: usize = 16;

/// Byte length of a GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Output of a symmetric encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricCiphertext {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    /// Present for GCM, absent for CBC.
    pub tag: Option<[u8; TAG_LEN]>,
}

/// Encrypt `plaintext` with AES-256-GCM under a fresh random IV.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
pub fn encrypt_gcm(plaintext: &[u8], key: &[u8]) -> Result<SymmetricCiphertext, CipherError> {
    let cipher = gcm_cipher(key)?;
    let iv = random_array::<IV_LEN>();

    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buf)
        .map_err(|_| CipherError::AeadFailure)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok(SymmetricCiphertext {
        iv,
        ciphertext: buf,
        tag: Some(tag_bytes),
    })
}

/// Decrypt and authenticate an AES-256-GCM ciphertext.
///
/// # Errors
///
/// Returns [`CipherError::InvalidIv`] / [`CipherError::InvalidTag`] on
/// wrongly-sized inputs and [`CipherError::AeadFailure`] if authentication
/// fails (wrong key or tampered data).
pub fn decrypt_gcm(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let cipher = gcm_cipher(key)?;
    if iv.len() != IV_LEN {
        return Err(CipherError::InvalidIv);
    }
    if tag.len() != TAG_LEN {
        return Err(CipherError::InvalidTag);
    }

    let mut buf = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            b"",
            &mut buf,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CipherError::AeadFailure)?;
    Ok(buf)
}

/// Encrypt `plaintext` with AES-256-CBC and PKCS#7 padding under a fresh IV.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
pub fn encrypt_cbc(plaintext: &[u8], key: &[u8]) -> Result<SymmetricCiphertext, CipherError> {
    let iv = random_array::<IV_LEN>();
    let enc = Aes256CbcEnc::new_from_slices(key, &iv).map_err(|_| CipherError::InvalidKeyLength)?;
    Ok(SymmetricCiphertext {
        iv,
        ciphertext: enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        tag: None,
    })
}

/// Decrypt an AES-256-CBC ciphertext. No authentication is performed.
///
/// # Errors
///
/// Returns [`CipherError::InvalidIv`] on a wrongly-sized IV and
/// [`CipherError::Padding`] if the padding is invalid.
pub fn decrypt_cbc(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    if iv.len() != IV_LEN {
        return Err(CipherError::InvalidIv);
    }
    let dec = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| CipherError::InvalidKeyLength)?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::Padding)
}

fn gcm_cipher(key: &[u8]) -> Result<Aes256Gcm16, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256Gcm16::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}
