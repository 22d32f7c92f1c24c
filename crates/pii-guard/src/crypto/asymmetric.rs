//! RSA-OAEP (SHA-256) and hybrid RSA + AES-256-GCM encryption.
//!
//! # Ciphertext layout
//!
//! Every asymmetric ciphertext starts with a mode byte, so decryption never
//! has to guess the mode from the ciphertext length:
//!
//! ```text
//! direct: 0x01 | RSA-OAEP(plaintext)
//! hybrid: 0x02 | u32 BE len(wrapped key) | RSA-OAEP(ephemeral key) | IV (16) | tag (16) | AES-256-GCM(plaintext)
//! ```
//!
//! Direct mode is used while the payload fits under the OAEP limit
//! (`modulus bytes - 66`, i.e. 190 bytes at 2048 bits); anything larger is
//! sealed under a single-use AES-256 key wrapped with the recipient's public key.

use rand::rngs::OsRng;
use rsa::{traits::PublicKeyParts, Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use super::symmetric::{self, IV_LEN, KEY_LEN, TAG_LEN};
use super::{random_array, CipherError};

/// Mode byte for payloads encrypted directly with RSA-OAEP.
pub const MODE_DIRECT: u8 = 0x01;

/// Mode byte for the hybrid RSA + AES-GCM layout.
pub const MODE_HYBRID: u8 = 0x02;

/// OAEP overhead with SHA-256: two digest lengths plus two bytes.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// Length of the big-endian wrapped-key length prefix.
const LEN_PREFIX: usize = 4;

/// Which layout a ciphertext uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Direct,
    Hybrid,
}

/// Largest payload that fits in a single RSA-OAEP block for `key`.
pub fn max_direct_len(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(OAEP_SHA256_OVERHEAD)
}

/// Read the mode byte of an asymmetric ciphertext.
///
/// # Errors
///
/// Returns [`CipherError::Malformed`] for an empty ciphertext and
/// [`CipherError::UnknownMode`] for an unrecognised mode byte.
pub fn mode_of(data: &[u8]) -> Result<Mode, CipherError> {
    match data.first() {
        None => Err(CipherError::Malformed("empty ciphertext")),
        Some(&MODE_DIRECT) => Ok(Mode::Direct),
        Some(&MODE_HYBRID) => Ok(Mode::Hybrid),
        Some(&other) => Err(CipherError::UnknownMode(other)),
    }
}

/// Encrypt `plaintext` for the holder of `public`'s private key, choosing
/// direct or hybrid mode by payload size.
///
/// # Errors
///
/// Returns [`CipherError::RsaEncrypt`] if RSA-OAEP fails.
pub fn seal(public: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    if plaintext.len() <= max_direct_len(public) {
        let ct = oaep_encrypt(public, plaintext)?;
        let mut out = Vec::with_capacity(1 + ct.len());
        out.push(MODE_DIRECT);
        out.extend_from_slice(&ct);
        return Ok(out);
    }

    let mut ephemeral = random_array::<KEY_LEN>();
    let sealed = symmetric::encrypt_gcm(plaintext, &ephemeral);
    let wrapped = oaep_encrypt(public, &ephemeral);
    ephemeral.iter_mut().for_each(|b| *b = 0);
    let (sealed, wrapped) = (sealed?, wrapped?);
    let tag = sealed.tag.ok_or(CipherError::InvalidTag)?;

    let wrapped_len =
        u32::try_from(wrapped.len()).map_err(|_| CipherError::Malformed("wrapped key too long"))?;

    let mut out = Vec::with_capacity(
        1 + LEN_PREFIX + wrapped.len() + IV_LEN + TAG_LEN + sealed.ciphertext.len(),
    );
    out.push(MODE_HYBRID);
    out.extend_from_slice(&wrapped_len.to_be_bytes());
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&sealed.iv);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&sealed.ciphertext);
    Ok(out)
}

/// Decrypt a ciphertext produced by [`seal`].
///
/// # Errors
///
/// Returns [`CipherError::Malformed`] / [`CipherError::UnknownMode`] for bad
/// layouts, [`CipherError::RsaDecrypt`] if the RSA layer fails, and
/// [`CipherError::AeadFailure`] if the hybrid payload fails authentication.
pub fn open(private: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CipherError> {
    let body = &data[1.min(data.len())..];
    match mode_of(data)? {
        Mode::Direct => private
            .decrypt(Oaep::new::<Sha256>(), body)
            .map_err(|_| CipherError::RsaDecrypt),
        Mode::Hybrid => open_hybrid(private, body),
    }
}

fn open_hybrid(private: &RsaPrivateKey, body: &[u8]) -> Result<Vec<u8>, CipherError> {
    let (len_bytes, rest) = split(body, LEN_PREFIX, "missing wrapped key length")?;
    let mut len_buf = [0u8; LEN_PREFIX];
    len_buf.copy_from_slice(len_bytes);
    let wrapped_len = u32::from_be_bytes(len_buf) as usize;

    let (wrapped, rest) = split(rest, wrapped_len, "truncated wrapped key")?;
    let (iv, rest) = split(rest, IV_LEN, "truncated IV")?;
    let (tag, ciphertext) = split(rest, TAG_LEN, "truncated tag")?;

    let mut key = private
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|_| CipherError::RsaDecrypt)?;
    let result = if key.len() == KEY_LEN {
        symmetric::decrypt_gcm(&key, iv, ciphertext, tag)
    } else {
        Err(CipherError::Malformed("wrapped key has wrong length"))
    };
    key.iter_mut().for_each(|b| *b = 0);
    result
}

fn oaep_encrypt(public: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CipherError> {
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|e| CipherError::RsaEncrypt(e.to_string()))
}

fn split<'a>(
    buf: &'a [u8],
    at: usize,
    what: &'static str,
) -> Result<(&'a [u8], &'a [u8]), CipherError> {
    if buf.len() < at {
        return Err(CipherError::Malformed(what));
    }
    Ok(buf.split_at(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    /// RSA generation is slow; share one key pair across tests.
    fn key_pair() -> &'static (RsaPrivateKey, RsaPublicKey) {
        static PAIR: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
        PAIR.get_or_init(|| {
            let private = RsaPrivateKey::new(&mut OsRng, 2048).expect("rsa keygen");
            let public = private.to_public_key();
            (private, public)
        })
    }

    #[test]
    fn direct_limit_at_2048_bits_is_190_bytes() {
        let (_, public) = key_pair();
        assert_eq!(max_direct_len(public), 190);
    }

    #[test]
    fn small_payload_uses_direct_mode() {
        let (private, public) = key_pair();
        let sealed = seal(public, b"FR7630006000011234567890189").unwrap();
        assert_eq!(mode_of(&sealed).unwrap(), Mode::Direct);
        assert_eq!(sealed.len(), 1 + 256);
        assert_eq!(open(private, &sealed).unwrap(), b"FR7630006000011234567890189");
    }

    #[test]
    fn boundary_payload_sizes_round_trip() {
        let (private, public) = key_pair();
        for len in [0usize, 189, 190, 191, 4096] {
            let plaintext = vec![0x5Au8; len];
            let sealed = seal(public, &plaintext).unwrap();
            let expected = if len <= 190 { Mode::Direct } else { Mode::Hybrid };
            assert_eq!(mode_of(&sealed).unwrap(), expected, "len {len}");
            assert_eq!(open(private, &sealed).unwrap(), plaintext, "len {len}");
        }
    }

    #[test]
    fn hybrid_layout_has_length_prefixed_wrapped_key() {
        let (_, public) = key_pair();
        let plaintext = vec![1u8; 500];
        let sealed = seal(public, &plaintext).unwrap();
        let wrapped_len = u32::from_be_bytes([sealed[1], sealed[2], sealed[3], sealed[4]]) as usize;
        assert_eq!(wrapped_len, 256);
        assert_eq!(
            sealed.len(),
            1 + LEN_PREFIX + wrapped_len + IV_LEN + TAG_LEN + plaintext.len()
        );
    }

    #[test]
    fn hybrid_tamper_is_detected() {
        let (private, public) = key_pair();
        let sealed = seal(public, &vec![7u8; 400]).unwrap();
        // Flip one bit in the AES ciphertext, then one in the tag.
        let mut tampered = sealed.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(open(private, &tampered), Err(CipherError::AeadFailure)));

        let tag_at = 1 + LEN_PREFIX + 256 + IV_LEN;
        let mut tampered = sealed;
        tampered[tag_at] ^= 0x80;
        assert!(matches!(open(private, &tampered), Err(CipherError::AeadFailure)));
    }

    #[test]
    fn truncated_and_unknown_layouts_rejected() {
        let (private, _) = key_pair();
        assert!(matches!(open(private, &[]), Err(CipherError::Malformed(_))));
        assert!(matches!(open(private, &[0x7F, 1, 2]), Err(CipherError::UnknownMode(0x7F))));
        assert!(matches!(
            open(private, &[MODE_HYBRID, 0, 0, 1, 0, 9]),
            Err(CipherError::Malformed(_))
        ));
    }

    #[test]
    fn direct_tamper_is_detected() {
        let (private, public) = key_pair();
        let mut sealed = seal(public, b"short").unwrap();
        sealed[10] ^= 0x04;
        assert!(matches!(open(private, &sealed), Err(CipherError::RsaDecrypt)));
    }
}
