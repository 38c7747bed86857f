//! Passphrase encryption of signing material at rest

use crate::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// PBKDF2 rounds for passphrase key derivation
pub const PBKDF2_ROUNDS: u32 = 100_000;

const FORMAT_VERSION: u8 = 1;

/// Serialized form of a passphrase-encrypted blob
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sealed {
    v: u8,
    #[serde(with = "hex::serde")]
    salt: [u8; 16],
    #[serde(with = "hex::serde")]
    nonce: [u8; 12],
    #[serde(with = "hex::serde")]
    ct: Vec<u8>,
}

fn derive_key(passphrase: &str, salt: &[u8; 16]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut key[..]);
    key
}

/// Encrypt `plaintext` under `passphrase`, returning a JSON string
pub fn encrypt(passphrase: &str, plaintext: &[u8]) -> Result<String> {
    let salt: [u8; 16] = rand::random();
    let nonce: [u8; 12] = rand::random();

    let key = derive_key(passphrase, &salt);
    let cipher = ChaCha20Poly1305::new((&*key).into());
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let sealed = Sealed {
        v: FORMAT_VERSION,
        salt,
        nonce,
        ct,
    };
    Ok(serde_json::to_string(&sealed)?)
}

/// Decrypt a string produced by `encrypt`
pub fn decrypt(passphrase: &str, encrypted: &str) -> Result<Zeroizing<Vec<u8>>> {
    let sealed: Sealed = serde_json::from_str(encrypted)
        .map_err(|e| Error::Deserialization(format!("Invalid encrypted blob: {}", e)))?;
    if sealed.v != FORMAT_VERSION {
        return Err(Error::Deserialization(format!(
            "Unsupported encryption format version {}",
            sealed.v
        )));
    }

    let key = derive_key(passphrase, &sealed.salt);
    let cipher = ChaCha20Poly1305::new((&*key).into());
    cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ct.as_ref())
        .map(Zeroizing::new)
        .map_err(|_| Error::Crypto("Decryption failed - wrong passphrase or corrupted data".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let encrypted = encrypt("correct horse", b"signing material").unwrap();
        let decrypted = decrypt("correct horse", &encrypted).unwrap();
        assert_eq!(&decrypted[..], b"signing material");
    }

    #[test]
    fn test_wrong_passphrase() {
        let encrypted = encrypt("correct horse", b"signing material").unwrap();
        assert!(matches!(
            decrypt("battery staple", &encrypted),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            decrypt("pw", "not json"),
            Err(Error::Deserialization(_))
        ));
    }
}
