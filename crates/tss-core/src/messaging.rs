//! Authenticated, encrypted envelopes for moving private key material
//!
//! A messaging key pairs an Ed25519 signing key with an X25519 key
//! agreement secret. Messages are encrypted with ChaCha20-Poly1305 under a
//! key agreed with a fresh ephemeral X25519 key, and the result is
//! ASCII-armored for storage on keychain records.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

const ARMOR_BEGIN: &str = "-----BEGIN TSS MESSAGE-----";
const ARMOR_END: &str = "-----END TSS MESSAGE-----";
const ARMOR_WIDTH: usize = 64;

const KDF_CONTEXT: &str = "tss-core 2024-01 messaging envelope key";

const FLAG_ANONYMOUS: u8 = 0x01;
const FLAG_SIGNED: u8 = 0x02;

const SIGNATURE_LEN: usize = 64;
const HEADER_LEN: usize = 1 + 32 + 12;

/// Long-lived or session messaging key
pub struct MessagingKey {
    signing: SigningKey,
    encryption: StaticSecret,
}

impl MessagingKey {
    /// Generate a fresh key pair
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 64]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self::from_bytes(&bytes)
    }

    /// Rebuild from the 64-byte secret form
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        let mut signing = [0u8; 32];
        signing.copy_from_slice(&bytes[..32]);
        let mut encryption = [0u8; 32];
        encryption.copy_from_slice(&bytes[32..]);
        Self {
            signing: SigningKey::from_bytes(&signing),
            encryption: StaticSecret::from(encryption),
        }
    }

    /// Parse the hex encoded secret form
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; 64]);
        hex::decode_to_slice(encoded.trim(), &mut bytes[..])
            .map_err(|e| Error::Crypto(format!("Invalid messaging key: {}", e)))?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Hex encoded secret form
    pub fn to_hex(&self) -> Zeroizing<String> {
        let mut bytes = Zeroizing::new([0u8; 64]);
        bytes[..32].copy_from_slice(self.signing.as_bytes());
        bytes[32..].copy_from_slice(self.encryption.as_bytes());
        Zeroizing::new(hex::encode(&bytes[..]))
    }

    pub fn public_key(&self) -> MessagingPublicKey {
        MessagingPublicKey {
            verifying: self.signing.verifying_key(),
            encryption: X25519PublicKey::from(&self.encryption),
        }
    }
}

impl fmt::Debug for MessagingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingKey")
            .field("public_key", &self.public_key().to_string())
            .finish_non_exhaustive()
    }
}

/// Public half of a messaging key, encoded as hex(verifying) ‖ hex(encryption)
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessagingPublicKey {
    verifying: VerifyingKey,
    encryption: X25519PublicKey,
}

impl fmt::Display for MessagingPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            hex::encode(self.verifying.as_bytes()),
            hex::encode(self.encryption.as_bytes())
        )
    }
}

impl fmt::Debug for MessagingPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessagingPublicKey({})", self)
    }
}

impl FromStr for MessagingPublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| Error::Crypto(format!("Invalid messaging public key: {}", e)))?;

        let mut verifying = [0u8; 32];
        verifying.copy_from_slice(&bytes[..32]);
        let mut encryption = [0u8; 32];
        encryption.copy_from_slice(&bytes[32..]);

        Ok(Self {
            verifying: VerifyingKey::from_bytes(&verifying)
                .map_err(|e| Error::Crypto(format!("Invalid verifying key: {}", e)))?,
            encryption: X25519PublicKey::from(encryption),
        })
    }
}

impl TryFrom<String> for MessagingPublicKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MessagingPublicKey> for String {
    fn from(value: MessagingPublicKey) -> Self {
        value.to_string()
    }
}

/// Sign `plaintext` with the sender key and encrypt it to `recipient`.
///
/// The signature covers the recipient's public key so an envelope cannot
/// be re-addressed.
pub fn sign_and_encrypt(
    plaintext: &[u8],
    recipient: &MessagingPublicKey,
    sender: &MessagingKey,
) -> Result<String> {
    let signature = sender.signing.sign(&signed_bytes(recipient, plaintext));

    let mut body = Zeroizing::new(Vec::with_capacity(SIGNATURE_LEN + plaintext.len()));
    body.extend_from_slice(&signature.to_bytes());
    body.extend_from_slice(plaintext);

    seal(FLAG_SIGNED, &body, recipient)
}

/// Decrypt an envelope made by `sign_and_encrypt` and check the sender
pub fn decrypt_and_verify(
    armored: &str,
    recipient: &MessagingKey,
    sender: &MessagingPublicKey,
) -> Result<Zeroizing<Vec<u8>>> {
    let body = open(FLAG_SIGNED, armored, recipient)?;
    if body.len() < SIGNATURE_LEN {
        return Err(Error::Crypto("Signed message is truncated".into()));
    }

    let mut signature_bytes = [0u8; SIGNATURE_LEN];
    signature_bytes.copy_from_slice(&body[..SIGNATURE_LEN]);
    let signature = ed25519_dalek::Signature::from_bytes(&signature_bytes);
    let plaintext = Zeroizing::new(body[SIGNATURE_LEN..].to_vec());

    sender
        .verifying
        .verify_strict(&signed_bytes(&recipient.public_key(), &plaintext), &signature)
        .map_err(|_| Error::Crypto("Message signature does not match sender key".into()))?;

    Ok(plaintext)
}

/// Encrypt `plaintext` to `recipient` without sender authentication
pub fn encrypt(plaintext: &[u8], recipient: &MessagingPublicKey) -> Result<String> {
    seal(FLAG_ANONYMOUS, plaintext, recipient)
}

/// Decrypt an envelope made by `encrypt`
pub fn decrypt(armored: &str, recipient: &MessagingKey) -> Result<Zeroizing<Vec<u8>>> {
    open(FLAG_ANONYMOUS, armored, recipient)
}

fn signed_bytes(recipient: &MessagingPublicKey, plaintext: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(Vec::with_capacity(64 + plaintext.len()));
    bytes.extend_from_slice(recipient.verifying.as_bytes());
    bytes.extend_from_slice(recipient.encryption.as_bytes());
    bytes.extend_from_slice(plaintext);
    bytes
}

fn envelope_cipher(
    shared: &[u8; 32],
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
) -> ChaCha20Poly1305 {
    let mut material = Zeroizing::new([0u8; 96]);
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral.as_bytes());
    material[64..].copy_from_slice(recipient.as_bytes());
    let key = Zeroizing::new(blake3::derive_key(KDF_CONTEXT, &material[..]));
    ChaCha20Poly1305::new((&*key).into())
}

fn seal(flag: u8, body: &[u8], recipient: &MessagingPublicKey) -> Result<String> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient.encryption);
    if !shared.was_contributory() {
        return Err(Error::Crypto("Recipient encryption key is degenerate".into()));
    }

    let cipher = envelope_cipher(shared.as_bytes(), &ephemeral_public, &recipient.encryption);
    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: body,
                aad: &[flag],
            },
        )
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut envelope = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    envelope.push(flag);
    envelope.extend_from_slice(ephemeral_public.as_bytes());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);

    Ok(armor(&envelope))
}

fn open(flag: u8, armored: &str, recipient: &MessagingKey) -> Result<Zeroizing<Vec<u8>>> {
    let envelope = dearmor(armored)?;
    if envelope.len() < HEADER_LEN {
        return Err(Error::Crypto("Message is truncated".into()));
    }
    if envelope[0] != flag {
        return Err(Error::Crypto(format!(
            "Unexpected message kind {:#04x}",
            envelope[0]
        )));
    }

    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&envelope[1..33]);
    let ephemeral_public = X25519PublicKey::from(ephemeral_bytes);
    let nonce = Nonce::from_slice(&envelope[33..HEADER_LEN]);

    let shared = recipient.encryption.diffie_hellman(&ephemeral_public);
    let own_public = X25519PublicKey::from(&recipient.encryption);
    let cipher = envelope_cipher(shared.as_bytes(), &ephemeral_public, &own_public);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &envelope[HEADER_LEN..],
                aad: &[flag],
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| Error::Crypto("Decryption failed - wrong key or corrupted message".into()))
}

fn armor(envelope: &[u8]) -> String {
    let encoded = STANDARD.encode(envelope);
    let mut armored = String::with_capacity(encoded.len() + 64);
    armored.push_str(ARMOR_BEGIN);
    armored.push('\n');
    for line in encoded.as_bytes().chunks(ARMOR_WIDTH) {
        armored.push_str(&String::from_utf8_lossy(line));
        armored.push('\n');
    }
    armored.push_str(ARMOR_END);
    armored
}

fn dearmor(armored: &str) -> Result<Vec<u8>> {
    let inner = armored
        .trim()
        .strip_prefix(ARMOR_BEGIN)
        .and_then(|rest| rest.strip_suffix(ARMOR_END))
        .ok_or_else(|| Error::Crypto("Message is not armored".into()))?;
    let encoded: String = inner.split_whitespace().collect();
    STANDARD
        .decode(encoded)
        .map_err(|e| Error::Crypto(format!("Invalid message encoding: {}", e)))
}
