//! Non-hardened child key derivation for the combined Ed25519 key
//!
//! Only the public key and chain code feed the derivation, so every party
//! derives the same tweak without learning anything about the secret.

use crate::{Error, Result};
use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::{EdwardsPoint, Scalar};
use derivation_path::{ChildIndex, DerivationPath};
use hmac::{Hmac, Mac};
use sha2::Sha512;

/// Public key and chain code at a derived path, with the accumulated
/// scalar tweak that moves the secret along with it
#[derive(Debug, Clone)]
pub struct DerivedKey {
    pub public_key: EdwardsPoint,
    pub chaincode: [u8; 32],
    pub tweak: Scalar,
}

/// Parse a derivation path, rejecting hardened components
pub fn parse_path(path: &str) -> Result<Vec<u32>> {
    let normalized = if path.starts_with('m') {
        path.to_string()
    } else {
        format!("m/{}", path.trim_start_matches('/'))
    };
    let derivation_path: DerivationPath = normalized
        .parse()
        .map_err(|e| Error::Derivation(format!("Invalid path {}: {:?}", path, e)))?;

    let mut indices = Vec::new();
    for child_index in derivation_path.path() {
        match child_index {
            ChildIndex::Normal(index) => indices.push(*index),
            ChildIndex::Hardened(_) => {
                return Err(Error::Derivation(
                    "Hardened derivation not supported in threshold setting".into(),
                ))
            }
        }
    }
    Ok(indices)
}

/// Derive along `path` starting from a combined public key and chain code
pub fn derive_public(
    public_key: &EdwardsPoint,
    chaincode: &[u8; 32],
    path: &str,
) -> Result<DerivedKey> {
    let mut derived = DerivedKey {
        public_key: *public_key,
        chaincode: *chaincode,
        tweak: Scalar::ZERO,
    };

    for index in parse_path(path)? {
        let (tweak, next_chaincode) =
            derive_non_hardened(&derived.public_key, &derived.chaincode, index)?;
        derived.public_key += ED25519_BASEPOINT_POINT * tweak;
        derived.tweak += tweak;
        derived.chaincode = next_chaincode;
    }

    Ok(derived)
}

/// Derive non-hardened child tweak
fn derive_non_hardened(
    public_key: &EdwardsPoint,
    chaincode: &[u8; 32],
    index: u32,
) -> Result<(Scalar, [u8; 32])> {
    // HMAC-SHA512(chain_code, 0x02 || public_key || index)
    let mut hmac =
        Hmac::<Sha512>::new_from_slice(chaincode).map_err(|e| Error::Derivation(e.to_string()))?;

    hmac.update(&[0x02]);
    hmac.update(public_key.compress().as_bytes());
    hmac.update(&index.to_be_bytes());

    let result = hmac.finalize().into_bytes();

    let mut tweak_bytes = [0u8; 32];
    tweak_bytes.copy_from_slice(&result[..32]);
    let mut next_chaincode = [0u8; 32];
    next_chaincode.copy_from_slice(&result[32..]);

    Ok((Scalar::from_bytes_mod_order(tweak_bytes), next_chaincode))
}
