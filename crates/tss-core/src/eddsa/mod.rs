//! Ed25519 threshold primitives
//!
//! Every party `i` owns a degree-1 polynomial `f_i(x) = u_i + a_i·x`. The
//! constant term is the clamped Ed25519 secret of the party's seed and the
//! coefficient is derived from the same seed, so the polynomial is stable
//! across generation and signing. Party `k`'s signing share is
//! `Σ_i f_i(k)`, and any two shares interpolate the combined secret
//! `Σ_i u_i` whose public key is `Σ_i u_i·G`.
//!
//! Signing produces a standard Ed25519 signature `(R, s)` with
//! `s = r + H(R ‖ Y ‖ m)·x`, checked with strict verification.

pub mod hd;

use crate::shamir;
use crate::types::{CommonKeychain, Party};
use crate::{Error, Result, PARTIES, THRESHOLD};
use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::clamp_integer;
use curve25519_dalek::{EdwardsPoint, Scalar};
use rand::rngs::OsRng;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const COEFFICIENT_DOMAIN: &[u8] = b"tss-eddsa/polynomial-coefficient";

/// A party's own contribution: the seed its polynomial comes from
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct UShare {
    /// Owner position
    #[zeroize(skip)]
    pub i: Party,
    /// Threshold
    #[zeroize(skip)]
    pub t: u8,
    /// Number of parties
    #[zeroize(skip)]
    pub n: u8,
    /// Public contribution `u_i·G`
    #[zeroize(skip)]
    #[serde(with = "point_hex")]
    pub y: EdwardsPoint,
    #[serde(with = "hex::serde")]
    pub seed: [u8; 32],
    /// Chain code contribution
    #[serde(with = "hex::serde")]
    pub chaincode: [u8; 32],
}

impl UShare {
    /// `[u_i, a_i]`
    fn polynomial(&self) -> Zeroizing<[Scalar; 2]> {
        let h = Zeroizing::new(seed_digest(&self.seed));
        let mut secret_bytes = [0u8; 32];
        secret_bytes.copy_from_slice(&h[..32]);
        let secret = Scalar::from_bytes_mod_order(clamp_integer(secret_bytes));
        secret_bytes.zeroize();

        let mut hasher = Sha512::new();
        hasher.update(COEFFICIENT_DOMAIN);
        hasher.update(self.seed);
        let mut wide = Zeroizing::new([0u8; 64]);
        wide.copy_from_slice(&hasher.finalize());
        let coefficient = Scalar::from_bytes_mod_order_wide(&wide);

        Zeroizing::new([secret, coefficient])
    }

    /// `f_i(index)`
    pub fn evaluate(&self, index: u8) -> Scalar {
        shamir::evaluate_polynomial(&self.polynomial()[..], index)
    }

    /// Feldman commitment `a_i·G` to the polynomial coefficient
    pub fn commitment(&self) -> EdwardsPoint {
        ED25519_BASEPOINT_POINT * self.polynomial()[1]
    }

    /// Nonce prefix, the upper half of the seed digest
    pub fn prefix(&self) -> [u8; 32] {
        let h = Zeroizing::new(seed_digest(&self.seed));
        let mut prefix = [0u8; 32];
        prefix.copy_from_slice(&h[32..]);
        prefix
    }

    /// The Y-share this party sends to `recipient`
    pub fn y_share_for(&self, recipient: Party) -> Result<YShare> {
        if recipient == self.i {
            return Err(Error::InvalidRecipient(recipient.index()));
        }
        Ok(YShare {
            i: recipient,
            j: self.i,
            y: self.y,
            v: self.commitment(),
            u: self.evaluate(recipient.index()),
            chaincode: self.chaincode,
        })
    }
}

impl fmt::Debug for UShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UShare")
            .field("i", &self.i)
            .field("t", &self.t)
            .field("n", &self.n)
            .field("y", &point_to_hex(&self.y))
            .finish_non_exhaustive()
    }
}

/// Share of party `j`'s polynomial held by party `i`
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct YShare {
    /// Recipient position
    #[zeroize(skip)]
    pub i: Party,
    /// Sender position
    #[zeroize(skip)]
    pub j: Party,
    /// Sender's public contribution
    #[zeroize(skip)]
    #[serde(with = "point_hex")]
    pub y: EdwardsPoint,
    /// Sender's coefficient commitment
    #[zeroize(skip)]
    #[serde(with = "point_hex")]
    pub v: EdwardsPoint,
    /// `f_j(i)`
    #[serde(with = "scalar_hex")]
    pub u: Scalar,
    /// Sender's chain code contribution
    #[zeroize(skip)]
    #[serde(with = "hex::serde")]
    pub chaincode: [u8; 32],
}

impl YShare {
    /// Feldman check of the private component against the public parts
    pub fn verify(&self) -> Result<()> {
        if shamir::verify_share(&self.u, self.i.index(), &[self.y, self.v]) {
            Ok(())
        } else {
            Err(Error::VerificationFailed(format!(
                "YShare from {} to {} does not match its commitments",
                self.j, self.i
            )))
        }
    }
}

impl fmt::Debug for YShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YShare")
            .field("i", &self.i)
            .field("j", &self.j)
            .field("y", &point_to_hex(&self.y))
            .finish_non_exhaustive()
    }
}

/// Output of share generation: the own contribution plus one Y-share for
/// each other party
#[derive(Debug, Clone)]
pub struct KeyShare {
    pub u_share: UShare,
    pub y_shares: BTreeMap<Party, YShare>,
}

/// Combined public key and chain code of a keychain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedKey {
    pub public_key: EdwardsPoint,
    pub chaincode: [u8; 32],
}

impl CombinedKey {
    pub fn common_keychain(&self) -> CommonKeychain {
        CommonKeychain::new(&self.public_key, &self.chaincode)
    }
}

/// Signing key of one party at a derived path
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PShare {
    #[zeroize(skip)]
    pub i: Party,
    /// Derived combined public key
    #[zeroize(skip)]
    pub y: EdwardsPoint,
    /// Derived chain code
    #[zeroize(skip)]
    pub chaincode: [u8; 32],
    #[zeroize(skip)]
    pub v: EdwardsPoint,
    secret: Scalar,
    coefficient: Scalar,
    tweak: Scalar,
    prefix: [u8; 32],
}

impl PShare {
    /// `f_i(index)` of the owner's static polynomial
    pub fn static_share(&self, index: u8) -> Scalar {
        shamir::evaluate_polynomial(&[self.secret, self.coefficient], index)
    }

    /// Owner's own static share, moved along the derivation path
    fn own_share(&self) -> Scalar {
        self.static_share(self.i.index()) + self.tweak
    }
}

impl fmt::Debug for PShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PShare")
            .field("i", &self.i)
            .field("y", &point_to_hex(&self.y))
            .finish_non_exhaustive()
    }
}

/// Local half of a signing round
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct XShare {
    #[zeroize(skip)]
    pub i: Party,
    #[zeroize(skip)]
    pub y: EdwardsPoint,
    pub u: Scalar,
    pub r: Scalar,
    #[zeroize(skip)]
    pub big_r: EdwardsPoint,
}

/// Nonce and static share contribution sent to a signing counterparty
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RShare {
    /// Recipient position
    #[zeroize(skip)]
    pub i: Party,
    /// Sender position
    #[zeroize(skip)]
    pub j: Party,
    /// `f_j(i)` of the sender's static polynomial
    pub u: Scalar,
    #[zeroize(skip)]
    pub v: EdwardsPoint,
    /// Recipient's share of the sender's nonce
    pub r: Scalar,
    /// Sender's nonce commitment
    #[zeroize(skip)]
    pub big_r: EdwardsPoint,
    /// `r·G`, when the sender includes it
    #[zeroize(skip)]
    pub commitment: Option<EdwardsPoint>,
}

impl fmt::Debug for RShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RShare")
            .field("i", &self.i)
            .field("j", &self.j)
            .field("R", &point_to_hex(&self.big_r))
            .finish_non_exhaustive()
    }
}

/// Result of `sign_share`
pub struct SignShare {
    pub x_share: XShare,
    pub r_shares: BTreeMap<Party, RShare>,
}

/// Partial signature of one party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GShare {
    pub i: Party,
    pub y: EdwardsPoint,
    pub gamma: Scalar,
    pub big_r: EdwardsPoint,
}

/// Combined Ed25519 signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub y: EdwardsPoint,
    pub big_r: EdwardsPoint,
    pub sigma: Scalar,
}

impl Signature {
    /// `R ‖ s` as used on the wire and by Ed25519 verifiers
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(self.big_r.compress().as_bytes());
        bytes[32..].copy_from_slice(self.sigma.as_bytes());
        bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

/// Generate a fresh key share for `index`
pub fn key_share(index: Party) -> KeyShare {
    let mut seed = Zeroizing::new([0u8; 64]);
    OsRng.fill_bytes(&mut seed[..]);
    key_share_from_seed(index, &seed)
}

/// Generate a key share from 64 bytes: a 32-byte seed followed by a
/// 32-byte chain code
pub fn key_share_from_seed(index: Party, seedchain: &[u8; 64]) -> KeyShare {
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&seedchain[..32]);
    let mut chaincode = [0u8; 32];
    chaincode.copy_from_slice(&seedchain[32..]);

    let mut u_share = UShare {
        i: index,
        t: THRESHOLD as u8,
        n: PARTIES as u8,
        y: EdwardsPoint::default(),
        seed,
        chaincode,
    };
    seed.zeroize();
    u_share.y = ED25519_BASEPOINT_POINT * u_share.polynomial()[0];

    let y_shares = index
        .others()
        .into_iter()
        .map(|other| {
            let share = YShare {
                i: other,
                j: index,
                y: u_share.y,
                v: u_share.commitment(),
                u: u_share.evaluate(other.index()),
                chaincode: u_share.chaincode,
            };
            (other, share)
        })
        .collect();

    KeyShare { u_share, y_shares }
}

/// Combine the own share with the Y-shares received from every other
/// party, verifying each one
pub fn key_combine(u_share: &UShare, y_shares: &[&YShare]) -> Result<CombinedKey> {
    let mut senders = Vec::with_capacity(y_shares.len());
    for share in y_shares {
        if share.i != u_share.i {
            return Err(Error::InvalidShareIndex(share.i.index()));
        }
        if share.j == u_share.i || senders.contains(&share.j) {
            return Err(Error::InvalidShareIndex(share.j.index()));
        }
        share.verify()?;
        senders.push(share.j);
    }
    if senders.len() + 1 != u_share.n as usize {
        return Err(Error::InvalidConfig(format!(
            "Expected {} YShares, got {}",
            u_share.n as usize - 1,
            senders.len()
        )));
    }

    let public_key = y_shares
        .iter()
        .fold(u_share.y, |acc, share| acc + share.y);
    let chaincode = y_shares.iter().fold(u_share.chaincode, |acc, share| {
        add_chaincodes(&acc, &share.chaincode)
    });

    Ok(CombinedKey {
        public_key,
        chaincode,
    })
}

/// Signing key for `path`
pub fn key_derive(u_share: &UShare, y_shares: &[&YShare], path: &str) -> Result<PShare> {
    let combined = key_combine(u_share, y_shares)?;
    let derived = hd::derive_public(&combined.public_key, &combined.chaincode, path)?;
    let polynomial = u_share.polynomial();

    Ok(PShare {
        i: u_share.i,
        y: derived.public_key,
        chaincode: derived.chaincode,
        v: ED25519_BASEPOINT_POINT * polynomial[1],
        secret: polynomial[0],
        coefficient: polynomial[1],
        tweak: derived.tweak,
        prefix: u_share.prefix(),
    })
}

/// First signing step: commit to a nonce and share it with `counterparties`
pub fn sign_share(message: &[u8], p_share: &PShare, counterparties: &[Party]) -> Result<SignShare> {
    sign_share_with_rng(message, p_share, counterparties, &mut OsRng)
}

/// `sign_share` with a caller supplied randomness source
pub fn sign_share_with_rng<R: RngCore + CryptoRng>(
    message: &[u8],
    p_share: &PShare,
    counterparties: &[Party],
    rng: &mut R,
) -> Result<SignShare> {
    if counterparties.is_empty() {
        return Err(Error::InvalidConfig("No signing counterparty".into()));
    }
    let mut indices = vec![p_share.i.index()];
    for counterparty in counterparties {
        if indices.contains(&counterparty.index()) {
            return Err(Error::InvalidRecipient(counterparty.index()));
        }
        indices.push(counterparty.index());
    }

    // The nonce is bound to the payload and to fresh randomness.
    let mut random = Zeroizing::new([0u8; 64]);
    rng.fill_bytes(&mut random[..]);
    let mut hasher = Sha512::new();
    hasher.update(p_share.prefix);
    hasher.update(message);
    hasher.update(&random[..]);
    let mut wide = Zeroizing::new([0u8; 64]);
    wide.copy_from_slice(&hasher.finalize());

    let r = Zeroizing::new(Scalar::from_bytes_mod_order_wide(&wide));
    let big_r = ED25519_BASEPOINT_POINT * *r;
    let split_r = Zeroizing::new(shamir::split(*r, indices.len(), &indices, rng)?);

    let x_share = XShare {
        i: p_share.i,
        y: p_share.y,
        u: p_share.own_share(),
        r: split_r[0],
        big_r,
    };

    let r_shares = counterparties
        .iter()
        .zip(split_r.iter().skip(1))
        .map(|(counterparty, r_share)| {
            let share = RShare {
                i: *counterparty,
                j: p_share.i,
                u: p_share.static_share(counterparty.index()),
                v: p_share.v,
                r: *r_share,
                big_r,
                commitment: Some(ED25519_BASEPOINT_POINT * r_share),
            };
            (*counterparty, share)
        })
        .collect();

    Ok(SignShare { x_share, r_shares })
}

/// Second signing step: the partial signature of `x_share`'s owner.
///
/// `y_shares` are the static Y-shares from parties not taking part in the
/// round.
pub fn sign(
    message: &[u8],
    x_share: &XShare,
    r_shares: &[&RShare],
    y_shares: &[&YShare],
) -> Result<GShare> {
    for r_share in r_shares {
        if r_share.i != x_share.i {
            return Err(Error::InvalidShare(format!(
                "RShare addressed to {} used by {}",
                r_share.i, x_share.i
            )));
        }
        if let Some(commitment) = r_share.commitment {
            if ED25519_BASEPOINT_POINT * r_share.r != commitment {
                return Err(Error::VerificationFailed(format!(
                    "RShare commitment from {} is invalid",
                    r_share.j
                )));
            }
        }
    }
    for y_share in y_shares {
        if y_share.i != x_share.i {
            return Err(Error::InvalidShare(format!(
                "YShare addressed to {} used by {}",
                y_share.i, x_share.i
            )));
        }
    }

    let x = Zeroizing::new(
        r_shares.iter().map(|share| share.u).sum::<Scalar>()
            + y_shares.iter().map(|share| share.u).sum::<Scalar>()
            + x_share.u,
    );
    let big_r = r_shares
        .iter()
        .fold(x_share.big_r, |acc, share| acc + share.big_r);
    let r = Zeroizing::new(r_shares.iter().map(|share| share.r).sum::<Scalar>() + x_share.r);

    let k = challenge(&big_r, &x_share.y, message);

    Ok(GShare {
        i: x_share.i,
        y: x_share.y,
        gamma: *r + k * *x,
        big_r,
    })
}

/// Combine partial signatures from a signing quorum
pub fn sign_combine(shares: &[GShare]) -> Result<Signature> {
    let first = shares
        .first()
        .ok_or_else(|| Error::InvalidConfig("No GShares to combine".into()))?;

    for share in shares {
        if share.y != first.y || share.big_r != first.big_r {
            return Err(Error::InvalidShare(format!(
                "GShare from {} signs a different key or nonce",
                share.i
            )));
        }
    }

    let points: Vec<(u8, Scalar)> = shares
        .iter()
        .map(|share| (share.i.index(), share.gamma))
        .collect();
    let sigma = shamir::combine(&points)?;

    Ok(Signature {
        y: first.y,
        big_r: first.big_r,
        sigma,
    })
}

/// Strict Ed25519 verification of a combined signature
pub fn verify(message: &[u8], signature: &Signature) -> Result<()> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&signature.y.compress().to_bytes())
        .map_err(|e| Error::Crypto(format!("Invalid public key: {}", e)))?;
    let signature = ed25519_dalek::Signature::from_bytes(&signature.to_bytes());

    verifying_key
        .verify_strict(message, &signature)
        .map_err(|e| Error::VerificationFailed(format!("Signature verification failed: {}", e)))
}

/// `H(R ‖ Y ‖ m)` reduced modulo the group order
pub fn challenge(big_r: &EdwardsPoint, y: &EdwardsPoint, message: &[u8]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(big_r.compress().as_bytes());
    hasher.update(y.compress().as_bytes());
    hasher.update(message);
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Sum of two big-endian chain codes modulo 2^256
pub fn add_chaincodes(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut sum = [0u8; 32];
    let mut carry = 0u16;
    for k in (0..32).rev() {
        let total = a[k] as u16 + b[k] as u16 + carry;
        sum[k] = total as u8;
        carry = total >> 8;
    }
    sum
}

fn seed_digest(seed: &[u8; 32]) -> [u8; 64] {
    let mut digest = [0u8; 64];
    digest.copy_from_slice(&Sha512::digest(seed));
    digest
}

/// Hex encoding of a compressed point
pub fn point_to_hex(point: &EdwardsPoint) -> String {
    hex::encode(point.compress().as_bytes())
}

/// Decode a hex encoded compressed point
pub fn point_from_hex(encoded: &str) -> Result<EdwardsPoint> {
    point_from_bytes(&decode_32(encoded)?)
}

/// Decompress a 32-byte point encoding
pub fn point_from_bytes(bytes: &[u8]) -> Result<EdwardsPoint> {
    CompressedEdwardsY::from_slice(bytes)
        .map_err(|_| Error::Deserialization("Invalid Edwards point length".into()))?
        .decompress()
        .ok_or_else(|| Error::Deserialization("Invalid Edwards point".into()))
}

/// Hex encoding of a scalar
pub fn scalar_to_hex(scalar: &Scalar) -> String {
    hex::encode(scalar.as_bytes())
}

/// Decode a hex encoded canonical scalar
pub fn scalar_from_hex(encoded: &str) -> Result<Scalar> {
    let bytes = decode_32(encoded)?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
        .ok_or_else(|| Error::Deserialization("Non-canonical scalar".into()))
}

fn decode_32(encoded: &str) -> Result<[u8; 32]> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(encoded, &mut bytes)?;
    Ok(bytes)
}

mod point_hex {
    use curve25519_dalek::EdwardsPoint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(point: &EdwardsPoint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::point_to_hex(point))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<EdwardsPoint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        super::point_from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

mod scalar_hex {
    use curve25519_dalek::Scalar;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::scalar_to_hex(scalar))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Scalar, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        super::scalar_from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_all() -> BTreeMap<Party, KeyShare> {
        Party::ALL
            .into_iter()
            .map(|party| (party, key_share(party)))
            .collect()
    }

    fn received<'a>(shares: &'a BTreeMap<Party, KeyShare>, party: Party) -> Vec<&'a YShare> {
        party
            .others()
            .iter()
            .map(|other| &shares[other].y_shares[&party])
            .collect()
    }

    #[test]
    fn test_key_share_shape() {
        let share = key_share(Party::Backup);
        assert_eq!(share.u_share.i, Party::Backup);
        assert_eq!(share.u_share.t, 2);
        assert_eq!(share.u_share.n, 3);
        assert_eq!(share.y_shares.len(), 2);
        assert!(share.y_shares.contains_key(&Party::User));
        assert!(share.y_shares.contains_key(&Party::Server));
        for y_share in share.y_shares.values() {
            assert_eq!(y_share.j, Party::Backup);
            y_share.verify().unwrap();
        }
    }

    #[test]
    fn test_key_share_from_seed_is_deterministic() {
        let seed = [3u8; 64];
        let a = key_share_from_seed(Party::User, &seed);
        let b = key_share_from_seed(Party::User, &seed);
        assert_eq!(a.u_share.y, b.u_share.y);
        assert_eq!(a.y_shares[&Party::Server].u, b.y_shares[&Party::Server].u);
        assert_eq!(a.u_share.chaincode, [3u8; 32]);
    }

    #[test]
    fn test_combine_agrees_across_parties() {
        let shares = generate_all();
        let combined: Vec<CombinedKey> = Party::ALL
            .iter()
            .map(|party| key_combine(&shares[party].u_share, &received(&shares, *party)).unwrap())
            .collect();

        assert_eq!(combined[0], combined[1]);
        assert_eq!(combined[1], combined[2]);
    }

    #[test]
    fn test_combine_rejects_tampered_share() {
        let shares = generate_all();
        let mut tampered = shares[&Party::Backup].y_shares[&Party::User].clone();
        tampered.u += Scalar::ONE;
        let server_share = &shares[&Party::Server].y_shares[&Party::User];

        let result = key_combine(&shares[&Party::User].u_share, &[&tampered, server_share]);
        assert!(matches!(result, Err(Error::VerificationFailed(_))));
    }

    #[test]
    fn test_combine_rejects_misaddressed_share() {
        let shares = generate_all();
        let wrong = &shares[&Party::Backup].y_shares[&Party::Server];
        let server_share = &shares[&Party::Server].y_shares[&Party::User];

        let result = key_combine(&shares[&Party::User].u_share, &[wrong, server_share]);
        assert!(matches!(result, Err(Error::InvalidShareIndex(3))));
    }

    #[test]
    fn test_chaincode_addition_wraps() {
        let max = [0xffu8; 32];
        let mut one = [0u8; 32];
        one[31] = 1;
        assert_eq!(add_chaincodes(&max, &one), [0u8; 32]);

        let mut low = [0u8; 32];
        low[31] = 0xff;
        let mut expected = [0u8; 32];
        expected[30] = 1;
        assert_eq!(add_chaincodes(&low, &one), expected);
    }

    fn sign_pair(signer: Party, path: &str, message: &[u8]) {
        let shares = generate_all();
        let third = signer.third(Party::Server).unwrap();

        let signer_p = key_derive(&shares[&signer].u_share, &received(&shares, signer), path).unwrap();
        let server_p = key_derive(
            &shares[&Party::Server].u_share,
            &received(&shares, Party::Server),
            path,
        )
        .unwrap();
        assert_eq!(signer_p.y, server_p.y);

        let signer_round = sign_share(message, &signer_p, &[Party::Server]).unwrap();
        let server_round = sign_share(message, &server_p, &[signer]).unwrap();

        let signer_g = sign(
            message,
            &signer_round.x_share,
            &[&server_round.r_shares[&signer]],
            &[&shares[&third].y_shares[&signer]],
        )
        .unwrap();
        let server_g = sign(
            message,
            &server_round.x_share,
            &[&signer_round.r_shares[&Party::Server]],
            &[&shares[&third].y_shares[&Party::Server]],
        )
        .unwrap();

        let signature = sign_combine(&[signer_g, server_g]).unwrap();
        verify(message, &signature).unwrap();

        let combined = key_combine(&shares[&signer].u_share, &received(&shares, signer)).unwrap();
        let derived = combined.common_keychain().derive(path).unwrap();
        assert_eq!(derived.public_key().unwrap(), signature.y);

        assert!(verify(b"another message", &signature).is_err());
    }

    #[test]
    fn test_user_server_signature_verifies() {
        sign_pair(Party::User, "m/0", b"transfer 10 to alice");
    }

    #[test]
    fn test_backup_server_signature_verifies() {
        sign_pair(Party::Backup, "m/1/5", b"recovery transfer");
    }

    #[test]
    fn test_sign_rejects_bad_commitment() {
        let shares = generate_all();
        let user_p = key_derive(&shares[&Party::User].u_share, &received(&shares, Party::User), "m/0")
            .unwrap();
        let server_p = key_derive(
            &shares[&Party::Server].u_share,
            &received(&shares, Party::Server),
            "m/0",
        )
        .unwrap();

        let user_round = sign_share(b"msg", &user_p, &[Party::Server]).unwrap();
        let server_round = sign_share(b"msg", &server_p, &[Party::User]).unwrap();
        let mut forged = server_round.r_shares[&Party::User].clone();
        forged.r += Scalar::ONE;

        let result = sign(b"msg", &user_round.x_share, &[&forged], &[]);
        assert!(matches!(result, Err(Error::VerificationFailed(_))));
    }

    #[test]
    fn test_sign_share_rejects_self() {
        let shares = generate_all();
        let user_p = key_derive(&shares[&Party::User].u_share, &received(&shares, Party::User), "m")
            .unwrap();
        let result = sign_share(b"msg", &user_p, &[Party::User]);
        assert!(matches!(result, Err(Error::InvalidRecipient(1))));
    }

    #[test]
    fn test_hex_helpers() {
        let point = ED25519_BASEPOINT_POINT * Scalar::from(5u64);
        assert_eq!(point_from_hex(&point_to_hex(&point)).unwrap(), point);
        assert!(point_from_hex("abcd").is_err());
        assert!(scalar_from_hex(&"ff".repeat(32)).is_err());
    }
}
