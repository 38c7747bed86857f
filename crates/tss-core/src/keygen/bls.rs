//! BLS12-381 distributed key generation
//!
//! Same three-party shape as the Ed25519 scheme with public shares in G1.
//! Combination aggregates the signing share first and then checks it
//! against the sum of every party's public commitments. The combined key
//! is published as `common_public_key`, the hex of its 48-byte compressed
//! encoding.

use super::combine::{decrypt_routed, DecryptableYShare};
use super::scheme::GenerationScheme;
use super::transport::{ExchangeableShare, ShareSource};
use crate::api::async_trait;
use crate::eddsa::add_chaincodes;
use crate::shamir;
use crate::types::{KeyType, Party};
use crate::{Error, Result, PARTIES, THRESHOLD};
use bls12_381::{G1Affine, G1Projective, Scalar};
use rand::rngs::OsRng;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const SECRET_DOMAIN: &[u8] = b"tss-bls/polynomial-secret";
const COEFFICIENT_DOMAIN: &[u8] = b"tss-bls/polynomial-coefficient";

/// Length of a compressed G1 point
pub const G1_LEN: usize = 48;

/// A party's own contribution
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BlsUShare {
    #[zeroize(skip)]
    pub i: Party,
    #[zeroize(skip)]
    pub t: u8,
    #[zeroize(skip)]
    pub n: u8,
    #[zeroize(skip)]
    pub y: G1Projective,
    pub seed: [u8; 32],
    pub chaincode: [u8; 32],
}

impl BlsUShare {
    /// `[u_i, a_i]`
    fn polynomial(&self) -> Zeroizing<[Scalar; 2]> {
        Zeroizing::new([
            hash_to_scalar(SECRET_DOMAIN, &self.seed),
            hash_to_scalar(COEFFICIENT_DOMAIN, &self.seed),
        ])
    }

    /// `f_i(index)`
    pub fn evaluate(&self, index: u8) -> Scalar {
        shamir::evaluate_polynomial(self.polynomial().as_slice(), index)
    }

    /// Feldman commitment to the coefficient
    pub fn commitment(&self) -> G1Projective {
        G1Projective::generator() * self.polynomial()[1]
    }
}

/// Share of party `j`'s polynomial held by party `i`
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BlsYShare {
    #[zeroize(skip)]
    pub i: Party,
    #[zeroize(skip)]
    pub j: Party,
    #[zeroize(skip)]
    pub y: G1Projective,
    #[zeroize(skip)]
    pub v: G1Projective,
    /// Canonical encoding of `f_j(i)`
    u: [u8; 32],
    #[zeroize(skip)]
    pub chaincode: [u8; 32],
}

impl BlsYShare {
    /// `f_j(i)`
    pub fn u(&self) -> Result<Scalar> {
        Option::<Scalar>::from(Scalar::from_bytes(&self.u))
            .ok_or_else(|| Error::InvalidShare("Non-canonical BLS scalar".into()))
    }
}

impl fmt::Debug for BlsYShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlsYShare")
            .field("i", &self.i)
            .field("j", &self.j)
            .finish_non_exhaustive()
    }
}

impl ExchangeableShare for BlsYShare {
    fn recipient(&self) -> Party {
        self.i
    }

    fn sender(&self) -> Party {
        self.j
    }

    fn public_part(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 * G1_LEN + 32);
        bytes.extend_from_slice(&G1Affine::from(self.y).to_compressed());
        bytes.extend_from_slice(&G1Affine::from(self.v).to_compressed());
        bytes.extend_from_slice(&self.chaincode);
        bytes
    }

    fn private_part(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(64));
        bytes.extend_from_slice(&self.u);
        bytes.extend_from_slice(&self.chaincode);
        bytes
    }

    fn from_parts(recipient: Party, sender: Party, public: &[u8], private: &[u8]) -> Result<Self> {
        if public.len() != 2 * G1_LEN + 32 || private.len() != 64 {
            return Err(Error::InvalidShare(format!(
                "Unexpected BLS YShare lengths {}/{}",
                public.len(),
                private.len()
            )));
        }

        let mut u = [0u8; 32];
        u.copy_from_slice(&private[..32]);
        let mut chaincode = [0u8; 32];
        chaincode.copy_from_slice(&private[32..]);

        let share = BlsYShare {
            i: recipient,
            j: sender,
            y: g1_from_bytes(&public[..G1_LEN])?,
            v: g1_from_bytes(&public[G1_LEN..2 * G1_LEN])?,
            u,
            chaincode,
        };
        share.u()?;
        Ok(share)
    }
}

/// Output of BLS share generation
#[derive(Clone)]
pub struct BlsKeyShare {
    pub u_share: BlsUShare,
    pub y_shares: BTreeMap<Party, BlsYShare>,
}

impl ShareSource for BlsKeyShare {
    type Share = BlsYShare;

    fn owner(&self) -> Party {
        self.u_share.i
    }

    fn y_share_for(&self, recipient: Party) -> Option<&BlsYShare> {
        self.y_shares.get(&recipient)
    }
}

/// Durable BLS signing material of one party
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct BlsSigningMaterial {
    #[zeroize(skip)]
    pub party: Party,
    /// Aggregated signing share `Σ_k f_k(i)`
    #[serde(with = "hex::serde")]
    signing_share: [u8; 32],
    /// Hex of the compressed combined public key
    #[zeroize(skip)]
    pub common_public_key: String,
    #[zeroize(skip)]
    #[serde(with = "hex::serde")]
    pub chaincode: [u8; 32],
}

impl BlsSigningMaterial {
    pub fn signing_share(&self) -> Result<Scalar> {
        Option::<Scalar>::from(Scalar::from_bytes(&self.signing_share))
            .ok_or_else(|| Error::Deserialization("Non-canonical BLS signing share".into()))
    }
}

impl fmt::Debug for BlsSigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlsSigningMaterial")
            .field("party", &self.party)
            .field("common_public_key", &self.common_public_key)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh BLS key share for `index`
pub fn key_share(index: Party) -> BlsKeyShare {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let mut chaincode = [0u8; 32];
    OsRng.fill_bytes(&mut chaincode);

    let mut u_share = BlsUShare {
        i: index,
        t: THRESHOLD as u8,
        n: PARTIES as u8,
        y: G1Projective::identity(),
        seed,
        chaincode,
    };
    seed.zeroize();
    u_share.y = G1Projective::generator() * u_share.polynomial()[0];

    let y_shares = index
        .others()
        .into_iter()
        .map(|other| {
            let share = BlsYShare {
                i: other,
                j: index,
                y: u_share.y,
                v: u_share.commitment(),
                u: u_share.evaluate(other.index()).to_bytes(),
                chaincode: u_share.chaincode,
            };
            (other, share)
        })
        .collect();

    BlsKeyShare { u_share, y_shares }
}

/// Aggregate the signing share of `local`'s owner and check it against the
/// public commitments of all three parties
pub fn key_combine(
    local: &BlsUShare,
    received: &BTreeMap<Party, BlsYShare>,
) -> Result<BlsSigningMaterial> {
    if received.len() + 1 != local.n as usize {
        return Err(Error::InvalidConfig(format!(
            "Expected {} BLS YShares, got {}",
            local.n as usize - 1,
            received.len()
        )));
    }

    let index = local.i.index();
    let mut signing_share = Zeroizing::new(local.evaluate(index));
    let mut public_key = local.y;
    let mut expected = local.y + local.commitment() * shamir::index_scalar::<Scalar>(index);
    let mut chaincode = local.chaincode;

    for (sender, share) in received {
        if share.i != local.i {
            return Err(Error::InvalidShareIndex(share.i.index()));
        }
        if *sender == local.i || share.j != *sender {
            return Err(Error::InvalidShareIndex(share.j.index()));
        }
        *signing_share += share.u()?;
        public_key += share.y;
        expected += share.y + share.v * shamir::index_scalar::<Scalar>(index);
        chaincode = add_chaincodes(&chaincode, &share.chaincode);
    }

    if G1Projective::generator() * *signing_share != expected {
        return Err(Error::VerificationFailed(format!(
            "Aggregated BLS signing share of {} does not match the commitments",
            local.i
        )));
    }

    Ok(BlsSigningMaterial {
        party: local.i,
        signing_share: signing_share.to_bytes(),
        common_public_key: g1_to_hex(&public_key),
        chaincode,
    })
}

/// Hex of a compressed G1 point
pub fn g1_to_hex(point: &G1Projective) -> String {
    hex::encode(G1Affine::from(point).to_compressed())
}

fn g1_from_bytes(bytes: &[u8]) -> Result<G1Projective> {
    let mut compressed = [0u8; G1_LEN];
    if bytes.len() != G1_LEN {
        return Err(Error::Deserialization("Invalid G1 point length".into()));
    }
    compressed.copy_from_slice(bytes);
    Option::<G1Affine>::from(G1Affine::from_compressed(&compressed))
        .map(G1Projective::from)
        .ok_or_else(|| Error::Deserialization("Invalid G1 point".into()))
}

fn hash_to_scalar(domain: &[u8], seed: &[u8; 32]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(domain);
    hasher.update(seed);
    let mut wide = Zeroizing::new([0u8; 64]);
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_wide(&wide)
}

/// BLS12-381 distributed key generation
#[derive(Debug, Clone, Copy, Default)]
pub struct BlsScheme;

#[async_trait]
impl GenerationScheme for BlsScheme {
    type KeyShare = BlsKeyShare;
    type SigningMaterial = BlsSigningMaterial;
    type ServerMaterial = BlsSigningMaterial;

    const KEY_TYPE: KeyType = KeyType::BlsDkg;

    fn generate_share(&self, party: Party) -> BlsKeyShare {
        key_share(party)
    }

    fn combine(
        &self,
        local: &BlsKeyShare,
        expected_common_key: &str,
        received: &[DecryptableYShare<'_>],
    ) -> Result<BlsSigningMaterial> {
        let routed = decrypt_routed(local.u_share.i, received)?;
        if !routed.contains_key(&Party::Server) {
            return Err(Error::InvalidShareIndex(Party::Server.index()));
        }
        let material = key_combine(&local.u_share, &routed)?;

        let matches = material.common_public_key.len() == expected_common_key.len()
            && bool::from(
                material
                    .common_public_key
                    .as_bytes()
                    .ct_eq(expected_common_key.as_bytes()),
            );
        if !matches {
            return Err(Error::Consistency("Common public keys do not match".into()));
        }
        Ok(material)
    }

    fn combine_server(
        &self,
        local: &BlsKeyShare,
        received: &[DecryptableYShare<'_>],
    ) -> Result<(String, BlsSigningMaterial)> {
        let routed = decrypt_routed(Party::Server, received)?;
        let material = key_combine(&local.u_share, &routed)?;
        Ok((material.common_public_key.clone(), material))
    }
}
