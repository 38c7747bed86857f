//! Wire form of signature share records

use crate::eddsa::{self, GShare, PShare, RShare, UShare};
use crate::messaging::{self, MessagingKey, MessagingPublicKey};
use crate::types::Party;
use crate::{Error, Result};
use curve25519_dalek::{EdwardsPoint, Scalar};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const ELEMENT_HEX_LEN: usize = 64;

/// R-share as carried in a signature share record: `r ‖ R`, optionally
/// preceded by the sender's coefficient commitment `v`
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RShareRecord {
    #[zeroize(skip)]
    pub v: Option<EdwardsPoint>,
    pub r: Scalar,
    #[zeroize(skip)]
    pub big_r: EdwardsPoint,
}

impl RShareRecord {
    pub fn from_r_share(share: &RShare) -> Self {
        Self {
            v: None,
            r: share.r,
            big_r: share.big_r,
        }
    }

    pub fn encode(&self) -> String {
        let mut encoded = String::with_capacity(3 * ELEMENT_HEX_LEN);
        if let Some(v) = &self.v {
            encoded.push_str(&eddsa::point_to_hex(v));
        }
        encoded.push_str(&eddsa::scalar_to_hex(&self.r));
        encoded.push_str(&eddsa::point_to_hex(&self.big_r));
        encoded
    }

    pub fn decode(share: &str) -> Result<Self> {
        check_ascii(share)?;
        let (v, rest) = match share.len() {
            len if len == 2 * ELEMENT_HEX_LEN => (None, share),
            len if len == 3 * ELEMENT_HEX_LEN => (
                Some(eddsa::point_from_hex(&share[..ELEMENT_HEX_LEN])?),
                &share[ELEMENT_HEX_LEN..],
            ),
            len => {
                return Err(Error::InvalidShare(format!(
                    "RShare record has length {}",
                    len
                )))
            }
        };
        Ok(Self {
            v,
            r: eddsa::scalar_from_hex(&rest[..ELEMENT_HEX_LEN])?,
            big_r: eddsa::point_from_hex(&rest[ELEMENT_HEX_LEN..])?,
        })
    }

    /// Rebuild the R-share `sender` sent to `recipient`. The static part `u`
    /// comes from the recipient's Y-share of the sender, as does `v` unless
    /// the record carries it.
    pub fn to_r_share(
        &self,
        recipient: Party,
        sender: Party,
        u: Scalar,
        v: EdwardsPoint,
    ) -> RShare {
        RShare {
            i: recipient,
            j: sender,
            u,
            v: self.v.unwrap_or(v),
            r: self.r,
            big_r: self.big_r,
            commitment: None,
        }
    }
}

/// G-share as carried in a signature share record: `R ‖ gamma`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GShareRecord {
    pub big_r: EdwardsPoint,
    pub gamma: Scalar,
}

impl GShareRecord {
    pub fn from_g_share(share: &GShare) -> Self {
        Self {
            big_r: share.big_r,
            gamma: share.gamma,
        }
    }

    pub fn encode(&self) -> String {
        let mut encoded = eddsa::point_to_hex(&self.big_r);
        encoded.push_str(&eddsa::scalar_to_hex(&self.gamma));
        encoded
    }

    pub fn decode(share: &str) -> Result<Self> {
        check_ascii(share)?;
        if share.len() != 2 * ELEMENT_HEX_LEN {
            return Err(Error::InvalidShare(format!(
                "GShare record has length {}",
                share.len()
            )));
        }
        Ok(Self {
            big_r: eddsa::point_from_hex(&share[..ELEMENT_HEX_LEN])?,
            gamma: eddsa::scalar_from_hex(&share[ELEMENT_HEX_LEN..])?,
        })
    }

    pub fn to_g_share(&self, owner: Party, y: EdwardsPoint) -> GShare {
        GShare {
            i: owner,
            y,
            gamma: self.gamma,
            big_r: self.big_r,
        }
    }
}

fn check_ascii(share: &str) -> Result<()> {
    if share.is_ascii() {
        Ok(())
    } else {
        Err(Error::InvalidShare("Share record is not hex".into()))
    }
}

/// Signer share opened by the Server: the offering party's static share for
/// the Server and the derived chain code of the signing key
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SignerShare {
    pub u: Scalar,
    pub chaincode: [u8; 32],
}

impl SignerShare {
    /// Constant-time check against the Server's own view
    pub fn matches(&self, u: &Scalar, chaincode: &[u8; 32]) -> bool {
        bool::from(self.u.ct_eq(u) & self.chaincode[..].ct_eq(&chaincode[..]))
    }
}

/// Encrypt `u ‖ chaincode` of the signing key's share for the Server to the
/// service key
pub fn encrypt_signer_share(
    u_share: &UShare,
    p_share: &PShare,
    service_key: &MessagingPublicKey,
) -> Result<String> {
    let mut payload = Zeroizing::new([0u8; 64]);
    payload[..32].copy_from_slice(u_share.evaluate(Party::Server.index()).as_bytes());
    payload[32..].copy_from_slice(&p_share.chaincode);
    messaging::encrypt(&payload[..], service_key)
}

/// Open a signer share with the service key
pub fn decrypt_signer_share(armored: &str, service_key: &MessagingKey) -> Result<SignerShare> {
    let payload = messaging::decrypt(armored, service_key)?;
    if payload.len() != 64 {
        return Err(Error::InvalidShare(format!(
            "Signer share has length {}",
            payload.len()
        )));
    }
    let mut u_bytes = Zeroizing::new([0u8; 32]);
    u_bytes.copy_from_slice(&payload[..32]);
    let u = Option::<Scalar>::from(Scalar::from_canonical_bytes(*u_bytes))
        .ok_or_else(|| Error::InvalidShare("Signer share is not a canonical scalar".into()))?;
    let mut chaincode = [0u8; 32];
    chaincode.copy_from_slice(&payload[32..]);
    Ok(SignerShare { u, chaincode })
}

#[cfg(test)]
mod tests {
    use super::*;
    use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;

    #[test]
    fn test_r_share_record_forms() {
        let record = RShareRecord {
            v: None,
            r: Scalar::from(7u64),
            big_r: ED25519_BASEPOINT_POINT * Scalar::from(11u64),
        };
        let encoded = record.encode();
        assert_eq!(encoded.len(), 128);
        let decoded = RShareRecord::decode(&encoded).unwrap();
        assert_eq!(decoded.r, record.r);
        assert!(decoded.v.is_none());

        let v = ED25519_BASEPOINT_POINT * Scalar::from(3u64);
        let with_v = format!("{}{}", eddsa::point_to_hex(&v), encoded);
        let decoded = RShareRecord::decode(&with_v).unwrap();
        assert_eq!(decoded.v, Some(v));

        let rebuilt =
            decoded.to_r_share(Party::User, Party::Server, Scalar::ONE, ED25519_BASEPOINT_POINT);
        assert_eq!(rebuilt.v, v);
        assert_eq!(rebuilt.big_r, record.big_r);

        assert!(RShareRecord::decode("abcd").is_err());
    }

    #[test]
    fn test_g_share_record() {
        let record = GShareRecord {
            big_r: ED25519_BASEPOINT_POINT,
            gamma: Scalar::from(42u64),
        };
        let encoded = record.encode();
        assert_eq!(GShareRecord::decode(&encoded).unwrap(), record);
        assert!(GShareRecord::decode(&encoded[..100]).is_err());
    }

    #[test]
    fn test_signer_share_round_trip() {
        let shares = eddsa::key_share(Party::User);
        let server = eddsa::key_share(Party::Server);
        let backup = eddsa::key_share(Party::Backup);
        let p_share = eddsa::key_derive(
            &shares.u_share,
            &[&server.y_shares[&Party::User], &backup.y_shares[&Party::User]],
            "m/0",
        )
        .unwrap();

        let service = MessagingKey::generate();
        let armored = encrypt_signer_share(&shares.u_share, &p_share, &service.public_key()).unwrap();
        let opened = decrypt_signer_share(&armored, &service).unwrap();

        let expected = &shares.y_shares[&Party::Server];
        assert!(opened.matches(&expected.u, &p_share.chaincode));
        assert!(!opened.matches(&expected.u, &[0u8; 32]));

        let other = MessagingKey::generate();
        assert!(matches!(
            decrypt_signer_share(&armored, &other),
            Err(Error::Crypto(_))
        ));
    }
}
