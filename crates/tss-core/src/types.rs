//! Core types for the tri-party TSS protocol

use crate::eddsa::{self, UShare, YShare};
use crate::{Error, Result};
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One of the three fixed key holders.
///
/// The discriminant is the party's position in the 2-of-3 sharing and is
/// used to tag every share and every protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    User = 1,
    Backup = 2,
    Server = 3,
}

impl Party {
    /// All parties in position order
    pub const ALL: [Party; 3] = [Party::User, Party::Backup, Party::Server];

    /// Position of this party in the sharing (1-based)
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Look up a party by its position
    pub fn from_index(index: u8) -> Option<Party> {
        match index {
            1 => Some(Party::User),
            2 => Some(Party::Backup),
            3 => Some(Party::Server),
            _ => None,
        }
    }

    /// The two parties other than `self`
    pub fn others(self) -> [Party; 2] {
        match self {
            Party::User => [Party::Backup, Party::Server],
            Party::Backup => [Party::User, Party::Server],
            Party::Server => [Party::User, Party::Backup],
        }
    }

    /// The party that is neither `self` nor `other`
    pub fn third(self, other: Party) -> Option<Party> {
        Party::ALL
            .into_iter()
            .find(|party| *party != self && *party != other)
            .filter(|_| self != other)
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Party::User => "user",
            Party::Backup => "backup",
            Party::Server => "server",
        };
        f.write_str(name)
    }
}

impl FromStr for Party {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Party::User),
            "backup" => Ok(Party::Backup),
            "server" => Ok(Party::Server),
            other => Err(Error::InvalidConfig(format!("Unknown party: {}", other))),
        }
    }
}

/// Key scheme tag, selects the generation algebra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Ed25519 threshold keychain
    #[serde(rename = "tss")]
    Tss,
    /// BLS12-381 distributed key generation
    #[serde(rename = "blsdkg")]
    BlsDkg,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Tss => f.write_str("tss"),
            KeyType::BlsDkg => f.write_str("blsdkg"),
        }
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tss" => Ok(KeyType::Tss),
            "blsdkg" => Ok(KeyType::BlsDkg),
            other => Err(Error::InvalidConfig(format!("Unknown key type: {}", other))),
        }
    }
}

/// Public key ‖ chain code of the combined key, hex encoded.
///
/// Every party computes this independently and all three values must be
/// byte-identical.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommonKeychain {
    encoded: String,
    public_key: [u8; 32],
    chaincode: [u8; 32],
}

impl CommonKeychain {
    /// Hex length of an encoded common keychain
    pub const HEX_LEN: usize = 128;

    /// Build from the combined public key and chain code
    pub fn new(public_key: &EdwardsPoint, chaincode: &[u8; 32]) -> Self {
        let public_key = public_key.compress().to_bytes();
        let mut encoded = hex::encode(public_key);
        encoded.push_str(&hex::encode(chaincode));
        Self {
            encoded,
            public_key,
            chaincode: *chaincode,
        }
    }

    /// Hex string form
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Compressed public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public_key
    }

    /// Combined public key point
    pub fn public_key(&self) -> Result<EdwardsPoint> {
        CompressedEdwardsY(self.public_key)
            .decompress()
            .ok_or_else(|| Error::Deserialization("Common keychain public key is not a point".into()))
    }

    /// Combined chain code
    pub fn chaincode(&self) -> [u8; 32] {
        self.chaincode
    }

    /// Base58 form of the public key, as used for Ed25519 addresses
    pub fn public_key_base58(&self) -> String {
        bs58::encode(self.public_key_bytes()).into_string()
    }

    /// Derive the child common keychain along a non-hardened path
    pub fn derive(&self, path: &str) -> Result<CommonKeychain> {
        let derived = eddsa::hd::derive_public(&self.public_key()?, &self.chaincode(), path)?;
        Ok(CommonKeychain::new(&derived.public_key, &derived.chaincode))
    }

    /// Constant-time comparison against another encoded keychain
    pub fn matches(&self, other: &str) -> bool {
        self.encoded.len() == other.len()
            && bool::from(self.encoded.as_bytes().ct_eq(other.as_bytes()))
    }
}

impl FromStr for CommonKeychain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN {
            return Err(Error::Deserialization(format!(
                "Invalid commonKeychain length, expected {}, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        if !s.is_ascii() {
            return Err(Error::Deserialization(
                "Invalid commonKeychain, expected hex".into(),
            ));
        }
        let mut public_key = [0u8; 32];
        let mut chaincode = [0u8; 32];
        hex::decode_to_slice(&s[..64], &mut public_key)?;
        hex::decode_to_slice(&s[64..], &mut chaincode)?;
        Ok(Self {
            encoded: s.to_ascii_lowercase(),
            public_key,
            chaincode,
        })
    }
}

impl TryFrom<String> for CommonKeychain {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CommonKeychain> for String {
    fn from(value: CommonKeychain) -> Self {
        value.encoded
    }
}

impl fmt::Debug for CommonKeychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommonKeychain({})", self.encoded)
    }
}

impl fmt::Display for CommonKeychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Y-share in wire form: public part in clear, private part signed by the
/// sender and encrypted to the recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedYShare {
    /// Recipient position
    pub i: u8,
    /// Sender position
    pub j: u8,
    /// Hex encoded y ‖ v ‖ chaincode of the sender
    pub public_share: String,
    /// Armored envelope holding u ‖ chaincode
    pub encrypted_private_share: String,
}

/// Durable signing material held by the User or Backup party
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct SigningMaterial {
    /// This party's own u-share
    pub u_share: UShare,
    /// Server to this party
    pub server_y_share: YShare,
    /// Backup to User, or User to Backup
    pub counterpart_y_share: YShare,
}

impl SigningMaterial {
    /// Owner of this material
    pub fn party(&self) -> Party {
        self.u_share.i
    }

    /// Check the Y-shares are addressed to the owner from the expected senders
    pub fn validate(&self) -> Result<()> {
        let owner = self.party();
        if owner == Party::Server {
            return Err(Error::InvalidConfig(
                "Signing material cannot belong to the server party".into(),
            ));
        }
        let counterpart = owner
            .third(Party::Server)
            .ok_or_else(|| Error::InvalidConfig("No counterpart party".into()))?;

        if self.server_y_share.i != owner || self.server_y_share.j != Party::Server {
            return Err(Error::InvalidShare(format!(
                "Server YShare is not from server to {}",
                owner
            )));
        }
        if self.counterpart_y_share.i != owner || self.counterpart_y_share.j != counterpart {
            return Err(Error::InvalidShare(format!(
                "Counterpart YShare is not from {} to {}",
                counterpart, owner
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("party", &self.party())
            .finish_non_exhaustive()
    }
}

/// Signing material kept by the Server party
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct ServerSigningMaterial {
    pub u_share: UShare,
    /// User to Server
    pub user_y_share: YShare,
    /// Backup to Server
    pub backup_y_share: YShare,
}

impl ServerSigningMaterial {
    /// The Y-share received from `party`
    pub fn y_share_from(&self, party: Party) -> Result<&YShare> {
        match party {
            Party::User => Ok(&self.user_y_share),
            Party::Backup => Ok(&self.backup_y_share),
            Party::Server => Err(Error::InvalidShareIndex(party.index())),
        }
    }

    /// Both received Y-shares
    pub fn y_shares(&self) -> [&YShare; 2] {
        [&self.user_y_share, &self.backup_y_share]
    }
}

impl fmt::Debug for ServerSigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSigningMaterial").finish_non_exhaustive()
    }
}

/// Fragment stored on a keychain record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeychainShare {
    pub from: Party,
    pub to: Party,
    /// Hex encoded public share
    pub public_share: String,
    /// Armored encrypted private share
    pub private_share: String,
}

impl KeychainShare {
    /// Convert to the transport form
    pub fn to_encrypted_y_share(&self) -> EncryptedYShare {
        EncryptedYShare {
            i: self.to.index(),
            j: self.from.index(),
            public_share: self.public_share.clone(),
            encrypted_private_share: self.private_share.clone(),
        }
    }

    /// Build from the transport form
    pub fn from_encrypted_y_share(share: &EncryptedYShare) -> Result<Self> {
        let from = Party::from_index(share.j).ok_or(Error::InvalidShareIndex(share.j))?;
        let to = Party::from_index(share.i).ok_or(Error::InvalidShareIndex(share.i))?;
        Ok(Self {
            from,
            to,
            public_share: share.public_share.clone(),
            private_share: share.encrypted_private_share.clone(),
        })
    }
}

/// Keychain record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keychain {
    pub id: String,
    pub source: Party,
    pub key_type: KeyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_keychain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_shares: Vec<KeychainShare>,
    /// Signing material encrypted under the wallet passphrase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_prv: Option<String>,
    /// Plaintext signing material, only ever held locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prv: Option<String>,
}

impl Keychain {
    /// Find the share sent from `from` to `to`
    pub fn key_share(&self, from: Party, to: Party) -> Option<&KeychainShare> {
        self.key_shares
            .iter()
            .find(|share| share.from == from && share.to == to)
    }

    /// The common key for this keychain's scheme
    pub fn common_key(&self) -> Option<&str> {
        match self.key_type {
            KeyType::Tss => self.common_keychain.as_deref(),
            KeyType::BlsDkg => self.common_public_key.as_deref(),
        }
    }
}

/// The three keychains produced by one generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeychainsTriplet {
    pub user_keychain: Keychain,
    pub backup_keychain: Keychain,
    pub server_keychain: Keychain,
}

/// Unsigned transaction awaiting signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTx {
    /// Exact bytes to be signed, hex encoded
    pub signable_hex: String,
    /// Serialized transaction, hex encoded
    pub serialized_tx_hex: String,
    /// Non-hardened derivation path of the signing key
    pub derivation_path: String,
}

/// Relay-side state of a transaction request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxRequestState {
    PendingUserSignature,
    Signed,
    Delivered,
}

/// Kind of signature share record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureShareRecord {
    pub from: Party,
    pub to: Party,
    /// Hex encoded share; its structure depends on the protocol phase
    pub share: String,
}

/// Transaction request with the signature shares accumulated so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    pub tx_request_id: String,
    pub wallet_id: String,
    pub state: TxRequestState,
    pub unsigned_txs: Vec<UnsignedTx>,
    #[serde(default)]
    pub signature_shares: Vec<SignatureShareRecord>,
}

impl TxRequest {
    /// The transaction signed by a round; a request carries exactly one
    pub fn unsigned_tx(&self) -> Result<&UnsignedTx> {
        match self.unsigned_txs.as_slice() {
            [unsigned_tx] => Ok(unsigned_tx),
            txs => Err(Error::ProtocolState(format!(
                "TxRequest {} has {} unsigned transactions, expected 1",
                self.tx_request_id,
                txs.len()
            ))),
        }
    }
}

/// Intent used to create a transaction request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxIntent {
    pub intent_type: String,
    pub signable_hex: String,
    #[serde(default)]
    pub serialized_tx_hex: Option<String>,
    pub derivation_path: String,
}

/// Result of handing a signed request to broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTxResult {
    pub tx_request_id: String,
    pub state: TxRequestState,
    /// Hex encoded R ‖ sigma
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_party_positions() {
        for party in Party::ALL {
            assert_eq!(Party::from_index(party.index()), Some(party));
        }
        assert_eq!(Party::from_index(0), None);
        assert_eq!(Party::from_index(4), None);
        assert_eq!(Party::User.third(Party::Server), Some(Party::Backup));
        assert_eq!(Party::Backup.third(Party::Server), Some(Party::User));
        assert_eq!(Party::User.third(Party::User), None);
    }

    #[test]
    fn test_party_serde() {
        let record = SignatureShareRecord {
            from: Party::Server,
            to: Party::User,
            share: "ab".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"from":"server","to":"user","share":"ab"}"#);
    }

    #[test]
    fn test_common_keychain_parse() {
        let too_short = "ab".repeat(10);
        assert!(too_short.parse::<CommonKeychain>().is_err());

        let not_hex = "zz".repeat(64);
        assert!(not_hex.parse::<CommonKeychain>().is_err());
        // Non-ASCII input of the right byte length is rejected, not sliced
        let multibyte = format!("{}é{}", "0".repeat(63), "0".repeat(63));
        assert_eq!(multibyte.len(), CommonKeychain::HEX_LEN);
        assert!(multibyte.parse::<CommonKeychain>().is_err());

        let point = curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
        let keychain = CommonKeychain::new(&point, &[7u8; 32]);
        let parsed: CommonKeychain = keychain.as_str().parse().unwrap();
        assert_eq!(parsed, keychain);
        assert_eq!(parsed.chaincode(), [7u8; 32]);
        assert_eq!(parsed.public_key_bytes(), point.compress().to_bytes());
        let upper: CommonKeychain = keychain.as_str().to_ascii_uppercase().parse().unwrap();
        assert_eq!(upper, keychain);
        assert_eq!(parsed.public_key().unwrap(), point);
        assert!(parsed.matches(keychain.as_str()));
        assert!(!parsed.matches(&"00".repeat(64)));
    }
}
