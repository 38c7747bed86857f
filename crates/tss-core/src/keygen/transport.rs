//! Share transport between parties
//!
//! A Y-share travels as its public part in clear and its private part
//! signed by the sender and encrypted to the recipient. The transport is
//! generic over the share algebra so every generation scheme reuses it.

use crate::eddsa::{self, KeyShare, YShare};
use crate::messaging::{self, MessagingKey, MessagingPublicKey};
use crate::types::{EncryptedYShare, Party};
use crate::{Error, Result};
use curve25519_dalek::Scalar;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Length of the chain code that closes both the public and private parts
pub const CHAINCODE_LEN: usize = 32;

/// A Y-share that can be split into public and private parts
pub trait ExchangeableShare: Sized {
    /// Recipient position
    fn recipient(&self) -> Party;

    /// Sender position
    fn sender(&self) -> Party;

    /// Sender's public contribution, commitments and chain code
    fn public_part(&self) -> Vec<u8>;

    /// Private component followed by the chain code
    fn private_part(&self) -> Zeroizing<Vec<u8>>;

    /// Rebuild the share from both parts
    fn from_parts(recipient: Party, sender: Party, public: &[u8], private: &[u8]) -> Result<Self>;
}

/// Local key material holding one outgoing Y-share per other party
pub trait ShareSource {
    type Share: ExchangeableShare;

    /// Owner position
    fn owner(&self) -> Party;

    /// Y-share addressed to `recipient`
    fn y_share_for(&self, recipient: Party) -> Option<&Self::Share>;
}

/// Sign and encrypt the Y-share addressed to `recipient`
pub fn encrypt<S: ShareSource>(
    key_share: &S,
    recipient: u8,
    recipient_key: &MessagingPublicKey,
    sender_key: &MessagingKey,
) -> Result<EncryptedYShare> {
    let recipient_party = Party::from_index(recipient)
        .filter(|party| *party != key_share.owner())
        .ok_or(Error::InvalidRecipient(recipient))?;
    let y_share = key_share
        .y_share_for(recipient_party)
        .ok_or(Error::InvalidRecipient(recipient))?;

    let private = y_share.private_part();
    let encrypted_private_share = messaging::sign_and_encrypt(&private, recipient_key, sender_key)?;

    Ok(EncryptedYShare {
        i: recipient,
        j: key_share.owner().index(),
        public_share: hex::encode(y_share.public_part()),
        encrypted_private_share,
    })
}

/// Verify the sender's signature, decrypt and rebuild the Y-share
pub fn decrypt_and_verify<T: ExchangeableShare>(
    encrypted: &EncryptedYShare,
    recipient_key: &MessagingKey,
    sender_key: &MessagingPublicKey,
) -> Result<T> {
    let recipient = Party::from_index(encrypted.i).ok_or(Error::InvalidShareIndex(encrypted.i))?;
    let sender = Party::from_index(encrypted.j).ok_or(Error::InvalidShareIndex(encrypted.j))?;

    let private =
        messaging::decrypt_and_verify(&encrypted.encrypted_private_share, recipient_key, sender_key)?;
    let public = hex::decode(&encrypted.public_share)?;

    if private.len() <= CHAINCODE_LEN || public.len() <= CHAINCODE_LEN {
        return Err(Error::InvalidShare(format!(
            "YShare from {} to {} is truncated",
            sender, recipient
        )));
    }
    let public_chaincode = &public[public.len() - CHAINCODE_LEN..];
    let private_chaincode = &private[private.len() - CHAINCODE_LEN..];
    if !bool::from(public_chaincode.ct_eq(private_chaincode)) {
        return Err(Error::InvalidShare(format!(
            "YShare from {} to {} has mismatched chain codes",
            sender, recipient
        )));
    }

    T::from_parts(recipient, sender, &public, &private)
}

impl ExchangeableShare for YShare {
    fn recipient(&self) -> Party {
        self.i
    }

    fn sender(&self) -> Party {
        self.j
    }

    fn public_part(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(96);
        bytes.extend_from_slice(self.y.compress().as_bytes());
        bytes.extend_from_slice(self.v.compress().as_bytes());
        bytes.extend_from_slice(&self.chaincode);
        bytes
    }

    fn private_part(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(64));
        bytes.extend_from_slice(self.u.as_bytes());
        bytes.extend_from_slice(&self.chaincode);
        bytes
    }

    fn from_parts(recipient: Party, sender: Party, public: &[u8], private: &[u8]) -> Result<Self> {
        if public.len() != 96 || private.len() != 64 {
            return Err(Error::InvalidShare(format!(
                "Unexpected YShare lengths {}/{}",
                public.len(),
                private.len()
            )));
        }

        let y = eddsa::point_from_bytes(&public[..32])?;
        let v = eddsa::point_from_bytes(&public[32..64])?;
        let mut u_bytes = Zeroizing::new([0u8; 32]);
        u_bytes.copy_from_slice(&private[..32]);
        let u = Option::<Scalar>::from(Scalar::from_canonical_bytes(*u_bytes))
            .ok_or_else(|| Error::InvalidShare("Non-canonical YShare scalar".into()))?;
        let mut chaincode = [0u8; 32];
        chaincode.copy_from_slice(&private[32..]);

        Ok(YShare {
            i: recipient,
            j: sender,
            y,
            v,
            u,
            chaincode,
        })
    }
}

impl ShareSource for KeyShare {
    type Share = YShare;

    fn owner(&self) -> Party {
        self.u_share.i
    }

    fn y_share_for(&self, recipient: Party) -> Option<&YShare> {
        self.y_shares.get(&recipient)
    }
}
