//! Relay service interface
//!
//! Every party talks to the relay through [`TssApi`]. The relay stores
//! keychains and transaction requests and plays the Server party.

use crate::messaging::MessagingPublicKey;
use crate::types::{
    KeyType, Keychain, KeychainShare, Party, SendTxResult, SignatureShareRecord, TxIntent,
    TxRequest,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

pub use ::async_trait::async_trait;

/// Request to create the server keychain of a new wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeychainRequest {
    pub source: Party,
    pub key_type: KeyType,
    /// Session key the User→Server share was signed with
    pub user_session_key: MessagingPublicKey,
    /// Session key the Backup→Server share was signed with
    pub backup_session_key: MessagingPublicKey,
    pub key_shares: Vec<KeychainShare>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise: Option<String>,
}

impl CreateKeychainRequest {
    /// Check the request carries exactly the User→Server and Backup→Server
    /// shares
    pub fn validate(&self) -> Result<()> {
        if self.source != Party::Server {
            return Err(Error::InvalidConfig(format!(
                "Keychain source must be server, got {}",
                self.source
            )));
        }
        if self.key_shares.len() != 2 {
            return Err(Error::InvalidShare(format!(
                "Expected 2 key shares, got {}",
                self.key_shares.len()
            )));
        }
        for from in [Party::User, Party::Backup] {
            let count = self
                .key_shares
                .iter()
                .filter(|share| share.from == from && share.to == Party::Server)
                .count();
            if count != 1 {
                return Err(Error::InvalidShare(format!(
                    "Expected one key share from {} to server",
                    from
                )));
            }
        }
        Ok(())
    }

    /// The share sent by `from`
    pub fn key_share(&self, from: Party) -> Result<&KeychainShare> {
        self.key_shares
            .iter()
            .find(|share| share.from == from && share.to == Party::Server)
            .ok_or_else(|| Error::InvalidShare(format!("Missing key share from {}", from)))
    }

    /// Session key of `party`
    pub fn session_key(&self, party: Party) -> Result<&MessagingPublicKey> {
        match party {
            Party::User => Ok(&self.user_session_key),
            Party::Backup => Ok(&self.backup_session_key),
            Party::Server => Err(Error::InvalidConfig("Server has no session key".into())),
        }
    }
}

/// Request to register a User or Backup keychain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddKeychainRequest {
    pub source: Party,
    pub key_type: KeyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_keychain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_prv: Option<String>,
}

impl AddKeychainRequest {
    /// Registration request for a locally built keychain. Plaintext signing
    /// material is never included.
    pub fn from_keychain(keychain: &Keychain) -> Self {
        Self {
            source: keychain.source,
            key_type: keychain.key_type,
            common_keychain: keychain.common_keychain.clone(),
            common_public_key: keychain.common_public_key.clone(),
            encrypted_prv: keychain.encrypted_prv.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source == Party::Server {
            return Err(Error::InvalidConfig(
                "Server keychains are created, not added".into(),
            ));
        }
        let common_key = match self.key_type {
            KeyType::Tss => &self.common_keychain,
            KeyType::BlsDkg => &self.common_public_key,
        };
        if common_key.is_none() {
            return Err(Error::InvalidConfig(format!(
                "Missing common key for {} keychain",
                self.key_type
            )));
        }
        Ok(())
    }
}

/// Signature share submission, optionally carrying the encrypted signer
/// share the server needs for its half of the round
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureShareRequest {
    pub from: Party,
    pub to: Party,
    pub share: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_share: Option<String>,
}

impl SignatureShareRequest {
    pub fn record(&self) -> SignatureShareRecord {
        SignatureShareRecord {
            from: self.from,
            to: self.to,
            share: self.share.clone(),
        }
    }
}

/// Relay operations used by the User and Backup parties
#[async_trait]
pub trait TssApi: Send + Sync {
    /// Long-lived messaging key of the relay's Server party
    async fn service_public_key(&self) -> Result<MessagingPublicKey>;

    /// Create the server keychain from the User→Server and Backup→Server shares
    async fn create_keychain(&self, request: &CreateKeychainRequest) -> Result<Keychain>;

    /// Register a User or Backup keychain
    async fn add_keychain(&self, request: &AddKeychainRequest) -> Result<Keychain>;

    /// Remove a keychain
    async fn delete_keychain(&self, id: &str) -> Result<()>;

    /// Create a transaction request for a wallet
    async fn create_tx_request(&self, wallet_id: &str, intent: &TxIntent) -> Result<TxRequest>;

    /// Fetch a transaction request with its current signature shares
    async fn get_tx_request(&self, id: &str) -> Result<TxRequest>;

    /// Append a signature share to a transaction request
    async fn post_signature_share(
        &self,
        id: &str,
        request: &SignatureShareRequest,
    ) -> Result<SignatureShareRecord>;

    /// Remove all signature shares, returning what was removed
    async fn delete_signature_shares(&self, id: &str) -> Result<Vec<SignatureShareRecord>>;

    /// Hand a signed transaction request to broadcast
    async fn send_tx(&self, id: &str) -> Result<SendTxResult>;
}
