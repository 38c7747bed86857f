//! TSS Relay Library
//!
//! Relay-side state for tri-party keychains: stored keychains, transaction
//! requests with their signature shares, and the Server party that
//! co-signs them. [`MemoryApi`] exposes all of it through
//! [`tss_core::TssApi`].

pub mod cosigner;
pub mod memory;

pub use cosigner::{Cosigner, PendingRound, ServerMaterial};
pub use memory::MemoryApi;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tss_core::{KeyType, Keychain, TxRequest};
use uuid::Uuid;

/// Relay error types
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    InvalidFormat(String),
    #[error("Tx request expired: {0}")]
    Expired(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl From<RelayError> for tss_core::Error {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::NotFound(id) => tss_core::Error::NotFound(id),
            RelayError::Expired(id) => tss_core::Error::NotFound(format!("{} (expired)", id)),
            RelayError::InvalidFormat(msg) => tss_core::Error::InvalidConfig(msg),
            RelayError::Conflict(msg) => tss_core::Error::ProtocolState(msg),
        }
    }
}

/// Stored keychain and, for server keychains, the Server's material
#[derive(Clone)]
pub struct StoredKeychain {
    pub keychain: Keychain,
    pub material: Option<Arc<ServerMaterial>>,
    pub created_at: DateTime<Utc>,
}

/// Stored transaction request
pub struct StoredTxRequest {
    pub tx_request: TxRequest,
    /// Open signing round, at most one at a time
    pub round: Option<PendingRound>,
    /// Hex encoded combined signature once signed
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Relay store
#[derive(Clone)]
pub struct RelayStore {
    keychains: Arc<DashMap<String, StoredKeychain>>,
    tx_requests: Arc<DashMap<String, StoredTxRequest>>,
    /// Lifetime of a transaction request in seconds
    ttl_seconds: i64,
}

impl RelayStore {
    /// Create a new relay store
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            keychains: Arc::new(DashMap::new()),
            tx_requests: Arc::new(DashMap::new()),
            ttl_seconds,
        }
    }

    /// Store a keychain under a fresh id and return it with the id set
    pub fn insert_keychain(
        &self,
        mut keychain: Keychain,
        material: Option<ServerMaterial>,
    ) -> Keychain {
        keychain.id = Uuid::new_v4().to_string();
        let stored = StoredKeychain {
            keychain: keychain.clone(),
            material: material.map(Arc::new),
            created_at: Utc::now(),
        };
        self.keychains.insert(keychain.id.clone(), stored);
        keychain
    }

    /// Get a keychain by id
    pub fn keychain(&self, id: &str) -> Result<Keychain> {
        self.keychains
            .get(id)
            .map(|entry| entry.keychain.clone())
            .ok_or_else(|| RelayError::NotFound(format!("keychain {}", id)))
    }

    /// Server material of a server keychain
    pub fn server_material(&self, id: &str) -> Result<Arc<ServerMaterial>> {
        let entry = self
            .keychains
            .get(id)
            .ok_or_else(|| RelayError::NotFound(format!("wallet {}", id)))?;
        entry
            .material
            .clone()
            .ok_or_else(|| RelayError::InvalidFormat(format!("keychain {} is not a server keychain", id)))
    }

    /// Whether a server keychain with this common key exists
    pub fn has_server_keychain(&self, key_type: KeyType, common_key: &str) -> bool {
        self.keychains.iter().any(|entry| {
            entry.material.is_some()
                && entry.keychain.key_type == key_type
                && entry.keychain.common_key() == Some(common_key)
        })
    }

    /// Remove a keychain
    pub fn remove_keychain(&self, id: &str) -> Result<Keychain> {
        self.keychains
            .remove(id)
            .map(|(_, stored)| stored.keychain)
            .ok_or_else(|| RelayError::NotFound(format!("keychain {}", id)))
    }

    pub fn keychain_count(&self) -> usize {
        self.keychains.len()
    }

    /// Store a transaction request under a fresh id and return it with the
    /// id set
    pub fn insert_tx_request(&self, mut tx_request: TxRequest) -> TxRequest {
        let now = Utc::now();
        tx_request.tx_request_id = Uuid::new_v4().to_string();
        let stored = StoredTxRequest {
            tx_request: tx_request.clone(),
            round: None,
            signature: None,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(self.ttl_seconds),
        };
        self.tx_requests
            .insert(tx_request.tx_request_id.clone(), stored);
        tx_request
    }

    /// Get a transaction request by id
    pub fn tx_request(&self, id: &str) -> Result<TxRequest> {
        let entry = self
            .tx_requests
            .get(id)
            .ok_or_else(|| RelayError::NotFound(format!("tx request {}", id)))?;
        if entry.expires_at <= Utc::now() {
            return Err(RelayError::Expired(id.to_string()));
        }
        Ok(entry.tx_request.clone())
    }

    /// Run `f` on a transaction request while holding it exclusively
    pub fn update_tx_request<T, E>(
        &self,
        id: &str,
        f: impl FnOnce(&mut StoredTxRequest) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<RelayError>,
    {
        let mut entry = self
            .tx_requests
            .get_mut(id)
            .ok_or_else(|| RelayError::NotFound(format!("tx request {}", id)))?;
        if entry.expires_at <= Utc::now() {
            return Err(RelayError::Expired(id.to_string()).into());
        }
        f(entry.value_mut())
    }

    /// Remove expired transaction requests, returning how many were removed
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let before = self.tx_requests.len();
        self.tx_requests.retain(|_, stored| stored.expires_at > now);
        before - self.tx_requests.len()
    }
}

impl Default for RelayStore {
    fn default() -> Self {
        Self::new(3600) // 1 hour default TTL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tss_core::{Party, TxRequestState, UnsignedTx};

    fn keychain() -> Keychain {
        Keychain {
            id: String::new(),
            source: Party::User,
            key_type: KeyType::Tss,
            common_keychain: Some("ab".repeat(64)),
            common_public_key: None,
            key_shares: Vec::new(),
            encrypted_prv: None,
            prv: None,
        }
    }

    fn tx_request() -> TxRequest {
        TxRequest {
            tx_request_id: String::new(),
            wallet_id: "wallet".into(),
            state: TxRequestState::PendingUserSignature,
            unsigned_txs: vec![UnsignedTx {
                signable_hex: "00".into(),
                serialized_tx_hex: "00".into(),
                derivation_path: "m/0".into(),
            }],
            signature_shares: Vec::new(),
        }
    }

    #[test]
    fn test_keychain_store() {
        let store = RelayStore::new(3600);
        let stored = store.insert_keychain(keychain(), None);

        assert!(!stored.id.is_empty());
        assert_eq!(store.keychain(&stored.id).unwrap().source, Party::User);
        assert!(matches!(
            store.server_material(&stored.id),
            Err(RelayError::InvalidFormat(_))
        ));
        assert!(!store.has_server_keychain(KeyType::Tss, &"ab".repeat(64)));

        store.remove_keychain(&stored.id).unwrap();
        assert!(matches!(
            store.keychain(&stored.id),
            Err(RelayError::NotFound(_))
        ));
    }

    #[test]
    fn test_tx_request_expiry() {
        let store = RelayStore::new(-1);
        let stored = store.insert_tx_request(tx_request());

        assert!(matches!(
            store.tx_request(&stored.tx_request_id),
            Err(RelayError::Expired(_))
        ));
        assert_eq!(store.cleanup(), 1);
        assert!(matches!(
            store.tx_request(&stored.tx_request_id),
            Err(RelayError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_tx_request() {
        let store = RelayStore::default();
        let stored = store.insert_tx_request(tx_request());

        store
            .update_tx_request(&stored.tx_request_id, |entry| {
                entry.tx_request.state = TxRequestState::Signed;
                Ok::<_, RelayError>(())
            })
            .unwrap();
        assert_eq!(
            store.tx_request(&stored.tx_request_id).unwrap().state,
            TxRequestState::Signed
        );
        assert_eq!(store.cleanup(), 0);
    }
}
