//! Keychain generation
//!
//! Creates the User, Backup and Server keychains of a new wallet. The User
//! and Backup shares are generated locally, the relay creates the Server
//! share, and each party combines what it received into signing material.

pub mod bls;
pub mod combine;
pub mod scheme;
pub mod transport;

pub use bls::BlsScheme;
pub use combine::DecryptableYShare;
pub use scheme::{EddsaScheme, GenerationScheme, GenerationSession, ServerKeychainParts};

use crate::api::TssApi;
use crate::messaging::MessagingKey;
use crate::types::{KeyType, KeychainsTriplet, Party};
use crate::Result;
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Options of one generation run
#[derive(Clone)]
pub struct GenerateParams {
    pub scheme: KeyType,
    /// Encrypts the party signing material; without it the material is
    /// returned in plaintext and never sent to the relay
    pub passphrase: Option<String>,
    pub enterprise: Option<String>,
}

impl GenerateParams {
    pub fn new(scheme: KeyType) -> Self {
        Self {
            scheme,
            passphrase: None,
            enterprise: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_enterprise(mut self, enterprise: impl Into<String>) -> Self {
        self.enterprise = Some(enterprise.into());
        self
    }
}

impl fmt::Debug for GenerateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerateParams")
            .field("scheme", &self.scheme)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("enterprise", &self.enterprise)
            .finish()
    }
}

/// Generate the three keychains of a wallet with the scheme in `params`
pub async fn generate_keychains<A: TssApi + ?Sized>(
    api: &A,
    params: &GenerateParams,
) -> Result<KeychainsTriplet> {
    match params.scheme {
        KeyType::Tss => generate_with(&EddsaScheme, api, params).await,
        KeyType::BlsDkg => generate_with(&BlsScheme, api, params).await,
    }
}

/// Generate the three keychains of a wallet with `scheme`.
///
/// If either party leg fails after the server keychain was stored, the
/// server keychain and any party keychain already registered are deleted
/// again before the error is returned.
#[instrument(skip_all, fields(key_type = %S::KEY_TYPE))]
pub async fn generate_with<S: GenerationScheme, A: TssApi + ?Sized>(
    scheme: &S,
    api: &A,
    params: &GenerateParams,
) -> Result<KeychainsTriplet> {
    info!(
        enterprise = params.enterprise.as_deref().unwrap_or(""),
        encrypted = params.passphrase.is_some(),
        "Starting keychain generation"
    );

    let user_share = scheme.generate_share(Party::User);
    let backup_share = scheme.generate_share(Party::Backup);
    let session_key = MessagingKey::generate();

    let service_key = api.service_public_key().await?;
    debug!("Fetched service public key");

    let session = GenerationSession {
        session_key: &session_key,
        service_key: &service_key,
        passphrase: params.passphrase.as_deref(),
        enterprise: params.enterprise.as_deref(),
    };

    let server_keychain = scheme
        .create_server_keychain(api, &session, &user_share, &backup_share)
        .await?;

    // Both legs run to completion so every registered keychain is known
    let (user_leg, backup_leg) = tokio::join!(
        scheme.create_party_keychain(api, &session, &user_share, &backup_share, &server_keychain),
        scheme.create_party_keychain(api, &session, &backup_share, &user_share, &server_keychain),
    );

    let (user_keychain, backup_keychain) = match (user_leg, backup_leg) {
        (Ok(user_keychain), Ok(backup_keychain)) => (user_keychain, backup_keychain),
        (Err(e), Ok(registered)) | (Ok(registered), Err(e)) => {
            let registered = [server_keychain.id.clone(), registered.id];
            warn!(
                keychain_ids = ?registered,
                error = %e,
                "Party keychain failed, deleting registered keychains"
            );
            rollback(api, &registered).await;
            return Err(e);
        }
        (Err(e), Err(_)) => {
            warn!(
                keychain_id = %server_keychain.id,
                error = %e,
                "Party keychains failed, deleting server keychain"
            );
            rollback(api, &[server_keychain.id.clone()]).await;
            return Err(e);
        }
    };

    info!(
        user_keychain = %user_keychain.id,
        backup_keychain = %backup_keychain.id,
        server_keychain = %server_keychain.id,
        common_key = server_keychain.common_key().unwrap_or(""),
        "Keychain generation complete"
    );

    Ok(KeychainsTriplet {
        user_keychain,
        backup_keychain,
        server_keychain,
    })
}

/// Delete keychains registered by a failed generation
async fn rollback<A: TssApi + ?Sized>(api: &A, keychain_ids: &[String]) {
    for id in keychain_ids {
        if let Err(e) = api.delete_keychain(id).await {
            warn!(keychain_id = %id, error = %e, "Failed to delete keychain");
        }
    }
}
