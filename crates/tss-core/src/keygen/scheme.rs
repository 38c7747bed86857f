//! Generation schemes
//!
//! A [`GenerationScheme`] supplies the share algebra; the relay round trips
//! of keychain creation are shared by every scheme as default methods.

use super::combine::{self, DecryptableYShare};
use super::transport::{self, ShareSource};
use crate::api::{async_trait, AddKeychainRequest, CreateKeychainRequest, TssApi};
use crate::eddsa::{self, KeyShare};
use crate::messaging::{MessagingKey, MessagingPublicKey};
use crate::passphrase;
use crate::types::{
    CommonKeychain, KeyType, Keychain, KeychainShare, Party, ServerSigningMaterial,
    SigningMaterial,
};
use crate::{Error, Result};
use serde::Serialize;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

/// Keys and options shared by every step of one generation run
pub struct GenerationSession<'a> {
    /// Ephemeral key used by both User and Backup for this run
    pub session_key: &'a MessagingKey,
    /// Long-lived key of the relay's Server party
    pub service_key: &'a MessagingPublicKey,
    pub passphrase: Option<&'a str>,
    pub enterprise: Option<&'a str>,
}

/// Server party's half of keychain creation
pub struct ServerKeychainParts<M> {
    /// Common keychain or common public key, per scheme
    pub common_key: String,
    /// Server→User and Server→Backup shares
    pub key_shares: Vec<KeychainShare>,
    pub material: M,
}

/// Share algebra of a key scheme
#[async_trait]
pub trait GenerationScheme: Send + Sync {
    type KeyShare: ShareSource + Send + Sync;
    type SigningMaterial: Serialize + Send + Sync;
    type ServerMaterial: Send + Sync;

    /// Tag recorded on every keychain this scheme produces
    const KEY_TYPE: KeyType;

    /// Generate a fresh key share for `party`
    fn generate_share(&self, party: Party) -> Self::KeyShare;

    /// Build User or Backup signing material, checking it against the
    /// common key the relay reported
    fn combine(
        &self,
        local: &Self::KeyShare,
        expected_common_key: &str,
        received: &[DecryptableYShare<'_>],
    ) -> Result<Self::SigningMaterial>;

    /// Build the Server's signing material and common key
    fn combine_server(
        &self,
        local: &Self::KeyShare,
        received: &[DecryptableYShare<'_>],
    ) -> Result<(String, Self::ServerMaterial)>;

    /// Server side of `create_keychain`: open the User and Backup shares
    /// with the service key, combine, and address the server's own shares
    /// to the session keys of the request
    fn create_server_share(
        &self,
        request: &CreateKeychainRequest,
        service_key: &MessagingKey,
    ) -> Result<ServerKeychainParts<Self::ServerMaterial>> {
        request.validate()?;
        if request.key_type != Self::KEY_TYPE {
            return Err(Error::InvalidConfig(format!(
                "Expected {} keychain request, got {}",
                Self::KEY_TYPE,
                request.key_type
            )));
        }

        let local = self.generate_share(Party::Server);
        let received = [Party::User, Party::Backup]
            .iter()
            .map(|from| {
                Ok(DecryptableYShare {
                    share: request.key_share(*from)?.to_encrypted_y_share(),
                    recipient_key: service_key,
                    sender_key: request.session_key(*from)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let (common_key, material) = self.combine_server(&local, &received)?;

        let key_shares = [Party::User, Party::Backup]
            .iter()
            .map(|to| {
                let encrypted =
                    transport::encrypt(&local, to.index(), request.session_key(*to)?, service_key)?;
                KeychainShare::from_encrypted_y_share(&encrypted)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ServerKeychainParts {
            common_key,
            key_shares,
            material,
        })
    }

    /// Send the User→Server and Backup→Server shares to the relay and
    /// return the server keychain it created
    #[instrument(skip_all, fields(key_type = %Self::KEY_TYPE))]
    async fn create_server_keychain<A: TssApi + ?Sized>(
        &self,
        api: &A,
        session: &GenerationSession<'_>,
        user_share: &Self::KeyShare,
        backup_share: &Self::KeyShare,
    ) -> Result<Keychain> {
        let session_public = session.session_key.public_key();
        let mut key_shares = Vec::with_capacity(2);
        for share in [user_share, backup_share] {
            let encrypted = transport::encrypt(
                share,
                Party::Server.index(),
                session.service_key,
                session.session_key,
            )?;
            key_shares.push(KeychainShare::from_encrypted_y_share(&encrypted)?);
        }

        let request = CreateKeychainRequest {
            source: Party::Server,
            key_type: Self::KEY_TYPE,
            user_session_key: session_public,
            backup_session_key: session_public,
            key_shares,
            enterprise: session.enterprise.map(str::to_string),
        };
        request.validate()?;

        debug!("Submitting server keychain shares");
        let keychain = api.create_keychain(&request).await?;
        validate_server_keychain(&keychain, Self::KEY_TYPE)?;

        info!(keychain_id = %keychain.id, "Server keychain created");
        Ok(keychain)
    }

    /// Combine a User or Backup leg and register the resulting keychain
    #[instrument(skip_all, fields(party = %local.owner(), key_type = %Self::KEY_TYPE))]
    async fn create_party_keychain<A: TssApi + ?Sized>(
        &self,
        api: &A,
        session: &GenerationSession<'_>,
        local: &Self::KeyShare,
        counterpart: &Self::KeyShare,
        server_keychain: &Keychain,
    ) -> Result<Keychain> {
        let party = local.owner();
        let session_public = session.session_key.public_key();

        let server_share = server_keychain
            .key_share(Party::Server, party)
            .ok_or_else(|| {
                Error::ProtocolState(format!("Server keychain has no share for {}", party))
            })?
            .to_encrypted_y_share();
        let counterpart_share = transport::encrypt(
            counterpart,
            party.index(),
            &session_public,
            session.session_key,
        )?;
        let common_key = server_keychain
            .common_key()
            .ok_or_else(|| Error::ProtocolState("Server keychain has no common key".into()))?;

        let serialized = {
            let received = [
                DecryptableYShare {
                    share: server_share,
                    recipient_key: session.session_key,
                    sender_key: session.service_key,
                },
                DecryptableYShare {
                    share: counterpart_share,
                    recipient_key: session.session_key,
                    sender_key: &session_public,
                },
            ];
            let material = self.combine(local, common_key, &received)?;
            Zeroizing::new(serde_json::to_string(&material)?)
        };
        debug!("Combined signing material");

        let (encrypted_prv, prv) = match session.passphrase {
            Some(passphrase) => (Some(passphrase::encrypt(passphrase, serialized.as_bytes())?), None),
            None => (None, Some(serialized.to_string())),
        };

        let mut keychain = Keychain {
            id: String::new(),
            source: party,
            key_type: Self::KEY_TYPE,
            common_keychain: None,
            common_public_key: None,
            key_shares: Vec::new(),
            encrypted_prv,
            prv,
        };
        match Self::KEY_TYPE {
            KeyType::Tss => keychain.common_keychain = Some(common_key.to_string()),
            KeyType::BlsDkg => keychain.common_public_key = Some(common_key.to_string()),
        }

        let registered = api
            .add_keychain(&AddKeychainRequest::from_keychain(&keychain))
            .await?;
        keychain.id = registered.id;

        info!(keychain_id = %keychain.id, "Party keychain registered");
        Ok(keychain)
    }
}

/// Check a server keychain carries the common key and exactly the
/// Server→User and Server→Backup shares
pub fn validate_server_keychain(keychain: &Keychain, key_type: KeyType) -> Result<()> {
    if keychain.key_type != key_type {
        return Err(Error::ProtocolState(format!(
            "Expected {} keychain, got {}",
            key_type, keychain.key_type
        )));
    }
    if keychain.common_key().is_none() {
        return Err(Error::ProtocolState(
            "Server keychain is missing its common key".into(),
        ));
    }
    if keychain.key_shares.len() != 2 {
        return Err(Error::InvalidShare(format!(
            "Expected 2 server key shares, got {}",
            keychain.key_shares.len()
        )));
    }
    for to in [Party::User, Party::Backup] {
        if keychain.key_share(Party::Server, to).is_none() {
            return Err(Error::InvalidShare(format!(
                "Server keychain is missing the share for {}",
                to
            )));
        }
    }
    Ok(())
}

/// Ed25519 threshold keychains
#[derive(Debug, Clone, Copy, Default)]
pub struct EddsaScheme;

#[async_trait]
impl GenerationScheme for EddsaScheme {
    type KeyShare = KeyShare;
    type SigningMaterial = SigningMaterial;
    type ServerMaterial = ServerSigningMaterial;

    const KEY_TYPE: KeyType = KeyType::Tss;

    fn generate_share(&self, party: Party) -> KeyShare {
        eddsa::key_share(party)
    }

    fn combine(
        &self,
        local: &KeyShare,
        expected_common_key: &str,
        received: &[DecryptableYShare<'_>],
    ) -> Result<SigningMaterial> {
        let expected: CommonKeychain = expected_common_key.parse()?;
        combine::combine(local, &expected, received)
    }

    fn combine_server(
        &self,
        local: &KeyShare,
        received: &[DecryptableYShare<'_>],
    ) -> Result<(String, ServerSigningMaterial)> {
        let (common_keychain, material) = combine::combine_server(local, received)?;
        Ok((common_keychain.into(), material))
    }
}
