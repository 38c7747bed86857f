//! In-process relay
//!
//! [`MemoryApi`] keeps everything in a [`RelayStore`] and plays the Server
//! party with a [`Cosigner`]. The HTTP service wraps it unchanged.

use crate::{Cosigner, RelayError, RelayStore};
use tracing::{debug, info, instrument, warn};
use tss_core::api::{
    async_trait, AddKeychainRequest, CreateKeychainRequest, SignatureShareRequest, TssApi,
};
use tss_core::messaging::{MessagingKey, MessagingPublicKey};
use tss_core::{
    Error, KeyType, Keychain, Result, SendTxResult, SignatureShareRecord, TxIntent, TxRequest,
    TxRequestState, UnsignedTx,
};

/// Relay held in memory
pub struct MemoryApi {
    store: RelayStore,
    cosigner: Cosigner,
}

impl MemoryApi {
    pub fn new(service_key: MessagingKey) -> Self {
        Self::with_store(RelayStore::default(), service_key)
    }

    pub fn with_store(store: RelayStore, service_key: MessagingKey) -> Self {
        Self {
            store,
            cosigner: Cosigner::new(service_key),
        }
    }

    pub fn store(&self) -> &RelayStore {
        &self.store
    }
}

#[async_trait]
impl TssApi for MemoryApi {
    async fn service_public_key(&self) -> Result<MessagingPublicKey> {
        Ok(self.cosigner.service_public_key())
    }

    #[instrument(skip_all)]
    async fn create_keychain(&self, request: &CreateKeychainRequest) -> Result<Keychain> {
        let (keychain, material) = self.cosigner.create_keychain(request)?;
        let keychain = self.store.insert_keychain(keychain, Some(material));
        info!(keychain_id = %keychain.id, "Stored server keychain");
        Ok(keychain)
    }

    #[instrument(skip_all, fields(source = %request.source))]
    async fn add_keychain(&self, request: &AddKeychainRequest) -> Result<Keychain> {
        request.validate()?;
        let common_key = match request.key_type {
            KeyType::Tss => request.common_keychain.as_deref(),
            KeyType::BlsDkg => request.common_public_key.as_deref(),
        }
        .unwrap_or_default();
        if !self.store.has_server_keychain(request.key_type, common_key) {
            return Err(RelayError::NotFound(format!("server keychain for {}", common_key)).into());
        }

        let keychain = Keychain {
            id: String::new(),
            source: request.source,
            key_type: request.key_type,
            common_keychain: request.common_keychain.clone(),
            common_public_key: request.common_public_key.clone(),
            key_shares: Vec::new(),
            encrypted_prv: request.encrypted_prv.clone(),
            prv: None,
        };
        let keychain = self.store.insert_keychain(keychain, None);
        info!(keychain_id = %keychain.id, "Stored party keychain");
        Ok(keychain)
    }

    async fn delete_keychain(&self, id: &str) -> Result<()> {
        self.store.remove_keychain(id)?;
        info!(keychain_id = id, "Deleted keychain");
        Ok(())
    }

    #[instrument(skip(self, intent))]
    async fn create_tx_request(&self, wallet_id: &str, intent: &TxIntent) -> Result<TxRequest> {
        self.store.server_material(wallet_id)?;
        let tx_request = TxRequest {
            tx_request_id: String::new(),
            wallet_id: wallet_id.to_string(),
            state: TxRequestState::PendingUserSignature,
            unsigned_txs: vec![UnsignedTx {
                signable_hex: intent.signable_hex.clone(),
                serialized_tx_hex: intent
                    .serialized_tx_hex
                    .clone()
                    .unwrap_or_else(|| intent.signable_hex.clone()),
                derivation_path: intent.derivation_path.clone(),
            }],
            signature_shares: Vec::new(),
        };
        let tx_request = self.store.insert_tx_request(tx_request);
        info!(tx_request_id = %tx_request.tx_request_id, "Created tx request");
        Ok(tx_request)
    }

    async fn get_tx_request(&self, id: &str) -> Result<TxRequest> {
        Ok(self.store.tx_request(id)?)
    }

    #[instrument(skip(self, request), fields(from = %request.from, to = %request.to))]
    async fn post_signature_share(
        &self,
        id: &str,
        request: &SignatureShareRequest,
    ) -> Result<SignatureShareRecord> {
        let wallet_id = self.store.tx_request(id)?.wallet_id;
        let material = self.store.server_material(&wallet_id)?;

        self.store.update_tx_request(id, |stored| {
            if stored.tx_request.state != TxRequestState::PendingUserSignature {
                return Err(Error::ProtocolState(format!(
                    "Tx request {} is already {:?}",
                    id, stored.tx_request.state
                )));
            }

            match stored.round.take() {
                None => {
                    if request.signer_share.is_none() {
                        return Err(Error::ProtocolState(format!(
                            "No signing round open on tx request {}",
                            id
                        )));
                    }
                    let (answer, round) =
                        self.cosigner.offer(&material, &stored.tx_request, request)?;
                    stored.tx_request.signature_shares.push(request.record());
                    stored.tx_request.signature_shares.push(answer);
                    stored.round = Some(round);
                    debug!("Signing round opened");
                }
                Some(round) => {
                    if request.signer_share.is_some() || request.from != round.party {
                        warn!(open_for = %round.party, "Rejected offer during open round");
                        stored.round = Some(round);
                        return Err(Error::ProtocolState(
                            "signing round already in progress".into(),
                        ));
                    }
                    let signature = match self.cosigner.complete(&material, &round, request) {
                        Ok(signature) => signature,
                        Err(e) => {
                            stored.round = Some(round);
                            return Err(e);
                        }
                    };
                    stored.tx_request.signature_shares.push(request.record());
                    stored.tx_request.state = TxRequestState::Signed;
                    stored.signature = Some(signature.to_hex());
                    info!("Tx request signed");
                }
            }
            Ok(request.record())
        })
    }

    async fn delete_signature_shares(&self, id: &str) -> Result<Vec<SignatureShareRecord>> {
        self.store.update_tx_request(id, |stored| {
            if stored.tx_request.state == TxRequestState::Delivered {
                return Err(Error::ProtocolState(format!(
                    "Tx request {} was already delivered",
                    id
                )));
            }
            stored.round = None;
            stored.signature = None;
            stored.tx_request.state = TxRequestState::PendingUserSignature;
            let removed = std::mem::take(&mut stored.tx_request.signature_shares);
            info!(tx_request_id = id, removed = removed.len(), "Deleted signature shares");
            Ok(removed)
        })
    }

    async fn send_tx(&self, id: &str) -> Result<SendTxResult> {
        self.store.update_tx_request(id, |stored| {
            let signature = match (&stored.tx_request.state, &stored.signature) {
                (TxRequestState::Signed, Some(signature)) => signature.clone(),
                (state, _) => {
                    return Err(Error::ProtocolState(format!(
                        "Tx request {} is {:?}, not signed",
                        id, state
                    )))
                }
            };
            stored.tx_request.state = TxRequestState::Delivered;
            info!(tx_request_id = id, "Tx request delivered");
            Ok(SendTxResult {
                tx_request_id: id.to_string(),
                state: TxRequestState::Delivered,
                signature,
            })
        })
    }
}
