//! Generation and co-signing against the in-process relay

use std::sync::Mutex;
use std::time::Duration;
use tss_core::api::{
    async_trait, AddKeychainRequest, CreateKeychainRequest, SignatureShareRequest, TssApi,
};
use tss_core::keygen::bls::BlsSigningMaterial;
use tss_core::keygen::{self, GenerateParams};
use tss_core::messaging::{MessagingKey, MessagingPublicKey};
use tss_core::sign::{self, encrypt_signer_share, RShareRecord, SigningConfig};
use tss_core::{
    eddsa, passphrase, CommonKeychain, Error, KeyType, Keychain, KeychainsTriplet, Party, Result,
    SendTxResult, SignatureShareRecord, SigningMaterial, SigningPhase, TxIntent, TxRequest,
    TxRequestState,
};
use tss_relay::MemoryApi;

const PAYLOAD_HEX: &str = "0a0b0c0d0e0f1011121314151617";
const PATH: &str = "m/0/7";

fn relay() -> MemoryApi {
    MemoryApi::new(MessagingKey::generate())
}

fn config() -> SigningConfig {
    SigningConfig::default().with_poll(5, Duration::from_millis(1))
}

fn intent() -> TxIntent {
    TxIntent {
        intent_type: "payment".into(),
        signable_hex: PAYLOAD_HEX.into(),
        serialized_tx_hex: None,
        derivation_path: PATH.into(),
    }
}

fn material(keychain: &Keychain) -> SigningMaterial {
    serde_json::from_str(keychain.prv.as_deref().unwrap()).unwrap()
}

async fn generate(api: &MemoryApi) -> KeychainsTriplet {
    keygen::generate_keychains(api, &GenerateParams::new(KeyType::Tss))
        .await
        .unwrap()
}

fn verify_delivered(triplet: &KeychainsTriplet, sent: &SendTxResult) {
    let common: CommonKeychain = triplet
        .server_keychain
        .common_keychain
        .as_deref()
        .unwrap()
        .parse()
        .unwrap();
    let derived = common.derive(PATH).unwrap();

    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&derived.public_key_bytes()).unwrap();
    let signature =
        ed25519_dalek::Signature::from_slice(&hex::decode(&sent.signature).unwrap()).unwrap();
    let payload = hex::decode(PAYLOAD_HEX).unwrap();
    verifying_key.verify_strict(&payload, &signature).unwrap();
}

#[tokio::test]
async fn test_generation_consistency() {
    let api = relay();
    let triplet = generate(&api).await;

    let server_key = triplet.server_keychain.common_keychain.clone().unwrap();
    assert_eq!(server_key.len(), CommonKeychain::HEX_LEN);
    assert_eq!(triplet.user_keychain.common_keychain.as_deref(), Some(server_key.as_str()));
    assert_eq!(triplet.backup_keychain.common_keychain.as_deref(), Some(server_key.as_str()));

    assert_eq!(triplet.server_keychain.key_shares.len(), 2);
    assert!(triplet.user_keychain.encrypted_prv.is_none());
    assert_eq!(material(&triplet.user_keychain).party(), Party::User);
    assert_eq!(material(&triplet.backup_keychain).party(), Party::Backup);

    assert_eq!(api.store().keychain_count(), 3);
    // Plaintext material never reaches the relay
    let stored = api.store().keychain(&triplet.user_keychain.id).unwrap();
    assert!(stored.prv.is_none());
}

#[tokio::test]
async fn test_user_signs_with_server() {
    let api = relay();
    let triplet = generate(&api).await;
    let user = material(&triplet.user_keychain);

    let created = sign::create_tx_request(&api, &triplet.server_keychain.id, &intent())
        .await
        .unwrap();
    let signed = sign::sign_tx_request(&api, created.tx_request_id.as_str(), &user, &config())
        .await
        .unwrap();
    assert_eq!(signed.state, TxRequestState::Signed);
    assert_eq!(signed.unsigned_txs, created.unsigned_txs);
    assert_eq!(signed.signature_shares.len(), 3);

    let sent = sign::send_tx_request(&api, &signed.tx_request_id).await.unwrap();
    assert_eq!(sent.state, TxRequestState::Delivered);
    verify_delivered(&triplet, &sent);
}

#[tokio::test]
async fn test_backup_signs_with_passphrase_material() {
    let api = relay();
    let params = GenerateParams::new(KeyType::Tss).with_passphrase("correct horse");
    let triplet = keygen::generate_keychains(&api, &params).await.unwrap();

    let encrypted = triplet.backup_keychain.encrypted_prv.as_deref().unwrap();
    assert!(triplet.backup_keychain.prv.is_none());
    assert!(passphrase::decrypt("wrong horse", encrypted).is_err());
    let decrypted = passphrase::decrypt("correct horse", encrypted).unwrap();
    let backup: SigningMaterial = serde_json::from_slice(&decrypted).unwrap();
    assert_eq!(backup.party(), Party::Backup);

    let created = sign::create_tx_request(&api, &triplet.server_keychain.id, &intent())
        .await
        .unwrap();
    // Object form, no initial fetch
    let signed = sign::sign_tx_request(&api, created.clone(), &backup, &config())
        .await
        .unwrap();
    assert_eq!(signed.unsigned_txs, created.unsigned_txs);
    assert_eq!(signed.signature_shares[1].from, Party::Server);
    assert_eq!(signed.signature_shares[1].to, Party::Backup);

    let sent = sign::send_tx_request(&api, &signed.tx_request_id).await.unwrap();
    verify_delivered(&triplet, &sent);
}

#[tokio::test]
async fn test_bls_generation_consistency() {
    let api = relay();
    let triplet = keygen::generate_keychains(&api, &GenerateParams::new(KeyType::BlsDkg))
        .await
        .unwrap();

    let server_key = triplet.server_keychain.common_public_key.clone().unwrap();
    assert_eq!(server_key.len(), 96);
    assert!(triplet.server_keychain.common_keychain.is_none());
    for keychain in [&triplet.user_keychain, &triplet.backup_keychain] {
        assert_eq!(keychain.key_type, KeyType::BlsDkg);
        assert_eq!(keychain.common_public_key.as_deref(), Some(server_key.as_str()));
        let material: BlsSigningMaterial =
            serde_json::from_str(keychain.prv.as_deref().unwrap()).unwrap();
        assert_eq!(material.common_public_key, server_key);
        assert_eq!(material.party, keychain.source);
    }

    // BLS keychains do not co-sign
    let created = api
        .create_tx_request(&triplet.server_keychain.id, &intent())
        .await
        .unwrap();
    let offer = SignatureShareRequest {
        from: Party::User,
        to: Party::Server,
        share: "00".repeat(64),
        signer_share: Some("unused".into()),
    };
    let err = api
        .post_signature_share(&created.tx_request_id, &offer)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

/// Relay whose Backup registration fails
struct FailingBackupApi {
    inner: MemoryApi,
    server_keychain_id: Mutex<Option<String>>,
}

#[async_trait]
impl TssApi for FailingBackupApi {
    async fn service_public_key(&self) -> Result<MessagingPublicKey> {
        self.inner.service_public_key().await
    }

    async fn create_keychain(&self, request: &CreateKeychainRequest) -> Result<Keychain> {
        let keychain = self.inner.create_keychain(request).await?;
        *self.server_keychain_id.lock().unwrap() = Some(keychain.id.clone());
        Ok(keychain)
    }

    async fn add_keychain(&self, request: &AddKeychainRequest) -> Result<Keychain> {
        if request.source == Party::Backup {
            return Err(Error::Network("connection reset".into()));
        }
        self.inner.add_keychain(request).await
    }

    async fn delete_keychain(&self, id: &str) -> Result<()> {
        self.inner.delete_keychain(id).await
    }

    async fn create_tx_request(&self, wallet_id: &str, intent: &TxIntent) -> Result<TxRequest> {
        self.inner.create_tx_request(wallet_id, intent).await
    }

    async fn get_tx_request(&self, id: &str) -> Result<TxRequest> {
        self.inner.get_tx_request(id).await
    }

    async fn post_signature_share(
        &self,
        id: &str,
        request: &SignatureShareRequest,
    ) -> Result<SignatureShareRecord> {
        self.inner.post_signature_share(id, request).await
    }

    async fn delete_signature_shares(&self, id: &str) -> Result<Vec<SignatureShareRecord>> {
        self.inner.delete_signature_shares(id).await
    }

    async fn send_tx(&self, id: &str) -> Result<SendTxResult> {
        self.inner.send_tx(id).await
    }
}

#[tokio::test]
async fn test_failed_party_leg_removes_registered_keychains() {
    let api = FailingBackupApi {
        inner: relay(),
        server_keychain_id: Mutex::new(None),
    };

    let err = keygen::generate_keychains(&api, &GenerateParams::new(KeyType::Tss))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)));

    let server_id = api.server_keychain_id.lock().unwrap().clone().unwrap();
    assert!(matches!(
        api.inner.store().keychain(&server_id),
        Err(tss_relay::RelayError::NotFound(_))
    ));
    // The User keychain registered before the Backup leg failed is gone too
    assert_eq!(api.inner.store().keychain_count(), 0);
}

#[tokio::test]
async fn test_one_round_at_a_time() {
    let api = relay();
    let triplet = generate(&api).await;
    let user = material(&triplet.user_keychain);
    let backup = material(&triplet.backup_keychain);

    let created = sign::create_tx_request(&api, &triplet.server_keychain.id, &intent())
        .await
        .unwrap();
    let id = created.tx_request_id.clone();

    // User opens a round and walks away
    let payload = hex::decode(PAYLOAD_HEX).unwrap();
    let p_share = eddsa::key_derive(
        &user.u_share,
        &[&user.server_y_share, &user.counterpart_y_share],
        PATH,
    )
    .unwrap();
    let round = eddsa::sign_share(&payload, &p_share, &[Party::Server]).unwrap();
    let service_key = api.service_public_key().await.unwrap();
    let offer = SignatureShareRequest {
        from: Party::User,
        to: Party::Server,
        share: RShareRecord::from_r_share(&round.r_shares[&Party::Server]).encode(),
        signer_share: Some(encrypt_signer_share(&user.u_share, &p_share, &service_key).unwrap()),
    };
    api.post_signature_share(&id, &offer).await.unwrap();

    let err = sign::sign_tx_request(&api, id.as_str(), &backup, &config())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Signing {
            phase: SigningPhase::LocalShareOffered,
            ..
        }
    ));
    assert!(err.to_string().contains("signing round already in progress"));

    let signed = sign::recreate_tx_request(&api, &id, &backup, &config())
        .await
        .unwrap();
    assert_eq!(signed.state, TxRequestState::Signed);
    let sent = sign::send_tx_request(&api, &id).await.unwrap();
    verify_delivered(&triplet, &sent);
}

#[tokio::test]
async fn test_delete_signature_shares_resets_request() {
    let api = relay();
    let triplet = generate(&api).await;
    let user = material(&triplet.user_keychain);

    let created = sign::create_tx_request(&api, &triplet.server_keychain.id, &intent())
        .await
        .unwrap();
    let id = created.tx_request_id.clone();
    let signed = sign::sign_tx_request(&api, id.as_str(), &user, &config())
        .await
        .unwrap();

    let removed = sign::delete_signature_shares(&api, &id).await.unwrap();
    assert_eq!(removed, signed.signature_shares);

    let cleared = sign::get_tx_request(&api, &id).await.unwrap();
    assert!(cleared.signature_shares.is_empty());
    assert_eq!(cleared.state, TxRequestState::PendingUserSignature);
    assert!(api.send_tx(&id).await.is_err());

    let resigned = sign::recreate_tx_request(&api, &id, &user, &config())
        .await
        .unwrap();
    assert_eq!(resigned.state, TxRequestState::Signed);
    let sent = sign::send_tx_request(&api, &id).await.unwrap();
    verify_delivered(&triplet, &sent);

    // Delivered requests keep their shares
    assert!(sign::delete_signature_shares(&api, &id).await.is_err());
}

#[tokio::test]
async fn test_unknown_wallet() {
    let api = relay();
    let err = sign::create_tx_request(&api, "no-such-wallet", &intent())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
