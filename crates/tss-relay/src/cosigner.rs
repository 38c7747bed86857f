//! Server party
//!
//! Creates the server keychain from the shares the User and Backup send,
//! and co-signs transaction requests: it answers an R-share offer with its
//! own R-share and completes the signature once the party's G-share
//! arrives.

use std::fmt;
use tracing::{debug, info, instrument};
use tss_core::api::{CreateKeychainRequest, SignatureShareRequest};
use tss_core::eddsa::{self, RShare, Signature, XShare};
use tss_core::keygen::bls::BlsSigningMaterial;
use tss_core::keygen::{BlsScheme, EddsaScheme, GenerationScheme, ServerKeychainParts};
use tss_core::messaging::{MessagingKey, MessagingPublicKey};
use tss_core::sign::{decrypt_signer_share, GShareRecord, RShareRecord};
use tss_core::types::ServerSigningMaterial;
use tss_core::{Error, KeyType, Keychain, Party, Result, SignatureShareRecord, TxRequest};

/// Signing material the Server keeps for a keychain
pub enum ServerMaterial {
    Eddsa(ServerSigningMaterial),
    Bls(BlsSigningMaterial),
}

impl ServerMaterial {
    fn eddsa(&self) -> Result<&ServerSigningMaterial> {
        match self {
            ServerMaterial::Eddsa(material) => Ok(material),
            ServerMaterial::Bls(_) => Err(Error::InvalidConfig(
                "BLS keychains cannot co-sign transactions".into(),
            )),
        }
    }
}

impl fmt::Debug for ServerMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMaterial::Eddsa(_) => f.write_str("ServerMaterial::Eddsa"),
            ServerMaterial::Bls(_) => f.write_str("ServerMaterial::Bls"),
        }
    }
}

/// Server half of an open signing round
pub struct PendingRound {
    /// Party that offered the round
    pub party: Party,
    payload: Vec<u8>,
    x_share: XShare,
    r_share: RShare,
}

/// The relay's Server party
pub struct Cosigner {
    service_key: MessagingKey,
}

impl Cosigner {
    pub fn new(service_key: MessagingKey) -> Self {
        Self { service_key }
    }

    pub fn service_public_key(&self) -> MessagingPublicKey {
        self.service_key.public_key()
    }

    /// Build the server keychain for a create request. The returned
    /// keychain has no id yet.
    #[instrument(skip_all, fields(key_type = %request.key_type))]
    pub fn create_keychain(&self, request: &CreateKeychainRequest) -> Result<(Keychain, ServerMaterial)> {
        let (common_key, key_shares, material) = match request.key_type {
            KeyType::Tss => {
                let ServerKeychainParts {
                    common_key,
                    key_shares,
                    material,
                } = EddsaScheme.create_server_share(request, &self.service_key)?;
                (common_key, key_shares, ServerMaterial::Eddsa(material))
            }
            KeyType::BlsDkg => {
                let ServerKeychainParts {
                    common_key,
                    key_shares,
                    material,
                } = BlsScheme.create_server_share(request, &self.service_key)?;
                (common_key, key_shares, ServerMaterial::Bls(material))
            }
        };

        let mut keychain = Keychain {
            id: String::new(),
            source: Party::Server,
            key_type: request.key_type,
            common_keychain: None,
            common_public_key: None,
            key_shares,
            encrypted_prv: None,
            prv: None,
        };
        match request.key_type {
            KeyType::Tss => keychain.common_keychain = Some(common_key),
            KeyType::BlsDkg => keychain.common_public_key = Some(common_key),
        }

        info!(
            common_key = keychain.common_key().unwrap_or(""),
            "Created server key share"
        );
        Ok((keychain, material))
    }

    /// Answer an R-share offer with the Server's R-share for the offering
    /// party. The signer share in the offer must match what the Server
    /// holds for that party at the request's derivation path.
    #[instrument(skip_all, fields(tx_request_id = %tx_request.tx_request_id, party = %offer.from))]
    pub fn offer(
        &self,
        material: &ServerMaterial,
        tx_request: &TxRequest,
        offer: &SignatureShareRequest,
    ) -> Result<(SignatureShareRecord, PendingRound)> {
        let material = material.eddsa()?;
        let party = offer.from;
        if party == Party::Server || offer.to != Party::Server {
            return Err(Error::InvalidShare(format!(
                "RShare offer must go from user or backup to server, got {} to {}",
                offer.from, offer.to
            )));
        }
        let armored = offer
            .signer_share
            .as_deref()
            .ok_or_else(|| Error::InvalidShare("RShare offer carries no signer share".into()))?;

        let unsigned_tx = tx_request.unsigned_tx()?;
        let payload = hex::decode(&unsigned_tx.signable_hex)?;
        let p_share = eddsa::key_derive(
            &material.u_share,
            &material.y_shares(),
            &unsigned_tx.derivation_path,
        )?;

        let y_share = material.y_share_from(party)?;
        let signer_share = decrypt_signer_share(armored, &self.service_key)?;
        if !signer_share.matches(&y_share.u, &p_share.chaincode) {
            return Err(Error::VerificationFailed(format!(
                "Signer share from {} does not match the keychain",
                party
            )));
        }

        let r_share = RShareRecord::decode(&offer.share)?.to_r_share(
            Party::Server,
            party,
            y_share.u,
            y_share.v,
        );
        let round = eddsa::sign_share(&payload, &p_share, &[party])?;
        let answer = round
            .r_shares
            .get(&party)
            .map(RShareRecord::from_r_share)
            .ok_or_else(|| Error::ProtocolState(format!("No RShare for {}", party)))?;
        debug!("Answered RShare offer");

        Ok((
            SignatureShareRecord {
                from: Party::Server,
                to: party,
                share: answer.encode(),
            },
            PendingRound {
                party,
                payload,
                x_share: round.x_share,
                r_share,
            },
        ))
    }

    /// Complete a round with the offering party's G-share and return the
    /// verified signature
    #[instrument(skip_all, fields(party = %completion.from))]
    pub fn complete(
        &self,
        material: &ServerMaterial,
        round: &PendingRound,
        completion: &SignatureShareRequest,
    ) -> Result<Signature> {
        let material = material.eddsa()?;
        if completion.from != round.party || completion.to != Party::Server {
            return Err(Error::InvalidShare(format!(
                "GShare from {} to {} does not belong to the round of {}",
                completion.from, completion.to, round.party
            )));
        }
        let third = round
            .party
            .third(Party::Server)
            .ok_or_else(|| Error::InvalidConfig("No third party".into()))?;

        let server_g_share = eddsa::sign(
            &round.payload,
            &round.x_share,
            &[&round.r_share],
            &[material.y_share_from(third)?],
        )?;
        let party_g_share =
            GShareRecord::decode(&completion.share)?.to_g_share(round.party, server_g_share.y);

        let signature = eddsa::sign_combine(&[party_g_share, server_g_share])?;
        eddsa::verify(&round.payload, &signature)?;
        info!("Signature completed");
        Ok(signature)
    }
}
