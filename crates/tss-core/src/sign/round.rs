//! Signing round and transaction request helpers

use super::records::{encrypt_signer_share, GShareRecord, RShareRecord};
use super::{SigningConfig, SigningPhase, TxRequestRef};
use crate::api::{SignatureShareRequest, TssApi};
use crate::eddsa;
use crate::types::{
    Party, SendTxResult, SignatureShareRecord, SigningMaterial, TxIntent, TxRequest,
};
use crate::{Error, Result};
use tracing::{debug, info, instrument, warn};

/// One signing round of a User or Backup party with the Server.
///
/// Tracks the phase it is in so a failure can be reported against it.
pub struct SigningRound<'a, A: TssApi + ?Sized> {
    api: &'a A,
    material: &'a SigningMaterial,
    config: &'a SigningConfig,
    phase: SigningPhase,
}

impl<'a, A: TssApi + ?Sized> SigningRound<'a, A> {
    pub fn new(api: &'a A, material: &'a SigningMaterial, config: &'a SigningConfig) -> Self {
        Self {
            api,
            material,
            config,
            phase: SigningPhase::Resolved,
        }
    }

    /// Phase the round is in, or failed in
    pub fn phase(&self) -> SigningPhase {
        self.phase
    }

    /// Run every phase and return the finalized transaction request
    #[instrument(skip_all, fields(party = %self.material.party(), tx_request_id = %tx_ref.id()))]
    pub async fn run(&mut self, tx_ref: TxRequestRef) -> Result<TxRequest> {
        let result = self.execute(tx_ref).await;
        result.map_err(|e| {
            warn!(phase = %self.phase, error = %e, "Signing round failed");
            e.in_phase(self.phase)
        })
    }

    fn enter(&mut self, phase: SigningPhase) {
        debug!(%phase, "Entering signing phase");
        self.phase = phase;
    }

    async fn execute(&mut self, tx_ref: TxRequestRef) -> Result<TxRequest> {
        let material = self.material;
        let party = material.party();

        self.enter(SigningPhase::Resolved);
        material.validate()?;
        let tx_request = match tx_ref {
            TxRequestRef::Id(id) => get_tx_request(self.api, &id).await?,
            TxRequestRef::Request(request) => request,
        };
        let tx_request_id = tx_request.tx_request_id.clone();
        let unsigned_tx = tx_request.unsigned_tx()?.clone();
        let payload = hex::decode(&unsigned_tx.signable_hex)?;
        info!(
            tx_request_id = %tx_request_id,
            derivation_path = %unsigned_tx.derivation_path,
            "Starting signing round"
        );

        self.enter(SigningPhase::KeyDerived);
        let p_share = eddsa::key_derive(
            &material.u_share,
            &[&material.server_y_share, &material.counterpart_y_share],
            &unsigned_tx.derivation_path,
        )?;

        self.enter(SigningPhase::LocalShareOffered);
        let sign_share = eddsa::sign_share(&payload, &p_share, &[Party::Server])?;
        let r_share = sign_share.r_shares.get(&Party::Server).ok_or_else(|| {
            Error::ProtocolState("Nonce was not shared with the server".into())
        })?;
        let service_key = self.api.service_public_key().await?;
        let offer = SignatureShareRequest {
            from: party,
            to: Party::Server,
            share: RShareRecord::from_r_share(r_share).encode(),
            signer_share: Some(encrypt_signer_share(&material.u_share, &p_share, &service_key)?),
        };
        self.api.post_signature_share(&tx_request_id, &offer).await?;

        self.enter(SigningPhase::CounterShareReceived);
        let (record, refreshed) = self.await_counter_share(&tx_request_id, party).await?;
        let refreshed_tx = refreshed.unsigned_tx()?;
        if !refreshed_tx
            .signable_hex
            .eq_ignore_ascii_case(&unsigned_tx.signable_hex)
        {
            return Err(Error::ProtocolState(format!(
                "Signable payload of tx request {} changed during the round",
                tx_request_id
            )));
        }
        if refreshed_tx.derivation_path != unsigned_tx.derivation_path {
            return Err(Error::ProtocolState(format!(
                "Derivation path of tx request {} changed during the round",
                tx_request_id
            )));
        }
        let server_r_share = RShareRecord::decode(&record.share)?.to_r_share(
            party,
            Party::Server,
            material.server_y_share.u,
            material.server_y_share.v,
        );

        self.enter(SigningPhase::CompletionSigned);
        let g_share = eddsa::sign(
            &payload,
            &sign_share.x_share,
            &[&server_r_share],
            &[&material.counterpart_y_share],
        )?;
        if g_share.i != party {
            return Err(Error::InvalidShare(format!(
                "GShare belongs to {}, not {}",
                g_share.i, party
            )));
        }

        self.enter(SigningPhase::Submitted);
        let completion = SignatureShareRequest {
            from: party,
            to: Party::Server,
            share: GShareRecord::from_g_share(&g_share).encode(),
            signer_share: None,
        };
        self.api
            .post_signature_share(&tx_request_id, &completion)
            .await?;

        self.enter(SigningPhase::Finalized);
        let finalized = get_tx_request(self.api, &tx_request_id).await?;
        info!(
            tx_request_id = %tx_request_id,
            state = ?finalized.state,
            "Signing round complete"
        );
        Ok(finalized)
    }

    /// Poll until the Server's R-share addressed to `party` shows up
    async fn await_counter_share(
        &self,
        tx_request_id: &str,
        party: Party,
    ) -> Result<(SignatureShareRecord, TxRequest)> {
        let attempts = self.config.max_poll_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.poll_interval).await;
            }
            let tx_request = get_tx_request(self.api, tx_request_id).await?;
            let found = tx_request
                .signature_shares
                .iter()
                .find(|record| record.to == party)
                .cloned();
            if let Some(record) = found {
                if record.from != Party::Server {
                    return Err(Error::InvalidShare(format!(
                        "RShare addressed to {} is from {}, not the server",
                        party, record.from
                    )));
                }
                debug!(attempt, "Received server RShare");
                return Ok((record, tx_request));
            }
            debug!(attempt, "Server RShare not available yet");
        }
        Err(Error::ProtocolState(format!(
            "No server RShare for {} on tx request {}",
            party, tx_request_id
        )))
    }
}

/// Sign a transaction request with the Server and return it finalized
pub async fn sign_tx_request<A: TssApi + ?Sized>(
    api: &A,
    tx_ref: impl Into<TxRequestRef>,
    material: &SigningMaterial,
    config: &SigningConfig,
) -> Result<TxRequest> {
    SigningRound::new(api, material, config)
        .run(tx_ref.into())
        .await
}

/// Discard the signature shares of a request and sign it again from a
/// fresh fetch
#[instrument(skip(api, material, config))]
pub async fn recreate_tx_request<A: TssApi + ?Sized>(
    api: &A,
    tx_request_id: &str,
    material: &SigningMaterial,
    config: &SigningConfig,
) -> Result<TxRequest> {
    let removed = delete_signature_shares(api, tx_request_id).await?;
    info!(removed = removed.len(), "Restarting signing round");
    sign_tx_request(api, TxRequestRef::Id(tx_request_id.to_string()), material, config).await
}

/// Remove every signature share of a request, returning what was removed
pub async fn delete_signature_shares<A: TssApi + ?Sized>(
    api: &A,
    tx_request_id: &str,
) -> Result<Vec<SignatureShareRecord>> {
    let removed = api.delete_signature_shares(tx_request_id).await?;
    debug!(tx_request_id, removed = removed.len(), "Deleted signature shares");
    Ok(removed)
}

/// Hand a signed request to broadcast
pub async fn send_tx_request<A: TssApi + ?Sized>(
    api: &A,
    tx_request_id: &str,
) -> Result<SendTxResult> {
    let result = api.send_tx(tx_request_id).await?;
    info!(tx_request_id, state = ?result.state, "Sent tx request");
    Ok(result)
}

/// Fetch the latest version of a request
pub async fn get_tx_request<A: TssApi + ?Sized>(api: &A, tx_request_id: &str) -> Result<TxRequest> {
    let tx_request = api.get_tx_request(tx_request_id).await?;
    if tx_request.tx_request_id != tx_request_id {
        return Err(Error::ProtocolState(format!(
            "Requested tx request {}, got {}",
            tx_request_id, tx_request.tx_request_id
        )));
    }
    Ok(tx_request)
}

/// Create a transaction request from an intent
pub async fn create_tx_request<A: TssApi + ?Sized>(
    api: &A,
    wallet_id: &str,
    intent: &TxIntent,
) -> Result<TxRequest> {
    if intent.signable_hex.is_empty() {
        return Err(Error::InvalidConfig("Intent has no signable payload".into()));
    }
    hex::decode(&intent.signable_hex)?;
    eddsa::hd::parse_path(&intent.derivation_path)?;

    let tx_request = api.create_tx_request(wallet_id, intent).await?;
    info!(
        wallet_id,
        tx_request_id = %tx_request.tx_request_id,
        intent_type = %intent.intent_type,
        "Created tx request"
    );
    Ok(tx_request)
}
