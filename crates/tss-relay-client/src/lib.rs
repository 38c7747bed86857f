//! TSS Relay Client
//!
//! [`TssApi`] over HTTP, for parties talking to a remote relay service.

use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use tss_core::api::{
    async_trait, AddKeychainRequest, CreateKeychainRequest, SignatureShareRequest, TssApi,
};
use tss_core::messaging::MessagingPublicKey;
use tss_core::{
    Error, Keychain, Result, SendTxResult, SignatureShareRecord, TxIntent, TxRequest,
};

/// HTTP-based relay client
pub struct RelayClient {
    /// HTTP client
    client: Client,
    /// Relay service URL
    url: String,
    /// Request timeout
    timeout: Duration,
}

impl RelayClient {
    /// Create a new relay client
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.url, path)
    }

    /// Send a request and check its status
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorResponse>()
                .await
                .map(|body| body.error)
                .unwrap_or_default();
            return Err(Error::Network(format!(
                "Relay responded with status {}: {}",
                status, detail
            )));
        }
        Ok(response)
    }

    /// Send a request and decode its JSON body
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }
}

#[async_trait]
impl TssApi for RelayClient {
    async fn service_public_key(&self) -> Result<MessagingPublicKey> {
        let response: PublicKeyResponse = self
            .send_json(self.client.get(self.endpoint("tss/pubkey")))
            .await?;
        Ok(response.public_key)
    }

    #[instrument(skip_all)]
    async fn create_keychain(&self, request: &CreateKeychainRequest) -> Result<Keychain> {
        let keychain: Keychain = self
            .send_json(self.client.post(self.endpoint("key")).json(request))
            .await?;
        debug!(keychain_id = %keychain.id, "Created keychain");
        Ok(keychain)
    }

    #[instrument(skip_all)]
    async fn add_keychain(&self, request: &AddKeychainRequest) -> Result<Keychain> {
        self.send_json(self.client.post(self.endpoint("key/add")).json(request))
            .await
    }

    #[instrument(skip(self))]
    async fn delete_keychain(&self, id: &str) -> Result<()> {
        self.send(self.client.delete(self.endpoint(&format!("key/{}", id))))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, intent))]
    async fn create_tx_request(&self, wallet_id: &str, intent: &TxIntent) -> Result<TxRequest> {
        let path = format!("wallet/{}/txrequests", wallet_id);
        self.send_json(self.client.post(self.endpoint(&path)).json(intent))
            .await
    }

    async fn get_tx_request(&self, id: &str) -> Result<TxRequest> {
        let path = format!("txrequests/{}", id);
        self.send_json(self.client.get(self.endpoint(&path))).await
    }

    #[instrument(skip(self, request), fields(from = %request.from, to = %request.to))]
    async fn post_signature_share(
        &self,
        id: &str,
        request: &SignatureShareRequest,
    ) -> Result<SignatureShareRecord> {
        let path = format!("txrequests/{}/signatureshares", id);
        let record: SignatureShareRecord = self
            .send_json(self.client.post(self.endpoint(&path)).json(request))
            .await?;
        debug!("Signature share posted");
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn delete_signature_shares(&self, id: &str) -> Result<Vec<SignatureShareRecord>> {
        let path = format!("txrequests/{}/signatureshares", id);
        self.send_json(self.client.delete(self.endpoint(&path)))
            .await
    }

    #[instrument(skip(self))]
    async fn send_tx(&self, id: &str) -> Result<SendTxResult> {
        let path = format!("txrequests/{}/send", id);
        self.send_json(self.client.post(self.endpoint(&path))).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyResponse {
    public_key: MessagingPublicKey,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let client = RelayClient::new("http://relay.local:8080/");
        assert_eq!(client.url(), "http://relay.local:8080");
        assert_eq!(
            client.endpoint("txrequests/abc/send"),
            "http://relay.local:8080/api/v2/txrequests/abc/send"
        );
    }

    #[tokio::test]
    async fn test_unreachable_relay() {
        // Nothing listens on the discard port
        let client = RelayClient::new("http://127.0.0.1:9").with_timeout(Duration::from_millis(500));
        let err = client.get_tx_request("abc").await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
