//! Interactive co-signing with the Server party
//!
//! A User or Backup party and the relay's Server exchange one R-share each,
//! then the party submits its G-share. The Server completes the signature.

mod records;
mod round;

pub use records::{
    decrypt_signer_share, encrypt_signer_share, GShareRecord, RShareRecord, SignerShare,
};
pub use round::{
    create_tx_request, delete_signature_shares, get_tx_request, recreate_tx_request,
    send_tx_request, sign_tx_request, SigningRound,
};

use crate::types::TxRequest;
use std::fmt;
use std::time::Duration;

/// Steps of a signing round, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SigningPhase {
    Resolved,
    KeyDerived,
    LocalShareOffered,
    CounterShareReceived,
    CompletionSigned,
    Submitted,
    Finalized,
}

impl fmt::Display for SigningPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SigningPhase::Resolved => "resolve",
            SigningPhase::KeyDerived => "key derivation",
            SigningPhase::LocalShareOffered => "share offer",
            SigningPhase::CounterShareReceived => "counter share retrieval",
            SigningPhase::CompletionSigned => "completion",
            SigningPhase::Submitted => "submission",
            SigningPhase::Finalized => "finalization",
        };
        f.write_str(name)
    }
}

/// A transaction request given by id or as an already fetched object
#[derive(Debug, Clone)]
pub enum TxRequestRef {
    /// Fetched fresh from the relay
    Id(String),
    /// Used as supplied
    Request(TxRequest),
}

impl TxRequestRef {
    pub fn id(&self) -> &str {
        match self {
            TxRequestRef::Id(id) => id,
            TxRequestRef::Request(request) => &request.tx_request_id,
        }
    }
}

impl From<String> for TxRequestRef {
    fn from(id: String) -> Self {
        TxRequestRef::Id(id)
    }
}

impl From<&str> for TxRequestRef {
    fn from(id: &str) -> Self {
        TxRequestRef::Id(id.to_string())
    }
}

impl From<TxRequest> for TxRequestRef {
    fn from(request: TxRequest) -> Self {
        TxRequestRef::Request(request)
    }
}

/// Signing round configuration
#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// Fetches of the transaction request while waiting for the Server's
    /// R-share
    pub max_poll_attempts: u32,
    /// Delay between fetches
    pub poll_interval: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            max_poll_attempts: 100,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl SigningConfig {
    pub fn with_poll(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_poll_attempts = max_attempts;
        self.poll_interval = interval;
        self
    }
}
