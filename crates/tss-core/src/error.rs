//! Error types for TSS keychain and signing operations

use crate::sign::SigningPhase;
use thiserror::Error;

/// Result type alias for TSS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during keychain generation and co-signing
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid party configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Share addressed to an invalid index or to the sender itself
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(u8),

    /// Received share declares a position outside the party set
    #[error("Invalid YShare index: {0}")]
    InvalidShareIndex(u8),

    /// Share carries tags or an owner that do not match the protocol step
    #[error("Invalid share: {0}")]
    InvalidShare(String),

    /// Independently computed common key differs from the expected one
    #[error("Consistency check failed: {0}")]
    Consistency(String),

    /// Signature verification or decryption failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Feldman or signature verification failed
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Expected protocol artifact is missing or the round is in a wrong state
    #[error("Protocol state error: {0}")]
    ProtocolState(String),

    /// Relay unreachable or responded with a failure
    #[error("Network error: {0}")]
    Network(String),

    /// Requested record does not exist on the relay
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Key derivation error
    #[error("Key derivation error: {0}")]
    Derivation(String),

    /// A signing round failed in the named phase
    #[error("Signing failed during {phase}: {source}")]
    Signing {
        phase: SigningPhase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Tag this error with the signing phase it occurred in
    pub fn in_phase(self, phase: SigningPhase) -> Self {
        match self {
            Error::Signing { .. } => self,
            other => Error::Signing {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, looking through a signing phase wrapper
    pub fn root(&self) -> &Error {
        match self {
            Error::Signing { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Deserialization(e.to_string())
    }
}
