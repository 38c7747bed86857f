//! # TSS Core
//!
//! Tri-party threshold keychain generation and co-signing for Ed25519.
//!
//! Three fixed parties (User, Backup, Server) hold shares of one signing key
//! so that any two of them can produce a standard Ed25519 signature.
//!
//! This crate provides:
//! - Threshold primitives (`eddsa`) and a BLS12-381 generation variant
//! - Authenticated, encrypted transport of key shares (`messaging`)
//! - Keychain generation against a relay (`keygen`)
//! - The interactive two-party signing round (`sign`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_core::{keygen, sign, GenerateParams, KeyType};
//!
//! // Create the three keychains of a new wallet
//! let triplet = keygen::generate_keychains(&api, &GenerateParams::new(KeyType::Tss)).await?;
//!
//! // Co-sign a transaction request with the server
//! let tx_request = sign::sign_tx_request(&api, tx_ref, &material, &config).await?;
//! ```

pub mod api;
pub mod eddsa;
pub mod error;
pub mod keygen;
pub mod messaging;
pub mod passphrase;
pub mod shamir;
pub mod sign;
pub mod types;

pub use api::TssApi;
pub use error::{Error, Result};
pub use keygen::{GenerateParams, GenerationScheme};
pub use sign::{SigningConfig, SigningPhase, TxRequestRef};
pub use types::{
    CommonKeychain, EncryptedYShare, KeyType, Keychain, KeychainShare, KeychainsTriplet, Party,
    SendTxResult, SignatureShareRecord, SigningMaterial, TxIntent, TxRequest, TxRequestState,
    UnsignedTx,
};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of parties needed to sign
pub const THRESHOLD: usize = 2;

/// Number of key holders
pub const PARTIES: usize = 3;
