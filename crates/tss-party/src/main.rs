//! TSS Party CLI
//!
//! Command-line interface for the User and Backup parties:
//! - Keychain generation with the relay's Server party
//! - Transaction request creation
//! - Interactive co-signing, restart and submission

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use tss_core::keygen::{self, GenerateParams};
use tss_core::sign::{self, SigningConfig};
use tss_core::{passphrase, KeyType, Keychain, KeychainsTriplet, Party, SigningMaterial, TxIntent};
use tss_relay_client::RelayClient;

/// TSS Party - tri-party co-signing node
#[derive(Parser)]
#[command(name = "tss-party")]
#[command(about = "Tri-party EdDSA TSS party node")]
#[command(version)]
struct Cli {
    /// Relay service URL
    #[arg(short, long, env = "RELAY_URL", default_value = "http://127.0.0.1:8080")]
    relay: String,

    /// Party acting locally (user or backup)
    #[arg(short, long, env = "PARTY", default_value = "user")]
    party: Party,

    /// Data directory for keychains
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    /// Wallet passphrase protecting the signing material
    #[arg(long, env = "TSS_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the user, backup and server keychains
    Keygen {
        /// Key scheme (tss or blsdkg)
        #[arg(short, long, default_value = "tss")]
        scheme: KeyType,

        /// Enterprise the wallet belongs to
        #[arg(short, long)]
        enterprise: Option<String>,
    },

    /// Create a transaction request on the wallet
    CreateTx {
        /// Payload to sign (hex encoded)
        #[arg(short = 'm', long)]
        payload: String,

        /// Non-hardened derivation path (e.g., m/0/7)
        #[arg(long, default_value = "m/0")]
        path: String,

        /// Intent type
        #[arg(long, default_value = "payment")]
        intent_type: String,

        /// Serialized transaction (hex encoded), defaults to the payload
        #[arg(long)]
        serialized_tx: Option<String>,
    },

    /// Co-sign a transaction request with the server
    Sign {
        /// Transaction request ID
        tx_request_id: String,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Discard the shares of a request and sign it again
    Recreate {
        /// Transaction request ID
        tx_request_id: String,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Delete the signature shares of a request
    DeleteShares {
        /// Transaction request ID
        tx_request_id: String,
    },

    /// Hand a signed request to broadcast
    Send {
        /// Transaction request ID
        tx_request_id: String,
    },

    /// Show keychain info
    Info,
}

#[derive(clap::Args)]
struct PollArgs {
    /// Attempts when waiting for the server's share
    #[arg(long, default_value = "100")]
    poll_attempts: u32,

    /// Delay between attempts in milliseconds
    #[arg(long, default_value = "100")]
    poll_interval_ms: u64,
}

impl PollArgs {
    fn config(&self) -> SigningConfig {
        SigningConfig::default().with_poll(
            self.poll_attempts,
            Duration::from_millis(self.poll_interval_ms),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Ensure data directory exists
    std::fs::create_dir_all(&cli.dest)?;

    let relay = RelayClient::new(&cli.relay);

    match cli.command {
        Commands::Keygen {
            scheme,
            ref enterprise,
        } => {
            run_keygen(&cli, &relay, scheme, enterprise.as_deref()).await?;
        }
        Commands::CreateTx {
            ref payload,
            ref path,
            ref intent_type,
            ref serialized_tx,
        } => {
            let intent = TxIntent {
                intent_type: intent_type.clone(),
                signable_hex: payload.clone(),
                serialized_tx_hex: serialized_tx.clone(),
                derivation_path: path.clone(),
            };
            run_create_tx(&cli, &relay, &intent).await?;
        }
        Commands::Sign {
            ref tx_request_id,
            ref poll,
        } => {
            let material = load_signing_material(&cli.dest, cli.party, cli.passphrase.as_deref())?;
            let signed =
                sign::sign_tx_request(&relay, tx_request_id.as_str(), &material, &poll.config())
                    .await?;
            println!("Tx request {} is {:?}", signed.tx_request_id, signed.state);
        }
        Commands::Recreate {
            ref tx_request_id,
            ref poll,
        } => {
            let material = load_signing_material(&cli.dest, cli.party, cli.passphrase.as_deref())?;
            let signed =
                sign::recreate_tx_request(&relay, tx_request_id, &material, &poll.config()).await?;
            println!("Tx request {} is {:?}", signed.tx_request_id, signed.state);
        }
        Commands::DeleteShares { ref tx_request_id } => {
            let removed = sign::delete_signature_shares(&relay, tx_request_id).await?;
            println!("Removed {} signature shares", removed.len());
        }
        Commands::Send { ref tx_request_id } => {
            let sent = sign::send_tx_request(&relay, tx_request_id).await?;
            println!("Tx request {} is {:?}", sent.tx_request_id, sent.state);
            println!("Signature: {}", sent.signature);
        }
        Commands::Info => {
            show_info(&cli)?;
        }
    }

    Ok(())
}

async fn run_keygen(
    cli: &Cli,
    relay: &RelayClient,
    scheme: KeyType,
    enterprise: Option<&str>,
) -> Result<()> {
    info!(relay = relay.url(), key_type = %scheme, "Starting keychain generation");

    let mut params = GenerateParams::new(scheme);
    if let Some(passphrase) = &cli.passphrase {
        params = params.with_passphrase(passphrase.as_str());
    }
    if let Some(enterprise) = enterprise {
        params = params.with_enterprise(enterprise);
    }
    let triplet = keygen::generate_keychains(relay, &params).await?;
    save_triplet(&cli.dest, &triplet)?;

    let common_key = triplet.server_keychain.common_key().unwrap_or_default();
    info!(
        wallet_id = %triplet.server_keychain.id,
        common_key,
        path = ?cli.dest,
        "Keychains generated and saved"
    );
    if cli.passphrase.is_none() {
        println!("Warning: signing material is stored unencrypted, set TSS_PASSPHRASE to protect it");
    }
    println!("Wallet ID: {}", triplet.server_keychain.id);
    println!("Common Key: {}", common_key);

    Ok(())
}

async fn run_create_tx(cli: &Cli, relay: &RelayClient, intent: &TxIntent) -> Result<()> {
    let wallet_id = load_keychain(&cli.dest, Party::Server)?.id;
    let tx_request = sign::create_tx_request(relay, &wallet_id, intent).await?;
    println!("Tx Request ID: {}", tx_request.tx_request_id);
    Ok(())
}

fn show_info(cli: &Cli) -> Result<()> {
    let keychain = load_keychain(&cli.dest, cli.party)?;

    println!("Keychain Info:");
    println!("  ID: {}", keychain.id);
    println!("  Party: {}", keychain.source);
    println!("  Key Type: {}", keychain.key_type);
    println!("  Common Key: {}", keychain.common_key().unwrap_or_default());
    println!(
        "  Material: {}",
        match (&keychain.encrypted_prv, &keychain.prv) {
            (Some(_), _) => "encrypted",
            (None, Some(_)) => "plaintext",
            (None, None) => "none",
        }
    );

    Ok(())
}

fn keychain_path(dest: &Path, party: Party) -> PathBuf {
    dest.join(format!("keychain.{}.json", party))
}

fn save_triplet(dest: &Path, triplet: &KeychainsTriplet) -> Result<()> {
    for keychain in [
        &triplet.user_keychain,
        &triplet.backup_keychain,
        &triplet.server_keychain,
    ] {
        let json = serde_json::to_string_pretty(keychain)?;
        std::fs::write(keychain_path(dest, keychain.source), json)?;
    }
    Ok(())
}

fn load_keychain(dest: &Path, party: Party) -> Result<Keychain> {
    let path = keychain_path(dest, party);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Cannot read keychain {}", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}

/// Load the party's EdDSA signing material, decrypting it with the
/// passphrase when stored encrypted
fn load_signing_material(
    dest: &Path,
    party: Party,
    passphrase: Option<&str>,
) -> Result<SigningMaterial> {
    if party == Party::Server {
        bail!("The server party signs inside the relay");
    }
    let keychain = load_keychain(dest, party)?;
    if keychain.key_type != KeyType::Tss {
        bail!("{} keychains cannot co-sign transactions", keychain.key_type);
    }

    let material: SigningMaterial = match (&keychain.encrypted_prv, &keychain.prv) {
        (Some(encrypted), _) => {
            let passphrase =
                passphrase.ok_or_else(|| anyhow!("Signing material is encrypted, set TSS_PASSPHRASE"))?;
            let plaintext = passphrase::decrypt(passphrase, encrypted)?;
            serde_json::from_slice(&plaintext)?
        }
        (None, Some(prv)) => serde_json::from_str(prv)?,
        (None, None) => bail!("Keychain {} carries no signing material", keychain.id),
    };
    material.validate()?;
    if material.party() != party {
        bail!("Keychain for {} holds material of {}", party, material.party());
    }
    Ok(material)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tss_core::messaging::MessagingKey;
    use tss_relay::MemoryApi;

    async fn generate(passphrase: Option<&str>) -> (tempfile::TempDir, KeychainsTriplet) {
        let api = MemoryApi::new(MessagingKey::generate());
        let mut params = GenerateParams::new(KeyType::Tss);
        if let Some(passphrase) = passphrase {
            params = params.with_passphrase(passphrase);
        }
        let triplet = keygen::generate_keychains(&api, &params).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        save_triplet(dir.path(), &triplet).unwrap();
        (dir, triplet)
    }

    #[test]
    fn test_keychain_path() {
        let path = keychain_path(Path::new("/data"), Party::Backup);
        assert_eq!(path, PathBuf::from("/data/keychain.backup.json"));
    }

    #[tokio::test]
    async fn test_load_plaintext_material() {
        let (dir, triplet) = generate(None).await;

        let material = load_signing_material(dir.path(), Party::User, None).unwrap();
        assert_eq!(material.party(), Party::User);

        let server = load_keychain(dir.path(), Party::Server).unwrap();
        assert_eq!(server.id, triplet.server_keychain.id);
        assert!(load_signing_material(dir.path(), Party::Server, None).is_err());
    }

    #[tokio::test]
    async fn test_load_encrypted_material() {
        let (dir, _) = generate(Some("correct horse")).await;

        let material =
            load_signing_material(dir.path(), Party::Backup, Some("correct horse")).unwrap();
        assert_eq!(material.party(), Party::Backup);

        assert!(load_signing_material(dir.path(), Party::Backup, None).is_err());
        assert!(load_signing_material(dir.path(), Party::Backup, Some("wrong")).is_err());
    }

    #[test]
    fn test_missing_keychain() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_signing_material(dir.path(), Party::User, None).unwrap_err();
        assert!(err.to_string().contains("keychain.user.json"));
    }
}
