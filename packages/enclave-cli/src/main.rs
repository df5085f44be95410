//! Enclave CLI
//!
//! Drives Enclave Core from a terminal. Keys live in a SQLite database under
//! the data directory; a second SQLite database plays the key directory, so
//! several local users can exchange encrypted messages and files.
//!
//! ```text
//! enclave --user alice init
//! enclave --user bob init
//! enclave --user alice encrypt --to bob "hello"
//! enclave --user bob decrypt <ciphertext>
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;

use enclave_core::directory::SqliteDirectory;
use enclave_core::storage::SqliteStorage;
use enclave_core::{CoreConfig, EnclaveCore, Error, FileMetadata, Provisioning};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "enclave", version, about = "End-to-end encryption keys, messages and files")]
struct Args {
    /// User id to act as
    #[arg(short, long, env = "ENCLAVE_USER")]
    user: String,

    /// Passphrase protecting the private key
    #[arg(long, env = "ENCLAVE_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// TOML configuration file
    #[arg(long, env = "ENCLAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the key store and the local key directory
    #[arg(long, env = "ENCLAVE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log core activity to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and publish a key pair unless one exists
    Init,
    /// Replace the key pair; older messages become unreadable
    Regenerate {
        /// Confirm that existing ciphertexts will be lost
        #[arg(long)]
        yes: bool,
    },
    /// Print the public key (base64 SPKI)
    PublicKey,
    /// Publish the public key again after a failed publish
    Republish,
    /// Encrypt a message for a user
    Encrypt {
        /// Recipient user id
        #[arg(long)]
        to: String,
        /// Message text
        message: String,
    },
    /// Decrypt a message addressed to you
    Decrypt {
        /// Base64 ciphertext
        ciphertext: String,
    },
    /// Encrypt a file for a user
    EncryptFile {
        /// Recipient user id
        #[arg(long)]
        to: String,
        /// File to encrypt
        input: PathBuf,
        /// Ciphertext output; metadata goes to `<output>.meta.json`
        #[arg(short, long)]
        output: PathBuf,
        /// MIME type recorded in the metadata
        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,
    },
    /// Decrypt a file addressed to you
    DecryptFile {
        /// Ciphertext file
        input: PathBuf,
        /// Metadata JSON (default `<input>.meta.json`)
        #[arg(long)]
        metadata: Option<PathBuf>,
        /// Output path (default: the original file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Wrap a plaintext private key under the passphrase
    Migrate,
    /// Delete your private key
    DeleteKeys {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CoreConfig::from_file(path)?,
        None => CoreConfig::default(),
    };

    let verbose = args.verbose || config.verbose_logging;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if verbose {
                    "info,enclave_core=debug".into()
                } else {
                    "warn".into()
                }
            }),
        )
        .init();

    let data_dir = data_dir(&args, &config)?;
    tracing::info!("Using data directory {}", data_dir.display());

    let storage = Arc::new(SqliteStorage::open(data_dir.join("keys.db"))?);
    let directory = Arc::new(SqliteDirectory::open(data_dir.join("directory.db"))?);
    let core = EnclaveCore::new(config, storage, directory)?;
    core.sign_in(&args.user)?;

    let passphrase = args.passphrase.as_deref();
    match run(&core, args.command, passphrase).await {
        Err(report) => match report.downcast_ref::<Error>() {
            Some(Error::PassphraseRequired) => {
                bail!("a passphrase is required: pass --passphrase or set ENCLAVE_PASSPHRASE")
            }
            Some(Error::IntegrityCheckFailed) => {
                Err(report.wrap_err("the encrypted file was modified or corrupted"))
            }
            _ => Err(report),
        },
        ok => ok,
    }
}

fn data_dir(args: &Args, config: &CoreConfig) -> Result<PathBuf> {
    let dir = match (&args.data_dir, &config.storage_path) {
        (Some(dir), _) => dir.clone(),
        (None, Some(path)) => PathBuf::from(path),
        (None, None) => dirs::data_local_dir()
            .ok_or_else(|| eyre!("no local data directory on this platform; pass --data-dir"))?
            .join("enclave"),
    };

    std::fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("cannot create data directory {}", dir.display()))?;
    Ok(dir)
}

async fn run(core: &EnclaveCore, command: Command, passphrase: Option<&str>) -> Result<()> {
    match command {
        Command::Init => match core.initialize_keys(passphrase).await? {
            Provisioning::Existing => println!("Keys already initialized"),
            Provisioning::Created(entry) => println!("Created key {}", entry.key_id),
        },

        Command::Regenerate { yes } => {
            if !yes {
                bail!("regenerating makes every message sent to you so far unreadable; rerun with --yes");
            }
            let entry = core.regenerate_key_pair(passphrase).await?;
            println!("Created key {}", entry.key_id);
        }

        Command::PublicKey => println!("{}", core.public_key(passphrase).await?),

        Command::Republish => {
            let entry = core.republish_public_key(passphrase).await?;
            println!("Published key {}", entry.key_id);
        }

        Command::Encrypt { to, message } => {
            println!("{}", core.encrypt_message_for(&to, &message).await?);
        }

        Command::Decrypt { ciphertext } => {
            println!("{}", core.decrypt_message(&ciphertext, passphrase).await?);
        }

        Command::EncryptFile {
            to,
            input,
            output,
            mime_type,
        } => {
            let bytes = std::fs::read(&input)
                .wrap_err_with(|| format!("cannot read {}", input.display()))?;
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let package = core.encrypt_file_for(&to, bytes, &name, &mime_type).await?;

            write_file(&output, &package.ciphertext)?;
            let meta_path = metadata_path(&output);
            write_file(&meta_path, package.metadata.to_json()?.as_bytes())?;
            println!("Wrote {} and {}", output.display(), meta_path.display());
        }

        Command::DecryptFile {
            input,
            metadata,
            output,
        } => {
            let ciphertext = std::fs::read(&input)
                .wrap_err_with(|| format!("cannot read {}", input.display()))?;
            let meta_path = metadata.unwrap_or_else(|| metadata_path(&input));
            let meta_text = std::fs::read_to_string(&meta_path)
                .wrap_err_with(|| format!("cannot read {}", meta_path.display()))?;
            let metadata = FileMetadata::from_json(&meta_text)?;

            let file = core.decrypt_file(ciphertext, metadata, passphrase).await?;

            // Only the final component of the sender-supplied name is used
            let output = output.unwrap_or_else(|| {
                Path::new(&file.name)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("decrypted-file"))
            });
            write_file(&output, &file.bytes)?;
            println!("Wrote {} ({})", output.display(), file.mime_type);
        }

        Command::Migrate => {
            let passphrase =
                passphrase.ok_or_else(|| eyre!("migrate needs --passphrase or ENCLAVE_PASSPHRASE"))?;
            if core.migrate_to_passphrase(passphrase).await? {
                println!("Private key is now passphrase protected");
            } else {
                println!("Private key was already passphrase protected");
            }
        }

        Command::DeleteKeys { yes } => {
            if !yes {
                bail!("deleting your key makes every message sent to you unreadable; rerun with --yes");
            }
            if core.delete_keys().await? {
                println!("Deleted private key");
            } else {
                println!("No private key stored");
            }
        }
    }

    Ok(())
}

fn metadata_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).wrap_err_with(|| format!("cannot write {}", path.display()))
}
