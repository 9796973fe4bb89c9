//! sealshare: access ledger CLI
//!
//! Mutations (require `--as <principal>`):
//!   create <hash> <pointer> [--grant P]...   - register a file, optionally sharing it
//!   update <hash> <pointer>                  - replace the content pointer
//!   delete <hash>                            - soft-delete; all grants become void
//!   transfer <hash> <new-owner>              - hand ownership over
//!   grant <hash> <P>...                      - authorize one or more principals
//!   revoke <hash> <P>                        - remove a principal's access
//!
//! Queries:
//!   status <hash>, check <hash> <P>, pointer <hash> --as <P>
//!
//! Tools:
//!   hash <file>, replay [<journal>], config show
//!
//! Emitted events are printed to stdout as JSON lines and appended to the
//! configured event journal. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sealshare_core::config::{expand_tilde, SealConfig};
use sealshare_core::{FileHash, Principal, SealError};
use sealshare_ledger::{
    AccessLedger, EventMirror, LedgerEvent, LedgerResult, StateLock, StoreBackend,
};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealshare",
    version,
    about = "sealshare access ledger client",
    long_about = "sealshare: manage who may decrypt which encrypted file blobs"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "SEALSHARE_CONFIG",
        default_value = "/etc/sealshare/config.toml"
    )]
    config: PathBuf,

    /// Ledger state path (overrides config)
    #[arg(long, env = "SEALSHARE_STATE")]
    state: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long, env = "SEALSHARE_LOG")]
    log: Option<String>,

    /// Log format; overrides config
    #[arg(long, env = "SEALSHARE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a file hash and its content pointer
    Create {
        hash: FileHash,
        pointer: String,
        /// Initial grantee (repeatable)
        #[arg(long = "grant")]
        grantees: Vec<Principal>,
        /// Calling principal
        #[arg(long = "as", env = "SEALSHARE_AS")]
        caller: Principal,
    },

    /// Replace the content pointer of a live file
    Update {
        hash: FileHash,
        pointer: String,
        #[arg(long = "as", env = "SEALSHARE_AS")]
        caller: Principal,
    },

    /// Soft-delete a file
    Delete {
        hash: FileHash,
        #[arg(long = "as", env = "SEALSHARE_AS")]
        caller: Principal,
    },

    /// Transfer ownership; the current owner loses access
    Transfer {
        hash: FileHash,
        new_owner: Principal,
        #[arg(long = "as", env = "SEALSHARE_AS")]
        caller: Principal,
    },

    /// Authorize principals (several at once are granted as one batch)
    Grant {
        hash: FileHash,
        #[arg(required = true)]
        principals: Vec<Principal>,
        #[arg(long = "as", env = "SEALSHARE_AS")]
        caller: Principal,
    },

    /// Revoke a principal's access
    Revoke {
        hash: FileHash,
        principal: Principal,
        #[arg(long = "as", env = "SEALSHARE_AS")]
        caller: Principal,
    },

    /// Show ownership, generation, and authorized count
    Status { hash: FileHash },

    /// Check whether a principal is currently authorized
    Check { hash: FileHash, principal: Principal },

    /// Print the content pointer (caller must be authorized)
    Pointer {
        hash: FileHash,
        #[arg(long = "as", env = "SEALSHARE_AS")]
        caller: Principal,
    },

    /// Print the SHA-256 file hash of an (already encrypted) file
    Hash { file: PathBuf },

    /// Rebuild the off-chain index from an event journal
    Replay {
        /// Journal path (default: ledger.event_log from config)
        journal: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| parse_log_format(&config.log.format));
    init_logging(&level, &format);
    if !cli.config.exists() {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Hash { file } => cmd_hash(&file).await,
        Commands::Replay { journal } => cmd_replay(&config, journal.as_deref()),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
        command => {
            let state_path = resolve_state_path(&config, cli.state.as_deref());
            run_locked(&config, &state_path, command).await
        }
    }
}

/// Open the ledger and run one command while holding the state lock, so the
/// load, commit, flush and journal append of concurrent invocations never
/// interleave.
async fn run_locked(config: &SealConfig, state_path: &Path, command: Commands) -> Result<()> {
    let mut lock = StateLock::open(state_path)?;
    let _guard = lock.acquire()?;

    let store = StoreBackend::open(state_path)
        .with_context(|| format!("opening ledger state: {}", state_path.display()))?;
    info!(
        backend = store.kind(),
        path = %state_path.display(),
        "ledger opened"
    );
    let mut ledger = AccessLedger::from_config(store, &config.ledger);
    run_ledger_command(&mut ledger, config, command).await
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<SealConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        SealConfig::from_toml(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(SealConfig::default())
    }
}

fn parse_log_format(s: &str) -> LogFormat {
    if s.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Resolve the ledger state path: CLI flag > config
fn resolve_state_path(config: &SealConfig, override_path: Option<&Path>) -> PathBuf {
    match override_path {
        Some(p) => p.to_path_buf(),
        None => expand_tilde(&config.ledger.state_path),
    }
}

// ── Ledger commands ───────────────────────────────────────────────────────────

async fn run_ledger_command(
    ledger: &mut AccessLedger<StoreBackend>,
    config: &SealConfig,
    command: Commands,
) -> Result<()> {
    let result: LedgerResult<Vec<LedgerEvent>> = match command {
        Commands::Create {
            hash,
            pointer,
            grantees,
            caller,
        } => ledger.create(caller, hash, &pointer, &grantees),
        Commands::Update {
            hash,
            pointer,
            caller,
        } => ledger.update_pointer(caller, hash, &pointer),
        Commands::Delete { hash, caller } => ledger.delete(caller, hash),
        Commands::Transfer {
            hash,
            new_owner,
            caller,
        } => ledger.transfer_ownership(caller, hash, new_owner),
        Commands::Grant {
            hash,
            principals,
            caller,
        } => match principals.as_slice() {
            [single] => ledger.grant(caller, hash, *single),
            batch => ledger.grant_batch(caller, hash, batch),
        },
        Commands::Revoke {
            hash,
            principal,
            caller,
        } => ledger.revoke(caller, hash, principal),
        Commands::Status { hash } => return cmd_status(ledger, hash),
        Commands::Check { hash, principal } => {
            let authorized = ledger.is_authorized(hash, principal);
            println!(
                "{}",
                serde_json::json!({
                    "file_hash": hash,
                    "principal": principal,
                    "authorized": authorized,
                })
            );
            return Ok(());
        }
        Commands::Pointer { hash, caller } => {
            let pointer = ledger
                .content_pointer_of(caller, hash)
                .map_err(SealError::from)?;
            println!("{pointer}");
            return Ok(());
        }
        Commands::Hash { .. } | Commands::Replay { .. } | Commands::Config { .. } => {
            anyhow::bail!("command does not operate on the ledger")
        }
    };

    let events = result.map_err(SealError::from)?;
    ledger.flush().map_err(SealError::from)?;
    append_journal(config, &events).await?;

    if events.is_empty() {
        info!("no state change");
    }
    for event in &events {
        println!("{}", serde_json::to_string(event).context("serializing event")?);
    }
    Ok(())
}

fn cmd_status(ledger: &AccessLedger<StoreBackend>, hash: FileHash) -> Result<()> {
    let status = match ledger.record(hash).filter(|r| r.exists) {
        Some(record) => serde_json::json!({
            "file_hash": hash,
            "exists": true,
            "uploader": record.uploader,
            "generation": record.generation,
            "authorized_count": record.authorized_count,
            "max_authorized": ledger.max_authorized(),
        }),
        None => serde_json::json!({
            "file_hash": hash,
            "exists": false,
            "generation": ledger.generation_of(hash),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Append events to the JSONL journal, if one is configured.
async fn append_journal(config: &SealConfig, events: &[LedgerEvent]) -> Result<()> {
    let Some(path) = config.ledger.event_log.as_deref() else {
        return Ok(());
    };
    if events.is_empty() {
        return Ok(());
    }
    let path = expand_tilde(path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating journal dir: {}", parent.display()))?;
    }

    let mut buf = Vec::new();
    for event in events {
        buf.extend_from_slice(&event.to_bytes()?);
        buf.push(b'\n');
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("opening journal: {}", path.display()))?;
    file.write_all(&buf)
        .await
        .with_context(|| format!("appending to journal: {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

// ── `sealshare hash` ──────────────────────────────────────────────────────────

async fn cmd_hash(file: &Path) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    println!("{}", FileHash::digest(&data));
    Ok(())
}

// ── `sealshare replay` ────────────────────────────────────────────────────────

fn cmd_replay(config: &SealConfig, journal: Option<&Path>) -> Result<()> {
    let path = match journal {
        Some(p) => p.to_path_buf(),
        None => expand_tilde(
            config
                .ledger
                .event_log
                .as_deref()
                .context("no journal given and ledger.event_log is not configured")?,
        ),
    };
    let file = std::fs::File::open(&path)
        .with_context(|| format!("opening journal: {}", path.display()))?;
    let mirror = EventMirror::from_jsonl(std::io::BufReader::new(file))?;
    info!(
        events = mirror.applied(),
        files = mirror.len(),
        "journal replayed"
    );
    println!("{}", serde_json::to_string_pretty(&mirror)?);
    Ok(())
}

// ── `sealshare config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &SealConfig, path: &Path) -> Result<()> {
    println!("# config: {}", path.display());
    print!("{}", toml::to_string_pretty(config).context("serializing config")?);
    Ok(())
}
