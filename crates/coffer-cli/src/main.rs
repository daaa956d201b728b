use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use coffer_core::paths::LOG_FILE_NAME;
use coffer_core::{Config, VaultContext, VaultError};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;
mod prompt;

const LOG_ENV: &str = "COFFER_LOG";
const DEFAULT_LOG_FILTER: &str = "coffer=info,coffer_core=info";

#[derive(Parser, Debug)]
#[command(name = "coffer", author, version, about = "Local encrypted secrets vault", long_about = None)]
struct Cli {
    /// Override the data directory (defaults to the platform data dir or $COFFER_HOME)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new vault (one-time setup)
    #[command(alias = "initialize")]
    Init,

    /// Unlock the vault and start a session
    Unlock,

    /// Lock the vault and clear the session
    Lock,

    /// Show vault and session state
    Status,

    /// Add a secret; prompts for any field not given
    #[command(alias = "insert")]
    Add {
        #[arg(short, long)]
        username: Option<String>,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(short = 'l', long)]
        url: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show one secret by list index or id
    Get {
        target: String,
        /// Print the password instead of masking it
        #[arg(short, long)]
        show_password: bool,
    },

    /// List stored secrets
    #[command(alias = "ls")]
    List {
        #[arg(short, long)]
        verbose: bool,
    },

    /// Change fields of a secret; prompts when no flags are given
    #[command(alias = "edit")]
    Update {
        target: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a secret by list index or id
    #[command(aliases = ["del", "rm"])]
    Delete {
        target: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Read or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print a setting
    Get { setting: Setting },
    /// Change a setting
    Set { setting: Setting, value: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Setting {
    /// Inactivity timeout in seconds; 0 disables autolock
    Autolock,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("command failed: {err:#}");
            eprintln!("Error: {err:#}");
            if let Some(hint) = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<VaultError>())
                .and_then(remediation)
            {
                eprintln!();
                eprintln!("{hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match cli.data_dir {
        Some(dir) => Config::in_dir(dir),
        None => Config::from_env().context("resolve data directory")?,
    };
    if let Err(e) = init_logging(&config.log_dir) {
        eprintln!("warning: file logging disabled: {e:#}");
    }

    let mut ctx = VaultContext::open(config).context("open vault database")?;
    match cli.command {
        Commands::Init => commands::init(&mut ctx),
        Commands::Unlock => commands::unlock(&ctx),
        Commands::Lock => commands::lock(&ctx),
        Commands::Status => commands::status(&ctx),
        Commands::Add {
            username,
            password,
            url,
            description,
        } => commands::add(&ctx, username, password, url, description),
        Commands::Get {
            target,
            show_password,
        } => commands::get(&ctx, &target, show_password),
        Commands::List { verbose } => commands::list(&ctx, verbose),
        Commands::Update {
            target,
            username,
            url,
            description,
        } => commands::update(&ctx, &target, username, url, description),
        Commands::Delete { target, yes } => commands::delete(&ctx, &target, yes),
        Commands::Config { action } => match action {
            ConfigAction::Get {
                setting: Setting::Autolock,
            } => commands::config_get_autolock(&ctx),
            ConfigAction::Set {
                setting: Setting::Autolock,
                value,
            } => commands::config_set_autolock(&ctx, &value),
        },
    }
}

fn init_logging(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))
        .context("open log file")?;

    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!("install subscriber: {e}"))?;
    Ok(())
}

fn remediation(err: &VaultError) -> Option<&'static str> {
    let hint = match err {
        VaultError::VaultNotInitialized => "No vault found. Create one with:\n  coffer init",
        VaultError::VaultAlreadyExists => {
            "A vault already exists here. Unlock it with:\n  coffer unlock"
        }
        VaultError::IncorrectPassword => "The master password was not accepted. Try again.",
        VaultError::VerificationCorrupted => {
            "The vault's verification record does not match. The database may be damaged."
        }
        VaultError::VaultLocked
        | VaultError::SessionExpired
        | VaultError::NoActiveSession
        | VaultError::SessionCorrupted(_) => "Unlock the vault with:\n  coffer unlock",
        VaultError::DecryptionFailed(_) | VaultError::DeserializationFailed(_) => {
            "A stored record could not be read. It may have been modified outside coffer."
        }
        VaultError::NotFound(_) => "Run `coffer list` to see the available entries.",
        VaultError::StorageFailed(_) | VaultError::Io(_) => {
            "Check that the data directory is writable and not in use by another process."
        }
        _ => return None,
    };
    Some(hint)
}
