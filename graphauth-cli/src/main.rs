//! graphauth CLI
//!
//! Command-line front end over the credential facade.
//!
//! # Usage
//!
//! ```bash
//! # Get a token for the configured default scopes (signs in if needed)
//! graphauth token
//!
//! # Get a token for explicit scopes, printing it as JSON
//! graphauth token "User.Read Calendars.ReadWrite" --format json --show
//!
//! # List cached accounts
//! graphauth accounts
//!
//! # Forget cached accounts and tokens
//! graphauth sign-out
//!
//! # Show configuration and cache storage
//! graphauth status
//! ```

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use graphauth_core::config::{default_config_path, load_config};
use graphauth_core::Credential;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use output::{AccountReport, StatusReport, TokenReport};

#[derive(Parser)]
#[command(name = "graphauth")]
#[command(about = "Device-flow sign-in and token cache for Microsoft identity clients")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get a valid access token, signing in with a device code if needed
    Token {
        /// Scopes to request; one space-separated string is split
        scopes: Vec<String>,

        /// Print the token value itself
        #[arg(long)]
        show: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List cached accounts
    Accounts {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Remove cached accounts and their tokens
    SignOut,

    /// Show configuration and where the token cache is stored
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let credential = Credential::new(config)
        .await
        .context("Failed to initialize credential")?;
    tracing::debug!("Token cache protection: {}", credential.store_method());

    match cli.command {
        Commands::Token {
            scopes,
            show,
            format,
        } => get_token(&credential, &scopes, show, format).await,
        Commands::Accounts { format } => list_accounts(&credential, format).await,
        Commands::SignOut => sign_out(&credential).await,
        Commands::Status { format } => status(&credential, cli.config, format).await,
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn get_token(
    credential: &Credential,
    scopes: &[String],
    show: bool,
    format: Format,
) -> Result<()> {
    let token = credential
        .acquire(scopes)
        .await
        .context("Failed to acquire access token")?;

    let report = TokenReport::new(&token, show);
    print(&report, format, TokenReport::render_text)
}

async fn list_accounts(credential: &Credential, format: Format) -> Result<()> {
    let accounts: Vec<AccountReport> = credential
        .accounts()
        .await
        .iter()
        .map(AccountReport::from)
        .collect();

    print(&accounts, format, |accounts| AccountReport::render_list(accounts))
}

async fn sign_out(credential: &Credential) -> Result<()> {
    match credential.sign_out().await {
        0 => println!("No cached accounts"),
        1 => println!("Signed out 1 account"),
        n => println!("Signed out {} accounts", n),
    }
    Ok(())
}

async fn status(credential: &Credential, config_path: Option<PathBuf>, format: Format) -> Result<()> {
    let report = StatusReport {
        config_path: config_path.unwrap_or_else(default_config_path),
        client_id: credential.config().client_id.clone(),
        authority: credential
            .config()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_default(),
        default_scopes: credential.config().default_scopes.to_string(),
        store_method: credential.store_method().to_string(),
        encrypted: credential.store_method().is_encrypted(),
        cache_path: credential.cache_path().to_path_buf(),
        accounts: credential.accounts().await.len(),
    };

    print(&report, format, StatusReport::render_text)
}

fn print<T, F>(value: &T, format: Format, render_text: F) -> Result<()>
where
    T: serde::Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Text => println!("{}", render_text(value)),
    }
    Ok(())
}
