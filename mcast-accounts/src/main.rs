//! mcast-accounts - Connect and manage publishing accounts
//!
//! Accounts are discovered from a user access token, stored in the local
//! database together with their credential, and kept usable by the token
//! manager from then on.

use std::io::{IsTerminal, Read};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use libmediacast::logging::LoggingConfig;
use libmediacast::service::MediacastService;
use libmediacast::store::AccountStore;
use libmediacast::types::TokenKind;
use libmediacast::{Credential, MediacastError, PlatformKind};
use tracing::error;

#[derive(Parser)]
#[command(name = "mcast-accounts")]
#[command(version, about = "Connect and manage Mediacast publishing accounts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Short,
    Long,
}

impl From<KindArg> for TokenKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Short => TokenKind::ShortLived,
            KindArg::Long => TokenKind::LongLived,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Store every account a user token can publish to
    Discover {
        /// Platform name (meta, youtube)
        #[arg(short, long)]
        platform: PlatformKind,

        /// User access token (reads from stdin if not provided)
        #[arg(long, env = "MEDIACAST_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Whether the token is short-lived or long-lived
        #[arg(long, value_enum, default_value = "short")]
        kind: KindArg,

        /// Remaining validity of the token, e.g. 1h or 60days
        #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
        expires_in: Option<Duration>,

        /// OAuth refresh token (YouTube)
        #[arg(long, env = "MEDIACAST_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,

        /// Granted scopes (comma-separated)
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
    },

    /// List connected accounts (without showing tokens)
    List {
        /// Filter by platform (optional)
        #[arg(long)]
        platform: Option<PlatformKind>,
    },

    /// Remove an account and its stored credential
    Remove {
        account: String,
    },

    /// Ask the platform whether the stored token is still valid
    Validate {
        account: String,
    },

    /// Exchange or refresh the stored token now
    Exchange {
        account: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run_command(cli.command, cli.json).await {
        error!("{:#}", e);
        let code = e
            .downcast_ref::<MediacastError>()
            .map(MediacastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run_command(command: Commands, json: bool) -> Result<()> {
    let service = MediacastService::new()
        .await
        .context("Failed to open Mediacast")?;

    match command {
        Commands::Discover {
            platform,
            token,
            kind,
            expires_in,
            refresh_token,
            scopes,
        } => {
            let credential =
                build_credential(token, kind.into(), expires_in, refresh_token, scopes)?;
            discover(&service, platform, credential, json).await
        }
        Commands::List { platform } => list_accounts(&service, platform, json).await,
        Commands::Remove { account } => {
            if !service.remove_account(&account).await? {
                bail!(MediacastError::NotFound(format!("Account {}", account)));
            }
            println!("Removed account {}", account);
            Ok(())
        }
        Commands::Validate { account } => validate(&service, &account, json).await,
        Commands::Exchange { account } => {
            let credential = service.exchange_account_token(&account).await?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "account": account,
                        "kind": credential.kind.as_str(),
                        "expires_at": credential.expires_at.to_rfc3339(),
                    })
                );
            } else {
                println!(
                    "Exchanged token for {} ({}), valid until {}",
                    account,
                    credential.kind.as_str(),
                    credential.expires_at.to_rfc3339()
                );
            }
            Ok(())
        }
    }
}

fn build_credential(
    token: Option<String>,
    kind: TokenKind,
    expires_in: Option<Duration>,
    refresh_token: Option<String>,
    scopes: Vec<String>,
) -> Result<Credential> {
    let token = match token {
        Some(token) => token,
        None => read_token_from_stdin()?,
    };
    if token.trim().is_empty() {
        bail!(MediacastError::InvalidInput(
            "Access token cannot be empty".to_string()
        ));
    }

    let lifetime = expires_in.unwrap_or(match kind {
        TokenKind::ShortLived => Duration::from_secs(60 * 60),
        TokenKind::LongLived => Duration::from_secs(60 * 24 * 60 * 60),
    });
    let now = Utc::now();
    let expires_at = now
        + chrono::Duration::from_std(lifetime).context("Token lifetime is out of range")?;

    let mut credential = Credential::new(token.trim(), kind, now, expires_at).with_scopes(scopes);
    if let Some(refresh_token) = refresh_token {
        credential = credential.with_refresh_token(refresh_token);
    }
    Ok(credential)
}

fn read_token_from_stdin() -> Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!(MediacastError::InvalidInput(
            "No token given. Pass --token, set MEDIACAST_ACCESS_TOKEN or pipe it on stdin"
                .to_string()
        ));
    }
    let mut token = String::new();
    stdin
        .lock()
        .read_to_string(&mut token)
        .context("Failed to read token from stdin")?;
    Ok(token)
}

async fn discover(
    service: &MediacastService,
    platform: PlatformKind,
    credential: Credential,
    json: bool,
) -> Result<()> {
    let accounts = service.discover_accounts(platform, credential).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(());
    }

    if accounts.is_empty() {
        println!("No {} accounts are reachable with this token", platform);
        return Ok(());
    }
    for account in &accounts {
        println!("Connected {} ({})", account.id, account.display_name);
    }
    Ok(())
}

async fn list_accounts(
    service: &MediacastService,
    platform: Option<PlatformKind>,
    json: bool,
) -> Result<()> {
    let db = service.database();
    let accounts: Vec<_> = db
        .list_accounts()
        .await?
        .into_iter()
        .filter(|a| platform.map_or(true, |p| a.kind == p))
        .collect();

    let now = Utc::now();
    let mut rows = Vec::with_capacity(accounts.len());
    for account in &accounts {
        let credential = db.get_credential(&account.credential_ref).await?;
        rows.push((account, credential));
    }

    if json {
        let entries: Vec<_> = rows
            .iter()
            .map(|(account, credential)| {
                serde_json::json!({
                    "id": account.id,
                    "platform": account.kind.as_str(),
                    "display_name": account.display_name,
                    "token_kind": credential.as_ref().map(|c| c.kind.as_str()),
                    "expires_at": credential.as_ref().map(|c| c.expires_at.to_rfc3339()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No accounts connected");
        return Ok(());
    }
    for (account, credential) in rows {
        let status = match credential {
            None => "no credential".to_string(),
            Some(c) if c.is_expired(now) => format!("{} expired", c.kind.as_str()),
            Some(c) => format!(
                "{} until {}",
                c.kind.as_str(),
                c.expires_at.format("%Y-%m-%d %H:%M")
            ),
        };
        println!("{:<36} {:<24} {}", account.id, account.display_name, status);
    }
    Ok(())
}

async fn validate(service: &MediacastService, account: &str, json: bool) -> Result<()> {
    let validation = service.validate_account(account).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "account": account,
                "valid": validation.valid,
                "scopes": validation.scopes,
                "expires_at": validation.expires_at.map(|t| t.to_rfc3339()),
            })
        );
    } else if validation.valid {
        println!("✓ {} token is valid", account);
        if let Some(expires_at) = validation.expires_at {
            println!("  expires {}", expires_at.to_rfc3339());
        }
        if !validation.scopes.is_empty() {
            println!("  scopes {}", validation.scopes.join(", "));
        }
    } else {
        println!("✗ {} token is not valid", account);
    }

    if !validation.valid {
        bail!(MediacastError::Token(libmediacast::error::TokenError::Invalid(
            format!("Stored token for {} was rejected", account)
        )));
    }
    Ok(())
}
