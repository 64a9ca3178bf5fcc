//! Service facade
//!
//! `MediacastService` wires the configured adapters, the token manager,
//! the SQLite store and the event bus together, so the command-line tools
//! only deal with one entry point.
//!
//! # Example
//!
//! ```no_run
//! use libmediacast::service::MediacastService;
//! use libmediacast::types::{FormatOptions, MediaSpec, PublishFormat, PublishRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> libmediacast::Result<()> {
//! let service = MediacastService::new().await?;
//!
//! let request = PublishRequest {
//!     account_id: "meta-17841400000000000".to_string(),
//!     media: MediaSpec::video("https://cdn.example.com/clip.mp4"),
//!     caption: "Behind the scenes".to_string(),
//!     format: PublishFormat::Reel,
//!     options: FormatOptions::default(),
//! };
//!
//! let result = service.workflow().publish(request, &CancellationToken::new()).await;
//! println!("published: {}", result.success);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::credentials::{TokenManager, TokenPolicy};
use crate::db::Database;
use crate::error::{MediacastError, Result};
use crate::events::{EventBus, EventReceiver};
use crate::insights::InsightsAggregator;
use crate::platforms::http::{build_client, build_transfer_client};
use crate::platforms::meta::MetaClient;
use crate::platforms::youtube::YouTubeClient;
use crate::platforms::PlatformRegistry;
use crate::store::{AccountStore, JobJournal};
use crate::types::{Credential, PlatformAccount, PlatformKind, TokenKind, TokenValidation};
use crate::workflow::{PublishJob, PublishWorkflow};
use crate::Config;

/// Main entry point shared by the command-line tools
pub struct MediacastService {
    config: Arc<Config>,
    db: Arc<Database>,
    tokens: Arc<TokenManager>,
    registry: Arc<PlatformRegistry>,
    workflow: PublishWorkflow,
    insights: InsightsAggregator,
    events: EventBus,
}

impl MediacastService {
    /// Create a service from the configuration file at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the
    /// database cannot be opened.
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service from an already loaded configuration
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Database::new(&config.database_path()).await?;
        Self::with_database(config, db)
    }

    /// Wire everything around an open database
    pub fn with_database(config: Config, db: Database) -> Result<Self> {
        let db = Arc::new(db);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let http = build_client(&config.http)?;
        let events = EventBus::default();

        let mut registry = PlatformRegistry::new();
        let mut tokens = TokenManager::new(
            db.clone(),
            clock.clone(),
            TokenPolicy::from(&config.token),
        );

        if let Some(meta) = config.meta.as_ref().filter(|m| m.enabled) {
            let client = Arc::new(MetaClient::new(http.clone(), meta));
            registry.register(client.clone());
            tokens = tokens.with_authority(PlatformKind::Meta, client);
        }
        if let Some(youtube) = config.youtube.as_ref().filter(|y| y.enabled) {
            let client = Arc::new(
                YouTubeClient::new(http.clone(), youtube)
                    .with_transfer_client(build_transfer_client(&config.http)?),
            );
            registry.register(client.clone());
            tokens = tokens.with_authority(PlatformKind::YouTube, client);
        }

        let registry = Arc::new(registry);
        let tokens = Arc::new(tokens);
        let workflow = PublishWorkflow::new(
            tokens.clone(),
            db.clone(),
            registry.clone(),
            clock.clone(),
        )
        .with_policies(config.polling.policy(), config.retry.policy())
        .with_journal(db.clone())
        .with_events(events.clone());
        let insights = InsightsAggregator::new(db.clone(), tokens.clone(), registry.clone(), clock);

        Ok(Self {
            config: Arc::new(config),
            db,
            tokens,
            registry,
            workflow,
            insights,
            events,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub fn workflow(&self) -> &PublishWorkflow {
        &self.workflow
    }

    pub fn insights(&self) -> &InsightsAggregator {
        &self.insights
    }

    /// Subscribe to job progress events
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub async fn account(&self, account_id: &str) -> Result<PlatformAccount> {
        self.db
            .get_account(account_id)
            .await?
            .ok_or_else(|| MediacastError::NotFound(format!("Account {}", account_id)))
    }

    pub async fn job(&self, job_id: &str) -> Result<PublishJob> {
        self.db
            .load(job_id)
            .await?
            .ok_or_else(|| MediacastError::NotFound(format!("Job {}", job_id)))
    }

    /// Find the accounts `credential` can publish to and store them.
    ///
    /// A short-lived credential is exchanged once; every discovered account
    /// then gets its own copy of the resulting credential.
    pub async fn discover_accounts(
        &self,
        kind: PlatformKind,
        credential: Credential,
    ) -> Result<Vec<PlatformAccount>> {
        let client = self.registry.get(kind)?;
        let accounts = client.list_accounts(&credential).await?;
        let Some(first) = accounts.first() else {
            warn!("No {} accounts are reachable with this credential", kind);
            return Ok(accounts);
        };

        for account in &accounts {
            self.db.put_account(account).await?;
        }

        let credential = if credential.kind == TokenKind::ShortLived {
            match self.tokens.exchange_short_lived_token(first, credential.clone()).await {
                Ok(long_lived) => long_lived.as_ref().clone(),
                Err(e) => {
                    warn!(
                        "Keeping short-lived token for {} accounts, exchange failed: {}",
                        kind, e
                    );
                    credential
                }
            }
        } else {
            credential
        };

        for account in &accounts {
            self.tokens.replace(account, credential.clone()).await?;
            info!("Connected {} account {} ({})", kind, account.display_name, account.id);
        }

        Ok(accounts)
    }

    /// Delete a published post from the platform
    pub async fn delete_post(&self, account_id: &str, post_id: &str) -> Result<()> {
        let account = self.account(account_id).await?;
        let client = self.registry.get(account.kind)?;
        let credential = self.tokens.get_valid_token(&account).await?;
        client.delete_post(&credential, post_id).await?;
        info!("Deleted post {} from {}", post_id, account.kind);
        Ok(())
    }

    pub async fn validate_account(&self, account_id: &str) -> Result<TokenValidation> {
        let account = self.account(account_id).await?;
        Ok(self.tokens.validate_token(&account).await)
    }

    /// Force an exchange of the account's stored token
    pub async fn exchange_account_token(&self, account_id: &str) -> Result<Credential> {
        let account = self.account(account_id).await?;
        let current = self
            .db
            .get_credential(&account.credential_ref)
            .await?
            .ok_or_else(|| MediacastError::NotFound(format!("Credential for {}", account_id)))?;
        let fresh = self
            .tokens
            .exchange_short_lived_token(&account, current)
            .await?;
        Ok(fresh.as_ref().clone())
    }

    /// Remove an account and its credential. Returns false if it did not exist.
    pub async fn remove_account(&self, account_id: &str) -> Result<bool> {
        if let Ok(account) = self.account(account_id).await {
            self.tokens.forget(&account);
        }
        self.db.remove_account(account_id).await
    }
}
