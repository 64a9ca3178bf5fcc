//! Token manager with per-account single-flight refresh
//!
//! Concurrent jobs for one account share a single in-flight exchange: the
//! first caller starts it as a [`Shared`] future and later callers await a
//! clone of it. The bookkeeping lock is released before anything is awaited,
//! and a successful exchange swaps the cached `Arc<Credential>` and the
//! stored record in one step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TokenConfig;
use crate::credentials::TokenAuthority;
use crate::error::TokenError;
use crate::store::AccountStore;
use crate::types::{Credential, PlatformAccount, PlatformKind, TokenKind, TokenValidation};

type SharedExchange = Shared<BoxFuture<'static, Result<Arc<Credential>, TokenError>>>;
type CredentialCache = Arc<RwLock<HashMap<String, Arc<Credential>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPolicy {
    pub grace_window: Duration,
    pub staleness_threshold: Duration,
    pub revalidate_after: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        TokenPolicy::from(&TokenConfig::default())
    }
}

impl From<&TokenConfig> for TokenPolicy {
    fn from(config: &TokenConfig) -> Self {
        Self {
            grace_window: config.grace_window,
            staleness_threshold: config.staleness_threshold,
            revalidate_after: config.revalidate_after,
        }
    }
}

pub struct TokenManager {
    store: Arc<dyn AccountStore>,
    authorities: HashMap<PlatformKind, Arc<dyn TokenAuthority>>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
    cache: CredentialCache,
    inflight: Mutex<HashMap<String, (u64, SharedExchange)>>,
    next_flight: AtomicU64,
}

impl TokenManager {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>, policy: TokenPolicy) -> Self {
        Self {
            store,
            authorities: HashMap::new(),
            clock,
            policy,
            cache: Arc::new(RwLock::new(HashMap::new())),
            inflight: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
        }
    }

    /// Register the exchange/introspection endpoints for a platform
    pub fn with_authority(mut self, kind: PlatformKind, authority: Arc<dyn TokenAuthority>) -> Self {
        self.authorities.insert(kind, authority);
        self
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Return a token valid for at least the grace window.
    ///
    /// Short-lived tokens and tokens inside the grace window are exchanged
    /// first when the platform offers a path to do so.
    ///
    /// # Errors
    ///
    /// - `TokenError::Missing` if the account has no stored credential
    /// - `TokenError::Expired` if the token is expiring and cannot be refreshed
    /// - `TokenError::ExchangeFailed` if the platform refused the exchange
    pub async fn get_valid_token(
        &self,
        account: &PlatformAccount,
    ) -> Result<Arc<Credential>, TokenError> {
        let current = self.current_credential(account).await?;
        let now = self.clock.now();

        if !self.needs_refresh(&current) {
            return Ok(current);
        }
        let expiring = current.expires_within(now, self.policy.grace_window);

        let authority = self
            .authorities
            .get(&account.kind)
            .filter(|authority| authority.can_exchange(&current, now))
            .cloned();

        match authority {
            Some(authority) => match self.refresh(account, current.clone(), authority).await {
                Ok(fresh) => Ok(fresh),
                Err(e) if !expiring => {
                    warn!(
                        "Exchange of short-lived token for {} failed, continuing with it: {}",
                        account.id, e
                    );
                    Ok(current)
                }
                Err(e) => Err(e),
            },
            None if expiring => Err(TokenError::Expired {
                account: account.id.clone(),
                expires_at: current.expires_at,
            }),
            None => Ok(current),
        }
    }

    /// Token for a job whose container already exists on the platform.
    ///
    /// Attempts the same refresh as [`get_valid_token`](Self::get_valid_token),
    /// but the grace window only gates new work: if the refresh is not
    /// possible the current token is used until it has actually expired.
    pub async fn token_for_in_flight_job(
        &self,
        account: &PlatformAccount,
    ) -> Result<Arc<Credential>, TokenError> {
        let error = match self.get_valid_token(account).await {
            Ok(credential) => return Ok(credential),
            Err(e) => e,
        };

        let current = self.current_credential(account).await?;
        if current.is_expired(self.clock.now()) {
            return Err(error);
        }
        debug!(
            "Continuing in-flight work for {} with token valid until {}: {}",
            account.id, current.expires_at, error
        );
        Ok(current)
    }

    /// Exchange a freshly obtained short-lived credential and store the result
    pub async fn exchange_short_lived_token(
        &self,
        account: &PlatformAccount,
        short_lived: Credential,
    ) -> Result<Arc<Credential>, TokenError> {
        let authority = self.authorities.get(&account.kind).ok_or_else(|| {
            TokenError::ExchangeFailed(format!(
                "No token exchange configured for {}",
                account.kind
            ))
        })?;

        let now = self.clock.now();
        info!("Exchanging short-lived token for account {}", account.id);
        let fresh = authority.exchange(&short_lived, now).await?;
        let fresh = self.replace(account, fresh).await?;
        Ok(fresh)
    }

    /// Store `credential` as the account's current credential
    pub async fn replace(
        &self,
        account: &PlatformAccount,
        credential: Credential,
    ) -> Result<Arc<Credential>, TokenError> {
        store_and_cache(
            self.store.as_ref(),
            &self.cache,
            &account.credential_ref,
            credential,
        )
        .await
    }

    /// Introspect the account's current token.
    ///
    /// Never fails and never changes stored state; anything that prevents
    /// a positive answer yields `valid = false`.
    pub async fn validate_token(&self, account: &PlatformAccount) -> TokenValidation {
        let current = match self.current_credential(account).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Cannot validate token for {}: {}", account.id, e);
                return TokenValidation::invalid();
            }
        };

        let now = self.clock.now();
        if current.is_expired(now) {
            return TokenValidation {
                valid: false,
                scopes: current.scopes.clone(),
                expires_at: Some(current.expires_at),
            };
        }

        match self.authorities.get(&account.kind) {
            Some(authority) => match authority.introspect(&current, now).await {
                Ok(validation) => validation,
                Err(e) => {
                    warn!("Token introspection for {} failed: {}", account.id, e);
                    TokenValidation::invalid()
                }
            },
            None => TokenValidation {
                valid: true,
                scopes: current.scopes.clone(),
                expires_at: Some(current.expires_at),
            },
        }
    }

    /// Token for a job about to start.
    ///
    /// Adds an introspection round trip when the token is older than the
    /// staleness threshold.
    pub async fn token_for_new_job(
        &self,
        account: &PlatformAccount,
    ) -> Result<Arc<Credential>, TokenError> {
        let credential = self.get_valid_token(account).await?;
        let now = self.clock.now();

        if credential.age(now) <= self.policy.staleness_threshold {
            return Ok(credential);
        }

        debug!(
            "Token for {} is {:?} old, introspecting before starting a job",
            account.id,
            credential.age(now)
        );
        let validation = self.validate_token(account).await;
        if validation.valid {
            Ok(credential)
        } else {
            Err(TokenError::Invalid(format!(
                "Token for account {} is no longer valid. Re-authenticate the account.",
                account.id
            )))
        }
    }

    /// Drop the cached credential so the next call reads the store
    pub fn forget(&self, account: &PlatformAccount) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&account.credential_ref);
    }

    fn needs_refresh(&self, credential: &Credential) -> bool {
        credential.kind == TokenKind::ShortLived
            || credential.expires_within(self.clock.now(), self.policy.grace_window)
    }

    async fn current_credential(
        &self,
        account: &PlatformAccount,
    ) -> Result<Arc<Credential>, TokenError> {
        let cached = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&account.credential_ref)
            .cloned();
        if let Some(credential) = cached {
            return Ok(credential);
        }

        let stored = self
            .store
            .get_credential(&account.credential_ref)
            .await
            .map_err(|e| TokenError::Store(e.to_string()))?
            .ok_or_else(|| TokenError::Missing(account.id.clone()))?;

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        Ok(cache
            .entry(account.credential_ref.clone())
            .or_insert_with(|| Arc::new(stored))
            .clone())
    }

    async fn refresh(
        &self,
        account: &PlatformAccount,
        current: Arc<Credential>,
        authority: Arc<dyn TokenAuthority>,
    ) -> Result<Arc<Credential>, TokenError> {
        let (flight_id, flight) = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());

            if let Some((id, flight)) = inflight.get(&account.id) {
                (*id, flight.clone())
            } else {
                // A flight that finished between our read and this lock
                // already left a fresh credential in the cache.
                let latest = self
                    .cache
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&account.credential_ref)
                    .cloned();
                if let Some(latest) = latest {
                    if !Arc::ptr_eq(&latest, &current) && !self.needs_refresh(&latest) {
                        return Ok(latest);
                    }
                }

                let id = self.next_flight.fetch_add(1, Ordering::SeqCst);
                let flight = exchange_and_store(
                    authority,
                    self.store.clone(),
                    self.cache.clone(),
                    account.clone(),
                    current,
                    self.clock.now(),
                )
                .boxed()
                .shared();
                inflight.insert(account.id.clone(), (id, flight.clone()));
                (id, flight)
            }
        };

        let result = flight.await;

        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(inflight.get(&account.id), Some((id, _)) if *id == flight_id) {
            inflight.remove(&account.id);
        }

        result
    }
}

async fn exchange_and_store(
    authority: Arc<dyn TokenAuthority>,
    store: Arc<dyn AccountStore>,
    cache: CredentialCache,
    account: PlatformAccount,
    current: Arc<Credential>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Arc<Credential>, TokenError> {
    info!("Refreshing token for account {}", account.id);
    let fresh = authority.exchange(&current, now).await.map_err(|e| {
        warn!("Token refresh for {} failed: {}", account.id, e);
        e
    })?;
    let fresh = store_and_cache(store.as_ref(), &cache, &account.credential_ref, fresh).await?;
    info!(
        "Token for account {} refreshed, valid until {}",
        account.id, fresh.expires_at
    );
    Ok(fresh)
}

async fn store_and_cache(
    store: &dyn AccountStore,
    cache: &CredentialCache,
    credential_ref: &str,
    credential: Credential,
) -> Result<Arc<Credential>, TokenError> {
    store
        .put_credential(credential_ref, &credential)
        .await
        .map_err(|e| TokenError::Store(e.to_string()))?;

    let credential = Arc::new(credential);
    cache
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(credential_ref.to_string(), credential.clone());
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::platforms::mock::MockPlatform;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};

    fn account() -> PlatformAccount {
        PlatformAccount::new(PlatformKind::Meta, "17841400000", "studio")
    }

    fn credential(clock: &ManualClock, kind: TokenKind, expires_in: ChronoDuration) -> Credential {
        let now = clock.now();
        Credential::new("stored-token", kind, now, now + expires_in)
    }

    fn manager(
        clock: Arc<ManualClock>,
        stored: Credential,
        mock: Arc<MockPlatform>,
    ) -> (TokenManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new().with_account(account(), stored));
        let manager = TokenManager::new(store.clone(), clock, TokenPolicy::default())
            .with_authority(PlatformKind::Meta, mock);
        (manager, store)
    }

    #[tokio::test]
    async fn test_fresh_long_lived_token_is_returned_as_is() {
        let clock = Arc::new(ManualClock::default());
        let mock = Arc::new(MockPlatform::new(PlatformKind::Meta));
        let stored = credential(&clock, TokenKind::LongLived, ChronoDuration::days(30));
        let (manager, _) = manager(clock, stored, mock.clone());

        let token = manager.get_valid_token(&account()).await.unwrap();
        assert_eq!(token.token(), "stored-token");
        assert_eq!(mock.calls().exchange, 0);
    }

    #[tokio::test]
    async fn test_token_inside_grace_window_is_exchanged() {
        let clock = Arc::new(ManualClock::default());
        let mock = Arc::new(MockPlatform::new(PlatformKind::Meta));
        let stored = credential(&clock, TokenKind::LongLived, ChronoDuration::minutes(2));
        let (manager, store) = manager(clock.clone(), stored, mock.clone());

        let token = manager.get_valid_token(&account()).await.unwrap();

        assert_eq!(mock.calls().exchange, 1);
        assert_ne!(token.token(), "stored-token");
        assert!(!token.expires_within(clock.now(), Duration::from_secs(300)));

        // The store sees the replacement too
        let persisted = store
            .get_credential(&account().credential_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.token(), token.token());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_exchange() {
        let clock = Arc::new(ManualClock::default());
        let mock = Arc::new(
            MockPlatform::new(PlatformKind::Meta)
                .with_exchange_delay(std::time::Duration::from_millis(50)),
        );
        let stored = credential(&clock, TokenKind::ShortLived, ChronoDuration::hours(1));
        let (manager, _) = manager(clock, stored, mock.clone());
        let manager = Arc::new(manager);

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_valid_token(&account()).await })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let tokens: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap().token().to_string())
            .collect();

        assert_eq!(mock.calls().exchange, 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test]
    async fn test_exchange_failure_propagates_platform_message() {
        let clock = Arc::new(ManualClock::default());
        let mock = Arc::new(MockPlatform::new(PlatformKind::Meta).fail_exchange(
            TokenError::ExchangeFailed("Error validating access token".to_string()),
        ));
        let stored = credential(&clock, TokenKind::LongLived, ChronoDuration::minutes(1));
        let (manager, _) = manager(clock, stored, mock);

        let err = manager.get_valid_token(&account()).await.unwrap_err();
        assert_eq!(
            err,
            TokenError::ExchangeFailed("Error validating access token".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_exchange_of_usable_short_lived_token_falls_back() {
        let clock = Arc::new(ManualClock::default());
        let mock = Arc::new(
            MockPlatform::new(PlatformKind::Meta)
                .fail_exchange(TokenError::ExchangeFailed("unavailable".to_string())),
        );
        let stored = credential(&clock, TokenKind::ShortLived, ChronoDuration::hours(1));
        let (manager, _) = manager(clock, stored, mock);

        let token = manager.get_valid_token(&account()).await.unwrap();
        assert_eq!(token.token(), "stored-token");
    }

    #[tokio::test]
    async fn test_expiring_token_without_authority_is_an_error() {
        let clock = Arc::new(ManualClock::default());
        let stored = credential(&clock, TokenKind::LongLived, ChronoDuration::minutes(1));
        let store = Arc::new(MemoryStore::new().with_account(account(), stored));
        let manager = TokenManager::new(store, clock, TokenPolicy::default());

        let err = manager.get_valid_token(&account()).await.unwrap_err();
        assert!(matches!(err, TokenError::Expired { .. }));
    }

    #[tokio::test]
    async fn test_in_flight_job_keeps_token_until_it_expires() {
        let clock = Arc::new(ManualClock::default());
        let stored = credential(&clock, TokenKind::LongLived, ChronoDuration::minutes(3));
        let store = Arc::new(MemoryStore::new().with_account(account(), stored));
        let manager = TokenManager::new(store, clock.clone(), TokenPolicy::default());

        // Inside the grace window and nothing can refresh it
        assert!(matches!(
            manager.get_valid_token(&account()).await,
            Err(TokenError::Expired { .. })
        ));
        let token = manager.token_for_in_flight_job(&account()).await.unwrap();
        assert_eq!(token.token(), "stored-token");

        clock.advance(Duration::from_secs(3 * 60));
        let err = manager.token_for_in_flight_job(&account()).await.unwrap_err();
        assert!(matches!(err, TokenError::Expired { .. }));
    }

    #[tokio::test]
    async fn test_in_flight_job_prefers_refreshed_token() {
        let clock = Arc::new(ManualClock::default());
        let mock = Arc::new(MockPlatform::new(PlatformKind::Meta));
        let stored = credential(&clock, TokenKind::LongLived, ChronoDuration::minutes(3));
        let (manager, _) = manager(clock, stored, mock.clone());

        let token = manager.token_for_in_flight_job(&account()).await.unwrap();
        assert_eq!(token.token(), "exchanged-token-1");
        assert_eq!(mock.calls().exchange, 1);
    }

    #[tokio::test]
    async fn test_in_flight_job_without_credential() {
        let clock = Arc::new(ManualClock::default());
        let manager = TokenManager::new(Arc::new(MemoryStore::new()), clock, TokenPolicy::default());

        let err = manager.token_for_in_flight_job(&account()).await.unwrap_err();
        assert_eq!(err, TokenError::Missing(account().id));
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let manager = TokenManager::new(store, clock, TokenPolicy::default());

        let err = manager.get_valid_token(&account()).await.unwrap_err();
        assert_eq!(err, TokenError::Missing(account().id));
    }

    #[tokio::test]
    async fn test_validate_token_reports_invalid_without_mutation() {
        let clock = Arc::new(ManualClock::default());
        let mock = Arc::new(MockPlatform::new(PlatformKind::Meta).with_introspection(false));
        let stored = credential(&clock, TokenKind::LongLived, ChronoDuration::days(30));
        let (manager, store) = manager(clock, stored, mock.clone());

        let validation = manager.validate_token(&account()).await;
        assert!(!validation.valid);
        assert_eq!(mock.calls().introspect, 1);
        assert_eq!(mock.calls().exchange, 0);

        let persisted = store
            .get_credential(&account().credential_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.token(), "stored-token");
    }

    #[tokio::test]
    async fn test_validate_token_without_credential_is_invalid() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let manager = TokenManager::new(store, clock, TokenPolicy::default());

        assert_eq!(
            manager.validate_token(&account()).await,
            TokenValidation::invalid()
        );
    }

    #[tokio::test]
    async fn test_stale_token_is_introspected_before_new_job() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mock = Arc::new(MockPlatform::new(PlatformKind::Meta).with_introspection(false));
        let stored = credential(&clock, TokenKind::LongLived, ChronoDuration::days(30));
        let (manager, _) = manager(clock.clone(), stored, mock.clone());

        // Young token: no introspection
        manager.token_for_new_job(&account()).await.unwrap();
        assert_eq!(mock.calls().introspect, 0);

        clock.advance(Duration::from_secs(2 * 24 * 60 * 60));
        let err = manager.token_for_new_job(&account()).await.unwrap_err();
        assert!(matches!(err, TokenError::Invalid(_)));
        assert_eq!(mock.calls().introspect, 1);
    }

    #[tokio::test]
    async fn test_exchange_short_lived_token_stores_result() {
        let clock = Arc::new(ManualClock::default());
        let mock = Arc::new(MockPlatform::new(PlatformKind::Meta));
        let stored = credential(&clock, TokenKind::LongLived, ChronoDuration::days(30));
        let (manager, store) = manager(clock.clone(), stored, mock.clone());

        let short = credential(&clock, TokenKind::ShortLived, ChronoDuration::hours(1));
        let long = manager
            .exchange_short_lived_token(&account(), short)
            .await
            .unwrap();

        assert_eq!(long.kind, TokenKind::LongLived);
        assert_eq!(mock.calls().exchange, 1);
        let persisted = store
            .get_credential(&account().credential_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.token(), long.token());
    }
}
