//! Scriptable mock platform
//!
//! Plays back queued status codes and failures so workflow, scheduler and
//! token tests can exercise every path without network access. Queues fall
//! back to success once drained: creates succeed, statuses report FINISHED,
//! exchanges return a fresh long-lived token.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;

use crate::credentials::TokenAuthority;
use crate::error::{PlatformError, TokenError};
use crate::platforms::PlatformClient;
use crate::types::{
    ContainerRef, ContainerStatus, Credential, FormatOptions, MediaContainer, MediaSpec, Metric,
    PlatformAccount, PlatformKind, PlatformMetrics, PublishFormat, PublishedPost, TokenKind,
    TokenValidation,
};

/// Counts of calls made against the mock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub create: u32,
    pub check: u32,
    pub finalize: u32,
    /// Finalize calls that produced a new post
    pub published: u32,
    pub delete: u32,
    pub insights: u32,
    pub list_accounts: u32,
    pub exchange: u32,
    pub introspect: u32,
}

type StatusStep = Result<(ContainerStatus, Option<String>), PlatformError>;

#[derive(Default)]
struct MockState {
    create_errors: VecDeque<PlatformError>,
    statuses: VecDeque<StatusStep>,
    finalize_errors: VecDeque<PlatformError>,
    exchange_errors: VecDeque<TokenError>,
    next_post_ids: VecDeque<String>,
    published: HashMap<String, PublishedPost>,
    tokens_seen: Vec<String>,
    calls: MockCalls,
}

pub struct MockPlatform {
    kind: PlatformKind,
    exchange_delay: Duration,
    exchange_lifetime: chrono::Duration,
    introspection_valid: bool,
    insights: BTreeMap<String, f64>,
    accounts: Vec<PlatformAccount>,
    state: Mutex<MockState>,
}

static MOCK_ALIASES: &[(&str, Metric)] = &[
    ("plays", Metric::Plays),
    ("views", Metric::Views),
    ("impressions", Metric::Impressions),
    ("reach", Metric::Reach),
    ("likes", Metric::Likes),
    ("comments", Metric::Comments),
    ("shares", Metric::Shares),
    ("saves", Metric::Saves),
    ("watch_time_minutes", Metric::WatchTimeMinutes),
    ("engagement", Metric::Engagement),
];

impl MockPlatform {
    pub fn new(kind: PlatformKind) -> Self {
        Self {
            kind,
            exchange_delay: Duration::ZERO,
            exchange_lifetime: chrono::Duration::days(60),
            introspection_valid: true,
            insights: BTreeMap::new(),
            accounts: Vec::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Queue status codes returned by successive `check_status` calls
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = ContainerStatus>) -> Self {
        self.state
            .lock()
            .unwrap()
            .statuses
            .extend(statuses.into_iter().map(|status| Ok((status, None))));
        self
    }

    /// Queue a terminal ERROR status with the platform's detail text
    pub fn with_error_status(self, detail: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .statuses
            .push_back(Ok((ContainerStatus::Error, Some(detail.to_string()))));
        self
    }

    /// Queue a failed status check
    pub fn with_status_failure(self, error: PlatformError) -> Self {
        self.state.lock().unwrap().statuses.push_back(Err(error));
        self
    }

    /// Queue failures for successive `create_container` calls
    pub fn fail_create(self, errors: impl IntoIterator<Item = PlatformError>) -> Self {
        self.state.lock().unwrap().create_errors.extend(errors);
        self
    }

    pub fn fail_finalize(self, errors: impl IntoIterator<Item = PlatformError>) -> Self {
        self.state.lock().unwrap().finalize_errors.extend(errors);
        self
    }

    pub fn fail_exchange(self, error: TokenError) -> Self {
        self.state.lock().unwrap().exchange_errors.push_back(error);
        self
    }

    /// Post id used by the next successful finalize
    pub fn with_post_id(self, post_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .next_post_ids
            .push_back(post_id.to_string());
        self
    }

    pub fn with_exchange_delay(mut self, delay: Duration) -> Self {
        self.exchange_delay = delay;
        self
    }

    pub fn with_introspection(mut self, valid: bool) -> Self {
        self.introspection_valid = valid;
        self
    }

    pub fn with_insights(mut self, values: &[(&str, f64)]) -> Self {
        self.insights = values
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        self
    }

    pub fn with_accounts(mut self, accounts: Vec<PlatformAccount>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn calls(&self) -> MockCalls {
        self.state.lock().unwrap().calls
    }

    /// Access tokens presented to platform calls, in call order
    pub fn tokens_seen(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens_seen.clone()
    }

    fn record_token(state: &mut MockState, credential: &Credential) {
        state.tokens_seen.push(credential.token().to_string());
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    async fn create_container(
        &self,
        credential: &Credential,
        account: &PlatformAccount,
        _media: &MediaSpec,
        _caption: &str,
        _format: PublishFormat,
        _options: &FormatOptions,
    ) -> Result<ContainerRef, PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.calls.create += 1;
        Self::record_token(&mut state, credential);

        if let Some(error) = state.create_errors.pop_front() {
            return Err(error);
        }

        Ok(ContainerRef {
            container_id: format!("container-{}", state.calls.create),
            platform: self.kind,
            account_id: account.id.clone(),
            owner_id: account.platform_account_id.clone(),
            created_at: Utc::now(),
        })
    }

    async fn check_status(
        &self,
        credential: &Credential,
        container: &ContainerRef,
    ) -> Result<MediaContainer, PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.calls.check += 1;
        Self::record_token(&mut state, credential);

        let step = state
            .statuses
            .pop_front()
            .unwrap_or(Ok((ContainerStatus::Finished, None)));
        let (status, status_detail) = step?;

        Ok(MediaContainer {
            container_id: container.container_id.clone(),
            status,
            status_detail,
            created_at: container.created_at,
        })
    }

    async fn finalize(
        &self,
        credential: &Credential,
        container: &ContainerRef,
        _options: &FormatOptions,
    ) -> Result<PublishedPost, PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.calls.finalize += 1;
        Self::record_token(&mut state, credential);

        if let Some(post) = state.published.get(&container.container_id) {
            return Ok(post.clone());
        }
        if let Some(error) = state.finalize_errors.pop_front() {
            return Err(error);
        }

        let post_id = state
            .next_post_ids
            .pop_front()
            .unwrap_or_else(|| format!("post-{}", container.container_id));
        let post = PublishedPost {
            post_url: Some(format!("https://mock.example/p/{}", post_id)),
            post_id,
        };
        state.calls.published += 1;
        state
            .published
            .insert(container.container_id.clone(), post.clone());
        Ok(post)
    }

    async fn delete_post(&self, credential: &Credential, post_id: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.calls.delete += 1;
        Self::record_token(&mut state, credential);

        let before = state.published.len();
        state.published.retain(|_, post| post.post_id != post_id);
        if state.published.len() == before {
            return Err(PlatformError::Rejected(format!(
                "Object with ID '{}' does not exist",
                post_id
            )));
        }
        Ok(())
    }

    async fn fetch_insights(
        &self,
        credential: &Credential,
        post_id: &str,
    ) -> Result<PlatformMetrics, PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.calls.insights += 1;
        Self::record_token(&mut state, credential);

        Ok(PlatformMetrics {
            post_id: post_id.to_string(),
            values: self.insights.clone(),
        })
    }

    async fn list_accounts(
        &self,
        credential: &Credential,
    ) -> Result<Vec<PlatformAccount>, PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.calls.list_accounts += 1;
        Self::record_token(&mut state, credential);
        Ok(self.accounts.clone())
    }

    fn metric_aliases(&self) -> &'static [(&'static str, Metric)] {
        MOCK_ALIASES
    }
}

#[async_trait]
impl TokenAuthority for MockPlatform {
    fn can_exchange(&self, _credential: &Credential, _now: DateTime<Utc>) -> bool {
        true
    }

    async fn exchange(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<Credential, TokenError> {
        let (count, failure) = {
            let mut state = self.state.lock().unwrap();
            state.calls.exchange += 1;
            (state.calls.exchange, state.exchange_errors.pop_front())
        };

        if !self.exchange_delay.is_zero() {
            sleep(self.exchange_delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let mut fresh = Credential::new(
            format!("exchanged-token-{}", count),
            TokenKind::LongLived,
            now,
            now + self.exchange_lifetime,
        )
        .with_scopes(credential.scopes.clone());
        if let Some(refresh) = credential.refresh_token() {
            fresh = fresh.with_refresh_token(refresh);
        }
        Ok(fresh)
    }

    async fn introspect(
        &self,
        credential: &Credential,
        _now: DateTime<Utc>,
    ) -> Result<TokenValidation, TokenError> {
        self.state.lock().unwrap().calls.introspect += 1;
        if !self.introspection_valid {
            return Ok(TokenValidation::invalid());
        }
        Ok(TokenValidation {
            valid: true,
            scopes: credential.scopes.clone(),
            expires_at: Some(credential.expires_at),
        })
    }
}
