//! Meta Graph API adapter (Instagram professional accounts)
//!
//! Publishing is the Graph API container flow:
//!
//! 1. `POST /{ig-user-id}/media` creates a media container from a public URL
//! 2. `GET /{container-id}?fields=status_code,status` reports processing
//! 3. `POST /{ig-user-id}/media_publish` turns a FINISHED container into a post
//!
//! The access token travels as the `access_token` query parameter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::MetaConfig;
use crate::credentials::TokenAuthority;
use crate::error::{PlatformError, TokenError};
use crate::platforms::http::{is_transient_status, read_json, transport_error, truncate};
use crate::platforms::PlatformClient;
use crate::types::{
    ContainerRef, ContainerStatus, Credential, FormatOptions, MediaContainer, MediaSpec,
    MediaType, Metric, PlatformAccount, PlatformKind, PlatformMetrics, PublishFormat,
    PublishedPost, TokenKind, TokenValidation,
};

const PLATFORM: &str = "Meta";

/// Instagram rejects longer captions
pub const CAPTION_LIMIT: usize = 2200;

/// Long-lived user tokens last about 60 days when the response omits `expires_in`
const DEFAULT_LONG_LIVED_SECS: i64 = 60 * 24 * 60 * 60;

const INSIGHT_METRICS: &str = "views,reach,likes,comments,shares,saved,total_interactions";

const MAX_ACCOUNT_PAGES: usize = 10;

static META_ALIASES: &[(&str, Metric)] = &[
    ("plays", Metric::Plays),
    ("ig_reels_aggregated_all_plays_count", Metric::Plays),
    ("views", Metric::Views),
    ("video_views", Metric::Views),
    ("impressions", Metric::Impressions),
    ("reach", Metric::Reach),
    ("likes", Metric::Likes),
    ("comments", Metric::Comments),
    ("shares", Metric::Shares),
    ("saved", Metric::Saves),
    ("total_interactions", Metric::Engagement),
];

pub struct MetaClient {
    http: Client,
    graph_url: String,
    api_version: String,
    app_id: Option<String>,
    app_secret: Option<SecretString>,
    /// Posts created by this client, keyed by container id
    published: Mutex<HashMap<String, PublishedPost>>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
    code: Option<i64>,
    is_transient: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContainerStatusResponse {
    status_code: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    permalink: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecentMediaResponse {
    #[serde(default)]
    data: Vec<RecentMedia>,
}

#[derive(Debug, Deserialize)]
struct RecentMedia {
    id: String,
    permalink: Option<String>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    #[serde(default)]
    data: Vec<InsightEntry>,
}

#[derive(Debug, Deserialize)]
struct InsightEntry {
    name: String,
    #[serde(default)]
    values: Vec<InsightValue>,
    total_value: Option<InsightValue>,
}

#[derive(Debug, Deserialize)]
struct InsightValue {
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    #[serde(default)]
    data: Vec<PageEntry>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    name: Option<String>,
    instagram_business_account: Option<InstagramAccount>,
}

#[derive(Debug, Deserialize)]
struct InstagramAccount {
    id: String,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DebugTokenResponse {
    data: DebugTokenData,
}

#[derive(Debug, Deserialize)]
struct DebugTokenData {
    is_valid: bool,
    #[serde(default)]
    scopes: Vec<String>,
    expires_at: Option<i64>,
}

/// Classify a Graph API error response.
///
/// Rejections carry the platform's message unchanged.
pub fn map_graph_error(status: StatusCode, body: &str, context: &str) -> PlatformError {
    let parsed = serde_json::from_str::<GraphErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);

    let message = parsed
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), truncate(body.trim(), 200)));
    let code = parsed.as_ref().and_then(|e| e.code);
    let flagged_transient = parsed.as_ref().and_then(|e| e.is_transient) == Some(true);

    match code {
        Some(190) | Some(102) => {
            return PlatformError::Authentication(format!(
                "{} {}: {}. Suggestion: reconnect the account to obtain a new token.",
                PLATFORM, context, message
            ))
        }
        Some(4) | Some(17) | Some(32) | Some(613) | Some(80001..=80014) => {
            return PlatformError::RateLimit(format!("{} {}: {}", PLATFORM, context, message))
        }
        Some(1) | Some(2) => {
            return PlatformError::Network(format!("{} {}: {}", PLATFORM, context, message))
        }
        _ => {}
    }

    if flagged_transient || is_transient_status(status) {
        PlatformError::Network(format!("{} {}: {}", PLATFORM, context, message))
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        PlatformError::RateLimit(format!("{} {}: {}", PLATFORM, context, message))
    } else if status == StatusCode::UNAUTHORIZED {
        PlatformError::Authentication(format!("{} {}: {}", PLATFORM, context, message))
    } else {
        PlatformError::Rejected(message)
    }
}

fn map_status_code(code: &str) -> Option<ContainerStatus> {
    match code {
        "IN_PROGRESS" => Some(ContainerStatus::Processing),
        "FINISHED" | "PUBLISHED" => Some(ContainerStatus::Finished),
        "ERROR" | "EXPIRED" => Some(ContainerStatus::Error),
        _ => None,
    }
}

/// Graph timestamps look like `2026-03-01T12:00:05+0000`
fn parse_graph_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn insight_number(value: &serde_json::Value) -> Option<f64> {
    value.as_f64()
}

impl MetaClient {
    pub fn new(http: Client, config: &MetaConfig) -> Self {
        Self {
            http,
            graph_url: config.graph_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret(),
            published: Mutex::new(HashMap::new()),
        }
    }

    /// Set the app credentials used for token exchange and introspection
    pub fn with_app_credentials(mut self, app_id: &str, app_secret: &str) -> Self {
        self.app_id = Some(app_id.to_string());
        self.app_secret = Some(SecretString::from(app_secret.to_string()));
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.graph_url,
            self.api_version,
            path.trim_start_matches('/')
        )
    }

    fn app_credentials(&self) -> Option<(&str, &str)> {
        match (&self.app_id, &self.app_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.expose_secret())),
            _ => None,
        }
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response, PlatformError> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, context, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!("{} {} failed with {}: {}", PLATFORM, context, status, body);
        Err(map_graph_error(status, &body, context))
    }

    async fn fetch_status(
        &self,
        credential: &Credential,
        container_id: &str,
    ) -> Result<ContainerStatusResponse, PlatformError> {
        let request = self
            .http
            .get(self.endpoint(container_id))
            .query(&[
                ("fields", "status_code,status"),
                ("access_token", credential.token()),
            ]);
        let response = self.send(request, "container status").await?;
        read_json(PLATFORM, "container status", response).await
    }

    async fn fetch_permalink(&self, credential: &Credential, media_id: &str) -> Option<String> {
        let request = self
            .http
            .get(self.endpoint(media_id))
            .query(&[("fields", "permalink"), ("access_token", credential.token())]);

        let result = match self.send(request, "permalink").await {
            Ok(response) => read_json::<PermalinkResponse>(PLATFORM, "permalink", response).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(body) => body.permalink,
            Err(e) => {
                debug!("Could not fetch permalink for {}: {}", media_id, e);
                None
            }
        }
    }

    /// Newest post on the account if it appeared after `container` was created.
    ///
    /// A published container does not expose the id of its post, so this is
    /// how a post published by an earlier process is recovered.
    async fn find_post_for_published(
        &self,
        credential: &Credential,
        container: &ContainerRef,
    ) -> Option<PublishedPost> {
        let request = self
            .http
            .get(self.endpoint(&format!("{}/media", container.owner_id)))
            .query(&[
                ("fields", "id,permalink,timestamp"),
                ("limit", "1"),
                ("access_token", credential.token()),
            ]);

        let result = match self.send(request, "recent media").await {
            Ok(response) => {
                read_json::<RecentMediaResponse>(PLATFORM, "recent media", response).await
            }
            Err(e) => Err(e),
        };
        let newest = match result {
            Ok(body) => body.data.into_iter().next()?,
            Err(e) => {
                debug!("Could not list recent media for {}: {}", container.owner_id, e);
                return None;
            }
        };

        let posted_at = newest.timestamp.as_deref().and_then(parse_graph_timestamp)?;
        if posted_at < container.created_at {
            debug!(
                "Newest media {} predates container {}",
                newest.id, container.container_id
            );
            return None;
        }
        Some(PublishedPost {
            post_id: newest.id,
            post_url: newest.permalink,
        })
    }

    fn container_params(
        media: &MediaSpec,
        caption: &str,
        format: PublishFormat,
        options: &FormatOptions,
    ) -> Result<Vec<(&'static str, String)>, PlatformError> {
        if caption.chars().count() > CAPTION_LIMIT {
            return Err(PlatformError::Rejected(format!(
                "Caption is {} characters; Instagram allows at most {}",
                caption.chars().count(),
                CAPTION_LIMIT
            )));
        }

        let mut params: Vec<(&'static str, String)> = Vec::new();
        match (format, media.media_type) {
            (PublishFormat::Reel, MediaType::Video) => {
                params.push(("media_type", "REELS".to_string()));
                params.push(("video_url", media.url.clone()));
                if let Some(share) = options.share_to_feed {
                    params.push(("share_to_feed", share.to_string()));
                }
            }
            (PublishFormat::Feed, MediaType::Video) => {
                // Feed videos are published as reels shared to the feed
                params.push(("media_type", "REELS".to_string()));
                params.push(("video_url", media.url.clone()));
                params.push(("share_to_feed", "true".to_string()));
            }
            (PublishFormat::Feed, MediaType::Image) => {
                params.push(("image_url", media.url.clone()));
            }
            (PublishFormat::Story, MediaType::Video) => {
                params.push(("media_type", "STORIES".to_string()));
                params.push(("video_url", media.url.clone()));
            }
            (PublishFormat::Story, MediaType::Image) => {
                params.push(("media_type", "STORIES".to_string()));
                params.push(("image_url", media.url.clone()));
            }
            (PublishFormat::Reel, MediaType::Image) => {
                return Err(PlatformError::NotSupported(
                    "Reels require video media".to_string(),
                ))
            }
            (other, _) => {
                return Err(PlatformError::NotSupported(format!(
                    "'{}' is not an Instagram publishing format",
                    other
                )))
            }
        }

        if format != PublishFormat::Story && !caption.is_empty() {
            params.push(("caption", caption.to_string()));
        }
        if media.media_type == MediaType::Video {
            if let Some(offset) = options.thumb_offset_ms {
                params.push(("thumb_offset", offset.to_string()));
            }
        }
        Ok(params)
    }

    fn lookup_published(&self, container_id: &str) -> Option<PublishedPost> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(container_id)
            .cloned()
    }

    fn remember_published(&self, container_id: &str, post: &PublishedPost) {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(container_id.to_string(), post.clone());
    }
}

#[async_trait]
impl PlatformClient for MetaClient {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Meta
    }

    async fn create_container(
        &self,
        credential: &Credential,
        account: &PlatformAccount,
        media: &MediaSpec,
        caption: &str,
        format: PublishFormat,
        options: &FormatOptions,
    ) -> Result<ContainerRef, PlatformError> {
        let params = Self::container_params(media, caption, format, options)?;

        let request = self
            .http
            .post(self.endpoint(&format!("{}/media", account.platform_account_id)))
            .query(&[("access_token", credential.token())])
            .form(&params);
        let response = self.send(request, "create container").await?;
        let created: IdResponse = read_json(PLATFORM, "create container", response).await?;

        info!(
            "Created Meta container {} for account {}",
            created.id, account.id
        );
        Ok(ContainerRef {
            container_id: created.id,
            platform: PlatformKind::Meta,
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
        let body = self.fetch_status(credential, &container.container_id).await?;

        let code = body.status_code.ok_or_else(|| {
            PlatformError::MalformedResponse(format!(
                "{} container {} has no status_code",
                PLATFORM, container.container_id
            ))
        })?;
        let status = map_status_code(&code).ok_or_else(|| {
            PlatformError::MalformedResponse(format!(
                "{} returned unknown status_code '{}'",
                PLATFORM, code
            ))
        })?;

        let status_detail = match (status, body.status) {
            (ContainerStatus::Error, None) if code == "EXPIRED" => {
                Some("Container expired before it was published".to_string())
            }
            (_, detail) => detail,
        };

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
        if let Some(post) = self.lookup_published(&container.container_id) {
            debug!(
                "Container {} already published as {}",
                container.container_id, post.post_id
            );
            return Ok(post);
        }

        // A previous process may have published before crashing
        let current = self.fetch_status(credential, &container.container_id).await?;
        if current.status_code.as_deref() == Some("PUBLISHED") {
            return match self.find_post_for_published(credential, container).await {
                Some(post) => {
                    info!(
                        "Meta container {} was already published as {}",
                        container.container_id, post.post_id
                    );
                    self.remember_published(&container.container_id, &post);
                    Ok(post)
                }
                None => Err(PlatformError::AlreadyPublished {
                    container_id: container.container_id.clone(),
                    post_id: None,
                }),
            };
        }

        let request = self
            .http
            .post(self.endpoint(&format!("{}/media_publish", container.owner_id)))
            .query(&[("access_token", credential.token())])
            .form(&[("creation_id", container.container_id.as_str())]);
        let response = self.send(request, "publish").await?;
        let published: IdResponse = read_json(PLATFORM, "publish", response).await?;

        let post = PublishedPost {
            post_url: self.fetch_permalink(credential, &published.id).await,
            post_id: published.id,
        };
        self.remember_published(&container.container_id, &post);
        info!(
            "Published Meta container {} as {}",
            container.container_id, post.post_id
        );
        Ok(post)
    }

    async fn delete_post(&self, credential: &Credential, post_id: &str) -> Result<(), PlatformError> {
        let request = self
            .http
            .delete(self.endpoint(post_id))
            .query(&[("access_token", credential.token())]);
        let response = self.send(request, "delete").await?;
        let body: SuccessResponse = read_json(PLATFORM, "delete", response).await?;

        if body.success {
            Ok(())
        } else {
            Err(PlatformError::Rejected(format!(
                "Meta did not delete media {}",
                post_id
            )))
        }
    }

    async fn fetch_insights(
        &self,
        credential: &Credential,
        post_id: &str,
    ) -> Result<PlatformMetrics, PlatformError> {
        let request = self
            .http
            .get(self.endpoint(&format!("{}/insights", post_id)))
            .query(&[("metric", INSIGHT_METRICS), ("access_token", credential.token())]);
        let response = self.send(request, "insights").await?;
        let body: InsightsResponse = read_json(PLATFORM, "insights", response).await?;

        let mut values = BTreeMap::new();
        for entry in body.data {
            let value = entry
                .total_value
                .as_ref()
                .and_then(|v| insight_number(&v.value))
                .or_else(|| entry.values.first().and_then(|v| insight_number(&v.value)));
            if let Some(value) = value {
                values.insert(entry.name, value);
            }
        }

        Ok(PlatformMetrics {
            post_id: post_id.to_string(),
            values,
        })
    }

    async fn list_accounts(
        &self,
        credential: &Credential,
    ) -> Result<Vec<PlatformAccount>, PlatformError> {
        let mut accounts = Vec::new();
        let mut request = self.http.get(self.endpoint("me/accounts")).query(&[
            ("fields", "name,instagram_business_account{id,username}"),
            ("access_token", credential.token()),
        ]);

        for _ in 0..MAX_ACCOUNT_PAGES {
            let response = self.send(request, "account discovery").await?;
            let page: PagesResponse = read_json(PLATFORM, "account discovery", response).await?;

            for entry in page.data {
                if let Some(ig) = entry.instagram_business_account {
                    let display_name = ig
                        .username
                        .or(entry.name)
                        .unwrap_or_else(|| ig.id.clone());
                    accounts.push(PlatformAccount::new(PlatformKind::Meta, ig.id, display_name));
                }
            }

            match page.paging.and_then(|p| p.next) {
                Some(next) => request = self.http.get(next),
                None => break,
            }
        }

        Ok(accounts)
    }

    fn metric_aliases(&self) -> &'static [(&'static str, Metric)] {
        META_ALIASES
    }
}

fn exchange_failure(status: StatusCode, body: &str) -> TokenError {
    match serde_json::from_str::<GraphErrorEnvelope>(body) {
        Ok(envelope) => TokenError::ExchangeFailed(envelope.error.message),
        Err(_) => TokenError::ExchangeFailed(format!(
            "HTTP {}: {}",
            status.as_u16(),
            truncate(body.trim(), 200)
        )),
    }
}

#[async_trait]
impl TokenAuthority for MetaClient {
    fn can_exchange(&self, credential: &Credential, now: DateTime<Utc>) -> bool {
        self.app_credentials().is_some() && !credential.is_expired(now)
    }

    async fn exchange(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<Credential, TokenError> {
        let (app_id, app_secret) = self.app_credentials().ok_or_else(|| {
            TokenError::ExchangeFailed("Meta app id and secret are not configured".to_string())
        })?;

        let response = self
            .http
            .get(self.endpoint("oauth/access_token"))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", app_id),
                ("client_secret", app_secret),
                ("fb_exchange_token", credential.token()),
            ])
            .send()
            .await
            .map_err(|e| TokenError::ExchangeFailed(format!("Meta token exchange: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::ExchangeFailed(format!("Meta token exchange: {}", e)))?;
        if !status.is_success() {
            return Err(exchange_failure(status, &body));
        }

        let exchanged: ExchangeResponse = serde_json::from_str(&body).map_err(|e| {
            TokenError::ExchangeFailed(format!("Meta token exchange returned {}: {}", e, body))
        })?;
        let lifetime = exchanged.expires_in.unwrap_or(DEFAULT_LONG_LIVED_SECS);

        Ok(Credential::new(
            exchanged.access_token,
            TokenKind::LongLived,
            now,
            now + chrono::Duration::seconds(lifetime),
        )
        .with_scopes(credential.scopes.clone()))
    }

    async fn introspect(
        &self,
        credential: &Credential,
        _now: DateTime<Utc>,
    ) -> Result<TokenValidation, TokenError> {
        let Some((app_id, app_secret)) = self.app_credentials() else {
            // Without app credentials the best check is whether the token still reads /me
            let request = self
                .http
                .get(self.endpoint("me"))
                .query(&[("fields", "id"), ("access_token", credential.token())]);
            let valid = self.send(request, "token check").await.is_ok();
            return Ok(TokenValidation {
                valid,
                scopes: credential.scopes.clone(),
                expires_at: Some(credential.expires_at),
            });
        };

        let app_token = format!("{}|{}", app_id, app_secret);
        let request = self.http.get(self.endpoint("debug_token")).query(&[
            ("input_token", credential.token()),
            ("access_token", app_token.as_str()),
        ]);
        let response = self
            .send(request, "debug_token")
            .await
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        let body: DebugTokenResponse = read_json(PLATFORM, "debug_token", response)
            .await
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        let expires_at = match body.data.expires_at {
            Some(0) | None => None,
            Some(secs) => Utc.timestamp_opt(secs, 0).single(),
        };
        Ok(TokenValidation {
            valid: body.data.is_valid,
            scopes: body.data.scopes,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_token_maps_to_authentication() {
        let body = r#"{"error":{"message":"Error validating access token: Session has expired","type":"OAuthException","code":190,"error_subcode":463}}"#;
        let error = map_graph_error(StatusCode::BAD_REQUEST, body, "create container");
        assert!(matches!(error, PlatformError::Authentication(_)));
        assert!(error.to_string().contains("Session has expired"));
    }

    #[test]
    fn test_application_rejection_is_verbatim() {
        let body = r#"{"error":{"message":"The video file you selected is in a format that we don't support.","type":"OAuthException","code":352}}"#;
        let error = map_graph_error(StatusCode::BAD_REQUEST, body, "create container");
        assert_eq!(
            error,
            PlatformError::Rejected(
                "The video file you selected is in a format that we don't support.".to_string()
            )
        );
    }

    #[test]
    fn test_throttling_codes_map_to_rate_limit() {
        let body = r#"{"error":{"message":"Application request limit reached","code":4}}"#;
        assert!(matches!(
            map_graph_error(StatusCode::BAD_REQUEST, body, "status"),
            PlatformError::RateLimit(_)
        ));

        let body = r#"{"error":{"message":"Too many calls","code":80002}}"#;
        assert!(matches!(
            map_graph_error(StatusCode::BAD_REQUEST, body, "status"),
            PlatformError::RateLimit(_)
        ));
    }

    #[test]
    fn test_transient_flag_and_server_errors_are_network() {
        let body = r#"{"error":{"message":"An unexpected error has occurred","code":2,"is_transient":true}}"#;
        assert!(map_graph_error(StatusCode::BAD_REQUEST, body, "publish").is_transient());
        assert!(matches!(
            map_graph_error(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>", "publish"),
            PlatformError::Network(_)
        ));
    }

    #[test]
    fn test_unparseable_client_error_is_rejected_with_status() {
        let error = map_graph_error(StatusCode::NOT_FOUND, "not here", "delete");
        assert_eq!(error, PlatformError::Rejected("HTTP 404: not here".to_string()));
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(map_status_code("IN_PROGRESS"), Some(ContainerStatus::Processing));
        assert_eq!(map_status_code("FINISHED"), Some(ContainerStatus::Finished));
        assert_eq!(map_status_code("PUBLISHED"), Some(ContainerStatus::Finished));
        assert_eq!(map_status_code("ERROR"), Some(ContainerStatus::Error));
        assert_eq!(map_status_code("EXPIRED"), Some(ContainerStatus::Error));
        assert_eq!(map_status_code("QUEUED"), None);
    }

    #[test]
    fn test_reel_params() {
        let options = FormatOptions {
            share_to_feed: Some(false),
            thumb_offset_ms: Some(1500),
            ..Default::default()
        };
        let params = MetaClient::container_params(
            &MediaSpec::video("https://cdn.example.com/clip.mp4"),
            "Launch day",
            PublishFormat::Reel,
            &options,
        )
        .unwrap();

        assert!(params.contains(&("media_type", "REELS".to_string())));
        assert!(params.contains(&("video_url", "https://cdn.example.com/clip.mp4".to_string())));
        assert!(params.contains(&("share_to_feed", "false".to_string())));
        assert!(params.contains(&("thumb_offset", "1500".to_string())));
        assert!(params.contains(&("caption", "Launch day".to_string())));
    }

    #[test]
    fn test_story_has_no_caption() {
        let params = MetaClient::container_params(
            &MediaSpec::image("https://cdn.example.com/still.jpg"),
            "ignored",
            PublishFormat::Story,
            &FormatOptions::default(),
        )
        .unwrap();

        assert!(params.contains(&("media_type", "STORIES".to_string())));
        assert!(params.iter().all(|(key, _)| *key != "caption"));
    }

    #[test]
    fn test_unsupported_formats() {
        let reel_image = MetaClient::container_params(
            &MediaSpec::image("https://cdn.example.com/still.jpg"),
            "",
            PublishFormat::Reel,
            &FormatOptions::default(),
        );
        assert!(matches!(reel_image, Err(PlatformError::NotSupported(_))));

        let short = MetaClient::container_params(
            &MediaSpec::video("https://cdn.example.com/clip.mp4"),
            "",
            PublishFormat::Short,
            &FormatOptions::default(),
        );
        assert!(matches!(short, Err(PlatformError::NotSupported(_))));
    }

    #[test]
    fn test_caption_limit() {
        let caption = "a".repeat(CAPTION_LIMIT + 1);
        let result = MetaClient::container_params(
            &MediaSpec::video("https://cdn.example.com/clip.mp4"),
            &caption,
            PublishFormat::Reel,
            &FormatOptions::default(),
        );
        assert!(matches!(result, Err(PlatformError::Rejected(_))));
    }
}
