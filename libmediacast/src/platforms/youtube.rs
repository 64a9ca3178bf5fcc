//! YouTube Data API v3 adapter
//!
//! A container here is an uploaded video. Creation runs the resumable
//! upload protocol (open a session with the metadata, then stream the media
//! to the session URL) and always uploads as `private`. YouTube then
//! processes the video, and finalizing flips it to the requested privacy so
//! viewers never see a half-processed upload.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::YouTubeConfig;
use crate::credentials::TokenAuthority;
use crate::error::{PlatformError, TokenError};
use crate::platforms::http::{is_transient_status, read_json, transport_error, truncate};
use crate::platforms::PlatformClient;
use crate::types::{
    ContainerRef, ContainerStatus, Credential, FormatOptions, MediaContainer, MediaSpec,
    MediaType, Metric, PlatformAccount, PlatformKind, PlatformMetrics, Privacy, PublishFormat,
    PublishedPost, TokenKind, TokenValidation,
};

const PLATFORM: &str = "YouTube";

const TITLE_LIMIT: usize = 100;
const DESCRIPTION_LIMIT_BYTES: usize = 5000;
/// "People & Blogs", the category YouTube Studio preselects
const DEFAULT_CATEGORY: &str = "22";

static YOUTUBE_ALIASES: &[(&str, Metric)] = &[
    ("viewCount", Metric::Views),
    ("likeCount", Metric::Likes),
    ("commentCount", Metric::Comments),
];

pub struct YouTubeClient {
    http: Client,
    /// Used for the media download and upload, which outlast API timeouts
    transfer: Client,
    api_url: String,
    upload_url: String,
    oauth_url: String,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: String,
    #[serde(default)]
    errors: Vec<GoogleErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthError {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    status: Option<VideoStatus>,
    processing_details: Option<ProcessingDetails>,
    statistics: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatus {
    upload_status: Option<String>,
    privacy_status: Option<String>,
    failure_reason: Option<String>,
    rejection_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessingDetails {
    processing_status: Option<String>,
    processing_failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    snippet: Option<ChannelSnippet>,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    scope: Option<String>,
    exp: Option<String>,
}

/// Classify a Data API error response
pub fn map_google_error(status: StatusCode, body: &str, context: &str) -> PlatformError {
    let parsed = serde_json::from_str::<GoogleErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);

    let message = parsed
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), truncate(body.trim(), 200)));
    let throttled = parsed.as_ref().is_some_and(|e| {
        e.errors.iter().any(|detail| {
            matches!(
                detail.reason.as_deref(),
                Some("rateLimitExceeded") | Some("userRateLimitExceeded")
            )
        })
    });

    if status == StatusCode::UNAUTHORIZED {
        PlatformError::Authentication(format!(
            "{} {}: {}. Suggestion: reconnect the channel to obtain a new token.",
            PLATFORM, context, message
        ))
    } else if status == StatusCode::TOO_MANY_REQUESTS || throttled {
        PlatformError::RateLimit(format!("{} {}: {}", PLATFORM, context, message))
    } else if is_transient_status(status) {
        PlatformError::Network(format!("{} {}: {}", PLATFORM, context, message))
    } else {
        PlatformError::Rejected(message)
    }
}

/// Classify a failed status check.
///
/// Quota exhaustion is temporary from the point of view of a video that is
/// still processing, so it is retried like throttling.
pub fn map_status_check_error(status: StatusCode, body: &str, context: &str) -> PlatformError {
    let quota = serde_json::from_str::<GoogleErrorEnvelope>(body)
        .map(|envelope| {
            envelope.error.errors.iter().any(|detail| {
                matches!(
                    detail.reason.as_deref(),
                    Some("quotaExceeded") | Some("dailyLimitExceeded")
                )
            })
        })
        .unwrap_or(false);

    match map_google_error(status, body, context) {
        PlatformError::Rejected(message) if quota => {
            PlatformError::RateLimit(format!("{} {}: {}", PLATFORM, context, message))
        }
        other => other,
    }
}

/// Fold upload and processing state into a container status
fn map_video_status(video: &VideoResource) -> (ContainerStatus, Option<String>) {
    let status = video.status.as_ref();
    let processing = video.processing_details.as_ref();

    match status.and_then(|s| s.upload_status.as_deref()) {
        Some("failed") => {
            return (
                ContainerStatus::Error,
                status.and_then(|s| s.failure_reason.clone()),
            )
        }
        Some("rejected") => {
            return (
                ContainerStatus::Error,
                status.and_then(|s| s.rejection_reason.clone()),
            )
        }
        Some("deleted") => {
            return (
                ContainerStatus::Error,
                Some("Video was deleted".to_string()),
            )
        }
        Some("processed") => return (ContainerStatus::Finished, None),
        _ => {}
    }

    match processing.and_then(|p| p.processing_status.as_deref()) {
        Some("succeeded") => (ContainerStatus::Finished, None),
        Some("failed") | Some("terminated") => (
            ContainerStatus::Error,
            processing.and_then(|p| p.processing_failure_reason.clone()),
        ),
        Some("processing") => (ContainerStatus::Processing, None),
        _ => match status.and_then(|s| s.upload_status.as_deref()) {
            Some("uploaded") => (ContainerStatus::Processing, None),
            _ => (ContainerStatus::Created, None),
        },
    }
}

fn video_title(caption: &str, options: &FormatOptions) -> String {
    let raw = options
        .title
        .clone()
        .or_else(|| caption.lines().find(|l| !l.trim().is_empty()).map(str::to_string))
        .unwrap_or_else(|| "Untitled".to_string());
    raw.replace(['<', '>'], "")
        .trim()
        .chars()
        .take(TITLE_LIMIT)
        .collect()
}

fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

impl YouTubeClient {
    pub fn new(http: Client, config: &YouTubeConfig) -> Self {
        Self {
            transfer: http.clone(),
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            oauth_url: config.oauth_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret(),
        }
    }

    pub fn with_client_credentials(mut self, client_id: &str, client_secret: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self.client_secret = Some(SecretString::from(client_secret.to_string()));
        self
    }

    pub fn with_transfer_client(mut self, transfer: Client) -> Self {
        self.transfer = transfer;
        self
    }

    fn api(&self, path: &str) -> String {
        format!("{}/youtube/v3/{}", self.api_url, path)
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response, PlatformError> {
        self.send_mapped(request, context, map_google_error).await
    }

    async fn send_mapped(
        &self,
        request: RequestBuilder,
        context: &str,
        map_error: fn(StatusCode, &str, &str) -> PlatformError,
    ) -> Result<Response, PlatformError> {
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
        Err(map_error(status, &body, context))
    }

    /// `videos.list` for one id; `None` when YouTube does not know the video
    async fn find_video(
        &self,
        credential: &Credential,
        video_id: &str,
        parts: &str,
        context: &str,
        map_error: fn(StatusCode, &str, &str) -> PlatformError,
    ) -> Result<Option<VideoResource>, PlatformError> {
        let request = self
            .http
            .get(self.api("videos"))
            .bearer_auth(credential.token())
            .query(&[("part", parts), ("id", video_id)]);
        let response = self.send_mapped(request, context, map_error).await?;
        let list: VideoListResponse = read_json(PLATFORM, context, response).await?;
        Ok(list.items.into_iter().next())
    }

    async fn fetch_video(
        &self,
        credential: &Credential,
        video_id: &str,
        parts: &str,
        context: &str,
    ) -> Result<VideoResource, PlatformError> {
        self.find_video(credential, video_id, parts, context, map_google_error)
            .await?
            .ok_or_else(|| PlatformError::Rejected(format!("Video {} not found", video_id)))
    }

    /// Start downloading the prepared media.
    ///
    /// Returns the open response with its content type and length so the
    /// body can be streamed straight into the upload.
    async fn download_media(
        &self,
        media: &MediaSpec,
    ) -> Result<(Response, String, Option<u64>), PlatformError> {
        let response = self
            .transfer
            .get(&media.url)
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, "media download", e))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("Media URL {} returned HTTP {}", media.url, status.as_u16());
            return Err(if is_transient_status(status) {
                PlatformError::Network(message)
            } else {
                PlatformError::Rejected(message)
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("video/"))
            .unwrap_or("video/mp4")
            .to_string();
        let length = response.content_length();
        Ok((response, content_type, length))
    }
}

#[async_trait]
impl PlatformClient for YouTubeClient {
    fn kind(&self) -> PlatformKind {
        PlatformKind::YouTube
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
        if !matches!(format, PublishFormat::Short | PublishFormat::Video) {
            return Err(PlatformError::NotSupported(format!(
                "'{}' is not a YouTube publishing format",
                format
            )));
        }
        if media.media_type != MediaType::Video {
            return Err(PlatformError::NotSupported(
                "YouTube only accepts video media".to_string(),
            ));
        }

        let mut description = caption.to_string();
        if format == PublishFormat::Short && !description.to_lowercase().contains("#shorts") {
            if !description.is_empty() {
                description.push_str("\n\n");
            }
            description.push_str("#Shorts");
        }
        if description.len() > DESCRIPTION_LIMIT_BYTES {
            return Err(PlatformError::Rejected(format!(
                "Description is {} bytes; YouTube allows at most {}",
                description.len(),
                DESCRIPTION_LIMIT_BYTES
            )));
        }

        let metadata = json!({
            "snippet": {
                "title": video_title(caption, options),
                "description": description,
                "tags": options.tags,
                "categoryId": options.category_id.as_deref().unwrap_or(DEFAULT_CATEGORY),
            },
            "status": {
                "privacyStatus": Privacy::Private.as_str(),
                "selfDeclaredMadeForKids": options.made_for_kids,
            }
        });

        let init = self
            .http
            .post(format!("{}/upload/youtube/v3/videos", self.upload_url))
            .bearer_auth(credential.token())
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header("X-Upload-Content-Type", "video/*")
            .json(&metadata);
        let response = self.send(init, "upload init").await?;
        let session_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::MalformedResponse(
                    "YouTube upload init returned no session URL".to_string(),
                )
            })?;

        let (download, content_type, length) = self.download_media(media).await?;
        debug!(
            "Streaming {} bytes of {} to YouTube for account {}",
            length.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            content_type,
            account.id
        );

        let mut transfer = self
            .transfer
            .put(session_url)
            .bearer_auth(credential.token())
            .header(CONTENT_TYPE, content_type);
        if let Some(length) = length {
            transfer = transfer.header(CONTENT_LENGTH, length);
        }
        let transfer = transfer.body(Body::wrap_stream(download.bytes_stream()));
        let response = self.send(transfer, "upload transfer").await?;
        let uploaded: UploadedVideo = read_json(PLATFORM, "upload transfer", response).await?;

        info!("Uploaded YouTube video {} for account {}", uploaded.id, account.id);
        Ok(ContainerRef {
            container_id: uploaded.id,
            platform: PlatformKind::YouTube,
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
        let video = self
            .find_video(
                credential,
                &container.container_id,
                "status,processingDetails",
                "processing status",
                map_status_check_error,
            )
            .await?;

        let (status, status_detail) = match video {
            Some(video) => map_video_status(&video),
            // A video that vanished mid-processing will never finish
            None => (
                ContainerStatus::Error,
                Some(format!("Video {} not found", container.container_id)),
            ),
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
        options: &FormatOptions,
    ) -> Result<PublishedPost, PlatformError> {
        let target = options.privacy.unwrap_or(Privacy::Public);
        let post = PublishedPost {
            post_id: container.container_id.clone(),
            post_url: Some(watch_url(&container.container_id)),
        };

        let video = self
            .fetch_video(credential, &container.container_id, "status", "publish check")
            .await?;
        let current = video.status.as_ref().and_then(|s| s.privacy_status.as_deref());
        if current == Some(target.as_str()) {
            debug!(
                "YouTube video {} is already {}",
                container.container_id,
                target.as_str()
            );
            return Ok(post);
        }

        let update = self
            .http
            .put(self.api("videos"))
            .bearer_auth(credential.token())
            .query(&[("part", "status")])
            .json(&json!({
                "id": container.container_id,
                "status": {
                    "privacyStatus": target.as_str(),
                    "selfDeclaredMadeForKids": options.made_for_kids,
                }
            }));
        self.send(update, "publish").await?;

        info!(
            "Published YouTube video {} as {}",
            container.container_id,
            target.as_str()
        );
        Ok(post)
    }

    async fn delete_post(&self, credential: &Credential, post_id: &str) -> Result<(), PlatformError> {
        let request = self
            .http
            .delete(self.api("videos"))
            .bearer_auth(credential.token())
            .query(&[("id", post_id)]);
        self.send(request, "delete").await?;
        Ok(())
    }

    async fn fetch_insights(
        &self,
        credential: &Credential,
        post_id: &str,
    ) -> Result<PlatformMetrics, PlatformError> {
        let video = self
            .fetch_video(credential, post_id, "statistics", "insights")
            .await?;

        // The API encodes counts as strings
        let values = video
            .statistics
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, value)| {
                let number = match &value {
                    serde_json::Value::String(s) => s.parse::<f64>().ok(),
                    other => other.as_f64(),
                };
                number.map(|n| (name, n))
            })
            .collect();

        Ok(PlatformMetrics {
            post_id: video.id,
            values,
        })
    }

    async fn list_accounts(
        &self,
        credential: &Credential,
    ) -> Result<Vec<PlatformAccount>, PlatformError> {
        let request = self
            .http
            .get(self.api("channels"))
            .bearer_auth(credential.token())
            .query(&[("part", "snippet"), ("mine", "true")]);
        let response = self.send(request, "channel discovery").await?;
        let channels: ChannelListResponse =
            read_json(PLATFORM, "channel discovery", response).await?;

        Ok(channels
            .items
            .into_iter()
            .map(|channel| {
                let title = channel
                    .snippet
                    .and_then(|s| s.title)
                    .unwrap_or_else(|| channel.id.clone());
                PlatformAccount::new(PlatformKind::YouTube, channel.id, title)
            })
            .collect())
    }

    fn metric_aliases(&self) -> &'static [(&'static str, Metric)] {
        YOUTUBE_ALIASES
    }
}

#[async_trait]
impl TokenAuthority for YouTubeClient {
    fn can_exchange(&self, credential: &Credential, _now: DateTime<Utc>) -> bool {
        self.client_id.is_some()
            && self.client_secret.is_some()
            && credential.refresh_token().is_some()
    }

    /// Refresh-token grant. Google access tokens are the longest-lived the
    /// platform issues, so the result is recorded as long-lived.
    async fn exchange(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<Credential, TokenError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(TokenError::ExchangeFailed(
                "YouTube OAuth client id and secret are not configured".to_string(),
            ));
        };
        let refresh_token = credential.refresh_token().ok_or_else(|| {
            TokenError::ExchangeFailed("Credential has no refresh token".to_string())
        })?;

        let response = self
            .http
            .post(format!("{}/token", self.oauth_url))
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.expose_secret()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| TokenError::ExchangeFailed(format!("YouTube token refresh: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::ExchangeFailed(format!("YouTube token refresh: {}", e)))?;
        if !status.is_success() {
            let message = match serde_json::from_str::<OAuthError>(&body) {
                Ok(error) => error.error_description.unwrap_or(error.error),
                Err(_) => format!("HTTP {}: {}", status.as_u16(), truncate(body.trim(), 200)),
            };
            return Err(TokenError::ExchangeFailed(message));
        }

        let refreshed: RefreshResponse = serde_json::from_str(&body).map_err(|e| {
            TokenError::ExchangeFailed(format!("YouTube token refresh returned {}: {}", e, body))
        })?;
        let scopes = refreshed
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| credential.scopes.clone());

        Ok(Credential::new(
            refreshed.access_token,
            TokenKind::LongLived,
            now,
            now + chrono::Duration::seconds(refreshed.expires_in.unwrap_or(3600)),
        )
        .with_refresh_token(refresh_token)
        .with_scopes(scopes))
    }

    async fn introspect(
        &self,
        credential: &Credential,
        _now: DateTime<Utc>,
    ) -> Result<TokenValidation, TokenError> {
        let response = self
            .http
            .get(format!("{}/tokeninfo", self.oauth_url))
            .query(&[("access_token", credential.token())])
            .send()
            .await
            .map_err(|e| TokenError::Invalid(format!("YouTube tokeninfo: {}", e)))?;

        if !response.status().is_success() {
            return Ok(TokenValidation::invalid());
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| TokenError::Invalid(format!("YouTube tokeninfo: {}", e)))?;
        let expires_at = info
            .exp
            .and_then(|exp| exp.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Ok(TokenValidation {
            valid: true,
            scopes: info
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            expires_at,
        })
    }
}
