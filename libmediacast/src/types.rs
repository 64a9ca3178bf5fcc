//! Core data types for Mediacast

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Platforms with a registered adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlatformKind {
    #[serde(rename = "meta")]
    Meta,
    #[serde(rename = "youtube")]
    YouTube,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Meta => "meta",
            PlatformKind::YouTube => "youtube",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "meta" | "instagram" | "facebook" => Ok(PlatformKind::Meta),
            "youtube" => Ok(PlatformKind::YouTube),
            _ => Err(format!(
                "Unknown platform '{}'. Valid platforms: meta, youtube",
                s
            )),
        }
    }
}

/// A connected platform account.
///
/// `platform_account_id` is the platform-side identity the API calls act on
/// (an Instagram business user id, a YouTube channel id). `credential_ref`
/// keys the credential in the account store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformAccount {
    pub id: String,
    pub kind: PlatformKind,
    pub platform_account_id: String,
    pub display_name: String,
    pub credential_ref: String,
}

impl PlatformAccount {
    pub fn new(
        kind: PlatformKind,
        platform_account_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let platform_account_id = platform_account_id.into();
        let id = format!("{}-{}", kind.as_str(), platform_account_id);
        Self {
            credential_ref: id.clone(),
            id,
            kind,
            platform_account_id,
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    ShortLived,
    LongLived,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::ShortLived => "short_lived",
            TokenKind::LongLived => "long_lived",
        }
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_lived" => Ok(TokenKind::ShortLived),
            "long_lived" => Ok(TokenKind::LongLived),
            other => Err(format!("Unknown token kind '{}'", other)),
        }
    }
}

/// An access credential owned by exactly one account.
///
/// Only the token manager replaces a stored credential, and it always
/// swaps the whole value.
pub struct Credential {
    pub access_token: SecretString,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<SecretString>,
    pub scopes: Vec<String>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            kind,
            issued_at,
            expires_at,
            refresh_token: None,
            scopes: Vec::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when the credential expires before `now + window`
    pub fn expires_within(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => now + window >= self.expires_at,
            Err(_) => true,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.issued_at).to_std().unwrap_or_default()
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self {
            access_token: SecretString::from(self.access_token.expose_secret().to_owned()),
            kind: self.kind,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            refresh_token: self
                .refresh_token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_owned())),
            scopes: self.scopes.clone(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("kind", &self.kind)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Result of token introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValidation {
    pub valid: bool,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenValidation {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            scopes: Vec::new(),
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Image,
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" => Ok(MediaType::Video),
            "image" => Ok(MediaType::Image),
            other => Err(format!("Unknown media type '{}'. Valid: video, image", other)),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Video => f.write_str("video"),
            MediaType::Image => f.write_str("image"),
        }
    }
}

/// Reference to prepared media reachable by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSpec {
    pub url: String,
    pub media_type: MediaType,
}

impl MediaSpec {
    pub fn video(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            media_type: MediaType::Video,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            media_type: MediaType::Image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishFormat {
    Reel,
    Feed,
    Story,
    Short,
    Video,
}

impl PublishFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishFormat::Reel => "reel",
            PublishFormat::Feed => "feed",
            PublishFormat::Story => "story",
            PublishFormat::Short => "short",
            PublishFormat::Video => "video",
        }
    }
}

impl fmt::Display for PublishFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reel" | "reels" => Ok(PublishFormat::Reel),
            "feed" => Ok(PublishFormat::Feed),
            "story" | "stories" => Ok(PublishFormat::Story),
            "short" | "shorts" => Ok(PublishFormat::Short),
            "video" => Ok(PublishFormat::Video),
            other => Err(format!(
                "Unknown format '{}'. Valid: reel, feed, story, short, video",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Unlisted,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
            Privacy::Private => "private",
        }
    }
}

impl FromStr for Privacy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Privacy::Public),
            "unlisted" => Ok(Privacy::Unlisted),
            "private" => Ok(Privacy::Private),
            other => Err(format!(
                "Unknown privacy '{}'. Valid: public, unlisted, private",
                other
            )),
        }
    }
}

/// Format-specific knobs. Adapters ignore what their platform lacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_to_feed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_offset_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<Privacy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default)]
    pub made_for_kids: bool,
}

/// Opaque handle to a remote container.
///
/// `owner_id` is the platform-side account that owns the container.
/// `created_at` is stamped by the workflow clock once creation succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub container_id: String,
    pub platform: PlatformKind,
    pub account_id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Created,
    Processing,
    Finished,
    Error,
}

impl ContainerStatus {
    /// Position in the CREATED → PROCESSING → FINISHED|ERROR order
    pub fn rank(&self) -> u8 {
        match self {
            ContainerStatus::Created => 0,
            ContainerStatus::Processing => 1,
            ContainerStatus::Finished | ContainerStatus::Error => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "CREATED",
            ContainerStatus::Processing => "PROCESSING",
            ContainerStatus::Finished => "FINISHED",
            ContainerStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(ContainerStatus::Created),
            "PROCESSING" => Ok(ContainerStatus::Processing),
            "FINISHED" => Ok(ContainerStatus::Finished),
            "ERROR" => Ok(ContainerStatus::Error),
            other => Err(format!("Unknown container status '{}'", other)),
        }
    }
}

/// Observed state of a remote container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaContainer {
    pub container_id: String,
    pub status: ContainerStatus,
    pub status_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub post_id: String,
    pub post_url: Option<String>,
}

/// Terminal outcome of a publish job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl PublishResult {
    pub fn published(post: PublishedPost) -> Self {
        Self {
            success: true,
            post_id: Some(post.post_id),
            post_url: post.post_url,
            error_kind: None,
            error_detail: None,
        }
    }

    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            post_id: None,
            post_url: None,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }
}

/// Raw metrics keyed by the platform's own names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformMetrics {
    pub post_id: String,
    pub values: BTreeMap<String, f64>,
}

/// Shared metric vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Plays,
    Views,
    Impressions,
    Reach,
    Likes,
    Comments,
    Shares,
    Saves,
    WatchTimeMinutes,
    Engagement,
}

/// Normalized metrics. `None` means the platform did not report the metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub plays: Option<f64>,
    pub views: Option<f64>,
    pub impressions: Option<f64>,
    pub reach: Option<f64>,
    pub likes: Option<f64>,
    pub comments: Option<f64>,
    pub shares: Option<f64>,
    pub saves: Option<f64>,
    pub watch_time_minutes: Option<f64>,
    pub engagement: Option<f64>,
}

impl MetricSet {
    fn slot(&mut self, metric: Metric) -> &mut Option<f64> {
        match metric {
            Metric::Plays => &mut self.plays,
            Metric::Views => &mut self.views,
            Metric::Impressions => &mut self.impressions,
            Metric::Reach => &mut self.reach,
            Metric::Likes => &mut self.likes,
            Metric::Comments => &mut self.comments,
            Metric::Shares => &mut self.shares,
            Metric::Saves => &mut self.saves,
            Metric::WatchTimeMinutes => &mut self.watch_time_minutes,
            Metric::Engagement => &mut self.engagement,
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Plays => self.plays,
            Metric::Views => self.views,
            Metric::Impressions => self.impressions,
            Metric::Reach => self.reach,
            Metric::Likes => self.likes,
            Metric::Comments => self.comments,
            Metric::Shares => self.shares,
            Metric::Saves => self.saves,
            Metric::WatchTimeMinutes => self.watch_time_minutes,
            Metric::Engagement => self.engagement,
        }
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        *self.slot(metric) = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        *self == MetricSet::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightSnapshot {
    pub post_id: String,
    pub metrics: MetricSet,
    pub fetched_at: DateTime<Utc>,
}

/// Inbound request to publish prepared media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub account_id: String,
    pub media: MediaSpec,
    pub caption: String,
    pub format: PublishFormat,
    #[serde(default)]
    pub options: FormatOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightsRequest {
    pub account_id: String,
    pub post_id: String,
}
