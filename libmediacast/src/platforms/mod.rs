//! Platform abstraction and adapters
//!
//! Every supported platform implements [`PlatformClient`] once. The
//! workflow looks adapters up by [`PlatformKind`] in a [`PlatformRegistry`]
//! and never branches on the platform itself.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libmediacast::platforms::{PlatformRegistry, mock::MockPlatform};
//! use libmediacast::types::PlatformKind;
//!
//! let registry = PlatformRegistry::new()
//!     .with(Arc::new(MockPlatform::new(PlatformKind::Meta)));
//!
//! let client = registry.get(PlatformKind::Meta).expect("registered");
//! assert_eq!(client.kind(), PlatformKind::Meta);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::types::{
    ContainerRef, Credential, FormatOptions, MediaContainer, MediaSpec, Metric, PlatformAccount,
    PlatformKind, PlatformMetrics, PublishFormat, PublishedPost,
};

pub mod http;
pub mod meta;
pub mod youtube;

// Available outside tests so integration tests and embedders can script it
pub mod mock;

/// Capability set of a publishing platform.
///
/// All methods perform at most a handful of HTTP round trips and classify
/// every failure into a [`PlatformError`] before returning.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// Submit media and obtain a container that the platform processes
    /// asynchronously.
    ///
    /// # Arguments
    ///
    /// * `credential` - Token authorized for `account`
    /// * `account` - The account publishing the media
    /// * `media` - Reference to the prepared media file
    /// * `caption` - Post caption or description
    /// * `format` - Target format (reel, story, short, ...)
    /// * `options` - Format-specific options
    ///
    /// # Errors
    ///
    /// - `PlatformError::NotSupported` if the platform lacks `format` for this media
    /// - `PlatformError::Rejected` if the platform refused the submission
    /// - `PlatformError::Network` / `RateLimit` for transient failures
    async fn create_container(
        &self,
        credential: &Credential,
        account: &PlatformAccount,
        media: &MediaSpec,
        caption: &str,
        format: PublishFormat,
        options: &FormatOptions,
    ) -> Result<ContainerRef, PlatformError>;

    /// One status check of a container
    async fn check_status(
        &self,
        credential: &Credential,
        container: &ContainerRef,
    ) -> Result<MediaContainer, PlatformError>;

    /// Make a processed container publicly visible.
    ///
    /// Calling this twice for the same container must not create a second
    /// post: the second call returns the same post or
    /// `PlatformError::AlreadyPublished`.
    async fn finalize(
        &self,
        credential: &Credential,
        container: &ContainerRef,
        options: &FormatOptions,
    ) -> Result<PublishedPost, PlatformError>;

    async fn delete_post(&self, credential: &Credential, post_id: &str) -> Result<(), PlatformError>;

    /// Raw metrics keyed by the platform's own metric names
    async fn fetch_insights(
        &self,
        credential: &Credential,
        post_id: &str,
    ) -> Result<PlatformMetrics, PlatformError>;

    /// Accounts the credential can publish to
    async fn list_accounts(
        &self,
        credential: &Credential,
    ) -> Result<Vec<PlatformAccount>, PlatformError>;

    /// Native metric names and the shared metric each one maps to
    fn metric_aliases(&self) -> &'static [(&'static str, Metric)];
}

/// Adapter lookup by platform
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    clients: HashMap<PlatformKind, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` for its platform, replacing any previous adapter
    pub fn register(&mut self, client: Arc<dyn PlatformClient>) {
        self.clients.insert(client.kind(), client);
    }

    pub fn with(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.register(client);
        self
    }

    pub fn get(&self, kind: PlatformKind) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        self.clients.get(&kind).cloned().ok_or_else(|| {
            PlatformError::NotSupported(format!("No adapter registered for {}", kind))
        })
    }

    pub fn kinds(&self) -> Vec<PlatformKind> {
        let mut kinds: Vec<_> = self.clients.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockPlatform;

    #[test]
    fn test_registry_lookup() {
        let registry = PlatformRegistry::new()
            .with(Arc::new(MockPlatform::new(PlatformKind::Meta)))
            .with(Arc::new(MockPlatform::new(PlatformKind::YouTube)));

        assert_eq!(
            registry.get(PlatformKind::YouTube).unwrap().kind(),
            PlatformKind::YouTube
        );
        assert_eq!(
            registry.kinds(),
            vec![PlatformKind::Meta, PlatformKind::YouTube]
        );
    }

    #[test]
    fn test_missing_adapter_is_not_supported() {
        let registry = PlatformRegistry::new();
        let err = registry.get(PlatformKind::Meta).err().unwrap();
        assert!(matches!(err, PlatformError::NotSupported(_)));
    }
}
