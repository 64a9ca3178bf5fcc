//! Mediacast - publishing integration layer for social video platforms
//!
//! This library drives third-party publishing APIs through their asynchronous
//! "upload → process → finalize" protocol, keeps the access tokens those calls
//! need alive, and fetches post-publish metrics.

pub mod clock;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod events;
pub mod insights;
pub mod logging;
pub mod platforms;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use credentials::token::TokenManager;
pub use db::Database;
pub use error::{ErrorKind, MediacastError, Result};
pub use types::{
    Credential, InsightSnapshot, PlatformAccount, PlatformKind, PublishRequest, PublishResult,
};
pub use workflow::{JobState, PublishJob, PublishWorkflow};
