//! Credential lifecycle
//!
//! Platform adapters implement [`TokenAuthority`] for the exchange and
//! introspection endpoints; [`token::TokenManager`] decides when to call
//! them and owns the cached credentials.

pub mod token;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TokenError;
use crate::types::{Credential, TokenValidation};

pub use token::{TokenManager, TokenPolicy};

/// A platform's token endpoints
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// Whether `credential` can be exchanged or refreshed at `now`.
    ///
    /// An authority without configured app credentials, or a credential
    /// that has already expired with no refresh token, returns false.
    fn can_exchange(&self, credential: &Credential, now: DateTime<Utc>) -> bool;

    /// Trade `credential` for a fresh, longer-lived one.
    ///
    /// # Errors
    ///
    /// `TokenError::ExchangeFailed` carrying the platform's message verbatim.
    async fn exchange(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<Credential, TokenError>;

    /// Ask the platform whether `credential` is still usable
    async fn introspect(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<TokenValidation, TokenError>;
}
