//! HTTP plumbing shared by the adapters

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::HttpConfig;
use crate::error::PlatformError;

/// Build the client every adapter shares
pub fn build_client(config: &HttpConfig) -> Result<Client, PlatformError> {
    Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))
}

/// Client for media transfers that may run longer than any API call.
///
/// Only connecting and each individual read are bounded by the timeout.
pub fn build_transfer_client(config: &HttpConfig) -> Result<Client, PlatformError> {
    Client::builder()
        .connect_timeout(config.timeout)
        .read_timeout(config.timeout)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| PlatformError::Network(format!("Failed to build transfer client: {}", e)))
}

/// Classify a transport-level failure (no usable response)
pub fn transport_error(platform: &str, context: &str, error: reqwest::Error) -> PlatformError {
    if error.is_decode() {
        return PlatformError::MalformedResponse(format!(
            "{} {}: could not decode response: {}",
            platform, context, error
        ));
    }
    if error.is_builder() {
        return PlatformError::Rejected(format!("{} {}: invalid request: {}", platform, context, error));
    }
    // Timeouts, refused connections, resets and body read failures
    PlatformError::Network(format!("{} {}: {}", platform, context, error))
}

/// Read the body of a successful response as JSON
pub async fn read_json<T: DeserializeOwned>(
    platform: &str,
    context: &str,
    response: Response,
) -> Result<T, PlatformError> {
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(platform, context, e))?;
    serde_json::from_str(&body).map_err(|e| {
        PlatformError::MalformedResponse(format!(
            "{} {}: {} (body: {})",
            platform,
            context,
            e,
            truncate(&body, 200)
        ))
    })
}

/// Status classes every platform agrees on, used before looking at the body
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}
