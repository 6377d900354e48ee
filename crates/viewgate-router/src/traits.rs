//! Collaborator seams of the router: content delivery and the SMS side
//! channel.

use async_trait::async_trait;
use serde_json::Value;

use viewgate_core::error::GatewayError;

/// Content-delivery collaborator resolving package references.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the manifest of a content package.
    async fn manifest(&self, package_id: &str) -> Result<Value, GatewayError>;

    /// Absolute base URL under which the package's files are served,
    /// including the trailing slash. Relative URIs in manifests resolve
    /// against this.
    fn base_url(&self, package_id: &str) -> String;
}

/// Outbound SMS channel.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, mobile: &str, text: &str) -> Result<(), GatewayError>;
}
