//! External collaborator seams: access control and event notification.
//!
//! Both are interfaces only. The registry ships a permissive default
//! controller and a sink that logs; deployments plug in token auth,
//! webhook fan-out, and the like without the protocol engine knowing.
use async_trait::async_trait;
use http::Method;

/// What a request wants to do, for the access controller.
#[derive(Clone, Debug)]
pub struct ResourceAction {
    /// Resource class, `repository` or `registry`.
    pub resource: &'static str,
    /// Repository name, or empty for registry-level resources.
    pub name: String,
    pub action: &'static str,
}

#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
}

/// Outcome of an authorization check.
pub enum Decision {
    Allow,
    /// Not authenticated; `challenge` becomes the `WWW-Authenticate`
    /// response header.
    Challenge { challenge: String },
    /// Authenticated but not permitted.
    Deny,
}

#[async_trait]
pub trait AccessController: Send + Sync + 'static {
    async fn authorized(&self, request: &RequestInfo, resources: &[ResourceAction]) -> Decision;
}

/// Default controller: everything is allowed.
pub struct AllowAll;

#[async_trait]
impl AccessController for AllowAll {
    async fn authorized(&self, _: &RequestInfo, _: &[ResourceAction]) -> Decision {
        Decision::Allow
    }
}

/// A state change worth telling the outside world about: blob commits,
/// manifest pushes, manifest deletes.
#[derive(Clone, Debug)]
pub struct Event {
    pub action: &'static str,
    pub repository: String,
    pub digest: String,
    pub media_type: Option<String>,
    pub size: u64,
}

#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn notify(
        &self,
        event: Event,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Default sink: events go to the log.
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn notify(
        &self,
        event: Event,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(
            action = event.action,
            repository = %event.repository,
            digest = %event.digest,
            size = event.size,
            "registry event"
        );
        Ok(())
    }
}
