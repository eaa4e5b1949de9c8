//! OAuth2 authorization-code driver
//!
//! Used by the SSO scenario to act as a dashboard on a user's behalf. The
//! driver only has to get a token and use it; token formats and scope
//! grammar are the authorization server's business.

pub mod uaa;

use crate::platform::InstanceId;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use uaa::UaaDriver;

/// Scopes a dashboard client asks for
pub const DASHBOARD_SCOPES: &str = "openid,cloud_controller_service_permissions.read";

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Login to {url} did not set a session cookie")]
    MissingSessionCookie { url: String },

    #[error("Response from {url} is missing {field}")]
    MissingField { url: String, field: &'static str },
}

/// Where the authorization server lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

/// Everything a dashboard client needs to run the authorization-code flow
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Comma separated
    pub requested_scopes: String,
    pub endpoints: OAuthEndpoints,
}

impl OAuthConfig {
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.requested_scopes
            .split(',')
            .map(str::trim)
            .filter(|scope| !scope.is_empty())
    }
}

/// `Cookie` header value carrying the user's login session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCookie(pub String);

/// Authorization code returned on the redirect URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCode(pub String);

/// Bearer token; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCookie(<redacted>)")
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Outcome of asking for scopes: a code on success, and the final status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeGrant {
    pub code: Option<AuthCode>,
    pub status: u16,
}

/// Result of asking the API what the token may do with an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionCheck {
    pub manage: bool,
    pub status: u16,
}

#[async_trait]
pub trait OAuthDriver: Send + Sync {
    /// Resolve authorization and token endpoints from the API
    async fn discover_endpoints(&self, api: &str) -> Result<OAuthEndpoints, OAuthError>;

    async fn authenticate_user(
        &self,
        authorization_endpoint: &str,
        username: &str,
        password: &str,
    ) -> Result<SessionCookie, OAuthError>;

    /// Request and approve the configured scopes
    ///
    /// A rejected client is not an error: the status is reported with no code.
    async fn request_scopes(
        &self,
        session: &SessionCookie,
        config: &OAuthConfig,
    ) -> Result<ScopeGrant, OAuthError>;

    async fn exchange_token(
        &self,
        code: &AuthCode,
        config: &OAuthConfig,
    ) -> Result<AccessToken, OAuthError>;

    /// Any status is a valid answer; only transport failures are errors
    async fn check_permission(
        &self,
        api: &str,
        token: &AccessToken,
        instance: &InstanceId,
    ) -> Result<PermissionCheck, OAuthError>;
}
