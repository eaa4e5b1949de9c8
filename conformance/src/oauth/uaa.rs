//! Authorization-code flow against a UAA-style server

use super::{
    AccessToken, AuthCode, OAuthConfig, OAuthDriver, OAuthEndpoints, OAuthError,
    PermissionCheck, ScopeGrant, SessionCookie,
};
use crate::platform::InstanceId;
use async_trait::async_trait;
use common::{CookieJar, RequestTarget};
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::Response;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const SESSION_COOKIE: &str = "JSESSIONID";

#[derive(Deserialize)]
struct InfoResponse {
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct PermissionsResponse {
    #[serde(default)]
    manage: bool,
}

/// Drives login, approval and token exchange over HTTP
///
/// Redirects are never followed: the authorization code is read from the
/// `Location` header of the redirect itself.
pub struct UaaDriver {
    client: reqwest::Client,
}

impl UaaDriver {
    pub fn new(skip_ssl_validation: bool, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .danger_accept_invalid_certs(skip_ssl_validation)
            .build()?;

        Ok(Self { client })
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, OAuthError> {
        let response = request.send().await.map_err(|source| OAuthError::Http {
            url: url.to_string(),
            source,
        })?;
        debug!(url = %url, status = response.status().as_u16(), "oauth request");
        Ok(response)
    }

    async fn json<T: for<'de> Deserialize<'de>>(
        url: &str,
        response: Response,
    ) -> Result<T, OAuthError> {
        response.json().await.map_err(|source| OAuthError::Http {
            url: url.to_string(),
            source,
        })
    }
}

fn parse_url(url: &str) -> Result<Url, OAuthError> {
    Url::parse(url).map_err(|source| OAuthError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// `code` query parameter of a redirect target, resolved against `base`
fn code_from_location(base: &Url, location: &str) -> Option<AuthCode> {
    let target = base.join(location).ok()?;
    target
        .query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, code)| AuthCode(code.into_owned()))
        .filter(|code| !code.0.is_empty())
}

fn grant_from(base: &Url, response: &Response) -> ScopeGrant {
    let status = response.status();
    let code = if status.is_redirection() {
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|location| code_from_location(base, location))
    } else {
        None
    };

    ScopeGrant {
        code,
        status: status.as_u16(),
    }
}

#[async_trait]
impl OAuthDriver for UaaDriver {
    async fn discover_endpoints(&self, api: &str) -> Result<OAuthEndpoints, OAuthError> {
        let url = endpoint(api, "/v2/info");
        let response = self.send(&url, self.client.get(&url)).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let info: InfoResponse = Self::json(&url, response).await?;
        let authorization_endpoint =
            info.authorization_endpoint
                .ok_or_else(|| OAuthError::MissingField {
                    url: url.clone(),
                    field: "authorization_endpoint",
                })?;
        let token_endpoint = info.token_endpoint.ok_or_else(|| OAuthError::MissingField {
            url: url.clone(),
            field: "token_endpoint",
        })?;

        Ok(OAuthEndpoints {
            authorization_endpoint,
            token_endpoint,
        })
    }

    async fn authenticate_user(
        &self,
        authorization_endpoint: &str,
        username: &str,
        password: &str,
    ) -> Result<SessionCookie, OAuthError> {
        let url = endpoint(authorization_endpoint, "/login.do");
        let parsed = parse_url(&url)?;

        let request = self
            .client
            .post(&url)
            .form(&[("username", username), ("password", password)]);
        let response = self.send(&url, request).await?;

        let target = RequestTarget::from(parsed);
        let mut jar = CookieJar::new();
        jar.store_all(
            &target,
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        );

        jar.get(SESSION_COOKIE)
            .map(|cookie| SessionCookie(format!("{}={}", cookie.name(), cookie.value())))
            .ok_or(OAuthError::MissingSessionCookie { url })
    }

    async fn request_scopes(
        &self,
        session: &SessionCookie,
        config: &OAuthConfig,
    ) -> Result<ScopeGrant, OAuthError> {
        let authorize = endpoint(&config.endpoints.authorization_endpoint, "/oauth/authorize");
        let url = Url::parse_with_params(
            &authorize,
            &[
                ("client_id", config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("scope", config.requested_scopes.as_str()),
            ],
        )
        .map_err(|source| OAuthError::InvalidUrl {
            url: authorize.clone(),
            source,
        })?;

        let request = self.client.get(url.clone()).header(COOKIE, &session.0);
        let response = self.send(url.as_str(), request).await?;

        if response.status() != reqwest::StatusCode::OK {
            return Ok(grant_from(&url, &response));
        }

        // Scopes not approved yet: approve everything that was asked for
        let mut form = vec![("user_oauth_approval".to_string(), "true".to_string())];
        for (i, scope) in config.scopes().enumerate() {
            form.push((format!("scope.{}", i), format!("scope.{}", scope)));
        }

        let request = self
            .client
            .post(&authorize)
            .header(COOKIE, &session.0)
            .form(&form);
        let response = self.send(&authorize, request).await?;

        Ok(grant_from(&url, &response))
    }

    async fn exchange_token(
        &self,
        code: &AuthCode,
        config: &OAuthConfig,
    ) -> Result<AccessToken, OAuthError> {
        let url = endpoint(&config.endpoints.token_endpoint, "/oauth/token");
        let request = self
            .client
            .post(&url)
            .basic_auth(&config.client_id, Some(&config.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.0.as_str()),
                ("redirect_uri", config.redirect_uri.as_str()),
            ]);
        let response = self.send(&url, request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let token: TokenResponse = Self::json(&url, response).await?;
        token
            .access_token
            .filter(|token| !token.is_empty())
            .map(AccessToken)
            .ok_or(OAuthError::MissingField {
                url,
                field: "access_token",
            })
    }

    async fn check_permission(
        &self,
        api: &str,
        token: &AccessToken,
        instance: &InstanceId,
    ) -> Result<PermissionCheck, OAuthError> {
        let url = endpoint(
            api,
            &format!("/v2/service_instances/{}/permissions", instance),
        );
        let request = self.client.get(&url).bearer_auth(&token.0);
        let response = self.send(&url, request).await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Ok(PermissionCheck {
                manage: false,
                status,
            });
        }

        let permissions: PermissionsResponse = Self::json(&url, response).await?;
        Ok(PermissionCheck {
            manage: permissions.manage,
            status,
        })
    }
}
