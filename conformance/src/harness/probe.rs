//! Session-affinity-aware HTTP probe
//!
//! A probe is a repeatable observation of a system that changes on its own
//! schedule. [`CookieProbe`] issues plain GETs against `<host>.<domain><path>`
//! and threads a [`CookieJar`] through every call, the way a browser (or
//! `curl -b jar -c jar`) keeps a session alive across independent requests.

use async_trait::async_trait;
use common::{extract_index, CookieJar, InstanceIndex, ParseError, RequestTarget};
use reqwest::header::{COOKIE, HOST, SET_COOKIE};
use reqwest::redirect::Policy;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Probe failures
///
/// Everything except [`ProbeError::Format`] is transient: the polling engine
/// retries it until its bound elapses.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("{target} unavailable: {reason}")]
    Unavailable { target: String, reason: String },

    /// The observation was abandoned when the polling bound ran out
    #[error("No answer within {0:?}")]
    Deadline(Duration),

    #[error("Response format violated: {0}")]
    Format(#[from] ParseError),
}

impl ProbeError {
    /// Whether retrying can change the outcome
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProbeError::Format(_))
    }
}

/// A side-effecting, repeatable observation
#[async_trait]
pub trait Probe: Send {
    type Output: Send;

    async fn observe(&mut self) -> Result<Self::Output, ProbeError>;
}

#[async_trait]
impl<P: Probe + ?Sized> Probe for &mut P {
    type Output = P::Output;

    async fn observe(&mut self) -> Result<Self::Output, ProbeError> {
        (**self).observe().await
    }
}

/// Probe backed by a closure returning a future
pub struct FnProbe<F> {
    f: F,
}

/// Wrap a closure as a [`Probe`]
pub fn probe_fn<F, Fut, V>(f: F) -> FnProbe<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<V, ProbeError>> + Send + 'static,
    V: Send + 'static,
{
    FnProbe { f }
}

#[async_trait]
impl<F, Fut, V> Probe for FnProbe<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<V, ProbeError>> + Send + 'static,
    V: Send + 'static,
{
    type Output = V;

    async fn observe(&mut self) -> Result<V, ProbeError> {
        (self.f)().await
    }
}

/// Connection settings for [`CookieProbe`]
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Apps domain appended to every host
    pub domain: String,
    pub use_http: bool,
    pub skip_ssl_validation: bool,
    /// Connect here instead of resolving the host, sending it as `Host`
    pub router_address: Option<SocketAddr>,
    pub request_timeout: Duration,
}

/// HTTP GET client that replays and records cookies
pub struct CookieProbe {
    client: reqwest::Client,
    settings: ProbeSettings,
}

impl CookieProbe {
    pub fn new(settings: ProbeSettings) -> Result<Self, reqwest::Error> {
        // Redirects are observations too; never follow them
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(settings.skip_ssl_validation)
            .build()?;

        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Fully qualified hostname for an app host
    pub fn fqdn(&self, host: &str) -> String {
        format!("{}.{}", host, self.settings.domain)
    }

    /// URL a request for `host` + `path` is sent to
    pub fn url(&self, host: &str, path: &str) -> String {
        let scheme = if self.settings.use_http { "http" } else { "https" };
        let authority = match self.settings.router_address {
            Some(addr) => addr.to_string(),
            None => self.fqdn(host),
        };
        let separator = if path.starts_with('/') { "" } else { "/" };
        format!("{}://{}{}{}", scheme, authority, separator, path)
    }

    /// Issue one GET, sending in-scope cookies and merging `Set-Cookie`
    ///
    /// The jar is consumed and handed back together with the outcome, also
    /// on failure, so a transient error never drops established affinity.
    pub async fn request(
        &self,
        host: &str,
        path: &str,
        mut jar: CookieJar,
    ) -> (Result<String, ProbeError>, CookieJar) {
        let fqdn = self.fqdn(host);
        let url = self.url(host, path);
        let target = match RequestTarget::new(&fqdn, path, !self.settings.use_http) {
            Ok(target) => target,
            Err(error) => {
                let reason = format!("invalid host: {}", error);
                return (Err(ProbeError::Unavailable { target: fqdn, reason }), jar);
            }
        };

        let mut request = self.client.get(&url);
        if self.settings.router_address.is_some() {
            request = request.header(HOST, &fqdn);
        }
        let sent = jar.cookie_header(&target);
        if let Some(cookies) = &sent {
            request = request.header(COOKIE, cookies);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(source) => return (Err(ProbeError::Network { url, source }), jar),
        };

        let stored = jar.store_all(
            &target,
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        );

        let status = response.status();
        debug!(
            url = %url,
            host = %fqdn,
            status = status.as_u16(),
            cookies_sent = sent.as_deref().unwrap_or(""),
            cookies_stored = stored,
            "probe request"
        );

        if !status.is_success() {
            return (
                Err(ProbeError::Status {
                    url,
                    status: status.as_u16(),
                }),
                jar,
            );
        }

        match response.text().await {
            Ok(body) => (Ok(body), jar),
            Err(source) => (Err(ProbeError::Network { url, source }), jar),
        }
    }
}

/// One route observed through a [`CookieProbe`]
///
/// With affinity the jar is threaded through every observation; without it
/// each request starts from an empty jar and the response cookies are
/// dropped.
pub struct RouteProbe<'a> {
    probe: &'a CookieProbe,
    host: String,
    path: String,
    jar: CookieJar,
    affinity: bool,
}

impl<'a> RouteProbe<'a> {
    pub fn new(probe: &'a CookieProbe, host: &str, path: &str, jar: CookieJar) -> Self {
        Self {
            probe,
            host: host.to_string(),
            path: path.to_string(),
            jar,
            affinity: true,
        }
    }

    /// Client that never presents an affinity cookie
    pub fn stateless(probe: &'a CookieProbe, host: &str, path: &str) -> Self {
        Self {
            affinity: false,
            ..Self::new(probe, host, path, CookieJar::new())
        }
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    /// Give the jar back to its owner
    pub fn into_jar(self) -> CookieJar {
        self.jar
    }
}

#[async_trait]
impl Probe for RouteProbe<'_> {
    type Output = String;

    async fn observe(&mut self) -> Result<String, ProbeError> {
        if !self.affinity {
            let (result, _) = self
                .probe
                .request(&self.host, &self.path, CookieJar::new())
                .await;
            return result;
        }

        let jar = std::mem::take(&mut self.jar);
        let (result, jar) = self.probe.request(&self.host, &self.path, jar).await;
        self.jar = jar;
        result
    }
}

/// A response attributed to a backend instance
#[derive(Clone, PartialEq, Eq)]
pub struct Sighting {
    pub index: InstanceIndex,
    pub body: String,
}

impl fmt::Debug for Sighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first_line = self.body.lines().next().unwrap_or_default();
        write!(f, "index {} ({:?})", self.index, first_line)
    }
}

/// Attributes every body a probe returns to an instance index
///
/// A body that does not carry an index is a format violation and aborts the
/// surrounding check; it is never retried.
pub struct Sightings<P> {
    inner: P,
}

impl<P> Sightings<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

#[async_trait]
impl<P> Probe for Sightings<P>
where
    P: Probe<Output = String>,
{
    type Output = Sighting;

    async fn observe(&mut self) -> Result<Sighting, ProbeError> {
        let body = self.inner.observe().await?;
        let index = extract_index(&body)?;
        Ok(Sighting { index, body })
    }
}
