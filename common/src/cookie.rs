//! Cookie jar with RFC 6265 scoping
//!
//! Cookies are keyed by (domain, path, name), so two apps sharing a hostname
//! under different paths keep separate affinity cookies. The jar is mutated
//! only by `Set-Cookie` headers and read only when building a request.
//!
//! Parsing, domain and path matching, and expiry are handled by
//! [`cookie_store`]; this module adapts it to the probe's host + path
//! addressing and to owned, by-value jar threading.

use cookie_store::CookieStore;
use std::cmp::Reverse;
use url::Url;

pub use cookie_store::Cookie;

/// Where a request is going, as far as cookie scoping is concerned
///
/// The host is the logical one (the `Host` header), which may differ from
/// the address the request is actually sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    url: Url,
}

impl RequestTarget {
    /// Scope for `host` + `path`; any port, query or fragment is ignored
    pub fn new(host: &str, path: &str, secure: bool) -> Result<Self, url::ParseError> {
        let scheme = if secure { "https" } else { "http" };
        let separator = if path.starts_with('/') { "" } else { "/" };
        let url = Url::parse(&format!("{}://{}{}{}", scheme, host, separator, path))?;
        Ok(Self::from(url))
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl From<Url> for RequestTarget {
    fn from(mut url: Url) -> Self {
        url.set_query(None);
        url.set_fragment(None);
        Self { url }
    }
}

/// Session cookie store for one simulated client
///
/// Owned by exactly one scenario. Probes take the jar by value and hand the
/// updated jar back, so it can never be mutated from two places at once.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    store: CookieStore,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired cookies
    pub fn len(&self) -> usize {
        self.store.iter_unexpired().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie<'static>> {
        self.store.iter_unexpired()
    }

    /// First unexpired cookie called `name`, whatever its scope
    pub fn get(&self, name: &str) -> Option<&Cookie<'static>> {
        self.iter().find(|cookie| cookie.name() == name)
    }

    /// Merge one `Set-Cookie` header; returns false if it was ignored
    ///
    /// A header that expires a stored cookie removes it and counts as merged.
    pub fn store(&mut self, target: &RequestTarget, header: &str) -> bool {
        match ::cookie::Cookie::parse(header) {
            Ok(raw) => self.store.insert_raw(&raw, target.url()).is_ok(),
            Err(_) => false,
        }
    }

    /// Merge every `Set-Cookie` header of a response; returns how many were kept
    pub fn store_all<'h, I>(&mut self, target: &RequestTarget, headers: I) -> usize
    where
        I: IntoIterator<Item = &'h str>,
    {
        headers
            .into_iter()
            .filter(|header| self.store(target, header))
            .count()
    }

    /// Cookies to send to `target`: longest path first, then oldest first
    pub fn matching(&self, target: &RequestTarget) -> Vec<&Cookie<'static>> {
        let mut cookies = self.store.matches(target.url());
        cookies.sort_by_key(|cookie| {
            let path: &str = cookie.path.as_ref();
            Reverse(path.len())
        });
        cookies
    }

    /// `Cookie` request header for `target`, if anything is in scope
    pub fn cookie_header(&self, target: &RequestTarget) -> Option<String> {
        let cookies = self.matching(target);
        if cookies.is_empty() {
            return None;
        }

        Some(
            cookies
                .iter()
                .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }
}
