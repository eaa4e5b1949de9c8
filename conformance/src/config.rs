//! Configuration for the conformance suite
//!
//! Loaded from a TOML file (`CONFORMANCE_CONFIG`, default `config.toml`) and
//! then overridden from `CONFORMANCE_*` environment variables.

use crate::error::{ConformanceError, ScenarioResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "CONFORMANCE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level suite configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConformanceConfig {
    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub scenarios: ScenarioToggles,

    #[serde(default)]
    pub assets: AssetConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Target platform and credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    /// API endpoint, with or without scheme (e.g. `api.example.com`)
    #[serde(default)]
    pub api_endpoint: String,

    /// Shared domain app routes are created under
    #[serde(default)]
    pub apps_domain: String,

    #[serde(default = "default_cf_binary")]
    pub cf_binary: String,

    #[serde(default = "default_ruby_buildpack")]
    pub ruby_buildpack_name: String,

    #[serde(default)]
    pub skip_ssl_validation: bool,

    /// Probe apps over plain HTTP
    #[serde(default)]
    pub use_http: bool,

    /// Send every probe to this router address instead of resolving hosts
    #[serde(default)]
    pub router_address: Option<SocketAddr>,

    /// Admin credentials; when unset the CLI session is assumed to be
    /// logged in and targeted already
    #[serde(default)]
    pub admin_user: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub space: Option<String>,

    /// Non-admin user driving the SSO flows
    #[serde(default)]
    pub regular_user: String,
    #[serde(default)]
    pub regular_password: String,

    /// Basic-auth credentials the broker app is registered with
    #[serde(default = "default_broker_username")]
    pub broker_username: String,
    #[serde(default = "default_broker_password")]
    pub broker_password: String,
}

fn default_cf_binary() -> String {
    "cf".to_string()
}

fn default_ruby_buildpack() -> String {
    "ruby_buildpack".to_string()
}

fn default_broker_username() -> String {
    "username".to_string()
}

fn default_broker_password() -> String {
    "password".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_endpoint: String::new(),
            apps_domain: String::new(),
            cf_binary: default_cf_binary(),
            ruby_buildpack_name: default_ruby_buildpack(),
            skip_ssl_validation: false,
            use_http: false,
            router_address: None,
            admin_user: None,
            admin_password: None,
            org: None,
            space: None,
            regular_user: String::new(),
            regular_password: String::new(),
            broker_username: default_broker_username(),
            broker_password: default_broker_password(),
        }
    }
}

impl PlatformConfig {
    /// API base URL, `https://` unless a scheme is given
    pub fn api_url(&self) -> String {
        let endpoint = self.api_endpoint.trim_end_matches('/');
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        }
    }
}

/// Timeouts and polling cadence
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Generic CLI command timeout in seconds (default: 30s)
    #[serde(default = "default_default_secs")]
    pub default_secs: u64,

    /// `cf push` timeout in seconds (default: 120s)
    #[serde(default = "default_push_secs")]
    pub push_secs: u64,

    /// Single probe request timeout in seconds (default: 30s)
    #[serde(default = "default_curl_secs")]
    pub curl_secs: u64,

    /// Bound for `eventually` checks in seconds (default: 120s)
    #[serde(default = "default_convergence_secs")]
    pub convergence_secs: u64,

    /// Interval between `eventually` attempts (default: 1000ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// `consistently` window (default: 3000ms)
    #[serde(default = "default_consistently_window_ms")]
    pub consistently_window_ms: u64,

    /// Interval between `consistently` attempts (default: 500ms)
    #[serde(default = "default_consistently_interval_ms")]
    pub consistently_interval_ms: u64,
}

fn default_default_secs() -> u64 {
    30
}

fn default_push_secs() -> u64 {
    120
}

fn default_curl_secs() -> u64 {
    30
}

fn default_convergence_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_consistently_window_ms() -> u64 {
    3000
}

fn default_consistently_interval_ms() -> u64 {
    500
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_secs: default_default_secs(),
            push_secs: default_push_secs(),
            curl_secs: default_curl_secs(),
            convergence_secs: default_convergence_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            consistently_window_ms: default_consistently_window_ms(),
            consistently_interval_ms: default_consistently_interval_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    pub fn push(&self) -> Duration {
        Duration::from_secs(self.push_secs)
    }

    pub fn curl(&self) -> Duration {
        Duration::from_secs(self.curl_secs)
    }

    pub fn convergence(&self) -> Duration {
        Duration::from_secs(self.convergence_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn consistently_window(&self) -> Duration {
        Duration::from_millis(self.consistently_window_ms)
    }

    pub fn consistently_interval(&self) -> Duration {
        Duration::from_millis(self.consistently_interval_ms)
    }
}

/// Which scenarios run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioToggles {
    #[serde(default = "default_true")]
    pub sticky_sessions: bool,

    #[serde(default = "default_true")]
    pub round_robin: bool,

    #[serde(default = "default_true")]
    pub context_paths: bool,

    #[serde(default = "default_true")]
    pub root_and_context_path: bool,

    /// Needs a regular user and broker registration rights (default: off)
    #[serde(default)]
    pub sso: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScenarioToggles {
    fn default() -> Self {
        Self {
            sticky_sessions: true,
            round_robin: true,
            context_paths: true,
            root_and_context_path: true,
            sso: false,
        }
    }
}

/// Application bits pushed by the scenarios
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetConfig {
    /// App answering `Hello, <app> at index: <n>!` and setting `JSESSIONID`
    #[serde(default = "default_sticky_session")]
    pub sticky_session: PathBuf,

    /// Same greeting without a session cookie
    #[serde(default = "default_hello_routing")]
    pub hello_routing: PathBuf,

    /// Configurable service broker app
    #[serde(default = "default_service_broker")]
    pub service_broker: PathBuf,
}

fn default_sticky_session() -> PathBuf {
    PathBuf::from("assets/sticky-session")
}

fn default_hello_routing() -> PathBuf {
    PathBuf::from("assets/hello-routing")
}

fn default_service_broker() -> PathBuf {
    PathBuf::from("assets/service_broker")
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            sticky_session: default_sticky_session(),
            hello_routing: default_hello_routing(),
            service_broker: default_service_broker(),
        }
    }
}

/// Runner behaviour
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Run scenarios concurrently
    #[serde(default)]
    pub parallel: bool,

    /// Only run scenarios whose name contains this string
    #[serde(default)]
    pub focus: Option<String>,
}

impl ConformanceConfig {
    /// Parse a TOML config file
    pub fn load(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            ConformanceError::Config(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Load from `CONFORMANCE_CONFIG` (or `config.toml`), apply environment
    /// overrides and validate
    ///
    /// A missing default file is not an error: everything can come from the
    /// environment. An explicitly named file must exist.
    pub fn load_from_env() -> ScenarioResult<Self> {
        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH)?,
            Err(_) => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> ScenarioResult<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply `CONFORMANCE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ScenarioResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("CONFORMANCE_API") {
            self.platform.api_endpoint = val;
        }

        if let Some(val) = lookup("CONFORMANCE_APPS_DOMAIN") {
            self.platform.apps_domain = val;
        }

        if let Some(val) = lookup("CONFORMANCE_ROUTER_ADDRESS") {
            let addr = val.parse::<SocketAddr>().map_err(|e| {
                ConformanceError::Config(format!("CONFORMANCE_ROUTER_ADDRESS {:?}: {}", val, e))
            })?;
            self.platform.router_address = Some(addr);
        }

        if let Some(val) = lookup("CONFORMANCE_ADMIN_USER") {
            self.platform.admin_user = Some(val);
        }

        if let Some(val) = lookup("CONFORMANCE_ADMIN_PASSWORD") {
            self.platform.admin_password = Some(val);
        }

        if let Some(val) = lookup("CONFORMANCE_USER") {
            self.platform.regular_user = val;
        }

        if let Some(val) = lookup("CONFORMANCE_PASSWORD") {
            self.platform.regular_password = val;
        }

        if let Some(val) = lookup("CONFORMANCE_SKIP_SSL_VALIDATION") {
            self.platform.skip_ssl_validation = parse_bool("CONFORMANCE_SKIP_SSL_VALIDATION", &val)?;
        }

        if let Some(val) = lookup("CONFORMANCE_USE_HTTP") {
            self.platform.use_http = parse_bool("CONFORMANCE_USE_HTTP", &val)?;
        }

        if let Some(val) = lookup("CONFORMANCE_INCLUDE_SSO") {
            self.scenarios.sso = parse_bool("CONFORMANCE_INCLUDE_SSO", &val)?;
        }

        if let Some(val) = lookup("CONFORMANCE_PARALLEL") {
            self.runner.parallel = parse_bool("CONFORMANCE_PARALLEL", &val)?;
        }

        if let Some(val) = lookup("CONFORMANCE_FOCUS") {
            self.runner.focus = Some(val).filter(|focus| !focus.is_empty());
        }

        Ok(())
    }

    /// Reject configurations no scenario can run with
    pub fn validate(&self) -> ScenarioResult<()> {
        if self.platform.api_endpoint.is_empty() {
            return Err(ConformanceError::Config(
                "platform.api_endpoint is required".to_string(),
            ));
        }

        if self.platform.apps_domain.is_empty() {
            return Err(ConformanceError::Config(
                "platform.apps_domain is required".to_string(),
            ));
        }

        if self.timeouts.poll_interval_ms == 0 || self.timeouts.consistently_interval_ms == 0 {
            return Err(ConformanceError::Config(
                "polling intervals must be non-zero".to_string(),
            ));
        }

        if self.scenarios.sso && self.platform.regular_user.is_empty() {
            return Err(ConformanceError::Config(
                "scenarios.sso requires platform.regular_user".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> ScenarioResult<bool> {
    value
        .trim()
        .parse::<bool>()
        .map_err(|_| ConformanceError::Config(format!("{} must be true or false, got {:?}", key, value)))
}
