//! Conformance scenarios
//!
//! Every scenario walks `SETUP -> PROBE_BASELINE -> ASSERT -> TEARDOWN`.
//! Teardown always runs, whatever happened before it, and a failed teardown
//! fails the scenario.

pub mod routing;
pub mod sso;

use crate::config::ConformanceConfig;
use crate::error::{ConformanceError, ScenarioResult};
use crate::harness::{CookieProbe, ProbeSettings};
use crate::oauth::OAuthDriver;
use crate::platform::Platform;
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub use routing::{MultiPathScenario, PathLayout, RoundRobinScenario, StickySessionScenario};
pub use sso::{SsoLifecycleScenario, SsoStage};

/// Shared, read-only collaborators handed to every scenario
pub struct ScenarioContext {
    pub config: ConformanceConfig,
    pub platform: Arc<dyn Platform>,
    pub oauth: Arc<dyn OAuthDriver>,
    pub probe: CookieProbe,
}

impl ScenarioContext {
    pub fn new(
        config: ConformanceConfig,
        platform: Arc<dyn Platform>,
        oauth: Arc<dyn OAuthDriver>,
    ) -> ScenarioResult<Self> {
        let probe = CookieProbe::new(probe_settings(&config))?;
        Ok(Self {
            config,
            platform,
            oauth,
            probe,
        })
    }
}

pub fn probe_settings(config: &ConformanceConfig) -> ProbeSettings {
    ProbeSettings {
        domain: config.platform.apps_domain.clone(),
        use_http: config.platform.use_http,
        skip_ssl_validation: config.platform.skip_ssl_validation,
        router_address: config.platform.router_address,
        request_timeout: config.timeouts.curl(),
    }
}

/// Scenario state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    ProbeBaseline,
    Assert,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "SETUP",
            Phase::ProbeBaseline => "PROBE_BASELINE",
            Phase::Assert => "ASSERT",
            Phase::Teardown => "TEARDOWN",
        };
        f.write_str(name)
    }
}

/// A conformance scenario
///
/// Phases are called in order and each only once. State needed by a later
/// phase (app names, the cookie jar, baseline indices) lives in the scenario.
#[async_trait]
pub trait Scenario: Send {
    /// Scenario name (for logging and filtering)
    fn name(&self) -> &str;

    /// Whether this scenario should be skipped based on config
    fn should_skip(&self, config: &ConformanceConfig) -> bool;

    async fn setup(&mut self, ctx: &ScenarioContext) -> ScenarioResult;

    async fn probe_baseline(&mut self, ctx: &ScenarioContext) -> ScenarioResult;

    async fn assert(&mut self, ctx: &ScenarioContext) -> ScenarioResult;

    /// Release everything setup created; must tolerate partial setup
    async fn teardown(&mut self, ctx: &ScenarioContext) -> ScenarioResult;
}

#[derive(Debug)]
pub enum Outcome {
    Passed,
    Skipped,
    Failed {
        phase: Phase,
        error: ConformanceError,
    },
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    pub teardown_error: Option<ConformanceError>,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed) && self.teardown_error.is_none()
    }

    pub fn skipped(&self) -> bool {
        matches!(self.outcome, Outcome::Skipped)
    }

    pub fn failed(&self) -> bool {
        !self.passed() && !self.skipped()
    }
}

async fn run_phases(
    scenario: &mut dyn Scenario,
    ctx: &ScenarioContext,
) -> Result<(), (Phase, ConformanceError)> {
    for phase in [Phase::Setup, Phase::ProbeBaseline, Phase::Assert] {
        info!(scenario = scenario.name(), phase = %phase, "entering phase");
        let result = match phase {
            Phase::Setup => scenario.setup(ctx).await,
            Phase::ProbeBaseline => scenario.probe_baseline(ctx).await,
            _ => scenario.assert(ctx).await,
        };
        result.map_err(|error| (phase, error))?;
    }
    Ok(())
}

/// Drive one scenario through all phases
pub async fn run_scenario(scenario: &mut dyn Scenario, ctx: &ScenarioContext) -> ScenarioReport {
    let start = Instant::now();
    let name = scenario.name().to_string();

    let outcome = match run_phases(scenario, ctx).await {
        Ok(()) => Outcome::Passed,
        Err((phase, error)) => {
            error!(scenario = %name, phase = %phase, error = %error, "scenario failed");
            Outcome::Failed { phase, error }
        }
    };

    info!(scenario = %name, phase = %Phase::Teardown, "entering phase");
    let teardown_error = scenario.teardown(ctx).await.err();
    if let Some(error) = &teardown_error {
        warn!(scenario = %name, error = %error, "teardown failed");
    }

    ScenarioReport {
        name,
        outcome,
        teardown_error,
        elapsed: start.elapsed(),
    }
}

fn skipped(name: &str) -> ScenarioReport {
    ScenarioReport {
        name: name.to_string(),
        outcome: Outcome::Skipped,
        teardown_error: None,
        elapsed: Duration::ZERO,
    }
}

/// Run every enabled scenario, sequentially unless `runner.parallel` is set
///
/// Reports come back in the order the scenarios were given.
pub async fn run_all(
    scenarios: &mut [Box<dyn Scenario>],
    ctx: &ScenarioContext,
) -> Vec<ScenarioReport> {
    let focus = ctx.config.runner.focus.as_deref();
    let enabled = |scenario: &dyn Scenario| {
        !scenario.should_skip(&ctx.config)
            && focus.map_or(true, |focus| scenario.name().contains(focus))
    };

    if ctx.config.runner.parallel {
        let runs = scenarios.iter_mut().map(|scenario| async move {
            if enabled(&**scenario) {
                run_scenario(&mut **scenario, ctx).await
            } else {
                skipped(scenario.name())
            }
        });
        return join_all(runs).await;
    }

    let mut reports = Vec::with_capacity(scenarios.len());
    for scenario in scenarios.iter_mut() {
        if !enabled(&**scenario) {
            info!(scenario = scenario.name(), "skipping");
            reports.push(skipped(scenario.name()));
            continue;
        }
        reports.push(run_scenario(&mut **scenario, ctx).await);
    }
    reports
}

/// Every scenario the suite knows about
pub fn all_scenarios() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(StickySessionScenario::new()),
        Box::new(RoundRobinScenario::new()),
        Box::new(MultiPathScenario::new(PathLayout::ContextPaths)),
        Box::new(MultiPathScenario::new(PathLayout::RootAndContextPath)),
        Box::new(SsoLifecycleScenario::new(SsoStage::Created)),
        Box::new(SsoLifecycleScenario::new(SsoStage::Updated)),
        Box::new(SsoLifecycleScenario::new(SsoStage::Deleted)),
    ]
}

/// One app bound to a path on the topology host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub app: String,
    /// `/` for the root route
    pub path: String,
    pub instances: u32,
}

/// Host, path-to-app mapping and instance counts; fixed after setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub host: String,
    pub routes: Vec<RouteBinding>,
}

impl Topology {
    /// One app on its own default route
    pub fn single(app: &str, instances: u32) -> Self {
        Self {
            host: app.to_string(),
            routes: vec![RouteBinding {
                app: app.to_string(),
                path: "/".to_string(),
                instances,
            }],
        }
    }

    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.app.as_str())
    }

    /// Push, scale and route every app of the topology
    pub async fn provision(&self, ctx: &ScenarioContext, artifact: &Path) -> ScenarioResult {
        let platform = &ctx.config.platform;

        for route in &self.routes {
            ctx.platform
                .deploy(
                    &route.app,
                    artifact,
                    &platform.ruby_buildpack_name,
                    &platform.apps_domain,
                )
                .await?;
            ctx.platform.scale(&route.app, route.instances).await?;
        }

        for route in &self.routes {
            // Pushing already created <app>.<domain>/
            if route.app == self.host && route.path == "/" {
                continue;
            }
            let path = (route.path != "/").then_some(route.path.as_str());
            ctx.platform
                .map_route(&route.app, &platform.apps_domain, &self.host, path)
                .await?;
        }

        info!(
            host = %self.host,
            apps = self.routes.len(),
            "🌐 topology provisioned"
        );
        Ok(())
    }

    /// Report and delete every app, attempting all of them
    pub async fn decommission(&self, ctx: &ScenarioContext) -> ScenarioResult {
        let mut failures = Vec::new();

        for app in self.apps() {
            match ctx.platform.app_report(app).await {
                Ok(report) => info!(app = %app, "app report:\n{}", report.trim_end()),
                Err(e) => warn!(app = %app, error = %e, "app report unavailable"),
            }

            if let Err(e) = ctx.platform.delete_app(app).await {
                failures.push(format!("{}: {}", app, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConformanceError::Teardown(failures.join("; ")))
        }
    }
}
