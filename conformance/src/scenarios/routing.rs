//! Routing conformance: session affinity and load distribution
//!
//! All properties are observed through response bodies only. Two responses
//! reporting the same index are assumed to come from the same instance.

use super::{RouteBinding, Scenario, ScenarioContext, Topology};
use crate::config::ConformanceConfig;
use crate::error::{ConformanceError, PollResultExt, ScenarioResult};
use crate::harness::{consistently, eventually, RouteProbe, Sighting, Sightings};
use crate::platform::unique_name;
use async_trait::async_trait;
use common::{extract_index, greeting, greeting_at, CookieJar, InstanceIndex};
use tracing::info;

/// Wait until `app` answers on the route, then read which instance did
async fn await_greeting(
    ctx: &ScenarioContext,
    route: &mut RouteProbe<'_>,
    app: &str,
    property: &str,
) -> ScenarioResult<InstanceIndex> {
    let timeouts = &ctx.config.timeouts;
    let expected = greeting(app);

    let body = eventually(
        route,
        timeouts.convergence(),
        timeouts.poll_interval(),
        |body: &String| body.contains(&expected),
    )
    .await
    .property(property, format!("a body containing {:?}", expected))?;

    Ok(extract_index(&body)?)
}

/// Wait until the route is served by `index` of `app` again
async fn await_instance(
    ctx: &ScenarioContext,
    route: &mut RouteProbe<'_>,
    app: &str,
    index: InstanceIndex,
    property: &str,
) -> ScenarioResult {
    let timeouts = &ctx.config.timeouts;
    let expected = greeting(app);

    eventually(
        &mut Sightings::new(route),
        timeouts.convergence(),
        timeouts.poll_interval(),
        |sighting: &Sighting| sighting.index == index && sighting.body.contains(&expected),
    )
    .await
    .property(property, greeting_at(app, index))?;

    Ok(())
}

fn missing_baseline(scenario: &str) -> ConformanceError {
    ConformanceError::Setup(format!("{}: no baseline instance recorded", scenario))
}

/// With affinity cookies, every request lands on the first instance seen
pub struct StickySessionScenario {
    topology: Topology,
    jar: CookieJar,
    baseline: Option<InstanceIndex>,
}

impl StickySessionScenario {
    pub fn new() -> Self {
        Self {
            topology: Topology::single(&unique_name("sticky"), 3),
            jar: CookieJar::new(),
            baseline: None,
        }
    }

    fn app(&self) -> &str {
        &self.topology.host
    }
}

impl Default for StickySessionScenario {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scenario for StickySessionScenario {
    fn name(&self) -> &str {
        "sticky_sessions"
    }

    fn should_skip(&self, config: &ConformanceConfig) -> bool {
        !config.scenarios.sticky_sessions
    }

    async fn setup(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        self.topology
            .provision(ctx, &ctx.config.assets.sticky_session)
            .await
    }

    async fn probe_baseline(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        let app = self.app().to_string();
        let mut route = RouteProbe::new(&ctx.probe, &app, "/", std::mem::take(&mut self.jar));

        let result = await_greeting(ctx, &mut route, &app, "sticky_sessions.baseline").await;
        self.jar = route.into_jar();

        let index = result?;
        info!(app = %app, index = %index, cookies = self.jar.len(), "📌 pinned to instance");
        self.baseline = Some(index);
        Ok(())
    }

    async fn assert(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        let index = self.baseline.ok_or_else(|| missing_baseline(self.name()))?;
        let app = self.app().to_string();
        let expected = greeting(&app);
        let timeouts = &ctx.config.timeouts;

        let mut sightings = Sightings::new(RouteProbe::new(
            &ctx.probe,
            &app,
            "/",
            std::mem::take(&mut self.jar),
        ));

        let result = consistently(
            &mut sightings,
            timeouts.consistently_window(),
            timeouts.consistently_interval(),
            |sighting: &Sighting| sighting.index == index && sighting.body.contains(&expected),
        )
        .await;
        self.jar = sightings.into_inner().into_jar();

        result.property("sticky_sessions", greeting_at(&app, index))?;
        info!(app = %app, index = %index, "✅ every request stayed on the same instance");
        Ok(())
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        self.jar.clear();
        self.topology.decommission(ctx).await
    }
}

/// Without affinity cookies, requests spread over instances
pub struct RoundRobinScenario {
    topology: Topology,
    baseline: Option<InstanceIndex>,
}

impl RoundRobinScenario {
    pub fn new() -> Self {
        Self {
            topology: Topology::single(&unique_name("round-robin"), 3),
            baseline: None,
        }
    }

    fn app(&self) -> &str {
        &self.topology.host
    }
}

impl Default for RoundRobinScenario {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scenario for RoundRobinScenario {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn should_skip(&self, config: &ConformanceConfig) -> bool {
        !config.scenarios.round_robin
    }

    async fn setup(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        self.topology
            .provision(ctx, &ctx.config.assets.hello_routing)
            .await
    }

    async fn probe_baseline(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        let app = self.app().to_string();
        let mut route = RouteProbe::stateless(&ctx.probe, &app, "/");

        let index = await_greeting(ctx, &mut route, &app, "round_robin.baseline").await?;
        info!(app = %app, index = %index, "first response");
        self.baseline = Some(index);
        Ok(())
    }

    async fn assert(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        let first = self.baseline.ok_or_else(|| missing_baseline(self.name()))?;
        let app = self.app().to_string();
        let timeouts = &ctx.config.timeouts;

        let mut sightings = Sightings::new(RouteProbe::stateless(&ctx.probe, &app, "/"));
        let other = eventually(
            &mut sightings,
            timeouts.convergence(),
            timeouts.poll_interval(),
            |sighting: &Sighting| sighting.index != first,
        )
        .await
        .property("round_robin", format!("an index other than {}", first))?;

        info!(app = %app, first = %first, other = %other.index, "✅ requests reached another instance");
        Ok(())
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        self.topology.decommission(ctx).await
    }
}

/// How two apps share one hostname
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLayout {
    /// `/app1` and `/app2` on a fresh hostname
    ContextPaths,
    /// First app at `/` on its own hostname, second at `/app2`
    RootAndContextPath,
}

/// Two apps behind one hostname keep separate affinity through one jar
pub struct MultiPathScenario {
    layout: PathLayout,
    topology: Topology,
    jar: CookieJar,
    baselines: Vec<InstanceIndex>,
}

impl MultiPathScenario {
    pub fn new(layout: PathLayout) -> Self {
        let app1 = unique_name("app1");
        let app2 = unique_name("app2");

        let (host, app1_path) = match layout {
            PathLayout::ContextPaths => (unique_name("multi-path"), "/app1"),
            PathLayout::RootAndContextPath => (app1.clone(), "/"),
        };

        let binding = |app: String, path: &str| RouteBinding {
            app,
            path: path.to_string(),
            instances: 2,
        };

        Self {
            layout,
            topology: Topology {
                host,
                routes: vec![binding(app1, app1_path), binding(app2, "/app2")],
            },
            jar: CookieJar::new(),
            baselines: Vec::new(),
        }
    }

    pub fn layout(&self) -> PathLayout {
        self.layout
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}

#[async_trait]
impl Scenario for MultiPathScenario {
    fn name(&self) -> &str {
        match self.layout {
            PathLayout::ContextPaths => "context_paths",
            PathLayout::RootAndContextPath => "root_and_context_path",
        }
    }

    fn should_skip(&self, config: &ConformanceConfig) -> bool {
        match self.layout {
            PathLayout::ContextPaths => !config.scenarios.context_paths,
            PathLayout::RootAndContextPath => !config.scenarios.root_and_context_path,
        }
    }

    async fn setup(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        self.topology
            .provision(ctx, &ctx.config.assets.sticky_session)
            .await
    }

    async fn probe_baseline(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        let host = self.topology.host.clone();
        let mut baselines = Vec::with_capacity(self.topology.routes.len());

        for route in &self.topology.routes {
            let mut probe =
                RouteProbe::new(&ctx.probe, &host, &route.path, std::mem::take(&mut self.jar));
            let property = format!("{}.baseline {}", self.name(), route.path);

            let result = await_greeting(ctx, &mut probe, &route.app, &property).await;
            self.jar = probe.into_jar();

            let index = result?;
            info!(app = %route.app, path = %route.path, index = %index, "📌 pinned to instance");
            baselines.push(index);
        }

        self.baselines = baselines;
        Ok(())
    }

    async fn assert(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        if self.baselines.len() != self.topology.routes.len() {
            return Err(missing_baseline(self.name()));
        }

        let host = self.topology.host.clone();
        for (route, index) in self.topology.routes.iter().zip(&self.baselines) {
            let mut probe =
                RouteProbe::new(&ctx.probe, &host, &route.path, std::mem::take(&mut self.jar));
            let property = format!("{} {}", self.name(), route.path);

            let result = await_instance(ctx, &mut probe, &route.app, *index, &property).await;
            self.jar = probe.into_jar();
            result?;
        }

        info!(host = %host, "✅ each path kept its own instance");
        Ok(())
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        self.jar.clear();
        self.topology.decommission(ctx).await
    }
}
