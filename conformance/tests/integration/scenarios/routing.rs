//! Routing scenarios end to end
//!
//! Affinity, round-robin and context-path routing through the fake router.

use crate::integration::TestEnv;
use conformance::error::ConformanceError;
use conformance::scenarios::{
    all_scenarios, MultiPathScenario, Outcome, PathLayout, Phase, RoundRobinScenario,
    StickySessionScenario,
};
use conformance::{run_all, run_scenario, Scenario};

#[tokio::test]
async fn test_sticky_sessions_hold_affinity() {
    let env = TestEnv::start().await;
    env.router.start_at(2);

    let mut scenario = StickySessionScenario::new();
    let report = run_scenario(&mut scenario, &env.ctx).await;
    assert!(report.passed(), "{:?}", report);

    let served = env.router.served();
    // One baseline request plus a 3s window sampled every 500ms
    assert!(served.len() >= 7, "only {} requests", served.len());
    assert!(served.iter().all(|s| s.index == 2));
    assert!(served[0].cookie.is_none());
    for request in &served[1..] {
        let cookie = request.cookie.as_deref().unwrap_or_default();
        assert!(cookie.contains(&format!("__VCAP_ID__={}-2", request.app)));
    }

    let app = &served[0].app;
    assert!(env.platform.called(&format!("scale {} -i 3", app)));
    assert!(env.platform.called(&format!("delete {}", app)));
    assert!(env.platform.apps().is_empty());
    assert!(!env.router.has_app(app));
}

#[tokio::test]
async fn test_lost_affinity_fails_assert() {
    let env = TestEnv::start().await;
    env.router.ignore_affinity(true);

    let mut scenario = StickySessionScenario::new();
    let report = run_scenario(&mut scenario, &env.ctx).await;

    match &report.outcome {
        Outcome::Failed {
            phase: Phase::Assert,
            error: ConformanceError::Assertion { property, .. },
        } => assert_eq!(property, "sticky_sessions"),
        other => panic!("expected an assertion failure, got {:?}", other),
    }

    // Teardown still ran
    assert!(report.teardown_error.is_none());
    assert!(env.platform.apps().is_empty());
}

#[tokio::test]
async fn test_round_robin_reaches_another_instance() {
    let env = TestEnv::with_config(|config| {
        config.timeouts.convergence_secs = 120;
        config.timeouts.poll_interval_ms = 1000;
    })
    .await;

    let mut scenario = RoundRobinScenario::new();
    let report = run_scenario(&mut scenario, &env.ctx).await;
    assert!(report.passed(), "{:?}", report);

    let served = env.router.served();
    assert_eq!(served.len(), 2);
    assert_ne!(served[0].index, served[1].index);
    assert!(served.iter().all(|s| s.cookie.is_none()));
    assert!(env
        .platform
        .calls()
        .iter()
        .any(|call| call.ends_with("-p assets/hello-routing")));
}

#[tokio::test]
async fn test_context_paths_keep_separate_affinity() {
    let env = TestEnv::start().await;

    let mut scenario = MultiPathScenario::new(PathLayout::ContextPaths);
    let host = scenario.topology().host.clone();
    let apps: Vec<String> = scenario.topology().apps().map(str::to_string).collect();

    let report = run_scenario(&mut scenario, &env.ctx).await;
    assert!(report.passed(), "{:?}", report);

    for (app, path) in apps.iter().zip(["/app1", "/app2"]) {
        let served = env.router.served_by(app);
        assert_eq!(served.len(), 2, "{} served {:?}", app, served);
        assert!(served.iter().all(|s| s.path == path));
        assert!(served.iter().all(|s| s.host == format!("{}.apps.test", host)));
        assert_eq!(served[0].index, served[1].index);
    }
    assert!(env
        .platform
        .called(&format!("map-route {} apps.test --hostname {} --path /app1", apps[0], host)));
}

#[tokio::test]
async fn test_root_and_context_path_share_one_jar() {
    let env = TestEnv::start().await;

    let mut scenario = MultiPathScenario::new(PathLayout::RootAndContextPath);
    let apps: Vec<String> = scenario.topology().apps().map(str::to_string).collect();

    let report = run_scenario(&mut scenario, &env.ctx).await;
    assert!(report.passed(), "{:?}", report);

    // The root route is the one created by the push
    assert!(!env.platform.calls().iter().any(|call| call
        .starts_with(&format!("map-route {} ", apps[0]))));

    let app2 = env.router.served_by(&apps[1]);
    let last = app2.last().and_then(|s| s.cookie.clone()).unwrap_or_default();
    assert_eq!(last.matches("__VCAP_ID__=").count(), 2, "sent: {}", last);
    assert_eq!(app2[0].index, app2[app2.len() - 1].index);
}

#[tokio::test]
async fn test_body_without_index_aborts_baseline() {
    let env = TestEnv::start().await;
    env.router.omit_index(true);

    let mut scenario = StickySessionScenario::new();
    let report = run_scenario(&mut scenario, &env.ctx).await;

    assert!(
        matches!(
            report.outcome,
            Outcome::Failed {
                phase: Phase::ProbeBaseline,
                error: ConformanceError::Format(_),
            }
        ),
        "{:?}",
        report
    );
    assert_eq!(env.router.served().len(), 1);
}

#[tokio::test]
async fn test_failed_teardown_fails_passing_scenario() {
    let env = TestEnv::start().await;
    env.platform.fail_on("delete_app");

    let mut scenario = RoundRobinScenario::new();
    let report = run_scenario(&mut scenario, &env.ctx).await;

    assert!(matches!(report.outcome, Outcome::Passed));
    assert!(matches!(report.teardown_error, Some(ConformanceError::Teardown(_))));
    assert!(report.failed());
}

#[tokio::test]
async fn test_setup_failure_still_tears_down() {
    let env = TestEnv::start().await;
    env.platform.fail_on("scale");

    let mut scenario = StickySessionScenario::new();
    let report = run_scenario(&mut scenario, &env.ctx).await;

    assert!(matches!(
        report.outcome,
        Outcome::Failed {
            phase: Phase::Setup,
            error: ConformanceError::Platform(_),
        }
    ));
    assert!(env.router.served().is_empty());
    assert!(env.platform.apps().is_empty());
}

#[tokio::test]
async fn test_focus_runs_matching_scenarios_only() {
    let env = TestEnv::with_config(|config| {
        config.runner.focus = Some("round_robin".to_string());
    })
    .await;

    let mut scenarios = all_scenarios();
    let reports = run_all(&mut scenarios, &env.ctx).await;

    assert_eq!(reports.len(), scenarios.len());
    for report in &reports {
        if report.name == "round_robin" {
            assert!(report.passed(), "{:?}", report);
        } else {
            assert!(report.skipped(), "{:?}", report);
        }
    }
}

#[tokio::test]
async fn test_parallel_routing_scenarios() {
    let env = TestEnv::with_config(|config| config.runner.parallel = true).await;

    let mut scenarios: Vec<Box<dyn Scenario>> = vec![
        Box::new(StickySessionScenario::new()),
        Box::new(RoundRobinScenario::new()),
        Box::new(MultiPathScenario::new(PathLayout::ContextPaths)),
        Box::new(MultiPathScenario::new(PathLayout::RootAndContextPath)),
    ];
    let reports = run_all(&mut scenarios, &env.ctx).await;

    let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["sticky_sessions", "round_robin", "context_paths", "root_and_context_path"]
    );
    assert!(reports.iter().all(|r| r.passed()), "{:?}", reports);
    assert!(env.platform.apps().is_empty());
}
