//! Service-broker SSO lifecycle end to end
//!
//! The fake platform registers each broker's dashboard client with the fake
//! UAA, so tokens obtained by the scenario are checked by a real HTTP flow.

use crate::integration::framework::{PASSWORD, USER};
use crate::integration::TestEnv;
use conformance::error::ConformanceError;
use conformance::oauth::{OAuthConfig, OAuthDriver, OAuthError, UaaDriver, DASHBOARD_SCOPES};
use conformance::scenarios::{all_scenarios, Outcome, Phase, SsoLifecycleScenario, SsoStage};
use conformance::{run_all, run_scenario};
use std::time::Duration;

async fn sso_env() -> TestEnv {
    TestEnv::with_config(|config| config.scenarios.sso = true).await
}

fn assert_cleaned_up(env: &TestEnv) {
    assert!(env.uaa.client_ids().is_empty(), "{:?}", env.uaa.client_ids());
    assert!(env.platform.brokers().is_empty());
    assert_eq!(env.platform.instance_count(), 0);
    assert!(env.platform.apps().is_empty());
}

#[tokio::test]
async fn test_token_works_for_created_broker() {
    let env = sso_env().await;

    let mut scenario = SsoLifecycleScenario::new(SsoStage::Created);
    let report = run_scenario(&mut scenario, &env.ctx).await;
    assert!(report.passed(), "{:?}", report);

    assert_eq!(env.uaa.registrations(), 1);
    assert_eq!(env.uaa.issued_tokens(), 0);
    assert!(env
        .platform
        .calls()
        .iter()
        .any(|call| call.ends_with("-p assets/service_broker")));
    assert_cleaned_up(&env);
}

#[tokio::test]
async fn test_token_works_after_client_rotation() {
    let env = sso_env().await;

    let mut scenario = SsoLifecycleScenario::new(SsoStage::Updated);
    let report = run_scenario(&mut scenario, &env.ctx).await;
    assert!(report.passed(), "{:?}", report);

    assert_eq!(env.uaa.registrations(), 2);
    assert!(env
        .platform
        .calls()
        .iter()
        .any(|call| call.starts_with("update-service-broker ")));
    assert_cleaned_up(&env);
}

#[tokio::test]
async fn test_token_revoked_with_deleted_broker() {
    let env = sso_env().await;

    let mut scenario = SsoLifecycleScenario::new(SsoStage::Deleted);
    let report = run_scenario(&mut scenario, &env.ctx).await;
    assert!(report.passed(), "{:?}", report);

    // Instance goes first; a broker with instances cannot be deleted
    let calls = env.platform.calls();
    let instance_deleted = calls.iter().position(|c| c.starts_with("delete-service "));
    let broker_deleted = calls.iter().position(|c| c.starts_with("delete-service-broker "));
    assert!(instance_deleted < broker_deleted, "{:?}", calls);
    assert_eq!(
        calls
            .iter()
            .filter(|c| c.starts_with("delete-service-broker "))
            .count(),
        1
    );
    assert_cleaned_up(&env);
}

#[tokio::test]
async fn test_surviving_token_fails_deleted_stage() {
    let env = TestEnv::with_config(|config| {
        config.scenarios.sso = true;
        config.timeouts.convergence_secs = 1;
    })
    .await;
    env.platform.keep_clients_on_delete();

    let mut scenario = SsoLifecycleScenario::new(SsoStage::Deleted);
    let report = run_scenario(&mut scenario, &env.ctx).await;

    match &report.outcome {
        Outcome::Failed {
            phase: Phase::Assert,
            error: ConformanceError::Assertion { property, .. },
        } => assert_eq!(property, "sso_deleted.token_revoked"),
        other => panic!("expected token_revoked to fail, got {:?}", other),
    }
    assert!(report.teardown_error.is_none(), "{:?}", report);
}

#[tokio::test]
async fn test_broker_failure_in_setup_cleans_up_app() {
    let env = sso_env().await;
    env.platform.fail_on("create_broker");

    let mut scenario = SsoLifecycleScenario::new(SsoStage::Created);
    let report = run_scenario(&mut scenario, &env.ctx).await;

    assert!(matches!(
        report.outcome,
        Outcome::Failed {
            phase: Phase::Setup,
            error: ConformanceError::Platform(_),
        }
    ));
    assert!(report.teardown_error.is_none(), "{:?}", report);
    assert!(!env
        .platform
        .calls()
        .iter()
        .any(|call| call.starts_with("delete-service-broker ")));
    assert_cleaned_up(&env);
}

#[tokio::test]
async fn test_sso_skipped_unless_enabled() {
    let env = TestEnv::with_config(|config| config.runner.focus = Some("sso".to_string())).await;

    let mut scenarios = all_scenarios();
    let reports = run_all(&mut scenarios, &env.ctx).await;

    assert!(reports.iter().all(|r| r.skipped()), "{:?}", reports);
    assert!(env.platform.calls().is_empty());
}

#[tokio::test]
async fn test_driver_rejects_wrong_password() {
    let env = sso_env().await;
    let driver = UaaDriver::new(false, Duration::from_secs(5)).unwrap();

    let err = driver
        .authenticate_user(&env.uaa.base_url(), USER, "wrong")
        .await
        .expect_err("login should fail");
    assert!(matches!(err, OAuthError::MissingSessionCookie { .. }), "{}", err);

    driver
        .authenticate_user(&env.uaa.base_url(), USER, PASSWORD)
        .await
        .expect("login should succeed");
}

#[tokio::test]
async fn test_driver_remembers_approval() {
    let env = sso_env().await;
    env.uaa
        .register_client("dashboard", "s3cret", "http://example.com");
    let driver = UaaDriver::new(false, Duration::from_secs(5)).unwrap();

    let endpoints = driver
        .discover_endpoints(&env.uaa.base_url())
        .await
        .expect("info endpoint");
    assert_eq!(endpoints.authorization_endpoint, env.uaa.base_url());

    let config = OAuthConfig {
        client_id: "dashboard".to_string(),
        client_secret: "s3cret".to_string(),
        redirect_uri: "http://example.com".to_string(),
        requested_scopes: DASHBOARD_SCOPES.to_string(),
        endpoints,
    };
    let session = driver
        .authenticate_user(&config.endpoints.authorization_endpoint, USER, PASSWORD)
        .await
        .unwrap();

    // First request needs the approval form, the second is granted directly
    for _ in 0..2 {
        let grant = driver.request_scopes(&session, &config).await.unwrap();
        assert_eq!(grant.status, 302);
        let code = grant.code.expect("authorization code");
        driver.exchange_token(&code, &config).await.expect("token");
    }
    assert_eq!(env.uaa.issued_tokens(), 2);

    let wrong_secret = OAuthConfig {
        client_secret: "nope".to_string(),
        ..config.clone()
    };
    let grant = driver.request_scopes(&session, &config).await.unwrap();
    let err = driver
        .exchange_token(&grant.code.unwrap(), &wrong_secret)
        .await
        .expect_err("bad secret");
    assert!(matches!(err, OAuthError::Status { status: 401, .. }), "{}", err);
}
