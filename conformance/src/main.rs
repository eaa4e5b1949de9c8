use anyhow::{bail, Context, Result};
use conformance::oauth::UaaDriver;
use conformance::platform::CfCli;
use conformance::scenarios::{all_scenarios, run_all, Outcome, ScenarioContext, ScenarioReport};
use conformance::ConformanceConfig;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Routing & SSO conformance runner
///
/// Configuration comes from `CONFORMANCE_CONFIG` (default `config.toml`) plus
/// `CONFORMANCE_*` overrides; log verbosity from `RUST_LOG`.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🧪 Routing & SSO conformance suite");

    let config = ConformanceConfig::load_from_env().context("Failed to load configuration")?;
    info!("   API: {}", config.platform.api_url());
    info!("   Apps domain: {}", config.platform.apps_domain);
    if let Some(router) = config.platform.router_address {
        info!("   Router override: {}", router);
    }

    let cf = CfCli::new(&config.platform, &config.timeouts)?;
    cf.login(&config.platform)
        .await
        .context("Failed to log in to the platform")?;

    let oauth = UaaDriver::new(config.platform.skip_ssl_validation, config.timeouts.curl())?;
    let ctx = ScenarioContext::new(config, Arc::new(cf), Arc::new(oauth))?;

    let mut scenarios = all_scenarios();
    let reports = run_all(&mut scenarios, &ctx).await;

    let failed = print_summary(&reports);
    if failed > 0 {
        bail!("{} scenario(s) failed", failed);
    }

    Ok(())
}

/// Print one line per scenario; returns the number of failures
fn print_summary(reports: &[ScenarioReport]) -> usize {
    let mut passed = 0;
    let mut failed = 0;
    let mut skipped = 0;

    println!();
    for report in reports {
        match &report.outcome {
            Outcome::Skipped => {
                println!("⏭️  Skipped: {}", report.name);
                skipped += 1;
                continue;
            }
            Outcome::Passed if report.teardown_error.is_none() => {
                println!("✅ Passed: {} ({:.1}s)", report.name, report.elapsed.as_secs_f64());
                passed += 1;
                continue;
            }
            Outcome::Passed => {
                eprintln!("❌ Failed: {} (teardown)", report.name);
            }
            Outcome::Failed { phase, error } => {
                eprintln!("❌ Failed: {} in {}", report.name, phase);
                eprintln!("   Error: {}", error);
            }
        }

        if let Some(error) = &report.teardown_error {
            eprintln!("   Teardown: {}", error);
        }
        failed += 1;
    }

    println!("\n📊 Results: {} passed, {} failed, {} skipped", passed, failed, skipped);
    failed
}
