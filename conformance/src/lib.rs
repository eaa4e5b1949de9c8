//! Routing and service-broker SSO conformance suite
//!
//! Black-box checks against a deployed platform: which backend instance
//! answers a request, whether session affinity holds, and whether a
//! dashboard client's token stays valid across the broker lifecycle.
//!
//! The core is the convergence harness in [`harness`]: a cookie-keeping
//! HTTP probe plus `eventually` / `consistently` polling.

pub mod config;
pub mod error;
pub mod harness;
pub mod oauth;
pub mod platform;
pub mod scenarios;

pub use config::ConformanceConfig;
pub use error::{ConformanceError, PollResultExt, ScenarioResult};
pub use scenarios::{run_all, run_scenario, Scenario, ScenarioContext, ScenarioReport};
