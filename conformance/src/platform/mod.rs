//! Platform adapter
//!
//! Everything the scenarios need from the platform under test: pushing and
//! scaling apps, mapping routes, and the service-broker lifecycle. The suite
//! only consumes these operations; it does not verify how they work.

pub mod cf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use cf::CfCli;

/// Platform operation failures
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("{command} exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Broker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },
}

/// OAuth client the broker asks the platform to register for its dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardClient {
    pub id: String,
    pub secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    pub dashboard_client: DashboardClient,
    pub plans: Vec<ServicePlan>,
}

/// Catalog served by the broker app, posted to its `/config` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerCatalog {
    pub service: ServiceOffering,
}

impl BrokerCatalog {
    /// One service with one plan and a fresh dashboard client
    pub fn new(name: &str, redirect_uri: &str) -> Self {
        let suffix = short_id();
        Self {
            service: ServiceOffering {
                id: Uuid::new_v4().to_string(),
                name: format!("{}-service", name),
                dashboard_client: DashboardClient {
                    id: format!("{}-client-{}", name, suffix),
                    secret: Uuid::new_v4().simple().to_string(),
                    redirect_uri: redirect_uri.to_string(),
                },
                plans: vec![ServicePlan {
                    id: Uuid::new_v4().to_string(),
                    name: format!("{}-plan", name),
                }],
            },
        }
    }

    pub fn dashboard_client(&self) -> &DashboardClient {
        &self.service.dashboard_client
    }

    pub fn service_name(&self) -> &str {
        &self.service.name
    }

    pub fn plan_name(&self) -> Option<&str> {
        self.service.plans.first().map(|plan| plan.name.as_str())
    }
}

/// A broker app and the registration it is (or will be) known by
#[derive(Debug, Clone)]
pub struct Broker {
    /// App name and broker registration name
    pub name: String,
    /// Base URL the platform reaches the broker app at
    pub url: String,
    pub username: String,
    pub password: String,
    pub catalog: BrokerCatalog,
}

/// Service instance GUID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Application and service-broker lifecycle
#[async_trait]
pub trait Platform: Send + Sync {
    /// Push `artifact` as `app`, routed at `<app>.<domain>`
    async fn deploy(
        &self,
        app: &str,
        artifact: &Path,
        buildpack: &str,
        domain: &str,
    ) -> Result<(), PlatformError>;

    async fn scale(&self, app: &str, instances: u32) -> Result<(), PlatformError>;

    /// Route `<host>.<domain><path>` to `app`; `path` is `None` for the root
    async fn map_route(
        &self,
        app: &str,
        domain: &str,
        host: &str,
        path: Option<&str>,
    ) -> Result<(), PlatformError>;

    /// Human-readable app status, logged before teardown
    async fn app_report(&self, app: &str) -> Result<String, PlatformError>;

    /// Delete `app` together with its routes
    async fn delete_app(&self, app: &str) -> Result<(), PlatformError>;

    /// Make the broker app serve `broker.catalog`
    async fn configure_broker(&self, broker: &Broker) -> Result<(), PlatformError>;

    async fn create_broker(&self, broker: &Broker) -> Result<(), PlatformError>;

    /// Re-read the broker catalog (picks up a rotated dashboard client)
    async fn update_broker(&self, broker: &Broker) -> Result<(), PlatformError>;

    async fn delete_broker(&self, name: &str) -> Result<(), PlatformError>;

    async fn publicize_plans(&self, broker: &Broker) -> Result<(), PlatformError>;

    async fn create_service_instance(
        &self,
        broker: &Broker,
        instance: &str,
    ) -> Result<InstanceId, PlatformError>;

    async fn delete_service_instance(&self, instance: &str) -> Result<(), PlatformError>;
}

/// Lowercase prefix plus 8 random hex characters
pub fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix.to_ascii_lowercase(), short_id())
}

fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
