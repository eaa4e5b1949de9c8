//! `cf` CLI driven platform adapter

use super::{Broker, InstanceId, Platform, PlatformError};
use crate::config::{PlatformConfig, TimeoutConfig};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs `cf` subcommands, each bounded by its own timeout
pub struct CfCli {
    binary: String,
    timeouts: TimeoutConfig,
    http: reqwest::Client,
}

impl CfCli {
    pub fn new(platform: &PlatformConfig, timeouts: &TimeoutConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(timeouts.curl())
            .danger_accept_invalid_certs(platform.skip_ssl_validation)
            .build()?;

        Ok(Self {
            binary: platform.cf_binary.clone(),
            timeouts: timeouts.clone(),
            http,
        })
    }

    /// Point the CLI at the API and log in, when admin credentials are set
    pub async fn login(&self, platform: &PlatformConfig) -> Result<(), PlatformError> {
        let (Some(user), Some(password)) = (&platform.admin_user, &platform.admin_password) else {
            info!("No admin credentials configured, using the current cf session");
            return Ok(());
        };

        let api = platform.api_url();
        let mut api_args = vec!["api", api.as_str()];
        if platform.skip_ssl_validation {
            api_args.push("--skip-ssl-validation");
        }
        self.run(&api_args).await?;
        self.run(&["auth", user.as_str(), password.as_str()]).await?;

        if let (Some(org), Some(space)) = (&platform.org, &platform.space) {
            self.run(&["target", "-o", org.as_str(), "-s", space.as_str()]).await?;
        }

        info!("🔐 Logged in to {} as {}", api, user);
        Ok(())
    }

    async fn run(&self, args: &[&str]) -> Result<String, PlatformError> {
        self.run_with_timeout(args, self.timeouts.default_timeout())
            .await
    }

    async fn run_with_timeout(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, PlatformError> {
        let command = describe(&self.binary, args);
        debug!(command = %command, timeout_secs = timeout.as_secs(), "running");

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(result) => result.map_err(|source| PlatformError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => return Err(PlatformError::TimedOut { command, timeout }),
        };

        if !output.status.success() {
            return Err(PlatformError::CommandFailed {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Printable command line with credentials masked
fn describe(binary: &str, args: &[&str]) -> String {
    match args.first() {
        Some(&"auth") => format!("{} auth <redacted>", binary),
        Some(&"create-service-broker") | Some(&"update-service-broker") => {
            let name = args.get(1).copied().unwrap_or_default();
            format!("{} {} {} <redacted>", binary, args[0], name)
        }
        _ => format!("{} {}", binary, args.join(" ")),
    }
}

#[async_trait]
impl Platform for CfCli {
    async fn deploy(
        &self,
        app: &str,
        artifact: &Path,
        buildpack: &str,
        domain: &str,
    ) -> Result<(), PlatformError> {
        let artifact = artifact.to_string_lossy().into_owned();
        self.run_with_timeout(
            &["push", app, "-b", buildpack, "-p", artifact.as_str(), "-d", domain],
            self.timeouts.push(),
        )
        .await?;
        info!("📦 Pushed {}", app);
        Ok(())
    }

    async fn scale(&self, app: &str, instances: u32) -> Result<(), PlatformError> {
        let instances = instances.to_string();
        self.run(&["scale", app, "-i", instances.as_str()]).await?;
        Ok(())
    }

    async fn map_route(
        &self,
        app: &str,
        domain: &str,
        host: &str,
        path: Option<&str>,
    ) -> Result<(), PlatformError> {
        let mut args = vec!["map-route", app, domain, "--hostname", host];
        if let Some(path) = path {
            args.extend(["--path", path]);
        }
        self.run(&args).await?;
        Ok(())
    }

    async fn app_report(&self, app: &str) -> Result<String, PlatformError> {
        self.run(&["app", app]).await
    }

    async fn delete_app(&self, app: &str) -> Result<(), PlatformError> {
        self.run(&["delete", app, "-f", "-r"]).await?;
        Ok(())
    }

    async fn configure_broker(&self, broker: &Broker) -> Result<(), PlatformError> {
        let url = format!("{}/config", broker.url.trim_end_matches('/'));
        self.http
            .post(&url)
            .json(&broker.catalog)
            .send()
            .await?
            .error_for_status()?;
        debug!(broker = %broker.name, url = %url, "broker catalog configured");
        Ok(())
    }

    async fn create_broker(&self, broker: &Broker) -> Result<(), PlatformError> {
        self.run(&[
            "create-service-broker",
            broker.name.as_str(),
            broker.username.as_str(),
            broker.password.as_str(),
            broker.url.as_str(),
        ])
        .await?;
        Ok(())
    }

    async fn update_broker(&self, broker: &Broker) -> Result<(), PlatformError> {
        self.run(&[
            "update-service-broker",
            broker.name.as_str(),
            broker.username.as_str(),
            broker.password.as_str(),
            broker.url.as_str(),
        ])
        .await?;
        Ok(())
    }

    async fn delete_broker(&self, name: &str) -> Result<(), PlatformError> {
        self.run(&["delete-service-broker", name, "-f"]).await?;
        Ok(())
    }

    async fn publicize_plans(&self, broker: &Broker) -> Result<(), PlatformError> {
        self.run(&["enable-service-access", broker.catalog.service_name()])
            .await?;
        Ok(())
    }

    async fn create_service_instance(
        &self,
        broker: &Broker,
        instance: &str,
    ) -> Result<InstanceId, PlatformError> {
        let plan = broker
            .catalog
            .plan_name()
            .ok_or_else(|| PlatformError::UnexpectedOutput {
                command: "create-service".to_string(),
                output: format!("broker {} has no plans", broker.name),
            })?;

        self.run(&[
            "create-service",
            broker.catalog.service_name(),
            plan,
            instance,
        ])
        .await?;

        let output = self.run(&["service", instance, "--guid"]).await?;
        let guid = output.trim();
        if guid.is_empty() || guid.contains(char::is_whitespace) {
            return Err(PlatformError::UnexpectedOutput {
                command: describe(&self.binary, &["service", instance, "--guid"]),
                output,
            });
        }

        Ok(InstanceId(guid.to_string()))
    }

    async fn delete_service_instance(&self, instance: &str) -> Result<(), PlatformError> {
        self.run(&["delete-service", instance, "-f"]).await?;
        Ok(())
    }
}
