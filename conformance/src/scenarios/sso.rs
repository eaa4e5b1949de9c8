//! Service-broker SSO lifecycle
//!
//! A broker registers a dashboard OAuth client. While the broker exists, a
//! token obtained through that client may act on the user's behalf; once the
//! broker is gone, the client and its tokens must stop working.

use super::{Scenario, ScenarioContext};
use crate::config::ConformanceConfig;
use crate::error::{ConformanceError, PollResultExt, ScenarioResult};
use crate::harness::{eventually, probe_fn, Probe, ProbeError};
use crate::oauth::{AccessToken, OAuthConfig, PermissionCheck, DASHBOARD_SCOPES};
use crate::platform::{unique_name, Broker, BrokerCatalog, InstanceId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Redirect URI registered for every dashboard client
pub const REDIRECT_URI: &str = "http://example.com";

const UNAUTHORIZED: u16 = 401;

/// Which broker lifecycle event is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsoStage {
    /// Token works for a freshly registered broker
    Created,
    /// Token works after the dashboard client id was rotated
    Updated,
    /// Token and client stop working once the broker is deleted
    Deleted,
}

pub struct SsoLifecycleScenario {
    stage: SsoStage,
    broker_name: String,
    instance_name: String,
    app_pushed: bool,
    broker: Option<Broker>,
    registered: bool,
    oauth: Option<OAuthConfig>,
    instance: Option<InstanceId>,
    token: Option<AccessToken>,
}

impl SsoLifecycleScenario {
    pub fn new(stage: SsoStage) -> Self {
        Self {
            stage,
            broker_name: unique_name("broker"),
            instance_name: unique_name("svc"),
            app_pushed: false,
            broker: None,
            registered: false,
            oauth: None,
            instance: None,
            token: None,
        }
    }

    pub fn stage(&self) -> SsoStage {
        self.stage
    }

    fn broker(&self) -> ScenarioResult<&Broker> {
        self.broker
            .as_ref()
            .ok_or_else(|| ConformanceError::Setup(format!("{}: broker not created", self.name())))
    }

    fn oauth_config(&self) -> ScenarioResult<&OAuthConfig> {
        self.oauth
            .as_ref()
            .ok_or_else(|| ConformanceError::Setup(format!("{}: OAuth not configured", self.name())))
    }

    async fn create_instance(&mut self, ctx: &ScenarioContext) -> ScenarioResult<InstanceId> {
        let broker = self.broker()?;
        ctx.platform.publicize_plans(broker).await?;
        let instance = ctx
            .platform
            .create_service_instance(broker, &self.instance_name)
            .await?;

        info!(instance = %self.instance_name, guid = %instance, "🧩 service instance created");
        self.instance = Some(instance.clone());
        Ok(instance)
    }

    /// Log in as the regular user and run the authorization-code flow
    async fn obtain_token(&self, ctx: &ScenarioContext) -> ScenarioResult<AccessToken> {
        let oauth = self.oauth_config()?;
        let platform = &ctx.config.platform;

        let session = ctx
            .oauth
            .authenticate_user(
                &oauth.endpoints.authorization_endpoint,
                &platform.regular_user,
                &platform.regular_password,
            )
            .await?;

        let grant = ctx.oauth.request_scopes(&session, oauth).await?;
        let code = grant.code.ok_or_else(|| {
            ConformanceError::assertion(
                "sso.request_scopes",
                "an authorization code",
                format!("scope request ended with status {}", grant.status),
            )
        })?;

        Ok(ctx.oauth.exchange_token(&code, oauth).await?)
    }

    /// The token may manage the instance
    async fn expect_manage(
        &self,
        ctx: &ScenarioContext,
        token: &AccessToken,
        instance: &InstanceId,
    ) -> ScenarioResult {
        let api = ctx.config.platform.api_url();
        let check = ctx.oauth.check_permission(&api, token, instance).await?;

        if check.status != 200 {
            return Err(ConformanceError::assertion(
                self.name(),
                "status 200 from the permissions endpoint",
                format!("status {}: the provided access token was not valid", check.status),
            ));
        }
        if !check.manage {
            return Err(ConformanceError::assertion(
                self.name(),
                "manage == true",
                "the token may not manage the service instance",
            ));
        }

        info!(instance = %instance, "✅ token can act on the user's behalf");
        Ok(())
    }

    async fn rotate_client(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        let client_id = unique_name("client-id");

        let broker = self
            .broker
            .as_mut()
            .ok_or_else(|| ConformanceError::Setup("broker not created".to_string()))?;
        broker.catalog.service.dashboard_client.id = client_id.clone();
        ctx.platform.configure_broker(broker).await?;
        ctx.platform.update_broker(broker).await?;

        if let Some(oauth) = self.oauth.as_mut() {
            oauth.client_id = client_id.clone();
        }

        info!(client_id = %client_id, "🔁 dashboard client rotated");
        Ok(())
    }

    /// Wait until `token` is rejected by the API
    async fn expect_revoked(
        &self,
        ctx: &ScenarioContext,
        token: AccessToken,
        instance: InstanceId,
    ) -> ScenarioResult {
        let timeouts = &ctx.config.timeouts;
        let api = ctx.config.platform.api_url();
        let oauth = Arc::clone(&ctx.oauth);

        let mut permission: Box<dyn Probe<Output = PermissionCheck>> =
            Box::new(probe_fn(move || {
                let oauth = Arc::clone(&oauth);
                let api = api.clone();
                let token = token.clone();
                let instance = instance.clone();
                async move {
                    oauth
                        .check_permission(&api, &token, &instance)
                        .await
                        .map_err(|e| ProbeError::Unavailable {
                            target: api.clone(),
                            reason: e.to_string(),
                        })
                }
            }));

        eventually(
            &mut *permission,
            timeouts.convergence(),
            timeouts.poll_interval(),
            |check: &PermissionCheck| check.status == UNAUTHORIZED,
        )
        .await
        .property("sso_deleted.token_revoked", "status 401 for the old token")?;

        info!("✅ token rejected after broker deletion");
        Ok(())
    }

    /// A fresh scope request for the deleted client is unauthorized
    async fn expect_client_gone(&self, ctx: &ScenarioContext) -> ScenarioResult {
        let oauth = self.oauth_config()?;
        let platform = &ctx.config.platform;

        let session = ctx
            .oauth
            .authenticate_user(
                &oauth.endpoints.authorization_endpoint,
                &platform.regular_user,
                &platform.regular_password,
            )
            .await?;
        let grant = ctx.oauth.request_scopes(&session, oauth).await?;

        if grant.status != UNAUTHORIZED {
            return Err(ConformanceError::assertion(
                "sso_deleted.client_removed",
                "status 401 for the deleted client",
                format!("status {}", grant.status),
            ));
        }

        info!("✅ deleted dashboard client is unauthorized");
        Ok(())
    }
}

#[async_trait]
impl Scenario for SsoLifecycleScenario {
    fn name(&self) -> &str {
        match self.stage {
            SsoStage::Created => "sso_created",
            SsoStage::Updated => "sso_updated",
            SsoStage::Deleted => "sso_deleted",
        }
    }

    fn should_skip(&self, config: &ConformanceConfig) -> bool {
        !config.scenarios.sso
    }

    async fn setup(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        let platform = &ctx.config.platform;

        ctx.platform
            .deploy(
                &self.broker_name,
                &ctx.config.assets.service_broker,
                &platform.ruby_buildpack_name,
                &platform.apps_domain,
            )
            .await?;
        self.app_pushed = true;

        let scheme = if platform.use_http { "http" } else { "https" };
        let broker = Broker {
            name: self.broker_name.clone(),
            url: format!("{}://{}.{}", scheme, self.broker_name, platform.apps_domain),
            username: platform.broker_username.clone(),
            password: platform.broker_password.clone(),
            catalog: BrokerCatalog::new(&self.broker_name, REDIRECT_URI),
        };
        ctx.platform.configure_broker(&broker).await?;

        let endpoints = ctx.oauth.discover_endpoints(&platform.api_url()).await?;
        let client = broker.catalog.dashboard_client();
        self.oauth = Some(OAuthConfig {
            client_id: client.id.clone(),
            client_secret: client.secret.clone(),
            redirect_uri: client.redirect_uri.clone(),
            requested_scopes: DASHBOARD_SCOPES.to_string(),
            endpoints,
        });

        ctx.platform.create_broker(&broker).await?;
        self.registered = true;
        self.broker = Some(broker);

        info!(broker = %self.broker_name, "🤝 broker registered");
        Ok(())
    }

    async fn probe_baseline(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        match self.stage {
            SsoStage::Created => {
                self.create_instance(ctx).await?;
            }
            SsoStage::Updated => {
                self.rotate_client(ctx).await?;
                self.create_instance(ctx).await?;
            }
            SsoStage::Deleted => {
                // The token has to be valid before deletion for the check to mean anything
                let instance = self.create_instance(ctx).await?;
                let token = self.obtain_token(ctx).await?;
                self.expect_manage(ctx, &token, &instance).await?;
                self.token = Some(token);
            }
        }
        Ok(())
    }

    async fn assert(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        let instance = self
            .instance
            .clone()
            .ok_or_else(|| ConformanceError::Setup("no service instance".to_string()))?;

        match self.stage {
            SsoStage::Created | SsoStage::Updated => {
                let token = self.obtain_token(ctx).await?;
                self.expect_manage(ctx, &token, &instance).await
            }
            SsoStage::Deleted => {
                let token = self
                    .token
                    .clone()
                    .ok_or_else(|| ConformanceError::Setup("no baseline token".to_string()))?;

                // A broker with instances cannot be deleted
                ctx.platform
                    .delete_service_instance(&self.instance_name)
                    .await?;
                self.instance = None;

                ctx.platform.delete_broker(&self.broker_name).await?;
                self.registered = false;
                info!(broker = %self.broker_name, "🗑️  broker deleted");

                self.expect_revoked(ctx, token, instance).await?;
                self.expect_client_gone(ctx).await
            }
        }
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> ScenarioResult {
        let mut failures = Vec::new();

        if self.instance.take().is_some() {
            if let Err(e) = ctx
                .platform
                .delete_service_instance(&self.instance_name)
                .await
            {
                failures.push(format!("service instance {}: {}", self.instance_name, e));
            }
        }

        if self.registered {
            match ctx.platform.delete_broker(&self.broker_name).await {
                Ok(()) => self.registered = false,
                Err(e) => failures.push(format!("broker {}: {}", self.broker_name, e)),
            }
        }

        if self.app_pushed {
            match ctx.platform.app_report(&self.broker_name).await {
                Ok(report) => info!(app = %self.broker_name, "app report:\n{}", report.trim_end()),
                Err(e) => warn!(app = %self.broker_name, error = %e, "app report unavailable"),
            }
            match ctx.platform.delete_app(&self.broker_name).await {
                Ok(()) => self.app_pushed = false,
                Err(e) => failures.push(format!("broker app {}: {}", self.broker_name, e)),
            }
        }

        self.token = None;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConformanceError::Teardown(failures.join("; ")))
        }
    }
}
