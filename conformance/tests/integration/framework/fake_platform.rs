//! In-memory platform wired to the fake router and UAA
//!
//! Pushing an app puts it behind the router; registering a broker registers
//! its dashboard client with the UAA. Every call is recorded so tests can
//! check what a scenario asked for, and any operation can be made to fail.

use super::fake_router::FakeRouter;
use super::fake_uaa::FakeUaa;
use async_trait::async_trait;
use conformance::platform::{Broker, BrokerCatalog, InstanceId, Platform, PlatformError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Default)]
struct PlatformState {
    apps: HashSet<String>,
    /// broker app -> catalog it serves
    catalogs: HashMap<String, BrokerCatalog>,
    /// registered broker -> dashboard client id
    brokers: HashMap<String, String>,
    public_services: HashSet<String>,
    /// instance name -> (broker, guid)
    instances: HashMap<String, (String, InstanceId)>,
    failing: HashSet<String>,
    keep_clients_on_delete: bool,
    calls: Vec<String>,
}

pub struct FakePlatform {
    router: Arc<FakeRouter>,
    uaa: Arc<FakeUaa>,
    sticky_artifact: PathBuf,
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new(router: Arc<FakeRouter>, uaa: Arc<FakeUaa>, sticky_artifact: &Path) -> Self {
        Self {
            router,
            uaa,
            sticky_artifact: sticky_artifact.to_path_buf(),
            state: Mutex::new(PlatformState::default()),
        }
    }

    /// Make every later call of `operation` fail
    pub fn fail_on(&self, operation: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(operation.to_string());
    }

    /// Deleting a broker leaves its dashboard client registered
    pub fn keep_clients_on_delete(&self) {
        self.state.lock().unwrap().keep_clients_on_delete = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    pub fn apps(&self) -> Vec<String> {
        let mut apps: Vec<String> = self.state.lock().unwrap().apps.iter().cloned().collect();
        apps.sort();
        apps
    }

    pub fn brokers(&self) -> Vec<String> {
        self.state.lock().unwrap().brokers.keys().cloned().collect()
    }

    pub fn instance_count(&self) -> usize {
        self.state.lock().unwrap().instances.len()
    }

    /// Record `call`, failing it when its operation was marked
    fn record(&self, operation: &str, call: String) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());

        if state.failing.contains(operation) {
            return Err(PlatformError::CommandFailed {
                command: call,
                status: 1,
                stderr: "FAILED (injected)".to_string(),
            });
        }
        Ok(())
    }
}

fn not_found(command: String, what: &str) -> PlatformError {
    PlatformError::CommandFailed {
        command,
        status: 1,
        stderr: format!("{} not found", what),
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn deploy(
        &self,
        app: &str,
        artifact: &Path,
        buildpack: &str,
        domain: &str,
    ) -> Result<(), PlatformError> {
        self.record(
            "deploy",
            format!("push {} -b {} -p {}", app, buildpack, artifact.display()),
        )?;

        self.router.add_app(app, artifact == self.sticky_artifact);
        self.router
            .add_route(&format!("{}.{}", app, domain), "/", app);
        self.state.lock().unwrap().apps.insert(app.to_string());
        Ok(())
    }

    async fn scale(&self, app: &str, instances: u32) -> Result<(), PlatformError> {
        let call = format!("scale {} -i {}", app, instances);
        self.record("scale", call.clone())?;

        if !self.router.set_instances(app, instances) {
            return Err(not_found(call, "app"));
        }
        Ok(())
    }

    async fn map_route(
        &self,
        app: &str,
        domain: &str,
        host: &str,
        path: Option<&str>,
    ) -> Result<(), PlatformError> {
        let path = path.unwrap_or("/");
        let call = format!("map-route {} {} --hostname {} --path {}", app, domain, host, path);
        self.record("map_route", call.clone())?;

        if !self.router.has_app(app) {
            return Err(not_found(call, "app"));
        }
        self.router
            .add_route(&format!("{}.{}", host, domain), path, app);
        Ok(())
    }

    async fn app_report(&self, app: &str) -> Result<String, PlatformError> {
        self.record("app_report", format!("app {}", app))?;
        Ok(format!("name: {}\nrequested state: started\n", app))
    }

    async fn delete_app(&self, app: &str) -> Result<(), PlatformError> {
        self.record("delete_app", format!("delete {}", app))?;

        self.router.remove_app(app);
        let mut state = self.state.lock().unwrap();
        state.apps.remove(app);
        state.catalogs.remove(app);
        Ok(())
    }

    async fn configure_broker(&self, broker: &Broker) -> Result<(), PlatformError> {
        let call = format!("POST {}/config", broker.url);
        self.record("configure_broker", call.clone())?;

        let mut state = self.state.lock().unwrap();
        if !state.apps.contains(&broker.name) {
            return Err(not_found(call, "broker app"));
        }
        state
            .catalogs
            .insert(broker.name.clone(), broker.catalog.clone());
        Ok(())
    }

    async fn create_broker(&self, broker: &Broker) -> Result<(), PlatformError> {
        let call = format!("create-service-broker {} {}", broker.name, broker.url);
        self.record("create_broker", call.clone())?;

        let client = {
            let mut state = self.state.lock().unwrap();
            let Some(catalog) = state.catalogs.get(&broker.name) else {
                return Err(not_found(call, "catalog"));
            };
            let client = catalog.dashboard_client().clone();
            state.brokers.insert(broker.name.clone(), client.id.clone());
            client
        };

        self.uaa
            .register_client(&client.id, &client.secret, &client.redirect_uri);
        Ok(())
    }

    async fn update_broker(&self, broker: &Broker) -> Result<(), PlatformError> {
        let call = format!("update-service-broker {} {}", broker.name, broker.url);
        self.record("update_broker", call.clone())?;

        let (old, client) = {
            let mut state = self.state.lock().unwrap();
            let Some(catalog) = state.catalogs.get(&broker.name) else {
                return Err(not_found(call, "catalog"));
            };
            let client = catalog.dashboard_client().clone();
            let Some(old) = state.brokers.insert(broker.name.clone(), client.id.clone()) else {
                return Err(not_found(call, "broker"));
            };
            (old, client)
        };

        if old != client.id {
            self.uaa.remove_client(&old);
        }
        self.uaa
            .register_client(&client.id, &client.secret, &client.redirect_uri);
        Ok(())
    }

    async fn delete_broker(&self, name: &str) -> Result<(), PlatformError> {
        let call = format!("delete-service-broker {} -f", name);
        self.record("delete_broker", call.clone())?;

        let (client_id, keep) = {
            let mut state = self.state.lock().unwrap();
            if state.instances.values().any(|(broker, _)| broker == name) {
                return Err(PlatformError::CommandFailed {
                    command: call,
                    status: 1,
                    stderr: "Can not remove brokers that have associated service instances"
                        .to_string(),
                });
            }
            let Some(client_id) = state.brokers.remove(name) else {
                return Err(not_found(call, "broker"));
            };
            (client_id, state.keep_clients_on_delete)
        };

        if !keep {
            self.uaa.remove_client(&client_id);
        }
        Ok(())
    }

    async fn publicize_plans(&self, broker: &Broker) -> Result<(), PlatformError> {
        let service = broker.catalog.service_name().to_string();
        self.record("publicize_plans", format!("enable-service-access {}", service))?;

        self.state.lock().unwrap().public_services.insert(service);
        Ok(())
    }

    async fn create_service_instance(
        &self,
        broker: &Broker,
        instance: &str,
    ) -> Result<InstanceId, PlatformError> {
        let service = broker.catalog.service_name().to_string();
        let call = format!("create-service {} {}", service, instance);
        self.record("create_service_instance", call.clone())?;

        let guid = InstanceId(Uuid::new_v4().to_string());
        {
            let mut state = self.state.lock().unwrap();
            if !state.brokers.contains_key(&broker.name) {
                return Err(not_found(call, "broker"));
            }
            if !state.public_services.contains(&service) {
                return Err(PlatformError::CommandFailed {
                    command: call,
                    status: 1,
                    stderr: format!("Service offering {} not available", service),
                });
            }
            state
                .instances
                .insert(instance.to_string(), (broker.name.clone(), guid.clone()));
        }

        self.uaa.add_instance(guid.as_str());
        Ok(guid)
    }

    async fn delete_service_instance(&self, instance: &str) -> Result<(), PlatformError> {
        let call = format!("delete-service {} -f", instance);
        self.record("delete_service_instance", call.clone())?;

        let removed = self.state.lock().unwrap().instances.remove(instance);
        let Some((_, guid)) = removed else {
            return Err(not_found(call, "service instance"));
        };

        self.uaa.remove_instance(guid.as_str());
        Ok(())
    }
}
