//! Scenario environment: owns the apps and shared resources of one scenario and
//! hands them to the scheduler for a run.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentsim_apps::browser::BrowserSession;
use agentsim_apps::{App, AppSnapshot, AsyncResource, ManagedResource, ResourceLease};
use agentsim_core_types::{AppName, SimError, SimResult};
use agentsim_event_graph::{EventGraph, GraphBuilder};
use agentsim_registry::{AccessKind, CapabilityRegistry};
use agentsim_scheduler::{Agent, AppTable, RunReport, Scheduler, SchedulerConfig};
use agentsim_state_center::{
    InMemoryStateCenter, LifecycleAction, LifecycleEvent, StateCenter, StateEvent,
};

use crate::config::Config;
use crate::errors::EnvironmentError;

/// Serializable copy of every app's state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub apps: Vec<AppSnapshot>,
}

impl EnvSnapshot {
    pub fn app(&self, name: &str) -> Option<&AppSnapshot> {
        self.apps.iter().find(|snapshot| snapshot.app.as_str() == name)
    }
}

/// Read-only handle on a registered app.
#[derive(Clone)]
pub struct AppView {
    app: Arc<dyn App>,
}

impl AppView {
    pub fn name(&self) -> &AppName {
        self.app.name()
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        self.app.capabilities()
    }

    pub fn owns_resources(&self) -> bool {
        self.app.owns_resources()
    }

    pub fn state(&self) -> SimResult<Value> {
        Ok(self.app.get_state()?.state)
    }

    pub fn state_as<T: DeserializeOwned>(&self) -> SimResult<T> {
        serde_json::from_value(self.state()?).map_err(|err| {
            SimError::invalid_argument(format!("{} state does not decode: {err}", self.name()))
        })
    }

    /// Invokes a read capability outside of any run.
    pub fn query(&self, capability: &str, args: &Value) -> SimResult<Value> {
        let registry = self.app.capabilities();
        match registry.access(capability) {
            Some(AccessKind::Read) => {}
            Some(AccessKind::Write) => {
                return Err(SimError::invalid_argument(format!(
                    "{}.{capability} mutates state and cannot be queried",
                    self.name()
                )))
            }
            None => {
                return Err(SimError::capability(format!(
                    "{} has no capability {capability}",
                    self.name()
                )))
            }
        }
        registry
            .validate_call(capability, args)
            .map_err(|err| err.into_sim_error(self.name().as_str()))?;
        self.app.invoke(capability, args)
    }
}

pub struct Environment {
    apps: RwLock<AppTable>,
    resources: Mutex<Vec<Box<dyn ManagedResource>>>,
    state_center: Arc<InMemoryStateCenter>,
    resource_timeout: Duration,
    running: AtomicBool,
}

impl Default for Environment {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Environment {
    pub fn new(state_center: Arc<InMemoryStateCenter>, resource_timeout: Duration) -> Self {
        Self {
            apps: RwLock::new(AppTable::new()),
            resources: Mutex::new(Vec::new()),
            state_center,
            resource_timeout,
            running: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(InMemoryStateCenter::new(config.trace.capacity)),
            config.resource_timeout,
        )
    }

    pub fn state_center(&self) -> &Arc<InMemoryStateCenter> {
        &self.state_center
    }

    pub fn resource_timeout(&self) -> Duration {
        self.resource_timeout
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn add_app(&self, app: Arc<dyn App>) -> Result<(), EnvironmentError> {
        self.ensure_idle("register an app")?;
        let name = app.name().clone();
        let mut apps = self.apps.write();
        if apps.contains_key(&name) {
            return Err(EnvironmentError::DuplicateApp(name));
        }
        debug!(app = %name, capabilities = app.capabilities().len(), "app registered");
        apps.insert(name, app);
        Ok(())
    }

    pub fn add_apps<I>(&self, apps: I) -> Result<(), EnvironmentError>
    where
        I: IntoIterator<Item = Arc<dyn App>>,
    {
        apps.into_iter().try_for_each(|app| self.add_app(app))
    }

    /// Takes ownership of a resource and returns a borrowed lease for apps.
    pub fn adopt_resource<R: AsyncResource>(
        &self,
        lease: ResourceLease<R>,
    ) -> Result<ResourceLease<R>, EnvironmentError> {
        self.ensure_idle("adopt a resource")?;
        if !lease.is_owned() {
            return Err(SimError::ownership(
                "environment can only adopt resources it owns",
            )
            .into());
        }
        let borrowed = lease.lend();
        self.resources.lock().push(Box::new(lease));
        Ok(borrowed)
    }

    /// Spawns a browser session shared by every app handed the returned lease.
    pub fn shared_browser(
        &self,
        name: &str,
    ) -> Result<ResourceLease<BrowserSession>, EnvironmentError> {
        let worker = BrowserSession::spawn(name, self.resource_timeout)?;
        self.adopt_resource(ResourceLease::owned(worker))
    }

    pub fn app(&self, name: &str) -> Option<AppView> {
        self.apps
            .read()
            .get(&AppName::new(name))
            .map(|app| AppView { app: app.clone() })
    }

    pub fn app_names(&self) -> Vec<AppName> {
        self.apps.read().keys().cloned().collect()
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources
            .lock()
            .iter()
            .map(|resource| resource.name().to_string())
            .collect()
    }

    pub fn registries(&self) -> Vec<CapabilityRegistry> {
        self.apps
            .read()
            .values()
            .map(|app| app.capabilities().clone())
            .collect()
    }

    /// Capture-mode builder over the registered apps.
    pub fn graph_builder(&self) -> GraphBuilder {
        GraphBuilder::new(self.registries())
    }

    /// Starts environment-owned resources, then every app's owned resources.
    pub async fn start(&self) -> Result<(), EnvironmentError> {
        self.ensure_idle("start")?;
        let started = {
            let resources = self.resources.lock();
            for resource in resources.iter() {
                resource.start()?;
            }
            resources
                .iter()
                .map(|resource| resource.name().to_string())
                .collect::<Vec<_>>()
        };
        for name in started {
            self.lifecycle(LifecycleAction::ResourceStarted, None, Some(name))
                .await;
        }
        for app in self.app_handles() {
            app.start()?;
            if app.owns_resources() {
                self.lifecycle(LifecycleAction::ResourceStarted, Some(app.name().clone()), None)
                    .await;
            }
        }
        info!(apps = self.apps.read().len(), "environment started");
        Ok(())
    }

    pub fn snapshot(&self) -> Result<EnvSnapshot, EnvironmentError> {
        let apps = self
            .app_handles()
            .iter()
            .map(|app| app.get_state())
            .collect::<SimResult<Vec<_>>>()?;
        Ok(EnvSnapshot { apps })
    }

    /// Loads every app listed in `snapshot`; apps it does not mention keep their state.
    pub async fn restore(&self, snapshot: &EnvSnapshot) -> Result<(), EnvironmentError> {
        self.ensure_idle("restore a snapshot")?;
        let targets = {
            let apps = self.apps.read();
            snapshot
                .apps
                .iter()
                .map(|entry| {
                    apps.get(&entry.app)
                        .cloned()
                        .map(|app| (app, entry))
                        .ok_or_else(|| EnvironmentError::UnknownApp(entry.app.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        for (app, entry) in targets {
            app.load_state(entry)?;
            self.lifecycle(LifecycleAction::AppRestored, Some(app.name().clone()), None)
                .await;
        }
        Ok(())
    }

    /// Puts every app back into its initial state.
    pub async fn reset(&self) -> Result<(), EnvironmentError> {
        self.ensure_idle("reset")?;
        for app in self.app_handles() {
            app.reset()?;
            self.lifecycle(LifecycleAction::AppReset, Some(app.name().clone()), None)
                .await;
        }
        Ok(())
    }

    /// Runs `graph` against the registered apps. Only one run may be active.
    pub async fn run(
        &self,
        graph: &EventGraph,
        agent: Arc<dyn Agent>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Result<RunReport, EnvironmentError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let apps = self.apps.read().clone();
        let state_center: Arc<dyn StateCenter> = self.state_center.clone();
        let scheduler = Scheduler::new(config, state_center);
        Ok(scheduler.run(graph, &apps, agent, cancel).await?)
    }

    /// Stops owned resources. Borrowed resources are left to their owner; every
    /// resource is attempted even when an earlier one fails.
    pub async fn shutdown(&self) -> Result<(), EnvironmentError> {
        self.ensure_idle("shut down")?;
        let mut first_error: Option<SimError> = None;
        for app in self.app_handles() {
            if !app.owns_resources() {
                continue;
            }
            match app.shutdown() {
                Ok(()) => {
                    self.lifecycle(LifecycleAction::ResourceStopped, Some(app.name().clone()), None)
                        .await
                }
                Err(err) => {
                    warn!(app = %app.name(), error = %err, "app shutdown failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        let stopped = {
            let resources = self.resources.lock();
            let mut stopped = Vec::new();
            for resource in resources.iter() {
                match resource.stop() {
                    Ok(()) => stopped.push(resource.name().to_string()),
                    Err(err) => {
                        warn!(resource = resource.name(), error = %err, "resource stop failed");
                        first_error.get_or_insert(err);
                    }
                }
            }
            stopped
        };
        for name in stopped {
            self.lifecycle(LifecycleAction::ResourceStopped, None, Some(name))
                .await;
        }
        self.lifecycle(LifecycleAction::EnvironmentShutdown, None, None)
            .await;
        info!("environment shut down");
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    pub fn write_trace(&self, path: &Path) -> Result<(), EnvironmentError> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.state_center.write_snapshot(path)?;
        info!(path = %path.display(), "trace written");
        Ok(())
    }

    fn app_handles(&self) -> Vec<Arc<dyn App>> {
        self.apps.read().values().cloned().collect()
    }

    fn ensure_idle(&self, action: &'static str) -> Result<(), EnvironmentError> {
        if self.is_running() {
            return Err(EnvironmentError::Busy(action));
        }
        Ok(())
    }

    async fn lifecycle(&self, action: LifecycleAction, app: Option<AppName>, note: Option<String>) {
        let event = StateEvent::lifecycle(LifecycleEvent::new(None, action, app, note));
        if let Err(err) = self.state_center.append(event).await {
            warn!("state center append failed: {err}");
        }
    }
}

struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, EnvironmentError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EnvironmentError::Busy("start a second run"))?;
        Ok(Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentsim_apps::agent_ui::{self, Sender, UiState};
    use agentsim_apps::mail::{self, Email, Folder, MailState};
    use agentsim_apps::Ownership;
    use agentsim_core_types::ErrorKind;
    use serde_json::json;

    fn inbox() -> MailState {
        MailState::new("me@example.test").with_email(Email {
            id: "m-1".into(),
            from: "boss@example.test".into(),
            to: vec!["me@example.test".into()],
            subject: "Plan".into(),
            body: "Numbers".into(),
            folder: Folder::Inbox,
        })
    }

    #[tokio::test]
    async fn snapshot_restore_round_trips_state() {
        let env = Environment::default();
        env.add_app(Arc::new(agent_ui::agent_user_interface().unwrap()))
            .unwrap();
        let before = env.snapshot().unwrap();

        let ui = env.apps.read().values().next().cloned().unwrap();
        ui.invoke("send_message_to_agent", &json!({ "content": "hello" }))
            .unwrap();
        let state: UiState = env.app(agent_ui::NAME).unwrap().state_as().unwrap();
        assert_eq!(state.messages.len(), 1);

        env.restore(&before).await.unwrap();
        let state: UiState = env.app(agent_ui::NAME).unwrap().state_as().unwrap();
        assert!(state.last_from(Sender::User).is_none());
        assert_eq!(env.snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn restore_rejects_unknown_apps() {
        let env = Environment::default();
        let snapshot = EnvSnapshot {
            apps: vec![AppSnapshot {
                app: AppName::new("Ghost"),
                state: json!({}),
            }],
        };
        let err = env.restore(&snapshot).await.unwrap_err();
        assert!(matches!(err, EnvironmentError::UnknownApp(_)));
    }

    #[test]
    fn duplicate_apps_are_rejected() {
        let env = Environment::default();
        env.add_app(Arc::new(agent_ui::agent_user_interface().unwrap()))
            .unwrap();
        let err = env
            .add_app(Arc::new(agent_ui::agent_user_interface().unwrap()))
            .unwrap_err();
        assert!(matches!(err, EnvironmentError::DuplicateApp(_)));
    }

    #[test]
    fn query_refuses_write_capabilities() {
        let env = Environment::default();
        env.add_app(Arc::new(agent_ui::agent_user_interface().unwrap()))
            .unwrap();
        let view = env.app(agent_ui::NAME).unwrap();
        let err = view
            .query("send_message_to_agent", &json!({ "content": "x" }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(view.query("list_messages", &json!({})).unwrap(), json!([]));
    }

    #[tokio::test]
    async fn shared_browser_is_borrowed_by_apps() {
        let env = Environment::default();
        let lease = env.shared_browser("scenario-browser").unwrap();
        assert_eq!(lease.ownership(), Ownership::Borrowed);
        env.add_app(Arc::new(mail::mail_app(inbox(), lease).unwrap()))
            .unwrap();
        assert!(!env.app(mail::NAME).unwrap().owns_resources());

        env.start().await.unwrap();
        let opened = env
            .app(mail::NAME)
            .unwrap()
            .query("open_inbox", &json!({}))
            .unwrap();
        assert_eq!(opened["url"], mail::INBOX_URL);
        env.shutdown().await.unwrap();
        assert_eq!(env.resource_names(), vec!["scenario-browser".to_string()]);
        assert!(env.state_center().stats().lifecycle_events >= 3);
    }

    #[test]
    fn mutations_fail_while_running() {
        let env = Environment::default();
        let guard = RunGuard::acquire(&env.running).unwrap();
        let err = env
            .add_app(Arc::new(agent_ui::agent_user_interface().unwrap()))
            .unwrap_err();
        assert!(matches!(err, EnvironmentError::Busy(_)));
        assert!(RunGuard::acquire(&env.running).is_err());
        drop(guard);
        assert!(!env.is_running());
    }
}
