use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, OwnedSemaphorePermit, RwLock, Semaphore};

use agentsim_apps::App;
use agentsim_core_types::{AppName, SimError, ToolCall};
use agentsim_registry::AccessKind;

/// Apps participating in a run, keyed by name.
pub type AppTable = BTreeMap<AppName, Arc<dyn App>>;

enum AccessGuard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Held for the whole capability invocation; dropping it releases the app.
pub struct ExecutionSlot {
    _guard: AccessGuard,
    _permit: OwnedSemaphorePermit,
}

/// Single-writer / multi-reader access per app plus the global slot limit.
#[derive(Debug)]
pub struct AccessManager {
    locks: DashMap<AppName, Arc<RwLock<()>>>,
    slots: Arc<Semaphore>,
}

impl AccessManager {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            locks: DashMap::new(),
            slots: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn slots_available(&self) -> usize {
        self.slots.available_permits()
    }

    /// App lock first, then a global slot, so a queued writer never pins a slot.
    pub async fn acquire(&self, app: &AppName, access: AccessKind) -> Result<ExecutionSlot, SimError> {
        let lock = self
            .locks
            .entry(app.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone();
        let guard = if access.is_read() {
            AccessGuard::Read(lock.read_owned().await)
        } else {
            AccessGuard::Write(lock.write_owned().await)
        };
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SimError::internal("execution slots closed"))?;
        Ok(ExecutionSlot {
            _guard: guard,
            _permit: permit,
        })
    }
}

/// Outcome and wall-clock timing of one capability invocation.
#[derive(Debug)]
pub struct Execution {
    pub output: Result<Value, SimError>,
    pub wait: Duration,
    pub run: Duration,
    pub timed_out: bool,
}

/// Runs capability calls on the blocking pool under the app's access lock.
#[derive(Clone)]
pub struct AppExecutor {
    apps: Arc<AppTable>,
    access: Arc<AccessManager>,
    call_timeout: Duration,
}

impl AppExecutor {
    pub fn new(apps: Arc<AppTable>, access: Arc<AccessManager>, call_timeout: Duration) -> Self {
        Self {
            apps,
            access,
            call_timeout,
        }
    }

    pub fn apps(&self) -> &AppTable {
        &self.apps
    }

    pub fn app(&self, name: &AppName) -> Option<&Arc<dyn App>> {
        self.apps.get(name)
    }

    pub fn slots_available(&self) -> usize {
        self.access.slots_available()
    }

    /// Checks the call against the target app's registry.
    pub fn validate(&self, call: &ToolCall) -> Result<(), SimError> {
        let app = self
            .apps
            .get(&call.app)
            .ok_or_else(|| SimError::not_found(format!("unknown app {}", call.app)))?;
        app.capabilities()
            .validate_call(&call.capability, &call.args)
            .map_err(|err| err.into_sim_error(call.app.as_str()))
    }

    pub async fn execute(&self, call: &ToolCall) -> Execution {
        self.execute_with(call, None).await
    }

    /// Runs `call` holding the app's write lock even when the capability only
    /// reads, for oracle checks that must observe no concurrent activity.
    pub async fn execute_exclusive(&self, call: &ToolCall) -> Execution {
        self.execute_with(call, Some(AccessKind::Write)).await
    }

    async fn execute_with(&self, call: &ToolCall, access: Option<AccessKind>) -> Execution {
        let queued = Instant::now();
        let prepared = self.prepare(call);
        let (app, access) = match prepared {
            Ok((app, declared)) => (app, access.unwrap_or(declared)),
            Err(err) => {
                return Execution {
                    output: Err(err),
                    wait: Duration::ZERO,
                    run: Duration::ZERO,
                    timed_out: false,
                }
            }
        };

        let slot = match self.access.acquire(&call.app, access).await {
            Ok(slot) => slot,
            Err(err) => {
                return Execution {
                    output: Err(err),
                    wait: queued.elapsed(),
                    run: Duration::ZERO,
                    timed_out: false,
                }
            }
        };
        let wait = queued.elapsed();
        let started = Instant::now();

        let capability = call.capability.clone();
        let args = call.args.clone();
        // The slot moves into the blocking task so the lock outlives a timed-out wait.
        let handle = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            app.invoke(&capability, &args)
        });

        let (output, timed_out) = match tokio::time::timeout(self.call_timeout, handle).await {
            Ok(Ok(output)) => (output, false),
            Ok(Err(join_err)) => (
                Err(SimError::internal(format!("{call} panicked: {join_err}"))),
                false,
            ),
            Err(_) => (
                Err(SimError::timeout(format!(
                    "{call} did not return within {:?}",
                    self.call_timeout
                ))),
                true,
            ),
        };

        Execution {
            output,
            wait,
            run: started.elapsed(),
            timed_out,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    fn prepare(&self, call: &ToolCall) -> Result<(Arc<dyn App>, AccessKind), SimError> {
        let app = self
            .apps
            .get(&call.app)
            .ok_or_else(|| SimError::not_found(format!("unknown app {}", call.app)))?;
        let access = app
            .capabilities()
            .access(&call.capability)
            .ok_or_else(|| {
                SimError::not_found(format!("{} has no capability {}", call.app, call.capability))
            })?;
        Ok((Arc::clone(app), access))
    }
}
