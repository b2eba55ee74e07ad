use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentsim_core_types::{AppName, SimResult};
use agentsim_registry::CapabilityRegistry;

/// Serializable, independent copy of one app's private state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub app: AppName,
    pub state: Value,
}

/// A stateful unit exposing a fixed capability set.
///
/// `invoke` is blocking and is only called by the scheduler while it holds the
/// app's access lock: shared for read capabilities, exclusive for writes.
pub trait App: Send + Sync {
    fn name(&self) -> &AppName;

    fn capabilities(&self) -> &CapabilityRegistry;

    fn invoke(&self, capability: &str, args: &Value) -> SimResult<Value>;

    fn get_state(&self) -> SimResult<AppSnapshot>;

    fn load_state(&self, snapshot: &AppSnapshot) -> SimResult<()>;

    fn reset(&self) -> SimResult<()>;

    /// Starts resources this app owns. Borrowed resources are never touched.
    fn start(&self) -> SimResult<()> {
        Ok(())
    }

    /// Stops resources this app owns. Borrowed resources are never touched.
    fn shutdown(&self) -> SimResult<()> {
        Ok(())
    }

    fn owns_resources(&self) -> bool {
        false
    }
}

/// Extra context handed to every handler of a [`StatefulApp`](crate::StatefulApp),
/// usually a resource lease.
pub trait AppExtension: Send + Sync {
    fn start(&self) -> SimResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> SimResult<()> {
        Ok(())
    }

    fn owns_resources(&self) -> bool {
        false
    }
}

impl AppExtension for () {}
