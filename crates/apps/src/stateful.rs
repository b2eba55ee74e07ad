use std::collections::HashMap;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use agentsim_core_types::{AppName, SimError, SimResult};
use agentsim_registry::{CapabilityRegistry, CapabilitySpec, RegistryBuilder, RegistryError};

use crate::app::{App, AppExtension, AppSnapshot};

type ReadFn<S, X> = Box<dyn Fn(&S, &X, &Value) -> SimResult<Value> + Send + Sync>;
type WriteFn<S, X> = Box<dyn Fn(&mut S, &X, &Value) -> SimResult<Value> + Send + Sync>;

/// Capability handler tagged with its access classification.
pub enum Handler<S, X> {
    Read(ReadFn<S, X>),
    Write(WriteFn<S, X>),
}

/// Generic app over a serde state `S` and an extension `X`.
///
/// The capability table is fixed at construction; state is only reachable
/// through handlers, snapshots and [`StatefulApp::read_state`].
pub struct StatefulApp<S, X = ()> {
    name: AppName,
    registry: CapabilityRegistry,
    handlers: HashMap<String, Handler<S, X>>,
    state: RwLock<S>,
    initial: S,
    ext: X,
}

impl<S, X> StatefulApp<S, X>
where
    S: Clone,
{
    pub fn builder(name: impl Into<AppName>, state: S, ext: X) -> AppBuilder<S, X> {
        let name = name.into();
        AppBuilder {
            registry: CapabilityRegistry::builder(name.clone()),
            name,
            state,
            ext,
            handlers: HashMap::new(),
        }
    }

    /// Runs `f` against a shared borrow of the live state.
    pub fn read_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.read())
    }

    pub fn extension(&self) -> &X {
        &self.ext
    }
}

impl<S, X> App for StatefulApp<S, X>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync,
    X: AppExtension,
{
    fn name(&self) -> &AppName {
        &self.name
    }

    fn capabilities(&self) -> &CapabilityRegistry {
        &self.registry
    }

    fn invoke(&self, capability: &str, args: &Value) -> SimResult<Value> {
        let handler = self.handlers.get(capability).ok_or_else(|| {
            RegistryError::UnknownCapability(capability.to_string())
                .into_sim_error(self.name.as_str())
        })?;
        debug!(app = %self.name, capability, "invoking capability");
        match handler {
            Handler::Read(f) => f(&self.state.read(), &self.ext, args),
            Handler::Write(f) => f(&mut self.state.write(), &self.ext, args),
        }
    }

    fn get_state(&self) -> SimResult<AppSnapshot> {
        let state = serde_json::to_value(&*self.state.read()).map_err(|err| {
            SimError::internal(format!("{}: state not serializable: {err}", self.name))
        })?;
        Ok(AppSnapshot {
            app: self.name.clone(),
            state,
        })
    }

    fn load_state(&self, snapshot: &AppSnapshot) -> SimResult<()> {
        if snapshot.app != self.name {
            return Err(SimError::invalid_argument(format!(
                "snapshot for {} cannot be loaded into {}",
                snapshot.app, self.name
            )));
        }
        let restored: S = serde_json::from_value(snapshot.state.clone()).map_err(|err| {
            SimError::invalid_argument(format!("{}: malformed snapshot: {err}", self.name))
        })?;
        *self.state.write() = restored;
        Ok(())
    }

    fn reset(&self) -> SimResult<()> {
        *self.state.write() = self.initial.clone();
        Ok(())
    }

    fn start(&self) -> SimResult<()> {
        self.ext.start()
    }

    fn shutdown(&self) -> SimResult<()> {
        self.ext.shutdown()
    }

    fn owns_resources(&self) -> bool {
        self.ext.owns_resources()
    }
}

/// Declarative registration of handlers; schemas are checked in [`AppBuilder::build`].
pub struct AppBuilder<S, X> {
    name: AppName,
    state: S,
    ext: X,
    registry: RegistryBuilder,
    handlers: HashMap<String, Handler<S, X>>,
}

impl<S, X> AppBuilder<S, X>
where
    S: Clone,
{
    pub fn read<F>(mut self, spec: CapabilitySpec, handler: F) -> Self
    where
        F: Fn(&S, &X, &Value) -> SimResult<Value> + Send + Sync + 'static,
    {
        self.handlers
            .entry(spec.name.clone())
            .or_insert_with(|| Handler::Read(Box::new(handler)));
        self.registry = self.registry.read(spec);
        self
    }

    pub fn write<F>(mut self, spec: CapabilitySpec, handler: F) -> Self
    where
        F: Fn(&mut S, &X, &Value) -> SimResult<Value> + Send + Sync + 'static,
    {
        self.handlers
            .entry(spec.name.clone())
            .or_insert_with(|| Handler::Write(Box::new(handler)));
        self.registry = self.registry.write(spec);
        self
    }

    pub fn build(self) -> Result<StatefulApp<S, X>, RegistryError> {
        let registry = self.registry.build()?;
        Ok(StatefulApp {
            name: self.name,
            registry,
            handlers: self.handlers,
            initial: self.state.clone(),
            state: RwLock::new(self.state),
            ext: self.ext,
        })
    }
}

/// Decodes a validated argument object into a typed parameter struct.
pub fn decode_args<T: DeserializeOwned>(args: &Value) -> SimResult<T> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(args).map_err(|err| SimError::invalid_argument(err.to_string()))
}

/// Renders a handler's typed result as its JSON output.
pub fn to_output<T: Serialize>(value: &T) -> SimResult<Value> {
    serde_json::to_value(value).map_err(|err| SimError::internal(err.to_string()))
}
