use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentsim_core_types::AppName;

use crate::errors::RegistryError;
use crate::model::{AccessKind, CapabilitySpec};

/// Immutable list of the capabilities one app exposes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRegistry {
    app: Option<AppName>,
    capabilities: BTreeMap<String, CapabilitySpec>,
}

impl CapabilityRegistry {
    pub fn builder(app: impl Into<AppName>) -> RegistryBuilder {
        RegistryBuilder {
            app: app.into(),
            specs: Vec::new(),
        }
    }

    pub fn app(&self) -> Option<&AppName> {
        self.app.as_ref()
    }

    pub fn get(&self, capability: &str) -> Option<&CapabilitySpec> {
        self.capabilities.get(capability)
    }

    pub fn access(&self, capability: &str) -> Option<AccessKind> {
        self.get(capability).map(|spec| spec.access)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilitySpec> {
        self.capabilities.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Checks an argument object against the typed parameter list.
    pub fn validate_call(&self, capability: &str, args: &Value) -> Result<(), RegistryError> {
        let spec = self
            .get(capability)
            .ok_or_else(|| RegistryError::UnknownCapability(capability.to_string()))?;
        let invalid = |reason: String| RegistryError::InvalidArguments {
            capability: capability.to_string(),
            reason,
        };

        let empty = serde_json::Map::new();
        let object = match args {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => return Err(invalid(format!("expected an object, got {other}"))),
        };

        for key in object.keys() {
            if !spec.params.iter().any(|param| &param.name == key) {
                return Err(invalid(format!("unknown parameter '{key}'")));
            }
        }

        for param in &spec.params {
            match object.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(invalid(format!("missing parameter '{}'", param.name)));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.ty.accepts(value) => {
                    return Err(invalid(format!(
                        "parameter '{}' expects {:?}",
                        param.name, param.ty
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Declarative registration; every check runs in [`RegistryBuilder::build`].
#[derive(Debug)]
pub struct RegistryBuilder {
    app: AppName,
    specs: Vec<CapabilitySpec>,
}

impl RegistryBuilder {
    pub fn capability(mut self, spec: CapabilitySpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn read(self, spec: CapabilitySpec) -> Self {
        self.capability(CapabilitySpec {
            access: AccessKind::Read,
            ..spec
        })
    }

    pub fn write(self, spec: CapabilitySpec) -> Self {
        self.capability(CapabilitySpec {
            access: AccessKind::Write,
            ..spec
        })
    }

    pub fn build(self) -> Result<CapabilityRegistry, RegistryError> {
        let mut capabilities = BTreeMap::new();
        for spec in self.specs {
            if spec.name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            let mut seen = HashSet::new();
            for param in &spec.params {
                if !seen.insert(param.name.as_str()) {
                    return Err(RegistryError::DuplicateParam {
                        capability: spec.name.clone(),
                        param: param.name.clone(),
                    });
                }
            }
            if capabilities.contains_key(&spec.name) {
                return Err(RegistryError::DuplicateCapability(spec.name));
            }
            capabilities.insert(spec.name.clone(), spec);
        }
        Ok(CapabilityRegistry {
            app: Some(self.app),
            capabilities,
        })
    }
}
