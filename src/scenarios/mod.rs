//! Built-in scenarios.

use std::sync::Arc;

use crate::errors::ScenarioError;
use crate::scenario::ScenarioRegistry;

pub mod flight_customer_service;
pub mod gmail_browser;

pub use flight_customer_service::FlightCustomerServiceWithMedicalBag;
pub use gmail_browser::GmailBrowserScenario;
pub use gmail_test::GmailTestScenario;

/// Adds every built-in scenario to `registry`.
pub fn register_builtin(registry: &mut ScenarioRegistry) -> Result<(), ScenarioError> {
    registry.register(Arc::new(GmailBrowserScenario))?;
    registry.register(Arc::new(GmailTestScenario))?;
    registry.register(Arc::new(FlightCustomerServiceWithMedicalBag))?;
    Ok(())
}

pub fn builtin_registry() -> Result<ScenarioRegistry, ScenarioError> {
    let mut registry = ScenarioRegistry::new();
    register_builtin(&mut registry)?;
    Ok(registry)
}
