pub mod errors;
pub mod model;
pub mod state;

pub use errors::RegistryError;
pub use model::{AccessKind, CapabilitySpec, ParamSpec, ParamType};
pub use state::{CapabilityRegistry, RegistryBuilder};
