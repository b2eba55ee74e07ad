//! App and capability interface for agentsim.
//!
//! Apps expose a fixed capability set through a [`CapabilityRegistry`], a
//! snapshot/restore pair and a reset. Apps that drive an asynchronous resource
//! marshal every call onto that resource's own worker thread (see [`resource`]).
//!
//! [`CapabilityRegistry`]: agentsim_registry::CapabilityRegistry

pub mod agent_ui;
pub mod app;
pub mod browser;
pub mod flight;
pub mod mail;
pub mod resource;
pub mod stateful;

pub use app::{App, AppExtension, AppSnapshot};
pub use resource::{AsyncResource, ManagedResource, Ownership, ResourceLease, ResourceWorker};
pub use stateful::{decode_args, to_output, AppBuilder, Handler, StatefulApp};
