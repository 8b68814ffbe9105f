//! A time-domain transmission-line-method (TLM) simulation engine for
//! lumped physical systems: hydraulic, mechanical, electric and signal
//! components exchange wave variables through shared nodes, stepped by
//! a Signal → C → Q phase schedule each timestep.
//!
//! [`HopsanEssentials`] is the crate's entry point, the way the
//! teacher's `Universe` is the root handle a caller creates once and
//! uses to spin up any number of [`ComponentSystem`]s that all share its
//! [`QuantityRegistry`].

pub mod arena;
pub mod component;
pub mod connection;
pub mod error;
pub mod facade;
pub mod loader;
pub mod message;
pub mod node;
pub mod parameter;
pub mod port;
pub mod quantity;
pub mod scheduler;
pub mod script;
pub mod system;

pub use component::{ComponentBehavior, ComponentCore, ComponentId, ComponentInstance, CqsType};
pub use connection::ComponentLookup;
pub use error::{HopsanError, HopsanResult};
pub use facade::{SimulationFacade, SimulationSettings, StopHandle};
pub use message::{Message, MessageBus, MessageKind};
pub use node::{Node, NodeId, NodeType};
pub use parameter::{Parameter, ParameterHandler, ParameterType, ParameterValue};
pub use port::{Port, PortId, PortKind, PortVariant};
pub use quantity::QuantityRegistry;
pub use system::{ComponentSystem, SystemId};

use std::sync::Arc;

/// Root handle a caller creates once per process (or per independent
/// model namespace). Owns the [`QuantityRegistry`] every
/// [`ComponentSystem`] it creates shares — the registry's lifetime is
/// tied to its first `HopsanEssentials` and released once the last
/// clone of the `Arc` drops (spec §4.1), mirroring how the teacher's
/// `Universe` owns the `BlockAllocator` every `World` it creates shares.
#[derive(Clone)]
pub struct HopsanEssentials {
    quantities: Arc<QuantityRegistry>,
}

impl Default for HopsanEssentials {
    fn default() -> Self {
        Self::new()
    }
}

impl HopsanEssentials {
    /// Creates an engine instance with the built-in quantity table
    /// (spec §4.1).
    pub fn new() -> Self {
        HopsanEssentials {
            quantities: Arc::new(QuantityRegistry::with_builtins()),
        }
    }

    /// Creates an engine instance with a caller-supplied registry
    /// instead of the built-in one (e.g. a registry with extra
    /// project-specific quantities registered).
    pub fn with_quantities(quantities: QuantityRegistry) -> Self {
        HopsanEssentials {
            quantities: Arc::new(quantities),
        }
    }

    pub fn quantities(&self) -> &QuantityRegistry {
        &self.quantities
    }

    /// Creates an empty root [`ComponentSystem`] named `name`, the
    /// starting point a loader (spec §6) fills in with components and
    /// connections.
    pub fn create_component_system(&self, name: impl Into<String>) -> ComponentSystem {
        ComponentSystem::new(name)
    }
}
