//! Builder-API surface (spec §6): the model-construction operations a
//! loader (file format reader, GUI, or script) drives a [`ComponentSystem`]
//! through. Grounded on `original_source/HopsanCore/src/ComponentSystem.cc`'s
//! `addComponent`/`renameSubComponent`/`removeSubComponent`/`connect`
//! family, exposed here as one name-addressed surface instead of the
//! original's mix of pointer- and name-based overloads.

use crate::component::{ComponentBehavior, ComponentCore, ComponentId, CqsType, DummyBehavior};
use crate::error::{HopsanError, HopsanResult};
use crate::node::{default_node, NodeType};
use crate::parameter::ParameterType;
use crate::port::{Port, PortId, PortVariant};
use crate::system::ComponentSystem;

/// Constructs a component's behavior (and any CQS/port defaults it
/// implies) from a registered type name. Unknown type names fall back to
/// [`DummyBehavior`] per spec §6 rather than failing the load outright.
pub trait ComponentFactory: Send + Sync {
    fn create(&self, type_name: &str) -> Option<(CqsType, Box<dyn ComponentBehavior>)>;
}

/// A factory that never recognizes anything; every component it builds
/// is a no-op [`DummyBehavior`]. Useful for loading a model topology
/// when the component library behaviors are not needed (e.g. config
/// validation or the test suite).
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyFactory;

impl ComponentFactory for DummyFactory {
    fn create(&self, _type_name: &str) -> Option<(CqsType, Box<dyn ComponentBehavior>)> {
        None
    }
}

/// Creates a component via `factory` and adds it to `system`, returning
/// its id. Mirrors `HopsanEssentials::createComponent` followed by
/// `ComponentSystem::addComponent`.
pub fn create_component(
    system: &mut ComponentSystem,
    factory: &dyn ComponentFactory,
    type_name: &str,
    name: &str,
) -> ComponentId {
    let (cqs, behavior) = factory
        .create(type_name)
        .unwrap_or((CqsType::Undefined, Box::new(DummyBehavior)));
    let core = ComponentCore::new(name, type_name, cqs);
    system.add_component(core, behavior)
}

pub fn rename_sub_component(system: &mut ComponentSystem, old_name: &str, new_name: &str) -> HopsanResult<()> {
    system.rename_component(old_name, new_name)
}

pub fn remove_sub_component(system: &mut ComponentSystem, name: &str) -> HopsanResult<()> {
    system.remove_component(name)
}

fn resolve_port(system: &ComponentSystem, component_name: &str, port_name: &str) -> HopsanResult<(ComponentId, PortId)> {
    let comp_id = system
        .get_component(component_name)
        .ok_or_else(|| HopsanError::validation(format!("no component named '{component_name}'")))?;
    let port_id = system
        .components()
        .get(comp_id)
        .and_then(|c| c.core.port_id(port_name))
        .ok_or_else(|| HopsanError::validation(format!("component '{component_name}' has no port '{port_name}'")))?;
    Ok((comp_id, port_id))
}

/// Connects two ports by component/port name, creating the node that
/// will carry their shared variables. Mirrors the name-addressed
/// `ComponentSystem::connect` overload.
pub fn connect(
    system: &mut ComponentSystem,
    comp1: &str,
    port1: &str,
    comp2: &str,
    port2: &str,
) -> HopsanResult<()> {
    let (_c1, p1) = resolve_port(system, comp1, port1)?;
    let (_c2, p2) = resolve_port(system, comp2, port2)?;
    system.connect(p1, p2, default_node)?;
    Ok(())
}

pub fn disconnect(
    system: &mut ComponentSystem,
    comp1: &str,
    port1: &str,
    comp2: &str,
    port2: &str,
) -> HopsanResult<()> {
    let (_c1, p1) = resolve_port(system, comp1, port1)?;
    let (_c2, p2) = resolve_port(system, comp2, port2)?;
    system.disconnect(p1, p2, default_node)
}

/// Adds a system (interface) port directly on `system` itself, the way
/// `addSystemPort` exposes a subsystem boundary variable to its parent.
pub fn add_system_port(system: &mut ComponentSystem, name: &str, node_type: NodeType) -> PortId {
    let owner = ComponentId::dangling();
    let port_id = system
        .ports_mut()
        .insert(Port::new(name, PortVariant::System, node_type, owner, false));
    system.core.add_port(name, port_id);
    port_id
}

pub fn set_system_parameter(system: &mut ComponentSystem, name: &str, value: &str, ty: ParameterType) -> HopsanResult<()> {
    system.set_system_parameter(name, value, ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_name_falls_back_to_dummy_behavior() {
        let mut sys = ComponentSystem::new("root");
        let id = create_component(&mut sys, &DummyFactory, "SomeUnknownType", "c1");
        assert!(sys.components().get(id).is_some());
        assert_eq!(sys.components().get(id).unwrap().core.cqs, CqsType::Undefined);
    }

    #[test]
    fn connect_and_disconnect_by_name() {
        let mut sys = ComponentSystem::new("root");
        let src = create_component(&mut sys, &DummyFactory, "Src", "source");
        let dst = create_component(&mut sys, &DummyFactory, "Sink", "sink");
        let out = sys
            .ports_mut()
            .insert(Port::new("out", PortVariant::WriteSignal, NodeType::Signal, src, false));
        let inp = sys
            .ports_mut()
            .insert(Port::new("in", PortVariant::ReadSignal, NodeType::Signal, dst, false));
        sys.components_mut().get_mut(src).unwrap().core.add_port("out", out);
        sys.components_mut().get_mut(dst).unwrap().core.add_port("in", inp);

        connect(&mut sys, "source", "out", "sink", "in").unwrap();
        assert!(sys.ports().get(out).unwrap().is_connected());
        disconnect(&mut sys, "source", "out", "sink", "in").unwrap();
        assert!(!sys.ports().get(out).unwrap().is_connected_to(inp));
    }
}
