//! Port (module D): a typed handle attached to a Component, pointing at
//! one Node. Grounded on `original_source/HopsanCore/src/Port.cpp`; the
//! inheritance hierarchy (`Port -> PowerPort/ReadPort/WritePort/...`)
//! collapses into one tagged variant per spec §9's design note.

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::arena::{Arena, Id};
use crate::component::ComponentId;
use crate::error::{HopsanError, HopsanResult};
use crate::node::{Node, NodeArena, NodeId, NodeType};

pub type PortId = Id<Port>;
pub type PortArena = Arena<Port>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortVariant {
    Power,
    ReadSignal,
    WriteSignal,
    BiDirectionalSignal,
    System,
    PowerMulti,
    ReadMulti,
}

impl PortVariant {
    pub fn is_multiport(self) -> bool {
        matches!(self, PortVariant::PowerMulti | PortVariant::ReadMulti)
    }

    pub fn accepts_write(self) -> bool {
        matches!(
            self,
            PortVariant::Power
                | PortVariant::WriteSignal
                | PortVariant::BiDirectionalSignal
                | PortVariant::System
                | PortVariant::PowerMulti
        )
    }
}

/// Classification used by the connection algebra (spec 4.4). `Interface`
/// corresponds to a transparent system-boundary port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Read,
    Write,
    Power,
    System,
    Interface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortHint {
    None,
    Source,
    Destination,
    IndependentDestination,
}

/// Forced write bypasses the read-port write guard (spec P1), used by
/// the start-value bootstrap (spec 4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Normal,
    Forced,
}

#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    variant: PortVariant,
    required_node_type: NodeType,
    component: ComponentId,
    parent_port: Option<PortId>,
    connection_required: bool,
    sort_hint: SortHint,
    node: Option<NodeId>,
    start_node: Option<Node>,
    logging_enabled: bool,
    variable_alias: FxHashMap<String, usize>,
    subports: Option<SmallVec<[PortId; 4]>>,
    /// Ports this port is directly wired to (module G's connection graph
    /// walk needs the full set, not just one peer, since a merged node
    /// can join more than two ports together via a multiport hub).
    connected_peers: SmallVec<[PortId; 2]>,
}

impl Port {
    pub fn new(
        name: impl Into<String>,
        variant: PortVariant,
        required_node_type: NodeType,
        component: ComponentId,
        connection_required: bool,
    ) -> Self {
        let subports = if variant.is_multiport() {
            Some(SmallVec::new())
        } else {
            None
        };
        Port {
            name: name.into(),
            variant,
            required_node_type,
            component,
            parent_port: None,
            connection_required,
            sort_hint: SortHint::None,
            node: None,
            start_node: None,
            logging_enabled: false,
            variable_alias: FxHashMap::default(),
            subports,
            connected_peers: SmallVec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn variant(&self) -> PortVariant {
        self.variant
    }
    pub fn required_node_type(&self) -> NodeType {
        self.required_node_type
    }
    pub fn component(&self) -> ComponentId {
        self.component
    }
    pub fn parent_port(&self) -> Option<PortId> {
        self.parent_port
    }
    pub fn set_parent_port(&mut self, parent: PortId) {
        self.parent_port = Some(parent);
    }
    pub fn connection_required(&self) -> bool {
        self.connection_required
    }
    pub fn sort_hint(&self) -> SortHint {
        self.sort_hint
    }
    pub fn set_sort_hint(&mut self, hint: SortHint) {
        self.sort_hint = hint;
    }
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }
    pub fn set_node(&mut self, node: NodeId) {
        self.node = Some(node);
    }
    pub fn clear_node(&mut self) {
        self.node = None;
    }
    pub fn is_connected(&self) -> bool {
        self.node.is_some()
    }
    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled
    }
    pub fn set_logging_enabled(&mut self, v: bool) {
        self.logging_enabled = v;
    }
    pub fn connected_peers(&self) -> &[PortId] {
        &self.connected_peers
    }

    pub fn add_connected_peer(&mut self, peer: PortId) {
        if !self.connected_peers.contains(&peer) {
            self.connected_peers.push(peer);
        }
    }

    pub fn remove_connected_peer(&mut self, peer: PortId) {
        self.connected_peers.retain(|p| *p != peer);
    }

    pub fn is_connected_to(&self, other: PortId) -> bool {
        self.connected_peers.contains(&other)
    }

    pub fn start_node(&self) -> Option<&Node> {
        self.start_node.as_ref()
    }
    pub fn start_node_mut(&mut self) -> Option<&mut Node> {
        self.start_node.as_mut()
    }
    pub fn install_start_node(&mut self, node: Node) {
        self.start_node = Some(node);
    }
    pub fn erase_start_node(&mut self) {
        self.start_node = None;
    }

    pub fn set_variable_alias(&mut self, alias: &str, data_id: usize) {
        self.variable_alias.insert(alias.to_string(), data_id);
    }
    pub fn resolve_variable_alias(&self, alias: &str) -> Option<usize> {
        self.variable_alias.get(alias).copied()
    }

    /// Classification used by the connection algebra.
    pub fn kind(&self) -> PortKind {
        match self.variant {
            PortVariant::Power | PortVariant::PowerMulti => PortKind::Power,
            PortVariant::ReadSignal | PortVariant::ReadMulti => PortKind::Read,
            PortVariant::WriteSignal => PortKind::Write,
            PortVariant::BiDirectionalSignal => PortKind::Write,
            PortVariant::System => PortKind::Interface,
        }
    }

    pub fn is_read_like(&self) -> bool {
        matches!(
            self.variant,
            PortVariant::ReadSignal | PortVariant::ReadMulti | PortVariant::BiDirectionalSignal
        )
    }

    // ---- multiport subport lifecycle ----

    pub fn is_multiport(&self) -> bool {
        self.subports.is_some()
    }

    pub fn add_sub_port(&mut self, sub: PortId) -> HopsanResult<()> {
        self.subports
            .as_mut()
            .ok_or_else(|| HopsanError::fatal("add_sub_port called on a non-multiport"))?
            .push(sub);
        Ok(())
    }

    pub fn remove_sub_port(&mut self, sub: PortId) -> HopsanResult<()> {
        self.subports
            .as_mut()
            .ok_or_else(|| HopsanError::fatal("remove_sub_port called on a non-multiport"))?
            .retain(|p| *p != sub);
        Ok(())
    }

    pub fn get_sub_ports(&self) -> &[PortId] {
        self.subports.as_deref().unwrap_or(&[])
    }

    pub fn get_num_sub_ports(&self) -> usize {
        self.subports.as_ref().map(|v| v.len()).unwrap_or(0)
    }

    // ---- data access ----

    /// Reads variable `id` from the port's current node. A multiport
    /// reads from the subport at `sub_idx` (spec 4.3).
    pub fn read_safe(&self, ports: &PortArena, nodes: &NodeArena, id: usize, sub_idx: Option<usize>) -> f64 {
        if let Some(idx) = sub_idx {
            if let Some(sub) = self.get_sub_ports().get(idx) {
                if let Some(sub_port) = ports.get(*sub) {
                    return sub_port.read_safe(ports, nodes, id, None);
                }
            }
            return 0.0;
        }
        match self.node.and_then(|n| nodes.get(n)) {
            Some(node) => node.value(id),
            None => self
                .start_node
                .as_ref()
                .map(|n| n.value(id))
                .unwrap_or(0.0),
        }
    }

    /// Writes variable `id` on the port's current node. Fails for a plain
    /// read port unless `mode` is [`WriteMode::Forced`] (spec P1).
    pub fn write_safe(
        &self,
        ports: &PortArena,
        nodes: &mut NodeArena,
        id: usize,
        value: f64,
        sub_idx: Option<usize>,
        mode: WriteMode,
    ) -> HopsanResult<()> {
        if self.is_read_like() && mode == WriteMode::Normal {
            return Err(HopsanError::validation(format!(
                "port '{}' is a read port and cannot be written",
                self.name
            )));
        }

        if let Some(idx) = sub_idx {
            let sub = self
                .get_sub_ports()
                .get(idx)
                .copied()
                .ok_or_else(|| HopsanError::validation("subport index out of range"))?;
            let sub_port = ports
                .get(sub)
                .ok_or_else(|| HopsanError::fatal("dangling subport id"))?
                .clone();
            return sub_port.write_safe(ports, nodes, id, value, None, mode);
        }

        match self.node {
            Some(node_id) => {
                if let Some(node) = nodes.get_mut(node_id) {
                    node.set_value(id, value);
                }
                Ok(())
            }
            None => Err(HopsanError::fatal(format!(
                "port '{}' has no connected node to write to",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_component_id() -> ComponentId {
        // A placeholder id is fine for unit tests that never dereference
        // the component arena.
        ComponentId::dangling()
    }

    #[test]
    fn read_port_rejects_unforced_write() {
        let mut ports: PortArena = Arena::new();
        let mut nodes: NodeArena = Arena::new();
        let node_id = nodes.insert(Node::new(NodeType::Signal, vec![]));
        let mut p = Port::new(
            "in",
            PortVariant::ReadSignal,
            NodeType::Signal,
            dummy_component_id(),
            false,
        );
        p.set_node(node_id);
        let err = p.write_safe(&ports, &mut nodes, 0, 1.0, None, WriteMode::Normal);
        assert!(err.is_err());
        assert!(p
            .write_safe(&ports, &mut nodes, 0, 1.0, None, WriteMode::Forced)
            .is_ok());
        ports.insert(p);
    }
}
