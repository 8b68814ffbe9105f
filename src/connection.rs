//! Connection Assistant (module G): the algebra that decides whether two
//! ports may be wired together, and the node-graph surgery (merge/split)
//! that wiring performs. Grounded 1:1 on
//! `original_source/HopsanCore/src/CoreUtilities/ConnectionAssistant.cpp`.

use crate::arena::Arena;
use crate::component::{ComponentId, CqsType};
use crate::error::{HopsanError, HopsanResult};
use crate::node::{Node, NodeArena, NodeId, NodeType};
use crate::port::{Port, PortArena, PortId, PortKind};

/// Cross-arena facts about a component that the connection algebra needs
/// but does not own itself. Implemented by the owning [`crate::system`]
/// type, which has the component arena and the system-parent graph.
pub trait ComponentLookup {
    fn cqs(&self, id: ComponentId) -> CqsType;
    fn hierarchy_depth(&self, id: ComponentId) -> usize;
    /// The system a component lives directly inside, or `None` for the
    /// root system.
    fn parent_system(&self, id: ComponentId) -> Option<ComponentId>;
}

/// Tally of port/component kinds seen on a node plus the two candidate
/// ports, mirroring `ConnOKCounters`.
#[derive(Debug, Default, Clone, Copy)]
struct ConnOkCounters {
    n_interface_ports: u32,
    n_write_ports: u32,
    n_power_ports: u32,
    n_system_ports: u32,
    n_own_system_ports: u32,
    n_non_interface_c_power_ports: u32,
    n_non_interface_q_power_ports: u32,
}

fn check_port(port: &Port, lookup: &impl ComponentLookup, counters: &mut ConnOkCounters) {
    let kind = port.kind();
    if kind == PortKind::Interface {
        counters.n_interface_ports += 1;
        counters.n_system_ports += 1;
    }
    if kind == PortKind::Write {
        counters.n_write_ports += 1;
    }
    if kind == PortKind::Power {
        counters.n_power_ports += 1;
        match lookup.cqs(port.component()) {
            CqsType::C => counters.n_non_interface_c_power_ports += 1,
            CqsType::Q => counters.n_non_interface_q_power_ports += 1,
            CqsType::S | CqsType::Undefined => {}
        }
    }
}

/// Runs the full connection algebra for the node `port1` and `port2` now
/// share, given every port already attached to it. `owner` is the system
/// performing the connect (used for the own-systemport count).
fn ensure_connection_ok(
    node: &Node,
    ports: &PortArena,
    port1: PortId,
    port2: PortId,
    owner: ComponentId,
    lookup: &impl ComponentLookup,
) -> HopsanResult<()> {
    let mut counters = ConnOkCounters::default();

    for &pid in node.connected_ports() {
        if let Some(p) = ports.get(pid) {
            check_port(p, lookup, &mut counters);
            if p.kind() == PortKind::Interface && p.component() == owner {
                counters.n_own_system_ports += 1;
            }
        }
    }

    // Ports not yet registered on the node (first-time connect) must
    // still be counted; a port already present was counted above.
    for pid in [port1, port2] {
        if !node.is_connected_to_port(pid) {
            if let Some(p) = ports.get(pid) {
                check_port(p, lookup, &mut counters);
            }
        }
    }

    if counters.n_power_ports > 0 && counters.n_own_system_ports > 1 {
        return Err(HopsanError::validation(
            "trying to connect one power port to two system ports, this is not allowed",
        ));
    }
    if counters.n_power_ports > 2 + counters.n_interface_ports - counters.n_system_ports {
        return Err(HopsanError::validation(
            "trying to connect more than two power ports to the same node",
        ));
    }
    if counters.n_write_ports > 1 + counters.n_interface_ports - counters.n_system_ports {
        return Err(HopsanError::validation(
            "trying to connect more than one write port to the same node",
        ));
    }
    if counters.n_power_ports > 0 && counters.n_write_ports > 0 {
        return Err(HopsanError::validation(
            "trying to connect a write port and a power port to the same node",
        ));
    }
    if counters.n_non_interface_c_power_ports > 1 {
        return Err(HopsanError::validation(
            "cannot connect two C-component power ports to each other",
        ));
    }
    if counters.n_non_interface_q_power_ports > 1 {
        return Err(HopsanError::validation(
            "cannot connect two Q-component power ports to each other",
        ));
    }

    Ok(())
}

fn ensure_same_node_type(port1: &Port, port2: &Port) -> HopsanResult<()> {
    if port1.required_node_type() != port2.required_node_type() {
        return Err(HopsanError::validation(format!(
            "cannot connect a {:?} port to a {:?} port ('{}' to '{}')",
            port1.required_node_type(),
            port2.required_node_type(),
            port1.name(),
            port2.name()
        )));
    }
    Ok(())
}

/// Both components must belong to the same system, or one must be the
/// other's own parent system (connecting to a system boundary port).
pub fn ensure_not_cross_connecting(
    port1: &Port,
    port2: &Port,
    lookup: &impl ComponentLookup,
) -> HopsanResult<()> {
    let c1 = port1.component();
    let c2 = port2.component();
    let p1 = lookup.parent_system(c1);
    let p2 = lookup.parent_system(c2);
    if p1 != p2 && p1 != Some(c2) && p2 != Some(c1) {
        return Err(HopsanError::validation(
            "the components being connected must belong to the same subsystem",
        ));
    }
    Ok(())
}

/// Follows `port`'s web of `connected_peers`, pointing every reachable
/// port at `node_id` without walking back through `came_from`.
fn recursively_set_node(
    ports: &mut PortArena,
    node_id: NodeId,
    port_id: PortId,
    came_from: Option<PortId>,
) {
    let peers: Vec<PortId> = match ports.get_mut(port_id) {
        Some(p) => {
            p.set_node(node_id);
            p.connected_peers().to_vec()
        }
        None => return,
    };
    for peer in peers {
        if Some(peer) == came_from {
            continue;
        }
        recursively_set_node(ports, node_id, peer, Some(port_id));
    }
}

/// The outcome of a successful merge: the new shared node and the
/// component with the smallest hierarchy depth among everything now
/// attached to it, i.e. whichever system should store the node (spec
/// I3). The caller owns cross-system node placement since only it knows
/// every system's arena.
pub struct MergeOutcome {
    pub node_id: NodeId,
    pub store_in: ComponentId,
}

/// Wires `port1` and `port2` onto one new shared node, rolling back to
/// two fresh per-port nodes if the connection algebra rejects the
/// result. Mirrors `mergeNodeConnection`.
pub fn merge_node_connection(
    ports: &mut PortArena,
    nodes: &mut NodeArena,
    owner: ComponentId,
    lookup: &impl ComponentLookup,
    port1: PortId,
    port2: PortId,
    make_node: impl Fn(NodeType) -> Node,
) -> HopsanResult<MergeOutcome> {
    {
        let p1 = ports.get(port1).ok_or_else(|| HopsanError::fatal("dangling port1"))?;
        let p2 = ports.get(port2).ok_or_else(|| HopsanError::fatal("dangling port2"))?;
        ensure_same_node_type(p1, p2)?;
        ensure_not_cross_connecting(p1, p2, lookup)?;

        let old1 = p1.node();
        let old2 = p2.node();
        if old1.is_some() && old1 == old2 {
            return Err(HopsanError::validation(
                "this connection would join a node with itself, which is not allowed",
            ));
        }
    }

    let node_type = ports.get(port1).unwrap().required_node_type();
    let old_node1 = ports.get(port1).unwrap().node();
    let old_node2 = ports.get(port2).unwrap().node();

    let new_node = make_node(node_type);
    let new_node_id = nodes.insert(new_node);

    recursively_set_node(ports, new_node_id, port1, None);
    recursively_set_node(ports, new_node_id, port2, None);

    if let Some(p) = ports.get_mut(port1) {
        p.add_connected_peer(port2);
    }
    if let Some(p) = ports.get_mut(port2) {
        p.add_connected_peer(port1);
    }

    // Register both ports (and anything already hanging off them) onto
    // the new node's connected-port list before running the algebra.
    let mut attached = Vec::new();
    collect_attached_ports(ports, port1, None, &mut attached);
    collect_attached_ports(ports, port2, None, &mut attached);
    if let Some(node) = nodes.get_mut(new_node_id) {
        for p in &attached {
            node.add_connected_port(*p);
        }
    }

    if let Some(id) = old_node1 {
        nodes.remove(id);
    }
    if let Some(id) = old_node2 {
        nodes.remove(id);
    }

    let store_in = attached
        .iter()
        .filter_map(|p| ports.get(*p))
        .map(|p| p.component())
        .min_by_key(|c| lookup.hierarchy_depth(*c))
        .ok_or_else(|| HopsanError::fatal("merge produced a node with no attached ports"))?;

    let check = nodes
        .get(new_node_id)
        .ok_or_else(|| HopsanError::fatal("new node vanished before the connection check"))
        .and_then(|node| ensure_connection_ok(node, ports, port1, port2, owner, lookup));

    if let Err(e) = check {
        let _ = split_node_connection(ports, nodes, port1, port2, make_node);
        return Err(e);
    }

    Ok(MergeOutcome {
        node_id: new_node_id,
        store_in,
    })
}

fn collect_attached_ports(
    ports: &PortArena,
    port_id: PortId,
    came_from: Option<PortId>,
    out: &mut Vec<PortId>,
) {
    if out.contains(&port_id) {
        return;
    }
    out.push(port_id);
    if let Some(p) = ports.get(port_id) {
        for peer in p.connected_peers() {
            if Some(*peer) != came_from {
                collect_attached_ports(ports, *peer, Some(port_id), out);
            }
        }
    }
}

/// Undoes a merge: `port1` and `port2` each get their own fresh node and
/// forget about each other. Mirrors `splitNodeConnection`.
pub fn split_node_connection(
    ports: &mut PortArena,
    nodes: &mut NodeArena,
    port1: PortId,
    port2: PortId,
    make_node: impl Fn(NodeType) -> Node,
) -> HopsanResult<(NodeId, NodeId)> {
    let node_type = ports
        .get(port1)
        .and_then(|p| p.node())
        .and_then(|n| nodes.get(n))
        .map(|n| n.node_type())
        .unwrap_or(NodeType::Empty);
    let old_node = ports.get(port1).and_then(|p| p.node());

    if let Some(p) = ports.get_mut(port1) {
        p.remove_connected_peer(port2);
    }
    if let Some(p) = ports.get_mut(port2) {
        p.remove_connected_peer(port1);
    }

    let new_node1 = nodes.insert(make_node(node_type));
    let new_node2 = nodes.insert(make_node(node_type));

    recursively_set_node(ports, new_node1, port1, None);
    recursively_set_node(ports, new_node2, port2, None);

    let mut attached1 = Vec::new();
    collect_attached_ports(ports, port1, None, &mut attached1);
    if let Some(node) = nodes.get_mut(new_node1) {
        for p in &attached1 {
            node.add_connected_port(*p);
        }
    }
    let mut attached2 = Vec::new();
    collect_attached_ports(ports, port2, None, &mut attached2);
    if let Some(node) = nodes.get_mut(new_node2) {
        for p in &attached2 {
            node.add_connected_port(*p);
        }
    }

    if let Some(id) = old_node {
        nodes.remove(id);
    }

    Ok((new_node1, new_node2))
}

/// If `port` is a multiport, adds and returns a new subport; otherwise
/// returns `port` unchanged. Mirrors `ifMultiportAddSubport`.
pub fn if_multiport_add_subport(
    ports: &mut PortArena,
    port_id: PortId,
    new_sub: impl FnOnce() -> Port,
) -> HopsanResult<PortId> {
    let is_multi = ports
        .get(port_id)
        .ok_or_else(|| HopsanError::fatal("dangling multiport id"))?
        .is_multiport();
    if !is_multi {
        return Ok(port_id);
    }
    let mut sub = new_sub();
    sub.set_parent_port(port_id);
    let sub_id = ports.insert(sub);
    ports
        .get_mut(port_id)
        .ok_or_else(|| HopsanError::fatal("multiport vanished"))?
        .add_sub_port(sub_id)?;
    Ok(sub_id)
}

/// After a failed connection attempt through a freshly created subport,
/// removes that subport again. Mirrors `ifMultiportCleanupAfterConnect`'s
/// failure branch.
pub fn cleanup_subport_after_failed_connect(
    ports: &mut PortArena,
    maybe_multiport: PortId,
    actual_port: PortId,
) -> HopsanResult<()> {
    let is_child = ports
        .get(actual_port)
        .and_then(|p| p.parent_port())
        .map(|parent| parent == maybe_multiport)
        .unwrap_or(false);
    if is_child {
        ports
            .get_mut(maybe_multiport)
            .ok_or_else(|| HopsanError::fatal("multiport vanished"))?
            .remove_sub_port(actual_port)?;
        ports.remove(actual_port);
    }
    Ok(())
}
