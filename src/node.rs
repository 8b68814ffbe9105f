//! Node (module C): a fixed-arity vector of named double variables
//! shared by every port merged onto it. Grounded on
//! `original_source/HopsanCore/src/Node.cpp`.

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::arena::{Arena, Id};
use crate::error::{HopsanError, HopsanResult};
use crate::port::PortId;

pub type NodeId = Id<Node>;
pub type NodeArena = Arena<Node>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Hydraulic,
    Pneumatic,
    MechanicalTranslational,
    MechanicalRotational,
    Electric,
    Signal,
    /// System ports left unconnected hold this sentinel (spec P3).
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableRole {
    Intensity,
    Flow,
    Tlm,
    Default,
    Hidden,
}

#[derive(Debug, Clone)]
pub struct DataVariableDescriptor {
    pub name: String,
    pub short_name: String,
    pub unit: String,
    pub quantity: String,
    pub role: VariableRole,
}

impl DataVariableDescriptor {
    pub fn new(
        name: impl Into<String>,
        short_name: impl Into<String>,
        unit: impl Into<String>,
        quantity: impl Into<String>,
        role: VariableRole,
    ) -> Self {
        DataVariableDescriptor {
            name: name.into(),
            short_name: short_name.into(),
            unit: unit.into(),
            quantity: quantity.into(),
            role,
        }
    }
}

/// One row per logged simulation step, one column per data variable.
#[derive(Debug, Clone, Default)]
pub struct LogMatrix {
    pub times: Vec<f64>,
    pub rows: Vec<Vec<f64>>,
}

impl LogMatrix {
    fn preallocate(&mut self, n_slots: usize, n_vars: usize) {
        self.times = vec![0.0; n_slots];
        self.rows = vec![vec![0.0; n_vars]; n_slots];
    }

    fn write_slot(&mut self, slot: usize, time: f64, values: &[f64]) -> HopsanResult<()> {
        let row = self
            .rows
            .get_mut(slot)
            .ok_or_else(|| HopsanError::runtime(format!("log slot {slot} out of range")))?;
        row.copy_from_slice(values);
        self.times[slot] = time;
        Ok(())
    }
}

/// A shared variable vector representing a physical connection point.
#[derive(Debug, Clone)]
pub struct Node {
    node_type: NodeType,
    variables: SmallVec<[DataVariableDescriptor; 4]>,
    name_index: FxHashMap<String, usize>,
    values: SmallVec<[f64; 4]>,
    log: Option<LogMatrix>,
    connected_ports: Vec<PortId>,
    signal_quantity_modifiable: bool,
}

impl Node {
    pub fn new(node_type: NodeType, variables: Vec<DataVariableDescriptor>) -> Self {
        let mut name_index = FxHashMap::default();
        for (i, v) in variables.iter().enumerate() {
            name_index.insert(v.name.clone(), i);
        }
        let n = variables.len();
        Node {
            node_type,
            variables: variables.into(),
            name_index,
            values: SmallVec::from_elem(0.0, n),
            log: None,
            connected_ports: Vec::new(),
            signal_quantity_modifiable: true,
        }
    }

    /// An unconnected sentinel node of [`NodeType::Empty`] with no
    /// variables, used for unconnected system ports (spec P3).
    pub fn empty() -> Self {
        Node::new(NodeType::Empty, Vec::new())
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn set_node_type_empty(&mut self) {
        self.node_type = NodeType::Empty;
        self.variables.clear();
        self.name_index.clear();
        self.values.clear();
    }

    pub fn data_id_from_name(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub fn data_description(&self, id: usize) -> Option<&DataVariableDescriptor> {
        self.variables.get(id)
    }

    pub fn value(&self, id: usize) -> f64 {
        self.values.get(id).copied().unwrap_or(0.0)
    }

    pub fn set_value(&mut self, id: usize, v: f64) {
        if let Some(slot) = self.values.get_mut(id) {
            *slot = v;
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Copies every variable's value from `self` into `other`. Fatal if
    /// the node types differ (spec 4.3).
    pub fn copy_values_to(&self, other: &mut Node) -> HopsanResult<()> {
        if self.node_type != other.node_type {
            return Err(HopsanError::fatal(format!(
                "copyValuesTo: node type mismatch ({:?} vs {:?})",
                self.node_type, other.node_type
            )));
        }
        other.values.clone_from(&self.values);
        Ok(())
    }

    pub fn pre_allocate_log(&mut self, n_slots: usize) {
        let mut log = LogMatrix::default();
        log.preallocate(n_slots, self.variables.len());
        self.log = Some(log);
    }

    pub fn disable_log(&mut self) {
        self.log = None;
    }

    pub fn is_log_enabled(&self) -> bool {
        self.log.is_some()
    }

    pub fn log_into_slot(&mut self, slot: usize, time: f64) -> HopsanResult<()> {
        let values = self.values.to_vec();
        match self.log.as_mut() {
            Some(log) => log.write_slot(slot, time, &values),
            None => Ok(()),
        }
    }

    pub fn log_matrix(&self) -> Option<&LogMatrix> {
        self.log.as_ref()
    }

    pub fn connected_ports(&self) -> &[PortId] {
        &self.connected_ports
    }

    pub fn num_connected_ports(&self) -> usize {
        self.connected_ports.len()
    }

    pub fn is_connected_to_port(&self, port: PortId) -> bool {
        self.connected_ports.contains(&port)
    }

    pub fn add_connected_port(&mut self, port: PortId) {
        if !self.connected_ports.contains(&port) {
            self.connected_ports.push(port);
        }
    }

    pub fn remove_connected_port(&mut self, port: PortId) {
        self.connected_ports.retain(|p| *p != port);
    }

    /// Sets the quantity/unit of data variable 0 on a signal node,
    /// subject to the modifiable flag (spec 4.3).
    pub fn set_signal_quantity(&mut self, quantity: &str, unit: &str) -> HopsanResult<()> {
        if !self.signal_quantity_modifiable {
            return Err(HopsanError::validation(
                "signal quantity is locked and cannot be overridden",
            ));
        }
        if let Some(v) = self.variables.get_mut(0) {
            v.quantity = quantity.to_string();
            v.unit = unit.to_string();
        }
        Ok(())
    }

    pub fn lock_signal_quantity(&mut self) {
        self.signal_quantity_modifiable = false;
    }
}

/// The standard variable set for each node type (spec §2 "Node"), used
/// by the loader when it needs to materialize a node for a freshly
/// created connection rather than reuse one already present.
pub fn default_node(node_type: NodeType) -> Node {
    let vars = match node_type {
        NodeType::Hydraulic => vec![
            DataVariableDescriptor::new("Pressure", "p", "Pa", "Pressure", VariableRole::Intensity),
            DataVariableDescriptor::new("Flow", "q", "m^3/s", "Flow", VariableRole::Flow),
        ],
        NodeType::Pneumatic => vec![
            DataVariableDescriptor::new("Pressure", "p", "Pa", "Pressure", VariableRole::Intensity),
            DataVariableDescriptor::new("MassFlow", "qm", "kg/s", "MassFlow", VariableRole::Flow),
        ],
        NodeType::MechanicalTranslational => vec![
            DataVariableDescriptor::new("Force", "f", "N", "Force", VariableRole::Intensity),
            DataVariableDescriptor::new("Velocity", "v", "m/s", "Velocity", VariableRole::Flow),
            DataVariableDescriptor::new("Position", "x", "m", "Position", VariableRole::Default),
        ],
        NodeType::MechanicalRotational => vec![
            DataVariableDescriptor::new("Torque", "t", "Nm", "Torque", VariableRole::Intensity),
            DataVariableDescriptor::new("AngularVelocity", "w", "rad/s", "AngularVelocity", VariableRole::Flow),
            DataVariableDescriptor::new("Angle", "th", "rad", "Angle", VariableRole::Default),
        ],
        NodeType::Electric => vec![
            DataVariableDescriptor::new("Voltage", "u", "V", "Voltage", VariableRole::Intensity),
            DataVariableDescriptor::new("Current", "i", "A", "Current", VariableRole::Flow),
        ],
        NodeType::Signal => vec![DataVariableDescriptor::new(
            "Value",
            "y",
            "-",
            "",
            VariableRole::Default,
        )],
        NodeType::Empty => vec![],
    };
    Node::new(node_type, vars)
}
