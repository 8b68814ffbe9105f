//! Component (module F): unit of model code exposing ports and
//! parameters and the `configure`/`initialize`/`simulateOneStep`/
//! `finalize` lifecycle. Grounded on the teacher's `Schedulable` trait
//! (`examples/0x112233-legion/src/system.rs`) — virtual dispatch in the
//! original `Component -> ComponentSystem -> ConditionalComponentSystem`
//! hierarchy collapses into one capability trait per spec §9.

use indexmap::IndexMap;

use crate::arena::Id;
use crate::error::HopsanResult;
use crate::parameter::ParameterHandler;
use crate::port::{Port, PortId};
use crate::system::SystemId;

pub type ComponentId = Id<ComponentInstance>;

/// CQS role (spec §1/§4.6). `Undefined` is only valid on a
/// not-yet-classified subsystem; a leaf component is always one of the
/// other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CqsType {
    C,
    Q,
    S,
    Undefined,
}

impl std::fmt::Display for CqsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CqsType::C => "C",
            CqsType::Q => "Q",
            CqsType::S => "S",
            CqsType::Undefined => "Undefined",
        };
        write!(f, "{s}")
    }
}

/// Shared bookkeeping fields every component carries (spec §3
/// "Component"), independent of which [`ComponentBehavior`] drives it.
#[derive(Debug, Clone)]
pub struct ComponentCore {
    pub name: String,
    pub type_name: String,
    pub sub_type_name: String,
    pub cqs: CqsType,
    pub parent: Option<SystemId>,
    pub hierarchy_depth: usize,
    pub desired_timestep: f64,
    pub inherit_timestep: bool,
    pub disabled: bool,
    pub ports: IndexMap<String, PortId>,
    pub parameters: ParameterHandler,
    pub measured_step_cost_ns: u64,
    /// How many of the offline-static-partition calibration trials
    /// (spec 4.9, K≈100) this component has been timed over so far;
    /// `measured_step_cost_ns` is their running average.
    pub measured_trials_done: u32,
}

impl ComponentCore {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, cqs: CqsType) -> Self {
        ComponentCore {
            name: name.into(),
            type_name: type_name.into(),
            sub_type_name: String::new(),
            cqs,
            parent: None,
            hierarchy_depth: 0,
            desired_timestep: 0.0,
            inherit_timestep: true,
            disabled: false,
            ports: IndexMap::new(),
            parameters: ParameterHandler::new(),
            measured_step_cost_ns: 0,
            measured_trials_done: 0,
        }
    }

    pub fn add_port(&mut self, name: impl Into<String>, port: PortId) {
        self.ports.insert(name.into(), port);
    }

    pub fn port_id(&self, name: &str) -> Option<PortId> {
        self.ports.get(name).copied()
    }

    pub fn port_insertion_order(&self) -> impl Iterator<Item = (&String, &PortId)> {
        self.ports.iter()
    }

    /// Effective per-step timestep, honoring `inheritTimestep` and the
    /// "negative/zero falls back to parent" rule (spec 4.6).
    pub fn effective_timestep(&self, parent_dt: f64) -> f64 {
        if self.inherit_timestep || self.desired_timestep <= 0.0 {
            parent_dt
        } else {
            self.desired_timestep
        }
    }
}

/// The behavior a component contributes beyond its bookkeeping fields:
/// the four lifecycle callbacks from spec §3.
pub trait ComponentBehavior: Send + Sync {
    fn configure(&mut self, core: &mut ComponentCore) -> HopsanResult<()> {
        let _ = core;
        Ok(())
    }

    fn initialize(&mut self, core: &mut ComponentCore, t0: f64, t_stop: f64) -> HopsanResult<()> {
        let _ = (core, t0, t_stop);
        Ok(())
    }

    fn simulate_one_step(&mut self, core: &mut ComponentCore, t: f64) -> HopsanResult<()>;

    fn finalize(&mut self, core: &mut ComponentCore) -> HopsanResult<()> {
        let _ = core;
        Ok(())
    }
}

/// A stored component: its shared bookkeeping plus its behavior object.
pub struct ComponentInstance {
    pub core: ComponentCore,
    pub behavior: Box<dyn ComponentBehavior>,
}

impl ComponentInstance {
    pub fn new(core: ComponentCore, behavior: Box<dyn ComponentBehavior>) -> Self {
        ComponentInstance { core, behavior }
    }
}

/// A behavior that forwards ports unchanged and does nothing each step;
/// installed for unknown type names resolved by the loader (spec §6).
pub struct DummyBehavior;

impl ComponentBehavior for DummyBehavior {
    fn simulate_one_step(&mut self, _core: &mut ComponentCore, _t: f64) -> HopsanResult<()> {
        Ok(())
    }
}

/// A signal component that outputs its previous-step input; breaks
/// signal-graph cycles for the topological sort (spec §4.6, Glossary
/// "Unit delay"). `type_name` on components created via
/// [`UnitDelayBehavior::type_name`] must equal this constant for the
/// sort to recognize it (mirrors the original's string check against
/// `"SignalUnitDelay"`).
pub const UNIT_DELAY_TYPE_NAME: &str = "SignalUnitDelay";

pub struct UnitDelayBehavior {
    previous_input: f64,
    pending_input: f64,
}

impl UnitDelayBehavior {
    pub fn new(initial: f64) -> Self {
        UnitDelayBehavior {
            previous_input: initial,
            pending_input: initial,
        }
    }

    pub fn output(&self) -> f64 {
        self.previous_input
    }

    pub fn set_input(&mut self, v: f64) {
        self.pending_input = v;
    }
}

impl ComponentBehavior for UnitDelayBehavior {
    fn simulate_one_step(&mut self, _core: &mut ComponentCore, _t: f64) -> HopsanResult<()> {
        self.previous_input = self.pending_input;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_timestep_inherits_by_default() {
        let core = ComponentCore::new("c1", "Gain", CqsType::S);
        assert_eq!(core.effective_timestep(0.01), 0.01);
    }

    #[test]
    fn effective_timestep_uses_own_when_not_inherited() {
        let mut core = ComponentCore::new("c1", "Gain", CqsType::S);
        core.inherit_timestep = false;
        core.desired_timestep = 0.001;
        assert_eq!(core.effective_timestep(0.01), 0.001);
    }

    #[test]
    fn effective_timestep_falls_back_when_non_positive() {
        let mut core = ComponentCore::new("c1", "Gain", CqsType::S);
        core.inherit_timestep = false;
        core.desired_timestep = 0.0;
        assert_eq!(core.effective_timestep(0.01), 0.01);
    }

    #[test]
    fn unit_delay_outputs_previous_step_input() {
        let mut core = ComponentCore::new("u1", UNIT_DELAY_TYPE_NAME, CqsType::S);
        let mut u = UnitDelayBehavior::new(0.0);
        u.set_input(5.0);
        assert_eq!(u.output(), 0.0);
        u.simulate_one_step(&mut core, 0.0).unwrap();
        assert_eq!(u.output(), 5.0);
    }
}
