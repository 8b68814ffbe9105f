//! ComponentSystem (module H): a container of components (and possibly
//! nested systems), owning its subnodes, alias table, and the CQS
//! bucketing signal/C/Q components are scheduled by. Grounded on
//! `original_source/HopsanCore/src/ComponentSystem.cc`.

use indexmap::IndexMap;

use crate::arena::Arena;
use crate::component::{ComponentCore, ComponentId, ComponentInstance, CqsType, UNIT_DELAY_TYPE_NAME};
use crate::connection::{self, ComponentLookup, MergeOutcome};
use crate::error::{HopsanError, HopsanResult};
use crate::message::MessageBus;
use crate::node::{Node, NodeArena, NodeId, NodeType};
use crate::port::{Port, PortArena, PortId, PortKind, SortHint};

/// A system is just a component whose behavior happens to be
/// [`crate::system::SystemBehavior`] — mirrors the original's
/// `ComponentSystem : Component` inheritance without duplicating the
/// arena that stores it.
pub type SystemId = ComponentId;

/// How a name was already taken, used to pick the next free numeric
/// suffix the way `reserveUniqueName` does.
fn next_unique_name(taken: &IndexMap<String, u32>, base: &str) -> String {
    if !taken.contains_key(base) {
        return base.to_string();
    }
    let mut n = taken.get(base).copied().unwrap_or(0) + 1;
    loop {
        let candidate = format!("{base}_{n}");
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// A port's resolved ordering role for the topological sort (spec 4.6):
/// an explicit hint set via `set_sort_hint` wins outright (this is how a
/// system port without a literal Write/Read peer still participates);
/// otherwise the role falls out of the port's own kind. `IndependentDestination`
/// never creates a dependency — it marks a read-type port whose value
/// isn't needed before this component runs (e.g. an input sampled for
/// logging only), which is exactly why it's distinct from `Destination`.
fn effective_sort_hint(port: &Port) -> SortHint {
    match port.sort_hint() {
        SortHint::None => match port.kind() {
            PortKind::Write | PortKind::Power => SortHint::Source,
            PortKind::Read => SortHint::Destination,
            PortKind::System | PortKind::Interface => SortHint::None,
        },
        explicit => explicit,
    }
}

/// One subsystem's worth of components, ports, nodes and bookkeeping.
/// The root model and every nested subsystem are each one `ComponentSystem`.
pub struct ComponentSystem {
    pub core: ComponentCore,
    components: Arena<ComponentInstance>,
    ports: PortArena,
    nodes: NodeArena,
    /// Name -> component id, in insertion order (stable iteration for
    /// deterministic scheduling and save/load).
    children: IndexMap<String, ComponentId>,
    /// Reserved names (components and system ports share one namespace,
    /// per the original's note that GUI lookups require this).
    taken_names: IndexMap<String, u32>,
    /// alias -> (component, port, data variable name), spec 4.5/Glossary.
    aliases: IndexMap<String, (ComponentId, PortId, String)>,
    /// System-level parameters, resolvable by child components (step 2
    /// of the resolution order).
    pub system_parameters: crate::parameter::ParameterHandler,

    component_c: Vec<ComponentId>,
    component_q: Vec<ComponentId>,
    component_signal: Vec<ComponentId>,

    /// This system's own id within whichever arena stores it as a
    /// component (e.g. its parent system's `components` arena), if any.
    /// `None` for the root system. Children record this as their
    /// `parent` so the connection algebra's same-subsystem check works
    /// across nesting.
    self_id: Option<ComponentId>,

    requested_num_log_samples: usize,
    requested_log_start_time: f64,
    num_log_slots: usize,
    log_time_dt: f64,
    log_these_time_steps: Vec<usize>,

    search_paths: Vec<String>,
    external_model_file_path: Option<String>,
    keep_values_as_start_values: bool,
    script: Option<Box<dyn crate::script::InlineScriptEvaluator>>,

    messages: MessageBus,
}

impl ComponentSystem {
    pub fn new(name: impl Into<String>) -> Self {
        ComponentSystem {
            core: ComponentCore::new(name, "Subsystem", CqsType::Undefined),
            components: Arena::new(),
            ports: Arena::new(),
            nodes: Arena::new(),
            children: IndexMap::new(),
            taken_names: IndexMap::new(),
            aliases: IndexMap::new(),
            system_parameters: crate::parameter::ParameterHandler::new(),
            self_id: None,
            component_c: Vec::new(),
            component_q: Vec::new(),
            component_signal: Vec::new(),
            requested_num_log_samples: 0,
            requested_log_start_time: 0.0,
            num_log_slots: 0,
            log_time_dt: 0.0,
            log_these_time_steps: Vec::new(),
            search_paths: Vec::new(),
            external_model_file_path: None,
            keep_values_as_start_values: false,
            script: None,
            messages: MessageBus::new(),
        }
    }

    pub fn add_search_path(&mut self, path: impl Into<String>) {
        self.search_paths.push(path.into());
    }

    pub fn search_paths(&self) -> &[String] {
        &self.search_paths
    }

    pub fn set_external_model_file_path(&mut self, path: impl Into<String>) {
        self.external_model_file_path = Some(path.into());
    }

    pub fn external_model_file_path(&self) -> Option<&str> {
        self.external_model_file_path.as_deref()
    }

    pub fn set_keep_values_as_start_values(&mut self, keep: bool) {
        self.keep_values_as_start_values = keep;
    }

    pub fn keeps_values_as_start_values(&self) -> bool {
        self.keep_values_as_start_values
    }

    pub fn set_inline_script(&mut self, evaluator: Box<dyn crate::script::InlineScriptEvaluator>) {
        self.script = Some(evaluator);
    }

    pub fn inline_script(&self) -> Option<&dyn crate::script::InlineScriptEvaluator> {
        self.script.as_deref()
    }

    /// Mirrors `setSystemParameter`: declares the parameter if unknown,
    /// then sets its value string.
    pub fn set_system_parameter(
        &mut self,
        name: &str,
        value: &str,
        ty: crate::parameter::ParameterType,
    ) -> HopsanResult<()> {
        if self.system_parameters.get(name).is_none() {
            self.system_parameters.declare(crate::parameter::Parameter::new(name, ty));
        }
        self.system_parameters.set_value(name, value)
    }

    /// Sets a component's own desired timestep and marks it as no longer
    /// timestep-inheriting, unless `timestep` is non-positive, which is
    /// accepted and simply leaves inheritance on (design ledger decision:
    /// accept-and-ignore rather than error on a non-root system).
    pub fn set_component_desired_timestep(&mut self, component: ComponentId, timestep: f64) -> HopsanResult<()> {
        let inst = self
            .components
            .get_mut(component)
            .ok_or_else(|| HopsanError::validation("unknown component"))?;
        if timestep > 0.0 {
            inst.core.desired_timestep = timestep;
            inst.core.inherit_timestep = false;
        }
        Ok(())
    }

    pub fn messages(&self) -> &MessageBus {
        &self.messages
    }

    pub fn ports(&self) -> &PortArena {
        &self.ports
    }
    pub fn ports_mut(&mut self) -> &mut PortArena {
        &mut self.ports
    }
    pub fn nodes(&self) -> &NodeArena {
        &self.nodes
    }
    pub fn nodes_mut(&mut self) -> &mut NodeArena {
        &mut self.nodes
    }
    pub fn components(&self) -> &Arena<ComponentInstance> {
        &self.components
    }
    pub fn components_mut(&mut self) -> &mut Arena<ComponentInstance> {
        &mut self.components
    }

    /// Registers this system's own id as seen from its parent, so
    /// children added afterward record the correct `parent` link.
    pub fn set_self_id(&mut self, id: ComponentId) {
        self.self_id = Some(id);
    }

    pub fn get_component(&self, name: &str) -> Option<ComponentId> {
        self.children.get(name).copied()
    }

    pub fn has_component(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn reserve_unique_name(&mut self, wanted: &str) -> String {
        let name = next_unique_name(&self.taken_names, wanted);
        self.taken_names.insert(name.clone(), 0);
        name
    }

    fn unreserve_name(&mut self, name: &str) {
        self.taken_names.shift_remove(name);
    }

    /// Adds an already-constructed component, reserving a unique name for
    /// it, bucketing it by CQS, and setting its hierarchy depth. Mirrors
    /// `addComponent`/`addSubComponentPtrToStorage`.
    pub fn add_component(&mut self, mut core: ComponentCore, behavior: Box<dyn crate::component::ComponentBehavior>) -> ComponentId {
        let unique_name = self.reserve_unique_name(&core.name);
        core.name = unique_name.clone();
        core.hierarchy_depth = self.core.hierarchy_depth + 1;
        core.parent = self.self_id;
        let cqs = core.cqs;
        let instance = ComponentInstance::new(core, behavior);
        let id = self.components.insert(instance);
        self.children.insert(unique_name, id);
        match cqs {
            CqsType::C => self.component_c.push(id),
            CqsType::Q => self.component_q.push(id),
            CqsType::S | CqsType::Undefined => self.component_signal.push(id),
        }
        id
    }

    /// Mirrors `renameSubComponent`: re-reserves the new name, releases
    /// the old one, and fixes up aliases that reference the component.
    pub fn rename_component(&mut self, old_name: &str, new_name: &str) -> HopsanResult<()> {
        let id = self
            .children
            .shift_remove(old_name)
            .ok_or_else(|| HopsanError::validation(format!("no component named '{old_name}' to rename")))?;
        let unique_new = self.reserve_unique_name(new_name);
        self.unreserve_name(old_name);
        self.children.insert(unique_new.clone(), id);
        if let Some(inst) = self.components.get_mut(id) {
            inst.core.name = unique_new.clone();
        }
        for (_alias, (comp_id, _port, _var)) in self.aliases.iter_mut() {
            if *comp_id == id {
                // component identity is unchanged; only the display name
                // of the alias target's owner moved, nothing to patch in
                // the id-keyed table itself.
            }
        }
        Ok(())
    }

    /// Removes a component from scheduling and name-reservation; does not
    /// sever its connections (callers should `disconnect` each port
    /// first, mirroring the original's explicit pre-removal disconnect
    /// loop).
    pub fn remove_component(&mut self, name: &str) -> HopsanResult<()> {
        let id = self
            .children
            .shift_remove(name)
            .ok_or_else(|| HopsanError::validation(format!("no component named '{name}'")))?;
        self.unreserve_name(name);
        self.component_c.retain(|c| *c != id);
        self.component_q.retain(|c| *c != id);
        self.component_signal.retain(|c| *c != id);
        self.components.remove(id);
        Ok(())
    }

    pub fn set_alias(&mut self, alias: &str, component: ComponentId, port: PortId, variable: impl Into<String>) {
        self.aliases.insert(alias.to_string(), (component, port, variable.into()));
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<(ComponentId, PortId, &str)> {
        self.aliases.get(alias).map(|(c, p, v)| (*c, *p, v.as_str()))
    }

    // ---- connection ----

    pub fn connect(&mut self, port1: PortId, port2: PortId, make_node: impl Fn(NodeType) -> Node) -> HopsanResult<NodeId> {
        let owner = self.core_id_placeholder();
        let lookup = SystemAsLookup { system: self };
        // SAFETY note: SystemAsLookup borrows `self` immutably while
        // `merge_node_connection` needs `self.ports`/`self.nodes` mutably;
        // resolved below by copying the small facts it needs up front.
        let facts = lookup.snapshot();
        drop(lookup);
        let outcome: MergeOutcome = connection::merge_node_connection(
            &mut self.ports,
            &mut self.nodes,
            owner,
            &facts,
            port1,
            port2,
            make_node,
        )?;
        self.determine_cqs_type();
        Ok(outcome.node_id)
    }

    pub fn disconnect(&mut self, port1: PortId, port2: PortId, make_node: impl Fn(NodeType) -> Node) -> HopsanResult<()> {
        connection::split_node_connection(&mut self.ports, &mut self.nodes, port1, port2, make_node)?;
        self.determine_cqs_type();
        Ok(())
    }

    /// Placeholder "this system's own id" used only for the own-systemport
    /// counter in the connection algebra; a system connecting its own
    /// children never needs to compare against an external id, so a
    /// dangling sentinel (never equal to a real component) is correct
    /// here. Call sites that connect through a system *port* pass the
    /// system's real id explicitly via [`ComponentSystem::connect_as`].
    fn core_id_placeholder(&self) -> ComponentId {
        ComponentId::dangling()
    }

    // ---- CQS inference (determineCQSType) ----

    /// Recomputes this system's own CQS classification from the ports
    /// connected to its boundary (system ports), the way a connect or
    /// disconnect at this level would trigger in the original.
    pub fn determine_cqs_type(&mut self) {
        let mut c_ctr = 0usize;
        let mut q_ctr = 0usize;
        let mut s_ctr = 0usize;

        for (_name, port_id) in self.core.port_insertion_order() {
            let Some(port) = self.ports.get(*port_id) else { continue };
            for peer in port.connected_peers() {
                let Some(peer_port) = self.ports.get(*peer) else { continue };
                if peer_port.kind() == PortKind::Read || peer_port.kind() == PortKind::Write {
                    s_ctr += 1;
                    continue;
                }
                match self.cqs(peer_port.component()) {
                    CqsType::C => c_ctr += 1,
                    CqsType::Q => q_ctr += 1,
                    CqsType::S => s_ctr += 1,
                    CqsType::Undefined => {}
                }
            }
        }

        self.core.cqs = if c_ctr > 0 && q_ctr == 0 {
            CqsType::C
        } else if q_ctr > 0 && c_ctr == 0 {
            CqsType::Q
        } else if s_ctr > 0 && c_ctr == 0 && q_ctr == 0 {
            CqsType::S
        } else {
            CqsType::Undefined
        };
    }

    fn cqs(&self, id: ComponentId) -> CqsType {
        self.components.get(id).map(|c| c.core.cqs).unwrap_or(CqsType::Undefined)
    }

    // ---- topological sort (sortComponentVector) ----

    /// Attempts to reorder `vector` so that every component whose port
    /// resolves to [`SortHint::Destination`] appears after whichever
    /// component's peer port resolves to [`SortHint::Source`] on the same
    /// node. Unit-delay components are exempt since they intentionally
    /// break the dependency (they output last step's value). A read port
    /// connected only to other read ports — common for input variables on
    /// interface ports — has no `Source` peer and so imposes no ordering
    /// constraint of its own. Returns an error naming the last
    /// successfully placed component when an algebraic loop blocks
    /// progress, mirroring `sortComponentVector`'s failure report.
    pub fn sort_component_vector(&self, vector: &[ComponentId]) -> HopsanResult<Vec<ComponentId>> {
        let mut sorted: Vec<ComponentId> = Vec::with_capacity(vector.len());
        let mut did_something = true;

        while did_something {
            did_something = false;
            for &candidate in vector {
                if sorted.contains(&candidate) {
                    continue;
                }
                let mut ready = true;
                if let Some(inst) = self.components.get(candidate) {
                    for (_name, port_id) in inst.core.port_insertion_order() {
                        let Some(port) = self.ports.get(*port_id) else { continue };
                        if effective_sort_hint(port) != SortHint::Destination || !port.is_connected() {
                            continue;
                        }
                        for peer in port.connected_peers() {
                            let Some(peer_port) = self.ports.get(*peer) else { continue };
                            if effective_sort_hint(peer_port) != SortHint::Source {
                                continue;
                            }
                            let writer = peer_port.component();
                            let Some(writer_inst) = self.components.get(writer) else { continue };
                            if writer_inst.core.type_name == UNIT_DELAY_TYPE_NAME {
                                continue;
                            }
                            if !sorted.contains(&writer) && vector.contains(&writer) {
                                ready = false;
                            }
                        }
                    }
                }
                if ready {
                    sorted.push(candidate);
                    did_something = true;
                }
            }
        }

        if sorted.len() == vector.len() {
            Ok(sorted)
        } else {
            let last = sorted
                .last()
                .and_then(|id| self.components.get(*id))
                .map(|c| c.core.name.clone());
            Err(HopsanError::validation(match last {
                Some(name) => format!(
                    "algebraic loop found, signal components could not be sorted; last sorted: '{name}'. Hint: use a unit delay component to break the loop."
                ),
                None => "algebraic loop found, signal components could not be sorted. Hint: use a unit delay component to break the loop.".to_string(),
            }))
        }
    }

    pub fn sort_signal_components(&mut self) -> HopsanResult<()> {
        let sorted = self.sort_component_vector(&self.component_signal.clone())?;
        self.component_signal = sorted;
        Ok(())
    }

    /// Best-effort sort of the C and Q vectors (spec 4.7 step 9): unlike
    /// the signal sort, a remaining algebraic loop here is non-fatal and
    /// just leaves that vector in its previous order.
    pub fn sort_c_and_q_components(&mut self) {
        if let Ok(sorted) = self.sort_component_vector(&self.component_c.clone()) {
            self.component_c = sorted;
        }
        if let Ok(sorted) = self.sort_component_vector(&self.component_q.clone()) {
            self.component_q = sorted;
        }
    }

    pub fn c_components(&self) -> &[ComponentId] {
        &self.component_c
    }
    pub fn q_components(&self) -> &[ComponentId] {
        &self.component_q
    }
    pub fn signal_components(&self) -> &[ComponentId] {
        &self.component_signal
    }

    /// Whether `id` is currently disabled (spec 4.7 step 1): a disabled
    /// component still gets `loadStartValues`, but is left out of
    /// `initialize`/`simulateOneStep`/`finalize`.
    pub fn is_component_disabled(&self, id: ComponentId) -> bool {
        self.components.get(id).map(|c| c.core.disabled).unwrap_or(false)
    }

    // ---- log slot computation (setupLogSlotsAndTs) ----

    pub fn set_num_log_samples(&mut self, n: usize) {
        self.requested_num_log_samples = n;
    }

    pub fn set_log_start_time(&mut self, t: f64) {
        self.requested_log_start_time = t;
    }

    /// `limitNumLogSlotsToLogOrSimTimeInterval`: never log more samples
    /// than the simulation actually takes.
    fn limit_num_log_slots(sim_start_t: f64, sim_stop_t: f64, sim_ts: f64, log_start_t: f64, requested: usize) -> usize {
        let mut start_t = sim_start_t.max(log_start_t);
        if start_t > sim_stop_t {
            start_t = sim_stop_t;
        }
        let available = (sim_stop_t - start_t) / sim_ts + 1.0;
        if available < requested as f64 {
            available.max(0.0) as usize
        } else {
            requested
        }
    }

    /// Computes the log grid (slot count, sample interval, and which
    /// simulation step maps to which log slot) for one run. Mirrors
    /// `setupLogSlotsAndTs` including its emitted "toofewsamples"
    /// diagnostic when the request had to be clamped.
    pub fn setup_log_slots_and_ts(&mut self, sim_start_t: f64, sim_stop_t: f64, sim_ts: f64) {
        self.num_log_slots = Self::limit_num_log_slots(
            sim_start_t,
            sim_stop_t,
            sim_ts,
            self.requested_log_start_time,
            self.requested_num_log_samples,
        );

        if self.num_log_slots != self.requested_num_log_samples {
            self.messages.warning_tagged(
                format!(
                    "requested {} log samples but this is more than the total number of simulation samples, limiting to {}",
                    self.requested_num_log_samples, self.num_log_slots
                ),
                "toofewsamples",
            );
        }

        if self.num_log_slots == 0 {
            self.log_these_time_steps.clear();
            self.log_time_dt = 0.0;
            return;
        }

        let log_start_t = sim_start_t.max(self.requested_log_start_time);
        self.log_time_dt = (sim_stop_t - log_start_t) / (self.num_log_slots - 1) as f64;

        let mut log_t = log_start_t;
        let mut sim_t = sim_start_t;
        self.log_these_time_steps.clear();
        self.log_these_time_steps.reserve(self.num_log_slots);

        let mut n = ((log_t - sim_t) / sim_ts + 0.5) as usize;
        self.log_these_time_steps.push(n);
        sim_t += n as f64 * sim_ts;

        while self.log_these_time_steps.len() < self.num_log_slots {
            log_t += self.log_time_dt;
            n = ((log_t - sim_t) / sim_ts + 0.5) as usize;
            sim_t += n as f64 * sim_ts;
            let previous = *self.log_these_time_steps.last().unwrap();
            self.log_these_time_steps.push(previous + n);
        }
    }

    pub fn num_log_slots(&self) -> usize {
        self.num_log_slots
    }

    pub fn log_time_dt(&self) -> f64 {
        self.log_time_dt
    }

    pub fn log_these_time_steps(&self) -> &[usize] {
        &self.log_these_time_steps
    }

    // ---- parameter resolution order: self -> system -> ancestor -> alias -> script ----

    /// Resolves `name` on `component` to a concrete double, per the
    /// ordering decided in the design ledger: same-component parameter,
    /// then this system's own parameters, then (by the caller walking up
    /// `parent`) ancestor systems, then alias lookup, then falling
    /// through to `script` for anything still unresolved.
    pub fn evaluate_component_parameter(
        &self,
        component: ComponentId,
        name: &str,
        stack: &mut crate::parameter::EvalStack,
        script: Option<&dyn crate::script::InlineScriptEvaluator>,
    ) -> HopsanResult<f64> {
        stack.enter(name)?;
        let result = self.evaluate_component_parameter_inner(component, name, stack, script);
        stack.exit();
        result
    }

    fn evaluate_component_parameter_inner(
        &self,
        component: ComponentId,
        name: &str,
        stack: &mut crate::parameter::EvalStack,
        script: Option<&dyn crate::script::InlineScriptEvaluator>,
    ) -> HopsanResult<f64> {
        // 1. same-component parameter
        if let Some(inst) = self.components.get(component) {
            if let Some(v) = inst.core.parameters.local_value(name).and_then(|v| v.as_f64()) {
                return Ok(v);
            }
            if let Some(param) = inst.core.parameters.get(name) {
                if param.value().is_none() {
                    let raw = param.raw_value.clone();
                    if let Ok(v) = raw.trim().parse::<f64>() {
                        return Ok(v);
                    }
                    // 2. this system's own parameters
                    if let Some(sys_param) = self.system_parameters.get(&raw) {
                        if let Some(v) = sys_param.value().and_then(|v| v.as_f64()) {
                            return Ok(v);
                        }
                    }
                    // 3. alias lookup (alias-first order, see design ledger)
                    if let Some((alias_comp, _port, var)) = self.resolve_alias(&raw) {
                        if alias_comp != component {
                            return self.evaluate_component_parameter_inner(alias_comp, var, stack, script);
                        }
                    }
                    // 4. external inline-script fallback
                    if let Some(evaluator) = script {
                        return evaluator.evaluate(&raw);
                    }
                    return Err(HopsanError::evaluation(format!(
                        "could not resolve parameter reference '{raw}' for '{name}'"
                    )));
                }
            }
        }
        Err(HopsanError::validation(format!("unknown parameter '{name}'")))
    }

    /// Resolves one system parameter's raw value string: a literal, or a
    /// reference to another system parameter (cycle-guarded), or a final
    /// fallback to `script`. Grounded on the same resolution chain
    /// `evaluate_component_parameter_inner` walks, specialized to the
    /// system's own parameter table since a system parameter has no
    /// owning component or alias to fall back through.
    fn resolve_system_parameter_reference(
        &self,
        raw: &str,
        stack: &mut crate::parameter::EvalStack,
        script: Option<&dyn crate::script::InlineScriptEvaluator>,
    ) -> HopsanResult<f64> {
        if let Ok(v) = raw.trim().parse::<f64>() {
            return Ok(v);
        }
        if let Some(param) = self.system_parameters.get(raw) {
            if let Some(v) = param.value().and_then(|v| v.as_f64()) {
                return Ok(v);
            }
            stack.enter(raw)?;
            let next_raw = param.raw_value.clone();
            let result = self.resolve_system_parameter_reference(&next_raw, stack, script);
            stack.exit();
            return result;
        }
        if let Some(evaluator) = script {
            return evaluator.evaluate(raw);
        }
        Err(HopsanError::evaluation(format!(
            "could not resolve system parameter reference '{raw}'"
        )))
    }

    /// Top-level parameter evaluation pass (spec 4.7 step 10,
    /// `checkParameters`/`updateParameters`): resolves every pending
    /// system parameter first, then every pending component parameter,
    /// writing each resolved value back so `local_value` picks it up
    /// afterward. The first reference that can't be resolved aborts with
    /// the offending parameter named (spec 4.10).
    pub fn check_parameters(&mut self) -> HopsanResult<()> {
        let script = self.script.as_deref();

        let pending_sys: Vec<String> = self.system_parameters.needs_evaluation().cloned().collect();
        for name in pending_sys {
            let raw = match self.system_parameters.get(&name) {
                Some(p) => p.raw_value.clone(),
                None => continue,
            };
            let mut stack = crate::parameter::EvalStack::new();
            let value = self.resolve_system_parameter_reference(&raw, &mut stack, script)?;
            self.system_parameters
                .set_resolved(&name, crate::parameter::ParameterValue::Double(value));
        }

        let ids: Vec<ComponentId> = self.components.iter().map(|(id, _)| id).collect();
        for id in ids {
            let pending: Vec<String> = match self.components.get(id) {
                Some(inst) => inst.core.parameters.needs_evaluation().cloned().collect(),
                None => continue,
            };
            for name in pending {
                let mut stack = crate::parameter::EvalStack::new();
                let value = self
                    .evaluate_component_parameter(id, &name, &mut stack, script)
                    .map_err(|e| {
                        let comp_name = self
                            .components
                            .get(id)
                            .map(|c| c.core.name.clone())
                            .unwrap_or_default();
                        HopsanError::evaluation(format!(
                            "parameter '{name}' on component '{comp_name}' could not be evaluated: {}",
                            e.message()
                        ))
                    })?;
                if let Some(inst) = self.components.get_mut(id) {
                    inst.core
                        .parameters
                        .set_resolved(&name, crate::parameter::ParameterValue::Double(value));
                }
            }
        }
        Ok(())
    }

    /// Copies every port's start-node values into its live shared node
    /// (spec 4.8). A write/power/system/interface port is always the
    /// source of truth for its node; a read port only loads through when
    /// every connected peer is itself a read port — an unconnected read
    /// port, or one wired only to other read ports, keeps its own start
    /// value, but a read port joined to any write or power port must
    /// instead pick up the writer's initial value, so it is skipped here.
    pub fn load_start_values(&mut self) {
        let port_ids: Vec<PortId> = self.ports.iter().map(|(id, _)| id).collect();
        for port_id in port_ids {
            let (node_id, start) = {
                let Some(port) = self.ports.get(port_id) else { continue };
                let Some(node_id) = port.node() else { continue };
                let should_load = match port.kind() {
                    PortKind::Read => port.connected_peers().iter().all(|peer| {
                        self.ports
                            .get(*peer)
                            .map(|p| p.kind() == PortKind::Read)
                            .unwrap_or(true)
                    }),
                    _ => true,
                };
                if !should_load {
                    continue;
                }
                match port.start_node() {
                    Some(start) => (node_id, start.clone()),
                    None => continue,
                }
            };
            if let Some(node) = self.nodes.get_mut(node_id) {
                let _ = start.copy_values_to(node);
            }
        }
    }

    /// Validates connection-required ports and plain power-port node
    /// occupancy (spec 4.7 step 2), mirroring
    /// `checkModelBeforeSimulation`'s per-port loop. System/interface
    /// ports are exempt from the lone-power-port rule: this model has no
    /// separate interface-power sub-kind to distinguish a legitimate
    /// single-peer boundary pass-through from a genuine orphan (see
    /// design ledger).
    pub fn validate_connections(&self) -> HopsanResult<()> {
        for (_id, inst) in self.components.iter() {
            for (port_name, port_id) in inst.core.port_insertion_order() {
                let Some(port) = self.ports.get(*port_id) else { continue };
                if port.connection_required() && !port.is_connected() {
                    return Err(HopsanError::validation(format!(
                        "port '{port_name}' on component '{}' is not connected",
                        inst.core.name
                    )));
                }
                if port.is_connected() && port.kind() == PortKind::Power {
                    let other_power_peers = port
                        .connected_peers()
                        .iter()
                        .filter(|peer| {
                            self.ports
                                .get(**peer)
                                .map(|p| p.kind() == PortKind::Power)
                                .unwrap_or(false)
                        })
                        .count();
                    if other_power_peers == 0 {
                        return Err(HopsanError::validation(format!(
                            "port '{port_name}' on component '{}' is connected to a node with only one power port",
                            inst.core.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Rejects any child whose CQS type is still `Undefined` at
    /// initialization time (spec 4.7 step 3). A leaf component always
    /// declares C, Q or S at construction; only a not-yet-connected
    /// subsystem is allowed to sit at `Undefined`, and subsystems aren't
    /// represented as entries in this arena.
    pub fn reject_unknown_cqs_children(&self) -> HopsanResult<()> {
        for (_id, inst) in self.components.iter() {
            if inst.core.cqs == CqsType::Undefined {
                return Err(HopsanError::validation(format!(
                    "component '{}' has an undefined CQS type",
                    inst.core.name
                )));
            }
        }
        Ok(())
    }

    /// Warns about system parameters that no child references by exact
    /// value-string match (spec 4.7 step 4), mirroring the
    /// `unusedSysParNames` bookkeeping in `checkModelBeforeSimulation`.
    /// Names containing `#` are skipped (the start-value-suffix
    /// convention never refers to a user-facing system parameter).
    pub fn warn_unused_system_parameters(&self) {
        let mut unused: Vec<&String> = self.system_parameters.names().filter(|n| !n.contains('#')).collect();
        if unused.is_empty() {
            return;
        }
        for (_id, inst) in self.components.iter() {
            if unused.is_empty() {
                break;
            }
            for name in inst.core.parameters.names() {
                if let Some(param) = inst.core.parameters.get(name) {
                    let raw = param.raw_value.trim();
                    unused.retain(|sys_name| sys_name.as_str() != raw);
                }
            }
        }
        if !unused.is_empty() {
            let names: Vec<&str> = unused.iter().map(|s| s.as_str()).collect();
            self.messages.warning(format!(
                "the following system parameters are not used by any sub component: {}",
                names.join(", ")
            ));
        }
    }
}

/// Snapshot of the per-component facts [`ComponentLookup`] needs, taken
/// once so `connect`/`disconnect` don't hold a borrow of `self` across
/// the mutable arena operations they perform.
struct ComponentFacts {
    cqs: IndexMap<ComponentId, CqsType>,
    hierarchy_depth: IndexMap<ComponentId, usize>,
    parent: IndexMap<ComponentId, Option<ComponentId>>,
}

impl ComponentLookup for ComponentFacts {
    fn cqs(&self, id: ComponentId) -> CqsType {
        self.cqs.get(&id).copied().unwrap_or(CqsType::Undefined)
    }
    fn hierarchy_depth(&self, id: ComponentId) -> usize {
        self.hierarchy_depth.get(&id).copied().unwrap_or(0)
    }
    fn parent_system(&self, id: ComponentId) -> Option<ComponentId> {
        self.parent.get(&id).copied().flatten()
    }
}

struct SystemAsLookup<'a> {
    system: &'a ComponentSystem,
}

impl<'a> SystemAsLookup<'a> {
    fn snapshot(&self) -> ComponentFacts {
        let mut cqs = IndexMap::new();
        let mut hierarchy_depth = IndexMap::new();
        let mut parent = IndexMap::new();
        for (id, inst) in self.system.components.iter() {
            cqs.insert(id, inst.core.cqs);
            hierarchy_depth.insert(id, inst.core.hierarchy_depth);
            parent.insert(id, inst.core.parent);
        }
        ComponentFacts { cqs, hierarchy_depth, parent }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentCore, DummyBehavior};
    use crate::node::{DataVariableDescriptor, VariableRole};
    use crate::port::PortVariant;

    fn add_leaf(sys: &mut ComponentSystem, name: &str, cqs: CqsType) -> ComponentId {
        let core = ComponentCore::new(name, "TestComp", cqs);
        sys.add_component(core, Box::new(DummyBehavior))
    }

    #[test]
    fn duplicate_names_get_numeric_suffix() {
        let mut sys = ComponentSystem::new("root");
        let a = add_leaf(&mut sys, "Pump", CqsType::C);
        let b = add_leaf(&mut sys, "Pump", CqsType::C);
        assert_ne!(a, b);
        assert!(sys.has_component("Pump"));
        assert!(sys.has_component("Pump_1"));
    }

    #[test]
    fn removed_name_can_be_reused() {
        let mut sys = ComponentSystem::new("root");
        add_leaf(&mut sys, "Valve", CqsType::Q);
        sys.remove_component("Valve").unwrap();
        let id = add_leaf(&mut sys, "Valve", CqsType::Q);
        assert_eq!(sys.get_component("Valve"), Some(id));
    }

    #[test]
    fn log_slots_clamp_to_available_samples() {
        let mut sys = ComponentSystem::new("root");
        sys.set_num_log_samples(1000);
        sys.setup_log_slots_and_ts(0.0, 1.0, 0.1);
        // 10 simulation steps + 1 initial sample = 11 available slots.
        assert_eq!(sys.num_log_slots(), 11);
        assert_eq!(sys.log_these_time_steps().len(), 11);
    }

    #[test]
    fn log_slots_match_request_when_plentiful() {
        let mut sys = ComponentSystem::new("root");
        sys.set_num_log_samples(5);
        sys.setup_log_slots_and_ts(0.0, 1.0, 0.01);
        assert_eq!(sys.num_log_slots(), 5);
        assert_eq!(sys.log_these_time_steps().len(), 5);
    }

    #[test]
    fn sort_breaks_trivial_chain() {
        let mut sys = ComponentSystem::new("root");
        let src = add_leaf(&mut sys, "Source", CqsType::S);
        let dst = add_leaf(&mut sys, "Sink", CqsType::S);

        let out_port = sys.ports.insert(Port::new("out", PortVariant::WriteSignal, NodeType::Signal, src, false));
        let in_port = sys.ports.insert(Port::new("in", PortVariant::ReadSignal, NodeType::Signal, dst, false));
        if let Some(c) = sys.components.get_mut(src) {
            c.core.add_port("out", out_port);
        }
        if let Some(c) = sys.components.get_mut(dst) {
            c.core.add_port("in", in_port);
        }
        let make_signal = |_: NodeType| Node::new(NodeType::Signal, vec![DataVariableDescriptor::new("Value", "y", "-", "", VariableRole::Default)]);
        sys.connect(out_port, in_port, make_signal).unwrap();

        sys.component_signal = vec![dst, src];
        let sorted = sys.sort_component_vector(&sys.component_signal.clone()).unwrap();
        assert_eq!(sorted, vec![src, dst]);
    }

    #[test]
    fn sort_reports_algebraic_loop() {
        let mut sys = ComponentSystem::new("root");
        let a = add_leaf(&mut sys, "A", CqsType::S);
        let b = add_leaf(&mut sys, "B", CqsType::S);

        let a_in = sys.ports.insert(Port::new("in", PortVariant::ReadSignal, NodeType::Signal, a, false));
        let a_out = sys.ports.insert(Port::new("out", PortVariant::WriteSignal, NodeType::Signal, a, false));
        let b_in = sys.ports.insert(Port::new("in", PortVariant::ReadSignal, NodeType::Signal, b, false));
        let b_out = sys.ports.insert(Port::new("out", PortVariant::WriteSignal, NodeType::Signal, b, false));
        if let Some(c) = sys.components.get_mut(a) {
            c.core.add_port("in", a_in);
            c.core.add_port("out", a_out);
        }
        if let Some(c) = sys.components.get_mut(b) {
            c.core.add_port("in", b_in);
            c.core.add_port("out", b_out);
        }
        let make_signal = |_: NodeType| Node::new(NodeType::Signal, vec![DataVariableDescriptor::new("Value", "y", "-", "", VariableRole::Default)]);
        sys.connect(b_out, a_in, make_signal).unwrap();
        sys.connect(a_out, b_in, make_signal).unwrap();

        sys.component_signal = vec![a, b];
        let err = sys.sort_component_vector(&sys.component_signal.clone());
        assert!(err.is_err());
    }

    #[test]
    fn determine_cqs_type_infers_c_from_connected_children() {
        let mut sys = ComponentSystem::new("root");
        let c = add_leaf(&mut sys, "Cyl", CqsType::C);
        let sysport = sys.ports.insert(Port::new(
            "P1",
            PortVariant::System,
            NodeType::Hydraulic,
            ComponentId::dangling(),
            false,
        ));
        sys.core.add_port("P1", sysport);
        let pp = sys.ports.insert(Port::new("P1", PortVariant::Power, NodeType::Hydraulic, c, true));
        if let Some(inst) = sys.components.get_mut(c) {
            inst.core.add_port("P1", pp);
        }
        let make_hyd = |_: NodeType| Node::new(NodeType::Hydraulic, vec![DataVariableDescriptor::new("Pressure", "p", "Pa", "Pressure", VariableRole::Intensity)]);
        sys.connect(sysport, pp, make_hyd).unwrap();
        assert_eq!(sys.core.cqs, CqsType::C);
    }

    #[test]
    fn read_port_connected_only_to_read_ports_creates_no_dependency() {
        // A read-only-to-read-only connection (common for input variables
        // on interface ports, spec 4.8) must not be treated as an
        // algebraic-loop-forming dependency by the sort.
        let mut sys = ComponentSystem::new("root");
        let a = add_leaf(&mut sys, "A", CqsType::S);
        let b = add_leaf(&mut sys, "B", CqsType::S);

        let a_in = sys.ports.insert(Port::new("in", PortVariant::ReadSignal, NodeType::Signal, a, false));
        let b_in = sys.ports.insert(Port::new("in", PortVariant::ReadSignal, NodeType::Signal, b, false));
        if let Some(c) = sys.components.get_mut(a) {
            c.core.add_port("in", a_in);
        }
        if let Some(c) = sys.components.get_mut(b) {
            c.core.add_port("in", b_in);
        }
        let make_signal = |_: NodeType| Node::new(NodeType::Signal, vec![DataVariableDescriptor::new("Value", "y", "-", "", VariableRole::Default)]);
        sys.connect(a_in, b_in, make_signal).unwrap();

        sys.component_signal = vec![b, a];
        let sorted = sys.sort_component_vector(&sys.component_signal.clone()).unwrap();
        // No dependency either way: original relative order is preserved.
        assert_eq!(sorted, vec![b, a]);
    }

    #[test]
    fn explicit_sort_hint_orders_system_ports_without_a_write_kind() {
        // Two `System` ports (PortKind::Interface) default to SortHint::None
        // and would otherwise impose no order at all; an explicit hint lets
        // the nested-subsystem case still order correctly.
        let mut sys = ComponentSystem::new("root");
        let a = add_leaf(&mut sys, "A", CqsType::S);
        let b = add_leaf(&mut sys, "B", CqsType::S);

        let a_out = sys.ports.insert(Port::new("out", PortVariant::System, NodeType::Signal, a, false));
        let b_in = sys.ports.insert(Port::new("in", PortVariant::System, NodeType::Signal, b, false));
        if let Some(c) = sys.components.get_mut(a) {
            c.core.add_port("out", a_out);
        }
        if let Some(c) = sys.components.get_mut(b) {
            c.core.add_port("in", b_in);
        }
        let make_signal = |_: NodeType| Node::new(NodeType::Signal, vec![DataVariableDescriptor::new("Value", "y", "-", "", VariableRole::Default)]);
        sys.connect(a_out, b_in, make_signal).unwrap();

        sys.component_signal = vec![b, a];
        let unhinted = sys.sort_component_vector(&sys.component_signal.clone()).unwrap();
        assert_eq!(unhinted, vec![b, a], "System ports with no hint impose no order");

        if let Some(p) = sys.ports.get_mut(a_out) {
            p.set_sort_hint(SortHint::Source);
        }
        if let Some(p) = sys.ports.get_mut(b_in) {
            p.set_sort_hint(SortHint::Destination);
        }
        let hinted = sys.sort_component_vector(&sys.component_signal.clone()).unwrap();
        assert_eq!(hinted, vec![a, b], "explicit hints make B wait for A");
    }

    #[test]
    fn load_start_values_skips_read_port_wired_to_a_writer() {
        let mut sys = ComponentSystem::new("root");
        let writer = add_leaf(&mut sys, "Writer", CqsType::S);
        let reader = add_leaf(&mut sys, "Reader", CqsType::S);

        let out_port = sys.ports.insert(Port::new("out", PortVariant::WriteSignal, NodeType::Signal, writer, false));
        let in_port = sys.ports.insert(Port::new("in", PortVariant::ReadSignal, NodeType::Signal, reader, false));
        if let Some(c) = sys.components.get_mut(writer) {
            c.core.add_port("out", out_port);
        }
        if let Some(c) = sys.components.get_mut(reader) {
            c.core.add_port("in", in_port);
        }
        let make_signal = |_: NodeType| Node::new(NodeType::Signal, vec![DataVariableDescriptor::new("Value", "y", "-", "", VariableRole::Default)]);
        let node_id = sys.connect(out_port, in_port, make_signal).unwrap();

        let mut writer_start = Node::new(NodeType::Signal, vec![DataVariableDescriptor::new("Value", "y", "-", "", VariableRole::Default)]);
        writer_start.set_value(0, 7.0);
        if let Some(p) = sys.ports.get_mut(out_port) {
            p.install_start_node(writer_start);
        }
        let mut reader_start = Node::new(NodeType::Signal, vec![DataVariableDescriptor::new("Value", "y", "-", "", VariableRole::Default)]);
        reader_start.set_value(0, 99.0);
        if let Some(p) = sys.ports.get_mut(in_port) {
            p.install_start_node(reader_start);
        }

        sys.load_start_values();
        assert_eq!(sys.nodes.get(node_id).unwrap().value(0), 7.0);
    }

    #[test]
    fn validate_connections_rejects_missing_required_port() {
        let mut sys = ComponentSystem::new("root");
        let a = add_leaf(&mut sys, "A", CqsType::S);
        let in_port = sys.ports.insert(Port::new("in", PortVariant::ReadSignal, NodeType::Signal, a, true));
        if let Some(c) = sys.components.get_mut(a) {
            c.core.add_port("in", in_port);
        }
        assert!(sys.validate_connections().is_err());
    }

    #[test]
    fn reject_unknown_cqs_children_rejects_undefined() {
        let mut sys = ComponentSystem::new("root");
        add_leaf(&mut sys, "Weird", CqsType::Undefined);
        assert!(sys.reject_unknown_cqs_children().is_err());
    }

    #[test]
    fn warn_unused_system_parameters_flags_unreferenced_names() {
        let mut sys = ComponentSystem::new("root");
        sys.system_parameters
            .declare(crate::parameter::Parameter::new("K", crate::parameter::ParameterType::Double));
        sys.system_parameters.set_value("K", "2.0").unwrap();
        sys.warn_unused_system_parameters();
        assert_eq!(sys.messages().count_warning(), 1);
    }

    #[test]
    fn check_parameters_resolves_system_parameter_reference() {
        let mut sys = ComponentSystem::new("root");
        sys.system_parameters
            .declare(crate::parameter::Parameter::new("K", crate::parameter::ParameterType::Double));
        sys.system_parameters.set_value("K", "2.0").unwrap();

        let gain = add_leaf(&mut sys, "Gain", CqsType::S);
        if let Some(inst) = sys.components.get_mut(gain) {
            inst.core
                .parameters
                .declare(crate::parameter::Parameter::new("k", crate::parameter::ParameterType::Double));
            inst.core.parameters.set_value("k", "K").unwrap();
        }

        sys.check_parameters().unwrap();
        let v = sys
            .components
            .get(gain)
            .unwrap()
            .core
            .parameters
            .local_value("k")
            .and_then(|v| v.as_f64());
        assert_eq!(v, Some(2.0));
    }
}
