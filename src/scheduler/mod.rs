//! Scheduler (module I): drives a [`ComponentSystem`] through
//! initialize/simulate/finalize, in the phase order the TLM requires
//! (Signal, then C, then Q each step — spec §4.6/§4.9). Grounded on
//! `original_source/HopsanCore/src/ComponentSystem.cc`'s `initialize`/
//! `simulate`/`finalize` for the single-threaded driver; the
//! multi-threaded strategies live in [`parallel`].

#[cfg(feature = "par-schedule")]
pub mod parallel;

use crate::component::ComponentId;
use crate::error::{HopsanError, HopsanResult};
use crate::system::ComponentSystem;

fn step_one(system: &mut ComponentSystem, id: ComponentId, t: f64) -> HopsanResult<()> {
    let inst = system
        .components_mut()
        .get_mut(id)
        .ok_or_else(|| crate::error::HopsanError::fatal("scheduled component vanished from arena"))?;
    inst.behavior.simulate_one_step(&mut inst.core, t)
}

/// The three phase vectors with disabled components left out (spec 4.7
/// step 1). A disabled component still received `loadStartValues` during
/// `initialize`, but never has `initialize`/`simulateOneStep`/`finalize`
/// called on it; since the phase vectors themselves are never reordered
/// around this, there is nothing to restore once a component becomes
/// active again; filtering at each call site stands in for the original's
/// move-out/move-back vector swap (design ledger).
pub(crate) fn active_phase_ids(system: &ComponentSystem) -> (Vec<ComponentId>, Vec<ComponentId>, Vec<ComponentId>) {
    let keep = |id: &ComponentId| !system.is_component_disabled(*id);
    (
        system.signal_components().iter().copied().filter(keep).collect(),
        system.c_components().iter().copied().filter(keep).collect(),
        system.q_components().iter().copied().filter(keep).collect(),
    )
}

/// Mirrors `ComponentSystem::initialize`'s full sequence: validate the
/// model, lay out and allocate the log grid, sort the signal graph
/// (fatal on a cycle) and best-effort sort C/Q, evaluate parameters and
/// load start values, then call each active component's `initialize` in
/// Signal → C → Q order and log the initial sample.
pub fn initialize(system: &mut ComponentSystem, t0: f64, t_stop: f64, timestep: f64) -> HopsanResult<()> {
    if timestep <= 0.0 {
        return Err(HopsanError::validation("the timestep is too low"));
    }

    system.reject_unknown_cqs_children()?;
    system.validate_connections()?;
    system.warn_unused_system_parameters();

    system.setup_log_slots_and_ts(t0, t_stop, timestep);
    let log_slots = system.num_log_slots();
    for (_id, node) in system.nodes_mut().iter_mut() {
        if log_slots > 0 {
            node.pre_allocate_log(log_slots);
        } else {
            node.disable_log();
        }
    }

    system.sort_signal_components()?;
    system.sort_c_and_q_components();

    system.check_parameters()?;
    if !system.keeps_values_as_start_values() {
        system.load_start_values();
    }

    let (signal, c, q) = active_phase_ids(system);
    for id in signal.iter().chain(c.iter()).chain(q.iter()) {
        let inst = system
            .components_mut()
            .get_mut(*id)
            .ok_or_else(|| crate::error::HopsanError::fatal("component vanished before initialize"))?;
        inst.behavior.initialize(&mut inst.core, t0, t_stop)?;
    }

    if system.num_log_slots() > 0 {
        for (_id, node) in system.nodes_mut().iter_mut() {
            node.log_into_slot(0, t0)?;
        }
    }
    Ok(())
}

/// One simulation step: Signal (in sorted order), then every C
/// component, then every Q component, then writes the new values into
/// each logging node's current slot. Disabled components are skipped.
pub fn simulate_step(system: &mut ComponentSystem, t: f64, log_slot: Option<usize>) -> HopsanResult<()> {
    let (signal, c, q) = active_phase_ids(system);
    for id in &signal {
        step_one(system, *id, t)?;
    }
    for id in &c {
        step_one(system, *id, t)?;
    }
    for id in &q {
        step_one(system, *id, t)?;
    }
    if let Some(slot) = log_slot {
        for (_id, node) in system.nodes_mut().iter_mut() {
            node.log_into_slot(slot, t)?;
        }
    }
    Ok(())
}

/// Single-threaded simulate loop: advances one sample per requested
/// log slot, logging exactly the steps `setupLogSlotsAndTs` selected.
/// Slot 0 is skipped here when it coincides with step 0 — `initialize`
/// already logged the pre-simulation state into it (spec 4.7 step 12).
pub fn simulate(system: &mut ComponentSystem, t0: f64, t_stop: f64, timestep: f64) -> HopsanResult<()> {
    let log_steps = system.log_these_time_steps().to_vec();
    let mut log_cursor = if log_steps.first() == Some(&0) { 1 } else { 0 };
    let mut t = t0;
    let mut step_index = 0usize;
    while t < t_stop - timestep * 0.5 {
        let log_slot = if log_cursor < log_steps.len() && log_steps[log_cursor] == step_index {
            let slot = log_cursor;
            log_cursor += 1;
            Some(slot)
        } else {
            None
        };
        simulate_step(system, t, log_slot)?;
        t += timestep;
        step_index += 1;
    }
    Ok(())
}

/// Mirrors `ComponentSystem::finalize`: calls every active component's
/// `finalize` in the same phase order initialize used.
pub fn finalize(system: &mut ComponentSystem) -> HopsanResult<()> {
    let (signal, c, q) = active_phase_ids(system);
    for id in signal.iter().chain(c.iter()).chain(q.iter()) {
        let inst = system
            .components_mut()
            .get_mut(*id)
            .ok_or_else(|| crate::error::HopsanError::fatal("component vanished before finalize"))?;
        inst.behavior.finalize(&mut inst.core)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentBehavior, ComponentCore, CqsType};
    use crate::error::HopsanResult;

    struct Counter {
        steps: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ComponentBehavior for Counter {
        fn simulate_one_step(&mut self, _core: &mut ComponentCore, _t: f64) -> HopsanResult<()> {
            self.steps.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn simulate_runs_expected_number_of_steps() {
        let mut system = ComponentSystem::new("root");
        let steps = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let core = ComponentCore::new("c1", "Counter", CqsType::S);
        system.add_component(core, Box::new(Counter { steps: steps.clone() }));

        initialize(&mut system, 0.0, 0.1, 0.01).unwrap();
        simulate(&mut system, 0.0, 0.1, 0.01).unwrap();
        finalize(&mut system).unwrap();

        assert_eq!(steps.load(std::sync::atomic::Ordering::SeqCst), 10);
    }
}
