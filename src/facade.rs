//! Simulation Facade (module J): the three public lifecycle calls a
//! host (GUI, CLI, test harness) drives a model through —
//! `initialize(t0, tStop)` → `simulate(tStop)` → `finalize()` — plus an
//! optional multi-threaded `simulate` variant. Grounded on
//! `original_source/HopsanCore/src/ComponentSystem.cc`'s
//! `initialize`/`simulate`/`simulateMultiThreaded`/`finalize` quartet,
//! collapsed here into one owning handle instead of being methods on
//! `ComponentSystem` itself, the way the teacher's `Universe` is a thin
//! owning wrapper around the allocator it hands out to `World`s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::HopsanResult;
use crate::scheduler;
use crate::system::ComponentSystem;

#[cfg(feature = "par-schedule")]
use crate::scheduler::parallel::SchedulingAlgorithm;

/// Mirrors the teacher's scoped-pool config plus the log/timestep knobs
/// `ComponentSystem::setNumLogSamples`/`setLogStartTime` expose at the
/// loader layer (spec §6).
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub timestep: f64,
    pub num_log_samples: usize,
    pub log_start_time: f64,
    pub num_threads: usize,
    #[cfg(feature = "par-schedule")]
    pub algorithm: SchedulingAlgorithm,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            timestep: 0.001,
            num_log_samples: 0,
            log_start_time: 0.0,
            num_threads: 1,
            #[cfg(feature = "par-schedule")]
            algorithm: SchedulingAlgorithm::OfflineStaticPartition,
        }
    }
}

/// A thread-safe cancellation flag: `simulate` polls it once per step,
/// mirroring `stopSimulation(reason)`'s propagation up the system
/// hierarchy (spec §4.7). A host calls [`StopHandle::request_stop`] from
/// any thread (a UI cancel button, a signal handler) to end the run
/// early; the next step boundary observes it.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        StopHandle(Arc::new(AtomicBool::new(false)))
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns a [`ComponentSystem`] for the duration of one run and exposes
/// the three lifecycle calls plus threaded `simulate`.
pub struct SimulationFacade {
    system: ComponentSystem,
    settings: SimulationSettings,
    t: f64,
    stop: StopHandle,
    #[cfg(feature = "par-schedule")]
    pool: Option<rayon::ThreadPool>,
}

impl SimulationFacade {
    pub fn new(system: ComponentSystem, settings: SimulationSettings) -> Self {
        SimulationFacade {
            system,
            settings,
            t: 0.0,
            stop: StopHandle::new(),
            #[cfg(feature = "par-schedule")]
            pool: None,
        }
    }

    pub fn system(&self) -> &ComponentSystem {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut ComponentSystem {
        &mut self.system
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Sorts the signal graph, lays out the log grid, and initializes
    /// every component in Signal → C → Q order. Returns `false` (mirroring
    /// the original's boolean return) if sorting fails, without running
    /// any component's `initialize`.
    pub fn initialize(&mut self, t0: f64, t_stop: f64) -> bool {
        self.stop.reset();
        self.system.set_num_log_samples(self.settings.num_log_samples);
        self.system.set_log_start_time(self.settings.log_start_time);
        match scheduler::initialize(&mut self.system, t0, t_stop, self.settings.timestep) {
            Ok(()) => {
                self.t = t0;
                true
            }
            Err(e) => {
                self.system.messages().error(e.message());
                false
            }
        }
    }

    /// Runs single-threaded from the current time up to `t_stop`,
    /// checking the stop flag once per step (spec 4.7). Returns early,
    /// with a message recording why, if cancellation was requested.
    pub fn simulate(&mut self, t_stop: f64) -> HopsanResult<()> {
        let timestep = self.settings.timestep;
        let log_steps = self.system.log_these_time_steps().to_vec();
        // Slot 0 was already logged by `initialize` when it coincides
        // with step 0 (spec 4.7 step 12).
        let mut log_cursor = if log_steps.first() == Some(&0) { 1 } else { 0 };
        let mut step_index = 0usize;

        while self.t < t_stop - timestep * 0.5 {
            if self.stop.is_stop_requested() {
                self.system.messages().warning("simulation stopped by request");
                return Ok(());
            }
            let log_slot = if log_cursor < log_steps.len() && log_steps[log_cursor] == step_index {
                let slot = log_cursor;
                log_cursor += 1;
                Some(slot)
            } else {
                None
            };
            scheduler::simulate_step(&mut self.system, self.t, log_slot)?;
            self.t += timestep;
            step_index += 1;
        }
        Ok(())
    }

    /// Multi-threaded `simulate`, mirroring `simulateMultiThreaded(t0,
    /// tStop, nThreads, noChanges, algorithm)`: `no_changes = true` reuses
    /// the already-built thread pool from a previous call instead of
    /// rebuilding it, the way the original skips re-partitioning.
    #[cfg(feature = "par-schedule")]
    pub fn simulate_multi_threaded(&mut self, t_stop: f64, n_threads: usize, no_changes: bool, algorithm: SchedulingAlgorithm) -> HopsanResult<()> {
        if !no_changes || self.pool.is_none() {
            self.pool = Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n_threads.max(1))
                    .build()
                    .map_err(|e| crate::error::HopsanError::fatal(format!("failed to build thread pool: {e}")))?,
            );
        }
        self.settings.num_threads = n_threads;
        self.settings.algorithm = algorithm;

        let timestep = self.settings.timestep;
        let log_steps = self.system.log_these_time_steps().to_vec();
        let mut log_cursor = if log_steps.first() == Some(&0) { 1 } else { 0 };
        let mut step_index = 0usize;
        let pool = self.pool.as_ref().expect("pool built above");

        while self.t < t_stop - timestep * 0.5 {
            if self.stop.is_stop_requested() {
                self.system.messages().warning("simulation stopped by request");
                return Ok(());
            }
            let log_slot = if log_cursor < log_steps.len() && log_steps[log_cursor] == step_index {
                let slot = log_cursor;
                log_cursor += 1;
                Some(slot)
            } else {
                None
            };
            scheduler::parallel::simulate_step(pool, &mut self.system, self.t, algorithm, log_slot)?;
            self.t += timestep;
            step_index += 1;
        }
        Ok(())
    }

    /// Finalizes every component in Signal → C → Q order.
    pub fn finalize(&mut self) -> HopsanResult<()> {
        scheduler::finalize(&mut self.system)
    }
}
