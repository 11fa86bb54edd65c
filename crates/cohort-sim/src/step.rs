//! Fixed-timestep step loop with a single commit point per step.
//!
//! The [`StepLoop`] drives a population simulation forward. Each step:
//!
//! 1. All registered processes run in registration order. Each receives a
//!    [`StepContext`] that can read committed values and queue updates, but
//!    cannot commit.
//! 2. Every variable in the registry is committed (FIFO per variable).
//! 3. The timestep counter advances.
//!
//! Because processes only see state committed at the end of the previous
//! step, the outcome of a step does not depend on which process observed
//! which partial write. Only the order in which updates were queued matters.
//!
//! # Example
//!
//! ```
//! use cohort_core::prelude::*;
//! use cohort_sim::prelude::*;
//!
//! let mut registry = VariableRegistry::new();
//! registry.register("events", IntegerRaggedVariable::new(vec![Vec::new(); 3])).unwrap();
//!
//! let mut sim = StepLoop::new(registry, StepConfig::default());
//! sim.add_process("record", |ctx| {
//!     let t = ctx.timestep() as i32;
//!     let mut histories = ctx.get::<i32>("events")?.get_values_at(&[0])?;
//!     histories[0].push(t);
//!     ctx.queue_update::<i32>("events", histories, vec![0])
//! });
//!
//! sim.run(3).unwrap();
//! let events = sim.registry().get::<i32>("events").unwrap();
//! assert_eq!(events.get_values(), vec![vec![0, 1, 2], vec![], vec![]]);
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use cohort_core::selection::MembershipSet;
use cohort_core::update::CommitReport;
use cohort_core::variable::RaggedVariable;

use crate::registry::VariableRegistry;
use crate::SimError;

// ---------------------------------------------------------------------------
// StepConfig
// ---------------------------------------------------------------------------

/// Configuration for the step loop.
///
/// `dt` is the simulated time covered by one step, in whatever unit the
/// model uses (days are common).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Simulated time per step. Must be positive and finite.
    pub dt: f64,
}

impl Default for StepConfig {
    /// One time unit per step.
    fn default() -> Self {
        Self { dt: 1.0 }
    }
}

// ---------------------------------------------------------------------------
// StepDiagnostics
// ---------------------------------------------------------------------------

/// Timing and commit summary for the last successful step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepDiagnostics {
    /// Wall-clock time per process (in order of execution).
    pub process_times: Vec<(String, Duration)>,
    /// Time spent committing all variables.
    pub commit_time: Duration,
    /// Total time for the step (processes + commit).
    pub total_time: Duration,
    /// Per-variable commit reports, in registration order.
    pub commits: Vec<(String, CommitReport)>,
}

impl StepDiagnostics {
    /// Updates applied across every variable in this step.
    pub fn updates_applied(&self) -> usize {
        self.commits.iter().map(|(_, r)| r.updates_applied).sum()
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// A process's view of the registry during one step.
///
/// Reads return committed state. Writes are queued and become visible after
/// the step's commit.
pub struct StepContext<'a> {
    registry: &'a mut VariableRegistry,
    timestep: u64,
}

impl StepContext<'_> {
    /// The step currently running (0 for the first step).
    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    /// Read-only access to a variable's committed state.
    pub fn get<T: Clone + 'static>(&self, name: &str) -> Result<&RaggedVariable<T>, SimError> {
        self.registry.get::<T>(name)
    }

    /// Queue an update on a variable. See [`RaggedVariable::queue_update`].
    pub fn queue_update<T: Clone + 'static>(
        &mut self,
        name: &str,
        replacements: Vec<Vec<T>>,
        targets: Vec<usize>,
    ) -> Result<(), SimError> {
        self.registry
            .get_mut::<T>(name)?
            .queue_update(replacements, targets)?;
        Ok(())
    }

    /// Queue a whole-population fill. See [`RaggedVariable::queue_fill`].
    pub fn queue_fill<T: Clone + 'static>(
        &mut self,
        name: &str,
        value: Vec<T>,
    ) -> Result<(), SimError> {
        self.registry.get_mut::<T>(name)?.queue_fill(value)?;
        Ok(())
    }

    /// Queue an update on the members of `set`. See
    /// [`RaggedVariable::queue_update_in`].
    pub fn queue_update_in<T, S>(
        &mut self,
        name: &str,
        replacements: Vec<Vec<T>>,
        set: &S,
    ) -> Result<(), SimError>
    where
        T: Clone + 'static,
        S: MembershipSet + ?Sized,
    {
        self.registry
            .get_mut::<T>(name)?
            .queue_update_in(replacements, set)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StepLoop
// ---------------------------------------------------------------------------

/// A process run once per step.
pub type ProcessFn = Box<dyn FnMut(&mut StepContext<'_>) -> Result<(), SimError>>;

struct RegisteredProcess {
    name: String,
    func: ProcessFn,
}

/// The fixed-timestep step loop.
pub struct StepLoop {
    registry: VariableRegistry,
    processes: Vec<RegisteredProcess>,
    timestep: u64,
    config: StepConfig,
    last_diagnostics: StepDiagnostics,
}

impl StepLoop {
    /// Create a step loop over `registry`.
    ///
    /// # Panics
    ///
    /// Panics if `config.dt` is not positive and finite.
    pub fn new(registry: VariableRegistry, config: StepConfig) -> Self {
        assert!(
            config.dt > 0.0 && config.dt.is_finite(),
            "dt must be positive and finite, got {}",
            config.dt
        );
        Self {
            registry,
            processes: Vec::new(),
            timestep: 0,
            config,
            last_diagnostics: StepDiagnostics::default(),
        }
    }

    /// Register a process to run each step, after all previously registered
    /// processes.
    ///
    /// # Panics
    ///
    /// Panics if a process with the same name is already registered.
    pub fn add_process<F>(&mut self, name: &str, func: F)
    where
        F: FnMut(&mut StepContext<'_>) -> Result<(), SimError> + 'static,
    {
        assert!(
            !self.processes.iter().any(|p| p.name == name),
            "duplicate process name: {name:?}"
        );
        self.processes.push(RegisteredProcess {
            name: name.to_owned(),
            func: Box::new(func),
        });
    }

    /// Execute one step.
    ///
    /// If a process fails, the step is abandoned: every update queued during
    /// it is discarded, the timestep does not advance, and the error is
    /// returned wrapped in [`SimError::Process`].
    pub fn step(&mut self) -> Result<&StepDiagnostics, SimError> {
        let step_start = Instant::now();
        let mut process_times = Vec::with_capacity(self.processes.len());

        // Phase 1: processes queue updates against committed state.
        for process in &mut self.processes {
            let start = Instant::now();
            let mut ctx = StepContext {
                registry: &mut self.registry,
                timestep: self.timestep,
            };
            if let Err(source) = (process.func)(&mut ctx) {
                let discarded = self.registry.pending_total();
                self.registry.discard_all();
                tracing::warn!(
                    timestep = self.timestep,
                    process = %process.name,
                    discarded,
                    error = %source,
                    "process failed; step abandoned and pending updates discarded"
                );
                return Err(SimError::Process {
                    process: process.name.clone(),
                    source: Box::new(source),
                });
            }
            process_times.push((process.name.clone(), start.elapsed()));
        }

        // Phase 2: single commit point.
        let commit_start = Instant::now();
        let commits = self.registry.commit_all();
        let commit_time = commit_start.elapsed();

        self.last_diagnostics = StepDiagnostics {
            process_times,
            commit_time,
            total_time: step_start.elapsed(),
            commits,
        };

        tracing::debug!(
            timestep = self.timestep,
            updates = self.last_diagnostics.updates_applied(),
            "step committed"
        );

        // Phase 3: advance.
        self.timestep += 1;

        Ok(&self.last_diagnostics)
    }

    /// Run `count` steps, stopping at the first failure.
    ///
    /// Returns the total number of updates applied.
    pub fn run(&mut self, count: u64) -> Result<usize, SimError> {
        let mut total = 0;
        for _ in 0..count {
            total += self.step()?.updates_applied();
        }
        Ok(total)
    }

    // -- accessors ----------------------------------------------------------

    /// Number of steps completed.
    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    /// Simulated time, computed as `timestep * dt`.
    pub fn sim_time(&self) -> f64 {
        self.timestep as f64 * self.config.dt
    }

    /// The loop configuration.
    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Read-only access to the variables.
    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    /// Mutable access to the variables, for setup between steps.
    pub fn registry_mut(&mut self) -> &mut VariableRegistry {
        &mut self.registry
    }

    /// Registered process names, in execution order.
    pub fn process_names(&self) -> Vec<&str> {
        self.processes.iter().map(|p| p.name.as_str()).collect()
    }

    /// Diagnostics from the last successful step.
    pub fn last_diagnostics(&self) -> &StepDiagnostics {
        &self.last_diagnostics
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::prelude::*;

    fn registry(n: usize) -> VariableRegistry {
        let mut reg = VariableRegistry::new();
        reg.register("events", IntegerRaggedVariable::new(vec![Vec::new(); n]))
            .unwrap();
        reg
    }

    #[test]
    fn default_config() {
        assert_eq!(StepConfig::default().dt, 1.0);
        let cfg: StepConfig = serde_json::from_str(r#"{"dt": 0.5}"#).unwrap();
        assert_eq!(cfg.dt, 0.5);
        let cfg: StepConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.dt, 1.0);
    }

    #[test]
    #[should_panic(expected = "dt must be positive")]
    fn rejects_non_positive_dt() {
        let _ = StepLoop::new(VariableRegistry::new(), StepConfig { dt: 0.0 });
    }

    #[test]
    #[should_panic(expected = "duplicate process name")]
    fn rejects_duplicate_process() {
        let mut sim = StepLoop::new(VariableRegistry::new(), StepConfig::default());
        sim.add_process("a", |_| Ok(()));
        sim.add_process("a", |_| Ok(()));
    }

    #[test]
    fn processes_see_only_committed_state() {
        let mut sim = StepLoop::new(registry(1), StepConfig::default());
        sim.add_process("writer", |ctx| {
            let t = ctx.timestep() as i32;
            ctx.queue_fill::<i32>("events", vec![t])
        });
        sim.add_process("reader", |ctx| {
            // The writer's fill from this step is not visible yet.
            let seen = ctx.get::<i32>("events")?.get_values();
            let expected: Vec<Vec<i32>> = if ctx.timestep() == 0 {
                vec![vec![]]
            } else {
                vec![vec![ctx.timestep() as i32 - 1]]
            };
            assert_eq!(seen, expected);
            Ok(())
        });

        sim.run(3).unwrap();
        assert_eq!(
            sim.registry().get::<i32>("events").unwrap().get_values(),
            vec![vec![2]]
        );
    }

    #[test]
    fn later_process_wins_on_overlap() {
        let mut sim = StepLoop::new(registry(2), StepConfig::default());
        sim.add_process("first", |ctx| ctx.queue_update::<i32>("events", vec![vec![1]], vec![0]));
        sim.add_process("second", |ctx| ctx.queue_update::<i32>("events", vec![vec![2]], vec![0]));

        let diag = sim.step().unwrap();
        assert_eq!(diag.updates_applied(), 2);
        assert_eq!(diag.commits[0].1.overlapping_writes, 1);
        assert_eq!(diag.process_times.len(), 2);

        assert_eq!(
            sim.registry().get::<i32>("events").unwrap().get_values(),
            vec![vec![2], vec![]]
        );
    }

    #[test]
    fn failed_process_abandons_step() {
        let mut sim = StepLoop::new(registry(2), StepConfig::default());
        sim.add_process("ok", |ctx| ctx.queue_fill::<i32>("events", vec![5]));
        sim.add_process("bad", |ctx| ctx.queue_update::<i32>("events", vec![vec![1]], vec![9]));

        let err = sim.step().unwrap_err();
        match &err {
            SimError::Process { process, source } => {
                assert_eq!(process, "bad");
                assert!(matches!(
                    **source,
                    SimError::Ragged(RaggedError::OutOfRange { index: 9, size: 2 })
                ));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(sim.timestep(), 0);
        assert_eq!(sim.registry().pending_total(), 0);
        assert_eq!(
            sim.registry().get::<i32>("events").unwrap().get_values(),
            vec![Vec::<i32>::new(); 2]
        );
    }

    #[test]
    fn sim_time_computed_not_accumulated() {
        let mut sim = StepLoop::new(VariableRegistry::new(), StepConfig { dt: 0.1 });
        sim.run(10).unwrap();
        assert_eq!(sim.timestep(), 10);
        assert_eq!(sim.sim_time(), 10.0 * 0.1);
    }

    #[test]
    fn queue_in_membership_set() {
        let mut sim = StepLoop::new(registry(4), StepConfig::default());
        sim.add_process("mark", |ctx| {
            let set = IndexBitset::from_indices(4, &[3, 1])?;
            ctx.queue_update_in::<i32, _>("events", vec![vec![1]], &set)
        });
        sim.step().unwrap();
        assert_eq!(
            sim.registry().get::<i32>("events").unwrap().get_length(),
            vec![0, 1, 0, 1]
        );
    }

    #[test]
    fn wrong_element_type_is_reported() {
        let mut sim = StepLoop::new(registry(1), StepConfig::default());
        sim.add_process("typo", |ctx| ctx.queue_fill::<f64>("events", vec![1.0]));
        let err = sim.step().unwrap_err();
        assert!(err.to_string().contains("typo"));
    }
}
