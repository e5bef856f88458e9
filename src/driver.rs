//! Top-level run: mesh setup, bootstrap adaptation and the time loop.
//!
//! ```no_run
//! use rmhd_amr::prelude::*;
//!
//! let cfg = MhdConfig::from_json(r#"{ "scenario": 2, "t_final": 0.01 }"#)?;
//! let mut sim = Simulation::new(cfg, NoComm)?;
//! let mut sink = MemorySink::default();
//! sim.run(&mut sink)?;
//! # Ok::<(), rmhd_amr::mhd_error::MhdError>(())
//! ```

use crate::adapt::{RefinementController, apply_decision, bootstrap_adaptive_mesh, rebalance};
use crate::algs::communicator::Communicator;
use crate::config::MhdConfig;
use crate::data::field_state::{Field, FieldState};
use crate::discretization::{Discretization, QuadSpace};
use crate::mhd_error::MhdError;
use crate::physics::{Diagnostics, MeshContext, ResistiveMhdOperator};
use crate::time::{TimeStepper, stepper_from_code};
use serde::Serialize;
use std::ops::Range;
use std::time::{Duration, Instant};

/// Read-only view of the state handed to a [`SnapshotSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub time: f64,
    pub step: usize,
    /// Global rows the field values cover.
    pub rows: Range<usize>,
    /// Named owned-row values: the four state blocks plus the ψ perturbation.
    pub fields: Vec<(&'static str, Vec<f64>)>,
}

impl Snapshot {
    pub fn field(&self, name: &str) -> Option<&[f64]> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// Consumer of periodic snapshots.
pub trait SnapshotSink {
    fn write(&mut self, snapshot: &Snapshot) -> Result<(), MhdError>;
}

/// Keeps every snapshot in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub snapshots: Vec<Snapshot>,
}

impl SnapshotSink for MemorySink {
    fn write(&mut self, snapshot: &Snapshot) -> Result<(), MhdError> {
        self.snapshots.push(snapshot.clone());
        Ok(())
    }
}

/// Outcome of [`Simulation::run`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub time: f64,
    pub runtime: Duration,
}

/// A configured run on one rank.
pub struct Simulation<C: Communicator> {
    config: MhdConfig,
    comm: C,
    space: QuadSpace,
    operator: ResistiveMhdOperator,
    controller: RefinementController,
    stepper: Box<dyn TimeStepper<C>>,
    state: FieldState,
    time: f64,
    step: usize,
}

impl<C: Communicator> Simulation<C> {
    /// Resolve `config`, build and pre-refine the mesh, adapt it to the
    /// initial condition and project the initial state. Collective.
    pub fn new(config: MhdConfig, comm: C) -> Result<Self, MhdError> {
        let config = config.resolve()?;
        let controller = RefinementController::new(config.refiner, config.derefiner)?;
        let stepper = stepper_from_code::<C>(config.ode_solver)?;

        let [nx, ny] = config.grid();
        let domain = config.scenario.domain(&config.physics);
        let mut space = QuadSpace::new(domain, nx, ny, comm.rank(), comm.size())?;
        for _ in 0..config.serial_refinements {
            space.uniform_refinement()?;
        }
        space.rebalance()?;
        space.updates_finished();
        for _ in 0..config.parallel_refinements {
            space.uniform_refinement()?;
        }
        if comm.is_root() {
            log::info!(
                "scenario {:?}: {} base cells, {} scalar unknowns",
                config.scenario,
                space.global_dofs(),
                4 * space.global_dofs()
            );
        }

        let mut operator = ResistiveMhdOperator::new(
            config.scenario,
            config.physics,
            config.cg,
            config.newton,
            config.preconditioner.factory(),
        );
        bootstrap_adaptive_mesh(&mut space, &comm, &mut operator, &controller)?;

        let mut state = FieldState::new(0);
        operator.initial_conditions(&space, space.owned_rows(), &mut state);
        if comm.is_root() {
            log::info!(
                "adapted mesh: {} cells, {} scalar unknowns, integrator {}",
                space.global_dofs(),
                4 * space.global_dofs(),
                stepper.name()
            );
        }

        Ok(Self {
            config,
            comm,
            space,
            operator,
            controller,
            stepper,
            state,
            time: 0.0,
            step: 0,
        })
    }

    pub fn config(&self) -> &MhdConfig {
        &self.config
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn space(&self) -> &QuadSpace {
        &self.space
    }

    pub fn operator(&self) -> &ResistiveMhdOperator {
        &self.operator
    }

    pub fn state(&self) -> &FieldState {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn step_count(&self) -> usize {
        self.step
    }

    pub fn diagnostics(&self) -> Result<Diagnostics, MhdError> {
        let ctx = MeshContext::new(&self.space, &self.comm);
        self.operator.compute_derived_diagnostics(ctx, &self.state)
    }

    /// Advance one step of at most `dt`. Collective.
    pub fn advance(&mut self, dt: f64) -> Result<f64, MhdError> {
        let ctx = MeshContext::new(&self.space, &self.comm);
        self.time = self
            .stepper
            .step(&mut self.operator, ctx, &mut self.state, self.time, dt)?;
        self.step += 1;
        Ok(self.time)
    }

    /// Estimate, refine, and derefine when enabled. Collective.
    pub fn adapt(&mut self) -> Result<bool, MhdError> {
        let decision = {
            let indicator = self.indicator()?;
            self.controller
                .refiner
                .decide(&self.space, &self.comm, &self.state, &indicator)?
        };
        let mut changed = apply_decision(&mut self.space, &self.comm, &mut self.state, &decision)?;
        if self.controller.derefiner.enabled() {
            if changed {
                self.operator.assemble_problem(&self.space)?;
                let ctx = MeshContext::new(&self.space, &self.comm);
                self.operator.refresh_auxiliaries(ctx, &mut self.state)?;
            }
            let indicator = self.indicator()?;
            let decision = self
                .controller
                .derefiner
                .decide(&self.space, &self.comm, &self.state, &indicator)?;
            changed |= apply_decision(&mut self.space, &self.comm, &mut self.state, &decision)?;
        }
        if changed {
            rebalance(&mut self.space, &self.comm, &mut self.state)?;
            self.comm.agree(self.operator.assemble_problem(&self.space))?;
            let ctx = MeshContext::new(&self.space, &self.comm);
            self.operator.refresh_auxiliaries(ctx, &mut self.state)?;
            if self.comm.is_root() {
                log::info!("step {}: mesh adapted to {} cells", self.step, self.space.global_dofs());
            }
        }
        Ok(changed)
    }

    fn indicator(&self) -> Result<crate::adapt::ErrorIndicator, MhdError> {
        let globals: Vec<Vec<f64>> = Field::ALL
            .iter()
            .map(|&f| self.comm.allgather_f64(self.state.block(f)))
            .collect();
        self.comm.agree(self.controller.estimator.estimate(
            &self.space,
            |f| globals[f.index()].as_slice(),
            self.state.version(),
        ))
    }

    /// Current state and diagnostics as a [`Snapshot`]. Collective.
    pub fn snapshot(&self) -> Result<Snapshot, MhdError> {
        let diag = self.diagnostics()?;
        let mut fields: Vec<(&'static str, Vec<f64>)> = Field::ALL
            .iter()
            .map(|&f| (f.name(), self.state.block(f).to_vec()))
            .collect();
        fields.push(("psi_perturbation", diag.perturbation));
        Ok(Snapshot {
            time: self.time,
            step: self.step,
            rows: self.space.owned_rows(),
            fields,
        })
    }

    /// Step to the final time, writing a snapshot at the start, every
    /// `vis_steps` steps and after the last step. Collective.
    pub fn run(&mut self, sink: &mut dyn SnapshotSink) -> Result<RunSummary, MhdError> {
        let dt = self.config.dt;
        let t_final = self.config.t_final;
        let vis_steps = self.config.vis_steps;
        let adapt_every = self.config.adapt_every;
        let first_step = self.step;

        sink.write(&self.snapshot()?)?;
        self.comm.barrier();
        let start = Instant::now();

        let mut last = self.time >= t_final - 1e-8 * dt;
        while !last {
            let dt_real = dt.min(t_final - self.time);
            if let Err(e) = self.advance(dt_real) {
                if self.comm.is_root() {
                    log::error!("step {} at t = {} failed: {e}", self.step + 1, self.time);
                }
                return Err(e);
            }
            last = self.time >= t_final - 1e-8 * dt;

            if adapt_every > 0 && self.step % adapt_every == 0 && !last {
                self.adapt()?;
            }
            if last || self.step % vis_steps == 0 {
                let snap = self.snapshot()?;
                if self.comm.is_root() {
                    log::info!("step {}, t = {:.6}", self.step, self.time);
                }
                sink.write(&snap)?;
            }
        }

        self.comm.barrier();
        let runtime = start.elapsed();
        if self.comm.is_root() {
            log::info!(
                "runtime {:.3}s for {} steps",
                runtime.as_secs_f64(),
                self.step - first_step
            );
        }
        Ok(RunSummary {
            steps: self.step - first_step,
            time: self.time,
            runtime,
        })
    }
}
