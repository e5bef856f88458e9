// Tearing-mode run on a small adaptive mesh.
// Run with `cargo run --example tearing_mode [config.json]`
// or under MPI with `--features=mpi-support`.

use rmhd_amr::prelude::*;
use simple_logger::SimpleLogger;
use std::fs;

/// Keeps only the latest snapshot and logs the perturbation amplitude.
#[derive(Default)]
struct PeakSink {
    last: Option<Snapshot>,
}

impl SnapshotSink for PeakSink {
    fn write(&mut self, snapshot: &Snapshot) -> Result<(), MhdError> {
        let peak = snapshot
            .field("psi_perturbation")
            .map(|v| v.iter().fold(0.0f64, |m, x| m.max(x.abs())))
            .unwrap_or(0.0);
        log::debug!("t = {:.4}: max |psi'| = {peak:.3e}", snapshot.time);
        self.last = Some(snapshot.clone());
        Ok(())
    }
}

fn config() -> Result<MhdConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(MhdConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(MhdConfig {
            scenario: Scenario::TearingMode,
            dt: 1e-3,
            t_final: 0.05,
            vis_steps: 10,
            serial_refinements: 2,
            amr_levels: 2,
            adapt_every: 10,
            refiner: RefinerParams {
                local_err_goal: 1e-3,
                total_err_goal: 1e-3,
                ..RefinerParams::default()
            },
            derefiner: DerefinerParams {
                enabled: true,
                threshold: 1e-4,
                ..DerefinerParams::default()
            },
            ..MhdConfig::default()
        }),
    }
}

fn run<C: Communicator>(comm: C) -> Result<(), Box<dyn std::error::Error>> {
    let mut sim = Simulation::new(config()?, comm)?;
    let mut sink = PeakSink::default();
    let summary = sim.run(&mut sink)?;
    if sim.comm().is_root() {
        println!(
            "{} steps to t = {:.4} in {:.2?} on {} cells",
            summary.steps,
            summary.time,
            summary.runtime,
            sim.space().global_dofs()
        );
        if let Some(last) = sink.last {
            println!("{}", serde_json::to_string(&last.fields.last())?);
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    SimpleLogger::new().init()?;

    #[cfg(feature = "mpi-support")]
    {
        if let Some(comm) = MpiComm::new() {
            return run(comm);
        }
    }
    run(NoComm)
}
