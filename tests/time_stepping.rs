mod util;

use rmhd_amr::adapt::{RefinementDecision, apply_decision};
use rmhd_amr::algs::communicator::NoComm;
use rmhd_amr::data::{Field, FieldState};
use rmhd_amr::discretization::Discretization;
use rmhd_amr::mhd_error::{ErrorKind, MhdError};
use rmhd_amr::physics::{Auxiliary, Coupling, MeshContext, PhysicsParams, ResistiveMhdOperator, Scenario};
use rmhd_amr::solver::{CgParams, NewtonParams, PreconditionerKind};
use rmhd_amr::time::stepper_from_code;
use rmhd_amr::topology::forest::TreeCell;
use util::{assembled, initial_state, max_abs_diff};

const ALL_SCHEMES: [i32; 7] = [1, 2, 3, 4, 12, 13, 14];

fn ideal(alpha: f64, nonlinear_scale: f64) -> PhysicsParams {
    PhysicsParams {
        resistivity: 0.0,
        viscosity: 0.0,
        nonlinear_scale,
        alpha,
        ..PhysicsParams::default()
    }
}

fn perturbation_norm(op: &ResistiveMhdOperator, ctx: MeshContext<'_, NoComm>, s: &FieldState) -> f64 {
    let d = op.compute_derived_diagnostics(ctx, s).unwrap();
    d.perturbation.iter().map(|v| v * v).sum::<f64>().sqrt()
}

#[test]
fn frozen_system_is_a_fixed_point_of_every_scheme() {
    let (space, mut op) = assembled(Scenario::WavePropagation, ideal(0.01, 0.0), 1);
    let ctx = MeshContext::new(&space, &NoComm);
    let start = initial_state(&space, &op);
    for code in ALL_SCHEMES {
        let mut stepper = stepper_from_code::<NoComm>(code).unwrap();
        let mut state = start.clone();
        let t = stepper.step(&mut op, ctx, &mut state, 0.0, 1e-2).unwrap();
        assert!((t - 1e-2).abs() < 1e-15);
        assert_eq!(state.block(Field::Psi), start.block(Field::Psi), "{}", stepper.name());
        assert_eq!(state.block(Field::Omega), start.block(Field::Omega), "{}", stepper.name());
    }
}

#[test]
fn ideal_equilibrium_stays_put() {
    let (space, mut op) = assembled(Scenario::WavePropagation, ideal(0.0, 1.0), 1);
    let ctx = MeshContext::new(&space, &NoComm);
    let start = initial_state(&space, &op);
    for code in [1, 2] {
        let mut stepper = stepper_from_code::<NoComm>(code).unwrap();
        let mut state = start.clone();
        for k in 0..3 {
            stepper.step(&mut op, ctx, &mut state, k as f64 * 1e-3, 1e-3).unwrap();
        }
        assert!(max_abs_diff(state.block(Field::Psi), start.block(Field::Psi)) < 1e-10);
        assert!(max_abs_diff(state.block(Field::Omega), start.block(Field::Omega)) < 1e-10);
    }
}

#[test]
fn pure_diffusion_decays_at_the_resistive_rate() {
    let params = PhysicsParams {
        resistivity: 0.1,
        viscosity: 0.1,
        nonlinear_scale: 0.0,
        alpha: 0.01,
        ..PhysicsParams::default()
    };
    let (space, mut op) = assembled(Scenario::WavePropagation, params, 2);
    let ctx = MeshContext::new(&space, &NoComm);
    let start = initial_state(&space, &op);
    let p0 = perturbation_norm(&op, ctx, &start);
    let (dt, steps) = (1e-3, 10);
    let k2 = std::f64::consts::PI.powi(2) * (1.0 + 4.0 / (params.lx * params.lx));
    let expected_drop = 1.0 - (-params.resistivity * k2 * dt * steps as f64).exp();

    for code in ALL_SCHEMES {
        let mut stepper = stepper_from_code::<NoComm>(code).unwrap();
        let mut state = start.clone();
        let mut t = 0.0;
        let mut last = p0;
        for _ in 0..steps {
            t = stepper.step(&mut op, ctx, &mut state, t, dt).unwrap();
            let p = perturbation_norm(&op, ctx, &state);
            assert!(p < last, "{}: perturbation grew", stepper.name());
            last = p;
        }
        let drop = 1.0 - last / p0;
        assert!(
            drop > 0.5 * expected_drop && drop < 1.5 * expected_drop,
            "{}: drop {drop} vs {expected_drop}",
            stepper.name()
        );
        assert!(state.block(Field::Omega).iter().all(|&w| w == 0.0));
    }
}

#[test]
fn predictor_corrector_matches_forward_euler_when_the_flow_is_still() {
    let params = Scenario::WavePropagation.resolve(PhysicsParams::default());
    let (space, mut op) = assembled(Scenario::WavePropagation, params, 1);
    let ctx = MeshContext::new(&space, &NoComm);
    let mut state = initial_state(&space, &op);
    let mut rate = FieldState::new(0);
    op.eval_rhs(ctx, &state, 0.0, &mut rate).unwrap();
    assert!(rate.block(Field::Psi).iter().all(|&v| v == 0.0));
    assert!(rate.block(Field::Omega).iter().any(|&v| v != 0.0));

    let dt = 1e-3;
    let psi0 = state.block(Field::Psi).to_vec();
    let mut pc = stepper_from_code::<NoComm>(2).unwrap();
    pc.step(&mut op, ctx, &mut state, 0.0, dt).unwrap();

    assert_eq!(state.block(Field::Psi), psi0.as_slice());
    let euler: Vec<f64> = rate.block(Field::Omega).iter().map(|d| dt * d).collect();
    assert!(max_abs_diff(state.block(Field::Omega), &euler) < 1e-15);
    let phi = op
        .derive_auxiliary(ctx, Auxiliary::StreamFunction, state.block(Field::Omega))
        .unwrap();
    assert_eq!(state.block(Field::Phi), phi.as_slice());
}

#[test]
fn rhs_evaluation_is_pure() {
    let params = Scenario::TearingMode.resolve(PhysicsParams::default());
    let (space, mut op) = assembled(Scenario::TearingMode, params, 1);
    let ctx = MeshContext::new(&space, &NoComm);
    let mut state = initial_state(&space, &op);
    let w = space.project(|x, y| (x * 2.0).sin() * y * (1.0 - y), space.owned_rows());
    state.set_block(Field::Omega, &w).unwrap();
    op.refresh_auxiliaries(ctx, &mut state).unwrap();
    op.assemble_coupling(ctx, Coupling::Velocity, state.block(Field::Phi)).unwrap();
    op.assemble_coupling(ctx, Coupling::Magnetic, state.block(Field::Psi)).unwrap();

    let mut explicit_before = FieldState::new(0);
    op.explicit_rate(ctx, &state, &mut explicit_before).unwrap();
    let mut a = FieldState::new(0);
    let mut b = FieldState::new(0);
    op.eval_rhs(ctx, &state, 0.0, &mut a).unwrap();
    op.eval_rhs(ctx, &state, 0.5, &mut b).unwrap();
    assert_eq!(a.as_slice(), b.as_slice());
    let mut explicit_after = FieldState::new(0);
    op.explicit_rate(ctx, &state, &mut explicit_after).unwrap();
    assert_eq!(explicit_before.as_slice(), explicit_after.as_slice());
    assert!(a.block(Field::Phi).iter().all(|&v| v == 0.0));
    assert!(a.block(Field::Current).iter().all(|&v| v == 0.0));
}

#[test]
fn implicit_stage_solves_its_own_equation() {
    let params = Scenario::TearingMode.resolve(PhysicsParams::default());
    let (space, op) = assembled(Scenario::TearingMode, params, 1);
    let ctx = MeshContext::new(&space, &NoComm);
    let mut x = initial_state(&space, &op);
    let w = space.project(|px, py| px.cos() * (std::f64::consts::PI * py).sin(), space.owned_rows());
    x.set_block(Field::Omega, &w).unwrap();

    let dt = 1e-2;
    let mut k = FieldState::new(0);
    let report = op.implicit_solve(ctx, dt, &x, &mut k).unwrap();
    assert!(report.iterations >= 1);

    let mut stage = x.clone();
    stage.axpy(dt, &k).unwrap();
    let mut f = FieldState::new(0);
    op.eval_rhs(ctx, &stage, 0.0, &mut f).unwrap();
    let scale = k.as_slice().iter().fold(1.0f64, |m, v| m.max(v.abs()));
    assert!(max_abs_diff(k.as_slice(), f.as_slice()) < 1e-6 * scale);
}

#[test]
fn failed_newton_leaves_the_state_untouched() {
    let scenario = Scenario::TearingMode;
    let params = scenario.resolve(PhysicsParams::default());
    let (space, _) = assembled(scenario, params, 1);
    let mut op = ResistiveMhdOperator::new(
        scenario,
        params,
        CgParams::default(),
        NewtonParams {
            max_iter: 0,
            ..NewtonParams::default()
        },
        PreconditionerKind::Identity.factory(),
    );
    op.assemble_problem(&space).unwrap();
    let ctx = MeshContext::new(&space, &NoComm);
    let mut state = initial_state(&space, &op);
    let before = state.clone();
    let err = stepper_from_code::<NoComm>(1)
        .unwrap()
        .step(&mut op, ctx, &mut state, 0.0, 1e-3)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SolverNonConvergence);
    assert!(!err.is_fatal());
    assert_eq!(state.as_slice(), before.as_slice());
}

#[test]
fn stepping_on_a_renumbered_mesh_is_refused() {
    let params = Scenario::TearingMode.resolve(PhysicsParams::default());
    let (mut space, mut op) = assembled(Scenario::TearingMode, params, 0);
    let mut state = initial_state(&space, &op);
    apply_decision(
        &mut space,
        &NoComm,
        &mut state,
        &RefinementDecision {
            split: vec![TreeCell::new(0, 0, 0)],
            merge: Vec::new(),
        },
    )
    .unwrap();
    let ctx = MeshContext::new(&space, &NoComm);
    let mut pc = stepper_from_code::<NoComm>(2).unwrap();
    let err = pc.step(&mut op, ctx, &mut state, 0.0, 1e-3).unwrap_err();
    assert!(matches!(err, MhdError::StaleAssembly { .. }));

    op.assemble_problem(&space).unwrap();
    assert_eq!(op.assembled_generation(), Some(space.generation()));
    pc.step(&mut op, ctx, &mut state, 0.0, 1e-3).unwrap();
}

#[test]
fn zero_state_without_transport_stays_zero() {
    let (space, mut op) = assembled(Scenario::WavePropagation, ideal(0.0, 0.0), 1);
    let ctx = MeshContext::new(&space, &NoComm);
    for code in ALL_SCHEMES {
        let mut stepper = stepper_from_code::<NoComm>(code).unwrap();
        let mut state = FieldState::new(space.owned_rows().len());
        for k in 0..2 {
            stepper.step(&mut op, ctx, &mut state, k as f64 * 0.5, 0.5).unwrap();
        }
        for field in [Field::Phi, Field::Psi, Field::Omega] {
            assert!(state.block(field).iter().all(|&v| v == 0.0), "{}", stepper.name());
        }
    }
}
