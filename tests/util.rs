#![allow(dead_code)]
use rmhd_amr::{
    adapt::{DerefinerParams, ErrorIndicator, RefinementController, RefinerParams},
    data::{Field, FieldState},
    discretization::{Discretization, Domain, QuadSpace},
    physics::{PhysicsParams, ResistiveMhdOperator, Scenario},
    solver::{CgParams, NewtonParams, PreconditionerKind},
};

pub fn unit_square() -> Domain {
    Domain {
        x0: 0.0,
        x1: 1.0,
        y0: 0.0,
        y1: 1.0,
    }
}

/// Serial space on `domain` with `levels` uniform refinements.
pub fn space_on(domain: Domain, nx: u32, ny: u32, levels: u8) -> QuadSpace {
    let mut space = QuadSpace::new(domain, nx, ny, 0, 1).unwrap();
    for _ in 0..levels {
        space.uniform_refinement().unwrap();
    }
    space
}

pub fn operator(scenario: Scenario, params: PhysicsParams) -> ResistiveMhdOperator {
    ResistiveMhdOperator::new(
        scenario,
        params,
        CgParams::default(),
        NewtonParams::default(),
        PreconditionerKind::default().factory(),
    )
}

/// Uniform serial space on the scenario's domain with an assembled operator.
pub fn assembled(
    scenario: Scenario,
    params: PhysicsParams,
    levels: u8,
) -> (QuadSpace, ResistiveMhdOperator) {
    let (nx, ny) = match scenario {
        Scenario::IslandCoalescence => (2, 2),
        _ => (6, 2),
    };
    let space = space_on(scenario.domain(&params), nx, ny, levels);
    let mut op = operator(scenario, params);
    op.assemble_problem(&space).unwrap();
    (space, op)
}

pub fn initial_state(space: &QuadSpace, op: &ResistiveMhdOperator) -> FieldState {
    let mut state = FieldState::new(0);
    op.initial_conditions(space, space.owned_rows(), &mut state);
    state
}

pub fn controller(refine: RefinerParams) -> RefinementController {
    RefinementController::new(refine, DerefinerParams::default()).unwrap()
}

/// Indicator with explicit values for the owned rows of `space`, stamped
/// with the version of [`untouched`].
pub fn indicator(space: &QuadSpace, values: Vec<f64>) -> ErrorIndicator {
    ErrorIndicator::new(values, space.generation(), untouched().version())
}

/// A field state nobody has written to.
pub fn untouched() -> FieldState {
    FieldState::new(0)
}

pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

pub fn block_norm(state: &FieldState, field: Field) -> f64 {
    state.block(field).iter().map(|v| v * v).sum::<f64>().sqrt()
}
