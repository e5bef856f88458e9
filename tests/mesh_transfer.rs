mod util;

use hashbrown::HashMap;
use proptest::prelude::*;
use rmhd_amr::adapt::{RefinementDecision, apply_decision, rebalance};
use rmhd_amr::algs::communicator::NoComm;
use rmhd_amr::data::{Field, FieldState};
use rmhd_amr::discretization::{Discretization, QuadSpace};
use rmhd_amr::mhd_error::MhdError;
use rmhd_amr::topology::forest::TreeCell;
use util::{space_on, unit_square};

fn split(cells: Vec<TreeCell>) -> RefinementDecision {
    RefinementDecision {
        split: cells,
        merge: Vec::new(),
    }
}

fn merge(parents: Vec<TreeCell>) -> RefinementDecision {
    RefinementDecision {
        split: Vec::new(),
        merge: parents,
    }
}

fn by_cell(space: &QuadSpace, values: &[f64]) -> HashMap<TreeCell, f64> {
    space.cells().iter().copied().zip(values.iter().copied()).collect()
}

fn projected(space: &QuadSpace, f: impl Fn(f64, f64) -> f64) -> FieldState {
    let mut state = FieldState::new(space.global_dofs());
    let values = space.project(f, space.owned_rows());
    for field in Field::ALL {
        state.set_block(field, &values).unwrap();
    }
    state
}

#[test]
fn blocks_follow_the_new_dof_count() {
    let mut space = space_on(unit_square(), 4, 4, 0);
    let mut state = projected(&space, |x, y| x + y);
    let generation = state.generation();
    let changed = apply_decision(
        &mut space,
        &NoComm,
        &mut state,
        &split(vec![TreeCell::new(0, 0, 0), TreeCell::new(0, 3, 3)]),
    )
    .unwrap();
    assert!(changed);
    assert_eq!(space.global_dofs(), 22);
    assert_eq!(state.block_len(), 22);
    assert_eq!(state.len(), 88);
    assert!(state.generation() > generation);
    assert!(!space.has_pending_transfer());
}

#[test]
fn empty_decision_leaves_everything_alone() {
    let mut space = space_on(unit_square(), 4, 4, 0);
    let mut state = projected(&space, |x, _| x);
    let before = state.clone();
    let generation = space.generation();
    assert!(!apply_decision(&mut space, &NoComm, &mut state, &RefinementDecision::default()).unwrap());
    assert_eq!(space.generation(), generation);
    assert_eq!(state.as_slice(), before.as_slice());
}

#[test]
fn untouched_cells_keep_their_values() {
    let mut space = space_on(unit_square(), 4, 4, 0);
    let mut state = projected(&space, |x, y| (3.0 * x).sin() + y * y);
    let old = by_cell(&space, state.block(Field::Omega));
    let target = TreeCell::new(0, 2, 1);
    apply_decision(&mut space, &NoComm, &mut state, &split(vec![target])).unwrap();
    let new = by_cell(&space, state.block(Field::Omega));
    for (cell, v) in &old {
        if *cell != target {
            assert_eq!(new[cell], *v, "{cell:?}");
        }
    }
}

#[test]
fn linear_profiles_are_reconstructed_exactly() {
    let mut space = space_on(unit_square(), 4, 4, 0);
    let f = |_: f64, y: f64| 2.0 * y + 1.0;
    let mut state = projected(&space, f);
    apply_decision(
        &mut space,
        &NoComm,
        &mut state,
        &split(vec![TreeCell::new(0, 1, 1), TreeCell::new(0, 2, 0)]),
    )
    .unwrap();
    let exact = space.project(f, space.owned_rows());
    for field in Field::ALL {
        let got = state.block(field);
        for (g, e) in got.iter().zip(&exact) {
            assert!((g - e).abs() < 1e-12, "{field:?}: {g} vs {e}");
        }
    }
}

#[test]
fn merging_restricts_by_area() {
    let mut space = space_on(unit_square(), 2, 2, 1);
    let mut state = projected(&space, |x, y| x * y);
    let old = by_cell(&space, state.block(Field::Psi));
    let parent = TreeCell::new(0, 1, 0);
    apply_decision(&mut space, &NoComm, &mut state, &merge(vec![parent])).unwrap();
    let row = space.index_of(&parent).unwrap();
    let mean = parent.children().iter().map(|c| old[c]).sum::<f64>() / 4.0;
    assert!((state.block(Field::Psi)[row] - mean).abs() < 1e-14);
    assert_eq!(space.global_dofs(), 13);
}

#[test]
fn rebalance_preserves_values() {
    let mut space = space_on(unit_square(), 4, 2, 0);
    let mut state = projected(&space, |x, y| x - 2.0 * y);
    apply_decision(&mut space, &NoComm, &mut state, &split(vec![TreeCell::new(0, 3, 1)])).unwrap();
    let old = by_cell(&space, state.block(Field::Current));
    let generation = space.generation();
    rebalance(&mut space, &NoComm, &mut state).unwrap();
    assert!(space.generation() > generation);
    assert_eq!(by_cell(&space, state.block(Field::Current)), old);
    assert!(!space.has_pending_transfer());
}

#[test]
fn invalid_decision_is_an_error_and_releases_the_space() {
    let mut space = space_on(unit_square(), 2, 2, 0);
    let mut state = projected(&space, |x, _| x);
    let err = apply_decision(&mut space, &NoComm, &mut state, &merge(vec![TreeCell::new(0, 0, 0)]))
        .unwrap_err();
    assert!(matches!(err, MhdError::Topology(_)));
    assert!(!space.has_pending_transfer());

    let mut wrong = FieldState::new(3);
    let err = apply_decision(&mut space, &NoComm, &mut wrong, &split(vec![TreeCell::new(0, 1, 1)]))
        .unwrap_err();
    assert_eq!(
        err,
        MhdError::LayoutMismatch {
            expected: 4,
            found: 3
        }
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn refine_then_derefine_is_lossless(
        values in prop::collection::vec(-1.0f64..1.0, 16),
        picks in prop::collection::vec(0usize..16, 1..5),
    ) {
        let mut space = space_on(unit_square(), 4, 4, 0);
        let mut state = FieldState::new(16);
        for field in Field::ALL {
            state.set_block(field, &values).unwrap();
        }
        let original = by_cell(&space, &values);
        let mut cells: Vec<TreeCell> = picks.iter().map(|&k| space.cell(k)).collect();
        cells.sort_unstable();
        cells.dedup();

        apply_decision(&mut space, &NoComm, &mut state, &split(cells.clone())).unwrap();
        prop_assert_eq!(state.block_len(), 16 + 3 * cells.len());
        apply_decision(&mut space, &NoComm, &mut state, &merge(cells)).unwrap();
        prop_assert_eq!(state.block_len(), 16);
        for field in Field::ALL {
            for (cell, v) in by_cell(&space, state.block(field)) {
                prop_assert!((v - original[&cell]).abs() < 1e-12);
            }
        }
    }
}
