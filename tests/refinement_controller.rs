mod util;

use rmhd_amr::adapt::{
    BlockFluxJumpEstimator, DerefinerParams, FamilyAggregate, RefinementController,
    RefinementDecision, RefinerParams, ThresholdDerefiner, ThresholdRefiner, TotalErrorNorm,
};
use rmhd_amr::algs::communicator::NoComm;
use rmhd_amr::data::{Field, FieldState};
use rmhd_amr::discretization::{Discretization, QuadSpace};
use rmhd_amr::mhd_error::{ConfigError, MhdError};
use rmhd_amr::topology::forest::TreeCell;
use util::{indicator, space_on, unit_square, untouched};

fn errors_at(space: &QuadSpace, marks: &[(TreeCell, f64)]) -> Vec<f64> {
    let mut values = vec![0.0; space.global_dofs()];
    for (cell, e) in marks {
        values[space.index_of(cell).unwrap()] = *e;
    }
    values
}

#[test]
fn threshold_is_strict() {
    let space = space_on(unit_square(), 4, 4, 0);
    let a = TreeCell::new(0, 0, 0);
    let b = TreeCell::new(0, 2, 2);
    let ind = indicator(&space, errors_at(&space, &[(a, 1.0), (b, 0.5)]));
    let refiner = ThresholdRefiner::new(RefinerParams::default());
    let d = refiner.decide(&space, &NoComm, &untouched(), &ind).unwrap();
    assert_eq!(d.split, vec![a]);
    assert!(d.merge.is_empty());
}

#[test]
fn sum_norm_raises_the_threshold() {
    let space = space_on(unit_square(), 4, 4, 0);
    let cells = [TreeCell::new(0, 0, 0), TreeCell::new(0, 1, 0)];
    let ind = indicator(&space, errors_at(&space, &[(cells[0], 1.0), (cells[1], 1.0)]));
    let refiner = ThresholdRefiner::new(RefinerParams {
        total_norm: TotalErrorNorm::Sum,
        ..RefinerParams::default()
    });
    // Threshold is 0.5 * 2.0: neither cell is strictly above it.
    assert!(!refiner.decide(&space, &NoComm, &untouched(), &ind).unwrap().changed());
}

#[test]
fn goals_and_caps_stop_refinement() {
    let space = space_on(unit_square(), 4, 4, 0);
    let big = indicator(&space, vec![1.0; 16]);
    let small = indicator(&space, vec![1e-8; 16]);

    let default = ThresholdRefiner::new(RefinerParams::default());
    assert!(!default.decide(&space, &NoComm, &untouched(), &small).unwrap().changed());

    let level_cap = ThresholdRefiner::new(RefinerParams {
        max_level: 0,
        total_fraction: 0.1,
        ..RefinerParams::default()
    });
    assert!(!level_cap.decide(&space, &NoComm, &untouched(), &big).unwrap().changed());

    let element_cap = ThresholdRefiner::new(RefinerParams {
        max_elements: 16,
        total_fraction: 0.1,
        ..RefinerParams::default()
    });
    assert!(!element_cap.decide(&space, &NoComm, &untouched(), &big).unwrap().changed());
}

#[test]
fn element_budget_keeps_the_largest_errors() {
    let space = space_on(unit_square(), 4, 4, 0);
    let ranked = [
        (TreeCell::new(0, 3, 3), 0.7),
        (TreeCell::new(0, 0, 0), 1.0),
        (TreeCell::new(0, 1, 2), 0.6),
        (TreeCell::new(0, 2, 1), 0.9),
        (TreeCell::new(0, 0, 3), 0.8),
    ];
    let ind = indicator(&space, errors_at(&space, &ranked));
    let refiner = ThresholdRefiner::new(RefinerParams {
        max_elements: 22,
        ..RefinerParams::default()
    });
    let d = refiner.decide(&space, &NoComm, &untouched(), &ind).unwrap();
    assert_eq!(d.split, vec![TreeCell::new(0, 0, 0), TreeCell::new(0, 2, 1)]);
}

#[test]
fn nc_limit_unmarks_violating_cells() {
    let mut space = space_on(unit_square(), 4, 4, 0);
    space
        .apply_decision(&RefinementDecision {
            split: vec![TreeCell::new(0, 1, 1)],
            merge: Vec::new(),
        })
        .unwrap();
    space.update().unwrap();
    space.updates_finished();

    let child = TreeCell::new(1, 2, 2);
    let ind = indicator(&space, errors_at(&space, &[(child, 1.0)]));
    let strict = ThresholdRefiner::new(RefinerParams {
        nc_limit: 1,
        ..RefinerParams::default()
    });
    assert!(!strict.decide(&space, &NoComm, &untouched(), &ind).unwrap().changed());

    let loose = ThresholdRefiner::new(RefinerParams::default());
    assert_eq!(loose.decide(&space, &NoComm, &untouched(), &ind).unwrap().split, vec![child]);
}

#[test]
fn stale_indicator_is_refused() {
    let mut space = space_on(unit_square(), 2, 2, 0);
    let ind = indicator(&space, vec![1.0; 4]);
    space.uniform_refinement().unwrap();
    let err = ThresholdRefiner::new(RefinerParams::default())
        .decide(&space, &NoComm, &untouched(), &ind)
        .unwrap_err();
    assert!(matches!(err, MhdError::StaleAssembly { .. }));
}

#[test]
fn derefine_threshold_must_sit_below_the_refine_goal() {
    let params = DerefinerParams {
        enabled: true,
        threshold: 1e-3,
        nc_limit: 3,
        ..DerefinerParams::default()
    };
    assert_eq!(
        ThresholdDerefiner::new(params, 1e-4).unwrap_err(),
        ConfigError::Hysteresis {
            deref: 1e-3,
            refine: 1e-4
        }
    );
    assert!(ThresholdDerefiner::new(params, 1e-3).is_err());
    assert!(ThresholdDerefiner::new(DerefinerParams { enabled: false, ..params }, 1e-4).is_ok());
    assert!(
        RefinementController::new(
            RefinerParams {
                local_err_goal: 1e-4,
                ..RefinerParams::default()
            },
            params
        )
        .is_err()
    );
}

#[test]
fn disabled_derefiner_never_merges() {
    let space = space_on(unit_square(), 2, 2, 1);
    let ind = indicator(&space, vec![0.0; 16]);
    let d = ThresholdDerefiner::new(DerefinerParams::default(), 1e-7).unwrap();
    assert!(!d.enabled());
    assert!(!d.decide(&space, &NoComm, &untouched(), &ind).unwrap().changed());
}

#[test]
fn quiet_families_merge() {
    let space = space_on(unit_square(), 2, 2, 1);
    let loud = TreeCell::new(1, 3, 3);
    let ind = indicator(&space, errors_at(&space, &[(loud, 1.0)]));
    let d = ThresholdDerefiner::new(
        DerefinerParams {
            enabled: true,
            ..DerefinerParams::default()
        },
        1e-7,
    )
    .unwrap();
    let decision = d.decide(&space, &NoComm, &untouched(), &ind).unwrap();
    assert!(decision.split.is_empty());
    assert_eq!(
        decision.merge,
        vec![
            TreeCell::new(0, 0, 0),
            TreeCell::new(0, 0, 1),
            TreeCell::new(0, 1, 0)
        ]
    );
}

#[test]
fn derefinement_respects_the_nc_limit() {
    let mut space = space_on(unit_square(), 2, 2, 1);
    for cell in [TreeCell::new(1, 0, 0), TreeCell::new(2, 1, 1)] {
        space
            .apply_decision(&RefinementDecision {
                split: vec![cell],
                merge: Vec::new(),
            })
            .unwrap();
        space.update().unwrap();
        space.updates_finished();
    }
    let quiet = indicator(&space, vec![0.0; space.global_dofs()]);
    let derefiner = |nc_limit| {
        ThresholdDerefiner::new(
            DerefinerParams {
                enabled: true,
                threshold: 1e-8,
                nc_limit,
                ..DerefinerParams::default()
            },
            1e-7,
        )
        .unwrap()
    };

    // The east root wraps onto level-2 cells, two levels finer than a merged root.
    let strict = derefiner(1).decide(&space, &NoComm, &untouched(), &quiet).unwrap();
    assert_eq!(
        strict.merge,
        vec![
            TreeCell::new(0, 0, 1),
            TreeCell::new(0, 1, 1),
            TreeCell::new(2, 1, 1)
        ]
    );
    let loose = derefiner(3).decide(&space, &NoComm, &untouched(), &quiet).unwrap();
    assert!(loose.merge.contains(&TreeCell::new(0, 1, 0)));
    assert_eq!(loose.merge.len(), 4);
}

#[test]
fn family_aggregate_decides_borderline_merges() {
    let space = space_on(unit_square(), 1, 1, 1);
    let ind = indicator(&space, vec![3e-8; 4]);
    let merges = |aggregate| {
        ThresholdDerefiner::new(
            DerefinerParams {
                enabled: true,
                threshold: 1e-7,
                nc_limit: 3,
                aggregate,
            },
            1e-6,
        )
        .unwrap()
        .decide(&space, &NoComm, &untouched(), &ind)
        .unwrap()
        .changed()
    };
    // Each child is quiet, the family total is not.
    assert!(merges(FamilyAggregate::Max));
    assert!(merges(FamilyAggregate::Min));
    assert!(!merges(FamilyAggregate::Sum));
    assert_eq!(DerefinerParams::default().aggregate, FamilyAggregate::Sum);
}

#[test]
fn indicator_from_older_field_content_is_refused() {
    let space = space_on(unit_square(), 4, 4, 1);
    let n = space.global_dofs();
    let mut state = FieldState::new(n);
    let kink = space.project(|_, y| (y - 0.5).abs(), 0..n);
    state.set_block(Field::Psi, &kink).unwrap();
    state.set_block(Field::Current, &kink).unwrap();

    let estimator = BlockFluxJumpEstimator::default();
    let before = estimator
        .estimate(&space, |f| state.block(f), state.version())
        .unwrap();
    let refiner = ThresholdRefiner::new(RefinerParams::default());
    assert!(refiner.decide(&space, &NoComm, &state, &before).unwrap().changed());

    state.block_mut(Field::Psi).fill(0.0);
    state.block_mut(Field::Current).fill(0.0);
    let err = refiner.decide(&space, &NoComm, &state, &before).unwrap_err();
    assert!(matches!(err, MhdError::StaleView { .. }));
    let derefiner = ThresholdDerefiner::new(
        DerefinerParams {
            enabled: true,
            ..DerefinerParams::default()
        },
        1e-7,
    )
    .unwrap();
    assert!(matches!(
        derefiner.decide(&space, &NoComm, &state, &before),
        Err(MhdError::StaleView { .. })
    ));

    let after = estimator
        .estimate(&space, |f| state.block(f), state.version())
        .unwrap();
    assert!(!refiner.decide(&space, &NoComm, &state, &after).unwrap().changed());
}
