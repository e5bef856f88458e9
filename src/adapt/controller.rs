//! Threshold refinement and derefinement.
//!
//! Both controllers are collective: indicator statistics are all-reduced and
//! candidate cells all-gathered, so every rank derives the same
//! [`RefinementDecision`] from the replicated forest.

use crate::adapt::ErrorIndicator;
use crate::adapt::estimator::BlockFluxJumpEstimator;
use crate::algs::communicator::Communicator;
use crate::data::field_state::{BlockState, Layout};
use crate::discretization::{Discretization, QuadSpace};
use crate::mhd_error::{ConfigError, MhdError};
use crate::topology::forest::TreeCell;
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Cells to split and families to merge, identical on every rank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefinementDecision {
    /// Leaves to split into four children.
    pub split: Vec<TreeCell>,
    /// Parents whose four leaf children merge back.
    pub merge: Vec<TreeCell>,
}

impl RefinementDecision {
    /// Whether applying the decision changes the mesh.
    pub fn changed(&self) -> bool {
        !(self.split.is_empty() && self.merge.is_empty())
    }
}

/// How the global error is aggregated for the stopping rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalErrorNorm {
    /// Largest indicator over all cells.
    #[default]
    Max,
    /// Sum of all indicators.
    Sum,
}

/// Parameters of [`ThresholdRefiner`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerParams {
    pub total_fraction: f64,
    pub local_err_goal: f64,
    pub total_err_goal: f64,
    pub max_elements: usize,
    pub max_level: u8,
    pub nc_limit: u8,
    pub total_norm: TotalErrorNorm,
}

impl Default for RefinerParams {
    fn default() -> Self {
        Self {
            total_fraction: 0.5,
            local_err_goal: 1e-7,
            total_err_goal: 1e-7,
            max_elements: 50_000,
            max_level: 5,
            nc_limit: 3,
            total_norm: TotalErrorNorm::Max,
        }
    }
}

/// How the four child indicators of a family combine before the
/// derefinement threshold test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyAggregate {
    Min,
    /// Sum of the children: the merged cell inherits their combined error.
    #[default]
    Sum,
    /// Largest child: every child must be quiet on its own.
    Max,
}

impl FamilyAggregate {
    fn combine(self, errors: impl Iterator<Item = f64>) -> f64 {
        match self {
            FamilyAggregate::Min => errors.fold(f64::INFINITY, f64::min),
            FamilyAggregate::Sum => errors.sum(),
            FamilyAggregate::Max => errors.fold(0.0, f64::max),
        }
    }
}

/// Parameters of [`ThresholdDerefiner`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerefinerParams {
    pub enabled: bool,
    /// Families merge when their aggregate indicator is strictly below this.
    pub threshold: f64,
    pub nc_limit: u8,
    pub aggregate: FamilyAggregate,
}

impl Default for DerefinerParams {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.2 * RefinerParams::default().local_err_goal,
            nc_limit: 3,
            aggregate: FamilyAggregate::Sum,
        }
    }
}

fn by_error_desc(a: &(TreeCell, f64), b: &(TreeCell, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Gather `(cell, error)` pairs from every rank.
fn gather_cells(
    comm: &impl Communicator,
    local: &[(TreeCell, f64)],
) -> Vec<(TreeCell, f64)> {
    let keys: Vec<u64> = local.iter().map(|(c, _)| c.to_key()).collect();
    let errs: Vec<f64> = local.iter().map(|(_, e)| *e).collect();
    let keys = comm.allgather_u64(&keys);
    let errs = comm.allgather_f64(&errs);
    keys.into_iter()
        .zip(errs)
        .map(|(k, e)| (TreeCell::from_key(k), e))
        .collect()
}

/// Marks cells whose indicator is strictly above a threshold.
#[derive(Debug, Clone)]
pub struct ThresholdRefiner {
    params: RefinerParams,
}

impl ThresholdRefiner {
    pub fn new(params: RefinerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RefinerParams {
        &self.params
    }

    /// Collective: derive the split set from the owned indicators of `state`.
    pub fn decide<L: Layout>(
        &self,
        space: &QuadSpace,
        comm: &impl Communicator,
        state: &BlockState<L>,
        indicator: &ErrorIndicator,
    ) -> Result<RefinementDecision, MhdError> {
        comm.agree(indicator.check_fresh(space, state.version()))?;
        let p = &self.params;
        let errors = indicator.values();
        let total = match p.total_norm {
            TotalErrorNorm::Max => comm.allreduce_max(errors.iter().copied().fold(0.0, f64::max)),
            TotalErrorNorm::Sum => comm.allreduce_sum(errors.iter().sum()),
        };
        let elements = space.global_dofs();
        if total <= p.total_err_goal {
            log::debug!("total error {total:e} meets goal {:e}", p.total_err_goal);
            return Ok(RefinementDecision::default());
        }
        if elements >= p.max_elements {
            if comm.is_root() {
                log::warn!("element cap {} reached, refinement stopped", p.max_elements);
            }
            return Ok(RefinementDecision::default());
        }

        let threshold = (p.total_fraction * total).max(p.local_err_goal);
        let rows = space.owned_rows();
        let local: Vec<(TreeCell, f64)> = rows
            .zip(errors)
            .filter(|&(i, &e)| e > threshold && space.geometry(i).level < p.max_level)
            .map(|(i, &e)| (space.cell(i), e))
            .collect();
        let mut candidates = gather_cells(comm, &local);
        candidates.sort_by(by_error_desc);

        let budget = (p.max_elements - elements) / 3;
        if candidates.len() > budget {
            if comm.is_root() {
                log::warn!(
                    "element cap {} limits refinement to {} of {} cells",
                    p.max_elements,
                    budget,
                    candidates.len()
                );
            }
            candidates.truncate(budget);
        }

        let mut marked: HashSet<TreeCell> = candidates.iter().map(|(c, _)| *c).collect();
        enforce_nc_limit(space, &mut marked, p.nc_limit);

        let mut split: Vec<TreeCell> = marked.into_iter().collect();
        split.sort_unstable();
        Ok(RefinementDecision {
            split,
            merge: Vec::new(),
        })
    }
}

/// Drop marks whose split would leave a neighbour more than `nc_limit` levels
/// coarser, counting the neighbour's own mark, until no violation remains.
fn enforce_nc_limit(space: &QuadSpace, marked: &mut HashSet<TreeCell>, nc_limit: u8) {
    let forest = space.forest();
    loop {
        let violating: Vec<TreeCell> = marked
            .iter()
            .filter(|cell| {
                forest.all_face_neighbors(cell).iter().any(|nb| {
                    let nb_level = i32::from(nb.level) + i32::from(marked.contains(nb));
                    i32::from(cell.level) + 1 - nb_level > i32::from(nc_limit)
                })
            })
            .copied()
            .collect();
        if violating.is_empty() {
            break;
        }
        log::debug!("nc limit unmarks {} cells", violating.len());
        for cell in violating {
            marked.remove(&cell);
        }
    }
}

/// Merges sibling families whose aggregate indicator falls strictly below a threshold.
#[derive(Debug, Clone)]
pub struct ThresholdDerefiner {
    params: DerefinerParams,
}

impl ThresholdDerefiner {
    /// The threshold must sit strictly below `refine_goal` when enabled.
    pub fn new(params: DerefinerParams, refine_goal: f64) -> Result<Self, ConfigError> {
        if params.enabled && !(params.threshold < refine_goal) {
            return Err(ConfigError::Hysteresis {
                deref: params.threshold,
                refine: refine_goal,
            });
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &DerefinerParams {
        &self.params
    }

    pub fn enabled(&self) -> bool {
        self.params.enabled
    }

    /// Collective when enabled: derive the merge set from the owned indicators of `state`.
    pub fn decide<L: Layout>(
        &self,
        space: &QuadSpace,
        comm: &impl Communicator,
        state: &BlockState<L>,
        indicator: &ErrorIndicator,
    ) -> Result<RefinementDecision, MhdError> {
        if !self.params.enabled {
            return Ok(RefinementDecision::default());
        }
        comm.agree(indicator.check_fresh(space, state.version()))?;
        let DerefinerParams {
            threshold,
            aggregate,
            ..
        } = self.params;
        let local: Vec<(TreeCell, f64)> = space
            .owned_rows()
            .zip(indicator.values())
            .filter(|&(i, _)| space.geometry(i).level > 0)
            .map(|(i, &e)| (space.cell(i), e))
            .collect();
        let errors: HashMap<TreeCell, f64> = gather_cells(comm, &local).into_iter().collect();

        let forest = space.forest();
        let nc = i32::from(self.params.nc_limit);
        let merge: Vec<TreeCell> = forest
            .complete_families()
            .into_iter()
            .filter(|parent| {
                parent
                    .children()
                    .iter()
                    .map(|c| errors.get(c).copied())
                    .collect::<Option<Vec<f64>>>()
                    .is_some_and(|family| aggregate.combine(family.into_iter()) < threshold)
            })
            .filter(|parent| {
                let family = parent.children();
                family.iter().all(|child| {
                    forest
                        .all_face_neighbors(child)
                        .iter()
                        .filter(|nb| !family.contains(nb))
                        .all(|nb| i32::from(nb.level) - i32::from(parent.level) <= nc)
                })
            })
            .collect();
        if !merge.is_empty() {
            log::debug!("derefinement merges {} families", merge.len());
        }
        Ok(RefinementDecision {
            split: Vec::new(),
            merge,
        })
    }
}

/// Estimator plus refiner and derefiner, as used by the bootstrap loop and the driver.
#[derive(Debug, Clone)]
pub struct RefinementController {
    pub estimator: BlockFluxJumpEstimator,
    pub refiner: ThresholdRefiner,
    pub derefiner: ThresholdDerefiner,
}

impl RefinementController {
    pub fn new(refine: RefinerParams, derefine: DerefinerParams) -> Result<Self, ConfigError> {
        Ok(Self {
            estimator: BlockFluxJumpEstimator::default(),
            refiner: ThresholdRefiner::new(refine),
            derefiner: ThresholdDerefiner::new(derefine, refine.local_err_goal)?,
        })
    }
}
