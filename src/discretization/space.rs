//! Cell-centred finite-volume space on a quadtree forest.
//!
//! One DOF per leaf cell. Global numbering sorts leaves by `(owner rank,
//! Morton key)`, so each rank owns one contiguous index range. Conforming
//! faces use a two-point flux. A face split into finer cells on the far side
//! carries one flux between the coarse cell and the length-weighted mean of
//! the fine cells, shared out by length. Dirichlet faces (bottom and top,
//! boundary attribute 1) use the boundary value at the face centre as a ghost
//! at half the cell extent.

use super::{Discretization, TransferOperator};
use crate::adapt::controller::RefinementDecision;
use crate::debug_invariants::DebugInvariants;
use crate::mhd_error::MhdError;
use crate::topology::forest::{Direction, FaceNeighbors, QuadForest, TreeCell};
use hashbrown::HashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Boundary attribute carried by the bottom and top faces.
pub const DIRICHLET_ATTRIBUTE: u32 = 1;
/// Number of distinct boundary attributes of the periodic-in-x channel.
pub const BOUNDARY_ATTRIBUTE_COUNT: usize = 1;

/// Axis-aligned physical domain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub x0: f64,
    pub x1: f64,
    pub y0: f64,
    pub y1: f64,
}

impl Domain {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }
    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Geometry of one leaf cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellGeometry {
    pub center: [f64; 2],
    pub size: [f64; 2],
    pub level: u8,
}

impl CellGeometry {
    pub fn area(&self) -> f64 {
        self.size[0] * self.size[1]
    }
    /// Characteristic element size.
    pub fn h(&self) -> f64 {
        self.size[0].min(self.size[1])
    }
}

/// What lies across a face segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkTarget {
    /// Interior neighbour, by global index.
    Cell(usize),
    /// Dirichlet face, by index into [`QuadSpace::boundary_faces`].
    Boundary(usize),
}

/// One face segment seen from a cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceLink {
    pub target: LinkTarget,
    /// 0 for x faces, 1 for y faces.
    pub axis: usize,
    /// Signed normal distance from the cell centre to the target centre (or ghost).
    pub offset: f64,
    /// Length of the shared segment.
    pub len: f64,
}

impl FaceLink {
    /// Two-point transmissibility `len / |offset|`.
    pub fn transmissibility(&self) -> f64 {
        self.len / self.offset.abs()
    }
}

/// A Dirichlet face segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryFace {
    pub cell: usize,
    /// Face centre.
    pub point: [f64; 2],
    pub attribute: u32,
}

#[derive(Clone, Debug, Default)]
struct Numbering {
    cells: Vec<TreeCell>,
    index: HashMap<TreeCell, usize>,
    offsets: Vec<usize>,
    geometry: Vec<CellGeometry>,
    link_ptr: Vec<usize>,
    links: Vec<FaceLink>,
    boundary: Vec<BoundaryFace>,
    /// Stiffness rows in CSR form; the diagonal is stored as `Cell(i)`.
    stiff_ptr: Vec<usize>,
    stiff: Vec<(LinkTarget, f64)>,
}

impl Numbering {
    fn links(&self, i: usize) -> &[FaceLink] {
        &self.links[self.link_ptr[i]..self.link_ptr[i + 1]]
    }

    fn stiffness(&self, i: usize) -> &[(LinkTarget, f64)] {
        &self.stiff[self.stiff_ptr[i]..self.stiff_ptr[i + 1]]
    }

    fn owned(&self, rank: usize) -> Range<usize> {
        self.offsets[rank]..self.offsets[rank + 1]
    }
}

/// Finite-volume space over a [`QuadForest`], replicated on every rank.
#[derive(Clone, Debug)]
pub struct QuadSpace {
    forest: QuadForest,
    domain: Domain,
    rank: usize,
    size: usize,
    owners: HashMap<TreeCell, usize>,
    current: Numbering,
    previous: Option<Numbering>,
    generation: u64,
    topology_dirty: bool,
}

impl QuadSpace {
    /// Build the space on an `nx0 × ny0` base grid of `domain`, partitioned over `size` ranks.
    pub fn new(
        domain: Domain,
        nx0: u32,
        ny0: u32,
        rank: usize,
        size: usize,
    ) -> Result<Self, MhdError> {
        if nx0 == 0 || ny0 == 0 || rank >= size.max(1) {
            return Err(MhdError::Topology(format!(
                "invalid base grid {nx0}x{ny0} for rank {rank} of {size}"
            )));
        }
        let mut space = Self {
            forest: QuadForest::new(nx0, ny0),
            domain,
            rank,
            size: size.max(1),
            owners: HashMap::new(),
            current: Numbering::default(),
            previous: None,
            generation: 0,
            topology_dirty: false,
        };
        space.balance_owners();
        space.current = space.build_numbering()?;
        Ok(space)
    }

    /// Split every leaf; only valid while no field data lives on the space.
    pub fn uniform_refinement(&mut self) -> Result<(), MhdError> {
        if self.previous.is_some() {
            return Err(MhdError::Topology(
                "uniform refinement during a pending transfer".into(),
            ));
        }
        let before: Vec<_> = self.forest.leaves().copied().collect();
        self.forest.refine_uniformly()?;
        for cell in before {
            if let Some(owner) = self.owners.remove(&cell) {
                for child in cell.children() {
                    self.owners.insert(child, owner);
                }
            }
        }
        self.current = self.build_numbering()?;
        self.generation += 1;
        Ok(())
    }

    pub fn forest(&self) -> &QuadForest {
        &self.forest
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn ranks(&self) -> usize {
        self.size
    }

    /// Start of each rank's owned range, plus the total, in the current numbering.
    pub fn rank_offsets(&self) -> &[usize] {
        &self.current.offsets
    }

    pub fn cells(&self) -> &[TreeCell] {
        &self.current.cells
    }

    pub fn cell(&self, i: usize) -> TreeCell {
        self.current.cells[i]
    }

    pub fn index_of(&self, cell: &TreeCell) -> Option<usize> {
        self.current.index.get(cell).copied()
    }

    pub fn geometry(&self, i: usize) -> &CellGeometry {
        &self.current.geometry[i]
    }

    pub fn links(&self, i: usize) -> &[FaceLink] {
        self.current.links(i)
    }

    pub fn boundary_faces(&self) -> &[BoundaryFace] {
        &self.current.boundary
    }

    /// Largest leaf level.
    pub fn max_level(&self) -> u8 {
        self.forest.max_level()
    }

    /// Midpoint projection of `f` onto `rows`.
    pub fn project(&self, f: impl Fn(f64, f64) -> f64, rows: Range<usize>) -> Vec<f64> {
        rows.map(|i| {
            let [x, y] = self.current.geometry[i].center;
            f(x, y)
        })
        .collect()
    }

    /// Evaluate `g` at every Dirichlet face centre.
    pub fn boundary_values(&self, g: impl Fn(f64, f64) -> f64) -> Vec<f64> {
        self.current
            .boundary
            .iter()
            .map(|b| g(b.point[0], b.point[1]))
            .collect()
    }

    /// `out = K·u + b(bc)` on `rows`, with `u` a global vector. Missing `bc`
    /// means homogeneous Dirichlet data.
    pub fn stiffness_apply(
        &self,
        u: &[f64],
        bc: Option<&[f64]>,
        rows: Range<usize>,
        out: &mut [f64],
    ) -> Result<(), MhdError> {
        self.check_global(u)?;
        if out.len() != rows.len() {
            return Err(MhdError::LayoutMismatch {
                expected: rows.len(),
                found: out.len(),
            });
        }
        for (o, i) in out.iter_mut().zip(rows) {
            *o = self
                .current
                .stiffness(i)
                .iter()
                .map(|&(target, k)| match target {
                    LinkTarget::Cell(j) => k * u[j],
                    LinkTarget::Boundary(b) => k * bc.map_or(0.0, |g| g[b]),
                })
                .sum();
        }
        Ok(())
    }

    /// Discrete Laplacian `(K·u + b)/area` on `rows`.
    pub fn laplacian(
        &self,
        u: &[f64],
        bc: Option<&[f64]>,
        rows: Range<usize>,
        out: &mut [f64],
    ) -> Result<(), MhdError> {
        self.stiffness_apply(u, bc, rows.clone(), out)?;
        for (o, i) in out.iter_mut().zip(rows) {
            *o /= self.current.geometry[i].area();
        }
        Ok(())
    }

    /// Diagonal of the stiffness matrix on `rows`.
    pub fn stiffness_diagonal(&self, rows: Range<usize>) -> Vec<f64> {
        rows.map(|i| {
            self.current
                .stiffness(i)
                .iter()
                .filter(|(target, _)| *target == LinkTarget::Cell(i))
                .map(|(_, k)| k)
                .sum()
        })
        .collect()
    }

    /// Cell areas on `rows` (the lumped mass matrix).
    pub fn areas(&self, rows: Range<usize>) -> Vec<f64> {
        rows.map(|i| self.current.geometry[i].area()).collect()
    }

    /// Cell gradients on `rows` by per-axis least squares over face links.
    ///
    /// With `bc = None` boundary links are ignored; otherwise they act as
    /// Dirichlet ghosts.
    pub fn gradient(
        &self,
        u: &[f64],
        bc: Option<&[f64]>,
        rows: Range<usize>,
    ) -> Result<Vec<[f64; 2]>, MhdError> {
        self.check_global(u)?;
        Ok(rows
            .map(|i| gradient_from_links(self.links(i), i, u[i], |l| match (l.target, bc) {
                (LinkTarget::Cell(j), _) => Some(u[j]),
                (LinkTarget::Boundary(b), Some(g)) => Some(g[b]),
                (LinkTarget::Boundary(_), None) => None,
            }))
            .collect())
    }

    /// Reject degenerate or non-finite cell geometry.
    pub fn check_geometry(&self) -> Result<(), MhdError> {
        for (i, g) in self.current.geometry.iter().enumerate() {
            let area = g.area();
            if !(area.is_finite() && area > 0.0) {
                return Err(MhdError::Assembly {
                    cell: i,
                    reason: format!("zero-measure element (area {area})"),
                });
            }
        }
        Ok(())
    }

    fn check_global(&self, u: &[f64]) -> Result<(), MhdError> {
        if u.len() != self.current.cells.len() {
            return Err(MhdError::LayoutMismatch {
                expected: self.current.cells.len(),
                found: u.len(),
            });
        }
        Ok(())
    }

    /// Equal contiguous Morton chunks per rank.
    fn balance_owners(&mut self) {
        let sorted: Vec<TreeCell> = self
            .forest
            .leaves()
            .copied()
            .sorted_by_key(|c| self.forest.morton_key(c))
            .collect();
        let n = sorted.len();
        self.owners.clear();
        for (k, cell) in sorted.into_iter().enumerate() {
            self.owners.insert(cell, k * self.size / n.max(1));
        }
    }

    fn build_numbering(&self) -> Result<Numbering, MhdError> {
        let mut cells = Vec::with_capacity(self.forest.leaf_count());
        for cell in self.forest.leaves() {
            let owner = self.owners.get(cell).copied().ok_or_else(|| {
                MhdError::Topology(format!("leaf {cell:?} has no owner"))
            })?;
            cells.push((owner, self.forest.morton_key(cell), *cell));
        }
        cells.sort_unstable();

        let mut offsets = vec![0usize; self.size + 1];
        for (owner, _, _) in &cells {
            offsets[owner + 1] += 1;
        }
        for r in 0..self.size {
            offsets[r + 1] += offsets[r];
        }

        let cells: Vec<TreeCell> = cells.into_iter().map(|(_, _, c)| c).collect();
        let index: HashMap<TreeCell, usize> =
            cells.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        let geometry: Vec<CellGeometry> = cells.iter().map(|c| self.cell_geometry(c)).collect();

        let mut link_ptr = Vec::with_capacity(cells.len() + 1);
        let mut links = Vec::new();
        let mut boundary = Vec::new();
        link_ptr.push(0);
        for (i, cell) in cells.iter().enumerate() {
            let gc = geometry[i];
            for dir in Direction::ALL {
                let axis = dir.axis();
                let tangential = 1 - axis;
                match self.forest.face_neighbors(cell, dir) {
                    FaceNeighbors::Boundary => {
                        let mut point = gc.center;
                        point[axis] += dir.sign() * 0.5 * gc.size[axis];
                        links.push(FaceLink {
                            target: LinkTarget::Boundary(boundary.len()),
                            axis,
                            offset: dir.sign() * 0.5 * gc.size[axis],
                            len: gc.size[tangential],
                        });
                        boundary.push(BoundaryFace {
                            cell: i,
                            point,
                            attribute: DIRICHLET_ATTRIBUTE,
                        });
                    }
                    FaceNeighbors::Leaves(neighbors) => {
                        for nb in neighbors {
                            let j = *index.get(&nb).ok_or_else(|| {
                                MhdError::Topology(format!("neighbour {nb:?} is not numbered"))
                            })?;
                            let gn = &geometry[j];
                            links.push(FaceLink {
                                target: LinkTarget::Cell(j),
                                axis,
                                offset: dir.sign() * 0.5 * (gc.size[axis] + gn.size[axis]),
                                len: gc.size[tangential].min(gn.size[tangential]),
                            });
                        }
                    }
                }
            }
            link_ptr.push(links.len());
        }
        let (stiff_ptr, stiff) = assemble_stiffness(&geometry, &link_ptr, &links);

        Ok(Numbering {
            cells,
            index,
            offsets,
            geometry,
            link_ptr,
            links,
            boundary,
            stiff_ptr,
            stiff,
        })
    }

    fn cell_geometry(&self, cell: &TreeCell) -> CellGeometry {
        let (nx, ny) = self.forest.extent(cell.level);
        let dx = self.domain.width() / f64::from(nx);
        let dy = self.domain.height() / f64::from(ny);
        CellGeometry {
            center: [
                self.domain.x0 + (f64::from(cell.coords[0]) + 0.5) * dx,
                self.domain.y0 + (f64::from(cell.coords[1]) + 0.5) * dy,
            ],
            size: [dx, dy],
            level: cell.level,
        }
    }

    /// Transfer row for a cell that appeared by splitting `ancestor`:
    /// linear reconstruction from the ancestor's interior-link gradient.
    fn reconstruction_row(
        prev: &Numbering,
        p: usize,
        target: &CellGeometry,
    ) -> BTreeMap<usize, f64> {
        let links = prev.links(p);
        let gp = prev.geometry[p];
        let mut row = BTreeMap::new();
        let mut self_weight = 1.0;
        for axis in 0..2 {
            let delta = target.center[axis] - gp.center[axis];
            let den: f64 = links
                .iter()
                .filter(|l| l.axis == axis && matches!(l.target, LinkTarget::Cell(j) if j != p))
                .map(|l| l.len * l.offset * l.offset)
                .sum();
            if den <= 0.0 {
                continue;
            }
            for l in links.iter().filter(|l| l.axis == axis) {
                if let LinkTarget::Cell(j) = l.target {
                    if j == p {
                        continue;
                    }
                    let w = l.len * l.offset / den * delta;
                    *row.entry(j).or_insert(0.0) += w;
                    self_weight -= w;
                }
            }
        }
        *row.entry(p).or_insert(0.0) += self_weight;
        row
    }

    /// Area-weighted average of the previous leaves below `cell`.
    fn restriction_row(
        prev: &Numbering,
        cell: &TreeCell,
        area: f64,
        row: &mut BTreeMap<usize, f64>,
    ) -> Result<(), MhdError> {
        for child in cell.children() {
            match prev.index.get(&child) {
                Some(&j) => {
                    *row.entry(j).or_insert(0.0) += prev.geometry[j].area() / area;
                }
                None if child.level < crate::topology::forest::MAX_TREE_LEVEL => {
                    Self::restriction_row(prev, &child, area, row)?;
                }
                None => {
                    return Err(MhdError::Topology(format!(
                        "no previous cells cover {cell:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Symmetric flux stiffness from the face links, in CSR form.
///
/// A face whose links all reach finer cells is handled from the coarse side
/// only: the coarse cell `c` and the fine cells `f_k` (lengths `len_k`,
/// weights `w_k = len_k / Σ len`) exchange `T·(Σ w_k u_k − u_c)` with
/// `T = Σ len / Σ w_k·|offset_k|`, and `f_k` receives the share `w_k` of it.
/// The fine cells tile the coarse face, so the weighted mean sits level with
/// the coarse centre and linear profiles give exact fluxes on both sides.
fn assemble_stiffness(
    geometry: &[CellGeometry],
    link_ptr: &[usize],
    links: &[FaceLink],
) -> (Vec<usize>, Vec<(LinkTarget, f64)>) {
    let n = geometry.len();
    let mut rows: Vec<BTreeMap<LinkTarget, f64>> = vec![BTreeMap::new(); n];
    for i in 0..n {
        let level = geometry[i].level;
        let own = &links[link_ptr[i]..link_ptr[i + 1]];
        for face in own.chunk_by(|a, b| a.axis == b.axis && a.offset.signum() == b.offset.signum()) {
            let finer: Vec<(usize, f64, f64)> = face
                .iter()
                .filter_map(|l| match l.target {
                    LinkTarget::Cell(j) if geometry[j].level > level => {
                        Some((j, l.len, l.offset.abs()))
                    }
                    _ => None,
                })
                .collect();
            if finer.is_empty() {
                for l in face {
                    match l.target {
                        // Coarser neighbours own the face; periodic self-links carry nothing.
                        LinkTarget::Cell(j) if j == i || geometry[j].level < level => {}
                        target => {
                            let t = l.transmissibility();
                            *rows[i].entry(LinkTarget::Cell(i)).or_default() -= t;
                            *rows[i].entry(target).or_default() += t;
                        }
                    }
                }
                continue;
            }
            let total: f64 = finer.iter().map(|f| f.1).sum();
            let dist: f64 = finer.iter().map(|&(_, len, d)| len / total * d).sum();
            let t = total / dist;
            *rows[i].entry(LinkTarget::Cell(i)).or_default() -= t;
            for &(j, len_j, _) in &finer {
                let wj = len_j / total;
                *rows[i].entry(LinkTarget::Cell(j)).or_default() += t * wj;
                *rows[j].entry(LinkTarget::Cell(i)).or_default() += t * wj;
                for &(k, len_k, _) in &finer {
                    *rows[j].entry(LinkTarget::Cell(k)).or_default() -= t * wj * len_k / total;
                }
            }
        }
    }
    let mut ptr = Vec::with_capacity(n + 1);
    let mut entries = Vec::new();
    ptr.push(0);
    for row in rows {
        entries.extend(row);
        ptr.push(entries.len());
    }
    (ptr, entries)
}

/// Per-axis least-squares gradient from the links of cell `i`. `value`
/// returns the value across a link, or `None` to skip it.
pub(crate) fn gradient_from_links(
    links: &[FaceLink],
    i: usize,
    ui: f64,
    value: impl Fn(&FaceLink) -> Option<f64>,
) -> [f64; 2] {
    let mut num = [0.0; 2];
    let mut den = [0.0; 2];
    for l in links {
        if l.target == LinkTarget::Cell(i) {
            continue;
        }
        if let Some(v) = value(l) {
            num[l.axis] += l.len * l.offset * (v - ui);
            den[l.axis] += l.len * l.offset * l.offset;
        }
    }
    let mut g = [0.0; 2];
    for a in 0..2 {
        if den[a] > 0.0 {
            g[a] = num[a] / den[a];
        }
    }
    g
}

impl Discretization for QuadSpace {
    fn global_dofs(&self) -> usize {
        self.current.cells.len()
    }

    fn owned_rows(&self) -> Range<usize> {
        self.current.owned(self.rank)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn apply_decision(&mut self, decision: &RefinementDecision) -> Result<(), MhdError> {
        if self.previous.is_some() {
            return Err(MhdError::Topology(
                "topology change while a transfer is pending".into(),
            ));
        }
        // Work on copies so a rejected decision leaves the space untouched.
        let mut forest = self.forest.clone();
        let mut owners = self.owners.clone();
        for cell in &decision.split {
            let owner = owners.get(cell).copied().ok_or_else(|| {
                MhdError::Topology(format!("split of unknown leaf {cell:?}"))
            })?;
            forest.split(cell)?;
            owners.remove(cell);
            for child in cell.children() {
                owners.insert(child, owner);
            }
        }
        for parent in &decision.merge {
            let first = parent.children()[0];
            let owner = owners.get(&first).copied().ok_or_else(|| {
                MhdError::Topology(format!("merge below unknown family {parent:?}"))
            })?;
            forest.merge(parent)?;
            for child in parent.children() {
                owners.remove(&child);
            }
            owners.insert(*parent, owner);
        }
        self.forest = forest;
        self.owners = owners;
        self.topology_dirty |= decision.changed();
        Ok(())
    }

    fn update(&mut self) -> Result<(), MhdError> {
        if self.previous.is_some() {
            return Err(MhdError::Topology(
                "update while a previous transfer is still pending".into(),
            ));
        }
        let next = self.build_numbering()?;
        self.previous = Some(std::mem::replace(&mut self.current, next));
        self.generation += 1;
        self.topology_dirty = false;
        self.debug_assert_invariants();
        Ok(())
    }

    fn rebalance(&mut self) -> Result<(), MhdError> {
        if self.topology_dirty {
            return Err(MhdError::Topology(
                "rebalance before the numbering was updated".into(),
            ));
        }
        self.balance_owners();
        self.update()
    }

    fn transfer_operator(&self, rows: Range<usize>) -> Result<TransferOperator, MhdError> {
        let prev = self
            .previous
            .as_ref()
            .ok_or_else(|| MhdError::Topology("no pending update to transfer from".into()))?;
        let mut out = Vec::with_capacity(rows.len());
        for i in rows {
            let cell = self.current.cells[i];
            if let Some(&j) = prev.index.get(&cell) {
                out.push(BTreeMap::from([(j, 1.0)]));
                continue;
            }
            let mut up = cell;
            let mut ancestor = None;
            while let Some(parent) = up.parent() {
                if let Some(&p) = prev.index.get(&parent) {
                    ancestor = Some(p);
                    break;
                }
                up = parent;
            }
            match ancestor {
                Some(p) => out.push(Self::reconstruction_row(
                    prev,
                    p,
                    &self.current.geometry[i],
                )),
                None => {
                    let mut row = BTreeMap::new();
                    Self::restriction_row(prev, &cell, self.current.geometry[i].area(), &mut row)?;
                    out.push(row);
                }
            }
        }
        Ok(TransferOperator::from_rows(out, prev.cells.len()))
    }

    fn has_pending_transfer(&self) -> bool {
        self.previous.is_some()
    }

    fn previous_owned_rows(&self) -> Option<Range<usize>> {
        self.previous.as_ref().map(|p| p.owned(self.rank))
    }

    fn updates_finished(&mut self) {
        self.previous = None;
    }
}

impl DebugInvariants for QuadSpace {
    fn validate_invariants(&self) -> Result<(), MhdError> {
        self.forest.validate_invariants()?;
        if self.current.cells.len() != self.forest.leaf_count() && !self.topology_dirty {
            return Err(MhdError::Topology(format!(
                "numbering has {} cells, forest has {} leaves",
                self.current.cells.len(),
                self.forest.leaf_count()
            )));
        }
        if self.current.stiff_ptr.len() != self.current.cells.len() + 1 {
            return Err(MhdError::Topology("stiffness rows do not match the numbering".into()));
        }
        if self.current.offsets.last() != Some(&self.current.cells.len()) {
            return Err(MhdError::Topology("rank offsets do not cover all cells".into()));
        }
        let total: f64 = self.current.geometry.iter().map(CellGeometry::area).sum();
        let expected = self.domain.width() * self.domain.height();
        if (total - expected).abs() > 1e-9 * expected.abs().max(1.0) {
            return Err(MhdError::Topology(format!(
                "cell areas sum to {total}, domain area is {expected}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_channel() -> QuadSpace {
        let domain = Domain {
            x0: 0.0,
            x1: 2.0,
            y0: 0.0,
            y1: 1.0,
        };
        let mut space = QuadSpace::new(domain, 2, 1, 0, 1).unwrap();
        space.uniform_refinement().unwrap();
        space.uniform_refinement().unwrap();
        space
    }

    #[test]
    fn laplacian_of_linear_profile_vanishes_with_exact_boundary_data() {
        let space = unit_channel();
        let n = space.global_dofs();
        let u = space.project(|_, y| 3.0 * y - 1.0, 0..n);
        let bc = space.boundary_values(|_, y| 3.0 * y - 1.0);
        let mut lap = vec![0.0; n];
        space.laplacian(&u, Some(&bc), 0..n, &mut lap).unwrap();
        assert!(lap.iter().all(|v| v.abs() < 1e-10), "{lap:?}");
        let g = space.gradient(&u, Some(&bc), 0..n).unwrap();
        assert!(g.iter().all(|g| g[0].abs() < 1e-12 && (g[1] - 3.0).abs() < 1e-10));
    }

    #[test]
    fn linear_profile_is_exact_across_hanging_faces() {
        let mut space = unit_channel();
        let checkerboard = space
            .cells()
            .iter()
            .copied()
            .filter(|c| (c.coords[0] + c.coords[1]) % 2 == 0)
            .collect();
        space
            .apply_decision(&RefinementDecision {
                split: checkerboard,
                merge: Vec::new(),
            })
            .unwrap();
        space.update().unwrap();
        space.updates_finished();

        let n = space.global_dofs();
        let u = space.project(|_, y| 3.0 * y - 1.0, 0..n);
        let bc = space.boundary_values(|_, y| 3.0 * y - 1.0);
        let mut lap = vec![0.0; n];
        space.laplacian(&u, Some(&bc), 0..n, &mut lap).unwrap();
        assert!(lap.iter().all(|v| v.abs() < 1e-9), "{lap:?}");
    }

    #[test]
    fn stiffness_is_symmetric_across_hanging_faces() {
        let mut space = unit_channel();
        let decision = RefinementDecision {
            split: vec![space.cell(0)],
            merge: Vec::new(),
        };
        space.apply_decision(&decision).unwrap();
        space.update().unwrap();
        space.updates_finished();
        space.validate_invariants().unwrap();

        let n = space.global_dofs();
        let column = |j: usize| {
            let mut e = vec![0.0; n];
            e[j] = 1.0;
            let mut out = vec![0.0; n];
            space.stiffness_apply(&e, None, 0..n, &mut out).unwrap();
            out
        };
        let cols: Vec<_> = (0..n).map(column).collect();
        for i in 0..n {
            for j in 0..n {
                assert!((cols[j][i] - cols[i][j]).abs() < 1e-12);
            }
        }
    }
}
