//! Multi-root quadtree AMR forest over a rectangular base grid.
//!
//! Root cells tile an `nx0 × ny0` base grid. A cell at `level` has integer
//! coordinates on the uniform grid of `nx0·2^level × ny0·2^level` cells. The
//! forest is periodic in x and bounded in y.

use crate::debug_invariants::DebugInvariants;
use crate::mhd_error::MhdError;
use std::collections::BTreeSet;
use static_assertions::const_assert;

/// Deepest level a forest may hold.
pub const MAX_TREE_LEVEL: u8 = 24;

const KEY_COORD_BITS: u32 = 28;
const_assert!((MAX_TREE_LEVEL as u32) < KEY_COORD_BITS);

/// A cell in the quadtree forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeCell {
    /// Refinement level (0 is a root).
    pub level: u8,
    /// Integer coordinates at the given level.
    pub coords: [u32; 2],
}

impl TreeCell {
    pub fn new(level: u8, x: u32, y: u32) -> Self {
        Self {
            level,
            coords: [x, y],
        }
    }

    /// Returns the parent cell, or `None` for a root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            None
        } else {
            Some(Self {
                level: self.level - 1,
                coords: [self.coords[0] / 2, self.coords[1] / 2],
            })
        }
    }

    /// Returns the 4 children in lexicographic `(y, x)` bit order.
    pub fn children(&self) -> [Self; 4] {
        let [x, y] = self.coords;
        let l = self.level + 1;
        [
            Self::new(l, 2 * x, 2 * y),
            Self::new(l, 2 * x + 1, 2 * y),
            Self::new(l, 2 * x, 2 * y + 1),
            Self::new(l, 2 * x + 1, 2 * y + 1),
        ]
    }

    /// Ancestor at `level` (itself when `level == self.level`).
    pub fn ancestor(&self, level: u8) -> Option<Self> {
        if level > self.level {
            return None;
        }
        let shift = self.level - level;
        Some(Self {
            level,
            coords: [self.coords[0] >> shift, self.coords[1] >> shift],
        })
    }

    /// Pack into a single word for message passing.
    pub fn to_key(&self) -> u64 {
        (u64::from(self.level) << (2 * KEY_COORD_BITS))
            | (u64::from(self.coords[0]) << KEY_COORD_BITS)
            | u64::from(self.coords[1])
    }

    /// Inverse of [`TreeCell::to_key`].
    pub fn from_key(key: u64) -> Self {
        let mask = (1u64 << KEY_COORD_BITS) - 1;
        Self {
            level: (key >> (2 * KEY_COORD_BITS)) as u8,
            coords: [
                ((key >> KEY_COORD_BITS) & mask) as u32,
                (key & mask) as u32,
            ],
        }
    }
}

/// Face direction of a neighbour query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    West,
    East,
    South,
    North,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::West,
        Direction::East,
        Direction::South,
        Direction::North,
    ];

    /// 0 for x faces, 1 for y faces.
    pub fn axis(self) -> usize {
        match self {
            Direction::West | Direction::East => 0,
            Direction::South | Direction::North => 1,
        }
    }

    /// +1 towards increasing coordinates, -1 otherwise.
    pub fn sign(self) -> f64 {
        match self {
            Direction::East | Direction::North => 1.0,
            Direction::West | Direction::South => -1.0,
        }
    }

    fn opposite(self) -> Self {
        match self {
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::North => Direction::South,
        }
    }
}

/// Result of a face-neighbour query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceNeighbors {
    /// The face lies on the non-periodic boundary.
    Boundary,
    /// Leaves sharing (part of) the face: one equal/coarser leaf or several finer ones.
    Leaves(Vec<TreeCell>),
}

/// Quadtree forest over an `nx0 × ny0` base grid, periodic in x.
#[derive(Debug, Clone)]
pub struct QuadForest {
    nx0: u32,
    ny0: u32,
    leaves: BTreeSet<TreeCell>,
}

impl QuadForest {
    /// Create a forest whose leaves are the `nx0 × ny0` roots.
    pub fn new(nx0: u32, ny0: u32) -> Self {
        let mut leaves = BTreeSet::new();
        for y in 0..ny0 {
            for x in 0..nx0 {
                leaves.insert(TreeCell::new(0, x, y));
            }
        }
        Self { nx0, ny0, leaves }
    }

    pub fn base_grid(&self) -> (u32, u32) {
        (self.nx0, self.ny0)
    }

    /// Return an iterator over leaf cells.
    pub fn leaves(&self) -> impl Iterator<Item = &TreeCell> {
        self.leaves.iter()
    }

    /// Return the number of leaf cells.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_leaf(&self, cell: &TreeCell) -> bool {
        self.leaves.contains(cell)
    }

    pub fn max_level(&self) -> u8 {
        self.leaves.iter().map(|cell| cell.level).max().unwrap_or(0)
    }

    /// Split a leaf into its four children.
    pub fn split(&mut self, cell: &TreeCell) -> Result<(), MhdError> {
        if cell.level >= MAX_TREE_LEVEL {
            return Err(MhdError::Topology(format!(
                "cannot split {cell:?}: forest depth limit {MAX_TREE_LEVEL}"
            )));
        }
        if !self.leaves.remove(cell) {
            return Err(MhdError::Topology(format!("split of non-leaf {cell:?}")));
        }
        self.leaves.extend(cell.children());
        Ok(())
    }

    /// Merge the four leaf children of `parent` back into `parent`.
    pub fn merge(&mut self, parent: &TreeCell) -> Result<(), MhdError> {
        let children = parent.children();
        if !children.iter().all(|c| self.leaves.contains(c)) {
            return Err(MhdError::Topology(format!(
                "merge of {parent:?} requires four leaf children"
            )));
        }
        for child in &children {
            self.leaves.remove(child);
        }
        self.leaves.insert(*parent);
        Ok(())
    }

    /// Split every leaf once.
    pub fn refine_uniformly(&mut self) -> Result<(), MhdError> {
        let cells: Vec<_> = self.leaves.iter().copied().collect();
        for cell in &cells {
            self.split(cell)?;
        }
        Ok(())
    }

    /// Parents whose four children are all leaves (candidates for merging).
    pub fn complete_families(&self) -> Vec<TreeCell> {
        let parents: BTreeSet<_> = self.leaves.iter().filter_map(|c| c.parent()).collect();
        parents
            .into_iter()
            .filter(|p| p.children().iter().all(|c| self.leaves.contains(c)))
            .collect()
    }

    /// Cells-per-axis at `level`.
    pub fn extent(&self, level: u8) -> (u32, u32) {
        (self.nx0 << level, self.ny0 << level)
    }

    /// Same-level cell across the face, wrapping periodically in x.
    fn across(&self, cell: &TreeCell, dir: Direction) -> Option<TreeCell> {
        let (nx, ny) = self.extent(cell.level);
        let [x, y] = cell.coords;
        let coords = match dir {
            Direction::West => [if x == 0 { nx - 1 } else { x - 1 }, y],
            Direction::East => [if x + 1 == nx { 0 } else { x + 1 }, y],
            Direction::South if y == 0 => return None,
            Direction::South => [x, y - 1],
            Direction::North if y + 1 == ny => return None,
            Direction::North => [x, y + 1],
        };
        Some(TreeCell {
            level: cell.level,
            coords,
        })
    }

    /// Leaves sharing the `dir` face of `cell`.
    pub fn face_neighbors(&self, cell: &TreeCell, dir: Direction) -> FaceNeighbors {
        let Some(same) = self.across(cell, dir) else {
            return FaceNeighbors::Boundary;
        };
        if self.leaves.contains(&same) {
            return FaceNeighbors::Leaves(vec![same]);
        }
        let mut up = same;
        while let Some(parent) = up.parent() {
            if self.leaves.contains(&parent) {
                return FaceNeighbors::Leaves(vec![parent]);
            }
            up = parent;
        }
        let mut found = Vec::new();
        self.collect_facing(&same, dir.opposite(), &mut found);
        FaceNeighbors::Leaves(found)
    }

    /// Descendant leaves of `cell` touching its `side` face.
    fn collect_facing(&self, cell: &TreeCell, side: Direction, out: &mut Vec<TreeCell>) {
        if cell.level >= MAX_TREE_LEVEL {
            return;
        }
        let [c00, c10, c01, c11] = cell.children();
        let facing = match side {
            Direction::West => [c00, c01],
            Direction::East => [c10, c11],
            Direction::South => [c00, c10],
            Direction::North => [c01, c11],
        };
        for child in facing {
            if self.leaves.contains(&child) {
                out.push(child);
            } else {
                self.collect_facing(&child, side, out);
            }
        }
    }

    /// All distinct leaves sharing a face with `cell`.
    pub fn all_face_neighbors(&self, cell: &TreeCell) -> Vec<TreeCell> {
        let mut out = Vec::new();
        for dir in Direction::ALL {
            if let FaceNeighbors::Leaves(cells) = self.face_neighbors(cell, dir) {
                for c in cells {
                    if c != *cell && !out.contains(&c) {
                        out.push(c);
                    }
                }
            }
        }
        out
    }

    /// Space-filling-curve key: root in row-major order, then Morton order inside the root.
    pub fn morton_key(&self, cell: &TreeCell) -> (u32, u64) {
        let shift = MAX_TREE_LEVEL - cell.level;
        let rx = cell.coords[0] >> cell.level;
        let ry = cell.coords[1] >> cell.level;
        let lx = u64::from(cell.coords[0] - (rx << cell.level)) << shift;
        let ly = u64::from(cell.coords[1] - (ry << cell.level)) << shift;
        (ry * self.nx0 + rx, interleave(lx) | (interleave(ly) << 1))
    }
}

fn interleave(v: u64) -> u64 {
    let mut out = 0u64;
    for bit in 0..32 {
        out |= ((v >> bit) & 1) << (2 * bit);
    }
    out
}

impl DebugInvariants for QuadForest {
    /// Leaves must tile the base grid: no leaf may have a leaf ancestor, and
    /// the leaf areas must add up to the base grid.
    fn validate_invariants(&self) -> Result<(), MhdError> {
        let mut area = 0.0f64;
        for leaf in &self.leaves {
            let mut up = *leaf;
            while let Some(parent) = up.parent() {
                if self.leaves.contains(&parent) {
                    return Err(MhdError::Topology(format!(
                        "leaf {leaf:?} overlaps leaf ancestor {parent:?}"
                    )));
                }
                up = parent;
            }
            area += 0.25f64.powi(i32::from(leaf.level));
        }
        let expected = f64::from(self.nx0 * self.ny0);
        if (area - expected).abs() > 1e-9 * expected {
            return Err(MhdError::Topology(format!(
                "leaves cover {area} root cells, expected {expected}"
            )));
        }
        Ok(())
    }
}
