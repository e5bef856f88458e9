//! Block-structured storage for the four coupled MHD fields.
//!
//! A [`BlockState`] is one flat buffer of `FIELD_COUNT * block_len` values.
//! Block `k` occupies `[k*block_len, (k+1)*block_len)`. The layout marker `L`
//! keeps the bootstrap layout (every leaf visible on the rank) apart from the
//! evolving layout (owned rows only) at the type level.
//!
//! Borrowed block slices cannot outlive a [`BlockState::reshape`]. Handles
//! obtained with [`BlockState::handle`] can, and are checked against the
//! state's generation when used. The separate [`BlockState::version`] moves on
//! every mutable access, so results derived from the content (error
//! indicators) can be matched against the exact state they came from.

use crate::debug_invariants::DebugInvariants;
use crate::mhd_error::MhdError;
use std::marker::PhantomData;
use std::ops::Range;

/// Number of field blocks.
pub const FIELD_COUNT: usize = 4;

/// Named field, in block order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Stream function φ.
    Phi,
    /// Flux function ψ.
    Psi,
    /// Vorticity w.
    Omega,
    /// Current density j.
    Current,
}

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [Field::Phi, Field::Psi, Field::Omega, Field::Current];

    /// Block index of this field.
    pub const fn index(self) -> usize {
        match self {
            Field::Phi => 0,
            Field::Psi => 1,
            Field::Omega => 2,
            Field::Current => 3,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Field::Phi => "phi",
            Field::Psi => "psi",
            Field::Omega => "omega",
            Field::Current => "current",
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// DOF layout marker for a [`BlockState`].
pub trait Layout: sealed::Sealed {
    const NAME: &'static str;
}

/// Replicated layout used while the initial mesh is generated: one row per leaf.
#[derive(Debug, Clone, Copy)]
pub struct Bootstrap;

/// Owned-row layout used during time integration.
#[derive(Debug, Clone, Copy)]
pub struct Evolving;

impl sealed::Sealed for Bootstrap {}
impl sealed::Sealed for Evolving {}

impl Layout for Bootstrap {
    const NAME: &'static str = "bootstrap";
}

impl Layout for Evolving {
    const NAME: &'static str = "evolving";
}

/// Checked reference to one block, valid until the next reshape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHandle {
    field: Field,
    generation: u64,
    range: Range<usize>,
}

impl BlockHandle {
    pub fn field(&self) -> Field {
        self.field
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Flat buffer partitioned into [`FIELD_COUNT`] equal contiguous blocks.
#[derive(Debug, Clone)]
pub struct BlockState<L: Layout> {
    data: Vec<f64>,
    block_len: usize,
    generation: u64,
    version: u64,
    _layout: PhantomData<L>,
}

/// Field state of the initial mesh-generation phase.
pub type BootstrapState = BlockState<Bootstrap>;
/// Field state advanced by the time integrators.
pub type FieldState = BlockState<Evolving>;

impl<L: Layout> BlockState<L> {
    /// Zero-filled state with `block_len` values per field.
    pub fn new(block_len: usize) -> Self {
        Self {
            data: vec![0.0; FIELD_COUNT * block_len],
            block_len,
            generation: 0,
            version: 0,
            _layout: PhantomData,
        }
    }

    /// Values per field.
    #[inline]
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Total buffer length.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of reshapes this state has seen.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Content version: bumped by every mutable access and every reshape.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Resize to `FIELD_COUNT * block_len` zeros. Content is not preserved
    /// and every outstanding [`BlockHandle`] becomes stale.
    pub fn reshape(&mut self, block_len: usize) {
        self.data.clear();
        self.data.resize(FIELD_COUNT * block_len, 0.0);
        self.block_len = block_len;
        self.generation += 1;
        self.touch();
        log::trace!(
            "[{}] reshape to {} values per field (generation {})",
            L::NAME,
            block_len,
            self.generation
        );
    }

    #[inline]
    fn range(&self, field: Field) -> Range<usize> {
        let k = field.index();
        k * self.block_len..(k + 1) * self.block_len
    }

    /// Read-only view of one block.
    #[inline]
    pub fn block(&self, field: Field) -> &[f64] {
        &self.data[self.range(field)]
    }

    /// Mutable view of one block.
    #[inline]
    pub fn block_mut(&mut self, field: Field) -> &mut [f64] {
        self.touch();
        let r = self.range(field);
        &mut self.data[r]
    }

    /// Mutable views of all four blocks at once, in block order.
    pub fn blocks_mut(&mut self) -> [&mut [f64]; FIELD_COUNT] {
        self.touch();
        let n = self.block_len;
        let (phi, rest) = self.data.split_at_mut(n);
        let (psi, rest) = rest.split_at_mut(n);
        let (omega, current) = rest.split_at_mut(n);
        [phi, psi, omega, current]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        self.touch();
        &mut self.data
    }

    /// Overwrite one block from `values`.
    pub fn set_block(&mut self, field: Field, values: &[f64]) -> Result<(), MhdError> {
        if values.len() != self.block_len {
            return Err(MhdError::LayoutMismatch {
                expected: self.block_len,
                found: values.len(),
            });
        }
        self.block_mut(field).copy_from_slice(values);
        Ok(())
    }

    /// Copy every value of `other`, which must have the same shape.
    pub fn copy_from(&mut self, other: &Self) -> Result<(), MhdError> {
        if other.len() != self.len() {
            return Err(MhdError::LayoutMismatch {
                expected: self.len(),
                found: other.len(),
            });
        }
        self.touch();
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// `self += a * x`.
    pub fn axpy(&mut self, a: f64, x: &Self) -> Result<(), MhdError> {
        if x.len() != self.len() {
            return Err(MhdError::LayoutMismatch {
                expected: self.len(),
                found: x.len(),
            });
        }
        self.touch();
        for (s, v) in self.data.iter_mut().zip(&x.data) {
            *s += a * v;
        }
        Ok(())
    }

    /// Checked handle to one block.
    pub fn handle(&self, field: Field) -> BlockHandle {
        BlockHandle {
            field,
            generation: self.generation,
            range: self.range(field),
        }
    }

    fn check(&self, handle: &BlockHandle) -> Result<(), MhdError> {
        if handle.generation != self.generation {
            return Err(MhdError::StaleView {
                handle: handle.generation,
                current: self.generation,
            });
        }
        Ok(())
    }

    /// Resolve a handle; fails with [`MhdError::StaleView`] after a reshape.
    pub fn view(&self, handle: &BlockHandle) -> Result<&[f64], MhdError> {
        self.check(handle)?;
        Ok(&self.data[handle.range.clone()])
    }

    /// Mutable counterpart of [`BlockState::view`].
    pub fn view_mut(&mut self, handle: &BlockHandle) -> Result<&mut [f64], MhdError> {
        self.check(handle)?;
        self.touch();
        Ok(&mut self.data[handle.range.clone()])
    }
}

impl<L: Layout> DebugInvariants for BlockState<L> {
    fn validate_invariants(&self) -> Result<(), MhdError> {
        if self.data.len() != FIELD_COUNT * self.block_len {
            return Err(MhdError::LayoutMismatch {
                expected: FIELD_COUNT * self.block_len,
                found: self.data.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_contiguous_and_ordered() {
        let mut s = FieldState::new(3);
        for f in Field::ALL {
            s.block_mut(f).fill(f.index() as f64);
        }
        assert_eq!(
            s.as_slice(),
            &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0]
        );
        let [phi, _, _, current] = s.blocks_mut();
        phi[0] = 7.0;
        current[2] = 9.0;
        assert_eq!(s.block(Field::Phi)[0], 7.0);
        assert_eq!(s.block(Field::Current)[2], 9.0);
    }

    #[test]
    fn handles_go_stale_on_reshape() {
        let mut s = BootstrapState::new(2);
        let h = s.handle(Field::Psi);
        s.view_mut(&h).unwrap()[1] = 4.0;
        assert_eq!(s.block(Field::Psi), &[0.0, 4.0]);
        s.reshape(5);
        assert_eq!(s.len(), 20);
        assert!(s.block(Field::Psi).iter().all(|&v| v == 0.0));
        assert_eq!(
            s.view(&h),
            Err(MhdError::StaleView {
                handle: 0,
                current: 1
            })
        );
        s.validate_invariants().unwrap();
    }

    #[test]
    fn version_follows_every_write() {
        let mut s = FieldState::new(2);
        let v0 = s.version();
        let _ = s.block(Field::Psi);
        assert_eq!(s.version(), v0);
        s.set_block(Field::Psi, &[1.0, 2.0]).unwrap();
        let v1 = s.version();
        assert!(v1 > v0);
        let other = s.clone();
        assert_eq!(other.version(), v1);
        s.axpy(0.5, &other).unwrap();
        assert!(s.version() > v1);
        let v2 = s.version();
        s.copy_from(&other).unwrap();
        assert!(s.version() > v2);
        assert_eq!(s.generation(), 0);
    }

    #[test]
    fn empty_state_splits_into_empty_blocks() {
        let mut s = FieldState::new(0);
        assert!(s.is_empty());
        assert!(s.blocks_mut().iter().all(|b| b.is_empty()));
    }
}
