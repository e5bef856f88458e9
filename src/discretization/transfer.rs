//! Sparse transfer operators between two numberings of the same field.

use crate::mhd_error::MhdError;
use std::collections::BTreeMap;

/// Row-compressed linear operator `new[i] = Σ w · old[j]`.
#[derive(Clone, Debug, Default)]
pub struct TransferOperator {
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
    old_len: usize,
}

impl TransferOperator {
    /// Build from per-row `(old index, weight)` maps.
    pub fn from_rows(rows: Vec<BTreeMap<usize, f64>>, old_len: usize) -> Self {
        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        row_ptr.push(0);
        for row in rows {
            for (col, val) in row {
                cols.push(col);
                vals.push(val);
            }
            row_ptr.push(cols.len());
        }
        Self {
            row_ptr,
            cols,
            vals,
            old_len,
        }
    }

    /// Number of output rows.
    pub fn rows(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    /// Length of the input (previous global) vector.
    pub fn old_len(&self) -> usize {
        self.old_len
    }

    /// Column indices and weights of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let r = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.cols[r.clone()], &self.vals[r])
    }

    /// `out = T · old`.
    pub fn apply(&self, old: &[f64], out: &mut [f64]) -> Result<(), MhdError> {
        if old.len() != self.old_len {
            return Err(MhdError::LayoutMismatch {
                expected: self.old_len,
                found: old.len(),
            });
        }
        if out.len() != self.rows() {
            return Err(MhdError::LayoutMismatch {
                expected: self.rows(),
                found: out.len(),
            });
        }
        for (i, o) in out.iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            *o = cols.iter().zip(vals).map(|(&c, &w)| w * old[c]).sum();
        }
        Ok(())
    }
}
