//! Structural self-checks for the forest, the space and the field state.
//!
//! `validate_invariants` is always available and returns the first violation.
//! `debug_assert_invariants` turns a violation into a panic, but only in debug
//! builds or with the `strict-invariants` feature; the adaptation pipeline
//! calls it after every renumbering and transfer.

use crate::mhd_error::MhdError;

pub trait DebugInvariants {
    /// First violated invariant, if any.
    fn validate_invariants(&self) -> Result<(), MhdError>;

    #[inline]
    #[track_caller]
    fn debug_assert_invariants(&self) {
        if cfg!(any(debug_assertions, feature = "strict-invariants")) {
            if let Err(e) = self.validate_invariants() {
                panic!("[invariants] {}: {e}", std::any::type_name::<Self>());
            }
        }
    }
}
