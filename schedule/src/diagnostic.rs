//! Recoverable conditions reported alongside a successful result.

use tessera_ir::{KernelId, RefTag};
use tracing::warn;

/// A condition that degrades the generated code but never stops
/// compilation.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum Diagnostic {
    /// No upper bound could be derived for an array dimension; the
    /// dimension is left unconstrained.
    #[display("cannot bound dimension {dim} of array {array}")]
    UnboundedDimension { array: String, dim: usize },

    /// A live-in read of an array declared inside the scop.
    #[display("{reference} may read uninitialized elements of {array}")]
    PossiblyUninitialized { array: String, reference: RefTag },

    /// A shared tile did not fit in the remaining on-chip budget and the
    /// group stays in global memory.
    #[display("{kernel}: group {group} of {array} needs {bytes} bytes, only {left} left")]
    SharedBudgetExceeded { kernel: KernelId, array: String, group: usize, bytes: usize, left: usize },

    /// A private tile was dropped because its accesses depend on a loop
    /// that cannot be unrolled.
    #[display("{kernel}: private tile of {array} group {group} discarded")]
    PrivateTileDiscarded { kernel: KernelId, array: String, group: usize },
}

impl Diagnostic {
    pub(crate) fn emit(self, sink: &mut Vec<Diagnostic>) {
        warn!(diagnostic = %self, "degraded mapping");
        sink.push(self);
    }
}
