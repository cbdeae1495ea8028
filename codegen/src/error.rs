//! Error types for code generation.

use snafu::Snafu;
use tessera_ir::{KernelId, RefId, StmtId};
use tessera_poly::Var;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while assembling the host and kernel trees.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A statement iterator is not an affine function of the generated loops.
    #[snafu(display("iterator {iterator} of {stmt} is not determined by the schedule"))]
    NonInvertibleSchedule { stmt: StmtId, iterator: Var },

    /// A loop has no lower or no upper bound in terms of the outer loops.
    #[snafu(display("loop over {coord} is unbounded"))]
    UnboundedLoop { coord: Var },

    /// A band member inside a kernel matches none of the kernel's tiled members.
    #[snafu(display("band member inside {id} is not one of its tiled members"))]
    ForeignMember { id: KernelId },

    /// A kernel mark with no mapped kernel behind it.
    #[snafu(display("{id} has no mapping"))]
    MissingKernel { id: KernelId },

    /// A promoted access does not land on its tile's stride.
    #[snafu(display("reference {reference} of {stmt} does not follow the stride of its tile"))]
    UnalignedAccess { stmt: StmtId, reference: RefId },

    /// Error from the mapping stages.
    #[snafu(display("Schedule error: {source}"))]
    Schedule {
        #[snafu(source)]
        source: tessera_schedule::Error,
    },

    /// Error from IR layer.
    #[snafu(display("IR error: {source}"))]
    Ir {
        #[snafu(source)]
        source: tessera_ir::Error,
    },
}
