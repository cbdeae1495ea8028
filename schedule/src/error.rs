use snafu::Snafu;
use tessera_ir::KernelId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Malformed per-kernel size overrides.
    #[snafu(display("invalid sizes {input:?}: {reason}"))]
    InvalidSizes { input: String, reason: String },

    /// A kernel mark refers to a kernel that was never carved.
    #[snafu(display("{id} not found"))]
    KernelNotFound { id: KernelId },

    /// Error from IR layer.
    #[snafu(display("IR error: {source}"))]
    Ir {
        #[snafu(source)]
        source: tessera_ir::Error,
    },
}
