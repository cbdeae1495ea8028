//! State threaded through the mapping pipeline.

use tessera_ir::{KernelId, Scop};

use crate::config::{GpuOptions, KernelSizes, UsedSizes};
use crate::diagnostic::Diagnostic;

/// Explicit pipeline context: the inputs every stage reads and the few
/// values stages accumulate.
pub struct GenContext<'a> {
    pub scop: &'a Scop,
    pub options: &'a GpuOptions,
    next_kernel: usize,
    used_sizes: UsedSizes,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> GenContext<'a> {
    pub fn new(scop: &'a Scop, options: &'a GpuOptions) -> Self {
        Self { scop, options, next_kernel: 0, used_sizes: UsedSizes::new(), diagnostics: Vec::new() }
    }

    /// Identifier of the next kernel, in carving order.
    pub fn next_kernel_id(&mut self) -> KernelId {
        let id = KernelId(self.next_kernel);
        self.next_kernel += 1;
        id
    }

    pub fn record_sizes(&mut self, id: KernelId, sizes: KernelSizes) {
        self.used_sizes.insert(id, sizes);
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        diagnostic.emit(&mut self.diagnostics);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn used_sizes(&self) -> &UsedSizes {
        &self.used_sizes
    }

    pub fn finish(self) -> (UsedSizes, Vec<Diagnostic>) {
        (self.used_sizes, self.diagnostics)
    }
}
