//! Mapping pipeline from a scheduled scop to carved, grouped kernels.
//!
//! 1. **Arrays**: bounds and classification of every array.
//! 2. **Carving**: kernels cut out of the schedule tree.
//! 3. **Grouping**: reference groups and tiles per kernel, point members
//!    unrolled for private tiles.
//! 4. **Copy schedules**: copy and sync placement per kernel.
//! 5. **Transfers**: host to device data movement.

use std::sync::Arc;

use tessera_ir::{ScheduleNode, Scop};
use tracing::{debug, info, instrument};

use crate::array::{ArrayInfo, extract_array_info};
use crate::carve::{carve_kernels, unroll_point_members};
use crate::config::{GpuOptions, UsedSizes};
use crate::context::GenContext;
use crate::copy::{CopySchedule, build_copy_schedule};
use crate::dataflow::{Transfers, compute_copy_in_and_out};
use crate::diagnostic::Diagnostic;
use crate::error::*;
use crate::group::group_references;
use crate::kernel::Kernel;

/// Everything code generation needs from the mapping stages.
#[derive(Debug, Clone)]
pub struct GpuSchedule {
    /// Schedule tree with every kernel carved and marked.
    pub tree: Arc<ScheduleNode>,
    /// Kernels in carving order; `kernels[i].id == KernelId(i)`.
    pub kernels: Vec<Kernel>,
    pub arrays: Vec<ArrayInfo>,
    /// One per kernel, in the same order.
    pub copy_schedules: Vec<CopySchedule>,
    pub transfers: Transfers,
    pub used_sizes: UsedSizes,
    pub diagnostics: Vec<Diagnostic>,
    /// Some kernel maps a parallel member to blocks or threads.
    pub parallel: bool,
}

impl GpuSchedule {
    pub fn kernel(&self, id: tessera_ir::KernelId) -> Option<(&Kernel, &CopySchedule)> {
        let index = self.kernels.iter().position(|k| k.id == id)?;
        Some((&self.kernels[index], &self.copy_schedules[index]))
    }
}

#[instrument(skip_all, fields(statements = scop.statements.len(), arrays = scop.arrays.len()))]
pub fn schedule_gpu(scop: &Scop, options: &GpuOptions) -> Result<GpuSchedule> {
    let mut ctx = GenContext::new(scop, options);

    if options.dump.schedule_constraints {
        for (kind, dep) in scop.deps.all() {
            info!(kind, source = %dep.source, sink = %dep.sink, relation = %dep.relation, "schedule constraint");
        }
    }

    let arrays = extract_array_info(&mut ctx);

    let carving = carve_kernels(&mut ctx, &scop.schedule)?;
    let mut tree = carving.tree;
    let mut kernels = carving.kernels;

    let mut copy_schedules = Vec::with_capacity(kernels.len());
    for kernel in &mut kernels {
        let unroll = group_references(&mut ctx, kernel, &arrays)?;
        tree = unroll_point_members(&tree, kernel.id, &unroll)?;
        copy_schedules.push(build_copy_schedule(scop, kernel)?);
    }

    if options.dump.schedule {
        info!(tree = %tree, "schedule");
    }

    let transfers = compute_copy_in_and_out(&mut ctx, &arrays)?;
    let (used_sizes, diagnostics) = ctx.finish();
    if options.dump.sizes {
        info!(sizes = %used_sizes, "used sizes");
    }

    debug!(
        kernels = kernels.len(),
        parallel = carving.parallel,
        diagnostics = diagnostics.len(),
        copy_in = transfers.copy_in.len(),
        copy_out = transfers.copy_out.len(),
        "mapped scop"
    );
    Ok(GpuSchedule {
        tree,
        kernels,
        arrays,
        copy_schedules,
        transfers,
        used_sizes,
        diagnostics,
        parallel: carving.parallel,
    })
}
