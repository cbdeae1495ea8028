//! The [`generate_gpu`] driver.

use snafu::ResultExt;
use tessera_ir::{AstNode, Scop};
use tessera_schedule::{ArrayInfo, Diagnostic, GpuOptions, Transfers, UsedSizes, schedule_gpu};
use tracing::{debug, info, instrument};

use crate::error::*;
use crate::host::{HostGen, KernelInfo};

/// Host tree with its kernels, ready for a printer.
#[derive(Debug, Clone)]
pub struct GpuProgram {
    pub tree: AstNode,
    /// One per launch, in tree order.
    pub kernels: Vec<KernelInfo>,
    pub arrays: Vec<ArrayInfo>,
    pub transfers: Transfers,
    pub used_sizes: UsedSizes,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    /// Nothing maps to blocks or threads; the caller keeps the sequential
    /// code.
    NoParallelism { diagnostics: Vec<Diagnostic> },
    Device(GpuProgram),
}

impl Outcome {
    pub fn program(&self) -> Option<&GpuProgram> {
        match self {
            Self::Device(program) => Some(program),
            Self::NoParallelism { .. } => None,
        }
    }
}

#[instrument(skip_all, fields(statements = scop.statements.len()))]
pub fn generate_gpu(scop: &Scop, options: &GpuOptions) -> Result<Outcome> {
    let schedule = schedule_gpu(scop, options).context(ScheduleSnafu)?;
    if !schedule.parallel {
        info!("no parallel band; keeping sequential code");
        return Ok(Outcome::NoParallelism { diagnostics: schedule.diagnostics });
    }

    let mut host = HostGen::new(scop, options, &schedule);
    let tree = host.generate()?;
    let kernels = host.kernels;
    debug!(kernels = kernels.len(), "generated program");

    Ok(Outcome::Device(GpuProgram {
        tree,
        kernels,
        arrays: schedule.arrays,
        transfers: schedule.transfers,
        used_sizes: schedule.used_sizes,
        diagnostics: schedule.diagnostics,
    }))
}
